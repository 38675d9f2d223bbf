//! Per-execution access credentials.
//!
//! Every run attempt of a service obtains an [`ExecutionAccess`] from an
//! [`AccessProvider`]. The default provider, [`KeyStore`], issues a
//! CSPRNG bearer token per attempt, hands it to the child as a PEM block in
//! `WARDEN_ACCESS_PEM`, and can later tell which service presented it.
//!
//! Token lookup uses linear scan with constant-time equality (via `subtle`)
//! to prevent timing side-channels.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use subtle::ConstantTimeEq;

use crate::config::{AccessMode, ServiceConfig};
use crate::errors::{Result, SupervisorError};

/// Environment variable carrying the PEM credential.
pub const ACCESS_PEM_ENV: &str = "WARDEN_ACCESS_PEM";

const PEM_BEGIN: &str = "-----BEGIN WARDEN ACCESS TOKEN-----";
const PEM_END: &str = "-----END WARDEN ACCESS TOKEN-----";

/// Source of per-execution credentials.
pub trait AccessProvider: Send + Sync {
    /// Issue the credential for one run attempt of `service`.
    fn new_execution(&self, service: &ServiceConfig) -> Result<Box<dyn ExecutionAccess>>;
}

/// Credential bound to one run attempt.
pub trait ExecutionAccess: Send + Sync {
    /// PEM to hand to the child, if any. `None` once cleaned up.
    fn credential_pem(&self) -> Option<String>;

    /// Release the staged credential material. Called once per attempt.
    fn cleanup(&self);
}

/// 256-bit bearer token.
///
/// - Generated via OS CSPRNG (`getrandom` crate)
/// - Compared with constant-time equality to prevent timing attacks
#[derive(Clone, Copy)]
pub struct Token([u8; 32]);

impl Token {
    /// Generate a new cryptographically random token.
    pub fn generate() -> std::result::Result<Self, getrandom::Error> {
        let mut bytes = [0u8; 32];
        getrandom::getrandom(&mut bytes)?;
        Ok(Token(bytes))
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Token(bytes)
    }

    /// Lowercase hex, 64 chars.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Option<Self> {
        let bytes = hex::decode(s).ok()?;
        let arr: [u8; 32] = bytes.try_into().ok()?;
        Some(Token(arr))
    }

    /// The token wrapped in a PEM-style armour.
    pub fn to_pem(&self) -> String {
        format!("{}\n{}\n{}\n", PEM_BEGIN, self.to_hex(), PEM_END)
    }

    /// Parse the output of [`Token::to_pem`].
    pub fn from_pem(pem: &str) -> Option<Self> {
        let body = pem
            .trim()
            .strip_prefix(PEM_BEGIN)?
            .strip_suffix(PEM_END)?
            .trim();
        Self::from_hex(body)
    }
}

impl PartialEq for Token {
    fn eq(&self, other: &Self) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

impl Eq for Token {}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Token(***)")
    }
}

/// What a registered token resolves to.
#[derive(Debug, Clone)]
pub struct TokenContext {
    pub service: String,
    /// Per-store sequence number of the execution the token was issued for.
    pub execution: u64,
    pub issued_at: DateTime<Utc>,
}

#[derive(Default)]
struct KeyStoreInner {
    entries: RwLock<Vec<(Token, Arc<TokenContext>)>>,
    next_execution: AtomicU64,
}

/// In-memory registry of the tokens issued to live executions.
#[derive(Clone, Default)]
pub struct KeyStore {
    inner: Arc<KeyStoreInner>,
}

impl KeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, token: Token, context: TokenContext) {
        self.inner.entries.write().push((token, Arc::new(context)));
    }

    /// Resolve a presented token using constant-time comparison.
    pub fn lookup(&self, token: &Token) -> Option<Arc<TokenContext>> {
        let entries = self.inner.entries.read();
        entries
            .iter()
            .find(|(stored, _)| stored == token)
            .map(|(_, ctx)| Arc::clone(ctx))
    }

    /// Resolve a presented PEM credential.
    pub fn lookup_pem(&self, pem: &str) -> Option<Arc<TokenContext>> {
        Token::from_pem(pem).and_then(|t| self.lookup(&t))
    }

    pub fn revoke(&self, token: &Token) {
        self.inner.entries.write().retain(|(t, _)| t != token);
    }

    pub fn len(&self) -> usize {
        self.inner.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.read().is_empty()
    }
}

impl AccessProvider for KeyStore {
    fn new_execution(&self, service: &ServiceConfig) -> Result<Box<dyn ExecutionAccess>> {
        if service.access == AccessMode::None {
            return Ok(Box::new(NoAccess));
        }

        let token = Token::generate().map_err(|e| SupervisorError::Access {
            service: service.name.clone(),
            message: e.to_string(),
        })?;
        let execution = self.inner.next_execution.fetch_add(1, Ordering::Relaxed);
        self.register(
            token,
            TokenContext {
                service: service.name.clone(),
                execution,
                issued_at: Utc::now(),
            },
        );
        tracing::debug!("Issued access token for {} (execution {})", service.name, execution);

        Ok(Box::new(ExecutionGrant {
            token,
            staged: Mutex::new(Some(token.to_pem())),
            store: self.clone(),
            service: service.name.clone(),
        }))
    }
}

/// A token issued by [`KeyStore`]; revoked when the execution lets go of it.
struct ExecutionGrant {
    token: Token,
    staged: Mutex<Option<String>>,
    store: KeyStore,
    service: String,
}

impl ExecutionAccess for ExecutionGrant {
    fn credential_pem(&self) -> Option<String> {
        self.staged.lock().clone()
    }

    fn cleanup(&self) {
        if self.staged.lock().take().is_some() {
            tracing::trace!("Discarded staged credential for {}", self.service);
        }
    }
}

impl Drop for ExecutionGrant {
    fn drop(&mut self) {
        self.store.revoke(&self.token);
    }
}

/// Provider and grant for services that get no credential.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAccess;

impl AccessProvider for NoAccess {
    fn new_execution(&self, _service: &ServiceConfig) -> Result<Box<dyn ExecutionAccess>> {
        Ok(Box::new(NoAccess))
    }
}

impl ExecutionAccess for NoAccess {
    fn credential_pem(&self) -> Option<String> {
        None
    }

    fn cleanup(&self) {}
}
