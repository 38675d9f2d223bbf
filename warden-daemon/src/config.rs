//! Service configuration.
//!
//! A config file is a YAML mapping with a single `services` key. Every entry
//! becomes an immutable [`ServiceConfig`]; the core never mutates them.

mod schedule;
mod duration;
mod restart;

pub use schedule::CronSchedule;
pub use duration::{deserialize_duration, format_duration, parse_duration, serialize_duration};
pub use restart::RestartPolicy;

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use nix::sys::signal::Signal;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::errors::{Result, SupervisorError};

/// Role of a service within the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ServiceKind {
    /// Started only on request.
    #[default]
    OnDemand,
    /// Started when the supervisor starts.
    AutoStart,
    /// Started when the supervisor starts; its exit ends the supervisor.
    Master,
}

impl ServiceKind {
    pub fn starts_automatically(&self) -> bool {
        matches!(self, ServiceKind::AutoStart | ServiceKind::Master)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceKind::OnDemand => "onDemand",
            ServiceKind::AutoStart => "autoStart",
            ServiceKind::Master => "master",
        }
    }
}

/// How a service's execution receives its access credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AccessMode {
    /// No credential is issued.
    None,
    /// The PEM credential is exported as `WARDEN_ACCESS_PEM`.
    #[default]
    Environment,
}

fn default_restart_delay() -> Duration {
    Duration::from_secs(5)
}

fn default_stop_wait() -> Duration {
    Duration::from_secs(30)
}

fn default_success_exit_codes() -> Vec<i32> {
    vec![0]
}

fn default_stop_signal() -> Signal {
    Signal::SIGTERM
}

fn default_true() -> bool {
    true
}

fn deserialize_signal<'de, D>(deserializer: D) -> std::result::Result<Signal, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawSignal {
        Number(i32),
        Name(String),
    }

    let parsed = match RawSignal::deserialize(deserializer)? {
        RawSignal::Number(n) => Signal::try_from(n).ok(),
        RawSignal::Name(name) => warden_unix::signals::parse_signal(&name),
    };
    parsed.ok_or_else(|| serde::de::Error::custom("unknown signal"))
}

fn serialize_signal<S>(signal: &Signal, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(signal.as_str())
}

/// Immutable configuration of one supervised process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ServiceConfig {
    /// Filled in from the key under `services`.
    #[serde(skip)]
    pub name: String,

    #[serde(default, rename = "type")]
    pub kind: ServiceKind,

    pub command: Vec<String>,

    /// Working directory. Defaults to the directory holding the config file.
    #[serde(default)]
    pub directory: Option<PathBuf>,

    #[serde(default)]
    pub environment: HashMap<String, String>,

    /// Whether the supervisor's own environment is passed on.
    #[serde(default = "default_true")]
    pub inherit_environment: bool,

    /// `name`, `uid` or `uid:gid`.
    #[serde(default)]
    pub user: Option<String>,

    #[serde(default)]
    pub auto_restart: RestartPolicy,

    #[serde(
        default,
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub start_delay: Duration,

    #[serde(
        default = "default_restart_delay",
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub restart_delay: Duration,

    #[serde(default = "default_success_exit_codes")]
    pub success_exit_codes: Vec<i32>,

    #[serde(
        default = "default_stop_signal",
        deserialize_with = "deserialize_signal",
        serialize_with = "serialize_signal"
    )]
    pub stop_signal: Signal,

    /// How long a stopped service may take to exit before it is killed.
    #[serde(
        default = "default_stop_wait",
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub stop_wait: Duration,

    #[serde(default)]
    pub cron_expression: Option<CronSchedule>,

    #[serde(default)]
    pub access: AccessMode,
}

impl ServiceConfig {
    /// A service with defaults for everything but the command.
    pub fn new(name: impl Into<String>, command: Vec<String>) -> Self {
        Self {
            name: name.into(),
            kind: ServiceKind::default(),
            command,
            directory: None,
            environment: HashMap::new(),
            inherit_environment: true,
            user: None,
            auto_restart: RestartPolicy::default(),
            start_delay: Duration::ZERO,
            restart_delay: default_restart_delay(),
            success_exit_codes: default_success_exit_codes(),
            stop_signal: default_stop_signal(),
            stop_wait: default_stop_wait(),
            cron_expression: None,
            access: AccessMode::default(),
        }
    }

    pub fn is_master(&self) -> bool {
        self.kind == ServiceKind::Master
    }

    pub fn is_success(&self, exit_code: i32) -> bool {
        self.success_exit_codes.contains(&exit_code)
    }

    pub fn has_cron(&self) -> bool {
        self.cron_expression.is_some()
    }

    /// Check the constraints serde cannot express.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.command.is_empty() || self.command[0].is_empty() {
            return Err("command must not be empty".to_string());
        }
        if self.success_exit_codes.is_empty() {
            return Err("successExitCodes must not be empty".to_string());
        }
        Ok(())
    }
}

/// A whole supervisor configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SupervisorConfig {
    #[serde(default)]
    pub services: BTreeMap<String, ServiceConfig>,
}

impl SupervisorConfig {
    /// Refuse config files larger than this.
    pub const MAX_CONFIG_FILE_SIZE: u64 = 1024 * 1024;

    /// Load, resolve and validate a config file.
    pub fn load(path: &Path) -> Result<Self> {
        let metadata = std::fs::metadata(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                SupervisorError::ConfigNotFound(path.to_path_buf())
            } else {
                SupervisorError::Io(e)
            }
        })?;
        if metadata.len() > Self::MAX_CONFIG_FILE_SIZE {
            return Err(SupervisorError::Config(format!(
                "Config file '{}' is too large ({} bytes, max {} bytes)",
                path.display(),
                metadata.len(),
                Self::MAX_CONFIG_FILE_SIZE,
            )));
        }

        let contents = std::fs::read_to_string(path)?;
        let base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        let de = serde_yaml::Deserializer::from_str(&contents);
        let config: SupervisorConfig =
            serde_path_to_error::deserialize(de).map_err(|e| SupervisorError::ConfigParse {
                path: path.to_path_buf(),
                source: e,
            })?;

        let config = config.resolve(&base_dir);
        config.validate()?;
        Ok(config)
    }

    /// Parse a config from a string, resolving relative directories against `base_dir`.
    pub fn from_yaml(contents: &str, base_dir: &Path) -> Result<Self> {
        let config: SupervisorConfig = serde_yaml::from_str(contents)
            .map_err(|e| SupervisorError::Config(e.to_string()))?;
        let config = config.resolve(base_dir);
        config.validate()?;
        Ok(config)
    }

    /// Fill in service names and working directories.
    fn resolve(mut self, base_dir: &Path) -> Self {
        for (name, service) in self.services.iter_mut() {
            service.name = name.clone();
            service.directory = Some(match service.directory.take() {
                Some(dir) if dir.is_relative() => base_dir.join(dir),
                Some(dir) => dir,
                None => base_dir.to_path_buf(),
            });
        }
        self
    }

    /// Cross-service checks: exactly one master, and every service valid.
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();
        for (name, service) in &self.services {
            if let Err(e) = service.validate() {
                errors.push(format!("service '{}': {}", name, e));
            }
        }

        let masters: Vec<&str> = self
            .services
            .values()
            .filter(|s| s.is_master())
            .map(|s| s.name.as_str())
            .collect();
        match masters.len() {
            1 => {}
            0 => errors.push("exactly one service must have type `master`, found none".to_string()),
            _ => errors.push(format!(
                "exactly one service must have type `master`, found {}: {}",
                masters.len(),
                masters.join(", ")
            )),
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(SupervisorError::Config(errors.join("\n  - ")))
        }
    }

    pub fn master(&self) -> Option<&ServiceConfig> {
        self.services.values().find(|s| s.is_master())
    }
}
