use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{InterruptFlag, Interruptible, SyncError};

/// Guard returned by [`Lock::lock`]. Releasing it releases the lock.
pub type LockGuard<T> = OwnedMutexGuard<T>;

/// Mutual exclusion that can be permanently closed by an interrupt.
///
/// At most one holder at a time. Once interrupted, blocked and future
/// [`lock`](Lock::lock) calls fail with [`SyncError::Closed`]; a guard that
/// is already held stays valid until dropped.
pub struct Lock<T> {
    mutex: Arc<Mutex<T>>,
    flag: Arc<InterruptFlag>,
}

impl<T> Lock<T> {
    /// A standalone lock. Prefer [`Scope::new_lock`](super::Scope::new_lock)
    /// so it is interrupted together with its owner.
    pub fn new(value: T) -> Self {
        Self {
            mutex: Arc::new(Mutex::new(value)),
            flag: InterruptFlag::new(),
        }
    }

    /// Acquire the lock, or fail once the lock has been interrupted.
    pub async fn lock(&self) -> Result<LockGuard<T>, SyncError> {
        if self.flag.is_interrupted() {
            return Err(SyncError::Closed);
        }
        tokio::select! {
            biased;
            _ = self.flag.interrupted() => Err(SyncError::Closed),
            guard = self.mutex.clone().lock_owned() => Ok(guard),
        }
    }

    /// Acquire the lock only if it is free right now.
    #[cfg(test)]
    pub(crate) fn try_lock(&self) -> Result<Option<LockGuard<T>>, SyncError> {
        if self.flag.is_interrupted() {
            return Err(SyncError::Closed);
        }
        Ok(self.mutex.clone().try_lock_owned().ok())
    }

    pub fn interrupt(&self) {
        self.flag.interrupt();
    }

    pub fn is_interrupted(&self) -> bool {
        self.flag.is_interrupted()
    }

    pub(crate) fn mutex(&self) -> &Arc<Mutex<T>> {
        &self.mutex
    }

    pub(crate) fn interruptible(&self) -> Arc<dyn Interruptible> {
        self.flag.clone()
    }
}
