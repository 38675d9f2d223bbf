use std::sync::Arc;
use std::time::Duration;

use super::{park_until, InterruptFlag, Interruptible, SyncError, Wake, Waiters};

/// Timed, interruptible rendezvous without an associated lock.
#[derive(Default)]
pub struct Signal {
    waiters: Waiters,
    flag: Arc<InterruptFlag>,
}

impl Signal {
    /// A standalone signal. Prefer [`Scope::new_signal`](super::Scope::new_signal).
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until sent to, timed out or interrupted. `None` waits forever.
    pub async fn wait(&self, timeout: Option<Duration>) -> Wake {
        if self.flag.is_interrupted() {
            return Wake::Interrupted;
        }
        let rx = self.waiters.park();
        park_until(rx, &self.flag, timeout).await
    }

    /// Interruptible sleep.
    ///
    /// Completing the delay or being woken early counts as done; an interrupt
    /// aborts with [`SyncError::Interrupted`].
    pub async fn sleep(&self, duration: Duration) -> Result<(), SyncError> {
        match self.wait(Some(duration)).await {
            Wake::TimedOut | Wake::Notified => Ok(()),
            Wake::Interrupted => Err(SyncError::Interrupted),
        }
    }

    /// Wake one current waiter. A no-op when nobody is waiting.
    pub fn send(&self) -> bool {
        self.waiters.wake_one()
    }

    /// Wake every current waiter.
    pub fn broadcast(&self) -> usize {
        self.waiters.wake_all()
    }

    pub fn interrupt(&self) {
        self.flag.interrupt();
    }

    pub fn is_interrupted(&self) -> bool {
        self.flag.is_interrupted()
    }

    pub(crate) fn interruptible(&self) -> Arc<dyn Interruptible> {
        self.flag.clone()
    }
}
