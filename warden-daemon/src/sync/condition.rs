use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use super::{park_until, InterruptFlag, Interruptible, Lock, LockGuard, Wake, Waiters};

/// Condition variable bound to exactly one [`Lock`].
///
/// A waiter hands in its guard, the lock is released while it waits and is
/// re-acquired before `wait` returns, whatever the outcome. Re-acquisition
/// ignores the lock's own interrupt so the caller always gets its guard back.
pub struct Condition<T> {
    mutex: Arc<Mutex<T>>,
    waiters: Waiters,
    flag: Arc<InterruptFlag>,
}

impl<T> Condition<T> {
    /// A standalone condition. Prefer
    /// [`Scope::new_condition`](super::Scope::new_condition).
    pub fn new(lock: &Lock<T>) -> Self {
        Self {
            mutex: lock.mutex().clone(),
            waiters: Waiters::default(),
            flag: InterruptFlag::new(),
        }
    }

    /// Release `guard`, wait for a wake, timeout or interrupt, then re-lock.
    ///
    /// `timeout: None` waits without a deadline.
    ///
    /// # Panics
    /// If `guard` does not belong to the lock this condition is bound to.
    pub async fn wait(
        &self,
        guard: LockGuard<T>,
        timeout: Option<Duration>,
    ) -> (LockGuard<T>, Wake) {
        assert!(
            Arc::ptr_eq(LockGuard::mutex(&guard), &self.mutex),
            "condition waited on with a guard of a foreign lock"
        );
        if self.flag.is_interrupted() {
            return (guard, Wake::Interrupted);
        }

        // Park before unlocking so a notify issued right after we let go is not lost.
        let rx = self.waiters.park();
        drop(guard);

        let wake = park_until(rx, &self.flag, timeout).await;
        let guard = self.mutex.clone().lock_owned().await;
        (guard, wake)
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
