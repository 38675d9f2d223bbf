//! Cancellable synchronization primitives.
//!
//! Every wait that has to be abortable on shutdown goes through one of these:
//! - [`Lock`]: mutual exclusion that can be permanently closed;
//! - [`Condition`]: wait/notify bound to one [`Lock`];
//! - [`Signal`]: a lock-free timed rendezvous, the basis of interruptible sleeps;
//! - [`Scope`]: a node in a tree of the above. Interrupting a scope interrupts
//!   every descendant exactly once;
//! - [`WaitGroup`]: counter of in-flight work that can be awaited down to zero.
//!
//! ## Post-interrupt contract
//! Interruption is one-way and idempotent. After it:
//! - [`Lock::lock`] fails with [`SyncError::Closed`] instead of blocking;
//! - [`Condition::wait`] and [`Signal::wait`] return [`Wake::Interrupted`]
//!   immediately (a condition waiter still gets its guard back);
//! - [`Signal::sleep`] fails with [`SyncError::Interrupted`].

mod condition;
mod lock;
mod scope;
mod signal;
mod wait_group;

pub use condition::Condition;
pub use lock::{Lock, LockGuard};
pub use scope::Scope;
pub use signal::Signal;
pub use wait_group::WaitGroup;

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

/// Failures of the cancellable primitives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    #[error("lock was closed by an interrupt")]
    Closed,

    #[error("wait was interrupted")]
    Interrupted,
}

/// How a wait on a [`Condition`] or [`Signal`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    /// Woken by `send` or `broadcast`.
    Notified,
    TimedOut,
    Interrupted,
}

/// Anything a [`Scope`] can interrupt.
pub trait Interruptible: Send + Sync {
    /// Interrupt this node. Must be idempotent.
    fn interrupt(&self);

    fn is_interrupted(&self) -> bool;
}

/// Shared interrupt state of a single primitive.
#[derive(Debug, Default)]
pub(crate) struct InterruptFlag {
    token: CancellationToken,
}

impl InterruptFlag {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) async fn interrupted(&self) {
        self.token.cancelled().await
    }
}

impl Interruptible for InterruptFlag {
    fn interrupt(&self) {
        self.token.cancel();
    }

    fn is_interrupted(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// FIFO of parked waiters.
///
/// Each waiter parks a oneshot sender. A waiter that gave up (timeout or
/// interrupt) drops its receiver, so a later `wake_one` skips it and moves on
/// to the next live waiter. Wakes never queue up for future waiters.
#[derive(Debug, Default)]
pub(crate) struct Waiters {
    queue: parking_lot::Mutex<VecDeque<oneshot::Sender<()>>>,
}

impl Waiters {
    pub(crate) fn park(&self) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        self.queue.lock().push_back(tx);
        rx
    }

    /// Wake the longest-waiting live waiter, if any. Returns whether one was woken.
    pub(crate) fn wake_one(&self) -> bool {
        let mut queue = self.queue.lock();
        while let Some(tx) = queue.pop_front() {
            if tx.send(()).is_ok() {
                return true;
            }
        }
        false
    }

    /// Wake every currently parked waiter. Returns how many were woken.
    pub(crate) fn wake_all(&self) -> usize {
        let parked: Vec<_> = self.queue.lock().drain(..).collect();
        parked
            .into_iter()
            .map(|tx| tx.send(()))
            .filter(Result::is_ok)
            .count()
    }
}

/// Wait on a parked receiver until woken, timed out or interrupted.
pub(crate) async fn park_until(
    rx: oneshot::Receiver<()>,
    flag: &InterruptFlag,
    timeout: Option<Duration>,
) -> Wake {
    let deadline = async {
        match timeout {
            Some(d) => tokio::time::sleep(d).await,
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        biased;
        _ = flag.interrupted() => Wake::Interrupted,
        woken = rx => match woken {
            Ok(()) => Wake::Notified,
            // the primitive was dropped under us
            Err(_) => Wake::Interrupted,
        },
        _ = deadline => Wake::TimedOut,
    }
}
