//! Hierarchical cancellation scope.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use super::{Condition, Interruptible, Lock, Signal};

/// A registered child and the number of times it was registered.
struct Registration {
    target: Weak<dyn Interruptible>,
    refs: usize,
}

struct ScopeInner {
    name: String,
    interrupted: AtomicBool,
    children: parking_lot::Mutex<HashMap<usize, Registration>>,
}

impl ScopeInner {
    fn interrupt_once(&self) {
        if self.interrupted.swap(true, Ordering::SeqCst) {
            return;
        }
        let children: Vec<Registration> = {
            let mut children = self.children.lock();
            children.drain().map(|(_, r)| r).collect()
        };
        tracing::trace!("Interrupting scope {} ({} children)", self.name, children.len());
        for child in children {
            if let Some(target) = child.target.upgrade() {
                target.interrupt();
            }
        }
    }
}

impl Interruptible for ScopeInner {
    fn interrupt(&self) {
        self.interrupt_once();
    }

    fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }
}

impl Drop for ScopeInner {
    fn drop(&mut self) {
        // The owner let go; nothing may stay blocked on our primitives.
        self.interrupt_once();
    }
}

/// A node in the tree of interruptible primitives.
///
/// Cloning a `Scope` yields another handle to the same node. Parents hold
/// their children weakly, so a child scope or primitive is freed as soon as
/// its owner drops it; when the last handle to a scope goes away the scope
/// interrupts whatever is still registered with it.
///
/// Registering onto a scope that was already interrupted interrupts the new
/// child immediately.
#[derive(Clone)]
pub struct Scope {
    inner: Arc<ScopeInner>,
}

impl std::fmt::Debug for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scope")
            .field("name", &self.inner.name)
            .field("interrupted", &self.is_interrupted())
            .finish()
    }
}

fn key_of(target: &Arc<dyn Interruptible>) -> usize {
    Arc::as_ptr(target) as *const () as usize
}

impl Scope {
    /// Create a root scope.
    pub fn root(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(ScopeInner {
                name: name.into(),
                interrupted: AtomicBool::new(false),
                children: parking_lot::Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Create a child scope that is interrupted together with this one.
    pub fn new_child(&self, name: impl Into<String>) -> Scope {
        let child = Scope::root(format!("{}/{}", self.inner.name, name.into()));
        let target: Arc<dyn Interruptible> = child.inner.clone();
        self.register(&target);
        child
    }

    /// Create a lock guarding `value`, interrupted with this scope.
    pub fn new_lock<T>(&self, value: T) -> Lock<T> {
        let lock = Lock::new(value);
        self.register(&lock.interruptible());
        lock
    }

    /// Create a condition bound to `lock`, interrupted with this scope.
    pub fn new_condition<T>(&self, lock: &Lock<T>) -> Condition<T> {
        let condition = Condition::new(lock);
        self.register(&condition.interruptible());
        condition
    }

    /// Create a signal, interrupted with this scope.
    pub fn new_signal(&self) -> Signal {
        let signal = Signal::new();
        self.register(&signal.interruptible());
        signal
    }

    /// Register an interruptible child.
    ///
    /// Registering the same child again only bumps its reference count, so it
    /// is still interrupted once.
    pub fn register(&self, target: &Arc<dyn Interruptible>) {
        if self.is_interrupted() {
            target.interrupt();
            return;
        }
        {
            let mut children = self.inner.children.lock();
            // re-check under the lock: interrupt_once drains while holding it
            if !self.is_interrupted() {
                children.retain(|_, r| r.target.strong_count() > 0);
                children
                    .entry(key_of(target))
                    .and_modify(|r| r.refs += 1)
                    .or_insert_with(|| Registration {
                        target: Arc::downgrade(target),
                        refs: 1,
                    });
                return;
            }
        }
        target.interrupt();
    }

    /// Drop one registration of `target`; it is forgotten once its count reaches zero.
    pub fn release(&self, target: &Arc<dyn Interruptible>) {
        let mut children = self.inner.children.lock();
        let key = key_of(target);
        if let Some(registration) = children.get_mut(&key) {
            registration.refs -= 1;
            if registration.refs == 0 {
                children.remove(&key);
            }
        }
    }

    /// Live registrations (children still alive), summed over reference counts.
    #[cfg(test)]
    pub(crate) fn registrations(&self) -> usize {
        self.inner
            .children
            .lock()
            .values()
            .filter(|r| r.target.strong_count() > 0)
            .map(|r| r.refs)
            .sum()
    }

    /// Interrupt this scope and all its descendants. Idempotent.
    pub fn interrupt(&self) {
        self.inner.interrupt_once();
    }

    pub fn is_interrupted(&self) -> bool {
        self.inner.is_interrupted()
    }

    /// This scope as a registrable child of another scope.
    pub fn interruptible(&self) -> Arc<dyn Interruptible> {
        self.inner.clone()
    }
}
