use tokio::sync::watch;

/// Counter of in-flight work that can be awaited down to zero.
pub struct WaitGroup {
    count: watch::Sender<usize>,
}

impl Default for WaitGroup {
    fn default() -> Self {
        Self::new()
    }
}

impl WaitGroup {
    pub fn new() -> Self {
        let (count, _) = watch::channel(0);
        Self { count }
    }

    pub fn add(&self, n: usize) {
        self.count.send_modify(|c| *c += n);
    }

    /// Mark one unit of work as finished.
    pub fn done(&self) {
        self.count.send_modify(|c| {
            debug_assert!(*c > 0, "WaitGroup::done without matching add");
            *c = c.saturating_sub(1);
        });
    }

    pub fn count(&self) -> usize {
        *self.count.borrow()
    }

    /// Wait until the count drops to zero. Returns at once if it already is.
    pub async fn wait(&self) {
        let mut rx = self.count.subscribe();
        // the sender lives in `self`, so the channel cannot close while we wait
        let _ = rx.wait_for(|c| *c == 0).await;
    }
}
