//! Supervisor harness: an orchestrator over a test config with a key store

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use warden_daemon::access::KeyStore;
use warden_daemon::config::SupervisorConfig;
use warden_daemon::errors::Result;
use warden_daemon::orchestrator::{Orchestrator, Outcome};

/// An orchestrator wired to its own key store
pub struct TestSupervisor {
    pub orchestrator: Orchestrator,
    pub key_store: KeyStore,
}

impl TestSupervisor {
    pub fn new(config: &SupervisorConfig) -> Self {
        let key_store = KeyStore::new();
        let orchestrator = Orchestrator::new(config, Arc::new(key_store.clone()));
        Self {
            orchestrator,
            key_store,
        }
    }

    /// Run the orchestrator on a background task
    pub fn spawn_run(&self) -> JoinHandle<Result<Outcome>> {
        let orchestrator = self.orchestrator.clone();
        tokio::spawn(async move { orchestrator.run().await })
    }

    /// Await a background run, failing the test if it takes longer than `timeout`
    ///
    /// # Panics
    /// On timeout, task panic or a start failure.
    pub async fn join_run(handle: JoinHandle<Result<Outcome>>, timeout: Duration) -> Outcome {
        tokio::time::timeout(timeout, handle)
            .await
            .expect("supervisor run timed out")
            .expect("supervisor run task panicked")
            .expect("supervisor failed to start its services")
    }

    /// Stop everything, failing the test if shutdown hangs
    pub async fn shutdown(&self, timeout: Duration) {
        tokio::time::timeout(timeout, self.orchestrator.stop_all())
            .await
            .expect("stop_all timed out");
    }
}
