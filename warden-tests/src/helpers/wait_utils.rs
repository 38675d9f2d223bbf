//! Async utilities to wait for state transitions

use std::time::Duration;

use tokio::time::{sleep, Instant};
use warden_daemon::execution::Status;
use warden_daemon::orchestrator::Orchestrator;

/// Error type for wait operations
#[derive(Debug)]
pub enum WaitError {
    Timeout,
}

impl std::fmt::Display for WaitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WaitError::Timeout => write!(f, "Wait operation timed out"),
        }
    }
}

impl std::error::Error for WaitError {}

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Wait for the registered execution of a service to reach `status`
pub async fn wait_for_status(
    orchestrator: &Orchestrator,
    service_name: &str,
    status: Status,
    timeout: Duration,
) -> Result<(), WaitError> {
    let start = Instant::now();

    while start.elapsed() < timeout {
        if let Some(execution) = orchestrator.get_for(service_name)
            && execution.status().await == status
        {
            return Ok(());
        }
        sleep(POLL_INTERVAL).await;
    }

    Err(WaitError::Timeout)
}

/// Wait for a service to reach the Running status
pub async fn wait_for_running(
    orchestrator: &Orchestrator,
    service_name: &str,
    timeout: Duration,
) -> Result<(), WaitError> {
    wait_for_status(orchestrator, service_name, Status::Running, timeout).await
}

/// Wait until no execution is registered for a service
pub async fn wait_for_unregistered(
    orchestrator: &Orchestrator,
    service_name: &str,
    timeout: Duration,
) -> Result<(), WaitError> {
    let start = Instant::now();

    while start.elapsed() < timeout {
        if orchestrator.get_for(service_name).is_none() {
            return Ok(());
        }
        sleep(POLL_INTERVAL).await;
    }

    Err(WaitError::Timeout)
}
