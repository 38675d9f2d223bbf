//! One run attempt of a service.
//!
//! An [`Execution`] owns the spawned process of a single attempt and its
//! status machine:
//!
//! ```text
//! Down --spawn--> Running --stop--> Stopped --timeout--> Killed
//!                    |                  |                   |
//!                    +------------------+-----exit----------+--> Down
//! ```
//!
//! A restart never reuses an execution; the orchestrator creates a new one.

mod command;

pub use command::SERVICE_NAME_ENV;

use std::os::unix::process::ExitStatusExt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use nix::errno::Errno;
use nix::sys::signal::Signal;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::access::ExecutionAccess;
use crate::config::ServiceConfig;
use crate::errors::{Result, SupervisorError};
use crate::sync::{Condition, Lock, Scope, SyncError, Wake};

/// How often `kill` re-sends SIGKILL while the process is still alive.
pub const KILL_RETRY_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Status {
    #[default]
    Down,
    Running,
    /// A graceful stop was requested; the process has not exited yet.
    Stopped,
    /// A kill was requested; the process has not exited yet.
    Killed,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Down => "down",
            Status::Running => "running",
            Status::Stopped => "stopped",
            Status::Killed => "killed",
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a run attempt did not end in success.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecutionError {
    /// Ended by an explicit stop or kill, or cancelled before it started.
    #[error("service {service} was stopped or killed")]
    StoppedOrKilled { service: String, code: Option<i32> },

    /// The process could not be spawned or waited on.
    #[error("service {service} failed: {message}")]
    Unrecoverable { service: String, message: String },

    #[error("service {service} exited with unexpected code {code}")]
    UnexpectedExit { service: String, code: i32 },
}

impl ExecutionError {
    /// Exit code of the process, when it ran at all.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            ExecutionError::StoppedOrKilled { code, .. } => *code,
            ExecutionError::Unrecoverable { .. } => None,
            ExecutionError::UnexpectedExit { code, .. } => Some(*code),
        }
    }
}

/// Point-in-time view of an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Snapshot {
    pub status: Status,
    pub pid: Option<u32>,
    pub started_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct ExecState {
    status: Status,
    pid: Option<u32>,
    started_at: Option<DateTime<Utc>>,
    credential_released: bool,
    /// A `stop` is waiting out `stopWait` for this process.
    escalating: bool,
}

/// One run attempt of a service.
pub struct Execution {
    service: Arc<ServiceConfig>,
    access: Box<dyn ExecutionAccess>,
    state: Lock<ExecState>,
    changed: Condition<ExecState>,
    /// Parks cron and start/restart delays; interrupted by stop/kill while Down.
    pending: crate::sync::Signal,
    stop_requested: AtomicBool,
    // Kept last: dropping it interrupts whatever is still registered.
    _scope: Scope,
}

impl Execution {
    /// Create a Down execution whose waits belong to a child of `parent`.
    pub fn new(
        service: Arc<ServiceConfig>,
        access: Box<dyn ExecutionAccess>,
        parent: &Scope,
    ) -> Self {
        let scope = parent.new_child("execution");
        let state = scope.new_lock(ExecState::default());
        let changed = scope.new_condition(&state);
        let pending = scope.new_signal();
        Self {
            service,
            access,
            state,
            changed,
            pending,
            stop_requested: AtomicBool::new(false),
            _scope: scope,
        }
    }

    pub fn service(&self) -> &Arc<ServiceConfig> {
        &self.service
    }

    /// Whether `stop`, `kill` or the stop signal was ever requested.
    pub fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    pub async fn snapshot(&self) -> Snapshot {
        match self.state.lock().await {
            Ok(state) => Snapshot {
                status: state.status,
                pid: state.pid,
                started_at: state.started_at,
            },
            Err(_) => Snapshot::default(),
        }
    }

    pub async fn status(&self) -> Status {
        self.snapshot().await.status
    }

    pub async fn pid(&self) -> Option<u32> {
        self.snapshot().await.pid
    }

    /// Interruptible delay before this attempt starts.
    ///
    /// Fails with [`SyncError::Interrupted`] when the execution was stopped or
    /// killed before it ever ran, or the supervisor was interrupted.
    pub async fn sleep(&self, duration: Duration) -> std::result::Result<(), SyncError> {
        if duration.is_zero() {
            return if self.pending.is_interrupted() {
                Err(SyncError::Interrupted)
            } else {
                Ok(())
            };
        }
        self.pending.sleep(duration).await
    }

    /// Run the attempt to completion.
    ///
    /// Waits for the next cron instant first when the service has a schedule.
    pub async fn run(&self) -> std::result::Result<(), ExecutionError> {
        let name = &self.service.name;

        if let Some(schedule) = &self.service.cron_expression {
            let now = Utc::now();
            let Some(next) = schedule.next_after(&now) else {
                return Err(self.unrecoverable(format!(
                    "cron expression '{}' has no upcoming occurrence",
                    schedule.expression()
                )));
            };
            let delay = (next - now).to_std().unwrap_or_default();
            info!("Service {} scheduled to start at {}", name, next);
            if self.pending.sleep(delay).await.is_err() {
                return Err(self.stopped_or_killed(None));
            }
        }

        let mut state = self
            .state
            .lock()
            .await
            .map_err(|e| self.unrecoverable(e.to_string()))?;
        if self.pending.is_interrupted() || state.status != Status::Down {
            return Err(self.stopped_or_killed(None));
        }

        let credential = self.access.credential_pem();
        let mut child = command::build_command(&self.service, credential.as_deref())
            .and_then(|mut cmd| cmd.spawn().map_err(SupervisorError::from))
            .map_err(|e| self.unrecoverable(e.to_string()))?;

        let pid = child.id();
        state.pid = pid;
        state.started_at = Some(Utc::now());
        self.transition(&mut state, Status::Running);
        drop(state);
        info!("Service {} started (pid {:?})", name, pid);

        command::spawn_capture_task(child.stdout.take(), name.clone(), "stdout");
        command::spawn_capture_task(child.stderr.take(), name.clone(), "stderr");

        let waited = child.wait().await;

        let previous = match self.state.lock().await {
            Ok(mut state) => {
                let previous = state.status;
                state.pid = None;
                self.transition(&mut state, Status::Down);
                previous
            }
            Err(e) => return Err(self.unrecoverable(e.to_string())),
        };

        let exit_status = waited.map_err(|e| self.unrecoverable(e.to_string()))?;
        let code = exit_code(exit_status);
        debug!("Service {} exited with code {} while {}", name, code, previous);

        match previous {
            Status::Stopped | Status::Killed => Err(self.stopped_or_killed(Some(code))),
            _ if self.service.is_success(code) => Ok(()),
            _ => Err(ExecutionError::UnexpectedExit {
                service: name.clone(),
                code,
            }),
        }
    }

    /// Gracefully stop the process, escalating to [`kill`](Self::kill) after `stopWait`.
    ///
    /// On a Down execution this only cancels a pending start. When the stop
    /// signal was already delivered through [`signal`](Self::signal), only the
    /// wait and the escalation are left to do.
    pub async fn stop(&self) -> Result<()> {
        self.stop_requested.store(true, Ordering::SeqCst);
        let mut state = self.state.lock().await?;

        match state.status {
            Status::Down => {
                self.pending.interrupt();
                return Ok(());
            }
            Status::Killed => return Ok(()),
            Status::Stopped if state.escalating => return Ok(()),
            Status::Stopped => {}
            Status::Running => {
                self.transition(&mut state, Status::Stopped);
                if let Some(pid) = state.pid {
                    debug!(
                        "Sending {} to service {}",
                        self.service.stop_signal, self.service.name
                    );
                    self.deliver(pid, self.service.stop_signal)?;
                }
            }
        }
        state.escalating = true;

        let deadline = Instant::now() + self.service.stop_wait;
        loop {
            if state.status == Status::Down {
                return Ok(());
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            let (guard, wake) = self.changed.wait(state, Some(remaining)).await;
            state = guard;
            if wake == Wake::Interrupted && state.status != Status::Down {
                state.escalating = false;
                return Err(SyncError::Interrupted.into());
            }
        }
        drop(state);

        warn!(
            "Service {} did not stop within {:?}, killing",
            self.service.name, self.service.stop_wait
        );
        self.kill().await
    }

    /// Kill the process, re-sending SIGKILL every second until it is gone.
    ///
    /// On a Down execution this only cancels a pending start.
    pub async fn kill(&self) -> Result<()> {
        self.stop_requested.store(true, Ordering::SeqCst);
        let mut state = self.state.lock().await?;

        if state.status == Status::Down {
            self.pending.interrupt();
            return Ok(());
        }

        self.transition(&mut state, Status::Killed);
        loop {
            if state.status == Status::Down {
                return Ok(());
            }
            if let Some(pid) = state.pid {
                self.deliver(pid, Signal::SIGKILL)?;
            }
            let (guard, wake) = self.changed.wait(state, Some(KILL_RETRY_INTERVAL)).await;
            state = guard;
            if wake == Wake::Interrupted && state.status != Status::Down {
                return Err(SyncError::Interrupted.into());
            }
        }
    }

    /// Deliver `signal` to the running process.
    ///
    /// The stop signal and SIGKILL also record the matching status, but
    /// neither waits nor escalates.
    pub async fn signal(&self, signal: Signal) -> Result<()> {
        let mut state = self.state.lock().await?;
        let pid = match (state.status, state.pid) {
            (Status::Down, _) | (_, None) => {
                return Err(SupervisorError::NotRunning(self.service.name.clone()));
            }
            (_, Some(pid)) => pid,
        };

        if signal == Signal::SIGKILL {
            self.stop_requested.store(true, Ordering::SeqCst);
            self.transition(&mut state, Status::Killed);
        } else if signal == self.service.stop_signal {
            self.stop_requested.store(true, Ordering::SeqCst);
            self.transition(&mut state, Status::Stopped);
        }

        self.deliver(pid, signal)
    }

    /// Apply a status change, honouring the ordering rules.
    ///
    /// Down always wins. Stopped and Killed never go back to Running, and
    /// Killed is not downgraded to Stopped. Every applied change is broadcast.
    /// The first change away from Down releases the staged credential.
    fn transition(&self, state: &mut ExecState, to: Status) {
        let from = state.status;
        let allowed = match (from, to) {
            (_, Status::Down) => from != Status::Down,
            (Status::Down, Status::Running) => true,
            (Status::Running, Status::Stopped | Status::Killed) => true,
            (Status::Stopped, Status::Killed) => true,
            _ => false,
        };
        if !allowed {
            return;
        }

        state.status = to;
        if from == Status::Down && !state.credential_released {
            state.credential_released = true;
            self.access.cleanup();
        }
        debug!("Service {}: {} -> {}", self.service.name, from, to);
        self.changed.broadcast();
    }

    /// Send to the process group; a group that is already gone is not an error.
    fn deliver(&self, pid: u32, signal: Signal) -> Result<()> {
        match warden_unix::signals::send_to_group(pid, signal) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(source) => Err(SupervisorError::Signal {
                service: self.service.name.clone(),
                pid,
                signal,
                source,
            }),
        }
    }

    fn stopped_or_killed(&self, code: Option<i32>) -> ExecutionError {
        ExecutionError::StoppedOrKilled {
            service: self.service.name.clone(),
            code,
        }
    }

    fn unrecoverable(&self, message: String) -> ExecutionError {
        ExecutionError::Unrecoverable {
            service: self.service.name.clone(),
            message,
        }
    }
}

/// Exit code of a child, with `128 + signal` for signal deaths.
fn exit_code(status: std::process::ExitStatus) -> i32 {
    status
        .code()
        .or_else(|| status.signal().map(|s| 128 + s))
        .unwrap_or(-1)
}

#[cfg(test)]
mod tests;
