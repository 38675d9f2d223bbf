//! Restart decision taken after every run attempt.

use crate::config::RestartPolicy;
use crate::execution::ExecutionError;

/// Classification of how a run attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitKind {
    /// Exit code in the service's success set.
    Success,
    /// Any other exit code.
    Failure,
    StoppedOrKilled,
    /// The process could not be spawned or waited on.
    Unrecoverable,
}

impl ExitKind {
    pub fn of(result: &Result<(), ExecutionError>) -> Self {
        match result {
            Ok(()) => ExitKind::Success,
            Err(ExecutionError::UnexpectedExit { .. }) => ExitKind::Failure,
            Err(ExecutionError::StoppedOrKilled { .. }) => ExitKind::StoppedOrKilled,
            Err(ExecutionError::Unrecoverable { .. }) => ExitKind::Unrecoverable,
        }
    }
}

/// Everything the decision depends on.
#[derive(Debug, Clone, Copy)]
pub struct PolicyInput {
    pub exit: ExitKind,
    pub has_cron: bool,
    pub policy: RestartPolicy,
    pub master_exited: bool,
    /// `StopAll` was called or the master cascade began.
    pub stopping: bool,
    /// An explicit `Restart` is pending for this service.
    pub restart_requested: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The drive loop ends.
    Finish,
    /// Start a new attempt without any delay.
    RestartNow,
    /// Start a new attempt after the restart delay.
    RestartDelayed,
}

pub fn decide(input: &PolicyInput) -> Decision {
    if input.stopping {
        return Decision::Finish;
    }
    if input.restart_requested && !input.master_exited {
        return Decision::RestartNow;
    }

    let restart = match input.exit {
        ExitKind::StoppedOrKilled => false,
        ExitKind::Unrecoverable => input.has_cron && !input.master_exited,
        ExitKind::Success => {
            (input.has_cron || input.policy.restarts_on_success()) && !input.master_exited
        }
        ExitKind::Failure => input.policy.restarts_on_failure(),
    };

    if restart {
        Decision::RestartDelayed
    } else {
        Decision::Finish
    }
}

#[cfg(test)]
mod tests;
