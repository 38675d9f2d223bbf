//! Restart policy applied after a service exits on its own.

use serde::{Deserialize, Serialize};

/// `autoRestart` setting of a service.
///
/// Only exits the service produced on its own are governed by this; stops,
/// kills and explicit restarts are handled by the orchestrator before the
/// policy is consulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RestartPolicy {
    /// Never restart, whatever the exit code.
    Never,
    /// Restart when the exit code is not one of the success codes.
    #[default]
    OnFailures,
    /// Restart after any exit, successful or not.
    Always,
}

impl RestartPolicy {
    pub fn restarts_on_failure(&self) -> bool {
        !matches!(self, RestartPolicy::Never)
    }

    pub fn restarts_on_success(&self) -> bool {
        matches!(self, RestartPolicy::Always)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RestartPolicy::Never => "never",
            RestartPolicy::OnFailures => "onFailures",
            RestartPolicy::Always => "always",
        }
    }
}
