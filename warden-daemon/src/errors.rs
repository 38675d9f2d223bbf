use std::path::PathBuf;
use thiserror::Error;

use crate::sync::SyncError;

/// Format a YAML error for user-friendly display, including the field path
fn format_yaml_error(e: &serde_path_to_error::Error<serde_yaml::Error>) -> String {
    let path = e.path().to_string();
    let inner = e.inner();
    let msg = inner.to_string();

    let located = if let Some(loc) = inner.location() {
        format!("Line {}, Column {}: {}", loc.line(), loc.column(), msg)
    } else {
        msg
    };

    if path.is_empty() || path == "." {
        located
    } else {
        format!("{}: {}", path, located)
    }
}

#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("Service {0} is down")]
    ServiceDown(String),

    #[error("Service {0} is already running")]
    ServiceAlreadyRunning(String),

    #[error("Service not found: {0}")]
    ServiceNotFound(String),

    #[error("Service {0} has no running process")]
    NotRunning(String),

    #[error("Supervisor is shutting down; {0} will not be started")]
    ShuttingDown(String),

    #[error("Failed to send {signal} to service {service} (pid {pid}): {source}")]
    Signal {
        service: String,
        pid: u32,
        signal: nix::sys::signal::Signal,
        #[source]
        source: nix::errno::Errno,
    },

    #[error("Synchronization failure: {0}")]
    Sync(#[from] SyncError),

    #[error("Access setup failed for service {service}: {message}")]
    Access { service: String, message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to parse config file '{path}':\n  {}", format_yaml_error(.source))]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_path_to_error::Error<serde_yaml::Error>,
    },

    #[error("Config file not found: {0}")]
    ConfigNotFound(PathBuf),

    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("Group not found: {0}")]
    GroupNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SupervisorError>;
