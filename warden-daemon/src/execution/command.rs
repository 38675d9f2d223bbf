//! Building the OS command for one run attempt.

use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::access::ACCESS_PEM_ENV;
use crate::config::ServiceConfig;
use crate::errors::{Result, SupervisorError};

/// Environment variable carrying the service's own name.
pub const SERVICE_NAME_ENV: &str = "WARDEN_SERVICE_NAME";

/// Build the `Command` for `service`: working directory, environment,
/// identity switch, piped output and a fresh process group.
///
/// `credential` is exported as `WARDEN_ACCESS_PEM` when present.
pub(crate) fn build_command(service: &ServiceConfig, credential: Option<&str>) -> Result<Command> {
    let Some((program, args)) = service.command.split_first() else {
        return Err(SupervisorError::Config(format!(
            "Service {} has an empty command",
            service.name
        )));
    };

    let working_dir = match &service.directory {
        Some(dir) => dir.clone(),
        None => std::env::current_dir()?,
    };
    if !working_dir.is_dir() {
        return Err(SupervisorError::Config(format!(
            "Working directory '{}' of service {} does not exist",
            working_dir.display(),
            service.name
        )));
    }

    debug!("Spawning command for {}: {} {:?}", service.name, program, args);

    let mut cmd = Command::new(program);
    cmd.args(args)
        .current_dir(&working_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    // New process group so signals reach every descendant
    cmd.process_group(0);

    if !service.inherit_environment {
        cmd.env_clear();
    }
    cmd.envs(&service.environment);
    cmd.env(SERVICE_NAME_ENV, &service.name);
    if let Some(pem) = credential {
        cmd.env(ACCESS_PEM_ENV, pem);
    }

    if let Some(user) = &service.user {
        let resolved = crate::user::resolve_user(user)?;
        debug!(
            "Service {} will run as uid={}, gid={}",
            service.name, resolved.uid, resolved.gid
        );
        let groups = resolved.groups;
        // SAFETY: switch_identity only makes async-signal-safe calls and
        // every lookup already happened above.
        unsafe {
            cmd.pre_exec(move || {
                warden_unix::process::switch_identity(resolved.uid, resolved.gid, &groups)
            });
        }
    }

    Ok(cmd)
}

/// Forward every line of a child's output stream to tracing.
///
/// Runs until the stream closes, which may outlive the child itself when
/// descendants inherited the pipe.
pub(crate) fn spawn_capture_task(
    stream: Option<impl tokio::io::AsyncRead + Unpin + Send + 'static>,
    service_name: String,
    stream_name: &'static str,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Some(stream) = stream {
            let reader = BufReader::new(stream);
            let mut lines = reader.lines();
            while let Ok(Some(line)) = lines.next_line().await {
                info!(target: "service", "[{}:{}] {}", service_name, stream_name, line);
            }
        }
    })
}
