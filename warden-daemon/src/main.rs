use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use warden_daemon::access::KeyStore;
use warden_daemon::config::SupervisorConfig;
use warden_daemon::orchestrator::{exit_code_of, Orchestrator};

/// Warden - process supervisor
#[derive(Parser)]
#[command(name = "warden", about = "Supervise a fixed set of services around a master process")]
struct Args {
    /// Services config file
    #[arg(short, long, value_name = "FILE")]
    config: PathBuf,

    /// Log level used when RUST_LOG does not say otherwise
    #[arg(long, value_name = "LEVEL", default_value = "info")]
    log_level: tracing::Level,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(args.log_level.into())
                .from_env_lossy(),
        )
        .init();

    let config = SupervisorConfig::load(&args.config)
        .with_context(|| format!("Cannot load {}", args.config.display()))?;
    warn_if_root(&config);

    let orchestrator = Orchestrator::new(&config, Arc::new(KeyStore::new()));
    spawn_shutdown_handler(orchestrator.clone())?;

    info!(
        "Starting warden with {} service(s) from {}",
        config.services.len(),
        args.config.display()
    );
    let outcome = orchestrator.run().await?;

    let code = exit_code_of(&outcome);
    info!("Master finished, exiting with code {}", code);
    std::process::exit(code);
}

/// Stop every service on SIGTERM or SIGINT.
fn spawn_shutdown_handler(orchestrator: Orchestrator) -> std::io::Result<()> {
    let mut terminate = signal(SignalKind::terminate())?;
    let mut interrupt = signal(SignalKind::interrupt())?;

    tokio::spawn(async move {
        tokio::select! {
            _ = terminate.recv() => info!("Received SIGTERM, stopping all services"),
            _ = interrupt.recv() => info!("Received SIGINT, stopping all services"),
        }
        orchestrator.stop_all().await;
    });
    Ok(())
}

fn warn_if_root(config: &SupervisorConfig) {
    // SAFETY: getuid() is always safe to call
    if unsafe { libc::getuid() } != 0 {
        return;
    }
    for service in config.services.values().filter(|s| s.user.is_none()) {
        warn!(
            "Service {} has no user set and will run as root",
            service.name
        );
    }
}
