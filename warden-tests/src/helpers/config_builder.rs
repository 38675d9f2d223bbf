//! Programmatic config creation with builder pattern

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use nix::sys::signal::Signal;
use warden_daemon::config::{
    AccessMode, CronSchedule, RestartPolicy, ServiceConfig, ServiceKind, SupervisorConfig,
};

/// Builder for creating test configurations
#[derive(Default)]
pub struct TestConfigBuilder {
    services: BTreeMap<String, ServiceConfig>,
}

impl TestConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_service(mut self, name: &str, mut service: ServiceConfig) -> Self {
        service.name = name.to_string();
        self.services.insert(name.to_string(), service);
        self
    }

    pub fn build(self) -> SupervisorConfig {
        SupervisorConfig {
            services: self.services,
        }
    }

    /// Write the config to a YAML file and return the path
    pub fn write_to_file(&self, dir: &Path) -> std::io::Result<PathBuf> {
        let config = SupervisorConfig {
            services: self.services.clone(),
        };

        let path = dir.join("warden.yaml");
        let contents = serde_yaml::to_string(&config).map_err(std::io::Error::other)?;
        std::fs::write(&path, contents)?;
        Ok(path)
    }
}

/// Builder for creating test service configurations
///
/// Defaults are tuned for tests: short restart delay and stop wait.
pub struct TestServiceBuilder {
    service: ServiceConfig,
}

impl TestServiceBuilder {
    pub fn new(command: Vec<String>) -> Self {
        let mut service = ServiceConfig::new("", command);
        service.restart_delay = Duration::from_millis(100);
        service.stop_wait = Duration::from_secs(2);
        Self { service }
    }

    /// Run `script` with `sh -c`
    pub fn shell(script: impl Into<String>) -> Self {
        Self::new(vec!["sh".to_string(), "-c".to_string(), script.into()])
    }

    /// Create a long-running service using 'sleep'
    pub fn long_running() -> Self {
        Self::new(vec!["sleep".to_string(), "3600".to_string()])
    }

    /// Create a service that exits with a specific code
    pub fn exit_with_code(code: i32) -> Self {
        Self::shell(format!("exit {}", code))
    }

    /// A service that ignores SIGTERM and touches `ready` once the trap is set
    pub fn ignoring_term(ready: &Path) -> Self {
        Self::shell(format!(
            "trap '' TERM; touch {}; while true; do sleep 0.1; done",
            ready.display()
        ))
    }

    pub fn with_kind(mut self, kind: ServiceKind) -> Self {
        self.service.kind = kind;
        self
    }

    pub fn master(self) -> Self {
        self.with_kind(ServiceKind::Master)
    }

    pub fn auto_start(self) -> Self {
        self.with_kind(ServiceKind::AutoStart)
    }

    pub fn with_restart(mut self, policy: RestartPolicy) -> Self {
        self.service.auto_restart = policy;
        self
    }

    pub fn with_start_delay(mut self, delay: Duration) -> Self {
        self.service.start_delay = delay;
        self
    }

    pub fn with_restart_delay(mut self, delay: Duration) -> Self {
        self.service.restart_delay = delay;
        self
    }

    pub fn with_stop_wait(mut self, wait: Duration) -> Self {
        self.service.stop_wait = wait;
        self
    }

    pub fn with_stop_signal(mut self, signal: Signal) -> Self {
        self.service.stop_signal = signal;
        self
    }

    pub fn with_success_exit_codes(mut self, codes: Vec<i32>) -> Self {
        self.service.success_exit_codes = codes;
        self
    }

    /// # Panics
    /// If `expression` is not a valid cron expression.
    pub fn with_cron(mut self, expression: &str) -> Self {
        self.service.cron_expression =
            Some(CronSchedule::parse(expression).expect("invalid cron expression in test"));
        self
    }

    pub fn with_env(mut self, key: &str, value: &str) -> Self {
        self.service
            .environment
            .insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_directory(mut self, dir: PathBuf) -> Self {
        self.service.directory = Some(dir);
        self
    }

    pub fn with_access(mut self, access: AccessMode) -> Self {
        self.service.access = access;
        self
    }

    pub fn build(self) -> ServiceConfig {
        self.service
    }
}
