//! Multi-service scheduling.
//!
//! The [`Orchestrator`] keeps at most one live [`Execution`] per service. Each
//! started service gets its own drive loop task that runs the execution,
//! consults [`policy::decide`] and either replaces the execution with a fresh
//! one or unregisters the service. The master service's exit is captured and
//! cascades a stop to every other service.
//!
//! All shared state sits behind one read/write lock that is never held across
//! an `.await`.

mod info;
pub mod policy;

pub use info::ServiceInfo;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use nix::sys::signal::Signal;
use parking_lot::RwLock;
use tracing::{debug, error, info, warn};

use crate::access::AccessProvider;
use crate::config::{ServiceConfig, SupervisorConfig};
use crate::errors::{Result, SupervisorError};
use crate::execution::{Execution, ExecutionError};
use crate::sync::{Scope, WaitGroup};
use policy::{Decision, ExitKind, PolicyInput};

/// How a run attempt, and so the master service, ended.
pub type Outcome = std::result::Result<(), ExecutionError>;

/// Supervisor exit code for a master outcome.
pub fn exit_code_of(outcome: &Outcome) -> i32 {
    match outcome {
        Ok(()) => 0,
        Err(e) => e.exit_code().unwrap_or(crate::MASTER_FAILURE_EXIT_CODE),
    }
}

struct ServiceEntry {
    config: Arc<ServiceConfig>,
    scope: Scope,
}

#[derive(Default)]
struct State {
    executions: HashMap<String, Arc<Execution>>,
    restart_requests: HashSet<String>,
    master_exit: Option<Outcome>,
    stopping: bool,
}

impl State {
    /// Drop `execution` from the registry if it is still the live one.
    ///
    /// Returns whether a restart was requested after its drive loop had
    /// already decided to finish. The service must then be started again.
    fn unregister(&mut self, name: &str, execution: &Arc<Execution>) -> bool {
        let live = self
            .executions
            .get(name)
            .is_some_and(|current| Arc::ptr_eq(current, execution));
        if !live {
            return false;
        }
        self.executions.remove(name);
        self.restart_requests.remove(name) && !self.stopping
    }
}

struct Inner {
    services: BTreeMap<String, ServiceEntry>,
    provider: Arc<dyn AccessProvider>,
    state: RwLock<State>,
    in_flight: WaitGroup,
    scope: Scope,
}

impl Inner {
    fn entry(&self, name: &str) -> Result<&ServiceEntry> {
        self.services
            .get(name)
            .ok_or_else(|| SupervisorError::ServiceNotFound(name.to_string()))
    }

    fn new_execution(&self, entry: &ServiceEntry) -> Result<Execution> {
        let access = self.provider.new_execution(&entry.config)?;
        Ok(Execution::new(entry.config.clone(), access, &entry.scope))
    }
}

/// Top-level scheduler of a fixed set of services.
///
/// Cloning yields another handle to the same orchestrator.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    pub fn new(config: &SupervisorConfig, provider: Arc<dyn AccessProvider>) -> Self {
        let scope = Scope::root("warden");
        let services = config
            .services
            .iter()
            .map(|(name, service)| {
                let entry = ServiceEntry {
                    config: Arc::new(service.clone()),
                    scope: scope.new_child(name.as_str()),
                };
                (name.clone(), entry)
            })
            .collect();

        Self {
            inner: Arc::new(Inner {
                services,
                provider,
                state: RwLock::new(State::default()),
                in_flight: WaitGroup::new(),
                scope,
            }),
        }
    }

    /// Start every autoStart and master service, then wait for all drive loops.
    ///
    /// Returns the master's outcome, or success when there is none. Fails
    /// only when a service could not be started at all, after stopping the
    /// ones that were.
    pub async fn run(&self) -> Result<Outcome> {
        let autostart: Vec<String> = self
            .inner
            .services
            .values()
            .filter(|e| e.config.kind.starts_automatically())
            .map(|e| e.config.name.clone())
            .collect();

        for name in &autostart {
            if let Err(e) = self.start(name) {
                error!("Failed to start service {}: {}", name, e);
                self.stop_all().await;
                return Err(e);
            }
        }

        self.inner.in_flight.wait().await;

        let outcome = self.inner.state.read().master_exit.clone();
        Ok(outcome.unwrap_or(Ok(())))
    }

    /// Register a new execution for `name` and launch its drive loop.
    pub fn start(&self, name: &str) -> Result<()> {
        let entry = self.inner.entry(name)?;
        let execution = {
            let mut state = self.inner.state.write();
            if state.stopping {
                return Err(SupervisorError::ShuttingDown(name.to_string()));
            }
            if state.executions.contains_key(name) {
                return Err(SupervisorError::ServiceAlreadyRunning(name.to_string()));
            }
            let execution = Arc::new(self.inner.new_execution(entry)?);
            state.executions.insert(name.to_string(), execution.clone());
            self.inner.in_flight.add(1);
            execution
        };

        info!("Starting service {}", name);
        tokio::spawn(drive(self.inner.clone(), entry.config.clone(), execution));
        Ok(())
    }

    /// Restart `name`: start it when down, otherwise stop the current
    /// execution and let the drive loop start a new one right away.
    pub fn restart(&self, name: &str) -> Result<()> {
        self.inner.entry(name)?;
        let current = {
            let mut state = self.inner.state.write();
            if state.stopping {
                return Err(SupervisorError::ShuttingDown(name.to_string()));
            }
            let current = state.executions.get(name).cloned();
            if current.is_some() {
                state.restart_requests.insert(name.to_string());
            }
            current
        };

        match current {
            None => self.start(name),
            Some(execution) => {
                info!("Restarting service {}", name);
                tokio::spawn(async move {
                    if let Err(e) = execution.stop().await {
                        warn!("Failed to stop {} for restart: {}", execution.service().name, e);
                    }
                });
                Ok(())
            }
        }
    }

    pub async fn stop(&self, name: &str) -> Result<()> {
        self.registered(name)?.stop().await
    }

    pub async fn kill(&self, name: &str) -> Result<()> {
        self.registered(name)?.kill().await
    }

    pub async fn signal(&self, name: &str, signal: Signal) -> Result<()> {
        self.registered(name)?.signal(signal).await
    }

    /// Stop every service and wait until all drive loops have ended.
    ///
    /// No service can be started or restarted afterwards.
    pub async fn stop_all(&self) {
        let executions: Vec<Arc<Execution>> = {
            let mut state = self.inner.state.write();
            state.stopping = true;
            state.restart_requests.clear();
            state.executions.values().cloned().collect()
        };

        info!("Stopping {} service(s)", executions.len());
        let results = join_all(executions.iter().map(|e| e.stop())).await;
        for (execution, result) in executions.iter().zip(results) {
            if let Err(e) = result {
                warn!("Failed to stop service {}: {}", execution.service().name, e);
            }
        }

        self.inner.in_flight.wait().await;
        debug!("All services are down");
    }

    /// The live execution of `name`, if one is registered.
    pub fn get_for(&self, name: &str) -> Option<Arc<Execution>> {
        self.inner.state.read().executions.get(name).cloned()
    }

    pub async fn information(&self) -> BTreeMap<String, ServiceInfo> {
        let mut info = BTreeMap::new();
        for name in self.inner.services.keys() {
            if let Ok(service) = self.information_for(name).await {
                info.insert(name.clone(), service);
            }
        }
        info
    }

    pub async fn information_for(&self, name: &str) -> Result<ServiceInfo> {
        let entry = self.inner.entry(name)?;
        let (execution, restart_pending) = {
            let state = self.inner.state.read();
            (
                state.executions.get(name).cloned(),
                state.restart_requests.contains(name),
            )
        };
        Ok(match execution {
            Some(execution) => {
                ServiceInfo::live(&entry.config, execution.snapshot().await, restart_pending)
            }
            None => ServiceInfo::down(&entry.config),
        })
    }

    /// The master's outcome, once it has exited.
    pub fn master_exit(&self) -> Option<Outcome> {
        self.inner.state.read().master_exit.clone()
    }

    /// Number of drive loops still running.
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.count()
    }

    /// Abort every pending wait of every service.
    ///
    /// Delays and stop waits return at once and status locks close. Running
    /// processes are not signalled; use [`stop_all`](Self::stop_all) for an
    /// orderly shutdown.
    pub fn interrupt(&self) {
        warn!("Interrupting all supervision waits");
        self.inner.state.write().stopping = true;
        self.inner.scope.interrupt();
    }

    fn registered(&self, name: &str) -> Result<Arc<Execution>> {
        self.inner.entry(name)?;
        self.get_for(name)
            .ok_or_else(|| SupervisorError::ServiceDown(name.to_string()))
    }
}

/// Drive loop of one service: run, decide, replace, repeat.
async fn drive(inner: Arc<Inner>, service: Arc<ServiceConfig>, mut execution: Arc<Execution>) {
    let name = service.name.clone();
    let mut first = true;
    let mut skip_delay = false;

    let outcome = loop {
        let delay = if skip_delay {
            Duration::ZERO
        } else if first {
            service.start_delay
        } else {
            service.restart_delay
        };
        if !delay.is_zero() {
            debug!("Service {} starts in {:?}", name, delay);
        }

        let result = match execution.sleep(delay).await {
            Ok(()) => execution.run().await,
            Err(_) => Err(ExecutionError::StoppedOrKilled {
                service: name.clone(),
                code: None,
            }),
        };
        log_outcome(&name, &result);

        let decision = {
            let mut state = inner.state.write();
            let restart_requested = state.restart_requests.remove(&name);
            policy::decide(&PolicyInput {
                exit: ExitKind::of(&result),
                has_cron: service.has_cron(),
                policy: service.auto_restart,
                master_exited: state.master_exit.is_some(),
                stopping: state.stopping,
                restart_requested,
            })
        };
        debug!("Service {}: {:?}", name, decision);
        if decision == Decision::Finish {
            break result;
        }

        let Some(entry) = inner.services.get(&name) else {
            break result;
        };
        let next = match inner.new_execution(entry) {
            Ok(next) => Arc::new(next),
            Err(e) => {
                error!("Cannot restart service {}: {}", name, e);
                break result;
            }
        };

        let replaced = {
            let mut state = inner.state.write();
            // a stop that reached the old execution after it ended must not be lost
            let stop_pending = decision == Decision::RestartDelayed && execution.stop_requested();
            if state.stopping || stop_pending {
                false
            } else {
                state.executions.insert(name.clone(), next.clone());
                true
            }
        };
        if !replaced {
            break result;
        }

        execution = next;
        first = false;
        skip_delay = decision == Decision::RestartNow;
    };

    let (cascade, restart_late) = {
        let mut state = inner.state.write();
        let restart_late = state.unregister(&name, &execution) && !service.is_master();
        let cascade: Vec<Arc<Execution>> = if service.is_master() {
            if state.master_exit.is_none() {
                state.master_exit = Some(outcome.clone());
            }
            state.stopping = true;
            state.executions.values().cloned().collect()
        } else {
            Vec::new()
        };
        (cascade, restart_late)
    };

    if service.is_master() {
        info!(
            "Master service {} exited (code {}), stopping {} other service(s)",
            name,
            exit_code_of(&outcome),
            cascade.len()
        );
    }
    for other in cascade {
        tokio::spawn(async move {
            if let Err(e) = other.stop().await {
                warn!("Failed to stop service {}: {}", other.service().name, e);
            }
        });
    }

    // release the access grant before anyone waiting on us resumes
    drop(execution);
    debug!("Drive loop of {} finished", name);
    if restart_late {
        let orchestrator = Orchestrator {
            inner: inner.clone(),
        };
        if let Err(e) = orchestrator.start(&name) {
            warn!("Failed to restart service {}: {}", name, e);
        }
    }
    inner.in_flight.done();
}

fn log_outcome(name: &str, result: &Outcome) {
    match result {
        Ok(()) => info!("Service {} exited successfully", name),
        Err(e @ ExecutionError::StoppedOrKilled { .. }) => info!("{}", e),
        Err(e @ ExecutionError::UnexpectedExit { .. }) => warn!("{}", e),
        Err(e @ ExecutionError::Unrecoverable { .. }) => error!("{}", e),
    }
}
