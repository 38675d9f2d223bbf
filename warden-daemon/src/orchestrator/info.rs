use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::{RestartPolicy, ServiceConfig, ServiceKind};
use crate::execution::{Snapshot, Status};

/// Read-only view of a service for the control layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ServiceKind,
    pub command: Vec<String>,
    pub directory: Option<PathBuf>,
    pub user: Option<String>,
    pub auto_restart: RestartPolicy,
    pub cron_expression: Option<String>,
    pub status: Status,
    pub pid: Option<u32>,
    pub started_at: Option<DateTime<Utc>>,
    pub restart_pending: bool,
}

impl ServiceInfo {
    /// A service without a registered execution.
    pub fn down(service: &ServiceConfig) -> Self {
        Self {
            name: service.name.clone(),
            kind: service.kind,
            command: service.command.clone(),
            directory: service.directory.clone(),
            user: service.user.clone(),
            auto_restart: service.auto_restart,
            cron_expression: service
                .cron_expression
                .as_ref()
                .map(|c| c.expression().to_string()),
            status: Status::Down,
            pid: None,
            started_at: None,
            restart_pending: false,
        }
    }

    pub(crate) fn live(service: &ServiceConfig, snapshot: Snapshot, restart_pending: bool) -> Self {
        Self {
            status: snapshot.status,
            pid: snapshot.pid,
            started_at: snapshot.started_at,
            restart_pending,
            ..Self::down(service)
        }
    }
}
