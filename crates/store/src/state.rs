// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The materialized record maps behind [`crate::AppStore`].

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use ph_core::{
    AppId, AppStatus, Application, AuditEntry, Backup, BackupId, DeployLogEntry, HostId, JobId,
    ProxmoxHost, ProxmoxNode, Setting,
};

/// Durable job bookkeeping so a crash surfaces the failure instead of
/// losing it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: JobId,
    pub application_id: AppId,
    pub kind: String,
    pub attempt: u32,
    pub next_retry_at_ms: Option<u64>,
    pub last_error: Option<String>,
}

/// Every record map, serialized wholesale into snapshots.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct StoreState {
    pub hosts: BTreeMap<HostId, ProxmoxHost>,
    /// Cached node rows per host, keyed by node name within.
    pub nodes: BTreeMap<HostId, BTreeMap<String, ProxmoxNode>>,
    pub apps: BTreeMap<AppId, Application>,
    pub backups: BTreeMap<BackupId, Backup>,
    pub deploy_logs: HashMap<AppId, Vec<DeployLogEntry>>,
    pub audit: Vec<AuditEntry>,
    pub settings: BTreeMap<String, Setting>,
    pub jobs: BTreeMap<JobId, JobRecord>,
}

impl StoreState {
    pub fn hostname_taken(&self, hostname: &str) -> bool {
        self.apps.values().any(|a| a.hostname == hostname)
    }

    pub fn vmid_owner(&self, vmid: u32) -> Option<&Application> {
        self.apps.values().find(|a| a.vmid == Some(vmid))
    }

    pub fn used_public_ports(&self) -> Vec<u16> {
        self.apps.values().filter_map(|a| a.public_port).collect()
    }

    pub fn used_internal_ports(&self) -> Vec<u16> {
        self.apps.values().filter_map(|a| a.internal_port).collect()
    }

    pub fn host_referenced(&self, host_id: HostId) -> bool {
        self.apps.values().any(|a| a.host_id == host_id)
    }
}

/// Listing filter for the façade.
#[derive(Debug, Clone, Default)]
pub struct AppFilter {
    pub host_id: Option<HostId>,
    pub status: Option<AppStatus>,
    /// Substring match against hostname, name and catalog id.
    pub query: Option<String>,
}

impl AppFilter {
    pub fn matches(&self, app: &Application) -> bool {
        if let Some(host_id) = self.host_id {
            if app.host_id != host_id {
                return false;
            }
        }
        if let Some(status) = self.status {
            if app.status != status {
                return false;
            }
        }
        if let Some(q) = &self.query {
            let q = q.to_lowercase();
            let hit = app.hostname.to_lowercase().contains(&q)
                || app.name.to_lowercase().contains(&q)
                || app.catalog_id.to_lowercase().contains(&q);
            if !hit {
                return false;
            }
        }
        true
    }
}

/// Offset pagination for the façade.
#[derive(Debug, Clone, Copy)]
pub struct Page {
    pub offset: usize,
    pub limit: usize,
}

impl Default for Page {
    fn default() -> Self {
        Self { offset: 0, limit: 50 }
    }
}
