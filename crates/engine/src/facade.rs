// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The narrow outward contract consumed by the HTTP layer.
//!
//! Synchronous validation, then a row write, then a job — in that
//! order. The deploy job is enqueued only after the creating write has
//! committed, so a worker can never observe a row its creator has not
//! finished writing. Live cluster metrics are fetched in batches per
//! `(host, node)` to avoid N+1 calls.

use std::collections::HashMap;
use std::sync::Arc;

use ph_core::{
    validate_hostname, AdoptIntent, AppId, AppStatus, Application, AuditEntry, BackupId,
    BackupKind, BackupStatus, Clock, DeployIntent, Error, HostId, JobId, Result,
};
use ph_pve::{LxcInfo, PveGateway};
use ph_store::{AppFilter, Page};

use crate::appliance::APPLIANCE_VMID;
use crate::ctx::EngineDeps;
use crate::runner::{JobKind, JobRunner};

/// Actions accepted by [`Facade::perform_action`].
#[derive(Debug, Clone)]
pub enum Action {
    Start,
    Stop,
    Restart,
    Update,
    Delete,
    Clone { new_hostname: String },
    Backup,
    Restore { backup_id: BackupId },
}

impl Action {
    fn name(&self) -> &'static str {
        match self {
            Action::Start => "start",
            Action::Stop => "stop",
            Action::Restart => "restart",
            Action::Update => "update",
            Action::Delete => "delete",
            Action::Clone { .. } => "clone",
            Action::Backup => "backup",
            Action::Restore { .. } => "restore",
        }
    }
}

/// `202 Accepted` payload: which row and which job.
#[derive(Debug, Clone)]
pub struct Accepted {
    pub application_id: AppId,
    pub job_id: JobId,
}

#[derive(Debug, Clone)]
pub struct LiveMetrics {
    pub status: String,
    pub cpu: f64,
    pub mem: u64,
    pub uptime: u64,
}

#[derive(Debug, Clone)]
pub struct AppWithMetrics {
    pub app: Application,
    pub live: Option<LiveMetrics>,
}

#[derive(Debug, Clone)]
pub struct AppDetail {
    pub app: Application,
    /// Container status as the cluster reports it right now.
    pub live_status: Option<String>,
}

#[derive(Debug, Clone)]
pub struct UnmanagedContainer {
    pub vmid: u32,
    pub node: String,
    pub name: Option<String>,
    pub status: String,
}

pub struct Facade<C: Clock> {
    deps: Arc<EngineDeps<C>>,
    runner: Arc<JobRunner<C>>,
}

impl<C: Clock> Facade<C> {
    pub fn new(deps: Arc<EngineDeps<C>>, runner: Arc<JobRunner<C>>) -> Self {
        Self { deps, runner }
    }

    pub fn runner(&self) -> &JobRunner<C> {
        &self.runner
    }

    // ---- reads -----------------------------------------------------

    /// List with live metrics, one cluster call per `(host, node)`.
    pub async fn list_applications(
        &self,
        filter: &AppFilter,
        page: Page,
    ) -> Result<(Vec<AppWithMetrics>, usize)> {
        let (apps, total) = self.deps.store.list_apps(filter, page);

        // batch the metric lookups
        let mut batches: HashMap<(HostId, String), Vec<usize>> = HashMap::new();
        for (idx, app) in apps.iter().enumerate() {
            if let (Some(node), Some(_)) = (&app.node_name, app.vmid) {
                batches.entry((app.host_id, node.clone())).or_default().push(idx);
            }
        }

        let mut live: HashMap<usize, LiveMetrics> = HashMap::new();
        for ((host_id, node), indices) in batches {
            let Ok(host) = self.deps.store.get_host(host_id) else { continue };
            let Ok(gateway) = self.deps.gateway(&host) else { continue };
            let Ok(containers) = gateway.list_lxc(&node).await else { continue };
            let by_vmid: HashMap<u32, &LxcInfo> =
                containers.iter().map(|c| (c.vmid, c)).collect();
            for idx in indices {
                if let Some(vmid) = apps[idx].vmid {
                    if let Some(info) = by_vmid.get(&vmid) {
                        live.insert(
                            idx,
                            LiveMetrics {
                                status: info.status.clone(),
                                cpu: info.cpu.unwrap_or(0.0),
                                mem: info.mem.unwrap_or(0),
                                uptime: info.uptime.unwrap_or(0),
                            },
                        );
                    }
                }
            }
        }

        let items = apps
            .into_iter()
            .enumerate()
            .map(|(idx, app)| AppWithMetrics { app, live: live.remove(&idx) })
            .collect();
        Ok((items, total))
    }

    /// Detail view with the container's live status refreshed.
    pub async fn get_application(&self, id: AppId) -> Result<AppDetail> {
        let app = self.deps.store.get_app(id)?;
        let live_status = match (app.vmid, &app.node_name) {
            (Some(vmid), Some(node)) => {
                let host = self.deps.app_host(&app)?;
                let gateway = self.deps.gateway(&host)?;
                gateway.lxc_status(node, vmid).await.ok().map(|info| info.status)
            }
            _ => None,
        };
        Ok(AppDetail { app, live_status })
    }

    /// Containers on the cluster that no application row claims.
    pub async fn discover_unmanaged_containers(
        &self,
        host_id: Option<HostId>,
    ) -> Result<Vec<UnmanagedContainer>> {
        let mut found = Vec::new();
        for host in self.deps.store.list_hosts() {
            if !host.active || host_id.is_some_and(|id| id != host.id) {
                continue;
            }
            let gateway = self.deps.gateway(&host)?;
            for node in gateway.list_nodes().await? {
                if !node.is_online() {
                    continue;
                }
                for container in gateway.list_lxc(&node.node).await? {
                    if container.vmid == APPLIANCE_VMID {
                        continue;
                    }
                    if self.deps.store.vmid_owner(container.vmid).is_none() {
                        found.push(UnmanagedContainer {
                            vmid: container.vmid,
                            node: node.node.clone(),
                            name: container.name,
                            status: container.status,
                        });
                    }
                }
            }
        }
        Ok(found)
    }

    // ---- writes ----------------------------------------------------

    /// Validate, create the row in `deploying`, then enqueue — the job
    /// is submitted strictly after the creating write returns.
    pub fn deploy_application(&self, intent: DeployIntent) -> Result<Application> {
        validate_hostname(&intent.hostname)?;
        if self.deps.store.hostname_taken(&intent.hostname) {
            return Err(Error::conflict("hostname", intent.hostname.clone()));
        }
        let entry = self
            .deps
            .catalog
            .get(&intent.catalog_id)
            .ok_or_else(|| Error::not_found("catalog entry", intent.catalog_id.clone()))?;
        let host = self
            .deps
            .store
            .default_host()
            .ok_or_else(|| Error::not_found("host", "no active host configured"))?;

        // target node must be online; unset means "pick for me", which
        // needs at least one online node with known memory numbers
        let nodes = self.deps.store.nodes_of(host.id);
        match &intent.node {
            Some(node) => {
                let known = nodes.iter().find(|n| &n.name == node);
                match known {
                    Some(n) if n.is_online() => {}
                    Some(n) => {
                        return Err(Error::not_found(
                            "online node",
                            format!("{} is {}", node, n.status),
                        ))
                    }
                    None => return Err(Error::not_found("node", node.clone())),
                }
            }
            None => {
                if !nodes.iter().any(|n| n.is_online() && n.memory_total > 0) {
                    return Err(Error::not_found("online node", host.display_name.clone()));
                }
            }
        }

        let app = Application {
            id: AppId::new(),
            catalog_id: entry.id.clone(),
            name: entry.name.clone(),
            hostname: intent.hostname.clone(),
            status: AppStatus::Deploying,
            urls: None,
            public_port: None,
            internal_port: None,
            vmid: None,
            host_id: host.id,
            node_name: intent.node.clone(),
            root_password: None,
            config: intent.config,
            environment: intent.environment,
            ports: Vec::new(),
            volumes: Vec::new(),
            owner_id: intent.owner_id.clone(),
            created_at_ms: 0,
            updated_at_ms: 0,
            state_changed_at_ms: 0,
        };
        let app = self.deps.store.create_application(app)?;

        // enqueue only now, after the commit above
        self.runner.submit(app.id, JobKind::Deploy)?;
        self.audit(&intent.owner_id, "deploy", app.id, None);
        tracing::info!(app_id = %app.id, hostname = %app.hostname, "deploy accepted");
        Ok(app)
    }

    /// Validate an action against the current status and enqueue it.
    pub fn perform_action(&self, id: AppId, action: Action) -> Result<Accepted> {
        let app = self.deps.store.get_app(id)?;

        let (target, kind) = match &action {
            Action::Start => {
                self.require_status(&app, &[AppStatus::Stopped], "start")?;
                (id, JobKind::Start)
            }
            Action::Stop => {
                self.require_status(&app, &[AppStatus::Running], "stop")?;
                (id, JobKind::Stop)
            }
            Action::Restart => {
                self.require_status(&app, &[AppStatus::Running], "restart")?;
                (id, JobKind::Restart)
            }
            Action::Update => {
                self.require_status(&app, &[AppStatus::Running], "update")?;
                (id, JobKind::Update)
            }
            Action::Delete => {
                if app.status.is_transitional() {
                    return Err(Error::state_invalid(app.status, "delete"));
                }
                (id, JobKind::Delete)
            }
            Action::Backup => {
                self.require_status(&app, &[AppStatus::Running, AppStatus::Stopped], "backup")?;
                (id, JobKind::Backup { kind: BackupKind::Manual })
            }
            Action::Restore { backup_id } => {
                self.require_status(
                    &app,
                    &[AppStatus::UpdateFailed, AppStatus::Running, AppStatus::Stopped],
                    "restore",
                )?;
                let backup = self.deps.store.get_backup(*backup_id)?;
                if backup.application_id != id {
                    return Err(Error::not_found("backup", backup_id.as_str()));
                }
                if backup.status != BackupStatus::Available {
                    return Err(Error::state_invalid(app.status, "restore from unavailable backup"));
                }
                (id, JobKind::Restore { backup_id: *backup_id })
            }
            Action::Clone { new_hostname } => {
                self.require_status(&app, &[AppStatus::Running, AppStatus::Stopped], "clone")?;
                validate_hostname(new_hostname)?;
                if self.deps.store.hostname_taken(new_hostname) {
                    return Err(Error::conflict("hostname", new_hostname.clone()));
                }
                let shell = Application {
                    id: AppId::new(),
                    catalog_id: app.catalog_id.clone(),
                    name: format!("{} (clone)", app.name),
                    hostname: new_hostname.clone(),
                    status: AppStatus::Cloning,
                    urls: None,
                    public_port: None,
                    internal_port: None,
                    vmid: None,
                    host_id: app.host_id,
                    node_name: None,
                    root_password: app.root_password.clone(),
                    config: app.config.clone(),
                    environment: app.environment.clone(),
                    ports: app.ports.clone(),
                    volumes: Vec::new(),
                    owner_id: app.owner_id.clone(),
                    created_at_ms: 0,
                    updated_at_ms: 0,
                    state_changed_at_ms: 0,
                };
                let shell = self.deps.store.create_application(shell)?;
                (shell.id, JobKind::Clone { source: id })
            }
        };

        let job_id = self.runner.submit(target, kind)?;
        self.audit(&app.owner_id, action.name(), target, None);
        tracing::info!(app_id = %target, action = action.name(), %job_id, "action accepted");
        Ok(Accepted { application_id: target, job_id })
    }

    /// Import an existing container as a managed application.
    pub fn adopt_container(&self, intent: AdoptIntent) -> Result<Application> {
        if !self.deps.catalog.contains(&intent.catalog_id) {
            return Err(Error::not_found("catalog entry", intent.catalog_id.clone()));
        }
        if self.deps.store.vmid_owner(intent.vmid).is_some() {
            return Err(Error::conflict("vmid", intent.vmid.to_string()));
        }
        let hostname = intent
            .hostname
            .clone()
            .unwrap_or_else(|| format!("adopted-{}", intent.vmid));
        validate_hostname(&hostname)?;
        if self.deps.store.hostname_taken(&hostname) {
            return Err(Error::conflict("hostname", hostname.clone()));
        }
        let host = self
            .deps
            .store
            .default_host()
            .ok_or_else(|| Error::not_found("host", "no active host configured"))?;

        let mut config = std::collections::BTreeMap::new();
        config.insert("adopted".to_string(), serde_json::json!(true));

        let app = Application {
            id: AppId::new(),
            catalog_id: intent.catalog_id.clone(),
            name: hostname.clone(),
            hostname,
            status: AppStatus::Adopting,
            urls: None,
            public_port: None,
            internal_port: None,
            vmid: Some(intent.vmid),
            host_id: host.id,
            node_name: Some(intent.node_name.clone()),
            root_password: None,
            config,
            environment: std::collections::BTreeMap::new(),
            ports: vec![intent.container_port],
            volumes: Vec::new(),
            owner_id: intent.owner_id.clone(),
            created_at_ms: 0,
            updated_at_ms: 0,
            state_changed_at_ms: 0,
        };
        let app = self.deps.store.create_application(app)?;
        self.runner.submit(app.id, JobKind::Adopt)?;
        self.audit(&intent.owner_id, "adopt", app.id, Some(serde_json::json!({ "vmid": intent.vmid })));
        Ok(app)
    }

    fn require_status(
        &self,
        app: &Application,
        allowed: &[AppStatus],
        action: &str,
    ) -> Result<()> {
        if allowed.contains(&app.status) {
            Ok(())
        } else {
            Err(Error::state_invalid(app.status, action))
        }
    }

    fn audit(
        &self,
        actor: &Option<String>,
        action: &str,
        id: AppId,
        details: Option<serde_json::Value>,
    ) {
        self.deps.store.audit(AuditEntry {
            actor: actor.clone().unwrap_or_else(|| "system".into()),
            action: action.to_string(),
            resource_kind: "application".into(),
            resource_id: id.as_str().to_string(),
            details,
            client_ip: None,
            timestamp_ms: self.deps.clock.epoch_ms(),
        });
    }
}

#[cfg(test)]
#[path = "facade_tests.rs"]
mod tests;
