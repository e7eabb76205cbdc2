// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The application store.
//!
//! One `RwLock` over [`StoreState`] makes every method a transaction:
//! uniqueness checks and the writes they guard happen under the same
//! lock. Row-level isolation for mutating jobs comes from
//! [`AppStore::lock_row`], an async mutex per application id the job
//! runner and janitor hold across their read-modify-write spans.

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;

use ph_core::{
    AppId, AppStatus, Application, AuditEntry, Backup, BackupId, Clock, DeployLogEntry, Error,
    HostId, JobId, LogLevel, ProxmoxHost, ProxmoxNode, Result, Setting,
};

use crate::state::{AppFilter, JobRecord, Page, StoreState};

pub struct AppStore<C: Clock> {
    state: RwLock<StoreState>,
    row_locks: Mutex<HashMap<AppId, Arc<tokio::sync::Mutex<()>>>>,
    clock: C,
}

impl<C: Clock> AppStore<C> {
    pub fn new(clock: C) -> Self {
        Self {
            state: RwLock::new(StoreState::default()),
            row_locks: Mutex::new(HashMap::new()),
            clock,
        }
    }

    pub fn from_state(state: StoreState, clock: C) -> Self {
        Self { state: RwLock::new(state), row_locks: Mutex::new(HashMap::new()), clock }
    }

    /// Clone of the full state, for snapshots and tests.
    pub fn state(&self) -> StoreState {
        self.state.read().clone()
    }

    fn now(&self) -> u64 {
        self.clock.epoch_ms()
    }

    // ---- row locks -------------------------------------------------

    /// Acquire the row lock for an application. Mutating jobs hold
    /// this for their whole read-modify-write span; the reconciler
    /// never takes it.
    pub async fn lock_row(&self, id: AppId) -> tokio::sync::OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.row_locks.lock();
            locks.entry(id).or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))).clone()
        };
        lock.lock_owned().await
    }

    // ---- hosts and nodes -------------------------------------------

    pub fn upsert_host(&self, host: ProxmoxHost) -> Result<()> {
        let mut state = self.state.write();
        if host.default {
            for other in state.hosts.values_mut() {
                other.default = false;
            }
        }
        state.hosts.insert(host.id, host);
        Ok(())
    }

    pub fn get_host(&self, id: HostId) -> Result<ProxmoxHost> {
        self.state
            .read()
            .hosts
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::not_found("host", id.as_str()))
    }

    pub fn default_host(&self) -> Option<ProxmoxHost> {
        let state = self.state.read();
        state
            .hosts
            .values()
            .find(|h| h.default && h.active)
            .or_else(|| state.hosts.values().find(|h| h.active))
            .cloned()
    }

    pub fn list_hosts(&self) -> Vec<ProxmoxHost> {
        self.state.read().hosts.values().cloned().collect()
    }

    /// Refuses while applications still reference the host.
    pub fn delete_host(&self, id: HostId) -> Result<()> {
        let mut state = self.state.write();
        if state.host_referenced(id) {
            return Err(Error::conflict("host", format!("{id} still has applications")));
        }
        state.hosts.remove(&id).ok_or_else(|| Error::not_found("host", id.as_str()))?;
        state.nodes.remove(&id);
        Ok(())
    }

    /// Replace the cached node rows of one host.
    pub fn refresh_nodes(&self, host_id: HostId, nodes: Vec<ProxmoxNode>) {
        let mut state = self.state.write();
        let entry = state.nodes.entry(host_id).or_default();
        entry.clear();
        for node in nodes {
            entry.insert(node.name.clone(), node);
        }
    }

    pub fn nodes_of(&self, host_id: HostId) -> Vec<ProxmoxNode> {
        self.state
            .read()
            .nodes
            .get(&host_id)
            .map(|nodes| nodes.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn get_node(&self, host_id: HostId, name: &str) -> Option<ProxmoxNode> {
        self.state.read().nodes.get(&host_id).and_then(|nodes| nodes.get(name)).cloned()
    }

    // ---- applications ----------------------------------------------

    /// Insert a new application row. The status must be one of the
    /// creation states and the hostname must be free.
    pub fn create_application(&self, mut app: Application) -> Result<Application> {
        let now = self.now();
        let mut state = self.state.write();
        if !app.status.is_initial() {
            return Err(Error::DatabaseError(format!(
                "applications cannot be created in state {}",
                app.status
            )));
        }
        if state.hostname_taken(&app.hostname) {
            return Err(Error::conflict("hostname", app.hostname.clone()));
        }
        if let Some(vmid) = app.vmid {
            if state.vmid_owner(vmid).is_some() {
                return Err(Error::conflict("vmid", vmid.to_string()));
            }
        }
        app.created_at_ms = now;
        app.updated_at_ms = now;
        app.state_changed_at_ms = now;
        state.apps.insert(app.id, app.clone());
        Ok(app)
    }

    pub fn get_app(&self, id: AppId) -> Result<Application> {
        self.state
            .read()
            .apps
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::not_found("application", id.as_str()))
    }

    pub fn find_by_hostname(&self, hostname: &str) -> Option<Application> {
        self.state.read().apps.values().find(|a| a.hostname == hostname).cloned()
    }

    pub fn hostname_taken(&self, hostname: &str) -> bool {
        self.state.read().hostname_taken(hostname)
    }

    pub fn list_apps(&self, filter: &AppFilter, page: Page) -> (Vec<Application>, usize) {
        let state = self.state.read();
        let matched: Vec<&Application> =
            state.apps.values().filter(|a| filter.matches(a)).collect();
        let total = matched.len();
        let items = matched
            .into_iter()
            .skip(page.offset)
            .take(page.limit)
            .cloned()
            .collect();
        (items, total)
    }

    pub fn all_apps(&self) -> Vec<Application> {
        self.state.read().apps.values().cloned().collect()
    }

    /// Applications on a host that have acquired a VMID.
    pub fn apps_with_vmid(&self, host_id: HostId) -> Vec<Application> {
        self.state
            .read()
            .apps
            .values()
            .filter(|a| a.host_id == host_id && a.vmid.is_some())
            .cloned()
            .collect()
    }

    /// The single legal way to write `status`. Verifies the caller's
    /// expected `from` still holds (re-read inside the transaction),
    /// consults the transition table, and stamps `state_changed_at`.
    pub fn transition(&self, id: AppId, from: AppStatus, to: AppStatus) -> Result<Application> {
        let now = self.now();
        let mut state = self.state.write();
        let app = state
            .apps
            .get_mut(&id)
            .ok_or_else(|| Error::not_found("application", id.as_str()))?;
        if app.status != from {
            return Err(Error::state_invalid(app.status, format!("transition to {to}")));
        }
        if !from.can_transition(to) {
            return Err(Error::state_invalid(from, format!("transition to {to}")));
        }
        app.status = to;
        app.state_changed_at_ms = now;
        app.updated_at_ms = now;
        tracing::debug!(app_id = %id, %from, %to, "status transition");
        Ok(app.clone())
    }

    /// Atomic field update. Status writes are rejected here so they
    /// cannot bypass [`Self::transition`].
    pub fn update_app(
        &self,
        id: AppId,
        mutate: impl FnOnce(&mut Application),
    ) -> Result<Application> {
        let now = self.now();
        let mut state = self.state.write();
        let app = state
            .apps
            .get_mut(&id)
            .ok_or_else(|| Error::not_found("application", id.as_str()))?;
        let status_before = app.status;
        mutate(app);
        if app.status != status_before {
            app.status = status_before;
            return Err(Error::DatabaseError(
                "status writes must go through transition()".into(),
            ));
        }
        app.updated_at_ms = now;
        Ok(app.clone())
    }

    /// Allocate the smallest free port in each range and persist both
    /// on the row, all in one transaction.
    pub fn allocate_ports(
        &self,
        id: AppId,
        public_range: (u16, u16),
        internal_range: (u16, u16),
    ) -> Result<(u16, u16)> {
        let now = self.now();
        let mut state = self.state.write();
        if state.apps.get(&id).is_none() {
            return Err(Error::not_found("application", id.as_str()));
        }

        let public = smallest_free(public_range, &state.used_public_ports())
            .ok_or(Error::PortsExhausted { range: "public" })?;
        let internal = smallest_free(internal_range, &state.used_internal_ports())
            .ok_or(Error::PortsExhausted { range: "internal" })?;

        // checked above; the map cannot have changed under the write lock
        if let Some(app) = state.apps.get_mut(&id) {
            app.public_port = Some(public);
            app.internal_port = Some(internal);
            app.updated_at_ms = now;
        }
        Ok((public, internal))
    }

    pub fn release_ports(&self, id: AppId) -> Result<()> {
        self.update_app(id, |app| {
            app.public_port = None;
            app.internal_port = None;
        })?;
        Ok(())
    }

    /// Claim a VMID for an application, enforcing global uniqueness.
    pub fn set_vmid(&self, id: AppId, vmid: u32) -> Result<()> {
        let now = self.now();
        let mut state = self.state.write();
        if let Some(owner) = state.vmid_owner(vmid) {
            if owner.id != id {
                return Err(Error::conflict("vmid", vmid.to_string()));
            }
        }
        let app = state
            .apps
            .get_mut(&id)
            .ok_or_else(|| Error::not_found("application", id.as_str()))?;
        app.vmid = Some(vmid);
        app.updated_at_ms = now;
        Ok(())
    }

    pub fn clear_vmid(&self, id: AppId) -> Result<()> {
        self.update_app(id, |app| app.vmid = None)?;
        Ok(())
    }

    pub fn vmid_owner(&self, vmid: u32) -> Option<Application> {
        self.state.read().vmid_owner(vmid).cloned()
    }

    /// Delete the row and everything it owns: deployment logs,
    /// backups, the job record, the row lock entry.
    pub fn delete_application(&self, id: AppId) -> Result<()> {
        let mut state = self.state.write();
        state
            .apps
            .remove(&id)
            .ok_or_else(|| Error::not_found("application", id.as_str()))?;
        state.deploy_logs.remove(&id);
        state.backups.retain(|_, b| b.application_id != id);
        state.jobs.retain(|_, j| j.application_id != id);
        drop(state);
        self.row_locks.lock().remove(&id);
        Ok(())
    }

    /// Transitional rows whose last status change is older than the
    /// cutoff — the janitor's input.
    pub fn stale_transitional(&self, cutoff_ms: u64) -> Vec<Application> {
        self.state
            .read()
            .apps
            .values()
            .filter(|a| a.status.is_transitional() && a.state_changed_at_ms < cutoff_ms)
            .cloned()
            .collect()
    }

    // ---- deployment log --------------------------------------------

    pub fn log_deploy(&self, id: AppId, level: LogLevel, step: &str, message: impl Into<String>) {
        let entry = DeployLogEntry {
            application_id: id,
            timestamp_ms: self.now(),
            level,
            step: step.to_string(),
            message: message.into(),
        };
        self.state.write().deploy_logs.entry(id).or_default().push(entry);
    }

    pub fn deploy_logs(&self, id: AppId) -> Vec<DeployLogEntry> {
        self.state.read().deploy_logs.get(&id).cloned().unwrap_or_default()
    }

    // ---- backups ---------------------------------------------------

    pub fn insert_backup(&self, backup: Backup) -> Backup {
        self.state.write().backups.insert(backup.id, backup.clone());
        backup
    }

    pub fn get_backup(&self, id: BackupId) -> Result<Backup> {
        self.state
            .read()
            .backups
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::not_found("backup", id.as_str()))
    }

    pub fn update_backup(
        &self,
        id: BackupId,
        mutate: impl FnOnce(&mut Backup),
    ) -> Result<Backup> {
        let mut state = self.state.write();
        let backup = state
            .backups
            .get_mut(&id)
            .ok_or_else(|| Error::not_found("backup", id.as_str()))?;
        mutate(backup);
        Ok(backup.clone())
    }

    pub fn backups_of(&self, id: AppId) -> Vec<Backup> {
        self.state
            .read()
            .backups
            .values()
            .filter(|b| b.application_id == id)
            .cloned()
            .collect()
    }

    // ---- audit -----------------------------------------------------

    pub fn audit(&self, entry: AuditEntry) {
        self.state.write().audit.push(entry);
    }

    pub fn audit_entries(&self) -> Vec<AuditEntry> {
        self.state.read().audit.clone()
    }

    // ---- settings --------------------------------------------------

    pub fn set_setting(&self, setting: Setting) {
        self.state.write().settings.insert(setting.key.clone(), setting);
    }

    pub fn get_setting(&self, key: &str) -> Option<Setting> {
        self.state.read().settings.get(key).cloned()
    }

    // ---- job records -----------------------------------------------

    pub fn upsert_job(&self, record: JobRecord) {
        self.state.write().jobs.insert(record.job_id, record);
    }

    pub fn job_for_app(&self, id: AppId) -> Option<JobRecord> {
        self.state.read().jobs.values().find(|j| j.application_id == id).cloned()
    }

    pub fn remove_job(&self, job_id: JobId) {
        self.state.write().jobs.remove(&job_id);
    }
}

/// Smallest integer in `[lo, hi]` not present in `used`.
fn smallest_free(range: (u16, u16), used: &[u16]) -> Option<u16> {
    let (lo, hi) = range;
    (lo..=hi).find(|p| !used.contains(p))
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
