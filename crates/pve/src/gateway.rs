// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The typed REST surface of one PVE cluster entry point.
//!
//! A [`PveGateway`] is bound to a single host; the engine resolves one
//! per application through [`crate::pool::TransportFactory`]. Every
//! long-running operation returns a task UPID to be awaited with
//! [`crate::task::wait_for_task`].

use async_trait::async_trait;
use std::collections::BTreeMap;

use ph_core::Result;

use crate::types::{BackupVolume, LxcInfo, NodeInfo, NodeStatusInfo, StorageInfo, TaskStatus};

/// Parameters for creating an LXC container.
///
/// The gateway itself imposes the privileged-container features the
/// in-LXC runtime requires (`nesting=1,keyctl=1`, `unprivileged=0`);
/// callers only describe the workload.
#[derive(Debug, Clone)]
pub struct LxcSpec {
    pub vmid: u32,
    pub hostname: String,
    /// Template volid, e.g. `local:vztmpl/alpine-3.22-default_amd64.tar.xz`.
    pub ostemplate: String,
    pub storage: String,
    pub disk_gb: u32,
    pub memory_mb: u32,
    pub cores: u32,
    pub password: String,
    /// Bridge for `net0`; DHCP addressing.
    pub bridge: String,
    /// Start immediately after creation. Deploys keep this off so the
    /// config can be patched first.
    pub start: bool,
}

impl LxcSpec {
    /// The `net0` value: DHCP on the chosen bridge.
    pub fn net0(&self) -> String {
        format!("name=eth0,bridge={},ip=dhcp", self.bridge)
    }

    /// The `rootfs` value: `<storage>:<size_gb>`.
    pub fn rootfs(&self) -> String {
        format!("{}:{}", self.storage, self.disk_gb)
    }
}

/// Typed, stateless client over one cluster's REST API.
#[async_trait]
pub trait PveGateway: Send + Sync {
    async fn ping(&self) -> Result<()>;

    async fn list_nodes(&self) -> Result<Vec<NodeInfo>>;
    async fn node_status(&self, node: &str) -> Result<NodeStatusInfo>;
    /// CPU architecture of a node (`amd64`, `arm64`), for template matching.
    async fn node_architecture(&self, node: &str) -> Result<String>;

    async fn list_storages(&self, node: &str) -> Result<Vec<StorageInfo>>;
    /// Best-free-space storage supporting container rootfs with at
    /// least `required_gb` available; `StorageUnavailable` otherwise.
    async fn select_storage(&self, node: &str, required_gb: u32) -> Result<StorageInfo>;

    async fn list_lxc(&self, node: &str) -> Result<Vec<LxcInfo>>;
    async fn lxc_status(&self, node: &str, vmid: u32) -> Result<LxcInfo>;
    async fn lxc_config(&self, node: &str, vmid: u32) -> Result<BTreeMap<String, String>>;
    async fn update_lxc_config(
        &self,
        node: &str,
        vmid: u32,
        patch: &[(String, String)],
    ) -> Result<()>;
    async fn resize_disk(&self, node: &str, vmid: u32, grow_to_gb: u32) -> Result<String>;

    async fn create_lxc(&self, node: &str, spec: &LxcSpec) -> Result<String>;
    async fn start_lxc(&self, node: &str, vmid: u32) -> Result<String>;
    async fn stop_lxc(&self, node: &str, vmid: u32) -> Result<String>;
    async fn shutdown_lxc(&self, node: &str, vmid: u32) -> Result<String>;
    async fn delete_lxc(&self, node: &str, vmid: u32, force: bool) -> Result<String>;
    async fn clone_lxc(
        &self,
        node: &str,
        source: u32,
        new_vmid: u32,
        hostname: &str,
        full: bool,
        snapshot: Option<&str>,
    ) -> Result<String>;

    async fn snapshot(&self, node: &str, vmid: u32, name: &str) -> Result<String>;
    async fn delete_snapshot(&self, node: &str, vmid: u32, name: &str) -> Result<String>;

    /// Cluster-suggested next free VMID. Not a reservation.
    async fn next_vmid(&self) -> Result<u32>;

    /// Template volids present on a storage.
    async fn list_templates(&self, node: &str, storage: &str) -> Result<Vec<String>>;
    /// Download a template through the appliance manager into `storage`.
    async fn download_appliance_template(
        &self,
        node: &str,
        storage: &str,
        template: &str,
    ) -> Result<String>;

    async fn backup(
        &self,
        node: &str,
        vmid: u32,
        storage: &str,
        mode: &str,
        compress: &str,
    ) -> Result<String>;
    async fn restore(
        &self,
        node: &str,
        vmid: u32,
        volid: &str,
        storage: &str,
    ) -> Result<String>;
    async fn list_backups(
        &self,
        node: &str,
        storage: &str,
        vmid: Option<u32>,
    ) -> Result<Vec<BackupVolume>>;
    async fn delete_backup(&self, node: &str, storage: &str, volid: &str) -> Result<()>;

    async fn task_status(&self, node: &str, upid: &str) -> Result<TaskStatus>;
    /// Last `lines` lines of a task's log, oldest first.
    async fn task_log_tail(&self, node: &str, upid: &str, lines: usize) -> Result<Vec<String>>;

    /// Plain HTTP GET returning the response status, for health probes
    /// against application URLs.
    async fn http_probe(&self, url: &str) -> Result<u16>;
}
