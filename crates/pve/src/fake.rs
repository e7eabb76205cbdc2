// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory cluster double for engine and scenario tests.
//!
//! [`FakePve`] models just enough of a cluster — nodes, storages,
//! containers, templates, snapshots, backups, tasks — for the
//! pipelines to run end to end. [`FakeExec`] records every remote
//! command and answers from substring-matched response rules.
//! Failures are injected per operation with [`FakePve::fail_once`].

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use ph_core::{Error, ProxmoxHost, Result};

use crate::gateway::{LxcSpec, PveGateway};
use crate::pool::TransportFactory;
use crate::ssh::{ExecOutput, RemoteExec};
use crate::types::{BackupVolume, LxcInfo, NodeInfo, NodeStatusInfo, StorageInfo, TaskStatus};

type ErrorFactory = Box<dyn Fn() -> Error + Send + Sync>;

#[derive(Debug, Clone)]
struct FakeLxc {
    node: String,
    hostname: String,
    running: bool,
    config: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
struct FakeTask {
    status: TaskStatus,
    tail: Vec<String>,
}

#[derive(Default)]
struct FakeState {
    nodes: Vec<NodeInfo>,
    storages: Vec<StorageInfo>,
    templates: Vec<String>,
    containers: BTreeMap<u32, FakeLxc>,
    snapshots: BTreeMap<u32, Vec<String>>,
    deleted_snapshots: Vec<(u32, String)>,
    backups: Vec<BackupVolume>,
    tasks: HashMap<String, FakeTask>,
    next_vmid: u32,
    task_counter: u64,
    backup_counter: u64,
    probe_statuses: VecDeque<u16>,
    calls: Vec<String>,
    failures: HashMap<String, VecDeque<ErrorFactory>>,
}

/// Scriptable stand-in for a PVE cluster.
pub struct FakePve {
    state: Mutex<FakeState>,
}

impl FakePve {
    /// One online node with a rootdir storage, a template storage
    /// carrying an Alpine template, and VMIDs starting at 101.
    pub fn single_node(node: &str) -> Self {
        let fake = Self { state: Mutex::new(FakeState { next_vmid: 101, ..Default::default() }) };
        {
            let mut state = fake.state.lock();
            state.nodes.push(node_info(node, "online"));
            state.storages = vec![
                storage_info("local-lvm", "rootdir,images", 200),
                storage_info("local", "vztmpl,backup", 100),
            ];
            state
                .templates
                .push("local:vztmpl/alpine-3.22-default_20250617_amd64.tar.xz".to_string());
        }
        fake
    }

    pub fn add_node(&self, node: &str, status: &str) {
        self.state.lock().nodes.push(node_info(node, status));
    }

    pub fn set_next_vmid(&self, vmid: u32) {
        self.state.lock().next_vmid = vmid;
    }

    pub fn clear_templates(&self) {
        self.state.lock().templates.clear();
    }

    /// Register an existing container (adoption / orphan tests).
    pub fn seed_container(&self, node: &str, vmid: u32, hostname: &str, running: bool) {
        self.state.lock().containers.insert(
            vmid,
            FakeLxc {
                node: node.to_string(),
                hostname: hostname.to_string(),
                running,
                config: BTreeMap::new(),
            },
        );
    }

    /// Remove a container behind the orchestrator's back.
    pub fn evict_container(&self, vmid: u32) {
        self.state.lock().containers.remove(&vmid);
    }

    pub fn container_exists(&self, vmid: u32) -> bool {
        self.state.lock().containers.contains_key(&vmid)
    }

    pub fn container_running(&self, vmid: u32) -> Option<bool> {
        self.state.lock().containers.get(&vmid).map(|c| c.running)
    }

    pub fn snapshots_of(&self, vmid: u32) -> Vec<String> {
        self.state.lock().snapshots.get(&vmid).cloned().unwrap_or_default()
    }

    pub fn deleted_snapshots(&self) -> Vec<(u32, String)> {
        self.state.lock().deleted_snapshots.clone()
    }

    pub fn backup_count(&self) -> usize {
        self.state.lock().backups.len()
    }

    /// Every recorded call, formatted `op arg arg…`.
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    pub fn calls_matching(&self, op: &str) -> Vec<String> {
        self.calls().into_iter().filter(|c| c.starts_with(op)).collect()
    }

    /// Queue one scripted failure for `op` (method name).
    pub fn fail_once(&self, op: &str, make: impl Fn() -> Error + Send + Sync + 'static) {
        self.state
            .lock()
            .failures
            .entry(op.to_string())
            .or_default()
            .push_back(Box::new(make));
    }

    /// Next `http_probe` responses; defaults to 200 when exhausted.
    pub fn push_probe_status(&self, status: u16) {
        self.state.lock().probe_statuses.push_back(status);
    }

    pub fn push_task_ok(&self) -> String {
        self.insert_task(TaskStatus { status: "stopped".into(), exitstatus: Some("OK".into()) }, vec![])
    }

    pub fn push_task_failed(&self, reason: &str, tail: Vec<String>) -> String {
        self.insert_task(
            TaskStatus { status: "stopped".into(), exitstatus: Some(reason.to_string()) },
            tail,
        )
    }

    pub fn push_task_pending(&self) -> String {
        self.insert_task(TaskStatus { status: "running".into(), exitstatus: None }, vec![])
    }

    fn insert_task(&self, status: TaskStatus, tail: Vec<String>) -> String {
        let mut state = self.state.lock();
        state.task_counter += 1;
        let upid = format!("UPID:fake:{:08}", state.task_counter);
        state.tasks.insert(upid.clone(), FakeTask { status, tail });
        upid
    }

    fn record(&self, call: String) {
        self.state.lock().calls.push(call);
    }

    fn take_failure(&self, op: &str) -> Option<Error> {
        let mut state = self.state.lock();
        state.failures.get_mut(op).and_then(|q| q.pop_front()).map(|f| f())
    }

    fn check(&self, op: &str, call: String) -> Result<()> {
        self.record(call);
        match self.take_failure(op) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

fn node_info(node: &str, status: &str) -> NodeInfo {
    NodeInfo {
        node: node.to_string(),
        status: Some(status.to_string()),
        cpu: Some(0.05),
        maxcpu: Some(8),
        mem: Some(4 << 30),
        maxmem: Some(16 << 30),
        disk: Some(50 << 30),
        maxdisk: Some(500 << 30),
        uptime: Some(86_400),
    }
}

fn storage_info(name: &str, content: &str, avail_gb: u64) -> StorageInfo {
    StorageInfo {
        storage: name.to_string(),
        kind: Some("dir".into()),
        content: Some(content.to_string()),
        active: Some(1),
        enabled: Some(1),
        total: Some(avail_gb << 31),
        used: Some(avail_gb << 30),
        avail: Some(avail_gb << 30),
    }
}

#[async_trait]
impl PveGateway for FakePve {
    async fn ping(&self) -> Result<()> {
        self.check("ping", "ping".into())
    }

    async fn list_nodes(&self) -> Result<Vec<NodeInfo>> {
        self.check("list_nodes", "list_nodes".into())?;
        Ok(self.state.lock().nodes.clone())
    }

    async fn node_status(&self, node: &str) -> Result<NodeStatusInfo> {
        self.check("node_status", format!("node_status {node}"))?;
        let state = self.state.lock();
        let info = state
            .nodes
            .iter()
            .find(|n| n.node == node)
            .ok_or_else(|| Error::not_found("node", node))?;
        Ok(NodeStatusInfo {
            cpu: info.cpu,
            uptime: info.uptime,
            memory: Some(crate::types::MemoryInfo {
                total: info.maxmem.unwrap_or(0),
                used: info.mem.unwrap_or(0),
                free: None,
            }),
            cpuinfo: Some(crate::types::CpuInfo {
                cpus: info.maxcpu,
                model: Some("Fake x86_64".into()),
            }),
            pveversion: Some("pve-manager/8.2".into()),
        })
    }

    async fn node_architecture(&self, _node: &str) -> Result<String> {
        Ok("amd64".into())
    }

    async fn list_storages(&self, node: &str) -> Result<Vec<StorageInfo>> {
        self.check("list_storages", format!("list_storages {node}"))?;
        Ok(self.state.lock().storages.clone())
    }

    async fn select_storage(&self, node: &str, required_gb: u32) -> Result<StorageInfo> {
        self.check("select_storage", format!("select_storage {node} {required_gb}"))?;
        let required = (required_gb as u64) << 30;
        self.state
            .lock()
            .storages
            .iter()
            .filter(|s| s.is_usable() && (s.supports("rootdir") || s.supports("images")))
            .filter(|s| s.avail_bytes() >= required)
            .max_by_key(|s| s.avail_bytes())
            .cloned()
            .ok_or(Error::StorageUnavailable { node: node.to_string(), required_gb })
    }

    async fn list_lxc(&self, node: &str) -> Result<Vec<LxcInfo>> {
        self.check("list_lxc", format!("list_lxc {node}"))?;
        let state = self.state.lock();
        Ok(state
            .containers
            .iter()
            .filter(|(_, c)| c.node == node)
            .map(|(vmid, c)| lxc_info(*vmid, c))
            .collect())
    }

    async fn lxc_status(&self, node: &str, vmid: u32) -> Result<LxcInfo> {
        self.check("lxc_status", format!("lxc_status {node} {vmid}"))?;
        let state = self.state.lock();
        state
            .containers
            .get(&vmid)
            .map(|c| lxc_info(vmid, c))
            .ok_or_else(|| Error::not_found("container", vmid.to_string()))
    }

    async fn lxc_config(&self, _node: &str, vmid: u32) -> Result<BTreeMap<String, String>> {
        self.check("lxc_config", format!("lxc_config {vmid}"))?;
        let state = self.state.lock();
        state
            .containers
            .get(&vmid)
            .map(|c| c.config.clone())
            .ok_or_else(|| Error::not_found("container", vmid.to_string()))
    }

    async fn update_lxc_config(
        &self,
        _node: &str,
        vmid: u32,
        patch: &[(String, String)],
    ) -> Result<()> {
        self.check("update_lxc_config", format!("update_lxc_config {vmid}"))?;
        let mut state = self.state.lock();
        let lxc = state
            .containers
            .get_mut(&vmid)
            .ok_or_else(|| Error::not_found("container", vmid.to_string()))?;
        for (k, v) in patch {
            lxc.config.insert(k.clone(), v.clone());
        }
        Ok(())
    }

    async fn resize_disk(&self, node: &str, vmid: u32, grow_to_gb: u32) -> Result<String> {
        self.check("resize_disk", format!("resize_disk {node} {vmid} {grow_to_gb}"))?;
        Ok(self.push_task_ok())
    }

    async fn create_lxc(&self, node: &str, spec: &LxcSpec) -> Result<String> {
        self.check("create_lxc", format!("create_lxc {node} {} {}", spec.vmid, spec.hostname))?;
        {
            let mut state = self.state.lock();
            if state.containers.contains_key(&spec.vmid) {
                return Err(Error::conflict("vmid", format!("CT {} already exists", spec.vmid)));
            }
            state.containers.insert(
                spec.vmid,
                FakeLxc {
                    node: node.to_string(),
                    hostname: spec.hostname.clone(),
                    running: spec.start,
                    config: BTreeMap::new(),
                },
            );
            if spec.vmid >= state.next_vmid {
                state.next_vmid = spec.vmid + 1;
            }
        }
        Ok(self.push_task_ok())
    }

    async fn start_lxc(&self, node: &str, vmid: u32) -> Result<String> {
        self.check("start_lxc", format!("start_lxc {node} {vmid}"))?;
        self.set_running(vmid, true)?;
        Ok(self.push_task_ok())
    }

    async fn stop_lxc(&self, node: &str, vmid: u32) -> Result<String> {
        self.check("stop_lxc", format!("stop_lxc {node} {vmid}"))?;
        self.set_running(vmid, false)?;
        Ok(self.push_task_ok())
    }

    async fn shutdown_lxc(&self, node: &str, vmid: u32) -> Result<String> {
        self.check("shutdown_lxc", format!("shutdown_lxc {node} {vmid}"))?;
        self.set_running(vmid, false)?;
        Ok(self.push_task_ok())
    }

    async fn delete_lxc(&self, node: &str, vmid: u32, force: bool) -> Result<String> {
        self.check("delete_lxc", format!("delete_lxc {node} {vmid} force={force}"))?;
        self.state.lock().containers.remove(&vmid);
        Ok(self.push_task_ok())
    }

    async fn clone_lxc(
        &self,
        node: &str,
        source: u32,
        new_vmid: u32,
        hostname: &str,
        full: bool,
        snapshot: Option<&str>,
    ) -> Result<String> {
        self.check(
            "clone_lxc",
            format!(
                "clone_lxc {node} {source} -> {new_vmid} {hostname} full={full} snap={}",
                snapshot.unwrap_or("-")
            ),
        )?;
        {
            let mut state = self.state.lock();
            if !state.containers.contains_key(&source) {
                return Err(Error::not_found("container", source.to_string()));
            }
            state.containers.insert(
                new_vmid,
                FakeLxc {
                    node: node.to_string(),
                    hostname: hostname.to_string(),
                    running: false,
                    config: BTreeMap::new(),
                },
            );
            if new_vmid >= state.next_vmid {
                state.next_vmid = new_vmid + 1;
            }
        }
        Ok(self.push_task_ok())
    }

    async fn snapshot(&self, node: &str, vmid: u32, name: &str) -> Result<String> {
        self.check("snapshot", format!("snapshot {node} {vmid} {name}"))?;
        self.state.lock().snapshots.entry(vmid).or_default().push(name.to_string());
        Ok(self.push_task_ok())
    }

    async fn delete_snapshot(&self, node: &str, vmid: u32, name: &str) -> Result<String> {
        self.check("delete_snapshot", format!("delete_snapshot {node} {vmid} {name}"))?;
        {
            let mut state = self.state.lock();
            if let Some(snaps) = state.snapshots.get_mut(&vmid) {
                snaps.retain(|s| s != name);
            }
            state.deleted_snapshots.push((vmid, name.to_string()));
        }
        Ok(self.push_task_ok())
    }

    async fn next_vmid(&self) -> Result<u32> {
        self.check("next_vmid", "next_vmid".into())?;
        Ok(self.state.lock().next_vmid)
    }

    async fn list_templates(&self, node: &str, storage: &str) -> Result<Vec<String>> {
        self.check("list_templates", format!("list_templates {node} {storage}"))?;
        Ok(self.state.lock().templates.clone())
    }

    async fn download_appliance_template(
        &self,
        node: &str,
        storage: &str,
        template: &str,
    ) -> Result<String> {
        self.check(
            "download_appliance_template",
            format!("download_appliance_template {node} {storage} {template}"),
        )?;
        self.state.lock().templates.push(format!("{storage}:vztmpl/{template}"));
        Ok(self.push_task_ok())
    }

    async fn backup(
        &self,
        node: &str,
        vmid: u32,
        storage: &str,
        mode: &str,
        compress: &str,
    ) -> Result<String> {
        self.check("backup", format!("backup {node} {vmid} {storage} {mode} {compress}"))?;
        {
            let mut state = self.state.lock();
            state.backup_counter += 1;
            let filename = format!("vzdump-lxc-{vmid}-{:04}.tar.zst", state.backup_counter);
            state.backups.push(BackupVolume {
                volid: format!("{storage}:backup/{filename}"),
                size: Some(1 << 20),
                ctime: Some(1_700_000_000),
                vmid: Some(vmid),
                format: Some("tar.zst".into()),
            });
        }
        Ok(self.push_task_ok())
    }

    async fn restore(
        &self,
        node: &str,
        vmid: u32,
        volid: &str,
        storage: &str,
    ) -> Result<String> {
        self.check("restore", format!("restore {node} {vmid} {volid} {storage}"))?;
        {
            let mut state = self.state.lock();
            let known = state.backups.iter().any(|b| b.volid == volid);
            if !known {
                return Err(Error::not_found("backup", volid));
            }
            state.containers.entry(vmid).or_insert_with(|| FakeLxc {
                node: node.to_string(),
                hostname: format!("restored-{vmid}"),
                running: false,
                config: BTreeMap::new(),
            });
        }
        Ok(self.push_task_ok())
    }

    async fn list_backups(
        &self,
        node: &str,
        storage: &str,
        vmid: Option<u32>,
    ) -> Result<Vec<BackupVolume>> {
        self.check("list_backups", format!("list_backups {node} {storage}"))?;
        let state = self.state.lock();
        Ok(state
            .backups
            .iter()
            .filter(|b| vmid.is_none() || b.vmid == vmid)
            .cloned()
            .collect())
    }

    async fn delete_backup(&self, node: &str, storage: &str, volid: &str) -> Result<()> {
        self.check("delete_backup", format!("delete_backup {node} {storage} {volid}"))?;
        self.state.lock().backups.retain(|b| b.volid != volid);
        Ok(())
    }

    async fn task_status(&self, _node: &str, upid: &str) -> Result<TaskStatus> {
        let state = self.state.lock();
        state
            .tasks
            .get(upid)
            .map(|t| t.status.clone())
            .ok_or_else(|| Error::not_found("task", upid))
    }

    async fn task_log_tail(&self, _node: &str, upid: &str, lines: usize) -> Result<Vec<String>> {
        let state = self.state.lock();
        let mut tail = state.tasks.get(upid).map(|t| t.tail.clone()).unwrap_or_default();
        if tail.len() > lines {
            tail.drain(..tail.len() - lines);
        }
        Ok(tail)
    }

    async fn http_probe(&self, url: &str) -> Result<u16> {
        self.check("http_probe", format!("http_probe {url}"))?;
        Ok(self.state.lock().probe_statuses.pop_front().unwrap_or(200))
    }
}

impl FakePve {
    fn set_running(&self, vmid: u32, running: bool) -> Result<()> {
        let mut state = self.state.lock();
        let lxc = state
            .containers
            .get_mut(&vmid)
            .ok_or_else(|| Error::not_found("container", vmid.to_string()))?;
        lxc.running = running;
        Ok(())
    }
}

fn lxc_info(vmid: u32, lxc: &FakeLxc) -> LxcInfo {
    LxcInfo {
        vmid,
        status: if lxc.running { "running" } else { "stopped" }.to_string(),
        name: Some(lxc.hostname.clone()),
        uptime: Some(if lxc.running { 120 } else { 0 }),
        cpu: Some(0.01),
        mem: Some(64 << 20),
        maxmem: Some(2 << 30),
        lock: None,
    }
}

/// Recorded remote command with substring-matched scripted responses.
pub struct FakeExec {
    rules: Mutex<Vec<(String, ExecOutput)>>,
    failures: Mutex<Vec<(String, ErrorFactory)>>,
    commands: Mutex<Vec<(String, String)>>,
}

impl Default for FakeExec {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeExec {
    pub fn new() -> Self {
        Self {
            rules: Mutex::new(Vec::new()),
            failures: Mutex::new(Vec::new()),
            commands: Mutex::new(Vec::new()),
        }
    }

    /// Seed the responses the deploy pipeline expects from a healthy
    /// container: an eth0 address and a content-addressed runtime.
    pub fn with_defaults() -> Self {
        let fake = Self::new();
        fake.respond(
            "ip -4 addr show eth0",
            "2: eth0    inet 10.20.0.150/24 brd 10.20.0.255 scope global eth0\n",
        );
        fake
    }

    /// Answer commands containing `needle` with `stdout` (exit 0).
    pub fn respond(&self, needle: &str, stdout: &str) {
        self.rules.lock().push((
            needle.to_string(),
            ExecOutput { stdout: stdout.to_string(), stderr: String::new(), exit: 0 },
        ));
    }

    /// Fail the next command containing `needle`.
    pub fn fail_matching(&self, needle: &str, make: impl Fn() -> Error + Send + Sync + 'static) {
        self.failures.lock().push((needle.to_string(), Box::new(make)));
    }

    pub fn commands(&self) -> Vec<(String, String)> {
        self.commands.lock().clone()
    }

    pub fn commands_containing(&self, needle: &str) -> Vec<String> {
        self.commands()
            .into_iter()
            .filter(|(_, c)| c.contains(needle))
            .map(|(_, c)| c)
            .collect()
    }
}

#[async_trait]
impl RemoteExec for FakeExec {
    async fn exec_on_node(
        &self,
        node: &str,
        command: &str,
        _timeout: Duration,
        allow_nonzero: bool,
    ) -> Result<ExecOutput> {
        self.commands.lock().push((node.to_string(), command.to_string()));

        let failure = {
            let mut failures = self.failures.lock();
            let idx = failures.iter().position(|(needle, _)| command.contains(needle.as_str()));
            idx.map(|i| failures.remove(i).1())
        };
        if let Some(err) = failure {
            if let Error::ExecFailed { exit, ref stderr } = err {
                if allow_nonzero {
                    return Ok(ExecOutput {
                        stdout: String::new(),
                        stderr: stderr.clone(),
                        exit,
                    });
                }
            }
            return Err(err);
        }

        let rules = self.rules.lock();
        let matched = rules
            .iter()
            .find(|(needle, _)| command.contains(needle.as_str()))
            .map(|(_, out)| out.clone());
        Ok(matched.unwrap_or_default())
    }
}

/// Factory handing every host the same fake pair.
pub struct FakeTransports {
    pub pve: Arc<FakePve>,
    pub exec: Arc<FakeExec>,
}

impl FakeTransports {
    pub fn new(pve: Arc<FakePve>, exec: Arc<FakeExec>) -> Self {
        Self { pve, exec }
    }
}

impl TransportFactory for FakeTransports {
    fn gateway(&self, _host: &ProxmoxHost) -> Result<Arc<dyn PveGateway>> {
        Ok(self.pve.clone())
    }

    fn remote(&self, _host: &ProxmoxHost) -> Result<Arc<dyn RemoteExec>> {
        Ok(self.exec.clone())
    }
}
