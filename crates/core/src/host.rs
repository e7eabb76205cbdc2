// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Proxmox host and node records.
//!
//! A host row points at one cluster entry point (API endpoint + SSH
//! front door). Node rows are a cached view refreshed by the
//! reconciler; best-node selection tolerates staleness.

use serde::{Deserialize, Serialize};

use crate::id::HostId;
use crate::secret::Secret;

/// Encrypted connection credentials for a host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostCredentials {
    /// API user, e.g. `root@pam`, or a token id `root@pam!harbor`.
    pub api_user: String,
    /// API password or token secret, encrypted at rest.
    pub api_secret: Secret,
    /// Whether `api_user`/`api_secret` form an API token (header auth)
    /// rather than a password (ticket login).
    pub token_auth: bool,
    pub ssh_user: String,
    pub ssh_password: Secret,
}

/// One configured PVE cluster member used as an entry point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxmoxHost {
    pub id: HostId,
    pub display_name: String,
    pub api_address: String,
    pub api_port: u16,
    pub ssh_port: u16,
    pub credentials: HostCredentials,
    pub verify_tls: bool,
    pub active: bool,
    /// At most one host is the default deploy target.
    pub default: bool,
}

impl ProxmoxHost {
    pub fn api_base_url(&self) -> String {
        format!("https://{}:{}/api2/json", self.api_address, self.api_port)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Online,
    Offline,
    Unknown,
}

crate::simple_display! {
    NodeStatus {
        Online => "online",
        Offline => "offline",
        Unknown => "unknown",
    }
}

/// Cached view of one node inside a host's cluster.
///
/// Unique on `(host_id, name)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxmoxNode {
    pub host_id: HostId,
    pub name: String,
    pub status: NodeStatus,
    pub cpu_count: u32,
    pub cpu_usage: f64,
    pub memory_total: u64,
    pub memory_used: u64,
    pub storage_total: u64,
    pub storage_used: u64,
    pub uptime_secs: u64,
    pub ip_address: Option<String>,
    pub version: Option<String>,
}

impl ProxmoxNode {
    pub fn is_online(&self) -> bool {
        self.status == NodeStatus::Online
    }

    /// Free memory in bytes; the best-node metric.
    pub fn memory_free(&self) -> u64 {
        self.memory_total.saturating_sub(self.memory_used)
    }
}
