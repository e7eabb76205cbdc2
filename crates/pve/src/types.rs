// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire DTOs for the PVE REST API.
//!
//! Field names follow the API (`maxmem`, `avail`, `exitstatus`);
//! everything optional on the wire is optional here and normalized by
//! accessors rather than at deserialize time.

use serde::Deserialize;

/// Envelope every PVE response wraps its payload in.
#[derive(Debug, Deserialize)]
pub(crate) struct Envelope<T> {
    pub data: Option<T>,
}

/// Entry from `GET /nodes`.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeInfo {
    pub node: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub cpu: Option<f64>,
    #[serde(default)]
    pub maxcpu: Option<u32>,
    #[serde(default)]
    pub mem: Option<u64>,
    #[serde(default)]
    pub maxmem: Option<u64>,
    #[serde(default)]
    pub disk: Option<u64>,
    #[serde(default)]
    pub maxdisk: Option<u64>,
    #[serde(default)]
    pub uptime: Option<u64>,
}

impl NodeInfo {
    pub fn is_online(&self) -> bool {
        self.status.as_deref() == Some("online")
    }
}

/// Payload of `GET /nodes/{node}/status`.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeStatusInfo {
    #[serde(default)]
    pub cpu: Option<f64>,
    #[serde(default)]
    pub uptime: Option<u64>,
    #[serde(default)]
    pub memory: Option<MemoryInfo>,
    #[serde(default)]
    pub cpuinfo: Option<CpuInfo>,
    #[serde(default)]
    pub pveversion: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MemoryInfo {
    pub total: u64,
    pub used: u64,
    #[serde(default)]
    pub free: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CpuInfo {
    #[serde(default)]
    pub cpus: Option<u32>,
    #[serde(default)]
    pub model: Option<String>,
}

/// Entry from `GET /nodes/{node}/storage`.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageInfo {
    pub storage: String,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    /// Comma-separated content types (`rootdir,images,vztmpl,backup`).
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub active: Option<u8>,
    #[serde(default)]
    pub enabled: Option<u8>,
    #[serde(default)]
    pub total: Option<u64>,
    #[serde(default)]
    pub used: Option<u64>,
    #[serde(default)]
    pub avail: Option<u64>,
}

impl StorageInfo {
    pub fn is_usable(&self) -> bool {
        self.active.unwrap_or(0) == 1 && self.enabled.unwrap_or(1) == 1
    }

    pub fn supports(&self, content: &str) -> bool {
        self.content
            .as_deref()
            .map(|c| c.split(',').any(|part| part.trim() == content))
            .unwrap_or(false)
    }

    pub fn avail_bytes(&self) -> u64 {
        self.avail.unwrap_or(0)
    }
}

/// Entry from `GET /nodes/{node}/lxc` or `…/lxc/{vmid}/status/current`.
#[derive(Debug, Clone, Deserialize)]
pub struct LxcInfo {
    #[serde(deserialize_with = "de_vmid")]
    pub vmid: u32,
    pub status: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub uptime: Option<u64>,
    #[serde(default)]
    pub cpu: Option<f64>,
    #[serde(default)]
    pub mem: Option<u64>,
    #[serde(default)]
    pub maxmem: Option<u64>,
    #[serde(default)]
    pub lock: Option<String>,
}

impl LxcInfo {
    pub fn is_running(&self) -> bool {
        self.status == "running"
    }
}

/// The API serves vmid as a number on list endpoints and as a string
/// on some status endpoints; accept both.
fn de_vmid<'de, D: serde::Deserializer<'de>>(de: D) -> Result<u32, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(u32),
        Str(String),
    }
    match Raw::deserialize(de)? {
        Raw::Num(n) => Ok(n),
        Raw::Str(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

/// Payload of `GET /nodes/{node}/tasks/{upid}/status`.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskStatus {
    pub status: String,
    #[serde(default)]
    pub exitstatus: Option<String>,
}

impl TaskStatus {
    pub fn is_stopped(&self) -> bool {
        self.status == "stopped"
    }

    pub fn is_ok(&self) -> bool {
        self.is_stopped() && self.exitstatus.as_deref() == Some("OK")
    }
}

/// Line of `GET /nodes/{node}/tasks/{upid}/log`.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskLogLine {
    #[serde(default)]
    pub n: Option<u64>,
    #[serde(default)]
    pub t: Option<String>,
}

/// Entry from `GET /nodes/{node}/storage/{storage}/content` filtered
/// to backups.
#[derive(Debug, Clone, Deserialize)]
pub struct BackupVolume {
    pub volid: String,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub ctime: Option<u64>,
    #[serde(default)]
    pub vmid: Option<u32>,
    #[serde(default)]
    pub format: Option<String>,
}

impl BackupVolume {
    /// Archive filename without the `storage:backup/` prefix.
    pub fn filename(&self) -> &str {
        self.volid.rsplit_once('/').map(|(_, f)| f).unwrap_or(&self.volid)
    }
}

#[cfg(test)]
#[path = "types_tests.rs"]
mod tests;
