// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon configuration: a TOML file plus environment overrides.
//!
//! The file location comes from `PH_CONFIG` (default
//! `/etc/proxharbor/phd.toml`); `PH_STATE_DIR`, `PH_CATALOG_DIR` and
//! `PH_ENCRYPTION_KEY` override their file counterparts so containers
//! can be configured without editing the file.

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use ph_core::{Error, Result};
use ph_engine::EngineConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct DaemonConfig {
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    #[serde(default = "default_catalog_dir")]
    pub catalog_dir: PathBuf,
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
    /// 64 hex chars (32 bytes). Absent means an ephemeral key: stored
    /// secrets do not survive a restart.
    #[serde(default)]
    pub encryption_key: Option<String>,
    /// Snapshot cadence in seconds.
    #[serde(default = "default_snapshot_secs")]
    pub snapshot_interval_secs: u64,
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default)]
    pub hosts: Vec<HostEntry>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EngineSection {
    pub public_port_range: Option<(u16, u16)>,
    pub internal_port_range: Option<(u16, u16)>,
    pub reconcile_interval_secs: Option<u64>,
    pub janitor_interval_secs: Option<u64>,
    pub stuck_threshold_secs: Option<u64>,
    pub worker_slots: Option<usize>,
    pub backup_storage: Option<String>,
    pub volumes_root: Option<PathBuf>,
}

/// A cluster entry point as written in the config file. Secrets are
/// plaintext here and encrypted the moment they enter the store.
#[derive(Debug, Clone, Deserialize)]
pub struct HostEntry {
    pub display_name: String,
    pub api_address: String,
    #[serde(default = "default_api_port")]
    pub api_port: u16,
    #[serde(default = "default_ssh_port")]
    pub ssh_port: u16,
    pub api_user: String,
    pub api_secret: String,
    #[serde(default)]
    pub token_auth: bool,
    #[serde(default = "default_ssh_user")]
    pub ssh_user: String,
    pub ssh_password: String,
    #[serde(default)]
    pub verify_tls: bool,
    #[serde(default)]
    pub default: bool,
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("/var/lib/proxharbor/state")
}

fn default_catalog_dir() -> PathBuf {
    PathBuf::from("/etc/proxharbor/catalog")
}

fn default_snapshot_secs() -> u64 {
    60
}

fn default_api_port() -> u16 {
    8006
}

fn default_ssh_port() -> u16 {
    22
}

fn default_ssh_user() -> String {
    "root".into()
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            catalog_dir: default_catalog_dir(),
            log_dir: None,
            encryption_key: None,
            snapshot_interval_secs: default_snapshot_secs(),
            engine: EngineSection::default(),
            hosts: Vec::new(),
        }
    }
}

impl DaemonConfig {
    /// Resolve the config file path: `PH_CONFIG` or the system default.
    pub fn path() -> PathBuf {
        std::env::var("PH_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/etc/proxharbor/phd.toml"))
    }

    pub fn load(path: &std::path::Path) -> Result<Self> {
        let mut config = if path.is_file() {
            let raw = std::fs::read_to_string(path)
                .map_err(|e| Error::DatabaseError(format!("reading config: {e}")))?;
            toml::from_str(&raw)
                .map_err(|e| Error::DatabaseError(format!("parsing {}: {e}", path.display())))?
        } else {
            tracing::warn!(path = %path.display(), "no config file, using defaults");
            Self::default()
        };

        if let Ok(dir) = std::env::var("PH_STATE_DIR") {
            config.state_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = std::env::var("PH_CATALOG_DIR") {
            config.catalog_dir = PathBuf::from(dir);
        }
        if let Ok(key) = std::env::var("PH_ENCRYPTION_KEY") {
            config.encryption_key = Some(key);
        }
        Ok(config)
    }

    /// Engine tunables with the file's overrides applied.
    pub fn engine_config(&self) -> EngineConfig {
        let mut engine = EngineConfig::default();
        if let Some(range) = self.engine.public_port_range {
            engine.public_ports = range;
        }
        if let Some(range) = self.engine.internal_port_range {
            engine.internal_ports = range;
        }
        if let Some(secs) = self.engine.reconcile_interval_secs {
            engine.reconcile_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = self.engine.janitor_interval_secs {
            engine.janitor_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = self.engine.stuck_threshold_secs {
            engine.stuck_threshold = Duration::from_secs(secs);
        }
        if let Some(slots) = self.engine.worker_slots {
            engine.worker_slots = slots;
        }
        if let Some(storage) = &self.engine.backup_storage {
            engine.backup_storage = storage.clone();
        }
        if let Some(root) = &self.engine.volumes_root {
            engine.volumes_root = root.clone();
        }
        engine
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
