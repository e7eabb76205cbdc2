// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Read-only application catalog.
//!
//! Two on-disk layouts are accepted: an `index.yml` naming one YAML
//! file per app, or a legacy single `catalog.yml` holding every entry.
//! Either way the result is an in-memory map consulted synchronously
//! by the façade and the deploy pipeline.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{Error, Result};

/// One port a catalog app exposes from its compose services.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExposedPort {
    pub port: u16,
    /// The primary port receives the reverse-proxy vhost.
    #[serde(default)]
    pub primary: bool,
}

/// One installable application.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogApp {
    pub id: String,
    pub name: String,
    /// Container template family, e.g. `alpine`.
    #[serde(default = "default_family")]
    pub family: String,
    #[serde(default)]
    pub version: Option<String>,
    /// Compose document with `{{ENV}}`-style defaults already inlined.
    pub compose: String,
    #[serde(default)]
    pub default_environment: BTreeMap<String, String>,
    #[serde(default)]
    pub ports: Vec<ExposedPort>,
    /// Volume mount points materialized under the per-hostname dir.
    #[serde(default)]
    pub volumes: Vec<String>,
    #[serde(default = "default_min_cpu")]
    pub min_cpu: u32,
    #[serde(default = "default_min_memory")]
    pub min_memory_mb: u32,
    #[serde(default = "default_disk")]
    pub disk_gb: u32,
    /// Template ships with the container runtime already installed.
    #[serde(default)]
    pub runtime_preinstalled: bool,
}

fn default_family() -> String {
    "alpine".into()
}

fn default_min_cpu() -> u32 {
    1
}

fn default_min_memory() -> u32 {
    512
}

fn default_disk() -> u32 {
    8
}

impl CatalogApp {
    /// The port the reverse proxy targets: the one flagged primary,
    /// else the first listed.
    pub fn primary_port(&self) -> Option<u16> {
        self.ports
            .iter()
            .find(|p| p.primary)
            .or_else(|| self.ports.first())
            .map(|p| p.port)
    }
}

#[derive(Debug, Deserialize)]
struct IndexFile {
    apps: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct LegacyFile {
    apps: Vec<CatalogApp>,
}

/// Loaded catalog, keyed by app id.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    apps: BTreeMap<String, CatalogApp>,
}

impl Catalog {
    pub fn get(&self, id: &str) -> Option<&CatalogApp> {
        self.apps.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.apps.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CatalogApp> {
        self.apps.values()
    }

    pub fn len(&self) -> usize {
        self.apps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.apps.is_empty()
    }

    /// Load from a directory: `index.yml` with per-app files when
    /// present, otherwise the legacy single `catalog.yml`.
    pub fn load_dir(dir: &Path) -> Result<Self> {
        let index_path = dir.join("index.yml");
        if index_path.is_file() {
            return Self::load_index(dir, &index_path);
        }
        let legacy_path = dir.join("catalog.yml");
        if legacy_path.is_file() {
            return Self::load_legacy(&legacy_path);
        }
        Err(Error::not_found("catalog", dir.display().to_string()))
    }

    fn load_index(dir: &Path, index_path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(index_path)
            .map_err(|e| Error::DatabaseError(format!("reading catalog index: {e}")))?;
        let index: IndexFile = serde_yaml::from_str(&raw)
            .map_err(|e| Error::DatabaseError(format!("parsing catalog index: {e}")))?;
        let mut apps = BTreeMap::new();
        for file in &index.apps {
            let path = dir.join(file);
            let raw = std::fs::read_to_string(&path).map_err(|e| {
                Error::DatabaseError(format!("reading catalog entry {}: {e}", path.display()))
            })?;
            let app: CatalogApp = serde_yaml::from_str(&raw).map_err(|e| {
                Error::DatabaseError(format!("parsing catalog entry {}: {e}", path.display()))
            })?;
            if apps.insert(app.id.clone(), app).is_some() {
                return Err(Error::conflict("catalog entry", file.clone()));
            }
        }
        tracing::info!(entries = apps.len(), "catalog loaded from index");
        Ok(Self { apps })
    }

    fn load_legacy(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::DatabaseError(format!("reading catalog: {e}")))?;
        let legacy: LegacyFile = serde_yaml::from_str(&raw)
            .map_err(|e| Error::DatabaseError(format!("parsing catalog: {e}")))?;
        let mut apps = BTreeMap::new();
        for app in legacy.apps {
            apps.insert(app.id.clone(), app);
        }
        tracing::info!(entries = apps.len(), "catalog loaded (legacy single file)");
        Ok(Self { apps })
    }

    /// Build directly from entries (tests, embedded defaults).
    pub fn from_apps(entries: Vec<CatalogApp>) -> Self {
        Self { apps: entries.into_iter().map(|a| (a.id.clone(), a)).collect() }
    }
}

#[cfg(test)]
#[path = "catalog_tests.rs"]
mod tests;
