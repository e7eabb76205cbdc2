// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The Application record — the central entity of the orchestrator.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::id::{AppId, HostId};
use crate::secret::Secret;
use crate::status::AppStatus;

/// Access URLs computed at the end of a deploy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppUrls {
    /// `http://<appliance_wan>:<public_port>/`, or direct container
    /// access when the proxy is degraded.
    pub url: String,
    /// `http://<appliance_wan>:<internal_port>/` for iframe embedding.
    /// Absent in degraded (direct access) mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iframe_url: Option<String>,
    /// True when the reverse proxy could not be used and `url` points
    /// straight at the container.
    #[serde(default)]
    pub direct_access: bool,
}

/// A deployed (or deploying) application instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Application {
    pub id: AppId,
    pub catalog_id: String,
    pub name: String,
    /// Globally unique, DNS-safe.
    pub hostname: String,
    pub status: AppStatus,
    pub urls: Option<AppUrls>,
    /// Unique within the public range while assigned.
    pub public_port: Option<u16>,
    /// Unique within the internal range while assigned.
    pub internal_port: Option<u16>,
    /// Unique when non-null; null until acquired.
    pub vmid: Option<u32>,
    /// Weak reference into the host table; never cascades.
    pub host_id: HostId,
    pub node_name: Option<String>,
    pub root_password: Option<Secret>,
    /// Catalog-level knobs (memory, cores, disk, template overrides).
    #[serde(default)]
    pub config: BTreeMap<String, serde_json::Value>,
    /// User-supplied compose environment.
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    /// Exposed ports as materialized at deploy time.
    #[serde(default)]
    pub ports: Vec<u16>,
    /// Host volume paths mounted into the workload.
    #[serde(default)]
    pub volumes: Vec<String>,
    pub owner_id: Option<String>,
    pub created_at_ms: u64,
    pub updated_at_ms: u64,
    /// Updated on every status write; the janitor's staleness input.
    pub state_changed_at_ms: u64,
}

impl Application {
    /// First exposed port; the reverse-proxy backend target.
    pub fn primary_port(&self) -> Option<u16> {
        self.ports.first().copied()
    }
}

/// Validated deploy request, produced by the façade from user intent.
#[derive(Debug, Clone)]
pub struct DeployIntent {
    pub catalog_id: String,
    pub hostname: String,
    pub node: Option<String>,
    pub config: BTreeMap<String, serde_json::Value>,
    pub environment: BTreeMap<String, String>,
    pub owner_id: Option<String>,
}

/// Adoption request for an existing, unmanaged LXC.
#[derive(Debug, Clone)]
pub struct AdoptIntent {
    pub vmid: u32,
    pub node_name: String,
    pub catalog_id: String,
    pub container_port: u16,
    pub hostname: Option<String>,
    pub owner_id: Option<String>,
}

#[cfg(any(test, feature = "test-support"))]
pub use builder::ApplicationBuilder;

#[cfg(any(test, feature = "test-support"))]
mod builder {
    use super::*;

    /// Test fixture builder for [`Application`].
    pub struct ApplicationBuilder {
        app: Application,
    }

    impl Default for ApplicationBuilder {
        fn default() -> Self {
            Self {
                app: Application {
                    id: AppId::from_string("app-fixture000000000"),
                    catalog_id: "adminer".into(),
                    name: "Adminer".into(),
                    hostname: "app01".into(),
                    status: AppStatus::Deploying,
                    urls: None,
                    public_port: None,
                    internal_port: None,
                    vmid: None,
                    host_id: HostId::from_string("hst-fixture000000000"),
                    node_name: None,
                    root_password: None,
                    config: BTreeMap::new(),
                    environment: BTreeMap::new(),
                    ports: vec![8080],
                    volumes: Vec::new(),
                    owner_id: None,
                    created_at_ms: 0,
                    updated_at_ms: 0,
                    state_changed_at_ms: 0,
                },
            }
        }
    }

    impl ApplicationBuilder {
        pub fn id(mut self, id: impl AsRef<str>) -> Self {
            self.app.id = AppId::from_string(id);
            self
        }

        pub fn hostname(mut self, hostname: impl Into<String>) -> Self {
            self.app.hostname = hostname.into();
            self
        }

        pub fn catalog_id(mut self, catalog_id: impl Into<String>) -> Self {
            self.app.catalog_id = catalog_id.into();
            self
        }

        pub fn status(mut self, status: AppStatus) -> Self {
            self.app.status = status;
            self
        }

        pub fn ports(mut self, public: u16, internal: u16) -> Self {
            self.app.public_port = Some(public);
            self.app.internal_port = Some(internal);
            self
        }

        pub fn vmid(mut self, vmid: u32) -> Self {
            self.app.vmid = Some(vmid);
            self
        }

        pub fn host_id(mut self, id: impl AsRef<str>) -> Self {
            self.app.host_id = HostId::from_string(id);
            self
        }

        pub fn node(mut self, node: impl Into<String>) -> Self {
            self.app.node_name = Some(node.into());
            self
        }

        pub fn exposed(mut self, ports: Vec<u16>) -> Self {
            self.app.ports = ports;
            self
        }

        pub fn state_changed_at_ms(mut self, ms: u64) -> Self {
            self.app.state_changed_at_ms = ms;
            self
        }

        pub fn build(self) -> Application {
            self.app
        }
    }
}
