// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared fixtures for crate and workspace tests.

use std::collections::BTreeMap;

use crate::catalog::{Catalog, CatalogApp, ExposedPort};
use crate::host::{HostCredentials, NodeStatus, ProxmoxHost, ProxmoxNode};
use crate::id::HostId;
use crate::secret::SecretCipher;

pub const GIB: u64 = 1024 * 1024 * 1024;

/// A host row with encrypted throwaway credentials.
pub fn host_fixture(id: &str) -> ProxmoxHost {
    let cipher = SecretCipher::ephemeral();
    ProxmoxHost {
        id: HostId::from_string(id),
        display_name: "lab".into(),
        api_address: "10.0.0.10".into(),
        api_port: 8006,
        ssh_port: 22,
        credentials: HostCredentials {
            api_user: "root@pam".into(),
            api_secret: cipher.encrypt("fixture").unwrap_or_else(|_| unreachable!()),
            token_auth: false,
            ssh_user: "root".into(),
            ssh_password: cipher.encrypt("fixture").unwrap_or_else(|_| unreachable!()),
        },
        verify_tls: false,
        active: true,
        default: true,
    }
}

/// An online node with the given free memory.
pub fn node_fixture(host_id: &str, name: &str, memory_free: u64) -> ProxmoxNode {
    ProxmoxNode {
        host_id: HostId::from_string(host_id),
        name: name.into(),
        status: NodeStatus::Online,
        cpu_count: 8,
        cpu_usage: 0.1,
        memory_total: 16 * GIB,
        memory_used: 16 * GIB - memory_free,
        storage_total: 500 * GIB,
        storage_used: 100 * GIB,
        uptime_secs: 86_400,
        ip_address: Some("10.0.0.11".into()),
        version: Some("8.2".into()),
    }
}

/// A one-app catalog with `adminer` on port 8080.
pub fn catalog_fixture() -> Catalog {
    Catalog::from_apps(vec![CatalogApp {
        id: "adminer".into(),
        name: "Adminer".into(),
        family: "alpine".into(),
        version: None,
        compose: "services:\n  adminer:\n    image: adminer:latest\n    ports:\n      - \"8080:8080\"\n".into(),
        default_environment: BTreeMap::new(),
        ports: vec![ExposedPort { port: 8080, primary: true }],
        volumes: vec!["/var/lib/adminer".into()],
        min_cpu: 1,
        min_memory_mb: 256,
        disk_gb: 8,
        runtime_preinstalled: false,
    }])
}
