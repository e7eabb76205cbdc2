// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The reconciliation sweep: store versus cluster reality.
//!
//! Read-only against the cluster — it enumerates nodes and VMIDs,
//! refreshes the cached node rows, and classifies applications whose
//! VMID no longer exists. Orphans get soft cleanup only: ports
//! released, row deleted, never a cluster call referencing the missing
//! container. It takes no row locks, so it is safe to run while jobs
//! are in flight.

use std::collections::HashSet;

use ph_core::{
    AppStatus, AuditEntry, Clock, NodeStatus, ProxmoxHost, ProxmoxNode, Result,
};
use ph_pve::PveGateway;

use crate::ctx::EngineDeps;

#[derive(Debug, Default, Clone)]
pub struct ReconcileReport {
    pub hosts_scanned: usize,
    pub nodes_refreshed: usize,
    pub expected_orphans: usize,
    pub anomalous_orphans: usize,
}

/// One full sweep over every active host.
pub async fn run_once<C: Clock>(deps: &EngineDeps<C>) -> Result<ReconcileReport> {
    let mut report = ReconcileReport::default();
    for host in deps.store.list_hosts() {
        if !host.active {
            continue;
        }
        report.hosts_scanned += 1;
        match reconcile_host(deps, &host, &mut report).await {
            Ok(()) => {}
            Err(err) => {
                tracing::warn!(host = %host.display_name, error = %err, "reconcile sweep failed for host");
            }
        }
    }
    tracing::debug!(
        hosts = report.hosts_scanned,
        anomalous = report.anomalous_orphans,
        expected = report.expected_orphans,
        "reconcile sweep complete"
    );
    Ok(report)
}

async fn reconcile_host<C: Clock>(
    deps: &EngineDeps<C>,
    host: &ProxmoxHost,
    report: &mut ReconcileReport,
) -> Result<()> {
    let gateway = deps.gateway(host)?;

    // refresh the cached node rows with the complete node set first,
    // so a failure during VMID enumeration never evicts cache entries
    let nodes = gateway.list_nodes().await?;
    let cached: Vec<ProxmoxNode> = nodes
        .iter()
        .map(|node| ProxmoxNode {
            host_id: host.id,
            name: node.node.clone(),
            status: if node.is_online() { NodeStatus::Online } else { NodeStatus::Offline },
            cpu_count: node.maxcpu.unwrap_or(0),
            cpu_usage: node.cpu.unwrap_or(0.0),
            memory_total: node.maxmem.unwrap_or(0),
            memory_used: node.mem.unwrap_or(0),
            storage_total: node.maxdisk.unwrap_or(0),
            storage_used: node.disk.unwrap_or(0),
            uptime_secs: node.uptime.unwrap_or(0),
            ip_address: None,
            version: None,
        })
        .collect();
    report.nodes_refreshed += cached.len();
    deps.store.refresh_nodes(host.id, cached);

    let mut cluster_vmids: HashSet<u32> = HashSet::new();
    for node in nodes.iter().filter(|n| n.is_online()) {
        // read-only enumeration; offline nodes keep their stale rows
        match gateway.list_lxc(&node.node).await {
            Ok(containers) => cluster_vmids.extend(containers.iter().map(|c| c.vmid)),
            Err(err) => {
                // cannot see the node's containers: skip orphan
                // classification for this host rather than delete
                // rows on partial information
                tracing::warn!(node = %node.node, error = %err, "VMID enumeration failed, skipping orphan sweep");
                return Ok(());
            }
        }
    }

    // orphans: rows whose VMID is gone from the cluster
    for app in deps.store.apps_with_vmid(host.id) {
        let Some(vmid) = app.vmid else { continue };
        if cluster_vmids.contains(&vmid) {
            continue;
        }

        let expected = matches!(app.status, AppStatus::Removing | AppStatus::Error);
        if expected {
            report.expected_orphans += 1;
            tracing::info!(
                app_id = %app.id,
                hostname = %app.hostname,
                vmid,
                status = %app.status,
                "cleaning up expected orphan"
            );
        } else {
            report.anomalous_orphans += 1;
            tracing::error!(
                app_id = %app.id,
                hostname = %app.hostname,
                vmid,
                status = %app.status,
                "ANOMALOUS ORPHAN: container vanished outside the orchestrator"
            );
            deps.store.audit(AuditEntry {
                actor: "system".into(),
                action: "orphan_detected".into(),
                resource_kind: "application".into(),
                resource_id: app.id.as_str().to_string(),
                details: Some(serde_json::json!({
                    "hostname": app.hostname,
                    "vmid": vmid,
                    "status": app.status.to_string(),
                })),
                client_ip: None,
                timestamp_ms: deps.clock.epoch_ms(),
            });
        }

        // soft cleanup only: release ports, drop the row
        let _ = deps.store.release_ports(app.id);
        let _ = deps.store.delete_application(app.id);
    }

    Ok(())
}

#[cfg(test)]
#[path = "reconcile_tests.rs"]
mod tests;
