// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::test_helpers::TestRig;

#[tokio::test]
async fn refreshes_node_cache_from_cluster() {
    let rig = TestRig::new();
    rig.pve.add_node("pve2", "offline");

    run_once(&rig.deps).await.unwrap();

    let host_id = ph_core::HostId::from_string("hst-1");
    let nodes = rig.deps.store.nodes_of(host_id);
    assert_eq!(nodes.len(), 2);
    let pve2 = nodes.iter().find(|n| n.name == "pve2").unwrap();
    assert_eq!(pve2.status, ph_core::NodeStatus::Offline);
}

#[tokio::test]
async fn live_containers_are_not_orphans() {
    let rig = TestRig::new();
    let app = rig.seed_running_app("app01", 101);

    let report = run_once(&rig.deps).await.unwrap();
    assert_eq!(report.anomalous_orphans, 0);
    assert_eq!(report.expected_orphans, 0);
    assert!(rig.deps.store.get_app(app.id).is_ok());
}

#[tokio::test]
async fn anomalous_orphan_is_alerted_and_soft_cleaned() {
    let rig = TestRig::new();
    let app = rig.seed_running_app("app01", 101);
    // operator deletes the container behind our back
    rig.pve.evict_container(101);

    let report = run_once(&rig.deps).await.unwrap();
    assert_eq!(report.anomalous_orphans, 1);

    // soft cleanup: row gone, ports free, no cluster mutation
    assert!(rig.deps.store.get_app(app.id).is_err());
    let next = rig.seed_app("app02");
    let pair = rig
        .deps
        .store
        .allocate_ports(next.id, rig.deps.config.public_ports, rig.deps.config.internal_ports)
        .unwrap();
    assert_eq!(pair, (30000, 40000));

    // the alert is durable
    let audit = rig.deps.store.audit_entries();
    assert!(audit.iter().any(|e| e.action == "orphan_detected"));
}

#[tokio::test]
async fn errored_orphan_is_expected_and_quiet() {
    let rig = TestRig::new();
    let app = rig.seed_app("app01");
    rig.deps.store.set_vmid(app.id, 150).unwrap();
    rig.fail_app(app.id);
    // vmid 150 never existed on the cluster

    let report = run_once(&rig.deps).await.unwrap();
    assert_eq!(report.expected_orphans, 1);
    assert_eq!(report.anomalous_orphans, 0);
    assert!(rig.deps.store.get_app(app.id).is_err());
    assert!(!rig.deps.store.audit_entries().iter().any(|e| e.action == "orphan_detected"));
}

#[tokio::test]
async fn reconciliation_never_mutates_the_cluster() {
    let rig = TestRig::new();
    rig.seed_running_app("app01", 101);
    let app2 = rig.seed_running_app("app02", 102);
    rig.pve.evict_container(102);
    let _ = app2;

    run_once(&rig.deps).await.unwrap();

    let mutating = ["create_lxc", "start_lxc", "stop_lxc", "delete_lxc", "snapshot", "restore"];
    for call in rig.pve.calls() {
        assert!(
            mutating.iter().all(|m| !call.starts_with(m)),
            "reconcile issued mutating call: {call}"
        );
    }
}

#[tokio::test]
async fn enumeration_failure_skips_orphan_sweep() {
    let rig = TestRig::new();
    let app = rig.seed_running_app("app01", 101);
    rig.pve.evict_container(101);
    rig.pve.fail_once("list_lxc", || ph_core::Error::Unreachable("node rebooting".into()));

    run_once(&rig.deps).await.unwrap();
    // partial information: the row must survive
    assert!(rig.deps.store.get_app(app.id).is_ok());
}

#[tokio::test]
async fn enumeration_failure_keeps_the_full_node_cache() {
    let rig = TestRig::new();
    rig.pve.add_node("pve2", "online");
    rig.pve.fail_once("list_lxc", || ph_core::Error::Unreachable("node rebooting".into()));

    let report = run_once(&rig.deps).await.unwrap();

    // the cache carries every node the cluster reported, not just the
    // ones iterated before the failure
    let host_id = ph_core::HostId::from_string("hst-1");
    let nodes = rig.deps.store.nodes_of(host_id);
    assert_eq!(nodes.len(), 2);
    assert_eq!(report.nodes_refreshed, 2);
}

#[tokio::test]
async fn inactive_hosts_are_skipped() {
    let rig = TestRig::new();
    let mut host = rig.deps.store.get_host(ph_core::HostId::from_string("hst-1")).unwrap();
    host.active = false;
    rig.deps.store.upsert_host(host).unwrap();

    let report = run_once(&rig.deps).await.unwrap();
    assert_eq!(report.hosts_scanned, 0);
}
