// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end orchestrator scenarios over fake cluster transports.
//!
//! Each test drives the public façade the way the HTTP layer would and
//! asserts on store state, the fake cluster, and the audit trail.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use ph_core::test_support::{catalog_fixture, host_fixture, node_fixture, GIB};
use ph_core::{AppStatus, Catalog, DeployIntent, FakeClock, HostId, SecretCipher};
use ph_engine::{Action, EngineConfig, EngineDeps, Facade, JobRunner};
use ph_pve::{FakeExec, FakePve, FakeTransports};
use ph_store::AppStore;

struct Rig {
    deps: Arc<EngineDeps<FakeClock>>,
    facade: Facade<FakeClock>,
    pve: Arc<FakePve>,
    exec: Arc<FakeExec>,
    clock: FakeClock,
}

fn rig() -> Rig {
    let clock = FakeClock::new();
    let store = Arc::new(AppStore::new(clock.clone()));
    store.upsert_host(host_fixture("hst-1")).expect("host fixture");
    store.refresh_nodes(
        HostId::from_string("hst-1"),
        vec![node_fixture("hst-1", "pve1", 8 * GIB)],
    );

    let pve = Arc::new(FakePve::single_node("pve1"));
    let exec = Arc::new(FakeExec::with_defaults());
    let transports = Arc::new(FakeTransports::new(pve.clone(), exec.clone()));
    let deps = Arc::new(EngineDeps::new(
        store,
        transports,
        catalog_fixture(),
        SecretCipher::ephemeral(),
        EngineConfig::fast(),
        clock.clone(),
    ));
    let runner = Arc::new(JobRunner::new(deps.clone()));
    let facade = Facade::new(deps.clone(), runner);
    Rig { deps, facade, pve, exec, clock }
}

fn adminer_intent(hostname: &str) -> DeployIntent {
    DeployIntent {
        catalog_id: "adminer".into(),
        hostname: hostname.into(),
        node: None,
        config: BTreeMap::new(),
        environment: BTreeMap::new(),
        owner_id: Some("operator".into()),
    }
}

#[tokio::test]
async fn s1_happy_deploy() {
    let rig = rig();
    let app = rig.facade.deploy_application(adminer_intent("app01")).expect("accepted");
    assert_eq!(app.status, AppStatus::Deploying);

    rig.facade.runner().drain().await;

    let app = rig.deps.store.get_app(app.id).expect("row");
    assert_eq!(app.status, AppStatus::Running);
    assert_eq!(app.public_port, Some(30000));
    assert_eq!(app.internal_port, Some(40000));
    assert_eq!(app.node_name.as_deref(), Some("pve1"));

    let vmid = app.vmid.expect("vmid acquired from the cluster");
    assert!(rig.pve.container_exists(vmid));
    assert_eq!(rig.pve.container_running(vmid), Some(true));

    // runtime installed, compose up, vhost registered
    assert!(!rig.exec.commands_containing("apk add --no-cache docker docker-cli-compose").is_empty());
    assert!(!rig.exec.commands_containing("docker compose up -d").is_empty());
    assert!(!rig.exec.commands_containing("/etc/caddy/sites-enabled/app01").is_empty());

    let urls = app.urls.expect("urls computed");
    assert!(urls.url.ends_with(":30000/"));
    assert!(urls.iframe_url.expect("iframe url").ends_with(":40000/"));
    assert!(!urls.direct_access);
}

#[tokio::test]
async fn s2_deploy_fails_at_compose_pull() {
    let rig = rig();
    rig.exec.fail_matching("docker compose pull", || {
        ph_core::Error::ExecFailed { exit: 1, stderr: "network unreachable".into() }
    });

    let app = rig.facade.deploy_application(adminer_intent("app01")).expect("accepted");
    rig.facade.runner().drain().await;

    let failed = rig.deps.store.get_app(app.id).expect("row survives for inspection");
    assert_eq!(failed.status, AppStatus::Error);
    // LXC destroyed, ports released
    assert!(!rig.pve.container_exists(failed.vmid.expect("vmid kept for reclaim")));
    assert_eq!(failed.public_port, None);
    assert_eq!(failed.internal_port, None);
    // the step-by-step trail names the failing step
    let logs = rig.deps.store.deploy_logs(app.id);
    assert!(logs.iter().any(|l| l.step == "compose_up" && l.level == ph_core::LogLevel::Error));
}

#[tokio::test]
async fn s3_clone_of_running_app() {
    let rig = rig();
    let source = rig.facade.deploy_application(adminer_intent("app01")).expect("accepted");
    rig.facade.runner().drain().await;

    let accepted = rig
        .facade
        .perform_action(source.id, Action::Clone { new_hostname: "app01-clone".into() })
        .expect("clone accepted");
    rig.facade.runner().drain().await;

    // temporary snapshot created and deleted
    let deleted = rig.pve.deleted_snapshots();
    assert_eq!(deleted.len(), 1);
    assert!(deleted[0].1.starts_with("ph_clone_temp_"));
    let source_vmid = rig.deps.store.get_app(source.id).expect("source").vmid.expect("vmid");
    assert!(rig.pve.snapshots_of(source_vmid).is_empty());

    // clone produced a fresh VMID and runs; both apps visible
    let clone = rig.deps.store.get_app(accepted.application_id).expect("clone row");
    assert_eq!(clone.status, AppStatus::Running);
    assert_ne!(clone.vmid, rig.deps.store.get_app(source.id).expect("source").vmid);
    assert_eq!(rig.deps.store.all_apps().len(), 2);
}

#[tokio::test]
async fn s4_orphan_reconciliation() {
    let rig = rig();
    let app = rig.facade.deploy_application(adminer_intent("app01")).expect("accepted");
    rig.facade.runner().drain().await;
    let vmid = rig.deps.store.get_app(app.id).expect("row").vmid.expect("vmid");

    // operator deletes the container outside the orchestrator
    rig.pve.evict_container(vmid);

    let report = ph_engine::reconcile::run_once(&rig.deps).await.expect("sweep");
    assert_eq!(report.anomalous_orphans, 1);

    // row deleted, alert recorded, ports released
    assert!(rig.deps.store.get_app(app.id).is_err());
    assert!(rig.deps.store.audit_entries().iter().any(|e| e.action == "orphan_detected"));
    let next = rig.facade.deploy_application(adminer_intent("app02")).expect("accepted");
    rig.facade.runner().drain().await;
    assert_eq!(rig.deps.store.get_app(next.id).expect("row").public_port, Some(30000));
}

#[tokio::test]
async fn s5_stuck_deploy_is_failed_by_the_janitor() {
    let rig = rig();
    // a row parked in deploying with no job driving it
    let app = rig
        .deps
        .store
        .create_application(
            ph_core::ApplicationBuilder::default()
                .id("app-stuck")
                .hostname("stuck01")
                .host_id("hst-1")
                .build(),
        )
        .expect("row");

    rig.clock.advance(Duration::from_secs(3660));
    let report = ph_engine::janitor::run_once(&rig.deps).await.expect("sweep");

    assert_eq!(report.failed, 1);
    assert_eq!(rig.deps.store.get_app(app.id).expect("row").status, AppStatus::Error);
    let logs = rig.deps.store.deploy_logs(app.id);
    let entry = logs.iter().find(|l| l.step == "janitor").expect("janitor log entry");
    assert!(entry.message.contains("deploying"));
}

#[tokio::test]
async fn s6_update_rollback() {
    let rig = rig();
    let app = rig.facade.deploy_application(adminer_intent("app01")).expect("accepted");
    rig.facade.runner().drain().await;

    // image pull breaks after the pre-update backup succeeded
    rig.exec.fail_matching("docker compose pull", || {
        ph_core::Error::ExecFailed { exit: 1, stderr: "manifest unknown".into() }
    });
    rig.facade.perform_action(app.id, Action::Update).expect("update accepted");
    rig.facade.runner().drain().await;

    assert_eq!(rig.deps.store.get_app(app.id).expect("row").status, AppStatus::UpdateFailed);
    let backup = rig
        .deps
        .store
        .backups_of(app.id)
        .into_iter()
        .find(|b| b.kind == ph_core::BackupKind::PreUpdate)
        .expect("pre-update backup");
    assert_eq!(backup.status, ph_core::BackupStatus::Available);

    // restore from the pre-update backup returns the app to running
    rig.facade
        .perform_action(app.id, Action::Restore { backup_id: backup.id })
        .expect("restore accepted");
    rig.facade.runner().drain().await;
    assert_eq!(rig.deps.store.get_app(app.id).expect("row").status, AppStatus::Running);
}

#[tokio::test]
async fn deploy_catalog_survives_snapshot_round_trip() {
    let rig = rig();
    let app = rig.facade.deploy_application(adminer_intent("app01")).expect("accepted");
    rig.facade.runner().drain().await;

    let dir = tempfile::tempdir().expect("tempdir");
    ph_store::snapshot::save(&rig.deps.store, dir.path()).expect("save");
    let state = ph_store::snapshot::load(dir.path()).expect("load");
    assert_eq!(state.apps.len(), 1);
    assert_eq!(state.apps[&app.id].status, AppStatus::Running);
    assert!(!state.hosts.is_empty());
}

#[tokio::test]
async fn catalog_fixture_is_well_formed() {
    let catalog: Catalog = catalog_fixture();
    let entry = catalog.get("adminer").expect("adminer entry");
    assert_eq!(entry.primary_port(), Some(8080));
    assert!(serde_json::to_string(&entry.ports).is_ok());
}
