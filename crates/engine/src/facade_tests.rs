// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::test_helpers::TestRig;
use ph_core::ErrorKind;
use std::collections::BTreeMap;

fn facade(rig: &TestRig) -> Facade<ph_core::FakeClock> {
    Facade::new(rig.deps.clone(), Arc::new(JobRunner::new(rig.deps.clone())))
}

fn deploy_intent(hostname: &str) -> DeployIntent {
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
async fn deploy_creates_row_and_enqueues() {
    let rig = TestRig::new();
    let facade = facade(&rig);

    let app = facade.deploy_application(deploy_intent("app01")).unwrap();
    assert_eq!(app.status, AppStatus::Deploying);

    facade.runner().drain().await;
    assert_eq!(rig.status_of(app.id), AppStatus::Running);
    assert!(rig.deps.store.audit_entries().iter().any(|e| e.action == "deploy"));
}

#[tokio::test]
async fn duplicate_hostname_is_rejected_synchronously() {
    let rig = TestRig::new();
    let facade = facade(&rig);
    facade.deploy_application(deploy_intent("app01")).unwrap();

    let err = facade.deploy_application(deploy_intent("app01")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    facade.runner().drain().await;
}

#[tokio::test]
async fn invalid_hostname_and_unknown_catalog_are_rejected() {
    let rig = TestRig::new();
    let facade = facade(&rig);

    let mut bad_host = deploy_intent("Bad_Host!");
    bad_host.hostname = "Bad_Host!".into();
    assert!(facade.deploy_application(bad_host).is_err());

    let mut bad_catalog = deploy_intent("app02");
    bad_catalog.catalog_id = "nope".into();
    assert_eq!(
        facade.deploy_application(bad_catalog).unwrap_err().kind(),
        ErrorKind::NotFound
    );
}

#[tokio::test]
async fn unknown_target_node_is_rejected() {
    let rig = TestRig::new();
    let facade = facade(&rig);
    let mut intent = deploy_intent("app01");
    intent.node = Some("pve9".into());
    assert_eq!(facade.deploy_application(intent).unwrap_err().kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn start_during_deploy_is_state_invalid() {
    let rig = TestRig::new();
    let facade = facade(&rig);
    let app = rig.seed_app("app01");

    let err = facade.perform_action(app.id, Action::Start).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StateInvalid);
}

#[tokio::test]
async fn stop_and_start_round_trip_through_actions() {
    let rig = TestRig::new();
    let facade = facade(&rig);
    let app = rig.seed_running_app("app01", 101);

    facade.perform_action(app.id, Action::Stop).unwrap();
    facade.runner().drain().await;
    assert_eq!(rig.status_of(app.id), AppStatus::Stopped);

    facade.perform_action(app.id, Action::Start).unwrap();
    facade.runner().drain().await;
    assert_eq!(rig.status_of(app.id), AppStatus::Running);
}

#[tokio::test]
async fn clone_action_creates_shell_row() {
    let rig = TestRig::new();
    let facade = facade(&rig);
    let source = rig.seed_running_app("app01", 101);

    let accepted = facade
        .perform_action(source.id, Action::Clone { new_hostname: "app01-clone".into() })
        .unwrap();
    assert_ne!(accepted.application_id, source.id);
    facade.runner().drain().await;

    let clone = rig.deps.store.get_app(accepted.application_id).unwrap();
    assert_eq!(clone.status, AppStatus::Running);
    assert_eq!(clone.hostname, "app01-clone");
}

#[tokio::test]
async fn restore_validates_backup_ownership() {
    let rig = TestRig::new();
    let facade = facade(&rig);
    let app = rig.seed_running_app("app01", 101);
    let other = rig.seed_running_app("app02", 102);

    // create a backup for `other`
    facade.perform_action(other.id, Action::Backup).unwrap();
    facade.runner().drain().await;
    let foreign = rig.deps.store.backups_of(other.id).remove(0);

    let err = facade
        .perform_action(app.id, Action::Restore { backup_id: foreign.id })
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn list_includes_live_metrics_in_batches() {
    let rig = TestRig::new();
    let facade = facade(&rig);
    rig.seed_running_app("app01", 101);
    rig.seed_running_app("app02", 102);

    let (items, total) =
        facade.list_applications(&AppFilter::default(), Page::default()).await.unwrap();
    assert_eq!(total, 2);
    assert!(items.iter().all(|i| i.live.is_some()));
    // both apps share (host, node): exactly one list call
    assert_eq!(rig.pve.calls_matching("list_lxc").len(), 1);
}

#[tokio::test]
async fn get_application_reports_live_status() {
    let rig = TestRig::new();
    let facade = facade(&rig);
    let app = rig.seed_running_app("app01", 101);
    // stop behind the orchestrator's back
    rig.pve.seed_container("pve1", 101, "app01", false);

    let detail = facade.get_application(app.id).await.unwrap();
    assert_eq!(detail.app.status, AppStatus::Running);
    assert_eq!(detail.live_status.as_deref(), Some("stopped"));
}

#[tokio::test]
async fn discover_unmanaged_skips_managed_and_appliance() {
    let rig = TestRig::new();
    let facade = facade(&rig);
    rig.seed_running_app("app01", 101);
    rig.pve.seed_container("pve1", 130, "legacy", true);
    rig.pve
        .seed_container("pve1", crate::appliance::APPLIANCE_VMID, "ph-appliance", true);

    let found = facade.discover_unmanaged_containers(None).await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].vmid, 130);
}

#[tokio::test]
async fn adopt_creates_row_and_settles_status() {
    let rig = TestRig::new();
    let facade = facade(&rig);
    rig.pve.seed_container("pve1", 140, "legacy", true);

    let app = facade
        .adopt_container(AdoptIntent {
            vmid: 140,
            node_name: "pve1".into(),
            catalog_id: "adminer".into(),
            container_port: 8080,
            hostname: Some("legacy01".into()),
            owner_id: None,
        })
        .unwrap();
    assert_eq!(app.status, AppStatus::Adopting);
    assert!(app.config.contains_key("adopted"));

    facade.runner().drain().await;
    assert_eq!(rig.status_of(app.id), AppStatus::Running);
}

#[tokio::test]
async fn adopting_a_managed_vmid_conflicts() {
    let rig = TestRig::new();
    let facade = facade(&rig);
    rig.seed_running_app("app01", 101);

    let err = facade
        .adopt_container(AdoptIntent {
            vmid: 101,
            node_name: "pve1".into(),
            catalog_id: "adminer".into(),
            container_port: 8080,
            hostname: None,
            owner_id: None,
        })
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
}
