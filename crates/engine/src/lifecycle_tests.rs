// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::ctx::JobCtx;
use crate::test_helpers::TestRig;
use ph_core::ErrorKind;
use tokio_util::sync::CancellationToken;

fn ctx_for(rig: &TestRig, id: ph_core::AppId) -> JobCtx<ph_core::FakeClock> {
    JobCtx::new(rig.deps.clone(), id, CancellationToken::new())
}

#[tokio::test]
async fn stop_then_start_round_trip() {
    let rig = TestRig::new();
    let app = rig.seed_running_app("app01", 101);
    let ctx = ctx_for(&rig, app.id);

    stop(&ctx).await.unwrap();
    assert_eq!(rig.status_of(app.id), AppStatus::Stopped);
    assert_eq!(rig.pve.container_running(101), Some(false));

    start(&ctx).await.unwrap();
    assert_eq!(rig.status_of(app.id), AppStatus::Running);
    assert_eq!(rig.pve.container_running(101), Some(true));
}

#[tokio::test]
async fn start_requires_stopped() {
    let rig = TestRig::new();
    let app = rig.seed_running_app("app01", 101);
    let ctx = ctx_for(&rig, app.id);
    let err = start(&ctx).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StateInvalid);
}

#[tokio::test]
async fn restart_never_skips_the_stop() {
    let rig = TestRig::new();
    let app = rig.seed_running_app("app01", 101);
    let ctx = ctx_for(&rig, app.id);

    restart(&ctx).await.unwrap();
    assert_eq!(rig.status_of(app.id), AppStatus::Running);
    let shutdowns = rig.pve.calls_matching("shutdown_lxc").len();
    let starts = rig.pve.calls_matching("start_lxc").len();
    assert_eq!(shutdowns, 1);
    assert_eq!(starts, 1);
}

#[tokio::test]
async fn delete_removes_container_row_and_ports() {
    let rig = TestRig::new();
    let app = rig.seed_running_app("app01", 101);
    let ctx = ctx_for(&rig, app.id);

    delete(&ctx).await.unwrap();

    assert!(rig.deps.store.get_app(app.id).is_err());
    assert!(!rig.pve.container_exists(101));
    // the freed pair is immediately reusable
    let next = rig.seed_app("app02");
    let pair = rig
        .deps
        .store
        .allocate_ports(next.id, rig.deps.config.public_ports, rig.deps.config.internal_ports)
        .unwrap();
    assert_eq!(pair, (30000, 40000));
}

#[tokio::test]
async fn delete_survives_a_broken_container() {
    let rig = TestRig::new();
    let app = rig.seed_running_app("app01", 101);
    rig.pve.fail_once("stop_lxc", || ph_core::Error::Unreachable("node flapping".into()));
    let ctx = ctx_for(&rig, app.id);

    delete(&ctx).await.unwrap();
    assert!(rig.deps.store.get_app(app.id).is_err());
    // warnings survive the cascade in the audit trail
    let audit = rig.deps.store.audit_entries();
    let entry = audit.iter().find(|e| e.action == "delete").unwrap();
    assert!(entry.details.as_ref().unwrap()["warnings"]
        .as_array()
        .map(|w| !w.is_empty())
        .unwrap_or(false));
}

#[tokio::test]
async fn deleting_the_last_app_tears_the_appliance_down() {
    let rig = TestRig::new();
    let host = rig.deps.store.get_host(ph_core::HostId::from_string("hst-1")).unwrap();
    crate::appliance::ensure(&rig.deps, &host).await.unwrap();
    assert!(rig.pve.container_exists(crate::appliance::APPLIANCE_VMID));

    let first = rig.seed_running_app("app01", 101);
    let second = rig.seed_running_app("app02", 102);

    // other apps still connected: the appliance stays
    delete(&ctx_for(&rig, first.id)).await.unwrap();
    assert!(rig.pve.container_exists(crate::appliance::APPLIANCE_VMID));

    // last one out turns off the lights
    delete(&ctx_for(&rig, second.id)).await.unwrap();
    assert!(!rig.pve.container_exists(crate::appliance::APPLIANCE_VMID));
    assert!(rig
        .exec
        .commands()
        .iter()
        .any(|(_, c)| c.contains("ifdown appliance-lan")));
}

#[tokio::test]
async fn delete_of_errored_row_without_container() {
    let rig = TestRig::new();
    let app = rig.seed_app("app01");
    rig.fail_app(app.id);
    let ctx = ctx_for(&rig, app.id);

    delete(&ctx).await.unwrap();
    assert!(rig.deps.store.get_app(app.id).is_err());
}

#[tokio::test]
async fn adopt_settles_to_container_state() {
    let rig = TestRig::new();
    rig.pve.seed_container("pve1", 200, "legacy", false);
    let app = ph_core::ApplicationBuilder::default()
        .id("app-adopt")
        .hostname("legacy01")
        .host_id("hst-1")
        .node("pve1")
        .vmid(200)
        .status(AppStatus::Adopting)
        .build();
    let app = rig.deps.store.create_application(app).unwrap();
    let ctx = ctx_for(&rig, app.id);

    adopt(&ctx).await.unwrap();
    assert_eq!(rig.status_of(app.id), AppStatus::Stopped);
    // ports were still allocated for later use
    let adopted = rig.deps.store.get_app(app.id).unwrap();
    assert!(adopted.public_port.is_some());
}

#[tokio::test]
async fn adopt_of_running_container_registers_urls() {
    let rig = TestRig::new();
    rig.pve.seed_container("pve1", 201, "legacy", true);
    let app = ph_core::ApplicationBuilder::default()
        .id("app-adopt2")
        .hostname("legacy02")
        .host_id("hst-1")
        .node("pve1")
        .vmid(201)
        .status(AppStatus::Adopting)
        .exposed(vec![3000])
        .build();
    let app = rig.deps.store.create_application(app).unwrap();
    let ctx = ctx_for(&rig, app.id);

    adopt(&ctx).await.unwrap();
    assert_eq!(rig.status_of(app.id), AppStatus::Running);
    assert!(rig.deps.store.get_app(app.id).unwrap().urls.is_some());
}
