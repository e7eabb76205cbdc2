// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::ctx::JobCtx;
use crate::test_helpers::TestRig;
use ph_core::{AppStatus, AppUrls, ErrorKind};
use tokio_util::sync::CancellationToken;

fn ctx_for(rig: &TestRig, id: ph_core::AppId) -> JobCtx<ph_core::FakeClock> {
    JobCtx::new(rig.deps.clone(), id, CancellationToken::new())
}

fn with_url(rig: &TestRig, id: ph_core::AppId) {
    rig.deps
        .store
        .update_app(id, |a| {
            a.urls = Some(AppUrls {
                url: "http://10.0.0.42:30000/".into(),
                iframe_url: Some("http://10.0.0.42:40000/".into()),
                direct_access: false,
            })
        })
        .unwrap();
}

#[tokio::test]
async fn happy_update_backs_up_pulls_recreates_and_probes() {
    let rig = TestRig::new();
    let app = rig.seed_running_app("app01", 101);
    with_url(&rig, app.id);
    let ctx = ctx_for(&rig, app.id);

    run(&ctx).await.unwrap();

    assert_eq!(rig.status_of(app.id), AppStatus::Running);
    // exactly one pre-update backup, available
    let backups = rig.deps.store.backups_of(app.id);
    assert_eq!(backups.len(), 1);
    assert_eq!(backups[0].status, ph_core::BackupStatus::Available);
    assert_eq!(backups[0].kind, ph_core::BackupKind::PreUpdate);
    // the recreate ran with orphan removal
    assert!(!rig.exec.commands_containing("docker compose up -d --remove-orphans").is_empty());
    // the probe hit the public URL
    assert!(!rig.pve.calls_matching("http_probe").is_empty());
}

#[tokio::test]
async fn backup_failure_aborts_and_restores_running() {
    let rig = TestRig::new();
    let app = rig.seed_running_app("app01", 101);
    rig.pve.fail_once("backup", || ph_core::Error::Unreachable("vzdump refused".into()));
    let ctx = ctx_for(&rig, app.id);

    let err = run(&ctx).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UpdateAborted);
    assert_eq!(rig.status_of(app.id), AppStatus::Running);
    // no pull was attempted without a backup
    assert!(rig.exec.commands_containing("docker compose pull").is_empty());
}

#[tokio::test]
async fn pull_failure_leaves_update_failed() {
    let rig = TestRig::new();
    let app = rig.seed_running_app("app01", 101);
    with_url(&rig, app.id);
    rig.exec.fail_matching("docker compose pull", || ph_core::Error::ExecFailed {
        exit: 1,
        stderr: "manifest unknown".into(),
    });
    let ctx = ctx_for(&rig, app.id);

    run(&ctx).await.unwrap_err();
    assert_eq!(rig.status_of(app.id), AppStatus::UpdateFailed);
    // the pre-update backup survives for the restore path
    assert_eq!(rig.deps.store.backups_of(app.id).len(), 1);
}

#[tokio::test]
async fn unhealthy_probe_fails_the_update() {
    let rig = TestRig::new();
    let app = rig.seed_running_app("app01", 101);
    with_url(&rig, app.id);
    rig.pve.push_probe_status(502);
    let ctx = ctx_for(&rig, app.id);

    let err = run(&ctx).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UpdateAborted);
    assert_eq!(rig.status_of(app.id), AppStatus::UpdateFailed);
}

#[tokio::test]
async fn missing_url_skips_probe_with_warning() {
    let rig = TestRig::new();
    let app = rig.seed_running_app("app01", 101);
    let ctx = ctx_for(&rig, app.id);

    run(&ctx).await.unwrap();
    assert_eq!(rig.status_of(app.id), AppStatus::Running);
    assert!(rig.pve.calls_matching("http_probe").is_empty());
    let warned = rig
        .deps
        .store
        .deploy_logs(app.id)
        .iter()
        .any(|l| l.level == ph_core::LogLevel::Warning && l.message.contains("skipping health probe"));
    assert!(warned);
}

#[tokio::test]
async fn update_requires_running() {
    let rig = TestRig::new();
    let app = rig.seed_app("app01");
    let ctx = ctx_for(&rig, app.id);
    let err = run(&ctx).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StateInvalid);
}

#[tokio::test]
async fn redirect_probe_counts_as_healthy() {
    let rig = TestRig::new();
    let app = rig.seed_running_app("app01", 101);
    with_url(&rig, app.id);
    rig.pve.push_probe_status(302);
    let ctx = ctx_for(&rig, app.id);

    run(&ctx).await.unwrap();
    assert_eq!(rig.status_of(app.id), AppStatus::Running);
}
