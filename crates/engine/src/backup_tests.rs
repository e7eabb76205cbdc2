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
async fn manual_backup_records_archive_metadata() {
    let rig = TestRig::new();
    let app = rig.seed_running_app("app01", 101);
    let ctx = ctx_for(&rig, app.id);

    run_backup(&ctx, BackupKind::Manual).await.unwrap();

    let backups = rig.deps.store.backups_of(app.id);
    assert_eq!(backups.len(), 1);
    let b = &backups[0];
    assert_eq!(b.status, BackupStatus::Available);
    assert!(b.filename.as_ref().unwrap().starts_with("vzdump-lxc-101-"));
    assert!(b.size_bytes.is_some());
    assert!(b.completed_at_ms.is_some());
    // vzdump ran in snapshot mode with zstd
    assert!(rig.pve.calls_matching("backup").iter().any(|c| c.contains("snapshot zstd")));
}

#[tokio::test]
async fn failed_backup_row_keeps_the_error() {
    let rig = TestRig::new();
    let app = rig.seed_running_app("app01", 101);
    rig.pve.fail_once("backup", || ph_core::Error::Unreachable("storage offline".into()));
    let ctx = ctx_for(&rig, app.id);

    run_backup(&ctx, BackupKind::Manual).await.unwrap_err();

    let backups = rig.deps.store.backups_of(app.id);
    assert_eq!(backups[0].status, BackupStatus::Failed);
    assert!(backups[0].error_message.as_ref().unwrap().contains("storage offline"));
}

#[tokio::test]
async fn restore_from_update_failed_returns_to_running() {
    let rig = TestRig::new();
    let app = rig.seed_running_app("app01", 101);

    // take a backup, then drive the app into update_failed
    let ctx = ctx_for(&rig, app.id);
    let backup = create_backup(&ctx, BackupKind::PreUpdate).await.unwrap();
    rig.deps
        .store
        .transition(app.id, AppStatus::Running, AppStatus::Updating)
        .unwrap();
    rig.deps
        .store
        .transition(app.id, AppStatus::Updating, AppStatus::UpdateFailed)
        .unwrap();

    run_restore(&ctx, backup.id).await.unwrap();

    assert_eq!(rig.status_of(app.id), AppStatus::Running);
    assert_eq!(rig.pve.container_running(101), Some(true));
    assert_eq!(rig.deps.store.get_backup(backup.id).unwrap().status, BackupStatus::Available);
    assert!(!rig.pve.calls_matching("restore").is_empty());
}

#[tokio::test]
async fn restore_rejects_foreign_backup() {
    let rig = TestRig::new();
    let a = rig.seed_running_app("app01", 101);
    let b = rig.seed_running_app("app02", 102);

    let ctx_a = ctx_for(&rig, a.id);
    let backup_a = create_backup(&ctx_a, BackupKind::Manual).await.unwrap();

    let ctx_b = ctx_for(&rig, b.id);
    let err = run_restore(&ctx_b, backup_a.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn restore_requires_an_available_backup() {
    let rig = TestRig::new();
    let app = rig.seed_running_app("app01", 101);
    rig.pve.fail_once("backup", || ph_core::Error::Unreachable("boom".into()));

    let ctx = ctx_for(&rig, app.id);
    create_backup(&ctx, BackupKind::Manual).await.unwrap_err();
    let failed = rig.deps.store.backups_of(app.id).remove(0);

    let err = run_restore(&ctx, failed.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StateInvalid);
}
