// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::test_helpers::TestRig;
use ph_core::AppStatus;

async fn wait_idle<C: Clock>(runner: &JobRunner<C>) {
    runner.drain().await;
}

#[tokio::test]
async fn deploy_job_runs_to_completion() {
    let rig = TestRig::new();
    let app = rig.seed_app("app01");
    let runner = JobRunner::new(rig.deps.clone());

    runner.submit(app.id, JobKind::Deploy).unwrap();
    wait_idle(&runner).await;

    assert_eq!(rig.status_of(app.id), AppStatus::Running);
    // the job record is cleared on success
    assert!(rig.deps.store.job_for_app(app.id).is_none());
}

#[tokio::test]
async fn second_submit_for_same_app_conflicts() {
    let rig = TestRig::new();
    let app = rig.seed_running_app("app01", 101);
    let runner = JobRunner::new(rig.deps.clone());

    runner.submit(app.id, JobKind::Stop).unwrap();
    let err = runner.submit(app.id, JobKind::Stop).unwrap_err();
    assert_eq!(err.kind(), ph_core::ErrorKind::Conflict);
    wait_idle(&runner).await;
}

#[tokio::test]
async fn jobs_for_different_apps_run_independently() {
    let rig = TestRig::new();
    let a = rig.seed_running_app("app01", 101);
    let b = rig.seed_running_app("app02", 102);
    let runner = JobRunner::new(rig.deps.clone());

    runner.submit(a.id, JobKind::Stop).unwrap();
    runner.submit(b.id, JobKind::Stop).unwrap();
    wait_idle(&runner).await;

    assert_eq!(rig.status_of(a.id), AppStatus::Stopped);
    assert_eq!(rig.status_of(b.id), AppStatus::Stopped);
}

#[tokio::test]
async fn transient_deploy_failure_is_retried_until_success() {
    let rig = TestRig::new();
    // first create_lxc attempt dies on a transient connection error
    rig.pve
        .fail_once("create_lxc", || ph_core::Error::Unreachable("connection reset".into()));
    let app = rig.seed_app("app01");
    let runner = JobRunner::new(rig.deps.clone());

    runner.submit(app.id, JobKind::Deploy).unwrap();
    wait_idle(&runner).await;

    assert_eq!(rig.status_of(app.id), AppStatus::Running);
    assert_eq!(rig.pve.calls_matching("create_lxc").len(), 2);
}

#[tokio::test]
async fn exhausted_retries_leave_error_with_recorded_cause() {
    let rig = TestRig::new();
    for _ in 0..3 {
        rig.pve
            .fail_once("create_lxc", || ph_core::Error::Unreachable("connection reset".into()));
    }
    let app = rig.seed_app("app01");
    let runner = JobRunner::new(rig.deps.clone());

    let job_id = runner.submit(app.id, JobKind::Deploy).unwrap();
    wait_idle(&runner).await;

    assert_eq!(rig.status_of(app.id), AppStatus::Error);
    // ports were released, row kept for inspection
    let failed = rig.deps.store.get_app(app.id).unwrap();
    assert_eq!(failed.public_port, None);
    let record = rig.deps.store.job_for_app(app.id).unwrap();
    assert_eq!(record.job_id, job_id);
    assert_eq!(record.attempt, 3);
    assert!(record.last_error.as_ref().unwrap().contains("connection reset"));
}

#[tokio::test]
async fn non_transient_failure_is_not_retried() {
    let rig = TestRig::new();
    rig.exec.fail_matching("docker compose pull", || ph_core::Error::ExecFailed {
        exit: 1,
        stderr: "bad manifest".into(),
    });
    let app = rig.seed_app("app01");
    let runner = JobRunner::new(rig.deps.clone());

    runner.submit(app.id, JobKind::Deploy).unwrap();
    wait_idle(&runner).await;

    assert_eq!(rig.status_of(app.id), AppStatus::Error);
    assert_eq!(rig.pve.calls_matching("create_lxc").len(), 1);
}

#[tokio::test]
async fn after_completion_the_same_app_accepts_new_jobs() {
    let rig = TestRig::new();
    let app = rig.seed_running_app("app01", 101);
    let runner = JobRunner::new(rig.deps.clone());

    runner.submit(app.id, JobKind::Stop).unwrap();
    wait_idle(&runner).await;
    runner.submit(app.id, JobKind::Start).unwrap();
    wait_idle(&runner).await;

    assert_eq!(rig.status_of(app.id), AppStatus::Running);
}

#[tokio::test]
async fn shutdown_cancels_backoff_sleep() {
    let rig = TestRig::new();
    // force endless transient failures so the job sits in backoff
    for _ in 0..10 {
        rig.pve.fail_once("create_lxc", || ph_core::Error::Unreachable("reset".into()));
    }
    let app = rig.seed_app("app01");
    let runner = JobRunner::new(rig.deps.clone());
    runner.submit(app.id, JobKind::Deploy).unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    runner.shutdown();
    // must drain promptly rather than sleeping out the backoff
    tokio::time::timeout(std::time::Duration::from_secs(2), runner.drain())
        .await
        .expect("drain timed out after shutdown");
}
