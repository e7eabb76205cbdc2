// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::fake::FakePve;
use ph_core::ErrorKind;

fn fast() -> WaitOptions {
    WaitOptions { interval: Duration::from_millis(1), deadline: Duration::from_millis(200) }
}

#[tokio::test]
async fn completed_task_resolves() {
    let pve = FakePve::single_node("pve1");
    let upid = pve.push_task_ok();
    wait_for_task(&pve, "pve1", &upid, &fast()).await.unwrap();
}

#[tokio::test]
async fn failed_task_carries_reason_and_tail() {
    let pve = FakePve::single_node("pve1");
    let upid = pve.push_task_failed("unable to create CT", vec!["extracting archive".into(), "error: no space".into()]);
    let err = wait_for_task(&pve, "pve1", &upid, &fast()).await.unwrap_err();
    match err {
        ph_core::Error::TaskFailed { reason, tail, .. } => {
            assert_eq!(reason, "unable to create CT");
            assert_eq!(tail.len(), 2);
        }
        other => panic!("expected TaskFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn pending_task_times_out() {
    let pve = FakePve::single_node("pve1");
    let upid = pve.push_task_pending();
    let err = wait_for_task(&pve, "pve1", &upid, &fast()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);
}
