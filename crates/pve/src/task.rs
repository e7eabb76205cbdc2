// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Waiting on long-running PVE tasks.

use std::time::Duration;

use ph_core::{Error, Result};

use crate::gateway::PveGateway;

/// How many trailing log lines to attach to a failed task.
const FAILURE_TAIL_LINES: usize = 10;

#[derive(Debug, Clone)]
pub struct WaitOptions {
    /// Poll interval; 2 s in production, milliseconds in tests.
    pub interval: Duration,
    pub deadline: Duration,
}

impl WaitOptions {
    pub fn with_deadline(deadline: Duration) -> Self {
        Self { interval: Duration::from_secs(2), deadline }
    }
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self::with_deadline(Duration::from_secs(300))
    }
}

/// Poll `upid` until it stops. `OK` resolves; any other exit status
/// fails with the task's log tail attached for diagnosis.
pub async fn wait_for_task(
    gateway: &dyn PveGateway,
    node: &str,
    upid: &str,
    opts: &WaitOptions,
) -> Result<()> {
    let started = tokio::time::Instant::now();
    loop {
        if started.elapsed() > opts.deadline {
            return Err(Error::timeout(format!("task {upid}"), opts.deadline));
        }

        let status = gateway.task_status(node, upid).await?;
        if status.is_stopped() {
            if status.is_ok() {
                return Ok(());
            }
            let reason = status.exitstatus.unwrap_or_else(|| "unknown".into());
            let tail = gateway
                .task_log_tail(node, upid, FAILURE_TAIL_LINES)
                .await
                .unwrap_or_default();
            tracing::warn!(node, upid, %reason, "pve task failed");
            return Err(Error::TaskFailed { task: upid.to_string(), reason, tail });
        }

        tokio::time::sleep(opts.interval).await;
    }
}

#[cfg(test)]
#[path = "task_tests.rs"]
mod tests;
