// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The janitor: stuck-transition sweep.
//!
//! A job that died mid-flight leaves its row in a transitional state
//! forever. The janitor flips such rows to `error` once they are older
//! than the stuck threshold — under the row lock, re-checking that the
//! status is still transitional, and without ever touching the
//! cluster.

use ph_core::{AppStatus, Clock, LogLevel, Result};

use crate::ctx::EngineDeps;

#[derive(Debug, Default, Clone)]
pub struct JanitorReport {
    pub examined: usize,
    pub failed: usize,
}

pub async fn run_once<C: Clock>(deps: &EngineDeps<C>) -> Result<JanitorReport> {
    let now = deps.clock.epoch_ms();
    let threshold_ms = deps.config.stuck_threshold.as_millis() as u64;
    let cutoff = now.saturating_sub(threshold_ms);

    let mut report = JanitorReport::default();
    for candidate in deps.store.stale_transitional(cutoff) {
        report.examined += 1;
        let _row = deps.store.lock_row(candidate.id).await;

        // re-read under the lock: a job may have finished meanwhile
        let Ok(current) = deps.store.get_app(candidate.id) else { continue };
        if !current.status.is_transitional() || current.state_changed_at_ms >= cutoff {
            continue;
        }

        let stuck_for = ph_core::format_elapsed_ms(now - current.state_changed_at_ms);
        let previous = current.status;
        if deps.store.transition(current.id, previous, AppStatus::Error).is_ok() {
            report.failed += 1;
            deps.store.log_deploy(
                current.id,
                LogLevel::Error,
                "janitor",
                format!(
                    "stuck in {previous} for {stuck_for} (since {}), marked error",
                    ph_core::format_epoch_ms(current.state_changed_at_ms)
                ),
            );
            tracing::warn!(
                app_id = %current.id,
                hostname = %current.hostname,
                %previous,
                %stuck_for,
                "janitor failed stuck application"
            );
        }
    }
    Ok(report)
}

#[cfg(test)]
#[path = "janitor_tests.rs"]
mod tests;
