// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The update pipeline: pre-update backup, pull, recreate, probe.
//!
//! The backup is mandatory — an update never proceeds without one. A
//! failure after the backup leaves the application in `update_failed`
//! so a restore job can roll it back; a backup failure aborts the
//! update and restores `running` untouched.

use ph_core::{AppStatus, BackupKind, Clock, Error, LogLevel, Result};
use ph_pve::{PveGateway, RemoteExec};

use crate::backup;
use crate::ctx::JobCtx;

const STEP: &str = "update";

pub async fn run<C: Clock>(ctx: &JobCtx<C>) -> Result<()> {
    let _row = ctx.deps.store.lock_row(ctx.app_id).await;

    // 1. running → updating, re-read under the row lock
    let app = ctx.app()?;
    ctx.deps.store.transition(app.id, AppStatus::Running, AppStatus::Updating)?;
    ctx.log(LogLevel::Info, STEP, "update started");

    // 2. pre-update backup; never proceed without one
    let pre_backup = backup::create_backup(ctx, BackupKind::PreUpdate).await;
    let pre_backup = match pre_backup {
        Ok(b) => b,
        Err(err) => {
            ctx.log(LogLevel::Error, STEP, format!("pre-update backup failed: {err}"));
            ctx.deps.store.transition(app.id, AppStatus::Updating, AppStatus::Running)?;
            return Err(Error::UpdateAborted(format!("pre-update backup failed: {err}")));
        }
    };
    ctx.log(
        LogLevel::Info,
        STEP,
        format!("pre-update backup {} available", pre_backup.id),
    );

    // 3–5. pull, recreate, probe
    match refresh_workload(ctx).await {
        Ok(()) => {
            ctx.deps.store.transition(app.id, AppStatus::Updating, AppStatus::Running)?;
            ctx.log(LogLevel::Info, STEP, "update complete");
            Ok(())
        }
        Err(err) => {
            ctx.log(LogLevel::Error, STEP, format!("update failed: {err}"));
            ctx.deps.store.transition(app.id, AppStatus::Updating, AppStatus::UpdateFailed)?;
            Err(err)
        }
    }
}

async fn refresh_workload<C: Clock>(ctx: &JobCtx<C>) -> Result<()> {
    let app = ctx.app()?;
    let host = ctx.deps.app_host(&app)?;
    let remote = ctx.deps.remote(&host)?;
    let gateway = ctx.deps.gateway(&host)?;
    let node = app
        .node_name
        .clone()
        .ok_or_else(|| Error::not_found("node assignment", app.id.as_str()))?;
    let vmid = app.vmid.ok_or_else(|| Error::not_found("vmid", app.id.as_str()))?;

    ctx.ensure_live()?;
    remote
        .exec_in_container(
            &node,
            vmid,
            "cd /root && docker compose pull",
            ctx.deps.config.pull_timeout,
            false,
        )
        .await?;

    ctx.ensure_live()?;
    remote
        .exec_in_container(
            &node,
            vmid,
            "cd /root && docker compose up -d --remove-orphans",
            ctx.deps.config.up_timeout,
            false,
        )
        .await?;

    // health probe, best effort against the public URL
    ctx.sleep(ctx.deps.config.probe_delay).await?;
    match app.urls.as_ref().map(|u| u.url.clone()) {
        None => {
            ctx.log(
                LogLevel::Warning,
                STEP,
                "no URL known, skipping health probe",
            );
        }
        Some(url) => {
            let status = gateway.http_probe(&url).await?;
            if !(200..400).contains(&status) {
                return Err(Error::UpdateAborted(format!(
                    "health probe returned HTTP {status}"
                )));
            }
            ctx.log(LogLevel::Info, STEP, format!("health probe HTTP {status}"));
        }
    }
    Ok(())
}

#[cfg(test)]
#[path = "update_tests.rs"]
mod tests;
