// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Backup and restore jobs.
//!
//! Backups run vzdump in snapshot mode with zstd compression and track
//! the resulting archive on a Backup row. Restore stops the container,
//! replays the archive over the same VMID, and starts it again, with
//! the extended deadlines cluster-sized archives need.

use ph_core::{
    AppStatus, Backup, BackupId, BackupKind, BackupStatus, Clock, Error, LogLevel, Result,
};
use ph_pve::{wait_for_task, PveGateway, WaitOptions};

use crate::ctx::JobCtx;

const STEP: &str = "backup";
const RESTORE_STEP: &str = "restore";

/// Run a manual (or pre-update) backup for the context's application.
pub async fn run_backup<C: Clock>(ctx: &JobCtx<C>, kind: BackupKind) -> Result<()> {
    let _row = ctx.deps.store.lock_row(ctx.app_id).await;
    create_backup_inner(ctx, kind).await.map(|_| ())
}

/// Create a backup without taking the row lock — the update pipeline
/// calls this while already holding it.
pub(crate) async fn create_backup<C: Clock>(
    ctx: &JobCtx<C>,
    kind: BackupKind,
) -> Result<Backup> {
    create_backup_inner(ctx, kind).await
}

async fn create_backup_inner<C: Clock>(ctx: &JobCtx<C>, kind: BackupKind) -> Result<Backup> {
    let app = ctx.app()?;
    let host = ctx.deps.app_host(&app)?;
    let gateway = ctx.deps.gateway(&host)?;
    let node = app
        .node_name
        .clone()
        .ok_or_else(|| Error::not_found("node assignment", app.id.as_str()))?;
    let vmid = app.vmid.ok_or_else(|| Error::not_found("vmid", app.id.as_str()))?;
    let storage = ctx.deps.config.backup_storage.clone();

    let row = ctx.deps.store.insert_backup(Backup {
        id: BackupId::new(),
        application_id: app.id,
        filename: None,
        storage_name: storage.clone(),
        size_bytes: None,
        kind,
        status: BackupStatus::Creating,
        error_message: None,
        created_at_ms: ctx.deps.clock.epoch_ms(),
        completed_at_ms: None,
    });
    ctx.log(LogLevel::Info, STEP, format!("backup {} started", row.id));

    let result = async {
        ctx.ensure_live()?;
        let upid = gateway.backup(&node, vmid, &storage, "snapshot", "zstd").await?;
        wait_for_task(
            &*gateway,
            &node,
            &upid,
            &WaitOptions {
                interval: ctx.deps.config.task_poll_interval,
                deadline: ctx.deps.config.backup_wait,
            },
        )
        .await?;

        // resolve the archive vzdump produced
        let mut volumes = gateway.list_backups(&node, &storage, Some(vmid)).await?;
        volumes.sort_by_key(|v| v.ctime.unwrap_or(0));
        volumes
            .pop()
            .ok_or_else(|| Error::not_found("backup archive", format!("CT {vmid}")))
    }
    .await;

    match result {
        Ok(volume) => {
            let now = ctx.deps.clock.epoch_ms();
            let updated = ctx.deps.store.update_backup(row.id, |b| {
                b.filename = Some(volume.filename().to_string());
                b.size_bytes = volume.size;
                b.status = BackupStatus::Available;
                b.completed_at_ms = Some(now);
            })?;
            ctx.log(
                LogLevel::Info,
                STEP,
                format!("backup {} available ({})", updated.id, volume.filename()),
            );
            Ok(updated)
        }
        Err(err) => {
            let _ = ctx.deps.store.update_backup(row.id, |b| {
                b.status = BackupStatus::Failed;
                b.error_message = Some(err.to_string());
            });
            ctx.log(LogLevel::Error, STEP, format!("backup {} failed: {err}", row.id));
            Err(err)
        }
    }
}

/// Restore the application from a stored backup. From `update_failed`
/// this is the rollback path back to `running`.
pub async fn run_restore<C: Clock>(ctx: &JobCtx<C>, backup_id: BackupId) -> Result<()> {
    let _row = ctx.deps.store.lock_row(ctx.app_id).await;

    let app = ctx.app()?;
    let from_status = app.status;
    if !matches!(
        from_status,
        AppStatus::UpdateFailed | AppStatus::Running | AppStatus::Stopped
    ) {
        return Err(Error::state_invalid(from_status, "restore"));
    }

    let backup = ctx.deps.store.get_backup(backup_id)?;
    if backup.application_id != app.id {
        return Err(Error::not_found("backup", backup_id.as_str()));
    }
    if backup.status != BackupStatus::Available {
        return Err(Error::state_invalid(from_status, format!("restore from {} backup", backup.status)));
    }
    let volid = backup
        .volid()
        .ok_or_else(|| Error::not_found("backup archive", backup_id.as_str()))?;

    let host = ctx.deps.app_host(&app)?;
    let gateway = ctx.deps.gateway(&host)?;
    let node = app
        .node_name
        .clone()
        .ok_or_else(|| Error::not_found("node assignment", app.id.as_str()))?;
    let vmid = app.vmid.ok_or_else(|| Error::not_found("vmid", app.id.as_str()))?;

    ctx.deps.store.update_backup(backup_id, |b| b.status = BackupStatus::Restoring)?;
    ctx.log(LogLevel::Info, RESTORE_STEP, format!("restoring from {volid}"));

    let opts = WaitOptions {
        interval: ctx.deps.config.task_poll_interval,
        deadline: ctx.deps.config.backup_deadline,
    };

    let result = async {
        // stop whatever is running; the archive replaces the rootfs
        if let Ok(info) = gateway.lxc_status(&node, vmid).await {
            if info.is_running() {
                let upid = gateway.stop_lxc(&node, vmid).await?;
                wait_for_task(&*gateway, &node, &upid, &opts).await?;
            }
        }

        let storage = gateway.select_storage(&node, 8).await?;
        let upid = gateway.restore(&node, vmid, &volid, &storage.storage).await?;
        wait_for_task(&*gateway, &node, &upid, &opts).await?;

        let upid = gateway.start_lxc(&node, vmid).await?;
        wait_for_task(&*gateway, &node, &upid, &opts).await?;
        Ok(())
    }
    .await;

    ctx.deps.store.update_backup(backup_id, |b| b.status = BackupStatus::Available)?;

    match result {
        Ok(()) => {
            match from_status {
                AppStatus::UpdateFailed => {
                    ctx.deps
                        .store
                        .transition(app.id, AppStatus::UpdateFailed, AppStatus::Running)?;
                }
                AppStatus::Stopped => {
                    ctx.deps.store.transition(app.id, AppStatus::Stopped, AppStatus::Running)?;
                }
                // already running, nothing to write
                _ => {}
            }
            ctx.log(LogLevel::Info, RESTORE_STEP, "restore complete");
            Ok(())
        }
        Err(err) => {
            ctx.log(LogLevel::Error, RESTORE_STEP, format!("restore failed: {err}"));
            Err(err)
        }
    }
}

#[cfg(test)]
#[path = "backup_tests.rs"]
mod tests;
