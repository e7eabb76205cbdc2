// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cloning a managed application.
//!
//! Zero-downtime for a running source: a temporary snapshot is taken,
//! the clone is cut from it, and the snapshot is deleted afterwards no
//! matter how the clone went. A snapshot that cannot be deleted is
//! logged with the exact manual cleanup command — the job never exits
//! with a live temporary snapshot silently.
//!
//! A full clone copies the source filesystem including the workload,
//! so no compose step runs here: patch the config, start, re-register
//! the vhost.

use ph_core::{AppStatus, Clock, Error, LogLevel, Result};
use ph_pve::{wait_for_task, PveGateway, RemoteExec};

use crate::alloc;
use crate::appliance;
use crate::ctx::JobCtx;
use crate::deploy;

const STEP: &str = "clone";

/// Clone job, running on the freshly created shell row (`cloning`).
pub async fn run<C: Clock>(ctx: &JobCtx<C>, source_id: ph_core::AppId) -> Result<()> {
    let _row = ctx.deps.store.lock_row(ctx.app_id).await;

    let clone_row = ctx.app()?;
    let source = ctx.deps.store.get_app(source_id)?;
    if !matches!(source.status, AppStatus::Running | AppStatus::Stopped) {
        return Err(Error::state_invalid(source.status, "clone"));
    }
    let source_vmid =
        source.vmid.ok_or_else(|| Error::not_found("vmid", source.id.as_str()))?;
    let node = source
        .node_name
        .clone()
        .ok_or_else(|| Error::not_found("node assignment", source.id.as_str()))?;

    let host = ctx.deps.app_host(&source)?;
    let gateway = ctx.deps.gateway(&host)?;
    let remote = ctx.deps.remote(&host)?;

    // fresh resources for the clone
    alloc::ensure_ports(&ctx.deps, clone_row.id)?;
    let new_vmid = alloc::acquire_vmid(&ctx.deps, &*gateway, clone_row.id).await?;
    ctx.deps.store.update_app(clone_row.id, |a| a.node_name = Some(node.clone()))?;

    // running source + full clone → snapshot for consistency
    let snapshot = if source.status == AppStatus::Running {
        let name = format!("ph_clone_temp_{}", ctx.deps.clock.epoch_secs());
        ctx.log(LogLevel::Info, STEP, format!("taking temporary snapshot {name}"));
        let upid = gateway.snapshot(&node, source_vmid, &name).await?;
        wait_for_task(&*gateway, &node, &upid, &deploy::wait_opts(ctx)).await?;
        Some(name)
    } else {
        None
    };

    let clone_result = cut_clone(
        ctx,
        &*gateway,
        &node,
        source_vmid,
        new_vmid,
        &clone_row.hostname,
        snapshot.as_deref(),
    )
    .await;

    // finally: the temporary snapshot dies with the job, success or not
    if let Some(name) = &snapshot {
        if let Err(err) = delete_snapshot(ctx, &*gateway, &node, source_vmid, name).await {
            let cleanup = format!("pct delsnapshot {source_vmid} {name}");
            tracing::error!(
                source = %source.id,
                snapshot = %name,
                error = %err,
                "TEMPORARY SNAPSHOT LEFT BEHIND — run manually: {cleanup}"
            );
            ctx.log(
                LogLevel::Error,
                STEP,
                format!("temporary snapshot {name} not deleted; run `{cleanup}` manually"),
            );
        }
    }
    clone_result?;

    // the clone carries the workload; patch, start, publish
    deploy::apparmor_patch(&*remote, &node, new_vmid).await?;
    let upid = gateway.start_lxc(&node, new_vmid).await?;
    wait_for_task(&*gateway, &node, &upid, &deploy::wait_opts(ctx)).await?;
    ctx.sleep(ctx.deps.config.post_start_delay).await?;

    let out = remote
        .exec_in_container(
            &node,
            new_vmid,
            "ip -4 addr show eth0",
            ctx.deps.config.exec_timeout,
            true,
        )
        .await?;
    let plan = appliance::ensure(&ctx.deps, &host).await?;
    let refreshed = ctx.app()?;
    let backend_port = source.primary_port().unwrap_or(80);
    let urls = match (appliance::parse_inet(&out.stdout), &plan.proxy) {
        (Some(ip), Some(proxy)) => {
            let (public, internal) = (
                refreshed.public_port.unwrap_or_default(),
                refreshed.internal_port.unwrap_or_default(),
            );
            appliance::register_vhost(
                &ctx.deps,
                &host,
                proxy,
                &refreshed.hostname,
                &ip,
                backend_port,
                public,
                internal,
            )
            .await?;
            Some(ph_core::AppUrls {
                url: format!("http://{}:{}/", proxy.wan_ip, public),
                iframe_url: Some(format!("http://{}:{}/", proxy.wan_ip, internal)),
                direct_access: false,
            })
        }
        (Some(ip), None) => Some(ph_core::AppUrls {
            url: format!("http://{ip}:{backend_port}"),
            iframe_url: None,
            direct_access: true,
        }),
        (None, _) => None,
    };
    if let Some(urls) = urls {
        ctx.deps.store.update_app(clone_row.id, |a| a.urls = Some(urls.clone()))?;
    }

    ctx.deps.store.transition(clone_row.id, AppStatus::Cloning, AppStatus::Running)?;
    ctx.log(LogLevel::Info, STEP, format!("clone of {} running as CT {new_vmid}", source.hostname));
    Ok(())
}

async fn cut_clone<C: Clock>(
    ctx: &JobCtx<C>,
    gateway: &dyn PveGateway,
    node: &str,
    source_vmid: u32,
    new_vmid: u32,
    hostname: &str,
    snapshot: Option<&str>,
) -> Result<()> {
    ctx.ensure_live()?;
    let upid = gateway
        .clone_lxc(node, source_vmid, new_vmid, hostname, true, snapshot)
        .await?;
    wait_for_task(gateway, node, &upid, &deploy::wait_opts(ctx)).await
}

async fn delete_snapshot<C: Clock>(
    ctx: &JobCtx<C>,
    gateway: &dyn PveGateway,
    node: &str,
    vmid: u32,
    name: &str,
) -> Result<()> {
    let upid = gateway.delete_snapshot(node, vmid, name).await?;
    wait_for_task(gateway, node, &upid, &deploy::wait_opts(ctx)).await
}

/// Clone rollback: destroy the clone container if it was created,
/// release the ports, delete the shell row.
pub(crate) async fn on_terminal_failure<C: Clock>(ctx: &JobCtx<C>, err: &Error) {
    ctx.log(LogLevel::Error, STEP, format!("clone failed: {err}"));
    let Ok(app) = ctx.app() else { return };

    if let (Some(vmid), Some(node)) = (app.vmid, app.node_name.clone()) {
        if let Ok(host) = ctx.deps.app_host(&app) {
            if let Ok(gateway) = ctx.deps.gateway(&host) {
                if gateway.lxc_status(&node, vmid).await.is_ok() {
                    if let Ok(upid) = gateway.stop_lxc(&node, vmid).await {
                        let _ =
                            wait_for_task(&*gateway, &node, &upid, &deploy::wait_opts(ctx)).await;
                    }
                    if let Ok(upid) = gateway.delete_lxc(&node, vmid, true).await {
                        let _ =
                            wait_for_task(&*gateway, &node, &upid, &deploy::wait_opts(ctx)).await;
                    }
                }
            }
        }
    }
    let _ = ctx.deps.store.release_ports(app.id);
    let _ = ctx.deps.store.delete_application(app.id);
}

#[cfg(test)]
#[path = "clone_app_tests.rs"]
mod tests;
