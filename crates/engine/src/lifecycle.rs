// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Simple lifecycle jobs: start, stop, restart, delete, adopt.
//!
//! Start/stop are thin wrappers over the gateway plus a settling
//! delay. Delete is deliberately tolerant: it keeps going past a
//! broken container, accumulates warnings, and always removes the row
//! once the container is confirmed gone.

use std::time::Duration;

use ph_core::{AppStatus, Clock, Error, LogLevel, Result};
use ph_pve::{wait_for_task, PveGateway, RemoteExec};

use crate::appliance;
use crate::ctx::JobCtx;
use crate::deploy;

pub async fn start<C: Clock>(ctx: &JobCtx<C>) -> Result<()> {
    let _row = ctx.deps.store.lock_row(ctx.app_id).await;
    let app = ctx.app()?;
    if app.status != AppStatus::Stopped {
        return Err(Error::state_invalid(app.status, "start"));
    }
    let (gateway, node, vmid) = resolve(ctx).await?;

    let upid = gateway.start_lxc(&node, vmid).await?;
    wait_for_task(&*gateway, &node, &upid, &deploy::wait_opts(ctx)).await?;
    ctx.sleep(ctx.deps.config.post_start_delay).await?;

    ctx.deps.store.transition(app.id, AppStatus::Stopped, AppStatus::Running)?;
    ctx.log(LogLevel::Info, "start", "container started");
    Ok(())
}

pub async fn stop<C: Clock>(ctx: &JobCtx<C>) -> Result<()> {
    let _row = ctx.deps.store.lock_row(ctx.app_id).await;
    let app = ctx.app()?;
    if app.status != AppStatus::Running {
        return Err(Error::state_invalid(app.status, "stop"));
    }
    let (gateway, node, vmid) = resolve(ctx).await?;

    let upid = gateway.shutdown_lxc(&node, vmid).await?;
    wait_for_task(&*gateway, &node, &upid, &deploy::wait_opts(ctx)).await?;

    ctx.deps.store.transition(app.id, AppStatus::Running, AppStatus::Stopped)?;
    ctx.log(LogLevel::Info, "stop", "container stopped");
    Ok(())
}

/// Stop then start, never skipping the stop.
pub async fn restart<C: Clock>(ctx: &JobCtx<C>) -> Result<()> {
    let _row = ctx.deps.store.lock_row(ctx.app_id).await;
    let app = ctx.app()?;
    if app.status != AppStatus::Running {
        return Err(Error::state_invalid(app.status, "restart"));
    }
    let (gateway, node, vmid) = resolve(ctx).await?;

    let upid = gateway.shutdown_lxc(&node, vmid).await?;
    wait_for_task(&*gateway, &node, &upid, &deploy::wait_opts(ctx)).await?;
    ctx.deps.store.transition(app.id, AppStatus::Running, AppStatus::Stopped)?;

    ctx.sleep(Duration::from_millis(500).min(ctx.deps.config.post_start_delay)).await?;

    let upid = gateway.start_lxc(&node, vmid).await?;
    wait_for_task(&*gateway, &node, &upid, &deploy::wait_opts(ctx)).await?;
    ctx.sleep(ctx.deps.config.post_start_delay).await?;
    ctx.deps.store.transition(app.id, AppStatus::Stopped, AppStatus::Running)?;
    ctx.log(LogLevel::Info, "restart", "container restarted");
    Ok(())
}

/// Delete must finish even when the container is half-broken.
pub async fn delete<C: Clock>(ctx: &JobCtx<C>) -> Result<()> {
    let _row = ctx.deps.store.lock_row(ctx.app_id).await;
    let app = ctx.app()?;
    // host rows cannot be deleted while applications reference them
    let host = ctx.deps.app_host(&app)?;
    ctx.deps.store.transition(app.id, app.status, AppStatus::Removing)?;
    ctx.log(LogLevel::Info, "delete", "removal started");

    let mut warnings: Vec<String> = Vec::new();

    if let (Some(vmid), Some(node)) = (app.vmid, app.node_name.clone()) {
        let gateway = ctx.deps.gateway(&host)?;

        // stop, then poll until the container reports stopped
        match gateway.stop_lxc(&node, vmid).await {
            Ok(upid) => {
                if let Err(err) =
                    wait_for_task(&*gateway, &node, &upid, &deploy::wait_opts(ctx)).await
                {
                    warnings.push(format!("stop task: {err}"));
                }
            }
            Err(Error::NotFound { .. }) => {}
            Err(err) => warnings.push(format!("stop: {err}")),
        }
        if let Err(err) = poll_until_stopped(ctx, &*gateway, &node, vmid).await {
            warnings.push(format!("stop confirmation: {err}"));
        }

        match gateway.delete_lxc(&node, vmid, true).await {
            Ok(upid) => {
                if let Err(err) =
                    wait_for_task(&*gateway, &node, &upid, &deploy::wait_opts(ctx)).await
                {
                    warnings.push(format!("destroy task: {err}"));
                }
            }
            Err(Error::NotFound { .. }) => {}
            Err(err) => warnings.push(format!("destroy: {err}")),
        }

        // best-effort vhost removal; never provisions the appliance
        // just to remove a site file
        if let Some(plan) = ctx.deps.appliance.cached_plan().await {
            if let Some(info) = plan.proxy {
                if let Err(err) =
                    appliance::remove_vhost(&ctx.deps, &host, &info, &app.hostname).await
                {
                    warnings.push(format!("vhost removal: {err}"));
                }
            }
        }
    }

    for warning in &warnings {
        ctx.log(LogLevel::Warning, "delete", warning.clone());
        tracing::warn!(app_id = %app.id, %warning, "delete continued past failure");
    }
    // warnings outlive the cascade through the audit trail
    ctx.deps.store.audit(ph_core::AuditEntry {
        actor: "system".into(),
        action: "delete".into(),
        resource_kind: "application".into(),
        resource_id: app.id.as_str().to_string(),
        details: (!warnings.is_empty())
            .then(|| serde_json::json!({ "warnings": warnings })),
        client_ip: None,
        timestamp_ms: ctx.deps.clock.epoch_ms(),
    });

    ctx.deps.store.release_ports(app.id)?;
    ctx.deps.store.delete_application(app.id)?;
    tracing::info!(app_id = %app.id, hostname = %app.hostname, "application removed");

    // last application gone → the appliance and bridge go too
    match appliance::teardown_if_unused(&ctx.deps, &host).await {
        Ok(true) => tracing::info!(host = %host.display_name, "network appliance torn down"),
        Ok(false) => {}
        Err(err) => {
            tracing::warn!(host = %host.display_name, error = %err, "appliance teardown failed")
        }
    }
    Ok(())
}

async fn poll_until_stopped<C: Clock>(
    ctx: &JobCtx<C>,
    gateway: &dyn PveGateway,
    node: &str,
    vmid: u32,
) -> Result<()> {
    let deadline = tokio::time::Instant::now() + ctx.deps.config.stop_poll_window;
    loop {
        match gateway.lxc_status(node, vmid).await {
            Ok(info) if !info.is_running() => return Ok(()),
            Err(Error::NotFound { .. }) => return Ok(()),
            Ok(_) => {}
            Err(err) => return Err(err),
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(Error::timeout("waiting for stopped", ctx.deps.config.stop_poll_window));
        }
        ctx.sleep(ctx.deps.config.task_poll_interval).await?;
    }
}

/// Import an existing container. The row (status `adopting`, vmid set)
/// already exists; this job wires ports, optionally the vhost, and
/// settles the status to the container's actual state.
pub async fn adopt<C: Clock>(ctx: &JobCtx<C>) -> Result<()> {
    let _row = ctx.deps.store.lock_row(ctx.app_id).await;
    let app = ctx.app()?;
    if app.status != AppStatus::Adopting {
        return Err(Error::state_invalid(app.status, "adopt"));
    }
    let (gateway, node, vmid) = resolve(ctx).await?;

    crate::alloc::ensure_ports(&ctx.deps, app.id)?;
    let info = gateway.lxc_status(&node, vmid).await?;

    if info.is_running() {
        let host = ctx.deps.app_host(&app)?;
        let remote = ctx.deps.remote(&host)?;
        let plan = appliance::ensure(&ctx.deps, &host).await?;
        let backend_port = app.primary_port().unwrap_or(80);

        let out = remote
            .exec_in_container(
                &node,
                vmid,
                "ip -4 addr show eth0",
                ctx.deps.config.exec_timeout,
                true,
            )
            .await?;
        let urls = match (appliance::parse_inet(&out.stdout), &plan.proxy) {
            (Some(ip), Some(proxy)) => {
                let refreshed = ctx.app()?;
                let (public, internal) = (
                    refreshed.public_port.unwrap_or_default(),
                    refreshed.internal_port.unwrap_or_default(),
                );
                appliance::register_vhost(
                    &ctx.deps,
                    &host,
                    proxy,
                    &app.hostname,
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
            ctx.deps.store.update_app(app.id, |a| a.urls = Some(urls.clone()))?;
        }
        ctx.deps.store.transition(app.id, AppStatus::Adopting, AppStatus::Running)?;
    } else {
        ctx.deps.store.transition(app.id, AppStatus::Adopting, AppStatus::Stopped)?;
    }
    ctx.log(LogLevel::Info, "adopt", format!("adopted CT {vmid}"));
    Ok(())
}

/// Adoption rollback: the shell row goes away, ports and all.
pub(crate) async fn on_adopt_failure<C: Clock>(ctx: &JobCtx<C>, err: &Error) {
    ctx.log(LogLevel::Error, "adopt", format!("adoption failed: {err}"));
    if let Ok(app) = ctx.app() {
        let _ = ctx.deps.store.release_ports(app.id);
        let _ = ctx.deps.store.delete_application(app.id);
    }
}

async fn resolve<C: Clock>(
    ctx: &JobCtx<C>,
) -> Result<(std::sync::Arc<dyn PveGateway>, String, u32)> {
    let app = ctx.app()?;
    let host = ctx.deps.app_host(&app)?;
    let gateway = ctx.deps.gateway(&host)?;
    let node = app
        .node_name
        .clone()
        .ok_or_else(|| Error::not_found("node assignment", app.id.as_str()))?;
    let vmid = app.vmid.ok_or_else(|| Error::not_found("vmid", app.id.as_str()))?;
    Ok((gateway, node, vmid))
}

#[cfg(test)]
#[path = "lifecycle_tests.rs"]
mod tests;
