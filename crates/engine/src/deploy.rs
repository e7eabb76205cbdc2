// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The deployment pipeline.
//!
//! Fourteen ordered steps from a `deploying` row to a `running`
//! application, each logged under a stable step tag. Steps that touch
//! the cluster are idempotent or pre-checked so a retried attempt does
//! not double-create; compensating cleanup runs before every retry and
//! on terminal failure.

use std::time::Duration;

use ph_core::{
    AppStatus, AppUrls, Application, CatalogApp, Clock, Error, LogLevel, ProxmoxHost, Result,
};
use ph_pve::{wait_for_task, LxcSpec, PveGateway, RemoteExec, WaitOptions};

use crate::alloc;
use crate::appliance::{self, NetworkPlan};
use crate::compose;
use crate::ctx::JobCtx;

/// Step tags, stable for log consumers.
pub mod steps {
    pub const SELECT_NODE: &str = "select_node";
    pub const ALLOCATE_PORTS: &str = "allocate_ports";
    pub const ACQUIRE_VMID: &str = "acquire_vmid";
    pub const SELECT_STORAGE: &str = "select_storage";
    pub const ENSURE_TEMPLATE: &str = "ensure_template";
    pub const LXC_CREATE: &str = "lxc_create";
    pub const LXC_CONFIGURE: &str = "lxc_configure";
    pub const LXC_START: &str = "lxc_start";
    pub const RUNTIME_SETUP: &str = "runtime_setup";
    pub const COMPOSE_WRITE: &str = "compose_write";
    pub const COMPOSE_UP: &str = "compose_up";
    pub const DISCOVER_IP: &str = "discover_ip";
    pub const REGISTER_PROXY: &str = "register_proxy";
    pub const FINALIZE: &str = "finalize";
    pub const FAILURE: &str = "failure";
}

const DEFAULT_ALPINE_TEMPLATE: &str = "alpine-3.22-default_20250617_amd64.tar.xz";

/// One deploy attempt. The caller (job runner) owns retries and
/// terminal failure handling.
pub async fn run<C: Clock>(ctx: &JobCtx<C>) -> Result<()> {
    let app = ctx.app()?;
    let host = ctx.deps.app_host(&app)?;
    let gateway = ctx.deps.gateway(&host)?;
    let remote = ctx.deps.remote(&host)?;
    let entry = ctx
        .deps
        .catalog
        .get(&app.catalog_id)
        .cloned()
        .ok_or_else(|| Error::not_found("catalog entry", app.catalog_id.clone()))?;

    if ctx.attempt > 1 {
        ctx.log(LogLevel::Warning, steps::FAILURE, format!("retrying deploy, attempt {}", ctx.attempt));
        cleanup_partial(ctx, &host).await;
    }

    // 1. node selection
    ctx.ensure_live()?;
    let node = select_node(ctx, &app)?;
    ctx.deps.store.update_app(app.id, |a| a.node_name = Some(node.clone()))?;
    ctx.log(LogLevel::Info, steps::SELECT_NODE, format!("deploying to node {node}"));

    // 2. port pair
    ctx.ensure_live()?;
    let (public_port, internal_port) = step(ctx, steps::ALLOCATE_PORTS, async {
        alloc::ensure_ports(&ctx.deps, app.id)
    })
    .await?;
    ctx.log(
        LogLevel::Info,
        steps::ALLOCATE_PORTS,
        format!("ports public={public_port} internal={internal_port}"),
    );

    // 3. VMID
    let vmid = step(ctx, steps::ACQUIRE_VMID, alloc::acquire_vmid(&ctx.deps, &*gateway, app.id))
        .await?;

    // 4. storage
    let disk_gb = config_u32(&app, "disk_gb").unwrap_or(entry.disk_gb);
    let storage =
        step(ctx, steps::SELECT_STORAGE, gateway.select_storage(&node, disk_gb)).await?;
    ctx.log(
        LogLevel::Info,
        steps::SELECT_STORAGE,
        format!("storage {} ({} GB)", storage.storage, disk_gb),
    );

    // 5. template
    let template = step(
        ctx,
        steps::ENSURE_TEMPLATE,
        ensure_template(
            &ctx.deps,
            &*gateway,
            &node,
            &entry.family,
            &ctx.deps.config.template_download_timeout,
        ),
    )
    .await?;

    // 6. network plan + container creation
    let plan = appliance::ensure(&ctx.deps, &host).await?;
    let password = root_password(ctx, &app)?;
    let spec = LxcSpec {
        vmid,
        hostname: app.hostname.clone(),
        ostemplate: template,
        storage: storage.storage.clone(),
        disk_gb,
        memory_mb: config_u32(&app, "memory").unwrap_or(entry.min_memory_mb),
        cores: config_u32(&app, "cores").unwrap_or(entry.min_cpu),
        password,
        bridge: plan.bridge.clone(),
        start: false,
    };
    let vmid = step(ctx, steps::LXC_CREATE, create_with_reclaim(ctx, &*gateway, &node, spec))
        .await?;
    ctx.log(LogLevel::Info, steps::LXC_CREATE, format!("LXC {vmid} created"));

    // 7. AppArmor / capability patch for the in-LXC runtime
    step(ctx, steps::LXC_CONFIGURE, apparmor_patch(&*remote, &node, vmid)).await?;

    // 8. start and settle
    step(ctx, steps::LXC_START, async {
        let upid = gateway.start_lxc(&node, vmid).await?;
        wait_for_task(&*gateway, &node, &upid, &wait_opts(ctx)).await
    })
    .await?;
    ctx.sleep(ctx.deps.config.post_start_delay).await?;

    // 9. container runtime
    if entry.runtime_preinstalled {
        ctx.log(LogLevel::Info, steps::RUNTIME_SETUP, "runtime preinstalled, skipping");
    } else {
        step(ctx, steps::RUNTIME_SETUP, install_runtime(ctx, &*remote, &node, vmid)).await?;
    }

    // 10. compose document
    let doc = step(ctx, steps::COMPOSE_WRITE, async {
        let doc = compose::materialize(
            &entry,
            &app.hostname,
            &app.environment,
            &ctx.deps.config.volumes_root,
        )?;
        for dir in &doc.host_volumes {
            remote
                .exec_in_container(
                    &node,
                    vmid,
                    &format!("mkdir -p {dir}"),
                    ctx.deps.config.exec_timeout,
                    false,
                )
                .await?;
        }
        remote
            .exec_in_container(
                &node,
                vmid,
                &compose::write_command(&doc),
                ctx.deps.config.exec_timeout,
                false,
            )
            .await?;
        Ok(doc)
    })
    .await?;
    let exposed: Vec<u16> = entry.ports.iter().map(|p| p.port).collect();
    ctx.deps.store.update_app(app.id, |a| {
        a.ports = exposed.clone();
        a.volumes = doc.host_volumes.clone();
    })?;

    // 11. pull and bring up
    step(ctx, steps::COMPOSE_UP, async {
        remote
            .exec_in_container(
                &node,
                vmid,
                "cd /root && docker compose pull",
                ctx.deps.config.pull_timeout,
                false,
            )
            .await?;
        remote
            .exec_in_container(
                &node,
                vmid,
                "cd /root && docker compose up -d",
                ctx.deps.config.up_timeout,
                false,
            )
            .await?;
        remote
            .exec_in_container(
                &node,
                vmid,
                "cd /root && docker compose ps",
                ctx.deps.config.exec_timeout,
                false,
            )
            .await?;
        Ok(())
    })
    .await?;

    // 12. container address
    let container_ip =
        step(ctx, steps::DISCOVER_IP, discover_ip(ctx, &*remote, &node, vmid)).await?;
    ctx.log(LogLevel::Info, steps::DISCOVER_IP, format!("container IP {container_ip}"));

    // 13. reverse proxy
    let urls = step(
        ctx,
        steps::REGISTER_PROXY,
        register_proxy(ctx, &host, &entry, &plan, &app, &container_ip, public_port, internal_port),
    )
    .await?;
    ctx.deps.store.update_app(app.id, |a| a.urls = Some(urls.clone()))?;

    // 14. done
    ctx.deps.store.transition(app.id, AppStatus::Deploying, AppStatus::Running)?;
    ctx.log(LogLevel::Info, steps::FINALIZE, format!("deployed, reachable at {}", urls.url));
    Ok(())
}

/// Wrap one pipeline step: cancellation check, error logging, and the
/// step tag attached to the failure.
async fn step<C: Clock, T>(
    ctx: &JobCtx<C>,
    tag: &'static str,
    fut: impl std::future::Future<Output = Result<T>>,
) -> Result<T> {
    ctx.ensure_live()?;
    match fut.await {
        Ok(value) => Ok(value),
        Err(Error::Canceled) => Err(Error::Canceled),
        Err(err) => {
            ctx.log(LogLevel::Error, tag, err.to_string());
            Err(Error::at_step(tag, err))
        }
    }
}

/// Explicit node when supplied, else the online node with the most
/// free memory; ties break by name (the cache iterates name-sorted).
fn select_node<C: Clock>(ctx: &JobCtx<C>, app: &Application) -> Result<String> {
    if let Some(node) = &app.node_name {
        return Ok(node.clone());
    }
    let mut nodes: Vec<_> = ctx
        .deps
        .store
        .nodes_of(app.host_id)
        .into_iter()
        .filter(|n| n.is_online())
        .collect();
    nodes.sort_by(|a, b| b.memory_free().cmp(&a.memory_free()).then(a.name.cmp(&b.name)));
    nodes
        .into_iter()
        .next()
        .map(|n| n.name)
        .ok_or_else(|| Error::not_found("online node", "cluster"))
}

fn config_u32(app: &Application, key: &str) -> Option<u32> {
    app.config.get(key).and_then(|v| v.as_u64()).map(|v| v as u32)
}

/// The stored root password, or a fresh generated one persisted
/// encrypted on the row.
fn root_password<C: Clock>(ctx: &JobCtx<C>, app: &Application) -> Result<String> {
    if let Some(stored) = &app.root_password {
        return ctx.deps.cipher.decrypt(stored);
    }
    let password = ph_core::secret::generate_password(24);
    let sealed = ctx.deps.cipher.encrypt(&password)?;
    ctx.deps.store.update_app(app.id, |a| a.root_password = Some(sealed))?;
    Ok(password)
}

/// Search every template-capable storage for a family+arch match;
/// download through the appliance manager when missing.
pub(crate) async fn ensure_template<C: Clock>(
    deps: &crate::ctx::EngineDeps<C>,
    gateway: &dyn PveGateway,
    node: &str,
    family: &str,
    download_deadline: &Duration,
) -> Result<String> {
    let arch = gateway.node_architecture(node).await?;
    let storages = gateway.list_storages(node).await?;
    let template_storages: Vec<_> = storages
        .into_iter()
        .filter(|s| s.is_usable() && s.supports("vztmpl"))
        .collect();

    for storage in &template_storages {
        let templates = gateway.list_templates(node, &storage.storage).await?;
        if let Some(found) = templates
            .iter()
            .find(|t| t.to_lowercase().contains(family) && t.to_lowercase().contains(&arch))
        {
            return Ok(found.clone());
        }
    }

    let Some(target) = template_storages.first() else {
        return Err(Error::TemplateUnavailable { family: family.to_string(), arch });
    };
    if family != "alpine" {
        return Err(Error::TemplateUnavailable { family: family.to_string(), arch });
    }

    tracing::info!(node, storage = %target.storage, "downloading {DEFAULT_ALPINE_TEMPLATE}");
    let upid = gateway
        .download_appliance_template(node, &target.storage, DEFAULT_ALPINE_TEMPLATE)
        .await?;
    wait_for_task(
        gateway,
        node,
        &upid,
        &WaitOptions { interval: deps.config.task_poll_interval, deadline: *download_deadline },
    )
    .await?;

    let templates = gateway.list_templates(node, &target.storage).await?;
    templates
        .into_iter()
        .find(|t| t.to_lowercase().contains(family))
        .ok_or_else(|| Error::TemplateUnavailable { family: family.to_string(), arch })
}

/// Create the container, resolving VMID conflicts: our own leftover is
/// destroyed and recreated, a foreign squatter forces a fresh VMID.
async fn create_with_reclaim<C: Clock>(
    ctx: &JobCtx<C>,
    gateway: &dyn PveGateway,
    node: &str,
    mut spec: LxcSpec,
) -> Result<u32> {
    for _ in 0..3 {
        match gateway.create_lxc(node, &spec).await {
            Ok(upid) => {
                wait_for_task(gateway, node, &upid, &wait_opts(ctx)).await?;
                return Ok(spec.vmid);
            }
            Err(Error::Conflict { .. }) => {
                let existing = gateway.lxc_status(node, spec.vmid).await;
                match existing {
                    Ok(info) if info.name.as_deref() == Some(spec.hostname.as_str()) => {
                        // our own half-created container from a failed attempt
                        ctx.log(
                            LogLevel::Warning,
                            steps::LXC_CREATE,
                            format!("reclaiming leftover CT {}", spec.vmid),
                        );
                        let upid = gateway.delete_lxc(node, spec.vmid, true).await?;
                        wait_for_task(gateway, node, &upid, &wait_opts(ctx)).await?;
                    }
                    _ => {
                        // foreign container owns the VMID; take another
                        ctx.deps.store.clear_vmid(ctx.app_id)?;
                        let fresh =
                            alloc::acquire_vmid(&ctx.deps, gateway, ctx.app_id).await?;
                        ctx.log(
                            LogLevel::Warning,
                            steps::LXC_CREATE,
                            format!("VMID {} taken on cluster, switched to {fresh}", spec.vmid),
                        );
                        spec.vmid = fresh;
                    }
                }
            }
            Err(other) => return Err(other),
        }
    }
    Err(Error::conflict("vmid", spec.vmid.to_string()))
}

/// Idempotently patch the container config for the in-LXC runtime.
pub(crate) async fn apparmor_patch(
    remote: &dyn RemoteExec,
    node: &str,
    vmid: u32,
) -> Result<()> {
    let conf = format!("/etc/pve/lxc/{vmid}.conf");
    let cmd = format!(
        "grep -q 'lxc.apparmor.profile' {conf} || {{ \
         echo 'lxc.apparmor.profile: unconfined' >> {conf}; \
         echo 'lxc.cap.drop:' >> {conf}; }}"
    );
    remote.exec_on_node(node, &cmd, Duration::from_secs(30), false).await?;
    Ok(())
}

/// Install and start the container runtime, then poll until it answers.
pub(crate) async fn install_runtime<C: Clock>(
    ctx: &JobCtx<C>,
    remote: &dyn RemoteExec,
    node: &str,
    vmid: u32,
) -> Result<()> {
    let timeout = ctx.deps.config.exec_timeout;
    remote.exec_in_container(node, vmid, "apk update", timeout, false).await?;
    remote
        .exec_in_container(
            node,
            vmid,
            "apk add --no-cache docker docker-cli-compose",
            timeout,
            false,
        )
        .await?;
    remote
        .exec_in_container(node, vmid, "rc-update add docker default", timeout, false)
        .await?;
    remote
        .exec_in_container(node, vmid, "service docker start", timeout, true)
        .await?;

    for _ in 0..15 {
        ctx.ensure_live()?;
        let probe = remote
            .exec_in_container(node, vmid, "docker info", timeout, true)
            .await?;
        if probe.exit == 0 {
            return Ok(());
        }
        ctx.sleep(ctx.deps.config.task_poll_interval).await?;
    }
    Err(Error::ExecFailed { exit: 1, stderr: "docker info never became ready".into() })
}

/// Parse the container's eth0 address, retrying while DHCP settles.
async fn discover_ip<C: Clock>(
    ctx: &JobCtx<C>,
    remote: &dyn RemoteExec,
    node: &str,
    vmid: u32,
) -> Result<String> {
    for _ in 0..10 {
        ctx.ensure_live()?;
        let out = remote
            .exec_in_container(
                node,
                vmid,
                "ip -4 addr show eth0",
                ctx.deps.config.exec_timeout,
                true,
            )
            .await?;
        if let Some(ip) = appliance::parse_inet(&out.stdout) {
            return Ok(ip);
        }
        ctx.sleep(ctx.deps.config.task_poll_interval).await?;
    }
    Err(Error::not_found("container address", format!("CT {vmid} eth0")))
}

#[allow(clippy::too_many_arguments)]
async fn register_proxy<C: Clock>(
    ctx: &JobCtx<C>,
    host: &ProxmoxHost,
    entry: &CatalogApp,
    plan: &NetworkPlan,
    app: &Application,
    container_ip: &str,
    public_port: u16,
    internal_port: u16,
) -> Result<AppUrls> {
    let backend_port = entry.primary_port().unwrap_or(80);
    match &plan.proxy {
        Some(info) => {
            appliance::register_vhost(
                &ctx.deps,
                host,
                info,
                &app.hostname,
                container_ip,
                backend_port,
                public_port,
                internal_port,
            )
            .await?;
            Ok(AppUrls {
                url: format!("http://{}:{}/", info.wan_ip, public_port),
                iframe_url: Some(format!("http://{}:{}/", info.wan_ip, internal_port)),
                direct_access: false,
            })
        }
        None => {
            ctx.log(
                LogLevel::Warning,
                steps::REGISTER_PROXY,
                "reverse proxy unavailable, publishing direct access URL",
            );
            Ok(AppUrls {
                url: format!("http://{container_ip}:{backend_port}"),
                iframe_url: None,
                direct_access: true,
            })
        }
    }
}

/// Destroy the half-built container before a retry. Best effort; the
/// allocators are idempotent so ports and VMID stay assigned.
pub(crate) async fn cleanup_partial<C: Clock>(ctx: &JobCtx<C>, host: &ProxmoxHost) {
    let Ok(app) = ctx.app() else { return };
    let (Some(vmid), Some(node)) = (app.vmid, app.node_name.clone()) else { return };
    let Ok(gateway) = ctx.deps.gateway(host) else { return };

    if let Ok(info) = gateway.lxc_status(&node, vmid).await {
        if info.is_running() {
            if let Ok(upid) = gateway.stop_lxc(&node, vmid).await {
                let _ = wait_for_task(&*gateway, &node, &upid, &wait_opts(ctx)).await;
            }
        }
        if let Ok(upid) = gateway.delete_lxc(&node, vmid, true).await {
            let _ = wait_for_task(&*gateway, &node, &upid, &wait_opts(ctx)).await;
        }
        ctx.log(LogLevel::Warning, steps::FAILURE, format!("destroyed partial CT {vmid}"));
    }
}

/// Terminal failure: compensating cleanup, port release, `error`.
pub(crate) async fn on_terminal_failure<C: Clock>(ctx: &JobCtx<C>, err: &Error) {
    ctx.log(LogLevel::Error, steps::FAILURE, format!("deployment failed: {err}"));
    if let Ok(app) = ctx.app() {
        if let Ok(host) = ctx.deps.app_host(&app) {
            cleanup_partial(ctx, &host).await;
        }
        let _ = ctx.deps.store.release_ports(app.id);
        let _ = ctx.deps.store.transition(app.id, AppStatus::Deploying, AppStatus::Error);
    }
}

pub(crate) fn wait_opts<C: Clock>(ctx: &JobCtx<C>) -> WaitOptions {
    WaitOptions {
        interval: ctx.deps.config.task_poll_interval,
        deadline: Duration::from_secs(300),
    }
}

#[cfg(test)]
#[path = "deploy_tests.rs"]
mod tests;
