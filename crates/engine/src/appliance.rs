// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The network appliance orchestrator.
//!
//! Provisions the isolated L2 bridge, the router/NAT appliance LXC
//! (dnsmasq for DHCP/DNS, Caddy for the reverse proxy) and the
//! per-application vhost registrations. Every step is idempotent:
//! bridge stanzas are appended only when missing, iptables rules are
//! check-before-add, and config files are diffed before writes so a
//! re-run is a no-op.
//!
//! When the bridge or the appliance cannot be provisioned the
//! orchestrator degrades: application containers land on the
//! management bridge and URLs become direct access.

use std::time::Duration;

use ph_core::{Clock, Error, ProxmoxHost, Result};
use ph_pve::{wait_for_task, LxcSpec, PveGateway, RemoteExec, WaitOptions};

use crate::ctx::EngineDeps;
use crate::vhost;

pub const BRIDGE_NAME: &str = "appliance-lan";
pub const MANAGEMENT_BRIDGE: &str = "vmbr0";
/// Reserved VMID below the user range.
pub const APPLIANCE_VMID: u32 = 9990;
pub const APPLIANCE_HOSTNAME: &str = "ph-appliance";
pub const LAN_NETWORK: &str = "10.20.0.0/24";
pub const LAN_GATEWAY: &str = "10.20.0.1";
pub const DHCP_RANGE_START: &str = "10.20.0.100";
pub const DHCP_RANGE_END: &str = "10.20.0.250";
pub const DNS_DOMAIN: &str = "prox.local";

const EXEC_TIMEOUT: Duration = Duration::from_secs(120);

/// Where managed applications attach and how they are reached.
#[derive(Debug, Clone)]
pub struct NetworkPlan {
    /// Bridge application containers attach to.
    pub bridge: String,
    /// Reverse-proxy endpoint; `None` in degraded (direct access) mode.
    pub proxy: Option<ApplianceInfo>,
}

#[derive(Debug, Clone)]
pub struct ApplianceInfo {
    pub vmid: u32,
    pub node: String,
    /// Management-side address applications are published on.
    pub wan_ip: String,
    pub lan_ip: String,
}

/// Shared appliance state. The mutex is also the per-appliance config
/// lock serializing vhost writes from concurrent deploys.
pub struct Appliance {
    state: tokio::sync::Mutex<Option<NetworkPlan>>,
}

impl Default for Appliance {
    fn default() -> Self {
        Self::new()
    }
}

impl Appliance {
    pub fn new() -> Self {
        Self { state: tokio::sync::Mutex::new(None) }
    }

    /// Drop the cached plan (teardown, tests).
    pub async fn reset(&self) {
        *self.state.lock().await = None;
    }

    /// The already-resolved plan, if any. Never provisions — callers
    /// that must not build infrastructure (delete) use this.
    pub async fn cached_plan(&self) -> Option<NetworkPlan> {
        self.state.lock().await.clone()
    }
}

/// Ensure the network infrastructure exists and return the plan.
/// Idempotent; the resolved plan is cached for the process lifetime.
pub async fn ensure<C: Clock>(deps: &EngineDeps<C>, host: &ProxmoxHost) -> Result<NetworkPlan> {
    let mut cached = deps.appliance.state.lock().await;
    if let Some(plan) = cached.as_ref() {
        return Ok(plan.clone());
    }

    let plan = provision(deps, host).await.unwrap_or_else(|err| {
        tracing::warn!(
            error = %err,
            "appliance provisioning failed; degrading to management bridge"
        );
        NetworkPlan { bridge: MANAGEMENT_BRIDGE.into(), proxy: None }
    });
    *cached = Some(plan.clone());
    Ok(plan)
}

async fn provision<C: Clock>(deps: &EngineDeps<C>, host: &ProxmoxHost) -> Result<NetworkPlan> {
    let node = pick_node(deps, host)?;
    let remote = deps.remote(host)?;

    // Step 1: isolated bridge, persisted in the node's interfaces file.
    if let Err(err) = ensure_bridge(&*remote, &node).await {
        tracing::warn!(node = %node, error = %err, "isolated bridge unavailable");
        return Ok(NetworkPlan { bridge: MANAGEMENT_BRIDGE.into(), proxy: None });
    }

    // Step 2: find or create the appliance LXC on its reserved VMID.
    ensure_appliance_lxc(deps, host, &node).await?;

    // Step 3: services inside the appliance, config diffed per write.
    configure_services(deps, &*remote, &node).await?;

    // Step 4: health and address discovery.
    let wan_ip = discover_wan_ip(&*remote, &node).await?;
    verify_health(&*remote, &node).await;

    tracing::info!(node = %node, wan_ip = %wan_ip, "network appliance ready");
    Ok(NetworkPlan {
        bridge: BRIDGE_NAME.into(),
        proxy: Some(ApplianceInfo {
            vmid: APPLIANCE_VMID,
            node,
            wan_ip,
            lan_ip: LAN_GATEWAY.into(),
        }),
    })
}

fn pick_node<C: Clock>(deps: &EngineDeps<C>, host: &ProxmoxHost) -> Result<String> {
    deps.store
        .nodes_of(host.id)
        .into_iter()
        .find(|n| n.is_online())
        .map(|n| n.name)
        .ok_or_else(|| Error::not_found("online node", host.display_name.clone()))
}

/// Append the bridge stanza (marker-guarded) and bring it up.
async fn ensure_bridge(remote: &dyn RemoteExec, node: &str) -> Result<()> {
    let stanza = format!(
        "\n# {BRIDGE_NAME} begin\nauto {BRIDGE_NAME}\niface {BRIDGE_NAME} inet manual\n\
         \tbridge-ports none\n\tbridge-stp off\n\tbridge-fd 0\n# {BRIDGE_NAME} end\n"
    );
    let cmd = format!(
        "grep -q '# {BRIDGE_NAME} begin' /etc/network/interfaces || \
         printf '%s' '{stanza}' >> /etc/network/interfaces"
    );
    remote.exec_on_node(node, &cmd, EXEC_TIMEOUT, false).await?;
    remote
        .exec_on_node(node, &format!("ifup {BRIDGE_NAME} || ifreload -a"), EXEC_TIMEOUT, true)
        .await?;
    let check = remote
        .exec_on_node(node, &format!("ip link show {BRIDGE_NAME}"), EXEC_TIMEOUT, true)
        .await?;
    if check.exit != 0 {
        return Err(Error::not_found("bridge", BRIDGE_NAME));
    }
    Ok(())
}

async fn ensure_appliance_lxc<C: Clock>(
    deps: &EngineDeps<C>,
    host: &ProxmoxHost,
    node: &str,
) -> Result<()> {
    let gateway = deps.gateway(host)?;

    let existing = gateway.lxc_status(node, APPLIANCE_VMID).await;
    match existing {
        Ok(info) => {
            if !info.is_running() {
                let upid = gateway.start_lxc(node, APPLIANCE_VMID).await?;
                wait_for_task(&*gateway, node, &upid, &wait_opts(deps)).await?;
            }
            return Ok(());
        }
        Err(Error::NotFound { .. }) => {}
        Err(other) => return Err(other),
    }

    tracing::info!(node, vmid = APPLIANCE_VMID, "creating network appliance LXC");
    let storage = gateway.select_storage(node, 4).await?;
    let template = crate::deploy::ensure_template(
        deps,
        &*gateway,
        node,
        "alpine",
        &deps.config.template_download_timeout,
    )
    .await?;

    let spec = LxcSpec {
        vmid: APPLIANCE_VMID,
        hostname: APPLIANCE_HOSTNAME.into(),
        ostemplate: template,
        storage: storage.storage,
        disk_gb: 4,
        memory_mb: 512,
        cores: 1,
        password: ph_core::secret::generate_password(24),
        bridge: MANAGEMENT_BRIDGE.into(),
        start: false,
    };
    let upid = gateway.create_lxc(node, &spec).await?;
    wait_for_task(&*gateway, node, &upid, &wait_opts(deps)).await?;

    // second NIC: static gateway address on the isolated bridge
    gateway
        .update_lxc_config(
            node,
            APPLIANCE_VMID,
            &[(
                "net1".to_string(),
                format!("name=eth1,bridge={BRIDGE_NAME},ip={LAN_GATEWAY}/24"),
            )],
        )
        .await?;

    let upid = gateway.start_lxc(node, APPLIANCE_VMID).await?;
    wait_for_task(&*gateway, node, &upid, &wait_opts(deps)).await?;
    tokio::time::sleep(deps.config.post_start_delay).await;
    Ok(())
}

async fn configure_services<C: Clock>(
    deps: &EngineDeps<C>,
    remote: &dyn RemoteExec,
    node: &str,
) -> Result<()> {
    let vmid = APPLIANCE_VMID;

    // packages, only when missing
    remote
        .exec_in_container(
            node,
            vmid,
            "command -v dnsmasq >/dev/null && command -v caddy >/dev/null \
             || apk add --no-cache bash curl iptables dnsmasq caddy",
            EXEC_TIMEOUT,
            false,
        )
        .await?;

    // IPv4 forwarding, persisted
    remote
        .exec_in_container(
            node,
            vmid,
            "grep -q 'net.ipv4.ip_forward=1' /etc/sysctl.conf \
             || echo 'net.ipv4.ip_forward=1' >> /etc/sysctl.conf; sysctl -p",
            EXEC_TIMEOUT,
            true,
        )
        .await?;

    // NAT out the WAN NIC, check-before-add
    remote
        .exec_in_container(
            node,
            vmid,
            &format!(
                "iptables -t nat -C POSTROUTING -s {LAN_NETWORK} -o eth0 -j MASQUERADE \
                 || iptables -t nat -A POSTROUTING -s {LAN_NETWORK} -o eth0 -j MASQUERADE"
            ),
            EXEC_TIMEOUT,
            false,
        )
        .await?;

    // DHCP/DNS
    let dnsmasq_changed =
        write_if_changed(remote, node, vmid, "/etc/dnsmasq.conf", &dnsmasq_conf()).await?;
    remote
        .exec_in_container(
            node,
            vmid,
            if dnsmasq_changed {
                "rc-update add dnsmasq default; rc-service dnsmasq restart"
            } else {
                "rc-update add dnsmasq default; rc-service dnsmasq start"
            },
            EXEC_TIMEOUT,
            true,
        )
        .await?;

    // Reverse proxy
    remote
        .exec_in_container(node, vmid, "mkdir -p /etc/caddy/sites-enabled", EXEC_TIMEOUT, false)
        .await?;
    let caddy_changed =
        write_if_changed(remote, node, vmid, "/etc/caddy/Caddyfile", &vhost::render_caddyfile())
            .await?;
    remote
        .exec_in_container(
            node,
            vmid,
            if caddy_changed {
                "rc-update add caddy default; rc-service caddy restart"
            } else {
                "rc-update add caddy default; rc-service caddy start"
            },
            EXEC_TIMEOUT,
            true,
        )
        .await?;

    Ok(())
}

fn dnsmasq_conf() -> String {
    format!(
        "interface=eth1\nbind-interfaces\n\n\
         dhcp-range={DHCP_RANGE_START},{DHCP_RANGE_END},255.255.255.0,12h\n\
         dhcp-option=option:router,{LAN_GATEWAY}\n\
         dhcp-option=option:dns-server,{LAN_GATEWAY}\n\
         dhcp-authoritative\n\
         dhcp-leasefile=/var/lib/misc/dnsmasq.leases\n\n\
         domain={DNS_DOMAIN}\nexpand-hosts\nlocal=/{DNS_DOMAIN}/\n\n\
         server=1.1.1.1\nserver=8.8.8.8\n"
    )
}

/// Write `content` to `path` in the container only when it differs.
/// Returns whether a write happened.
async fn write_if_changed(
    remote: &dyn RemoteExec,
    node: &str,
    vmid: u32,
    path: &str,
    content: &str,
) -> Result<bool> {
    let current = remote
        .exec_in_container(node, vmid, &format!("cat {path}"), EXEC_TIMEOUT, true)
        .await?;
    if current.exit == 0 && current.stdout == content {
        return Ok(false);
    }
    let cmd = format!("cat > {path} << 'PH_EOF'\n{content}\nPH_EOF");
    remote.exec_in_container(node, vmid, &cmd, EXEC_TIMEOUT, false).await?;
    Ok(true)
}

async fn discover_wan_ip(remote: &dyn RemoteExec, node: &str) -> Result<String> {
    let out = remote
        .exec_in_container(node, APPLIANCE_VMID, "ip -4 addr show eth0", EXEC_TIMEOUT, false)
        .await?;
    parse_inet(&out.stdout)
        .ok_or_else(|| Error::not_found("appliance WAN address", out.stdout.clone()))
}

/// First `inet a.b.c.d/len` address in `ip -4 addr show` output.
pub(crate) fn parse_inet(output: &str) -> Option<String> {
    output
        .split_whitespace()
        .skip_while(|w| *w != "inet")
        .nth(1)
        .and_then(|cidr| cidr.split('/').next())
        .map(str::to_string)
}

/// Best-effort verification; failures are logged, not fatal.
async fn verify_health(remote: &dyn RemoteExec, node: &str) {
    let checks = [
        ("forwarding", "sysctl -n net.ipv4.ip_forward | grep -q 1"),
        (
            "nat",
            "iptables -t nat -C POSTROUTING -s 10.20.0.0/24 -o eth0 -j MASQUERADE",
        ),
        ("dnsmasq", "rc-service dnsmasq status"),
        ("caddy", "rc-service caddy status"),
    ];
    for (name, cmd) in checks {
        match remote
            .exec_in_container(node, APPLIANCE_VMID, cmd, EXEC_TIMEOUT, true)
            .await
        {
            Ok(out) if out.exit == 0 => {}
            Ok(out) => {
                tracing::warn!(check = name, exit = out.exit, "appliance health check failed")
            }
            Err(err) => tracing::warn!(check = name, error = %err, "appliance health check error"),
        }
    }
}

/// Register (or refresh) an application's vhost. Serialized by the
/// appliance lock; Caddy is reloaded only when the file changed.
pub async fn register_vhost<C: Clock>(
    deps: &EngineDeps<C>,
    host: &ProxmoxHost,
    info: &ApplianceInfo,
    hostname: &str,
    backend_ip: &str,
    backend_port: u16,
    public_port: u16,
    internal_port: u16,
) -> Result<()> {
    let _guard = deps.appliance.state.lock().await;
    let remote = deps.remote(host)?;
    let site = vhost::render_site(hostname, backend_ip, backend_port, public_port, internal_port);
    let changed =
        write_if_changed(&*remote, &info.node, info.vmid, &vhost::site_path(hostname), &site)
            .await?;
    if changed {
        reload_caddy(&*remote, &info.node, info.vmid).await?;
        tracing::info!(hostname, public_port, internal_port, "vhost registered");
    }
    Ok(())
}

/// Remove an application's vhost. Idempotent.
pub async fn remove_vhost<C: Clock>(
    deps: &EngineDeps<C>,
    host: &ProxmoxHost,
    info: &ApplianceInfo,
    hostname: &str,
) -> Result<()> {
    let _guard = deps.appliance.state.lock().await;
    let remote = deps.remote(host)?;
    remote
        .exec_in_container(
            &info.node,
            info.vmid,
            &format!("rm -f {}", vhost::site_path(hostname)),
            EXEC_TIMEOUT,
            false,
        )
        .await?;
    reload_caddy(&*remote, &info.node, info.vmid).await?;
    Ok(())
}

async fn reload_caddy(remote: &dyn RemoteExec, node: &str, vmid: u32) -> Result<()> {
    remote
        .exec_in_container(
            node,
            vmid,
            "rc-service caddy reload || rc-service caddy restart",
            EXEC_TIMEOUT,
            true,
        )
        .await?;
    Ok(())
}

/// Tear the appliance and bridge down once no managed applications
/// remain on the host.
pub async fn teardown_if_unused<C: Clock>(deps: &EngineDeps<C>, host: &ProxmoxHost) -> Result<bool> {
    let mut cached = deps.appliance.state.lock().await;
    let Some(plan) = cached.clone() else { return Ok(false) };
    let Some(info) = plan.proxy else { return Ok(false) };

    let still_used = deps.store.all_apps().iter().any(|a| a.host_id == host.id);
    if still_used {
        return Ok(false);
    }

    tracing::info!(node = %info.node, "no managed applications left; tearing down appliance");
    let gateway = deps.gateway(host)?;
    let upid = gateway.stop_lxc(&info.node, info.vmid).await?;
    wait_for_task(&*gateway, &info.node, &upid, &wait_opts(deps)).await?;
    let upid = gateway.delete_lxc(&info.node, info.vmid, true).await?;
    wait_for_task(&*gateway, &info.node, &upid, &wait_opts(deps)).await?;

    let remote = deps.remote(host)?;
    remote
        .exec_on_node(
            &info.node,
            &format!(
                "ifdown {BRIDGE_NAME}; \
                 sed -i '/# {BRIDGE_NAME} begin/,/# {BRIDGE_NAME} end/d' /etc/network/interfaces"
            ),
            EXEC_TIMEOUT,
            true,
        )
        .await?;

    *cached = None;
    Ok(true)
}

fn wait_opts<C: Clock>(deps: &EngineDeps<C>) -> WaitOptions {
    WaitOptions {
        interval: deps.config.task_poll_interval,
        deadline: Duration::from_secs(300),
    }
}

#[cfg(test)]
#[path = "appliance_tests.rs"]
mod tests;
