// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Remote command execution over SSH.
//!
//! Sessions are opened and closed per call; nothing is pooled, so a
//! wedged node cannot leak channels. Commands for a cluster peer hop
//! through the front-door host (`ssh root@<node> '…'`) because only
//! the owning node can `pct exec` into a container. Host keys are
//! accepted permissively: the node set is trusted infrastructure and
//! the trade-off is documented in the operator guide.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

use russh::client::{self, Handler};
use russh::{ChannelMsg, Disconnect};

use ph_core::{Error, ProxmoxHost, Result, SecretCipher};

/// Captured output of one remote command.
#[derive(Debug, Clone, Default)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit: i32,
}

impl ExecOutput {
    /// stdout and stderr combined, stdout first.
    pub fn combined(&self) -> String {
        let mut out = self.stdout.clone();
        out.push_str(&self.stderr);
        out
    }
}

/// The in-container / on-node command surface the engine consumes.
#[async_trait]
pub trait RemoteExec: Send + Sync {
    /// Run `command` directly on a cluster node.
    async fn exec_on_node(
        &self,
        node: &str,
        command: &str,
        timeout: Duration,
        allow_nonzero: bool,
    ) -> Result<ExecOutput>;

    /// Run `command` inside container `vmid` via `pct exec` on its node.
    async fn exec_in_container(
        &self,
        node: &str,
        vmid: u32,
        command: &str,
        timeout: Duration,
        allow_nonzero: bool,
    ) -> Result<ExecOutput> {
        let wrapped = format!("pct exec {vmid} -- sh -c '{}'", quote_single(command));
        self.exec_on_node(node, &wrapped, timeout, allow_nonzero).await
    }
}

/// Escape a command for embedding inside single quotes.
pub fn quote_single(command: &str) -> String {
    command.replace('\'', r"'\''")
}

/// Mask credential-shaped values before a command reaches the logs.
pub fn redact(command: &str) -> String {
    let mut out = String::with_capacity(command.len());
    for (i, word) in command.split(' ').enumerate() {
        if i > 0 {
            out.push(' ');
        }
        let lowered = word.to_lowercase();
        let sensitive = ["password", "passwd", "secret", "token", "auth"]
            .iter()
            .any(|k| lowered.contains(k));
        match (sensitive, word.split_once('=')) {
            (true, Some((key, _))) => {
                out.push_str(key);
                out.push_str("=***");
            }
            _ => out.push_str(word),
        }
    }
    out
}

/// Per-call SSH transport to one host's front door.
pub struct SshExec {
    address: String,
    port: u16,
    user: String,
    password: String,
    host_name: String,
    /// Node name of the front-door host, resolved lazily; commands for
    /// that node skip the inner hop.
    front_node: Mutex<Option<String>>,
}

struct AcceptAll;

impl Handler for AcceptAll {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &russh::keys::PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        // trusted infrastructure, documented trade-off
        Ok(true)
    }
}

impl SshExec {
    pub fn connect_info(host: &ProxmoxHost, cipher: &SecretCipher) -> Result<Self> {
        Ok(Self {
            address: host.api_address.clone(),
            port: host.ssh_port,
            user: host.credentials.ssh_user.clone(),
            password: cipher.decrypt(&host.credentials.ssh_password)?,
            host_name: host.display_name.clone(),
            front_node: Mutex::new(None),
        })
    }

    /// Open a session, run one command, tear the session down.
    async fn run_session(&self, command: &str, timeout: Duration) -> Result<ExecOutput> {
        let fut = self.run_session_inner(command);
        match tokio::time::timeout(timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(Error::timeout(format!("ssh: {}", redact(command)), timeout)),
        }
    }

    async fn run_session_inner(&self, command: &str) -> Result<ExecOutput> {
        let config = Arc::new(client::Config::default());
        let mut session = client::connect(config, (self.address.as_str(), self.port), AcceptAll)
            .await
            .map_err(|e| Error::Unreachable(format!("ssh connect {}: {e}", self.address)))?;

        let auth = session
            .authenticate_password(&self.user, &self.password)
            .await
            .map_err(|e| Error::AuthFailed(format!("ssh auth: {e}")))?;
        if !auth.success() {
            return Err(Error::AuthFailed(format!("ssh password rejected for {}", self.user)));
        }

        let mut channel = session
            .channel_open_session()
            .await
            .map_err(|e| Error::Unreachable(format!("ssh channel: {e}")))?;
        channel
            .exec(true, command)
            .await
            .map_err(|e| Error::Unreachable(format!("ssh exec: {e}")))?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut exit = 0i32;
        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { ref data } => stdout.extend_from_slice(data),
                ChannelMsg::ExtendedData { ref data, ext: 1 } => stderr.extend_from_slice(data),
                ChannelMsg::ExitStatus { exit_status } => exit = exit_status as i32,
                _ => {}
            }
        }

        let _ = session
            .disconnect(Disconnect::ByApplication, "done", "en")
            .await;

        Ok(ExecOutput {
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            exit,
        })
    }

    /// Node name of the front-door host, cached after first resolution.
    async fn front_node_name(&self) -> Result<String> {
        if let Some(name) = self.front_node.lock().clone() {
            return Ok(name);
        }
        let out = self.run_session("hostname", Duration::from_secs(10)).await?;
        let name = out.stdout.trim().to_string();
        if name.is_empty() {
            return Err(Error::Unreachable("front-door hostname came back empty".into()));
        }
        *self.front_node.lock() = Some(name.clone());
        Ok(name)
    }
}

#[async_trait]
impl RemoteExec for SshExec {
    async fn exec_on_node(
        &self,
        node: &str,
        command: &str,
        timeout: Duration,
        allow_nonzero: bool,
    ) -> Result<ExecOutput> {
        tracing::debug!(
            host = %self.host_name,
            node,
            command = %redact(command),
            "remote exec"
        );

        let front = self.front_node_name().await?;
        let effective = if node == front {
            command.to_string()
        } else {
            // hop to the owning node through the front door
            format!(
                "ssh -o StrictHostKeyChecking=no -o ConnectTimeout=10 root@{node} '{}'",
                quote_single(command)
            )
        };

        let output = self.run_session(&effective, timeout).await?;
        tracing::debug!(
            node,
            exit = output.exit,
            stdout_len = output.stdout.len(),
            "remote exec finished"
        );

        if output.exit != 0 && !allow_nonzero {
            return Err(Error::ExecFailed {
                exit: output.exit,
                stderr: if output.stderr.is_empty() {
                    output.stdout
                } else {
                    output.stderr
                },
            });
        }
        Ok(output)
    }
}

#[cfg(test)]
#[path = "ssh_tests.rs"]
mod tests;
