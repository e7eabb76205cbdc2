// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `reqwest` implementation of [`PveGateway`].
//!
//! One client per configured host. Authentication is either an API
//! token (stateless `Authorization` header) or a password ticket
//! (obtained from `/access/ticket`, cached and renewed after an hour).
//! Transient connection failures are retried twice with exponential
//! backoff capped at two seconds.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use ph_core::{Error, ProxmoxHost, Result, SecretCipher};

use crate::gateway::{LxcSpec, PveGateway};
use crate::types::{
    BackupVolume, Envelope, LxcInfo, NodeInfo, NodeStatusInfo, StorageInfo, TaskLogLine,
    TaskStatus,
};

const RETRY_ATTEMPTS: u32 = 2;
const RETRY_BACKOFF_CAP: Duration = Duration::from_secs(2);
const TICKET_RENEW_AFTER: Duration = Duration::from_secs(3600);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

enum AuthMode {
    /// `Authorization: PVEAPIToken=<id>=<secret>` on every request.
    Token { header: String },
    /// Ticket login; ticket + CSRF token cached until renewal.
    Password { user: String, password: String, ticket: Mutex<Option<Ticket>> },
}

#[derive(Clone)]
struct Ticket {
    cookie: String,
    csrf: String,
    acquired: Instant,
}

#[derive(Debug, serde::Deserialize)]
struct TicketData {
    ticket: String,
    #[serde(rename = "CSRFPreventionToken")]
    csrf_token: String,
}

pub struct PveClient {
    http: reqwest::Client,
    base_url: String,
    auth: AuthMode,
    host_name: String,
}

impl PveClient {
    /// Build a client for one host, decrypting its stored credentials.
    pub fn connect(host: &ProxmoxHost, cipher: &SecretCipher) -> Result<Self> {
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(!host.verify_tls)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::Unreachable(format!("building HTTP client: {e}")))?;

        let secret = cipher.decrypt(&host.credentials.api_secret)?;
        let auth = if host.credentials.token_auth {
            AuthMode::Token {
                header: format!("PVEAPIToken={}={}", host.credentials.api_user, secret),
            }
        } else {
            AuthMode::Password {
                user: host.credentials.api_user.clone(),
                password: secret,
                ticket: Mutex::new(None),
            }
        };

        Ok(Self {
            http,
            base_url: host.api_base_url(),
            auth,
            host_name: host.display_name.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Classify a transport-level reqwest error into the taxonomy.
    fn classify(err: reqwest::Error) -> Error {
        if err.is_timeout() {
            return Error::timeout("pve request", REQUEST_TIMEOUT);
        }
        let text = err.to_string();
        if text.contains("certificate") || text.contains("tls") || text.contains("handshake") {
            Error::TlsError(text)
        } else {
            Error::Unreachable(text)
        }
    }

    async fn login(&self) -> Result<Ticket> {
        let AuthMode::Password { user, password, .. } = &self.auth else {
            return Err(Error::AuthFailed("ticket login without password auth".into()));
        };
        let resp = self
            .http
            .post(self.url("access/ticket"))
            .form(&[("username", user.as_str()), ("password", password.as_str())])
            .send()
            .await
            .map_err(Self::classify)?;
        if resp.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(Error::AuthFailed(format!("login rejected for {user}")));
        }
        let env: Envelope<TicketData> =
            resp.json().await.map_err(|e| Error::Unreachable(e.to_string()))?;
        let data = env
            .data
            .ok_or_else(|| Error::AuthFailed("empty ticket response".into()))?;
        Ok(Ticket {
            cookie: format!("PVEAuthCookie={}", data.ticket),
            csrf: data.csrf_token,
            acquired: Instant::now(),
        })
    }

    async fn fresh_ticket(&self) -> Result<Ticket> {
        let AuthMode::Password { ticket, .. } = &self.auth else {
            return Err(Error::AuthFailed("no ticket state for token auth".into()));
        };
        if let Some(t) = ticket.lock().clone() {
            if t.acquired.elapsed() < TICKET_RENEW_AFTER {
                return Ok(t);
            }
        }
        let renewed = self.login().await?;
        *ticket.lock() = Some(renewed.clone());
        Ok(renewed)
    }

    async fn authorize(
        &self,
        req: reqwest::RequestBuilder,
        mutating: bool,
    ) -> Result<reqwest::RequestBuilder> {
        match &self.auth {
            AuthMode::Token { header } => Ok(req.header("Authorization", header)),
            AuthMode::Password { .. } => {
                let ticket = self.fresh_ticket().await?;
                let req = req.header("Cookie", ticket.cookie);
                Ok(if mutating { req.header("CSRFPreventionToken", ticket.csrf) } else { req })
            }
        }
    }

    async fn decode<T: DeserializeOwned>(&self, resp: reqwest::Response, op: &str) -> Result<T> {
        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(Error::AuthFailed(format!("{op}: HTTP {status}")));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            if body.contains("already exists") {
                return Err(Error::conflict("vmid", body));
            }
            if status == reqwest::StatusCode::NOT_FOUND
                || body.contains("does not exist")
                || body.contains("no such")
            {
                return Err(Error::not_found("pve resource", format!("{op}: {body}")));
            }
            return Err(Error::Unreachable(format!("{op}: HTTP {status}: {body}")));
        }
        let env: Envelope<T> = resp
            .json()
            .await
            .map_err(|e| Error::Unreachable(format!("{op}: decoding response: {e}")))?;
        env.data.ok_or_else(|| Error::not_found("pve resource", op.to_string()))
    }

    /// GET with bounded retry on transient transport failures.
    /// Re-authorizes each attempt so a renewed ticket is picked up.
    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.url(path);
        let mut last = None;
        for attempt in 0..=RETRY_ATTEMPTS {
            if attempt > 0 {
                let backoff =
                    Duration::from_millis(500 * 2u64.pow(attempt - 1)).min(RETRY_BACKOFF_CAP);
                tokio::time::sleep(backoff).await;
                tracing::debug!(host = %self.host_name, attempt, path, "retrying pve request");
            }
            let req = self.authorize(self.http.get(&url), false).await?;
            match req.send().await {
                Ok(resp) => return self.decode(resp, path).await,
                Err(e) => {
                    let classified = Self::classify(e);
                    if !classified.is_transient() {
                        return Err(classified);
                    }
                    last = Some(classified);
                }
            }
        }
        Err(last.unwrap_or_else(|| Error::Unreachable(format!("GET {path} never sent"))))
    }

    async fn post<T: DeserializeOwned>(&self, path: &str, form: &[(&str, String)]) -> Result<T> {
        let url = self.url(path);
        let req = self.authorize(self.http.post(&url), true).await?;
        let resp = req.form(form).send().await.map_err(Self::classify)?;
        self.decode(resp, path).await
    }

    async fn put_form(&self, path: &str, form: &[(&str, String)]) -> Result<serde_json::Value> {
        let url = self.url(path);
        let req = self.authorize(self.http.put(&url), true).await?;
        let resp = req.form(form).send().await.map_err(Self::classify)?;
        self.decode(resp, path).await
    }

    async fn delete_req(&self, path: &str, form: &[(&str, String)]) -> Result<String> {
        let url = self.url(path);
        let mut req = self.authorize(self.http.delete(&url), true).await?;
        if !form.is_empty() {
            req = req.query(form);
        }
        let resp = req.send().await.map_err(Self::classify)?;
        let value: serde_json::Value = self.decode(resp, path).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }
}

#[async_trait]
impl PveGateway for PveClient {
    async fn ping(&self) -> Result<()> {
        let _: serde_json::Value = self.get("version").await?;
        Ok(())
    }

    async fn list_nodes(&self) -> Result<Vec<NodeInfo>> {
        self.get("nodes").await
    }

    async fn node_status(&self, node: &str) -> Result<NodeStatusInfo> {
        self.get(&format!("nodes/{node}/status")).await
    }

    async fn node_architecture(&self, node: &str) -> Result<String> {
        let status = self.node_status(node).await?;
        // PVE does not expose the dpkg architecture directly; infer it
        // from the CPU model, defaulting to amd64.
        let model = status
            .cpuinfo
            .and_then(|c| c.model)
            .unwrap_or_default()
            .to_lowercase();
        Ok(if model.contains("arm") || model.contains("aarch64") {
            "arm64".to_string()
        } else {
            "amd64".to_string()
        })
    }

    async fn list_storages(&self, node: &str) -> Result<Vec<StorageInfo>> {
        self.get(&format!("nodes/{node}/storage")).await
    }

    async fn select_storage(&self, node: &str, required_gb: u32) -> Result<StorageInfo> {
        let required = required_gb as u64 * 1024 * 1024 * 1024;
        let best = self
            .list_storages(node)
            .await?
            .into_iter()
            .filter(|s| s.is_usable() && (s.supports("rootdir") || s.supports("images")))
            .filter(|s| s.avail_bytes() >= required)
            .max_by_key(StorageInfo::avail_bytes);
        best.ok_or(Error::StorageUnavailable { node: node.to_string(), required_gb })
    }

    async fn list_lxc(&self, node: &str) -> Result<Vec<LxcInfo>> {
        self.get(&format!("nodes/{node}/lxc")).await
    }

    async fn lxc_status(&self, node: &str, vmid: u32) -> Result<LxcInfo> {
        self.get(&format!("nodes/{node}/lxc/{vmid}/status/current")).await
    }

    async fn lxc_config(&self, node: &str, vmid: u32) -> Result<BTreeMap<String, String>> {
        let raw: BTreeMap<String, serde_json::Value> =
            self.get(&format!("nodes/{node}/lxc/{vmid}/config")).await?;
        Ok(raw
            .into_iter()
            .map(|(k, v)| {
                let text = match v {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                };
                (k, text)
            })
            .collect())
    }

    async fn update_lxc_config(
        &self,
        node: &str,
        vmid: u32,
        patch: &[(String, String)],
    ) -> Result<()> {
        let form: Vec<(&str, String)> =
            patch.iter().map(|(k, v)| (k.as_str(), v.clone())).collect();
        self.put_form(&format!("nodes/{node}/lxc/{vmid}/config"), &form).await?;
        Ok(())
    }

    async fn resize_disk(&self, node: &str, vmid: u32, grow_to_gb: u32) -> Result<String> {
        let value = self
            .put_form(
                &format!("nodes/{node}/lxc/{vmid}/resize"),
                &[("disk", "rootfs".to_string()), ("size", format!("{grow_to_gb}G"))],
            )
            .await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn create_lxc(&self, node: &str, spec: &LxcSpec) -> Result<String> {
        tracing::info!(
            host = %self.host_name,
            node,
            vmid = spec.vmid,
            hostname = %spec.hostname,
            "creating LXC container"
        );
        self.post(
            &format!("nodes/{node}/lxc"),
            &[
                ("vmid", spec.vmid.to_string()),
                ("hostname", spec.hostname.clone()),
                ("ostemplate", spec.ostemplate.clone()),
                ("rootfs", spec.rootfs()),
                ("memory", spec.memory_mb.to_string()),
                ("cores", spec.cores.to_string()),
                ("password", spec.password.clone()),
                ("net0", spec.net0()),
                // the in-LXC container runtime needs these
                ("features", "nesting=1,keyctl=1".to_string()),
                ("unprivileged", "0".to_string()),
                ("start", if spec.start { "1" } else { "0" }.to_string()),
            ],
        )
        .await
    }

    async fn start_lxc(&self, node: &str, vmid: u32) -> Result<String> {
        self.post(&format!("nodes/{node}/lxc/{vmid}/status/start"), &[]).await
    }

    async fn stop_lxc(&self, node: &str, vmid: u32) -> Result<String> {
        self.post(&format!("nodes/{node}/lxc/{vmid}/status/stop"), &[]).await
    }

    async fn shutdown_lxc(&self, node: &str, vmid: u32) -> Result<String> {
        self.post(&format!("nodes/{node}/lxc/{vmid}/status/shutdown"), &[]).await
    }

    async fn delete_lxc(&self, node: &str, vmid: u32, force: bool) -> Result<String> {
        let mut params = vec![("purge", "1".to_string())];
        if force {
            params.push(("force", "1".to_string()));
        }
        self.delete_req(&format!("nodes/{node}/lxc/{vmid}"), &params).await
    }

    async fn clone_lxc(
        &self,
        node: &str,
        source: u32,
        new_vmid: u32,
        hostname: &str,
        full: bool,
        snapshot: Option<&str>,
    ) -> Result<String> {
        let mut form = vec![
            ("newid", new_vmid.to_string()),
            ("hostname", hostname.to_string()),
            ("full", if full { "1" } else { "0" }.to_string()),
        ];
        if let Some(snap) = snapshot {
            form.push(("snapname", snap.to_string()));
        }
        self.post(&format!("nodes/{node}/lxc/{source}/clone"), &form).await
    }

    async fn snapshot(&self, node: &str, vmid: u32, name: &str) -> Result<String> {
        self.post(
            &format!("nodes/{node}/lxc/{vmid}/snapshot"),
            &[("snapname", name.to_string())],
        )
        .await
    }

    async fn delete_snapshot(&self, node: &str, vmid: u32, name: &str) -> Result<String> {
        self.delete_req(&format!("nodes/{node}/lxc/{vmid}/snapshot/{name}"), &[]).await
    }

    async fn next_vmid(&self) -> Result<u32> {
        let raw: serde_json::Value = self.get("cluster/nextid").await?;
        match raw {
            serde_json::Value::Number(n) => n
                .as_u64()
                .map(|v| v as u32)
                .ok_or_else(|| Error::Unreachable("nextid out of range".into())),
            serde_json::Value::String(s) => s
                .parse()
                .map_err(|_| Error::Unreachable(format!("nextid not numeric: {s}"))),
            other => Err(Error::Unreachable(format!("unexpected nextid payload: {other}"))),
        }
    }

    async fn list_templates(&self, node: &str, storage: &str) -> Result<Vec<String>> {
        #[derive(serde::Deserialize)]
        struct Content {
            volid: String,
        }
        let entries: Vec<Content> = self
            .get(&format!("nodes/{node}/storage/{storage}/content?content=vztmpl"))
            .await?;
        Ok(entries.into_iter().map(|c| c.volid).collect())
    }

    async fn download_appliance_template(
        &self,
        node: &str,
        storage: &str,
        template: &str,
    ) -> Result<String> {
        tracing::info!(node, storage, template, "downloading container template");
        self.post(
            &format!("nodes/{node}/aplinfo"),
            &[("storage", storage.to_string()), ("template", template.to_string())],
        )
        .await
    }

    async fn backup(
        &self,
        node: &str,
        vmid: u32,
        storage: &str,
        mode: &str,
        compress: &str,
    ) -> Result<String> {
        self.post(
            &format!("nodes/{node}/vzdump"),
            &[
                ("vmid", vmid.to_string()),
                ("storage", storage.to_string()),
                ("mode", mode.to_string()),
                ("compress", compress.to_string()),
            ],
        )
        .await
    }

    async fn restore(
        &self,
        node: &str,
        vmid: u32,
        volid: &str,
        storage: &str,
    ) -> Result<String> {
        self.post(
            &format!("nodes/{node}/lxc"),
            &[
                ("vmid", vmid.to_string()),
                ("ostemplate", volid.to_string()),
                ("storage", storage.to_string()),
                ("restore", "1".to_string()),
                ("force", "1".to_string()),
            ],
        )
        .await
    }

    async fn list_backups(
        &self,
        node: &str,
        storage: &str,
        vmid: Option<u32>,
    ) -> Result<Vec<BackupVolume>> {
        let mut path = format!("nodes/{node}/storage/{storage}/content?content=backup");
        if let Some(vmid) = vmid {
            path.push_str(&format!("&vmid={vmid}"));
        }
        self.get(&path).await
    }

    async fn delete_backup(&self, node: &str, storage: &str, volid: &str) -> Result<()> {
        self.delete_req(&format!("nodes/{node}/storage/{storage}/content/{volid}"), &[])
            .await?;
        Ok(())
    }

    async fn task_status(&self, node: &str, upid: &str) -> Result<TaskStatus> {
        self.get(&format!("nodes/{node}/tasks/{upid}/status")).await
    }

    async fn task_log_tail(&self, node: &str, upid: &str, lines: usize) -> Result<Vec<String>> {
        let log: Vec<TaskLogLine> =
            self.get(&format!("nodes/{node}/tasks/{upid}/log?limit=500")).await?;
        let mut text: Vec<String> = log.into_iter().filter_map(|l| l.t).collect();
        if text.len() > lines {
            text.drain(..text.len() - lines);
        }
        Ok(text)
    }

    async fn http_probe(&self, url: &str) -> Result<u16> {
        let resp = self.http.get(url).send().await.map_err(Self::classify)?;
        Ok(resp.status().as_u16())
    }
}
