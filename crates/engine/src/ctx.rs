// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared dependencies and the per-job execution context.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use ph_core::{AppId, Application, Catalog, Clock, Error, LogLevel, ProxmoxHost, Result, SecretCipher};
use ph_pve::{PveGateway, RemoteExec, TransportFactory};
use ph_store::AppStore;

use crate::appliance::Appliance;
use crate::config::EngineConfig;

/// Everything the engine's components share.
pub struct EngineDeps<C: Clock> {
    pub store: Arc<AppStore<C>>,
    pub transports: Arc<dyn TransportFactory>,
    pub catalog: Catalog,
    pub cipher: SecretCipher,
    pub config: EngineConfig,
    pub clock: C,
    pub appliance: Appliance,
}

impl<C: Clock> EngineDeps<C> {
    pub fn new(
        store: Arc<AppStore<C>>,
        transports: Arc<dyn TransportFactory>,
        catalog: Catalog,
        cipher: SecretCipher,
        config: EngineConfig,
        clock: C,
    ) -> Self {
        Self {
            store,
            transports,
            catalog,
            cipher,
            config,
            clock,
            appliance: Appliance::new(),
        }
    }

    /// The host record an application is bound to.
    pub fn app_host(&self, app: &Application) -> Result<ProxmoxHost> {
        self.store.get_host(app.host_id)
    }

    pub fn gateway(&self, host: &ProxmoxHost) -> Result<Arc<dyn PveGateway>> {
        self.transports.gateway(host)
    }

    pub fn remote(&self, host: &ProxmoxHost) -> Result<Arc<dyn RemoteExec>> {
        self.transports.remote(host)
    }
}

/// Context handed to one job attempt.
pub struct JobCtx<C: Clock> {
    pub deps: Arc<EngineDeps<C>>,
    pub app_id: AppId,
    pub cancel: CancellationToken,
    /// 1-based attempt counter.
    pub attempt: u32,
}

impl<C: Clock> JobCtx<C> {
    pub fn new(deps: Arc<EngineDeps<C>>, app_id: AppId, cancel: CancellationToken) -> Self {
        Self { deps, app_id, cancel, attempt: 1 }
    }

    /// Bail with `Canceled` once shutdown has been requested. Called
    /// before every remote operation so stop signals abort cleanly.
    pub fn ensure_live(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::Canceled);
        }
        Ok(())
    }

    /// Sleep that loses to cancellation.
    pub async fn sleep(&self, dur: std::time::Duration) -> Result<()> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(Error::Canceled),
            _ = tokio::time::sleep(dur) => Ok(()),
        }
    }

    pub fn app(&self) -> Result<Application> {
        self.deps.store.get_app(self.app_id)
    }

    /// Deployment-log helper; also mirrors to tracing.
    pub fn log(&self, level: LogLevel, step: &str, message: impl Into<String>) {
        let message = message.into();
        match level {
            LogLevel::Info => tracing::info!(app_id = %self.app_id, step, "{message}"),
            LogLevel::Warning => tracing::warn!(app_id = %self.app_id, step, "{message}"),
            LogLevel::Error => tracing::error!(app_id = %self.app_id, step, "{message}"),
        }
        self.deps.store.log_deploy(self.app_id, level, step, message);
    }
}
