// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! phd: the Prox Harbor controller daemon.
//!
//! Wires the store, the cluster transports and the engine together,
//! then runs the periodic loops: reconciliation, the janitor, and
//! state snapshots. The HTTP layer (out of tree) mounts the
//! [`ph_engine::Facade`] this binary constructs.

mod config;

use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::EnvFilter;

use ph_core::{
    Catalog, Error, HostCredentials, HostId, ProxmoxHost, Result, SecretCipher, SystemClock,
};
use ph_engine::{EngineDeps, Facade, JobRunner};
use ph_pve::pool::ConnectionPool;
use ph_store::{snapshot, AppStore};

use config::DaemonConfig;

fn main() -> std::process::ExitCode {
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(err) => {
            eprintln!("phd: failed to start runtime: {err}");
            return std::process::ExitCode::FAILURE;
        }
    };
    match runtime.block_on(run()) {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "phd exiting on error");
            eprintln!("phd: {err}");
            std::process::ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    let config = DaemonConfig::load(&DaemonConfig::path())?;
    let _log_guard = init_tracing(&config);
    tracing::info!(
        state_dir = %config.state_dir.display(),
        catalog_dir = %config.catalog_dir.display(),
        hosts = config.hosts.len(),
        "phd starting"
    );

    let cipher = match &config.encryption_key {
        Some(hex_key) => SecretCipher::from_hex_key(hex_key)?,
        None => {
            tracing::warn!("no encryption key configured; secrets will not survive a restart");
            SecretCipher::ephemeral()
        }
    };

    let clock = SystemClock;
    let state = snapshot::load(&config.state_dir)?;
    let store = Arc::new(AppStore::from_state(state, clock.clone()));
    seed_hosts(&store, &config, &cipher)?;

    let catalog = Catalog::load_dir(&config.catalog_dir).unwrap_or_else(|err| {
        tracing::warn!(error = %err, "catalog unavailable, starting empty");
        Catalog::default()
    });

    let transports = Arc::new(ConnectionPool::new(cipher.clone()));
    let deps = Arc::new(EngineDeps::new(
        store.clone(),
        transports,
        catalog,
        cipher,
        config.engine_config(),
        clock,
    ));
    let runner = Arc::new(JobRunner::new(deps.clone()));
    // handed to the HTTP layer; the daemon itself only runs the loops
    let _facade = Facade::new(deps.clone(), runner.clone());

    // startup sweep so a crash during a job surfaces quickly
    if let Err(err) = ph_engine::reconcile::run_once(&deps).await {
        tracing::warn!(error = %err, "startup reconciliation failed");
    }

    run_loops(&config, &deps, &runner, &store).await;

    tracing::info!("shutdown requested, draining jobs");
    runner.shutdown();
    let drained = tokio::time::timeout(Duration::from_secs(30), runner.drain()).await;
    if drained.is_err() {
        tracing::warn!("jobs did not drain within 30s, exiting anyway");
    }
    snapshot::save(&store, &config.state_dir)?;
    tracing::info!("phd stopped");
    Ok(())
}

async fn run_loops(
    config: &DaemonConfig,
    deps: &Arc<EngineDeps<SystemClock>>,
    _runner: &Arc<JobRunner<SystemClock>>,
    store: &Arc<AppStore<SystemClock>>,
) {
    let mut reconcile_tick = tokio::time::interval(deps.config.reconcile_interval);
    let mut janitor_tick = tokio::time::interval(deps.config.janitor_interval);
    let mut snapshot_tick =
        tokio::time::interval(Duration::from_secs(config.snapshot_interval_secs.max(5)));
    // the first tick of an interval fires immediately; skip it
    reconcile_tick.tick().await;
    janitor_tick.tick().await;
    snapshot_tick.tick().await;

    loop {
        tokio::select! {
            _ = shutdown_signal() => return,
            _ = reconcile_tick.tick() => {
                match ph_engine::reconcile::run_once(deps).await {
                    Ok(report) if report.anomalous_orphans > 0 => {
                        tracing::warn!(
                            anomalous = report.anomalous_orphans,
                            "reconciliation found anomalous orphans"
                        );
                    }
                    Ok(_) => {}
                    Err(err) => tracing::warn!(error = %err, "reconciliation sweep failed"),
                }
            }
            _ = janitor_tick.tick() => {
                match ph_engine::janitor::run_once(deps).await {
                    Ok(report) if report.failed > 0 => {
                        tracing::warn!(failed = report.failed, "janitor failed stuck applications");
                    }
                    Ok(_) => {}
                    Err(err) => tracing::warn!(error = %err, "janitor sweep failed"),
                }
            }
            _ = snapshot_tick.tick() => {
                if let Err(err) = snapshot::save(store, &config.state_dir) {
                    tracing::warn!(error = %err, "state snapshot failed");
                }
            }
        }
    }
}

/// Stdout logging with `RUST_LOG`-style filtering; a daily-rotated
/// file sink too when `log_dir` is configured. The returned guard
/// must live as long as the process so the appender flushes.
fn init_tracing(config: &DaemonConfig) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "phd.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
            None
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut term = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        {
            Ok(signal) => signal,
            Err(_) => {
                let _ = ctrl_c.await;
                return;
            }
        };
        tokio::select! {
            _ = ctrl_c => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}

/// Upsert the configured hosts, encrypting their secrets on the way
/// in. Host identity is keyed by display name so re-running with the
/// same file does not multiply rows.
fn seed_hosts(
    store: &AppStore<SystemClock>,
    config: &DaemonConfig,
    cipher: &SecretCipher,
) -> Result<()> {
    for entry in &config.hosts {
        let existing = store
            .list_hosts()
            .into_iter()
            .find(|h| h.display_name == entry.display_name);
        let id = existing.map(|h| h.id).unwrap_or_else(HostId::new);
        store.upsert_host(ProxmoxHost {
            id,
            display_name: entry.display_name.clone(),
            api_address: entry.api_address.clone(),
            api_port: entry.api_port,
            ssh_port: entry.ssh_port,
            credentials: HostCredentials {
                api_user: entry.api_user.clone(),
                api_secret: cipher.encrypt(&entry.api_secret)?,
                token_auth: entry.token_auth,
                ssh_user: entry.ssh_user.clone(),
                ssh_password: cipher.encrypt(&entry.ssh_password)?,
            },
            verify_tls: entry.verify_tls,
            active: true,
            default: entry.default,
        })?;
    }
    if config.hosts.is_empty() && store.list_hosts().is_empty() {
        return Err(Error::not_found("host", "no hosts configured"));
    }
    Ok(())
}
