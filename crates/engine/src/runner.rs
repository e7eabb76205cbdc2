// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The background job runner.
//!
//! One job per application id at a time (an in-process guard on top of
//! the store's row locks), jobs for different applications in parallel
//! under a global semaphore. Transient failures of retryable kinds
//! back off exponentially (`retry_base · 2^attempt`) up to the attempt
//! ceiling; terminal failures run the kind's compensation and leave
//! the error on the durable JobRecord.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use ph_core::{AppId, BackupId, BackupKind, Clock, Error, ErrorKind, JobId, Result};
use ph_store::JobRecord;

use crate::ctx::{EngineDeps, JobCtx};
use crate::{backup, clone_app, deploy, lifecycle, update};

#[derive(Debug, Clone)]
pub enum JobKind {
    Deploy,
    Start,
    Stop,
    Restart,
    Update,
    Delete,
    Clone { source: AppId },
    Adopt,
    Backup { kind: BackupKind },
    Restore { backup_id: BackupId },
}

impl JobKind {
    pub fn name(&self) -> &'static str {
        match self {
            JobKind::Deploy => "deploy",
            JobKind::Start => "start",
            JobKind::Stop => "stop",
            JobKind::Restart => "restart",
            JobKind::Update => "update",
            JobKind::Delete => "delete",
            JobKind::Clone { .. } => "clone",
            JobKind::Adopt => "adopt",
            JobKind::Backup { .. } => "backup",
            JobKind::Restore { .. } => "restore",
        }
    }

    /// Only deploys are re-attempted by the runner; every other kind
    /// settles its own terminal state in one attempt.
    fn retryable(&self) -> bool {
        matches!(self, JobKind::Deploy)
    }
}

pub struct JobRunner<C: Clock> {
    deps: Arc<EngineDeps<C>>,
    inflight: Arc<Mutex<HashMap<AppId, JobId>>>,
    slots: Arc<Semaphore>,
    shutdown: CancellationToken,
}

impl<C: Clock> JobRunner<C> {
    pub fn new(deps: Arc<EngineDeps<C>>) -> Self {
        let slots = Arc::new(Semaphore::new(deps.config.worker_slots));
        Self {
            deps,
            inflight: Arc::new(Mutex::new(HashMap::new())),
            slots,
            shutdown: CancellationToken::new(),
        }
    }

    /// Enqueue a job for an application. Refuses while another job for
    /// the same application is in flight.
    pub fn submit(&self, app_id: AppId, kind: JobKind) -> Result<JobId> {
        let job_id = JobId::new();
        {
            let mut inflight = self.inflight.lock();
            if inflight.contains_key(&app_id) {
                return Err(Error::conflict("job", format!("{app_id} already has a job running")));
            }
            inflight.insert(app_id, job_id);
        }

        self.deps.store.upsert_job(JobRecord {
            job_id,
            application_id: app_id,
            kind: kind.name().to_string(),
            attempt: 0,
            next_retry_at_ms: None,
            last_error: None,
        });

        let deps = self.deps.clone();
        let inflight = self.inflight.clone();
        let slots = self.slots.clone();
        let cancel = self.shutdown.child_token();
        tokio::spawn(async move {
            // hold a pool slot for the whole job
            let _permit = match slots.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    inflight.lock().remove(&app_id);
                    return;
                }
            };
            let mut ctx = JobCtx::new(deps, app_id, cancel);
            run_job(&mut ctx, job_id, kind).await;
            inflight.lock().remove(&app_id);
        });

        Ok(job_id)
    }

    pub fn is_busy(&self, app_id: AppId) -> bool {
        self.inflight.lock().contains_key(&app_id)
    }

    /// Request cooperative shutdown of every running job.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Wait until no job is in flight (drain after shutdown).
    pub async fn drain(&self) {
        loop {
            if self.inflight.lock().is_empty() {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    }
}

async fn run_job<C: Clock>(ctx: &mut JobCtx<C>, job_id: JobId, kind: JobKind) {
    let max_attempts = ctx.deps.config.max_attempts;
    let mut attempt = 1u32;

    loop {
        ctx.attempt = attempt;
        record_attempt(ctx, job_id, &kind, attempt, None, None);

        let result = execute(ctx, &kind).await;
        match result {
            Ok(()) => {
                ctx.deps.store.remove_job(job_id);
                tracing::info!(app_id = %ctx.app_id, job = kind.name(), attempt, "job finished");
                return;
            }
            Err(err) if err.kind() == ErrorKind::Canceled => {
                // shutdown: leave the transitional row for the janitor,
                // never run compensation that would touch the cluster
                record_attempt(ctx, job_id, &kind, attempt, None, Some(err.to_string()));
                tracing::warn!(app_id = %ctx.app_id, job = kind.name(), "job canceled");
                return;
            }
            Err(err) if kind.retryable() && err.is_transient() && attempt < max_attempts => {
                let delay = ctx.deps.config.retry_base * 2u32.pow(attempt);
                let next_retry = ctx.deps.clock.epoch_ms() + delay.as_millis() as u64;
                record_attempt(ctx, job_id, &kind, attempt, Some(next_retry), Some(err.to_string()));
                tracing::warn!(
                    app_id = %ctx.app_id,
                    job = kind.name(),
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient failure, backing off"
                );
                if ctx.sleep(delay).await.is_err() {
                    return;
                }
                attempt += 1;
            }
            Err(err) => {
                record_attempt(ctx, job_id, &kind, attempt, None, Some(err.to_string()));
                finalize_failure(ctx, &kind, &err).await;
                tracing::error!(
                    app_id = %ctx.app_id,
                    job = kind.name(),
                    attempt,
                    error = %err,
                    "job failed terminally"
                );
                return;
            }
        }
    }
}

async fn execute<C: Clock>(ctx: &JobCtx<C>, kind: &JobKind) -> Result<()> {
    match kind {
        JobKind::Deploy => deploy::run(ctx).await,
        JobKind::Start => lifecycle::start(ctx).await,
        JobKind::Stop => lifecycle::stop(ctx).await,
        JobKind::Restart => lifecycle::restart(ctx).await,
        JobKind::Update => update::run(ctx).await,
        JobKind::Delete => lifecycle::delete(ctx).await,
        JobKind::Clone { source } => clone_app::run(ctx, *source).await,
        JobKind::Adopt => lifecycle::adopt(ctx).await,
        JobKind::Backup { kind } => backup::run_backup(ctx, *kind).await,
        JobKind::Restore { backup_id } => backup::run_restore(ctx, *backup_id).await,
    }
}

/// Kind-specific terminal compensation.
async fn finalize_failure<C: Clock>(ctx: &JobCtx<C>, kind: &JobKind, err: &Error) {
    match kind {
        JobKind::Deploy => deploy::on_terminal_failure(ctx, err).await,
        JobKind::Clone { .. } => clone_app::on_terminal_failure(ctx, err).await,
        JobKind::Adopt => lifecycle::on_adopt_failure(ctx, err).await,
        JobKind::Delete => {
            // a delete that cannot finish parks the row in error
            let _ = ctx.deps.store.transition(
                ctx.app_id,
                ph_core::AppStatus::Removing,
                ph_core::AppStatus::Error,
            );
        }
        // update/backup/restore/start/stop/restart settle their own state
        _ => {}
    }
}

fn record_attempt<C: Clock>(
    ctx: &JobCtx<C>,
    job_id: JobId,
    kind: &JobKind,
    attempt: u32,
    next_retry_at_ms: Option<u64>,
    last_error: Option<String>,
) {
    ctx.deps.store.upsert_job(JobRecord {
        job_id,
        application_id: ctx.app_id,
        kind: kind.name().to_string(),
        attempt,
        next_retry_at_ms,
        last_error,
    });
}

#[cfg(test)]
#[path = "runner_tests.rs"]
mod tests;
