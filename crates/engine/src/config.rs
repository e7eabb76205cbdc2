// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Engine tunables and policy constants.

use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Inclusive public port range for reverse-proxy vhosts.
    pub public_ports: (u16, u16),
    /// Inclusive internal (iframe) port range; disjoint from public.
    pub internal_ports: (u16, u16),

    /// Per-job attempt ceiling for retryable jobs.
    pub max_attempts: u32,
    /// Backoff base: `retry_base · 2^attempt` between attempts.
    pub retry_base: Duration,
    /// Global worker pool size.
    pub worker_slots: usize,

    pub task_poll_interval: Duration,
    /// Settling delay after starting an LXC before touching it.
    pub post_start_delay: Duration,
    /// Delay before the post-update health probe.
    pub probe_delay: Duration,
    /// How long delete polls for the container to reach `stopped`.
    pub stop_poll_window: Duration,
    pub backup_wait: Duration,
    pub backup_deadline: Duration,
    pub template_download_timeout: Duration,
    pub pull_timeout: Duration,
    pub up_timeout: Duration,
    /// Default deadline for short remote commands.
    pub exec_timeout: Duration,

    pub stuck_threshold: Duration,
    pub reconcile_interval: Duration,
    pub janitor_interval: Duration,

    /// Host directory that holds per-hostname volume trees.
    pub volumes_root: PathBuf,
    /// Storage backups are written to.
    pub backup_storage: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            public_ports: (30000, 30999),
            internal_ports: (40000, 40999),
            max_attempts: 3,
            retry_base: Duration::from_secs(60),
            worker_slots: std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4),
            task_poll_interval: Duration::from_secs(2),
            post_start_delay: Duration::from_secs(10),
            probe_delay: Duration::from_secs(20),
            stop_poll_window: Duration::from_secs(30),
            backup_wait: Duration::from_secs(300),
            backup_deadline: Duration::from_secs(1800),
            template_download_timeout: Duration::from_secs(600),
            pull_timeout: Duration::from_secs(600),
            up_timeout: Duration::from_secs(300),
            exec_timeout: Duration::from_secs(300),
            stuck_threshold: Duration::from_secs(3600),
            reconcile_interval: Duration::from_secs(300),
            janitor_interval: Duration::from_secs(6 * 3600),
            volumes_root: PathBuf::from("/var/lib/proxharbor/volumes"),
            backup_storage: "local".into(),
        }
    }
}

impl EngineConfig {
    /// Millisecond-scale delays so pipeline tests run instantly.
    pub fn fast() -> Self {
        let ms = Duration::from_millis(1);
        Self {
            retry_base: ms,
            task_poll_interval: ms,
            post_start_delay: ms,
            probe_delay: ms,
            stop_poll_window: Duration::from_millis(20),
            backup_wait: Duration::from_millis(50),
            backup_deadline: Duration::from_millis(50),
            template_download_timeout: Duration::from_millis(50),
            pull_timeout: Duration::from_millis(50),
            up_timeout: Duration::from_millis(50),
            exec_timeout: Duration::from_millis(50),
            ..Self::default()
        }
    }
}
