// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Append-only per-application deployment log.
//!
//! Each pipeline step writes entries under a stable `step` tag so the
//! operator can follow a deploy (or autopsy a failure) step by step.

use serde::{Deserialize, Serialize};

use crate::id::AppId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
}

crate::simple_display! {
    LogLevel {
        Info => "info",
        Warning => "warning",
        Error => "error",
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployLogEntry {
    pub application_id: AppId,
    pub timestamp_ms: u64,
    pub level: LogLevel,
    /// Stable step tag, e.g. `lxc_create`, `compose_up`, `janitor`.
    pub step: String,
    pub message: String,
}
