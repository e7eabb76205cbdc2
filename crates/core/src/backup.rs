// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Backup metadata rows.

use serde::{Deserialize, Serialize};

use crate::id::{AppId, BackupId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupKind {
    Manual,
    PreUpdate,
    Scheduled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupStatus {
    Creating,
    Available,
    Failed,
    Restoring,
}

crate::simple_display! {
    BackupStatus {
        Creating => "creating",
        Available => "available",
        Failed => "failed",
        Restoring => "restoring",
    }
}

/// One vzdump archive tracked for an application.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Backup {
    pub id: BackupId,
    pub application_id: AppId,
    /// Archive filename as produced by vzdump; used with
    /// `storage_name` to resolve the volid on restore.
    pub filename: Option<String>,
    pub storage_name: String,
    pub size_bytes: Option<u64>,
    pub kind: BackupKind,
    pub status: BackupStatus,
    pub error_message: Option<String>,
    pub created_at_ms: u64,
    pub completed_at_ms: Option<u64>,
}

impl Backup {
    /// PVE volume id of the archive, once the filename is known.
    pub fn volid(&self) -> Option<String> {
        self.filename.as_ref().map(|f| format!("{}:backup/{}", self.storage_name, f))
    }
}
