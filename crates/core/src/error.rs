// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The orchestrator error taxonomy.
//!
//! One enum spans every failure the engine classifies, so jobs, the
//! runner, and the façade all agree on which failures are transient
//! (retried by the runner), which are handled locally (VMID conflicts),
//! and which are terminal for the attempt.

use crate::status::AppStatus;
use std::time::Duration;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("endpoint unreachable: {0}")]
    Unreachable(String),

    #[error("TLS error: {0}")]
    TlsError(String),

    #[error("{resource} not found: {name}")]
    NotFound { resource: &'static str, name: String },

    #[error("{resource} already taken: {name}")]
    Conflict { resource: &'static str, name: String },

    #[error("action not legal in state {current} (requested {requested})")]
    StateInvalid { current: AppStatus, requested: String },

    #[error("task {task} failed: {reason}")]
    TaskFailed { task: String, reason: String, tail: Vec<String> },

    #[error("{op} timed out after {duration:?}")]
    Timeout { op: String, duration: Duration },

    #[error("no free ports in the {range} range")]
    PortsExhausted { range: &'static str },

    #[error("could not acquire a VMID after {attempts} attempts")]
    VmidAcquisitionFailed { attempts: u32 },

    #[error("no storage with at least {required_gb} GB free on node {node}")]
    StorageUnavailable { node: String, required_gb: u32 },

    #[error("no container template for family {family} ({arch})")]
    TemplateUnavailable { family: String, arch: String },

    #[error("remote command exited {exit}: {stderr}")]
    ExecFailed { exit: i32, stderr: String },

    #[error("update aborted: {0}")]
    UpdateAborted(String),

    #[error("clone aborted: {0}")]
    CloneAborted(String),

    #[error("deployment failed at step {step}: {cause}")]
    DeploymentFailed { step: &'static str, cause: Box<Error> },

    #[error("store error: {0}")]
    DatabaseError(String),

    #[error("operation canceled")]
    Canceled,
}

/// Stable discriminant for façade payloads and metrics labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    AuthFailed,
    Unreachable,
    TlsError,
    NotFound,
    Conflict,
    StateInvalid,
    TaskFailed,
    Timeout,
    PortsExhausted,
    VmidAcquisitionFailed,
    StorageUnavailable,
    TemplateUnavailable,
    ExecFailed,
    UpdateAborted,
    CloneAborted,
    DeploymentFailed,
    DatabaseError,
    Canceled,
}

crate::simple_display! {
    ErrorKind {
        AuthFailed => "auth_failed",
        Unreachable => "unreachable",
        TlsError => "tls_error",
        NotFound => "not_found",
        Conflict => "conflict",
        StateInvalid => "state_invalid",
        TaskFailed => "task_failed",
        Timeout => "timeout",
        PortsExhausted => "ports_exhausted",
        VmidAcquisitionFailed => "vmid_acquisition_failed",
        StorageUnavailable => "storage_unavailable",
        TemplateUnavailable => "template_unavailable",
        ExecFailed => "exec_failed",
        UpdateAborted => "update_aborted",
        CloneAborted => "clone_aborted",
        DeploymentFailed => "deployment_failed",
        DatabaseError => "database_error",
        Canceled => "canceled",
    }
}

impl Error {
    pub fn not_found(resource: &'static str, name: impl Into<String>) -> Self {
        Error::NotFound { resource, name: name.into() }
    }

    pub fn conflict(resource: &'static str, name: impl Into<String>) -> Self {
        Error::Conflict { resource, name: name.into() }
    }

    pub fn timeout(op: impl Into<String>, duration: Duration) -> Self {
        Error::Timeout { op: op.into(), duration }
    }

    pub fn state_invalid(current: AppStatus, requested: impl Into<String>) -> Self {
        Error::StateInvalid { current, requested: requested.into() }
    }

    /// Wrap a step failure for the deployment pipeline, preserving the cause.
    pub fn at_step(step: &'static str, cause: Error) -> Self {
        Error::DeploymentFailed { step, cause: Box::new(cause) }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::AuthFailed(_) => ErrorKind::AuthFailed,
            Error::Unreachable(_) => ErrorKind::Unreachable,
            Error::TlsError(_) => ErrorKind::TlsError,
            Error::NotFound { .. } => ErrorKind::NotFound,
            Error::Conflict { .. } => ErrorKind::Conflict,
            Error::StateInvalid { .. } => ErrorKind::StateInvalid,
            Error::TaskFailed { .. } => ErrorKind::TaskFailed,
            Error::Timeout { .. } => ErrorKind::Timeout,
            Error::PortsExhausted { .. } => ErrorKind::PortsExhausted,
            Error::VmidAcquisitionFailed { .. } => ErrorKind::VmidAcquisitionFailed,
            Error::StorageUnavailable { .. } => ErrorKind::StorageUnavailable,
            Error::TemplateUnavailable { .. } => ErrorKind::TemplateUnavailable,
            Error::ExecFailed { .. } => ErrorKind::ExecFailed,
            Error::UpdateAborted(_) => ErrorKind::UpdateAborted,
            Error::CloneAborted(_) => ErrorKind::CloneAborted,
            Error::DeploymentFailed { .. } => ErrorKind::DeploymentFailed,
            Error::DatabaseError(_) => ErrorKind::DatabaseError,
            Error::Canceled => ErrorKind::Canceled,
        }
    }

    /// Whether the job runner should retry the whole attempt.
    ///
    /// Connection-layer flakes and timeouts are worth another attempt;
    /// everything else either resolved locally (VMID conflicts) or is
    /// terminal. A wrapped deployment failure inherits from its cause.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Unreachable(_) | Error::TlsError(_) | Error::Timeout { .. } => true,
            Error::DeploymentFailed { cause, .. } => cause.is_transient(),
            _ => false,
        }
    }
}

/// Concise error shape handed to the HTTP layer by the façade.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ErrorObject {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl From<&Error> for ErrorObject {
    fn from(err: &Error) -> Self {
        let details = match err {
            Error::TaskFailed { tail, .. } if !tail.is_empty() => {
                Some(serde_json::json!({ "log_tail": tail }))
            }
            Error::ExecFailed { exit, .. } => Some(serde_json::json!({ "exit": exit })),
            Error::DeploymentFailed { step, .. } => Some(serde_json::json!({ "step": step })),
            _ => None,
        };
        ErrorObject { kind: err.kind(), message: err.to_string(), details }
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
