// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Port pair allocation.
//!
//! The smallest-free scan and the persisting write happen inside one
//! store transaction; this wrapper only adds idempotency (a retried
//! deploy keeps the pair it already holds) and logging.

use ph_core::{AppId, Clock, Result};

use crate::ctx::EngineDeps;

/// Ensure the application holds a `(public, internal)` pair.
pub fn ensure_ports<C: Clock>(deps: &EngineDeps<C>, id: AppId) -> Result<(u16, u16)> {
    let app = deps.store.get_app(id)?;
    if let (Some(public), Some(internal)) = (app.public_port, app.internal_port) {
        return Ok((public, internal));
    }

    let (public, internal) =
        deps.store
            .allocate_ports(id, deps.config.public_ports, deps.config.internal_ports)?;
    tracing::info!(app_id = %id, public, internal, "allocated port pair");
    Ok((public, internal))
}
