// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Atomic JSON snapshots of the store state.
//!
//! Written to a temp file in the same directory and renamed over the
//! target so readers never observe a half-written snapshot.

use std::path::Path;

use ph_core::{Clock, Error, Result};

use crate::state::StoreState;
use crate::store::AppStore;

const SNAPSHOT_FILE: &str = "state.json";

/// Persist the current state under `dir`.
pub fn save<C: Clock>(store: &AppStore<C>, dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir)
        .map_err(|e| Error::DatabaseError(format!("creating state dir: {e}")))?;
    let state = store.state();
    let raw = serde_json::to_vec_pretty(&state)
        .map_err(|e| Error::DatabaseError(format!("serializing snapshot: {e}")))?;

    let target = dir.join(SNAPSHOT_FILE);
    let tmp = dir.join(format!("{SNAPSHOT_FILE}.tmp"));
    std::fs::write(&tmp, raw)
        .map_err(|e| Error::DatabaseError(format!("writing snapshot: {e}")))?;
    std::fs::rename(&tmp, &target)
        .map_err(|e| Error::DatabaseError(format!("activating snapshot: {e}")))?;
    tracing::debug!(path = %target.display(), apps = state.apps.len(), "state snapshot written");
    Ok(())
}

/// Load state from `dir`, or an empty state when no snapshot exists.
pub fn load(dir: &Path) -> Result<StoreState> {
    let path = dir.join(SNAPSHOT_FILE);
    if !path.is_file() {
        return Ok(StoreState::default());
    }
    let raw = std::fs::read(&path)
        .map_err(|e| Error::DatabaseError(format!("reading snapshot: {e}")))?;
    serde_json::from_slice(&raw)
        .map_err(|e| Error::DatabaseError(format!("parsing snapshot {}: {e}", path.display())))
}
