// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! ph-store: durable application state.
//!
//! [`AppStore`] owns every record and the state machine: all status
//! writes go through [`AppStore::transition`], multi-field writes are
//! atomic under one state lock, and per-application row locks give
//! mutating jobs the read-modify-write isolation the engine depends
//! on. State is snapshotted to disk as JSON; the relational database
//! the deployment documentation assumes lives behind this same
//! surface.

pub mod snapshot;
pub mod state;
pub mod store;

pub use state::{AppFilter, JobRecord, Page, StoreState};
pub use store::AppStore;
