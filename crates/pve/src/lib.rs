// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! ph-pve: the two transports into a Proxmox VE cluster.
//!
//! - [`gateway`] — the typed REST surface ([`PveGateway`]) and its
//!   `reqwest` implementation ([`client::PveClient`])
//! - [`ssh`] — `pct exec` over per-call SSH sessions ([`RemoteExec`])
//! - [`task`] — polling long-running PVE task UPIDs to completion
//!
//! Both transports are traits so the engine runs against fakes in
//! tests; the fakes live in [`fake`] behind the `test-support` feature.

pub mod client;
pub mod gateway;
pub mod pool;
pub mod ssh;
pub mod task;
pub mod types;

#[cfg(any(test, feature = "test-support"))]
pub mod fake;

pub use gateway::{LxcSpec, PveGateway};
pub use pool::TransportFactory;
pub use ssh::{ExecOutput, RemoteExec, SshExec};
pub use task::{wait_for_task, WaitOptions};
pub use types::{
    BackupVolume, LxcInfo, NodeInfo, NodeStatusInfo, StorageInfo, TaskStatus,
};

#[cfg(any(test, feature = "test-support"))]
pub use fake::{FakeExec, FakePve, FakeTransports};
