// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cross-application resource allocators: port pairs and VMIDs.

pub mod ports;
pub mod vmid;

pub use ports::ensure_ports;
pub use vmid::acquire_vmid;
