// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-host transport resolution.
//!
//! Clients are keyed by host id and held in a small bounded pool — no
//! process-wide globals, and tests swap the whole factory for fakes.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use ph_core::{HostId, ProxmoxHost, Result, SecretCipher};

use crate::client::PveClient;
use crate::gateway::PveGateway;
use crate::ssh::{RemoteExec, SshExec};

/// Resolves the two transports for a host. The engine only ever sees
/// this seam.
pub trait TransportFactory: Send + Sync {
    fn gateway(&self, host: &ProxmoxHost) -> Result<Arc<dyn PveGateway>>;
    fn remote(&self, host: &ProxmoxHost) -> Result<Arc<dyn RemoteExec>>;
}

/// Production factory: one cached client pair per host id, oldest
/// entry evicted beyond the cap.
pub struct ConnectionPool {
    cipher: SecretCipher,
    cap: usize,
    gateways: Mutex<PoolMap<Arc<PveClient>>>,
    remotes: Mutex<PoolMap<Arc<SshExec>>>,
}

struct PoolMap<T> {
    entries: HashMap<HostId, T>,
    order: Vec<HostId>,
}

impl<T> PoolMap<T> {
    fn new() -> Self {
        Self { entries: HashMap::new(), order: Vec::new() }
    }

    fn get_or_insert(&mut self, id: HostId, cap: usize, build: impl FnOnce() -> Result<T>) -> Result<&T>
    where
        T: Clone,
    {
        if !self.entries.contains_key(&id) {
            if self.order.len() >= cap {
                let evicted = self.order.remove(0);
                self.entries.remove(&evicted);
            }
            self.entries.insert(id, build()?);
            self.order.push(id);
        }
        Ok(&self.entries[&id])
    }
}

impl ConnectionPool {
    pub fn new(cipher: SecretCipher) -> Self {
        Self::with_capacity(cipher, 8)
    }

    pub fn with_capacity(cipher: SecretCipher, cap: usize) -> Self {
        Self {
            cipher,
            cap,
            gateways: Mutex::new(PoolMap::new()),
            remotes: Mutex::new(PoolMap::new()),
        }
    }
}

impl TransportFactory for ConnectionPool {
    fn gateway(&self, host: &ProxmoxHost) -> Result<Arc<dyn PveGateway>> {
        let mut pool = self.gateways.lock();
        let client = pool.get_or_insert(host.id, self.cap, || {
            PveClient::connect(host, &self.cipher).map(Arc::new)
        })?;
        Ok(client.clone())
    }

    fn remote(&self, host: &ProxmoxHost) -> Result<Arc<dyn RemoteExec>> {
        let mut pool = self.remotes.lock();
        let exec = pool.get_or_insert(host.id, self.cap, || {
            SshExec::connect_info(host, &self.cipher).map(Arc::new)
        })?;
        Ok(exec.clone())
    }
}
