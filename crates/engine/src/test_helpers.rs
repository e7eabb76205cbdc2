// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Engine test rig: fake transports, fast config, seeded store.

use std::sync::Arc;

use ph_core::test_support::{catalog_fixture, host_fixture, node_fixture, GIB};
use ph_core::{AppId, AppStatus, Application, ApplicationBuilder, FakeClock, SecretCipher};
use ph_pve::{FakeExec, FakePve, FakeTransports};
use ph_store::AppStore;

use crate::config::EngineConfig;
use crate::ctx::EngineDeps;

pub(crate) struct TestRig {
    pub deps: Arc<EngineDeps<FakeClock>>,
    pub pve: Arc<FakePve>,
    pub exec: Arc<FakeExec>,
    pub clock: FakeClock,
}

impl TestRig {
    /// One host `hst-1` with one online node `pve1` and a fake cluster
    /// carrying an Alpine template.
    pub fn new() -> Self {
        Self::with_exec(Arc::new(FakeExec::with_defaults()))
    }

    pub fn with_exec(exec: Arc<FakeExec>) -> Self {
        let clock = FakeClock::new();
        let store = Arc::new(AppStore::new(clock.clone()));
        store.upsert_host(host_fixture("hst-1")).unwrap();
        let host_id = ph_core::HostId::from_string("hst-1");
        store.refresh_nodes(host_id, vec![node_fixture("hst-1", "pve1", 8 * GIB)]);

        let pve = Arc::new(FakePve::single_node("pve1"));
        let transports = Arc::new(FakeTransports::new(pve.clone(), exec.clone()));

        let deps = Arc::new(EngineDeps::new(
            store,
            transports,
            catalog_fixture(),
            SecretCipher::ephemeral(),
            EngineConfig::fast(),
            clock.clone(),
        ));

        Self { deps, pve, exec, clock }
    }

    /// A fresh row in `deploying` on host `hst-1`.
    pub fn seed_app(&self, hostname: &str) -> Application {
        let app = ApplicationBuilder::default()
            .id(format!("app-{hostname}"))
            .hostname(hostname)
            .host_id("hst-1")
            .build();
        self.deps.store.create_application(app).unwrap()
    }

    /// A `running` row with ports, VMID and a matching fake container.
    pub fn seed_running_app(&self, hostname: &str, vmid: u32) -> Application {
        let app = ApplicationBuilder::default()
            .id(format!("app-{hostname}"))
            .hostname(hostname)
            .host_id("hst-1")
            .node("pve1")
            .build();
        let app = self.deps.store.create_application(app).unwrap();
        self.deps
            .store
            .allocate_ports(app.id, self.deps.config.public_ports, self.deps.config.internal_ports)
            .unwrap();
        self.deps.store.set_vmid(app.id, vmid).unwrap();
        self.pve.seed_container("pve1", vmid, hostname, true);
        self.deps
            .store
            .transition(app.id, AppStatus::Deploying, AppStatus::Running)
            .unwrap()
    }

    /// Drive a row from `deploying` to `error`.
    pub fn fail_app(&self, id: AppId) {
        self.deps
            .store
            .transition(id, AppStatus::Deploying, AppStatus::Error)
            .unwrap();
    }

    pub fn status_of(&self, id: AppId) -> AppStatus {
        self.deps.store.get_app(id).unwrap().status
    }
}
