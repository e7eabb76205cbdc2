// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use ph_core::test_support::host_fixture;
use ph_core::{AppStatus, ApplicationBuilder, FakeClock};

const PUBLIC: (u16, u16) = (30000, 30999);
const INTERNAL: (u16, u16) = (40000, 40999);

fn store() -> AppStore<FakeClock> {
    AppStore::new(FakeClock::new())
}

fn seeded() -> (AppStore<FakeClock>, AppId) {
    let store = store();
    let app = ApplicationBuilder::default().id("app-1").build();
    let id = app.id;
    store.create_application(app).unwrap();
    (store, id)
}

#[test]
fn create_stamps_timestamps() {
    let clock = FakeClock::new();
    clock.set_epoch_ms(5_000);
    let store = AppStore::new(clock);
    let app = store
        .create_application(ApplicationBuilder::default().build())
        .unwrap();
    assert_eq!(app.created_at_ms, 5_000);
    assert_eq!(app.state_changed_at_ms, 5_000);
}

#[test]
fn create_rejects_non_initial_status() {
    let store = store();
    let app = ApplicationBuilder::default().status(AppStatus::Running).build();
    assert!(store.create_application(app).is_err());
}

#[test]
fn duplicate_hostname_conflicts() {
    let (store, _) = seeded();
    let dup = ApplicationBuilder::default().id("app-2").hostname("app01").build();
    let err = store.create_application(dup).unwrap_err();
    assert_eq!(err.kind(), ph_core::ErrorKind::Conflict);
}

#[test]
fn transition_updates_state_changed_at() {
    let clock = FakeClock::new();
    let store = AppStore::new(clock.clone());
    let app = store
        .create_application(ApplicationBuilder::default().build())
        .unwrap();
    let before = app.state_changed_at_ms;

    clock.advance(std::time::Duration::from_secs(10));
    let app = store.transition(app.id, AppStatus::Deploying, AppStatus::Running).unwrap();
    assert_eq!(app.status, AppStatus::Running);
    assert_eq!(app.state_changed_at_ms, before + 10_000);
}

#[test]
fn transition_refuses_stale_from() {
    let (store, id) = seeded();
    store.transition(id, AppStatus::Deploying, AppStatus::Running).unwrap();
    // a second writer with a stale view loses
    let err = store.transition(id, AppStatus::Deploying, AppStatus::Running).unwrap_err();
    assert_eq!(err.kind(), ph_core::ErrorKind::StateInvalid);
}

#[test]
fn transition_refuses_illegal_edge() {
    let (store, id) = seeded();
    let err = store.transition(id, AppStatus::Deploying, AppStatus::Stopped).unwrap_err();
    assert_eq!(err.kind(), ph_core::ErrorKind::StateInvalid);
}

#[test]
fn update_app_cannot_write_status() {
    let (store, id) = seeded();
    let err = store.update_app(id, |app| app.status = AppStatus::Running).unwrap_err();
    assert_eq!(err.kind(), ph_core::ErrorKind::DatabaseError);
    assert_eq!(store.get_app(id).unwrap().status, AppStatus::Deploying);
}

#[test]
fn ports_allocate_sequentially_and_release() {
    let store = store();
    let a = store
        .create_application(ApplicationBuilder::default().id("app-a").hostname("a01").build())
        .unwrap();
    let b = store
        .create_application(ApplicationBuilder::default().id("app-b").hostname("b01").build())
        .unwrap();

    assert_eq!(store.allocate_ports(a.id, PUBLIC, INTERNAL).unwrap(), (30000, 40000));
    assert_eq!(store.allocate_ports(b.id, PUBLIC, INTERNAL).unwrap(), (30001, 40001));

    store.release_ports(a.id).unwrap();
    let c = store
        .create_application(ApplicationBuilder::default().id("app-c").hostname("c01").build())
        .unwrap();
    // the freed pair is reused, smallest first
    assert_eq!(store.allocate_ports(c.id, PUBLIC, INTERNAL).unwrap(), (30000, 40000));
}

#[test]
fn ports_exhaustion_is_reported() {
    let store = store();
    let a = store
        .create_application(ApplicationBuilder::default().id("app-a").hostname("a01").build())
        .unwrap();
    let b = store
        .create_application(ApplicationBuilder::default().id("app-b").hostname("b01").build())
        .unwrap();
    store.allocate_ports(a.id, (30000, 30000), (40000, 40000)).unwrap();
    let err = store.allocate_ports(b.id, (30000, 30000), (40000, 40000)).unwrap_err();
    assert_eq!(err.kind(), ph_core::ErrorKind::PortsExhausted);
}

#[test]
fn vmid_uniqueness_is_enforced() {
    let store = store();
    let a = store
        .create_application(ApplicationBuilder::default().id("app-a").hostname("a01").build())
        .unwrap();
    let b = store
        .create_application(ApplicationBuilder::default().id("app-b").hostname("b01").build())
        .unwrap();
    store.set_vmid(a.id, 101).unwrap();
    let err = store.set_vmid(b.id, 101).unwrap_err();
    assert_eq!(err.kind(), ph_core::ErrorKind::Conflict);
    // re-claiming your own vmid is fine
    store.set_vmid(a.id, 101).unwrap();
}

#[test]
fn delete_cascades_logs_and_backups() {
    let (store, id) = seeded();
    store.log_deploy(id, ph_core::LogLevel::Info, "lxc_create", "created");
    store.insert_backup(ph_core::Backup {
        id: ph_core::BackupId::new(),
        application_id: id,
        filename: None,
        storage_name: "local".into(),
        size_bytes: None,
        kind: ph_core::BackupKind::Manual,
        status: ph_core::BackupStatus::Creating,
        error_message: None,
        created_at_ms: 0,
        completed_at_ms: None,
    });

    store.delete_application(id).unwrap();
    assert!(store.get_app(id).is_err());
    assert!(store.deploy_logs(id).is_empty());
    assert!(store.backups_of(id).is_empty());
}

#[test]
fn stale_transitional_finds_only_old_transitional_rows() {
    let clock = FakeClock::new();
    clock.set_epoch_ms(0);
    let store = AppStore::new(clock.clone());

    let stuck = store
        .create_application(ApplicationBuilder::default().id("app-stuck").hostname("s01").build())
        .unwrap();
    clock.set_epoch_ms(10_000_000);
    let fresh = store
        .create_application(ApplicationBuilder::default().id("app-new").hostname("n01").build())
        .unwrap();
    let stable = store
        .create_application(ApplicationBuilder::default().id("app-ok").hostname("o01").build())
        .unwrap();
    store.transition(stable.id, AppStatus::Deploying, AppStatus::Running).unwrap();

    let stale = store.stale_transitional(5_000_000);
    let ids: Vec<_> = stale.iter().map(|a| a.id).collect();
    assert!(ids.contains(&stuck.id));
    assert!(!ids.contains(&fresh.id));
    assert!(!ids.contains(&stable.id));
}

#[test]
fn host_delete_refused_while_referenced() {
    let store = store();
    let host = host_fixture("hst-1");
    store.upsert_host(host.clone()).unwrap();
    store
        .create_application(ApplicationBuilder::default().host_id("hst-1").build())
        .unwrap();
    assert!(store.delete_host(host.id).is_err());
}

#[test]
fn single_default_host_invariant() {
    let store = store();
    let mut h1 = host_fixture("hst-1");
    h1.default = true;
    store.upsert_host(h1).unwrap();
    let mut h2 = host_fixture("hst-2");
    h2.default = true;
    store.upsert_host(h2).unwrap();

    let defaults: Vec<_> = store.list_hosts().into_iter().filter(|h| h.default).collect();
    assert_eq!(defaults.len(), 1);
    assert_eq!(defaults[0].id.as_str(), "hst-2");
}

#[tokio::test]
async fn row_lock_serializes_writers() {
    let store = std::sync::Arc::new(store());
    let app = store
        .create_application(ApplicationBuilder::default().build())
        .unwrap();

    let guard = store.lock_row(app.id).await;
    let contender = {
        let store = store.clone();
        let id = app.id;
        tokio::spawn(async move {
            let _guard = store.lock_row(id).await;
        })
    };
    // the contender cannot finish while the guard is held
    tokio::task::yield_now().await;
    assert!(!contender.is_finished());
    drop(guard);
    contender.await.unwrap();
}
