// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn missing_file_yields_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = DaemonConfig::load(&dir.path().join("phd.toml")).unwrap();
    assert_eq!(config.state_dir, PathBuf::from("/var/lib/proxharbor/state"));
    assert!(config.hosts.is_empty());
}

#[test]
fn full_file_parses() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("phd.toml");
    std::fs::write(
        &path,
        r#"
state_dir = "/tmp/ph-state"
catalog_dir = "/tmp/ph-catalog"
snapshot_interval_secs = 30

[engine]
public_port_range = [31000, 31099]
internal_port_range = [41000, 41099]
reconcile_interval_secs = 120
worker_slots = 2

[[hosts]]
display_name = "lab"
api_address = "10.0.0.10"
api_user = "root@pam"
api_secret = "hunter2"
ssh_password = "hunter2"
default = true
"#,
    )
    .unwrap();

    let config = DaemonConfig::load(&path).unwrap();
    assert_eq!(config.state_dir, PathBuf::from("/tmp/ph-state"));
    assert_eq!(config.snapshot_interval_secs, 30);
    assert_eq!(config.hosts.len(), 1);
    let host = &config.hosts[0];
    assert_eq!(host.api_port, 8006);
    assert_eq!(host.ssh_user, "root");
    assert!(host.default);

    let engine = config.engine_config();
    assert_eq!(engine.public_ports, (31000, 31099));
    assert_eq!(engine.internal_ports, (41000, 41099));
    assert_eq!(engine.reconcile_interval, Duration::from_secs(120));
    assert_eq!(engine.worker_slots, 2);
    // untouched knobs keep their defaults
    assert_eq!(engine.stuck_threshold, Duration::from_secs(3600));
}

#[test]
fn malformed_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("phd.toml");
    std::fs::write(&path, "state_dir = [").unwrap();
    assert!(DaemonConfig::load(&path).is_err());
}
