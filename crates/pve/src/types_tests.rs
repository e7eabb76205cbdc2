// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn lxc_vmid_accepts_number_and_string() {
    let from_num: LxcInfo =
        serde_json::from_str(r#"{"vmid": 101, "status": "running"}"#).unwrap();
    let from_str: LxcInfo =
        serde_json::from_str(r#"{"vmid": "101", "status": "stopped"}"#).unwrap();
    assert_eq!(from_num.vmid, 101);
    assert_eq!(from_str.vmid, 101);
    assert!(from_num.is_running());
    assert!(!from_str.is_running());
}

#[test]
fn storage_content_membership() {
    let storage: StorageInfo = serde_json::from_str(
        r#"{"storage": "local-lvm", "type": "lvmthin", "content": "rootdir,images",
            "active": 1, "enabled": 1, "avail": 1000}"#,
    )
    .unwrap();
    assert!(storage.is_usable());
    assert!(storage.supports("rootdir"));
    assert!(!storage.supports("vztmpl"));
    assert_eq!(storage.avail_bytes(), 1000);
}

#[test]
fn inactive_storage_is_not_usable() {
    let storage: StorageInfo =
        serde_json::from_str(r#"{"storage": "nas", "active": 0}"#).unwrap();
    assert!(!storage.is_usable());
}

#[test]
fn task_status_ok_requires_stopped_and_ok() {
    let running: TaskStatus = serde_json::from_str(r#"{"status": "running"}"#).unwrap();
    assert!(!running.is_ok());
    let failed: TaskStatus =
        serde_json::from_str(r#"{"status": "stopped", "exitstatus": "command failed"}"#).unwrap();
    assert!(failed.is_stopped());
    assert!(!failed.is_ok());
    let ok: TaskStatus =
        serde_json::from_str(r#"{"status": "stopped", "exitstatus": "OK"}"#).unwrap();
    assert!(ok.is_ok());
}

#[test]
fn backup_volume_filename_strips_prefix() {
    let vol: BackupVolume = serde_json::from_str(
        r#"{"volid": "local:backup/vzdump-lxc-101-2026_01_01-00_00_00.tar.zst"}"#,
    )
    .unwrap();
    assert_eq!(vol.filename(), "vzdump-lxc-101-2026_01_01-00_00_00.tar.zst");
}

#[test]
fn node_online_detection() {
    let node: NodeInfo =
        serde_json::from_str(r#"{"node": "pve1", "status": "online"}"#).unwrap();
    assert!(node.is_online());
    let node: NodeInfo = serde_json::from_str(r#"{"node": "pve2"}"#).unwrap();
    assert!(!node.is_online());
}
