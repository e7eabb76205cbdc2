// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn quote_single_escapes_embedded_quotes() {
    assert_eq!(quote_single("echo 'hi'"), r"echo '\''hi'\''");
    assert_eq!(quote_single("plain"), "plain");
}

#[test]
fn quoted_command_survives_pct_wrapping() {
    let cmd = "cat > /root/docker-compose.yml << 'EOF'\nservices: {}\nEOF";
    let wrapped = format!("pct exec 101 -- sh -c '{}'", quote_single(cmd));
    assert!(wrapped.contains(r"'\''EOF'\''"));
}

#[test]
fn redact_masks_credential_assignments() {
    let cmd = "docker login -u admin PASSWORD=hunter2 API_TOKEN=abc plain=keep";
    let redacted = redact(cmd);
    assert!(redacted.contains("PASSWORD=***"));
    assert!(redacted.contains("API_TOKEN=***"));
    assert!(redacted.contains("plain=keep"));
    assert!(!redacted.contains("hunter2"));
}

#[test]
fn redact_leaves_ordinary_commands_alone() {
    let cmd = "apk add --no-cache docker docker-cli-compose";
    assert_eq!(redact(cmd), cmd);
}

#[test]
fn combined_output_orders_stdout_first() {
    let out = ExecOutput { stdout: "a".into(), stderr: "b".into(), exit: 0 };
    assert_eq!(out.combined(), "ab");
}
