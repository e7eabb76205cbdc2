// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use ph_core::catalog::ExposedPort;
use std::path::PathBuf;

fn catalog_app(compose: &str) -> CatalogApp {
    CatalogApp {
        id: "demo".into(),
        name: "Demo".into(),
        family: "alpine".into(),
        version: None,
        compose: compose.into(),
        default_environment: BTreeMap::from([("TZ".to_string(), "UTC".to_string())]),
        ports: vec![ExposedPort { port: 8080, primary: true }],
        volumes: vec![],
        min_cpu: 1,
        min_memory_mb: 256,
        disk_gb: 8,
        runtime_preinstalled: false,
    }
}

const COMPOSE: &str = r#"
services:
  web:
    image: demo:latest
    environment:
      - EXISTING=1
    volumes:
      - data:/var/lib/demo
      - /etc/localtime:/etc/localtime:ro
"#;

#[test]
fn merges_defaults_and_user_environment() {
    let user = BTreeMap::from([("APP_KEY".to_string(), "abc".to_string())]);
    let doc =
        materialize(&catalog_app(COMPOSE), "app01", &user, &PathBuf::from("/var/lib/proxharbor/volumes"))
            .unwrap();
    assert!(doc.yaml.contains("TZ: UTC"));
    assert!(doc.yaml.contains("APP_KEY: abc"));
    // list-form env entries survive the normalization
    assert!(doc.yaml.contains("EXISTING: '1'") || doc.yaml.contains("EXISTING: \"1\"") || doc.yaml.contains("EXISTING: 1"));
}

#[test]
fn user_environment_wins_over_defaults() {
    let user = BTreeMap::from([("TZ".to_string(), "Europe/Rome".to_string())]);
    let doc = materialize(&catalog_app(COMPOSE), "app01", &user, &PathBuf::from("/vols")).unwrap();
    assert!(doc.yaml.contains("TZ: Europe/Rome"));
    assert!(!doc.yaml.contains("TZ: UTC"));
}

#[test]
fn named_volumes_move_under_hostname_dir() {
    let doc = materialize(
        &catalog_app(COMPOSE),
        "app01",
        &BTreeMap::new(),
        &PathBuf::from("/var/lib/proxharbor/volumes"),
    )
    .unwrap();
    assert!(doc.yaml.contains("/var/lib/proxharbor/volumes/app01/data:/var/lib/demo"));
    assert_eq!(doc.host_volumes, vec!["/var/lib/proxharbor/volumes/app01/data".to_string()]);
    // absolute mounts are untouched
    assert!(doc.yaml.contains("/etc/localtime:/etc/localtime:ro"));
}

#[test]
fn write_command_uses_quoted_heredoc() {
    let doc = materialize(&catalog_app(COMPOSE), "app01", &BTreeMap::new(), &PathBuf::from("/v"))
        .unwrap();
    let cmd = write_command(&doc);
    assert!(cmd.starts_with("cd /root && cat > docker-compose.yml << 'COMPOSE_EOF'"));
    assert!(cmd.trim_end().ends_with("COMPOSE_EOF"));
}

#[test]
fn invalid_compose_is_rejected() {
    let err = materialize(
        &catalog_app("services: ["),
        "app01",
        &BTreeMap::new(),
        &PathBuf::from("/v"),
    )
    .unwrap_err();
    assert_eq!(err.kind(), ph_core::ErrorKind::DatabaseError);
}
