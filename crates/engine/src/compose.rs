// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Compose document materialization.
//!
//! Takes the catalog's compose document, merges the default and
//! user-supplied environments into every service, and rewrites named
//! volume mounts to host paths under the per-hostname directory so
//! workload data survives container recreation.

use serde_yaml::Value;
use std::collections::BTreeMap;
use std::path::Path;

use ph_core::{CatalogApp, Error, Result};

/// The rendered document plus the host paths it mounts.
#[derive(Debug, Clone)]
pub struct ComposeDoc {
    pub yaml: String,
    pub host_volumes: Vec<String>,
}

/// Remote path the document is written to inside the LXC.
pub const COMPOSE_PATH: &str = "/root/docker-compose.yml";

pub fn materialize(
    app: &CatalogApp,
    hostname: &str,
    user_env: &BTreeMap<String, String>,
    volumes_root: &Path,
) -> Result<ComposeDoc> {
    let mut doc: Value = serde_yaml::from_str(&app.compose)
        .map_err(|e| Error::DatabaseError(format!("catalog compose for {}: {e}", app.id)))?;

    let mut env = app.default_environment.clone();
    env.extend(user_env.iter().map(|(k, v)| (k.clone(), v.clone())));

    let mut host_volumes = Vec::new();
    let app_root = volumes_root.join(hostname);

    if let Some(services) = doc.get_mut("services").and_then(Value::as_mapping_mut) {
        for (_, service) in services.iter_mut() {
            merge_environment(service, &env);
            rewrite_volumes(service, &app_root, &mut host_volumes);
        }
    }

    let yaml = serde_yaml::to_string(&doc)
        .map_err(|e| Error::DatabaseError(format!("rendering compose: {e}")))?;
    Ok(ComposeDoc { yaml, host_volumes })
}

/// Heredoc command that writes the document into the container.
pub fn write_command(doc: &ComposeDoc) -> String {
    format!("cd /root && cat > docker-compose.yml << 'COMPOSE_EOF'\n{}\nCOMPOSE_EOF", doc.yaml)
}

fn merge_environment(service: &mut Value, env: &BTreeMap<String, String>) {
    if env.is_empty() {
        return;
    }
    let Some(map) = service.as_mapping_mut() else { return };
    let key = Value::String("environment".into());

    // normalize list-form environment (`- K=V`) into a mapping first
    let mut merged: BTreeMap<String, String> = match map.get(&key) {
        Some(Value::Mapping(existing)) => existing
            .iter()
            .filter_map(|(k, v)| {
                Some((k.as_str()?.to_string(), yaml_scalar_to_string(v)))
            })
            .collect(),
        Some(Value::Sequence(entries)) => entries
            .iter()
            .filter_map(Value::as_str)
            .filter_map(|kv| kv.split_once('='))
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        _ => BTreeMap::new(),
    };
    for (k, v) in env {
        merged.insert(k.clone(), v.clone());
    }

    let mapping: serde_yaml::Mapping = merged
        .into_iter()
        .map(|(k, v)| (Value::String(k), Value::String(v)))
        .collect();
    map.insert(key, Value::Mapping(mapping));
}

fn yaml_scalar_to_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => serde_yaml::to_string(other).unwrap_or_default().trim().to_string(),
    }
}

/// `name:/container/path` entries with a bare name become
/// `<volumes_root>/<hostname>/<name>:/container/path`.
fn rewrite_volumes(service: &mut Value, app_root: &Path, host_volumes: &mut Vec<String>) {
    let Some(volumes) = service
        .as_mapping_mut()
        .and_then(|m| m.get_mut("volumes"))
        .and_then(Value::as_sequence_mut)
    else {
        return;
    };

    for entry in volumes.iter_mut() {
        let Some(spec) = entry.as_str() else { continue };
        let Some((source, rest)) = spec.split_once(':') else { continue };
        if source.starts_with('/') || source.starts_with('.') {
            continue;
        }
        let host_path = app_root.join(source);
        let host_path_str = host_path.display().to_string();
        *entry = Value::String(format!("{host_path_str}:{rest}"));
        host_volumes.push(host_path_str);
    }
}

#[cfg(test)]
#[path = "compose_tests.rs"]
mod tests;
