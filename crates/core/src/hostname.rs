// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Hostname validation for deploy and clone intents.

use crate::error::{Error, Result};

/// Validate a user-supplied hostname: 3–63 characters, DNS-safe
/// (lowercase alphanumerics and interior hyphens).
pub fn validate_hostname(hostname: &str) -> Result<()> {
    let bad = |why: &str| {
        Err(Error::DatabaseError(format!("invalid hostname {hostname:?}: {why}")))
    };
    if hostname.len() < 3 || hostname.len() > 63 {
        return bad("must be 3-63 characters");
    }
    if hostname.starts_with('-') || hostname.ends_with('-') {
        return bad("must not start or end with a hyphen");
    }
    if !hostname.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-') {
        return bad("only lowercase letters, digits and hyphens allowed");
    }
    Ok(())
}
