// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Key/value settings with optional encryption for sensitive entries.

use serde::{Deserialize, Serialize};

use crate::secret::Secret;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Setting {
    pub key: String,
    pub value: SettingValue,
    pub updated_at_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettingValue {
    Plain(String),
    Sensitive(Secret),
}

impl Setting {
    pub fn is_sensitive(&self) -> bool {
        matches!(self.value, SettingValue::Sensitive(_))
    }
}
