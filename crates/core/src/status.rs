// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Application status and the transition table.
//!
//! Every status write in the system goes through the store's
//! `transition`, which consults [`AppStatus::can_transition`]. Nothing
//! else is allowed to decide legality, so the table below is the whole
//! state machine:
//!
//! ```text
//!  (∅) → deploying → running
//!  (∅) → cloning   → running
//!  (∅) → adopting  → running | stopped
//!  running ↔ stopped                      (start/stop)
//!  running → updating → running           (happy update)
//!  running → updating → update_failed     (failed update)
//!  update_failed → running                (successful restore)
//!  any stable → removing → (row deleted)
//!  transitional → error                   (janitor or job failure)
//!  error → removing → (row deleted)
//! ```

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppStatus {
    Deploying,
    Cloning,
    Adopting,
    Running,
    Stopped,
    Updating,
    UpdateFailed,
    Removing,
    Error,
}

crate::simple_display! {
    AppStatus {
        Deploying => "deploying",
        Cloning => "cloning",
        Adopting => "adopting",
        Running => "running",
        Stopped => "stopped",
        Updating => "updating",
        UpdateFailed => "update_failed",
        Removing => "removing",
        Error => "error",
    }
}

impl AppStatus {
    /// States a record may be created in.
    pub fn is_initial(self) -> bool {
        matches!(self, AppStatus::Deploying | AppStatus::Cloning | AppStatus::Adopting)
    }

    /// States with a job (or the janitor) still driving them somewhere.
    pub fn is_transitional(self) -> bool {
        matches!(
            self,
            AppStatus::Deploying
                | AppStatus::Cloning
                | AppStatus::Adopting
                | AppStatus::Updating
                | AppStatus::Removing
        )
    }

    pub fn is_stable(self) -> bool {
        !self.is_transitional()
    }

    /// Whether `self → to` is a legal status write.
    pub fn can_transition(self, to: AppStatus) -> bool {
        use AppStatus::*;
        match (self, to) {
            (Deploying, Running) => true,
            (Cloning, Running) => true,
            (Adopting, Running) | (Adopting, Stopped) => true,
            (Running, Stopped) | (Stopped, Running) => true,
            (Running, Updating) => true,
            (Updating, Running) | (Updating, UpdateFailed) => true,
            (UpdateFailed, Running) => true,
            // delete is reachable from every stable state
            (from, Removing) if from.is_stable() => true,
            // jobs and the janitor may fail any in-flight transition
            (from, Error) if from.is_transitional() => true,
            _ => false,
        }
    }
}

#[cfg(test)]
#[path = "status_tests.rs"]
mod tests;
