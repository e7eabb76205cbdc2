// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! VMID acquisition.
//!
//! `NextVMID` is only a suggestion — the cluster does not reserve it —
//! so acquisition is a bounded reclaim-or-retry loop against the
//! store's uniqueness check. A conflicting row in `error` is a corpse
//! from a failed job; its VMID is reclaimed by clearing the field.

use ph_core::{AppId, AppStatus, Clock, Error, Result};
use ph_pve::PveGateway;

use crate::ctx::EngineDeps;

const MAX_ATTEMPTS: u32 = 10;

/// Acquire a cluster-unique VMID for the application. Idempotent: an
/// already-assigned VMID is kept.
pub async fn acquire_vmid<C: Clock>(
    deps: &EngineDeps<C>,
    gateway: &dyn PveGateway,
    id: AppId,
) -> Result<u32> {
    if let Some(vmid) = deps.store.get_app(id)?.vmid {
        return Ok(vmid);
    }

    for attempt in 1..=MAX_ATTEMPTS {
        let candidate = gateway.next_vmid().await?;

        match deps.store.vmid_owner(candidate) {
            None => {
                deps.store.set_vmid(id, candidate)?;
                tracing::info!(app_id = %id, vmid = candidate, "acquired VMID");
                return Ok(candidate);
            }
            Some(owner) if owner.status == AppStatus::Error => {
                tracing::warn!(
                    app_id = %id,
                    vmid = candidate,
                    corpse = %owner.id,
                    "reclaiming VMID from errored application"
                );
                deps.store.clear_vmid(owner.id)?;
                deps.store.set_vmid(id, candidate)?;
                return Ok(candidate);
            }
            Some(owner) => {
                tracing::debug!(
                    app_id = %id,
                    vmid = candidate,
                    owner = %owner.id,
                    attempt,
                    "VMID candidate taken, retrying"
                );
            }
        }
    }

    Err(Error::VmidAcquisitionFailed { attempts: MAX_ATTEMPTS })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::TestRig;

    #[tokio::test]
    async fn takes_the_cluster_suggestion() {
        let rig = TestRig::new();
        let app = rig.seed_app("app01");
        rig.pve.set_next_vmid(150);
        let vmid = acquire_vmid(&rig.deps, &*rig.pve, app.id).await.unwrap();
        assert_eq!(vmid, 150);
        assert_eq!(rig.deps.store.get_app(app.id).unwrap().vmid, Some(150));
    }

    #[tokio::test]
    async fn keeps_an_existing_assignment() {
        let rig = TestRig::new();
        let app = rig.seed_app("app01");
        rig.deps.store.set_vmid(app.id, 120).unwrap();
        let vmid = acquire_vmid(&rig.deps, &*rig.pve, app.id).await.unwrap();
        assert_eq!(vmid, 120);
        assert!(rig.pve.calls_matching("next_vmid").is_empty());
    }

    #[tokio::test]
    async fn reclaims_from_errored_corpse() {
        let rig = TestRig::new();
        let corpse = rig.seed_app("dead01");
        rig.deps.store.set_vmid(corpse.id, 101).unwrap();
        rig.fail_app(corpse.id);

        rig.pve.set_next_vmid(101);
        let app = rig.seed_app("app01");
        let vmid = acquire_vmid(&rig.deps, &*rig.pve, app.id).await.unwrap();
        assert_eq!(vmid, 101);
        assert_eq!(rig.deps.store.get_app(corpse.id).unwrap().vmid, None);
    }

    #[tokio::test]
    async fn gives_up_when_candidates_stay_taken() {
        let rig = TestRig::new();
        let holder = rig.seed_app("busy01");
        rig.deps.store.set_vmid(holder.id, 101).unwrap();
        // holder stays in deploying, so 101 is never reclaimable
        rig.pve.set_next_vmid(101);

        let app = rig.seed_app("app01");
        let err = acquire_vmid(&rig.deps, &*rig.pve, app.id).await.unwrap_err();
        assert_eq!(err.kind(), ph_core::ErrorKind::VmidAcquisitionFailed);
    }
}
