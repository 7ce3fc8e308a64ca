//! Federation.
//!
//! An agreement's device set is its direct device links plus, transitively,
//! the devices of the agreements it links to.

use crate::agreement::{Agreement, AgreementStore, LinkTarget};
use crate::core::{AgreementId, DeviceId, Result};
use std::collections::{BTreeSet, HashSet};
use tracing::debug;

/// Devices an agreement is enforced on.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResolvedDevices {
    /// Devices, sorted and deduplicated
    pub devices: Vec<DeviceId>,
    /// Agreements that contributed devices, in discovery order
    pub linked_agreements: Vec<AgreementId>,
}

/// Resolve the device set of a valid agreement.
///
/// `valid` holds the agreements valid this tick. Returns `None` when any
/// agreement reachable through links is not valid, in which case the whole
/// agreement is not enforced this tick.
pub async fn resolve_devices(
    store: &dyn AgreementStore,
    agreement: &Agreement,
    valid: &HashSet<AgreementId>,
) -> Result<Option<ResolvedDevices>> {
    let mut devices = BTreeSet::new();
    let mut linked_agreements = Vec::new();
    let mut visited = HashSet::new();
    visited.insert(agreement.id.clone());

    let mut pending = agreement.links.clone();
    while let Some(link) = pending.pop() {
        match link {
            LinkTarget::Device(device) => {
                devices.insert(device);
            }
            LinkTarget::Agreement(id) => {
                if !visited.insert(id.clone()) {
                    continue;
                }
                if !valid.contains(&id) {
                    debug!(
                        "Agreement {} links to {} which is not valid",
                        agreement.id, id
                    );
                    return Ok(None);
                }
                pending.extend(store.get_agreement_links(&id).await?);
                linked_agreements.push(id);
            }
        }
    }

    Ok(Some(ResolvedDevices {
        devices: devices.into_iter().collect(),
        linked_agreements,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agreement::{AgreementState, InMemoryAgreementStore};
    use crate::core::now;
    use chrono::Duration;

    fn agreement(id: &str) -> Agreement {
        let t = now();
        Agreement::new(id, "provider", "customer", t - Duration::hours(1), t + Duration::hours(1))
            .with_state(AgreementState::Accepted)
    }

    fn valid(ids: &[&str]) -> HashSet<AgreementId> {
        ids.iter().map(|id| AgreementId::new(id)).collect()
    }

    #[tokio::test]
    async fn test_direct_devices() {
        let a = agreement("A").with_device("vm-2").with_device("vm-1").with_device("vm-2");
        let store = InMemoryAgreementStore::with_agreements(vec![a.clone()]);

        let resolved = resolve_devices(&store, &a, &valid(&["A"])).await.unwrap().unwrap();
        assert_eq!(resolved.devices, vec![DeviceId::new("vm-1"), DeviceId::new("vm-2")]);
        assert!(resolved.linked_agreements.is_empty());
    }

    #[tokio::test]
    async fn test_transitive_devices() {
        let a = agreement("A").with_device("vm-1").with_linked_agreement("B");
        let b = agreement("B").with_linked_agreement("C");
        let c = agreement("C").with_device("vm-3");
        let store = InMemoryAgreementStore::with_agreements(vec![a.clone(), b, c]);

        let resolved = resolve_devices(&store, &a, &valid(&["A", "B", "C"]))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resolved.devices, vec![DeviceId::new("vm-1"), DeviceId::new("vm-3")]);
        assert_eq!(
            resolved.linked_agreements,
            vec![AgreementId::new("B"), AgreementId::new("C")]
        );
    }

    #[tokio::test]
    async fn test_invalid_link_skips_agreement() {
        let a = agreement("A").with_device("vm-1").with_linked_agreement("B");
        let b = agreement("B")
            .with_state(AgreementState::Pending)
            .with_device("vm-9");
        let store = InMemoryAgreementStore::with_agreements(vec![a.clone(), b]);

        let resolved = resolve_devices(&store, &a, &valid(&["A"])).await.unwrap();
        assert!(resolved.is_none());
    }

    #[tokio::test]
    async fn test_cycle_terminates() {
        let a = agreement("A").with_device("vm-1").with_linked_agreement("B");
        let b = agreement("B").with_device("vm-2").with_linked_agreement("A");
        let store = InMemoryAgreementStore::with_agreements(vec![a.clone(), b]);

        let resolved = resolve_devices(&store, &a, &valid(&["A", "B"]))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resolved.devices.len(), 2);
        assert_eq!(resolved.linked_agreements, vec![AgreementId::new("B")]);
    }
}
