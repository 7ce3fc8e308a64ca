//! Policy persistence.

use crate::core::{AgreementId, Result};
use crate::policy::record::Policy;
use async_trait::async_trait;
use dashmap::DashMap;

/// Durable storage of policy records, one per tracked agreement.
#[async_trait]
pub trait PolicyStore: Send + Sync {
    /// Get the policy of an agreement.
    async fn get(&self, agreement_id: &AgreementId) -> Result<Option<Policy>>;

    /// Insert or replace a policy.
    async fn put(&self, policy: Policy) -> Result<()>;

    /// Delete a policy. Returns whether one existed.
    async fn delete(&self, agreement_id: &AgreementId) -> Result<bool>;

    /// All stored policies.
    async fn list(&self) -> Result<Vec<Policy>>;
}

/// Policy store held in memory.
///
/// Backed by a concurrent map so readers never observe a partially
/// written record.
#[derive(Default)]
pub struct InMemoryPolicyStore {
    policies: DashMap<AgreementId, Policy>,
}

impl InMemoryPolicyStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            policies: DashMap::new(),
        }
    }

    /// Number of stored policies.
    pub fn len(&self) -> usize {
        self.policies.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}

#[async_trait]
impl PolicyStore for InMemoryPolicyStore {
    async fn get(&self, agreement_id: &AgreementId) -> Result<Option<Policy>> {
        Ok(self.policies.get(agreement_id).map(|p| p.value().clone()))
    }

    async fn put(&self, policy: Policy) -> Result<()> {
        self.policies.insert(policy.agreement_id.clone(), policy);
        Ok(())
    }

    async fn delete(&self, agreement_id: &AgreementId) -> Result<bool> {
        Ok(self.policies.remove(agreement_id).is_some())
    }

    async fn list(&self) -> Result<Vec<Policy>> {
        let mut policies: Vec<Policy> = self.policies.iter().map(|p| p.value().clone()).collect();
        policies.sort_by(|a, b| a.agreement_id.cmp(&b.agreement_id));
        Ok(policies)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::DeviceId;
    use std::collections::BTreeMap;

    fn policy(id: &str) -> Policy {
        Policy {
            agreement_id: AgreementId::new(id),
            terms: BTreeMap::new(),
            devices: vec![DeviceId::new("vm-1")],
            linked_agreements: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_put_get_delete() {
        let store = InMemoryPolicyStore::new();
        store.put(policy("a-1")).await.unwrap();
        store.put(policy("a-2")).await.unwrap();
        assert_eq!(store.len(), 2);

        let fetched = store.get(&AgreementId::new("a-1")).await.unwrap();
        assert_eq!(fetched, Some(policy("a-1")));

        assert!(store.delete(&AgreementId::new("a-1")).await.unwrap());
        assert!(!store.delete(&AgreementId::new("a-1")).await.unwrap());
        assert!(store.get(&AgreementId::new("a-1")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_sorted() {
        let store = InMemoryPolicyStore::new();
        store.put(policy("b")).await.unwrap();
        store.put(policy("a")).await.unwrap();

        let ids: Vec<String> = store
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.agreement_id.to_string())
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
    }
}
