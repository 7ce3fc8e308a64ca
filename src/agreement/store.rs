//! Agreement store.
//!
//! The engine's view of the external agreement registry.

use crate::agreement::model::{Agreement, LinkTarget, TermState};
use crate::core::{AgreementId, Error, Result, Timestamp};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use tokio::sync::RwLock;

/// Access to the agreements the engine verifies.
///
/// Implemented by the persistence layer that owns agreements. The engine
/// never creates or deletes agreements; it only mutates term state and
/// violation links.
#[async_trait]
pub trait AgreementStore: Send + Sync {
    /// Agreements that are accepted and within their validity window at `now`.
    async fn get_valid_agreements(&self, now: Timestamp) -> Result<Vec<Agreement>>;

    /// Get an agreement by ID.
    async fn get_agreement(&self, id: &AgreementId) -> Result<Agreement>;

    /// Set the state of one term.
    async fn set_term_state(&self, id: &AgreementId, term: &str, state: TermState) -> Result<()>;

    /// Links of an agreement (devices and federated agreements).
    async fn get_agreement_links(&self, id: &AgreementId) -> Result<Vec<LinkTarget>>;

    /// Link a violation to an agreement.
    async fn link_violation(&self, id: &AgreementId, violation_id: &str) -> Result<()>;

    /// Remove a violation link. Unknown links are ignored.
    async fn unlink_violation(&self, id: &AgreementId, violation_id: &str) -> Result<()>;
}

/// Agreement store held in memory.
pub struct InMemoryAgreementStore {
    agreements: RwLock<HashMap<AgreementId, Agreement>>,
}

impl InMemoryAgreementStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            agreements: RwLock::new(HashMap::new()),
        }
    }

    /// Create a store seeded with agreements.
    pub fn with_agreements(agreements: Vec<Agreement>) -> Self {
        let map = agreements.into_iter().map(|a| (a.id.clone(), a)).collect();
        Self {
            agreements: RwLock::new(map),
        }
    }

    /// Load agreements from a JSON file holding an array of agreements.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let agreements: Vec<Agreement> = serde_json::from_str(&raw)?;
        Ok(Self::with_agreements(agreements))
    }

    /// Insert or replace an agreement.
    pub async fn insert(&self, agreement: Agreement) {
        self.agreements
            .write()
            .await
            .insert(agreement.id.clone(), agreement);
    }

    /// Remove an agreement.
    pub async fn remove(&self, id: &AgreementId) -> Option<Agreement> {
        self.agreements.write().await.remove(id)
    }

    /// Apply a change to a stored agreement.
    pub async fn update<F>(&self, id: &AgreementId, change: F) -> Result<()>
    where
        F: FnOnce(&mut Agreement),
    {
        let mut agreements = self.agreements.write().await;
        let agreement = agreements
            .get_mut(id)
            .ok_or_else(|| Error::AgreementNotFound(id.to_string()))?;
        change(agreement);
        Ok(())
    }

    /// Number of stored agreements.
    pub async fn len(&self) -> usize {
        self.agreements.read().await.len()
    }

    /// Whether the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.agreements.read().await.is_empty()
    }
}

impl Default for InMemoryAgreementStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AgreementStore for InMemoryAgreementStore {
    async fn get_valid_agreements(&self, now: Timestamp) -> Result<Vec<Agreement>> {
        let agreements = self.agreements.read().await;
        let mut valid: Vec<Agreement> = agreements
            .values()
            .filter(|a| a.is_valid_at(now))
            .cloned()
            .collect();
        valid.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(valid)
    }

    async fn get_agreement(&self, id: &AgreementId) -> Result<Agreement> {
        self.agreements
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| Error::AgreementNotFound(id.to_string()))
    }

    async fn set_term_state(&self, id: &AgreementId, term: &str, state: TermState) -> Result<()> {
        let mut agreements = self.agreements.write().await;
        let agreement = agreements
            .get_mut(id)
            .ok_or_else(|| Error::AgreementNotFound(id.to_string()))?;
        let entry = agreement
            .terms
            .get_mut(term)
            .ok_or_else(|| Error::TermNotFound {
                agreement_id: id.to_string(),
                term: term.to_string(),
            })?;
        entry.state = state;
        Ok(())
    }

    async fn get_agreement_links(&self, id: &AgreementId) -> Result<Vec<LinkTarget>> {
        Ok(self.get_agreement(id).await?.links)
    }

    async fn link_violation(&self, id: &AgreementId, violation_id: &str) -> Result<()> {
        self.update(id, |agreement| {
            if !agreement.violations.iter().any(|v| v == violation_id) {
                agreement.violations.push(violation_id.to_string());
            }
        })
        .await
    }

    async fn unlink_violation(&self, id: &AgreementId, violation_id: &str) -> Result<()> {
        self.update(id, |agreement| {
            agreement.violations.retain(|v| v != violation_id);
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agreement::model::{AgreementState, Term};
    use crate::core::now;
    use chrono::Duration;
    use serde_json::json;

    fn agreement(id: &str, state: AgreementState) -> Agreement {
        let t = now();
        Agreement::new(id, "provider", "customer", t - Duration::hours(1), t + Duration::hours(1))
            .with_state(state)
            .with_term(Term::slo("availability", json!("credit")))
            .with_device("vm-1")
    }

    #[tokio::test]
    async fn test_pending_agreement_never_valid() {
        let store = InMemoryAgreementStore::with_agreements(vec![
            agreement("a-1", AgreementState::Accepted),
            agreement("a-2", AgreementState::Pending),
            agreement("a-3", AgreementState::Rejected),
        ]);

        let valid = store.get_valid_agreements(now()).await.unwrap();
        assert_eq!(valid.len(), 1);
        assert_eq!(valid[0].id.as_str(), "a-1");
    }

    #[tokio::test]
    async fn test_expired_agreement_not_valid() {
        let store = InMemoryAgreementStore::new();
        store.insert(agreement("a-1", AgreementState::Accepted)).await;

        let later = now() + Duration::hours(2);
        assert!(store.get_valid_agreements(later).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_set_term_state() {
        let store = InMemoryAgreementStore::new();
        store.insert(agreement("a-1", AgreementState::Accepted)).await;
        let id = AgreementId::new("a-1");

        store
            .set_term_state(&id, "availability", TermState::Violated)
            .await
            .unwrap();

        let stored = store.get_agreement(&id).await.unwrap();
        assert_eq!(stored.terms["availability"].state, TermState::Violated);

        let missing = store.set_term_state(&id, "latency", TermState::Fulfilled).await;
        assert!(matches!(missing, Err(Error::TermNotFound { .. })));
    }

    #[tokio::test]
    async fn test_violation_links() {
        let store = InMemoryAgreementStore::new();
        store.insert(agreement("a-1", AgreementState::Accepted)).await;
        let id = AgreementId::new("a-1");

        store.link_violation(&id, "v-1").await.unwrap();
        store.link_violation(&id, "v-1").await.unwrap();
        assert_eq!(store.get_agreement(&id).await.unwrap().violations, vec!["v-1"]);

        store.unlink_violation(&id, "v-1").await.unwrap();
        store.unlink_violation(&id, "v-1").await.unwrap();
        assert!(store.get_agreement(&id).await.unwrap().violations.is_empty());
    }

    #[tokio::test]
    async fn test_links() {
        let store = InMemoryAgreementStore::new();
        store.insert(agreement("a-1", AgreementState::Accepted)).await;

        let links = store.get_agreement_links(&AgreementId::new("a-1")).await.unwrap();
        assert_eq!(links, vec![LinkTarget::Device("vm-1".into())]);

        let missing = store.get_agreement_links(&AgreementId::new("nope")).await;
        assert!(matches!(missing, Err(Error::AgreementNotFound(_))));
    }

    #[test]
    fn test_unknown_agreement() {
        let store = InMemoryAgreementStore::new();
        let result = tokio_test::block_on(store.get_agreement(&AgreementId::new("nope")));
        assert!(matches!(result, Err(Error::AgreementNotFound(_))));
    }
}
