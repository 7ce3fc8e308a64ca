//! Violation persistence.

use crate::core::{Error, Result, TermKey, Timestamp};
use crate::violation::entity::{Violation, ViolationId};
use async_trait::async_trait;
use dashmap::DashMap;

/// Storage of violation entities.
#[async_trait]
pub trait ViolationStore: Send + Sync {
    /// Store a new violation.
    async fn create(&self, violation: Violation) -> Result<ViolationId>;

    /// Get a violation by ID.
    async fn get(&self, id: &ViolationId) -> Result<Violation>;

    /// Stamp the recovery time of a violation.
    async fn close(&self, id: &ViolationId, at: Timestamp) -> Result<Violation>;

    /// Delete a violation. Returns whether one existed.
    async fn delete(&self, id: &ViolationId) -> Result<bool>;

    /// Open violations of a term.
    async fn open_for(&self, key: &TermKey) -> Result<Vec<Violation>>;
}

/// Violation store held in memory.
#[derive(Default)]
pub struct InMemoryViolationStore {
    violations: DashMap<ViolationId, Violation>,
}

impl InMemoryViolationStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            violations: DashMap::new(),
        }
    }

    /// Number of stored violations.
    pub fn len(&self) -> usize {
        self.violations.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.violations.is_empty()
    }
}

#[async_trait]
impl ViolationStore for InMemoryViolationStore {
    async fn create(&self, violation: Violation) -> Result<ViolationId> {
        let id = violation.id.clone();
        if self.violations.contains_key(&id) {
            return Err(Error::Internal(format!("Violation {} already exists", id)));
        }
        self.violations.insert(id.clone(), violation);
        Ok(id)
    }

    async fn get(&self, id: &ViolationId) -> Result<Violation> {
        self.violations
            .get(id)
            .map(|v| v.value().clone())
            .ok_or_else(|| Error::ViolationNotFound(id.to_string()))
    }

    async fn close(&self, id: &ViolationId, at: Timestamp) -> Result<Violation> {
        let mut violation = self
            .violations
            .get_mut(id)
            .ok_or_else(|| Error::ViolationNotFound(id.to_string()))?;
        violation.closed_at = Some(at);
        Ok(violation.value().clone())
    }

    async fn delete(&self, id: &ViolationId) -> Result<bool> {
        Ok(self.violations.remove(id).is_some())
    }

    async fn open_for(&self, key: &TermKey) -> Result<Vec<Violation>> {
        let mut open: Vec<Violation> = self
            .violations
            .iter()
            .filter(|v| !v.is_closed() && v.agreement_id == key.agreement_id && v.term == key.term)
            .map(|v| v.value().clone())
            .collect();
        open.sort_by(|a, b| a.opened_at.cmp(&b.opened_at));
        Ok(open)
    }
}
