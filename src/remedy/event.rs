//! Remedy events published on breach.

use crate::core::{now, AgreementId, DeviceId, TermKey, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Notification that a term was violated and its remedy applies.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RemedyEvent {
    /// Violated agreement
    pub agreement_id: AgreementId,
    /// Violated term
    pub term: String,
    /// When the breach was handled
    pub timestamp: Timestamp,
    /// Device the breach was observed on
    pub device: DeviceId,
    /// Breaching readings, keyed by metric
    pub violation_metrics: BTreeMap<String, Value>,
    /// Remedy descriptor of the term
    pub remedy: Value,
}

impl RemedyEvent {
    /// Create an event stamped now.
    pub fn new(
        key: &TermKey,
        device: &DeviceId,
        violation_metrics: BTreeMap<String, Value>,
        remedy: Value,
    ) -> Self {
        Self {
            agreement_id: key.agreement_id.clone(),
            term: key.term.clone(),
            timestamp: now(),
            device: device.clone(),
            violation_metrics,
            remedy,
        }
    }

    /// Agreement and term of the event.
    pub fn key(&self) -> TermKey {
        TermKey::new(&self.agreement_id, &self.term)
    }
}
