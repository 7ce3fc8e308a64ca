//! Violation entity.
//!
//! Record of one breach of one term, kept open while the term is under
//! remedy.

use crate::core::{now, AgreementId, DeviceId, TermKey, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Unique violation identifier.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ViolationId(pub String);

impl ViolationId {
    /// Create a new violation ID.
    pub fn new(id: &str) -> Self {
        Self(id.to_string())
    }

    /// Generate a unique ID.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Get the ID string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ViolationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A breach of an SLO term.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    /// Unique violation ID
    pub id: ViolationId,
    /// Violated agreement
    pub agreement_id: AgreementId,
    /// Violated term
    pub term: String,
    /// Device the breach was observed on
    pub device: DeviceId,
    /// Breaching readings, keyed by metric
    pub metrics: BTreeMap<String, Value>,
    /// Remedy descriptor of the term
    #[serde(default)]
    pub remedy: Value,
    /// When the breach was detected
    pub opened_at: Timestamp,
    /// When the term recovered
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<Timestamp>,
}

impl Violation {
    /// Open a new violation.
    pub fn open(key: &TermKey, device: &DeviceId, metrics: BTreeMap<String, Value>, remedy: Value) -> Self {
        Self {
            id: ViolationId::generate(),
            agreement_id: key.agreement_id.clone(),
            term: key.term.clone(),
            device: device.clone(),
            metrics,
            remedy,
            opened_at: now(),
            closed_at: None,
        }
    }

    /// Agreement and term of the violation.
    pub fn key(&self) -> TermKey {
        TermKey::new(&self.agreement_id, &self.term)
    }

    /// Whether the term has recovered.
    pub fn is_closed(&self) -> bool {
        self.closed_at.is_some()
    }
}
