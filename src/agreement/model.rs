//! Agreements and their SLO terms.
//!
//! Agreements are created and negotiated elsewhere; the engine reads them
//! and only ever mutates term state.

use crate::core::{AgreementId, DeviceId, Error, Result, Timestamp};
use crate::evaluator::{check_threshold, LimiterKind, MetricCatalog};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Agreement lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgreementState {
    /// Awaiting acceptance
    Pending,
    /// Accepted by the provider
    Accepted,
    /// Rejected by the provider
    Rejected,
    /// Temporarily suspended
    Suspended,
}

/// Term type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TermKind {
    /// Service description term
    Service,
    /// Service level objective with a remedy
    Slo,
}

/// Term lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TermState {
    /// Not monitored
    Undefined,
    /// Monitored and within objective
    Fulfilled,
    /// Monitored and breached
    Violated,
}

impl std::fmt::Display for TermState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TermState::Undefined => write!(f, "undefined"),
            TermState::Fulfilled => write!(f, "fulfilled"),
            TermState::Violated => write!(f, "violated"),
        }
    }
}

/// Binding of one metric to its SLO threshold.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MetricBinding {
    /// Metric name
    pub metric: String,
    /// SLO threshold (a list of allowed values for `enum`)
    pub threshold: Value,
    /// Limiter kind
    pub limiter: LimiterKind,
    /// Margin percentage, required for `margin`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limiter_value: Option<f64>,
}

impl MetricBinding {
    /// Create a new binding.
    pub fn new(metric: &str, threshold: Value, limiter: LimiterKind) -> Self {
        Self {
            metric: metric.to_string(),
            threshold,
            limiter,
            limiter_value: None,
        }
    }

    /// Create a margin binding.
    pub fn margin(metric: &str, threshold: Value, percent: f64) -> Self {
        Self {
            limiter_value: Some(percent),
            ..Self::new(metric, threshold, LimiterKind::Margin)
        }
    }

    /// Check the binding against the catalogue and limiter invariants.
    pub fn validate(&self, catalog: &MetricCatalog) -> Result<()> {
        let metric_type = catalog.metric_type(&self.metric)?;

        match self.limiter {
            LimiterKind::Margin => match self.limiter_value {
                Some(p) if (0.0..=100.0).contains(&p) => {}
                Some(p) => {
                    return Err(Error::Validation(format!(
                        "margin for {} must be within [0, 100], got {}",
                        self.metric, p
                    )))
                }
                None => {
                    return Err(Error::Validation(format!(
                        "margin limiter for {} requires a limiter value",
                        self.metric
                    )))
                }
            },
            LimiterKind::Enum => {
                let valid = self
                    .threshold
                    .as_array()
                    .map(|values| values.iter().all(Value::is_string))
                    .unwrap_or(false);
                if !valid {
                    return Err(Error::Validation(format!(
                        "enum threshold for {} must be a list of strings",
                        self.metric
                    )));
                }
            }
            LimiterKind::Max | LimiterKind::Min | LimiterKind::Unknown => {}
        }

        if self.threshold.is_null() {
            return Err(Error::Validation(format!(
                "threshold for {} is missing",
                self.metric
            )));
        }

        // Unknown limiters are excluded at evaluation time instead
        if self.limiter != LimiterKind::Unknown {
            check_threshold(metric_type, &self.threshold, self.limiter, self.limiter_value).map_err(
                |e| Error::Validation(format!("malformed threshold for {}: {}", self.metric, e)),
            )?;
        }

        Ok(())
    }
}

/// One obligation within an agreement.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Term {
    /// Term name
    pub name: String,
    /// Term type
    pub kind: TermKind,
    /// Current state
    pub state: TermState,
    /// Remedy passed through to the remedy sink
    #[serde(default)]
    pub remedy: Value,
    /// Metric bindings, in declaration order
    #[serde(default)]
    pub metrics: Vec<MetricBinding>,
}

impl Term {
    /// Create a new SLO term.
    pub fn slo(name: &str, remedy: Value) -> Self {
        Self {
            name: name.to_string(),
            kind: TermKind::Slo,
            state: TermState::Undefined,
            remedy,
            metrics: Vec::new(),
        }
    }

    /// Create a service description term.
    pub fn service(name: &str) -> Self {
        Self {
            kind: TermKind::Service,
            ..Self::slo(name, Value::Null)
        }
    }

    /// Add a metric binding.
    pub fn with_metric(mut self, binding: MetricBinding) -> Self {
        self.metrics.push(binding);
        self
    }

    /// Whether this is an SLO term.
    pub fn is_slo(&self) -> bool {
        self.kind == TermKind::Slo
    }
}

/// Target of an agreement link.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum LinkTarget {
    /// A monitored device
    Device(DeviceId),
    /// Another agreement (federation)
    Agreement(AgreementId),
}

/// A negotiated agreement.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Agreement {
    /// Agreement ID
    pub id: AgreementId,
    /// Provider
    pub provider: String,
    /// Customer
    pub customer: String,
    /// Start of the validity window (inclusive)
    pub effective_from: Timestamp,
    /// End of the validity window (exclusive)
    pub effective_until: Timestamp,
    /// Lifecycle state
    pub state: AgreementState,
    /// Terms keyed by name
    #[serde(default)]
    pub terms: BTreeMap<String, Term>,
    /// Links to devices and other agreements
    #[serde(default)]
    pub links: Vec<LinkTarget>,
    /// Linked open violations
    #[serde(default)]
    pub violations: Vec<String>,
}

impl Agreement {
    /// Create a new pending agreement.
    pub fn new(
        id: &str,
        provider: &str,
        customer: &str,
        effective_from: Timestamp,
        effective_until: Timestamp,
    ) -> Self {
        Self {
            id: AgreementId::new(id),
            provider: provider.to_string(),
            customer: customer.to_string(),
            effective_from,
            effective_until,
            state: AgreementState::Pending,
            terms: BTreeMap::new(),
            links: Vec::new(),
            violations: Vec::new(),
        }
    }

    /// Set state.
    pub fn with_state(mut self, state: AgreementState) -> Self {
        self.state = state;
        self
    }

    /// Add a term.
    pub fn with_term(mut self, term: Term) -> Self {
        self.terms.insert(term.name.clone(), term);
        self
    }

    /// Link a device.
    pub fn with_device(mut self, device: &str) -> Self {
        self.links.push(LinkTarget::Device(DeviceId::new(device)));
        self
    }

    /// Link another agreement.
    pub fn with_linked_agreement(mut self, agreement: &str) -> Self {
        self.links
            .push(LinkTarget::Agreement(AgreementId::new(agreement)));
        self
    }

    /// Accepted and `effective_from <= now < effective_until`.
    pub fn is_valid_at(&self, now: Timestamp) -> bool {
        self.state == AgreementState::Accepted
            && self.effective_from <= now
            && now < self.effective_until
    }

    /// SLO terms, in name order.
    pub fn slo_terms(&self) -> impl Iterator<Item = &Term> {
        self.terms.values().filter(|t| t.is_slo())
    }

    /// Get a term.
    pub fn term(&self, name: &str) -> Result<&Term> {
        self.terms.get(name).ok_or_else(|| Error::TermNotFound {
            agreement_id: self.id.to_string(),
            term: name.to_string(),
        })
    }
}
