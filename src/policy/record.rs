//! Policy records.
//!
//! A policy is the materialised binding of an agreement's SLO terms to the
//! devices currently linked to it.

use crate::agreement::{Agreement, MetricBinding, Term};
use crate::core::{AgreementId, DeviceId, Error, Result};
use crate::evaluator::{LimiterKind, MetricCatalog};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Threshold of one metric within a term policy.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MetricThreshold {
    /// SLO threshold
    pub value: Value,
    /// Limiter kind
    pub limiter_type: LimiterKind,
    /// Margin percentage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limiter_value: Option<f64>,
}

/// Policy of a single term.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TermPolicy {
    /// Thresholds keyed by metric
    pub metrics: BTreeMap<String, MetricThreshold>,
    /// Remedy descriptor
    #[serde(default)]
    pub remedy: Value,
}

impl TermPolicy {
    /// Build from an agreement term, validating every binding.
    ///
    /// A metric may be bound at most once per term.
    pub fn from_term(term: &Term, catalog: &MetricCatalog) -> Result<Self> {
        let mut metrics = BTreeMap::new();
        for binding in &term.metrics {
            binding.validate(catalog)?;
            if metrics.contains_key(&binding.metric) {
                return Err(Error::Validation(format!(
                    "metric {} is bound more than once",
                    binding.metric
                )));
            }
            metrics.insert(
                binding.metric.clone(),
                MetricThreshold {
                    value: binding.threshold.clone(),
                    limiter_type: binding.limiter,
                    limiter_value: binding.limiter_value,
                },
            );
        }

        Ok(Self {
            metrics,
            remedy: term.remedy.clone(),
        })
    }

    /// Metric bindings of the term, ordered by metric name.
    pub fn bindings(&self) -> Vec<MetricBinding> {
        self.metrics
            .iter()
            .map(|(metric, threshold)| MetricBinding {
                metric: metric.clone(),
                threshold: threshold.value.clone(),
                limiter: threshold.limiter_type,
                limiter_value: threshold.limiter_value,
            })
            .collect()
    }
}

/// Persisted policy of one agreement.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    /// Agreement ID
    pub agreement_id: AgreementId,
    /// Term policies keyed by term name
    pub terms: BTreeMap<String, TermPolicy>,
    /// Devices the terms are subscribed on
    pub devices: Vec<DeviceId>,
    /// Federated agreements contributing devices
    #[serde(default)]
    pub linked_agreements: Vec<AgreementId>,
}

impl Policy {
    /// Build the policy of an agreement.
    ///
    /// SLO terms without metric bindings carry nothing to monitor and are
    /// left out.
    pub fn from_agreement(
        agreement: &Agreement,
        catalog: &MetricCatalog,
        devices: Vec<DeviceId>,
        linked_agreements: Vec<AgreementId>,
    ) -> Result<Self> {
        let mut terms = BTreeMap::new();
        for term in agreement.slo_terms().filter(|t| !t.metrics.is_empty()) {
            let policy = TermPolicy::from_term(term, catalog).map_err(|e| {
                Error::Validation(format!(
                    "term {} of agreement {}: {}",
                    term.name, agreement.id, e
                ))
            })?;
            terms.insert(term.name.clone(), policy);
        }

        Ok(Self {
            agreement_id: agreement.id.clone(),
            terms,
            devices,
            linked_agreements,
        })
    }

    /// Get a term policy.
    pub fn term(&self, name: &str) -> Result<&TermPolicy> {
        self.terms.get(name).ok_or_else(|| Error::TermNotFound {
            agreement_id: self.agreement_id.to_string(),
            term: name.to_string(),
        })
    }

    /// Names of the terms that monitor `metric`.
    pub fn terms_with_metric<'a>(&'a self, metric: &'a str) -> impl Iterator<Item = &'a str> {
        self.terms
            .iter()
            .filter(move |(_, t)| t.metrics.contains_key(metric))
            .map(|(name, _)| name.as_str())
    }

    /// Whether the policy covers a device.
    pub fn has_device(&self, device: &DeviceId) -> bool {
        self.devices.contains(device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agreement::AgreementState;
    use crate::core::now;
    use chrono::Duration;
    use serde_json::json;

    fn agreement() -> Agreement {
        let t = now();
        Agreement::new("a-98", "p", "c", t - Duration::hours(1), t + Duration::hours(1))
            .with_state(AgreementState::Accepted)
            .with_term(
                Term::slo("availability", json!({"credit": 5}))
                    .with_metric(MetricBinding::margin("uptime", json!(98), 2.0)),
            )
            .with_term(Term::slo("empty", json!(null)))
            .with_term(Term::service("description"))
    }

    #[test]
    fn test_policy_from_agreement() {
        let policy = Policy::from_agreement(
            &agreement(),
            &MetricCatalog::builtin(),
            vec![DeviceId::new("vm-1")],
            vec![],
        )
        .unwrap();

        assert_eq!(policy.terms.len(), 1);
        let term = policy.term("availability").unwrap();
        assert_eq!(term.metrics["uptime"].limiter_type, LimiterKind::Margin);
        assert_eq!(term.bindings()[0].limiter_value, Some(2.0));
        assert!(policy.has_device(&DeviceId::new("vm-1")));
        assert_eq!(policy.terms_with_metric("uptime").collect::<Vec<_>>(), vec!["availability"]);
    }

    #[test]
    fn test_policy_rejects_unknown_metric() {
        let agreement = agreement().with_term(
            Term::slo("power", json!(null))
                .with_metric(MetricBinding::new("dummy_metric", json!(1), LimiterKind::Max)),
        );

        let err = Policy::from_agreement(&agreement, &MetricCatalog::builtin(), vec![], vec![])
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_policy_rejects_duplicate_metric() {
        let agreement = agreement().with_term(
            Term::slo("latency", json!(null))
                .with_metric(MetricBinding::new("latency", json!(100), LimiterKind::Max))
                .with_metric(MetricBinding::new("latency", json!(10), LimiterKind::Min)),
        );

        let err = Policy::from_agreement(&agreement, &MetricCatalog::builtin(), vec![], vec![])
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_record_shape() {
        let policy = Policy::from_agreement(
            &agreement(),
            &MetricCatalog::builtin(),
            vec![DeviceId::new("vm-1")],
            vec![AgreementId::new("a-1")],
        )
        .unwrap();

        let json = serde_json::to_value(&policy).unwrap();
        assert_eq!(json["agreement_id"], json!("a-98"));
        assert_eq!(
            json["terms"]["availability"]["metrics"]["uptime"],
            json!({"value": 98, "limiter_type": "margin", "limiter_value": 2.0})
        );
        assert_eq!(json["terms"]["availability"]["remedy"], json!({"credit": 5}));
        assert_eq!(json["devices"], json!(["vm-1"]));
        assert_eq!(json["linked_agreements"], json!(["a-1"]));
    }
}
