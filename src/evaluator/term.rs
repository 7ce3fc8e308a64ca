//! Term-level aggregation of metric evaluations.

use crate::agreement::MetricBinding;
use crate::core::{Error, Result};
use crate::evaluator::catalog::MetricCatalog;
use crate::evaluator::threshold::is_violated;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;

/// Result of evaluating a whole term.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TermOutcome {
    /// Every evaluable binding breached
    Violated,
    /// At least one evaluable binding is within its objective
    Fulfilled,
    /// No binding could be evaluated
    Indeterminate,
}

/// Detailed term evaluation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TermEvaluation {
    /// Aggregate outcome
    pub outcome: TermOutcome,
    /// Breaching readings, keyed by metric
    pub violated_metrics: BTreeMap<String, Value>,
    /// Bindings left out of the aggregate, with the reason
    pub excluded: Vec<(String, String)>,
}

impl TermEvaluation {
    /// Whether the term is violated.
    pub fn is_violated(&self) -> bool {
        self.outcome == TermOutcome::Violated
    }

    /// Whether the term is fulfilled.
    pub fn is_fulfilled(&self) -> bool {
        self.outcome == TermOutcome::Fulfilled
    }
}

/// Evaluate a term over the latest readings.
///
/// A term is violated only if every evaluable binding breaches. Bindings
/// without a reading, or whose reading cannot be evaluated, are excluded
/// from the conjunction instead of counting either way.
pub fn evaluate_term(
    catalog: &MetricCatalog,
    bindings: &[MetricBinding],
    readings: &BTreeMap<String, Value>,
) -> Result<TermEvaluation> {
    if bindings.is_empty() {
        return Err(Error::Validation(
            "cannot evaluate a term without metric bindings".to_string(),
        ));
    }

    let mut violated_metrics = BTreeMap::new();
    let mut excluded = Vec::new();
    let mut evaluated = 0usize;

    for binding in bindings {
        let metric_type = catalog.metric_type(&binding.metric)?;

        let Some(reading) = readings.get(&binding.metric) else {
            excluded.push((binding.metric.clone(), "no reading".to_string()));
            continue;
        };

        match is_violated(
            metric_type,
            reading,
            &binding.threshold,
            binding.limiter,
            binding.limiter_value,
        ) {
            Ok(breached) => {
                evaluated += 1;
                if breached {
                    debug!("Violation on metric {}: {}", binding.metric, reading);
                    violated_metrics.insert(binding.metric.clone(), reading.clone());
                }
            }
            Err(e) => {
                debug!("Metric {} could not be evaluated: {}", binding.metric, e);
                excluded.push((binding.metric.clone(), e.to_string()));
            }
        }
    }

    let outcome = if evaluated == 0 {
        TermOutcome::Indeterminate
    } else if violated_metrics.len() == evaluated {
        TermOutcome::Violated
    } else {
        TermOutcome::Fulfilled
    };

    Ok(TermEvaluation {
        outcome,
        violated_metrics,
        excluded,
    })
}
