//! Metric Evaluator Module
//!
//! Pure evaluation of metric readings against SLO thresholds:
//! - Metric catalogue and type coercion
//! - Limiter semantics (max, min, margin, enum)
//! - Term aggregation (conjunction of breaches)

pub mod catalog;
pub mod term;
pub mod threshold;

pub use catalog::{MetricCatalog, MetricSpec, MetricType};
pub use term::{evaluate_term, TermEvaluation, TermOutcome};
pub use threshold::{check_threshold, is_violated, EvaluationError, LimiterKind};
