//! Threshold evaluation for a single metric reading.

use crate::evaluator::catalog::MetricType;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use thiserror::Error;

/// Comparison semantics applied to a metric.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LimiterKind {
    /// Breach when the reading exceeds the threshold
    Max,
    /// Breach when the reading falls below the threshold
    Min,
    /// Breach when the reading leaves the threshold +/- a percentage
    Margin,
    /// Breach when the reading is not one of the allowed values
    Enum,
    /// Unrecognised limiter; cannot be evaluated
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for LimiterKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LimiterKind::Max => write!(f, "max"),
            LimiterKind::Min => write!(f, "min"),
            LimiterKind::Margin => write!(f, "margin"),
            LimiterKind::Enum => write!(f, "enum"),
            LimiterKind::Unknown => write!(f, "unknown"),
        }
    }
}

/// Reasons a reading cannot be evaluated.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvaluationError {
    #[error("cannot coerce {value} to {expected}")]
    Coercion { value: String, expected: MetricType },

    #[error("unknown limiter kind")]
    UnknownLimiter,

    #[error("margin limiter requires a limiter value")]
    MissingMargin,

    #[error("{limiter} limiter does not apply to {metric_type} metrics")]
    Unsupported {
        limiter: LimiterKind,
        metric_type: MetricType,
    },

    #[error("enum threshold must be a list of allowed values")]
    EnumThreshold,

    #[error("values {0} and {1} are not comparable")]
    Incomparable(String, String),
}

/// A value coerced to its declared metric type.
#[derive(Clone, Debug, PartialEq)]
enum Coerced {
    Integer(i64),
    Real(f64),
    Text(String),
}

impl Coerced {
    fn as_f64(&self) -> Option<f64> {
        match self {
            Coerced::Integer(v) => Some(*v as f64),
            Coerced::Real(v) => Some(*v),
            Coerced::Text(_) => None,
        }
    }

    fn compare(&self, other: &Coerced) -> Result<Ordering, EvaluationError> {
        let ordering = match (self, other) {
            (Coerced::Integer(a), Coerced::Integer(b)) => Some(a.cmp(b)),
            (Coerced::Real(a), Coerced::Real(b)) => a.partial_cmp(b),
            (Coerced::Text(a), Coerced::Text(b)) => Some(a.cmp(b)),
            _ => None,
        };
        ordering.ok_or_else(|| {
            EvaluationError::Incomparable(format!("{:?}", self), format!("{:?}", other))
        })
    }
}

fn coerce(value: &Value, metric_type: MetricType) -> Result<Coerced, EvaluationError> {
    let coerced = match metric_type {
        MetricType::Integer => match value {
            Value::Number(n) => n
                .as_i64()
                .or_else(|| {
                    n.as_f64()
                        .filter(|f| f.fract() == 0.0 && f.is_finite())
                        .map(|f| f as i64)
                })
                .map(Coerced::Integer),
            Value::String(s) => s.trim().parse::<i64>().ok().map(Coerced::Integer),
            _ => None,
        },
        MetricType::Real => match value {
            Value::Number(n) => n.as_f64().map(Coerced::Real),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|f| f.is_finite())
                .map(Coerced::Real),
            _ => None,
        },
        MetricType::String => match value {
            Value::String(s) => Some(Coerced::Text(s.clone())),
            Value::Number(n) => Some(Coerced::Text(n.to_string())),
            Value::Bool(b) => Some(Coerced::Text(b.to_string())),
            _ => None,
        },
    };

    coerced.ok_or_else(|| EvaluationError::Coercion {
        value: value.to_string(),
        expected: metric_type,
    })
}

/// Check that a threshold can ever be compared under the given limiter.
///
/// The threshold (every member, for `enum`) must coerce to `metric_type`,
/// and `margin` only applies to numeric metrics.
pub fn check_threshold(
    metric_type: MetricType,
    threshold: &Value,
    limiter: LimiterKind,
    limiter_value: Option<f64>,
) -> Result<(), EvaluationError> {
    match limiter {
        LimiterKind::Max | LimiterKind::Min => {
            coerce(threshold, metric_type)?;
        }
        LimiterKind::Margin => {
            limiter_value.ok_or(EvaluationError::MissingMargin)?;
            coerce(threshold, metric_type)?
                .as_f64()
                .ok_or(EvaluationError::Unsupported {
                    limiter,
                    metric_type,
                })?;
        }
        LimiterKind::Enum => {
            let allowed = threshold.as_array().ok_or(EvaluationError::EnumThreshold)?;
            for candidate in allowed {
                coerce(candidate, metric_type)?;
            }
        }
        LimiterKind::Unknown => return Err(EvaluationError::UnknownLimiter),
    }
    Ok(())
}

/// Whether `value` breaches `threshold` under the given limiter.
///
/// Both sides are coerced to `metric_type` first. `max` and `min` breach on
/// strict inequality; `margin` breaches strictly outside
/// `[t - t*p/100, t + t*p/100]`; `enum` breaches when the value is not in
/// the threshold list.
pub fn is_violated(
    metric_type: MetricType,
    value: &Value,
    threshold: &Value,
    limiter: LimiterKind,
    limiter_value: Option<f64>,
) -> Result<bool, EvaluationError> {
    match limiter {
        LimiterKind::Max => {
            let value = coerce(value, metric_type)?;
            let threshold = coerce(threshold, metric_type)?;
            Ok(value.compare(&threshold)? == Ordering::Greater)
        }
        LimiterKind::Min => {
            let value = coerce(value, metric_type)?;
            let threshold = coerce(threshold, metric_type)?;
            Ok(value.compare(&threshold)? == Ordering::Less)
        }
        LimiterKind::Margin => {
            let percent = limiter_value.ok_or(EvaluationError::MissingMargin)?;
            let unsupported = || EvaluationError::Unsupported {
                limiter,
                metric_type,
            };
            let value = coerce(value, metric_type)?.as_f64().ok_or_else(unsupported)?;
            let threshold = coerce(threshold, metric_type)?
                .as_f64()
                .ok_or_else(unsupported)?;

            let delta = threshold * percent / 100.0;
            let low = threshold - delta;
            let high = threshold + delta;
            Ok(value < low || value > high)
        }
        LimiterKind::Enum => {
            let allowed = threshold.as_array().ok_or(EvaluationError::EnumThreshold)?;
            let value = coerce(value, metric_type)?;
            for candidate in allowed {
                if coerce(candidate, metric_type)? == value {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        LimiterKind::Unknown => Err(EvaluationError::UnknownLimiter),
    }
}
