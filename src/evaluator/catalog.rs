//! Metric catalogue.
//!
//! Declares every metric the engine knows about and the type its readings
//! are coerced to before comparison.

use crate::core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Declared type of a metric's readings.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricType {
    /// Whole numbers
    Integer,
    /// Floating point numbers
    Real,
    /// Free text
    String,
}

impl std::fmt::Display for MetricType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetricType::Integer => write!(f, "integer"),
            MetricType::Real => write!(f, "real"),
            MetricType::String => write!(f, "string"),
        }
    }
}

/// Catalogue entry for one metric.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MetricSpec {
    /// Reading type
    pub value: MetricType,
    /// Monitoring system that usually serves the metric
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monitoring: Option<String>,
}

impl MetricSpec {
    /// Create a new spec.
    pub fn new(value: MetricType) -> Self {
        Self {
            value,
            monitoring: None,
        }
    }
}

/// The set of recognised metrics.
///
/// Serialized as a plain JSON object keyed by metric name:
/// `{"uptime": {"value": "real", "monitoring": "zabbix"}}`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetricCatalog {
    metrics: HashMap<String, MetricSpec>,
}

impl MetricCatalog {
    /// Create an empty catalogue.
    pub fn new() -> Self {
        Self {
            metrics: HashMap::new(),
        }
    }

    /// Catalogue of the infrastructure metrics shipped by default.
    pub fn builtin() -> Self {
        Self::new()
            .with_metric("uptime", MetricType::Real)
            .with_metric("availability", MetricType::Real)
            .with_metric("latency", MetricType::Real)
            .with_metric("cpu_load", MetricType::Real)
            .with_metric("power", MetricType::Real)
            .with_metric("vcpu", MetricType::Integer)
            .with_metric("scu", MetricType::Integer)
            .with_metric("compute_utilisation", MetricType::Real)
            .with_metric("compute_saturation", MetricType::Real)
            .with_metric("memory_utilisation", MetricType::Real)
            .with_metric("memory_saturation", MetricType::Real)
            .with_metric("storage_utilisation", MetricType::Real)
            .with_metric("network_utilisation", MetricType::Real)
            .with_metric("status", MetricType::String)
    }

    /// Add a metric.
    pub fn with_metric(mut self, name: &str, value: MetricType) -> Self {
        self.insert(name, MetricSpec::new(value));
        self
    }

    /// Insert or replace a metric.
    pub fn insert(&mut self, name: &str, spec: MetricSpec) {
        self.metrics.insert(name.to_string(), spec);
    }

    /// Parse a catalogue from JSON.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load a catalogue from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&raw).map_err(|e| {
            Error::Config(format!(
                "invalid metric catalogue {}: {}",
                path.as_ref().display(),
                e
            ))
        })
    }

    /// Look up a metric.
    pub fn get(&self, name: &str) -> Option<&MetricSpec> {
        self.metrics.get(name)
    }

    /// Whether the metric is recognised.
    pub fn contains(&self, name: &str) -> bool {
        self.metrics.contains_key(name)
    }

    /// Declared type of a metric, or `UnknownMetric`.
    pub fn metric_type(&self, name: &str) -> Result<MetricType> {
        self.metrics
            .get(name)
            .map(|spec| spec.value)
            .ok_or_else(|| Error::UnknownMetric(name.to_string()))
    }

    /// Metric names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.metrics.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Number of metrics.
    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    /// Whether the catalogue is empty.
    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }
}
