//! Metric sources read by polling collectors.

use crate::core::{DeviceId, Error, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;

/// A monitoring backend that can be read on demand.
#[async_trait]
pub trait MetricSource: Send + Sync {
    /// Latest value of a metric on a device.
    async fn read(&self, device: &DeviceId, metric: &str) -> Result<Value>;
}

/// Metric source backed by an in-memory table of latest readings.
///
/// Used by tests and by deployments that receive readings from an
/// external feeder.
#[derive(Default)]
pub struct InMemoryMetricSource {
    readings: DashMap<(DeviceId, String), Value>,
}

impl InMemoryMetricSource {
    /// Create an empty source.
    pub fn new() -> Self {
        Self {
            readings: DashMap::new(),
        }
    }

    /// Record the latest value of a metric.
    pub fn set(&self, device: &str, metric: &str, value: Value) {
        self.readings
            .insert((DeviceId::new(device), metric.to_string()), value);
    }

    /// Forget the value of a metric.
    pub fn clear(&self, device: &str, metric: &str) {
        self.readings
            .remove(&(DeviceId::new(device), metric.to_string()));
    }
}

#[async_trait]
impl MetricSource for InMemoryMetricSource {
    async fn read(&self, device: &DeviceId, metric: &str) -> Result<Value> {
        self.readings
            .get(&(device.clone(), metric.to_string()))
            .map(|v| v.value().clone())
            .ok_or_else(|| {
                Error::Collector(format!("no reading of {} on device {}", metric, device))
            })
    }
}
