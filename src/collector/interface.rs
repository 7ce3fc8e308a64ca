//! Collector interface definition.
//!
//! Defines the capability monitoring backends must implement.

use crate::agreement::MetricBinding;
use crate::core::{now, DeviceId, Error, Result, Timestamp};
use crate::evaluator::LimiterKind;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

/// Request to watch one metric of one device.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionRequest {
    /// Device to watch
    pub device: DeviceId,
    /// Metric name
    pub metric: String,
    /// SLO threshold
    pub threshold: Value,
    /// Limiter kind
    pub limiter: LimiterKind,
    /// Margin percentage
    pub limiter_value: Option<f64>,
}

impl SubscriptionRequest {
    /// Build a request from a metric binding.
    pub fn new(device: &DeviceId, binding: &MetricBinding) -> Self {
        Self {
            device: device.clone(),
            metric: binding.metric.clone(),
            threshold: binding.threshold.clone(),
            limiter: binding.limiter,
            limiter_value: binding.limiter_value,
        }
    }
}

/// A reading pushed by a collector.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MetricNotification {
    /// Device the reading is from
    pub device: DeviceId,
    /// Metric name
    pub metric: String,
    /// Raw reading
    pub value: Value,
    /// When the reading was taken
    pub observed_at: Timestamp,
}

impl MetricNotification {
    /// Create a notification stamped now.
    pub fn new(device: &DeviceId, metric: &str, value: Value) -> Self {
        Self {
            device: device.clone(),
            metric: metric.to_string(),
            value,
            observed_at: now(),
        }
    }
}

/// Handle collectors use to push readings to the engine.
#[derive(Clone, Debug)]
pub struct Notifier {
    tx: mpsc::UnboundedSender<MetricNotification>,
}

impl Notifier {
    /// Create a notifier and the receiving end the engine listens on.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<MetricNotification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Push a reading.
    pub fn notify(&self, device: &DeviceId, metric: &str, value: Value) -> Result<()> {
        self.tx
            .send(MetricNotification::new(device, metric, value))
            .map_err(|_| Error::Internal("notification channel closed".to_string()))
    }

    /// Whether the engine side has gone away.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Capability every monitoring backend adapter implements.
#[async_trait]
pub trait Collector: Send + Sync {
    /// Registry name of the collector.
    fn name(&self) -> &str;

    /// Start watching a metric of a device.
    ///
    /// Repeated subscriptions of the same pair add triggers to the
    /// existing watch.
    async fn subscribe(&self, request: SubscriptionRequest) -> Result<()>;

    /// Drop the trigger one holder added to a pair that stays watched.
    ///
    /// Collectors that do not filter readings by threshold can ignore it.
    async fn release(&self, _request: SubscriptionRequest) -> Result<()> {
        Ok(())
    }

    /// Stop watching a metric of a device. Unknown pairs are a no-op.
    async fn unsubscribe(&self, device: &DeviceId, metric: &str) -> Result<()>;

    /// Read the current value of a metric.
    async fn pull(&self, device: &DeviceId, metric: &str) -> Result<Value>;

    /// Number of active watches.
    fn active_subscriptions(&self) -> usize {
        0
    }

    /// Stop every watch.
    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}
