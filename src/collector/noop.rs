//! Reference collector with no backend behind it.

use crate::collector::interface::{Collector, SubscriptionRequest};
use crate::core::{DeviceId, Error, Result};
use async_trait::async_trait;
use dashmap::DashSet;
use serde_json::Value;
use tracing::debug;

/// Registry name of the fallback collector.
pub const NOOP_COLLECTOR: &str = "noop";

/// Collector used when no backend serves a device or metric.
///
/// Subscriptions are tracked so teardown stays symmetric, but nothing is
/// ever read or pushed.
#[derive(Default)]
pub struct NoopCollector {
    subscriptions: DashSet<(DeviceId, String)>,
}

impl NoopCollector {
    /// Create a new no-op collector.
    pub fn new() -> Self {
        Self {
            subscriptions: DashSet::new(),
        }
    }

    /// Whether a pair is subscribed.
    pub fn is_subscribed(&self, device: &DeviceId, metric: &str) -> bool {
        self.subscriptions
            .contains(&(device.clone(), metric.to_string()))
    }
}

#[async_trait]
impl Collector for NoopCollector {
    fn name(&self) -> &str {
        NOOP_COLLECTOR
    }

    async fn subscribe(&self, request: SubscriptionRequest) -> Result<()> {
        debug!(
            "No-op subscription of {} on device {}",
            request.metric, request.device
        );
        self.subscriptions.insert((request.device, request.metric));
        Ok(())
    }

    async fn unsubscribe(&self, device: &DeviceId, metric: &str) -> Result<()> {
        self.subscriptions.remove(&(device.clone(), metric.to_string()));
        Ok(())
    }

    async fn pull(&self, device: &DeviceId, metric: &str) -> Result<Value> {
        Err(Error::Collector(format!(
            "no monitoring backend serves {} on device {}",
            metric, device
        )))
    }

    fn active_subscriptions(&self) -> usize {
        self.subscriptions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agreement::MetricBinding;
    use serde_json::json;

    #[tokio::test]
    async fn test_noop_tracks_subscriptions() {
        let collector = NoopCollector::new();
        let device = DeviceId::new("vm-1");
        let binding = MetricBinding::margin("uptime", json!(98), 2.0);

        collector
            .subscribe(SubscriptionRequest::new(&device, &binding))
            .await
            .unwrap();
        assert!(collector.is_subscribed(&device, "uptime"));
        assert_eq!(collector.active_subscriptions(), 1);

        collector.unsubscribe(&device, "uptime").await.unwrap();
        collector.unsubscribe(&device, "uptime").await.unwrap();
        assert_eq!(collector.active_subscriptions(), 0);
    }

    #[tokio::test]
    async fn test_noop_pull_fails() {
        let collector = NoopCollector::new();
        let result = collector.pull(&DeviceId::new("vm-1"), "uptime").await;
        assert!(matches!(result, Err(Error::Collector(_))));
    }
}
