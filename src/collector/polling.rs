//! Polling collector.
//!
//! Runs one cancellable watch task per subscribed (device, metric) pair and
//! pushes breaching readings through the engine's notifier.

use crate::collector::interface::{Collector, Notifier, SubscriptionRequest};
use crate::collector::source::MetricSource;
use crate::core::{DeviceId, Result};
use crate::evaluator::{is_violated, LimiterKind, MetricCatalog, MetricType};
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Threshold a watch reports on.
#[derive(Clone, Debug, PartialEq)]
struct Trigger {
    threshold: Value,
    limiter: LimiterKind,
    limiter_value: Option<f64>,
}

impl Trigger {
    fn fires(&self, metric_type: MetricType, value: &Value) -> bool {
        matches!(
            is_violated(
                metric_type,
                value,
                &self.threshold,
                self.limiter,
                self.limiter_value
            ),
            Ok(true)
        )
    }
}

impl From<&SubscriptionRequest> for Trigger {
    fn from(request: &SubscriptionRequest) -> Self {
        Self {
            threshold: request.threshold.clone(),
            limiter: request.limiter,
            limiter_value: request.limiter_value,
        }
    }
}

/// A running watch. Triggers are kept once per holder.
struct Watch {
    triggers: Arc<RwLock<Vec<Trigger>>>,
    cancel: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

/// Collector that polls a [`MetricSource`] on a fixed interval.
pub struct PollingCollector<S: MetricSource> {
    name: String,
    source: Arc<S>,
    catalog: Arc<MetricCatalog>,
    notifier: Notifier,
    poll_interval: Duration,
    watches: DashMap<(DeviceId, String), Watch>,
}

impl<S: MetricSource + 'static> PollingCollector<S> {
    /// Create a new polling collector.
    pub fn new(
        name: &str,
        source: Arc<S>,
        catalog: Arc<MetricCatalog>,
        notifier: Notifier,
        poll_interval: Duration,
    ) -> Self {
        Self {
            name: name.to_string(),
            source,
            catalog,
            notifier,
            poll_interval,
            watches: DashMap::new(),
        }
    }

    /// Whether a pair is being watched.
    pub fn is_watching(&self, device: &DeviceId, metric: &str) -> bool {
        self.watches
            .contains_key(&(device.clone(), metric.to_string()))
    }

    /// Poll interval.
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    fn spawn_watch(
        &self,
        device: DeviceId,
        metric: String,
        metric_type: MetricType,
        triggers: Arc<RwLock<Vec<Trigger>>>,
        mut cancel: oneshot::Receiver<()>,
    ) -> JoinHandle<()> {
        let source = Arc::clone(&self.source);
        let notifier = self.notifier.clone();
        let interval = self.poll_interval;

        tokio::spawn(async move {
            loop {
                match source.read(&device, &metric).await {
                    Ok(value) => {
                        debug!("Checking {}#{}: {}", device, metric, value);
                        let fires = triggers
                            .read()
                            .await
                            .iter()
                            .any(|t| t.fires(metric_type, &value));
                        if fires && notifier.notify(&device, &metric, value).is_err() {
                            warn!(
                                "Notification channel closed, stopping watch of {}#{}",
                                device, metric
                            );
                            break;
                        }
                    }
                    Err(e) => debug!("Reading {}#{} failed: {}", device, metric, e),
                }

                tokio::select! {
                    _ = &mut cancel => break,
                    _ = tokio::time::sleep(interval) => {}
                }
            }
            debug!("Watch of {}#{} stopped", device, metric);
        })
    }
}

#[async_trait]
impl<S: MetricSource + 'static> Collector for PollingCollector<S> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn subscribe(&self, request: SubscriptionRequest) -> Result<()> {
        let metric_type = self.catalog.metric_type(&request.metric)?;
        let trigger = Trigger::from(&request);
        let key = (request.device.clone(), request.metric.clone());

        let existing = self.watches.get(&key).map(|w| Arc::clone(&w.triggers));
        if let Some(triggers) = existing {
            triggers.write().await.push(trigger);
            return Ok(());
        }

        info!(
            "{}: watching {} on device {} every {:?}",
            self.name, request.metric, request.device, self.poll_interval
        );
        let triggers = Arc::new(RwLock::new(vec![trigger]));
        let (cancel, cancel_rx) = oneshot::channel();
        let handle = self.spawn_watch(
            request.device,
            request.metric,
            metric_type,
            Arc::clone(&triggers),
            cancel_rx,
        );

        self.watches.insert(
            key,
            Watch {
                triggers,
                cancel,
                handle,
            },
        );
        Ok(())
    }

    async fn release(&self, request: SubscriptionRequest) -> Result<()> {
        let key = (request.device.clone(), request.metric.clone());
        let Some(triggers) = self.watches.get(&key).map(|w| Arc::clone(&w.triggers)) else {
            debug!("{}: {}#{} not watched", self.name, request.device, request.metric);
            return Ok(());
        };

        let trigger = Trigger::from(&request);
        let mut triggers = triggers.write().await;
        if let Some(position) = triggers.iter().position(|t| *t == trigger) {
            triggers.remove(position);
            debug!(
                "{}: dropped a trigger of {}#{}, {} left",
                self.name,
                request.device,
                request.metric,
                triggers.len()
            );
        }
        Ok(())
    }

    async fn unsubscribe(&self, device: &DeviceId, metric: &str) -> Result<()> {
        let Some((_, watch)) = self.watches.remove(&(device.clone(), metric.to_string())) else {
            debug!("{}: {}#{} not watched", self.name, device, metric);
            return Ok(());
        };

        debug!("{}: un-subscribing {} on device {}", self.name, metric, device);
        let _ = watch.cancel.send(());
        if let Err(e) = watch.handle.await {
            warn!("Watch of {}#{} ended abnormally: {}", device, metric, e);
        }
        Ok(())
    }

    async fn pull(&self, device: &DeviceId, metric: &str) -> Result<Value> {
        self.source.read(device, metric).await
    }

    fn active_subscriptions(&self) -> usize {
        self.watches.len()
    }

    async fn shutdown(&self) -> Result<()> {
        let keys: Vec<(DeviceId, String)> = self.watches.iter().map(|w| w.key().clone()).collect();
        for (device, metric) in keys {
            self.unsubscribe(&device, &metric).await?;
        }
        Ok(())
    }
}
