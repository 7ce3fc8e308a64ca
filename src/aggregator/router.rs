//! Aggregator.
//!
//! Fans term subscriptions out to collectors, reads terms back for the
//! remedy loop and routes pushed readings to every term that holds them.

use crate::agreement::MetricBinding;
use crate::aggregator::subscription::{Detach, SubscriptionKey, SubscriptionTable};
use crate::collector::{Collector, CollectorRegistry, MetricNotification, SubscriptionRequest};
use crate::core::{AgreementId, DeviceId, Error, Result, TermKey};
use crate::evaluator::MetricCatalog;
use crate::policy::PolicyStore;
use futures::future::join_all;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// A term to evaluate for one device.
#[derive(Clone, Debug)]
pub struct ReasoningRequest {
    /// Agreement and term
    pub key: TermKey,
    /// Device the readings come from
    pub device: DeviceId,
    /// Bindings of the term
    pub bindings: Vec<MetricBinding>,
    /// Latest readings, keyed by metric
    pub readings: BTreeMap<String, Value>,
    /// Remedy descriptor of the term
    pub remedy: Value,
}

/// Subscription and routing layer between terms and collectors.
pub struct Aggregator {
    registry: Arc<CollectorRegistry>,
    catalog: Arc<MetricCatalog>,
    policies: Arc<dyn PolicyStore>,
    subscriptions: SubscriptionTable,
}

impl Aggregator {
    /// Create a new aggregator.
    pub fn new(
        registry: Arc<CollectorRegistry>,
        catalog: Arc<MetricCatalog>,
        policies: Arc<dyn PolicyStore>,
    ) -> Self {
        Self {
            registry,
            catalog,
            policies,
            subscriptions: SubscriptionTable::new(),
        }
    }

    /// Metric catalogue used for validation.
    pub fn catalog(&self) -> &MetricCatalog {
        &self.catalog
    }

    /// Collector registry.
    pub fn registry(&self) -> &CollectorRegistry {
        &self.registry
    }

    /// Subscribe a term on a set of devices.
    ///
    /// Every metric is checked against the catalogue before anything is
    /// subscribed. Collector resolution failures fall back to the no-op
    /// collector and collector subscribe failures are logged.
    pub async fn subscribe_term(
        &self,
        term: &str,
        agreement_id: &AgreementId,
        bindings: &[MetricBinding],
        device_ids: &[DeviceId],
    ) -> Result<()> {
        if device_ids.is_empty() {
            return Err(Error::Validation(format!(
                "term {} of agreement {} has no device to subscribe on",
                term, agreement_id
            )));
        }
        for binding in bindings {
            if !self.catalog.contains(&binding.metric) {
                return Err(Error::Validation(format!(
                    "term {} of agreement {} uses unknown metric {}",
                    term, agreement_id, binding.metric
                )));
            }
        }

        let holder = TermKey::new(agreement_id, term);
        for device in device_ids {
            for binding in bindings {
                let key = SubscriptionKey::new(device, &binding.metric);
                let Some(collector) = self
                    .subscriptions
                    .attach(&key, &holder, || self.resolve(device, &binding.metric))
                else {
                    debug!("{} already holds {}", holder, key);
                    continue;
                };

                debug!("{}: subscribing {} for {}", collector.name(), key, holder);
                if let Err(e) = collector
                    .subscribe(SubscriptionRequest::new(device, binding))
                    .await
                {
                    error!(
                        "{}: subscribing {} for {} failed: {}",
                        collector.name(),
                        key,
                        holder,
                        e
                    );
                }
            }
        }
        Ok(())
    }

    /// Unsubscribe a term from a set of devices. Pairs the term does not
    /// hold are skipped.
    pub async fn unsubscribe_term(
        &self,
        term: &str,
        agreement_id: &AgreementId,
        bindings: &[MetricBinding],
        device_ids: &[DeviceId],
    ) -> Result<()> {
        let holder = TermKey::new(agreement_id, term);
        for device in device_ids {
            for binding in bindings {
                let key = SubscriptionKey::new(device, &binding.metric);
                match self.subscriptions.detach(&key, &holder) {
                    Detach::NotHeld => debug!("{} does not hold {}", holder, key),
                    Detach::Released(collector) => {
                        debug!("{} released {}", holder, key);
                        if let Err(e) = collector
                            .release(SubscriptionRequest::new(device, binding))
                            .await
                        {
                            warn!("{}: releasing {} for {} failed: {}", collector.name(), key, holder, e);
                        }
                    }
                    Detach::TornDown(collector) => {
                        debug!("{}: un-subscribing {}", collector.name(), key);
                        if let Err(e) = collector.unsubscribe(device, &binding.metric).await {
                            warn!("{}: un-subscribing {} failed: {}", collector.name(), key, e);
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Read every metric of a term on one device.
    ///
    /// Reads run concurrently; failed reads are logged and left out of the
    /// result.
    pub async fn pull_term(
        &self,
        term: &str,
        agreement_id: &AgreementId,
        bindings: &[MetricBinding],
        device_id: &DeviceId,
    ) -> BTreeMap<String, Value> {
        let reads = bindings.iter().map(|binding| {
            let key = SubscriptionKey::new(device_id, &binding.metric);
            let collector = self
                .subscriptions
                .collector(&key)
                .unwrap_or_else(|| self.resolve(device_id, &binding.metric));
            async move {
                let result = collector.pull(device_id, &binding.metric).await;
                (binding.metric.clone(), result)
            }
        });

        let mut readings = BTreeMap::new();
        for (metric, result) in join_all(reads).await {
            match result {
                Ok(value) => {
                    readings.insert(metric, value);
                }
                Err(e) => debug!(
                    "Pulling {}#{} for {}/{} failed: {}",
                    device_id, metric, agreement_id, term, e
                ),
            }
        }
        readings
    }

    /// Route a reading to every term holding its (device, metric) pair.
    ///
    /// The other metrics of each term are pulled for the same device so
    /// the term can be evaluated as a whole.
    pub async fn notify(&self, notification: MetricNotification) -> Vec<ReasoningRequest> {
        let key = SubscriptionKey::new(&notification.device, &notification.metric);
        let holders = self.subscriptions.holders(&key);
        if holders.is_empty() {
            warn!(
                "No agreement references {}, dropping reading {}",
                key, notification.value
            );
            return Vec::new();
        }

        let mut requests = Vec::with_capacity(holders.len());
        for holder in holders {
            let policy = match self.policies.get(&holder.agreement_id).await {
                Ok(Some(policy)) => policy,
                Ok(None) => {
                    debug!("No policy stored yet for {}", holder.agreement_id);
                    continue;
                }
                Err(e) => {
                    warn!("Loading policy of {} failed: {}", holder.agreement_id, e);
                    continue;
                }
            };
            let term = match policy.term(&holder.term) {
                Ok(term) => term,
                Err(e) => {
                    warn!("{}", e);
                    continue;
                }
            };

            let bindings = term.bindings();
            let others: Vec<MetricBinding> = bindings
                .iter()
                .filter(|b| b.metric != notification.metric)
                .cloned()
                .collect();
            let mut readings = if others.is_empty() {
                BTreeMap::new()
            } else {
                self.pull_term(&holder.term, &holder.agreement_id, &others, &notification.device)
                    .await
            };
            readings.insert(notification.metric.clone(), notification.value.clone());

            requests.push(ReasoningRequest {
                device: notification.device.clone(),
                bindings,
                readings,
                remedy: term.remedy.clone(),
                key: holder,
            });
        }
        requests
    }

    /// Whether a (device, metric) pair is subscribed.
    pub fn is_subscribed(&self, device: &DeviceId, metric: &str) -> bool {
        self.subscriptions
            .contains(&SubscriptionKey::new(device, metric))
    }

    /// Terms holding a (device, metric) pair.
    pub fn holders(&self, device: &DeviceId, metric: &str) -> Vec<TermKey> {
        self.subscriptions
            .holders(&SubscriptionKey::new(device, metric))
    }

    /// Number of live subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Stop every collector.
    pub async fn shutdown(&self) {
        for collector in self.registry.collectors() {
            if let Err(e) = collector.shutdown().await {
                warn!("{}: shutdown failed: {}", collector.name(), e);
            }
        }
        info!(
            "Aggregator stopped with {} subscriptions",
            self.subscriptions.len()
        );
    }

    fn resolve(&self, device: &DeviceId, metric: &str) -> Arc<dyn Collector> {
        match self.registry.resolve(device, metric) {
            Ok(collector) => collector,
            Err(e) => {
                warn!("{}, using the {} collector", e, self.registry.fallback().name());
                self.registry.fallback()
            }
        }
    }
}
