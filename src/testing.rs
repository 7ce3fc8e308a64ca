//! Test doubles shared by unit tests.

use crate::collector::{Collector, SubscriptionRequest};
use crate::core::{DeviceId, Error, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Collector that counts calls and serves readings set by the test.
pub struct RecordingCollector {
    name: String,
    readings: DashMap<(DeviceId, String), Value>,
    subscribes: AtomicUsize,
    unsubscribes: AtomicUsize,
    releases: AtomicUsize,
}

impl RecordingCollector {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            readings: DashMap::new(),
            subscribes: AtomicUsize::new(0),
            unsubscribes: AtomicUsize::new(0),
            releases: AtomicUsize::new(0),
        }
    }

    pub fn set(&self, device: &str, metric: &str, value: Value) {
        self.readings
            .insert((DeviceId::new(device), metric.to_string()), value);
    }

    pub fn subscribe_count(&self) -> usize {
        self.subscribes.load(Ordering::SeqCst)
    }

    pub fn unsubscribe_count(&self) -> usize {
        self.unsubscribes.load(Ordering::SeqCst)
    }

    pub fn release_count(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.subscribe_count() + self.unsubscribe_count() + self.release_count()
    }
}

#[async_trait]
impl Collector for RecordingCollector {
    fn name(&self) -> &str {
        &self.name
    }

    async fn subscribe(&self, _request: SubscriptionRequest) -> Result<()> {
        self.subscribes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn release(&self, _request: SubscriptionRequest) -> Result<()> {
        self.releases.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn unsubscribe(&self, _device: &DeviceId, _metric: &str) -> Result<()> {
        self.unsubscribes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn pull(&self, device: &DeviceId, metric: &str) -> Result<Value> {
        self.readings
            .get(&(device.clone(), metric.to_string()))
            .map(|v| v.value().clone())
            .ok_or_else(|| Error::Collector(format!("no reading of {} on {}", metric, device)))
    }
}
