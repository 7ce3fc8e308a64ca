//! Subscription table.
//!
//! Each (device, metric) pair is subscribed once on its collector and kept
//! alive for as long as at least one term holds it.

use crate::collector::Collector;
use crate::core::{DeviceId, TermKey};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Key of a subscription.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionKey {
    /// Device
    pub device: DeviceId,
    /// Metric name
    pub metric: String,
}

impl SubscriptionKey {
    /// Create a new key.
    pub fn new(device: &DeviceId, metric: &str) -> Self {
        Self {
            device: device.clone(),
            metric: metric.to_string(),
        }
    }
}

impl std::fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.device, self.metric)
    }
}

/// A live subscription.
pub struct Subscription {
    /// Collector serving the pair
    pub collector: Arc<dyn Collector>,
    /// Terms requiring the pair
    pub holders: BTreeSet<TermKey>,
}

/// Outcome of detaching a holder.
pub enum Detach {
    /// The holder did not hold the subscription
    NotHeld,
    /// Other holders remain; the holder's trigger must be dropped
    Released(Arc<dyn Collector>),
    /// The last holder left; the collector must be unsubscribed
    TornDown(Arc<dyn Collector>),
}

/// Concurrent table of live subscriptions.
#[derive(Default)]
pub struct SubscriptionTable {
    entries: DashMap<SubscriptionKey, Subscription>,
}

impl SubscriptionTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Attach a holder, creating the subscription on first use.
    ///
    /// Returns the collector to subscribe when the holder is new, `None`
    /// when it already held the pair.
    pub fn attach<F>(&self, key: &SubscriptionKey, holder: &TermKey, resolve: F) -> Option<Arc<dyn Collector>>
    where
        F: FnOnce() -> Arc<dyn Collector>,
    {
        match self.entries.entry(key.clone()) {
            Entry::Occupied(mut entry) => {
                if entry.get_mut().holders.insert(holder.clone()) {
                    Some(Arc::clone(&entry.get().collector))
                } else {
                    None
                }
            }
            Entry::Vacant(entry) => {
                let collector = resolve();
                let mut holders = BTreeSet::new();
                holders.insert(holder.clone());
                entry.insert(Subscription {
                    collector: Arc::clone(&collector),
                    holders,
                });
                Some(collector)
            }
        }
    }

    /// Detach a holder, removing the subscription when none remain.
    pub fn detach(&self, key: &SubscriptionKey, holder: &TermKey) -> Detach {
        let Entry::Occupied(mut entry) = self.entries.entry(key.clone()) else {
            return Detach::NotHeld;
        };

        if !entry.get_mut().holders.remove(holder) {
            return Detach::NotHeld;
        }

        if entry.get().holders.is_empty() {
            Detach::TornDown(entry.remove().collector)
        } else {
            Detach::Released(Arc::clone(&entry.get().collector))
        }
    }

    /// Holders of a pair.
    pub fn holders(&self, key: &SubscriptionKey) -> Vec<TermKey> {
        self.entries
            .get(key)
            .map(|s| s.holders.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Collector serving a pair.
    pub fn collector(&self, key: &SubscriptionKey) -> Option<Arc<dyn Collector>> {
        self.entries.get(key).map(|s| Arc::clone(&s.collector))
    }

    /// Whether a pair is subscribed.
    pub fn contains(&self, key: &SubscriptionKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Subscribed pairs, sorted.
    pub fn keys(&self) -> Vec<SubscriptionKey> {
        let mut keys: Vec<SubscriptionKey> = self.entries.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    /// Number of live subscriptions.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
