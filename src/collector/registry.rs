//! Collector registry.
//!
//! Maps capability names to collector instances and records which
//! monitoring systems serve which devices and metrics.

use crate::collector::interface::Collector;
use crate::collector::noop::NoopCollector;
use crate::core::{DeviceId, Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;

/// A monitoring system and the metrics it can serve.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MonitoringSystem {
    /// System name
    pub name: String,
    /// Name of the collector that talks to it
    pub collector: String,
    /// Metrics it serves
    #[serde(default)]
    pub metrics: BTreeSet<String>,
}

impl MonitoringSystem {
    /// Create a new monitoring system.
    pub fn new(name: &str, collector: &str) -> Self {
        Self {
            name: name.to_string(),
            collector: collector.to_string(),
            metrics: BTreeSet::new(),
        }
    }

    /// Add a served metric.
    pub fn with_metric(mut self, metric: &str) -> Self {
        self.metrics.insert(metric.to_string());
        self
    }
}

/// Device to monitoring-system bindings, as loaded from configuration.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceBindings {
    /// Monitoring systems
    #[serde(default)]
    pub systems: Vec<MonitoringSystem>,
    /// Devices and the systems monitoring them
    #[serde(default)]
    pub devices: HashMap<DeviceId, Vec<String>>,
}

impl DeviceBindings {
    /// Load bindings from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }
}

/// Registry of collectors.
pub struct CollectorRegistry {
    /// Registered collectors
    collectors: HashMap<String, Arc<dyn Collector>>,
    /// Monitoring systems by name
    systems: HashMap<String, MonitoringSystem>,
    /// Monitoring systems of each device
    devices: HashMap<DeviceId, Vec<String>>,
    /// Collector used when resolution fails
    fallback: Arc<dyn Collector>,
}

impl CollectorRegistry {
    /// Create a registry holding only the no-op fallback collector.
    pub fn new() -> Self {
        let fallback: Arc<dyn Collector> = Arc::new(NoopCollector::new());
        let mut collectors = HashMap::new();
        collectors.insert(fallback.name().to_string(), Arc::clone(&fallback));

        Self {
            collectors,
            systems: HashMap::new(),
            devices: HashMap::new(),
            fallback,
        }
    }

    /// Register a collector under its own name.
    pub fn register(&mut self, collector: Arc<dyn Collector>) -> Result<()> {
        let name = collector.name().to_string();
        if self.collectors.contains_key(&name) {
            return Err(Error::Config(format!(
                "Collector {} is already registered",
                name
            )));
        }
        self.collectors.insert(name, collector);
        Ok(())
    }

    /// Unregister a collector.
    pub fn unregister(&mut self, name: &str) -> Result<()> {
        if name == self.fallback.name() {
            return Err(Error::Config(
                "the fallback collector cannot be unregistered".to_string(),
            ));
        }
        self.collectors
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| Error::Resolution(format!("Collector {} not found", name)))
    }

    /// Add or replace a monitoring system.
    pub fn add_system(&mut self, system: MonitoringSystem) {
        self.systems.insert(system.name.clone(), system);
    }

    /// Bind a device to the monitoring systems that observe it.
    pub fn bind_device(&mut self, device: &str, systems: &[&str]) {
        self.devices.insert(
            DeviceId::new(device),
            systems.iter().map(|s| s.to_string()).collect(),
        );
    }

    /// Apply loaded bindings.
    pub fn apply_bindings(&mut self, bindings: DeviceBindings) {
        for system in bindings.systems {
            self.add_system(system);
        }
        self.devices.extend(bindings.devices);
    }

    /// Get a collector by name.
    pub fn get(&self, name: &str) -> Result<Arc<dyn Collector>> {
        self.collectors
            .get(name)
            .cloned()
            .ok_or_else(|| Error::Resolution(format!("Collector {} not found", name)))
    }

    /// Resolve the collector serving a metric of a device.
    pub fn resolve(&self, device: &DeviceId, metric: &str) -> Result<Arc<dyn Collector>> {
        let systems = self.devices.get(device).ok_or_else(|| {
            Error::Resolution(format!("No monitoring records for device {}", device))
        })?;

        for name in systems {
            let system = self.systems.get(name).ok_or_else(|| {
                Error::Resolution(format!(
                    "Monitoring system {} of device {} is not registered",
                    name, device
                ))
            })?;
            if system.metrics.contains(metric) {
                return self.get(&system.collector);
            }
        }

        Err(Error::Resolution(format!(
            "Metric {} is not served by any monitoring system of device {}",
            metric, device
        )))
    }

    /// The fallback collector.
    pub fn fallback(&self) -> Arc<dyn Collector> {
        Arc::clone(&self.fallback)
    }

    /// All registered collectors.
    pub fn collectors(&self) -> impl Iterator<Item = &Arc<dyn Collector>> {
        self.collectors.values()
    }

    /// Registered collector names, sorted.
    pub fn list_collectors(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.collectors.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Number of registered collectors.
    pub fn collector_count(&self) -> usize {
        self.collectors.len()
    }
}

impl Default for CollectorRegistry {
    fn default() -> Self {
        Self::new()
    }
}
