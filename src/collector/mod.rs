//! Collector Module
//!
//! Pluggable adapters to monitoring backends:
//! - The `Collector` capability and the notifier used for pushed readings
//! - An explicit name-based registry with device bindings
//! - A no-op fallback and a polling collector

pub mod interface;
pub mod noop;
pub mod polling;
pub mod registry;
pub mod source;

pub use interface::{Collector, MetricNotification, Notifier, SubscriptionRequest};
pub use noop::{NoopCollector, NOOP_COLLECTOR};
pub use polling::PollingCollector;
pub use registry::{CollectorRegistry, DeviceBindings, MonitoringSystem};
pub use source::{InMemoryMetricSource, MetricSource};
