//! Engine configuration.

use crate::core::{Error, Result};
use crate::evaluator::MetricCatalog;
use crate::monitoring::LogConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Reasoning engine configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Seconds between reconciliation ticks (0 = run once)
    pub refresh_interval_secs: u64,
    /// Seconds between recovery polls of a term under remedy
    pub remedy_poll_interval_secs: u64,
    /// Seconds between reads of a polled subscription
    pub collector_poll_interval_secs: u64,
    /// Pull and evaluate every tracked term at the end of each tick
    pub evaluate_on_tick: bool,
    /// Metric catalogue file; the built-in catalogue when unset
    pub metrics_catalog: Option<PathBuf>,
    /// Device and monitoring-system bindings file
    pub device_bindings: Option<PathBuf>,
    /// Logging
    pub log: LogConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: 15,
            remedy_poll_interval_secs: 15,
            collector_poll_interval_secs: 15,
            evaluate_on_tick: false,
            metrics_catalog: None,
            device_bindings: None,
            log: LogConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load a configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&raw).map_err(|e| {
            Error::Config(format!("invalid config {}: {}", path.as_ref().display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check intervals.
    pub fn validate(&self) -> Result<()> {
        if self.remedy_poll_interval_secs == 0 {
            return Err(Error::Config(
                "remedy_poll_interval_secs must be positive".to_string(),
            ));
        }
        if self.collector_poll_interval_secs == 0 {
            return Err(Error::Config(
                "collector_poll_interval_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Set the refresh interval.
    pub fn with_refresh_interval(mut self, secs: u64) -> Self {
        self.refresh_interval_secs = secs;
        self
    }

    /// Set the remedy poll interval.
    pub fn with_remedy_poll_interval(mut self, secs: u64) -> Self {
        self.remedy_poll_interval_secs = secs;
        self
    }

    /// Set the collector poll interval.
    pub fn with_collector_poll_interval(mut self, secs: u64) -> Self {
        self.collector_poll_interval_secs = secs;
        self
    }

    /// Enable evaluation of every tracked term on each tick.
    pub fn with_evaluate_on_tick(mut self, enabled: bool) -> Self {
        self.evaluate_on_tick = enabled;
        self
    }

    /// Set the metric catalogue file.
    pub fn with_metrics_catalog(mut self, path: impl Into<PathBuf>) -> Self {
        self.metrics_catalog = Some(path.into());
        self
    }

    /// Tick interval, `None` to run a single tick.
    pub fn refresh_interval(&self) -> Option<Duration> {
        match self.refresh_interval_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    /// Recovery poll interval.
    pub fn remedy_poll_interval(&self) -> Duration {
        Duration::from_secs(self.remedy_poll_interval_secs)
    }

    /// Collector poll interval.
    pub fn collector_poll_interval(&self) -> Duration {
        Duration::from_secs(self.collector_poll_interval_secs)
    }

    /// Load the configured metric catalogue.
    pub fn load_catalog(&self) -> Result<MetricCatalog> {
        match &self.metrics_catalog {
            Some(path) => MetricCatalog::from_file(path),
            None => Ok(MetricCatalog::builtin()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.refresh_interval(), Some(Duration::from_secs(15)));
        assert_eq!(config.remedy_poll_interval(), Duration::from_secs(15));
        assert!(!config.evaluate_on_tick);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_run_once() {
        let config = EngineConfig::default().with_refresh_interval(0);
        assert_eq!(config.refresh_interval(), None);
    }

    #[test]
    fn test_partial_json() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"refresh_interval_secs": 5, "log": {"level": "debug"}}"#).unwrap();
        assert_eq!(config.refresh_interval_secs, 5);
        assert_eq!(config.remedy_poll_interval_secs, 15);
        assert_eq!(config.log.level, crate::monitoring::LogLevel::Debug);
    }

    #[test]
    fn test_zero_poll_interval_rejected() {
        let config = EngineConfig::default().with_remedy_poll_interval(0);
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_builtin_catalog_when_unset() {
        let catalog = EngineConfig::default().load_catalog().unwrap();
        assert!(catalog.contains("uptime"));
    }

    #[test]
    fn test_missing_catalog_file() {
        let config = EngineConfig::default().with_metrics_catalog("/nonexistent/metrics.json");
        assert!(config.load_catalog().is_err());
    }
}
