//! # SLA Guard - continuous SLO verification and remedy enforcement
//!
//! Watches live infrastructure metrics against the objectives of signed
//! agreements and drives breached terms through remedy and recovery:
//! - **Collectors**: pluggable adapters to monitoring backends
//! - **Evaluator**: max/min/margin/enum limiters and term conjunction
//! - **Aggregator**: reference-counted subscriptions and reading routing
//! - **Reasoning**: periodic reconciliation of agreements and devices
//! - **Remedy**: per-term breach, violation and recovery workflow
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use slaguard::agreement::InMemoryAgreementStore;
//! use slaguard::collector::{CollectorRegistry, Notifier};
//! use slaguard::evaluator::MetricCatalog;
//! use slaguard::policy::InMemoryPolicyStore;
//! use slaguard::reasoning::{EngineConfig, ReasoningEngine};
//! use slaguard::remedy::LogRemedySink;
//! use slaguard::violation::InMemoryViolationStore;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> slaguard::Result<()> {
//!     let (_notifier, notifications) = Notifier::channel();
//!     let engine = ReasoningEngine::new(
//!         EngineConfig::default(),
//!         Arc::new(MetricCatalog::builtin()),
//!         Arc::new(InMemoryAgreementStore::from_file("agreements.json")?),
//!         Arc::new(InMemoryPolicyStore::new()),
//!         Arc::new(InMemoryViolationStore::new()),
//!         Arc::new(CollectorRegistry::new()),
//!         Arc::new(LogRemedySink::new()),
//!         notifications,
//!     );
//!
//!     let (_stop, shutdown) = tokio::sync::watch::channel(false);
//!     engine.run(shutdown).await
//! }
//! ```

pub mod aggregator;
pub mod agreement;
pub mod collector;
pub mod core;
pub mod evaluator;
pub mod monitoring;
pub mod policy;
pub mod reasoning;
pub mod remedy;
pub mod violation;

#[cfg(test)]
pub(crate) mod testing;

pub use core::error::{Error, Result};
