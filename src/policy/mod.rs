//! Policy Module
//!
//! Per-agreement policy records and their persistence.

pub mod record;
pub mod store;

pub use record::{MetricThreshold, Policy, TermPolicy};
pub use store::{InMemoryPolicyStore, PolicyStore};
