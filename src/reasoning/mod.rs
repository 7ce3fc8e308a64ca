//! Reasoning Module
//!
//! The enforcement loop:
//! - Engine configuration
//! - Federated device resolution
//! - Periodic reconciliation of agreements, policies and subscriptions
//! - The engine wiring it all together

pub mod config;
pub mod engine;
pub mod federation;
pub mod reconciler;

pub use config::EngineConfig;
pub use engine::ReasoningEngine;
pub use federation::{resolve_devices, ResolvedDevices};
pub use reconciler::{Reconciler, TickReport};
