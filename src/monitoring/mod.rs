//! Monitoring Module
//!
//! Observability for SLA Guard:
//! - Structured logging through `tracing`

pub mod logging;

pub use logging::{init_logging, LogConfig, LogFormat, LogLevel};
