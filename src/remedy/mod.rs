//! Remedy Module
//!
//! Enforcement of breached terms:
//! - Remedy events and the sinks they are published to
//! - The per-term remedy workflow with exclusive ownership

pub mod event;
pub mod sink;
pub mod workflow;

pub use event::RemedyEvent;
pub use sink::{ChannelRemedySink, LogRemedySink, RemedySink};
pub use workflow::{Breach, RemedyWorkflow};
