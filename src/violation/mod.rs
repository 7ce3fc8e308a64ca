//! Violation Module
//!
//! Violation entities opened on breach and removed on recovery.

pub mod entity;
pub mod store;

pub use entity::{Violation, ViolationId};
pub use store::{InMemoryViolationStore, ViolationStore};
