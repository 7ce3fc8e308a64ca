//! Aggregator Module
//!
//! Binds agreement terms to collector subscriptions:
//! - A reference-counted (device, metric) subscription table
//! - Term-level subscribe, unsubscribe and pull
//! - Routing of pushed readings to the terms that hold them

pub mod router;
pub mod subscription;

pub use router::{Aggregator, ReasoningRequest};
pub use subscription::{Detach, SubscriptionKey, SubscriptionTable};
