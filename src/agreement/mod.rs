//! Agreement Module
//!
//! The agreement data model and the store it is read from:
//! - Agreements, terms and metric bindings
//! - Term and agreement lifecycle states
//! - The `AgreementStore` seam to the external registry

pub mod model;
pub mod store;

pub use model::{
    Agreement, AgreementState, LinkTarget, MetricBinding, Term, TermKind, TermState,
};
pub use store::{AgreementStore, InMemoryAgreementStore};
