//! Error types for SLA Guard.

use crate::evaluator::EvaluationError;
use thiserror::Error;

/// Result type alias for SLA Guard operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in SLA Guard operations.
#[derive(Error, Debug)]
pub enum Error {
    // Setup errors, surfaced synchronously to the caller
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Unknown metric: {0}")]
    UnknownMetric(String),

    // Collector errors
    #[error("Collector resolution failed: {0}")]
    Resolution(String),

    #[error("Collector error: {0}")]
    Collector(String),

    // Evaluation errors
    #[error("Evaluation failed: {0}")]
    Evaluation(#[from] EvaluationError),

    // Remedy errors
    #[error("Remedy publish failed: {0}")]
    RemedyPublish(String),

    #[error("Term {0} is already under remedy")]
    ConcurrencyConflict(String),

    // Store errors
    #[error("Agreement not found: {0}")]
    AgreementNotFound(String),

    #[error("Term {term} not found in agreement {agreement_id}")]
    TermNotFound { agreement_id: String, term: String },

    #[error("Policy not found: {0}")]
    PolicyNotFound(String),

    #[error("Violation not found: {0}")]
    ViolationNotFound(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Serialization errors
    #[error("Serialization error: {0}")]
    SerializationError(String),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the error belongs to the setup validation class.
    pub fn is_validation(&self) -> bool {
        matches!(self, Error::Validation(_) | Error::UnknownMetric(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::SerializationError(err.to_string())
    }
}
