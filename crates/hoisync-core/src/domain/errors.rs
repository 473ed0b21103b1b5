//! Domain error types
//!
//! Validation failures, invalid state transitions and malformed identifiers.

use thiserror::Error;

/// Errors that can occur in domain operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Stable item identifier is empty or malformed
    #[error("Invalid stable id: {0}")]
    InvalidStableId(String),

    /// Server host or api key cannot be used to build requests
    #[error("Invalid server endpoint: {0}")]
    InvalidEndpoint(String),

    /// Invalid state transition attempt
    #[error("Invalid state transition from {from} to {to}")]
    InvalidState {
        /// The current state
        from: String,
        /// The attempted target state
        to: String,
    },

    /// Generic validation failure
    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    /// ID parsing error
    #[error("Invalid ID format: {0}")]
    InvalidId(String),
}
