//! Error types for the Cadence service.

use thiserror::Error;

/// Errors raised while wiring up or provisioning the service.
#[derive(Debug, Error)]
pub enum CadenceError {
    /// Storage error.
    #[error("store error: {0}")]
    Store(#[from] cadence_scheduler::StoreError),

    /// HTTP client construction failed.
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    /// Command-line input was inconsistent.
    #[error("invalid input: {0}")]
    Invalid(String),
}
