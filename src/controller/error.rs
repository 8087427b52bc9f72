//! Error types for the controller.
//!
//! Defines custom error types with classification for retry behavior.

use std::time::Duration;
use thiserror::Error;

/// Error type for controller operations
#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// Object absent from the store
    #[error("Not found: {0}")]
    NotFound(String),

    /// Optimistic concurrency conflict (resource version mismatch)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Object already exists on create
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Validation error in resource spec
    #[error("Validation error: {0}")]
    Validation(String),

    /// Transient error that should be retried
    #[error("Transient error: {0}")]
    Transient(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Some units of a concurrent fan-out failed; reported as a whole
    #[error("{operation}: {failed} of {total} updates failed")]
    Aggregate {
        operation: String,
        failed: usize,
        total: usize,
    },
}

impl Error {
    /// Check if this error indicates a not-found condition
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
            || matches!(self, Error::Kube(kube::Error::Api(e)) if e.code == 404)
    }

    /// Check if this error is an optimistic concurrency conflict
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict(_))
            || matches!(self, Error::Kube(kube::Error::Api(e)) if e.code == 409 && e.reason == "Conflict")
    }

    /// Check if this error should be retried
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube(e) => {
                // Retry on network errors, rate limiting, and server errors
                matches!(
                    e,
                    kube::Error::Api(api_err) if api_err.code >= 500 || api_err.code == 429 || api_err.code == 409
                ) || matches!(e, kube::Error::Service(_))
            }
            Error::Transient(_) | Error::Conflict(_) | Error::Aggregate { .. } => true,
            Error::NotFound(_) | Error::AlreadyExists(_) => true,
            Error::Validation(_) => false,
            Error::Serialization(_) => false,
        }
    }

    /// Get the recommended requeue duration for this error
    pub fn requeue_after(&self) -> Duration {
        if self.is_conflict() {
            // Another writer raced us; a fresh read usually succeeds immediately
            Duration::from_secs(1)
        } else if self.is_retryable() {
            Duration::from_secs(15)
        } else {
            Duration::from_secs(300)
        }
    }
}

/// Result type alias for controller operations
pub type Result<T> = std::result::Result<T, Error>;
