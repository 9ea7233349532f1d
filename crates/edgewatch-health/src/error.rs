//! Health checker error types.

use thiserror::Error;

use edgewatch_state::{ClusterId, StateError};

/// Errors that abort a health-check run before any probing starts.
#[derive(Debug, Error)]
pub enum HealthError {
    #[error("can not find enabled cluster with id '{0}'")]
    ClusterNotFound(ClusterId),

    #[error("health check policy is not configured for cluster '{0}'")]
    PolicyMissing(ClusterId),

    #[error("invalid health check policy: {0}")]
    PolicyMalformed(String),

    #[error("tls setup failed: {0}")]
    Tls(String),

    #[error("state store error: {0}")]
    State(#[from] StateError),
}

pub type HealthResult<T> = Result<T, HealthError>;

/// Errors raised by a downstream transition handler.
#[derive(Debug, Error)]
pub enum PropagationError {
    #[error("state store error: {0}")]
    State(#[from] StateError),

    #[error("handler unavailable: {0}")]
    Unavailable(String),
}

pub type PropagationResult<T> = Result<T, PropagationError>;
