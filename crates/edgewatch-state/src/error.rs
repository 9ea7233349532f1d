//! Failures of the fleet state database.

use thiserror::Error;

pub type StateResult<T> = Result<T, StateError>;

/// redb and codec failures carry the underlying message as text so that
/// callers never depend on redb's error types.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("cannot open state database: {0}")]
    Open(String),

    #[error("state transaction failed: {0}")]
    Transaction(String),

    #[error("cannot open state table: {0}")]
    Table(String),

    #[error("state read failed: {0}")]
    Read(String),

    #[error("state write failed: {0}")]
    Write(String),

    #[error("cannot encode record: {0}")]
    Serialize(String),

    #[error("cannot decode stored record: {0}")]
    Deserialize(String),

    /// A read-modify-write targeted a record that does not exist.
    #[error("no record '{key}' in table '{table}'")]
    NotFound { table: String, key: String },
}
