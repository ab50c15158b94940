//! Error types for tasktrail.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("task record not found: {0}")]
    NotFound(String),

    #[error("invalid task status: {0}")]
    InvalidStatus(String),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("payload serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("broker error: {0}")]
    Broker(String),

    #[error("no handler registered for task type {0}")]
    HandlerNotFound(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Error returned by task handlers. Opaque to this crate; only its
/// message is recorded.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result returned by task handlers.
pub type HandlerResult = std::result::Result<(), HandlerError>;
