//! Error types for the Soomi engine

use thiserror::Error;
use uuid::Uuid;

/// Errors that can surface from the engine.
///
/// The live pipeline never terminates a session because of one of these; they are
/// returned to callers that can act on them (config loading, event bookkeeping,
/// persistence collaborators).
#[derive(Debug, Error)]
pub enum SoomiError {
    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Intervention event not found: {0}")]
    EventNotFound(Uuid),

    #[error("Persistence unavailable: {0}")]
    PersistenceError(String),

    #[error("Logging initialization failed: {0}")]
    LoggingError(String),
}

/// Convenience alias used across the crate
pub type Result<T> = std::result::Result<T, SoomiError>;
