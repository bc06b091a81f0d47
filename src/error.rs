//! Error Types
//!
//! Typed failures surfaced by the engine's public operations and by
//! its collaborators. Execution-time failures inside dispatched work never
//! travel through these types to a caller; they are logged and persisted.

use thiserror::Error;

/// Failures raised by a [`Store`](crate::store::Store) implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid stored data: {0}")]
    Invalid(String),
}

/// Failures raised by a [`Notifier`](crate::notify::Notifier).
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("No recipients given")]
    NoRecipients,

    #[error("Mail transport failed: {0}")]
    Transport(String),
}

/// Errors returned by engine construction and flow-management operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A required setting is missing or invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Storage could not be opened or the schema could not be created.
    #[error("Infrastructure error: {0}")]
    Infrastructure(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Notify(#[from] NotifyError),

    #[error("Flow {0} does not exist")]
    FlowNotFound(i64),

    #[error("Flow execution {0} does not exist")]
    ExecutionNotFound(i64),

    /// A manual trigger for this flow is already waiting in the queue.
    #[error("Flow {0} already has an execution waiting to be dispatched")]
    DuplicateExecution(i64),

    #[error("Flow execution {0} is not running")]
    NotRunning(i64),

    #[error("Flow {0} has no cron expression to schedule")]
    NotSchedulable(i64),

    #[error("No engine registered with id '{0}'")]
    EngineNotFound(String),

    #[error("Engine is shutting down")]
    ShuttingDown,
}

pub type Result<T, E = EngineError> = std::result::Result<T, E>;
