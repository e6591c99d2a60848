//! Error kinds shared across the knowledge base, router, rule compiler and
//! manager (§7). Transport concerns are out of scope; these are plain result
//! values, never panics, reserved for invariant violations only.

use thiserror::Error;

/// Errors raised anywhere in the knowledge base core.
#[derive(Error, Debug)]
pub enum SkicError {
    #[error("unknown context: {0}")]
    UnknownContext(String),

    #[error("context already exists: {0}")]
    ContextExists(String),

    #[error("context has children: {0}")]
    ContextHasChildren(String),

    #[error("transaction already in progress")]
    TransactionInProgress,

    #[error("no transaction in progress")]
    NoTransaction,

    #[error("unknown rule: {0}")]
    UnknownRule(String),

    #[error("feature disabled: {0}")]
    Disabled(String),

    #[error("task timed out")]
    Timeout,

    #[error("backend I/O error: {0}")]
    BackendIoError(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("bincode error: {0}")]
    Bincode(#[from] bincode::Error),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type used throughout the crate.
pub type SkicResult<T> = Result<T, SkicError>;
