//! Error kinds surfaced by the decision engine.
//!
//! Analyzer failures never appear here: the aggregator absorbs them and
//! degrades to whatever analyzers did answer.

use thiserror::Error;

/// Root error type for moderation decisions and admin operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModerationError {
    /// The strike/whitelist store could not be reached or failed mid-update.
    /// Fatal to the single evaluation only; callers decide how to fail safe.
    #[error("ledger unavailable: {0}")]
    LedgerUnavailable(String),

    /// Rejected input (identifiers, award amounts, expiry in the past).
    /// Nothing has been applied when this is returned.
    #[error("validation error: {0}")]
    Validation(String),

    /// Invalid or inconsistent configuration, detected at construction.
    #[error("config error: {0}")]
    Config(String),
}

pub type ModerationResult<T> = Result<T, ModerationError>;

/// Failure reported by a persistence backend.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("corrupt record for {key}: {detail}")]
    Corrupt { key: String, detail: String },
}

impl From<StoreError> for ModerationError {
    fn from(err: StoreError) -> Self {
        ModerationError::LedgerUnavailable(err.to_string())
    }
}
