//! Error types for the idempotency ledger.

use thiserror::Error;

/// Result type for ledger operations
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Errors that can occur while reading or writing the ledger.
///
/// `Unavailable` is the only runtime-visible failure mode: the consumer
/// runtime maps it to a transient handler failure so the offset commit is
/// blocked and the envelope is redelivered, never silently dropped.
#[derive(Error, Debug)]
pub enum LedgerError {
    /// Ledger store unreachable or query failed
    #[error("ledger unavailable: {0}")]
    Unavailable(#[source] anyhow::Error),

    /// Entry key validation failed (empty, too long)
    #[error("invalid ledger key: {0}")]
    InvalidKey(String),
}

impl From<sqlx::Error> for LedgerError {
    fn from(err: sqlx::Error) -> Self {
        LedgerError::Unavailable(err.into())
    }
}
