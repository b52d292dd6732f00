//! Structured error types for coursectl-store.
//!
//! Library callers get a `thiserror` enum; the CLI wraps it with `anyhow`.

use thiserror::Error;

use crate::bootstrap::ProvisionStep;

/// Main error type for store operations
#[derive(Error, Debug)]
pub enum StoreError {
    /// Required configuration missing or malformed (raised before any I/O)
    #[error("Configuration error: {reason}")]
    Config { reason: String },

    /// A bootstrap step failed; remaining steps were not run
    #[error("Provisioning failed at step '{step}': {source}")]
    Provision {
        step: ProvisionStep,
        #[source]
        source: sqlx::Error,
    },

    /// No pooled connection became available within the acquire timeout
    #[error("Timed out waiting for a pooled connection")]
    PoolTimeout,

    /// Pool could not be opened or a connection could not be acquired
    #[error("Connection pool error: {source}")]
    Pool {
        #[source]
        source: sqlx::Error,
    },

    /// Statement, commit or rollback failed inside a transaction
    #[error("Transaction failed during {operation}: {source}")]
    Transaction {
        operation: &'static str,
        #[source]
        source: sqlx::Error,
    },

    /// Term label does not match `NNN-S`
    #[error("Invalid term '{value}': expected three digits, a dash and semester 1 or 2")]
    InvalidTerm { value: String },

    /// A row in a batch failed shape validation
    #[error("Invalid row at index {index}: {reason}")]
    InvalidRow { index: usize, reason: String },

    /// The store was shut down; no further operations are accepted
    #[error("Store has been shut down")]
    ShutDown,
}

/// Result type alias for store operations
pub type Result<T> = std::result::Result<T, StoreError>;

impl StoreError {
    /// Create a config error
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }

    /// Create a provisioning error for the given step
    pub fn provision(step: ProvisionStep, source: sqlx::Error) -> Self {
        Self::Provision { step, source }
    }

    /// Create a transaction error, tagged with the operation that failed
    pub fn transaction(operation: &'static str, source: sqlx::Error) -> Self {
        Self::Transaction { operation, source }
    }

    /// Create an invalid row error
    pub fn invalid_row(index: usize, reason: impl Into<String>) -> Self {
        Self::InvalidRow {
            index,
            reason: reason.into(),
        }
    }

    /// Map an acquisition failure, keeping timeouts distinguishable
    pub fn acquire(source: sqlx::Error) -> Self {
        match source {
            sqlx::Error::PoolTimedOut => Self::PoolTimeout,
            other => Self::Pool { source: other },
        }
    }
}
