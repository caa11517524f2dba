/// Store Error Module
///
/// This module defines the error taxonomy shared by the connection handle,
/// the transaction executor and the query engine. Every failure is returned
/// as a value; nothing in the engine panics on a store error.
use crate::core::db::operation::Command;
use rusqlite::ErrorCode;
use thiserror::Error;

/// Comprehensive error type for the store.
///
/// The variants group into the families callers usually branch on:
/// - connection state (`NotOpen`, `AlreadyOpen`, `Connection`)
/// - schema reconciliation (`Schema`)
/// - constraint violations on create/upsert (`Constraint`)
/// - query building and execution (`Query`)
/// - batch execution (`Operation`, `Transaction`, `CommitIndeterminate`)
#[derive(Error, Debug)]
pub enum StoreError {
    /// The handle has no live session
    #[error("Connection error: session is not open")]
    NotOpen,

    /// `open` was called on a handle that already holds a session
    #[error("Connection error: session is already open")]
    AlreadyOpen,

    /// The driver could not open or close the session
    #[error("Connection error: {0}")]
    Connection(#[source] rusqlite::Error),

    /// Table creation or column reconciliation failed
    #[error("Schema error on table `{table}`: {source}")]
    Schema {
        table: String,
        #[source]
        source: rusqlite::Error,
    },

    /// Uniqueness, NOT NULL or foreign-key violation
    #[error("Constraint error: {0}")]
    Constraint(#[source] rusqlite::Error),

    /// Malformed condition, rejected operation or failed retrieval
    #[error("Query error: {0}")]
    Query(String),

    /// One operation of a batch failed; the batch was rolled back
    #[error("Transaction error: operation {index} ({command}) failed: {source}")]
    Operation {
        index: usize,
        command: Command,
        #[source]
        source: Box<StoreError>,
    },

    /// The transaction could not be started
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Every operation succeeded but COMMIT failed. The final state of the
    /// store is unknown and must be re-read by the caller.
    #[error("Transaction error: commit failed, final state is indeterminate: {0}")]
    CommitIndeterminate(#[source] rusqlite::Error),

    /// The running statement was interrupted through a `QueryCanceller`
    #[error("Operation cancelled")]
    Cancelled,

    /// Configuration loading and validation errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// File system and I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Driver errors that fit no narrower family
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
}

impl StoreError {
    /// Classifies a driver error raised while executing a statement.
    pub(crate) fn from_driver(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(failure, _)
                if failure.code == ErrorCode::ConstraintViolation =>
            {
                StoreError::Constraint(err)
            }
            rusqlite::Error::SqliteFailure(failure, _)
                if failure.code == ErrorCode::OperationInterrupted =>
            {
                StoreError::Cancelled
            }
            _ => StoreError::Database(err),
        }
    }

    /// Classifies a driver error raised on the read path, keeping the
    /// context of the step that failed.
    pub(crate) fn query(context: &str, err: rusqlite::Error) -> Self {
        match StoreError::from_driver(err) {
            StoreError::Cancelled => StoreError::Cancelled,
            other => StoreError::Query(format!("{}: {}", context, other)),
        }
    }

    /// Returns the underlying error, looking through the batch annotation.
    pub fn root(&self) -> &StoreError {
        match self {
            StoreError::Operation { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn is_constraint(&self) -> bool {
        matches!(self.root(), StoreError::Constraint(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.root(), StoreError::Cancelled)
    }

    /// Index of the failing operation when this error came out of a batch.
    pub fn operation_index(&self) -> Option<usize> {
        match self {
            StoreError::Operation { index, .. } => Some(*index),
            _ => None,
        }
    }
}

/// Type alias for Result to use StoreError as the error type.
pub type Result<T> = std::result::Result<T, StoreError>;
