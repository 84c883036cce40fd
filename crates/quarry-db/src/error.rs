// crates/quarry-db/src/error.rs
// ============================================================================
// Module: Quarry Database Errors
// Description: Error taxonomy shared by pools, write queues, and backends.
// Purpose: Give callers distinguishable failure kinds for every database path.
// Dependencies: rusqlite, postgres, thiserror
// ============================================================================

//! ## Overview
//! Every fallible operation in `quarry-db` returns [`DatabaseError`]. Variants
//! carry owned strings so errors can cross the write-queue reply channel and
//! be replayed to later callers (a failed write connection is reported to
//! every queued job).

// ============================================================================
// SECTION: Imports
// ============================================================================

use postgres::error::SqlState;
use rusqlite::ErrorCode;
use thiserror::Error;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Database errors surfaced by `quarry-db`.
///
/// # Invariants
/// - `QueryInterrupted` is only produced for statements aborted by a time limit.
/// - Error messages never embed bound parameter values.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DatabaseError {
    /// Opening a native connection failed.
    #[error("connection to database {database} failed: {message}")]
    Connection {
        /// Database name the connection was opened for.
        database: String,
        /// Underlying open failure.
        message: String,
    },
    /// A read statement exceeded its time budget.
    #[error("query interrupted: {message}")]
    QueryInterrupted {
        /// Statement that was interrupted.
        sql: String,
        /// Engine message reported for the interruption.
        message: String,
    },
    /// A database name was never registered.
    #[error("unknown database: {0}")]
    UnknownDatabase(String),
    /// A write job failed outside the engine (for example it panicked).
    #[error("write job failed: {0}")]
    WriteJob(String),
    /// Engine error (syntax errors, constraint violations, busy files).
    #[error("database error: {message}")]
    Db {
        /// Extended engine result code when one is available.
        code: Option<i32>,
        /// Engine message.
        message: String,
    },
    /// A query expected to return a single value returned more.
    #[error("expected a single value, query returned {rows} rows of {columns} columns")]
    MultipleValues {
        /// Number of rows returned.
        rows: usize,
        /// Number of columns returned.
        columns: usize,
    },
    /// A write was attempted against an immutable database.
    #[error("database {0} is immutable")]
    Immutable(String),
    /// The backend does not support the requested capability.
    #[error("unsupported operation: {0}")]
    Unsupported(String),
    /// Invalid input or configuration.
    #[error("invalid database input: {0}")]
    Invalid(String),
    /// Filesystem error.
    #[error("database io error: {0}")]
    Io(String),
    /// The pool or write queue has been shut down.
    #[error("database closed: {0}")]
    Closed(String),
}

impl DatabaseError {
    /// Returns a stable machine-readable code for the error kind.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Connection {
                ..
            } => "CONNECTION_FAILED",
            Self::QueryInterrupted {
                ..
            } => "QUERY_INTERRUPTED",
            Self::UnknownDatabase(_) => "UNKNOWN_DATABASE",
            Self::WriteJob(_) => "WRITE_JOB_FAILED",
            Self::Db {
                ..
            } => "DATABASE_ERROR",
            Self::MultipleValues {
                ..
            } => "MULTIPLE_VALUES",
            Self::Immutable(_) => "DATABASE_IMMUTABLE",
            Self::Unsupported(_) => "UNSUPPORTED",
            Self::Invalid(_) => "INVALID_INPUT",
            Self::Io(_) => "IO_ERROR",
            Self::Closed(_) => "DATABASE_CLOSED",
        }
    }

    /// Returns true when the error reports a time-limit interruption.
    #[must_use]
    pub const fn is_interrupted(&self) -> bool {
        matches!(self, Self::QueryInterrupted { .. })
    }

    /// Returns true when the engine reported the handle itself unusable
    /// (corrupt or foreign file, I/O failure, file no longer openable).
    #[must_use]
    pub const fn is_fatal_engine_error(&self) -> bool {
        let Self::Db {
            code: Some(code),
            ..
        } = self
        else {
            return false;
        };
        matches!(
            *code & 0xff,
            rusqlite::ffi::SQLITE_CORRUPT
                | rusqlite::ffi::SQLITE_NOTADB
                | rusqlite::ffi::SQLITE_IOERR
                | rusqlite::ffi::SQLITE_CANTOPEN
        )
    }

    /// Builds a connection error for `database`.
    pub(crate) fn connection(database: &str, message: impl Into<String>) -> Self {
        Self::Connection {
            database: database.to_string(),
            message: message.into(),
        }
    }

    /// Converts an engine error raised while running `sql`.
    ///
    /// Interruptions become [`DatabaseError::QueryInterrupted`]; everything
    /// else keeps its engine code.
    pub(crate) fn from_sqlite(err: &rusqlite::Error, sql: &str) -> Self {
        if err.sqlite_error_code() == Some(ErrorCode::OperationInterrupted) {
            return Self::QueryInterrupted {
                sql: sql.to_string(),
                message: err.to_string(),
            };
        }
        Self::engine(err)
    }

    /// Maps an engine error to [`DatabaseError::Db`], keeping its extended code.
    fn engine(err: &rusqlite::Error) -> Self {
        Self::Db {
            code: err.sqlite_error().map(|error| error.extended_code),
            message: err.to_string(),
        }
    }

    /// Converts a PostgreSQL error raised while running `sql`.
    pub(crate) fn from_postgres(err: &postgres::Error, sql: &str) -> Self {
        if err.code() == Some(&SqlState::QUERY_CANCELED) {
            return Self::QueryInterrupted {
                sql: sql.to_string(),
                message: err.to_string(),
            };
        }
        Self::Db {
            code: None,
            message: err.to_string(),
        }
    }
}

impl From<rusqlite::Error> for DatabaseError {
    fn from(err: rusqlite::Error) -> Self {
        if err.sqlite_error_code() == Some(ErrorCode::OperationInterrupted) {
            return Self::QueryInterrupted {
                sql: String::new(),
                message: err.to_string(),
            };
        }
        Self::engine(&err)
    }
}
