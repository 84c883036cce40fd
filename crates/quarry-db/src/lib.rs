// crates/quarry-db/src/lib.rs
// ============================================================================
// Module: Quarry Database Library
// Description: Database access layer for SQLite files and PostgreSQL servers.
// Purpose: Pooled time-limited reads, serialized writes, and schema introspection.
// Dependencies: rusqlite, postgres, r2d2, sha2, tracing
// ============================================================================

//! ## Overview
//! Quarry opens named databases into a [`DatabaseRegistry`] and exposes each
//! one as a [`Database`]. Reads run on a bounded pool of read-only handles
//! under a wall-clock limit; writes to `SQLite` run in submission order on
//! one dedicated writer thread per database.
//! Invariants:
//! - At most one write runs per database at any moment.
//! - A read handle is used by one caller at a time.
//! - Immutable files reject writes and cache their row counts and hash.
//! - Truncating reads return at most `max_returned_rows` rows and flag it.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod backend;
pub mod connection;
pub mod database;
pub mod error;
pub mod group;
pub mod hashing;
pub mod introspect;
pub mod pool;
pub mod postgres_backend;
pub mod registry;
pub mod results;
pub mod settings;
pub mod sqlite_backend;
pub mod timelimit;
pub mod value;
pub mod write_queue;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use backend::BackendKind;
pub use backend::DatabaseBackend;
pub use connection::FileMode;
pub use connection::PrepareHook;
pub use connection::SqliteSource;
pub use connection::UriMode;
pub use database::Database;
pub use database::DatabaseOptions;
pub use database::DatabaseSource;
pub use database::TableSettings;
pub use error::DatabaseError;
pub use introspect::AttachedDatabase;
pub use introspect::ColumnInfo;
pub use introspect::ForeignKey;
pub use introspect::TableForeignKeys;
pub use postgres_backend::PostgresBackend;
pub use postgres_backend::PostgresConfig;
pub use registry::DatabaseRegistry;
pub use results::Results;
pub use results::Row;
pub use settings::QueryOptions;
pub use settings::Settings;
pub use sqlite_backend::SqliteBackend;
pub use sqlite_backend::WriteOutcome;
pub use value::QueryParams;
pub use value::Value;
pub use write_queue::WriteOptions;
pub use write_queue::WriteReply;
pub use write_queue::WriteTicket;
