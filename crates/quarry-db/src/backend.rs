// crates/quarry-db/src/backend.rs
// ============================================================================
// Module: Quarry Backend Interface
// Description: Capability set shared by SQLite and PostgreSQL backends.
// Purpose: Let the database facade dispatch without knowing the engine.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! [`DatabaseBackend`] is the seam between the [`crate::Database`] facade and
//! a concrete engine. Every backend answers reads and catalog questions;
//! writes are SQLite-only and reached through [`DatabaseBackend::as_sqlite`].

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use serde::Serialize;

use crate::error::DatabaseError;
use crate::introspect::AttachedDatabase;
use crate::introspect::ColumnInfo;
use crate::introspect::DefinitionKind;
use crate::introspect::ForeignKey;
use crate::introspect::TableForeignKeys;
use crate::introspect::foreign_key_graph;
use crate::results::Results;
use crate::settings::QueryOptions;
use crate::sqlite_backend::SqliteBackend;
use crate::value::QueryParams;

// ============================================================================
// SECTION: Kinds
// ============================================================================

/// Backend variant behind a database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// `SQLite` file on disk.
    LocalFile,
    /// `SQLite` in-memory database.
    InMemory,
    /// Remote PostgreSQL server.
    Remote,
}

// ============================================================================
// SECTION: Trait
// ============================================================================

/// Operations every database backend provides.
pub trait DatabaseBackend: Send + Sync {
    /// Returns the backend variant.
    fn kind(&self) -> BackendKind;

    /// Returns the database name.
    fn name(&self) -> &str;

    /// Returns true when content may change while the process runs.
    fn is_mutable(&self) -> bool;

    /// Returns true for in-memory databases.
    fn is_memory(&self) -> bool {
        self.kind() == BackendKind::InMemory
    }

    /// Runs a read query.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError::QueryInterrupted`] when the time limit
    /// expires and [`DatabaseError::Db`] for engine errors.
    fn execute(
        &self,
        sql: &str,
        params: &QueryParams,
        options: QueryOptions,
    ) -> Result<Results, DatabaseError>;

    /// Lists table names.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError`] when the catalog cannot be read.
    fn table_names(&self) -> Result<Vec<String>, DatabaseError>;

    /// Lists view names.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError`] when the catalog cannot be read.
    fn view_names(&self) -> Result<Vec<String>, DatabaseError>;

    /// Returns column details for a table.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError`] when the catalog cannot be read.
    fn table_column_details(&self, table: &str) -> Result<Vec<ColumnInfo>, DatabaseError>;

    /// Returns primary key columns in key order.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError`] when the catalog cannot be read.
    fn primary_keys(&self, table: &str) -> Result<Vec<String>, DatabaseError>;

    /// Returns columns covered by a single-column unique index.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError`] when the catalog cannot be read.
    fn unique_columns(&self, table: &str) -> Result<Vec<String>, DatabaseError>;

    /// Returns single-column outgoing foreign keys.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError`] when the catalog cannot be read.
    fn foreign_keys_for_table(&self, table: &str) -> Result<Vec<ForeignKey>, DatabaseError>;

    /// Returns the foreign key graph for every table.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError`] when the catalog cannot be read.
    fn get_all_foreign_keys(&self) -> Result<BTreeMap<String, TableForeignKeys>, DatabaseError> {
        foreign_key_graph(self.table_names()?, |table| self.foreign_keys_for_table(table))
    }

    /// Returns the full-text index table for `table`, if any.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError`] when the catalog cannot be read.
    fn fts_table(&self, table: &str) -> Result<Option<String>, DatabaseError>;

    /// Returns tables the engine itself marks as internal.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError`] when the catalog cannot be read.
    fn inferred_hidden_tables(&self) -> Result<BTreeSet<String>, DatabaseError>;

    /// Returns the DDL for a table or view, or `None` when it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError`] when the catalog cannot be read.
    fn get_definition(
        &self,
        name: &str,
        kind: DefinitionKind,
    ) -> Result<Option<String>, DatabaseError>;

    /// Counts rows per table with a per-table time limit; failures map to `None`.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError`] when the table list cannot be read.
    fn table_counts(&self, limit_ms: u64) -> Result<BTreeMap<String, Option<u64>>, DatabaseError>;

    /// Lists attached databases.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError`] when the catalog cannot be read.
    fn attached_databases(&self) -> Result<Vec<AttachedDatabase>, DatabaseError> {
        Ok(Vec::new())
    }

    /// Releases pooled connections and stops background work.
    fn close(&self);

    /// Returns the `SQLite` backend for write and file operations.
    fn as_sqlite(&self) -> Option<&SqliteBackend> {
        None
    }
}
