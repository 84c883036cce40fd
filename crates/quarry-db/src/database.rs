// crates/quarry-db/src/database.rs
// ============================================================================
// Module: Quarry Database Facade
// Description: Public object for one named SQLite or PostgreSQL database.
// Purpose: Uniform reads, writes, introspection, and file metadata.
// Dependencies: serde, tracing
// ============================================================================

//! ## Overview
//! A [`Database`] binds a name to a backend chosen from its
//! [`DatabaseSource`]. Reads and catalog helpers dispatch through
//! [`DatabaseBackend`]; writes and file metadata are available for `SQLite`
//! sources and report [`DatabaseError::Unsupported`] elsewhere.
//!
//! Per-table settings (hidden flag, label column) are layered on top of the
//! catalog by [`Database::hidden_table_names`] and
//! [`Database::label_column_for_table`].

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use rusqlite::Connection;
use serde::Deserialize;
use serde::Serialize;

use crate::backend::BackendKind;
use crate::backend::DatabaseBackend;
use crate::connection::ConnectionOpener;
use crate::connection::FileMode;
use crate::connection::PrepareHook;
use crate::connection::SqliteSource;
use crate::connection::UriMode;
use crate::error::DatabaseError;
use crate::hashing::hash_bytes;
use crate::introspect::AttachedDatabase;
use crate::introspect::ColumnInfo;
use crate::introspect::DefinitionKind;
use crate::introspect::ForeignKey;
use crate::introspect::TableForeignKeys;
use crate::introspect::expand_hidden;
use crate::introspect::has_text_affinity;
use crate::introspect::infer_label_column;
use crate::pool::Pool;
use crate::postgres_backend::PostgresBackend;
use crate::postgres_backend::PostgresConfig;
use crate::results::Results;
use crate::settings::DEFAULT_COUNT_TIME_LIMIT_MS;
use crate::settings::QueryOptions;
use crate::settings::Settings;
use crate::sqlite_backend::SqliteBackend;
use crate::sqlite_backend::WriteOutcome;
use crate::value::QueryParams;
use crate::write_queue::WriteOptions;
use crate::write_queue::WriteReply;

// ============================================================================
// SECTION: Sources and Options
// ============================================================================

/// Where a database lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseSource {
    /// `SQLite` file.
    File {
        /// File path.
        path: PathBuf,
        /// Mutability of the file.
        mode: FileMode,
    },
    /// `SQLite` in-memory database; named ones are shared across connections.
    Memory {
        /// Shared-cache name.
        name: Option<String>,
    },
    /// Remote PostgreSQL database.
    Postgres(PostgresConfig),
}

impl DatabaseSource {
    /// Suggests a database name: the file stem, memory name, or PostgreSQL
    /// database name, falling back to `db`.
    #[must_use]
    pub fn suggest_name(&self) -> String {
        match self {
            Self::File {
                path,
                mode,
            } => SqliteSource::File {
                path: path.clone(),
                mode: *mode,
            }
            .suggest_name(),
            Self::Memory {
                name,
            } => name.clone().unwrap_or_else(|| "db".to_string()),
            Self::Postgres(config) => config.dbname().unwrap_or_else(|| "db".to_string()),
        }
    }

    /// Returns the `SQLite` source, if this is one.
    fn sqlite(&self) -> Option<SqliteSource> {
        match self {
            Self::File {
                path,
                mode,
            } => Some(SqliteSource::File {
                path: path.clone(),
                mode: *mode,
            }),
            Self::Memory {
                name,
            } => Some(SqliteSource::Memory {
                name: name.clone(),
            }),
            Self::Postgres(_) => None,
        }
    }
}

/// Per-table presentation settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TableSettings {
    /// Hide the table from listings.
    pub hidden: bool,
    /// Explicit label column.
    pub label_column: Option<String>,
}

/// Options applied when a database is opened.
#[derive(Clone, Default)]
pub struct DatabaseOptions {
    /// Per-table settings keyed by table name.
    pub tables: BTreeMap<String, TableSettings>,
    /// Explicit `mode=` URI parameter for `SQLite` files.
    pub uri_mode: Option<UriMode>,
    /// Hooks run on every new `SQLite` connection.
    pub hooks: Vec<PrepareHook>,
}

impl fmt::Debug for DatabaseOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseOptions")
            .field("tables", &self.tables)
            .field("uri_mode", &self.uri_mode)
            .field("hooks", &self.hooks.len())
            .finish()
    }
}

// ============================================================================
// SECTION: Database
// ============================================================================

/// One named database.
pub struct Database {
    /// Database name.
    name: String,
    /// Engine backend.
    backend: Box<dyn DatabaseBackend>,
    /// Per-table settings.
    tables: BTreeMap<String, TableSettings>,
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("name", &self.name)
            .field("kind", &self.backend.kind())
            .field("mutable", &self.backend.is_mutable())
            .finish_non_exhaustive()
    }
}

impl Database {
    /// Opens a database and registers it with `pool`.
    ///
    /// Nothing connects yet: `SQLite` handles open on first use and
    /// PostgreSQL clients on first checkout.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError::Invalid`] when the name is already registered
    /// and [`DatabaseError::Connection`] for unparsable PostgreSQL settings.
    pub fn open(
        name: impl Into<String>,
        source: &DatabaseSource,
        options: DatabaseOptions,
        settings: Arc<Settings>,
        pool: Arc<Pool>,
    ) -> Result<Self, DatabaseError> {
        let name = name.into();
        let backend: Box<dyn DatabaseBackend> = match (source, source.sqlite()) {
            (DatabaseSource::Postgres(config), _) => {
                Box::new(PostgresBackend::new(name.clone(), config, settings)?)
            }
            (_, Some(sqlite)) => {
                let opener = ConnectionOpener::new(name.clone(), sqlite, &settings)
                    .with_uri_mode(options.uri_mode)
                    .with_hooks(options.hooks);
                Box::new(SqliteBackend::new(opener, settings, pool)?)
            }
            (_, None) => {
                return Err(DatabaseError::Invalid(format!("unsupported source for {name}")));
            }
        };
        Ok(Self {
            name,
            backend,
            tables: options.tables,
        })
    }

    /// Returns the database name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the backend variant.
    #[must_use]
    pub fn kind(&self) -> BackendKind {
        self.backend.kind()
    }

    /// Returns the backend.
    #[must_use]
    pub fn backend(&self) -> &dyn DatabaseBackend {
        self.backend.as_ref()
    }

    /// Returns true when content may change while the process runs.
    #[must_use]
    pub fn is_mutable(&self) -> bool {
        self.backend.is_mutable()
    }

    /// Returns true for in-memory databases.
    #[must_use]
    pub fn is_memory(&self) -> bool {
        self.backend.is_memory()
    }

    /// Returns the `SQLite` backend or an unsupported-operation error.
    fn sqlite(&self, operation: &str) -> Result<&SqliteBackend, DatabaseError> {
        self.backend.as_sqlite().ok_or_else(|| {
            DatabaseError::Unsupported(format!(
                "{operation} on {} database {}",
                kind_label(self.kind()),
                self.name
            ))
        })
    }

    // ------------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------------

    /// Runs a read query.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError::QueryInterrupted`] when the time limit
    /// expires and [`DatabaseError::Db`] for engine errors.
    pub fn execute(
        &self,
        sql: &str,
        params: &QueryParams,
        options: QueryOptions,
    ) -> Result<Results, DatabaseError> {
        self.backend.execute(sql, params, options)
    }

    /// Runs `job` on a pooled read connection.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError::Unsupported`] for PostgreSQL, pool errors,
    /// and whatever `job` returns.
    pub fn execute_fn<T, F>(&self, job: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&Connection) -> Result<T, DatabaseError>,
    {
        self.sqlite("execute_fn")?.execute_fn(job)
    }

    // ------------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------------

    /// Runs one statement in a write transaction.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError::Unsupported`] for PostgreSQL,
    /// [`DatabaseError::Immutable`] for immutable files, and, when blocking,
    /// the statement's error.
    pub fn execute_write(
        &self,
        sql: impl Into<String>,
        params: QueryParams,
        block: bool,
    ) -> Result<WriteReply<WriteOutcome>, DatabaseError> {
        self.sqlite("execute_write")?.execute_write(sql, params, block)
    }

    /// Runs a multi-statement script in a write transaction.
    ///
    /// # Errors
    ///
    /// Same as [`Database::execute_write`].
    pub fn execute_write_script(
        &self,
        sql: impl Into<String>,
        block: bool,
    ) -> Result<WriteReply<()>, DatabaseError> {
        self.sqlite("execute_write_script")?.execute_write_script(sql, block)
    }

    /// Runs one statement per parameter row in a single write transaction.
    ///
    /// # Errors
    ///
    /// Same as [`Database::execute_write`].
    pub fn execute_write_many(
        &self,
        sql: impl Into<String>,
        rows: Vec<QueryParams>,
        block: bool,
    ) -> Result<WriteReply<WriteOutcome>, DatabaseError> {
        self.sqlite("execute_write_many")?.execute_write_many(sql, rows, block)
    }

    /// Runs `job` on the write connection inside a write transaction.
    ///
    /// # Errors
    ///
    /// Same as [`Database::execute_write`].
    pub fn execute_write_fn<T, F>(
        &self,
        job: F,
        block: bool,
    ) -> Result<WriteReply<T>, DatabaseError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, DatabaseError> + Send + 'static,
    {
        self.sqlite("execute_write_fn")?.execute_write_fn(job, block)
    }

    /// Runs `job` on the write connection with explicit options.
    ///
    /// # Errors
    ///
    /// Same as [`Database::execute_write`].
    pub fn execute_write_fn_with<T, F>(
        &self,
        job: F,
        options: WriteOptions,
        block: bool,
    ) -> Result<WriteReply<T>, DatabaseError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, DatabaseError> + Send + 'static,
    {
        self.sqlite("execute_write_fn_with")?.execute_write_fn_with(job, options, block)
    }

    /// Runs `job` on a dedicated write connection, in queue order.
    ///
    /// # Errors
    ///
    /// Same as [`Database::execute_write`].
    pub fn execute_isolated_fn<T, F>(&self, job: F) -> Result<T, DatabaseError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, DatabaseError> + Send + 'static,
    {
        self.sqlite("execute_isolated_fn")?.execute_isolated_fn(job)
    }

    // ------------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------------

    /// Counts rows per table (capped), `None` where counting failed.
    ///
    /// `limit_ms` defaults to [`DEFAULT_COUNT_TIME_LIMIT_MS`] per table.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError`] when the table list cannot be read.
    pub fn table_counts(
        &self,
        limit_ms: Option<u64>,
    ) -> Result<BTreeMap<String, Option<u64>>, DatabaseError> {
        self.backend.table_counts(limit_ms.unwrap_or(DEFAULT_COUNT_TIME_LIMIT_MS))
    }

    /// Lists table names.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError`] when the catalog cannot be read.
    pub fn table_names(&self) -> Result<Vec<String>, DatabaseError> {
        self.backend.table_names()
    }

    /// Lists view names.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError`] when the catalog cannot be read.
    pub fn view_names(&self) -> Result<Vec<String>, DatabaseError> {
        self.backend.view_names()
    }

    /// Returns true when `table` exists.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError`] when the catalog cannot be read.
    pub fn table_exists(&self, table: &str) -> Result<bool, DatabaseError> {
        Ok(self.table_names()?.iter().any(|name| name == table))
    }

    /// Returns true when `view` exists.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError`] when the catalog cannot be read.
    pub fn view_exists(&self, view: &str) -> Result<bool, DatabaseError> {
        Ok(self.view_names()?.iter().any(|name| name == view))
    }

    /// Returns column names of `table` in order.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError`] when the catalog cannot be read.
    pub fn table_columns(&self, table: &str) -> Result<Vec<String>, DatabaseError> {
        Ok(self.table_column_details(table)?.into_iter().map(|column| column.name).collect())
    }

    /// Returns column details for `table`.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError`] when the catalog cannot be read.
    pub fn table_column_details(&self, table: &str) -> Result<Vec<ColumnInfo>, DatabaseError> {
        self.backend.table_column_details(table)
    }

    /// Returns primary key columns in key order.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError`] when the catalog cannot be read.
    pub fn primary_keys(&self, table: &str) -> Result<Vec<String>, DatabaseError> {
        self.backend.primary_keys(table)
    }

    /// Returns single-column outgoing foreign keys.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError`] when the catalog cannot be read.
    pub fn foreign_keys_for_table(&self, table: &str) -> Result<Vec<ForeignKey>, DatabaseError> {
        self.backend.foreign_keys_for_table(table)
    }

    /// Returns the incoming/outgoing foreign key graph.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError`] when the catalog cannot be read.
    pub fn get_all_foreign_keys(
        &self,
    ) -> Result<BTreeMap<String, TableForeignKeys>, DatabaseError> {
        self.backend.get_all_foreign_keys()
    }

    /// Returns the full-text index table for `table`, if any.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError`] when the catalog cannot be read.
    pub fn fts_table(&self, table: &str) -> Result<Option<String>, DatabaseError> {
        self.backend.fts_table(table)
    }

    /// Returns hidden table names, sorted.
    ///
    /// Tables marked hidden in settings and tables the catalog marks as
    /// internal are hidden, plus every table named `<hidden>_...`.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError`] when the catalog cannot be read.
    pub fn hidden_table_names(&self) -> Result<Vec<String>, DatabaseError> {
        let mut seed: BTreeSet<String> = self
            .tables
            .iter()
            .filter(|(_, settings)| settings.hidden)
            .map(|(table, _)| table.clone())
            .collect();
        seed.extend(self.backend.inferred_hidden_tables()?);
        let tables = self.table_names()?;
        Ok(expand_hidden(&tables, seed).into_iter().collect())
    }

    /// Returns the `CREATE TABLE` statement and index statements for `table`.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError`] when the catalog cannot be read.
    pub fn get_table_definition(&self, table: &str) -> Result<Option<String>, DatabaseError> {
        self.backend.get_definition(table, DefinitionKind::Table)
    }

    /// Returns the `CREATE VIEW` statement for `view`.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError`] when the catalog cannot be read.
    pub fn get_view_definition(&self, view: &str) -> Result<Option<String>, DatabaseError> {
        self.backend.get_definition(view, DefinitionKind::View)
    }

    /// Lists attached databases.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError`] when the catalog cannot be read.
    pub fn attached_databases(&self) -> Result<Vec<AttachedDatabase>, DatabaseError> {
        self.backend.attached_databases()
    }

    /// Picks a label column for `table`.
    ///
    /// An explicit `label_column` setting wins; otherwise the single unique
    /// text column, a `name`/`title` column, or the non-key column of an
    /// id-plus-one table.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError`] when the catalog cannot be read.
    pub fn label_column_for_table(&self, table: &str) -> Result<Option<String>, DatabaseError> {
        if let Some(explicit) =
            self.tables.get(table).and_then(|settings| settings.label_column.clone())
        {
            return Ok(Some(explicit));
        }
        let details = self.table_column_details(table)?;
        let unique = self.backend.unique_columns(table)?;
        let unique_text: Vec<String> = details
            .iter()
            .filter(|column| {
                unique.contains(&column.name) && has_text_affinity(&column.column_type)
            })
            .map(|column| column.name.clone())
            .collect();
        let columns: Vec<String> = details.into_iter().map(|column| column.name).collect();
        Ok(infer_label_column(&columns, &unique_text))
    }

    // ------------------------------------------------------------------------
    // Metadata
    // ------------------------------------------------------------------------

    /// Returns the content hash of an immutable file.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError::Io`] when the file cannot be read.
    pub fn hash(&self) -> Result<Option<String>, DatabaseError> {
        self.backend.as_sqlite().map_or(Ok(None), SqliteBackend::hash)
    }

    /// Returns the file size in bytes (0 for memory and PostgreSQL).
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError::Io`] when the file metadata cannot be read.
    pub fn size(&self) -> Result<u64, DatabaseError> {
        self.backend.as_sqlite().map_or(Ok(0), SqliteBackend::size)
    }

    /// Returns the file modification time in nanoseconds since the epoch.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError::Io`] when the file metadata cannot be read.
    pub fn mtime_ns(&self) -> Result<Option<u64>, DatabaseError> {
        self.backend.as_sqlite().map_or(Ok(None), SqliteBackend::mtime_ns)
    }

    /// Returns a six-character hex color: from the content hash when known,
    /// else from the hash of the name.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError::Io`] when hashing the file fails.
    pub fn color(&self) -> Result<String, DatabaseError> {
        let digest = self.hash()?.unwrap_or_else(|| hash_bytes(self.name.as_bytes()));
        Ok(digest.chars().take(6).collect())
    }

    /// Releases connections and stops the write queue.
    pub fn close(&self) {
        self.backend.close();
    }
}

/// Human-readable backend label for error messages.
const fn kind_label(kind: BackendKind) -> &'static str {
    match kind {
        BackendKind::LocalFile => "file",
        BackendKind::InMemory => "memory",
        BackendKind::Remote => "postgres",
    }
}

#[cfg(test)]
mod tests {
    #![allow(
        clippy::panic,
        clippy::unwrap_used,
        clippy::expect_used,
        reason = "Test fixtures use explicit asserts and unwraps for clarity."
    )]

    use std::collections::BTreeMap;
    use std::sync::Arc;

    use super::Database;
    use super::DatabaseOptions;
    use super::DatabaseSource;
    use super::TableSettings;
    use crate::pool::Pool;
    use crate::postgres_backend::PostgresConfig;
    use crate::settings::Settings;
    use crate::value::QueryParams;

    fn memory(name: &str, tables: BTreeMap<String, TableSettings>) -> Database {
        let options = DatabaseOptions {
            tables,
            ..DatabaseOptions::default()
        };
        Database::open(
            name,
            &DatabaseSource::Memory {
                name: Some(name.to_string()),
            },
            options,
            Arc::new(Settings::default()),
            Arc::new(Pool::new()),
        )
        .unwrap()
    }

    #[test]
    fn explicit_settings_override_inference() {
        let tables = BTreeMap::from([(
            "people".to_string(),
            TableSettings {
                hidden: true,
                label_column: Some("nickname".to_string()),
            },
        )]);
        let db = memory("quarry_database_settings", tables);
        db.execute_write_script(
            "create table people (id integer primary key, name text, nickname text);
             create table people_archive (id integer primary key);
             create table tags (id integer primary key, label text);",
            true,
        )
        .unwrap();
        assert_eq!(db.label_column_for_table("people").unwrap().as_deref(), Some("nickname"));
        assert_eq!(db.label_column_for_table("tags").unwrap().as_deref(), Some("label"));
        assert_eq!(db.hidden_table_names().unwrap(), vec!["people", "people_archive"]);
    }

    #[test]
    fn unique_text_columns_label_tables() {
        let db = memory("quarry_database_unique_label", BTreeMap::new());
        db.execute_write_script(
            "create table codes (id integer primary key, code text unique, note text, extra text)",
            true,
        )
        .unwrap();
        assert_eq!(db.label_column_for_table("codes").unwrap().as_deref(), Some("code"));
        assert!(db.table_exists("codes").unwrap());
        assert!(!db.view_exists("codes").unwrap());
    }

    #[test]
    fn memory_metadata_uses_name_color() {
        let db = memory("quarry_database_color", BTreeMap::new());
        assert_eq!(db.size().unwrap(), 0);
        assert_eq!(db.hash().unwrap(), None);
        assert_eq!(db.color().unwrap().len(), 6);
        assert_eq!(db.mtime_ns().unwrap(), None);
    }

    #[test]
    fn postgres_databases_reject_writes_without_connecting() {
        let db = Database::open(
            "remote",
            &DatabaseSource::Postgres(PostgresConfig::default()),
            DatabaseOptions::default(),
            Arc::new(Settings::default()),
            Arc::new(Pool::new()),
        )
        .unwrap();
        let err = db.execute_write("delete from t", QueryParams::None, true).unwrap_err();
        assert_eq!(err.code(), "UNSUPPORTED");
        assert!(!db.is_mutable());
        assert_eq!(db.size().unwrap(), 0);
    }

    #[test]
    fn suggested_names_follow_source() {
        let file = DatabaseSource::File {
            path: "/srv/data/fixtures.db".into(),
            mode: crate::connection::FileMode::Immutable,
        };
        assert_eq!(file.suggest_name(), "fixtures");
        assert_eq!(DatabaseSource::Memory { name: None }.suggest_name(), "db");
        assert_eq!(DatabaseSource::Postgres(PostgresConfig::default()).suggest_name(), "quarry");
    }
}
