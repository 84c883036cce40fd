// crates/quarry-db/src/sqlite_backend.rs
// ============================================================================
// Module: Quarry SQLite Backend
// Description: SQLite files and in-memory databases behind the backend trait.
// Purpose: Route reads through the pool and writes through the write queue.
// Dependencies: rusqlite, tracing
// ============================================================================

//! ## Overview
//! A [`SqliteBackend`] registers its opener with the shared [`Pool`] and owns
//! the database's [`WriteQueue`]. Reads run on pooled read connections under
//! a [`TimeLimit`]; writes are serialized onto the single write connection.
//!
//! Immutable files are fingerprinted once: hash, size, and table counts are
//! cached after the first computation. Mutable and memory databases always
//! recompute.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::fs;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::OnceLock;
use std::sync::PoisonError;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Instant;
use std::time::UNIX_EPOCH;

use rusqlite::Connection;
use tracing::debug;
use tracing::warn;

use crate::backend::BackendKind;
use crate::backend::DatabaseBackend;
use crate::connection::ConnectionOpener;
use crate::connection::SqliteSource;
use crate::error::DatabaseError;
use crate::hashing::hash_file;
use crate::introspect;
use crate::introspect::AttachedDatabase;
use crate::introspect::ColumnInfo;
use crate::introspect::DefinitionKind;
use crate::introspect::ForeignKey;
use crate::introspect::TableForeignKeys;
use crate::pool::Pool;
use crate::results::Results;
use crate::results::Row;
use crate::settings::QueryOptions;
use crate::settings::Settings;
use crate::timelimit::TimeLimit;
use crate::value::QueryParams;
use crate::value::Value;
use crate::value::bind_sqlite_params;
use crate::write_queue::WriteOptions;
use crate::write_queue::WriteQueue;
use crate::write_queue::WriteReply;

// ============================================================================
// SECTION: Outcomes
// ============================================================================

/// Summary of a write statement (or batch of statements).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WriteOutcome {
    /// Rows changed by the statement(s).
    pub rows_affected: usize,
    /// Rowid of the most recent successful insert on the write connection.
    pub last_insert_rowid: i64,
    /// Number of statement executions performed.
    pub executions: usize,
}

/// Instrumentation counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SqliteBackendStats {
    /// `count(*)` queries issued by [`DatabaseBackend::table_counts`].
    pub count_queries: u64,
}

// ============================================================================
// SECTION: Backend
// ============================================================================

/// `SQLite` database backed by a read pool and a single-writer queue.
///
/// # Invariants
/// - Hash, size, and count caches are only filled for immutable files.
/// - The pool registration and the write queue are released exactly once.
pub struct SqliteBackend {
    /// Database name (pool key).
    name: String,
    /// Opener shared with the pool and the write queue.
    opener: Arc<ConnectionOpener>,
    /// Shared limits.
    settings: Arc<Settings>,
    /// Shared read pool.
    pool: Arc<Pool>,
    /// Write queue for this database.
    writes: WriteQueue,
    /// Cached table counts (immutable only).
    cached_counts: Mutex<Option<BTreeMap<String, Option<u64>>>>,
    /// Cached content hash (immutable only).
    cached_hash: OnceLock<String>,
    /// Cached file size (immutable only).
    cached_size: OnceLock<u64>,
    /// Count queries issued so far.
    count_queries: AtomicU64,
    /// Set once the backend has been closed.
    closed: AtomicBool,
}

impl SqliteBackend {
    /// Registers a database with the pool and prepares its write queue.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError::Invalid`] when the name is already registered.
    pub fn new(
        opener: ConnectionOpener,
        settings: Arc<Settings>,
        pool: Arc<Pool>,
    ) -> Result<Self, DatabaseError> {
        let opener = Arc::new(opener);
        let name = opener.database().to_string();
        pool.register(&name, Arc::clone(&opener), settings.num_sql_threads)?;
        Ok(Self {
            name,
            writes: WriteQueue::new(Arc::clone(&opener)),
            opener,
            settings,
            pool,
            cached_counts: Mutex::new(None),
            cached_hash: OnceLock::new(),
            cached_size: OnceLock::new(),
            count_queries: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        })
    }

    /// Returns the database source.
    #[must_use]
    pub fn source(&self) -> &SqliteSource {
        self.opener.source()
    }

    /// Returns instrumentation counters.
    #[must_use]
    pub fn stats(&self) -> SqliteBackendStats {
        SqliteBackendStats {
            count_queries: self.count_queries.load(Ordering::Relaxed),
        }
    }

    /// Runs `job` on a pooled read connection.
    ///
    /// # Errors
    ///
    /// Returns pool acquisition errors and whatever `job` returns.
    pub fn execute_fn<T, F>(&self, job: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&Connection) -> Result<T, DatabaseError>,
    {
        let connection = self.pool.connection(&self.name)?;
        job(&connection)
    }

    // ------------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------------

    /// Runs one statement in a write transaction.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError::Immutable`] for immutable files, queue errors,
    /// and, when blocking, the statement's error.
    pub fn execute_write(
        &self,
        sql: impl Into<String>,
        params: QueryParams,
        block: bool,
    ) -> Result<WriteReply<WriteOutcome>, DatabaseError> {
        let sql = sql.into();
        self.submit(
            move |conn| {
                let mut statement = conn.prepare(&sql)?;
                bind_sqlite_params(&mut statement, &params)?;
                let rows_affected = statement.raw_execute()?;
                Ok(WriteOutcome {
                    rows_affected,
                    last_insert_rowid: conn.last_insert_rowid(),
                    executions: 1,
                })
            },
            WriteOptions::default(),
            block,
        )
    }

    /// Runs a multi-statement script in a write transaction.
    ///
    /// # Errors
    ///
    /// Same as [`SqliteBackend::execute_write`].
    pub fn execute_write_script(
        &self,
        sql: impl Into<String>,
        block: bool,
    ) -> Result<WriteReply<()>, DatabaseError> {
        let sql = sql.into();
        self.submit(move |conn| Ok(conn.execute_batch(&sql)?), WriteOptions::default(), block)
    }

    /// Runs one statement once per parameter row in a single write transaction.
    ///
    /// # Errors
    ///
    /// Same as [`SqliteBackend::execute_write`]; any failing row rolls back
    /// the whole batch.
    pub fn execute_write_many(
        &self,
        sql: impl Into<String>,
        rows: Vec<QueryParams>,
        block: bool,
    ) -> Result<WriteReply<WriteOutcome>, DatabaseError> {
        let sql = sql.into();
        self.submit(
            move |conn| {
                let mut statement = conn.prepare(&sql)?;
                let mut outcome = WriteOutcome::default();
                for params in &rows {
                    bind_sqlite_params(&mut statement, params)?;
                    outcome.rows_affected += statement.raw_execute()?;
                    outcome.executions += 1;
                }
                outcome.last_insert_rowid = conn.last_insert_rowid();
                Ok(outcome)
            },
            WriteOptions::default(),
            block,
        )
    }

    /// Runs `job` on the write connection inside a write transaction.
    ///
    /// # Errors
    ///
    /// Same as [`SqliteBackend::execute_write`].
    pub fn execute_write_fn<T, F>(
        &self,
        job: F,
        block: bool,
    ) -> Result<WriteReply<T>, DatabaseError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, DatabaseError> + Send + 'static,
    {
        self.submit(job, WriteOptions::default(), block)
    }

    /// Runs `job` on the write connection with explicit options.
    ///
    /// # Errors
    ///
    /// Same as [`SqliteBackend::execute_write`].
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
        self.submit(job, options, block)
    }

    /// Runs `job` on a dedicated write connection opened for it, in queue order.
    ///
    /// # Errors
    ///
    /// Same as [`SqliteBackend::execute_write`].
    pub fn execute_isolated_fn<T, F>(&self, job: F) -> Result<T, DatabaseError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, DatabaseError> + Send + 'static,
    {
        self.submit(job, WriteOptions::isolated(), true)?.into_value()
    }

    /// Rejects immutable files, then hands the job to the write queue.
    fn submit<T, F>(
        &self,
        job: F,
        options: WriteOptions,
        block: bool,
    ) -> Result<WriteReply<T>, DatabaseError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, DatabaseError> + Send + 'static,
    {
        if !self.source().is_mutable() {
            return Err(DatabaseError::Immutable(self.name.clone()));
        }
        self.writes.submit(job, options, block)
    }

    // ------------------------------------------------------------------------
    // File metadata
    // ------------------------------------------------------------------------

    /// Returns the SHA-256 hex digest of an immutable file; `None` otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError::Io`] when the file cannot be read.
    pub fn hash(&self) -> Result<Option<String>, DatabaseError> {
        let Some(path) = self.source().path() else {
            return Ok(None);
        };
        if self.source().is_mutable() {
            return Ok(None);
        }
        if let Some(hash) = self.cached_hash.get() {
            return Ok(Some(hash.clone()));
        }
        let hash = hash_file(path)?;
        debug!(database = %self.name, "hashed immutable database file");
        Ok(Some(self.cached_hash.get_or_init(|| hash).clone()))
    }

    /// Returns the file size in bytes: 0 for memory, live for mutable files,
    /// cached for immutable files.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError::Io`] when the file metadata cannot be read.
    pub fn size(&self) -> Result<u64, DatabaseError> {
        let Some(path) = self.source().path() else {
            return Ok(0);
        };
        if !self.source().is_mutable()
            && let Some(size) = self.cached_size.get()
        {
            return Ok(*size);
        }
        let size = fs::metadata(path)
            .map_err(|err| DatabaseError::Io(format!("{}: {err}", path.display())))?
            .len();
        if self.source().is_mutable() {
            Ok(size)
        } else {
            Ok(*self.cached_size.get_or_init(|| size))
        }
    }

    /// Returns the file modification time in nanoseconds since the epoch.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError::Io`] when the file metadata cannot be read.
    pub fn mtime_ns(&self) -> Result<Option<u64>, DatabaseError> {
        let Some(path) = self.source().path() else {
            return Ok(None);
        };
        let modified = fs::metadata(path)
            .and_then(|metadata| metadata.modified())
            .map_err(|err| DatabaseError::Io(format!("{}: {err}", path.display())))?;
        let nanos = modified.duration_since(UNIX_EPOCH).unwrap_or_default().as_nanos();
        Ok(Some(u64::try_from(nanos).unwrap_or(u64::MAX)))
    }
}

impl DatabaseBackend for SqliteBackend {
    fn kind(&self) -> BackendKind {
        if self.source().is_memory() { BackendKind::InMemory } else { BackendKind::LocalFile }
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn is_mutable(&self) -> bool {
        self.source().is_mutable()
    }

    fn execute(
        &self,
        sql: &str,
        params: &QueryParams,
        options: QueryOptions,
    ) -> Result<Results, DatabaseError> {
        let mut connection = self.pool.connection(&self.name)?;
        let limit_ms = self.settings.time_limit_ms(options.custom_time_limit_ms);
        let row_cap = (options.truncate && self.settings.max_returned_rows > 0)
            .then(|| self.settings.row_cap(options.page_size));
        let started = Instant::now();
        let result = {
            let _limit = TimeLimit::install(&connection, limit_ms);
            run_query(&connection, sql, params, row_cap)
        };
        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        match result {
            Ok(results) => {
                debug!(
                    database = %self.name,
                    sql,
                    rows = results.len(),
                    truncated = results.truncated(),
                    elapsed_ms,
                    "executed query"
                );
                Ok(results)
            }
            Err(err) => {
                let err = DatabaseError::from_sqlite(&err, sql);
                if err.is_fatal_engine_error() {
                    warn!(
                        database = %self.name,
                        slot = connection.slot(),
                        error = %err,
                        "discarding unusable read connection"
                    );
                    connection.mark_dead();
                }
                if err.is_interrupted() {
                    debug!(database = %self.name, sql, limit_ms, "query interrupted");
                } else if options.log_sql_errors {
                    warn!(database = %self.name, sql, error = %err, "query failed");
                }
                Err(err)
            }
        }
    }

    fn table_names(&self) -> Result<Vec<String>, DatabaseError> {
        self.execute_fn(introspect::table_names)
    }

    fn view_names(&self) -> Result<Vec<String>, DatabaseError> {
        self.execute_fn(introspect::view_names)
    }

    fn table_column_details(&self, table: &str) -> Result<Vec<ColumnInfo>, DatabaseError> {
        self.execute_fn(|conn| introspect::table_column_details(conn, table))
    }

    fn primary_keys(&self, table: &str) -> Result<Vec<String>, DatabaseError> {
        self.execute_fn(|conn| introspect::primary_keys(conn, table))
    }

    fn unique_columns(&self, table: &str) -> Result<Vec<String>, DatabaseError> {
        self.execute_fn(|conn| introspect::unique_columns(conn, table))
    }

    fn foreign_keys_for_table(&self, table: &str) -> Result<Vec<ForeignKey>, DatabaseError> {
        self.execute_fn(|conn| introspect::foreign_keys_for_table(conn, table))
    }

    fn get_all_foreign_keys(&self) -> Result<BTreeMap<String, TableForeignKeys>, DatabaseError> {
        self.execute_fn(introspect::get_all_foreign_keys)
    }

    fn fts_table(&self, table: &str) -> Result<Option<String>, DatabaseError> {
        self.execute_fn(|conn| introspect::detect_fts(conn, table))
    }

    fn inferred_hidden_tables(&self) -> Result<BTreeSet<String>, DatabaseError> {
        self.execute_fn(introspect::inferred_hidden_tables)
    }

    fn get_definition(
        &self,
        name: &str,
        kind: DefinitionKind,
    ) -> Result<Option<String>, DatabaseError> {
        self.execute_fn(|conn| introspect::get_definition(conn, name, kind))
    }

    fn table_counts(&self, limit_ms: u64) -> Result<BTreeMap<String, Option<u64>>, DatabaseError> {
        let immutable = !self.is_mutable();
        if immutable
            && let Some(counts) =
                self.cached_counts.lock().unwrap_or_else(PoisonError::into_inner).clone()
        {
            return Ok(counts);
        }
        let options = QueryOptions::default().with_time_limit_ms(limit_ms).quiet();
        let mut counts = BTreeMap::new();
        for table in self.table_names()? {
            self.count_queries.fetch_add(1, Ordering::Relaxed);
            let count = self
                .execute(&introspect::count_sql(&table), &QueryParams::None, options)
                .and_then(|results| Ok(results.single_value()?.and_then(Value::as_i64)));
            let count = match count {
                Ok(value) => value.and_then(|value| u64::try_from(value).ok()),
                Err(err) => {
                    debug!(
                        database = %self.name,
                        table = %table,
                        error = %err,
                        "table count unavailable"
                    );
                    None
                }
            };
            counts.insert(table, count);
        }
        if immutable {
            let mut cached = self.cached_counts.lock().unwrap_or_else(PoisonError::into_inner);
            *cached = Some(counts.clone());
        }
        Ok(counts)
    }

    fn attached_databases(&self) -> Result<Vec<AttachedDatabase>, DatabaseError> {
        self.execute_fn(introspect::attached_databases)
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.writes.close();
        self.pool.unregister(&self.name);
        debug!(database = %self.name, "closed sqlite backend");
    }

    fn as_sqlite(&self) -> Option<&SqliteBackend> {
        Some(self)
    }
}

impl Drop for SqliteBackend {
    fn drop(&mut self) {
        self.close();
    }
}

// ============================================================================
// SECTION: Query Execution
// ============================================================================

/// Prepares, binds, and steps a statement, stopping after `row_cap` rows.
///
/// When a cap is given and one more row exists, the result is marked
/// truncated and the extra row is discarded.
fn run_query(
    connection: &Connection,
    sql: &str,
    params: &QueryParams,
    row_cap: Option<usize>,
) -> rusqlite::Result<Results> {
    let mut statement = connection.prepare(sql)?;
    bind_sqlite_params(&mut statement, params)?;
    let columns: Arc<[String]> =
        statement.column_names().into_iter().map(str::to_string).collect();
    let width = columns.len();
    let mut rows = Vec::new();
    let mut truncated = false;
    let mut cursor = statement.raw_query();
    while let Some(row) = cursor.next()? {
        if row_cap.is_some_and(|cap| rows.len() >= cap) {
            truncated = true;
            break;
        }
        let values = (0 .. width)
            .map(|index| row.get_ref(index).map(Value::from_sqlite))
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.push(Row::new(Arc::clone(&columns), values));
    }
    Ok(Results::new(columns, rows, truncated))
}

#[cfg(test)]
mod tests {
    #![allow(
        clippy::panic,
        clippy::unwrap_used,
        clippy::expect_used,
        reason = "Test fixtures use explicit asserts and unwraps for clarity."
    )]

    use std::sync::Arc;

    use super::SqliteBackend;
    use crate::backend::BackendKind;
    use crate::backend::DatabaseBackend;
    use crate::connection::ConnectionOpener;
    use crate::connection::SqliteSource;
    use crate::pool::Pool;
    use crate::settings::QueryOptions;
    use crate::settings::Settings;
    use crate::value::QueryParams;
    use crate::value::Value;

    fn backend(memory_name: &str) -> SqliteBackend {
        let settings = Arc::new(Settings::default());
        let opener =
            ConnectionOpener::new(memory_name, SqliteSource::named_memory(memory_name), &settings);
        SqliteBackend::new(opener, settings, Arc::new(Pool::new())).unwrap()
    }

    #[test]
    fn writes_are_visible_to_pooled_reads() {
        let backend = backend("quarry_backend_rw");
        assert_eq!(backend.kind(), BackendKind::InMemory);
        backend
            .execute_write_script("create table t (id integer primary key, v text)", true)
            .unwrap();
        let outcome = backend
            .execute_write("insert into t (v) values (?1)", QueryParams::positional(["x"]), true)
            .unwrap()
            .into_value()
            .unwrap();
        assert_eq!(outcome.rows_affected, 1);
        assert_eq!(outcome.last_insert_rowid, 1);
        let results = backend
            .execute(
                "select v from t where id = :id",
                &QueryParams::named([("id", 1_i64)]),
                QueryOptions::default(),
            )
            .unwrap();
        assert_eq!(results.single_value().unwrap(), Some(&Value::Text("x".to_string())));
    }

    #[test]
    fn write_many_runs_every_row_in_one_transaction() {
        let backend = backend("quarry_backend_many");
        backend.execute_write_script("create table t (v integer not null)", true).unwrap();
        let rows = (1 ..= 4).map(|value| QueryParams::positional([i64::from(value)])).collect();
        let outcome = backend
            .execute_write_many("insert into t values (?)", rows, true)
            .unwrap()
            .into_value()
            .unwrap();
        assert_eq!((outcome.rows_affected, outcome.executions), (4, 4));
        let failing =
            vec![QueryParams::positional([5_i64]), QueryParams::positional([Value::Null])];
        assert!(backend.execute_write_many("insert into t values (?)", failing, true).is_err());
        let total = backend
            .execute("select sum(v) from t", &QueryParams::None, QueryOptions::default())
            .unwrap();
        assert_eq!(total.single_value().unwrap(), Some(&Value::Integer(10)));
    }

    #[test]
    fn sql_errors_keep_engine_codes() {
        let backend = backend("quarry_backend_errors");
        let err = backend
            .execute("select * from missing", &QueryParams::None, QueryOptions::default().quiet())
            .unwrap_err();
        assert_eq!(err.code(), "DATABASE_ERROR");
    }

    #[test]
    fn isolated_jobs_see_committed_state() {
        let backend = backend("quarry_backend_isolated");
        backend
            .execute_write_script("create table t (v integer); insert into t values (7);", true)
            .unwrap();
        let value = backend
            .execute_isolated_fn(|conn| {
                Ok(conn.query_row("select v from t", [], |row| row.get::<_, i64>(0))?)
            })
            .unwrap();
        assert_eq!(value, 7);
    }

    #[test]
    fn closing_releases_pool_registration() {
        let backend = backend("quarry_backend_close");
        backend.close();
        let err =
            backend.execute("select 1", &QueryParams::None, QueryOptions::default()).unwrap_err();
        assert_eq!(err.code(), "UNKNOWN_DATABASE");
        assert_eq!(
            backend.execute_write_script("select 1", true).unwrap_err().code(),
            "DATABASE_CLOSED"
        );
    }
}
