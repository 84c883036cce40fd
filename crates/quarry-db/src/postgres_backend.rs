// crates/quarry-db/src/postgres_backend.rs
// ============================================================================
// Module: Quarry PostgreSQL Backend
// Description: Read-only PostgreSQL databases behind the backend trait.
// Purpose: Serve reads and catalog queries from a remote server.
// Dependencies: postgres, r2d2, r2d2_postgres, serde, tracing
// ============================================================================

//! ## Overview
//! A [`PostgresBackend`] wraps an r2d2 pool of blocking `postgres` clients.
//! The pool is built without connecting, so an unreachable server surfaces
//! as [`DatabaseError::Connection`] on first use rather than at startup.
//!
//! Reads run in a transaction with `SET LOCAL statement_timeout`. Capped
//! reads bind a portal and fetch at most `cap + 1` rows from the server.
//! Writes, `SQLite` attachments, and named parameters are not supported.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::PoisonError;
use std::sync::RwLock;
use std::time::Duration;
use std::time::Instant;

use postgres::NoTls;
use postgres::types::ToSql;
use r2d2::Pool;
use r2d2::PooledConnection;
use r2d2_postgres::PostgresConnectionManager;
use serde::Deserialize;
use serde::Serialize;
use tracing::debug;
use tracing::warn;

use crate::backend::BackendKind;
use crate::backend::DatabaseBackend;
use crate::error::DatabaseError;
use crate::introspect::COUNT_LIMIT;
use crate::introspect::ColumnInfo;
use crate::introspect::DefinitionKind;
use crate::introspect::ForeignKey;
use crate::results::Results;
use crate::results::Row;
use crate::settings::QueryOptions;
use crate::settings::Settings;
use crate::value::QueryParams;
use crate::value::Value;

// ============================================================================
// SECTION: Configuration
// ============================================================================

/// PostgreSQL connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PostgresConfig {
    /// Connection string (URL or key/value form).
    pub connection: String,
    /// Maximum pooled clients.
    pub max_connections: u32,
    /// Connect timeout in milliseconds; also bounds pool checkout.
    pub connect_timeout_ms: u64,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            connection: "postgres://quarry@localhost/quarry".to_string(),
            max_connections: 4,
            connect_timeout_ms: 5_000,
        }
    }
}

impl PostgresConfig {
    /// Returns the database name from the connection string, if present.
    #[must_use]
    pub fn dbname(&self) -> Option<String> {
        self.connection
            .parse::<postgres::Config>()
            .ok()
            .and_then(|config| config.get_dbname().map(str::to_string))
    }
}

/// Pool type shared by every query.
type PgPool = Pool<PostgresConnectionManager<NoTls>>;

/// Boxed positional parameter.
type PgParam = Box<dyn ToSql + Sync>;

// ============================================================================
// SECTION: Backend
// ============================================================================

/// Read-only PostgreSQL backend.
///
/// # Invariants
/// - Never reports itself mutable; no counts are cached.
pub struct PostgresBackend {
    /// Database name.
    name: String,
    /// Shared limits.
    settings: Arc<Settings>,
    /// Client pool; `None` after close.
    pool: RwLock<Option<PgPool>>,
}

impl Drop for PostgresBackend {
    fn drop(&mut self) {
        self.close();
    }
}

impl PostgresBackend {
    /// Builds the backend without connecting.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError::Connection`] when the connection string
    /// cannot be parsed.
    pub fn new(
        name: impl Into<String>,
        config: &PostgresConfig,
        settings: Arc<Settings>,
    ) -> Result<Self, DatabaseError> {
        let name = name.into();
        let mut pg_config = config
            .connection
            .parse::<postgres::Config>()
            .map_err(|err| DatabaseError::connection(&name, err.to_string()))?;
        let timeout = Duration::from_millis(config.connect_timeout_ms);
        pg_config.connect_timeout(timeout);
        let manager = PostgresConnectionManager::new(pg_config, NoTls);
        let pool = Pool::builder()
            .max_size(config.max_connections.max(1))
            .min_idle(Some(0))
            .connection_timeout(timeout)
            .build_unchecked(manager);
        Ok(Self {
            name,
            settings,
            pool: RwLock::new(Some(pool)),
        })
    }

    /// Checks out a pooled client.
    fn client(&self) -> Result<PooledConnection<PostgresConnectionManager<NoTls>>, DatabaseError> {
        let pool = self
            .pool
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| DatabaseError::Closed(format!("{} postgres pool", self.name)))?;
        pool.get().map_err(|err| DatabaseError::connection(&self.name, err.to_string()))
    }

    /// Runs a read in its own transaction under `statement_timeout`.
    fn run_query(
        &self,
        sql: &str,
        params: &QueryParams,
        limit_ms: u64,
        row_cap: Option<usize>,
    ) -> Result<Results, DatabaseError> {
        let boxed = pg_params(params)?;
        let refs: Vec<&(dyn ToSql + Sync)> = boxed.iter().map(|param| &**param).collect();
        let pg_err = |err: postgres::Error| DatabaseError::from_postgres(&err, sql);
        let mut client = self.client()?;
        let mut tx = client.transaction().map_err(pg_err)?;
        if limit_ms > 0 {
            tx.batch_execute(&format!("SET LOCAL statement_timeout = {limit_ms}")).map_err(pg_err)?;
        }
        let statement = tx.prepare(sql).map_err(pg_err)?;
        let columns: Arc<[String]> =
            statement.columns().iter().map(|column| column.name().to_string()).collect();
        let fetched = match fetch_limit(row_cap) {
            Some(max_rows) => {
                let portal = tx.bind(&statement, &refs).map_err(pg_err)?;
                tx.query_portal(&portal, max_rows).map_err(pg_err)?
            }
            None => tx.query(&statement, &refs).map_err(pg_err)?,
        };
        tx.commit().map_err(pg_err)?;
        let (keep, truncated) = split_truncated(fetched.len(), row_cap);
        let mut rows = Vec::with_capacity(keep);
        for row in fetched.iter().take(keep) {
            let values = (0 .. columns.len())
                .map(|index| pg_value(row, index))
                .collect::<Result<Vec<_>, _>>()
                .map_err(pg_err)?;
            rows.push(Row::new(Arc::clone(&columns), values));
        }
        Ok(Results::new(columns, rows, truncated))
    }

    /// Runs a catalog query returning one text column.
    fn text_column(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<Vec<String>, DatabaseError> {
        let pg_err = |err: postgres::Error| DatabaseError::from_postgres(&err, sql);
        let mut client = self.client()?;
        let rows = client.query(sql, params).map_err(pg_err)?;
        rows.iter().map(|row| row.try_get::<_, String>(0).map_err(pg_err)).collect()
    }
}

impl DatabaseBackend for PostgresBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Remote
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn is_mutable(&self) -> bool {
        false
    }

    fn execute(
        &self,
        sql: &str,
        params: &QueryParams,
        options: QueryOptions,
    ) -> Result<Results, DatabaseError> {
        let limit_ms = self.settings.time_limit_ms(options.custom_time_limit_ms);
        let row_cap = (options.truncate && self.settings.max_returned_rows > 0)
            .then(|| self.settings.row_cap(options.page_size));
        let started = Instant::now();
        let result = self.run_query(sql, params, limit_ms, row_cap);
        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        match &result {
            Ok(results) => {
                debug!(
                    database = %self.name,
                    sql,
                    rows = results.len(),
                    elapsed_ms,
                    "executed query"
                );
            }
            Err(err) if err.is_interrupted() => {
                debug!(database = %self.name, sql, limit_ms, "query interrupted");
            }
            Err(err) if options.log_sql_errors => {
                warn!(database = %self.name, sql, error = %err, "query failed");
            }
            Err(_) => {}
        }
        result
    }

    fn table_names(&self) -> Result<Vec<String>, DatabaseError> {
        self.text_column(
            "select tablename::text from pg_catalog.pg_tables \
             where schemaname not in ('pg_catalog', 'information_schema') order by tablename",
            &[],
        )
    }

    fn view_names(&self) -> Result<Vec<String>, DatabaseError> {
        self.text_column(
            "select viewname::text from pg_catalog.pg_views \
             where schemaname not in ('pg_catalog', 'information_schema') order by viewname",
            &[],
        )
    }

    fn table_column_details(&self, table: &str) -> Result<Vec<ColumnInfo>, DatabaseError> {
        let sql = "select ordinal_position::int8, column_name::text, data_type::text, \
                   is_nullable::text, column_default::text from information_schema.columns \
                   where table_name = $1 and table_schema = 'public' order by ordinal_position";
        let primary_keys = self.primary_keys(table)?;
        let mut client = self.client()?;
        let rows = client
            .query(sql, &[&table])
            .map_err(|err| DatabaseError::from_postgres(&err, sql))?;
        rows.iter()
            .map(|row| -> Result<ColumnInfo, postgres::Error> {
                let name: String = row.try_get(1)?;
                let position = primary_keys.iter().position(|key| *key == name);
                Ok(ColumnInfo {
                    cid: row.try_get::<_, i64>(0)? - 1,
                    column_type: row.try_get(2)?,
                    notnull: row.try_get::<_, String>(3)? == "NO",
                    default_value: row.try_get(4)?,
                    is_pk: position.map_or(0, |index| i64::try_from(index + 1).unwrap_or(i64::MAX)),
                    hidden: 0,
                    name,
                })
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| DatabaseError::from_postgres(&err, sql))
    }

    fn primary_keys(&self, table: &str) -> Result<Vec<String>, DatabaseError> {
        self.text_column(
            "select a.attname::text from pg_index i \
             join pg_attribute a on a.attrelid = i.indrelid and a.attnum = any(i.indkey) \
             where i.indrelid = $1::text::regclass and i.indisprimary \
             order by array_position(i.indkey::int2[], a.attnum)",
            &[&table],
        )
    }

    fn unique_columns(&self, _table: &str) -> Result<Vec<String>, DatabaseError> {
        Ok(Vec::new())
    }

    fn foreign_keys_for_table(&self, table: &str) -> Result<Vec<ForeignKey>, DatabaseError> {
        let sql = "select tc.constraint_name::text, kcu.column_name::text, ccu.table_name::text, \
                   ccu.column_name::text from information_schema.table_constraints tc \
                   join information_schema.key_column_usage kcu \
                   on tc.constraint_name = kcu.constraint_name \
                   and tc.table_schema = kcu.table_schema \
                   join information_schema.constraint_column_usage ccu \
                   on ccu.constraint_name = tc.constraint_name \
                   and ccu.table_schema = tc.table_schema \
                   where tc.constraint_type = 'FOREIGN KEY' and tc.table_name = $1";
        let mut client = self.client()?;
        let rows = client
            .query(sql, &[&table])
            .map_err(|err| DatabaseError::from_postgres(&err, sql))?;
        let edges = rows
            .iter()
            .map(|row| -> Result<(String, String, String, String), postgres::Error> {
                Ok((row.try_get(0)?, row.try_get(1)?, row.try_get(2)?, row.try_get(3)?))
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| DatabaseError::from_postgres(&err, sql))?;
        let mut widths: HashMap<&str, usize> = HashMap::new();
        for (constraint, ..) in &edges {
            *widths.entry(constraint.as_str()).or_default() += 1;
        }
        Ok(edges
            .iter()
            .filter(|(constraint, ..)| widths.get(constraint.as_str()).copied() == Some(1))
            .map(|(_, column, other_table, other_column)| ForeignKey {
                column: column.clone(),
                other_table: other_table.clone(),
                other_column: other_column.clone(),
            })
            .collect())
    }

    fn fts_table(&self, _table: &str) -> Result<Option<String>, DatabaseError> {
        Ok(None)
    }

    fn inferred_hidden_tables(&self) -> Result<BTreeSet<String>, DatabaseError> {
        Ok(BTreeSet::new())
    }

    fn get_definition(
        &self,
        name: &str,
        kind: DefinitionKind,
    ) -> Result<Option<String>, DatabaseError> {
        let sql = match kind {
            DefinitionKind::Table => {
                "select 'CREATE TABLE ' || quote_ident(c.relname) || ' (' || \
                 string_agg(quote_ident(a.attname) || ' ' || format_type(a.atttypid, a.atttypmod) \
                 || case when a.attnotnull then ' NOT NULL' else '' end, ', ' order by a.attnum) \
                 || ');' from pg_class c join pg_attribute a on a.attrelid = c.oid \
                 where c.relname = $1 and c.relkind = 'r' and a.attnum > 0 and not a.attisdropped \
                 group by c.relname"
            }
            DefinitionKind::View => {
                "select 'CREATE VIEW ' || quote_ident(viewname) || ' AS ' || definition \
                 from pg_catalog.pg_views where viewname = $1"
            }
        };
        Ok(self.text_column(sql, &[&name])?.into_iter().next())
    }

    fn table_counts(&self, limit_ms: u64) -> Result<BTreeMap<String, Option<u64>>, DatabaseError> {
        let options = QueryOptions::default().with_time_limit_ms(limit_ms).quiet();
        let mut counts = BTreeMap::new();
        for table in self.table_names()? {
            let sql = format!(
                "select count(*) from (select * from {} limit {}) as counted",
                quote_pg_identifier(&table),
                COUNT_LIMIT + 1
            );
            let count = self
                .execute(&sql, &QueryParams::None, options)
                .ok()
                .and_then(|results| results.single_value().ok().flatten().and_then(Value::as_i64))
                .and_then(|value| u64::try_from(value).ok());
            counts.insert(table, count);
        }
        Ok(counts)
    }

    fn close(&self) {
        let pool = self.pool.write().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(pool) = pool {
            let _ = std::thread::spawn(move || drop(pool));
        }
    }
}

// ============================================================================
// SECTION: Row Caps
// ============================================================================

/// Rows to request from the server for a capped read: one past the cap.
fn fetch_limit(row_cap: Option<usize>) -> Option<i32> {
    row_cap.map(|cap| i32::try_from(cap.saturating_add(1)).unwrap_or(i32::MAX))
}

/// Returns how many fetched rows to keep and whether the read was truncated.
const fn split_truncated(fetched: usize, row_cap: Option<usize>) -> (usize, bool) {
    match row_cap {
        Some(cap) if fetched > cap => (cap, true),
        _ => (fetched, false),
    }
}

// ============================================================================
// SECTION: Value Mapping
// ============================================================================

/// Double-quotes a PostgreSQL identifier.
fn quote_pg_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Converts parameters to boxed `ToSql` values; named parameters are rejected.
fn pg_params(params: &QueryParams) -> Result<Vec<PgParam>, DatabaseError> {
    match params {
        QueryParams::None => Ok(Vec::new()),
        QueryParams::Positional(values) => Ok(values.iter().map(pg_param).collect()),
        QueryParams::Named(_) => {
            Err(DatabaseError::Unsupported("named parameters on postgres".to_string()))
        }
    }
}

/// Boxes one value for binding. `NULL` binds as a nullable text value.
fn pg_param(value: &Value) -> PgParam {
    match value.clone() {
        Value::Null => Box::new(Option::<String>::None),
        Value::Integer(value) => Box::new(value),
        Value::Real(value) => Box::new(value),
        Value::Text(value) => Box::new(value),
        Value::Blob(value) => Box::new(value),
    }
}

/// Reads one cell, mapping PostgreSQL types onto [`Value`].
///
/// Types without a mapping read as `NULL`.
fn pg_value(row: &postgres::Row, index: usize) -> Result<Value, postgres::Error> {
    let type_name = row.columns().get(index).map_or("", |column| column.type_().name());
    let value = match type_name {
        "bool" => row.try_get::<_, Option<bool>>(index)?.map(Value::from),
        "int2" => {
            row.try_get::<_, Option<i16>>(index)?.map(|value| Value::Integer(i64::from(value)))
        }
        "int4" => row.try_get::<_, Option<i32>>(index)?.map(Value::from),
        "int8" => row.try_get::<_, Option<i64>>(index)?.map(Value::from),
        "float4" => {
            row.try_get::<_, Option<f32>>(index)?.map(|value| Value::Real(f64::from(value)))
        }
        "float8" => row.try_get::<_, Option<f64>>(index)?.map(Value::from),
        "text" | "varchar" | "name" | "bpchar" => {
            row.try_get::<_, Option<String>>(index)?.map(Value::from)
        }
        "bytea" => row.try_get::<_, Option<Vec<u8>>>(index)?.map(Value::from),
        other => {
            debug!(column = index, type_name = other, "unmapped postgres type read as null");
            None
        }
    };
    Ok(value.unwrap_or(Value::Null))
}

#[cfg(test)]
mod tests {
    #![allow(
        clippy::panic,
        clippy::unwrap_used,
        clippy::expect_used,
        reason = "Test fixtures use explicit asserts and unwraps for clarity."
    )]

    use super::PostgresConfig;
    use super::fetch_limit;
    use super::pg_params;
    use super::quote_pg_identifier;
    use super::split_truncated;
    use crate::value::QueryParams;

    #[test]
    fn identifiers_double_embedded_quotes() {
        assert_eq!(quote_pg_identifier("a\"b"), "\"a\"\"b\"");
    }

    #[test]
    fn named_parameters_are_unsupported() {
        let err = pg_params(&QueryParams::named([("a", 1_i64)])).err().unwrap();
        assert_eq!(err.code(), "UNSUPPORTED");
        assert_eq!(pg_params(&QueryParams::positional([1_i64, 2])).unwrap().len(), 2);
    }

    #[test]
    fn dbname_is_read_from_connection_string() {
        let config = PostgresConfig {
            connection: "postgres://reader@db.internal/inventory".to_string(),
            ..PostgresConfig::default()
        };
        assert_eq!(config.dbname().as_deref(), Some("inventory"));
    }

    #[test]
    fn capped_reads_request_one_row_past_the_cap() {
        assert_eq!(fetch_limit(None), None);
        assert_eq!(fetch_limit(Some(0)), Some(1));
        assert_eq!(fetch_limit(Some(1_000)), Some(1_001));
        assert_eq!(fetch_limit(Some(usize::MAX)), Some(i32::MAX));
    }

    #[test]
    fn extra_rows_mark_results_truncated() {
        assert_eq!(split_truncated(1_001, Some(1_000)), (1_000, true));
        assert_eq!(split_truncated(1_000, Some(1_000)), (1_000, false));
        assert_eq!(split_truncated(3, Some(1_000)), (3, false));
        assert_eq!(split_truncated(50_000, None), (50_000, false));
    }
}
