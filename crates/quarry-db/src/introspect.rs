// crates/quarry-db/src/introspect.rs
// ============================================================================
// Module: Quarry SQLite Introspection
// Description: Catalog queries over sqlite_master and table pragmas.
// Purpose: Derive tables, columns, keys, FTS linkage, and hidden tables.
// Dependencies: rusqlite, serde
// ============================================================================

//! ## Overview
//! Plain functions over a borrowed [`Connection`]; the database facade runs
//! them on pooled read connections. Shared value types ([`ColumnInfo`],
//! [`ForeignKey`], [`TableForeignKeys`], [`AttachedDatabase`]) are also used
//! by the PostgreSQL backend.
//!
//! Hidden-table inference combines several rules:
//! - `sqlite_stat1..4` and names starting with `_`;
//! - FTS shadow tables (`pragma_table_list` on `SQLite` 3.37+, suffix lists
//!   otherwise);
//! - FTS virtual tables declared with `content=`;
//! - Spatialite internals when `geometry_columns` exists;
//! - then, transitively, any table named `<hidden>_...`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::collections::HashMap;

use rusqlite::Connection;
use rusqlite::OptionalExtension;
use rusqlite::params;
use serde::Serialize;

use crate::error::DatabaseError;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Row count ceiling applied by table counts; counts above it report `COUNT_LIMIT + 1`.
pub const COUNT_LIMIT: u64 = 10_000;

/// First `SQLite` minor version (3.x) exposing `pragma_table_list`.
const TABLE_LIST_MIN_MINOR: u32 = 37;

/// Spatialite bookkeeping tables hidden when `geometry_columns` exists.
const SPATIALITE_TABLES: &[&str] = &[
    "ElementaryGeometries",
    "SpatialIndex",
    "geometry_columns",
    "spatial_ref_sys",
    "spatialite_history",
    "sql_statements_log",
    "sqlite_sequence",
    "views_geometry_columns",
    "virts_geometry_columns",
    "data_licenses",
    "KNN",
    "KNN2",
];

/// Shadow-table suffixes created by FTS5.
const FTS5_SUFFIXES: &[&str] = &["_data", "_idx", "_docsize", "_content", "_config"];

/// Shadow-table suffixes created by FTS3 and FTS4.
const FTS3_SUFFIXES: &[&str] = &["_content", "_segdir", "_segments", "_stat", "_docsize"];

/// Words that must be bracket-quoted when used as identifiers.
pub const RESERVED_WORDS: &[&str] = &[
    "abort", "action", "add", "after", "all", "alter", "analyze", "and", "as", "asc", "attach",
    "autoincrement", "before", "begin", "between", "by", "cascade", "case", "cast", "check",
    "collate", "column", "commit", "conflict", "constraint", "create", "cross", "current_date",
    "current_time", "current_timestamp", "database", "default", "deferrable", "deferred", "delete",
    "desc", "detach", "distinct", "drop", "each", "else", "end", "escape", "except", "exclusive",
    "exists", "explain", "fail", "for", "foreign", "from", "full", "glob", "group", "having", "if",
    "ignore", "immediate", "in", "index", "indexed", "initially", "inner", "insert", "instead",
    "intersect", "into", "is", "isnull", "join", "key", "left", "like", "limit", "match",
    "natural", "no", "not", "notnull", "null", "of", "offset", "on", "or", "order", "outer",
    "plan", "pragma", "primary", "query", "raise", "recursive", "references", "regexp", "reindex",
    "release", "rename", "replace", "restrict", "right", "rollback", "row", "savepoint", "select",
    "set", "table", "temp", "temporary", "then", "to", "transaction", "trigger", "union", "unique",
    "update", "using", "vacuum", "values", "view", "virtual", "when", "where", "with", "without",
];

// ============================================================================
// SECTION: Types
// ============================================================================

/// One column as reported by `pragma_table_xinfo`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnInfo {
    /// Column position.
    pub cid: i64,
    /// Column name.
    pub name: String,
    /// Declared type (may be empty).
    #[serde(rename = "type")]
    pub column_type: String,
    /// Whether the column is declared `NOT NULL`.
    pub notnull: bool,
    /// Default value expression.
    pub default_value: Option<String>,
    /// 1-based position within the primary key, 0 when not part of it.
    pub is_pk: i64,
    /// 0 for ordinary columns; non-zero for hidden or generated columns.
    pub hidden: i64,
}

/// One single-column foreign key edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ForeignKey {
    /// Column on the table the edge is listed under.
    pub column: String,
    /// Table on the other end of the edge.
    pub other_table: String,
    /// Column on the other table.
    pub other_column: String,
}

/// Foreign key edges touching one table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TableForeignKeys {
    /// Edges from other tables into this one.
    pub incoming: Vec<ForeignKey>,
    /// Edges from this table to others.
    pub outgoing: Vec<ForeignKey>,
}

/// A database attached to a connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttachedDatabase {
    /// Attachment sequence number (greater than zero).
    pub seq: i64,
    /// Schema name.
    pub name: String,
    /// Backing file path (empty for memory databases).
    pub file: String,
}

/// Catalog object kinds with stored definitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefinitionKind {
    /// `CREATE TABLE`.
    Table,
    /// `CREATE VIEW`.
    View,
}

impl DefinitionKind {
    /// Returns the `sqlite_master.type` value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Table => "table",
            Self::View => "view",
        }
    }
}

// ============================================================================
// SECTION: Identifiers
// ============================================================================

/// Quotes an identifier with brackets unless it is a plain, non-reserved word.
#[must_use]
pub fn escape_sqlite(name: &str) -> String {
    if is_plain_identifier(name) && !is_reserved_word(name) {
        name.to_string()
    } else {
        format!("[{name}]")
    }
}

/// Returns true for `[A-Za-z_][A-Za-z0-9_]*`.
fn is_plain_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars.next().is_some_and(|first| first.is_ascii_alphabetic() || first == '_')
        && chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
}

/// Returns true when `name` is a reserved word (case-insensitive).
#[must_use]
pub fn is_reserved_word(name: &str) -> bool {
    let lowered = name.to_ascii_lowercase();
    RESERVED_WORDS.binary_search(&lowered.as_str()).is_ok()
}

/// Returns true when a declared type has text affinity.
#[must_use]
pub fn has_text_affinity(declared: &str) -> bool {
    let upper = declared.to_ascii_uppercase();
    !upper.contains("INT") && ["CHAR", "CLOB", "TEXT"].iter().any(|needle| upper.contains(needle))
}

// ============================================================================
// SECTION: Catalog Queries
// ============================================================================

/// Returns the linked `SQLite` library version as `(major, minor, patch)`.
#[must_use]
pub fn sqlite_version() -> (u32, u32, u32) {
    let number = u32::try_from(rusqlite::version_number()).unwrap_or(0);
    (number / 1_000_000, (number / 1_000) % 1_000, number % 1_000)
}

/// Lists object names of one type in `sqlite_master`.
fn names_of_type(connection: &Connection, kind: &str) -> Result<Vec<String>, DatabaseError> {
    let mut statement =
        connection.prepare("select name from sqlite_master where type = ?1 order by rowid")?;
    let names = statement.query_map([kind], |row| row.get(0))?.collect::<Result<_, _>>()?;
    Ok(names)
}

/// Lists table names.
///
/// # Errors
///
/// Returns [`DatabaseError::Db`] when the catalog cannot be read.
pub fn table_names(connection: &Connection) -> Result<Vec<String>, DatabaseError> {
    names_of_type(connection, "table")
}

/// Lists view names.
///
/// # Errors
///
/// Returns [`DatabaseError::Db`] when the catalog cannot be read.
pub fn view_names(connection: &Connection) -> Result<Vec<String>, DatabaseError> {
    names_of_type(connection, "view")
}

/// Returns column details for `table`, including hidden columns.
///
/// # Errors
///
/// Returns [`DatabaseError::Db`] when the pragma fails.
pub fn table_column_details(
    connection: &Connection,
    table: &str,
) -> Result<Vec<ColumnInfo>, DatabaseError> {
    let mut statement = connection.prepare(
        "select cid, name, type, \"notnull\", dflt_value, pk, hidden from pragma_table_xinfo(?1)",
    )?;
    let columns = statement
        .query_map([table], |row| {
            Ok(ColumnInfo {
                cid: row.get(0)?,
                name: row.get(1)?,
                column_type: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                notnull: row.get::<_, i64>(3)? != 0,
                default_value: row.get(4)?,
                is_pk: row.get(5)?,
                hidden: row.get(6)?,
            })
        })?
        .collect::<Result<_, _>>()?;
    Ok(columns)
}

/// Returns primary key columns in key order.
///
/// # Errors
///
/// Returns [`DatabaseError::Db`] when the pragma fails.
pub fn primary_keys(connection: &Connection, table: &str) -> Result<Vec<String>, DatabaseError> {
    let mut keyed: Vec<ColumnInfo> = table_column_details(connection, table)?
        .into_iter()
        .filter(|column| column.is_pk > 0)
        .collect();
    keyed.sort_by_key(|column| column.is_pk);
    Ok(keyed.into_iter().map(|column| column.name).collect())
}

/// Returns names of columns covered by a single-column unique index.
///
/// # Errors
///
/// Returns [`DatabaseError::Db`] when the pragmas fail.
pub fn unique_columns(connection: &Connection, table: &str) -> Result<Vec<String>, DatabaseError> {
    let mut statement = connection.prepare(
        "select il.name, (select count(*) from pragma_index_info(il.name)) as width \
         from pragma_index_list(?1) as il where il.\"unique\" = 1",
    )?;
    let indexes: Vec<(String, i64)> = statement
        .query_map([table], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<Result<_, _>>()?;
    let mut columns = Vec::new();
    for (index, width) in indexes {
        if width != 1 {
            continue;
        }
        let column: Option<String> = connection
            .query_row("select name from pragma_index_info(?1)", [&index], |row| row.get(0))
            .optional()?;
        if let Some(column) = column
            && !columns.contains(&column)
        {
            columns.push(column);
        }
    }
    Ok(columns)
}

/// Returns single-column outgoing foreign keys; compound keys are dropped.
///
/// A key declared without a target column resolves to the referenced
/// table's primary key when it has exactly one column.
///
/// # Errors
///
/// Returns [`DatabaseError::Db`] when the pragma fails.
pub fn foreign_keys_for_table(
    connection: &Connection,
    table: &str,
) -> Result<Vec<ForeignKey>, DatabaseError> {
    let mut statement = connection
        .prepare("select id, \"table\", \"from\", \"to\" from pragma_foreign_key_list(?1)")?;
    let raw: Vec<(i64, String, String, Option<String>)> = statement
        .query_map([table], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)))?
        .collect::<Result<_, _>>()?;
    let mut widths: HashMap<i64, usize> = HashMap::new();
    for (id, ..) in &raw {
        *widths.entry(*id).or_default() += 1;
    }
    let mut keys = Vec::new();
    for (id, other_table, column, to) in raw {
        if widths.get(&id).copied().unwrap_or_default() != 1 {
            continue;
        }
        let other_column = match to {
            Some(to) => to,
            None => match primary_keys(connection, &other_table)?.as_slice() {
                [only] => only.clone(),
                _ => continue,
            },
        };
        keys.push(ForeignKey {
            column,
            other_table,
            other_column,
        });
    }
    Ok(keys)
}

/// Builds the incoming/outgoing foreign key graph for every table.
///
/// # Errors
///
/// Returns [`DatabaseError::Db`] when the catalog cannot be read.
pub fn get_all_foreign_keys(
    connection: &Connection,
) -> Result<BTreeMap<String, TableForeignKeys>, DatabaseError> {
    foreign_key_graph(table_names(connection)?, |table| foreign_keys_for_table(connection, table))
}

/// Assembles the foreign key graph from per-table outgoing edges.
///
/// Edges pointing at tables that are not in `tables` are skipped.
///
/// # Errors
///
/// Propagates the first error returned by `outgoing`.
pub fn foreign_key_graph<F>(
    tables: Vec<String>,
    mut outgoing: F,
) -> Result<BTreeMap<String, TableForeignKeys>, DatabaseError>
where
    F: FnMut(&str) -> Result<Vec<ForeignKey>, DatabaseError>,
{
    let mut graph: BTreeMap<String, TableForeignKeys> =
        tables.iter().map(|table| (table.clone(), TableForeignKeys::default())).collect();
    for table in &tables {
        for key in outgoing(table)? {
            let Some(target) = graph.get_mut(&key.other_table) else {
                continue;
            };
            target.incoming.push(ForeignKey {
                column: key.other_column.clone(),
                other_table: table.clone(),
                other_column: key.column.clone(),
            });
            if let Some(source) = graph.get_mut(table) {
                source.outgoing.push(key);
            }
        }
    }
    Ok(graph)
}

/// Returns the FTS virtual table indexing `table`, if any.
///
/// # Errors
///
/// Returns [`DatabaseError::Db`] when the catalog cannot be read.
pub fn detect_fts(connection: &Connection, table: &str) -> Result<Option<String>, DatabaseError> {
    let name = connection
        .query_row(
            "select name from sqlite_master where rootpage = 0 and (\
             sql like '%VIRTUAL TABLE%USING FTS%content=' || char(34) || ?1 || char(34) || '%' \
             or sql like '%VIRTUAL TABLE%USING FTS%content=' || char(39) || ?1 || char(39) || '%' \
             or sql like '%VIRTUAL TABLE%USING FTS%content=[' || ?1 || ']%' \
             or (tbl_name = ?1 and sql like '%VIRTUAL TABLE%USING FTS%'))",
            [table],
            |row| row.get(0),
        )
        .optional()?;
    Ok(name)
}

/// Returns true when the database carries Spatialite metadata.
///
/// # Errors
///
/// Returns [`DatabaseError::Db`] when the catalog cannot be read.
pub fn detect_spatialite(connection: &Connection) -> Result<bool, DatabaseError> {
    let found: Option<i64> = connection
        .query_row(
            "select 1 from sqlite_master where type = 'table' and name = 'geometry_columns'",
            [],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Infers hidden tables from the schema, before prefix expansion.
///
/// # Errors
///
/// Returns [`DatabaseError::Db`] when the catalog cannot be read.
pub fn inferred_hidden_tables(connection: &Connection) -> Result<BTreeSet<String>, DatabaseError> {
    let mut hidden = BTreeSet::new();
    collect_names(
        connection,
        "select name from sqlite_master where name in \
         ('sqlite_stat1', 'sqlite_stat2', 'sqlite_stat3', 'sqlite_stat4') \
         or substr(name, 1, 1) = '_'",
        &mut hidden,
    )?;
    if sqlite_version().1 >= TABLE_LIST_MIN_MINOR {
        collect_names(
            connection,
            "select name from pragma_table_list where type = 'shadow'",
            &mut hidden,
        )?;
    } else {
        collect_fts_suffixes(connection, &mut hidden)?;
    }
    collect_names(
        connection,
        "select name from sqlite_master where sql like '%VIRTUAL TABLE%' \
         and sql like '%USING FTS%' and sql like '%content=%'",
        &mut hidden,
    )?;
    if detect_spatialite(connection)? {
        hidden.extend(SPATIALITE_TABLES.iter().map(|name| (*name).to_string()));
        collect_names(
            connection,
            "select name from sqlite_master where name like 'idx_%' and type = 'table'",
            &mut hidden,
        )?;
    }
    Ok(hidden)
}

/// Runs a single-column name query, adding every result to `names`.
fn collect_names(
    connection: &Connection,
    sql: &str,
    names: &mut BTreeSet<String>,
) -> Result<(), DatabaseError> {
    let mut statement = connection.prepare(sql)?;
    for name in statement.query_map([], |row| row.get::<_, String>(0))? {
        names.insert(name?);
    }
    Ok(())
}

/// Adds FTS shadow tables derived from known suffixes.
fn collect_fts_suffixes(
    connection: &Connection,
    hidden: &mut BTreeSet<String>,
) -> Result<(), DatabaseError> {
    let mut statement = connection.prepare(
        "select name, sql from sqlite_master where sql like '%VIRTUAL TABLE%USING FTS%'",
    )?;
    let virtual_tables: Vec<(String, String)> =
        statement.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?.collect::<Result<_, _>>()?;
    for (name, sql) in virtual_tables {
        let upper = sql.to_ascii_uppercase();
        let suffixes = if upper.contains("USING FTS3") || upper.contains("USING FTS4") {
            FTS3_SUFFIXES
        } else {
            FTS5_SUFFIXES
        };
        hidden.extend(suffixes.iter().map(|suffix| format!("{name}{suffix}")));
    }
    Ok(())
}

/// Expands `seed` with every table whose name starts with `<hidden>_`,
/// repeating until no new names are added.
#[must_use]
pub fn expand_hidden(tables: &[String], seed: BTreeSet<String>) -> BTreeSet<String> {
    let mut hidden = seed;
    loop {
        let added: Vec<String> = tables
            .iter()
            .filter(|table| !hidden.contains(*table))
            .filter(|table| hidden.iter().any(|prefix| table.starts_with(&format!("{prefix}_"))))
            .cloned()
            .collect();
        if added.is_empty() {
            return hidden;
        }
        hidden.extend(added);
    }
}

/// Returns the stored definition of a table or view plus its indexes.
///
/// Each statement ends with `;` and statements are newline separated.
///
/// # Errors
///
/// Returns [`DatabaseError::Db`] when the catalog cannot be read.
pub fn get_definition(
    connection: &Connection,
    name: &str,
    kind: DefinitionKind,
) -> Result<Option<String>, DatabaseError> {
    let sql: Option<Option<String>> = connection
        .query_row(
            "select sql from sqlite_master where name = ?1 and type = ?2",
            params![name, kind.as_str()],
            |row| row.get(0),
        )
        .optional()?;
    let Some(Some(sql)) = sql else {
        return Ok(None);
    };
    let mut parts = vec![format!("{sql};")];
    let mut statement = connection.prepare(
        "select sql from sqlite_master where tbl_name = ?1 and type = 'index' and sql is not null",
    )?;
    for index in statement.query_map([name], |row| row.get::<_, String>(0))? {
        parts.push(format!("{};", index?));
    }
    Ok(Some(parts.join("\n")))
}

/// Lists attached databases (the main and temp schemas are excluded).
///
/// # Errors
///
/// Returns [`DatabaseError::Db`] when the pragma fails.
pub fn attached_databases(connection: &Connection) -> Result<Vec<AttachedDatabase>, DatabaseError> {
    let mut statement =
        connection.prepare("select seq, name, file from pragma_database_list where seq > 0")?;
    let attached = statement
        .query_map([], |row| {
            Ok(AttachedDatabase {
                seq: row.get(0)?,
                name: row.get(1)?,
                file: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(attached.into_iter().filter(|db| db.name != "temp").collect())
}

/// Returns the SQL used to count rows of `table`, capped at [`COUNT_LIMIT`] + 1.
#[must_use]
pub fn count_sql(table: &str) -> String {
    format!(
        "select count(*) from (select * from {} limit {})",
        escape_sqlite(table),
        COUNT_LIMIT + 1
    )
}

// ============================================================================
// SECTION: Label Columns
// ============================================================================

/// Picks a human-readable label column.
///
/// Rules in order: the single unique text column; the first column named
/// `name` or `title` (any case); the non-key column of a two-column table
/// with an `id` or `pk` column.
#[must_use]
pub fn infer_label_column(columns: &[String], unique_text_columns: &[String]) -> Option<String> {
    if let [only] = unique_text_columns {
        return Some(only.clone());
    }
    if let Some(named) = columns.iter().find(|column| {
        let lowered = column.to_ascii_lowercase();
        lowered == "name" || lowered == "title"
    }) {
        return Some(named.clone());
    }
    let is_key = |column: &String| column == "id" || column == "pk";
    if columns.len() == 2 && columns.iter().any(is_key) && !columns.iter().all(is_key) {
        return columns.iter().find(|column| !is_key(column)).cloned();
    }
    None
}

#[cfg(test)]
mod tests {
    #![allow(
        clippy::panic,
        clippy::unwrap_used,
        clippy::expect_used,
        reason = "Test fixtures use explicit asserts and unwraps for clarity."
    )]

    use std::collections::BTreeSet;

    use rusqlite::Connection;

    use super::DefinitionKind;
    use super::RESERVED_WORDS;
    use super::escape_sqlite;
    use super::expand_hidden;
    use super::foreign_keys_for_table;
    use super::get_all_foreign_keys;
    use super::get_definition;
    use super::infer_label_column;
    use super::primary_keys;
    use super::unique_columns;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|item| (*item).to_string()).collect()
    }

    #[test]
    fn reserved_words_are_sorted_for_binary_search() {
        let mut sorted = RESERVED_WORDS.to_vec();
        sorted.sort_unstable();
        assert_eq!(sorted, RESERVED_WORDS);
    }

    #[test]
    fn escaping_brackets_reserved_and_irregular_names() {
        assert_eq!(escape_sqlite("plain_name"), "plain_name");
        assert_eq!(escape_sqlite("Select"), "[Select]");
        assert_eq!(escape_sqlite("has space"), "[has space]");
        assert_eq!(escape_sqlite("1st"), "[1st]");
    }

    #[test]
    fn hidden_prefixes_expand_transitively() {
        let tables = strings(&["docs", "docs_fts", "docs_fts_data", "docs_fts_data_x", "docsx"]);
        let seed: BTreeSet<String> = ["docs_fts".to_string()].into();
        let hidden = expand_hidden(&tables, seed);
        assert!(hidden.contains("docs_fts_data_x"));
        assert!(!hidden.contains("docs"));
        assert!(!hidden.contains("docsx"));
    }

    #[test]
    fn label_column_rules_apply_in_order() {
        assert_eq!(
            infer_label_column(&strings(&["id", "code", "title"]), &strings(&["code"])),
            Some("code".to_string())
        );
        assert_eq!(
            infer_label_column(&strings(&["id", "Name", "x"]), &[]),
            Some("Name".to_string())
        );
        assert_eq!(infer_label_column(&strings(&["pk", "label"]), &[]), Some("label".to_string()));
        assert_eq!(infer_label_column(&strings(&["id", "pk"]), &[]), None);
        assert_eq!(infer_label_column(&strings(&["a", "b", "c"]), &[]), None);
    }

    #[test]
    fn schema_helpers_read_keys_and_definitions() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "create table owners (id integer primary key, email text unique);
             create table pets (id integer primary key, owner_id integer references owners(id),
                                a integer, b integer, foreign key (a, b) references pair(x, y));
             create table pair (x integer, y integer, primary key (y, x));
             create index pets_owner on pets(owner_id);",
        )
        .unwrap();
        assert_eq!(primary_keys(&conn, "pair").unwrap(), strings(&["y", "x"]));
        assert_eq!(unique_columns(&conn, "owners").unwrap(), strings(&["email"]));
        let outgoing = foreign_keys_for_table(&conn, "pets").unwrap();
        assert_eq!(outgoing.len(), 1);
        assert_eq!(outgoing[0].other_table, "owners");
        let graph = get_all_foreign_keys(&conn).unwrap();
        assert_eq!(graph["owners"].incoming[0].other_table, "pets");
        assert_eq!(graph["owners"].incoming[0].other_column, "owner_id");
        let definition = get_definition(&conn, "pets", DefinitionKind::Table).unwrap().unwrap();
        assert!(
            definition.starts_with("CREATE TABLE pets")
                || definition.starts_with("create table pets")
        );
        assert!(definition.ends_with("create index pets_owner on pets(owner_id);"));
        assert!(get_definition(&conn, "pets", DefinitionKind::View).unwrap().is_none());
    }
}
