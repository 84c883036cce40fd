// crates/quarry-db/tests/introspection.rs
// ============================================================================
// Module: Schema Introspection Tests
// Description: Catalog helpers, hidden tables, counts, and file metadata.
// Purpose: Validate introspection against real database files, including
//          the immutable-only caching of counts and content hashes.
// ============================================================================

//! ## Overview
//! Integration tests for the introspection surface of [`Database`]:
//! - Count caching for immutable files versus recounting for mutable ones
//! - Per-table count failures reported as unknown
//! - Hidden table inference for full-text indexes and private tables
//! - Foreign key graphs, definitions, and attached databases
//! - Content hash, size, and color metadata

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only assertions and helpers are permitted."
)]

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use quarry_db::Database;
use quarry_db::DatabaseOptions;
use quarry_db::DatabaseRegistry;
use quarry_db::DatabaseSource;
use quarry_db::FileMode;
use quarry_db::ForeignKey;
use quarry_db::QueryParams;
use quarry_db::Settings;
use quarry_db::hashing::hash_file;
use rusqlite::Connection;
use tempfile::TempDir;

// ============================================================================
// SECTION: Helpers
// ============================================================================

fn create_file(dir: &TempDir, name: &str, schema: &str) -> PathBuf {
    let path = dir.path().join(name);
    let connection = Connection::open(&path).unwrap();
    connection.execute_batch(schema).unwrap();
    drop(connection);
    path
}

fn open_file(registry: &DatabaseRegistry, path: &Path, mode: FileMode) -> Arc<Database> {
    registry
        .add_database(
            &DatabaseSource::File {
                path: path.to_path_buf(),
                mode,
            },
            None,
            DatabaseOptions::default(),
        )
        .unwrap()
}

fn count_queries(db: &Database) -> u64 {
    db.backend().as_sqlite().unwrap().stats().count_queries
}

const COUNTED_SCHEMA: &str = "
    create table birds (id integer primary key, name text);
    create table trees (id integer primary key, name text);
    insert into birds (name) values ('wren'), ('kite'), ('rook');
    insert into trees (name) values ('oak');
";

// ============================================================================
// SECTION: Table Counts
// ============================================================================

#[test]
fn immutable_counts_are_computed_once() {
    let dir = TempDir::new().unwrap();
    let path = create_file(&dir, "fixed.db", COUNTED_SCHEMA);
    let registry = DatabaseRegistry::new(Settings::default()).unwrap();
    let db = open_file(&registry, &path, FileMode::Immutable);

    let first = db.table_counts(Some(1_000)).unwrap();
    let second = db.table_counts(Some(1_000)).unwrap();

    assert_eq!(first, second);
    assert_eq!(first.get("birds"), Some(&Some(3)));
    assert_eq!(first.get("trees"), Some(&Some(1)));
    assert_eq!(count_queries(&db), 2);
}

#[test]
fn mutable_counts_are_recomputed_every_call() {
    let dir = TempDir::new().unwrap();
    let path = create_file(&dir, "live.db", COUNTED_SCHEMA);
    let registry = DatabaseRegistry::new(Settings::default()).unwrap();
    let db = open_file(&registry, &path, FileMode::Mutable);

    let before = db.table_counts(Some(1_000)).unwrap();
    db.execute_write("insert into trees (name) values ('ash')", QueryParams::None, true).unwrap();
    let after = db.table_counts(Some(1_000)).unwrap();

    assert_eq!(before.get("trees"), Some(&Some(1)));
    assert_eq!(after.get("trees"), Some(&Some(2)));
    assert_eq!(count_queries(&db), 4);
}

#[test]
fn counts_stop_at_the_count_limit() {
    let dir = TempDir::new().unwrap();
    let path = create_file(
        &dir,
        "big.db",
        "create table big (x integer);
         with recursive c(x) as (select 1 union all select x + 1 from c where x < 10050)
         insert into big select x from c;",
    );
    let registry = DatabaseRegistry::new(Settings::default()).unwrap();
    let db = open_file(&registry, &path, FileMode::Immutable);
    let counts = db.table_counts(Some(1_000)).unwrap();
    assert_eq!(counts.get("big"), Some(&Some(10_001)));
}

#[test]
fn failing_tables_count_as_unknown_without_failing_the_call() {
    let dir = TempDir::new().unwrap();
    let path = create_file(
        &dir,
        "partial.db",
        "create table small (id integer primary key);
         insert into small default values;
         pragma writable_schema = on;
         insert into sqlite_master (type, name, tbl_name, rootpage, sql)
         values (
             'table', 'ghost', 'ghost', 0,
             'CREATE VIRTUAL TABLE ghost USING missing_module(x)'
         );
         pragma writable_schema = off;",
    );
    let registry = DatabaseRegistry::new(Settings::default()).unwrap();
    let db = open_file(&registry, &path, FileMode::Immutable);

    let counts = db.table_counts(Some(1_000)).unwrap();
    assert_eq!(counts.get("ghost"), Some(&None));
    assert_eq!(counts.get("small"), Some(&Some(1)));
    assert_eq!(count_queries(&db), 2);
}

#[test]
fn immutable_files_reject_writes() {
    let dir = TempDir::new().unwrap();
    let path = create_file(&dir, "frozen.db", COUNTED_SCHEMA);
    let registry = DatabaseRegistry::new(Settings::default()).unwrap();
    let db = open_file(&registry, &path, FileMode::Immutable);
    let err = db.execute_write("delete from birds", QueryParams::None, true).unwrap_err();
    assert_eq!(err.code(), "DATABASE_IMMUTABLE");
    assert!(!db.is_mutable());
}

// ============================================================================
// SECTION: Hidden Tables
// ============================================================================

#[test]
fn full_text_indexes_and_private_tables_are_hidden() {
    let dir = TempDir::new().unwrap();
    let path = create_file(
        &dir,
        "search.db",
        "create table searchable (pk integer primary key, text1 text, text2 text);
         create virtual table searchable_fts using fts4 (text1, text2, content=\"searchable\");
         create virtual table notes_fts using fts4 (body);
         create table _private (secret text);
         create table visible (id integer primary key);",
    );
    let registry = DatabaseRegistry::new(Settings::default()).unwrap();
    let db = open_file(&registry, &path, FileMode::Mutable);

    let hidden = db.hidden_table_names().unwrap();
    for expected in [
        "_private",
        "notes_fts_content",
        "notes_fts_segdir",
        "notes_fts_segments",
        "searchable_fts",
        "searchable_fts_segdir",
        "searchable_fts_segments",
        "searchable_fts_docsize",
        "searchable_fts_stat",
    ] {
        assert!(
            hidden.iter().any(|name| name == expected),
            "{expected} should be hidden: {hidden:?}"
        );
    }
    for visible in ["searchable", "visible", "notes_fts"] {
        assert!(!hidden.iter().any(|name| name == visible), "{visible} should be visible");
    }
    assert_eq!(db.fts_table("searchable").unwrap().as_deref(), Some("searchable_fts"));
    assert_eq!(db.fts_table("visible").unwrap(), None);
}

// ============================================================================
// SECTION: Catalog
// ============================================================================

#[test]
fn foreign_key_graph_lists_both_directions() {
    let dir = TempDir::new().unwrap();
    let path = create_file(
        &dir,
        "library.db",
        "create table authors (id integer primary key, name text);
         create table books (
             id integer primary key, author_id integer references authors (id), title text
         );
         create table reviews (id integer primary key, book_id integer references books, body text);
         create index books_title on books (title);
         create view long_books as select * from books where length(title) > 20;",
    );
    let registry = DatabaseRegistry::new(Settings::default()).unwrap();
    let db = open_file(&registry, &path, FileMode::Immutable);

    assert_eq!(db.table_names().unwrap(), vec!["authors", "books", "reviews"]);
    assert_eq!(db.view_names().unwrap(), vec!["long_books"]);
    assert!(db.view_exists("long_books").unwrap());
    assert_eq!(db.table_columns("books").unwrap(), vec!["id", "author_id", "title"]);
    assert_eq!(db.primary_keys("books").unwrap(), vec!["id"]);

    let reviews = db.foreign_keys_for_table("reviews").unwrap();
    assert_eq!(
        reviews,
        vec![ForeignKey {
            column: "book_id".to_string(),
            other_table: "books".to_string(),
            other_column: "id".to_string(),
        }]
    );

    let graph = db.get_all_foreign_keys().unwrap();
    let authors = &graph["authors"];
    assert!(authors.outgoing.is_empty());
    assert_eq!(
        authors.incoming,
        vec![ForeignKey {
            column: "id".to_string(),
            other_table: "books".to_string(),
            other_column: "author_id".to_string(),
        }]
    );
    assert_eq!(graph["books"].incoming.len(), 1);
    assert_eq!(graph["books"].outgoing.len(), 1);

    let definition = db.get_table_definition("books").unwrap().unwrap();
    assert!(
        definition.starts_with("CREATE TABLE books") || definition.starts_with("create table books")
    );
    assert!(definition.contains("books_title"));
    assert!(db.get_view_definition("long_books").unwrap().is_some());
    assert_eq!(db.get_table_definition("missing").unwrap(), None);
    assert_eq!(db.label_column_for_table("authors").unwrap().as_deref(), Some("name"));
}

#[test]
fn prepare_hooks_can_attach_databases() {
    let dir = TempDir::new().unwrap();
    let main = create_file(&dir, "main.db", "create table t (id integer primary key);");
    let extra = create_file(&dir, "extra.db", "create table e (id integer primary key);");
    let attach = format!("attach database '{}' as extra", extra.display());
    let hook: quarry_db::PrepareHook = Arc::new(move |connection: &Connection| {
        connection.execute_batch(&attach)?;
        Ok(())
    });
    let registry = DatabaseRegistry::new(Settings::default()).unwrap();
    let db = registry
        .add_database(
            &DatabaseSource::File {
                path: main,
                mode: FileMode::Mutable,
            },
            Some("main"),
            DatabaseOptions {
                hooks: vec![hook],
                ..DatabaseOptions::default()
            },
        )
        .unwrap();

    let attached = db.attached_databases().unwrap();
    assert_eq!(attached.len(), 1);
    assert_eq!(attached[0].name, "extra");
    let count = db
        .execute(
            "select count(*) from extra.e",
            &QueryParams::None,
            quarry_db::QueryOptions::default(),
        )
        .unwrap();
    assert_eq!(count.len(), 1);
}

// ============================================================================
// SECTION: Metadata
// ============================================================================

#[test]
fn immutable_files_expose_hash_size_and_color() {
    let dir = TempDir::new().unwrap();
    let path = create_file(&dir, "fingerprint.db", COUNTED_SCHEMA);
    let registry = DatabaseRegistry::new(Settings::default()).unwrap();
    let db = open_file(&registry, &path, FileMode::Immutable);

    let hash = db.hash().unwrap().unwrap();
    assert_eq!(hash, hash_file(&path).unwrap());
    assert_eq!(db.color().unwrap(), hash[.. 6]);
    assert_eq!(db.size().unwrap(), std::fs::metadata(&path).unwrap().len());
    assert!(db.mtime_ns().unwrap().is_some());
    assert_eq!(db.name(), "fingerprint");
}

#[test]
fn mutable_files_have_no_content_hash() {
    let dir = TempDir::new().unwrap();
    let path = create_file(&dir, "changing.db", COUNTED_SCHEMA);
    let registry = DatabaseRegistry::new(Settings::default()).unwrap();
    let db = open_file(&registry, &path, FileMode::Mutable);
    assert_eq!(db.hash().unwrap(), None);
    assert_eq!(db.color().unwrap().len(), 6);
    assert!(db.size().unwrap() > 0);
}
