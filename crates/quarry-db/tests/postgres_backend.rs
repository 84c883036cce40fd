// crates/quarry-db/tests/postgres_backend.rs
// ============================================================================
// Module: PostgreSQL Backend Tests
// Description: Configuration and failure paths of the PostgreSQL backend.
// Purpose: Validate construction, capability reporting, and error mapping
//          without a live server.
// ============================================================================

//! ## Overview
//! These tests never reach a running server:
//! - Unparsable connection strings fail at construction
//! - Unreachable servers surface as connection failures on first use
//! - Write and file-metadata operations report unsupported capabilities
//! - Closed backends refuse further reads

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

use quarry_db::BackendKind;
use quarry_db::DatabaseOptions;
use quarry_db::DatabaseRegistry;
use quarry_db::DatabaseSource;
use quarry_db::PostgresConfig;
use quarry_db::QueryOptions;
use quarry_db::QueryParams;
use quarry_db::Settings;

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Points at a closed local port so connects are refused quickly.
fn unreachable_config() -> PostgresConfig {
    PostgresConfig {
        connection: "postgres://quarry@127.0.0.1:1/inventory".to_string(),
        max_connections: 1,
        connect_timeout_ms: 250,
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[test]
fn malformed_connection_strings_fail_at_construction() {
    let registry = DatabaseRegistry::new(Settings::default()).unwrap();
    let config = PostgresConfig {
        connection: "postgres://quarry@localhost:notaport/db".to_string(),
        ..PostgresConfig::default()
    };
    let err = registry
        .add_database(&DatabaseSource::Postgres(config), None, DatabaseOptions::default())
        .unwrap_err();
    assert_eq!(err.code(), "CONNECTION_FAILED");
    assert!(registry.database_names().is_empty());
}

#[test]
fn unreachable_servers_report_connection_failures() {
    let registry = DatabaseRegistry::new(Settings::default()).unwrap();
    let db = registry
        .add_database(
            &DatabaseSource::Postgres(unreachable_config()),
            None,
            DatabaseOptions::default(),
        )
        .unwrap();
    assert_eq!(db.name(), "inventory");
    assert_eq!(db.kind(), BackendKind::Remote);

    let err = db.execute("select 1", &QueryParams::None, QueryOptions::default()).unwrap_err();
    assert_eq!(err.code(), "CONNECTION_FAILED");
    assert_eq!(db.table_names().unwrap_err().code(), "CONNECTION_FAILED");
}

#[test]
fn sqlite_only_operations_are_unsupported() {
    let registry = DatabaseRegistry::new(Settings::default()).unwrap();
    let db = registry
        .add_database(
            &DatabaseSource::Postgres(unreachable_config()),
            Some("remote"),
            DatabaseOptions::default(),
        )
        .unwrap();
    assert_eq!(db.execute_write_script("select 1", true).unwrap_err().code(), "UNSUPPORTED");
    assert_eq!(db.execute_fn(|_conn| Ok(())).unwrap_err().code(), "UNSUPPORTED");
    assert_eq!(db.hash().unwrap(), None);
    assert_eq!(db.mtime_ns().unwrap(), None);
    assert_eq!(db.attached_databases().unwrap(), Vec::new());
    assert_eq!(db.hidden_table_names().unwrap_err().code(), "CONNECTION_FAILED");
}

#[test]
fn closed_backends_refuse_reads() {
    let registry = DatabaseRegistry::new(Settings::default()).unwrap();
    let db = registry
        .add_database(
            &DatabaseSource::Postgres(unreachable_config()),
            Some("remote"),
            DatabaseOptions::default(),
        )
        .unwrap();
    assert!(registry.remove_database("remote"));
    let err = db.execute("select 1", &QueryParams::None, QueryOptions::default()).unwrap_err();
    assert_eq!(err.code(), "DATABASE_CLOSED");
}
