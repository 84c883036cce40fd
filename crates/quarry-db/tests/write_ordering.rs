// crates/quarry-db/tests/write_ordering.rs
// ============================================================================
// Module: Single Writer Ordering Tests
// Description: FIFO execution and failure isolation for database write queues.
// Purpose: Validate that writes run one at a time, in queue order, and that
//          failing or panicking jobs never stall the queue.
// ============================================================================

//! ## Overview
//! Integration tests for the write path of [`Database`]:
//! - Queue-order execution across concurrent submitters
//! - No two jobs running at once
//! - Errors and panics delivered to their callers while later jobs proceed
//! - Three staggered blocking inserts landing in submission order
//! - A failed write-connection open replayed to every later job

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

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use quarry_db::Database;
use quarry_db::DatabaseError;
use quarry_db::DatabaseOptions;
use quarry_db::DatabaseRegistry;
use quarry_db::DatabaseSource;
use quarry_db::FileMode;
use quarry_db::QueryOptions;
use quarry_db::QueryParams;
use quarry_db::Settings;
use quarry_db::Value;
use quarry_db::WriteOptions;
use quarry_db::WriteReply;
use tempfile::TempDir;

// ============================================================================
// SECTION: Helpers
// ============================================================================

fn memory_database(registry: &DatabaseRegistry, name: &str) -> Arc<Database> {
    let db = registry.add_memory_database(name).unwrap();
    db.execute_write_script("create table t (id integer primary key, v text)", true).unwrap();
    db
}

fn values(db: &Database) -> Vec<String> {
    db.execute("select v from t order by id", &QueryParams::None, QueryOptions::default())
        .unwrap()
        .column_values(0_usize)
        .into_iter()
        .map(|value| value.as_str().unwrap().to_string())
        .collect()
}

// ============================================================================
// SECTION: FIFO
// ============================================================================

#[test]
fn jobs_run_one_at_a_time_in_queue_order() {
    let registry = DatabaseRegistry::new(Settings::default()).unwrap();
    let db = memory_database(&registry, "quarry_writes_fifo");
    let log = Arc::new(Mutex::new(Vec::new()));
    let running = Arc::new(AtomicBool::new(false));
    let overlaps = Arc::new(AtomicUsize::new(0));

    let submitters: Vec<_> = (0 .. 4)
        .map(|submitter| {
            let db = Arc::clone(&db);
            let log = Arc::clone(&log);
            let running = Arc::clone(&running);
            let overlaps = Arc::clone(&overlaps);
            thread::spawn(move || {
                (0 .. 10)
                    .map(|index| {
                        let marker = format!("{submitter}-{index}");
                        let log = Arc::clone(&log);
                        let running = Arc::clone(&running);
                        let overlaps = Arc::clone(&overlaps);
                        let job_marker = marker.clone();
                        let reply = db
                            .execute_write_fn(
                                move |conn| {
                                    if running.swap(true, Ordering::SeqCst) {
                                        overlaps.fetch_add(1, Ordering::SeqCst);
                                    }
                                    conn.execute("insert into t (v) values (?1)", [&job_marker])?;
                                    log.lock().unwrap().push(job_marker);
                                    running.store(false, Ordering::SeqCst);
                                    Ok(())
                                },
                                false,
                            )
                            .unwrap();
                        let WriteReply::Queued(ticket) = reply else {
                            panic!("non-blocking submission returned a completed reply");
                        };
                        (ticket.id(), marker, ticket)
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut submitted = Vec::new();
    for submitter in submitters {
        for (id, marker, ticket) in submitter.join().unwrap() {
            ticket.wait().unwrap();
            submitted.push((id, marker));
        }
    }
    submitted.sort_by_key(|(id, _)| *id);
    let expected: Vec<String> = submitted.into_iter().map(|(_, marker)| marker).collect();

    assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    assert_eq!(*log.lock().unwrap(), expected);
    assert_eq!(values(&db), expected);
}

/// Holds the writer, then issues three staggered blocking inserts.
fn assert_staggered_inserts_land_in_order(db: &Arc<Database>) {
    let (gate_tx, gate_rx) = mpsc::channel::<()>();
    let gate = db
        .execute_write_fn(
            move |_conn| {
                let _ = gate_rx.recv_timeout(Duration::from_secs(10));
                Ok(())
            },
            false,
        )
        .unwrap();

    let callers: Vec<_> = ["a", "b", "c"]
        .into_iter()
        .map(|value| {
            let db = Arc::clone(db);
            let handle = thread::spawn(move || {
                db.execute_write(
                    "insert into t (v) values (?1)",
                    QueryParams::positional([value]),
                    true,
                )
                .unwrap()
                .into_value()
                .unwrap()
            });
            thread::sleep(Duration::from_millis(60));
            handle
        })
        .collect();

    gate_tx.send(()).unwrap();
    gate.into_value().unwrap();
    let rowids: Vec<i64> =
        callers.into_iter().map(|caller| caller.join().unwrap().last_insert_rowid).collect();

    assert_eq!(rowids, vec![1, 2, 3]);
    assert_eq!(values(db), vec!["a", "b", "c"]);
}

#[test]
fn staggered_blocking_inserts_land_in_submission_order() {
    let registry = DatabaseRegistry::new(Settings::default()).unwrap();
    let db = memory_database(&registry, "quarry_writes_abc");
    assert_staggered_inserts_land_in_order(&db);
}

#[test]
fn anonymous_memory_databases_keep_writes_visible_to_reads() {
    let registry = DatabaseRegistry::new(Settings::default()).unwrap();
    let db = registry
        .add_database(
            &DatabaseSource::Memory {
                name: None,
            },
            None,
            DatabaseOptions::default(),
        )
        .unwrap();
    db.execute_write_script("create table t (id integer primary key, v text)", true).unwrap();
    assert_eq!(db.table_names().unwrap(), vec!["t".to_string()]);
    assert_staggered_inserts_land_in_order(&db);

    let other = registry
        .add_database(
            &DatabaseSource::Memory {
                name: None,
            },
            None,
            DatabaseOptions::default(),
        )
        .unwrap();
    assert!(other.table_names().unwrap().is_empty());
}

// ============================================================================
// SECTION: Failure Isolation
// ============================================================================

#[test]
fn failing_jobs_report_errors_and_later_jobs_still_run() {
    let registry = DatabaseRegistry::new(Settings::default()).unwrap();
    let db = memory_database(&registry, "quarry_writes_failure");

    let failing = db
        .execute_write_fn(
            |conn| {
                conn.execute("insert into t (v) values ('discarded')", [])?;
                Err::<(), _>(DatabaseError::WriteJob("validation failed".to_string()))
            },
            false,
        )
        .unwrap();
    let panicking = db
        .execute_write_fn(|_conn| -> Result<(), DatabaseError> { panic!("job exploded") }, false)
        .unwrap();
    let bad_sql =
        db.execute_write("insert into missing values (1)", QueryParams::None, false).unwrap();
    let good =
        db.execute_write("insert into t (v) values ('kept')", QueryParams::None, false).unwrap();

    assert_eq!(failing.into_value().unwrap_err().code(), "WRITE_JOB_FAILED");
    let panic_err = panicking.into_value().unwrap_err();
    assert_eq!(panic_err.code(), "WRITE_JOB_FAILED");
    assert!(panic_err.to_string().contains("job exploded"));
    assert_eq!(bad_sql.into_value().unwrap_err().code(), "DATABASE_ERROR");
    assert_eq!(good.into_value().unwrap().rows_affected, 1);
    assert_eq!(values(&db), vec!["kept"]);
}

#[test]
fn blocking_callers_receive_job_errors_directly() {
    let registry = DatabaseRegistry::new(Settings::default()).unwrap();
    let db = memory_database(&registry, "quarry_writes_blocking_error");
    let err =
        db.execute_write("insert into t (nope) values (1)", QueryParams::None, true).unwrap_err();
    assert_eq!(err.code(), "DATABASE_ERROR");
    assert!(db.execute_write("insert into t (v) values ('x')", QueryParams::None, true).is_ok());
}

#[test]
fn non_transactional_jobs_manage_their_own_transactions() {
    let registry = DatabaseRegistry::new(Settings::default()).unwrap();
    let db = memory_database(&registry, "quarry_writes_manual_tx");

    let reply = db
        .execute_write_fn_with(
            |conn| {
                conn.execute_batch("begin; insert into t (v) values ('left open')")?;
                Err::<(), _>(DatabaseError::WriteJob("abandoned".to_string()))
            },
            WriteOptions::without_transaction(),
            true,
        )
        .unwrap_err();
    assert_eq!(reply.code(), "WRITE_JOB_FAILED");

    db.execute_write_fn_with(
        |conn| {
            conn.execute_batch("begin; insert into t (v) values ('committed'); commit")?;
            Ok(())
        },
        WriteOptions::without_transaction(),
        true,
    )
    .unwrap();
    assert_eq!(values(&db), vec!["committed"]);
}

#[test]
fn write_many_and_scripts_share_the_queue() {
    let registry = DatabaseRegistry::new(Settings::default()).unwrap();
    let db = memory_database(&registry, "quarry_writes_many");
    let rows = ["x", "y", "z"].into_iter().map(|v| QueryParams::positional([v])).collect();
    let outcome = db
        .execute_write_many("insert into t (v) values (?1)", rows, true)
        .unwrap()
        .into_value()
        .unwrap();
    assert_eq!(outcome.executions, 3);
    assert_eq!(outcome.rows_affected, 3);

    db.execute_write_script("update t set v = upper(v); delete from t where v = 'Y'", true)
        .unwrap();
    assert_eq!(values(&db), vec!["X", "Z"]);

    let count = db
        .execute("select count(*) from t", &QueryParams::None, QueryOptions::default())
        .unwrap()
        .single_value()
        .unwrap()
        .cloned();
    assert_eq!(count, Some(Value::Integer(2)));
}

// ============================================================================
// SECTION: Writer Open Failure
// ============================================================================

#[test]
fn failed_writer_open_is_replayed_without_retry() {
    let dir = TempDir::new().unwrap();
    let parent = dir.path().join("not_yet_created");
    let registry = DatabaseRegistry::new(Settings::default()).unwrap();
    let db = registry
        .add_database(
            &DatabaseSource::File {
                path: parent.join("unreachable.db"),
                mode: FileMode::Mutable,
            },
            None,
            DatabaseOptions::default(),
        )
        .unwrap();

    let first = db.execute_write_script("create table t (v text)", true).unwrap_err();
    assert_eq!(first.code(), "CONNECTION_FAILED");

    std::fs::create_dir_all(&parent).unwrap();
    let queued = db
        .execute_write("insert into t (v) values ('x')", QueryParams::None, false)
        .unwrap();
    assert_eq!(queued.into_value().unwrap_err(), first);
    let blocking = db.execute_write_fn(|_conn| Ok(()), true).unwrap_err();
    assert_eq!(blocking, first);
    assert!(!parent.join("unreachable.db").exists());
}
