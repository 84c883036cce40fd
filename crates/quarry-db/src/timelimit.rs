// crates/quarry-db/src/timelimit.rs
// ============================================================================
// Module: Quarry Read Time Limits
// Description: Scoped progress-handler deadlines for SQLite statements.
// Purpose: Abort slow reads without tearing down the connection.
// Dependencies: rusqlite (hooks)
// ============================================================================

//! ## Overview
//! [`TimeLimit::install`] registers a progress handler that interrupts the
//! running statement once a wall-clock deadline passes. The handler is
//! removed when the guard drops, so the pooled connection goes back clean.
//! The engine then reports `SQLITE_INTERRUPT`, which callers map to
//! [`crate::DatabaseError::QueryInterrupted`].

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::time::Duration;
use std::time::Instant;

use rusqlite::Connection;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// VM instructions between deadline checks.
const CHECK_INTERVAL_OPS: i32 = 1_000;
/// Limits at or below this many milliseconds are checked on every instruction.
const FINE_GRAINED_LIMIT_MS: u64 = 20;

// ============================================================================
// SECTION: Guard
// ============================================================================

/// Active deadline on one connection.
///
/// # Invariants
/// - While alive, statements on the connection abort after the deadline.
/// - On drop, no progress handler remains registered.
pub struct TimeLimit<'conn> {
    /// Connection carrying the handler; `None` when no limit applies.
    connection: Option<&'conn Connection>,
}

impl<'conn> TimeLimit<'conn> {
    /// Installs a deadline `limit_ms` from now; `0` installs nothing.
    #[must_use]
    pub fn install(connection: &'conn Connection, limit_ms: u64) -> Self {
        if limit_ms == 0 {
            return Self {
                connection: None,
            };
        }
        let deadline = Instant::now() + Duration::from_millis(limit_ms);
        let interval = if limit_ms <= FINE_GRAINED_LIMIT_MS { 1 } else { CHECK_INTERVAL_OPS };
        let _ = connection.progress_handler(interval, Some(move || Instant::now() >= deadline));
        Self {
            connection: Some(connection),
        }
    }
}

impl Drop for TimeLimit<'_> {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.take() {
            let _ = connection.progress_handler(0, None::<fn() -> bool>);
        }
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

    use rusqlite::Connection;
    use rusqlite::ErrorCode;

    use super::TimeLimit;

    const ENDLESS: &str = "with recursive c(x) as (select 1 union all select x + 1 from c) \
                           select count(*) from c";

    #[test]
    fn expired_deadline_interrupts_and_guard_cleans_up() {
        let connection = Connection::open_in_memory().unwrap();
        {
            let _limit = TimeLimit::install(&connection, 5);
            let err = connection.query_row(ENDLESS, [], |row| row.get::<_, i64>(0)).unwrap_err();
            assert_eq!(err.sqlite_error_code(), Some(ErrorCode::OperationInterrupted));
        }
        let value: i64 = connection
            .query_row(
                "with recursive c(x) as (select 1 union all select x + 1 from c where x < 50000) \
                 select count(*) from c",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(value, 50_000);
    }
}
