// crates/quarry-db/src/settings.rs
// ============================================================================
// Module: Quarry Runtime Settings
// Description: Page size, row caps, time limits, and pool sizing.
// Purpose: Shared limits consulted by every database in a registry.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! [`Settings`] is deserialized from the `[settings]` table of `quarry.toml`
//! (see `quarry-config`) or built in code. Omitted keys take the defaults
//! below. [`QueryOptions`] carries per-call overrides for a single read.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::error::DatabaseError;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default page size used by paginating callers.
pub const DEFAULT_PAGE_SIZE: usize = 100;
/// Default cap on rows returned by a truncating read.
pub const DEFAULT_MAX_RETURNED_ROWS: usize = 1_000;
/// Default read time limit (ms).
pub const DEFAULT_SQL_TIME_LIMIT_MS: u64 = 1_000;
/// Default number of pooled read connections per database.
pub const DEFAULT_NUM_SQL_THREADS: usize = 3;
/// Default per-table time budget for `table_counts` (ms).
pub const DEFAULT_COUNT_TIME_LIMIT_MS: u64 = 10;

// ============================================================================
// SECTION: Settings
// ============================================================================

/// Registry-wide limits.
///
/// # Invariants
/// - `default_page_size` and `num_sql_threads` are greater than zero.
/// - `max_returned_rows == 0` disables truncation.
/// - `sql_time_limit_ms == 0` disables the read time limit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// Page size used when a read does not supply one.
    #[serde(default = "default_page_size")]
    pub default_page_size: usize,
    /// Maximum rows returned by a truncating read.
    #[serde(default = "default_max_returned_rows")]
    pub max_returned_rows: usize,
    /// Read time limit in milliseconds.
    #[serde(default = "default_sql_time_limit_ms")]
    pub sql_time_limit_ms: u64,
    /// Pooled read connections per database.
    #[serde(default = "default_num_sql_threads")]
    pub num_sql_threads: usize,
    /// Page cache size in KiB applied to every connection (0 keeps the engine default).
    #[serde(default)]
    pub cache_size_kb: u64,
    /// Open mutable files with `nolock=1` on read connections.
    #[serde(default)]
    pub nolock: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_page_size: DEFAULT_PAGE_SIZE,
            max_returned_rows: DEFAULT_MAX_RETURNED_ROWS,
            sql_time_limit_ms: DEFAULT_SQL_TIME_LIMIT_MS,
            num_sql_threads: DEFAULT_NUM_SQL_THREADS,
            cache_size_kb: 0,
            nolock: false,
        }
    }
}

impl Settings {
    /// Validates the settings.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError::Invalid`] when a limit is out of range.
    pub fn validate(&self) -> Result<(), DatabaseError> {
        if self.default_page_size == 0 {
            return Err(DatabaseError::Invalid(
                "default_page_size must be greater than zero".to_string(),
            ));
        }
        if self.num_sql_threads == 0 {
            return Err(DatabaseError::Invalid(
                "num_sql_threads must be greater than zero".to_string(),
            ));
        }
        if self.cache_size_kb > i64::MAX as u64 / 1024 {
            return Err(DatabaseError::Invalid("cache_size_kb is too large".to_string()));
        }
        Ok(())
    }

    /// Returns the row cap for a read with the given page size.
    ///
    /// When the cap equals the page size one extra row is allowed, so a
    /// caller fetching a full page can still tell whether another exists.
    #[must_use]
    pub fn row_cap(&self, page_size: Option<usize>) -> usize {
        let page_size = page_size.unwrap_or(self.default_page_size);
        if self.max_returned_rows == page_size {
            self.max_returned_rows.saturating_add(1)
        } else {
            self.max_returned_rows
        }
    }

    /// Returns the time limit for a read, honoring a smaller custom limit.
    #[must_use]
    pub fn time_limit_ms(&self, custom_time_limit_ms: Option<u64>) -> u64 {
        match custom_time_limit_ms {
            Some(custom)
                if custom > 0
                    && (self.sql_time_limit_ms == 0 || custom < self.sql_time_limit_ms) =>
            {
                custom
            }
            _ => self.sql_time_limit_ms,
        }
    }
}

/// Default page size.
const fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

/// Default returned-row cap.
const fn default_max_returned_rows() -> usize {
    DEFAULT_MAX_RETURNED_ROWS
}

/// Default read time limit (ms).
const fn default_sql_time_limit_ms() -> u64 {
    DEFAULT_SQL_TIME_LIMIT_MS
}

/// Default read pool size.
const fn default_num_sql_threads() -> usize {
    DEFAULT_NUM_SQL_THREADS
}

// ============================================================================
// SECTION: Query Options
// ============================================================================

/// Per-call options for a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryOptions {
    /// Cap the rows returned and report truncation.
    pub truncate: bool,
    /// Custom time limit (ms); only applied when below the configured limit.
    pub custom_time_limit_ms: Option<u64>,
    /// Page size used to derive the row cap.
    pub page_size: Option<usize>,
    /// Log engine errors at warn level.
    pub log_sql_errors: bool,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            truncate: false,
            custom_time_limit_ms: None,
            page_size: None,
            log_sql_errors: true,
        }
    }
}

impl QueryOptions {
    /// Options for a truncating read.
    #[must_use]
    pub fn truncated() -> Self {
        Self {
            truncate: true,
            ..Self::default()
        }
    }

    /// Returns a copy with a custom time limit.
    #[must_use]
    pub const fn with_time_limit_ms(mut self, limit_ms: u64) -> Self {
        self.custom_time_limit_ms = Some(limit_ms);
        self
    }

    /// Returns a copy with a page size.
    #[must_use]
    pub const fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = Some(page_size);
        self
    }

    /// Returns a copy that does not log engine errors.
    #[must_use]
    pub const fn quiet(mut self) -> Self {
        self.log_sql_errors = false;
        self
    }
}
