// crates/quarry-db/src/pool.rs
// ============================================================================
// Module: Quarry Read Pool
// Description: Database-name keyed registry of read connection groups.
// Purpose: Single entry point for scoped read-connection acquisition.
// Dependencies: tracing
// ============================================================================

//! ## Overview
//! The [`Pool`] maps database names to [`ConnectionGroup`]s. A name is
//! registered with its opener and size; the group itself is created on the
//! first [`Pool::connection`] call for that name. The map is read-mostly and
//! sits behind an `RwLock`, so lookups from many threads never serialize on
//! each other.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::OnceLock;
use std::sync::PoisonError;
use std::sync::RwLock;

use tracing::debug;

use crate::connection::ConnectionOpener;
use crate::error::DatabaseError;
use crate::group::ConnectionGroup;
use crate::group::PooledConnection;

// ============================================================================
// SECTION: Pool
// ============================================================================

/// Registration for one database name.
struct PoolEntry {
    /// Opener handed to the group.
    opener: Arc<ConnectionOpener>,
    /// Connection count for the group.
    size: usize,
    /// Group, created on first acquisition.
    group: OnceLock<Arc<ConnectionGroup>>,
}

impl PoolEntry {
    /// Returns the group, creating it on first use.
    fn group(&self) -> Arc<ConnectionGroup> {
        Arc::clone(
            self.group.get_or_init(|| {
                debug!(
                    database = self.opener.database(),
                    size = self.size,
                    "creating connection group"
                );
                Arc::new(ConnectionGroup::new(Arc::clone(&self.opener), self.size))
            }),
        )
    }
}

/// Read connection groups keyed by database name.
///
/// # Invariants
/// - At most one group exists per registered name.
#[derive(Default)]
pub struct Pool {
    /// Registered databases.
    entries: RwLock<HashMap<String, PoolEntry>>,
}

impl fmt::Debug for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool").finish_non_exhaustive()
    }
}

impl Pool {
    /// Creates an empty pool.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a database name with `size` read connections.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError::Invalid`] when the name is already registered.
    pub fn register(
        &self,
        name: &str,
        opener: Arc<ConnectionOpener>,
        size: usize,
    ) -> Result<(), DatabaseError> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if entries.contains_key(name) {
            return Err(DatabaseError::Invalid(format!("database {name} is already registered")));
        }
        entries.insert(
            name.to_string(),
            PoolEntry {
                opener,
                size,
                group: OnceLock::new(),
            },
        );
        Ok(())
    }

    /// Removes a database and closes its group.
    ///
    /// Returns false when the name was not registered.
    pub fn unregister(&self, name: &str) -> bool {
        let removed = self.entries.write().unwrap_or_else(PoisonError::into_inner).remove(name);
        match removed {
            Some(entry) => {
                if let Some(group) = entry.group.get() {
                    group.close();
                }
                true
            }
            None => false,
        }
    }

    /// Returns true when `name` is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).contains_key(name)
    }

    /// Returns the group for `name`, creating it on first reference.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError::UnknownDatabase`] for unregistered names.
    pub fn group(&self, name: &str) -> Result<Arc<ConnectionGroup>, DatabaseError> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .map(PoolEntry::group)
            .ok_or_else(|| DatabaseError::UnknownDatabase(name.to_string()))
    }

    /// Acquires a read connection for `name`; it is released on drop.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError::UnknownDatabase`] for unregistered names and
    /// propagates open failures from the group.
    pub fn connection(&self, name: &str) -> Result<PooledConnection, DatabaseError> {
        let group = self.group(name)?;
        group.acquire()
    }

    /// Closes every connection in every group.
    ///
    /// Close failures are logged, never raised. Registrations survive, so
    /// later acquisitions fail with [`DatabaseError::Closed`].
    pub fn close_all(&self) {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        for entry in entries.values() {
            if let Some(group) = entry.group.get() {
                group.close();
            }
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

    use std::sync::Arc;

    use super::Pool;
    use crate::connection::ConnectionOpener;
    use crate::connection::SqliteSource;
    use crate::error::DatabaseError;
    use crate::settings::Settings;

    fn opener(name: &str) -> Arc<ConnectionOpener> {
        let settings = Settings::default();
        Arc::new(ConnectionOpener::new(name, SqliteSource::anonymous_memory(), &settings))
    }

    #[test]
    fn unknown_names_are_rejected() {
        let pool = Pool::new();
        assert_eq!(
            pool.connection("nope").err(),
            Some(DatabaseError::UnknownDatabase("nope".to_string()))
        );
    }

    #[test]
    fn duplicate_registration_fails() {
        let pool = Pool::new();
        pool.register("a", opener("a"), 1).unwrap();
        assert!(pool.register("a", opener("a"), 1).is_err());
        assert!(pool.unregister("a"));
        assert!(!pool.contains("a"));
    }

    #[test]
    fn close_all_shuts_every_group() {
        let pool = Pool::new();
        pool.register("a", opener("a"), 2).unwrap();
        drop(pool.connection("a").unwrap());
        pool.close_all();
        assert_eq!(pool.connection("a").err().map(|err| err.code()), Some("DATABASE_CLOSED"));
    }
}
