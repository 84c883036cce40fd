// crates/quarry-db/src/registry.rs
// ============================================================================
// Module: Quarry Database Registry
// Description: Named collection of open databases sharing one read pool.
// Purpose: Add, look up, replace, and remove databases by name.
// Dependencies: tracing
// ============================================================================

//! ## Overview
//! The registry owns the shared [`Settings`] and [`Pool`] and keeps databases
//! in insertion order. Lookups without a name return the first database.
//!
//! ## Naming
//! - An explicit name replaces any database already registered under it.
//! - Without a name, the source suggests one; collisions get `_2`, `_3`, ...

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::sync::PoisonError;
use std::sync::RwLock;

use tracing::info;

use crate::database::Database;
use crate::database::DatabaseOptions;
use crate::database::DatabaseSource;
use crate::error::DatabaseError;
use crate::pool::Pool;
use crate::settings::Settings;

// ============================================================================
// SECTION: Registry
// ============================================================================

/// Collection of named databases.
///
/// # Invariants
/// - Names are unique.
/// - Every registered database shares this registry's settings and pool.
#[derive(Debug)]
pub struct DatabaseRegistry {
    /// Shared limits.
    settings: Arc<Settings>,
    /// Shared read pool.
    pool: Arc<Pool>,
    /// Databases in insertion order.
    databases: RwLock<Vec<Arc<Database>>>,
}

impl DatabaseRegistry {
    /// Creates an empty registry.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError::Invalid`] when `settings` fail validation.
    pub fn new(settings: Settings) -> Result<Self, DatabaseError> {
        settings.validate()?;
        Ok(Self {
            settings: Arc::new(settings),
            pool: Arc::new(Pool::new()),
            databases: RwLock::new(Vec::new()),
        })
    }

    /// Returns the shared settings.
    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Returns the shared read pool.
    #[must_use]
    pub fn pool(&self) -> &Arc<Pool> {
        &self.pool
    }

    /// Opens and registers a database, returning it.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError`] when the backend cannot be created.
    pub fn add_database(
        &self,
        source: &DatabaseSource,
        name: Option<&str>,
        options: DatabaseOptions,
    ) -> Result<Arc<Database>, DatabaseError> {
        let mut databases = self.databases.write().unwrap_or_else(PoisonError::into_inner);
        let name = match name {
            Some(explicit) => {
                if let Some(index) = databases.iter().position(|db| db.name() == explicit) {
                    let replaced = databases.remove(index);
                    replaced.close();
                    info!(database = explicit, "replacing database");
                }
                explicit.to_string()
            }
            None => unique_name(&databases, &source.suggest_name()),
        };
        let database = Arc::new(Database::open(
            name.clone(),
            source,
            options,
            Arc::clone(&self.settings),
            Arc::clone(&self.pool),
        )?);
        info!(
            database = %name,
            kind = ?database.kind(),
            mutable = database.is_mutable(),
            "database added"
        );
        databases.push(Arc::clone(&database));
        Ok(database)
    }

    /// Registers a named shared in-memory database under the same name.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError`] when the backend cannot be created.
    pub fn add_memory_database(&self, memory_name: &str) -> Result<Arc<Database>, DatabaseError> {
        self.add_database(
            &DatabaseSource::Memory {
                name: Some(memory_name.to_string()),
            },
            Some(memory_name),
            DatabaseOptions::default(),
        )
    }

    /// Removes and closes a database; returns true when it existed.
    pub fn remove_database(&self, name: &str) -> bool {
        let mut databases = self.databases.write().unwrap_or_else(PoisonError::into_inner);
        let Some(index) = databases.iter().position(|db| db.name() == name) else {
            return false;
        };
        let removed = databases.remove(index);
        removed.close();
        info!(database = name, "database removed");
        true
    }

    /// Returns the named database, or the first one when `name` is `None`.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError::UnknownDatabase`] when nothing matches.
    pub fn get_database(&self, name: Option<&str>) -> Result<Arc<Database>, DatabaseError> {
        let databases = self.databases.read().unwrap_or_else(PoisonError::into_inner);
        let found = match name {
            Some(name) => databases.iter().find(|db| db.name() == name),
            None => databases.first(),
        };
        found
            .cloned()
            .ok_or_else(|| DatabaseError::UnknownDatabase(name.unwrap_or("<default>").to_string()))
    }

    /// Returns database names in insertion order.
    #[must_use]
    pub fn database_names(&self) -> Vec<String> {
        self.databases
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|db| db.name().to_string())
            .collect()
    }

    /// Closes every database and the shared pool.
    pub fn close(&self) {
        let drained: Vec<Arc<Database>> =
            self.databases.write().unwrap_or_else(PoisonError::into_inner).drain(..).collect();
        for database in drained {
            database.close();
        }
        self.pool.close_all();
    }
}

impl Drop for DatabaseRegistry {
    fn drop(&mut self) {
        self.close();
    }
}

/// Returns `base`, or `base_N` with the smallest free `N >= 2`.
fn unique_name(databases: &[Arc<Database>], base: &str) -> String {
    let taken = |candidate: &str| databases.iter().any(|db| db.name() == candidate);
    if !taken(base) {
        return base.to_string();
    }
    let mut suffix = 2_u64;
    loop {
        let candidate = format!("{base}_{suffix}");
        if !taken(&candidate) {
            return candidate;
        }
        suffix += 1;
    }
}
