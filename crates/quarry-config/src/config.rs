// crates/quarry-config/src/config.rs
// ============================================================================
// Module: Quarry Configuration
// Description: Configuration loading and validation for Quarry registries.
// Purpose: Provide strict, fail-closed config parsing with hard limits.
// Dependencies: quarry-db, serde, toml, tracing
// ============================================================================

//! ## Overview
//! Configuration is loaded from a TOML file with strict size and path limits,
//! then validated before any database is opened. A valid config builds a
//! [`DatabaseRegistry`] with [`QuarryConfig::build_registry`].
//!
//! ```toml
//! [settings]
//! max_returned_rows = 500
//!
//! [[databases]]
//! name = "fixtures"
//! path = "fixtures.db"
//! mode = "immutable"
//!
//! [databases.tables.people]
//! hidden = true
//! ```

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::env;
use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::time::SystemTime;

use quarry_db::DatabaseError;
use quarry_db::DatabaseOptions;
use quarry_db::DatabaseRegistry;
use quarry_db::DatabaseSource;
use quarry_db::FileMode;
use quarry_db::PostgresConfig;
use quarry_db::Settings;
use quarry_db::TableSettings;
use quarry_db::UriMode;
use serde::Deserialize;
use thiserror::Error;
use tracing::info;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default configuration filename when no path is specified.
const DEFAULT_CONFIG_NAME: &str = "quarry.toml";
/// Environment variable used to override the config path.
pub(crate) const CONFIG_ENV_VAR: &str = "QUARRY_CONFIG";
/// Maximum configuration file size in bytes.
pub(crate) const MAX_CONFIG_FILE_SIZE: usize = 1024 * 1024;
/// Maximum length of a single path component.
pub(crate) const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
pub(crate) const MAX_TOTAL_PATH_LENGTH: usize = 4096;
/// Maximum number of configured databases.
pub(crate) const MAX_DATABASES: usize = 256;
/// Maximum length of a database or table name.
pub(crate) const MAX_NAME_LENGTH: usize = 255;

// ============================================================================
// SECTION: Configuration Types
// ============================================================================

/// Quarry configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QuarryConfig {
    /// Registry-wide limits.
    #[serde(default)]
    pub settings: Settings,
    /// Database entries in registration order.
    #[serde(default)]
    pub databases: Vec<DatabaseConfig>,
    /// Optional config source metadata (not serialized).
    #[serde(skip)]
    pub source_modified_at: Option<SystemTime>,
}

impl QuarryConfig {
    /// Loads configuration from disk using the default resolution rules.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when loading or validation fails.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let resolved = resolve_path(path)?;
        validate_path(&resolved)?;
        let bytes = fs::read(&resolved).map_err(|err| ConfigError::Io(err.to_string()))?;
        if bytes.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::Invalid("config file exceeds size limit".to_string()));
        }
        let content = std::str::from_utf8(&bytes)
            .map_err(|_| ConfigError::Invalid("config file must be utf-8".to_string()))?;
        let mut config = Self::from_toml(content)?;
        config.source_modified_at = fs::metadata(&resolved).and_then(|meta| meta.modified()).ok();
        info!(
            path = %resolved.display(),
            databases = config.databases.len(),
            "loaded quarry config"
        );
        Ok(config)
    }

    /// Parses and validates configuration text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed TOML and
    /// [`ConfigError::Invalid`] when validation fails.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(content).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration for internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.settings.validate().map_err(|err| ConfigError::Invalid(settings_message(&err)))?;
        if self.databases.len() > MAX_DATABASES {
            return Err(ConfigError::Invalid("too many databases configured".to_string()));
        }
        let mut names = BTreeSet::new();
        for (index, database) in self.databases.iter().enumerate() {
            database.validate(index)?;
            if let Some(name) = &database.name
                && !names.insert(name.as_str())
            {
                return Err(ConfigError::Invalid(format!("duplicate database name: {name}")));
            }
        }
        Ok(())
    }

    /// Builds a registry holding every configured database.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for invalid settings and
    /// [`ConfigError::Database`] when a database cannot be opened.
    pub fn build_registry(&self) -> Result<DatabaseRegistry, ConfigError> {
        self.validate()?;
        let registry = DatabaseRegistry::new(self.settings.clone())
            .map_err(|err| ConfigError::Invalid(settings_message(&err)))?;
        for database in &self.databases {
            registry
                .add_database(&database.source(), database.name.as_deref(), database.options())
                .map_err(|err| ConfigError::Database(err.to_string()))?;
        }
        Ok(registry)
    }
}

/// In-memory database selector: `true` for an anonymous database or a
/// shared-cache name.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum MemoryConfig {
    /// `memory = true`.
    Anonymous(bool),
    /// `memory = "name"`.
    Named(String),
}

/// One database entry.
///
/// # Invariants
/// - Exactly one of `path`, `memory`, and `postgres` is set.
/// - `mode` and `uri_mode` only apply to file databases.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseConfig {
    /// Registry name; derived from the source when omitted.
    #[serde(default)]
    pub name: Option<String>,
    /// `SQLite` file path.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// In-memory `SQLite` database.
    #[serde(default)]
    pub memory: Option<MemoryConfig>,
    /// PostgreSQL connection settings.
    #[serde(default)]
    pub postgres: Option<PostgresConfig>,
    /// File mutability.
    #[serde(default)]
    pub mode: FileMode,
    /// Explicit `mode=` URI parameter for file databases.
    #[serde(default)]
    pub uri_mode: Option<UriMode>,
    /// Per-table settings keyed by table name.
    #[serde(default)]
    pub tables: BTreeMap<String, TableSettings>,
}

impl DatabaseConfig {
    /// Validates one entry; `index` labels error messages.
    fn validate(&self, index: usize) -> Result<(), ConfigError> {
        let label = self.name.clone().unwrap_or_else(|| format!("databases[{index}]"));
        let sources = [self.path.is_some(), self.memory.is_some(), self.postgres.is_some()];
        if sources.iter().filter(|set| **set).count() != 1 {
            return Err(ConfigError::Invalid(format!(
                "{label} must set exactly one of path, memory, postgres"
            )));
        }
        if let Some(name) = &self.name {
            validate_name(&format!("{label} name"), name)?;
        }
        if let Some(path) = &self.path {
            validate_path_string(&format!("{label} path"), &path.to_string_lossy())?;
        } else {
            if self.mode == FileMode::Immutable {
                return Err(ConfigError::Invalid(format!(
                    "{label} mode applies only to file databases"
                )));
            }
            if self.uri_mode.is_some() {
                return Err(ConfigError::Invalid(format!(
                    "{label} uri_mode applies only to file databases"
                )));
            }
        }
        match &self.memory {
            Some(MemoryConfig::Anonymous(false)) => {
                return Err(ConfigError::Invalid(format!("{label} memory must be true or a name")));
            }
            Some(MemoryConfig::Named(name)) => validate_name(&format!("{label} memory"), name)?,
            _ => {}
        }
        if let Some(postgres) = &self.postgres {
            if postgres.connection.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "{label} postgres.connection must be non-empty"
                )));
            }
            if postgres.max_connections == 0 {
                return Err(ConfigError::Invalid(format!(
                    "{label} postgres.max_connections must be greater than zero"
                )));
            }
            if postgres.connect_timeout_ms == 0 {
                return Err(ConfigError::Invalid(format!(
                    "{label} postgres.connect_timeout_ms must be greater than zero"
                )));
            }
        }
        for (table, settings) in &self.tables {
            validate_name(&format!("{label} table"), table)?;
            if let Some(column) = &settings.label_column {
                validate_name(&format!("{label} tables.{table}.label_column"), column)?;
            }
        }
        Ok(())
    }

    /// Returns the database source described by this entry.
    #[must_use]
    pub fn source(&self) -> DatabaseSource {
        if let Some(postgres) = &self.postgres {
            return DatabaseSource::Postgres(postgres.clone());
        }
        match (&self.path, &self.memory) {
            (Some(path), _) => DatabaseSource::File {
                path: path.clone(),
                mode: self.mode,
            },
            (None, Some(MemoryConfig::Named(name))) => DatabaseSource::Memory {
                name: Some(name.clone()),
            },
            (None, _) => DatabaseSource::Memory {
                name: None,
            },
        }
    }

    /// Returns open options for this entry.
    #[must_use]
    pub fn options(&self) -> DatabaseOptions {
        DatabaseOptions {
            tables: self.tables.clone(),
            uri_mode: self.uri_mode,
            hooks: Vec::new(),
        }
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O failure while reading configuration.
    #[error("config io error: {0}")]
    Io(String),
    /// TOML parsing error.
    #[error("config parse error: {0}")]
    Parse(String),
    /// Invalid configuration data.
    #[error("invalid config: {0}")]
    Invalid(String),
    /// A configured database could not be opened.
    #[error("config database error: {0}")]
    Database(String),
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Resolves the config path from the argument or environment defaults.
fn resolve_path(path: Option<&Path>) -> Result<PathBuf, ConfigError> {
    if let Some(path) = path {
        return Ok(path.to_path_buf());
    }
    if let Ok(env_path) = env::var(CONFIG_ENV_VAR) {
        if env_path.len() > MAX_TOTAL_PATH_LENGTH {
            return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
        }
        return Ok(PathBuf::from(env_path));
    }
    Ok(PathBuf::from(DEFAULT_CONFIG_NAME))
}

/// Validates the resolved path against length limits.
fn validate_path(path: &Path) -> Result<(), ConfigError> {
    let text = path.to_string_lossy();
    if text.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
    }
    for component in path.components() {
        let value = component.as_os_str().to_string_lossy();
        if value.len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(ConfigError::Invalid("config path component too long".to_string()));
        }
    }
    Ok(())
}

/// Validates a path string against length constraints.
fn validate_path_string(field: &str, value: &str) -> Result<(), ConfigError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::Invalid(format!("{field} must be non-empty")));
    }
    if trimmed.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid(format!("{field} exceeds max length")));
    }
    for component in Path::new(trimmed).components() {
        if component.as_os_str().len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(ConfigError::Invalid(format!("{field} path component too long")));
        }
    }
    Ok(())
}

/// Validates a database, table, or column name.
fn validate_name(field: &str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::Invalid(format!("{field} must be non-empty")));
    }
    if value.len() > MAX_NAME_LENGTH {
        return Err(ConfigError::Invalid(format!("{field} exceeds max length")));
    }
    if value.chars().any(char::is_control) {
        return Err(ConfigError::Invalid(format!("{field} must not contain control characters")));
    }
    Ok(())
}

/// Strips the database error prefix from settings failures.
fn settings_message(err: &DatabaseError) -> String {
    match err {
        DatabaseError::Invalid(message) => format!("settings: {message}"),
        other => format!("settings: {other}"),
    }
}
