// crates/quarry-db/src/connection.rs
// ============================================================================
// Module: Quarry Connection Opener
// Description: Opens native SQLite handles for read pools and write queues.
// Purpose: Centralize URI construction, open flags, and per-connection setup.
// Dependencies: rusqlite, serde, tracing
// ============================================================================

//! ## Overview
//! A [`ConnectionOpener`] knows where a database lives ([`SqliteSource`]) and
//! how each handle must be opened:
//!
//! | Source | Read handle | Write handle |
//! |--------|-------------|--------------|
//! | mutable file | `file:<path>?mode=ro` (`&nolock=1` optional) | `file:<path>` |
//! | immutable file | `file:<path>?immutable=1` | rejected |
//! | named memory | `file:<name>?mode=memory&cache=shared` + `query_only` | same URI |
//! | anonymous memory | `file:quarry_anon_<n>?mode=memory&cache=shared` + `query_only` | same URI |
//!
//! Anonymous memory sources get a process-unique shared-cache name when the
//! opener is built, so the readers and the writer of one database share data
//! while separate anonymous databases never do.
//!
//! Every handle is then prepared: the page cache size is applied and any
//! registered [`PrepareHook`]s run. Open failures are reported as
//! [`DatabaseError::Connection`] and never retried here.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use rusqlite::Connection;
use rusqlite::OpenFlags;
use serde::Deserialize;
use serde::Serialize;
use tracing::warn;

use crate::error::DatabaseError;
use crate::settings::Settings;

// ============================================================================
// SECTION: Sources
// ============================================================================

/// Mutability of a file-backed database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileMode {
    /// The file may change while the process runs; reads use `mode=ro`.
    #[default]
    Mutable,
    /// The file never changes; reads use `immutable=1` and metadata is cached.
    Immutable,
}

/// Explicit `mode=` URI parameter overriding the derived query string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UriMode {
    /// `mode=ro`.
    Ro,
    /// `mode=rw`.
    Rw,
    /// `mode=rwc`.
    Rwc,
    /// `mode=memory`.
    Memory,
}

impl UriMode {
    /// Returns the URI parameter value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ro => "ro",
            Self::Rw => "rw",
            Self::Rwc => "rwc",
            Self::Memory => "memory",
        }
    }
}

/// Where a `SQLite` database lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqliteSource {
    /// A database file on disk.
    File {
        /// Path to the database file.
        path: PathBuf,
        /// Whether the file may change during the process lifetime.
        mode: FileMode,
    },
    /// An in-memory database.
    Memory {
        /// Shared-cache name; `None` gives every handle its own empty database.
        name: Option<String>,
    },
}

impl SqliteSource {
    /// Creates a mutable file source.
    pub fn mutable_file(path: impl Into<PathBuf>) -> Self {
        Self::File {
            path: path.into(),
            mode: FileMode::Mutable,
        }
    }

    /// Creates an immutable file source.
    pub fn immutable_file(path: impl Into<PathBuf>) -> Self {
        Self::File {
            path: path.into(),
            mode: FileMode::Immutable,
        }
    }

    /// Creates a named shared in-memory source.
    pub fn named_memory(name: impl Into<String>) -> Self {
        Self::Memory {
            name: Some(name.into()),
        }
    }

    /// Creates an anonymous in-memory source.
    #[must_use]
    pub const fn anonymous_memory() -> Self {
        Self::Memory {
            name: None,
        }
    }

    /// Returns true when content may change while the process runs.
    #[must_use]
    pub const fn is_mutable(&self) -> bool {
        match self {
            Self::File {
                mode,
                ..
            } => matches!(mode, FileMode::Mutable),
            Self::Memory {
                ..
            } => true,
        }
    }

    /// Returns true for in-memory sources.
    #[must_use]
    pub const fn is_memory(&self) -> bool {
        matches!(self, Self::Memory { .. })
    }

    /// Returns the file path for file sources.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::File {
                path,
                ..
            } => Some(path),
            Self::Memory {
                ..
            } => None,
        }
    }

    /// Suggests a database name: the file stem, the memory name, or `db`.
    #[must_use]
    pub fn suggest_name(&self) -> String {
        match self {
            Self::File {
                path,
                ..
            } => path
                .file_stem()
                .map_or_else(|| "db".to_string(), |stem| stem.to_string_lossy().into_owned()),
            Self::Memory {
                name: Some(name),
            } => name.clone(),
            Self::Memory {
                name: None,
            } => "db".to_string(),
        }
    }
}

// ============================================================================
// SECTION: Opener
// ============================================================================

/// Purpose of a native handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionMode {
    /// Pooled read handle.
    Read,
    /// The dedicated write handle (or an isolated write handle).
    Write,
}

/// Sequence for shared-cache names of anonymous memory databases.
static ANONYMOUS_MEMORY_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Callback run on every freshly opened handle (functions, pragmas, extensions).
pub type PrepareHook = Arc<dyn Fn(&Connection) -> Result<(), DatabaseError> + Send + Sync>;

/// Opens handles for one database.
///
/// # Invariants
/// - Read handles of file sources are never writable.
/// - Write handles are never opened for immutable files.
#[derive(Clone)]
pub struct ConnectionOpener {
    /// Database name used in errors.
    database: String,
    /// Database location.
    source: SqliteSource,
    /// Shared-cache name backing a memory source.
    memory_name: Option<String>,
    /// Optional explicit `mode=` override.
    uri_mode: Option<UriMode>,
    /// Page cache size (KiB), 0 for the engine default.
    cache_size_kb: u64,
    /// Whether mutable reads add `nolock=1`.
    nolock: bool,
    /// Hooks run after every open.
    hooks: Vec<PrepareHook>,
}

impl fmt::Debug for ConnectionOpener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionOpener")
            .field("database", &self.database)
            .field("source", &self.source)
            .field("uri_mode", &self.uri_mode)
            .field("hooks", &self.hooks.len())
            .finish_non_exhaustive()
    }
}

impl ConnectionOpener {
    /// Creates an opener for `database`.
    ///
    /// Anonymous memory sources are assigned a fresh `quarry_anon_<n>`
    /// shared-cache name here.
    pub fn new(database: impl Into<String>, source: SqliteSource, settings: &Settings) -> Self {
        let memory_name = match &source {
            SqliteSource::Memory {
                name: Some(name),
            } => Some(name.clone()),
            SqliteSource::Memory {
                name: None,
            } => {
                let sequence = ANONYMOUS_MEMORY_SEQUENCE.fetch_add(1, Ordering::Relaxed);
                Some(format!("quarry_anon_{sequence}"))
            }
            SqliteSource::File {
                ..
            } => None,
        };
        Self {
            database: database.into(),
            source,
            memory_name,
            uri_mode: None,
            cache_size_kb: settings.cache_size_kb,
            nolock: settings.nolock,
            hooks: Vec::new(),
        }
    }

    /// Sets an explicit `mode=` URI parameter.
    #[must_use]
    pub const fn with_uri_mode(mut self, uri_mode: Option<UriMode>) -> Self {
        self.uri_mode = uri_mode;
        self
    }

    /// Adds hooks run on every new handle.
    #[must_use]
    pub fn with_hooks(mut self, hooks: impl IntoIterator<Item = PrepareHook>) -> Self {
        self.hooks.extend(hooks);
        self
    }

    /// Returns the database name.
    #[must_use]
    pub fn database(&self) -> &str {
        &self.database
    }

    /// Returns the source.
    #[must_use]
    pub const fn source(&self) -> &SqliteSource {
        &self.source
    }

    /// Opens and prepares a native handle.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError::Immutable`] for write handles on immutable
    /// files and [`DatabaseError::Connection`] when the open or preparation
    /// fails.
    pub fn open(&self, mode: ConnectionMode) -> Result<Connection, DatabaseError> {
        if mode == ConnectionMode::Write && !self.source.is_mutable() {
            return Err(DatabaseError::Immutable(self.database.clone()));
        }
        let (target, flags) = self.target(mode);
        let connection = Connection::open_with_flags(&target, flags)
            .map_err(|err| DatabaseError::connection(&self.database, err.to_string()))?;
        self.prepare(&connection, mode)?;
        Ok(connection)
    }

    /// Returns the open target and flags for a handle.
    fn target(&self, mode: ConnectionMode) -> (String, OpenFlags) {
        let base = OpenFlags::SQLITE_OPEN_URI | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
        let writable = base | OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE;
        let read_only = base | OpenFlags::SQLITE_OPEN_READ_ONLY;
        match &self.source {
            SqliteSource::Memory {
                ..
            } => {
                let name = self.memory_name.as_deref().unwrap_or(&self.database);
                (format!("file:{}?mode=memory&cache=shared", encode_uri_path(name)), writable)
            }
            SqliteSource::File {
                path,
                mode: file_mode,
            } => {
                let location = format!("file:{}", encode_uri_path(&path.to_string_lossy()));
                if let Some(uri_mode) = self.uri_mode {
                    return (format!("{location}?mode={}", uri_mode.as_str()), writable);
                }
                match (mode, file_mode) {
                    (ConnectionMode::Write, _) => (location, writable),
                    (ConnectionMode::Read, FileMode::Immutable) => {
                        (format!("{location}?immutable=1"), read_only)
                    }
                    (ConnectionMode::Read, FileMode::Mutable) if self.nolock => {
                        (format!("{location}?mode=ro&nolock=1"), read_only)
                    }
                    (ConnectionMode::Read, FileMode::Mutable) => {
                        (format!("{location}?mode=ro"), read_only)
                    }
                }
            }
        }
    }

    /// Applies per-connection settings and hooks.
    fn prepare(&self, connection: &Connection, mode: ConnectionMode) -> Result<(), DatabaseError> {
        let fail = |message: String| DatabaseError::connection(&self.database, message);
        if self.source.is_memory() && mode == ConnectionMode::Read {
            connection.execute_batch("PRAGMA query_only=1").map_err(|err| fail(err.to_string()))?;
        }
        if self.cache_size_kb > 0 {
            connection
                .execute_batch(&format!("PRAGMA cache_size=-{}", self.cache_size_kb))
                .map_err(|err| fail(err.to_string()))?;
        }
        for hook in &self.hooks {
            hook(connection).map_err(|err| fail(err.to_string()))?;
        }
        Ok(())
    }
}

/// Closes a handle, logging instead of raising close failures.
pub(crate) fn close_quietly(database: &str, connection: Connection) {
    if let Err((_connection, err)) = connection.close() {
        warn!(database, error = %err, "failed to close sqlite connection");
    }
}

/// Percent-encodes the characters that terminate a URI path.
fn encode_uri_path(path: &str) -> String {
    let mut encoded = String::with_capacity(path.len());
    for ch in path.chars() {
        match ch {
            '%' => encoded.push_str("%25"),
            '?' => encoded.push_str("%3f"),
            '#' => encoded.push_str("%23"),
            _ => encoded.push(ch),
        }
    }
    encoded
}
