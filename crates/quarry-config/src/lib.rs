// crates/quarry-config/src/lib.rs
// ============================================================================
// Module: Quarry Config Library
// Description: Canonical quarry.toml model and validation.
// Purpose: Single source of truth for registry settings and database entries.
// Dependencies: quarry-db, serde, toml
// ============================================================================

//! ## Overview
//! `quarry-config` defines the configuration model for a Quarry database
//! registry. It provides strict, fail-closed validation and builds a
//! [`quarry_db::DatabaseRegistry`] from a validated file.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod config;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use config::ConfigError;
pub use config::DatabaseConfig;
pub use config::MemoryConfig;
pub use config::QuarryConfig;
