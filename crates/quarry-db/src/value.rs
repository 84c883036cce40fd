// crates/quarry-db/src/value.rs
// ============================================================================
// Module: Quarry Values and Parameters
// Description: Engine-neutral cell values and query parameter bundles.
// Purpose: Carry row data and bound parameters across backends and threads.
// Dependencies: rusqlite, serde, serde_json
// ============================================================================

//! ## Overview
//! [`Value`] mirrors the five `SQLite` storage classes and is what every
//! backend produces for result cells. [`QueryParams`] carries either
//! positional or named parameters; named keys may be given with or without
//! their `:`/`@`/`$` prefix.

// ============================================================================
// SECTION: Imports
// ============================================================================

use rusqlite::Statement;
use rusqlite::ToSql;
use rusqlite::types::ToSqlOutput;
use rusqlite::types::ValueRef;
use serde::Serialize;

// ============================================================================
// SECTION: Values
// ============================================================================

/// A single result cell or bound parameter.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    /// SQL `NULL`.
    Null,
    /// 64-bit signed integer.
    Integer(i64),
    /// 64-bit float.
    Real(f64),
    /// UTF-8 text; invalid sequences are replaced when read from the engine.
    Text(String),
    /// Raw bytes.
    Blob(Vec<u8>),
}

impl Value {
    /// Returns the integer payload, if any.
    #[must_use]
    pub const fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(value) => Some(*value),
            _ => None,
        }
    }

    /// Returns the float payload, widening integers.
    #[must_use]
    #[allow(clippy::cast_precision_loss, reason = "Mirrors SQLite numeric affinity.")]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Real(value) => Some(*value),
            Self::Integer(value) => Some(*value as f64),
            _ => None,
        }
    }

    /// Returns the text payload, if any.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value),
            _ => None,
        }
    }

    /// Returns true for SQL `NULL`.
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Converts the value to JSON; blobs become byte arrays and non-finite
    /// floats become `null`.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Integer(number) => serde_json::Value::from(*number),
            Self::Real(number) => serde_json::Number::from_f64(*number)
                .map_or(serde_json::Value::Null, serde_json::Value::Number),
            Self::Text(text) => serde_json::Value::String(text.clone()),
            Self::Blob(bytes) => {
                let items = bytes.iter().map(|byte| serde_json::Value::from(*byte)).collect();
                serde_json::Value::Array(items)
            }
        }
    }

    /// Copies an engine value, decoding text lossily.
    pub(crate) fn from_sqlite(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => Self::Null,
            ValueRef::Integer(number) => Self::Integer(number),
            ValueRef::Real(number) => Self::Real(number),
            ValueRef::Text(bytes) => Self::Text(String::from_utf8_lossy(bytes).into_owned()),
            ValueRef::Blob(bytes) => Self::Blob(bytes.to_vec()),
        }
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Self::Null => ToSqlOutput::Borrowed(ValueRef::Null),
            Self::Integer(number) => ToSqlOutput::Borrowed(ValueRef::Integer(*number)),
            Self::Real(number) => ToSqlOutput::Borrowed(ValueRef::Real(*number)),
            Self::Text(text) => ToSqlOutput::Borrowed(ValueRef::Text(text.as_bytes())),
            Self::Blob(bytes) => ToSqlOutput::Borrowed(ValueRef::Blob(bytes)),
        })
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Real(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Self::Blob(value)
    }
}

impl<T: Into<Self>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

// ============================================================================
// SECTION: Parameters
// ============================================================================

/// Parameters bound to a statement.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum QueryParams {
    /// No parameters.
    #[default]
    None,
    /// `?`/`?N` parameters in order.
    Positional(Vec<Value>),
    /// `:name` parameters; keys may omit the prefix.
    Named(Vec<(String, Value)>),
}

impl QueryParams {
    /// Builds positional parameters.
    pub fn positional<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self::Positional(values.into_iter().map(Into::into).collect())
    }

    /// Builds named parameters.
    pub fn named<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Self::Named(pairs.into_iter().map(|(key, value)| (key.into(), value.into())).collect())
    }

    /// Returns true when no parameters are carried.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::None => true,
            Self::Positional(values) => values.is_empty(),
            Self::Named(pairs) => pairs.is_empty(),
        }
    }
}

/// Binds `params` onto a prepared `SQLite` statement.
///
/// Named keys not referenced by the statement are ignored; statement
/// parameters without a value stay `NULL`.
pub(crate) fn bind_sqlite_params(
    statement: &mut Statement<'_>,
    params: &QueryParams,
) -> rusqlite::Result<()> {
    match params {
        QueryParams::None => Ok(()),
        QueryParams::Positional(values) => {
            for (offset, value) in values.iter().enumerate() {
                statement.raw_bind_parameter(offset + 1, value)?;
            }
            Ok(())
        }
        QueryParams::Named(pairs) => {
            for (name, value) in pairs {
                if let Some(index) = named_parameter_index(statement, name)? {
                    statement.raw_bind_parameter(index, value)?;
                }
            }
            Ok(())
        }
    }
}

/// Resolves a named parameter, trying each prefix when none was given.
fn named_parameter_index(statement: &Statement<'_>, name: &str) -> rusqlite::Result<Option<usize>> {
    if name.starts_with([':', '@', '$']) {
        return statement.parameter_index(name);
    }
    for prefix in [':', '@', '$'] {
        if let Some(index) = statement.parameter_index(&format!("{prefix}{name}"))? {
            return Ok(Some(index));
        }
    }
    Ok(None)
}
