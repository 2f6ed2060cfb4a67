//! Core type definitions for Table Store
//!
//! Includes the scalar type catalog entry, column kinds, and the typed cell
//! value exchanged with callers.

use std::fmt;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Scalar Types (catalog)
// ============================================================================

/// A named logical scalar kind recorded in the types catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ScalarType {
    pub id: Uuid,
    /// Unique name, e.g. "text" or "relationship"
    pub name: String,
    /// Backend-native type used for physical columns, e.g. "numeric"
    #[sqlx(rename = "pg_type")]
    pub backend_type: String,
    /// Free-form configuration; a `kind` of "formula" or "relationship" marks the type virtual
    pub config: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ScalarType {
    /// Column kind implied by this type's configuration
    pub fn kind(&self) -> ColumnKind {
        ColumnKind::from_type_config(&self.config)
    }

    pub fn is_virtual(&self) -> bool {
        self.kind().is_virtual()
    }
}

// ============================================================================
// Column Kinds
// ============================================================================

/// How a logical column is materialized
///
/// Resolved once from the column's type when the column is created and stored
/// on the column row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnKind {
    /// Backed by a real column on the physical table
    #[default]
    Physical,
    /// Inert computed column; never materialized or evaluated
    Formula,
    /// Link to rows of another table, resolved on read
    Relationship,
}

impl ColumnKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnKind::Physical => "physical",
            ColumnKind::Formula => "formula",
            ColumnKind::Relationship => "relationship",
        }
    }

    /// Virtual columns have no physical column behind them
    pub fn is_virtual(&self) -> bool {
        !matches!(self, ColumnKind::Physical)
    }

    /// Derive the kind from a type configuration's `kind` discriminator
    pub fn from_type_config(config: &serde_json::Value) -> Self {
        match config.get("kind").and_then(|k| k.as_str()) {
            Some("formula") => ColumnKind::Formula,
            Some("relationship") => ColumnKind::Relationship,
            _ => ColumnKind::Physical,
        }
    }
}

impl fmt::Display for ColumnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for ColumnKind {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "physical" => Ok(ColumnKind::Physical),
            "formula" => Ok(ColumnKind::Formula),
            "relationship" => Ok(ColumnKind::Relationship),
            other => Err(format!("unknown column kind '{}'", other)),
        }
    }
}

// ============================================================================
// Backend Scalar Kinds
// ============================================================================

/// Backend scalar families the row mapper reads natively
///
/// Anything else is read back through a `::text` cast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarKind {
    Text,
    SmallInt,
    Integer,
    BigInt,
    Real,
    Double,
    Numeric,
    Boolean,
    Uuid,
    Timestamp,
    TimestampTz,
    Json,
    Bytes,
    Other,
}

impl ScalarKind {
    /// Classify a backend type name such as "numeric(10,2)" or "TIMESTAMPTZ"
    pub fn from_backend_type(name: &str) -> Self {
        let normalized = normalize_type_name(name);
        match normalized.as_str() {
            "text" | "varchar" | "character varying" | "char" | "character" | "bpchar"
            | "name" => ScalarKind::Text,
            "int2" | "smallint" => ScalarKind::SmallInt,
            "int4" | "int" | "integer" => ScalarKind::Integer,
            "int8" | "bigint" => ScalarKind::BigInt,
            "float4" | "real" => ScalarKind::Real,
            "float8" | "double precision" | "float" => ScalarKind::Double,
            "numeric" | "decimal" => ScalarKind::Numeric,
            "bool" | "boolean" => ScalarKind::Boolean,
            "uuid" => ScalarKind::Uuid,
            "timestamp" | "timestamp without time zone" => ScalarKind::Timestamp,
            "timestamptz" | "timestamp with time zone" => ScalarKind::TimestampTz,
            "json" | "jsonb" => ScalarKind::Json,
            "bytea" => ScalarKind::Bytes,
            _ => ScalarKind::Other,
        }
    }

    /// Whether values of this kind must be selected with a `::text` cast
    pub fn reads_as_text(&self) -> bool {
        matches!(self, ScalarKind::Other)
    }
}

/// Lowercase, drop type modifiers and collapse whitespace
fn normalize_type_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut depth = 0usize;
    for c in name.chars() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            _ if depth == 0 => out.extend(c.to_lowercase()),
            _ => {}
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ============================================================================
// Cell Values
// ============================================================================

/// A typed cell value as exchanged with callers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum CellValue {
    Null,
    String(String),
    Number(f64),
    Bool(bool),
    Timestamp(DateTime<Utc>),
    Bytes(Vec<u8>),
    Json(serde_json::Map<String, serde_json::Value>),
}

impl CellValue {
    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }

    /// The string payload, if this is a string cell
    pub fn as_str(&self) -> Option<&str> {
        match self {
            CellValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Render as a plain JSON value
    ///
    /// Timestamps become RFC 3339 strings and bytes become base64 strings.
    /// Non-finite numbers render as null.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value;

        match self {
            CellValue::Null => Value::Null,
            CellValue::String(s) => Value::String(s.clone()),
            CellValue::Number(n) => serde_json::Number::from_f64(*n)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            CellValue::Bool(b) => Value::Bool(*b),
            CellValue::Timestamp(ts) => {
                Value::String(ts.to_rfc3339_opts(SecondsFormat::AutoSi, true))
            }
            CellValue::Bytes(bytes) => Value::String(BASE64.encode(bytes)),
            CellValue::Json(map) => Value::Object(map.clone()),
        }
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        CellValue::String(value.to_string())
    }
}

impl From<String> for CellValue {
    fn from(value: String) -> Self {
        CellValue::String(value)
    }
}

impl From<f64> for CellValue {
    fn from(value: f64) -> Self {
        CellValue::Number(value)
    }
}

impl From<bool> for CellValue {
    fn from(value: bool) -> Self {
        CellValue::Bool(value)
    }
}

impl From<DateTime<Utc>> for CellValue {
    fn from(value: DateTime<Utc>) -> Self {
        CellValue::Timestamp(value)
    }
}

impl From<Vec<u8>> for CellValue {
    fn from(value: Vec<u8>) -> Self {
        CellValue::Bytes(value)
    }
}

impl From<serde_json::Map<String, serde_json::Value>> for CellValue {
    fn from(value: serde_json::Map<String, serde_json::Value>) -> Self {
        CellValue::Json(value)
    }
}

impl<T: Into<CellValue>> From<Option<T>> for CellValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(CellValue::Null)
    }
}
