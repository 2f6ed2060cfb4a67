//! Conversion between [`CellValue`] and PostgreSQL values
//!
//! Writes bind the cell's natural PostgreSQL type and rely on an explicit cast
//! in the statement text to reach the column's backend type. Reads decode by
//! the column's [`ScalarKind`]; kinds outside the known set are selected as text.

use chrono::{DateTime, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use sqlx::Row as _;
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::Query;
use sqlx::Postgres;
use uuid::Uuid;

use crate::sql::dml::Param;
use crate::types::{CellValue, ScalarKind};

pub type PgQuery<'q> = Query<'q, Postgres, PgArguments>;

/// Bind one statement parameter
pub fn bind_param<'q>(query: PgQuery<'q>, param: &'q Param) -> PgQuery<'q> {
    match param {
        Param::Cell(cell) => bind_cell(query, cell),
        Param::Id(id) => query.bind(*id),
        Param::Ids(ids) => query.bind(ids.as_slice()),
        Param::Text(text) => query.bind(text.as_str()),
        Param::Limit(limit) => query.bind(*limit),
    }
}

/// Bind a cell value with its natural PostgreSQL type
pub fn bind_cell<'q>(query: PgQuery<'q>, cell: &'q CellValue) -> PgQuery<'q> {
    match cell {
        CellValue::Null => query.bind(None::<String>),
        CellValue::String(s) => query.bind(s.as_str()),
        CellValue::Number(n) => query.bind(*n),
        CellValue::Bool(b) => query.bind(*b),
        CellValue::Timestamp(ts) => query.bind(*ts),
        CellValue::Bytes(bytes) => query.bind(bytes.as_slice()),
        CellValue::Json(map) => query.bind(sqlx::types::Json(map)),
    }
}

/// Decode the value at `index` of a row; SQL NULL yields `None`
pub fn decode_cell(
    row: &PgRow,
    index: usize,
    kind: ScalarKind,
) -> Result<Option<CellValue>, sqlx::Error> {
    let cell = match kind {
        ScalarKind::Text | ScalarKind::Other => row
            .try_get::<Option<String>, _>(index)?
            .map(CellValue::String),
        ScalarKind::SmallInt => row
            .try_get::<Option<i16>, _>(index)?
            .map(|v| CellValue::Number(f64::from(v))),
        ScalarKind::Integer => row
            .try_get::<Option<i32>, _>(index)?
            .map(|v| CellValue::Number(f64::from(v))),
        ScalarKind::BigInt => row
            .try_get::<Option<i64>, _>(index)?
            .map(|v| CellValue::Number(v as f64)),
        ScalarKind::Real => row
            .try_get::<Option<f32>, _>(index)?
            .map(|v| CellValue::Number(f64::from(v))),
        ScalarKind::Double => row
            .try_get::<Option<f64>, _>(index)?
            .map(CellValue::Number),
        ScalarKind::Numeric => row
            .try_get::<Option<Decimal>, _>(index)?
            .and_then(|d| d.to_f64())
            .map(CellValue::Number),
        ScalarKind::Boolean => row
            .try_get::<Option<bool>, _>(index)?
            .map(CellValue::Bool),
        ScalarKind::Uuid => row
            .try_get::<Option<Uuid>, _>(index)?
            .map(|id| CellValue::String(id.to_string())),
        ScalarKind::Timestamp => row
            .try_get::<Option<NaiveDateTime>, _>(index)?
            .map(|ts| CellValue::Timestamp(ts.and_utc())),
        ScalarKind::TimestampTz => row
            .try_get::<Option<DateTime<Utc>>, _>(index)?
            .map(CellValue::Timestamp),
        ScalarKind::Json => row
            .try_get::<Option<serde_json::Value>, _>(index)?
            .and_then(json_to_cell),
        ScalarKind::Bytes => row
            .try_get::<Option<Vec<u8>>, _>(index)?
            .map(CellValue::Bytes),
    };
    Ok(cell)
}

/// Objects stay structured; JSON null is absent; other documents render as strings
pub fn json_to_cell(value: serde_json::Value) -> Option<CellValue> {
    match value {
        serde_json::Value::Null => None,
        serde_json::Value::Object(map) => Some(CellValue::Json(map)),
        serde_json::Value::String(s) => Some(CellValue::String(s)),
        other => Some(CellValue::String(other.to_string())),
    }
}
