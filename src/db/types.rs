//! Metadata-driven row decoding.
//!
//! Decoding uses a two-phase approach:
//! 1. [`ColumnLayout`] reads column names and types once per result and
//!    classifies each column into a [`TypeCategory`]
//! 2. Database-specific decoders turn each column of each row into a
//!    [`Value`] according to its category
//!
//! Statements run without bind parameters, so MySQL and PostgreSQL return
//! every value in text format. That is what lets DECIMAL, DATE, UUID and
//! other types without a dedicated [`Value`] variant be read as text.

use crate::error::{FacadeError, FacadeResult};
use crate::models::{Row, Value};
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::mysql::MySqlRow;
use sqlx::postgres::PgRow;
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Row as SqlxRow, TypeInfo, ValueRef};

// =============================================================================
// Type Classification
// =============================================================================

/// Logical category for database column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    Decimal,
    Boolean,
    Text,
    Binary,
    Timestamp,
    Unknown,
}

/// Classify a database type name into a logical category.
pub fn categorize_type(type_name: &str) -> TypeCategory {
    let lower = type_name.to_lowercase();

    // Arrays and ranges have no scalar representation
    if lower.ends_with("[]") || lower.contains("range") {
        return TypeCategory::Unknown;
    }

    // Decimal/Numeric - check first as it overlaps with "numeric" in float checks
    if lower.contains("decimal") || lower.contains("numeric") {
        return TypeCategory::Decimal;
    }

    if lower.contains("timestamp") || lower.contains("datetime") {
        return TypeCategory::Timestamp;
    }

    if lower == "bool" || lower == "boolean" {
        return TypeCategory::Boolean;
    }

    // Integer types ("interval" and "point" also contain "int")
    if (lower.contains("int") || lower.contains("serial"))
        && !lower.contains("interval")
        && !lower.contains("point")
    {
        return TypeCategory::Integer;
    }

    if lower.contains("float") || lower.contains("double") || lower == "real" {
        return TypeCategory::Float;
    }

    // MySQL sends BIT and GEOMETRY values as raw bytes
    if lower.contains("blob")
        || lower.contains("binary")
        || lower == "bytea"
        || lower == "bit"
        || lower == "geometry"
    {
        return TypeCategory::Binary;
    }

    if lower.contains("char") || lower.contains("text") || lower.contains("clob") || lower == "name"
    {
        return TypeCategory::Text;
    }

    // date, time, uuid, json, enum, ...
    TypeCategory::Unknown
}

// =============================================================================
// Column Layout
// =============================================================================

/// Name and type of one result column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: String,
    pub type_name: String,
    pub category: TypeCategory,
}

/// Column metadata of one result, read once and reused for every row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnLayout {
    columns: Vec<ColumnSpec>,
}

impl ColumnLayout {
    /// Read the column metadata carried by a row.
    pub fn of<R: SqlxRow>(row: &R) -> Self {
        let columns = row
            .columns()
            .iter()
            .map(|col| {
                let type_name = col.type_info().name().to_string();
                ColumnSpec {
                    name: col.name().to_string(),
                    category: categorize_type(&type_name),
                    type_name,
                }
            })
            .collect();
        Self { columns }
    }

    pub fn columns(&self) -> &[ColumnSpec] {
        &self.columns
    }
}

// =============================================================================
// Row Decoding Trait
// =============================================================================

/// Decode a database row into a generic [`Row`].
pub trait DecodeRow: SqlxRow {
    fn decode_with(&self, layout: &ColumnLayout) -> FacadeResult<Row>;
}

impl DecodeRow for MySqlRow {
    fn decode_with(&self, layout: &ColumnLayout) -> FacadeResult<Row> {
        decode_columns(self, layout, mysql::decode_column)
    }
}

impl DecodeRow for PgRow {
    fn decode_with(&self, layout: &ColumnLayout) -> FacadeResult<Row> {
        decode_columns(self, layout, postgres::decode_column)
    }
}

impl DecodeRow for SqliteRow {
    fn decode_with(&self, layout: &ColumnLayout) -> FacadeResult<Row> {
        decode_columns(self, layout, sqlite::decode_column)
    }
}

type ColumnDecoder<R> = fn(&R, usize, &ColumnSpec) -> Result<Value, sqlx::Error>;

fn decode_columns<R: SqlxRow>(
    row: &R,
    layout: &ColumnLayout,
    decode: ColumnDecoder<R>,
) -> FacadeResult<Row> {
    let mut out = Row::with_capacity(layout.columns().len());
    for (idx, spec) in layout.columns().iter().enumerate() {
        let value = decode(row, idx, spec).map_err(|e| {
            FacadeError::query(
                format!(
                    "Could not decode column '{}' of type {}",
                    spec.name, spec.type_name
                ),
                e,
            )
        })?;
        // Duplicate column names: the last one wins
        out.insert(spec.name.clone(), value);
    }
    Ok(out)
}

// =============================================================================
// Database-Specific Decoders
// =============================================================================

mod mysql {
    use super::*;

    pub fn decode_column(
        row: &MySqlRow,
        idx: usize,
        spec: &ColumnSpec,
    ) -> Result<Value, sqlx::Error> {
        if row.try_get_raw(idx)?.is_null() {
            return Ok(Value::Null);
        }

        match spec.category {
            TypeCategory::Integer => decode_integer(row, idx),
            TypeCategory::Boolean => row.try_get::<bool, _>(idx).map(Value::Boolean),
            TypeCategory::Float => row
                .try_get::<f64, _>(idx)
                .or_else(|_| row.try_get::<f32, _>(idx).map(f64::from))
                .map(Value::Float),
            TypeCategory::Binary => row.try_get_unchecked::<Vec<u8>, _>(idx).map(Value::Binary),
            TypeCategory::Timestamp => decode_timestamp(row, idx),
            TypeCategory::Decimal | TypeCategory::Text | TypeCategory::Unknown => {
                decode_text_or_bytes(row, idx)
            }
        }
    }

    /// Text, or the raw bytes when they are not valid UTF-8.
    fn decode_text_or_bytes(row: &MySqlRow, idx: usize) -> Result<Value, sqlx::Error> {
        match row.try_get_unchecked::<String, _>(idx) {
            Ok(v) => Ok(Value::Text(v)),
            Err(_) => row.try_get_unchecked::<Vec<u8>, _>(idx).map(Value::Binary),
        }
    }

    fn decode_integer(row: &MySqlRow, idx: usize) -> Result<Value, sqlx::Error> {
        match row.try_get::<i64, _>(idx) {
            Ok(v) => Ok(Value::Integer(v)),
            // UNSIGNED columns
            Err(_) => {
                let v = row.try_get::<u64, _>(idx)?;
                Ok(i64::try_from(v)
                    .map(Value::Integer)
                    .unwrap_or_else(|_| Value::Text(v.to_string())))
            }
        }
    }

    fn decode_timestamp(row: &MySqlRow, idx: usize) -> Result<Value, sqlx::Error> {
        if let Ok(v) = row.try_get::<DateTime<Utc>, _>(idx) {
            return Ok(Value::Timestamp(v));
        }
        if let Ok(v) = row.try_get::<NaiveDateTime, _>(idx) {
            return Ok(Value::Timestamp(v.and_utc()));
        }
        // Zero dates ("0000-00-00 00:00:00") have no date-time representation
        row.try_get_unchecked::<String, _>(idx).map(Value::Text)
    }
}

mod postgres {
    use super::*;

    pub fn decode_column(row: &PgRow, idx: usize, spec: &ColumnSpec) -> Result<Value, sqlx::Error> {
        if row.try_get_raw(idx)?.is_null() {
            return Ok(Value::Null);
        }

        match spec.category {
            TypeCategory::Integer => decode_integer(row, idx, &spec.type_name),
            TypeCategory::Boolean => row.try_get::<bool, _>(idx).map(Value::Boolean),
            TypeCategory::Float => {
                if spec.type_name.eq_ignore_ascii_case("FLOAT4") {
                    row.try_get::<f32, _>(idx).map(|v| Value::Float(v.into()))
                } else {
                    row.try_get::<f64, _>(idx).map(Value::Float)
                }
            }
            // BIT and VARBIT arrive as text such as "1010"
            TypeCategory::Binary => match row.try_get::<Vec<u8>, _>(idx) {
                Ok(v) => Ok(Value::Binary(v)),
                Err(_) => row.try_get_unchecked::<String, _>(idx).map(Value::Text),
            },
            TypeCategory::Timestamp => decode_timestamp(row, idx),
            TypeCategory::Decimal | TypeCategory::Text | TypeCategory::Unknown => {
                row.try_get_unchecked::<String, _>(idx).map(Value::Text)
            }
        }
    }

    fn decode_integer(row: &PgRow, idx: usize, type_name: &str) -> Result<Value, sqlx::Error> {
        match type_name.to_ascii_uppercase().as_str() {
            "INT2" | "SMALLINT" => row.try_get::<i16, _>(idx).map(|v| Value::Integer(v.into())),
            "INT4" | "INT" | "INTEGER" => {
                row.try_get::<i32, _>(idx).map(|v| Value::Integer(v.into()))
            }
            _ => row.try_get::<i64, _>(idx).map(Value::Integer),
        }
    }

    fn decode_timestamp(row: &PgRow, idx: usize) -> Result<Value, sqlx::Error> {
        // TIMESTAMPTZ
        if let Ok(v) = row.try_get::<DateTime<Utc>, _>(idx) {
            return Ok(Value::Timestamp(v));
        }
        // TIMESTAMP (no time zone, read as UTC)
        if let Ok(v) = row.try_get::<NaiveDateTime, _>(idx) {
            return Ok(Value::Timestamp(v.and_utc()));
        }
        // 'infinity' and friends
        row.try_get_unchecked::<String, _>(idx).map(Value::Text)
    }
}

/// SQLite types are per value, not per column: the declared type only
/// decides booleans, timestamps and blobs, everything else follows the
/// storage class of the value itself.
mod sqlite {
    use super::*;

    pub fn decode_column(
        row: &SqliteRow,
        idx: usize,
        spec: &ColumnSpec,
    ) -> Result<Value, sqlx::Error> {
        if row.try_get_raw(idx)?.is_null() {
            return Ok(Value::Null);
        }

        match spec.category {
            TypeCategory::Boolean => match row.try_get::<bool, _>(idx) {
                Ok(v) => Ok(Value::Boolean(v)),
                Err(_) => decode_by_storage(row, idx),
            },
            TypeCategory::Timestamp => decode_timestamp(row, idx),
            TypeCategory::Binary => match row.try_get::<Vec<u8>, _>(idx) {
                Ok(v) => Ok(Value::Binary(v)),
                Err(_) => decode_by_storage(row, idx),
            },
            _ => decode_by_storage(row, idx),
        }
    }

    fn decode_by_storage(row: &SqliteRow, idx: usize) -> Result<Value, sqlx::Error> {
        let storage = categorize_type(row.try_get_raw(idx)?.type_info().name());
        match storage {
            TypeCategory::Integer => row.try_get::<i64, _>(idx).map(Value::Integer),
            TypeCategory::Float => row.try_get::<f64, _>(idx).map(Value::Float),
            TypeCategory::Binary => row.try_get::<Vec<u8>, _>(idx).map(Value::Binary),
            _ => row.try_get_unchecked::<String, _>(idx).map(Value::Text),
        }
    }

    fn decode_timestamp(row: &SqliteRow, idx: usize) -> Result<Value, sqlx::Error> {
        if let Ok(v) = row.try_get::<DateTime<Utc>, _>(idx) {
            return Ok(Value::Timestamp(v));
        }
        if let Ok(v) = row.try_get::<NaiveDateTime, _>(idx) {
            return Ok(Value::Timestamp(v.and_utc()));
        }
        // Free-form text stored in a DATETIME column
        decode_by_storage(row, idx)
    }
}
