//! Generic row data models.
//!
//! Query output is decoupled from any schema: each row is a map from the
//! column name reported by the driver to a dynamically-typed [`Value`].

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;

/// A scalar column value, its variant chosen from the column type the driver
/// reported at decode time.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    /// SQL NULL
    Null,
    Integer(i64),
    Float(f64),
    /// Text, and the textual form of types without a dedicated variant
    /// (DECIMAL, DATE, TIME, UUID, JSON, ...)
    Text(String),
    Boolean(bool),
    /// Serialized as RFC 3339
    Timestamp(DateTime<Utc>),
    /// Binary data (base64 encoded in JSON)
    #[serde(serialize_with = "base64_bytes::serialize")]
    Binary(Vec<u8>),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(v) => Some(v),
            _ => None,
        }
    }
}

/// One result row: column name (case as returned by the driver) to value.
pub type Row = HashMap<String, Value>;

/// Rows in the order the database produced them.
pub type ResultSet = Vec<Row>;

mod base64_bytes {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use serde::{Serialize, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        STANDARD.encode(bytes).serialize(serializer)
    }
}
