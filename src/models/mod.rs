//! Data models for the database access facade.
//!
//! This module re-exports the generic row types returned by every query.

pub mod value;

pub use value::{ResultSet, Row, Value};
