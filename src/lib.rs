//! Database access facade.
//!
//! A small connection-pooled SQL execution surface over PostgreSQL, MySQL
//! and SQLite. Collaborators initialize one [`Database`] at process start and
//! then run complete SQL statements through it, receiving generic rows keyed
//! by column name.

pub mod config;
pub mod db;
pub mod error;
pub mod models;

pub use config::{DatabaseProperties, PoolPolicy};
pub use db::{Database, DatabaseType};
pub use error::{FacadeError, FacadeResult};
pub use models::{ResultSet, Row, Value};
