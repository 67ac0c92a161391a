//! Database access layer.
//!
//! This module provides:
//! - Driver resolution from the configured identifier
//! - Connection pool management and connection leases
//! - Statement classification for generated-key retrieval
//! - Statement execution and metadata-driven row decoding
//! - The [`Database`] facade tying them together

pub mod driver;
pub mod executor;
pub mod facade;
pub mod pool;
pub mod statement;
pub mod types;

pub use driver::DatabaseType;
pub use facade::Database;
pub use pool::{ConnectionLease, DbPool, LeaseSnapshot, LeaseStats};
