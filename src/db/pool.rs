//! Connection pool management.
//!
//! This module builds the long-lived pool from validated connection settings
//! using database-specific pools (MySqlPool, PgPool, SqlitePool) to keep full
//! type support, and provides [`ConnectionLease`], the scoped ownership of one
//! pooled connection for the duration of one facade call.

use crate::config::{ConnectionSettings, PoolPolicy};
use crate::db::DatabaseType;
use crate::error::{FacadeError, FacadeResult};
use sqlx::pool::PoolConnection;
use sqlx::{
    Connection, Database, MySqlConnection, MySqlPool, PgConnection, PgPool, Pool,
    SqliteConnection, SqlitePool, mysql::MySqlConnectOptions, mysql::MySqlPoolOptions,
    postgres::PgConnectOptions, postgres::PgPoolOptions, sqlite::SqliteConnectOptions,
    sqlite::SqlitePoolOptions,
};
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{info, warn};

/// Database-specific connection pool (avoids AnyPool limitations).
#[derive(Debug, Clone)]
pub enum DbPool {
    MySql(MySqlPool),
    Postgres(PgPool),
    SQLite(SqlitePool),
}

impl DbPool {
    /// Get the database type for this pool.
    pub fn db_type(&self) -> DatabaseType {
        match self {
            DbPool::MySql(_) => DatabaseType::MySQL,
            DbPool::Postgres(_) => DatabaseType::PostgreSQL,
            DbPool::SQLite(_) => DatabaseType::SQLite,
        }
    }
}

/// Backend connect options derived from validated settings.
#[derive(Debug, Clone)]
pub enum BackendOptions {
    MySql(MySqlConnectOptions),
    Postgres(PgConnectOptions),
    SQLite(SqliteConnectOptions),
}

impl BackendOptions {
    /// Build connect options for `db_type` from the settings.
    ///
    /// Username and password from the settings override any credentials
    /// embedded in the URL. SQLite has no credentials and ignores them.
    pub fn new(
        db_type: DatabaseType,
        settings: &ConnectionSettings,
        policy: &PoolPolicy,
    ) -> FacadeResult<Self> {
        let invalid = |e: sqlx::Error| {
            FacadeError::configuration(format!(
                "Invalid {} connection URL {}: {}",
                db_type,
                settings.masked_url(),
                e
            ))
        };

        let options = match db_type {
            DatabaseType::MySQL => Self::MySql(
                MySqlConnectOptions::from_str(&settings.url)
                    .map_err(invalid)?
                    .username(&settings.username)
                    .password(&settings.password)
                    .charset("utf8mb4")
                    .statement_cache_capacity(policy.statement_cache_capacity),
            ),
            DatabaseType::PostgreSQL => Self::Postgres(
                PgConnectOptions::from_str(&settings.url)
                    .map_err(invalid)?
                    .username(&settings.username)
                    .password(&settings.password)
                    .statement_cache_capacity(policy.statement_cache_capacity),
            ),
            DatabaseType::SQLite => Self::SQLite(
                SqliteConnectOptions::from_str(&settings.url)
                    .map_err(invalid)?
                    .statement_cache_capacity(policy.statement_cache_capacity),
            ),
        };
        Ok(options)
    }

    pub fn db_type(&self) -> DatabaseType {
        match self {
            BackendOptions::MySql(_) => DatabaseType::MySQL,
            BackendOptions::Postgres(_) => DatabaseType::PostgreSQL,
            BackendOptions::SQLite(_) => DatabaseType::SQLite,
        }
    }

    /// Open one throwaway connection outside any pool and close it again.
    ///
    /// Fails fast on bad credentials or an unreachable host.
    pub async fn test_connection(&self) -> FacadeResult<()> {
        let result = match self {
            BackendOptions::MySql(opts) => match MySqlConnection::connect_with(opts).await {
                Ok(conn) => conn.close().await,
                Err(e) => Err(e),
            },
            BackendOptions::Postgres(opts) => match PgConnection::connect_with(opts).await {
                Ok(conn) => conn.close().await,
                Err(e) => Err(e),
            },
            BackendOptions::SQLite(opts) => match SqliteConnection::connect_with(opts).await {
                Ok(conn) => conn.close().await,
                Err(e) => Err(e),
            },
        };

        result.map_err(|e| {
            FacadeError::connection(
                format!("Wrong credentials or internal database error: {}", e),
                connection_suggestion(self.db_type(), &e),
                Some(e),
            )
        })?;

        info!(db_type = %self.db_type(), "The database connection was configured successfully");
        Ok(())
    }

    /// Construct the long-lived pool.
    ///
    /// Connections are opened lazily; the pool then keeps `min_idle`
    /// connections open in the background.
    pub fn into_pool(self, policy: &PoolPolicy) -> DbPool {
        match self {
            BackendOptions::MySql(opts) => DbPool::MySql(
                MySqlPoolOptions::new()
                    .min_connections(policy.min_idle)
                    .max_connections(policy.max_idle)
                    .connect_lazy_with(opts),
            ),
            BackendOptions::Postgres(opts) => DbPool::Postgres(
                PgPoolOptions::new()
                    .min_connections(policy.min_idle)
                    .max_connections(policy.max_idle)
                    .connect_lazy_with(opts),
            ),
            BackendOptions::SQLite(opts) => DbPool::SQLite(
                SqlitePoolOptions::new()
                    .min_connections(policy.min_idle)
                    .max_connections(policy.max_idle)
                    .connect_lazy_with(opts),
            ),
        }
    }
}

/// Generate a helpful suggestion for connection errors.
fn connection_suggestion(db_type: DatabaseType, error: &sqlx::Error) -> String {
    let error_str = error.to_string().to_lowercase();

    if error_str.contains("connection refused") {
        return format!(
            "Check that the {} server is running and accessible",
            db_type
        );
    }

    if error_str.contains("authentication") || error_str.contains("password") {
        return "Verify the username and password".to_string();
    }

    if error_str.contains("does not exist") || error_str.contains("unknown database") {
        return "Check that the database name exists".to_string();
    }

    if error_str.contains("tls") || error_str.contains("ssl") {
        return "Check TLS/SSL configuration or try disabling it".to_string();
    }

    match db_type {
        DatabaseType::PostgreSQL => {
            "Verify the connection URL format: postgres://host:5432/db".to_string()
        }
        DatabaseType::MySQL => "Verify the connection URL format: mysql://host:3306/db".to_string(),
        DatabaseType::SQLite => {
            "Verify the file path exists and is accessible: sqlite:path/to/db.sqlite".to_string()
        }
    }
}

// =============================================================================
// Connection Lease
// =============================================================================

/// Counters of connections leased from and released back to the pool.
#[derive(Debug, Default)]
pub struct LeaseStats {
    leased: AtomicU64,
    released: AtomicU64,
    discarded: AtomicU64,
}

/// Point-in-time copy of [`LeaseStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LeaseSnapshot {
    pub leased: u64,
    pub released: u64,
    /// Released connections that were closed instead of returned to the pool
    pub discarded: u64,
}

impl LeaseSnapshot {
    /// Leases not yet released.
    pub fn outstanding(&self) -> u64 {
        self.leased.saturating_sub(self.released)
    }
}

impl LeaseStats {
    pub fn snapshot(&self) -> LeaseSnapshot {
        LeaseSnapshot {
            leased: self.leased.load(Ordering::Acquire),
            released: self.released.load(Ordering::Acquire),
            discarded: self.discarded.load(Ordering::Acquire),
        }
    }
}

/// RAII guard for one pooled connection.
///
/// The connection goes back to the pool on [`release`](Self::release) or,
/// failing that, when the guard is dropped. A lease marked with
/// [`discard`](Self::discard) closes its connection instead, so a session in
/// an unknown state never becomes available to another caller.
///
/// # Usage
///
/// ```ignore
/// let mut lease = ConnectionLease::acquire(&pool, &stats).await?;
/// let outcome = run(lease.connection()).await;
/// let released = lease.release().await;
/// ```
pub struct ConnectionLease<DB: Database> {
    conn: Option<PoolConnection<DB>>,
    stats: Arc<LeaseStats>,
    discard: bool,
}

impl<DB: Database> std::fmt::Debug for ConnectionLease<DB> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionLease")
            .field("held", &self.conn.is_some())
            .field("discard", &self.discard)
            .finish_non_exhaustive()
    }
}

impl<DB: Database> ConnectionLease<DB> {
    /// Lease one connection from the pool.
    pub async fn acquire(pool: &Pool<DB>, stats: &Arc<LeaseStats>) -> FacadeResult<Self> {
        let conn = pool.acquire().await.map_err(|e| {
            FacadeError::query(
                "Could not obtain an instance of connection from the pool",
                e,
            )
        })?;
        stats.leased.fetch_add(1, Ordering::AcqRel);

        Ok(Self {
            conn: Some(conn),
            stats: Arc::clone(stats),
            discard: false,
        })
    }

    /// Get the leased connection.
    pub fn connection(&mut self) -> FacadeResult<&mut DB::Connection> {
        self.conn
            .as_deref_mut()
            .ok_or_else(|| FacadeError::query_message("Connection lease was already released"))
    }

    /// Close the connection on release instead of returning it to the pool.
    pub fn discard(&mut self) {
        self.discard = true;
    }

    /// Explicitly release the connection (preferred over relying on Drop).
    pub async fn release(mut self) -> FacadeResult<()> {
        let Some(conn) = self.conn.take() else {
            return Ok(());
        };
        self.stats.released.fetch_add(1, Ordering::AcqRel);

        if !self.discard {
            drop(conn);
            return Ok(());
        }

        self.stats.discarded.fetch_add(1, Ordering::AcqRel);
        warn!("Closing connection instead of returning it to the pool");
        conn.close()
            .await
            .map_err(|e| FacadeError::query("Cannot close the connection", e))
    }
}

impl<DB: Database> Drop for ConnectionLease<DB> {
    fn drop(&mut self) {
        let Some(mut conn) = self.conn.take() else {
            return;
        };
        self.stats.released.fetch_add(1, Ordering::AcqRel);

        if self.discard {
            self.stats.discarded.fetch_add(1, Ordering::AcqRel);
            conn.close_on_drop();
        }
        warn!(
            discard = self.discard,
            "Connection released via Drop - the call was cancelled or did not release explicitly"
        );
    }
}
