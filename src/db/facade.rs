//! The database access facade.
//!
//! [`Database`] is the single access point collaborators use. It starts out
//! uninitialized; [`Database::initialize`] validates the configuration,
//! proves the credentials with a throwaway connection and builds the
//! long-lived pool. From then on [`Database::query_select`] and
//! [`Database::query_update`] lease one pooled connection per call.
//!
//! The context is cheap to clone and every clone shares the same pool.

use crate::config::{DatabaseProperties, PoolPolicy};
use crate::db::DatabaseType;
use crate::db::executor::{Backend, UPDATE_ERROR};
use crate::db::pool::{BackendOptions, ConnectionLease, DbPool, LeaseSnapshot, LeaseStats};
use crate::db::statement::{KeyRetrieval, key_retrieval};
use crate::error::{FacadeError, FacadeResult};
use crate::models::ResultSet;
use sqlx::{Connection, Pool};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

/// Shared handle to the database access layer.
///
/// # Example
///
/// ```ignore
/// let db = Database::new();
/// db.initialize(&DatabaseProperties::from_env("DB")).await?;
/// let rows = db.query_select("SELECT id, name FROM actors").await?;
/// let keys = db
///     .query_update("INSERT INTO actors(name) VALUES('Carol')", true)
///     .await?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct Database {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    policy: PoolPolicy,
    /// Set exactly once, by the first successful initialization.
    ready: OnceCell<DbPool>,
    stats: Arc<LeaseStats>,
}

impl Database {
    /// Create an uninitialized facade with the default pool policy.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an uninitialized facade with a custom pool policy.
    pub fn with_policy(policy: PoolPolicy) -> Self {
        Self {
            inner: Arc::new(Inner {
                policy,
                ready: OnceCell::new(),
                stats: Arc::default(),
            }),
        }
    }

    /// Initialize the facade from connection properties.
    ///
    /// Does nothing once initialized, even when `properties` differ. When
    /// several tasks call this concurrently the initialization runs once and
    /// the others wait for its outcome. A failed attempt leaves the facade
    /// uninitialized so it can be retried.
    pub async fn initialize(&self, properties: &DatabaseProperties) -> FacadeResult<()> {
        if self.is_initialized() {
            debug!("Database access layer already initialized");
            return Ok(());
        }

        let policy = self.inner.policy;
        self.inner
            .ready
            .get_or_try_init(|| connect(properties, policy))
            .await?;
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.ready.initialized()
    }

    /// Backend of the initialized facade.
    pub fn db_type(&self) -> Option<DatabaseType> {
        self.inner.ready.get().map(DbPool::db_type)
    }

    pub fn policy(&self) -> PoolPolicy {
        self.inner.policy
    }

    /// Connections leased and released so far.
    pub fn lease_stats(&self) -> LeaseSnapshot {
        self.inner.stats.snapshot()
    }

    /// Run a read statement and return every row it produces.
    ///
    /// The SQL is sent as is, without parameter binding.
    pub async fn query_select(&self, sql: &str) -> FacadeResult<ResultSet> {
        let pool = self.pool()?;
        let stats = &self.inner.stats;
        let start = Instant::now();

        let result = match pool {
            DbPool::MySql(p) => select_on(p, stats, sql).await,
            DbPool::Postgres(p) => select_on(p, stats, sql).await,
            DbPool::SQLite(p) => select_on(p, stats, sql).await,
        };

        log_statement("select", sql, &result, start);
        result
    }

    /// Run a write statement and return the keys it generated.
    ///
    /// With `use_transaction` the statement runs inside its own transaction,
    /// committed on success and rolled back on failure.
    pub async fn query_update(&self, sql: &str, use_transaction: bool) -> FacadeResult<ResultSet> {
        let pool = self.pool()?;
        let stats = &self.inner.stats;
        let keys = key_retrieval(sql, pool.db_type());
        let start = Instant::now();

        let result = match pool {
            DbPool::MySql(p) => update_on(p, stats, sql, &keys, use_transaction).await,
            DbPool::Postgres(p) => update_on(p, stats, sql, &keys, use_transaction).await,
            DbPool::SQLite(p) => update_on(p, stats, sql, &keys, use_transaction).await,
        };

        log_statement("update", sql, &result, start);
        result
    }

    fn pool(&self) -> FacadeResult<&DbPool> {
        self.inner.ready.get().ok_or(FacadeError::Uninitialized)
    }
}

async fn connect(properties: &DatabaseProperties, policy: PoolPolicy) -> FacadeResult<DbPool> {
    let settings = properties.validate()?;
    let db_type = DatabaseType::load(&settings.driver, &settings.url)?;
    let options = BackendOptions::new(db_type, &settings, &policy)?;

    options.test_connection().await?;
    let pool = options.into_pool(&policy);

    info!(
        db_type = %db_type,
        url = %settings.masked_url(),
        min_idle = policy.min_idle,
        max_idle = policy.max_idle,
        statement_cache = policy.statement_cache_capacity,
        "Database access layer initialized"
    );
    Ok(pool)
}

fn log_statement(kind: &str, sql: &str, result: &FacadeResult<ResultSet>, start: Instant) {
    let elapsed_ms = start.elapsed().as_millis() as u64;
    match result {
        Ok(rows) => debug!(kind, sql, rows = rows.len(), elapsed_ms, "Statement executed"),
        Err(e) => debug!(kind, sql, error = %e, elapsed_ms, "Statement failed"),
    }
}

// =============================================================================
// Lease Handling
// =============================================================================

async fn select_on<DB: Backend>(
    pool: &Pool<DB>,
    stats: &Arc<LeaseStats>,
    sql: &str,
) -> FacadeResult<ResultSet> {
    let mut lease = ConnectionLease::acquire(pool, stats).await?;

    let outcome = match lease.connection() {
        Ok(conn) => DB::select(conn, sql).await,
        Err(e) => Err(e),
    };
    finish(lease, outcome).await
}

async fn update_on<DB: Backend>(
    pool: &Pool<DB>,
    stats: &Arc<LeaseStats>,
    sql: &str,
    keys: &KeyRetrieval,
    use_transaction: bool,
) -> FacadeResult<ResultSet> {
    let mut lease = ConnectionLease::acquire(pool, stats).await?;

    let (outcome, discard) = match lease.connection() {
        Ok(conn) if use_transaction => transactional::<DB>(conn, sql, keys).await,
        Ok(conn) => (DB::update(conn, sql, keys).await, false),
        Err(e) => (Err(e), false),
    };
    if discard {
        lease.discard();
    }
    finish(lease, outcome).await
}

/// Run one write in its own transaction.
///
/// Returns the outcome and whether the connection must be discarded because
/// its transaction state is unknown.
async fn transactional<DB: Backend>(
    conn: &mut DB::Connection,
    sql: &str,
    keys: &KeyRetrieval,
) -> (FacadeResult<ResultSet>, bool) {
    let mut tx = match conn.begin().await {
        Ok(tx) => tx,
        Err(e) => return (Err(FacadeError::query(UPDATE_ERROR, e)), true),
    };

    match DB::update(&mut *tx, sql, keys).await {
        Ok(rows) => match tx.commit().await {
            Ok(()) => (Ok(rows), false),
            Err(e) => {
                warn!(error = %e, "Commit failed, discarding connection");
                (Err(FacadeError::query(UPDATE_ERROR, e)), true)
            }
        },
        Err(err) => match tx.rollback().await {
            Ok(()) => (Err(err), false),
            Err(rollback_err) => {
                warn!(
                    error = %rollback_err,
                    "Rollback failed, discarding connection"
                );
                (Err(err), true)
            }
        },
    }
}

/// Release the lease, then report the call outcome.
///
/// A statement failure takes precedence over a release failure.
async fn finish<DB: Backend>(
    lease: ConnectionLease<DB>,
    outcome: FacadeResult<ResultSet>,
) -> FacadeResult<ResultSet> {
    let released = lease.release().await;

    match (outcome, released) {
        (Ok(rows), Ok(())) => Ok(rows),
        (Ok(_), Err(release_err)) => Err(release_err),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(release_err)) => {
            warn!(error = %release_err, "Failed to release connection after statement error");
            Err(e)
        }
    }
}
