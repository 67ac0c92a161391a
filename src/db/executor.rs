//! Statement execution on a leased connection.
//!
//! Each backend module below runs statements the same way:
//! - reads stream rows, read the column layout from the first row and
//!   decode every row with it
//! - writes execute and then produce the generated keys the way the
//!   backend can report them (see [`KeyRetrieval`])
//!
//! Statements carry no bind parameters and run through the backend's simple
//! query protocol. The [`Backend`] trait lets the facade drive any of them
//! through the same lease and transaction handling.

use crate::db::statement::{
    KeyRetrieval, MYSQL_GENERATED_KEY_COLUMN, SQLITE_GENERATED_KEY_COLUMN,
};
use crate::db::types::{ColumnLayout, DecodeRow};
use crate::error::{FacadeError, FacadeResult};
use crate::models::{ResultSet, Row, Value};
use futures_util::TryStreamExt;
use futures_util::future::BoxFuture;
use sqlx::{Database, Executor};

/// Message of every failed read.
pub const QUERY_ERROR: &str = "An error occurred when trying to query the database.";

/// Message of every failed write.
pub const UPDATE_ERROR: &str = "An error occurred when trying to update the database.";

/// A database the facade can run statements against.
pub trait Backend: Database {
    /// Run a read statement and decode all of its rows.
    fn select<'c>(
        conn: &'c mut Self::Connection,
        sql: &'c str,
    ) -> BoxFuture<'c, FacadeResult<ResultSet>>;

    /// Run a write statement and return its generated keys.
    fn update<'c>(
        conn: &'c mut Self::Connection,
        sql: &'c str,
        keys: &'c KeyRetrieval,
    ) -> BoxFuture<'c, FacadeResult<ResultSet>>;
}

impl Backend for sqlx::MySql {
    fn select<'c>(
        conn: &'c mut Self::Connection,
        sql: &'c str,
    ) -> BoxFuture<'c, FacadeResult<ResultSet>> {
        Box::pin(mysql::fetch_all(conn, sql, QUERY_ERROR))
    }

    fn update<'c>(
        conn: &'c mut Self::Connection,
        sql: &'c str,
        keys: &'c KeyRetrieval,
    ) -> BoxFuture<'c, FacadeResult<ResultSet>> {
        Box::pin(mysql::update(conn, sql, keys))
    }
}

impl Backend for sqlx::Postgres {
    fn select<'c>(
        conn: &'c mut Self::Connection,
        sql: &'c str,
    ) -> BoxFuture<'c, FacadeResult<ResultSet>> {
        Box::pin(postgres::fetch_all(conn, sql, QUERY_ERROR))
    }

    fn update<'c>(
        conn: &'c mut Self::Connection,
        sql: &'c str,
        keys: &'c KeyRetrieval,
    ) -> BoxFuture<'c, FacadeResult<ResultSet>> {
        Box::pin(postgres::update(conn, sql, keys))
    }
}

impl Backend for sqlx::Sqlite {
    fn select<'c>(
        conn: &'c mut Self::Connection,
        sql: &'c str,
    ) -> BoxFuture<'c, FacadeResult<ResultSet>> {
        Box::pin(sqlite::fetch_all(conn, sql, QUERY_ERROR))
    }

    fn update<'c>(
        conn: &'c mut Self::Connection,
        sql: &'c str,
        keys: &'c KeyRetrieval,
    ) -> BoxFuture<'c, FacadeResult<ResultSet>> {
        Box::pin(sqlite::update(conn, sql, keys))
    }
}

// =============================================================================
// Common Helper Functions
// =============================================================================

/// Decodes streamed rows, reading the column layout from the first one.
#[derive(Default)]
struct ResultDecoder {
    layout: Option<ColumnLayout>,
    rows: ResultSet,
}

impl ResultDecoder {
    fn push<R: DecodeRow>(&mut self, row: &R) -> FacadeResult<()> {
        let layout = self.layout.get_or_insert_with(|| ColumnLayout::of(row));
        self.rows.push(row.decode_with(layout)?);
        Ok(())
    }

    fn finish(self) -> ResultSet {
        self.rows
    }
}

fn key_row(column: &str, value: Value) -> Row {
    let mut row = Row::with_capacity(1);
    row.insert(column.to_string(), value);
    row
}

// =============================================================================
// Database-Specific Implementations
// =============================================================================

mod mysql {
    use super::*;
    use sqlx::MySqlConnection;

    /// Stream the rows of `sql` and decode them.
    ///
    /// An empty result yields an empty set, never an error.
    pub async fn fetch_all(
        conn: &mut MySqlConnection,
        sql: &str,
        error_message: &'static str,
    ) -> FacadeResult<ResultSet> {
        let mut stream = conn.fetch(sql);
        let mut decoder = ResultDecoder::default();

        while let Some(row) = stream
            .try_next()
            .await
            .map_err(|e| FacadeError::query(error_message, e))?
        {
            decoder.push(&row)?;
        }
        Ok(decoder.finish())
    }

    pub async fn update(
        conn: &mut MySqlConnection,
        sql: &str,
        keys: &KeyRetrieval,
    ) -> FacadeResult<ResultSet> {
        if let KeyRetrieval::ReturnedRows(returning_sql) = keys {
            return fetch_all(conn, returning_sql, UPDATE_ERROR).await;
        }

        let result = conn
            .execute(sql)
            .await
            .map_err(|e| FacadeError::query(UPDATE_ERROR, e))?;

        if !matches!(keys, KeyRetrieval::LastInsertId) {
            return Ok(ResultSet::new());
        }
        Ok(generated_keys(result.last_insert_id(), result.rows_affected()))
    }

    /// Multi-row inserts report the id of the first row; the rest follow it.
    pub(super) fn generated_keys(first_id: u64, rows_affected: u64) -> ResultSet {
        // No AUTO_INCREMENT column
        if first_id == 0 {
            return ResultSet::new();
        }

        (0..rows_affected)
            .map(|offset| {
                let id = first_id.saturating_add(offset);
                let value = i64::try_from(id)
                    .map(Value::Integer)
                    .unwrap_or_else(|_| Value::Text(id.to_string()));
                key_row(MYSQL_GENERATED_KEY_COLUMN, value)
            })
            .collect()
    }
}

mod postgres {
    use super::*;
    use sqlx::PgConnection;

    pub async fn fetch_all(
        conn: &mut PgConnection,
        sql: &str,
        error_message: &'static str,
    ) -> FacadeResult<ResultSet> {
        let mut stream = conn.fetch(sql);
        let mut decoder = ResultDecoder::default();

        while let Some(row) = stream
            .try_next()
            .await
            .map_err(|e| FacadeError::query(error_message, e))?
        {
            decoder.push(&row)?;
        }
        Ok(decoder.finish())
    }

    pub async fn update(
        conn: &mut PgConnection,
        sql: &str,
        keys: &KeyRetrieval,
    ) -> FacadeResult<ResultSet> {
        match keys {
            KeyRetrieval::ReturnedRows(returning_sql) => {
                fetch_all(conn, returning_sql, UPDATE_ERROR).await
            }
            _ => {
                conn.execute(sql)
                    .await
                    .map_err(|e| FacadeError::query(UPDATE_ERROR, e))?;
                Ok(ResultSet::new())
            }
        }
    }
}

mod sqlite {
    use super::*;
    use sqlx::SqliteConnection;

    pub async fn fetch_all(
        conn: &mut SqliteConnection,
        sql: &str,
        error_message: &'static str,
    ) -> FacadeResult<ResultSet> {
        let mut stream = conn.fetch(sql);
        let mut decoder = ResultDecoder::default();

        while let Some(row) = stream
            .try_next()
            .await
            .map_err(|e| FacadeError::query(error_message, e))?
        {
            decoder.push(&row)?;
        }
        Ok(decoder.finish())
    }

    pub async fn update(
        conn: &mut SqliteConnection,
        sql: &str,
        keys: &KeyRetrieval,
    ) -> FacadeResult<ResultSet> {
        if let KeyRetrieval::ReturnedRows(returning_sql) = keys {
            return fetch_all(conn, returning_sql, UPDATE_ERROR).await;
        }

        let result = conn
            .execute(sql)
            .await
            .map_err(|e| FacadeError::query(UPDATE_ERROR, e))?;

        // INSERT OR IGNORE that ignored the row
        if !matches!(keys, KeyRetrieval::LastInsertRowid) || result.rows_affected() == 0 {
            return Ok(ResultSet::new());
        }
        Ok(vec![key_row(
            SQLITE_GENERATED_KEY_COLUMN,
            Value::Integer(result.last_insert_rowid()),
        )])
    }
}
