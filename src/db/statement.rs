//! SQL statement classification for generated-key retrieval.
//!
//! Write statements return the keys the database generated for them. How
//! those keys are obtained depends on the backend and on the statement, so
//! the statement is parsed with [sqlparser](https://docs.rs/sqlparser/) in
//! the backend's dialect before it runs. A statement that cannot be parsed
//! still runs; it just returns no generated keys.

use crate::db::DatabaseType;
use sqlparser::ast::Statement;
use sqlparser::dialect::{Dialect, MySqlDialect, PostgreSqlDialect, SQLiteDialect};
use sqlparser::parser::Parser;

/// Column name used for MySQL generated keys.
pub const MYSQL_GENERATED_KEY_COLUMN: &str = "GENERATED_KEY";

/// Column name used for SQLite generated keys.
pub const SQLITE_GENERATED_KEY_COLUMN: &str = "last_insert_rowid()";

/// Kind of write statement detected by the parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    /// INSERT and REPLACE
    Insert,
    Update,
    Delete,
    /// Everything else, including unparseable and multi-statement text
    Other,
}

/// A classified statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classified {
    pub kind: StatementKind,
    /// The statement already carries a RETURNING clause.
    pub returning: bool,
}

impl Classified {
    const OTHER: Classified = Classified {
        kind: StatementKind::Other,
        returning: false,
    };
}

/// How the generated keys of a write statement are obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyRetrieval {
    /// Run this SQL and decode the rows it returns.
    ReturnedRows(String),
    /// MySQL: one row per affected row, counting up from the last insert id.
    LastInsertId,
    /// SQLite: one row holding the last inserted rowid.
    LastInsertRowid,
    /// Execute only; no keys.
    None,
}

/// Get the appropriate SQL dialect for the given database type.
fn get_dialect(db_type: DatabaseType) -> Box<dyn Dialect> {
    match db_type {
        DatabaseType::PostgreSQL => Box::new(PostgreSqlDialect {}),
        DatabaseType::MySQL => Box::new(MySqlDialect {}),
        DatabaseType::SQLite => Box::new(SQLiteDialect {}),
    }
}

/// Classify a single SQL statement.
pub fn classify(sql: &str, db_type: DatabaseType) -> Classified {
    let dialect = get_dialect(db_type);

    let statements = match Parser::parse_sql(dialect.as_ref(), sql) {
        Ok(statements) => statements,
        Err(_) => return Classified::OTHER,
    };

    match statements.as_slice() {
        [statement] => classify_statement(statement),
        _ => Classified::OTHER,
    }
}

fn classify_statement(stmt: &Statement) -> Classified {
    let (kind, returning) = match stmt {
        Statement::Insert(insert) => (StatementKind::Insert, insert.returning.is_some()),
        Statement::Update(update) => (StatementKind::Update, update.returning.is_some()),
        Statement::Delete(delete) => (StatementKind::Delete, delete.returning.is_some()),
        _ => return Classified::OTHER,
    };
    Classified { kind, returning }
}

/// Decide how to obtain the generated keys of `sql`.
pub fn key_retrieval(sql: &str, db_type: DatabaseType) -> KeyRetrieval {
    let classified = classify(sql, db_type);

    if classified.returning {
        return KeyRetrieval::ReturnedRows(sql.to_string());
    }

    match (db_type, classified.kind) {
        (_, StatementKind::Other) => KeyRetrieval::None,
        (DatabaseType::PostgreSQL, _) => KeyRetrieval::ReturnedRows(append_returning(sql)),
        (DatabaseType::MySQL, StatementKind::Insert) => KeyRetrieval::LastInsertId,
        (DatabaseType::SQLite, StatementKind::Insert) => KeyRetrieval::LastInsertRowid,
        _ => KeyRetrieval::None,
    }
}

/// A trailing `--` comment would swallow a clause on the same line.
fn append_returning(sql: &str) -> String {
    let body = sql.trim_end().trim_end_matches(';').trim_end();
    format!("{}\nRETURNING *", body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_dml() {
        let c = classify("INSERT INTO actors(name) VALUES('Carol')", DatabaseType::MySQL);
        assert_eq!(c.kind, StatementKind::Insert);
        assert!(!c.returning);

        let c = classify("UPDATE actors SET name = 'Bob' WHERE id = 2", DatabaseType::PostgreSQL);
        assert_eq!(c.kind, StatementKind::Update);

        let c = classify("DELETE FROM actors WHERE id = 2", DatabaseType::SQLite);
        assert_eq!(c.kind, StatementKind::Delete);
    }

    #[test]
    fn test_classify_returning() {
        let c = classify(
            "INSERT INTO actors(name) VALUES('Carol') RETURNING id",
            DatabaseType::PostgreSQL,
        );
        assert_eq!(c.kind, StatementKind::Insert);
        assert!(c.returning);
    }

    #[test]
    fn test_classify_other() {
        assert_eq!(
            classify("CREATE TABLE t (id INT)", DatabaseType::MySQL).kind,
            StatementKind::Other
        );
        assert_eq!(
            classify("SELECT 1", DatabaseType::PostgreSQL).kind,
            StatementKind::Other
        );
        assert_eq!(
            classify("this is not sql", DatabaseType::SQLite).kind,
            StatementKind::Other
        );
        assert_eq!(
            classify(
                "INSERT INTO t VALUES (1); INSERT INTO t VALUES (2)",
                DatabaseType::SQLite
            )
            .kind,
            StatementKind::Other
        );
    }

    #[test]
    fn test_postgres_appends_returning() {
        assert_eq!(
            key_retrieval("INSERT INTO actors(name) VALUES('Carol');  ", DatabaseType::PostgreSQL),
            KeyRetrieval::ReturnedRows("INSERT INTO actors(name) VALUES('Carol')\nRETURNING *".to_string())
        );
        assert_eq!(
            key_retrieval("DELETE FROM actors WHERE id = 1", DatabaseType::PostgreSQL),
            KeyRetrieval::ReturnedRows("DELETE FROM actors WHERE id = 1\nRETURNING *".to_string())
        );
    }

    #[test]
    fn test_postgres_returning_after_trailing_comment() {
        let sql = "UPDATE actors SET name = 'Bob' WHERE id = 2 -- rename";
        let KeyRetrieval::ReturnedRows(rewritten) = key_retrieval(sql, DatabaseType::PostgreSQL)
        else {
            panic!("expected returned rows for {sql}");
        };
        assert_eq!(rewritten.lines().last(), Some("RETURNING *"));

        // The rewritten statement still parses with its RETURNING clause
        let classified = classify(&rewritten, DatabaseType::PostgreSQL);
        assert_eq!(classified.kind, StatementKind::Update);
        assert!(classified.returning);
    }

    #[test]
    fn test_explicit_returning_kept_as_is() {
        let sql = "INSERT INTO actors(name) VALUES('Carol') RETURNING id";
        assert_eq!(
            key_retrieval(sql, DatabaseType::SQLite),
            KeyRetrieval::ReturnedRows(sql.to_string())
        );
        assert_eq!(
            key_retrieval(sql, DatabaseType::PostgreSQL),
            KeyRetrieval::ReturnedRows(sql.to_string())
        );
    }

    #[test]
    fn test_insert_ids() {
        let sql = "INSERT INTO actors(name) VALUES('Carol')";
        assert_eq!(
            key_retrieval(sql, DatabaseType::MySQL),
            KeyRetrieval::LastInsertId
        );
        assert_eq!(
            key_retrieval(sql, DatabaseType::SQLite),
            KeyRetrieval::LastInsertRowid
        );
    }

    #[test]
    fn test_updates_without_keys() {
        let sql = "UPDATE actors SET name = 'Bob' WHERE id = 2";
        assert_eq!(key_retrieval(sql, DatabaseType::MySQL), KeyRetrieval::None);
        assert_eq!(key_retrieval(sql, DatabaseType::SQLite), KeyRetrieval::None);
        assert_eq!(
            key_retrieval("CREATE TABLE t (id INT)", DatabaseType::PostgreSQL),
            KeyRetrieval::None
        );
    }
}
