//! Integration tests for the database access facade against SQLite.
//!
//! Tests verify that:
//! - Initialization fails fast and leaves the facade uninitialized on error
//! - Initialization is idempotent
//! - Selects return every row with every column
//! - Updates return generated keys, inside or outside a transaction
//! - Failed transactional updates leave the data unchanged, including
//!   partial effects and failures raised at commit
//! - Every leased connection is released

use db_facade::{Database, DatabaseProperties, DatabaseType, FacadeError, Value};
use tempfile::NamedTempFile;

fn sqlite_properties(file: &NamedTempFile) -> DatabaseProperties {
    DatabaseProperties {
        driver: Some("sqlite".to_string()),
        url: Some(format!("sqlite:{}", file.path().display())),
        username: Some("test".to_string()),
        password: Some("test".to_string()),
    }
}

/// Create an initialized facade over a fresh SQLite file holding two actors.
///
/// The temp file must outlive the facade.
async fn setup_db() -> (Database, NamedTempFile) {
    let file = NamedTempFile::new().unwrap();
    let db = Database::new();
    db.initialize(&sqlite_properties(&file)).await.unwrap();

    db.query_update(
        "CREATE TABLE actors (id INTEGER PRIMARY KEY, name TEXT NOT NULL UNIQUE)",
        false,
    )
    .await
    .unwrap();
    db.query_update("INSERT INTO actors(name) VALUES ('Alice'), ('Bob')", false)
        .await
        .unwrap();

    (db, file)
}

async fn actor_names(db: &Database) -> Vec<String> {
    db.query_select("SELECT name FROM actors ORDER BY id")
        .await
        .unwrap()
        .iter()
        .map(|row| row["name"].as_str().unwrap().to_string())
        .collect()
}

// =============================================================================
// Initialization
// =============================================================================

#[tokio::test]
async fn test_unreachable_host_fails_with_connection_error() {
    let db = Database::new();
    let properties = DatabaseProperties {
        driver: Some("postgres".to_string()),
        url: Some("postgres://127.0.0.1:1/sakila".to_string()),
        username: Some("app".to_string()),
        password: Some("secret".to_string()),
    };

    let err = db.initialize(&properties).await.unwrap_err();
    assert!(matches!(err, FacadeError::Connection { .. }), "got {err:?}");
    assert!(err.suggestion().is_some());
    assert!(!db.is_initialized());

    let err = db.query_select("SELECT 1").await.unwrap_err();
    assert!(matches!(err, FacadeError::Uninitialized));
}

#[tokio::test]
async fn test_missing_properties_name_every_missing_key() {
    let db = Database::new();
    let properties = DatabaseProperties {
        driver: Some("sqlite".to_string()),
        ..Default::default()
    };

    let err = db.initialize(&properties).await.unwrap_err();
    assert!(matches!(err, FacadeError::Configuration { .. }));
    let message = err.to_string();
    assert!(message.contains("url"));
    assert!(message.contains("username"));
    assert!(message.contains("password"));
    assert!(!db.is_initialized());
}

#[tokio::test]
async fn test_unknown_driver_fails_with_driver_load_error() {
    let file = NamedTempFile::new().unwrap();
    let db = Database::new();
    let properties = DatabaseProperties {
        driver: Some("oracle".to_string()),
        ..sqlite_properties(&file)
    };

    let err = db.initialize(&properties).await.unwrap_err();
    assert!(matches!(err, FacadeError::DriverLoad { .. }));
    assert!(!db.is_initialized());
}

#[tokio::test]
async fn test_failed_initialize_can_be_retried() {
    let file = NamedTempFile::new().unwrap();
    let db = Database::new();

    assert!(db.initialize(&DatabaseProperties::default()).await.is_err());
    db.initialize(&sqlite_properties(&file)).await.unwrap();
    assert!(db.is_initialized());
}

#[tokio::test]
async fn test_initialize_is_idempotent() {
    let (db, _file) = setup_db().await;
    assert_eq!(db.db_type(), Some(DatabaseType::SQLite));

    // A second call does nothing, not even validate
    db.initialize(&DatabaseProperties::default()).await.unwrap();
    assert_eq!(db.db_type(), Some(DatabaseType::SQLite));
    assert_eq!(actor_names(&db).await, vec!["Alice", "Bob"]);
}

#[tokio::test]
async fn test_concurrent_initialize_runs_once() {
    let file = NamedTempFile::new().unwrap();
    let db = Database::new();
    let properties = sqlite_properties(&file);

    let mut handles = Vec::new();
    for _ in 0..8 {
        let db = db.clone();
        let properties = properties.clone();
        handles.push(tokio::spawn(
            async move { db.initialize(&properties).await },
        ));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }
    assert!(db.is_initialized());
}

// =============================================================================
// Select
// =============================================================================

#[tokio::test]
async fn test_select_returns_all_rows_and_columns() {
    let (db, _file) = setup_db().await;

    let rows = db
        .query_select("SELECT id, name FROM actors ORDER BY id")
        .await
        .unwrap();

    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].len(), 2);
    assert_eq!(rows[0]["id"], Value::Integer(1));
    assert_eq!(rows[0]["name"], Value::Text("Alice".to_string()));
    assert_eq!(rows[1]["id"], Value::Integer(2));
    assert_eq!(rows[1]["name"], Value::Text("Bob".to_string()));
}

#[tokio::test]
async fn test_select_empty_result() {
    let (db, _file) = setup_db().await;

    let rows = db
        .query_select("SELECT id, name FROM actors WHERE id > 100")
        .await
        .unwrap();
    assert!(rows.is_empty());
}

#[tokio::test]
async fn test_select_decodes_value_types() {
    let (db, _file) = setup_db().await;

    db.query_update(
        "CREATE TABLE samples (i INTEGER, r REAL, t TEXT, b BLOB, flag BOOLEAN, \
         created DATETIME, n NUMERIC, untyped)",
        false,
    )
    .await
    .unwrap();
    db.query_update(
        "INSERT INTO samples VALUES (42, 1.5, 'héllo', X'0102FF', 1, '2024-03-01 12:30:00', NULL, 7)",
        false,
    )
    .await
    .unwrap();

    let rows = db.query_select("SELECT * FROM samples").await.unwrap();
    assert_eq!(rows.len(), 1);
    let row = &rows[0];

    assert_eq!(row.len(), 8);
    assert_eq!(row["i"], Value::Integer(42));
    assert_eq!(row["r"], Value::Float(1.5));
    assert_eq!(row["t"], Value::Text("héllo".to_string()));
    assert_eq!(row["b"], Value::Binary(vec![0x01, 0x02, 0xFF]));
    assert_eq!(row["flag"], Value::Boolean(true));
    assert_eq!(
        serde_json::to_value(&row["created"]).unwrap(),
        serde_json::json!("2024-03-01T12:30:00Z")
    );
    assert_eq!(row["n"], Value::Null);
    assert_eq!(row["untyped"], Value::Integer(7));
}

#[tokio::test]
async fn test_select_failure_is_query_error() {
    let (db, _file) = setup_db().await;

    let err = db.query_select("SELECT * FROM missing").await.unwrap_err();
    assert!(matches!(err, FacadeError::Query { .. }));
    assert!(
        err.to_string()
            .starts_with("An error occurred when trying to query the database.")
    );
}

// =============================================================================
// Update
// =============================================================================

#[tokio::test]
async fn test_transactional_insert_returns_generated_key() {
    let (db, _file) = setup_db().await;

    let keys = db
        .query_update("INSERT INTO actors(name) VALUES('Carol')", true)
        .await
        .unwrap();

    assert_eq!(keys.len(), 1);
    assert_eq!(keys[0]["last_insert_rowid()"], Value::Integer(3));
    assert_eq!(actor_names(&db).await, vec!["Alice", "Bob", "Carol"]);
}

#[tokio::test]
async fn test_insert_with_returning_clause() {
    let (db, _file) = setup_db().await;

    let rows = db
        .query_update(
            "INSERT INTO actors(name) VALUES('Carol'), ('Dave') RETURNING id, name",
            false,
        )
        .await
        .unwrap();

    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["id"], Value::Integer(3));
    assert_eq!(rows[1]["name"], Value::Text("Dave".to_string()));
}

#[tokio::test]
async fn test_update_without_generated_keys() {
    let (db, _file) = setup_db().await;

    let keys = db
        .query_update("UPDATE actors SET name = 'Robert' WHERE id = 2", false)
        .await
        .unwrap();
    assert!(keys.is_empty());
    assert_eq!(actor_names(&db).await, vec!["Alice", "Robert"]);

    let keys = db
        .query_update("DELETE FROM actors WHERE id = 1", true)
        .await
        .unwrap();
    assert!(keys.is_empty());
    assert_eq!(actor_names(&db).await, vec!["Robert"]);
}

#[tokio::test]
async fn test_failed_transactional_update_leaves_data_unchanged() {
    let (db, _file) = setup_db().await;
    let before = db.lease_stats();

    let err = db
        .query_update("UPDATE actors SET name = 'Zed'", true)
        .await
        .unwrap_err();
    assert!(matches!(err, FacadeError::Query { .. }));
    assert!(err.sql_state().is_some());
    assert!(
        err.to_string()
            .starts_with("An error occurred when trying to update the database.")
    );

    assert_eq!(actor_names(&db).await, vec!["Alice", "Bob"]);

    let after = db.lease_stats();
    assert_eq!(after.leased - before.leased, 2);
    assert_eq!(after.outstanding(), 0);
    assert_eq!(after.discarded, 0);

    // The released connection is usable for the next transaction
    let keys = db
        .query_update("INSERT INTO actors(name) VALUES('Carol')", true)
        .await
        .unwrap();
    assert_eq!(keys[0]["last_insert_rowid()"], Value::Integer(3));
}

#[tokio::test]
async fn test_partial_insert_is_rolled_back() {
    let (db, _file) = setup_db().await;
    let before = db.lease_stats();

    // OR FAIL keeps the rows inserted before the conflict until the
    // transaction is rolled back
    let err = db
        .query_update(
            "INSERT OR FAIL INTO actors(name) SELECT 'Carol' UNION ALL SELECT 'Alice'",
            true,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, FacadeError::Query { .. }));
    assert_eq!(actor_names(&db).await, vec!["Alice", "Bob"]);

    let after = db.lease_stats();
    assert_eq!(after.discarded - before.discarded, 0);
    assert_eq!(after.outstanding(), 0);

    // Without a transaction the rows before the conflict stay
    db.query_update(
        "INSERT OR FAIL INTO actors(name) SELECT 'Dave' UNION ALL SELECT 'Alice'",
        false,
    )
    .await
    .unwrap_err();
    assert_eq!(actor_names(&db).await, vec!["Alice", "Bob", "Dave"]);
}

#[tokio::test]
async fn test_commit_failure_discards_connection() {
    let (db, _file) = setup_db().await;
    db.query_update("CREATE TABLE parents (id INTEGER PRIMARY KEY)", false)
        .await
        .unwrap();
    db.query_update(
        "CREATE TABLE children (id INTEGER PRIMARY KEY, \
         parent_id INTEGER REFERENCES parents(id) DEFERRABLE INITIALLY DEFERRED)",
        false,
    )
    .await
    .unwrap();
    let before = db.lease_stats();

    // The deferred foreign key is only checked by COMMIT
    let err = db
        .query_update("INSERT INTO children(parent_id) VALUES (99)", true)
        .await
        .unwrap_err();
    assert!(matches!(err, FacadeError::Query { .. }), "got {err:?}");
    assert!(
        err.to_string()
            .starts_with("An error occurred when trying to update the database.")
    );

    let after = db.lease_stats();
    assert_eq!(after.discarded - before.discarded, 1);
    assert_eq!(after.outstanding(), 0);

    let rows = db
        .query_select("SELECT COUNT(*) AS n FROM children")
        .await
        .unwrap();
    assert_eq!(rows[0]["n"], Value::Integer(0));

    // The pool replaces the closed connection
    db.query_update("INSERT INTO parents(id) VALUES (1)", true)
        .await
        .unwrap();
    let keys = db
        .query_update("INSERT INTO children(parent_id) VALUES (1)", true)
        .await
        .unwrap();
    assert_eq!(keys[0]["last_insert_rowid()"], Value::Integer(1));
}

#[tokio::test]
async fn test_failed_update_without_transaction() {
    let (db, _file) = setup_db().await;

    let err = db
        .query_update("INSERT INTO actors(name) VALUES('Alice')", false)
        .await
        .unwrap_err();
    assert!(matches!(err, FacadeError::Query { .. }));
    assert_eq!(db.lease_stats().outstanding(), 0);
}

// =============================================================================
// Lease Accounting
// =============================================================================

#[tokio::test]
async fn test_every_call_leases_and_releases_once() {
    let (db, _file) = setup_db().await;
    let before = db.lease_stats();

    db.query_select("SELECT * FROM actors").await.unwrap();
    db.query_select("SELECT * FROM missing").await.unwrap_err();
    db.query_update("INSERT INTO actors(name) VALUES('Carol')", true)
        .await
        .unwrap();
    db.query_update("INSERT INTO missing VALUES (1)", true)
        .await
        .unwrap_err();

    let after = db.lease_stats();
    assert_eq!(after.leased - before.leased, 4);
    assert_eq!(after.released - before.released, 4);
    assert_eq!(after.outstanding(), 0);
}

#[tokio::test]
async fn test_concurrent_selects() {
    let (db, _file) = setup_db().await;
    let before = db.lease_stats();

    let mut handles = Vec::new();
    for i in 0..20 {
        let db = db.clone();
        handles.push(tokio::spawn(async move {
            let sql = format!("SELECT id, name, {} AS task FROM actors ORDER BY id", i);
            db.query_select(&sql).await
        }));
    }

    for (i, handle) in handles.into_iter().enumerate() {
        let rows = handle.await.unwrap().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["task"], Value::Integer(i as i64));
    }

    let after = db.lease_stats();
    assert_eq!(after.leased - before.leased, 20);
    assert_eq!(after.outstanding(), 0);
}

#[tokio::test]
async fn test_result_set_serializes_to_json() {
    let (db, _file) = setup_db().await;

    let rows = db
        .query_select("SELECT id, name FROM actors WHERE id = 1")
        .await
        .unwrap();
    let json = serde_json::to_value(&rows).unwrap();
    assert_eq!(json, serde_json::json!([{ "id": 1, "name": "Alice" }]));
}
