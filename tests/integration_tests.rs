//! Gateway Integration Tests
//!
//! Every operation end to end against a real `SQLite` file: classification, bounded execution,
//! catalog reads, relationships, statistics and pool behavior under concurrency.

#![cfg(feature = "sqlite")]

mod common;

use std::sync::Arc;

use pretty_assertions::assert_eq;
use querygate::{ColumnRef, GatewayConfig, RowCountSource, TableKind, TableRef};
use serde_json::json;

use common::{TempDb, ENDLESS_QUERY};

// ============================================================================
// Query Execution
// ============================================================================

#[tokio::test]
async fn test_row_limit_truncates() {
    let db = TempDb::library();
    let gateway = db.gateway();

    let result =
        gateway.run_query("SELECT v FROM numbers ORDER BY v", Some(10), None).await.unwrap();
    assert_eq!(result.columns, vec!["v"]);
    assert_eq!(result.row_count, 10);
    assert!(result.truncated);
    assert_eq!(result.rows[9].get("v"), Some(&json!(10)));

    let exact = gateway.run_query("SELECT v FROM numbers", Some(25), None).await.unwrap();
    assert_eq!(exact.row_count, 25);
    assert!(!exact.truncated);

    let defaulted = gateway.run_query("SELECT v FROM numbers", None, None).await.unwrap();
    assert_eq!(defaulted.row_count, 25);
    assert!(!defaulted.truncated);
}

#[tokio::test]
async fn test_rejected_statements_change_nothing() {
    let db = TempDb::library();
    let gateway = db.gateway();

    for sql in [
        "DELETE FROM numbers",
        "INSERT INTO numbers VALUES (99)",
        "UPDATE numbers SET v = 0",
        "DROP TABLE numbers",
        "SELECT 1; DELETE FROM numbers",
        "WITH gone AS (DELETE FROM numbers RETURNING v) SELECT * FROM gone",
        "ATTACH DATABASE 'other.db' AS other",
        "CREATE TABLE t AS SELECT * FROM numbers",
    ] {
        let err = gateway.run_query(sql, None, None).await.unwrap_err();
        assert_eq!(err.error_code(), "POLICY_VIOLATION", "{sql}");
        assert!(!err.is_transient());
    }

    // Rejection happens before any connection is opened
    assert_eq!(gateway.pool_status().idle, 0);

    let count = gateway.run_query("SELECT COUNT(*) AS n FROM numbers", None, None).await.unwrap();
    assert_eq!(count.rows[0].get("n"), Some(&json!(25)));
}

#[tokio::test]
async fn test_database_errors_are_verbatim() {
    let db = TempDb::library();
    let err = db.gateway().run_query("SELECT * FROM missing_table", None, None).await.unwrap_err();
    assert_eq!(err.error_code(), "QUERY_FAILED");
    assert!(err.message().contains("no such table: missing_table"), "{}", err.message());
}

#[tokio::test]
async fn test_out_of_range_limits_are_invalid_input() {
    let db = TempDb::library();
    let gateway = db.gateway();

    let out_of_range =
        [(Some(0), None), (Some(1_001), None), (None, Some(0)), (None, Some(120_001))];
    for (row_limit, timeout_ms) in out_of_range {
        let err = gateway.run_query("SELECT 1", row_limit, timeout_ms).await.unwrap_err();
        assert_eq!(err.error_code(), "INVALID_INPUT");
    }
}

#[tokio::test]
async fn test_timeout_discards_connection_and_pool_recovers() {
    let db = TempDb::library();
    let gateway = db.gateway();

    let err = gateway.run_query(ENDLESS_QUERY, None, Some(200)).await.unwrap_err();
    assert_eq!(err.error_code(), "QUERY_TIMEOUT");
    assert!(err.is_transient());

    let status = gateway.pool_status();
    assert_eq!(status.in_use, 0);
    assert_eq!(status.idle, 0, "timed-out connection must not be reused");

    let after = gateway.run_query("SELECT 1 AS one", None, None).await.unwrap();
    assert_eq!(after.rows[0].get("one"), Some(&json!(1)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_queries_stay_within_pool() {
    let db = TempDb::library();
    let mut config = GatewayConfig::default();
    config.pool.max_size = 2;
    let gateway = Arc::new(db.gateway_with(config));

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let gateway = Arc::clone(&gateway);
            tokio::spawn(async move {
                let sql = format!("SELECT v FROM numbers WHERE v > {i} ORDER BY v");
                gateway.run_query(&sql, Some(1), None).await
            })
        })
        .collect();

    for (i, handle) in handles.into_iter().enumerate() {
        let result = handle.await.unwrap().unwrap();
        assert_eq!(result.rows[0].get("v"), Some(&json!(i + 1)));
    }

    let status = gateway.pool_status();
    assert_eq!(status.in_use, 0);
    assert!(status.idle <= 2);
}

// ============================================================================
// Catalog
// ============================================================================

#[tokio::test]
async fn test_list_tables_includes_views() {
    let db = TempDb::library();
    let tables = db.gateway().list_tables(None).await.unwrap();

    let listed: Vec<(&str, &str, TableKind)> =
        tables.iter().map(|t| (t.schema.as_str(), t.name.as_str(), t.kind)).collect();
    assert_eq!(
        listed,
        vec![
            ("main", "authors", TableKind::Table),
            ("main", "books", TableKind::Table),
            ("main", "numbers", TableKind::Table),
            ("main", "recent_books", TableKind::View),
        ]
    );

    assert!(db.gateway().list_tables(Some("archive")).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_describe_table() {
    let db = TempDb::library();
    let gateway = db.gateway();

    let books = gateway.describe_table(None, "books").await.unwrap();
    assert_eq!(books.schema, "main");
    assert_eq!(books.kind, TableKind::Table);

    let columns: Vec<(&str, &str, u32)> = books
        .columns
        .iter()
        .map(|c| (c.name.as_str(), c.data_type.as_str(), c.ordinal_position))
        .collect();
    assert_eq!(
        columns,
        vec![
            ("id", "INTEGER", 1),
            ("title", "TEXT", 2),
            ("author_id", "INTEGER", 3),
            ("published", "INTEGER", 4),
            ("price", "REAL", 5),
        ]
    );
    assert!(!books.columns[1].nullable);
    assert!(books.columns[3].nullable);
    assert_eq!(books.columns[4].default.as_deref(), Some("9.99"));

    let view = gateway.describe_table(Some("main"), "recent_books").await.unwrap();
    assert_eq!(view.kind, TableKind::View);
    assert_eq!(view.columns.len(), 2);

    let err = gateway.describe_table(None, "ghosts").await.unwrap_err();
    assert_eq!(err.error_code(), "NOT_FOUND");
}

#[tokio::test]
async fn test_describe_reflects_schema_changes() {
    let db = TempDb::library();
    let gateway = db.gateway();

    assert_eq!(gateway.describe_table(None, "numbers").await.unwrap().columns.len(), 1);
    db.write("ALTER TABLE numbers ADD COLUMN label TEXT");
    assert_eq!(gateway.describe_table(None, "numbers").await.unwrap().columns.len(), 2);
}

#[tokio::test]
async fn test_describe_reports_primary_keys_and_indexes() {
    let db = TempDb::library();
    db.write("CREATE UNIQUE INDEX books_by_title ON books (title, author_id)");
    let gateway = db.gateway();

    let authors = gateway.describe_table(None, "authors").await.unwrap();
    assert_eq!(authors.primary_key, vec!["id"]);
    assert!(authors.indexes.is_empty(), "rowid keys have no separate index");

    let books = gateway.describe_table(None, "books").await.unwrap();
    assert_eq!(books.primary_key, vec!["id"]);
    assert_eq!(books.indexes.len(), 1);
    assert_eq!(books.indexes[0].name, "books_by_title");
    assert_eq!(books.indexes[0].columns, vec!["title", "author_id"]);
    assert!(books.indexes[0].unique);
    assert_eq!(
        books.indexes[0].definition.as_deref(),
        Some("CREATE UNIQUE INDEX books_by_title ON books (title, author_id)")
    );

    let view = gateway.describe_table(None, "recent_books").await.unwrap();
    assert!(view.primary_key.is_empty());
    assert!(view.indexes.is_empty());
}

#[tokio::test]
async fn test_table_names_are_case_insensitive() {
    let db = TempDb::library();
    let gateway = db.gateway();

    let authors = gateway.describe_table(Some("MAIN"), "AUTHORS").await.unwrap();
    assert_eq!((authors.schema.as_str(), authors.name.as_str()), ("main", "authors"));

    let rel = gateway.relationships(None, "Authors").await.unwrap();
    assert_eq!(rel.outgoing.len(), 1);
    assert_eq!(rel.outgoing[0].source, ColumnRef::new("main", "authors", "mentor_id"));
    assert_eq!(rel.incoming.len(), 2);

    let stats = gateway.table_stats(None, "NUMBERS").await.unwrap();
    assert_eq!(stats.table, "numbers");
    assert_eq!(stats.row_count, 25);

    assert_eq!(gateway.list_tables(Some("MAIN")).await.unwrap().len(), 4);

    let err = gateway.describe_table(None, "GHOSTS").await.unwrap_err();
    assert_eq!(err.error_code(), "NOT_FOUND");
}

#[tokio::test]
async fn test_batch_describe_and_schema_dump() {
    let db = TempDb::library();
    let gateway = db.gateway();

    let items = gateway
        .describe_tables(&[
            TableRef::new(None, "authors"),
            TableRef::new(None, "ghosts"),
            TableRef::new(None, "books"),
        ])
        .await;
    assert_eq!(items.len(), 3);
    assert!(items[0].result.is_ok());
    assert_eq!(items[1].result.as_ref().unwrap_err().error_code(), "NOT_FOUND");
    assert!(items[2].result.is_ok());

    let all = gateway.describe_schema(Some("main")).await.unwrap();
    let names: Vec<&str> = all.iter().map(|i| i.table.as_str()).collect();
    assert_eq!(names, vec!["authors", "books", "numbers", "recent_books"]);
    assert!(all.iter().all(|i| i.result.is_ok()));
}

// ============================================================================
// Relationships
// ============================================================================

#[tokio::test]
async fn test_relationships_split_by_direction() {
    let db = TempDb::library();
    let gateway = db.gateway();

    let authors = gateway.relationships(None, "authors").await.unwrap();
    assert_eq!(authors.outgoing.len(), 1);
    assert_eq!(authors.outgoing[0].source, ColumnRef::new("main", "authors", "mentor_id"));
    assert_eq!(authors.outgoing[0].target, ColumnRef::new("main", "authors", "id"));

    let incoming: Vec<&ColumnRef> = authors.incoming.iter().map(|e| &e.source).collect();
    assert_eq!(
        incoming,
        vec![
            &ColumnRef::new("main", "authors", "mentor_id"),
            &ColumnRef::new("main", "books", "author_id"),
        ]
    );

    let books = gateway.relationships(None, "books").await.unwrap();
    assert_eq!(books.outgoing.len(), 1);
    assert!(books.incoming.is_empty());

    let numbers = gateway.relationships(None, "numbers").await.unwrap();
    assert!(numbers.is_empty());

    let err = gateway.relationships(None, "ghosts").await.unwrap_err();
    assert_eq!(err.error_code(), "NOT_FOUND");
}

#[tokio::test]
async fn test_composite_foreign_key_yields_one_edge_per_column() {
    let db = TempDb::new(
        "CREATE TABLE shelves (room TEXT, slot INTEGER, PRIMARY KEY (room, slot));
         CREATE TABLE placements (id INTEGER PRIMARY KEY, room TEXT, slot INTEGER,
             FOREIGN KEY (room, slot) REFERENCES shelves (room, slot));",
    );
    let rel = db.gateway().relationships(None, "shelves").await.unwrap();

    assert!(rel.outgoing.is_empty());
    assert_eq!(rel.incoming.len(), 2);
    assert_eq!(rel.incoming[0].constraint_name, rel.incoming[1].constraint_name);
    assert_eq!(rel.incoming[0].target.column, "room");
    assert_eq!(rel.incoming[1].target.column, "slot");
}

// ============================================================================
// Statistics
// ============================================================================

#[tokio::test]
async fn test_table_stats_exact_without_analyze() {
    let db = TempDb::library();
    let stats = db.gateway().table_stats(None, "authors").await.unwrap();

    assert_eq!(stats.schema, "main");
    assert_eq!(stats.row_count, 4);
    assert_eq!(stats.row_count_source, RowCountSource::Exact);

    let summary: Vec<(&str, u64, f64, u64, f64)> = stats
        .columns
        .iter()
        .map(|c| {
            let (nulls, distinct) = (c.null_percentage, c.distinct_percentage);
            (c.name.as_str(), c.null_count, nulls, c.distinct_count, distinct)
        })
        .collect();
    assert_eq!(
        summary,
        vec![
            ("id", 0, 0.0, 4, 100.0),
            ("name", 0, 0.0, 4, 100.0),
            ("mentor_id", 1, 25.0, 2, 50.0),
            ("country", 1, 25.0, 2, 50.0),
        ]
    );
}

#[tokio::test]
async fn test_table_stats_prefers_catalog_estimate() {
    let db = TempDb::library();
    db.write("ANALYZE");

    let stats = db.gateway().table_stats(None, "numbers").await.unwrap();
    assert_eq!(stats.row_count, 25);
    assert_eq!(stats.row_count_source, RowCountSource::Estimate);
    assert_eq!(stats.columns[0].distinct_count, 25);
    assert_eq!(stats.columns[0].distinct_percentage, 100.0);
}

#[tokio::test]
async fn test_table_stats_many_reports_each_table() {
    let db = TempDb::library();
    let items = db
        .gateway()
        .table_stats_many(&[TableRef::new(None, "books"), TableRef::new(Some("main"), "nope")])
        .await;

    let books = items[0].result.as_ref().unwrap();
    assert_eq!(books.row_count, 4);
    let price = books.columns.iter().find(|c| c.name == "price").unwrap();
    assert_eq!(price.null_count, 2);
    assert_eq!(price.null_percentage, 50.0);

    assert_eq!(items[1].result.as_ref().unwrap_err().error_code(), "NOT_FOUND");
}

// ============================================================================
// Database Info and Connection Failures
// ============================================================================

#[tokio::test]
async fn test_database_info_counts_objects() {
    let db = TempDb::library();
    let info = db.gateway().database_info().await.unwrap();

    assert_eq!(info.engine, querygate::DatabaseType::SQLite);
    assert!(!info.version.is_empty());
    assert_eq!(info.schema_count, 1);
    assert_eq!(info.table_count, 3);
    assert_eq!(info.view_count, 1);
    assert_eq!(info.size_bytes.is_some(), info.size_pretty.is_some());
    assert_eq!(
        info.database,
        db.path().file_name().unwrap().to_str().unwrap()
    );
}

#[tokio::test]
async fn test_missing_database_fails_on_first_use() {
    let path = std::env::temp_dir().join("querygate_it_never_created.db");
    let gateway = querygate::DatabaseGateway::connect(
        &querygate::ConnectionConfig::sqlite(path),
        GatewayConfig::default(),
    )
    .unwrap();

    let err = gateway.list_tables(None).await.unwrap_err();
    assert_eq!(err.error_code(), "CONNECTION_FAILED");
    assert_eq!(gateway.pool_status().in_use, 0);
}
