//! `SQLite` Database Engine Implementation
//!
//! # Features
//! - File-based connections opened read-only (`SQLITE_OPEN_READ_ONLY` plus `PRAGMA query_only`)
//! - Catalog reads via `sqlite_master` and the table-valued PRAGMA functions, with bound
//!   parameters for every table name
//! - Attached databases are reported as schemas; `main` is the default schema
//! - Row estimates from `sqlite_stat1` and sizes from the `dbstat` virtual table when present
//!
//! # Implementation Notes
//! - Uses `rusqlite` (synchronous driver); every call runs on the blocking thread pool
//! - Timeouts are enforced with the connection's interrupt handle; an interrupted connection is
//!   discarded by the pool
//! - BLOB data is Base64-encoded for JSON safety
//! - Foreign keys have no names in `SQLite`; edges are named `fk_<table>_<id>`
//! - Schema and table names match case-insensitively and are reported as declared

use rusqlite::types::ValueRef;
use rusqlite::{
    Connection, InterruptHandle, OpenFlags, OptionalExtension, Row, TransactionBehavior,
};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, warn};

use crate::engine::{
    non_negative, ColumnDescriptor, ColumnProfile, ColumnRef, ConnectionConfig, DatabaseInfo,
    DatabaseType, EngineConnection, ForeignKeyEdge, IndexDescriptor, QualifiedName, RawRows,
    StorageEstimate, TableDescriptor, TableKind, TableProfile, TableSummary, EXPRESSION_KEY,
};
use crate::error::{GatewayError, Result};

const ENGINE: &str = "sqlite";
const DEFAULT_SCHEMA: &str = "main";

/// Opens read-only connections to one database file
#[derive(Debug, Clone)]
pub struct SqliteConnector {
    path: PathBuf,
}

impl SqliteConnector {
    pub fn new(config: &ConnectionConfig) -> Result<Self> {
        if config.engine != DatabaseType::SQLite {
            return Err(GatewayError::invalid_input(format!(
                "Expected SQLite engine, got {}",
                config.engine
            )));
        }
        let path = config
            .file
            .clone()
            .ok_or_else(|| GatewayError::invalid_input("SQLite requires 'file' parameter"))?;
        Ok(Self { path })
    }

    pub async fn connect(&self) -> Result<SqliteConnection> {
        let path = self.path.clone();
        let conn = tokio::task::spawn_blocking(move || open_connection(&path))
            .await
            .map_err(|e| {
                GatewayError::internal(ENGINE, format!("connection task failed: {e}"))
            })??;

        debug!(path = %self.path.display(), "opened sqlite connection");
        let interrupt = conn.get_interrupt_handle();
        let label = self
            .path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("main")
            .to_string();

        Ok(SqliteConnection {
            conn: Arc::new(Mutex::new(conn)),
            interrupt: Arc::new(interrupt),
            label,
            in_flight: false,
            broken: false,
        })
    }
}

/// Open a read-only connection; the file must already exist
fn open_connection(path: &std::path::Path) -> Result<Connection> {
    let flags = OpenFlags::SQLITE_OPEN_READ_ONLY
        | OpenFlags::SQLITE_OPEN_URI
        | OpenFlags::SQLITE_OPEN_NO_MUTEX;

    let conn = Connection::open_with_flags(path, flags).map_err(|e| {
        GatewayError::connection_failed(format!("Failed to open SQLite database: {e}"))
    })?;

    conn.pragma_update(None, "query_only", true).map_err(|e| {
        GatewayError::connection_failed(format!("Failed to enable query_only: {e}"))
    })?;
    conn.busy_timeout(Duration::from_secs(5)).map_err(|e| {
        GatewayError::connection_failed(format!("Failed to set busy timeout: {e}"))
    })?;

    Ok(conn)
}

/// One pooled `SQLite` connection
pub struct SqliteConnection {
    conn: Arc<Mutex<Connection>>,
    interrupt: Arc<InterruptHandle>,
    label: String,
    in_flight: bool,
    broken: bool,
}

impl SqliteConnection {
    /// Run `job` on the blocking pool, interrupting it when `timeout` elapses
    async fn run<T, F>(&mut self, timeout: Option<Duration>, job: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        let task = tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().unwrap_or_else(PoisonError::into_inner);
            job(&mut guard)
        });

        self.in_flight = true;
        let joined = match timeout {
            Some(limit) => match tokio::time::timeout(limit, task).await {
                Ok(joined) => joined,
                Err(_) => {
                    warn!(
                        timeout_ms = %limit.as_millis(),
                        "sqlite statement timed out, interrupting"
                    );
                    self.interrupt.interrupt();
                    self.in_flight = false;
                    self.broken = true;
                    return Err(GatewayError::query_timeout(limit));
                }
            },
            None => task.await,
        };
        self.in_flight = false;

        joined.map_err(|e| {
            self.broken = true;
            GatewayError::internal(ENGINE, format!("worker task failed: {e}"))
        })?
    }
}

impl Drop for SqliteConnection {
    fn drop(&mut self) {
        // Dropped mid-statement or after a timeout: stop the worker thread
        if self.in_flight || self.broken {
            self.interrupt.interrupt();
        }
    }
}

impl EngineConnection for SqliteConnection {
    async fn default_schema(&mut self) -> Result<String> {
        Ok(DEFAULT_SCHEMA.to_string())
    }

    async fn resolve_name(&mut self, table: QualifiedName) -> Result<QualifiedName> {
        self.run(None, move |conn| match resolve_table(conn, &table) {
            Ok((declared, _)) => Ok(declared),
            Err(GatewayError::NotFound(_)) => Ok(table),
            Err(e) => Err(e),
        })
        .await
    }

    async fn list_tables(&mut self, schema: Option<&str>) -> Result<Vec<TableSummary>> {
        let filter = schema.map(str::to_string);
        self.run(None, move |conn| {
            let mut tables = Vec::new();
            for schema in attached_schemas(conn)? {
                if filter.as_deref().is_some_and(|f| !f.eq_ignore_ascii_case(&schema)) {
                    continue;
                }
                tables.extend(tables_in_schema(conn, &schema)?);
            }
            Ok(tables)
        })
        .await
    }

    async fn describe_table(&mut self, table: &QualifiedName) -> Result<TableDescriptor> {
        let table = table.clone();
        self.run(None, move |conn| {
            let tx = read_snapshot(conn)?;
            let (table, kind) = resolve_table(&tx, &table)?;
            let columns = table_columns(&tx, &table)?;
            let primary_key = primary_key_columns(&tx, &table.schema, &table.name)?;
            let indexes = table_indexes(&tx, &table)?;
            Ok(TableDescriptor {
                schema: table.schema,
                name: table.name,
                kind,
                columns,
                primary_key,
                indexes,
                comment: None,
            })
        })
        .await
    }

    async fn foreign_key_edges(&mut self, table: &QualifiedName) -> Result<Vec<ForeignKeyEdge>> {
        let table = table.clone();
        self.run(None, move |conn| {
            let tx = read_snapshot(conn)?;
            let (table, _) = resolve_table(&tx, &table)?;
            edges_touching(&tx, &table)
        })
        .await
    }

    async fn storage_estimate(&mut self, table: &QualifiedName) -> Result<StorageEstimate> {
        let table = table.clone();
        self.run(None, move |conn| {
            let tx = read_snapshot(conn)?;
            let (table, _) = resolve_table(&tx, &table)?;
            Ok(StorageEstimate {
                rows: stat1_rows(&tx, &table)?,
                size_bytes: dbstat_size(&tx, &table),
            })
        })
        .await
    }

    async fn column_profile(
        &mut self,
        table: &QualifiedName,
        columns: &[String],
        timeout: Duration,
    ) -> Result<TableProfile> {
        let sql = profile_sql(table, columns);
        let names = columns.to_vec();
        self.run(Some(timeout), move |conn| {
            let counts: Vec<i64> = conn
                .query_row(&sql, [], |row| {
                    (0..=names.len() * 2).map(|idx| row.get::<_, i64>(idx)).collect()
                })
                .map_err(query_error)?;

            let total = non_negative(counts[0]);
            let columns = names
                .into_iter()
                .enumerate()
                .map(|(i, name)| ColumnProfile {
                    name,
                    null_count: total.saturating_sub(non_negative(counts[1 + i * 2])),
                    distinct_count: non_negative(counts[2 + i * 2]),
                })
                .collect();
            Ok(TableProfile { total_rows: total, columns })
        })
        .await
    }

    async fn fetch(
        &mut self,
        sql: &str,
        fetch_limit: usize,
        timeout: Duration,
    ) -> Result<RawRows> {
        let sql = sql.to_string();
        self.run(Some(timeout), move |conn| fetch_rows(conn, &sql, fetch_limit)).await
    }

    async fn database_info(&mut self) -> Result<DatabaseInfo> {
        let label = self.label.clone();
        self.run(None, move |conn| {
            let version: String = conn
                .query_row("SELECT sqlite_version()", [], |row| row.get(0))
                .map_err(|e| catalog_error("query SQLite version", e))?;
            let size: Option<i64> = conn
                .query_row(
                    "SELECT page_count * page_size FROM pragma_page_count(), pragma_page_size()",
                    [],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|e| catalog_error("query database size", e))?
                .flatten();

            let schemas = attached_schemas(conn)?;
            let mut table_count = 0u64;
            let mut view_count = 0u64;
            for schema in &schemas {
                for summary in tables_in_schema(conn, schema)? {
                    match summary.kind {
                        TableKind::View => view_count += 1,
                        _ => table_count += 1,
                    }
                }
            }

            Ok(DatabaseInfo {
                engine: DatabaseType::SQLite,
                version,
                database: label,
                size_bytes: size.map(non_negative),
                size_pretty: None,
                schema_count: schemas.len() as u64,
                table_count,
                view_count,
            })
        })
        .await
    }

    fn is_broken(&self) -> bool {
        self.broken || self.in_flight
    }
}

// ============================================================================
// Catalog Queries
// ============================================================================

fn catalog_error(action: &str, e: rusqlite::Error) -> GatewayError {
    GatewayError::internal(ENGINE, format!("Failed to {action}: {e}"))
}

fn query_error(e: rusqlite::Error) -> GatewayError {
    GatewayError::query_failed(e.to_string())
}

/// Double-quote an identifier for interpolation into SQL text
fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

fn read_snapshot(conn: &mut Connection) -> Result<rusqlite::Transaction<'_>> {
    conn.transaction_with_behavior(TransactionBehavior::Deferred)
        .map_err(|e| catalog_error("begin read transaction", e))
}

/// `main` plus any attached databases, excluding `temp`
fn attached_schemas(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn
        .prepare("SELECT name FROM pragma_database_list WHERE name <> 'temp' ORDER BY seq")
        .map_err(|e| catalog_error("list schemas", e))?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .map_err(|e| catalog_error("list schemas", e))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| catalog_error("collect schemas", e))?;
    Ok(names)
}

fn tables_in_schema(conn: &Connection, schema: &str) -> Result<Vec<TableSummary>> {
    let sql = format!(
        "SELECT name, type FROM {}.sqlite_master
         WHERE type IN ('table', 'view') AND name NOT LIKE 'sqlite\\_%' ESCAPE '\\'
         ORDER BY name",
        quote_ident(schema)
    );
    let mut stmt = conn.prepare(&sql).map_err(|e| catalog_error("list tables", e))?;
    let rows = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
        .map_err(|e| catalog_error("list tables", e))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| catalog_error("collect tables", e))?;

    Ok(rows
        .into_iter()
        .map(|(name, kind)| TableSummary {
            schema: schema.to_string(),
            name,
            kind: if kind == "view" { TableKind::View } else { TableKind::Table },
        })
        .collect())
}

/// Declared spelling and kind of a table, or `NotFound` when schema or table does not exist
///
/// Identifiers compare case-insensitively, as they do in SQL against `SQLite`.
fn resolve_table(conn: &Connection, table: &QualifiedName) -> Result<(QualifiedName, TableKind)> {
    let schema = attached_schemas(conn)?
        .into_iter()
        .find(|s| s.eq_ignore_ascii_case(&table.schema))
        .ok_or_else(|| {
            GatewayError::not_found(format!("schema '{}' does not exist", table.schema))
        })?;
    let sql = format!(
        "SELECT name, type FROM {}.sqlite_master
         WHERE name = ?1 COLLATE NOCASE AND type IN ('table', 'view')",
        quote_ident(&schema)
    );
    let found: Option<(String, String)> = conn
        .query_row(&sql, [&table.name], |row| Ok((row.get(0)?, row.get(1)?)))
        .optional()
        .map_err(|e| catalog_error("look up table", e))?;

    let Some((name, kind)) = found else {
        return Err(GatewayError::not_found(format!("table '{table}' does not exist")));
    };
    let kind = if kind == "view" { TableKind::View } else { TableKind::Table };
    Ok((QualifiedName::new(schema, name), kind))
}

fn table_columns(conn: &Connection, table: &QualifiedName) -> Result<Vec<ColumnDescriptor>> {
    let mut stmt = conn
        .prepare(
            "SELECT cid, name, type, \"notnull\", dflt_value
             FROM pragma_table_info(?1, ?2)
             ORDER BY cid",
        )
        .map_err(|e| catalog_error("prepare column query", e))?;

    let columns = stmt
        .query_map([&table.name, &table.schema], |row| {
            let cid: i64 = row.get(0)?;
            Ok(ColumnDescriptor {
                name: row.get(1)?,
                data_type: row.get(2)?,
                nullable: row.get::<_, i64>(3)? == 0,
                default: row.get(4)?,
                ordinal_position: u32::try_from(cid + 1).unwrap_or(u32::MAX),
                comment: None,
            })
        })
        .map_err(|e| catalog_error("query columns", e))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| catalog_error("collect columns", e))?;
    Ok(columns)
}

fn primary_key_columns(conn: &Connection, schema: &str, table: &str) -> Result<Vec<String>> {
    let mut stmt = conn
        .prepare("SELECT name FROM pragma_table_info(?1, ?2) WHERE pk > 0 ORDER BY pk")
        .map_err(|e| catalog_error("prepare primary key query", e))?;
    let names = stmt
        .query_map([table, schema], |row| row.get::<_, String>(0))
        .map_err(|e| catalog_error("query primary key", e))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| catalog_error("collect primary key", e))?;
    Ok(names)
}

/// Explicit and automatic indexes, with the `CREATE INDEX` text where one exists
fn table_indexes(conn: &Connection, table: &QualifiedName) -> Result<Vec<IndexDescriptor>> {
    let sql = format!(
        "SELECT il.name, il.\"unique\", m.sql
         FROM pragma_index_list(?1, ?2) AS il
         LEFT JOIN {}.sqlite_master AS m ON m.type = 'index' AND m.name = il.name
         ORDER BY il.name",
        quote_ident(&table.schema)
    );
    let mut stmt = conn.prepare(&sql).map_err(|e| catalog_error("prepare index query", e))?;
    let listed = stmt
        .query_map([&table.name, &table.schema], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? != 0, row.get(2)?))
        })
        .map_err(|e| catalog_error("query indexes", e))?
        .collect::<std::result::Result<Vec<(String, bool, Option<String>)>, _>>()
        .map_err(|e| catalog_error("collect indexes", e))?;

    let mut key_stmt = conn
        .prepare("SELECT name FROM pragma_index_info(?1, ?2) ORDER BY seqno")
        .map_err(|e| catalog_error("prepare index column query", e))?;
    listed
        .into_iter()
        .map(|(name, unique, definition)| {
            let columns = key_stmt
                .query_map([&name, &table.schema], |row| row.get::<_, Option<String>>(0))
                .map_err(|e| catalog_error("query index columns", e))?
                .map(|column| column.map(|c| c.unwrap_or_else(|| EXPRESSION_KEY.to_string())))
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| catalog_error("collect index columns", e))?;
            Ok(IndexDescriptor { name, columns, unique, definition })
        })
        .collect()
}

struct ForeignKeyRow {
    source_table: String,
    id: i64,
    seq: i64,
    target_table: String,
    from: String,
    to: Option<String>,
}

/// Every foreign-key edge in the table's schema whose source or target is the table
fn edges_touching(conn: &Connection, table: &QualifiedName) -> Result<Vec<ForeignKeyEdge>> {
    let sql = format!(
        "SELECT m.name, f.id, f.seq, f.\"table\", f.\"from\", f.\"to\"
         FROM {}.sqlite_master AS m, pragma_foreign_key_list(m.name, ?1) AS f
         WHERE m.type = 'table'
         ORDER BY m.name, f.id, f.seq",
        quote_ident(&table.schema)
    );
    let mut stmt =
        conn.prepare(&sql).map_err(|e| catalog_error("prepare foreign key query", e))?;
    let rows = stmt
        .query_map([&table.schema], |row| {
            Ok(ForeignKeyRow {
                source_table: row.get(0)?,
                id: row.get(1)?,
                seq: row.get(2)?,
                target_table: row.get(3)?,
                from: row.get(4)?,
                to: row.get(5)?,
            })
        })
        .map_err(|e| catalog_error("query foreign keys", e))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| catalog_error("collect foreign keys", e))?;

    // Table names are case-insensitive; report the declared spelling
    let canonical: HashMap<String, String> = tables_in_schema(conn, &table.schema)?
        .into_iter()
        .map(|t| (t.name.to_lowercase(), t.name))
        .collect();
    let canonical_name = |name: &str| {
        canonical.get(&name.to_lowercase()).cloned().unwrap_or_else(|| name.to_string())
    };

    let mut primary_keys: HashMap<String, Vec<String>> = HashMap::new();
    let mut edges = Vec::new();
    for row in rows {
        let source_table = canonical_name(&row.source_table);
        let target_table = canonical_name(&row.target_table);
        if source_table != table.name && target_table != table.name {
            continue;
        }

        // A reference without explicit columns points at the target's primary key
        let target_column = match row.to {
            Some(column) => column,
            None => {
                if !primary_keys.contains_key(&target_table) {
                    let pk = primary_key_columns(conn, &table.schema, &target_table)?;
                    primary_keys.insert(target_table.clone(), pk);
                }
                primary_keys
                    .get(&target_table)
                    .and_then(|pk| pk.get(usize::try_from(row.seq).unwrap_or(usize::MAX)))
                    .cloned()
                    .unwrap_or_else(|| "rowid".to_string())
            }
        };

        edges.push(ForeignKeyEdge {
            constraint_name: format!("fk_{}_{}", source_table, row.id),
            source: ColumnRef::new(&table.schema, &source_table, row.from),
            target: ColumnRef::new(&table.schema, &target_table, target_column),
        });
    }
    Ok(edges)
}

/// Row count recorded by `ANALYZE`, when the statistics table exists
fn stat1_rows(conn: &Connection, table: &QualifiedName) -> Result<Option<u64>> {
    let schema = quote_ident(&table.schema);
    let exists_sql =
        format!("SELECT EXISTS (SELECT 1 FROM {schema}.sqlite_master WHERE name = 'sqlite_stat1')");
    let has_stats: bool = conn
        .query_row(&exists_sql, [], |row| row.get(0))
        .map_err(|e| catalog_error("check sqlite_stat1", e))?;
    if !has_stats {
        return Ok(None);
    }

    let stat: Option<String> = conn
        .query_row(
            &format!("SELECT stat FROM {schema}.sqlite_stat1 WHERE tbl = ?1 LIMIT 1"),
            [&table.name],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| catalog_error("read sqlite_stat1", e))?;

    Ok(stat.and_then(|s| s.split_whitespace().next().and_then(|n| n.parse().ok())))
}

/// Bytes used by the table and its indexes; `None` when `dbstat` is unavailable
fn dbstat_size(conn: &Connection, table: &QualifiedName) -> Option<u64> {
    let sql = format!(
        "SELECT SUM(pgsize) FROM dbstat(?2)
         WHERE name = ?1
            OR name IN (SELECT name FROM {}.sqlite_master WHERE type = 'index' AND tbl_name = ?1)",
        quote_ident(&table.schema)
    );
    match conn.query_row(&sql, [&table.name, &table.schema], |row| row.get::<_, Option<i64>>(0)) {
        Ok(size) => size.map(non_negative),
        Err(e) => {
            debug!(error = %e, "dbstat unavailable, size unknown");
            None
        }
    }
}

/// `SELECT COUNT(*), COUNT(c1), COUNT(DISTINCT c1), ... FROM schema.table`
fn profile_sql(table: &QualifiedName, columns: &[String]) -> String {
    let mut select = vec!["COUNT(*)".to_string()];
    for column in columns {
        let quoted = quote_ident(column);
        select.push(format!("COUNT({quoted})"));
        select.push(format!("COUNT(DISTINCT {quoted})"));
    }
    format!(
        "SELECT {} FROM {}.{}",
        select.join(", "),
        quote_ident(&table.schema),
        quote_ident(&table.name)
    )
}

// ============================================================================
// Query Execution
// ============================================================================

/// Run `sql` inside a read transaction, stopping after `limit` rows
fn fetch_rows(conn: &mut Connection, sql: &str, limit: usize) -> Result<RawRows> {
    let tx = read_snapshot(conn)?;
    let result = {
        let mut stmt = tx.prepare(sql).map_err(query_error)?;
        if !stmt.readonly() {
            return Err(GatewayError::policy_violation("statement is not read-only"));
        }
        let columns: Vec<String> = stmt.column_names().iter().map(|s| (*s).to_string()).collect();
        let mut rows = stmt.query([]).map_err(query_error)?;

        let mut out = Vec::new();
        while out.len() < limit {
            match rows.next().map_err(query_error)? {
                Some(row) => out.push(row_to_json(row, columns.len()).map_err(query_error)?),
                None => break,
            }
        }
        RawRows { columns, rows: out }
    };
    tx.rollback().map_err(|e| catalog_error("end read transaction", e))?;
    Ok(result)
}

fn row_to_json(
    row: &Row,
    width: usize,
) -> std::result::Result<Vec<serde_json::Value>, rusqlite::Error> {
    (0..width).map(|idx| sqlite_value_to_json(row, idx)).collect()
}

/// Convert `SQLite` value to JSON value
fn sqlite_value_to_json(
    row: &Row,
    idx: usize,
) -> std::result::Result<serde_json::Value, rusqlite::Error> {
    Ok(match row.get_ref(idx)? {
        ValueRef::Null => serde_json::Value::Null,
        ValueRef::Integer(i) => serde_json::Value::Number(i.into()),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map_or(serde_json::Value::Null, serde_json::Value::Number),
        ValueRef::Text(s) => serde_json::Value::String(String::from_utf8_lossy(s).into_owned()),
        ValueRef::Blob(b) => {
            use base64::Engine;
            serde_json::Value::String(base64::engine::general_purpose::STANDARD.encode(b))
        }
    })
}
