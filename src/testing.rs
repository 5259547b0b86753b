//! In-memory engine used by unit tests
//!
//! `MockManager` hands out `MockConnection`s that answer catalog calls from a fixed
//! [`MockCatalog`] and record how many fetches run at once, so pool bounds and connection
//! exclusivity can be checked without a database.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::engine::{
    ColumnDescriptor, ColumnRef, DatabaseInfo, DatabaseType, EngineConnection, ForeignKeyEdge,
    QualifiedName, RawRows, StorageEstimate, TableDescriptor, TableKind, TableProfile,
    TableSummary,
};
use crate::error::{GatewayError, Result};
use crate::pool::ManageConnection;

#[derive(Debug, Clone, Default)]
pub(crate) struct MockCatalog {
    pub tables: Vec<TableDescriptor>,
    pub edges: Vec<ForeignKeyEdge>,
    pub estimates: HashMap<QualifiedName, StorageEstimate>,
    pub profiles: HashMap<QualifiedName, TableProfile>,

    /// Rows every successful `fetch` draws from
    pub result: RawRows,

    /// Time each fetch holds its connection
    pub fetch_delay: Duration,
}

impl MockCatalog {
    pub fn with_table(mut self, schema: &str, name: &str, columns: &[(&str, &str)]) -> Self {
        self.tables.push(TableDescriptor {
            schema: schema.to_string(),
            name: name.to_string(),
            kind: TableKind::Table,
            columns: columns
                .iter()
                .zip(1..)
                .map(|((name, data_type), ordinal_position)| ColumnDescriptor {
                    name: (*name).to_string(),
                    data_type: (*data_type).to_string(),
                    nullable: true,
                    default: None,
                    ordinal_position,
                    comment: None,
                })
                .collect(),
            primary_key: Vec::new(),
            indexes: Vec::new(),
            comment: None,
        });
        self
    }

    pub fn with_edge(
        mut self,
        name: &str,
        source: (&str, &str, &str),
        target: (&str, &str, &str),
    ) -> Self {
        self.edges.push(ForeignKeyEdge {
            constraint_name: name.to_string(),
            source: ColumnRef::new(source.0, source.1, source.2),
            target: ColumnRef::new(target.0, target.1, target.2),
        });
        self
    }

    /// `count` rows of `(n, label)`
    pub fn with_numbered_rows(mut self, count: i64) -> Self {
        self.result = RawRows {
            columns: vec!["n".to_string(), "label".to_string()],
            rows: (1..=count)
                .map(|n| vec![serde_json::json!(n), serde_json::json!(format!("row {n}"))])
                .collect(),
        };
        self
    }

    fn find(&self, table: &QualifiedName) -> Result<&TableDescriptor> {
        self.tables
            .iter()
            .find(|t| t.schema == table.schema && t.name == table.name)
            .ok_or_else(|| GatewayError::not_found(format!("table '{table}' does not exist")))
    }
}

/// Counters shared by every connection of one manager
#[derive(Debug, Default)]
pub(crate) struct MockStats {
    pub connects: AtomicUsize,
    pub fetches: AtomicUsize,
    pub active: AtomicUsize,
    pub peak: AtomicUsize,
    pub shared: AtomicBool,
    leased: Mutex<HashSet<usize>>,
}

impl MockStats {
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

/// Marks one connection busy for as long as it lives
struct Busy {
    stats: Arc<MockStats>,
    id: usize,
}

impl Busy {
    fn enter(stats: &Arc<MockStats>, id: usize) -> Self {
        if !stats.leased.lock().unwrap().insert(id) {
            stats.shared.store(true, Ordering::SeqCst);
        }
        let now = stats.active.fetch_add(1, Ordering::SeqCst) + 1;
        stats.peak.fetch_max(now, Ordering::SeqCst);
        Self { stats: Arc::clone(stats), id }
    }
}

impl Drop for Busy {
    fn drop(&mut self) {
        self.stats.active.fetch_sub(1, Ordering::SeqCst);
        self.stats.leased.lock().unwrap().remove(&self.id);
    }
}

pub(crate) struct MockManager {
    catalog: Arc<MockCatalog>,
    pub stats: Arc<MockStats>,
}

impl MockManager {
    pub fn new(catalog: MockCatalog) -> Self {
        Self { catalog: Arc::new(catalog), stats: Arc::default() }
    }
}

impl ManageConnection for MockManager {
    type Connection = MockConnection;

    async fn connect(&self) -> Result<MockConnection> {
        let id = self.stats.connects.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(MockConnection {
            id,
            catalog: Arc::clone(&self.catalog),
            stats: Arc::clone(&self.stats),
            in_flight: false,
        })
    }

    fn has_broken(&self, conn: &mut MockConnection) -> bool {
        conn.is_broken()
    }
}

pub(crate) struct MockConnection {
    id: usize,
    catalog: Arc<MockCatalog>,
    stats: Arc<MockStats>,
    in_flight: bool,
}

impl EngineConnection for MockConnection {
    async fn default_schema(&mut self) -> Result<String> {
        Ok("public".to_string())
    }

    async fn list_tables(&mut self, schema: Option<&str>) -> Result<Vec<TableSummary>> {
        let mut tables: Vec<TableSummary> = self
            .catalog
            .tables
            .iter()
            .filter(|t| schema.map_or(true, |s| s == t.schema))
            .map(|t| TableSummary { schema: t.schema.clone(), name: t.name.clone(), kind: t.kind })
            .collect();
        tables.sort_by(|a, b| (&a.schema, &a.name).cmp(&(&b.schema, &b.name)));
        Ok(tables)
    }

    async fn describe_table(&mut self, table: &QualifiedName) -> Result<TableDescriptor> {
        self.catalog.find(table).cloned()
    }

    async fn foreign_key_edges(&mut self, table: &QualifiedName) -> Result<Vec<ForeignKeyEdge>> {
        self.catalog.find(table)?;
        Ok(self
            .catalog
            .edges
            .iter()
            .filter(|e| e.source.belongs_to(table) || e.target.belongs_to(table))
            .cloned()
            .collect())
    }

    async fn storage_estimate(&mut self, table: &QualifiedName) -> Result<StorageEstimate> {
        self.catalog.find(table)?;
        Ok(self.catalog.estimates.get(table).copied().unwrap_or_default())
    }

    async fn column_profile(
        &mut self,
        table: &QualifiedName,
        columns: &[String],
        _timeout: Duration,
    ) -> Result<TableProfile> {
        self.catalog.find(table)?;
        Ok(self.catalog.profiles.get(table).cloned().unwrap_or_else(|| TableProfile {
            total_rows: 0,
            columns: columns
                .iter()
                .map(|name| crate::engine::ColumnProfile {
                    name: name.clone(),
                    null_count: 0,
                    distinct_count: 0,
                })
                .collect(),
        }))
    }

    async fn fetch(
        &mut self,
        sql: &str,
        fetch_limit: usize,
        _timeout: Duration,
    ) -> Result<RawRows> {
        self.in_flight = true;
        let _busy = Busy::enter(&self.stats, self.id);
        self.stats.fetches.fetch_add(1, Ordering::SeqCst);

        if sql.contains("pg_sleep") {
            std::future::pending::<()>().await;
        }
        tokio::time::sleep(self.catalog.fetch_delay).await;
        self.in_flight = false;

        if sql.contains("missing_table") {
            return Err(GatewayError::query_failed("relation \"missing_table\" does not exist"));
        }
        Ok(RawRows {
            columns: self.catalog.result.columns.clone(),
            rows: self.catalog.result.rows.iter().take(fetch_limit).cloned().collect(),
        })
    }

    async fn database_info(&mut self) -> Result<DatabaseInfo> {
        Ok(DatabaseInfo {
            engine: DatabaseType::Postgres,
            version: "mock 1.0".to_string(),
            database: "mock".to_string(),
            size_bytes: Some(8192),
            size_pretty: None,
            schema_count: 1,
            table_count: self.catalog.tables.len() as u64,
            view_count: 0,
        })
    }

    fn is_broken(&self) -> bool {
        self.in_flight
    }
}
