//! Schema Introspection
//!
//! Read-only views of the live catalog: table listings and descriptors (this module),
//! foreign-key relationships ([`relationships`]) and table statistics ([`stats`]).
//!
//! Every call leases one pooled connection, reads the catalog, and releases it. Nothing is
//! cached between calls; two calls may observe different catalog states.

pub mod relationships;
pub mod stats;

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use std::time::Duration;
use tracing::debug;

use crate::engine::{DatabaseInfo, EngineConnection, QualifiedName, TableDescriptor, TableSummary};
use crate::error::{GatewayError, Result};
use crate::pool::{ManageConnection, Pool, PooledConnection};

pub use relationships::{RelationshipResolver, Relationships};
pub use stats::{ColumnStatistic, RowCountSource, StatisticsAggregator, TableStatistics};

/// A table as named by a caller; `schema` falls back to the engine's default schema
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    pub schema: Option<String>,
    pub table: String,
}

impl TableRef {
    pub fn new(schema: Option<&str>, table: impl Into<String>) -> Self {
        Self { schema: schema.map(str::to_string), table: table.into() }
    }
}

impl std::str::FromStr for TableRef {
    type Err = GatewayError;

    /// `orders` or `sales.orders`
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        match s.split_once('.') {
            Some((schema, table)) if !schema.is_empty() && !table.is_empty() => {
                Ok(Self::new(Some(schema), table))
            }
            None if !s.is_empty() => Ok(Self::new(None, s)),
            _ => Err(GatewayError::invalid_input(format!("Invalid table reference '{s}'"))),
        }
    }
}

/// One entry of a batch call; failures are reported per entry
#[derive(Debug, Clone, PartialEq)]
pub struct BatchItem<T> {
    pub schema: Option<String>,
    pub table: String,
    pub result: Result<T>,
}

impl<T: Serialize> Serialize for BatchItem<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(3))?;
        map.serialize_entry("schema", &self.schema)?;
        map.serialize_entry("table", &self.table)?;
        match &self.result {
            Ok(value) => map.serialize_entry("result", value)?,
            Err(error) => map.serialize_entry("error", &error.payload())?,
        }
        map.end()
    }
}

/// Resolve the schema of a caller-supplied table name
pub(crate) async fn qualify<C: EngineConnection>(
    conn: &mut C,
    schema: Option<&str>,
    table: &str,
) -> Result<QualifiedName> {
    if table.trim().is_empty() {
        return Err(GatewayError::invalid_input("table name must not be empty"));
    }
    let schema = match schema {
        Some(s) if s.trim().is_empty() => {
            return Err(GatewayError::invalid_input("schema name must not be empty"))
        }
        Some(s) => s.to_string(),
        None => conn.default_schema().await?,
    };
    conn.resolve_name(QualifiedName::new(schema, table)).await
}

/// Table listings and descriptors
pub struct CatalogReader<M: ManageConnection> {
    pool: Pool<M>,
    acquire_timeout: Duration,
}

impl<M> CatalogReader<M>
where
    M: ManageConnection,
    M::Connection: EngineConnection,
{
    pub const fn new(pool: Pool<M>, acquire_timeout: Duration) -> Self {
        Self { pool, acquire_timeout }
    }

    async fn lease(&self) -> Result<PooledConnection<M>> {
        self.pool.acquire(self.acquire_timeout).await
    }

    /// Tables and views, ordered by schema then name
    pub async fn list_tables(&self, schema: Option<&str>) -> Result<Vec<TableSummary>> {
        let mut conn = self.lease().await?;
        let tables = conn.list_tables(schema).await?;
        debug!(count = tables.len(), schema = ?schema, "listed tables");
        Ok(tables)
    }

    pub async fn describe_table(
        &self,
        schema: Option<&str>,
        table: &str,
    ) -> Result<TableDescriptor> {
        let mut conn = self.lease().await?;
        let name = qualify(&mut *conn, schema, table).await?;
        conn.describe_table(&name).await
    }

    /// Describe each table independently; a missing table does not stop the rest
    pub async fn describe_tables(&self, tables: &[TableRef]) -> Vec<BatchItem<TableDescriptor>> {
        let mut items = Vec::with_capacity(tables.len());
        for table in tables {
            let result = self.describe_table(table.schema.as_deref(), &table.table).await;
            items.push(BatchItem {
                schema: table.schema.clone(),
                table: table.table.clone(),
                result,
            });
        }
        items
    }

    /// Describe every table in `schema` (or in every user schema)
    pub async fn describe_schema(
        &self,
        schema: Option<&str>,
    ) -> Result<Vec<BatchItem<TableDescriptor>>> {
        let refs: Vec<TableRef> = self
            .list_tables(schema)
            .await?
            .into_iter()
            .map(|t| TableRef { schema: Some(t.schema), table: t.name })
            .collect();
        Ok(self.describe_tables(&refs).await)
    }

    pub async fn database_info(&self) -> Result<DatabaseInfo> {
        let mut conn = self.lease().await?;
        let mut info = conn.database_info().await?;
        info.size_pretty = info.size_bytes.map(stats::format_bytes);
        Ok(info)
    }
}
