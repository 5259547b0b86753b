//! Table Statistics
//!
//! Row count and on-disk size come from the engine's catalog estimate. Null and distinct counts
//! for every column come from one combined aggregate scan, whose `COUNT(*)` is also the
//! denominator for percentages and the fallback row count when no estimate exists.

use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};

use crate::engine::{EngineConnection, StorageEstimate, TableDescriptor, TableProfile};
use crate::error::{GatewayError, Result};
use crate::executor::CLIENT_GRACE;
use crate::introspect::{qualify, BatchItem, TableRef};
use crate::pool::{ManageConnection, Pool};

/// Where `row_count` came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RowCountSource {
    /// Catalog estimate (planner statistics)
    Estimate,
    /// `COUNT(*)` from the aggregate scan
    Exact,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnStatistic {
    pub name: String,
    pub data_type: String,
    pub null_count: u64,
    pub null_percentage: f64,
    pub distinct_count: u64,
    pub distinct_percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableStatistics {
    pub schema: String,
    pub table: String,
    pub row_count: u64,
    pub row_count_source: RowCountSource,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_pretty: Option<String>,

    /// In the table's column order
    pub columns: Vec<ColumnStatistic>,
}

pub struct StatisticsAggregator<M: ManageConnection> {
    pool: Pool<M>,
    acquire_timeout: Duration,
    scan_timeout: Duration,
}

impl<M> StatisticsAggregator<M>
where
    M: ManageConnection,
    M::Connection: EngineConnection,
{
    /// `scan_timeout` bounds the aggregate scan
    pub const fn new(pool: Pool<M>, acquire_timeout: Duration, scan_timeout: Duration) -> Self {
        Self { pool, acquire_timeout, scan_timeout }
    }

    pub async fn table_stats(&self, schema: Option<&str>, table: &str) -> Result<TableStatistics> {
        let mut conn = self.pool.acquire(self.acquire_timeout).await?;
        let name = qualify(&mut *conn, schema, table).await?;

        let descriptor = conn.describe_table(&name).await?;
        let estimate = conn.storage_estimate(&name).await?;

        let columns: Vec<String> = descriptor.columns.iter().map(|c| c.name.clone()).collect();
        let outcome = tokio::time::timeout(
            self.scan_timeout + CLIENT_GRACE,
            conn.column_profile(&name, &columns, self.scan_timeout),
        )
        .await;
        let profile = match outcome {
            Ok(profile) => profile?,
            Err(_) => {
                warn!(table = %name, "statistics scan missed its deadline, discarding connection");
                conn.mark_broken();
                return Err(GatewayError::query_timeout(self.scan_timeout));
            }
        };

        debug!(table = %name, rows = profile.total_rows, "computed table statistics");
        Ok(assemble(&descriptor, estimate, &profile))
    }

    /// Statistics for each table independently
    pub async fn table_stats_many(&self, tables: &[TableRef]) -> Vec<BatchItem<TableStatistics>> {
        let mut items = Vec::with_capacity(tables.len());
        for table in tables {
            let result = self.table_stats(table.schema.as_deref(), &table.table).await;
            items.push(BatchItem {
                schema: table.schema.clone(),
                table: table.table.clone(),
                result,
            });
        }
        items
    }
}

fn assemble(
    descriptor: &TableDescriptor,
    estimate: StorageEstimate,
    profile: &TableProfile,
) -> TableStatistics {
    let total = profile.total_rows;
    let (row_count, row_count_source) = match estimate.rows {
        Some(rows) => (rows, RowCountSource::Estimate),
        None => (total, RowCountSource::Exact),
    };

    let columns = descriptor
        .columns
        .iter()
        .map(|column| {
            let (null_count, distinct_count) = profile
                .columns
                .iter()
                .find(|p| p.name == column.name)
                .map_or((0, 0), |p| (p.null_count, p.distinct_count));
            ColumnStatistic {
                name: column.name.clone(),
                data_type: column.data_type.clone(),
                null_count,
                null_percentage: percentage(null_count, total),
                distinct_count,
                distinct_percentage: percentage(distinct_count, total),
            }
        })
        .collect();

    TableStatistics {
        schema: descriptor.schema.clone(),
        table: descriptor.name.clone(),
        row_count,
        row_count_source,
        size_bytes: estimate.size_bytes,
        size_pretty: estimate.size_bytes.map(format_bytes),
        columns,
    }
}

/// `count / total * 100` to two decimals, 0 for an empty table
#[allow(clippy::cast_precision_loss)]
fn percentage(count: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (count as f64 / total as f64 * 10_000.0).round() / 100.0
}

/// Human-readable size in binary units
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["kB", "MB", "GB", "TB"];
    if bytes < 1024 {
        return format!("{bytes} bytes");
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}
