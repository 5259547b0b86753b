//! Query Execution
//!
//! Runs classified statements under row and time bounds. The executor only accepts a
//! [`ReadOnlyStatement`], which the classifier alone can produce, so unclassified text cannot
//! reach a connection.
//!
//! # Bounds
//! - At most `row_limit + 1` rows are fetched; the extra row only sets `truncated`
//! - The engine enforces `timeout` server-side where it can. A client-side deadline of
//!   `timeout` plus a grace period backs it up; when that fires the request future is dropped,
//!   the engine cancels the statement and the pool discards the connection.

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::classifier::{ReadOnlyStatement, StatementClassifier};
use crate::config::QueryLimits;
use crate::engine::{EngineConnection, RawRows};
use crate::error::{GatewayError, Result};
use crate::pool::{ManageConnection, Pool};

/// Extra time the client waits for a server-side timeout before cancelling itself
pub const CLIENT_GRACE: Duration = Duration::from_secs(2);

/// Rows returned by `run_query`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResult {
    /// Column names in result order, unique within the result
    pub columns: Vec<String>,

    pub rows: Vec<ResultRow>,

    /// Number of rows in `rows`
    pub row_count: usize,

    /// More rows were available than the row limit allowed
    pub truncated: bool,
}

/// One result row
///
/// Serializes as a JSON object whose keys are the result columns in order, with an explicit
/// `null` for absent values.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultRow {
    columns: Arc<[String]>,
    values: Vec<serde_json::Value>,
}

impl ResultRow {
    fn new(columns: Arc<[String]>, mut values: Vec<serde_json::Value>) -> Self {
        values.resize(columns.len(), serde_json::Value::Null);
        Self { columns, values }
    }

    /// Value of `column`, `None` when the result has no such column
    #[must_use]
    pub fn get(&self, column: &str) -> Option<&serde_json::Value> {
        self.columns.iter().position(|c| c == column).map(|i| &self.values[i])
    }

    #[must_use]
    pub fn values(&self) -> &[serde_json::Value] {
        &self.values
    }
}

impl Serialize for ResultRow {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.columns.len()))?;
        for (column, value) in self.columns.iter().zip(&self.values) {
            map.serialize_entry(column, value)?;
        }
        map.end()
    }
}

/// Bounded, read-only statement execution over a pool
pub struct QueryExecutor<M: ManageConnection> {
    pool: Pool<M>,
    classifier: StatementClassifier,
    limits: QueryLimits,
    acquire_timeout: Duration,
    client_grace: Duration,
}

impl<M> QueryExecutor<M>
where
    M: ManageConnection,
    M::Connection: EngineConnection,
{
    pub fn new(
        pool: Pool<M>,
        classifier: StatementClassifier,
        limits: QueryLimits,
        acquire_timeout: Duration,
    ) -> Self {
        Self { pool, classifier, limits, acquire_timeout, client_grace: CLIENT_GRACE }
    }

    #[must_use]
    pub const fn with_client_grace(mut self, grace: Duration) -> Self {
        self.client_grace = grace;
        self
    }

    #[must_use]
    pub const fn classifier(&self) -> &StatementClassifier {
        &self.classifier
    }

    #[must_use]
    pub const fn limits(&self) -> &QueryLimits {
        &self.limits
    }

    /// Classify `sql`, then execute it. Rejected text never touches the pool.
    pub async fn execute_sql(
        &self,
        sql: &str,
        row_limit: Option<usize>,
        timeout_ms: Option<u64>,
    ) -> Result<QueryResult> {
        let statement = self.classifier.authorize(sql)?;
        self.execute(&statement, row_limit, timeout_ms).await
    }

    /// Execute a classified statement under the row and time bounds
    pub async fn execute(
        &self,
        statement: &ReadOnlyStatement,
        row_limit: Option<usize>,
        timeout_ms: Option<u64>,
    ) -> Result<QueryResult> {
        let row_limit = self.limits.row_limit(row_limit)?;
        let timeout = self.limits.timeout(timeout_ms)?;

        let started = Instant::now();
        let mut conn = self.pool.acquire(self.acquire_timeout).await?;

        let outcome = tokio::time::timeout(
            timeout + self.client_grace,
            conn.fetch(statement.sql(), row_limit + 1, timeout),
        )
        .await;

        let raw = match outcome {
            Ok(result) => result?,
            Err(_) => {
                warn!(
                    timeout_ms = %timeout.as_millis(),
                    "statement missed its deadline, discarding connection"
                );
                conn.mark_broken();
                return Err(GatewayError::query_timeout(timeout));
            }
        };
        drop(conn);

        let result = shape(raw, row_limit);
        info!(
            rows = result.row_count,
            truncated = result.truncated,
            elapsed_ms = %started.elapsed().as_millis(),
            "query completed"
        );
        Ok(result)
    }
}

/// Apply the row limit and make column names unique
fn shape(raw: RawRows, row_limit: usize) -> QueryResult {
    let columns = unique_columns(raw.columns);
    let names: Arc<[String]> = columns.clone().into();
    let truncated = raw.rows.len() > row_limit;

    let rows: Vec<ResultRow> = raw
        .rows
        .into_iter()
        .take(row_limit)
        .map(|values| ResultRow::new(Arc::clone(&names), values))
        .collect();

    QueryResult { columns, row_count: rows.len(), rows, truncated }
}

/// `["id", "id", "name"]` becomes `["id", "id_2", "name"]`
fn unique_columns(columns: Vec<String>) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::with_capacity(columns.len());
    columns
        .into_iter()
        .map(|name| {
            if seen.insert(name.clone()) {
                return name;
            }
            let mut n = 2;
            loop {
                let candidate = format!("{name}_{n}");
                if seen.insert(candidate.clone()) {
                    return candidate;
                }
                n += 1;
            }
        })
        .collect()
}

/// Plain-text table for human readers
///
/// Shows at most `max_rows` rows; a footer notes when more were available.
#[must_use]
pub fn render_text(result: &QueryResult, max_rows: usize) -> String {
    if result.rows.is_empty() {
        return "Query executed successfully. No rows returned.".to_string();
    }

    let header = result.columns.join(" | ");
    let mut lines = vec![header.clone(), "-".repeat(header.chars().count())];
    for row in result.rows.iter().take(max_rows) {
        let cells: Vec<String> = row.values().iter().map(display_value).collect();
        lines.push(cells.join(" | "));
    }

    let shown = result.rows.len().min(max_rows);
    let mut text = lines.join("\n");
    if result.truncated || result.rows.len() > max_rows {
        text.push_str(&format!("\n\n(showing {shown} rows, more available)"));
    }
    text
}

fn display_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => "NULL".to_string(),
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
