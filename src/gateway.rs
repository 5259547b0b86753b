//! Gateway Facade
//!
//! [`Gateway`] owns one connection pool and exposes every operation callers may invoke: query
//! execution, catalog listings and descriptors, relationships, statistics and database info.
//! All operations are independent and safe to call concurrently; the pool is the only shared
//! state.

use std::time::Duration;

use crate::classifier::{ClassificationVerdict, StatementClassifier};
use crate::config::GatewayConfig;
use crate::engine::{
    ConnectionConfig, Connector, DatabaseInfo, DatabaseType, EngineConnection, TableDescriptor,
    TableSummary,
};
use crate::error::Result;
use crate::executor::{render_text, QueryExecutor, QueryResult};
use crate::introspect::{
    BatchItem, CatalogReader, RelationshipResolver, Relationships, StatisticsAggregator, TableRef,
    TableStatistics,
};
use crate::pool::{ManageConnection, Pool, PoolStatus};

/// Gateway over a real database connection
pub type DatabaseGateway = Gateway<Connector>;

pub struct Gateway<M: ManageConnection> {
    engine: DatabaseType,
    pool: Pool<M>,
    config: GatewayConfig,
    executor: QueryExecutor<M>,
    catalog: CatalogReader<M>,
    resolver: RelationshipResolver<M>,
    stats: StatisticsAggregator<M>,
}

impl DatabaseGateway {
    /// Validate both configs and set up the pool
    ///
    /// No connection is opened until the first operation needs one.
    pub fn connect(connection: &ConnectionConfig, config: GatewayConfig) -> Result<Self> {
        let connector = Connector::new(connection)?;
        let engine = connector.engine();
        Self::with_manager(engine, connector, config)
    }
}

impl<M> Gateway<M>
where
    M: ManageConnection,
    M::Connection: EngineConnection,
{
    /// Build a gateway over any connection manager
    pub fn with_manager(engine: DatabaseType, manager: M, config: GatewayConfig) -> Result<Self> {
        config.validate()?;

        let pool = Pool::new(manager, config.pool.max_size)?;
        let acquire_timeout = config.pool.acquire_timeout();
        let classifier = StatementClassifier::new(engine, config.keywords.policy());

        Ok(Self {
            engine,
            executor: QueryExecutor::new(
                pool.clone(),
                classifier,
                config.limits.clone(),
                acquire_timeout,
            ),
            catalog: CatalogReader::new(pool.clone(), acquire_timeout),
            resolver: RelationshipResolver::new(pool.clone(), acquire_timeout),
            stats: StatisticsAggregator::new(
                pool.clone(),
                acquire_timeout,
                config.limits.default_timeout(),
            ),
            pool,
            config,
        })
    }

    #[must_use]
    pub const fn engine(&self) -> DatabaseType {
        self.engine
    }

    #[must_use]
    pub const fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Shorten the client-side grace period (tests against slow fakes)
    #[must_use]
    pub fn with_client_grace(mut self, grace: Duration) -> Self {
        self.executor = self.executor.with_client_grace(grace);
        self
    }

    /// Classify, then run `sql` under the row limit and timeout
    pub async fn run_query(
        &self,
        sql: &str,
        row_limit: Option<usize>,
        timeout_ms: Option<u64>,
    ) -> Result<QueryResult> {
        self.executor.execute_sql(sql, row_limit, timeout_ms).await
    }

    /// Verdict for `sql` without executing it
    #[must_use]
    pub fn classify(&self, sql: &str) -> ClassificationVerdict {
        self.executor.classifier().classify(sql)
    }

    /// Plain-text rendering capped at the configured row count
    #[must_use]
    pub fn render_text(&self, result: &QueryResult) -> String {
        render_text(result, self.config.limits.text_max_rows)
    }

    pub async fn list_tables(&self, schema: Option<&str>) -> Result<Vec<TableSummary>> {
        self.catalog.list_tables(schema).await
    }

    pub async fn describe_table(
        &self,
        schema: Option<&str>,
        table: &str,
    ) -> Result<TableDescriptor> {
        self.catalog.describe_table(schema, table).await
    }

    pub async fn describe_tables(&self, tables: &[TableRef]) -> Vec<BatchItem<TableDescriptor>> {
        self.catalog.describe_tables(tables).await
    }

    pub async fn describe_schema(
        &self,
        schema: Option<&str>,
    ) -> Result<Vec<BatchItem<TableDescriptor>>> {
        self.catalog.describe_schema(schema).await
    }

    pub async fn relationships(&self, schema: Option<&str>, table: &str) -> Result<Relationships> {
        self.resolver.relationships(schema, table).await
    }

    pub async fn table_stats(&self, schema: Option<&str>, table: &str) -> Result<TableStatistics> {
        self.stats.table_stats(schema, table).await
    }

    pub async fn table_stats_many(&self, tables: &[TableRef]) -> Vec<BatchItem<TableStatistics>> {
        self.stats.table_stats_many(tables).await
    }

    pub async fn database_info(&self) -> Result<DatabaseInfo> {
        self.catalog.database_info().await
    }

    #[must_use]
    pub fn pool_status(&self) -> PoolStatus {
        self.pool.status()
    }
}
