//! Database Engines and the Catalog Data Model
//!
//! This module defines the value types the gateway hands back to callers (table summaries,
//! descriptors, foreign-key edges, query rows) and the [`EngineConnection`] trait every engine
//! connection implements. Each engine (`PostgreSQL`, `MySQL`, `SQLite`) lives in its own module
//! behind its own cargo feature.
//!
//! # Engine Isolation
//! Each engine implementation is completely independent.
//! No shared SQL helpers or cross-engine abstractions.
//!
//! # Transient Values
//! Every descriptor is derived from the live catalog on each call and never cached.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{GatewayError, Result};
use crate::pool::ManageConnection;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "postgres")]
pub mod postgres;

#[cfg(feature = "mysql")]
pub mod mysql;

/// Supported database engine types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    /// `PostgreSQL` database
    Postgres,
    /// `MySQL` database (includes `MariaDB`)
    MySQL,
    /// `SQLite` database
    SQLite,
}

impl DatabaseType {
    /// Get the engine name as a string
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::MySQL => "mysql",
            Self::SQLite => "sqlite",
        }
    }

    /// Cargo feature that compiles this engine in
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        match self {
            Self::Postgres => cfg!(feature = "postgres"),
            Self::MySQL => cfg!(feature = "mysql"),
            Self::SQLite => cfg!(feature = "sqlite"),
        }
    }
}

impl std::fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for DatabaseType {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "mysql" | "mariadb" => Ok(Self::MySQL),
            "sqlite" | "sqlite3" => Ok(Self::SQLite),
            other => Err(GatewayError::invalid_input(format!(
                "Unknown engine '{other}'. Must be one of: postgres, mysql, sqlite"
            ))),
        }
    }
}

// ============================================================================
// Connection Configuration
// ============================================================================

/// Connection configuration for database engines
///
/// Fields are engine-specific (e.g., `file` only applies to `SQLite`). When `url` is set it takes
/// precedence over the discrete host/port/user fields.
#[derive(Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Database engine type
    pub engine: DatabaseType,

    /// Hostname (for postgres/mysql)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    /// Port number (for postgres/mysql)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Username (for postgres/mysql)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    /// Password (for postgres/mysql). Never logged.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Database name (for postgres/mysql)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,

    /// Database file path (for sqlite)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,

    /// Driver connection string (`postgres://...`, `mysql://...`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

// Hand-written so credentials never reach log output
impl std::fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("engine", &self.engine)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("database", &self.database)
            .field("file", &self.file)
            .field("url", &self.url.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl ConnectionConfig {
    /// Create a new `PostgreSQL` connection config
    #[must_use]
    pub const fn postgres(
        host: String,
        port: u16,
        user: String,
        password: String,
        database: String,
    ) -> Self {
        Self {
            engine: DatabaseType::Postgres,
            host: Some(host),
            port: Some(port),
            user: Some(user),
            password: Some(password),
            database: Some(database),
            file: None,
            url: None,
        }
    }

    /// Create a new `MySQL` connection config
    #[must_use]
    pub const fn mysql(
        host: String,
        port: u16,
        user: String,
        password: String,
        database: String,
    ) -> Self {
        Self {
            engine: DatabaseType::MySQL,
            host: Some(host),
            port: Some(port),
            user: Some(user),
            password: Some(password),
            database: Some(database),
            file: None,
            url: None,
        }
    }

    /// Create a new `SQLite` connection config
    #[must_use]
    pub const fn sqlite(file: PathBuf) -> Self {
        Self {
            engine: DatabaseType::SQLite,
            host: None,
            port: None,
            user: None,
            password: None,
            database: None,
            file: Some(file),
            url: None,
        }
    }

    /// Build a config from a connection URL, inferring the engine from its scheme
    ///
    /// `sqlite://` URLs (and bare paths ending in `.db`, `.sqlite` or `.sqlite3`) become file
    /// configs; `postgres://`, `postgresql://` and `mysql://` URLs are handed to the driver as-is.
    pub fn from_url(url: &str) -> Result<Self> {
        let url = url.trim();
        if let Some(path) = url.strip_prefix("sqlite://") {
            if path.is_empty() {
                return Err(GatewayError::invalid_input("sqlite:// URL is missing a file path"));
            }
            return Ok(Self::sqlite(PathBuf::from(path)));
        }

        let scheme = url.split_once("://").map(|(scheme, _)| scheme);
        let engine = match scheme {
            Some("postgres" | "postgresql") => DatabaseType::Postgres,
            Some("mysql" | "mariadb") => DatabaseType::MySQL,
            Some(other) => {
                return Err(GatewayError::invalid_input(format!(
                    "Unsupported URL scheme '{other}'. Use postgres://, mysql:// or sqlite://"
                )))
            }
            None => {
                let lower = url.to_ascii_lowercase();
                if url == ":memory:"
                    || [".db", ".sqlite", ".sqlite3"].iter().any(|ext| lower.ends_with(ext))
                {
                    return Ok(Self::sqlite(PathBuf::from(url)));
                }
                return Err(GatewayError::invalid_input(
                    "Connection URL must start with postgres://, mysql:// or sqlite://",
                ));
            }
        };

        Ok(Self {
            engine,
            host: None,
            port: None,
            user: None,
            password: None,
            database: None,
            file: None,
            url: Some(url.to_string()),
        })
    }
}

// ============================================================================
// Catalog Data Model
// ============================================================================

/// Kind of relation as reported by the catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableKind {
    Table,
    View,
    MaterializedView,
}

/// One entry of `list_tables`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSummary {
    pub schema: String,
    pub name: String,
    pub kind: TableKind,
}

/// Schema-qualified table name after the default schema has been resolved
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QualifiedName {
    pub schema: String,
    pub name: String,
}

impl QualifiedName {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self { schema: schema.into(), name: name.into() }
    }
}

impl std::fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

/// Column metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    /// Column name
    pub name: String,

    /// Declared type as the catalog reports it
    pub data_type: String,

    /// Whether the column accepts NULL
    pub nullable: bool,

    /// Default expression (if any)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,

    /// 1-based position in the table definition
    pub ordinal_position: u32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

/// Full description of one table or view
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDescriptor {
    pub schema: String,
    pub name: String,
    pub kind: TableKind,

    /// Columns ordered by ordinal position
    pub columns: Vec<ColumnDescriptor>,

    /// Primary-key columns in key order; empty for views and keyless tables
    pub primary_key: Vec<String>,

    /// Indexes ordered by name
    pub indexes: Vec<IndexDescriptor>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

/// Key part reported for an index entry that is an expression rather than a column
pub(crate) const EXPRESSION_KEY: &str = "(expression)";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDescriptor {
    pub name: String,

    /// Key columns in index order
    pub columns: Vec<String>,

    pub unique: bool,

    /// DDL for the index, absent for indexes the engine creates implicitly
    #[serde(skip_serializing_if = "Option::is_none")]
    pub definition: Option<String>,
}

/// Fully qualified column reference
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnRef {
    pub schema: String,
    pub table: String,
    pub column: String,
}

impl ColumnRef {
    pub fn new(
        schema: impl Into<String>,
        table: impl Into<String>,
        column: impl Into<String>,
    ) -> Self {
        Self { schema: schema.into(), table: table.into(), column: column.into() }
    }

    #[must_use]
    pub fn belongs_to(&self, table: &QualifiedName) -> bool {
        self.schema == table.schema && self.table == table.name
    }
}

/// One column pair of a foreign-key constraint
///
/// Composite constraints produce one edge per column pair, in constraint column order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKeyEdge {
    pub constraint_name: String,
    pub source: ColumnRef,
    pub target: ColumnRef,
}

/// Catalog-level size and row estimate for a table
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StorageEstimate {
    /// Planner row estimate, `None` when the table was never analyzed
    pub rows: Option<u64>,

    /// Total on-disk size including indexes and toast, `None` when the engine cannot tell
    pub size_bytes: Option<u64>,
}

/// Null and distinct counts for one column, from the combined aggregate scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnProfile {
    pub name: String,
    pub null_count: u64,
    pub distinct_count: u64,
}

/// Result of the combined aggregate scan over a table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableProfile {
    /// `COUNT(*)` observed by the same scan that produced the column counts
    pub total_rows: u64,
    pub columns: Vec<ColumnProfile>,
}

/// Result set as fetched from the driver, before the executor shapes it
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawRows {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
}

/// Server-level facts about the connected database
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseInfo {
    pub engine: DatabaseType,
    pub version: String,
    pub database: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_pretty: Option<String>,

    pub schema_count: u64,
    pub table_count: u64,
    pub view_count: u64,
}

// ============================================================================
// Engine Connection Trait
// ============================================================================

/// Operations the gateway needs from one leased connection
///
/// Catalog methods only issue internally built queries (bound parameters or quoted identifiers).
/// `fetch` is the only method that runs caller-supplied SQL, and it is only reachable through the
/// executor, which requires a classified statement.
///
/// A connection whose request future was dropped mid-statement must report `is_broken() == true`
/// so the pool discards it instead of handing it to the next caller.
pub trait EngineConnection: Send {
    /// Schema used when a request omits one
    fn default_schema(&mut self) -> impl Future<Output = Result<String>> + Send;

    /// Declared spelling of `table` for engines with case-insensitive identifiers
    ///
    /// Unknown tables come back unchanged; the catalog call that follows reports `NotFound`.
    fn resolve_name(
        &mut self,
        table: QualifiedName,
    ) -> impl Future<Output = Result<QualifiedName>> + Send {
        std::future::ready(Ok(table))
    }

    /// Tables and views outside the system schemas, ordered by schema then name
    fn list_tables(
        &mut self,
        schema: Option<&str>,
    ) -> impl Future<Output = Result<Vec<TableSummary>>> + Send;

    /// Table metadata from one catalog snapshot; `NotFound` for unknown tables
    fn describe_table(
        &mut self,
        table: &QualifiedName,
    ) -> impl Future<Output = Result<TableDescriptor>> + Send;

    /// Every foreign-key edge whose source or target is `table`, from one catalog snapshot
    fn foreign_key_edges(
        &mut self,
        table: &QualifiedName,
    ) -> impl Future<Output = Result<Vec<ForeignKeyEdge>>> + Send;

    /// Lightweight catalog estimate of rows and size
    fn storage_estimate(
        &mut self,
        table: &QualifiedName,
    ) -> impl Future<Output = Result<StorageEstimate>> + Send;

    /// One aggregate query counting rows, nulls and distinct values for `columns`
    fn column_profile(
        &mut self,
        table: &QualifiedName,
        columns: &[String],
        timeout: Duration,
    ) -> impl Future<Output = Result<TableProfile>> + Send;

    /// Run a read-only statement, returning at most `fetch_limit` rows
    fn fetch(
        &mut self,
        sql: &str,
        fetch_limit: usize,
        timeout: Duration,
    ) -> impl Future<Output = Result<RawRows>> + Send;

    /// Version, size and object counts of the connected database
    fn database_info(&mut self) -> impl Future<Output = Result<DatabaseInfo>> + Send;

    /// True when the connection must not be reused
    fn is_broken(&self) -> bool;
}

// ============================================================================
// Engine Dispatch
// ============================================================================

macro_rules! dispatch {
    ($value:expr, $inner:ident => $body:expr) => {
        match $value {
            #[cfg(feature = "postgres")]
            Self::Postgres($inner) => $body,
            #[cfg(feature = "mysql")]
            Self::MySql($inner) => $body,
            #[cfg(feature = "sqlite")]
            Self::Sqlite($inner) => $body,
        }
    };
}

/// Opens connections for whichever engine the config names
pub enum Connector {
    #[cfg(feature = "postgres")]
    Postgres(postgres::PgConnector),
    #[cfg(feature = "mysql")]
    MySql(mysql::MySqlConnector),
    #[cfg(feature = "sqlite")]
    Sqlite(sqlite::SqliteConnector),
}

impl Connector {
    /// Validate `config` and prepare a connector for its engine
    ///
    /// No connection is opened here; the pool connects lazily.
    pub fn new(config: &ConnectionConfig) -> Result<Self> {
        match config.engine {
            #[cfg(feature = "postgres")]
            DatabaseType::Postgres => Ok(Self::Postgres(postgres::PgConnector::new(config)?)),
            #[cfg(feature = "mysql")]
            DatabaseType::MySQL => Ok(Self::MySql(mysql::MySqlConnector::new(config)?)),
            #[cfg(feature = "sqlite")]
            DatabaseType::SQLite => Ok(Self::Sqlite(sqlite::SqliteConnector::new(config)?)),
            #[allow(unreachable_patterns)]
            other => Err(GatewayError::invalid_input(format!(
                "{} engine not enabled. Build with --features {}",
                other,
                other.as_str()
            ))),
        }
    }

    #[must_use]
    pub const fn engine(&self) -> DatabaseType {
        match self {
            #[cfg(feature = "postgres")]
            Self::Postgres(_) => DatabaseType::Postgres,
            #[cfg(feature = "mysql")]
            Self::MySql(_) => DatabaseType::MySQL,
            #[cfg(feature = "sqlite")]
            Self::Sqlite(_) => DatabaseType::SQLite,
        }
    }
}

/// A live connection for one of the compiled-in engines
pub enum Connection {
    #[cfg(feature = "postgres")]
    Postgres(postgres::PgConnection),
    #[cfg(feature = "mysql")]
    MySql(mysql::MySqlConnection),
    #[cfg(feature = "sqlite")]
    Sqlite(sqlite::SqliteConnection),
}

impl ManageConnection for Connector {
    type Connection = Connection;

    async fn connect(&self) -> Result<Connection> {
        match self {
            #[cfg(feature = "postgres")]
            Self::Postgres(c) => c.connect().await.map(Connection::Postgres),
            #[cfg(feature = "mysql")]
            Self::MySql(c) => c.connect().await.map(Connection::MySql),
            #[cfg(feature = "sqlite")]
            Self::Sqlite(c) => c.connect().await.map(Connection::Sqlite),
        }
    }

    fn has_broken(&self, conn: &mut Connection) -> bool {
        conn.is_broken()
    }
}

impl EngineConnection for Connection {
    async fn default_schema(&mut self) -> Result<String> {
        dispatch!(self, c => c.default_schema().await)
    }

    async fn resolve_name(&mut self, table: QualifiedName) -> Result<QualifiedName> {
        dispatch!(self, c => c.resolve_name(table).await)
    }

    async fn list_tables(&mut self, schema: Option<&str>) -> Result<Vec<TableSummary>> {
        dispatch!(self, c => c.list_tables(schema).await)
    }

    async fn describe_table(&mut self, table: &QualifiedName) -> Result<TableDescriptor> {
        dispatch!(self, c => c.describe_table(table).await)
    }

    async fn foreign_key_edges(&mut self, table: &QualifiedName) -> Result<Vec<ForeignKeyEdge>> {
        dispatch!(self, c => c.foreign_key_edges(table).await)
    }

    async fn storage_estimate(&mut self, table: &QualifiedName) -> Result<StorageEstimate> {
        dispatch!(self, c => c.storage_estimate(table).await)
    }

    async fn column_profile(
        &mut self,
        table: &QualifiedName,
        columns: &[String],
        timeout: Duration,
    ) -> Result<TableProfile> {
        dispatch!(self, c => c.column_profile(table, columns, timeout).await)
    }

    async fn fetch(&mut self, sql: &str, fetch_limit: usize, timeout: Duration) -> Result<RawRows> {
        dispatch!(self, c => c.fetch(sql, fetch_limit, timeout).await)
    }

    async fn database_info(&mut self) -> Result<DatabaseInfo> {
        dispatch!(self, c => c.database_info().await)
    }

    fn is_broken(&self) -> bool {
        dispatch!(self, c => c.is_broken())
    }
}

/// Clamp a catalog count (which drivers hand back signed) into `u64`
pub(crate) fn non_negative(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}
