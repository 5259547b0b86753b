//! querygate - Read-Only Database Gateway
//!
//! querygate lets an untrusted caller (typically an AI agent) run SQL and explore the schema of a
//! PostgreSQL, MySQL/MariaDB or SQLite database without being able to change anything.
//!
//! # Guarantees
//! - Only statements the [`classifier`] proves read-only reach the database
//! - Every query is bounded in rows and time; a timed-out connection is never reused
//! - At most `pool.max_size` connections are open, and none is shared between two requests
//! - Catalog descriptors are read live on every call; nothing is cached
//!
//! # Module Organization
//! - [`error`] - Error taxonomy shared by every operation
//! - [`output`] - JSON envelopes for the CLI and MCP surfaces
//! - [`engine`] - Data model and per-engine drivers
//! - [`pool`] - Bounded connection pool
//! - [`classifier`] - Token-aware read-only statement classification
//! - [`executor`] - Bounded query execution
//! - [`introspect`] - Catalog listings, relationships and statistics
//! - [`config`] - Gateway limits and stored connection profiles
//! - [`gateway`] - Facade tying the above together
//! - [`mcp`] - MCP server over stdio

#[cfg(not(any(feature = "postgres", feature = "mysql", feature = "sqlite")))]
compile_error!("querygate needs at least one engine feature: postgres, mysql or sqlite");

pub mod classifier;
pub mod config;
pub mod engine;
pub mod error;
pub mod executor;
pub mod gateway;
pub mod introspect;
pub mod mcp;
pub mod output;
pub mod pool;

#[cfg(test)]
mod testing;

pub use classifier::{
    ClassificationVerdict, KeywordPolicy, ReadOnlyStatement, StatementClassifier,
};
pub use config::store::{ConfigLocation, ConnectionSelector, StoredConnection};
pub use config::{GatewayConfig, KeywordOverrides, PoolSettings, QueryLimits};
pub use engine::{
    ColumnDescriptor, ColumnRef, ConnectionConfig, DatabaseInfo, DatabaseType, ForeignKeyEdge,
    IndexDescriptor, QualifiedName, TableDescriptor, TableKind, TableSummary,
};
pub use error::{ErrorPayload, GatewayError, Result};
pub use executor::{QueryResult, ResultRow};
pub use gateway::{DatabaseGateway, Gateway};
pub use introspect::{
    BatchItem, ColumnStatistic, Relationships, RowCountSource, TableRef, TableStatistics,
};
pub use output::{Envelope, ErrorEnvelope, Metadata, SuccessEnvelope};
pub use pool::PoolStatus;
