//! Error Handling Infrastructure
//!
//! Every failure the gateway can report is a variant of [`GatewayError`]. Each variant maps to a
//! stable error code for JSON output and carries a transient flag so callers can tell resource
//! pressure (retry later) from a bad request (do not retry).
//!
//! # Error Categories
//! - `PolicyViolation`: statement rejected by the classifier
//! - `QueryTimeout`: statement exceeded its time bound
//! - `QueryFailed`: database-reported error, message passed through verbatim
//! - `PoolExhausted`: no connection became available in time
//! - `NotFound`: unknown schema or table
//! - `Internal`: connection loss or driver fault
//! - `ConnectionFailed`: could not open a connection
//! - `InvalidInput`: malformed or out-of-range request parameters
//! - `ConfigError`: configuration file or connection registry errors

use serde::Serialize;
use thiserror::Error;

/// Main error type for gateway operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// Statement rejected by the classifier
    #[error("Policy violation: {0}")]
    PolicyViolation(String),

    /// Statement exceeded its time bound and was cancelled
    #[error("Query exceeded timeout of {timeout_ms}ms")]
    QueryTimeout { timeout_ms: u64 },

    /// Database-reported error (syntax, permission, unknown relation)
    #[error("{0}")]
    QueryFailed(String),

    /// No pooled connection became available within the acquisition timeout
    #[error("Connection pool exhausted after waiting {waited_ms}ms")]
    PoolExhausted { waited_ms: u64 },

    /// Schema or table does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Connection loss or unexpected driver fault
    #[error("Internal error: {0}")]
    Internal(String),

    /// Database connection could not be established
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Invalid input or out-of-range parameters
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Configuration error (file not found, invalid JSON, invalid limits)
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl GatewayError {
    /// Convert error to error code string for JSON output
    ///
    /// Error codes are stable and suitable for programmatic handling by agents.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::PolicyViolation(_) => "POLICY_VIOLATION",
            Self::QueryTimeout { .. } => "QUERY_TIMEOUT",
            Self::QueryFailed(_) => "QUERY_FAILED",
            Self::PoolExhausted { .. } => "POOL_EXHAUSTED",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Internal(_) => "INTERNAL",
            Self::ConnectionFailed(_) => "CONNECTION_FAILED",
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::ConfigError(_) => "CONFIG_ERROR",
        }
    }

    /// Whether retrying the same request later may succeed
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::QueryTimeout { .. }
                | Self::PoolExhausted { .. }
                | Self::Internal(_)
                | Self::ConnectionFailed(_)
        )
    }

    /// Human-readable error message (agent-appropriate, no credentials)
    #[must_use]
    pub fn message(&self) -> String {
        self.to_string()
    }

    /// Serializable `{code, message, transient}` form used in envelopes and batch items
    #[must_use]
    pub fn payload(&self) -> ErrorPayload {
        ErrorPayload {
            code: self.error_code().to_string(),
            message: self.message(),
            transient: self.is_transient(),
        }
    }

    pub fn policy_violation(message: impl Into<String>) -> Self {
        Self::PolicyViolation(message.into())
    }

    pub fn query_timeout(timeout: std::time::Duration) -> Self {
        Self::QueryTimeout { timeout_ms: duration_ms(timeout) }
    }

    pub fn query_failed(message: impl Into<String>) -> Self {
        Self::QueryFailed(message.into())
    }

    pub fn pool_exhausted(waited: std::time::Duration) -> Self {
        Self::PoolExhausted { waited_ms: duration_ms(waited) }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    /// Create an internal error tagged with the engine that raised it
    pub fn internal(engine: &str, detail: impl std::fmt::Display) -> Self {
        Self::Internal(format!("{engine}: {detail}"))
    }

    pub fn connection_failed(message: impl Into<String>) -> Self {
        Self::ConnectionFailed(message.into())
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    pub fn config_error(message: impl Into<String>) -> Self {
        Self::ConfigError(message.into())
    }
}

fn duration_ms(d: std::time::Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Error information as it appears in JSON output
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
    pub transient: bool,
}

/// Result type alias for gateway operations
pub type Result<T> = std::result::Result<T, GatewayError>;
