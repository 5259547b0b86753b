//! JSON Output Envelope Types
//!
//! Every CLI command and MCP tool call answers with exactly one envelope.
//!
//! # Output Contract
//! - Success: `{"ok": true, "engine": "...", "operation": "...", "data": {...}, "meta": {...}}`
//! - Error: `{"ok": false, "engine": "...", "operation": "...", "error": {"code": "...",
//!   "message": "...", "transient": bool}}`
//!
//! Output is stable and suitable for programmatic parsing by agents.

use serde::Serialize;
use std::time::Instant;

use crate::error::{ErrorPayload, GatewayError, Result};
use crate::executor::QueryResult;

/// Success envelope for operation results
#[derive(Debug, Clone, Serialize)]
pub struct SuccessEnvelope<T> {
    /// Always true for success envelopes
    pub ok: bool,

    /// Database engine used for this operation (postgres, mysql, sqlite)
    pub engine: String,

    /// Operation that was executed (run_query, describe_table, ...)
    pub operation: String,

    pub data: T,

    pub meta: Metadata,
}

impl<T> SuccessEnvelope<T> {
    pub fn new(
        engine: impl Into<String>,
        operation: impl Into<String>,
        data: T,
        meta: Metadata,
    ) -> Self {
        Self { ok: true, engine: engine.into(), operation: operation.into(), data, meta }
    }
}

/// Error envelope for operation failures
#[derive(Debug, Clone, Serialize)]
pub struct ErrorEnvelope {
    /// Always false for error envelopes
    pub ok: bool,

    /// Database engine (empty when the failure happened before an engine was known)
    pub engine: String,

    pub operation: String,

    pub error: ErrorPayload,
}

impl ErrorEnvelope {
    pub fn new(
        engine: impl Into<String>,
        operation: impl Into<String>,
        err: &GatewayError,
    ) -> Self {
        Self { ok: false, engine: engine.into(), operation: operation.into(), error: err.payload() }
    }
}

/// Execution metadata included in all success responses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Metadata {
    /// Execution time in milliseconds
    pub execution_ms: u64,

    /// Number of rows returned (query results only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows_returned: Option<usize>,

    /// Whether the row limit cut the result short (query results only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub truncated: Option<bool>,
}

impl Metadata {
    #[must_use]
    pub const fn new(execution_ms: u64) -> Self {
        Self { execution_ms, rows_returned: None, truncated: None }
    }

    #[must_use]
    pub const fn for_query(execution_ms: u64, result: &QueryResult) -> Self {
        Self {
            execution_ms,
            rows_returned: Some(result.row_count),
            truncated: Some(result.truncated),
        }
    }
}

/// Either envelope, serialized without a wrapper
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Envelope<T> {
    Success(SuccessEnvelope<T>),
    Error(ErrorEnvelope),
}

impl<T> Envelope<T> {
    /// Wrap `result`, timing from `started`; `meta` builds success metadata from the data
    pub fn from_result(
        engine: &str,
        operation: &str,
        started: Instant,
        result: Result<T>,
        meta: impl FnOnce(&T, u64) -> Metadata,
    ) -> Self {
        let execution_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        match result {
            Ok(data) => {
                let meta = meta(&data, execution_ms);
                Self::Success(SuccessEnvelope::new(engine, operation, data, meta))
            }
            Err(err) => Self::Error(ErrorEnvelope::new(engine, operation, &err)),
        }
    }

    #[must_use]
    pub const fn is_ok(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}
