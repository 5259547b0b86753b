//! MCP (Model Context Protocol) Server
//!
//! Manual JSON-RPC 2.0 over stdio, one message per line. No MCP-specific crates are involved.
//!
//! # Tools
//!
//! - `run_query` - classify and execute one read-only statement
//! - `list_tables` - tables and views, optionally filtered by schema
//! - `describe_table` - columns and comments of one table
//! - `relationships` - incoming and outgoing foreign keys of one table
//! - `table_stats` - row count, size and per-column null/distinct counts
//! - `database_info` - version, size and object counts
//!
//! Every tool answers with the same JSON envelope the CLI prints. Gateway failures (a rejected
//! statement, a missing table, a timeout) come back as tool results with `isError: true` so the
//! agent can read the error code and adjust; JSON-RPC errors are reserved for protocol faults.
//!
//! Requests are handled concurrently: each one runs on its own task against the shared gateway,
//! and a single writer serializes responses onto stdout.
//!
//! # Usage
//!
//! ```json
//! {
//!   "mcpServers": {
//!     "querygate": { "command": "querygate", "args": ["mcp", "--connection", "dev"] }
//!   }
//! }
//! ```

use anyhow::Result;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::engine::EngineConnection;
use crate::error::GatewayError;
use crate::gateway::{DatabaseGateway, Gateway};
use crate::output::{Envelope, Metadata};
use crate::pool::ManageConnection;

const PROTOCOL_VERSION: &str = "2024-11-05";

const PARSE_ERROR: i32 = -32700;
const METHOD_NOT_FOUND: i32 = -32601;
const INVALID_PARAMS: i32 = -32602;

// ============================================================================
// JSON-RPC 2.0 Structures
// ============================================================================

#[derive(Debug, Deserialize)]
struct JsonRpcRequest {
    #[allow(dead_code)]
    jsonrpc: String,
    /// Absent for notifications, which get no response
    id: Option<Value>,
    method: String,
    #[serde(default)]
    params: Option<Value>,
}

#[derive(Debug, Serialize)]
struct JsonRpcResponse {
    jsonrpc: &'static str,
    id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    fn success(id: Option<Value>, result: Value) -> Self {
        Self { jsonrpc: "2.0", id, result: Some(result), error: None }
    }

    fn failure(id: Option<Value>, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(JsonRpcError { code, message: message.into() }),
        }
    }
}

#[derive(Debug, Serialize)]
struct JsonRpcError {
    code: i32,
    message: String,
}

/// Protocol-level failure of one request
struct RpcFault {
    code: i32,
    message: String,
}

impl RpcFault {
    fn new(code: i32, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }
}

// ============================================================================
// MCP Tool Result Structures
// ============================================================================

#[derive(Debug, Serialize)]
struct TextContent {
    #[serde(rename = "type")]
    content_type: &'static str,
    text: String,
}

#[derive(Debug, Serialize)]
struct CallToolResult {
    content: Vec<TextContent>,
    #[serde(rename = "isError")]
    is_error: bool,
}

impl CallToolResult {
    fn from_envelope<T: Serialize>(envelope: &Envelope<T>) -> Self {
        let text = serde_json::to_string_pretty(envelope).unwrap_or_else(|e| {
            json!({
                "ok": false,
                "error": {"code": "INTERNAL_ERROR", "message": e.to_string(), "transient": false}
            })
            .to_string()
        });
        Self {
            content: vec![TextContent { content_type: "text", text }],
            is_error: !envelope.is_ok(),
        }
    }
}

// ============================================================================
// Tool Arguments
// ============================================================================

/// Arguments of `run_query`
#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
struct RunQueryArgs {
    /// One read-only SQL statement in the connected engine's dialect
    sql: String,

    /// Maximum rows to return; the gateway default applies when omitted
    row_limit: Option<usize>,

    /// Statement timeout in milliseconds; the gateway default applies when omitted
    timeout_ms: Option<u64>,
}

/// Arguments of `list_tables`
#[derive(Debug, Default, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
struct ListTablesArgs {
    /// Only list this schema; every user schema when omitted
    schema: Option<String>,
}

/// Arguments of the single-table tools
#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
struct TableArgs {
    /// Schema of the table; the connection's default schema when omitted
    schema: Option<String>,

    /// Table or view name
    table: String,
}

/// `database_info` takes no arguments
#[derive(Debug, Default, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
struct NoArgs {}

fn tool<T: JsonSchema>(name: &str, description: &str) -> Value {
    json!({
        "name": name,
        "description": description,
        "inputSchema": schemars::schema_for!(T),
    })
}

fn tool_definitions() -> Value {
    json!({
        "tools": [
            tool::<RunQueryArgs>(
                "run_query",
                "Execute ONE read-only SQL statement (SELECT, WITH ... SELECT, SHOW, or EXPLAIN \
                 of a SELECT). Writes, DDL, multiple statements and side-effecting functions are \
                 rejected with POLICY_VIOLATION before reaching the database. Results are capped \
                 by row_limit; 'meta.truncated' tells whether more rows existed. Use small limits \
                 when exploring unknown tables.",
            ),
            tool::<ListTablesArgs>(
                "list_tables",
                "List tables and views (schema, name, kind), ordered by schema then name. System \
                 schemas are excluded.",
            ),
            tool::<TableArgs>(
                "describe_table",
                "Describe one table or view: kind, comment and columns in ordinal order with \
                 type, nullability, default and comment. NOT_FOUND when the table does not exist.",
            ),
            tool::<TableArgs>(
                "relationships",
                "Foreign keys of one table, split into outgoing (this table references another) \
                 and incoming (another table references this one).",
            ),
            tool::<TableArgs>(
                "table_stats",
                "Row count, on-disk size and per-column null and distinct counts for one table. \
                 Scans the table once; can be slow on very large tables.",
            ),
            tool::<NoArgs>(
                "database_info",
                "Engine version, database size and schema, table and view counts.",
            ),
        ]
    })
}

// ============================================================================
// MCP Server
// ============================================================================

/// Serve MCP on stdin/stdout until stdin closes
pub async fn serve(gateway: DatabaseGateway) -> Result<()> {
    let stdin = BufReader::new(tokio::io::stdin());
    serve_io(Arc::new(gateway), stdin, tokio::io::stdout()).await
}

/// Serve MCP over any line-based transport
///
/// Returns once `reader` reaches end of input and every in-flight request has been answered.
pub async fn serve_io<M, R, W>(gateway: Arc<Gateway<M>>, reader: R, mut writer: W) -> Result<()>
where
    M: ManageConnection,
    M::Connection: EngineConnection,
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<JsonRpcResponse>();

    let read_loop = async move {
        let mut lines = reader.lines();
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }

            let request: JsonRpcRequest = match serde_json::from_str(&line) {
                Ok(request) => request,
                Err(e) => {
                    let message = format!("Parse error: {e}");
                    let _ = tx.send(JsonRpcResponse::failure(None, PARSE_ERROR, message));
                    continue;
                }
            };

            let gateway = Arc::clone(&gateway);
            let tx = tx.clone();
            tokio::spawn(async move {
                if let Some(response) = handle_request(&gateway, request).await {
                    let _ = tx.send(response);
                }
            });
        }
        debug!("mcp input closed");
        Ok::<_, anyhow::Error>(())
    };

    let write_loop = async move {
        // Ends when the reader and every request task have dropped their senders
        while let Some(response) = rx.recv().await {
            let mut line = serde_json::to_vec(&response)?;
            line.push(b'\n');
            writer.write_all(&line).await?;
            writer.flush().await?;
        }
        Ok::<_, anyhow::Error>(())
    };

    tokio::try_join!(read_loop, write_loop)?;
    Ok(())
}

async fn handle_request<M>(gateway: &Gateway<M>, request: JsonRpcRequest) -> Option<JsonRpcResponse>
where
    M: ManageConnection,
    M::Connection: EngineConnection,
{
    let Some(id) = request.id else {
        debug!(method = %request.method, "ignoring notification");
        return None;
    };
    let id = Some(id);

    let result = match request.method.as_str() {
        "initialize" => Ok(json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": { "tools": {} },
            "serverInfo": { "name": "querygate", "version": env!("CARGO_PKG_VERSION") }
        })),
        "ping" => Ok(json!({})),
        "tools/list" => Ok(tool_definitions()),
        "tools/call" => call_tool(gateway, request.params.unwrap_or(Value::Null)).await,
        other => Err(RpcFault::new(METHOD_NOT_FOUND, format!("Unknown method: {other}"))),
    };

    Some(match result {
        Ok(value) => JsonRpcResponse::success(id, value),
        Err(fault) => JsonRpcResponse::failure(id, fault.code, fault.message),
    })
}

async fn call_tool<M>(gateway: &Gateway<M>, params: Value) -> Result<Value, RpcFault>
where
    M: ManageConnection,
    M::Connection: EngineConnection,
{
    let name = params
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| RpcFault::new(INVALID_PARAMS, "Missing tool name"))?;
    let arguments = match params.get("arguments") {
        None | Some(Value::Null) => json!({}),
        Some(args) => args.clone(),
    };

    let engine = gateway.engine().as_str();
    let started = Instant::now();
    debug!(tool = name, "tool call");

    let result = match name {
        "run_query" => {
            let result = match parse_args::<RunQueryArgs>(name, arguments) {
                Ok(args) => gateway.run_query(&args.sql, args.row_limit, args.timeout_ms).await,
                Err(e) => Err(e),
            };
            respond(engine, name, started, result, |r, ms| Metadata::for_query(ms, r))
        }
        "list_tables" => {
            let result = match parse_args::<ListTablesArgs>(name, arguments) {
                Ok(args) => gateway.list_tables(args.schema.as_deref()).await,
                Err(e) => Err(e),
            };
            respond(engine, name, started, result, plain)
        }
        "describe_table" => {
            let result = match parse_args::<TableArgs>(name, arguments) {
                Ok(args) => gateway.describe_table(args.schema.as_deref(), &args.table).await,
                Err(e) => Err(e),
            };
            respond(engine, name, started, result, plain)
        }
        "relationships" => {
            let result = match parse_args::<TableArgs>(name, arguments) {
                Ok(args) => gateway.relationships(args.schema.as_deref(), &args.table).await,
                Err(e) => Err(e),
            };
            respond(engine, name, started, result, plain)
        }
        "table_stats" => {
            let result = match parse_args::<TableArgs>(name, arguments) {
                Ok(args) => gateway.table_stats(args.schema.as_deref(), &args.table).await,
                Err(e) => Err(e),
            };
            respond(engine, name, started, result, plain)
        }
        "database_info" => {
            let result = match parse_args::<NoArgs>(name, arguments) {
                Ok(NoArgs {}) => gateway.database_info().await,
                Err(e) => Err(e),
            };
            respond(engine, name, started, result, plain)
        }
        _ => return Err(RpcFault::new(INVALID_PARAMS, format!("Unknown tool: {name}"))),
    };

    serde_json::to_value(result).map_err(|e| RpcFault::new(INVALID_PARAMS, e.to_string()))
}

fn parse_args<T: DeserializeOwned>(tool: &str, arguments: Value) -> crate::error::Result<T> {
    serde_json::from_value(arguments)
        .map_err(|e| GatewayError::invalid_input(format!("Invalid arguments for {tool}: {e}")))
}

fn plain<T>(_: &T, execution_ms: u64) -> Metadata {
    Metadata::new(execution_ms)
}

fn respond<T: Serialize>(
    engine: &str,
    operation: &str,
    started: Instant,
    result: crate::error::Result<T>,
    meta: impl FnOnce(&T, u64) -> Metadata,
) -> CallToolResult {
    if let Err(e) = &result {
        warn!(tool = operation, code = e.error_code(), "tool call failed");
    }
    CallToolResult::from_envelope(&Envelope::from_result(engine, operation, started, result, meta))
}
