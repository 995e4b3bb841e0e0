// pml-mcp/src/server.rs
// ============================================================================
// Module: MCP Server
// Description: JSON-RPC 2.0 server over HTTP and SSE transports.
// Purpose: Expose the meta-tool surface to MCP clients.
// Dependencies: axum, pml-config, tokio, tokio-stream
// ============================================================================

//! ## Overview
//! The server exposes `initialize`, `tools/list`, and `tools/call` over HTTP
//! and SSE and always routes calls through [`crate::tools::MetaToolRouter`].
//! Inputs are untrusted: payloads are parsed strictly and invalid requests
//! answer with JSON-RPC errors, never panics.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::response::Sse;
use axum::response::sse::Event;
use axum::routing::post;
use pml_config::GatewayConfig;
use pml_config::ServerTransport;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use serde_json::json;
use thiserror::Error;
use tokio_stream::wrappers::ReceiverStream;

use crate::telemetry::AuditEvent;
use crate::telemetry::AuditSink;
use crate::telemetry::GatewayMetrics;
use crate::telemetry::RequestMetricEvent;
use crate::telemetry::RequestOutcome;
use crate::telemetry::RpcMethod;
use crate::tooling::tool_definitions;
use crate::tools::MetaToolRouter;
use crate::tools::ToolError;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Protocol version advertised on initialize.
const PROTOCOL_VERSION: &str = "2025-06-18";

/// Server name advertised on initialize.
const SERVER_NAME: &str = "pml-gateway";

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Server lifecycle errors.
#[derive(Debug, Error)]
pub enum McpServerError {
    /// Binding the listener failed.
    #[error("server bind error: {0}")]
    Bind(String),
    /// Serving failed.
    #[error("server error: {0}")]
    Serve(String),
}

// ============================================================================
// SECTION: Server
// ============================================================================

/// Shared server state.
struct ServerState {
    /// Meta-tool router.
    router: MetaToolRouter,
    /// Metrics sink.
    metrics: Arc<dyn GatewayMetrics>,
    /// Audit sink.
    audit: Arc<dyn AuditSink>,
}

/// MCP server instance.
pub struct McpServer {
    /// Bind address.
    bind: SocketAddr,
    /// Shared state.
    state: Arc<ServerState>,
}

impl McpServer {
    /// Builds a server from configuration and a wired router.
    ///
    /// # Errors
    ///
    /// Returns [`McpServerError::Bind`] when the bind address is invalid.
    pub fn new(
        config: &GatewayConfig,
        router: MetaToolRouter,
        metrics: Arc<dyn GatewayMetrics>,
        audit: Arc<dyn AuditSink>,
    ) -> Result<Self, McpServerError> {
        let bind = config
            .server
            .bind
            .parse()
            .map_err(|err| McpServerError::Bind(format!("{}: {err}", config.server.bind)))?;
        Ok(Self {
            bind,
            state: Arc::new(ServerState {
                router,
                metrics,
                audit,
            }),
        })
    }

    /// Serves requests until the process stops.
    ///
    /// # Errors
    ///
    /// Returns [`McpServerError`] when binding or serving fails.
    pub async fn serve(self) -> Result<(), McpServerError> {
        let app = Router::new()
            .route("/", post(handle_http))
            .route("/sse", post(handle_sse))
            .with_state(self.state);
        let listener = tokio::net::TcpListener::bind(self.bind)
            .await
            .map_err(|err| McpServerError::Bind(err.to_string()))?;
        axum::serve(listener, app)
            .await
            .map_err(|err| McpServerError::Serve(err.to_string()))
    }
}

// ============================================================================
// SECTION: Transport Handlers
// ============================================================================

/// Handles HTTP JSON-RPC requests.
async fn handle_http(State(state): State<Arc<ServerState>>, bytes: Bytes) -> impl IntoResponse {
    let response = process_request(&state, ServerTransport::Http, &bytes).await;
    axum::Json(response)
}

/// Handles SSE JSON-RPC requests (one response event per request).
async fn handle_sse(State(state): State<Arc<ServerState>>, bytes: Bytes) -> impl IntoResponse {
    let response = process_request(&state, ServerTransport::Sse, &bytes).await;
    let (tx, rx) = tokio::sync::mpsc::channel::<Result<Event, Infallible>>(1);
    let payload = serde_json::to_string(&response).unwrap_or_else(|_| {
        "{\"jsonrpc\":\"2.0\",\"id\":null,\"error\":{\"code\":-32603,\"message\":\"serialization \
         failed\"}}"
            .to_string()
    });
    let _ = tx.send(Ok(Event::default().data(payload))).await;
    Sse::new(ReceiverStream::new(rx))
}

// ============================================================================
// SECTION: JSON-RPC Handling
// ============================================================================

/// Incoming JSON-RPC request payload.
#[derive(Debug, Deserialize)]
struct JsonRpcRequest {
    /// JSON-RPC protocol version.
    jsonrpc: String,
    /// Request identifier.
    #[serde(default)]
    id: Value,
    /// Method name.
    method: String,
    /// Optional parameters payload.
    #[serde(default)]
    params: Option<Value>,
}

/// JSON-RPC response envelope.
#[derive(Debug, Serialize)]
struct JsonRpcResponse {
    /// JSON-RPC protocol version.
    jsonrpc: &'static str,
    /// Request identifier.
    id: Value,
    /// Successful result payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    /// Error payload when the request fails.
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<JsonRpcError>,
}

/// JSON-RPC error payload.
#[derive(Debug, Serialize)]
struct JsonRpcError {
    /// Error code.
    code: i64,
    /// Human-readable error message.
    message: String,
}

/// Builds a success response.
fn rpc_ok(id: Value, result: Value) -> JsonRpcResponse {
    JsonRpcResponse {
        jsonrpc: "2.0",
        id,
        result: Some(result),
        error: None,
    }
}

/// Builds an error response.
fn rpc_err(id: Value, code: i64, message: impl Into<String>) -> JsonRpcResponse {
    JsonRpcResponse {
        jsonrpc: "2.0",
        id,
        result: None,
        error: Some(JsonRpcError {
            code,
            message: message.into(),
        }),
    }
}

/// Parses, dispatches, and observes one JSON-RPC request.
async fn process_request(
    state: &ServerState,
    transport: ServerTransport,
    bytes: &Bytes,
) -> JsonRpcResponse {
    let started = Instant::now();
    let request: Result<JsonRpcRequest, _> = serde_json::from_slice(bytes);

    let (response, method, tool) = match request {
        Err(err) => (
            rpc_err(Value::Null, -32700, format!("parse error: {err}")),
            RpcMethod::Invalid,
            None,
        ),
        Ok(request) if request.jsonrpc != "2.0" => (
            rpc_err(request.id, -32600, "unsupported jsonrpc version"),
            RpcMethod::Invalid,
            None,
        ),
        Ok(request) => dispatch(state, request).await,
    };

    let outcome =
        if response.error.is_some() { RequestOutcome::Error } else { RequestOutcome::Ok };
    let response_bytes = serde_json::to_vec(&response).map(|body| body.len()).unwrap_or(0);
    let event = RequestMetricEvent {
        transport,
        method,
        tool,
        outcome,
        error_code: response.error.as_ref().map(|error| error.code),
        request_bytes: bytes.len(),
        response_bytes,
    };
    state.metrics.record_request(&event);
    state.metrics.record_latency(&event, started.elapsed());
    state.audit.record(&AuditEvent {
        event: "mcp.request",
        timestamp_ms: AuditEvent::now_ms(),
        request_id: None,
        transport,
        method,
        tool,
        outcome,
        error_code: event.error_code,
        request_bytes: event.request_bytes,
        response_bytes: event.response_bytes,
    });
    response
}

/// Dispatches one parsed JSON-RPC request.
async fn dispatch(
    state: &ServerState,
    request: JsonRpcRequest,
) -> (JsonRpcResponse, RpcMethod, Option<crate::tooling::ToolName>) {
    match request.method.as_str() {
        "initialize" => {
            let result = json!({
                "protocolVersion": PROTOCOL_VERSION,
                "serverInfo": {
                    "name": SERVER_NAME,
                    "version": env!("CARGO_PKG_VERSION"),
                },
                "capabilities": { "tools": {} },
            });
            (rpc_ok(request.id, result), RpcMethod::Initialize, None)
        }
        "tools/list" => {
            let tools: Vec<Value> = tool_definitions()
                .into_iter()
                .map(|definition| {
                    json!({
                        "name": definition.name,
                        "description": definition.description,
                        "inputSchema": definition.input_schema,
                    })
                })
                .collect();
            (
                rpc_ok(request.id, json!({ "tools": tools })),
                RpcMethod::ToolsList,
                None,
            )
        }
        "tools/call" => {
            let params = request.params.unwrap_or(Value::Null);
            let name = params.get("name").and_then(Value::as_str).unwrap_or_default().to_string();
            let arguments = params.get("arguments").cloned().unwrap_or_else(|| json!({}));
            let tool = crate::tooling::ToolName::parse(&name);
            match state.router.handle_tool_call(&name, arguments).await {
                Ok(result) => {
                    let body = json!({
                        "content": [{
                            "type": "text",
                            "text": result.to_string(),
                        }],
                        "structuredContent": result,
                    });
                    (rpc_ok(request.id, body), RpcMethod::ToolsCall, tool)
                }
                Err(error) => {
                    let code = match &error {
                        ToolError::UnknownTool(_) => -32601,
                        ToolError::InvalidInput(_) => -32602,
                        ToolError::Internal(_) => -32603,
                    };
                    (rpc_err(request.id, code, error.to_string()), RpcMethod::ToolsCall, tool)
                }
            }
        }
        _ => (
            rpc_err(request.id, -32601, format!("unsupported method: {}", request.method)),
            RpcMethod::Other,
            None,
        ),
    }
}
