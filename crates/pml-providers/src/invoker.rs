// pml-providers/src/invoker.rs
// ============================================================================
// Module: Downstream Tool Invoker
// Description: JSON-RPC client for downstream MCP tool servers.
// Purpose: Dispatch materialized tool calls with failure classification.
// Dependencies: pml-core, reqwest, serde_json
// ============================================================================

//! ## Overview
//! The invoker resolves a qualified tool name through the downstream
//! registry and issues a JSON-RPC 2.0 `tools/call`. Failures map onto the
//! invoke error taxonomy so the executor's classification stays accurate.

// ============================================================================
// SECTION: Imports
// ============================================================================

use async_trait::async_trait;
use pml_core::InvokeError;
use pml_core::PermissionSet;
use pml_core::ToolId;
use pml_core::ToolInvoker;
use serde::Deserialize;
use serde_json::Value;
use serde_json::json;

use crate::registry::DownstreamRegistry;

// ============================================================================
// SECTION: Wire Payloads
// ============================================================================

/// JSON-RPC response envelope from a downstream server.
#[derive(Debug, Deserialize)]
struct RpcResponse {
    /// Successful result payload.
    result: Option<Value>,
    /// Error payload.
    error: Option<RpcError>,
}

/// JSON-RPC error payload.
#[derive(Debug, Deserialize)]
struct RpcError {
    /// Error code.
    code: i64,
    /// Error message.
    message: String,
}

// ============================================================================
// SECTION: Invoker
// ============================================================================

/// HTTP JSON-RPC invoker over the downstream registry.
pub struct HttpToolInvoker {
    /// Downstream server registry.
    registry: DownstreamRegistry,
    /// Shared HTTP client.
    client: reqwest::Client,
}

impl HttpToolInvoker {
    /// Creates an invoker over the provided registry.
    #[must_use]
    pub fn new(registry: DownstreamRegistry) -> Self {
        Self {
            registry,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl ToolInvoker for HttpToolInvoker {
    async fn invoke(
        &self,
        tool: &ToolId,
        arguments: &Value,
        permission_set: PermissionSet,
    ) -> Result<Value, InvokeError> {
        let server = tool
            .server()
            .ok_or_else(|| InvokeError::Unavailable(tool.to_string()))?;
        let endpoint = self
            .registry
            .server_endpoint(server)
            .ok_or_else(|| InvokeError::Unavailable(tool.to_string()))?;
        let name = tool.tool().unwrap_or_default();

        let request = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "tools/call",
            "params": {
                "name": name,
                "arguments": arguments,
                "_meta": { "permission_set": permission_set.as_str() },
            },
        });

        let response = self
            .client
            .post(endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    InvokeError::Timeout
                } else if err.is_connect() {
                    InvokeError::Failed(format!("connection refused: {err}"))
                } else {
                    InvokeError::Failed(err.to_string())
                }
            })?;

        let status = response.status();
        if status.as_u16() == 403 || status.as_u16() == 401 {
            return Err(InvokeError::Denied(tool.to_string()));
        }
        if status.as_u16() == 404 {
            return Err(InvokeError::Unavailable(tool.to_string()));
        }
        if !status.is_success() {
            return Err(InvokeError::Failed(format!("downstream returned {status}")));
        }

        let payload: RpcResponse =
            response.json().await.map_err(|err| InvokeError::Failed(err.to_string()))?;
        if let Some(error) = payload.error {
            return Err(match error.code {
                -32601 => InvokeError::Unavailable(tool.to_string()),
                _ => InvokeError::Failed(error.message),
            });
        }
        payload
            .result
            .ok_or_else(|| InvokeError::Failed("downstream returned no result".to_string()))
    }

    fn available(&self, tool: &ToolId) -> bool {
        self.registry.is_server_tool(tool)
    }
}
