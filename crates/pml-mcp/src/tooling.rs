// pml-mcp/src/tooling.rs
// ============================================================================
// Module: Meta-Tool Definitions
// Description: Names and input schemas for the gateway's meta-tool surface.
// Purpose: Expose exactly the fixed meta-tool set to MCP clients.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! The gateway never passes arbitrary tools through; clients see exactly five
//! meta-tools. Definitions carry JSON schemas used both for `tools/list`
//! responses and for input validation before dispatch.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use serde_json::json;

// ============================================================================
// SECTION: Tool Names
// ============================================================================

/// Meta-tool names exposed to MCP clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolName {
    /// Hybrid search over tools and capabilities.
    Discover,
    /// Execute code, an intent, or a continuation.
    Execute,
    /// Abort a workflow.
    Abort,
    /// Resume an approval-paused workflow with a decision.
    Continue,
    /// Swap the DAG of a suspended workflow.
    Replan,
}

impl ToolName {
    /// Returns the stable wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Discover => "discover",
            Self::Execute => "execute",
            Self::Abort => "abort",
            Self::Continue => "continue",
            Self::Replan => "replan",
        }
    }

    /// Parses a wire name.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "discover" => Some(Self::Discover),
            "execute" => Some(Self::Execute),
            "abort" => Some(Self::Abort),
            "continue" => Some(Self::Continue),
            "replan" => Some(Self::Replan),
            _ => None,
        }
    }
}

// ============================================================================
// SECTION: Definitions
// ============================================================================

/// One meta-tool definition.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    /// Wire name.
    pub name: &'static str,
    /// Human-readable description.
    pub description: &'static str,
    /// JSON schema for the tool input.
    pub input_schema: Value,
}

/// Returns the definitions for the fixed meta-tool set.
#[must_use]
pub fn tool_definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: ToolName::Discover.as_str(),
            description: "Search downstream tools and learned capabilities for an intent.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string" },
                },
                "required": ["query"],
                "additionalProperties": false,
            }),
        },
        ToolDefinition {
            name: ToolName::Execute.as_str(),
            description: "Execute code or an intent as a DAG of tool calls, or continue a \
                          suspended workflow.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "code": { "type": "string" },
                    "intent": { "type": "string" },
                    "continue_workflow": { "type": "string" },
                    "options": {
                        "type": "object",
                        "properties": {
                            "parameters": { "type": "object" },
                            "client_tools": {
                                "type": "array",
                                "items": { "type": "string" },
                            },
                            "require_approval": { "type": "boolean" },
                            "user_id": { "type": "string" },
                            "correlation_id": { "type": "string" },
                        },
                        "additionalProperties": false,
                    },
                },
                "additionalProperties": false,
            }),
        },
        ToolDefinition {
            name: ToolName::Abort.as_str(),
            description: "Abort a running or suspended workflow.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "workflow_id": { "type": "string" },
                },
                "required": ["workflow_id"],
                "additionalProperties": false,
            }),
        },
        ToolDefinition {
            name: ToolName::Continue.as_str(),
            description: "Resume an approval-paused workflow with a decision.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "workflow_id": { "type": "string" },
                    "approved": { "type": "boolean" },
                    "checkpoint_id": { "type": "string" },
                    "options": { "type": "object" },
                },
                "required": ["workflow_id", "approved"],
                "additionalProperties": true,
            }),
        },
        ToolDefinition {
            name: ToolName::Replan.as_str(),
            description: "Swap the DAG of a suspended workflow without losing completed work.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "workflow_id": { "type": "string" },
                    "new_dag": { "type": "object" },
                },
                "required": ["workflow_id", "new_dag"],
                "additionalProperties": false,
            }),
        },
    ]
}
