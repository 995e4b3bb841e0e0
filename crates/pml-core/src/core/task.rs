// pml-core/src/core/task.rs
// ============================================================================
// Module: PML Gateway Task Model
// Description: Task nodes, argument values, and permission ladder.
// Purpose: Provide the canonical schema for DAG nodes and their inputs.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! A task is one node of an executable DAG. Arguments are tagged sum values
//! distinguishing literals, external parameters, and references into other
//! task results; the executor materializes them before dispatch and no tagged
//! value ever reaches a tool invocation.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::core::identifiers::TaskId;
use crate::core::identifiers::ToolId;

// ============================================================================
// SECTION: Argument Values
// ============================================================================

/// Tagged argument value attached to a task parameter.
///
/// # Invariants
/// - `Reference` expressions are dotted paths rooted in a task identifier
///   (for example `n3.content[0]`); the root rewrite happens during structure
///   building, never as a post-pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ArgumentValue {
    /// Literal JSON value captured from the source snippet.
    Literal {
        /// Captured value.
        value: Value,
    },
    /// External parameter supplied by the caller at execution time.
    Parameter {
        /// Parameter name.
        name: String,
    },
    /// Reference into another task's result or a tracked binding.
    Reference {
        /// Dotted path expression rooted in a task identifier.
        expression: String,
    },
}

impl ArgumentValue {
    /// Creates a literal argument.
    #[must_use]
    pub const fn literal(value: Value) -> Self {
        Self::Literal {
            value,
        }
    }

    /// Creates a parameter argument.
    #[must_use]
    pub fn parameter(name: impl Into<String>) -> Self {
        Self::Parameter {
            name: name.into(),
        }
    }

    /// Creates a reference argument.
    #[must_use]
    pub fn reference(expression: impl Into<String>) -> Self {
        Self::Reference {
            expression: expression.into(),
        }
    }

    /// Returns the root segment of a reference expression, if any.
    #[must_use]
    pub fn reference_root(&self) -> Option<&str> {
        match self {
            Self::Reference {
                expression,
            } => {
                let head = expression.split(['.', '[']).next().unwrap_or(expression.as_str());
                Some(head)
            }
            Self::Literal {
                ..
            }
            | Self::Parameter {
                ..
            } => None,
        }
    }
}

// ============================================================================
// SECTION: Task Kind
// ============================================================================

/// Task node classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Downstream MCP tool invocation.
    ToolCall,
    /// Sandbox code execution.
    CodeExecution,
    /// Branch decision evaluated against completed results.
    Decision,
    /// Parallel fan-out marker.
    Fork,
    /// Parallel fan-in marker.
    Join,
    /// Stored capability invocation.
    Capability,
}

// ============================================================================
// SECTION: Permission Ladder
// ============================================================================

/// Fixed permission ladder assigned to tasks and capabilities.
///
/// # Invariants
/// - Ordering follows the ladder: `Minimal` is the weakest, `Trusted` the
///   strongest. `Ord` is derived from declaration order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "kebab-case")]
pub enum PermissionSet {
    /// No filesystem or network access.
    #[default]
    Minimal,
    /// Read-only data access.
    Readonly,
    /// Filesystem read/write access.
    Filesystem,
    /// Outbound network API access.
    NetworkApi,
    /// Standard MCP tool surface.
    McpStandard,
    /// Full trusted access.
    Trusted,
}

impl PermissionSet {
    /// Returns the stable wire label for the permission set.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Minimal => "minimal",
            Self::Readonly => "readonly",
            Self::Filesystem => "filesystem",
            Self::NetworkApi => "network-api",
            Self::McpStandard => "mcp-standard",
            Self::Trusted => "trusted",
        }
    }
}

// ============================================================================
// SECTION: Task Metadata
// ============================================================================

/// Auxiliary task metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskMetadata {
    /// Pure operations bypass approval gates.
    #[serde(default)]
    pub pure: bool,
    /// Confidence of the inferred permission set, when inferred.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permission_confidence: Option<f64>,
}

// ============================================================================
// SECTION: Task
// ============================================================================

/// One node of an executable DAG.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Task identifier, stable within the DAG.
    pub id: TaskId,
    /// Qualified tool name (`server:tool`), pseudo-tool (`code:<op>`), or the
    /// capability invocation surface for `Capability` tasks.
    pub tool: ToolId,
    /// Task classification.
    pub kind: TaskKind,
    /// Ordered set of task identifiers that must complete before this task.
    #[serde(default)]
    pub depends_on: Vec<TaskId>,
    /// Parameter name to argument value mapping.
    #[serde(default)]
    pub arguments: BTreeMap<String, ArgumentValue>,
    /// Verbatim code span captured from the original snippet, when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub static_code: Option<String>,
    /// Canonical condition expression for `Decision` tasks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    /// Permission set required by the task.
    #[serde(default)]
    pub permission_set: PermissionSet,
    /// Whether the task suspends the workflow for human approval.
    #[serde(default)]
    pub requires_approval: bool,
    /// Auxiliary metadata.
    #[serde(default)]
    pub metadata: TaskMetadata,
}

impl Task {
    /// Returns true when the task is a pure pseudo-tool operation.
    ///
    /// Pure operations never require approval regardless of flags.
    #[must_use]
    pub fn is_pure(&self) -> bool {
        self.metadata.pure || self.tool.is_pseudo()
    }
}
