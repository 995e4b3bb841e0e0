// pml-core/src/core/structure.rs
// ============================================================================
// Module: PML Gateway Static Structure
// Description: Canonical intermediate form extracted from code snippets.
// Purpose: Provide the hash input for capability dedup and DAG conversion.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! A static structure is the canonical node/edge form the structure builder
//! extracts from a code snippet, together with variable and literal bindings.
//! Its canonical hash deliberately excludes verbatim code spans so digests are
//! invariant under whitespace, comments, and consistent variable renaming.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::core::dag::Dag;
use crate::core::dag::Edge;
use crate::core::dag::EdgeKind;
use crate::core::hashing::HashDigest;
use crate::core::hashing::HashError;
use crate::core::hashing::hash_canonical_json;
use crate::core::identifiers::TaskId;
use crate::core::identifiers::ToolId;
use crate::core::task::ArgumentValue;
use crate::core::task::PermissionSet;
use crate::core::task::Task;
use crate::core::task::TaskKind;
use crate::core::task::TaskMetadata;

// ============================================================================
// SECTION: Structure Nodes
// ============================================================================

/// One node of a static structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructureNode {
    /// Node identifier (`n1`, `n2`, ...).
    pub id: TaskId,
    /// Node classification.
    pub kind: TaskKind,
    /// Qualified tool or pseudo-tool name, absent for fork/join markers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<ToolId>,
    /// Invoked capability name for capability nodes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capability: Option<String>,
    /// Normalized arguments extracted in-place during the walk.
    #[serde(default)]
    pub arguments: BTreeMap<String, ArgumentValue>,
    /// Verbatim code span from the original snippet.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub static_code: Option<String>,
    /// Canonical condition rendering for decision nodes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

// ============================================================================
// SECTION: Static Structure
// ============================================================================

/// Canonical structure extracted from a code snippet.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StaticStructure {
    /// Structure nodes ordered by identifier.
    pub nodes: Vec<StructureNode>,
    /// Typed edges between nodes.
    #[serde(default)]
    pub edges: Vec<Edge>,
    /// Code variables bound to node results (`name -> node id`).
    #[serde(default)]
    pub variable_bindings: BTreeMap<String, TaskId>,
    /// Pure literals and statically-evaluable expressions (`name -> value`).
    #[serde(default)]
    pub literal_bindings: BTreeMap<String, Value>,
    /// External parameters the snippet expects.
    #[serde(default)]
    pub parameters: BTreeSet<String>,
}

/// Canonical view of a node used for hashing.
///
/// Verbatim code spans are excluded; decision conditions contribute their
/// canonical rendering so the hash stays whitespace-invariant.
#[derive(Serialize)]
struct CanonicalNode<'a> {
    /// Node identifier.
    id: &'a TaskId,
    /// Node classification.
    kind: TaskKind,
    /// Qualified tool name, when present.
    tool: Option<&'a ToolId>,
    /// Invoked capability name, when present.
    capability: Option<&'a str>,
    /// Normalized arguments.
    arguments: &'a BTreeMap<String, ArgumentValue>,
    /// Canonical condition rendering, when present.
    condition: Option<&'a str>,
}

/// Canonical view of the whole structure used for hashing.
#[derive(Serialize)]
struct CanonicalStructure<'a> {
    /// Canonical nodes sorted by identifier.
    nodes: Vec<CanonicalNode<'a>>,
    /// Edges sorted deterministically.
    edges: Vec<&'a Edge>,
}

impl StaticStructure {
    /// Returns the node with the provided identifier.
    #[must_use]
    pub fn node(&self, id: &TaskId) -> Option<&StructureNode> {
        self.nodes.iter().find(|node| &node.id == id)
    }

    /// Computes the canonical 256-bit hash of the structure.
    ///
    /// The hash covers node identity, kind, tools, normalized arguments, and
    /// canonical conditions plus the sorted edge set. It is invariant under
    /// renaming of bound variables and whitespace or comment changes.
    ///
    /// # Errors
    ///
    /// Returns [`HashError`] when canonical serialization fails.
    pub fn canonical_hash(&self) -> Result<HashDigest, HashError> {
        let mut nodes: Vec<CanonicalNode<'_>> = self
            .nodes
            .iter()
            .map(|node| CanonicalNode {
                id: &node.id,
                kind: node.kind,
                tool: node.tool.as_ref(),
                capability: node.capability.as_deref(),
                arguments: &node.arguments,
                condition: node.condition.as_deref(),
            })
            .collect();
        nodes.sort_by(|a, b| a.id.cmp(b.id));

        let mut edges: Vec<&Edge> = self.edges.iter().collect();
        edges.sort();

        hash_canonical_json(&CanonicalStructure {
            nodes,
            edges,
        })
    }

    /// Converts the structure into an executable DAG.
    ///
    /// Dependencies are derived from incoming sequence, conditional, provides,
    /// and contains edges; alternative edges stay advisory. Argument
    /// references into other nodes add provides-style dependencies so data is
    /// available before dispatch.
    #[must_use]
    pub fn to_dag(&self) -> Dag {
        let ids: BTreeSet<&TaskId> = self.nodes.iter().map(|node| &node.id).collect();
        let tasks = self
            .nodes
            .iter()
            .map(|node| {
                let mut depends: BTreeSet<TaskId> = self
                    .edges
                    .iter()
                    .filter(|edge| edge.to == node.id && edge.kind != EdgeKind::Alternative)
                    .map(|edge| edge.from.clone())
                    .collect();
                for argument in node.arguments.values() {
                    if let Some(root) = argument.reference_root() {
                        let root_id = TaskId::new(root);
                        if ids.contains(&root_id) && root_id != node.id {
                            depends.insert(root_id);
                        }
                    }
                }
                Task {
                    id: node.id.clone(),
                    tool: node.tool.clone().unwrap_or_else(|| pseudo_tool_for(node.kind)),
                    kind: node.kind,
                    depends_on: depends.into_iter().collect(),
                    arguments: node.arguments.clone(),
                    static_code: node.static_code.clone(),
                    condition: node.condition.clone(),
                    permission_set: PermissionSet::default(),
                    requires_approval: false,
                    metadata: TaskMetadata {
                        pure: node.tool.as_ref().is_some_and(ToolId::is_pseudo),
                        permission_confidence: None,
                    },
                }
            })
            .collect();
        Dag::new(tasks, self.edges.clone())
    }
}

/// Returns the marker pseudo-tool for nodes without an explicit tool.
fn pseudo_tool_for(kind: TaskKind) -> ToolId {
    match kind {
        TaskKind::Fork => ToolId::pseudo("fork"),
        TaskKind::Join => ToolId::pseudo("join"),
        TaskKind::Decision => ToolId::pseudo("decision"),
        TaskKind::Capability => ToolId::new("capabilities:invoke"),
        TaskKind::ToolCall | TaskKind::CodeExecution => ToolId::pseudo("noop"),
    }
}
