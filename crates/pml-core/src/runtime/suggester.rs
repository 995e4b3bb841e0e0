// pml-core/src/runtime/suggester.rs
// ============================================================================
// Module: DAG Suggester
// Description: Builds a DAG from an intent via match or tool composition.
// Purpose: Provide the suggestion path when no code is supplied.
// Dependencies: crate::core, crate::interfaces, crate::runtime::matcher
// ============================================================================

//! ## Overview
//! When the matcher accepts a capability, the suggester wraps it into a
//! single-task DAG mapping intent parameters onto the capability's schema.
//! Otherwise it composes individual tools from semantic search plus
//! graph-based next-step prediction. A zero-confidence suggestion is a valid
//! outcome; a positive confidence without a DAG is an internal error.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

use crate::core::capability::Capability;
use crate::core::dag::Dag;
use crate::core::dag::Edge;
use crate::core::dag::EdgeKind;
use crate::core::identifiers::CorrelationId;
use crate::core::identifiers::TaskId;
use crate::core::identifiers::ToolId;
use crate::core::task::ArgumentValue;
use crate::core::task::PermissionSet;
use crate::core::task::Task;
use crate::core::task::TaskKind;
use crate::core::task::TaskMetadata;
use crate::core::trace::AlgorithmMode;
use crate::interfaces::EmbedError;
use crate::interfaces::Embedder;
use crate::interfaces::DependencyGraphStore;
use crate::interfaces::StoreError;
use crate::interfaces::ToolIndex;
use crate::runtime::matcher::CapabilityMatcher;
use crate::runtime::matcher::MatchError;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Tool pool size for composition search.
const COMPOSITION_POOL: usize = 5;

/// Maximum composed path length.
const MAX_PATH_LENGTH: usize = 4;

/// Minimum next-step score required to extend a composed path.
const NEXT_STEP_FLOOR: f64 = 0.3;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Suggester errors.
#[derive(Debug, Error)]
pub enum SuggestError {
    /// Matching failed.
    #[error(transparent)]
    Match(#[from] MatchError),
    /// Embedding the intent failed.
    #[error(transparent)]
    Embed(#[from] EmbedError),
    /// A store lookup failed.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// A positive confidence was produced without a DAG.
    #[error("internal error: confidence {0} without a suggested dag")]
    MissingDag(f64),
}

// ============================================================================
// SECTION: Suggestion
// ============================================================================

/// Suggestion produced for an intent.
#[derive(Debug, Clone)]
pub struct Suggestion {
    /// Suggested DAG, present whenever confidence is positive.
    pub dag: Option<Dag>,
    /// Suggestion confidence, in `[0, 1]`.
    pub confidence: f64,
    /// Matched capability, when the match path produced the DAG.
    pub capability: Option<Capability>,
}

// ============================================================================
// SECTION: Suggester
// ============================================================================

/// Intent-to-DAG suggester.
pub struct DagSuggester {
    /// Capability matcher.
    matcher: Arc<CapabilityMatcher>,
    /// Semantic tool index.
    tools: Arc<dyn ToolIndex>,
    /// Dependency graph signals.
    graph: Arc<dyn DependencyGraphStore>,
    /// Embedding collaborator.
    embedder: Arc<dyn Embedder>,
}

impl DagSuggester {
    /// Creates a suggester over the provided interfaces.
    #[must_use]
    pub fn new(
        matcher: Arc<CapabilityMatcher>,
        tools: Arc<dyn ToolIndex>,
        graph: Arc<dyn DependencyGraphStore>,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        Self {
            matcher,
            tools,
            graph,
            embedder,
        }
    }

    /// Suggests a DAG for an intent.
    ///
    /// # Errors
    ///
    /// Returns [`SuggestError`] when matching or composition fails, or when
    /// the fail-fast invariant (positive confidence implies a DAG) breaks.
    pub async fn suggest(
        &self,
        intent: &str,
        context_tools: &[ToolId],
        parameters: &BTreeMap<String, Value>,
        correlation_id: Option<CorrelationId>,
    ) -> Result<Suggestion, SuggestError> {
        if let Some(matched) = self
            .matcher
            .best_match(intent, context_tools, AlgorithmMode::PassiveSuggestion, correlation_id)
            .await?
        {
            let dag = capability_dag(&matched.capability, parameters);
            let suggestion = Suggestion {
                dag: Some(dag),
                confidence: matched.final_score,
                capability: Some(matched.capability),
            };
            return check_invariant(suggestion);
        }

        let query = self.embedder.embed(intent).await?;
        let hits = self.tools.search_tools(&query, COMPOSITION_POOL)?;
        let Some(first) = hits.first() else {
            return check_invariant(Suggestion {
                dag: None,
                confidence: 0.0,
                capability: None,
            });
        };

        let mut path = vec![first.tool.clone()];
        let mut scores = vec![first.score];
        let mut current = first.tool.clone();
        while path.len() < MAX_PATH_LENGTH {
            let next = self
                .graph
                .next_step_scores(&current)?
                .into_iter()
                .filter(|(tool, _)| !path.contains(tool))
                .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
            let Some((tool, score)) = next else {
                break;
            };
            if score < NEXT_STEP_FLOOR {
                break;
            }
            path.push(tool.clone());
            scores.push(score);
            current = tool;
        }

        #[allow(
            clippy::cast_precision_loss,
            reason = "Path lengths stay far below the f64 integer range."
        )]
        let confidence =
            (scores.iter().sum::<f64>() / scores.len() as f64).clamp(0.0, 1.0);
        let dag = if confidence > 0.0 { Some(composed_dag(&path)) } else { None };
        check_invariant(Suggestion {
            dag,
            confidence,
            capability: None,
        })
    }
}

// ============================================================================
// SECTION: DAG Construction
// ============================================================================

/// Enforces the fail-fast invariant: positive confidence implies a DAG.
fn check_invariant(suggestion: Suggestion) -> Result<Suggestion, SuggestError> {
    if suggestion.confidence > 0.0 && suggestion.dag.is_none() {
        return Err(SuggestError::MissingDag(suggestion.confidence));
    }
    Ok(suggestion)
}

/// Builds a single-task DAG invoking a capability, mapping supplied
/// parameters onto the capability's schema properties.
fn capability_dag(capability: &Capability, parameters: &BTreeMap<String, Value>) -> Dag {
    let mut arguments = BTreeMap::new();
    if let Some(properties) =
        capability.parameters_schema.get("properties").and_then(Value::as_object)
    {
        for name in properties.keys() {
            let argument = parameters.get(name).map_or_else(
                || ArgumentValue::parameter(name.clone()),
                |value| ArgumentValue::literal(value.clone()),
            );
            arguments.insert(name.clone(), argument);
        }
    }

    let task = Task {
        id: TaskId::for_node(1),
        tool: ToolId::qualified("capability", &capability.fqdn.action),
        kind: TaskKind::Capability,
        depends_on: Vec::new(),
        arguments,
        static_code: Some(capability.code_snippet.clone()),
        condition: None,
        permission_set: capability.permission_set,
        requires_approval: false,
        metadata: TaskMetadata::default(),
    };
    Dag::new(vec![task], Vec::new())
}

/// Builds a linear composed DAG over the predicted tool path.
fn composed_dag(path: &[ToolId]) -> Dag {
    let mut tasks = Vec::with_capacity(path.len());
    let mut edges = Vec::new();
    for (index, tool) in path.iter().enumerate() {
        let id = TaskId::for_node(index + 1);
        let depends_on =
            if index == 0 { Vec::new() } else { vec![TaskId::for_node(index)] };
        if index > 0 {
            edges.push(Edge {
                from: TaskId::for_node(index),
                to: id.clone(),
                kind: EdgeKind::Sequence,
                outcome: None,
            });
        }
        tasks.push(Task {
            id,
            tool: tool.clone(),
            kind: TaskKind::ToolCall,
            depends_on,
            arguments: BTreeMap::new(),
            static_code: None,
            condition: None,
            permission_set: PermissionSet::McpStandard,
            requires_approval: false,
            metadata: TaskMetadata::default(),
        });
    }
    Dag::new(tasks, edges)
}
