// pml-core/src/core/trace.rs
// ============================================================================
// Module: PML Gateway Trace Records
// Description: Execution traces and algorithm-decision traces.
// Purpose: Provide the canonical, idempotently-persistable trace schema.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! Every workflow run produces one execution trace; every scoring decision
//! produces one algorithm trace. Both carry UUID identity so the buffered
//! sink can flush idempotently (duplicate inserts are no-ops at the store).

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::core::embedding::Embedding;
use crate::core::failure::TaskErrorKind;
use crate::core::identifiers::CapabilityId;
use crate::core::identifiers::ContextHash;
use crate::core::identifiers::CorrelationId;
use crate::core::identifiers::TaskId;
use crate::core::identifiers::ToolId;
use crate::core::identifiers::TraceId;
use crate::core::identifiers::UserId;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Execution Trace
// ============================================================================

/// Outcome of a single decision node within a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionRecord {
    /// Decision node identifier.
    pub node_id: TaskId,
    /// Resolved outcome label (`true`, `false`, or `case:<value>`).
    pub outcome: String,
    /// Canonical condition expression that was evaluated.
    pub condition: Option<String>,
}

/// Result of a single task within a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResultRecord {
    /// Task identifier.
    pub task_id: TaskId,
    /// Qualified tool name.
    pub tool: ToolId,
    /// Fully materialized arguments passed to the invocation.
    pub args: Value,
    /// Invocation result, when successful.
    pub result: Option<Value>,
    /// Whether the task succeeded.
    pub success: bool,
    /// Task duration in milliseconds.
    pub duration_ms: u64,
    /// Normalized error kind, when failed.
    pub error_type: Option<TaskErrorKind>,
    /// Whether the result was consumed from the speculation cache.
    #[serde(default)]
    pub speculated: bool,
}

/// Per-run execution trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionTrace {
    /// Trace identifier (idempotency key).
    pub id: TraceId,
    /// Executed capability, when the run invoked one.
    pub capability_id: Option<CapabilityId>,
    /// Original intent text, when the run started from an intent.
    pub intent_text: Option<String>,
    /// Intent embedding, when computed.
    pub intent_embedding: Option<Embedding>,
    /// Completion timestamp.
    pub executed_at: Timestamp,
    /// Whether the workflow completed successfully.
    pub success: bool,
    /// Total run duration in milliseconds.
    pub duration_ms: u64,
    /// Dominant error kind, when failed.
    pub error_type: Option<TaskErrorKind>,
    /// Requesting user.
    pub user_id: UserId,
    /// Ordered tool identifiers along the executed path.
    pub executed_path: Vec<ToolId>,
    /// Decision outcomes along the executed path.
    pub decisions: Vec<DecisionRecord>,
    /// Per-task results.
    pub task_results: Vec<TaskResultRecord>,
    /// Replay priority in `[0, 1]` (0 expected, 0.5 cold, 1 surprising).
    pub priority: f64,
    /// Parent trace for nested capability invocations.
    pub parent_trace_id: Option<TraceId>,
}

// ============================================================================
// SECTION: Algorithm Trace
// ============================================================================

/// Scoring mode for an algorithm decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlgorithmMode {
    /// Explicit search triggered by a request.
    ActiveSearch,
    /// Passive suggestion during intent routing.
    PassiveSuggestion,
}

/// Target type scored by an algorithm decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    /// Individual downstream tool.
    Tool,
    /// Stored capability.
    Capability,
}

/// Final decision of a scoring pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlgorithmDecision {
    /// Candidate accepted.
    Accepted,
    /// Candidate scored below the adaptive threshold.
    RejectedByThreshold,
    /// Candidate filtered by the reliability floor regardless of score.
    FilteredByReliability,
}

/// Raw signals feeding a scoring decision.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SignalSet {
    /// Cosine similarity of intent embeddings, in `[0, 1]`.
    pub semantic_score: f64,
    /// Combined Adamic-Adar and direct-edge graph signal, in `[0, 1]`.
    pub graph_score: f64,
    /// Candidate success rate, in `[0, 1]`.
    pub success_rate: f64,
    /// Whether the candidate shares the dominant context community.
    pub spectral_cluster_match: bool,
    /// Dependency graph density used for alpha computation.
    pub graph_density: f64,
}

/// Derived mixing parameters for a scoring decision.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreParams {
    /// Semantic/graph mixing weight, in `[0.5, 1.0]`.
    pub alpha: f64,
    /// Reliability multiplier, in `[0.5, 1.0]`.
    pub reliability_factor: f64,
    /// Structural boost applied for community matches.
    pub structural_boost: f64,
}

/// Observability record for one scoring decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlgorithmTrace {
    /// Trace identifier (idempotency key).
    pub trace_id: TraceId,
    /// Correlation identifier propagated from the request.
    pub correlation_id: Option<CorrelationId>,
    /// Name of the scoring algorithm.
    pub algorithm_name: String,
    /// Scoring mode.
    pub mode: AlgorithmMode,
    /// Target type scored.
    pub target_type: TargetKind,
    /// Intent text, when present.
    pub intent: Option<String>,
    /// Context hash used for threshold lookup.
    pub context_hash: Option<ContextHash>,
    /// Raw scoring signals.
    pub signals: SignalSet,
    /// Derived mixing parameters.
    pub params: ScoreParams,
    /// Final clamped score.
    pub final_score: f64,
    /// Threshold applied to the decision.
    pub threshold_used: f64,
    /// Decision outcome.
    pub decision: AlgorithmDecision,
    /// Downstream outcome payload, when recorded later.
    pub outcome: Option<Value>,
    /// Decision timestamp.
    pub timestamp: Timestamp,
}
