// pml-core/src/interfaces/mod.rs
// ============================================================================
// Module: PML Gateway Interfaces
// Description: Backend-agnostic interfaces for stores, cache, and collaborators.
// Purpose: Define the contract surfaces used by the gateway runtime.
// Dependencies: crate::core
// ============================================================================

//! ## Overview
//! Interfaces define how the gateway integrates with storage engines and
//! external collaborators (embedding model, sandbox worker, downstream MCP
//! servers) without embedding backend-specific details. Implementations must
//! fail closed on missing or invalid data. Every component depends on these
//! traits and the core types, never on another component's concrete types.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::core::capability::Capability;
use crate::core::capability::Visibility;
use crate::core::embedding::Embedding;
use crate::core::events::GatewayEvent;
use crate::core::hashing::HashDigest;
use crate::core::identifiers::CapabilityFqdn;
use crate::core::identifiers::CapabilityId;
use crate::core::identifiers::CheckpointId;
use crate::core::identifiers::ContextHash;
use crate::core::identifiers::ToolId;
use crate::core::identifiers::WorkflowId;
use crate::core::task::PermissionSet;
use crate::core::task::Task;
use crate::core::time::Timestamp;
use crate::core::trace::AlgorithmTrace;
use crate::core::trace::ExecutionTrace;
use crate::core::workflow::Checkpoint;
use crate::core::workflow::WorkflowState;

// ============================================================================
// SECTION: Store Errors
// ============================================================================

/// Shared error type for persistent store interfaces.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Store I/O error.
    #[error("store io error: {0}")]
    Io(String),
    /// Unique-constraint conflict (for example a duplicate code hash with a
    /// mismatched body, which is a programming error).
    #[error("store conflict: {0}")]
    Conflict(String),
    /// Store data is invalid or corrupted.
    #[error("store invalid data: {0}")]
    Invalid(String),
    /// A referenced record does not exist.
    #[error("store record missing: {0}")]
    Missing(String),
}

// ============================================================================
// SECTION: Capability Store
// ============================================================================

/// Content-addressed capability storage.
///
/// The store owns capabilities exclusively; `code_snippet` and the intent
/// embedding never change after insertion.
pub trait CapabilityStore: Send + Sync {
    /// Inserts a new capability.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] when a capability with the same code
    /// hash already exists.
    fn insert(&self, capability: &Capability) -> Result<(), StoreError>;

    /// Returns the capability with the provided code hash, if any.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the lookup fails.
    fn find_by_hash(&self, hash: &HashDigest) -> Result<Option<Capability>, StoreError>;

    /// Returns the capability with the provided identifier, if any.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the lookup fails.
    fn get(&self, id: &CapabilityId) -> Result<Option<Capability>, StoreError>;

    /// Returns the capability with the provided fully-qualified name, if any.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the lookup fails.
    fn find_by_fqdn(&self, fqdn: &CapabilityFqdn) -> Result<Option<Capability>, StoreError>;

    /// Folds one execution outcome into the capability statistics.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Missing`] when the capability does not exist.
    fn record_use(
        &self,
        id: &CapabilityId,
        success: bool,
        duration_ms: u64,
        at: Timestamp,
    ) -> Result<(), StoreError>;

    /// Returns the top-k capabilities by intent-embedding similarity.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the search fails.
    fn search_by_intent(
        &self,
        embedding: &Embedding,
        k: usize,
    ) -> Result<Vec<(Capability, f64)>, StoreError>;

    /// Lists capabilities visible to a user at the provided scope.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the listing fails.
    fn list_for_user(
        &self,
        user_id: &crate::core::identifiers::UserId,
        scope: Visibility,
        limit: usize,
    ) -> Result<Vec<Capability>, StoreError>;
}

// ============================================================================
// SECTION: Trace Store
// ============================================================================

/// Batched, idempotent persistence for trace records.
pub trait TraceStore: Send + Sync {
    /// Inserts a batch of execution traces; duplicate identifiers are no-ops.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the batch write fails as a whole.
    fn insert_executions(&self, traces: &[ExecutionTrace]) -> Result<(), StoreError>;

    /// Inserts a batch of algorithm traces; duplicate identifiers are no-ops.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the batch write fails as a whole.
    fn insert_algorithms(&self, traces: &[AlgorithmTrace]) -> Result<(), StoreError>;
}

// ============================================================================
// SECTION: Checkpoint Store
// ============================================================================

/// Persistence for resumable executor checkpoints.
pub trait CheckpointStore: Send + Sync {
    /// Saves a checkpoint, pruning to the most recent `keep` per workflow.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the write fails.
    fn save(&self, checkpoint: &Checkpoint, keep: usize) -> Result<(), StoreError>;

    /// Returns the most recent checkpoint for a workflow, if any.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the lookup fails.
    fn latest(&self, workflow_id: &WorkflowId) -> Result<Option<Checkpoint>, StoreError>;

    /// Returns the checkpoint with the provided identifier, if any.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the lookup fails.
    fn get(&self, id: &CheckpointId) -> Result<Option<Checkpoint>, StoreError>;

    /// Deletes all checkpoints for a workflow.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the delete fails.
    fn delete_for(&self, workflow_id: &WorkflowId) -> Result<(), StoreError>;
}

// ============================================================================
// SECTION: Adaptive Threshold Store
// ============================================================================

/// Stored adaptive threshold record per context hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdRecord {
    /// Context hash key.
    pub context_hash: ContextHash,
    /// Context keys the hash was derived from.
    pub context_keys: Vec<String>,
    /// Suggestion threshold, clamped to `[0.40, 0.90]`.
    pub suggestion_threshold: f64,
    /// Explicit-search threshold, clamped to `[0.30, 0.80]`.
    pub explicit_threshold: f64,
    /// Observed success rate for this context.
    pub success_rate: f64,
    /// Number of recorded outcomes.
    pub sample_count: u64,
}

/// Process-wide adaptive threshold map.
///
/// Updates serialize read-modify-write per context hash inside the
/// implementation.
pub trait ThresholdStore: Send + Sync {
    /// Returns the threshold record for a context hash, if any.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the lookup fails.
    fn get(&self, context_hash: &ContextHash) -> Result<Option<ThresholdRecord>, StoreError>;

    /// Folds one match outcome into the context's thresholds.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the update fails.
    fn record_outcome(
        &self,
        context_hash: &ContextHash,
        context_keys: &[String],
        success: bool,
    ) -> Result<(), StoreError>;
}

// ============================================================================
// SECTION: Dependency Graph Store
// ============================================================================

/// Dependency-graph signals over observed tool co-occurrence.
pub trait DependencyGraphStore: Send + Sync {
    /// Records one observation of an edge between two tools.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the write fails.
    fn observe_edge(&self, from: &ToolId, to: &ToolId) -> Result<(), StoreError>;

    /// Returns the weighted neighbors of a tool.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the lookup fails.
    fn neighbors(&self, tool: &ToolId) -> Result<Vec<(ToolId, f64)>, StoreError>;

    /// Returns the number of distinct tools in the graph.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the count fails.
    fn node_count(&self) -> Result<usize, StoreError>;

    /// Returns the number of distinct edges in the graph.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the count fails.
    fn edge_count(&self) -> Result<usize, StoreError>;

    /// Returns the community assignment for a tool, when computed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the lookup fails.
    fn community(&self, tool: &ToolId) -> Result<Option<i64>, StoreError>;

    /// Returns next-step scores from a tool (combined co-occurrence,
    /// recency, and centrality).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the computation fails.
    fn next_step_scores(&self, tool: &ToolId) -> Result<Vec<(ToolId, f64)>, StoreError>;
}

// ============================================================================
// SECTION: Tool Index
// ============================================================================

/// Indexed downstream tool with its similarity score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolHit {
    /// Qualified tool name.
    pub tool: ToolId,
    /// Tool description.
    pub description: String,
    /// Similarity score, in `[0, 1]`.
    pub score: f64,
}

/// Semantic index over downstream tools.
pub trait ToolIndex: Send + Sync {
    /// Registers a tool with its description embedding.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the write fails.
    fn register_tool(
        &self,
        tool: &ToolId,
        description: &str,
        embedding: &Embedding,
    ) -> Result<(), StoreError>;

    /// Returns the top-k tools by description-embedding similarity.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the search fails.
    fn search_tools(&self, embedding: &Embedding, k: usize) -> Result<Vec<ToolHit>, StoreError>;
}

// ============================================================================
// SECTION: Workflow Cache
// ============================================================================

/// Workflow cache errors.
#[derive(Debug, Error)]
pub enum CacheError {
    /// No entry exists for the workflow.
    #[error("workflow state missing: {0}")]
    Missing(String),
    /// Cache backend error.
    #[error("workflow cache error: {0}")]
    Backend(String),
}

/// Ephemeral workflow state cache (TTL one hour, refreshed on write).
///
/// Expiration is enforced by the implementation, not by callers.
pub trait WorkflowCache: Send + Sync {
    /// Saves workflow state, resetting the TTL.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError`] when the write fails.
    fn save(&self, workflow_id: &WorkflowId, state: &WorkflowState) -> Result<(), CacheError>;

    /// Returns the workflow state, if present and unexpired.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError`] when the read fails.
    fn get(&self, workflow_id: &WorkflowId) -> Result<Option<WorkflowState>, CacheError>;

    /// Replaces existing workflow state, resetting the TTL.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Missing`] when no entry exists.
    fn update(&self, workflow_id: &WorkflowId, state: &WorkflowState) -> Result<(), CacheError>;

    /// Deletes the workflow state.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError`] when the delete fails.
    fn delete(&self, workflow_id: &WorkflowId) -> Result<(), CacheError>;

    /// Extends the TTL without changing the state.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Missing`] when no entry exists.
    fn extend(&self, workflow_id: &WorkflowId) -> Result<(), CacheError>;
}

// ============================================================================
// SECTION: Embedder
// ============================================================================

/// Embedding collaborator errors.
#[derive(Debug, Error)]
pub enum EmbedError {
    /// The embedding model reported an error.
    #[error("embedding error: {0}")]
    Model(String),
}

/// Opaque embedding model collaborator.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embeds text into the fixed-dimension unit vector space.
    ///
    /// # Errors
    ///
    /// Returns [`EmbedError`] when the model call fails.
    async fn embed(&self, text: &str) -> Result<Embedding, EmbedError>;
}

// ============================================================================
// SECTION: Sandbox Worker
// ============================================================================

/// Request dispatched to the sandboxed code-execution worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxRequest {
    /// Code to execute.
    pub code: String,
    /// Materialized bindings visible to the code.
    pub bindings: BTreeMap<String, Value>,
    /// Permission set granted to the execution.
    pub permission_set: PermissionSet,
    /// Execution timeout in milliseconds.
    pub timeout_ms: u64,
}

/// Result returned by the sandbox worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxResult {
    /// Execution result value.
    pub result: Value,
    /// Raw trace payloads captured inside the sandbox.
    #[serde(default)]
    pub traces: Vec<Value>,
}

/// Sandbox collaborator errors, classified downstream by message pattern.
#[derive(Debug, Error)]
pub enum SandboxError {
    /// The execution exceeded its timeout.
    #[error("sandbox execution timed out")]
    Timeout,
    /// The execution was denied by a permission boundary.
    #[error("sandbox permission denied: {0}")]
    Denied(String),
    /// The execution failed.
    #[error("sandbox execution failed: {0}")]
    Failed(String),
}

/// Opaque sandboxed code-execution collaborator.
#[async_trait]
pub trait SandboxWorker: Send + Sync {
    /// Runs code inside the sandbox with the provided bindings.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError`] when the execution fails.
    async fn run(&self, request: SandboxRequest) -> Result<SandboxResult, SandboxError>;
}

// ============================================================================
// SECTION: Tool Invoker
// ============================================================================

/// Tool invocation errors, classified downstream by message pattern.
#[derive(Debug, Error)]
pub enum InvokeError {
    /// The tool is not reachable from this gateway.
    #[error("tool unavailable: {0}")]
    Unavailable(String),
    /// The invocation was denied by a permission boundary.
    #[error("tool permission denied: {0}")]
    Denied(String),
    /// The invocation timed out.
    #[error("tool invocation timed out")]
    Timeout,
    /// The invocation failed.
    #[error("tool invocation failed: {0}")]
    Failed(String),
}

/// Downstream MCP tool invoker collaborator.
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    /// Invokes a downstream tool with materialized arguments.
    ///
    /// # Errors
    ///
    /// Returns [`InvokeError`] when the invocation fails.
    async fn invoke(
        &self,
        tool: &ToolId,
        arguments: &Value,
        permission_set: PermissionSet,
    ) -> Result<Value, InvokeError>;

    /// Returns true when the tool is reachable from this gateway.
    fn available(&self, tool: &ToolId) -> bool;
}

// ============================================================================
// SECTION: Event Publisher
// ============================================================================

/// Non-blocking event publication surface.
///
/// Publication never fails and never blocks; slow subscribers shed load
/// inside the bus implementation.
pub trait EventPublisher: Send + Sync {
    /// Publishes an event to all subscribers.
    fn publish(&self, event: GatewayEvent);
}

/// Event publisher that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPublisher;

impl EventPublisher for NoopPublisher {
    fn publish(&self, _event: GatewayEvent) {}
}

// ============================================================================
// SECTION: Trace Recorder
// ============================================================================

/// Non-blocking trace recording surface backed by the buffered sink.
pub trait TraceRecorder: Send + Sync {
    /// Records an execution trace.
    fn record_execution(&self, trace: ExecutionTrace);

    /// Records an algorithm trace.
    fn record_algorithm(&self, trace: AlgorithmTrace);
}

/// Trace recorder that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRecorder;

impl TraceRecorder for NoopRecorder {
    fn record_execution(&self, _trace: ExecutionTrace) {}

    fn record_algorithm(&self, _trace: AlgorithmTrace) {}
}

// ============================================================================
// SECTION: Speculation Predictor
// ============================================================================

/// External confidence predictor for speculative execution.
pub trait SpeculationPredictor: Send + Sync {
    /// Returns the confidence, in `[0, 1]`, that the task will become ready
    /// with the provided guard outcome.
    fn confidence(&self, workflow_id: &WorkflowId, task: &Task, outcome: &str) -> f64;

    /// Returns predicted resolved arguments for a task whose inputs are not
    /// yet available. The speculation cache keys on the fingerprint of these
    /// arguments, so a wrong prediction is discarded, never consumed.
    fn predicted_arguments(&self, _workflow_id: &WorkflowId, _task: &Task) -> Option<Value> {
        None
    }
}

/// Predictor that never speculates.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoSpeculation;

impl SpeculationPredictor for NoSpeculation {
    fn confidence(&self, _workflow_id: &WorkflowId, _task: &Task, _outcome: &str) -> f64 {
        0.0
    }
}
