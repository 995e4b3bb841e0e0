// pml-core/src/runtime/executor.rs
// ============================================================================
// Module: Controlled DAG Executor
// Description: Scheduler with concurrency, checkpoints, approval, and replan.
// Purpose: Execute validated DAGs deterministically with captured failures.
// Dependencies: crate::core, crate::interfaces, crate::runtime, tokio
// ============================================================================

//! ## Overview
//! One scheduler instance runs per in-flight workflow. The main step is
//! "receive next completion or cancel signal": task completions arrive on a
//! single channel and are applied in arrival order with monotonically
//! increasing sequence numbers, so parallel tasks finishing out of dependency
//! order cannot produce inconsistent state. Task errors are captured as
//! failed results and enter the failure policy tree; they never unwind.
//! Approval gates suspend the workflow behind a checkpoint; `resume` picks it
//! back up across stateless request boundaries.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use std::time::Instant;

use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::watch;

use crate::core::dag::Dag;
use crate::core::dag::DagError;
use crate::core::dag::EdgeKind;
use crate::core::events::GatewayEvent;
use crate::core::failure::TaskErrorKind;
use crate::core::failure::classify_error;
use crate::core::hashing::HashDigest;
use crate::core::hashing::HashError;
use crate::core::identifiers::CheckpointId;
use crate::core::identifiers::TaskId;
use crate::core::identifiers::UserId;
use crate::core::identifiers::WorkflowId;
use crate::core::structure::StaticStructure;
use crate::core::task::PermissionSet;
use crate::core::task::Task;
use crate::core::task::TaskKind;
use crate::core::time::Timestamp;
use crate::core::trace::DecisionRecord;
use crate::core::trace::TaskResultRecord;
use crate::core::workflow::Checkpoint;
use crate::core::workflow::ExecutionSnapshot;
use crate::core::workflow::WorkflowError;
use crate::core::workflow::WorkflowState;
use crate::core::workflow::WorkflowStatus;
use crate::core::workflow::transition;
use crate::interfaces::CacheError;
use crate::interfaces::CheckpointStore;
use crate::interfaces::EventPublisher;
use crate::interfaces::InvokeError;
use crate::interfaces::SandboxError;
use crate::interfaces::SandboxRequest;
use crate::interfaces::SandboxWorker;
use crate::interfaces::SpeculationPredictor;
use crate::interfaces::StoreError;
use crate::interfaces::ToolInvoker;
use crate::interfaces::WorkflowCache;
use crate::runtime::resolve::ResolveContext;
use crate::runtime::resolve::ResolveError;
use crate::runtime::resolve::argument_fingerprint;
use crate::runtime::resolve::resolve_arguments;
use crate::runtime::speculation::DEFAULT_DANGEROUS_PATTERNS;
use crate::runtime::speculation::SpeculationCache;
use crate::runtime::speculation::SpeculativeOutcome;
use crate::runtime::speculation::is_dangerous;
use crate::structure::evaluate_condition;
use crate::structure::folding::stringify;
use crate::structure::folding::truthy;

// ============================================================================
// SECTION: Configuration
// ============================================================================

/// Executor configuration.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Maximum concurrent task dispatches per workflow.
    pub max_concurrency: usize,
    /// Per-task timeout in milliseconds.
    pub default_task_timeout_ms: u64,
    /// Grace window granted to in-flight tasks after abort.
    pub abort_timeout_ms: u64,
    /// Checkpoints retained per workflow.
    pub checkpoints_per_workflow: usize,
    /// Whether to checkpoint at every completed topological layer.
    pub checkpoint_every_layer: bool,
    /// Confidence threshold above which tasks dispatch speculatively.
    pub speculation_threshold: f64,
    /// Blocklist patterns suppressing speculation (substring, case-insensitive).
    pub dangerous_patterns: Vec<String>,
    /// Whether denied tasks may re-dispatch once at an escalated level.
    pub allow_escalation: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 8,
            default_task_timeout_ms: 30_000,
            abort_timeout_ms: 5_000,
            checkpoints_per_workflow: 5,
            checkpoint_every_layer: false,
            speculation_threshold: 0.85,
            dangerous_patterns: DEFAULT_DANGEROUS_PATTERNS
                .iter()
                .map(ToString::to_string)
                .collect(),
            allow_escalation: false,
        }
    }
}

// ============================================================================
// SECTION: Execution Context and Outcomes
// ============================================================================

/// Caller-supplied execution context.
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    /// External parameters referenced by `{parameter}` arguments.
    pub parameters: BTreeMap<String, Value>,
    /// Literal bindings from the snippet's static structure.
    pub literal_bindings: BTreeMap<String, Value>,
    /// Requesting user.
    pub user_id: UserId,
    /// Intent text, when the run started from an intent.
    pub intent: Option<String>,
}

impl ExecutionContext {
    /// Builds a context carrying the structure's literal bindings.
    #[must_use]
    pub fn for_structure(
        structure: &StaticStructure,
        parameters: BTreeMap<String, Value>,
        user_id: UserId,
    ) -> Self {
        Self {
            parameters,
            literal_bindings: structure.literal_bindings.clone(),
            user_id,
            intent: None,
        }
    }
}

/// Terminal or suspended outcome of an execution request.
#[derive(Debug, Clone)]
pub enum ExecutionOutcome {
    /// The workflow completed; every required task succeeded or recovered.
    Completed {
        /// Result of the final task along the executed path.
        result: Option<Value>,
        /// Per-task records.
        records: Vec<TaskResultRecord>,
        /// Decision outcomes.
        decisions: Vec<DecisionRecord>,
        /// Total duration in milliseconds.
        duration_ms: u64,
    },
    /// A required task failed with no successful alternative.
    Failed {
        /// Dominant error kind.
        error_type: TaskErrorKind,
        /// Per-task records.
        records: Vec<TaskResultRecord>,
        /// Decision outcomes.
        decisions: Vec<DecisionRecord>,
        /// Total duration in milliseconds.
        duration_ms: u64,
    },
    /// The workflow was aborted; completed results are preserved.
    Aborted {
        /// Per-task records.
        records: Vec<TaskResultRecord>,
        /// Decision outcomes.
        decisions: Vec<DecisionRecord>,
        /// Total duration in milliseconds.
        duration_ms: u64,
    },
    /// The workflow suspended at an approval gate.
    ApprovalRequired {
        /// Checkpoint capturing the resumable state.
        checkpoint_id: CheckpointId,
        /// Topological layer of the gated task.
        pending_layer: usize,
        /// Records accumulated up to the gate.
        layer_results: Vec<TaskResultRecord>,
    },
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Executor request-boundary errors.
///
/// Task-level failures never surface here; they are captured in records.
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// DAG validation failed before any dispatch.
    #[error(transparent)]
    Dag(#[from] DagError),
    /// Illegal workflow state transition.
    #[error(transparent)]
    Workflow(#[from] WorkflowError),
    /// Workflow cache failure.
    #[error(transparent)]
    Cache(#[from] CacheError),
    /// Checkpoint store failure.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Argument materialization failed outside task execution.
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    /// Fingerprint hashing failed.
    #[error(transparent)]
    Hash(#[from] HashError),
    /// Replan validation failed.
    #[error("invalid replan: {0}")]
    InvalidReplan(String),
    /// The workflow is unknown to the cache.
    #[error("workflow not found: {0}")]
    NotFound(String),
    /// The completion channel closed unexpectedly.
    #[error("scheduler completion channel closed")]
    ChannelClosed,
}

// ============================================================================
// SECTION: Internal Scheduler State
// ============================================================================

/// Per-task scheduling state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskState {
    /// Not yet dispatched.
    Pending,
    /// Dispatched and in flight.
    Running,
    /// Completed successfully (or recovered via an alternative).
    Completed,
    /// Failed with a captured error.
    Failed,
    /// Skipped: unmatched branch or unreachable downstream.
    Skipped,
}

/// Completion message delivered to the scheduler loop.
struct Completion {
    /// Task identifier.
    task_id: TaskId,
    /// Whether this completion belongs to a speculative dispatch.
    speculative: bool,
    /// Fingerprint of the dispatched arguments.
    fingerprint: HashDigest,
    /// Materialized arguments.
    args: Value,
    /// Captured outcome.
    outcome: Result<Value, (TaskErrorKind, String)>,
    /// Task duration in milliseconds.
    duration_ms: u64,
}

/// Mutable per-run scheduler state.
struct RunCore {
    /// The DAG under execution.
    dag: Dag,
    /// Topological layer per task.
    layers: BTreeMap<TaskId, usize>,
    /// Per-task state.
    statuses: BTreeMap<TaskId, TaskState>,
    /// Materialized results of completed tasks.
    results: BTreeMap<TaskId, Value>,
    /// Per-task records in completion order.
    records: Vec<TaskResultRecord>,
    /// Decision records in resolution order.
    decisions: Vec<DecisionRecord>,
    /// Resolved decision outcomes.
    decision_outcomes: BTreeMap<TaskId, String>,
    /// Human-approved tasks.
    approved: BTreeSet<TaskId>,
    /// Tasks already re-dispatched at an escalated permission level.
    escalated: BTreeMap<TaskId, PermissionSet>,
    /// Tasks recovered through a successful alternative.
    recovered: BTreeSet<TaskId>,
    /// Speculation cache.
    speculation: SpeculationCache,
    /// Tasks with a speculative dispatch in flight.
    speculating: BTreeSet<TaskId>,
    /// Tasks whose speculation was suppressed (event emitted once).
    suppressed: BTreeSet<TaskId>,
    /// Monotonic completion sequence number.
    seq: u64,
    /// Highest fully-checkpointed layer.
    checkpointed_layer: Option<usize>,
}

impl RunCore {
    /// Builds fresh state for a validated DAG.
    fn new(dag: Dag) -> Result<Self, ExecutorError> {
        let layers = dag.layer_index()?;
        let statuses = dag.tasks.iter().map(|task| (task.id.clone(), TaskState::Pending)).collect();
        Ok(Self {
            dag,
            layers,
            statuses,
            results: BTreeMap::new(),
            records: Vec::new(),
            decisions: Vec::new(),
            decision_outcomes: BTreeMap::new(),
            approved: BTreeSet::new(),
            escalated: BTreeMap::new(),
            recovered: BTreeSet::new(),
            speculation: SpeculationCache::new(),
            speculating: BTreeSet::new(),
            suppressed: BTreeSet::new(),
            seq: 0,
            checkpointed_layer: None,
        })
    }

    /// Rebuilds state from a checkpoint snapshot.
    fn from_snapshot(dag: Dag, snapshot: &ExecutionSnapshot) -> Result<Self, ExecutorError> {
        let mut core = Self::new(dag)?;
        for (task_id, result) in &snapshot.results {
            core.statuses.insert(task_id.clone(), TaskState::Completed);
            core.results.insert(task_id.clone(), result.clone());
        }
        for record in &snapshot.task_records {
            if !record.success
                && core.statuses.get(&record.task_id) != Some(&TaskState::Completed)
            {
                core.statuses.insert(record.task_id.clone(), TaskState::Failed);
            }
        }
        core.records = snapshot.task_records.clone();
        for (task_id, outcome) in &snapshot.decision_outcomes {
            core.statuses.insert(task_id.clone(), TaskState::Completed);
            core.decision_outcomes.insert(task_id.clone(), outcome.clone());
            let condition =
                core.dag.task(task_id).and_then(|task| task.condition.clone());
            core.decisions.push(DecisionRecord {
                node_id: task_id.clone(),
                outcome: outcome.clone(),
                condition,
            });
        }
        core.approved = snapshot.approved.clone();
        Ok(core)
    }

    /// Captures the resumable snapshot.
    fn snapshot(&self) -> ExecutionSnapshot {
        let pending = self
            .statuses
            .iter()
            .filter(|(_, state)| matches!(state, TaskState::Pending | TaskState::Running))
            .map(|(id, _)| id.clone())
            .collect();
        ExecutionSnapshot {
            results: self.results.clone(),
            task_records: self.records.clone(),
            decision_outcomes: self.decision_outcomes.clone(),
            approved: self.approved.clone(),
            pending,
        }
    }

    /// Returns the count of in-flight (non-speculative) tasks.
    fn running(&self) -> usize {
        self.statuses.values().filter(|state| **state == TaskState::Running).count()
    }

    /// Returns the count of completed tasks.
    fn completed(&self) -> usize {
        self.statuses.values().filter(|state| **state == TaskState::Completed).count()
    }

    /// Returns the count of pending tasks.
    fn pending(&self) -> usize {
        self.statuses.values().filter(|state| **state == TaskState::Pending).count()
    }

    /// Builds the condition-evaluation environment from completed results.
    fn condition_env(&self, ctx: &ExecutionContext) -> BTreeMap<String, Value> {
        let mut env: BTreeMap<String, Value> = self
            .results
            .iter()
            .map(|(task_id, value)| (task_id.as_str().to_string(), value.clone()))
            .collect();
        for (name, value) in &ctx.literal_bindings {
            env.entry(name.clone()).or_insert_with(|| value.clone());
        }
        for (name, value) in &ctx.parameters {
            env.entry(name.clone()).or_insert_with(|| value.clone());
        }
        let args: serde_json::Map<String, Value> =
            ctx.parameters.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        env.insert("args".to_string(), Value::Object(args.clone()));
        env.insert("params".to_string(), Value::Object(args));
        env
    }
}

// ============================================================================
// SECTION: Executor
// ============================================================================

/// How the scheduler loop ended.
enum LoopEnd {
    /// The workflow reached a terminal status.
    Finished(WorkflowStatus),
    /// The workflow must pause for approval of the given task.
    Approval(TaskId),
}

/// Controlled DAG executor.
pub struct ControlledExecutor {
    /// Executor configuration.
    config: ExecutorConfig,
    /// Sandbox worker collaborator.
    sandbox: Arc<dyn SandboxWorker>,
    /// Downstream tool invoker collaborator.
    invoker: Arc<dyn ToolInvoker>,
    /// Workflow state cache.
    cache: Arc<dyn WorkflowCache>,
    /// Checkpoint store.
    checkpoints: Arc<dyn CheckpointStore>,
    /// Event bus surface.
    publisher: Arc<dyn EventPublisher>,
    /// Speculation confidence predictor.
    predictor: Arc<dyn SpeculationPredictor>,
    /// Cancel flags for in-flight workflows.
    active: Mutex<BTreeMap<String, watch::Sender<bool>>>,
    /// Workflows aborted while suspended.
    aborted: Mutex<BTreeSet<String>>,
}

impl ControlledExecutor {
    /// Creates an executor over the provided interfaces.
    #[must_use]
    pub fn new(
        config: ExecutorConfig,
        sandbox: Arc<dyn SandboxWorker>,
        invoker: Arc<dyn ToolInvoker>,
        cache: Arc<dyn WorkflowCache>,
        checkpoints: Arc<dyn CheckpointStore>,
        publisher: Arc<dyn EventPublisher>,
        predictor: Arc<dyn SpeculationPredictor>,
    ) -> Self {
        Self {
            config,
            sandbox,
            invoker,
            cache,
            checkpoints,
            publisher,
            predictor,
            active: Mutex::new(BTreeMap::new()),
            aborted: Mutex::new(BTreeSet::new()),
        }
    }

    /// Executes a DAG to completion, failure, abort, or an approval gate.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutorError`] on validation, state, or storage failures.
    /// Task-level failures are captured in the outcome instead.
    pub async fn execute(
        &self,
        workflow_id: &WorkflowId,
        dag: Dag,
        ctx: &ExecutionContext,
    ) -> Result<ExecutionOutcome, ExecutorError> {
        dag.validate()?;
        let status = transition(WorkflowStatus::Created, WorkflowStatus::Running)?;
        self.cache.save(
            workflow_id,
            &WorkflowState {
                dag: dag.clone(),
                intent: ctx.intent.clone(),
                created_at: Timestamp::now(),
            },
        )?;
        self.publisher.publish(GatewayEvent::WorkflowStarted {
            workflow_id: workflow_id.clone(),
            intent: ctx.intent.clone(),
        });

        let mut core = RunCore::new(dag)?;
        self.drive(workflow_id, &mut core, ctx, status).await
    }

    /// Resumes a suspended workflow with an approval decision.
    ///
    /// A rejected approval aborts the workflow; the second rejection of an
    /// already-aborted workflow is a no-op returning the aborted outcome.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutorError::NotFound`] when the workflow state expired.
    pub async fn resume(
        &self,
        workflow_id: &WorkflowId,
        approved: bool,
        checkpoint_id: Option<&CheckpointId>,
        ctx: &ExecutionContext,
    ) -> Result<ExecutionOutcome, ExecutorError> {
        if self.is_aborted(workflow_id) {
            return Ok(ExecutionOutcome::Aborted {
                records: Vec::new(),
                decisions: Vec::new(),
                duration_ms: 0,
            });
        }
        let state = self
            .cache
            .get(workflow_id)?
            .ok_or_else(|| ExecutorError::NotFound(workflow_id.to_string()))?;

        let checkpoint = match checkpoint_id {
            Some(id) => self.checkpoints.get(id)?,
            None => self.checkpoints.latest(workflow_id)?,
        };
        let mut core = match checkpoint {
            Some(checkpoint) => RunCore::from_snapshot(state.dag.clone(), &checkpoint.state)?,
            None => RunCore::new(state.dag.clone())?,
        };

        if !approved {
            let status = transition(WorkflowStatus::Paused, WorkflowStatus::Aborted)?;
            self.mark_aborted(workflow_id);
            self.publisher.publish(GatewayEvent::WorkflowAborted {
                workflow_id: workflow_id.clone(),
            });
            debug_assert!(status.is_terminal());
            return Ok(ExecutionOutcome::Aborted {
                records: core.records.clone(),
                decisions: core.decisions.clone(),
                duration_ms: 0,
            });
        }

        // Approve the task the workflow paused on (first blocked in order).
        if let Some(task_id) = self.first_blocked(&core) {
            core.approved.insert(task_id);
        }
        let status = transition(WorkflowStatus::Paused, WorkflowStatus::Running)?;
        self.publisher.publish(GatewayEvent::WorkflowResumed {
            workflow_id: workflow_id.clone(),
        });
        self.drive(workflow_id, &mut core, ctx, status).await
    }

    /// Aborts a workflow. Running workflows receive the cancel signal;
    /// suspended workflows finalize immediately. A second abort is a no-op.
    ///
    /// Returns true when the workflow was known (running, suspended, or
    /// already aborted).
    #[must_use]
    pub fn abort(&self, workflow_id: &WorkflowId) -> bool {
        if self.is_aborted(workflow_id) {
            return true;
        }
        if let Ok(guard) = self.active.lock()
            && let Some(cancel) = guard.get(workflow_id.as_str())
        {
            let _ = cancel.send(true);
            self.mark_aborted(workflow_id);
            return true;
        }
        match self.cache.get(workflow_id) {
            Ok(Some(_)) => {
                self.mark_aborted(workflow_id);
                self.publisher.publish(GatewayEvent::WorkflowAborted {
                    workflow_id: workflow_id.clone(),
                });
                true
            }
            Ok(None) | Err(_) => false,
        }
    }

    /// Swaps the DAG of a suspended workflow.
    ///
    /// The new DAG must validate, and every already-completed task must be
    /// present unchanged (same identifier and tool).
    ///
    /// # Errors
    ///
    /// Returns [`ExecutorError::InvalidReplan`] when completed tasks are
    /// dropped or renumbered, and [`ExecutorError::NotFound`] when the
    /// workflow state expired.
    pub fn replan(&self, workflow_id: &WorkflowId, new_dag: Dag) -> Result<(), ExecutorError> {
        new_dag.validate()?;
        let state = self
            .cache
            .get(workflow_id)?
            .ok_or_else(|| ExecutorError::NotFound(workflow_id.to_string()))?;

        let completed: BTreeSet<TaskId> = self
            .checkpoints
            .latest(workflow_id)?
            .map(|checkpoint| checkpoint.state.results.keys().cloned().collect())
            .unwrap_or_default();
        for task_id in &completed {
            let old_tool = state.dag.task(task_id).map(|task| task.tool.clone());
            let new_tool = new_dag.task(task_id).map(|task| task.tool.clone());
            match (old_tool, new_tool) {
                (Some(old), Some(new)) if old == new => {}
                _ => {
                    return Err(ExecutorError::InvalidReplan(format!(
                        "completed task dropped or renumbered: {task_id}"
                    )));
                }
            }
        }

        self.cache.update(
            workflow_id,
            &WorkflowState {
                dag: new_dag,
                intent: state.intent,
                created_at: state.created_at,
            },
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Scheduler loop
    // ------------------------------------------------------------------

    /// Drives the scheduler loop and finalizes the outcome.
    async fn drive(
        &self,
        workflow_id: &WorkflowId,
        core: &mut RunCore,
        ctx: &ExecutionContext,
        status: WorkflowStatus,
    ) -> Result<ExecutionOutcome, ExecutorError> {
        let started = Instant::now();
        let (cancel_tx, cancel_rx) = watch::channel(false);
        if let Ok(mut guard) = self.active.lock() {
            guard.insert(workflow_id.as_str().to_string(), cancel_tx);
        }

        let end = self.run_loop(workflow_id, core, ctx, &cancel_rx).await;

        if let Ok(mut guard) = self.active.lock() {
            guard.remove(workflow_id.as_str());
        }
        let duration_ms = duration_ms_since(started);

        match end? {
            LoopEnd::Approval(task_id) => {
                let next = transition(status, WorkflowStatus::Paused)?;
                debug_assert!(!next.is_terminal());
                let layer = core.layers.get(&task_id).copied().unwrap_or_default();
                let checkpoint = Checkpoint {
                    id: CheckpointId::generate(),
                    workflow_id: workflow_id.clone(),
                    timestamp: Timestamp::now(),
                    layer,
                    state: core.snapshot(),
                };
                self.checkpoints.save(&checkpoint, self.config.checkpoints_per_workflow)?;
                self.cache.extend(workflow_id)?;
                self.publisher.publish(GatewayEvent::WorkflowPaused {
                    workflow_id: workflow_id.clone(),
                    checkpoint_id: checkpoint.id.clone(),
                    task_id,
                });
                Ok(ExecutionOutcome::ApprovalRequired {
                    checkpoint_id: checkpoint.id,
                    pending_layer: layer,
                    layer_results: core.records.clone(),
                })
            }
            LoopEnd::Finished(final_status) => {
                let next = transition(status, final_status)?;
                self.finalize(workflow_id, core, next, duration_ms)
            }
        }
    }

    /// Produces the terminal outcome and publishes lifecycle events.
    fn finalize(
        &self,
        workflow_id: &WorkflowId,
        core: &RunCore,
        status: WorkflowStatus,
        duration_ms: u64,
    ) -> Result<ExecutionOutcome, ExecutorError> {
        match status {
            WorkflowStatus::Completed => {
                self.cache.delete(workflow_id)?;
                self.publisher.publish(GatewayEvent::WorkflowCompleted {
                    workflow_id: workflow_id.clone(),
                    duration_ms,
                });
                Ok(ExecutionOutcome::Completed {
                    result: final_result(core),
                    records: core.records.clone(),
                    decisions: core.decisions.clone(),
                    duration_ms,
                })
            }
            WorkflowStatus::Failed => {
                self.cache.delete(workflow_id)?;
                let error_type = core
                    .records
                    .iter()
                    .rev()
                    .find_map(|record| record.error_type)
                    .unwrap_or(TaskErrorKind::Unknown);
                self.publisher.publish(GatewayEvent::WorkflowFailed {
                    workflow_id: workflow_id.clone(),
                    error_type: Some(error_type),
                });
                Ok(ExecutionOutcome::Failed {
                    error_type,
                    records: core.records.clone(),
                    decisions: core.decisions.clone(),
                    duration_ms,
                })
            }
            WorkflowStatus::Aborted => {
                self.mark_aborted(workflow_id);
                self.publisher.publish(GatewayEvent::WorkflowAborted {
                    workflow_id: workflow_id.clone(),
                });
                Ok(ExecutionOutcome::Aborted {
                    records: core.records.clone(),
                    decisions: core.decisions.clone(),
                    duration_ms,
                })
            }
            WorkflowStatus::Created | WorkflowStatus::Running | WorkflowStatus::Paused => {
                Err(ExecutorError::Workflow(WorkflowError::InvalidTransition {
                    from: status,
                    to: status,
                }))
            }
        }
    }

    /// The scheduler main loop.
    #[allow(
        clippy::too_many_lines,
        reason = "Maintain a single linear flow for the scheduling step."
    )]
    async fn run_loop(
        &self,
        workflow_id: &WorkflowId,
        core: &mut RunCore,
        ctx: &ExecutionContext,
        cancel_rx: &watch::Receiver<bool>,
    ) -> Result<LoopEnd, ExecutorError> {
        let (tx, mut rx) = mpsc::channel::<Completion>(64);
        let mut cancel = cancel_rx.clone();

        loop {
            if *cancel.borrow() {
                self.drain_grace(core, &mut rx).await;
                return Ok(LoopEnd::Finished(WorkflowStatus::Aborted));
            }

            let progressed = self.mark_skips(core);
            let ready = self.ready_tasks(core);

            // Inline-completable tasks first: decisions, forks, joins, and
            // speculation-cache hits make progress without dispatching.
            let mut inline_progress = progressed;
            let mut dispatched = 0usize;
            for task_id in &ready {
                // Running counts update synchronously on dispatch.
                if core.running() >= self.config.max_concurrency {
                    break;
                }
                let Some(task) = core.dag.task(task_id).cloned() else {
                    continue;
                };
                if self.blocked_on_approval(core, &task) {
                    continue;
                }
                match task.kind {
                    TaskKind::Decision => {
                        self.complete_decision(workflow_id, core, ctx, &task);
                        inline_progress = true;
                    }
                    TaskKind::Fork => {
                        self.complete_inline(workflow_id, core, &task, Value::Null);
                        inline_progress = true;
                    }
                    TaskKind::Join => {
                        let gathered = join_result(core, &task.id);
                        self.complete_inline(workflow_id, core, &task, gathered);
                        inline_progress = true;
                    }
                    TaskKind::ToolCall | TaskKind::CodeExecution | TaskKind::Capability => {
                        if core.speculating.contains(&task.id) {
                            // A speculative dispatch is in flight; its
                            // completion decides consumption or re-run.
                            continue;
                        }
                        let args = resolve_arguments(
                            &task,
                            &ResolveContext {
                                parameters: &ctx.parameters,
                                literal_bindings: &ctx.literal_bindings,
                                results: &core.results,
                            },
                        )?;
                        let fingerprint = argument_fingerprint(&args)?;
                        if let Some(speculated) = core.speculation.consume(&task.id, &fingerprint)
                        {
                            self.publisher.publish(GatewayEvent::SpeculationConsumed {
                                workflow_id: workflow_id.clone(),
                                task_id: task.id.clone(),
                            });
                            self.apply_outcome(
                                workflow_id,
                                core,
                                &task,
                                speculated.args,
                                speculated.result,
                                speculated.duration_ms,
                                true,
                            );
                            inline_progress = true;
                            continue;
                        }
                        core.statuses.insert(task.id.clone(), TaskState::Running);
                        self.publisher.publish(GatewayEvent::TaskStarted {
                            workflow_id: workflow_id.clone(),
                            task_id: task.id.clone(),
                            tool: task.tool.clone(),
                        });
                        self.spawn_dispatch(core, &task, args, fingerprint, false, &tx, &cancel);
                        dispatched += 1;
                    }
                }
            }

            self.spawn_speculations(workflow_id, core, ctx, &tx, &cancel);

            self.publisher.publish(GatewayEvent::WorkflowHeartbeat {
                workflow_id: workflow_id.clone(),
                completed: core.completed(),
                pending: core.pending(),
            });

            if inline_progress || dispatched > 0 {
                continue;
            }

            if core.running() == 0 && core.speculating.is_empty() {
                // Nothing in flight: either an approval gate blocks the
                // front, or the run is finished.
                if let Some(task_id) = self.first_blocked(core) {
                    return Ok(LoopEnd::Approval(task_id));
                }
                let failed = core
                    .statuses
                    .iter()
                    .any(|(id, state)| *state == TaskState::Failed && !core.recovered.contains(id));
                let status =
                    if failed { WorkflowStatus::Failed } else { WorkflowStatus::Completed };
                return Ok(LoopEnd::Finished(status));
            }

            tokio::select! {
                biased;
                changed = cancel.changed() => {
                    if changed.is_ok() && *cancel.borrow() {
                        self.drain_grace(core, &mut rx).await;
                        return Ok(LoopEnd::Finished(WorkflowStatus::Aborted));
                    }
                }
                completion = rx.recv() => {
                    let Some(completion) = completion else {
                        return Err(ExecutorError::ChannelClosed);
                    };
                    self.apply_completion(workflow_id, core, completion);
                    self.checkpoint_layer_if_due(workflow_id, core)?;
                }
            }
        }
    }

    /// Waits out the abort grace window, preserving completed results.
    async fn drain_grace(&self, core: &mut RunCore, rx: &mut mpsc::Receiver<Completion>) {
        let deadline = Duration::from_millis(self.config.abort_timeout_ms);
        let until = Instant::now() + deadline;
        while core.running() > 0 {
            let remaining = until.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match tokio::time::timeout(remaining, rx.recv()).await {
                Ok(Some(completion)) => {
                    if !completion.speculative
                        && let Some(task) = core.dag.task(&completion.task_id).cloned()
                    {
                        self.silent_apply(core, &task, completion);
                    }
                }
                Ok(None) | Err(_) => break,
            }
        }
    }

    /// Applies a completion without lifecycle events (abort drain).
    fn silent_apply(&self, core: &mut RunCore, task: &Task, completion: Completion) {
        core.seq += 1;
        let success = completion.outcome.is_ok();
        let (result, error_type) = match completion.outcome {
            Ok(value) => (Some(value), None),
            Err((kind, _)) => (None, Some(kind)),
        };
        core.statuses.insert(
            task.id.clone(),
            if success { TaskState::Completed } else { TaskState::Failed },
        );
        if let Some(value) = &result {
            core.results.insert(task.id.clone(), value.clone());
        }
        core.records.push(TaskResultRecord {
            task_id: task.id.clone(),
            tool: task.tool.clone(),
            args: completion.args,
            result,
            success,
            duration_ms: completion.duration_ms,
            error_type,
            speculated: false,
        });
    }

    /// Returns ready tasks in deterministic dispatch order (layer, then id).
    fn ready_tasks(&self, core: &RunCore) -> Vec<TaskId> {
        let mut ready: Vec<TaskId> = core
            .statuses
            .iter()
            .filter(|(_, state)| **state == TaskState::Pending)
            .map(|(id, _)| id.clone())
            .filter(|id| self.is_ready(core, id))
            .collect();
        ready.sort_by_key(|id| (core.layers.get(id).copied().unwrap_or_default(), id.clone()));
        ready
    }

    /// Returns true when every predecessor completed and every guard matched.
    fn is_ready(&self, core: &RunCore, task_id: &TaskId) -> bool {
        // Alternative targets wait for their primary to fail.
        for edge in &core.dag.edges {
            if &edge.to == task_id && edge.kind == EdgeKind::Alternative {
                let primary_failed = core.statuses.get(&edge.from) == Some(&TaskState::Failed);
                if !primary_failed {
                    return false;
                }
            }
        }
        for (decision, outcome) in core.dag.guards(task_id) {
            match core.decision_outcomes.get(&decision) {
                Some(resolved) if resolved == &outcome => {}
                _ => return false,
            }
        }
        for pred in core.dag.predecessors(task_id) {
            let satisfied = match core.statuses.get(&pred) {
                Some(TaskState::Completed) => true,
                Some(TaskState::Failed) => core.recovered.contains(&pred),
                _ => false,
            };
            if !satisfied {
                return false;
            }
        }
        true
    }

    /// Marks branch-mismatched and unreachable tasks as skipped.
    ///
    /// Returns true when any task changed state.
    fn mark_skips(&self, core: &mut RunCore) -> bool {
        let mut changed = false;
        loop {
            let mut round = false;
            let pending: Vec<TaskId> = core
                .statuses
                .iter()
                .filter(|(_, state)| **state == TaskState::Pending)
                .map(|(id, _)| id.clone())
                .collect();
            for task_id in pending {
                // Guard resolved to a different outcome: branch not taken.
                let mismatched = core.dag.guards(&task_id).iter().any(|(decision, outcome)| {
                    core.decision_outcomes
                        .get(decision)
                        .is_some_and(|resolved| resolved != outcome)
                });
                // Predecessor skipped, or failed without recovery and
                // without an alternative: downstream unreachable.
                let unreachable = core.dag.predecessors(&task_id).iter().any(|pred| {
                    match core.statuses.get(pred) {
                        Some(TaskState::Skipped) => true,
                        Some(TaskState::Failed) => {
                            !core.recovered.contains(pred)
                                && core.dag.alternatives(pred).is_empty()
                        }
                        _ => false,
                    }
                });
                // An alternative whose primary completed never runs.
                let stale_alternative = core.dag.edges.iter().any(|edge| {
                    edge.to == task_id
                        && edge.kind == EdgeKind::Alternative
                        && core.statuses.get(&edge.from) == Some(&TaskState::Completed)
                });
                if mismatched || unreachable || stale_alternative {
                    core.statuses.insert(task_id, TaskState::Skipped);
                    round = true;
                    changed = true;
                }
            }
            if !round {
                return changed;
            }
        }
    }

    /// Returns true when the task must wait for human approval.
    fn blocked_on_approval(&self, core: &RunCore, task: &Task) -> bool {
        task.requires_approval && !task.is_pure() && !core.approved.contains(&task.id)
    }

    /// Returns the first ready task blocked on approval, in dispatch order.
    fn first_blocked(&self, core: &RunCore) -> Option<TaskId> {
        self.ready_tasks(core).into_iter().find(|id| {
            core.dag.task(id).is_some_and(|task| self.blocked_on_approval(core, task))
        })
    }

    /// Resolves a decision task inline against completed results.
    fn complete_decision(
        &self,
        workflow_id: &WorkflowId,
        core: &mut RunCore,
        ctx: &ExecutionContext,
        task: &Task,
    ) {
        let env = core.condition_env(ctx);
        let evaluated = task.condition.as_deref().and_then(|cond| evaluate_condition(cond, &env));
        let Some(value) = evaluated else {
            core.seq += 1;
            core.statuses.insert(task.id.clone(), TaskState::Failed);
            core.records.push(TaskResultRecord {
                task_id: task.id.clone(),
                tool: task.tool.clone(),
                args: Value::Null,
                result: None,
                success: false,
                duration_ms: 0,
                error_type: Some(TaskErrorKind::Validation),
                speculated: false,
            });
            self.publisher.publish(GatewayEvent::TaskFailed {
                workflow_id: workflow_id.clone(),
                task_id: task.id.clone(),
                tool: task.tool.clone(),
                error_type: TaskErrorKind::Validation,
            });
            return;
        };

        let outgoing: Vec<&str> = core
            .dag
            .edges
            .iter()
            .filter(|edge| edge.from == task.id && edge.kind == EdgeKind::Conditional)
            .filter_map(|edge| edge.outcome.as_deref())
            .collect();
        let outcome = if outgoing.iter().any(|label| label.starts_with("case:")) {
            let label = format!("case:{}", stringify(&value));
            if outgoing.contains(&label.as_str()) {
                label
            } else {
                "default".to_string()
            }
        } else if truthy(&value) {
            "true".to_string()
        } else {
            "false".to_string()
        };

        core.decision_outcomes.insert(task.id.clone(), outcome.clone());
        core.decisions.push(DecisionRecord {
            node_id: task.id.clone(),
            outcome: outcome.clone(),
            condition: task.condition.clone(),
        });
        self.complete_inline(workflow_id, core, task, value);
    }

    /// Completes a task inline (decisions, forks, joins, speculation hits).
    fn complete_inline(
        &self,
        workflow_id: &WorkflowId,
        core: &mut RunCore,
        task: &Task,
        result: Value,
    ) {
        self.apply_outcome(workflow_id, core, task, Value::Null, Ok(result), 0, false);
    }

    /// Applies a completion message from a dispatched task.
    fn apply_completion(&self, workflow_id: &WorkflowId, core: &mut RunCore, done: Completion) {
        let Some(task) = core.dag.task(&done.task_id).cloned() else {
            return;
        };
        if done.speculative {
            core.speculating.remove(&done.task_id);
            core.speculation.store(
                done.task_id,
                done.fingerprint,
                SpeculativeOutcome {
                    result: done.outcome,
                    duration_ms: done.duration_ms,
                    args: done.args,
                },
            );
            return;
        }

        // Permission denials may re-dispatch once at an escalated level.
        if let Err((TaskErrorKind::Permission, _)) = &done.outcome
            && self.config.allow_escalation
            && !core.escalated.contains_key(&done.task_id)
            && let Some(next) = next_permission(task.permission_set)
        {
            core.escalated.insert(done.task_id.clone(), next);
            core.statuses.insert(done.task_id.clone(), TaskState::Pending);
            self.publisher.publish(GatewayEvent::EscalationRequested {
                workflow_id: workflow_id.clone(),
                task_id: done.task_id,
                from: task.permission_set,
                to: next,
            });
            return;
        }

        self.apply_outcome(
            workflow_id,
            core,
            &task,
            done.args,
            done.outcome,
            done.duration_ms,
            false,
        );
    }

    /// Applies a task outcome to the run state and publishes events.
    #[allow(
        clippy::too_many_arguments,
        reason = "Outcome fields map one-to-one onto the record schema."
    )]
    fn apply_outcome(
        &self,
        workflow_id: &WorkflowId,
        core: &mut RunCore,
        task: &Task,
        args: Value,
        outcome: Result<Value, (TaskErrorKind, String)>,
        duration_ms: u64,
        speculated: bool,
    ) {
        core.seq += 1;
        let success = outcome.is_ok();
        let (result, error_type) = match outcome {
            Ok(value) => (Some(value), None),
            Err((kind, _)) => (None, Some(kind)),
        };

        core.statuses.insert(
            task.id.clone(),
            if success { TaskState::Completed } else { TaskState::Failed },
        );
        if let Some(value) = &result {
            core.results.insert(task.id.clone(), value.clone());
            // A successful alternative recovers its failed primary.
            let primaries: Vec<TaskId> = core
                .dag
                .edges
                .iter()
                .filter(|edge| edge.to == task.id && edge.kind == EdgeKind::Alternative)
                .map(|edge| edge.from.clone())
                .collect();
            for primary in primaries {
                if core.statuses.get(&primary) == Some(&TaskState::Failed) {
                    core.recovered.insert(primary.clone());
                    core.results.insert(primary, value.clone());
                }
            }
        }
        core.records.push(TaskResultRecord {
            task_id: task.id.clone(),
            tool: task.tool.clone(),
            args,
            result,
            success,
            duration_ms,
            error_type,
            speculated,
        });

        if success {
            self.publisher.publish(GatewayEvent::TaskCompleted {
                workflow_id: workflow_id.clone(),
                task_id: task.id.clone(),
                tool: task.tool.clone(),
                duration_ms,
                speculated,
            });
        } else if let Some(kind) = error_type {
            self.publisher.publish(GatewayEvent::TaskFailed {
                workflow_id: workflow_id.clone(),
                task_id: task.id.clone(),
                tool: task.tool.clone(),
                error_type: kind,
            });
        }
    }

    /// Spawns speculative dispatches for guarded tasks with confident
    /// predictions, suppressing dangerous tools.
    fn spawn_speculations(
        &self,
        workflow_id: &WorkflowId,
        core: &mut RunCore,
        ctx: &ExecutionContext,
        tx: &mpsc::Sender<Completion>,
        cancel: &watch::Receiver<bool>,
    ) {
        let candidates: Vec<TaskId> = core
            .statuses
            .iter()
            .filter(|(_, state)| **state == TaskState::Pending)
            .map(|(id, _)| id.clone())
            .filter(|id| !core.speculating.contains(id) && !core.speculation.contains(id))
            .filter(|id| self.is_speculation_candidate(core, id))
            .collect();

        for task_id in candidates {
            // Speculative dispatches contend for the same worker budget.
            if core.running() + core.speculating.len() >= self.config.max_concurrency {
                return;
            }
            let Some(task) = core.dag.task(&task_id).cloned() else {
                continue;
            };
            if matches!(task.kind, TaskKind::Decision | TaskKind::Fork | TaskKind::Join) {
                continue;
            }
            let outcome = core
                .dag
                .guards(&task_id)
                .into_iter()
                .map(|(_, outcome)| outcome)
                .next()
                .unwrap_or_default();
            let confidence = self.predictor.confidence(workflow_id, &task, &outcome);
            if confidence <= self.config.speculation_threshold {
                continue;
            }
            if is_dangerous(&task.tool, &self.config.dangerous_patterns) {
                if core.suppressed.insert(task_id.clone()) {
                    self.publisher.publish(GatewayEvent::SpeculationSuppressed {
                        workflow_id: workflow_id.clone(),
                        task_id: task_id.clone(),
                        tool: task.tool.clone(),
                    });
                }
                continue;
            }
            // Arguments resolve now when only a guard is unresolved; a task
            // speculated ahead of its data dependencies needs predicted
            // arguments instead.
            let args = resolve_arguments(
                &task,
                &ResolveContext {
                    parameters: &ctx.parameters,
                    literal_bindings: &ctx.literal_bindings,
                    results: &core.results,
                },
            )
            .ok()
            .or_else(|| self.predictor.predicted_arguments(workflow_id, &task));
            let Some(args) = args else {
                continue;
            };
            let Ok(fingerprint) = argument_fingerprint(&args) else {
                continue;
            };
            core.speculating.insert(task_id);
            self.spawn_dispatch(core, &task, args, fingerprint, true, tx, cancel);
        }
    }

    /// Returns true when a pending task may be speculated: it is not yet
    /// ready because a guard is unresolved or a data dependency is still in
    /// flight, and no failed or skipped predecessor rules it out.
    fn is_speculation_candidate(&self, core: &RunCore, task_id: &TaskId) -> bool {
        if self.is_ready(core, task_id) {
            return false;
        }
        // A guard already resolved against the task will never run it.
        let mismatched = core.dag.guards(task_id).iter().any(|(decision, outcome)| {
            core.decision_outcomes
                .get(decision)
                .is_some_and(|resolved| resolved != outcome)
        });
        if mismatched {
            return false;
        }
        core.dag.predecessors(task_id).iter().all(|pred| {
            !matches!(
                core.statuses.get(pred),
                Some(TaskState::Failed | TaskState::Skipped)
            )
        })
    }

    /// Spawns an external dispatch (sandbox or downstream tool).
    fn spawn_dispatch(
        &self,
        core: &RunCore,
        task: &Task,
        args: Value,
        fingerprint: HashDigest,
        speculative: bool,
        tx: &mpsc::Sender<Completion>,
        cancel: &watch::Receiver<bool>,
    ) {
        let sandbox = Arc::clone(&self.sandbox);
        let invoker = Arc::clone(&self.invoker);
        let tx = tx.clone();
        let mut cancel = cancel.clone();
        let timeout = Duration::from_millis(self.config.default_task_timeout_ms);
        let grace = Duration::from_millis(self.config.abort_timeout_ms);
        let task = task.clone();
        let permission = core.escalated.get(&task.id).copied().unwrap_or(task.permission_set);

        tokio::spawn(async move {
            let started = Instant::now();
            let work = dispatch_task(&*sandbox, &*invoker, &task, &args, permission, timeout);
            let outcome = tokio::select! {
                outcome = work => outcome,
                () = cancelled_then_grace(&mut cancel, grace) => {
                    Err((TaskErrorKind::Unknown, "task aborted".to_string()))
                }
            };
            let _ = tx
                .send(Completion {
                    task_id: task.id.clone(),
                    speculative,
                    fingerprint,
                    args,
                    outcome,
                    duration_ms: duration_ms_since(started),
                })
                .await;
        });
    }

    /// Persists a layer checkpoint when a new layer fully completes.
    fn checkpoint_layer_if_due(
        &self,
        workflow_id: &WorkflowId,
        core: &mut RunCore,
    ) -> Result<(), ExecutorError> {
        if !self.config.checkpoint_every_layer {
            return Ok(());
        }
        let mut highest_complete: Option<usize> = None;
        let max_layer = core.layers.values().copied().max().unwrap_or_default();
        for layer in 0..=max_layer {
            let done = core
                .layers
                .iter()
                .filter(|(_, l)| **l == layer)
                .all(|(id, _)| {
                    matches!(
                        core.statuses.get(id),
                        Some(TaskState::Completed | TaskState::Skipped | TaskState::Failed)
                    )
                });
            if done {
                highest_complete = Some(layer);
            } else {
                break;
            }
        }
        let Some(layer) = highest_complete else {
            return Ok(());
        };
        if core.checkpointed_layer.is_some_and(|previous| previous >= layer) {
            return Ok(());
        }
        let checkpoint = Checkpoint {
            id: CheckpointId::generate(),
            workflow_id: workflow_id.clone(),
            timestamp: Timestamp::now(),
            layer,
            state: core.snapshot(),
        };
        self.checkpoints.save(&checkpoint, self.config.checkpoints_per_workflow)?;
        core.checkpointed_layer = Some(layer);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Abort bookkeeping
    // ------------------------------------------------------------------

    /// Returns true when the workflow was aborted.
    fn is_aborted(&self, workflow_id: &WorkflowId) -> bool {
        self.aborted
            .lock()
            .map(|guard| guard.contains(workflow_id.as_str()))
            .unwrap_or(false)
    }

    /// Records the workflow as aborted.
    fn mark_aborted(&self, workflow_id: &WorkflowId) {
        if let Ok(mut guard) = self.aborted.lock() {
            guard.insert(workflow_id.as_str().to_string());
        }
    }
}

// ============================================================================
// SECTION: Dispatch Helpers
// ============================================================================

/// Runs one external dispatch, capturing the failure classification.
async fn dispatch_task(
    sandbox: &dyn SandboxWorker,
    invoker: &dyn ToolInvoker,
    task: &Task,
    args: &Value,
    permission: PermissionSet,
    timeout: Duration,
) -> Result<Value, (TaskErrorKind, String)> {
    let work = async {
        match task.kind {
            TaskKind::ToolCall => {
                invoker.invoke(&task.tool, args, permission).await.map_err(invoke_error)
            }
            TaskKind::CodeExecution | TaskKind::Capability => {
                let code = task.static_code.clone().unwrap_or_default();
                let bindings = match args {
                    Value::Object(map) => {
                        map.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
                    }
                    other => {
                        let mut map = BTreeMap::new();
                        map.insert("input".to_string(), other.clone());
                        map
                    }
                };
                sandbox
                    .run(SandboxRequest {
                        code,
                        bindings,
                        permission_set: permission,
                        timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                    })
                    .await
                    .map(|result| result.result)
                    .map_err(sandbox_error)
            }
            TaskKind::Decision | TaskKind::Fork | TaskKind::Join => Ok(Value::Null),
        }
    };
    match tokio::time::timeout(timeout, work).await {
        Ok(outcome) => outcome,
        Err(_) => Err((TaskErrorKind::Timeout, "task timed out".to_string())),
    }
}

/// Classifies a sandbox failure.
fn sandbox_error(error: SandboxError) -> (TaskErrorKind, String) {
    match error {
        SandboxError::Timeout => (TaskErrorKind::Timeout, error_text(&error)),
        SandboxError::Denied(_) => (TaskErrorKind::Permission, error_text(&error)),
        SandboxError::Failed(message) => (classify_error(&message), message),
    }
}

/// Classifies an invoker failure.
fn invoke_error(error: InvokeError) -> (TaskErrorKind, String) {
    match error {
        InvokeError::Timeout => (TaskErrorKind::Timeout, error_text(&error)),
        InvokeError::Denied(_) => (TaskErrorKind::Permission, error_text(&error)),
        InvokeError::Unavailable(_) => (TaskErrorKind::NotFound, error_text(&error)),
        InvokeError::Failed(message) => (classify_error(&message), message),
    }
}

/// Renders an error for record capture.
fn error_text(error: &dyn std::error::Error) -> String {
    error.to_string()
}

/// Completes when the cancel flag flips, then waits out the grace window.
async fn cancelled_then_grace(cancel: &mut watch::Receiver<bool>, grace: Duration) {
    loop {
        if *cancel.borrow() {
            break;
        }
        if cancel.changed().await.is_err() {
            // Cancel source dropped: never fires.
            std::future::pending::<()>().await;
        }
    }
    tokio::time::sleep(grace).await;
}

/// Elapsed milliseconds since an instant.
fn duration_ms_since(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Result of the final task along the executed path (highest layer, then id).
fn final_result(core: &RunCore) -> Option<Value> {
    core.results
        .iter()
        .max_by_key(|(id, _)| (core.layers.get(*id).copied().unwrap_or_default(), (*id).clone()))
        .map(|(_, value)| value.clone())
}

/// Gathers predecessor results for a join task, ordered by task id.
fn join_result(core: &RunCore, join_id: &TaskId) -> Value {
    let preds = core.dag.predecessors(join_id);
    let gathered: Vec<Value> = preds
        .iter()
        .filter_map(|pred| core.results.get(pred).cloned())
        .collect();
    Value::Array(gathered)
}

/// Returns the next rung of the permission ladder.
const fn next_permission(current: PermissionSet) -> Option<PermissionSet> {
    match current {
        PermissionSet::Minimal => Some(PermissionSet::Readonly),
        PermissionSet::Readonly => Some(PermissionSet::Filesystem),
        PermissionSet::Filesystem => Some(PermissionSet::NetworkApi),
        PermissionSet::NetworkApi => Some(PermissionSet::McpStandard),
        PermissionSet::McpStandard => Some(PermissionSet::Trusted),
        PermissionSet::Trusted => None,
    }
}
