// pml-mcp/src/tools.rs
// ============================================================================
// Module: Meta-Tool Router
// Description: Dispatch for discover, execute, abort, continue, and replan.
// Purpose: Route meta-tool calls through the gateway runtime.
// Dependencies: pml-core, pml-providers, jsonschema, serde
// ============================================================================

//! ## Overview
//! The router is the single entry point for the meta-tool surface. Code
//! executes through the structure builder and the controlled executor; intents
//! route through the matcher and suggester; continuations resume suspended
//! workflows. Execution failures stay inside a `status:"success"` envelope
//! with an `error_code`; only meta-call failures (malformed input, storage)
//! surface as tool errors.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use pml_core::CapabilityId;
use pml_core::CapabilityStore;
use pml_core::CheckpointId;
use pml_core::ControlledExecutor;
use pml_core::CorrelationId;
use pml_core::Dag;
use pml_core::DagSuggester;
use pml_core::DependencyGraphStore;
use pml_core::Embedder;
use pml_core::EventPublisher;
use pml_core::ExecutionContext;
use pml_core::ExecutionOutcome;
use pml_core::ExecutionTrace;
use pml_core::ExecutorError;
use pml_core::GatewayEvent;
use pml_core::LearnError;
use pml_core::StaticStructure;
use pml_core::TaskErrorKind;
use pml_core::TaskResultRecord;
use pml_core::ThresholdStore;
use pml_core::Timestamp;
use pml_core::ToolId;
use pml_core::ToolIndex;
use pml_core::TraceId;
use pml_core::TraceRecorder;
use pml_core::UserId;
use pml_core::WorkflowId;
use pml_core::build_structure;
use pml_core::runtime::CapabilityLearner;
use pml_core::runtime::context_hash;
use pml_providers::DownstreamRegistry;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::tooling::ToolName;
use crate::tooling::tool_definitions;

// ============================================================================
// SECTION: Wire Requests
// ============================================================================

/// `discover` request payload.
#[derive(Debug, Deserialize)]
pub struct DiscoverRequest {
    /// Natural-language query.
    pub query: String,
}

/// `execute` options payload.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExecuteOptions {
    /// External parameters for `{parameter}` arguments.
    #[serde(default)]
    pub parameters: BTreeMap<String, Value>,
    /// Tools the connected client can execute locally.
    #[serde(default)]
    pub client_tools: Vec<String>,
    /// Whether non-pure tasks must pause for approval.
    #[serde(default)]
    pub require_approval: bool,
    /// Requesting user.
    #[serde(default)]
    pub user_id: Option<String>,
    /// Correlation identifier propagated into traces.
    #[serde(default)]
    pub correlation_id: Option<String>,
}

/// `execute` request payload.
#[derive(Debug, Default, Deserialize)]
pub struct ExecuteRequest {
    /// Code to execute directly.
    #[serde(default)]
    pub code: Option<String>,
    /// Intent to match or compose.
    #[serde(default)]
    pub intent: Option<String>,
    /// Workflow to resume.
    #[serde(default)]
    pub continue_workflow: Option<String>,
    /// Execution options.
    #[serde(default)]
    pub options: Option<ExecuteOptions>,
}

/// `abort` request payload.
#[derive(Debug, Deserialize)]
pub struct AbortRequest {
    /// Workflow identifier.
    pub workflow_id: String,
}

/// `continue` request payload.
#[derive(Debug, Deserialize)]
pub struct ContinueRequest {
    /// Workflow identifier.
    pub workflow_id: String,
    /// Approval decision.
    pub approved: bool,
    /// Checkpoint to resume from (defaults to the latest).
    #[serde(default)]
    pub checkpoint_id: Option<String>,
    /// Execution options.
    #[serde(default)]
    pub options: Option<ExecuteOptions>,
}

/// `replan` request payload.
#[derive(Debug, Deserialize)]
pub struct ReplanRequest {
    /// Workflow identifier.
    pub workflow_id: String,
    /// Replacement DAG.
    pub new_dag: Dag,
}

// ============================================================================
// SECTION: Wire Responses
// ============================================================================

/// Suggestion payload inside the `suggestions` envelope.
#[derive(Debug, Serialize)]
pub struct SuggestionsPayload {
    /// Suggested DAG, present whenever confidence is positive.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_dag: Option<Dag>,
    /// Suggestion confidence, in `[0, 1]`.
    pub confidence: f64,
}

/// `execute` response envelope.
#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecuteResponse {
    /// The meta call succeeded (the execution itself may still have failed;
    /// see `error_code`).
    Success {
        /// Final result value, when the execution completed.
        result: Option<Value>,
        /// Learned or executed capability identifier.
        #[serde(skip_serializing_if = "Option::is_none")]
        capability_id: Option<String>,
        /// Learned or executed capability name.
        #[serde(skip_serializing_if = "Option::is_none")]
        capability_fqdn: Option<String>,
        /// Failure code when the execution failed.
        #[serde(skip_serializing_if = "Option::is_none")]
        error_code: Option<String>,
        /// Failure detail when the execution failed.
        #[serde(skip_serializing_if = "Option::is_none")]
        error_message: Option<String>,
        /// Wall-clock execution time in milliseconds.
        execution_time_ms: u64,
        /// Executed DAG, when one was built.
        #[serde(skip_serializing_if = "Option::is_none")]
        dag: Option<Dag>,
    },
    /// No acceptable match; the caller receives suggestions.
    Suggestions {
        /// Suggestion payload.
        suggestions: SuggestionsPayload,
        /// Wall-clock execution time in milliseconds.
        execution_time_ms: u64,
    },
    /// The workflow paused at an approval gate.
    ApprovalRequired {
        /// Workflow identifier.
        workflow_id: String,
        /// Checkpoint capturing the resumable state.
        checkpoint_id: String,
        /// Topological layer of the gated task.
        pending_layer: usize,
        /// Records accumulated up to the gate.
        layer_results: Vec<TaskResultRecord>,
        /// Wall-clock execution time in milliseconds.
        execution_time_ms: u64,
    },
    /// The DAG needs client-side tools; the client executes it locally.
    ExecuteLocally {
        /// Original code snippet.
        code: String,
        /// Every tool the DAG references.
        tools_used: Vec<String>,
        /// Tools only the client can execute.
        client_tools: Vec<String>,
        /// The built DAG.
        dag: Dag,
        /// Wall-clock execution time in milliseconds.
        execution_time_ms: u64,
    },
}

/// `discover` response payload.
#[derive(Debug, Serialize)]
pub struct DiscoverResponse {
    /// Ranked downstream tools.
    pub tools: Vec<DiscoveredTool>,
    /// Ranked capabilities.
    pub capabilities: Vec<DiscoveredCapability>,
    /// Ranking metadata.
    pub meta: DiscoverMeta,
}

/// One discovered tool.
#[derive(Debug, Serialize)]
pub struct DiscoveredTool {
    /// Qualified tool name.
    pub name: String,
    /// Tool description.
    pub description: String,
    /// Similarity score.
    pub score: f64,
}

/// One discovered capability.
#[derive(Debug, Serialize)]
pub struct DiscoveredCapability {
    /// Capability identifier.
    pub id: String,
    /// Fully-qualified name.
    pub fqdn: String,
    /// Similarity score.
    pub score: f64,
    /// Success rate.
    pub success_rate: f64,
    /// Usage count.
    pub usage_count: u64,
}

/// Ranking metadata for `discover`.
#[derive(Debug, Serialize)]
pub struct DiscoverMeta {
    /// Current semantic/graph mixing weight.
    pub alpha: f64,
    /// Dependency graph edge count.
    pub edge_count: usize,
}

/// `abort` response payload.
#[derive(Debug, Serialize)]
pub struct AbortResponse {
    /// Whether the workflow is aborted after this call.
    pub aborted: bool,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Meta-call failures (surfaced as JSON-RPC errors).
#[derive(Debug, Error)]
pub enum ToolError {
    /// Tool input failed schema validation.
    #[error("invalid tool input: {0}")]
    InvalidInput(String),
    /// The tool name is not part of the meta-tool surface.
    #[error("unknown tool: {0}")]
    UnknownTool(String),
    /// Internal failure handling the call.
    #[error("internal error: {0}")]
    Internal(String),
}

// ============================================================================
// SECTION: Router
// ============================================================================

/// Meta-tool router over the gateway runtime.
pub struct MetaToolRouter {
    /// Controlled executor.
    executor: Arc<ControlledExecutor>,
    /// Intent suggester.
    suggester: Arc<DagSuggester>,
    /// Capability learner.
    learner: Arc<CapabilityLearner>,
    /// Capability storage.
    capabilities: Arc<dyn CapabilityStore>,
    /// Semantic tool index.
    tools: Arc<dyn ToolIndex>,
    /// Dependency graph store.
    graph: Arc<dyn DependencyGraphStore>,
    /// Adaptive threshold map.
    thresholds: Arc<dyn ThresholdStore>,
    /// Embedding collaborator.
    embedder: Arc<dyn Embedder>,
    /// Trace sink surface.
    recorder: Arc<dyn TraceRecorder>,
    /// Event bus surface.
    publisher: Arc<dyn EventPublisher>,
    /// Downstream registry for hybrid routing.
    registry: DownstreamRegistry,
    /// Compiled input validators per tool.
    validators: BTreeMap<&'static str, jsonschema::Validator>,
}

impl MetaToolRouter {
    /// Creates a router over the provided runtime components.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::Internal`] when a tool schema fails to compile.
    #[allow(
        clippy::too_many_arguments,
        reason = "The router is the composition point for the runtime surface."
    )]
    pub fn new(
        executor: Arc<ControlledExecutor>,
        suggester: Arc<DagSuggester>,
        learner: Arc<CapabilityLearner>,
        capabilities: Arc<dyn CapabilityStore>,
        tools: Arc<dyn ToolIndex>,
        graph: Arc<dyn DependencyGraphStore>,
        thresholds: Arc<dyn ThresholdStore>,
        embedder: Arc<dyn Embedder>,
        recorder: Arc<dyn TraceRecorder>,
        publisher: Arc<dyn EventPublisher>,
        registry: DownstreamRegistry,
    ) -> Result<Self, ToolError> {
        let mut validators = BTreeMap::new();
        for definition in tool_definitions() {
            let validator = jsonschema::validator_for(&definition.input_schema)
                .map_err(|err| ToolError::Internal(err.to_string()))?;
            validators.insert(definition.name, validator);
        }
        Ok(Self {
            executor,
            suggester,
            learner,
            capabilities,
            tools,
            graph,
            thresholds,
            embedder,
            recorder,
            publisher,
            registry,
            validators,
        })
    }

    /// Dispatches one meta-tool call.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError`] when the input is invalid or handling fails
    /// internally; execution failures stay inside the response envelope.
    pub async fn handle_tool_call(
        &self,
        name: &str,
        arguments: Value,
    ) -> Result<Value, ToolError> {
        let tool = ToolName::parse(name).ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;
        if let Some(validator) = self.validators.get(tool.as_str())
            && let Err(error) = validator.validate(&arguments)
        {
            return Err(ToolError::InvalidInput(error.to_string()));
        }

        let response = match tool {
            ToolName::Discover => {
                let request: DiscoverRequest = parse_input(arguments)?;
                serialize_output(&self.discover(&request).await?)
            }
            ToolName::Execute => {
                let request: ExecuteRequest = parse_input(arguments)?;
                serialize_output(&self.execute(request).await?)
            }
            ToolName::Abort => {
                let request: AbortRequest = parse_input(arguments)?;
                serialize_output(&self.abort(&request))
            }
            ToolName::Continue => {
                let request: ContinueRequest = parse_input(arguments)?;
                serialize_output(&self.continue_workflow(request).await?)
            }
            ToolName::Replan => {
                let request: ReplanRequest = parse_input(arguments)?;
                serialize_output(&self.replan(request).await?)
            }
        };
        response
    }

    // ------------------------------------------------------------------
    // discover
    // ------------------------------------------------------------------

    /// Hybrid search over tools and capabilities.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::Internal`] when embedding or store access fails.
    pub async fn discover(&self, request: &DiscoverRequest) -> Result<DiscoverResponse, ToolError> {
        let query = self
            .embedder
            .embed(&request.query)
            .await
            .map_err(|err| ToolError::Internal(err.to_string()))?;
        let tools = self
            .tools
            .search_tools(&query, 10)
            .map_err(|err| ToolError::Internal(err.to_string()))?
            .into_iter()
            .map(|hit| DiscoveredTool {
                name: hit.tool.to_string(),
                description: hit.description,
                score: hit.score,
            })
            .collect();
        let capabilities = self
            .capabilities
            .search_by_intent(&query, 10)
            .map_err(|err| ToolError::Internal(err.to_string()))?
            .into_iter()
            .map(|(capability, score)| DiscoveredCapability {
                id: capability.id.to_string(),
                fqdn: capability.fqdn.to_string(),
                score,
                success_rate: capability.stats.success_rate,
                usage_count: capability.stats.usage_count,
            })
            .collect();

        let nodes = self
            .graph
            .node_count()
            .map_err(|err| ToolError::Internal(err.to_string()))?;
        let edges = self
            .graph
            .edge_count()
            .map_err(|err| ToolError::Internal(err.to_string()))?;
        #[allow(
            clippy::cast_precision_loss,
            reason = "Graph sizes stay far below the f64 integer range."
        )]
        let density = if nodes < 2 {
            0.0
        } else {
            (edges as f64 / (nodes as f64 * (nodes as f64 - 1.0))).clamp(0.0, 1.0)
        };
        let alpha = if density == 0.0 { 1.0 } else { (1.0 - 2.0 * density).max(0.5) };

        Ok(DiscoverResponse {
            tools,
            capabilities,
            meta: DiscoverMeta {
                alpha,
                edge_count: edges,
            },
        })
    }

    // ------------------------------------------------------------------
    // execute
    // ------------------------------------------------------------------

    /// Routes an `execute` request by payload shape.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError`] on internal failures only.
    pub async fn execute(&self, request: ExecuteRequest) -> Result<ExecuteResponse, ToolError> {
        let started = Instant::now();
        let options = request.options.clone().unwrap_or_default();

        if let Some(workflow_id) = request.continue_workflow {
            return self.resume_workflow(&WorkflowId::new(workflow_id), true, None, &options).await;
        }
        if let Some(code) = request.code {
            if code.trim().is_empty() {
                return Ok(error_envelope("EMPTY_CODE", "code must not be empty", started));
            }
            return self.execute_code(&code, request.intent.as_deref(), &options, started).await;
        }
        if let Some(intent) = request.intent {
            return self.execute_intent(&intent, &options, started).await;
        }
        Ok(error_envelope("EMPTY_CODE", "nothing to execute", started))
    }

    /// Executes a code snippet through the structure builder and executor.
    async fn execute_code(
        &self,
        code: &str,
        intent: Option<&str>,
        options: &ExecuteOptions,
        started: Instant,
    ) -> Result<ExecuteResponse, ToolError> {
        let structure = match build_structure(code) {
            Ok(structure) => structure,
            Err(error) => {
                return Ok(error_envelope("VALIDATION", &error.to_string(), started));
            }
        };
        let mut dag = structure.to_dag();
        if options.require_approval {
            for task in &mut dag.tasks {
                if !task.is_pure() {
                    task.requires_approval = true;
                }
            }
        }

        // Hybrid routing: the client runs DAGs that need client-only tools.
        let tools_used: Vec<String> = dag
            .tools()
            .iter()
            .filter(|tool| !tool.is_pseudo())
            .map(ToString::to_string)
            .collect();
        let unavailable: Vec<String> = tools_used
            .iter()
            .filter(|name| {
                let tool = ToolId::new((*name).clone());
                !self.registry.is_server_tool(&tool)
            })
            .cloned()
            .collect();
        if !unavailable.is_empty() {
            let declared: Vec<String> = unavailable
                .iter()
                .filter(|name| options.client_tools.contains(*name))
                .cloned()
                .collect();
            if declared.len() == unavailable.len() {
                return Ok(ExecuteResponse::ExecuteLocally {
                    code: code.to_string(),
                    tools_used,
                    client_tools: unavailable,
                    dag,
                    execution_time_ms: elapsed_ms(started),
                });
            }
            if unavailable.iter().any(|name| {
                self.registry.is_client_tool(&ToolId::new(name.clone()))
            }) {
                return Ok(error_envelope(
                    "CLIENT_TOOLS_REQUIRE_PACKAGE",
                    "client-side tools must be declared in options.client_tools",
                    started,
                ));
            }
        }

        let workflow_id = WorkflowId::generate();
        let ctx = ExecutionContext {
            parameters: options.parameters.clone(),
            literal_bindings: structure.literal_bindings.clone(),
            user_id: user_of(options),
            intent: intent.map(ToString::to_string),
        };
        let outcome = self.executor.execute(&workflow_id, dag.clone(), &ctx).await;
        self.finish_execution(
            &workflow_id,
            outcome,
            Some((code, &structure)),
            intent,
            None,
            options,
            Some(dag),
            started,
        )
        .await
    }

    /// Executes an intent: an accepted capability match executes directly;
    /// otherwise the caller receives suggestions.
    async fn execute_intent(
        &self,
        intent: &str,
        options: &ExecuteOptions,
        started: Instant,
    ) -> Result<ExecuteResponse, ToolError> {
        let correlation = options.correlation_id.clone().map(CorrelationId::new);
        let suggestion = self
            .suggester
            .suggest(intent, &[], &options.parameters, correlation)
            .await
            .map_err(|err| ToolError::Internal(err.to_string()))?;

        match (suggestion.capability, suggestion.dag) {
            (Some(capability), Some(dag)) => {
                let workflow_id = WorkflowId::generate();
                let ctx = ExecutionContext {
                    parameters: options.parameters.clone(),
                    literal_bindings: BTreeMap::new(),
                    user_id: user_of(options),
                    intent: Some(intent.to_string()),
                };
                let outcome = self.executor.execute(&workflow_id, dag.clone(), &ctx).await;
                self.finish_execution(
                    &workflow_id,
                    outcome,
                    None,
                    Some(intent),
                    Some(capability.id.clone()),
                    options,
                    Some(dag),
                    started,
                )
                .await
            }
            (None, dag) => Ok(ExecuteResponse::Suggestions {
                suggestions: SuggestionsPayload {
                    suggested_dag: dag,
                    confidence: suggestion.confidence,
                },
                execution_time_ms: elapsed_ms(started),
            }),
            (Some(_), None) => Err(ToolError::Internal(
                "matched capability produced no dag".to_string(),
            )),
        }
    }

    /// Maps an executor outcome into the wire envelope, recording traces,
    /// graph observations, and eager learning.
    #[allow(
        clippy::too_many_arguments,
        clippy::too_many_lines,
        reason = "Envelope assembly maps one-to-one onto the response schema."
    )]
    async fn finish_execution(
        &self,
        workflow_id: &WorkflowId,
        outcome: Result<ExecutionOutcome, ExecutorError>,
        source: Option<(&str, &StaticStructure)>,
        intent: Option<&str>,
        capability_id: Option<CapabilityId>,
        options: &ExecuteOptions,
        dag: Option<Dag>,
        started: Instant,
    ) -> Result<ExecuteResponse, ToolError> {
        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(error) => return Ok(executor_error_envelope(&error, started)),
        };

        match outcome {
            ExecutionOutcome::Completed {
                result,
                records,
                decisions,
                duration_ms,
            } => {
                self.observe_path(&records);
                let mut learned_id = capability_id.clone().map(|id| id.to_string());
                let mut learned_fqdn = None;

                if let Some(id) = &capability_id {
                    // Capability invocation: fold the outcome into its stats.
                    let _ = self.capabilities.record_use(id, true, duration_ms, Timestamp::now());
                    if let Ok(Some(capability)) = self.capabilities.get(id) {
                        learned_fqdn = Some(capability.fqdn.to_string());
                        let tools: Vec<ToolId> =
                            dag.as_ref().map(Dag::tools).unwrap_or_default();
                        let hash = context_hash(&tools);
                        let keys: Vec<String> =
                            tools.iter().map(ToString::to_string).collect();
                        let _ = self.thresholds.record_outcome(&hash, &keys, true);
                    }
                } else if let Some((code, _)) = source {
                    // Eager learning: first successful run of new code.
                    let learn_intent = intent.unwrap_or(code);
                    match self
                        .learner
                        .save(code, learn_intent, &user_of(options), duration_ms)
                        .await
                    {
                        Ok(saved) => {
                            if let Ok(Some(capability)) = self.capabilities.get(&saved.capability_id)
                            {
                                learned_fqdn = Some(capability.fqdn.to_string());
                            }
                            learned_id = Some(saved.capability_id.to_string());
                        }
                        Err(LearnError::Conflict(message)) => {
                            return Err(ToolError::Internal(format!(
                                "capability hash conflict: {message}"
                            )));
                        }
                        Err(_) => {}
                    }
                }

                self.record_trace(
                    intent,
                    capability_id.as_ref(),
                    &records,
                    &decisions,
                    true,
                    duration_ms,
                    None,
                    options,
                )
                .await;
                Ok(ExecuteResponse::Success {
                    result,
                    capability_id: learned_id,
                    capability_fqdn: learned_fqdn,
                    error_code: None,
                    error_message: None,
                    execution_time_ms: elapsed_ms(started),
                    dag,
                })
            }
            ExecutionOutcome::Failed {
                error_type,
                records,
                decisions,
                duration_ms,
            } => {
                if let Some(id) = &capability_id {
                    let _ = self.capabilities.record_use(id, false, duration_ms, Timestamp::now());
                    let tools: Vec<ToolId> = dag.as_ref().map(Dag::tools).unwrap_or_default();
                    let hash = context_hash(&tools);
                    let keys: Vec<String> = tools.iter().map(ToString::to_string).collect();
                    let _ = self.thresholds.record_outcome(&hash, &keys, false);
                }
                self.record_trace(
                    intent,
                    capability_id.as_ref(),
                    &records,
                    &decisions,
                    false,
                    duration_ms,
                    Some(error_type),
                    options,
                )
                .await;
                Ok(ExecuteResponse::Success {
                    result: None,
                    capability_id: capability_id.map(|id| id.to_string()),
                    capability_fqdn: None,
                    error_code: Some(error_type.as_code().to_string()),
                    error_message: records
                        .iter()
                        .rev()
                        .find(|record| !record.success)
                        .map(|record| format!("task {} failed", record.task_id)),
                    execution_time_ms: elapsed_ms(started),
                    dag,
                })
            }
            ExecutionOutcome::Aborted {
                records,
                decisions,
                duration_ms,
            } => {
                self.record_trace(
                    intent,
                    capability_id.as_ref(),
                    &records,
                    &decisions,
                    false,
                    duration_ms,
                    None,
                    options,
                )
                .await;
                Ok(ExecuteResponse::Success {
                    result: None,
                    capability_id: None,
                    capability_fqdn: None,
                    error_code: None,
                    error_message: None,
                    execution_time_ms: elapsed_ms(started),
                    dag,
                })
            }
            ExecutionOutcome::ApprovalRequired {
                checkpoint_id,
                pending_layer,
                layer_results,
            } => Ok(ExecuteResponse::ApprovalRequired {
                workflow_id: workflow_id.to_string(),
                checkpoint_id: checkpoint_id.to_string(),
                pending_layer,
                layer_results,
                execution_time_ms: elapsed_ms(started),
            }),
        }
    }

    // ------------------------------------------------------------------
    // abort / continue / replan
    // ------------------------------------------------------------------

    /// Aborts a workflow; the second call is a no-op.
    #[must_use]
    pub fn abort(&self, request: &AbortRequest) -> AbortResponse {
        let workflow_id = WorkflowId::new(request.workflow_id.clone());
        AbortResponse {
            aborted: self.executor.abort(&workflow_id),
        }
    }

    /// Resumes an approval-paused workflow with a decision.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError`] on internal failures only.
    pub async fn continue_workflow(
        &self,
        request: ContinueRequest,
    ) -> Result<ExecuteResponse, ToolError> {
        let options = request.options.unwrap_or_default();
        let checkpoint_id = request.checkpoint_id.map(CheckpointId::new);
        self.resume_workflow(
            &WorkflowId::new(request.workflow_id),
            request.approved,
            checkpoint_id,
            &options,
        )
        .await
    }

    /// Shared resume path for `continue` and `execute{continue_workflow}`.
    async fn resume_workflow(
        &self,
        workflow_id: &WorkflowId,
        approved: bool,
        checkpoint_id: Option<CheckpointId>,
        options: &ExecuteOptions,
    ) -> Result<ExecuteResponse, ToolError> {
        let started = Instant::now();
        let ctx = ExecutionContext {
            parameters: options.parameters.clone(),
            literal_bindings: BTreeMap::new(),
            user_id: user_of(options),
            intent: None,
        };
        let outcome = self
            .executor
            .resume(workflow_id, approved, checkpoint_id.as_ref(), &ctx)
            .await;
        self.finish_execution(workflow_id, outcome, None, None, None, options, None, started)
            .await
    }

    /// Swaps the DAG of a suspended workflow.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError`] on internal failures only.
    pub async fn replan(&self, request: ReplanRequest) -> Result<ExecuteResponse, ToolError> {
        let started = Instant::now();
        let workflow_id = WorkflowId::new(request.workflow_id);
        match self.executor.replan(&workflow_id, request.new_dag.clone()) {
            Ok(()) => Ok(ExecuteResponse::Success {
                result: None,
                capability_id: None,
                capability_fqdn: None,
                error_code: None,
                error_message: None,
                execution_time_ms: elapsed_ms(started),
                dag: Some(request.new_dag),
            }),
            Err(error) => Ok(executor_error_envelope(&error, started)),
        }
    }

    // ------------------------------------------------------------------
    // Trace and graph bookkeeping
    // ------------------------------------------------------------------

    /// Records observed tool-sequence edges from the executed path.
    fn observe_path(&self, records: &[TaskResultRecord]) {
        let path: Vec<&ToolId> = records
            .iter()
            .filter(|record| record.success && !record.tool.is_pseudo())
            .map(|record| &record.tool)
            .collect();
        for pair in path.windows(2) {
            if pair[0] == pair[1] {
                continue;
            }
            if self.graph.observe_edge(pair[0], pair[1]).is_ok() {
                self.publisher.publish(GatewayEvent::GraphEdgeObserved {
                    from: pair[0].clone(),
                    to: pair[1].clone(),
                });
            }
        }
    }

    /// Records the execution trace through the buffered sink.
    #[allow(
        clippy::too_many_arguments,
        reason = "Trace fields map one-to-one onto the persisted schema."
    )]
    async fn record_trace(
        &self,
        intent: Option<&str>,
        capability_id: Option<&CapabilityId>,
        records: &[TaskResultRecord],
        decisions: &[pml_core::DecisionRecord],
        success: bool,
        duration_ms: u64,
        error_type: Option<TaskErrorKind>,
        options: &ExecuteOptions,
    ) {
        let intent_embedding = match intent {
            Some(text) => self.embedder.embed(text).await.ok(),
            None => None,
        };
        self.recorder.record_execution(ExecutionTrace {
            id: TraceId::generate(),
            capability_id: capability_id.cloned(),
            intent_text: intent.map(ToString::to_string),
            intent_embedding,
            executed_at: Timestamp::now(),
            success,
            duration_ms,
            error_type,
            user_id: user_of(options),
            executed_path: records.iter().map(|record| record.tool.clone()).collect(),
            decisions: decisions.to_vec(),
            task_results: records.to_vec(),
            priority: 0.5,
            parent_trace_id: None,
        });
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Parses a tool input payload.
fn parse_input<T: serde::de::DeserializeOwned>(arguments: Value) -> Result<T, ToolError> {
    serde_json::from_value(arguments).map_err(|err| ToolError::InvalidInput(err.to_string()))
}

/// Serializes a tool output payload.
fn serialize_output<T: Serialize>(payload: &T) -> Result<Value, ToolError> {
    serde_json::to_value(payload).map_err(|err| ToolError::Internal(err.to_string()))
}

/// Resolves the requesting user.
fn user_of(options: &ExecuteOptions) -> UserId {
    options
        .user_id
        .as_deref()
        .map_or_else(|| UserId::new("anonymous"), UserId::new)
}

/// Builds a success envelope carrying an execution error code.
fn error_envelope(code: &str, message: &str, started: Instant) -> ExecuteResponse {
    ExecuteResponse::Success {
        result: None,
        capability_id: None,
        capability_fqdn: None,
        error_code: Some(code.to_string()),
        error_message: Some(message.to_string()),
        execution_time_ms: elapsed_ms(started),
        dag: None,
    }
}

/// Maps a boundary executor error onto the wire error codes.
fn executor_error_envelope(error: &ExecutorError, started: Instant) -> ExecuteResponse {
    let (code, message) = match error {
        ExecutorError::Resolve(resolve) => (resolve.as_code(), resolve.to_string()),
        ExecutorError::NotFound(message) => ("NOT_FOUND", message.clone()),
        ExecutorError::Dag(dag) => ("VALIDATION", dag.to_string()),
        ExecutorError::InvalidReplan(message) => ("VALIDATION", message.clone()),
        ExecutorError::Workflow(workflow) => ("VALIDATION", workflow.to_string()),
        ExecutorError::Cache(cache) => ("NOT_FOUND", cache.to_string()),
        ExecutorError::Store(store) => ("UNKNOWN", store.to_string()),
        ExecutorError::Hash(hash) => ("UNKNOWN", hash.to_string()),
        ExecutorError::ChannelClosed => ("UNKNOWN", error.to_string()),
    };
    error_envelope(code, &message, started)
}

/// Elapsed wall-clock milliseconds since the request started.
fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
