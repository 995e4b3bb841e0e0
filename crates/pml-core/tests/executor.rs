// pml-core/tests/executor.rs
// ============================================================================
// Module: Controlled Executor Tests
// Description: Scheduling, approval, speculation, failure, and replan tests.
// ============================================================================
//! ## Overview
//! Drives the controlled executor against scripted collaborators and checks
//! deterministic ordering, approval gates, speculation fingerprints,
//! failure propagation, and replan validation.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only output and panic-based assertions are permitted."
)]

mod common;

use std::collections::BTreeMap;
use std::sync::Arc;

use common::CollectingPublisher;
use common::EchoSandbox;
use common::ScriptedInvoker;
use common::ScriptedPredictor;
use common::tool_task;
use common::with_argument;
use pml_core::ArgumentValue;
use pml_core::ControlledExecutor;
use pml_core::Dag;
use pml_core::Edge;
use pml_core::EdgeKind;
use pml_core::ExecutionContext;
use pml_core::ExecutionOutcome;
use pml_core::ExecutorConfig;
use pml_core::ExecutorError;
use pml_core::GatewayEvent;
use pml_core::InMemoryCheckpointStore;
use pml_core::InMemoryWorkflowCache;
use pml_core::NoSpeculation;
use pml_core::ResolveError;
use pml_core::SpeculationPredictor;
use pml_core::TaskErrorKind;
use pml_core::TaskId;
use pml_core::UserId;
use pml_core::WorkflowId;
use serde_json::json;

// ============================================================================
// SECTION: Harness
// ============================================================================

/// Builds an executor over scripted collaborators.
fn executor(
    invoker: Arc<ScriptedInvoker>,
    publisher: CollectingPublisher,
    predictor: Arc<dyn SpeculationPredictor>,
    config: ExecutorConfig,
) -> ControlledExecutor {
    ControlledExecutor::new(
        config,
        Arc::new(EchoSandbox::new()),
        invoker,
        Arc::new(InMemoryWorkflowCache::new()),
        Arc::new(InMemoryCheckpointStore::new()),
        Arc::new(publisher),
        predictor,
    )
}

/// Default context with no parameters.
fn ctx() -> ExecutionContext {
    ExecutionContext {
        parameters: BTreeMap::new(),
        literal_bindings: BTreeMap::new(),
        user_id: UserId::new("tester"),
        intent: None,
    }
}

// ============================================================================
// SECTION: Deterministic Scheduling
// ============================================================================

/// With a concurrency cap of one, execution order equals topological layer
/// order with task-id tie-breaks.
#[tokio::test]
async fn test_unit_concurrency_is_sequential_topological_order() {
    let invoker = Arc::new(ScriptedInvoker::new());
    let dag = Dag::new(
        vec![
            tool_task("n1", "svc:one", &[]),
            tool_task("n2", "svc:two", &["n1"]),
            tool_task("n3", "svc:three", &["n1"]),
            tool_task("n4", "svc:four", &["n2", "n3"]),
        ],
        Vec::new(),
    );
    let exec = executor(
        Arc::clone(&invoker),
        CollectingPublisher::new(),
        Arc::new(NoSpeculation),
        ExecutorConfig {
            max_concurrency: 1,
            ..ExecutorConfig::default()
        },
    );

    let outcome = exec.execute(&WorkflowId::new("wf-seq"), dag, &ctx()).await.unwrap();
    assert!(matches!(outcome, ExecutionOutcome::Completed { .. }));
    assert_eq!(invoker.call_log(), vec!["svc:one", "svc:two", "svc:three", "svc:four"]);
}

/// Cycles are rejected before any task dispatches.
#[tokio::test]
async fn test_cycle_rejected_before_dispatch() {
    let invoker = Arc::new(ScriptedInvoker::new());
    let dag = Dag::new(
        vec![tool_task("n1", "svc:a", &["n2"]), tool_task("n2", "svc:b", &["n1"])],
        Vec::new(),
    );
    let exec = executor(
        Arc::clone(&invoker),
        CollectingPublisher::new(),
        Arc::new(NoSpeculation),
        ExecutorConfig::default(),
    );

    let result = exec.execute(&WorkflowId::new("wf-cycle"), dag, &ctx()).await;
    assert!(matches!(result, Err(ExecutorError::Dag(_))));
    assert!(invoker.call_log().is_empty());
}

/// A missing parameter surfaces at the request boundary.
#[tokio::test]
async fn test_missing_parameter_is_boundary_error() {
    let invoker = Arc::new(ScriptedInvoker::new());
    let task = with_argument(
        tool_task("n1", "svc:needs", &[]),
        "path",
        ArgumentValue::parameter("p"),
    );
    let exec = executor(
        Arc::clone(&invoker),
        CollectingPublisher::new(),
        Arc::new(NoSpeculation),
        ExecutorConfig::default(),
    );

    let result =
        exec.execute(&WorkflowId::new("wf-missing"), Dag::new(vec![task], Vec::new()), &ctx()).await;
    assert!(matches!(
        result,
        Err(ExecutorError::Resolve(ResolveError::MissingParameter(name))) if name == "p"
    ));
}

// ============================================================================
// SECTION: Approval Gates
// ============================================================================

/// An approval-flagged task suspends the workflow; rejection aborts it and a
/// second rejection is a no-op returning the aborted outcome.
#[tokio::test]
async fn test_approval_gate_rejection_aborts() {
    let invoker = Arc::new(ScriptedInvoker::new().succeed("email:send", json!({"sent": true})));
    let mut task = tool_task("n1", "email:send", &[]);
    task.requires_approval = true;
    let exec = executor(
        Arc::clone(&invoker),
        CollectingPublisher::new(),
        Arc::new(NoSpeculation),
        ExecutorConfig::default(),
    );
    let workflow_id = WorkflowId::new("wf-approve-reject");

    let outcome =
        exec.execute(&workflow_id, Dag::new(vec![task], Vec::new()), &ctx()).await.unwrap();
    let ExecutionOutcome::ApprovalRequired {
        checkpoint_id,
        pending_layer,
        ..
    } = outcome
    else {
        panic!("expected approval_required");
    };
    assert_eq!(pending_layer, 0);
    assert!(!checkpoint_id.as_str().is_empty());
    assert!(invoker.call_log().is_empty());

    let rejected = exec.resume(&workflow_id, false, None, &ctx()).await.unwrap();
    assert!(matches!(rejected, ExecutionOutcome::Aborted { .. }));

    // Second rejection: no-op, still aborted.
    let again = exec.resume(&workflow_id, false, None, &ctx()).await.unwrap();
    assert!(matches!(again, ExecutionOutcome::Aborted { .. }));
    assert!(invoker.call_log().is_empty());
}

/// Approval resumes the workflow and the gated task runs.
#[tokio::test]
async fn test_approval_gate_approval_runs_task() {
    let invoker = Arc::new(ScriptedInvoker::new().succeed("email:send", json!({"sent": true})));
    let mut task = tool_task("n1", "email:send", &[]);
    task.requires_approval = true;
    let exec = executor(
        Arc::clone(&invoker),
        CollectingPublisher::new(),
        Arc::new(NoSpeculation),
        ExecutorConfig::default(),
    );
    let workflow_id = WorkflowId::new("wf-approve-accept");

    let outcome =
        exec.execute(&workflow_id, Dag::new(vec![task], Vec::new()), &ctx()).await.unwrap();
    assert!(matches!(outcome, ExecutionOutcome::ApprovalRequired { .. }));

    let resumed = exec.resume(&workflow_id, true, None, &ctx()).await.unwrap();
    let ExecutionOutcome::Completed {
        result,
        records,
        ..
    } = resumed
    else {
        panic!("expected completed");
    };
    assert_eq!(result, Some(json!({"sent": true})));
    assert_eq!(records.len(), 1);
    assert_eq!(invoker.call_log(), vec!["email:send"]);
}

/// Pure pseudo-tool tasks never pause for approval.
#[tokio::test]
async fn test_pure_tasks_bypass_approval() {
    let invoker = Arc::new(ScriptedInvoker::new());
    let mut task = tool_task("n1", "code:stringify", &[]);
    task.kind = pml_core::TaskKind::CodeExecution;
    task.requires_approval = true;
    task.static_code = Some("JSON.stringify({})".to_string());
    let exec = executor(
        Arc::clone(&invoker),
        CollectingPublisher::new(),
        Arc::new(NoSpeculation),
        ExecutorConfig::default(),
    );

    let outcome = exec
        .execute(&WorkflowId::new("wf-pure"), Dag::new(vec![task], Vec::new()), &ctx())
        .await
        .unwrap();
    assert!(matches!(outcome, ExecutionOutcome::Completed { .. }));
}

// ============================================================================
// SECTION: Failure Handling
// ============================================================================

/// A failed task marks its downstream unreachable and fails the workflow.
#[tokio::test]
async fn test_failure_skips_downstream() {
    let invoker =
        Arc::new(ScriptedInvoker::new().fail("svc:boom", "connection refused by peer"));
    let dag = Dag::new(
        vec![tool_task("n1", "svc:boom", &[]), tool_task("n2", "svc:after", &["n1"])],
        Vec::new(),
    );
    let exec = executor(
        Arc::clone(&invoker),
        CollectingPublisher::new(),
        Arc::new(NoSpeculation),
        ExecutorConfig::default(),
    );

    let outcome = exec.execute(&WorkflowId::new("wf-fail"), dag, &ctx()).await.unwrap();
    let ExecutionOutcome::Failed {
        error_type,
        records,
        ..
    } = outcome
    else {
        panic!("expected failed");
    };
    assert_eq!(error_type, TaskErrorKind::Network);
    assert_eq!(records.len(), 1);
    assert_eq!(invoker.call_log(), vec!["svc:boom"]);
}

/// A successful alternative recovers a failed primary and unblocks its
/// downstream.
#[tokio::test]
async fn test_alternative_recovers_failed_task() {
    let invoker = Arc::new(
        ScriptedInvoker::new()
            .fail("svc:primary", "primary not found")
            .succeed("svc:fallback", json!({"from": "fallback"})),
    );
    let dag = Dag::new(
        vec![
            tool_task("n1", "svc:primary", &[]),
            tool_task("n2", "svc:fallback", &[]),
            tool_task("n3", "svc:final", &["n1"]),
        ],
        vec![Edge {
            from: TaskId::new("n1"),
            to: TaskId::new("n2"),
            kind: EdgeKind::Alternative,
            outcome: None,
        }],
    );
    let exec = executor(
        Arc::clone(&invoker),
        CollectingPublisher::new(),
        Arc::new(NoSpeculation),
        ExecutorConfig::default(),
    );

    let outcome = exec.execute(&WorkflowId::new("wf-alt"), dag, &ctx()).await.unwrap();
    assert!(matches!(outcome, ExecutionOutcome::Completed { .. }));
    let log = invoker.call_log();
    assert_eq!(log, vec!["svc:primary", "svc:fallback", "svc:final"]);
}

/// Timeouts classify as `TIMEOUT`.
#[tokio::test]
async fn test_timeout_classification() {
    let invoker = Arc::new(ScriptedInvoker::new().delay("svc:slow", 300));
    let exec = executor(
        Arc::clone(&invoker),
        CollectingPublisher::new(),
        Arc::new(NoSpeculation),
        ExecutorConfig {
            default_task_timeout_ms: 40,
            ..ExecutorConfig::default()
        },
    );

    let outcome = exec
        .execute(
            &WorkflowId::new("wf-timeout"),
            Dag::new(vec![tool_task("n1", "svc:slow", &[])], Vec::new()),
            &ctx(),
        )
        .await
        .unwrap();
    let ExecutionOutcome::Failed {
        error_type,
        ..
    } = outcome
    else {
        panic!("expected failed");
    };
    assert_eq!(error_type, TaskErrorKind::Timeout);
}

// ============================================================================
// SECTION: Abort
// ============================================================================

/// Aborting a suspended workflow succeeds; a second abort is a no-op.
#[tokio::test]
async fn test_abort_is_idempotent() {
    let invoker = Arc::new(ScriptedInvoker::new());
    let mut task = tool_task("n1", "email:send", &[]);
    task.requires_approval = true;
    let exec = executor(
        Arc::clone(&invoker),
        CollectingPublisher::new(),
        Arc::new(NoSpeculation),
        ExecutorConfig::default(),
    );
    let workflow_id = WorkflowId::new("wf-abort");

    let outcome =
        exec.execute(&workflow_id, Dag::new(vec![task], Vec::new()), &ctx()).await.unwrap();
    assert!(matches!(outcome, ExecutionOutcome::ApprovalRequired { .. }));

    assert!(exec.abort(&workflow_id));
    assert!(exec.abort(&workflow_id));
    assert!(!exec.abort(&WorkflowId::new("wf-unknown")));
}

// ============================================================================
// SECTION: Speculation
// ============================================================================

/// A confident prediction runs a task early; the real dispatch consumes the
/// cached result when fingerprints match, recording a single speculated
/// task record.
#[tokio::test]
async fn test_speculation_hit_consumed_once() {
    let invoker = Arc::new(
        ScriptedInvoker::new()
            .succeed("svc:load", json!({"x": 1}))
            .delay("svc:load", 120)
            .succeed("svc:use", json!({"used": true})),
    );
    let n2 = with_argument(
        tool_task("n2", "svc:use", &["n1"]),
        "x",
        ArgumentValue::reference("n1.x"),
    );
    let dag = Dag::new(vec![tool_task("n1", "svc:load", &[]), n2], Vec::new());

    let predictor = ScriptedPredictor {
        confidences: [("n2".to_string(), 0.95)].into_iter().collect(),
        arguments: [("n2".to_string(), json!({"x": 1}))].into_iter().collect(),
    };
    let publisher = CollectingPublisher::new();
    let exec = executor(
        Arc::clone(&invoker),
        publisher.clone(),
        Arc::new(predictor),
        ExecutorConfig::default(),
    );

    let outcome = exec.execute(&WorkflowId::new("wf-spec"), dag, &ctx()).await.unwrap();
    let ExecutionOutcome::Completed {
        records,
        ..
    } = outcome
    else {
        panic!("expected completed");
    };

    let n2_records: Vec<_> =
        records.iter().filter(|record| record.task_id.as_str() == "n2").collect();
    assert_eq!(n2_records.len(), 1);
    assert!(n2_records[0].speculated);
    // The tool ran exactly once (the speculative dispatch).
    assert_eq!(invoker.call_log().iter().filter(|name| *name == "svc:use").count(), 1);
    assert!(
        publisher
            .snapshot()
            .iter()
            .any(|event| matches!(event, GatewayEvent::SpeculationConsumed { .. }))
    );
}

/// Dangerous tools never dispatch speculatively; suppression is observable.
#[tokio::test]
async fn test_dangerous_tool_speculation_suppressed() {
    let invoker = Arc::new(
        ScriptedInvoker::new()
            .succeed("svc:first", json!({"ok": true}))
            .delay("svc:first", 60)
            .succeed("github:delete_repo", json!({"deleted": true})),
    );
    let dag = Dag::new(
        vec![
            tool_task("n1", "svc:first", &[]),
            tool_task("n2", "github:delete_repo", &["n1"]),
        ],
        Vec::new(),
    );
    let predictor = ScriptedPredictor {
        confidences: [("n2".to_string(), 0.95)].into_iter().collect(),
        arguments: [("n2".to_string(), json!({}))].into_iter().collect(),
    };
    let publisher = CollectingPublisher::new();
    let exec = executor(
        Arc::clone(&invoker),
        publisher.clone(),
        Arc::new(predictor),
        ExecutorConfig::default(),
    );

    let outcome = exec.execute(&WorkflowId::new("wf-danger"), dag, &ctx()).await.unwrap();
    assert!(matches!(outcome, ExecutionOutcome::Completed { .. }));

    // The dangerous tool ran exactly once, after its dependency.
    assert_eq!(invoker.call_log(), vec!["svc:first", "github:delete_repo"]);
    assert!(
        publisher
            .snapshot()
            .iter()
            .any(|event| matches!(event, GatewayEvent::SpeculationSuppressed { .. }))
    );
}

// ============================================================================
// SECTION: Replan
// ============================================================================

/// Replanning while suspended swaps the DAG; dropping a completed task is
/// rejected.
#[tokio::test]
async fn test_replan_validation_and_resume() {
    let invoker = Arc::new(
        ScriptedInvoker::new()
            .succeed("svc:one", json!({"step": 1}))
            .succeed("email:send", json!({"sent": true}))
            .succeed("svc:extra", json!({"step": 3})),
    );
    let mut gated = tool_task("n2", "email:send", &["n1"]);
    gated.requires_approval = true;
    let dag = Dag::new(vec![tool_task("n1", "svc:one", &[]), gated.clone()], Vec::new());
    let exec = executor(
        Arc::clone(&invoker),
        CollectingPublisher::new(),
        Arc::new(NoSpeculation),
        ExecutorConfig::default(),
    );
    let workflow_id = WorkflowId::new("wf-replan");

    let outcome = exec.execute(&workflow_id, dag, &ctx()).await.unwrap();
    assert!(matches!(outcome, ExecutionOutcome::ApprovalRequired { .. }));

    // Dropping the completed task n1 is an invalid replan.
    let dropped = Dag::new(vec![gated.clone()], Vec::new());
    assert!(matches!(
        exec.replan(&workflow_id, dropped),
        Err(ExecutorError::InvalidReplan(_))
    ));

    // A replan preserving n1 extends the workflow.
    let extended = Dag::new(
        vec![
            tool_task("n1", "svc:one", &[]),
            gated,
            tool_task("n3", "svc:extra", &["n2"]),
        ],
        Vec::new(),
    );
    exec.replan(&workflow_id, extended).unwrap();

    let resumed = exec.resume(&workflow_id, true, None, &ctx()).await.unwrap();
    assert!(matches!(resumed, ExecutionOutcome::Completed { .. }));
    assert_eq!(invoker.call_log(), vec!["svc:one", "email:send", "svc:extra"]);
}
