// pml-core/tests/dag_validation.rs
// ============================================================================
// Module: DAG Validation Tests
// Description: Structural invariants and topological layering.
// ============================================================================
//! ## Overview
//! Validates cycle, self-loop, and dangling-reference rejection plus
//! deterministic layer computation and guard extraction.

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

use std::collections::BTreeMap;

use pml_core::Dag;
use pml_core::DagError;
use pml_core::Edge;
use pml_core::EdgeKind;
use pml_core::PermissionSet;
use pml_core::Task;
use pml_core::TaskId;
use pml_core::TaskKind;
use pml_core::TaskMetadata;
use pml_core::ToolId;

/// Builds a bare task.
fn task(id: &str, depends_on: &[&str]) -> Task {
    Task {
        id: TaskId::new(id),
        tool: ToolId::qualified("svc", id),
        kind: TaskKind::ToolCall,
        depends_on: depends_on.iter().map(|dep| TaskId::new(*dep)).collect(),
        arguments: BTreeMap::new(),
        static_code: None,
        condition: None,
        permission_set: PermissionSet::Minimal,
        requires_approval: false,
        metadata: TaskMetadata::default(),
    }
}

/// A self-dependency is rejected.
#[test]
fn test_self_loop_rejected() {
    let dag = Dag::new(vec![task("n1", &["n1"])], Vec::new());
    assert!(matches!(dag.validate(), Err(DagError::SelfLoop(_))));
}

/// A dependency on an unknown task is rejected.
#[test]
fn test_missing_dependency_rejected() {
    let dag = Dag::new(vec![task("n1", &["n9"])], Vec::new());
    assert!(matches!(dag.validate(), Err(DagError::MissingDependency(_))));
}

/// A two-task cycle is rejected.
#[test]
fn test_cycle_rejected() {
    let dag = Dag::new(vec![task("n1", &["n2"]), task("n2", &["n1"])], Vec::new());
    assert!(matches!(dag.validate(), Err(DagError::Cycle(_))));
}

/// Duplicate identifiers are rejected.
#[test]
fn test_duplicate_task_rejected() {
    let dag = Dag::new(vec![task("n1", &[]), task("n1", &[])], Vec::new());
    assert!(matches!(dag.validate(), Err(DagError::DuplicateTask(_))));
}

/// Layers group tasks by dependency depth, ordered by identifier.
#[test]
fn test_layers_deterministic() {
    let dag = Dag::new(
        vec![
            task("n1", &[]),
            task("n2", &["n1"]),
            task("n3", &["n1"]),
            task("n4", &["n2", "n3"]),
        ],
        Vec::new(),
    );
    let layers = dag.layers().unwrap();
    assert_eq!(layers, vec![
        vec![TaskId::new("n1")],
        vec![TaskId::new("n2"), TaskId::new("n3")],
        vec![TaskId::new("n4")],
    ]);
}

/// Conditional edges surface as guards; alternative edges stay out of the
/// predecessor set.
#[test]
fn test_guards_and_alternatives() {
    let dag = Dag::new(
        vec![task("n1", &[]), task("n2", &[]), task("n3", &[])],
        vec![
            Edge {
                from: TaskId::new("n1"),
                to: TaskId::new("n2"),
                kind: EdgeKind::Conditional,
                outcome: Some("true".to_string()),
            },
            Edge {
                from: TaskId::new("n2"),
                to: TaskId::new("n3"),
                kind: EdgeKind::Alternative,
                outcome: None,
            },
        ],
    );
    dag.validate().unwrap();

    assert_eq!(dag.guards(&TaskId::new("n2")), vec![(TaskId::new("n1"), "true".to_string())]);
    assert!(dag.predecessors(&TaskId::new("n3")).is_empty());
    assert_eq!(dag.alternatives(&TaskId::new("n2")), vec![TaskId::new("n3")]);
}
