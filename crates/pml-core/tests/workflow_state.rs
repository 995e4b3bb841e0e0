// pml-core/tests/workflow_state.rs
// ============================================================================
// Module: Workflow State Tests
// Description: State machine transitions and cache TTL behavior.
// ============================================================================
//! ## Overview
//! Validates the workflow state machine's legal-transition set and the
//! in-memory cache's TTL enforcement and refresh-on-write semantics.

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

use std::time::Duration;

use pml_core::CacheError;
use pml_core::Dag;
use pml_core::InMemoryWorkflowCache;
use pml_core::Timestamp;
use pml_core::WorkflowCache;
use pml_core::WorkflowId;
use pml_core::WorkflowState;
use pml_core::WorkflowStatus;
use pml_core::transition;

/// Every legal transition is accepted.
#[test]
fn test_legal_transitions() {
    use WorkflowStatus::{Aborted, Completed, Created, Failed, Paused, Running};
    for (from, to) in [
        (Created, Running),
        (Running, Paused),
        (Running, Completed),
        (Running, Failed),
        (Running, Aborted),
        (Paused, Running),
        (Paused, Aborted),
    ] {
        assert_eq!(transition(from, to).unwrap(), to);
    }
}

/// Illegal transitions are rejected, including transitions out of terminal
/// states.
#[test]
fn test_illegal_transitions() {
    use WorkflowStatus::{Aborted, Completed, Created, Failed, Paused, Running};
    for (from, to) in [
        (Created, Completed),
        (Created, Paused),
        (Completed, Running),
        (Failed, Running),
        (Aborted, Running),
        (Paused, Completed),
        (Paused, Failed),
        (Running, Created),
    ] {
        assert!(transition(from, to).is_err(), "{from:?} -> {to:?} must be rejected");
    }
}

/// Terminal statuses are exactly completed, failed, and aborted.
#[test]
fn test_terminal_statuses() {
    assert!(WorkflowStatus::Completed.is_terminal());
    assert!(WorkflowStatus::Failed.is_terminal());
    assert!(WorkflowStatus::Aborted.is_terminal());
    assert!(!WorkflowStatus::Created.is_terminal());
    assert!(!WorkflowStatus::Running.is_terminal());
    assert!(!WorkflowStatus::Paused.is_terminal());
}

/// Builds an empty workflow state.
fn state() -> WorkflowState {
    WorkflowState {
        dag: Dag::default(),
        intent: Some("test".to_string()),
        created_at: Timestamp::from_unix_millis(0),
    }
}

/// Expired entries read as absent and update fails on them.
#[test]
fn test_cache_ttl_expiry() {
    let cache = InMemoryWorkflowCache::with_ttl(Duration::from_millis(20));
    let id = WorkflowId::new("wf-ttl");
    cache.save(&id, &state()).unwrap();
    assert!(cache.get(&id).unwrap().is_some());

    std::thread::sleep(Duration::from_millis(40));
    assert!(cache.get(&id).unwrap().is_none());
    assert!(matches!(cache.update(&id, &state()), Err(CacheError::Missing(_))));
    assert!(matches!(cache.extend(&id), Err(CacheError::Missing(_))));
}

/// Writes refresh the TTL.
#[test]
fn test_cache_write_refreshes_ttl() {
    let cache = InMemoryWorkflowCache::with_ttl(Duration::from_millis(60));
    let id = WorkflowId::new("wf-refresh");
    cache.save(&id, &state()).unwrap();

    std::thread::sleep(Duration::from_millis(35));
    cache.update(&id, &state()).unwrap();
    std::thread::sleep(Duration::from_millis(35));
    // Without the refresh the entry would have expired by now.
    assert!(cache.get(&id).unwrap().is_some());

    cache.delete(&id).unwrap();
    assert!(cache.get(&id).unwrap().is_none());
}
