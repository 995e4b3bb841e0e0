// pml-core/src/core/workflow.rs
// ============================================================================
// Module: PML Gateway Workflow State
// Description: Workflow state machine, cached state, and checkpoints.
// Purpose: Provide resumable workflow snapshots across request boundaries.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! A workflow progresses through a fixed state machine; illegal transitions
//! are rejected. While running, the executor owns the state exclusively; on
//! suspension ownership passes to the workflow cache as a [`WorkflowState`]
//! plus a [`Checkpoint`] holding the resumable snapshot.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::core::dag::Dag;
use crate::core::identifiers::CheckpointId;
use crate::core::identifiers::TaskId;
use crate::core::identifiers::WorkflowId;
use crate::core::time::Timestamp;
use crate::core::trace::TaskResultRecord;

// ============================================================================
// SECTION: Status Machine
// ============================================================================

/// Workflow lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    /// Created but not yet scheduled.
    Created,
    /// Actively scheduling tasks.
    Running,
    /// Suspended at an approval gate.
    Paused,
    /// Completed successfully.
    Completed,
    /// Failed with at least one unrecovered task failure.
    Failed,
    /// Aborted by request or rejection.
    Aborted,
}

impl WorkflowStatus {
    /// Returns true when the transition is legal in the state machine.
    #[must_use]
    pub const fn can_transition(self, to: Self) -> bool {
        matches!(
            (self, to),
            (Self::Created, Self::Running)
                | (
                    Self::Running,
                    Self::Paused | Self::Completed | Self::Failed | Self::Aborted
                )
                | (Self::Paused, Self::Running | Self::Aborted)
        )
    }

    /// Returns true when the status is terminal.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Aborted)
    }

    /// Returns the stable wire label for the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Aborted => "aborted",
        }
    }
}

/// Workflow state machine errors.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// An illegal state transition was attempted.
    #[error("invalid workflow state transition: {from:?} -> {to:?}")]
    InvalidTransition {
        /// Status before the transition.
        from: WorkflowStatus,
        /// Requested status.
        to: WorkflowStatus,
    },
}

/// Applies a transition, rejecting illegal ones.
///
/// # Errors
///
/// Returns [`WorkflowError::InvalidTransition`] when the state machine does
/// not permit the transition.
pub const fn transition(
    from: WorkflowStatus,
    to: WorkflowStatus,
) -> Result<WorkflowStatus, WorkflowError> {
    if from.can_transition(to) {
        Ok(to)
    } else {
        Err(WorkflowError::InvalidTransition {
            from,
            to,
        })
    }
}

// ============================================================================
// SECTION: Cached State
// ============================================================================

/// Ephemeral workflow state held in the cache with a one-hour TTL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    /// The DAG under execution.
    pub dag: Dag,
    /// Intent text, when the run started from an intent.
    pub intent: Option<String>,
    /// Creation timestamp.
    pub created_at: Timestamp,
}

// ============================================================================
// SECTION: Checkpoints
// ============================================================================

/// Resumable executor snapshot captured at a checkpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSnapshot {
    /// Materialized results of completed tasks.
    pub results: BTreeMap<TaskId, Value>,
    /// Per-task records accumulated so far.
    pub task_records: Vec<TaskResultRecord>,
    /// Resolved decision outcomes.
    pub decision_outcomes: BTreeMap<TaskId, String>,
    /// Tasks approved by a human.
    pub approved: BTreeSet<TaskId>,
    /// Tasks still pending dispatch.
    pub pending: BTreeSet<TaskId>,
}

/// Checkpoint persisted per approval gate or completed layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Checkpoint identifier.
    pub id: CheckpointId,
    /// Owning workflow.
    pub workflow_id: WorkflowId,
    /// Capture timestamp.
    pub timestamp: Timestamp,
    /// Topological layer reached when the checkpoint was taken.
    pub layer: usize,
    /// Resumable executor snapshot.
    pub state: ExecutionSnapshot,
}
