// pml-core/src/core/events.rs
// ============================================================================
// Module: PML Gateway Event Model
// Description: Closed set of typed events published on the gateway bus.
// Purpose: Provide stable event payloads for subscribers and peer fan-out.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Events cover workflow, task, capability, and graph lifecycles plus
//! speculation and algorithm decisions. The set is closed: subscribers filter
//! by [`EventKind`] and peers exchange [`EventEnvelope`] values tagged with an
//! origin so relayed events never loop.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::core::failure::TaskErrorKind;
use crate::core::hashing::HashDigest;
use crate::core::identifiers::CapabilityFqdn;
use crate::core::identifiers::CapabilityId;
use crate::core::identifiers::CheckpointId;
use crate::core::identifiers::TaskId;
use crate::core::identifiers::ToolId;
use crate::core::identifiers::TraceId;
use crate::core::identifiers::WorkflowId;
use crate::core::task::PermissionSet;
use crate::core::time::Timestamp;
use crate::core::trace::AlgorithmDecision;

// ============================================================================
// SECTION: Event Kinds
// ============================================================================

/// Coarse event classification used for subscription filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Workflow lifecycle events.
    Workflow,
    /// Task lifecycle events.
    Task,
    /// Capability lifecycle events.
    Capability,
    /// Dependency graph mutations.
    Graph,
    /// Speculation lifecycle events.
    Speculation,
    /// Algorithm scoring decisions.
    Algorithm,
    /// Liveness heartbeats.
    Heartbeat,
}

// ============================================================================
// SECTION: Events
// ============================================================================

/// Typed gateway event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatewayEvent {
    /// A workflow started running.
    WorkflowStarted {
        /// Workflow identifier.
        workflow_id: WorkflowId,
        /// Intent text, when the run started from an intent.
        intent: Option<String>,
    },
    /// A workflow completed successfully.
    WorkflowCompleted {
        /// Workflow identifier.
        workflow_id: WorkflowId,
        /// Total duration in milliseconds.
        duration_ms: u64,
    },
    /// A workflow failed.
    WorkflowFailed {
        /// Workflow identifier.
        workflow_id: WorkflowId,
        /// Dominant error kind.
        error_type: Option<TaskErrorKind>,
    },
    /// A workflow was aborted.
    WorkflowAborted {
        /// Workflow identifier.
        workflow_id: WorkflowId,
    },
    /// A workflow paused at an approval gate.
    WorkflowPaused {
        /// Workflow identifier.
        workflow_id: WorkflowId,
        /// Checkpoint capturing the resumable state.
        checkpoint_id: CheckpointId,
        /// Task awaiting approval.
        task_id: TaskId,
    },
    /// A paused workflow resumed.
    WorkflowResumed {
        /// Workflow identifier.
        workflow_id: WorkflowId,
    },
    /// Liveness heartbeat emitted per scheduling round.
    WorkflowHeartbeat {
        /// Workflow identifier.
        workflow_id: WorkflowId,
        /// Completed task count.
        completed: usize,
        /// Pending task count.
        pending: usize,
    },
    /// A task was dispatched.
    TaskStarted {
        /// Workflow identifier.
        workflow_id: WorkflowId,
        /// Task identifier.
        task_id: TaskId,
        /// Qualified tool name.
        tool: ToolId,
    },
    /// A task completed successfully.
    TaskCompleted {
        /// Workflow identifier.
        workflow_id: WorkflowId,
        /// Task identifier.
        task_id: TaskId,
        /// Qualified tool name.
        tool: ToolId,
        /// Task duration in milliseconds.
        duration_ms: u64,
        /// Whether the result came from the speculation cache.
        speculated: bool,
    },
    /// A task failed.
    TaskFailed {
        /// Workflow identifier.
        workflow_id: WorkflowId,
        /// Task identifier.
        task_id: TaskId,
        /// Qualified tool name.
        tool: ToolId,
        /// Normalized error kind.
        error_type: TaskErrorKind,
    },
    /// A permission escalation was requested for a denied task.
    EscalationRequested {
        /// Workflow identifier.
        workflow_id: WorkflowId,
        /// Task identifier.
        task_id: TaskId,
        /// Permission level the task carried.
        from: PermissionSet,
        /// Permission level requested for re-dispatch.
        to: PermissionSet,
    },
    /// A new capability was learned.
    CapabilityLearned {
        /// Capability identifier.
        capability_id: CapabilityId,
        /// Fully-qualified name.
        fqdn: CapabilityFqdn,
        /// Canonical structure hash.
        code_hash: HashDigest,
    },
    /// An existing capability's statistics were updated.
    CapabilityUpdated {
        /// Capability identifier.
        capability_id: CapabilityId,
    },
    /// A dependency edge between tools was observed.
    GraphEdgeObserved {
        /// Source tool.
        from: ToolId,
        /// Target tool.
        to: ToolId,
    },
    /// A speculative dispatch was suppressed for a dangerous tool.
    SpeculationSuppressed {
        /// Workflow identifier.
        workflow_id: WorkflowId,
        /// Task identifier.
        task_id: TaskId,
        /// Qualified tool name.
        tool: ToolId,
    },
    /// A speculative result was consumed by the real dispatch.
    SpeculationConsumed {
        /// Workflow identifier.
        workflow_id: WorkflowId,
        /// Task identifier.
        task_id: TaskId,
    },
    /// An algorithm scoring decision was made.
    AlgorithmDecided {
        /// Algorithm trace identifier.
        trace_id: TraceId,
        /// Decision outcome.
        decision: AlgorithmDecision,
    },
}

impl GatewayEvent {
    /// Returns the coarse classification of the event.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::WorkflowStarted {
                ..
            }
            | Self::WorkflowCompleted {
                ..
            }
            | Self::WorkflowFailed {
                ..
            }
            | Self::WorkflowAborted {
                ..
            }
            | Self::WorkflowPaused {
                ..
            }
            | Self::WorkflowResumed {
                ..
            } => EventKind::Workflow,
            Self::WorkflowHeartbeat {
                ..
            } => EventKind::Heartbeat,
            Self::TaskStarted {
                ..
            }
            | Self::TaskCompleted {
                ..
            }
            | Self::TaskFailed {
                ..
            }
            | Self::EscalationRequested {
                ..
            } => EventKind::Task,
            Self::CapabilityLearned {
                ..
            }
            | Self::CapabilityUpdated {
                ..
            } => EventKind::Capability,
            Self::GraphEdgeObserved {
                ..
            } => EventKind::Graph,
            Self::SpeculationSuppressed {
                ..
            }
            | Self::SpeculationConsumed {
                ..
            } => EventKind::Speculation,
            Self::AlgorithmDecided {
                ..
            } => EventKind::Algorithm,
        }
    }
}

// ============================================================================
// SECTION: Envelope
// ============================================================================

/// Event envelope exchanged with peer processes.
///
/// # Invariants
/// - `origin` identifies the emitting process; the bus never re-forwards an
///   envelope whose origin matches the local process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Wrapped event.
    pub event: GatewayEvent,
    /// Emitting process identity.
    pub origin: String,
    /// Emission timestamp.
    pub emitted_at: Timestamp,
}
