// pml-core/src/lib.rs
// ============================================================================
// Module: PML Core Library
// Description: Public API surface for the PML Gateway core.
// Purpose: Expose core types, interfaces, structure building, and runtime.
// Dependencies: crate::{core, interfaces, runtime, structure}
// ============================================================================

//! ## Overview
//! PML core provides the procedural-memory gateway's domain model, the static
//! structure builder, the controlled DAG executor, and the capability
//! matching pipeline. It is backend-agnostic and integrates with storage and
//! collaborators through explicit interfaces rather than concrete types.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod core;
pub mod interfaces;
pub mod runtime;
pub mod structure;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use core::*;

pub use interfaces::CacheError;
pub use interfaces::CapabilityStore;
pub use interfaces::CheckpointStore;
pub use interfaces::DependencyGraphStore;
pub use interfaces::EmbedError;
pub use interfaces::Embedder;
pub use interfaces::EventPublisher;
pub use interfaces::InvokeError;
pub use interfaces::NoSpeculation;
pub use interfaces::NoopPublisher;
pub use interfaces::NoopRecorder;
pub use interfaces::SandboxError;
pub use interfaces::SandboxRequest;
pub use interfaces::SandboxResult;
pub use interfaces::SandboxWorker;
pub use interfaces::SpeculationPredictor;
pub use interfaces::StoreError;
pub use interfaces::ThresholdRecord;
pub use interfaces::ThresholdStore;
pub use interfaces::ToolHit;
pub use interfaces::ToolIndex;
pub use interfaces::ToolInvoker;
pub use interfaces::TraceRecorder;
pub use interfaces::TraceStore;
pub use interfaces::WorkflowCache;
pub use runtime::CapabilityLearner;
pub use runtime::CapabilityMatcher;
pub use runtime::ControlledExecutor;
pub use runtime::DagSuggester;
pub use runtime::ExecutionContext;
pub use runtime::ExecutionOutcome;
pub use runtime::ExecutorConfig;
pub use runtime::ExecutorError;
pub use runtime::InMemoryCheckpointStore;
pub use runtime::InMemoryWorkflowCache;
pub use runtime::LearnError;
pub use runtime::MatchError;
pub use runtime::MatchResult;
pub use runtime::ResolveError;
pub use runtime::SuggestError;
pub use runtime::Suggestion;
pub use structure::ParseError;
pub use structure::build_structure;
pub use structure::evaluate_condition;
pub use structure::normalize_snippet;
