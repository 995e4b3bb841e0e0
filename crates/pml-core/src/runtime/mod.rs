// pml-core/src/runtime/mod.rs
// ============================================================================
// Module: PML Gateway Runtime
// Description: Executor, matcher, suggester, learner, and runtime stores.
// Purpose: Provide the canonical execution path for the gateway.
// Dependencies: crate::{core, interfaces, structure}
// ============================================================================

//! ## Overview
//! The runtime is the single canonical execution path: every API surface
//! routes intents and code through the suggester, matcher, executor, and
//! learner defined here. Runtime components depend only on core types and
//! interfaces, never on each other's backends.

// ============================================================================
// SECTION: Submodules
// ============================================================================

pub mod cache;
pub mod executor;
pub mod learner;
pub mod matcher;
pub mod resolve;
pub mod speculation;
pub mod suggester;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use cache::InMemoryCheckpointStore;
pub use cache::InMemoryWorkflowCache;
pub use cache::WORKFLOW_STATE_TTL;
pub use executor::ControlledExecutor;
pub use executor::ExecutionContext;
pub use executor::ExecutionOutcome;
pub use executor::ExecutorConfig;
pub use executor::ExecutorError;
pub use learner::CapabilityLearner;
pub use learner::LearnError;
pub use matcher::CapabilityMatcher;
pub use matcher::MatchError;
pub use matcher::MatchResult;
pub use matcher::context_hash;
pub use resolve::ResolveContext;
pub use resolve::ResolveError;
pub use resolve::argument_fingerprint;
pub use resolve::resolve_argument;
pub use resolve::resolve_arguments;
pub use speculation::DEFAULT_DANGEROUS_PATTERNS;
pub use speculation::SpeculationCache;
pub use speculation::SpeculativeOutcome;
pub use speculation::is_dangerous;
pub use suggester::DagSuggester;
pub use suggester::SuggestError;
pub use suggester::Suggestion;
