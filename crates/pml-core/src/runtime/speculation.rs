// pml-core/src/runtime/speculation.rs
// ============================================================================
// Module: Speculative Execution Support
// Description: Speculation cache and dangerous-tool suppression.
// Purpose: Hold fingerprint-guarded speculative results between dispatches.
// Dependencies: crate::core
// ============================================================================

//! ## Overview
//! A speculative result is only ever consumed when the fingerprint of the
//! actually-dispatched arguments equals the fingerprint the speculation ran
//! with; otherwise the cached entry is discarded and the task re-runs.
//! Tools matching the dangerous blocklist never speculate.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use serde_json::Value;

use crate::core::failure::TaskErrorKind;
use crate::core::hashing::HashDigest;
use crate::core::identifiers::TaskId;
use crate::core::identifiers::ToolId;

// ============================================================================
// SECTION: Dangerous Tools
// ============================================================================

/// Default blocklist patterns suppressing speculative dispatch.
pub const DEFAULT_DANGEROUS_PATTERNS: &[&str] = &[
    "delete",
    "remove",
    "destroy",
    "drop",
    "deploy",
    "publish",
    "send_email",
    "payment",
    "transfer",
    "execute_sql",
];

/// Returns true when the tool name matches a blocklist pattern
/// (case-insensitive substring match).
#[must_use]
pub fn is_dangerous(tool: &ToolId, patterns: &[String]) -> bool {
    let lowered = tool.as_str().to_lowercase();
    patterns.iter().any(|pattern| lowered.contains(&pattern.to_lowercase()))
}

// ============================================================================
// SECTION: Speculation Cache
// ============================================================================

/// Outcome held by a speculative entry.
#[derive(Debug, Clone, PartialEq)]
pub struct SpeculativeOutcome {
    /// Result value on success.
    pub result: Result<Value, (TaskErrorKind, String)>,
    /// Execution duration in milliseconds.
    pub duration_ms: u64,
    /// Materialized arguments the speculation ran with.
    pub args: Value,
}

/// Cached speculative entry keyed by argument fingerprint.
#[derive(Debug, Clone, PartialEq)]
struct Entry {
    /// Fingerprint of the speculatively resolved arguments.
    fingerprint: HashDigest,
    /// Speculative outcome.
    outcome: SpeculativeOutcome,
}

/// Per-workflow speculation cache.
#[derive(Debug, Default)]
pub struct SpeculationCache {
    /// Entries keyed by task identifier.
    entries: BTreeMap<TaskId, Entry>,
}

impl SpeculationCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true when a speculation is already cached or in flight for the
    /// task.
    #[must_use]
    pub fn contains(&self, task_id: &TaskId) -> bool {
        self.entries.contains_key(task_id)
    }

    /// Stores a speculative outcome.
    pub fn store(
        &mut self,
        task_id: TaskId,
        fingerprint: HashDigest,
        outcome: SpeculativeOutcome,
    ) {
        self.entries.insert(
            task_id,
            Entry {
                fingerprint,
                outcome,
            },
        );
    }

    /// Consumes the cached entry when the fingerprint matches the real
    /// dispatch; a mismatched entry is discarded.
    pub fn consume(
        &mut self,
        task_id: &TaskId,
        fingerprint: &HashDigest,
    ) -> Option<SpeculativeOutcome> {
        let entry = self.entries.remove(task_id)?;
        if &entry.fingerprint == fingerprint {
            Some(entry.outcome)
        } else {
            None
        }
    }

    /// Drops all cached entries (used on replan).
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
