// pml-core/src/core/capability.rs
// ============================================================================
// Module: PML Gateway Capability Model
// Description: Learned capability records and execution statistics.
// Purpose: Provide the canonical schema for content-addressed capabilities.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! A capability is a named, parameterized code snippet learned from a
//! successful execution and content-addressed by the canonical hash of its
//! static structure. The code snippet and intent embedding never change after
//! creation; only statistics evolve.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::core::embedding::Embedding;
use crate::core::hashing::HashDigest;
use crate::core::identifiers::CapabilityFqdn;
use crate::core::identifiers::CapabilityId;
use crate::core::identifiers::UserId;
use crate::core::task::PermissionSet;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Visibility
// ============================================================================

/// Capability visibility scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    /// Visible to the creating user only.
    #[default]
    Private,
    /// Visible within the project.
    Project,
    /// Visible within the organization.
    Org,
    /// Publicly visible.
    Public,
}

// ============================================================================
// SECTION: Statistics
// ============================================================================

/// Online execution statistics maintained per capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityStats {
    /// Success rate over all recorded executions, in `[0, 1]`.
    pub success_rate: f64,
    /// Number of recorded executions.
    pub usage_count: u64,
    /// Online mean execution duration in milliseconds.
    pub avg_duration_ms: f64,
    /// Timestamp of the most recent execution.
    pub last_used_at: Option<Timestamp>,
}

impl Default for CapabilityStats {
    fn default() -> Self {
        Self {
            success_rate: 1.0,
            usage_count: 0,
            avg_duration_ms: 0.0,
            last_used_at: None,
        }
    }
}

impl CapabilityStats {
    /// Folds one execution outcome into the online statistics.
    pub fn record(&mut self, success: bool, duration_ms: u64, at: Timestamp) {
        let previous = self.usage_count;
        self.usage_count = previous.saturating_add(1);
        #[allow(
            clippy::cast_precision_loss,
            reason = "Usage counts stay far below the f64 integer range."
        )]
        let count = self.usage_count as f64;
        let outcome = if success { 1.0 } else { 0.0 };
        #[allow(
            clippy::cast_precision_loss,
            reason = "Durations stay far below the f64 integer range."
        )]
        let duration = duration_ms as f64;
        if previous == 0 {
            self.success_rate = outcome;
            self.avg_duration_ms = duration;
        } else {
            self.success_rate += (outcome - self.success_rate) / count;
            self.avg_duration_ms += (duration - self.avg_duration_ms) / count;
        }
        self.last_used_at = Some(at);
    }
}

// ============================================================================
// SECTION: Capability
// ============================================================================

/// Learned capability record.
///
/// # Invariants
/// - `code_hash` is unique across the store where present.
/// - `code_snippet` and `intent_embedding` are immutable after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capability {
    /// Capability identifier.
    pub id: CapabilityId,
    /// Fully-qualified capability name.
    pub fqdn: CapabilityFqdn,
    /// Canonical, variable-normalized source snippet.
    pub code_snippet: String,
    /// Canonical hash of the static structure (the dedup key).
    pub code_hash: Option<HashDigest>,
    /// JSON-schema-like description of external inputs.
    pub parameters_schema: Value,
    /// Unit-normalized intent embedding, populated on creation.
    pub intent_embedding: Option<Embedding>,
    /// Online execution statistics.
    pub stats: CapabilityStats,
    /// Visibility scope.
    pub visibility: Visibility,
    /// Creating user.
    pub created_by: UserId,
    /// Creation timestamp.
    pub created_at: Timestamp,
    /// Inferred permission set.
    pub permission_set: PermissionSet,
    /// Confidence of the permission inference, in `[0, 1]`.
    pub permission_confidence: f64,
    /// Graph community assignment, when computed.
    pub community_id: Option<i64>,
}

// ============================================================================
// SECTION: Save Outcome
// ============================================================================

/// Result of a capability save.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveOutcome {
    /// Identifier of the stored capability.
    pub capability_id: CapabilityId,
    /// True when the save created a new capability; false on dedup.
    pub is_new: bool,
}
