// pml-core/src/core/failure.rs
// ============================================================================
// Module: PML Gateway Failure Taxonomy
// Description: Task error kinds and message-pattern classification.
// Purpose: Normalize collaborator failures into a closed error taxonomy.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Task failures inside the executor never unwind; they are captured as
//! failed results carrying a normalized error kind. Classification is by
//! message pattern, matching the failure-handling policy tree.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Error Kinds
// ============================================================================

/// Normalized task error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskErrorKind {
    /// The task exceeded its timeout.
    Timeout,
    /// The task was denied by a permission boundary.
    Permission,
    /// A referenced resource does not exist.
    NotFound,
    /// Input failed validation.
    Validation,
    /// A network failure occurred.
    Network,
    /// Unclassified failure.
    Unknown,
}

impl TaskErrorKind {
    /// Returns the stable wire code for the error kind.
    #[must_use]
    pub const fn as_code(self) -> &'static str {
        match self {
            Self::Timeout => "TIMEOUT",
            Self::Permission => "PERMISSION",
            Self::NotFound => "NOT_FOUND",
            Self::Validation => "VALIDATION",
            Self::Network => "NETWORK",
            Self::Unknown => "UNKNOWN",
        }
    }
}

// ============================================================================
// SECTION: Classification
// ============================================================================

/// Message patterns mapped to [`TaskErrorKind::Permission`].
const PERMISSION_PATTERNS: &[&str] = &["permission denied", "forbidden", "unauthorized", "eacces"];

/// Message patterns mapped to [`TaskErrorKind::Timeout`].
const TIMEOUT_PATTERNS: &[&str] = &["timed out", "timeout", "deadline exceeded"];

/// Message patterns mapped to [`TaskErrorKind::NotFound`].
const NOT_FOUND_PATTERNS: &[&str] = &["not found", "no such", "does not exist", "enoent", "404"];

/// Message patterns mapped to [`TaskErrorKind::Validation`].
const VALIDATION_PATTERNS: &[&str] =
    &["invalid", "validation", "schema", "malformed", "bad request", "type error"];

/// Message patterns mapped to [`TaskErrorKind::Network`].
const NETWORK_PATTERNS: &[&str] = &[
    "connection refused",
    "connection reset",
    "network",
    "dns",
    "unreachable",
    "econnrefused",
    "broken pipe",
];

/// Classifies a failure message into a normalized error kind.
#[must_use]
pub fn classify_error(message: &str) -> TaskErrorKind {
    let lowered = message.to_lowercase();
    let matches = |patterns: &[&str]| patterns.iter().any(|pattern| lowered.contains(pattern));
    if matches(TIMEOUT_PATTERNS) {
        TaskErrorKind::Timeout
    } else if matches(PERMISSION_PATTERNS) {
        TaskErrorKind::Permission
    } else if matches(NOT_FOUND_PATTERNS) {
        TaskErrorKind::NotFound
    } else if matches(VALIDATION_PATTERNS) {
        TaskErrorKind::Validation
    } else if matches(NETWORK_PATTERNS) {
        TaskErrorKind::Network
    } else {
        TaskErrorKind::Unknown
    }
}
