// pml-core/src/structure/error.rs
// ============================================================================
// Module: Structure Builder Errors
// Description: Parse failure type carrying the source offset.
// Purpose: Fail closed on malformed snippets while skipping unknown syntax.
// Dependencies: thiserror
// ============================================================================

//! ## Overview
//! Only malformed input fails structure building. Unknown-but-well-formed
//! constructs are skipped silently and never reach this error type.

// ============================================================================
// SECTION: Imports
// ============================================================================

use thiserror::Error;

// ============================================================================
// SECTION: Parse Error
// ============================================================================

/// Snippet parse failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("parse error at offset {offset}: {message}")]
pub struct ParseError {
    /// Byte offset of the failure.
    pub offset: usize,
    /// Failure description.
    pub message: String,
}

impl ParseError {
    /// Creates a parse error at the provided offset.
    #[must_use]
    pub fn new(offset: usize, message: impl Into<String>) -> Self {
        Self {
            offset,
            message: message.into(),
        }
    }
}
