// pml-core/src/structure/mod.rs
// ============================================================================
// Module: Static Structure Builder
// Description: Snippet parsing and canonical structure extraction.
// Purpose: Produce the content-addressable form used for capability dedup.
// Dependencies: crate::core
// ============================================================================

//! ## Overview
//! The structure builder parses the snippet language, walks the AST into a
//! canonical node/edge structure with normalized arguments, folds literal
//! expressions, and normalizes stored snippets. The same expression machinery
//! evaluates decision conditions at execution time.

// ============================================================================
// SECTION: Submodules
// ============================================================================

pub mod ast;
pub mod builder;
pub mod error;
pub mod folding;
pub mod lexer;
pub mod normalize;
pub mod parser;
pub mod render;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

use std::collections::BTreeMap;

use serde_json::Value;

pub use builder::build_structure;
pub use error::ParseError;
pub use normalize::normalize_snippet;

// ============================================================================
// SECTION: Condition Evaluation
// ============================================================================

/// Evaluates a canonical condition expression against an environment of
/// completed task results and parameters.
///
/// Returns `None` when the condition does not parse or references values the
/// environment does not provide.
#[must_use]
pub fn evaluate_condition(condition: &str, env: &BTreeMap<String, Value>) -> Option<Value> {
    let expr = parser::parse_expression(condition).ok()?;
    folding::fold(&expr, env)
}
