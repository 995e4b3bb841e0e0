// pml-core/src/structure/normalize.rs
// ============================================================================
// Module: Snippet Normalization
// Description: Variable-name normalization for stored capability snippets.
// Purpose: Rewrite bound variables to node names for canonical storage.
// Dependencies: crate::core, crate::structure::lexer
// ============================================================================

//! ## Overview
//! Stored snippets rename every variable bound to node `nk` to `_nk` so two
//! snippets differing only in local naming store identically. The rewrite
//! works on the token stream: only identifier tokens are touched, and an
//! identifier preceded by `.` is a property-access tail and stays as written.

// ============================================================================
// SECTION: Imports
// ============================================================================

use crate::core::structure::StaticStructure;
use crate::structure::error::ParseError;
use crate::structure::lexer::TokenKind;
use crate::structure::lexer::tokenize;

// ============================================================================
// SECTION: Normalization
// ============================================================================

/// Rewrites bound variables in a snippet to their `_nk` canonical names.
///
/// # Errors
///
/// Returns [`ParseError`] when the snippet cannot be tokenized.
pub fn normalize_snippet(source: &str, structure: &StaticStructure) -> Result<String, ParseError> {
    let tokens = tokenize(source)?;
    let mut out = String::with_capacity(source.len());
    let mut cursor = 0usize;
    let mut previous_text: Option<&str> = None;

    for token in &tokens {
        if token.kind == TokenKind::Ident
            && previous_text != Some(".")
            && previous_text != Some("?.")
            && let Some(node_id) = structure.variable_bindings.get(&token.text)
        {
            out.push_str(&source[cursor..token.start]);
            out.push('_');
            out.push_str(node_id.as_str());
            cursor = token.end;
        }
        previous_text = Some(token.text.as_str());
    }
    out.push_str(&source[cursor..]);
    Ok(out)
}
