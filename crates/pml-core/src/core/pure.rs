// pml-core/src/core/pure.rs
// ============================================================================
// Module: PML Gateway Pure Operations
// Description: Whitelist of pure array/string/object/math operations.
// Purpose: Shared pseudo-tool detection for the builder and approval bypass.
// Dependencies: none
// ============================================================================

//! ## Overview
//! Pure operations execute inside the sandbox without external effects. The
//! structure builder emits them as `code:<op>` pseudo-tool nodes and the
//! executor never routes them through approval gates. The whitelist is fixed;
//! anything outside it is not a recognized construct.

// ============================================================================
// SECTION: Whitelist
// ============================================================================

/// Names of pure operations recognized as `code:<op>` pseudo-tools.
///
/// # Invariants
/// - Entries are unique.
/// - The list is closed; extending it changes capability hashes for snippets
///   that use the new names.
pub const PURE_OPS: &[&str] = &[
    // Array operations.
    "map",
    "filter",
    "reduce",
    "reduceRight",
    "forEach",
    "find",
    "findIndex",
    "findLast",
    "findLastIndex",
    "some",
    "every",
    "includes",
    "indexOf",
    "lastIndexOf",
    "slice",
    "concat",
    "join",
    "flat",
    "flatMap",
    "fill",
    "reverse",
    "sort",
    "push",
    "pop",
    "shift",
    "unshift",
    "splice",
    "at",
    "entries",
    "keys",
    "values",
    // String operations.
    "split",
    "trim",
    "trimStart",
    "trimEnd",
    "toUpperCase",
    "toLowerCase",
    "replace",
    "replaceAll",
    "substring",
    "charAt",
    "charCodeAt",
    "codePointAt",
    "startsWith",
    "endsWith",
    "padStart",
    "padEnd",
    "repeat",
    "match",
    "matchAll",
    "search",
    "localeCompare",
    "normalize",
    "toString",
    // Object operations.
    "assign",
    "fromEntries",
    "freeze",
    "isFrozen",
    "getOwnPropertyNames",
    "hasOwnProperty",
    "create",
    "seal",
    // Math operations.
    "abs",
    "ceil",
    "floor",
    "round",
    "trunc",
    "sqrt",
    "cbrt",
    "pow",
    "exp",
    "expm1",
    "log",
    "log1p",
    "log2",
    "log10",
    "min",
    "max",
    "sign",
    "hypot",
    "atan2",
    "imul",
    // Number operations.
    "parseInt",
    "parseFloat",
    "toFixed",
    "toPrecision",
    "isInteger",
    "isSafeInteger",
    "isFinite",
    "isNaN",
    "valueOf",
    "toExponential",
    // JSON and encoding operations.
    "parse",
    "stringify",
    "encodeURIComponent",
    "decodeURIComponent",
    "structuredClone",
];

/// Returns true when the name is a recognized pure operation.
#[must_use]
pub fn is_pure_op(name: &str) -> bool {
    PURE_OPS.contains(&name)
}

#[cfg(test)]
mod tests {
    //! Whitelist integrity checks.
    #![allow(
        clippy::panic,
        clippy::unwrap_used,
        clippy::expect_used,
        reason = "Test-only panic-based assertions are permitted."
    )]

    use std::collections::BTreeSet;

    use super::PURE_OPS;
    use super::is_pure_op;

    /// The whitelist holds exactly 97 unique names.
    #[test]
    fn test_whitelist_size_and_uniqueness() {
        assert_eq!(PURE_OPS.len(), 97);
        let unique: BTreeSet<_> = PURE_OPS.iter().collect();
        assert_eq!(unique.len(), PURE_OPS.len());
    }

    /// Membership checks match the list.
    #[test]
    fn test_membership() {
        assert!(is_pure_op("map"));
        assert!(is_pure_op("stringify"));
        assert!(!is_pure_op("fetch"));
        assert!(!is_pure_op("eval"));
    }
}
