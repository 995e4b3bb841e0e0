// pml-core/tests/proptest_hash.rs
// ============================================================================
// Module: Structure Hash Property Tests
// Description: Hash invariance under renaming and formatting noise.
// ============================================================================
//! ## Overview
//! Property tests for the capability dedup key: canonical hashes must be
//! invariant under consistent renaming of result-bound variables and under
//! whitespace and comment changes.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only output and panic-based assertions are permitted."
)]

use pml_core::build_structure;
use proptest::prelude::*;

/// Strategy for valid snippet variable names.
fn var_name() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9]{0,6}".prop_filter("reserved words excluded", |name| {
        !matches!(
            name.as_str(),
            "const" | "let" | "var" | "return" | "if" | "else" | "switch" | "case" | "await"
                | "true" | "false" | "null" | "args" | "params" | "mcp" | "for" | "new" | "do"
        )
    })
}

/// Builds the probe snippet with the provided variable name.
fn snippet(name: &str) -> String {
    format!(
        "const {name} = await mcp.fs.read({{path: args.p}});\n\
         return mcp.json.parse({{text: {name}.content}});"
    )
}

proptest! {
    /// Renaming the bound variable never changes the canonical hash.
    #[test]
    fn prop_hash_invariant_under_rename(a in var_name(), b in var_name()) {
        let hash_a = build_structure(&snippet(&a)).unwrap().canonical_hash().unwrap();
        let hash_b = build_structure(&snippet(&b)).unwrap().canonical_hash().unwrap();
        prop_assert_eq!(hash_a, hash_b);
    }

    /// Whitespace padding and comments never change the canonical hash.
    #[test]
    fn prop_hash_invariant_under_formatting(
        pad_a in " {0,4}",
        pad_b in " {0,4}",
        comment in "[ a-z]{0,12}",
    ) {
        let plain = "const f = await mcp.fs.read({path: \"x\"});";
        let noisy = format!(
            "// {comment}\nconst{pad_a} f ={pad_b} await  mcp.fs.read( {{ path: \"x\" }} ) ;"
        );
        let hash_plain = build_structure(plain).unwrap().canonical_hash().unwrap();
        let hash_noisy = build_structure(&noisy).unwrap().canonical_hash().unwrap();
        prop_assert_eq!(hash_plain, hash_noisy);
    }
}
