// pml-core/tests/resolve.rs
// ============================================================================
// Module: Argument Resolution Tests
// Description: Materialization order, template references, fingerprints.
// ============================================================================
//! ## Overview
//! Validates the root lookup order (results, then literal bindings, then
//! parameters), template-reference interpolation, failure codes, and
//! fingerprint stability.

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

use std::collections::BTreeMap;

use pml_core::ArgumentValue;
use pml_core::ResolveError;
use pml_core::TaskId;
use pml_core::runtime::ResolveContext;
use pml_core::runtime::argument_fingerprint;
use pml_core::runtime::resolve_argument;
use serde_json::Value;
use serde_json::json;

/// Builds a context from literal maps.
fn context<'a>(
    parameters: &'a BTreeMap<String, Value>,
    literals: &'a BTreeMap<String, Value>,
    results: &'a BTreeMap<TaskId, Value>,
) -> ResolveContext<'a> {
    ResolveContext {
        parameters,
        literal_bindings: literals,
        results,
    }
}

/// Task results shadow literal bindings, which shadow parameters.
#[test]
fn test_root_lookup_order() {
    let parameters: BTreeMap<String, Value> =
        [("n1".to_string(), json!("from-params"))].into_iter().collect();
    let literals: BTreeMap<String, Value> =
        [("n1".to_string(), json!("from-literals"))].into_iter().collect();
    let mut results = BTreeMap::new();

    let ctx = context(&parameters, &literals, &results);
    let value = resolve_argument(&ArgumentValue::reference("n1"), &ctx).unwrap();
    assert_eq!(value, json!("from-literals"));

    results.insert(TaskId::new("n1"), json!("from-results"));
    let ctx = context(&parameters, &literals, &results);
    let value = resolve_argument(&ArgumentValue::reference("n1"), &ctx).unwrap();
    assert_eq!(value, json!("from-results"));
}

/// Dotted paths walk objects and arrays.
#[test]
fn test_path_walking() {
    let parameters = BTreeMap::new();
    let literals = BTreeMap::new();
    let results: BTreeMap<TaskId, Value> = [(
        TaskId::new("n3"),
        json!({"content": [{"text": "hello"}]}),
    )]
    .into_iter()
    .collect();

    let ctx = context(&parameters, &literals, &results);
    let value =
        resolve_argument(&ArgumentValue::reference("n3.content[0].text"), &ctx).unwrap();
    assert_eq!(value, json!("hello"));
}

/// Template references interpolate each part through path resolution.
#[test]
fn test_template_reference_interpolation() {
    let parameters: BTreeMap<String, Value> =
        [("name".to_string(), json!("world"))].into_iter().collect();
    let literals = BTreeMap::new();
    let results: BTreeMap<TaskId, Value> =
        [(TaskId::new("n1"), json!({"greeting": "hello"}))].into_iter().collect();

    let ctx = context(&parameters, &literals, &results);
    let value =
        resolve_argument(&ArgumentValue::reference("`${n1.greeting}, ${name}!`"), &ctx).unwrap();
    assert_eq!(value, json!("hello, world!"));
}

/// Missing parameters and dangling references carry their wire codes.
#[test]
fn test_failure_codes() {
    let parameters = BTreeMap::new();
    let literals = BTreeMap::new();
    let results = BTreeMap::new();
    let ctx = context(&parameters, &literals, &results);

    let missing = resolve_argument(&ArgumentValue::parameter("absent"), &ctx).unwrap_err();
    assert_eq!(missing.as_code(), "MISSING_PARAMETER");
    assert!(matches!(missing, ResolveError::MissingParameter(name) if name == "absent"));

    let dangling = resolve_argument(&ArgumentValue::reference("n9.value"), &ctx).unwrap_err();
    assert_eq!(dangling.as_code(), "UNRESOLVED_REFERENCE");
}

/// Fingerprints are stable across key order and equal for equal values.
#[test]
fn test_fingerprint_stability() {
    let a = json!({"b": 2, "a": 1});
    let b = json!({"a": 1, "b": 2});
    assert_eq!(argument_fingerprint(&a).unwrap(), argument_fingerprint(&b).unwrap());

    let c = json!({"a": 1, "b": 3});
    assert_ne!(argument_fingerprint(&a).unwrap(), argument_fingerprint(&c).unwrap());
}
