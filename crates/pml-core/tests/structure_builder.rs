// pml-core/tests/structure_builder.rs
// ============================================================================
// Module: Structure Builder Tests
// Description: Canonical extraction, argument normalization, and hashing.
// ============================================================================
//! ## Overview
//! Validates node/edge extraction for every recognized construct, in-place
//! argument normalization, literal folding, variable-rename invariance, and
//! the parse failure contract.

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

use pml_core::ArgumentValue;
use pml_core::EdgeKind;
use pml_core::TaskId;
use pml_core::TaskKind;
use pml_core::ToolId;
use pml_core::build_structure;
use pml_core::normalize_snippet;
use serde_json::json;

// ============================================================================
// SECTION: Tool Calls and References
// ============================================================================

/// A tool call with a bound-variable reference canonicalizes the reference to
/// a node path while the parameter stays symbolic.
#[test]
fn test_tool_call_reference_rewrite() {
    let source = "const f = await mcp.fs.read({path: args.p});\n\
                  return mcp.json.parse({text: f.content});";
    let structure = build_structure(source).unwrap();

    assert_eq!(structure.nodes.len(), 2);
    let read = &structure.nodes[0];
    assert_eq!(read.kind, TaskKind::ToolCall);
    assert_eq!(read.tool, Some(ToolId::qualified("fs", "read")));
    assert_eq!(read.arguments.get("path"), Some(&ArgumentValue::parameter("p")));

    let parse = &structure.nodes[1];
    assert_eq!(parse.tool, Some(ToolId::qualified("json", "parse")));
    assert_eq!(parse.arguments.get("text"), Some(&ArgumentValue::reference("n1.content")));

    assert_eq!(structure.variable_bindings.get("f"), Some(&TaskId::new("n1")));
    assert!(structure.parameters.contains("p"));
    assert_eq!(structure.edges.len(), 1);
    assert_eq!(structure.edges[0].kind, EdgeKind::Sequence);
}

/// Saving the same snippet with a renamed variable produces the same hash
/// and the same normalized snippet.
#[test]
fn test_dedup_by_renaming() {
    let a = "const f = await mcp.fs.read({path: args.p});\n\
             return mcp.json.parse({text: f.content});";
    let b = "const data = await mcp.fs.read({path: args.p});\n\
             return mcp.json.parse({text: data.content});";

    let structure_a = build_structure(a).unwrap();
    let structure_b = build_structure(b).unwrap();
    assert_eq!(
        structure_a.canonical_hash().unwrap(),
        structure_b.canonical_hash().unwrap()
    );
    assert_eq!(
        normalize_snippet(a, &structure_a).unwrap(),
        normalize_snippet(b, &structure_b).unwrap()
    );
}

/// The hash ignores whitespace and comments.
#[test]
fn test_hash_ignores_whitespace_and_comments() {
    let plain = "const f = await mcp.fs.read({path: \"x\"});";
    let noisy = "// load the file\nconst f  =  await   mcp.fs.read( {\n  path: \"x\"\n} ) ;";
    assert_eq!(
        build_structure(plain).unwrap().canonical_hash().unwrap(),
        build_structure(noisy).unwrap().canonical_hash().unwrap()
    );
}

/// Variable normalization never rewrites property-access tails.
#[test]
fn test_normalize_keeps_property_tails() {
    let source = "const content = await mcp.fs.read({path: \"x\"});\n\
                  return mcp.json.parse({text: content.content});";
    let structure = build_structure(source).unwrap();
    let normalized = normalize_snippet(source, &structure).unwrap();
    assert!(normalized.contains("const _n1 ="));
    assert!(normalized.contains("_n1.content"));
    assert!(!normalized.contains("_n1._n1"));
}

// ============================================================================
// SECTION: Parallel Constructs
// ============================================================================

/// A map over a literal array unrolls into fork, one task per element, and
/// join, with literal arguments.
#[test]
fn test_literal_map_unrolls_fork_join() {
    let source = "await Promise.all([\"a\",\"b\",\"c\"].map(p => mcp.fs.read({path: p})))";
    let structure = build_structure(source).unwrap();

    let forks: Vec<_> =
        structure.nodes.iter().filter(|node| node.kind == TaskKind::Fork).collect();
    let joins: Vec<_> =
        structure.nodes.iter().filter(|node| node.kind == TaskKind::Join).collect();
    let tasks: Vec<_> =
        structure.nodes.iter().filter(|node| node.kind == TaskKind::ToolCall).collect();
    assert_eq!(forks.len(), 1);
    assert_eq!(joins.len(), 1);
    assert_eq!(tasks.len(), 3);

    let paths: Vec<_> = tasks
        .iter()
        .map(|task| task.arguments.get("path").cloned().unwrap())
        .collect();
    assert_eq!(paths, vec![
        ArgumentValue::literal(json!("a")),
        ArgumentValue::literal(json!("b")),
        ArgumentValue::literal(json!("c")),
    ]);

    let fork_id = &forks[0].id;
    let join_id = &joins[0].id;
    let fork_out = structure
        .edges
        .iter()
        .filter(|edge| &edge.from == fork_id && edge.kind == EdgeKind::Sequence)
        .count();
    let join_in = structure
        .edges
        .iter()
        .filter(|edge| &edge.to == join_id && edge.kind == EdgeKind::Sequence)
        .count();
    assert_eq!(fork_out, 3);
    assert_eq!(join_in, 3);
}

/// `Promise.all` over explicit calls produces the same fork/join shape.
#[test]
fn test_promise_all_explicit_calls() {
    let source = "await Promise.all([mcp.a.x({}), mcp.b.y({})])";
    let structure = build_structure(source).unwrap();
    assert_eq!(
        structure.nodes.iter().filter(|node| node.kind == TaskKind::Fork).count(),
        1
    );
    assert_eq!(
        structure.nodes.iter().filter(|node| node.kind == TaskKind::Join).count(),
        1
    );
    assert_eq!(
        structure.nodes.iter().filter(|node| node.kind == TaskKind::ToolCall).count(),
        2
    );
}

/// A map over a variable array emits a single template task.
#[test]
fn test_variable_map_emits_template_task() {
    let source = "const files = await mcp.fs.list({dir: \"/tmp\"});\n\
                  await Promise.all(files.items.map(f => mcp.fs.read({path: f})))";
    let structure = build_structure(source).unwrap();
    let reads: Vec<_> = structure
        .nodes
        .iter()
        .filter(|node| node.tool == Some(ToolId::qualified("fs", "read")))
        .collect();
    assert_eq!(reads.len(), 1);
    assert_eq!(
        reads[0].arguments.get("path"),
        Some(&ArgumentValue::reference("n1.items[*]"))
    );
}

// ============================================================================
// SECTION: Branches
// ============================================================================

/// `if`/`else` emits a decision node with conditional branch edges.
#[test]
fn test_if_else_decision() {
    let source = "const r = await mcp.api.check({});\n\
                  if (r.status === \"ok\") { await mcp.api.proceed({}); } \
                  else { await mcp.api.rollback({}); }";
    let structure = build_structure(source).unwrap();

    let decision =
        structure.nodes.iter().find(|node| node.kind == TaskKind::Decision).unwrap();
    assert_eq!(decision.condition.as_deref(), Some("n1.status === \"ok\""));

    let outcomes: Vec<_> = structure
        .edges
        .iter()
        .filter(|edge| edge.from == decision.id && edge.kind == EdgeKind::Conditional)
        .filter_map(|edge| edge.outcome.clone())
        .collect();
    assert!(outcomes.contains(&"true".to_string()));
    assert!(outcomes.contains(&"false".to_string()));
}

/// `switch` emits case-labeled conditional edges.
#[test]
fn test_switch_cases() {
    let source = "const r = await mcp.api.kind({});\n\
                  switch (r.kind) { case \"a\": await mcp.api.first({}); break; \
                  default: await mcp.api.other({}); }";
    let structure = build_structure(source).unwrap();
    let outcomes: Vec<_> = structure
        .edges
        .iter()
        .filter(|edge| edge.kind == EdgeKind::Conditional)
        .filter_map(|edge| edge.outcome.clone())
        .collect();
    assert!(outcomes.contains(&"case:a".to_string()));
    assert!(outcomes.contains(&"default".to_string()));
}

// ============================================================================
// SECTION: Pure Operations
// ============================================================================

/// Whitelisted method calls become `code:<op>` pseudo-tool nodes with the
/// verbatim span captured.
#[test]
fn test_method_chain_pseudo_tools() {
    let source = "const r = await mcp.fs.read({path: \"x\"});\n\
                  const cleaned = r.lines.filter(l => l).join(\"\\n\");";
    let structure = build_structure(source).unwrap();
    let ops: Vec<_> = structure
        .nodes
        .iter()
        .filter(|node| node.kind == TaskKind::CodeExecution)
        .collect();
    assert_eq!(ops.len(), 2);
    assert_eq!(ops[0].tool, Some(ToolId::pseudo("filter")));
    assert_eq!(ops[1].tool, Some(ToolId::pseudo("join")));
    assert!(ops[1].static_code.as_deref().is_some_and(|code| code.contains(".join(")));
    // Chain order: earliest call first, sequenced.
    assert!(structure.edges.iter().any(|edge| {
        edge.from == ops[0].id && edge.to == ops[1].id && edge.kind == EdgeKind::Sequence
    }));
}

/// Statically-evaluable expressions fold into literal bindings and emit no
/// nodes.
#[test]
fn test_literal_folding() {
    let source = "const base = 10;\nconst limit = base * 2 + 5;\n\
                  await mcp.api.page({size: limit});";
    let structure = build_structure(source).unwrap();
    assert_eq!(structure.nodes.len(), 1);
    assert_eq!(structure.literal_bindings.get("limit"), Some(&json!(25.0)));
    assert_eq!(
        structure.nodes[0].arguments.get("size"),
        Some(&ArgumentValue::literal(json!(25.0)))
    );
}

// ============================================================================
// SECTION: Code Template Literals
// ============================================================================

/// Nested literals inside code template literals become named parameters.
#[test]
fn test_code_template_parameter_inference() {
    let source = "await mcp.browser.evaluate({script: `await page.goto(\"http://x\")`})";
    let structure = build_structure(source).unwrap();
    assert!(structure.parameters.contains("url"));
    let script = structure.nodes[0].arguments.get("script").unwrap();
    match script {
        ArgumentValue::Reference {
            expression,
        } => {
            assert!(expression.contains("${url}"));
        }
        other => panic!("expected template reference, got {other:?}"),
    }
}

// ============================================================================
// SECTION: Failure Contract
// ============================================================================

/// Unknown constructs are skipped without failing the build.
#[test]
fn test_unknown_constructs_skipped() {
    let source = "for (let i = 0; i < 3; i = i + 1) { console.log(i); }\n\
                  await mcp.fs.read({path: \"x\"});";
    let structure = build_structure(source).unwrap();
    assert_eq!(structure.nodes.len(), 1);
    assert_eq!(structure.nodes[0].tool, Some(ToolId::qualified("fs", "read")));
}

/// Malformed input fails with an offset-carrying parse error.
#[test]
fn test_unterminated_string_fails() {
    let error = build_structure("const x = \"oops").unwrap_err();
    assert!(error.message.contains("unterminated"));
    assert_eq!(error.offset, 10);
}

// ============================================================================
// SECTION: DAG Conversion
// ============================================================================

/// Structure-to-DAG conversion derives dependencies from edges and argument
/// references, and the result validates.
#[test]
fn test_to_dag_validates() {
    let source = "const f = await mcp.fs.read({path: \"x\"});\n\
                  const p = await mcp.json.parse({text: f.content});\n\
                  return mcp.api.send({data: p.value});";
    let structure = build_structure(source).unwrap();
    let dag = structure.to_dag();
    dag.validate().unwrap();

    let send = dag.task(&TaskId::new("n3")).unwrap();
    assert!(send.depends_on.contains(&TaskId::new("n2")));
}
