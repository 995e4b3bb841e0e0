// pml-providers/tests/providers.rs
// ============================================================================
// Module: Provider Tests
// Description: Hash embedder determinism and registry availability.
// ============================================================================
//! ## Overview
//! Validates the deterministic embedder's stability and unit norm plus the
//! downstream registry's server/client tool resolution.

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

use pml_core::ToolId;
use pml_providers::DownstreamRegistry;
use pml_providers::HashEmbedder;
use pml_providers::ServerEntry;
use url::Url;

/// Identical text embeds identically; different text differs.
#[test]
fn test_hash_embedder_deterministic() {
    let a = HashEmbedder::embed_text("read the file").unwrap();
    let b = HashEmbedder::embed_text("read the file").unwrap();
    let c = HashEmbedder::embed_text("send an email").unwrap();
    assert_eq!(a, b);
    assert!((a.cosine(&b) - 1.0).abs() < 1e-6);
    assert!(a.cosine(&c) < 0.99);
}

/// Embeddings are unit-normalized.
#[test]
fn test_hash_embedder_unit_norm() {
    let embedding = HashEmbedder::embed_text("normalize me please").unwrap();
    let norm: f64 =
        embedding.as_slice().iter().map(|v| f64::from(*v) * f64::from(*v)).sum::<f64>().sqrt();
    assert!((norm - 1.0).abs() < 1e-4);
}

/// Degenerate input still embeds deterministically.
#[test]
fn test_hash_embedder_degenerate_input() {
    let empty = HashEmbedder::embed_text("").unwrap();
    let punct = HashEmbedder::embed_text("!!! ...").unwrap();
    assert_eq!(empty, punct);
}

/// Registry resolves server tools, client tools, and pseudo-tools.
#[test]
fn test_registry_resolution() {
    let registry = DownstreamRegistry::new();
    registry.register_server("fs", ServerEntry {
        endpoint: Url::parse("http://127.0.0.1:9100/rpc").unwrap(),
        tools: vec![("read".to_string(), "Read a file".to_string())],
    });
    registry.register_client_tool(&ToolId::qualified("browser", "click"));

    assert!(registry.is_server_tool(&ToolId::qualified("fs", "read")));
    assert!(registry.is_server_tool(&ToolId::pseudo("map")));
    assert!(!registry.is_server_tool(&ToolId::qualified("browser", "click")));
    assert!(registry.is_client_tool(&ToolId::qualified("browser", "click")));
    assert!(registry.server_endpoint("fs").is_some());
    assert!(registry.server_endpoint("browser").is_none());

    let tools = registry.all_tools();
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].0, ToolId::qualified("fs", "read"));
}
