// pml-store-sqlite/tests/store.rs
// ============================================================================
// Module: SQLite Gateway Store Tests
// Description: Capability dedup, trace idempotency, checkpoints, thresholds.
// ============================================================================
//! ## Overview
//! Validates the persistent interfaces over a temporary WAL database: the
//! unique code-hash constraint, online stats updates, cosine top-k search,
//! idempotent trace inserts, checkpoint pruning, threshold clamping, and
//! dependency-graph counters.

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

use pml_core::Capability;
use pml_core::CapabilityFqdn;
use pml_core::CapabilityId;
use pml_core::CapabilityStats;
use pml_core::CapabilityStore;
use pml_core::Checkpoint;
use pml_core::CheckpointId;
use pml_core::CheckpointStore;
use pml_core::ContextHash;
use pml_core::DependencyGraphStore;
use pml_core::EMBEDDING_DIM;
use pml_core::Embedding;
use pml_core::ExecutionSnapshot;
use pml_core::ExecutionTrace;
use pml_core::HashDigest;
use pml_core::PermissionSet;
use pml_core::StoreError;
use pml_core::ThresholdStore;
use pml_core::Timestamp;
use pml_core::ToolId;
use pml_core::ToolIndex;
use pml_core::TraceId;
use pml_core::TraceStore;
use pml_core::UserId;
use pml_core::Visibility;
use pml_core::WorkflowId;
use pml_store_sqlite::SqliteGatewayStore;
use pml_store_sqlite::SqliteStoreConfig;
use serde_json::json;

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Opens a store over a fresh temporary database.
fn open_store() -> (SqliteGatewayStore, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let store =
        SqliteGatewayStore::open(&SqliteStoreConfig::for_path(dir.path().join("gateway.db")))
            .unwrap();
    (store, dir)
}

/// Builds a basis embedding with one hot component.
fn basis(index: usize) -> Embedding {
    let mut values = vec![0.0f32; EMBEDDING_DIM];
    values[index] = 1.0;
    Embedding::new(values).unwrap()
}

/// Builds a capability with the provided hash value.
fn capability(id: &str, hash: &str, embedding: Option<Embedding>) -> Capability {
    Capability {
        id: CapabilityId::new(id),
        fqdn: CapabilityFqdn::new("learned", id),
        code_snippet: "await mcp.fs.read({path: \"x\"});".to_string(),
        code_hash: Some(HashDigest::from_hex(hash)),
        parameters_schema: json!({"type": "object", "properties": {}}),
        intent_embedding: embedding,
        stats: CapabilityStats::default(),
        visibility: Visibility::Private,
        created_by: UserId::new("tester"),
        created_at: Timestamp::from_unix_millis(0),
        permission_set: PermissionSet::Minimal,
        permission_confidence: 0.5,
        community_id: None,
    }
}

/// Builds a minimal execution trace.
fn trace(id: &str) -> ExecutionTrace {
    ExecutionTrace {
        id: TraceId::new(id),
        capability_id: None,
        intent_text: Some("test".to_string()),
        intent_embedding: None,
        executed_at: Timestamp::from_unix_millis(10),
        success: true,
        duration_ms: 5,
        error_type: None,
        user_id: UserId::new("tester"),
        executed_path: vec![ToolId::qualified("fs", "read")],
        decisions: Vec::new(),
        task_results: Vec::new(),
        priority: 0.5,
        parent_trace_id: None,
    }
}

// ============================================================================
// SECTION: Capability Store
// ============================================================================

/// Inserting a duplicate code hash is a conflict; lookup round-trips.
#[test]
fn test_code_hash_unique_constraint() {
    let (store, _dir) = open_store();
    store.insert(&capability("cap-1", "hash-a", None)).unwrap();

    let found = store
        .find_by_hash(&HashDigest::from_hex("hash-a"))
        .unwrap()
        .expect("capability must round-trip");
    assert_eq!(found.id.as_str(), "cap-1");
    assert_eq!(found.fqdn.to_string(), "learned.cap-1");

    let conflict = store.insert(&capability("cap-2", "hash-a", None));
    assert!(matches!(conflict, Err(StoreError::Conflict(_))));
}

/// Stats fold online: usage count, success rate, and mean duration.
#[test]
fn test_record_use_updates_stats() {
    let (store, _dir) = open_store();
    store.insert(&capability("cap-s", "hash-s", None)).unwrap();
    let id = CapabilityId::new("cap-s");

    store.record_use(&id, true, 100, Timestamp::from_unix_millis(1)).unwrap();
    store.record_use(&id, false, 200, Timestamp::from_unix_millis(2)).unwrap();

    let found = CapabilityStore::get(&store, &id).unwrap().unwrap();
    assert_eq!(found.stats.usage_count, 2);
    assert!((found.stats.success_rate - 0.5).abs() < 1e-9);
    assert!((found.stats.avg_duration_ms - 150.0).abs() < 1e-9);
    assert_eq!(found.stats.last_used_at, Some(Timestamp::from_unix_millis(2)));

    let missing = store.record_use(
        &CapabilityId::new("cap-none"),
        true,
        1,
        Timestamp::from_unix_millis(3),
    );
    assert!(matches!(missing, Err(StoreError::Missing(_))));
}

/// Intent search ranks by cosine similarity and respects k.
#[test]
fn test_search_by_intent_ranks() {
    let (store, _dir) = open_store();
    store.insert(&capability("cap-near", "hash-n", Some(basis(0)))).unwrap();
    store.insert(&capability("cap-far", "hash-f", Some(basis(1)))).unwrap();

    let hits = store.search_by_intent(&basis(0), 1).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].0.id.as_str(), "cap-near");
    assert!((hits[0].1 - 1.0).abs() < 1e-6);
}

// ============================================================================
// SECTION: Trace Store
// ============================================================================

/// Duplicate trace inserts are no-ops.
#[test]
fn test_trace_insert_idempotent() {
    let (store, _dir) = open_store();
    store.insert_executions(&[trace("t-1"), trace("t-2")]).unwrap();
    store.insert_executions(&[trace("t-1")]).unwrap();
    // A second identical batch must also be accepted silently.
    store.insert_executions(&[trace("t-1"), trace("t-2")]).unwrap();
}

// ============================================================================
// SECTION: Checkpoint Store
// ============================================================================

/// Only the most recent N checkpoints survive per workflow.
#[test]
fn test_checkpoint_prune_to_keep() {
    let (store, _dir) = open_store();
    let workflow_id = WorkflowId::new("wf-ckpt");
    for index in 0..4i64 {
        store
            .save(
                &Checkpoint {
                    id: CheckpointId::new(format!("ckpt-{index}")),
                    workflow_id: workflow_id.clone(),
                    timestamp: Timestamp::from_unix_millis(index),
                    layer: usize::try_from(index).unwrap(),
                    state: ExecutionSnapshot::default(),
                },
                2,
            )
            .unwrap();
    }

    let latest = store.latest(&workflow_id).unwrap().unwrap();
    assert_eq!(latest.id.as_str(), "ckpt-3");
    // The oldest checkpoints were pruned.
    assert!(CheckpointStore::get(&store, &CheckpointId::new("ckpt-0")).unwrap().is_none());
    assert!(CheckpointStore::get(&store, &CheckpointId::new("ckpt-1")).unwrap().is_none());
    assert!(CheckpointStore::get(&store, &CheckpointId::new("ckpt-2")).unwrap().is_some());

    store.delete_for(&workflow_id).unwrap();
    assert!(store.latest(&workflow_id).unwrap().is_none());
}

// ============================================================================
// SECTION: Threshold Store
// ============================================================================

/// Threshold nudges stay inside their clamp ranges.
#[test]
fn test_threshold_clamping() {
    let (store, _dir) = open_store();
    let hash = ContextHash::new("ctx-1");
    let keys = vec!["fs:read".to_string()];

    for _ in 0..60 {
        store.record_outcome(&hash, &keys, false).unwrap();
    }
    let record = ThresholdStore::get(&store, &hash).unwrap().unwrap();
    assert!((record.suggestion_threshold - 0.90).abs() < 1e-9);
    assert!((record.explicit_threshold - 0.80).abs() < 1e-9);
    assert_eq!(record.sample_count, 60);

    for _ in 0..120 {
        store.record_outcome(&hash, &keys, true).unwrap();
    }
    let record = ThresholdStore::get(&store, &hash).unwrap().unwrap();
    assert!((record.suggestion_threshold - 0.40).abs() < 1e-9);
    assert!((record.explicit_threshold - 0.30).abs() < 1e-9);
}

// ============================================================================
// SECTION: Dependency Graph and Tool Index
// ============================================================================

/// Edge observations accumulate counts and surface as neighbors.
#[test]
fn test_graph_observations() {
    let (store, _dir) = open_store();
    let read = ToolId::qualified("fs", "read");
    let parse = ToolId::qualified("json", "parse");

    store.observe_edge(&read, &parse).unwrap();
    store.observe_edge(&read, &parse).unwrap();

    assert_eq!(store.edge_count().unwrap(), 1);
    assert_eq!(store.node_count().unwrap(), 2);

    let neighbors = store.neighbors(&read).unwrap();
    assert_eq!(neighbors.len(), 1);
    assert_eq!(neighbors[0].0, parse);

    let next = store.next_step_scores(&read).unwrap();
    assert_eq!(next[0].0, parse);
    assert!(next[0].1 > 0.0);
}

/// Tool registration upserts and search ranks by similarity.
#[test]
fn test_tool_index_search() {
    let (store, _dir) = open_store();
    let read = ToolId::qualified("fs", "read");
    let send = ToolId::qualified("email", "send");
    store.register_tool(&read, "Read a file", &basis(0)).unwrap();
    store.register_tool(&send, "Send an email", &basis(1)).unwrap();

    let hits = store.search_tools(&basis(0), 2).unwrap();
    assert_eq!(hits[0].tool, read);
    assert!(hits[0].score > hits[1].score);
}
