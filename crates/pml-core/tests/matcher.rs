// pml-core/tests/matcher.rs
// ============================================================================
// Module: Capability Matcher Tests
// Description: Hybrid scoring, adaptive thresholds, and algorithm traces.
// ============================================================================
//! ## Overview
//! Validates the scoring pipeline: cold-start pure-semantic mixing, the
//! multiplicative reliability factor, threshold acceptance, tie-breaks, and
//! the algorithm-trace acceptance invariant.

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

use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;
use pml_core::AlgorithmDecision;
use pml_core::AlgorithmMode;
use pml_core::AlgorithmTrace;
use pml_core::Capability;
use pml_core::CapabilityFqdn;
use pml_core::CapabilityId;
use pml_core::CapabilityStats;
use pml_core::CapabilityStore;
use pml_core::ContextHash;
use pml_core::DependencyGraphStore;
use pml_core::EmbedError;
use pml_core::Embedder;
use pml_core::Embedding;
use pml_core::ExecutionTrace;
use pml_core::HashDigest;
use pml_core::StoreError;
use pml_core::ThresholdRecord;
use pml_core::ThresholdStore;
use pml_core::Timestamp;
use pml_core::ToolId;
use pml_core::TraceRecorder;
use pml_core::UserId;
use pml_core::Visibility;
use pml_core::runtime::CapabilityMatcher;
use serde_json::json;

// ============================================================================
// SECTION: Doubles
// ============================================================================

/// Capability store returning a fixed candidate list.
struct FixedStore {
    /// Candidates returned by every intent search.
    candidates: Vec<(Capability, f64)>,
}

impl CapabilityStore for FixedStore {
    fn insert(&self, _capability: &Capability) -> Result<(), StoreError> {
        Ok(())
    }

    fn find_by_hash(&self, _hash: &HashDigest) -> Result<Option<Capability>, StoreError> {
        Ok(None)
    }

    fn get(&self, _id: &CapabilityId) -> Result<Option<Capability>, StoreError> {
        Ok(None)
    }

    fn find_by_fqdn(&self, _fqdn: &CapabilityFqdn) -> Result<Option<Capability>, StoreError> {
        Ok(None)
    }

    fn record_use(
        &self,
        _id: &CapabilityId,
        _success: bool,
        _duration_ms: u64,
        _at: Timestamp,
    ) -> Result<(), StoreError> {
        Ok(())
    }

    fn search_by_intent(
        &self,
        _embedding: &Embedding,
        _k: usize,
    ) -> Result<Vec<(Capability, f64)>, StoreError> {
        Ok(self.candidates.clone())
    }

    fn list_for_user(
        &self,
        _user_id: &UserId,
        _scope: Visibility,
        _limit: usize,
    ) -> Result<Vec<Capability>, StoreError> {
        Ok(Vec::new())
    }
}

/// Empty dependency graph (cold start).
struct EmptyGraph;

impl DependencyGraphStore for EmptyGraph {
    fn observe_edge(&self, _from: &ToolId, _to: &ToolId) -> Result<(), StoreError> {
        Ok(())
    }

    fn neighbors(&self, _tool: &ToolId) -> Result<Vec<(ToolId, f64)>, StoreError> {
        Ok(Vec::new())
    }

    fn node_count(&self) -> Result<usize, StoreError> {
        Ok(0)
    }

    fn edge_count(&self) -> Result<usize, StoreError> {
        Ok(0)
    }

    fn community(&self, _tool: &ToolId) -> Result<Option<i64>, StoreError> {
        Ok(None)
    }

    fn next_step_scores(&self, _tool: &ToolId) -> Result<Vec<(ToolId, f64)>, StoreError> {
        Ok(Vec::new())
    }
}

/// Threshold store with one scripted record.
struct FixedThresholds {
    /// Suggestion threshold applied to every context.
    threshold: Option<f64>,
}

impl ThresholdStore for FixedThresholds {
    fn get(&self, context_hash: &ContextHash) -> Result<Option<ThresholdRecord>, StoreError> {
        Ok(self.threshold.map(|threshold| ThresholdRecord {
            context_hash: context_hash.clone(),
            context_keys: Vec::new(),
            suggestion_threshold: threshold,
            explicit_threshold: 0.5,
            success_rate: 0.5,
            sample_count: 1,
        }))
    }

    fn record_outcome(
        &self,
        _context_hash: &ContextHash,
        _context_keys: &[String],
        _success: bool,
    ) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Embedder returning a fixed basis vector.
struct BasisEmbedder;

#[async_trait]
impl Embedder for BasisEmbedder {
    async fn embed(&self, _text: &str) -> Result<Embedding, EmbedError> {
        let mut values = vec![0.0f32; pml_core::EMBEDDING_DIM];
        values[0] = 1.0;
        Embedding::new(values).map_err(|err| EmbedError::Model(err.to_string()))
    }
}

/// Recorder collecting algorithm traces.
#[derive(Default, Clone)]
struct CollectingRecorder {
    /// Collected algorithm traces.
    traces: Arc<Mutex<Vec<AlgorithmTrace>>>,
}

impl TraceRecorder for CollectingRecorder {
    fn record_execution(&self, _trace: ExecutionTrace) {}

    fn record_algorithm(&self, trace: AlgorithmTrace) {
        self.traces.lock().unwrap().push(trace);
    }
}

/// Builds a candidate capability.
fn capability(name: &str, success_rate: f64, usage_count: u64) -> Capability {
    Capability {
        id: CapabilityId::new(name),
        fqdn: CapabilityFqdn::new("learned", name),
        code_snippet: "await mcp.fs.read({path: \"x\"});".to_string(),
        code_hash: None,
        parameters_schema: json!({"type": "object", "properties": {}}),
        intent_embedding: None,
        stats: CapabilityStats {
            success_rate,
            usage_count,
            avg_duration_ms: 10.0,
            last_used_at: Some(Timestamp::from_unix_millis(1_000)),
        },
        visibility: Visibility::Private,
        created_by: UserId::new("tester"),
        created_at: Timestamp::from_unix_millis(0),
        permission_set: pml_core::PermissionSet::Minimal,
        permission_confidence: 0.5,
        community_id: None,
    }
}

/// Builds a matcher over the doubles.
fn matcher(
    candidates: Vec<(Capability, f64)>,
    threshold: Option<f64>,
    recorder: CollectingRecorder,
) -> CapabilityMatcher {
    CapabilityMatcher::new(
        Arc::new(FixedStore {
            candidates,
        }),
        Arc::new(EmptyGraph),
        Arc::new(FixedThresholds {
            threshold,
        }),
        Arc::new(BasisEmbedder),
        Arc::new(recorder),
    )
}

// ============================================================================
// SECTION: Tests
// ============================================================================

/// On an empty graph the mixing weight is pure semantic and a reliable,
/// similar candidate clears the default threshold.
#[tokio::test]
async fn test_cold_start_accepts_reliable_candidate() {
    let recorder = CollectingRecorder::default();
    let matcher = matcher(vec![(capability("cap-a", 1.0, 3), 0.9)], None, recorder.clone());

    let result = matcher
        .best_match("read the file", &[], AlgorithmMode::PassiveSuggestion, None)
        .await
        .unwrap()
        .expect("expected an accepted match");

    // alpha = 1, base = 0.9, reliability = 1.0: final = 0.9 >= 0.70.
    assert!((result.final_score - 0.9).abs() < 1e-9);

    let traces = recorder.traces.lock().unwrap();
    assert_eq!(traces.len(), 1);
    assert_eq!(traces[0].decision, AlgorithmDecision::Accepted);
    assert!((traces[0].params.alpha - 1.0).abs() < 1e-9);
}

/// The reliability factor is multiplicative: an unreliable candidate is
/// halved below the threshold and rejected.
#[tokio::test]
async fn test_reliability_is_multiplicative() {
    let recorder = CollectingRecorder::default();
    let matcher = matcher(vec![(capability("cap-b", 0.0, 5), 0.9)], None, recorder.clone());

    let result = matcher
        .best_match("read the file", &[], AlgorithmMode::PassiveSuggestion, None)
        .await
        .unwrap();
    // final = 0.9 * 0.5 = 0.45 < 0.70.
    assert!(result.is_none());

    let traces = recorder.traces.lock().unwrap();
    assert_eq!(traces[0].decision, AlgorithmDecision::RejectedByThreshold);
    assert!((traces[0].params.reliability_factor - 0.5).abs() < 1e-9);
    assert!((traces[0].final_score - 0.45).abs() < 1e-9);
}

/// Stored adaptive thresholds clamp into their range before use.
#[tokio::test]
async fn test_threshold_clamped_to_range() {
    let recorder = CollectingRecorder::default();
    // A stored threshold of 0.99 clamps to 0.90.
    let matcher =
        matcher(vec![(capability("cap-c", 1.0, 1), 0.95)], Some(0.99), recorder.clone());

    let result = matcher
        .best_match("read the file", &[], AlgorithmMode::ActiveSearch, None)
        .await
        .unwrap();
    assert!(result.is_some());

    let traces = recorder.traces.lock().unwrap();
    assert!((traces[0].threshold_used - 0.90).abs() < 1e-9);
}

/// Ties break on usage count.
#[tokio::test]
async fn test_tie_break_on_usage() {
    let recorder = CollectingRecorder::default();
    let matcher = matcher(
        vec![
            (capability("cap-low", 1.0, 1), 0.9),
            (capability("cap-high", 1.0, 9), 0.9),
        ],
        None,
        recorder.clone(),
    );

    let result = matcher
        .best_match("read the file", &[], AlgorithmMode::PassiveSuggestion, None)
        .await
        .unwrap()
        .expect("expected a match");
    assert_eq!(result.capability.id.as_str(), "cap-high");
}

/// Every emitted trace satisfies the acceptance invariant.
#[tokio::test]
async fn test_trace_acceptance_invariant() {
    let recorder = CollectingRecorder::default();
    let matcher = matcher(
        vec![
            (capability("cap-1", 1.0, 1), 0.95),
            (capability("cap-2", 0.4, 1), 0.8),
            (capability("cap-3", 0.9, 1), 0.2),
        ],
        None,
        recorder.clone(),
    );
    let _ = matcher
        .best_match("do the thing", &[], AlgorithmMode::PassiveSuggestion, None)
        .await
        .unwrap();

    for trace in recorder.traces.lock().unwrap().iter() {
        let accepted = trace.decision == AlgorithmDecision::Accepted;
        let clears = trace.final_score >= trace.threshold_used
            && trace.params.reliability_factor >= 0.5;
        assert_eq!(accepted, clears);
    }
}
