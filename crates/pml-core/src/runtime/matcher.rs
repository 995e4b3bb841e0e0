// pml-core/src/runtime/matcher.rs
// ============================================================================
// Module: Capability Matcher
// Description: Hybrid semantic-plus-graph scoring of stored capabilities.
// Purpose: Rank capabilities against an intent with adaptive thresholds.
// Dependencies: crate::core, crate::interfaces, crate::structure
// ============================================================================

//! ## Overview
//! The matcher blends intent-embedding similarity with dependency-graph
//! signals. The mixing weight adapts to graph density (a cold, empty graph is
//! scored purely semantically), reliability multiplies the base score, and a
//! small structural boost rewards community matches. Every scoring decision
//! emits an algorithm trace; acceptance requires clearing both the adaptive
//! threshold and the reliability floor.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;
use std::sync::Arc;

use thiserror::Error;

use crate::core::capability::Capability;
use crate::core::embedding::Embedding;
use crate::core::hashing::hash_canonical_json;
use crate::core::identifiers::ContextHash;
use crate::core::identifiers::CorrelationId;
use crate::core::identifiers::ToolId;
use crate::core::identifiers::TraceId;
use crate::core::time::Timestamp;
use crate::core::trace::AlgorithmDecision;
use crate::core::trace::AlgorithmMode;
use crate::core::trace::AlgorithmTrace;
use crate::core::trace::ScoreParams;
use crate::core::trace::SignalSet;
use crate::core::trace::TargetKind;
use crate::interfaces::CapabilityStore;
use crate::interfaces::DependencyGraphStore;
use crate::interfaces::EmbedError;
use crate::interfaces::Embedder;
use crate::interfaces::StoreError;
use crate::interfaces::ThresholdStore;
use crate::interfaces::TraceRecorder;
use crate::structure::build_structure;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Semantic candidate pool size.
const CANDIDATE_POOL: usize = 20;

/// Default suggestion threshold when no adaptive record exists.
const DEFAULT_THRESHOLD: f64 = 0.70;

/// Adaptive threshold clamp range.
const THRESHOLD_RANGE: (f64, f64) = (0.40, 0.90);

/// Reliability floor below which candidates are filtered outright.
const RELIABILITY_FLOOR: f64 = 0.5;

/// Structural boost applied on community match.
const STRUCTURAL_BOOST: f64 = 0.05;

/// Name recorded on algorithm traces emitted by the matcher.
const ALGORITHM_NAME: &str = "hybrid_capability_match";

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Matcher errors.
#[derive(Debug, Error)]
pub enum MatchError {
    /// Embedding the intent failed.
    #[error(transparent)]
    Embed(#[from] EmbedError),
    /// A store lookup failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

// ============================================================================
// SECTION: Match Result
// ============================================================================

/// Accepted capability match.
#[derive(Debug, Clone)]
pub struct MatchResult {
    /// Matched capability.
    pub capability: Capability,
    /// Final clamped score.
    pub final_score: f64,
    /// Intent embedding computed for the query.
    pub intent_embedding: Embedding,
    /// Algorithm trace identifier for the accepting decision.
    pub trace_id: TraceId,
}

// ============================================================================
// SECTION: Matcher
// ============================================================================

/// Hybrid semantic-plus-graph capability matcher.
pub struct CapabilityMatcher {
    /// Capability storage.
    store: Arc<dyn CapabilityStore>,
    /// Dependency graph signals.
    graph: Arc<dyn DependencyGraphStore>,
    /// Adaptive threshold map.
    thresholds: Arc<dyn ThresholdStore>,
    /// Embedding collaborator.
    embedder: Arc<dyn Embedder>,
    /// Trace sink surface.
    recorder: Arc<dyn TraceRecorder>,
}

impl CapabilityMatcher {
    /// Creates a matcher over the provided interfaces.
    #[must_use]
    pub fn new(
        store: Arc<dyn CapabilityStore>,
        graph: Arc<dyn DependencyGraphStore>,
        thresholds: Arc<dyn ThresholdStore>,
        embedder: Arc<dyn Embedder>,
        recorder: Arc<dyn TraceRecorder>,
    ) -> Self {
        Self {
            store,
            graph,
            thresholds,
            embedder,
            recorder,
        }
    }

    /// Returns the best accepted capability for an intent, or `None`.
    ///
    /// Ties break on higher usage count, then more recent use.
    ///
    /// # Errors
    ///
    /// Returns [`MatchError`] when embedding or store access fails.
    pub async fn best_match(
        &self,
        intent: &str,
        context_tools: &[ToolId],
        mode: AlgorithmMode,
        correlation_id: Option<CorrelationId>,
    ) -> Result<Option<MatchResult>, MatchError> {
        let query = self.embedder.embed(intent).await?;
        let candidates = self.store.search_by_intent(&query, CANDIDATE_POOL)?;
        if candidates.is_empty() {
            return Ok(None);
        }

        let density = self.graph_density()?;
        let alpha = if density == 0.0 { 1.0 } else { (1.0 - 2.0 * density).max(0.5) };
        let context_hash = context_hash(context_tools);
        let threshold = self.threshold_for(&context_hash)?;
        let context_community = self.dominant_community(context_tools)?;

        let mut accepted: Vec<(Capability, f64, TraceId)> = Vec::new();
        for (capability, semantic_score) in candidates {
            let graph_score = self.graph_score(&capability, context_tools)?;
            let success_rate = capability.stats.success_rate.clamp(0.0, 1.0);
            let cluster_match = match (context_community, capability.community_id) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            };

            let base_score = alpha * semantic_score + (1.0 - alpha) * graph_score;
            let reliability_factor = 0.5 + 0.5 * success_rate;
            let structural_boost = if cluster_match { STRUCTURAL_BOOST } else { 0.0 };
            let final_score =
                (base_score * reliability_factor + structural_boost).clamp(0.0, 1.0);

            let decision = if reliability_factor < RELIABILITY_FLOOR {
                AlgorithmDecision::FilteredByReliability
            } else if final_score >= threshold {
                AlgorithmDecision::Accepted
            } else {
                AlgorithmDecision::RejectedByThreshold
            };

            let trace_id = TraceId::generate();
            self.recorder.record_algorithm(AlgorithmTrace {
                trace_id: trace_id.clone(),
                correlation_id: correlation_id.clone(),
                algorithm_name: ALGORITHM_NAME.to_string(),
                mode,
                target_type: TargetKind::Capability,
                intent: Some(intent.to_string()),
                context_hash: Some(context_hash.clone()),
                signals: SignalSet {
                    semantic_score,
                    graph_score,
                    success_rate,
                    spectral_cluster_match: cluster_match,
                    graph_density: density,
                },
                params: ScoreParams {
                    alpha,
                    reliability_factor,
                    structural_boost,
                },
                final_score,
                threshold_used: threshold,
                decision,
                outcome: None,
                timestamp: Timestamp::now(),
            });

            if decision == AlgorithmDecision::Accepted {
                accepted.push((capability, final_score, trace_id));
            }
        }

        accepted.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.0.stats.usage_count.cmp(&a.0.stats.usage_count))
                .then_with(|| b.0.stats.last_used_at.cmp(&a.0.stats.last_used_at))
        });

        Ok(accepted.into_iter().next().map(|(capability, final_score, trace_id)| MatchResult {
            capability,
            final_score,
            intent_embedding: query.clone(),
            trace_id,
        }))
    }

    /// Returns the dependency graph density `|E| / (|V| * (|V| - 1))`.
    fn graph_density(&self) -> Result<f64, MatchError> {
        let nodes = self.graph.node_count()?;
        let edges = self.graph.edge_count()?;
        if nodes < 2 {
            return Ok(0.0);
        }
        #[allow(
            clippy::cast_precision_loss,
            reason = "Graph sizes stay far below the f64 integer range."
        )]
        let density = edges as f64 / (nodes as f64 * (nodes as f64 - 1.0));
        Ok(density.clamp(0.0, 1.0))
    }

    /// Returns the adaptive suggestion threshold for a context hash.
    fn threshold_for(&self, context_hash: &ContextHash) -> Result<f64, MatchError> {
        let threshold = self
            .thresholds
            .get(context_hash)?
            .map_or(DEFAULT_THRESHOLD, |record| record.suggestion_threshold);
        Ok(threshold.clamp(THRESHOLD_RANGE.0, THRESHOLD_RANGE.1))
    }

    /// Returns the dominant community among the context tools.
    fn dominant_community(&self, context_tools: &[ToolId]) -> Result<Option<i64>, MatchError> {
        let mut counts: std::collections::BTreeMap<i64, usize> = std::collections::BTreeMap::new();
        for tool in context_tools {
            if let Some(community) = self.graph.community(tool)? {
                *counts.entry(community).or_default() += 1;
            }
        }
        Ok(counts.into_iter().max_by_key(|(_, count)| *count).map(|(community, _)| community))
    }

    /// Combined Adamic-Adar plus direct-edge signal between a capability's
    /// tools and the context tools, squashed into `[0, 1]`.
    fn graph_score(
        &self,
        capability: &Capability,
        context_tools: &[ToolId],
    ) -> Result<f64, MatchError> {
        if context_tools.is_empty() {
            return Ok(0.0);
        }
        let capability_tools = capability_tools(capability);
        if capability_tools.is_empty() {
            return Ok(0.0);
        }

        let mut raw = 0.0f64;
        for context_tool in context_tools {
            let context_neighbors = self.graph.neighbors(context_tool)?;
            let context_set: BTreeSet<&ToolId> =
                context_neighbors.iter().map(|(tool, _)| tool).collect();
            for capability_tool in &capability_tools {
                let capability_neighbors = self.graph.neighbors(capability_tool)?;
                if context_set.contains(capability_tool)
                    || capability_neighbors.iter().any(|(tool, _)| tool == context_tool)
                {
                    raw += 0.5;
                }
                for (shared, _) in &capability_neighbors {
                    if context_set.contains(shared) {
                        let degree = self.graph.neighbors(shared)?.len();
                        if degree > 1 {
                            #[allow(
                                clippy::cast_precision_loss,
                                reason = "Neighbor counts stay far below the f64 integer range."
                            )]
                            let weight = 1.0 / (degree as f64).ln();
                            raw += weight;
                        }
                    }
                }
            }
        }
        Ok(raw / (1.0 + raw))
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Extracts the tool set referenced by a capability's canonical snippet.
fn capability_tools(capability: &Capability) -> Vec<ToolId> {
    build_structure(&capability.code_snippet)
        .map(|structure| {
            structure
                .nodes
                .iter()
                .filter_map(|node| node.tool.clone())
                .filter(|tool| !tool.is_pseudo())
                .collect()
        })
        .unwrap_or_default()
}

/// Hashes the sorted context tool names into the threshold map key.
#[must_use]
pub fn context_hash(context_tools: &[ToolId]) -> ContextHash {
    let mut names: Vec<&str> = context_tools.iter().map(ToolId::as_str).collect();
    names.sort_unstable();
    names.dedup();
    let digest = hash_canonical_json(&names)
        .map_or_else(|_| String::from("empty"), |digest| digest.value);
    ContextHash::new(digest)
}
