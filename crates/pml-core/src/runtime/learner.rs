// pml-core/src/runtime/learner.rs
// ============================================================================
// Module: Capability Learner
// Description: Eager capability learning from successful executions.
// Purpose: Deduplicate by canonical hash and persist normalized snippets.
// Dependencies: crate::core, crate::interfaces, crate::structure
// ============================================================================

//! ## Overview
//! On a successful code execution the learner builds the snippet's canonical
//! structure, hashes it, normalizes variable names, and either records a use
//! against the existing capability with the same hash or inserts a new one.
//! The `capability.learned` event is the only training trigger; model
//! retraining is collaborator-owned.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use serde_json::Value;
use serde_json::json;
use thiserror::Error;

use crate::core::capability::Capability;
use crate::core::capability::CapabilityStats;
use crate::core::capability::SaveOutcome;
use crate::core::capability::Visibility;
use crate::core::events::GatewayEvent;
use crate::core::hashing::HashError;
use crate::core::identifiers::CapabilityFqdn;
use crate::core::identifiers::CapabilityId;
use crate::core::identifiers::UserId;
use crate::core::structure::StaticStructure;
use crate::core::task::PermissionSet;
use crate::core::time::Timestamp;
use crate::interfaces::CapabilityStore;
use crate::interfaces::EmbedError;
use crate::interfaces::Embedder;
use crate::interfaces::EventPublisher;
use crate::interfaces::StoreError;
use crate::structure::ParseError;
use crate::structure::build_structure;
use crate::structure::normalize_snippet;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Capability learning errors.
#[derive(Debug, Error)]
pub enum LearnError {
    /// The snippet failed to parse.
    #[error(transparent)]
    Parse(#[from] ParseError),
    /// Canonical hashing failed.
    #[error(transparent)]
    Hash(#[from] HashError),
    /// Embedding the intent failed.
    #[error(transparent)]
    Embed(#[from] EmbedError),
    /// Store access failed.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// An existing capability shares the hash but not the body.
    #[error("capability hash collision with mismatched body: {0}")]
    Conflict(String),
}

// ============================================================================
// SECTION: Learner
// ============================================================================

/// Eager capability learner.
pub struct CapabilityLearner {
    /// Capability storage.
    store: Arc<dyn CapabilityStore>,
    /// Embedding collaborator.
    embedder: Arc<dyn Embedder>,
    /// Event bus surface.
    publisher: Arc<dyn EventPublisher>,
}

impl CapabilityLearner {
    /// Creates a learner over the provided interfaces.
    #[must_use]
    pub fn new(
        store: Arc<dyn CapabilityStore>,
        embedder: Arc<dyn Embedder>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            store,
            embedder,
            publisher,
        }
    }

    /// Saves a capability learned from a successful execution.
    ///
    /// Deduplication is by canonical structure hash: a snippet differing only
    /// in variable names or whitespace resolves to the existing capability,
    /// whose statistics are updated instead.
    ///
    /// # Errors
    ///
    /// Returns [`LearnError`] on parse, hash, embedding, or store failures,
    /// and [`LearnError::Conflict`] on a hash collision with a mismatched
    /// body.
    pub async fn save(
        &self,
        code: &str,
        intent: &str,
        user_id: &UserId,
        duration_ms: u64,
    ) -> Result<SaveOutcome, LearnError> {
        let structure = build_structure(code)?;
        let code_hash = structure.canonical_hash()?;
        let normalized = normalize_snippet(code, &structure)?;
        let now = Timestamp::now();

        if let Some(existing) = self.store.find_by_hash(&code_hash)? {
            if existing.code_snippet != normalized {
                return Err(LearnError::Conflict(code_hash.value));
            }
            self.store.record_use(&existing.id, true, duration_ms, now)?;
            self.publisher.publish(GatewayEvent::CapabilityUpdated {
                capability_id: existing.id.clone(),
            });
            return Ok(SaveOutcome {
                capability_id: existing.id,
                is_new: false,
            });
        }

        let intent_embedding = self.embedder.embed(intent).await?;
        let (permission_set, permission_confidence) = infer_permission(&structure);
        let capability = Capability {
            id: CapabilityId::generate(),
            fqdn: derive_fqdn(intent),
            code_snippet: normalized,
            code_hash: Some(code_hash.clone()),
            parameters_schema: parameters_schema(&structure),
            intent_embedding: Some(intent_embedding),
            stats: CapabilityStats::default(),
            visibility: Visibility::Private,
            created_by: user_id.clone(),
            created_at: now,
            permission_set,
            permission_confidence,
            community_id: None,
        };

        match self.store.insert(&capability) {
            Ok(()) => {}
            Err(StoreError::Conflict(_)) => {
                // Concurrent save of the same structure: fall back to the
                // winner and record the use there.
                let existing = self
                    .store
                    .find_by_hash(&code_hash)?
                    .ok_or_else(|| StoreError::Missing(code_hash.value.clone()))?;
                self.store.record_use(&existing.id, true, duration_ms, now)?;
                return Ok(SaveOutcome {
                    capability_id: existing.id,
                    is_new: false,
                });
            }
            Err(other) => return Err(other.into()),
        }
        self.store.record_use(&capability.id, true, duration_ms, now)?;

        self.publisher.publish(GatewayEvent::CapabilityLearned {
            capability_id: capability.id.clone(),
            fqdn: capability.fqdn.clone(),
            code_hash,
        });
        Ok(SaveOutcome {
            capability_id: capability.id,
            is_new: true,
        })
    }
}

// ============================================================================
// SECTION: Derivations
// ============================================================================

/// Derives a capability FQDN from the intent text.
fn derive_fqdn(intent: &str) -> CapabilityFqdn {
    let action: String = intent
        .to_lowercase()
        .split_whitespace()
        .filter(|word| word.chars().any(char::is_alphanumeric))
        .take(3)
        .map(|word| {
            word.chars().filter(char::is_ascii_alphanumeric).collect::<String>()
        })
        .collect::<Vec<_>>()
        .join("_");
    if action.is_empty() {
        CapabilityFqdn::new("learned", "capability")
    } else {
        CapabilityFqdn::new("learned", action)
    }
}

/// Builds a JSON-schema-like object from inferred parameters.
fn parameters_schema(structure: &StaticStructure) -> Value {
    let mut properties = serde_json::Map::new();
    for name in &structure.parameters {
        properties.insert(name.clone(), json!({ "type": "string" }));
    }
    let required: Vec<&String> = structure.parameters.iter().collect();
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

/// Infers the permission set from the referenced tools.
fn infer_permission(structure: &StaticStructure) -> (PermissionSet, f64) {
    let mut has_external = false;
    let mut has_filesystem = false;
    for node in &structure.nodes {
        if let Some(tool) = &node.tool {
            if tool.is_pseudo() {
                continue;
            }
            has_external = true;
            if tool.server().is_some_and(|server| server == "fs" || server == "filesystem") {
                has_filesystem = true;
            }
        }
    }
    if !has_external {
        (PermissionSet::Minimal, 0.9)
    } else if has_filesystem {
        (PermissionSet::Filesystem, 0.6)
    } else {
        (PermissionSet::McpStandard, 0.6)
    }
}
