// pml-providers/src/embedder.rs
// ============================================================================
// Module: Embedding Providers
// Description: Deterministic local embedder and HTTP embedding client.
// Purpose: Supply the opaque embed(text) collaborator behind one interface.
// Dependencies: pml-core, reqwest, sha2
// ============================================================================

//! ## Overview
//! The embedding model is an external collaborator. [`HttpEmbedder`] calls a
//! deployed model endpoint; [`HashEmbedder`] is a deterministic feature-hash
//! fallback for local runs and tests. Both produce unit vectors of the fixed
//! dimension, so downstream cosine scoring is identical.

// ============================================================================
// SECTION: Imports
// ============================================================================

use async_trait::async_trait;
use pml_core::EMBEDDING_DIM;
use pml_core::EmbedError;
use pml_core::Embedder;
use pml_core::Embedding;
use serde::Deserialize;
use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;
use url::Url;

// ============================================================================
// SECTION: Hash Embedder
// ============================================================================

/// Deterministic feature-hash embedder for local runs and tests.
///
/// # Invariants
/// - Identical text always embeds to the identical unit vector.
#[derive(Debug, Default, Clone, Copy)]
pub struct HashEmbedder;

impl HashEmbedder {
    /// Creates the hash embedder.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Embeds text synchronously.
    ///
    /// # Errors
    ///
    /// Returns [`EmbedError`] only for degenerate input (empty vocabulary).
    pub fn embed_text(text: &str) -> Result<Embedding, EmbedError> {
        let mut values = vec![0.0f32; EMBEDDING_DIM];
        let lowered = text.to_lowercase();
        let tokens: Vec<&str> =
            lowered.split(|ch: char| !ch.is_alphanumeric()).filter(|t| !t.is_empty()).collect();
        for window in 1..=2usize {
            for gram in tokens.windows(window) {
                let joined = gram.join(" ");
                let digest = Sha256::digest(joined.as_bytes());
                let index = usize::from(digest[0]) << 8 | usize::from(digest[1]);
                let sign = if digest[2] & 1 == 0 { 1.0 } else { -1.0 };
                values[index % EMBEDDING_DIM] += sign;
            }
        }
        if values.iter().all(|v| *v == 0.0) {
            // Degenerate input embeds to a fixed basis vector.
            values[0] = 1.0;
        }
        Embedding::new(values).map_err(|err| EmbedError::Model(err.to_string()))
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Embedding, EmbedError> {
        Self::embed_text(text)
    }
}

// ============================================================================
// SECTION: HTTP Embedder
// ============================================================================

/// Request payload for the embedding endpoint.
#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    /// Text to embed.
    text: &'a str,
}

/// Response payload from the embedding endpoint.
#[derive(Debug, Deserialize)]
struct EmbedResponse {
    /// Raw embedding vector.
    embedding: Vec<f32>,
}

/// HTTP client for a deployed embedding model.
pub struct HttpEmbedder {
    /// Endpoint URL.
    endpoint: Url,
    /// Shared HTTP client.
    client: reqwest::Client,
}

impl HttpEmbedder {
    /// Creates an embedder for the provided endpoint.
    #[must_use]
    pub fn new(endpoint: Url) -> Self {
        Self {
            endpoint,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, text: &str) -> Result<Embedding, EmbedError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&EmbedRequest {
                text,
            })
            .send()
            .await
            .map_err(|err| EmbedError::Model(err.to_string()))?;
        if !response.status().is_success() {
            return Err(EmbedError::Model(format!(
                "embedding endpoint returned {}",
                response.status()
            )));
        }
        let payload: EmbedResponse =
            response.json().await.map_err(|err| EmbedError::Model(err.to_string()))?;
        Embedding::new(payload.embedding).map_err(|err| EmbedError::Model(err.to_string()))
    }
}
