// pml-core/src/core/embedding.rs
// ============================================================================
// Module: PML Gateway Embedding Vectors
// Description: Fixed-dimension unit vectors for intent and tool similarity.
// Purpose: Provide cosine scoring over opaque embedding model output.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! The embedding model is an external collaborator; the gateway only stores
//! and compares its 1024-dimension output. Vectors are unit-normalized on
//! construction so cosine similarity reduces to a dot product.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Fixed embedding dimension produced by the collaborator model.
pub const EMBEDDING_DIM: usize = 1024;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Embedding construction errors.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// Vector length does not match [`EMBEDDING_DIM`].
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Expected dimension.
        expected: usize,
        /// Provided dimension.
        actual: usize,
    },
    /// Vector has zero magnitude and cannot be normalized.
    #[error("embedding has zero magnitude")]
    ZeroMagnitude,
}

// ============================================================================
// SECTION: Embedding
// ============================================================================

/// Unit-normalized embedding vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding(Vec<f32>);

impl Embedding {
    /// Creates a unit-normalized embedding from raw model output.
    ///
    /// # Errors
    ///
    /// Returns [`EmbeddingError`] on dimension mismatch or zero magnitude.
    pub fn new(values: Vec<f32>) -> Result<Self, EmbeddingError> {
        if values.len() != EMBEDDING_DIM {
            return Err(EmbeddingError::DimensionMismatch {
                expected: EMBEDDING_DIM,
                actual: values.len(),
            });
        }
        let magnitude = values.iter().map(|v| f64::from(*v) * f64::from(*v)).sum::<f64>().sqrt();
        if magnitude == 0.0 {
            return Err(EmbeddingError::ZeroMagnitude);
        }
        #[allow(
            clippy::cast_possible_truncation,
            reason = "Unit-normalized components fit f32 by construction."
        )]
        let normalized = values.iter().map(|v| (f64::from(*v) / magnitude) as f32).collect();
        Ok(Self(normalized))
    }

    /// Returns the vector components.
    #[must_use]
    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    /// Computes cosine similarity against another embedding, clamped to
    /// `[0, 1]`.
    #[must_use]
    pub fn cosine(&self, other: &Self) -> f64 {
        let dot: f64 = self
            .0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| f64::from(*a) * f64::from(*b))
            .sum();
        dot.clamp(0.0, 1.0)
    }
}
