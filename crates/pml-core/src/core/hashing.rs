// pml-core/src/core/hashing.rs
// ============================================================================
// Module: PML Gateway Canonical Hashing
// Description: Canonical-JSON digests for structures, fingerprints, traces.
// Purpose: Give the dedup key and speculation fingerprints byte-stable input.
// Dependencies: serde, serde_jcs, sha2
// ============================================================================

//! ## Overview
//! Capability dedup and speculation consumption both compare digests, so the
//! bytes going into the hasher must never depend on field order or
//! formatting. Serialization goes through RFC 8785 (JCS) before SHA-256 is
//! applied. The gateway commits to a single algorithm; digests carry its
//! label only so persisted rows stay self-describing.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt::Write;

use serde::Deserialize;
use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;
use thiserror::Error;

// ============================================================================
// SECTION: Canonical JSON
// ============================================================================

/// Errors raised while preparing canonical hash input.
#[derive(Debug, Error)]
pub enum HashError {
    /// The value could not be serialized to canonical JSON.
    #[error("canonical json serialization failed: {0}")]
    Json(String),
}

/// Serializes a value to RFC 8785 canonical JSON bytes.
///
/// # Errors
///
/// Returns [`HashError::Json`] when the value does not serialize.
pub fn canonical_json_bytes<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, HashError> {
    serde_jcs::to_vec(value).map_err(|err| HashError::Json(err.to_string()))
}

// ============================================================================
// SECTION: Digests
// ============================================================================

/// Label stamped on every digest the gateway produces.
pub const HASH_ALGORITHM: &str = "sha256";

/// Content digest with its algorithm label.
///
/// # Invariants
/// - `value` is lowercase hex.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashDigest {
    /// Algorithm label ([`HASH_ALGORITHM`] for gateway-produced digests).
    pub algorithm: String,
    /// Lowercase hex-encoded digest bytes.
    pub value: String,
}

impl HashDigest {
    /// Digests a byte payload.
    #[must_use]
    pub fn from_bytes(payload: &[u8]) -> Self {
        let digest = Sha256::new_with_prefix(payload).finalize();
        let value = digest.iter().fold(String::with_capacity(64), |mut hex, byte| {
            // Writing into a String cannot fail.
            let _ = write!(hex, "{byte:02x}");
            hex
        });
        Self {
            algorithm: HASH_ALGORITHM.to_string(),
            value,
        }
    }

    /// Wraps an already-encoded hex value (store load path).
    #[must_use]
    pub fn from_hex(value: impl Into<String>) -> Self {
        Self {
            algorithm: HASH_ALGORITHM.to_string(),
            value: value.into(),
        }
    }
}

/// Digests a value through its canonical JSON form.
///
/// # Errors
///
/// Returns [`HashError::Json`] when the value does not serialize.
pub fn hash_canonical_json<T: Serialize + ?Sized>(value: &T) -> Result<HashDigest, HashError> {
    canonical_json_bytes(value).map(|bytes| HashDigest::from_bytes(&bytes))
}
