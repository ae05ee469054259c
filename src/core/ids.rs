//! Identifiers, hashing, and canonical keying
//!
//! Every artifact, family, and run is addressed by a deterministic string ID.
//! Hashes are SHA-256, hex-encoded, truncated to 16 chars where the full
//! digest would bloat keys without adding discrimination (families, runs).

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Hex-encode the SHA-256 digest of `data`.
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let digest = hasher.finalize();
    let mut out = String::with_capacity(64);
    for byte in digest {
        use fmt::Write;
        let _ = write!(out, "{:02x}", byte);
    }
    out
}

/// Short (64-bit) hex hash for keys where the full digest is overkill.
pub fn short_hash(data: &[u8]) -> String {
    sha256_hex(data)[..16].to_string()
}

/// Derive a u64 seed from joined parts. Used to scope RNG streams per
/// `(purpose, key, seed)` without sharing streams across workers.
pub fn derive_seed(purpose: &str, key: &str, seed: u64) -> u64 {
    let material = format!("{purpose}\u{1f}{key}\u{1f}{seed}");
    let mut hasher = Sha256::new();
    hasher.update(material.as_bytes());
    let digest = hasher.finalize();
    u64::from_be_bytes([
        digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6], digest[7],
    ])
}

/// Identifier of one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    /// Deterministic run id from the reproducibility triple + seed.
    pub fn derive(snapshot_id: &str, cohort_hash: &str, registry_hash: &str, seed: u64) -> Self {
        let material = format!("run\u{1f}{snapshot_id}\u{1f}{cohort_hash}\u{1f}{registry_hash}\u{1f}{seed}");
        RunId(format!("run-{}", short_hash(material.as_bytes())))
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a ledgered artifact. Artifact IDs are structural — they
/// encode kind and key components so that replays mint identical IDs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ArtifactId(pub String);

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// FDR family identifier — hash of the six-component family key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FamilyId(pub String);

impl fmt::Display for FamilyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The six-component family key. Two relationships share an FDR family iff
/// all six components match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FamilyKey {
    pub snapshot_id: String,
    pub cohort_hash: String,
    pub stage_name: String,
    pub test_type: String,
    pub registry_hash: String,
    pub stage_plan_hash: String,
}

impl FamilyKey {
    /// Hash the key into a `FamilyId`.
    pub fn family_id(&self) -> FamilyId {
        let material = format!(
            "{}\u{1f}{}\u{1f}{}\u{1f}{}\u{1f}{}\u{1f}{}",
            self.snapshot_id,
            self.cohort_hash,
            self.stage_name,
            self.test_type,
            self.registry_hash,
            self.stage_plan_hash
        );
        FamilyId(short_hash(material.as_bytes()))
    }
}

/// Canonical (lexicographic) ordering of a variable pair. All artifact keys
/// involving a pair use this ordering so that `(x, y)` and `(y, x)` address
/// the same relationship.
pub fn canonical_pair(x: &str, y: &str) -> (String, String) {
    if x <= y {
        (x.to_string(), y.to_string())
    } else {
        (y.to_string(), x.to_string())
    }
}

/// Canonical relationship key: `relationship:{test_type}:{family_id}:{min}:{max}`.
pub fn relationship_key(test_type: &str, family_id: &FamilyId, x: &str, y: &str) -> ArtifactId {
    let (lo, hi) = canonical_pair(x, y);
    ArtifactId(format!("relationship:{test_type}:{family_id}:{lo}:{hi}"))
}

/// Key for a skipped-relationship artifact.
pub fn skipped_key(test_type: &str, family_id: &FamilyId, x: &str, y: &str) -> ArtifactId {
    let (lo, hi) = canonical_pair(x, y);
    ArtifactId(format!("skipped:{test_type}:{family_id}:{lo}:{hi}"))
}

/// Validate a variable key: opaque, but must be non-empty and contain no
/// key-delimiter characters.
pub fn validate_variable_key(key: &str) -> Result<(), super::error::EngineError> {
    if key.is_empty() {
        return Err(super::error::EngineError::Validation(
            "variable key must be non-empty".into(),
        ));
    }
    if key.contains(':') || key.contains('\u{1f}') {
        return Err(super::error::EngineError::Validation(format!(
            "variable key {key:?} contains reserved delimiter"
        )));
    }
    Ok(())
}
