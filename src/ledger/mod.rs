//! Artifact ledger — content-addressed, idempotent, replayable
//!
//! The ledger is the only mutable process-wide resource: a mapping from
//! artifact ID to canonical JSON bytes. Writes are idempotent — re-writing
//! an ID with identical bytes is a no-op, while differing bytes is a
//! determinism violation and is rejected, never silently overwritten.
//!
//! Two backends: an in-memory map for one-shot runs and tests, and a sled
//! tree for persistent ledgers. Both speak the same trait, so every layer is
//! backend-agnostic.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::RwLock;

use tracing::debug;

use crate::config::defaults::RESOLVER_VERSION;
use crate::core::{
    sha256_hex, Artifact, ArtifactId, ArtifactKind, ArtifactPayload, EngineError, EngineResult,
    RunId,
};

/// Storage contract shared by all backends.
pub trait ArtifactStore: Send + Sync {
    /// Content-addressed write. Same ID + same bytes → no-op; same ID +
    /// differing bytes → `determinism` error.
    fn store(&self, artifact: &Artifact) -> EngineResult<()>;

    fn lookup(&self, id: &ArtifactId) -> EngineResult<Option<Artifact>>;

    /// All artifacts of a run, optionally filtered by kind, ordered by ID.
    fn list(&self, run_id: &RunId, kind: Option<ArtifactKind>) -> EngineResult<Vec<Artifact>>;
}

// ============================================================================
// In-memory backend
// ============================================================================

/// Map-backed ledger for tests and one-shot CLI runs.
#[derive(Default)]
pub struct MemoryLedger {
    entries: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ArtifactStore for MemoryLedger {
    fn store(&self, artifact: &Artifact) -> EngineResult<()> {
        let bytes = artifact.canonical_bytes()?;
        let mut entries = self
            .entries
            .write()
            .map_err(|_| EngineError::Storage("ledger lock poisoned".into()))?;
        if let Some(existing) = entries.get(&artifact.id.0) {
            if existing == &bytes {
                return Ok(());
            }
            return Err(EngineError::Determinism(format!(
                "artifact {} re-written with differing content",
                artifact.id
            )));
        }
        debug!(id = %artifact.id, kind = %artifact.kind(), "artifact stored");
        entries.insert(artifact.id.0.clone(), bytes);
        Ok(())
    }

    fn lookup(&self, id: &ArtifactId) -> EngineResult<Option<Artifact>> {
        let entries = self
            .entries
            .read()
            .map_err(|_| EngineError::Storage("ledger lock poisoned".into()))?;
        entries
            .get(&id.0)
            .map(|bytes| Artifact::from_bytes(bytes))
            .transpose()
    }

    fn list(&self, run_id: &RunId, kind: Option<ArtifactKind>) -> EngineResult<Vec<Artifact>> {
        let entries = self
            .entries
            .read()
            .map_err(|_| EngineError::Storage("ledger lock poisoned".into()))?;
        let mut out = Vec::new();
        for bytes in entries.values() {
            let artifact = Artifact::from_bytes(bytes)?;
            if &artifact.run_id == run_id && kind.map_or(true, |k| artifact.kind() == k) {
                out.push(artifact);
            }
        }
        Ok(out)
    }
}

// ============================================================================
// Sled backend
// ============================================================================

/// Sled-backed persistent ledger. Keys are artifact IDs, values canonical
/// JSON. Durability is sled's background flushing; `flush` forces it.
pub struct SledLedger {
    db: sled::Db,
}

impl SledLedger {
    pub fn open<P: AsRef<Path>>(path: P) -> EngineResult<Self> {
        Ok(Self {
            db: sled::open(path)?,
        })
    }

    pub fn flush(&self) -> EngineResult<()> {
        self.db.flush()?;
        Ok(())
    }
}

impl ArtifactStore for SledLedger {
    fn store(&self, artifact: &Artifact) -> EngineResult<()> {
        let bytes = artifact.canonical_bytes()?;
        if let Some(existing) = self.db.get(artifact.id.0.as_bytes())? {
            if existing.as_ref() == bytes.as_slice() {
                return Ok(());
            }
            return Err(EngineError::Determinism(format!(
                "artifact {} re-written with differing content",
                artifact.id
            )));
        }
        self.db.insert(artifact.id.0.as_bytes(), bytes)?;
        Ok(())
    }

    fn lookup(&self, id: &ArtifactId) -> EngineResult<Option<Artifact>> {
        self.db
            .get(id.0.as_bytes())?
            .map(|bytes| Artifact::from_bytes(&bytes))
            .transpose()
    }

    fn list(&self, run_id: &RunId, kind: Option<ArtifactKind>) -> EngineResult<Vec<Artifact>> {
        let mut out = Vec::new();
        for item in self.db.iter() {
            let (_, bytes) = item?;
            let artifact = Artifact::from_bytes(&bytes)?;
            if &artifact.run_id == run_id && kind.map_or(true, |k| artifact.kind() == k) {
                out.push(artifact);
            }
        }
        out.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(out)
    }
}

// ============================================================================
// Fingerprinting and replay
// ============================================================================

/// Deterministic fingerprint of a run:
/// `hash(sorted ids ∥ manifest_hash ∥ registry_hash ∥ resolver_version ∥ seed)`.
///
/// Computed over every artifact of the run except the run manifest itself
/// (which records the fingerprint).
pub fn fingerprint(
    store: &dyn ArtifactStore,
    run_id: &RunId,
    registry_hash: &str,
    seed: u64,
) -> EngineResult<String> {
    let artifacts = store.list(run_id, None)?;

    let mut ids: Vec<&str> = artifacts
        .iter()
        .filter(|a| a.kind() != ArtifactKind::RunManifest)
        .map(|a| a.id.0.as_str())
        .collect();
    ids.sort_unstable();

    let manifest_hash = artifacts
        .iter()
        .find(|a| a.kind() == ArtifactKind::SweepManifest)
        .map(|a| a.content_hash())
        .transpose()?
        .unwrap_or_default();

    let material = format!(
        "{}\u{1e}{manifest_hash}\u{1e}{registry_hash}\u{1e}{RESOLVER_VERSION}\u{1e}{seed}",
        ids.join("\u{1f}")
    );
    Ok(sha256_hex(material.as_bytes()))
}

/// Replay check: two runs must agree on fingerprint and on the canonical
/// bytes of every artifact, compared per kind with exact equality.
pub fn compare_runs(
    store_a: &dyn ArtifactStore,
    run_a: &RunId,
    store_b: &dyn ArtifactStore,
    run_b: &RunId,
    registry_hash: &str,
    seed: u64,
) -> EngineResult<()> {
    let fp_a = fingerprint(store_a, run_a, registry_hash, seed)?;
    let fp_b = fingerprint(store_b, run_b, registry_hash, seed)?;
    if fp_a != fp_b {
        return Err(EngineError::Determinism(format!(
            "fingerprint mismatch: {fp_a} vs {fp_b}"
        )));
    }

    let a = store_a.list(run_a, None)?;
    let b = store_b.list(run_b, None)?;
    let strip_run = |artifacts: &[Artifact]| -> EngineResult<BTreeMap<String, Vec<u8>>> {
        let mut map = BTreeMap::new();
        for artifact in artifacts {
            if artifact.kind() == ArtifactKind::RunManifest {
                continue;
            }
            map.insert(artifact.id.0.clone(), artifact.canonical_bytes()?);
        }
        Ok(map)
    };
    let map_a = strip_run(&a)?;
    let map_b = strip_run(&b)?;
    if map_a.len() != map_b.len() {
        return Err(EngineError::Determinism(format!(
            "artifact count mismatch: {} vs {}",
            map_a.len(),
            map_b.len()
        )));
    }
    for (id, bytes_a) in &map_a {
        match map_b.get(id) {
            Some(bytes_b) if bytes_a == bytes_b => {}
            Some(_) => {
                return Err(EngineError::Determinism(format!(
                    "artifact {id} differs between runs"
                )));
            }
            None => {
                return Err(EngineError::Determinism(format!(
                    "artifact {id} missing from replay"
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{GeneratorType, RunManifest};

    fn manifest_artifact(run: &str, fingerprint: &str) -> Artifact {
        Artifact::new(
            ArtifactId(format!("run_manifest:{run}")),
            RunId(run.into()),
            ArtifactPayload::RunManifest(RunManifest {
                snapshot_id: "snap".into(),
                cohort_hash: "c0".into(),
                registry_hash: "r0".into(),
                seed: 42,
                generator_mode: GeneratorType::Heuristic,
                relationships: 1,
                skipped_relationships: 0,
                briefs: 1,
                hypotheses: 1,
                verdicts_validated: 1,
                verdicts_rejected: 0,
                runtime_ms: 5,
                fingerprint: fingerprint.into(),
            }),
        )
    }

    fn sweep_manifest_artifact(run: &str) -> Artifact {
        Artifact::new(
            ArtifactId(format!("sweep_manifest:{run}")),
            RunId(run.into()),
            ArtifactPayload::SweepManifest(crate::core::SweepManifest {
                family_id: crate::core::FamilyId("fam".into()),
                executed_tests: vec!["pearson".into()],
                runtime_ms: 99,
                total_pairs: 1,
                successful_tests: 1,
                skipped_tests: 0,
                rejections_by_reason: BTreeMap::new(),
                fingerprint: "swp".into(),
            }),
        )
    }

    #[test]
    fn store_is_idempotent_for_identical_content() {
        let ledger = MemoryLedger::new();
        let artifact = sweep_manifest_artifact("run-1");
        ledger.store(&artifact).expect("first write");
        ledger.store(&artifact).expect("identical re-write is a no-op");
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn differing_rewrite_is_a_determinism_error() {
        let ledger = MemoryLedger::new();
        let artifact = sweep_manifest_artifact("run-1");
        ledger.store(&artifact).expect("first write");

        let mut altered = artifact;
        if let ArtifactPayload::SweepManifest(m) = &mut altered.payload {
            m.successful_tests = 999;
        }
        let err = ledger.store(&altered).unwrap_err();
        assert_eq!(err.kind_tag(), "determinism");
    }

    #[test]
    fn list_filters_by_run_and_kind() {
        let ledger = MemoryLedger::new();
        ledger.store(&sweep_manifest_artifact("run-1")).expect("store");
        ledger.store(&sweep_manifest_artifact("run-2")).expect("store");
        ledger.store(&manifest_artifact("run-1", "fp")).expect("store");

        let run1 = RunId("run-1".into());
        assert_eq!(ledger.list(&run1, None).expect("list").len(), 2);
        assert_eq!(
            ledger
                .list(&run1, Some(ArtifactKind::SweepManifest))
                .expect("list")
                .len(),
            1
        );
    }

    #[test]
    fn fingerprint_ignores_manifest_runtime_but_tracks_content() {
        let ledger_a = MemoryLedger::new();
        let ledger_b = MemoryLedger::new();
        let run = RunId("run-1".into());

        ledger_a.store(&sweep_manifest_artifact("run-1")).expect("store");
        let mut faster = sweep_manifest_artifact("run-1");
        if let ArtifactPayload::SweepManifest(m) = &mut faster.payload {
            m.runtime_ms = 1; // volatile field: canonical bytes zero it
        }
        ledger_b.store(&faster).expect("store");

        let fp_a = fingerprint(&ledger_a, &run, "r0", 42).expect("fp");
        let fp_b = fingerprint(&ledger_b, &run, "r0", 42).expect("fp");
        assert_eq!(fp_a, fp_b);

        // a different seed changes the fingerprint
        let fp_c = fingerprint(&ledger_a, &run, "r0", 43).expect("fp");
        assert_ne!(fp_a, fp_c);
    }

    #[test]
    fn compare_runs_detects_divergence() {
        let ledger_a = MemoryLedger::new();
        let ledger_b = MemoryLedger::new();
        let run = RunId("run-1".into());

        ledger_a.store(&sweep_manifest_artifact("run-1")).expect("store");
        let mut altered = sweep_manifest_artifact("run-1");
        if let ArtifactPayload::SweepManifest(m) = &mut altered.payload {
            m.fingerprint = "divergent".into();
        }
        ledger_b.store(&altered).expect("store");

        let err = compare_runs(&ledger_a, &run, &ledger_b, &run, "r0", 42).unwrap_err();
        assert_eq!(err.kind_tag(), "determinism");
    }

    #[test]
    fn sled_backend_round_trips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ledger = SledLedger::open(dir.path()).expect("opens");
        let artifact = sweep_manifest_artifact("run-1");
        ledger.store(&artifact).expect("store");
        ledger.store(&artifact).expect("idempotent");

        let found = ledger.lookup(&artifact.id).expect("lookup").expect("present");
        assert_eq!(found.id, artifact.id);
        assert_eq!(
            found.canonical_bytes().expect("bytes"),
            artifact.canonical_bytes().expect("bytes")
        );
    }
}
