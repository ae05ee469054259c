//! Core primitives — identifiers, hashes, the artifact envelope, error kinds
//!
//! Everything downstream (senses, sweep, generators, referee, ledger) builds
//! on the records defined here. Nothing in this module does I/O.

pub mod artifact;
pub mod bundle;
pub mod error;
pub mod ids;
pub mod rng;

pub use artifact::{
    Artifact, ArtifactKind, ArtifactPayload, BlastRadius, DataQuality, DiscoveryBrief,
    DropReason, DroppedCandidate, FalsificationLog, FdrFamilyArtifact, FdrMethod,
    GenerationAudit, GeneratorType, HypothesisCandidate, HypothesisSeed, MechanismCategory,
    RelationshipArtifact, RigorLevel, RiskAssessment, RunManifest, SenseResult, Signal,
    SilenceFinding, SkipReason, SkippedRelationship, SweepManifest, TwinSegment,
    VerdictArtifact, VerdictStatus,
};
pub use bundle::{Column, MatrixBundle, StatType};
pub use error::{EngineError, EngineResult};
pub use ids::{
    canonical_pair, derive_seed, relationship_key, sha256_hex, short_hash, skipped_key,
    validate_variable_key, ArtifactId, FamilyId, FamilyKey, RunId,
};
