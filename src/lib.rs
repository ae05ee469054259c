//! Hypoforge: Deterministic Causal Discovery
//!
//! Three-layer reasoning engine over tabular data:
//!
//! - **Layer 0 (Sweep)**: pairwise statistical sweep with five evidence
//!   senses and BH-FDR correction per family
//! - **Layer 1 (Generation)**: heuristic or LLM hypothesis proposal,
//!   guardrailed to cite only ledgered relationships
//! - **Layer 2 (Referee)**: seeded permutation test that validates or
//!   falsifies each hypothesis against its own null distribution
//!
//! Every output is a content-addressed artifact; a run is reproducible
//! byte-for-byte from `(snapshot_id, cohort_hash, registry_hash, seed)`.

pub mod aligner;
pub mod brief;
pub mod config;
pub mod core;
pub mod dataset;
pub mod generate;
pub mod ledger;
pub mod pipeline;
pub mod referee;
pub mod senses;
pub mod snapshot;
pub mod sweep;

// Re-export the envelope and payload records
pub use crate::core::{
    Artifact, ArtifactId, ArtifactKind, ArtifactPayload, DiscoveryBrief, EngineError,
    EngineResult, FamilyId, FamilyKey, GeneratorType, HypothesisCandidate, MatrixBundle,
    RelationshipArtifact, RigorLevel, RunId, SenseResult, Signal, SkipReason,
    SkippedRelationship, StatType, VerdictArtifact, VerdictStatus,
};

// Re-export the layer entry points
pub use brief::build_briefs;
pub use ledger::{ArtifactStore, MemoryLedger, SledLedger};
pub use pipeline::{PipelineOrchestrator, PipelineOutcome, PipelineRequest};
pub use senses::Sense;
pub use sweep::StagePlan;
