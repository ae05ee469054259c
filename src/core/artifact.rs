//! Artifact envelope and payload records
//!
//! Every layer output is one `Artifact`: a content-addressed envelope around
//! a tagged payload variant. The ledger stores canonical JSON bytes, so the
//! payload records here are the stable wire contract of the whole pipeline.
//!
//! Determinism rule: nothing in a serialized artifact may depend on wall
//! clock or arrival order. Runtime measurements are zeroed by
//! [`Artifact::canonical_bytes`] before hashing/storage and surface through
//! logs and CLI summaries instead.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::error::{EngineError, EngineResult};
use super::ids::{ArtifactId, FamilyId, FamilyKey, RunId};

// ============================================================================
// Sense results
// ============================================================================

/// Strength bucket for |effect_size|, with sense-specific thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    Weak,
    Moderate,
    Strong,
    VeryStrong,
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Signal::Weak => "weak",
            Signal::Moderate => "moderate",
            Signal::Strong => "strong",
            Signal::VeryStrong => "very_strong",
        };
        f.write_str(s)
    }
}

/// Uniform result record produced by every statistical sense.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SenseResult {
    pub sense_name: String,
    pub effect_size: f64,
    pub p_value: f64,
    /// Monotone decreasing function of `p_value`, in [0, 1].
    pub confidence: f64,
    pub signal: Signal,
    pub description: String,
    /// Sense-specific extras (lag, bin counts, degrees of freedom, …).
    /// BTreeMap keeps canonical JSON stable.
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl SenseResult {
    /// True when the sense declined to analyze (degenerate input).
    pub fn is_skipped(&self) -> bool {
        self.metadata
            .get("skipped")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false)
    }
}

// ============================================================================
// Data quality and skip reasons
// ============================================================================

/// Per-pair column quality computed before any test runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataQuality {
    pub missing_rate_x: f64,
    pub missing_rate_y: f64,
    pub unique_x: usize,
    pub unique_y: usize,
    pub variance_x: f64,
    pub variance_y: f64,
    /// Rows where both sides are present.
    pub valid_rows: usize,
}

/// Reason a pair was skipped without metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SkipReason {
    LowN,
    HighMissing,
    LowVariance,
    PerfectCorrelation,
    LikelyDerived,
    SparseData,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SkipReason::LowN => "LOW_N",
            SkipReason::HighMissing => "HIGH_MISSING",
            SkipReason::LowVariance => "LOW_VARIANCE",
            SkipReason::PerfectCorrelation => "PERFECT_CORRELATION",
            SkipReason::LikelyDerived => "LIKELY_DERIVED",
            SkipReason::SparseData => "SPARSE_DATA",
        };
        f.write_str(s)
    }
}

// ============================================================================
// Layer 0 payloads
// ============================================================================

/// A mined pairwise relationship with its evidence blocks.
///
/// Invariants: `sample_size > 0`, `p_value ∈ [0,1]`,
/// `q_value ∈ [0,1]` when present and `q_value ≥ p_value`.
/// Variable pair ordering is canonical (lexicographic).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationshipArtifact {
    pub variable_x: String,
    pub variable_y: String,
    pub test_type: String,
    pub effect_size: f64,
    pub p_value: f64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub q_value: Option<f64>,
    pub sample_size: usize,
    /// m — size of the FDR family this relationship was corrected within.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub total_comparisons: Option<usize>,
    pub family_id: FamilyId,
    /// Named statistics from the primary test (t, df, chi2, cramers_v, …).
    #[serde(default)]
    pub canonical_metrics: BTreeMap<String, f64>,
    pub data_quality: DataQuality,
    /// Up to one evidence block per sense.
    #[serde(default)]
    pub sense_results: Vec<SenseResult>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl RelationshipArtifact {
    /// Check the record-level invariants. Violations are determinism bugs,
    /// not data conditions, so they surface as errors.
    pub fn validate(&self) -> EngineResult<()> {
        if self.sample_size == 0 {
            return Err(EngineError::Validation("relationship sample_size must be > 0".into()));
        }
        if !(0.0..=1.0).contains(&self.p_value) {
            return Err(EngineError::Validation(format!(
                "p_value {} outside [0,1]",
                self.p_value
            )));
        }
        if let Some(q) = self.q_value {
            if !(0.0..=1.0).contains(&q) {
                return Err(EngineError::Validation(format!("q_value {q} outside [0,1]")));
            }
            if q < self.p_value {
                return Err(EngineError::Validation(format!(
                    "q_value {q} below p_value {}",
                    self.p_value
                )));
            }
        }
        if self.variable_x > self.variable_y {
            return Err(EngineError::Validation(format!(
                "pair ({}, {}) not in canonical order",
                self.variable_x, self.variable_y
            )));
        }
        Ok(())
    }
}

/// Same key schema as a relationship, but no metrics: only why it was skipped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkippedRelationship {
    pub variable_x: String,
    pub variable_y: String,
    pub test_type: String,
    pub family_id: FamilyId,
    pub reason_code: SkipReason,
    pub data_quality: DataQuality,
}

/// Multiple-testing correction method applied across a family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FdrMethod {
    #[serde(rename = "BH")]
    BenjaminiHochberg,
    #[serde(rename = "BY")]
    BenjaminiYekutieli,
    #[serde(rename = "none")]
    None,
}

/// One per family: the key, method, and how many tests shared the correction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FdrFamilyArtifact {
    pub family_id: FamilyId,
    pub family_key: FamilyKey,
    pub num_tests: usize,
    pub fdr_method: FdrMethod,
}

/// Per-run sweep summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepManifest {
    pub family_id: FamilyId,
    pub executed_tests: Vec<String>,
    /// Wall-clock of the sweep. Zeroed in canonical bytes (volatile).
    pub runtime_ms: u64,
    pub total_pairs: usize,
    pub successful_tests: usize,
    pub skipped_tests: usize,
    /// Per-reason rejection counts, keyed by `SkipReason` display form.
    #[serde(default)]
    pub rejections_by_reason: BTreeMap<String, usize>,
    /// Deterministic digest over the sweep's relationship + skip IDs.
    pub fingerprint: String,
}

// ============================================================================
// Layer 1 payloads
// ============================================================================

/// How the candidate explains the observed relationship.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MechanismCategory {
    DirectCausal,
    EffectModification,
    ConfoundingPath,
    ProxyRelationship,
    MeasurementBias,
}

impl MechanismCategory {
    /// Parse a loosely-cased mechanism string (LLM output is not trusted to
    /// match the enum exactly). Unknown values default upstream.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "direct_causal" => Some(Self::DirectCausal),
            "effect_modification" => Some(Self::EffectModification),
            "confounding_path" => Some(Self::ConfoundingPath),
            "proxy_relationship" => Some(Self::ProxyRelationship),
            "measurement_bias" => Some(Self::MeasurementBias),
            _ => None,
        }
    }
}

/// Downstream validation budget hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RigorLevel {
    Basic,
    Standard,
    Decision,
}

impl RigorLevel {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "basic" => Some(Self::Basic),
            "standard" => Some(Self::Standard),
            "decision" => Some(Self::Decision),
            _ => None,
        }
    }
}

/// Which generator produced a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeneratorType {
    Heuristic,
    Llm,
}

/// A proposed, testable causal hypothesis. Invalid unless it cites at least
/// one ledgered relationship and both keys resolve in the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HypothesisCandidate {
    pub cause_key: String,
    pub effect_key: String,
    #[serde(default)]
    pub confounder_keys: Vec<String>,
    pub mechanism_category: MechanismCategory,
    pub rationale: String,
    pub suggested_rigor: RigorLevel,
    pub supporting_artifacts: Vec<ArtifactId>,
    pub generator_type: GeneratorType,
}

/// Why a generated candidate was dropped by the guardrails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    MissingCitations,
    InvalidCauseKey,
    InvalidEffectKey,
    InvalidCitations,
}

/// Audit record for one dropped candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DroppedCandidate {
    /// Position in the generator's raw output.
    pub index: usize,
    pub reason: DropReason,
    pub message: String,
}

/// Generation audit so replays can detect generator drift.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationAudit {
    pub generator_type: GeneratorType,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub prompt_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub response_hash: Option<String>,
    pub candidates_emitted: usize,
    #[serde(default)]
    pub dropped: Vec<DroppedCandidate>,
}

// ============================================================================
// Discovery brief payloads
// ============================================================================

/// Silence acceleration: a variable whose recent correlations went quiet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SilenceFinding {
    pub detected: bool,
    pub recent_mean_effect: f64,
    pub historical_mean_effect: f64,
    pub silent_fraction: f64,
}

/// Blast radius: how far a perturbation of this variable plausibly reaches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlastRadius {
    pub affected_count: usize,
    /// total effect / number of strong connections
    pub centrality: f64,
    /// affected / 10, capped at 1.0
    pub radius: f64,
}

/// A pair of variables with near-identical relationship profiles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TwinSegment {
    pub other_variable: String,
    pub similarity: f64,
    pub common_neighbors: usize,
}

/// Typed hypothesis seed surfaced by the brief for generators to pick up.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HypothesisSeed {
    pub category: String,
    pub description: String,
    pub priority: u8,
    pub confidence: f64,
}

/// Discrete risk bucket for a variable's neighborhood.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskAssessment {
    Low,
    Medium,
    High,
}

/// Per-variable narrative condensation of the sweep's findings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryBrief {
    pub variable_key: String,
    /// Strongest relationship involving this variable.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub anchor_relationship: Option<ArtifactId>,
    /// Sense name → effect size, from the anchor's evidence blocks.
    #[serde(default)]
    pub sense_summary: BTreeMap<String, f64>,
    pub silence: SilenceFinding,
    pub blast_radius: BlastRadius,
    #[serde(default)]
    pub twins: Vec<TwinSegment>,
    pub confidence_score: f64,
    pub risk_assessment: RiskAssessment,
    #[serde(default)]
    pub warning_flags: Vec<String>,
    pub executive_summary: String,
    pub statistical_summary: String,
    #[serde(default)]
    pub prompt_fragments: Vec<String>,
    #[serde(default)]
    pub hypothesis_seeds: Vec<HypothesisSeed>,
}

// ============================================================================
// Layer 2 payloads
// ============================================================================

/// Referee decision on a hypothesis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictStatus {
    Validated,
    Rejected,
    Marginal,
}

/// Null-distribution summary attached to every rejection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FalsificationLog {
    pub mean: f64,
    pub stddev: f64,
    pub min: f64,
    pub max: f64,
    pub p95: f64,
    pub p99: f64,
    pub sample_size: usize,
    pub test_used: String,
    pub rejected_at: String,
}

/// The referee's final decision with its supporting evidence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerdictArtifact {
    pub hypothesis_id: ArtifactId,
    pub status: VerdictStatus,
    pub reason: String,
    pub p_value: f64,
    pub confidence: f64,
    pub effect_size: f64,
    pub null_percentile: f64,
    pub num_permutations: usize,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub falsification_log: Option<FalsificationLog>,
}

// ============================================================================
// Run manifest
// ============================================================================

/// Per-layer counts and the overall fingerprint for one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunManifest {
    pub snapshot_id: String,
    pub cohort_hash: String,
    pub registry_hash: String,
    pub seed: u64,
    pub generator_mode: GeneratorType,
    pub relationships: usize,
    pub skipped_relationships: usize,
    pub briefs: usize,
    pub hypotheses: usize,
    pub verdicts_validated: usize,
    pub verdicts_rejected: usize,
    /// Zeroed in canonical bytes (volatile).
    pub runtime_ms: u64,
    pub fingerprint: String,
}

// ============================================================================
// Envelope
// ============================================================================

/// Discriminant for ledger listing and routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Relationship,
    SkippedRelationship,
    FdrFamily,
    SweepManifest,
    DiscoveryBrief,
    Hypothesis,
    GenerationAudit,
    Verdict,
    RunManifest,
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ArtifactKind::Relationship => "relationship",
            ArtifactKind::SkippedRelationship => "skipped_relationship",
            ArtifactKind::FdrFamily => "fdr_family",
            ArtifactKind::SweepManifest => "sweep_manifest",
            ArtifactKind::DiscoveryBrief => "discovery_brief",
            ArtifactKind::Hypothesis => "hypothesis",
            ArtifactKind::GenerationAudit => "generation_audit",
            ArtifactKind::Verdict => "verdict",
            ArtifactKind::RunManifest => "run_manifest",
        };
        f.write_str(s)
    }
}

/// Tagged payload carried by the envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ArtifactPayload {
    Relationship(RelationshipArtifact),
    SkippedRelationship(SkippedRelationship),
    FdrFamily(FdrFamilyArtifact),
    SweepManifest(SweepManifest),
    DiscoveryBrief(DiscoveryBrief),
    Hypothesis(HypothesisCandidate),
    GenerationAudit(GenerationAudit),
    Verdict(VerdictArtifact),
    RunManifest(RunManifest),
}

impl ArtifactPayload {
    pub fn kind(&self) -> ArtifactKind {
        match self {
            ArtifactPayload::Relationship(_) => ArtifactKind::Relationship,
            ArtifactPayload::SkippedRelationship(_) => ArtifactKind::SkippedRelationship,
            ArtifactPayload::FdrFamily(_) => ArtifactKind::FdrFamily,
            ArtifactPayload::SweepManifest(_) => ArtifactKind::SweepManifest,
            ArtifactPayload::DiscoveryBrief(_) => ArtifactKind::DiscoveryBrief,
            ArtifactPayload::Hypothesis(_) => ArtifactKind::Hypothesis,
            ArtifactPayload::GenerationAudit(_) => ArtifactKind::GenerationAudit,
            ArtifactPayload::Verdict(_) => ArtifactKind::Verdict,
            ArtifactPayload::RunManifest(_) => ArtifactKind::RunManifest,
        }
    }
}

/// Content-addressed envelope. Immutable once written to the ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub id: ArtifactId,
    pub run_id: RunId,
    pub payload: ArtifactPayload,
}

impl Artifact {
    pub fn new(id: ArtifactId, run_id: RunId, payload: ArtifactPayload) -> Self {
        Self { id, run_id, payload }
    }

    pub fn kind(&self) -> ArtifactKind {
        self.payload.kind()
    }

    /// Canonical JSON bytes: object keys sorted (serde_json's default map is
    /// ordered), volatile fields (manifest runtimes) zeroed. Two replays of
    /// the same run must produce identical canonical bytes.
    pub fn canonical_bytes(&self) -> EngineResult<Vec<u8>> {
        let mut normalized = self.clone();
        match &mut normalized.payload {
            ArtifactPayload::SweepManifest(m) => m.runtime_ms = 0,
            ArtifactPayload::RunManifest(m) => m.runtime_ms = 0,
            _ => {}
        }
        let value = serde_json::to_value(&normalized)?;
        Ok(serde_json::to_vec(&value)?)
    }

    /// SHA-256 over the canonical bytes.
    pub fn content_hash(&self) -> EngineResult<String> {
        Ok(super::ids::sha256_hex(&self.canonical_bytes()?))
    }

    pub fn from_bytes(bytes: &[u8]) -> EngineResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
