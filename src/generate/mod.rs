//! Layer 1 — hypothesis generation
//!
//! Two generators share one contract: relationships in, guardrail-validated
//! hypothesis candidates plus a generation audit out. The heuristic path is
//! a pure rule table; the LLM path assembles a deterministic prompt, calls
//! an OpenAI-compatible endpoint, and validates every returned candidate
//! against the ledgered evidence. Neither generator influences verdicts —
//! layer 2 is the sole arbiter.

pub mod client;
pub mod heuristic;
pub mod llm;

use std::collections::HashMap;

use crate::core::{
    Artifact, ArtifactId, ArtifactPayload, DiscoveryBrief, FamilyId, RelationshipArtifact,
    RigorLevel, RunId, Signal,
};

pub use client::OpenAiClient;
pub use llm::TextModel;

/// Everything a generator needs; assembled by the pipeline from ledger
/// output so generators never touch raw data.
pub struct GeneratorContext<'a> {
    pub run_id: &'a RunId,
    pub family_id: &'a FamilyId,
    /// Relationship artifacts from the sweep (canonical order).
    pub relationships: &'a [Artifact],
    /// Discovery briefs, any order.
    pub briefs: &'a [Artifact],
    /// The admissible-variable registry for this run.
    pub admissible_variables: &'a [String],
    pub max_hypotheses: usize,
    pub rigor: RigorLevel,
}

impl<'a> GeneratorContext<'a> {
    /// Typed view over the relationship artifacts.
    pub fn relationship_views(&self) -> Vec<(&'a ArtifactId, &'a RelationshipArtifact)> {
        self.relationships
            .iter()
            .filter_map(|a| match &a.payload {
                ArtifactPayload::Relationship(r) => Some((&a.id, r)),
                _ => None,
            })
            .collect()
    }

    /// `relKey → artifact id` index. Relationship IDs are structural
    /// (`relationship:{test_type}:{family_id}:{min}:{max}`), so the key IS
    /// the id string.
    pub fn relationship_index(&self) -> HashMap<String, ArtifactId> {
        self.relationship_views()
            .into_iter()
            .map(|(id, _)| (id.0.clone(), id.clone()))
            .collect()
    }

    /// Briefs sorted by confidence descending, deterministic tiebreak.
    pub fn briefs_by_confidence(&self) -> Vec<&'a DiscoveryBrief> {
        let mut briefs: Vec<&DiscoveryBrief> = self
            .briefs
            .iter()
            .filter_map(|a| match &a.payload {
                ArtifactPayload::DiscoveryBrief(b) => Some(b),
                _ => None,
            })
            .collect();
        briefs.sort_by(|a, b| {
            b.confidence_score
                .partial_cmp(&a.confidence_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.variable_key.cmp(&b.variable_key))
        });
        briefs
    }

    pub fn is_admissible(&self, key: &str) -> bool {
        self.admissible_variables.iter().any(|v| v == key)
    }
}

/// Evidence stability: how many of the active senses agree the effect is
/// real. Used both as a scoring term and by the mechanism rules.
pub fn stability(rel: &RelationshipArtifact) -> f64 {
    let active: Vec<_> = rel.sense_results.iter().filter(|s| !s.is_skipped()).collect();
    if active.is_empty() {
        return 0.0;
    }
    active.iter().filter(|s| s.signal != Signal::Weak).count() as f64 / active.len() as f64
}

/// Deterministic hypothesis artifact ID: run-scoped, order-indexed. Replays
/// regenerate candidates in the same order, so indexes are stable.
pub fn hypothesis_id(run_id: &RunId, index: usize) -> ArtifactId {
    ArtifactId(format!("hypothesis:{run_id}:{index:03}"))
}
