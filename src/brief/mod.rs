//! Discovery briefs — per-variable condensation of the sweep
//!
//! A brief answers "what does the sweep say about variable v?" in a form the
//! generators can consume: the anchor (strongest) relationship, a five-sense
//! summary, silence acceleration, blast radius, twin segments, and typed
//! hypothesis seeds. Briefs never re-touch raw data; they read relationship
//! artifacts only, so a brief is reproducible from the ledger alone.
//!
//! The variable graph is an adjacency map keyed by variable — relationships
//! are edges, never owned pointers, so cyclic relationship structures cost
//! nothing.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use tracing::debug;

use crate::config::defaults::{
    BLAST_RADIUS_DEPTH, BLAST_RADIUS_EFFECT_FLOOR, SILENCE_DROP_THRESHOLD, SILENT_EFFECT_FLOOR,
    SIGNIFICANCE_THRESHOLD, TWIN_SIMILARITY_THRESHOLD,
};
use crate::core::{
    Artifact, ArtifactId, ArtifactPayload, BlastRadius, DiscoveryBrief, HypothesisSeed,
    RelationshipArtifact, RiskAssessment, RunId, SilenceFinding, Signal, TwinSegment,
};

/// One edge of the variable graph.
#[derive(Debug, Clone)]
struct Edge {
    other: String,
    effect_size: f64,
    p_value: f64,
    artifact_id: ArtifactId,
    /// Temporal-sense effect for the pair, when that sense ran.
    temporal_effect: Option<f64>,
}

/// Adjacency view over the sweep's relationship artifacts.
struct VariableGraph {
    adjacency: HashMap<String, Vec<Edge>>,
}

impl VariableGraph {
    fn build(relationships: &[Artifact]) -> Self {
        let mut adjacency: HashMap<String, Vec<Edge>> = HashMap::new();
        for artifact in relationships {
            let ArtifactPayload::Relationship(r) = &artifact.payload else {
                continue;
            };
            let temporal_effect = r
                .sense_results
                .iter()
                .find(|s| s.sense_name == "temporal" && !s.is_skipped())
                .map(|s| s.effect_size);
            for (from, to) in [
                (&r.variable_x, &r.variable_y),
                (&r.variable_y, &r.variable_x),
            ] {
                adjacency.entry(from.clone()).or_default().push(Edge {
                    other: to.clone(),
                    effect_size: r.effect_size,
                    p_value: r.p_value,
                    artifact_id: artifact.id.clone(),
                    temporal_effect,
                });
            }
        }
        // deterministic edge order regardless of artifact arrival
        for edges in adjacency.values_mut() {
            edges.sort_by(|a, b| a.other.cmp(&b.other).then(a.artifact_id.cmp(&b.artifact_id)));
        }
        Self { adjacency }
    }

    fn edges(&self, var: &str) -> &[Edge] {
        self.adjacency.get(var).map_or(&[], Vec::as_slice)
    }

    fn variables(&self) -> Vec<String> {
        let mut vars: Vec<String> = self.adjacency.keys().cloned().collect();
        vars.sort();
        vars
    }

    /// BFS out to `depth`, following edges at or above the effect floor.
    fn blast_radius(&self, start: &str) -> BlastRadius {
        let mut visited: BTreeSet<&str> = BTreeSet::new();
        visited.insert(start);
        let mut frontier: VecDeque<(&str, usize)> = VecDeque::new();
        frontier.push_back((start, 0));

        while let Some((var, depth)) = frontier.pop_front() {
            if depth >= BLAST_RADIUS_DEPTH {
                continue;
            }
            for edge in self.edges(var) {
                if edge.effect_size.abs() < BLAST_RADIUS_EFFECT_FLOOR {
                    continue;
                }
                if visited.insert(edge.other.as_str()) {
                    frontier.push_back((edge.other.as_str(), depth + 1));
                }
            }
        }

        let affected_count = visited.len() - 1;
        let strong: Vec<&Edge> = self
            .edges(start)
            .iter()
            .filter(|e| e.effect_size.abs() >= BLAST_RADIUS_EFFECT_FLOOR)
            .collect();
        let centrality = if strong.is_empty() {
            0.0
        } else {
            strong.iter().map(|e| e.effect_size.abs()).sum::<f64>() / strong.len() as f64
        };

        BlastRadius {
            affected_count,
            centrality,
            radius: (affected_count as f64 / 10.0).min(1.0),
        }
    }
}

/// Build briefs for every variable that appears in at least one relationship.
///
/// Output order is by variable key; artifact IDs embed the family so briefs
/// from different sweeps never collide.
pub fn build_briefs(relationships: &[Artifact], run_id: &RunId) -> Vec<Artifact> {
    let graph = VariableGraph::build(relationships);
    let index = relationship_index(relationships);

    graph
        .variables()
        .into_iter()
        .map(|var| {
            let brief = build_one(&graph, &index, &var);
            debug!(
                variable = %var,
                confidence = brief.confidence_score,
                risk = ?brief.risk_assessment,
                "brief built"
            );
            let id = ArtifactId(format!("discovery_brief:{run_id}:{var}"));
            Artifact::new(id, run_id.clone(), ArtifactPayload::DiscoveryBrief(brief))
        })
        .collect()
}

fn relationship_index(relationships: &[Artifact]) -> HashMap<ArtifactId, &RelationshipArtifact> {
    relationships
        .iter()
        .filter_map(|a| match &a.payload {
            ArtifactPayload::Relationship(r) => Some((a.id.clone(), r)),
            _ => None,
        })
        .collect()
}

fn build_one(
    graph: &VariableGraph,
    index: &HashMap<ArtifactId, &RelationshipArtifact>,
    var: &str,
) -> DiscoveryBrief {
    let edges = graph.edges(var);

    // Anchor: strongest |effect|, artifact id as the deterministic tiebreak
    let anchor_edge = edges.iter().max_by(|a, b| {
        a.effect_size
            .abs()
            .partial_cmp(&b.effect_size.abs())
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.artifact_id.cmp(&a.artifact_id))
    });

    let anchor = anchor_edge.and_then(|e| index.get(&e.artifact_id).copied());

    let mut sense_summary = BTreeMap::new();
    if let Some(rel) = anchor {
        for sense in &rel.sense_results {
            if !sense.is_skipped() {
                sense_summary.insert(sense.sense_name.clone(), sense.effect_size);
            }
        }
    }

    let silence = detect_silence(edges);
    let blast_radius = graph.blast_radius(var);
    let twins = find_twins(graph, var);
    let confidence_score = sense_agreement_confidence(anchor);
    let warning_flags = collect_warnings(edges, index);
    let risk_assessment = assess_risk(&silence, &blast_radius, &warning_flags);

    let executive_summary = executive_summary(var, anchor_edge, anchor, &silence, &blast_radius);
    let statistical_summary = statistical_summary(var, edges, anchor);
    let prompt_fragments =
        prompt_fragments(var, anchor_edge, &silence, &blast_radius, &twins);
    let hypothesis_seeds = hypothesis_seeds(var, anchor_edge, anchor, &silence, &twins);

    DiscoveryBrief {
        variable_key: var.to_string(),
        anchor_relationship: anchor_edge.map(|e| e.artifact_id.clone()),
        sense_summary,
        silence,
        blast_radius,
        twins,
        confidence_score,
        risk_assessment,
        warning_flags,
        executive_summary,
        statistical_summary,
        prompt_fragments,
        hypothesis_seeds,
    }
}

/// Silence acceleration: the time-local (temporal sense) view of each edge
/// against its whole-history effect. Detected when the time-local mean has
/// dropped by more than the threshold and at least half the temporal
/// readings are silent.
fn detect_silence(edges: &[Edge]) -> SilenceFinding {
    let historical: Vec<f64> = edges.iter().map(|e| e.effect_size.abs()).collect();
    let recent: Vec<f64> = edges
        .iter()
        .filter_map(|e| e.temporal_effect.map(f64::abs))
        .collect();

    if historical.is_empty() || recent.is_empty() {
        return SilenceFinding {
            detected: false,
            recent_mean_effect: 0.0,
            historical_mean_effect: mean_of(&historical),
            silent_fraction: 0.0,
        };
    }

    let historical_mean = mean_of(&historical);
    let recent_mean = mean_of(&recent);
    let silent_fraction =
        recent.iter().filter(|&&e| e < SILENT_EFFECT_FLOOR).count() as f64 / recent.len() as f64;

    let detected =
        historical_mean - recent_mean > SILENCE_DROP_THRESHOLD && silent_fraction >= 0.5;

    SilenceFinding {
        detected,
        recent_mean_effect: recent_mean,
        historical_mean_effect: historical_mean,
        silent_fraction,
    }
}

/// Twin segments: variables whose relationship profile mirrors `var`'s.
/// Similarity blends neighborhood overlap with agreement on shared-edge
/// effect sizes.
fn find_twins(graph: &VariableGraph, var: &str) -> Vec<TwinSegment> {
    let my_profile: BTreeMap<&str, f64> = graph
        .edges(var)
        .iter()
        .map(|e| (e.other.as_str(), e.effect_size))
        .collect();
    if my_profile.is_empty() {
        return Vec::new();
    }

    let mut twins = Vec::new();
    for other in graph.variables() {
        if other == var {
            continue;
        }
        let their_profile: BTreeMap<&str, f64> = graph
            .edges(&other)
            .iter()
            .filter(|e| e.other != var)
            .map(|e| (e.other.as_str(), e.effect_size))
            .collect();

        let common: Vec<&str> = my_profile
            .keys()
            .filter(|k| **k != other.as_str() && their_profile.contains_key(**k))
            .copied()
            .collect();
        if common.is_empty() {
            continue;
        }

        let max_neighbors = my_profile.len().max(their_profile.len()) as f64;
        let overlap = common.len() as f64 / max_neighbors;
        let agreement = 1.0
            - common
                .iter()
                .map(|k| (my_profile[k] - their_profile[k]).abs().min(1.0))
                .sum::<f64>()
                / common.len() as f64;
        let similarity = 0.5 * overlap + 0.5 * agreement;

        if similarity >= TWIN_SIMILARITY_THRESHOLD {
            twins.push(TwinSegment {
                other_variable: other,
                similarity,
                common_neighbors: common.len(),
            });
        }
    }
    twins.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.other_variable.cmp(&b.other_variable))
    });
    twins
}

/// Composite confidence from how much the anchor's senses agree.
fn sense_agreement_confidence(anchor: Option<&RelationshipArtifact>) -> f64 {
    let Some(rel) = anchor else { return 0.0 };
    let active: Vec<_> = rel.sense_results.iter().filter(|s| !s.is_skipped()).collect();
    if active.is_empty() {
        return 0.0;
    }
    let avg_confidence =
        active.iter().map(|s| s.confidence).sum::<f64>() / active.len() as f64;
    let agreeing = active
        .iter()
        .filter(|s| s.signal != Signal::Weak)
        .count() as f64
        / active.len() as f64;
    (avg_confidence * (0.5 + 0.5 * agreeing)).clamp(0.0, 1.0)
}

fn collect_warnings(
    edges: &[Edge],
    index: &HashMap<ArtifactId, &RelationshipArtifact>,
) -> Vec<String> {
    let mut flags = BTreeSet::new();
    for edge in edges {
        if let Some(rel) = index.get(&edge.artifact_id) {
            for w in &rel.warnings {
                flags.insert(w.clone());
            }
        }
    }
    flags.into_iter().collect()
}

fn assess_risk(
    silence: &SilenceFinding,
    blast: &BlastRadius,
    warnings: &[String],
) -> RiskAssessment {
    let mut score = blast.radius;
    if silence.detected {
        score += 0.5;
    }
    if !warnings.is_empty() {
        score += 0.25;
    }
    if score >= 0.75 {
        RiskAssessment::High
    } else if score >= 0.35 {
        RiskAssessment::Medium
    } else {
        RiskAssessment::Low
    }
}

fn executive_summary(
    var: &str,
    anchor_edge: Option<&Edge>,
    anchor: Option<&RelationshipArtifact>,
    silence: &SilenceFinding,
    blast: &BlastRadius,
) -> String {
    let Some(edge) = anchor_edge else {
        return format!("{var}: no mined relationships.");
    };
    let significance = anchor.map_or("untested".to_string(), |r| {
        if r.p_value < SIGNIFICANCE_THRESHOLD {
            format!("significant (p={:.4})", r.p_value)
        } else {
            format!("not significant (p={:.3})", r.p_value)
        }
    });
    let mut summary = format!(
        "{var}: strongest link is {} (effect {:+.3}, {significance}); reaches {} variables within {} hops.",
        edge.other, edge.effect_size, blast.affected_count, BLAST_RADIUS_DEPTH
    );
    if silence.detected {
        summary.push_str(" Recent signal has gone quiet relative to history.");
    }
    summary
}

fn statistical_summary(
    var: &str,
    edges: &[Edge],
    anchor: Option<&RelationshipArtifact>,
) -> String {
    let significant = edges.iter().filter(|e| e.p_value < SIGNIFICANCE_THRESHOLD).count();
    let fdr_note = anchor
        .and_then(|r| r.q_value)
        .map_or(String::new(), |q| format!(", anchor q={q:.4}"));
    format!(
        "{var}: {} relationships, {significant} significant at p<{SIGNIFICANCE_THRESHOLD}{fdr_note}",
        edges.len()
    )
}

fn prompt_fragments(
    var: &str,
    anchor_edge: Option<&Edge>,
    silence: &SilenceFinding,
    blast: &BlastRadius,
    twins: &[TwinSegment],
) -> Vec<String> {
    let mut fragments = Vec::new();
    if let Some(edge) = anchor_edge {
        fragments.push(format!(
            "{var} is most strongly linked to {} (effect {:+.3})",
            edge.other, edge.effect_size
        ));
    }
    if blast.affected_count > 0 {
        fragments.push(format!(
            "{var} influences {} variables within {BLAST_RADIUS_DEPTH} hops (centrality {:.2})",
            blast.affected_count, blast.centrality
        ));
    }
    if silence.detected {
        fragments.push(format!(
            "{var}'s recent correlations dropped from {:.2} to {:.2}",
            silence.historical_mean_effect, silence.recent_mean_effect
        ));
    }
    for twin in twins.iter().take(2) {
        fragments.push(format!(
            "{var} and {} have near-identical relationship profiles (similarity {:.2})",
            twin.other_variable, twin.similarity
        ));
    }
    fragments
}

fn hypothesis_seeds(
    var: &str,
    anchor_edge: Option<&Edge>,
    anchor: Option<&RelationshipArtifact>,
    silence: &SilenceFinding,
    twins: &[TwinSegment],
) -> Vec<HypothesisSeed> {
    let mut seeds = Vec::new();
    if let (Some(edge), Some(rel)) = (anchor_edge, anchor) {
        if rel.p_value < SIGNIFICANCE_THRESHOLD && edge.effect_size.abs() >= SILENT_EFFECT_FLOOR {
            seeds.push(HypothesisSeed {
                category: "direct_causal".to_string(),
                description: format!("{var} may directly drive {}", edge.other),
                priority: 1,
                confidence: (1.0 - rel.p_value).clamp(0.0, 1.0),
            });
        }
    }
    if silence.detected {
        seeds.push(HypothesisSeed {
            category: "effect_modification".to_string(),
            description: format!("{var}'s influence appears regime-dependent (recent silence)"),
            priority: 2,
            confidence: silence.silent_fraction,
        });
    }
    if let Some(twin) = twins.first() {
        seeds.push(HypothesisSeed {
            category: "proxy_relationship".to_string(),
            description: format!(
                "{var} and {} may proxy the same underlying factor",
                twin.other_variable
            ),
            priority: 3,
            confidence: twin.similarity,
        });
    }
    seeds
}

fn mean_of(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}
