//! Heuristic hypothesis generator
//!
//! Rule-based proposal straight from relationship scores: no model call, no
//! nondeterminism. Each kept relationship becomes one candidate citing the
//! relationship artifact that justifies it.
//!
//! Direction and mechanism inference are name/shape heuristics and are
//! openly fragile; the term lists live in [`DirectionRules`] as plain data
//! so deployments can swap vocabularies without touching the rules.

use tracing::debug;

use crate::config::defaults::SIGNIFICANCE_THRESHOLD;
use crate::core::{
    Artifact, ArtifactId, ArtifactPayload, GenerationAudit, GeneratorType, HypothesisCandidate,
    MechanismCategory, RelationshipArtifact,
};

use super::{hypothesis_id, stability, GeneratorContext};

/// Minimum |effect| for a relationship to seed a hypothesis.
const MIN_EFFECT: f64 = 0.1;

/// Name-based directionality vocabulary. A variable whose key contains a
/// cause term reads as an upstream lever; an effect term as a downstream
/// outcome.
#[derive(Debug, Clone)]
pub struct DirectionRules {
    pub cause_terms: Vec<String>,
    pub effect_terms: Vec<String>,
}

impl Default for DirectionRules {
    fn default() -> Self {
        Self {
            cause_terms: [
                "spend", "dose", "price", "treatment", "exposure", "input", "budget", "rate",
                "temperature", "pressure",
            ]
            .iter()
            .map(|s| (*s).to_string())
            .collect(),
            effect_terms: [
                "revenue", "outcome", "conversion", "score", "result", "output", "churn",
                "sales", "yield", "response",
            ]
            .iter()
            .map(|s| (*s).to_string())
            .collect(),
        }
    }
}

impl DirectionRules {
    fn matches(terms: &[String], key: &str) -> bool {
        let lower = key.to_ascii_lowercase();
        terms.iter().any(|t| lower.contains(t.as_str()))
    }

    /// Default direction is canonical (x → y). Swap only when X carries no
    /// cause indicator while Y does — the one situation where the names
    /// argue the canonical order backwards.
    pub fn should_swap(&self, x_key: &str, y_key: &str) -> bool {
        let x_causal = Self::matches(&self.cause_terms, x_key);
        let y_causal = Self::matches(&self.cause_terms, y_key);
        let x_effectish = Self::matches(&self.effect_terms, x_key);
        (!x_causal && y_causal) || (x_effectish && !y_causal && !Self::matches(&self.effect_terms, y_key))
    }
}

/// Composite relationship score: significance, evidence stability, effect.
pub fn composite_score(rel: &RelationshipArtifact) -> f64 {
    0.5 * (1.0 - rel.p_value) + 0.3 * stability(rel) + 0.2 * rel.effect_size.abs().min(1.0)
}

/// Mechanism rule table over (|effect|, stability, p, warnings, test_used).
pub fn infer_mechanism(rel: &RelationshipArtifact) -> MechanismCategory {
    let effect = rel.effect_size.abs();
    let stab = stability(rel);

    // derived/perfect pairs are measurement artifacts, not causal links
    if rel
        .warnings
        .iter()
        .any(|w| w == "PERFECT_CORRELATION" || w == "ELEVATED_MISSINGNESS")
        && effect >= 0.95
    {
        return MechanismCategory::MeasurementBias;
    }

    if effect >= 0.7 {
        if stab >= 0.5 {
            MechanismCategory::DirectCausal
        } else {
            // one loud sense, the rest silent: likely proxying something else
            MechanismCategory::ProxyRelationship
        }
    } else if effect >= 0.3 {
        if rel.p_value < SIGNIFICANCE_THRESHOLD && stab >= 0.5 && rel.test_type != "chi_square" {
            MechanismCategory::DirectCausal
        } else {
            MechanismCategory::ConfoundingPath
        }
    } else {
        MechanismCategory::EffectModification
    }
}

/// Generate candidates: score, rank, filter, infer direction and mechanism.
pub fn generate(context: &GeneratorContext<'_>, rules: &DirectionRules) -> (Vec<Artifact>, Artifact) {
    let mut scored: Vec<(f64, &ArtifactId, &RelationshipArtifact)> = context
        .relationship_views()
        .into_iter()
        .map(|(id, rel)| (composite_score(rel), id, rel))
        .collect();

    // descending score, canonical pair key breaks ties
    scored.sort_by(|a, b| {
        b.0.partial_cmp(&a.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.1.cmp(b.1))
    });
    scored.truncate(2 * context.max_hypotheses);

    let kept: Vec<(&ArtifactId, &RelationshipArtifact)> = scored
        .into_iter()
        .filter(|(_, _, rel)| {
            rel.p_value <= SIGNIFICANCE_THRESHOLD && rel.effect_size.abs() >= MIN_EFFECT
        })
        .map(|(_, id, rel)| (id, rel))
        .collect();

    let mut hypotheses = Vec::new();
    for (id, rel) in kept.into_iter().take(context.max_hypotheses) {
        let (cause, effect) = if rules.should_swap(&rel.variable_x, &rel.variable_y) {
            (rel.variable_y.clone(), rel.variable_x.clone())
        } else {
            (rel.variable_x.clone(), rel.variable_y.clone())
        };
        let mechanism = infer_mechanism(rel);
        debug!(
            cause = %cause,
            effect = %effect,
            mechanism = ?mechanism,
            source = %id,
            "heuristic candidate"
        );

        let candidate = HypothesisCandidate {
            cause_key: cause.clone(),
            effect_key: effect.clone(),
            confounder_keys: Vec::new(),
            mechanism_category: mechanism,
            rationale: format!(
                "{} test found effect {:+.3} (p={:.4}, n={}) linking {cause} to {effect}",
                rel.test_type, rel.effect_size, rel.p_value, rel.sample_size
            ),
            suggested_rigor: context.rigor,
            supporting_artifacts: vec![id.clone()],
            generator_type: GeneratorType::Heuristic,
        };
        let index = hypotheses.len();
        hypotheses.push(Artifact::new(
            hypothesis_id(context.run_id, index),
            context.run_id.clone(),
            ArtifactPayload::Hypothesis(candidate),
        ));
    }

    let audit = Artifact::new(
        ArtifactId(format!("generation_audit:{}", context.run_id)),
        context.run_id.clone(),
        ArtifactPayload::GenerationAudit(GenerationAudit {
            generator_type: GeneratorType::Heuristic,
            model: None,
            temperature: None,
            max_tokens: None,
            prompt_hash: None,
            response_hash: None,
            candidates_emitted: hypotheses.len(),
            dropped: Vec::new(),
        }),
    );

    (hypotheses, audit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{FamilyId, RigorLevel, RunId};
    use crate::generate::test_support::relationship;

    fn context<'a>(
        run_id: &'a RunId,
        family: &'a FamilyId,
        relationships: &'a [Artifact],
        variables: &'a [String],
    ) -> GeneratorContext<'a> {
        GeneratorContext {
            run_id,
            family_id: family,
            relationships,
            briefs: &[],
            admissible_variables: variables,
            max_hypotheses: 3,
            rigor: RigorLevel::Standard,
        }
    }

    #[test]
    fn strong_relationships_become_candidates() {
        let run_id = RunId("run-g".into());
        let family = FamilyId("fam".into());
        let rels = vec![
            relationship("a", "b", 0.85, 0.001),
            relationship("c", "d", 0.6, 0.01),
            relationship("e", "f", 0.05, 0.8), // weak and insignificant: dropped
        ];
        let vars: Vec<String> = ["a", "b", "c", "d", "e", "f"].iter().map(|s| s.to_string()).collect();
        let (hypotheses, audit) = generate(&context(&run_id, &family, &rels, &vars), &DirectionRules::default());

        assert_eq!(hypotheses.len(), 2);
        let ArtifactPayload::Hypothesis(first) = &hypotheses[0].payload else {
            panic!("expected hypothesis");
        };
        assert_eq!(first.cause_key, "a");
        assert_eq!(first.effect_key, "b");
        assert_eq!(first.supporting_artifacts.len(), 1);
        assert_eq!(first.generator_type, GeneratorType::Heuristic);

        let ArtifactPayload::GenerationAudit(a) = &audit.payload else {
            panic!("expected audit");
        };
        assert_eq!(a.candidates_emitted, 2);
    }

    #[test]
    fn output_is_ordered_by_descending_score() {
        let run_id = RunId("run-g".into());
        let family = FamilyId("fam".into());
        let rels = vec![
            relationship("m", "n", 0.4, 0.04),
            relationship("p", "q", 0.9, 0.0001),
        ];
        let vars: Vec<String> = ["m", "n", "p", "q"].iter().map(|s| s.to_string()).collect();
        let (hypotheses, _) = generate(&context(&run_id, &family, &rels, &vars), &DirectionRules::default());

        let causes: Vec<String> = hypotheses
            .iter()
            .filter_map(|h| match &h.payload {
                ArtifactPayload::Hypothesis(c) => Some(c.cause_key.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(causes, vec!["p", "m"]);
    }

    #[test]
    fn name_heuristics_swap_direction() {
        let rules = DirectionRules::default();
        // canonical pair: (revenue, spend) — spend carries the cause term
        assert!(rules.should_swap("revenue", "ad_spend"));
        assert!(!rules.should_swap("ad_spend", "revenue"));
        // neither side names a lever: canonical order stands
        assert!(!rules.should_swap("alpha", "beta"));
    }

    #[test]
    fn mechanism_table_covers_the_categories() {
        let strong = relationship("a", "b", 0.9, 0.001);
        let ArtifactPayload::Relationship(strong) = &strong.payload else { unreachable!() };
        assert_eq!(infer_mechanism(strong), MechanismCategory::DirectCausal);

        let faint = relationship("a", "b", 0.15, 0.04);
        let ArtifactPayload::Relationship(faint) = &faint.payload else { unreachable!() };
        assert_eq!(infer_mechanism(faint), MechanismCategory::EffectModification);

        let mut perfect = relationship("a", "b", 1.0, 0.0);
        if let ArtifactPayload::Relationship(r) = &mut perfect.payload {
            r.warnings.push("PERFECT_CORRELATION".into());
        }
        let ArtifactPayload::Relationship(perfect) = &perfect.payload else { unreachable!() };
        assert_eq!(infer_mechanism(perfect), MechanismCategory::MeasurementBias);
    }

    #[test]
    fn respects_max_hypotheses() {
        let run_id = RunId("run-g".into());
        let family = FamilyId("fam".into());
        let rels: Vec<Artifact> = (0..10)
            .map(|i| relationship(&format!("x{i}"), &format!("y{i}"), 0.8, 0.001))
            .collect();
        let vars: Vec<String> = (0..10)
            .flat_map(|i| [format!("x{i}"), format!("y{i}")])
            .collect();
        let mut ctx = context(&run_id, &family, &rels, &vars);
        ctx.max_hypotheses = 4;
        let (hypotheses, _) = generate(&ctx, &DirectionRules::default());
        assert_eq!(hypotheses.len(), 4);
    }
}
