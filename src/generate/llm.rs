//! LLM hypothesis generator
//!
//! A pure function over relationships plus one outbound chat call. The model
//! is only ever a *proposer*: every candidate it returns must cite
//! already-ledgered relationships by rel_key, and the guardrails drop
//! anything that does not resolve. Prompt assembly is deterministic (sorted
//! variables, confidence-ordered briefs, canonical rel_keys) so the prompt
//! hash is replay-stable for a given ledger state.
//!
//! Failure of any kind — transport, non-2xx, timeout, unparseable JSON —
//! degrades to the heuristic generator when `fallback_to_heuristic` is set,
//! and surfaces as `llm_failed` otherwise.

use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use tracing::{info, warn};

use crate::config::defaults::SIGNIFICANCE_THRESHOLD;
use crate::config::LlmConfig;
use crate::core::{
    sha256_hex, Artifact, ArtifactId, ArtifactPayload, DropReason, DroppedCandidate,
    EngineError, EngineResult, GenerationAudit, GeneratorType, HypothesisCandidate,
    MechanismCategory, RelationshipArtifact, RigorLevel, Signal,
};

use super::client::LlmClientError;
use super::heuristic::{self, DirectionRules};
use super::{hypothesis_id, stability, GeneratorContext};

/// Sense confidence above which a relationship is admitted even when its
/// primary p-value misses the significance bar.
const SENSE_CONFIDENCE_FLOOR: f64 = 0.7;

/// Briefs included in the prompt, at most.
const MAX_PROMPT_BRIEFS: usize = 5;

const SYSTEM_PROMPT: &str = r#"You are a causal-hypothesis proposer for a statistical discovery pipeline.
You receive mined pairwise relationships with their evidence, per-variable briefs, and a variable registry.

### RULES
1. Propose at most the requested number of hypotheses.
2. Every hypothesis MUST cite at least one rel_key from the provided relationships in supporting_artifacts.
3. cause_key and effect_key MUST come from the variable registry and differ.
4. mechanism_category is one of: direct_causal, effect_modification, confounding_path, proxy_relationship, measurement_bias.
5. suggested_rigor is one of: basic, standard, decision.
6. Output ONLY a JSON array of candidate objects. No preamble. No markdown.

### OUTPUT SHAPE
[{"cause_key": "...", "effect_key": "...", "confounder_keys": [], "mechanism_category": "direct_causal", "rationale": "...", "suggested_rigor": "standard", "supporting_artifacts": ["relationship:..."]}]"#;

/// Seam for the outbound text model; the HTTP client and test mocks both
/// implement this.
#[async_trait]
pub trait TextModel: Send + Sync {
    async fn complete(&self, system: &str, user: &str) -> Result<String, LlmClientError>;
}

/// Candidate record as the model returns it — everything optional except the
/// keys and citations, because model output is untrusted.
#[derive(Debug, Deserialize)]
struct RawCandidate {
    #[serde(default)]
    cause_key: String,
    #[serde(default)]
    effect_key: String,
    #[serde(default)]
    confounder_keys: Vec<String>,
    #[serde(default)]
    mechanism_category: Option<String>,
    #[serde(default)]
    rationale: Option<String>,
    #[serde(default)]
    suggested_rigor: Option<String>,
    #[serde(default)]
    supporting_artifacts: Vec<String>,
}

/// Generate hypotheses via the LLM, with guardrail validation and audit.
pub async fn generate(
    context: &GeneratorContext<'_>,
    model: &dyn TextModel,
    config: &LlmConfig,
) -> EngineResult<(Vec<Artifact>, Artifact)> {
    let top = extract_top_relationships(context);
    let index = context.relationship_index();
    let user_prompt = assemble_prompt(context, &top);
    let prompt_hash = sha256_hex(format!("{SYSTEM_PROMPT}\u{1f}{user_prompt}").as_bytes());

    let response = match tokio::time::timeout(config.timeout, model.complete(SYSTEM_PROMPT, &user_prompt)).await
    {
        Ok(Ok(text)) => text,
        Ok(Err(err)) => {
            return fallback_or_fail(context, config, format!("chat call failed: {err}"));
        }
        Err(_) => {
            return fallback_or_fail(
                context,
                config,
                format!("chat call timed out after {:?}", config.timeout),
            );
        }
    };
    let response_hash = sha256_hex(response.as_bytes());

    let raw: Vec<RawCandidate> = match serde_json::from_str(strip_code_fences(&response)) {
        Ok(parsed) => parsed,
        Err(err) => {
            return fallback_or_fail(context, config, format!("candidate JSON parse failed: {err}"));
        }
    };

    let (candidates, dropped) = validate_candidates(raw, context, &index);

    let hypotheses: Vec<Artifact> = candidates
        .into_iter()
        .take(context.max_hypotheses)
        .enumerate()
        .map(|(i, candidate)| {
            Artifact::new(
                hypothesis_id(context.run_id, i),
                context.run_id.clone(),
                ArtifactPayload::Hypothesis(candidate),
            )
        })
        .collect();

    info!(
        emitted = hypotheses.len(),
        dropped = dropped.len(),
        "llm generation complete"
    );

    let audit = Artifact::new(
        ArtifactId(format!("generation_audit:{}", context.run_id)),
        context.run_id.clone(),
        ArtifactPayload::GenerationAudit(GenerationAudit {
            generator_type: GeneratorType::Llm,
            model: Some(config.model.clone()),
            temperature: Some(config.temperature),
            max_tokens: Some(config.max_tokens),
            prompt_hash: Some(prompt_hash),
            response_hash: Some(response_hash),
            candidates_emitted: hypotheses.len(),
            dropped,
        }),
    );

    Ok((hypotheses, audit))
}

fn fallback_or_fail(
    context: &GeneratorContext<'_>,
    config: &LlmConfig,
    message: String,
) -> EngineResult<(Vec<Artifact>, Artifact)> {
    if config.fallback_to_heuristic {
        warn!(reason = %message, "llm path failed, falling back to heuristic generator");
        Ok(heuristic::generate(context, &DirectionRules::default()))
    } else {
        Err(EngineError::LlmFailed(message))
    }
}

/// Admission + composite scoring, descending, top 2·max.
///
/// A relationship is admitted when its primary p clears the significance
/// bar, or when any sense is simultaneously confident and non-weak.
fn extract_top_relationships<'a>(
    context: &GeneratorContext<'a>,
) -> Vec<(&'a ArtifactId, &'a RelationshipArtifact)> {
    let mut scored: Vec<(f64, &ArtifactId, &RelationshipArtifact)> = context
        .relationship_views()
        .into_iter()
        .filter(|(_, rel)| {
            rel.p_value <= SIGNIFICANCE_THRESHOLD
                || rel.sense_results.iter().any(|s| {
                    !s.is_skipped()
                        && s.confidence > SENSE_CONFIDENCE_FLOOR
                        && s.signal != Signal::Weak
                })
        })
        .map(|(id, rel)| {
            let active: Vec<_> = rel.sense_results.iter().filter(|s| !s.is_skipped()).collect();
            let avg_sense_confidence = if active.is_empty() {
                0.0
            } else {
                active.iter().map(|s| s.confidence).sum::<f64>() / active.len() as f64
            };
            let score =
                0.5 * (1.0 - rel.p_value) + 0.3 * avg_sense_confidence + 0.2 * stability(rel);
            (score, id, rel)
        })
        .collect();

    scored.sort_by(|a, b| {
        b.0.partial_cmp(&a.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.1.cmp(b.1))
    });
    scored.truncate(2 * context.max_hypotheses);
    scored.into_iter().map(|(_, id, rel)| (id, rel)).collect()
}

/// Deterministic JSON prompt payload.
fn assemble_prompt(
    context: &GeneratorContext<'_>,
    top: &[(&ArtifactId, &RelationshipArtifact)],
) -> String {
    let relationships: Vec<serde_json::Value> = top
        .iter()
        .map(|(id, rel)| {
            let senses: Vec<serde_json::Value> = rel
                .sense_results
                .iter()
                .filter(|s| !s.is_skipped())
                .map(|s| {
                    serde_json::json!({
                        "sense": s.sense_name,
                        "effect_size": s.effect_size,
                        "p_value": s.p_value,
                        "signal": s.signal,
                    })
                })
                .collect();
            serde_json::json!({
                "rel_key": id.0,
                "variable_x": rel.variable_x,
                "variable_y": rel.variable_y,
                "test_type": rel.test_type,
                "effect_size": rel.effect_size,
                "p_value": rel.p_value,
                "q_value": rel.q_value,
                "sample_size": rel.sample_size,
                "senses": senses,
            })
        })
        .collect();

    let mut variables: Vec<String> = top
        .iter()
        .flat_map(|(_, rel)| [rel.variable_x.clone(), rel.variable_y.clone()])
        .collect();
    variables.sort();
    variables.dedup();

    let briefs: Vec<serde_json::Value> = context
        .briefs_by_confidence()
        .into_iter()
        .take(MAX_PROMPT_BRIEFS)
        .map(|b| {
            serde_json::json!({
                "variable": b.variable_key,
                "summary": b.executive_summary,
                "fragments": b.prompt_fragments,
                "confidence": b.confidence_score,
            })
        })
        .collect();

    let rigor = match context.rigor {
        RigorLevel::Basic => "basic",
        RigorLevel::Standard => "standard",
        RigorLevel::Decision => "decision",
    };

    let payload = serde_json::json!({
        "relationships": relationships,
        "variables": variables,
        "briefs": briefs,
        "rigor_profile": rigor,
        "max_hypotheses": context.max_hypotheses,
    });
    payload.to_string()
}

/// Strip one fenced-code wrapper if present (```json ... ``` or ``` ... ```).
fn strip_code_fences(text: &str) -> &str {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    let fence = FENCE.get_or_init(|| {
        #[allow(clippy::expect_used)]
        Regex::new(r"(?s)\A```(?:json)?\s*(.*?)\s*```\z").expect("fence pattern is valid")
    });
    let trimmed = text.trim();
    match fence.captures(trimmed).and_then(|c| c.get(1)) {
        Some(inner) => inner.as_str(),
        None => trimmed,
    }
}

/// Guardrails, in order; the first failure drops the candidate and records
/// why. Unresolvable confounders are pruned silently — they are advisory.
fn validate_candidates(
    raw: Vec<RawCandidate>,
    context: &GeneratorContext<'_>,
    index: &std::collections::HashMap<String, ArtifactId>,
) -> (Vec<HypothesisCandidate>, Vec<DroppedCandidate>) {
    let mut accepted = Vec::new();
    let mut dropped = Vec::new();

    for (i, candidate) in raw.into_iter().enumerate() {
        if candidate.supporting_artifacts.is_empty() {
            dropped.push(DroppedCandidate {
                index: i,
                reason: DropReason::MissingCitations,
                message: "candidate cited no supporting artifacts".into(),
            });
            continue;
        }
        if candidate.cause_key.is_empty() || !context.is_admissible(&candidate.cause_key) {
            dropped.push(DroppedCandidate {
                index: i,
                reason: DropReason::InvalidCauseKey,
                message: format!("cause_key {:?} not in registry", candidate.cause_key),
            });
            continue;
        }
        if candidate.effect_key.is_empty()
            || !context.is_admissible(&candidate.effect_key)
            || candidate.effect_key == candidate.cause_key
        {
            dropped.push(DroppedCandidate {
                index: i,
                reason: DropReason::InvalidEffectKey,
                message: format!(
                    "effect_key {:?} not in registry or equals cause",
                    candidate.effect_key
                ),
            });
            continue;
        }

        let resolved: Vec<ArtifactId> = candidate
            .supporting_artifacts
            .iter()
            .filter_map(|key| index.get(key).cloned())
            .collect();
        if resolved.is_empty() {
            dropped.push(DroppedCandidate {
                index: i,
                reason: DropReason::InvalidCitations,
                message: "no supporting artifact resolved to a known relationship".into(),
            });
            continue;
        }

        let confounders: Vec<String> = candidate
            .confounder_keys
            .into_iter()
            .filter(|k| context.is_admissible(k))
            .collect();

        let mechanism = candidate
            .mechanism_category
            .as_deref()
            .and_then(MechanismCategory::parse)
            .unwrap_or(MechanismCategory::DirectCausal);
        let rigor = candidate
            .suggested_rigor
            .as_deref()
            .and_then(RigorLevel::parse)
            .unwrap_or(RigorLevel::Standard);

        accepted.push(HypothesisCandidate {
            cause_key: candidate.cause_key,
            effect_key: candidate.effect_key,
            confounder_keys: confounders,
            mechanism_category: mechanism,
            rationale: candidate.rationale.unwrap_or_default(),
            suggested_rigor: rigor,
            supporting_artifacts: resolved,
            generator_type: GeneratorType::Llm,
        });
    }

    (accepted, dropped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{FamilyId, RunId};
    use crate::generate::test_support::relationship;

    struct ScriptedModel(Result<String, ()>);

    #[async_trait]
    impl TextModel for ScriptedModel {
        async fn complete(&self, _system: &str, _user: &str) -> Result<String, LlmClientError> {
            match &self.0 {
                Ok(text) => Ok(text.clone()),
                Err(()) => Err(LlmClientError::MissingContent),
            }
        }
    }

    fn vars(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| (*s).to_string()).collect()
    }

    fn run_generate(
        relationships: &[Artifact],
        variables: &[String],
        model: &ScriptedModel,
        fallback: bool,
    ) -> EngineResult<(Vec<Artifact>, Artifact)> {
        let run_id = RunId("run-g".into());
        let family = FamilyId("fam".into());
        let context = GeneratorContext {
            run_id: &run_id,
            family_id: &family,
            relationships,
            briefs: &[],
            admissible_variables: variables,
            max_hypotheses: 3,
            rigor: RigorLevel::Standard,
        };
        let config = LlmConfig {
            fallback_to_heuristic: fallback,
            ..LlmConfig::default()
        };
        tokio_test::block_on(generate(&context, model, &config))
    }

    #[test]
    fn valid_candidate_passes_guardrails() {
        let rels = vec![relationship("a", "b", 0.8, 0.001)];
        let rel_key = rels[0].id.0.clone();
        let response = format!(
            r#"[{{"cause_key":"a","effect_key":"b","mechanism_category":"direct_causal","rationale":"a drives b","suggested_rigor":"standard","supporting_artifacts":["{rel_key}"]}}]"#
        );
        let (hypotheses, audit) =
            run_generate(&rels, &vars(&["a", "b"]), &ScriptedModel(Ok(response)), false)
                .expect("generates");
        assert_eq!(hypotheses.len(), 1);
        let ArtifactPayload::GenerationAudit(a) = &audit.payload else { panic!() };
        assert!(a.dropped.is_empty());
        assert_eq!(a.generator_type, GeneratorType::Llm);
        assert!(a.prompt_hash.is_some());
    }

    #[test]
    fn missing_citations_drop_the_candidate() {
        let rels = vec![relationship("a", "b", 0.8, 0.001)];
        let response =
            r#"[{"cause_key":"a","effect_key":"b","supporting_artifacts":[]}]"#.to_string();
        let (hypotheses, audit) =
            run_generate(&rels, &vars(&["a", "b"]), &ScriptedModel(Ok(response)), false)
                .expect("generates");
        assert!(hypotheses.is_empty());
        let ArtifactPayload::GenerationAudit(a) = &audit.payload else { panic!() };
        assert_eq!(a.dropped.len(), 1);
        assert_eq!(a.dropped[0].reason, DropReason::MissingCitations);
    }

    #[test]
    fn unknown_keys_and_unresolvable_citations_drop() {
        let rels = vec![relationship("a", "b", 0.8, 0.001)];
        let response = r#"[
            {"cause_key":"ghost","effect_key":"b","supporting_artifacts":["x"]},
            {"cause_key":"a","effect_key":"a","supporting_artifacts":["x"]},
            {"cause_key":"a","effect_key":"b","supporting_artifacts":["relationship:nope"]}
        ]"#
        .to_string();
        let (hypotheses, audit) =
            run_generate(&rels, &vars(&["a", "b"]), &ScriptedModel(Ok(response)), false)
                .expect("generates");
        assert!(hypotheses.is_empty());
        let ArtifactPayload::GenerationAudit(a) = &audit.payload else { panic!() };
        let reasons: Vec<DropReason> = a.dropped.iter().map(|d| d.reason).collect();
        assert_eq!(
            reasons,
            vec![
                DropReason::InvalidCauseKey,
                DropReason::InvalidEffectKey,
                DropReason::InvalidCitations
            ]
        );
    }

    #[test]
    fn fenced_response_is_tolerated() {
        let rels = vec![relationship("a", "b", 0.8, 0.001)];
        let rel_key = rels[0].id.0.clone();
        let response = format!(
            "```json\n[{{\"cause_key\":\"a\",\"effect_key\":\"b\",\"supporting_artifacts\":[\"{rel_key}\"]}}]\n```"
        );
        let (hypotheses, _) =
            run_generate(&rels, &vars(&["a", "b"]), &ScriptedModel(Ok(response)), false)
                .expect("generates");
        assert_eq!(hypotheses.len(), 1);
        // defaults applied for missing mechanism/rigor
        let ArtifactPayload::Hypothesis(h) = &hypotheses[0].payload else { panic!() };
        assert_eq!(h.mechanism_category, MechanismCategory::DirectCausal);
        assert_eq!(h.suggested_rigor, RigorLevel::Standard);
    }

    #[test]
    fn transport_failure_falls_back_to_heuristic() {
        let rels = vec![relationship("a", "b", 0.8, 0.001)];
        let (hypotheses, audit) =
            run_generate(&rels, &vars(&["a", "b"]), &ScriptedModel(Err(())), true)
                .expect("falls back");
        assert!(!hypotheses.is_empty());
        let ArtifactPayload::GenerationAudit(a) = &audit.payload else { panic!() };
        assert_eq!(a.generator_type, GeneratorType::Heuristic);
    }

    #[test]
    fn transport_failure_surfaces_when_fallback_disabled() {
        let rels = vec![relationship("a", "b", 0.8, 0.001)];
        let err = run_generate(&rels, &vars(&["a", "b"]), &ScriptedModel(Err(())), false)
            .unwrap_err();
        assert_eq!(err.kind_tag(), "llm_failed");
    }

    #[test]
    fn parse_failure_falls_back() {
        let rels = vec![relationship("a", "b", 0.8, 0.001)];
        let (hypotheses, audit) = run_generate(
            &rels,
            &vars(&["a", "b"]),
            &ScriptedModel(Ok("the model waxed lyrical instead".into())),
            true,
        )
        .expect("falls back");
        assert!(!hypotheses.is_empty());
        let ArtifactPayload::GenerationAudit(a) = &audit.payload else { panic!() };
        assert_eq!(a.generator_type, GeneratorType::Heuristic);
    }

    #[test]
    fn fence_stripping_variants() {
        assert_eq!(strip_code_fences("[1]"), "[1]");
        assert_eq!(strip_code_fences("```json\n[1]\n```"), "[1]");
        assert_eq!(strip_code_fences("```\n[1]\n```"), "[1]");
        assert_eq!(strip_code_fences("  ```json\n[]\n```  "), "[]");
    }

    #[test]
    fn prompt_is_deterministic() {
        let rels = vec![
            relationship("b", "c", 0.7, 0.01),
            relationship("a", "b", 0.8, 0.001),
        ];
        let run_id = RunId("run-g".into());
        let family = FamilyId("fam".into());
        let context = GeneratorContext {
            run_id: &run_id,
            family_id: &family,
            relationships: &rels,
            briefs: &[],
            admissible_variables: &vars(&["a", "b", "c"]),
            max_hypotheses: 3,
            rigor: RigorLevel::Decision,
        };
        let top = extract_top_relationships(&context);
        let p1 = assemble_prompt(&context, &top);
        let p2 = assemble_prompt(&context, &top);
        assert_eq!(p1, p2);
        assert!(p1.contains("\"rigor_profile\":\"decision\""));
    }
}
