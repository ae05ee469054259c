//! Pipeline orchestrator — layers 0 → 1 → 2 under one run identifier
//!
//! Drives sweep → briefs → generator → referee, writing every layer's
//! artifacts to the ledger before the next layer starts; no layer ever reads
//! another's in-process state. One `CancellationToken` scopes the whole run:
//! cancellation between layers leaves finished layers ledgered and
//! unfinished layers entirely absent, never partial.
//!
//! The run is reproducible from `(snapshot_id, cohort_hash, registry_hash,
//! seed)`: the run ID derives from that quadruple and the final fingerprint
//! commits to every artifact written under it.

use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::defaults::{MAX_NUM_SHUFFLES, MIN_NUM_SHUFFLES};
use crate::config::{EngineConfig, LlmConfig};
use crate::core::{
    Artifact, ArtifactId, ArtifactPayload, EngineError, EngineResult, GeneratorType,
    MatrixBundle, RigorLevel, RunId, RunManifest, StatType, VerdictStatus,
};
use crate::generate::{heuristic, llm, GeneratorContext, OpenAiClient, TextModel};
use crate::ledger::{self, ArtifactStore};
use crate::referee;
use crate::sweep::{self, StagePlan};

/// One pipeline invocation.
#[derive(Clone)]
pub struct PipelineRequest {
    pub snapshot_id: String,
    pub cohort_hash: String,
    pub bundle: Arc<MatrixBundle>,
    pub rigor: RigorLevel,
    pub max_hypotheses: usize,
    pub seed: u64,
    pub generator_mode: GeneratorType,
}

/// Result summary returned to callers; everything else is in the ledger.
#[derive(Debug)]
pub struct PipelineOutcome {
    pub run_id: RunId,
    pub fingerprint: String,
    pub manifest: RunManifest,
    pub verdicts: Vec<Artifact>,
}

/// Orchestrator: owns configs and the optional injected text model.
pub struct PipelineOrchestrator {
    engine_config: EngineConfig,
    llm_config: LlmConfig,
    /// Injected model (tests, alternative backends); when absent and the
    /// mode is `llm`, an HTTP client is built from config.
    model: Option<Arc<dyn TextModel>>,
}

impl PipelineOrchestrator {
    pub fn new(engine_config: EngineConfig, llm_config: LlmConfig) -> Self {
        Self {
            engine_config,
            llm_config,
            model: None,
        }
    }

    pub fn with_model(mut self, model: Arc<dyn TextModel>) -> Self {
        self.model = Some(model);
        self
    }

    /// Run the full pipeline, writing artifacts to `store` as each layer
    /// completes.
    pub async fn run(
        &self,
        request: PipelineRequest,
        store: &dyn ArtifactStore,
        cancel: CancellationToken,
    ) -> EngineResult<PipelineOutcome> {
        let started = Instant::now();
        let registry_hash = request.bundle.registry_hash();
        let run_id = RunId::derive(
            &request.snapshot_id,
            &request.cohort_hash,
            &registry_hash,
            request.seed,
        );
        info!(
            run_id = %run_id,
            snapshot = %request.snapshot_id,
            seed = request.seed,
            generator = ?request.generator_mode,
            "pipeline starting"
        );

        // ── Layer 0: pairwise sweep ─────────────────────────────────────────
        let outcome = sweep::run(
            Arc::clone(&request.bundle),
            run_id.clone(),
            request.snapshot_id.clone(),
            request.cohort_hash.clone(),
            StagePlan::default(),
            &self.engine_config,
            cancel.clone(),
        )
        .await?;

        for artifact in outcome
            .relationships
            .iter()
            .chain(outcome.skipped.iter())
            .chain([&outcome.family, &outcome.manifest])
        {
            store.store(artifact)?;
        }
        self.checkpoint(&cancel)?;

        // ── Discovery briefs ────────────────────────────────────────────────
        let briefs = crate::brief::build_briefs(&outcome.relationships, &run_id);
        for artifact in &briefs {
            store.store(artifact)?;
        }
        self.checkpoint(&cancel)?;

        // ── Layer 1: hypothesis generation ──────────────────────────────────
        let admissible: Vec<String> = request
            .bundle
            .columns
            .iter()
            .filter(|c| {
                matches!(
                    c.stat_type,
                    StatType::Numeric | StatType::Categorical | StatType::Binary
                )
            })
            .map(|c| c.key.clone())
            .collect();
        let context = GeneratorContext {
            run_id: &run_id,
            family_id: &outcome.family_id,
            relationships: &outcome.relationships,
            briefs: &briefs,
            admissible_variables: &admissible,
            max_hypotheses: request.max_hypotheses,
            rigor: request.rigor,
        };

        let (hypotheses, audit) = match request.generator_mode {
            GeneratorType::Heuristic => {
                heuristic::generate(&context, &heuristic::DirectionRules::default())
            }
            GeneratorType::Llm => self.generate_via_llm(&context).await?,
        };
        for artifact in hypotheses.iter().chain([&audit]) {
            store.store(artifact)?;
        }
        self.checkpoint(&cancel)?;

        // ── Layer 2: permutation referee ────────────────────────────────────
        let num_shuffles = self
            .engine_config
            .num_shuffles
            .clamp(MIN_NUM_SHUFFLES, MAX_NUM_SHUFFLES);
        let mut verdicts = Vec::new();
        let mut validated = 0usize;
        let mut rejected = 0usize;
        for hypothesis in &hypotheses {
            self.checkpoint(&cancel)?;
            let ArtifactPayload::Hypothesis(candidate) = &hypothesis.payload else {
                continue;
            };
            let verdict = referee::judge(
                &hypothesis.id,
                candidate,
                &outcome.relationships,
                Arc::clone(&request.bundle),
                &run_id,
                request.seed,
                num_shuffles,
                cancel.clone(),
            )
            .await?;
            if let ArtifactPayload::Verdict(v) = &verdict.payload {
                match v.status {
                    VerdictStatus::Validated => validated += 1,
                    _ => rejected += 1,
                }
            }
            store.store(&verdict)?;
            verdicts.push(verdict);
        }

        // ── Fingerprint + run manifest ──────────────────────────────────────
        let fingerprint = ledger::fingerprint(store, &run_id, &registry_hash, request.seed)?;
        let manifest = RunManifest {
            snapshot_id: request.snapshot_id.clone(),
            cohort_hash: request.cohort_hash.clone(),
            registry_hash,
            seed: request.seed,
            generator_mode: request.generator_mode,
            relationships: outcome.relationships.len(),
            skipped_relationships: outcome.skipped.len(),
            briefs: briefs.len(),
            hypotheses: hypotheses.len(),
            verdicts_validated: validated,
            verdicts_rejected: rejected,
            runtime_ms: started.elapsed().as_millis() as u64,
            fingerprint: fingerprint.clone(),
        };
        store.store(&Artifact::new(
            ArtifactId(format!("run_manifest:{run_id}")),
            run_id.clone(),
            ArtifactPayload::RunManifest(manifest.clone()),
        ))?;

        info!(
            run_id = %run_id,
            fingerprint = %fingerprint,
            relationships = manifest.relationships,
            hypotheses = manifest.hypotheses,
            validated,
            rejected,
            runtime_ms = manifest.runtime_ms,
            "pipeline complete"
        );

        Ok(PipelineOutcome {
            run_id,
            fingerprint,
            manifest,
            verdicts,
        })
    }

    async fn generate_via_llm(
        &self,
        context: &GeneratorContext<'_>,
    ) -> EngineResult<(Vec<Artifact>, Artifact)> {
        if let Some(model) = &self.model {
            return llm::generate(context, model.as_ref(), &self.llm_config).await;
        }
        match OpenAiClient::from_config(&self.llm_config) {
            Ok(client) => llm::generate(context, &client, &self.llm_config).await,
            Err(err) if self.llm_config.fallback_to_heuristic => {
                warn!(error = %err, "llm client unavailable, using heuristic generator");
                Ok(heuristic::generate(
                    context,
                    &heuristic::DirectionRules::default(),
                ))
            }
            Err(err) => Err(EngineError::LlmFailed(err.to_string())),
        }
    }

    fn checkpoint(&self, cancel: &CancellationToken) -> EngineResult<()> {
        if cancel.is_cancelled() {
            return Err(EngineError::ResourceLimit("run cancelled".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ArtifactKind, Column};
    use crate::ledger::MemoryLedger;

    fn numeric(key: &str, values: Vec<f64>) -> Column {
        Column {
            key: key.into(),
            stat_type: StatType::Numeric,
            values,
            labels: None,
        }
    }

    fn echo_bundle() -> Arc<MatrixBundle> {
        // y tracks x with a deterministic wobble; z is unrelated
        let x: Vec<f64> = (0..120).map(|i| (i as f64 * 0.21).sin() * 10.0).collect();
        let y: Vec<f64> = x.iter().enumerate().map(|(i, v)| v * 1.5 + (i % 4) as f64 * 0.2).collect();
        let z: Vec<f64> = (0..120).map(|i| ((i * 41) % 113) as f64).collect();
        Arc::new(
            MatrixBundle::new(
                "snap-pipe",
                vec![numeric("x", x), numeric("y", y), numeric("z", z)],
                None,
            )
            .expect("bundle"),
        )
    }

    fn request(bundle: Arc<MatrixBundle>, seed: u64) -> PipelineRequest {
        PipelineRequest {
            snapshot_id: "snap-pipe".into(),
            cohort_hash: "cohort0".into(),
            bundle,
            rigor: RigorLevel::Standard,
            max_hypotheses: 3,
            seed,
            generator_mode: GeneratorType::Heuristic,
        }
    }

    #[tokio::test]
    async fn full_heuristic_run_produces_all_layers() {
        let ledger = MemoryLedger::new();
        let orchestrator =
            PipelineOrchestrator::new(EngineConfig::default(), LlmConfig::default());
        let outcome = orchestrator
            .run(request(echo_bundle(), 42), &ledger, CancellationToken::new())
            .await
            .expect("runs");

        assert!(outcome.manifest.relationships >= 1);
        assert!(outcome.manifest.hypotheses >= 1);
        assert_eq!(
            outcome.manifest.verdicts_validated + outcome.manifest.verdicts_rejected,
            outcome.manifest.hypotheses
        );
        for kind in [
            ArtifactKind::Relationship,
            ArtifactKind::FdrFamily,
            ArtifactKind::SweepManifest,
            ArtifactKind::DiscoveryBrief,
            ArtifactKind::Hypothesis,
            ArtifactKind::GenerationAudit,
            ArtifactKind::Verdict,
            ArtifactKind::RunManifest,
        ] {
            assert!(
                !ledger
                    .list(&outcome.run_id, Some(kind))
                    .expect("list")
                    .is_empty(),
                "missing artifacts of kind {kind}"
            );
        }
    }

    #[tokio::test]
    async fn verdict_status_matches_p_threshold() {
        let ledger = MemoryLedger::new();
        let orchestrator =
            PipelineOrchestrator::new(EngineConfig::default(), LlmConfig::default());
        let outcome = orchestrator
            .run(request(echo_bundle(), 7), &ledger, CancellationToken::new())
            .await
            .expect("runs");

        for verdict in &outcome.verdicts {
            let ArtifactPayload::Verdict(v) = &verdict.payload else { continue };
            assert_eq!(
                v.status == VerdictStatus::Validated,
                v.p_value < 0.05,
                "validated iff p < 0.05 (p={}, status={:?})",
                v.p_value,
                v.status
            );
        }
    }

    #[tokio::test]
    async fn replay_produces_identical_fingerprints_and_bytes() {
        let orchestrator =
            PipelineOrchestrator::new(EngineConfig::default(), LlmConfig::default());

        let ledger_a = MemoryLedger::new();
        let outcome_a = orchestrator
            .run(request(echo_bundle(), 42), &ledger_a, CancellationToken::new())
            .await
            .expect("first run");

        let ledger_b = MemoryLedger::new();
        let outcome_b = orchestrator
            .run(request(echo_bundle(), 42), &ledger_b, CancellationToken::new())
            .await
            .expect("replay");

        assert_eq!(outcome_a.fingerprint, outcome_b.fingerprint);
        assert_eq!(outcome_a.run_id, outcome_b.run_id);
        ledger::compare_runs(
            &ledger_a,
            &outcome_a.run_id,
            &ledger_b,
            &outcome_b.run_id,
            &echo_bundle().registry_hash(),
            42,
        )
        .expect("byte-identical replay");
    }

    #[tokio::test]
    async fn different_seed_changes_the_fingerprint() {
        let orchestrator =
            PipelineOrchestrator::new(EngineConfig::default(), LlmConfig::default());
        let ledger_a = MemoryLedger::new();
        let ledger_b = MemoryLedger::new();
        let a = orchestrator
            .run(request(echo_bundle(), 1), &ledger_a, CancellationToken::new())
            .await
            .expect("run");
        let b = orchestrator
            .run(request(echo_bundle(), 2), &ledger_b, CancellationToken::new())
            .await
            .expect("run");
        assert_ne!(a.fingerprint, b.fingerprint);
    }

    #[tokio::test]
    async fn cancelled_scope_aborts_without_partial_layers() {
        let ledger = MemoryLedger::new();
        let orchestrator =
            PipelineOrchestrator::new(EngineConfig::default(), LlmConfig::default());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = orchestrator
            .run(request(echo_bundle(), 42), &ledger, cancel)
            .await
            .unwrap_err();
        assert_eq!(err.kind_tag(), "resource_limit");
        assert!(ledger.is_empty(), "no partial artifacts after pre-start cancellation");
    }
}
