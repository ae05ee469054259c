//! Layer 0 — pairwise statistical sweep
//!
//! Iterates admissible variable pairs (upper triangle, canonical ordering),
//! records data quality, runs the selected primary test plus all six senses,
//! and applies BH-FDR across the family. Per-pair work fans out over a
//! bounded job queue to a worker pool; a sequential collector re-stabilizes
//! results by canonical pair key before the correction, so worker arrival
//! order never leaks into artifacts.
//!
//! ## Test selection
//! - numeric × numeric → Pearson (plus Spearman when the plan asks)
//! - binary × numeric → Welch's t-test
//! - categorical × {categorical, binary} → chi-square
//! - anything else → Pearson fallback

pub mod data_quality;
pub mod fdr;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::defaults::PERFECT_CORRELATION_EPSILON;
use crate::config::EngineConfig;
use crate::core::{
    relationship_key, short_hash, skipped_key, Artifact, ArtifactPayload, Column, DataQuality,
    EngineError, EngineResult, FamilyId, FamilyKey, FdrFamilyArtifact, FdrMethod, MatrixBundle,
    RelationshipArtifact, RunId, SenseResult, SkippedRelationship, StatType, SweepManifest,
};
use crate::senses::{self, Sense};

use fdr::{benjamini_hochberg, FdrInput};

/// Test-selection policy for one sweep stage. The plan hash pins the policy
/// into the family key, so changing the policy changes the family.
#[derive(Debug, Clone)]
pub struct StagePlan {
    pub stage_name: String,
    /// Policy identifier recorded as the family key's test_type component.
    pub policy: String,
    /// Emit an additional Spearman-primary relationship per numeric pair.
    pub run_spearman: bool,
}

impl Default for StagePlan {
    fn default() -> Self {
        Self {
            stage_name: "pairwise_sweep".to_string(),
            policy: "default_v1".to_string(),
            run_spearman: false,
        }
    }
}

impl StagePlan {
    pub fn plan_hash(&self) -> String {
        short_hash(
            format!(
                "{}\u{1f}{}\u{1f}{}",
                self.stage_name, self.policy, self.run_spearman
            )
            .as_bytes(),
        )
    }
}

/// Everything layer 0 hands to the ledger and the layers above.
#[derive(Debug)]
pub struct SweepOutcome {
    pub family_id: FamilyId,
    pub relationships: Vec<Artifact>,
    pub skipped: Vec<Artifact>,
    pub family: Artifact,
    pub manifest: Artifact,
}

/// Per-pair result flowing from workers to the collector.
enum PairResult {
    Tested(RelationshipArtifact),
    Skipped(SkippedRelationship),
}

/// Run the sweep over all admissible pairs of the bundle.
pub async fn run(
    bundle: Arc<MatrixBundle>,
    run_id: RunId,
    snapshot_id: String,
    cohort_hash: String,
    plan: StagePlan,
    config: &EngineConfig,
    cancel: CancellationToken,
) -> EngineResult<SweepOutcome> {
    let started = Instant::now();
    let deadline = started + config.max_sweep_runtime;

    let admissible: Vec<usize> = bundle
        .columns
        .iter()
        .enumerate()
        .filter(|(_, c)| {
            matches!(
                c.stat_type,
                StatType::Numeric | StatType::Categorical | StatType::Binary
            )
        })
        .map(|(i, _)| i)
        .collect();

    // Guardrails: fail fast before any work is queued
    if admissible.len() > config.max_variables {
        return Err(EngineError::ResourceLimit(format!(
            "{} variables exceeds ceiling of {}",
            admissible.len(),
            config.max_variables
        )));
    }
    let total_pairs = admissible.len().saturating_sub(1) * admissible.len() / 2;
    if total_pairs > config.max_pairs {
        return Err(EngineError::ResourceLimit(format!(
            "{total_pairs} pairs exceeds ceiling of {}",
            config.max_pairs
        )));
    }

    let family_key = FamilyKey {
        snapshot_id,
        cohort_hash,
        stage_name: plan.stage_name.clone(),
        test_type: plan.policy.clone(),
        registry_hash: bundle.registry_hash(),
        stage_plan_hash: plan.plan_hash(),
    };
    let family_id = family_key.family_id();

    info!(
        family_id = %family_id,
        variables = admissible.len(),
        pairs = total_pairs,
        workers = config.sweep_workers,
        "starting pairwise sweep"
    );

    // Bounded job queue feeding the pool; workers share the receiver
    let (job_tx, job_rx) = mpsc::channel::<(usize, usize)>(config.sweep_workers.max(1) * 2);
    let job_rx = Arc::new(Mutex::new(job_rx));
    let (result_tx, mut result_rx) = mpsc::channel::<PairResult>(config.sweep_workers.max(1) * 2);

    let mut workers: JoinSet<()> = JoinSet::new();
    for _ in 0..config.sweep_workers.max(1) {
        let bundle = Arc::clone(&bundle);
        let job_rx = Arc::clone(&job_rx);
        let result_tx = result_tx.clone();
        let cancel = cancel.clone();
        let family_id = family_id.clone();
        let plan = plan.clone();
        workers.spawn(async move {
            loop {
                // cancellation is checked between pairs, never mid-test
                if cancel.is_cancelled() {
                    break;
                }
                let job = { job_rx.lock().await.recv().await };
                let Some((i, j)) = job else { break };
                for result in evaluate_pair(&bundle, i, j, &family_id, &plan) {
                    if result_tx.send(result).await.is_err() {
                        return;
                    }
                }
            }
        });
    }
    drop(result_tx);

    // Producer: enqueue the upper triangle
    let producer_cancel = cancel.clone();
    let pair_list: Vec<(usize, usize)> = admissible
        .iter()
        .enumerate()
        .flat_map(|(a, &i)| admissible[a + 1..].iter().map(move |&j| (i, j)))
        .collect();
    let producer = tokio::spawn(async move {
        for pair in pair_list {
            if producer_cancel.is_cancelled() {
                break;
            }
            if job_tx.send(pair).await.is_err() {
                break;
            }
        }
    });

    // Collector: gather everything, then re-stabilize by canonical pair key
    let mut tested: Vec<RelationshipArtifact> = Vec::new();
    let mut skipped: Vec<SkippedRelationship> = Vec::new();
    let mut aborted: Option<EngineError> = None;
    while let Some(result) = result_rx.recv().await {
        if Instant::now() > deadline {
            cancel.cancel();
            aborted = Some(EngineError::ResourceLimit(format!(
                "sweep exceeded runtime ceiling of {:?}",
                config.max_sweep_runtime
            )));
            break;
        }
        match result {
            PairResult::Tested(r) => tested.push(r),
            PairResult::Skipped(s) => skipped.push(s),
        }
    }

    producer.abort();
    while workers.join_next().await.is_some() {}

    if let Some(err) = aborted {
        warn!(error = %err, "sweep aborted");
        return Err(err);
    }
    if cancel.is_cancelled() {
        return Err(EngineError::ResourceLimit("sweep cancelled".into()));
    }

    tested.sort_by(|a, b| {
        (&a.variable_x, &a.variable_y, &a.test_type).cmp(&(
            &b.variable_x,
            &b.variable_y,
            &b.test_type,
        ))
    });
    skipped.sort_by(|a, b| (&a.variable_x, &a.variable_y).cmp(&(&b.variable_x, &b.variable_y)));

    apply_fdr(&mut tested);

    // Assemble artifacts; the record invariants hold for everything we emit
    let mut relationships: Vec<Artifact> = Vec::with_capacity(tested.len());
    for r in tested {
        r.validate()?;
        let id = relationship_key(&r.test_type, &family_id, &r.variable_x, &r.variable_y);
        relationships.push(Artifact::new(id, run_id.clone(), ArtifactPayload::Relationship(r)));
    }
    let skipped_artifacts: Vec<Artifact> = skipped
        .into_iter()
        .map(|s| {
            let id = skipped_key(&s.test_type, &family_id, &s.variable_x, &s.variable_y);
            Artifact::new(id, run_id.clone(), ArtifactPayload::SkippedRelationship(s))
        })
        .collect();

    let mut rejections_by_reason: BTreeMap<String, usize> = BTreeMap::new();
    for artifact in &skipped_artifacts {
        if let ArtifactPayload::SkippedRelationship(s) = &artifact.payload {
            *rejections_by_reason.entry(s.reason_code.to_string()).or_insert(0) += 1;
        }
    }

    let mut executed_tests: Vec<String> = relationships
        .iter()
        .filter_map(|a| match &a.payload {
            ArtifactPayload::Relationship(r) => Some(r.test_type.clone()),
            _ => None,
        })
        .collect();
    executed_tests.sort();
    executed_tests.dedup();

    let mut all_ids: Vec<String> = relationships
        .iter()
        .chain(skipped_artifacts.iter())
        .map(|a| a.id.0.clone())
        .collect();
    all_ids.sort();
    let fingerprint = short_hash(all_ids.join("\u{1e}").as_bytes());

    let family = Artifact::new(
        crate::core::ArtifactId(format!("fdr_family:{family_id}")),
        run_id.clone(),
        ArtifactPayload::FdrFamily(FdrFamilyArtifact {
            family_id: family_id.clone(),
            family_key,
            num_tests: relationships.len(),
            fdr_method: FdrMethod::BenjaminiHochberg,
        }),
    );

    let manifest = SweepManifest {
        family_id: family_id.clone(),
        executed_tests,
        runtime_ms: started.elapsed().as_millis() as u64,
        total_pairs,
        successful_tests: relationships.len(),
        skipped_tests: skipped_artifacts.len(),
        rejections_by_reason,
        fingerprint,
    };
    info!(
        family_id = %family_id,
        successful = manifest.successful_tests,
        skipped = manifest.skipped_tests,
        runtime_ms = manifest.runtime_ms,
        "sweep complete"
    );
    let manifest = Artifact::new(
        crate::core::ArtifactId(format!("sweep_manifest:{run_id}")),
        run_id,
        ArtifactPayload::SweepManifest(manifest),
    );

    Ok(SweepOutcome {
        family_id,
        relationships,
        skipped: skipped_artifacts,
        family,
        manifest,
    })
}

/// Select the primary test for a statistical-type pair.
pub fn select_test(x: StatType, y: StatType) -> &'static str {
    use StatType::{Binary, Categorical, Numeric};
    match (x, y) {
        (Numeric, Numeric) => "pearson",
        (Binary, Numeric) | (Numeric, Binary) => "welch_t",
        (Categorical, Categorical | Binary) | (Binary, Categorical) => "chi_square",
        _ => "pearson",
    }
}

/// Evaluate one pair: quality, early skip, primary test(s), evidence blocks.
/// Returns one skipped record or one relationship per primary test.
fn evaluate_pair(
    bundle: &MatrixBundle,
    i: usize,
    j: usize,
    family_id: &FamilyId,
    plan: &StagePlan,
) -> Vec<PairResult> {
    let col_i = &bundle.columns[i];
    let col_j = &bundle.columns[j];

    // canonical ordering for keying; role assignment happens per test below
    let (x_col, y_col) = if col_i.key <= col_j.key {
        (col_i, col_j)
    } else {
        (col_j, col_i)
    };

    let quality = data_quality::assess(x_col, y_col);
    let (xs, ys, ts) = paired_with_timestamps(bundle, x_col, y_col);

    let test_type = select_test(x_col.stat_type, y_col.stat_type);

    if let Some(reason) = data_quality::skip_reason(&quality, bundle.row_count, &(xs.clone(), ys.clone())) {
        debug!(
            x = %x_col.key,
            y = %y_col.key,
            reason = %reason,
            "pair skipped"
        );
        return vec![PairResult::Skipped(SkippedRelationship {
            variable_x: x_col.key.clone(),
            variable_y: y_col.key.clone(),
            test_type: test_type.to_string(),
            family_id: family_id.clone(),
            reason_code: reason,
            data_quality: quality,
        })];
    }

    let mut out = Vec::new();
    out.push(PairResult::Tested(build_relationship(
        test_type, x_col, y_col, &xs, &ys, ts.as_deref(), quality.clone(), family_id,
    )));

    if plan.run_spearman
        && x_col.stat_type == StatType::Numeric
        && y_col.stat_type == StatType::Numeric
    {
        out.push(PairResult::Tested(build_relationship(
            "spearman", x_col, y_col, &xs, &ys, ts.as_deref(), quality, family_id,
        )));
    }
    out
}

/// Run the primary test plus every sense and assemble the relationship.
#[allow(clippy::too_many_arguments)]
fn build_relationship(
    test_type: &str,
    x_col: &Column,
    y_col: &Column,
    xs: &[f64],
    ys: &[f64],
    timestamps: Option<&[i64]>,
    quality: DataQuality,
    family_id: &FamilyId,
) -> RelationshipArtifact {
    let keys = (x_col.key.as_str(), y_col.key.as_str());

    // Welch expects the binary side as X; the artifact keeps canonical order
    let primary = match test_type {
        "welch_t" if y_col.stat_type == StatType::Binary => {
            senses::WelchTSense.analyze(ys, xs, (keys.1, keys.0), timestamps)
        }
        "welch_t" => senses::WelchTSense.analyze(xs, ys, keys, timestamps),
        "chi_square" => senses::ChiSquareSense.analyze(xs, ys, keys, timestamps),
        "spearman" => senses::SpearmanSense.analyze(xs, ys, keys, timestamps),
        _ => senses::PearsonSense.analyze(xs, ys, keys, timestamps),
    };

    let mut canonical_metrics = BTreeMap::new();
    canonical_metrics.insert("effect_size".to_string(), primary.effect_size);
    canonical_metrics.insert("p_value".to_string(), primary.p_value);
    for (name, value) in &primary.metadata {
        if let Some(v) = value.as_f64() {
            canonical_metrics.insert(name.clone(), v);
        }
    }

    let sense_results: Vec<SenseResult> = senses::registry()
        .iter()
        .map(|sense| {
            if sense.requires_timestamps() && timestamps.is_none() {
                return senses::skipped_result(sense.name(), sense.description(), "no_timestamps");
            }
            sense.analyze(xs, ys, keys, timestamps)
        })
        .collect();

    let mut warnings = Vec::new();
    if primary.effect_size.abs() >= 1.0 - PERFECT_CORRELATION_EPSILON {
        warnings.push("PERFECT_CORRELATION".to_string());
    }
    if quality.missing_rate_x > 0.1 || quality.missing_rate_y > 0.1 {
        warnings.push("ELEVATED_MISSINGNESS".to_string());
    }

    RelationshipArtifact {
        variable_x: x_col.key.clone(),
        variable_y: y_col.key.clone(),
        test_type: test_type.to_string(),
        effect_size: primary.effect_size,
        p_value: primary.p_value,
        q_value: None,
        sample_size: xs.len(),
        total_comparisons: None,
        family_id: family_id.clone(),
        canonical_metrics,
        data_quality: quality,
        sense_results,
        warnings,
    }
}

/// Rows where both sides are present, with their timestamps when the bundle
/// carries any.
fn paired_with_timestamps(
    bundle: &MatrixBundle,
    x: &Column,
    y: &Column,
) -> (Vec<f64>, Vec<f64>, Option<Vec<i64>>) {
    let mut xs = Vec::new();
    let mut ys = Vec::new();
    let mut ts = bundle.timestamps.as_ref().map(|_| Vec::new());
    for row in 0..bundle.row_count {
        let a = x.values[row];
        let b = y.values[row];
        if a.is_nan() || b.is_nan() {
            continue;
        }
        xs.push(a);
        ys.push(b);
        if let (Some(out), Some(all)) = (ts.as_mut(), bundle.timestamps.as_ref()) {
            out.push(all[row]);
        }
    }
    (xs, ys, ts)
}

/// Attach q-values, ranks, and the family size to every tested relationship.
fn apply_fdr(tested: &mut [RelationshipArtifact]) {
    let inputs: Vec<FdrInput> = tested
        .iter()
        .map(|r| FdrInput {
            key: format!("{}:{}:{}", r.test_type, r.variable_x, r.variable_y),
            p_value: r.p_value,
        })
        .collect();
    let outputs = benjamini_hochberg(&inputs);
    let m = inputs.len();

    for r in tested.iter_mut() {
        let key = format!("{}:{}:{}", r.test_type, r.variable_x, r.variable_y);
        if let Some(out) = outputs.iter().find(|o| o.key == key) {
            r.q_value = Some(out.q_value);
            r.canonical_metrics.insert("fdr_rank".to_string(), out.rank as f64);
        }
        r.total_comparisons = Some(m);
    }
}
