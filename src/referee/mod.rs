//! Layer 2 — permutation referee
//!
//! The sole arbiter of truth. For each hypothesis the referee resolves the
//! primary relationship from the hypothesis's own citations, recomputes the
//! observed effect on the unshuffled pair, and builds a null distribution by
//! permuting X under seeded per-index RNG streams. The empirical p-value is
//! position-independent: results land in preallocated slots keyed by
//! permutation index, so worker scheduling can never change a verdict.
//!
//! The referee never panics. Degenerate inputs (no data, zero variance,
//! NaN-only columns) short-circuit to `rejected/invalid_data` without
//! running a single permutation.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::defaults::{
    MAX_NUM_SHUFFLES, REFEREE_POOL_SIZE, REFEREE_SINGLE_WORKER_BELOW, SIGNIFICANCE_THRESHOLD,
};
use crate::core::rng;
use crate::core::{
    Artifact, ArtifactId, ArtifactPayload, EngineResult, FalsificationLog, HypothesisCandidate,
    MatrixBundle, RunId, StatType, VerdictArtifact, VerdictStatus,
};
use crate::senses::{variance, Sense};
use crate::sweep::select_test;

/// Stage label recorded on falsification logs.
const STAGE_NAME: &str = "permutation_referee";

/// Upper p bound for the marginal band.
const MARGINAL_CEILING: f64 = 0.10;

/// Judge one hypothesis against the bundle.
///
/// `relationships` is the ledger view the hypothesis's citations resolve
/// against; the first citation that dereferences to a relationship artifact
/// selects the pair under test.
pub async fn judge(
    hypothesis_id: &ArtifactId,
    candidate: &HypothesisCandidate,
    relationships: &[Artifact],
    bundle: Arc<MatrixBundle>,
    run_id: &RunId,
    seed: u64,
    num_shuffles: usize,
    cancel: CancellationToken,
) -> EngineResult<Artifact> {
    let num_shuffles = num_shuffles.clamp(1, MAX_NUM_SHUFFLES);

    // Resolve the relationship under test from the hypothesis's citations
    let resolved = candidate.supporting_artifacts.iter().find_map(|cited| {
        relationships.iter().find_map(|a| match &a.payload {
            ArtifactPayload::Relationship(r) if &a.id == cited => Some(r),
            _ => None,
        })
    });
    let Some(rel) = resolved else {
        return Ok(verdict(
            hypothesis_id,
            run_id,
            VerdictStatus::Rejected,
            "no_data",
            1.0,
            0.0,
            0.0,
            0,
            None,
        ));
    };

    let Some((xs, ys)) = bundle.paired_values(&rel.variable_x, &rel.variable_y) else {
        return Ok(verdict(
            hypothesis_id,
            run_id,
            VerdictStatus::Rejected,
            "invalid_data",
            1.0,
            0.0,
            0.0,
            0,
            None,
        ));
    };

    let x_type = bundle.column(&rel.variable_x).map_or(StatType::Numeric, |c| c.stat_type);
    let y_type = bundle.column(&rel.variable_y).map_or(StatType::Numeric, |c| c.stat_type);
    let test_used = select_test(x_type, y_type);

    // Degenerate short-circuit: no permutations for unusable pairs
    if xs.len() < 3 || variance(&xs) < 1e-10 || variance(&ys) < 1e-10 {
        return Ok(verdict(
            hypothesis_id,
            run_id,
            VerdictStatus::Rejected,
            "invalid_data",
            1.0,
            0.0,
            0.0,
            0,
            None,
        ));
    }

    let observed = effect_statistic(test_used, &xs, &ys).abs();
    debug!(
        hypothesis = %hypothesis_id,
        test = test_used,
        observed_effect = observed,
        num_shuffles,
        "running permutation test"
    );

    let null = null_distribution(
        hypothesis_id,
        test_used,
        Arc::new(xs),
        Arc::new(ys),
        seed,
        num_shuffles,
        cancel,
    )
    .await;

    // Position-independent empirical p-value and percentile
    let at_least = null.iter().filter(|&&e| e >= observed).count();
    let at_most = null.iter().filter(|&&e| e <= observed).count();
    let p_value =
        (at_least as f64 / num_shuffles as f64).clamp(1.0 / num_shuffles as f64, 1.0);
    let null_percentile = at_most as f64 / num_shuffles as f64;

    let (status, reason) = if p_value < SIGNIFICANCE_THRESHOLD {
        (VerdictStatus::Validated, "statistically_significant")
    } else if p_value <= MARGINAL_CEILING {
        (VerdictStatus::Rejected, "marginally_significant")
    } else {
        (VerdictStatus::Rejected, "likely_random")
    };

    let falsification_log = match status {
        VerdictStatus::Validated => None,
        _ => Some(summarize_null(&null, test_used)),
    };

    info!(
        hypothesis = %hypothesis_id,
        status = ?status,
        reason,
        p_value,
        null_percentile,
        "verdict emitted"
    );

    Ok(verdict(
        hypothesis_id,
        run_id,
        status,
        reason,
        p_value,
        observed,
        null_percentile,
        num_shuffles,
        falsification_log,
    ))
}

/// Build the null distribution with a bounded-queue worker pool.
///
/// Each permutation index gets its own RNG stream derived from
/// `(hypothesis_id, index, seed)`, and its result is written into slot
/// `index`, so the distribution is identical no matter how workers schedule.
async fn null_distribution(
    hypothesis_id: &ArtifactId,
    test_used: &'static str,
    xs: Arc<Vec<f64>>,
    ys: Arc<Vec<f64>>,
    seed: u64,
    num_shuffles: usize,
    cancel: CancellationToken,
) -> Vec<f64> {
    let pool_size = if num_shuffles < REFEREE_SINGLE_WORKER_BELOW {
        1
    } else {
        REFEREE_POOL_SIZE
    };

    let (job_tx, job_rx) = mpsc::channel::<usize>(pool_size * 2);
    let job_rx = Arc::new(Mutex::new(job_rx));
    let (result_tx, mut result_rx) = mpsc::channel::<(usize, f64)>(pool_size * 2);

    let mut workers: JoinSet<()> = JoinSet::new();
    for _ in 0..pool_size {
        let job_rx = Arc::clone(&job_rx);
        let result_tx = result_tx.clone();
        let cancel = cancel.clone();
        let xs = Arc::clone(&xs);
        let ys = Arc::clone(&ys);
        let key_prefix = hypothesis_id.0.clone();
        workers.spawn(async move {
            loop {
                // cooperative cancellation between iterations
                if cancel.is_cancelled() {
                    break;
                }
                let index = { job_rx.lock().await.recv().await };
                let Some(index) = index else { break };

                let mut stream =
                    rng::stream("permutation", &format!("{key_prefix}:{index}"), seed);
                let mut shuffled = xs.as_ref().clone();
                rng::fisher_yates(&mut shuffled, &mut stream);
                let effect = effect_statistic(test_used, &shuffled, &ys).abs();

                if result_tx.send((index, effect)).await.is_err() {
                    break;
                }
            }
        });
    }
    drop(result_tx);

    let producer = tokio::spawn(async move {
        for index in 0..num_shuffles {
            if job_tx.send(index).await.is_err() {
                break;
            }
        }
    });

    let mut null = vec![0.0_f64; num_shuffles];
    while let Some((index, effect)) = result_rx.recv().await {
        null[index] = effect;
    }

    let _ = producer.await;
    while workers.join_next().await.is_some() {}
    null
}

/// Effect statistic per test type — the same detectors the sweep used.
fn effect_statistic(test_used: &str, xs: &[f64], ys: &[f64]) -> f64 {
    match test_used {
        "welch_t" => crate::senses::WelchTSense
            .analyze(xs, ys, ("x", "y"), None)
            .effect_size,
        "chi_square" => crate::senses::ChiSquareSense
            .analyze(xs, ys, ("x", "y"), None)
            .effect_size,
        "mutual_info" => crate::senses::MutualInfoSense
            .analyze(xs, ys, ("x", "y"), None)
            .effect_size,
        _ => crate::senses::pearson_r(xs, ys),
    }
}

/// Null-distribution summary for the falsification log.
fn summarize_null(null: &[f64], test_used: &str) -> FalsificationLog {
    let n = null.len();
    let mean = null.iter().sum::<f64>() / n as f64;
    let var = null.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n as f64;

    let mut sorted = null.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let pct = |q: f64| sorted[(((n as f64) * q) as usize).min(n - 1)];

    FalsificationLog {
        mean,
        stddev: var.sqrt(),
        min: sorted[0],
        max: sorted[n - 1],
        p95: pct(0.95),
        p99: pct(0.99),
        sample_size: n,
        test_used: test_used.to_string(),
        rejected_at: STAGE_NAME.to_string(),
    }
}

#[allow(clippy::too_many_arguments)]
fn verdict(
    hypothesis_id: &ArtifactId,
    run_id: &RunId,
    status: VerdictStatus,
    reason: &str,
    p_value: f64,
    effect_size: f64,
    null_percentile: f64,
    num_permutations: usize,
    falsification_log: Option<FalsificationLog>,
) -> Artifact {
    Artifact::new(
        ArtifactId(format!("verdict:{hypothesis_id}")),
        run_id.clone(),
        ArtifactPayload::Verdict(VerdictArtifact {
            hypothesis_id: hypothesis_id.clone(),
            status,
            reason: reason.to_string(),
            p_value,
            confidence: (1.0 - p_value).clamp(0.0, 1.0),
            effect_size,
            null_percentile,
            num_permutations,
            falsification_log,
        }),
    )
}
