//! Mutual information sense
//!
//! Histogram-based MI over a 10×10 binning of the pair. Catches nonlinear,
//! non-monotone dependence the correlation senses miss. The effect size is
//! MI normalized by min(H(X), H(Y)), so it lands in [0, 1]; significance via
//! the G-test (2·N·MI_nats ~ χ² with (kx−1)(ky−1) df).

use std::collections::BTreeMap;

use statrs::distribution::{ChiSquared, ContinuousCDF};

use crate::core::SenseResult;

use super::{confidence_from_p, degenerate_reason, skipped_result, Sense, SignalThresholds};

const NAME: &str = "mutual_info";
const DESCRIPTION: &str = "Histogram mutual information (normalized, G-test)";

/// Bins per axis for the joint histogram.
const NUM_BINS: usize = 10;

pub struct MutualInfoSense;

impl Sense for MutualInfoSense {
    fn name(&self) -> &'static str {
        NAME
    }

    fn description(&self) -> &'static str {
        DESCRIPTION
    }

    fn analyze(
        &self,
        x: &[f64],
        y: &[f64],
        variable_keys: (&str, &str),
        _timestamps: Option<&[i64]>,
    ) -> SenseResult {
        if let Some(reason) = degenerate_reason(x, y) {
            return skipped_result(NAME, DESCRIPTION, reason);
        }

        let n = x.len();
        let bx = bin_indices(x);
        let by = bin_indices(y);

        // Joint and marginal empirical distributions
        let mut joint = [[0usize; NUM_BINS]; NUM_BINS];
        let mut marg_x = [0usize; NUM_BINS];
        let mut marg_y = [0usize; NUM_BINS];
        for i in 0..n {
            joint[bx[i]][by[i]] += 1;
            marg_x[bx[i]] += 1;
            marg_y[by[i]] += 1;
        }

        let n_f = n as f64;
        let mut mi_bits = 0.0_f64;
        for (i, row) in joint.iter().enumerate() {
            for (j, &count) in row.iter().enumerate() {
                if count == 0 {
                    continue;
                }
                let p_xy = count as f64 / n_f;
                let p_x = marg_x[i] as f64 / n_f;
                let p_y = marg_y[j] as f64 / n_f;
                mi_bits += p_xy * (p_xy / (p_x * p_y)).log2();
            }
        }
        mi_bits = mi_bits.max(0.0);

        let h_x = entropy_bits(&marg_x, n_f);
        let h_y = entropy_bits(&marg_y, n_f);
        let h_min = h_x.min(h_y);
        let normalized = if h_min > 1e-10 { (mi_bits / h_min).min(1.0) } else { 0.0 };

        // G-test: 2·N·MI in nats is asymptotically chi-square
        let occupied_x = marg_x.iter().filter(|&&c| c > 0).count();
        let occupied_y = marg_y.iter().filter(|&&c| c > 0).count();
        let df = ((occupied_x.max(2) - 1) * (occupied_y.max(2) - 1)) as f64;
        let g_stat = 2.0 * n_f * mi_bits * std::f64::consts::LN_2;
        let p_value = match ChiSquared::new(df) {
            Ok(dist) => (1.0 - dist.cdf(g_stat)).clamp(0.0, 1.0),
            Err(_) => 1.0,
        };

        let mut metadata = BTreeMap::new();
        metadata.insert("mi_bits".into(), serde_json::json!(mi_bits));
        metadata.insert("entropy_x".into(), serde_json::json!(h_x));
        metadata.insert("entropy_y".into(), serde_json::json!(h_y));
        metadata.insert("bins".into(), serde_json::json!(NUM_BINS));
        metadata.insert("g_statistic".into(), serde_json::json!(g_stat));

        SenseResult {
            sense_name: NAME.to_string(),
            effect_size: normalized,
            p_value,
            confidence: confidence_from_p(p_value),
            signal: SignalThresholds::MUTUAL_INFO.classify(normalized),
            description: format!(
                "normalized MI={normalized:.3} between {} and {} over {n} samples",
                variable_keys.0, variable_keys.1
            ),
            metadata,
        }
    }
}

/// Equal-width bin index per value, clamped to the last bin at the max.
fn bin_indices(values: &[f64]) -> Vec<usize> {
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let width = (max - min) / NUM_BINS as f64;
    values
        .iter()
        .map(|&v| {
            if width <= 0.0 {
                0
            } else {
                (((v - min) / width) as usize).min(NUM_BINS - 1)
            }
        })
        .collect()
}

fn entropy_bits(counts: &[usize; NUM_BINS], n: f64) -> f64 {
    counts
        .iter()
        .filter(|&&c| c > 0)
        .map(|&c| {
            let p = c as f64 / n;
            -p * p.log2()
        })
        .sum()
}
