//! Statistical senses — independent pairwise detectors
//!
//! Six detectors share one contract: `analyze(x, y, keys, timestamps)` →
//! [`SenseResult`]. Each sense is blind to the others; the sweep attaches
//! every sense's result to a relationship as an evidence block, and the
//! discovery brief reads agreement across them.
//!
//! Degenerate input (length mismatch, N < 3, zero variance) never errors:
//! the sense returns a weak/zero result with `skipped = true` metadata so the
//! evidence block records *why* the sense stayed silent.
//!
//! ## Senses
//! - `pearson` — linear correlation, p via Student's t (statrs)
//! - `spearman` — rank correlation with average-rank ties
//! - `mutual_info` — 10-bin histogram MI, normalized by min marginal entropy
//! - `welch_t` — group difference of Y split by a binary X
//! - `chi_square` — contingency independence, Cramér's V
//! - `temporal` — lagged cross-correlation over timestamped rows

pub mod chi_square;
pub mod mutual_info;
pub mod pearson;
pub mod spearman;
pub mod temporal;
pub mod welch_t;

use crate::core::{SenseResult, Signal};
use statrs::distribution::{ContinuousCDF, StudentsT};
use std::collections::BTreeMap;

pub use chi_square::ChiSquareSense;
pub use mutual_info::MutualInfoSense;
pub use pearson::PearsonSense;
pub use spearman::SpearmanSense;
pub use temporal::{max_lag_for, scan_lags, TemporalSense};
pub use welch_t::WelchTSense;

/// Closed capability set implemented by every sense.
pub trait Sense: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    /// True for senses that cannot run without per-row timestamps.
    fn requires_timestamps(&self) -> bool {
        false
    }
    fn analyze(
        &self,
        x: &[f64],
        y: &[f64],
        variable_keys: (&str, &str),
        timestamps: Option<&[i64]>,
    ) -> SenseResult;
}

/// The single registry of sense implementations, in canonical order.
pub fn registry() -> Vec<Box<dyn Sense>> {
    vec![
        Box::new(PearsonSense),
        Box::new(SpearmanSense),
        Box::new(MutualInfoSense),
        Box::new(WelchTSense),
        Box::new(ChiSquareSense),
        Box::new(TemporalSense),
    ]
}

// ============================================================================
// Shared statistics helpers
// ============================================================================

/// |effect_size| bucketing thresholds, lower bounds per bucket.
/// `[detectable, moderate, strong, very_strong]` — below `detectable` the
/// effect also reads as weak; the floor is what "silence" detection uses.
#[derive(Debug, Clone, Copy)]
pub struct SignalThresholds(pub [f64; 4]);

impl SignalThresholds {
    pub const PEARSON: SignalThresholds = SignalThresholds([0.1, 0.3, 0.5, 0.8]);
    pub const MUTUAL_INFO: SignalThresholds = SignalThresholds([0.05, 0.15, 0.30, 0.50]);
    pub const COHENS_D: SignalThresholds = SignalThresholds([0.2, 0.5, 0.8, 1.2]);
    pub const CRAMERS_V: SignalThresholds = SignalThresholds([0.1, 0.2, 0.3, 0.5]);

    pub fn classify(&self, effect_size: f64) -> Signal {
        let e = effect_size.abs();
        let [_, moderate, strong, very_strong] = self.0;
        if e >= very_strong {
            Signal::VeryStrong
        } else if e >= strong {
            Signal::Strong
        } else if e >= moderate {
            Signal::Moderate
        } else {
            Signal::Weak
        }
    }
}

/// Monotone decreasing confidence from a p-value.
pub fn confidence_from_p(p_value: f64) -> f64 {
    (1.0 - p_value).clamp(0.0, 1.0)
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample variance (n − 1 denominator).
pub fn variance(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 2 {
        return 0.0;
    }
    let m = mean(values);
    values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (n - 1) as f64
}

/// Pearson correlation coefficient for two equal-length slices.
///
/// Returns 0.0 when either series has zero variance or fewer than 3 points.
pub fn pearson_r(x: &[f64], y: &[f64]) -> f64 {
    let n = x.len().min(y.len());
    if n < 3 {
        return 0.0;
    }
    let n_f = n as f64;
    let mean_x = x[..n].iter().sum::<f64>() / n_f;
    let mean_y = y[..n].iter().sum::<f64>() / n_f;

    let mut num = 0.0_f64;
    let mut den_x = 0.0_f64;
    let mut den_y = 0.0_f64;

    for i in 0..n {
        let dx = x[i] - mean_x;
        let dy = y[i] - mean_y;
        num += dx * dy;
        den_x += dx * dx;
        den_y += dy * dy;
    }

    let denom = (den_x * den_y).sqrt();
    if denom < 1e-10 {
        0.0
    } else {
        num / denom
    }
}

/// Two-tailed p-value for a Pearson/Spearman coefficient via Student's t
/// with n − 2 degrees of freedom.
///
/// Formula: t = r × sqrt(n−2) / sqrt(1−r²)
pub fn p_value_for_r(r: f64, n: usize) -> f64 {
    if n < 3 {
        return 1.0;
    }
    if r.abs() >= 0.9999 {
        return 0.0;
    }

    let df = (n - 2) as f64;
    let t_stat = r * df.sqrt() / (1.0 - r * r).sqrt();

    match StudentsT::new(0.0, 1.0, df) {
        Ok(dist) => (2.0 * (1.0 - dist.cdf(t_stat.abs()))).clamp(0.0, 1.0),
        Err(_) => 1.0,
    }
}

/// Average ranks with tie handling: tied values all receive the mean of the
/// ranks they span.
pub fn average_ranks(values: &[f64]) -> Vec<f64> {
    let n = values.len();
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| {
        values[a]
            .partial_cmp(&values[b])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut ranks = vec![0.0; n];
    let mut i = 0;
    while i < n {
        let mut j = i;
        while j + 1 < n && values[order[j + 1]] == values[order[i]] {
            j += 1;
        }
        // ranks are 1-based; ties share the average of their span
        let avg = (i + j) as f64 / 2.0 + 1.0;
        for &idx in &order[i..=j] {
            ranks[idx] = avg;
        }
        i = j + 1;
    }
    ranks
}

/// Uniform skipped result: weak/zero with `skipped = true` and the reason.
pub fn skipped_result(name: &str, description: &str, reason: &str) -> SenseResult {
    let mut metadata = BTreeMap::new();
    metadata.insert("skipped".to_string(), serde_json::Value::Bool(true));
    metadata.insert(
        "skip_reason".to_string(),
        serde_json::Value::String(reason.to_string()),
    );
    SenseResult {
        sense_name: name.to_string(),
        effect_size: 0.0,
        p_value: 1.0,
        confidence: 0.0,
        signal: Signal::Weak,
        description: description.to_string(),
        metadata,
    }
}

/// Degenerate-input guard shared by all senses. Returns the skip reason when
/// the pair cannot support analysis.
pub fn degenerate_reason(x: &[f64], y: &[f64]) -> Option<&'static str> {
    if x.len() != y.len() {
        return Some("length_mismatch");
    }
    if x.len() < 3 {
        return Some("insufficient_samples");
    }
    if variance(x) < 1e-10 || variance(y) < 1e-10 {
        return Some("zero_variance");
    }
    None
}
