//! Per-pair data quality and early-skip policy
//!
//! Quality is computed from raw column values before any test runs, so a
//! degenerate pair costs one pass over the data instead of six sense
//! evaluations. Skip decisions are ordered: the first failing check names
//! the reason code.

use crate::config::defaults::{
    MIN_VALID_ROWS, MISSING_RATE_CEILING, VARIANCE_FLOOR,
};
use crate::core::{Column, DataQuality, SkipReason};
use crate::senses::{pearson_r, variance};

/// Valid-row fraction below which a pair counts as sparse.
const SPARSE_FRACTION: f64 = 0.10;

/// Compute quality for a column pair.
pub fn assess(x: &Column, y: &Column) -> DataQuality {
    let mut valid_rows = 0usize;
    for (a, b) in x.values.iter().zip(y.values.iter()) {
        if !a.is_nan() && !b.is_nan() {
            valid_rows += 1;
        }
    }
    DataQuality {
        missing_rate_x: x.missing_rate(),
        missing_rate_y: y.missing_rate(),
        unique_x: unique_count(&x.values),
        unique_y: unique_count(&y.values),
        variance_x: variance_present(&x.values),
        variance_y: variance_present(&y.values),
        valid_rows,
    }
}

/// First failing early-skip check, or None when the pair is testable.
///
/// `paired` holds the pair's valid rows (both present) — used for the
/// derived-column checks.
pub fn skip_reason(
    quality: &DataQuality,
    row_count: usize,
    paired: &(Vec<f64>, Vec<f64>),
) -> Option<SkipReason> {
    if quality.valid_rows < MIN_VALID_ROWS {
        return Some(SkipReason::LowN);
    }
    if quality.missing_rate_x > MISSING_RATE_CEILING || quality.missing_rate_y > MISSING_RATE_CEILING
    {
        return Some(SkipReason::HighMissing);
    }
    if quality.variance_x < VARIANCE_FLOOR || quality.variance_y < VARIANCE_FLOOR {
        return Some(SkipReason::LowVariance);
    }

    let (xs, ys) = paired;
    if xs == ys {
        return Some(SkipReason::PerfectCorrelation);
    }
    // affine copy of the other column: numerically perfect r but not identical
    if pearson_r(xs, ys).abs() >= 1.0 - 1e-12 {
        return Some(SkipReason::LikelyDerived);
    }

    if row_count > 0 && (quality.valid_rows as f64 / row_count as f64) < SPARSE_FRACTION {
        return Some(SkipReason::SparseData);
    }
    None
}

fn unique_count(values: &[f64]) -> usize {
    let mut present: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    present.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    present.dedup();
    present.len()
}

fn variance_present(values: &[f64]) -> f64 {
    let present: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    variance(&present)
}
