//! Chi-square independence sense
//!
//! Contingency-table test for categorical/binary pairs. Distinct values are
//! used as categories directly when there are few of them; continuous inputs
//! are coarsened into equal-width bins first. The effect size is Cramér's V.

use std::collections::BTreeMap;

use statrs::distribution::{ChiSquared, ContinuousCDF};

use crate::core::SenseResult;

use super::{confidence_from_p, degenerate_reason, skipped_result, Sense, SignalThresholds};

const NAME: &str = "chi_square";
const DESCRIPTION: &str = "Contingency independence (chi-square, Cramér's V)";

/// Use raw distinct values as categories up to this many.
const MAX_DISTINCT_AS_CATEGORIES: usize = 12;

/// Bin count when coarsening a continuous input.
const CONTINUOUS_BINS: usize = 5;

pub struct ChiSquareSense;

impl Sense for ChiSquareSense {
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

        let cx = categorize(x);
        let cy = categorize(y);
        let rows = cx.iter().max().map_or(0, |m| m + 1);
        let cols = cy.iter().max().map_or(0, |m| m + 1);
        if rows < 2 || cols < 2 {
            return skipped_result(NAME, DESCRIPTION, "single_category");
        }

        let n = x.len();
        let n_f = n as f64;

        // Observed contingency table and marginals
        let mut observed = vec![vec![0.0_f64; cols]; rows];
        let mut row_totals = vec![0.0_f64; rows];
        let mut col_totals = vec![0.0_f64; cols];
        for i in 0..n {
            observed[cx[i]][cy[i]] += 1.0;
            row_totals[cx[i]] += 1.0;
            col_totals[cy[i]] += 1.0;
        }

        let mut chi2 = 0.0_f64;
        let mut max_abs_residual = 0.0_f64;
        let mut min_expected = f64::INFINITY;
        for (i, row) in observed.iter().enumerate() {
            for (j, &obs) in row.iter().enumerate() {
                let expected = row_totals[i] * col_totals[j] / n_f;
                if expected <= 0.0 {
                    continue;
                }
                min_expected = min_expected.min(expected);
                let residual = (obs - expected) / expected.sqrt();
                chi2 += residual * residual;
                max_abs_residual = max_abs_residual.max(residual.abs());
            }
        }

        let df = ((rows - 1) * (cols - 1)) as f64;
        let p_value = match ChiSquared::new(df) {
            Ok(dist) => (1.0 - dist.cdf(chi2)).clamp(0.0, 1.0),
            Err(_) => 1.0,
        };

        let k = rows.min(cols);
        let cramers_v = if k > 1 {
            (chi2 / (n_f * (k - 1) as f64)).sqrt().min(1.0)
        } else {
            0.0
        };

        let mut metadata = BTreeMap::new();
        metadata.insert("chi2".into(), serde_json::json!(chi2));
        metadata.insert("df".into(), serde_json::json!(df));
        metadata.insert("rows".into(), serde_json::json!(rows));
        metadata.insert("cols".into(), serde_json::json!(cols));
        metadata.insert("max_abs_residual".into(), serde_json::json!(max_abs_residual));
        if min_expected.is_finite() {
            metadata.insert("min_expected".into(), serde_json::json!(min_expected));
        }

        SenseResult {
            sense_name: NAME.to_string(),
            effect_size: cramers_v,
            p_value,
            confidence: confidence_from_p(p_value),
            signal: SignalThresholds::CRAMERS_V.classify(cramers_v),
            description: format!(
                "V={cramers_v:.3} between {} and {} (chi2={chi2:.1}, df={df})",
                variable_keys.0, variable_keys.1
            ),
            metadata,
        }
    }
}

/// Map values to dense category indices. Few distinct values → one category
/// per value; otherwise equal-width bins.
fn categorize(values: &[f64]) -> Vec<usize> {
    let mut distinct: Vec<f64> = values.to_vec();
    distinct.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    distinct.dedup();

    if distinct.len() <= MAX_DISTINCT_AS_CATEGORIES {
        values
            .iter()
            .map(|v| {
                distinct
                    .iter()
                    .position(|d| d == v)
                    .unwrap_or(0)
            })
            .collect()
    } else {
        let min = distinct[0];
        let max = distinct[distinct.len() - 1];
        let width = (max - min) / CONTINUOUS_BINS as f64;
        values
            .iter()
            .map(|&v| {
                if width <= 0.0 {
                    0
                } else {
                    (((v - min) / width) as usize).min(CONTINUOUS_BINS - 1)
                }
            })
            .collect()
    }
}
