//! Temporal cross-correlation sense
//!
//! The only sense that needs per-row timestamps. Rows are ordered by time,
//! then Pearson correlation is scanned over integer lags in `[−L, L]`;
//! positive lag means "X leads Y". Ties in |r| break toward the smaller
//! |lag|, then toward lag 0, so a simultaneous explanation always wins over
//! an equally-scoring lagged one.

use std::collections::BTreeMap;

use crate::core::SenseResult;

use super::{
    confidence_from_p, degenerate_reason, p_value_for_r, pearson_r, skipped_result, Sense,
    SignalThresholds,
};

const NAME: &str = "temporal";
const DESCRIPTION: &str = "Lagged cross-correlation (lead/lag scan)";

/// Hard cap on the lag scan window.
const MAX_LAG_CAP: usize = 20;

/// |r| below this is reported as no temporal relationship.
const MIN_RELATIONSHIP_R: f64 = 0.3;

pub struct TemporalSense;

impl Sense for TemporalSense {
    fn name(&self) -> &'static str {
        NAME
    }

    fn description(&self) -> &'static str {
        DESCRIPTION
    }

    fn requires_timestamps(&self) -> bool {
        true
    }

    fn analyze(
        &self,
        x: &[f64],
        y: &[f64],
        variable_keys: (&str, &str),
        timestamps: Option<&[i64]>,
    ) -> SenseResult {
        let Some(ts) = timestamps else {
            return skipped_result(NAME, DESCRIPTION, "no_timestamps");
        };
        if ts.len() != x.len() {
            return skipped_result(NAME, DESCRIPTION, "length_mismatch");
        }
        if let Some(reason) = degenerate_reason(x, y) {
            return skipped_result(NAME, DESCRIPTION, reason);
        }

        // Stable sort by timestamp; the scan assumes time order
        let mut order: Vec<usize> = (0..ts.len()).collect();
        order.sort_by_key(|&i| ts[i]);
        let xs: Vec<f64> = order.iter().map(|&i| x[i]).collect();
        let ys: Vec<f64> = order.iter().map(|&i| y[i]).collect();

        let n = xs.len();
        let max_lag = max_lag_for(n);

        let (best_lag, best_r) = scan_lags(&xs, &ys, max_lag);
        let effective_n = n.saturating_sub(best_lag.unsigned_abs() as usize);
        let p_value = p_value_for_r(best_r, effective_n).max(1e-10);

        let direction = classify_direction(best_lag, best_r);

        let mut metadata = BTreeMap::new();
        metadata.insert("best_lag".into(), serde_json::json!(best_lag));
        metadata.insert("max_lag".into(), serde_json::json!(max_lag));
        metadata.insert("effective_n".into(), serde_json::json!(effective_n));
        metadata.insert("direction".into(), serde_json::json!(direction));

        SenseResult {
            sense_name: NAME.to_string(),
            effect_size: best_r,
            p_value,
            confidence: confidence_from_p(p_value),
            signal: SignalThresholds::PEARSON.classify(best_r),
            description: format!(
                "r={best_r:.3} at lag {best_lag} between {} and {} ({direction})",
                variable_keys.0, variable_keys.1
            ),
            metadata,
        }
    }
}

/// Default lag window: `min(20, N/4)`, always below N/2.
pub fn max_lag_for(n: usize) -> usize {
    MAX_LAG_CAP.min(n / 4).min(n.saturating_sub(1) / 2)
}

/// Scan lags in `[−max_lag, max_lag]`, returning the lag with maximum |r|.
/// Scanning order (0, ±1, ±2, …) plus strict improvement gives the
/// smaller-|lag|-then-zero tie break.
pub fn scan_lags(x: &[f64], y: &[f64], max_lag: usize) -> (i64, f64) {
    let mut best_lag = 0_i64;
    let mut best_r = lagged_r(x, y, 0);

    for lag in 1..=max_lag as i64 {
        for candidate in [lag, -lag] {
            let r = lagged_r(x, y, candidate);
            if r.abs() > best_r.abs() {
                best_r = r;
                best_lag = candidate;
            }
        }
    }
    (best_lag, best_r)
}

/// Pearson r between X and Y shifted by `lag` steps.
/// Positive lag: X at t−lag against Y at t (X leads Y).
fn lagged_r(x: &[f64], y: &[f64], lag: i64) -> f64 {
    let n = x.len();
    let k = lag.unsigned_abs() as usize;
    if k >= n {
        return 0.0;
    }
    if lag >= 0 {
        pearson_r(&x[..n - k], &y[k..])
    } else {
        pearson_r(&x[k..], &y[..n - k])
    }
}

/// Bucket the lead/lag finding.
fn classify_direction(lag: i64, r: f64) -> &'static str {
    if r.abs() < MIN_RELATIONSHIP_R {
        "no_relationship"
    } else if lag == 0 {
        "simultaneous"
    } else if lag < 0 {
        "target_leads"
    } else if lag <= 3 {
        "source_leads_short"
    } else {
        "source_leads_long"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timestamps(n: usize) -> Vec<i64> {
        (0..n as i64).map(|i| 1_700_000_000 + i * 86_400).collect()
    }

    #[test]
    fn echo_series_finds_the_lag() {
        // y[t] = x[t-3]
        let n = 200;
        let x: Vec<f64> = (0..n).map(|i| ((i as f64) * 0.7).sin() * 10.0).collect();
        let mut y = vec![0.0; n];
        for t in 3..n {
            y[t] = x[t - 3];
        }
        let ts = timestamps(n);
        let result = TemporalSense.analyze(&x, &y, ("x", "y"), Some(&ts));

        assert_eq!(result.metadata.get("best_lag"), Some(&serde_json::json!(3)));
        assert_eq!(
            result.metadata.get("direction"),
            Some(&serde_json::json!("source_leads_short"))
        );
        assert!(result.effect_size.abs() > 0.7, "r={}", result.effect_size);
        assert!(result.p_value < 0.01);
    }

    #[test]
    fn simultaneous_series_prefers_lag_zero() {
        let n = 100;
        let x: Vec<f64> = (0..n).map(|i| (i as f64 * 0.3).cos()).collect();
        let y = x.clone();
        let ts = timestamps(n);
        let result = TemporalSense.analyze(&x, &y, ("x", "y"), Some(&ts));
        assert_eq!(result.metadata.get("best_lag"), Some(&serde_json::json!(0)));
        assert_eq!(
            result.metadata.get("direction"),
            Some(&serde_json::json!("simultaneous"))
        );
    }

    #[test]
    fn missing_timestamps_is_skipped() {
        let x: Vec<f64> = (0..50).map(|i| i as f64).collect();
        let result = TemporalSense.analyze(&x, &x.clone(), ("x", "y"), None);
        assert!(result.is_skipped());
    }

    #[test]
    fn max_lag_respects_bounds() {
        assert_eq!(max_lag_for(200), 20); // capped
        assert_eq!(max_lag_for(40), 10); // N/4
        assert_eq!(max_lag_for(8), 2); // N/4 = 2, below N/2
        assert!(max_lag_for(5) < 5 / 2 + 1);
    }

    #[test]
    fn unsorted_rows_are_ordered_by_timestamp() {
        // Same echo data, rows shuffled; timestamp sort must recover the lag
        let n = 120;
        let x_sorted: Vec<f64> = (0..n).map(|i| ((i as f64) * 0.5).sin() * 5.0).collect();
        let mut y_sorted = vec![0.0; n];
        for t in 2..n {
            y_sorted[t] = x_sorted[t - 2];
        }
        let ts_sorted = timestamps(n);

        // interleave rows: even indices first, then odd
        let mut idx: Vec<usize> = (0..n).step_by(2).chain((1..n).step_by(2)).collect();
        idx.reverse();
        let x: Vec<f64> = idx.iter().map(|&i| x_sorted[i]).collect();
        let y: Vec<f64> = idx.iter().map(|&i| y_sorted[i]).collect();
        let ts: Vec<i64> = idx.iter().map(|&i| ts_sorted[i]).collect();

        let result = TemporalSense.analyze(&x, &y, ("x", "y"), Some(&ts));
        assert_eq!(result.metadata.get("best_lag"), Some(&serde_json::json!(2)));
    }
}
