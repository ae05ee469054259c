//! Causal lead detection over aligned series
//!
//! Scans Pearson correlation at every integer lag in `[−L, L]`; positive lag
//! means "source leads target". Significance uses the Fisher z-transform
//! with effective N = N − |lag|.

use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};
use thiserror::Error;

use crate::senses::scan_lags;

/// Direction bucket for the best lag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadDirection {
    Simultaneous,
    /// Source leads by 1–3 buckets.
    SourceLeadsShort,
    /// Source leads by more than 3 buckets.
    SourceLeadsLong,
    /// Negative lag: the nominal target moves first.
    TargetLeads,
    /// |r| below the reporting floor at every lag.
    NoRelationship,
}

/// |r| below this is classified as no relationship.
const MIN_RELATIONSHIP_R: f64 = 0.3;

/// P-values are clamped here; Fisher z underflows for near-perfect r.
const P_FLOOR: f64 = 1e-10;

/// Outcome of a lead scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeadResult {
    pub best_lag: i64,
    pub correlation: f64,
    pub p_value: f64,
    pub direction: LeadDirection,
    pub effective_n: usize,
}

#[derive(Debug, Error)]
pub enum LeadError {
    #[error("insufficient_data: series too short for lead scan (n={0})")]
    TooShort(usize),
    #[error("validation: series lengths differ ({0} vs {1})")]
    LengthMismatch(usize, usize),
}

/// Scan `[−max_lag, max_lag]` for the lag maximizing |r|.
///
/// `max_lag` is clamped below N/2; ties break toward the smaller |lag|,
/// then lag 0.
pub fn find_causal_lead(
    source_values: &[f64],
    target_values: &[f64],
    max_lag: usize,
) -> Result<LeadResult, LeadError> {
    if source_values.len() != target_values.len() {
        return Err(LeadError::LengthMismatch(
            source_values.len(),
            target_values.len(),
        ));
    }
    let n = source_values.len();
    if n < 5 {
        return Err(LeadError::TooShort(n));
    }

    let clamped_lag = max_lag.min(n.saturating_sub(1) / 2);
    let (best_lag, best_r) = scan_lags(source_values, target_values, clamped_lag);

    let effective_n = n - best_lag.unsigned_abs() as usize;
    let p_value = fisher_z_p(best_r, effective_n);

    let direction = if best_r.abs() < MIN_RELATIONSHIP_R {
        LeadDirection::NoRelationship
    } else if best_lag == 0 {
        LeadDirection::Simultaneous
    } else if best_lag < 0 {
        LeadDirection::TargetLeads
    } else if best_lag <= 3 {
        LeadDirection::SourceLeadsShort
    } else {
        LeadDirection::SourceLeadsLong
    };

    Ok(LeadResult {
        best_lag,
        correlation: best_r,
        p_value,
        direction,
        effective_n,
    })
}

/// Two-tailed p-value for r via Fisher z: z = atanh(r), se = 1/sqrt(n−3).
fn fisher_z_p(r: f64, n: usize) -> f64 {
    if n < 4 {
        return 1.0;
    }
    let r_clamped = r.clamp(-0.999_999, 0.999_999);
    let z = r_clamped.atanh();
    let se = 1.0 / ((n - 3) as f64).sqrt();
    match Normal::new(0.0, 1.0) {
        Ok(norm) => (2.0 * (1.0 - norm.cdf((z / se).abs()))).clamp(P_FLOOR, 1.0),
        Err(_) => 1.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_source_leading_by_three() {
        let n = 120;
        let src: Vec<f64> = (0..n).map(|i| ((i as f64) * 0.6).sin()).collect();
        let mut tgt = vec![0.0; n];
        for t in 3..n {
            tgt[t] = src[t - 3] + 0.01 * (t % 3) as f64;
        }
        let result = find_causal_lead(&src, &tgt, 20).expect("scans");
        assert_eq!(result.best_lag, 3);
        assert_eq!(result.direction, LeadDirection::SourceLeadsShort);
        assert!(result.correlation > 0.9);
        assert!(result.p_value < 0.001);
        assert_eq!(result.effective_n, n - 3);
    }

    #[test]
    fn detects_target_leading() {
        let n = 120;
        let tgt_base: Vec<f64> = (0..n).map(|i| ((i as f64) * 0.6).cos()).collect();
        // source copies the target two steps later → target leads
        let mut src = vec![0.0; n];
        for t in 2..n {
            src[t] = tgt_base[t - 2];
        }
        let result = find_causal_lead(&src, &tgt_base, 20).expect("scans");
        assert_eq!(result.best_lag, -2);
        assert_eq!(result.direction, LeadDirection::TargetLeads);
    }

    #[test]
    fn unrelated_series_have_no_relationship() {
        let src: Vec<f64> = (0..100).map(|i| ((i * 37) % 101) as f64).collect();
        let tgt: Vec<f64> = (0..100).map(|i| ((i * 53) % 97) as f64).collect();
        let result = find_causal_lead(&src, &tgt, 10).expect("scans");
        assert_eq!(result.direction, LeadDirection::NoRelationship);
    }

    #[test]
    fn p_value_is_clamped_above_floor() {
        let src: Vec<f64> = (0..500).map(|i| i as f64).collect();
        let result = find_causal_lead(&src, &src.clone(), 5).expect("scans");
        assert!(result.p_value >= 1e-10);
        assert_eq!(result.best_lag, 0);
    }

    #[test]
    fn max_lag_is_clamped_below_half_n() {
        let src: Vec<f64> = (0..10).map(|i| i as f64).collect();
        let tgt: Vec<f64> = (0..10).map(|i| (i * 2) as f64).collect();
        // requesting an absurd lag must not panic or scan past N/2
        let result = find_causal_lead(&src, &tgt, 1000).expect("scans");
        assert!(result.best_lag.unsigned_abs() <= 4);
    }

    #[test]
    fn mismatched_lengths_error() {
        assert!(find_causal_lead(&[1.0; 10], &[1.0; 9], 2).is_err());
    }
}
