//! Inactivity acceleration — are an event stream's gaps growing?
//!
//! Sorts the timestamps, takes consecutive gaps in days, and fits a
//! least-squares line through (index, gap). The trend is classified by the
//! slope's p-value: above 0.10 the stream is stable regardless of slope.

use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, StudentsT};
use thiserror::Error;

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Trend of inter-event gaps over time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GapTrend {
    /// Slope not significant (p > 0.10).
    Stable,
    /// Gaps growing: inactivity is accelerating.
    Accelerating,
    /// Gaps shrinking: the stream is heating up.
    Decelerating,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InactivityResult {
    pub trend: GapTrend,
    /// Days of additional gap per successive event.
    pub slope_days: f64,
    pub p_value: f64,
    pub mean_gap_days: f64,
    pub num_gaps: usize,
}

#[derive(Debug, Error)]
pub enum InactivityError {
    #[error("insufficient_data: need at least 4 timestamps, got {0}")]
    TooFewEvents(usize),
}

/// Detect whether gaps between consecutive events are lengthening.
pub fn detect_inactivity_acceleration(
    timestamps: &[i64],
) -> Result<InactivityResult, InactivityError> {
    if timestamps.len() < 4 {
        return Err(InactivityError::TooFewEvents(timestamps.len()));
    }

    let mut sorted = timestamps.to_vec();
    sorted.sort_unstable();

    let gaps: Vec<f64> = sorted
        .windows(2)
        .map(|w| (w[1] - w[0]) as f64 / SECONDS_PER_DAY)
        .collect();

    let n = gaps.len();
    let mean_gap = gaps.iter().sum::<f64>() / n as f64;

    let (slope, p_value) = slope_significance(&gaps);

    let trend = if p_value > 0.10 {
        GapTrend::Stable
    } else if slope > 0.0 {
        GapTrend::Accelerating
    } else {
        GapTrend::Decelerating
    };

    Ok(InactivityResult {
        trend,
        slope_days: slope,
        p_value,
        mean_gap_days: mean_gap,
        num_gaps: n,
    })
}

/// Least-squares slope of gap vs. index, with its two-tailed p-value.
fn slope_significance(gaps: &[f64]) -> (f64, f64) {
    let n = gaps.len();
    let n_f = n as f64;
    let mean_x = (n_f - 1.0) / 2.0;
    let mean_y = gaps.iter().sum::<f64>() / n_f;

    let mut sxx = 0.0;
    let mut sxy = 0.0;
    for (i, &g) in gaps.iter().enumerate() {
        let dx = i as f64 - mean_x;
        sxx += dx * dx;
        sxy += dx * (g - mean_y);
    }
    if sxx < 1e-10 {
        return (0.0, 1.0);
    }
    let slope = sxy / sxx;

    // residual variance → standard error of the slope
    let mut ss_res = 0.0;
    for (i, &g) in gaps.iter().enumerate() {
        let fitted = mean_y + slope * (i as f64 - mean_x);
        ss_res += (g - fitted).powi(2);
    }
    if n < 3 {
        return (slope, 1.0);
    }
    let df = (n - 2) as f64;
    let se = (ss_res / df / sxx).sqrt();
    if se < 1e-12 {
        // perfectly linear gaps: significance saturates
        return (slope, if slope.abs() > 1e-12 { 0.0 } else { 1.0 });
    }

    let t_stat = slope / se;
    let p = match StudentsT::new(0.0, 1.0, df) {
        Ok(dist) => (2.0 * (1.0 - dist.cdf(t_stat.abs()))).clamp(0.0, 1.0),
        Err(_) => 1.0,
    };
    (slope, p)
}
