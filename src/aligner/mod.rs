//! Temporal aligner — irregular event streams onto a uniform time grid
//!
//! Causal lead/lag analysis needs both series on the same clock. `align`
//! resamples two event streams onto a shared calendar grid (hour/day/week/
//! month buckets), aggregates within buckets, and fills gaps; `lead` scans
//! the aligned pair for the causal lead lag; `inactivity` checks whether an
//! event stream's gaps are growing.
//!
//! Grid starts truncate down to the interval boundary: weeks begin on the
//! prior Monday, months on the first of the month.

pub mod inactivity;
pub mod lead;

use chrono::{DateTime, Datelike, Duration as ChronoDuration, Months, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use inactivity::{detect_inactivity_acceleration, GapTrend, InactivityResult};
pub use lead::{find_causal_lead, LeadDirection, LeadResult};

/// Bucket width of the alignment grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Interval {
    Hour,
    Day,
    Week,
    Month,
}

/// How unobserved buckets are filled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FillStrategy {
    Zero,
    /// Carry the last *observed* bucket forward.
    Forward,
    /// Mean of prior observed buckets.
    Mean,
    Nan,
}

/// How events within one bucket collapse to a single value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregate {
    Sum,
    Mean,
    Count,
    Max,
    Min,
}

/// Alignment parameters. Defaults: 10-point minimum grid, at most half the
/// buckets unobserved on either side.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AlignmentConfig {
    pub interval: Interval,
    pub fill: FillStrategy,
    pub aggregate: Aggregate,
    pub min_points: usize,
    pub max_gap_ratio: f64,
}

impl Default for AlignmentConfig {
    fn default() -> Self {
        Self {
            interval: Interval::Day,
            fill: FillStrategy::Zero,
            aggregate: Aggregate::Mean,
            min_points: 10,
            max_gap_ratio: 0.5,
        }
    }
}

/// A timestamped observation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

/// Two series resampled onto one grid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlignedPair {
    pub grid: Vec<DateTime<Utc>>,
    pub source: Vec<f64>,
    pub target: Vec<f64>,
    pub source_observed: Vec<bool>,
    pub target_observed: Vec<bool>,
    pub interval: Interval,
    pub source_missing_ratio: f64,
    pub target_missing_ratio: f64,
}

/// Alignment failures. Insufficient coverage is an error here (the caller
/// decides whether to degrade), never a panic.
#[derive(Debug, Error)]
pub enum AlignError {
    #[error("insufficient_data: both event streams must be non-empty")]
    EmptyStream,
    #[error("insufficient_data: grid has {len} points, need at least {min}")]
    GridTooShort { len: usize, min: usize },
    #[error("insufficient_data: {side} series missing ratio {ratio:.2} exceeds {max:.2}")]
    TooGappy {
        side: &'static str,
        ratio: f64,
        max: f64,
    },
}

/// Resample both event streams onto a shared grid.
pub fn align(
    source_events: &[Event],
    target_events: &[Event],
    config: &AlignmentConfig,
) -> Result<AlignedPair, AlignError> {
    if source_events.is_empty() || target_events.is_empty() {
        return Err(AlignError::EmptyStream);
    }

    let mut source = source_events.to_vec();
    let mut target = target_events.to_vec();
    source.sort_by_key(|e| e.timestamp);
    target.sort_by_key(|e| e.timestamp);

    // Union range across both streams
    let range_start = source[0].timestamp.min(target[0].timestamp);
    let range_end = source[source.len() - 1]
        .timestamp
        .max(target[target.len() - 1].timestamp);

    let grid_start = truncate_to_boundary(range_start, config.interval);
    let grid = build_grid(grid_start, range_end, config.interval);

    if grid.len() < config.min_points {
        return Err(AlignError::GridTooShort {
            len: grid.len(),
            min: config.min_points,
        });
    }

    let (source_vals, source_obs) = bucket_series(&source, &grid, config);
    let (target_vals, target_obs) = bucket_series(&target, &grid, config);

    let source_missing = missing_ratio(&source_obs);
    let target_missing = missing_ratio(&target_obs);
    if source_missing > config.max_gap_ratio {
        return Err(AlignError::TooGappy {
            side: "source",
            ratio: source_missing,
            max: config.max_gap_ratio,
        });
    }
    if target_missing > config.max_gap_ratio {
        return Err(AlignError::TooGappy {
            side: "target",
            ratio: target_missing,
            max: config.max_gap_ratio,
        });
    }

    Ok(AlignedPair {
        grid,
        source: source_vals,
        target: target_vals,
        source_observed: source_obs,
        target_observed: target_obs,
        interval: config.interval,
        source_missing_ratio: source_missing,
        target_missing_ratio: target_missing,
    })
}

/// Truncate a timestamp down to its interval boundary.
fn truncate_to_boundary(ts: DateTime<Utc>, interval: Interval) -> DateTime<Utc> {
    let day_start = Utc
        .with_ymd_and_hms(ts.year(), ts.month(), ts.day(), 0, 0, 0)
        .single()
        .unwrap_or(ts);
    match interval {
        Interval::Hour => day_start + ChronoDuration::hours(i64::from(ts.hour())),
        Interval::Day => day_start,
        Interval::Week => {
            // back up to the prior Monday
            let days_from_monday = i64::from(ts.weekday().num_days_from_monday());
            day_start - ChronoDuration::days(days_from_monday)
        }
        Interval::Month => Utc
            .with_ymd_and_hms(ts.year(), ts.month(), 1, 0, 0, 0)
            .single()
            .unwrap_or(day_start),
    }
}

/// Advance one grid step.
fn advance(ts: DateTime<Utc>, interval: Interval) -> DateTime<Utc> {
    match interval {
        Interval::Hour => ts + ChronoDuration::hours(1),
        Interval::Day => ts + ChronoDuration::days(1),
        Interval::Week => ts + ChronoDuration::weeks(1),
        Interval::Month => ts + Months::new(1),
    }
}

/// Uniformly spaced grid covering `[start, end]`.
fn build_grid(start: DateTime<Utc>, end: DateTime<Utc>, interval: Interval) -> Vec<DateTime<Utc>> {
    let mut grid = Vec::new();
    let mut cursor = start;
    while cursor <= end {
        grid.push(cursor);
        cursor = advance(cursor, interval);
    }
    grid
}

/// Aggregate a sorted event stream into grid buckets, then fill gaps.
fn bucket_series(
    events: &[Event],
    grid: &[DateTime<Utc>],
    config: &AlignmentConfig,
) -> (Vec<f64>, Vec<bool>) {
    let mut values = vec![f64::NAN; grid.len()];
    let mut observed = vec![false; grid.len()];

    let mut event_idx = 0;
    for (i, &bucket_start) in grid.iter().enumerate() {
        let bucket_end = advance(bucket_start, config.interval);

        // events are sorted, so a single forward pass covers all buckets
        let mut bucket: Vec<f64> = Vec::new();
        while event_idx < events.len() && events[event_idx].timestamp < bucket_end {
            if events[event_idx].timestamp >= bucket_start {
                bucket.push(events[event_idx].value);
            }
            event_idx += 1;
        }

        if !bucket.is_empty() {
            values[i] = aggregate(&bucket, config.aggregate);
            observed[i] = true;
        }
    }

    fill_gaps(&mut values, &observed, config.fill);
    (values, observed)
}

fn aggregate(bucket: &[f64], how: Aggregate) -> f64 {
    match how {
        Aggregate::Sum => bucket.iter().sum(),
        Aggregate::Mean => bucket.iter().sum::<f64>() / bucket.len() as f64,
        Aggregate::Count => bucket.len() as f64,
        Aggregate::Max => bucket.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        Aggregate::Min => bucket.iter().copied().fold(f64::INFINITY, f64::min),
    }
}

/// Fill unobserved buckets. Forward-fill and mean-fill consider prior
/// *observed* buckets only — filled values never feed later fills.
fn fill_gaps(values: &mut [f64], observed: &[bool], fill: FillStrategy) {
    let mut last_observed: Option<f64> = None;
    let mut observed_sum = 0.0;
    let mut observed_count = 0usize;

    for i in 0..values.len() {
        if observed[i] {
            last_observed = Some(values[i]);
            observed_sum += values[i];
            observed_count += 1;
            continue;
        }
        values[i] = match fill {
            FillStrategy::Zero => 0.0,
            FillStrategy::Nan => f64::NAN,
            FillStrategy::Forward => last_observed.unwrap_or(0.0),
            FillStrategy::Mean => {
                if observed_count > 0 {
                    observed_sum / observed_count as f64
                } else {
                    0.0
                }
            }
        };
    }
}

fn missing_ratio(observed: &[bool]) -> f64 {
    if observed.is_empty() {
        return 1.0;
    }
    let missing = observed.iter().filter(|&&o| !o).count();
    missing as f64 / observed.len() as f64
}
