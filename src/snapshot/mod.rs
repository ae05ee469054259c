//! Snapshot resolution — cutoff enforcement and cohort pinning
//!
//! A snapshot pins the dataset at `snapshot_at − lag`. Resolution validates
//! the requested variable keys against the registry, hashes the cohort (the
//! row set in view), and enforces the temporal-leakage rule: any row
//! timestamp past the cutoff is fatal, because a sweep over leaked rows
//! could cite the future as evidence.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::core::{sha256_hex, EngineError, EngineResult, MatrixBundle};

/// A resolved snapshot: identity plus the hashes that pin reproducibility.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedSnapshot {
    pub snapshot_id: String,
    pub cutoff: DateTime<Utc>,
    pub cohort_hash: String,
    pub registry_hash: String,
    pub resolved_keys: Vec<String>,
    pub row_count: usize,
}

/// Resolve `variable_keys` against the bundle at `snapshot_at − lag_hours`.
pub fn resolve(
    bundle: &MatrixBundle,
    snapshot_at: DateTime<Utc>,
    lag_hours: i64,
    variable_keys: &[String],
) -> EngineResult<ResolvedSnapshot> {
    if variable_keys.is_empty() {
        return Err(EngineError::Validation("at least one variable key required".into()));
    }
    for key in variable_keys {
        crate::core::validate_variable_key(key)?;
        if bundle.column(key).is_none() {
            return Err(EngineError::Validation(format!(
                "variable key {key:?} not in registry"
            )));
        }
    }

    let cutoff = snapshot_at - Duration::hours(lag_hours);

    // Leakage gate: the bundle may not contain any row past the cutoff
    if let Some(timestamps) = &bundle.timestamps {
        let cutoff_epoch = cutoff.timestamp();
        if let Some((row, ts)) = timestamps
            .iter()
            .enumerate()
            .find(|(_, &ts)| ts > cutoff_epoch)
        {
            return Err(EngineError::Leakage(format!(
                "row {row} timestamp {ts} exceeds cutoff {cutoff_epoch} ({cutoff})"
            )));
        }
    }

    let cohort_hash = cohort_hash(bundle);
    let registry_hash = bundle.registry_hash();
    let snapshot_id = format!(
        "snap-{}",
        &sha256_hex(
            format!(
                "{}\u{1f}{lag_hours}\u{1f}{cohort_hash}\u{1f}{registry_hash}",
                snapshot_at.to_rfc3339()
            )
            .as_bytes()
        )[..16]
    );

    info!(
        snapshot_id = %snapshot_id,
        cutoff = %cutoff,
        cohort = %cohort_hash,
        registry = %registry_hash,
        keys = variable_keys.len(),
        "snapshot resolved"
    );

    Ok(ResolvedSnapshot {
        snapshot_id,
        cutoff,
        cohort_hash,
        registry_hash,
        resolved_keys: variable_keys.to_vec(),
        row_count: bundle.row_count,
    })
}

/// Hash of the row set in view. With no explicit entity IDs, the row count
/// plus the timestamp vector identifies the cohort; a timestamp-free bundle
/// falls back to the row count alone.
pub fn cohort_hash(bundle: &MatrixBundle) -> String {
    let mut material = bundle.row_count.to_string();
    if let Some(timestamps) = &bundle.timestamps {
        for ts in timestamps {
            material.push('\u{1f}');
            material.push_str(&ts.to_string());
        }
    }
    sha256_hex(material.as_bytes())[..16].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Column, StatType};
    use chrono::TimeZone;

    fn bundle_with_timestamps(last_epoch: i64) -> MatrixBundle {
        let n = 5;
        let timestamps: Vec<i64> = (0..n as i64)
            .map(|i| last_epoch - (n as i64 - 1 - i) * 86_400)
            .collect();
        let col = Column {
            key: "metric".into(),
            stat_type: StatType::Numeric,
            values: (0..n).map(|i| i as f64).collect(),
            labels: None,
        };
        MatrixBundle::new("pre-snap", vec![col], Some(timestamps)).expect("bundle")
    }

    #[test]
    fn clean_snapshot_resolves() {
        let snapshot_at = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).single().expect("date");
        let bundle = bundle_with_timestamps(snapshot_at.timestamp() - 7 * 86_400);
        let resolved = resolve(&bundle, snapshot_at, 24, &["metric".into()]).expect("resolves");
        assert!(resolved.snapshot_id.starts_with("snap-"));
        assert_eq!(resolved.cutoff, snapshot_at - Duration::hours(24));
        assert_eq!(resolved.row_count, 5);
    }

    #[test]
    fn future_row_is_fatal_leakage() {
        let snapshot_at = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).single().expect("date");
        // newest row is one day AFTER the cutoff
        let bundle = bundle_with_timestamps(snapshot_at.timestamp() + 86_400);
        let err = resolve(&bundle, snapshot_at, 0, &["metric".into()]).unwrap_err();
        assert_eq!(err.kind_tag(), "leakage");
    }

    #[test]
    fn lag_moves_the_cutoff_back() {
        let snapshot_at = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).single().expect("date");
        // newest row 6 hours before snapshot_at: fine at lag 0, leaks at lag 12
        let bundle = bundle_with_timestamps(snapshot_at.timestamp() - 6 * 3600);
        assert!(resolve(&bundle, snapshot_at, 0, &["metric".into()]).is_ok());
        let err = resolve(&bundle, snapshot_at, 12, &["metric".into()]).unwrap_err();
        assert_eq!(err.kind_tag(), "leakage");
    }

    #[test]
    fn unknown_key_is_validation() {
        let snapshot_at = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).single().expect("date");
        let bundle = bundle_with_timestamps(snapshot_at.timestamp() - 86_400);
        let err = resolve(&bundle, snapshot_at, 0, &["ghost".into()]).unwrap_err();
        assert_eq!(err.kind_tag(), "validation");
    }

    #[test]
    fn cohort_hash_tracks_rows_not_values() {
        let snapshot_at = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).single().expect("date");
        let a = bundle_with_timestamps(snapshot_at.timestamp() - 86_400);
        let b = bundle_with_timestamps(snapshot_at.timestamp() - 86_400);
        assert_eq!(cohort_hash(&a), cohort_hash(&b));
        let c = bundle_with_timestamps(snapshot_at.timestamp() - 2 * 86_400);
        assert_ne!(cohort_hash(&a), cohort_hash(&c));
    }
}
