//! Matrix bundle — the immutable rectangular input view
//!
//! Columns store `f64` values with NaN marking missing cells. Categorical and
//! binary columns hold integer codes (with a label table for reporting), so
//! every sense operates on plain `&[f64]` slices. The bundle is pinned to a
//! snapshot and never mutated for the lifetime of a run.

use serde::{Deserialize, Serialize};

use super::error::{EngineError, EngineResult};
use super::ids::{sha256_hex, validate_variable_key};

/// Statistical type of a column, driving per-pair test selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatType {
    Numeric,
    Categorical,
    Binary,
    Timestamp,
    Text,
}

impl StatType {
    pub fn as_str(self) -> &'static str {
        match self {
            StatType::Numeric => "numeric",
            StatType::Categorical => "categorical",
            StatType::Binary => "binary",
            StatType::Timestamp => "timestamp",
            StatType::Text => "text",
        }
    }
}

/// One column of the bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Column {
    pub key: String,
    pub stat_type: StatType,
    /// NaN = missing. Categorical/binary cells are integer codes.
    pub values: Vec<f64>,
    /// Code → label table for categorical columns.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub labels: Option<Vec<String>>,
}

impl Column {
    pub fn missing_rate(&self) -> f64 {
        if self.values.is_empty() {
            return 1.0;
        }
        let missing = self.values.iter().filter(|v| v.is_nan()).count();
        missing as f64 / self.values.len() as f64
    }
}

/// Snapshot-pinned rectangular view over the dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatrixBundle {
    pub snapshot_id: String,
    pub columns: Vec<Column>,
    pub row_count: usize,
    /// Optional per-row epoch seconds, shared by all columns.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub timestamps: Option<Vec<i64>>,
}

impl MatrixBundle {
    /// Build a bundle, validating shape and keys up front.
    pub fn new(
        snapshot_id: impl Into<String>,
        columns: Vec<Column>,
        timestamps: Option<Vec<i64>>,
    ) -> EngineResult<Self> {
        let snapshot_id = snapshot_id.into();
        if snapshot_id.is_empty() {
            return Err(EngineError::Validation("snapshot_id must be non-empty".into()));
        }
        let row_count = columns.first().map_or(0, |c| c.values.len());
        for col in &columns {
            validate_variable_key(&col.key)?;
            if col.values.len() != row_count {
                return Err(EngineError::Validation(format!(
                    "column {} has {} rows, expected {}",
                    col.key,
                    col.values.len(),
                    row_count
                )));
            }
        }
        if let Some(ts) = &timestamps {
            if ts.len() != row_count {
                return Err(EngineError::Validation(format!(
                    "timestamp vector has {} rows, expected {}",
                    ts.len(),
                    row_count
                )));
            }
        }
        Ok(Self {
            snapshot_id,
            columns,
            row_count,
            timestamps,
        })
    }

    pub fn column(&self, key: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.key == key)
    }

    /// All variable keys in bundle order.
    pub fn variable_keys(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.key.clone()).collect()
    }

    /// Hash of the variable registry in effect: keys and statistical types.
    pub fn registry_hash(&self) -> String {
        let mut material = String::new();
        for col in &self.columns {
            material.push_str(&col.key);
            material.push('\u{1f}');
            material.push_str(col.stat_type.as_str());
            material.push('\u{1e}');
        }
        sha256_hex(material.as_bytes())[..16].to_string()
    }

    /// Rows where both columns are present, as paired vectors.
    pub fn paired_values(&self, x_key: &str, y_key: &str) -> Option<(Vec<f64>, Vec<f64>)> {
        let x = self.column(x_key)?;
        let y = self.column(y_key)?;
        let mut xs = Vec::with_capacity(self.row_count);
        let mut ys = Vec::with_capacity(self.row_count);
        for (a, b) in x.values.iter().zip(y.values.iter()) {
            if !a.is_nan() && !b.is_nan() {
                xs.push(*a);
                ys.push(*b);
            }
        }
        Some((xs, ys))
    }
}
