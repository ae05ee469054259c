//! Dataset loading — CSV → matrix bundle
//!
//! A thin, hand-rolled reader: quote-aware CSV parsing, statistical-type
//! inference per column, and a readiness report for the `readiness` CLI
//! command. Heavier ingestion (Excel, databases) lives outside the core;
//! this loader exists so the pipeline is exercisable end-to-end from a file.
//!
//! Type inference, in precedence order per column:
//! 1. **timestamp** — every present cell parses as RFC3339 or epoch seconds
//! 2. **binary** — exactly two distinct values (numeric 0/1, true/false, yes/no)
//! 3. **numeric** — every present cell parses as f64
//! 4. **categorical** — few distinct strings; stored as integer codes
//! 5. **text** — everything else (excluded from pairwise analysis)

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use chrono::DateTime;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::core::{Column, EngineError, EngineResult, MatrixBundle, StatType};

/// Distinct-value ceiling for categorical inference.
const MAX_CATEGORICAL_DISTINCT: usize = 20;

/// Cells treated as missing.
const MISSING_TOKENS: [&str; 5] = ["", "na", "n/a", "null", "nan"];

// ============================================================================
// CSV parsing
// ============================================================================

/// Split a CSV line respecting quoted fields (handles commas inside quotes).
fn csv_split(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '"' => {
                if in_quotes {
                    if chars.peek() == Some(&'"') {
                        current.push('"');
                        chars.next();
                    } else {
                        in_quotes = false;
                    }
                } else {
                    in_quotes = true;
                }
            }
            ',' if !in_quotes => {
                fields.push(current.clone());
                current.clear();
            }
            _ => current.push(ch),
        }
    }
    fields.push(current);
    fields
}

/// Raw parsed table: header plus string cells (None = missing).
struct RawTable {
    header: Vec<String>,
    rows: Vec<Vec<Option<String>>>,
}

fn read_table(path: &Path) -> EngineResult<RawTable> {
    let file = File::open(path).map_err(|e| {
        EngineError::Validation(format!("cannot open {}: {e}", path.display()))
    })?;
    let reader = BufReader::new(file);
    let mut lines = reader.lines();

    let header_line = lines
        .next()
        .transpose()
        .map_err(|e| EngineError::Validation(format!("read failed: {e}")))?
        .ok_or_else(|| EngineError::Validation("file is empty".into()))?;
    let header: Vec<String> = csv_split(&header_line)
        .into_iter()
        .map(|h| h.trim().to_string())
        .collect();
    if header.iter().any(String::is_empty) {
        return Err(EngineError::Validation("header contains empty column names".into()));
    }

    let mut rows = Vec::new();
    for line in lines {
        let line = line.map_err(|e| EngineError::Validation(format!("read failed: {e}")))?;
        if line.trim().is_empty() {
            continue;
        }
        let mut cells: Vec<Option<String>> = csv_split(&line)
            .into_iter()
            .map(|c| {
                let trimmed = c.trim().to_string();
                if MISSING_TOKENS.contains(&trimmed.to_ascii_lowercase().as_str()) {
                    None
                } else {
                    Some(trimmed)
                }
            })
            .collect();
        cells.resize(header.len(), None);
        rows.push(cells);
    }

    Ok(RawTable { header, rows })
}

// ============================================================================
// Type inference
// ============================================================================

fn parse_timestamp(cell: &str) -> Option<i64> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(cell) {
        return Some(dt.timestamp());
    }
    // bare epoch seconds (heuristic floor keeps small integers numeric)
    if let Ok(epoch) = cell.parse::<i64>() {
        if epoch > 1_000_000_000 {
            return Some(epoch);
        }
    }
    None
}

fn infer_type(cells: &[Option<String>]) -> StatType {
    let present: Vec<&str> = cells.iter().flatten().map(String::as_str).collect();
    if present.is_empty() {
        return StatType::Text;
    }

    if present.iter().all(|c| parse_timestamp(c).is_some()) {
        return StatType::Timestamp;
    }

    let mut distinct: Vec<&str> = present.clone();
    distinct.sort_unstable();
    distinct.dedup();

    let all_numeric = present.iter().all(|c| c.parse::<f64>().is_ok());
    if distinct.len() == 2 {
        let binary_tokens = distinct.iter().all(|d| {
            matches!(
                d.to_ascii_lowercase().as_str(),
                "0" | "1" | "true" | "false" | "yes" | "no"
            )
        });
        if binary_tokens || all_numeric {
            return StatType::Binary;
        }
    }
    if all_numeric {
        return StatType::Numeric;
    }
    if distinct.len() <= MAX_CATEGORICAL_DISTINCT {
        return StatType::Categorical;
    }
    StatType::Text
}

fn encode_column(key: &str, cells: &[Option<String>], stat_type: StatType) -> Column {
    let values: Vec<f64>;
    let mut labels = None;

    match stat_type {
        StatType::Numeric | StatType::Timestamp => {
            values = cells
                .iter()
                .map(|c| {
                    c.as_deref()
                        .and_then(|s| {
                            if stat_type == StatType::Timestamp {
                                parse_timestamp(s).map(|t| t as f64)
                            } else {
                                s.parse::<f64>().ok()
                            }
                        })
                        .unwrap_or(f64::NAN)
                })
                .collect();
        }
        StatType::Binary => {
            values = cells
                .iter()
                .map(|c| match c.as_deref().map(str::to_ascii_lowercase).as_deref() {
                    Some("1" | "true" | "yes") => 1.0,
                    Some("0" | "false" | "no") => 0.0,
                    Some(other) => other.parse::<f64>().unwrap_or(f64::NAN),
                    None => f64::NAN,
                })
                .collect();
        }
        StatType::Categorical => {
            let mut table: Vec<String> = cells.iter().flatten().cloned().collect();
            table.sort();
            table.dedup();
            values = cells
                .iter()
                .map(|c| {
                    c.as_deref()
                        .and_then(|s| table.iter().position(|t| t == s))
                        .map_or(f64::NAN, |i| i as f64)
                })
                .collect();
            labels = Some(table);
        }
        StatType::Text => {
            values = vec![f64::NAN; cells.len()];
        }
    }

    Column {
        key: key.to_string(),
        stat_type,
        values,
        labels,
    }
}

/// Load a CSV file into a matrix bundle. The first timestamp-typed column
/// becomes the bundle's row-timestamp axis.
pub fn load_csv(path: impl AsRef<Path>, snapshot_id: &str) -> EngineResult<MatrixBundle> {
    let path = path.as_ref();
    let table = read_table(path)?;

    let mut columns = Vec::with_capacity(table.header.len());
    let mut timestamps: Option<Vec<i64>> = None;
    for (i, key) in table.header.iter().enumerate() {
        let cells: Vec<Option<String>> = table.rows.iter().map(|r| r[i].clone()).collect();
        let stat_type = infer_type(&cells);
        let column = encode_column(key, &cells, stat_type);
        if stat_type == StatType::Timestamp && timestamps.is_none() {
            timestamps = Some(
                column
                    .values
                    .iter()
                    .map(|v| if v.is_nan() { 0 } else { *v as i64 })
                    .collect(),
            );
        }
        columns.push(column);
    }

    info!(
        path = %path.display(),
        rows = table.rows.len(),
        columns = columns.len(),
        "dataset loaded"
    );
    MatrixBundle::new(snapshot_id, columns, timestamps)
}

// ============================================================================
// Readiness
// ============================================================================

/// Per-column readiness for the statistical layers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnReadiness {
    pub key: String,
    pub inferred_type: StatType,
    pub missing_rate: f64,
    pub distinct_values: usize,
    pub admissible: bool,
    pub notes: Vec<String>,
}

/// Whole-file readiness report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessReport {
    pub source_name: String,
    pub row_count: usize,
    pub admissible_columns: usize,
    pub columns: Vec<ColumnReadiness>,
}

impl ReadinessReport {
    /// One-line verdict for CLI output.
    pub fn summary(&self) -> String {
        format!(
            "source={} rows={} columns={} admissible={}",
            self.source_name,
            self.row_count,
            self.columns.len(),
            self.admissible_columns
        )
    }
}

/// Probe a data file without running any statistics.
pub fn assess_readiness(
    path: impl AsRef<Path>,
    source_name: &str,
) -> EngineResult<ReadinessReport> {
    let table = read_table(path.as_ref())?;
    let row_count = table.rows.len();

    let mut columns = Vec::new();
    for (i, key) in table.header.iter().enumerate() {
        let cells: Vec<Option<String>> = table.rows.iter().map(|r| r[i].clone()).collect();
        let inferred_type = infer_type(&cells);

        let present = cells.iter().flatten().count();
        let missing_rate = if row_count == 0 {
            1.0
        } else {
            1.0 - present as f64 / row_count as f64
        };

        let mut distinct: Vec<&String> = cells.iter().flatten().collect();
        distinct.sort();
        distinct.dedup();

        let mut notes = Vec::new();
        let mut admissible = matches!(
            inferred_type,
            StatType::Numeric | StatType::Categorical | StatType::Binary
        );
        if !admissible {
            notes.push(format!("{} columns are not tested pairwise", inferred_type.as_str()));
        }
        if missing_rate > 0.3 {
            notes.push(format!("missing rate {missing_rate:.2} exceeds 0.30"));
            admissible = false;
        }
        if distinct.len() < 2 {
            notes.push("fewer than 2 distinct values".to_string());
            admissible = false;
        }
        if row_count < 3 {
            notes.push("fewer than 3 rows".to_string());
            admissible = false;
        }

        columns.push(ColumnReadiness {
            key: key.clone(),
            inferred_type,
            missing_rate,
            distinct_values: distinct.len(),
            admissible,
            notes,
        });
    }

    let admissible_columns = columns.iter().filter(|c| c.admissible).count();
    Ok(ReadinessReport {
        source_name: source_name.to_string(),
        row_count,
        admissible_columns,
        columns,
    })
}
