//! Welch's t-test sense
//!
//! Difference in Y between the two groups of a binary X. Unequal variances
//! are assumed (Welch–Satterthwaite degrees of freedom). The effect size is
//! Cohen's d; the t statistic and df land in metadata.
//!
//! When X is not actually binary the sense falls back to a median split and
//! says so in metadata, so evidence blocks stay comparable across pairs.

use std::collections::BTreeMap;

use statrs::distribution::{ContinuousCDF, Normal, StudentsT};

use crate::core::SenseResult;

use super::{confidence_from_p, degenerate_reason, mean, skipped_result, variance, Sense, SignalThresholds};

const NAME: &str = "welch_t";
const DESCRIPTION: &str = "Group difference (Welch's t-test, Cohen's d)";

pub struct WelchTSense;

impl Sense for WelchTSense {
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

        let (group0, group1, median_split) = split_by_x(x, y);
        if group0.len() < 2 || group1.len() < 2 {
            return skipped_result(NAME, DESCRIPTION, "group_too_small");
        }

        let (n0, n1) = (group0.len() as f64, group1.len() as f64);
        let (m0, m1) = (mean(&group0), mean(&group1));
        let (v0, v1) = (variance(&group0), variance(&group1));

        let se = (v0 / n0 + v1 / n1).sqrt();
        if se < 1e-10 {
            return skipped_result(NAME, DESCRIPTION, "zero_variance");
        }
        let t_stat = (m1 - m0) / se;

        // Welch–Satterthwaite
        let df_num = (v0 / n0 + v1 / n1).powi(2);
        let df_den = (v0 / n0).powi(2) / (n0 - 1.0) + (v1 / n1).powi(2) / (n1 - 1.0);
        let df = if df_den > 0.0 { df_num / df_den } else { n0 + n1 - 2.0 };

        let p_value = two_tailed_t(t_stat, df);

        // Cohen's d with pooled standard deviation
        let pooled_var = ((n0 - 1.0) * v0 + (n1 - 1.0) * v1) / (n0 + n1 - 2.0);
        let cohens_d = if pooled_var > 1e-10 {
            (m1 - m0) / pooled_var.sqrt()
        } else {
            0.0
        };

        let mut metadata = BTreeMap::new();
        metadata.insert("t_statistic".into(), serde_json::json!(t_stat));
        metadata.insert("df".into(), serde_json::json!(df));
        metadata.insert("group0_n".into(), serde_json::json!(group0.len()));
        metadata.insert("group1_n".into(), serde_json::json!(group1.len()));
        metadata.insert("group0_mean".into(), serde_json::json!(m0));
        metadata.insert("group1_mean".into(), serde_json::json!(m1));
        if median_split {
            metadata.insert("median_split".into(), serde_json::json!(true));
        }

        SenseResult {
            sense_name: NAME.to_string(),
            effect_size: cohens_d,
            p_value,
            confidence: confidence_from_p(p_value),
            signal: SignalThresholds::COHENS_D.classify(cohens_d),
            description: format!(
                "d={cohens_d:.3} for {} split by {} (t={t_stat:.2}, df={df:.1})",
                variable_keys.1, variable_keys.0
            ),
            metadata,
        }
    }
}

/// Split Y by X: by value when X is binary, otherwise by X's median.
fn split_by_x(x: &[f64], y: &[f64]) -> (Vec<f64>, Vec<f64>, bool) {
    let mut distinct: Vec<f64> = x.to_vec();
    distinct.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    distinct.dedup();

    let (threshold, median_split) = if distinct.len() == 2 {
        // midpoint between the two codes
        ((distinct[0] + distinct[1]) / 2.0, false)
    } else {
        let mut sorted = x.to_vec();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        (sorted[sorted.len() / 2], true)
    };

    let mut group0 = Vec::new();
    let mut group1 = Vec::new();
    for (xv, yv) in x.iter().zip(y.iter()) {
        if *xv < threshold {
            group0.push(*yv);
        } else {
            group1.push(*yv);
        }
    }
    (group0, group1, median_split)
}

/// Two-tailed p-value for a t statistic; Normal fallback when the t
/// distribution cannot be constructed for the given df.
fn two_tailed_t(t_stat: f64, df: f64) -> f64 {
    match StudentsT::new(0.0, 1.0, df) {
        Ok(dist) => (2.0 * (1.0 - dist.cdf(t_stat.abs()))).clamp(0.0, 1.0),
        Err(_) => match Normal::new(0.0, 1.0) {
            Ok(norm) => (2.0 * (1.0 - norm.cdf(t_stat.abs()))).clamp(0.0, 1.0),
            Err(_) => 1.0,
        },
    }
}
