//! Spearman rank correlation sense
//!
//! Monotone association: Pearson correlation of average ranks. Robust to
//! outliers and monotone-but-nonlinear relationships that deflate Pearson r.

use std::collections::BTreeMap;

use crate::core::SenseResult;

use super::{
    average_ranks, confidence_from_p, degenerate_reason, p_value_for_r, pearson_r,
    skipped_result, Sense, SignalThresholds,
};

const NAME: &str = "spearman";
const DESCRIPTION: &str = "Monotone rank correlation (Spearman rho)";

pub struct SpearmanSense;

impl Sense for SpearmanSense {
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

        let n = x.len();
        let rho = pearson_r(&average_ranks(x), &average_ranks(y));
        let p_value = p_value_for_r(rho, n);

        let mut metadata = BTreeMap::new();
        metadata.insert("sample_size".into(), serde_json::json!(n));

        SenseResult {
            sense_name: NAME.to_string(),
            effect_size: rho,
            p_value,
            confidence: confidence_from_p(p_value),
            signal: SignalThresholds::PEARSON.classify(rho),
            description: format!(
                "rho={rho:.3} between {} and {} over {n} samples",
                variable_keys.0, variable_keys.1
            ),
            metadata,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monotone_nonlinear_is_perfect_for_spearman() {
        // y = x^3 is monotone: rho = 1 even though the relation is nonlinear
        let x: Vec<f64> = (1..50).map(|i| i as f64).collect();
        let y: Vec<f64> = x.iter().map(|v| v.powi(3)).collect();
        let result = SpearmanSense.analyze(&x, &y, ("a", "b"), None);
        assert!((result.effect_size - 1.0).abs() < 1e-9);
        assert!(result.p_value < 0.001);
    }

    #[test]
    fn ties_do_not_break_the_rank_transform() {
        let x = vec![1.0, 2.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0];
        let y = vec![1.0, 2.0, 2.5, 3.0, 4.0, 5.0, 6.0, 7.0];
        let result = SpearmanSense.analyze(&x, &y, ("a", "b"), None);
        assert!(result.effect_size > 0.95);
    }

    #[test]
    fn length_mismatch_is_skipped() {
        let result = SpearmanSense.analyze(&[1.0, 2.0, 3.0], &[1.0, 2.0], ("a", "b"), None);
        assert!(result.is_skipped());
    }
}
