//! Pearson correlation sense
//!
//! Linear association between two numeric columns. The coefficient is the
//! effect size; the p-value comes from the two-tailed Student's t
//! distribution with n − 2 degrees of freedom.

use std::collections::BTreeMap;

use crate::core::SenseResult;

use super::{
    confidence_from_p, degenerate_reason, p_value_for_r, pearson_r, skipped_result, Sense,
    SignalThresholds,
};

const NAME: &str = "pearson";
const DESCRIPTION: &str = "Linear correlation (Pearson r, two-tailed t-test)";

pub struct PearsonSense;

impl Sense for PearsonSense {
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
        let r = pearson_r(x, y);
        let p_value = p_value_for_r(r, n);

        let mut metadata = BTreeMap::new();
        metadata.insert("sample_size".into(), serde_json::json!(n));
        metadata.insert("df".into(), serde_json::json!(n - 2));
        if r.abs() >= 1.0 - 1e-12 {
            metadata.insert("perfect_correlation".into(), serde_json::json!(true));
        }

        SenseResult {
            sense_name: NAME.to_string(),
            effect_size: r,
            p_value,
            confidence: confidence_from_p(p_value),
            signal: SignalThresholds::PEARSON.classify(r),
            description: format!(
                "r={r:.3} between {} and {} over {n} samples",
                variable_keys.0, variable_keys.1
            ),
            metadata,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Signal;

    #[test]
    fn linear_relationship_is_very_strong() {
        let x: Vec<f64> = (0..100).map(|i| i as f64).collect();
        let y: Vec<f64> = x.iter().map(|v| 2.0 * v + 1.0).collect();
        let result = PearsonSense.analyze(&x, &y, ("a", "b"), None);
        assert!(result.effect_size > 0.999);
        assert!(result.p_value < 0.001);
        assert_eq!(result.signal, Signal::VeryStrong);
        assert!(!result.is_skipped());
        assert_eq!(
            result.metadata.get("perfect_correlation"),
            Some(&serde_json::json!(true))
        );
    }

    #[test]
    fn anticorrelation_keeps_sign() {
        let x: Vec<f64> = (0..50).map(|i| i as f64).collect();
        let y: Vec<f64> = x.iter().map(|v| -v).collect();
        let result = PearsonSense.analyze(&x, &y, ("a", "b"), None);
        assert!(result.effect_size < -0.999);
        assert_eq!(result.signal, Signal::VeryStrong);
    }

    #[test]
    fn zero_variance_is_skipped_not_error() {
        let x = vec![1.0; 20];
        let y: Vec<f64> = (0..20).map(|i| i as f64).collect();
        let result = PearsonSense.analyze(&x, &y, ("a", "b"), None);
        assert!(result.is_skipped());
        assert_eq!(result.effect_size, 0.0);
        assert_eq!(result.p_value, 1.0);
    }
}
