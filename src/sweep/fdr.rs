//! Benjamini–Hochberg false-discovery-rate correction
//!
//! Ranks are a deterministic function of the sorted (p_value, canonical pair
//! key) sequence, so worker arrival order never changes a q-value. The
//! correction is a pure function of the p-vector: applying it twice yields
//! the same q-vector.

/// One test entering the correction.
#[derive(Debug, Clone)]
pub struct FdrInput {
    /// Canonical pair key — the deterministic tiebreak.
    pub key: String,
    pub p_value: f64,
}

/// Rank and q-value assigned to one test.
#[derive(Debug, Clone, PartialEq)]
pub struct FdrOutput {
    pub key: String,
    pub rank: usize,
    pub q_value: f64,
}

/// Apply BH across the family: sort ascending by (p, key), assign
/// `q_i = min(1, p_i · m / rank_i)`, and floor each q at its own p so the
/// q ≥ p invariant survives rounding.
pub fn benjamini_hochberg(inputs: &[FdrInput]) -> Vec<FdrOutput> {
    let m = inputs.len();
    if m == 0 {
        return Vec::new();
    }

    let mut sorted: Vec<&FdrInput> = inputs.iter().collect();
    sorted.sort_by(|a, b| {
        a.p_value
            .partial_cmp(&b.p_value)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.key.cmp(&b.key))
    });

    sorted
        .into_iter()
        .enumerate()
        .map(|(i, input)| {
            let rank = i + 1;
            let q = (input.p_value * m as f64 / rank as f64).min(1.0);
            FdrOutput {
                key: input.key.clone(),
                rank,
                q_value: q.max(input.p_value),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs(ps: &[f64]) -> Vec<FdrInput> {
        ps.iter()
            .enumerate()
            .map(|(i, &p)| FdrInput {
                key: format!("k{i:03}"),
                p_value: p,
            })
            .collect()
    }

    #[test]
    fn evenly_spaced_p_values_all_get_q_point_one() {
        // p = 0.001, 0.002, …, 0.100 → q_i = (i·0.001)·100/i = 0.1 for all i
        let ps: Vec<f64> = (1..=100).map(|i| i as f64 * 0.001).collect();
        let out = benjamini_hochberg(&inputs(&ps));
        for o in &out {
            assert!((o.q_value - 0.1).abs() < 1e-12, "q={} at rank {}", o.q_value, o.rank);
        }
    }

    #[test]
    fn ranks_are_a_permutation_of_one_to_m() {
        let ps = vec![0.5, 0.01, 0.2, 0.01, 0.9];
        let out = benjamini_hochberg(&inputs(&ps));
        let mut ranks: Vec<usize> = out.iter().map(|o| o.rank).collect();
        ranks.sort_unstable();
        assert_eq!(ranks, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn ties_break_by_key_deterministically() {
        let tied = vec![
            FdrInput { key: "b".into(), p_value: 0.02 },
            FdrInput { key: "a".into(), p_value: 0.02 },
        ];
        let out = benjamini_hochberg(&tied);
        assert_eq!(out[0].key, "a");
        assert_eq!(out[0].rank, 1);
        assert_eq!(out[1].key, "b");
        assert_eq!(out[1].rank, 2);
    }

    #[test]
    fn q_never_exceeds_one_and_never_undercuts_p() {
        let ps = vec![0.9, 0.95, 0.99, 1.0];
        let out = benjamini_hochberg(&inputs(&ps));
        for o in &out {
            assert!(o.q_value <= 1.0);
        }
        // p=1.0 entry keeps q=1.0
        assert!((out.last().map(|o| o.q_value).unwrap_or(0.0) - 1.0).abs() < 1e-12);
        // every q floors at its own p
        assert!(out.iter().all(|o| o.q_value >= 0.9));
    }

    #[test]
    fn correction_is_idempotent_on_the_p_vector() {
        let ps = vec![0.001, 0.04, 0.2, 0.8];
        let first = benjamini_hochberg(&inputs(&ps));
        let second = benjamini_hochberg(&inputs(&ps));
        assert_eq!(first, second);
    }

    #[test]
    fn empty_family_yields_nothing() {
        assert!(benjamini_hochberg(&[]).is_empty());
    }
}
