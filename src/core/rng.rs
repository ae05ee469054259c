//! Scoped deterministic RNG streams
//!
//! Every random draw in the pipeline comes from a stream scoped to a
//! `(purpose, key, seed)` triple. Streams are cheap to mint, so workers each
//! hold their own — a seeded stream is never shared across tasks.

use rand::rngs::StdRng;
use rand::SeedableRng;

use super::ids::derive_seed;

/// Mint a fresh deterministic stream for `(purpose, key, seed)`.
///
/// The same triple always yields the same stream; any component change yields
/// an unrelated one.
pub fn stream(purpose: &str, key: &str, seed: u64) -> StdRng {
    StdRng::seed_from_u64(derive_seed(purpose, key, seed))
}

/// Fisher–Yates shuffle driven by the supplied stream.
///
/// Kept explicit (rather than `SliceRandom::shuffle`) so the draw sequence is
/// pinned by this crate, not by rand's shuffle implementation details.
pub fn fisher_yates<T>(values: &mut [T], rng: &mut StdRng) {
    use rand::Rng;
    for i in (1..values.len()).rev() {
        let j = rng.gen_range(0..=i);
        values.swap(i, j);
    }
}
