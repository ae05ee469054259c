//! Engine constants
//!
//! Central home for the guardrail and threshold constants so the values the
//! sweep, referee, and generators agree on live in one place.

/// Sweep aborts above this many variables.
pub const MAX_VARIABLES: usize = 2000;

/// Sweep aborts above this many candidate pairs.
pub const MAX_PAIRS: usize = 500_000;

/// Default sweep wall-clock ceiling in seconds.
pub const MAX_SWEEP_RUNTIME_SECS: u64 = 600;

/// Early-skip: per-side missing rate ceiling.
pub const MISSING_RATE_CEILING: f64 = 0.30;

/// Minimum rows where both sides are present.
pub const MIN_VALID_ROWS: usize = 3;

/// Below this variance a column is treated as constant.
pub const VARIANCE_FLOOR: f64 = 1e-10;

/// |r| within this of 1.0 earns a PERFECT_CORRELATION warning.
pub const PERFECT_CORRELATION_EPSILON: f64 = 1e-12;

/// Two-sided significance threshold used across the pipeline.
pub const SIGNIFICANCE_THRESHOLD: f64 = 0.05;

/// Referee permutation count bounds and default.
pub const MIN_NUM_SHUFFLES: usize = 1000;
pub const MAX_NUM_SHUFFLES: usize = 100_000;
pub const DEFAULT_NUM_SHUFFLES: usize = 1000;

/// Referee worker pool cap; a single worker is used below the small-job floor.
pub const REFEREE_POOL_SIZE: usize = 4;
pub const REFEREE_SINGLE_WORKER_BELOW: usize = 100;

/// Default hypothesis budget per run.
pub const DEFAULT_MAX_HYPOTHESES: usize = 5;

/// Discovery brief: blast radius BFS depth and the strong-edge floor.
pub const BLAST_RADIUS_DEPTH: usize = 3;
pub const BLAST_RADIUS_EFFECT_FLOOR: f64 = 0.3;

/// Discovery brief: silence detection parameters.
pub const SILENCE_DROP_THRESHOLD: f64 = 0.2;
pub const SILENT_EFFECT_FLOOR: f64 = 0.1;

/// Discovery brief: twin-segment similarity floor.
pub const TWIN_SIMILARITY_THRESHOLD: f64 = 0.75;

/// Fingerprint schema version; bump when canonical bytes change shape.
pub const RESOLVER_VERSION: &str = "resolver-v1";
