//! Engine error taxonomy
//!
//! Errors are classified by *kind*, not by origin module: the CLI prints the
//! kind tag as the first token of its failure line, and downstream tooling
//! dispatches on it. Non-fatal conditions (insufficient data, dropped LLM
//! candidates) become audit artifacts instead of errors.

use thiserror::Error;

/// Pipeline-wide error type.
///
/// The `kind_tag` of each variant is stable; callers match on it across
/// releases.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Bad identifier, empty variable key, unresolvable key. Never retried.
    #[error("validation: {0}")]
    Validation(String),

    /// N < 3, both sides highly missing, zero variance. Normally surfaced as
    /// a skipped-relationship artifact; this variant exists for callers that
    /// have no artifact to attach the condition to.
    #[error("insufficient_data: {0}")]
    InsufficientData(String),

    /// Too many variables or pairs, or a runtime ceiling was exceeded.
    /// Aborts the sweep with a manifest recording the cause.
    #[error("resource_limit: {0}")]
    ResourceLimit(String),

    /// A row timestamp past the snapshot cutoff was detected during
    /// resolution. Always fatal.
    #[error("leakage: {0}")]
    Leakage(String),

    /// Transport error, non-2xx status, JSON decode failure, or timeout on
    /// the LLM path. Recovered via heuristic fallback when enabled.
    #[error("llm_failed: {0}")]
    LlmFailed(String),

    /// Replay fingerprint mismatch, or a content-addressed re-write with
    /// differing bytes. Always fatal.
    #[error("determinism: {0}")]
    Determinism(String),

    /// Ledger backend failure (sled I/O, serialization).
    #[error("storage: {0}")]
    Storage(String),
}

impl EngineError {
    /// Stable machine-readable tag, printed as the first token of CLI
    /// failure lines.
    pub fn kind_tag(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "validation",
            EngineError::InsufficientData(_) => "insufficient_data",
            EngineError::ResourceLimit(_) => "resource_limit",
            EngineError::Leakage(_) => "leakage",
            EngineError::LlmFailed(_) => "llm_failed",
            EngineError::Determinism(_) => "determinism",
            EngineError::Storage(_) => "storage",
        }
    }

    /// Usage/validation errors exit with code 2; everything else is a
    /// pipeline failure (exit 1).
    pub fn exit_code(&self) -> i32 {
        match self {
            EngineError::Validation(_) => 2,
            _ => 1,
        }
    }
}

impl From<sled::Error> for EngineError {
    fn from(err: sled::Error) -> Self {
        EngineError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Storage(err.to_string())
    }
}

/// Convenience alias used throughout the engine.
pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_tag_is_first_token_of_display() {
        let err = EngineError::Leakage("row 17 past cutoff".into());
        let rendered = err.to_string();
        assert!(rendered.starts_with("leakage:"));
        assert_eq!(err.kind_tag(), "leakage");
    }

    #[test]
    fn validation_exits_with_usage_code() {
        assert_eq!(EngineError::Validation("empty key".into()).exit_code(), 2);
        assert_eq!(EngineError::Determinism("mismatch".into()).exit_code(), 1);
    }
}
