//! Configuration — environment-driven, no config files
//!
//! Two config surfaces: `EngineConfig` for sweep/referee budgets and
//! `LlmConfig` for the generator's LLM path. Both read the environment once
//! at startup (`from_env`) and are passed down as plain values; nothing here
//! is a process-wide cache.
//!
//! # Environment Variables
//!
//! - `GENERATOR_MODE`: `heuristic` (default) or `llm`
//! - `LLM_API_KEY`: bearer token for the chat endpoint
//! - `LLM_MODEL`: model name (default `gpt-4o-mini`)
//! - `LLM_BASE_URL`: OpenAI-compatible base (default `https://api.openai.com/v1`)
//! - `LLM_TEMPERATURE`: sampling temperature (default 0.2)
//! - `LLM_MAX_TOKENS`: completion budget (default 2000)
//! - `LLM_TIMEOUT_SECS`: wall-clock per call (default 60)
//! - `LLM_FALLBACK_TO_HEURISTIC`: `true` (default) to degrade instead of fail
//! - `SWEEP_MAX_RUNTIME_SECS`: sweep ceiling (default 600)
//! - `NUM_SHUFFLES`: referee permutation count (default 1000, clamped)

pub mod defaults;

use std::time::Duration;

use crate::core::GeneratorType;

/// Budgets and toggles for the statistical layers.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub max_variables: usize,
    pub max_pairs: usize,
    pub max_sweep_runtime: Duration,
    /// Also run Spearman as a primary test on numeric pairs.
    pub run_spearman: bool,
    pub num_shuffles: usize,
    /// Sweep worker pool size; defaults to available parallelism.
    pub sweep_workers: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_variables: defaults::MAX_VARIABLES,
            max_pairs: defaults::MAX_PAIRS,
            max_sweep_runtime: Duration::from_secs(defaults::MAX_SWEEP_RUNTIME_SECS),
            run_spearman: false,
            num_shuffles: defaults::DEFAULT_NUM_SHUFFLES,
            sweep_workers: std::thread::available_parallelism().map_or(4, usize::from),
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(secs) = env_parse::<u64>("SWEEP_MAX_RUNTIME_SECS") {
            config.max_sweep_runtime = Duration::from_secs(secs);
        }
        if let Some(n) = env_parse::<usize>("NUM_SHUFFLES") {
            config.num_shuffles = n.clamp(defaults::MIN_NUM_SHUFFLES, defaults::MAX_NUM_SHUFFLES);
        }
        config
    }
}

/// LLM generator settings.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub mode: GeneratorType,
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
    pub temperature: f64,
    pub max_tokens: u32,
    pub timeout: Duration,
    pub fallback_to_heuristic: bool,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            mode: GeneratorType::Heuristic,
            api_key: None,
            model: "gpt-4o-mini".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            temperature: 0.2,
            max_tokens: 2000,
            timeout: Duration::from_secs(60),
            fallback_to_heuristic: true,
        }
    }
}

impl LlmConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(mode) = std::env::var("GENERATOR_MODE") {
            if mode.eq_ignore_ascii_case("llm") {
                config.mode = GeneratorType::Llm;
            }
        }
        if let Ok(key) = std::env::var("LLM_API_KEY") {
            if !key.is_empty() {
                config.api_key = Some(key);
            }
        }
        if let Ok(model) = std::env::var("LLM_MODEL") {
            if !model.is_empty() {
                config.model = model;
            }
        }
        if let Ok(url) = std::env::var("LLM_BASE_URL") {
            if !url.is_empty() {
                config.base_url = url.trim_end_matches('/').to_string();
            }
        }
        if let Some(t) = env_parse::<f64>("LLM_TEMPERATURE") {
            config.temperature = t;
        }
        if let Some(tokens) = env_parse::<u32>("LLM_MAX_TOKENS") {
            config.max_tokens = tokens;
        }
        if let Some(secs) = env_parse::<u64>("LLM_TIMEOUT_SECS") {
            config.timeout = Duration::from_secs(secs);
        }
        if let Ok(fallback) = std::env::var("LLM_FALLBACK_TO_HEURISTIC") {
            config.fallback_to_heuristic = !fallback.eq_ignore_ascii_case("false");
        }
        config
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.parse().ok())
}
