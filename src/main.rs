//! Hypoforge CLI — deterministic causal-discovery pipeline
//!
//! # Usage
//!
//! ```bash
//! # Probe a data file before analysis
//! hypoforge readiness sales-export data/sales.csv --detailed
//!
//! # Resolve a snapshot (leakage-checked) for a set of variables
//! hypoforge resolve 2024-06-01T00:00:00Z revenue ad_spend --dataset-view data/sales.csv
//!
//! # Layer 0 only: pairwise sweep with FDR correction
//! hypoforge sweep data/sales.csv --seed 42
//!
//! # Full pipeline: sweep → briefs → generation → permutation referee
//! hypoforge hypotheses data/sales.csv --seed 42 --max-hypotheses 5 --rigor standard
//! ```
//!
//! # Environment Variables
//!
//! - `GENERATOR_MODE`: `heuristic` (default) or `llm`
//! - `LLM_API_KEY`, `LLM_MODEL`, `LLM_BASE_URL`, `LLM_TEMPERATURE`,
//!   `LLM_MAX_TOKENS`, `LLM_FALLBACK_TO_HEURISTIC`
//! - `LEDGER_PATH`: sled ledger directory (default `./ledger`)
//! - `RUST_LOG`: log filter (default `info`)
//!
//! Exit codes: 0 success, 1 pipeline failure, 2 usage/validation error.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use hypoforge::config::{defaults, EngineConfig, LlmConfig};
use hypoforge::core::ArtifactPayload;
use hypoforge::pipeline::{PipelineOrchestrator, PipelineRequest};
use hypoforge::{
    dataset, snapshot, sweep, ArtifactStore, EngineError, RigorLevel, RunId, SledLedger,
};

#[derive(Parser, Debug)]
#[command(name = "hypoforge")]
#[command(about = "Deterministic causal-discovery pipeline")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Resolve a leakage-checked snapshot for the given variable keys
    Resolve {
        /// Snapshot instant, RFC3339 (e.g. 2024-06-01T00:00:00Z)
        snapshot_at: String,
        /// Variable keys to resolve (at least one)
        #[arg(required = true)]
        var_keys: Vec<String>,
        #[arg(long, default_value = "0")]
        seed: u64,
        /// Data file backing the dataset view
        #[arg(long, value_name = "FILE", default_value = "dataset.csv")]
        dataset_view: String,
        /// Cutoff lag in hours (cutoff = snapshot_at − lag)
        #[arg(long, default_value = "0")]
        lag_hours: i64,
    },

    /// Run the pairwise sweep (layer 0) and persist its artifacts
    Sweep {
        /// Matrix bundle: path to a CSV file
        matrix_bundle_id: String,
        #[arg(long, default_value = "0")]
        seed: u64,
    },

    /// Run the full pipeline: sweep → briefs → generation → referee
    Hypotheses {
        /// Matrix bundle: path to a CSV file
        matrix_bundle_id: String,
        #[arg(long, default_value = "0")]
        seed: u64,
        #[arg(long, default_value_t = defaults::DEFAULT_MAX_HYPOTHESES)]
        max_hypotheses: usize,
        /// Downstream validation budget: basic | standard | decision
        #[arg(long, default_value = "standard")]
        rigor: String,
    },

    /// Probe a data file's fitness for analysis
    Readiness {
        source_name: String,
        data_file: String,
        /// Print per-column detail
        #[arg(long)]
        detailed: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            // stable error-kind tag is the first token of the failure line
            match err.downcast_ref::<EngineError>() {
                Some(engine_err) => {
                    eprintln!("{engine_err}");
                    ExitCode::from(engine_err.exit_code() as u8)
                }
                None => {
                    eprintln!("pipeline: {err:#}");
                    ExitCode::FAILURE
                }
            }
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Resolve {
            snapshot_at,
            var_keys,
            seed,
            dataset_view,
            lag_hours,
        } => {
            let at: DateTime<Utc> = snapshot_at
                .parse()
                .map_err(|e| EngineError::Validation(format!("bad snapshot-at timestamp: {e}")))?;
            let bundle = dataset::load_csv(&dataset_view, "unresolved")?;
            let resolved = snapshot::resolve(&bundle, at, lag_hours, &var_keys)?;
            let run_id = RunId::derive(
                &resolved.snapshot_id,
                &resolved.cohort_hash,
                &resolved.registry_hash,
                seed,
            );
            println!(
                "resolve snapshot_id={} cutoff={} cohort_hash={} registry_hash={} keys={} run_id={}",
                resolved.snapshot_id,
                resolved.cutoff.to_rfc3339(),
                resolved.cohort_hash,
                resolved.registry_hash,
                resolved.resolved_keys.len(),
                run_id,
            );
            Ok(())
        }

        Command::Sweep {
            matrix_bundle_id,
            seed,
        } => {
            let snapshot_id = snapshot_id_for(&matrix_bundle_id);
            let bundle = Arc::new(dataset::load_csv(&matrix_bundle_id, &snapshot_id)?);
            let cohort_hash = snapshot::cohort_hash(&bundle);
            let registry_hash = bundle.registry_hash();
            let run_id = RunId::derive(&snapshot_id, &cohort_hash, &registry_hash, seed);

            let ledger = open_ledger()?;
            let outcome = sweep::run(
                Arc::clone(&bundle),
                run_id.clone(),
                snapshot_id,
                cohort_hash,
                sweep::StagePlan::default(),
                &EngineConfig::from_env(),
                CancellationToken::new(),
            )
            .await?;
            for artifact in outcome
                .relationships
                .iter()
                .chain(outcome.skipped.iter())
                .chain([&outcome.family, &outcome.manifest])
            {
                ledger.store(artifact)?;
            }
            ledger.flush()?;

            let ArtifactPayload::SweepManifest(m) = &outcome.manifest.payload else {
                unreachable!("sweep always emits a manifest");
            };
            println!(
                "layer0 family={} tested={} skipped={} pairs={} runtime_ms={}",
                outcome.family_id, m.successful_tests, m.skipped_tests, m.total_pairs, m.runtime_ms
            );
            println!("fingerprint {}", m.fingerprint);
            Ok(())
        }

        Command::Hypotheses {
            matrix_bundle_id,
            seed,
            max_hypotheses,
            rigor,
        } => {
            let rigor = RigorLevel::parse(&rigor).ok_or_else(|| {
                EngineError::Validation(format!(
                    "rigor must be basic|standard|decision, got {rigor:?}"
                ))
            })?;
            let snapshot_id = snapshot_id_for(&matrix_bundle_id);
            let bundle = Arc::new(dataset::load_csv(&matrix_bundle_id, &snapshot_id)?);
            let cohort_hash = snapshot::cohort_hash(&bundle);

            let llm_config = LlmConfig::from_env();
            let generator_mode = llm_config.mode;
            let orchestrator = PipelineOrchestrator::new(EngineConfig::from_env(), llm_config);
            let ledger = open_ledger()?;

            let outcome = orchestrator
                .run(
                    PipelineRequest {
                        snapshot_id,
                        cohort_hash,
                        bundle,
                        rigor,
                        max_hypotheses,
                        seed,
                        generator_mode,
                    },
                    &ledger,
                    CancellationToken::new(),
                )
                .await?;
            ledger.flush()?;

            let m = &outcome.manifest;
            println!(
                "layer0 relationships={} skipped={}",
                m.relationships, m.skipped_relationships
            );
            println!(
                "layer1 hypotheses={} generator={:?} briefs={}",
                m.hypotheses, m.generator_mode, m.briefs
            );
            println!(
                "layer2 validated={} rejected={}",
                m.verdicts_validated, m.verdicts_rejected
            );
            for verdict in &outcome.verdicts {
                if let ArtifactPayload::Verdict(v) = &verdict.payload {
                    println!(
                        "verdict {} status={:?} reason={} p={:.4} effect={:.4}",
                        v.hypothesis_id, v.status, v.reason, v.p_value, v.effect_size
                    );
                }
            }
            println!("fingerprint {}", outcome.fingerprint);
            Ok(())
        }

        Command::Readiness {
            source_name,
            data_file,
            detailed,
        } => {
            let report = dataset::assess_readiness(&data_file, &source_name)?;
            println!("readiness {}", report.summary());
            if detailed {
                for col in &report.columns {
                    println!(
                        "  column={} type={} missing={:.2} distinct={} admissible={}{}",
                        col.key,
                        col.inferred_type.as_str(),
                        col.missing_rate,
                        col.distinct_values,
                        col.admissible,
                        if col.notes.is_empty() {
                            String::new()
                        } else {
                            format!(" notes={}", col.notes.join("; "))
                        }
                    );
                }
            }
            info!(source = %source_name, admissible = report.admissible_columns, "readiness probe complete");
            Ok(())
        }
    }
}

/// Sled ledger at `LEDGER_PATH` (default `./ledger`).
fn open_ledger() -> anyhow::Result<SledLedger> {
    let path = std::env::var("LEDGER_PATH").unwrap_or_else(|_| "./ledger".to_string());
    SledLedger::open(&path).with_context(|| format!("opening ledger at {path}"))
}

/// Snapshot identity for a file-backed bundle: stem of the path.
fn snapshot_id_for(bundle_path: &str) -> String {
    let stem = std::path::Path::new(bundle_path)
        .file_stem()
        .map_or_else(|| bundle_path.to_string(), |s| s.to_string_lossy().into_owned());
    format!("snap-{stem}")
}
