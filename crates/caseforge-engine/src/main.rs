//! Generation engine entry point for Caseforge.
//!
//! Reads a run input (or a saved accumulator with `startFromStep`),
//! wires the model client, prompt engine, and stores from
//! `caseforge.yaml`, and drives the pipeline to a finalized case.
//!
//! # Architecture
//!
//! ```text
//! input JSON --> Orchestrator --> [S1..S12] --> cases (PostgreSQL)
//!                     |
//!                     +-- checkpoints --> drafts (Dragonfly)
//! ```
//!
//! # Usage
//!
//! ```text
//! caseforge-engine run <input.json>
//! caseforge-engine resume <state.json>
//! ```

mod config;

use std::path::Path;

use anyhow::{Context, bail};
use caseforge_llm::{ModelClient, PromptEngine};
use caseforge_pipeline::Orchestrator;
use caseforge_store::{
    CaseStore, DraftStore, DragonflyPool, MemoryCaseStore, MemoryDraftStore, PostgresConfig,
    PostgresPool,
};
use caseforge_types::{GenerationInput, ResumeRequest};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::EngineConfig;

/// Application entry point.
///
/// Initializes logging, loads configuration, connects the stores,
/// builds the orchestrator, and dispatches the requested command.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    let mut args = std::env::args().skip(1);
    let command = args.next().unwrap_or_default();
    let input_path = args.next().unwrap_or_default();
    if input_path.is_empty() || !matches!(command.as_str(), "run" | "resume") {
        bail!("usage: caseforge-engine <run|resume> <input.json>");
    }

    let config_path =
        std::env::var("CASEFORGE_CONFIG").unwrap_or_else(|_| String::from("caseforge.yaml"));
    let config = EngineConfig::load_or_default(Path::new(&config_path))
        .with_context(|| format!("loading config from {config_path}"))?;
    info!(
        config = config_path,
        default_alias = config.llm.default_alias,
        drafts = config.stores.drafts,
        cases = config.stores.cases,
        "configuration loaded"
    );

    let model = ModelClient::new(config.client_config()?)?;
    let prompts = match &config.llm.templates_dir {
        Some(dir) => {
            info!(templates_dir = dir, "loading prompt templates from disk");
            PromptEngine::from_dir(dir)?
        }
        None => PromptEngine::embedded()?,
    };

    let drafts = match config.stores.drafts.as_str() {
        "dragonfly" => {
            DraftStore::Dragonfly(DragonflyPool::connect(&config.stores.dragonfly_url).await?)
        }
        "memory" => DraftStore::Memory(MemoryDraftStore::new()),
        other => bail!("unknown draft store backend: {other}"),
    };
    let cases = match config.stores.cases.as_str() {
        "postgres" => {
            let pool =
                PostgresPool::connect(&PostgresConfig::new(&config.stores.postgres_url)).await?;
            pool.run_migrations().await?;
            CaseStore::Postgres(pool)
        }
        "memory" => CaseStore::Memory(MemoryCaseStore::new()),
        other => bail!("unknown case store backend: {other}"),
    };

    let orchestrator = Orchestrator::new(model, prompts, drafts, cases)
        .with_retry_budget(config.pipeline.retry_budget);

    let raw = std::fs::read_to_string(&input_path)
        .with_context(|| format!("reading {input_path}"))?;

    let case = match command.as_str() {
        "run" => {
            let input: GenerationInput =
                serde_json::from_str(&raw).context("parsing run input")?;
            info!(case_date = %input.case_date, "starting run");
            orchestrator.run(input).await?
        }
        "resume" => {
            let request: ResumeRequest =
                serde_json::from_str(&raw).context("parsing resume request")?;
            info!(start_from = %request.start_from_step, "resuming run");
            orchestrator.resume(request).await?
        }
        _ => bail!("usage: caseforge-engine <run|resume> <input.json>"),
    };

    let summary = orchestrator.cost_summary();
    info!(
        case_date = %case.case_date,
        title = case.title,
        model_calls = summary.total_calls,
        estimated_cost_usd = %summary.total_estimated_cost,
        "case generated"
    );

    println!("{}", serde_json::to_string_pretty(&case)?);
    Ok(())
}
