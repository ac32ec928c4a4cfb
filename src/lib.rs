// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod assemble;
pub mod config;
pub mod deliver;
pub mod error;
pub mod model;
pub mod pipeline;
pub mod render;
pub mod scheduler;
pub mod sources;
pub mod status;
pub mod summarize;
pub mod telemetry;

use std::sync::Arc;

use anyhow::Context;

pub use crate::assemble::{Assembly, ReportAssembler, RunLedger};
pub use crate::config::AppConfig;
pub use crate::model::{Report, SummarizedItem, TrendingItem};
pub use crate::pipeline::{Pipeline, TickOutcome};

/// Wire sources, summarizer and dispatcher from configuration.
pub fn build_pipeline(cfg: &AppConfig, ledger: Arc<RunLedger>) -> anyhow::Result<Pipeline> {
    let sources = sources::build_sources(&cfg.sources).context("building source adapters")?;
    let summarizer =
        summarize::from_config(&cfg.summarizer).context("building summarizer client")?;
    let dispatcher = deliver::from_config(&cfg.delivery).context("building dispatcher")?;

    let settings = assemble::AssemblySettings {
        pool_size: cfg.pipeline.pool_size,
        source_timeout: cfg.pipeline.source_timeout(),
        retry: summarize::RetryPolicy::from_config(&cfg.summarizer),
        tldr: cfg.pipeline.tldr,
    };
    tracing::info!(
        target: "pipeline",
        sources = sources.len(),
        summarizer = summarizer.as_ref().map(|s| s.name()).unwrap_or("disabled"),
        dispatcher = dispatcher.name(),
        pool_size = settings.pool_size,
        "pipeline ready"
    );

    let assembler = ReportAssembler::new(sources, summarizer, settings, ledger);
    Ok(Pipeline::new(
        assembler,
        dispatcher,
        cfg.delivery.recipients.clone(),
        cfg.pipeline.output_dir.clone(),
    ))
}
