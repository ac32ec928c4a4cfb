// src/telemetry.rs
//! Logging and metrics setup.

use anyhow::{Context, Result};
use clap::ValueEnum;
use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub const DEFAULT_LOG_FILTER: &str = "trend_digest=info,warn";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

/// Install the global subscriber. `RUST_LOG` wins over the default filter.
pub fn init_tracing(format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let registry = tracing_subscriber::registry().with(filter);
    let res = match format {
        LogFormat::Compact => registry.with(fmt::layer().compact()).try_init(),
        LogFormat::Json => registry.with(fmt::layer().json()).try_init(),
    };
    if res.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

/// Install the Prometheus recorder; the handle renders `/metrics`.
pub fn install_prometheus() -> Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .context("prometheus: install recorder")?;
    ensure_metrics_described();
    Ok(handle)
}

/// One-time metrics registration (so series show up on /metrics).
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "digest_source_fetch_total",
            "Source fetches by source and outcome (ok | unavailable)."
        );
        describe_histogram!("digest_source_fetch_ms", "Source fetch time in milliseconds.");
        describe_counter!(
            "digest_summaries_total",
            "Item summaries by final status (ok | failed | skipped)."
        );
        describe_counter!(
            "digest_summary_retries_total",
            "Summarizer calls retried after a transient failure."
        );
        describe_counter!("digest_items_total", "Items included in produced reports.");
        describe_counter!(
            "digest_ticks_total",
            "Scheduler ticks by outcome (completed | skipped | empty | failed)."
        );
        describe_counter!(
            "digest_delivery_batches_total",
            "Delivery batches by outcome (ok | failed)."
        );
        describe_gauge!(
            "scheduler_wait_remaining_seconds",
            "Seconds until the next scheduled run."
        );
        describe_gauge!("scheduler_next_run_ts", "Unix ts of the next scheduled run.");
    });
}
