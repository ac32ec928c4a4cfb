//! trend-digest binary entrypoint.
//! Loads configuration, wires the pipeline and runs the scheduler until it
//! finishes (once) or a shutdown signal arrives (daily).

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use chrono::NaiveTime;
use clap::{Parser, Subcommand};

use trend_digest::config::{self, AppConfig, RunMode};
use trend_digest::scheduler::{shutdown_channel, Scheduler, ShutdownTrigger};
use trend_digest::status::{self, StatusBoard};
use trend_digest::telemetry::{self, LogFormat};
use trend_digest::{build_pipeline, RunLedger, TickOutcome};

#[derive(Debug, Parser)]
#[command(name = "trend-digest", version, about = "Daily digest of trending repositories and papers")]
struct Cli {
    /// Config file (default: $TREND_DIGEST_CONFIG, then config/trend_digest.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = LogFormat::Compact, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Generate and deliver today's digest now, then exit.
    Once,
    /// Run every day at a local time until stopped.
    Daily {
        /// Local time "HH:MM"; overrides [schedule].at
        #[arg(long, value_parser = parse_at)]
        at: Option<NaiveTime>,
        /// Also run once immediately at startup.
        #[arg(long)]
        run_now: bool,
    },
}

fn parse_at(s: &str) -> Result<NaiveTime, String> {
    config::parse_hhmm(s).map_err(|e| e.to_string())
}

async fn wait_for_signal(trigger: ShutdownTrigger) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "ctrl-c handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let term = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let term = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = term => {}
    }
    tracing::info!("shutdown signal received");
    trigger.trigger();
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // .env is optional; real env vars win.
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    telemetry::init_tracing(cli.log_format);

    let mut cfg = AppConfig::load(cli.config.as_deref()).context("loading configuration")?;
    match cli.command {
        Command::Once => cfg.schedule.mode = RunMode::Once,
        Command::Daily { at, run_now } => {
            cfg.schedule.mode = RunMode::Daily;
            if let Some(at) = at {
                cfg.schedule.at = at;
            }
            cfg.schedule.run_on_start |= run_now;
        }
    }

    let board = StatusBoard::new(cfg.schedule.mode);
    match cfg.status.listen_addr()? {
        Some(addr) => {
            let handle = telemetry::install_prometheus()?;
            let app = status::router(board.clone(), Some(handle));
            tokio::spawn(async move {
                if let Err(e) = status::serve(addr, app).await {
                    tracing::error!(error = %e, "status server stopped");
                }
            });
        }
        None => telemetry::ensure_metrics_described(),
    }

    let pipeline = Arc::new(build_pipeline(&cfg, RunLedger::new())?);
    let (trigger, shutdown) = shutdown_channel();
    tokio::spawn(wait_for_signal(trigger));

    let scheduler = Scheduler::new(cfg.schedule.clone(), pipeline, board.clone());
    scheduler.run(shutdown).await;

    // Once mode: a failed or empty run exits non-zero.
    let failed = cfg.schedule.mode == RunMode::Once
        && matches!(
            board.snapshot().last_tick.map(|t| t.outcome),
            Some(TickOutcome::Failed { .. } | TickOutcome::Empty { .. })
        );
    Ok(if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}
