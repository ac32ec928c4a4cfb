// src/pipeline.rs
//! One tick: assemble -> render -> write artifacts -> dispatch.
//!
//! Every failure is contained at the tick: the outcome is returned, logged
//! and counted, never propagated. Delivery problems leave the artifacts in
//! place and still count as a completed tick.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Serialize;

use crate::assemble::{Assembly, DayState, ReportAssembler};
use crate::deliver::DynDispatcher;
use crate::error::TickError;
use crate::render::{render, write_artifacts};
use crate::scheduler::Trigger;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TickOutcome {
    Completed {
        date: NaiveDate,
        items: usize,
        partial: bool,
        delivered: bool,
        artifacts: Vec<PathBuf>,
    },
    /// The date was already generated (or in flight) in this process.
    Skipped { date: NaiveDate, state: DayState },
    /// Zero items across all sources.
    Empty {
        date: NaiveDate,
        failed_sources: usize,
        total_sources: usize,
    },
    Failed { date: NaiveDate, error: String },
}

impl TickOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            TickOutcome::Completed { .. } => "completed",
            TickOutcome::Skipped { .. } => "skipped",
            TickOutcome::Empty { .. } => "empty",
            TickOutcome::Failed { .. } => "failed",
        }
    }

    pub fn date(&self) -> NaiveDate {
        match self {
            TickOutcome::Completed { date, .. }
            | TickOutcome::Skipped { date, .. }
            | TickOutcome::Empty { date, .. }
            | TickOutcome::Failed { date, .. } => *date,
        }
    }
}

pub struct Pipeline {
    assembler: ReportAssembler,
    dispatcher: DynDispatcher,
    recipients: Vec<String>,
    output_dir: PathBuf,
}

impl Pipeline {
    pub fn new(
        assembler: ReportAssembler,
        dispatcher: DynDispatcher,
        recipients: Vec<String>,
        output_dir: PathBuf,
    ) -> Self {
        Self {
            assembler,
            dispatcher,
            recipients,
            output_dir,
        }
    }

    pub async fn run(&self, date: NaiveDate) -> TickOutcome {
        match self.try_run(date).await {
            Ok(outcome) => outcome,
            Err(TickError::Empty(e)) => {
                tracing::warn!(target: "pipeline", %date, error = %e, "no report produced");
                TickOutcome::Empty {
                    date,
                    failed_sources: e.failed_sources,
                    total_sources: e.total_sources,
                }
            }
            Err(e) => {
                // Nothing usable reached disk: allow a later trigger to retry the date.
                self.assembler.ledger().release(date);
                tracing::error!(target: "pipeline", %date, error = %e, "tick failed");
                TickOutcome::Failed {
                    date,
                    error: e.to_string(),
                }
            }
        }
    }

    async fn try_run(&self, date: NaiveDate) -> Result<TickOutcome, TickError> {
        let report = match self.assembler.assemble(date).await? {
            Assembly::Produced(r) => r,
            Assembly::Skipped(state) => return Ok(TickOutcome::Skipped { date, state }),
        };

        let rendered = render(&report).map_err(|source| TickError::Render { date, source })?;
        let paths = write_artifacts(&self.output_dir, &rendered)
            .map_err(|source| TickError::Artifacts { date, source })?;
        tracing::info!(
            target: "pipeline",
            %date,
            json = %paths.structured.display(),
            markdown = %paths.human.display(),
            "artifacts written"
        );

        let delivered = if self.recipients.is_empty() {
            tracing::info!(target: "pipeline", %date, "no recipients configured, skipping delivery");
            false
        } else {
            let delivery = self.dispatcher.dispatch(&rendered, &self.recipients).await;
            match delivery.check() {
                Ok(()) => {
                    tracing::info!(
                        target: "pipeline",
                        %date,
                        dispatcher = self.dispatcher.name(),
                        recipients = delivery.delivered_recipients(),
                        "digest delivered"
                    );
                    true
                }
                Err(e) => {
                    for b in delivery.failed_batches() {
                        tracing::warn!(
                            target: "pipeline",
                            recipients = ?b.recipients,
                            error = b.error.as_deref().unwrap_or_default(),
                            "delivery batch failed"
                        );
                    }
                    tracing::warn!(target: "pipeline", %date, dispatcher = self.dispatcher.name(), error = %e, "delivery incomplete, artifacts retained");
                    false
                }
            }
        };

        Ok(TickOutcome::Completed {
            date,
            items: rendered.item_count,
            partial: rendered.partial,
            delivered,
            artifacts: vec![paths.structured, paths.human],
        })
    }
}

#[async_trait]
impl Trigger for Pipeline {
    async fn fire(&self, date: NaiveDate) -> TickOutcome {
        self.run(date).await
    }
}
