// src/assemble.rs
//! Report assembly: fetch every source, summarize every item, build one Report.
//!
//! Sources run concurrently and fail independently. Summaries run through a
//! bounded pool; each result lands in the slot of the item that produced it,
//! so the final order is always source order, then rank order.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use futures::stream::{self, StreamExt};
use metrics::counter;
use serde::Serialize;

use crate::error::EmptyReport;
use crate::model::{Report, Section, SectionStatus, SummarizedItem, TrendingItem};
use crate::sources::{fetch_all, DynSource};
use crate::summarize::{source_text, summarize_with_retry, with_retry, DynSummarizer, RetryPolicy};

// ---------- run ledger ----------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DayState {
    InFlight,
    Generated,
}

/// Which report dates this process has produced (or is producing).
///
/// Lives exactly as long as the process: nothing is persisted, a restart
/// starts empty. Shared by every trigger path (timer and manual).
#[derive(Debug, Default)]
pub struct RunLedger {
    days: Mutex<HashMap<NaiveDate, DayState>>,
}

impl RunLedger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn days(&self) -> std::sync::MutexGuard<'_, HashMap<NaiveDate, DayState>> {
        self.days.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim `date` for generation. Fails with the current state when the date
    /// is already in flight or generated.
    pub fn try_claim(self: &Arc<Self>, date: NaiveDate) -> Result<ClaimGuard, DayState> {
        let mut days = self.days();
        if let Some(state) = days.get(&date) {
            return Err(*state);
        }
        days.insert(date, DayState::InFlight);
        Ok(ClaimGuard {
            ledger: Arc::clone(self),
            date,
            committed: false,
        })
    }

    pub fn state(&self, date: NaiveDate) -> Option<DayState> {
        self.days().get(&date).copied()
    }

    /// Forget a generated date so a later trigger may regenerate it.
    /// In-flight claims are left alone. Returns whether anything was removed.
    pub fn release(&self, date: NaiveDate) -> bool {
        let mut days = self.days();
        if days.get(&date) == Some(&DayState::Generated) {
            days.remove(&date);
            true
        } else {
            false
        }
    }
}

/// An in-flight claim. Dropping it without `commit` frees the date again.
#[derive(Debug)]
pub struct ClaimGuard {
    ledger: Arc<RunLedger>,
    date: NaiveDate,
    committed: bool,
}

impl ClaimGuard {
    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn commit(mut self) {
        self.ledger.days().insert(self.date, DayState::Generated);
        self.committed = true;
    }
}

impl Drop for ClaimGuard {
    fn drop(&mut self) {
        if !self.committed {
            self.ledger.days().remove(&self.date);
        }
    }
}

// ---------- assembler ----------

#[derive(Debug, Clone)]
pub struct AssemblySettings {
    /// Max summarizer calls in flight.
    pub pool_size: usize,
    pub source_timeout: Duration,
    pub retry: RetryPolicy,
    pub tldr: bool,
}

impl Default for AssemblySettings {
    fn default() -> Self {
        Self {
            pool_size: 4,
            source_timeout: Duration::from_secs(120),
            retry: RetryPolicy::default(),
            tldr: true,
        }
    }
}

#[derive(Debug)]
pub enum Assembly {
    Produced(Report),
    /// Date already claimed in this process; nothing was done.
    Skipped(DayState),
}

pub struct ReportAssembler {
    sources: Vec<DynSource>,
    summarizer: Option<DynSummarizer>,
    settings: AssemblySettings,
    ledger: Arc<RunLedger>,
}

impl ReportAssembler {
    pub fn new(
        sources: Vec<DynSource>,
        summarizer: Option<DynSummarizer>,
        settings: AssemblySettings,
        ledger: Arc<RunLedger>,
    ) -> Self {
        Self {
            sources,
            summarizer,
            settings,
            ledger,
        }
    }

    pub fn ledger(&self) -> &Arc<RunLedger> {
        &self.ledger
    }

    pub async fn assemble(&self, date: NaiveDate) -> Result<Assembly, EmptyReport> {
        let claim = match self.ledger.try_claim(date) {
            Ok(c) => c,
            Err(state) => {
                tracing::info!(target: "assemble", %date, ?state, "report already claimed for date, skipping");
                return Ok(Assembly::Skipped(state));
            }
        };

        let outcomes = fetch_all(&self.sources, self.settings.source_timeout).await;
        let total_sources = outcomes.len();
        let failed_sources = outcomes.iter().filter(|o| o.result.is_err()).count();
        let total_items: usize = outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().ok())
            .map(Vec::len)
            .sum();
        if total_items == 0 {
            // `claim` drops here and frees the date.
            return Err(EmptyReport {
                date,
                failed_sources,
                total_sources,
            });
        }

        // Section shells in source order, plus a flat work list in (source, rank) order.
        let mut sections = Vec::with_capacity(total_sources);
        let mut work: Vec<(usize, TrendingItem)> = Vec::with_capacity(total_items);
        for (si, outcome) in outcomes.into_iter().enumerate() {
            let (status, error, items) = match outcome.result {
                Ok(items) => (SectionStatus::Ok, None, items),
                Err(e) => (SectionStatus::Unavailable, Some(e.reason), Vec::new()),
            };
            work.extend(items.into_iter().map(|it| (si, it)));
            sections.push(Section {
                source: outcome.name,
                source_kind: outcome.kind,
                status,
                error,
                items: Vec::new(),
            });
        }

        let slots = self.summarize_all(work).await;
        for (si, summarized) in slots.into_iter().flatten() {
            sections[si].items.push(summarized);
        }

        let tldr = self.tldr(&sections).await;
        let report = Report {
            report_date: date,
            generated_at: Utc::now(),
            partial: Report::derive_partial(&sections),
            tldr,
            sections,
        };

        counter!("digest_items_total").increment(report.item_count() as u64);
        tracing::info!(
            target: "assemble",
            %date,
            items = report.item_count(),
            unavailable_sources = report.unavailable_sources(),
            partial = report.partial,
            "report assembled"
        );
        claim.commit();
        Ok(Assembly::Produced(report))
    }

    /// One write-once slot per work item, filled in whatever order calls finish.
    async fn summarize_all(
        &self,
        work: Vec<(usize, TrendingItem)>,
    ) -> Vec<Option<(usize, SummarizedItem)>> {
        let mut slots: Vec<Option<(usize, SummarizedItem)>> = Vec::new();
        slots.resize_with(work.len(), || None);

        let pool = self.settings.pool_size.max(1);
        let mut results = stream::iter(work.into_iter().enumerate())
            .map(|(idx, (si, item))| async move { (idx, si, self.summarize_one(item).await) })
            .buffer_unordered(pool);

        while let Some((idx, si, summarized)) = results.next().await {
            debug_assert!(slots[idx].is_none(), "slot {idx} written twice");
            slots[idx] = Some((si, summarized));
        }
        slots
    }

    async fn summarize_one(&self, item: TrendingItem) -> SummarizedItem {
        let Some(summarizer) = self.summarizer.as_deref() else {
            counter!("digest_summaries_total", "status" => "skipped").increment(1);
            return SummarizedItem::skipped(item);
        };
        if source_text(&item).is_none() {
            tracing::debug!(target: "assemble", id = %item.identifier, "no text to summarize");
            counter!("digest_summaries_total", "status" => "skipped").increment(1);
            return SummarizedItem::skipped(item);
        }

        let attempted = summarize_with_retry(summarizer, &item, &self.settings.retry).await;
        match attempted.result {
            Ok(text) => {
                counter!("digest_summaries_total", "status" => "ok").increment(1);
                SummarizedItem::ok(item, text, attempted.attempts)
            }
            Err(e) => {
                counter!("digest_summaries_total", "status" => "failed").increment(1);
                tracing::warn!(
                    target: "assemble",
                    id = %item.identifier,
                    reason = %e.reason,
                    attempts = attempted.attempts,
                    error = %e.detail,
                    "summary failed"
                );
                SummarizedItem::failed(item, e.reason, attempted.attempts)
            }
        }
    }

    /// Overview of all successful summaries. Failure only loses the overview.
    async fn tldr(&self, sections: &[Section]) -> Option<String> {
        if !self.settings.tldr {
            return None;
        }
        let summarizer = self.summarizer.as_deref()?;
        let digest = tldr_input(sections)?;
        let digest = digest.as_str();
        let attempted =
            with_retry(&self.settings.retry, "tldr", move || summarizer.condense(digest)).await;
        match attempted.result {
            Ok(text) => Some(text),
            Err(e) => {
                tracing::warn!(target: "assemble", reason = %e.reason, error = %e.detail, "tl;dr not generated");
                None
            }
        }
    }
}

/// Numbered "title: summary" list of every ok item, `None` when there is none.
fn tldr_input(sections: &[Section]) -> Option<String> {
    let lines: Vec<String> = sections
        .iter()
        .flat_map(|s| s.items.iter())
        .filter(|i| i.is_ok())
        .filter_map(|i| i.summary_text.as_deref().map(|t| (i, t)))
        .enumerate()
        .map(|(n, (i, t))| format!("{}. {}: {}", n + 1, i.item.title, t))
        .collect();
    (!lines.is_empty()).then(|| lines.join("\n"))
}
