// tests/common/mod.rs
// Scripted test doubles implementing the crate's capability traits.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;

use trend_digest::deliver::{BatchResult, DeliveryReport, Dispatcher};
use trend_digest::error::{FailureReason, SourceUnavailable, SummarizationFailed};
use trend_digest::model::{SourceKind, TrendingItem};
use trend_digest::render::RenderedReport;
use trend_digest::sources::{DynSource, TrendingSource};
use trend_digest::summarize::Summarizer;

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// Repository item with enough text to be summarized.
pub fn repo(id: &str, rank: u32) -> TrendingItem {
    let mut it = TrendingItem::new(SourceKind::Repo, format!("https://github.com/{id}"), id)
        .with_meta("description", format!("{id} does useful things."))
        .with_meta("url", format!("https://github.com/{id}"));
    it.rank = rank;
    it
}

pub fn paper(id: &str, rank: u32) -> TrendingItem {
    let mut it = TrendingItem::new(SourceKind::Paper, format!("arxiv:{id}"), format!("Paper {id}"))
        .with_meta("abstract", format!("Abstract of {id}."))
        .with_meta("arxiv_url", format!("https://arxiv.org/abs/{id}"));
    it.rank = rank;
    it
}

pub struct ScriptedSource {
    pub name: String,
    pub kind: SourceKind,
    pub items: Result<Vec<TrendingItem>, String>,
    pub delay: Duration,
    pub calls: AtomicU32,
}

impl ScriptedSource {
    pub fn ok(name: &str, kind: SourceKind, items: Vec<TrendingItem>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            kind,
            items: Ok(items),
            delay: Duration::ZERO,
            calls: AtomicU32::new(0),
        })
    }

    pub fn failing(name: &str, kind: SourceKind, reason: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            kind,
            items: Err(reason.into()),
            delay: Duration::ZERO,
            calls: AtomicU32::new(0),
        })
    }

    pub fn slow(name: &str, kind: SourceKind, items: Vec<TrendingItem>, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            kind,
            items: Ok(items),
            delay,
            calls: AtomicU32::new(0),
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TrendingSource for ScriptedSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> SourceKind {
        self.kind
    }

    async fn fetch(&self) -> Result<Vec<TrendingItem>, SourceUnavailable> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.items
            .clone()
            .map_err(|r| SourceUnavailable::new(&self.name, r))
    }
}

pub fn dyn_sources(sources: &[Arc<ScriptedSource>]) -> Vec<DynSource> {
    sources.iter().map(|s| s.clone() as DynSource).collect()
}

/// Summarizer answering from a per-identifier script; unscripted items succeed.
#[derive(Default)]
pub struct ScriptedSummarizer {
    script: Mutex<HashMap<String, VecDeque<Result<String, FailureReason>>>>,
    delays: HashMap<String, Duration>,
    every_call: Option<Duration>,
    condense: Option<Result<String, FailureReason>>,
    pub calls: AtomicU32,
    in_flight: AtomicU32,
    peak: AtomicU32,
}

impl ScriptedSummarizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(self, id: &str, answers: Vec<Result<&str, FailureReason>>) -> Self {
        self.script.lock().unwrap().insert(
            id.to_string(),
            answers
                .into_iter()
                .map(|a| a.map(str::to_string))
                .collect(),
        );
        self
    }

    pub fn delay(mut self, id: &str, d: Duration) -> Self {
        self.delays.insert(id.to_string(), d);
        self
    }

    /// Applies to items without their own delay.
    pub fn delay_all(mut self, d: Duration) -> Self {
        self.every_call = Some(d);
        self
    }

    pub fn condense_with(mut self, answer: Result<&str, FailureReason>) -> Self {
        self.condense = Some(answer.map(str::to_string));
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Most summarize calls seen running at the same time.
    pub fn peak(&self) -> u32 {
        self.peak.load(Ordering::SeqCst)
    }

    async fn answer(&self, item: &TrendingItem) -> Result<String, SummarizationFailed> {
        if let Some(d) = self.delays.get(&item.identifier).or(self.every_call.as_ref()) {
            tokio::time::sleep(*d).await;
        }
        let next = self
            .script
            .lock()
            .unwrap()
            .get_mut(&item.identifier)
            .and_then(|q| q.pop_front());
        match next {
            Some(Ok(text)) => Ok(text),
            Some(Err(reason)) => Err(SummarizationFailed::new(reason, "scripted failure")),
            None => Ok(format!("Summary of {}", item.title)),
        }
    }
}

#[async_trait]
impl Summarizer for ScriptedSummarizer {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn summarize(&self, item: &TrendingItem) -> Result<String, SummarizationFailed> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let out = self.answer(item).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        out
    }

    async fn condense(&self, digest: &str) -> Result<String, SummarizationFailed> {
        match &self.condense {
            Some(Ok(text)) => Ok(text.clone()),
            Some(Err(reason)) => Err(SummarizationFailed::new(*reason, "scripted failure")),
            None => Ok(format!("{} entries", digest.lines().count())),
        }
    }
}

/// Dispatcher recording what it was asked to send.
#[derive(Default)]
pub struct RecordingDispatcher {
    pub fail: bool,
    pub sent: Mutex<Vec<(NaiveDate, Vec<String>)>>,
}

#[async_trait]
impl Dispatcher for RecordingDispatcher {
    fn name(&self) -> &str {
        "recording"
    }

    async fn dispatch(&self, rendered: &RenderedReport, recipients: &[String]) -> DeliveryReport {
        self.sent
            .lock()
            .unwrap()
            .push((rendered.report_date, recipients.to_vec()));
        let batch = if self.fail {
            BatchResult::failed(recipients.to_vec(), "relay refused")
        } else {
            BatchResult::ok(recipients.to_vec())
        };
        DeliveryReport {
            batches: vec![batch],
        }
    }
}
