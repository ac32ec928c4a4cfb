// src/model.rs
//! Core data model: trending items, their summaries, and the daily report.
//!
//! All types are plain data. They are created once by the component that owns them
//! (adapter, assembler) and never mutated afterwards.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::FailureReason;

/// Source-specific fields, kept as a sorted map so serialization is stable.
pub type RawMetadata = BTreeMap<String, serde_json::Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Repo,
    Paper,
}

impl SourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SourceKind::Repo => "repo",
            SourceKind::Paper => "paper",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One discovered entity (repository or paper), as fetched from its source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendingItem {
    pub source_kind: SourceKind,
    /// Stable key, e.g. `https://github.com/owner/repo` or `arxiv:2508.11630`.
    pub identifier: String,
    pub title: String,
    #[serde(default)]
    pub raw_metadata: RawMetadata,
    /// 1-based position within its source.
    pub rank: u32,
}

impl TrendingItem {
    pub fn new(
        source_kind: SourceKind,
        identifier: impl Into<String>,
        title: impl Into<String>,
    ) -> Self {
        Self {
            source_kind,
            identifier: identifier.into(),
            title: title.into(),
            raw_metadata: RawMetadata::new(),
            rank: 0,
        }
    }

    pub fn with_meta(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.raw_metadata.insert(key.to_string(), value.into());
        self
    }

    /// String view of a metadata field; empty strings count as absent.
    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.raw_metadata
            .get(key)
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Best link for readers: explicit `url`, then arXiv, then the identifier itself.
    pub fn link(&self) -> &str {
        self.meta_str("url")
            .or_else(|| self.meta_str("arxiv_url"))
            .unwrap_or(&self.identifier)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SummaryStatus {
    Ok,
    Failed,
    Skipped,
}

impl fmt::Display for SummaryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SummaryStatus::Ok => "ok",
            SummaryStatus::Failed => "failed",
            SummaryStatus::Skipped => "skipped",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummarizedItem {
    #[serde(flatten)]
    pub item: TrendingItem,
    /// `None` unless `summary_status == Ok`.
    pub summary_text: Option<String>,
    pub summary_status: SummaryStatus,
    #[serde(default)]
    pub failure_reason: Option<FailureReason>,
    /// Summarizer calls made for this item (0 when skipped).
    #[serde(default)]
    pub attempts: u32,
}

impl SummarizedItem {
    pub fn ok(item: TrendingItem, text: String, attempts: u32) -> Self {
        Self {
            item,
            summary_text: Some(text),
            summary_status: SummaryStatus::Ok,
            failure_reason: None,
            attempts,
        }
    }

    pub fn failed(item: TrendingItem, reason: FailureReason, attempts: u32) -> Self {
        Self {
            item,
            summary_text: None,
            summary_status: SummaryStatus::Failed,
            failure_reason: Some(reason),
            attempts,
        }
    }

    pub fn skipped(item: TrendingItem) -> Self {
        Self {
            item,
            summary_text: None,
            summary_status: SummaryStatus::Skipped,
            failure_reason: None,
            attempts: 0,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.summary_status == SummaryStatus::Ok
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SectionStatus {
    Ok,
    Unavailable,
}

/// All items of one configured source, in rank order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub source: String,
    pub source_kind: SourceKind,
    pub status: SectionStatus,
    #[serde(default)]
    pub error: Option<String>,
    pub items: Vec<SummarizedItem>,
}

/// The day's artifact. At most one is produced per `report_date` per process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub report_date: NaiveDate,
    pub generated_at: DateTime<Utc>,
    pub partial: bool,
    #[serde(default)]
    pub tldr: Option<String>,
    pub sections: Vec<Section>,
}

impl Report {
    pub fn item_count(&self) -> usize {
        self.sections.iter().map(|s| s.items.len()).sum()
    }

    pub fn items(&self) -> impl Iterator<Item = &SummarizedItem> {
        self.sections.iter().flat_map(|s| s.items.iter())
    }

    pub fn unavailable_sources(&self) -> usize {
        self.sections
            .iter()
            .filter(|s| s.status == SectionStatus::Unavailable)
            .count()
    }

    /// True if any source failed or any item has no ok summary.
    pub fn derive_partial(sections: &[Section]) -> bool {
        sections.iter().any(|s| {
            s.status == SectionStatus::Unavailable || s.items.iter().any(|i| !i.is_ok())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str) -> TrendingItem {
        TrendingItem::new(SourceKind::Repo, id, id)
    }

    #[test]
    fn link_prefers_url_then_arxiv_then_identifier() {
        let a = item("x").with_meta("url", "https://a");
        assert_eq!(a.link(), "https://a");
        let b = item("arxiv:1").with_meta("arxiv_url", "https://arxiv.org/abs/1");
        assert_eq!(b.link(), "https://arxiv.org/abs/1");
        let c = item("plain").with_meta("url", "  ");
        assert_eq!(c.link(), "plain");
    }

    #[test]
    fn partial_is_derived_from_sections_and_items() {
        let ok = Section {
            source: "a".into(),
            source_kind: SourceKind::Repo,
            status: SectionStatus::Ok,
            error: None,
            items: vec![SummarizedItem::ok(item("1"), "s".into(), 1)],
        };
        assert!(!Report::derive_partial(std::slice::from_ref(&ok)));

        let mut skipped = ok.clone();
        skipped.items.push(SummarizedItem::skipped(item("2")));
        assert!(Report::derive_partial(&[skipped]));

        let down = Section {
            status: SectionStatus::Unavailable,
            error: Some("timeout".into()),
            items: vec![],
            ..ok.clone()
        };
        assert!(Report::derive_partial(&[ok, down]));
    }
}
