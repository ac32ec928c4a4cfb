// src/sources/huggingface.rs
//! Hugging Face daily papers, enriched with abstracts from the arXiv Atom API.
//!
//! The daily list is scraped for a given date (yesterday by default, since the
//! page for "today" is still filling up). All arXiv details are fetched in one
//! batched query; if that query fails the papers are still returned, just without
//! abstracts.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{Days, Local, NaiveDate};
use once_cell::sync::Lazy;
use scraper::{Html, Selector};
use serde::Deserialize;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use url::Url;

use super::{get_text, normalize_text, rank_unique, TrendingSource};
use crate::config::HuggingfaceSourceConfig;
use crate::error::SourceUnavailable;
use crate::model::{SourceKind, TrendingItem};

static SEL_PAPER_LINK: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"h3 a[href^="/papers/"]"#).unwrap());

#[derive(Debug, Clone, PartialEq)]
pub struct PaperRow {
    pub arxiv_id: String,
    pub title: String,
    pub hf_url: String,
}

/// Parse the daily papers page. Links are resolved against `base_url` (mirror aware).
pub fn parse_daily_papers(html: &str, base_url: &str) -> Vec<PaperRow> {
    let base = Url::parse(base_url).ok();
    let doc = Html::parse_document(html);
    let mut out = Vec::new();
    for a in doc.select(&SEL_PAPER_LINK) {
        let Some(href) = a.value().attr("href") else {
            continue;
        };
        let arxiv_id = href
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_string();
        let title = normalize_text(&a.text().collect::<String>());
        if arxiv_id.is_empty() || title.is_empty() {
            continue;
        }
        let hf_url = base
            .as_ref()
            .and_then(|b| b.join(href).ok())
            .map(|u| u.to_string())
            .unwrap_or_else(|| format!("{}{}", base_url.trim_end_matches('/'), href));
        out.push(PaperRow {
            arxiv_id,
            title,
            hf_url,
        });
    }
    out
}

// --- arXiv Atom ---

#[derive(Debug, Deserialize)]
struct AtomFeed {
    #[serde(rename = "entry", default)]
    entries: Vec<AtomEntry>,
}

#[derive(Debug, Deserialize)]
struct AtomEntry {
    id: String,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    published: Option<String>,
    #[serde(rename = "author", default)]
    authors: Vec<AtomAuthor>,
    #[serde(rename = "link", default)]
    links: Vec<AtomLink>,
}

#[derive(Debug, Deserialize)]
struct AtomAuthor {
    name: String,
}

#[derive(Debug, Deserialize)]
struct AtomLink {
    #[serde(rename = "@href")]
    href: String,
    #[serde(rename = "@title", default)]
    title: Option<String>,
    #[serde(rename = "@type", default)]
    mime: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArxivDetails {
    pub abstract_text: Option<String>,
    pub pdf_url: Option<String>,
    pub authors: Vec<String>,
    pub published: Option<String>,
}

/// "http://arxiv.org/abs/2508.11630v2" -> "2508.11630"
fn bare_arxiv_id(entry_id: &str) -> String {
    let last = entry_id
        .trim()
        .trim_end_matches('/')
        .rsplit("/abs/")
        .next()
        .unwrap_or(entry_id);
    match last.rsplit_once('v') {
        Some((id, ver))
            if !id.is_empty() && !ver.is_empty() && ver.chars().all(|c| c.is_ascii_digit()) =>
        {
            id.to_string()
        }
        _ => last.to_string(),
    }
}

fn published_date(ts: &str) -> Option<String> {
    OffsetDateTime::parse(ts.trim(), &Rfc3339)
        .ok()
        .map(|dt| dt.date().to_string())
}

/// Parse an arXiv API response into details keyed by bare arXiv id.
pub fn parse_arxiv_feed(xml: &str) -> Result<HashMap<String, ArxivDetails>, quick_xml::DeError> {
    let feed: AtomFeed = quick_xml::de::from_str(xml)?;
    let mut out = HashMap::with_capacity(feed.entries.len());
    for e in feed.entries {
        let pdf_url = e
            .links
            .iter()
            .find(|l| {
                l.title.as_deref() == Some("pdf") || l.mime.as_deref() == Some("application/pdf")
            })
            .map(|l| l.href.clone());
        let details = ArxivDetails {
            abstract_text: e
                .summary
                .as_deref()
                .map(normalize_text)
                .filter(|s| !s.is_empty()),
            pdf_url,
            authors: e.authors.into_iter().map(|a| normalize_text(&a.name)).collect(),
            published: e.published.as_deref().and_then(published_date),
        };
        out.insert(bare_arxiv_id(&e.id), details);
    }
    Ok(out)
}

impl PaperRow {
    pub fn into_item(self, details: Option<&ArxivDetails>) -> TrendingItem {
        let arxiv_url = format!("https://arxiv.org/abs/{}", self.arxiv_id);
        let mut item = TrendingItem::new(
            SourceKind::Paper,
            format!("arxiv:{}", self.arxiv_id),
            self.title,
        )
        .with_meta("arxiv_id", self.arxiv_id)
        .with_meta("hf_url", self.hf_url)
        .with_meta("arxiv_url", arxiv_url);

        if let Some(d) = details {
            if let Some(abs) = &d.abstract_text {
                item = item.with_meta("abstract", abs.clone());
            }
            if let Some(pdf) = &d.pdf_url {
                item = item.with_meta("pdf_url", pdf.clone());
            }
            if !d.authors.is_empty() {
                item = item.with_meta("authors", d.authors.clone());
            }
            if let Some(p) = &d.published {
                item = item.with_meta("published", p.clone());
            }
        }
        item
    }
}

pub struct HuggingfacePapers {
    name: String,
    cfg: HuggingfaceSourceConfig,
    client: reqwest::Client,
}

impl HuggingfacePapers {
    pub fn new(
        name: impl Into<String>,
        cfg: HuggingfaceSourceConfig,
        client: reqwest::Client,
    ) -> Self {
        Self {
            name: name.into(),
            cfg,
            client,
        }
    }

    /// Date whose list is fetched: fixed in config, else today minus `lag_days`.
    pub fn list_date(&self, today: NaiveDate) -> NaiveDate {
        self.cfg.date.unwrap_or_else(|| {
            today
                .checked_sub_days(Days::new(u64::from(self.cfg.lag_days)))
                .unwrap_or(today)
        })
    }

    async fn arxiv_details(&self, ids: &[String]) -> HashMap<String, ArxivDetails> {
        if ids.is_empty() {
            return HashMap::new();
        }
        let url = format!(
            "{}?id_list={}&max_results={}",
            self.cfg.arxiv_api_url,
            ids.join(","),
            ids.len()
        );
        let xml = match get_text(&self.client, &url, &self.name).await {
            Ok(x) => x,
            Err(e) => {
                tracing::warn!(target: "sources", source = %self.name, error = %e, "arXiv enrichment skipped");
                return HashMap::new();
            }
        };
        match parse_arxiv_feed(&xml) {
            Ok(map) => map,
            Err(e) => {
                tracing::warn!(target: "sources", source = %self.name, error = %e, "arXiv feed unparsable");
                HashMap::new()
            }
        }
    }
}

#[async_trait]
impl TrendingSource for HuggingfacePapers {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Paper
    }

    async fn fetch(&self) -> Result<Vec<TrendingItem>, SourceUnavailable> {
        let date = self.list_date(Local::now().date_naive());
        let url = format!(
            "{}/papers/date/{}",
            self.cfg.base_url.trim_end_matches('/'),
            date.format("%Y-%m-%d")
        );
        let html = get_text(&self.client, &url, &self.name).await?;
        let rows = parse_daily_papers(&html, &self.cfg.base_url);
        if rows.is_empty() {
            tracing::info!(target: "sources", source = %self.name, %date, "no papers listed for date");
            return Ok(Vec::new());
        }

        // Rank first so only the top-N get enriched.
        let mut seen = std::collections::HashSet::new();
        let rows: Vec<PaperRow> = rows
            .into_iter()
            .filter(|r| seen.insert(r.arxiv_id.clone()))
            .take(self.cfg.limit)
            .collect();

        let ids: Vec<String> = rows.iter().map(|r| r.arxiv_id.clone()).collect();
        let details = if self.cfg.enrich_from_arxiv {
            self.arxiv_details(&ids).await
        } else {
            HashMap::new()
        };

        let items = rows
            .into_iter()
            .map(|r| {
                let d = details.get(&r.arxiv_id);
                r.into_item(d)
            })
            .collect();
        Ok(rank_unique(items, self.cfg.limit))
    }
}
