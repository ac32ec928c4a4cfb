// src/sources/github.rs
//! GitHub trending repositories.
//!
//! The trending page has no API, so the list is scraped from `github.com/trending`.
//! READMEs come from the REST API and are best-effort per repository.

use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};
use tokio::time::Instant;

use super::{get_text, normalize_text, rank_unique, truncate_chars, TrendingSource};
use crate::config::GithubSourceConfig;
use crate::error::SourceUnavailable;
use crate::model::{SourceKind, TrendingItem};

static SEL_ROW: Lazy<Selector> = Lazy::new(|| Selector::parse("article.Box-row").unwrap());
static SEL_TITLE: Lazy<Selector> = Lazy::new(|| Selector::parse("h2 a").unwrap());
static SEL_DESC: Lazy<Selector> = Lazy::new(|| Selector::parse("p").unwrap());
static SEL_LANG: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"span[itemprop="programmingLanguage"]"#).unwrap());
static SEL_STARS: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"a[href$="/stargazers"]"#).unwrap());
static SEL_STARS_TODAY: Lazy<Selector> =
    Lazy::new(|| Selector::parse("span.d-inline-block.float-sm-right").unwrap());

/// One row of the trending page, before README enrichment.
#[derive(Debug, Clone, PartialEq)]
pub struct TrendingRow {
    pub full_name: String,
    pub description: Option<String>,
    pub language: Option<String>,
    pub stars: Option<u64>,
    pub stars_today: Option<u64>,
}

fn text_of(el: ElementRef<'_>) -> String {
    normalize_text(&el.text().collect::<String>())
}

/// "12,345" / "1,234 stars today" -> 12345 / 1234
fn parse_count(s: &str) -> Option<u64> {
    let digits: String = s
        .split_whitespace()
        .next()?
        .chars()
        .filter(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

/// Parse the trending page. Rows without a repository link are skipped.
pub fn parse_trending(html: &str) -> Vec<TrendingRow> {
    let doc = Html::parse_document(html);
    let mut rows = Vec::new();
    for row in doc.select(&SEL_ROW) {
        let Some(href) = row
            .select(&SEL_TITLE)
            .next()
            .and_then(|a| a.value().attr("href"))
        else {
            continue;
        };
        let full_name = href.trim().trim_matches('/').to_string();
        if full_name.split('/').count() != 2 {
            continue;
        }
        let description = row
            .select(&SEL_DESC)
            .next()
            .map(text_of)
            .filter(|s| !s.is_empty());
        let language = row
            .select(&SEL_LANG)
            .next()
            .map(text_of)
            .filter(|s| !s.is_empty());
        let stars = row
            .select(&SEL_STARS)
            .next()
            .and_then(|a| parse_count(&text_of(a)));
        let stars_today = row
            .select(&SEL_STARS_TODAY)
            .next()
            .and_then(|s| parse_count(&text_of(s)));
        rows.push(TrendingRow {
            full_name,
            description,
            language,
            stars,
            stars_today,
        });
    }
    rows
}

impl TrendingRow {
    pub fn into_item(self) -> TrendingItem {
        let url = format!("https://github.com/{}", self.full_name);
        let mut item = TrendingItem::new(SourceKind::Repo, url.clone(), self.full_name.clone())
            .with_meta("full_name", self.full_name)
            .with_meta("url", url)
            .with_meta(
                "description",
                self.description
                    .unwrap_or_else(|| "No description provided.".to_string()),
            )
            .with_meta(
                "language",
                self.language.unwrap_or_else(|| "Unknown".to_string()),
            );
        if let Some(n) = self.stars {
            item = item.with_meta("stars", n);
        }
        if let Some(n) = self.stars_today {
            item = item.with_meta("stars_today", n);
        }
        item
    }
}

pub struct GithubTrending {
    name: String,
    cfg: GithubSourceConfig,
    client: reqwest::Client,
}

impl GithubTrending {
    pub fn new(name: impl Into<String>, cfg: GithubSourceConfig, client: reqwest::Client) -> Self {
        Self {
            name: name.into(),
            cfg,
            client,
        }
    }

    fn trending_url(&self) -> String {
        let mut url = format!("{}/trending", self.cfg.base_url.trim_end_matches('/'));
        if let Some(lang) = self.cfg.language.as_deref().filter(|l| !l.is_empty()) {
            url.push('/');
            url.push_str(lang);
        }
        url.push_str("?since=");
        url.push_str(&self.cfg.since);
        url
    }

    async fn fetch_readme(&self, full_name: &str) -> Option<String> {
        let url = format!(
            "{}/repos/{}/readme",
            self.cfg.api_url.trim_end_matches('/'),
            full_name
        );
        let mut req = self
            .client
            .get(&url)
            .header(reqwest::header::ACCEPT, "application/vnd.github.raw+json");
        if let Some(token) = self.cfg.token.as_deref().filter(|t| !t.is_empty()) {
            req = req.bearer_auth(token);
        }
        let resp = match req.send().await {
            Ok(r) => r,
            Err(e) => {
                tracing::debug!(target: "sources", repo = full_name, error = %e, "readme request failed");
                return None;
            }
        };
        if !resp.status().is_success() {
            tracing::debug!(target: "sources", repo = full_name, status = %resp.status(), "readme not available");
            return None;
        }
        let body = resp.text().await.ok()?;
        let body = body.trim();
        (!body.is_empty()).then(|| truncate_chars(body, self.cfg.readme_max_chars))
    }

    /// Attach READMEs until the enrichment budget runs out. Items past that
    /// point keep their page data only.
    async fn enrich_readmes(&self, items: &mut [TrendingItem]) {
        let deadline = Instant::now() + self.cfg.readme_budget();
        let delay = Duration::from_millis(self.cfg.request_delay_ms);
        let total = items.len();
        for (i, item) in items.iter_mut().enumerate() {
            if i > 0 && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let left = deadline.saturating_duration_since(Instant::now());
            let readme = if left.is_zero() {
                None
            } else {
                tokio::time::timeout(left, self.fetch_readme(&item.title))
                    .await
                    .ok()
            };
            match readme {
                Some(Some(text)) => {
                    item.raw_metadata.insert("readme".to_string(), text.into());
                }
                Some(None) => {}
                None => {
                    tracing::warn!(
                        target: "sources",
                        source = %self.name,
                        enriched = i,
                        total,
                        "readme budget exhausted, remaining repos keep page data only"
                    );
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl TrendingSource for GithubTrending {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Repo
    }

    async fn fetch(&self) -> Result<Vec<TrendingItem>, SourceUnavailable> {
        let html = get_text(&self.client, &self.trending_url(), &self.name).await?;
        let rows = parse_trending(&html);
        if rows.is_empty() {
            return Err(SourceUnavailable::new(
                &self.name,
                "trending page contained no repositories (layout changed?)",
            ));
        }

        let mut items = rank_unique(
            rows.into_iter().map(TrendingRow::into_item).collect(),
            self.cfg.limit,
        );

        if self.cfg.fetch_readme {
            self.enrich_readmes(&mut items).await;
        }

        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIXTURE: &str = include_str!("../../tests/fixtures/github_trending.html");

    #[test]
    fn parses_rows_from_fixture() {
        let rows = parse_trending(FIXTURE);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].full_name, "tokio-rs/tokio");
        assert_eq!(rows[0].language.as_deref(), Some("Rust"));
        assert_eq!(rows[0].stars, Some(27_512));
        assert_eq!(rows[0].stars_today, Some(1_204));
        assert_eq!(
            rows[0].description.as_deref(),
            Some("A runtime for writing reliable asynchronous applications with Rust.")
        );
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let rows = parse_trending(FIXTURE);
        let item = rows[2].clone().into_item();
        assert_eq!(item.identifier, "https://github.com/someone/bare");
        assert_eq!(item.meta_str("description"), Some("No description provided."));
        assert_eq!(item.meta_str("language"), Some("Unknown"));
        assert!(item.raw_metadata.get("stars").is_none());
    }

    #[test]
    fn empty_page_yields_no_rows() {
        assert!(parse_trending("<html><body><p>nothing</p></body></html>").is_empty());
    }

    #[test]
    fn count_parsing_handles_separators() {
        assert_eq!(parse_count("12,345"), Some(12_345));
        assert_eq!(parse_count("1,204 stars today"), Some(1_204));
        assert_eq!(parse_count(""), None);
    }
}
