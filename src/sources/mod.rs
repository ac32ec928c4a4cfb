// src/sources/mod.rs
pub mod github;
pub mod huggingface;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use metrics::{counter, histogram};
use once_cell::sync::OnceCell;

use crate::config::SourceConfig;
use crate::error::SourceUnavailable;
use crate::model::{SourceKind, TrendingItem};

pub const USER_AGENT: &str = concat!(
    "trend-digest/",
    env!("CARGO_PKG_VERSION"),
    " (+daily trending digest)"
);

/// A pluggable trending source. Implementations rank by their own criteria,
/// return at most their configured top-N, and de-duplicate by identifier.
/// No retries here: the pipeline owns failure policy.
#[async_trait]
pub trait TrendingSource: Send + Sync {
    fn name(&self) -> &str;
    fn kind(&self) -> SourceKind;
    async fn fetch(&self) -> Result<Vec<TrendingItem>, SourceUnavailable>;
}

pub type DynSource = Arc<dyn TrendingSource>;

/// Instantiate the configured adapters, in configuration order.
pub fn build_sources(configs: &[SourceConfig]) -> reqwest::Result<Vec<DynSource>> {
    configs
        .iter()
        .map(|c| {
            let name = c.name();
            let src: DynSource = match c {
                SourceConfig::GithubTrending(gh) => {
                    let client = http_client(Duration::from_secs(gh.request_timeout_secs))?;
                    Arc::new(github::GithubTrending::new(name, gh.clone(), client))
                }
                SourceConfig::HuggingfacePapers(hf) => {
                    let client = http_client(Duration::from_secs(hf.request_timeout_secs))?;
                    Arc::new(huggingface::HuggingfacePapers::new(name, hf.clone(), client))
                }
            };
            Ok(src)
        })
        .collect()
}

/// Result of one adapter inside a run, kept in configuration order.
#[derive(Debug)]
pub struct SourceOutcome {
    pub name: String,
    pub kind: SourceKind,
    pub result: Result<Vec<TrendingItem>, SourceUnavailable>,
}

/// Run every source concurrently, each under its own deadline.
/// One source failing (or hanging) never cancels the others.
pub async fn fetch_all(sources: &[DynSource], deadline: Duration) -> Vec<SourceOutcome> {
    let futs = sources.iter().map(|src| async move {
        let t0 = Instant::now();
        let result = match tokio::time::timeout(deadline, src.fetch()).await {
            Ok(r) => r,
            Err(_) => Err(SourceUnavailable::new(
                src.name(),
                format!("no response within {}s", deadline.as_secs()),
            )),
        };
        histogram!("digest_source_fetch_ms", "source" => src.name().to_string())
            .record(t0.elapsed().as_secs_f64() * 1_000.0);

        match &result {
            Ok(items) => {
                counter!("digest_source_fetch_total", "source" => src.name().to_string(), "outcome" => "ok")
                    .increment(1);
                tracing::info!(target: "sources", source = src.name(), items = items.len(), "source fetched");
            }
            Err(e) => {
                counter!("digest_source_fetch_total", "source" => src.name().to_string(), "outcome" => "unavailable")
                    .increment(1);
                tracing::warn!(target: "sources", source = src.name(), error = %e, "source unavailable");
            }
        }

        SourceOutcome {
            name: src.name().to_string(),
            kind: src.kind(),
            result,
        }
    });
    // join_all keeps input order, which is the section order of the report.
    futures::future::join_all(futs).await
}

/// Drop repeated identifiers (first occurrence wins), cap at `limit`, assign 1-based ranks.
pub fn rank_unique(items: Vec<TrendingItem>, limit: usize) -> Vec<TrendingItem> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|it| seen.insert(it.identifier.clone()))
        .take(limit)
        .enumerate()
        .map(|(i, mut it)| {
            it.rank = (i + 1) as u32;
            it
        })
        .collect()
}

/// Shared HTTP client for adapters.
pub fn http_client(timeout: Duration) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(Duration::from_secs(10))
        .timeout(timeout)
        .build()
}

/// GET a URL and return the body, treating non-2xx as an error.
pub(crate) async fn get_text(
    client: &reqwest::Client,
    url: &str,
    source: &str,
) -> Result<String, SourceUnavailable> {
    let resp = client
        .get(url)
        .send()
        .await
        .map_err(|e| SourceUnavailable::new(source, format!("GET {url}: {e}")))?;
    let status = resp.status();
    if !status.is_success() {
        return Err(SourceUnavailable::new(
            source,
            format!("GET {url}: HTTP {status}"),
        ));
    }
    resp.text()
        .await
        .map_err(|e| SourceUnavailable::new(source, format!("reading body of {url}: {e}")))
}

/// Normalize scraped text: decode entities, strip tags, collapse whitespace.
pub fn normalize_text(s: &str) -> String {
    // 1) HTML entity decode
    let out = html_escape::decode_html_entities(s).to_string();

    // 2) Strip HTML tags
    static RE_TAGS: OnceCell<regex::Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[^>]+>").unwrap());
    let out = re_tags.replace_all(&out, " ");

    // 3) Collapse whitespace
    static RE_WS: OnceCell<regex::Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"\s+").unwrap());
    re_ws.replace_all(&out, " ").trim().to_string()
}

/// Cap text at `max_chars` characters (not bytes), appending an ellipsis when cut.
pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max_chars).collect();
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_text_strips_tags_and_entities() {
        let s = "  <p>Hello,&nbsp;&nbsp;<b>world</b></p>\n\n ";
        assert_eq!(normalize_text(s), "Hello, world");
    }

    #[test]
    fn rank_unique_dedups_caps_and_ranks() {
        let items = ["a", "b", "a", "c", "d"]
            .iter()
            .map(|id| TrendingItem::new(SourceKind::Repo, *id, *id))
            .collect();
        let out = rank_unique(items, 3);
        let ids: Vec<_> = out.iter().map(|i| i.identifier.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        let ranks: Vec<_> = out.iter().map(|i| i.rank).collect();
        assert_eq!(ranks, vec![1, 2, 3]);
    }

    #[test]
    fn truncate_counts_chars_not_bytes() {
        assert_eq!(truncate_chars("héllo", 10), "héllo");
        assert_eq!(truncate_chars("héllo", 2), "hé…");
    }
}
