// src/summarize/mod.rs
//! Summarizer capability, its retry policy and the concrete clients.
//!
//! A summarizer turns one item's metadata into prose, or fails with a typed
//! reason. Retry lives here rather than in the clients so every client gets
//! the same policy: transient reasons (rate limit, timeout) back off
//! exponentially, everything else fails the item immediately.

pub mod cache;
pub mod extractive;
pub mod openai;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use metrics::counter;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::{ProviderKind, SummarizerConfig};
use crate::error::SummarizationFailed;
use crate::model::{SourceKind, TrendingItem};
use crate::sources::{normalize_text, truncate_chars};

#[async_trait]
pub trait Summarizer: Send + Sync {
    fn name(&self) -> &str;

    async fn summarize(&self, item: &TrendingItem) -> Result<String, SummarizationFailed>;

    /// Shorten a numbered list of summaries into an overview.
    async fn condense(&self, digest: &str) -> Result<String, SummarizationFailed> {
        let _ = digest;
        Err(SummarizationFailed::invalid_response(format!(
            "{} does not support condensing",
            self.name()
        )))
    }
}

pub type DynSummarizer = Arc<dyn Summarizer>;

/// Build the configured client (cache-wrapped when `cache_dir` is set).
/// `None` means summarization is disabled and every item is skipped.
pub fn from_config(cfg: &SummarizerConfig) -> anyhow::Result<Option<DynSummarizer>> {
    let inner: DynSummarizer = match cfg.provider {
        ProviderKind::Disabled => return Ok(None),
        ProviderKind::Extractive => Arc::new(extractive::ExtractiveSummarizer::new(cfg)),
        ProviderKind::OpenAi => {
            if cfg.api_key.is_none() {
                tracing::warn!(target: "summarize", "no API key configured; summaries will fail with AuthError");
            }
            Arc::new(openai::OpenAiSummarizer::new(cfg)?)
        }
    };
    Ok(Some(match &cfg.cache_dir {
        Some(dir) => Arc::new(cache::CachingSummarizer::new(inner, dir.clone())),
        None => inner,
    }))
}

// ---------- input text ----------

static RE_MD_IMAGE: Lazy<Regex> = Lazy::new(|| Regex::new(r"!\[[^\]]*\]\([^)]*\)").unwrap());
static RE_MD_LINK: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[([^\]]*)\]\([^)]*\)").unwrap());
static RE_MD_MARKUP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s{0,3}(#{1,6}|>|[-*+]\s\[.\])\s*|```[a-z]*|\*\*|__").unwrap());

/// README markdown down to plain text: images dropped, links reduced to their label.
pub fn clean_markdown(s: &str) -> String {
    let out = RE_MD_IMAGE.replace_all(s, " ");
    let out = RE_MD_LINK.replace_all(&out, "$1");
    let out = RE_MD_MARKUP.replace_all(&out, " ");
    normalize_text(&out)
}

const NO_DESCRIPTION: &str = "No description provided.";

/// Text a summarizer works from. `None` when there is nothing to summarize.
///
/// Papers: title and abstract. Repositories: description and README.
pub fn source_text(item: &TrendingItem) -> Option<String> {
    match item.source_kind {
        SourceKind::Paper => {
            let abs = item.meta_str("abstract")?;
            Some(format!("Title: {}\n\nAbstract: {}", item.title, abs))
        }
        SourceKind::Repo => {
            let desc = item.meta_str("description").filter(|d| *d != NO_DESCRIPTION);
            let readme = item
                .meta_str("readme")
                .map(clean_markdown)
                .filter(|r| !r.is_empty());
            match (desc, readme) {
                (None, None) => None,
                (desc, readme) => Some(format!(
                    "Project: {}\n\nProject Description: {}\n\nREADME: {}",
                    item.title,
                    desc.unwrap_or(NO_DESCRIPTION),
                    readme.as_deref().unwrap_or("(none)")
                )),
            }
        }
    }
}

/// `source_text` capped at `max_chars`.
pub fn prompt_text(item: &TrendingItem, max_chars: usize) -> Option<String> {
    source_text(item).map(|t| truncate_chars(&t, max_chars))
}

// ---------- retry ----------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    /// Deadline for each single call.
    pub call_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff_base: Duration::from_secs(1),
            backoff_max: Duration::from_secs(30),
            call_timeout: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(cfg: &SummarizerConfig) -> Self {
        Self {
            max_retries: cfg.max_retries,
            backoff_base: cfg.backoff_base(),
            backoff_max: cfg.backoff_max(),
            call_timeout: cfg.call_timeout(),
        }
    }

    /// Delay before retry number `retry` (1-based): base * 2^(retry-1), capped.
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u32 << retry.saturating_sub(1).min(16);
        self.backoff_base.saturating_mul(factor).min(self.backoff_max)
    }
}

/// Outcome of a retried call plus how many calls were made.
#[derive(Debug)]
pub struct Attempted<T> {
    pub result: Result<T, SummarizationFailed>,
    pub attempts: u32,
}

/// Run `call` under `policy`. Each attempt gets its own deadline; an elapsed
/// deadline counts as `Timeout` and is retried like one.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, label: &str, mut call: F) -> Attempted<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SummarizationFailed>>,
{
    let mut attempts: u32 = 0;
    loop {
        attempts += 1;
        let res = match tokio::time::timeout(policy.call_timeout, call()).await {
            Ok(r) => r,
            Err(_) => Err(SummarizationFailed::timeout(format!(
                "no response within {}ms",
                policy.call_timeout.as_millis()
            ))),
        };
        match res {
            Ok(v) => {
                return Attempted {
                    result: Ok(v),
                    attempts,
                }
            }
            Err(e) if e.reason.is_transient() && attempts <= policy.max_retries => {
                let delay = policy.backoff(attempts);
                counter!("digest_summary_retries_total").increment(1);
                tracing::warn!(
                    target: "summarize",
                    item = label,
                    attempt = attempts,
                    reason = %e.reason,
                    delay_ms = delay.as_millis() as u64,
                    "transient summarizer failure, backing off"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                return Attempted {
                    result: Err(e),
                    attempts,
                }
            }
        }
    }
}

pub async fn summarize_with_retry(
    summarizer: &dyn Summarizer,
    item: &TrendingItem,
    policy: &RetryPolicy,
) -> Attempted<String> {
    with_retry(policy, &item.identifier, move || summarizer.summarize(item)).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let p = RetryPolicy {
            max_retries: 5,
            backoff_base: Duration::from_millis(100),
            backoff_max: Duration::from_millis(350),
            call_timeout: Duration::from_secs(1),
        };
        assert_eq!(p.backoff(1), Duration::from_millis(100));
        assert_eq!(p.backoff(2), Duration::from_millis(200));
        assert_eq!(p.backoff(3), Duration::from_millis(350));
    }

    #[test]
    fn paper_without_abstract_has_no_text() {
        let it = TrendingItem::new(SourceKind::Paper, "arxiv:1", "T");
        assert!(source_text(&it).is_none());
        let it = it.with_meta("abstract", "We do things.");
        assert_eq!(
            source_text(&it).as_deref(),
            Some("Title: T\n\nAbstract: We do things.")
        );
    }

    #[test]
    fn repo_text_needs_description_or_readme() {
        let bare = TrendingItem::new(SourceKind::Repo, "u", "a/b")
            .with_meta("description", NO_DESCRIPTION);
        assert!(source_text(&bare).is_none());

        let with_readme = bare.with_meta("readme", "# Title\n![badge](x.svg) See [docs](https://d).");
        let text = source_text(&with_readme).unwrap();
        assert!(text.contains("README: Title See docs."));
        assert!(!text.contains("badge"));
    }

    #[test]
    fn prompt_text_is_capped() {
        let it = TrendingItem::new(SourceKind::Paper, "arxiv:1", "T").with_meta("abstract", "x".repeat(50));
        let t = prompt_text(&it, 20).unwrap();
        assert_eq!(t.chars().count(), 21);
    }
}
