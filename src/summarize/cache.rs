// src/summarize/cache.rs
//! File cache in front of any summarizer. Keys are SHA-256 of the client name
//! and the exact input text, so a changed README or model produces a miss.
//! Only successes are stored; cache I/O problems never fail a summary.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::{source_text, DynSummarizer, Summarizer};
use crate::error::SummarizationFailed;
use crate::model::TrendingItem;

#[derive(Debug, Serialize, Deserialize)]
struct CachedSummary {
    summary: String,
}

pub struct CachingSummarizer {
    inner: DynSummarizer,
    dir: PathBuf,
}

impl CachingSummarizer {
    pub fn new(inner: DynSummarizer, dir: PathBuf) -> Self {
        if let Err(e) = fs::create_dir_all(&dir) {
            tracing::debug!(target: "summarize", dir = %dir.display(), error = %e, "cache dir not created");
        }
        Self { inner, dir }
    }

    fn key(&self, scope: &str, text: &str) -> String {
        let mut h = Sha256::new();
        h.update(self.inner.name().as_bytes());
        h.update([0u8]);
        h.update(scope.as_bytes());
        h.update([0u8]);
        h.update(text.as_bytes());
        hex::encode(h.finalize())
    }

    async fn cached<F>(&self, key: String, call: F) -> Result<String, SummarizationFailed>
    where
        F: std::future::Future<Output = Result<String, SummarizationFailed>> + Send,
    {
        if let Some(hit) = read_entry(&self.dir, &key) {
            tracing::debug!(target: "summarize", key = %key, "summary cache hit");
            return Ok(hit);
        }
        let fresh = call.await?;
        if let Err(e) = write_entry(&self.dir, &key, &fresh) {
            tracing::debug!(target: "summarize", key = %key, error = %e, "summary cache write failed");
        }
        Ok(fresh)
    }
}

#[async_trait]
impl Summarizer for CachingSummarizer {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn summarize(&self, item: &TrendingItem) -> Result<String, SummarizationFailed> {
        let Some(text) = source_text(item) else {
            return self.inner.summarize(item).await;
        };
        let key = self.key("item", &text);
        self.cached(key, self.inner.summarize(item)).await
    }

    async fn condense(&self, digest: &str) -> Result<String, SummarizationFailed> {
        let key = self.key("condense", digest);
        self.cached(key, self.inner.condense(digest)).await
    }
}

fn entry_path(dir: &Path, key: &str) -> PathBuf {
    dir.join(format!("{key}.json"))
}

fn read_entry(dir: &Path, key: &str) -> Option<String> {
    let raw = fs::read_to_string(entry_path(dir, key)).ok()?;
    let entry: CachedSummary = serde_json::from_str(&raw).ok()?;
    Some(entry.summary).filter(|s| !s.trim().is_empty())
}

fn write_entry(dir: &Path, key: &str, summary: &str) -> io::Result<()> {
    let path = entry_path(dir, key);
    let tmp = path.with_extension("json.tmp");
    let json = serde_json::to_vec(&CachedSummary {
        summary: summary.to_string(),
    })
    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let mut f = fs::File::create(&tmp)?;
    f.write_all(&json)?;
    fs::rename(tmp, path)?;
    Ok(())
}
