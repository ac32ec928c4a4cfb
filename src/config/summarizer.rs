// src/config/summarizer.rs
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// OpenAI-compatible chat completions endpoint.
    OpenAi,
    /// No model: first sentences of the source text.
    Extractive,
    /// Every item is reported as skipped.
    Disabled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SummarizerConfig {
    pub provider: ProviderKind,
    /// "ENV" means: read from OPENAI_API_KEY
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    /// Output language of summaries.
    pub language: String,
    pub max_words: u32,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Hard deadline for one call (retries get a fresh one).
    pub call_timeout_secs: u64,
    /// Retries after the first attempt, transient failures only.
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    /// Input text is cut to this many characters before prompting.
    pub max_input_chars: usize,
    /// On-disk cache of successful summaries; off when absent.
    pub cache_dir: Option<PathBuf>,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::OpenAi,
            api_key: Some("ENV".into()),
            base_url: "https://api.openai.com/v1".into(),
            model: "gpt-4o-mini".into(),
            language: "English".into(),
            max_words: 400,
            temperature: 0.15,
            max_tokens: 2_000,
            call_timeout_secs: 30,
            max_retries: 2,
            backoff_base_ms: 1_000,
            backoff_max_ms: 30_000,
            max_input_chars: 12_000,
            cache_dir: None,
        }
    }
}

impl SummarizerConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms.max(self.backoff_base_ms))
    }

    /// Chat completions endpoint derived from `base_url`.
    pub fn completions_url(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        if base.ends_with("/chat/completions") {
            base.to_string()
        } else {
            format!("{base}/chat/completions")
        }
    }
}
