// src/config/mod.rs
//! Application configuration: one TOML file, every field defaulted, a few
//! environment overrides. Loaded once at startup and read-only afterwards.

pub mod delivery;
pub mod summarizer;

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

pub use delivery::{DeliveryConfig, SmtpConfig, TlsMode};
pub use summarizer::{ProviderKind, SummarizerConfig};

pub const ENV_CONFIG_PATH: &str = "TREND_DIGEST_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config/trend_digest.toml";

/// Literal used in secret fields meaning "read the conventional env var".
const ENV_MARKER: &str = "ENV";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub schedule: ScheduleConfig,
    pub pipeline: PipelineConfig,
    pub summarizer: SummarizerConfig,
    #[serde(default = "default_sources")]
    pub sources: Vec<SourceConfig>,
    pub delivery: DeliveryConfig,
    pub status: StatusConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            schedule: ScheduleConfig::default(),
            pipeline: PipelineConfig::default(),
            summarizer: SummarizerConfig::default(),
            sources: default_sources(),
            delivery: DeliveryConfig::default(),
            status: StatusConfig::default(),
        }
    }
}

// ---------- schedule ----------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    Once,
    Daily,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub mode: RunMode,
    /// Local wall-clock time, "HH:MM".
    #[serde(with = "hhmm")]
    pub at: NaiveTime,
    /// Daily mode only: fire once for today before the first wait.
    pub run_on_start: bool,
    /// How often the waiting phase logs progress.
    pub progress_log_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            mode: RunMode::Daily,
            at: NaiveTime::from_hms_opt(23, 0, 0).unwrap_or_default(),
            run_on_start: false,
            progress_log_secs: 600,
        }
    }
}

/// Parse "HH:MM" (also accepts "HH:MM:SS").
pub fn parse_hhmm(s: &str) -> Result<NaiveTime> {
    let s = s.trim();
    NaiveTime::parse_from_str(s, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
        .map_err(|_| anyhow!("invalid time '{s}', expected HH:MM"))
}

mod hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(t: &NaiveTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&t.format("%H:%M").to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(d)?;
        super::parse_hhmm(&raw).map_err(serde::de::Error::custom)
    }
}

// ---------- pipeline ----------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Max concurrent summarizer calls.
    pub pool_size: usize,
    /// Deadline for one source's whole fetch.
    pub source_timeout_secs: u64,
    pub output_dir: PathBuf,
    /// Condense item summaries into a short overview.
    pub tldr: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            pool_size: 4,
            source_timeout_secs: 120,
            output_dir: PathBuf::from("materials"),
            tldr: true,
        }
    }
}

impl PipelineConfig {
    pub fn source_timeout(&self) -> Duration {
        Duration::from_secs(self.source_timeout_secs)
    }
}

// ---------- sources ----------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceConfig {
    GithubTrending(GithubSourceConfig),
    HuggingfacePapers(HuggingfaceSourceConfig),
}

impl SourceConfig {
    pub fn name(&self) -> String {
        match self {
            SourceConfig::GithubTrending(c) => {
                c.name.clone().unwrap_or_else(|| "github-trending".into())
            }
            SourceConfig::HuggingfacePapers(c) => {
                c.name.clone().unwrap_or_else(|| "huggingface-papers".into())
            }
        }
    }

    fn limit(&self) -> usize {
        match self {
            SourceConfig::GithubTrending(c) => c.limit,
            SourceConfig::HuggingfacePapers(c) => c.limit,
        }
    }

    /// Longest a fetch can take when every request runs to its timeout.
    pub fn worst_case_fetch(&self) -> Duration {
        match self {
            SourceConfig::GithubTrending(c) => {
                let page = Duration::from_secs(c.request_timeout_secs);
                if c.fetch_readme {
                    page + c.readme_budget() + Duration::from_millis(c.request_delay_ms)
                } else {
                    page
                }
            }
            SourceConfig::HuggingfacePapers(c) => {
                let calls = if c.enrich_from_arxiv { 2 } else { 1 };
                Duration::from_secs(c.request_timeout_secs * calls)
            }
        }
    }
}

fn default_sources() -> Vec<SourceConfig> {
    vec![
        SourceConfig::HuggingfacePapers(HuggingfaceSourceConfig::default()),
        SourceConfig::GithubTrending(GithubSourceConfig::default()),
    ]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GithubSourceConfig {
    pub name: Option<String>,
    pub limit: usize,
    /// Optional language path segment, e.g. "rust".
    pub language: Option<String>,
    /// "daily" | "weekly" | "monthly"
    pub since: String,
    /// "ENV" reads GITHUB_TOKEN.
    pub token: Option<String>,
    pub fetch_readme: bool,
    pub readme_max_chars: usize,
    /// Pause between README requests.
    pub request_delay_ms: u64,
    /// Total time spent on READMEs per fetch; repos past it keep page data only.
    pub readme_budget_ms: u64,
    pub request_timeout_secs: u64,
    pub base_url: String,
    pub api_url: String,
}

impl Default for GithubSourceConfig {
    fn default() -> Self {
        Self {
            name: None,
            limit: 10,
            language: None,
            since: "daily".into(),
            token: Some(ENV_MARKER.into()),
            fetch_readme: true,
            readme_max_chars: 4_000,
            request_delay_ms: 1_000,
            readme_budget_ms: 60_000,
            request_timeout_secs: 20,
            base_url: "https://github.com".into(),
            api_url: "https://api.github.com".into(),
        }
    }
}

impl GithubSourceConfig {
    pub fn readme_budget(&self) -> Duration {
        Duration::from_millis(self.readme_budget_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HuggingfaceSourceConfig {
    pub name: Option<String>,
    pub limit: usize,
    /// Site or mirror, e.g. "https://hf-mirror.com".
    pub base_url: String,
    /// Days before today whose list is fetched.
    pub lag_days: u32,
    /// Fixed list date (backfills); overrides `lag_days`.
    pub date: Option<NaiveDate>,
    pub enrich_from_arxiv: bool,
    pub arxiv_api_url: String,
    pub request_timeout_secs: u64,
}

impl Default for HuggingfaceSourceConfig {
    fn default() -> Self {
        Self {
            name: None,
            limit: 10,
            base_url: "https://huggingface.co".into(),
            lag_days: 1,
            date: None,
            enrich_from_arxiv: true,
            arxiv_api_url: "http://export.arxiv.org/api/query".into(),
            request_timeout_secs: 20,
        }
    }
}

// ---------- status ----------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusConfig {
    /// e.g. "127.0.0.1:9090"; disabled when absent.
    pub listen: Option<String>,
}

impl StatusConfig {
    pub fn listen_addr(&self) -> Result<Option<SocketAddr>> {
        self.listen
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .map(|s| {
                s.trim()
                    .parse::<SocketAddr>()
                    .with_context(|| format!("invalid status.listen address '{s}'"))
            })
            .transpose()
    }
}

// ---------- loading ----------

impl AppConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let cfg: AppConfig = toml::from_str(s).context("parsing config TOML")?;
        Ok(cfg)
    }

    /// Read, apply env overrides, validate.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        let mut cfg = Self::from_toml_str(&content)
            .with_context(|| format!("in config file {}", path.display()))?;
        cfg.apply_env_overrides();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Lookup order:
    /// 1) explicit path (CLI)
    /// 2) $TREND_DIGEST_CONFIG
    /// 3) config/trend_digest.toml
    /// 4) built-in defaults
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(p) = explicit {
            return Self::load_from(p);
        }
        if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if pb.exists() {
                return Self::load_from(&pb);
            }
            bail!("{ENV_CONFIG_PATH} points to non-existent path {}", pb.display());
        }
        let default_p = PathBuf::from(DEFAULT_CONFIG_PATH);
        if default_p.exists() {
            return Self::load_from(&default_p);
        }
        tracing::info!(target: "config", "no config file found, using defaults");
        let mut cfg = Self::default();
        cfg.apply_env_overrides();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Resolve "ENV" secrets and apply plain env overrides.
    pub fn apply_env_overrides(&mut self) {
        self.summarizer.api_key = resolve_secret(self.summarizer.api_key.take(), "OPENAI_API_KEY");
        if let Ok(url) = std::env::var("SUMMARIZER_BASE_URL") {
            if !url.trim().is_empty() {
                self.summarizer.base_url = url.trim().to_string();
            }
        }

        for src in &mut self.sources {
            if let SourceConfig::GithubTrending(gh) = src {
                gh.token = resolve_secret(gh.token.take(), "GITHUB_TOKEN");
            }
        }

        if let Some(smtp) = self.delivery.smtp.as_mut() {
            smtp.username = resolve_secret(smtp.username.take(), "SMTP_USER");
            smtp.password = resolve_secret(smtp.password.take(), "SMTP_PASS");
        }
        if let Ok(list) = std::env::var("DIGEST_RECIPIENTS") {
            let parsed = split_recipients(&list);
            if !parsed.is_empty() {
                self.delivery.recipients = parsed;
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.pipeline.pool_size == 0 {
            bail!("pipeline.pool_size must be >= 1");
        }
        if self.pipeline.source_timeout_secs == 0 {
            bail!("pipeline.source_timeout_secs must be >= 1");
        }
        if self.summarizer.call_timeout_secs == 0 {
            bail!("summarizer.call_timeout_secs must be >= 1");
        }
        if self.sources.is_empty() {
            bail!("at least one [[sources]] entry is required");
        }
        let mut names = std::collections::HashSet::new();
        for src in &self.sources {
            if src.limit() == 0 {
                bail!("source '{}': limit must be >= 1", src.name());
            }
            if !names.insert(src.name()) {
                bail!("duplicate source name '{}'", src.name());
            }
            let worst = src.worst_case_fetch();
            if worst >= self.pipeline.source_timeout() {
                bail!(
                    "source '{}': requests may take {}s, which does not fit in pipeline.source_timeout_secs = {}",
                    src.name(),
                    worst.as_secs_f64(),
                    self.pipeline.source_timeout_secs
                );
            }
        }
        if self.delivery.batch_size == 0 {
            bail!("delivery.batch_size must be >= 1");
        }
        self.status.listen_addr()?;
        Ok(())
    }
}

/// `Some("ENV")` becomes the env var's value (or `None` when unset).
fn resolve_secret(value: Option<String>, env_var: &str) -> Option<String> {
    match value {
        Some(v) if v.trim().eq_ignore_ascii_case(ENV_MARKER) => match std::env::var(env_var) {
            Ok(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            _ => {
                tracing::debug!(target: "config", env_var, "secret requested from env but not set");
                None
            }
        },
        Some(v) if v.trim().is_empty() => None,
        other => other,
    }
}

pub fn split_recipients(s: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for part in s.split([',', ';']) {
        let t = part.trim();
        if !t.is_empty() && !out.iter().any(|o| o.eq_ignore_ascii_case(t)) {
            out.push(t.to_string());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hhmm_accepts_minutes_and_seconds() {
        assert_eq!(
            parse_hhmm("07:05").unwrap(),
            NaiveTime::from_hms_opt(7, 5, 0).unwrap()
        );
        assert_eq!(
            parse_hhmm(" 23:00:30 ").unwrap(),
            NaiveTime::from_hms_opt(23, 0, 30).unwrap()
        );
        assert!(parse_hhmm("25:00").is_err());
        assert!(parse_hhmm("noon").is_err());
    }

    #[test]
    fn recipients_split_trim_and_dedup() {
        let v = split_recipients(" a@x.org, b@x.org;; A@x.org ,");
        assert_eq!(v, vec!["a@x.org".to_string(), "b@x.org".to_string()]);
    }

    #[test]
    fn resolve_secret_passes_literals_through() {
        assert_eq!(resolve_secret(Some("abc".into()), "UNUSED_VAR_X"), Some("abc".into()));
        assert_eq!(resolve_secret(Some("  ".into()), "UNUSED_VAR_X"), None);
        assert_eq!(resolve_secret(None, "UNUSED_VAR_X"), None);
    }
}
