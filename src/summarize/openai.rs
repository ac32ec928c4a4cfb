// src/summarize/openai.rs
//! OpenAI-compatible chat completions client.
//!
//! Works against api.openai.com and any server speaking the same protocol
//! (set `base_url`). HTTP statuses and transport errors are mapped onto the
//! four failure reasons so the retry policy can tell transient from fatal.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use super::{prompt_text, Summarizer};
use crate::config::SummarizerConfig;
use crate::error::{FailureReason, SummarizationFailed};
use crate::model::{SourceKind, TrendingItem};
use crate::sources::USER_AGENT;

#[derive(Serialize)]
struct Msg<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Msg<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMsg,
}

#[derive(Deserialize)]
struct ChoiceMsg {
    #[serde(default)]
    content: Option<String>,
}

/// Failure reason for a non-2xx status.
pub fn classify_status(status: StatusCode) -> FailureReason {
    match status.as_u16() {
        429 | 503 => FailureReason::RateLimited,
        401 | 403 => FailureReason::AuthError,
        408 | 504 => FailureReason::Timeout,
        s if (500..600).contains(&s) => FailureReason::Timeout,
        _ => FailureReason::InvalidResponse,
    }
}

fn classify_transport(e: &reqwest::Error) -> FailureReason {
    if e.is_timeout() || e.is_connect() || e.is_request() {
        FailureReason::Timeout
    } else {
        FailureReason::InvalidResponse
    }
}

pub struct OpenAiSummarizer {
    http: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    language: String,
    max_words: u32,
    temperature: f32,
    max_tokens: u32,
    max_input_chars: usize,
}

impl OpenAiSummarizer {
    pub fn new(cfg: &SummarizerConfig) -> reqwest::Result<Self> {
        // The retry layer enforces the per-call deadline; this is a backstop.
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(Duration::from_secs(10))
            .timeout(cfg.call_timeout() + Duration::from_secs(5))
            .build()?;
        Ok(Self {
            http,
            endpoint: cfg.completions_url(),
            api_key: cfg.api_key.clone().filter(|k| !k.trim().is_empty()),
            model: cfg.model.clone(),
            language: cfg.language.clone(),
            max_words: cfg.max_words,
            temperature: cfg.temperature,
            max_tokens: cfg.max_tokens,
            max_input_chars: cfg.max_input_chars,
        })
    }

    async fn chat(&self, system: &str, user: &str) -> Result<String, SummarizationFailed> {
        let Some(key) = self.api_key.as_deref() else {
            return Err(SummarizationFailed::auth("no API key configured"));
        };
        let req = ChatRequest {
            model: &self.model,
            messages: vec![
                Msg {
                    role: "system",
                    content: system,
                },
                Msg {
                    role: "user",
                    content: user,
                },
            ],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let resp = self
            .http
            .post(&self.endpoint)
            .bearer_auth(key)
            .json(&req)
            .send()
            .await
            .map_err(|e| SummarizationFailed::new(classify_transport(&e), e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(200).collect();
            return Err(SummarizationFailed::new(
                classify_status(status),
                format!("HTTP {status}: {snippet}"),
            ));
        }

        let body: ChatResponse = resp
            .json()
            .await
            .map_err(|e| SummarizationFailed::new(classify_transport(&e), e))?;
        body.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| SummarizationFailed::invalid_response("empty completion"))
    }

    fn system_prompt(&self, kind: SourceKind) -> String {
        let what = match kind {
            SourceKind::Paper => "research paper",
            SourceKind::Repo => "open-source project",
        };
        format!(
            "You summarize a trending {what} for a daily technical digest. \
             Write in {lang}, as plain prose without headings or lists, \
             in at most {words} words. Cover what it is, what is new about it \
             and who would care.",
            lang = self.language,
            words = self.max_words,
        )
    }
}

#[async_trait]
impl Summarizer for OpenAiSummarizer {
    fn name(&self) -> &str {
        "openai"
    }

    async fn summarize(&self, item: &TrendingItem) -> Result<String, SummarizationFailed> {
        let text = prompt_text(item, self.max_input_chars)
            .ok_or_else(|| SummarizationFailed::invalid_response("item has no text"))?;
        self.chat(&self.system_prompt(item.source_kind), &text).await
    }

    async fn condense(&self, digest: &str) -> Result<String, SummarizationFailed> {
        let system = format!(
            "Condense each numbered entry below into one or two sentences in {}. \
             Keep the numbering and the order. Output only the list.",
            self.language
        );
        self.chat(&system, digest).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(classify_status(StatusCode::TOO_MANY_REQUESTS), FailureReason::RateLimited);
        assert_eq!(classify_status(StatusCode::SERVICE_UNAVAILABLE), FailureReason::RateLimited);
        assert_eq!(classify_status(StatusCode::UNAUTHORIZED), FailureReason::AuthError);
        assert_eq!(classify_status(StatusCode::FORBIDDEN), FailureReason::AuthError);
        assert_eq!(classify_status(StatusCode::GATEWAY_TIMEOUT), FailureReason::Timeout);
        assert_eq!(classify_status(StatusCode::BAD_GATEWAY), FailureReason::Timeout);
        assert_eq!(classify_status(StatusCode::BAD_REQUEST), FailureReason::InvalidResponse);
        assert_eq!(classify_status(StatusCode::NOT_FOUND), FailureReason::InvalidResponse);
    }
}
