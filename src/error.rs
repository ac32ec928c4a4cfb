// src/error.rs
//! Domain error taxonomy. Each failure is contained at the smallest unit:
//! item (`SummarizationFailed`), source (`SourceUnavailable`), tick (`EmptyReport`,
//! `TickError`). Delivery problems (`DeliveryFailed`) are logged, never fatal.

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A data source could not produce items. The source counts as empty for this run.
#[derive(Debug, Clone, Error)]
#[error("source '{source_name}' unavailable: {reason}")]
pub struct SourceUnavailable {
    pub source_name: String,
    pub reason: String,
}

impl SourceUnavailable {
    pub fn new(source_name: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self {
            source_name: source_name.into(),
            reason: reason.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureReason {
    RateLimited,
    Timeout,
    InvalidResponse,
    AuthError,
}

impl FailureReason {
    /// Only rate limiting and timeouts are worth another attempt.
    pub fn is_transient(self) -> bool {
        matches!(self, FailureReason::RateLimited | FailureReason::Timeout)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FailureReason::RateLimited => "rate_limited",
            FailureReason::Timeout => "timeout",
            FailureReason::InvalidResponse => "invalid_response",
            FailureReason::AuthError => "auth_error",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Error)]
#[error("summarization failed ({reason}): {detail}")]
pub struct SummarizationFailed {
    pub reason: FailureReason,
    pub detail: String,
}

impl SummarizationFailed {
    pub fn new(reason: FailureReason, detail: impl fmt::Display) -> Self {
        Self {
            reason,
            detail: detail.to_string(),
        }
    }

    pub fn rate_limited(detail: impl fmt::Display) -> Self {
        Self::new(FailureReason::RateLimited, detail)
    }

    pub fn timeout(detail: impl fmt::Display) -> Self {
        Self::new(FailureReason::Timeout, detail)
    }

    pub fn invalid_response(detail: impl fmt::Display) -> Self {
        Self::new(FailureReason::InvalidResponse, detail)
    }

    pub fn auth(detail: impl fmt::Display) -> Self {
        Self::new(FailureReason::AuthError, detail)
    }
}

/// No source produced a single item; nothing is rendered or delivered for this tick.
#[derive(Debug, Clone, Error)]
#[error("empty report for {date}: {failed_sources} of {total_sources} sources failed, 0 items")]
pub struct EmptyReport {
    pub date: NaiveDate,
    pub failed_sources: usize,
    pub total_sources: usize,
}

#[derive(Debug, Clone, Error)]
#[error("delivery failed for {failed} of {total} recipient batches")]
pub struct DeliveryFailed {
    pub failed: usize,
    pub total: usize,
}

/// Failure of one Triggering cycle. The scheduler logs it and keeps going.
#[derive(Debug, Error)]
pub enum TickError {
    #[error(transparent)]
    Empty(#[from] EmptyReport),

    #[error("writing artifacts for {date} failed: {source}")]
    Artifacts {
        date: NaiveDate,
        #[source]
        source: std::io::Error,
    },

    #[error("rendering report for {date} failed: {source}")]
    Render {
        date: NaiveDate,
        #[source]
        source: serde_json::Error,
    },
}
