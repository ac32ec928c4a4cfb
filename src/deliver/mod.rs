// src/deliver/mod.rs
//! Delivery of a rendered report to a recipient list.
//!
//! A dispatcher reports per recipient batch; it never returns early on the
//! first failure. The pipeline treats any failed batch as non-fatal.

pub mod email;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::DeliveryConfig;
use crate::error::DeliveryFailed;
use crate::render::RenderedReport;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchResult {
    pub recipients: Vec<String>,
    /// `None` when the batch was accepted.
    pub error: Option<String>,
}

impl BatchResult {
    pub fn ok(recipients: Vec<String>) -> Self {
        Self {
            recipients,
            error: None,
        }
    }

    pub fn failed(recipients: Vec<String>, error: impl ToString) -> Self {
        Self {
            recipients,
            error: Some(error.to_string()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub batches: Vec<BatchResult>,
}

impl DeliveryReport {
    pub fn failed_batches(&self) -> impl Iterator<Item = &BatchResult> {
        self.batches.iter().filter(|b| b.error.is_some())
    }

    pub fn delivered_recipients(&self) -> usize {
        self.batches
            .iter()
            .filter(|b| b.error.is_none())
            .map(|b| b.recipients.len())
            .sum()
    }

    pub fn check(&self) -> Result<(), DeliveryFailed> {
        let failed = self.failed_batches().count();
        if failed == 0 {
            Ok(())
        } else {
            Err(DeliveryFailed {
                failed,
                total: self.batches.len(),
            })
        }
    }
}

#[async_trait]
pub trait Dispatcher: Send + Sync {
    fn name(&self) -> &str;
    async fn dispatch(&self, rendered: &RenderedReport, recipients: &[String]) -> DeliveryReport;
}

pub type DynDispatcher = Arc<dyn Dispatcher>;

/// Logs the digest instead of sending it.
pub struct LogDispatcher;

#[async_trait]
impl Dispatcher for LogDispatcher {
    fn name(&self) -> &str {
        "log"
    }

    async fn dispatch(&self, rendered: &RenderedReport, recipients: &[String]) -> DeliveryReport {
        tracing::info!(
            target: "deliver",
            date = %rendered.report_date,
            items = rendered.item_count,
            partial = rendered.partial,
            recipients = recipients.len(),
            "digest ready (log delivery, nothing sent)"
        );
        tracing::debug!(target: "deliver", "\n{}", rendered.human);
        DeliveryReport {
            batches: vec![BatchResult::ok(recipients.to_vec())],
        }
    }
}

pub fn from_config(cfg: &DeliveryConfig) -> anyhow::Result<DynDispatcher> {
    if !cfg.enabled {
        tracing::info!(target: "deliver", "delivery disabled, digests are only logged");
        return Ok(Arc::new(LogDispatcher));
    }
    match &cfg.smtp {
        Some(smtp) => Ok(Arc::new(email::EmailDispatcher::new(smtp, cfg)?)),
        None => {
            if !cfg.recipients.is_empty() {
                tracing::warn!(target: "deliver", "recipients configured but no [delivery.smtp]; digests are only logged");
            }
            Ok(Arc::new(LogDispatcher))
        }
    }
}
