// src/deliver/email.rs
//! SMTP delivery via lettre's async tokio transport.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use lettre::message::{Mailbox, Message, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};
use metrics::counter;
use once_cell::sync::Lazy;
use regex::Regex;

use super::{BatchResult, DeliveryReport, Dispatcher};
use crate::config::{DeliveryConfig, SmtpConfig, TlsMode};
use crate::render::RenderedReport;

pub struct EmailDispatcher {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    delivery: DeliveryConfig,
}

impl EmailDispatcher {
    pub fn new(smtp: &SmtpConfig, delivery: &DeliveryConfig) -> Result<Self> {
        let mut builder = match smtp.tls {
            TlsMode::Wrapper => AsyncSmtpTransport::<Tokio1Executor>::relay(&smtp.host)
                .with_context(|| format!("invalid SMTP host '{}'", smtp.host))?,
            TlsMode::Starttls => AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&smtp.host)
                .with_context(|| format!("invalid SMTP host '{}'", smtp.host))?,
            TlsMode::None => AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&smtp.host),
        };
        if let Some(port) = smtp.port {
            builder = builder.port(port);
        }
        if let (Some(user), Some(pass)) = (&smtp.username, &smtp.password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }
        let mailer = builder
            .timeout(Some(Duration::from_secs(smtp.timeout_secs)))
            .build();

        let from: Mailbox = smtp
            .from
            .parse()
            .with_context(|| format!("invalid sender address '{}'", smtp.from))?;

        Ok(Self {
            mailer,
            from,
            delivery: delivery.clone(),
        })
    }

    fn build_message(&self, rendered: &RenderedReport, batch: &[Mailbox]) -> Result<Message> {
        let mut builder = Message::builder()
            .from(self.from.clone())
            .subject(self.delivery.subject_for(rendered.report_date));
        match batch {
            [single] => builder = builder.to(single.clone()),
            many => {
                // Recipients of a shared batch do not see each other.
                builder = builder.to(self.from.clone());
                for mb in many {
                    builder = builder.bcc(mb.clone());
                }
            }
        }
        builder
            .multipart(MultiPart::alternative_plain_html(
                rendered.human.clone(),
                markdown_to_html(&rendered.human),
            ))
            .context("build email")
    }
}

#[async_trait]
impl Dispatcher for EmailDispatcher {
    fn name(&self) -> &str {
        "smtp"
    }

    async fn dispatch(&self, rendered: &RenderedReport, recipients: &[String]) -> DeliveryReport {
        let mut report = DeliveryReport::default();

        // Unparsable addresses fail on their own, the rest still go out.
        let mut valid: Vec<(String, Mailbox)> = Vec::with_capacity(recipients.len());
        for r in recipients {
            match r.parse::<Mailbox>() {
                Ok(mb) => valid.push((r.clone(), mb)),
                Err(e) => {
                    counter!("digest_delivery_batches_total", "outcome" => "failed").increment(1);
                    tracing::warn!(target: "deliver", recipient = %r, error = %e, "invalid recipient address");
                    report
                        .batches
                        .push(BatchResult::failed(vec![r.clone()], format!("invalid address: {e}")));
                }
            }
        }

        let delay = self.delivery.send_delay();
        for (i, chunk) in valid.chunks(self.delivery.batch_size.max(1)).enumerate() {
            if i > 0 && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let names: Vec<String> = chunk.iter().map(|(s, _)| s.clone()).collect();
            let boxes: Vec<Mailbox> = chunk.iter().map(|(_, mb)| mb.clone()).collect();

            let sent = match self.build_message(rendered, &boxes) {
                Ok(msg) => self.mailer.send(msg).await.map(|_| ()).map_err(anyhow::Error::from),
                Err(e) => Err(e),
            };
            match sent {
                Ok(()) => {
                    counter!("digest_delivery_batches_total", "outcome" => "ok").increment(1);
                    tracing::info!(target: "deliver", recipients = names.len(), "digest email sent");
                    report.batches.push(BatchResult::ok(names));
                }
                Err(e) => {
                    counter!("digest_delivery_batches_total", "outcome" => "failed").increment(1);
                    tracing::warn!(target: "deliver", recipients = ?names, error = %e, "digest email failed");
                    report.batches.push(BatchResult::failed(names, format!("{e:#}")));
                }
            }
        }
        report
    }
}

// Spans skip backslash-escaped characters; RE_UNESCAPE drops the backslashes afterwards.
static RE_LINK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[((?:\\.|[^\]\\])+)\]\(([^)\s]+)\)").unwrap());
static RE_BOLD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*\*((?:\\.|[^*\\])+)\*\*").unwrap());
static RE_EM: Lazy<Regex> = Lazy::new(|| Regex::new(r"(^|\s)_((?:\\.|[^_\\])+)_").unwrap());
static RE_UNESCAPE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\\([\\`*_\[\]()#])").unwrap());

/// Minimal Markdown -> HTML for the digest layout (headings, quotes, links, emphasis).
pub fn markdown_to_html(md: &str) -> String {
    let mut html = String::from("<html><body style=\"font-family:sans-serif;max-width:760px\">\n");
    for line in md.lines() {
        let escaped = html_escape::encode_text(line.trim_end()).to_string();
        let inline = |s: &str| {
            let s = RE_LINK.replace_all(s, r#"<a href="$2">$1</a>"#);
            let s = RE_BOLD.replace_all(&s, "<strong>$1</strong>");
            let s = RE_EM.replace_all(&s, "$1<em>$2</em>");
            RE_UNESCAPE.replace_all(&s, "$1").into_owned()
        };
        let out = if let Some(rest) = escaped.strip_prefix("### ") {
            format!("<h3>{}</h3>", inline(rest))
        } else if let Some(rest) = escaped.strip_prefix("## ") {
            format!("<h2>{}</h2>", inline(rest))
        } else if let Some(rest) = escaped.strip_prefix("# ") {
            format!("<h1>{}</h1>", inline(rest))
        } else if let Some(rest) = escaped.strip_prefix("&gt; ") {
            format!("<blockquote>{}</blockquote>", inline(rest))
        } else if escaped.is_empty() {
            continue;
        } else {
            format!("<p>{}</p>", inline(&escaped))
        };
        html.push_str(&out);
        html.push('\n');
    }
    html.push_str("</body></html>\n");
    html
}
