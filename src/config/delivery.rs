// src/config/delivery.rs
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    pub enabled: bool,
    pub recipients: Vec<String>,
    /// `{date}` is replaced with the report date (YYYY-MM-DD).
    pub subject: String,
    /// Recipients per message; each batch goes out as Bcc.
    pub batch_size: usize,
    /// Pause between batches, keeps relays from throttling us.
    pub send_delay_ms: u64,
    /// Without SMTP settings the digest is only logged.
    pub smtp: Option<SmtpConfig>,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            recipients: Vec::new(),
            subject: "Daily trending digest for {date}".into(),
            batch_size: 1,
            send_delay_ms: 1_000,
            smtp: None,
        }
    }
}

impl DeliveryConfig {
    pub fn send_delay(&self) -> Duration {
        Duration::from_millis(self.send_delay_ms)
    }

    pub fn subject_for(&self, date: chrono::NaiveDate) -> String {
        self.subject
            .replace("{date}", &date.format("%Y-%m-%d").to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TlsMode {
    /// Implicit TLS (usually port 465).
    Wrapper,
    /// STARTTLS upgrade (usually port 587).
    Starttls,
    /// Plaintext, for local relays only.
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    #[serde(default)]
    pub port: Option<u16>,
    /// "ENV" means: read from SMTP_USER
    #[serde(default)]
    pub username: Option<String>,
    /// "ENV" means: read from SMTP_PASS
    #[serde(default)]
    pub password: Option<String>,
    pub from: String,
    #[serde(default = "default_tls")]
    pub tls: TlsMode,
    #[serde(default = "default_smtp_timeout")]
    pub timeout_secs: u64,
}

fn default_tls() -> TlsMode {
    TlsMode::Wrapper
}

fn default_smtp_timeout() -> u64 {
    30
}
