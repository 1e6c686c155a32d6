// Configuration loaded from the environment (.env is honoured)

use crate::error::{LedgerError, LedgerResult};
use std::time::Duration;

const DEFAULT_STRIPE_API_BASE: &str = "https://api.stripe.com";
const DEFAULT_NOTION_API_BASE: &str = "https://api.notion.com";
const DEFAULT_WEBHOOK_PORT: u16 = 4242;
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_RECONCILE_WINDOW_HOURS: i64 = 24;

/// Load `.env` if present. Safe to call more than once.
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn required(key: &'static str) -> LedgerResult<String> {
    match std::env::var(key) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(LedgerError::MissingConfig(key)),
    }
}

fn optional(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parsed<T>(key: &'static str, default: T) -> LedgerResult<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match optional(key) {
        Some(raw) => raw.trim().parse::<T>().map_err(|e| LedgerError::InvalidConfig {
            key,
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}

fn http_timeout() -> LedgerResult<Duration> {
    parsed("HTTP_TIMEOUT_SECS", DEFAULT_TIMEOUT_SECS).map(Duration::from_secs)
}

/// Credentials and endpoint for the payments API
#[derive(Debug, Clone)]
pub struct StripeConfig {
    pub secret_key: String,
    pub api_base: String,
    pub timeout: Duration,
}

impl StripeConfig {
    pub fn from_env() -> LedgerResult<Self> {
        Ok(Self {
            secret_key: required("STRIPE_SECRET_KEY")?,
            api_base: optional("STRIPE_API_BASE")
                .unwrap_or_else(|| DEFAULT_STRIPE_API_BASE.to_string()),
            timeout: http_timeout()?,
        })
    }
}

/// Credentials, endpoint and database ids for the document store
#[derive(Debug, Clone)]
pub struct NotionConfig {
    pub token: String,
    pub api_base: String,
    pub transaction_db_id: String,
    pub report_db_id: Option<String>,
    pub timeout: Duration,
}

impl NotionConfig {
    pub fn from_env() -> LedgerResult<Self> {
        Ok(Self {
            token: required("NOTION_TOKEN")?,
            api_base: optional("NOTION_API_BASE")
                .unwrap_or_else(|| DEFAULT_NOTION_API_BASE.to_string()),
            transaction_db_id: required("TRANSACTION_LOG_DB_ID")?,
            report_db_id: optional("DAILY_REPORT_DB_ID"),
            timeout: http_timeout()?,
        })
    }

    /// The report database id, required only by the report builder
    pub fn report_db_id(&self) -> LedgerResult<&str> {
        self.report_db_id
            .as_deref()
            .ok_or(LedgerError::MissingConfig("DAILY_REPORT_DB_ID"))
    }
}

/// Listener settings for the webhook receiver
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    /// Signing secret; when absent payloads are trusted as-is
    pub endpoint_secret: Option<String>,
    pub port: u16,
    pub tolerance_secs: i64,
}

impl WebhookConfig {
    pub fn from_env() -> LedgerResult<Self> {
        Ok(Self {
            endpoint_secret: optional("WEBHOOK_ENDPOINT_SECRET"),
            port: parsed("PORT", DEFAULT_WEBHOOK_PORT)?,
            tolerance_secs: parsed("WEBHOOK_TOLERANCE_SECS", crate::webhook::DEFAULT_TOLERANCE_SECS)?,
        })
    }
}

/// Settings for the reconciliation pull
#[derive(Debug, Clone)]
pub struct ReconcileConfig {
    /// Trailing window of charges to pull; `None` pulls the latest page regardless of age
    pub window: Option<chrono::Duration>,
    pub limit: u32,
}

impl ReconcileConfig {
    pub fn from_env() -> LedgerResult<Self> {
        let hours: i64 = parsed("RECONCILE_WINDOW_HOURS", DEFAULT_RECONCILE_WINDOW_HOURS)?;
        Ok(Self {
            window: (hours > 0).then(|| chrono::Duration::hours(hours)),
            limit: parsed("RECONCILE_LIMIT", crate::reconcile::DEFAULT_LIMIT)?,
        })
    }
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            window: Some(chrono::Duration::hours(DEFAULT_RECONCILE_WINDOW_HOURS)),
            limit: crate::reconcile::DEFAULT_LIMIT,
        }
    }
}
