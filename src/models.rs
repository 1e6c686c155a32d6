// Domain models for the charge ledger

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Currency assumed when a charge or row does not carry one
pub const BASE_CURRENCY: &str = "USD";

/// Provenance tag used when the caller does not supply one
pub const DEFAULT_TEST_RUN: &str = "daily_demo";

/// User id substituted when a stored row has no user
pub const UNKNOWN_USER: &str = "unknown_user";

/// Outcome of a charge as reported by the payment API.
///
/// Only `Succeeded` and `Failed` take part in report aggregation; any other
/// value is kept verbatim so a full scan still counts it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChargeStatus {
    Succeeded,
    Failed,
    Pending,
    Other(String),
}

impl ChargeStatus {
    pub fn as_str(&self) -> &str {
        match self {
            ChargeStatus::Succeeded => "succeeded",
            ChargeStatus::Failed => "failed",
            ChargeStatus::Pending => "pending",
            ChargeStatus::Other(s) => s,
        }
    }
}

impl From<&str> for ChargeStatus {
    fn from(value: &str) -> Self {
        match value {
            "succeeded" => ChargeStatus::Succeeded,
            "failed" => ChargeStatus::Failed,
            "pending" => ChargeStatus::Pending,
            other => ChargeStatus::Other(other.to_string()),
        }
    }
}

impl fmt::Display for ChargeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ChargeStatus {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ChargeStatus {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(ChargeStatus::from(s.as_str()))
    }
}

/// One row of the transaction log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub charge_id: String,
    pub user_id: String,
    pub amount: i64,
    pub currency: String,
    pub status: ChargeStatus,
    pub refunded: bool,
    /// Error text entries; the log stores each one as its own text segment
    pub error_types: Vec<String>,
    pub test_run: String,
    pub timestamp: DateTime<Utc>,
}

/// A normalized charge event handed to the logger.
///
/// Optional fields fall back to the logger defaults in [`LogRequest::into_record`].
#[derive(Debug, Clone)]
pub struct LogRequest {
    pub user_id: String,
    pub amount: i64,
    pub status: ChargeStatus,
    pub refunded: Option<bool>,
    pub charge_id: Option<String>,
    pub error_type: Option<String>,
    pub test_run: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub currency: Option<String>,
}

impl LogRequest {
    pub fn new(user_id: impl Into<String>, amount: i64, status: ChargeStatus) -> Self {
        Self {
            user_id: user_id.into(),
            amount,
            status,
            refunded: None,
            charge_id: None,
            error_type: None,
            test_run: None,
            timestamp: None,
            currency: None,
        }
    }

    pub fn into_record(self) -> TransactionRecord {
        TransactionRecord {
            charge_id: self.charge_id.unwrap_or_default(),
            user_id: self.user_id,
            amount: self.amount,
            currency: self
                .currency
                .map(|c| c.to_uppercase())
                .unwrap_or_else(|| BASE_CURRENCY.to_string()),
            status: self.status,
            refunded: self.refunded.unwrap_or(false),
            error_types: self.error_type.into_iter().collect(),
            test_run: self
                .test_run
                .unwrap_or_else(|| DEFAULT_TEST_RUN.to_string()),
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
        }
    }
}

/// Per-user counts over succeeded charges
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserStats {
    pub user: String,
    pub total: u32,
    pub refunded: u32,
}

impl UserStats {
    pub fn refund_ratio(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        f64::from(self.refunded) / f64::from(self.total)
    }
}

impl fmt::Display for UserStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (Refunded {} of {})",
            self.user, self.refunded, self.total
        )
    }
}

/// Summary written once per report run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyReport {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub revenue_usd: f64,
    pub risky_users: Vec<UserStats>,
    pub top_errors: Vec<String>,
}

impl DailyReport {
    /// Failed share of all charges, rounded to two decimals.
    ///
    /// `None` when the store holds no charges at all.
    pub fn failure_ratio(&self) -> Option<f64> {
        if self.total == 0 {
            return None;
        }
        let ratio = self.failed as f64 / self.total as f64;
        Some((ratio * 100.0).round() / 100.0)
    }

    /// Refunds attributed to the flagged users
    pub fn total_refunded(&self) -> u32 {
        self.risky_users.iter().map(|u| u.refunded).sum()
    }

    pub fn top_error(&self) -> Option<&str> {
        self.top_errors.first().map(String::as_str)
    }
}
