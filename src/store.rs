// Storage seams for the transaction log and the report database

use crate::error::{LedgerError, LedgerResult};
use crate::models::{ChargeStatus, DailyReport, TransactionRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Mutex;
use tracing::debug;

/// Predicate over transaction rows.
///
/// Every populated field must match (logical AND).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordFilter {
    pub status: Option<ChargeStatus>,
    pub refunded: Option<bool>,
    pub charge_id: Option<String>,
}

impl RecordFilter {
    pub fn status(status: ChargeStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn succeeded_not_refunded() -> Self {
        Self {
            status: Some(ChargeStatus::Succeeded),
            refunded: Some(false),
            charge_id: None,
        }
    }

    pub fn charge_id(id: impl Into<String>) -> Self {
        Self {
            charge_id: Some(id.into()),
            ..Default::default()
        }
    }

    pub fn matches(&self, record: &TransactionRecord) -> bool {
        self.status.as_ref().map_or(true, |s| *s == record.status)
            && self.refunded.map_or(true, |r| r == record.refunded)
            && self
                .charge_id
                .as_ref()
                .map_or(true, |id| *id == record.charge_id)
    }
}

/// One page of a cursor-paginated query
#[derive(Debug, Clone, Default)]
pub struct RecordPage {
    pub records: Vec<TransactionRecord>,
    pub next_cursor: Option<String>,
    pub has_more: bool,
}

/// Row store that the logger writes to and the report builder reads from
#[async_trait]
pub trait TransactionStore: Send + Sync {
    /// Create one row and return the id the store assigned to it
    async fn insert(&self, record: &TransactionRecord) -> LedgerResult<String>;

    async fn query(
        &self,
        filter: Option<&RecordFilter>,
        cursor: Option<&str>,
    ) -> LedgerResult<RecordPage>;
}

/// Destination for finished daily reports
#[async_trait]
pub trait ReportSink: Send + Sync {
    async fn publish(
        &self,
        report: &DailyReport,
        generated_at: DateTime<Utc>,
    ) -> LedgerResult<String>;
}

/// Read every row matching `filter`, following continuation cursors until the
/// store reports no further pages.
pub async fn fetch_all<S>(store: &S, filter: Option<&RecordFilter>) -> LedgerResult<Vec<TransactionRecord>>
where
    S: TransactionStore + ?Sized,
{
    let mut records = Vec::new();
    let mut cursor: Option<String> = None;

    loop {
        let page = store.query(filter, cursor.as_deref()).await?;
        debug!("Fetched page of {} rows", page.records.len());
        records.extend(page.records);

        cursor = if page.has_more { page.next_cursor } else { None };
        if cursor.is_none() {
            break;
        }
    }

    Ok(records)
}

/// In-process store used by the tests.
///
/// Pages are cut at `page_size` rows and the cursor is the offset of the next row.
pub struct MemoryStore {
    records: Mutex<Vec<TransactionRecord>>,
    reports: Mutex<Vec<DailyReport>>,
    page_size: usize,
    fail_writes: bool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_page_size(100)
    }

    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            reports: Mutex::new(Vec::new()),
            page_size: page_size.max(1),
            fail_writes: false,
        }
    }

    /// A store whose writes always fail, for exercising error paths
    pub fn failing() -> Self {
        Self {
            fail_writes: true,
            ..Self::new()
        }
    }

    pub fn seed(&self, records: impl IntoIterator<Item = TransactionRecord>) {
        self.lock_records().extend(records);
    }

    pub fn records(&self) -> Vec<TransactionRecord> {
        self.lock_records().clone()
    }

    pub fn reports(&self) -> Vec<DailyReport> {
        self.reports
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn lock_records(&self) -> std::sync::MutexGuard<'_, Vec<TransactionRecord>> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn rejected() -> LedgerError {
        LedgerError::Api {
            service: "memory",
            status: 503,
            message: "store is rejecting writes".to_string(),
        }
    }
}

#[async_trait]
impl TransactionStore for MemoryStore {
    async fn insert(&self, record: &TransactionRecord) -> LedgerResult<String> {
        if self.fail_writes {
            return Err(Self::rejected());
        }
        let mut records = self.lock_records();
        records.push(record.clone());
        Ok(format!("mem-{}", records.len()))
    }

    async fn query(
        &self,
        filter: Option<&RecordFilter>,
        cursor: Option<&str>,
    ) -> LedgerResult<RecordPage> {
        let start = match cursor {
            Some(c) => c
                .parse::<usize>()
                .map_err(|_| LedgerError::malformed(c, "invalid cursor"))?,
            None => 0,
        };

        let matching: Vec<TransactionRecord> = self
            .lock_records()
            .iter()
            .filter(|r| filter.map_or(true, |f| f.matches(r)))
            .cloned()
            .collect();

        let end = (start + self.page_size).min(matching.len());
        let has_more = end < matching.len();
        let records = matching.get(start..end).map(<[_]>::to_vec).unwrap_or_default();

        Ok(RecordPage {
            records,
            next_cursor: has_more.then(|| end.to_string()),
            has_more,
        })
    }
}

#[async_trait]
impl ReportSink for MemoryStore {
    async fn publish(
        &self,
        report: &DailyReport,
        _generated_at: DateTime<Utc>,
    ) -> LedgerResult<String> {
        if self.fail_writes {
            return Err(Self::rejected());
        }
        let mut reports = self
            .reports
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        reports.push(report.clone());
        Ok(format!("report-{}", reports.len()))
    }
}
