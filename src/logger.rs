// Transaction logger: one normalized charge event in, one store row out

use crate::error::LedgerResult;
use crate::models::LogRequest;
use crate::store::{RecordFilter, TransactionStore};
use std::fmt;
use std::sync::Arc;
use tracing::{error, info};

/// What the logger did with a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogOutcome {
    Created { page_id: String },
    /// A row with the same charge id already exists; nothing was written
    AlreadyLogged,
}

impl fmt::Display for LogOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogOutcome::Created { .. } => f.write_str("Successful update!"),
            LogOutcome::AlreadyLogged => f.write_str("Already logged"),
        }
    }
}

pub struct TransactionLogger {
    store: Arc<dyn TransactionStore>,
    dedupe: bool,
}

impl TransactionLogger {
    pub fn new(store: Arc<dyn TransactionStore>) -> Self {
        Self { store, dedupe: true }
    }

    /// Disable the charge-id lookup done before each insert
    pub fn without_dedupe(mut self) -> Self {
        self.dedupe = false;
        self
    }

    /// Write one charge to the transaction log.
    ///
    /// When the request carries a charge id and a row with that id is already
    /// present, no row is written. The check and the insert are separate calls,
    /// so two concurrent runs can still both write.
    pub async fn log_charge(&self, request: LogRequest) -> LedgerResult<LogOutcome> {
        let record = request.into_record();
        info!("Logging charge '{}' for user {}", record.charge_id, record.user_id);

        if self.dedupe && !record.charge_id.is_empty() {
            let filter = RecordFilter::charge_id(record.charge_id.clone());
            let existing = self.store.query(Some(&filter), None).await.map_err(|e| {
                error!("Failed to look up charge {}: {}", record.charge_id, e);
                e
            })?;
            if !existing.records.is_empty() {
                info!("Charge {} already in transaction log, skipping", record.charge_id);
                return Ok(LogOutcome::AlreadyLogged);
            }
        }

        let page_id = self.store.insert(&record).await.map_err(|e| {
            error!("Failed to log charge {}: {}", record.charge_id, e);
            e
        })?;

        info!("Logged charge for {} : page {}", record.user_id, page_id);
        Ok(LogOutcome::Created { page_id })
    }
}
