//! Daily report binary
//!
//! Reads the whole transaction log back from Notion, aggregates it and writes
//! one new page to the daily report database.

use anyhow::Result;
use charge_ledger::config::{self, NotionConfig};
use charge_ledger::notion::{NotionClient, NotionReportDatabase, NotionTransactionLog};
use charge_ledger::report::ReportBuilder;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    config::load_dotenv();
    charge_ledger::init_tracing();

    let notion_config = NotionConfig::from_env()?;
    let report_db_id = notion_config.report_db_id()?.to_string();
    let client = NotionClient::new(&notion_config)?;

    let store = Arc::new(NotionTransactionLog::new(
        client.clone(),
        notion_config.transaction_db_id.clone(),
    ));
    let sink = Arc::new(NotionReportDatabase::new(client, report_db_id));

    let (report, page_id) = ReportBuilder::new(store, sink).run().await?;

    info!(
        "Report {}: total={}, successful={}, failed={}, revenue=${:.2}, risky users={}",
        page_id,
        report.total,
        report.successful,
        report.failed,
        report.revenue_usd,
        report.risky_users.len()
    );
    Ok(())
}
