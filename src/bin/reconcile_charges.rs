//! Reconciliation binary
//!
//! Lists recent Stripe charges and mirrors each one into the Notion
//! transaction log, skipping charges that are already there.

use anyhow::Result;
use charge_ledger::config::{self, NotionConfig, ReconcileConfig, StripeConfig};
use charge_ledger::logger::TransactionLogger;
use charge_ledger::notion::{NotionClient, NotionTransactionLog};
use charge_ledger::reconcile::ReconciliationPuller;
use charge_ledger::stripe::StripeClient;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    config::load_dotenv();
    charge_ledger::init_tracing();

    let stripe_config = StripeConfig::from_env()?;
    let notion_config = NotionConfig::from_env()?;
    let reconcile_config = ReconcileConfig::from_env()?;

    let gateway = Arc::new(StripeClient::new(&stripe_config)?);
    let store = Arc::new(NotionTransactionLog::new(
        NotionClient::new(&notion_config)?,
        notion_config.transaction_db_id.clone(),
    ));

    let puller = ReconciliationPuller::new(gateway, TransactionLogger::new(store), reconcile_config);
    let summary = puller.run().await?;

    info!(
        "Logged {} of {} charges ({} already present, {} failed)",
        summary.logged, summary.fetched, summary.duplicates, summary.failed
    );
    Ok(())
}
