//! Webhook receiver binary
//!
//! Listens for Stripe events on `POST /webhook` and writes failed payment
//! intents to the Notion transaction log.
//!
//! Environment variables:
//! - NOTION_TOKEN, TRANSACTION_LOG_DB_ID: transaction log access
//! - WEBHOOK_ENDPOINT_SECRET: signing secret (optional; unsigned payloads are trusted without it)
//! - PORT: listen port (default 4242)

use anyhow::Result;
use charge_ledger::config::{self, NotionConfig, WebhookConfig};
use charge_ledger::logger::TransactionLogger;
use charge_ledger::notion::{NotionClient, NotionTransactionLog};
use charge_ledger::webhook::{self, WebhookState};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    config::load_dotenv();
    charge_ledger::init_tracing();

    info!("Starting webhook receiver");

    let notion_config = NotionConfig::from_env()?;
    let webhook_config = WebhookConfig::from_env()?;

    info!("Configuration:");
    info!("  Transaction log: {}", notion_config.transaction_db_id);
    info!(
        "  Signing secret: {}",
        if webhook_config.endpoint_secret.is_some() { "(configured)" } else { "(not set - payloads are not verified)" }
    );
    info!("  Port: {}", webhook_config.port);

    let client = NotionClient::new(&notion_config)?;
    let store = Arc::new(NotionTransactionLog::new(
        client,
        notion_config.transaction_db_id.clone(),
    ));

    let state = Arc::new(WebhookState {
        logger: TransactionLogger::new(store),
        endpoint_secret: webhook_config.endpoint_secret,
        tolerance_secs: webhook_config.tolerance_secs,
    });

    let app = webhook::router(state);

    let addr = format!("0.0.0.0:{}", webhook_config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Running on {}", listener.local_addr()?);

    axum::serve(listener, app.into_make_service())
        .await
        .map_err(|e| anyhow::anyhow!("Server error: {}", e))
}
