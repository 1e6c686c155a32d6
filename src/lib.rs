// Charge ledger: mirrors Stripe charges into Notion and reports on them
//
// - `webhook`: signed event receiver that logs failed payment intents
// - `reconcile`: periodic re-pull of recent charges
// - `logger`: normalized charge -> transaction log row
// - `report`: daily aggregation over the transaction log
// - `generator`: synthetic test-mode traffic

pub mod config;
pub mod error;
pub mod generator;
pub mod logger;
pub mod models;
pub mod notion;
pub mod reconcile;
pub mod report;
pub mod store;
pub mod stripe;
pub mod webhook;

pub use error::{LedgerError, LedgerResult};

/// Initialize logging for a binary. `RUST_LOG` overrides the defaults.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new("charge_ledger=info,tower_http=info,webhook_server=info,reconcile_charges=info,daily_report=info,generate_test_data=info,failing_intent=info")
    });

    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .with_env_filter(filter)
        .init();
}
