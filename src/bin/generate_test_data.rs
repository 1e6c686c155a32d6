//! Test data binary
//!
//! Creates a batch of Stripe test-mode customers and charges (some declined,
//! some refunded) for the reconciliation and report runs to pick up.

use anyhow::Result;
use charge_ledger::config::{self, StripeConfig};
use charge_ledger::generator;
use charge_ledger::stripe::StripeClient;
use rand::rngs::StdRng;
use rand::SeedableRng;

#[tokio::main]
async fn main() -> Result<()> {
    config::load_dotenv();
    charge_ledger::init_tracing();

    let client = StripeClient::new(&StripeConfig::from_env()?)?;
    let mut rng = StdRng::from_entropy();

    generator::generate_charges(&client, &mut rng).await;
    Ok(())
}
