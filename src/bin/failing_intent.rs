//! Failing payment intent binary
//!
//! Confirms one payment intent with a declining test card for a random test
//! user, which makes Stripe deliver a `payment_intent.payment_failed` webhook.

use anyhow::Result;
use charge_ledger::config::{self, StripeConfig};
use charge_ledger::generator;
use charge_ledger::stripe::StripeClient;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    config::load_dotenv();
    charge_ledger::init_tracing();

    let client = StripeClient::new(&StripeConfig::from_env()?)?;
    let mut rng = StdRng::from_entropy();

    let user = generator::random_user(&mut rng);
    match generator::trigger_failing_intent(&client, &mut rng, user).await {
        Err(e) => info!("Payment intent for {} declined as expected: {}", user, e),
        Ok(intent) => warn!(
            "Payment intent {} for {} was not declined (status {:?})",
            intent.id, user, intent.status
        ),
    }
    Ok(())
}
