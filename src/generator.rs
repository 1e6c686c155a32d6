// Synthetic payment traffic against Stripe test mode

use crate::error::LedgerResult;
use crate::stripe::{Charge, Metadata, NewCharge, NewCustomer, NewPaymentIntent, PaymentGateway, PaymentIntent};
use rand::seq::SliceRandom;
use rand::Rng;
use tracing::{error, info};

/// Test customer with the probability that one of their charges is declined
#[derive(Debug, Clone, Copy)]
pub struct TestUser {
    pub id: &'static str,
    pub failure_rate: f64,
}

pub const TEST_USERS: [TestUser; 9] = [
    TestUser { id: "user1@example.com", failure_rate: 0.1 },
    TestUser { id: "user2@example.com", failure_rate: 0.6 },
    TestUser { id: "user3@example.com", failure_rate: 0.2 },
    TestUser { id: "user4@example.com", failure_rate: 0.2 },
    TestUser { id: "user5@example.com", failure_rate: 0.4 },
    TestUser { id: "user6@example.com", failure_rate: 0.6 },
    TestUser { id: "user7@example.com", failure_rate: 0.1 },
    TestUser { id: "user8@example.com", failure_rate: 0.3 },
    TestUser { id: "user9@example.com", failure_rate: 0.7 },
];

// Stripe test card tokens
pub const TOKEN_SUCCESS: &str = "tok_visa";
pub const TOKEN_DECLINED: &str = "tok_chargeDeclined";

/// Payment methods that make a confirmed intent fail
pub const FAILING_PAYMENT_METHODS: [&str; 4] = [
    "pm_card_chargeDeclined",
    "pm_card_chargeDeclinedInsufficientFunds",
    "pm_card_chargeDeclinedExpiredCard",
    "pm_card_chargeDeclinedIncorrectCvc",
];

pub const CURRENCIES: [&str; 3] = ["usd", "eur", "gbp"];

const ATTEMPTS_PER_USER: usize = 15;
const MAX_CHARGES: usize = 100;
const REFUND_RATE: f64 = 0.25;
const FAILING_INTENT_AMOUNT: i64 = 2000;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenerationSummary {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub refunded: usize,
}

fn metadata(user_id: &str, test_run: &str) -> Metadata {
    let mut m = Metadata::new();
    m.insert("user_id".to_string(), user_id.to_string());
    m.insert("test_run".to_string(), test_run.to_string());
    m
}

/// Create a customer carrying `token` as its default source, then charge it
async fn create_charge<R: Rng + ?Sized>(
    gateway: &dyn PaymentGateway,
    rng: &mut R,
    email: &str,
    token: &str,
) -> LedgerResult<Charge> {
    let customer = gateway
        .create_customer(&NewCustomer {
            email: email.to_string(),
            source: token.to_string(),
            metadata: metadata(email, "daily_report_demo"),
        })
        .await?;

    let currency = CURRENCIES.choose(rng).copied().unwrap_or("usd");
    gateway
        .create_charge(&NewCharge {
            amount: 1000 + rng.gen_range(0..5000),
            currency: currency.to_string(),
            customer: customer.id,
            metadata: metadata(email, "daily_report_demo"),
        })
        .await
}

/// Run the synthetic charge batch: up to fifteen attempts per test user,
/// stopping after one hundred attempts overall. Roughly a quarter of the
/// successful charges are refunded.
pub async fn generate_charges<R: Rng + ?Sized>(
    gateway: &dyn PaymentGateway,
    rng: &mut R,
) -> GenerationSummary {
    let mut summary = GenerationSummary::default();

    'users: for user in TEST_USERS.iter() {
        for _ in 0..ATTEMPTS_PER_USER {
            let should_fail = rng.gen::<f64>() < user.failure_rate;
            let token = if should_fail { TOKEN_DECLINED } else { TOKEN_SUCCESS };

            match create_charge(gateway, rng, user.id, token).await {
                Ok(charge) => {
                    summary.succeeded += 1;
                    if !should_fail && rng.gen::<f64>() < REFUND_RATE {
                        match gateway.create_refund(&charge.id).await {
                            Ok(refund) => {
                                info!("Refunded {} ({})", charge.id, refund.id);
                                summary.refunded += 1;
                            }
                            Err(e) => error!("[FAIL] {}: {}", user.id, e),
                        }
                    }
                }
                Err(e) => {
                    error!("[FAIL] {}: {}", user.id, e);
                    summary.failed += 1;
                }
            }

            summary.attempted += 1;
            if summary.attempted >= MAX_CHARGES {
                break 'users;
            }
        }
    }

    info!(
        "Generated {} charges: {} succeeded, {} failed, {} refunded",
        summary.attempted, summary.succeeded, summary.failed, summary.refunded
    );
    summary
}

/// Pick a random test user
pub fn random_user<R: Rng + ?Sized>(rng: &mut R) -> &'static str {
    TEST_USERS
        .choose(rng)
        .map(|u| u.id)
        .unwrap_or(TEST_USERS[0].id)
}

/// Confirm a payment intent with a card that always fails, so the payment
/// API emits a `payment_intent.payment_failed` webhook.
pub async fn trigger_failing_intent<R: Rng + ?Sized>(
    gateway: &dyn PaymentGateway,
    rng: &mut R,
    user_id: &str,
) -> LedgerResult<PaymentIntent> {
    let payment_method = FAILING_PAYMENT_METHODS
        .choose(rng)
        .copied()
        .unwrap_or(FAILING_PAYMENT_METHODS[0]);

    let result = gateway
        .create_payment_intent(&NewPaymentIntent {
            amount: FAILING_INTENT_AMOUNT,
            currency: "usd".to_string(),
            payment_method: payment_method.to_string(),
            confirm: true,
            metadata: metadata(user_id, "webhook_demo"),
            automatic_payment_methods: true,
            allow_redirects: false,
        })
        .await;

    match &result {
        Ok(intent) => info!("Intent created: {}", intent.id),
        Err(e) => error!("[FAIL] {}: {}", user_id, e),
    }
    result
}
