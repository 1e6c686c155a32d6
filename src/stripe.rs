// Stripe API client: customers, charges, refunds and payment intents

use crate::config::StripeConfig;
use crate::error::{LedgerError, LedgerResult};
use crate::models::ChargeStatus;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client as HttpClient;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::{debug, warn};

pub type Metadata = HashMap<String, String>;

#[derive(Debug, Clone, Deserialize)]
pub struct Customer {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Charge {
    pub id: String,
    pub amount: i64,
    #[serde(default)]
    pub currency: Option<String>,
    pub status: ChargeStatus,
    #[serde(default)]
    pub refunded: bool,
    pub created: i64,
    #[serde(default)]
    pub failure_message: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Refund {
    pub id: String,
    #[serde(default)]
    pub charge: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LastPaymentError {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentIntent {
    pub id: String,
    #[serde(default)]
    pub amount: Option<i64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub created: Option<i64>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub last_payment_error: Option<LastPaymentError>,
    /// Charge created by the most recent confirmation attempt
    #[serde(default)]
    pub latest_charge: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ListResponse<T> {
    data: Vec<T>,
    #[serde(default)]
    has_more: bool,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
}

// ============================================================================
// Request parameters
// ============================================================================

fn push_metadata(params: &mut Vec<(String, String)>, metadata: &Metadata) {
    let mut keys: Vec<&String> = metadata.keys().collect();
    keys.sort();
    for key in keys {
        params.push((format!("metadata[{}]", key), metadata[key].clone()));
    }
}

#[derive(Debug, Clone)]
pub struct NewCustomer {
    pub email: String,
    /// Card token attached as the default source
    pub source: String,
    pub metadata: Metadata,
}

impl NewCustomer {
    pub fn form_params(&self) -> Vec<(String, String)> {
        let mut params = vec![
            ("email".to_string(), self.email.clone()),
            ("source".to_string(), self.source.clone()),
        ];
        push_metadata(&mut params, &self.metadata);
        params
    }
}

#[derive(Debug, Clone)]
pub struct NewCharge {
    pub amount: i64,
    pub currency: String,
    pub customer: String,
    pub metadata: Metadata,
}

impl NewCharge {
    pub fn form_params(&self) -> Vec<(String, String)> {
        let mut params = vec![
            ("amount".to_string(), self.amount.to_string()),
            ("currency".to_string(), self.currency.clone()),
            ("customer".to_string(), self.customer.clone()),
        ];
        push_metadata(&mut params, &self.metadata);
        params
    }
}

#[derive(Debug, Clone)]
pub struct NewPaymentIntent {
    pub amount: i64,
    pub currency: String,
    pub payment_method: String,
    pub confirm: bool,
    pub metadata: Metadata,
    pub automatic_payment_methods: bool,
    /// Sent as `allow_redirects=never` when false
    pub allow_redirects: bool,
}

impl NewPaymentIntent {
    pub fn form_params(&self) -> Vec<(String, String)> {
        let mut params = vec![
            ("amount".to_string(), self.amount.to_string()),
            ("currency".to_string(), self.currency.clone()),
            ("payment_method".to_string(), self.payment_method.clone()),
            ("confirm".to_string(), self.confirm.to_string()),
        ];
        if self.automatic_payment_methods {
            params.push((
                "automatic_payment_methods[enabled]".to_string(),
                "true".to_string(),
            ));
            let redirects = if self.allow_redirects { "always" } else { "never" };
            params.push((
                "automatic_payment_methods[allow_redirects]".to_string(),
                redirects.to_string(),
            ));
        }
        push_metadata(&mut params, &self.metadata);
        params
    }
}

#[derive(Debug, Clone)]
pub struct ChargeListParams {
    pub limit: u32,
    pub created_gte: Option<DateTime<Utc>>,
    pub created_lte: Option<DateTime<Utc>>,
}

impl ChargeListParams {
    pub fn query_params(&self) -> Vec<(String, String)> {
        let mut params = vec![("limit".to_string(), self.limit.to_string())];
        if let Some(gte) = self.created_gte {
            params.push(("created[gte]".to_string(), gte.timestamp().to_string()));
        }
        if let Some(lte) = self.created_lte {
            params.push(("created[lte]".to_string(), lte.timestamp().to_string()));
        }
        params
    }
}

// ============================================================================
// Gateway
// ============================================================================

/// The payment API operations the producers and the puller depend on
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_customer(&self, params: &NewCustomer) -> LedgerResult<Customer>;

    async fn create_charge(&self, params: &NewCharge) -> LedgerResult<Charge>;

    async fn create_refund(&self, charge_id: &str) -> LedgerResult<Refund>;

    async fn create_payment_intent(&self, params: &NewPaymentIntent) -> LedgerResult<PaymentIntent>;

    async fn list_charges(&self, params: &ChargeListParams) -> LedgerResult<Vec<Charge>>;
}

#[derive(Clone)]
pub struct StripeClient {
    http_client: HttpClient,
    api_base: String,
    secret_key: String,
}

impl StripeClient {
    pub fn new(config: &StripeConfig) -> LedgerResult<Self> {
        let http_client = HttpClient::builder().timeout(config.timeout).build()?;
        Ok(Self {
            http_client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            secret_key: config.secret_key.clone(),
        })
    }

    async fn post_form<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        params: &[(String, String)],
    ) -> LedgerResult<T> {
        debug!("POST {} ({} params)", path, params.len());
        let resp = self
            .http_client
            .post(format!("{}{}", self.api_base, path))
            .basic_auth(&self.secret_key, None::<&str>)
            .form(params)
            .send()
            .await?;
        Self::parse_response(resp).await
    }

    async fn get<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        params: &[(String, String)],
    ) -> LedgerResult<T> {
        debug!("GET {}", path);
        let resp = self
            .http_client
            .get(format!("{}{}", self.api_base, path))
            .basic_auth(&self.secret_key, None::<&str>)
            .query(params)
            .send()
            .await?;
        Self::parse_response(resp).await
    }

    async fn parse_response<T: serde::de::DeserializeOwned>(
        resp: reqwest::Response,
    ) -> LedgerResult<T> {
        let status = resp.status();
        let bytes = resp.bytes().await?;

        if !status.is_success() {
            let message = match serde_json::from_slice::<ErrorEnvelope>(&bytes) {
                Ok(env) => {
                    let kind = env.error.kind.unwrap_or_else(|| "api_error".to_string());
                    let text = env.error.message.unwrap_or_default();
                    format!("{}: {}", kind, text)
                }
                Err(_) => String::from_utf8_lossy(&bytes).into_owned(),
            };
            warn!("Stripe returned {}: {}", status, message);
            return Err(LedgerError::Api {
                service: "stripe",
                status: status.as_u16(),
                message,
            });
        }

        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[async_trait]
impl PaymentGateway for StripeClient {
    async fn create_customer(&self, params: &NewCustomer) -> LedgerResult<Customer> {
        self.post_form("/v1/customers", &params.form_params()).await
    }

    async fn create_charge(&self, params: &NewCharge) -> LedgerResult<Charge> {
        self.post_form("/v1/charges", &params.form_params()).await
    }

    async fn create_refund(&self, charge_id: &str) -> LedgerResult<Refund> {
        let params = vec![("charge".to_string(), charge_id.to_string())];
        self.post_form("/v1/refunds", &params).await
    }

    async fn create_payment_intent(&self, params: &NewPaymentIntent) -> LedgerResult<PaymentIntent> {
        self.post_form("/v1/payment_intents", &params.form_params()).await
    }

    async fn list_charges(&self, params: &ChargeListParams) -> LedgerResult<Vec<Charge>> {
        let list: ListResponse<Charge> = self.get("/v1/charges", &params.query_params()).await?;
        if list.has_more {
            debug!("More charges available beyond limit {}", params.limit);
        }
        Ok(list.data)
    }
}

/// Scripted gateway for unit tests
#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct FakeGateway {
        pub charges: Vec<Charge>,
        pub created_charges: Mutex<Vec<NewCharge>>,
        pub refunds: Mutex<Vec<String>>,
        pub intents: Mutex<Vec<NewPaymentIntent>>,
        pub list_calls: Mutex<Vec<ChargeListParams>>,
    }

    fn declined_error() -> LedgerError {
        LedgerError::Api {
            service: "stripe",
            status: 402,
            message: "card_error: Your card was declined.".to_string(),
        }
    }

    #[async_trait]
    impl PaymentGateway for FakeGateway {
        async fn create_customer(&self, params: &NewCustomer) -> LedgerResult<Customer> {
            if params.source != "tok_visa" {
                return Err(declined_error());
            }
            Ok(Customer {
                id: format!("cus_{}", params.email),
                email: Some(params.email.clone()),
            })
        }

        async fn create_charge(&self, params: &NewCharge) -> LedgerResult<Charge> {
            let mut created = self.created_charges.lock().unwrap();
            created.push(params.clone());
            Ok(Charge {
                id: format!("ch_{}", created.len()),
                amount: params.amount,
                currency: Some(params.currency.clone()),
                status: ChargeStatus::Succeeded,
                refunded: false,
                created: 1_700_000_000,
                failure_message: None,
                metadata: params.metadata.clone(),
            })
        }

        async fn create_refund(&self, charge_id: &str) -> LedgerResult<Refund> {
            self.refunds.lock().unwrap().push(charge_id.to_string());
            Ok(Refund {
                id: format!("re_{}", charge_id),
                charge: Some(charge_id.to_string()),
                status: Some("succeeded".to_string()),
            })
        }

        async fn create_payment_intent(&self, params: &NewPaymentIntent) -> LedgerResult<PaymentIntent> {
            self.intents.lock().unwrap().push(params.clone());
            Err(declined_error())
        }

        async fn list_charges(&self, params: &ChargeListParams) -> LedgerResult<Vec<Charge>> {
            self.list_calls.lock().unwrap().push(params.clone());
            Ok(self.charges.iter().take(params.limit as usize).cloned().collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn meta(user: &str) -> Metadata {
        let mut m = Metadata::new();
        m.insert("user_id".to_string(), user.to_string());
        m.insert("test_run".to_string(), "daily_report_demo".to_string());
        m
    }

    #[test]
    fn test_charge_params_flatten_metadata() {
        let params = NewCharge {
            amount: 1500,
            currency: "eur".to_string(),
            customer: "cus_1".to_string(),
            metadata: meta("user1@example.com"),
        }
        .form_params();

        assert_eq!(params[0], ("amount".to_string(), "1500".to_string()));
        assert!(params.contains(&("metadata[user_id]".to_string(), "user1@example.com".to_string())));
        assert!(params.contains(&("metadata[test_run]".to_string(), "daily_report_demo".to_string())));
    }

    #[test]
    fn test_payment_intent_params_disable_redirects() {
        let params = NewPaymentIntent {
            amount: 2000,
            currency: "usd".to_string(),
            payment_method: "pm_card_chargeDeclined".to_string(),
            confirm: true,
            metadata: Metadata::new(),
            automatic_payment_methods: true,
            allow_redirects: false,
        }
        .form_params();

        assert!(params.contains(&("confirm".to_string(), "true".to_string())));
        assert!(params.contains(&(
            "automatic_payment_methods[allow_redirects]".to_string(),
            "never".to_string()
        )));
    }

    #[test]
    fn test_list_params_include_window() {
        let lte = Utc.with_ymd_and_hms(2025, 1, 2, 0, 0, 0).unwrap();
        let params = ChargeListParams {
            limit: 100,
            created_gte: Some(lte - chrono::Duration::hours(24)),
            created_lte: Some(lte),
        }
        .query_params();

        assert_eq!(params[0], ("limit".to_string(), "100".to_string()));
        assert_eq!(params[1], ("created[gte]".to_string(), "1735689600".to_string()));
        assert_eq!(params[2], ("created[lte]".to_string(), "1735776000".to_string()));
    }

    #[test]
    fn test_charge_deserializes_from_api_shape() {
        let charge: Charge = serde_json::from_str(
            r#"{
                "id": "ch_3",
                "object": "charge",
                "amount": 2599,
                "currency": "gbp",
                "status": "failed",
                "refunded": false,
                "created": 1700000000,
                "failure_message": "Your card was declined.",
                "metadata": { "user_id": "user9@example.com" }
            }"#,
        )
        .unwrap();

        assert_eq!(charge.status, ChargeStatus::Failed);
        assert_eq!(charge.metadata["user_id"], "user9@example.com");
        assert_eq!(charge.failure_message.as_deref(), Some("Your card was declined."));
    }
}
