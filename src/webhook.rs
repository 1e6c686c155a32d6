// Webhook receiver: verifies Stripe-signed events and logs failed payments

use crate::logger::TransactionLogger;
use crate::models::{ChargeStatus, LogRequest};
use crate::stripe::PaymentIntent;
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{TimeZone, Utc};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::Sha256;
use std::sync::Arc;
use thiserror::Error;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "stripe-signature";

/// Accepted clock skew between the signature timestamp and now
pub const DEFAULT_TOLERANCE_SECS: i64 = 300;

pub const PAYMENT_FAILED: &str = "payment_intent.payment_failed";

#[derive(Error, Debug)]
pub enum WebhookError {
    #[error("Missing Stripe-Signature header")]
    MissingSignature,

    #[error("Signing secret cannot be used as an HMAC key")]
    InvalidSecret,

    #[error("Malformed signature header: {0}")]
    MalformedHeader(String),

    #[error("Timestamp outside tolerance window ({0}s)")]
    TimestampTolerance(i64),

    #[error("No signatures found matching the expected signature for payload")]
    SignatureMismatch,

    #[error("Malformed payload: {0}")]
    MalformedPayload(#[from] serde_json::Error),
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.to_string(),
        }));
        (StatusCode::BAD_REQUEST, body).into_response()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventData {
    pub object: Value,
}

/// A webhook event envelope
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub created: Option<i64>,
    pub data: EventData,
}

/// Timestamp and `v1` signatures from a `Stripe-Signature` header
#[derive(Debug, PartialEq, Eq)]
pub struct SignatureHeader {
    pub timestamp: i64,
    pub signatures: Vec<Vec<u8>>,
}

impl SignatureHeader {
    /// Parse `t=<unix>,v1=<hex>[,v1=<hex>...]`; other schemes are ignored
    pub fn parse(header: &str) -> Result<Self, WebhookError> {
        let mut timestamp = None;
        let mut signatures = Vec::new();

        for part in header.split(',') {
            let Some((key, value)) = part.trim().split_once('=') else {
                continue;
            };
            match key {
                "t" => {
                    timestamp = Some(value.parse::<i64>().map_err(|_| {
                        WebhookError::MalformedHeader("invalid timestamp".to_string())
                    })?)
                }
                "v1" => {
                    // Undecodable entries simply cannot match
                    if let Ok(bytes) = hex::decode(value) {
                        signatures.push(bytes);
                    }
                }
                _ => {}
            }
        }

        let timestamp =
            timestamp.ok_or_else(|| WebhookError::MalformedHeader("missing timestamp".to_string()))?;
        if signatures.is_empty() {
            return Err(WebhookError::MalformedHeader("missing v1 signature".to_string()));
        }

        Ok(Self {
            timestamp,
            signatures,
        })
    }
}

fn signed_payload_mac(payload: &[u8], timestamp: i64, secret: &str) -> Result<HmacSha256, WebhookError> {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| WebhookError::InvalidSecret)?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(mac)
}

/// Hex HMAC-SHA256 over `"<timestamp>.<payload>"`
pub fn compute_signature(payload: &[u8], timestamp: i64, secret: &str) -> Result<String, WebhookError> {
    let mac = signed_payload_mac(payload, timestamp, secret)?;
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Verify the signature header against the raw body and parse the event
pub fn construct_event(
    payload: &[u8],
    header: &str,
    secret: &str,
    tolerance_secs: i64,
) -> Result<WebhookEvent, WebhookError> {
    let parsed = SignatureHeader::parse(header)?;

    let mut matched = false;
    for candidate in &parsed.signatures {
        let mac = signed_payload_mac(payload, parsed.timestamp, secret)?;
        if mac.verify_slice(candidate).is_ok() {
            matched = true;
            break;
        }
    }
    if !matched {
        return Err(WebhookError::SignatureMismatch);
    }

    let age = Utc::now().timestamp() - parsed.timestamp;
    if tolerance_secs > 0 && age.abs() > tolerance_secs {
        return Err(WebhookError::TimestampTolerance(tolerance_secs));
    }

    Ok(serde_json::from_slice(payload)?)
}

/// Map a failed payment intent to a transaction log request.
///
/// The row is keyed by the intent's latest charge so that the reconciliation
/// pull of that same charge is recognised as already logged. Intents that never
/// produced a charge fall back to the intent id.
pub fn failed_intent_request(intent: &PaymentIntent) -> LogRequest {
    let user_id = intent
        .metadata
        .get("user_id")
        .filter(|u| !u.is_empty())
        .cloned()
        .unwrap_or_else(|| "Unknown User".to_string());
    let error_type = intent
        .last_payment_error
        .as_ref()
        .and_then(|e| e.message.clone())
        .unwrap_or_else(|| "unknown_error".to_string());
    let timestamp = intent
        .created
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
        .unwrap_or_else(Utc::now);

    let mut request = LogRequest::new(user_id, intent.amount.unwrap_or(0), ChargeStatus::Failed);
    request.refunded = Some(false);
    request.charge_id = Some(
        intent
            .latest_charge
            .clone()
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| intent.id.clone()),
    );
    request.error_type = Some(error_type);
    request.test_run = Some("webhook".to_string());
    request.timestamp = Some(timestamp);
    request.currency = intent.currency.clone();
    request
}

/// Shared state for the webhook routes
pub struct WebhookState {
    pub logger: TransactionLogger,
    pub endpoint_secret: Option<String>,
    pub tolerance_secs: i64,
}

pub fn router(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route("/webhook", post(handle_webhook))
        .route("/health", get(health_check))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// Receive one event. Responds 400 when the signature does not verify and
/// 200 once the event has been dispatched, whether or not logging succeeded.
pub async fn handle_webhook(
    State(state): State<Arc<WebhookState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, WebhookError> {
    info!("Webhook request received");

    let event = match &state.endpoint_secret {
        Some(secret) => {
            let signature = headers
                .get(SIGNATURE_HEADER)
                .and_then(|v| v.to_str().ok())
                .ok_or(WebhookError::MissingSignature)
                .map_err(|e| {
                    warn!("⚠️  Webhook signature verification failed. {}", e);
                    e
                })?;
            construct_event(&body, signature, secret, state.tolerance_secs).map_err(|e| {
                warn!("⚠️  Webhook signature verification failed. {}", e);
                e
            })?
        }
        None => serde_json::from_slice::<WebhookEvent>(&body).map_err(|e| {
            warn!("Unparseable webhook payload: {}", e);
            WebhookError::from(e)
        })?,
    };

    dispatch(&state.logger, &event).await;

    Ok(StatusCode::OK)
}

async fn dispatch(logger: &TransactionLogger, event: &WebhookEvent) {
    match event.event_type.as_str() {
        PAYMENT_FAILED => {
            let intent: PaymentIntent = match serde_json::from_value(event.data.object.clone()) {
                Ok(intent) => intent,
                Err(e) => {
                    error!("Payment intent in event {:?} is malformed: {}", event.id, e);
                    return;
                }
            };
            info!("Pushing failed payment intent {} to the transaction log", intent.id);

            match logger.log_charge(failed_intent_request(&intent)).await {
                Ok(outcome) => info!("Failed intent {}: {}", intent.id, outcome),
                Err(e) => error!("[FAIL] {}: {}", intent.id, e),
            }
        }
        other => info!("Unhandled event type {}.", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    const SECRET: &str = "whsec_test_secret";

    fn failed_event() -> String {
        json!({
            "id": "evt_1",
            "type": "payment_intent.payment_failed",
            "created": 1700000000,
            "data": { "object": {
                "id": "pi_1",
                "amount": 2000,
                "currency": "usd",
                "created": 1700000000,
                "metadata": { "user_id": "user4@example.com", "test_run": "webhook_demo" },
                "last_payment_error": { "message": "Your card has insufficient funds." }
            }}
        })
        .to_string()
    }

    fn signed_header(payload: &str, secret: &str) -> String {
        let ts = Utc::now().timestamp();
        format!("t={},v1={}", ts, compute_signature(payload.as_bytes(), ts, secret).unwrap())
    }

    fn state(store: Arc<MemoryStore>, secret: Option<&str>) -> Arc<WebhookState> {
        Arc::new(WebhookState {
            logger: TransactionLogger::new(store),
            endpoint_secret: secret.map(str::to_string),
            tolerance_secs: DEFAULT_TOLERANCE_SECS,
        })
    }

    fn headers_with(signature: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(SIGNATURE_HEADER, signature.parse().unwrap());
        headers
    }

    #[test]
    fn test_parse_signature_header() {
        let header = SignatureHeader::parse("t=1609459200,v1=abcdef,v0=ignored").unwrap();
        assert_eq!(header.timestamp, 1609459200);
        assert_eq!(header.signatures, vec![vec![0xab, 0xcd, 0xef]]);
    }

    #[test]
    fn test_parse_signature_header_invalid() {
        assert!(SignatureHeader::parse("invalid").is_err());
        assert!(SignatureHeader::parse("t=abc,v1=00").is_err());
        assert!(SignatureHeader::parse("t=1609459200").is_err());
    }

    #[test]
    fn test_construct_event_valid_signature() {
        let payload = failed_event();
        let header = signed_header(&payload, SECRET);
        let event = construct_event(payload.as_bytes(), &header, SECRET, DEFAULT_TOLERANCE_SECS).unwrap();
        assert_eq!(event.event_type, PAYMENT_FAILED);
    }

    #[test]
    fn test_construct_event_wrong_secret() {
        let payload = failed_event();
        let header = signed_header(&payload, "wrong_secret");
        let err = construct_event(payload.as_bytes(), &header, SECRET, DEFAULT_TOLERANCE_SECS).unwrap_err();
        assert!(matches!(err, WebhookError::SignatureMismatch));
    }

    #[test]
    fn test_construct_event_expired_timestamp() {
        let payload = failed_event();
        let ts = Utc::now().timestamp() - 3600;
        let header = format!("t={},v1={}", ts, compute_signature(payload.as_bytes(), ts, SECRET).unwrap());
        let err = construct_event(payload.as_bytes(), &header, SECRET, DEFAULT_TOLERANCE_SECS).unwrap_err();
        assert!(matches!(err, WebhookError::TimestampTolerance(300)));
    }

    #[test]
    fn test_failed_intent_defaults() {
        let intent: PaymentIntent = serde_json::from_value(json!({ "id": "pi_bare" })).unwrap();
        let record = failed_intent_request(&intent).into_record();
        assert_eq!(record.user_id, "Unknown User");
        assert_eq!(record.error_types, vec!["unknown_error".to_string()]);
        assert_eq!(record.amount, 0);
        assert_eq!(record.status, ChargeStatus::Failed);
        assert_eq!(record.test_run, "webhook");
        assert_eq!(record.charge_id, "pi_bare");
    }

    #[test]
    fn test_failed_intent_is_keyed_by_latest_charge() {
        let intent: PaymentIntent = serde_json::from_value(json!({
            "id": "pi_with_charge",
            "latest_charge": "ch_attempt"
        }))
        .unwrap();
        let record = failed_intent_request(&intent).into_record();
        assert_eq!(record.charge_id, "ch_attempt");
    }

    #[tokio::test]
    async fn test_valid_failed_event_logs_once() {
        let store = Arc::new(MemoryStore::new());
        let payload = failed_event();
        let headers = headers_with(&signed_header(&payload, SECRET));

        let status = handle_webhook(State(state(store.clone(), Some(SECRET))), headers, Bytes::from(payload))
            .await
            .unwrap();

        assert_eq!(status, StatusCode::OK);
        let rows = store.records();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, ChargeStatus::Failed);
        assert_eq!(rows[0].user_id, "user4@example.com");
        assert_eq!(rows[0].error_types, vec!["Your card has insufficient funds.".to_string()]);
        assert_eq!(rows[0].timestamp.timestamp(), 1700000000);
    }

    #[tokio::test]
    async fn test_invalid_signature_is_rejected_without_logging() {
        let store = Arc::new(MemoryStore::new());
        let payload = failed_event();
        let headers = headers_with(&signed_header(&payload, "not_the_secret"));

        let response = handle_webhook(State(state(store.clone(), Some(SECRET))), headers, Bytes::from(payload))
            .await
            .into_response();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(store.records().is_empty());
    }

    #[tokio::test]
    async fn test_missing_signature_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let response = handle_webhook(
            State(state(store.clone(), Some(SECRET))),
            HeaderMap::new(),
            Bytes::from(failed_event()),
        )
        .await
        .into_response();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(store.records().is_empty());
    }

    #[tokio::test]
    async fn test_unsigned_mode_trusts_payload() {
        let store = Arc::new(MemoryStore::new());
        let status = handle_webhook(State(state(store.clone(), None)), HeaderMap::new(), Bytes::from(failed_event()))
            .await
            .unwrap();

        assert_eq!(status, StatusCode::OK);
        assert_eq!(store.records().len(), 1);
    }

    #[tokio::test]
    async fn test_other_event_types_are_acknowledged_and_ignored() {
        let store = Arc::new(MemoryStore::new());
        let payload = json!({
            "type": "charge.succeeded",
            "data": { "object": { "id": "ch_1" } }
        })
        .to_string();

        let status = handle_webhook(State(state(store.clone(), None)), HeaderMap::new(), Bytes::from(payload))
            .await
            .unwrap();

        assert_eq!(status, StatusCode::OK);
        assert!(store.records().is_empty());
    }

    #[tokio::test]
    async fn test_logger_failure_still_acknowledges() {
        let store = Arc::new(MemoryStore::failing());
        let status = handle_webhook(State(state(store, None)), HeaderMap::new(), Bytes::from(failed_event()))
            .await
            .unwrap();

        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_health_check() {
        let response = health_check().await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
