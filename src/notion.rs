// Notion API client backing the transaction log and the daily report database

use crate::config::NotionConfig;
use crate::error::{LedgerError, LedgerResult};
use crate::models::{
    ChargeStatus, DailyReport, TransactionRecord, BASE_CURRENCY, UNKNOWN_USER,
};
use crate::store::{RecordFilter, RecordPage, ReportSink, TransactionStore};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::Client as HttpClient;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, error, info};

const NOTION_VERSION: &str = "2022-06-28";

// Property names in the transaction log database
const PROP_NAME: &str = "Name";
const PROP_STATUS: &str = "Status of Transaction";
const PROP_AMOUNT: &str = "Transaction Amount";
const PROP_USER: &str = "User ID";
const PROP_ERROR: &str = "Error Type";
const PROP_CHARGE: &str = "Charge ID";
const PROP_REFUNDED: &str = "Refunded";
const PROP_TIMESTAMP: &str = "Timestamp";
const PROP_TEST_RUN: &str = "Test Run";
const PROP_CURRENCY: &str = "Currency";

#[derive(Debug, Deserialize)]
pub struct NotionPage {
    pub id: String,
    #[serde(default)]
    pub created_time: Option<String>,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
pub struct QueryResponse {
    pub results: Vec<NotionPage>,
    pub next_cursor: Option<String>,
    #[serde(default)]
    pub has_more: bool,
}

#[derive(Debug, Deserialize)]
struct NotionErrorBody {
    message: String,
}

/// Thin client over the two Notion endpoints this crate uses
#[derive(Clone)]
pub struct NotionClient {
    http_client: HttpClient,
    api_base: String,
    token: String,
}

impl NotionClient {
    pub fn new(config: &NotionConfig) -> LedgerResult<Self> {
        let http_client = HttpClient::builder().timeout(config.timeout).build()?;
        Ok(Self {
            http_client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            token: config.token.clone(),
        })
    }

    /// Create a page under a database with the given properties and body blocks
    pub async fn create_page(
        &self,
        database_id: &str,
        properties: Value,
        children: Vec<Value>,
    ) -> LedgerResult<NotionPage> {
        let mut body = json!({
            "parent": { "database_id": database_id },
            "properties": properties,
        });
        if !children.is_empty() {
            body["children"] = Value::Array(children);
        }

        let resp = self
            .http_client
            .post(format!("{}/v1/pages", self.api_base))
            .bearer_auth(&self.token)
            .header("Notion-Version", NOTION_VERSION)
            .json(&body)
            .send()
            .await?;

        Self::parse_response(resp).await
    }

    /// Query one page of a database
    pub async fn query_database(
        &self,
        database_id: &str,
        filter: Option<Value>,
        start_cursor: Option<&str>,
    ) -> LedgerResult<QueryResponse> {
        let mut body = json!({});
        if let Some(filter) = filter {
            body["filter"] = filter;
        }
        if let Some(cursor) = start_cursor {
            body["start_cursor"] = json!(cursor);
        }

        let resp = self
            .http_client
            .post(format!("{}/v1/databases/{}/query", self.api_base, database_id))
            .bearer_auth(&self.token)
            .header("Notion-Version", NOTION_VERSION)
            .json(&body)
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
            let message = serde_json::from_slice::<NotionErrorBody>(&bytes)
                .map(|e| e.message)
                .unwrap_or_else(|_| String::from_utf8_lossy(&bytes).into_owned());
            error!("Notion returned {}: {}", status, message);
            return Err(LedgerError::Api {
                service: "notion",
                status: status.as_u16(),
                message,
            });
        }

        Ok(serde_json::from_slice(&bytes)?)
    }
}

// ============================================================================
// Property encoding
// ============================================================================

fn title(content: &str) -> Value {
    json!({ "title": [{ "text": { "content": content } }] })
}

fn rich_text(content: &str) -> Value {
    json!({ "rich_text": [{ "text": { "content": content } }] })
}

fn rich_text_segments(segments: &[String]) -> Value {
    let items: Vec<Value> = segments
        .iter()
        .map(|s| json!({ "text": { "content": s } }))
        .collect();
    json!({ "rich_text": items })
}

fn paragraph(content: &str) -> Value {
    json!({
        "object": "block",
        "type": "paragraph",
        "paragraph": {
            "rich_text": [{ "type": "text", "text": { "content": content } }]
        }
    })
}

/// Properties for one transaction log row
pub fn record_properties(record: &TransactionRecord) -> Value {
    json!({
        PROP_NAME: title(&format!("Charge: {}", record.charge_id)),
        PROP_STATUS: { "status": { "name": record.status.as_str() } },
        PROP_AMOUNT: { "number": record.amount },
        PROP_USER: rich_text(&record.user_id),
        PROP_ERROR: rich_text_segments(&record.error_types),
        PROP_CHARGE: rich_text(&record.charge_id),
        PROP_REFUNDED: { "checkbox": record.refunded },
        PROP_TIMESTAMP: { "date": { "start": record.timestamp.to_rfc3339() } },
        PROP_TEST_RUN: rich_text(&record.test_run),
        PROP_CURRENCY: { "select": { "name": record.currency } },
    })
}

/// Translate a record filter into Notion's filter object
pub fn filter_json(filter: &RecordFilter) -> Option<Value> {
    let mut clauses = Vec::new();
    if let Some(status) = &filter.status {
        clauses.push(json!({
            "property": PROP_STATUS,
            "status": { "equals": status.as_str() }
        }));
    }
    if let Some(refunded) = filter.refunded {
        clauses.push(json!({
            "property": PROP_REFUNDED,
            "checkbox": { "equals": refunded }
        }));
    }
    if let Some(charge_id) = &filter.charge_id {
        clauses.push(json!({
            "property": PROP_CHARGE,
            "rich_text": { "equals": charge_id }
        }));
    }

    match clauses.len() {
        0 => None,
        1 => clauses.pop(),
        _ => Some(json!({ "and": clauses })),
    }
}

// ============================================================================
// Property decoding
// ============================================================================

fn plain_texts(prop: Option<&Value>) -> Vec<&str> {
    let segments = prop
        .and_then(|p| p.get("rich_text").or_else(|| p.get("title")))
        .and_then(Value::as_array);

    segments
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    item.get("plain_text")
                        .or_else(|| item.pointer("/text/content"))
                        .and_then(Value::as_str)
                })
                .collect()
        })
        .unwrap_or_default()
}

fn first_text(prop: Option<&Value>) -> Option<String> {
    plain_texts(prop)
        .first()
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}

fn parse_instant(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

/// Decode a transaction log row
pub fn record_from_page(page: &NotionPage) -> LedgerResult<TransactionRecord> {
    let props = &page.properties;

    let status = props
        .get(PROP_STATUS)
        .and_then(|p| p.pointer("/status/name").or_else(|| p.pointer("/select/name")))
        .and_then(Value::as_str)
        .map(ChargeStatus::from)
        .ok_or_else(|| LedgerError::malformed(&page.id, "missing transaction status"))?;

    let amount = props
        .get(PROP_AMOUNT)
        .and_then(|p| p.get("number"))
        .and_then(|n| n.as_i64().or_else(|| n.as_f64().map(|f| f.round() as i64)))
        .unwrap_or(0);

    let currency = props
        .get(PROP_CURRENCY)
        .and_then(|p| p.pointer("/select/name"))
        .and_then(Value::as_str)
        .map(str::to_uppercase)
        .unwrap_or_else(|| BASE_CURRENCY.to_string());

    let refunded = props
        .get(PROP_REFUNDED)
        .and_then(|p| p.get("checkbox"))
        .and_then(Value::as_bool)
        .unwrap_or(false);

    let timestamp = props
        .get(PROP_TIMESTAMP)
        .and_then(|p| p.pointer("/date/start"))
        .and_then(Value::as_str)
        .or(page.created_time.as_deref())
        .and_then(parse_instant)
        .ok_or_else(|| LedgerError::malformed(&page.id, "missing timestamp"))?;

    Ok(TransactionRecord {
        charge_id: first_text(props.get(PROP_CHARGE)).unwrap_or_default(),
        user_id: first_text(props.get(PROP_USER)).unwrap_or_else(|| UNKNOWN_USER.to_string()),
        amount,
        currency,
        status,
        refunded,
        error_types: plain_texts(props.get(PROP_ERROR))
            .into_iter()
            .map(str::to_string)
            .collect(),
        test_run: first_text(props.get(PROP_TEST_RUN)).unwrap_or_default(),
        timestamp,
    })
}

// ============================================================================
// Report page layout
// ============================================================================

/// Properties for a daily report page
pub fn report_properties(report: &DailyReport, generated_at: DateTime<Utc>) -> Value {
    let risky: Vec<Value> = report
        .risky_users
        .iter()
        .map(|u| json!({ "name": u.user }))
        .collect();

    json!({
        "Name": title(&format!(
            "📆 Stripe Daily Report - {}",
            generated_at.format("%-m/%-d/%Y")
        )),
        "Date": { "date": { "start": generated_at.to_rfc3339() } },
        "Failed Charges": { "number": report.failed },
        "Failure %": { "number": report.failure_ratio() },
        "High-Risk Users": { "multi_select": risky },
        "Top Error": rich_text(report.top_error().unwrap_or("None")),
        "Total Charges": { "number": report.total },
        "Total Refunded": { "number": report.total_refunded() },
    })
}

/// Body blocks for a daily report page
pub fn report_blocks(report: &DailyReport) -> Vec<Value> {
    let risky_text = if report.risky_users.is_empty() {
        "None".to_string()
    } else {
        report
            .risky_users
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n")
    };
    let error_text = if report.top_errors.is_empty() {
        "None".to_string()
    } else {
        report.top_errors.join("\n")
    };

    vec![
        paragraph("🧾 Stripe Daily Report"),
        paragraph(&format!("Total: {}", report.total)),
        paragraph(&format!("✅ Successful: {}", report.successful)),
        paragraph(&format!("❌ Failed: {}", report.failed)),
        paragraph(&format!("💰 Revenue (USD): ${:.2}", report.revenue_usd)),
        paragraph(&format!("🚩 Risky Users:\n{}", risky_text)),
        paragraph(&format!("🐞 Top Errors:\n{}", error_text)),
    ]
}

// ============================================================================
// Store adapters
// ============================================================================

/// The transaction log database
pub struct NotionTransactionLog {
    client: NotionClient,
    database_id: String,
}

impl NotionTransactionLog {
    pub fn new(client: NotionClient, database_id: impl Into<String>) -> Self {
        Self {
            client,
            database_id: database_id.into(),
        }
    }
}

#[async_trait]
impl TransactionStore for NotionTransactionLog {
    async fn insert(&self, record: &TransactionRecord) -> LedgerResult<String> {
        let page = self
            .client
            .create_page(&self.database_id, record_properties(record), Vec::new())
            .await?;
        Ok(page.id)
    }

    async fn query(
        &self,
        filter: Option<&RecordFilter>,
        cursor: Option<&str>,
    ) -> LedgerResult<RecordPage> {
        let resp = self
            .client
            .query_database(&self.database_id, filter.and_then(filter_json), cursor)
            .await?;

        let records = resp
            .results
            .iter()
            .map(record_from_page)
            .collect::<LedgerResult<Vec<_>>>()?;
        debug!("Decoded {} transaction rows", records.len());

        Ok(RecordPage {
            records,
            next_cursor: resp.next_cursor,
            has_more: resp.has_more,
        })
    }
}

/// The daily report database
pub struct NotionReportDatabase {
    client: NotionClient,
    database_id: String,
}

impl NotionReportDatabase {
    pub fn new(client: NotionClient, database_id: impl Into<String>) -> Self {
        Self {
            client,
            database_id: database_id.into(),
        }
    }
}

#[async_trait]
impl ReportSink for NotionReportDatabase {
    async fn publish(
        &self,
        report: &DailyReport,
        generated_at: DateTime<Utc>,
    ) -> LedgerResult<String> {
        let page = self
            .client
            .create_page(
                &self.database_id,
                report_properties(report, generated_at),
                report_blocks(report),
            )
            .await?;
        info!("Report created in Notion: {}", page.id);
        Ok(page.id)
    }
}
