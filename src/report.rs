// Daily report: aggregation over the transaction log

use crate::error::LedgerResult;
use crate::models::{ChargeStatus, DailyReport, TransactionRecord, UserStats};
use crate::store::{fetch_all, RecordFilter, ReportSink, TransactionStore};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Refund share above which a user is flagged
const RISKY_REFUND_RATIO: f64 = 0.5;

/// Fixed conversion rates to USD; unknown codes convert at 1
pub fn conversion_rate(currency: &str) -> f64 {
    match currency.to_uppercase().as_str() {
        "USD" => 1.0,
        "EUR" => 1.07,
        "GBP" => 1.2,
        _ => 1.0,
    }
}

/// Revenue in major USD units over the given (already filtered) charges
pub fn revenue_usd(charges: &[TransactionRecord]) -> f64 {
    let minor: f64 = charges
        .iter()
        .map(|c| c.amount as f64 * conversion_rate(&c.currency))
        .sum();
    minor / 100.0
}

/// Group succeeded charges by user and keep those whose refunded share is
/// strictly above one half. Users come out in first-seen order.
pub fn risky_users(succeeded: &[TransactionRecord]) -> Vec<UserStats> {
    let mut order: Vec<String> = Vec::new();
    let mut stats: HashMap<&str, UserStats> = HashMap::new();

    for charge in succeeded {
        let entry = stats.entry(charge.user_id.as_str()).or_insert_with(|| {
            order.push(charge.user_id.clone());
            UserStats {
                user: charge.user_id.clone(),
                total: 0,
                refunded: 0,
            }
        });
        entry.total += 1;
        if charge.refunded {
            entry.refunded += 1;
        }
    }

    order
        .iter()
        .filter_map(|user| stats.remove(user.as_str()))
        .filter(|s| s.refund_ratio() > RISKY_REFUND_RATIO)
        .collect()
}

/// Count error messages over failed charges, most frequent first.
///
/// Every error entry of a record is counted on its own. Ties keep the order
/// in which the message was first seen.
pub fn top_errors(failed: &[TransactionRecord]) -> Vec<String> {
    let mut counts: Vec<(&str, usize)> = Vec::new();

    for message in failed.iter().flat_map(|c| c.error_types.iter()) {
        let message = message.as_str();
        if message.is_empty() {
            continue;
        }
        match counts.iter_mut().find(|(m, _)| *m == message) {
            Some((_, n)) => *n += 1,
            None => counts.push((message, 1)),
        }
    }

    counts.sort_by(|a, b| b.1.cmp(&a.1));
    counts
        .into_iter()
        .map(|(message, count)| format!("{}: {}", message, count))
        .collect()
}

/// Assemble a report from the record sets pulled out of the store
pub fn summarize(
    all: &[TransactionRecord],
    succeeded: &[TransactionRecord],
    succeeded_unrefunded: &[TransactionRecord],
    failed: &[TransactionRecord],
) -> DailyReport {
    DailyReport {
        total: all.len(),
        successful: succeeded.len(),
        failed: failed.len(),
        revenue_usd: revenue_usd(succeeded_unrefunded),
        risky_users: risky_users(succeeded),
        top_errors: top_errors(failed),
    }
}

pub struct ReportBuilder {
    store: Arc<dyn TransactionStore>,
    sink: Arc<dyn ReportSink>,
}

impl ReportBuilder {
    pub fn new(store: Arc<dyn TransactionStore>, sink: Arc<dyn ReportSink>) -> Self {
        Self { store, sink }
    }

    /// Read the transaction log back and compute the report without publishing it
    pub async fn build(&self) -> LedgerResult<DailyReport> {
        let store = self.store.as_ref();

        let all = fetch_all(store, None).await?;
        let succeeded_unrefunded =
            fetch_all(store, Some(&RecordFilter::succeeded_not_refunded())).await?;
        let failed = fetch_all(store, Some(&RecordFilter::status(ChargeStatus::Failed))).await?;
        let succeeded =
            fetch_all(store, Some(&RecordFilter::status(ChargeStatus::Succeeded))).await?;

        info!("Total transactions: {}", all.len());
        info!("Successful transactions: {}", succeeded.len());
        info!("Successful, not refunded: {}", succeeded_unrefunded.len());
        info!("Failed transactions: {}", failed.len());

        let report = summarize(&all, &succeeded, &succeeded_unrefunded, &failed);
        info!("Error ranking: {:?}", report.top_errors);

        Ok(report)
    }

    /// Build the report and write it as a new entry in the report sink
    pub async fn run(&self) -> LedgerResult<(DailyReport, String)> {
        let report = self.build().await?;
        let entry_id = self.sink.publish(&report, Utc::now()).await?;
        info!("Report created: {}", entry_id);
        Ok((report, entry_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LogRequest;

    fn charge(user: &str, amount: i64, currency: &str, status: ChargeStatus, refunded: bool) -> TransactionRecord {
        let mut req = LogRequest::new(user, amount, status);
        req.currency = Some(currency.to_string());
        req.refunded = Some(refunded);
        req.into_record()
    }

    fn failure(message: &str) -> TransactionRecord {
        let mut req = LogRequest::new("u", 100, ChargeStatus::Failed);
        req.error_type = Some(message.to_string());
        req.into_record()
    }

    #[test]
    fn test_eur_charge_converts_at_fixed_rate() {
        let charges = vec![charge("u", 1000, "EUR", ChargeStatus::Succeeded, false)];
        assert!((revenue_usd(&charges) - 10.7).abs() < 1e-9);
    }

    #[test]
    fn test_unknown_currency_converts_at_one() {
        let charges = vec![charge("u", 1234, "JPY", ChargeStatus::Succeeded, false)];
        assert!((revenue_usd(&charges) - 12.34).abs() < 1e-9);
    }

    #[test]
    fn test_currency_lookup_ignores_case() {
        assert_eq!(conversion_rate("gbp"), 1.2);
        assert_eq!(conversion_rate("Eur"), 1.07);
    }

    #[test]
    fn test_exactly_half_refunded_is_not_risky() {
        let charges = vec![
            charge("half", 100, "USD", ChargeStatus::Succeeded, true),
            charge("half", 100, "USD", ChargeStatus::Succeeded, false),
        ];
        assert!(risky_users(&charges).is_empty());
    }

    #[test]
    fn test_majority_refunded_is_risky() {
        let charges = vec![
            charge("bob", 100, "USD", ChargeStatus::Succeeded, true),
            charge("alice", 100, "USD", ChargeStatus::Succeeded, false),
            charge("bob", 100, "USD", ChargeStatus::Succeeded, true),
            charge("bob", 100, "USD", ChargeStatus::Succeeded, false),
        ];
        let risky = risky_users(&charges);
        assert_eq!(
            risky,
            vec![UserStats {
                user: "bob".to_string(),
                total: 3,
                refunded: 2,
            }]
        );
    }

    #[test]
    fn test_risky_users_keep_first_seen_order() {
        let charges = vec![
            charge("zed", 100, "USD", ChargeStatus::Succeeded, true),
            charge("amy", 100, "USD", ChargeStatus::Succeeded, true),
        ];
        let users: Vec<String> = risky_users(&charges).into_iter().map(|u| u.user).collect();
        assert_eq!(users, vec!["zed", "amy"]);
    }

    #[test]
    fn test_top_errors_sorted_descending() {
        let mut failed = Vec::new();
        failed.extend((0..3).map(|_| failure("A")));
        failed.extend((0..5).map(|_| failure("B")));
        failed.extend((0..5).map(|_| failure("C")));

        let ranked = top_errors(&failed);
        assert_eq!(ranked, vec!["B: 5", "C: 5", "A: 3"]);

        let counts: Vec<usize> = ranked
            .iter()
            .map(|e| e.rsplit(": ").next().unwrap().parse().unwrap())
            .collect();
        assert!(counts.windows(2).all(|w| w[0] >= w[1]));
    }

    #[test]
    fn test_top_errors_skip_empty_messages() {
        let failed = vec![failure(""), failure("declined")];
        assert_eq!(top_errors(&failed), vec!["declined: 1"]);
    }

    #[test]
    fn test_top_errors_count_each_entry_of_a_record() {
        let mut split = failure("card_declined");
        split.error_types.push("insufficient_funds".to_string());
        let failed = vec![split, failure("insufficient_funds")];

        assert_eq!(
            top_errors(&failed),
            vec!["insufficient_funds: 2", "card_declined: 1"]
        );
    }

    #[test]
    fn test_summary_counts_other_statuses_in_total_only() {
        let all = vec![
            charge("u", 100, "USD", ChargeStatus::Succeeded, false),
            charge("u", 100, "USD", ChargeStatus::Pending, false),
            failure("declined"),
        ];
        let succeeded: Vec<_> = all.iter().filter(|r| r.status == ChargeStatus::Succeeded).cloned().collect();
        let failed: Vec<_> = all.iter().filter(|r| r.status == ChargeStatus::Failed).cloned().collect();

        let report = summarize(&all, &succeeded, &succeeded, &failed);
        assert_eq!(report.total, 3);
        assert_eq!(report.successful + report.failed + 1, report.total);
    }
}
