use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Transaction entity types normalized into the common schema, fetched
/// in this order.
pub const TRANSACTION_ENTITIES: [&str; 6] = [
    "JournalEntry",
    "Invoice",
    "Payment",
    "Deposit",
    "Purchase",
    "Transfer",
];

/// The common flat shape every transaction entity maps to. Field order
/// here is the CSV column order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedTransaction {
    pub id: String,
    #[serde(rename = "type")]
    pub txn_type: String,
    pub date: String,
    pub amount: f64,
    pub description: String,
    pub reference: String,
    pub status: String,
    pub created_time: String,
    pub last_modified: String,
}

enum AmountSource {
    /// The entity's `TotalAmt` field.
    TotalAmt,
    /// Transfers carry `Amount` instead of `TotalAmt`.
    Amount,
    /// Journal entries have no total; sum the per-line amounts.
    LineSum,
}

enum StatusRule {
    Fixed(&'static str),
    /// Invoices surface Intuit's `EmailStatus` field.
    EmailStatus,
}

enum DescriptionRule {
    /// `"{label} - {DocNumber}"`, with `"No Ref"` standing in for a
    /// missing document number.
    Labelled(&'static str),
    /// The document number alone, falling back to the label.
    DocNumberOr(&'static str),
}

struct EntityRule {
    entity: &'static str,
    amount: AmountSource,
    description: DescriptionRule,
    status: StatusRule,
}

// One rule per transaction entity type. Existing exports depend on
// these exact strings, so changes here are breaking.
static RULES: [EntityRule; 6] = [
    EntityRule {
        entity: "JournalEntry",
        amount: AmountSource::LineSum,
        description: DescriptionRule::DocNumberOr("Journal Entry"),
        status: StatusRule::Fixed("Unknown"),
    },
    EntityRule {
        entity: "Invoice",
        amount: AmountSource::TotalAmt,
        description: DescriptionRule::Labelled("Invoice"),
        status: StatusRule::EmailStatus,
    },
    EntityRule {
        entity: "Payment",
        amount: AmountSource::TotalAmt,
        description: DescriptionRule::Labelled("Payment"),
        status: StatusRule::Fixed("Completed"),
    },
    EntityRule {
        entity: "Deposit",
        amount: AmountSource::TotalAmt,
        description: DescriptionRule::Labelled("Deposit"),
        status: StatusRule::Fixed("Completed"),
    },
    EntityRule {
        entity: "Purchase",
        amount: AmountSource::TotalAmt,
        description: DescriptionRule::Labelled("Expense"),
        status: StatusRule::Fixed("Completed"),
    },
    EntityRule {
        entity: "Transfer",
        amount: AmountSource::Amount,
        description: DescriptionRule::Labelled("Transfer"),
        status: StatusRule::Fixed("Completed"),
    },
];

// Entity types outside the rule table normalize through this.
static DEFAULT_RULE: EntityRule = EntityRule {
    entity: "",
    amount: AmountSource::TotalAmt,
    description: DescriptionRule::DocNumberOr("Transaction"),
    status: StatusRule::Fixed("Unknown"),
};

fn rule_for(entity_type: &str) -> &'static EntityRule {
    RULES
        .iter()
        .find(|rule| rule.entity == entity_type)
        .unwrap_or(&DEFAULT_RULE)
}

fn str_field(record: &Value, key: &str) -> String {
    record
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string()
}

fn metadata_field(record: &Value, key: &str) -> String {
    record
        .get("MetaData")
        .and_then(|meta| meta.get(key))
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string()
}

fn line_amount_sum(record: &Value) -> f64 {
    record
        .get("Line")
        .and_then(Value::as_array)
        .map(|lines| {
            lines
                .iter()
                .filter_map(|line| line.get("Amount").and_then(Value::as_f64))
                .sum()
        })
        .unwrap_or(0.0)
}

/// Map one raw upstream record into the common flat schema.
///
/// Pure function of the record and its entity type.
pub fn normalize(record: &Value, entity_type: &str) -> NormalizedTransaction {
    let rule = rule_for(entity_type);

    let amount = match rule.amount {
        AmountSource::TotalAmt => record.get("TotalAmt").and_then(Value::as_f64).unwrap_or(0.0),
        AmountSource::Amount => record.get("Amount").and_then(Value::as_f64).unwrap_or(0.0),
        AmountSource::LineSum => line_amount_sum(record),
    };

    let doc_number = record.get("DocNumber").and_then(Value::as_str);

    let description = match rule.description {
        DescriptionRule::Labelled(label) => {
            format!("{} - {}", label, doc_number.unwrap_or("No Ref"))
        }
        DescriptionRule::DocNumberOr(fallback) => {
            doc_number.unwrap_or(fallback).to_string()
        }
    };

    let status = match rule.status {
        StatusRule::Fixed(status) => status.to_string(),
        StatusRule::EmailStatus => record
            .get("EmailStatus")
            .and_then(Value::as_str)
            .unwrap_or("Unknown")
            .to_string(),
    };

    NormalizedTransaction {
        id: str_field(record, "Id"),
        txn_type: entity_type.to_string(),
        date: str_field(record, "TxnDate"),
        amount,
        description,
        reference: doc_number.unwrap_or("").to_string(),
        status,
        created_time: metadata_field(record, "CreateTime"),
        last_modified: metadata_field(record, "LastUpdatedTime"),
    }
}

/// Summary of a normalized transaction collection, or an explicit
/// no-data marker when the collection is empty.
#[derive(Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Summary {
    Empty(EmptySummary),
    Stats(SummaryStatistics),
}

#[derive(Debug, PartialEq, Serialize)]
pub struct EmptySummary {
    pub no_data: bool,
}

#[derive(Debug, PartialEq, Serialize)]
pub struct SummaryStatistics {
    pub counts_by_type: BTreeMap<String, u64>,
    pub amounts_by_type: BTreeMap<String, f64>,
    pub total_amount: f64,
    pub average_amount: f64,
    pub earliest_date: String,
    pub latest_date: String,
}

/// Calendar date of a transaction, ignoring any time-of-day suffix.
fn transaction_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.get(..10)?, "%Y-%m-%d").ok()
}

/// Compute summary statistics over a collection of normalized
/// transactions. Recomputed on every request, never cached.
pub fn aggregate(transactions: &[NormalizedTransaction]) -> Summary {
    if transactions.is_empty() {
        return Summary::Empty(EmptySummary { no_data: true });
    }

    let mut counts_by_type = BTreeMap::new();
    let mut amounts_by_type = BTreeMap::new();
    let mut total_amount = 0.0;
    let mut earliest: Option<NaiveDate> = None;
    let mut latest: Option<NaiveDate> = None;

    for transaction in transactions.iter() {
        *counts_by_type
            .entry(transaction.txn_type.clone())
            .or_insert(0u64) += 1;
        *amounts_by_type
            .entry(transaction.txn_type.clone())
            .or_insert(0.0) += transaction.amount;
        total_amount += transaction.amount;

        if let Some(date) = transaction_date(&transaction.date) {
            earliest = Some(earliest.map_or(date, |d| d.min(date)));
            latest = Some(latest.map_or(date, |d| d.max(date)));
        }
    }

    let format_date =
        |date: Option<NaiveDate>| date.map(|d| d.format("%Y-%m-%d").to_string()).unwrap_or_default();

    Summary::Stats(SummaryStatistics {
        average_amount: total_amount / transactions.len() as f64,
        counts_by_type,
        amounts_by_type,
        total_amount,
        earliest_date: format_date(earliest),
        latest_date: format_date(latest),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_journal_entry_sums_line_amounts() {
        let record = json!({
            "Id": "17",
            "DocNumber": "JE1",
            "TxnDate": "2024-03-01",
            "Line": [{"Amount": 100.0}, {"Amount": 50.0}]
        });

        let transaction = normalize(&record, "JournalEntry");

        assert_eq!(transaction.amount, 150.0);
        assert_eq!(transaction.description, "JE1");
        assert_eq!(transaction.status, "Unknown");
        assert_eq!(transaction.txn_type, "JournalEntry");
    }

    #[test]
    fn test_journal_entry_without_doc_number() {
        let record = json!({"Line": [{"Amount": 25.0}]});

        let transaction = normalize(&record, "JournalEntry");

        assert_eq!(transaction.description, "Journal Entry");
        assert_eq!(transaction.reference, "");
    }

    #[test]
    fn test_deposit_without_doc_number() {
        let record = json!({"TotalAmt": 200.0});

        let transaction = normalize(&record, "Deposit");

        assert_eq!(transaction.amount, 200.0);
        assert_eq!(transaction.description, "Deposit - No Ref");
        assert_eq!(transaction.status, "Completed");
    }

    #[test]
    fn test_purchase_is_labelled_expense() {
        let record = json!({"TotalAmt": 42.5, "DocNumber": "1042"});

        let transaction = normalize(&record, "Purchase");

        assert_eq!(transaction.description, "Expense - 1042");
        assert_eq!(transaction.status, "Completed");
    }

    #[test]
    fn test_transfer_reads_amount_not_total_amt() {
        let record = json!({"Amount": 75.0, "TotalAmt": 999.0, "DocNumber": "T9"});

        let transaction = normalize(&record, "Transfer");

        assert_eq!(transaction.amount, 75.0);
        assert_eq!(transaction.description, "Transfer - T9");
    }

    #[test]
    fn test_invoice_surfaces_email_status() {
        let record = json!({"TotalAmt": 10.0, "DocNumber": "1001", "EmailStatus": "EmailSent"});
        assert_eq!(normalize(&record, "Invoice").status, "EmailSent");

        let record = json!({"TotalAmt": 10.0, "DocNumber": "1001"});
        assert_eq!(normalize(&record, "Invoice").status, "Unknown");
    }

    #[test]
    fn test_common_fields() {
        let record = json!({
            "Id": "145",
            "TxnDate": "2024-02-14",
            "TotalAmt": 31.5,
            "DocNumber": "P-7",
            "MetaData": {
                "CreateTime": "2024-02-14T09:00:00-08:00",
                "LastUpdatedTime": "2024-02-15T10:30:00-08:00"
            }
        });

        let transaction = normalize(&record, "Payment");

        assert_eq!(transaction.id, "145");
        assert_eq!(transaction.date, "2024-02-14");
        assert_eq!(transaction.reference, "P-7");
        assert_eq!(transaction.created_time, "2024-02-14T09:00:00-08:00");
        assert_eq!(transaction.last_modified, "2024-02-15T10:30:00-08:00");
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let record = json!({
            "Id": "3",
            "TxnDate": "2024-01-31",
            "TotalAmt": 14.25,
            "EmailStatus": "NotSet"
        });

        assert_eq!(normalize(&record, "Invoice"), normalize(&record, "Invoice"));
    }

    #[test]
    fn test_aggregate_empty_returns_no_data_marker() {
        assert_eq!(aggregate(&[]), Summary::Empty(EmptySummary { no_data: true }));
    }

    fn transaction(txn_type: &str, date: &str, amount: f64) -> NormalizedTransaction {
        NormalizedTransaction {
            id: "1".into(),
            txn_type: txn_type.into(),
            date: date.into(),
            amount,
            description: String::new(),
            reference: String::new(),
            status: "Completed".into(),
            created_time: String::new(),
            last_modified: String::new(),
        }
    }

    #[test]
    fn test_aggregate_statistics() {
        let transactions = vec![
            transaction("Invoice", "2024-01-10", 100.0),
            transaction("Invoice", "2024-03-05", 50.0),
            transaction("Deposit", "2023-12-31", 30.0),
        ];

        let Summary::Stats(stats) = aggregate(&transactions) else {
            panic!("expected statistics for non-empty input");
        };

        assert_eq!(stats.counts_by_type["Invoice"], 2);
        assert_eq!(stats.counts_by_type["Deposit"], 1);
        assert_eq!(stats.amounts_by_type["Invoice"], 150.0);
        assert_eq!(stats.total_amount, 180.0);
        assert_eq!(stats.average_amount, 60.0);
        assert_eq!(stats.earliest_date, "2023-12-31");
        assert_eq!(stats.latest_date, "2024-03-05");
    }

    #[test]
    fn test_aggregate_ignores_time_of_day() {
        let transactions = vec![
            transaction("Payment", "2024-05-01T23:59:00", 1.0),
            transaction("Payment", "2024-05-02", 1.0),
        ];

        let Summary::Stats(stats) = aggregate(&transactions) else {
            panic!("expected statistics for non-empty input");
        };

        assert_eq!(stats.earliest_date, "2024-05-01");
        assert_eq!(stats.latest_date, "2024-05-02");
    }

    #[test]
    fn test_aggregate_skips_unparseable_dates() {
        let transactions = vec![transaction("Payment", "", 5.0)];

        let Summary::Stats(stats) = aggregate(&transactions) else {
            panic!("expected statistics for non-empty input");
        };

        assert_eq!(stats.earliest_date, "");
        assert_eq!(stats.latest_date, "");
        assert_eq!(stats.total_amount, 5.0);
    }
}
