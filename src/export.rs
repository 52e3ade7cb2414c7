use std::fmt;

use chrono::Utc;
use rust_xlsxwriter::{Format, Workbook};

use crate::normalize::{NormalizedTransaction, Summary};

#[derive(Debug)]
pub enum ExportError {
    Csv(csv::Error),
    Xlsx(rust_xlsxwriter::XlsxError),
}

impl From<csv::Error> for ExportError {
    fn from(err: csv::Error) -> Self {
        ExportError::Csv(err)
    }
}

impl From<rust_xlsxwriter::XlsxError> for ExportError {
    fn from(err: rust_xlsxwriter::XlsxError) -> Self {
        ExportError::Xlsx(err)
    }
}

impl fmt::Display for ExportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportError::Csv(err) => write!(f, "CSV export failed: {}", err),
            ExportError::Xlsx(err) => write!(f, "spreadsheet export failed: {}", err),
        }
    }
}

/// Timestamped download filename, matching what existing notebook
/// callers expect to see in Content-Disposition.
pub fn attachment_filename(extension: &str) -> String {
    format!(
        "quickbooks_transactions_{}.{}",
        Utc::now().format("%Y%m%d_%H%M%S"),
        extension
    )
}

/// Serialize transactions as indented JSON.
pub fn to_json(transactions: &[NormalizedTransaction]) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec_pretty(transactions)
}

/// Serialize transactions as RFC4180 CSV. The header row follows the
/// `NormalizedTransaction` field order.
pub fn to_csv(transactions: &[NormalizedTransaction]) -> Result<Vec<u8>, ExportError> {
    let mut writer = csv::Writer::from_writer(Vec::new());

    for transaction in transactions.iter() {
        writer.serialize(transaction)?;
    }
    writer.flush().map_err(csv::Error::from)?;

    writer
        .into_inner()
        .map_err(|err| ExportError::Csv(csv::Error::from(err.into_error())))
}

const TRANSACTION_HEADERS: [&str; 9] = [
    "id",
    "type",
    "date",
    "amount",
    "description",
    "reference",
    "status",
    "created_time",
    "last_modified",
];

/// Build a three-sheet workbook: raw transaction rows, overall summary
/// metrics, and per-type aggregates.
pub fn to_xlsx(
    transactions: &[NormalizedTransaction],
    summary: &Summary,
) -> Result<Vec<u8>, ExportError> {
    let mut workbook = Workbook::new();
    let header_format = Format::new().set_bold();

    let sheet = workbook.add_worksheet().set_name("Transactions")?;
    for (col, header) in TRANSACTION_HEADERS.iter().enumerate() {
        sheet.write_string_with_format(0, col as u16, *header, &header_format)?;
    }
    for (i, transaction) in transactions.iter().enumerate() {
        let row = (i + 1) as u32;
        sheet.write_string(row, 0, &transaction.id)?;
        sheet.write_string(row, 1, &transaction.txn_type)?;
        sheet.write_string(row, 2, &transaction.date)?;
        sheet.write_number(row, 3, transaction.amount)?;
        sheet.write_string(row, 4, &transaction.description)?;
        sheet.write_string(row, 5, &transaction.reference)?;
        sheet.write_string(row, 6, &transaction.status)?;
        sheet.write_string(row, 7, &transaction.created_time)?;
        sheet.write_string(row, 8, &transaction.last_modified)?;
    }

    let sheet = workbook.add_worksheet().set_name("Summary")?;
    sheet.write_string_with_format(0, 0, "Metric", &header_format)?;
    sheet.write_string_with_format(0, 1, "Value", &header_format)?;
    match summary {
        Summary::Empty(_) => {
            sheet.write_string(1, 0, "No data")?;
        }
        Summary::Stats(stats) => {
            sheet.write_string(1, 0, "Total transactions")?;
            sheet.write_number(1, 1, transactions.len() as f64)?;
            sheet.write_string(2, 0, "Total amount")?;
            sheet.write_number(2, 1, stats.total_amount)?;
            sheet.write_string(3, 0, "Average amount")?;
            sheet.write_number(3, 1, stats.average_amount)?;
            sheet.write_string(4, 0, "Earliest date")?;
            sheet.write_string(4, 1, &stats.earliest_date)?;
            sheet.write_string(5, 0, "Latest date")?;
            sheet.write_string(5, 1, &stats.latest_date)?;
        }
    }

    let sheet = workbook.add_worksheet().set_name("By Type")?;
    sheet.write_string_with_format(0, 0, "Type", &header_format)?;
    sheet.write_string_with_format(0, 1, "Count", &header_format)?;
    sheet.write_string_with_format(0, 2, "Total Amount", &header_format)?;
    if let Summary::Stats(stats) = summary {
        for (i, (txn_type, count)) in stats.counts_by_type.iter().enumerate() {
            let row = (i + 1) as u32;
            sheet.write_string(row, 0, txn_type)?;
            sheet.write_number(row, 1, *count as f64)?;
            sheet.write_number(
                row,
                2,
                stats.amounts_by_type.get(txn_type).copied().unwrap_or(0.0),
            )?;
        }
    }

    workbook.save_to_buffer().map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::aggregate;

    fn transactions() -> Vec<NormalizedTransaction> {
        vec![
            NormalizedTransaction {
                id: "17".into(),
                txn_type: "JournalEntry".into(),
                date: "2024-03-01".into(),
                amount: 150.0,
                description: "JE1".into(),
                reference: "JE1".into(),
                status: "Unknown".into(),
                created_time: "2024-03-01T08:00:00-08:00".into(),
                last_modified: "2024-03-02T08:00:00-08:00".into(),
            },
            NormalizedTransaction {
                id: "9".into(),
                txn_type: "Deposit".into(),
                date: "2024-02-10".into(),
                amount: 200.0,
                description: "Deposit - No Ref".into(),
                reference: "".into(),
                status: "Completed".into(),
                created_time: "".into(),
                last_modified: "".into(),
            },
        ]
    }

    #[test]
    fn test_csv_header_matches_field_order() {
        let bytes = to_csv(&transactions()).unwrap();
        let content = String::from_utf8(bytes).unwrap();

        let header = content.lines().next().unwrap();
        assert_eq!(
            header,
            "id,type,date,amount,description,reference,status,created_time,last_modified"
        );
    }

    #[test]
    fn test_csv_round_trip() {
        let original = transactions();
        let bytes = to_csv(&original).unwrap();

        let mut reader = csv::Reader::from_reader(bytes.as_slice());
        let parsed: Vec<NormalizedTransaction> =
            reader.deserialize().collect::<Result<_, _>>().unwrap();

        assert_eq!(parsed, original);
    }

    #[test]
    fn test_json_is_indented() {
        let bytes = to_json(&transactions()).unwrap();
        let content = String::from_utf8(bytes).unwrap();

        assert!(content.contains("\n  {"));
        assert!(content.contains("\"type\": \"JournalEntry\""));
    }

    #[test]
    fn test_xlsx_produces_a_workbook() {
        let transactions = transactions();
        let summary = aggregate(&transactions);

        let bytes = to_xlsx(&transactions, &summary).unwrap();

        // XLSX is a zip container.
        assert_eq!(&bytes[..2], b"PK");
    }

    #[test]
    fn test_xlsx_handles_empty_input() {
        let summary = aggregate(&[]);
        let bytes = to_xlsx(&[], &summary).unwrap();

        assert_eq!(&bytes[..2], b"PK");
    }

    #[test]
    fn test_attachment_filename() {
        let filename = attachment_filename("csv");

        assert!(filename.starts_with("quickbooks_transactions_"));
        assert!(filename.ends_with(".csv"));
    }
}
