//! Retail transaction data model, raw-record cleaning, and CSV loading.
//!
//! Cleaning rules applied to raw records, in order:
//! - drop credit-note invoices (identifier prefixed with `C`)
//! - drop non-positive quantities
//! - drop non-positive unit prices
//! - drop rows without a customer identifier
//! - derive `line_amount = quantity * unit_price`
//!
//! The snapshot core re-checks these guarantees fail-fast via
//! [`validate_transactions`] instead of trusting the upstream cleaner.

use std::path::Path;

use chrono::{NaiveDate, NaiveDateTime};
use csv::StringRecord;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

const TIMESTAMP_FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M", "%m/%d/%Y %H:%M"];

/// One line item as it appears in the raw export, before cleaning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawTransactionRecord {
    pub invoice_no: String,
    pub stock_code: String,
    pub description: Option<String>,
    pub quantity: i64,
    pub order_ts: NaiveDateTime,
    pub unit_price: f64,
    pub customer_id: Option<i64>,
    pub country: Option<String>,
}

/// One cleaned line item entering the snapshot core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub invoice_no: String,
    pub stock_code: String,
    pub customer_id: i64,
    pub order_ts: NaiveDateTime,
    pub quantity: i64,
    pub unit_price: f64,
    pub line_amount: f64,
}

impl Transaction {
    /// Order timestamp truncated to day granularity.
    pub fn order_date(&self) -> NaiveDate {
        self.order_ts.date()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanReport {
    pub input_rows: u64,
    pub kept_rows: u64,
    pub credit_notes: u64,
    pub non_positive_quantity: u64,
    pub non_positive_price: u64,
    pub missing_customer_id: u64,
}

#[derive(Debug, Error)]
pub enum TransactionLoadError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("missing required column '{name}'")]
    MissingColumn { name: &'static str },
    #[error("row {row}: failed to parse field {field} value '{value}'")]
    ParseField {
        row: usize,
        field: &'static str,
        value: String,
    },
}

/// A clean-input guarantee that did not hold at the snapshot core boundary.
#[derive(Debug, Error, PartialEq)]
pub enum PreconditionError {
    #[error("row {row}: credit-note invoice '{invoice_no}' must be excluded upstream")]
    CreditNoteInvoice { row: usize, invoice_no: String },
    #[error("row {row}: empty invoice identifier")]
    EmptyInvoice { row: usize },
    #[error("row {row}: non-positive quantity {quantity}")]
    NonPositiveQuantity { row: usize, quantity: i64 },
    #[error("row {row}: non-positive unit price {unit_price}")]
    NonPositiveUnitPrice { row: usize, unit_price: f64 },
    #[error("row {row}: non-positive customer id {customer_id}")]
    NonPositiveCustomerId { row: usize, customer_id: i64 },
}

pub fn clean_transactions(records: &[RawTransactionRecord]) -> (Vec<Transaction>, CleanReport) {
    let mut report = CleanReport {
        input_rows: records.len() as u64,
        ..CleanReport::default()
    };
    let mut kept = Vec::with_capacity(records.len());

    for record in records {
        if record.invoice_no.starts_with('C') {
            report.credit_notes += 1;
            continue;
        }
        if record.quantity <= 0 {
            report.non_positive_quantity += 1;
            continue;
        }
        if record.unit_price <= 0.0 {
            report.non_positive_price += 1;
            continue;
        }
        let Some(customer_id) = record.customer_id else {
            report.missing_customer_id += 1;
            continue;
        };

        kept.push(Transaction {
            invoice_no: record.invoice_no.clone(),
            stock_code: record.stock_code.clone(),
            customer_id,
            order_ts: record.order_ts,
            quantity: record.quantity,
            unit_price: record.unit_price,
            line_amount: record.quantity as f64 * record.unit_price,
        });
    }

    report.kept_rows = kept.len() as u64;

    info!(
        component = "transactions",
        event = "clean.finish",
        input_rows = report.input_rows,
        kept_rows = report.kept_rows,
        credit_notes = report.credit_notes,
        non_positive_quantity = report.non_positive_quantity,
        non_positive_price = report.non_positive_price,
        missing_customer_id = report.missing_customer_id
    );

    (kept, report)
}

/// Fail-fast check of the cleaning guarantees on rows entering the core.
pub fn validate_transactions(transactions: &[Transaction]) -> Result<(), PreconditionError> {
    for (row, tx) in transactions.iter().enumerate() {
        if tx.invoice_no.is_empty() {
            return Err(PreconditionError::EmptyInvoice { row });
        }
        if tx.invoice_no.starts_with('C') {
            return Err(PreconditionError::CreditNoteInvoice {
                row,
                invoice_no: tx.invoice_no.clone(),
            });
        }
        if tx.quantity <= 0 {
            return Err(PreconditionError::NonPositiveQuantity {
                row,
                quantity: tx.quantity,
            });
        }
        if tx.unit_price <= 0.0 {
            return Err(PreconditionError::NonPositiveUnitPrice {
                row,
                unit_price: tx.unit_price,
            });
        }
        if tx.customer_id <= 0 {
            return Err(PreconditionError::NonPositiveCustomerId {
                row,
                customer_id: tx.customer_id,
            });
        }
    }
    Ok(())
}

/// Loads raw records from a headered CSV export of the retail log.
///
/// Expected columns: `InvoiceNo`, `StockCode`, `Description` (optional),
/// `Quantity`, `InvoiceDate`, `UnitPrice`, `CustomerID`, `Country` (optional).
pub fn load_raw_transactions_csv(
    path: &Path,
) -> Result<Vec<RawTransactionRecord>, TransactionLoadError> {
    let mut reader = csv::Reader::from_path(path)?;
    let headers = reader.headers()?.clone();

    let idx_invoice = column_index(&headers, "InvoiceNo")?;
    let idx_stock = column_index(&headers, "StockCode")?;
    let idx_quantity = column_index(&headers, "Quantity")?;
    let idx_ts = column_index(&headers, "InvoiceDate")?;
    let idx_price = column_index(&headers, "UnitPrice")?;
    let idx_customer = column_index(&headers, "CustomerID")?;
    let idx_description = optional_column_index(&headers, "Description");
    let idx_country = optional_column_index(&headers, "Country");

    let mut out = Vec::new();
    for (row, record) in reader.records().enumerate() {
        let record = record?;
        out.push(RawTransactionRecord {
            invoice_no: field_string(&record, idx_invoice),
            stock_code: field_string(&record, idx_stock),
            description: idx_description.and_then(|idx| non_empty_field(&record, idx)),
            quantity: parse_i64(&record, idx_quantity, "Quantity", row)?,
            order_ts: parse_timestamp(&record, idx_ts, row)?,
            unit_price: parse_f64(&record, idx_price, "UnitPrice", row)?,
            customer_id: parse_optional_customer_id(&record, idx_customer, row)?,
            country: idx_country.and_then(|idx| non_empty_field(&record, idx)),
        });
    }

    info!(
        component = "transactions",
        event = "load.finish",
        path = %path.display(),
        rows = out.len()
    );

    Ok(out)
}

fn column_index(
    headers: &StringRecord,
    name: &'static str,
) -> Result<usize, TransactionLoadError> {
    headers
        .iter()
        .position(|header| header.trim() == name)
        .ok_or(TransactionLoadError::MissingColumn { name })
}

fn optional_column_index(headers: &StringRecord, name: &str) -> Option<usize> {
    headers.iter().position(|header| header.trim() == name)
}

fn field_string(record: &StringRecord, idx: usize) -> String {
    record.get(idx).unwrap_or_default().trim().to_string()
}

fn non_empty_field(record: &StringRecord, idx: usize) -> Option<String> {
    let value = record.get(idx).unwrap_or_default().trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

fn parse_i64(
    record: &StringRecord,
    idx: usize,
    field: &'static str,
    row: usize,
) -> Result<i64, TransactionLoadError> {
    let raw = record.get(idx).unwrap_or_default().trim();
    raw.parse::<i64>()
        .map_err(|_| TransactionLoadError::ParseField {
            row,
            field,
            value: raw.to_string(),
        })
}

fn parse_f64(
    record: &StringRecord,
    idx: usize,
    field: &'static str,
    row: usize,
) -> Result<f64, TransactionLoadError> {
    let raw = record.get(idx).unwrap_or_default().trim();
    raw.parse::<f64>()
        .map_err(|_| TransactionLoadError::ParseField {
            row,
            field,
            value: raw.to_string(),
        })
}

/// Customer ids are exported either as integers or as float-formatted text
/// ("17850.0"); an empty field means the purchase was anonymous.
fn parse_optional_customer_id(
    record: &StringRecord,
    idx: usize,
    row: usize,
) -> Result<Option<i64>, TransactionLoadError> {
    let raw = record.get(idx).unwrap_or_default().trim();
    if raw.is_empty() {
        return Ok(None);
    }
    if let Ok(value) = raw.parse::<i64>() {
        return Ok(Some(value));
    }
    match raw.parse::<f64>() {
        Ok(value) if value.fract() == 0.0 => Ok(Some(value as i64)),
        _ => Err(TransactionLoadError::ParseField {
            row,
            field: "CustomerID",
            value: raw.to_string(),
        }),
    }
}

fn parse_timestamp(
    record: &StringRecord,
    idx: usize,
    row: usize,
) -> Result<NaiveDateTime, TransactionLoadError> {
    let raw = record.get(idx).unwrap_or_default().trim();
    for format in TIMESTAMP_FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(raw, format) {
            return Ok(ts);
        }
    }
    Err(TransactionLoadError::ParseField {
        row,
        field: "InvoiceDate",
        value: raw.to_string(),
    })
}
