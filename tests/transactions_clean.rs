use std::fs;

use chrono::{NaiveDate, NaiveDateTime};
use churnsnap::{
    clean_transactions, load_raw_transactions_csv, validate_transactions, PreconditionError,
    RawTransactionRecord, Transaction, TransactionLoadError,
};

fn ts(year: i32, month: u32, day: u32, hour: u32, minute: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(year, month, day)
        .expect("valid date")
        .and_hms_opt(hour, minute, 0)
        .expect("valid time")
}

fn raw(
    invoice_no: &str,
    quantity: i64,
    unit_price: f64,
    customer_id: Option<i64>,
) -> RawTransactionRecord {
    RawTransactionRecord {
        invoice_no: invoice_no.to_string(),
        stock_code: "85123A".to_string(),
        description: Some("WHITE HANGING HEART T-LIGHT HOLDER".to_string()),
        quantity,
        order_ts: ts(2025, 11, 3, 9, 15),
        unit_price,
        customer_id,
        country: Some("United Kingdom".to_string()),
    }
}

#[test]
fn clean_drops_each_exclusion_category_and_derives_line_amount() {
    let records = vec![
        raw("536365", 6, 2.55, Some(17850)),
        raw("C536379", 1, 27.50, Some(14527)),
        raw("536370", -2, 1.85, Some(12583)),
        raw("536371", 4, 0.0, Some(13047)),
        raw("536372", 3, 4.25, None),
    ];

    let (cleaned, report) = clean_transactions(&records);

    assert_eq!(report.input_rows, 5);
    assert_eq!(report.kept_rows, 1);
    assert_eq!(report.credit_notes, 1);
    assert_eq!(report.non_positive_quantity, 1);
    assert_eq!(report.non_positive_price, 1);
    assert_eq!(report.missing_customer_id, 1);

    assert_eq!(cleaned.len(), 1);
    let tx = &cleaned[0];
    assert_eq!(tx.invoice_no, "536365");
    assert_eq!(tx.customer_id, 17850);
    assert!((tx.line_amount - 15.30).abs() < 1e-9);

    validate_transactions(&cleaned).expect("cleaned rows satisfy the core preconditions");
}

#[test]
fn validation_reports_first_violating_row() {
    let good = Transaction {
        invoice_no: "536365".to_string(),
        stock_code: "85123A".to_string(),
        customer_id: 17850,
        order_ts: ts(2025, 11, 3, 9, 15),
        quantity: 6,
        unit_price: 2.55,
        line_amount: 15.30,
    };

    let mut credit_note = good.clone();
    credit_note.invoice_no = "C536379".to_string();
    let err = validate_transactions(&[good.clone(), credit_note]).expect_err("must fail");
    assert_eq!(
        err,
        PreconditionError::CreditNoteInvoice {
            row: 1,
            invoice_no: "C536379".to_string(),
        }
    );

    let mut bad_customer = good.clone();
    bad_customer.customer_id = 0;
    let err = validate_transactions(&[bad_customer]).expect_err("must fail");
    assert!(matches!(
        err,
        PreconditionError::NonPositiveCustomerId { row: 0, .. }
    ));

    let mut bad_price = good;
    bad_price.unit_price = -1.0;
    let err = validate_transactions(&[bad_price]).expect_err("must fail");
    assert!(matches!(
        err,
        PreconditionError::NonPositiveUnitPrice { row: 0, .. }
    ));
}

#[test]
fn csv_loader_parses_typed_fields() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("transactions.csv");
    fs::write(
        &path,
        "InvoiceNo,StockCode,Description,Quantity,InvoiceDate,UnitPrice,CustomerID,Country\n\
         536365,85123A,WHITE HANGING HEART T-LIGHT HOLDER,6,2025-11-03 09:15:00,2.55,17850.0,United Kingdom\n\
         536366,71053,,2,2025-11-03 09:28,3.39,,France\n\
         C536379,D,Discount,-1,11/03/2025 09:41,27.50,14527,United Kingdom\n",
    )
    .expect("write csv");

    let records = load_raw_transactions_csv(&path).expect("csv loads");
    assert_eq!(records.len(), 3);

    assert_eq!(records[0].invoice_no, "536365");
    assert_eq!(records[0].customer_id, Some(17850));
    assert_eq!(records[0].order_ts, ts(2025, 11, 3, 9, 15));
    assert_eq!(records[0].quantity, 6);
    assert!((records[0].unit_price - 2.55).abs() < 1e-9);

    assert_eq!(records[1].customer_id, None);
    assert_eq!(records[1].description, None);
    assert_eq!(records[1].order_ts, ts(2025, 11, 3, 9, 28));

    assert_eq!(records[2].invoice_no, "C536379");
    assert_eq!(records[2].quantity, -1);
    assert_eq!(records[2].order_ts, ts(2025, 11, 3, 9, 41));
}

#[test]
fn csv_loader_rejects_missing_columns_and_bad_fields() {
    let dir = tempfile::tempdir().expect("temp dir");

    let missing = dir.path().join("missing.csv");
    fs::write(
        &missing,
        "InvoiceNo,StockCode,Quantity,UnitPrice,CustomerID\n536365,85123A,6,2.55,17850\n",
    )
    .expect("write csv");
    let err = load_raw_transactions_csv(&missing).expect_err("must fail");
    assert!(matches!(
        err,
        TransactionLoadError::MissingColumn {
            name: "InvoiceDate"
        }
    ));

    let bad = dir.path().join("bad.csv");
    fs::write(
        &bad,
        "InvoiceNo,StockCode,Quantity,InvoiceDate,UnitPrice,CustomerID\n\
         536365,85123A,six,2025-11-03 09:15:00,2.55,17850\n",
    )
    .expect("write csv");
    let err = load_raw_transactions_csv(&bad).expect_err("must fail");
    match err {
        TransactionLoadError::ParseField { row, field, value } => {
            assert_eq!(row, 0);
            assert_eq!(field, "Quantity");
            assert_eq!(value, "six");
        }
        other => panic!("unexpected error: {other}"),
    }
}
