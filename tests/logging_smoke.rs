use std::io;
use std::io::Write;
use std::sync::{Arc, Mutex};

use chrono::NaiveDate;
use churnsnap::{
    build_snapshot, clean_transactions, log_app_start, LoggingConfig, RawTransactionRecord,
    SnapshotConfig, SpanPolicy, Transaction,
};
use tracing::dispatcher::with_default;
use tracing::Level;
use tracing_subscriber::fmt::writer::MakeWriter;

#[derive(Clone, Default)]
struct SharedWriter {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl SharedWriter {
    fn output_string(&self) -> String {
        let bytes = self
            .inner
            .lock()
            .expect("writer lock should not be poisoned");
        String::from_utf8_lossy(&bytes).to_string()
    }
}

struct SharedWriterGuard {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl<'a> MakeWriter<'a> for SharedWriter {
    type Writer = SharedWriterGuard;

    fn make_writer(&'a self) -> Self::Writer {
        SharedWriterGuard {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Write for SharedWriterGuard {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut out = self
            .inner
            .lock()
            .expect("writer lock should not be poisoned");
        out.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn capture_logs(max_level: Level, f: impl FnOnce()) -> String {
    let writer = SharedWriter::default();
    let subscriber = tracing_subscriber::fmt()
        .json()
        .with_ansi(false)
        .with_max_level(max_level)
        .with_writer(writer.clone())
        .finish();
    let dispatch = tracing::Dispatch::new(subscriber);

    with_default(&dispatch, f);
    writer.output_string()
}

fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).expect("valid date")
}

fn tx(invoice_no: &str, customer_id: i64, order_date: NaiveDate) -> Transaction {
    Transaction {
        invoice_no: invoice_no.to_string(),
        stock_code: "85123A".to_string(),
        customer_id,
        order_ts: order_date.and_hms_opt(12, 0, 0).expect("valid time"),
        quantity: 1,
        unit_price: 9.99,
        line_amount: 9.99,
    }
}

#[test]
fn snapshot_build_emits_lifecycle_events() {
    let transactions = vec![
        tx("536365", 17850, date(2025, 1, 10)),
        tx("536366", 13047, date(2025, 6, 1)),
        tx("536367", 17850, date(2025, 12, 20)),
    ];

    let logs = capture_logs(Level::INFO, || {
        build_snapshot(&transactions, &SnapshotConfig::default()).expect("snapshot builds");
    });

    assert!(logs.contains("\"event\":\"snapshot.build.start\""));
    assert!(logs.contains("\"event\":\"snapshot.schema.built\""));
    assert!(logs.contains("\"event\":\"snapshot.build.finish\""));
}

#[test]
fn insufficient_span_is_reported_at_warn() {
    let transactions = vec![
        tx("536365", 17850, date(2025, 11, 1)),
        tx("536366", 13047, date(2025, 11, 20)),
    ];
    let cfg = SnapshotConfig {
        span_policy: SpanPolicy::ReportAndProceed,
        ..SnapshotConfig::default()
    };

    let logs = capture_logs(Level::WARN, || {
        build_snapshot(&transactions, &cfg).expect("build proceeds under report policy");
    });

    assert!(logs.contains("\"event\":\"snapshot.span.insufficient\""));
}

#[test]
fn cleaning_emits_summary_event() {
    let records = vec![RawTransactionRecord {
        invoice_no: "C536379".to_string(),
        stock_code: "D".to_string(),
        description: None,
        quantity: 1,
        order_ts: date(2025, 11, 3).and_hms_opt(9, 41, 0).expect("valid time"),
        unit_price: 27.50,
        customer_id: Some(14527),
        country: None,
    }];

    let logs = capture_logs(Level::INFO, || {
        let (cleaned, report) = clean_transactions(&records);
        assert!(cleaned.is_empty());
        assert_eq!(report.credit_notes, 1);
    });

    assert!(logs.contains("\"event\":\"clean.finish\""));
    assert!(logs.contains("\"credit_notes\":1"));
}

#[test]
fn app_start_emits_baseline_event() {
    let logs = capture_logs(Level::INFO, || {
        log_app_start(&LoggingConfig::default());
    });

    assert!(logs.contains("\"event\":\"app.start\""));
}
