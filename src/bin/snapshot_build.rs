use std::path::PathBuf;

use churnsnap::{
    build_snapshot, clean_transactions, init_logging, load_raw_transactions_csv, log_app_start,
    logging_config_from_env, SnapshotConfig, SnapshotRow, SnapshotSchema, SpanPolicy,
    TransactionStore,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logging = logging_config_from_env();
    init_logging(&logging)?;
    log_app_start(&logging);

    let input_csv = required_path("CHURNSNAP_INPUT_CSV")?;
    let output_csv = required_path("CHURNSNAP_OUTPUT_CSV")?;
    let store_path = std::env::var("CHURNSNAP_STORE_PATH").ok().map(PathBuf::from);

    let cfg = SnapshotConfig {
        lookback_days: parse_env_days("CHURNSNAP_LOOKBACK_DAYS")?
            .unwrap_or(SnapshotConfig::default().lookback_days),
        horizon_days: parse_env_days("CHURNSNAP_HORIZON_DAYS")?
            .unwrap_or(SnapshotConfig::default().horizon_days),
        span_policy: parse_span_policy()?,
        ..SnapshotConfig::default()
    };

    println!(
        "Snapshot build start | input={} output={} lookback_days={} horizon_days={}",
        input_csv.display(),
        output_csv.display(),
        cfg.lookback_days,
        cfg.horizon_days
    );

    let raw = load_raw_transactions_csv(&input_csv)?;
    let (cleaned, clean_report) = clean_transactions(&raw);
    println!(
        "Cleaned | input_rows={} kept_rows={} credit_notes={} non_positive_quantity={} non_positive_price={} missing_customer_id={}",
        clean_report.input_rows,
        clean_report.kept_rows,
        clean_report.credit_notes,
        clean_report.non_positive_quantity,
        clean_report.non_positive_price,
        clean_report.missing_customer_id
    );

    // When a store path is set, the cleaned rows are persisted and the core
    // runs over the store's view of the table, so reruns see prior loads.
    let transactions = match &store_path {
        Some(path) => {
            let mut store = TransactionStore::open(path)?;
            store.upsert_transactions(&cleaned)?;
            store.load_all()?
        }
        None => cleaned,
    };

    let (schema, rows, report) = build_snapshot(&transactions, &cfg)?;
    write_snapshot_csv(&output_csv, &schema, &rows)?;

    println!(
        "Snapshot written | path={} customers={} churned={} reference_date={}",
        output_csv.display(),
        report.customers,
        report.churned_customers,
        report.reference_date
    );

    let summary = serde_json::json!({
        "schema_version": schema.version,
        "schema_fingerprint": schema.fingerprint,
        "clean": clean_report,
        "snapshot": report,
    });
    println!("{}", serde_json::to_string(&summary)?);

    Ok(())
}

fn required_path(key: &str) -> Result<PathBuf, Box<dyn std::error::Error>> {
    std::env::var(key)
        .map(PathBuf::from)
        .map_err(|_| format!("{key} must be set").into())
}

fn parse_env_days(key: &str) -> Result<Option<u32>, Box<dyn std::error::Error>> {
    match std::env::var(key) {
        Ok(raw) => {
            let days: u32 = raw
                .trim()
                .parse()
                .map_err(|_| format!("{key} must be a positive integer, got '{raw}'"))?;
            Ok(Some(days))
        }
        Err(_) => Ok(None),
    }
}

fn parse_span_policy() -> Result<SpanPolicy, Box<dyn std::error::Error>> {
    match std::env::var("CHURNSNAP_SPAN_POLICY") {
        Ok(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "strict" => Ok(SpanPolicy::Strict),
            "report" => Ok(SpanPolicy::ReportAndProceed),
            other => Err(format!(
                "CHURNSNAP_SPAN_POLICY must be 'strict' or 'report', got '{other}'"
            )
            .into()),
        },
        Err(_) => Ok(SpanPolicy::Strict),
    }
}

fn write_snapshot_csv(
    path: &std::path::Path,
    schema: &SnapshotSchema,
    rows: &[SnapshotRow],
) -> Result<(), Box<dyn std::error::Error>> {
    let mut writer = csv::Writer::from_path(path)?;

    let header: Vec<&str> = schema
        .columns
        .iter()
        .map(|column| column.name.as_str())
        .collect();
    writer.write_record(&header)?;

    for row in rows {
        writer.write_record(&[
            row.customer_id.to_string(),
            row.last_purchase_date.to_string(),
            row.recency_days.to_string(),
            row.frequency.to_string(),
            row.monetary.to_string(),
            row.days_active.to_string(),
            row.aov.to_string(),
            u8::from(row.churned).to_string(),
            row.reference_date.to_string(),
            row.lookback_days.to_string(),
            row.horizon_days.to_string(),
        ])?;
    }

    writer.flush()?;
    Ok(())
}
