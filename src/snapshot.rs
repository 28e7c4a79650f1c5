//! Customer churn snapshot construction.
//!
//! Reference date selection, feature/horizon window partitioning, per-customer
//! behavioral aggregation, and leakage-safe churn label derivation. The whole
//! pipeline is a pure function `(transactions, reference_date, config)` to one
//! snapshot row per customer active in the lookback window.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::Path;

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{info, warn};

use crate::store::{StoreError, TransactionStore};
use crate::transactions::{validate_transactions, PreconditionError, Transaction};

pub const SNAPSHOT_SCHEMA_VERSION: u32 = 1;

pub const DEFAULT_LOOKBACK_DAYS: u32 = 180;
pub const DEFAULT_HORIZON_DAYS: u32 = 60;

/// What to do when the observed data range cannot cover a full lookback plus
/// horizon around the selected reference date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpanPolicy {
    Strict,
    ReportAndProceed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotConfig {
    pub lookback_days: u32,
    pub horizon_days: u32,
    pub span_policy: SpanPolicy,
    pub schema_version: u32,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            lookback_days: DEFAULT_LOOKBACK_DAYS,
            horizon_days: DEFAULT_HORIZON_DAYS,
            span_policy: SpanPolicy::Strict,
            schema_version: SNAPSHOT_SCHEMA_VERSION,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SnapshotDType {
    Int64,
    Float64,
    Date,
}

impl SnapshotDType {
    fn as_str(self) -> &'static str {
        match self {
            Self::Int64 => "int64",
            Self::Float64 => "float64",
            Self::Date => "date",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotColumn {
    pub name: String,
    pub dtype: SnapshotDType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotSchema {
    pub version: u32,
    pub fingerprint: String,
    pub columns: Vec<SnapshotColumn>,
}

/// One output row: behavioral aggregates over the lookback window, the churn
/// label from the horizon window, and run metadata for auditability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRow {
    pub customer_id: i64,
    pub last_purchase_date: NaiveDate,
    pub recency_days: i64,
    pub frequency: u64,
    pub monetary: f64,
    pub days_active: u64,
    pub aov: f64,
    pub churned: bool,
    pub reference_date: NaiveDate,
    pub lookback_days: u32,
    pub horizon_days: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotReport {
    pub reference_date: NaiveDate,
    pub input_rows: u64,
    pub feature_rows: u64,
    pub horizon_rows: u64,
    pub customers: u64,
    pub churned_customers: u64,
    pub observed_start: Option<NaiveDate>,
    pub observed_end: Option<NaiveDate>,
    pub observed_span_days: i64,
    pub insufficient_span: bool,
}

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("invalid snapshot config: {0}")]
    InvalidConfig(String),
    #[error("transaction table is empty; no reference date can be selected")]
    EmptyTransactionTable,
    #[error(
        "observed data span of {observed_days} days cannot cover lookback + horizon \
         ({required_days} days required)"
    )]
    InsufficientSpan {
        observed_days: i64,
        required_days: i64,
    },
    #[error("date arithmetic out of range: {date} offset by {offset_days} days")]
    DateOutOfRange { date: NaiveDate, offset_days: u32 },
    #[error("input precondition violated: {0}")]
    Precondition(#[from] PreconditionError),
    #[error("transaction store error: {0}")]
    Store(#[from] StoreError),
    #[error("schema version mismatch: expected {expected}, got {actual}")]
    SchemaVersionMismatch { expected: u32, actual: u32 },
    #[error("schema fingerprint mismatch: expected {expected}, got {actual}")]
    SchemaFingerprintMismatch { expected: String, actual: String },
}

/// Intermediate per-customer aggregate over the feature window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerAggregate {
    pub customer_id: i64,
    pub last_purchase_date: NaiveDate,
    pub frequency: u64,
    pub monetary: f64,
    pub days_active: u64,
    pub recency_days: i64,
    pub aov: f64,
}

/// Disjoint row subsets of the transaction table around the reference date.
#[derive(Debug, Clone)]
pub struct Windows<'a> {
    pub feature: Vec<&'a Transaction>,
    pub horizon: Vec<&'a Transaction>,
    pub lookback_start: NaiveDate,
    pub horizon_end: NaiveDate,
}

pub fn build_snapshot_schema(cfg: &SnapshotConfig) -> SnapshotSchema {
    let lookback = cfg.lookback_days;
    let horizon = cfg.horizon_days;
    let columns = vec![
        column("customer_id", SnapshotDType::Int64),
        column("last_purchase_date", SnapshotDType::Date),
        column("recency_days", SnapshotDType::Int64),
        column(&format!("frequency_{lookback}d"), SnapshotDType::Int64),
        column(&format!("monetary_{lookback}d"), SnapshotDType::Float64),
        column(&format!("days_active_{lookback}d"), SnapshotDType::Int64),
        column(&format!("aov_{lookback}d"), SnapshotDType::Float64),
        column(&format!("churn_{horizon}d"), SnapshotDType::Int64),
        column("reference_date", SnapshotDType::Date),
        column("lookback_days", SnapshotDType::Int64),
        column("horizon_days", SnapshotDType::Int64),
    ];

    let fingerprint = schema_fingerprint(cfg, &columns);

    info!(
        component = "snapshot",
        event = "snapshot.schema.built",
        version = cfg.schema_version,
        lookback_days = cfg.lookback_days,
        horizon_days = cfg.horizon_days,
        column_count = columns.len(),
        fingerprint = fingerprint
    );

    SnapshotSchema {
        version: cfg.schema_version,
        fingerprint,
        columns,
    }
}

/// Latest calendar date with a full horizon window still inside the data.
///
/// Maximum order timestamp, truncated to day granularity, minus the horizon
/// length. Guarantees every customer's label window has complete coverage.
pub fn pick_reference_date(
    transactions: &[Transaction],
    horizon_days: u32,
) -> Result<NaiveDate, SnapshotError> {
    let max_date = transactions
        .iter()
        .map(Transaction::order_date)
        .max()
        .ok_or(SnapshotError::EmptyTransactionTable)?;

    sub_days(max_date, horizon_days)
}

/// Splits the table into the feature window `[ref - L, ref]` and the horizon
/// window `(ref, ref + H]`. The boundary day belongs to the feature window
/// only, so no transaction can feed both features and the label.
pub fn partition_windows<'a>(
    transactions: &'a [Transaction],
    reference_date: NaiveDate,
    cfg: &SnapshotConfig,
) -> Result<Windows<'a>, SnapshotError> {
    let lookback_start = sub_days(reference_date, cfg.lookback_days)?;
    let horizon_end = add_days(reference_date, cfg.horizon_days)?;

    let mut feature = Vec::new();
    let mut horizon = Vec::new();
    for tx in transactions {
        let date = tx.order_date();
        if date >= lookback_start && date <= reference_date {
            feature.push(tx);
        } else if date > reference_date && date <= horizon_end {
            horizon.push(tx);
        }
    }

    Ok(Windows {
        feature,
        horizon,
        lookback_start,
        horizon_end,
    })
}

/// Per-customer behavioral aggregates over the feature window, one entry per
/// customer with at least one transaction there, ordered by customer id.
///
/// Pure function of the feature window and the reference date; the horizon
/// window is never consulted here.
pub fn aggregate_customers(
    feature_window: &[&Transaction],
    reference_date: NaiveDate,
) -> Vec<CustomerAggregate> {
    struct State {
        last_purchase_date: NaiveDate,
        invoices: HashSet<String>,
        active_days: BTreeSet<NaiveDate>,
        monetary: f64,
    }

    let mut by_customer: BTreeMap<i64, State> = BTreeMap::new();
    for tx in feature_window {
        let date = tx.order_date();
        let state = by_customer.entry(tx.customer_id).or_insert_with(|| State {
            last_purchase_date: date,
            invoices: HashSet::new(),
            active_days: BTreeSet::new(),
            monetary: 0.0,
        });
        state.last_purchase_date = state.last_purchase_date.max(date);
        state.invoices.insert(tx.invoice_no.clone());
        state.active_days.insert(date);
        state.monetary += tx.line_amount;
    }

    by_customer
        .into_iter()
        .map(|(customer_id, state)| {
            let frequency = state.invoices.len() as u64;
            CustomerAggregate {
                customer_id,
                last_purchase_date: state.last_purchase_date,
                frequency,
                monetary: state.monetary,
                days_active: state.active_days.len() as u64,
                recency_days: (reference_date - state.last_purchase_date).num_days(),
                // frequency >= 1: the customer exists because of an order
                aov: state.monetary / frequency as f64,
            }
        })
        .collect()
}

/// Joins horizon-window activity onto the aggregates and stamps run metadata.
///
/// A customer absent from the horizon window grouping is churned, not a data
/// quality problem: missing means zero future orders.
pub fn derive_labels(
    aggregates: Vec<CustomerAggregate>,
    horizon_window: &[&Transaction],
    reference_date: NaiveDate,
    cfg: &SnapshotConfig,
) -> Vec<SnapshotRow> {
    let mut future_orders: HashMap<i64, u64> = HashMap::new();
    for tx in horizon_window {
        *future_orders.entry(tx.customer_id).or_insert(0) += 1;
    }

    aggregates
        .into_iter()
        .map(|agg| {
            let churned = future_orders.get(&agg.customer_id).copied().unwrap_or(0) == 0;
            SnapshotRow {
                customer_id: agg.customer_id,
                last_purchase_date: agg.last_purchase_date,
                recency_days: agg.recency_days,
                frequency: agg.frequency,
                monetary: agg.monetary,
                days_active: agg.days_active,
                aov: agg.aov,
                churned,
                reference_date,
                lookback_days: cfg.lookback_days,
                horizon_days: cfg.horizon_days,
            }
        })
        .collect()
}

/// Builds the snapshot after selecting the reference date from the data.
pub fn build_snapshot(
    transactions: &[Transaction],
    cfg: &SnapshotConfig,
) -> Result<(SnapshotSchema, Vec<SnapshotRow>, SnapshotReport), SnapshotError> {
    validate_config(cfg)?;
    let reference_date = pick_reference_date(transactions, cfg.horizon_days)?;
    build_snapshot_at(transactions, reference_date, cfg)
}

/// Builds the snapshot for an explicit reference date.
pub fn build_snapshot_at(
    transactions: &[Transaction],
    reference_date: NaiveDate,
    cfg: &SnapshotConfig,
) -> Result<(SnapshotSchema, Vec<SnapshotRow>, SnapshotReport), SnapshotError> {
    validate_config(cfg)?;
    validate_transactions(transactions)?;

    info!(
        component = "snapshot",
        event = "snapshot.build.start",
        reference_date = %reference_date,
        lookback_days = cfg.lookback_days,
        horizon_days = cfg.horizon_days,
        input_rows = transactions.len(),
        span_policy = ?cfg.span_policy
    );

    let schema = build_snapshot_schema(cfg);

    let observed_start = transactions.iter().map(Transaction::order_date).min();
    let observed_end = transactions.iter().map(Transaction::order_date).max();
    let observed_span_days = match (observed_start, observed_end) {
        (Some(start), Some(end)) => (end - start).num_days() + 1,
        _ => 0,
    };
    let required_days = i64::from(cfg.lookback_days) + i64::from(cfg.horizon_days) + 1;

    let mut insufficient_span = false;
    if !transactions.is_empty() && observed_span_days < required_days {
        match cfg.span_policy {
            SpanPolicy::Strict => {
                return Err(SnapshotError::InsufficientSpan {
                    observed_days: observed_span_days,
                    required_days,
                });
            }
            SpanPolicy::ReportAndProceed => {
                warn!(
                    component = "snapshot",
                    event = "snapshot.span.insufficient",
                    observed_days = observed_span_days,
                    required_days = required_days,
                    reference_date = %reference_date
                );
                insufficient_span = true;
            }
        }
    }

    let windows = partition_windows(transactions, reference_date, cfg)?;
    let aggregates = aggregate_customers(&windows.feature, reference_date);
    let rows = derive_labels(aggregates, &windows.horizon, reference_date, cfg);

    let report = SnapshotReport {
        reference_date,
        input_rows: transactions.len() as u64,
        feature_rows: windows.feature.len() as u64,
        horizon_rows: windows.horizon.len() as u64,
        customers: rows.len() as u64,
        churned_customers: rows.iter().filter(|row| row.churned).count() as u64,
        observed_start,
        observed_end,
        observed_span_days,
        insufficient_span,
    };

    info!(
        component = "snapshot",
        event = "snapshot.build.finish",
        reference_date = %reference_date,
        input_rows = report.input_rows,
        feature_rows = report.feature_rows,
        horizon_rows = report.horizon_rows,
        customers = report.customers,
        churned_customers = report.churned_customers,
        insufficient_span = report.insufficient_span
    );

    Ok((schema, rows, report))
}

/// Loads the full transaction table from a local store and builds the snapshot.
pub fn build_snapshot_from_store(
    store_path: &Path,
    cfg: &SnapshotConfig,
) -> Result<(SnapshotSchema, Vec<SnapshotRow>, SnapshotReport), SnapshotError> {
    validate_config(cfg)?;
    let store = TransactionStore::open(store_path)?;
    let transactions = store.load_all()?;
    build_snapshot(&transactions, cfg)
}

pub fn assert_schema_compatible(
    expected_version: u32,
    expected_fingerprint: &str,
    actual: &SnapshotSchema,
) -> Result<(), SnapshotError> {
    if expected_version != actual.version {
        return Err(SnapshotError::SchemaVersionMismatch {
            expected: expected_version,
            actual: actual.version,
        });
    }

    if expected_fingerprint != actual.fingerprint {
        return Err(SnapshotError::SchemaFingerprintMismatch {
            expected: expected_fingerprint.to_string(),
            actual: actual.fingerprint.clone(),
        });
    }

    Ok(())
}

fn validate_config(cfg: &SnapshotConfig) -> Result<(), SnapshotError> {
    if cfg.lookback_days == 0 {
        return Err(SnapshotError::InvalidConfig(
            "lookback_days must be > 0".to_string(),
        ));
    }
    if cfg.horizon_days == 0 {
        return Err(SnapshotError::InvalidConfig(
            "horizon_days must be > 0".to_string(),
        ));
    }
    if cfg.schema_version != SNAPSHOT_SCHEMA_VERSION {
        return Err(SnapshotError::InvalidConfig(format!(
            "schema_version must equal SNAPSHOT_SCHEMA_VERSION ({SNAPSHOT_SCHEMA_VERSION})"
        )));
    }
    Ok(())
}

fn column(name: &str, dtype: SnapshotDType) -> SnapshotColumn {
    SnapshotColumn {
        name: name.to_string(),
        dtype,
    }
}

fn sub_days(date: NaiveDate, days: u32) -> Result<NaiveDate, SnapshotError> {
    date.checked_sub_days(Days::new(u64::from(days)))
        .ok_or(SnapshotError::DateOutOfRange {
            date,
            offset_days: days,
        })
}

fn add_days(date: NaiveDate, days: u32) -> Result<NaiveDate, SnapshotError> {
    date.checked_add_days(Days::new(u64::from(days)))
        .ok_or(SnapshotError::DateOutOfRange {
            date,
            offset_days: days,
        })
}

fn schema_fingerprint(cfg: &SnapshotConfig, columns: &[SnapshotColumn]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("version:{};", cfg.schema_version));
    hasher.update(format!("lookback_days:{};", cfg.lookback_days));
    hasher.update(format!("horizon_days:{};", cfg.horizon_days));
    hasher.update("columns:");
    for column in columns {
        hasher.update(column.name.as_bytes());
        hasher.update(format!(":{};", column.dtype.as_str()));
    }
    hex::encode(hasher.finalize())
}
