//! churnsnap core crate.
//!
//! Builds a customer-level churn training snapshot from retail transaction
//! logs:
//! - reference date selection with full forward label coverage
//! - lookback feature window / forward horizon window partitioning
//! - per-customer behavioral aggregation (recency, frequency, monetary,
//!   days active, average order value)
//! - leakage-safe churn label derivation

mod observability;
mod snapshot;
mod store;
mod transactions;

pub use observability::{
    init_logging, log_app_start, logging_config_from_env, LogFormat, LoggingConfig,
    LoggingInitError,
};
pub use snapshot::{
    aggregate_customers, assert_schema_compatible, build_snapshot, build_snapshot_at,
    build_snapshot_from_store, build_snapshot_schema, derive_labels, partition_windows,
    pick_reference_date, CustomerAggregate, SnapshotColumn, SnapshotConfig, SnapshotDType,
    SnapshotError, SnapshotReport, SnapshotRow, SnapshotSchema, SpanPolicy, Windows,
    DEFAULT_HORIZON_DAYS, DEFAULT_LOOKBACK_DAYS, SNAPSHOT_SCHEMA_VERSION,
};
pub use store::{StoreError, TransactionStore};
pub use transactions::{
    clean_transactions, load_raw_transactions_csv, validate_transactions, CleanReport,
    PreconditionError, RawTransactionRecord, Transaction, TransactionLoadError,
};
