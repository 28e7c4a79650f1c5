//! Local sqlite transaction store.
//!
//! Stands in for the upstream persistence collaborator: cleaned transactions
//! are upserted once and read back in full by the snapshot builder. Order
//! timestamps are persisted as unix seconds.

use std::fs;
use std::path::Path;

use chrono::DateTime;
use rusqlite::{params, Connection};
use thiserror::Error;
use tracing::info;

use crate::transactions::Transaction;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("invalid stored timestamp: {0}")]
    InvalidStoredTimestamp(i64),
}

pub struct TransactionStore {
    conn: Connection,
}

impl TransactionStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            PRAGMA temp_store=MEMORY;
            ",
        )?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS transactions (
                invoice_no TEXT NOT NULL,
                stock_code TEXT NOT NULL,
                customer_id INTEGER NOT NULL,
                order_ts_s INTEGER NOT NULL,
                quantity INTEGER NOT NULL,
                unit_price REAL NOT NULL,
                line_amount REAL NOT NULL,
                PRIMARY KEY(invoice_no, stock_code, order_ts_s)
            ) WITHOUT ROWID;
            ",
        )?;

        Ok(Self { conn })
    }

    pub fn upsert_transactions(&mut self, rows: &[Transaction]) -> Result<(), StoreError> {
        if rows.is_empty() {
            return Ok(());
        }

        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "
                INSERT INTO transactions (
                    invoice_no,
                    stock_code,
                    customer_id,
                    order_ts_s,
                    quantity,
                    unit_price,
                    line_amount
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                ON CONFLICT(invoice_no, stock_code, order_ts_s) DO UPDATE SET
                    customer_id = excluded.customer_id,
                    quantity = excluded.quantity,
                    unit_price = excluded.unit_price,
                    line_amount = excluded.line_amount
                ",
            )?;

            for row in rows {
                stmt.execute(params![
                    row.invoice_no,
                    row.stock_code,
                    row.customer_id,
                    row.order_ts.and_utc().timestamp(),
                    row.quantity,
                    row.unit_price,
                    row.line_amount,
                ])?;
            }
        }
        tx.commit()?;

        info!(
            component = "store",
            event = "store.upsert",
            rows = rows.len()
        );

        Ok(())
    }

    /// Full table, ordered by timestamp, then customer, then invoice.
    pub fn load_all(&self) -> Result<Vec<Transaction>, StoreError> {
        let mut stmt = self.conn.prepare(
            "
            SELECT
                invoice_no,
                stock_code,
                customer_id,
                order_ts_s,
                quantity,
                unit_price,
                line_amount
            FROM transactions
            ORDER BY order_ts_s ASC, customer_id ASC, invoice_no ASC
            ",
        )?;

        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let order_ts_s: i64 = row.get(3)?;
            let order_ts = DateTime::from_timestamp(order_ts_s, 0)
                .ok_or(StoreError::InvalidStoredTimestamp(order_ts_s))?
                .naive_utc();
            out.push(Transaction {
                invoice_no: row.get(0)?,
                stock_code: row.get(1)?,
                customer_id: row.get(2)?,
                order_ts,
                quantity: row.get(4)?,
                unit_price: row.get(5)?,
                line_amount: row.get(6)?,
            });
        }

        Ok(out)
    }

    pub fn count(&self) -> Result<u64, StoreError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM transactions", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}
