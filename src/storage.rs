//! Relational store for the detail and aggregate tables.
//!
//! Each run replaces both tables wholesale. Rows are first written in fixed-size batches to
//! staging tables; a single swap transaction then drops the live tables and renames the
//! staging tables into place, so readers see either the previous pair or the new pair.

use metrics::counter;
use rusqlite::{params, Connection};
use rust_decimal::{Decimal, RoundingStrategy};
use std::path::Path;
use tracing::{debug, info, instrument};

use crate::constants::{AGGREGATE_TABLE, DETAIL_TABLE};
use crate::domain::{AggregateStatistic, EnrichedExpenseRecord, LoadReport};
use crate::error::{PipelineError, Result};

const LEGAL_NAME_MAX_CHARS: usize = 255;

fn staging(table: &str) -> String {
    format!("{table}_staging")
}

fn detail_ddl(table: &str) -> String {
    format!(
        "CREATE TABLE {table} (
            tax_id        CHAR(14)       NOT NULL,
            legal_name    VARCHAR(255)   NOT NULL,
            quarter       INT            NOT NULL,
            year          INT            NOT NULL,
            expense_value DECIMAL(20,2)  NOT NULL
        )"
    )
}

fn aggregate_ddl(table: &str) -> String {
    format!(
        "CREATE TABLE {table} (
            tax_id                 CHAR(14)      NOT NULL,
            legal_name             VARCHAR(255)  NOT NULL,
            region                 CHAR(2)       NOT NULL,
            total_expense          DECIMAL(20,2) NOT NULL,
            mean_quarterly_expense DECIMAL(20,2) NOT NULL,
            std_dev_expense        DECIMAL(20,2)
        )"
    )
}

/// Renders an amount with two decimal places, half away from zero.
pub fn money(value: Decimal) -> String {
    let mut rounded = value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(2);
    rounded.to_string()
}

fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

fn load_error(table: &str) -> impl Fn(rusqlite::Error) -> PipelineError + '_ {
    move |source| PipelineError::Load {
        table: table.to_string(),
        source,
    }
}

pub struct Loader {
    conn: Connection,
    batch_size: usize,
}

impl Loader {
    pub fn open<P: AsRef<Path>>(path: P, batch_size: usize) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        Ok(Self::with_connection(conn, batch_size))
    }

    pub fn in_memory(batch_size: usize) -> Result<Self> {
        Ok(Self::with_connection(Connection::open_in_memory()?, batch_size))
    }

    pub fn with_connection(conn: Connection, batch_size: usize) -> Self {
        Self {
            conn,
            batch_size: batch_size.max(1),
        }
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn into_connection(self) -> Connection {
        self.conn
    }

    /// Replaces both tables with the given rows.
    #[instrument(skip_all, fields(aggregates = aggregates.len(), detail = detail.len()))]
    pub fn load(
        &mut self,
        aggregates: &[AggregateStatistic],
        detail: &[EnrichedExpenseRecord],
    ) -> Result<LoadReport> {
        let mut report = LoadReport::default();

        let detail_staging = staging(DETAIL_TABLE);
        self.recreate(&detail_staging, &detail_ddl(&detail_staging))?;
        report.batches += self.insert_detail(&detail_staging, detail)?;
        report.detail_rows = detail.len();

        let aggregate_staging = staging(AGGREGATE_TABLE);
        self.recreate(&aggregate_staging, &aggregate_ddl(&aggregate_staging))?;
        report.batches += self.insert_aggregates(&aggregate_staging, aggregates)?;
        report.aggregate_rows = aggregates.len();

        self.swap_into_place()?;

        counter!("expense_rows_loaded_total", "table" => DETAIL_TABLE).increment(report.detail_rows as u64);
        counter!("expense_rows_loaded_total", "table" => AGGREGATE_TABLE)
            .increment(report.aggregate_rows as u64);
        info!(
            "💾 Loaded {} detail rows and {} aggregate rows in {} batches",
            report.detail_rows, report.aggregate_rows, report.batches
        );
        Ok(report)
    }

    fn recreate(&self, table: &str, ddl: &str) -> Result<()> {
        self.conn
            .execute_batch(&format!("DROP TABLE IF EXISTS {table}; {ddl};"))
            .map_err(load_error(table))
    }

    fn insert_detail(&mut self, table: &str, rows: &[EnrichedExpenseRecord]) -> Result<usize> {
        let sql = format!(
            "INSERT INTO {table} (tax_id, legal_name, quarter, year, expense_value)
             VALUES (?1, ?2, ?3, ?4, ?5)"
        );
        let mut batches = 0;
        for chunk in rows.chunks(self.batch_size) {
            let tx = self.conn.transaction().map_err(load_error(table))?;
            {
                let mut stmt = tx.prepare_cached(&sql).map_err(load_error(table))?;
                for r in chunk {
                    stmt.execute(params![
                        r.tax_id,
                        truncate_chars(&r.legal_name, LEGAL_NAME_MAX_CHARS),
                        r.quarter,
                        r.year,
                        money(r.expense_value),
                    ])
                    .map_err(load_error(table))?;
                }
            }
            tx.commit().map_err(load_error(table))?;
            batches += 1;
            debug!("Committed batch {} of {} rows into {}", batches, chunk.len(), table);
        }
        Ok(batches)
    }

    fn insert_aggregates(&mut self, table: &str, rows: &[AggregateStatistic]) -> Result<usize> {
        let sql = format!(
            "INSERT INTO {table} (tax_id, legal_name, region, total_expense, mean_quarterly_expense, std_dev_expense)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)"
        );
        let mut batches = 0;
        for chunk in rows.chunks(self.batch_size) {
            let tx = self.conn.transaction().map_err(load_error(table))?;
            {
                let mut stmt = tx.prepare_cached(&sql).map_err(load_error(table))?;
                for r in chunk {
                    stmt.execute(params![
                        r.tax_id,
                        truncate_chars(&r.legal_name, LEGAL_NAME_MAX_CHARS),
                        r.region,
                        money(r.total_expense),
                        money(r.mean_quarterly_expense),
                        r.std_dev_expense.map(money),
                    ])
                    .map_err(load_error(table))?;
                }
            }
            tx.commit().map_err(load_error(table))?;
            batches += 1;
        }
        Ok(batches)
    }

    fn swap_into_place(&mut self) -> Result<()> {
        let tx = self.conn.transaction().map_err(load_error(AGGREGATE_TABLE))?;
        for table in [DETAIL_TABLE, AGGREGATE_TABLE] {
            tx.execute_batch(&format!(
                "DROP TABLE IF EXISTS {table};
                 ALTER TABLE {staging} RENAME TO {table};
                 CREATE INDEX IF NOT EXISTS idx_{table}_tax_id ON {table}(tax_id);",
                staging = staging(table)
            ))
            .map_err(load_error(table))?;
        }
        tx.commit().map_err(load_error(AGGREGATE_TABLE))?;
        Ok(())
    }

    pub fn count_aggregates(&self) -> Result<i64> {
        let count = self
            .conn
            .query_row(&format!("SELECT COUNT(*) FROM {AGGREGATE_TABLE}"), [], |row| row.get(0))
            .map_err(load_error(AGGREGATE_TABLE))?;
        Ok(count)
    }
}
