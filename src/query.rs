//! Read-only queries over the loaded tables. Every caller-supplied value is bound as a
//! statement parameter.

use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};
use serde::Serialize;
use std::path::Path;

use crate::constants::{AGGREGATE_TABLE, DETAIL_TABLE};
use crate::error::Result;

pub const DEFAULT_PAGE_LIMIT: u32 = 10;
pub const MAX_PAGE_LIMIT: u32 = 100;
pub const TOP_OPERATORS: u32 = 5;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperatorRow {
    pub tax_id: String,
    pub legal_name: String,
    pub region: String,
    pub total_expense: f64,
    pub mean_quarterly_expense: f64,
    pub std_dev_expense: Option<f64>,
}

impl OperatorRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            tax_id: row.get(0)?,
            legal_name: row.get(1)?,
            region: row.get(2)?,
            total_expense: row.get(3)?,
            mean_quarterly_expense: row.get(4)?,
            std_dev_expense: row.get(5)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExpenseRow {
    pub year: i32,
    pub quarter: u32,
    pub legal_name: String,
    pub expense_value: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub total: i64,
    pub page: u32,
    pub limit: u32,
}

/// Page request with `page >= 1` and `limit` in `1..=MAX_PAGE_LIMIT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
}

impl Pagination {
    pub fn new(page: Option<u32>, limit: Option<u32>) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            limit: limit.unwrap_or(DEFAULT_PAGE_LIMIT).clamp(1, MAX_PAGE_LIMIT),
        }
    }

    pub fn offset(&self) -> i64 {
        i64::from(self.page - 1) * i64::from(self.limit)
    }
}

const OPERATOR_COLUMNS: &str =
    "tax_id, legal_name, region, total_expense, mean_quarterly_expense, std_dev_expense";

pub fn open_read_only<P: AsRef<Path>>(path: P) -> Result<Connection> {
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    Ok(conn)
}

/// Aggregates by descending total, one page at a time.
pub fn list_operators(conn: &Connection, pagination: Pagination) -> Result<Page<OperatorRow>> {
    let total: i64 =
        conn.query_row(&format!("SELECT COUNT(*) FROM {AGGREGATE_TABLE}"), [], |r| r.get(0))?;
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {OPERATOR_COLUMNS} FROM {AGGREGATE_TABLE}
         ORDER BY total_expense DESC, rowid LIMIT ?1 OFFSET ?2"
    ))?;
    let data = stmt
        .query_map(params![pagination.limit, pagination.offset()], OperatorRow::from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(Page {
        data,
        total,
        page: pagination.page,
        limit: pagination.limit,
    })
}

pub fn get_operator(conn: &Connection, tax_id: &str) -> Result<Option<OperatorRow>> {
    let row = conn
        .query_row(
            &format!(
                "SELECT {OPERATOR_COLUMNS} FROM {AGGREGATE_TABLE}
                 WHERE tax_id = ?1 ORDER BY total_expense DESC LIMIT 1"
            ),
            params![tax_id],
            OperatorRow::from_row,
        )
        .optional()?;
    Ok(row)
}

/// Detail rows of one entity in chronological order.
pub fn list_expenses(conn: &Connection, tax_id: &str) -> Result<Vec<ExpenseRow>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT year, quarter, legal_name, expense_value FROM {DETAIL_TABLE}
         WHERE tax_id = ?1 ORDER BY year, quarter, rowid"
    ))?;
    let rows = stmt
        .query_map(params![tax_id], |row| {
            Ok(ExpenseRow {
                year: row.get(0)?,
                quarter: row.get(1)?,
                legal_name: row.get(2)?,
                expense_value: row.get(3)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub fn top_operators(conn: &Connection, n: u32) -> Result<Vec<OperatorRow>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {OPERATOR_COLUMNS} FROM {AGGREGATE_TABLE}
         ORDER BY total_expense DESC, rowid LIMIT ?1"
    ))?;
    let rows = stmt
        .query_map(params![n], OperatorRow::from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AggregateStatistic, EnrichedExpenseRecord};
    use crate::storage::Loader;
    use rust_decimal::Decimal;

    fn stat(tax_id: &str, total: i64) -> AggregateStatistic {
        AggregateStatistic {
            tax_id: tax_id.into(),
            legal_name: format!("OPERADORA {tax_id}"),
            region: "SP".into(),
            total_expense: Decimal::new(total, 0),
            mean_quarterly_expense: Decimal::new(total, 0),
            std_dev_expense: None,
        }
    }

    fn detail(tax_id: &str, year: i32, quarter: u32, value: i64) -> EnrichedExpenseRecord {
        EnrichedExpenseRecord {
            tax_id: tax_id.into(),
            legal_name: format!("OPERADORA {tax_id}"),
            year,
            quarter,
            expense_value: Decimal::new(value, 2),
            region: Some("SP".into()),
        }
    }

    fn loaded() -> Loader {
        let mut loader = Loader::in_memory(1000).unwrap();
        let stats: Vec<_> = (1..=7).map(|i| stat(&format!("{i:014}"), i * 100)).collect();
        let detail = vec![
            detail("00000000000001", 2024, 2, 5000),
            detail("00000000000001", 2023, 4, 2500),
            detail("00000000000001", 2024, 1, 1000),
        ];
        loader.load(&stats, &detail).unwrap();
        loader
    }

    #[test]
    fn test_pagination_is_clamped() {
        assert_eq!(Pagination::new(None, None), Pagination { page: 1, limit: 10 });
        assert_eq!(Pagination::new(Some(0), Some(0)), Pagination { page: 1, limit: 1 });
        assert_eq!(Pagination::new(Some(3), Some(1000)).limit, MAX_PAGE_LIMIT);
        assert_eq!(Pagination::new(Some(3), Some(20)).offset(), 40);
    }

    #[test]
    fn test_list_operators_pages_by_total() {
        let loader = loaded();
        let page = list_operators(loader.connection(), Pagination::new(Some(2), Some(3))).unwrap();
        assert_eq!(page.total, 7);
        assert_eq!(page.page, 2);
        let ids: Vec<&str> = page.data.iter().map(|r| r.tax_id.as_str()).collect();
        assert_eq!(ids, vec!["00000000000004", "00000000000003", "00000000000002"]);
    }

    #[test]
    fn test_get_operator_by_tax_id() {
        let loader = loaded();
        let row = get_operator(loader.connection(), "00000000000007").unwrap().unwrap();
        assert_eq!(row.total_expense, 700.0);
        assert!(get_operator(loader.connection(), "99999999999999").unwrap().is_none());
        // bound as a value, so quoting cannot widen the match
        assert!(get_operator(loader.connection(), "' OR '1'='1").unwrap().is_none());
    }

    #[test]
    fn test_expenses_in_chronological_order() {
        let loader = loaded();
        let rows = list_expenses(loader.connection(), "00000000000001").unwrap();
        let periods: Vec<(i32, u32)> = rows.iter().map(|r| (r.year, r.quarter)).collect();
        assert_eq!(periods, vec![(2023, 4), (2024, 1), (2024, 2)]);
        assert_eq!(rows[0].expense_value, 25.0);
    }

    #[test]
    fn test_top_operators() {
        let loader = loaded();
        let top = top_operators(loader.connection(), TOP_OPERATORS).unwrap();
        assert_eq!(top.len(), 5);
        assert_eq!(top[0].tax_id, "00000000000007");
    }
}
