//! Archive normalization: ZIP entries → raw tables → canonical expense records.

use chrono::{Datelike, NaiveDate};
use metrics::counter;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info, instrument, warn};

use crate::constants::{ACCOUNT_CLASS_COLUMN, EXPENSE_ACCOUNT_PREFIX};
use crate::domain::{CanonicalExpenseRecord, RawTable, RawTableRow};
use crate::error::Result;
use crate::pipeline::formats::TableFormat;

/// Canonical fields a source column can map onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CanonicalField {
    OriginDate,
    EntityKey,
    LegalName,
    ExpenseValue,
}

/// Source header (after uppercasing) → canonical field. Unlisted columns are dropped.
pub const COLUMN_ALIASES: [(&str, CanonicalField); 4] = [
    ("DATA", CanonicalField::OriginDate),
    ("REG_ANS", CanonicalField::EntityKey),
    ("DESCRICAO", CanonicalField::LegalName),
    ("VL_SALDO_FINAL", CanonicalField::ExpenseValue),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DropReason {
    MissingEntityKey,
    MissingLegalName,
    InvalidExpenseValue,
    NonPositiveExpense,
    InvalidDate,
}

impl DropReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DropReason::MissingEntityKey => "missing_entity_key",
            DropReason::MissingLegalName => "missing_legal_name",
            DropReason::InvalidExpenseValue => "invalid_expense_value",
            DropReason::NonPositiveExpense => "non_positive_expense",
            DropReason::InvalidDate => "invalid_date",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RowOutcome {
    Kept(CanonicalExpenseRecord),
    /// Not an expense account; excluded by the accounting class rule.
    Filtered,
    Dropped(DropReason),
}

/// Row and entry counters for one normalization pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NormalizeStats {
    pub archives_processed: usize,
    pub archives_failed: usize,
    pub entries_parsed: usize,
    pub entries_ignored: usize,
    pub entries_failed: usize,
    pub rows_read: usize,
    pub rows_kept: usize,
    pub rows_filtered: usize,
    pub discarded_lines: usize,
    pub dropped: BTreeMap<String, usize>,
}

impl NormalizeStats {
    pub fn record_drop(&mut self, reason: DropReason) {
        *self.dropped.entry(reason.as_str().to_string()).or_default() += 1;
    }

    pub fn dropped_total(&self) -> usize {
        self.dropped.values().sum()
    }

    pub fn merge(&mut self, other: &NormalizeStats) {
        self.archives_processed += other.archives_processed;
        self.archives_failed += other.archives_failed;
        self.entries_parsed += other.entries_parsed;
        self.entries_ignored += other.entries_ignored;
        self.entries_failed += other.entries_failed;
        self.rows_read += other.rows_read;
        self.rows_kept += other.rows_kept;
        self.rows_filtered += other.rows_filtered;
        self.discarded_lines += other.discarded_lines;
        for (reason, count) in &other.dropped {
            *self.dropped.entry(reason.clone()).or_default() += count;
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct NormalizeOutcome {
    pub records: Vec<CanonicalExpenseRecord>,
    pub stats: NormalizeStats,
}

/// Column positions resolved once per table from its headers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnMap {
    pub origin_date: Option<usize>,
    pub entity_key: Option<usize>,
    pub legal_name: Option<usize>,
    pub expense_value: Option<usize>,
    pub account_class: Option<usize>,
}

impl ColumnMap {
    pub fn from_headers(headers: &[String]) -> Self {
        let mut map = ColumnMap::default();
        for (idx, header) in headers.iter().enumerate() {
            if header == ACCOUNT_CLASS_COLUMN {
                map.account_class.get_or_insert(idx);
                continue;
            }
            let field = COLUMN_ALIASES
                .iter()
                .find(|(alias, _)| alias == header)
                .map(|(_, field)| *field);
            let slot = match field {
                Some(CanonicalField::OriginDate) => &mut map.origin_date,
                Some(CanonicalField::EntityKey) => &mut map.entity_key,
                Some(CanonicalField::LegalName) => &mut map.legal_name,
                Some(CanonicalField::ExpenseValue) => &mut map.expense_value,
                None => continue,
            };
            slot.get_or_insert(idx);
        }
        map
    }
}

fn cell<'a>(row: &'a RawTableRow, idx: Option<usize>) -> Option<&'a str> {
    idx.and_then(|i| row.get(i))
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Applies the class filter, parsing and validation rules to one row.
pub fn normalize_row(map: &ColumnMap, row: &RawTableRow) -> RowOutcome {
    if map.account_class.is_some() {
        let is_expense = cell(row, map.account_class)
            .is_some_and(|code| code.starts_with(EXPENSE_ACCOUNT_PREFIX));
        if !is_expense {
            return RowOutcome::Filtered;
        }
    }

    let Some(entity_key) = cell(row, map.entity_key) else {
        return RowOutcome::Dropped(DropReason::MissingEntityKey);
    };
    let Some(legal_name) = cell(row, map.legal_name) else {
        return RowOutcome::Dropped(DropReason::MissingLegalName);
    };
    let Some(expense_value) = cell(row, map.expense_value).and_then(parse_expense_value) else {
        return RowOutcome::Dropped(DropReason::InvalidExpenseValue);
    };
    if expense_value <= Decimal::ZERO {
        return RowOutcome::Dropped(DropReason::NonPositiveExpense);
    }
    let Some(date) = cell(row, map.origin_date).and_then(parse_origin_date) else {
        return RowOutcome::Dropped(DropReason::InvalidDate);
    };

    RowOutcome::Kept(CanonicalExpenseRecord {
        entity_key: entity_key.to_string(),
        legal_name: legal_name.to_string(),
        year: date.year(),
        quarter: quarter_of(date),
        expense_value,
    })
}

pub fn normalize_table(table: &RawTable, stats: &mut NormalizeStats) -> Vec<CanonicalExpenseRecord> {
    let map = ColumnMap::from_headers(&table.headers);
    stats.discarded_lines += table.discarded_lines;

    let mut records = Vec::new();
    for row in &table.rows {
        stats.rows_read += 1;
        match normalize_row(&map, row) {
            RowOutcome::Kept(record) => {
                stats.rows_kept += 1;
                records.push(record);
            }
            RowOutcome::Filtered => stats.rows_filtered += 1,
            RowOutcome::Dropped(reason) => stats.record_drop(reason),
        }
    }
    records
}

/// Normalizes every supported entry of one archive.
///
/// An entry that cannot be parsed is skipped; an archive that cannot be read fails as a whole
/// so none of its records reach the run.
pub fn normalize_archive(path: &Path) -> Result<NormalizeOutcome> {
    let file = File::open(path)?;
    let mut archive = zip::ZipArchive::new(file)?;
    let mut outcome = NormalizeOutcome::default();

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        if entry.is_dir() {
            continue;
        }
        let name = entry.name().to_string();
        let Some(format) = TableFormat::from_entry_name(&name) else {
            debug!("Ignoring entry {}", name);
            outcome.stats.entries_ignored += 1;
            continue;
        };

        let mut bytes = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut bytes)?;

        match format.parse(&bytes) {
            Ok(table) => {
                outcome.stats.entries_parsed += 1;
                let records = normalize_table(&table, &mut outcome.stats);
                info!("📄 Read {}: {} records kept", name, records.len());
                outcome.records.extend(records);
            }
            Err(e) => {
                warn!("Skipping unreadable entry {} in {}: {}", name, path.display(), e);
                outcome.stats.entries_failed += 1;
            }
        }
    }

    outcome.stats.archives_processed = 1;
    Ok(outcome)
}

/// Normalizes all archives on blocking workers and merges the results in input order.
#[instrument(skip(archive_paths), fields(archives = archive_paths.len()))]
pub async fn normalize(archive_paths: &[PathBuf]) -> Result<NormalizeOutcome> {
    let handles: Vec<_> = archive_paths
        .iter()
        .cloned()
        .map(|path| {
            let handle = tokio::task::spawn_blocking({
                let path = path.clone();
                move || normalize_archive(&path)
            });
            (path, handle)
        })
        .collect();

    let mut merged = NormalizeOutcome::default();
    for (path, handle) in handles {
        match handle.await {
            Ok(Ok(outcome)) => {
                merged.stats.merge(&outcome.stats);
                merged.records.extend(outcome.records);
            }
            Ok(Err(e)) => {
                warn!("Discarding archive {}: {}", path.display(), e);
                merged.stats.archives_failed += 1;
            }
            Err(e) => {
                warn!("Worker for archive {} did not finish: {}", path.display(), e);
                merged.stats.archives_failed += 1;
            }
        }
    }

    for (reason, count) in &merged.stats.dropped {
        counter!("expense_rows_dropped_total", "reason" => reason.clone()).increment(*count as u64);
    }
    counter!("expense_rows_filtered_total").increment(merged.stats.rows_filtered as u64);
    counter!("expense_rows_kept_total").increment(merged.stats.rows_kept as u64);

    info!(
        "✅ Normalized {} archives: {} records kept, {} filtered, {} dropped, {} lines discarded",
        merged.stats.archives_processed,
        merged.stats.rows_kept,
        merged.stats.rows_filtered,
        merged.stats.dropped_total(),
        merged.stats.discarded_lines
    );
    Ok(merged)
}

/// Parses the date part of an origin date; time suffixes are ignored.
pub fn parse_origin_date(text: &str) -> Option<NaiveDate> {
    let date_part = text.trim().split(['T', ' ']).next()?;
    ["%Y-%m-%d", "%d/%m/%Y", "%Y/%m/%d", "%d-%m-%Y"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(date_part, fmt).ok())
}

/// Calendar quarter 1-4.
pub fn quarter_of(date: NaiveDate) -> u32 {
    (date.month() + 2) / 3
}

/// Parses a monetary amount written with either decimal convention.
///
/// A comma is the decimal separator unless a period appears after it; the other mark is
/// then a thousands separator and removed. Only digits, signs, separators and an exponent
/// marker are accepted.
pub fn parse_expense_value(text: &str) -> Option<Decimal> {
    let t = text.trim();
    if t.is_empty() {
        return None;
    }
    if !t
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | '.' | ',' | 'e' | 'E'))
    {
        return None;
    }
    let normalized = match (t.rfind(','), t.rfind('.')) {
        (Some(comma), Some(dot)) if dot > comma => t.replace(',', ""),
        (Some(_), _) => t.replace('.', "").replace(',', "."),
        (None, _) => t.to_string(),
    };
    Decimal::from_str(&normalized)
        .or_else(|_| Decimal::from_scientific(&normalized))
        .ok()
}
