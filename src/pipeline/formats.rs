//! Tabular entry formats found inside disclosure archives.
//!
//! The set is closed: an entry is either delimited text or a spreadsheet, picked by file
//! extension, and every variant parses into the same [`RawTable`] shape.

use calamine::{Data, DataType, Reader, Xlsx};
use std::io::Cursor;
use tracing::debug;

use crate::domain::{RawTable, RawTableRow};
use crate::error::{PipelineError, Result};

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];
const CANDIDATE_DELIMITERS: [u8; 4] = [b';', b',', b'\t', b'|'];
const DEFAULT_DELIMITER: u8 = b';';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableFormat {
    /// `.csv` and `.txt` files with a sniffed field delimiter.
    Delimited,
    /// `.xlsx` workbooks; only the first worksheet is read.
    Spreadsheet,
}

impl TableFormat {
    /// Classifies an archive entry by extension; `None` means the entry is ignored.
    pub fn from_entry_name(name: &str) -> Option<Self> {
        let lower = name.to_lowercase();
        if lower.ends_with(".csv") || lower.ends_with(".txt") {
            Some(TableFormat::Delimited)
        } else if lower.ends_with(".xlsx") {
            Some(TableFormat::Spreadsheet)
        } else {
            None
        }
    }

    pub fn parse(&self, bytes: &[u8]) -> Result<RawTable> {
        match self {
            TableFormat::Delimited => parse_delimited(bytes),
            TableFormat::Spreadsheet => parse_spreadsheet(bytes),
        }
    }
}

/// Uppercase and trim, so `" reg_ans"` and `"REG_ANS"` name the same column.
pub fn normalize_header(header: &str) -> String {
    header.trim().trim_start_matches('\u{feff}').trim().to_uppercase()
}

pub fn parse_delimited(bytes: &[u8]) -> Result<RawTable> {
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);

    // Lines that are not valid UTF-8 are dropped instead of failing the whole file.
    let mut discarded = 0usize;
    let mut lines: Vec<&str> = Vec::new();
    for raw in bytes.split(|b| *b == b'\n') {
        let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
        match std::str::from_utf8(raw) {
            Ok(line) => lines.push(line),
            Err(_) => discarded += 1,
        }
    }
    while lines.first().is_some_and(|l| l.trim().is_empty()) {
        lines.remove(0);
    }
    let Some(header_line) = lines.first() else {
        return Ok(RawTable {
            discarded_lines: discarded,
            ..RawTable::default()
        });
    };

    let delimiter = sniff_delimiter(header_line);
    let cleaned = lines.join("\n");
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .has_headers(true)
        .from_reader(cleaned.as_bytes());

    let headers: Vec<String> = reader.headers()?.iter().map(normalize_header).collect();
    let mut rows = Vec::new();
    for record in reader.records() {
        match record {
            Ok(rec) => {
                if rec.iter().all(|c| c.trim().is_empty()) {
                    continue;
                }
                rows.push(RawTableRow {
                    cells: rec.iter().map(str::to_string).collect(),
                });
            }
            Err(e) => {
                debug!("Dropping malformed record: {}", e);
                discarded += 1;
            }
        }
    }

    Ok(RawTable {
        headers,
        rows,
        discarded_lines: discarded,
    })
}

/// Picks the candidate delimiter occurring most often in the header line.
pub fn sniff_delimiter(header_line: &str) -> u8 {
    let mut best = DEFAULT_DELIMITER;
    let mut best_count = 0usize;
    for candidate in CANDIDATE_DELIMITERS {
        let count = header_line.bytes().filter(|b| *b == candidate).count();
        if count > best_count {
            best = candidate;
            best_count = count;
        }
    }
    best
}

pub fn parse_spreadsheet(bytes: &[u8]) -> Result<RawTable> {
    let mut workbook = Xlsx::new(Cursor::new(bytes))
        .map_err(|e| PipelineError::Spreadsheet(e.to_string()))?;
    let range = match workbook.worksheet_range_at(0) {
        Some(range) => range.map_err(|e| PipelineError::Spreadsheet(e.to_string()))?,
        None => return Ok(RawTable::default()),
    };

    let mut rows_iter = range.rows();
    let headers: Vec<String> = match rows_iter.next() {
        Some(header) => header
            .iter()
            .map(|c| normalize_header(&cell_text(c)))
            .collect(),
        None => return Ok(RawTable::default()),
    };

    let rows = rows_iter
        .map(|row| RawTableRow {
            cells: row.iter().map(cell_text).collect(),
        })
        .filter(|row| row.cells.iter().any(|c| !c.trim().is_empty()))
        .collect();

    Ok(RawTable {
        headers,
        rows,
        discarded_lines: 0,
    })
}

/// Renders a worksheet cell the way it would appear in a delimited export.
pub fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty | Data::Error(_) => String::new(),
        Data::String(s) => s.clone(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", *f as i64),
        Data::Float(f) => f.to_string(),
        Data::Bool(b) => b.to_string(),
        other => other
            .as_date()
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| other.to_string()),
    }
}
