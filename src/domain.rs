use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One child entry of a remote directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub name: String,
    pub is_directory: bool,
}

impl RemoteEntry {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let is_directory = name.ends_with('/');
        Self { name, is_directory }
    }
}

/// A table parsed from one archive entry, headers already uppercased and trimmed.
#[derive(Debug, Clone, Default)]
pub struct RawTable {
    pub headers: Vec<String>,
    pub rows: Vec<RawTableRow>,
    /// Lines or records discarded while reading (bad encoding, malformed record).
    pub discarded_lines: usize,
}

/// Unmodified cell text of one row, positionally aligned with `RawTable::headers`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawTableRow {
    pub cells: Vec<String>,
}

impl RawTableRow {
    pub fn get(&self, index: usize) -> Option<&str> {
        self.cells.get(index).map(|s| s.as_str())
    }
}

/// A disclosure row in the pipeline's fixed schema.
///
/// `entity_key` is the regulator's registration id until enrichment swaps it for a tax id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalExpenseRecord {
    pub entity_key: String,
    pub legal_name: String,
    pub year: i32,
    pub quarter: u32,
    pub expense_value: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryEntry {
    pub registry_id: String,
    pub tax_id: String,
    pub legal_name: String,
    pub region: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedExpenseRecord {
    pub tax_id: String,
    pub legal_name: String,
    pub year: i32,
    pub quarter: u32,
    pub expense_value: Decimal,
    /// Absent when the registry had no match; such rows stay out of aggregation.
    pub region: Option<String>,
}

/// Summary statistics for one `(tax_id, legal_name, region)` group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateStatistic {
    pub tax_id: String,
    pub legal_name: String,
    pub region: String,
    pub total_expense: Decimal,
    pub mean_quarterly_expense: Decimal,
    /// Sample standard deviation; `None` with fewer than two observations.
    pub std_dev_expense: Option<Decimal>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    pub detail_rows: usize,
    pub aggregate_rows: usize,
    pub batches: usize,
}
