use metrics::counter;
use std::collections::HashMap;
use tracing::info;

use crate::constants::{TAX_ID_WIDTH, UNKNOWN_TAX_ID};
use crate::domain::{CanonicalExpenseRecord, EnrichedExpenseRecord, RegistryEntry};

/// Left-joins canonical records onto the registry by registration id.
///
/// Matched rows take tax id, region and legal name from the registry, which is authoritative
/// over the free-text name in the disclosure. Unmatched rows keep their source name and get
/// the all-zero tax id and no region.
pub fn enrich(
    records: &[CanonicalExpenseRecord],
    registry: &[RegistryEntry],
) -> Vec<EnrichedExpenseRecord> {
    let mut by_id: HashMap<&str, &RegistryEntry> = HashMap::with_capacity(registry.len());
    for entry in registry {
        // first occurrence wins on duplicated ids
        by_id.entry(entry.registry_id.trim()).or_insert(entry);
    }

    let mut matched = 0usize;
    let enriched: Vec<EnrichedExpenseRecord> = records
        .iter()
        .map(|record| match by_id.get(record.entity_key.trim()) {
            Some(entry) => {
                matched += 1;
                let legal_name = if entry.legal_name.trim().is_empty() {
                    record.legal_name.clone()
                } else {
                    entry.legal_name.clone()
                };
                EnrichedExpenseRecord {
                    tax_id: normalize_tax_id(&entry.tax_id),
                    legal_name,
                    year: record.year,
                    quarter: record.quarter,
                    expense_value: record.expense_value,
                    region: entry.region.clone(),
                }
            }
            None => EnrichedExpenseRecord {
                tax_id: UNKNOWN_TAX_ID.to_string(),
                legal_name: record.legal_name.clone(),
                year: record.year,
                quarter: record.quarter,
                expense_value: record.expense_value,
                region: None,
            },
        })
        .collect();

    let unmatched = enriched.len() - matched;
    counter!("expense_records_enriched_total", "matched" => "true").increment(matched as u64);
    counter!("expense_records_enriched_total", "matched" => "false").increment(unmatched as u64);
    info!("🔗 Enriched {} records ({} without registry match)", enriched.len(), unmatched);
    enriched
}

/// Digits only, left-padded with zeros to 14 characters; longer input keeps its last 14 digits.
pub fn normalize_tax_id(raw: &str) -> String {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() > TAX_ID_WIDTH {
        digits[digits.len() - TAX_ID_WIDTH..].to_string()
    } else {
        format!("{digits:0>width$}", width = TAX_ID_WIDTH)
    }
}
