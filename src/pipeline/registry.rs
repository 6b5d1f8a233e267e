use std::fs;
use tracing::{info, instrument};
use url::Url;

use crate::constants::REGISTRY_EXTENSION;
use crate::domain::{RawTableRow, RegistryEntry};
use crate::error::{PipelineError, Result};
use crate::pipeline::catalog::fetch_listing;
use crate::pipeline::context::RunContext;
use crate::pipeline::download::download_if_absent;
use crate::pipeline::enrich::normalize_tax_id;
use crate::pipeline::formats::parse_delimited;

/// Registry id header; older publications use the first name, newer ones the second.
const REGISTRY_ID_COLUMNS: [&str; 2] = ["REGISTRO_OPERADORA", "REGISTRO_ANS"];
const TAX_ID_COLUMN: &str = "CNPJ";
const LEGAL_NAME_COLUMN: &str = "RAZAO_SOCIAL";
const REGION_COLUMN: &str = "UF";

/// Downloads (or reuses) the registry file and parses it. Every failure is `RegistryUnavailable`.
#[instrument(skip(ctx), fields(run_id = %ctx.run_id))]
pub async fn fetch_registry(ctx: &mut RunContext, registry_url: &str) -> Result<Vec<RegistryEntry>> {
    let unavailable = |e: PipelineError| PipelineError::RegistryUnavailable(e.to_string());

    let listing = fetch_listing(ctx.http.as_ref(), registry_url)
        .await
        .map_err(unavailable)?;
    let name = listing
        .iter()
        .filter(|e| !e.is_directory)
        .map(|e| e.name.trim())
        .find(|name| name.to_lowercase().ends_with(REGISTRY_EXTENSION))
        .map(str::to_string)
        .ok_or_else(|| {
            PipelineError::RegistryUnavailable(format!(
                "no {REGISTRY_EXTENSION} file listed at {registry_url}"
            ))
        })?;

    ctx.ensure_cache_dir().map_err(unavailable)?;
    let base = Url::parse(registry_url).map_err(|e| unavailable(e.into()))?;
    let path = download_if_absent(ctx, &base, &name)
        .await
        .map_err(unavailable)?;
    let bytes = fs::read(&path).map_err(|e| unavailable(e.into()))?;
    let entries = parse_registry(&bytes)?;
    info!("🗂️  Registry {} loaded: {} operators", name, entries.len());
    Ok(entries)
}

pub fn parse_registry(bytes: &[u8]) -> Result<Vec<RegistryEntry>> {
    let table =
        parse_delimited(bytes).map_err(|e| PipelineError::RegistryUnavailable(e.to_string()))?;
    let position = |name: &str| table.headers.iter().position(|h| h == name);

    let id_idx = REGISTRY_ID_COLUMNS
        .iter()
        .find_map(|c| position(*c))
        .ok_or_else(|| {
            PipelineError::RegistryUnavailable("registry has no registration id column".into())
        })?;
    let tax_idx = position(TAX_ID_COLUMN)
        .ok_or_else(|| PipelineError::RegistryUnavailable("registry has no CNPJ column".into()))?;
    let name_idx = position(LEGAL_NAME_COLUMN);
    let region_idx = position(REGION_COLUMN);

    let text = |row: &RawTableRow, idx: Option<usize>| {
        idx.and_then(|i| row.get(i))
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    let entries = table
        .rows
        .iter()
        .filter_map(|row| {
            let registry_id = text(row, Some(id_idx))?;
            Some(RegistryEntry {
                registry_id,
                tax_id: normalize_tax_id(&text(row, Some(tax_idx)).unwrap_or_default()),
                legal_name: text(row, name_idx).unwrap_or_default(),
                region: text(row, region_idx),
            })
        })
        .collect();
    Ok(entries)
}
