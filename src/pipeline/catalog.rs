//! Remote catalog resolution.
//!
//! Listings are the HTML index pages of the public file server. Apache-style pages carry a
//! table with a `Name` column; nginx-style pages are a bare list of anchors. Both are read
//! into [`RemoteEntry`] values without depending on a specific page layout.

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, info, instrument};
use url::Url;

use crate::app::ports::HttpClientPort;
use crate::domain::RemoteEntry;
use crate::error::{PipelineError, Result};

static TABLE: Lazy<Selector> = Lazy::new(|| Selector::parse("table").unwrap());
static ROW: Lazy<Selector> = Lazy::new(|| Selector::parse("tr").unwrap());
static HEADER_CELL: Lazy<Selector> = Lazy::new(|| Selector::parse("th").unwrap());
static DATA_CELL: Lazy<Selector> = Lazy::new(|| Selector::parse("td").unwrap());
static ANCHOR: Lazy<Selector> = Lazy::new(|| Selector::parse("a[href]").unwrap());

/// A dated period directory: four-digit year followed by the path separator.
static PERIOD_NAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{4}/").unwrap());

const NAME_COLUMN: &str = "Name";

/// Fetches the listing at `base_url` and returns the URL of its most recent period directory.
#[instrument(skip(http))]
pub async fn resolve_latest_period(http: &dyn HttpClientPort, base_url: &str) -> Result<Url> {
    let entries = fetch_listing(http, base_url).await?;
    let latest = select_latest_period(&entries).ok_or_else(|| PipelineError::NoPeriodFound {
        url: base_url.to_string(),
    })?;
    let period_url = Url::parse(base_url)?.join(&latest.name)?;
    info!("📅 Latest period resolved: {}", period_url);
    Ok(period_url)
}

/// Fetches and parses a listing; any transport failure or non-200 status is `UnavailableSource`.
pub async fn fetch_listing(http: &dyn HttpClientPort, url: &str) -> Result<Vec<RemoteEntry>> {
    let resp = http
        .get(url)
        .await
        .map_err(|e| PipelineError::UnavailableSource {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
    if !resp.is_ok() {
        return Err(PipelineError::UnavailableSource {
            url: url.to_string(),
            reason: format!("HTTP status {}", resp.status),
        });
    }
    let entries = parse_listing(&resp.text());
    debug!("Listing {} has {} entries", url, entries.len());
    Ok(entries)
}

/// Lexicographic maximum over names matching the period pattern.
///
/// Zero-padded years sort correctly as text, so this picks the most recent year.
pub fn select_latest_period(entries: &[RemoteEntry]) -> Option<&RemoteEntry> {
    entries
        .iter()
        .filter(|e| PERIOD_NAME.is_match(&e.name))
        .max_by(|a, b| a.name.cmp(&b.name))
}

pub fn parse_listing(html: &str) -> Vec<RemoteEntry> {
    let document = Html::parse_document(html);
    let from_table = document.select(&TABLE).find_map(names_from_table);

    let names = match from_table {
        Some(names) => names,
        None => names_from_anchors(&document),
    };

    names
        .into_iter()
        .filter(|name| is_child_entry(name))
        .map(RemoteEntry::new)
        .collect()
}

fn cell_text(cell: ElementRef<'_>) -> String {
    cell.text().collect::<String>().trim().to_string()
}

/// Reads the `Name` column of a listing table; `None` when the table has no such header.
fn names_from_table(table: ElementRef<'_>) -> Option<Vec<String>> {
    let mut name_index = None;
    let mut names = Vec::new();

    for row in table.select(&ROW) {
        if name_index.is_none() {
            name_index = row
                .select(&HEADER_CELL)
                .position(|th| cell_text(th) == NAME_COLUMN);
            continue;
        }
        if let Some(idx) = name_index {
            if let Some(cell) = row.select(&DATA_CELL).nth(idx) {
                names.push(cell_text(cell));
            }
        }
    }

    name_index.map(|_| names)
}

fn names_from_anchors(document: &Html) -> Vec<String> {
    document
        .select(&ANCHOR)
        .filter_map(|a| {
            let text = cell_text(a);
            let href = a.value().attr("href")?.trim().to_string();
            // nginx truncates long names in the link text
            if text.is_empty() || text.ends_with("..>") {
                Some(href)
            } else {
                Some(text)
            }
        })
        .collect()
}

fn is_child_entry(name: &str) -> bool {
    !name.is_empty()
        && name != "Parent Directory"
        && !name.starts_with('?')
        && !name.starts_with('/')
        && !name.starts_with("../")
        && !name.contains("://")
}
