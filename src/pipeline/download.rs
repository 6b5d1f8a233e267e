use metrics::counter;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::constants::ARCHIVE_EXTENSION;
use crate::domain::RemoteEntry;
use crate::error::{PipelineError, Result};
use crate::pipeline::catalog::fetch_listing;
use crate::pipeline::context::RunContext;

/// Lists the period directory, picks the newest archives and makes them available locally.
///
/// Paths are returned newest first. An archive whose download fails is logged and left out.
#[instrument(skip(ctx), fields(run_id = %ctx.run_id))]
pub async fn select_and_download(
    ctx: &mut RunContext,
    period_url: &Url,
    max_artifacts: usize,
) -> Result<Vec<PathBuf>> {
    let entries = fetch_listing(ctx.http.as_ref(), period_url.as_str()).await?;
    let selected = select_artifacts(&entries, ARCHIVE_EXTENSION, max_artifacts);
    if selected.is_empty() {
        warn!("No archives listed under {}", period_url);
        return Ok(Vec::new());
    }
    info!("📦 Selected {} archives: {}", selected.len(), selected.join(", "));

    ctx.ensure_cache_dir()?;
    let mut paths = Vec::with_capacity(selected.len());
    for name in &selected {
        match download_if_absent(ctx, period_url, name).await {
            Ok(path) => paths.push(path),
            Err(e) => {
                warn!("Skipping archive {}: {}", name, e);
                ctx.downloads.failed += 1;
                counter!("expense_downloads_failed_total").increment(1);
            }
        }
    }
    Ok(paths)
}

/// Names ending in `extension` (any case), newest first, at most `max`.
///
/// Published names embed quarter and date, so descending name order is newest first.
pub fn select_artifacts(entries: &[RemoteEntry], extension: &str, max: usize) -> Vec<String> {
    let extension = extension.to_lowercase();
    let mut names: Vec<String> = entries
        .iter()
        .filter(|e| !e.is_directory)
        .map(|e| e.name.trim().to_string())
        .filter(|name| name.to_lowercase().ends_with(&extension))
        .collect();
    names.sort_by(|a, b| b.cmp(a));
    names.truncate(max);
    names
}

/// Returns the cached copy of `name` or downloads it from `base` into the cache.
///
/// Downloads land in a hidden `.part` file first and are renamed into place, so a crash
/// never leaves a truncated file under the final name.
pub async fn download_if_absent(ctx: &mut RunContext, base: &Url, name: &str) -> Result<PathBuf> {
    if !is_plain_file_name(name) {
        return Err(PipelineError::Transport {
            url: base.to_string(),
            message: format!("refusing non-plain file name {name:?}"),
        });
    }

    let target = ctx.cache_path(name);
    if target.exists() && !ctx.force_refresh() {
        debug!("{} already cached", name);
        ctx.downloads.reused += 1;
        return Ok(target);
    }

    let url = base.join(name)?;
    let resp = ctx.http.get(url.as_str()).await?;
    if !resp.is_ok() {
        return Err(PipelineError::Transport {
            url: url.to_string(),
            message: format!("HTTP status {}", resp.status),
        });
    }

    write_atomically(&target, &resp.bytes)?;
    ctx.downloads.downloaded += 1;
    counter!("expense_downloads_total").increment(1);
    info!("⬇️  Downloaded {} ({} bytes)", name, resp.bytes.len());
    Ok(target)
}

fn write_atomically(target: &Path, bytes: &[u8]) -> Result<()> {
    let file_name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let partial = target.with_file_name(format!(".{file_name}.part"));
    fs::write(&partial, bytes)?;
    fs::rename(&partial, target)?;
    Ok(())
}

fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty()
        && !name.contains('/')
        && !name.contains('\\')
        && !name.contains("..")
}
