use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use serde::Serialize;
use std::fs;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::constants::{AGGREGATED_CSV, ENRICHED_CSV, RUN_REPORT_JSON, UNKNOWN_TAX_ID};
use crate::domain::{CanonicalExpenseRecord, LoadReport};
use crate::error::{PipelineError, Result, Stage};
use crate::pipeline::aggregate::aggregate;
use crate::pipeline::cache::{fingerprint_archives, ConsolidatedCache};
use crate::pipeline::catalog::resolve_latest_period;
use crate::pipeline::context::{DownloadStats, RunContext, RunLock};
use crate::pipeline::download::select_and_download;
use crate::pipeline::enrich::enrich;
use crate::pipeline::export::write_delimited;
use crate::pipeline::normalize::{normalize, NormalizeStats};
use crate::pipeline::registry::fetch_registry;
use crate::storage::Loader;

/// Final report of one run, also written as `run_report.json` in the cache directory.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub period_url: String,
    pub archives: Vec<String>,
    pub downloads: DownloadStats,
    pub normalize: NormalizeStats,
    /// True when the consolidated output of a previous run was reused.
    pub consolidated_reused: bool,
    pub consolidated_records: usize,
    pub enriched_records: usize,
    pub unmatched_records: usize,
    pub aggregates: usize,
    pub load: LoadReport,
    pub aggregates_in_store: i64,
}

fn record_stage(stage: Stage, started: Instant) {
    histogram!("expense_stage_duration_seconds", "stage" => stage.to_string())
        .record(started.elapsed().as_secs_f64());
}

fn file_names(paths: &[PathBuf]) -> Vec<String> {
    paths
        .iter()
        .filter_map(|p| p.file_name())
        .map(|n| n.to_string_lossy().into_owned())
        .collect()
}

pub struct Pipeline;

impl Pipeline {
    /// Runs every stage in order. Fatal failures come back wrapped with their stage.
    #[instrument(skip_all, fields(run_id = %ctx.run_id))]
    pub async fn run(ctx: &mut RunContext, loader: &mut Loader) -> Result<RunSummary> {
        let _lock = RunLock::acquire(ctx.cache_dir(), ctx.run_id)?;
        info!("🚀 Starting run {}", ctx.run_id);
        counter!("expense_pipeline_runs_total").increment(1);

        // Step 1: resolve the latest period
        let t = Instant::now();
        let catalog_url = ctx.config.source.catalog_url.clone();
        let period_url = resolve_latest_period(ctx.http.as_ref(), &catalog_url)
            .await
            .map_err(|e| e.in_stage(Stage::Resolve))?;
        record_stage(Stage::Resolve, t);

        // Step 2: download archives
        let t = Instant::now();
        let max_artifacts = ctx.config.source.max_artifacts;
        let archives = select_and_download(ctx, &period_url, max_artifacts)
            .await
            .map_err(|e| e.in_stage(Stage::Download))?;
        record_stage(Stage::Download, t);
        // an empty set would replace the loaded tables with nothing
        if archives.is_empty() {
            return Err(PipelineError::NoArchives {
                url: period_url.to_string(),
            }
            .in_stage(Stage::Download));
        }

        // Step 3: normalize, or reuse the consolidated output of the same archive set
        let t = Instant::now();
        let (records, normalize_stats, reused) = Self::consolidate(ctx, &archives)
            .await
            .map_err(|e| e.in_stage(Stage::Normalize))?;
        record_stage(Stage::Normalize, t);

        // Step 4: enrich with the operator registry
        let t = Instant::now();
        let registry_url = ctx.config.source.registry_url.clone();
        let registry = fetch_registry(ctx, &registry_url)
            .await
            .map_err(|e| e.in_stage(Stage::Enrich))?;
        let enriched = enrich(&records, &registry);
        write_delimited(&ctx.cache_path(ENRICHED_CSV), &enriched)
            .map_err(|e| e.in_stage(Stage::Enrich))?;
        let unmatched = enriched.iter().filter(|r| r.tax_id == UNKNOWN_TAX_ID).count();
        record_stage(Stage::Enrich, t);

        // Step 5: aggregate
        let t = Instant::now();
        let aggregates = aggregate(&enriched);
        write_delimited(&ctx.cache_path(AGGREGATED_CSV), &aggregates)
            .map_err(|e| e.in_stage(Stage::Aggregate))?;
        record_stage(Stage::Aggregate, t);

        // Step 6: replace both tables
        let t = Instant::now();
        let load = loader
            .load(&aggregates, &enriched)
            .map_err(|e| e.in_stage(Stage::Load))?;
        let aggregates_in_store = loader
            .count_aggregates()
            .map_err(|e| e.in_stage(Stage::Load))?;
        record_stage(Stage::Load, t);

        let summary = RunSummary {
            run_id: ctx.run_id,
            started_at: ctx.started_at,
            finished_at: Utc::now(),
            period_url: period_url.to_string(),
            archives: file_names(&archives),
            downloads: ctx.downloads.clone(),
            normalize: normalize_stats,
            consolidated_reused: reused,
            consolidated_records: records.len(),
            enriched_records: enriched.len(),
            unmatched_records: unmatched,
            aggregates: aggregates.len(),
            load,
            aggregates_in_store,
        };
        Self::write_report(ctx, &summary)?;
        info!(
            "🎉 Run {} finished: {} aggregates in store",
            summary.run_id, summary.aggregates_in_store
        );
        Ok(summary)
    }

    async fn consolidate(
        ctx: &RunContext,
        archives: &[PathBuf],
    ) -> Result<(Vec<CanonicalExpenseRecord>, NormalizeStats, bool)> {
        let fingerprint = fingerprint_archives(archives)?;
        let cache = ConsolidatedCache::new(ctx.cache_dir());
        if !ctx.force_refresh() {
            if let Some(records) = cache.load(&fingerprint) {
                return Ok((records, NormalizeStats::default(), true));
            }
        }
        let outcome = normalize(archives).await?;
        cache.store(&outcome.records, &fingerprint)?;
        info!(
            "💾 Consolidated {} records into {}",
            outcome.records.len(),
            cache.zip_path().display()
        );
        Ok((outcome.records, outcome.stats, false))
    }

    fn write_report(ctx: &RunContext, summary: &RunSummary) -> Result<()> {
        let json = serde_json::to_string_pretty(summary)?;
        fs::write(ctx.cache_path(RUN_REPORT_JSON), json)?;
        Ok(())
    }
}
