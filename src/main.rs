use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

use expense_pipeline::config::Config;
use expense_pipeline::infra::http_client::ReqwestHttp;
use expense_pipeline::logging;
use expense_pipeline::pipeline::catalog::resolve_latest_period;
use expense_pipeline::pipeline::{Pipeline, RunContext, RunSummary};
use expense_pipeline::server;
use expense_pipeline::storage::Loader;

#[derive(Parser)]
#[command(name = "expense_pipeline")]
#[command(about = "Regulatory expense disclosures: download, normalize, enrich, aggregate and load")]
#[command(version)]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline once
    Run {
        /// Ignore cached archives, registry and consolidated output
        #[arg(long)]
        force_refresh: bool,
    },
    /// Print the URL of the latest published period
    Resolve,
    /// Serve the read-only query API over the loaded tables
    Serve {
        #[arg(long)]
        port: Option<u16>,
    },
}

fn print_summary(summary: &RunSummary) {
    println!("\n📊 Pipeline Results for {}:", summary.period_url);
    println!("   Archives: {}", summary.archives.join(", "));
    println!(
        "   Downloads: {} fetched, {} reused, {} failed",
        summary.downloads.downloaded, summary.downloads.reused, summary.downloads.failed
    );
    if summary.consolidated_reused {
        println!("   Consolidated: {} records (reused)", summary.consolidated_records);
    } else {
        println!(
            "   Consolidated: {} records ({} filtered, {} dropped)",
            summary.consolidated_records,
            summary.normalize.rows_filtered,
            summary.normalize.dropped_total()
        );
    }
    println!(
        "   Enriched: {} records ({} without registry match)",
        summary.enriched_records, summary.unmatched_records
    );
    println!("   Aggregates: {}", summary.aggregates);
    println!(
        "   Loaded: {} detail rows, {} aggregate rows in {} batches",
        summary.load.detail_rows, summary.load.aggregate_rows, summary.load.batches
    );
    println!("   Aggregates in store: {}", summary.aggregates_in_store);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _guard = logging::init_logging();

    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref()).context("failed to load configuration")?;

    match cli.command {
        Commands::Run { force_refresh } => {
            println!("🔄 Running expense pipeline...");
            config.cache.force_refresh |= force_refresh;
            let http = Arc::new(ReqwestHttp::new(config.http_timeout())?);
            let mut loader = Loader::open(&config.store.database_path, config.store.batch_size)
                .with_context(|| {
                    format!("failed to open store {}", config.store.database_path.display())
                })?;
            let mut ctx = RunContext::new(config, http);

            match Pipeline::run(&mut ctx, &mut loader).await {
                Ok(summary) => {
                    info!("Pipeline finished");
                    print_summary(&summary);
                }
                Err(e) => {
                    error!("Pipeline failed: {}", e);
                    println!("❌ Pipeline failed: {e}");
                    return Err(e.into());
                }
            }
        }
        Commands::Resolve => {
            let http = ReqwestHttp::new(config.http_timeout())?;
            let period = resolve_latest_period(&http, &config.source.catalog_url).await?;
            println!("{period}");
        }
        Commands::Serve { port } => {
            let port = port.unwrap_or(config.server.port);
            server::start_server(&config.store.database_path, port)
                .await
                .map_err(|e| anyhow!(e))?;
        }
    }

    Ok(())
}
