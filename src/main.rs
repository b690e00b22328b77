use anyhow::Context;
use argo_ingest::config::{Config, DEFAULT_CONFIG_PATH};
use argo_ingest::pipeline::{Pipeline, PipelineContext, PlatformOutcome};
use argo_ingest::storage::{SqliteStore, Store};
use argo_ingest::transport::RemoteTransport;
use argo_ingest::{logging, metrics};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "argo-ingest")]
#[command(about = "Argo float archive ingestion into a relational store")]
#[command(version)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database schema
    InitDb,
    /// Extract, validate and store platforms
    Ingest {
        /// Platform identifiers (comma-separated)
        #[arg(long, value_delimiter = ',', required = true)]
        ids: Vec<String>,
        /// Re-extract platforms that are already stored
        #[arg(long)]
        force: bool,
    },
    /// Print what is stored for one platform
    Report {
        #[arg(long)]
        id: String,
    },
    /// List configured mirrors in priority order
    Mirrors,
}

fn print_outcome(outcome: &PlatformOutcome) {
    let icon = if outcome.success() { "✅" } else { "❌" };
    println!("\n{} Platform {}: {}", icon, outcome.identifier, outcome.status.as_str());
    if let Some(mirror) = &outcome.mirror {
        println!(
            "   Source: {} ({})",
            mirror,
            outcome.strategy.as_deref().unwrap_or("-")
        );
    }
    for attempt in outcome.attempts.iter().filter(|a| a.is_failure()) {
        println!("   Mirror failed: {} [{}]", attempt.mirror, attempt.protocol);
    }
    if let Some(report) = &outcome.validation {
        println!(
            "   Cycles: {}  Measurements: {}  Avg/cycle: {:.1}",
            report.stats.cycles_count,
            report.stats.measurements_count,
            report.stats.avg_measurements_per_cycle
        );
        for warning in &report.warnings {
            println!("   ⚠️  {}", warning);
        }
    }
    if !outcome.skipped_cycles.is_empty() {
        println!("   Skipped cycles: {}", outcome.skipped_cycles.len());
    }
    if let Some(batches) = &outcome.batches {
        println!(
            "   Stored: {} cycles, {} measurements, {} failed batches",
            outcome.cycles_written,
            batches.rows_written,
            batches.failures.len()
        );
    }
    if let Some(e) = &outcome.error {
        println!("   Error: {}", e);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let config = Config::load_from(&cli.config).context("loading configuration")?;
    logging::init_logging(&config.logging.directory);
    if let Some(addr) = &config.metrics.listen_address {
        metrics::init_metrics(addr)?;
    }

    match cli.command {
        Commands::InitDb => {
            let store = SqliteStore::open(&config.storage.database_path)?;
            store.init_schema().await?;
            println!("🗄️  Schema ready at {}", store.path().display());
        }
        Commands::Ingest { ids, force } => {
            let store = SqliteStore::open(&config.storage.database_path)?;
            store.init_schema().await?;
            let transport = RemoteTransport::new(Duration::from_secs(
                config.archive.timeout_seconds,
            ))?;
            let context = PipelineContext::from_config(&config, Arc::new(transport), Arc::new(store));
            let pipeline = Pipeline::new(context);

            let ids: Vec<String> = ids
                .into_iter()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            info!("Ingesting {} platforms (force={})", ids.len(), force);
            println!("🔄 Ingesting {} platform(s)...", ids.len());

            let summary = pipeline.process_batch(&ids, force).await;
            for outcome in &summary.outcomes {
                print_outcome(outcome);
            }
            println!(
                "\n📊 Done: {} succeeded, {} skipped, {} failed",
                summary.succeeded, summary.skipped, summary.failed
            );
            if !summary.all_succeeded() {
                error!("{} platform(s) failed", summary.failed);
                std::process::exit(1);
            }
        }
        Commands::Report { id } => {
            let store = SqliteStore::open(&config.storage.database_path)?;
            match store.platform_summary(&id).await? {
                Some(summary) => {
                    println!("📈 Platform {}", summary.platform_number);
                    println!("   Type: {}", summary.platform_type.as_deref().unwrap_or("-"));
                    println!("   Network: {}", summary.network_type.as_deref().unwrap_or("-"));
                    println!("   Centre: {}", summary.archive_center.as_deref().unwrap_or("-"));
                    println!("   Cycles: {}", summary.cycle_count);
                    println!("   Measurements: {}", summary.measurement_count);
                    if let (Some(first), Some(last)) = (summary.first_profile, summary.last_profile) {
                        println!("   Profiles: {} to {}", first.date_naive(), last.date_naive());
                    }
                    if let (Some(lat), Some(lon)) = (summary.mean_latitude, summary.mean_longitude) {
                        println!("   Mean position: {:.3}, {:.3}", lat, lon);
                    }
                }
                None => println!("No platform {} in {}", id, store.path().display()),
            }
        }
        Commands::Mirrors => {
            for (rank, mirror) in config.archive.mirrors.iter().enumerate() {
                println!(
                    "{}. {} [{}] {}",
                    rank + 1,
                    mirror.name,
                    mirror.protocol,
                    mirror.base_address
                );
            }
        }
    }
    Ok(())
}
