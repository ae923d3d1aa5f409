use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use harvest_client::{BOOK_FIELDS, CatalogPageParser, ReqwestFetcher};
use harvest_core::{
    DEFAULT_ITEMS_KEY, DEFAULT_URL_TEMPLATE, ExtractionEngine, FieldCoverage, FileCheckpointStore,
    HarvestConfig, Record, RunOutcome, RunSummary, TracingEngineReporter, UrlTemplate, format_duration,
    load_dataset, load_work_items, write_dataset, write_work_items,
};

#[derive(Parser)]
#[command(name = "harvest", version, about = "Resilient, resumable catalogue extractor")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract every identifier in a work-item document, resuming from the checkpoint
    Run {
        /// JSON document holding the identifier list
        #[arg(short, long, env = "HARVEST_INPUT")]
        input: PathBuf,

        /// Key of the identifier list inside the input document
        #[arg(short, long, env = "HARVEST_KEY", default_value = DEFAULT_ITEMS_KEY)]
        key: String,

        /// Only process the first N identifiers (trial run)
        #[arg(short, long)]
        limit: Option<usize>,

        /// Checkpoint file
        #[arg(
            short,
            long,
            env = "HARVEST_CHECKPOINT",
            default_value = "harvest_checkpoint.json"
        )]
        checkpoint: PathBuf,

        /// Final dataset file
        #[arg(
            short,
            long,
            env = "HARVEST_OUTPUT",
            default_value = "books_complete.json"
        )]
        output: PathBuf,

        /// Detail page URL; `{id}` is replaced by each identifier
        #[arg(short, long, env = "HARVEST_URL_TEMPLATE", default_value = DEFAULT_URL_TEMPLATE)]
        url_template: String,

        #[command(flatten)]
        tuning: Tuning,
    },

    /// Show the progress recorded in a checkpoint
    Status {
        #[arg(
            short,
            long,
            env = "HARVEST_CHECKPOINT",
            default_value = "harvest_checkpoint.json"
        )]
        checkpoint: PathBuf,

        /// Work-item document, to report the remaining count
        #[arg(short, long, env = "HARVEST_INPUT")]
        input: Option<PathBuf>,

        #[arg(short, long, env = "HARVEST_KEY", default_value = DEFAULT_ITEMS_KEY)]
        key: String,
    },

    /// Export a dataset's failed identifiers as a new work-item document
    Failed {
        /// Dataset produced by `harvest run`
        #[arg(short, long, default_value = "books_complete.json")]
        dataset: PathBuf,

        /// Destination work-item document
        #[arg(short, long, default_value = "failed_ids.json")]
        output: PathBuf,

        #[arg(short, long, env = "HARVEST_KEY", default_value = DEFAULT_ITEMS_KEY)]
        key: String,
    },
}

/// Retry, pacing, and checkpoint knobs.
#[derive(Args)]
struct Tuning {
    /// Per-request timeout in seconds
    #[arg(long, env = "HARVEST_TIMEOUT_SECS", default_value_t = 180)]
    timeout_secs: u64,

    /// Fixed delay between items in milliseconds
    #[arg(long, env = "HARVEST_DELAY_MS", default_value_t = 0)]
    delay_ms: u64,

    /// Maximum random jitter added to the delay, in milliseconds
    #[arg(long, env = "HARVEST_JITTER_MS", default_value_t = 500)]
    jitter_ms: u64,

    /// Attempts per item for transient and parse failures
    #[arg(long, env = "HARVEST_MAX_ATTEMPTS", default_value_t = 5)]
    max_attempts: u32,

    /// Base of the exponential backoff, in seconds
    #[arg(long, env = "HARVEST_BACKOFF_BASE_SECS", default_value_t = 30)]
    backoff_base_secs: u64,

    /// Upper bound for a single backoff wait, in seconds
    #[arg(long, env = "HARVEST_BACKOFF_CAP_SECS")]
    backoff_cap_secs: Option<u64>,

    /// Fixed wait after a 503/504 response, in seconds
    #[arg(long, env = "HARVEST_OVERLOAD_WAIT_SECS", default_value_t = 300)]
    overload_wait_secs: u64,

    /// Attempts per item for server-overload failures
    #[arg(long, env = "HARVEST_OVERLOAD_MAX_ATTEMPTS", default_value_t = 10)]
    overload_max_attempts: u32,

    /// Consecutive item failures that open the circuit breaker
    #[arg(long, env = "HARVEST_BREAKER_THRESHOLD", default_value_t = 10)]
    breaker_threshold: u32,

    /// Circuit breaker cooldown in seconds
    #[arg(long, env = "HARVEST_BREAKER_COOLDOWN_SECS", default_value_t = 300)]
    breaker_cooldown_secs: u64,

    /// After a cooldown, let one trial item decide whether to reopen
    #[arg(long, env = "HARVEST_HALF_OPEN_TRIAL", default_value_t = false)]
    half_open_trial: bool,

    /// Save the checkpoint every N items
    #[arg(long, env = "HARVEST_CHECKPOINT_INTERVAL", default_value_t = 50)]
    checkpoint_interval: usize,
}

impl Tuning {
    fn to_config(&self) -> HarvestConfig {
        HarvestConfig::default()
            .with_request_timeout(Duration::from_secs(self.timeout_secs))
            .with_pacing(
                Duration::from_millis(self.delay_ms),
                Duration::from_millis(self.jitter_ms),
            )
            .with_retries(self.max_attempts, Duration::from_secs(self.backoff_base_secs))
            .with_backoff_cap(self.backoff_cap_secs.map(Duration::from_secs))
            .with_overload(
                Duration::from_secs(self.overload_wait_secs),
                self.overload_max_attempts,
            )
            .with_breaker(
                self.breaker_threshold,
                Duration::from_secs(self.breaker_cooldown_secs),
            )
            .with_half_open_trial(self.half_open_trial)
            .with_checkpoint_interval(self.checkpoint_interval)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("harvest=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            input,
            key,
            limit,
            checkpoint,
            output,
            url_template,
            tuning,
        } => {
            cmd_run(
                &input,
                &key,
                limit,
                &checkpoint,
                &output,
                &url_template,
                tuning.to_config(),
            )
            .await?;
        }
        Commands::Status {
            checkpoint,
            input,
            key,
        } => {
            cmd_status(&checkpoint, input.as_deref(), &key).await?;
        }
        Commands::Failed {
            dataset,
            output,
            key,
        } => {
            cmd_failed(&dataset, &output, &key).await?;
        }
    }

    Ok(())
}

/// Cancel `token` on the first Ctrl-C.
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, saving progress...");
            token.cancel();
        }
    });
}

async fn cmd_run(
    input: &Path,
    key: &str,
    limit: Option<usize>,
    checkpoint: &Path,
    output: &Path,
    url_template: &str,
    config: HarvestConfig,
) -> Result<()> {
    let items = load_work_items(input, key, limit)
        .await
        .context("Failed to load work items")?;
    let urls = UrlTemplate::new(url_template)?;

    let fetcher = ReqwestFetcher::with_timeout(config.request_timeout)
        .context("Failed to create HTTP client")?;
    let parser = CatalogPageParser::for_template(&urls)?;
    let store = FileCheckpointStore::new(checkpoint);

    let engine = ExtractionEngine::new(fetcher, parser, store, urls, config)?;
    let state = engine
        .load_state()
        .await
        .with_context(|| format!("Failed to load checkpoint {}", checkpoint.display()))?;

    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    let report = engine
        .run(&items, state, &cancel, &TracingEngineReporter::default())
        .await?;

    match report.outcome {
        RunOutcome::Completed(dataset) => {
            write_dataset(output, &dataset)
                .await
                .context("Failed to write dataset")?;
            print_summary(&report.summary);
            print_coverage(&FieldCoverage::from_records(&dataset.records));
            if !dataset.records.is_empty() {
                println!(
                    "  Real covers: {}/{}",
                    real_cover_count(&dataset.records),
                    dataset.records.len()
                );
            }
            println!("\nDataset written to {}", output.display());
        }
        RunOutcome::Cancelled(state) => {
            print_summary(&report.summary);
            println!(
                "\nStopped at {}/{}. Run the same command again to resume from {}.",
                state.next_index,
                items.len(),
                checkpoint.display()
            );
        }
    }

    Ok(())
}

async fn cmd_status(checkpoint: &Path, input: Option<&Path>, key: &str) -> Result<()> {
    let store = FileCheckpointStore::new(checkpoint);
    let Some(summary) = store.summary().await? else {
        println!("No checkpoint at {}", checkpoint.display());
        return Ok(());
    };

    println!("Checkpoint: {}", checkpoint.display());
    println!(
        "  Saved at:   {}",
        summary.saved_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    println!("  Next index: {}", summary.next_index);
    println!("  Records:    {}", summary.records);
    println!("  Failed:     {}", summary.failed);

    if let Some(input) = input {
        let items = load_work_items(input, key, None).await?;
        let remaining = items.len().saturating_sub(summary.next_index);
        let percent = if items.is_empty() {
            100.0
        } else {
            summary.next_index as f64 * 100.0 / items.len() as f64
        };
        println!(
            "  Progress:   {}/{} ({percent:.1}%), {remaining} remaining",
            summary.next_index,
            items.len()
        );
    }

    Ok(())
}

async fn cmd_failed(dataset: &Path, output: &Path, key: &str) -> Result<()> {
    let dataset = load_dataset(dataset).await?;
    if dataset.failed_identifiers.is_empty() {
        println!("No failed identifiers, nothing to export");
        return Ok(());
    }

    write_work_items(output, key, &dataset.failed_identifiers).await?;
    println!(
        "Exported {} failed identifiers to {}",
        dataset.failed_identifiers.len(),
        output.display()
    );
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    println!("\nExtraction summary");
    println!("  Succeeded:     {}", summary.succeeded);
    println!("  Failed:        {}", summary.failed);
    println!("  Success rate:  {:.1}%", summary.success_rate());
    println!("  Elapsed:       {}", format_duration(summary.elapsed));
    if let Some(avg) = summary.average_per_item() {
        println!("  Per item:      {:.2}s", avg.as_secs_f64());
    }
    if summary.circuit_trips > 0 {
        println!("  Circuit trips: {}", summary.circuit_trips);
    }
}

fn print_coverage(coverage: &FieldCoverage) {
    if coverage.total_records == 0 {
        return;
    }
    println!("\nField coverage ({} records)", coverage.total_records);
    for field in BOOK_FIELDS {
        let count = coverage.populated.get(*field).copied().unwrap_or(0);
        println!(
            "  {field:<18} {count:>7} ({:.1}%)",
            coverage.rate(field)
        );
    }
}

/// Records whose cover image is not the catalogue placeholder.
fn real_cover_count(records: &[Record]) -> usize {
    records
        .iter()
        .filter(|r| r.field("has_real_cover") == Some("true"))
        .count()
}
