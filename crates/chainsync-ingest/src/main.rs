//! Chainsync - BTC Parquet ingestion tool

use anyhow::{bail, Context, Result};
use chainsync_common::logging::{init_logging, LogConfig, LogLevel};
use chainsync_common::PartitionDate;
use chainsync_ingest::driver::discover_files;
use chainsync_ingest::layout::partition_dir;
use chainsync_ingest::models::{BtcBlock, BtcTransaction};
use chainsync_ingest::source::FromRecordBatch;
use chainsync_ingest::{
    connect_pool, DataKind, FailurePolicy, IngestConfig, IngestError, IngestionDriver,
    ParquetSource, PartitionFetcher, PgBatchWriter, RecordSource, RunSummary, S3Fetcher,
};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Records decoded per read when dumping files
const INSPECT_CHUNK: usize = 1024;

#[derive(Parser, Debug)]
#[command(name = "chainsync")]
#[command(author, version, about = "Resumable BTC Parquet ingestion into Postgres")]
struct Cli {
    /// Path to a TOML config file (default: $CHAINSYNC_CONFIG or ./chainsync.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Download partitions if needed, then load them into the database
    Sync {
        #[command(flatten)]
        dates: DateArgs,

        /// Use only files already on disk
        #[arg(long)]
        skip_download: bool,
    },

    /// Download partitions without loading them
    Download {
        #[command(flatten)]
        dates: DateArgs,
    },

    /// Print the records of local partitions as JSON lines
    Inspect {
        #[command(flatten)]
        dates: DateArgs,
    },
}

#[derive(Args, Debug)]
struct DateArgs {
    /// Single date (YYYY-MM-DD)
    #[arg(long, conflicts_with_all = ["start", "end", "latest"])]
    date: Option<PartitionDate>,

    /// First date of a range (YYYY-MM-DD)
    #[arg(long, requires = "end", conflicts_with = "latest")]
    start: Option<PartitionDate>,

    /// Last date of a range, inclusive (YYYY-MM-DD)
    #[arg(long, requires = "start", conflicts_with = "latest")]
    end: Option<PartitionDate>,

    /// Today's date in UTC
    #[arg(long)]
    latest: bool,
}

impl DateArgs {
    fn resolve(&self) -> Result<Vec<PartitionDate>> {
        if self.latest {
            let today = PartitionDate::today_utc();
            info!(date = %today, "Using today's date");
            return Ok(vec![today]);
        }

        match (self.date, self.start, self.end) {
            (Some(date), None, None) => Ok(vec![date]),
            (None, Some(start), Some(end)) => {
                PartitionDate::range(start, end).context("Invalid date range")
            },
            (Some(_), _, _) => bail!("cannot specify both --date and --start/--end"),
            (None, Some(_), None) | (None, None, Some(_)) => {
                bail!("both --start and --end must be specified for a date range")
            },
            (None, None, None) => {
                bail!("must specify either --date, both --start and --end, or --latest")
            },
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };
    let base = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("chainsync")
        .build();

    // Environment variables take precedence
    let log_config = match base.clone().merge_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Ignoring invalid LOG_* settings: {e:#}");
            base
        },
    };

    let guard = match init_logging(&log_config) {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("Failed to initialize logging: {e:#}");
            None
        },
    };

    if let Err(e) = run(cli).await {
        error!(error = %format!("{e:#}"), "Command failed");
        eprintln!("Error: {e:#}");
        drop(guard);
        process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config =
        IngestConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Command::Sync {
            dates,
            skip_download,
        } => sync(&config, &dates.resolve()?, skip_download).await,
        Command::Download { dates } => download(&config, &dates.resolve()?).await,
        Command::Inspect { dates } => inspect(&config, &dates.resolve()?),
    }
}

async fn sync(config: &IngestConfig, dates: &[PartitionDate], skip_download: bool) -> Result<()> {
    let cancel = CancellationToken::new();
    cancel_on_interrupt(cancel.clone());

    let pool = connect_pool(&config.database)
        .await
        .context("Failed to connect to database")?;

    sqlx::migrate!("../../migrations")
        .run(&pool)
        .await
        .context("Failed to run migrations")?;
    info!("Database migrations completed");

    let writer = PgBatchWriter::new(pool);

    // A single date stops at the first failure; ranges keep going
    let policy = if dates.len() > 1 {
        FailurePolicy::ContinueOnError
    } else {
        FailurePolicy::StopOnError
    };
    let driver = IngestionDriver::new(&writer, config)
        .with_policy(policy)
        .with_cancellation(cancel.clone());

    let fetcher = if skip_download {
        None
    } else {
        Some(S3Fetcher::new(&config.s3, &config.storage).await)
    };

    let mut total = RunSummary::default();
    let mut failed_downloads = Vec::new();

    for &date in dates {
        if cancel.is_cancelled() {
            total.interrupted = true;
            break;
        }
        info!(%date, "Processing partition");

        if let Some(fetcher) = &fetcher {
            if let Err(e) = fetcher.ensure_partition(date).await {
                if policy == FailurePolicy::StopOnError {
                    return Err(e).with_context(|| format!("Failed to download {date}"));
                }
                error!(%date, error = %e, "Download failed, skipping partition");
                failed_downloads.push(date);
                continue;
            }
        }

        let summary = driver
            .ingest_date(date)
            .await
            .with_context(|| format!("Failed to load {date}"))?;
        total.merge(summary);
        if total.interrupted {
            break;
        }
    }

    info!(
        loaded = total.files_loaded,
        skipped = total.files_skipped,
        failed = total.failures.len(),
        rows = total.rows_written,
        "Sync finished"
    );

    if total.interrupted {
        warn!("Interrupted; progress is saved, re-run the same command to resume");
        return Err(IngestError::Cancelled.into());
    }

    for failure in &total.failures {
        error!(file = %failure.file.display(), error = %failure.error, "File not loaded");
    }
    if !total.failures.is_empty() || !failed_downloads.is_empty() {
        bail!(
            "{} files and {} partition downloads failed; re-run the same command to retry",
            total.failures.len(),
            failed_downloads.len()
        );
    }

    Ok(())
}

async fn download(config: &IngestConfig, dates: &[PartitionDate]) -> Result<()> {
    let fetcher = S3Fetcher::new(&config.s3, &config.storage).await;

    for &date in dates {
        let summary = fetcher
            .ensure_partition(date)
            .await
            .with_context(|| format!("Failed to download {date}"))?;
        info!(
            %date,
            downloaded = summary.downloaded,
            skipped = summary.skipped,
            bytes = summary.bytes,
            "Download finished"
        );
    }

    Ok(())
}

fn inspect(config: &IngestConfig, dates: &[PartitionDate]) -> Result<()> {
    let stdout = std::io::stdout();
    let mut out = std::io::BufWriter::new(stdout.lock());

    for &date in dates {
        for kind in DataKind::ALL {
            let dir = partition_dir(&config.storage.out_dir, kind, date);
            if !dir.is_dir() {
                warn!(dir = %dir.display(), "Directory not found, skipping {}", kind);
                continue;
            }

            for file in discover_files(&dir)? {
                let dumped = match kind {
                    DataKind::Blocks => dump_records::<BtcBlock>(&file, &mut out),
                    DataKind::Transactions => dump_records::<BtcTransaction>(&file, &mut out),
                };
                match dumped {
                    Ok(records) => info!(file = %file.display(), records, "Inspected"),
                    Err(e) => warn!(file = %file.display(), error = %e, "Skipping unreadable file"),
                }
            }
        }
    }

    out.flush()?;
    Ok(())
}

fn dump_records<T>(file: &Path, out: &mut impl Write) -> chainsync_ingest::Result<u64>
where
    T: FromRecordBatch + Serialize,
{
    let mut source = ParquetSource::<T>::open(file)?;
    let mut count = 0;

    loop {
        let chunk = source.read_chunk(INSPECT_CHUNK)?;
        for record in &chunk.records {
            serde_json::to_writer(&mut *out, record)?;
            out.write_all(b"\n")?;
            count += 1;
        }
        if chunk.end_of_data || chunk.records.is_empty() {
            break;
        }
    }

    Ok(count)
}

fn cancel_on_interrupt(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current chunk");
            cancel.cancel();
        }
    });
}
