//! Ingestion driver
//!
//! Walks a partition's directories one file at a time. For each file the
//! stored [`ResumptionState`] decides whether it is skipped or resumed, and
//! the loader's progress reports are folded back into that state, saved every
//! `save_interval` reports and once more when the file is done.

use crate::config::{BatchConfig, IngestConfig};
use crate::error::{IngestError, Result};
use crate::layout::{partition_dir, DataKind};
use crate::loader::{LoadSummary, RecordLoader};
use crate::models::{BtcBlock, BtcTransaction};
use crate::progress::{ProgressStore, ResumptionState};
use crate::source::ParquetSource;
use crate::store::BatchWriter;
use chainsync_common::PartitionDate;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

const PARQUET_EXTENSION: &str = "parquet";

/// What to do when a file fails to load
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Abort the run on the first failed file
    #[default]
    StopOnError,
    /// Record the failure and carry on with the next file
    ContinueOnError,
}

#[derive(Debug)]
pub struct FileFailure {
    pub file: PathBuf,
    pub error: IngestError,
}

/// Result of loading one file
#[derive(Debug)]
pub enum FileOutcome {
    /// Already complete according to its state
    Skipped,
    Loaded(LoadSummary),
}

/// Totals for a run over one or more directories
#[derive(Debug, Default)]
pub struct RunSummary {
    pub files_loaded: usize,
    pub files_skipped: usize,
    pub rows_written: u64,
    pub failures: Vec<FileFailure>,
    /// Cancellation stopped the run before every file was processed
    pub interrupted: bool,
}

impl RunSummary {
    pub fn merge(&mut self, other: RunSummary) {
        self.files_loaded += other.files_loaded;
        self.files_skipped += other.files_skipped;
        self.rows_written += other.rows_written;
        self.failures.extend(other.failures);
        self.interrupted |= other.interrupted;
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && !self.interrupted
    }
}

/// Decides which progress reports trigger a state save
#[derive(Debug, Clone, Copy)]
struct SaveCadence {
    interval: u32,
    reports: u32,
}

impl SaveCadence {
    fn new(interval: u32) -> Self {
        Self {
            interval: interval.max(1),
            reports: 0,
        }
    }

    /// Count one report; true on every `interval`th
    fn tick(&mut self) -> bool {
        self.reports += 1;
        self.reports % self.interval == 0
    }

    fn any(&self) -> bool {
        self.reports > 0
    }
}

/// Sequential, resumable ingestion of local partition files
pub struct IngestionDriver<'w, W: BatchWriter> {
    loader: RecordLoader<'w, W>,
    store: ProgressStore,
    out_dir: PathBuf,
    batch: BatchConfig,
    save_interval: u32,
    policy: FailurePolicy,
    cancel: CancellationToken,
}

impl<'w, W: BatchWriter> IngestionDriver<'w, W> {
    pub fn new(writer: &'w W, config: &IngestConfig) -> Self {
        Self {
            loader: RecordLoader::new(writer, config.sync.retry_policy()),
            store: ProgressStore,
            out_dir: config.storage.out_dir.clone(),
            batch: config.batch.clone(),
            save_interval: config.sync.save_interval,
            policy: FailurePolicy::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Stop at the next chunk boundary once `cancel` fires
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.loader = self.loader.with_cancellation(cancel.clone());
        self.cancel = cancel;
        self
    }

    /// Ingest blocks, then transactions, for one date
    pub async fn ingest_date(&self, date: PartitionDate) -> Result<RunSummary> {
        let mut summary = RunSummary::default();

        for kind in DataKind::ALL {
            let dir = partition_dir(&self.out_dir, kind, date);
            summary.merge(self.ingest_dir(kind, &dir).await?);
            if summary.interrupted {
                break;
            }
        }

        info!(
            %date,
            loaded = summary.files_loaded,
            skipped = summary.files_skipped,
            failed = summary.failures.len(),
            rows = summary.rows_written,
            "Partition ingested"
        );
        Ok(summary)
    }

    /// Ingest every Parquet file under `dir`, in path order
    pub async fn ingest_dir(&self, kind: DataKind, dir: &Path) -> Result<RunSummary> {
        let mut summary = RunSummary::default();

        if !dir.is_dir() {
            warn!(dir = %dir.display(), "Directory not found, skipping {}", kind);
            return Ok(summary);
        }

        let files = discover_files(dir)?;
        info!(dir = %dir.display(), files = files.len(), "Ingesting {} files", kind);

        for file in files {
            if self.cancel.is_cancelled() {
                summary.interrupted = true;
                break;
            }

            match self.ingest_file(kind, &file).await {
                Ok(FileOutcome::Skipped) => summary.files_skipped += 1,
                Ok(FileOutcome::Loaded(loaded)) => {
                    summary.files_loaded += 1;
                    summary.rows_written += loaded.rows_written;
                    if loaded.interrupted {
                        summary.interrupted = true;
                        break;
                    }
                },
                Err(e) => {
                    error!(file = %file.display(), error = %e, "Failed to ingest file");
                    match self.policy {
                        FailurePolicy::StopOnError => return Err(e),
                        FailurePolicy::ContinueOnError => {
                            summary.failures.push(FileFailure { file, error: e });
                        },
                    }
                },
            }
        }

        Ok(summary)
    }

    /// Load one file, resuming from its saved state
    pub async fn ingest_file(&self, kind: DataKind, file: &Path) -> Result<FileOutcome> {
        let mut state = match self.store.load(file) {
            Ok(state) => state,
            Err(e) => {
                warn!(file = %file.display(), error = %e, "Unreadable progress state, starting over");
                ResumptionState::default()
            },
        };

        if state.is_complete() {
            info!(
                file = %file.display(),
                total = state.num_rows,
                "Already ingested {}/{} rows, skipping",
                state.last_row,
                state.num_rows
            );
            return Ok(FileOutcome::Skipped);
        }

        let start_row = state.last_row;
        info!(file = %file.display(), row = start_row, "Loading {}", kind);

        let store = self.store;
        let mut cadence = SaveCadence::new(self.save_interval);
        let result = {
            let mut on_progress = |path: &Path, cursor: u64, total: u64| -> Result<()> {
                state.last_row = cursor;
                state.num_rows = total;
                if cadence.tick() {
                    store.save(path, &mut state)?;
                    debug!(file = %path.display(), row = cursor, "Progress saved");
                }
                Ok(())
            };

            match kind {
                DataKind::Blocks => {
                    let mut source = ParquetSource::<BtcBlock>::open(file)?;
                    self.loader
                        .load_blocks(file, &mut source, self.batch.block, start_row, &mut on_progress)
                        .await
                },
                DataKind::Transactions => {
                    let mut source = ParquetSource::<BtcTransaction>::open(file)?;
                    self.loader
                        .load_transactions(
                            file,
                            &mut source,
                            self.batch.transaction_sizes(),
                            start_row,
                            &mut on_progress,
                        )
                        .await
                },
            }
        };

        // Keep the last committed cursor whether or not the load finished
        if cadence.any() {
            if let Err(e) = self.store.save(file, &mut state) {
                warn!(file = %file.display(), error = %e, "Failed to save progress");
            }
        }

        let loaded = result?;
        info!(
            file = %file.display(),
            row = loaded.cursor,
            total = loaded.total_rows,
            rows = loaded.rows_written,
            "Finished {} at row {}/{}",
            kind,
            loaded.cursor,
            loaded.total_rows
        );
        Ok(FileOutcome::Loaded(loaded))
    }
}

/// Non-empty `*.parquet` files under `dir`, sorted by path
pub fn discover_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(std::io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some(PARQUET_EXTENSION) {
            continue;
        }

        if entry.metadata().map_err(std::io::Error::from)?.len() == 0 {
            debug!(file = %path.display(), "Skipping empty file");
            continue;
        }

        files.push(path.to_path_buf());
    }

    Ok(files)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::progress::status_path_for;
    use crate::tables;
    use crate::testing::{write_block_file, write_transaction_file, Insert, RecordingWriter};
    use tempfile::TempDir;

    fn config(out_dir: &Path) -> IngestConfig {
        let mut config = IngestConfig::default();
        config.storage.out_dir = out_dir.to_path_buf();
        config.batch.block = 10;
        config.sync.save_interval = 2;
        config.sync.retry_max_attempts = 1;
        config
    }

    fn blocks_root(out_dir: &Path) -> PathBuf {
        out_dir.join("btc").join("blocks")
    }

    fn date() -> PartitionDate {
        crate::testing::date()
    }

    #[test]
    fn test_save_cadence() {
        let mut cadence = SaveCadence::new(3);
        let saves: Vec<bool> = (0..7).map(|_| cadence.tick()).collect();
        assert_eq!(saves, vec![false, false, true, false, false, true, false]);
        assert!(cadence.any());

        let mut every = SaveCadence::new(0);
        assert!(every.tick());
        assert!(!SaveCadence::new(5).any());
    }

    #[test]
    fn test_discover_files_filters_and_sorts() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path();
        std::fs::write(dir.join("b.parquet"), b"x").unwrap();
        std::fs::write(dir.join("a.parquet"), b"x").unwrap();
        std::fs::write(dir.join("empty.parquet"), b"").unwrap();
        std::fs::write(dir.join("a.parquet.status.json"), b"{}").unwrap();
        std::fs::write(dir.join("c.snappy.parquet.part"), b"x").unwrap();

        let files = discover_files(dir).unwrap();
        assert_eq!(files, vec![dir.join("a.parquet"), dir.join("b.parquet")]);
    }

    #[tokio::test]
    async fn test_fresh_file_is_loaded_and_marked_complete() {
        let tmp = TempDir::new().unwrap();
        let file = write_block_file(&blocks_root(tmp.path()), "2024-01-01", 25);
        let writer = RecordingWriter::default();
        let driver = IngestionDriver::new(&writer, &config(tmp.path()));

        let summary = driver.ingest_date(date()).await.unwrap();

        assert_eq!(summary.files_loaded, 1);
        assert_eq!(summary.rows_written, 25);
        assert!(summary.is_clean());
        assert_eq!(
            writer.inserts(),
            vec![
                Insert::prepared("btc_blocks", 10),
                Insert::prepared("btc_blocks", 10),
                Insert::direct("btc_blocks", 5),
            ]
        );

        let state = ProgressStore.load(&file).unwrap();
        assert_eq!(state.last_row, 25);
        assert_eq!(state.num_rows, 25);
        assert!(state.is_complete());
        assert!(state.updated_at.is_some());
    }

    #[tokio::test]
    async fn test_complete_file_is_skipped() {
        let tmp = TempDir::new().unwrap();
        let file = write_block_file(&blocks_root(tmp.path()), "2024-01-01", 25);
        let mut done = ResumptionState {
            num_rows: 25,
            last_row: 25,
            updated_at: None,
        };
        ProgressStore.save(&file, &mut done).unwrap();

        let writer = RecordingWriter::default();
        let driver = IngestionDriver::new(&writer, &config(tmp.path()));
        let summary = driver.ingest_date(date()).await.unwrap();

        assert_eq!(summary.files_skipped, 1);
        assert_eq!(summary.files_loaded, 0);
        assert!(writer.inserts().is_empty());
    }

    #[tokio::test]
    async fn test_partial_file_resumes_from_saved_row() {
        let tmp = TempDir::new().unwrap();
        let file = write_block_file(&blocks_root(tmp.path()), "2024-01-01", 25);
        let mut partial = ResumptionState {
            num_rows: 25,
            last_row: 20,
            updated_at: None,
        };
        ProgressStore.save(&file, &mut partial).unwrap();

        let writer = RecordingWriter::default();
        let driver = IngestionDriver::new(&writer, &config(tmp.path()));
        let outcome = driver.ingest_file(DataKind::Blocks, &file).await.unwrap();

        let FileOutcome::Loaded(loaded) = outcome else {
            panic!("expected a load");
        };
        assert_eq!(loaded.start_row, 20);
        assert_eq!(loaded.rows_read, 5);
        assert_eq!(writer.rows_for("btc_blocks"), 5);
        assert!(ProgressStore.load(&file).unwrap().is_complete());
    }

    #[tokio::test]
    async fn test_failed_load_keeps_last_committed_row() {
        let tmp = TempDir::new().unwrap();
        let file = write_block_file(&blocks_root(tmp.path()), "2024-01-01", 25);
        let writer = RecordingWriter::failing_after(1);
        let driver = IngestionDriver::new(&writer, &config(tmp.path()));

        let err = driver.ingest_date(date()).await.unwrap_err();
        assert!(matches!(err, IngestError::OperationFailed { attempts: 1, .. }));

        let state = ProgressStore.load(&file).unwrap();
        assert_eq!(state.last_row, 10);
        assert!(!state.is_complete());
    }

    #[tokio::test]
    async fn test_continue_on_error_records_failure_and_moves_on() {
        let tmp = TempDir::new().unwrap();
        let root = blocks_root(tmp.path());
        write_block_file(&root, "2024-01-01", 5);
        let broken = root.join("2024-01-01").join("part-00001.snappy.parquet");
        std::fs::write(&broken, b"not parquet").unwrap();

        let writer = RecordingWriter::default();
        let driver = IngestionDriver::new(&writer, &config(tmp.path()))
            .with_policy(FailurePolicy::ContinueOnError);
        let summary = driver.ingest_date(date()).await.unwrap();

        assert_eq!(summary.files_loaded, 1);
        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.failures[0].file, broken);
        assert!(!status_path_for(&broken).exists());
    }

    #[tokio::test]
    async fn test_stop_on_error_aborts() {
        let tmp = TempDir::new().unwrap();
        let dir = blocks_root(tmp.path()).join("2024-01-01");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("part-00000.snappy.parquet"), b"not parquet").unwrap();

        let writer = RecordingWriter::default();
        let driver = IngestionDriver::new(&writer, &config(tmp.path()));
        assert!(driver.ingest_date(date()).await.is_err());
    }

    #[tokio::test]
    async fn test_missing_directories_are_skipped() {
        let tmp = TempDir::new().unwrap();
        let writer = RecordingWriter::default();
        let driver = IngestionDriver::new(&writer, &config(tmp.path()));

        let summary = driver.ingest_date(date()).await.unwrap();
        assert_eq!(summary.files_loaded, 0);
        assert!(summary.is_clean());
    }

    #[tokio::test]
    async fn test_transactions_feed_three_tables() {
        let tmp = TempDir::new().unwrap();
        let file = write_transaction_file(
            &tmp.path().join("btc").join("transactions"),
            "2024-01-01",
            &[(1, 2), (2, 1), (0, 1)],
        );
        let mut config = config(tmp.path());
        config.batch.transaction = 2;
        config.batch.input = 3;
        config.batch.output = 3;

        let writer = RecordingWriter::default();
        let driver = IngestionDriver::new(&writer, &config);
        let summary = driver.ingest_date(date()).await.unwrap();

        assert_eq!(summary.files_loaded, 1);
        assert_eq!(writer.rows_for(tables::TRANSACTIONS.name), 3);
        assert_eq!(writer.rows_for(tables::INPUTS.name), 3);
        assert_eq!(writer.rows_for(tables::OUTPUTS.name), 4);
        assert!(ProgressStore.load(&file).unwrap().is_complete());
    }

    #[tokio::test]
    async fn test_cancelled_run_processes_no_files() {
        let tmp = TempDir::new().unwrap();
        let file = write_block_file(&blocks_root(tmp.path()), "2024-01-01", 5);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let writer = RecordingWriter::default();
        let driver = IngestionDriver::new(&writer, &config(tmp.path())).with_cancellation(cancel);
        let summary = driver.ingest_date(date()).await.unwrap();

        assert!(summary.interrupted);
        assert!(writer.inserts().is_empty());
        assert!(!status_path_for(&file).exists());
    }
}
