//! Record loader
//!
//! Loads one file into the store:
//!
//! 1. position the source at the resume row, if any (a failed seek is fatal)
//! 2. prepare one full-batch insert per target table
//! 3. read chunks of `batch_size` records, buffer them per table, write every
//!    full batch with its prepared statement, report progress
//! 4. once the source is exhausted (or cancelled), write what is left with
//!    exactly-sized direct inserts and report progress a final time
//!
//! Every write goes through the [`RetryPolicy`]. The cursor handed to the
//! progress callback never runs ahead of the store: it is the oldest source row
//! with any part still buffered, so a transaction counts as committed only
//! once its inputs and outputs are written too.

use crate::batch::{BatchBuffer, BlockAssembler, TransactionAssembler, TransactionBatchSizes};
use crate::error::Result;
use crate::models::{BtcBlock, BtcTransaction};
use crate::retry::RetryPolicy;
use crate::source::RecordSource;
use crate::store::{flatten_rows, BatchWriter, TableRow};
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Progress callback: `(file, cursor, total)`. Failures are logged, never fatal.
pub type ProgressFn<'a> = dyn FnMut(&Path, u64, u64) -> Result<()> + Send + 'a;

/// Outcome of loading one file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadSummary {
    pub total_rows: u64,
    pub start_row: u64,
    pub rows_read: u64,
    /// Committed cursor at return
    pub cursor: u64,
    pub batches_written: u64,
    pub rows_written: u64,
    /// Stopped early on cancellation
    pub interrupted: bool,
}

/// Write path for one file layout: owns the buffers and the prepared
/// statements for every table the layout feeds.
pub(crate) trait Pipeline<W: BatchWriter>: Sized {
    type Record;
    type Sizes: Copy;

    async fn prepare(sizes: Self::Sizes, writer: &W, retry: &RetryPolicy) -> Result<Self>;

    fn chunk_size(&self) -> usize;

    fn push_chunk(&mut self, chunk: Vec<Self::Record>);

    /// Write every full batch currently buffered
    async fn write_full(&mut self, writer: &W, retry: &RetryPolicy) -> Result<Written>;

    /// Write everything still buffered, whatever its size
    async fn write_remainder(&mut self, writer: &W, retry: &RetryPolicy) -> Result<Written>;

    fn pending_row(&self) -> Option<u64>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Written {
    batches: u64,
    rows: u64,
}

impl std::ops::AddAssign for Written {
    fn add_assign(&mut self, other: Self) {
        self.batches += other.batches;
        self.rows += other.rows;
    }
}

async fn prepare_statement<T: TableRow, W: BatchWriter>(
    batch_size: usize,
    writer: &W,
    retry: &RetryPolicy,
) -> Result<W::Statement> {
    let operation = format!("prepare {} statement", T::TABLE.name);
    retry
        .run(&operation, || writer.prepare(T::TABLE, batch_size))
        .await
}

async fn write_full_batches<T: TableRow, W: BatchWriter>(
    buffer: &mut BatchBuffer<T>,
    statement: &W::Statement,
    writer: &W,
    retry: &RetryPolicy,
) -> Result<Written> {
    let mut written = Written::default();
    let operation = format!("insert {} batch", T::TABLE.name);

    while let Some(batch) = buffer.take_full() {
        let args = flatten_rows(&batch);
        retry
            .run(&operation, || writer.execute_prepared(statement, &args))
            .await?;

        debug!(table = T::TABLE.name, rows = batch.len(), "Inserted batch");
        written += Written {
            batches: 1,
            rows: batch.len() as u64,
        };
    }
    Ok(written)
}

async fn write_remaining<T: TableRow, W: BatchWriter>(
    buffer: &mut BatchBuffer<T>,
    writer: &W,
    retry: &RetryPolicy,
) -> Result<Written> {
    let rows = buffer.take_remainder();
    if rows.is_empty() {
        return Ok(Written::default());
    }

    let args = flatten_rows(&rows);
    let operation = format!("insert {} remainder", T::TABLE.name);
    retry
        .run(&operation, || writer.execute_direct(T::TABLE, &args))
        .await?;

    debug!(table = T::TABLE.name, rows = rows.len(), "Inserted remaining rows");
    Ok(Written {
        batches: 1,
        rows: rows.len() as u64,
    })
}

pub(crate) struct BlockPipeline<W: BatchWriter> {
    assembler: BlockAssembler,
    blocks: W::Statement,
}

impl<W: BatchWriter> Pipeline<W> for BlockPipeline<W> {
    type Record = BtcBlock;
    type Sizes = usize;

    async fn prepare(batch_size: usize, writer: &W, retry: &RetryPolicy) -> Result<Self> {
        Ok(Self {
            assembler: BlockAssembler::new(batch_size),
            blocks: prepare_statement::<BtcBlock, W>(batch_size, writer, retry).await?,
        })
    }

    fn chunk_size(&self) -> usize {
        self.assembler.blocks.capacity()
    }

    fn push_chunk(&mut self, chunk: Vec<BtcBlock>) {
        self.assembler.push_chunk(chunk);
    }

    async fn write_full(&mut self, writer: &W, retry: &RetryPolicy) -> Result<Written> {
        write_full_batches(&mut self.assembler.blocks, &self.blocks, writer, retry).await
    }

    async fn write_remainder(&mut self, writer: &W, retry: &RetryPolicy) -> Result<Written> {
        write_remaining(&mut self.assembler.blocks, writer, retry).await
    }

    fn pending_row(&self) -> Option<u64> {
        self.assembler.pending_row()
    }
}

pub(crate) struct TransactionPipeline<W: BatchWriter> {
    assembler: TransactionAssembler,
    transactions: W::Statement,
    inputs: W::Statement,
    outputs: W::Statement,
}

impl<W: BatchWriter> Pipeline<W> for TransactionPipeline<W> {
    type Record = BtcTransaction;
    type Sizes = TransactionBatchSizes;

    async fn prepare(
        sizes: TransactionBatchSizes,
        writer: &W,
        retry: &RetryPolicy,
    ) -> Result<Self> {
        use crate::models::{InputRow, OutputRow};

        Ok(Self {
            assembler: TransactionAssembler::new(sizes),
            transactions: prepare_statement::<BtcTransaction, W>(sizes.transactions, writer, retry)
                .await?,
            inputs: prepare_statement::<InputRow, W>(sizes.inputs, writer, retry).await?,
            outputs: prepare_statement::<OutputRow, W>(sizes.outputs, writer, retry).await?,
        })
    }

    fn chunk_size(&self) -> usize {
        self.assembler.transactions.capacity()
    }

    fn push_chunk(&mut self, chunk: Vec<BtcTransaction>) {
        self.assembler.push_chunk(chunk);
    }

    async fn write_full(&mut self, writer: &W, retry: &RetryPolicy) -> Result<Written> {
        let assembler = &mut self.assembler;
        let mut written =
            write_full_batches(&mut assembler.transactions, &self.transactions, writer, retry)
                .await?;
        written += write_full_batches(&mut assembler.inputs, &self.inputs, writer, retry).await?;
        written += write_full_batches(&mut assembler.outputs, &self.outputs, writer, retry).await?;
        Ok(written)
    }

    async fn write_remainder(&mut self, writer: &W, retry: &RetryPolicy) -> Result<Written> {
        let assembler = &mut self.assembler;
        let mut written = write_remaining(&mut assembler.transactions, writer, retry).await?;
        written += write_remaining(&mut assembler.inputs, writer, retry).await?;
        written += write_remaining(&mut assembler.outputs, writer, retry).await?;
        Ok(written)
    }

    fn pending_row(&self) -> Option<u64> {
        self.assembler.pending_row()
    }
}

/// Loads files through a [`BatchWriter`]
pub struct RecordLoader<'w, W: BatchWriter> {
    writer: &'w W,
    retry: RetryPolicy,
    cancel: CancellationToken,
}

impl<'w, W: BatchWriter> RecordLoader<'w, W> {
    pub fn new(writer: &'w W, retry: RetryPolicy) -> Self {
        Self {
            writer,
            retry,
            cancel: CancellationToken::new(),
        }
    }

    /// Stop reading at the next chunk boundary once `cancel` fires
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Load a block file. Chunks are `batch_size` rows.
    pub async fn load_blocks<S>(
        &self,
        file: &Path,
        source: &mut S,
        batch_size: usize,
        start_row: u64,
        on_progress: &mut ProgressFn<'_>,
    ) -> Result<LoadSummary>
    where
        S: RecordSource<Record = BtcBlock>,
    {
        self.run::<S, BlockPipeline<W>>(file, source, batch_size, start_row, on_progress)
            .await
    }

    /// Load a transaction file. Chunks are `sizes.transactions` rows; inputs
    /// and outputs batch independently.
    pub async fn load_transactions<S>(
        &self,
        file: &Path,
        source: &mut S,
        sizes: TransactionBatchSizes,
        start_row: u64,
        on_progress: &mut ProgressFn<'_>,
    ) -> Result<LoadSummary>
    where
        S: RecordSource<Record = BtcTransaction>,
    {
        self.run::<S, TransactionPipeline<W>>(file, source, sizes, start_row, on_progress)
            .await
    }

    /// Always releases the writer's per-file resources, success or not
    async fn run<S, P>(
        &self,
        file: &Path,
        source: &mut S,
        sizes: P::Sizes,
        start_row: u64,
        on_progress: &mut ProgressFn<'_>,
    ) -> Result<LoadSummary>
    where
        S: RecordSource,
        P: Pipeline<W, Record = S::Record>,
    {
        let result = self
            .drive::<S, P>(file, source, sizes, start_row, on_progress)
            .await;
        self.writer.release().await;
        result
    }

    async fn drive<S, P>(
        &self,
        file: &Path,
        source: &mut S,
        sizes: P::Sizes,
        start_row: u64,
        on_progress: &mut ProgressFn<'_>,
    ) -> Result<LoadSummary>
    where
        S: RecordSource,
        P: Pipeline<W, Record = S::Record>,
    {
        let total_rows = source.total_rows();
        let mut summary = LoadSummary {
            total_rows,
            start_row,
            cursor: start_row,
            ..Default::default()
        };

        if start_row > 0 {
            source.seek_to_row(start_row)?;
            info!(
                file = %file.display(),
                row = start_row,
                total = total_rows,
                "Resuming from row {}/{}",
                start_row,
                total_rows
            );
        }

        let mut pipeline = P::prepare(sizes, self.writer, &self.retry).await?;
        let chunk_size = pipeline.chunk_size();

        loop {
            if self.cancel.is_cancelled() {
                warn!(file = %file.display(), row = summary.cursor, "Cancelled, flushing buffered rows");
                summary.interrupted = true;
                break;
            }

            let chunk = source.read_chunk(chunk_size)?;
            let count = chunk.records.len() as u64;
            summary.rows_read += count;

            if count > 0 {
                pipeline.push_chunk(chunk.records);
                let written = pipeline.write_full(self.writer, &self.retry).await?;
                if written.batches > 0 {
                    self.record(&mut summary, written, &pipeline, file, on_progress);
                    info!(
                        file = %file.display(),
                        row = summary.cursor,
                        total = total_rows,
                        "Inserted {} rows in {} batches (cursor {}/{})",
                        written.rows,
                        written.batches,
                        summary.cursor,
                        total_rows
                    );
                }
            }

            if chunk.end_of_data || count == 0 {
                break;
            }
        }

        let written = pipeline.write_remainder(self.writer, &self.retry).await?;
        if written.batches > 0 {
            self.record(&mut summary, written, &pipeline, file, on_progress);
            info!(
                file = %file.display(),
                row = summary.cursor,
                total = total_rows,
                "Inserted {} remaining rows (cursor {}/{})",
                written.rows,
                summary.cursor,
                total_rows
            );
        }

        Ok(summary)
    }

    fn record<P: Pipeline<W>>(
        &self,
        summary: &mut LoadSummary,
        written: Written,
        pipeline: &P,
        file: &Path,
        on_progress: &mut ProgressFn<'_>,
    ) {
        summary.batches_written += written.batches;
        summary.rows_written += written.rows;

        let read_position = summary.start_row + summary.rows_read;
        let cursor = pipeline.pending_row().unwrap_or(read_position);
        summary.cursor = summary.cursor.max(cursor);

        if let Err(e) = on_progress(file, summary.cursor, summary.total_rows) {
            warn!(file = %file.display(), error = %e, "Progress callback failed");
        }
    }
}
