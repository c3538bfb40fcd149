//! Batch writer: the single consumer that turns queued records into chunks.
//!
//! Records are buffered in arrival order and cut into chunks of exactly
//! `batch_size`; only the final chunk of a run may be shorter. Chunks are
//! numbered from zero and written one at a time through a [`ChunkSink`] on
//! the blocking pool, so the output directory gains files in index order.
//!
//! A chunk that cannot be persisted stops the writer. Dropping the receiver
//! closes the queue, and producers see [`DatasetError::QueueClosed`] on their
//! next push.

use crate::config::DatasetConfig;
use crate::error::{DatasetError, PersistError};
use crate::pipeline::queue::{HandoffReceiver, Poll};
use crate::pipeline::sink::ChunkSink;
use crate::record::{ChunkInfo, Record};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// File name of chunk `index` while the total is still unknown.
pub fn chunk_file_name(split: &str, index: usize) -> String {
    format!("{split}-{index:05}-of-n.parquet")
}

/// File name of chunk `index` once the run wrote `total` chunks.
pub fn final_chunk_file_name(split: &str, index: usize, total: usize) -> String {
    format!("{split}-{index:05}-of-{total:05}.parquet")
}

/// Buffers records and flushes full chunks to a [`ChunkSink`].
pub struct BatchWriter {
    sink: Arc<dyn ChunkSink>,
    output_dir: PathBuf,
    config: Arc<DatasetConfig>,
    buffer: Vec<Record>,
    chunks: Vec<ChunkInfo>,
}

impl BatchWriter {
    /// A `batch_size` of zero is treated as one.
    pub fn new(sink: Arc<dyn ChunkSink>, output_dir: &Path, config: Arc<DatasetConfig>) -> Self {
        Self {
            sink,
            output_dir: output_dir.to_path_buf(),
            config,
            buffer: Vec::new(),
            chunks: Vec::new(),
        }
    }

    /// Consume `rx` until producers finish and the queue is empty, then flush
    /// the remainder. Returns every chunk written, in index order.
    pub async fn run(
        mut self,
        mut rx: HandoffReceiver<Vec<Record>>,
    ) -> Result<Vec<ChunkInfo>, DatasetError> {
        let wait = self.config.poll_interval();
        loop {
            match rx.poll(wait).await {
                Poll::Item(records) => self.push(records).await?,
                Poll::Idle => debug!("Writer idle, {} records buffered", self.buffer.len()),
                Poll::Drained => break,
            }
        }
        self.finish().await
    }

    /// Append `records` and write out every full chunk.
    pub async fn push(&mut self, records: Vec<Record>) -> Result<(), DatasetError> {
        self.buffer.extend(records);
        let size = self.config.batch_size.max(1);
        while self.buffer.len() >= size {
            let chunk: Vec<Record> = self.buffer.drain(..size).collect();
            self.flush(chunk).await?;
        }
        Ok(())
    }

    /// Flush any partial chunk and return the chunk list.
    pub async fn finish(mut self) -> Result<Vec<ChunkInfo>, DatasetError> {
        if !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            self.flush(rest).await?;
        }
        info!(
            "Writer done: {} chunks, {} records",
            self.chunks.len(),
            self.chunks.iter().map(|c| c.records).sum::<usize>()
        );
        Ok(self.chunks)
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    async fn flush(&mut self, chunk: Vec<Record>) -> Result<(), DatasetError> {
        let index = self.chunks.len();
        let path = self
            .output_dir
            .join(chunk_file_name(&self.config.split, index));
        let records = chunk.len();

        let sink = Arc::clone(&self.sink);
        let target = path.clone();
        tokio::task::spawn_blocking(move || sink.write_chunk(&chunk, &target))
            .await
            .map_err(|e| PersistError::TaskFailed(e.to_string()))
            .and_then(|r| r)
            .map_err(|source| DatasetError::PersistFailed { index, source })?;

        info!("Chunk {} written: {} records → {}", index, records, path.display());
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_chunk_written(index, records, &path);
        }
        self.chunks.push(ChunkInfo {
            index,
            path,
            records,
        });
        Ok(())
    }
}
