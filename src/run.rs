//! Run entry points: wire the pipeline stages together for one input folder.
//!
//! ```text
//! discover ──▶ prepare output ──▶ spawn writer ──▶ producer pool ──▶ finish signal ──▶ await writer
//! ```
//!
//! The writer is always awaited, whether the pool finished cleanly or not,
//! so a partial final chunk is flushed and no task outlives the run.

use crate::config::DatasetConfig;
use crate::error::DatasetError;
use crate::pipeline::document::DocumentProcessor;
use crate::pipeline::input;
use crate::pipeline::llm::{QueryGenerator, VlmQueryGenerator};
use crate::pipeline::producer::{run_producers, ProducerReport};
use crate::pipeline::queue::handoff_queue;
use crate::pipeline::rate_limit::RateLimiter;
use crate::pipeline::render::{PageExtractor, PdfiumExtractor, RenderSettings};
use crate::pipeline::sink::{ChunkSink, ParquetSink};
use crate::pipeline::writer::{final_chunk_file_name, BatchWriter};
use crate::record::{ChunkInfo, RunStats};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// The three external collaborators a run needs.
///
/// [`PipelineContext::from_config`] builds the production set (pdfium, a VLM
/// provider pool, Parquet files). Tests and embedders can swap in their own.
#[derive(Clone)]
pub struct PipelineContext {
    pub extractor: Arc<dyn PageExtractor>,
    pub generator: Arc<dyn QueryGenerator>,
    pub sink: Arc<dyn ChunkSink>,
}

impl PipelineContext {
    pub fn new(
        extractor: Arc<dyn PageExtractor>,
        generator: Arc<dyn QueryGenerator>,
        sink: Arc<dyn ChunkSink>,
    ) -> Self {
        Self {
            extractor,
            generator,
            sink,
        }
    }

    /// Production collaborators. Fails if no VLM provider can be resolved.
    pub fn from_config(config: &DatasetConfig) -> Result<Self, DatasetError> {
        let generator = VlmQueryGenerator::from_config(config)?;
        info!("VLM client pool: {} handles", generator.pool_size());
        Ok(Self::new(
            Arc::new(PdfiumExtractor::new(RenderSettings::from(config))),
            Arc::new(generator),
            Arc::new(ParquetSink::new()),
        ))
    }
}

/// Turn every PDF in `input_dir` into dataset chunks under `output_dir`.
///
/// This is the primary entry point for the library. The VLM provider is
/// resolved only when there is at least one document to process.
///
/// # Returns
/// `Ok(RunStats)` once every document has been attempted and every record
/// persisted, even if some pages or documents were skipped (see
/// `stats.pages_failed` / `stats.documents_failed`).
///
/// # Errors
/// Returns `Err(DatasetError)` only for fatal errors:
/// - Invalid configuration
/// - Input directory missing or unreadable
/// - Output directory not writable
/// - No VLM provider configured
/// - A chunk could not be persisted
pub async fn run_pipeline(
    input_dir: impl AsRef<Path>,
    output_dir: impl AsRef<Path>,
    config: &DatasetConfig,
) -> Result<RunStats, DatasetError> {
    execute(input_dir.as_ref(), output_dir.as_ref(), config, || {
        PipelineContext::from_config(config)
    })
    .await
}

/// [`run_pipeline`] with caller-supplied collaborators.
pub async fn run_pipeline_with(
    ctx: &PipelineContext,
    input_dir: impl AsRef<Path>,
    output_dir: impl AsRef<Path>,
    config: &DatasetConfig,
) -> Result<RunStats, DatasetError> {
    execute(input_dir.as_ref(), output_dir.as_ref(), config, || {
        Ok(ctx.clone())
    })
    .await
}

async fn execute(
    input_dir: &Path,
    output_dir: &Path,
    config: &DatasetConfig,
    context: impl FnOnce() -> Result<PipelineContext, DatasetError>,
) -> Result<RunStats, DatasetError> {
    let total_start = Instant::now();
    config.validate()?;
    info!(
        "Starting run: {} → {}",
        input_dir.display(),
        output_dir.display()
    );

    // ── Step 1: Discover documents ───────────────────────────────────────
    let documents = input::discover_documents(input_dir).await?;
    let documents_total = documents.len();

    // ── Step 2: Prepare output directory ─────────────────────────────────
    prepare_output_dir(output_dir).await?;

    if let Some(ref cb) = config.progress_callback {
        cb.on_run_start(documents_total);
    }

    if documents_total == 0 {
        warn!("No PDFs found in {}", input_dir.display());
        let stats = build_stats(
            0,
            ProducerReport::default(),
            Vec::new(),
            total_start.elapsed().as_millis() as u64,
            0.0,
        );
        if let Some(ref cb) = config.progress_callback {
            cb.on_run_complete(&stats);
        }
        return Ok(stats);
    }

    // ── Step 3: Shared state ─────────────────────────────────────────────
    let ctx = context()?;
    let config = Arc::new(config.clone());
    let limiter = Arc::new(RateLimiter::new(config.requests_per_second));
    let processor = DocumentProcessor::new(
        Arc::clone(&ctx.extractor),
        Arc::clone(&ctx.generator),
        Arc::clone(&limiter),
        Arc::clone(&config),
    );

    // ── Step 4: Writer task ──────────────────────────────────────────────
    let (tx, rx) = handoff_queue(config.queue_capacity);
    let writer = BatchWriter::new(Arc::clone(&ctx.sink), output_dir, Arc::clone(&config));
    let writer_handle = tokio::spawn(writer.run(rx));

    // ── Step 5: Producers ────────────────────────────────────────────────
    let produced = run_producers(documents, &processor, &tx, &config).await;

    // ── Step 6: Cleanup, on success and failure alike ────────────────────
    tx.finish();
    drop(tx);
    let written = match writer_handle.await {
        Ok(r) => r,
        Err(e) => Err(DatasetError::Internal(format!("Writer task failed: {e}"))),
    };

    // The writer's own error explains a QueueClosed seen by producers.
    let (report, mut chunks) = match (produced, written) {
        (_, Err(e)) => return Err(e),
        (Err(e), Ok(_)) => return Err(e),
        (Ok(report), Ok(chunks)) => (report, chunks),
    };

    // ── Step 7: Final shard names ────────────────────────────────────────
    if config.finalize_names {
        finalize_chunk_names(&mut chunks, &config.split).await?;
    }

    let stats = build_stats(
        documents_total,
        report,
        chunks,
        total_start.elapsed().as_millis() as u64,
        limiter.observed_rps(),
    );

    info!(
        "Run complete: {}/{} documents, {} records in {} chunks, {}ms",
        stats.documents_processed,
        stats.documents_total,
        stats.records_written,
        stats.chunks.len(),
        stats.total_duration_ms
    );

    if let Some(ref cb) = config.progress_callback {
        cb.on_run_complete(&stats);
    }

    Ok(stats)
}

/// Synchronous wrapper around [`run_pipeline`] for non-async callers.
///
/// Creates a temporary Tokio runtime. Do not call from inside an existing
/// runtime.
pub fn run_pipeline_sync(
    input_dir: impl AsRef<Path>,
    output_dir: impl AsRef<Path>,
    config: &DatasetConfig,
) -> Result<RunStats, DatasetError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| DatasetError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(run_pipeline(input_dir, output_dir, config))
}

/// Rename `-of-n` chunks to `-of-{total}` now that the total is known.
///
/// Updates each [`ChunkInfo::path`] in place. An existing file with the
/// final name is replaced.
pub async fn finalize_chunk_names(
    chunks: &mut [ChunkInfo],
    split: &str,
) -> Result<(), DatasetError> {
    let total = chunks.len();
    for chunk in chunks.iter_mut() {
        let to = chunk
            .path
            .with_file_name(final_chunk_file_name(split, chunk.index, total));
        tokio::fs::rename(&chunk.path, &to)
            .await
            .map_err(|source| DatasetError::FinalizeFailed {
                from: chunk.path.clone(),
                to: to.clone(),
                source,
            })?;
        chunk.path = to;
    }
    info!("Finalized {} chunk names", total);
    Ok(())
}

/// Create `dir` if needed and check a file can be created in it.
async fn prepare_output_dir(dir: &Path) -> Result<(), DatasetError> {
    let not_writable = |source| DatasetError::OutputNotWritable {
        path: dir.to_path_buf(),
        source,
    };
    tokio::fs::create_dir_all(dir).await.map_err(not_writable)?;
    // Dropped (and deleted) immediately.
    tempfile::NamedTempFile::new_in(dir).map_err(not_writable)?;
    Ok(())
}

fn build_stats(
    documents_total: usize,
    report: ProducerReport,
    chunks: Vec<ChunkInfo>,
    total_duration_ms: u64,
    observed_rps: f64,
) -> RunStats {
    RunStats {
        documents_total,
        documents_processed: report.documents_processed,
        documents_failed: report.documents_failed,
        pages_total: report.pages_total,
        pages_failed: report.pages_failed,
        records_written: chunks.iter().map(|c| c.records).sum(),
        chunks,
        total_duration_ms,
        observed_rps,
    }
}
