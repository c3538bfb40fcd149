//! Progress-callback trait for pipeline events.
//!
//! Inject an [`Arc<dyn PipelineProgressCallback>`] via
//! [`crate::config::DatasetConfigBuilder::progress_callback`] to observe a
//! run as it happens: a terminal progress bar, a metrics exporter, or a test
//! probe counting events.
//!
//! # Example
//!
//! ```rust
//! use edgequake_pdf2dataset::{DatasetConfig, PipelineProgressCallback};
//! use std::path::Path;
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct ChunkCounter(AtomicUsize);
//!
//! impl PipelineProgressCallback for ChunkCounter {
//!     fn on_chunk_written(&self, index: usize, records: usize, path: &Path) {
//!         self.0.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("chunk {index}: {records} rows → {}", path.display());
//!     }
//! }
//!
//! let config = DatasetConfig::builder()
//!     .progress_callback(Arc::new(ChunkCounter(AtomicUsize::new(0))))
//!     .build()
//!     .unwrap();
//! ```

use crate::record::RunStats;
use std::path::Path;
use std::sync::Arc;

/// Called by the pipeline as documents, pages and chunks complete.
///
/// Producers run concurrently, so document and page events may arrive
/// interleaved across documents and from different threads. Chunk events
/// always come from the single writer task, in index order. All methods
/// default to no-ops.
pub trait PipelineProgressCallback: Send + Sync {
    /// Called once, after discovery, before any document is opened.
    fn on_run_start(&self, total_documents: usize) {
        let _ = total_documents;
    }

    /// Called when a producer starts a document.
    fn on_document_start(&self, path: &Path) {
        let _ = path;
    }

    /// Called when a document was extracted and all its pages attempted.
    ///
    /// `records` counts what the document contributed; pages that failed
    /// contributed nothing and were reported through [`on_page_error`](Self::on_page_error).
    fn on_document_complete(&self, path: &Path, pages: usize, records: usize) {
        let _ = (path, pages, records);
    }

    /// Called when a document is skipped because extraction failed.
    fn on_document_error(&self, path: &Path, error: &str) {
        let _ = (path, error);
    }

    /// Called when a page is skipped after exhausting its retries.
    ///
    /// `page_num` is 1-indexed.
    fn on_page_error(&self, path: &Path, page_num: usize, error: &str) {
        let _ = (path, page_num, error);
    }

    /// Called after a chunk is persisted.
    fn on_chunk_written(&self, index: usize, records: usize, path: &Path) {
        let _ = (index, records, path);
    }

    /// Called once when the run ends successfully.
    fn on_run_complete(&self, stats: &RunStats) {
        let _ = stats;
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl PipelineProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::DatasetConfig`].
pub type ProgressCallback = Arc<dyn PipelineProgressCallback>;
