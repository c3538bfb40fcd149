//! Data types flowing through the pipeline and returned to callers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// One rasterised page: JPEG bytes plus the text layer pdfium extracted.
#[derive(Clone)]
pub struct Page {
    /// 0-based page index within its document.
    pub index: usize,
    /// JPEG-encoded page image. Shared by every record built from the page.
    pub image: Arc<[u8]>,
    /// Extracted text layer (may be empty for scanned pages).
    pub text: String,
}

impl fmt::Debug for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Page")
            .field("index", &self.index)
            .field("image_bytes", &self.image.len())
            .field("text_chars", &self.text.chars().count())
            .finish()
    }
}

/// The four query variants and detected language returned for one page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageQueries {
    pub main_query: String,
    pub secondary_query: String,
    pub visual_query: String,
    pub multimodal_query: String,
    /// Lower-case ISO 639-1 code, e.g. `"fr"`.
    pub language: String,
}

impl PageQueries {
    /// Number of records produced per successful page.
    pub const VARIANTS: usize = 4;

    /// The query variants in output order.
    pub fn variants(&self) -> [&str; Self::VARIANTS] {
        [
            &self.main_query,
            &self.secondary_query,
            &self.visual_query,
            &self.multimodal_query,
        ]
    }
}

/// A labelled training row before it is persisted.
///
/// The row `id` is assigned by the [`crate::pipeline::sink::ChunkSink`]
/// when the chunk is written.
#[derive(Clone, PartialEq, Eq)]
pub struct Record {
    pub query: String,
    pub image: Arc<[u8]>,
    pub language: String,
}

impl Record {
    /// Build the four records for one page, in variant order.
    pub fn from_page(page: &Page, queries: &PageQueries) -> Vec<Record> {
        queries
            .variants()
            .into_iter()
            .map(|query| Record {
                query: query.to_string(),
                image: Arc::clone(&page.image),
                language: queries.language.clone(),
            })
            .collect()
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("query", &self.query)
            .field("image_bytes", &self.image.len())
            .field("language", &self.language)
            .finish()
    }
}

/// Everything one document contributed, in page order.
#[derive(Debug, Clone, Default)]
pub struct DocumentResult {
    pub source: PathBuf,
    pub records: Vec<Record>,
    pub pages_total: usize,
    pub pages_failed: usize,
}

/// One persisted output chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkInfo {
    pub index: usize,
    pub path: PathBuf,
    pub records: usize,
}

/// Aggregate statistics for a pipeline run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunStats {
    /// PDFs discovered in the input directory.
    pub documents_total: usize,
    /// Documents whose pages were extracted (some pages may still have failed).
    pub documents_processed: usize,
    /// Documents skipped because extraction failed.
    pub documents_failed: usize,
    pub pages_total: usize,
    pub pages_failed: usize,
    /// Records persisted across all chunks.
    pub records_written: usize,
    /// Chunks in write order (paths reflect final names).
    pub chunks: Vec<ChunkInfo>,
    pub total_duration_ms: u64,
    /// Successful calls per second over the last 30 s of the run.
    pub observed_rps: f64,
}
