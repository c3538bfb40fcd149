//! # edgequake-pdf2dataset
//!
//! Turn a folder of PDFs into a multilingual visual-retrieval dataset using
//! Vision Language Models (VLMs).
//!
//! ## Why this crate?
//!
//! Training a document retriever needs `(query, page image)` pairs in many
//! languages, and hand-labelling pages does not scale. Instead this crate
//! rasterises every page, asks a VLM for four different queries the page
//! answers (main, secondary, visual, multimodal) plus the page language, and
//! writes one row per query into fixed-size Parquet shards ready for a
//! dataset hub.
//!
//! ## Pipeline Overview
//!
//! ```text
//! folder of PDFs
//!  │
//!  ├─ 1. Discover   list *.pdf, sorted
//!  ├─ 2. Render     rasterise pages + text layer via pdfium (spawn_blocking)
//!  ├─ 3. Encode     JPEG → base64 ImageData
//!  ├─ 4. Pace       global token bucket, requests_per_second
//!  ├─ 5. VLM        one call per page, retry with exponential backoff
//!  ├─ 6. Parse      JSON reply → 4 queries + language code
//!  ├─ 7. Hand off   bounded queue, k producers → 1 writer
//!  └─ 8. Persist    N records per Parquet chunk, atomic rename
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_pdf2dataset::{run_pipeline, DatasetConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from GEMINI_API_KEY / OPENAI_API_KEY / …
//!     let config = DatasetConfig::builder().batch_size(1000).build()?;
//!     let stats = run_pipeline("pdfs/", "dataset/", &config).await?;
//!     eprintln!(
//!         "{} records in {} chunks ({} pages skipped)",
//!         stats.records_written,
//!         stats.chunks.len(),
//!         stats.pages_failed
//!     );
//!     Ok(())
//! }
//! ```
//!
//! ## Failure Policy
//!
//! | Failure | Scope | Effect |
//! |---------|-------|--------|
//! | VLM call error | page | retried; after `max_retries` the page is skipped |
//! | unreadable / corrupt PDF | document | logged, document skipped |
//! | chunk write error | run | fatal, `run_pipeline` returns `Err` |
//! | missing input / unwritable output | run | fatal before any work starts |
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdf2dataset` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-pdf2dataset = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod record;
pub mod run;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{DatasetConfig, DatasetConfigBuilder};
pub use error::{CallError, DatasetError, ExtractionError, PersistError};
pub use pipeline::llm::QueryGenerator;
pub use pipeline::render::PageExtractor;
pub use pipeline::sink::ChunkSink;
pub use progress::{NoopProgressCallback, PipelineProgressCallback, ProgressCallback};
pub use record::{ChunkInfo, DocumentResult, Page, PageQueries, Record, RunStats};
pub use run::{run_pipeline, run_pipeline_sync, run_pipeline_with, PipelineContext};
