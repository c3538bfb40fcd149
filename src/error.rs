//! Error types for the edgequake-pdf2dataset library.
//!
//! Failures split along the same line as the pipeline's recovery policy:
//!
//! * [`DatasetError`] — **Fatal**: the run cannot start or must stop
//!   (missing input directory, unwritable output, a chunk that could not be
//!   persisted). Returned as `Err(DatasetError)` from [`crate::run_pipeline`].
//!
//! * [`ExtractionError`] — **Document-level**: one PDF could not be read or
//!   rasterised. The document contributes zero records; the run continues.
//!
//! * [`CallError`] — **Page-level**: the query-generation call for one page
//!   failed. Retried with backoff; once exhausted the page is skipped.
//!
//! * [`PersistError`] — raised by a [`crate::pipeline::sink::ChunkSink`].
//!   Always escalated to [`DatasetError::PersistFailed`]: dropping a chunk
//!   would silently lose records.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the edgequake-pdf2dataset library.
#[derive(Debug, Error)]
pub enum DatasetError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input directory was not found at the given path.
    #[error("Input directory not found: '{path}'\nCheck the path exists and is readable.")]
    InputDirNotFound { path: PathBuf },

    /// The input path exists but is a regular file.
    #[error("Input path '{path}' is not a directory")]
    InputNotADirectory { path: PathBuf },

    /// Listing the input directory failed.
    #[error("Failed to list input directory '{path}': {source}")]
    InputListFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Output errors ─────────────────────────────────────────────────────
    /// The output directory could not be created or written to.
    #[error("Output directory '{path}' is not writable: {source}\nTry: mkdir -p {path:?}")]
    OutputNotWritable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A chunk could not be written. The run stops rather than lose records.
    #[error("Failed to persist chunk {index}: {source}")]
    PersistFailed {
        index: usize,
        #[source]
        source: PersistError,
    },

    /// Renaming chunks to their final `-of-NNNNN` names failed.
    #[error("Failed to rename '{from}' to '{to}': {source}")]
    FinalizeFailed {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Pipeline errors ───────────────────────────────────────────────────
    /// A producer tried to hand off a result after the writer stopped.
    #[error("Hand-off queue closed: the writer stopped before producers finished")]
    QueueClosed,

    // ── LLM errors ────────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error (panicked task, runtime failure).
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A document could not be turned into pages.
#[derive(Debug, Clone, Error)]
pub enum ExtractionError {
    /// Reading the file from disk failed.
    #[error("Failed to read '{path}': {detail}")]
    Unreadable { path: PathBuf, detail: String },

    /// The file was read but does not start with `%PDF`.
    #[error("'{path}' is not a PDF (first bytes: {magic:?})")]
    NotAPdf { path: PathBuf, magic: Vec<u8> },

    /// pdfium could not parse the document.
    #[error("PDF is corrupt: {detail}")]
    CorruptPdf { detail: String },

    /// The document is encrypted.
    #[error("PDF is encrypted and requires a password")]
    PasswordRequired,

    /// pdfium returned an error for a specific page.
    #[error("Rasterisation failed for page {page}: {detail}")]
    RasterisationFailed { page: usize, detail: String },

    /// The rendered page could not be JPEG-encoded.
    #[error("Image encoding failed for page {page}: {detail}")]
    EncodeFailed { page: usize, detail: String },

    /// No pdfium library could be loaded.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium or install pdfium system-wide."
    )]
    PdfiumBindingFailed(String),

    /// The extraction worker panicked or was cancelled.
    #[error("Extraction task failed: {0}")]
    TaskFailed(String),
}

/// A single query-generation call failed.
#[derive(Debug, Clone, Error)]
pub enum CallError {
    /// Network error, HTTP 429/5xx, timeout — worth another attempt.
    #[error("transient call failure: {detail}")]
    Transient { detail: String },

    /// The provider answered with no content.
    #[error("empty response from provider")]
    EmptyResponse,

    /// The reply could not be parsed into four queries and a language code.
    #[error("malformed response: {detail}")]
    Malformed { detail: String },

    /// Every attempt failed; the page is skipped.
    #[error("call failed after {attempts} attempts: {last_error}")]
    Exhausted { attempts: u32, last_error: String },
}

/// Writing one chunk failed.
#[derive(Debug, Error)]
pub enum PersistError {
    /// Creating, writing or renaming the chunk file failed.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Arrow/Parquet encoding failed.
    #[error("Encoding '{path}' failed: {detail}")]
    Encode { path: PathBuf, detail: String },

    /// The blocking writer task panicked.
    #[error("Chunk writer task failed: {0}")]
    TaskFailed(String),
}
