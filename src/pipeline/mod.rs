//! Pipeline stages for PDF-to-dataset conversion.
//!
//! Each submodule owns one step. The stages that touch the outside world
//! (pdfium, the VLM provider, the filesystem) sit behind traits so the
//! concurrency machinery can be tested with in-memory fakes.
//!
//! ## Data Flow
//!
//! ```text
//!            ProducerPool (k documents in flight)
//!          ┌──────────────────────────────────────────────┐
//! input ──▶│ render ─▶ encode ─▶ rate_limit ─▶ llm ─▶ postprocess │──▶ queue ──▶ writer ──▶ sink
//! (*.pdf)  │ (pdfium)  (JPEG)    (tokens)      (VLM)   (JSON)      │   (bounded)  (N/chunk)  (Parquet)
//!          └──────────────────────────────────────────────┘
//! ```
//!
//! 1. [`input`]     discover `*.pdf` files and load their bytes
//! 2. [`render`]    rasterise pages and pull their text on the blocking pool
//! 3. [`encode`]    JPEG-encode page images, base64-wrap them for the request
//! 4. [`rate_limit`] global token bucket shared by every call
//! 5. [`llm`]       one VLM call per page, with retry and backoff
//! 6. [`postprocess`] parse the model's JSON reply into four queries + language
//! 7. [`document`]  per-document orchestration of steps 2–6
//! 8. [`producer`]  bounded pool of document workers
//! 9. [`queue`]     bounded hand-off with a "producers finished" signal
//! 10. [`writer`]   buffer records and cut fixed-size chunks
//! 11. [`sink`]     persist a chunk atomically as Parquet

pub mod document;
pub mod encode;
pub mod input;
pub mod llm;
pub mod postprocess;
pub mod producer;
pub mod queue;
pub mod rate_limit;
pub mod render;
pub mod sink;
pub mod writer;
