//! Pipeline integration tests with in-memory collaborators.
//!
//! PDFs on disk are tiny text files starting with `%PDF`; the fake extractor
//! reads their body to decide how many pages they have and which ones the
//! fake generator should fail on. Chunks go through the real Parquet sink
//! into a temp directory unless a test needs a failing sink.

use arrow::array::{Array, StringArray};
use async_trait::async_trait;
use edgequake_pdf2dataset::pipeline::sink::ParquetSink;
use edgequake_pdf2dataset::{
    run_pipeline_with, CallError, ChunkSink, DatasetConfig, DatasetError, ExtractionError, Page,
    PageExtractor, PageQueries, PersistError, PipelineContext, PipelineProgressCallback,
    QueryGenerator, Record, RunStats,
};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use std::collections::HashSet;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio::time::{Duration, Instant};

// ── Fakes ────────────────────────────────────────────────────────────────────

/// Document body format: `%PDF\n<name>\n<pages>\n[bad page list]`, or
/// `%PDF\nbroken` for a document that fails extraction.
struct FakeExtractor;

#[async_trait]
impl PageExtractor for FakeExtractor {
    async fn extract_pages(&self, document: Arc<[u8]>) -> Result<Vec<Page>, ExtractionError> {
        let body = String::from_utf8_lossy(&document);
        let mut lines = body.lines().skip(1);
        let name = lines.next().unwrap_or_default().to_string();
        if name == "broken" {
            return Err(ExtractionError::CorruptPdf {
                detail: "trailer not found".into(),
            });
        }
        let pages: usize = lines.next().unwrap().parse().unwrap();
        let bad: HashSet<usize> = lines
            .next()
            .map(|l| l.split(',').map(|p| p.parse().unwrap()).collect())
            .unwrap_or_default();

        Ok((0..pages)
            .map(|i| Page {
                index: i,
                image: Arc::from(format!("{name}:{i}").into_bytes()),
                text: if bad.contains(&i) { "FAIL".into() } else { String::new() },
            })
            .collect())
    }
}

/// Answers with queries derived from the page image; fails every attempt
/// for pages whose text is `FAIL`. Records the instant of each call.
#[derive(Default)]
struct FakeGenerator {
    calls: Mutex<Vec<Instant>>,
}

#[async_trait]
impl QueryGenerator for FakeGenerator {
    async fn generate(&self, page: &Page) -> Result<PageQueries, CallError> {
        self.calls.lock().unwrap().push(Instant::now());
        if page.text == "FAIL" {
            return Err(CallError::Transient {
                detail: "HTTP 429".into(),
            });
        }
        let tag = String::from_utf8_lossy(&page.image).into_owned();
        Ok(PageQueries {
            main_query: format!("{tag} main"),
            secondary_query: format!("{tag} secondary"),
            visual_query: format!("{tag} visual"),
            multimodal_query: format!("{tag} multimodal"),
            language: "en".into(),
        })
    }
}

/// Keeps chunks in memory.
#[derive(Default)]
struct MemorySink {
    chunks: Mutex<Vec<Vec<String>>>,
}

impl ChunkSink for MemorySink {
    fn write_chunk(&self, records: &[Record], _path: &Path) -> Result<(), PersistError> {
        self.chunks
            .lock()
            .unwrap()
            .push(records.iter().map(|r| r.query.clone()).collect());
        Ok(())
    }
}

struct FailingSink;

impl ChunkSink for FailingSink {
    fn write_chunk(&self, _records: &[Record], path: &Path) -> Result<(), PersistError> {
        Err(PersistError::Io {
            path: path.to_path_buf(),
            source: std::io::Error::other("no space left on device"),
        })
    }
}

#[derive(Default)]
struct CountingCallback {
    documents_ok: AtomicUsize,
    documents_err: AtomicUsize,
    page_errors: AtomicUsize,
    chunks: AtomicUsize,
    completed: AtomicUsize,
}

impl PipelineProgressCallback for CountingCallback {
    fn on_document_complete(&self, _path: &Path, _pages: usize, _records: usize) {
        self.documents_ok.fetch_add(1, Ordering::SeqCst);
    }
    fn on_document_error(&self, _path: &Path, _error: &str) {
        self.documents_err.fetch_add(1, Ordering::SeqCst);
    }
    fn on_page_error(&self, _path: &Path, _page_num: usize, _error: &str) {
        self.page_errors.fetch_add(1, Ordering::SeqCst);
    }
    fn on_chunk_written(&self, _index: usize, _records: usize, _path: &Path) {
        self.chunks.fetch_add(1, Ordering::SeqCst);
    }
    fn on_run_complete(&self, _stats: &RunStats) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

struct Workspace {
    _root: TempDir,
    input: PathBuf,
    output: PathBuf,
}

impl Workspace {
    fn new() -> Self {
        let root = TempDir::new().unwrap();
        let input = root.path().join("pdfs");
        let output = root.path().join("dataset");
        std::fs::create_dir(&input).unwrap();
        Self {
            _root: root,
            input,
            output,
        }
    }

    fn add_pdf(&self, name: &str, pages: usize, bad_pages: &[usize]) {
        let mut body = format!("%PDF-1.7\n{name}\n{pages}\n");
        if !bad_pages.is_empty() {
            let list: Vec<String> = bad_pages.iter().map(|p| p.to_string()).collect();
            body.push_str(&list.join(","));
        }
        std::fs::write(self.input.join(format!("{name}.pdf")), body).unwrap();
    }

    fn add_raw(&self, file: &str, body: &[u8]) {
        std::fs::write(self.input.join(file), body).unwrap();
    }

    fn output_files(&self) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(&self.output)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }
}

/// Route library logs through the test harness; `RUST_LOG=debug` to see them.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn config() -> DatasetConfig {
    DatasetConfig::builder()
        .concurrency(3)
        .max_retries(1)
        .retry_backoff_base(2.0)
        .requests_per_second(1000.0)
        .poll_interval_ms(20)
        .build()
        .unwrap()
}

fn context(generator: Arc<FakeGenerator>, sink: Arc<dyn ChunkSink>) -> PipelineContext {
    PipelineContext::new(Arc::new(FakeExtractor), generator, sink)
}

/// `(id, query)` for every row of every chunk, chunk by chunk.
fn read_rows(path: &Path) -> Vec<(String, String)> {
    let reader = ParquetRecordBatchReaderBuilder::try_new(File::open(path).unwrap())
        .unwrap()
        .build()
        .unwrap();
    let mut rows = Vec::new();
    for batch in reader {
        let batch = batch.unwrap();
        let ids = batch
            .column(0)
            .as_any()
            .downcast_ref::<StringArray>()
            .unwrap();
        let queries = batch
            .column(1)
            .as_any()
            .downcast_ref::<StringArray>()
            .unwrap();
        for i in 0..batch.num_rows() {
            rows.push((ids.value(i).to_string(), queries.value(i).to_string()));
        }
    }
    rows
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn every_record_lands_in_exactly_one_chunk() {
    init_tracing();
    let ws = Workspace::new();
    ws.add_pdf("alpha", 3, &[]);
    ws.add_pdf("beta", 4, &[]);
    ws.add_pdf("gamma", 1, &[]);
    let config = DatasetConfig::builder()
        .batch_size(5)
        .concurrency(2)
        .requests_per_second(1000.0)
        .poll_interval_ms(20)
        .build()
        .unwrap();

    let ctx = context(Arc::default(), Arc::new(ParquetSink::new()));
    let stats = run_pipeline_with(&ctx, &ws.input, &ws.output, &config)
        .await
        .unwrap();

    // 8 pages × 4 variants = 32 records → ⌈32 / 5⌉ = 7 chunks.
    assert_eq!(stats.records_written, 32);
    assert_eq!(stats.documents_processed, 3);
    assert_eq!(stats.pages_total, 8);
    let sizes: Vec<usize> = stats.chunks.iter().map(|c| c.records).collect();
    assert_eq!(sizes, [5, 5, 5, 5, 5, 5, 2]);

    assert_eq!(
        ws.output_files(),
        (0..7)
            .map(|i| format!("train-{i:05}-of-n.parquet"))
            .collect::<Vec<_>>()
    );

    let rows: Vec<(String, String)> = stats.chunks.iter().flat_map(|c| read_rows(&c.path)).collect();
    assert_eq!(rows.len(), 32);
    let ids: HashSet<&str> = rows.iter().map(|(id, _)| id.as_str()).collect();
    assert_eq!(ids.len(), 32, "record ids must be unique");
    let queries: HashSet<&str> = rows.iter().map(|(_, q)| q.as_str()).collect();
    assert_eq!(queries.len(), 32, "no record may be written twice");
    assert!(queries.contains("beta:3 multimodal"));
}

#[tokio::test]
async fn records_of_a_document_keep_page_and_variant_order() {
    let ws = Workspace::new();
    ws.add_pdf("solo", 3, &[]);
    let sink = Arc::new(MemorySink::default());
    let ctx = context(Arc::default(), sink.clone());

    run_pipeline_with(&ctx, &ws.input, &ws.output, &config())
        .await
        .unwrap();

    let chunks = sink.chunks.lock().unwrap();
    assert_eq!(chunks.len(), 1);
    let expected: Vec<String> = (0..3)
        .flat_map(|p| {
            ["main", "secondary", "visual", "multimodal"]
                .into_iter()
                .map(move |v| format!("solo:{p} {v}"))
        })
        .collect();
    assert_eq!(chunks[0], expected);
}

#[tokio::test(start_paused = true)]
async fn failed_page_is_skipped_and_others_kept() {
    init_tracing();
    let ws = Workspace::new();
    ws.add_pdf("doc", 5, &[2]);
    let callback = Arc::new(CountingCallback::default());
    let config = DatasetConfig::builder()
        .max_retries(2)
        .requests_per_second(1000.0)
        .progress_callback(callback.clone())
        .build()
        .unwrap();
    let generator = Arc::new(FakeGenerator::default());
    let sink = Arc::new(MemorySink::default());
    let ctx = context(generator.clone(), sink.clone());

    let stats = run_pipeline_with(&ctx, &ws.input, &ws.output, &config)
        .await
        .unwrap();

    assert_eq!(stats.records_written, 16);
    assert_eq!(stats.pages_failed, 1);
    assert_eq!(callback.page_errors.load(Ordering::SeqCst), 1);
    // 4 good pages + 3 attempts on the bad one.
    assert_eq!(generator.calls.lock().unwrap().len(), 7);
    let written = sink.chunks.lock().unwrap();
    assert!(written.iter().flatten().all(|q| !q.starts_with("doc:2 ")));
}

#[tokio::test]
async fn broken_documents_are_skipped() {
    let ws = Workspace::new();
    ws.add_pdf("good", 2, &[]);
    ws.add_raw("corrupt.pdf", b"%PDF-1.7\nbroken\n");
    ws.add_raw("fake.pdf", b"<!DOCTYPE html>");
    ws.add_raw("notes.txt", b"%PDF-1.7\nignored\n9\n");
    let callback = Arc::new(CountingCallback::default());
    let config = DatasetConfig::builder()
        .requests_per_second(1000.0)
        .poll_interval_ms(20)
        .progress_callback(callback.clone())
        .build()
        .unwrap();
    let ctx = context(Arc::default(), Arc::new(MemorySink::default()));

    let stats = run_pipeline_with(&ctx, &ws.input, &ws.output, &config)
        .await
        .unwrap();

    assert_eq!(stats.documents_total, 3);
    assert_eq!(stats.documents_processed, 1);
    assert_eq!(stats.documents_failed, 2);
    assert_eq!(stats.records_written, 8);
    assert_eq!(callback.documents_ok.load(Ordering::SeqCst), 1);
    assert_eq!(callback.documents_err.load(Ordering::SeqCst), 2);
    assert_eq!(callback.completed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn empty_input_completes_without_chunks() {
    let ws = Workspace::new();
    let callback = Arc::new(CountingCallback::default());
    let config = DatasetConfig::builder()
        .poll_interval_ms(20)
        .progress_callback(callback.clone())
        .build()
        .unwrap();
    let ctx = context(Arc::default(), Arc::new(ParquetSink::new()));

    let stats = run_pipeline_with(&ctx, &ws.input, &ws.output, &config)
        .await
        .unwrap();

    assert_eq!(stats.documents_total, 0);
    assert!(stats.chunks.is_empty());
    assert!(ws.output.is_dir());
    assert!(ws.output_files().is_empty());
    assert_eq!(callback.chunks.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn zero_page_documents_produce_no_chunks() {
    let ws = Workspace::new();
    ws.add_pdf("blank", 0, &[]);
    let ctx = context(Arc::default(), Arc::new(ParquetSink::new()));

    let stats = run_pipeline_with(&ctx, &ws.input, &ws.output, &config())
        .await
        .unwrap();

    assert_eq!(stats.documents_processed, 1);
    assert!(stats.chunks.is_empty());
    assert!(ws.output_files().is_empty());
}

#[tokio::test]
async fn persistence_failure_is_fatal() {
    init_tracing();
    let ws = Workspace::new();
    for i in 0..6 {
        ws.add_pdf(&format!("doc{i}"), 3, &[]);
    }
    let config = DatasetConfig::builder()
        .batch_size(4)
        .queue_capacity(1)
        .requests_per_second(1000.0)
        .poll_interval_ms(20)
        .build()
        .unwrap();
    let ctx = context(Arc::default(), Arc::new(FailingSink));

    let err = run_pipeline_with(&ctx, &ws.input, &ws.output, &config)
        .await
        .unwrap_err();

    assert!(
        matches!(err, DatasetError::PersistFailed { index: 0, .. }),
        "got {err:?}"
    );
}

#[tokio::test]
async fn missing_input_directory_is_fatal() {
    let ws = Workspace::new();
    let ctx = context(Arc::default(), Arc::new(MemorySink::default()));
    let err = run_pipeline_with(&ctx, ws.input.join("nope"), &ws.output, &config())
        .await
        .unwrap_err();
    assert!(matches!(err, DatasetError::InputDirNotFound { .. }));
    assert!(!ws.output.exists());
}

#[tokio::test]
async fn zero_batch_size_is_rejected() {
    let ws = Workspace::new();
    ws.add_pdf("a", 2, &[]);
    let sink = Arc::new(MemorySink::default());
    let ctx = context(Arc::default(), sink.clone());
    let config = DatasetConfig {
        batch_size: 0,
        ..config()
    };

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        run_pipeline_with(&ctx, &ws.input, &ws.output, &config),
    )
    .await
    .expect("run returns");

    assert!(matches!(result, Err(DatasetError::InvalidConfig(_))));
    assert!(sink.chunks.lock().unwrap().is_empty());
}

#[tokio::test]
async fn finalized_names_carry_the_total() {
    let ws = Workspace::new();
    ws.add_pdf("a", 2, &[]);
    ws.add_pdf("b", 1, &[]);
    let config = DatasetConfig::builder()
        .batch_size(5)
        .split("test")
        .finalize_names(true)
        .requests_per_second(1000.0)
        .poll_interval_ms(20)
        .build()
        .unwrap();
    let ctx = context(Arc::default(), Arc::new(ParquetSink::new()));

    let stats = run_pipeline_with(&ctx, &ws.input, &ws.output, &config)
        .await
        .unwrap();

    assert_eq!(
        ws.output_files(),
        [
            "test-00000-of-00003.parquet",
            "test-00001-of-00003.parquet",
            "test-00002-of-00003.parquet"
        ]
    );
    assert!(stats.chunks.iter().all(|c| c.path.exists()));
    assert_eq!(read_rows(&stats.chunks[2].path).len(), 2);
}

#[tokio::test(start_paused = true)]
async fn request_rate_stays_under_the_cap() {
    const RPS: f64 = 5.0;
    const WINDOW: Duration = Duration::from_secs(5);

    let ws = Workspace::new();
    for i in 0..6 {
        ws.add_pdf(&format!("doc{i}"), 10, &[]);
    }
    let config = DatasetConfig::builder()
        .concurrency(6)
        .page_concurrency(4)
        .requests_per_second(RPS)
        .build()
        .unwrap();
    let generator = Arc::new(FakeGenerator::default());
    let ctx = context(generator.clone(), Arc::new(MemorySink::default()));

    let stats = run_pipeline_with(&ctx, &ws.input, &ws.output, &config)
        .await
        .unwrap();
    assert_eq!(stats.records_written, 240);

    let mut calls = generator.calls.lock().unwrap().clone();
    calls.sort();
    assert_eq!(calls.len(), 60);

    // Burst of RPS tokens plus RPS per second refill.
    let bound = (RPS * WINDOW.as_secs_f64() + RPS) as usize;
    for (i, start) in calls.iter().enumerate() {
        let in_window = calls[i..]
            .iter()
            .take_while(|t| t.duration_since(*start) < WINDOW)
            .count();
        assert!(
            in_window <= bound,
            "{in_window} calls in a {WINDOW:?} window (bound {bound})"
        );
    }

    let span = calls[59].duration_since(calls[0]);
    assert!(span >= Duration::from_secs(10), "60 calls at 5/s took {span:?}");
}
