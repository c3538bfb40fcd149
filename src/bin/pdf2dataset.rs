//! CLI binary for edgequake-pdf2dataset.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `DatasetConfig` and prints the run summary.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_pdf2dataset::{
    run_pipeline, DatasetConfig, PipelineProgressCallback, ProgressCallback, RunStats,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress: one bar over documents, one log line per document and
/// per written chunk. Documents finish out of order.
struct CliProgressCallback {
    bar: ProgressBar,
    page_errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(TICKS),
        );
        bar.set_prefix("Preparing");
        bar.set_message("Scanning input…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            page_errors: AtomicUsize::new(0),
        })
    }

    fn file_name(path: &Path) -> String {
        path.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string())
    }
}

impl PipelineProgressCallback for CliProgressCallback {
    fn on_run_start(&self, total_documents: usize) {
        self.bar.set_length(total_documents as u64);
        self.bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.cyan} {prefix:.bold}  \
                 [{bar:42.green/238}] {pos:>3}/{len} PDFs  \
                 ⏱ {elapsed_precise}  ETA {eta_precise}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▉▊▋▌▍▎▏  ")
            .tick_strings(TICKS),
        );
        self.bar.set_prefix("Processing");
        self.bar.reset_eta();
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Building dataset from {total_documents} PDFs…"))
        ));
    }

    fn on_document_start(&self, path: &Path) {
        self.bar.set_message(Self::file_name(path));
    }

    fn on_document_complete(&self, path: &Path, pages: usize, records: usize) {
        self.bar.println(format!(
            "  {} {:<40}  {}",
            green("✓"),
            Self::file_name(path),
            dim(&format!("{pages:>4} pages  {records:>5} records")),
        ));
        self.bar.inc(1);
    }

    fn on_document_error(&self, path: &Path, error: &str) {
        // Truncate very long error messages to keep output tidy.
        let msg: String = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} {:<40}  {}",
            red("✗"),
            Self::file_name(path),
            red(&msg),
        ));
        self.bar.inc(1);
    }

    fn on_page_error(&self, _path: &Path, _page_num: usize, _error: &str) {
        self.page_errors.fetch_add(1, Ordering::Relaxed);
    }

    fn on_chunk_written(&self, index: usize, records: usize, path: &Path) {
        self.bar.println(format!(
            "  {} chunk {:>5}  {}  {}",
            cyan("▣"),
            index,
            dim(&format!("{records:>5} rows")),
            dim(&Self::file_name(path)),
        ));
    }

    fn on_run_complete(&self, stats: &RunStats) {
        self.bar.finish_and_clear();
        let page_errors = self.page_errors.load(Ordering::Relaxed);
        if stats.documents_failed == 0 && page_errors == 0 {
            eprintln!(
                "{} {} PDFs processed successfully",
                green("✔"),
                bold(&stats.documents_processed.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} PDFs processed  ({} skipped, {} pages failed)",
                cyan("⚠"),
                bold(&stats.documents_processed.to_string()),
                stats.documents_total,
                red(&stats.documents_failed.to_string()),
                red(&page_errors.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Basic run: every PDF in ./pdfs → Parquet chunks in ./dataset
  pdf2dataset pdfs/ dataset/

  # Smaller chunks, slower request rate
  pdf2dataset --batch-size 500 --rps 10 pdfs/ dataset/

  # Use a specific provider and model
  pdf2dataset --provider gemini --model gemini-2.0-flash pdfs/ dataset/

  # Hub-style shard names (train-00000-of-00012.parquet) after the run
  pdf2dataset --finalize-names pdfs/ dataset/

  # Machine-readable run statistics
  pdf2dataset --json pdfs/ dataset/ > stats.json

OUTPUT:
  Each page yields four rows (main, secondary, visual and multimodal query),
  all sharing the page's JPEG image and language code:

    id        utf8    random UUID
    query     utf8
    image     binary  JPEG bytes
    language  utf8    ISO 639-1, e.g. "fr"

  Chunks hold exactly --batch-size rows except the last one.

ENVIRONMENT VARIABLES:
  GEMINI_API_KEY          Google Gemini API key
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  PDFIUM_LIB_PATH         Path to libpdfium (default: system library)
  RUST_LOG                Log filter, overrides --verbose / --quiet
"#;

/// Build a multilingual visual-retrieval dataset from a folder of PDFs.
#[derive(Parser, Debug)]
#[command(
    name = "pdf2dataset",
    version,
    about = "Build a multilingual query/image dataset from a folder of PDFs using Vision LLMs",
    long_about = "Rasterise every page of every PDF in INPUT_DIR, ask a Vision Language Model \
for four search queries each page answers plus its language, and write the rows as \
fixed-size Parquet chunks into OUTPUT_DIR. Supports OpenAI, Anthropic, Google Gemini and \
any OpenAI-compatible endpoint (Ollama, vLLM, LiteLLM, etc.).",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Directory containing the PDFs (not searched recursively).
    input_dir: PathBuf,

    /// Directory receiving the Parquet chunks; created if missing.
    output_dir: PathBuf,

    /// Records per output chunk.
    #[arg(short, long, env = "PDF2DATASET_BATCH_SIZE", default_value_t = 1420)]
    batch_size: usize,

    /// Documents processed concurrently. Default: min(8, 2 × CPUs).
    #[arg(short, long, env = "PDF2DATASET_CONCURRENCY")]
    concurrency: Option<usize>,

    /// Pages of one document queried concurrently.
    #[arg(long, env = "PDF2DATASET_PAGE_CONCURRENCY", default_value_t = 1)]
    page_concurrency: usize,

    /// Global cap on VLM requests per second, retries included.
    #[arg(long = "rps", env = "PDF2DATASET_RPS", default_value_t = 40.0)]
    requests_per_second: f64,

    /// Provider handles in the round-robin client pool.
    #[arg(long, env = "PDF2DATASET_CLIENTS", default_value_t = 40)]
    clients: usize,

    /// Retries per page after the first attempt.
    #[arg(long, env = "PDF2DATASET_MAX_RETRIES", default_value_t = 10)]
    max_retries: u32,

    /// Exponential backoff base in seconds (wait = base ^ attempt).
    #[arg(long, env = "PDF2DATASET_RETRY_BACKOFF", default_value_t = 2.0)]
    retry_backoff: f64,

    /// Hand-off queue capacity, in documents.
    #[arg(long, env = "PDF2DATASET_QUEUE_CAPACITY", default_value_t = 10)]
    queue_capacity: usize,

    /// Split name used as the chunk file prefix.
    #[arg(long, env = "PDF2DATASET_SPLIT", default_value = "train")]
    split: String,

    /// Page render scale (1.0 = 72 DPI).
    #[arg(long, env = "PDF2DATASET_ZOOM", default_value_t = 1.5)]
    zoom: f32,

    /// Cap on the rendered page's longest side, in pixels.
    #[arg(long, env = "PDF2DATASET_MAX_PIXELS", default_value_t = 2000)]
    max_pixels: u32,

    /// JPEG quality (1–100).
    #[arg(long, env = "PDF2DATASET_JPEG_QUALITY", default_value_t = 90,
          value_parser = clap::value_parser!(u8).range(1..=100))]
    jpeg_quality: u8,

    /// LLM model ID (e.g. gemini-2.0-flash-lite, gpt-4.1-nano).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(
        long,
        env = "EDGEQUAKE_PROVIDER",
        long_help = "LLM provider. Auto-detected from API key env vars if not set.\n\
          Supported: openai, anthropic, gemini, azure, ollama, or any OpenAI-compatible URL."
    )]
    provider: Option<String>,

    /// Path to a text file containing a custom system prompt.
    #[arg(long, env = "PDF2DATASET_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "PDF2DATASET_TEMPERATURE", default_value_t = 0.2)]
    temperature: f32,

    /// Max LLM output tokens per page.
    #[arg(long, env = "PDF2DATASET_MAX_TOKENS", default_value_t = 1024)]
    max_tokens: usize,

    /// Per-call LLM timeout in seconds.
    #[arg(long, env = "PDF2DATASET_API_TIMEOUT", default_value_t = 60)]
    api_timeout: u64,

    /// Rename chunks to `{split}-NNNNN-of-TOTAL.parquet` after the run.
    #[arg(long, env = "PDF2DATASET_FINALIZE_NAMES")]
    finalize_names: bool,

    /// Print run statistics as JSON on stdout.
    #[arg(long, env = "PDF2DATASET_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "PDF2DATASET_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PDF2DATASET_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "PDF2DATASET_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO-level library logs.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Build config ─────────────────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn PipelineProgressCallback>)
    } else {
        None
    };

    let config = build_config(&cli, progress_cb).await?;

    // ── Run ──────────────────────────────────────────────────────────────
    let stats = run_pipeline(&cli.input_dir, &cli.output_dir, &config)
        .await
        .context("Dataset build failed")?;

    if cli.json {
        let json = serde_json::to_string_pretty(&stats).context("Failed to serialise stats")?;
        println!("{json}");
    }

    if !cli.quiet {
        eprintln!(
            "{}  {} records  {} chunks  {}/{} pages  {}ms  →  {}",
            if stats.pages_failed == 0 && stats.documents_failed == 0 {
                green("✔")
            } else {
                cyan("⚠")
            },
            stats.records_written,
            stats.chunks.len(),
            stats.pages_total - stats.pages_failed,
            stats.pages_total,
            stats.total_duration_ms,
            bold(&cli.output_dir.display().to_string()),
        );
        eprintln!(
            "   {}",
            dim(&format!("{:.1} req/s observed", stats.observed_rps))
        );
    }

    Ok(())
}

/// Map CLI args to `DatasetConfig`.
async fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<DatasetConfig> {
    let mut builder = DatasetConfig::builder()
        .batch_size(cli.batch_size)
        .page_concurrency(cli.page_concurrency)
        .requests_per_second(cli.requests_per_second)
        .client_pool_size(cli.clients)
        .max_retries(cli.max_retries)
        .retry_backoff_base(cli.retry_backoff)
        .queue_capacity(cli.queue_capacity)
        .split(cli.split.clone())
        .zoom(cli.zoom)
        .max_rendered_pixels(cli.max_pixels)
        .jpeg_quality(cli.jpeg_quality)
        .temperature(cli.temperature)
        .max_tokens(cli.max_tokens)
        .api_timeout_secs(cli.api_timeout)
        .finalize_names(cli.finalize_names);

    if let Some(n) = cli.concurrency {
        builder = builder.concurrency(n);
    }
    if let Some(ref model) = cli.model {
        builder = builder.model(model.clone());
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider.clone());
    }
    if let Some(ref path) = cli.system_prompt {
        let prompt = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read system prompt from {:?}", path))?;
        builder = builder.system_prompt(prompt);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
