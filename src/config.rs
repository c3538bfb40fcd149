//! Configuration types for a dataset-building run.
//!
//! Every knob of the pipeline lives in [`DatasetConfig`], built via its
//! [`DatasetConfigBuilder`]. One struct is easy to clone into producer tasks,
//! print at startup, and diff between two runs.

use crate::error::DatasetError;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Configuration for a PDF-to-dataset run.
///
/// Built via [`DatasetConfig::builder()`] or using [`DatasetConfig::default()`].
///
/// # Example
/// ```rust
/// use edgequake_pdf2dataset::DatasetConfig;
///
/// let config = DatasetConfig::builder()
///     .batch_size(500)
///     .requests_per_second(20.0)
///     .model("gemini-2.0-flash-lite")
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct DatasetConfig {
    /// Documents processed concurrently. Default: `min(8, 2 × CPUs)`.
    ///
    /// This bounds open documents (and their rendered pages in memory), not
    /// the request rate; the rate is [`requests_per_second`](Self::requests_per_second).
    pub concurrency: usize,

    /// Query-generation calls in flight per document. Default: 1.
    ///
    /// Records keep page order regardless of this value.
    pub page_concurrency: usize,

    /// Token-bucket capacity shared by every call. Default: 40.0.
    ///
    /// Also the burst size: after an idle period up to this many calls are
    /// admitted at once.
    pub requests_per_second: f64,

    /// Number of provider handles used round-robin. Default: 40.
    pub client_pool_size: usize,

    /// Retries per page after the first failed attempt. Default: 10.
    pub max_retries: u32,

    /// Exponential backoff base in seconds: attempt `n` waits `base^n`. Default: 2.0.
    ///
    /// With the defaults the waits are 1 s, 2 s, 4 s … 512 s, which rides out
    /// multi-minute provider outages without dropping pages.
    pub retry_backoff_base: f64,

    /// Records per output chunk. Default: 1420.
    pub batch_size: usize,

    /// Document results buffered between producers and the writer. Default: 10.
    pub queue_capacity: usize,

    /// How long the writer waits for a result before checking for shutdown. Default: 1000 ms.
    pub poll_interval_ms: u64,

    /// Chunk file prefix, usually `train` or `test`. Default: `train`.
    pub split: String,

    /// Page rasterisation scale (1.0 = 72 DPI). Range 0.25–8. Default: 1.5.
    pub zoom: f32,

    /// Cap on the longest rendered edge in pixels. Default: 2000.
    pub max_rendered_pixels: u32,

    /// JPEG quality for page images, 1–100. Default: 90.
    pub jpeg_quality: u8,

    /// LLM model identifier. If None, uses the provider default.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "gemini", "openrouter").
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature. Default: 0.2.
    pub temperature: f32,

    /// Maximum tokens the model may generate per page. Default: 1024.
    pub max_tokens: usize,

    /// Per-call timeout in seconds; a timeout counts as a failed attempt. Default: 60.
    pub api_timeout_secs: u64,

    /// Custom system prompt. If None, uses the built-in default.
    pub system_prompt: Option<String>,

    /// Rename chunks to `{split}-{index}-of-{total}.parquet` after the run. Default: false.
    pub finalize_names: bool,

    /// Optional progress event sink.
    pub progress_callback: Option<ProgressCallback>,
}

/// `min(8, 2 × available_parallelism)`.
fn default_concurrency() -> usize {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    (cpus * 2).min(8)
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            page_concurrency: 1,
            requests_per_second: 40.0,
            client_pool_size: 40,
            max_retries: 10,
            retry_backoff_base: 2.0,
            batch_size: 1420,
            queue_capacity: 10,
            poll_interval_ms: 1000,
            split: "train".to_string(),
            zoom: 1.5,
            max_rendered_pixels: 2000,
            jpeg_quality: 90,
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.2,
            max_tokens: 1024,
            api_timeout_secs: 60,
            system_prompt: None,
            finalize_names: false,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for DatasetConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatasetConfig")
            .field("concurrency", &self.concurrency)
            .field("page_concurrency", &self.page_concurrency)
            .field("requests_per_second", &self.requests_per_second)
            .field("client_pool_size", &self.client_pool_size)
            .field("max_retries", &self.max_retries)
            .field("retry_backoff_base", &self.retry_backoff_base)
            .field("batch_size", &self.batch_size)
            .field("queue_capacity", &self.queue_capacity)
            .field("split", &self.split)
            .field("zoom", &self.zoom)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("finalize_names", &self.finalize_names)
            .finish()
    }
}

impl DatasetConfig {
    /// Create a new builder for `DatasetConfig`.
    pub fn builder() -> DatasetConfigBuilder {
        DatasetConfigBuilder {
            config: Self::default(),
        }
    }

    /// Backoff before retry number `attempt + 1`.
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let exp = i32::try_from(attempt).unwrap_or(i32::MAX);
        Duration::try_from_secs_f64(self.retry_backoff_base.powi(exp)).unwrap_or(Duration::MAX)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Check the constraints [`DatasetConfigBuilder::build`] enforces.
    ///
    /// Run entry points call this on every config they receive.
    pub fn validate(&self) -> Result<(), DatasetError> {
        let c = self;
        if c.batch_size == 0 {
            return Err(DatasetError::InvalidConfig(
                "Batch size must be ≥ 1".into(),
            ));
        }
        if c.queue_capacity == 0 {
            return Err(DatasetError::InvalidConfig(
                "Queue capacity must be ≥ 1".into(),
            ));
        }
        if !(c.requests_per_second.is_finite() && c.requests_per_second > 0.0) {
            return Err(DatasetError::InvalidConfig(format!(
                "Requests per second must be > 0, got {}",
                c.requests_per_second
            )));
        }
        if !(c.retry_backoff_base.is_finite() && c.retry_backoff_base >= 0.0) {
            return Err(DatasetError::InvalidConfig(format!(
                "Retry backoff base must be ≥ 0, got {}",
                c.retry_backoff_base
            )));
        }
        if !(0.25..=8.0).contains(&c.zoom) {
            return Err(DatasetError::InvalidConfig(format!(
                "Zoom must be 0.25–8, got {}",
                c.zoom
            )));
        }
        if c.split.is_empty() || c.split.contains(['/', '\\']) {
            return Err(DatasetError::InvalidConfig(format!(
                "Split name must be a plain file prefix, got {:?}",
                c.split
            )));
        }
        if c.concurrency == 0 || c.page_concurrency == 0 || c.client_pool_size == 0 {
            return Err(DatasetError::InvalidConfig(
                "Concurrency and client pool size must be ≥ 1".into(),
            ));
        }
        if c.poll_interval_ms == 0 {
            return Err(DatasetError::InvalidConfig(
                "Poll interval must be ≥ 1 ms".into(),
            ));
        }
        if i32::try_from(c.max_rendered_pixels).is_err() {
            return Err(DatasetError::InvalidConfig(format!(
                "Max rendered pixels must be ≤ {}, got {}",
                i32::MAX,
                c.max_rendered_pixels
            )));
        }
        Ok(())
    }
}

/// Builder for [`DatasetConfig`].
#[derive(Debug)]
pub struct DatasetConfigBuilder {
    config: DatasetConfig,
}

impl DatasetConfigBuilder {
    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn page_concurrency(mut self, n: usize) -> Self {
        self.config.page_concurrency = n.max(1);
        self
    }

    pub fn requests_per_second(mut self, rps: f64) -> Self {
        self.config.requests_per_second = rps;
        self
    }

    pub fn client_pool_size(mut self, n: usize) -> Self {
        self.config.client_pool_size = n.max(1);
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_base(mut self, base: f64) -> Self {
        self.config.retry_backoff_base = base;
        self
    }

    pub fn batch_size(mut self, n: usize) -> Self {
        self.config.batch_size = n;
        self
    }

    pub fn queue_capacity(mut self, n: usize) -> Self {
        self.config.queue_capacity = n;
        self
    }

    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.poll_interval_ms = ms.max(1);
        self
    }

    pub fn split(mut self, split: impl Into<String>) -> Self {
        self.config.split = split.into();
        self
    }

    pub fn zoom(mut self, zoom: f32) -> Self {
        self.config.zoom = zoom;
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.clamp(100, i32::MAX as u32);
        self
    }

    pub fn jpeg_quality(mut self, q: u8) -> Self {
        self.config.jpeg_quality = q.clamp(1, 100);
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn finalize_names(mut self, v: bool) -> Self {
        self.config.finalize_names = v;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<DatasetConfig, DatasetError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = DatasetConfig::builder().build().expect("defaults build");
        assert_eq!(config.batch_size, 1420);
        assert_eq!(config.max_retries, 10);
        assert!(config.concurrency >= 1 && config.concurrency <= 8);
    }

    #[test]
    fn zero_batch_size_rejected() {
        let err = DatasetConfig::builder().batch_size(0).build().unwrap_err();
        assert!(matches!(err, DatasetError::InvalidConfig(_)));
    }

    #[test]
    fn non_positive_rate_rejected() {
        assert!(DatasetConfig::builder()
            .requests_per_second(0.0)
            .build()
            .is_err());
        assert!(DatasetConfig::builder()
            .requests_per_second(f64::NAN)
            .build()
            .is_err());
    }

    #[test]
    fn struct_literal_is_validated() {
        let config = DatasetConfig {
            batch_size: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(DatasetError::InvalidConfig(_))
        ));
        let config = DatasetConfig {
            concurrency: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
        assert!(DatasetConfig::default().validate().is_ok());
    }

    #[test]
    fn max_rendered_pixels_fits_pdfium() {
        let config = DatasetConfig::builder()
            .max_rendered_pixels(u32::MAX)
            .build()
            .unwrap();
        assert_eq!(config.max_rendered_pixels, i32::MAX as u32);
        let config = DatasetConfig {
            max_rendered_pixels: u32::MAX,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn split_with_separator_rejected() {
        assert!(DatasetConfig::builder().split("a/b").build().is_err());
    }

    #[test]
    fn retry_delay_is_exponential() {
        let config = DatasetConfig::default();
        assert_eq!(config.retry_delay(0), Duration::from_secs(1));
        assert_eq!(config.retry_delay(1), Duration::from_secs(2));
        assert_eq!(config.retry_delay(3), Duration::from_secs(8));
    }

    #[test]
    fn retry_delay_saturates() {
        let config = DatasetConfig::builder()
            .retry_backoff_base(1e300)
            .build()
            .unwrap();
        assert_eq!(config.retry_delay(5), Duration::MAX);
    }
}
