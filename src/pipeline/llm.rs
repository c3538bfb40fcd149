//! VLM interaction: ask a vision model for four queries about a page.
//!
//! [`QueryGenerator`] is the seam the pipeline depends on; the production
//! implementation, [`VlmQueryGenerator`], sends the page JPEG to an
//! `edgequake-llm` provider. Prompt wording lives in [`crate::prompts`] and
//! reply parsing in [`crate::pipeline::postprocess`], so this module only
//! deals with transport, retries and pacing.
//!
//! ## Retry Strategy
//!
//! Under sustained load providers answer 429/503 in bursts. Every attempt
//! (including retries) first takes a token from the shared
//! [`RateLimiter`], so retries cannot push the aggregate rate over the cap.
//! Between attempts the caller waits `retry_backoff_base ^ attempt` seconds:
//! 1 s → 2 s → 4 s … with the defaults.

use crate::config::DatasetConfig;
use crate::error::{CallError, DatasetError};
use crate::pipeline::encode;
use crate::pipeline::postprocess::parse_queries;
use crate::pipeline::rate_limit::RateLimiter;
use crate::prompts::{DEFAULT_SYSTEM_PROMPT, USER_INSTRUCTION};
use crate::record::{Page, PageQueries};
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, warn};

/// Produces the query variants and language code for one page.
///
/// Implementations perform a single attempt; retrying and rate limiting are
/// handled by [`request_queries`].
#[async_trait]
pub trait QueryGenerator: Send + Sync {
    async fn generate(&self, page: &Page) -> Result<PageQueries, CallError>;
}

/// [`QueryGenerator`] backed by a round-robin pool of VLM provider handles.
pub struct VlmQueryGenerator {
    clients: Vec<Arc<dyn LLMProvider>>,
    next: AtomicUsize,
    system_prompt: String,
    options: CompletionOptions,
    call_timeout: Duration,
}

impl VlmQueryGenerator {
    /// Build a generator from an explicit set of provider handles.
    pub fn new(clients: Vec<Arc<dyn LLMProvider>>, config: &DatasetConfig) -> Result<Self, DatasetError> {
        if clients.is_empty() {
            return Err(DatasetError::InvalidConfig(
                "Query generator needs at least one provider".into(),
            ));
        }
        Ok(Self {
            clients,
            next: AtomicUsize::new(0),
            system_prompt: config
                .system_prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            options: build_options(config),
            call_timeout: Duration::from_secs(config.api_timeout_secs.max(1)),
        })
    }

    /// Resolve the provider from `config` and fill a pool of
    /// `client_pool_size` handles.
    ///
    /// A pre-built `config.provider` is shared by every slot. Named or
    /// auto-detected providers get one independently constructed handle per
    /// slot, each with its own connection pool.
    pub fn from_config(config: &DatasetConfig) -> Result<Self, DatasetError> {
        let size = config.client_pool_size.max(1);
        let clients = if let Some(ref provider) = config.provider {
            vec![Arc::clone(provider); size]
        } else {
            (0..size)
                .map(|_| resolve_provider(config))
                .collect::<Result<Vec<_>, _>>()?
        };
        Self::new(clients, config)
    }

    pub fn pool_size(&self) -> usize {
        self.clients.len()
    }

    /// Next handle in round-robin order.
    fn client(&self) -> &Arc<dyn LLMProvider> {
        let i = self.next.fetch_add(1, Ordering::Relaxed) % self.clients.len();
        &self.clients[i]
    }
}

#[async_trait]
impl QueryGenerator for VlmQueryGenerator {
    async fn generate(&self, page: &Page) -> Result<PageQueries, CallError> {
        let messages = vec![
            ChatMessage::system(self.system_prompt.as_str()),
            ChatMessage::user_with_images(USER_INSTRUCTION, vec![encode::to_image_data(&page.image)]),
        ];

        let start = Instant::now();
        let response = timeout(self.call_timeout, self.client().chat(&messages, Some(&self.options)))
            .await
            .map_err(|_| CallError::Transient {
                detail: format!("timed out after {}s", self.call_timeout.as_secs()),
            })?
            .map_err(|e| CallError::Transient {
                detail: e.to_string(),
            })?;

        debug!(
            "Page {}: {} input tokens, {} output tokens, {:?}",
            page.index + 1,
            response.prompt_tokens,
            response.completion_tokens,
            start.elapsed()
        );

        parse_queries(&response.content)
    }
}

/// Run one page's call with rate limiting and exponential-backoff retries.
///
/// Every failure is treated as transient until `config.max_retries` retries
/// are spent; the last error is then returned as [`CallError::Exhausted`].
pub async fn request_queries(
    generator: &dyn QueryGenerator,
    limiter: &RateLimiter,
    page: &Page,
    config: &DatasetConfig,
) -> Result<PageQueries, CallError> {
    let mut last_err = String::new();

    for attempt in 0..=config.max_retries {
        limiter.acquire().await;

        match generator.generate(page).await {
            Ok(queries) => {
                limiter.record_success();
                return Ok(queries);
            }
            Err(e) => {
                last_err = e.to_string();
                if attempt < config.max_retries {
                    let backoff = config.retry_delay(attempt);
                    warn!(
                        "Page {}: retry {}/{} in {:?}: {}",
                        page.index + 1,
                        attempt + 1,
                        config.max_retries,
                        backoff,
                        last_err
                    );
                    sleep(backoff).await;
                }
            }
        }
    }

    Err(CallError::Exhausted {
        attempts: config.max_retries + 1,
        last_error: last_err,
    })
}

/// Build `CompletionOptions` from the run config.
fn build_options(config: &DatasetConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(config.temperature),
        max_tokens: Some(config.max_tokens),
        ..Default::default()
    }
}

/// Instantiate a named provider with the given model.
fn create_vision_provider(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, DatasetError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        DatasetError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve one provider handle, from most-specific to least-specific:
///
/// 1. **Named provider** (`config.provider_name`) with `config.model`.
/// 2. **Environment pair** (`EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`).
/// 3. **Full auto-detection** (`ProviderFactory::from_env`), which scans the
///    known API key variables.
fn resolve_provider(config: &DatasetConfig) -> Result<Arc<dyn LLMProvider>, DatasetError> {
    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
        return create_vision_provider(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_vision_provider(&prov, &model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| DatasetError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set GEMINI_API_KEY, OPENAI_API_KEY, or pass --provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}

/// Cheap, fast vision model used when only a provider name is given.
const DEFAULT_MODEL: &str = "gemini-2.0-flash-lite";

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    struct FlakyGenerator {
        failures_before_success: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl QueryGenerator for FlakyGenerator {
        async fn generate(&self, _page: &Page) -> Result<PageQueries, CallError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures_before_success {
                Err(CallError::Transient {
                    detail: format!("HTTP 503 #{n}"),
                })
            } else {
                Ok(PageQueries {
                    main_query: "m".into(),
                    secondary_query: "s".into(),
                    visual_query: "v".into(),
                    multimodal_query: "mm".into(),
                    language: "en".into(),
                })
            }
        }
    }

    fn page() -> Page {
        Page {
            index: 0,
            image: Arc::from(vec![0xFFu8, 0xD8]),
            text: String::new(),
        }
    }

    fn config(max_retries: u32) -> DatasetConfig {
        DatasetConfig::builder()
            .max_retries(max_retries)
            .requests_per_second(1000.0)
            .build()
            .unwrap()
    }

    #[test]
    fn build_options_defaults() {
        let opts = build_options(&DatasetConfig::default());
        assert_eq!(opts.temperature, Some(0.2));
        assert_eq!(opts.max_tokens, Some(1024));
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failures_with_backoff() {
        let generator = FlakyGenerator {
            failures_before_success: 2,
            calls: AtomicU32::new(0),
        };
        let limiter = RateLimiter::new(1000.0);
        let start = tokio::time::Instant::now();

        let queries = request_queries(&generator, &limiter, &page(), &config(3))
            .await
            .expect("third attempt succeeds");

        assert_eq!(queries.language, "en");
        assert_eq!(generator.calls.load(Ordering::SeqCst), 3);
        // 2^0 + 2^1 seconds of backoff.
        assert!(start.elapsed() >= Duration::from_secs(3));
        assert!(start.elapsed() < Duration::from_millis(3100));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_after_max_retries() {
        let generator = FlakyGenerator {
            failures_before_success: u32::MAX,
            calls: AtomicU32::new(0),
        };
        let limiter = RateLimiter::new(1000.0);

        let err = request_queries(&generator, &limiter, &page(), &config(2))
            .await
            .unwrap_err();

        assert_eq!(generator.calls.load(Ordering::SeqCst), 3);
        match err {
            CallError::Exhausted {
                attempts,
                last_error,
            } => {
                assert_eq!(attempts, 3);
                assert!(last_error.contains("#2"), "got: {last_error}");
            }
            other => panic!("expected Exhausted, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn zero_retries_means_single_attempt() {
        let generator = FlakyGenerator {
            failures_before_success: 1,
            calls: AtomicU32::new(0),
        };
        let limiter = RateLimiter::new(1000.0);
        assert!(request_queries(&generator, &limiter, &page(), &config(0))
            .await
            .is_err());
        assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn successful_call_is_recorded() {
        let generator = FlakyGenerator {
            failures_before_success: 0,
            calls: AtomicU32::new(0),
        };
        let limiter = RateLimiter::new(1000.0);
        tokio::time::sleep(Duration::from_secs(1)).await;
        request_queries(&generator, &limiter, &page(), &config(0))
            .await
            .unwrap();
        assert!(limiter.observed_rps() > 0.0);
    }
}
