//! Per-document work: extract pages, query each one, collect records.
//!
//! Failures are contained at the smallest unit that can absorb them. A page
//! whose call exhausts its retries contributes no records and the next page
//! proceeds; a document that cannot be read or rasterised is returned as an
//! [`ExtractionError`] for the pool to log and skip.

use crate::config::DatasetConfig;
use crate::error::ExtractionError;
use crate::pipeline::input::{self, SourceDocument};
use crate::pipeline::llm::{request_queries, QueryGenerator};
use crate::pipeline::rate_limit::RateLimiter;
use crate::pipeline::render::PageExtractor;
use crate::record::{DocumentResult, Page, Record};
use futures::stream::{self, StreamExt};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Turns one PDF into its [`DocumentResult`].
#[derive(Clone)]
pub struct DocumentProcessor {
    extractor: Arc<dyn PageExtractor>,
    generator: Arc<dyn QueryGenerator>,
    limiter: Arc<RateLimiter>,
    config: Arc<DatasetConfig>,
}

impl DocumentProcessor {
    pub fn new(
        extractor: Arc<dyn PageExtractor>,
        generator: Arc<dyn QueryGenerator>,
        limiter: Arc<RateLimiter>,
        config: Arc<DatasetConfig>,
    ) -> Self {
        Self {
            extractor,
            generator,
            limiter,
            config,
        }
    }

    /// Read `document` from disk and process it.
    pub async fn process(&self, document: &SourceDocument) -> Result<DocumentResult, ExtractionError> {
        let bytes = input::read_document(&document.path).await?;
        self.process_bytes(&document.path, bytes).await
    }

    /// Process an already-loaded document.
    ///
    /// Records come back in page order, four per successful page.
    pub async fn process_bytes(
        &self,
        source: &Path,
        bytes: Arc<[u8]>,
    ) -> Result<DocumentResult, ExtractionError> {
        let pages = self.extractor.extract_pages(bytes).await?;
        let total = pages.len();
        info!("Processing {} ({} pages)", source.display(), total);

        // `buffered` keeps completion order equal to page order.
        let outcomes: Vec<Option<Vec<Record>>> = stream::iter(pages.iter())
            .map(|page| self.process_page(source, page, total))
            .buffered(self.config.page_concurrency.max(1))
            .collect()
            .await;

        let pages_failed = outcomes.iter().filter(|o| o.is_none()).count();
        let records: Vec<Record> = outcomes.into_iter().flatten().flatten().collect();

        Ok(DocumentResult {
            source: source.to_path_buf(),
            records,
            pages_total: total,
            pages_failed,
        })
    }

    /// One page: `None` when its call exhausted every retry.
    async fn process_page(&self, source: &Path, page: &Page, total: usize) -> Option<Vec<Record>> {
        let page_num = page.index + 1;
        match request_queries(self.generator.as_ref(), &self.limiter, page, &self.config).await {
            Ok(queries) => {
                debug!(
                    "{}: page {}/{} → language {}",
                    source.display(),
                    page_num,
                    total,
                    queries.language
                );
                Some(Record::from_page(page, &queries))
            }
            Err(e) => {
                warn!(
                    "{}: skipping page {}/{}: {}",
                    source.display(),
                    page_num,
                    total,
                    e
                );
                if let Some(ref cb) = self.config.progress_callback {
                    cb.on_page_error(source, page_num, &e.to_string());
                }
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CallError;
    use crate::record::PageQueries;
    use async_trait::async_trait;
    use std::collections::HashSet;

    /// Yields `pages` pages whose image is the page index as a single byte.
    struct FakeExtractor {
        pages: usize,
    }

    #[async_trait]
    impl PageExtractor for FakeExtractor {
        async fn extract_pages(&self, _document: Arc<[u8]>) -> Result<Vec<Page>, ExtractionError> {
            Ok((0..self.pages)
                .map(|i| Page {
                    index: i,
                    image: Arc::from(vec![i as u8]),
                    text: format!("page {i}"),
                })
                .collect())
        }
    }

    struct BrokenExtractor;

    #[async_trait]
    impl PageExtractor for BrokenExtractor {
        async fn extract_pages(&self, _document: Arc<[u8]>) -> Result<Vec<Page>, ExtractionError> {
            Err(ExtractionError::CorruptPdf {
                detail: "xref table damaged".into(),
            })
        }
    }

    /// Echoes the page image byte into each query; always fails on `bad_pages`.
    struct EchoGenerator {
        bad_pages: HashSet<usize>,
    }

    #[async_trait]
    impl QueryGenerator for EchoGenerator {
        async fn generate(&self, page: &Page) -> Result<PageQueries, CallError> {
            if self.bad_pages.contains(&page.index) {
                return Err(CallError::Transient {
                    detail: "HTTP 500".into(),
                });
            }
            let tag = page.image[0];
            Ok(PageQueries {
                main_query: format!("main {tag}"),
                secondary_query: format!("secondary {tag}"),
                visual_query: format!("visual {tag}"),
                multimodal_query: format!("multimodal {tag}"),
                language: "en".into(),
            })
        }
    }

    fn processor(
        extractor: Arc<dyn PageExtractor>,
        bad_pages: &[usize],
        page_concurrency: usize,
    ) -> DocumentProcessor {
        let config = DatasetConfig::builder()
            .max_retries(2)
            .page_concurrency(page_concurrency)
            .requests_per_second(1000.0)
            .build()
            .unwrap();
        DocumentProcessor::new(
            extractor,
            Arc::new(EchoGenerator {
                bad_pages: bad_pages.iter().copied().collect(),
            }),
            Arc::new(RateLimiter::new(1000.0)),
            Arc::new(config),
        )
    }

    fn pdf() -> Arc<[u8]> {
        Arc::from(b"%PDF-1.7".to_vec())
    }

    #[tokio::test(start_paused = true)]
    async fn every_page_yields_four_records_with_its_image() {
        let p = processor(Arc::new(FakeExtractor { pages: 3 }), &[], 2);
        let result = p.process_bytes(Path::new("doc.pdf"), pdf()).await.unwrap();

        assert_eq!(result.records.len(), 12);
        assert_eq!(result.pages_total, 3);
        assert_eq!(result.pages_failed, 0);
        for (i, chunk) in result.records.chunks(4).enumerate() {
            let variants: Vec<&str> = chunk.iter().map(|r| r.query.as_str()).collect();
            assert_eq!(
                variants,
                [
                    format!("main {i}"),
                    format!("secondary {i}"),
                    format!("visual {i}"),
                    format!("multimodal {i}")
                ]
            );
            assert!(chunk.iter().all(|r| r.image[0] == i as u8));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn failed_page_is_skipped_others_kept() {
        let p = processor(Arc::new(FakeExtractor { pages: 4 }), &[1], 1);
        let result = p.process_bytes(Path::new("doc.pdf"), pdf()).await.unwrap();

        assert_eq!(result.records.len(), 12);
        assert_eq!(result.pages_failed, 1);
        let images: Vec<u8> = result.records.iter().step_by(4).map(|r| r.image[0]).collect();
        assert_eq!(images, [0, 2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn extraction_failure_is_reported() {
        let p = processor(Arc::new(BrokenExtractor), &[], 1);
        let err = p.process_bytes(Path::new("doc.pdf"), pdf()).await.unwrap_err();
        assert!(matches!(err, ExtractionError::CorruptPdf { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_page_document_is_empty_result() {
        let p = processor(Arc::new(FakeExtractor { pages: 0 }), &[], 1);
        let result = p.process_bytes(Path::new("empty.pdf"), pdf()).await.unwrap();
        assert!(result.records.is_empty());
        assert_eq!(result.pages_total, 0);
    }
}
