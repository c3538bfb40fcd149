//! Producer pool: process documents with bounded concurrency and hand each
//! document's records to the writer.
//!
//! At most `config.concurrency` documents are in flight. A document whose
//! extraction fails is logged, reported through the progress callback and
//! skipped; it never reaches the queue. The only fatal condition is a closed
//! queue, which means the writer has already stopped on an error of its own.

use crate::config::DatasetConfig;
use crate::error::{DatasetError, ExtractionError};
use crate::pipeline::document::DocumentProcessor;
use crate::pipeline::input::SourceDocument;
use crate::pipeline::queue::HandoffSender;
use crate::record::{DocumentResult, Record};
use futures::stream::{self, StreamExt};
use tracing::{info, warn};

/// Document and page tallies for one pool run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProducerReport {
    pub documents_processed: usize,
    pub documents_failed: usize,
    pub pages_total: usize,
    pub pages_failed: usize,
    /// Records pushed to the queue.
    pub records: usize,
}

/// Run every document through `processor`, pushing each result onto `sender`.
///
/// Returns once every document has been attempted. The sender is left open;
/// raising the finished signal is the caller's job.
pub async fn run_producers(
    documents: Vec<SourceDocument>,
    processor: &DocumentProcessor,
    sender: &HandoffSender<Vec<Record>>,
    config: &DatasetConfig,
) -> Result<ProducerReport, DatasetError> {
    let concurrency = config.concurrency.max(1);
    info!(
        "Processing {} documents with {} producers",
        documents.len(),
        concurrency
    );

    let mut outcomes = stream::iter(documents)
        .map(|doc| produce_one(doc, processor, sender, config))
        .buffer_unordered(concurrency);

    let mut report = ProducerReport::default();
    while let Some(outcome) = outcomes.next().await {
        match outcome? {
            DocumentOutcome::Processed(summary) => {
                report.documents_processed += 1;
                report.pages_total += summary.pages_total;
                report.pages_failed += summary.pages_failed;
                report.records += summary.records;
            }
            DocumentOutcome::Skipped => report.documents_failed += 1,
        }
    }

    Ok(report)
}

struct DocumentSummary {
    pages_total: usize,
    pages_failed: usize,
    records: usize,
}

enum DocumentOutcome {
    Processed(DocumentSummary),
    Skipped,
}

async fn produce_one(
    doc: SourceDocument,
    processor: &DocumentProcessor,
    sender: &HandoffSender<Vec<Record>>,
    config: &DatasetConfig,
) -> Result<DocumentOutcome, DatasetError> {
    if let Some(ref cb) = config.progress_callback {
        cb.on_document_start(&doc.path);
    }

    match processor.process(&doc).await {
        Ok(result) => {
            let DocumentResult {
                source,
                records,
                pages_total,
                pages_failed,
            } = result;
            let summary = DocumentSummary {
                pages_total,
                pages_failed,
                records: records.len(),
            };
            sender.put(records).await?;
            info!(
                "{}: {} records from {}/{} pages",
                source.display(),
                summary.records,
                pages_total - pages_failed,
                pages_total
            );
            if let Some(ref cb) = config.progress_callback {
                cb.on_document_complete(&source, pages_total, summary.records);
            }
            Ok(DocumentOutcome::Processed(summary))
        }
        Err(e) => {
            report_skipped(&doc, &e, config);
            Ok(DocumentOutcome::Skipped)
        }
    }
}

fn report_skipped(doc: &SourceDocument, error: &ExtractionError, config: &DatasetConfig) {
    warn!("Skipping {}: {}", doc.path.display(), error);
    if let Some(ref cb) = config.progress_callback {
        cb.on_document_error(&doc.path, &error.to_string());
    }
}
