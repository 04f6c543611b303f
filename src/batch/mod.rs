//! Batch aggregation
//!
//! Fans a list of invoices out through the pipeline concurrently, then folds
//! the exact per-invoice summaries into one report. One bad invoice never
//! takes the batch down with it.

use crate::collaborators::{extract_text_or_empty, FieldExtractor, TextExtractor};
use crate::models::{BasSummary, BatchReport, BatchSummary, InvoiceDocument, InvoiceResult};
use crate::pipeline::{InvoicePipeline, PipelineOutcome};
use crate::report::render_batch;
use futures::future::join_all;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Hex chars of the SHA-256 kept as an invoice fingerprint.
const FINGERPRINT_LEN: usize = 16;

/// A file as it arrives: optional name plus raw bytes.
#[derive(Debug, Clone)]
pub struct InvoiceFile {
    pub source: Option<String>,
    pub bytes: Vec<u8>,
}

impl InvoiceFile {
    pub fn new(source: Option<String>, bytes: Vec<u8>) -> Self {
        Self { source, bytes }
    }
}

pub struct BatchAggregator {
    pipeline: Arc<InvoicePipeline>,
    fields: Arc<dyn FieldExtractor>,
    text: Arc<dyn TextExtractor>,
}

impl BatchAggregator {
    pub fn new(
        pipeline: Arc<InvoicePipeline>,
        fields: Arc<dyn FieldExtractor>,
        text: Arc<dyn TextExtractor>,
    ) -> Self {
        Self {
            pipeline,
            fields,
            text,
        }
    }

    /// Process invoice texts. Results keep input order.
    pub async fn process(&self, documents: Vec<InvoiceDocument>) -> BatchReport {
        let start = Instant::now();
        let count = documents.len();
        info!(count, "Processing invoice batch");

        let outcomes = join_all(
            documents
                .iter()
                .map(|doc| self.pipeline.assess_text(&doc.text, self.fields.as_ref())),
        )
        .await;

        let report = fold_outcomes(documents, outcomes);

        info!(
            count,
            failed = report.per_invoice_results.iter().filter(|r| r.error.is_some()).count(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Batch complete"
        );
        report
    }

    /// Extract text from raw files first. Unreadable files become empty text
    /// and fail individually.
    pub async fn process_files(&self, files: Vec<InvoiceFile>) -> BatchReport {
        let texts = join_all(
            files
                .iter()
                .map(|file| extract_text_or_empty(self.text.as_ref(), &file.bytes)),
        )
        .await;

        let documents = files
            .into_iter()
            .zip(texts)
            .map(|(file, text)| InvoiceDocument::new(file.source, text))
            .collect();

        self.process(documents).await
    }
}

/// First [`FINGERPRINT_LEN`] hex chars of SHA-256 over the invoice text.
pub fn fingerprint(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    let mut hex = hex::encode(digest);
    hex.truncate(FINGERPRINT_LEN);
    hex
}

fn fold_outcomes(documents: Vec<InvoiceDocument>, outcomes: Vec<PipelineOutcome>) -> BatchReport {
    let invoice_count = documents.len();
    let mut total = BasSummary::zero();
    let mut results = Vec::with_capacity(invoice_count);

    for (index, (doc, outcome)) in documents.into_iter().zip(outcomes).enumerate() {
        let mut result = InvoiceResult {
            index,
            fingerprint: fingerprint(&doc.text),
            source: doc.source,
            classification: None,
            bas_summary: BasSummary::zero(),
            warnings: Vec::new(),
            error: None,
        };

        match outcome {
            PipelineOutcome::Done(report) => match total.checked_combine(&report.bas_summary) {
                Some(next) => {
                    total = next;
                    result.classification = Some(report.classification);
                    result.bas_summary = report.bas_summary.rounded();
                    result.warnings = report.invoice_data.validation.warnings;
                }
                None => {
                    warn!(index, "Invoice amounts out of range, excluded from batch total");
                    result.error = Some("GST total exceeds the representable range".to_string());
                }
            },
            PipelineOutcome::Failed(failure) => {
                debug!(index, stage = %failure.stage, "Batch item failed");
                result.error = Some(failure.error);
            }
        }

        results.push(result);
    }

    let failed = results.iter().filter(|r| r.error.is_some()).count();
    let aggregate_summary = BatchSummary {
        summary: total.rounded(),
        invoice_count,
    };

    BatchReport {
        response: render_batch(&aggregate_summary, failed),
        aggregate_summary,
        per_invoice_results: results,
    }
}
