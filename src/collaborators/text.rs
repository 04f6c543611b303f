//! Document text extraction

use crate::collaborators::TextExtractor;
use crate::error::BasError;
use crate::Result;
use tracing::{debug, warn};

const PDF_MAGIC: &[u8] = b"%PDF";

/// Treats the document as text, replacing invalid UTF-8.
#[derive(Debug, Clone, Default)]
pub struct PlainTextExtractor;

#[async_trait::async_trait]
impl TextExtractor for PlainTextExtractor {
    fn name(&self) -> &'static str {
        "plain_text"
    }

    async fn extract_text(&self, bytes: &[u8]) -> Result<String> {
        Ok(String::from_utf8_lossy(bytes).trim().to_string())
    }
}

/// Reads the text layer of a PDF; anything that is not a PDF is read as text.
///
/// Scanned, image-only PDFs come back empty. OCR is not attempted.
#[derive(Debug, Clone, Default)]
pub struct PdfTextExtractor;

#[async_trait::async_trait]
impl TextExtractor for PdfTextExtractor {
    fn name(&self) -> &'static str {
        "pdf_text"
    }

    async fn extract_text(&self, bytes: &[u8]) -> Result<String> {
        if !bytes.starts_with(PDF_MAGIC) {
            return PlainTextExtractor.extract_text(bytes).await;
        }

        let owned = bytes.to_vec();
        let extracted = tokio::task::spawn_blocking(move || pdf_extract::extract_text_from_mem(&owned))
            .await
            .map_err(|e| BasError::Collaborator(format!("PDF extraction task failed: {}", e)))?;

        match extracted {
            Ok(text) => {
                let text = text.trim().to_string();
                debug!(chars = text.len(), "Extracted PDF text layer");
                Ok(text)
            }
            Err(e) => {
                warn!(error = %e, "pdf-extract failed, document may be scanned or corrupted");
                Err(BasError::Collaborator(format!("PDF text extraction failed: {}", e)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_plain_text_is_trimmed() {
        let text = PlainTextExtractor.extract_text(b"  TAX INVOICE\nGST: $10.00\n").await.unwrap();
        assert_eq!(text, "TAX INVOICE\nGST: $10.00");
    }

    #[tokio::test]
    async fn test_non_pdf_bytes_read_as_text() {
        let text = PdfTextExtractor.extract_text(b"Total: $110.00").await.unwrap();
        assert_eq!(text, "Total: $110.00");
    }

    #[tokio::test]
    async fn test_garbage_pdf_is_an_error() {
        let result = PdfTextExtractor.extract_text(b"%PDF-1.7 this is not really a pdf").await;
        assert!(result.is_err());
    }
}
