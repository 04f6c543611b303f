//! External collaborators
//!
//! Text extraction, field extraction and explanation prose sit behind these
//! traits. The core awaits them but never trusts them: every failure is
//! replaced by a well-defined fallback before it reaches a caller.

pub mod heuristic;
pub mod llm;
pub mod text;

pub use heuristic::HeuristicFieldExtractor;
pub use llm::{GeminiExplainer, GeminiFieldExtractor};
pub use text::{PdfTextExtractor, PlainTextExtractor};

use crate::config::AppConfig;
use crate::gemini::GeminiClient;
use crate::memory::ConversationTurn;
use crate::models::{BasSummary, Verbosity};
use crate::report::{format_money, position_sentence};
use crate::Result;
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

/// bytes → text. May legitimately return an empty string.
#[async_trait::async_trait]
pub trait TextExtractor: Send + Sync {
    fn name(&self) -> &'static str;
    async fn extract_text(&self, bytes: &[u8]) -> Result<String>;
}

/// text → loosely keyed field map, possibly with a `raw` blob.
#[async_trait::async_trait]
pub trait FieldExtractor: Send + Sync {
    fn name(&self) -> &'static str;
    async fn extract_fields(&self, text: &str) -> Result<Value>;
}

/// Display-only prose. Nothing returned here is ever parsed for numbers.
#[async_trait::async_trait]
pub trait Explainer: Send + Sync {
    fn name(&self) -> &'static str;

    /// Interpretation of an already computed report.
    async fn explain(&self, report: &BasSummary, verbosity: Verbosity) -> Result<String>;

    /// Free conversational reply when no figure is being asked for.
    async fn chat(&self, message: &str, history: &[ConversationTurn]) -> Result<String>;
}

pub async fn extract_text_or_empty(extractor: &dyn TextExtractor, bytes: &[u8]) -> String {
    match extractor.extract_text(bytes).await {
        Ok(text) => text,
        Err(e) => {
            warn!(extractor = extractor.name(), error = %e, "Text extraction failed, treating as empty");
            String::new()
        }
    }
}

pub async fn explain_or_fallback(
    explainer: &dyn Explainer,
    report: &BasSummary,
    verbosity: Verbosity,
) -> String {
    match explainer.explain(report, verbosity).await {
        Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
        Ok(_) => template_explanation(report, verbosity),
        Err(e) => {
            warn!(explainer = explainer.name(), error = %e, "Explanation failed, using template");
            template_explanation(report, verbosity)
        }
    }
}

pub async fn chat_or_fallback(
    explainer: &dyn Explainer,
    message: &str,
    history: &[ConversationTurn],
) -> String {
    match explainer.chat(message, history).await {
        Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
        Ok(_) => GENERIC_CHAT_REPLY.to_string(),
        Err(e) => {
            warn!(explainer = explainer.name(), error = %e, "Chat reply failed, using generic reply");
            GENERIC_CHAT_REPLY.to_string()
        }
    }
}

pub const GENERIC_CHAT_REPLY: &str = "I can estimate your BAS from your invoices. Upload an invoice \
(PDF or text) or paste its details and I'll work out the GST you collected, the GST you paid, \
and your net position.";

fn template_explanation(report: &BasSummary, verbosity: Verbosity) -> String {
    let position = position_sentence(report);
    match verbosity {
        Verbosity::Concise => position.to_string(),
        Verbosity::Detailed => format!(
            "{} You collected {} in GST on sales and paid {} in GST on purchases, \
             so the difference of {} is your estimated net BAS position.",
            position,
            format_money(report.gst_collected),
            format_money(report.gst_paid),
            format_money(report.net_liability.abs())
        ),
    }
}

/// Deterministic explainer; also the fallback for every other explainer.
#[derive(Debug, Clone, Default)]
pub struct TemplateExplainer;

#[async_trait::async_trait]
impl Explainer for TemplateExplainer {
    fn name(&self) -> &'static str {
        "template"
    }

    async fn explain(&self, report: &BasSummary, verbosity: Verbosity) -> Result<String> {
        Ok(template_explanation(report, verbosity))
    }

    async fn chat(&self, message: &str, _history: &[ConversationTurn]) -> Result<String> {
        let lowered = message.trim().to_lowercase();
        let greeting = ["hi", "hello", "hey", "g'day", "gday"]
            .iter()
            .any(|g| lowered == *g || lowered.starts_with(&format!("{} ", g)));

        if greeting {
            Ok(format!("G'day! {}", GENERIC_CHAT_REPLY))
        } else {
            Ok(GENERIC_CHAT_REPLY.to_string())
        }
    }
}

/// The three collaborators the core talks to
#[derive(Clone)]
pub struct Collaborators {
    pub text: Arc<dyn TextExtractor>,
    pub fields: Arc<dyn FieldExtractor>,
    pub explainer: Arc<dyn Explainer>,
}

impl Collaborators {
    pub fn new(
        text: Arc<dyn TextExtractor>,
        fields: Arc<dyn FieldExtractor>,
        explainer: Arc<dyn Explainer>,
    ) -> Self {
        Self {
            text,
            fields,
            explainer,
        }
    }

    /// Offline set: PDF/plain text, regex fields, template prose.
    pub fn offline() -> Self {
        Self::new(
            Arc::new(PdfTextExtractor),
            Arc::new(HeuristicFieldExtractor::new()),
            Arc::new(TemplateExplainer),
        )
    }

    /// Gemini-backed when an API key is configured, offline otherwise.
    pub fn from_config(config: &AppConfig) -> Self {
        let Some(api_key) = config.gemini_api_key.clone() else {
            info!("GEMINI_API_KEY not set, using heuristic extraction and template explanations");
            return Self::offline();
        };

        match GeminiClient::new(api_key, &config.gemini_model) {
            Ok(client) => {
                info!(model = %config.gemini_model, "Using Gemini for field extraction and explanations");
                Self::new(
                    Arc::new(PdfTextExtractor),
                    Arc::new(GeminiFieldExtractor::new(client.clone())),
                    Arc::new(GeminiExplainer::new(client.with_temperature(0.3))),
                )
            }
            Err(e) => {
                warn!(error = %e, "Failed to build Gemini client, falling back to offline collaborators");
                Self::offline()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BasError;
    use rust_decimal_macros::dec;

    struct BrokenExplainer;

    #[async_trait::async_trait]
    impl Explainer for BrokenExplainer {
        fn name(&self) -> &'static str {
            "broken"
        }

        async fn explain(&self, _report: &BasSummary, _verbosity: Verbosity) -> Result<String> {
            Err(BasError::Collaborator("timeout".to_string()))
        }

        async fn chat(&self, _message: &str, _history: &[ConversationTurn]) -> Result<String> {
            Err(BasError::Collaborator("timeout".to_string()))
        }
    }

    struct BrokenText;

    #[async_trait::async_trait]
    impl TextExtractor for BrokenText {
        fn name(&self) -> &'static str {
            "broken"
        }

        async fn extract_text(&self, _bytes: &[u8]) -> Result<String> {
            Err(BasError::Collaborator("ocr crashed".to_string()))
        }
    }

    #[tokio::test]
    async fn test_explanation_falls_back_to_template() {
        let report = BasSummary::from_totals(dec!(0), dec!(10));
        let text = explain_or_fallback(&BrokenExplainer, &report, Verbosity::Concise).await;
        assert_eq!(text, "You're due a GST refund this period.");
    }

    #[tokio::test]
    async fn test_chat_falls_back_to_generic_reply() {
        let text = chat_or_fallback(&BrokenExplainer, "hi", &[]).await;
        assert_eq!(text, GENERIC_CHAT_REPLY);
    }

    #[tokio::test]
    async fn test_text_failure_becomes_empty() {
        assert_eq!(extract_text_or_empty(&BrokenText, b"%PDF-1.4").await, "");
    }

    #[tokio::test]
    async fn test_detailed_template_mentions_both_buckets() {
        let report = BasSummary::from_totals(dec!(15), dec!(10));
        let text = TemplateExplainer.explain(&report, Verbosity::Detailed).await.unwrap();
        assert!(text.contains("$15.00"));
        assert!(text.contains("$10.00"));
        assert!(text.contains("$5.00"));
    }
}
