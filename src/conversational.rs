//! Conversation controller
//!
//! One turn at a time per session. A turn is classified, then either runs the
//! invoice pipeline (INVOICE) or answers from the last report / chats (CHAT).
//! Session state is committed once, after the reply is final.

use crate::batch::BatchAggregator;
use crate::classifier::{ChatIntent, TurnClassifier};
use crate::collaborators::{chat_or_fallback, explain_or_fallback, Collaborators, Explainer, FieldExtractor};
use crate::memory::{ConversationState, ConversationTurn};
use crate::models::{BasSummary, InteractionMode, InvoiceDocument, NetPosition, TurnResponse, Verbosity};
use crate::pipeline::{InvoicePipeline, PipelineOutcome};
use crate::report::{format_money, position_sentence, render_figures};
use std::sync::Arc;
use tracing::{debug, info};

const NO_CONTENT_REPLY: &str = "I couldn't read any invoice content from that. \
Try uploading a clearer PDF or pasting the invoice text.";

/// Figures a turn produced, if any.
enum TurnFigures {
    None,
    /// A finished report; becomes the session's last report.
    Report(BasSummary),
    /// A failed invoice: shown as zero, never remembered.
    Failed(BasSummary),
}

impl TurnFigures {
    fn shown(&self) -> Option<BasSummary> {
        match self {
            TurnFigures::None => None,
            TurnFigures::Report(summary) | TurnFigures::Failed(summary) => Some(summary.rounded()),
        }
    }

    fn retained(&self) -> Option<BasSummary> {
        match self {
            TurnFigures::Report(summary) => Some(*summary),
            _ => None,
        }
    }
}

pub struct ConversationController {
    pipeline: Arc<InvoicePipeline>,
    batch: BatchAggregator,
    fields: Arc<dyn FieldExtractor>,
    explainer: Arc<dyn Explainer>,
    classifier: TurnClassifier,
}

impl ConversationController {
    pub fn new(pipeline: Arc<InvoicePipeline>, collaborators: &Collaborators) -> Self {
        let batch = BatchAggregator::new(
            pipeline.clone(),
            collaborators.fields.clone(),
            collaborators.text.clone(),
        );

        Self {
            pipeline,
            batch,
            fields: collaborators.fields.clone(),
            explainer: collaborators.explainer.clone(),
            classifier: TurnClassifier::new(),
        }
    }

    pub fn batch(&self) -> &BatchAggregator {
        &self.batch
    }

    pub fn pipeline(&self) -> &InvoicePipeline {
        &self.pipeline
    }

    /// Handle one user turn against the session's state.
    ///
    /// `documents` are attached files already reduced to text. With none
    /// attached, invoice-looking message text is processed as the invoice.
    pub async fn handle_turn(
        &self,
        state: &mut ConversationState,
        message: &str,
        documents: Vec<InvoiceDocument>,
    ) -> TurnResponse {
        let turn = self.classifier.classify(message, !documents.is_empty());
        let verbosity = turn.verbosity.unwrap_or_else(|| state.verbosity());

        info!(
            session_id = %state.session_id,
            mode = ?turn.mode,
            intent = ?turn.intent,
            %verbosity,
            "Handling turn"
        );

        let (response, figures) = match turn.mode {
            InteractionMode::Invoice => self.invoice_turn(message, documents, verbosity).await,
            InteractionMode::Chat => {
                let reply = self.chat_turn(state, message, turn.intent, verbosity).await;
                (reply, TurnFigures::None)
            }
        };

        state.set_verbosity(verbosity);
        state.commit_turn(
            ConversationTurn::new(message, response.as_str(), turn.mode),
            figures.retained(),
        );

        TurnResponse {
            response,
            mode: turn.mode,
            verbosity,
            bas_summary: figures.shown(),
        }
    }

    async fn invoice_turn(
        &self,
        message: &str,
        documents: Vec<InvoiceDocument>,
        verbosity: Verbosity,
    ) -> (String, TurnFigures) {
        let mut documents: Vec<InvoiceDocument> = if documents.is_empty() {
            vec![InvoiceDocument::new(None, message)]
        } else {
            documents
        };
        documents.retain(|doc| !doc.text.trim().is_empty());

        match documents.len() {
            0 => {
                debug!("Invoice turn carried no readable content");
                (NO_CONTENT_REPLY.to_string(), TurnFigures::None)
            }
            1 => {
                let text = &documents[0].text;
                match self.pipeline.process_text(text, self.fields.as_ref(), verbosity).await {
                    PipelineOutcome::Done(report) => {
                        (report.explanation, TurnFigures::Report(report.bas_summary))
                    }
                    PipelineOutcome::Failed(failure) => (
                        format!("I couldn't process that invoice: {}", failure.error),
                        TurnFigures::Failed(failure.bas_summary),
                    ),
                }
            }
            _ => {
                let report = self.batch.process(documents).await;
                (report.response, TurnFigures::Report(report.aggregate_summary.summary))
            }
        }
    }

    async fn chat_turn(
        &self,
        state: &ConversationState,
        message: &str,
        intent: ChatIntent,
        verbosity: Verbosity,
    ) -> String {
        let Some(report) = state.last_report().copied() else {
            return chat_or_fallback(self.explainer.as_ref(), message, &state.history().to_vec()).await;
        };

        // "it"/"that" refer to the last report; answer only what was asked.
        match intent {
            ChatIntent::NetPosition => net_position_answer(&report),
            ChatIntent::GstPaid => format!(
                "You paid {} in GST on purchases.",
                format_money(report.gst_paid)
            ),
            ChatIntent::GstCollected => format!(
                "You collected {} in GST on sales.",
                format_money(report.gst_collected)
            ),
            ChatIntent::Explain => {
                let answer = meaning_answer(&report);
                match verbosity {
                    Verbosity::Concise => answer,
                    Verbosity::Detailed => {
                        let prose = explain_or_fallback(self.explainer.as_ref(), &report, verbosity).await;
                        format!("{}\n\n{}", answer, prose)
                    }
                }
            }
            ChatIntent::FullSummary => {
                let mut out = String::from("📊 **BAS Estimate**\n");
                out.push_str(&render_figures(&report));
                out.push_str(&format!("\n\n💬 {}", position_sentence(&report)));
                if verbosity == Verbosity::Detailed {
                    let prose = explain_or_fallback(self.explainer.as_ref(), &report, verbosity).await;
                    out.push_str(&format!("\n\n{}", prose));
                }
                out
            }
            ChatIntent::General => {
                chat_or_fallback(self.explainer.as_ref(), message, &state.history().to_vec()).await
            }
        }
    }
}

fn net_position_answer(report: &BasSummary) -> String {
    let amount = format_money(report.net_liability.abs());
    match report.position() {
        NetPosition::Owing => format!("You'll likely owe {} in GST this period.", amount),
        NetPosition::Refund => format!("You're due a GST refund of {} this period.", amount),
        NetPosition::Balanced => "Your GST collected and paid are balanced, so nothing is owing either way.".to_string(),
    }
}

fn meaning_answer(report: &BasSummary) -> String {
    let collected = format_money(report.gst_collected);
    let paid = format_money(report.gst_paid);
    let amount = format_money(report.net_liability.abs());

    match report.position() {
        NetPosition::Refund => format!(
            "You paid more GST on purchases ({}) than you collected on sales ({}), \
             so you're due a GST refund of {}.",
            paid, collected, amount
        ),
        NetPosition::Owing => format!(
            "You collected more GST on sales ({}) than you paid on purchases ({}), \
             so you'll likely owe {} to the ATO.",
            collected, paid, amount
        ),
        NetPosition::Balanced => format!(
            "The GST you collected ({}) matches the GST you paid ({}), so there's nothing to pay or claim back.",
            collected, paid
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{HeuristicFieldExtractor, PlainTextExtractor, TemplateExplainer};
    use crate::config::AppConfig;
    use crate::memory::{SessionPhase, HISTORY_CAPACITY};
    use crate::Result;
    use rust_decimal_macros::dec;
    use serde_json::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    const REFUND_INVOICE: &str = "Metro Packaging Supplies\nTAX INVOICE\nABN: 51 824 753 556\n\
                                  Date: 01/09/2025\nSubtotal: $425.00\nGST: $42.50\nTotal: $467.50";
    const SALE_INVOICE: &str = "TAX INVOICE\nFrom: Luna Café Sales\nABN: 53 004 085 616\n\
                                Date: 15/08/2025\nSubtotal: $150.00\nGST: $15.00\nTotal: $165.00";

    /// Heuristic extraction that counts how often it is asked.
    struct CountingFields {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl FieldExtractor for CountingFields {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn extract_fields(&self, text: &str) -> Result<Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            HeuristicFieldExtractor::new().extract_fields(text).await
        }
    }

    fn controller_with_counter() -> (ConversationController, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let collaborators = Collaborators::new(
            Arc::new(PlainTextExtractor),
            Arc::new(CountingFields { calls: calls.clone() }),
            Arc::new(TemplateExplainer),
        );
        let pipeline = Arc::new(InvoicePipeline::from_config(
            &AppConfig::default(),
            collaborators.explainer.clone(),
        ));
        (ConversationController::new(pipeline, &collaborators), calls)
    }

    fn controller() -> ConversationController {
        controller_with_counter().0
    }

    fn doc(text: &str) -> Vec<InvoiceDocument> {
        vec![InvoiceDocument::new(Some("invoice.pdf".to_string()), text)]
    }

    #[tokio::test]
    async fn test_follow_up_resolves_to_last_report() {
        let (controller, calls) = controller_with_counter();
        let mut state = ConversationState::new(Uuid::new_v4());

        let first = controller
            .handle_turn(&mut state, "here's my invoice", doc(REFUND_INVOICE))
            .await;
        assert_eq!(first.mode, InteractionMode::Invoice);
        assert_eq!(state.phase(), SessionPhase::HasReport);
        assert_eq!(state.last_report().unwrap().net_liability, dec!(-42.50));

        let reply = controller
            .handle_turn(&mut state, "what does that mean?", Vec::new())
            .await;

        assert_eq!(reply.mode, InteractionMode::Chat);
        assert!(reply.response.contains("refund"));
        assert!(reply.response.contains("$42.50"));
        assert!(reply.bas_summary.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_narrow_question_does_not_repeat_the_report() {
        let controller = controller();
        let mut state = ConversationState::new(Uuid::new_v4());
        controller.handle_turn(&mut state, "", doc(REFUND_INVOICE)).await;

        let reply = controller
            .handle_turn(&mut state, "how much GST did I pay?", Vec::new())
            .await;
        assert_eq!(reply.response, "You paid $42.50 in GST on purchases.");

        let full = controller
            .handle_turn(&mut state, "show me the full summary", Vec::new())
            .await;
        assert!(full.response.contains("GST Collected: $0.00"));
        assert!(full.response.contains("Net BAS Position: -$42.50"));
    }

    #[tokio::test]
    async fn test_chat_without_report_computes_nothing() {
        let (controller, calls) = controller_with_counter();
        let mut state = ConversationState::new(Uuid::new_v4());

        let reply = controller.handle_turn(&mut state, "hello", Vec::new()).await;

        assert_eq!(reply.mode, InteractionMode::Chat);
        assert!(reply.response.starts_with("G'day!"));
        assert!(reply.bas_summary.is_none());
        assert_eq!(state.phase(), SessionPhase::Idle);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_pasted_invoice_text_runs_the_pipeline() {
        let controller = controller();
        let mut state = ConversationState::new(Uuid::new_v4());

        let reply = controller.handle_turn(&mut state, SALE_INVOICE, Vec::new()).await;

        assert_eq!(reply.mode, InteractionMode::Invoice);
        assert_eq!(reply.bas_summary.unwrap().gst_collected, dec!(15.00));
        assert!(reply.response.contains("owe"));
    }

    #[tokio::test]
    async fn test_multiple_documents_go_through_the_batch() {
        let controller = controller();
        let mut state = ConversationState::new(Uuid::new_v4());
        let docs = vec![
            InvoiceDocument::new(None, SALE_INVOICE),
            InvoiceDocument::new(None, REFUND_INVOICE),
        ];

        let reply = controller.handle_turn(&mut state, "", docs).await;

        assert!(reply.response.contains("Batch Summary"));
        assert_eq!(state.last_report().unwrap().net_liability, dec!(-27.50));
    }

    #[tokio::test]
    async fn test_unreadable_upload_keeps_previous_report() {
        let controller = controller();
        let mut state = ConversationState::new(Uuid::new_v4());
        controller.handle_turn(&mut state, "", doc(SALE_INVOICE)).await;

        let reply = controller.handle_turn(&mut state, "", doc("   ")).await;

        assert_eq!(reply.response, NO_CONTENT_REPLY);
        assert_eq!(state.last_report().unwrap().gst_collected, dec!(15.00));
        assert_eq!(state.history().len(), 2);
    }

    struct BrokenFields;

    #[async_trait::async_trait]
    impl FieldExtractor for BrokenFields {
        fn name(&self) -> &'static str {
            "broken"
        }

        async fn extract_fields(&self, _text: &str) -> Result<Value> {
            Err(crate::error::BasError::Collaborator("extractor offline".to_string()))
        }
    }

    #[tokio::test]
    async fn test_failed_invoice_shows_zero_but_keeps_previous_report() {
        let collaborators = Collaborators::new(
            Arc::new(PlainTextExtractor),
            Arc::new(BrokenFields),
            Arc::new(TemplateExplainer),
        );
        let pipeline = Arc::new(InvoicePipeline::from_config(
            &AppConfig::default(),
            collaborators.explainer.clone(),
        ));
        let broken = ConversationController::new(pipeline, &collaborators);
        let mut state = ConversationState::new(Uuid::new_v4());
        controller().handle_turn(&mut state, "", doc(SALE_INVOICE)).await;

        let reply = broken.handle_turn(&mut state, "", doc(REFUND_INVOICE)).await;

        assert!(reply.response.starts_with("I couldn't process that invoice"));
        assert_eq!(reply.bas_summary, Some(BasSummary::zero().rounded()));
        assert_eq!(state.last_report().unwrap().gst_collected, dec!(15.00));
    }

    #[tokio::test]
    async fn test_verbosity_persists_until_changed() {
        let controller = controller();
        let mut state = ConversationState::new(Uuid::new_v4());
        assert_eq!(state.verbosity(), Verbosity::Concise);

        let reply = controller
            .handle_turn(&mut state, "give me the full summary", Vec::new())
            .await;
        assert_eq!(reply.verbosity, Verbosity::Detailed);

        let reply = controller.handle_turn(&mut state, "thanks", Vec::new()).await;
        assert_eq!(reply.verbosity, Verbosity::Detailed);

        let reply = controller.handle_turn(&mut state, "how much GST?", Vec::new()).await;
        assert_eq!(reply.verbosity, Verbosity::Concise);
        assert_eq!(state.verbosity(), Verbosity::Concise);
    }

    #[tokio::test]
    async fn test_history_is_bounded() {
        let controller = controller();
        let mut state = ConversationState::new(Uuid::new_v4());

        for i in 0..(HISTORY_CAPACITY + 3) {
            controller
                .handle_turn(&mut state, &format!("message {}", i), Vec::new())
                .await;
        }

        assert_eq!(state.history().len(), HISTORY_CAPACITY);
        assert_eq!(state.history().turns().next().unwrap().user_message, "message 3");
    }
}
