//! Single-invoice pipeline
//!
//! NORMALIZING → VALIDATING → AGGREGATING → EXPLAINING → DONE
//!
//! NORMALIZING and AGGREGATING divert to FAILED on a structural error.
//! Validation findings and collaborator failures never do: they become
//! warnings and fallbacks.

use crate::calculator::BasCalculator;
use crate::collaborators::{explain_or_fallback, Explainer, FieldExtractor};
use crate::config::AppConfig;
use crate::models::{
    BasSummary, ClassificationLabel, InvoiceData, InvoiceRecord, InvoiceReport, ValidationResult,
    Verbosity,
};
use crate::normalizer::FieldNormalizer;
use crate::report::{first_sentence, render_figures, render_invoice_details};
use crate::validation::{create_default_validation_engine, ValidationEngine};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum PipelineStage {
    Normalizing,
    Validating,
    Aggregating,
    Explaining,
    Done,
    Failed,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PipelineStage::Normalizing => "NORMALIZING",
            PipelineStage::Validating => "VALIDATING",
            PipelineStage::Aggregating => "AGGREGATING",
            PipelineStage::Explaining => "EXPLAINING",
            PipelineStage::Done => "DONE",
            PipelineStage::Failed => "FAILED",
        };
        write!(f, "{}", s)
    }
}

/// Terminal record for an invoice the pipeline could not process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineFailure {
    /// Stage the error surfaced in.
    pub stage: PipelineStage,
    pub error: String,
    /// Always zero so callers can still fold it into a total.
    pub bas_summary: BasSummary,
    pub stage_trace: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum PipelineOutcome {
    Done(InvoiceReport),
    Failed(PipelineFailure),
}

impl PipelineOutcome {
    pub fn is_done(&self) -> bool {
        matches!(self, PipelineOutcome::Done(_))
    }

    pub fn report(&self) -> Option<&InvoiceReport> {
        match self {
            PipelineOutcome::Done(report) => Some(report),
            PipelineOutcome::Failed(_) => None,
        }
    }

    /// Exact summary; zero when failed.
    pub fn bas_summary(&self) -> BasSummary {
        match self {
            PipelineOutcome::Done(report) => report.bas_summary,
            PipelineOutcome::Failed(failure) => failure.bas_summary,
        }
    }

    pub fn stage_trace(&self) -> &[String] {
        match self {
            PipelineOutcome::Done(report) => &report.stage_trace,
            PipelineOutcome::Failed(failure) => &failure.stage_trace,
        }
    }
}

/// Work carried between stages. Each state owns exactly what the next one needs.
enum PipelineState {
    Normalizing,
    Validating(InvoiceRecord),
    Aggregating(InvoiceRecord, ValidationResult),
    Explaining {
        data: InvoiceData,
        label: ClassificationLabel,
        summary: BasSummary,
    },
    Done(InvoiceReport),
    Failed(PipelineStage, String),
}

impl PipelineState {
    fn stage(&self) -> PipelineStage {
        match self {
            PipelineState::Normalizing => PipelineStage::Normalizing,
            PipelineState::Validating(..) => PipelineStage::Validating,
            PipelineState::Aggregating(..) => PipelineStage::Aggregating,
            PipelineState::Explaining { .. } => PipelineStage::Explaining,
            PipelineState::Done(_) => PipelineStage::Done,
            PipelineState::Failed(..) => PipelineStage::Failed,
        }
    }
}

/// Drives one invoice from a raw field map to a report
pub struct InvoicePipeline {
    normalizer: FieldNormalizer,
    validation: ValidationEngine,
    calculator: BasCalculator,
    explainer: Arc<dyn Explainer>,
}

impl InvoicePipeline {
    pub fn new(
        normalizer: FieldNormalizer,
        validation: ValidationEngine,
        calculator: BasCalculator,
        explainer: Arc<dyn Explainer>,
    ) -> Self {
        Self {
            normalizer,
            validation,
            calculator,
            explainer,
        }
    }

    pub fn from_config(config: &AppConfig, explainer: Arc<dyn Explainer>) -> Self {
        Self::new(
            FieldNormalizer::new(),
            create_default_validation_engine(config.total_tolerance),
            BasCalculator::new(&config.policy),
            explainer,
        )
    }

    pub fn calculator(&self) -> &BasCalculator {
        &self.calculator
    }

    pub fn explainer(&self) -> &Arc<dyn Explainer> {
        &self.explainer
    }

    /// Extract fields from invoice text, then run the pipeline on them.
    ///
    /// Empty text and a failed field extraction are structural failures at
    /// NORMALIZING; there is nothing to normalize.
    pub async fn process_text(
        &self,
        text: &str,
        fields: &dyn FieldExtractor,
        verbosity: Verbosity,
    ) -> PipelineOutcome {
        match extract(text, fields).await {
            Ok(raw) => self.run(&raw, verbosity).await,
            Err(failed) => failed,
        }
    }

    /// Text variant of [`assess`](Self::assess).
    pub async fn assess_text(&self, text: &str, fields: &dyn FieldExtractor) -> PipelineOutcome {
        match extract(text, fields).await {
            Ok(raw) => self.assess(&raw).await,
            Err(failed) => failed,
        }
    }

    /// Run every stage on a raw field map.
    pub async fn run(&self, raw: &Value, verbosity: Verbosity) -> PipelineOutcome {
        self.drive(raw, verbosity, true).await
    }

    /// Like [`run`](Self::run) without asking the explainer for prose.
    /// The explanation is the figures alone. Used for batch items.
    pub async fn assess(&self, raw: &Value) -> PipelineOutcome {
        self.drive(raw, Verbosity::Concise, false).await
    }

    async fn drive(&self, raw: &Value, verbosity: Verbosity, with_prose: bool) -> PipelineOutcome {
        let start = Instant::now();
        let mut trace = Vec::new();
        let mut state = PipelineState::Normalizing;

        loop {
            debug!(stage = %state.stage(), "Pipeline stage");

            state = match state {
                PipelineState::Normalizing => match self.normalizer.normalize(raw) {
                    Ok(record) => {
                        trace.push(format!(
                            "NORMALIZING: canonical record built ({} unparsed)",
                            record.unparsed_fields.len()
                        ));
                        PipelineState::Validating(record)
                    }
                    Err(e) => PipelineState::Failed(PipelineStage::Normalizing, e.to_string()),
                },

                PipelineState::Validating(record) => {
                    let validation = self.validation.validate(&record);
                    trace.push(format!(
                        "VALIDATING: {} rules, {} warning(s)",
                        self.validation.rule_count(),
                        validation.warnings.len()
                    ));
                    PipelineState::Aggregating(record, validation)
                }

                PipelineState::Aggregating(record, validation) => {
                    let label = self.calculator.classify(&record);
                    match self.calculator.estimate(std::slice::from_ref(&record)) {
                        Ok(summary) => {
                            trace.push(format!("AGGREGATING: classified as {}", label));
                            PipelineState::Explaining {
                                data: InvoiceData { record, validation },
                                label,
                                summary,
                            }
                        }
                        Err(e) => PipelineState::Failed(PipelineStage::Aggregating, e.to_string()),
                    }
                }

                PipelineState::Explaining {
                    data,
                    label,
                    summary,
                } => {
                    let explanation = if with_prose {
                        let prose = explain_or_fallback(self.explainer.as_ref(), &summary, verbosity).await;
                        trace.push(format!("EXPLAINING: {} reply", verbosity));
                        compose_explanation(&data, label, &summary, verbosity, &prose)
                    } else {
                        trace.push("EXPLAINING: figures only".to_string());
                        render_figures(&summary)
                    };
                    trace.push("DONE".to_string());

                    PipelineState::Done(InvoiceReport {
                        invoice_data: data,
                        bas_summary: summary,
                        classification: label,
                        explanation,
                        stage_trace: Vec::new(),
                    })
                }

                PipelineState::Done(mut report) => {
                    report.stage_trace = trace;
                    info!(
                        classification = %report.classification,
                        warnings = report.invoice_data.validation.warnings.len(),
                        duration_ms = start.elapsed().as_millis() as u64,
                        "Invoice processed"
                    );
                    return PipelineOutcome::Done(report);
                }

                PipelineState::Failed(stage, error) => {
                    trace.push(format!("FAILED at {}: {}", stage, error));
                    warn!(stage = %stage, error = %error, "Invoice pipeline failed");
                    return PipelineOutcome::Failed(PipelineFailure {
                        stage,
                        error,
                        bas_summary: BasSummary::zero(),
                        stage_trace: trace,
                    });
                }
            };
        }
    }
}

async fn extract(text: &str, fields: &dyn FieldExtractor) -> std::result::Result<Value, PipelineOutcome> {
    if text.trim().is_empty() {
        return Err(failed_before_start("no invoice text could be extracted"));
    }

    fields.extract_fields(text).await.map_err(|e| {
        warn!(extractor = fields.name(), error = %e, "Field extraction failed");
        failed_before_start(&format!("field extraction failed: {}", e))
    })
}

fn failed_before_start(error: &str) -> PipelineOutcome {
    warn!(error, "Invoice rejected before normalizing");
    PipelineOutcome::Failed(PipelineFailure {
        stage: PipelineStage::Normalizing,
        error: error.to_string(),
        bas_summary: BasSummary::zero(),
        stage_trace: vec![format!("FAILED at NORMALIZING: {}", error)],
    })
}

/// Figures always come from the exact summary; prose is appended after them.
fn compose_explanation(
    data: &InvoiceData,
    label: ClassificationLabel,
    summary: &BasSummary,
    verbosity: Verbosity,
    prose: &str,
) -> String {
    let mut out = String::from("📊 **BAS Estimate**\n");
    out.push_str(&render_figures(summary));

    match verbosity {
        Verbosity::Concise => {
            out.push_str(&format!("\n\n💬 {}", first_sentence(prose)));
        }
        Verbosity::Detailed => {
            out.push_str("\n\n");
            out.push_str(&render_invoice_details(data, label));
            out.push_str(&format!("\n💬 {}", prose));
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{HeuristicFieldExtractor, TemplateExplainer};
    use crate::error::BasError;
    use crate::memory::ConversationTurn;
    use crate::Result;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn pipeline() -> InvoicePipeline {
        InvoicePipeline::from_config(&AppConfig::default(), Arc::new(TemplateExplainer))
    }

    struct BrokenExplainer;

    #[async_trait::async_trait]
    impl Explainer for BrokenExplainer {
        fn name(&self) -> &'static str {
            "broken"
        }

        async fn explain(&self, _report: &BasSummary, _verbosity: Verbosity) -> Result<String> {
            Err(BasError::LlmError("model unavailable".to_string()))
        }

        async fn chat(&self, _message: &str, _history: &[ConversationTurn]) -> Result<String> {
            Err(BasError::LlmError("model unavailable".to_string()))
        }
    }

    struct BrokenFields;

    #[async_trait::async_trait]
    impl FieldExtractor for BrokenFields {
        fn name(&self) -> &'static str {
            "broken"
        }

        async fn extract_fields(&self, _text: &str) -> Result<Value> {
            Err(BasError::Collaborator("quota exceeded".to_string()))
        }
    }

    /// Long-winded model that also tries to slip in its own numbers.
    struct ChattyExplainer;

    #[async_trait::async_trait]
    impl Explainer for ChattyExplainer {
        fn name(&self) -> &'static str {
            "chatty"
        }

        async fn explain(&self, _report: &BasSummary, _verbosity: Verbosity) -> Result<String> {
            Ok("You paid more GST than you collected. Your refund is probably $999.99.".to_string())
        }

        async fn chat(&self, _message: &str, _history: &[ConversationTurn]) -> Result<String> {
            Ok(String::new())
        }
    }

    #[tokio::test]
    async fn test_purchase_invoice_end_to_end() {
        let raw = json!({
            "supplier": "ABC Wholesale Supplies",
            "abn": "51 824 753 556",
            "date": "14/08/2025",
            "subtotal": "$100.00",
            "gst": "$10.00",
            "total": "$110.00",
            "bill_to": "Luna Café"
        });

        let outcome = pipeline().run(&raw, Verbosity::Concise).await;
        let report = outcome.report().expect("pipeline should finish");

        assert_eq!(report.classification, ClassificationLabel::Purchase);
        assert_eq!(report.bas_summary.gst_paid, dec!(10.00));
        assert_eq!(report.bas_summary.gst_collected, Decimal::ZERO);
        assert_eq!(report.bas_summary.net_liability, dec!(-10.00));
        assert!(report.invoice_data.validation.abn_valid);
        assert!(report.invoice_data.validation.fields_ok);
        assert!(report.invoice_data.validation.warnings.is_empty());
        assert!(report.explanation.contains("Net BAS Position: -$10.00"));
        assert!(report.explanation.contains("refund"));
    }

    #[tokio::test]
    async fn test_sale_invoice_end_to_end() {
        let raw = json!({
            "supplier_name": "Luna Café Sales",
            "abn": "53 004 085 616",
            "date": "15/08/2025",
            "amount_ex_gst": "150.00",
            "gst": "15.00",
            "total": "165.00",
            "bill_to": ""
        });

        let report = pipeline().run(&raw, Verbosity::Concise).await.report().cloned().unwrap();

        assert_eq!(report.classification, ClassificationLabel::Sale);
        assert_eq!(report.bas_summary.gst_collected, dec!(15.00));
        assert_eq!(report.bas_summary.net_liability, dec!(15.00));
        assert!(report.explanation.contains("owe"));
    }

    #[tokio::test]
    async fn test_invalid_abn_is_a_warning_not_a_failure() {
        let raw = json!({
            "supplier": "Dodgy Supplies",
            "abn": "99 999 999 999",
            "date": "01/09/2025",
            "amount_ex_gst": "20.00",
            "gst": "2.00",
            "total": "22.00"
        });

        let outcome = pipeline().run(&raw, Verbosity::Concise).await;
        let report = outcome.report().unwrap();

        assert!(!report.invoice_data.validation.abn_valid);
        assert!(report
            .invoice_data
            .validation
            .warnings
            .contains(&"Invalid ABN".to_string()));
        assert_eq!(report.bas_summary.gst_paid, dec!(2.00));
        assert_eq!(outcome.stage_trace().last().map(String::as_str), Some("DONE"));
    }

    #[tokio::test]
    async fn test_amounts_at_the_decimal_limit_still_finish() {
        let raw = json!({
            "amount_ex_gst": "79228162514264337593543950335",
            "gst": "79228162514264337593543950335",
            "total": "1"
        });

        let outcome = pipeline().run(&raw, Verbosity::Concise).await;
        let report = outcome.report().expect("validation findings never fail the pipeline");

        assert_eq!(report.bas_summary.gst_collected, Decimal::MAX);
        assert!(report
            .invoice_data
            .validation
            .warnings
            .contains(&"Total does not equal amount ex GST plus GST".to_string()));
    }

    #[tokio::test]
    async fn test_non_object_fails_at_normalizing() {
        let outcome = pipeline().run(&json!(["not", "an", "invoice"]), Verbosity::Concise).await;

        match outcome {
            PipelineOutcome::Failed(failure) => {
                assert_eq!(failure.stage, PipelineStage::Normalizing);
                assert_eq!(failure.bas_summary, BasSummary::zero());
                assert!(failure.stage_trace.last().unwrap().starts_with("FAILED"));
            }
            PipelineOutcome::Done(_) => panic!("expected failure"),
        }
    }

    #[tokio::test]
    async fn test_failing_explainer_falls_back_to_template() {
        let pipeline = InvoicePipeline::from_config(&AppConfig::default(), Arc::new(BrokenExplainer));
        let raw = json!({ "supplier": "Metro Packaging", "gst": "4.50" });

        let report = pipeline.run(&raw, Verbosity::Concise).await.report().cloned().unwrap();

        assert!(report.explanation.contains("You're due a GST refund this period."));
        assert!(report.explanation.contains("GST Paid: $4.50"));
    }

    #[tokio::test]
    async fn test_concise_prose_is_cut_to_one_sentence() {
        let pipeline = InvoicePipeline::from_config(&AppConfig::default(), Arc::new(ChattyExplainer));
        let raw = json!({ "supplier": "Metro Packaging", "gst": "4.50" });

        let report = pipeline.run(&raw, Verbosity::Concise).await.report().cloned().unwrap();

        assert!(report.explanation.contains("You paid more GST than you collected."));
        assert!(!report.explanation.contains("$999.99"));
    }

    #[tokio::test]
    async fn test_detailed_reply_includes_invoice_details() {
        let raw = json!({ "supplier": "Metro Packaging", "gst": "4.50" });
        let report = pipeline().run(&raw, Verbosity::Detailed).await.report().cloned().unwrap();

        assert!(report.explanation.contains("### Invoice"));
        assert!(report.explanation.contains("Missing abn"));
    }

    #[tokio::test]
    async fn test_stage_trace_follows_the_state_order() {
        let raw = json!({ "supplier": "Counter Sales", "gst": "1.00" });
        let outcome = pipeline().run(&raw, Verbosity::Concise).await;

        let stages: Vec<&str> = outcome
            .stage_trace()
            .iter()
            .map(|line| line.split(':').next().unwrap_or(""))
            .collect();
        assert_eq!(stages, vec!["NORMALIZING", "VALIDATING", "AGGREGATING", "EXPLAINING", "DONE"]);
    }

    #[tokio::test]
    async fn test_assess_never_calls_the_explainer() {
        let pipeline = InvoicePipeline::from_config(&AppConfig::default(), Arc::new(ChattyExplainer));
        let raw = json!({ "supplier": "Metro Packaging", "gst": "4.50" });

        let report = pipeline.assess(&raw).await.report().cloned().unwrap();

        assert!(report.explanation.starts_with("- GST Collected: $0.00"));
        assert!(!report.explanation.contains("You paid more"));
    }

    #[tokio::test]
    async fn test_process_text_with_heuristics() {
        let text = "ABC Wholesale Supplies\nTAX INVOICE\nABN: 51 824 753 556\nDate: 14/08/2025\n\
                    Subtotal: $100.00\nGST: $10.00\nTotal: $110.00";
        let outcome = pipeline()
            .process_text(text, &HeuristicFieldExtractor::new(), Verbosity::Concise)
            .await;

        assert_eq!(outcome.bas_summary().gst_paid, dec!(10.00));
    }

    #[tokio::test]
    async fn test_empty_text_and_extractor_failure_are_structural() {
        let p = pipeline();

        let empty = p.process_text("   ", &HeuristicFieldExtractor::new(), Verbosity::Concise).await;
        assert!(!empty.is_done());

        let broken = p.process_text("TAX INVOICE", &BrokenFields, Verbosity::Concise).await;
        match broken {
            PipelineOutcome::Failed(failure) => assert!(failure.error.contains("quota exceeded")),
            PipelineOutcome::Done(_) => panic!("expected failure"),
        }
    }

    #[test]
    fn test_outcome_serializes_with_status_tag() {
        let outcome = failed_before_start("nothing here");
        let value = serde_json::to_value(&outcome).unwrap();
        assert_eq!(value["status"], "failed");
        assert_eq!(value["stage"], "NORMALIZING");
    }
}
