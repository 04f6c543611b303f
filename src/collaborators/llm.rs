//! Gemini-backed field extraction and explanation prose

use crate::collaborators::{Explainer, FieldExtractor};
use crate::gemini::GeminiClient;
use crate::memory::ConversationTurn;
use crate::models::{BasSummary, Verbosity};
use crate::normalizer::parse_json_object;
use crate::report::{format_money, position_sentence};
use crate::Result;
use serde_json::{json, Value};
use tracing::{debug, warn};

/// Invoice text beyond this is cut before prompting.
const MAX_PROMPT_CHARS: usize = 12_000;

const EXTRACTION_PROMPT: &str = r#"You are a precise invoice data extractor.
Extract the following fields from the invoice text provided.
Return ONLY valid JSON, no commentary.

Required keys:
- supplier
- abn
- date
- amount_ex_gst
- gst
- total
- bill_to

If a field is missing, use null. Copy amounts exactly as printed."#;

const EXPLAIN_PROMPT: &str = r#"You are a friendly Australian bookkeeping assistant helping a small business owner understand their BAS estimate.

Guidelines:
- Use plain Aussie English, no accounting jargon
- The figures you are given are final; never recalculate them or introduce new numbers
- Do not repeat the figures as a list, they are already shown to the user
- This is an estimate, not tax advice"#;

const CHAT_PROMPT: &str = r#"You are a friendly Australian bookkeeping assistant. You help small business owners understand GST and their Business Activity Statement (BAS).

Guidelines:
- Keep answers short and practical
- Never invent figures for the user's business; if they want numbers, ask them to upload an invoice
- This is general information, not tax advice"#;

pub struct GeminiFieldExtractor {
    client: GeminiClient,
}

impl GeminiFieldExtractor {
    pub fn new(client: GeminiClient) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl FieldExtractor for GeminiFieldExtractor {
    fn name(&self) -> &'static str {
        "gemini_fields"
    }

    async fn extract_fields(&self, text: &str) -> Result<Value> {
        let text: String = text.chars().take(MAX_PROMPT_CHARS).collect();
        let reply = self
            .client
            .generate(EXTRACTION_PROMPT, &format!("Invoice text:\n{}", text))
            .await?;

        Ok(fields_from_reply(&reply))
    }
}

/// Pull the JSON object out of a model reply. When that fails, hand the
/// reply on under `raw` and let the normalizer decide.
fn fields_from_reply(reply: &str) -> Value {
    match parse_json_object(reply) {
        Some(map) => Value::Object(map),
        None => {
            warn!("Gemini reply held no parseable JSON object");
            json!({ "raw": reply })
        }
    }
}

pub struct GeminiExplainer {
    client: GeminiClient,
}

impl GeminiExplainer {
    pub fn new(client: GeminiClient) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl Explainer for GeminiExplainer {
    fn name(&self) -> &'static str {
        "gemini_explainer"
    }

    async fn explain(&self, report: &BasSummary, verbosity: Verbosity) -> Result<String> {
        let shown = report.rounded();
        let length = match verbosity {
            Verbosity::Concise => "Reply with exactly one sentence.",
            Verbosity::Detailed => "Reply with a short paragraph (3-5 sentences) covering what drives the result.",
        };
        let query = format!(
            "GST collected: {}\nGST paid: {}\nNet BAS position: {}\nInterpretation: {}\n\n\
             Explain what this means for the business. {}",
            format_money(shown.gst_collected),
            format_money(shown.gst_paid),
            format_money(shown.net_liability),
            position_sentence(report),
            length
        );

        debug!(%verbosity, "Requesting explanation prose");
        self.client.generate(EXPLAIN_PROMPT, &query).await
    }

    async fn chat(&self, message: &str, history: &[ConversationTurn]) -> Result<String> {
        let mut prompt = String::new();
        if !history.is_empty() {
            prompt.push_str("Based on our conversation history:\n\n");
            for turn in history {
                prompt.push_str(&format!("- User: {}\n- Agent: {}\n", turn.user_message, turn.agent_reply));
            }
            prompt.push_str("\n---\n\n");
        }
        prompt.push_str("Answer this question: ");
        prompt.push_str(message);

        self.client.generate(CHAT_PROMPT, &prompt).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fields_from_fenced_reply() {
        let reply = "```json\n{\"supplier\": \"ABC Wholesale\", \"gst\": \"10.00\"}\n```";
        let value = fields_from_reply(reply);
        assert_eq!(value["supplier"], "ABC Wholesale");
        assert_eq!(value["gst"], "10.00");
    }

    #[test]
    fn test_unparseable_reply_goes_under_raw() {
        let value = fields_from_reply("Sorry, I could not read that invoice.");
        assert_eq!(value["raw"], "Sorry, I could not read that invoice.");
    }
}
