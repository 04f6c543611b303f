//! Turn classifier
//!
//! Decides, per conversational turn:
//! - Mode: INVOICE when invoice-bearing content is present, CHAT otherwise
//! - Verbosity cue: DETAILED, CONCISE, or none (keep the session's setting)
//! - Chat intent: which part of the last report a question is about
//!
//! Keyword scoring over whole words. Callers only ever see the enums.

use crate::models::{InteractionMode, Verbosity};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// What a CHAT-mode question asks about the last report.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChatIntent {
    /// Owe or refund, and how much.
    NetPosition,
    GstPaid,
    GstCollected,
    /// "what does that mean?"
    Explain,
    /// Re-render all figures.
    FullSummary,
    General,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnClassification {
    pub mode: InteractionMode,
    pub verbosity: Option<Verbosity>,
    pub intent: ChatIntent,
}

/// Phrases typical of invoice text, never of a question about one
const INVOICE_CUES: &[&str] = &[
    "tax invoice",
    "invoice no",
    "invoice number",
    "abn",
    "bill to",
    "billed to",
    "amount due",
    "balance due",
    "subtotal",
    "sub total",
    "total inc gst",
    "gst 10",
    "qty",
    "unit price",
];

/// Score at which text counts as a pasted invoice.
const INVOICE_THRESHOLD: usize = 2;

const DETAILED_CUES: &[&str] = &[
    "full",
    "detail",
    "details",
    "detailed",
    "breakdown",
    "break it down",
    "summary",
    "everything",
    "walk me through",
    "in depth",
];

const CONCISE_CUES: &[&str] = &[
    "how much",
    "quick",
    "quickly",
    "just",
    "short",
    "brief",
    "briefly",
    "only",
    "tl dr",
];

const FULL_SUMMARY_CUES: &[&str] = &[
    "full summary",
    "summary",
    "breakdown",
    "break it down",
    "everything",
    "full report",
    "all the figures",
    "all figures",
    "show me the figures",
];

const GST_PAID_CUES: &[&str] = &[
    "gst paid",
    "paid",
    "did i pay",
    "i pay",
    "purchases",
    "on purchases",
    "input tax",
    "spent",
];

const GST_COLLECTED_CUES: &[&str] = &[
    "gst collected",
    "collected",
    "collect",
    "on sales",
    "sales",
    "charged",
];

const NET_POSITION_CUES: &[&str] = &[
    "refund",
    "owe",
    "owing",
    "net",
    "position",
    "liability",
    "due",
    "how much gst",
    "bas",
];

const EXPLAIN_CUES: &[&str] = &[
    "mean",
    "means",
    "meaning",
    "explain",
    "why",
    "what does that",
    "what does it",
    "what is that",
    "is that good",
    "is that bad",
];

lazy_static::lazy_static! {
    static ref MONEY_RE: Regex = Regex::new(r"(?:A?\$|AUD)\s?\d").unwrap();
    static ref WORD_RE: Regex = Regex::new(r"[a-z0-9]+(?:'[a-z]+)?").unwrap();
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TurnClassifier;

impl TurnClassifier {
    pub fn new() -> Self {
        Self
    }

    /// A file always means INVOICE mode, whatever the message says.
    pub fn classify(&self, message: &str, has_documents: bool) -> TurnClassification {
        let words = normalized_words(message);

        let mode = if has_documents || invoice_score(message, &words) >= INVOICE_THRESHOLD {
            InteractionMode::Invoice
        } else {
            InteractionMode::Chat
        };

        TurnClassification {
            mode,
            verbosity: verbosity_cue(&words),
            intent: chat_intent(&words),
        }
    }
}

/// Lowercased words joined by single spaces and padded, so phrase matching
/// with `" {phrase} "` only ever hits whole words.
fn normalized_words(text: &str) -> String {
    let lowered = text.to_lowercase();
    let mut out = String::from(" ");
    for word in WORD_RE.find_iter(&lowered) {
        out.push_str(word.as_str());
        out.push(' ');
    }
    out
}

fn has_phrase(words: &str, phrase: &str) -> bool {
    words.contains(&format!(" {} ", phrase))
}

fn any_phrase(words: &str, phrases: &[&str]) -> bool {
    phrases.iter().any(|p| has_phrase(words, p))
}

fn invoice_score(raw: &str, words: &str) -> usize {
    let cues = INVOICE_CUES.iter().filter(|c| has_phrase(words, c)).count();
    let money = MONEY_RE.find_iter(raw).count().min(2);
    cues + money
}

fn verbosity_cue(words: &str) -> Option<Verbosity> {
    if any_phrase(words, DETAILED_CUES) {
        Some(Verbosity::Detailed)
    } else if any_phrase(words, CONCISE_CUES) {
        Some(Verbosity::Concise)
    } else {
        None
    }
}

/// First match wins, most specific first.
fn chat_intent(words: &str) -> ChatIntent {
    if any_phrase(words, FULL_SUMMARY_CUES) {
        ChatIntent::FullSummary
    } else if any_phrase(words, GST_PAID_CUES) {
        ChatIntent::GstPaid
    } else if any_phrase(words, GST_COLLECTED_CUES) {
        ChatIntent::GstCollected
    } else if any_phrase(words, NET_POSITION_CUES) {
        ChatIntent::NetPosition
    } else if any_phrase(words, EXPLAIN_CUES) {
        ChatIntent::Explain
    } else {
        ChatIntent::General
    }
}
