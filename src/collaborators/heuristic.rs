//! Keyword-anchored regex field extraction
//!
//! Offline stand-in for the LLM extractor. Emits the same loosely keyed map an
//! LLM would, and leaves canonicalization to the normalizer.

use crate::collaborators::FieldExtractor;
use crate::Result;
use regex::Regex;
use serde_json::{Map, Value};

const MONEY: &str = r"(\(?-?\s*(?:A?\$|AUD)?\s*-?\d[\d,]*(?:\.\d+)?\)?|n/?a|nil|tbc)";

lazy_static::lazy_static! {
    static ref ABN_RE: Regex = Regex::new(r"(?i)\bA\.?B\.?N\.?\s*[:#]?\s*((?:\d[ \t]*){11})").unwrap();
    static ref DATE_RE: Regex =
        Regex::new(r"(?im)^\s*(?:invoice\s+|issue\s+)?date(?:\s+issued)?\s*[:\-]?\s*(\S.*?)\s*$").unwrap();
    static ref SUBTOTAL_RE: Regex = Regex::new(&format!(
        r"(?im)^\s*(?:sub\s*-?\s*total|amount\s+ex(?:cl(?:uding)?)?\.?\s+gst)\s*[:\-]?\s*{}\s*$",
        MONEY
    ))
    .unwrap();
    static ref GST_RE: Regex = Regex::new(&format!(
        r"(?im)^\s*(?:total\s+)?gst(?:\s*\(?\s*10\s*%\s*\)?)?(?:\s+amount)?\s*[:\-]?\s*{}\s*$",
        MONEY
    ))
    .unwrap();
    static ref TOTAL_RE: Regex = Regex::new(&format!(
        r"(?im)^\s*(?:total|amount\s+due|balance\s+due)(?:\s*\(?\s*inc(?:l(?:uding)?)?\.?\s+gst\s*\)?)?\s*[:\-]?\s*{}\s*$",
        MONEY
    ))
    .unwrap();
    static ref SUPPLIER_RE: Regex = Regex::new(r"(?i)^\s*(?:from|supplier|seller)\s*:\s*(\S.*?)\s*$").unwrap();
    static ref BILL_TO_RE: Regex =
        Regex::new(r"(?i)^\s*(?:bill(?:ed)?\s+to|invoice\s+to|customer)\s*:?\s*(.*?)\s*$").unwrap();
    static ref HEADER_RE: Regex = Regex::new(r"(?i)^\s*(?:tax\s+)?invoice\b").unwrap();
}

#[derive(Debug, Clone, Default)]
pub struct HeuristicFieldExtractor;

impl HeuristicFieldExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Synchronous extraction, exposed for callers without a runtime.
    pub fn extract(&self, text: &str) -> Map<String, Value> {
        let mut fields = Map::new();

        let mut put = |key: &str, value: Option<String>| {
            if let Some(v) = value {
                fields.insert(key.to_string(), Value::String(v));
            }
        };

        put("supplier", extract_supplier(text));
        put(
            "abn",
            ABN_RE.captures(text).map(|c| c[1].trim().to_string()),
        );
        put("date", DATE_RE.captures(text).map(|c| c[1].to_string()));
        put("subtotal", last_capture(&SUBTOTAL_RE, text));
        put("gst", last_capture(&GST_RE, text));
        put("total", last_capture(&TOTAL_RE, text));
        put("bill_to", extract_bill_to(text));

        fields
    }
}

#[async_trait::async_trait]
impl FieldExtractor for HeuristicFieldExtractor {
    fn name(&self) -> &'static str {
        "heuristic"
    }

    async fn extract_fields(&self, text: &str) -> Result<Value> {
        Ok(Value::Object(self.extract(text)))
    }
}

/// Last match wins so a grand total beats an earlier running total.
fn last_capture(re: &Regex, text: &str) -> Option<String> {
    re.captures_iter(text).last().map(|c| c[1].trim().to_string())
}

fn extract_supplier(text: &str) -> Option<String> {
    if let Some(name) = text
        .lines()
        .find_map(|line| SUPPLIER_RE.captures(line).map(|c| c[1].to_string()))
    {
        return Some(name);
    }

    // Otherwise the letterhead: first line that is not a title or a labelled field.
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .find(|line| !HEADER_RE.is_match(line) && !line.contains(':'))
        .map(str::to_string)
}

fn extract_bill_to(text: &str) -> Option<String> {
    let mut lines = text.lines();
    while let Some(line) = lines.next() {
        let Some(caps) = BILL_TO_RE.captures(line) else {
            continue;
        };
        let inline = caps[1].trim();
        if !inline.is_empty() {
            return Some(inline.to_string());
        }
        // Label on its own line: the name follows.
        return lines
            .map(str::trim)
            .find(|l| !l.is_empty())
            .map(str::to_string);
    }
    None
}
