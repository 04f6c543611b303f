//! Field normalizer
//!
//! Turns whatever the field extractor produced into a canonical
//! [`InvoiceRecord`]. Key-name variance is handled by one ordered alias table;
//! call sites never special-case key names.

use crate::error::BasError;
use crate::models::InvoiceRecord;
use crate::Result;
use rust_decimal::Decimal;
use serde_json::{Map, Value};
use std::str::FromStr;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CanonicalField {
    SupplierName,
    Abn,
    Date,
    AmountExGst,
    Gst,
    Total,
    BillTo,
}

impl CanonicalField {
    pub fn name(&self) -> &'static str {
        match self {
            CanonicalField::SupplierName => "supplier_name",
            CanonicalField::Abn => "abn",
            CanonicalField::Date => "date",
            CanonicalField::AmountExGst => "amount_ex_gst",
            CanonicalField::Gst => "gst",
            CanonicalField::Total => "total",
            CanonicalField::BillTo => "bill_to",
        }
    }

    fn is_numeric(&self) -> bool {
        matches!(
            self,
            CanonicalField::AmountExGst | CanonicalField::Gst | CanonicalField::Total
        )
    }
}

/// Accepted key names per canonical field, most preferred first.
/// The canonical name always comes first so canonical payloads round-trip.
const FIELD_ALIASES: &[(CanonicalField, &[&str])] = &[
    (
        CanonicalField::SupplierName,
        &["supplier_name", "supplier", "vendor", "vendor_name", "seller", "business_name", "from"],
    ),
    (CanonicalField::Abn, &["abn", "supplier_abn", "abn_number"]),
    (CanonicalField::Date, &["date", "invoice_date", "issue_date", "date_issued"]),
    (
        CanonicalField::AmountExGst,
        &["amount_ex_gst", "subtotal", "sub_total", "amount_excl_gst", "net_amount"],
    ),
    (CanonicalField::Gst, &["gst", "gst_amount", "tax", "tax_amount"]),
    (
        CanonicalField::Total,
        &["total", "total_amount", "amount_due", "grand_total", "amount_inc_gst"],
    ),
    (
        CanonicalField::BillTo,
        &["bill_to", "billed_to", "bill_to_name", "buyer", "customer"],
    ),
];

/// Keys under which the extractor may embed a second, JSON-encoded payload.
const RAW_BLOB_KEYS: &[&str] = &["raw", "raw_response"];

/// Reconciles key aliases and currency formatting into canonical records
#[derive(Debug, Clone, Default)]
pub struct FieldNormalizer;

impl FieldNormalizer {
    pub fn new() -> Self {
        Self
    }

    /// Normalize one raw field map.
    ///
    /// Fails only when `raw` is not a JSON object. Field-level problems are
    /// left as absent values (and `unparsed_fields`) for validation to report.
    pub fn normalize(&self, raw: &Value) -> Result<InvoiceRecord> {
        let map = raw.as_object().ok_or_else(|| {
            BasError::Structural(format!(
                "expected extracted fields as a JSON object, got {}",
                value_kind(raw)
            ))
        })?;

        let mut record = normalize_map(map);

        if let Some(embedded) = embedded_payload(map) {
            let secondary = normalize_map(&embedded);
            merge_missing(&mut record, secondary);
        }

        debug!(
            supplier = ?record.supplier_name,
            gst = ?record.gst,
            unparsed = ?record.unparsed_fields,
            "Normalized invoice fields"
        );

        Ok(record)
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn normalize_map(map: &Map<String, Value>) -> InvoiceRecord {
    let mut record = InvoiceRecord::default();

    for (field, aliases) in FIELD_ALIASES {
        let mut unparsed = false;

        for alias in aliases.iter() {
            let Some(value) = lookup(map, alias) else {
                continue;
            };

            if field.is_numeric() {
                match money_value(value) {
                    MoneyValue::Amount(amount) => {
                        set_amount(&mut record, *field, amount);
                        unparsed = false;
                        break;
                    }
                    MoneyValue::Unparseable => unparsed = true,
                    MoneyValue::Empty => {}
                }
            } else if let Some(text) = text_value(value) {
                set_text(&mut record, *field, text);
                break;
            }
        }

        if unparsed {
            record.unparsed_fields.push(field.name().to_string());
        }
    }

    record
}

/// Exact key first, then a case/separator-insensitive match.
fn lookup<'a>(map: &'a Map<String, Value>, alias: &str) -> Option<&'a Value> {
    if let Some(value) = map.get(alias) {
        return Some(value);
    }
    map.iter()
        .find(|(key, _)| normalize_key(key) == alias)
        .map(|(_, value)| value)
}

fn normalize_key(key: &str) -> String {
    key.trim()
        .to_lowercase()
        .chars()
        .map(|c| if c == ' ' || c == '-' { '_' } else { c })
        .collect()
}

fn text_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

enum MoneyValue {
    Amount(Decimal),
    Empty,
    Unparseable,
}

fn money_value(value: &Value) -> MoneyValue {
    match value {
        Value::Null => MoneyValue::Empty,
        Value::Number(n) => parse_number_literal(&n.to_string())
            .map(MoneyValue::Amount)
            .unwrap_or(MoneyValue::Unparseable),
        Value::String(s) if s.trim().is_empty() => MoneyValue::Empty,
        Value::String(s) => parse_money(s)
            .map(MoneyValue::Amount)
            .unwrap_or(MoneyValue::Unparseable),
        _ => MoneyValue::Unparseable,
    }
}

fn parse_number_literal(literal: &str) -> Option<Decimal> {
    Decimal::from_str(literal)
        .or_else(|_| Decimal::from_scientific(literal))
        .ok()
}

/// Parse a currency-looking string into an exact decimal.
///
/// Strips `$`, `A$`/`AUD`, thousands separators and whitespace. Accounting
/// negatives written as `(12.50)` are accepted. Returns `None` for anything
/// that still is not a number afterwards ("n/a", "TBC", "").
pub fn parse_money(input: &str) -> Option<Decimal> {
    let mut cleaned: String = input
        .trim()
        .trim_start_matches("AUD")
        .trim_end_matches("AUD")
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ',' && *c != '$')
        .collect();

    if let Some(stripped) = cleaned.strip_prefix('A') {
        cleaned = stripped.to_string();
    }

    let negative = cleaned.starts_with('(') && cleaned.ends_with(')');
    if negative {
        cleaned = cleaned[1..cleaned.len() - 1].to_string();
    }

    if cleaned.is_empty()
        || !cleaned
            .chars()
            .all(|c| c.is_ascii_digit() || c == '.' || c == '-' || c == '+')
    {
        return None;
    }

    let amount = Decimal::from_str(&cleaned).ok()?;
    Some(if negative { -amount } else { amount })
}

fn set_amount(record: &mut InvoiceRecord, field: CanonicalField, amount: Decimal) {
    match field {
        CanonicalField::AmountExGst => record.amount_ex_gst = Some(amount),
        CanonicalField::Gst => record.gst = Some(amount),
        CanonicalField::Total => record.total = Some(amount),
        _ => {}
    }
}

fn set_text(record: &mut InvoiceRecord, field: CanonicalField, text: String) {
    match field {
        CanonicalField::SupplierName => record.supplier_name = Some(text),
        CanonicalField::Abn => record.abn = Some(text),
        CanonicalField::Date => record.date = Some(text),
        CanonicalField::BillTo => record.bill_to = Some(text),
        _ => {}
    }
}

/// Decode an embedded payload under one of the raw keys, if it parses.
fn embedded_payload(map: &Map<String, Value>) -> Option<Map<String, Value>> {
    RAW_BLOB_KEYS.iter().find_map(|key| match map.get(*key)? {
        Value::Object(inner) => Some(inner.clone()),
        Value::String(blob) => match parse_json_object(blob) {
            Some(inner) => Some(inner),
            None => {
                debug!(key = *key, "Dropping unparseable embedded payload");
                None
            }
        },
        _ => None,
    })
}

/// Parse the outermost `{ ... }` span of a string as a JSON object.
pub fn parse_json_object(text: &str) -> Option<Map<String, Value>> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    match serde_json::from_str::<Value>(&text[start..=end]).ok()? {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

/// Fill absent fields from the embedded record; present fields win.
fn merge_missing(record: &mut InvoiceRecord, embedded: InvoiceRecord) {
    fn fill<T>(slot: &mut Option<T>, other: Option<T>) {
        if slot.is_none() {
            *slot = other;
        }
    }

    fill(&mut record.supplier_name, embedded.supplier_name);
    fill(&mut record.abn, embedded.abn);
    fill(&mut record.date, embedded.date);
    fill(&mut record.amount_ex_gst, embedded.amount_ex_gst);
    fill(&mut record.gst, embedded.gst);
    fill(&mut record.total, embedded.total);
    fill(&mut record.bill_to, embedded.bill_to);

    let snapshot = record.clone();
    record.unparsed_fields.retain(|name| match name.as_str() {
        "amount_ex_gst" => snapshot.amount_ex_gst.is_none(),
        "gst" => snapshot.gst.is_none(),
        "total" => snapshot.total.is_none(),
        _ => true,
    });
    for name in embedded.unparsed_fields {
        let still_missing = match name.as_str() {
            "amount_ex_gst" => record.amount_ex_gst.is_none(),
            "gst" => record.gst.is_none(),
            "total" => record.total.is_none(),
            _ => false,
        };
        if still_missing && !record.unparsed_fields.contains(&name) {
            record.unparsed_fields.push(name);
        }
    }
}
