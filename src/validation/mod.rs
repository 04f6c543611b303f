//! Invoice validation
//!
//! Rules-based checks over a normalized invoice record.
//! Every finding is a warning; nothing here aborts the pipeline.

pub mod abn;

pub use abn::validate_abn;

use crate::models::{InvoiceRecord, ValidationResult};
use rust_decimal::Decimal;
use tracing::debug;

/// Canonical fields that must be present for `fields_ok`.
pub const REQUIRED_FIELDS: &[&str] = &["supplier_name", "abn", "date", "amount_ex_gst", "gst", "total"];

/// Trait for a single validation rule
pub trait InvoiceRule: Send + Sync {
    fn name(&self) -> &'static str;

    /// Warnings raised by this rule; empty means the rule passed.
    fn check(&self, record: &InvoiceRecord) -> Vec<String>;
}

/// Runs every rule and accumulates warnings in rule order
pub struct ValidationEngine {
    rules: Vec<Box<dyn InvoiceRule>>,
}

impl ValidationEngine {
    pub fn new() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn add_rule(&mut self, rule: Box<dyn InvoiceRule>) {
        self.rules.push(rule);
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    pub fn validate(&self, record: &InvoiceRecord) -> ValidationResult {
        let mut warnings = Vec::new();

        for rule in &self.rules {
            let found = rule.check(record);
            if !found.is_empty() {
                debug!(rule = rule.name(), ?found, "Validation rule raised warnings");
            }
            warnings.extend(found);
        }

        let abn_valid = record.abn.as_deref().map(validate_abn).unwrap_or(false);

        ValidationResult {
            abn_valid,
            fields_ok: missing_fields(record).is_empty(),
            warnings,
        }
    }
}

impl Default for ValidationEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Required fields that are absent or blank, in declaration order.
pub fn missing_fields(record: &InvoiceRecord) -> Vec<&'static str> {
    REQUIRED_FIELDS
        .iter()
        .copied()
        .filter(|field| !field_present(record, field))
        .collect()
}

fn field_present(record: &InvoiceRecord, field: &str) -> bool {
    let text_present = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.trim().is_empty());
    match field {
        "supplier_name" => text_present(&record.supplier_name),
        "abn" => text_present(&record.abn),
        "date" => text_present(&record.date),
        "amount_ex_gst" => record.amount_ex_gst.is_some(),
        "gst" => record.gst.is_some(),
        "total" => record.total.is_some(),
        "bill_to" => text_present(&record.bill_to),
        _ => false,
    }
}

//
// ========== Rules ==========
//

/// Rule: ABN, when given, must pass the modulus-89 checksum
pub struct AbnChecksumRule;

impl InvoiceRule for AbnChecksumRule {
    fn name(&self) -> &'static str {
        "abn_checksum"
    }

    fn check(&self, record: &InvoiceRecord) -> Vec<String> {
        match record.abn.as_deref() {
            Some(abn) if !abn.trim().is_empty() && !validate_abn(abn) => {
                vec!["Invalid ABN".to_string()]
            }
            _ => Vec::new(),
        }
    }
}

/// Rule: all required fields present
pub struct RequiredFieldsRule;

impl InvoiceRule for RequiredFieldsRule {
    fn name(&self) -> &'static str {
        "required_fields"
    }

    fn check(&self, record: &InvoiceRecord) -> Vec<String> {
        missing_fields(record)
            .into_iter()
            .map(|field| format!("Missing {}", field))
            .collect()
    }
}

/// Rule: numeric fields that arrived as text the normalizer could not read
pub struct UnparseableAmountRule;

impl InvoiceRule for UnparseableAmountRule {
    fn name(&self) -> &'static str {
        "unparseable_amount"
    }

    fn check(&self, record: &InvoiceRecord) -> Vec<String> {
        record
            .unparsed_fields
            .iter()
            .map(|field| format!("Unparseable {}", field))
            .collect()
    }
}

/// Rule: GST can never exceed the invoice total
pub struct GstWithinTotalRule;

impl InvoiceRule for GstWithinTotalRule {
    fn name(&self) -> &'static str {
        "gst_within_total"
    }

    fn check(&self, record: &InvoiceRecord) -> Vec<String> {
        match (record.gst, record.total) {
            (Some(gst), Some(total)) if gst > total => vec!["GST exceeds total".to_string()],
            _ => Vec::new(),
        }
    }
}

/// Rule: total ≈ amount ex GST + GST, within a fixed tolerance
pub struct TotalConsistencyRule {
    tolerance: Decimal,
}

impl TotalConsistencyRule {
    pub fn new(tolerance: Decimal) -> Self {
        Self {
            tolerance: tolerance.abs(),
        }
    }
}

impl InvoiceRule for TotalConsistencyRule {
    fn name(&self) -> &'static str {
        "total_consistency"
    }

    fn check(&self, record: &InvoiceRecord) -> Vec<String> {
        let consistent = match (record.amount_ex_gst, record.gst, record.total) {
            // A difference outside the decimal range is never within tolerance.
            (Some(ex), Some(gst), Some(total)) => ex
                .checked_add(gst)
                .and_then(|sum| sum.checked_sub(total))
                .is_some_and(|diff| diff.abs() <= self.tolerance),
            _ => true,
        };

        if consistent {
            Vec::new()
        } else {
            vec!["Total does not equal amount ex GST plus GST".to_string()]
        }
    }
}

/// Create a validation engine with the standard rule set
pub fn create_default_validation_engine(total_tolerance: Decimal) -> ValidationEngine {
    let mut engine = ValidationEngine::new();
    engine.add_rule(Box::new(RequiredFieldsRule));
    engine.add_rule(Box::new(UnparseableAmountRule));
    engine.add_rule(Box::new(GstWithinTotalRule));
    engine.add_rule(Box::new(TotalConsistencyRule::new(total_tolerance)));
    engine.add_rule(Box::new(AbnChecksumRule));
    engine
}

//
// ================= Tests =================
//
