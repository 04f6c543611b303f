//! GST classification and BAS aggregation
//!
//! Deterministic engine. The language model never touches these numbers.

use crate::error::BasError;
use crate::models::{BasSummary, ClassificationLabel, InvoiceRecord};
use crate::Result;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Supplier-name terms that mark an invoice as something this business bought.
pub const DEFAULT_VENDOR_KEYWORDS: &[&str] = &[
    "wholesale",
    "supply",
    "supplies",
    "supplier",
    "packaging",
    "logistics",
    "produce",
    "milk",
    "roast",
    "vendor",
];

/// Business policy for purchase/sale classification.
///
/// Both lists are plain configuration; matching is case-insensitive substring.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClassifierPolicy {
    /// Names this business appears under on a bill-to line.
    pub self_identifiers: Vec<String>,
    pub vendor_keywords: Vec<String>,
}

impl ClassifierPolicy {
    pub fn new(self_identifiers: Vec<String>, vendor_keywords: Vec<String>) -> Self {
        Self {
            self_identifiers,
            vendor_keywords,
        }
    }
}

impl Default for ClassifierPolicy {
    fn default() -> Self {
        Self {
            self_identifiers: Vec::new(),
            vendor_keywords: DEFAULT_VENDOR_KEYWORDS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Classifies invoices and folds them into a BAS summary
#[derive(Debug, Clone)]
pub struct BasCalculator {
    self_identifiers: Vec<String>,
    vendor_keywords: Vec<String>,
}

impl BasCalculator {
    pub fn new(policy: &ClassifierPolicy) -> Self {
        Self {
            self_identifiers: lowered(&policy.self_identifiers),
            vendor_keywords: lowered(&policy.vendor_keywords),
        }
    }

    /// First match wins: buyer is us → purchase; supplier looks like a
    /// vendor → purchase; otherwise sale.
    pub fn classify(&self, record: &InvoiceRecord) -> ClassificationLabel {
        let bill_to = lower_or_empty(&record.bill_to);
        if contains_any(&bill_to, &self.self_identifiers) {
            return ClassificationLabel::Purchase;
        }

        let supplier = lower_or_empty(&record.supplier_name);
        if contains_any(&supplier, &self.vendor_keywords) {
            return ClassificationLabel::Purchase;
        }

        ClassificationLabel::Sale
    }

    /// Summary for a single invoice together with its label.
    pub fn estimate_one(&self, record: &InvoiceRecord) -> (ClassificationLabel, BasSummary) {
        let label = self.classify(record);
        // Unreadable GST counts as nothing in either bucket.
        let gst = record.gst.unwrap_or(Decimal::ZERO);

        let summary = match label {
            ClassificationLabel::Purchase => BasSummary::from_totals(Decimal::ZERO, gst),
            ClassificationLabel::Sale => BasSummary::from_totals(gst, Decimal::ZERO),
        };

        debug!(
            supplier = ?record.supplier_name,
            label = %label,
            gst = %gst,
            "Invoice classified"
        );

        (label, summary)
    }

    /// Exact sum over any number of invoices. Empty input gives zeros.
    ///
    /// Errors only if the sum leaves the decimal range.
    pub fn estimate(&self, records: &[InvoiceRecord]) -> Result<BasSummary> {
        records
            .iter()
            .map(|record| self.estimate_one(record).1)
            .try_fold(BasSummary::zero(), |acc, s| {
                acc.checked_combine(&s).ok_or_else(|| {
                    BasError::Structural("GST total exceeds the representable range".to_string())
                })
            })
    }
}

impl Default for BasCalculator {
    fn default() -> Self {
        Self::new(&ClassifierPolicy::default())
    }
}

fn lowered(terms: &[String]) -> Vec<String> {
    terms
        .iter()
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}

fn lower_or_empty(value: &Option<String>) -> String {
    value.as_deref().unwrap_or_default().to_lowercase()
}

fn contains_any(haystack: &str, needles: &[String]) -> bool {
    !haystack.is_empty() && needles.iter().any(|n| haystack.contains(n.as_str()))
}
