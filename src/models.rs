//! Core data models for the BAS assistant

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;

//
// ================= Enums =================
//

/// Which side of the transaction this business sits on for one invoice.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum ClassificationLabel {
    /// This business bought something: GST paid.
    Purchase,
    /// This business sold something: GST collected.
    Sale,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Verbosity {
    #[default]
    Concise,
    Detailed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum InteractionMode {
    Chat,
    Invoice,
}

/// Sign of the net liability.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NetPosition {
    Owing,
    Refund,
    Balanced,
}

//
// ================= Invoice =================
//

/// Canonical invoice record produced by the normalizer.
///
/// Absent fields stay `None`; nothing is coerced to zero before validation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct InvoiceRecord {
    pub supplier_name: Option<String>,
    pub abn: Option<String>,
    pub date: Option<String>,
    pub amount_ex_gst: Option<Decimal>,
    pub gst: Option<Decimal>,
    pub total: Option<Decimal>,
    pub bill_to: Option<String>,
    /// Canonical names of numeric fields whose value was present but not a number.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unparsed_fields: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ValidationResult {
    pub abn_valid: bool,
    pub fields_ok: bool,
    pub warnings: Vec<String>,
}

/// Invoice record plus its validation outcome, as handed to the transport layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceData {
    #[serde(flatten)]
    pub record: InvoiceRecord,
    #[serde(flatten)]
    pub validation: ValidationResult,
}

//
// ================= BAS =================
//

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BasSummary {
    pub gst_collected: Decimal,
    pub gst_paid: Decimal,
    pub net_liability: Decimal,
}

impl BasSummary {
    pub fn zero() -> Self {
        Self::default()
    }

    pub fn from_totals(gst_collected: Decimal, gst_paid: Decimal) -> Self {
        Self {
            gst_collected,
            gst_paid,
            net_liability: gst_collected - gst_paid,
        }
    }

    /// Fold another summary into this one. Exact, so order never matters.
    /// `None` if a total leaves the decimal range.
    pub fn checked_combine(&self, other: &BasSummary) -> Option<Self> {
        let gst_collected = self.gst_collected.checked_add(other.gst_collected)?;
        let gst_paid = self.gst_paid.checked_add(other.gst_paid)?;
        Some(Self {
            gst_collected,
            gst_paid,
            net_liability: gst_collected.checked_sub(gst_paid)?,
        })
    }

    /// Presentation copy rounded to cents. Never feed this back into sums.
    pub fn rounded(&self) -> Self {
        Self {
            gst_collected: round_cents(self.gst_collected),
            gst_paid: round_cents(self.gst_paid),
            net_liability: round_cents(self.net_liability),
        }
    }

    pub fn position(&self) -> NetPosition {
        if self.net_liability > Decimal::ZERO {
            NetPosition::Owing
        } else if self.net_liability < Decimal::ZERO {
            NetPosition::Refund
        } else {
            NetPosition::Balanced
        }
    }
}

/// Round to 2 dp, half away from zero, keeping the scale at exactly 2.
pub fn round_cents(value: Decimal) -> Decimal {
    let mut rounded = value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(2);
    rounded
}

//
// ================= Reports =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceReport {
    pub invoice_data: InvoiceData,
    pub bas_summary: BasSummary,
    pub classification: ClassificationLabel,
    pub explanation: String,
    pub stage_trace: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSummary {
    #[serde(flatten)]
    pub summary: BasSummary,
    pub invoice_count: usize,
}

/// One row of a batch, in input order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceResult {
    pub index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub fingerprint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classification: Option<ClassificationLabel>,
    pub bas_summary: BasSummary,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    pub aggregate_summary: BatchSummary,
    pub per_invoice_results: Vec<InvoiceResult>,
    pub response: String,
}

//
// ================= Conversation I/O =================
//

/// A document attached to a conversational turn, already reduced to text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceDocument {
    #[serde(default)]
    pub source: Option<String>,
    pub text: String,
}

impl InvoiceDocument {
    pub fn new(source: Option<String>, text: impl Into<String>) -> Self {
        Self {
            source,
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnResponse {
    pub response: String,
    pub mode: InteractionMode,
    pub verbosity: Verbosity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bas_summary: Option<BasSummary>,
}

impl fmt::Display for ClassificationLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ClassificationLabel::Purchase => "PURCHASE",
            ClassificationLabel::Sale => "SALE",
        };
        write!(f, "{}", s)
    }
}

impl fmt::Display for Verbosity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Verbosity::Concise => "concise",
            Verbosity::Detailed => "detailed",
        };
        write!(f, "{}", s)
    }
}
