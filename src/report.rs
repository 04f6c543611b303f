//! Text rendering for BAS results
//!
//! All figures shown to the user are rendered here from exact decimals.

use crate::models::{round_cents, BasSummary, BatchSummary, ClassificationLabel, InvoiceData, NetPosition};
use rust_decimal::Decimal;

/// `$1,234.50` / `-$10.00`, rounded to cents.
pub fn format_money(value: Decimal) -> String {
    let rounded = round_cents(value);
    let negative = rounded.is_sign_negative() && !rounded.is_zero();
    let plain = rounded.abs().to_string();
    let (whole, cents) = plain.split_once('.').unwrap_or((plain.as_str(), "00"));

    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (i, ch) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    format!("{}${}.{}", if negative { "-" } else { "" }, grouped, cents)
}

pub fn position_sentence(summary: &BasSummary) -> &'static str {
    match summary.position() {
        NetPosition::Owing => "You'll likely owe GST this period.",
        NetPosition::Refund => "You're due a GST refund this period.",
        NetPosition::Balanced => "Your GST collected and paid are balanced this period.",
    }
}

/// The three headline figures as a markdown list.
pub fn render_figures(summary: &BasSummary) -> String {
    format!(
        "- GST Collected: {}\n- GST Paid: {}\n- Net BAS Position: {}",
        format_money(summary.gst_collected),
        format_money(summary.gst_paid),
        format_money(summary.net_liability)
    )
}

fn or_dash(value: &Option<String>) -> &str {
    value.as_deref().filter(|s| !s.trim().is_empty()).unwrap_or("—")
}

fn money_or_dash(value: Option<Decimal>) -> String {
    value.map(format_money).unwrap_or_else(|| "—".to_string())
}

/// Invoice fields plus validation findings, for detailed replies.
pub fn render_invoice_details(data: &InvoiceData, label: ClassificationLabel) -> String {
    let record = &data.record;
    let validation = &data.validation;

    let mut out = String::new();
    out.push_str("### Invoice\n\n");
    out.push_str(&format!("- Supplier: {}\n", or_dash(&record.supplier_name)));
    out.push_str(&format!(
        "- ABN: {} ({})\n",
        or_dash(&record.abn),
        if validation.abn_valid { "valid" } else { "not valid" }
    ));
    out.push_str(&format!("- Date: {}\n", or_dash(&record.date)));
    out.push_str(&format!("- Bill to: {}\n", or_dash(&record.bill_to)));
    out.push_str(&format!("- Amount ex GST: {}\n", money_or_dash(record.amount_ex_gst)));
    out.push_str(&format!("- GST: {}\n", money_or_dash(record.gst)));
    out.push_str(&format!("- Total: {}\n", money_or_dash(record.total)));
    out.push_str(&format!(
        "- Treated as: {}\n",
        match label {
            ClassificationLabel::Purchase => "purchase (GST paid)",
            ClassificationLabel::Sale => "sale (GST collected)",
        }
    ));

    if validation.warnings.is_empty() {
        out.push_str("\nAll checks passed.\n");
    } else {
        out.push_str("\n**Warnings**\n");
        for warning in &validation.warnings {
            out.push_str(&format!("- {}\n", warning));
        }
    }

    out
}

/// Summary text for a batch of invoices.
pub fn render_batch(aggregate: &BatchSummary, failed: usize) -> String {
    let mut out = String::from("📦 **Batch Summary**\n");
    out.push_str(&format!("- Invoices Processed: {}\n", aggregate.invoice_count));
    if failed > 0 {
        out.push_str(&format!("- Invoices With Errors: {}\n", failed));
    }
    out.push_str(&render_figures(&aggregate.summary));
    out.push_str(&format!("\n\n💬 {}\n\n", position_sentence(&aggregate.summary)));
    out.push_str("Would you like me to compare suppliers or forecast the next BAS?");
    out
}

/// Everything up to and including the first sentence terminator.
pub fn first_sentence(text: &str) -> String {
    let trimmed = text.trim();
    let mut chars = trimmed.char_indices().peekable();
    while let Some((i, ch)) = chars.next() {
        if matches!(ch, '.' | '!' | '?') {
            let boundary = chars.peek().map_or(true, |(_, next)| next.is_whitespace());
            if boundary {
                return trimmed[..i + ch.len_utf8()].to_string();
            }
        }
    }
    trimmed.to_string()
}
