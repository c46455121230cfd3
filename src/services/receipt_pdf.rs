//! Minimal single-page PDF receipt for a settled invoice.
//!
//! The document is assembled by hand (header, five objects, xref, trailer)
//! with an uncompressed text content stream. Enough for a downloadable
//! receipt; layout stays intentionally plain.

use chrono::{DateTime, Utc};

#[derive(Debug, Clone)]
pub struct ReceiptDetails {
    pub invoice_number: Option<String>,
    pub payment_id: String,
    pub amount: f64,
    pub currency: String,
    pub gateway_reference: String,
    pub paid_at: DateTime<Utc>,
}

pub fn render_receipt_pdf(details: &ReceiptDetails) -> Vec<u8> {
    let mut lines = vec!["Rent payment receipt".to_string(), String::new()];
    if let Some(number) = &details.invoice_number {
        lines.push(format!("Invoice: {number}"));
    }
    lines.push(format!("Payment: {}", details.payment_id));
    lines.push(format!(
        "Amount: {:.2} {}",
        details.amount, details.currency
    ));
    lines.push(format!("Reference: {}", details.gateway_reference));
    lines.push(format!(
        "Paid: {}",
        details.paid_at.format("%Y-%m-%d %H:%M UTC")
    ));

    let mut content = String::from("BT\n/F1 12 Tf\n72 770 Td\n16 TL\n");
    for (index, line) in lines.iter().enumerate() {
        if index > 0 {
            content.push_str("T*\n");
        }
        content.push('(');
        content.push_str(&escape_text(line));
        content.push_str(") Tj\n");
    }
    content.push_str("ET\n");

    let objects = [
        "<< /Type /Catalog /Pages 2 0 R >>".to_string(),
        "<< /Type /Pages /Kids [3 0 R] /Count 1 >>".to_string(),
        "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 595 842] \
         /Resources << /Font << /F1 5 0 R >> >> /Contents 4 0 R >>"
            .to_string(),
        format!(
            "<< /Length {} >>\nstream\n{}endstream",
            content.len(),
            content
        ),
        "<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica >>".to_string(),
    ];

    let mut out = String::from("%PDF-1.4\n");
    let mut offsets = Vec::with_capacity(objects.len());
    for (index, body) in objects.iter().enumerate() {
        offsets.push(out.len());
        out.push_str(&format!("{} 0 obj\n{body}\nendobj\n", index + 1));
    }

    let xref_offset = out.len();
    out.push_str(&format!("xref\n0 {}\n", objects.len() + 1));
    out.push_str("0000000000 65535 f \n");
    for offset in offsets {
        out.push_str(&format!("{offset:010} 00000 n \n"));
    }
    out.push_str(&format!(
        "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{xref_offset}\n%%EOF\n",
        objects.len() + 1
    ));

    out.into_bytes()
}

fn escape_text(raw: &str) -> String {
    raw.chars()
        .flat_map(|c| match c {
            '(' => vec!['\\', '('],
            ')' => vec!['\\', ')'],
            '\\' => vec!['\\', '\\'],
            c if c.is_ascii() => vec![c],
            _ => vec!['?'],
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn renders_a_pdf_with_the_receipt_fields() {
        let bytes = render_receipt_pdf(&ReceiptDetails {
            invoice_number: Some("INV-ABC-1234".to_string()),
            payment_id: "PAY-XYZ-9876".to_string(),
            amount: 100_000.0,
            currency: "NGN".to_string(),
            gateway_reference: "ref_123".to_string(),
            paid_at: Utc.with_ymd_and_hms(2024, 3, 10, 9, 30, 0).unwrap(),
        });
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with("%PDF-1.4"));
        assert!(text.ends_with("%%EOF\n"));
        assert!(text.contains("INV-ABC-1234"));
        assert!(text.contains("PAY-XYZ-9876"));
        assert!(text.contains("Amount: 100000.00 NGN"));
        assert!(text.contains("2024-03-10"));
    }

    #[test]
    fn escapes_parentheses_in_text() {
        assert_eq!(escape_text("a(b)c\\d"), "a\\(b\\)c\\\\d");
    }
}
