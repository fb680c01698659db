use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};

use crate::cart::CartLine;
use crate::escpos::{EscPosBuilder, PaperWidth};
use crate::formatting::format_idr;
use crate::models::{PaymentMethod, TransactionId, TransactionRecord};

const FOOTER: &str = "*** TERIMA KASIH ***";
const DATE_FORMAT: &str = "%d/%m/%Y %H:%M";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ShopHeader {
    pub name: String,
    #[serde(default)]
    pub address: Option<String>,
}

impl Default for ShopHeader {
    fn default() -> Self {
        Self {
            name: "PIPITI".to_string(),
            address: Some("Jl. Contoh No. 123, Jakarta".to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ReceiptLine {
    pub name: String,
    pub quantity: i64,
    pub price: i64,
    pub subtotal: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ReceiptDoc {
    #[serde(default)]
    pub shop: ShopHeader,
    pub transaction_id: TransactionId,
    /// Already formatted for display in the shop's local time.
    pub date: String,
    #[serde(default)]
    pub lines: Vec<ReceiptLine>,
    pub total: i64,
    pub payment: i64,
    pub change: i64,
    #[serde(default)]
    pub method: PaymentMethod,
}

impl ReceiptDoc {
    /// Receipt for a sale just completed. Names and unit prices come from the
    /// cart lines that were submitted.
    pub fn from_sale(record: &TransactionRecord, lines: &[CartLine], shop: ShopHeader) -> Self {
        Self {
            shop,
            transaction_id: record.id,
            date: format_receipt_date(record.created_at),
            lines: lines
                .iter()
                .map(|l| ReceiptLine {
                    name: l.item.name.clone(),
                    quantity: l.quantity,
                    price: l.item.price,
                    subtotal: l.subtotal(),
                })
                .collect(),
            total: record.total,
            payment: record.payment,
            change: record.change,
            method: record.method(),
        }
    }

    /// Receipt re-printed from history. Uses `price_at_time`.
    pub fn from_record(record: &TransactionRecord, shop: ShopHeader) -> Self {
        Self {
            shop,
            transaction_id: record.id,
            date: format_receipt_date(record.created_at),
            lines: record
                .items
                .iter()
                .map(|l| ReceiptLine {
                    name: l.display_name(),
                    quantity: l.quantity,
                    price: l.price_at_time,
                    subtotal: l.line_total(),
                })
                .collect(),
            total: record.total,
            payment: record.payment,
            change: record.change,
            method: record.method(),
        }
    }
}

pub fn format_receipt_date(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local).format(DATE_FORMAT).to_string()
}

// ---------------------------------------------------------------------------
// Layout
// ---------------------------------------------------------------------------

/// One printed row; shared by the text and ESC/POS outputs so both agree.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Row {
    Title(String),
    Centered(String),
    Text(String),
    Rule,
    Pair { label: String, value: String, bold: bool },
}

fn wrap(text: &str, width: usize) -> Vec<String> {
    let mut out = Vec::new();
    let mut line = String::new();
    for token in text.split_whitespace() {
        if line.is_empty() {
            line.push_str(token);
            continue;
        }
        let next_len = line.chars().count() + 1 + token.chars().count();
        if next_len > width.max(8) {
            out.push(line);
            line = token.to_string();
        } else {
            line.push(' ');
            line.push_str(token);
        }
    }
    if !line.is_empty() {
        out.push(line);
    }
    if out.is_empty() {
        out.push(String::new());
    }
    out
}

fn layout(doc: &ReceiptDoc, width: usize) -> Vec<Row> {
    let mut rows = vec![Row::Title(doc.shop.name.clone())];
    if let Some(address) = doc
        .shop
        .address
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        rows.extend(wrap(address, width).into_iter().map(Row::Centered));
    }
    rows.push(Row::Centered(format!("Tanggal: {}", doc.date)));
    rows.push(Row::Centered(format!("No. Transaksi: {}", doc.transaction_id)));
    rows.push(Row::Rule);

    for line in &doc.lines {
        rows.extend(wrap(&line.name, width).into_iter().map(Row::Text));
        rows.push(Row::Pair {
            label: format!("  {} x {}", line.quantity, format_idr(line.price)),
            value: format_idr(line.subtotal),
            bold: false,
        });
    }
    rows.push(Row::Rule);

    let totals = [
        ("Total", format_idr(doc.total)),
        ("Bayar", format_idr(doc.payment)),
        ("Kembali", format_idr(doc.change)),
        ("Metode", doc.method.to_string()),
    ];
    for (label, value) in totals {
        rows.push(Row::Pair {
            label: label.to_string(),
            value,
            bold: true,
        });
    }
    rows.push(Row::Rule);
    rows.push(Row::Title(FOOTER.to_string()));
    rows
}

fn pad_pair(label: &str, value: &str, width: usize) -> String {
    let gap = width
        .saturating_sub(label.chars().count() + value.chars().count())
        .max(1);
    format!("{label}{}{value}", " ".repeat(gap))
}

fn center(text: &str, width: usize) -> String {
    let len = text.chars().count();
    if len >= width {
        return text.to_string();
    }
    format!("{}{text}", " ".repeat((width - len) / 2))
}

// ---------------------------------------------------------------------------
// Outputs
// ---------------------------------------------------------------------------

/// Monospace plain-text receipt, one row per line.
pub fn render_text(doc: &ReceiptDoc, paper: PaperWidth) -> String {
    let width = paper.chars();
    let mut out = String::new();
    for row in layout(doc, width) {
        let line = match row {
            Row::Title(t) | Row::Centered(t) => center(&t, width),
            Row::Text(t) => t,
            Row::Rule => "=".repeat(width),
            Row::Pair { label, value, .. } => pad_pair(&label, &value, width),
        };
        out.push_str(line.trim_end());
        out.push('\n');
    }
    out
}

/// ESC/POS bytes for a thermal printer, ending with a partial cut.
pub fn render_escpos(doc: &ReceiptDoc, paper: PaperWidth) -> Vec<u8> {
    let width = paper.chars();
    let mut builder = EscPosBuilder::new().with_paper(paper);
    builder.init();
    for row in layout(doc, width) {
        match row {
            Row::Title(t) => {
                builder
                    .center()
                    .bold(true)
                    .double_height()
                    .text(&t)
                    .lf()
                    .normal_size()
                    .bold(false)
                    .left();
            }
            Row::Centered(t) => {
                builder.center().text(&t).lf().left();
            }
            Row::Text(t) => {
                builder.text(&t).lf();
            }
            Row::Rule => {
                builder.rule('=');
            }
            Row::Pair { label, value, bold } => {
                builder.bold(bold).line_pair(&label, &value).bold(false);
            }
        }
    }
    builder.feed(3).cut();
    builder.build()
}
