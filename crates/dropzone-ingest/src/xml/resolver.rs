//! Document type resolution
//!
//! The variant is chosen once, at the root, by looking for marker elements
//! among the root's direct children. Rules are checked in order and the first
//! hit wins; the filename plays no part.

use dropzone_common::types::{
    parse_date, parse_decimal, Direction, DocumentKind, Invoice, Invoices, Money, Transaction,
    Transactions,
};
use dropzone_common::XmlDocument;

use super::tree::XmlElement;
use crate::error::{IngestError, Result};

struct Rule {
    marker: &'static str,
    kind: DocumentKind,
}

const RULES: &[Rule] = &[
    Rule {
        marker: "invoice",
        kind: DocumentKind::Invoices,
    },
    Rule {
        marker: "transaction",
        kind: DocumentKind::Transactions,
    },
];

/// Pick the variant for `root` and decode the whole tree into it
pub fn resolve(root: &XmlElement) -> Result<XmlDocument> {
    let rule = RULES
        .iter()
        .find(|rule| root.has_child(rule.marker))
        .ok_or_else(|| IngestError::UnresolvedXmlType {
            root: root.name.clone(),
        })?;

    match rule.kind {
        DocumentKind::Invoices => decode_invoices(root, rule.marker).map(XmlDocument::from),
        DocumentKind::Transactions => {
            decode_transactions(root, rule.marker).map(XmlDocument::from)
        },
    }
}

fn decode_invoices(root: &XmlElement, marker: &str) -> Result<Invoices> {
    let invoices = root
        .children_named(marker)
        .enumerate()
        .map(|(idx, el)| decode_invoice(el, &record_path(marker, idx)))
        .collect::<Result<Vec<_>>>()?;

    Ok(Invoices { invoices })
}

fn decode_invoice(el: &XmlElement, path: &str) -> Result<Invoice> {
    let amount = required_text(el, path, "amount")?;

    Ok(Invoice {
        id: required_text(el, path, "id")?.to_string(),
        amount: parse_decimal(amount)
            .map_err(|e| IngestError::invalid_field(field_path(path, "amount"), e))?,
        currency: required_text(el, path, "currency")?.to_string(),
    })
}

fn decode_transactions(root: &XmlElement, marker: &str) -> Result<Transactions> {
    let transactions = root
        .children_named(marker)
        .enumerate()
        .map(|(idx, el)| decode_transaction(el, &record_path(marker, idx)))
        .collect::<Result<Vec<_>>>()?;

    Ok(Transactions { transactions })
}

fn decode_transaction(el: &XmlElement, path: &str) -> Result<Transaction> {
    let posting_date = required_text(el, path, "postingDate")?;
    let direction = required_text(el, path, "direction")?;

    Ok(Transaction {
        id: required_text(el, path, "id")?.to_string(),
        posting_date: parse_date(posting_date)
            .map_err(|e| IngestError::invalid_field(field_path(path, "postingDate"), e))?,
        amount: decode_money(el, path)?,
        direction: direction
            .parse::<Direction>()
            .map_err(|e| IngestError::invalid_field(field_path(path, "direction"), e))?,
        reference: required_text(el, path, "reference")?.to_string(),
        counterparty: required_text(el, path, "counterparty")?.to_string(),
    })
}

/// `<amount Ccy="EUR">1450.00</amount>`
fn decode_money(el: &XmlElement, path: &str) -> Result<Money> {
    let amount_path = field_path(path, "amount");
    let amount = el
        .child("amount")
        .ok_or_else(|| IngestError::invalid_field(amount_path.as_str(), "missing"))?;

    let currency = amount
        .attribute("Ccy")
        .map(str::trim)
        .ok_or_else(|| IngestError::invalid_field(amount_path.as_str(), "missing Ccy attribute"))?;
    let value = parse_decimal(&amount.text)
        .map_err(|e| IngestError::invalid_field(amount_path.as_str(), e))?;

    Ok(Money::new(currency, value))
}

fn required_text<'a>(el: &'a XmlElement, path: &str, name: &str) -> Result<&'a str> {
    el.child(name)
        .map(|child| child.text.trim())
        .ok_or_else(|| IngestError::invalid_field(field_path(path, name), "missing"))
}

fn record_path(marker: &str, idx: usize) -> String {
    format!("{}[{}]", marker, idx)
}

fn field_path(record: &str, field: &str) -> String {
    format!("{}/{}", record, field)
}
