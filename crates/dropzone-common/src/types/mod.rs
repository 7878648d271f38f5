//! Typed XML document model
//!
//! Every file that makes it through the pipeline is decoded into exactly one
//! [`XmlDocument`] variant. The records here carry already-normalized values:
//! strings are trimmed, decimals keep the scale they were written with, and
//! dates are calendar dates without a time component.

use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::{Result, ValueError};

/// Polymorphic result of parsing one XML file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum XmlDocument {
    Invoices(Invoices),
    Transactions(Transactions),
}

impl XmlDocument {
    /// Which variant this document is
    pub fn kind(&self) -> DocumentKind {
        match self {
            XmlDocument::Invoices(_) => DocumentKind::Invoices,
            XmlDocument::Transactions(_) => DocumentKind::Transactions,
        }
    }

    /// Number of records carried by the document
    pub fn record_count(&self) -> usize {
        match self {
            XmlDocument::Invoices(doc) => doc.invoices.len(),
            XmlDocument::Transactions(doc) => doc.transactions.len(),
        }
    }
}

impl From<Invoices> for XmlDocument {
    fn from(doc: Invoices) -> Self {
        XmlDocument::Invoices(doc)
    }
}

impl From<Transactions> for XmlDocument {
    fn from(doc: Transactions) -> Self {
        XmlDocument::Transactions(doc)
    }
}

/// Discriminant of [`XmlDocument`], used for span tags and logs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Invoices,
    Transactions,
}

impl DocumentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentKind::Invoices => "invoices",
            DocumentKind::Transactions => "transactions",
        }
    }
}

impl std::fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Invoices
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoices {
    pub invoices: Vec<Invoice>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: String,
    pub amount: BigDecimal,
    pub currency: String,
}

// ============================================================================
// Transactions
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transactions {
    pub transactions: Vec<Transaction>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: String,
    pub posting_date: NaiveDate,
    pub amount: Money,
    pub direction: Direction,
    pub reference: String,
    pub counterparty: String,
}

/// Amount with its currency, as carried by `<amount Ccy="EUR">1450.00</amount>`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Money {
    pub currency_code: String,
    pub value: BigDecimal,
}

impl Money {
    pub fn new(currency_code: impl Into<String>, value: BigDecimal) -> Self {
        Self {
            currency_code: currency_code.into(),
            value,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Credit,
    Debit,
}

impl FromStr for Direction {
    type Err = ValueError;

    /// Accepts the ISO 20022 codes (`CRDT`, `DBIT`) and the long names.
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_uppercase().as_str() {
            "CRDT" | "CREDIT" => Ok(Direction::Credit),
            "DBIT" | "DEBIT" => Ok(Direction::Debit),
            _ => Err(ValueError::UnknownDirection(s.trim().to_string())),
        }
    }
}

// ============================================================================
// Scalar parsing
// ============================================================================

/// Parse a plain decimal literal: optional sign, digits, optional fraction.
///
/// Exponents, thousands separators, and bare dots are rejected. The written
/// scale is preserved, so `-75.50` displays as `-75.50`.
pub fn parse_decimal(raw: &str) -> Result<BigDecimal> {
    let trimmed = raw.trim();
    let unsigned = trimmed
        .strip_prefix('-')
        .or_else(|| trimmed.strip_prefix('+'))
        .unwrap_or(trimmed);

    let (int_part, frac_part) = match unsigned.split_once('.') {
        Some((int_part, frac_part)) => (int_part, Some(frac_part)),
        None => (unsigned, None),
    };

    let digits_ok = |part: &str| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit());
    let valid = digits_ok(int_part) && frac_part.map_or(true, digits_ok);
    if !valid {
        return Err(ValueError::InvalidDecimal(trimmed.to_string()));
    }

    BigDecimal::from_str(trimmed).map_err(|_| ValueError::InvalidDecimal(trimmed.to_string()))
}

/// Parse an ISO calendar date (`YYYY-MM-DD`)
pub fn parse_date(raw: &str) -> Result<NaiveDate> {
    let trimmed = raw.trim();
    let well_formed = trimmed.len() == 10
        && trimmed
            .bytes()
            .enumerate()
            .all(|(i, b)| if i == 4 || i == 7 { b == b'-' } else { b.is_ascii_digit() });
    if !well_formed {
        return Err(ValueError::InvalidDate(trimmed.to_string()));
    }

    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .map_err(|_| ValueError::InvalidDate(trimmed.to_string()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_decimal_keeps_scale() {
        let value = parse_decimal("-75.50").unwrap();
        assert_eq!(value.to_string(), "-75.50");
        assert_eq!(parse_decimal(" 999.00\n").unwrap(), BigDecimal::from(999));
        assert_eq!(parse_decimal("+12").unwrap(), BigDecimal::from(12));
    }

    #[test]
    fn test_parse_decimal_rejects_loose_formats() {
        for raw in ["", "1e5", ".5", "5.", "1,000.00", "abc", "--1", "NaN"] {
            assert!(parse_decimal(raw).is_err(), "{raw:?} should be rejected");
        }
    }

    #[test]
    fn test_parse_date() {
        let date = parse_date(" 2025-10-31 ").unwrap();
        assert_eq!(date, NaiveDate::from_ymd_opt(2025, 10, 31).unwrap());
        assert!(parse_date("2025-13-01").is_err());
        assert!(parse_date("31.10.2025").is_err());
        assert!(parse_date("2025-1-1").is_err());
    }

    #[test]
    fn test_direction_from_str() {
        assert_eq!("CRDT".parse::<Direction>().unwrap(), Direction::Credit);
        assert_eq!(" dbit ".parse::<Direction>().unwrap(), Direction::Debit);
        assert_eq!("CREDIT".parse::<Direction>().unwrap(), Direction::Credit);
        assert!(matches!(
            "SIDEWAYS".parse::<Direction>(),
            Err(ValueError::UnknownDirection(_))
        ));
    }

    #[test]
    fn test_document_json_is_tagged_by_kind() {
        let doc = XmlDocument::from(Invoices {
            invoices: vec![Invoice {
                id: "INV-5".to_string(),
                amount: parse_decimal("999.00").unwrap(),
                currency: "CHF".to_string(),
            }],
        });

        let json = serde_json::to_value(&doc).unwrap();
        assert_eq!(json["kind"], "invoices");
        assert_eq!(json["invoices"][0]["id"], "INV-5");
        assert_eq!(doc.kind(), DocumentKind::Invoices);
        assert_eq!(doc.record_count(), 1);
    }
}
