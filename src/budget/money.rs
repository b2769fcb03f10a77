//! Monetary normalisation
//!
//! Amounts arrive as typed by users: `R$ 1.234,56`, `1234,56`, `1234.56`
//! or plain JSON numbers.

use std::str::FromStr;

use rust_decimal::Decimal;
use serde_json::Value;

use crate::error::{Error, Result};

/// Parse a locale-formatted amount string
pub fn parse_amount(raw: &str) -> Result<Decimal> {
    let cleaned: String = raw
        .replace("R$", "")
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();

    let canonical = if cleaned.contains('.') && cleaned.contains(',') {
        cleaned.replace('.', "").replace(',', ".")
    } else {
        cleaned.replace(',', ".")
    };

    Decimal::from_str(&canonical)
        .or_else(|_| Decimal::from_scientific(&canonical))
        .map_err(|_| Error::InvalidAmount(raw.to_string()))
}

/// Whether a submitted cell means "no amount for this month"
pub fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => matches!(s.trim(), "" | "-"),
        _ => false,
    }
}

/// Parse an amount cell, `None` for blank cells
pub fn amount_from_value(value: &Value) -> Result<Option<Decimal>> {
    if is_blank(value) {
        return Ok(None);
    }
    match value {
        Value::String(s) => parse_amount(s).map(Some),
        Value::Number(n) => parse_amount(&n.to_string()).map(Some),
        other => Err(Error::InvalidAmount(other.to_string())),
    }
}

/// Interpret a submitted `quantidade`: `-`, empty or non-numeric means absent
pub fn quantity_from_value(value: Option<&Value>) -> Option<i32> {
    match value? {
        Value::Number(n) => n.as_i64().and_then(|q| i32::try_from(q).ok()),
        Value::String(s) => s.trim().parse::<i32>().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_amount_formats() {
        assert_eq!(parse_amount("R$ 52.499,56").unwrap(), Decimal::new(5_249_956, 2));
        assert_eq!(parse_amount("1234,5").unwrap(), Decimal::new(12_345, 1));
        assert_eq!(parse_amount("1234.56").unwrap(), Decimal::new(123_456, 2));
        assert_eq!(parse_amount(" 10 000,00 ").unwrap(), Decimal::new(1_000_000, 2));
        assert!(parse_amount("abc").is_err());
        assert!(parse_amount("").is_err());
    }

    #[test]
    fn test_amount_from_value() {
        assert_eq!(amount_from_value(&json!("-")).unwrap(), None);
        assert_eq!(amount_from_value(&json!("  ")).unwrap(), None);
        assert_eq!(amount_from_value(&Value::Null).unwrap(), None);
        assert_eq!(amount_from_value(&json!(2500.5)).unwrap(), Some(Decimal::new(25_005, 1)));
        assert!(amount_from_value(&json!([1])).is_err());
    }

    #[test]
    fn test_quantity_from_value() {
        assert_eq!(quantity_from_value(Some(&json!(3))), Some(3));
        assert_eq!(quantity_from_value(Some(&json!("4"))), Some(4));
        assert_eq!(quantity_from_value(Some(&json!("-"))), None);
        assert_eq!(quantity_from_value(None), None);
    }
}
