use serde::{Deserialize, Serialize};
use chrono::NaiveDate;
use std::{cmp::Ordering, collections::HashMap};
use rust_decimal::Decimal;

///
/// A canonical row maps role names (or preserved source headers) to scalar cell values.
///
pub type Row = HashMap<String, Value>;

///
/// Logical/business value for any given cell.
///
/// Everything is Text straight after reading - the cleaner coerces listed fields into
/// Number or Date. Bool only ever appears as the result of evaluating a predicate.
///
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Number(Decimal),
    Date(NaiveDate),
    Text(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    ///
    /// The stringified form used in issue details, templates and key display. Null is empty.
    ///
    pub fn display(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => n.to_string(),
            Value::Date(d) => d.format("%Y-%m-%d").to_string(),
            Value::Text(s) => s.clone(),
        }
    }

    ///
    /// Coerce to a decimal number where the value allows it.
    ///
    pub fn to_number(&self) -> Option<Decimal> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Text(s) => s.trim().parse::<Decimal>().ok(),
            _ => None,
        }
    }

    ///
    /// Equality between two non-null values. Numeric comparisons are subject to the
    /// absolute tolerance - values within tolerance of each other are considered equal.
    ///
    pub fn equals(&self, other: &Value, tolerance: Decimal) -> bool {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Date(a), Value::Date(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => (*a - *b).abs() <= tolerance,
            (Value::Number(a), other) | (other, Value::Number(a)) => {
                match other.to_number() {
                    Some(b) => (*a - b).abs() <= tolerance,
                    None => false,
                }
            },
            (Value::Text(a), Value::Text(b)) => a == b,
            _ => false,
        }
    }

    ///
    /// Ordering between two non-null values. Numbers order numerically (coercing text
    /// when possible), dates chronologically, text lexicographically.
    ///
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        if let (Some(a), Some(b)) = (self.to_number(), other.to_number()) {
            return a.partial_cmp(&b);
        }

        match (self, other) {
            (Value::Date(a), Value::Date(b)) => a.partial_cmp(b),
            (Value::Text(a), Value::Text(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

///
/// How key-role values are compared when joining the two sides.
///
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum KeyComparator {
    Exact,
    Trim,
    Numeric,
}

impl Default for KeyComparator {
    fn default() -> Self {
        KeyComparator::Numeric
    }
}

impl KeyComparator {
    ///
    /// Reduce a raw key to its canonical join form.
    ///
    /// Numeric keys normalise through a decimal parse so "000123" and "123" collide;
    /// keys which don't parse (including locale-formatted numbers) fall back to the
    /// trimmed string.
    ///
    pub fn canonical(&self, raw: &str) -> String {
        match self {
            KeyComparator::Exact => raw.to_string(),
            KeyComparator::Trim => raw.trim().to_string(),
            KeyComparator::Numeric => {
                let trimmed = raw.trim();
                match trimmed.parse::<Decimal>() {
                    Ok(number) => number.normalize().to_string(),
                    Err(_) => trimmed.to_string(),
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_preserves_number_scale() {
        let v = Value::Number("98.00".parse().unwrap());
        assert_eq!(v.display(), "98.00");
    }

    #[test]
    fn null_displays_empty() {
        assert_eq!(Value::Null.display(), "");
    }

    #[test]
    fn equals_applies_tolerance_inclusively() {
        let a = Value::Number("100.00".parse().unwrap());
        let b = Value::Number("100.01".parse().unwrap());
        let tol: Decimal = "0.01".parse().unwrap();

        // A difference of exactly the tolerance is equal.
        assert!(a.equals(&b, tol));
        assert!(!a.equals(&Value::Number("100.02".parse().unwrap()), tol));
    }

    #[test]
    fn equals_coerces_text_to_number() {
        let a = Value::Number("100".parse().unwrap());
        assert!(a.equals(&Value::Text("100.00".into()), Decimal::ZERO));
        assert!(!a.equals(&Value::Text("not a number".into()), Decimal::ZERO));
    }

    #[test]
    fn numeric_comparator_folds_leading_zeroes() {
        let cmp = KeyComparator::Numeric;
        assert_eq!(cmp.canonical(" 000123 "), cmp.canonical("123"));
        assert_eq!(cmp.canonical("123.00"), cmp.canonical("123"));

        // Locale-formatted numbers don't parse and stay distinct.
        assert_ne!(cmp.canonical("1,000"), cmp.canonical("1000"));
    }

    #[test]
    fn exact_comparator_keeps_whitespace() {
        assert_ne!(KeyComparator::Exact.canonical(" A1"), KeyComparator::Exact.canonical("A1"));
        assert_eq!(KeyComparator::Trim.canonical(" A1"), KeyComparator::Trim.canonical("A1"));
    }
}
