//! Loose value coercion used by every rule engine.
//!
//! Input rows arrive as untyped JSON scalars, usually strings read from CSV.
//! These helpers turn them into typed values without ever failing loudly: a
//! value that cannot be interpreted becomes `None` and the caller decides
//! whether that makes the row invalid.

use rust_decimal::{Decimal, RoundingStrategy};
use serde_json::Value;
use std::str::FromStr;

const TRUE_TOKENS: [&str; 4] = ["1", "true", "yes", "on"];
const FALSE_TOKENS: [&str; 4] = ["0", "false", "no", "off"];

/// Renders a scalar the way it would appear in a text cell. Null is empty.
pub fn value_text(v: &Value) -> String {
    match v {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Numeric text with thousands separators and a leading `$` removed.
fn numeric_text(v: &Value) -> Option<String> {
    let raw = match v {
        Value::Null | Value::Bool(_) | Value::Array(_) | Value::Object(_) => return None,
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.trim().to_string(),
    };
    let cleaned = raw.replace(',', "");
    let cleaned = cleaned.strip_prefix('$').unwrap_or(&cleaned).trim().to_string();
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}

pub fn to_int(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() as i64)),
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                return None;
            }
            if s.contains('.') {
                s.parse::<f64>()
                    .ok()
                    .filter(|f| f.is_finite())
                    .map(|f| f.trunc() as i64)
            } else {
                s.parse::<i64>().ok()
            }
        }
        _ => None,
    }
}

pub fn to_float(v: &Value) -> Option<f64> {
    if let Value::Number(n) = v {
        return n.as_f64().filter(|f| f.is_finite());
    }
    numeric_text(v)?
        .parse::<f64>()
        .ok()
        .filter(|f| f.is_finite())
}

pub fn to_decimal(v: &Value) -> Option<Decimal> {
    let text = numeric_text(v)?;
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .ok()
}

pub fn to_bool(v: &Value, default: bool) -> bool {
    match v {
        Value::Bool(b) => *b,
        Value::Null => default,
        other => {
            let token = value_text(other).trim().to_lowercase();
            if TRUE_TOKENS.contains(&token.as_str()) {
                true
            } else if FALSE_TOKENS.contains(&token.as_str()) {
                false
            } else {
                default
            }
        }
    }
}

/// Half-up rounding (ties away from zero) to `digits` fractional places.
pub fn quantize(d: Decimal, digits: u32) -> Decimal {
    d.round_dp_with_strategy(digits, RoundingStrategy::MidpointAwayFromZero)
}

/// Rounds a float through its shortest decimal representation so that
/// `2.675` rounds to `2.68` instead of following the binary approximation.
pub fn quantize_f64(x: f64, digits: u32) -> f64 {
    if !x.is_finite() {
        return x;
    }
    Decimal::from_str(&x.to_string())
        .ok()
        .and_then(|d| decimal_to_f64(quantize(d, digits)))
        .unwrap_or(x)
}

pub fn decimal_to_f64(d: Decimal) -> Option<f64> {
    d.normalize().to_string().parse::<f64>().ok()
}

/// Coercion capability handed to the rule engines.
///
/// The default methods delegate to the free functions above; engines are
/// generic over this trait so tests can swap in stricter or looser parsing.
pub trait ValueCoercion {
    fn int(&self, v: &Value) -> Option<i64> {
        to_int(v)
    }

    fn float(&self, v: &Value) -> Option<f64> {
        to_float(v)
    }

    fn decimal(&self, v: &Value) -> Option<Decimal> {
        to_decimal(v)
    }

    fn boolean(&self, v: &Value, default: bool) -> bool {
        to_bool(v, default)
    }

    fn quantize(&self, d: Decimal, digits: u32) -> Decimal {
        quantize(d, digits)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StandardCoercion;

impl ValueCoercion for StandardCoercion {}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn to_int_truncates_decimal_text() {
        assert_eq!(to_int(&json!("12.9")), Some(12));
        assert_eq!(to_int(&json!("-3.7")), Some(-3));
        assert_eq!(to_int(&json!(" 42 ")), Some(42));
        assert_eq!(to_int(&json!(7.5)), Some(7));
    }

    #[test]
    fn to_int_rejects_garbage() {
        assert_eq!(to_int(&json!("")), None);
        assert_eq!(to_int(&json!("bad")), None);
        assert_eq!(to_int(&Value::Null), None);
        assert_eq!(to_int(&json!(true)), None);
    }

    #[test]
    fn to_float_strips_currency_and_separators() {
        assert_eq!(to_float(&json!("$1,234.50")), Some(1234.5));
        assert_eq!(to_float(&json!("  10 ")), Some(10.0));
        assert_eq!(to_float(&json!("ten")), None);
        assert_eq!(to_float(&json!("nan")), None);
    }

    #[test]
    fn to_decimal_parses_exactly() {
        assert_eq!(to_decimal(&json!("$120.225")), Decimal::from_str("120.225").ok());
        assert_eq!(to_decimal(&json!("1e3")), Decimal::from_str("1000").ok());
        assert_eq!(to_decimal(&json!("x")), None);
    }

    #[test]
    fn to_bool_uses_token_sets() {
        assert!(to_bool(&json!("YES"), false));
        assert!(to_bool(&json!("on"), false));
        assert!(!to_bool(&json!("0"), true));
        assert!(to_bool(&json!("maybe"), true));
        assert!(!to_bool(&Value::Null, false));
    }

    #[test]
    fn quantize_rounds_half_up() {
        let d = |s: &str| Decimal::from_str(s).unwrap();
        assert_eq!(quantize(d("120.225"), 2), d("120.23"));
        assert_eq!(quantize(d("0.125"), 2), d("0.13"));
        assert_eq!(quantize(d("-0.125"), 2), d("-0.13"));
        assert_eq!(quantize(d("2.5"), 0), d("3"));
    }

    #[test]
    fn quantize_is_idempotent() {
        for raw in ["100.126", "-5.555", "0.0049", "999.9999", "3"] {
            let x = Decimal::from_str(raw).unwrap();
            for digits in 0..=6 {
                let once = quantize(x, digits);
                assert_eq!(quantize(once, digits), once, "{} @ {}", raw, digits);
            }
        }
    }

    #[test]
    fn quantize_f64_avoids_binary_artifacts() {
        assert_eq!(quantize_f64(2.675, 2), 2.68);
        assert_eq!(quantize_f64(100.126, 2), 100.13);
    }
}
