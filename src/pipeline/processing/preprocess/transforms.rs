use chrono::{NaiveDate, NaiveDateTime};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Number, Value};
use std::fmt::Write;

use crate::coerce::{quantize_f64, to_float, to_int, value_text};
use crate::constants::{DEFAULT_AMOUNT_ROUND_DIGITS, DEFAULT_DATE_OUTPUT_FORMAT, MAX_AMOUNT_ROUND_DIGITS};
use crate::rules::string_list;

static URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"https?://\S+|www\.\S+").expect("url pattern"));
static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").expect("email pattern")
});
static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("whitespace pattern"));

/// Lowercased snake_case header: every run of non-alphanumeric characters
/// becomes one underscore. Headers with nothing left become `col`.
pub fn normalize_header(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.trim().to_lowercase().chars() {
        if c.is_alphanumeric() {
            out.push(c);
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }
    let out = out.trim_matches('_');
    if out.is_empty() {
        "col".to_string()
    } else {
        out.to_string()
    }
}

/// Rounds numeric-looking values; anything unparseable passes through.
pub fn normalize_amount(v: &Value, digits: u32) -> Value {
    to_float(v)
        .map(|f| quantize_f64(f, digits))
        .and_then(Number::from_f64)
        .map(Value::Number)
        .unwrap_or_else(|| v.clone())
}

fn parse_datetime(s: &str, formats: &[String]) -> Option<NaiveDateTime> {
    formats.iter().find_map(|fmt| {
        NaiveDateTime::parse_from_str(s, fmt).ok().or_else(|| {
            NaiveDate::parse_from_str(s, fmt)
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
    })
}

/// Reformats a date string using the first matching input format.
/// Unparseable values pass through.
pub fn normalize_date(v: &Value, output_format: &str, input_formats: &[String]) -> Value {
    let Value::String(s) = v else {
        return v.clone();
    };
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return v.clone();
    }
    let Some(dt) = parse_datetime(trimmed, input_formats) else {
        return v.clone();
    };
    let mut out = String::new();
    if write!(out, "{}", dt.format(output_format)).is_err() {
        return v.clone();
    }
    Value::String(out)
}

#[derive(Debug, Clone)]
pub enum TransformOp {
    Trim,
    Lower,
    Upper,
    CollapseWhitespace,
    RemoveUrls,
    RemoveEmails,
    RegexReplace { pattern: Option<Regex>, replace: String },
    ParseNumber,
    RoundNumber { digits: u32 },
    ParseDate { output_format: String, input_formats: Vec<String> },
    ExtractRegex { pattern: Option<Regex>, group: usize },
    Unknown(String),
}

/// A per-field string/number rewrite.
#[derive(Debug, Clone)]
pub struct FieldTransform {
    pub field: String,
    pub op: TransformOp,
}

impl FieldTransform {
    pub fn from_value(v: &Value) -> Option<Self> {
        let cfg = v.as_object()?;
        let field = cfg.get("field").map(value_text)?.trim().to_string();
        let op_name = cfg.get("op").map(value_text)?.trim().to_lowercase();
        if field.is_empty() || op_name.is_empty() {
            return None;
        }
        let pattern = || {
            cfg.get("pattern")
                .map(value_text)
                .filter(|p| !p.is_empty())
                .and_then(|p| Regex::new(&p).ok())
        };
        let op = match op_name.as_str() {
            "trim" => TransformOp::Trim,
            "lower" => TransformOp::Lower,
            "upper" => TransformOp::Upper,
            "collapse_whitespace" => TransformOp::CollapseWhitespace,
            "remove_urls" => TransformOp::RemoveUrls,
            "remove_emails" => TransformOp::RemoveEmails,
            "regex_replace" => TransformOp::RegexReplace {
                pattern: pattern(),
                replace: cfg.get("replace").map(value_text).unwrap_or_default(),
            },
            "parse_number" => TransformOp::ParseNumber,
            "round_number" => TransformOp::RoundNumber {
                digits: cfg
                    .get("digits")
                    .and_then(to_int)
                    .unwrap_or(DEFAULT_AMOUNT_ROUND_DIGITS as i64)
                    .clamp(0, MAX_AMOUNT_ROUND_DIGITS) as u32,
            },
            "parse_date" => TransformOp::ParseDate {
                output_format: cfg
                    .get("output_format")
                    .map(value_text)
                    .filter(|s| !s.trim().is_empty())
                    .unwrap_or_else(|| DEFAULT_DATE_OUTPUT_FORMAT.to_string()),
                input_formats: string_list(cfg.get("input_formats")),
            },
            "extract_regex" => TransformOp::ExtractRegex {
                pattern: pattern(),
                group: cfg
                    .get("group")
                    .and_then(to_int)
                    .unwrap_or(0)
                    .max(0) as usize,
            },
            other => TransformOp::Unknown(other.to_string()),
        };
        Some(Self { field, op })
    }

    /// Returns the rewritten value and whether it differs from the input.
    /// Text ops only touch strings; failed parses leave the value as is.
    pub fn apply(&self, v: &Value, fallback_date_formats: &[String]) -> (Value, bool) {
        let out = match (&self.op, v) {
            (TransformOp::Trim, Value::String(s)) => Value::String(s.trim().to_string()),
            (TransformOp::Lower, Value::String(s)) => Value::String(s.to_lowercase()),
            (TransformOp::Upper, Value::String(s)) => Value::String(s.to_uppercase()),
            (TransformOp::CollapseWhitespace, Value::String(s)) => {
                Value::String(WHITESPACE_RE.replace_all(s, " ").trim().to_string())
            }
            (TransformOp::RemoveUrls, Value::String(s)) => {
                Value::String(URL_RE.replace_all(s, "").trim().to_string())
            }
            (TransformOp::RemoveEmails, Value::String(s)) => {
                Value::String(EMAIL_RE.replace_all(s, "").trim().to_string())
            }
            (TransformOp::RegexReplace { pattern: Some(re), replace }, Value::String(s)) => {
                Value::String(re.replace_all(s, replace.as_str()).into_owned())
            }
            (TransformOp::ParseNumber, _) => to_float(v)
                .and_then(Number::from_f64)
                .map(Value::Number)
                .unwrap_or_else(|| v.clone()),
            (TransformOp::RoundNumber { digits }, _) => normalize_amount(v, *digits),
            (TransformOp::ParseDate { output_format, input_formats }, Value::String(_)) => {
                let formats = if input_formats.is_empty() {
                    fallback_date_formats
                } else {
                    input_formats.as_slice()
                };
                normalize_date(v, output_format, formats)
            }
            (TransformOp::ExtractRegex { pattern: Some(re), group }, Value::String(s)) => re
                .captures(s)
                .and_then(|caps| caps.get(*group))
                .map(|m| Value::String(m.as_str().to_string()))
                .unwrap_or_else(|| v.clone()),
            _ => v.clone(),
        };
        let changed = out != *v;
        (out, changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn transform(cfg: Value) -> FieldTransform {
        FieldTransform::from_value(&cfg).unwrap()
    }

    fn formats() -> Vec<String> {
        crate::constants::DEFAULT_DATE_INPUT_FORMATS
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    #[test]
    fn headers_are_snake_cased() {
        assert_eq!(normalize_header(" Claim Text "), "claim_text");
        assert_eq!(normalize_header("Source-URL"), "source_url");
        assert_eq!(normalize_header("Amount ($)"), "amount");
        assert_eq!(normalize_header("--"), "col");
    }

    #[test]
    fn amounts_round_and_pass_through() {
        assert_eq!(normalize_amount(&json!("$1,234.567"), 2), json!(1234.57));
        assert_eq!(normalize_amount(&json!("n/a"), 2), json!("n/a"));
    }

    #[test]
    fn dates_try_each_format() {
        assert_eq!(normalize_date(&json!("2024/03/07"), "%Y-%m-%d", &formats()), json!("2024-03-07"));
        assert_eq!(
            normalize_date(&json!("2024-03-07 10:30:00"), "%d.%m.%Y", &formats()),
            json!("07.03.2024")
        );
        assert_eq!(normalize_date(&json!("soon"), "%Y-%m-%d", &formats()), json!("soon"));
    }

    #[test]
    fn text_cleanup_ops() {
        let (v, changed) = transform(json!({"field": "t", "op": "remove_urls"}))
            .apply(&json!("see https://x.io/a and www.y.org"), &[]);
        assert!(changed);
        assert_eq!(v, json!("see  and"));

        let (v, _) = transform(json!({"field": "t", "op": "collapse_whitespace"}))
            .apply(&json!("  a \n\t b  "), &[]);
        assert_eq!(v, json!("a b"));

        let (v, _) = transform(json!({"field": "t", "op": "remove_emails"}))
            .apply(&json!("mail bob@example.com today"), &[]);
        assert_eq!(v, json!("mail  today"));

        let (v, changed) = transform(json!({"field": "t", "op": "upper"})).apply(&json!(12), &[]);
        assert_eq!((v, changed), (json!(12), false));
    }

    #[test]
    fn regex_ops() {
        let (v, changed) = transform(json!({"field": "t", "op": "regex_replace", "pattern": "\\d+", "replace": "#"}))
            .apply(&json!("a1b22"), &[]);
        assert_eq!((v, changed), (json!("a#b#"), true));

        let extract = transform(json!({"field": "t", "op": "extract_regex", "pattern": "id-(\\d+)", "group": 1}));
        assert_eq!(extract.apply(&json!("x id-42 y"), &[]).0, json!("42"));
        assert_eq!(extract.apply(&json!("none"), &[]), (json!("none"), false));
    }

    #[test]
    fn unchanged_values_are_not_counted() {
        let (v, changed) = transform(json!({"field": "t", "op": "lower"})).apply(&json!("abc"), &[]);
        assert_eq!(v, json!("abc"));
        assert!(!changed);
        let (_, changed) = transform(json!({"field": "t", "op": "shout"})).apply(&json!("abc"), &[]);
        assert!(!changed);
    }

    #[test]
    fn numeric_ops() {
        let (v, changed) = transform(json!({"field": "n", "op": "parse_number"})).apply(&json!("12.5"), &[]);
        assert_eq!((v, changed), (json!(12.5), true));
        let (v, _) = transform(json!({"field": "n", "op": "round_number", "digits": 1})).apply(&json!(2.25), &[]);
        assert_eq!(v, json!(2.3));
    }

    #[test]
    fn parse_date_uses_fallback_formats() {
        let t = transform(json!({"field": "d", "op": "parse_date", "output_format": "%Y%m%d"}));
        assert_eq!(t.apply(&json!("2024-01-05"), &formats()).0, json!("20240105"));
    }
}
