use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::coerce::{to_decimal, to_int, value_text};

/// Outcome of a static check. Never raised; callers decide what to do with it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub ok: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn from_parts(errors: Vec<String>, warnings: Vec<String>) -> Self {
        Self {
            ok: errors.is_empty(),
            errors,
            warnings,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self::from_parts(vec![error.into()], Vec::new())
    }
}

const KNOWN_RULE_KEYS: [&str; 33] = [
    "platform_mode",
    "rename_map",
    "casts",
    "filters",
    "required_fields",
    "default_values",
    "include_fields",
    "exclude_fields",
    "deduplicate_by",
    "deduplicate_keep",
    "sort_by",
    "null_values",
    "trim_strings",
    "lowercase_fields",
    "uppercase_fields",
    "id_field",
    "amount_field",
    "amount_round_digits",
    "drop_negative_amount",
    "min_amount",
    "max_amount",
    "deduplicate_by_id",
    "sort_by_id",
    "allow_empty_output",
    "local_parquet_strict",
    "max_invalid_rows",
    "max_filtered_rows",
    "min_output_rows",
    "max_invalid_ratio",
    "max_required_missing_ratio",
    "force_local_cleaning",
    "accel_url",
    "accel_timeout_seconds",
];

pub const FILTER_OPS: [&str; 12] = [
    "contains",
    "eq",
    "exists",
    "gt",
    "gte",
    "in",
    "lt",
    "lte",
    "ne",
    "not_exists",
    "not_in",
    "regex",
];

/// Unknown keys of `obj` as a single sorted warning, if any.
pub(crate) fn unknown_keys_warning(
    obj: &Map<String, Value>,
    known: &[&str],
    label: &str,
) -> Option<String> {
    let mut unknown: Vec<&str> = obj
        .keys()
        .map(String::as_str)
        .filter(|k| !known.contains(k))
        .collect();
    if unknown.is_empty() {
        return None;
    }
    unknown.sort_unstable();
    Some(format!("unknown {} keys: {}", label, unknown.join(", ")))
}

fn lowered(v: &Value) -> String {
    value_text(v).trim().to_lowercase()
}

/// Validates a cleaning rule document.
///
/// Accepts either the whole job params (uses `params.rules` when it is an
/// object) or a bare rules object. Every problem is collected; nothing
/// short-circuits.
pub fn validate_cleaning_rules(params: &Value) -> ValidationReport {
    let Some(obj) = params.as_object() else {
        return ValidationReport::failed("params must be an object");
    };
    let rules = match obj.get("rules") {
        Some(Value::Object(rules)) => rules,
        _ => obj,
    };

    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    if let Some(w) = unknown_keys_warning(rules, &KNOWN_RULE_KEYS, "rule") {
        warnings.push(w);
    }

    if let Some(mode) = rules.get("platform_mode") {
        let mode = lowered(mode);
        if !matches!(mode.as_str(), "" | "generic" | "simple") {
            errors.push("platform_mode must be 'generic' or 'simple' when provided".to_string());
        }
    }

    for key in ["rename_map", "casts", "default_values"] {
        if rules.get(key).is_some_and(|v| !v.is_object()) {
            errors.push(format!("{} must be an object", key));
        }
    }

    for key in [
        "required_fields",
        "include_fields",
        "exclude_fields",
        "deduplicate_by",
        "lowercase_fields",
        "uppercase_fields",
        "null_values",
    ] {
        if rules.get(key).is_some_and(|v| !v.is_array()) {
            errors.push(format!("{} must be an array", key));
        }
    }

    if let Some(filters) = rules.get("filters") {
        match filters.as_array() {
            None => errors.push("filters must be an array".to_string()),
            Some(items) => {
                for (i, f) in items.iter().enumerate() {
                    let Some(f) = f.as_object() else {
                        errors.push(format!("filters[{}] must be an object", i));
                        continue;
                    };
                    let op = f.get("op").map(lowered).unwrap_or_else(|| "eq".to_string());
                    if !FILTER_OPS.contains(&op.as_str()) {
                        errors.push(format!(
                            "filters[{}].op must be one of [{}]",
                            i,
                            FILTER_OPS.join(", ")
                        ));
                    }
                    if op != "exists" && op != "not_exists" && !f.contains_key("field") {
                        errors.push(format!("filters[{}].field is required", i));
                    }
                }
            }
        }
    }

    if let Some(keep) = rules.get("deduplicate_keep") {
        if !matches!(lowered(keep).as_str(), "first" | "last") {
            errors.push("deduplicate_keep must be 'first' or 'last'".to_string());
        }
    }

    if let Some(sort_by) = rules.get("sort_by") {
        match sort_by.as_array() {
            None => errors.push("sort_by must be an array".to_string()),
            Some(items) => {
                for (i, s) in items.iter().enumerate() {
                    match s {
                        Value::String(_) => {}
                        Value::Object(spec) => {
                            let order = spec
                                .get("order")
                                .map(lowered)
                                .unwrap_or_else(|| "asc".to_string());
                            if order != "asc" && order != "desc" {
                                errors.push(format!("sort_by[{}].order must be 'asc' or 'desc'", i));
                            }
                        }
                        _ => errors.push(format!("sort_by[{}] must be a string or object", i)),
                    }
                }
            }
        }
    }

    if let Some(digits) = rules.get("amount_round_digits") {
        if !to_int(digits).is_some_and(|d| (0..=6).contains(&d)) {
            errors.push("amount_round_digits must be integer in range [0,6]".to_string());
        }
    }

    for key in ["max_invalid_ratio", "max_required_missing_ratio"] {
        if let Some(ratio) = rules.get(key) {
            let in_range = to_decimal(ratio).is_some_and(|r| r >= Decimal::ZERO && r <= Decimal::ONE);
            if !in_range {
                errors.push(format!("{} must be a number in [0,1]", key));
            }
        }
    }

    for key in ["max_invalid_rows", "max_filtered_rows", "min_output_rows"] {
        if let Some(count) = rules.get(key) {
            if !to_int(count).is_some_and(|n| n >= 0) {
                errors.push(format!("{} must be a non-negative integer", key));
            }
        }
    }

    ValidationReport::from_parts(errors, warnings)
}
