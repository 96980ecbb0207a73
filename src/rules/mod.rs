//! Declarative rule documents.
//!
//! A cleaning job carries its rules either under `params.rules` or directly
//! at the top level of `params`. Parsing here is lenient: a malformed entry
//! falls back to its default, and the [`validator`] is what reports problems.

pub mod filter;
pub mod validator;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;

use crate::coerce::{to_bool, to_decimal, to_int, value_text};
use crate::constants::{DEFAULT_AMOUNT_ROUND_DIGITS, DEFAULT_NULL_TOKENS, MAX_AMOUNT_ROUND_DIGITS};
use filter::FilterRule;

/// Keys whose presence switches a rule document into generic mode.
pub const GENERIC_KEYS: [&str; 13] = [
    "rename_map",
    "casts",
    "filters",
    "required_fields",
    "default_values",
    "include_fields",
    "exclude_fields",
    "deduplicate_by",
    "sort_by",
    "null_values",
    "trim_strings",
    "lowercase_fields",
    "uppercase_fields",
];

/// Returns `params.rules` when it is an object, otherwise an empty map.
pub fn rules_object(params: &Value) -> Map<String, Value> {
    params
        .get("rules")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default()
}

/// Looks a rule up in `params.rules` first and then in `params` itself.
pub fn rule_param<'a>(params: &'a Value, key: &str) -> Option<&'a Value> {
    if let Some(rules) = params.get("rules").and_then(Value::as_object) {
        if rules.contains_key(key) {
            return rules.get(key);
        }
    }
    params.get(key)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleMode {
    Simple,
    Generic,
}

impl RuleMode {
    /// Generic mode wins when `platform_mode` says so or any generic-only key
    /// is present, looked up the same way as [`rule_param`].
    pub fn detect(params: &Value) -> Self {
        let platform_mode = rule_param(params, "platform_mode")
            .map(|v| value_text(v).trim().to_lowercase())
            .unwrap_or_default();
        if platform_mode == "generic" || GENERIC_KEYS.iter().any(|k| rule_param(params, k).is_some()) {
            RuleMode::Generic
        } else {
            RuleMode::Simple
        }
    }
}

/// Generic rule keys resolved through [`rule_param`], so top-level keys are
/// honoured unless `params.rules` overrides them.
pub fn generic_rules_view(params: &Value) -> Map<String, Value> {
    GENERIC_KEYS
        .iter()
        .filter_map(|k| rule_param(params, k).map(|v| (k.to_string(), v.clone())))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeepPolicy {
    First,
    Last,
}

impl KeepPolicy {
    pub fn parse(v: Option<&Value>, default: KeepPolicy) -> Self {
        match v.map(|v| value_text(v).trim().to_lowercase()).as_deref() {
            Some("first") => KeepPolicy::First,
            Some("last") => KeepPolicy::Last,
            _ => default,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub field: String,
    pub order: SortOrder,
}

impl SortKey {
    /// Accepts `"field"` or `{"field": "...", "order": "asc|desc"}`.
    pub fn from_value(v: &Value) -> Option<Self> {
        let (field, order) = match v {
            Value::Object(obj) => {
                let field = obj.get("field").map(value_text).unwrap_or_default();
                let desc = obj
                    .get("order")
                    .map(|o| value_text(o).trim().eq_ignore_ascii_case("desc"))
                    .unwrap_or(false);
                (field, if desc { SortOrder::Desc } else { SortOrder::Asc })
            }
            other => (value_text(other), SortOrder::Asc),
        };
        if field.is_empty() {
            None
        } else {
            Some(SortKey { field, order })
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CastType {
    Str,
    Int,
    Float,
    Bool,
    /// Unrecognised cast names leave the value untouched.
    Passthrough,
}

impl CastType {
    pub fn parse(name: &str) -> Self {
        match name.trim().to_lowercase().as_str() {
            "str" | "string" => CastType::Str,
            "int" | "integer" => CastType::Int,
            "float" | "double" | "number" | "decimal" => CastType::Float,
            "bool" | "boolean" => CastType::Bool,
            _ => CastType::Passthrough,
        }
    }
}

/// Fixed-schema `(id, amount)` rules.
#[derive(Debug, Clone, PartialEq)]
pub struct SimpleRules {
    pub id_field: String,
    pub amount_field: String,
    pub drop_negative_amount: bool,
    pub min_amount: Option<Decimal>,
    pub max_amount: Option<Decimal>,
    pub deduplicate_by_id: bool,
    pub deduplicate_keep: KeepPolicy,
    pub sort_by_id: bool,
    pub amount_round_digits: u32,
}

impl Default for SimpleRules {
    fn default() -> Self {
        Self {
            id_field: "id".to_string(),
            amount_field: "amount".to_string(),
            drop_negative_amount: false,
            min_amount: None,
            max_amount: None,
            deduplicate_by_id: true,
            deduplicate_keep: KeepPolicy::Last,
            sort_by_id: true,
            amount_round_digits: DEFAULT_AMOUNT_ROUND_DIGITS,
        }
    }
}

impl SimpleRules {
    pub fn from_params(params: &Value) -> Self {
        let defaults = Self::default();
        let text_or = |key: &str, fallback: &str| {
            rule_param(params, key)
                .map(|v| value_text(v).trim().to_string())
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| fallback.to_string())
        };
        let flag = |key: &str, fallback: bool| {
            rule_param(params, key)
                .map(|v| to_bool(v, fallback))
                .unwrap_or(fallback)
        };
        let digits = rule_param(params, "amount_round_digits")
            .and_then(to_int)
            .unwrap_or(DEFAULT_AMOUNT_ROUND_DIGITS as i64)
            .clamp(0, MAX_AMOUNT_ROUND_DIGITS) as u32;

        Self {
            id_field: text_or("id_field", &defaults.id_field),
            amount_field: text_or("amount_field", &defaults.amount_field),
            drop_negative_amount: flag("drop_negative_amount", defaults.drop_negative_amount),
            min_amount: rule_param(params, "min_amount").and_then(to_decimal),
            max_amount: rule_param(params, "max_amount").and_then(to_decimal),
            deduplicate_by_id: flag("deduplicate_by_id", defaults.deduplicate_by_id),
            deduplicate_keep: KeepPolicy::parse(
                rule_param(params, "deduplicate_keep"),
                KeepPolicy::Last,
            ),
            sort_by_id: flag("sort_by_id", defaults.sort_by_id),
            amount_round_digits: digits,
        }
    }
}

/// Open-schema rules driven entirely by the document.
#[derive(Debug, Clone)]
pub struct GenericRules {
    pub null_values: Vec<String>,
    pub trim_strings: bool,
    pub rename_map: Vec<(String, String)>,
    pub casts: Vec<(String, CastType)>,
    pub default_values: Vec<(String, Value)>,
    pub required_fields: Vec<String>,
    pub include_fields: Vec<String>,
    pub exclude_fields: Vec<String>,
    pub filters: Vec<FilterRule>,
    pub deduplicate_by: Vec<String>,
    pub deduplicate_keep: KeepPolicy,
    pub sort_by: Vec<SortKey>,
    pub lowercase_fields: HashSet<String>,
    pub uppercase_fields: HashSet<String>,
}

impl Default for GenericRules {
    fn default() -> Self {
        Self::from_rules(&Map::new())
    }
}

pub(crate) fn string_list(v: Option<&Value>) -> Vec<String> {
    v.and_then(Value::as_array)
        .map(|items| items.iter().map(value_text).collect())
        .unwrap_or_default()
}

pub(crate) fn object_pairs(v: Option<&Value>) -> Vec<(String, Value)> {
    v.and_then(Value::as_object)
        .map(|obj| obj.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        .unwrap_or_default()
}

/// Null tokens are compared trimmed and lowercased.
pub(crate) fn null_tokens(v: Option<&Value>) -> Vec<String> {
    let configured: Vec<String> = string_list(v)
        .into_iter()
        .map(|s| s.trim().to_lowercase())
        .collect();
    if configured.is_empty() {
        DEFAULT_NULL_TOKENS.iter().map(|s| s.to_string()).collect()
    } else {
        configured
    }
}

impl GenericRules {
    pub fn from_params(params: &Value) -> Self {
        Self::from_rules(&generic_rules_view(params))
    }

    pub fn from_rules(rules: &Map<String, Value>) -> Self {
        Self {
            null_values: null_tokens(rules.get("null_values")),
            trim_strings: rules
                .get("trim_strings")
                .map(|v| to_bool(v, true))
                .unwrap_or(true),
            rename_map: object_pairs(rules.get("rename_map"))
                .into_iter()
                .map(|(k, v)| (k, value_text(&v)))
                .collect(),
            casts: object_pairs(rules.get("casts"))
                .into_iter()
                .map(|(k, v)| (k, CastType::parse(&value_text(&v))))
                .collect(),
            default_values: object_pairs(rules.get("default_values")),
            required_fields: string_list(rules.get("required_fields")),
            include_fields: string_list(rules.get("include_fields")),
            exclude_fields: string_list(rules.get("exclude_fields")),
            filters: rules
                .get("filters")
                .and_then(Value::as_array)
                .map(|items| items.iter().map(FilterRule::from_value).collect())
                .unwrap_or_default(),
            deduplicate_by: string_list(rules.get("deduplicate_by")),
            deduplicate_keep: KeepPolicy::parse(rules.get("deduplicate_keep"), KeepPolicy::Last),
            sort_by: rules
                .get("sort_by")
                .and_then(Value::as_array)
                .map(|items| items.iter().filter_map(SortKey::from_value).collect())
                .unwrap_or_default(),
            lowercase_fields: string_list(rules.get("lowercase_fields")).into_iter().collect(),
            uppercase_fields: string_list(rules.get("uppercase_fields")).into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn rule_param_prefers_rules_object() {
        let params = json!({"max_invalid_rows": 5, "rules": {"max_invalid_rows": 1}});
        assert_eq!(rule_param(&params, "max_invalid_rows"), Some(&json!(1)));
        let params = json!({"max_invalid_rows": 5, "rules": {}});
        assert_eq!(rule_param(&params, "max_invalid_rows"), Some(&json!(5)));
        assert_eq!(rule_param(&params, "missing"), None);
    }

    #[test]
    fn mode_detection() {
        assert_eq!(RuleMode::detect(&json!({})), RuleMode::Simple);
        assert_eq!(
            RuleMode::detect(&json!({"rules": {"drop_negative_amount": true}})),
            RuleMode::Simple
        );
        assert_eq!(
            RuleMode::detect(&json!({"rules": {"platform_mode": " Generic "}})),
            RuleMode::Generic
        );
        assert_eq!(
            RuleMode::detect(&json!({"rules": {"casts": {"a": "int"}}})),
            RuleMode::Generic
        );
        assert_eq!(RuleMode::detect(&json!({"casts": {"a": "int"}})), RuleMode::Generic);
        assert_eq!(RuleMode::detect(&json!({"platform_mode": "generic"})), RuleMode::Generic);
        assert_eq!(
            RuleMode::detect(&json!({"platform_mode": "generic", "rules": {"platform_mode": "simple"}})),
            RuleMode::Simple
        );
    }

    #[test]
    fn generic_rules_read_top_level_keys() {
        let params = json!({
            "platform_mode": "generic",
            "required_fields": ["a"],
            "deduplicate_by": ["a"],
            "rules": {"required_fields": ["b"]}
        });
        let rules = GenericRules::from_params(&params);
        assert_eq!(rules.required_fields, vec!["b".to_string()]);
        assert_eq!(rules.deduplicate_by, vec!["a".to_string()]);
    }

    #[test]
    fn simple_rules_defaults_and_clamping() {
        let rules = SimpleRules::from_params(&json!({}));
        assert_eq!(rules, SimpleRules::default());

        let rules = SimpleRules::from_params(&json!({
            "rules": {"amount_round_digits": 9, "deduplicate_keep": "middle", "id_field": "  "}
        }));
        assert_eq!(rules.amount_round_digits, 6);
        assert_eq!(rules.deduplicate_keep, KeepPolicy::Last);
        assert_eq!(rules.id_field, "id");
    }

    #[test]
    fn generic_rules_parse_sort_and_casts() {
        let rules = GenericRules::from_rules(
            json!({
                "casts": {"a": "Integer", "b": "weird"},
                "sort_by": ["a", {"field": "b", "order": "DESC"}, {"order": "asc"}],
                "null_values": [" NIL "]
            })
            .as_object()
            .unwrap(),
        );
        assert_eq!(rules.casts[0], ("a".to_string(), CastType::Int));
        assert_eq!(rules.casts[1], ("b".to_string(), CastType::Passthrough));
        assert_eq!(rules.sort_by.len(), 2);
        assert_eq!(rules.sort_by[1].order, SortOrder::Desc);
        assert_eq!(rules.null_values, vec!["nil".to_string()]);
        assert!(rules.trim_strings);
    }
}
