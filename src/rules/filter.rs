use regex::Regex;
use serde_json::Value;

use crate::coerce::{to_float, value_text};
use crate::types::Row;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    NotIn,
    Contains,
    Regex,
    NotRegex,
    Exists,
    NotExists,
    /// Unknown operators keep the row.
    Unknown(String),
}

impl FilterOp {
    pub fn parse(name: &str) -> Self {
        match name.trim().to_lowercase().as_str() {
            "" | "eq" => FilterOp::Eq,
            "ne" => FilterOp::Ne,
            "gt" => FilterOp::Gt,
            "gte" => FilterOp::Gte,
            "lt" => FilterOp::Lt,
            "lte" => FilterOp::Lte,
            "in" => FilterOp::In,
            "not_in" => FilterOp::NotIn,
            "contains" => FilterOp::Contains,
            "regex" => FilterOp::Regex,
            "not_regex" => FilterOp::NotRegex,
            "exists" => FilterOp::Exists,
            "not_exists" => FilterOp::NotExists,
            other => FilterOp::Unknown(other.to_string()),
        }
    }
}

/// A single `{field, op, value}` predicate with its regex compiled up front.
#[derive(Debug, Clone)]
pub struct FilterRule {
    pub field: String,
    pub op: FilterOp,
    pub target: Value,
    /// `None` for regex ops whose pattern failed to compile.
    pattern: Option<Regex>,
}

impl FilterRule {
    pub fn new(field: impl Into<String>, op: FilterOp, target: Value) -> Self {
        let pattern = match op {
            FilterOp::Regex | FilterOp::NotRegex => Regex::new(&value_text(&target)).ok(),
            _ => None,
        };
        Self {
            field: field.into(),
            op,
            target,
            pattern,
        }
    }

    /// Non-object entries become a no-op rule that keeps every row.
    pub fn from_value(v: &Value) -> Self {
        let obj = v.as_object();
        let field = obj
            .and_then(|o| o.get("field"))
            .map(|f| value_text(f).trim().to_string())
            .unwrap_or_default();
        let op = obj
            .and_then(|o| o.get("op"))
            .map(|o| FilterOp::parse(&value_text(o)))
            .unwrap_or(FilterOp::Eq);
        let target = obj
            .and_then(|o| o.get("value"))
            .cloned()
            .unwrap_or(Value::Null);
        Self::new(field, op, target)
    }

    /// True when the row passes this filter.
    pub fn matches(&self, row: &Row) -> bool {
        if self.field.is_empty() {
            return true;
        }
        let val = row.get(&self.field).unwrap_or(&Value::Null);

        match &self.op {
            FilterOp::Exists => !val.is_null(),
            FilterOp::NotExists => val.is_null(),
            FilterOp::Eq => loose_eq(val, &self.target),
            FilterOp::Ne => !loose_eq(val, &self.target),
            FilterOp::Gt | FilterOp::Gte | FilterOp::Lt | FilterOp::Lte => {
                let (Some(a), Some(b)) = (to_float(val), to_float(&self.target)) else {
                    return false;
                };
                match self.op {
                    FilterOp::Gt => a > b,
                    FilterOp::Gte => a >= b,
                    FilterOp::Lt => a < b,
                    _ => a <= b,
                }
            }
            FilterOp::In => match self.target.as_array() {
                Some(items) => items.iter().any(|t| loose_eq(val, t)),
                None => false,
            },
            FilterOp::NotIn => match self.target.as_array() {
                Some(items) => !items.iter().any(|t| loose_eq(val, t)),
                None => false,
            },
            FilterOp::Contains => {
                !val.is_null() && value_text(val).contains(&value_text(&self.target))
            }
            FilterOp::Regex => match &self.pattern {
                Some(re) => !val.is_null() && re.is_match(&value_text(val)),
                None => false,
            },
            FilterOp::NotRegex => match &self.pattern {
                Some(re) => val.is_null() || !re.is_match(&value_text(val)),
                None => false,
            },
            FilterOp::Unknown(_) => true,
        }
    }
}

/// Value equality where `1` and `1.0` compare equal.
pub fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        _ => a == b,
    }
}

pub fn all_match(filters: &[FilterRule], row: &Row) -> bool {
    filters.iter().all(|f| f.matches(row))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(v: Value) -> Row {
        v.as_object().cloned().unwrap()
    }

    fn rule(v: Value) -> FilterRule {
        FilterRule::from_value(&v)
    }

    #[test]
    fn comparison_coerces_both_sides() {
        let r = row(json!({"amount": "$1,200"}));
        assert!(rule(json!({"field": "amount", "op": "gte", "value": "1000"})).matches(&r));
        assert!(!rule(json!({"field": "amount", "op": "lt", "value": 10})).matches(&r));
    }

    #[test]
    fn comparison_with_unparseable_operand_excludes() {
        let r = row(json!({"amount": "n/a"}));
        assert!(!rule(json!({"field": "amount", "op": "gt", "value": 0})).matches(&r));
        assert!(!rule(json!({"field": "amount", "op": "lte", "value": 0})).matches(&r));
        let r = row(json!({}));
        assert!(!rule(json!({"field": "amount", "op": "gt", "value": 0})).matches(&r));
    }

    #[test]
    fn membership_requires_list_target() {
        let r = row(json!({"k": "a"}));
        assert!(rule(json!({"field": "k", "op": "in", "value": ["a", "b"]})).matches(&r));
        assert!(!rule(json!({"field": "k", "op": "not_in", "value": ["a"]})).matches(&r));
        assert!(rule(json!({"field": "k", "op": "not_in", "value": ["z"]})).matches(&r));
        assert!(!rule(json!({"field": "k", "op": "in", "value": "a"})).matches(&r));
        assert!(!rule(json!({"field": "k", "op": "not_in", "value": "z"})).matches(&r));
    }

    #[test]
    fn regex_uses_search_semantics_and_tolerates_bad_patterns() {
        let r = row(json!({"name": "order-1234-x"}));
        assert!(rule(json!({"field": "name", "op": "regex", "value": "\\d{4}"})).matches(&r));
        assert!(!rule(json!({"field": "name", "op": "regex", "value": "^\\d{4}$"})).matches(&r));
        assert!(!rule(json!({"field": "name", "op": "regex", "value": "("})).matches(&r));
        assert!(!rule(json!({"field": "name", "op": "not_regex", "value": "("})).matches(&r));
        assert!(rule(json!({"field": "name", "op": "not_regex", "value": "^zzz"})).matches(&r));
    }

    #[test]
    fn eq_is_numerically_loose_but_type_strict() {
        let r = row(json!({"n": 1}));
        assert!(rule(json!({"field": "n", "op": "eq", "value": 1.0})).matches(&r));
        assert!(!rule(json!({"field": "n", "op": "eq", "value": "1"})).matches(&r));
        assert!(rule(json!({"field": "n", "op": "ne", "value": "1"})).matches(&r));
    }

    #[test]
    fn existence_and_passthrough_cases() {
        let r = row(json!({"a": null, "b": 0}));
        assert!(rule(json!({"field": "a", "op": "not_exists"})).matches(&r));
        assert!(rule(json!({"field": "b", "op": "exists"})).matches(&r));
        assert!(rule(json!({"op": "eq", "value": 3})).matches(&r));
        assert!(rule(json!({"field": "b", "op": "between"})).matches(&r));
        assert!(rule(json!("not an object")).matches(&r));
    }

    #[test]
    fn contains_on_null_is_false() {
        let r = row(json!({"t": null, "s": "hello world"}));
        assert!(!rule(json!({"field": "t", "op": "contains", "value": "x"})).matches(&r));
        assert!(rule(json!({"field": "s", "op": "contains", "value": "lo w"})).matches(&r));
    }
}
