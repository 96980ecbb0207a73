//! Row cleaning: the fixed-schema simple engine and the open-schema generic engine.

pub mod generic;
pub mod simple;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::hash::Hash;

use crate::rules::{GenericRules, KeepPolicy, RuleMode, SimpleRules, SortKey, SortOrder};
use crate::types::{CleanOutcome, Row};

pub use generic::GenericRuleEngine;
pub use simple::SimpleRuleEngine;

/// A rule engine turns raw rows into cleaned rows plus quality counters.
pub trait RuleEvaluator {
    fn engine(&self) -> LocalEngine;

    fn evaluate(&self, rows: &[Row]) -> CleanOutcome;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocalEngine {
    Simple,
    Generic,
}

impl LocalEngine {
    pub fn as_str(&self) -> &'static str {
        match self {
            LocalEngine::Simple => "simple",
            LocalEngine::Generic => "generic",
        }
    }
}

impl From<RuleMode> for LocalEngine {
    fn from(mode: RuleMode) -> Self {
        match mode {
            RuleMode::Simple => LocalEngine::Simple,
            RuleMode::Generic => LocalEngine::Generic,
        }
    }
}

/// Builds the engine selected by the rule document in `params`.
pub fn evaluator_for(params: &Value) -> Box<dyn RuleEvaluator> {
    match RuleMode::detect(params) {
        RuleMode::Generic => Box::new(GenericRuleEngine::new(GenericRules::from_params(params))),
        RuleMode::Simple => Box::new(SimpleRuleEngine::new(SimpleRules::from_params(params))),
    }
}

/// Cleans `rows` with whichever engine `params` selects.
pub fn clean_rows(rows: &[Row], params: &Value) -> (LocalEngine, CleanOutcome) {
    let evaluator = evaluator_for(params);
    let outcome = evaluator.evaluate(rows);
    (evaluator.engine(), outcome)
}

/// Removes rows with a repeated key.
///
/// Each surviving key keeps the position of its first occurrence; with
/// [`KeepPolicy::Last`] the row at that position is replaced by the latest
/// occurrence. Returns the survivors and how many rows were dropped.
pub fn deduplicate<K, F>(rows: Vec<Row>, keep: KeepPolicy, key_of: F) -> (Vec<Row>, u64)
where
    K: Eq + Hash,
    F: Fn(&Row) -> K,
{
    let total = rows.len();
    let mut slots: HashMap<K, usize> = HashMap::with_capacity(total);
    let mut out: Vec<Row> = Vec::with_capacity(total);

    for row in rows {
        let key = key_of(&row);
        match slots.get(&key) {
            Some(&slot) => {
                if keep == KeepPolicy::Last {
                    out[slot] = row;
                }
            }
            None => {
                slots.insert(key, out.len());
                out.push(row);
            }
        }
    }

    let removed = (total - out.len()) as u64;
    (out, removed)
}

fn key_part(v: Option<&Value>) -> String {
    let number = |x: f64| if x == 0.0 { "n:0".to_string() } else { format!("n:{}", x) };
    match v {
        None | Some(Value::Null) => "null".to_string(),
        Some(Value::Bool(b)) => format!("b:{}", b),
        Some(Value::Number(n)) => n.as_f64().map(number).unwrap_or_else(|| format!("n:{}", n)),
        Some(Value::String(s)) => {
            let s = s.trim();
            match s.parse::<f64>() {
                Ok(x) if x.is_finite() => number(x),
                _ => format!("s:{}", s),
            }
        }
        Some(other) => format!("j:{}", other),
    }
}

/// Composite dedup key over `fields`. Numbers compare by value, so `1`,
/// `1.0` and `" 1 "` collide, and surrounding whitespace in text is ignored.
pub fn dedup_key(row: &Row, fields: &[String]) -> String {
    fields
        .iter()
        .map(|f| key_part(row.get(f)))
        .collect::<Vec<_>>()
        .join("\u{1f}")
}

fn type_rank(v: &Value) -> u8 {
    match v {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Total order over JSON scalars: null < bool < number < string < array < object.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(_), Value::Array(_)) | (Value::Object(_), Value::Object(_)) => {
            a.to_string().cmp(&b.to_string())
        }
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

/// Multi-key stable sort, applying keys from last to first.
///
/// Descending is the exact reverse of ascending, so nulls come first when
/// ascending and last when descending.
pub fn sort_rows(rows: &mut [Row], keys: &[SortKey]) {
    for key in keys.iter().rev() {
        rows.sort_by(|a, b| {
            let ord = compare_values(
                a.get(&key.field).unwrap_or(&Value::Null),
                b.get(&key.field).unwrap_or(&Value::Null),
            );
            match key.order {
                SortOrder::Asc => ord,
                SortOrder::Desc => ord.reverse(),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::rows_from_value;
    use serde_json::json;

    #[test]
    fn dedup_keep_last_preserves_first_position() {
        let rows = rows_from_value(&json!([
            {"k": 1, "v": "a"},
            {"k": 2, "v": "b"},
            {"k": 1, "v": "c"}
        ]));
        let (out, removed) = deduplicate(rows, KeepPolicy::Last, |r| r["k"].to_string());
        assert_eq!(removed, 1);
        assert_eq!(out[0]["v"], json!("c"));
        assert_eq!(out[1]["v"], json!("b"));
    }

    #[test]
    fn dedup_key_compares_numbers_by_value() {
        let rows = rows_from_value(&json!([
            {"id": 1, "v": "a"},
            {"id": 1.0, "v": "b"},
            {"id": " 1 ", "v": "c"},
            {"id": "1x", "v": "d"},
            {"v": "e"},
            {"id": null, "v": "f"}
        ]));
        let fields = vec!["id".to_string()];
        assert_eq!(dedup_key(&rows[0], &fields), dedup_key(&rows[1], &fields));
        assert_eq!(dedup_key(&rows[0], &fields), dedup_key(&rows[2], &fields));
        assert_ne!(dedup_key(&rows[0], &fields), dedup_key(&rows[3], &fields));
        assert_eq!(dedup_key(&rows[4], &fields), dedup_key(&rows[5], &fields));

        let (out, removed) = deduplicate(rows, KeepPolicy::First, |r| dedup_key(r, &fields));
        assert_eq!(removed, 3);
        assert_eq!(out[0]["v"], json!("a"));
    }

    #[test]
    fn dedup_keep_first() {
        let rows = rows_from_value(&json!([{"k": 1, "v": "a"}, {"k": 1, "v": "c"}]));
        let (out, removed) = deduplicate(rows, KeepPolicy::First, |r| r["k"].to_string());
        assert_eq!(removed, 1);
        assert_eq!(out[0]["v"], json!("a"));
    }

    #[test]
    fn sort_places_nulls_first_ascending_and_last_descending() {
        let mut rows = rows_from_value(&json!([{"a": 2}, {"a": null}, {"a": 1}, {}]));
        let asc = [SortKey { field: "a".into(), order: SortOrder::Asc }];
        sort_rows(&mut rows, &asc);
        let seen: Vec<Value> = rows.iter().map(|r| r.get("a").cloned().unwrap_or(Value::Null)).collect();
        assert_eq!(seen, vec![Value::Null, Value::Null, json!(1), json!(2)]);

        let desc = [SortKey { field: "a".into(), order: SortOrder::Desc }];
        sort_rows(&mut rows, &desc);
        assert_eq!(rows[0]["a"], json!(2));
        assert!(rows[3].get("a").map_or(true, Value::is_null));
    }

    #[test]
    fn multi_key_sort_is_stable() {
        let mut rows = rows_from_value(&json!([
            {"g": "b", "n": 1},
            {"g": "a", "n": 2},
            {"g": "b", "n": 0},
            {"g": "a", "n": 1}
        ]));
        let keys = [
            SortKey { field: "g".into(), order: SortOrder::Asc },
            SortKey { field: "n".into(), order: SortOrder::Desc },
        ];
        sort_rows(&mut rows, &keys);
        let seen: Vec<(String, i64)> = rows
            .iter()
            .map(|r| (r["g"].as_str().unwrap().to_string(), r["n"].as_i64().unwrap()))
            .collect();
        assert_eq!(
            seen,
            vec![("a".into(), 2), ("a".into(), 1), ("b".into(), 1), ("b".into(), 0)]
        );
    }

    #[test]
    fn mixed_types_order_by_rank() {
        assert_eq!(compare_values(&json!(true), &json!(0)), Ordering::Less);
        assert_eq!(compare_values(&json!("1"), &json!(5)), Ordering::Greater);
        assert_eq!(compare_values(&json!(1.5), &json!(2)), Ordering::Less);
    }
}
