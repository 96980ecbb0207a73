use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// One semi-structured record. Keys keep their insertion order.
pub type Row = Map<String, Value>;

/// Counters describing what a rule engine did to a row set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityStats {
    pub input_rows: u64,
    pub output_rows: u64,
    pub invalid_rows: u64,
    pub filtered_rows: u64,
    pub duplicate_rows_removed: u64,
    /// Per-reason breakdown (`invalid_id`, `cast_failed`, `filtered_rules`, ...)
    pub rule_hits: BTreeMap<String, u64>,
    /// Extra keys reported by a remote engine, carried through untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl QualityStats {
    pub fn new(input_rows: usize) -> Self {
        Self {
            input_rows: input_rows as u64,
            ..Default::default()
        }
    }

    pub fn hit(&mut self, reason: &str) {
        *self.rule_hits.entry(reason.to_string()).or_insert(0) += 1;
    }

    pub fn set_hits(&mut self, reason: &str, count: u64) {
        self.rule_hits.insert(reason.to_string(), count);
    }
}

/// Output of a rule engine: the cleaned rows plus their quality counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CleanOutcome {
    pub rows: Vec<Row>,
    pub quality: QualityStats,
}

/// Builds a row from `(key, value)` pairs, mostly for tests and defaults.
pub fn row_from_pairs<I, K>(pairs: I) -> Row
where
    I: IntoIterator<Item = (K, Value)>,
    K: Into<String>,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v)).collect()
}

/// Converts a JSON array of objects into rows, skipping anything that is not an object.
pub fn rows_from_value(value: &Value) -> Vec<Row> {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.as_object().cloned())
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn quality_stats_round_trips_remote_extras() {
        let raw = json!({
            "input_rows": 3,
            "output_rows": 2,
            "invalid_rows": 1,
            "rule_hits": {"invalid_id": 1},
            "rust_v2_used": true
        });
        let stats: QualityStats = serde_json::from_value(raw).unwrap();
        assert_eq!(stats.input_rows, 3);
        assert_eq!(stats.filtered_rows, 0);
        assert_eq!(stats.rule_hits.get("invalid_id"), Some(&1));
        assert_eq!(stats.extra.get("rust_v2_used"), Some(&json!(true)));
    }

    #[test]
    fn negative_counters_are_rejected() {
        let raw = json!({"input_rows": -1});
        assert!(serde_json::from_value::<QualityStats>(raw).is_err());
    }

    #[test]
    fn rows_from_value_skips_non_objects() {
        let rows = rows_from_value(&json!([{"a": 1}, 2, "x", {"b": null}]));
        assert_eq!(rows.len(), 2);
    }
}
