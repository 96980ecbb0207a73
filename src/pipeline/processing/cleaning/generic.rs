use serde_json::{Number, Value};
use tracing::debug;

use super::{dedup_key, deduplicate, sort_rows, LocalEngine, RuleEvaluator};
use crate::coerce::{value_text, StandardCoercion, ValueCoercion};
use crate::rules::filter::all_match;
use crate::rules::{CastType, GenericRules};
use crate::types::{CleanOutcome, QualityStats, Row};

/// Empty strings and configured null tokens become null; other strings are
/// trimmed only when `trim` is set.
pub(crate) fn normalize_null(v: Value, tokens: &[String], trim: bool) -> Value {
    match v {
        Value::String(s) => {
            let t = s.trim();
            if t.is_empty() || tokens.iter().any(|tok| tok == &t.to_lowercase()) {
                Value::Null
            } else if trim {
                Value::String(t.to_string())
            } else {
                Value::String(s)
            }
        }
        other => other,
    }
}

/// Moves `old` to `new`. An existing `new` key is overwritten in place,
/// otherwise the renamed key goes to the end.
pub(crate) fn rename_key(row: Row, old: &str, new: &str) -> Row {
    if old == new || !row.contains_key(old) {
        return row;
    }
    let mut moved = Value::Null;
    let mut out = Row::with_capacity(row.len());
    for (k, v) in row {
        if k == old {
            moved = v;
        } else {
            out.insert(k, v);
        }
    }
    out.insert(new.to_string(), moved);
    out
}

pub(crate) fn project(row: Row, include: &[String], exclude: &[String]) -> Row {
    let mut row = if include.is_empty() {
        row
    } else {
        include
            .iter()
            .map(|k| (k.clone(), row.get(k).cloned().unwrap_or(Value::Null)))
            .collect()
    };
    if !exclude.is_empty() {
        row.retain(|k, _| !exclude.contains(k));
    }
    row
}

pub(crate) fn backfill_defaults(row: &mut Row, defaults: &[(String, Value)]) {
    for (k, dv) in defaults {
        if row.get(k).map_or(true, Value::is_null) {
            row.insert(k.clone(), dv.clone());
        }
    }
}

/// Open-schema cleaning driven entirely by a [`GenericRules`] document.
pub struct GenericRuleEngine<C: ValueCoercion = StandardCoercion> {
    rules: GenericRules,
    coercion: C,
}

impl GenericRuleEngine {
    pub fn new(rules: GenericRules) -> Self {
        Self::with_coercion(rules, StandardCoercion)
    }
}

impl<C: ValueCoercion> GenericRuleEngine<C> {
    pub fn with_coercion(rules: GenericRules, coercion: C) -> Self {
        Self { rules, coercion }
    }

    /// Returns the cast value and whether the cast succeeded. Null always succeeds.
    fn cast(&self, v: Value, cast: &CastType) -> (Value, bool) {
        if v.is_null() {
            return (Value::Null, true);
        }
        match cast {
            CastType::Str => (Value::String(value_text(&v)), true),
            CastType::Int => match self.coercion.int(&v) {
                Some(i) => (Value::from(i), true),
                None => (Value::Null, false),
            },
            CastType::Float => match self.coercion.float(&v).and_then(Number::from_f64) {
                Some(n) => (Value::Number(n), true),
                None => (Value::Null, false),
            },
            CastType::Bool => (Value::Bool(self.coercion.boolean(&v, false)), true),
            CastType::Passthrough => (v, true),
        }
    }

    fn apply_case(&self, row: &mut Row) {
        let rules = &self.rules;
        if rules.lowercase_fields.is_empty() && rules.uppercase_fields.is_empty() {
            return;
        }
        for (k, v) in row.iter_mut() {
            if let Value::String(s) = v {
                if rules.lowercase_fields.contains(k) {
                    *s = s.to_lowercase();
                }
                if rules.uppercase_fields.contains(k) {
                    *s = s.to_uppercase();
                }
            }
        }
    }
}

enum RowFate {
    Kept(Row),
    CastFailed,
    RequiredMissing,
    Filtered,
}

impl<C: ValueCoercion> GenericRuleEngine<C> {
    fn process_row(&self, raw: &Row) -> RowFate {
        let rules = &self.rules;

        let mut row: Row = raw
            .iter()
            .map(|(k, v)| {
                (
                    k.clone(),
                    normalize_null(v.clone(), &rules.null_values, rules.trim_strings),
                )
            })
            .collect();

        for (old, new) in &rules.rename_map {
            row = rename_key(row, old, new);
        }
        row = project(row, &rules.include_fields, &rules.exclude_fields);
        backfill_defaults(&mut row, &rules.default_values);
        self.apply_case(&mut row);

        let mut cast_failed = false;
        for (field, cast) in &rules.casts {
            let current = row.get(field).cloned().unwrap_or(Value::Null);
            let (value, ok) = self.cast(current, cast);
            row.insert(field.clone(), value);
            cast_failed |= !ok;
        }
        if cast_failed {
            return RowFate::CastFailed;
        }

        if rules
            .required_fields
            .iter()
            .any(|f| row.get(f).map_or(true, Value::is_null))
        {
            return RowFate::RequiredMissing;
        }

        if !all_match(&rules.filters, &row) {
            return RowFate::Filtered;
        }

        RowFate::Kept(row)
    }
}

impl<C: ValueCoercion> RuleEvaluator for GenericRuleEngine<C> {
    fn engine(&self) -> LocalEngine {
        LocalEngine::Generic
    }

    fn evaluate(&self, rows: &[Row]) -> CleanOutcome {
        let rules = &self.rules;
        let mut quality = QualityStats::new(rows.len());
        let mut cast_failed = 0u64;
        let mut required_failed = 0u64;
        let mut filtered = 0u64;
        let mut kept: Vec<Row> = Vec::with_capacity(rows.len());

        for raw in rows {
            match self.process_row(raw) {
                RowFate::Kept(row) => kept.push(row),
                RowFate::CastFailed => cast_failed += 1,
                RowFate::RequiredMissing => required_failed += 1,
                RowFate::Filtered => filtered += 1,
            }
        }

        let mut duplicates = 0u64;
        if !rules.deduplicate_by.is_empty() {
            let (deduped, removed) =
                deduplicate(kept, rules.deduplicate_keep, |r| dedup_key(r, &rules.deduplicate_by));
            kept = deduped;
            duplicates = removed;
        }

        sort_rows(&mut kept, &rules.sort_by);

        quality.output_rows = kept.len() as u64;
        quality.invalid_rows = cast_failed + required_failed;
        quality.filtered_rows = filtered;
        quality.duplicate_rows_removed = duplicates;
        quality.set_hits("cast_failed", cast_failed);
        quality.set_hits("required_failed", required_failed);
        quality.set_hits("filtered_rules", filtered);
        quality.set_hits("deduplicate_removed", duplicates);

        debug!(
            input_rows = quality.input_rows,
            output_rows = quality.output_rows,
            invalid_rows = quality.invalid_rows,
            filtered_rows = quality.filtered_rows,
            "generic rules applied"
        );

        CleanOutcome { rows: kept, quality }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::rows_from_value;
    use serde_json::json;

    fn run(rules: Value, rows: Value) -> CleanOutcome {
        let rules = GenericRules::from_rules(rules.as_object().unwrap());
        GenericRuleEngine::new(rules).evaluate(&rows_from_value(&rows))
    }

    #[test]
    fn cast_failure_counts_as_invalid_before_filtering() {
        let out = run(
            json!({
                "casts": {"amount": "float"},
                "filters": [{"field": "amount", "op": "gte", "value": 10}]
            }),
            json!([
                {"amount": "25"},
                {"amount": "abc"},
                {"amount": "5"}
            ]),
        );
        assert_eq!(out.rows, rows_from_value(&json!([{"amount": 25.0}])));
        assert_eq!(out.quality.invalid_rows, 1);
        assert_eq!(out.quality.filtered_rows, 1);
        assert_eq!(out.quality.rule_hits["cast_failed"], 1);
        assert_eq!(out.quality.rule_hits["filtered_rules"], 1);
    }

    #[test]
    fn null_amount_after_normalization_is_dropped_by_filter() {
        let out = run(
            json!({
                "casts": {"amount": "float"},
                "filters": [{"field": "amount", "op": "gte", "value": 10}]
            }),
            json!([{"amount": "N/A"}]),
        );
        assert!(out.rows.is_empty());
        assert_eq!(out.quality.rule_hits["filtered_rules"], 1);
    }

    #[test]
    fn rename_project_default_case_pipeline() {
        let out = run(
            json!({
                "rename_map": {"Name": "name"},
                "include_fields": ["name", "city", "tier"],
                "default_values": {"tier": "basic"},
                "uppercase_fields": ["city"],
                "lowercase_fields": ["name"]
            }),
            json!([{"Name": "  ALICE ", "city": "paris", "noise": 1, "tier": "null"}]),
        );
        assert_eq!(
            out.rows,
            rows_from_value(&json!([{"name": "alice", "city": "PARIS", "tier": "basic"}]))
        );
    }

    #[test]
    fn rename_appends_new_key_at_end() {
        let out = run(
            json!({"rename_map": {"a": "z"}}),
            json!([{"a": 1, "b": 2}]),
        );
        let keys: Vec<&String> = out.rows[0].keys().collect();
        assert_eq!(keys, vec!["b", "z"]);
    }

    #[test]
    fn required_fields_and_composite_dedup() {
        let out = run(
            json!({
                "required_fields": ["k"],
                "deduplicate_by": ["k", "g"],
                "deduplicate_keep": "first",
                "sort_by": [{"field": "v", "order": "desc"}]
            }),
            json!([
                {"k": "1", "g": "x", "v": 1},
                {"k": "", "g": "x", "v": 2},
                {"k": "1", "g": "x", "v": 3},
                {"k": "1", "g": "y", "v": 4}
            ]),
        );
        assert_eq!(out.quality.rule_hits["required_failed"], 1);
        assert_eq!(out.quality.duplicate_rows_removed, 1);
        let vs: Vec<i64> = out.rows.iter().map(|r| r["v"].as_i64().unwrap()).collect();
        assert_eq!(vs, vec![4, 1]);
    }

    #[test]
    fn dedup_treats_equal_numbers_as_one_key() {
        let out = run(
            json!({"deduplicate_by": ["id"], "deduplicate_keep": "last"}),
            json!([
                {"id": 1, "v": "a"},
                {"id": 1.0, "v": "b"},
                {"id": "2", "v": "c"},
                {"id": 2, "v": "d"}
            ]),
        );
        assert_eq!(out.quality.duplicate_rows_removed, 2);
        let vs: Vec<&str> = out.rows.iter().map(|r| r["v"].as_str().unwrap()).collect();
        assert_eq!(vs, vec!["b", "d"]);
    }

    #[test]
    fn trim_disabled_keeps_whitespace() {
        let out = run(json!({"trim_strings": false}), json!([{"a": "  x "}]));
        assert_eq!(out.rows[0]["a"], json!("  x "));
    }

    #[test]
    fn casts_cover_all_types() {
        let out = run(
            json!({"casts": {"i": "int", "b": "bool", "s": "string", "f": "decimal", "m": "int"}}),
            json!([{"i": "4.9", "b": "yes", "s": 12, "f": "$1,000.5"}]),
        );
        assert_eq!(
            out.rows[0],
            rows_from_value(&json!([{"i": 4, "b": true, "s": "12", "f": 1000.5, "m": null}]))
                .remove(0)
        );
    }
}
