use rust_decimal::Decimal;
use serde_json::{Map, Value};
use tracing::debug;

use super::{deduplicate, LocalEngine, RuleEvaluator};
use crate::coerce::{decimal_to_f64, StandardCoercion, ValueCoercion};
use crate::rules::SimpleRules;
use crate::types::{CleanOutcome, QualityStats, Row};

fn normalize_key(k: &str) -> String {
    k.trim().to_lowercase()
}

/// Cleans `(id, amount)` rows: parse, bound, round, dedup by id, sort by id.
pub struct SimpleRuleEngine<C: ValueCoercion = StandardCoercion> {
    rules: SimpleRules,
    coercion: C,
}

impl SimpleRuleEngine {
    pub fn new(rules: SimpleRules) -> Self {
        Self::with_coercion(rules, StandardCoercion)
    }
}

impl<C: ValueCoercion> SimpleRuleEngine<C> {
    pub fn with_coercion(rules: SimpleRules, coercion: C) -> Self {
        Self { rules, coercion }
    }

    pub fn rules(&self) -> &SimpleRules {
        &self.rules
    }
}

impl<C: ValueCoercion> RuleEvaluator for SimpleRuleEngine<C> {
    fn engine(&self) -> LocalEngine {
        LocalEngine::Simple
    }

    fn evaluate(&self, rows: &[Row]) -> CleanOutcome {
        let rules = &self.rules;
        let id_key = normalize_key(&rules.id_field);
        let amount_key = normalize_key(&rules.amount_field);

        let mut quality = QualityStats::new(rows.len());
        let mut invalid_id = 0u64;
        let mut invalid_amount = 0u64;
        let mut filtered_negative = 0u64;
        let mut filtered_min = 0u64;
        let mut filtered_max = 0u64;
        let mut kept: Vec<Row> = Vec::with_capacity(rows.len());

        for raw in rows {
            let lookup: Map<String, Value> = raw
                .iter()
                .map(|(k, v)| (normalize_key(k), v.clone()))
                .collect();
            let id_val = lookup.get(&id_key).and_then(|v| self.coercion.int(v));
            let amount_val = lookup.get(&amount_key).and_then(|v| self.coercion.decimal(v));

            let Some(id) = id_val else {
                invalid_id += 1;
                continue;
            };
            let Some(amount) = amount_val else {
                invalid_amount += 1;
                continue;
            };

            if rules.drop_negative_amount && amount < Decimal::ZERO {
                filtered_negative += 1;
                continue;
            }
            if rules.min_amount.is_some_and(|min| amount < min) {
                filtered_min += 1;
                continue;
            }
            if rules.max_amount.is_some_and(|max| amount > max) {
                filtered_max += 1;
                continue;
            }

            let rounded = self.coercion.quantize(amount, rules.amount_round_digits);
            let Some(amount) = decimal_to_f64(rounded) else {
                invalid_amount += 1;
                continue;
            };

            let mut row = Row::new();
            row.insert("id".to_string(), Value::from(id));
            row.insert("amount".to_string(), Value::from(amount));
            kept.push(row);
        }

        let mut duplicates = 0u64;
        if rules.deduplicate_by_id {
            let (deduped, removed) = deduplicate(kept, rules.deduplicate_keep, |r| {
                r.get("id").and_then(Value::as_i64)
            });
            kept = deduped;
            duplicates = removed;
        }

        if rules.sort_by_id {
            kept.sort_by_key(|r| r.get("id").and_then(Value::as_i64));
        }

        quality.output_rows = kept.len() as u64;
        quality.invalid_rows = invalid_id + invalid_amount;
        quality.filtered_rows = filtered_negative + filtered_min + filtered_max;
        quality.duplicate_rows_removed = duplicates;
        quality.set_hits("invalid_id", invalid_id);
        quality.set_hits("invalid_amount", invalid_amount);
        quality.set_hits("filtered_negative", filtered_negative);
        quality.set_hits("filtered_min_amount", filtered_min);
        quality.set_hits("filtered_max_amount", filtered_max);
        quality.set_hits("deduplicate_removed", duplicates);

        debug!(
            input_rows = quality.input_rows,
            output_rows = quality.output_rows,
            invalid_rows = quality.invalid_rows,
            filtered_rows = quality.filtered_rows,
            "simple rules applied"
        );

        CleanOutcome { rows: kept, quality }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::rows_from_value;
    use serde_json::json;

    fn engine(params: Value) -> SimpleRuleEngine {
        SimpleRuleEngine::new(SimpleRules::from_params(&params))
    }

    #[test]
    fn reference_scenario() {
        let rows = rows_from_value(&json!([
            {"id": "1", "amount": "100.126"},
            {"id": "2", "amount": "-5"},
            {"id": "bad", "amount": "3"},
            {"id": "1", "amount": "$120.225"},
            {"id": "3", "amount": "999"}
        ]));
        let out = engine(json!({"rules": {
            "drop_negative_amount": true,
            "max_amount": 500,
            "deduplicate_by_id": true,
            "deduplicate_keep": "last",
            "amount_round_digits": 2
        }}))
        .evaluate(&rows);

        assert_eq!(out.rows, rows_from_value(&json!([{"id": 1, "amount": 120.23}])));
        assert_eq!(out.quality.input_rows, 5);
        assert_eq!(out.quality.output_rows, 1);
        assert_eq!(out.quality.invalid_rows, 1);
        assert_eq!(out.quality.filtered_rows, 2);
        assert_eq!(out.quality.duplicate_rows_removed, 1);
        assert_eq!(out.quality.rule_hits["invalid_id"], 1);
        assert_eq!(out.quality.rule_hits["filtered_negative"], 1);
        assert_eq!(out.quality.rule_hits["filtered_max_amount"], 1);
    }

    #[test]
    fn field_names_are_case_insensitive() {
        let rows = rows_from_value(&json!([{" ID ": "7", "Amount": "1.005"}]));
        let out = engine(json!({"id_field": "Id"})).evaluate(&rows);
        assert_eq!(out.rows, rows_from_value(&json!([{"id": 7, "amount": 1.01}])));
    }

    #[test]
    fn keep_first_retains_earliest() {
        let rows = rows_from_value(&json!([
            {"id": 2, "amount": 1},
            {"id": 1, "amount": 2},
            {"id": 2, "amount": 3}
        ]));
        let out = engine(json!({"rules": {"deduplicate_keep": "first", "sort_by_id": false}}))
            .evaluate(&rows);
        assert_eq!(
            out.rows,
            rows_from_value(&json!([{"id": 2, "amount": 1.0}, {"id": 1, "amount": 2.0}]))
        );
    }

    #[test]
    fn dedup_yields_one_row_per_id() {
        let rows = rows_from_value(&json!([
            {"id": 3, "amount": 1}, {"id": 1, "amount": 1}, {"id": 3, "amount": 2},
            {"id": 1, "amount": 5}, {"id": 2, "amount": 9}
        ]));
        let out = engine(json!({})).evaluate(&rows);
        let ids: Vec<i64> = out.rows.iter().map(|r| r["id"].as_i64().unwrap()).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(out.rows[0]["amount"], json!(5.0));
        assert_eq!(out.rows[2]["amount"], json!(2.0));
    }

    #[test]
    fn min_bound_and_missing_amount() {
        let rows = rows_from_value(&json!([
            {"id": 1, "amount": "5"},
            {"id": 2},
            {"id": 3, "amount": "50"}
        ]));
        let out = engine(json!({"min_amount": "10"})).evaluate(&rows);
        assert_eq!(out.quality.rule_hits["filtered_min_amount"], 1);
        assert_eq!(out.quality.rule_hits["invalid_amount"], 1);
        assert_eq!(out.quality.output_rows, 1);
    }

    #[test]
    fn negative_amounts_kept_unless_requested() {
        let rows = rows_from_value(&json!([{"id": 1, "amount": "-2.5"}]));
        let out = engine(json!({})).evaluate(&rows);
        assert_eq!(out.rows[0]["amount"], json!(-2.5));
    }
}
