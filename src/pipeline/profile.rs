use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

use crate::coerce::{decimal_to_f64, quantize, to_decimal};
use crate::pipeline::processing::quality_gate::GateEvaluation;
use crate::types::{QualityStats, Row};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NumericStats {
    pub sum: f64,
    pub min: f64,
    pub max: f64,
    pub avg: f64,
}

/// Summary of a final row set, written to `profile.json`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Profile {
    pub rows: u64,
    pub cols: u64,
    pub sum_amount: f64,
    pub min_amount: f64,
    pub max_amount: f64,
    pub avg_amount: f64,
    pub quality: QualityStats,
    pub fields: Vec<String>,
    pub numeric_stats: BTreeMap<String, NumericStats>,
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality_gate: Option<GateEvaluation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preprocess: Option<Value>,
}

fn two_places(d: Decimal) -> f64 {
    decimal_to_f64(quantize(d, 2)).unwrap_or(0.0)
}

fn stats_of(values: &[Decimal]) -> Option<NumericStats> {
    let first = *values.first()?;
    let (mut sum, mut min, mut max) = (Decimal::ZERO, first, first);
    for v in values {
        sum += *v;
        min = min.min(*v);
        max = max.max(*v);
    }
    let avg = sum / Decimal::from(values.len() as u64);
    Some(NumericStats {
        sum: two_places(sum),
        min: two_places(min),
        max: two_places(max),
        avg: two_places(avg),
    })
}

impl Profile {
    /// `amount` statistics treat unparseable values as zero; `numeric_stats`
    /// only counts values that parse.
    pub fn build(rows: &[Row], quality: &QualityStats, source: &str) -> Self {
        let fields: BTreeSet<&String> = rows.iter().flat_map(|r| r.keys()).collect();

        let numeric_stats = fields
            .iter()
            .filter_map(|f| {
                let values: Vec<Decimal> = rows.iter().filter_map(|r| r.get(*f).and_then(to_decimal)).collect();
                stats_of(&values).map(|s| ((*f).clone(), s))
            })
            .collect();

        let amounts: Vec<Decimal> = rows
            .iter()
            .map(|r| r.get("amount").and_then(to_decimal).unwrap_or(Decimal::ZERO))
            .collect();
        let amount = stats_of(&amounts).unwrap_or(NumericStats {
            sum: 0.0,
            min: 0.0,
            max: 0.0,
            avg: 0.0,
        });

        Profile {
            rows: rows.len() as u64,
            cols: fields.len() as u64,
            sum_amount: amount.sum,
            min_amount: amount.min,
            max_amount: amount.max,
            avg_amount: amount.avg,
            quality: quality.clone(),
            fields: fields.into_iter().cloned().collect(),
            numeric_stats,
            source: source.to_string(),
            quality_gate: None,
            preprocess: None,
        }
    }

    pub fn with_quality_gate(mut self, evaluation: GateEvaluation) -> Self {
        self.quality_gate = Some(evaluation);
        self
    }

    pub fn with_preprocess(mut self, preprocess: Option<Value>) -> Self {
        self.preprocess = preprocess;
        self
    }
}
