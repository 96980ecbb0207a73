use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

use super::io::union_columns;
use super::spec::PreprocessSpec;
use super::PreprocessSummary;
use crate::coerce::value_text;
use crate::types::Row;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldCoverage {
    pub non_null: u64,
    pub ratio: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClaimLengthStats {
    pub count: u64,
    pub min: u64,
    pub max: u64,
    pub avg: f64,
}

/// Post-preprocessing data quality report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualityReport {
    pub rows: u64,
    pub fields: u64,
    pub summary: PreprocessSummary,
    pub source_types: BTreeMap<String, u64>,
    pub field_coverage: BTreeMap<String, FieldCoverage>,
    pub required_field_missing: BTreeMap<String, u64>,
    pub claim_length: ClaimLengthStats,
}

fn present(v: Option<&Value>) -> bool {
    match v {
        None | Some(Value::Null) => false,
        Some(Value::String(s)) => !s.trim().is_empty(),
        Some(_) => true,
    }
}

pub fn build_quality_report(rows: &[Row], summary: &PreprocessSummary, spec: &PreprocessSpec) -> QualityReport {
    let total = rows.len() as u64;
    let columns = union_columns(rows);

    let field_coverage = columns
        .iter()
        .map(|f| {
            let non_null = rows.iter().filter(|r| present(r.get(f))).count() as u64;
            let ratio = if total > 0 { non_null as f64 / total as f64 } else { 0.0 };
            (f.clone(), FieldCoverage { non_null, ratio })
        })
        .collect();

    let mut source_types: BTreeMap<String, u64> = BTreeMap::new();
    for r in rows {
        let st = r
            .get("source_type")
            .filter(|v| present(Some(v)))
            .map(value_text)
            .unwrap_or_else(|| "unknown".to_string());
        *source_types.entry(st).or_insert(0) += 1;
    }

    let lengths: Vec<u64> = rows
        .iter()
        .filter_map(|r| r.get("claim_text"))
        .filter(|v| !v.is_null())
        .map(|v| value_text(v).trim().chars().count() as u64)
        .filter(|n| *n > 0)
        .collect();
    let claim_length = ClaimLengthStats {
        count: lengths.len() as u64,
        min: lengths.iter().copied().min().unwrap_or(0),
        max: lengths.iter().copied().max().unwrap_or(0),
        avg: if lengths.is_empty() {
            0.0
        } else {
            lengths.iter().sum::<u64>() as f64 / lengths.len() as f64
        },
    };

    let mut required = spec.quality_required_fields.clone();
    if required.is_empty() && spec.standardize_evidence {
        required = vec!["claim_text".to_string(), "source_path".to_string()];
    }
    let required_field_missing = required
        .into_iter()
        .map(|f| {
            let missing = rows.iter().filter(|r| !present(r.get(&f))).count() as u64;
            (f, missing)
        })
        .collect();

    QualityReport {
        rows: total,
        fields: columns.len() as u64,
        summary: summary.clone(),
        source_types,
        field_coverage,
        required_field_missing,
        claim_length,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::rows_from_value;
    use serde_json::json;

    #[test]
    fn coverage_lengths_and_required_defaults() {
        let rows = rows_from_value(&json!([
            {"claim_text": "abcd", "source_path": "/x", "source_type": "txt"},
            {"claim_text": " ab ", "source_path": ""},
            {"claim_text": null, "source_path": null, "source_type": "csv"}
        ]));
        let spec = PreprocessSpec::from_value(&json!({"standardize_evidence": true}));
        let report = build_quality_report(&rows, &PreprocessSummary::default(), &spec);

        assert_eq!(report.rows, 3);
        assert_eq!(report.fields, 3);
        assert_eq!(report.field_coverage["claim_text"].non_null, 2);
        assert!((report.field_coverage["source_path"].ratio - 1.0 / 3.0).abs() < 1e-9);
        assert_eq!(report.source_types["unknown"], 1);
        assert_eq!(report.source_types["txt"], 1);
        assert_eq!(report.required_field_missing["source_path"], 2);
        assert_eq!(report.claim_length.count, 2);
        assert_eq!(report.claim_length.min, 2);
        assert_eq!(report.claim_length.max, 4);
        assert!((report.claim_length.avg - 3.0).abs() < 1e-9);
    }

    #[test]
    fn empty_rows_report_zeroes() {
        let report = build_quality_report(&[], &PreprocessSummary::default(), &PreprocessSpec::default());
        assert_eq!(report.rows, 0);
        assert!(report.field_coverage.is_empty());
        assert!(report.required_field_missing.is_empty());
        assert_eq!(report.claim_length.avg, 0.0);
    }
}
