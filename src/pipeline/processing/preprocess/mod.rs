//! Preprocessing of raw ingested rows ahead of cleaning.
//!
//! A [`PreprocessSpec`] drives one pass over a row set: header
//! normalization, null and whitespace handling, amount/date normalization,
//! field transforms, projection, row filters, empty-row dropping, chunking,
//! evidence canonicalization, deduplication and conflict marking. Passes can
//! be chained into a staged pipeline (see [`stages`]).

pub mod chunking;
pub mod conflict;
pub mod evidence;
pub mod io;
pub mod report;
pub mod spec;
pub mod stages;
pub mod transforms;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use tracing::{info, instrument};

use crate::coerce::value_text;
use crate::error::Result;
use crate::observability::metrics;
use crate::pipeline::ingestion::files::{FailedFile, SkippedFile};
use crate::pipeline::processing::cleaning::{dedup_key, deduplicate};
use crate::pipeline::processing::cleaning::generic::{backfill_defaults, project};
use crate::rules::filter::all_match;
use crate::types::Row;

use chunking::{chunk_text, ChunkMode};
use conflict::detect_conflicts;
use evidence::canonical_evidence_row;
use transforms::{normalize_amount, normalize_date, normalize_header};

pub use spec::{validate_preprocess_spec, DataFormat, PreprocessSpec};
pub use stages::{run_preprocess_pipeline, validate_preprocess_pipeline, PipelineResult};

/// Counters for one preprocessing pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PreprocessSummary {
    pub input_rows: u64,
    pub output_rows: u64,
    pub dropped_empty_rows: u64,
    pub dropped_by_filters: u64,
    pub duplicate_rows_removed: u64,
    pub normalized_amount_cells: u64,
    pub normalized_date_cells: u64,
    pub transformed_cells: u64,
    pub standardized_rows: u64,
    pub chunked_rows_created: u64,
    pub conflict_rows_marked: u64,
}

fn is_empty_row(row: &Row) -> bool {
    row.values().all(|v| match v {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    })
}

fn normalize_cells(raw: &Row, spec: &PreprocessSpec) -> Row {
    raw.iter()
        .map(|(k, v)| {
            let key = spec
                .header_map
                .get(k)
                .cloned()
                .unwrap_or_else(|| normalize_header(k));
            let value = match v {
                Value::String(s) => {
                    let s = if spec.trim_strings { s.trim() } else { s.as_str() };
                    let token = s.trim().to_lowercase();
                    if spec.null_values.contains(&token) {
                        Value::Null
                    } else {
                        Value::String(s.to_string())
                    }
                }
                other => other.clone(),
            };
            (key, value)
        })
        .collect()
}

/// Applies one preprocessing pass to `rows`.
pub fn preprocess_rows(rows: &[Row], spec: &PreprocessSpec) -> (Vec<Row>, PreprocessSummary) {
    let mut summary = PreprocessSummary {
        input_rows: rows.len() as u64,
        ..Default::default()
    };
    let mut out: Vec<Row> = Vec::with_capacity(rows.len());

    for raw in rows {
        let mut row = normalize_cells(raw, spec);
        backfill_defaults(&mut row, &spec.default_values);

        for field in &spec.amount_fields {
            if let Some(v) = row.get_mut(field).filter(|v| !v.is_null()) {
                let nv = normalize_amount(v, spec.amount_round_digits);
                if nv != *v {
                    summary.normalized_amount_cells += 1;
                    *v = nv;
                }
            }
        }
        for field in &spec.date_fields {
            if let Some(v) = row.get_mut(field).filter(|v| !v.is_null()) {
                let nv = normalize_date(v, &spec.date_output_format, &spec.date_input_formats);
                if nv != *v {
                    summary.normalized_date_cells += 1;
                    *v = nv;
                }
            }
        }
        for t in &spec.field_transforms {
            let current = row.get(&t.field).cloned().unwrap_or(Value::Null);
            let (nv, changed) = t.apply(&current, &spec.date_input_formats);
            if changed {
                summary.transformed_cells += 1;
            }
            row.insert(t.field.clone(), nv);
        }

        row = project(row, &spec.include_fields, &spec.exclude_fields);

        if !all_match(&spec.row_filters, &row) {
            summary.dropped_by_filters += 1;
            continue;
        }
        if spec.drop_empty_rows && is_empty_row(&row) {
            summary.dropped_empty_rows += 1;
            continue;
        }

        let chunks = if spec.chunk_mode == ChunkMode::None {
            Vec::new()
        } else {
            let text = row.get(&spec.chunk_field).map(value_text).unwrap_or_default();
            chunk_text(&text, spec.chunk_mode, spec.chunk_max_chars)
        };
        summary.chunked_rows_created += chunks.len().saturating_sub(1) as u64;

        let pieces: Vec<Row> = if chunks.is_empty() {
            vec![row]
        } else {
            chunks
                .into_iter()
                .enumerate()
                .map(|(seq, chunk)| {
                    let mut piece = row.clone();
                    piece.insert(spec.chunk_field.clone(), Value::String(chunk));
                    piece.insert("chunk_seq".to_string(), Value::from(seq));
                    piece
                })
                .collect()
        };

        for piece in pieces {
            if spec.standardize_evidence {
                out.push(canonical_evidence_row(&piece, &spec.evidence_schema));
                summary.standardized_rows += 1;
            } else {
                out.push(piece);
            }
        }
    }

    if !spec.deduplicate_by.is_empty() {
        let (deduped, removed) =
            deduplicate(out, spec.deduplicate_keep, |r| dedup_key(r, &spec.deduplicate_by));
        out = deduped;
        summary.duplicate_rows_removed = removed;
    }

    if spec.conflict.enabled {
        summary.conflict_rows_marked = detect_conflicts(&mut out, &spec.conflict);
    }

    summary.output_rows = out.len() as u64;
    (out, summary)
}

/// Outcome of preprocessing one file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PreprocessResult {
    pub input_path: String,
    pub output_path: String,
    pub input_format: String,
    pub output_format: DataFormat,
    pub delimiter: Option<String>,
    pub skipped_files: Option<Vec<SkippedFile>>,
    pub failed_files: Option<Vec<FailedFile>>,
    pub quality_report_path: Option<String>,
    pub summary: PreprocessSummary,
}

/// Reads `input`, preprocesses it, and writes the result to `output`.
#[instrument(skip_all, fields(input = %input.display(), output = %output.display()))]
pub fn preprocess_file(input: &Path, output: &Path, spec: &PreprocessSpec) -> Result<PreprocessResult> {
    let (rows, meta) = io::read_rows(input, spec)?;
    let (out_rows, summary) = preprocess_rows(&rows, spec);
    let output_format = io::write_rows(output, &out_rows, spec)?;

    let quality_report_path = if spec.generate_quality_report {
        let path = spec
            .quality_report_path
            .clone()
            .unwrap_or_else(|| format!("{}.quality.json", output.display()));
        let report = report::build_quality_report(&out_rows, &summary, spec);
        io::write_json_value(Path::new(&path), &report)?;
        Some(path)
    } else {
        None
    };

    metrics::preprocess::rows_in(summary.input_rows);
    metrics::preprocess::rows_out(summary.output_rows);
    info!(
        input_rows = summary.input_rows,
        output_rows = summary.output_rows,
        dropped_by_filters = summary.dropped_by_filters,
        duplicate_rows_removed = summary.duplicate_rows_removed,
        "preprocess pass complete"
    );

    Ok(PreprocessResult {
        input_path: input.display().to_string(),
        output_path: output.display().to_string(),
        input_format: meta.input_format,
        output_format,
        delimiter: meta.delimiter,
        skipped_files: meta.skipped_files,
        failed_files: meta.failed_files,
        quality_report_path,
        summary,
    })
}
