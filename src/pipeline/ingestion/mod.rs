// Pipeline ingestion: raw-row loading for a cleaning job and the optional preprocessing hook

pub mod files;
pub mod readers;

use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};
use tracing::{info, instrument};

use crate::coerce::{to_bool, value_text};
use crate::error::{CleanflowError, Result};
use crate::pipeline::processing::preprocess::stages::FINAL_OUTPUT_NAME;
use crate::pipeline::processing::preprocess::{
    preprocess_file, run_preprocess_pipeline, validate_preprocess_pipeline, validate_preprocess_spec,
    PreprocessSpec,
};
use crate::types::{rows_from_value, Row};
use readers::{parse_csv_text, read_csv_rows, sniff_delimiter};

/// Keys that may name the job's input CSV, in priority order.
pub const CSV_PATH_KEYS: [&str; 4] = ["input_csv_path", "source_csv_path", "csv_path", "input_uri"];
pub const DEFAULT_SAMPLE_SOURCE: &str = "default.sample";

/// Rows for a job and a label saying where they came from.
#[derive(Debug, Clone, PartialEq)]
pub struct RawInput {
    pub rows: Vec<Row>,
    pub source: String,
}

fn default_sample() -> Vec<Row> {
    rows_from_value(&json!([{"id": 1, "amount": 100.0}, {"id": 2, "amount": 200.0}]))
}

fn resolve_against(path: &str, job_root: Option<&Path>) -> PathBuf {
    let p = Path::new(path);
    match job_root {
        Some(root) if !p.is_absolute() => root.join(p),
        _ => p.to_path_buf(),
    }
}

/// First non-blank CSV path in `params`, with `file://` removed and relative
/// paths resolved against `job_root`.
pub fn resolve_csv_source_path(params: &Value, job_root: Option<&Path>) -> Option<PathBuf> {
    let raw = CSV_PATH_KEYS
        .iter()
        .filter_map(|k| params.get(*k))
        .map(value_text)
        .find(|s| !s.trim().is_empty())?;
    let raw = raw.trim();
    let raw = raw.strip_prefix("file://").unwrap_or(raw);
    Some(resolve_against(raw, job_root))
}

/// Loads the job's raw rows from `params.rows`, then `params.csv_text`, then
/// the CSV file named in `params`, and finally the built-in two-row sample.
/// CSV delimiters are detected from the header line.
pub fn load_raw_rows(params: &Value, job_root: Option<&Path>) -> Result<RawInput> {
    if let Some(items) = params.get("rows").and_then(Value::as_array).filter(|a| !a.is_empty()) {
        return Ok(RawInput {
            rows: rows_from_value(&Value::Array(items.clone())),
            source: "params.rows".to_string(),
        });
    }

    if let Some(text) = params.get("csv_text").and_then(Value::as_str) {
        if !text.trim().is_empty() {
            let text = text.trim();
            let rows = parse_csv_text(text, sniff_delimiter(text))?;
            if !rows.is_empty() {
                return Ok(RawInput {
                    rows,
                    source: "params.csv_text".to_string(),
                });
            }
        }
    }

    if let Some(path) = resolve_csv_source_path(params, job_root).filter(|p| p.is_file()) {
        let (rows, _) = read_csv_rows(&path, None)?;
        if !rows.is_empty() {
            return Ok(RawInput {
                rows,
                source: path.display().to_string(),
            });
        }
    }

    Ok(RawInput {
        rows: default_sample(),
        source: DEFAULT_SAMPLE_SOURCE.to_string(),
    })
}

/// Runs `params.preprocess` when it is enabled and names an input, then
/// points `input_csv_path` at the preprocessed file.
///
/// Returns the params the rest of the flow should use and, when
/// preprocessing ran, its serialized result.
#[instrument(skip_all, fields(job_root = %job_root.display()))]
pub fn maybe_preprocess_input(params: &Value, job_root: &Path, stage_dir: &Path) -> Result<(Value, Option<Value>)> {
    let cfg: Map<String, Value> = params
        .get("preprocess")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    let enabled = cfg.get("enabled").map(|v| to_bool(v, false)).unwrap_or(false);
    let input = cfg
        .get("input_path")
        .or_else(|| params.get("input_csv_path"))
        .map(value_text)
        .filter(|s| !s.trim().is_empty());
    let Some(input) = input.filter(|_| enabled) else {
        return Ok((params.clone(), None));
    };

    let input_path = resolve_against(input.trim(), Some(job_root));
    let output_path = cfg
        .get("output_path")
        .map(value_text)
        .filter(|s| !s.trim().is_empty())
        .map(|s| resolve_against(s.trim(), Some(job_root)))
        .unwrap_or_else(|| stage_dir.join(FINAL_OUTPUT_NAME));

    let pipeline = cfg
        .get("pipeline")
        .and_then(Value::as_object)
        .filter(|p| p.get("enabled").map(|v| to_bool(v, true)).unwrap_or(true))
        .map(|p| {
            let mut p = p.clone();
            p.remove("enabled");
            Value::Object(p)
        });

    let (final_output, result) = if let Some(pipeline) = pipeline {
        let report = validate_preprocess_pipeline(&pipeline);
        if !report.ok {
            return Err(CleanflowError::InvalidSpec {
                context: "preprocess pipeline".to_string(),
                errors: report.errors,
            });
        }
        let res = run_preprocess_pipeline(&pipeline, job_root, stage_dir, &input_path, Some(&output_path))?;
        (PathBuf::from(&res.output_path), serde_json::to_value(&res)?)
    } else {
        let mut spec = cfg.clone();
        for key in ["enabled", "input_path", "output_path", "pipeline"] {
            spec.remove(key);
        }
        let spec = Value::Object(spec);
        let report = validate_preprocess_spec(&spec);
        if !report.ok {
            return Err(CleanflowError::InvalidSpec {
                context: "preprocess config".to_string(),
                errors: report.errors,
            });
        }
        let res = preprocess_file(&input_path, &output_path, &PreprocessSpec::from_value(&spec))?;
        (output_path.clone(), serde_json::to_value(&res)?)
    };

    info!(input = %input_path.display(), output = %final_output.display(), "job input preprocessed");
    let mut next = params.as_object().cloned().unwrap_or_default();
    next.insert(
        "input_csv_path".to_string(),
        Value::String(final_output.display().to_string()),
    );
    Ok((Value::Object(next), Some(result)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn rows_win_over_csv_text() {
        let params = json!({"rows": [{"id": 5}], "csv_text": "id\n1\n"});
        let input = load_raw_rows(&params, None).unwrap();
        assert_eq!(input.source, "params.rows");
        assert_eq!(input.rows[0]["id"], json!(5));
    }

    #[test]
    fn csv_text_is_parsed() {
        let params = json!({"rows": [], "csv_text": "\n id,amount\n1,2.5\n"});
        let input = load_raw_rows(&params, None).unwrap();
        assert_eq!(input.source, "params.csv_text");
        assert_eq!(input.rows[0]["amount"], json!("2.5"));
    }

    #[test]
    fn csv_text_delimiter_is_detected() {
        let params = json!({"csv_text": "id;amount\n1;2\n"});
        let input = load_raw_rows(&params, None).unwrap();
        assert_eq!(input.rows[0]["id"], json!("1"));
        assert_eq!(input.rows[0]["amount"], json!("2"));
    }

    #[test]
    fn semicolon_csv_file_is_split_into_columns() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("eu.csv"), "id;amount;note\n4;1,5;ok\n").unwrap();
        let params = json!({"input_csv_path": "eu.csv"});
        let input = load_raw_rows(&params, Some(dir.path())).unwrap();
        assert_eq!(input.rows.len(), 1);
        assert_eq!(input.rows[0]["id"], json!("4"));
        assert_eq!(input.rows[0]["amount"], json!("1,5"));
        assert_eq!(input.rows[0]["note"], json!("ok"));
    }

    #[test]
    fn relative_file_uri_resolves_against_job_root() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("in.csv"), "\u{feff}id,amount\n7,1\n").unwrap();
        let params = json!({"input_uri": "file://in.csv"});
        let input = load_raw_rows(&params, Some(dir.path())).unwrap();
        assert_eq!(input.rows[0]["id"], json!("7"));
        assert!(input.source.ends_with("in.csv"));
    }

    #[test]
    fn missing_file_falls_back_to_sample() {
        let params = json!({"csv_path": "/definitely/not/here.csv"});
        let input = load_raw_rows(&params, None).unwrap();
        assert_eq!(input.source, DEFAULT_SAMPLE_SOURCE);
        assert_eq!(input.rows.len(), 2);
        assert_eq!(input.rows[1]["amount"], json!(200.0));
    }

    #[test]
    fn disabled_preprocess_is_passthrough() {
        let dir = TempDir::new().unwrap();
        let params = json!({"preprocess": {"enabled": false, "input_path": "x.csv"}});
        let (next, res) = maybe_preprocess_input(&params, dir.path(), dir.path()).unwrap();
        assert_eq!(next, params);
        assert!(res.is_none());
    }

    #[test]
    fn preprocess_redirects_input_csv_path() {
        let dir = TempDir::new().unwrap();
        let stage = dir.path().join("stage");
        fs::create_dir_all(&stage).unwrap();
        fs::write(dir.path().join("raw.csv"), "ID , Amount\n1, 2 \n").unwrap();
        let params = json!({"preprocess": {"enabled": true, "input_path": "raw.csv"}});
        let (next, res) = maybe_preprocess_input(&params, dir.path(), &stage).unwrap();
        let out = stage.join(FINAL_OUTPUT_NAME);
        assert_eq!(next["input_csv_path"], json!(out.display().to_string()));
        assert_eq!(fs::read_to_string(&out).unwrap(), "id,amount\n1,2\n");
        assert_eq!(res.unwrap()["summary"]["output_rows"], json!(1));
    }

    #[test]
    fn invalid_preprocess_config_is_rejected() {
        let dir = TempDir::new().unwrap();
        let params = json!({"preprocess": {"enabled": true, "input_path": "raw.csv", "chunk_mode": "words"}});
        let err = maybe_preprocess_input(&params, dir.path(), dir.path()).unwrap_err();
        assert!(matches!(err, CleanflowError::InvalidSpec { .. }));
    }
}
