//! Multi-stage preprocessing: `extract -> clean -> structure -> audit`, each
//! stage writing an intermediate file that feeds the next.

use serde::Serialize;
use serde_json::{json, Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, instrument};

use super::spec::{validate_preprocess_spec, DataFormat, PreprocessSpec};
use super::{preprocess_file, PreprocessResult};
use crate::coerce::value_text;
use crate::error::{CleanflowError, Result};
use crate::observability::metrics;
use crate::rules::validator::ValidationReport;

pub const FINAL_OUTPUT_NAME: &str = "preprocessed_input.csv";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StageKind {
    Extract,
    Clean,
    Structure,
    Audit,
}

impl StageKind {
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "extract" => Some(StageKind::Extract),
            "clean" => Some(StageKind::Clean),
            "structure" => Some(StageKind::Structure),
            "audit" => Some(StageKind::Audit),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::Extract => "extract",
            StageKind::Clean => "clean",
            StageKind::Structure => "structure",
            StageKind::Audit => "audit",
        }
    }

    /// Fills stage-specific defaults into `cfg` without overriding
    /// explicit settings, except that audit always reports.
    fn apply_defaults(&self, cfg: &mut Map<String, Value>, stage_dir: &Path, position: usize) {
        let mut set_default = |key: &str, value: Value| {
            cfg.entry(key).or_insert(value);
        };
        match self {
            StageKind::Extract => set_default("output_format", json!("jsonl")),
            StageKind::Clean => set_default("trim_strings", json!(true)),
            StageKind::Structure => {
                set_default("standardize_evidence", json!(true));
                set_default("output_format", json!("jsonl"));
            }
            StageKind::Audit => {
                set_default("output_format", json!("jsonl"));
                let report = stage_dir.join(format!("pre_stage_{}_audit_quality.json", position));
                set_default("quality_report_path", json!(report.to_string_lossy()));
                cfg.insert("generate_quality_report".to_string(), json!(true));
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageResult {
    pub stage: StageKind,
    pub output_path: String,
    pub result: PreprocessResult,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineResult {
    pub mode: String,
    pub input_path: String,
    pub output_path: String,
    pub stages: Vec<StageResult>,
    #[serde(rename = "final")]
    pub final_result: PreprocessResult,
    pub warnings: Vec<String>,
}

fn stages_of(pipeline: &Value) -> Option<&Vec<Value>> {
    pipeline
        .get("stages")
        .and_then(Value::as_array)
        .filter(|s| !s.is_empty())
}

fn stage_config(stage: &Value) -> Map<String, Value> {
    stage
        .get("config")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default()
}

/// Checks stage names and each stage's config. Never raises.
pub fn validate_preprocess_pipeline(pipeline: &Value) -> ValidationReport {
    if !pipeline.is_object() {
        return ValidationReport::failed("pipeline must be object");
    }
    let Some(stages) = stages_of(pipeline) else {
        return ValidationReport::failed("pipeline.stages must be a non-empty array");
    };

    let mut errors = Vec::new();
    let mut warnings = Vec::new();
    for (i, stage) in stages.iter().enumerate() {
        if !stage.is_object() {
            errors.push(format!("pipeline.stages[{}] must be object", i));
            continue;
        }
        let name = stage.get("name").map(value_text).unwrap_or_default();
        if StageKind::parse(&name).is_none() {
            errors.push(format!(
                "pipeline.stages[{}].name must be one of [audit, clean, extract, structure]",
                i
            ));
            continue;
        }
        let report = validate_preprocess_spec(&Value::Object(stage_config(stage)));
        errors.extend(report.errors.iter().map(|e| format!("pipeline.stages[{}]: {}", i, e)));
        warnings.extend(report.warnings.iter().map(|w| format!("pipeline.stages[{}]: {}", i, w)));
    }
    ValidationReport::from_parts(errors, warnings)
}

fn stage_extension(cfg: &Map<String, Value>) -> &'static str {
    cfg.get("output_format")
        .map(value_text)
        .and_then(|s| DataFormat::parse(&s))
        .unwrap_or(DataFormat::Csv)
        .extension()
}

/// Runs every stage in order, then re-emits the last stage's rows as CSV.
///
/// A relative `final_output` is resolved against `job_root`; when absent the
/// output lands at `<stage_dir>/preprocessed_input.csv`.
#[instrument(skip_all, fields(input = %input.display(), stage_dir = %stage_dir.display()))]
pub fn run_preprocess_pipeline(
    pipeline: &Value,
    job_root: &Path,
    stage_dir: &Path,
    input: &Path,
    final_output: Option<&Path>,
) -> Result<PipelineResult> {
    let validation = validate_preprocess_pipeline(pipeline);
    if !validation.ok {
        return Err(CleanflowError::InvalidSpec {
            context: "preprocess pipeline".to_string(),
            errors: validation.errors,
        });
    }
    fs::create_dir_all(stage_dir)?;

    let mut current: PathBuf = input.to_path_buf();
    let mut stage_results = Vec::new();
    for (i, stage) in stages_of(pipeline).into_iter().flatten().enumerate() {
        let name = stage.get("name").map(value_text).unwrap_or_default();
        let Some(kind) = StageKind::parse(&name) else {
            continue;
        };
        let mut cfg = stage_config(stage);
        kind.apply_defaults(&mut cfg, stage_dir, i + 1);

        let output = stage_dir.join(format!(
            "pre_stage_{}_{}{}",
            i + 1,
            kind.as_str(),
            stage_extension(&cfg)
        ));
        let spec = PreprocessSpec::from_map(&cfg);
        let result = preprocess_file(&current, &output, &spec)?;
        info!(
            stage = kind.as_str(),
            position = i + 1,
            output_rows = result.summary.output_rows,
            "preprocess stage complete"
        );
        metrics::preprocess::stage_completed(kind.as_str());

        stage_results.push(StageResult {
            stage: kind,
            output_path: output.display().to_string(),
            result,
        });
        current = output;
    }

    let final_path = match final_output {
        Some(p) if p.is_absolute() => p.to_path_buf(),
        Some(p) => job_root.join(p),
        None => stage_dir.join(FINAL_OUTPUT_NAME),
    };
    let final_spec = PreprocessSpec::from_value(&json!({"output_format": "csv"}));
    let final_result = preprocess_file(&current, &final_path, &final_spec)?;

    Ok(PipelineResult {
        mode: "pipeline".to_string(),
        input_path: input.display().to_string(),
        output_path: final_path.display().to_string(),
        stages: stage_results,
        final_result,
        warnings: validation.warnings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_validation_prefixes_stage_errors() {
        let report = validate_preprocess_pipeline(&json!({
            "stages": [
                {"name": "extract"},
                {"name": "polish"},
                {"name": "clean", "config": {"chunk_mode": "words", "extra": 1}},
                "audit"
            ]
        }));
        assert!(!report.ok);
        assert_eq!(
            report.errors,
            vec![
                "pipeline.stages[1].name must be one of [audit, clean, extract, structure]".to_string(),
                "pipeline.stages[2]: chunk_mode must be one of none/off/paragraph/sentence/fixed".to_string(),
                "pipeline.stages[3] must be object".to_string(),
            ]
        );
        assert_eq!(report.warnings, vec!["pipeline.stages[2]: unknown preprocess keys: extra".to_string()]);
    }

    #[test]
    fn empty_or_missing_stages_rejected() {
        assert!(!validate_preprocess_pipeline(&json!({"stages": []})).ok);
        assert!(!validate_preprocess_pipeline(&json!({})).ok);
        assert!(!validate_preprocess_pipeline(&json!([])).ok);
    }

    #[test]
    fn stage_defaults_do_not_override_explicit_config() {
        let dir = Path::new("/tmp/stages");
        let mut cfg = Map::new();
        cfg.insert("output_format".to_string(), json!("csv"));
        cfg.insert("generate_quality_report".to_string(), json!(false));
        StageKind::Audit.apply_defaults(&mut cfg, dir, 4);
        assert_eq!(cfg["output_format"], json!("csv"));
        assert_eq!(cfg["generate_quality_report"], json!(true));
        assert_eq!(cfg["quality_report_path"], json!("/tmp/stages/pre_stage_4_audit_quality.json"));

        let mut cfg = Map::new();
        StageKind::Structure.apply_defaults(&mut cfg, dir, 3);
        assert_eq!(cfg["standardize_evidence"], json!(true));
        assert_eq!(stage_extension(&cfg), ".jsonl");
    }
}
