use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::Path;

use crate::coerce::{to_bool, to_int, value_text};
use crate::constants::{
    DEFAULT_AMOUNT_ROUND_DIGITS, DEFAULT_CHUNK_MAX_CHARS, DEFAULT_DATE_INPUT_FORMATS,
    DEFAULT_DATE_OUTPUT_FORMAT, DEFAULT_NEGATIVE_WORDS, DEFAULT_POSITIVE_WORDS,
    MAX_AMOUNT_ROUND_DIGITS,
};
use crate::rules::filter::FilterRule;
use crate::rules::validator::{unknown_keys_warning, ValidationReport};
use crate::rules::{null_tokens, object_pairs, string_list, KeepPolicy};

use super::chunking::ChunkMode;
use super::transforms::FieldTransform;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataFormat {
    Csv,
    Json,
    Jsonl,
}

impl DataFormat {
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "csv" => Some(DataFormat::Csv),
            "json" => Some(DataFormat::Json),
            "jsonl" => Some(DataFormat::Jsonl),
            _ => None,
        }
    }

    /// Explicit format wins; otherwise the extension decides, defaulting to CSV.
    pub fn resolve(explicit: Option<DataFormat>, path: &Path) -> Self {
        if let Some(fmt) = explicit {
            return fmt;
        }
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default();
        match ext.as_str() {
            "json" => DataFormat::Json,
            "jsonl" | "ndjson" => DataFormat::Jsonl,
            _ => DataFormat::Csv,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            DataFormat::Csv => ".csv",
            DataFormat::Json => ".json",
            DataFormat::Jsonl => ".jsonl",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DataFormat::Csv => "csv",
            DataFormat::Json => "json",
            DataFormat::Jsonl => "jsonl",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileErrorPolicy {
    Skip,
    Raise,
}

/// Positive/negative keyword configuration for conflict marking.
#[derive(Debug, Clone, PartialEq)]
pub struct ConflictConfig {
    pub enabled: bool,
    pub topic_field: String,
    pub stance_field: String,
    pub text_field: String,
    pub positive_words: Vec<String>,
    pub negative_words: Vec<String>,
}

impl Default for ConflictConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            topic_field: "topic".to_string(),
            stance_field: "stance".to_string(),
            text_field: "claim_text".to_string(),
            positive_words: DEFAULT_POSITIVE_WORDS.iter().map(|s| s.to_string()).collect(),
            negative_words: DEFAULT_NEGATIVE_WORDS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Source field aliases for each canonical evidence field.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvidenceSchema {
    pub aliases: HashMap<String, Vec<String>>,
}

impl EvidenceSchema {
    pub fn from_value(v: Option<&Value>) -> Self {
        let aliases = object_pairs(v)
            .into_iter()
            .filter_map(|(k, v)| match v {
                Value::String(s) => Some((k, vec![s])),
                Value::Array(items) => Some((k, items.iter().map(value_text).collect())),
                _ => None,
            })
            .collect();
        Self { aliases }
    }

    pub fn aliases_for<'a>(&'a self, field: &str, defaults: &'a [&'a str]) -> Vec<&'a str> {
        match self.aliases.get(field) {
            Some(list) => list.iter().map(String::as_str).collect(),
            None => defaults.to_vec(),
        }
    }
}

/// Parsed preprocessing configuration for one stage.
#[derive(Debug, Clone)]
pub struct PreprocessSpec {
    pub input_format: Option<DataFormat>,
    pub output_format: Option<DataFormat>,
    pub input_files: Vec<String>,
    pub text_split_by_line: bool,
    pub max_retries: u32,
    pub on_file_error: FileErrorPolicy,
    pub delimiter: Option<u8>,
    pub header_map: HashMap<String, String>,
    pub null_values: Vec<String>,
    pub trim_strings: bool,
    pub drop_empty_rows: bool,
    pub amount_fields: Vec<String>,
    pub amount_round_digits: u32,
    pub date_fields: Vec<String>,
    pub date_input_formats: Vec<String>,
    pub date_output_format: String,
    pub default_values: Vec<(String, Value)>,
    pub include_fields: Vec<String>,
    pub exclude_fields: Vec<String>,
    pub field_transforms: Vec<FieldTransform>,
    pub row_filters: Vec<FilterRule>,
    pub deduplicate_by: Vec<String>,
    pub deduplicate_keep: KeepPolicy,
    pub standardize_evidence: bool,
    pub evidence_schema: EvidenceSchema,
    pub chunk_mode: ChunkMode,
    pub chunk_field: String,
    pub chunk_max_chars: usize,
    pub conflict: ConflictConfig,
    pub generate_quality_report: bool,
    pub quality_report_path: Option<String>,
    pub quality_required_fields: Vec<String>,
}

impl Default for PreprocessSpec {
    fn default() -> Self {
        Self::from_map(&Map::new())
    }
}

impl PreprocessSpec {
    pub fn from_value(v: &Value) -> Self {
        v.as_object().map(Self::from_map).unwrap_or_default()
    }

    pub fn from_map(spec: &Map<String, Value>) -> Self {
        let flag = |key: &str, default: bool| spec.get(key).map_or(default, |v| to_bool(v, default));
        let text = |key: &str| {
            spec.get(key)
                .map(|v| value_text(v).trim().to_string())
                .filter(|s| !s.is_empty())
        };
        let standardize_evidence = flag("standardize_evidence", false);

        let date_input_formats = {
            let configured = string_list(spec.get("date_input_formats"));
            if configured.is_empty() {
                DEFAULT_DATE_INPUT_FORMATS.iter().map(|s| s.to_string()).collect()
            } else {
                configured
            }
        };
        let defaults = ConflictConfig::default();
        let word_list = |key: &str, fallback: Vec<String>| {
            let words: Vec<String> = string_list(spec.get(key))
                .into_iter()
                .map(|w| w.to_lowercase())
                .collect();
            if words.is_empty() {
                fallback
            } else {
                words
            }
        };

        Self {
            input_format: text("input_format").and_then(|s| DataFormat::parse(&s)),
            output_format: text("output_format").and_then(|s| DataFormat::parse(&s)),
            input_files: string_list(spec.get("input_files")),
            text_split_by_line: flag("text_split_by_line", false),
            max_retries: spec
                .get("max_retries")
                .and_then(to_int)
                .unwrap_or(0)
                .max(0) as u32,
            on_file_error: match text("on_file_error").map(|s| s.to_lowercase()).as_deref() {
                Some("raise") => FileErrorPolicy::Raise,
                _ => FileErrorPolicy::Skip,
            },
            delimiter: spec
                .get("delimiter")
                .map(value_text)
                .and_then(|s| s.bytes().next()),
            header_map: object_pairs(spec.get("header_map"))
                .into_iter()
                .map(|(k, v)| (k, value_text(&v)))
                .collect(),
            null_values: null_tokens(spec.get("null_values")),
            trim_strings: flag("trim_strings", true),
            drop_empty_rows: flag("drop_empty_rows", true),
            amount_fields: string_list(spec.get("amount_fields")),
            amount_round_digits: spec
                .get("amount_round_digits")
                .and_then(to_int)
                .unwrap_or(DEFAULT_AMOUNT_ROUND_DIGITS as i64)
                .clamp(0, MAX_AMOUNT_ROUND_DIGITS) as u32,
            date_fields: string_list(spec.get("date_fields")),
            date_input_formats,
            date_output_format: text("date_output_format")
                .unwrap_or_else(|| DEFAULT_DATE_OUTPUT_FORMAT.to_string()),
            default_values: object_pairs(spec.get("default_values")),
            include_fields: string_list(spec.get("include_fields")),
            exclude_fields: string_list(spec.get("exclude_fields")),
            field_transforms: spec
                .get("field_transforms")
                .and_then(Value::as_array)
                .map(|items| items.iter().filter_map(FieldTransform::from_value).collect())
                .unwrap_or_default(),
            row_filters: spec
                .get("row_filters")
                .and_then(Value::as_array)
                .map(|items| items.iter().map(FilterRule::from_value).collect())
                .unwrap_or_default(),
            deduplicate_by: string_list(spec.get("deduplicate_by")),
            deduplicate_keep: KeepPolicy::parse(spec.get("deduplicate_keep"), KeepPolicy::First),
            standardize_evidence,
            evidence_schema: EvidenceSchema::from_value(spec.get("evidence_schema")),
            chunk_mode: text("chunk_mode")
                .and_then(|s| ChunkMode::parse(&s))
                .unwrap_or(ChunkMode::None),
            chunk_field: text("chunk_field").unwrap_or_else(|| {
                if standardize_evidence { "claim_text" } else { "text" }.to_string()
            }),
            chunk_max_chars: spec
                .get("chunk_max_chars")
                .and_then(to_int)
                .filter(|n| *n > 0)
                .map(|n| n as usize)
                .unwrap_or(DEFAULT_CHUNK_MAX_CHARS),
            conflict: ConflictConfig {
                enabled: flag("detect_conflicts", false),
                topic_field: text("conflict_topic_field").unwrap_or(defaults.topic_field),
                stance_field: text("conflict_stance_field").unwrap_or(defaults.stance_field),
                text_field: text("conflict_text_field").unwrap_or(defaults.text_field),
                positive_words: word_list("conflict_positive_words", defaults.positive_words),
                negative_words: word_list("conflict_negative_words", defaults.negative_words),
            },
            generate_quality_report: flag("generate_quality_report", false),
            quality_report_path: text("quality_report_path"),
            quality_required_fields: string_list(spec.get("quality_required_fields")),
        }
    }
}

const KNOWN_PREPROCESS_KEYS: [&str; 38] = [
    "pipeline",
    "input_format",
    "output_format",
    "input_files",
    "text_split_by_line",
    "max_retries",
    "on_file_error",
    "standardize_evidence",
    "evidence_schema",
    "generate_quality_report",
    "quality_report_path",
    "quality_required_fields",
    "chunk_mode",
    "chunk_field",
    "chunk_max_chars",
    "detect_conflicts",
    "conflict_topic_field",
    "conflict_stance_field",
    "conflict_text_field",
    "conflict_positive_words",
    "conflict_negative_words",
    "delimiter",
    "header_map",
    "null_values",
    "amount_fields",
    "date_fields",
    "amount_round_digits",
    "trim_strings",
    "drop_empty_rows",
    "date_output_format",
    "date_input_formats",
    "default_values",
    "include_fields",
    "exclude_fields",
    "field_transforms",
    "row_filters",
    "deduplicate_by",
    "deduplicate_keep",
];

fn is_int_like(v: &Value) -> bool {
    match v {
        Value::Number(n) => n.is_i64() || n.is_u64(),
        Value::String(s) => s.trim().parse::<i64>().is_ok(),
        _ => false,
    }
}

/// Static checks for a single preprocessing spec. Never raises.
pub fn validate_preprocess_spec(spec: &Value) -> ValidationReport {
    let Some(spec) = spec.as_object() else {
        return ValidationReport::failed("preprocess spec must be object");
    };
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    for key in ["header_map", "default_values", "evidence_schema"] {
        if spec.get(key).is_some_and(|v| !v.is_object()) {
            errors.push(format!("{} must be an object", key));
        }
    }
    for key in [
        "amount_fields",
        "date_fields",
        "date_input_formats",
        "null_values",
        "include_fields",
        "exclude_fields",
        "field_transforms",
        "row_filters",
        "input_files",
        "quality_required_fields",
        "conflict_positive_words",
        "conflict_negative_words",
        "deduplicate_by",
    ] {
        if spec.get(key).is_some_and(|v| !v.is_array()) {
            errors.push(format!("{} must be an array", key));
        }
    }
    for key in [
        "standardize_evidence",
        "generate_quality_report",
        "detect_conflicts",
        "text_split_by_line",
    ] {
        if spec.get(key).is_some_and(|v| !v.is_boolean()) {
            errors.push(format!("{} must be boolean", key));
        }
    }
    if spec.get("quality_report_path").is_some_and(|v| !v.is_string()) {
        errors.push("quality_report_path must be string".to_string());
    }

    if let Some(mode) = spec.get("chunk_mode") {
        if ChunkMode::parse(&value_text(mode)).is_none() {
            errors.push("chunk_mode must be one of none/off/paragraph/sentence/fixed".to_string());
        }
    }
    if let Some(v) = spec.get("chunk_max_chars") {
        if !is_int_like(v) {
            errors.push("chunk_max_chars must be integer".to_string());
        } else if to_int(v).unwrap_or(0) <= 0 {
            errors.push("chunk_max_chars must be > 0".to_string());
        }
    }
    if let Some(v) = spec.get("max_retries") {
        if !is_int_like(v) {
            errors.push("max_retries must be integer".to_string());
        } else if to_int(v).unwrap_or(-1) < 0 {
            errors.push("max_retries must be >= 0".to_string());
        }
    }
    if let Some(v) = spec.get("on_file_error") {
        let policy = value_text(v).trim().to_lowercase();
        if policy != "skip" && policy != "raise" {
            errors.push("on_file_error must be 'skip' or 'raise'".to_string());
        }
    }
    if let Some(v) = spec.get("amount_round_digits") {
        if !is_int_like(v) {
            errors.push("amount_round_digits must be integer".to_string());
        } else if !to_int(v).is_some_and(|d| (0..=MAX_AMOUNT_ROUND_DIGITS).contains(&d)) {
            errors.push("amount_round_digits must be [0..6]".to_string());
        }
    }
    if let Some(v) = spec.get("deduplicate_keep") {
        let keep = value_text(v).trim().to_lowercase();
        if keep != "first" && keep != "last" {
            errors.push("deduplicate_keep must be 'first' or 'last'".to_string());
        }
    }
    for key in ["input_format", "output_format"] {
        if let Some(v) = spec.get(key) {
            let fmt = value_text(v);
            if !fmt.trim().is_empty() && DataFormat::parse(&fmt).is_none() {
                errors.push(format!("{} must be one of csv/json/jsonl", key));
            }
        }
    }

    if let Some(items) = spec.get("field_transforms").and_then(Value::as_array) {
        for (i, t) in items.iter().enumerate() {
            match t.as_object() {
                None => errors.push(format!("field_transforms[{}] must be an object", i)),
                Some(t) if !t.contains_key("field") || !t.contains_key("op") => {
                    errors.push(format!("field_transforms[{}] requires field and op", i))
                }
                Some(_) => {}
            }
        }
    }
    if let Some(items) = spec.get("row_filters").and_then(Value::as_array) {
        for (i, f) in items.iter().enumerate() {
            let Some(f) = f.as_object() else {
                errors.push(format!("row_filters[{}] must be an object", i));
                continue;
            };
            let op = f.get("op").map(value_text);
            if op.is_none() {
                errors.push(format!("row_filters[{}] requires op", i));
            }
            let existence = matches!(op.as_deref(), Some("exists") | Some("not_exists"));
            if !existence && !f.contains_key("field") {
                errors.push(format!("row_filters[{}] requires field", i));
            }
        }
    }

    if let Some(w) = unknown_keys_warning(spec, &KNOWN_PREPROCESS_KEYS, "preprocess") {
        warnings.push(w);
    }

    if let Some(pipeline) = spec.get("pipeline") {
        match pipeline.as_object() {
            None => errors.push("pipeline must be object".to_string()),
            Some(p) => {
                if !p.get("stages").and_then(Value::as_array).is_some_and(|s| !s.is_empty()) {
                    errors.push("pipeline.stages must be a non-empty array".to_string());
                }
            }
        }
    }

    ValidationReport::from_parts(errors, warnings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn defaults_leave_rows_alone() {
        let spec = PreprocessSpec::default();
        assert!(spec.amount_fields.is_empty());
        assert!(spec.date_fields.is_empty());
        assert_eq!(spec.chunk_mode, ChunkMode::None);
        assert_eq!(spec.chunk_field, "text");
        assert_eq!(spec.deduplicate_keep, KeepPolicy::First);
        assert_eq!(spec.date_output_format, "%Y-%m-%d");
        assert!(spec.trim_strings && spec.drop_empty_rows);
    }

    #[test]
    fn evidence_mode_moves_chunk_field() {
        let spec = PreprocessSpec::from_value(&json!({"standardize_evidence": true}));
        assert_eq!(spec.chunk_field, "claim_text");
    }

    #[test]
    fn format_resolution() {
        assert_eq!(DataFormat::resolve(None, Path::new("a/b.NDJSON")), DataFormat::Jsonl);
        assert_eq!(DataFormat::resolve(None, Path::new("a/b.txt")), DataFormat::Csv);
        assert_eq!(
            DataFormat::resolve(Some(DataFormat::Json), Path::new("x.csv")),
            DataFormat::Json
        );
    }

    #[test]
    fn validator_collects_errors() {
        let report = validate_preprocess_spec(&json!({
            "header_map": [],
            "amount_fields": "amount",
            "chunk_mode": "words",
            "chunk_max_chars": 0,
            "on_file_error": "ignore",
            "amount_round_digits": "x",
            "output_format": "xml",
            "field_transforms": [{"field": "a"}],
            "row_filters": [{"field": "a"}, {"op": "eq"}],
            "pipeline": {"stages": []},
            "mystery": 1
        }));
        assert!(!report.ok);
        let joined = report.errors.join("\n");
        for expected in [
            "header_map must be an object",
            "amount_fields must be an array",
            "chunk_mode",
            "chunk_max_chars must be > 0",
            "on_file_error",
            "amount_round_digits must be integer",
            "output_format",
            "field_transforms[0] requires field and op",
            "row_filters[0] requires op",
            "row_filters[1] requires field",
            "pipeline.stages must be a non-empty array",
        ] {
            assert!(joined.contains(expected), "missing {}: {}", expected, joined);
        }
        assert_eq!(report.warnings, vec!["unknown preprocess keys: mystery".to_string()]);
    }

    #[test]
    fn validator_accepts_complete_spec() {
        let report = validate_preprocess_spec(&json!({
            "amount_fields": ["amount"],
            "date_fields": ["date"],
            "chunk_mode": "sentence",
            "chunk_max_chars": 200,
            "row_filters": [{"field": "claim_text", "op": "not_regex", "value": "^spam"}],
            "deduplicate_keep": "last",
            "detect_conflicts": true
        }));
        assert!(report.ok, "{:?}", report.errors);
    }
}
