//! Multi-file ingestion with per-file retries and a skip/raise policy.

use serde::Serialize;
use serde_json::Value;
use std::path::Path;
use tracing::{info, warn};

use super::readers::{read_csv_rows, read_json_rows, read_jsonl_rows, read_text_file};
use crate::error::{CleanflowError, Result};
use crate::pipeline::processing::preprocess::spec::FileErrorPolicy;
use crate::types::Row;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedFile {
    pub path: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedFile {
    pub path: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FileLoadReport {
    /// Comma-joined formats of the files read, in input order.
    pub input_format: String,
    pub file_count: usize,
    pub skipped_files: Vec<SkippedFile>,
    pub failed_files: Vec<FailedFile>,
}

#[derive(Debug, Clone, Copy)]
pub struct FileLoadOptions {
    pub text_by_line: bool,
    pub max_retries: u32,
    pub on_file_error: FileErrorPolicy,
    pub delimiter: Option<u8>,
}

impl Default for FileLoadOptions {
    fn default() -> Self {
        Self {
            text_by_line: false,
            max_retries: 0,
            on_file_error: FileErrorPolicy::Skip,
            delimiter: None,
        }
    }
}

enum FileOutcome {
    Loaded { format: &'static str, rows: Vec<Row> },
    Skipped { format: &'static str, reason: String },
}

fn text_rows(text: &str, path: &Path, source_type: &str, by_line: bool) -> Vec<Row> {
    let pieces: Vec<&str> = if by_line {
        text.lines().map(str::trim).filter(|l| !l.is_empty()).collect()
    } else {
        text.split("\n\n").map(str::trim).filter(|p| !p.is_empty()).collect()
    };
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let source_path = path.to_string_lossy().into_owned();
    pieces
        .into_iter()
        .enumerate()
        .map(|(i, piece)| {
            let mut row = Row::new();
            row.insert("text".to_string(), Value::String(piece.to_string()));
            row.insert("source_file".to_string(), Value::String(file_name.clone()));
            row.insert("source_path".to_string(), Value::String(source_path.clone()));
            row.insert("source_type".to_string(), Value::String(source_type.to_string()));
            row.insert("chunk_index".to_string(), Value::from(i));
            row
        })
        .collect()
}

fn tag_source(rows: &mut [Row], path: &Path, source_type: &str) {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let source_path = path.to_string_lossy().into_owned();
    for row in rows {
        row.entry("source_file")
            .or_insert_with(|| Value::String(file_name.clone()));
        row.entry("source_path")
            .or_insert_with(|| Value::String(source_path.clone()));
        row.entry("source_type")
            .or_insert_with(|| Value::String(source_type.to_string()));
    }
}

fn load_file(path: &Path, opts: &FileLoadOptions) -> Result<FileOutcome> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default();
    let (format, rows) = match ext.as_str() {
        "txt" => ("txt", text_rows(&read_text_file(path)?, path, "txt", opts.text_by_line)),
        "md" => ("md", text_rows(&read_text_file(path)?, path, "md", opts.text_by_line)),
        "csv" => ("csv", read_csv_rows(path, opts.delimiter)?.0),
        "json" => ("json", read_json_rows(path)?),
        "jsonl" | "ndjson" => ("jsonl", read_jsonl_rows(path)?),
        _ => {
            return Ok(FileOutcome::Skipped {
                format: "unsupported",
                reason: format!("unsupported input file type: .{}", ext),
            })
        }
    };
    let mut rows = rows;
    if matches!(format, "csv" | "json" | "jsonl") {
        tag_source(&mut rows, path, format);
    }
    Ok(FileOutcome::Loaded { format, rows })
}

/// Loads and concatenates rows from `paths`. Each file is attempted
/// `max_retries + 1` times; a file that never loads is recorded as failed,
/// or aborts the whole load under [`FileErrorPolicy::Raise`].
pub fn load_rows_from_files(paths: &[String], opts: &FileLoadOptions) -> Result<(Vec<Row>, FileLoadReport)> {
    let mut all_rows = Vec::new();
    let mut formats: Vec<&str> = Vec::with_capacity(paths.len());
    let mut report = FileLoadReport {
        file_count: paths.len(),
        ..Default::default()
    };

    for p in paths {
        let path = Path::new(p);
        let mut last_err: Option<String> = None;
        let mut loaded = false;

        for attempt in 0..=opts.max_retries {
            match load_file(path, opts) {
                Ok(FileOutcome::Loaded { format, rows }) => {
                    formats.push(format);
                    all_rows.extend(rows);
                    loaded = true;
                    break;
                }
                Ok(FileOutcome::Skipped { format, reason }) => {
                    warn!(path = %p, reason = %reason, "input file skipped");
                    formats.push(format);
                    report.skipped_files.push(SkippedFile {
                        path: p.clone(),
                        reason,
                    });
                    loaded = true;
                    break;
                }
                Err(e) => {
                    warn!(path = %p, attempt, error = %e, "input file load failed");
                    last_err = Some(e.to_string());
                }
            }
        }

        if !loaded {
            let error = last_err.unwrap_or_else(|| "unknown error".to_string());
            if opts.on_file_error == FileErrorPolicy::Raise {
                return Err(CleanflowError::Ingest(format!(
                    "failed to load file {}: {}",
                    p, error
                )));
            }
            report.failed_files.push(FailedFile {
                path: p.clone(),
                error,
            });
        }
    }

    report.input_format = formats.join(",");
    info!(
        files = report.file_count,
        rows = all_rows.len(),
        skipped = report.skipped_files.len(),
        failed = report.failed_files.len(),
        "input files loaded"
    );
    Ok((all_rows, report))
}
