use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use super::spec::{DataFormat, PreprocessSpec};
use crate::coerce::value_text;
use crate::error::Result;
use crate::pipeline::ingestion::files::{load_rows_from_files, FailedFile, FileLoadOptions, SkippedFile};
use crate::pipeline::ingestion::readers::{read_csv_rows, read_json_rows, read_jsonl_rows};
use crate::types::Row;

/// How the input rows were obtained.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReadMeta {
    pub input_format: String,
    pub delimiter: Option<String>,
    pub skipped_files: Option<Vec<SkippedFile>>,
    pub failed_files: Option<Vec<FailedFile>>,
}

/// Reads the stage input. A non-empty `input_files` list takes precedence
/// over `path`.
pub fn read_rows(path: &Path, spec: &PreprocessSpec) -> Result<(Vec<Row>, ReadMeta)> {
    if !spec.input_files.is_empty() {
        let opts = FileLoadOptions {
            text_by_line: spec.text_split_by_line,
            max_retries: spec.max_retries,
            on_file_error: spec.on_file_error,
            delimiter: spec.delimiter,
        };
        let (rows, report) = load_rows_from_files(&spec.input_files, &opts)?;
        return Ok((
            rows,
            ReadMeta {
                input_format: report.input_format,
                delimiter: None,
                skipped_files: Some(report.skipped_files),
                failed_files: Some(report.failed_files),
            },
        ));
    }

    let format = DataFormat::resolve(spec.input_format, path);
    let mut meta = ReadMeta {
        input_format: format.as_str().to_string(),
        ..Default::default()
    };
    let rows = match format {
        DataFormat::Csv => {
            let (rows, delimiter) = read_csv_rows(path, spec.delimiter)?;
            meta.delimiter = Some((delimiter as char).to_string());
            rows
        }
        DataFormat::Json => read_json_rows(path)?,
        DataFormat::Jsonl => read_jsonl_rows(path)?,
    };
    Ok((rows, meta))
}

/// Every key seen across `rows`, in first-seen order.
pub fn union_columns(rows: &[Row]) -> Vec<String> {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut columns = Vec::new();
    for row in rows {
        for k in row.keys() {
            if seen.insert(k.as_str()) {
                columns.push(k.clone());
            }
        }
    }
    columns
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

/// Writes rows as CSV over the union of their keys. Null cells are empty.
/// `empty_header` is written when there are no rows.
pub fn write_csv_rows(path: &Path, rows: &[Row], empty_header: &[&str]) -> Result<()> {
    ensure_parent(path)?;
    let mut columns = union_columns(rows);
    if columns.is_empty() {
        columns = empty_header.iter().map(|s| s.to_string()).collect();
    }
    let mut writer = csv::WriterBuilder::new()
        .terminator(csv::Terminator::Any(b'\n'))
        .from_path(path)?;
    if !columns.is_empty() {
        writer.write_record(&columns)?;
    }
    for row in rows {
        let record: Vec<String> = columns
            .iter()
            .map(|c| row.get(c).map(value_text).unwrap_or_default())
            .collect();
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_json_value<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    ensure_parent(path)?;
    let file = File::create(path)?;
    let mut out = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut out, value)?;
    out.flush()?;
    Ok(())
}

pub fn write_jsonl_rows(path: &Path, rows: &[Row]) -> Result<()> {
    ensure_parent(path)?;
    let file = File::create(path)?;
    let mut out = BufWriter::new(file);
    for row in rows {
        serde_json::to_writer(&mut out, row)?;
        out.write_all(b"\n")?;
    }
    out.flush()?;
    Ok(())
}

/// Writes rows in the spec's output format, or the one implied by the extension.
pub fn write_rows(path: &Path, rows: &[Row], spec: &PreprocessSpec) -> Result<DataFormat> {
    let format = DataFormat::resolve(spec.output_format, path);
    match format {
        DataFormat::Csv => write_csv_rows(path, rows, &[])?,
        DataFormat::Json => write_json_value(path, rows)?,
        DataFormat::Jsonl => write_jsonl_rows(path, rows)?,
    }
    Ok(format)
}

/// Reads back a JSON document written by this module.
pub fn read_json_value(path: &Path) -> Result<Value> {
    Ok(serde_json::from_slice(&fs::read(path)?)?)
}
