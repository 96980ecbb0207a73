//! Files produced by a cleaning step and the checks run against them.

use parquet::basic::Compression;
use parquet::data_type::{ByteArray, ByteArrayType, DoubleType, Int64Type};
use parquet::file::properties::WriterProperties;
use parquet::file::writer::SerializedFileWriter;
use parquet::schema::parser::parse_message_type;
use serde::Serialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;
use tracing::warn;

use crate::app::ports::ArtifactSink;
use crate::coerce::{to_float, to_int};
use crate::constants::{PARQUET_MAGIC, PARQUET_PLACEHOLDER};
use crate::error::Result;
use crate::pipeline::processing::cleaning::LocalEngine;
use crate::pipeline::processing::preprocess::io::{write_csv_rows, write_json_value};
use crate::types::Row;

const SIMPLE_SCHEMA: &str = "message cleaned_rows { OPTIONAL INT64 id; OPTIONAL DOUBLE amount; }";
const PAYLOAD_SCHEMA: &str = "message cleaned_rows { REQUIRED BYTE_ARRAY payload (UTF8); }";

/// One registered output of a cleaning step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArtifactRecord {
    pub artifact_id: String,
    pub kind: String,
    pub path: String,
    pub sha256: String,
}

impl ArtifactRecord {
    pub fn new(artifact_id: &str, kind: &str, path: &Path, sha256: String) -> Self {
        Self {
            artifact_id: artifact_id.to_string(),
            kind: kind.to_string(),
            path: path.display().to_string(),
            sha256,
        }
    }
}

pub fn sha256_file(path: &Path) -> Result<String> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 1024 * 1024];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// True only for a regular file of at least 8 bytes that starts and ends
/// with the parquet magic marker. Never errors.
pub fn is_valid_parquet_file(path: &Path) -> bool {
    fn check(path: &Path) -> std::io::Result<bool> {
        let mut file = File::open(path)?;
        if file.metadata()?.len() < 8 {
            return Ok(false);
        }
        let mut head = [0u8; 4];
        let mut tail = [0u8; 4];
        file.read_exact(&mut head)?;
        file.seek(SeekFrom::End(-4))?;
        file.read_exact(&mut tail)?;
        Ok(&head == PARQUET_MAGIC && &tail == PARQUET_MAGIC)
    }
    path.is_file() && check(path).unwrap_or(false)
}

/// Cleaned rows as CSV; an empty result still gets an `id,amount` header.
pub fn write_cleaned_csv(path: &Path, rows: &[Row]) -> Result<()> {
    write_csv_rows(path, rows, &["id", "amount"])
}

/// Writes `rows` as parquet. Simple-engine rows get typed `id`/`amount`
/// columns; generic rows are stored as one JSON `payload` column.
pub fn write_cleaned_parquet(path: &Path, rows: &[Row], engine: LocalEngine) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let schema_text = match engine {
        LocalEngine::Simple => SIMPLE_SCHEMA,
        LocalEngine::Generic => PAYLOAD_SCHEMA,
    };
    let schema = Arc::new(parse_message_type(schema_text)?);
    let props = Arc::new(
        WriterProperties::builder()
            .set_compression(Compression::SNAPPY)
            .build(),
    );
    let mut writer = SerializedFileWriter::new(File::create(path)?, schema, props)?;
    let mut row_group = writer.next_row_group()?;

    match engine {
        LocalEngine::Simple => {
            let (ids, id_levels) = optional_column(rows, |r| r.get("id").and_then(to_int));
            let (amounts, amount_levels) = optional_column(rows, |r| r.get("amount").and_then(to_float));
            if let Some(mut col) = row_group.next_column()? {
                col.typed::<Int64Type>().write_batch(&ids, Some(id_levels.as_slice()), None)?;
                col.close()?;
            }
            if let Some(mut col) = row_group.next_column()? {
                col.typed::<DoubleType>()
                    .write_batch(&amounts, Some(amount_levels.as_slice()), None)?;
                col.close()?;
            }
        }
        LocalEngine::Generic => {
            let payloads = rows
                .iter()
                .map(|r| serde_json::to_string(r).map(|s| ByteArray::from(s.into_bytes())))
                .collect::<std::result::Result<Vec<_>, _>>()?;
            if let Some(mut col) = row_group.next_column()? {
                col.typed::<ByteArrayType>().write_batch(&payloads, None, None)?;
                col.close()?;
            }
        }
    }

    row_group.close()?;
    writer.close()?;
    Ok(())
}

fn optional_column<T, F>(rows: &[Row], get: F) -> (Vec<T>, Vec<i16>)
where
    F: Fn(&Row) -> Option<T>,
{
    let mut values = Vec::with_capacity(rows.len());
    let mut levels = Vec::with_capacity(rows.len());
    for row in rows {
        match get(row) {
            Some(v) => {
                values.push(v);
                levels.push(1);
            }
            None => levels.push(0),
        }
    }
    (values, levels)
}

/// Marker file left in place of parquet the writer could not produce.
pub fn write_parquet_placeholder(path: &Path) -> Result<()> {
    fs::write(path, PARQUET_PLACEHOLDER)?;
    Ok(())
}

pub fn write_profile_json<P: Serialize>(path: &Path, profile: &P, params: &Value) -> Result<()> {
    let params = if params.is_null() { json!({}) } else { params.clone() };
    write_json_value(path, &json!({ "profile": profile, "params": params }))
}

/// Default sink backed by [`write_cleaned_parquet`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ParquetFileSink;

impl ArtifactSink for ParquetFileSink {
    fn write_parquet(&self, path: &Path, rows: &[Row], engine: LocalEngine) -> Result<()> {
        write_cleaned_parquet(path, rows, engine)
    }
}

/// Runs `sink`, leaving the placeholder behind if it fails. Returns whether
/// the file on disk passes [`is_valid_parquet_file`].
pub fn materialize_parquet(sink: &dyn ArtifactSink, path: &Path, rows: &[Row], engine: LocalEngine) -> Result<bool> {
    if let Err(e) = sink.write_parquet(path, rows, engine) {
        warn!(path = %path.display(), error = %e, "parquet writer failed, writing placeholder");
        write_parquet_placeholder(path)?;
    }
    Ok(is_valid_parquet_file(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::rows_from_value;
    use tempfile::TempDir;

    #[test]
    fn magic_check_rejects_placeholder_and_short_files() {
        let dir = TempDir::new().unwrap();
        let placeholder = dir.path().join("p.parquet");
        write_parquet_placeholder(&placeholder).unwrap();
        assert!(!is_valid_parquet_file(&placeholder));

        let short = dir.path().join("s.parquet");
        fs::write(&short, b"PAR1").unwrap();
        assert!(!is_valid_parquet_file(&short));

        let framed = dir.path().join("f.parquet");
        fs::write(&framed, b"PAR1....PAR1").unwrap();
        assert!(is_valid_parquet_file(&framed));

        assert!(!is_valid_parquet_file(&dir.path().join("missing.parquet")));
        assert!(!is_valid_parquet_file(dir.path()));
    }

    #[test]
    fn written_parquet_passes_magic_check() {
        let dir = TempDir::new().unwrap();
        let rows = rows_from_value(&serde_json::json!([{"id": 1, "amount": 1.5}, {"id": 2, "amount": null}]));
        let simple = dir.path().join("simple.parquet");
        write_cleaned_parquet(&simple, &rows, LocalEngine::Simple).unwrap();
        assert!(is_valid_parquet_file(&simple));

        let generic = dir.path().join("generic.parquet");
        write_cleaned_parquet(&generic, &rows, LocalEngine::Generic).unwrap();
        assert!(is_valid_parquet_file(&generic));

        let empty = dir.path().join("empty.parquet");
        write_cleaned_parquet(&empty, &[], LocalEngine::Simple).unwrap();
        assert!(is_valid_parquet_file(&empty));
    }

    #[test]
    fn sha256_of_known_content() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("abc.txt");
        fs::write(&path, b"abc").unwrap();
        assert_eq!(
            sha256_file(&path).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    struct FailingSink;

    impl ArtifactSink for FailingSink {
        fn write_parquet(&self, _path: &Path, _rows: &[Row], _engine: LocalEngine) -> Result<()> {
            Err(crate::error::CleanflowError::Config("no writer".to_string()))
        }
    }

    #[test]
    fn failed_sink_leaves_invalid_placeholder() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cleaned.parquet");
        let valid = materialize_parquet(&FailingSink, &path, &[], LocalEngine::Simple).unwrap();
        assert!(!valid);
        assert_eq!(fs::read(&path).unwrap(), PARQUET_PLACEHOLDER);
    }
}
