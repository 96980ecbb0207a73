//! Row readers for CSV, JSON and JSON Lines sources.

use serde_json::Value;
use std::fs;
use std::path::Path;
use tracing::debug;

use crate::error::Result;
use crate::types::Row;

const DELIMITER_CANDIDATES: [u8; 4] = [b',', b';', b'\t', b'|'];
const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// UTF-8 text with any BOM removed; invalid sequences are replaced.
pub fn decode_text(bytes: &[u8]) -> String {
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => String::from_utf8_lossy(bytes).into_owned(),
    }
}

pub fn read_text_file(path: &Path) -> Result<String> {
    Ok(decode_text(&fs::read(path)?))
}

/// Picks the candidate delimiter seen most often on the header line.
pub fn sniff_delimiter(sample: &str) -> u8 {
    let Some(header) = sample.lines().find(|l| !l.trim().is_empty()) else {
        return b',';
    };
    DELIMITER_CANDIDATES
        .iter()
        .map(|d| (*d, header.bytes().filter(|b| b == d).count()))
        .filter(|(_, n)| *n > 0)
        .fold(None, |best: Option<(u8, usize)>, cur| match best {
            Some(b) if b.1 >= cur.1 => Some(b),
            _ => Some(cur),
        })
        .map(|(d, _)| d)
        .unwrap_or(b',')
}

/// Parses CSV text with a header row. Every cell stays a string; short
/// records get nulls for the missing columns.
pub fn parse_csv_text(text: &str, delimiter: u8) -> Result<Vec<Row>> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .from_reader(text.as_bytes());
    let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let row: Row = headers
            .iter()
            .enumerate()
            .map(|(i, h)| {
                let cell = record
                    .get(i)
                    .map(|s| Value::String(s.to_string()))
                    .unwrap_or(Value::Null);
                (h.clone(), cell)
            })
            .collect();
        rows.push(row);
    }
    Ok(rows)
}

/// Reads a CSV file, sniffing the delimiter when none is given.
/// Returns the rows and the delimiter used.
pub fn read_csv_rows(path: &Path, delimiter: Option<u8>) -> Result<(Vec<Row>, u8)> {
    let text = read_text_file(path)?;
    let delimiter = delimiter.unwrap_or_else(|| sniff_delimiter(&text));
    let rows = parse_csv_text(&text, delimiter)?;
    debug!(path = %path.display(), rows = rows.len(), delimiter = %(delimiter as char), "csv rows read");
    Ok((rows, delimiter))
}

/// Accepts an array of objects, `{"rows": [...]}`, or a single object.
pub fn read_json_rows(path: &Path) -> Result<Vec<Row>> {
    let payload: Value = serde_json::from_str(&read_text_file(path)?)?;
    let objects = |items: &Vec<Value>| -> Vec<Row> {
        items.iter().filter_map(|v| v.as_object().cloned()).collect()
    };
    Ok(match payload {
        Value::Array(items) => objects(&items),
        Value::Object(obj) => match obj.get("rows") {
            Some(Value::Array(items)) => objects(items),
            _ => vec![obj],
        },
        _ => Vec::new(),
    })
}

/// One object per line; blank and malformed lines are skipped.
pub fn read_jsonl_rows(path: &Path) -> Result<Vec<Row>> {
    let text = read_text_file(path)?;
    let mut rows = Vec::new();
    let mut skipped = 0usize;
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<Value>(line) {
            Ok(Value::Object(obj)) => rows.push(obj),
            _ => skipped += 1,
        }
    }
    if skipped > 0 {
        debug!(path = %path.display(), skipped, "malformed jsonl lines skipped");
    }
    Ok(rows)
}
