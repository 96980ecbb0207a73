//! Canonical evidence rows: a fixed field set with a stable content id.

use serde_json::Value;
use sha2::{Digest, Sha256};

use super::spec::EvidenceSchema;
use crate::coerce::value_text;
use crate::types::Row;

/// Canonical evidence fields and their default source aliases.
pub const EVIDENCE_FIELDS: [(&str, &[&str]); 7] = [
    ("claim_text", &["claim_text", "text", "content"]),
    ("speaker", &["speaker", "author", "name"]),
    ("source_title", &["source_title", "title", "source_name"]),
    ("source_url", &["source_url", "url", "link"]),
    ("published_at", &["published_at", "publish_date", "date"]),
    ("stance", &["stance", "position"]),
    ("confidence", &["confidence", "score"]),
];

/// Provenance fields copied through untouched.
const PROVENANCE_FIELDS: [&str; 7] = [
    "source_file",
    "source_path",
    "source_type",
    "page",
    "sheet_name",
    "row_index",
    "chunk_index",
];

fn is_blank(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

/// First alias holding a non-null, non-blank value.
pub fn first_non_empty(row: &Row, aliases: &[&str]) -> Value {
    aliases
        .iter()
        .filter_map(|k| row.get(*k))
        .find(|v| !is_blank(v))
        .cloned()
        .unwrap_or(Value::Null)
}

fn text_or_empty(row: &Row, key: &str) -> String {
    row.get(key)
        .filter(|v| !is_blank(v))
        .map(value_text)
        .unwrap_or_default()
}

/// First 16 hex chars of SHA-256 over provenance plus claim text.
pub fn evidence_id(row: &Row) -> String {
    let position = row
        .get("row_index")
        .filter(|v| !is_blank(v))
        .or_else(|| row.get("chunk_index").filter(|v| !is_blank(v)))
        .map(value_text)
        .unwrap_or_default();
    let key = [
        text_or_empty(row, "source_path"),
        text_or_empty(row, "page"),
        text_or_empty(row, "sheet_name"),
        position,
        text_or_empty(row, "claim_text"),
    ]
    .join("|");
    let digest = Sha256::digest(key.as_bytes());
    hex::encode(digest)[..16].to_string()
}

/// Maps an arbitrary row onto the canonical evidence layout, `evidence_id` first.
pub fn canonical_evidence_row(row: &Row, schema: &EvidenceSchema) -> Row {
    let mut fields = Row::with_capacity(EVIDENCE_FIELDS.len() + PROVENANCE_FIELDS.len());
    for (field, defaults) in EVIDENCE_FIELDS {
        let aliases = schema.aliases_for(field, defaults);
        fields.insert(field.to_string(), first_non_empty(row, &aliases));
    }
    for field in PROVENANCE_FIELDS {
        fields.insert(field.to_string(), row.get(field).cloned().unwrap_or(Value::Null));
    }

    let mut out = Row::with_capacity(fields.len() + 1);
    out.insert("evidence_id".to_string(), Value::String(evidence_id(&fields)));
    out.extend(fields);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::rows_from_value;
    use serde_json::json;

    fn row(v: Value) -> Row {
        rows_from_value(&json!([v])).remove(0)
    }

    #[test]
    fn aliases_skip_blank_values() {
        let r = row(json!({"claim_text": "  ", "text": "hello", "author": "ann", "url": null, "link": "http://a"}));
        let ev = canonical_evidence_row(&r, &EvidenceSchema::default());
        assert_eq!(ev["claim_text"], json!("hello"));
        assert_eq!(ev["speaker"], json!("ann"));
        assert_eq!(ev["source_url"], json!("http://a"));
        assert_eq!(ev["stance"], Value::Null);
        assert_eq!(ev["evidence_id"].as_str().unwrap().len(), 16);
        assert_eq!(ev.keys().next().map(String::as_str), Some("evidence_id"));
    }

    #[test]
    fn schema_overrides_aliases() {
        let schema = EvidenceSchema::from_value(Some(&json!({"claim_text": ["body"], "speaker": "who"})));
        let r = row(json!({"text": "ignored", "body": "used", "who": "bob"}));
        let ev = canonical_evidence_row(&r, &schema);
        assert_eq!(ev["claim_text"], json!("used"));
        assert_eq!(ev["speaker"], json!("bob"));
    }

    #[test]
    fn id_depends_on_provenance_and_claim() {
        let a = row(json!({"text": "x", "source_path": "/a.txt", "chunk_index": 0}));
        let b = row(json!({"text": "x", "source_path": "/a.txt", "chunk_index": 1}));
        let schema = EvidenceSchema::default();
        let ida = canonical_evidence_row(&a, &schema)["evidence_id"].clone();
        let idb = canonical_evidence_row(&b, &schema)["evidence_id"].clone();
        assert_ne!(ida, idb);
        assert_eq!(ida, canonical_evidence_row(&a, &schema)["evidence_id"]);
    }
}
