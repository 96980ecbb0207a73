//! Marks topics on which rows take opposing positions.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use super::spec::ConflictConfig;
use crate::coerce::value_text;
use crate::types::Row;

static NON_WORD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^a-z0-9\x{4e00}-\x{9fff}\s]+").expect("non-word pattern"));

const STOPWORDS: [&str; 21] = [
    "the", "a", "an", "is", "are", "of", "to", "and", "or", "in", "on", "for", "we", "should",
    "it", "this", "that", "these", "those", "they", "them",
];

const TOPIC_TOKENS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Polarity {
    Pro,
    Con,
    Unknown,
}

impl Polarity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Polarity::Pro => "pro",
            Polarity::Con => "con",
            Polarity::Unknown => "unknown",
        }
    }
}

fn tokens(text: &str) -> Vec<String> {
    NON_WORD
        .replace_all(&text.to_lowercase(), " ")
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

fn has_cjk(s: &str) -> bool {
    s.chars().any(|c| ('\u{4e00}'..='\u{9fff}').contains(&c))
}

/// Keyword lookup over normalized text: whole-word for latin keywords,
/// substring for CJK keywords.
fn contains_keyword(padded: &str, keyword: &str) -> bool {
    let kw = tokens(keyword).join(" ");
    if kw.is_empty() {
        return false;
    }
    if has_cjk(&kw) {
        padded.contains(&kw)
    } else {
        padded.contains(&format!(" {} ", kw))
    }
}

/// Classifies `text` as pro or con by keyword; both or neither is unknown.
pub fn polarity(text: &str, cfg: &ConflictConfig) -> Polarity {
    let padded = format!(" {} ", tokens(text).join(" "));
    let pro = cfg.positive_words.iter().any(|w| contains_keyword(&padded, w));
    let con = cfg.negative_words.iter().any(|w| contains_keyword(&padded, w));
    match (pro, con) {
        (true, false) => Polarity::Pro,
        (false, true) => Polarity::Con,
        _ => Polarity::Unknown,
    }
}

/// Up to eight content tokens, skipping stopwords and polarity keywords.
pub fn infer_topic(text: &str, cfg: &ConflictConfig) -> String {
    tokens(text)
        .into_iter()
        .filter(|t| {
            !STOPWORDS.contains(&t.as_str())
                && !cfg.positive_words.contains(t)
                && !cfg.negative_words.contains(t)
        })
        .take(TOPIC_TOKENS)
        .collect::<Vec<_>>()
        .join(" ")
}

fn field_text(row: &Row, field: &str) -> String {
    row.get(field)
        .filter(|v| !v.is_null())
        .map(value_text)
        .unwrap_or_default()
}

fn topic_of(row: &Row, cfg: &ConflictConfig) -> String {
    let explicit = field_text(row, &cfg.topic_field).trim().to_lowercase();
    if !explicit.is_empty() {
        return explicit;
    }
    let inferred = infer_topic(&field_text(row, &cfg.text_field), cfg);
    if !inferred.is_empty() {
        return inferred;
    }
    let source = ["source_path", "source_file"]
        .iter()
        .map(|k| field_text(row, k).trim().to_lowercase())
        .find(|s| !s.is_empty());
    match source {
        Some(s) => format!("src:{}", s),
        None => String::new(),
    }
}

/// Rows whose topic holds both a pro and a con row are flagged.
/// Annotates every row with `conflict_topic`, `conflict_polarity` and
/// `conflict_flag`. Returns how many rows were flagged.
pub fn detect_conflicts(rows: &mut [Row], cfg: &ConflictConfig) -> u64 {
    let mut marks: Vec<(String, Polarity)> = Vec::with_capacity(rows.len());
    let mut seen: HashMap<String, (bool, bool)> = HashMap::new();

    for row in rows.iter() {
        let topic = topic_of(row, cfg);
        let basis = match row.get(&cfg.stance_field) {
            Some(v) if !v.is_null() => value_text(v),
            _ => field_text(row, &cfg.text_field),
        };
        let pol = polarity(&basis, cfg);
        if !topic.is_empty() {
            let entry = seen.entry(topic.clone()).or_default();
            entry.0 |= pol == Polarity::Pro;
            entry.1 |= pol == Polarity::Con;
        }
        marks.push((topic, pol));
    }

    let mut flagged = 0u64;
    for (row, (topic, pol)) in rows.iter_mut().zip(marks) {
        let flag = seen.get(&topic).is_some_and(|(pro, con)| *pro && *con);
        if flag {
            flagged += 1;
        }
        row.insert("conflict_topic".to_string(), Value::String(topic));
        row.insert("conflict_polarity".to_string(), Value::String(pol.as_str().to_string()));
        row.insert("conflict_flag".to_string(), Value::Bool(flag));
    }
    flagged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::rows_from_value;
    use serde_json::json;

    #[test]
    fn polarity_matches_whole_words() {
        let cfg = ConflictConfig::default();
        assert_eq!(polarity("We support the plan", &cfg), Polarity::Pro);
        assert_eq!(polarity("I oppose it", &cfg), Polarity::Con);
        assert_eq!(polarity("nothing here", &cfg), Polarity::Unknown);
        assert_eq!(polarity("yes and no", &cfg), Polarity::Unknown);
        assert_eq!(polarity("notable knowledge", &cfg), Polarity::Unknown);
    }

    #[test]
    fn cjk_keywords_match_as_substrings() {
        let cfg = ConflictConfig {
            positive_words: vec!["支持".to_string()],
            negative_words: vec!["反对".to_string()],
            ..Default::default()
        };
        assert_eq!(polarity("我们支持这个方案", &cfg), Polarity::Pro);
        assert_eq!(polarity("我们反对", &cfg), Polarity::Con);
    }

    #[test]
    fn topic_inference_drops_stopwords_and_keywords() {
        let cfg = ConflictConfig::default();
        assert_eq!(infer_topic("We SUPPORT the new Tax-Plan!", &cfg), "new tax plan");
    }

    #[test]
    fn flags_opposing_rows_on_same_topic() {
        let cfg = ConflictConfig::default();
        let mut rows = rows_from_value(&json!([
            {"topic": "Tax", "claim_text": "we support it"},
            {"topic": "tax", "claim_text": "we oppose it"},
            {"topic": "tax", "claim_text": "unclear"},
            {"topic": "roads", "claim_text": "support roads"}
        ]));
        let flagged = detect_conflicts(&mut rows, &cfg);
        assert_eq!(flagged, 3);
        assert_eq!(rows[0]["conflict_flag"], json!(true));
        assert_eq!(rows[1]["conflict_polarity"], json!("con"));
        assert_eq!(rows[2]["conflict_polarity"], json!("unknown"));
        assert_eq!(rows[2]["conflict_flag"], json!(true));
        assert_eq!(rows[3]["conflict_flag"], json!(false));
        assert_eq!(rows[3]["conflict_topic"], json!("roads"));
    }

    #[test]
    fn stance_overrides_text_and_source_is_fallback_topic() {
        let cfg = ConflictConfig::default();
        let mut rows = rows_from_value(&json!([
            {"stance": "agree", "claim_text": "no", "source_path": "/d/a.txt"}
        ]));
        detect_conflicts(&mut rows, &cfg);
        assert_eq!(rows[0]["conflict_polarity"], json!("pro"));
        assert_eq!(rows[0]["conflict_topic"], json!("src:/d/a.txt"));
    }
}
