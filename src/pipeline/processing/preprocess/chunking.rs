use once_cell::sync::Lazy;
use regex::Regex;

static PARAGRAPH_BREAK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\n\s*\n").expect("paragraph pattern"));

const SENTENCE_TERMINATORS: [char; 6] = ['.', '!', '?', '。', '！', '？'];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkMode {
    None,
    Paragraph,
    Sentence,
    Fixed,
}

impl ChunkMode {
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "" | "none" | "off" => Some(ChunkMode::None),
            "paragraph" => Some(ChunkMode::Paragraph),
            "sentence" => Some(ChunkMode::Sentence),
            "fixed" => Some(ChunkMode::Fixed),
            _ => None,
        }
    }
}

fn split_sentences(text: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        current.push(c);
        if SENTENCE_TERMINATORS.contains(&c) && chars.peek().is_some_and(|n| n.is_whitespace()) {
            while chars.peek().is_some_and(|n| n.is_whitespace()) {
                chars.next();
            }
            parts.push(std::mem::take(&mut current));
        }
    }
    parts.push(current);
    parts
}

fn split_fixed(text: &str, max_chars: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(max_chars.max(1))
        .map(|window| window.iter().collect())
        .collect()
}

/// Splits `text` into trimmed, non-empty pieces. `ChunkMode::None` yields the
/// whole trimmed text as a single piece.
pub fn chunk_text(text: &str, mode: ChunkMode, max_chars: usize) -> Vec<String> {
    let text = text.trim();
    if text.is_empty() {
        return Vec::new();
    }
    let pieces: Vec<String> = match mode {
        ChunkMode::None => vec![text.to_string()],
        ChunkMode::Paragraph => PARAGRAPH_BREAK.split(text).map(str::to_string).collect(),
        ChunkMode::Sentence => split_sentences(text),
        ChunkMode::Fixed => split_fixed(text, max_chars),
    };
    pieces
        .into_iter()
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paragraphs_split_on_blank_lines() {
        let out = chunk_text("one\nstill one\n \n two\n\n\nthree", ChunkMode::Paragraph, 10);
        assert_eq!(out, vec!["one\nstill one", "two", "three"]);
    }

    #[test]
    fn sentences_split_after_terminators() {
        let out = chunk_text("Yes. No! Maybe? 3.5 is fine", ChunkMode::Sentence, 10);
        assert_eq!(out, vec!["Yes.", "No!", "Maybe?", "3.5 is fine"]);
        let cjk = chunk_text("我们支持。 他们反对！ 好", ChunkMode::Sentence, 10);
        assert_eq!(cjk, vec!["我们支持。", "他们反对！", "好"]);
    }

    #[test]
    fn fixed_windows_count_chars() {
        let out = chunk_text("abcdefg", ChunkMode::Fixed, 3);
        assert_eq!(out, vec!["abc", "def", "g"]);
        let wide = chunk_text("支持反对", ChunkMode::Fixed, 3);
        assert_eq!(wide, vec!["支持反", "对"]);
    }

    #[test]
    fn empty_text_has_no_chunks() {
        assert!(chunk_text("  \n ", ChunkMode::Sentence, 5).is_empty());
    }

    #[test]
    fn mode_names() {
        assert_eq!(ChunkMode::parse("OFF"), Some(ChunkMode::None));
        assert_eq!(ChunkMode::parse("words"), None);
    }
}
