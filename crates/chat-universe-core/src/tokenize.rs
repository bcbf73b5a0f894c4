//! Term tokenizer for the lexicon and occurrence index.
//!
//! The token pattern, minimum length and context window are fixed
//! behavioral contracts: every stored occurrence position and context
//! string depends on them.
//!
//! # Rules
//!
//! 1. Scan each turn's content with `[A-Za-z0-9_'-]+`.
//! 2. Lowercase the match to get the normalized term.
//! 3. Drop tokens shorter than [`MIN_TOKEN_LEN`] characters.
//! 4. Number surviving tokens with a position that keeps increasing across
//!    all turns of the thread.
//! 5. Keep up to [`CONTEXT_WINDOW`] raw characters on either side of the
//!    match for display.

use std::collections::BTreeSet;

use lazy_static::lazy_static;
use regex::Regex;

/// Minimum token length, in characters.
pub const MIN_TOKEN_LEN: usize = 2;

/// Characters of raw context kept before and after each occurrence.
pub const CONTEXT_WINDOW: usize = 24;

lazy_static! {
    static ref TOKEN_RE: Regex = Regex::new(r"[A-Za-z0-9_'-]+").unwrap();
}

/// One indexed token within a thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TermToken {
    /// Surface form as it appeared in the text.
    pub term: String,
    /// Lowercased form used as the lexicon key.
    pub normalized: String,
    /// Index into the turn slice passed to [`tokenize_turns`].
    pub turn_offset: usize,
    /// Thread-wide monotonic position.
    pub position: i64,
    pub context_before: String,
    pub context_after: String,
}

/// Tokenize the contents of a thread's turns, in order.
pub fn tokenize_turns<S: AsRef<str>>(contents: &[S]) -> Vec<TermToken> {
    let mut tokens = Vec::new();
    let mut position: i64 = 0;

    for (turn_offset, content) in contents.iter().enumerate() {
        let content = content.as_ref();
        for m in TOKEN_RE.find_iter(content) {
            let surface = m.as_str();
            // The pattern is ASCII-only, so byte length equals char count.
            if surface.len() < MIN_TOKEN_LEN {
                continue;
            }
            tokens.push(TermToken {
                term: surface.to_string(),
                normalized: surface.to_ascii_lowercase(),
                turn_offset,
                position,
                context_before: window_before(content, m.start()),
                context_after: window_after(content, m.end()),
            });
            position += 1;
        }
    }

    tokens
}

/// Distinct normalized terms of a free-text query, in first-seen order.
pub fn tokenize_query(query: &str) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut terms = Vec::new();
    for m in TOKEN_RE.find_iter(query) {
        let surface = m.as_str();
        if surface.len() < MIN_TOKEN_LEN {
            continue;
        }
        let normalized = surface.to_ascii_lowercase();
        if seen.insert(normalized.clone()) {
            terms.push(normalized);
        }
    }
    terms
}

fn window_before(content: &str, start: usize) -> String {
    let mut chars: Vec<char> = content[..start].chars().rev().take(CONTEXT_WINDOW).collect();
    chars.reverse();
    chars.into_iter().collect()
}

fn window_after(content: &str, end: usize) -> String {
    content[end..].chars().take(CONTEXT_WINDOW).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positions_and_normalization() {
        let tokens = tokenize_turns(&["Alpha beta, alpha!"]);
        let summary: Vec<(&str, i64)> = tokens
            .iter()
            .map(|t| (t.normalized.as_str(), t.position))
            .collect();
        assert_eq!(summary, vec![("alpha", 0), ("beta", 1), ("alpha", 2)]);
        assert_eq!(tokens[0].term, "Alpha");
        assert_eq!(tokens[2].term, "alpha");
    }

    #[test]
    fn short_tokens_are_dropped_without_consuming_positions() {
        let tokens = tokenize_turns(&["a bb c dd"]);
        let summary: Vec<(&str, i64)> = tokens
            .iter()
            .map(|t| (t.normalized.as_str(), t.position))
            .collect();
        assert_eq!(summary, vec![("bb", 0), ("dd", 1)]);
    }

    #[test]
    fn positions_continue_across_turns() {
        let tokens = tokenize_turns(&["nebula question", "nebula answer"]);
        assert_eq!(tokens.len(), 4);
        assert_eq!(tokens[2].turn_offset, 1);
        assert_eq!(tokens[2].position, 2);
        assert_eq!(tokens[3].position, 3);
    }

    #[test]
    fn apostrophes_hyphens_and_underscores_are_word_chars() {
        let tokens = tokenize_turns(&["don't re-run snake_case"]);
        let terms: Vec<&str> = tokens.iter().map(|t| t.normalized.as_str()).collect();
        assert_eq!(terms, vec!["don't", "re-run", "snake_case"]);
    }

    #[test]
    fn context_window_is_bounded() {
        let prefix = "x".repeat(40);
        let text = format!("{} target {}", prefix, "y".repeat(40));
        let tokens = tokenize_turns(&[text.as_str()]);
        let target = tokens.iter().find(|t| t.normalized == "target").unwrap();
        assert_eq!(target.context_before.chars().count(), CONTEXT_WINDOW);
        assert_eq!(target.context_after.chars().count(), CONTEXT_WINDOW);
        assert!(target.context_before.ends_with("x "));
        assert!(target.context_after.starts_with(" y"));
    }

    #[test]
    fn context_window_handles_multibyte_text() {
        let tokens = tokenize_turns(&["日本語のテキスト word é"]);
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].normalized, "word");
        assert_eq!(tokens[0].context_before, "日本語のテキスト ");
        assert_eq!(tokens[0].context_after, " é");
    }

    #[test]
    fn query_terms_are_distinct() {
        assert_eq!(
            tokenize_query("Nebula nebula \"drift\" a"),
            vec!["nebula".to_string(), "drift".to_string()]
        );
        assert!(tokenize_query("? ! .").is_empty());
    }
}
