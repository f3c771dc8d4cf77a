//! Banned-word filtering of link labels
//!
//! Labels (the `#fragment` of a link, or the `ps` field of a VMess payload) are
//! untrusted display text. They are percent-decoded until nothing changes so
//! that a term hidden behind one or more layers of `%XX` escapes is still
//! found, then matched case-insensitively against the configured terms.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::debug;

const UTF8_BOM: char = '\u{feff}';

// ============================================================================
// Banned Words
// ============================================================================

/// Immutable list of lower-case banned terms, in configured order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BannedWords {
    words: Vec<String>,
}

impl BannedWords {
    /// Creates an empty list, under which every label passes
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a list from terms, lower-casing each and dropping empty ones
    pub fn from_words<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let words = words
            .into_iter()
            .map(|w| w.as_ref().trim().to_lowercase())
            .filter(|w| !w.is_empty())
            .collect();
        Self { words }
    }

    /// Parses the newline-delimited list format
    ///
    /// Blank lines and lines starting with `#` are ignored; a leading UTF-8
    /// byte order mark is stripped.
    pub fn parse(content: &str) -> Self {
        let content = content.strip_prefix(UTF8_BOM).unwrap_or(content);
        Self::from_words(
            content
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with('#')),
        )
    }

    /// Loads the list from a file
    pub async fn load(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read banned words file {:?}", path))?;
        let words = Self::parse(&content);
        debug!("Loaded {} banned word(s) from {:?}", words.len(), path);
        Ok(words)
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn words(&self) -> &[String] {
        &self.words
    }

    /// Finds the first banned term contained in a label
    ///
    /// Returns `None` for an empty label or when no term matches.
    pub fn find_in_label(&self, label: &str) -> Option<&str> {
        if label.is_empty() || self.words.is_empty() {
            return None;
        }
        let decoded = fully_decode(label).to_lowercase();
        self.words
            .iter()
            .find(|word| decoded.contains(word.as_str()))
            .map(String::as_str)
    }
}

// ============================================================================
// Recursive Decoding
// ============================================================================

/// Percent-decodes repeatedly until a fixed point is reached
///
/// Each round treats `+` as a space, like form decoding, and decodes
/// byte-wise. Invalid UTF-8 becomes U+FFFD, so a stray escape cannot stop
/// the terms around it from being decoded. Decoding stops when a round
/// produces no change.
pub fn fully_decode(s: &str) -> String {
    let mut current = s.to_string();
    loop {
        let spaced = current.replace('+', " ");
        let bytes = urlencoding::decode_binary(spaced.as_bytes());
        let decoded = String::from_utf8_lossy(&bytes).into_owned();
        if decoded == current {
            return current;
        }
        current = decoded;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn banned() -> BannedWords {
        BannedWords::from_words(["Blocked", "bad word"])
    }

    #[test]
    fn test_parse_word_list() {
        let content = "\u{feff}# comment\n\nSpam\n  Casino  \n#ignored\n";
        let words = BannedWords::parse(content);
        assert_eq!(words.words(), ["spam", "casino"]);
    }

    #[test]
    fn test_from_words_drops_empty() {
        let words = BannedWords::from_words(["", "  ", "x"]);
        assert_eq!(words.len(), 1);
    }

    #[test]
    fn test_plain_match() {
        assert_eq!(banned().find_in_label("my-blocked-server"), Some("blocked"));
    }

    #[test]
    fn test_case_insensitive_match() {
        assert_eq!(banned().find_in_label("BLOCKED node"), Some("blocked"));
    }

    #[test]
    fn test_single_encoded_match() {
        // "blocked" with every letter escaped
        let label = "%62%6C%6F%63%6B%65%64";
        assert_eq!(banned().find_in_label(label), Some("blocked"));
    }

    #[test]
    fn test_double_encoded_match() {
        let label = "%2562%256C%256F%2563%256B%2565%2564";
        assert_eq!(banned().find_in_label(label), Some("blocked"));
    }

    #[test]
    fn test_plus_as_space() {
        assert_eq!(banned().find_in_label("a+bad+word+here"), Some("bad word"));
        assert_eq!(banned().find_in_label("a%2Bbad%2Bword"), Some("bad word"));
    }

    #[test]
    fn test_first_configured_term_wins() {
        let words = BannedWords::from_words(["second", "first"]);
        assert_eq!(words.find_in_label("first second"), Some("second"));
    }

    #[test]
    fn test_no_match() {
        assert_eq!(banned().find_in_label("clean-node"), None);
        assert_eq!(banned().find_in_label(""), None);
        assert_eq!(BannedWords::new().find_in_label("blocked"), None);
    }

    #[test]
    fn test_fully_decode_fixed_point() {
        assert_eq!(fully_decode("plain"), "plain");
        assert_eq!(fully_decode("a%20b"), "a b");
        assert_eq!(fully_decode("%2520"), " ");
        assert_eq!(fully_decode("100%"), "100%");
    }

    #[test]
    fn test_fully_decode_invalid_utf8_replaced() {
        assert_eq!(fully_decode("%FF%FE"), "\u{FFFD}\u{FFFD}");
        assert_eq!(fully_decode("%FF%62locked"), "\u{FFFD}blocked");
    }

    #[test]
    fn test_stray_escape_does_not_hide_term() {
        assert_eq!(banned().find_in_label("%FF%62locked"), Some("blocked"));
        assert_eq!(banned().find_in_label("%2562locked%FF"), Some("blocked"));
        assert_eq!(banned().find_in_label("blocked%FF"), Some("blocked"));
    }
}
