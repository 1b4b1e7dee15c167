//! Text cleanup and keyword matching.

use regex::Regex;
use tracing::warn;

/// Collapses runs of whitespace into single spaces and trims.
#[must_use]
pub fn normalize_text(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Normalized text, or `None` when nothing is left.
#[must_use]
pub fn non_empty_text(raw: &str) -> Option<String> {
    let text = normalize_text(raw);
    if text.is_empty() { None } else { Some(text) }
}

/// Case-insensitive whole-word keyword matcher.
#[derive(Debug, Clone, Default)]
pub struct KeywordMatcher {
    patterns: Vec<(String, Regex)>,
}

impl KeywordMatcher {
    /// Builds a matcher for `keywords`; blank entries are skipped.
    #[must_use]
    pub fn new(keywords: &[String]) -> Self {
        let mut patterns = Vec::with_capacity(keywords.len());
        for keyword in keywords {
            let keyword = normalize_text(keyword).to_lowercase();
            if keyword.is_empty() || patterns.iter().any(|(k, _)| *k == keyword) {
                continue;
            }
            let pattern = format!(r"(?i)\b{}\b", regex::escape(&keyword));
            match Regex::new(&pattern) {
                Ok(regex) => patterns.push((keyword, regex)),
                Err(error) => warn!(keyword, error = %error, "skipping keyword"),
            }
        }
        Self { patterns }
    }

    /// Returns true when no keywords are configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Keywords (lowercased, in configured order) found in any of `texts`.
    #[must_use]
    pub fn matches(&self, texts: &[&str]) -> Vec<String> {
        self.patterns
            .iter()
            .filter(|(_, regex)| texts.iter().any(|text| regex.is_match(text)))
            .map(|(keyword, _)| keyword.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_text_collapses_whitespace() {
        assert_eq!(normalize_text("  Rates\n\t rise   again "), "Rates rise again");
        assert_eq!(non_empty_text(" \n "), None);
    }

    #[test]
    fn test_keyword_matcher_whole_words_case_insensitive() {
        let matcher = KeywordMatcher::new(&["Earnings".to_string(), "ipo".to_string()]);
        assert_eq!(
            matcher.matches(&["Q3 EARNINGS beat estimates", "no listing"]),
            vec!["earnings".to_string()]
        );
        // "ipo" must not match inside "hippo"
        assert!(matcher.matches(&["hippo"]).is_empty());
    }

    #[test]
    fn test_keyword_matcher_skips_blank_and_duplicates() {
        let matcher = KeywordMatcher::new(&[" ".to_string(), "merger".into(), "Merger".into()]);
        assert_eq!(matcher.matches(&["merger talks"]), vec!["merger".to_string()]);
        assert!(KeywordMatcher::new(&[]).is_empty());
    }
}
