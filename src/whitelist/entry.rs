//! A single whitelist pattern.

use regex::Regex;
use std::fmt;

use super::error::WhitelistError;

/// One compiled whitelist pattern.
///
/// Patterns are regular expressions over scheme-qualified probe strings such
/// as `https://example.com`. Matching is an unanchored search: the pattern
/// author adds `^`/`$` where a full match is wanted.
#[derive(Debug, Clone)]
pub struct Entry {
    pattern: String,
    matcher: Regex,
}

impl Entry {
    /// Compile `pattern`.
    pub fn new(pattern: impl Into<String>) -> Result<Self, WhitelistError> {
        let pattern = pattern.into();
        let matcher = Regex::new(&pattern).map_err(|e| WhitelistError::InvalidPattern {
            pattern: pattern.clone(),
            reason: e.to_string(),
        })?;
        Ok(Self { pattern, matcher })
    }

    /// The source configuration string.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Whether `candidate` contains a match.
    pub fn is_match(&self, candidate: &str) -> bool {
        self.matcher.is_match(candidate)
    }
}

impl fmt::Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.pattern)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unanchored_match() {
        let entry = Entry::new(r"example\.com").unwrap();
        assert!(entry.is_match("https://example.com"));
        assert!(entry.is_match("http://www.example.com/path"));
        assert!(!entry.is_match("https://example.org"));
    }

    #[test]
    fn test_author_controls_anchoring() {
        let entry = Entry::new(r"^https://example\.com$").unwrap();
        assert!(entry.is_match("https://example.com"));
        assert!(!entry.is_match("https://example.com.evil.net"));
        assert!(!entry.is_match("http://https://example.com"));
    }

    #[test]
    fn test_case_sensitive() {
        let entry = Entry::new(r"https://example\.com").unwrap();
        assert!(!entry.is_match("https://EXAMPLE.com"));

        let folded = Entry::new(r"(?i)https://example\.com").unwrap();
        assert!(folded.is_match("https://EXAMPLE.com"));
    }

    #[test]
    fn test_invalid_pattern() {
        let err = Entry::new("https://(unclosed").unwrap_err();
        match err {
            WhitelistError::InvalidPattern { pattern, .. } => {
                assert_eq!(pattern, "https://(unclosed");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_pattern_preserved() {
        let entry = Entry::new(r"https://example\.com.*").unwrap();
        assert_eq!(entry.pattern(), r"https://example\.com.*");
        assert_eq!(entry.to_string(), r"https://example\.com.*");
    }
}
