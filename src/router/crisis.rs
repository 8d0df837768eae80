//! Crisis indicator patterns
//!
//! The pattern set is data, not code: it is built from the `[classifier]`
//! config section and an optional line-oriented patterns file, and can be
//! swapped at runtime through the admin reload endpoint.
//!
//! Matching is case-insensitive and word-boundary aware. Whitespace inside a
//! phrase matches any run of whitespace, so "want  to\ndie" still matches
//! "want to die". Typographic apostrophes and quotes are folded to ASCII in
//! both phrases and text, and an apostrophe inside a phrase is optional, so
//! "don't" also matches "don’t" and "dont". The set is biased toward
//! over-detection.

use crate::error::{AppError, AppResult};
use regex::RegexSet;
use std::borrow::Cow;
use std::path::Path;

/// Phrases matched when no patterns are configured
pub const DEFAULT_CRISIS_PATTERNS: &[&str] = &[
    "suicide",
    "suicidal",
    "kill myself",
    "killing myself",
    "want to die",
    "wanna die",
    "end my life",
    "ending my life",
    "end it all",
    "take my own life",
    "better off dead",
    "no reason to live",
    "self harm",
    "self-harm",
    "hurt myself",
    "cut myself",
    "overdose",
    "don't want to be alive",
    "don't want to live",
    "not want to live",
    "kms",
];

/// Compiled crisis indicator set
#[derive(Debug, Clone)]
pub struct CrisisPatternSet {
    phrases: Vec<String>,
    set: RegexSet,
}

impl CrisisPatternSet {
    /// Compile a pattern set from literal phrases
    ///
    /// Blank phrases are ignored. At least one non-blank phrase is required:
    /// an empty set would silently disable crisis detection.
    pub fn new<I, S>(phrases: I) -> AppResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let phrases: Vec<String> = phrases
            .into_iter()
            .map(|p| fold_quotes(p.as_ref().trim()).to_lowercase())
            .filter(|p| !p.is_empty())
            .collect();

        if phrases.is_empty() {
            return Err(AppError::Config(
                "crisis pattern set is empty; at least one crisis phrase is required".to_string(),
            ));
        }

        let regexes: Vec<String> = phrases.iter().map(|p| phrase_to_regex(p)).collect();
        let set = RegexSet::new(&regexes).map_err(|e| {
            AppError::Config(format!("failed to compile crisis patterns: {}", e))
        })?;

        Ok(Self { phrases, set })
    }

    /// The built-in pattern set
    pub fn builtin() -> AppResult<Self> {
        Self::new(DEFAULT_CRISIS_PATTERNS)
    }

    /// Load additional phrases from a file and merge them with `base`
    ///
    /// One phrase per line; blank lines and lines starting with `#` are skipped.
    pub fn from_file_with_base<P: AsRef<Path>>(path: P, base: &[String]) -> AppResult<Self> {
        let path_display = path.as_ref().display().to_string();
        let content = std::fs::read_to_string(path.as_ref()).map_err(|source| {
            AppError::ConfigFileRead {
                path: path_display,
                source,
            }
        })?;

        let from_file = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(str::to_string);

        Self::new(base.iter().cloned().chain(from_file))
    }

    /// Whether any crisis phrase occurs in `text`
    pub fn is_match(&self, text: &str) -> bool {
        self.set.is_match(&fold_quotes(text))
    }

    /// Phrases that matched `text` (for audit logging)
    pub fn matches<'a>(&'a self, text: &str) -> Vec<&'a str> {
        self.set
            .matches(&fold_quotes(text))
            .into_iter()
            .map(|idx| self.phrases[idx].as_str())
            .collect()
    }

    /// Number of phrases in the set
    pub fn len(&self) -> usize {
        self.phrases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.phrases.is_empty()
    }
}

/// Turn a literal phrase into a case-insensitive, boundary-anchored regex
fn phrase_to_regex(phrase: &str) -> String {
    let body = phrase
        .split_whitespace()
        .map(|word| regex::escape(word).replace('\'', "'?"))
        .collect::<Vec<_>>()
        .join(r"\s+");

    // \b only makes sense next to a word character
    let starts_word = phrase.chars().next().is_some_and(is_word_char);
    let ends_word = phrase.chars().last().is_some_and(is_word_char);

    format!(
        "(?i){}{}{}",
        if starts_word { r"\b" } else { "" },
        body,
        if ends_word { r"\b" } else { "" }
    )
}

/// Replace typographic apostrophes and quotes with their ASCII forms
fn fold_quotes(text: &str) -> Cow<'_, str> {
    if !text.chars().any(|c| ascii_quote(c).is_some()) {
        return Cow::Borrowed(text);
    }
    Cow::Owned(text.chars().map(|c| ascii_quote(c).unwrap_or(c)).collect())
}

fn ascii_quote(c: char) -> Option<char> {
    match c {
        '\u{2018}' | '\u{2019}' | '\u{201B}' | '\u{02BC}' | '\u{2032}' | '`' | '\u{00B4}' => {
            Some('\'')
        }
        '\u{201C}' | '\u{201D}' | '\u{201F}' | '\u{2033}' => Some('"'),
        _ => None,
    }
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_matches_canonical_phrase() {
        let set = CrisisPatternSet::builtin().unwrap();
        assert!(set.is_match("I want to die"));
        assert!(set.matches("I want to die").contains(&"want to die"));
    }

    #[test]
    fn test_matching_is_case_insensitive() {
        let set = CrisisPatternSet::builtin().unwrap();
        assert!(set.is_match("I WANT TO DIE"));
        assert!(set.is_match("Thinking about Suicide lately"));
    }

    #[test]
    fn test_matching_respects_word_boundaries() {
        let set = CrisisPatternSet::new(["die"]).unwrap();
        assert!(set.is_match("i could just die"));
        assert!(!set.is_match("the diesel engine broke"));
        assert!(!set.is_match("she is a diehard fan"));
    }

    #[test]
    fn test_internal_whitespace_is_flexible() {
        let set = CrisisPatternSet::builtin().unwrap();
        assert!(set.is_match("i  want   to\ndie"));
    }

    #[test]
    fn test_punctuation_adjacent_matches() {
        let set = CrisisPatternSet::builtin().unwrap();
        assert!(set.is_match("honestly... suicide?"));
        assert!(set.is_match("(self-harm)"));
    }

    #[test]
    fn test_apostrophe_variants_match() {
        let set = CrisisPatternSet::builtin().unwrap();
        assert!(set.is_match("I don't want to be alive"));
        assert!(set.is_match("I don\u{2019}t want to be alive"));
        assert!(set.is_match("i dont want to be alive"));
        assert!(set.is_match("I don\u{2018}t want to be alive"));
    }

    #[test]
    fn test_dont_want_to_live_matches() {
        let set = CrisisPatternSet::builtin().unwrap();
        assert!(set.is_match("I don't want to live anymore"));
        assert!(set.is_match("I don\u{2019}t want to live anymore"));
        assert!(set.is_match("honestly i dont want to live"));
        assert!(set.is_match("I do not want to live"));
        assert!(set.is_match("I want to kill myself"));
    }

    #[test]
    fn test_kms_matches_as_a_word() {
        let set = CrisisPatternSet::builtin().unwrap();
        assert!(set.is_match("ngl i might just kms"));
        assert!(!set.is_match("the walk was 5 kilometres"));
    }

    #[test]
    fn test_configured_phrase_with_typographic_apostrophe() {
        let set = CrisisPatternSet::new(["can\u{2019}t go on"]).unwrap();
        assert!(set.is_match("I can't go on"));
        assert!(set.is_match("i cant go on like this"));
        assert_eq!(set.matches("I can\u{2019}t go on"), vec!["can't go on"]);
    }

    #[test]
    fn test_benign_text_does_not_match() {
        let set = CrisisPatternSet::builtin().unwrap();
        assert!(!set.is_match("What's the capital of France?"));
        assert!(!set.is_match("How do I reset my password"));
    }

    #[test]
    fn test_regex_metacharacters_are_literal() {
        let set = CrisisPatternSet::new(["end it all?"]).unwrap();
        assert!(set.is_match("i want to end it all? maybe"));
        assert!(!set.is_match("i want to end it al"));
    }

    #[test]
    fn test_empty_set_rejected() {
        let result = CrisisPatternSet::new(Vec::<String>::new());
        assert!(result.is_err());
        let result = CrisisPatternSet::new(["   ", ""]);
        assert!(result.is_err());
    }

    #[test]
    fn test_from_file_merges_with_base() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("patterns.txt");
        std::fs::write(&path, "# extra phrases\n\ngive up on everything\n").unwrap();

        let base = vec!["want to die".to_string()];
        let set = CrisisPatternSet::from_file_with_base(&path, &base).unwrap();
        assert_eq!(set.len(), 2);
        assert!(set.is_match("I just want to give up on everything"));
        assert!(set.is_match("i want to die"));
    }

    #[test]
    fn test_from_missing_file_errors() {
        let result = CrisisPatternSet::from_file_with_base("/nonexistent/patterns.txt", &[]);
        assert!(matches!(result, Err(AppError::ConfigFileRead { .. })));
    }
}
