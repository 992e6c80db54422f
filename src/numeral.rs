use serde::{Deserialize, Serialize};

use crate::error::ScrapeError;

/// Which part of an element's text carries the number.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ParseRule {
    /// `"1,234 reads"` -> `1234`
    #[default]
    FirstToken,
    /// The n-th token, counting from zero. Tokens split on ASCII whitespace
    /// only; NBSP groups digits.
    Token(usize),
    /// Text after the last occurrence of a separator, e.g. `"1–20"` -> `20`.
    LastSegment(String),
    /// The whole text must be a numeral.
    Whole,
}

const GROUP_SEPARATORS: [char; 6] = [',', '.', '\'', '_', '\u{a0}', '\u{202f}'];

impl ParseRule {
    pub fn parse(&self, text: &str) -> Result<u64, ScrapeError> {
        let token = match self {
            ParseRule::FirstToken => text.split_ascii_whitespace().next(),
            ParseRule::Token(index) => text.split_ascii_whitespace().nth(*index),
            ParseRule::LastSegment(separator) => text.rsplit(separator.as_str()).next(),
            ParseRule::Whole => Some(text),
        };
        let Some(token) = token else {
            return Err(ScrapeError::UnparsableNumeral(text.to_owned()));
        };
        parse_numeral(token).ok_or_else(|| ScrapeError::UnparsableNumeral(text.to_owned()))
    }
}

/// Parses an unsigned integer written with optional digit-group separators.
pub fn parse_numeral(token: &str) -> Option<u64> {
    let digits: String = token
        .trim()
        .chars()
        .filter(|ch| !GROUP_SEPARATORS.contains(ch))
        .collect();
    if digits.is_empty() || !digits.chars().all(|ch| ch.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_token_tolerates_separators_and_labels() {
        assert_eq!(ParseRule::FirstToken.parse("1,234 reads").ok(), Some(1234));
        assert_eq!(ParseRule::FirstToken.parse("  42\n").ok(), Some(42));
        assert_eq!(ParseRule::FirstToken.parse("0").ok(), Some(0));
        assert_eq!(ParseRule::FirstToken.parse("1\u{a0}000 views").ok(), Some(1000));
        assert_eq!(ParseRule::Token(1).parse("Reads 12\u{202f}345").ok(), Some(12345));
    }

    #[test]
    fn empty_or_non_numeric_text_fails_without_panicking() {
        for text in ["", "   ", "reads", "n/a 12", "-3", "12a"] {
            let err = ParseRule::FirstToken
                .parse(text)
                .expect_err("non-numeric text must fail");
            assert!(matches!(err, ScrapeError::UnparsableNumeral(_)), "{text:?}");
        }
    }

    #[test]
    fn token_rule_picks_positional_word() {
        let rule = ParseRule::Token(3);
        assert_eq!(rule.parse("Followers 10 Views 2,048").ok(), Some(2048));
        assert!(rule.parse("Followers 10").is_err());
    }

    #[test]
    fn last_segment_reads_range_upper_bound() {
        let rule = ParseRule::LastSegment("–".to_owned());
        assert_eq!(rule.parse("1–20").ok(), Some(20));
        assert_eq!(rule.parse("137").ok(), Some(137));
    }

    #[test]
    fn whole_rule_rejects_trailing_labels() {
        assert_eq!(ParseRule::Whole.parse(" 1.024 ").ok(), Some(1024));
        assert!(ParseRule::Whole.parse("1024 reads").is_err());
    }
}
