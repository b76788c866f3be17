//! Wildcard ("glob") matching.
//!
//! Softcode patterns use `*` (any run) and `?` (any one character), matched
//! case-insensitively. Shared by `switch()`, name locks, attribute-value
//! locks and ip/hostname locks.

use regex::RegexBuilder;

/// Case-insensitive glob match of `text` against `pattern`. A pattern that
/// fails to compile matches nothing.
pub fn wild_match(pattern: &str, text: &str) -> bool {
    let mut regex = String::with_capacity(pattern.len() + 8);
    regex.push('^');
    for ch in pattern.chars() {
        match ch {
            '*' => regex.push_str(".*"),
            '?' => regex.push('.'),
            other => regex.push_str(&regex::escape(&other.to_string())),
        }
    }
    regex.push('$');
    match RegexBuilder::new(&regex)
        .case_insensitive(true)
        .dot_matches_new_line(true)
        .build()
    {
        Ok(re) => re.is_match(text),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_match_is_case_insensitive() {
        assert!(wild_match("Wizard", "wizard"));
        assert!(!wild_match("Wizard", "wizardry"));
    }

    #[test]
    fn test_star_and_question() {
        assert!(wild_match("w*d", "wizard"));
        assert!(wild_match("b?t", "bat"));
        assert!(!wild_match("b?t", "boat"));
        assert!(wild_match("*", ""));
    }

    #[test]
    fn test_regex_metachars_are_literal() {
        assert!(wild_match("a.c", "a.c"));
        assert!(!wild_match("a.c", "abc"));
        assert!(wild_match("10.0.*", "10.0.3.7"));
    }
}
