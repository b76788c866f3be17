//! Formatted-text boundary type.
//!
//! Every evaluation result is expressed as a [`Markup`]: an immutable string
//! carrying optional display markup per span. The engine itself only relies
//! on four operations (`concat`, `substring`, `len`, `plain`); rendering the
//! markup to a wire format (ANSI, HTML) is the transport layer's concern.
//! Markup must survive `substring`/`concat` without corruption.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One run of text sharing the same markup tags.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Span {
    pub text: String,
    pub tags: Vec<String>,
}

/// Immutable text-with-markup.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Markup {
    spans: Vec<Span>,
}

impl Markup {
    /// Plain, untagged text.
    pub fn plain(text: impl Into<String>) -> Self {
        let text = text.into();
        if text.is_empty() {
            return Self::default();
        }
        Self {
            spans: vec![Span { text, tags: vec![] }],
        }
    }

    /// Text carrying a single markup tag (e.g. `hilite`, `red`).
    pub fn tagged(text: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            spans: vec![Span {
                text: text.into(),
                tags: vec![tag.into()],
            }],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.spans.iter().all(|s| s.text.is_empty())
    }

    /// Length in characters of the plain-text projection.
    pub fn len(&self) -> usize {
        self.spans.iter().map(|s| s.text.chars().count()).sum()
    }

    /// The plain-text projection, markup stripped.
    pub fn plain_text(&self) -> String {
        self.spans.iter().map(|s| s.text.as_str()).collect()
    }

    /// Concatenation. Adjacent spans with identical tags are merged so that
    /// repeated aggregation does not grow the span list unboundedly.
    pub fn concat(&self, other: &Markup) -> Markup {
        let mut spans = self.spans.clone();
        for span in &other.spans {
            if span.text.is_empty() {
                continue;
            }
            match spans.last_mut() {
                Some(last) if last.tags == span.tags => last.text.push_str(&span.text),
                _ => spans.push(span.clone()),
            }
        }
        Markup { spans }
    }

    /// Character-based substring; spans are split at the boundaries and keep
    /// their tags. Out-of-range requests are clamped, not errors.
    pub fn substring(&self, start: usize, len: usize) -> Markup {
        let mut spans = Vec::new();
        let mut skip = start;
        let mut take = len;
        for span in &self.spans {
            if take == 0 {
                break;
            }
            let count = span.text.chars().count();
            if skip >= count {
                skip -= count;
                continue;
            }
            let piece: String = span.text.chars().skip(skip).take(take).collect();
            skip = 0;
            take -= piece.chars().count();
            if !piece.is_empty() {
                spans.push(Span {
                    text: piece,
                    tags: span.tags.clone(),
                });
            }
        }
        Markup { spans }
    }

    pub fn spans(&self) -> &[Span] {
        &self.spans
    }
}

impl fmt::Display for Markup {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.plain_text())
    }
}

impl From<&str> for Markup {
    fn from(value: &str) -> Self {
        Markup::plain(value)
    }
}

impl From<String> for Markup {
    fn from(value: String) -> Self {
        Markup::plain(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_concat_merges_same_tags() {
        let a = Markup::plain("foo");
        let b = Markup::plain("bar");
        let joined = a.concat(&b);
        assert_eq!(joined.plain_text(), "foobar");
        assert_eq!(joined.spans().len(), 1);
    }

    #[test]
    fn test_markup_survives_concat() {
        let a = Markup::tagged("red", "red");
        let b = Markup::plain(" plain");
        let joined = a.concat(&b);
        assert_eq!(joined.plain_text(), "red plain");
        assert_eq!(joined.spans()[0].tags, vec!["red".to_string()]);
        assert!(joined.spans()[1].tags.is_empty());
    }

    #[test]
    fn test_markup_survives_substring() {
        let value = Markup::tagged("bright", "hilite").concat(&Markup::plain("dark"));
        // Cut across the span boundary: "ghtda"
        let cut = value.substring(3, 5);
        assert_eq!(cut.plain_text(), "ghtda");
        assert_eq!(cut.spans()[0].tags, vec!["hilite".to_string()]);
        assert!(cut.spans()[1].tags.is_empty());
    }

    #[test]
    fn test_substring_clamps() {
        let value = Markup::plain("abc");
        assert_eq!(value.substring(1, 100).plain_text(), "bc");
        assert_eq!(value.substring(10, 5).plain_text(), "");
    }

    #[test]
    fn test_len_counts_chars() {
        let value = Markup::plain("日本語").concat(&Markup::plain("!"));
        assert_eq!(value.len(), 4);
    }
}
