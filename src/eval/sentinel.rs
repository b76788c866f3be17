//! Softcode-visible error values.
//!
//! Failures inside evaluation are ordinary results carrying a sentinel
//! string of the stable `#-1 REASON` / `#-2 AMBIGUOUS` taxonomy. Scripts
//! pattern-match these strings, so the spellings here are a compatibility
//! contract. The message table is built once at startup and never mutated.

use lazy_static::lazy_static;
use std::collections::HashMap;

use crate::markup::Markup;

/// Table key: one entry per failure kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SentinelKind {
    TooFewArgs,
    TooManyArgs,
    ExpectsEven,
    ExpectsOdd,
    NotANumber,
    DivideByZero,
    PermissionDenied,
    NoSuchFunction,
    NoSuchAttribute,
    NoMatch,
    Ambiguous,
    CallLimit,
    FunctionRecursionLimit,
    RecursionLimit,
    Internal,
}

lazy_static! {
    static ref MESSAGES: HashMap<SentinelKind, &'static str> = {
        let mut table = HashMap::new();
        table.insert(
            SentinelKind::TooFewArgs,
            "#-1 FUNCTION ({name}) EXPECTS AT LEAST {n} ARGUMENTS",
        );
        table.insert(
            SentinelKind::TooManyArgs,
            "#-1 FUNCTION ({name}) EXPECTS AT MOST {n} ARGUMENTS",
        );
        table.insert(
            SentinelKind::ExpectsEven,
            "#-1 FUNCTION ({name}) EXPECTS AN EVEN NUMBER OF ARGUMENTS",
        );
        table.insert(
            SentinelKind::ExpectsOdd,
            "#-1 FUNCTION ({name}) EXPECTS AN ODD NUMBER OF ARGUMENTS",
        );
        table.insert(SentinelKind::NotANumber, "#-1 ARGUMENT MUST BE A NUMBER");
        table.insert(SentinelKind::DivideByZero, "#-1 DIVIDE BY ZERO");
        table.insert(SentinelKind::PermissionDenied, "#-1 PERMISSION DENIED");
        table.insert(SentinelKind::NoSuchFunction, "#-1 FUNCTION ({name}) NOT FOUND");
        table.insert(SentinelKind::NoSuchAttribute, "#-1 NO SUCH ATTRIBUTE");
        table.insert(SentinelKind::NoMatch, "#-1 NO MATCH");
        table.insert(SentinelKind::Ambiguous, "#-2 AMBIGUOUS MATCH");
        table.insert(SentinelKind::CallLimit, "#-1 CALL LIMIT EXCEEDED");
        table.insert(
            SentinelKind::FunctionRecursionLimit,
            "#-1 FUNCTION RECURSION LIMIT EXCEEDED",
        );
        table.insert(SentinelKind::RecursionLimit, "#-1 RECURSION LIMIT EXCEEDED");
        table.insert(SentinelKind::Internal, "#-1 INTERNAL ERROR");
        table
    };
}

/// One concrete sentinel, carrying the detail its template needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sentinel {
    TooFewArgs { function: String, min: usize },
    TooManyArgs { function: String, max: usize },
    ExpectsEven { function: String },
    ExpectsOdd { function: String },
    NotANumber,
    DivideByZero,
    PermissionDenied,
    NoSuchFunction { function: String },
    NoSuchAttribute,
    NoMatch,
    Ambiguous,
    CallLimit,
    FunctionRecursionLimit,
    RecursionLimit,
    Internal,
}

impl Sentinel {
    pub fn kind(&self) -> SentinelKind {
        match self {
            Sentinel::TooFewArgs { .. } => SentinelKind::TooFewArgs,
            Sentinel::TooManyArgs { .. } => SentinelKind::TooManyArgs,
            Sentinel::ExpectsEven { .. } => SentinelKind::ExpectsEven,
            Sentinel::ExpectsOdd { .. } => SentinelKind::ExpectsOdd,
            Sentinel::NotANumber => SentinelKind::NotANumber,
            Sentinel::DivideByZero => SentinelKind::DivideByZero,
            Sentinel::PermissionDenied => SentinelKind::PermissionDenied,
            Sentinel::NoSuchFunction { .. } => SentinelKind::NoSuchFunction,
            Sentinel::NoSuchAttribute => SentinelKind::NoSuchAttribute,
            Sentinel::NoMatch => SentinelKind::NoMatch,
            Sentinel::Ambiguous => SentinelKind::Ambiguous,
            Sentinel::CallLimit => SentinelKind::CallLimit,
            Sentinel::FunctionRecursionLimit => SentinelKind::FunctionRecursionLimit,
            Sentinel::RecursionLimit => SentinelKind::RecursionLimit,
            Sentinel::Internal => SentinelKind::Internal,
        }
    }

    /// The user-visible error string.
    pub fn text(&self) -> String {
        let template = MESSAGES[&self.kind()];
        match self {
            Sentinel::TooFewArgs { function, min } => template
                .replace("{name}", &function.to_ascii_uppercase())
                .replace("{n}", &min.to_string()),
            Sentinel::TooManyArgs { function, max } => template
                .replace("{name}", &function.to_ascii_uppercase())
                .replace("{n}", &max.to_string()),
            Sentinel::ExpectsEven { function } | Sentinel::ExpectsOdd { function } => {
                template.replace("{name}", &function.to_ascii_uppercase())
            }
            Sentinel::NoSuchFunction { function } => {
                template.replace("{name}", &function.to_ascii_uppercase())
            }
            _ => template.to_string(),
        }
    }

    pub fn markup(&self) -> Markup {
        Markup::plain(self.text())
    }
}

/// Whether a piece of output is a sentinel error value. Callers check this
/// instead of relying on an exception channel.
pub fn is_error_text(text: &str) -> bool {
    text.starts_with("#-1 ") || text.starts_with("#-2 ") || text == "#-1" || text == "#-2"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arity_messages_name_the_function() {
        let sentinel = Sentinel::TooFewArgs {
            function: "add".to_string(),
            min: 2,
        };
        assert_eq!(sentinel.text(), "#-1 FUNCTION (ADD) EXPECTS AT LEAST 2 ARGUMENTS");
        let sentinel = Sentinel::TooManyArgs {
            function: "not".to_string(),
            max: 1,
        };
        assert_eq!(sentinel.text(), "#-1 FUNCTION (NOT) EXPECTS AT MOST 1 ARGUMENTS");
    }

    #[test]
    fn test_fixed_messages() {
        assert_eq!(Sentinel::DivideByZero.text(), "#-1 DIVIDE BY ZERO");
        assert_eq!(Sentinel::Ambiguous.text(), "#-2 AMBIGUOUS MATCH");
        assert_eq!(
            Sentinel::FunctionRecursionLimit.text(),
            "#-1 FUNCTION RECURSION LIMIT EXCEEDED"
        );
    }

    #[test]
    fn test_is_error_text() {
        assert!(is_error_text("#-1 NO MATCH"));
        assert!(is_error_text("#-2 AMBIGUOUS MATCH"));
        assert!(!is_error_text("#5"));
        assert!(!is_error_text("42"));
    }
}
