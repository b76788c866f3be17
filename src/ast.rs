//! Parse-tree contract.
//!
//! The surface grammar lives outside this crate: a generated parser turns a
//! raw softcode line into this closed set of node kinds, and the evaluator
//! walks it. Node kinds and their token boundaries are fixed; the engine
//! must not invent or reinterpret them. Evaluation strictness is *not*
//! encoded here; a function's argument nodes arrive unevaluated and the
//! dispatcher decides when (or whether) each one is reduced.

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;

/// One parse-tree node.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// Plain text run.
    Text(String),
    /// Ordered children folded left-to-right.
    Sequence(Vec<Node>),
    /// `name(arg, arg, ...)`; arguments arrive unevaluated.
    Function { name: String, args: Vec<Node> },
    /// `%token`; the token text without the leading `%`.
    Substitution(String),
    /// `{ ... }` literal grouping.
    Braces(Vec<Node>),
    /// `[ ... ]` explicit evaluation marker.
    Brackets(Vec<Node>),
    /// `\x`; the text after the escape marker.
    Escaped(String),
    /// One command: leading word, `/switch` segments, and the unsplit rest
    /// of the line. Argument splitting depends on the matched command and
    /// happens at dispatch time.
    Command {
        name: String,
        switches: Vec<String>,
        args: Vec<Node>,
    },
    /// `;`-separated commands.
    CommandList(Vec<Node>),
}

impl Node {
    pub fn text(value: impl Into<String>) -> Node {
        Node::Text(value.into())
    }

    pub fn function(name: impl Into<String>, args: Vec<Node>) -> Node {
        Node::Function {
            name: name.into(),
            args,
        }
    }

    pub fn substitution(token: impl Into<String>) -> Node {
        Node::Substitution(token.into())
    }

    pub fn command(name: impl Into<String>, switches: Vec<&str>, args: Vec<Node>) -> Node {
        Node::Command {
            name: name.into(),
            switches: switches.into_iter().map(|s| s.to_string()).collect(),
            args,
        }
    }

    /// Reconstruct the literal source span this node covers. Used whenever a
    /// parse mode calls for reproducing input unevaluated.
    pub fn source(&self) -> String {
        match self {
            Node::Text(text) => text.clone(),
            Node::Sequence(children) => children.iter().map(Node::source).collect(),
            Node::Function { name, args } => {
                let args: Vec<String> = args.iter().map(Node::source).collect();
                format!("{}({})", name, args.join(","))
            }
            Node::Substitution(token) => format!("%{}", token),
            Node::Braces(children) => {
                let inner: String = children.iter().map(Node::source).collect();
                format!("{{{}}}", inner)
            }
            Node::Brackets(children) => {
                let inner: String = children.iter().map(Node::source).collect();
                format!("[{}]", inner)
            }
            Node::Escaped(text) => format!("\\{}", text),
            Node::Command {
                name,
                switches,
                args,
            } => {
                let mut line = name.clone();
                for switch in switches {
                    line.push('/');
                    line.push_str(switch);
                }
                let rest: String = args.iter().map(Node::source).collect();
                if !rest.is_empty() {
                    line.push(' ');
                    line.push_str(&rest);
                }
                line
            }
            Node::CommandList(children) => {
                let parts: Vec<String> = children.iter().map(Node::source).collect();
                parts.join(";")
            }
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("parser rejected input: {0}")]
pub struct ParseRejected(pub String);

/// Seam to the external softcode parser. Needed at runtime to re-parse
/// attribute text (`u()`, hooks, lazily re-parsed results).
#[async_trait]
pub trait SoftcodeParser: Send + Sync {
    async fn parse(&self, source: &str) -> Result<Node, ParseRejected>;
}

/// Parser stand-in that treats every input as literal text. Embedders
/// supply the real grammar; this keeps the engine usable without one.
#[derive(Debug, Default)]
pub struct LiteralParser;

#[async_trait]
impl SoftcodeParser for LiteralParser {
    async fn parse(&self, source: &str) -> Result<Node, ParseRejected> {
        Ok(Node::Text(source.to_string()))
    }
}

/// Table-backed parser: maps exact source strings to pre-built trees and
/// falls back to literal text. Used by the test suite in place of the
/// external grammar.
#[derive(Debug, Default)]
pub struct StaticParser {
    entries: DashMap<String, Node>,
}

impl StaticParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, source: impl Into<String>, node: Node) {
        self.entries.insert(source.into(), node);
    }
}

#[async_trait]
impl SoftcodeParser for StaticParser {
    async fn parse(&self, source: &str) -> Result<Node, ParseRejected> {
        Ok(self
            .entries
            .get(source)
            .map(|n| n.clone())
            .unwrap_or_else(|| Node::Text(source.to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_source_roundtrips_function() {
        let node = Node::function(
            "add",
            vec![Node::text("1"), Node::function("sub", vec![Node::text("3"), Node::text("2")])],
        );
        assert_eq!(node.source(), "add(1,sub(3,2))");
    }

    #[test]
    fn test_source_preserves_groupings() {
        let node = Node::Sequence(vec![
            Node::Braces(vec![Node::text("a")]),
            Node::Brackets(vec![Node::function("add", vec![Node::text("1"), Node::text("2")])]),
            Node::Escaped("%".to_string()),
            Node::substitution("0"),
        ]);
        assert_eq!(node.source(), "{a}[add(1,2)]\\%%0");
    }

    #[test]
    fn test_source_rebuilds_command_line() {
        let node = Node::command("@set", vec!["quiet"], vec![Node::text("me=WIZARD")]);
        assert_eq!(node.source(), "@set/quiet me=WIZARD");
    }

    #[tokio::test]
    async fn test_static_parser_table_and_fallback() {
        let parser = StaticParser::new();
        parser.insert("add(1,2)", Node::function("add", vec![Node::text("1"), Node::text("2")]));
        let hit = parser.parse("add(1,2)").await.unwrap();
        assert!(matches!(hit, Node::Function { .. }));
        let miss = parser.parse("anything else").await.unwrap();
        assert_eq!(miss, Node::Text("anything else".to_string()));
    }
}
