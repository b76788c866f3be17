//! The value produced by evaluating one parse-tree node.

use indexmap::IndexMap;
use std::sync::Arc;
use tokio::sync::OnceCell;

use super::context::EvalContext;
use super::evaluator::{EvalError, EvalResult, TreeEvaluator};
use super::sentinel::Sentinel;
use crate::markup::Markup;

/// Result of evaluating a node: a message, an ordered argument map, or
/// neither. A node never meaningfully carries both (command-argument nodes
/// populate `arguments`, expression nodes populate `message`) and
/// [`EvalValue::aggregate`] folds siblings accordingly.
#[derive(Debug, Clone, Default)]
pub struct EvalValue {
    pub message: Option<Markup>,
    /// Nesting level the value was produced at; diagnostics only.
    pub depth: u32,
    pub arguments: Option<IndexMap<String, EvalValue>>,
    /// Lazily computed re-parsed form of `message`; evaluated at most once.
    parsed: Arc<OnceCell<Markup>>,
}

impl PartialEq for EvalValue {
    fn eq(&self, other: &Self) -> bool {
        self.message == other.message
            && self.depth == other.depth
            && self.arguments == other.arguments
    }
}

impl EvalValue {
    pub fn message(message: impl Into<Markup>, depth: u32) -> Self {
        Self {
            message: Some(message.into()),
            depth,
            ..Default::default()
        }
    }

    pub fn empty(depth: u32) -> Self {
        Self {
            message: Some(Markup::default()),
            depth,
            ..Default::default()
        }
    }

    pub fn error(sentinel: Sentinel, depth: u32) -> Self {
        Self::message(sentinel.markup(), depth)
    }

    pub fn arguments(arguments: IndexMap<String, EvalValue>, depth: u32) -> Self {
        Self {
            message: None,
            depth,
            arguments: Some(arguments),
            parsed: Arc::default(),
        }
    }

    /// The plain-text projection of the message, empty when there is none.
    pub fn text(&self) -> String {
        self.message
            .as_ref()
            .map(|m| m.plain_text())
            .unwrap_or_default()
    }

    pub fn markup(&self) -> Markup {
        self.message.clone().unwrap_or_default()
    }

    /// Whether the message carries a `#-1`/`#-2` sentinel.
    pub fn is_error(&self) -> bool {
        super::sentinel::is_error_text(&self.text())
    }

    /// Fold two sibling results: concatenate messages when both are
    /// present, merge argument maps when both are present, otherwise keep
    /// whichever side carries anything.
    pub fn aggregate(self, other: EvalValue) -> EvalValue {
        let depth = self.depth.max(other.depth);
        match (self.message, other.message) {
            (Some(left), Some(right)) => EvalValue::message(left.concat(&right), depth),
            (message, other_message) => {
                let arguments = match (self.arguments, other.arguments) {
                    (Some(mut left), Some(right)) => {
                        left.extend(right);
                        Some(left)
                    }
                    (left, right) => left.or(right),
                };
                EvalValue {
                    message: message.or(other_message),
                    depth,
                    arguments,
                    parsed: Arc::default(),
                }
            }
        }
    }

    /// The re-parsed form of the message: parsed through the external
    /// grammar and evaluated in `ctx`. Computed on first use and cached.
    pub async fn parsed_message(
        &self,
        evaluator: &TreeEvaluator,
        ctx: Arc<EvalContext>,
    ) -> EvalResult<Markup> {
        let value = self
            .parsed
            .get_or_try_init(|| async {
                let source = match &self.message {
                    None => return Ok::<_, EvalError>(Markup::default()),
                    Some(message) => message.plain_text(),
                };
                let tree = ctx.shared.parser.parse(&source).await?;
                let result = evaluator.eval(&tree, ctx.clone()).await?;
                Ok(result.map(|v| v.markup()).unwrap_or_default())
            })
            .await?;
        Ok(value.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_aggregate_concats_messages() {
        let left = EvalValue::message("foo", 1);
        let right = EvalValue::message("bar", 2);
        let folded = left.aggregate(right);
        assert_eq!(folded.text(), "foobar");
        assert_eq!(folded.depth, 2);
    }

    #[test]
    fn test_aggregate_merges_argument_maps() {
        let mut left_args = IndexMap::new();
        left_args.insert("0".to_string(), EvalValue::message("a", 1));
        let mut right_args = IndexMap::new();
        right_args.insert("1".to_string(), EvalValue::message("b", 1));
        let folded =
            EvalValue::arguments(left_args, 1).aggregate(EvalValue::arguments(right_args, 1));
        let arguments = folded.arguments.unwrap();
        assert_eq!(arguments.len(), 2);
        assert_eq!(arguments["0"].text(), "a");
        assert_eq!(arguments["1"].text(), "b");
    }

    #[test]
    fn test_aggregate_keeps_the_populated_side() {
        let message = EvalValue::message("keep", 3);
        let nothing = EvalValue::default();
        assert_eq!(nothing.clone().aggregate(message.clone()).text(), "keep");
        assert_eq!(message.aggregate(nothing).text(), "keep");
    }

    #[test]
    fn test_error_detection() {
        let value = EvalValue::error(Sentinel::NoMatch, 0);
        assert!(value.is_error());
        assert!(!EvalValue::message("fine", 0).is_error());
    }
}
