//! The tree-walking evaluator.
//!
//! One visitor over the closed [`Node`] set. Each visit charges the call
//! budget and the recursion depth, consults the ambient parse mode, and
//! dispatches to the substitution resolver, function dispatcher or command
//! evaluator as the node kind demands. The default aggregation is a
//! left-to-right fold over child results.
//!
//! Failures split along two channels. Anything a script can cause (bad
//! arity, unknown names, exhausted budgets) comes back as a sentinel
//! *value* inside an [`EvalValue`]. Only exceptional conditions (a dead
//! world service, rejected re-parse input, cancellation) travel as
//! [`EvalError`], and all but cancellation are converted back into a
//! sentinel at the per-command boundary so one broken command cannot take
//! down its neighbours.

use async_recursion::async_recursion;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use super::context::{EvalContext, ParseMode, SharedEval};
use super::result::EvalValue;
use super::sentinel::Sentinel;
use super::substitution::SubstitutionResolver;
use crate::ast::{Node, ParseRejected};
use crate::dbref::ObjRef;
use crate::lock;
use crate::markup::Markup;
use crate::world::WorldError;

#[derive(Debug, Error)]
pub enum EvalError {
    #[error("evaluation cancelled")]
    Cancelled,
    #[error("world error: {0}")]
    World(#[from] WorldError),
    #[error("parser rejected input: {0}")]
    Parse(#[from] ParseRejected),
    #[error("internal evaluation failure: {0}")]
    Internal(String),
}

pub type EvalResult<T> = Result<T, EvalError>;

/// The visitor. Stateless; everything ambient lives in the context.
#[derive(Default)]
pub struct TreeEvaluator {
    substitutions: SubstitutionResolver,
}

impl TreeEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Top-level entry point for one inbound evaluation.
    #[tracing::instrument(level = "debug", skip(self, node, ctx), fields(trace_id = %ctx.trace_id()))]
    pub async fn evaluate(
        &self,
        node: &Node,
        ctx: Arc<EvalContext>,
    ) -> EvalResult<Option<EvalValue>> {
        self.eval(node, ctx).await
    }

    /// Visit one node. `None` means the node emitted nothing.
    #[async_recursion]
    pub async fn eval(&self, node: &Node, ctx: Arc<EvalContext>) -> EvalResult<Option<EvalValue>> {
        ctx.check_cancelled()?;
        if let Err(sentinel) = ctx.charge_call() {
            return Ok(Some(EvalValue::error(sentinel, ctx.depth())));
        }
        let _depth = match ctx.enter_recursion() {
            Ok(guard) => guard,
            Err(sentinel) => return Ok(Some(EvalValue::error(sentinel, ctx.depth()))),
        };

        match node {
            Node::Text(text) => Ok(Some(EvalValue::message(text.clone(), ctx.depth()))),
            Node::Sequence(children) => self.eval_children(children, &ctx).await,
            Node::Function { name, args } => self.eval_function(name, args, ctx.clone()).await,
            Node::Substitution(token) => self.eval_substitution(token, &ctx).await,
            Node::Braces(children) => self.eval_braces(children, &ctx).await,
            Node::Brackets(children) => self.eval_brackets(node, children, &ctx).await,
            // One escape marker is consumed in every mode; the remainder
            // is literal and never evaluated further.
            Node::Escaped(text) => Ok(Some(EvalValue::message(text.clone(), ctx.depth()))),
            Node::Command {
                name,
                switches,
                args,
            } => self.eval_command(node, name, switches, args, ctx.clone()).await,
            Node::CommandList(children) => self.eval_command_list(children, &ctx).await,
        }
    }

    /// Evaluate a node and keep only its message text.
    pub async fn eval_to_markup(&self, node: &Node, ctx: Arc<EvalContext>) -> EvalResult<Markup> {
        Ok(self
            .eval(node, ctx)
            .await?
            .map(|value| value.markup())
            .unwrap_or_default())
    }

    /// Left-to-right fold with [`EvalValue::aggregate`].
    async fn eval_children(
        &self,
        children: &[Node],
        ctx: &Arc<EvalContext>,
    ) -> EvalResult<Option<EvalValue>> {
        let mut folded: Option<EvalValue> = None;
        for child in children {
            let value = self.eval(child, ctx.clone()).await?;
            folded = match (folded, value) {
                (Some(left), Some(right)) => Some(left.aggregate(right)),
                (left, right) => left.or(right),
            };
        }
        Ok(folded)
    }

    async fn eval_function(
        &self,
        name: &str,
        args: &[Node],
        ctx: Arc<EvalContext>,
    ) -> EvalResult<Option<EvalValue>> {
        match ctx.parse_mode() {
            // Literal modes reproduce the call unevaluated.
            ParseMode::NoParse | ParseMode::NoEval => Ok(Some(EvalValue::message(
                Node::Function {
                    name: name.to_string(),
                    args: args.to_vec(),
                }
                .source(),
                ctx.depth(),
            ))),
            ParseMode::Parse => {
                let functions = ctx.shared.functions.clone();
                let value = functions.call(self, name, ctx, args).await?;
                Ok(Some(value))
            }
        }
    }

    async fn eval_substitution(
        &self,
        token: &str,
        ctx: &Arc<EvalContext>,
    ) -> EvalResult<Option<EvalValue>> {
        match ctx.parse_mode() {
            ParseMode::NoParse | ParseMode::NoEval => Ok(Some(EvalValue::message(
                format!("%{}", token),
                ctx.depth(),
            ))),
            ParseMode::Parse => Ok(Some(self.substitutions.resolve(token, ctx).await?)),
        }
    }

    /// Only the outermost brace pair is consumed; nested pairs reproduce
    /// their braces literally around the evaluated children.
    async fn eval_braces(
        &self,
        children: &[Node],
        ctx: &Arc<EvalContext>,
    ) -> EvalResult<Option<EvalValue>> {
        let deeper = ctx.deeper_braces();
        let inner = self.eval_children(children, &deeper).await?;
        if ctx.brace_depth() == 0 {
            Ok(Some(inner.unwrap_or_else(|| EvalValue::empty(ctx.depth()))))
        } else {
            let message = inner.map(|value| value.markup()).unwrap_or_default();
            let wrapped = Markup::plain("{").concat(&message).concat(&Markup::plain("}"));
            Ok(Some(EvalValue::message(wrapped, ctx.depth())))
        }
    }

    /// Brackets force evaluation even under `NoParse`; only the fully
    /// literal mode reproduces them as written. Under `NoParse` the result
    /// is re-wrapped so the output still reads as a bracketed span.
    async fn eval_brackets(
        &self,
        node: &Node,
        children: &[Node],
        ctx: &Arc<EvalContext>,
    ) -> EvalResult<Option<EvalValue>> {
        match ctx.parse_mode() {
            ParseMode::NoEval => Ok(Some(EvalValue::message(node.source(), ctx.depth()))),
            ParseMode::Parse => self.eval_children(children, ctx).await,
            ParseMode::NoParse => {
                let evaluating = ctx.with_mode(ParseMode::Parse);
                let inner = self.eval_children(children, &evaluating).await?;
                let message = inner.map(|value| value.markup()).unwrap_or_default();
                let wrapped = Markup::plain("[").concat(&message).concat(&Markup::plain("]"));
                Ok(Some(EvalValue::message(wrapped, ctx.depth())))
            }
        }
    }

    async fn eval_command(
        &self,
        node: &Node,
        name: &str,
        switches: &[String],
        args: &[Node],
        ctx: Arc<EvalContext>,
    ) -> EvalResult<Option<EvalValue>> {
        match ctx.parse_mode() {
            ParseMode::NoEval => Ok(Some(EvalValue::message(node.source(), ctx.depth()))),
            ParseMode::NoParse => {
                // Literal mode: children reproduce themselves, no dispatch.
                let inner = self.eval_children(args, &ctx).await?;
                let mut line = name.to_string();
                for switch in switches {
                    line.push('/');
                    line.push_str(switch);
                }
                let rest = inner.map(|value| value.markup()).unwrap_or_default();
                let mut message = Markup::plain(line);
                if !rest.is_empty() {
                    message = message.concat(&Markup::plain(" ")).concat(&rest);
                }
                Ok(Some(EvalValue::message(message, ctx.depth())))
            }
            ParseMode::Parse => {
                let commands = ctx.shared.commands.clone();
                let depth = ctx.depth();
                match commands.execute(self, name, switches, args, ctx).await {
                    Ok(result) => Ok(result),
                    Err(EvalError::Cancelled) => Err(EvalError::Cancelled),
                    // Per-command boundary: exceptional failures become
                    // sentinel values instead of tearing down the caller.
                    Err(error) => {
                        warn!(command = name, %error, "command failed");
                        Ok(Some(EvalValue::error(Sentinel::Internal, depth)))
                    }
                }
            }
        }
    }

    async fn eval_command_list(
        &self,
        children: &[Node],
        ctx: &Arc<EvalContext>,
    ) -> EvalResult<Option<EvalValue>> {
        let mut folded: Option<EvalValue> = None;
        for child in children {
            // A cancellation request lands between commands, never inside
            // an external service call.
            ctx.check_cancelled()?;
            let value = self.eval(child, ctx.clone()).await?;
            folded = match (folded, value) {
                (Some(left), Some(right)) => Some(left.aggregate(right)),
                (left, right) => left.or(right),
            };
        }
        debug!(commands = children.len(), "command list complete");
        Ok(folded)
    }
}

/// Adapter giving the lock compiler access to softcode evaluation for
/// `attr/value` leaves.
pub struct SoftcodeBridge {
    shared: Arc<SharedEval>,
}

impl SoftcodeBridge {
    pub fn new(shared: Arc<SharedEval>) -> Self {
        Self { shared }
    }
}

#[async_trait]
impl lock::EvalBridge for SoftcodeBridge {
    async fn eval_attribute(
        &self,
        holder: &ObjRef,
        attribute: &str,
        enactor: &ObjRef,
    ) -> Result<String, WorldError> {
        let body = match self.shared.world.attribute(holder, attribute).await? {
            Some(body) => body,
            None => return Ok(String::new()),
        };
        let tree = self
            .shared
            .parser
            .parse(&body)
            .await
            .map_err(|e| WorldError::Storage(e.to_string()))?;
        let ctx = Arc::new(EvalContext::new(self.shared.clone(), *holder, *enactor));
        let evaluator = TreeEvaluator::new();
        match evaluator.eval(&tree, ctx).await {
            Ok(result) => Ok(result.map(|value| value.text()).unwrap_or_default()),
            Err(error) => Err(WorldError::Storage(error.to_string())),
        }
    }
}
