//! Command dispatch.
//!
//! A command line arrives pre-tokenized as a leading word, optional
//! `/switch` segments and the unsplit remainder. The matched definition's
//! traits decide how the remainder splits: on `=` (left/right halves,
//! each independently evaluable), on top-level commas (an ordered argument
//! list), or not at all. Hook attachments stored on external objects can
//! suppress, replace or wrap the dispatched behaviour, and the
//! unknown-command fallback is itself hookable.

use futures::future::BoxFuture;
use dashmap::DashMap;
use lazy_static::lazy_static;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::debug;

use super::builtins::truthy;
use super::context::EvalContext;
use super::evaluator::{EvalResult, SoftcodeBridge, TreeEvaluator};
use super::function::{restrictions_allow, Restriction};
use super::result::EvalValue;
use super::sentinel::Sentinel;
use crate::ast::Node;
use crate::dbref::ObjRef;
use crate::lock;
use crate::markup::Markup;
use crate::world::{Located, ObjectRecord};

/// How the remainder of the line splits into arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ArgSplit {
    /// The whole remainder is one argument.
    #[default]
    Single,
    /// Top-level commas produce an ordered argument list.
    Comma,
    /// A top-level `=` produces left and right halves.
    Equals,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommandTraits {
    pub split: ArgSplit,
    /// With [`ArgSplit::Equals`], keep the right side unevaluated.
    pub rhs_no_parse: bool,
}

/// A hook's target: softcode stored in an attribute on some object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookRef {
    pub object: ObjRef,
    pub attribute: String,
}

/// Hook attachments for one command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandHooks {
    /// Truthy result suppresses the command entirely.
    pub ignore: Option<HookRef>,
    /// Replaces the built-in behaviour.
    pub r#override: Option<HookRef>,
    /// Runs before dispatch, result discarded.
    pub before: Option<HookRef>,
    /// Runs after dispatch, result discarded.
    pub after: Option<HookRef>,
    /// Runs when the built-in handler declines the input.
    pub extend: Option<HookRef>,
}

/// Split arguments as handed to a command implementation.
#[derive(Debug, Clone)]
pub enum CommandArgs {
    Single(Markup),
    Comma(Vec<Markup>),
    Equals { left: Markup, right: Markup },
}

#[derive(Debug, Clone)]
pub struct CommandCall {
    pub switches: Vec<String>,
    pub args: CommandArgs,
}

impl CommandCall {
    pub fn has_switch(&self, name: &str) -> bool {
        self.switches.iter().any(|s| s.eq_ignore_ascii_case(name))
    }
}

pub type CommandHandler = for<'a> fn(
    &'a TreeEvaluator,
    Arc<EvalContext>,
    CommandCall,
) -> BoxFuture<'a, EvalResult<Option<EvalValue>>>;

pub struct CommandDefinition {
    pub name: &'static str,
    pub aliases: &'static [&'static str],
    pub traits: CommandTraits,
    pub restrictions: &'static [Restriction],
    pub handler: CommandHandler,
}

lazy_static! {
    /// Flags whose setting is gated by a lock expression evaluated against
    /// the actor. Everything else is freely settable by whoever controls
    /// the target.
    static ref FLAG_LOCKS: HashMap<&'static str, &'static str> = {
        let mut table = HashMap::new();
        table.insert("WIZARD", "flag^WIZARD");
        table.insert("ROYALTY", "flag^WIZARD");
        table
    };
}

/// Immutable name → definition registry with runtime-attachable hooks.
pub struct CommandRegistry {
    commands: HashMap<String, Arc<CommandDefinition>>,
    aliases: HashMap<String, String>,
    hooks: DashMap<String, CommandHooks>,
    unknown_hook: RwLock<Option<HookRef>>,
}

impl CommandRegistry {
    pub fn empty() -> Self {
        Self {
            commands: HashMap::new(),
            aliases: HashMap::new(),
            hooks: DashMap::new(),
            unknown_hook: RwLock::new(None),
        }
    }

    /// The built-in command set.
    pub fn standard() -> Self {
        let mut registry = Self::empty();
        let equals = CommandTraits {
            split: ArgSplit::Equals,
            rhs_no_parse: false,
        };
        registry.register(CommandDefinition {
            name: "think",
            aliases: &[],
            traits: CommandTraits::default(),
            restrictions: &[],
            handler: cmd_think,
        });
        registry.register(CommandDefinition {
            name: "say",
            aliases: &["\""],
            traits: CommandTraits::default(),
            restrictions: &[],
            handler: cmd_say,
        });
        registry.register(CommandDefinition {
            name: "pose",
            aliases: &[":"],
            traits: CommandTraits::default(),
            restrictions: &[],
            handler: cmd_pose,
        });
        registry.register(CommandDefinition {
            name: "@pemit",
            aliases: &[],
            traits: equals,
            restrictions: &[],
            handler: cmd_pemit,
        });
        registry.register(CommandDefinition {
            name: "@set",
            aliases: &[],
            traits: equals,
            restrictions: &[],
            handler: cmd_set,
        });
        registry.register(CommandDefinition {
            name: "@lock",
            aliases: &[],
            traits: CommandTraits {
                split: ArgSplit::Equals,
                rhs_no_parse: true,
            },
            restrictions: &[],
            handler: cmd_lock,
        });
        registry.register(CommandDefinition {
            name: "@unlock",
            aliases: &[],
            traits: CommandTraits::default(),
            restrictions: &[],
            handler: cmd_unlock,
        });
        registry
    }

    pub fn register(&mut self, definition: CommandDefinition) {
        let canonical = definition.name.to_ascii_lowercase();
        for alias in definition.aliases {
            self.aliases
                .insert(alias.to_ascii_lowercase(), canonical.clone());
        }
        self.commands.insert(canonical, Arc::new(definition));
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<CommandDefinition>> {
        let lowered = name.to_ascii_lowercase();
        let canonical = self.aliases.get(&lowered).unwrap_or(&lowered);
        self.commands.get(canonical).cloned()
    }

    /// Attach (or replace) hook wiring for a command.
    pub fn attach_hooks(&self, name: &str, hooks: CommandHooks) {
        self.hooks.insert(name.to_ascii_lowercase(), hooks);
    }

    pub fn set_unknown_hook(&self, hook: Option<HookRef>) {
        *self.unknown_hook.write().expect("unknown hook") = hook;
    }

    /// Dispatch one already-tokenized command.
    pub async fn execute(
        &self,
        evaluator: &TreeEvaluator,
        name: &str,
        switches: &[String],
        arg_nodes: &[Node],
        ctx: Arc<EvalContext>,
    ) -> EvalResult<Option<EvalValue>> {
        let depth = ctx.depth();
        let definition = match self.lookup(name) {
            Some(definition) => definition,
            None => return self.unknown(evaluator, name, arg_nodes, ctx).await,
        };
        debug!(command = definition.name, "dispatch");

        if !restrictions_allow(definition.restrictions, &ctx).await? {
            return Ok(Some(EvalValue::error(Sentinel::PermissionDenied, depth)));
        }

        let hooks = self
            .hooks
            .get(&definition.name.to_ascii_lowercase())
            .map(|h| h.clone())
            .unwrap_or_default();
        let raw_args: String = arg_nodes.iter().map(Node::source).collect();

        if let Some(hook) = &hooks.ignore {
            if let Some(result) = run_hook(evaluator, hook, &raw_args, &ctx).await? {
                if truthy(&result.text()) {
                    return Ok(None);
                }
            }
        }
        if let Some(hook) = &hooks.before {
            run_hook(evaluator, hook, &raw_args, &ctx).await?;
        }

        let call = CommandCall {
            switches: switches.to_vec(),
            args: split_arguments(evaluator, definition.traits, arg_nodes, &ctx).await?,
        };

        let result = if let Some(hook) = &hooks.r#override {
            run_hook(evaluator, hook, &raw_args, &ctx).await?
        } else {
            let result = (definition.handler)(evaluator, ctx.clone(), call).await?;
            match (result, &hooks.extend) {
                (None, Some(hook)) => run_hook(evaluator, hook, &raw_args, &ctx).await?,
                (result, _) => result,
            }
        };

        if let Some(hook) = &hooks.after {
            run_hook(evaluator, hook, &raw_args, &ctx).await?;
        }
        Ok(result)
    }

    async fn unknown(
        &self,
        evaluator: &TreeEvaluator,
        name: &str,
        arg_nodes: &[Node],
        ctx: Arc<EvalContext>,
    ) -> EvalResult<Option<EvalValue>> {
        let hook = self.unknown_hook.read().expect("unknown hook").clone();
        if let Some(hook) = hook {
            let raw: String = arg_nodes.iter().map(Node::source).collect();
            let input = if raw.is_empty() {
                name.to_string()
            } else {
                format!("{} {}", name, raw)
            };
            if let Some(result) = run_hook(evaluator, &hook, &input, &ctx).await? {
                return Ok(Some(result));
            }
        }
        debug!(command = name, "no such command");
        Ok(Some(EvalValue::message(
            ctx.shared.config.unknown_command.clone(),
            ctx.depth(),
        )))
    }
}

/// Evaluate a hook's attribute with `%0` bound to the raw input.
async fn run_hook(
    evaluator: &TreeEvaluator,
    hook: &HookRef,
    input: &str,
    ctx: &Arc<EvalContext>,
) -> EvalResult<Option<EvalValue>> {
    let body = match ctx
        .shared
        .world
        .attribute(&hook.object, &hook.attribute)
        .await?
    {
        Some(body) => body,
        None => return Ok(None),
    };
    let tree = ctx.shared.parser.parse(&body).await?;
    let child = ctx
        .for_attribute(hook.object)
        .with_positional(vec![Markup::plain(input)]);
    evaluator.eval(&tree, child).await
}

async fn split_arguments(
    evaluator: &TreeEvaluator,
    traits: CommandTraits,
    nodes: &[Node],
    ctx: &Arc<EvalContext>,
) -> EvalResult<CommandArgs> {
    match traits.split {
        ArgSplit::Single => {
            let value = eval_piece(evaluator, nodes.to_vec(), ctx).await?;
            Ok(CommandArgs::Single(value))
        }
        ArgSplit::Comma => {
            let mut pieces = Vec::new();
            for piece in split_on(nodes, ',') {
                pieces.push(eval_piece(evaluator, piece, ctx).await?);
            }
            Ok(CommandArgs::Comma(pieces))
        }
        ArgSplit::Equals => {
            let (left_nodes, right_nodes) = split_once_on(nodes, '=');
            let left = eval_piece(evaluator, left_nodes, ctx).await?;
            let right = if traits.rhs_no_parse {
                let source: String = right_nodes.iter().map(Node::source).collect();
                Markup::plain(source.trim().to_string())
            } else {
                eval_piece(evaluator, right_nodes, ctx).await?
            };
            Ok(CommandArgs::Equals { left, right })
        }
    }
}

async fn eval_piece(
    evaluator: &TreeEvaluator,
    nodes: Vec<Node>,
    ctx: &Arc<EvalContext>,
) -> EvalResult<Markup> {
    let value = evaluator
        .eval(&Node::Sequence(nodes), ctx.clone())
        .await?
        .map(|v| v.markup())
        .unwrap_or_default();
    let text = value.plain_text();
    let trimmed = text.trim();
    if trimmed.len() == text.len() {
        Ok(value)
    } else {
        // Trim outer whitespace without losing interior markup.
        let start = text.len() - text.trim_start().len();
        Ok(value.substring(
            text[..start].chars().count(),
            trimmed.chars().count(),
        ))
    }
}

/// Split at every top-level occurrence of `delimiter`. Delimiters inside
/// functions, brackets or braces live in child nodes and are never seen
/// here.
fn split_on(nodes: &[Node], delimiter: char) -> Vec<Vec<Node>> {
    let mut pieces = Vec::new();
    let mut current = Vec::new();
    for node in nodes {
        match node {
            Node::Text(text) if text.contains(delimiter) => {
                let mut parts = text.split(delimiter);
                if let Some(first) = parts.next() {
                    if !first.is_empty() {
                        current.push(Node::Text(first.to_string()));
                    }
                }
                for part in parts {
                    pieces.push(std::mem::take(&mut current));
                    if !part.is_empty() {
                        current.push(Node::Text(part.to_string()));
                    }
                }
            }
            other => current.push(other.clone()),
        }
    }
    pieces.push(current);
    pieces
}

/// Split at the first top-level occurrence of `delimiter`; everything goes
/// left when it never appears.
fn split_once_on(nodes: &[Node], delimiter: char) -> (Vec<Node>, Vec<Node>) {
    let mut left = Vec::new();
    let mut right = Vec::new();
    let mut found = false;
    for node in nodes {
        if found {
            right.push(node.clone());
            continue;
        }
        match node {
            Node::Text(text) if text.contains(delimiter) => {
                let (before, after) = text.split_once(delimiter).expect("checked contains");
                if !before.is_empty() {
                    left.push(Node::Text(before.to_string()));
                }
                if !after.is_empty() {
                    right.push(Node::Text(after.to_string()));
                }
                found = true;
            }
            other => left.push(other.clone()),
        }
    }
    (left, right)
}

/// Whether `actor` may administer `target`: its owner, itself, or a wizard.
fn controls(actor: &ObjectRecord, target: &ObjectRecord) -> bool {
    actor.has_flag("WIZARD")
        || target.owner.matches(&actor.reference)
        || target.reference.matches(&actor.reference)
}

// Built-in command handlers -------------------------------------------------

fn cmd_think<'a>(
    _evaluator: &'a TreeEvaluator,
    ctx: Arc<EvalContext>,
    call: CommandCall,
) -> BoxFuture<'a, EvalResult<Option<EvalValue>>> {
    Box::pin(async move {
        let message = match call.args {
            CommandArgs::Single(message) => message,
            _ => Markup::default(),
        };
        ctx.shared.world.notify(&ctx.executor(), &message).await?;
        Ok(None)
    })
}

fn cmd_say<'a>(
    _evaluator: &'a TreeEvaluator,
    ctx: Arc<EvalContext>,
    call: CommandCall,
) -> BoxFuture<'a, EvalResult<Option<EvalValue>>> {
    Box::pin(async move {
        let message = match call.args {
            CommandArgs::Single(message) => message,
            _ => Markup::default(),
        };
        let world = &ctx.shared.world;
        let speaker = world.object(&ctx.executor()).await?;
        let (name, location) = match &speaker {
            Some(record) => (record.name.clone(), record.location),
            None => ("Someone".to_string(), None),
        };
        world
            .notify(
                &ctx.executor(),
                &Markup::plain(format!("You say, \"{}\"", message.plain_text())),
            )
            .await?;
        if let Some(location) = location {
            let heard = Markup::plain(format!("{} says, \"{}\"", name, message.plain_text()));
            for bystander in world.contents(&location).await? {
                if bystander.reference.matches(&ctx.executor()) {
                    continue;
                }
                world.notify(&bystander.reference, &heard).await?;
            }
        }
        Ok(None)
    })
}

fn cmd_pose<'a>(
    _evaluator: &'a TreeEvaluator,
    ctx: Arc<EvalContext>,
    call: CommandCall,
) -> BoxFuture<'a, EvalResult<Option<EvalValue>>> {
    Box::pin(async move {
        let message = match call.args {
            CommandArgs::Single(message) => message,
            _ => Markup::default(),
        };
        let world = &ctx.shared.world;
        let actor = world.object(&ctx.executor()).await?;
        let (name, location) = match &actor {
            Some(record) => (record.name.clone(), record.location),
            None => ("Someone".to_string(), None),
        };
        let posed = Markup::plain(format!("{} {}", name, message.plain_text()));
        world.notify(&ctx.executor(), &posed).await?;
        if let Some(location) = location {
            for bystander in world.contents(&location).await? {
                if bystander.reference.matches(&ctx.executor()) {
                    continue;
                }
                world.notify(&bystander.reference, &posed).await?;
            }
        }
        Ok(None)
    })
}

fn cmd_pemit<'a>(
    _evaluator: &'a TreeEvaluator,
    ctx: Arc<EvalContext>,
    call: CommandCall,
) -> BoxFuture<'a, EvalResult<Option<EvalValue>>> {
    Box::pin(async move {
        let depth = ctx.depth();
        let (target, message) = match call.args {
            CommandArgs::Equals { left, right } => (left, right),
            _ => return Ok(None),
        };
        match ctx
            .shared
            .world
            .locate(&ctx.executor(), &target.plain_text())
            .await?
        {
            Located::One(record) => {
                ctx.shared.world.notify(&record.reference, &message).await?;
                Ok(None)
            }
            Located::Ambiguous => Ok(Some(EvalValue::error(Sentinel::Ambiguous, depth))),
            Located::NotFound => Ok(Some(EvalValue::error(Sentinel::NoMatch, depth))),
        }
    })
}

/// `@set target=[!]FLAG`, gated by the flag permission table.
fn cmd_set<'a>(
    _evaluator: &'a TreeEvaluator,
    ctx: Arc<EvalContext>,
    call: CommandCall,
) -> BoxFuture<'a, EvalResult<Option<EvalValue>>> {
    Box::pin(async move {
        let depth = ctx.depth();
        let (target, flag_text) = match &call.args {
            CommandArgs::Equals { left, right } => (left.plain_text(), right.plain_text()),
            _ => return Ok(None),
        };
        let world = ctx.shared.world.clone();
        let target = match world.locate(&ctx.executor(), &target).await? {
            Located::One(record) => record,
            Located::Ambiguous => return Ok(Some(EvalValue::error(Sentinel::Ambiguous, depth))),
            Located::NotFound => return Ok(Some(EvalValue::error(Sentinel::NoMatch, depth))),
        };
        let actor = match world.object(&ctx.executor()).await? {
            Some(record) => record,
            None => return Ok(Some(EvalValue::error(Sentinel::PermissionDenied, depth))),
        };
        if !controls(&actor, &target) {
            return Ok(Some(EvalValue::error(Sentinel::PermissionDenied, depth)));
        }

        let flag_text = flag_text.trim().to_string();
        let (flag, clear) = match flag_text.strip_prefix('!') {
            Some(rest) => (rest.trim().to_ascii_uppercase(), true),
            None => (flag_text.to_ascii_uppercase(), false),
        };
        if flag.is_empty() {
            return Ok(Some(EvalValue::error(Sentinel::NoMatch, depth)));
        }

        if let Some(source) = FLAG_LOCKS.get(flag.as_str()) {
            let mut env = lock::LockEnv::new(world.clone())
                .with_softcode(Arc::new(SoftcodeBridge::new(ctx.shared.clone())));
            env.max_indirect_depth = ctx.shared.config.max_lock_depth;
            let allowed = match lock::compile_source(source, Arc::new(env)) {
                Ok(predicate) => predicate(target.reference, ctx.executor()).await,
                Err(_) => false,
            };
            if !allowed {
                return Ok(Some(EvalValue::error(Sentinel::PermissionDenied, depth)));
            }
        }

        world.set_flag(&target.reference, &flag, !clear).await?;
        if !call.has_switch("quiet") {
            let confirmation = if clear {
                format!("{} - {} cleared.", target.name, flag)
            } else {
                format!("{} - {} set.", target.name, flag)
            };
            world
                .notify(&ctx.executor(), &Markup::plain(confirmation))
                .await?;
        }
        Ok(None)
    })
}

/// `@lock[/<kind>] target=key`. The key side arrives unevaluated, is
/// parsed and validated, then stored in normalized form.
fn cmd_lock<'a>(
    _evaluator: &'a TreeEvaluator,
    ctx: Arc<EvalContext>,
    call: CommandCall,
) -> BoxFuture<'a, EvalResult<Option<EvalValue>>> {
    Box::pin(async move {
        let depth = ctx.depth();
        let (target, key) = match &call.args {
            CommandArgs::Equals { left, right } => (left.plain_text(), right.plain_text()),
            _ => return Ok(None),
        };
        let kind = call
            .switches
            .first()
            .map(|s| s.to_ascii_lowercase())
            .unwrap_or_else(|| "basic".to_string());
        let world = ctx.shared.world.clone();
        let target = match world.locate(&ctx.executor(), &target).await? {
            Located::One(record) => record,
            Located::Ambiguous => return Ok(Some(EvalValue::error(Sentinel::Ambiguous, depth))),
            Located::NotFound => return Ok(Some(EvalValue::error(Sentinel::NoMatch, depth))),
        };
        let actor = match world.object(&ctx.executor()).await? {
            Some(record) => record,
            None => return Ok(Some(EvalValue::error(Sentinel::PermissionDenied, depth))),
        };
        if !controls(&actor, &target) {
            return Ok(Some(EvalValue::error(Sentinel::PermissionDenied, depth)));
        }

        let parsed = match lock::parse(&key) {
            Ok(parsed) => parsed,
            Err(_) => {
                world
                    .notify(&ctx.executor(), &Markup::plain("I don't understand that key."))
                    .await?;
                return Ok(None);
            }
        };
        if !lock::validate(&parsed) {
            world
                .notify(&ctx.executor(), &Markup::plain("I don't understand that key."))
                .await?;
            return Ok(None);
        }
        let normalized = lock::normalize(&parsed, &world)
            .await
            .map_err(|e| super::evaluator::EvalError::Internal(e.to_string()))?;
        world
            .set_lock(&target.reference, &kind, Some(&normalized))
            .await?;
        world
            .notify(&ctx.executor(), &Markup::plain("Locked."))
            .await?;
        Ok(None)
    })
}

fn cmd_unlock<'a>(
    _evaluator: &'a TreeEvaluator,
    ctx: Arc<EvalContext>,
    call: CommandCall,
) -> BoxFuture<'a, EvalResult<Option<EvalValue>>> {
    Box::pin(async move {
        let depth = ctx.depth();
        let target = match &call.args {
            CommandArgs::Single(target) => target.plain_text(),
            _ => return Ok(None),
        };
        let kind = call
            .switches
            .first()
            .map(|s| s.to_ascii_lowercase())
            .unwrap_or_else(|| "basic".to_string());
        let world = ctx.shared.world.clone();
        let target = match world.locate(&ctx.executor(), &target).await? {
            Located::One(record) => record,
            Located::Ambiguous => return Ok(Some(EvalValue::error(Sentinel::Ambiguous, depth))),
            Located::NotFound => return Ok(Some(EvalValue::error(Sentinel::NoMatch, depth))),
        };
        let actor = match world.object(&ctx.executor()).await? {
            Some(record) => record,
            None => return Ok(Some(EvalValue::error(Sentinel::PermissionDenied, depth))),
        };
        if !controls(&actor, &target) {
            return Ok(Some(EvalValue::error(Sentinel::PermissionDenied, depth)));
        }
        world.set_lock(&target.reference, &kind, None).await?;
        world
            .notify(&ctx.executor(), &Markup::plain("Unlocked."))
            .await?;
        Ok(None)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_once_on_equals() {
        let nodes = vec![
            Node::text("me=WIZ"),
            Node::function("add", vec![Node::text("1"), Node::text("2")]),
        ];
        let (left, right) = split_once_on(&nodes, '=');
        assert_eq!(left, vec![Node::text("me")]);
        assert_eq!(
            right,
            vec![
                Node::text("WIZ"),
                Node::function("add", vec![Node::text("1"), Node::text("2")]),
            ]
        );
    }

    #[test]
    fn test_split_on_ignores_nested_delimiters() {
        // The comma inside add() lives in a child node, so only the
        // top-level one splits.
        let nodes = vec![
            Node::text("a,"),
            Node::function("add", vec![Node::text("1"), Node::text("2")]),
        ];
        let pieces = split_on(&nodes, ',');
        assert_eq!(pieces.len(), 2);
        assert_eq!(pieces[0], vec![Node::text("a")]);
        assert!(matches!(pieces[1][0], Node::Function { .. }));
    }

    #[test]
    fn test_split_on_empty_pieces() {
        let nodes = vec![Node::text("a,,b")];
        let pieces = split_on(&nodes, ',');
        assert_eq!(pieces.len(), 3);
        assert!(pieces[1].is_empty());
    }

    #[test]
    fn test_registry_alias_lookup() {
        let registry = CommandRegistry::standard();
        assert_eq!(registry.lookup("SAY").unwrap().name, "say");
        assert_eq!(registry.lookup("\"").unwrap().name, "say");
        assert!(registry.lookup("@teleport").is_none());
    }
}
