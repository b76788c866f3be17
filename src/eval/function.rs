//! Function dispatch.
//!
//! A single immutable registry maps case-insensitive names (and aliases) to
//! [`FunctionDefinition`]s. The dispatcher owns everything that happens
//! before an implementation runs: arity and parity checks, permission
//! restrictions, and the function-nesting budget. All of those failures are
//! returned as sentinel *values*, propagated like any other result; side
//! effects belong to the individual implementations.

use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::Arc;
use strum_macros::{Display, EnumString};
use tracing::debug;

use super::builtins;
use super::context::EvalContext;
use super::evaluator::{EvalResult, TreeEvaluator};
use super::result::EvalValue;
use super::sentinel::Sentinel;
use crate::ast::Node;

/// Implementation entry point. Arguments arrive as raw nodes; the
/// implementation decides evaluation order and strictness.
pub type FunctionHandler = for<'a> fn(
    &'a TreeEvaluator,
    Arc<EvalContext>,
    &'a [Node],
) -> BoxFuture<'a, EvalResult<EvalValue>>;

/// Evaluation-behaviour flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FunctionTraits {
    /// Arguments are handed over unevaluated.
    pub no_parse: bool,
    /// Splits its input on `=` rather than commas.
    pub eq_split: bool,
    /// With `eq_split`, the right-hand side stays unevaluated.
    pub rhs_no_parse: bool,
    /// Requires an even number of arguments.
    pub args_even: bool,
    /// Requires an odd number of arguments.
    pub args_odd: bool,
}

/// Caller requirements checked before dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, Display)]
#[strum(serialize_all = "lowercase")]
pub enum Restriction {
    /// Wizard flag required.
    Wizard,
    /// Wizard or Royalty flag required.
    Admin,
    /// Refused to guests.
    NoGuest,
}

pub struct FunctionDefinition {
    pub name: &'static str,
    pub aliases: &'static [&'static str],
    pub min_args: usize,
    /// `None` means unbounded; only the minimum is enforced.
    pub max_args: Option<usize>,
    pub traits: FunctionTraits,
    pub restrictions: &'static [Restriction],
    pub handler: FunctionHandler,
}

/// Immutable name → definition registry, built once at process start.
pub struct FunctionRegistry {
    functions: HashMap<String, Arc<FunctionDefinition>>,
    aliases: HashMap<String, String>,
}

impl FunctionRegistry {
    pub fn empty() -> Self {
        Self {
            functions: HashMap::new(),
            aliases: HashMap::new(),
        }
    }

    /// The standard softcode function library.
    pub fn standard() -> Self {
        let mut registry = Self::empty();
        builtins::install(&mut registry);
        registry
    }

    pub fn register(&mut self, definition: FunctionDefinition) {
        let canonical = definition.name.to_ascii_lowercase();
        for alias in definition.aliases {
            self.aliases
                .insert(alias.to_ascii_lowercase(), canonical.clone());
        }
        self.functions.insert(canonical, Arc::new(definition));
    }

    /// Case-insensitive lookup; aliases resolve to their canonical name
    /// first.
    pub fn lookup(&self, name: &str) -> Option<Arc<FunctionDefinition>> {
        let lowered = name.to_ascii_lowercase();
        let canonical = self.aliases.get(&lowered).unwrap_or(&lowered);
        self.functions.get(canonical).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.functions.keys().map(|k| k.as_str())
    }

    /// Dispatch one call. Every pre-flight failure is a sentinel value.
    pub async fn call(
        &self,
        evaluator: &TreeEvaluator,
        name: &str,
        ctx: Arc<EvalContext>,
        args: &[Node],
    ) -> EvalResult<EvalValue> {
        let depth = ctx.depth();
        let definition = match self.lookup(name) {
            Some(definition) => definition,
            None => {
                return Ok(EvalValue::error(
                    Sentinel::NoSuchFunction {
                        function: name.to_string(),
                    },
                    depth,
                ))
            }
        };

        if args.len() < definition.min_args {
            return Ok(EvalValue::error(
                Sentinel::TooFewArgs {
                    function: definition.name.to_string(),
                    min: definition.min_args,
                },
                depth,
            ));
        }
        if let Some(max) = definition.max_args {
            if args.len() > max {
                return Ok(EvalValue::error(
                    Sentinel::TooManyArgs {
                        function: definition.name.to_string(),
                        max,
                    },
                    depth,
                ));
            }
        }
        if definition.traits.args_even && args.len() % 2 != 0 {
            return Ok(EvalValue::error(
                Sentinel::ExpectsEven {
                    function: definition.name.to_string(),
                },
                depth,
            ));
        }
        if definition.traits.args_odd && args.len() % 2 != 1 {
            return Ok(EvalValue::error(
                Sentinel::ExpectsOdd {
                    function: definition.name.to_string(),
                },
                depth,
            ));
        }

        if !restrictions_allow(definition.restrictions, &ctx).await? {
            return Ok(EvalValue::error(Sentinel::PermissionDenied, depth));
        }

        let _nesting = match ctx.enter_function() {
            Ok(guard) => guard,
            Err(sentinel) => return Ok(EvalValue::error(sentinel, depth)),
        };
        debug!(function = definition.name, args = args.len(), "dispatch");
        (definition.handler)(evaluator, ctx, args).await
    }

}

/// Whether the executor satisfies every restriction tag. Shared with the
/// command dispatcher.
pub(crate) async fn restrictions_allow(
    restrictions: &[Restriction],
    ctx: &Arc<EvalContext>,
) -> EvalResult<bool> {
    if restrictions.is_empty() {
        return Ok(true);
    }
    let record = match ctx.shared.world.object(&ctx.executor()).await? {
        Some(record) => record,
        None => return Ok(false),
    };
    for restriction in restrictions {
        let allowed = match restriction {
            Restriction::Wizard => record.has_flag("WIZARD"),
            Restriction::Admin => record.has_flag("WIZARD") || record.has_flag("ROYALTY"),
            Restriction::NoGuest => !record.has_flag("GUEST"),
        };
        if !allowed {
            return Ok(false);
        }
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_is_case_insensitive_with_aliases() {
        let registry = FunctionRegistry::standard();
        let add = registry.lookup("ADD").unwrap();
        assert_eq!(add.name, "add");
        assert!(registry.lookup("Strcat").is_some());
        assert_eq!(registry.lookup("ufun").unwrap().name, "u");
        let ulocal = registry.lookup("u");
        assert!(ulocal.is_some());
        assert!(registry.lookup("no_such_fn").is_none());
    }

    #[test]
    fn test_standard_registry_is_populated() {
        let registry = FunctionRegistry::standard();
        for name in [
            "add", "sub", "mul", "div", "mod", "eq", "gt", "strlen", "mid", "if", "switch",
            "iter", "setq", "r", "get", "u", "elock", "pemit",
        ] {
            assert!(registry.lookup(name).is_some(), "missing {}", name);
        }
    }
}
