//! `%`-token resolution.
//!
//! Two families: simple single-character symbols resolved straight from the
//! ambient context, and complex symbols carrying an index or name that need
//! a secondary lookup (named registers, iteration/stack text). Unknown or
//! out-of-range symbols resolve to empty text, matching the permissive behaviour
//! existing scripts rely on.

use std::sync::Arc;
use tracing::debug;

use super::context::EvalContext;
use super::evaluator::EvalResult;
use super::result::EvalValue;
use crate::markup::Markup;

pub struct SubstitutionResolver;

impl SubstitutionResolver {
    pub fn new() -> Self {
        Self
    }

    pub async fn resolve(&self, token: &str, ctx: &Arc<EvalContext>) -> EvalResult<EvalValue> {
        let depth = ctx.depth();
        let resolved = self.lookup(token, ctx).await?;
        Ok(EvalValue::message(resolved, depth))
    }

    async fn lookup(&self, token: &str, ctx: &Arc<EvalContext>) -> EvalResult<Markup> {
        // Simple family: one character, direct context lookup.
        if let Some(index) = single_digit(token) {
            return Ok(ctx.positional(index).unwrap_or_default());
        }
        match token {
            "#" => return Ok(Markup::plain(format!("#{}", ctx.enactor().number))),
            "!" => return Ok(Markup::plain(format!("#{}", ctx.executor().number))),
            "@" => return Ok(Markup::plain(format!("#{}", ctx.caller().number))),
            "r" | "R" => return Ok(Markup::plain("\n")),
            "t" | "T" => return Ok(Markup::plain("\t")),
            "b" | "B" => return Ok(Markup::plain(" ")),
            "%" => return Ok(Markup::plain("%")),
            "n" | "N" => {
                let world = &ctx.shared.world;
                return Ok(match world.object(&ctx.enactor()).await {
                    Ok(Some(record)) => Markup::plain(record.name),
                    _ => Markup::default(),
                });
            }
            "l" | "L" => {
                let world = &ctx.shared.world;
                return Ok(match world.object(&ctx.executor()).await {
                    Ok(Some(record)) => record
                        .location
                        .map(|l| Markup::plain(format!("#{}", l.number)))
                        .unwrap_or_default(),
                    _ => Markup::default(),
                });
            }
            _ => {}
        }

        // Complex family: leading letter selects the table, the rest is the
        // parsed index or name.
        if let Some(name) = token.strip_prefix('q').or_else(|| token.strip_prefix('Q')) {
            if !name.is_empty() {
                return Ok(ctx.register(name).unwrap_or_default());
            }
        }
        if let Some(rest) = token.strip_prefix('i').or_else(|| token.strip_prefix('I')) {
            if let Ok(level) = rest.parse::<usize>() {
                return Ok(ctx.iteration(level).unwrap_or_default());
            }
        }
        if let Some(rest) = token.strip_prefix('s').or_else(|| token.strip_prefix('S')) {
            if let Ok(level) = rest.parse::<usize>() {
                return Ok(ctx.stack(level).unwrap_or_default());
            }
        }

        debug!(token, "unknown substitution symbol");
        Ok(Markup::default())
    }
}

impl Default for SubstitutionResolver {
    fn default() -> Self {
        Self::new()
    }
}

fn single_digit(token: &str) -> Option<usize> {
    let mut chars = token.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) if c.is_ascii_digit() => Some(c as usize - '0' as usize),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::LiteralParser;
    use crate::dbref::ObjRef;
    use crate::eval::context::SharedEval;
    use crate::world::{InMemoryWorld, ObjectKind};

    async fn setup() -> (Arc<InMemoryWorld>, Arc<EvalContext>) {
        let world = Arc::new(InMemoryWorld::new());
        let shared = Arc::new(SharedEval::new(world.clone(), Arc::new(LiteralParser)));
        let executor = world.create("Widget", ObjectKind::Thing, None).reference;
        let enactor = world.create("Rhea", ObjectKind::Player, None).reference;
        let ctx = Arc::new(EvalContext::new(shared, executor, enactor));
        (world, ctx)
    }

    #[tokio::test]
    async fn test_positional_arguments() {
        let (_, ctx) = setup().await;
        let ctx = ctx.with_positional(vec![Markup::plain("alpha"), Markup::plain("beta")]);
        let resolver = SubstitutionResolver::new();
        assert_eq!(resolver.resolve("0", &ctx).await.unwrap().text(), "alpha");
        assert_eq!(resolver.resolve("1", &ctx).await.unwrap().text(), "beta");
        // Out of range resolves empty, not an error.
        assert_eq!(resolver.resolve("7", &ctx).await.unwrap().text(), "");
    }

    #[tokio::test]
    async fn test_identity_symbols() {
        let (_, ctx) = setup().await;
        let resolver = SubstitutionResolver::new();
        assert_eq!(
            resolver.resolve("#", &ctx).await.unwrap().text(),
            format!("#{}", ctx.enactor().number)
        );
        assert_eq!(
            resolver.resolve("!", &ctx).await.unwrap().text(),
            format!("#{}", ctx.executor().number)
        );
        assert_eq!(resolver.resolve("n", &ctx).await.unwrap().text(), "Rhea");
    }

    #[tokio::test]
    async fn test_spacing_symbols() {
        let (_, ctx) = setup().await;
        let resolver = SubstitutionResolver::new();
        assert_eq!(resolver.resolve("r", &ctx).await.unwrap().text(), "\n");
        assert_eq!(resolver.resolve("t", &ctx).await.unwrap().text(), "\t");
        assert_eq!(resolver.resolve("b", &ctx).await.unwrap().text(), " ");
        assert_eq!(resolver.resolve("%", &ctx).await.unwrap().text(), "%");
    }

    #[tokio::test]
    async fn test_registers_and_iteration_text() {
        let (_, ctx) = setup().await;
        let resolver = SubstitutionResolver::new();
        ctx.set_register("0", Markup::plain("stored"));
        ctx.set_register("fruit", Markup::plain("plum"));
        assert_eq!(resolver.resolve("q0", &ctx).await.unwrap().text(), "stored");
        assert_eq!(resolver.resolve("qfruit", &ctx).await.unwrap().text(), "plum");
        ctx.push_iteration(Markup::plain("pear"));
        assert_eq!(resolver.resolve("i0", &ctx).await.unwrap().text(), "pear");
    }

    #[tokio::test]
    async fn test_unknown_symbol_resolves_empty() {
        let (_, ctx) = setup().await;
        let resolver = SubstitutionResolver::new();
        assert_eq!(resolver.resolve("z", &ctx).await.unwrap().text(), "");
        assert_eq!(resolver.resolve("qq missing", &ctx).await.unwrap().text(), "");
    }
}
