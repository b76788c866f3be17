//! The standard softcode function library.
//!
//! Implementations receive their arguments as raw nodes and decide
//! evaluation order themselves: most evaluate left to right, the control
//! functions (`if`, `switch`, `iter`) leave branches
//! unevaluated until chosen. Side effects (notification, register writes)
//! happen here, never in the dispatcher.

use futures::future::BoxFuture;
use std::sync::Arc;

use super::context::EvalContext;
use super::evaluator::{EvalResult, SoftcodeBridge, TreeEvaluator};
use super::function::{FunctionDefinition, FunctionRegistry, FunctionTraits};
use super::result::EvalValue;
use super::sentinel::{is_error_text, Sentinel};
use crate::ast::Node;
use crate::lock;
use crate::markup::Markup;
use crate::wild::wild_match;
use crate::world::Located;

/// Register the whole library.
pub fn install(registry: &mut FunctionRegistry) {
    let defaults = FunctionTraits::default();
    let no_parse = FunctionTraits {
        no_parse: true,
        ..Default::default()
    };
    let table: Vec<FunctionDefinition> = vec![
        // Arithmetic
        def("add", &[], 2, None, defaults, fn_add),
        def("sub", &[], 2, Some(2), defaults, fn_sub),
        def("mul", &[], 2, None, defaults, fn_mul),
        def("div", &[], 2, Some(2), defaults, fn_div),
        def("mod", &["modulo"], 2, Some(2), defaults, fn_mod),
        def("max", &[], 1, None, defaults, fn_max),
        def("min", &[], 1, None, defaults, fn_min),
        def("abs", &[], 1, Some(1), defaults, fn_abs),
        // Comparison and logic
        def("eq", &[], 2, Some(2), defaults, fn_eq),
        def("neq", &[], 2, Some(2), defaults, fn_neq),
        def("gt", &[], 2, Some(2), defaults, fn_gt),
        def("gte", &[], 2, Some(2), defaults, fn_gte),
        def("lt", &[], 2, Some(2), defaults, fn_lt),
        def("lte", &[], 2, Some(2), defaults, fn_lte),
        def("and", &[], 2, None, defaults, fn_and),
        def("or", &[], 2, None, defaults, fn_or),
        def("not", &[], 1, Some(1), defaults, fn_not),
        def("xor", &[], 2, Some(2), defaults, fn_xor),
        // Strings
        def("strlen", &[], 1, Some(1), defaults, fn_strlen),
        def("mid", &[], 3, Some(3), defaults, fn_mid),
        def("cat", &[], 1, None, defaults, fn_cat),
        def("strcat", &[], 1, None, defaults, fn_strcat),
        def("ucstr", &[], 1, Some(1), defaults, fn_ucstr),
        def("lcstr", &[], 1, Some(1), defaults, fn_lcstr),
        def("words", &[], 1, Some(2), defaults, fn_words),
        def("first", &[], 1, Some(2), defaults, fn_first),
        def("rest", &[], 1, Some(2), defaults, fn_rest),
        // Control: arguments stay unevaluated until chosen
        def("if", &["ifelse"], 2, Some(3), no_parse, fn_if),
        def("switch", &["case"], 3, None, no_parse, fn_switch),
        def("iter", &[], 2, Some(4), no_parse, fn_iter),
        // Registers
        FunctionDefinition {
            name: "setq",
            aliases: &[],
            min_args: 2,
            max_args: None,
            traits: FunctionTraits {
                args_even: true,
                ..Default::default()
            },
            restrictions: &[],
            handler: fn_setq,
        },
        def("r", &["rget"], 1, Some(1), defaults, fn_r),
        // World access
        def("name", &[], 1, Some(1), defaults, fn_name),
        def("num", &[], 1, Some(1), defaults, fn_num),
        def("get", &["xget"], 1, Some(2), defaults, fn_get),
        FunctionDefinition {
            name: "u",
            aliases: &["ufun"],
            min_args: 1,
            max_args: None,
            traits: defaults,
            restrictions: &[],
            handler: fn_u,
        },
        def("elock", &[], 2, Some(2), defaults, fn_elock),
        def("pemit", &[], 2, Some(2), defaults, fn_pemit),
    ];
    for definition in table {
        registry.register(definition);
    }
}

fn def(
    name: &'static str,
    aliases: &'static [&'static str],
    min_args: usize,
    max_args: Option<usize>,
    traits: FunctionTraits,
    handler: super::function::FunctionHandler,
) -> FunctionDefinition {
    FunctionDefinition {
        name,
        aliases,
        min_args,
        max_args,
        traits,
        restrictions: &[],
        handler,
    }
}

// Shared helpers ------------------------------------------------------------

fn number(value: &Markup) -> Result<f64, Sentinel> {
    value
        .plain_text()
        .trim()
        .parse::<f64>()
        .map_err(|_| Sentinel::NotANumber)
}

fn format_number(value: f64) -> String {
    if value == 0.0 {
        "0".to_string()
    } else {
        format!("{}", value)
    }
}

/// Softcode truth: empty, `0` and error sentinels are false.
pub fn truthy(text: &str) -> bool {
    let trimmed = text.trim();
    if trimmed.is_empty() || trimmed.starts_with("#-") {
        return false;
    }
    match trimmed.parse::<f64>() {
        Ok(n) => n != 0.0,
        Err(_) => true,
    }
}

fn boolean(value: bool, depth: u32) -> EvalValue {
    EvalValue::message(if value { "1" } else { "0" }, depth)
}

/// Evaluate every argument as a number. An argument that is already an
/// error value passes through untouched, so the original failure stays
/// visible at the top instead of being masked by a type complaint.
async fn numbers(
    evaluator: &TreeEvaluator,
    ctx: &Arc<EvalContext>,
    args: &[Node],
) -> EvalResult<Result<Vec<f64>, EvalValue>> {
    let depth = ctx.depth();
    let mut parsed = Vec::with_capacity(args.len());
    for node in args {
        let value = evaluator.eval_to_markup(node, ctx.clone()).await?;
        let text = value.plain_text();
        if is_error_text(&text) {
            return Ok(Err(EvalValue::message(value, depth)));
        }
        match text.trim().parse::<f64>() {
            Ok(n) => parsed.push(n),
            Err(_) => return Ok(Err(EvalValue::error(Sentinel::NotANumber, depth))),
        }
    }
    Ok(Ok(parsed))
}

fn split_list(text: &str, separator: &str) -> Vec<String> {
    if separator == " " {
        text.split_whitespace().map(|s| s.to_string()).collect()
    } else {
        text.split(separator).map(|s| s.to_string()).collect()
    }
}

async fn separator_arg(
    evaluator: &TreeEvaluator,
    ctx: &Arc<EvalContext>,
    args: &[Node],
    index: usize,
) -> EvalResult<String> {
    Ok(match args.get(index) {
        Some(node) => {
            let text = evaluator.eval_to_markup(node, ctx.clone()).await?.plain_text();
            if text.is_empty() {
                " ".to_string()
            } else {
                text
            }
        }
        None => " ".to_string(),
    })
}

macro_rules! numeric_fold {
    ($name:ident, $init:expr, $fold:expr) => {
        fn $name<'a>(
            evaluator: &'a TreeEvaluator,
            ctx: Arc<EvalContext>,
            args: &'a [Node],
        ) -> BoxFuture<'a, EvalResult<EvalValue>> {
            Box::pin(async move {
                let depth = ctx.depth();
                let values = match numbers(evaluator, &ctx, args).await? {
                    Ok(values) => values,
                    Err(value) => return Ok(value),
                };
                let folded = values.into_iter().fold($init, $fold);
                Ok(EvalValue::message(format_number(folded), depth))
            })
        }
    };
}

macro_rules! numeric_compare {
    ($name:ident, $check:expr) => {
        fn $name<'a>(
            evaluator: &'a TreeEvaluator,
            ctx: Arc<EvalContext>,
            args: &'a [Node],
        ) -> BoxFuture<'a, EvalResult<EvalValue>> {
            Box::pin(async move {
                let depth = ctx.depth();
                let values = match numbers(evaluator, &ctx, args).await? {
                    Ok(values) => values,
                    Err(value) => return Ok(value),
                };
                #[allow(clippy::redundant_closure_call)]
                let result: bool = $check(values[0], values[1]);
                Ok(boolean(result, depth))
            })
        }
    };
}

// Arithmetic ----------------------------------------------------------------

numeric_fold!(fn_add, 0.0, |acc, n| acc + n);
numeric_fold!(fn_mul, 1.0, |acc, n| acc * n);

fn fn_sub<'a>(
    evaluator: &'a TreeEvaluator,
    ctx: Arc<EvalContext>,
    args: &'a [Node],
) -> BoxFuture<'a, EvalResult<EvalValue>> {
    Box::pin(async move {
        let depth = ctx.depth();
        match numbers(evaluator, &ctx, args).await? {
            Ok(values) => Ok(EvalValue::message(format_number(values[0] - values[1]), depth)),
            Err(value) => Ok(value),
        }
    })
}

fn fn_div<'a>(
    evaluator: &'a TreeEvaluator,
    ctx: Arc<EvalContext>,
    args: &'a [Node],
) -> BoxFuture<'a, EvalResult<EvalValue>> {
    Box::pin(async move {
        let depth = ctx.depth();
        match numbers(evaluator, &ctx, args).await? {
            Ok(values) => {
                if values[1] == 0.0 {
                    return Ok(EvalValue::error(Sentinel::DivideByZero, depth));
                }
                Ok(EvalValue::message(
                    format_number((values[0] / values[1]).trunc()),
                    depth,
                ))
            }
            Err(value) => Ok(value),
        }
    })
}

fn fn_mod<'a>(
    evaluator: &'a TreeEvaluator,
    ctx: Arc<EvalContext>,
    args: &'a [Node],
) -> BoxFuture<'a, EvalResult<EvalValue>> {
    Box::pin(async move {
        let depth = ctx.depth();
        match numbers(evaluator, &ctx, args).await? {
            Ok(values) => {
                if values[1] == 0.0 {
                    return Ok(EvalValue::error(Sentinel::DivideByZero, depth));
                }
                Ok(EvalValue::message(format_number(values[0] % values[1]), depth))
            }
            Err(value) => Ok(value),
        }
    })
}

fn fn_max<'a>(
    evaluator: &'a TreeEvaluator,
    ctx: Arc<EvalContext>,
    args: &'a [Node],
) -> BoxFuture<'a, EvalResult<EvalValue>> {
    Box::pin(async move {
        let depth = ctx.depth();
        match numbers(evaluator, &ctx, args).await? {
            Ok(values) => {
                let best = values.into_iter().fold(f64::NEG_INFINITY, f64::max);
                Ok(EvalValue::message(format_number(best), depth))
            }
            Err(value) => Ok(value),
        }
    })
}

fn fn_min<'a>(
    evaluator: &'a TreeEvaluator,
    ctx: Arc<EvalContext>,
    args: &'a [Node],
) -> BoxFuture<'a, EvalResult<EvalValue>> {
    Box::pin(async move {
        let depth = ctx.depth();
        match numbers(evaluator, &ctx, args).await? {
            Ok(values) => {
                let best = values.into_iter().fold(f64::INFINITY, f64::min);
                Ok(EvalValue::message(format_number(best), depth))
            }
            Err(value) => Ok(value),
        }
    })
}

fn fn_abs<'a>(
    evaluator: &'a TreeEvaluator,
    ctx: Arc<EvalContext>,
    args: &'a [Node],
) -> BoxFuture<'a, EvalResult<EvalValue>> {
    Box::pin(async move {
        let depth = ctx.depth();
        match numbers(evaluator, &ctx, args).await? {
            Ok(values) => Ok(EvalValue::message(format_number(values[0].abs()), depth)),
            Err(value) => Ok(value),
        }
    })
}

// Comparison and logic ------------------------------------------------------

numeric_compare!(fn_eq, |a, b| a == b);
numeric_compare!(fn_neq, |a, b| a != b);
numeric_compare!(fn_gt, |a: f64, b: f64| a > b);
numeric_compare!(fn_gte, |a: f64, b: f64| a >= b);
numeric_compare!(fn_lt, |a: f64, b: f64| a < b);
numeric_compare!(fn_lte, |a: f64, b: f64| a <= b);

fn fn_and<'a>(
    evaluator: &'a TreeEvaluator,
    ctx: Arc<EvalContext>,
    args: &'a [Node],
) -> BoxFuture<'a, EvalResult<EvalValue>> {
    Box::pin(async move {
        let depth = ctx.depth();
        for node in args {
            let value = evaluator.eval_to_markup(node, ctx.clone()).await?;
            if !truthy(&value.plain_text()) {
                return Ok(boolean(false, depth));
            }
        }
        Ok(boolean(true, depth))
    })
}

fn fn_or<'a>(
    evaluator: &'a TreeEvaluator,
    ctx: Arc<EvalContext>,
    args: &'a [Node],
) -> BoxFuture<'a, EvalResult<EvalValue>> {
    Box::pin(async move {
        let depth = ctx.depth();
        for node in args {
            let value = evaluator.eval_to_markup(node, ctx.clone()).await?;
            if truthy(&value.plain_text()) {
                return Ok(boolean(true, depth));
            }
        }
        Ok(boolean(false, depth))
    })
}

fn fn_not<'a>(
    evaluator: &'a TreeEvaluator,
    ctx: Arc<EvalContext>,
    args: &'a [Node],
) -> BoxFuture<'a, EvalResult<EvalValue>> {
    Box::pin(async move {
        let depth = ctx.depth();
        let value = evaluator.eval_to_markup(&args[0], ctx.clone()).await?;
        Ok(boolean(!truthy(&value.plain_text()), depth))
    })
}

fn fn_xor<'a>(
    evaluator: &'a TreeEvaluator,
    ctx: Arc<EvalContext>,
    args: &'a [Node],
) -> BoxFuture<'a, EvalResult<EvalValue>> {
    Box::pin(async move {
        let depth = ctx.depth();
        let left = evaluator.eval_to_markup(&args[0], ctx.clone()).await?;
        let right = evaluator.eval_to_markup(&args[1], ctx.clone()).await?;
        Ok(boolean(
            truthy(&left.plain_text()) != truthy(&right.plain_text()),
            depth,
        ))
    })
}

// Strings -------------------------------------------------------------------

fn fn_strlen<'a>(
    evaluator: &'a TreeEvaluator,
    ctx: Arc<EvalContext>,
    args: &'a [Node],
) -> BoxFuture<'a, EvalResult<EvalValue>> {
    Box::pin(async move {
        let depth = ctx.depth();
        let value = evaluator.eval_to_markup(&args[0], ctx.clone()).await?;
        Ok(EvalValue::message(value.len().to_string(), depth))
    })
}

fn fn_mid<'a>(
    evaluator: &'a TreeEvaluator,
    ctx: Arc<EvalContext>,
    args: &'a [Node],
) -> BoxFuture<'a, EvalResult<EvalValue>> {
    Box::pin(async move {
        let depth = ctx.depth();
        let value = evaluator.eval_to_markup(&args[0], ctx.clone()).await?;
        let start = evaluator.eval_to_markup(&args[1], ctx.clone()).await?;
        let length = evaluator.eval_to_markup(&args[2], ctx.clone()).await?;
        let (start, length) = match (number(&start), number(&length)) {
            (Ok(s), Ok(l)) if s >= 0.0 && l >= 0.0 => (s as usize, l as usize),
            _ => return Ok(EvalValue::error(Sentinel::NotANumber, depth)),
        };
        Ok(EvalValue::message(value.substring(start, length), depth))
    })
}

fn fn_cat<'a>(
    evaluator: &'a TreeEvaluator,
    ctx: Arc<EvalContext>,
    args: &'a [Node],
) -> BoxFuture<'a, EvalResult<EvalValue>> {
    Box::pin(async move {
        let depth = ctx.depth();
        let mut joined = Markup::default();
        for (i, node) in args.iter().enumerate() {
            if i > 0 {
                joined = joined.concat(&Markup::plain(" "));
            }
            joined = joined.concat(&evaluator.eval_to_markup(node, ctx.clone()).await?);
        }
        Ok(EvalValue::message(joined, depth))
    })
}

fn fn_strcat<'a>(
    evaluator: &'a TreeEvaluator,
    ctx: Arc<EvalContext>,
    args: &'a [Node],
) -> BoxFuture<'a, EvalResult<EvalValue>> {
    Box::pin(async move {
        let depth = ctx.depth();
        let mut joined = Markup::default();
        for node in args {
            joined = joined.concat(&evaluator.eval_to_markup(node, ctx.clone()).await?);
        }
        Ok(EvalValue::message(joined, depth))
    })
}

fn fn_ucstr<'a>(
    evaluator: &'a TreeEvaluator,
    ctx: Arc<EvalContext>,
    args: &'a [Node],
) -> BoxFuture<'a, EvalResult<EvalValue>> {
    Box::pin(async move {
        let depth = ctx.depth();
        let value = evaluator.eval_to_markup(&args[0], ctx.clone()).await?;
        Ok(EvalValue::message(value.plain_text().to_uppercase(), depth))
    })
}

fn fn_lcstr<'a>(
    evaluator: &'a TreeEvaluator,
    ctx: Arc<EvalContext>,
    args: &'a [Node],
) -> BoxFuture<'a, EvalResult<EvalValue>> {
    Box::pin(async move {
        let depth = ctx.depth();
        let value = evaluator.eval_to_markup(&args[0], ctx.clone()).await?;
        Ok(EvalValue::message(value.plain_text().to_lowercase(), depth))
    })
}

fn fn_words<'a>(
    evaluator: &'a TreeEvaluator,
    ctx: Arc<EvalContext>,
    args: &'a [Node],
) -> BoxFuture<'a, EvalResult<EvalValue>> {
    Box::pin(async move {
        let depth = ctx.depth();
        let value = evaluator.eval_to_markup(&args[0], ctx.clone()).await?;
        let separator = separator_arg(evaluator, &ctx, args, 1).await?;
        let count = split_list(&value.plain_text(), &separator).len();
        Ok(EvalValue::message(count.to_string(), depth))
    })
}

fn fn_first<'a>(
    evaluator: &'a TreeEvaluator,
    ctx: Arc<EvalContext>,
    args: &'a [Node],
) -> BoxFuture<'a, EvalResult<EvalValue>> {
    Box::pin(async move {
        let depth = ctx.depth();
        let value = evaluator.eval_to_markup(&args[0], ctx.clone()).await?;
        let separator = separator_arg(evaluator, &ctx, args, 1).await?;
        let words = split_list(&value.plain_text(), &separator);
        Ok(EvalValue::message(
            words.into_iter().next().unwrap_or_default(),
            depth,
        ))
    })
}

fn fn_rest<'a>(
    evaluator: &'a TreeEvaluator,
    ctx: Arc<EvalContext>,
    args: &'a [Node],
) -> BoxFuture<'a, EvalResult<EvalValue>> {
    Box::pin(async move {
        let depth = ctx.depth();
        let value = evaluator.eval_to_markup(&args[0], ctx.clone()).await?;
        let separator = separator_arg(evaluator, &ctx, args, 1).await?;
        let words = split_list(&value.plain_text(), &separator);
        let rest: Vec<String> = words.into_iter().skip(1).collect();
        Ok(EvalValue::message(rest.join(&separator), depth))
    })
}

// Control -------------------------------------------------------------------

fn fn_if<'a>(
    evaluator: &'a TreeEvaluator,
    ctx: Arc<EvalContext>,
    args: &'a [Node],
) -> BoxFuture<'a, EvalResult<EvalValue>> {
    Box::pin(async move {
        let depth = ctx.depth();
        let condition = evaluator.eval_to_markup(&args[0], ctx.clone()).await?;
        if truthy(&condition.plain_text()) {
            let value = evaluator.eval_to_markup(&args[1], ctx.clone()).await?;
            Ok(EvalValue::message(value, depth))
        } else if let Some(otherwise) = args.get(2) {
            let value = evaluator.eval_to_markup(otherwise, ctx.clone()).await?;
            Ok(EvalValue::message(value, depth))
        } else {
            Ok(EvalValue::empty(depth))
        }
    })
}

fn fn_switch<'a>(
    evaluator: &'a TreeEvaluator,
    ctx: Arc<EvalContext>,
    args: &'a [Node],
) -> BoxFuture<'a, EvalResult<EvalValue>> {
    Box::pin(async move {
        let depth = ctx.depth();
        let value = evaluator.eval_to_markup(&args[0], ctx.clone()).await?;
        let text = value.plain_text();
        let rest = &args[1..];
        let mut index = 0;
        while index + 1 < rest.len() {
            ctx.check_cancelled()?;
            let pattern = evaluator.eval_to_markup(&rest[index], ctx.clone()).await?;
            if wild_match(&pattern.plain_text(), &text) {
                ctx.push_stack(value.clone());
                let chosen = evaluator.eval_to_markup(&rest[index + 1], ctx.clone()).await;
                ctx.pop_stack();
                return Ok(EvalValue::message(chosen?, depth));
            }
            index += 2;
        }
        if index < rest.len() {
            ctx.push_stack(value.clone());
            let fallback = evaluator.eval_to_markup(&rest[index], ctx.clone()).await;
            ctx.pop_stack();
            return Ok(EvalValue::message(fallback?, depth));
        }
        Ok(EvalValue::empty(depth))
    })
}

fn fn_iter<'a>(
    evaluator: &'a TreeEvaluator,
    ctx: Arc<EvalContext>,
    args: &'a [Node],
) -> BoxFuture<'a, EvalResult<EvalValue>> {
    Box::pin(async move {
        let depth = ctx.depth();
        let list = evaluator.eval_to_markup(&args[0], ctx.clone()).await?;
        let input_sep = separator_arg(evaluator, &ctx, args, 2).await?;
        let output_sep = separator_arg(evaluator, &ctx, args, 3).await?;
        let mut pieces = Vec::new();
        for item in split_list(&list.plain_text(), &input_sep) {
            // The pattern is re-evaluated from its source nodes for every
            // element; cancellation is observed per iteration.
            ctx.check_cancelled()?;
            ctx.push_iteration(Markup::plain(item));
            let produced = evaluator.eval_to_markup(&args[1], ctx.clone()).await;
            ctx.pop_iteration();
            pieces.push(produced?.plain_text());
        }
        Ok(EvalValue::message(pieces.join(&output_sep), depth))
    })
}

// Registers -----------------------------------------------------------------

fn fn_setq<'a>(
    evaluator: &'a TreeEvaluator,
    ctx: Arc<EvalContext>,
    args: &'a [Node],
) -> BoxFuture<'a, EvalResult<EvalValue>> {
    Box::pin(async move {
        let depth = ctx.depth();
        let mut index = 0;
        while index + 1 < args.len() {
            let name = evaluator.eval_to_markup(&args[index], ctx.clone()).await?;
            let value = evaluator.eval_to_markup(&args[index + 1], ctx.clone()).await?;
            ctx.set_register(name.plain_text().trim(), value);
            index += 2;
        }
        Ok(EvalValue::empty(depth))
    })
}

fn fn_r<'a>(
    evaluator: &'a TreeEvaluator,
    ctx: Arc<EvalContext>,
    args: &'a [Node],
) -> BoxFuture<'a, EvalResult<EvalValue>> {
    Box::pin(async move {
        let depth = ctx.depth();
        let name = evaluator.eval_to_markup(&args[0], ctx.clone()).await?;
        Ok(EvalValue::message(
            ctx.register(name.plain_text().trim()).unwrap_or_default(),
            depth,
        ))
    })
}

// World access --------------------------------------------------------------

fn fn_name<'a>(
    evaluator: &'a TreeEvaluator,
    ctx: Arc<EvalContext>,
    args: &'a [Node],
) -> BoxFuture<'a, EvalResult<EvalValue>> {
    Box::pin(async move {
        let depth = ctx.depth();
        let target = evaluator.eval_to_markup(&args[0], ctx.clone()).await?;
        match ctx
            .shared
            .world
            .locate(&ctx.executor(), &target.plain_text())
            .await?
        {
            Located::One(record) => Ok(EvalValue::message(record.name, depth)),
            Located::Ambiguous => Ok(EvalValue::error(Sentinel::Ambiguous, depth)),
            Located::NotFound => Ok(EvalValue::error(Sentinel::NoMatch, depth)),
        }
    })
}

fn fn_num<'a>(
    evaluator: &'a TreeEvaluator,
    ctx: Arc<EvalContext>,
    args: &'a [Node],
) -> BoxFuture<'a, EvalResult<EvalValue>> {
    Box::pin(async move {
        let depth = ctx.depth();
        let target = evaluator.eval_to_markup(&args[0], ctx.clone()).await?;
        match ctx
            .shared
            .world
            .locate(&ctx.executor(), &target.plain_text())
            .await?
        {
            Located::One(record) => Ok(EvalValue::message(
                format!("#{}", record.reference.number),
                depth,
            )),
            Located::Ambiguous => Ok(EvalValue::error(Sentinel::Ambiguous, depth)),
            Located::NotFound => Ok(EvalValue::error(Sentinel::NoMatch, depth)),
        }
    })
}

/// `get(obj/attr)` or `get(obj, attr)`.
fn fn_get<'a>(
    evaluator: &'a TreeEvaluator,
    ctx: Arc<EvalContext>,
    args: &'a [Node],
) -> BoxFuture<'a, EvalResult<EvalValue>> {
    Box::pin(async move {
        let depth = ctx.depth();
        let first = evaluator.eval_to_markup(&args[0], ctx.clone()).await?;
        let first = first.plain_text();
        let (object, attribute) = match args.get(1) {
            Some(node) => {
                let attr = evaluator.eval_to_markup(node, ctx.clone()).await?;
                (first.clone(), attr.plain_text())
            }
            None => match first.split_once('/') {
                Some((object, attribute)) => (object.to_string(), attribute.to_string()),
                None => return Ok(EvalValue::error(Sentinel::NoSuchAttribute, depth)),
            },
        };
        let record = match ctx.shared.world.locate(&ctx.executor(), &object).await? {
            Located::One(record) => record,
            Located::Ambiguous => return Ok(EvalValue::error(Sentinel::Ambiguous, depth)),
            Located::NotFound => return Ok(EvalValue::error(Sentinel::NoMatch, depth)),
        };
        match ctx
            .shared
            .world
            .attribute(&record.reference, attribute.trim())
            .await?
        {
            Some(value) => Ok(EvalValue::message(value, depth)),
            None => Ok(EvalValue::error(Sentinel::NoSuchAttribute, depth)),
        }
    })
}

/// `u(obj/attr, arg...)`: evaluate stored attribute text as a user function
/// with fresh positional arguments.
fn fn_u<'a>(
    evaluator: &'a TreeEvaluator,
    ctx: Arc<EvalContext>,
    args: &'a [Node],
) -> BoxFuture<'a, EvalResult<EvalValue>> {
    Box::pin(async move {
        let depth = ctx.depth();
        let spec = evaluator.eval_to_markup(&args[0], ctx.clone()).await?;
        let spec = spec.plain_text();
        let (object, attribute) = match spec.split_once('/') {
            Some((object, attribute)) => (object.to_string(), attribute.to_string()),
            None => ("me".to_string(), spec),
        };
        let record = match ctx.shared.world.locate(&ctx.executor(), &object).await? {
            Located::One(record) => record,
            Located::Ambiguous => return Ok(EvalValue::error(Sentinel::Ambiguous, depth)),
            Located::NotFound => return Ok(EvalValue::error(Sentinel::NoMatch, depth)),
        };
        let body = match ctx
            .shared
            .world
            .attribute(&record.reference, attribute.trim())
            .await?
        {
            Some(body) => body,
            None => return Ok(EvalValue::empty(depth)),
        };

        let mut positional = Vec::with_capacity(args.len().saturating_sub(1));
        for node in &args[1..] {
            positional.push(evaluator.eval_to_markup(node, ctx.clone()).await?);
        }
        let tree = ctx.shared.parser.parse(&body).await?;
        let child = ctx
            .for_attribute(record.reference)
            .with_positional(positional);
        let result = evaluator.eval(&tree, child).await?;
        Ok(EvalValue::message(
            result.map(|v| v.markup()).unwrap_or_default(),
            depth,
        ))
    })
}

/// `elock(obj, victim)`: test `obj`'s basic lock against `victim`.
fn fn_elock<'a>(
    evaluator: &'a TreeEvaluator,
    ctx: Arc<EvalContext>,
    args: &'a [Node],
) -> BoxFuture<'a, EvalResult<EvalValue>> {
    Box::pin(async move {
        let depth = ctx.depth();
        let object = evaluator.eval_to_markup(&args[0], ctx.clone()).await?;
        let victim = evaluator.eval_to_markup(&args[1], ctx.clone()).await?;
        let gated = match ctx
            .shared
            .world
            .locate(&ctx.executor(), &object.plain_text())
            .await?
        {
            Located::One(record) => record,
            Located::Ambiguous => return Ok(EvalValue::error(Sentinel::Ambiguous, depth)),
            Located::NotFound => return Ok(EvalValue::error(Sentinel::NoMatch, depth)),
        };
        let unlocker = match ctx
            .shared
            .world
            .locate(&ctx.executor(), &victim.plain_text())
            .await?
        {
            Located::One(record) => record,
            Located::Ambiguous => return Ok(EvalValue::error(Sentinel::Ambiguous, depth)),
            Located::NotFound => return Ok(EvalValue::error(Sentinel::NoMatch, depth)),
        };
        let source = match ctx
            .shared
            .world
            .lock_source(&gated.reference, "basic")
            .await?
        {
            Some(source) => source,
            // An absent lock gates nothing.
            None => return Ok(boolean(true, depth)),
        };
        let mut env = lock::LockEnv::new(ctx.shared.world.clone())
            .with_softcode(Arc::new(SoftcodeBridge::new(ctx.shared.clone())));
        env.max_indirect_depth = ctx.shared.config.max_lock_depth;
        let predicate = match lock::compile_source(&source, Arc::new(env)) {
            Ok(predicate) => predicate,
            // An unparsable stored lock fails closed.
            Err(_) => return Ok(boolean(false, depth)),
        };
        let passed = predicate(gated.reference, unlocker.reference).await;
        Ok(boolean(passed, depth))
    })
}

fn fn_pemit<'a>(
    evaluator: &'a TreeEvaluator,
    ctx: Arc<EvalContext>,
    args: &'a [Node],
) -> BoxFuture<'a, EvalResult<EvalValue>> {
    Box::pin(async move {
        let depth = ctx.depth();
        let target = evaluator.eval_to_markup(&args[0], ctx.clone()).await?;
        let message = evaluator.eval_to_markup(&args[1], ctx.clone()).await?;
        match ctx
            .shared
            .world
            .locate(&ctx.executor(), &target.plain_text())
            .await?
        {
            Located::One(record) => {
                ctx.shared.world.notify(&record.reference, &message).await?;
                Ok(EvalValue::empty(depth))
            }
            Located::Ambiguous => Ok(EvalValue::error(Sentinel::Ambiguous, depth)),
            Located::NotFound => Ok(EvalValue::error(Sentinel::NoMatch, depth)),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truthy_rules() {
        assert!(truthy("1"));
        assert!(truthy("yes"));
        assert!(truthy("-3"));
        assert!(!truthy(""));
        assert!(!truthy("  "));
        assert!(!truthy("0"));
        assert!(!truthy("0.0"));
        assert!(!truthy("#-1 NO MATCH"));
    }

    #[test]
    fn test_format_number_trims_integers() {
        assert_eq!(format_number(3.0), "3");
        assert_eq!(format_number(3.5), "3.5");
        assert_eq!(format_number(-0.0), "0");
    }

    #[test]
    fn test_split_list_whitespace_vs_custom() {
        assert_eq!(split_list("a  b c", " "), vec!["a", "b", "c"]);
        assert_eq!(split_list("a|b||c", "|"), vec!["a", "b", "", "c"]);
    }
}
