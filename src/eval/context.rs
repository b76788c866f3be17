//! Ambient evaluation state.
//!
//! Every visit receives an [`EvalContext`]: the process-wide wiring shared
//! by all evaluations plus the per-evaluation state: who is acting, the
//! parse mode, register bindings, the three depth budgets and the
//! cancellation token. Contexts are cheap to clone; lexical changes (parse
//! mode, brace depth, positional arguments) fork a copy while the shared
//! mutable pieces (registers, budgets, iteration frames) stay common to
//! the whole top-level evaluation. Nothing here is shared across two
//! concurrent evaluations, so no locking beyond the atomics is needed.

use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use uuid::Uuid;

use super::command::CommandRegistry;
use super::evaluator::{EvalError, EvalResult};
use super::function::FunctionRegistry;
use super::sentinel::Sentinel;
use crate::ast::SoftcodeParser;
use crate::config::EvalConfig;
use crate::dbref::ObjRef;
use crate::markup::Markup;
use crate::world::WorldService;

/// Controls whether functions/substitutions evaluate or reproduce their
/// source literally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParseMode {
    #[default]
    Parse,
    /// Literal text, but brackets still force evaluation.
    NoParse,
    /// Fully literal.
    NoEval,
}

/// Cooperative cancellation signal, observed at suspension points and loop
/// iterations.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// The three independent evaluation budgets.
#[derive(Debug, Default)]
pub struct Budgets {
    calls: AtomicU64,
    function_depth: AtomicU32,
    recursion_depth: AtomicU32,
}

enum Counter {
    Function,
    Recursion,
}

/// Decrements its depth counter when the guarded scope ends.
pub struct DepthGuard {
    budgets: Arc<Budgets>,
    counter: Counter,
}

impl Drop for DepthGuard {
    fn drop(&mut self) {
        let counter = match self.counter {
            Counter::Function => &self.budgets.function_depth,
            Counter::Recursion => &self.budgets.recursion_depth,
        };
        counter.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Process-wide wiring: services, registries, configuration. Built once,
/// shared read-only by every evaluation.
pub struct SharedEval {
    pub world: Arc<dyn WorldService>,
    pub parser: Arc<dyn SoftcodeParser>,
    pub functions: Arc<FunctionRegistry>,
    pub commands: Arc<CommandRegistry>,
    pub config: EvalConfig,
}

impl SharedEval {
    pub fn new(world: Arc<dyn WorldService>, parser: Arc<dyn SoftcodeParser>) -> Self {
        Self {
            world,
            parser,
            functions: Arc::new(FunctionRegistry::standard()),
            commands: Arc::new(CommandRegistry::standard()),
            config: EvalConfig::default(),
        }
    }

    pub fn with_config(mut self, config: EvalConfig) -> Self {
        self.config = config;
        self
    }
}

/// Per-evaluation ambient state.
#[derive(Clone)]
pub struct EvalContext {
    pub shared: Arc<SharedEval>,
    executor: ObjRef,
    enactor: ObjRef,
    caller: ObjRef,
    parse_mode: ParseMode,
    brace_depth: u32,
    positional: Arc<Vec<Markup>>,
    registers: Arc<DashMap<String, Markup>>,
    iterations: Arc<RwLock<Vec<Markup>>>,
    stack: Arc<RwLock<Vec<Markup>>>,
    budgets: Arc<Budgets>,
    cancel: CancelToken,
    trace_id: Arc<String>,
}

impl EvalContext {
    pub fn new(shared: Arc<SharedEval>, executor: ObjRef, enactor: ObjRef) -> Self {
        Self {
            shared,
            executor,
            enactor,
            caller: enactor,
            parse_mode: ParseMode::default(),
            brace_depth: 0,
            positional: Arc::new(vec![]),
            registers: Arc::new(DashMap::new()),
            iterations: Arc::new(RwLock::new(vec![])),
            stack: Arc::new(RwLock::new(vec![])),
            budgets: Arc::new(Budgets::default()),
            cancel: CancelToken::new(),
            trace_id: Arc::new(Uuid::new_v4().to_string()),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn executor(&self) -> ObjRef {
        self.executor
    }

    pub fn enactor(&self) -> ObjRef {
        self.enactor
    }

    pub fn caller(&self) -> ObjRef {
        self.caller
    }

    pub fn parse_mode(&self) -> ParseMode {
        self.parse_mode
    }

    pub fn brace_depth(&self) -> u32 {
        self.brace_depth
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    /// Fork with a different parse mode.
    pub fn with_mode(&self, parse_mode: ParseMode) -> Arc<Self> {
        let mut forked = self.clone();
        forked.parse_mode = parse_mode;
        Arc::new(forked)
    }

    /// Fork one brace level deeper.
    pub fn deeper_braces(&self) -> Arc<Self> {
        let mut forked = self.clone();
        forked.brace_depth += 1;
        Arc::new(forked)
    }

    /// Fork with fresh positional arguments (`%0`–`%9`).
    pub fn with_positional(&self, positional: Vec<Markup>) -> Arc<Self> {
        let mut forked = self.clone();
        forked.positional = Arc::new(positional);
        Arc::new(forked)
    }

    /// Fork for evaluating stored attribute text on `holder`: the holder
    /// becomes the executor and the previous executor becomes the caller.
    pub fn for_attribute(&self, holder: ObjRef) -> Arc<Self> {
        let mut forked = self.clone();
        forked.caller = forked.executor;
        forked.executor = holder;
        Arc::new(forked)
    }

    pub fn positional(&self, index: usize) -> Option<Markup> {
        self.positional.get(index).cloned()
    }

    pub fn set_register(&self, name: &str, value: Markup) {
        self.registers.insert(name.to_ascii_uppercase(), value);
    }

    pub fn register(&self, name: &str) -> Option<Markup> {
        self.registers
            .get(&name.to_ascii_uppercase())
            .map(|v| v.clone())
    }

    pub fn push_iteration(&self, item: Markup) {
        self.iterations.write().expect("iteration stack").push(item);
    }

    pub fn pop_iteration(&self) {
        self.iterations.write().expect("iteration stack").pop();
    }

    /// Iteration text, innermost first: `%i0` is the current loop's item.
    pub fn iteration(&self, level: usize) -> Option<Markup> {
        let frames = self.iterations.read().expect("iteration stack");
        frames.iter().rev().nth(level).cloned()
    }

    pub fn push_stack(&self, item: Markup) {
        self.stack.write().expect("stack text").push(item);
    }

    pub fn pop_stack(&self) {
        self.stack.write().expect("stack text").pop();
    }

    /// Stack text, innermost first: `%s0` is the nearest enclosing match.
    pub fn stack(&self, level: usize) -> Option<Markup> {
        let frames = self.stack.read().expect("stack text");
        frames.iter().rev().nth(level).cloned()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn check_cancelled(&self) -> EvalResult<()> {
        if self.cancel.is_cancelled() {
            Err(EvalError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Charge one node visit against the monotone call budget.
    pub fn charge_call(&self) -> Result<(), Sentinel> {
        let spent = self.budgets.calls.fetch_add(1, Ordering::Relaxed) + 1;
        if spent > self.shared.config.max_call_budget {
            Err(Sentinel::CallLimit)
        } else {
            Ok(())
        }
    }

    /// Enter one level of tree recursion; the guard leaves it again.
    pub fn enter_recursion(&self) -> Result<DepthGuard, Sentinel> {
        let depth = self.budgets.recursion_depth.fetch_add(1, Ordering::Relaxed) + 1;
        if depth > self.shared.config.max_recursion_depth {
            self.budgets.recursion_depth.fetch_sub(1, Ordering::Relaxed);
            return Err(Sentinel::RecursionLimit);
        }
        Ok(DepthGuard {
            budgets: self.budgets.clone(),
            counter: Counter::Recursion,
        })
    }

    /// Enter one level of function nesting; the guard leaves it again.
    pub fn enter_function(&self) -> Result<DepthGuard, Sentinel> {
        let depth = self.budgets.function_depth.fetch_add(1, Ordering::Relaxed) + 1;
        if depth > self.shared.config.max_function_depth {
            self.budgets.function_depth.fetch_sub(1, Ordering::Relaxed);
            return Err(Sentinel::FunctionRecursionLimit);
        }
        Ok(DepthGuard {
            budgets: self.budgets.clone(),
            counter: Counter::Function,
        })
    }

    /// Current tree depth, recorded on produced values.
    pub fn depth(&self) -> u32 {
        self.budgets.recursion_depth.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::LiteralParser;
    use crate::world::InMemoryWorld;

    fn context() -> EvalContext {
        let shared = Arc::new(SharedEval::new(
            Arc::new(InMemoryWorld::new()),
            Arc::new(LiteralParser),
        ));
        EvalContext::new(shared, ObjRef::bare(1), ObjRef::bare(2))
    }

    #[test]
    fn test_forks_share_registers() {
        let ctx = context();
        let forked = ctx.with_mode(ParseMode::NoParse);
        forked.set_register("q0", Markup::plain("shared"));
        assert_eq!(ctx.register("Q0").unwrap().plain_text(), "shared");
        assert_eq!(ctx.parse_mode(), ParseMode::Parse);
        assert_eq!(forked.parse_mode(), ParseMode::NoParse);
    }

    #[test]
    fn test_call_budget_is_monotone() {
        let small = EvalConfig {
            max_call_budget: 3,
            ..Default::default()
        };
        let shared = Arc::new(
            SharedEval::new(Arc::new(InMemoryWorld::new()), Arc::new(LiteralParser))
                .with_config(small),
        );
        let ctx = EvalContext::new(shared, ObjRef::bare(1), ObjRef::bare(2));
        assert!(ctx.charge_call().is_ok());
        assert!(ctx.charge_call().is_ok());
        assert!(ctx.charge_call().is_ok());
        assert_eq!(ctx.charge_call(), Err(Sentinel::CallLimit));
    }

    #[test]
    fn test_depth_guard_releases_on_drop() {
        let ctx = context();
        {
            let _a = ctx.enter_recursion().unwrap();
            let _b = ctx.enter_recursion().unwrap();
            assert_eq!(ctx.depth(), 2);
        }
        assert_eq!(ctx.depth(), 0);
    }

    #[test]
    fn test_iteration_frames_innermost_first() {
        let ctx = context();
        ctx.push_iteration(Markup::plain("outer"));
        ctx.push_iteration(Markup::plain("inner"));
        assert_eq!(ctx.iteration(0).unwrap().plain_text(), "inner");
        assert_eq!(ctx.iteration(1).unwrap().plain_text(), "outer");
        assert!(ctx.iteration(2).is_none());
        ctx.pop_iteration();
        assert_eq!(ctx.iteration(0).unwrap().plain_text(), "outer");
    }

    #[test]
    fn test_cancel_token_trips_check() {
        let cancel = CancelToken::new();
        let ctx = context().with_cancel(cancel.clone());
        assert!(ctx.check_cancelled().is_ok());
        cancel.cancel();
        assert!(matches!(ctx.check_cancelled(), Err(EvalError::Cancelled)));
    }
}
