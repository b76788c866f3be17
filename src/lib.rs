//! # mushcode: Softcode Evaluation Engine
//!
//! mushcode is the execution core of a MUSH-style text-adventure server:
//! many concurrent users send lines of softcode that are parsed and
//! evaluated against a shared object graph to produce output and side
//! effects.
//!
//! ## Architecture
//!
//! ```text
//! transport → external parser → Tree Evaluator → Function / Command /
//!                                                Substitution dispatch
//!                                              → Lock Compiler (permissions)
//!                                              → world services (async)
//! ```
//!
//! The crate owns the tree-walking evaluator ([`eval`]), the lock
//! expression compiler ([`lock`]) and their supporting types. The surface
//! grammar, the storage layer and the network are external collaborators
//! reached through narrow seams:
//!
//! * [`ast`]: the fixed parse-tree node contract and the parser seam
//! * [`world`]: async services for the object graph, plus an in-memory
//!   implementation
//! * [`markup`]: the formatted-text value every result is expressed in
//!
//! ## Concurrency
//!
//! Each inbound command evaluates on its own task. The evaluator is a pure
//! recursive computation; ambient state ([`eval::context::EvalContext`])
//! is forked down the call stack, never shared across evaluations, and
//! every external call is an ordinary suspension point. Cancellation is
//! observed at suspension points and loop iterations.
//!
//! ## Errors
//!
//! Script-visible failures are sentinel values (`#-1 ...`) defined in
//! [`eval::sentinel`], propagated through normal aggregation. The Rust
//! error channel ([`error::Error`]) is reserved for exceptional
//! conditions and is converted back into a sentinel at the per-command
//! boundary.

pub mod ast;
pub mod config;
pub mod dbref;
pub mod error;
pub mod eval;
pub mod lock;
pub mod markup;
pub mod wild;
pub mod world;

// Re-exports
pub use ast::{Node, SoftcodeParser};
pub use config::EvalConfig;
pub use dbref::ObjRef;
pub use error::*;
pub use eval::context::{CancelToken, EvalContext, ParseMode, SharedEval};
pub use eval::evaluator::{EvalError, EvalResult, TreeEvaluator};
pub use eval::result::EvalValue;
pub use markup::Markup;
