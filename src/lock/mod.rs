//! Lock expressions: boolean permission predicates.
//!
//! A lock is a small boolean expression stored per-object per-purpose
//! (enter, use, page, ...) and checked against an "unlocking" object when a
//! gated action is attempted. Locks have their own grammar, separate from
//! softcode, and three independent passes over the parsed tree:
//!
//! 1. [`compile::normalize`]: canonical source for storage, with object
//!    operands fully qualified so recycled numbers cannot satisfy old locks;
//! 2. [`compile::validate`]: structural legality;
//! 3. [`compile::compile`]: a boxed async predicate `(gated, unlocker)`.
//!
//! A predicate leaf that cannot complete its lookup resolves to `false`
//! rather than erroring; a broken lock fails closed instead of aborting
//! the surrounding command.

pub mod ast;
pub mod compile;
pub mod parser;

pub use ast::{LockFlags, LockNode, StoredLock};
pub use compile::{compile, compile_source, normalize, validate, EvalBridge, LockEnv, LockPredicate};
pub use parser::parse;

use thiserror::Error;

use crate::world::WorldError;

#[derive(Debug, Error)]
pub enum LockError {
    #[error("could not parse lock: {0}")]
    Parse(String),
    #[error("structurally invalid lock")]
    Invalid,
    #[error("world error: {0}")]
    World(#[from] WorldError),
}
