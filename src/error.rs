use thiserror::Error;

use crate::ast::ParseRejected;
use crate::eval::evaluator::EvalError;
use crate::lock::LockError;
use crate::world::WorldError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Eval error: {0}")]
    Eval(#[from] EvalError),
    #[error("World error: {0}")]
    World(#[from] WorldError),
    #[error("Lock error: {0}")]
    Lock(#[from] LockError),
    #[error("Parse error: {0}")]
    Parse(#[from] ParseRejected),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type InternalResult<T> = Result<T, Error>;

impl Error {
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Error::Internal(message.into())
    }
}
