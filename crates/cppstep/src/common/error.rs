//! Internal fatal errors
//!
//! Modeled language errors are never Rust errors: a construct that detects a
//! language violation records a note and keeps compiling. `InternalError` is
//! reserved for violated engine invariants, such as a malformed input tree or
//! an arena id that resolves to the wrong construct kind.

use thiserror::Error;

/// A violated internal invariant. Unrecoverable by design.
#[derive(Error, Debug)]
pub enum InternalError {
    #[error("malformed syntax tree: {0}")]
    MalformedAst(String),

    #[error("arena invariant violated: {0}")]
    Arena(String),

    #[error("simulation invariant violated: {0}")]
    Simulation(String),
}

impl InternalError {
    pub fn malformed_ast(message: impl Into<String>) -> Self {
        Self::MalformedAst(message.into())
    }

    pub fn arena(message: impl Into<String>) -> Self {
        Self::Arena(message.into())
    }

    pub fn simulation(message: impl Into<String>) -> Self {
        Self::Simulation(message.into())
    }
}

pub type InternalResult<T> = Result<T, InternalError>;
