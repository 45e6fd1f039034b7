//! Syntax tree for the C++ subset
//!
//! Produced by the parser, consumed by semantic elaboration. Every node
//! carries a [`Span`](crate::common::Span) into the preprocessed text of its
//! translation unit. The AST performs no validation of its own; all language
//! rules are checked during elaboration into the construct tree.

mod decl;
mod expr;
mod stmt;

pub use decl::*;
pub use expr::*;
pub use stmt::*;

/// The parsed form of one translation unit
#[derive(Debug, Clone)]
pub struct TranslationUnitAst {
    pub declarations: Vec<Declaration>,
}
