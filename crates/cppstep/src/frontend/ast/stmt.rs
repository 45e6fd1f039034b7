//! Statement nodes

use super::{Expression, SimpleDeclaration};
use crate::common::Span;

#[derive(Debug, Clone)]
pub struct Statement {
    pub kind: StmtKind,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum StmtKind {
    Expression(Expression),
    Declaration(SimpleDeclaration),
    Block(BlockAst),
    If {
        condition: Expression,
        then_branch: Box<Statement>,
        else_branch: Option<Box<Statement>>,
    },
    While {
        condition: Expression,
        body: Box<Statement>,
    },
    For {
        init: Box<Statement>,
        condition: Option<Expression>,
        post: Option<Expression>,
        body: Box<Statement>,
    },
    Return(Option<Expression>),
    Break,
    Continue,
    Null,
}

#[derive(Debug, Clone)]
pub struct BlockAst {
    pub statements: Vec<Statement>,
    pub span: Span,
}
