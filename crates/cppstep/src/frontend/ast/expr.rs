//! Expression nodes

use super::TypeSpecifier;
use crate::common::Span;

#[derive(Debug, Clone)]
pub struct Expression {
    pub kind: ExprKind,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    IntLiteral(i64),
    DoubleLiteral(f64),
    CharLiteral(char),
    BoolLiteral(bool),
    StringLiteral(String),
    Identifier(String),
    This,
    Binary {
        op: BinaryOp,
        lhs: Box<Expression>,
        rhs: Box<Expression>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expression>,
    },
    Assign {
        lhs: Box<Expression>,
        rhs: Box<Expression>,
    },
    IncDec {
        increment: bool,
        postfix: bool,
        operand: Box<Expression>,
    },
    Call {
        callee: Box<Expression>,
        args: Vec<Expression>,
    },
    Subscript {
        base: Box<Expression>,
        index: Box<Expression>,
    },
    /// `object.member` or `pointer->member`
    Member {
        object: Box<Expression>,
        member: String,
        through_pointer: bool,
    },
    Deref(Box<Expression>),
    AddressOf(Box<Expression>),
    /// `new T(args...)`
    New {
        spec: TypeSpecifier,
        args: Vec<Expression>,
        args_span: Option<Span>,
    },
    /// `new T[length]`
    NewArray {
        spec: TypeSpecifier,
        length: Box<Expression>,
    },
    Delete {
        operand: Box<Expression>,
        array_form: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Less,
    Greater,
    LessEq,
    GreaterEq,
    Equal,
    NotEqual,
    LogicalAnd,
    LogicalOr,
    /// `<<` — only meaningful via stream operator overloads
    Shl,
    /// `>>`
    Shr,
}

impl BinaryOp {
    /// Token text, used in notes and overload lookup names
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Less => "<",
            BinaryOp::Greater => ">",
            BinaryOp::LessEq => "<=",
            BinaryOp::GreaterEq => ">=",
            BinaryOp::Equal => "==",
            BinaryOp::NotEqual => "!=",
            BinaryOp::LogicalAnd => "&&",
            BinaryOp::LogicalOr => "||",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Plus,
    Not,
}

impl UnaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            UnaryOp::Neg => "-",
            UnaryOp::Plus => "+",
            UnaryOp::Not => "!",
        }
    }
}
