//! Declaration nodes

use super::{BlockAst, Expression};
use crate::common::Span;

#[derive(Debug, Clone)]
pub struct Declaration {
    pub kind: DeclKind,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum DeclKind {
    /// Variables and function prototypes
    Simple(SimpleDeclaration),
    Function(FunctionDefinitionAst),
    Class(ClassDefinitionAst),
}

/// `type-specifier init-declarator, init-declarator, ... ;`
#[derive(Debug, Clone)]
pub struct SimpleDeclaration {
    pub spec: TypeSpecifier,
    pub declarators: Vec<InitDeclarator>,
}

#[derive(Debug, Clone)]
pub struct InitDeclarator {
    pub declarator: Declarator,
    pub init: Option<InitializerAst>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum InitializerAst {
    /// `= expr`
    Copy(Expression),
    /// `(args...)`
    Direct(Vec<Expression>, Span),
}

/// Base type plus const qualification. `duplicate_const` preserves whether
/// `const` appeared more than once so elaboration can report it.
#[derive(Debug, Clone)]
pub struct TypeSpecifier {
    pub base: BaseTypeAst,
    pub is_const: bool,
    pub duplicate_const: bool,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BaseTypeAst {
    Void,
    Bool,
    Char,
    Int,
    Double,
    /// A class name
    Named(String),
}

/// Pointer/reference chain, name, and an optional array or function suffix.
///
/// The subset restricts declarators to the flat form
/// `*... [&] name ( [N] | (params) )?` — no parenthesized declarators, no
/// pointers to functions.
#[derive(Debug, Clone)]
pub struct Declarator {
    /// One entry per `*`, innermost first; true = `* const`
    pub pointers: Vec<bool>,
    pub is_reference: bool,
    pub name: Option<String>,
    pub suffix: Option<DeclaratorSuffix>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum DeclaratorSuffix {
    /// `[N]` with a literal length, or `[]` (unknown bound)
    Array(Option<ArrayLength>),
    /// `(params)`
    Function(Vec<ParamAst>),
}

#[derive(Debug, Clone)]
pub enum ArrayLength {
    Literal(usize, Span),
    /// Anything other than an integer literal; reported during elaboration
    Other(Span),
}

#[derive(Debug, Clone)]
pub struct ParamAst {
    pub spec: TypeSpecifier,
    pub declarator: Declarator,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct FunctionDefinitionAst {
    pub spec: TypeSpecifier,
    pub declarator: Declarator,
    pub is_virtual: bool,
    pub body: FunctionBodyAst,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum FunctionBodyAst {
    Block(BlockAst),
    /// A single `@marker;` — a native-backed library body
    Opaque { marker: String, span: Span },
}

#[derive(Debug, Clone)]
pub struct ClassDefinitionAst {
    pub name: String,
    pub base: Option<String>,
    pub members: Vec<MemberDeclAst>,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessSpecifier {
    Public,
    Private,
}

#[derive(Debug, Clone)]
pub struct MemberDeclAst {
    pub access: AccessSpecifier,
    pub kind: MemberDeclKind,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum MemberDeclKind {
    Field(SimpleDeclaration),
    /// Member function with a body
    Function(FunctionDefinitionAst),
    /// Member function prototype
    Prototype(SimpleDeclaration),
    Constructor(ConstructorAst),
    Destructor(DestructorAst),
}

#[derive(Debug, Clone)]
pub struct ConstructorAst {
    pub name: String,
    pub params: Vec<ParamAst>,
    pub member_inits: Vec<MemberInitAst>,
    pub body: FunctionBodyAst,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct MemberInitAst {
    pub name: String,
    pub args: Vec<Expression>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct DestructorAst {
    pub name: String,
    pub is_virtual: bool,
    pub body: FunctionBodyAst,
    pub span: Span,
}
