//! Semantic constructs
//!
//! A [`Construct`] is one node of the fully elaborated program: typed,
//! resolved, and annotated. Constructs live in a program-wide arena and refer
//! to each other by [`ConstructId`]; the simulator walks this arena directly,
//! so every payload here is exactly what stepping needs and nothing more.
//!
//! Elaboration never fails for a modeled language error. A bad construct is
//! still built, with `ok` cleared and a note attached; `ok` then propagates
//! into the aggregate queries the linker and driver use.

use crate::common::Span;
use crate::diagnostics::Note;
use crate::frontend::source::SourceRef;
use crate::sema::entity::EntityId;
use crate::types::Type;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConstructId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueCategory {
    Lvalue,
    Prvalue,
}

/// Type and value category of an expression construct
#[derive(Debug, Clone, PartialEq)]
pub struct ExprInfo {
    pub ty: Type,
    pub category: ValueCategory,
}

impl ExprInfo {
    pub fn lvalue(ty: Type) -> Self {
        Self {
            ty,
            category: ValueCategory::Lvalue,
        }
    }

    pub fn prvalue(ty: Type) -> Self {
        Self {
            ty,
            category: ValueCategory::Prvalue,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Shl,
    Shr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Less,
    Greater,
    LessEq,
    GreaterEq,
    Equal,
    NotEqual,
}

/// Standard conversions inserted by elaboration as explicit constructs, so
/// stepping shows each one.
#[derive(Debug, Clone, PartialEq)]
pub enum Conversion {
    /// Read the value out of an object
    LvalueToRvalue,
    ArrayToPointer,
    /// Arithmetic conversion to the given type
    Arithmetic(Type),
    /// Any scalar to bool
    ToBool,
    /// The literal 0 used as a null pointer of the given type
    NullPointer(Type),
    /// Pointer-to-derived becomes pointer-to-base
    DerivedToBase(String),
    /// Adding const at pointer or reference depth
    Qualification(Type),
}

/// Which subobject a constructor initializer targets
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemberInitTarget {
    Base(String),
    Field(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConstructKind {
    // ==================== declarations ====================
    /// Definition of a named object; `init` is an initializer construct
    VariableDefinition {
        entity: EntityId,
        init: Option<ConstructId>,
    },
    FunctionDefinition {
        entity: EntityId,
        params: Vec<EntityId>,
        /// Constructor base/member initializers, in initialization order
        ctor_inits: Vec<ConstructId>,
        body: ConstructId,
    },
    ClassDefinition {
        entity: EntityId,
    },
    /// Function declaration without a body; linking resolves it later
    FunctionPrototype {
        entity: EntityId,
    },
    /// Declaration that could not be given meaning (for example a void
    /// variable); kept so notes have a construct to hang off
    InvalidDeclaration,

    // ==================== initializers ====================
    /// Zero or constructor-default initialization of the contextual target
    DefaultInit {
        ty: Type,
        ctor: Option<EntityId>,
    },
    /// `= expr` or `(args...)` initialization of the contextual target
    DirectInit {
        ty: Type,
        args: Vec<ConstructId>,
        ctor: Option<EntityId>,
        /// True for the `= expr` spelling; affects display only
        copy_form: bool,
    },
    /// Bind a reference to the object designated by `source`
    ReferenceBind {
        source: ConstructId,
    },
    /// One `name(args)` entry of a constructor initializer list
    BaseOrMemberInit {
        target: MemberInitTarget,
        init: ConstructId,
    },

    // ==================== function bodies ====================
    /// Native-backed library body; the registry maps the marker at run time
    OpaqueBody {
        marker: String,
    },

    // ==================== statements ====================
    Block {
        statements: Vec<ConstructId>,
    },
    ExpressionStatement {
        expr: ConstructId,
    },
    DeclarationStatement {
        declarations: Vec<ConstructId>,
    },
    If {
        condition: ConstructId,
        then_branch: ConstructId,
        else_branch: Option<ConstructId>,
    },
    While {
        condition: ConstructId,
        body: ConstructId,
    },
    For {
        init: ConstructId,
        condition: Option<ConstructId>,
        post: Option<ConstructId>,
        body: ConstructId,
    },
    Return {
        value: Option<ConstructId>,
    },
    Break,
    Continue,
    NullStatement,

    // ==================== expressions ====================
    IntLiteral(i64),
    DoubleLiteral(f64),
    CharLiteral(char),
    BoolLiteral(bool),
    StringLiteral(String),
    /// Resolved use of a named object
    ObjectIdentifier {
        entity: EntityId,
        name: String,
    },
    This,
    Arithmetic {
        op: ArithOp,
        lhs: ConstructId,
        rhs: ConstructId,
    },
    Comparison {
        op: CompareOp,
        lhs: ConstructId,
        rhs: ConstructId,
    },
    LogicalAnd {
        lhs: ConstructId,
        rhs: ConstructId,
    },
    LogicalOr {
        lhs: ConstructId,
        rhs: ConstructId,
    },
    LogicalNot {
        operand: ConstructId,
    },
    Negate {
        operand: ConstructId,
    },
    UnaryPlus {
        operand: ConstructId,
    },
    Assignment {
        lhs: ConstructId,
        rhs: ConstructId,
    },
    IncDec {
        increment: bool,
        postfix: bool,
        operand: ConstructId,
    },
    /// Resolved call; member calls carry their receiver
    FunctionCall {
        function: EntityId,
        args: Vec<ConstructId>,
        receiver: Option<ConstructId>,
        /// Dispatch on the receiver's dynamic type
        is_virtual: bool,
    },
    Subscript {
        base: ConstructId,
        index: ConstructId,
    },
    MemberAccess {
        object: ConstructId,
        class: String,
        field: String,
    },
    Dereference {
        operand: ConstructId,
    },
    AddressOf {
        operand: ConstructId,
    },
    New {
        ty: Type,
        init: Option<ConstructId>,
    },
    NewArray {
        element: Type,
        length: ConstructId,
    },
    Delete {
        operand: ConstructId,
        array_form: bool,
    },
    ImplicitConversion {
        conversion: Conversion,
        operand: ConstructId,
    },
    /// Give a class prvalue a temporary object to live in
    MaterializeTemporary {
        operand: ConstructId,
    },
    /// Expression that could not be given meaning
    ErrorExpression,
}

impl ConstructKind {
    /// Child constructs in evaluation/inspection order
    pub fn children(&self) -> Vec<ConstructId> {
        use ConstructKind::*;
        match self {
            VariableDefinition { init, .. } => init.iter().copied().collect(),
            FunctionDefinition {
                ctor_inits, body, ..
            } => ctor_inits.iter().copied().chain([*body]).collect(),
            DefaultInit { .. } => Vec::new(),
            DirectInit { args, .. } => args.clone(),
            ReferenceBind { source } => vec![*source],
            BaseOrMemberInit { init, .. } => vec![*init],
            Block { statements } => statements.clone(),
            ExpressionStatement { expr } => vec![*expr],
            DeclarationStatement { declarations } => declarations.clone(),
            If {
                condition,
                then_branch,
                else_branch,
            } => {
                let mut v = vec![*condition, *then_branch];
                v.extend(else_branch.iter().copied());
                v
            }
            While { condition, body } => vec![*condition, *body],
            For {
                init,
                condition,
                post,
                body,
            } => {
                let mut v = vec![*init];
                v.extend(condition.iter().copied());
                v.extend(post.iter().copied());
                v.push(*body);
                v
            }
            Return { value } => value.iter().copied().collect(),
            Arithmetic { lhs, rhs, .. }
            | Comparison { lhs, rhs, .. }
            | LogicalAnd { lhs, rhs }
            | LogicalOr { lhs, rhs }
            | Assignment { lhs, rhs } => vec![*lhs, *rhs],
            LogicalNot { operand }
            | Negate { operand }
            | UnaryPlus { operand }
            | Dereference { operand }
            | AddressOf { operand }
            | IncDec { operand, .. }
            | ImplicitConversion { operand, .. }
            | MaterializeTemporary { operand } => vec![*operand],
            FunctionCall { args, receiver, .. } => {
                receiver.iter().copied().chain(args.iter().copied()).collect()
            }
            Subscript { base, index } => vec![*base, *index],
            MemberAccess { object, .. } => vec![*object],
            New { init, .. } => init.iter().copied().collect(),
            NewArray { length, .. } => vec![*length],
            Delete { operand, .. } => vec![*operand],
            ClassDefinition { .. }
            | FunctionPrototype { .. }
            | InvalidDeclaration
            | OpaqueBody { .. }
            | Break
            | Continue
            | NullStatement
            | IntLiteral(_)
            | DoubleLiteral(_)
            | CharLiteral(_)
            | BoolLiteral(_)
            | StringLiteral(_)
            | ObjectIdentifier { .. }
            | This
            | ErrorExpression => Vec::new(),
        }
    }

    pub fn is_statement(&self) -> bool {
        use ConstructKind::*;
        matches!(
            self,
            Block { .. }
                | ExpressionStatement { .. }
                | DeclarationStatement { .. }
                | If { .. }
                | While { .. }
                | For { .. }
                | Return { .. }
                | Break
                | Continue
                | NullStatement
        )
    }
}

#[derive(Debug, Clone)]
pub struct Construct {
    pub id: ConstructId,
    /// Location in the file the user wrote; absent for synthesized nodes
    pub source: Option<SourceRef>,
    pub kind: ConstructKind,
    /// Notes recorded against this construct specifically
    pub notes: Vec<Note>,
    /// False once any error note lands here
    pub ok: bool,
    /// Children in evaluation order, derived from the kind
    pub children: Vec<ConstructId>,
    /// Set for expression constructs only
    pub expr: Option<ExprInfo>,
    /// Span in preprocessed text, kept for stepping display
    pub span: Span,
}

impl Construct {
    pub fn expr_type(&self) -> Option<&Type> {
        self.expr.as_ref().map(|e| &e.ty)
    }

    pub fn category(&self) -> Option<ValueCategory> {
        self.expr.as_ref().map(|e| e.category)
    }
}

/// Program-owned construct arena. Ids are dense and allocated in elaboration
/// order; a parent is always allocated after its children.
#[derive(Debug, Default)]
pub struct ConstructArena {
    constructs: Vec<Construct>,
}

impl ConstructArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, kind: ConstructKind, span: Span, source: Option<SourceRef>) -> ConstructId {
        let id = ConstructId(self.constructs.len() as u32);
        let children = kind.children();
        self.constructs.push(Construct {
            id,
            source,
            kind,
            notes: Vec::new(),
            ok: true,
            children,
            expr: None,
            span,
        });
        id
    }

    pub fn add_expr(
        &mut self,
        kind: ConstructKind,
        info: ExprInfo,
        span: Span,
        source: Option<SourceRef>,
    ) -> ConstructId {
        let id = self.add(kind, span, source);
        self.constructs[id.0 as usize].expr = Some(info);
        id
    }

    pub fn get(&self, id: ConstructId) -> &Construct {
        &self.constructs[id.0 as usize]
    }

    pub fn get_mut(&mut self, id: ConstructId) -> &mut Construct {
        &mut self.constructs[id.0 as usize]
    }

    /// Attach a note; an error note clears `ok`
    pub fn note(&mut self, id: ConstructId, note: Note) {
        let construct = &mut self.constructs[id.0 as usize];
        if note.is_error() {
            construct.ok = false;
        }
        construct.notes.push(note);
    }

    pub fn mark_not_ok(&mut self, id: ConstructId) {
        self.constructs[id.0 as usize].ok = false;
    }

    /// True when this construct and every descendant is ok
    pub fn subtree_ok(&self, id: ConstructId) -> bool {
        let construct = self.get(id);
        construct.ok && construct.children.iter().all(|&c| self.subtree_ok(c))
    }

    /// All notes in this subtree, parent before children
    pub fn subtree_notes(&self, id: ConstructId) -> Vec<Note> {
        let construct = self.get(id);
        let mut notes = construct.notes.clone();
        for &child in &construct.children {
            notes.extend(self.subtree_notes(child));
        }
        notes
    }

    pub fn len(&self) -> usize {
        self.constructs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constructs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::{Note, NoteKind};
    use crate::frontend::source::SourceRef;

    #[test]
    fn test_children_follow_kind() {
        let mut arena = ConstructArena::new();
        let lit = arena.add_expr(
            ConstructKind::IntLiteral(1),
            ExprInfo::prvalue(crate::types::Type::int()),
            Span::new(0, 1),
            None,
        );
        let neg = arena.add_expr(
            ConstructKind::Negate { operand: lit },
            ExprInfo::prvalue(crate::types::Type::int()),
            Span::new(0, 2),
            None,
        );
        assert_eq!(arena.get(neg).children, vec![lit]);
    }

    #[test]
    fn test_error_note_clears_ok_and_propagates() {
        let mut arena = ConstructArena::new();
        let lit = arena.add_expr(
            ConstructKind::IntLiteral(1),
            ExprInfo::prvalue(crate::types::Type::int()),
            Span::new(0, 1),
            None,
        );
        let stmt = arena.add(
            ConstructKind::ExpressionStatement { expr: lit },
            Span::new(0, 2),
            None,
        );
        assert!(arena.subtree_ok(stmt));
        arena.note(
            lit,
            Note::error(
                NoteKind::Compiler,
                "expr.invalid",
                "bad",
                SourceRef::new("f.cpp", 1, 0, 1),
            ),
        );
        assert!(!arena.get(lit).ok);
        assert!(arena.get(stmt).ok);
        assert!(!arena.subtree_ok(stmt));
        assert_eq!(arena.subtree_notes(stmt).len(), 1);
    }
}
