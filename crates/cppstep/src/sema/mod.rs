//! Semantic elaboration
//!
//! Turns parsed syntax into fully typed, annotated constructs. Elaboration is
//! tolerant: a modeled language error marks the offending construct not-ok
//! and records a note, but elaboration always produces a construct tree.

pub mod compiler;
pub mod construct;
pub mod entity;
pub mod expressions;
pub mod scope;
pub mod statements;

pub use compiler::{CompileContext, UnitCompiler};
pub use construct::{
    ArithOp, CompareOp, Construct, ConstructArena, ConstructId, ConstructKind, Conversion,
    ExprInfo, MemberInitTarget, ValueCategory,
};
pub use entity::{
    ClassInfo, Entity, EntityId, EntityRegistry, FieldInfo, FunctionBodyKind, FunctionInfo,
    StorageKind, VariableInfo,
};
pub use scope::{LookupOutcome, ScopeArena, ScopeId, ScopeKind};
