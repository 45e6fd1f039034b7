//! Type system

mod cpp_type;

pub use cpp_type::{ClassInfoSource, FunctionType, Type, TypeKind};
