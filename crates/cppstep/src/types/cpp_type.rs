//! Types for the simulated language
//!
//! Types are immutable values compared structurally. Class types carry only
//! the class name; anything that depends on the class body (size, layout,
//! completeness) goes through a [`ClassInfoSource`] so the type itself never
//! holds a reference into the registry.

use std::fmt;

/// Sizes are in abstract memory units, chosen to keep addresses readable
/// when stepping rather than to match any real ABI.
pub const POINTER_SIZE: usize = 8;

/// Answers class-body questions for [`Type`] queries. Implemented by the
/// class registry; tests can implement it with a fixed table.
pub trait ClassInfoSource {
    /// Size of a complete class, or `None` while only declared
    fn class_size(&self, name: &str) -> Option<usize>;

    fn is_class_complete(&self, name: &str) -> bool {
        self.class_size(name).is_some()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Type {
    pub kind: TypeKind,
    pub is_const: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TypeKind {
    Void,
    Bool,
    Char,
    Int,
    Double,
    Pointer(Box<Type>),
    /// References never nest and are never pointed to; the declarator
    /// grammar enforces that before a reference type is ever built.
    Reference(Box<Type>),
    Array {
        element: Box<Type>,
        /// `None` for an array of unknown bound (incomplete)
        length: Option<usize>,
    },
    Class(String),
    Function(Box<FunctionType>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionType {
    pub return_type: Type,
    pub params: Vec<Type>,
}

impl Type {
    pub fn new(kind: TypeKind, is_const: bool) -> Self {
        Self { kind, is_const }
    }

    pub fn void() -> Self {
        Self::new(TypeKind::Void, false)
    }

    pub fn bool_() -> Self {
        Self::new(TypeKind::Bool, false)
    }

    pub fn char_() -> Self {
        Self::new(TypeKind::Char, false)
    }

    pub fn int() -> Self {
        Self::new(TypeKind::Int, false)
    }

    pub fn double() -> Self {
        Self::new(TypeKind::Double, false)
    }

    pub fn class(name: impl Into<String>) -> Self {
        Self::new(TypeKind::Class(name.into()), false)
    }

    pub fn pointer_to(self) -> Self {
        Self::new(TypeKind::Pointer(Box::new(self)), false)
    }

    pub fn reference_to(self) -> Self {
        Self::new(TypeKind::Reference(Box::new(self)), false)
    }

    pub fn array_of(self, length: Option<usize>) -> Self {
        Self::new(
            TypeKind::Array {
                element: Box::new(self),
                length,
            },
            false,
        )
    }

    pub fn function(return_type: Type, params: Vec<Type>) -> Self {
        Self::new(
            TypeKind::Function(Box::new(FunctionType {
                return_type,
                params,
            })),
            false,
        )
    }

    pub fn with_const(mut self) -> Self {
        self.is_const = true;
        self
    }

    pub fn without_const(mut self) -> Self {
        self.is_const = false;
        self
    }

    // ==================== queries ====================

    pub fn is_void(&self) -> bool {
        matches!(self.kind, TypeKind::Void)
    }

    pub fn is_bool(&self) -> bool {
        matches!(self.kind, TypeKind::Bool)
    }

    pub fn is_integral(&self) -> bool {
        matches!(self.kind, TypeKind::Bool | TypeKind::Char | TypeKind::Int)
    }

    pub fn is_arithmetic(&self) -> bool {
        self.is_integral() || matches!(self.kind, TypeKind::Double)
    }

    pub fn is_pointer(&self) -> bool {
        matches!(self.kind, TypeKind::Pointer(_))
    }

    pub fn is_reference(&self) -> bool {
        matches!(self.kind, TypeKind::Reference(_))
    }

    pub fn is_array(&self) -> bool {
        matches!(self.kind, TypeKind::Array { .. })
    }

    pub fn is_class(&self) -> bool {
        matches!(self.kind, TypeKind::Class(_))
    }

    pub fn is_function(&self) -> bool {
        matches!(self.kind, TypeKind::Function(_))
    }

    pub fn class_name(&self) -> Option<&str> {
        match &self.kind {
            TypeKind::Class(name) => Some(name),
            _ => None,
        }
    }

    /// Pointee, array element, or referent
    pub fn element_type(&self) -> Option<&Type> {
        match &self.kind {
            TypeKind::Pointer(inner) | TypeKind::Reference(inner) => Some(inner),
            TypeKind::Array { element, .. } => Some(element),
            _ => None,
        }
    }

    pub fn function_type(&self) -> Option<&FunctionType> {
        match &self.kind {
            TypeKind::Function(f) => Some(f),
            _ => None,
        }
    }

    /// The type a reference binds as; identity for non-references
    pub fn strip_reference(&self) -> &Type {
        match &self.kind {
            TypeKind::Reference(inner) => inner,
            _ => self,
        }
    }

    /// Array-to-pointer decay; identity for everything else
    pub fn decayed(&self) -> Type {
        match &self.kind {
            TypeKind::Array { element, .. } => element.as_ref().clone().pointer_to(),
            _ => self.clone(),
        }
    }

    /// Structural sameness ignoring top-level const only
    pub fn same_ignoring_top_const(&self, other: &Type) -> bool {
        self.kind == other.kind
    }

    /// Whether objects of this type can exist (have a known size)
    pub fn is_complete(&self, classes: &dyn ClassInfoSource) -> bool {
        match &self.kind {
            TypeKind::Void | TypeKind::Function(_) => false,
            TypeKind::Array { element, length } => {
                length.is_some() && element.is_complete(classes)
            }
            TypeKind::Class(name) => classes.is_class_complete(name),
            TypeKind::Reference(_) => true,
            _ => true,
        }
    }

    /// Object size in memory units; `None` for incomplete types
    pub fn size(&self, classes: &dyn ClassInfoSource) -> Option<usize> {
        match &self.kind {
            TypeKind::Void | TypeKind::Function(_) => None,
            TypeKind::Bool | TypeKind::Char => Some(1),
            TypeKind::Int => Some(4),
            TypeKind::Double => Some(8),
            TypeKind::Pointer(_) | TypeKind::Reference(_) => Some(POINTER_SIZE),
            TypeKind::Array { element, length } => {
                let len = (*length)?;
                Some(element.size(classes)? * len)
            }
            TypeKind::Class(name) => classes.class_size(name),
        }
    }
}

impl FunctionType {
    /// Signature comparison for overload and one-definition checks.
    /// Top-level const on parameters does not participate; return types are
    /// not part of a signature.
    pub fn same_signature(&self, other: &FunctionType) -> bool {
        self.params.len() == other.params.len()
            && self
                .params
                .iter()
                .zip(&other.params)
                .all(|(a, b)| a.same_ignoring_top_const(b))
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_const && !self.is_array() {
            write!(f, "const ")?;
        }
        match &self.kind {
            TypeKind::Void => write!(f, "void"),
            TypeKind::Bool => write!(f, "bool"),
            TypeKind::Char => write!(f, "char"),
            TypeKind::Int => write!(f, "int"),
            TypeKind::Double => write!(f, "double"),
            TypeKind::Pointer(inner) => write!(f, "{inner}*"),
            TypeKind::Reference(inner) => write!(f, "{inner}&"),
            TypeKind::Array { element, length } => match length {
                Some(n) => write!(f, "{element}[{n}]"),
                None => write!(f, "{element}[]"),
            },
            TypeKind::Class(name) => write!(f, "{name}"),
            TypeKind::Function(func) => {
                write!(f, "{}(", func.return_type)?;
                for (i, p) in func.params.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{p}")?;
                }
                write!(f, ")")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct FakeClasses(HashMap<String, usize>);

    impl ClassInfoSource for FakeClasses {
        fn class_size(&self, name: &str) -> Option<usize> {
            self.0.get(name).copied()
        }
    }

    fn classes() -> FakeClasses {
        let mut map = HashMap::new();
        map.insert("Point".to_string(), 8);
        FakeClasses(map)
    }

    #[test]
    fn test_structural_equality() {
        assert_eq!(Type::int().pointer_to(), Type::int().pointer_to());
        assert_ne!(Type::int().pointer_to(), Type::double().pointer_to());
        assert_ne!(Type::int(), Type::int().with_const());
        assert!(Type::int().same_ignoring_top_const(&Type::int().with_const()));
    }

    #[test]
    fn test_sizes() {
        let c = classes();
        assert_eq!(Type::int().size(&c), Some(4));
        assert_eq!(Type::int().array_of(Some(3)).size(&c), Some(12));
        assert_eq!(Type::int().array_of(None).size(&c), None);
        assert_eq!(Type::class("Point").size(&c), Some(8));
        assert_eq!(Type::class("List").size(&c), None);
        assert_eq!(Type::void().size(&c), None);
    }

    #[test]
    fn test_completeness() {
        let c = classes();
        assert!(Type::class("Point").is_complete(&c));
        assert!(!Type::class("List").is_complete(&c));
        // A pointer to an incomplete class is itself complete.
        assert!(Type::class("List").pointer_to().is_complete(&c));
        assert!(!Type::int().array_of(None).is_complete(&c));
    }

    #[test]
    fn test_decay() {
        let arr = Type::int().array_of(Some(4));
        assert_eq!(arr.decayed(), Type::int().pointer_to());
        assert_eq!(Type::double().decayed(), Type::double());
    }

    #[test]
    fn test_signatures() {
        let f1 = FunctionType {
            return_type: Type::int(),
            params: vec![Type::int(), Type::double()],
        };
        let f2 = FunctionType {
            return_type: Type::void(),
            params: vec![Type::int().with_const(), Type::double()],
        };
        let f3 = FunctionType {
            return_type: Type::int(),
            params: vec![Type::int()],
        };
        assert!(f1.same_signature(&f2));
        assert!(!f1.same_signature(&f3));
    }

    #[test]
    fn test_display() {
        assert_eq!(Type::int().with_const().to_string(), "const int");
        assert_eq!(Type::char_().pointer_to().to_string(), "char*");
        assert_eq!(Type::int().array_of(Some(5)).to_string(), "int[5]");
        assert_eq!(Type::class("Point").reference_to().to_string(), "Point&");
    }
}
