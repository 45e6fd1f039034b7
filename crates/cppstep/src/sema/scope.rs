//! Lexical scopes
//!
//! Scopes form a tree in a program-owned arena. A name in one scope binds at
//! most one object (variable), one overload group of functions, and one
//! class. Objects and functions displace a class bound to the same name; the
//! class stays reachable through [`ScopeArena::lookup_class`], which is how
//! `Point p;` still works after `int Point;` shadows the class name.
//!
//! Class scopes consult their base class scope before their lexical parent,
//! so members of a base are found before globals.

use std::collections::HashMap;

use crate::sema::entity::{EntityId, EntityRegistry};
use crate::types::FunctionType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(pub u32);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeKind {
    Global,
    Function,
    Block,
    Class { name: String },
}

#[derive(Debug, Default)]
struct ScopeEntry {
    object: Option<EntityId>,
    functions: Vec<EntityId>,
    class: Option<EntityId>,
}

#[derive(Debug)]
struct Scope {
    kind: ScopeKind,
    parent: Option<ScopeId>,
    /// Base class scope, consulted before `parent` (class scopes only)
    base: Option<ScopeId>,
    entries: HashMap<String, ScopeEntry>,
}

/// What a name resolved to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupOutcome {
    Variable(EntityId),
    Functions(Vec<EntityId>),
    Class(EntityId),
}

/// Result of introducing a variable into a scope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclareVariableOutcome {
    Added,
    /// Same-scope name already bound to an object
    AlreadyBound(EntityId),
    /// Same-scope name bound to a function group
    ClashesFunction,
}

/// Result of introducing a function into a scope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclareFunctionOutcome {
    Added,
    /// An overload with this exact signature already exists
    SameSignature(EntityId),
    /// Same-scope name bound to an object
    ClashesObject(EntityId),
}

#[derive(Debug, Default)]
pub struct ScopeArena {
    scopes: Vec<Scope>,
}

impl ScopeArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_scope(&mut self, kind: ScopeKind, parent: Option<ScopeId>) -> ScopeId {
        let id = ScopeId(self.scopes.len() as u32);
        self.scopes.push(Scope {
            kind,
            parent,
            base: None,
            entries: HashMap::new(),
        });
        id
    }

    pub fn set_base(&mut self, scope: ScopeId, base: ScopeId) {
        self.scopes[scope.0 as usize].base = Some(base);
    }

    pub fn kind(&self, scope: ScopeId) -> &ScopeKind {
        &self.scopes[scope.0 as usize].kind
    }

    pub fn parent(&self, scope: ScopeId) -> Option<ScopeId> {
        self.scopes[scope.0 as usize].parent
    }

    // ==================== declaration ====================

    pub fn declare_variable(
        &mut self,
        scope: ScopeId,
        name: &str,
        id: EntityId,
    ) -> DeclareVariableOutcome {
        let entry = self.entry_mut(scope, name);
        if let Some(existing) = entry.object {
            return DeclareVariableOutcome::AlreadyBound(existing);
        }
        if !entry.functions.is_empty() {
            return DeclareVariableOutcome::ClashesFunction;
        }
        entry.object = Some(id);
        DeclareVariableOutcome::Added
    }

    /// Rebind a name to a different entity after a merge decision. Used when
    /// a redeclaration is folded into an earlier entity.
    pub fn rebind_variable(&mut self, scope: ScopeId, name: &str, id: EntityId) {
        self.entry_mut(scope, name).object = Some(id);
    }

    pub fn declare_function(
        &mut self,
        scope: ScopeId,
        name: &str,
        id: EntityId,
        signature: &FunctionType,
        registry: &EntityRegistry,
    ) -> DeclareFunctionOutcome {
        // Signature scan happens against an immutable view first so the
        // registry borrow ends before the entry is mutated.
        let clash = self.scopes[scope.0 as usize]
            .entries
            .get(name)
            .and_then(|entry| {
                if let Some(obj) = entry.object {
                    return Some(DeclareFunctionOutcome::ClashesObject(obj));
                }
                entry.functions.iter().find_map(|&fid| {
                    let existing = registry.function(fid)?;
                    existing
                        .ty
                        .same_signature(signature)
                        .then_some(DeclareFunctionOutcome::SameSignature(fid))
                })
            });
        if let Some(outcome) = clash {
            return outcome;
        }
        self.entry_mut(scope, name).functions.push(id);
        DeclareFunctionOutcome::Added
    }

    /// Classes may coexist with objects and functions of the same name; a
    /// second class under the same name in the same scope is the caller's
    /// error to report.
    pub fn declare_class(&mut self, scope: ScopeId, name: &str, id: EntityId) -> Option<EntityId> {
        let entry = self.entry_mut(scope, name);
        match entry.class {
            Some(existing) => Some(existing),
            None => {
                entry.class = Some(id);
                None
            }
        }
    }

    fn entry_mut(&mut self, scope: ScopeId, name: &str) -> &mut ScopeEntry {
        self.scopes[scope.0 as usize]
            .entries
            .entry(name.to_string())
            .or_default()
    }

    // ==================== lookup ====================

    /// Walk from `scope` outward, returning the first binding for `name`.
    /// Objects and functions hide an equally named class.
    pub fn lookup(&self, scope: ScopeId, name: &str) -> Option<LookupOutcome> {
        let mut current = Some(scope);
        while let Some(id) = current {
            let s = &self.scopes[id.0 as usize];
            if let Some(entry) = s.entries.get(name) {
                if let Some(obj) = entry.object {
                    return Some(LookupOutcome::Variable(obj));
                }
                if !entry.functions.is_empty() {
                    return Some(LookupOutcome::Functions(entry.functions.clone()));
                }
                if let Some(class) = entry.class {
                    return Some(LookupOutcome::Class(class));
                }
            }
            current = s.base.or(s.parent);
        }
        None
    }

    /// Resolve `name` as a class, skipping objects and functions that hide it
    pub fn lookup_class(&self, scope: ScopeId, name: &str) -> Option<EntityId> {
        let mut current = Some(scope);
        while let Some(id) = current {
            let s = &self.scopes[id.0 as usize];
            if let Some(entry) = s.entries.get(name) {
                if let Some(class) = entry.class {
                    return Some(class);
                }
            }
            current = s.base.or(s.parent);
        }
        None
    }

    /// Find a function binding with an exact signature, in this scope only
    pub fn lookup_exact(
        &self,
        scope: ScopeId,
        name: &str,
        signature: &FunctionType,
        registry: &EntityRegistry,
    ) -> Option<EntityId> {
        let entry = self.scopes[scope.0 as usize].entries.get(name)?;
        entry.functions.iter().copied().find(|&fid| {
            registry
                .function(fid)
                .is_some_and(|f| f.ty.same_signature(signature))
        })
    }

    /// Bindings in this scope only, no outward walk
    pub fn lookup_local(&self, scope: ScopeId, name: &str) -> Option<LookupOutcome> {
        let entry = self.scopes[scope.0 as usize].entries.get(name)?;
        if let Some(obj) = entry.object {
            return Some(LookupOutcome::Variable(obj));
        }
        if !entry.functions.is_empty() {
            return Some(LookupOutcome::Functions(entry.functions.clone()));
        }
        entry.class.map(LookupOutcome::Class)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sema::entity::{Entity, EntityRegistry, StorageKind, VariableInfo};
    use crate::types::Type;

    fn var(reg: &mut EntityRegistry, name: &str) -> EntityId {
        reg.add(Entity::Variable(VariableInfo {
            name: name.into(),
            ty: Type::int(),
            storage: StorageKind::Local,
            declared_at: None,
            definition: None,
            resolved: true,
        }))
    }

    #[test]
    fn test_shadowing() {
        let mut reg = EntityRegistry::new();
        let mut scopes = ScopeArena::new();
        let global = scopes.new_scope(ScopeKind::Global, None);
        let inner = scopes.new_scope(ScopeKind::Block, Some(global));

        let outer_x = var(&mut reg, "x");
        let inner_x = var(&mut reg, "x");
        assert_eq!(
            scopes.declare_variable(global, "x", outer_x),
            DeclareVariableOutcome::Added
        );
        assert_eq!(
            scopes.declare_variable(inner, "x", inner_x),
            DeclareVariableOutcome::Added
        );

        assert_eq!(
            scopes.lookup(inner, "x"),
            Some(LookupOutcome::Variable(inner_x))
        );
        assert_eq!(
            scopes.lookup(global, "x"),
            Some(LookupOutcome::Variable(outer_x))
        );
    }

    #[test]
    fn test_same_scope_redefinition() {
        let mut reg = EntityRegistry::new();
        let mut scopes = ScopeArena::new();
        let global = scopes.new_scope(ScopeKind::Global, None);
        let first = var(&mut reg, "x");
        let second = var(&mut reg, "x");
        scopes.declare_variable(global, "x", first);
        assert_eq!(
            scopes.declare_variable(global, "x", second),
            DeclareVariableOutcome::AlreadyBound(first)
        );
    }

    #[test]
    fn test_variable_hides_class() {
        let mut reg = EntityRegistry::new();
        let mut scopes = ScopeArena::new();
        let global = scopes.new_scope(ScopeKind::Global, None);

        let class_id = reg.add(Entity::Class(crate::sema::entity::ClassInfo {
            name: "Point".into(),
            base: None,
            fields: vec![],
            size: 0,
            constructors: vec![],
            destructor: None,
            member_functions: vec![],
            complete: true,
            declared_at: None,
        }));
        assert!(scopes.declare_class(global, "Point", class_id).is_none());

        let v = var(&mut reg, "Point");
        scopes.declare_variable(global, "Point", v);

        // Plain lookup sees the variable; class lookup still finds the class.
        assert_eq!(
            scopes.lookup(global, "Point"),
            Some(LookupOutcome::Variable(v))
        );
        assert_eq!(scopes.lookup_class(global, "Point"), Some(class_id));
    }

    #[test]
    fn test_base_scope_before_parent() {
        let mut reg = EntityRegistry::new();
        let mut scopes = ScopeArena::new();
        let global = scopes.new_scope(ScopeKind::Global, None);
        let base_scope = scopes.new_scope(
            ScopeKind::Class {
                name: "Base".into(),
            },
            Some(global),
        );
        let derived_scope = scopes.new_scope(
            ScopeKind::Class {
                name: "Derived".into(),
            },
            Some(global),
        );
        scopes.set_base(derived_scope, base_scope);

        let global_m = var(&mut reg, "m");
        let base_m = var(&mut reg, "m");
        scopes.declare_variable(global, "m", global_m);
        scopes.declare_variable(base_scope, "m", base_m);

        assert_eq!(
            scopes.lookup(derived_scope, "m"),
            Some(LookupOutcome::Variable(base_m))
        );
    }
}
