//! Entity registry
//!
//! Every named thing a program declares (variables, functions, classes) gets
//! one [`Entity`] in a program-wide registry and is referred to by its
//! [`EntityId`] everywhere else. Linking resolves declarations by mutating
//! registry entries in place; nothing outside the registry holds entity data.

use crate::frontend::ast::AccessSpecifier;
use crate::frontend::source::SourceRef;
use crate::sema::construct::ConstructId;
use crate::types::{ClassInfoSource, FunctionType, Type};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    /// Globals; one object for the whole run
    Static,
    Local,
    Parameter,
    /// Subobject of a class object
    Member,
}

#[derive(Debug, Clone)]
pub struct VariableInfo {
    pub name: String,
    pub ty: Type,
    pub storage: StorageKind,
    pub declared_at: Option<SourceRef>,
    /// For statics: the defining initializer construct, filled by linking
    pub definition: Option<ConstructId>,
    /// External declarations start unresolved; locals are born resolved
    pub resolved: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionBodyKind {
    /// Simulated statement body
    Block,
    /// Native-backed library body, carries its marker via the definition
    Opaque,
    /// Declared but not (yet) defined
    None,
}

#[derive(Debug, Clone)]
pub struct FunctionInfo {
    pub name: String,
    /// `::name` for free functions, `Class::name` for members
    pub qualified_name: String,
    pub ty: FunctionType,
    pub member_of: Option<String>,
    pub is_virtual: bool,
    pub is_constructor: bool,
    pub is_destructor: bool,
    pub declared_at: Option<SourceRef>,
    pub body_kind: FunctionBodyKind,
    /// The FunctionDefinition construct, filled by linking (or immediately
    /// for definitions)
    pub definition: Option<ConstructId>,
    pub param_names: Vec<String>,
}

impl FunctionInfo {
    pub fn is_defined(&self) -> bool {
        self.definition.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct FieldInfo {
    pub name: String,
    pub ty: Type,
    pub offset: usize,
    pub access: AccessSpecifier,
}

#[derive(Debug, Clone)]
pub struct ClassInfo {
    pub name: String,
    pub base: Option<String>,
    /// Declared order; base subobject (if any) sits before offset 0 fields
    pub fields: Vec<FieldInfo>,
    pub size: usize,
    pub constructors: Vec<EntityId>,
    pub destructor: Option<EntityId>,
    pub member_functions: Vec<EntityId>,
    pub complete: bool,
    pub declared_at: Option<SourceRef>,
}

impl ClassInfo {
    pub fn field(&self, name: &str) -> Option<&FieldInfo> {
        self.fields.iter().find(|f| f.name == name)
    }
}

#[derive(Debug, Clone)]
pub enum Entity {
    Variable(VariableInfo),
    Function(FunctionInfo),
    Class(ClassInfo),
}

impl Entity {
    pub fn name(&self) -> &str {
        match self {
            Entity::Variable(v) => &v.name,
            Entity::Function(f) => &f.name,
            Entity::Class(c) => &c.name,
        }
    }
}

/// Program-wide entity arena. Ids are dense indices; allocation order is
/// elaboration order, which keeps note output stable.
#[derive(Debug, Default)]
pub struct EntityRegistry {
    entities: Vec<Entity>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, entity: Entity) -> EntityId {
        let id = EntityId(self.entities.len() as u32);
        self.entities.push(entity);
        id
    }

    pub fn get(&self, id: EntityId) -> &Entity {
        &self.entities[id.0 as usize]
    }

    pub fn get_mut(&mut self, id: EntityId) -> &mut Entity {
        &mut self.entities[id.0 as usize]
    }

    pub fn variable(&self, id: EntityId) -> Option<&VariableInfo> {
        match self.get(id) {
            Entity::Variable(v) => Some(v),
            _ => None,
        }
    }

    pub fn variable_mut(&mut self, id: EntityId) -> Option<&mut VariableInfo> {
        match self.get_mut(id) {
            Entity::Variable(v) => Some(v),
            _ => None,
        }
    }

    pub fn function(&self, id: EntityId) -> Option<&FunctionInfo> {
        match self.get(id) {
            Entity::Function(f) => Some(f),
            _ => None,
        }
    }

    pub fn function_mut(&mut self, id: EntityId) -> Option<&mut FunctionInfo> {
        match self.get_mut(id) {
            Entity::Function(f) => Some(f),
            _ => None,
        }
    }

    pub fn class(&self, id: EntityId) -> Option<&ClassInfo> {
        match self.get(id) {
            Entity::Class(c) => Some(c),
            _ => None,
        }
    }

    pub fn class_mut(&mut self, id: EntityId) -> Option<&mut ClassInfo> {
        match self.get_mut(id) {
            Entity::Class(c) => Some(c),
            _ => None,
        }
    }

    pub fn class_by_name(&self, name: &str) -> Option<(EntityId, &ClassInfo)> {
        self.entities.iter().enumerate().find_map(|(i, e)| match e {
            Entity::Class(c) if c.name == name => Some((EntityId(i as u32), c)),
            _ => None,
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = (EntityId, &Entity)> {
        self.entities
            .iter()
            .enumerate()
            .map(|(i, e)| (EntityId(i as u32), e))
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

impl ClassInfoSource for EntityRegistry {
    fn class_size(&self, name: &str) -> Option<usize> {
        let (_, class) = self.class_by_name(name)?;
        class.complete.then_some(class.size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_roundtrip() {
        let mut reg = EntityRegistry::new();
        let id = reg.add(Entity::Variable(VariableInfo {
            name: "x".into(),
            ty: Type::int(),
            storage: StorageKind::Local,
            declared_at: None,
            definition: None,
            resolved: true,
        }));
        assert_eq!(reg.variable(id).unwrap().name, "x");
        assert!(reg.function(id).is_none());
    }

    #[test]
    fn test_class_info_source() {
        let mut reg = EntityRegistry::new();
        reg.add(Entity::Class(ClassInfo {
            name: "Point".into(),
            base: None,
            fields: vec![],
            size: 8,
            constructors: vec![],
            destructor: None,
            member_functions: vec![],
            complete: true,
            declared_at: None,
        }));
        assert_eq!(reg.class_size("Point"), Some(8));
        assert_eq!(reg.class_size("Other"), None);
        assert!(Type::class("Point").is_complete(&reg));
    }
}
