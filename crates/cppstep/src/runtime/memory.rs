//! Simulated memory
//!
//! Memory is a map from opaque addresses to scalar cells. Arrays and class
//! objects decompose into independently addressable cells at fixed offsets,
//! so subscripts, field access, and pointer arithmetic all resolve to plain
//! address arithmetic exactly like the machine model being taught.
//!
//! Cells are never removed. Deallocation and frame teardown flip the
//! validity flag instead, so a stale pointer still designates the dead
//! cell and a read through it yields the stored junk rather than a crash.

use std::collections::{BTreeMap, HashMap};

use crate::sema::{EntityId, EntityRegistry};
use crate::types::{Type, TypeKind};

use crate::runtime::value::{Address, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Static,
    Local,
    Parameter,
    ReturnObject,
    Temporary,
    Heap,
    /// Field or element of a containing object
    Subobject,
}

/// One scalar cell of simulated memory
#[derive(Debug, Clone)]
pub struct MemObject {
    pub address: Address,
    pub ty: Type,
    pub kind: ObjectKind,
    pub name: Option<String>,
    pub value: Value,
    pub valid: bool,
}

/// One function activation: the entity → address map for its parameters and
/// locals, plus everything it must invalidate on teardown.
#[derive(Debug)]
pub struct Frame {
    pub function: EntityId,
    pub function_name: String,
    pub bindings: HashMap<EntityId, Address>,
    /// (address, size) extents this frame owns, in allocation order
    pub owned: Vec<(Address, usize)>,
    /// Class-typed locals with a destructor, in declaration order
    pub destructibles: Vec<(Address, EntityId)>,
    pub receiver: Option<Address>,
}

impl Frame {
    pub fn new(function: EntityId, function_name: String, receiver: Option<Address>) -> Self {
        Self {
            function,
            function_name,
            bindings: HashMap::new(),
            owned: Vec::new(),
            destructibles: Vec::new(),
            receiver,
        }
    }
}

/// All memory of one simulation: a bump allocator, the cell map, the frame
/// stack, and the live-heap table.
#[derive(Debug)]
pub struct Memory {
    cells: BTreeMap<Address, MemObject>,
    next_address: Address,
    frames: Vec<Frame>,
    /// Live heap allocations and their sizes
    heap: HashMap<Address, usize>,
    /// Static-storage objects by entity, filled before `main` runs
    statics: HashMap<EntityId, Address>,
    /// Most-derived class at each class-object address, for virtual dispatch
    dynamic_types: HashMap<Address, String>,
}

const FIRST_ADDRESS: Address = 0x1000;

impl Default for Memory {
    fn default() -> Self {
        Self::new()
    }
}

impl Memory {
    pub fn new() -> Self {
        Self {
            cells: BTreeMap::new(),
            next_address: FIRST_ADDRESS,
            frames: Vec::new(),
            heap: HashMap::new(),
            statics: HashMap::new(),
            dynamic_types: HashMap::new(),
        }
    }

    // ==================== allocation ====================

    /// Allocate an object of `ty`, decomposing aggregates into cells.
    /// Returns the object's address and size.
    pub fn allocate(
        &mut self,
        ty: &Type,
        kind: ObjectKind,
        name: Option<String>,
        entities: &EntityRegistry,
    ) -> (Address, usize) {
        let size = ty.size(entities).unwrap_or(1).max(1);
        let address = self.next_address;
        self.next_address += size as Address;
        self.place(address, ty, kind, name, entities);
        (address, size)
    }

    /// Lay an object of `ty` down at a fixed address.
    fn place(
        &mut self,
        address: Address,
        ty: &Type,
        kind: ObjectKind,
        name: Option<String>,
        entities: &EntityRegistry,
    ) {
        match &ty.kind {
            TypeKind::Array {
                element,
                length: Some(n),
            } => {
                let elem_size = element.size(entities).unwrap_or(1).max(1) as Address;
                for i in 0..*n {
                    let elem_name = name.as_ref().map(|base| format!("{base}[{i}]"));
                    self.place(
                        address + i as Address * elem_size,
                        element,
                        ObjectKind::Subobject,
                        elem_name,
                        entities,
                    );
                }
            }
            TypeKind::Class(class_name) => {
                // Most-derived wins: the outermost placement writes first.
                self.dynamic_types
                    .entry(address)
                    .or_insert_with(|| class_name.clone());
                self.place_class_fields(address, class_name, &name, entities);
                // An empty class still needs a cell so the object has
                // identity and validity.
                self.cells.entry(address).or_insert(MemObject {
                    address,
                    ty: ty.clone(),
                    kind,
                    name,
                    value: Value::Uninit,
                    valid: true,
                });
            }
            _ => {
                self.cells.insert(
                    address,
                    MemObject {
                        address,
                        ty: ty.clone(),
                        kind,
                        name,
                        value: Value::Uninit,
                        valid: true,
                    },
                );
            }
        }
    }

    /// Cells for every field of `class_name` and its base chain. The base
    /// subobject occupies offset 0, so field offsets are absolute.
    fn place_class_fields(
        &mut self,
        base_address: Address,
        class_name: &str,
        object_name: &Option<String>,
        entities: &EntityRegistry,
    ) {
        let mut current = Some(class_name.to_string());
        while let Some(cname) = current {
            let Some((_, class)) = entities.class_by_name(&cname) else {
                return;
            };
            let fields: Vec<_> = class
                .fields
                .iter()
                .map(|f| (f.name.clone(), f.ty.clone(), f.offset))
                .collect();
            current = class.base.clone();
            for (fname, fty, offset) in fields {
                let cell_name = match object_name {
                    Some(base) => Some(format!("{base}.{fname}")),
                    None => Some(fname),
                };
                // Reference members are a single pointer-sized cell; other
                // field types decompose recursively.
                if fty.is_reference() {
                    self.cells.insert(
                        base_address + offset as Address,
                        MemObject {
                            address: base_address + offset as Address,
                            ty: fty,
                            kind: ObjectKind::Subobject,
                            name: cell_name,
                            value: Value::Uninit,
                            valid: true,
                        },
                    );
                } else {
                    self.place(
                        base_address + offset as Address,
                        &fty,
                        ObjectKind::Subobject,
                        cell_name,
                        entities,
                    );
                }
            }
        }
    }

    /// Allocate `count` objects of `ty` contiguously on the heap.
    pub fn allocate_heap(
        &mut self,
        ty: &Type,
        count: usize,
        entities: &EntityRegistry,
    ) -> Address {
        let elem_size = ty.size(entities).unwrap_or(1).max(1);
        let count = count.max(1);
        let total = elem_size * count;
        let address = self.next_address;
        self.next_address += total as Address;
        for i in 0..count {
            self.place(
                address + (i * elem_size) as Address,
                ty,
                ObjectKind::Heap,
                None,
                entities,
            );
        }
        self.heap.insert(address, total);
        address
    }

    /// Free a heap allocation. `Err` distinguishes the two misuse cases the
    /// simulation reports: freeing something never allocated (or an interior
    /// address), and freeing twice.
    pub fn deallocate_heap(&mut self, address: Address) -> Result<(), HeapFreeError> {
        let Some(size) = self.heap.remove(&address) else {
            let was_heap = self
                .cells
                .get(&address)
                .is_some_and(|o| o.kind == ObjectKind::Heap);
            return Err(if was_heap {
                HeapFreeError::DoubleFree
            } else {
                HeapFreeError::NotAllocation
            });
        };
        self.invalidate_range(address, size);
        Ok(())
    }

    pub fn invalidate_range(&mut self, start: Address, len: usize) {
        for (_, cell) in self.cells.range_mut(start..start + len as Address) {
            cell.valid = false;
        }
    }

    // ==================== access ====================

    pub fn object(&self, address: Address) -> Option<&MemObject> {
        self.cells.get(&address)
    }

    /// Read the scalar at `address`. `Ok` carries the value; `Err` carries
    /// what was wrong with the read (and the junk left behind, for dead
    /// cells).
    pub fn read(&self, address: Address) -> Result<Value, InvalidRead> {
        match self.cells.get(&address) {
            None => Err(InvalidRead::NoObject),
            Some(cell) if !cell.valid => Err(InvalidRead::Dead(cell.value)),
            Some(cell) if cell.value.is_uninit() => Err(InvalidRead::Uninitialized),
            Some(cell) => Ok(cell.value),
        }
    }

    /// Write the scalar at `address`. Returns false when no cell lives
    /// there (an out-of-range or wild write).
    pub fn write(&mut self, address: Address, value: Value) -> bool {
        match self.cells.get_mut(&address) {
            Some(cell) => {
                cell.value = value;
                cell.valid = true;
                true
            }
            None => false,
        }
    }

    pub fn is_valid(&self, address: Address) -> bool {
        self.cells.get(&address).is_some_and(|o| o.valid)
    }

    pub fn dynamic_type(&self, address: Address) -> Option<&str> {
        self.dynamic_types.get(&address).map(String::as_str)
    }

    pub fn set_dynamic_type(&mut self, address: Address, class: &str) {
        self.dynamic_types.insert(address, class.to_string());
    }

    /// Scalar cells in address order, for dumps and tests
    pub fn objects(&self) -> impl Iterator<Item = &MemObject> {
        self.cells.values()
    }

    // ==================== frames ====================

    pub fn push_frame(&mut self, frame: Frame) {
        self.frames.push(frame);
    }

    /// Pop the current frame and invalidate everything it owned.
    pub fn pop_frame(&mut self) -> Option<Frame> {
        let frame = self.frames.pop()?;
        for &(address, size) in &frame.owned {
            self.invalidate_range(address, size);
        }
        Some(frame)
    }

    pub fn current_frame(&self) -> Option<&Frame> {
        self.frames.last()
    }

    pub fn current_frame_mut(&mut self) -> Option<&mut Frame> {
        self.frames.last_mut()
    }

    pub fn frame_depth(&self) -> usize {
        self.frames.len()
    }

    /// Address of `entity` in the current frame or static storage
    pub fn address_of(&self, entity: EntityId) -> Option<Address> {
        if let Some(frame) = self.frames.last() {
            if let Some(&address) = frame.bindings.get(&entity) {
                return Some(address);
            }
        }
        self.statics.get(&entity).copied()
    }

    pub fn bind_static(&mut self, entity: EntityId, address: Address) {
        self.statics.insert(entity, address);
    }

    pub fn static_address(&self, entity: EntityId) -> Option<Address> {
        self.statics.get(&entity).copied()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeapFreeError {
    DoubleFree,
    NotAllocation,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InvalidRead {
    /// Nothing was ever allocated at this address
    NoObject,
    /// The cell's object died; the junk left behind is still readable
    Dead(Value),
    Uninitialized,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::ast::AccessSpecifier;
    use crate::sema::{ClassInfo, Entity, FieldInfo};

    fn registry_with_point() -> EntityRegistry {
        let mut reg = EntityRegistry::new();
        reg.add(Entity::Class(ClassInfo {
            name: "Point".into(),
            base: None,
            fields: vec![
                FieldInfo {
                    name: "x".into(),
                    ty: Type::int(),
                    offset: 0,
                    access: AccessSpecifier::Public,
                },
                FieldInfo {
                    name: "y".into(),
                    ty: Type::int(),
                    offset: 4,
                    access: AccessSpecifier::Public,
                },
            ],
            size: 8,
            constructors: vec![],
            destructor: None,
            member_functions: vec![],
            complete: true,
            declared_at: None,
        }));
        reg
    }

    #[test]
    fn test_scalar_roundtrip() {
        let reg = EntityRegistry::new();
        let mut mem = Memory::new();
        let (a, size) = mem.allocate(&Type::int(), ObjectKind::Local, Some("x".into()), &reg);
        assert_eq!(size, 4);
        assert!(matches!(mem.read(a), Err(InvalidRead::Uninitialized)));
        assert!(mem.write(a, Value::Int(42)));
        assert_eq!(mem.read(a), Ok(Value::Int(42)));
    }

    #[test]
    fn test_array_cells_are_addressable() {
        let reg = EntityRegistry::new();
        let mut mem = Memory::new();
        let (a, _) = mem.allocate(
            &Type::int().array_of(Some(3)),
            ObjectKind::Local,
            Some("arr".into()),
            &reg,
        );
        for i in 0..3 {
            assert!(mem.write(a + i * 4, Value::Int(i as i64)));
        }
        assert_eq!(mem.read(a + 8), Ok(Value::Int(2)));
        assert_eq!(mem.object(a + 4).unwrap().name.as_deref(), Some("arr[1]"));
        // No cell exists past the last element.
        assert!(mem.object(a + 12).is_none());
    }

    #[test]
    fn test_class_fields_at_offsets() {
        let reg = registry_with_point();
        let mut mem = Memory::new();
        let (a, _) = mem.allocate(&Type::class("Point"), ObjectKind::Local, Some("p".into()), &reg);
        assert!(mem.write(a, Value::Int(1)));
        assert!(mem.write(a + 4, Value::Int(2)));
        assert_eq!(mem.read(a + 4), Ok(Value::Int(2)));
        assert_eq!(mem.object(a + 4).unwrap().name.as_deref(), Some("p.y"));
        assert_eq!(mem.dynamic_type(a), Some("Point"));
    }

    #[test]
    fn test_heap_free_and_double_free() {
        let reg = EntityRegistry::new();
        let mut mem = Memory::new();
        let a = mem.allocate_heap(&Type::int(), 1, &reg);
        mem.write(a, Value::Int(9));
        assert_eq!(mem.deallocate_heap(a), Ok(()));
        // The junk survives; the cell is just dead.
        assert_eq!(mem.read(a), Err(InvalidRead::Dead(Value::Int(9))));
        assert_eq!(mem.deallocate_heap(a), Err(HeapFreeError::DoubleFree));
        assert_eq!(
            mem.deallocate_heap(a + 1),
            Err(HeapFreeError::NotAllocation)
        );
    }

    #[test]
    fn test_frame_teardown_invalidates_locals() {
        let reg = EntityRegistry::new();
        let mut mem = Memory::new();
        mem.push_frame(Frame::new(EntityId(0), "f".into(), None));
        let (a, size) = mem.allocate(&Type::int(), ObjectKind::Local, Some("x".into()), &reg);
        mem.write(a, Value::Int(5));
        mem.current_frame_mut().unwrap().owned.push((a, size));
        mem.pop_frame();
        assert!(!mem.is_valid(a));
        assert_eq!(mem.read(a), Err(InvalidRead::Dead(Value::Int(5))));
    }
}
