//! The stepping engine
//!
//! A [`Simulation`] executes a linked [`Program`] one visible step at a
//! time. Execution state is an explicit stack of [`RuntimeConstruct`]s, one
//! per construct currently being evaluated. Each call to [`Simulation::step`]
//! first drains readiness checks — the top node names the child it needs
//! next, which is pushed, repeatedly — and then performs exactly one atomic
//! effect on the (new) top node: a memory write, an output, a computed
//! value, a frame push.
//!
//! Abrupt control transfer (`return`, `break`, `continue`) never unwinds the
//! host stack: the runtime node records an [`Unwind`] marker, and nodes
//! between it and the stopping construct drain their cleanup obligations
//! (destructor calls, one visible step each) as they pop.

use std::collections::{HashMap, VecDeque};

use crate::program::Program;
use crate::runtime::events::{EventQueue, SimEvent};
use crate::runtime::memory::{Frame, Memory, ObjectKind};
use crate::runtime::value::{Address, Value};
use crate::sema::{ConstructId, ConstructKind, EntityId, FunctionBodyKind};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Status {
    /// The next `step` will make progress
    Ready,
    /// Blocked on `cin`; call [`Simulation::provide_input`]
    AwaitingInput,
    Finished {
        exit_code: i64,
    },
    /// Ended by fatal modeled undefined behavior
    Aborted,
}

/// What evaluating one runtime construct produced
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Eval {
    /// A prvalue
    Value(Value),
    /// An lvalue: the address of the designated object
    Object(Address),
    /// Statements and void expressions
    None,
}

impl Eval {
    pub fn value(&self) -> Value {
        match self {
            Eval::Value(v) => *v,
            Eval::Object(a) => Value::Pointer(*a),
            Eval::None => Value::Uninit,
        }
    }

    pub fn address(&self) -> Address {
        match self {
            Eval::Object(a) => *a,
            Eval::Value(v) => v.as_address(),
            Eval::None => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unwind {
    Return,
    Break,
    Continue,
}

#[derive(Debug, Clone)]
pub enum RuntimeKind {
    /// Executing one compiled construct
    Construct(ConstructId),
    /// A resolved call with evaluated arguments: frame setup, parameter
    /// copies, control transfer, return binding, teardown
    Invoke {
        function: EntityId,
        object: Option<Address>,
        args: Vec<Eval>,
    },
    /// Synthesized destructor invocation during cleanup
    DestructorCall {
        function: EntityId,
        object: Address,
    },
    /// Bottom-of-stack node: static initializers, then `main`
    Startup,
}

/// One node of the runtime stack
#[derive(Debug)]
pub struct RuntimeConstruct {
    pub id: u32,
    pub kind: RuntimeKind,
    /// Per-kind stage counter for effect phases
    pub phase: u32,
    /// Results of completed children, in completion order
    pub results: Vec<Eval>,
    /// Address an initializer construct initializes into
    pub target: Option<Address>,
    /// Destructor obligations, drained in reverse before this node pops
    pub cleanup: Vec<(Address, EntityId)>,
    /// Temporary-arena watermark for full-expression owners
    pub temp_baseline: usize,
    /// Set on Invoke nodes by an executing `return`
    pub pending_return: Option<Eval>,
    /// Final result, parked here while cleanup drains
    pub done: Option<Eval>,
    /// Abrupt transfer passing through this node
    pub aborting: Option<Unwind>,
}

/// A live full-expression temporary: address, extent, optional destructor
#[derive(Debug, Clone, Copy)]
pub(crate) struct Temporary {
    pub address: Address,
    pub size: usize,
    pub destructor: Option<EntityId>,
}

/// Whitespace-token input buffer feeding `cin`
#[derive(Debug, Default)]
pub struct InputBuffer {
    tokens: VecDeque<String>,
}

impl InputBuffer {
    pub fn push_line(&mut self, line: &str) {
        for tok in line.split_whitespace() {
            self.tokens.push_back(tok.to_string());
        }
    }

    pub fn next_token(&mut self) -> Option<String> {
        self.tokens.pop_front()
    }

    /// Take one character, leaving the rest of its token in place
    pub fn next_char(&mut self) -> Option<char> {
        let tok = self.tokens.pop_front()?;
        let mut chars = tok.chars();
        let c = chars.next()?;
        let rest: String = chars.collect();
        if !rest.is_empty() {
            self.tokens.push_front(rest);
        }
        Some(c)
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

pub struct Simulation<'p> {
    pub(crate) program: &'p Program,
    pub(crate) memory: Memory,
    pub(crate) stack: Vec<RuntimeConstruct>,
    pub(crate) events: EventQueue,
    pub(crate) input: InputBuffer,
    pub(crate) temporaries: Vec<Temporary>,
    /// Lazily allocated backing arrays for string literals, per construct
    pub(crate) string_literals: HashMap<ConstructId, Address>,
    /// Deterministic state for the bundled `rand`
    pub(crate) rng_state: u64,
    pub(crate) stdout: String,
    status: Status,
    steps: u64,
    next_runtime_id: u32,
    /// Static initializers in link order, consumed by the Startup node
    pub(crate) global_inits: Vec<ConstructId>,
}

impl<'p> Simulation<'p> {
    /// Build a simulation positioned before the first step: static storage
    /// allocated, the startup node on the stack.
    ///
    /// Precondition: `program.is_runnable()`. A non-runnable program yields
    /// a simulation already `Aborted`.
    pub fn new(program: &'p Program) -> Self {
        let mut sim = Self {
            program,
            memory: Memory::new(),
            stack: Vec::new(),
            events: EventQueue::new(),
            input: InputBuffer::default(),
            temporaries: Vec::new(),
            string_literals: HashMap::new(),
            rng_state: 1,
            stdout: String::new(),
            status: Status::Ready,
            steps: 0,
            next_runtime_id: 0,
            global_inits: Vec::new(),
        };

        if !program.is_runnable() {
            sim.status = Status::Aborted;
            return sim;
        }

        sim.allocate_statics();
        let startup = sim.new_node(RuntimeKind::Startup);
        sim.stack.push(startup);
        sim
    }

    fn allocate_statics(&mut self) {
        let entities = &self.program.context.entities;
        let mut by_name: HashMap<String, Address> = HashMap::new();
        for entity in self.program.global_objects() {
            let Some(var) = entities.variable(entity) else {
                continue;
            };
            // Later units redeclaring the same global (a shared header) get
            // the storage the first unit allocated; the initializer runs once.
            if let Some(&address) = by_name.get(&var.name) {
                self.memory.bind_static(entity, address);
                continue;
            }
            let ty = var.ty.clone();
            let name = var.name.clone();
            let (address, _) =
                self.memory
                    .allocate(&ty, ObjectKind::Static, Some(name.clone()), entities);
            self.memory.bind_static(entity, address);
            by_name.insert(name.clone(), address);
            self.events.push(SimEvent::ObjectAllocated {
                address,
                name: Some(name),
                ty: ty.to_string(),
            });
            if let Some(init) = var.definition {
                self.global_inits.push(init);
            }
        }
    }

    pub(crate) fn new_node(&mut self, kind: RuntimeKind) -> RuntimeConstruct {
        let id = self.next_runtime_id;
        self.next_runtime_id += 1;
        RuntimeConstruct {
            id,
            kind,
            phase: 0,
            results: Vec::new(),
            target: None,
            cleanup: Vec::new(),
            temp_baseline: self.temporaries.len(),
            pending_return: None,
            done: None,
            aborting: None,
        }
    }

    pub(crate) fn push_construct(&mut self, construct: ConstructId, target: Option<Address>) {
        let mut node = self.new_node(RuntimeKind::Construct(construct));
        node.target = target;
        self.stack.push(node);
    }

    // ==================== the driver ====================

    /// Advance the simulation by one visible step.
    pub fn step(&mut self) -> Status {
        if self.status != Status::Ready {
            return self.status;
        }
        if self.stack.is_empty() {
            // A finished simulation reports its status; getting here without
            // one is an engine bug surfaced as an abort, never a panic.
            self.status = Status::Aborted;
            return self.status;
        }

        // Readiness drain: the top node may need children before it can act.
        while let Some(request) = self.up_next() {
            self.push_request(request);
        }

        self.step_forward();
        self.steps += 1;
        self.status
    }

    /// Step until the simulation finishes, aborts, or parks on input.
    pub fn run_to_completion(&mut self) -> Status {
        while self.status == Status::Ready {
            self.step();
        }
        self.status
    }

    // ==================== queries ====================

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn step_count(&self) -> u64 {
        self.steps
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    /// Events produced since the last drain, in order
    pub fn drain_events(&mut self) -> Vec<SimEvent> {
        self.events.drain()
    }

    /// Everything written to standard output so far
    pub fn output(&self) -> &str {
        &self.stdout
    }

    /// Feed a line of standard input; unparks a blocked read.
    pub fn provide_input(&mut self, line: &str) {
        self.input.push_line(line);
        if self.status == Status::AwaitingInput && !self.input.is_empty() {
            self.status = Status::Ready;
        }
    }

    pub fn stack_depth(&self) -> usize {
        self.stack.len()
    }

    // ==================== engine plumbing ====================

    pub(crate) fn park_for_input(&mut self) {
        self.events.push(SimEvent::InputRequested);
        self.status = Status::AwaitingInput;
    }

    pub(crate) fn report_ub(&mut self, message: impl Into<String>, fatal: bool) {
        self.events.push(SimEvent::UndefinedBehavior {
            message: message.into(),
            fatal,
        });
        if fatal {
            self.status = Status::Aborted;
        }
    }

    pub(crate) fn write_cell(&mut self, address: Address, value: Value) {
        if self.memory.write(address, value) {
            self.events.push(SimEvent::MemoryWrite { address, value });
        } else {
            self.report_ub(
                format!("write to invalid address 0x{address:x}"),
                true,
            );
        }
    }

    /// Read a scalar, reporting invalid reads as UB events. Dead and
    /// uninitialized cells still yield their junk so evaluation continues.
    pub(crate) fn read_cell(&mut self, address: Address) -> Value {
        use crate::runtime::memory::InvalidRead;
        match self.memory.read(address) {
            Ok(v) => v,
            Err(InvalidRead::NoObject) => {
                self.report_ub(format!("read from invalid address 0x{address:x}"), true);
                Value::Uninit
            }
            Err(InvalidRead::Dead(junk)) => {
                self.report_ub("read from an object that no longer exists", false);
                junk
            }
            Err(InvalidRead::Uninitialized) => {
                self.report_ub("read of an uninitialized value", false);
                Value::Uninit
            }
        }
    }

    /// Finish the top node with `result`; cleanup obligations drain first.
    pub(crate) fn finish_top(&mut self, result: Eval) {
        let top = self.stack.last_mut().expect("finish with empty stack");
        top.done = Some(result);
    }

    /// Pop the completed top node, delivering its result or propagating its
    /// unwind marker to the node below.
    pub(crate) fn pop_top(&mut self) {
        let node = self.stack.pop().expect("pop with empty stack");
        match node.aborting {
            Some(unwind) => self.propagate_unwind(unwind),
            None => {
                // Destructor calls yield nothing and are spawned by cleanup
                // drains; their completion is not an operand of the node
                // below.
                if matches!(node.kind, RuntimeKind::DestructorCall { .. }) {
                    return;
                }
                let result = node.done.unwrap_or(Eval::None);
                match self.stack.last_mut() {
                    Some(parent) => parent.results.push(result),
                    None => {
                        // Startup popped: the run is over.
                        let exit_code = match result {
                            Eval::Value(v) => v.as_int(),
                            _ => 0,
                        };
                        self.events.push(SimEvent::Ended {
                            exit_code: Some(exit_code),
                        });
                        self.status = Status::Finished { exit_code };
                    }
                }
            }
        }
    }

    /// Hand an unwind marker to the new top node. Stopping constructs
    /// absorb it; everything else drains its own cleanup and keeps passing
    /// it down.
    fn propagate_unwind(&mut self, unwind: Unwind) {
        let Some(top) = self.stack.last_mut() else {
            return;
        };
        match (&top.kind, unwind) {
            (RuntimeKind::Invoke { .. }, Unwind::Return) => {
                let result = top.pending_return.take().unwrap_or(Eval::None);
                top.done = Some(result);
            }
            (RuntimeKind::Construct(cid), _) => {
                let kind = &self.program.context.constructs.get(*cid).kind;
                match (kind, unwind) {
                    (ConstructKind::While { .. } | ConstructKind::For { .. }, Unwind::Break) => {
                        top.done = Some(Eval::None);
                    }
                    (ConstructKind::While { .. }, Unwind::Continue) => {
                        // Back to the condition.
                        top.results.clear();
                        top.phase = 0;
                    }
                    (ConstructKind::For { post, .. }, Unwind::Continue) => {
                        top.results.clear();
                        // Stage 3 runs the post expression; without one the
                        // loop returns straight to its condition.
                        top.phase = if post.is_some() { 3 } else { 1 };
                    }
                    _ => top.aborting = Some(unwind),
                }
            }
            _ => top.aborting = Some(unwind),
        }
    }

    /// Destroy full-expression temporaries above the owner's watermark, one
    /// per step, in reverse creation order. Returns true if this consumed
    /// the step.
    pub(crate) fn drain_temporaries(&mut self, baseline: usize) -> bool {
        if self.temporaries.len() <= baseline {
            return false;
        }
        let temp = self.temporaries.pop().expect("watermark checked");
        if let Some(dtor) = temp.destructor {
            let node = self.new_node(RuntimeKind::DestructorCall {
                function: dtor,
                object: temp.address,
            });
            self.stack.push(node);
        } else {
            self.memory.invalidate_range(temp.address, temp.size);
            self.events.push(SimEvent::ObjectDeallocated {
                address: temp.address,
            });
        }
        true
    }

    /// Register a class local's destructor with the nearest block so it
    /// runs when that scope ends, however it ends.
    pub(crate) fn register_destructible(&mut self, address: Address, destructor: EntityId) {
        for node in self.stack.iter_mut().rev() {
            let is_scope = match &node.kind {
                RuntimeKind::Construct(cid) => matches!(
                    self.program.context.constructs.get(*cid).kind,
                    ConstructKind::Block { .. }
                ),
                RuntimeKind::Invoke { .. } | RuntimeKind::Startup => true,
                RuntimeKind::DestructorCall { .. } => false,
            };
            if is_scope {
                node.cleanup.push((address, destructor));
                return;
            }
        }
    }

    /// Look up the destructor that runs for an object of `class_name`
    pub(crate) fn class_destructor(&self, class_name: &str) -> Option<EntityId> {
        let entities = &self.program.context.entities;
        let mut current = Some(class_name.to_string());
        while let Some(cname) = current {
            let (_, class) = entities.class_by_name(&cname)?;
            if let Some(dtor) = class.destructor {
                return Some(dtor);
            }
            current = class.base.clone();
        }
        None
    }

    /// Virtual dispatch: the override of `function` for the receiver's
    /// dynamic type.
    pub(crate) fn resolve_virtual(&self, function: EntityId, receiver: Address) -> EntityId {
        let entities = &self.program.context.entities;
        let Some(base_fn) = entities.function(function) else {
            return function;
        };
        let Some(dynamic) = self.memory.dynamic_type(receiver) else {
            return function;
        };
        let mut current = Some(dynamic.to_string());
        while let Some(cname) = current {
            let Some((_, class)) = entities.class_by_name(&cname) else {
                break;
            };
            for &fid in &class.member_functions {
                if let Some(f) = entities.function(fid) {
                    if f.name == base_fn.name && f.ty.same_signature(&base_fn.ty) {
                        return fid;
                    }
                }
            }
            if base_fn.is_destructor {
                if let Some(dtor) = class.destructor {
                    return dtor;
                }
            }
            current = class.base.clone();
        }
        function
    }

    /// Field offset of `field` on `class_name`, searching the base chain.
    /// Base subobjects sit at offset 0, so offsets are absolute.
    pub(crate) fn field_offset(&self, class_name: &str, field: &str) -> Option<usize> {
        let entities = &self.program.context.entities;
        let mut current = Some(class_name.to_string());
        while let Some(cname) = current {
            let (_, class) = entities.class_by_name(&cname)?;
            if let Some(f) = class.field(field) {
                return Some(f.offset);
            }
            current = class.base.clone();
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn finished(program: &Program) -> (Status, Vec<SimEvent>) {
        let mut sim = Simulation::new(program);
        let status = sim.run_to_completion();
        let events = sim.drain_events();
        (status, events)
    }

    fn exit_code(status: Status) -> i64 {
        match status {
            Status::Finished { exit_code } => exit_code,
            other => panic!("expected Finished, got {other:?}"),
        }
    }

    fn writes(events: &[SimEvent]) -> Vec<(Address, Value)> {
        events
            .iter()
            .filter_map(|e| match e {
                SimEvent::MemoryWrite { address, value } => Some((*address, *value)),
                _ => None,
            })
            .collect()
    }

    fn named_allocation(events: &[SimEvent], wanted: &str) -> Address {
        events
            .iter()
            .find_map(|e| match e {
                SimEvent::ObjectAllocated {
                    address,
                    name: Some(n),
                    ..
                } if n == wanted => Some(*address),
                _ => None,
            })
            .unwrap_or_else(|| panic!("no allocation named {wanted}"))
    }

    #[test]
    fn test_assignment_reuses_the_variable_slot() {
        let program = Program::from_source("main.cpp", "int main() { int x = 2; x = x + 1; }");
        let (status, events) = finished(&program);
        assert_eq!(exit_code(status), 0);

        let x = named_allocation(&events, "x");
        let x_writes: Vec<Value> = writes(&events)
            .into_iter()
            .filter(|&(a, _)| a == x)
            .map(|(_, v)| v)
            .collect();
        assert_eq!(x_writes, vec![Value::Int(2), Value::Int(3)]);
    }

    #[test]
    fn test_stack_is_empty_after_main_returns() {
        let program = Program::from_source("main.cpp", "int main() { int x = 2; x = x + 1; }");
        let mut sim = Simulation::new(&program);
        sim.run_to_completion();
        assert_eq!(sim.stack_depth(), 0);
        assert_eq!(sim.memory().frame_depth(), 0);
    }

    #[test]
    fn test_straight_line_arithmetic() {
        let program = Program::from_source(
            "main.cpp",
            "int main() { int x = 2; int y = 3; int z = 10 * x + y; return z; }",
        );
        let (status, events) = finished(&program);
        assert_eq!(exit_code(status), 23);
        assert!(!events
            .iter()
            .any(|e| matches!(e, SimEvent::UndefinedBehavior { .. })));
    }

    #[test]
    fn test_temporaries_die_in_reverse_creation_order() {
        let program = Program::from_source(
            "main.cpp",
            "int sum(const int& a, const int& b) { return a + b; }\n\
             int main() { int s = sum(10, 20); return s; }\n",
        );
        let (status, events) = finished(&program);
        assert_eq!(exit_code(status), 30);

        // The two argument temporaries are allocated for the call and torn
        // down before the declaration statement completes, newest first.
        let temp_allocs: Vec<Address> = events
            .iter()
            .filter_map(|e| match e {
                SimEvent::ObjectAllocated {
                    address, name: None, ..
                } => Some(*address),
                _ => None,
            })
            .collect();
        assert_eq!(temp_allocs.len(), 2);
        let deallocs: Vec<Address> = events
            .iter()
            .filter_map(|e| match e {
                SimEvent::ObjectDeallocated { address } if temp_allocs.contains(address) => {
                    Some(*address)
                }
                _ => None,
            })
            .collect();
        let mut expected = temp_allocs;
        expected.reverse();
        assert_eq!(deallocs, expected);
    }

    #[test]
    fn test_replay_is_deterministic() {
        let program = Program::from_source(
            "main.cpp",
            "int main() { int acc = 0; for (int i = 1; i <= 3; i = i + 1) { acc = acc + i; } return acc; }",
        );
        let (status_a, events_a) = finished(&program);
        let (status_b, events_b) = finished(&program);
        assert_eq!(exit_code(status_a), 6);
        assert_eq!(exit_code(status_b), 6);
        assert_eq!(writes(&events_a), writes(&events_b));
    }

    #[test]
    fn test_virtual_call_dispatches_on_dynamic_type() {
        let program = Program::from_source(
            "main.cpp",
            "class Base { public:\n\
               virtual int id() { return 1; }\n\
             };\n\
             class Derived : public Base { public:\n\
               virtual int id() { return 2; }\n\
             };\n\
             int main() { Derived d; Base* p = &d; return p->id(); }\n",
        );
        assert!(program.is_runnable(), "{:#?}", program.notes().notes());
        let (status, _) = finished(&program);
        assert_eq!(exit_code(status), 2);
    }

    #[test]
    fn test_stream_output_is_collected() {
        let program = Program::from_source(
            "main.cpp",
            "#include <iostream>\nint main() { cout << 6 * 7 << endl; return 0; }\n",
        );
        assert!(program.is_runnable(), "{:#?}", program.notes().notes());
        let mut sim = Simulation::new(&program);
        let status = sim.run_to_completion();
        assert_eq!(exit_code(status), 0);
        assert_eq!(sim.output(), "42\n");
    }

    #[test]
    fn test_extraction_blocks_until_input_arrives() {
        let program = Program::from_source(
            "main.cpp",
            "#include <iostream>\nint main() { int x; cin >> x; return x; }\n",
        );
        let mut sim = Simulation::new(&program);
        let status = sim.run_to_completion();
        assert_eq!(status, Status::AwaitingInput);
        sim.provide_input("7");
        let status = sim.run_to_completion();
        assert_eq!(exit_code(status), 7);
    }

    #[test]
    fn test_heap_object_round_trip() {
        let program = Program::from_source(
            "main.cpp",
            "int main() { int* p = new int; *p = 7; int v = *p; delete p; return v; }",
        );
        let (status, events) = finished(&program);
        assert_eq!(exit_code(status), 7);
        assert!(events
            .iter()
            .any(|e| matches!(e, SimEvent::ObjectDeallocated { .. })));
    }

    #[test]
    fn test_break_leaves_the_loop() {
        let program = Program::from_source(
            "main.cpp",
            "int main() { int i = 0; while (i < 10) { if (i == 3) { break; } i = i + 1; } return i; }",
        );
        let (status, _) = finished(&program);
        assert_eq!(exit_code(status), 3);
    }

    #[test]
    fn test_destructor_runs_at_scope_exit() {
        let program = Program::from_source(
            "main.cpp",
            "class Counter { public:\n\
               int v;\n\
               Counter() { v = 1; }\n\
               ~Counter() { v = 0; }\n\
             };\n\
             int main() { Counter c; return c.v; }\n",
        );
        assert!(program.is_runnable(), "{:#?}", program.notes().notes());
        let (status, events) = finished(&program);
        assert_eq!(exit_code(status), 1);
        assert!(events.iter().any(|e| matches!(
            e,
            SimEvent::FunctionCalled { name } if name == "Counter::~Counter"
        )));
    }

    #[test]
    fn test_condition_temporary_dies_before_branch_runs() {
        let program = Program::from_source(
            "main.cpp",
            "int f(const int& x) { return x; }\n\
             int main() { if (f(1)) { int y = 2; } return 0; }\n",
        );
        let (status, events) = finished(&program);
        assert_eq!(exit_code(status), 0);

        // The argument temporary belongs to the condition's full
        // expression, so it dies before the branch starts.
        let temp = events
            .iter()
            .find_map(|e| match e {
                SimEvent::ObjectAllocated {
                    address, name: None, ..
                } => Some(*address),
                _ => None,
            })
            .expect("condition argument creates a temporary");
        let dealloc_at = events
            .iter()
            .position(|e| matches!(e, SimEvent::ObjectDeallocated { address } if *address == temp))
            .expect("temporary deallocated");
        let y_at = events
            .iter()
            .position(|e| {
                matches!(e, SimEvent::ObjectAllocated { name: Some(n), .. } if n == "y")
            })
            .expect("y allocated");
        assert!(
            dealloc_at < y_at,
            "temporary deallocated at event {dealloc_at}, branch began at event {y_at}"
        );
    }

    #[test]
    fn test_loop_condition_temporary_dies_before_body_runs() {
        let program = Program::from_source(
            "main.cpp",
            "int f(const int& x) { return x; }\n\
             int main() { int n = 2; while (f(n - 1)) { n = n - 1; } return n; }\n",
        );
        let (status, events) = finished(&program);
        assert_eq!(exit_code(status), 1);

        let n_addr = named_allocation(&events, "n");
        let temp = events
            .iter()
            .find_map(|e| match e {
                SimEvent::ObjectAllocated {
                    address, name: None, ..
                } => Some(*address),
                _ => None,
            })
            .expect("condition argument creates a temporary");
        let dealloc_at = events
            .iter()
            .position(|e| matches!(e, SimEvent::ObjectDeallocated { address } if *address == temp))
            .expect("temporary deallocated");
        let body_write_at = events
            .iter()
            .position(|e| {
                matches!(
                    e,
                    SimEvent::MemoryWrite { address, value }
                        if *address == n_addr && *value == Value::Int(1)
                )
            })
            .expect("body assigns n");
        assert!(
            dealloc_at < body_write_at,
            "temporary deallocated at event {dealloc_at}, body wrote at event {body_write_at}"
        );
    }

    #[test]
    fn test_integral_plus_pointer_offsets_the_pointer() {
        let program = Program::from_source(
            "main.cpp",
            "int main() { int a[3]; a[1] = 5; int* p = a; return *(1 + p); }",
        );
        assert!(program.is_runnable(), "{:#?}", program.notes().notes());
        let (status, _) = finished(&program);
        assert_eq!(exit_code(status), 5);
    }

    #[test]
    fn test_null_dereference_aborts() {
        let program = Program::from_source(
            "main.cpp",
            "int main() { int* p = 0; return *p; }",
        );
        let (status, events) = finished(&program);
        assert_eq!(status, Status::Aborted);
        assert!(events
            .iter()
            .any(|e| matches!(e, SimEvent::UndefinedBehavior { fatal: true, .. })));
    }
}
