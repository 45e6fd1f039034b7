//! Per-kind evaluation
//!
//! [`Simulation::up_next`] names the child the top node needs before it can
//! act; [`Simulation::step_forward`] performs the top node's one atomic
//! effect. Between them every construct kind gets its stepping behavior:
//! operand order, short-circuiting, call sequencing, cleanup.
//!
//! Only runnable programs are stepped, so kinds that exist purely to carry
//! compile-time notes (`ErrorExpression`, `InvalidDeclaration`) finish
//! inertly if they are ever reached.

use crate::library::native;
use crate::runtime::events::SimEvent;
use crate::runtime::memory::{Frame, HeapFreeError, ObjectKind};
use crate::runtime::simulation::{
    Eval, RuntimeKind, Simulation, Temporary, Unwind,
};
use crate::runtime::value::{Address, Value};
use crate::sema::{
    ArithOp, CompareOp, ConstructId, ConstructKind, Conversion, EntityId, FunctionBodyKind,
    StorageKind,
};
use crate::types::{Type, TypeKind};

/// A child the top runtime node wants pushed
pub(crate) struct PushRequest {
    construct: ConstructId,
    target: Option<Address>,
}

impl Simulation<'_> {
    fn kind_of(&self, construct: ConstructId) -> &ConstructKind {
        &self.program.context.constructs.get(construct).kind
    }

    fn expr_type(&self, construct: ConstructId) -> Option<Type> {
        self.program
            .context
            .constructs
            .get(construct)
            .expr_type()
            .cloned()
    }

    // ==================== readiness ====================

    /// The next child the top node needs, if any
    pub(crate) fn up_next(&self) -> Option<PushRequest> {
        let top = self.stack.last()?;
        if top.done.is_some() || top.aborting.is_some() {
            return None;
        }
        let want = |construct: ConstructId| {
            Some(PushRequest {
                construct,
                target: None,
            })
        };
        let n = top.results.len();

        match &top.kind {
            RuntimeKind::Startup => {
                if top.phase == 0 && n < self.global_inits.len() {
                    return want(self.global_inits[n]);
                }
                None
            }
            RuntimeKind::Invoke { function, .. } => {
                let func = self.program.context.entities.function(*function)?;
                let transfer = func.ty.params.len() as u32 + 1;
                if top.phase != transfer {
                    return None;
                }
                let definition = func.definition?;
                let ConstructKind::FunctionDefinition {
                    ctor_inits, body, ..
                } = self.kind_of(definition)
                else {
                    return None;
                };
                if matches!(self.kind_of(*body), ConstructKind::OpaqueBody { .. }) {
                    return None;
                }
                if n < ctor_inits.len() {
                    want(ctor_inits[n])
                } else if n == ctor_inits.len() {
                    want(*body)
                } else {
                    None
                }
            }
            RuntimeKind::DestructorCall { function, .. } => {
                if top.phase != 1 || n != 0 {
                    return None;
                }
                let definition = self.program.context.entities.function(*function)?.definition?;
                let ConstructKind::FunctionDefinition { body, .. } = self.kind_of(definition)
                else {
                    return None;
                };
                if matches!(self.kind_of(*body), ConstructKind::OpaqueBody { .. }) {
                    return None;
                }
                want(*body)
            }
            RuntimeKind::Construct(cid) => match self.kind_of(*cid) {
                ConstructKind::Block { statements } => {
                    (n < statements.len()).then(|| statements[n]).and_then(want)
                }
                ConstructKind::ExpressionStatement { expr } => (n == 0).then_some(*expr).and_then(want),
                ConstructKind::DeclarationStatement { declarations } => (n < declarations.len())
                    .then(|| declarations[n])
                    .and_then(want),
                ConstructKind::If {
                    condition,
                    then_branch,
                    else_branch,
                } => match (top.phase, n) {
                    (0, 0) => want(*condition),
                    // Phase 1 means the condition's temporaries are gone.
                    (1, 1) => {
                        if top.results[0].value().as_bool() {
                            want(*then_branch)
                        } else {
                            else_branch.and_then(want)
                        }
                    }
                    _ => None,
                },
                ConstructKind::While { condition, body } => match (top.phase, n) {
                    (0, 0) => want(*condition),
                    (1, 1) => want(*body),
                    _ => None,
                },
                ConstructKind::For {
                    init,
                    condition,
                    post,
                    body,
                } => match top.phase {
                    0 if n == 0 => want(*init),
                    1 if n == 0 => condition.and_then(want),
                    2 if n == 0 => want(*body),
                    3 if n == 0 => post.and_then(want),
                    _ => None,
                },
                ConstructKind::Return { value } => {
                    (n == 0).then_some(*value).flatten().and_then(want)
                }
                ConstructKind::VariableDefinition { init, .. } => {
                    if top.phase == 1 && n == 0 {
                        init.map(|i| PushRequest {
                            construct: i,
                            target: top.target,
                        })
                    } else {
                        None
                    }
                }
                ConstructKind::DirectInit { args, .. } => {
                    (n < args.len()).then(|| args[n]).and_then(want)
                }
                ConstructKind::ReferenceBind { source } => (n == 0).then_some(*source).and_then(want),
                ConstructKind::BaseOrMemberInit { init, .. } => {
                    if top.phase == 1 && n == 0 {
                        Some(PushRequest {
                            construct: *init,
                            target: top.target,
                        })
                    } else {
                        None
                    }
                }
                ConstructKind::New { init, .. } => {
                    if top.phase == 1 && n == 0 {
                        init.map(|i| PushRequest {
                            construct: i,
                            target: top.target,
                        })
                    } else {
                        None
                    }
                }
                ConstructKind::LogicalAnd { lhs, rhs } => match n {
                    0 => want(*lhs),
                    1 if top.results[0].value().as_bool() => want(*rhs),
                    _ => None,
                },
                ConstructKind::LogicalOr { lhs, rhs } => match n {
                    0 => want(*lhs),
                    1 if !top.results[0].value().as_bool() => want(*rhs),
                    _ => None,
                },
                ConstructKind::FunctionCall { .. } if top.phase == 1 => None,
                kind => {
                    let children = kind.children();
                    (n < children.len()).then(|| children[n]).and_then(want)
                }
            },
        }
    }

    pub(crate) fn push_request(&mut self, request: PushRequest) {
        self.push_construct(request.construct, request.target);
    }

    // ==================== the atomic effect ====================

    pub(crate) fn step_forward(&mut self) {
        let idx = self.stack.len() - 1;
        let top = &self.stack[idx];

        // Completion path: drain cleanup obligations, then tear down and pop.
        if top.done.is_some() || top.aborting.is_some() {
            self.step_completion(idx);
            return;
        }

        let kind = top.kind.clone();
        match kind {
            RuntimeKind::Startup => self.step_startup(idx),
            RuntimeKind::Invoke {
                function,
                object,
                args,
            } => self.step_invoke(idx, function, object, &args),
            RuntimeKind::DestructorCall { function, object } => {
                self.step_destructor(idx, function, object)
            }
            RuntimeKind::Construct(cid) => self.step_construct(idx, cid),
        }
    }

    fn step_completion(&mut self, idx: usize) {
        if let Some((address, dtor)) = self.stack[idx].cleanup.pop() {
            let node = self.new_node(RuntimeKind::DestructorCall {
                function: dtor,
                object: address,
            });
            self.stack.push(node);
            return;
        }

        match self.stack[idx].kind.clone() {
            RuntimeKind::Invoke { function, .. } => {
                self.finish_invoke_teardown(idx, function);
            }
            RuntimeKind::DestructorCall { function, object } => {
                self.finish_destructor_teardown(idx, function, object);
            }
            _ => self.pop_top(),
        }
    }

    /// Frame teardown for a completed call: bind a class return value into
    /// its return object, pop the frame, pop the node.
    fn finish_invoke_teardown(&mut self, idx: usize, function: EntityId) {
        let name = self
            .program
            .context
            .entities
            .function(function)
            .map(|f| f.qualified_name.clone())
            .unwrap_or_default();

        if let (Some(return_object), Some(Eval::Object(src))) =
            (self.stack[idx].target, self.stack[idx].done)
        {
            if src != return_object {
                let size = self
                    .program
                    .context
                    .entities
                    .function(function)
                    .and_then(|f| f.ty.return_type.size(&self.program.context.entities))
                    .unwrap_or(0);
                self.copy_object(src, return_object, size);
            }
            self.stack[idx].done = Some(Eval::Object(return_object));
        }

        self.memory.pop_frame();
        self.events.push(SimEvent::FunctionReturned { name });
        self.pop_top();
    }

    /// Own destructor finished: pop its frame and chain the base class's
    /// destructor on the same object, or pop the node.
    fn finish_destructor_teardown(&mut self, idx: usize, function: EntityId, object: Address) {
        let entities = &self.program.context.entities;
        let name = entities
            .function(function)
            .map(|f| f.qualified_name.clone())
            .unwrap_or_default();
        let base_dtor = entities
            .function(function)
            .and_then(|f| f.member_of.clone())
            .and_then(|class| entities.class_by_name(&class))
            .and_then(|(_, c)| c.base.clone())
            .and_then(|base| self.class_destructor(&base));

        self.memory.pop_frame();
        self.events.push(SimEvent::FunctionReturned { name });

        match base_dtor {
            Some(next) => {
                let node = &mut self.stack[idx];
                node.kind = RuntimeKind::DestructorCall {
                    function: next,
                    object,
                };
                node.phase = 0;
                node.results.clear();
                node.done = None;
                node.aborting = None;
            }
            None => self.pop_top(),
        }
    }

    fn step_startup(&mut self, idx: usize) {
        let globals = self.global_inits.len();
        let node = &self.stack[idx];
        if node.phase == 0 && node.results.len() == globals {
            let Some(main) = self.program.main_function() else {
                self.report_ub("program has no entry point", true);
                return;
            };
            self.stack[idx].phase = 1;
            let invoke = self.new_node(RuntimeKind::Invoke {
                function: main,
                object: None,
                args: Vec::new(),
            });
            self.stack.push(invoke);
        } else if node.phase == 1 && node.results.len() == globals + 1 {
            let result = *node.results.last().expect("main result present");
            self.finish_top(result);
        }
    }

    // ==================== calls ====================

    fn step_invoke(
        &mut self,
        idx: usize,
        function: EntityId,
        object: Option<Address>,
        args: &[Eval],
    ) {
        let Some(func) = self.program.context.entities.function(function) else {
            self.report_ub("call to an unknown function", true);
            return;
        };
        let nparams = func.ty.params.len() as u32;
        let phase = self.stack[idx].phase;

        if phase == 0 {
            self.invoke_setup(idx, function, object);
        } else if phase <= nparams {
            self.invoke_copy_arg(function, (phase - 1) as usize, args);
            self.stack[idx].phase += 1;
        } else {
            // Transfer phase: an opaque body runs natively; a block body has
            // finished once every ctor-init and the body delivered.
            self.invoke_transfer(idx, function);
        }
    }

    /// Frame push: allocate parameters and (for class returns) the return
    /// object, then make the callee's frame current.
    fn invoke_setup(&mut self, idx: usize, function: EntityId, object: Option<Address>) {
        let entities = &self.program.context.entities;
        let Some(func) = entities.function(function) else {
            return;
        };
        let name = func.qualified_name.clone();
        let params = func.ty.params.clone();
        let return_type = func.ty.return_type.clone();
        let definition = func.definition;

        let param_entities: Vec<EntityId> = definition
            .map(|d| match self.kind_of(d) {
                ConstructKind::FunctionDefinition { params, .. } => params.clone(),
                _ => Vec::new(),
            })
            .unwrap_or_default();

        // Class returns live in a caller-side temporary so they outlive the
        // callee's frame and die at the end of the full expression.
        if return_type.is_class() {
            let entities = &self.program.context.entities;
            let (address, size) =
                self.memory
                    .allocate(&return_type, ObjectKind::ReturnObject, None, entities);
            if let Some(frame) = self.memory.current_frame_mut() {
                frame.owned.push((address, size));
            }
            let destructor = return_type
                .class_name()
                .and_then(|c| self.class_destructor(c));
            self.temporaries.push(Temporary {
                address,
                size,
                destructor,
            });
            self.events.push(SimEvent::ObjectAllocated {
                address,
                name: None,
                ty: return_type.to_string(),
            });
            self.stack[idx].target = Some(address);
        }

        let mut frame = Frame::new(function, name.clone(), object);
        let entities = &self.program.context.entities;
        let mut allocations = Vec::new();
        for (i, pty) in params.iter().enumerate() {
            let pname = entities
                .function(function)
                .and_then(|f| f.param_names.get(i).cloned())
                .filter(|n| !n.is_empty());
            let (address, size) = self
                .memory
                .allocate(pty, ObjectKind::Parameter, pname.clone(), entities);
            frame.owned.push((address, size));
            if let Some(&entity) = param_entities.get(i) {
                frame.bindings.insert(entity, address);
            }
            allocations.push((address, pname, pty.to_string()));
            if let Some(dtor) = pty.class_name().and_then(|c| self.class_destructor(c)) {
                self.stack[idx].cleanup.push((address, dtor));
            }
        }
        self.memory.push_frame(frame);
        for (address, pname, ty) in allocations {
            self.events.push(SimEvent::ObjectAllocated {
                address,
                name: pname,
                ty,
            });
        }
        self.events.push(SimEvent::FunctionCalled { name });
        self.stack[idx].phase = 1;
    }

    /// One parameter initialization: by-value copy, reference bind, or
    /// memberwise class copy.
    fn invoke_copy_arg(&mut self, function: EntityId, i: usize, args: &[Eval]) {
        let entities = &self.program.context.entities;
        let Some(func) = entities.function(function) else {
            return;
        };
        let pty = func.ty.params[i].clone();
        let param_entity = func
            .definition
            .and_then(|d| match self.kind_of(d) {
                ConstructKind::FunctionDefinition { params, .. } => params.get(i).copied(),
                _ => None,
            });
        let Some(address) = param_entity.and_then(|e| {
            self.memory
                .current_frame()
                .and_then(|f| f.bindings.get(&e).copied())
        }) else {
            return;
        };
        let Some(arg) = args.get(i).copied() else {
            return;
        };

        if pty.is_reference() {
            self.write_cell(address, Value::Pointer(arg.address()));
        } else if pty.is_class() {
            let size = pty.size(&self.program.context.entities).unwrap_or(0);
            self.copy_object(arg.address(), address, size);
        } else {
            self.write_cell(address, arg.value());
        }
    }

    fn invoke_transfer(&mut self, idx: usize, function: EntityId) {
        let entities = &self.program.context.entities;
        let Some(func) = entities.function(function) else {
            return;
        };
        let body_kind = func.body_kind;
        let definition = func.definition;
        let return_type = func.ty.return_type.clone();
        let qualified = func.qualified_name.clone();

        if body_kind == FunctionBodyKind::Opaque {
            let marker = definition.and_then(|d| match self.kind_of(d) {
                ConstructKind::FunctionDefinition { body, .. } => match self.kind_of(*body) {
                    ConstructKind::OpaqueBody { marker } => Some(marker.clone()),
                    _ => None,
                },
                _ => None,
            });
            self.run_native(function, marker);
            return;
        }

        // Block body: readiness pushed all ctor-inits and the body; when the
        // body's result has landed the call is over.
        let inits = definition
            .map(|d| match self.kind_of(d) {
                ConstructKind::FunctionDefinition { ctor_inits, .. } => ctor_inits.len(),
                _ => 0,
            })
            .unwrap_or(0);
        if self.stack[idx].results.len() == inits + 1 {
            let result = match self.stack[idx].pending_return.take() {
                Some(r) => r,
                None if qualified == "::main" => Eval::Value(Value::Int(0)),
                None if return_type.is_void() => Eval::None,
                None => {
                    self.report_ub(
                        format!("'{qualified}' ended without returning a value"),
                        false,
                    );
                    Eval::Value(Value::Uninit)
                }
            };
            self.finish_top(result);
        }
    }

    fn run_native(&mut self, function: EntityId, marker: Option<String>) {
        let Some(marker) = marker else {
            self.report_ub("library function has no implementation", true);
            return;
        };
        let Some(op) = native::lookup(&marker) else {
            self.report_ub(format!("unsupported library routine '{marker}'"), true);
            return;
        };

        let entities = &self.program.context.entities;
        let param_addresses: Vec<Address> = entities
            .function(function)
            .and_then(|f| f.definition)
            .map(|d| match self.kind_of(d) {
                ConstructKind::FunctionDefinition { params, .. } => params.clone(),
                _ => Vec::new(),
            })
            .map(|params| {
                params
                    .iter()
                    .filter_map(|e| {
                        self.memory
                            .current_frame()
                            .and_then(|f| f.bindings.get(e).copied())
                    })
                    .collect()
            })
            .unwrap_or_default();
        let receiver = self.memory.current_frame().and_then(|f| f.receiver);

        let mut ctx = native::NativeCtx {
            memory: &mut self.memory,
            events: &mut self.events,
            input: &mut self.input,
            stdout: &mut self.stdout,
            rng_state: &mut self.rng_state,
            receiver,
            params: param_addresses,
        };
        match op(&mut ctx) {
            native::NativeOutcome::Return(result) => self.finish_top(result),
            native::NativeOutcome::NeedInput => self.park_for_input(),
        }
    }

    fn step_destructor(&mut self, idx: usize, function: EntityId, object: Address) {
        let node = &self.stack[idx];
        if node.phase == 0 {
            let name = self
                .program
                .context
                .entities
                .function(function)
                .map(|f| f.qualified_name.clone())
                .unwrap_or_default();
            self.memory
                .push_frame(Frame::new(function, name.clone(), Some(object)));
            self.events.push(SimEvent::FunctionCalled { name });
            self.stack[idx].phase = 1;
        } else {
            // Body delivered (or was opaque): teardown chains the base.
            self.finish_top(Eval::None);
        }
    }

    // ==================== constructs ====================

    fn step_construct(&mut self, idx: usize, cid: ConstructId) {
        let kind = self.kind_of(cid).clone();
        match kind {
            // ---- literals ----
            ConstructKind::IntLiteral(v) => self.finish_top(Eval::Value(Value::Int(v))),
            ConstructKind::DoubleLiteral(v) => self.finish_top(Eval::Value(Value::Double(v))),
            ConstructKind::CharLiteral(c) => self.finish_top(Eval::Value(Value::Char(c))),
            ConstructKind::BoolLiteral(b) => self.finish_top(Eval::Value(Value::Bool(b))),
            ConstructKind::StringLiteral(s) => {
                let address = self.intern_string(cid, &s);
                self.finish_top(Eval::Value(Value::Pointer(address)));
            }

            // ---- names ----
            ConstructKind::ObjectIdentifier { entity, name } => {
                let Some(address) = self.memory.address_of(entity) else {
                    self.report_ub(format!("'{name}' has no storage"), true);
                    return;
                };
                let is_ref = self
                    .program
                    .context
                    .entities
                    .variable(entity)
                    .is_some_and(|v| v.ty.is_reference());
                if is_ref {
                    let bound = self.read_cell(address);
                    self.finish_top(Eval::Object(bound.as_address()));
                } else {
                    self.finish_top(Eval::Object(address));
                }
            }
            ConstructKind::This => match self.memory.current_frame().and_then(|f| f.receiver) {
                Some(receiver) => self.finish_top(Eval::Value(Value::Pointer(receiver))),
                None => self.report_ub("'this' used outside a member call", true),
            },

            // ---- operators ----
            ConstructKind::Arithmetic { op, lhs, rhs } => self.step_arithmetic(idx, cid, op, lhs, rhs),
            ConstructKind::Comparison { op, lhs, .. } => self.step_comparison(idx, op, lhs),
            ConstructKind::LogicalAnd { .. } => {
                let node = &self.stack[idx];
                let result = match node.results.as_slice() {
                    [l] => l.value().as_bool(), // short-circuit false
                    [_, r] => r.value().as_bool(),
                    _ => false,
                };
                self.finish_top(Eval::Value(Value::Bool(result)));
            }
            ConstructKind::LogicalOr { .. } => {
                let node = &self.stack[idx];
                let result = match node.results.as_slice() {
                    [l] => l.value().as_bool(), // short-circuit true
                    [_, r] => r.value().as_bool(),
                    _ => false,
                };
                self.finish_top(Eval::Value(Value::Bool(result)));
            }
            ConstructKind::LogicalNot { .. } => {
                let v = self.stack[idx].results[0].value().as_bool();
                self.finish_top(Eval::Value(Value::Bool(!v)));
            }
            ConstructKind::Negate { .. } => {
                let v = self.stack[idx].results[0].value();
                let result = match self.expr_type(cid).map(|t| t.kind) {
                    Some(TypeKind::Double) => Value::Double(-v.as_double()),
                    _ => Value::Int(v.as_int().wrapping_neg()),
                };
                self.finish_top(Eval::Value(result));
            }
            ConstructKind::UnaryPlus { .. } => {
                let v = self.stack[idx].results[0];
                self.finish_top(v);
            }
            ConstructKind::Assignment { .. } => self.step_assignment(idx, cid),
            ConstructKind::IncDec {
                increment, postfix, ..
            } => self.step_incdec(idx, cid, increment, postfix),

            // ---- conversions ----
            ConstructKind::ImplicitConversion { conversion, .. } => {
                self.step_conversion(idx, cid, &conversion)
            }
            ConstructKind::MaterializeTemporary { .. } => self.step_materialize(idx, cid),

            // ---- memory expressions ----
            ConstructKind::Subscript { .. } => {
                let base = self.stack[idx].results[0].value().as_address();
                let index = self.stack[idx].results[1].value().as_int();
                let elem_size = self
                    .expr_type(cid)
                    .and_then(|t| t.size(&self.program.context.entities))
                    .unwrap_or(1) as i64;
                let address = (base as i64).wrapping_add(index.wrapping_mul(elem_size));
                self.finish_top(Eval::Object(address as Address));
            }
            ConstructKind::MemberAccess { class, field, .. } => {
                let object = self.stack[idx].results[0].address();
                let Some(offset) = self.field_offset(&class, &field) else {
                    self.report_ub(format!("'{class}' has no field '{field}'"), true);
                    return;
                };
                let address = object + offset as Address;
                let is_ref = self
                    .program
                    .context
                    .entities
                    .class_by_name(&class)
                    .and_then(|(_, c)| c.field(&field).map(|f| f.ty.is_reference()))
                    .unwrap_or(false);
                if is_ref {
                    let bound = self.read_cell(address);
                    self.finish_top(Eval::Object(bound.as_address()));
                } else {
                    self.finish_top(Eval::Object(address));
                }
            }
            ConstructKind::Dereference { .. } => {
                let address = self.stack[idx].results[0].value().as_address();
                if address == 0 {
                    self.report_ub("dereference of a null pointer", true);
                    return;
                }
                if !self.memory.is_valid(address) {
                    self.report_ub("dereference of a pointer to a dead object", false);
                }
                self.finish_top(Eval::Object(address));
            }
            ConstructKind::AddressOf { .. } => {
                let address = self.stack[idx].results[0].address();
                self.finish_top(Eval::Value(Value::Pointer(address)));
            }
            ConstructKind::New { ty, .. } => self.step_new(idx, &ty),
            ConstructKind::NewArray { element, .. } => self.step_new_array(idx, &element),
            ConstructKind::Delete { operand, .. } => self.step_delete(idx, operand),
            ConstructKind::FunctionCall {
                function,
                receiver,
                is_virtual,
                ..
            } => self.step_call(idx, cid, function, receiver.is_some(), is_virtual),

            // ---- declarations & initializers ----
            ConstructKind::VariableDefinition { entity, init } => {
                self.step_variable_definition(idx, entity, init)
            }
            ConstructKind::DefaultInit { ty, ctor } => self.step_default_init(idx, &ty, ctor),
            ConstructKind::DirectInit { ty, args, ctor, .. } => {
                self.step_direct_init(idx, &ty, args.len(), ctor)
            }
            ConstructKind::ReferenceBind { .. } => {
                let source = self.stack[idx].results[0].address();
                let Some(target) = self.stack[idx].target else {
                    self.report_ub("reference has nowhere to bind", true);
                    return;
                };
                self.write_cell(target, Value::Pointer(source));
                self.finish_top(Eval::None);
            }
            ConstructKind::BaseOrMemberInit { target, .. } => {
                self.step_member_init(idx, &target)
            }

            // ---- statements ----
            ConstructKind::Block { statements } => {
                if self.stack[idx].results.len() == statements.len() {
                    self.finish_top(Eval::None);
                }
            }
            ConstructKind::ExpressionStatement { .. }
            | ConstructKind::DeclarationStatement { .. } => {
                let baseline = self.stack[idx].temp_baseline;
                if !self.drain_temporaries(baseline) {
                    self.finish_top(Eval::None);
                }
            }
            ConstructKind::If { else_branch, .. } => {
                let node = &self.stack[idx];
                match (node.phase, node.results.len()) {
                    // The condition is a full expression: its temporaries
                    // die before the chosen branch starts.
                    (0, 1) => {
                        let baseline = node.temp_baseline;
                        if self.drain_temporaries(baseline) {
                            return;
                        }
                        self.stack[idx].phase = 1;
                        let taken = self.stack[idx].results[0].value().as_bool();
                        if !taken && else_branch.is_none() {
                            self.finish_top(Eval::None);
                        }
                    }
                    (1, 2) => self.finish_top(Eval::None),
                    _ => {}
                }
            }
            ConstructKind::While { .. } => self.step_while(idx),
            ConstructKind::For { condition, post, .. } => {
                self.step_for(idx, condition.is_some(), post.is_some())
            }
            ConstructKind::Return { value } => self.step_return(idx, value.is_some()),
            ConstructKind::Break => {
                self.stack[idx].aborting = Some(Unwind::Break);
            }
            ConstructKind::Continue => {
                self.stack[idx].aborting = Some(Unwind::Continue);
            }
            ConstructKind::NullStatement => self.finish_top(Eval::None),

            // ---- inert kinds ----
            ConstructKind::FunctionDefinition { .. }
            | ConstructKind::FunctionPrototype { .. }
            | ConstructKind::ClassDefinition { .. }
            | ConstructKind::InvalidDeclaration
            | ConstructKind::OpaqueBody { .. }
            | ConstructKind::ErrorExpression => self.finish_top(Eval::None),
        }
    }

    // ==================== operator effects ====================

    fn step_arithmetic(
        &mut self,
        idx: usize,
        cid: ConstructId,
        op: ArithOp,
        lhs: ConstructId,
        rhs: ConstructId,
    ) {
        let l = self.stack[idx].results[0].value();
        let r = self.stack[idx].results[1].value();
        let lhs_ty = self.expr_type(lhs);
        let rhs_ty = self.expr_type(rhs);
        let result_ty = self.expr_type(cid);

        // Pointer arithmetic scales by the element size.
        if let Some(lt) = &lhs_ty {
            if lt.is_pointer() {
                let elem_size = lt
                    .element_type()
                    .and_then(|e| e.size(&self.program.context.entities))
                    .unwrap_or(1) as i64;
                let result = if rhs_ty.as_ref().is_some_and(Type::is_pointer) {
                    Value::Int((l.as_int().wrapping_sub(r.as_int())) / elem_size.max(1))
                } else {
                    let delta = r.as_int().wrapping_mul(elem_size);
                    let base = l.as_int();
                    let addr = match op {
                        ArithOp::Sub => base.wrapping_sub(delta),
                        _ => base.wrapping_add(delta),
                    };
                    Value::Pointer(addr as Address)
                };
                self.finish_top(Eval::Value(result));
                return;
            }
        }

        if matches!(result_ty.map(|t| t.kind), Some(TypeKind::Double)) {
            let (a, b) = (l.as_double(), r.as_double());
            let v = match op {
                ArithOp::Add => a + b,
                ArithOp::Sub => a - b,
                ArithOp::Mul => a * b,
                ArithOp::Div => a / b,
                ArithOp::Mod | ArithOp::Shl | ArithOp::Shr => {
                    self.report_ub("integer operator applied to doubles", true);
                    return;
                }
            };
            self.finish_top(Eval::Value(Value::Double(v)));
            return;
        }

        let (a, b) = (l.as_int(), r.as_int());
        if b == 0 && matches!(op, ArithOp::Div | ArithOp::Mod) {
            self.report_ub("integer division by zero", true);
            return;
        }
        let v = match op {
            ArithOp::Add => a.wrapping_add(b),
            ArithOp::Sub => a.wrapping_sub(b),
            ArithOp::Mul => a.wrapping_mul(b),
            ArithOp::Div => a.wrapping_div(b),
            ArithOp::Mod => a.wrapping_rem(b),
            ArithOp::Shl => a.wrapping_shl(b as u32 & 63),
            ArithOp::Shr => a.wrapping_shr(b as u32 & 63),
        };
        self.finish_top(Eval::Value(Value::Int(v)));
    }

    fn step_comparison(&mut self, idx: usize, op: CompareOp, lhs: ConstructId) {
        let l = self.stack[idx].results[0].value();
        let r = self.stack[idx].results[1].value();
        let as_double = matches!(self.expr_type(lhs).map(|t| t.kind), Some(TypeKind::Double))
            || matches!(l, Value::Double(_))
            || matches!(r, Value::Double(_));

        let result = if as_double {
            let (a, b) = (l.as_double(), r.as_double());
            match op {
                CompareOp::Less => a < b,
                CompareOp::Greater => a > b,
                CompareOp::LessEq => a <= b,
                CompareOp::GreaterEq => a >= b,
                CompareOp::Equal => a == b,
                CompareOp::NotEqual => a != b,
            }
        } else {
            let (a, b) = (l.as_int(), r.as_int());
            match op {
                CompareOp::Less => a < b,
                CompareOp::Greater => a > b,
                CompareOp::LessEq => a <= b,
                CompareOp::GreaterEq => a >= b,
                CompareOp::Equal => a == b,
                CompareOp::NotEqual => a != b,
            }
        };
        self.finish_top(Eval::Value(Value::Bool(result)));
    }

    fn step_assignment(&mut self, idx: usize, cid: ConstructId) {
        let target = self.stack[idx].results[0].address();
        let source = self.stack[idx].results[1];
        let is_class = self.expr_type(cid).is_some_and(|t| t.is_class());
        if is_class {
            let size = self
                .expr_type(cid)
                .and_then(|t| t.size(&self.program.context.entities))
                .unwrap_or(0);
            self.copy_object(source.address(), target, size);
        } else {
            self.write_cell(target, source.value());
        }
        self.finish_top(Eval::Object(target));
    }

    fn step_incdec(&mut self, idx: usize, cid: ConstructId, increment: bool, postfix: bool) {
        let address = self.stack[idx].results[0].address();
        let old = self.read_cell(address);
        let ty = self.expr_type(cid);
        let step: i64 = if increment { 1 } else { -1 };

        let new = match ty.as_ref().map(|t| &t.kind) {
            Some(TypeKind::Double) => Value::Double(old.as_double() + step as f64),
            Some(TypeKind::Pointer(inner)) => {
                let elem = inner.size(&self.program.context.entities).unwrap_or(1) as i64;
                Value::Pointer(old.as_int().wrapping_add(step * elem) as Address)
            }
            Some(TypeKind::Char) => {
                Value::Char((old.as_int().wrapping_add(step) as u8) as char)
            }
            _ => Value::Int(old.as_int().wrapping_add(step)),
        };
        self.write_cell(address, new);
        if postfix {
            self.finish_top(Eval::Value(old));
        } else {
            self.finish_top(Eval::Object(address));
        }
    }

    fn step_conversion(&mut self, idx: usize, cid: ConstructId, conversion: &Conversion) {
        let operand = self.stack[idx].results[0];
        match conversion {
            Conversion::LvalueToRvalue => {
                // Class "values" stay designators; their copies are always
                // memberwise at the receiving end.
                if self.expr_type(cid).is_some_and(|t| t.is_class()) {
                    self.finish_top(Eval::Object(operand.address()));
                } else {
                    let v = self.read_cell(operand.address());
                    self.finish_top(Eval::Value(v));
                }
            }
            Conversion::ArrayToPointer => {
                self.finish_top(Eval::Value(Value::Pointer(operand.address())));
            }
            Conversion::Arithmetic(target) => {
                let v = operand.value();
                let converted = match target.kind {
                    TypeKind::Double => Value::Double(v.as_double()),
                    TypeKind::Char => Value::Char((v.as_int() as u8) as char),
                    TypeKind::Bool => Value::Bool(v.as_bool()),
                    _ => Value::Int(v.as_int()),
                };
                self.finish_top(Eval::Value(converted));
            }
            Conversion::ToBool => {
                self.finish_top(Eval::Value(Value::Bool(operand.value().as_bool())));
            }
            Conversion::NullPointer(_) => {
                self.finish_top(Eval::Value(Value::Pointer(0)));
            }
            // The base subobject sits at offset 0, so both of these are
            // value-preserving.
            Conversion::DerivedToBase(_) | Conversion::Qualification(_) => {
                self.finish_top(Eval::Value(operand.value()));
            }
        }
    }

    fn step_materialize(&mut self, idx: usize, cid: ConstructId) {
        let operand = self.stack[idx].results[0];
        let Some(ty) = self.expr_type(cid) else {
            self.finish_top(operand);
            return;
        };
        if ty.is_class() {
            // Class prvalues are already backed by a return object.
            self.finish_top(Eval::Object(operand.address()));
            return;
        }
        let entities = &self.program.context.entities;
        let (address, size) = self
            .memory
            .allocate(&ty, ObjectKind::Temporary, None, entities);
        if let Some(frame) = self.memory.current_frame_mut() {
            frame.owned.push((address, size));
        }
        self.temporaries.push(Temporary {
            address,
            size,
            destructor: None,
        });
        self.events.push(SimEvent::ObjectAllocated {
            address,
            name: None,
            ty: ty.to_string(),
        });
        self.write_cell(address, operand.value());
        self.finish_top(Eval::Object(address));
    }

    // ==================== heap expressions ====================

    fn step_new(&mut self, idx: usize, ty: &Type) {
        let node = &self.stack[idx];
        if node.phase == 0 {
            let entities = &self.program.context.entities;
            let address = self.memory.allocate_heap(ty, 1, entities);
            self.events.push(SimEvent::ObjectAllocated {
                address,
                name: None,
                ty: ty.to_string(),
            });
            self.stack[idx].target = Some(address);
            self.stack[idx].phase = 1;
        } else if node.results.len() == 1 {
            let address = self.stack[idx].target.unwrap_or(0);
            self.finish_top(Eval::Value(Value::Pointer(address)));
        }
    }

    fn step_new_array(&mut self, idx: usize, element: &Type) {
        let length = self.stack[idx].results[0].value().as_int();
        if length < 0 {
            self.report_ub("array allocation with a negative length", true);
            return;
        }
        let entities = &self.program.context.entities;
        let address = self.memory.allocate_heap(element, length as usize, entities);
        self.events.push(SimEvent::ObjectAllocated {
            address,
            name: None,
            ty: format!("{element}[{length}]"),
        });
        self.finish_top(Eval::Value(Value::Pointer(address)));
    }

    fn step_delete(&mut self, idx: usize, operand: ConstructId) {
        let node = &self.stack[idx];
        let address = node.results[0].value().as_address();
        if address == 0 {
            // Deleting a null pointer is a no-op.
            self.finish_top(Eval::None);
            return;
        }

        if node.phase == 0 {
            // A class object runs its destructor before the storage dies.
            let static_class = self
                .expr_type(operand)
                .and_then(|t| t.element_type().and_then(|e| e.class_name().map(str::to_string)));
            if let Some(class) = static_class {
                let dynamic = self
                    .memory
                    .dynamic_type(address)
                    .map(str::to_string)
                    .unwrap_or(class);
                if self.memory.is_valid(address) {
                    if let Some(dtor) = self.class_destructor(&dynamic) {
                        self.stack[idx].phase = 1;
                        let call = self.new_node(RuntimeKind::DestructorCall {
                            function: dtor,
                            object: address,
                        });
                        self.stack.push(call);
                        return;
                    }
                }
            }
        }

        match self.memory.deallocate_heap(address) {
            Ok(()) => self.events.push(SimEvent::ObjectDeallocated { address }),
            Err(HeapFreeError::DoubleFree) => {
                self.report_ub("delete of an already deleted object", false);
            }
            Err(HeapFreeError::NotAllocation) => {
                self.report_ub("delete of something that was not allocated with new", false);
            }
        }
        self.finish_top(Eval::None);
    }

    fn step_call(
        &mut self,
        idx: usize,
        cid: ConstructId,
        function: EntityId,
        has_receiver: bool,
        is_virtual: bool,
    ) {
        let children = self.kind_of(cid).children().len();
        let node = &self.stack[idx];

        if node.phase == 0 && node.results.len() == children {
            let receiver = has_receiver.then(|| node.results[0].address());
            let args: Vec<Eval> = node.results[usize::from(has_receiver)..].to_vec();
            let function = match (is_virtual, receiver) {
                (true, Some(addr)) => self.resolve_virtual(function, addr),
                _ => function,
            };
            self.stack[idx].phase = 1;
            let invoke = self.new_node(RuntimeKind::Invoke {
                function,
                object: receiver,
                args,
            });
            self.stack.push(invoke);
        } else if node.phase == 1 && node.results.len() == children + 1 {
            let result = *node.results.last().expect("call result present");
            self.finish_top(result);
        }
    }

    // ==================== declarations ====================

    fn step_variable_definition(
        &mut self,
        idx: usize,
        entity: EntityId,
        init: Option<ConstructId>,
    ) {
        let node = &self.stack[idx];
        if node.phase == 0 {
            let entities = &self.program.context.entities;
            let Some(var) = entities.variable(entity) else {
                self.report_ub("definition of an unknown object", true);
                return;
            };
            let address = match var.storage {
                StorageKind::Static => {
                    let Some(address) = self.memory.static_address(entity) else {
                        self.report_ub("global object has no storage", true);
                        return;
                    };
                    address
                }
                _ => {
                    let ty = var.ty.clone();
                    let name = var.name.clone();
                    let entities = &self.program.context.entities;
                    let (address, size) = self.memory.allocate(
                        &ty,
                        ObjectKind::Local,
                        Some(name.clone()),
                        entities,
                    );
                    if let Some(frame) = self.memory.current_frame_mut() {
                        frame.bindings.insert(entity, address);
                        frame.owned.push((address, size));
                    }
                    self.events.push(SimEvent::ObjectAllocated {
                        address,
                        name: Some(name),
                        ty: ty.to_string(),
                    });
                    if let Some(dtor) = ty.class_name().and_then(|c| self.class_destructor(c)) {
                        self.register_destructible(address, dtor);
                    }
                    address
                }
            };
            self.stack[idx].target = Some(address);
            self.stack[idx].phase = 1;
        } else if init.is_none() || node.results.len() == 1 {
            self.finish_top(Eval::None);
        }
    }

    fn step_default_init(&mut self, idx: usize, ty: &Type, ctor: Option<EntityId>) {
        let Some(target) = self.stack[idx].target else {
            self.report_ub("initializer has no target object", true);
            return;
        };
        let node = &self.stack[idx];
        match (node.phase, ctor) {
            (0, Some(ctor)) => {
                self.stack[idx].phase = 1;
                let invoke = self.new_node(RuntimeKind::Invoke {
                    function: ctor,
                    object: Some(target),
                    args: Vec::new(),
                });
                self.stack.push(invoke);
            }
            (0, None) => {
                // Statics are zero-initialized; everything else keeps junk.
                let is_static = self
                    .memory
                    .object(target)
                    .is_some_and(|o| o.kind == ObjectKind::Static);
                if is_static {
                    if let Some(zero) = zero_value(ty) {
                        self.write_cell(target, zero);
                    }
                }
                self.finish_top(Eval::None);
            }
            _ => self.finish_top(Eval::None),
        }
    }

    fn step_direct_init(&mut self, idx: usize, ty: &Type, nargs: usize, ctor: Option<EntityId>) {
        let Some(target) = self.stack[idx].target else {
            self.report_ub("initializer has no target object", true);
            return;
        };
        let node = &self.stack[idx];
        if node.results.len() < nargs {
            return;
        }

        match (node.phase, ctor) {
            (0, Some(ctor)) => {
                let args = node.results[..nargs].to_vec();
                self.stack[idx].phase = 1;
                let invoke = self.new_node(RuntimeKind::Invoke {
                    function: ctor,
                    object: Some(target),
                    args,
                });
                self.stack.push(invoke);
            }
            (0, None) => {
                if ty.is_class() {
                    // Memberwise copy of a trivial class.
                    let size = ty.size(&self.program.context.entities).unwrap_or(0);
                    let source = self.stack[idx].results[0].address();
                    self.copy_object(source, target, size);
                } else {
                    let value = self.stack[idx].results[0].value();
                    self.write_cell(target, value);
                }
                self.finish_top(Eval::None);
            }
            _ => self.finish_top(Eval::None),
        }
    }

    /// One `name(args)` entry of a constructor's initializer list: compute
    /// which subobject it targets, then run the initializer into it.
    fn step_member_init(&mut self, idx: usize, target: &crate::sema::MemberInitTarget) {
        use crate::sema::MemberInitTarget;
        let node = &self.stack[idx];
        if node.phase == 0 {
            let Some(receiver) = self.memory.current_frame().and_then(|f| f.receiver) else {
                self.report_ub("member initializer outside a constructor", true);
                return;
            };
            let address = match target {
                MemberInitTarget::Base(_) => Some(receiver),
                MemberInitTarget::Field(field) => {
                    let class = self
                        .memory
                        .current_frame()
                        .and_then(|f| {
                            self.program
                                .context
                                .entities
                                .function(f.function)
                                .and_then(|func| func.member_of.clone())
                        });
                    class
                        .and_then(|c| self.field_offset(&c, field))
                        .map(|offset| receiver + offset as Address)
                }
            };
            let Some(address) = address else {
                self.report_ub("member initializer targets no subobject", true);
                return;
            };
            self.stack[idx].target = Some(address);
            self.stack[idx].phase = 1;
        } else if node.results.len() == 1 {
            self.finish_top(Eval::None);
        }
    }

    // ==================== control flow ====================

    fn step_while(&mut self, idx: usize) {
        let node = &self.stack[idx];
        match (node.phase, node.results.len()) {
            // The condition is a full expression: its temporaries die
            // before the body runs (or before the loop finishes).
            (0, 1) => {
                let baseline = node.temp_baseline;
                if self.drain_temporaries(baseline) {
                    return;
                }
                if self.stack[idx].results[0].value().as_bool() {
                    self.stack[idx].phase = 1;
                } else {
                    self.finish_top(Eval::None);
                }
            }
            // Iteration boundary: back to the condition.
            (1, 2) => {
                self.stack[idx].results.clear();
                self.stack[idx].phase = 0;
            }
            _ => {}
        }
    }

    fn step_for(&mut self, idx: usize, has_condition: bool, has_post: bool) {
        let baseline = self.stack[idx].temp_baseline;
        let nresults = self.stack[idx].results.len();
        match self.stack[idx].phase {
            // Init statement done: move to the condition.
            0 if nresults == 1 => {
                self.stack[idx].results.clear();
                self.stack[idx].phase = 1;
            }
            1 => {
                if has_condition {
                    if nresults != 1 {
                        return;
                    }
                    // The condition is a full expression: its temporaries
                    // die before the body runs.
                    if self.drain_temporaries(baseline) {
                        return;
                    }
                    if !self.stack[idx].results[0].value().as_bool() {
                        self.finish_top(Eval::None);
                        return;
                    }
                }
                self.stack[idx].results.clear();
                self.stack[idx].phase = 2;
            }
            2 if nresults == 1 => {
                self.stack[idx].results.clear();
                self.stack[idx].phase = if has_post { 3 } else { 1 };
            }
            // Post expression done: its temporaries die, then back to the
            // condition.
            3 if nresults == 1 || !has_post => {
                if !self.drain_temporaries(baseline) {
                    self.stack[idx].results.clear();
                    self.stack[idx].phase = 1;
                }
            }
            _ => {}
        }
    }

    fn step_return(&mut self, idx: usize, has_value: bool) {
        let node = &self.stack[idx];
        if has_value && node.results.is_empty() {
            return;
        }
        let result = node.results.first().copied().unwrap_or(Eval::None);

        // The returned value is captured; temporaries of the full
        // expression die before control leaves.
        let baseline = node.temp_baseline;
        if self.drain_temporaries(baseline) {
            return;
        }

        // Park the value on the nearest call so teardown can bind it.
        for below in self.stack.iter_mut().rev() {
            if matches!(below.kind, RuntimeKind::Invoke { .. }) {
                below.pending_return = Some(result);
                break;
            }
        }
        self.stack[idx].aborting = Some(Unwind::Return);
    }

    // ==================== helpers ====================

    /// Memberwise copy of every cell of an object, as visible writes
    pub(crate) fn copy_object(&mut self, source: Address, target: Address, size: usize) {
        let cells: Vec<(Address, Value)> = self
            .memory
            .objects()
            .filter(|c| c.address >= source && c.address < source + size as Address)
            .map(|c| (c.address - source, c.value))
            .collect();
        for (offset, value) in cells {
            if !value.is_uninit() {
                self.write_cell(target + offset, value);
            }
        }
    }

    /// Backing array for a string literal, allocated once per simulation
    fn intern_string(&mut self, cid: ConstructId, text: &str) -> Address {
        if let Some(&address) = self.string_literals.get(&cid) {
            return address;
        }
        let entities = &self.program.context.entities;
        let ty = Type::char_().array_of(Some(text.len() + 1));
        let (address, _) = self.memory.allocate(&ty, ObjectKind::Static, None, entities);
        for (i, c) in text.chars().enumerate() {
            self.memory.write(address + i as Address, Value::Char(c));
        }
        self.memory
            .write(address + text.len() as Address, Value::Char('\0'));
        self.string_literals.insert(cid, address);
        address
    }
}

fn zero_value(ty: &Type) -> Option<Value> {
    match &ty.kind {
        TypeKind::Int => Some(Value::Int(0)),
        TypeKind::Double => Some(Value::Double(0.0)),
        TypeKind::Char => Some(Value::Char('\0')),
        TypeKind::Bool => Some(Value::Bool(false)),
        TypeKind::Pointer(_) => Some(Value::Pointer(0)),
        _ => None,
    }
}
