//! Translation unit elaboration
//!
//! One [`UnitCompiler`] turns one parsed translation unit into constructs,
//! entities, and scopes inside the shared [`CompileContext`]. Units are
//! elaborated independently against their own global scope; cross-unit
//! resolution happens later, during linking.

use crate::common::Span;
use crate::diagnostics::{Note, NoteKind, NoteRecorder, Severity};
use crate::frontend::ast::{
    ArrayLength, BaseTypeAst, ClassDefinitionAst, ConstructorAst, DeclKind, Declaration,
    Declarator, DeclaratorSuffix, DestructorAst, FunctionBodyAst, FunctionDefinitionAst,
    InitDeclarator, InitializerAst, MemberDeclKind, ParamAst, SimpleDeclaration,
    TranslationUnitAst, TypeSpecifier,
};
use crate::frontend::source::PreprocessedSource;
use crate::program::TranslationUnit;
use crate::sema::construct::{ConstructId, ConstructKind, MemberInitTarget, ValueCategory};
use crate::sema::entity::{
    ClassInfo, Entity, EntityId, EntityRegistry, FieldInfo, FunctionBodyKind, FunctionInfo,
    StorageKind, VariableInfo,
};
use crate::sema::scope::{
    DeclareFunctionOutcome, DeclareVariableOutcome, ScopeArena, ScopeId, ScopeKind,
};
use crate::sema::ConstructArena;
use crate::types::{FunctionType, Type, TypeKind};

/// Program-wide arenas shared by every unit's elaboration and by linking.
#[derive(Debug, Default)]
pub struct CompileContext {
    pub constructs: ConstructArena,
    pub entities: EntityRegistry,
    pub scopes: ScopeArena,
    /// Scope of each class entity, for member lookup from outside
    pub class_scopes: Vec<(EntityId, ScopeId)>,
}

impl CompileContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn class_scope(&self, class: EntityId) -> Option<ScopeId> {
        self.class_scopes
            .iter()
            .find_map(|&(id, scope)| (id == class).then_some(scope))
    }
}

/// Where a declaration appears; affects storage kind and which notes apply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DeclPosition {
    TopLevel,
    Local,
}

pub struct UnitCompiler<'a> {
    pub(crate) ctx: &'a mut CompileContext,
    pub(crate) source: &'a PreprocessedSource,
    pub(crate) recorder: NoteRecorder,
    pub(crate) global_scope: ScopeId,
    /// Return type of the function currently being elaborated
    pub(crate) current_return: Option<Type>,
    /// Class whose member is currently being elaborated
    pub(crate) current_class: Option<String>,
    pub(crate) loop_depth: usize,
    global_objects: Vec<EntityId>,
    functions: Vec<EntityId>,
    classes: Vec<EntityId>,
}

impl<'a> UnitCompiler<'a> {
    pub fn new(ctx: &'a mut CompileContext, source: &'a PreprocessedSource) -> Self {
        let global_scope = ctx.scopes.new_scope(ScopeKind::Global, None);
        Self {
            ctx,
            source,
            recorder: NoteRecorder::new(),
            global_scope,
            current_return: None,
            current_class: None,
            loop_depth: 0,
            global_objects: Vec::new(),
            functions: Vec::new(),
            classes: Vec::new(),
        }
    }

    /// Elaborate the whole unit. Never fails; language errors end up as
    /// notes in the unit recorder.
    pub fn compile(mut self, ast: &TranslationUnitAst, name: &str) -> TranslationUnit {
        let mut top_level = Vec::new();
        for decl in &ast.declarations {
            top_level.extend(self.elaborate_top_level(decl));
        }
        TranslationUnit {
            name: name.to_string(),
            top_level,
            global_scope: self.global_scope,
            recorder: self.recorder,
            global_objects: self.global_objects,
            functions: self.functions,
            classes: self.classes,
            included_files: Vec::new(),
        }
    }

    // ==================== note helpers ====================

    pub(crate) fn note_at(
        &mut self,
        construct: ConstructId,
        severity: Severity,
        id: &str,
        message: impl Into<String>,
        span: Span,
    ) {
        let note = Note::new(
            NoteKind::Compiler,
            severity,
            id,
            message,
            vec![self.source.source_ref(span)],
        );
        self.recorder.add(note.clone());
        self.ctx.constructs.note(construct, note);
    }

    pub(crate) fn error_at(
        &mut self,
        construct: ConstructId,
        id: &str,
        message: impl Into<String>,
        span: Span,
    ) {
        self.note_at(construct, Severity::Error, id, message, span);
    }

    pub(crate) fn attach_notes(&mut self, construct: ConstructId, notes: Vec<Note>) {
        for note in notes {
            self.recorder.add(note.clone());
            self.ctx.constructs.note(construct, note);
        }
    }

    // ==================== top level ====================

    fn elaborate_top_level(&mut self, decl: &Declaration) -> Vec<ConstructId> {
        match &decl.kind {
            DeclKind::Class(class) => vec![self.elaborate_class(class)],
            DeclKind::Function(func) => vec![self.elaborate_free_function(func)],
            DeclKind::Simple(simple) => {
                self.elaborate_simple(simple, self.global_scope, DeclPosition::TopLevel)
            }
        }
    }

    // ==================== simple declarations ====================

    /// Elaborate each init-declarator of a simple declaration into its own
    /// construct (a variable definition, function prototype, or invalid
    /// declaration).
    pub(crate) fn elaborate_simple(
        &mut self,
        simple: &SimpleDeclaration,
        scope: ScopeId,
        position: DeclPosition,
    ) -> Vec<ConstructId> {
        let mut out = Vec::new();
        for init_decl in &simple.declarators {
            out.push(self.elaborate_init_declarator(&simple.spec, init_decl, scope, position));
        }
        out
    }

    pub(crate) fn elaborate_local_declaration(
        &mut self,
        simple: &SimpleDeclaration,
        scope: ScopeId,
    ) -> Vec<ConstructId> {
        self.elaborate_simple(simple, scope, DeclPosition::Local)
    }

    fn elaborate_init_declarator(
        &mut self,
        spec: &TypeSpecifier,
        init_decl: &InitDeclarator,
        scope: ScopeId,
        position: DeclPosition,
    ) -> ConstructId {
        let span = init_decl.span;
        let declarator = &init_decl.declarator;

        // Function prototype inside a simple declaration
        if let Some(DeclaratorSuffix::Function(params)) = &declarator.suffix {
            return self.elaborate_function_declaration(spec, declarator, params, scope, span);
        }

        let (ty, type_notes) = self.declarator_type(spec, declarator, scope);
        let sref = Some(self.source.source_ref(span));

        let Some(name) = declarator.name.clone() else {
            let c = self
                .ctx
                .constructs
                .add(ConstructKind::InvalidDeclaration, span, sref);
            self.attach_notes(c, type_notes);
            self.error_at(c, "declaration.missing_name", "declaration declares nothing", span);
            return c;
        };

        if ty.strip_reference().is_void() {
            let c = self
                .ctx
                .constructs
                .add(ConstructKind::InvalidDeclaration, span, sref);
            self.attach_notes(c, type_notes);
            self.error_at(
                c,
                "declaration.void_prohibited",
                format!("variable '{name}' cannot have type void"),
                span,
            );
            return c;
        }

        let storage = match position {
            DeclPosition::TopLevel => StorageKind::Static,
            DeclPosition::Local => StorageKind::Local,
        };

        let entity = self.ctx.entities.add(Entity::Variable(VariableInfo {
            name: name.clone(),
            ty: ty.clone(),
            storage,
            declared_at: Some(self.source.source_ref(span)),
            definition: None,
            resolved: storage != StorageKind::Static,
        }));

        // Initializer before scope entry, so the name is not visible to its
        // own initializer.
        let init = self.elaborate_initializer(&ty, init_decl.init.as_ref(), scope, span);

        let construct = self.ctx.constructs.add(
            ConstructKind::VariableDefinition { entity, init },
            span,
            sref,
        );
        self.attach_notes(construct, type_notes);

        if !ty.is_complete(&self.ctx.entities) && !ty.is_reference() {
            self.error_at(
                construct,
                "declaration.incomplete",
                format!("cannot create an object of incomplete type '{ty}'"),
                span,
            );
        }

        match self.ctx.scopes.declare_variable(scope, &name, entity) {
            DeclareVariableOutcome::Added => {}
            DeclareVariableOutcome::AlreadyBound(prev) => {
                let merged = position == DeclPosition::TopLevel
                    && init_decl.init.is_none()
                    && self
                        .ctx
                        .entities
                        .variable(prev)
                        .is_some_and(|v| v.ty == ty);
                if merged {
                    // Same-type global redeclaration folds into the earlier
                    // entity; link time decides which one defines.
                    self.ctx.scopes.rebind_variable(scope, &name, prev);
                } else {
                    let prev_ty = self.ctx.entities.variable(prev).map(|v| v.ty.clone());
                    match prev_ty {
                        Some(pt) if pt != ty => self.error_at(
                            construct,
                            "declaration.type_mismatch",
                            format!("'{name}' redeclared as '{ty}', previously declared as '{pt}'"),
                            span,
                        ),
                        _ => self.error_at(
                            construct,
                            "declaration.prev_def",
                            format!("'{name}' is already defined in this scope"),
                            span,
                        ),
                    }
                }
            }
            DeclareVariableOutcome::ClashesFunction => {
                self.error_at(
                    construct,
                    "declaration.symbol_mismatch",
                    format!("'{name}' is already declared as a function"),
                    span,
                );
            }
        }

        if position == DeclPosition::TopLevel {
            self.global_objects.push(entity);
            // Every global declaration in this subset is a definition, so
            // startup runs its initializer construct (zero or constructor
            // default when none was written).
            if let Some(v) = self.ctx.entities.variable_mut(entity) {
                v.definition = Some(construct);
            }
        }

        construct
    }

    // ==================== initializers ====================

    pub(crate) fn elaborate_initializer(
        &mut self,
        target: &Type,
        init: Option<&InitializerAst>,
        scope: ScopeId,
        span: Span,
    ) -> Option<ConstructId> {
        if let TypeKind::Reference(referent) = &target.kind {
            return Some(self.elaborate_reference_init(referent, init, scope, span));
        }
        match init {
            None => Some(self.default_initializer(target, span)),
            Some(InitializerAst::Copy(expr)) => {
                let arg = self.elaborate_expression(expr, scope);
                Some(self.value_initializer(target, vec![arg], true, span))
            }
            Some(InitializerAst::Direct(args, args_span)) => {
                let elaborated: Vec<_> = args
                    .iter()
                    .map(|a| self.elaborate_expression(a, scope))
                    .collect();
                Some(self.value_initializer(target, elaborated, false, *args_span))
            }
        }
    }

    fn elaborate_reference_init(
        &mut self,
        referent: &Type,
        init: Option<&InitializerAst>,
        scope: ScopeId,
        span: Span,
    ) -> ConstructId {
        let source_expr = match init {
            Some(InitializerAst::Copy(expr)) => Some(expr),
            Some(InitializerAst::Direct(args, _)) if args.len() == 1 => Some(&args[0]),
            _ => None,
        };
        let Some(expr) = source_expr else {
            let c = self.ctx.constructs.add(
                ConstructKind::InvalidDeclaration,
                span,
                Some(self.source.source_ref(span)),
            );
            self.error_at(
                c,
                "declaration.ref.unbound",
                "a reference must be bound to an object when declared",
                span,
            );
            return c;
        };
        let source = self.elaborate_expression(expr, scope);
        let bind = self.ctx.constructs.add(
            ConstructKind::ReferenceBind { source },
            span,
            Some(self.source.source_ref(span)),
        );
        let info = self.ctx.constructs.get(source).expr.clone();
        if let Some(info) = info {
            if info.category != ValueCategory::Lvalue {
                self.error_at(
                    bind,
                    "declaration.ref.prvalue",
                    "a reference cannot be bound to a temporary value",
                    span,
                );
            } else if !info.ty.same_ignoring_top_const(referent) {
                self.error_at(
                    bind,
                    "declaration.ref.type_mismatch",
                    format!(
                        "cannot bind a reference of type '{referent}&' to '{}'",
                        info.ty
                    ),
                    span,
                );
            } else if info.ty.is_const && !referent.is_const {
                self.error_at(
                    bind,
                    "declaration.ref.const_away",
                    "binding a non-const reference to a const object discards const",
                    span,
                );
            }
        }
        bind
    }

    pub(crate) fn default_initializer(&mut self, target: &Type, span: Span) -> ConstructId {
        let ctor = self.default_constructor_for(target, span);
        self.ctx.constructs.add(
            ConstructKind::DefaultInit {
                ty: target.clone(),
                ctor,
            },
            span,
            Some(self.source.source_ref(span)),
        )
    }

    fn default_constructor_for(&mut self, target: &Type, span: Span) -> Option<EntityId> {
        let elem = innermost_element(target);
        let name = elem.class_name()?.to_string();
        let (_, class) = self.ctx.entities.class_by_name(&name)?;
        if class.constructors.is_empty() {
            // Trivial default initialization, no constructor runs.
            return None;
        }
        let ctors = class.constructors.clone();
        let chosen = ctors.iter().copied().find(|&c| {
            self.ctx
                .entities
                .function(c)
                .is_some_and(|f| f.ty.params.is_empty())
        });
        if chosen.is_none() {
            self.recorder.add(Note::error(
                NoteKind::Compiler,
                "declaration.init.no_default_ctor",
                format!("class '{name}' has no default constructor"),
                self.source.source_ref(span),
            ));
        }
        chosen
    }

    /// `= expr` and `(args...)` initialization for non-reference targets
    pub(crate) fn value_initializer(
        &mut self,
        target: &Type,
        args: Vec<ConstructId>,
        copy_form: bool,
        span: Span,
    ) -> ConstructId {
        if target.is_class() {
            return self.class_initializer(target, args, copy_form, span);
        }

        let construct = self.ctx.constructs.add(
            ConstructKind::DirectInit {
                ty: target.clone(),
                args: args.clone(),
                ctor: None,
                copy_form,
            },
            span,
            Some(self.source.source_ref(span)),
        );

        if target.is_array() {
            self.error_at(
                construct,
                "declaration.init.array",
                "arrays cannot be initialized with an initializer in this subset",
                span,
            );
            return construct;
        }

        if args.len() != 1 {
            self.error_at(
                construct,
                "declaration.init.scalar_args",
                format!("expected 1 initializer argument, found {}", args.len()),
                span,
            );
            return construct;
        }

        let converted = self.convert_for_init(args[0], target, span);
        let c = self.ctx.constructs.get_mut(construct);
        c.kind = ConstructKind::DirectInit {
            ty: target.clone(),
            args: vec![converted],
            ctor: None,
            copy_form,
        };
        c.children = vec![converted];
        construct
    }

    fn class_initializer(
        &mut self,
        target: &Type,
        args: Vec<ConstructId>,
        copy_form: bool,
        span: Span,
    ) -> ConstructId {
        let name = target.class_name().unwrap_or_default().to_string();
        let construct = self.ctx.constructs.add(
            ConstructKind::DirectInit {
                ty: target.clone(),
                args: args.clone(),
                ctor: None,
                copy_form,
            },
            span,
            Some(self.source.source_ref(span)),
        );

        let Some((_, class)) = self.ctx.entities.class_by_name(&name) else {
            self.error_at(
                construct,
                "declaration.init.incomplete",
                format!("cannot create an object of incomplete type '{name}'"),
                span,
            );
            return construct;
        };

        if class.constructors.is_empty() {
            // Trivial class: copy-init from a same-class value is memberwise.
            if args.len() == 1 {
                let arg_ty = self.ctx.constructs.get(args[0]).expr_type().cloned();
                if arg_ty.is_some_and(|t| t.class_name() == Some(name.as_str())) {
                    return construct;
                }
            }
            self.error_at(
                construct,
                "declaration.init.matching_ctor",
                format!("no matching constructor for '{name}'"),
                span,
            );
            return construct;
        }

        let candidates = class.constructors.clone();
        match self.resolve_overload(&candidates, &args, span) {
            Ok((ctor, converted)) => {
                let c = self.ctx.constructs.get_mut(construct);
                c.kind = ConstructKind::DirectInit {
                    ty: target.clone(),
                    args: converted.clone(),
                    ctor: Some(ctor),
                    copy_form,
                };
                c.children = converted;
            }
            Err(failure) => {
                self.report_overload_failure(construct, &name, failure, span);
            }
        }
        construct
    }

    // ==================== types ====================

    /// Compute the declared type from specifier plus declarator, collecting
    /// any notes to attach once the owning construct exists.
    pub(crate) fn declarator_type(
        &mut self,
        spec: &TypeSpecifier,
        declarator: &Declarator,
        scope: ScopeId,
    ) -> (Type, Vec<Note>) {
        let mut notes = Vec::new();

        if spec.duplicate_const {
            notes.push(Note::new(
                NoteKind::Compiler,
                Severity::Style,
                "type.const_once",
                "'const' appears more than once; once is enough",
                vec![self.source.source_ref(spec.span)],
            ));
        }

        let mut ty = match &spec.base {
            BaseTypeAst::Void => Type::void(),
            BaseTypeAst::Bool => Type::bool_(),
            BaseTypeAst::Char => Type::char_(),
            BaseTypeAst::Int => Type::int(),
            BaseTypeAst::Double => Type::double(),
            BaseTypeAst::Named(name) => {
                if self.ctx.scopes.lookup_class(scope, name).is_none() {
                    notes.push(Note::error(
                        NoteKind::Compiler,
                        "iden.no_match",
                        format!("unknown type '{name}'"),
                        self.source.source_ref(spec.span),
                    ));
                }
                Type::class(name.clone())
            }
        };
        if spec.is_const {
            ty = ty.with_const();
        }

        for &const_ptr in &declarator.pointers {
            ty = ty.pointer_to();
            if const_ptr {
                ty = ty.with_const();
            }
        }

        if let Some(DeclaratorSuffix::Array(length)) = &declarator.suffix {
            if declarator.is_reference {
                notes.push(Note::error(
                    NoteKind::Compiler,
                    "declaration.ref.array",
                    "arrays of references are not allowed",
                    self.source.source_ref(declarator.span),
                ));
            }
            let len = match length {
                Some(ArrayLength::Literal(n, _)) => Some(*n),
                Some(ArrayLength::Other(bad)) => {
                    notes.push(Note::error(
                        NoteKind::Compiler,
                        "declaration.array.invalid_length",
                        "array length must be an integer literal",
                        self.source.source_ref(*bad),
                    ));
                    None
                }
                None => None,
            };
            ty = ty.array_of(len);
        } else if declarator.is_reference {
            ty = ty.reference_to();
        }

        (ty, notes)
    }

    // ==================== functions ====================

    fn function_type(
        &mut self,
        spec: &TypeSpecifier,
        declarator: &Declarator,
        params: &[ParamAst],
        scope: ScopeId,
    ) -> (FunctionType, Vec<String>, Vec<Note>) {
        // Return type: specifier plus the pointer/reference parts of the
        // declarator, without the function suffix.
        let return_declarator = Declarator {
            pointers: declarator.pointers.clone(),
            is_reference: declarator.is_reference,
            name: None,
            suffix: None,
            span: declarator.span,
        };
        let (return_type, mut notes) = self.declarator_type(spec, &return_declarator, scope);

        let mut param_types = Vec::new();
        let mut param_names = Vec::new();
        for param in params {
            let (pty, pnotes) = self.declarator_type(&param.spec, &param.declarator, scope);
            notes.extend(pnotes);
            if pty.strip_reference().is_void() {
                notes.push(Note::error(
                    NoteKind::Compiler,
                    "declaration.func.void_param",
                    "function parameters cannot have type void",
                    self.source.source_ref(param.span),
                ));
            }
            // Array parameters adjust to pointers.
            param_types.push(pty.decayed());
            param_names.push(param.declarator.name.clone().unwrap_or_default());
        }

        (
            FunctionType {
                return_type,
                params: param_types,
            },
            param_names,
            notes,
        )
    }

    fn elaborate_function_declaration(
        &mut self,
        spec: &TypeSpecifier,
        declarator: &Declarator,
        params: &[ParamAst],
        scope: ScopeId,
        span: Span,
    ) -> ConstructId {
        let (ty, param_names, notes) = self.function_type(spec, declarator, params, scope);
        let name = declarator.name.clone().unwrap_or_default();
        let qualified = match &self.current_class {
            Some(class) => format!("{class}::{name}"),
            None => format!("::{name}"),
        };
        let entity = self.ctx.entities.add(Entity::Function(FunctionInfo {
            name: name.clone(),
            qualified_name: qualified,
            ty: ty.clone(),
            member_of: self.current_class.clone(),
            is_virtual: false,
            is_constructor: false,
            is_destructor: false,
            declared_at: Some(self.source.source_ref(span)),
            body_kind: FunctionBodyKind::None,
            definition: None,
            param_names,
        }));

        let construct = self.ctx.constructs.add(
            ConstructKind::FunctionPrototype { entity },
            span,
            Some(self.source.source_ref(span)),
        );
        self.attach_notes(construct, notes);
        if name.is_empty() {
            self.error_at(
                construct,
                "declaration.missing_name",
                "function declaration without a name",
                span,
            );
        }

        match self
            .ctx
            .scopes
            .declare_function(scope, &name, entity, &ty, &self.ctx.entities)
        {
            DeclareFunctionOutcome::Added | DeclareFunctionOutcome::SameSignature(_) => {}
            DeclareFunctionOutcome::ClashesObject(_) => {
                self.error_at(
                    construct,
                    "declaration.symbol_mismatch",
                    format!("'{name}' is already declared as a variable"),
                    span,
                );
            }
        }
        if self.current_class.is_none() {
            self.functions.push(entity);
        }
        construct
    }

    /// Scope holding a function's parameters, with one entity per parameter
    fn make_function_scope(
        &mut self,
        ty: &FunctionType,
        param_names: &[String],
        parent: ScopeId,
    ) -> (ScopeId, Vec<EntityId>) {
        let func_scope = self.ctx.scopes.new_scope(ScopeKind::Function, Some(parent));
        let mut params = Vec::new();
        for (pty, pname) in ty.params.iter().zip(param_names) {
            let param = self.ctx.entities.add(Entity::Variable(VariableInfo {
                name: pname.clone(),
                ty: pty.clone(),
                storage: StorageKind::Parameter,
                declared_at: None,
                definition: None,
                resolved: true,
            }));
            if !pname.is_empty() {
                self.ctx.scopes.declare_variable(func_scope, pname, param);
            }
            params.push(param);
        }
        (func_scope, params)
    }

    fn elaborate_body_construct(&mut self, body: &FunctionBodyAst, scope: ScopeId) -> ConstructId {
        match body {
            FunctionBodyAst::Block(block) => self.elaborate_block(block, scope),
            FunctionBodyAst::Opaque { marker, span } => self.ctx.constructs.add(
                ConstructKind::OpaqueBody {
                    marker: marker.clone(),
                },
                *span,
                Some(self.source.source_ref(*span)),
            ),
        }
    }

    fn finish_function_definition(
        &mut self,
        entity: EntityId,
        params: Vec<EntityId>,
        ctor_inits: Vec<ConstructId>,
        body: ConstructId,
        span: Span,
    ) -> ConstructId {
        let construct = self.ctx.constructs.add(
            ConstructKind::FunctionDefinition {
                entity,
                params,
                ctor_inits,
                body,
            },
            span,
            Some(self.source.source_ref(span)),
        );
        if let Some(func) = self.ctx.entities.function_mut(entity) {
            func.definition = Some(construct);
        }
        construct
    }

    fn elaborate_free_function(&mut self, func: &FunctionDefinitionAst) -> ConstructId {
        let scope = self.global_scope;
        let span = func.span;
        let (ty, param_names, notes) = self.function_type(
            &func.spec,
            &func.declarator,
            function_params(&func.declarator),
            scope,
        );
        let name = func.declarator.name.clone().unwrap_or_default();

        let entity = self.ctx.entities.add(Entity::Function(FunctionInfo {
            name: name.clone(),
            qualified_name: format!("::{name}"),
            ty: ty.clone(),
            member_of: None,
            is_virtual: func.is_virtual,
            is_constructor: false,
            is_destructor: false,
            declared_at: Some(self.source.source_ref(span)),
            body_kind: match func.body {
                FunctionBodyAst::Block(_) => FunctionBodyKind::Block,
                FunctionBodyAst::Opaque { .. } => FunctionBodyKind::Opaque,
            },
            definition: None,
            param_names: param_names.clone(),
        }));

        let (func_scope, params) = self.make_function_scope(&ty, &param_names, scope);
        let saved_return = self.current_return.replace(ty.return_type.clone());
        let body = self.elaborate_body_construct(&func.body, func_scope);
        self.current_return = saved_return;

        let construct = self.finish_function_definition(entity, params, Vec::new(), body, span);
        self.attach_notes(construct, notes);

        match self
            .ctx
            .scopes
            .declare_function(scope, &name, entity, &ty, &self.ctx.entities)
        {
            DeclareFunctionOutcome::Added => {}
            DeclareFunctionOutcome::SameSignature(_) => {
                // The earlier binding may be a prototype this definition
                // resolves; linking decides, so no note here.
            }
            DeclareFunctionOutcome::ClashesObject(_) => {
                self.error_at(
                    construct,
                    "declaration.symbol_mismatch",
                    format!("'{name}' is already declared as a variable"),
                    span,
                );
            }
        }
        self.functions.push(entity);
        construct
    }

    // ==================== classes ====================

    fn elaborate_class(&mut self, class: &ClassDefinitionAst) -> ConstructId {
        let span = class.span;
        let name = class.name.clone();

        // Phase one: register the (incomplete) class and its scope so member
        // types and pointers to the class resolve while the body is open.
        let base_info = class.base.as_ref().and_then(|base_name| {
            self.ctx
                .entities
                .class_by_name(base_name)
                .map(|(id, info)| (id, info.size))
        });

        let entity = self.ctx.entities.add(Entity::Class(ClassInfo {
            name: name.clone(),
            base: class.base.clone(),
            fields: Vec::new(),
            size: 0,
            constructors: Vec::new(),
            destructor: None,
            member_functions: Vec::new(),
            complete: false,
            declared_at: Some(self.source.source_ref(span)),
        }));

        let construct = self.ctx.constructs.add(
            ConstructKind::ClassDefinition { entity },
            span,
            Some(self.source.source_ref(span)),
        );

        if self
            .ctx
            .scopes
            .declare_class(self.global_scope, &name, entity)
            .is_some()
        {
            self.error_at(
                construct,
                "declaration.prev_def",
                format!("class '{name}' is already defined"),
                span,
            );
        }

        let class_scope = self.ctx.scopes.new_scope(
            ScopeKind::Class { name: name.clone() },
            Some(self.global_scope),
        );
        self.ctx.class_scopes.push((entity, class_scope));

        if let Some(base_name) = &class.base {
            match base_info {
                Some((base_id, _)) => {
                    if let Some(base_scope) = self.ctx.class_scope(base_id) {
                        self.ctx.scopes.set_base(class_scope, base_scope);
                    }
                }
                None => {
                    self.error_at(
                        construct,
                        "iden.no_match",
                        format!("unknown base class '{base_name}'"),
                        span,
                    );
                }
            }
        }

        // Phase two: fields and layout, then member functions against the
        // finished layout.
        let mut offset = base_info.map_or(0, |(_, size)| size);
        let mut fields = Vec::new();
        for member in &class.members {
            let MemberDeclKind::Field(simple) = &member.kind else {
                continue;
            };
            for init_decl in &simple.declarators {
                if matches!(
                    init_decl.declarator.suffix,
                    Some(DeclaratorSuffix::Function(_))
                ) {
                    continue; // prototypes handled below
                }
                let (fty, fnotes) =
                    self.declarator_type(&simple.spec, &init_decl.declarator, class_scope);
                self.attach_notes(construct, fnotes);
                let Some(fname) = init_decl.declarator.name.clone() else {
                    continue;
                };
                if fty.strip_reference().is_void() {
                    self.error_at(
                        construct,
                        "declaration.void_prohibited",
                        format!("member '{fname}' cannot have type void"),
                        init_decl.span,
                    );
                    continue;
                }
                if init_decl.init.is_some() {
                    self.error_at(
                        construct,
                        "declaration.member.initializer",
                        "members are initialized in constructors, not in the class body",
                        init_decl.span,
                    );
                }
                let size = fty.size(&self.ctx.entities).unwrap_or(0);
                if size == 0 && !fty.is_reference() {
                    self.error_at(
                        construct,
                        "declaration.member.incomplete",
                        format!("member '{fname}' has incomplete type '{fty}'"),
                        init_decl.span,
                    );
                }
                let field_entity = self.ctx.entities.add(Entity::Variable(VariableInfo {
                    name: fname.clone(),
                    ty: fty.clone(),
                    storage: StorageKind::Member,
                    declared_at: Some(self.source.source_ref(init_decl.span)),
                    definition: None,
                    resolved: true,
                }));
                self.ctx
                    .scopes
                    .declare_variable(class_scope, &fname, field_entity);
                fields.push(FieldInfo {
                    name: fname,
                    ty: fty,
                    offset,
                    access: member.access,
                });
                offset += size;
            }
        }

        if let Some(info) = self.ctx.entities.class_mut(entity) {
            info.fields = fields;
            // Empty classes still occupy one unit so distinct objects get
            // distinct addresses.
            info.size = offset.max(1);
            info.complete = true;
        }

        // Member functions, constructors, destructor.
        for member in &class.members {
            match &member.kind {
                MemberDeclKind::Field(_) => {}
                MemberDeclKind::Function(func) => {
                    let fc = self.elaborate_member_function(func, &name, entity, class_scope);
                    self.ctx.constructs.get_mut(construct).children.push(fc);
                }
                MemberDeclKind::Prototype(simple) => {
                    let saved = self.current_class.replace(name.clone());
                    for init_decl in &simple.declarators {
                        if let Some(DeclaratorSuffix::Function(params)) =
                            &init_decl.declarator.suffix
                        {
                            let pc = self.elaborate_function_declaration(
                                &simple.spec,
                                &init_decl.declarator,
                                params,
                                class_scope,
                                init_decl.span,
                            );
                            self.ctx.constructs.get_mut(construct).children.push(pc);
                        }
                    }
                    self.current_class = saved;
                }
                MemberDeclKind::Constructor(ctor) => {
                    let cc = self.elaborate_constructor(ctor, &name, entity, class_scope);
                    self.ctx.constructs.get_mut(construct).children.push(cc);
                }
                MemberDeclKind::Destructor(dtor) => {
                    let dc = self.elaborate_destructor(dtor, &name, entity, class_scope);
                    self.ctx.constructs.get_mut(construct).children.push(dc);
                }
            }
        }

        self.classes.push(entity);
        construct
    }

    fn elaborate_member_function(
        &mut self,
        func: &FunctionDefinitionAst,
        class_name: &str,
        class_entity: EntityId,
        class_scope: ScopeId,
    ) -> ConstructId {
        let span = func.span;
        let (ty, param_names, notes) = self.function_type(
            &func.spec,
            &func.declarator,
            function_params(&func.declarator),
            class_scope,
        );
        let name = func.declarator.name.clone().unwrap_or_default();

        // Virtual propagates from a base declaration of the same signature.
        let inherited_virtual = self.base_declares_virtual(class_entity, &name, &ty);

        let entity = self.ctx.entities.add(Entity::Function(FunctionInfo {
            name: name.clone(),
            qualified_name: format!("{class_name}::{name}"),
            ty: ty.clone(),
            member_of: Some(class_name.to_string()),
            is_virtual: func.is_virtual || inherited_virtual,
            is_constructor: false,
            is_destructor: false,
            declared_at: Some(self.source.source_ref(span)),
            body_kind: match func.body {
                FunctionBodyAst::Block(_) => FunctionBodyKind::Block,
                FunctionBodyAst::Opaque { .. } => FunctionBodyKind::Opaque,
            },
            definition: None,
            param_names: param_names.clone(),
        }));

        self.ctx
            .scopes
            .declare_function(class_scope, &name, entity, &ty, &self.ctx.entities);
        if let Some(info) = self.ctx.entities.class_mut(class_entity) {
            info.member_functions.push(entity);
        }

        let (func_scope, params) = self.make_function_scope(&ty, &param_names, class_scope);
        let saved_return = self.current_return.replace(ty.return_type.clone());
        let saved_class = self.current_class.replace(class_name.to_string());
        let body = self.elaborate_body_construct(&func.body, func_scope);
        self.current_return = saved_return;
        self.current_class = saved_class;

        let construct = self.finish_function_definition(entity, params, Vec::new(), body, span);
        self.attach_notes(construct, notes);
        construct
    }

    fn base_declares_virtual(
        &self,
        class_entity: EntityId,
        name: &str,
        ty: &FunctionType,
    ) -> bool {
        let mut current = self
            .ctx
            .entities
            .class(class_entity)
            .and_then(|c| c.base.clone());
        while let Some(base_name) = current {
            let Some((_, base)) = self.ctx.entities.class_by_name(&base_name) else {
                return false;
            };
            for &fid in &base.member_functions {
                if let Some(f) = self.ctx.entities.function(fid) {
                    if f.name == name && f.ty.same_signature(ty) && f.is_virtual {
                        return true;
                    }
                }
            }
            current = base.base.clone();
        }
        false
    }

    fn elaborate_constructor(
        &mut self,
        ctor: &ConstructorAst,
        class_name: &str,
        class_entity: EntityId,
        class_scope: ScopeId,
    ) -> ConstructId {
        let span = ctor.span;
        let mut param_types = Vec::new();
        let mut param_names = Vec::new();
        let mut notes = Vec::new();
        for param in &ctor.params {
            let (pty, pnotes) = self.declarator_type(&param.spec, &param.declarator, class_scope);
            notes.extend(pnotes);
            param_types.push(pty.decayed());
            param_names.push(param.declarator.name.clone().unwrap_or_default());
        }
        let ty = FunctionType {
            return_type: Type::void(),
            params: param_types,
        };

        let entity = self.ctx.entities.add(Entity::Function(FunctionInfo {
            name: ctor.name.clone(),
            qualified_name: format!("{class_name}::{class_name}"),
            ty: ty.clone(),
            member_of: Some(class_name.to_string()),
            is_virtual: false,
            is_constructor: true,
            is_destructor: false,
            declared_at: Some(self.source.source_ref(span)),
            body_kind: match ctor.body {
                FunctionBodyAst::Block(_) => FunctionBodyKind::Block,
                FunctionBodyAst::Opaque { .. } => FunctionBodyKind::Opaque,
            },
            definition: None,
            param_names: param_names.clone(),
        }));
        if let Some(info) = self.ctx.entities.class_mut(class_entity) {
            info.constructors.push(entity);
        }

        // One scope serves both the initializer list and the body, so member
        // initializers see the same parameter objects the body does.
        let (func_scope, params) = self.make_function_scope(&ty, &param_names, class_scope);
        let saved_return = self.current_return.replace(Type::void());
        let saved_class = self.current_class.replace(class_name.to_string());
        let ctor_inits = self.elaborate_member_inits(ctor, class_name, class_entity, func_scope);
        let body = self.elaborate_body_construct(&ctor.body, func_scope);
        self.current_return = saved_return;
        self.current_class = saved_class;

        let construct = self.finish_function_definition(entity, params, ctor_inits, body, span);
        self.attach_notes(construct, notes);
        construct
    }

    /// Initializer-list entries in initialization order: base first, then
    /// fields in declaration order, regardless of the order written.
    fn elaborate_member_inits(
        &mut self,
        ctor: &ConstructorAst,
        class_name: &str,
        class_entity: EntityId,
        scope: ScopeId,
    ) -> Vec<ConstructId> {
        let class = match self.ctx.entities.class(class_entity) {
            Some(c) => c.clone(),
            None => return Vec::new(),
        };

        let mut out = Vec::new();

        if let Some(base_name) = class.base.clone() {
            let written = ctor.member_inits.iter().find(|mi| mi.name == base_name);
            let init = match written {
                Some(mi) => {
                    let args: Vec<_> = mi
                        .args
                        .iter()
                        .map(|a| self.elaborate_expression(a, scope))
                        .collect();
                    self.value_initializer(&Type::class(base_name.clone()), args, false, mi.span)
                }
                None => self.default_initializer(&Type::class(base_name.clone()), ctor.span),
            };
            out.push(self.ctx.constructs.add(
                ConstructKind::BaseOrMemberInit {
                    target: MemberInitTarget::Base(base_name),
                    init,
                },
                ctor.span,
                Some(self.source.source_ref(ctor.span)),
            ));
        }

        for field in &class.fields {
            let written = ctor.member_inits.iter().find(|mi| mi.name == field.name);
            let init = match written {
                Some(mi) => {
                    if field.ty.is_reference() {
                        let ast_init = match mi.args.as_slice() {
                            [single] => Some(InitializerAst::Copy(single.clone())),
                            _ => None,
                        };
                        let TypeKind::Reference(referent) = field.ty.kind.clone() else {
                            unreachable!()
                        };
                        self.elaborate_reference_init(&referent, ast_init.as_ref(), scope, mi.span)
                    } else {
                        let args: Vec<_> = mi
                            .args
                            .iter()
                            .map(|a| self.elaborate_expression(a, scope))
                            .collect();
                        self.value_initializer(&field.ty, args, false, mi.span)
                    }
                }
                None => self.default_initializer(&field.ty, ctor.span),
            };
            out.push(self.ctx.constructs.add(
                ConstructKind::BaseOrMemberInit {
                    target: MemberInitTarget::Field(field.name.clone()),
                    init,
                },
                ctor.span,
                Some(self.source.source_ref(ctor.span)),
            ));
        }

        // Entries naming nothing in the class are errors.
        for mi in &ctor.member_inits {
            let names_base = class.base.as_deref() == Some(mi.name.as_str());
            let names_field = class.fields.iter().any(|f| f.name == mi.name);
            if !names_base && !names_field {
                self.recorder.add(Note::error(
                    NoteKind::Compiler,
                    "iden.no_match",
                    format!("'{}' is not a member or base of '{class_name}'", mi.name),
                    self.source.source_ref(mi.span),
                ));
            }
        }

        out
    }

    fn elaborate_destructor(
        &mut self,
        dtor: &DestructorAst,
        class_name: &str,
        class_entity: EntityId,
        class_scope: ScopeId,
    ) -> ConstructId {
        let span = dtor.span;
        let ty = FunctionType {
            return_type: Type::void(),
            params: Vec::new(),
        };
        let inherited_virtual = {
            let base = self
                .ctx
                .entities
                .class(class_entity)
                .and_then(|c| c.base.clone());
            base.and_then(|b| {
                let (_, info) = self.ctx.entities.class_by_name(&b)?;
                let dtor_id = info.destructor?;
                self.ctx.entities.function(dtor_id).map(|f| f.is_virtual)
            })
            .unwrap_or(false)
        };

        let entity = self.ctx.entities.add(Entity::Function(FunctionInfo {
            name: dtor.name.clone(),
            qualified_name: format!("{class_name}::{}", dtor.name),
            ty: ty.clone(),
            member_of: Some(class_name.to_string()),
            is_virtual: dtor.is_virtual || inherited_virtual,
            is_constructor: false,
            is_destructor: true,
            declared_at: Some(self.source.source_ref(span)),
            body_kind: match dtor.body {
                FunctionBodyAst::Block(_) => FunctionBodyKind::Block,
                FunctionBodyAst::Opaque { .. } => FunctionBodyKind::Opaque,
            },
            definition: None,
            param_names: Vec::new(),
        }));
        if let Some(info) = self.ctx.entities.class_mut(class_entity) {
            info.destructor = Some(entity);
        }

        let (func_scope, params) = self.make_function_scope(&ty, &[], class_scope);
        let saved_return = self.current_return.replace(Type::void());
        let saved_class = self.current_class.replace(class_name.to_string());
        let body = self.elaborate_body_construct(&dtor.body, func_scope);
        self.current_return = saved_return;
        self.current_class = saved_class;

        self.finish_function_definition(entity, params, Vec::new(), body, span)
    }
}

/// Parameters of a declarator known to carry a function suffix
fn function_params(declarator: &Declarator) -> &[ParamAst] {
    match &declarator.suffix {
        Some(DeclaratorSuffix::Function(params)) => params,
        _ => &[],
    }
}

/// Element type at the bottom of any array nesting
fn innermost_element(ty: &Type) -> &Type {
    match &ty.kind {
        TypeKind::Array { element, .. } => innermost_element(element),
        _ => ty,
    }
}
