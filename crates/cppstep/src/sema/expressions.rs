//! Expression elaboration
//!
//! Every expression becomes a typed construct with an explicit value
//! category. Standard conversions are constructs of their own so stepping
//! shows each lvalue-to-rvalue read, array decay, and arithmetic conversion
//! as it happens.

use crate::common::Span;
use crate::frontend::ast::{BinaryOp, ExprKind, Expression, UnaryOp};
use crate::sema::compiler::UnitCompiler;
use crate::sema::construct::{
    ArithOp, CompareOp, ConstructId, ConstructKind, Conversion, ExprInfo, ValueCategory,
};
use crate::sema::entity::EntityId;
use crate::sema::scope::{LookupOutcome, ScopeId};
use crate::sema::StorageKind;
use crate::types::{Type, TypeKind};

/// Why overload resolution failed
#[derive(Debug)]
pub(crate) enum OverloadFailure {
    NoViable,
    Ambiguous(Vec<EntityId>),
}

impl UnitCompiler<'_> {
    pub(crate) fn elaborate_expression(
        &mut self,
        expr: &Expression,
        scope: ScopeId,
    ) -> ConstructId {
        let span = expr.span;
        match &expr.kind {
            ExprKind::IntLiteral(v) => self.literal(ConstructKind::IntLiteral(*v), Type::int(), span),
            ExprKind::DoubleLiteral(v) => {
                self.literal(ConstructKind::DoubleLiteral(*v), Type::double(), span)
            }
            ExprKind::CharLiteral(c) => {
                self.literal(ConstructKind::CharLiteral(*c), Type::char_(), span)
            }
            ExprKind::BoolLiteral(b) => {
                self.literal(ConstructKind::BoolLiteral(*b), Type::bool_(), span)
            }
            ExprKind::StringLiteral(s) => self.literal(
                ConstructKind::StringLiteral(s.clone()),
                Type::char_().with_const().pointer_to(),
                span,
            ),
            ExprKind::Identifier(name) => self.elaborate_identifier(name, scope, span),
            ExprKind::This => self.elaborate_this(span),
            ExprKind::Binary { op, lhs, rhs } => self.elaborate_binary(*op, lhs, rhs, scope, span),
            ExprKind::Unary { op, operand } => self.elaborate_unary(*op, operand, scope, span),
            ExprKind::Assign { lhs, rhs } => self.elaborate_assignment(lhs, rhs, scope, span),
            ExprKind::IncDec {
                increment,
                postfix,
                operand,
            } => self.elaborate_incdec(*increment, *postfix, operand, scope, span),
            ExprKind::Call { callee, args } => self.elaborate_call(callee, args, scope, span),
            ExprKind::Subscript { base, index } => {
                self.elaborate_subscript(base, index, scope, span)
            }
            ExprKind::Member {
                object,
                member,
                through_pointer,
            } => self.elaborate_member(object, member, *through_pointer, scope, span),
            ExprKind::Deref(operand) => self.elaborate_deref(operand, scope, span),
            ExprKind::AddressOf(operand) => self.elaborate_addressof(operand, scope, span),
            ExprKind::New {
                spec,
                args,
                args_span,
            } => self.elaborate_new(spec, args, *args_span, scope, span),
            ExprKind::NewArray { spec, length } => {
                self.elaborate_new_array(spec, length, scope, span)
            }
            ExprKind::Delete {
                operand,
                array_form,
            } => self.elaborate_delete(operand, *array_form, scope, span),
        }
    }

    fn literal(&mut self, kind: ConstructKind, ty: Type, span: Span) -> ConstructId {
        self.ctx.constructs.add_expr(
            kind,
            ExprInfo::prvalue(ty),
            span,
            Some(self.source.source_ref(span)),
        )
    }

    pub(crate) fn error_expression(
        &mut self,
        id: &str,
        message: impl Into<String>,
        span: Span,
    ) -> ConstructId {
        let c = self.ctx.constructs.add(
            ConstructKind::ErrorExpression,
            span,
            Some(self.source.source_ref(span)),
        );
        self.error_at(c, id, message, span);
        c
    }

    // ==================== names ====================

    fn elaborate_identifier(&mut self, name: &str, scope: ScopeId, span: Span) -> ConstructId {
        match self.ctx.scopes.lookup(scope, name) {
            Some(LookupOutcome::Variable(entity)) => {
                let Some(var) = self.ctx.entities.variable(entity) else {
                    return self.error_expression("iden.no_match", format!("'{name}' does not name an object"), span);
                };
                let var_ty = var.ty.clone();
                let storage = var.storage;
                if storage == StorageKind::Member {
                    // Bare field name inside a member function reads the
                    // field of the implicit receiver.
                    return self.implicit_member_access(name, span);
                }
                let ty = var_ty.strip_reference().clone();
                self.ctx.constructs.add_expr(
                    ConstructKind::ObjectIdentifier {
                        entity,
                        name: name.to_string(),
                    },
                    ExprInfo::lvalue(ty),
                    span,
                    Some(self.source.source_ref(span)),
                )
            }
            Some(LookupOutcome::Functions(_)) => self.error_expression(
                "iden.func_value",
                format!("'{name}' names a function; it can only be called"),
                span,
            ),
            Some(LookupOutcome::Class(_)) => self.error_expression(
                "iden.class_value",
                format!("'{name}' names a class, not a value"),
                span,
            ),
            None => self.error_expression(
                "iden.no_match",
                format!("'{name}' was not declared in this scope"),
                span,
            ),
        }
    }

    fn elaborate_this(&mut self, span: Span) -> ConstructId {
        let Some(class) = self.current_class.clone() else {
            return self.error_expression(
                "expr.this.outside_member",
                "'this' can only appear inside a member function",
                span,
            );
        };
        self.ctx.constructs.add_expr(
            ConstructKind::This,
            ExprInfo::prvalue(Type::class(class).pointer_to()),
            span,
            Some(self.source.source_ref(span)),
        )
    }

    fn implicit_member_access(&mut self, field: &str, span: Span) -> ConstructId {
        let this = self.elaborate_this(span);
        let object = self.ctx.constructs.add_expr(
            ConstructKind::Dereference { operand: this },
            ExprInfo::lvalue(Type::class(self.current_class.clone().unwrap_or_default())),
            span,
            Some(self.source.source_ref(span)),
        );
        self.field_access(object, field, span)
    }

    /// Field access on an elaborated class lvalue, searching base classes
    fn field_access(&mut self, object: ConstructId, field: &str, span: Span) -> ConstructId {
        let Some(obj_info) = self.ctx.constructs.get(object).expr.clone() else {
            return self.error_expression("expr.member.object", "member access requires an object", span);
        };
        let Some(class_name) = obj_info.ty.class_name().map(str::to_string) else {
            return self.error_expression(
                "expr.member.object",
                format!("'{}' is not a class type", obj_info.ty),
                span,
            );
        };

        let mut current = Some(class_name.clone());
        while let Some(cname) = current {
            let Some((_, class)) = self.ctx.entities.class_by_name(&cname) else {
                break;
            };
            if let Some(f) = class.field(field) {
                let access = f.access;
                let mut fty = f.ty.strip_reference().clone();
                if obj_info.ty.is_const {
                    fty = fty.with_const();
                }
                let construct = self.ctx.constructs.add_expr(
                    ConstructKind::MemberAccess {
                        object,
                        class: cname.clone(),
                        field: field.to_string(),
                    },
                    ExprInfo::lvalue(fty),
                    span,
                    Some(self.source.source_ref(span)),
                );
                if access == crate::frontend::ast::AccessSpecifier::Private
                    && self.current_class.as_deref() != Some(cname.as_str())
                {
                    self.error_at(
                        construct,
                        "class.private_access",
                        format!("'{field}' is a private member of '{cname}'"),
                        span,
                    );
                }
                return construct;
            }
            current = class.base.clone();
        }

        self.error_expression(
            "iden.no_match",
            format!("'{class_name}' has no member named '{field}'"),
            span,
        )
    }

    // ==================== conversions ====================

    pub(crate) fn expr_info(&self, id: ConstructId) -> Option<ExprInfo> {
        self.ctx.constructs.get(id).expr.clone()
    }

    /// Lvalue-to-rvalue and array decay; identity on prvalues
    pub(crate) fn to_prvalue(&mut self, id: ConstructId, span: Span) -> ConstructId {
        let Some(info) = self.expr_info(id) else {
            return id;
        };
        if info.ty.is_array() {
            let target = info.ty.decayed();
            return self.ctx.constructs.add_expr(
                ConstructKind::ImplicitConversion {
                    conversion: Conversion::ArrayToPointer,
                    operand: id,
                },
                ExprInfo::prvalue(target),
                span,
                None,
            );
        }
        if info.category == ValueCategory::Lvalue {
            let target = info.ty.clone().without_const();
            return self.ctx.constructs.add_expr(
                ConstructKind::ImplicitConversion {
                    conversion: Conversion::LvalueToRvalue,
                    operand: id,
                },
                ExprInfo::prvalue(target),
                span,
                None,
            );
        }
        id
    }

    fn convert_arith(&mut self, id: ConstructId, target: &Type, span: Span) -> ConstructId {
        let id = self.to_prvalue(id, span);
        let Some(info) = self.expr_info(id) else {
            return id;
        };
        if info.ty.kind == target.kind {
            return id;
        }
        self.ctx.constructs.add_expr(
            ConstructKind::ImplicitConversion {
                conversion: Conversion::Arithmetic(target.clone()),
                operand: id,
            },
            ExprInfo::prvalue(target.clone()),
            span,
            None,
        )
    }

    pub(crate) fn convert_to_bool(&mut self, id: ConstructId, span: Span) -> ConstructId {
        let id = self.to_prvalue(id, span);
        let Some(info) = self.expr_info(id) else {
            return id;
        };
        if info.ty.is_bool() {
            return id;
        }
        if !info.ty.is_arithmetic() && !info.ty.is_pointer() {
            let c = self.ctx.constructs.add(
                ConstructKind::ErrorExpression,
                span,
                Some(self.source.source_ref(span)),
            );
            self.error_at(
                c,
                "expr.condition.bool",
                format!("'{}' cannot be used as a condition", info.ty),
                span,
            );
            return c;
        }
        self.ctx.constructs.add_expr(
            ConstructKind::ImplicitConversion {
                conversion: Conversion::ToBool,
                operand: id,
            },
            ExprInfo::prvalue(Type::bool_()),
            span,
            None,
        )
    }

    /// How well `from` converts to a by-value or by-reference `target`:
    /// 0 exact, higher is worse, `None` not convertible.
    fn conversion_rank(&self, from: ConstructId, target: &Type) -> Option<u32> {
        let Some(info) = self.expr_info(from) else {
            // Error operands convert to anything so one bad argument does
            // not cascade into overload noise.
            return Some(0);
        };

        if let TypeKind::Reference(referent) = &target.kind {
            let is_lvalue = info.category == ValueCategory::Lvalue;
            if info.ty.kind == referent.kind {
                if info.ty.is_const && !referent.is_const {
                    return None;
                }
                if is_lvalue {
                    return Some(0);
                }
                // Temporaries bind to const references only.
                return referent.is_const.then_some(1);
            }
            if let (Some(from_class), Some(to_class)) =
                (info.ty.class_name(), referent.class_name())
            {
                if is_lvalue && self.derives_from(from_class, to_class) {
                    return Some(1);
                }
            }
            return None;
        }

        let from_ty = info.ty.decayed();
        match (&from_ty.kind, &target.kind) {
            (a, b) if a == b => Some(0),
            _ if from_ty.is_arithmetic() && target.is_arithmetic() => Some(2),
            (TypeKind::Pointer(a), TypeKind::Pointer(b)) => {
                if a.kind == b.kind {
                    // Adding const at the pointee is fine.
                    (!a.is_const || b.is_const).then_some(1)
                } else {
                    match (a.class_name(), b.class_name()) {
                        (Some(d), Some(base)) if self.derives_from(d, base) => Some(1),
                        _ => None,
                    }
                }
            }
            (TypeKind::Int, TypeKind::Pointer(_)) => {
                matches!(self.ctx.constructs.get(self.strip_conversions(from)).kind, ConstructKind::IntLiteral(0))
                    .then_some(2)
            }
            (TypeKind::Pointer(_), TypeKind::Bool) => Some(3),
            (TypeKind::Class(a), TypeKind::Class(b)) => {
                if a == b {
                    Some(0)
                } else {
                    self.derives_from(a, b).then_some(1)
                }
            }
            _ => None,
        }
    }

    fn strip_conversions(&self, mut id: ConstructId) -> ConstructId {
        while let ConstructKind::ImplicitConversion { operand, .. } = &self.ctx.constructs.get(id).kind {
            id = *operand;
        }
        id
    }

    pub(crate) fn derives_from(&self, derived: &str, base: &str) -> bool {
        if derived == base {
            return true;
        }
        let mut current = self
            .ctx
            .entities
            .class_by_name(derived)
            .and_then(|(_, c)| c.base.clone());
        while let Some(name) = current {
            if name == base {
                return true;
            }
            current = self
                .ctx
                .entities
                .class_by_name(&name)
                .and_then(|(_, c)| c.base.clone());
        }
        false
    }

    /// Build the conversion constructs that carry `from` to `target`.
    /// Callers check convertibility first; on a mismatch this still returns
    /// a construct, with the error recorded on it.
    pub(crate) fn apply_conversion(
        &mut self,
        from: ConstructId,
        target: &Type,
        span: Span,
    ) -> ConstructId {
        let Some(info) = self.expr_info(from) else {
            return from;
        };

        if let TypeKind::Reference(referent) = &target.kind {
            if info.category == ValueCategory::Prvalue && referent.is_const {
                return self.ctx.constructs.add_expr(
                    ConstructKind::MaterializeTemporary { operand: from },
                    ExprInfo::lvalue(referent.as_ref().clone()),
                    span,
                    None,
                );
            }
            // Reference binding takes the lvalue as is; derived-to-base
            // binding needs no construct because the base subobject sits at
            // the start of the object.
            return from;
        }

        let from_ty = info.ty.decayed();
        match (&from_ty.kind, &target.kind) {
            (a, b) if a == b => self.to_prvalue(from, span),
            _ if from_ty.is_arithmetic() && target.is_arithmetic() => {
                if matches!(target.kind, TypeKind::Bool) {
                    self.convert_to_bool(from, span)
                } else {
                    self.convert_arith(from, target, span)
                }
            }
            (TypeKind::Int, TypeKind::Pointer(_)) => {
                let operand = self.to_prvalue(from, span);
                self.ctx.constructs.add_expr(
                    ConstructKind::ImplicitConversion {
                        conversion: Conversion::NullPointer(target.clone()),
                        operand,
                    },
                    ExprInfo::prvalue(target.clone()),
                    span,
                    None,
                )
            }
            (TypeKind::Pointer(a), TypeKind::Pointer(b)) => {
                let operand = self.to_prvalue(from, span);
                match (a.class_name(), b.class_name()) {
                    (Some(d), Some(base)) if d != base => self.ctx.constructs.add_expr(
                        ConstructKind::ImplicitConversion {
                            conversion: Conversion::DerivedToBase(base.to_string()),
                            operand,
                        },
                        ExprInfo::prvalue(target.clone()),
                        span,
                        None,
                    ),
                    _ => self.ctx.constructs.add_expr(
                        ConstructKind::ImplicitConversion {
                            conversion: Conversion::Qualification(target.clone()),
                            operand,
                        },
                        ExprInfo::prvalue(target.clone()),
                        span,
                        None,
                    ),
                }
            }
            (TypeKind::Pointer(_), TypeKind::Bool) => self.convert_to_bool(from, span),
            (TypeKind::Class(_), TypeKind::Class(_)) => self.to_prvalue(from, span),
            _ => {
                let c = self.to_prvalue(from, span);
                self.error_at(
                    c,
                    "expr.conversion.invalid",
                    format!("cannot convert '{}' to '{target}'", info.ty),
                    span,
                );
                c
            }
        }
    }

    /// Initializer argument conversion, with its own note id
    pub(crate) fn convert_for_init(
        &mut self,
        arg: ConstructId,
        target: &Type,
        span: Span,
    ) -> ConstructId {
        if self.conversion_rank(arg, target).is_none() {
            let from = self
                .expr_info(arg)
                .map(|i| i.ty.to_string())
                .unwrap_or_else(|| "<error>".to_string());
            let converted = self.to_prvalue(arg, span);
            self.error_at(
                converted,
                "declaration.init.convert",
                format!("cannot initialize '{target}' from '{from}'"),
                span,
            );
            return converted;
        }
        self.apply_conversion(arg, target, span)
    }

    // ==================== overloads ====================

    /// Pick the best candidate for the given arguments and convert them.
    pub(crate) fn resolve_overload(
        &mut self,
        candidates: &[EntityId],
        args: &[ConstructId],
        span: Span,
    ) -> Result<(EntityId, Vec<ConstructId>), OverloadFailure> {
        let mut viable: Vec<(EntityId, u32)> = Vec::new();
        for &cand in candidates {
            let Some(func) = self.ctx.entities.function(cand) else {
                continue;
            };
            if func.ty.params.len() != args.len() {
                continue;
            }
            let params = func.ty.params.clone();
            let mut total = 0u32;
            let mut ok = true;
            for (&arg, param) in args.iter().zip(&params) {
                match self.conversion_rank(arg, param) {
                    Some(rank) => total += rank,
                    None => {
                        ok = false;
                        break;
                    }
                }
            }
            if ok {
                viable.push((cand, total));
            }
        }

        let Some(&(_, best)) = viable.iter().min_by_key(|(_, rank)| *rank) else {
            return Err(OverloadFailure::NoViable);
        };
        let best_set: Vec<EntityId> = viable
            .iter()
            .filter(|(_, rank)| *rank == best)
            .map(|(id, _)| *id)
            .collect();
        if best_set.len() > 1 {
            return Err(OverloadFailure::Ambiguous(best_set));
        }

        let chosen = best_set[0];
        let params = self
            .ctx
            .entities
            .function(chosen)
            .map(|f| f.ty.params.clone())
            .unwrap_or_default();
        let converted = args
            .iter()
            .zip(&params)
            .map(|(&arg, param)| self.apply_conversion(arg, param, span))
            .collect();
        Ok((chosen, converted))
    }

    pub(crate) fn report_overload_failure(
        &mut self,
        construct: ConstructId,
        name: &str,
        failure: OverloadFailure,
        span: Span,
    ) {
        match failure {
            OverloadFailure::NoViable => self.error_at(
                construct,
                "iden.no_match",
                format!("no matching call for '{name}' with these arguments"),
                span,
            ),
            OverloadFailure::Ambiguous(_) => self.error_at(
                construct,
                "iden.ambiguous",
                format!("call to '{name}' is ambiguous"),
                span,
            ),
        }
    }

    // ==================== operators ====================

    fn elaborate_binary(
        &mut self,
        op: BinaryOp,
        lhs: &Expression,
        rhs: &Expression,
        scope: ScopeId,
        span: Span,
    ) -> ConstructId {
        let lhs_c = self.elaborate_expression(lhs, scope);

        // Class operands route through operator overloads.
        let lhs_is_class = self
            .expr_info(lhs_c)
            .is_some_and(|i| i.ty.is_class());
        if lhs_is_class {
            return self.elaborate_operator_overload(op, lhs_c, rhs, scope, span);
        }

        let rhs_c = self.elaborate_expression(rhs, scope);
        match op {
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod
            | BinaryOp::Shl | BinaryOp::Shr => {
                self.elaborate_arithmetic(op, lhs_c, rhs_c, span)
            }
            BinaryOp::Less
            | BinaryOp::Greater
            | BinaryOp::LessEq
            | BinaryOp::GreaterEq
            | BinaryOp::Equal
            | BinaryOp::NotEqual => self.elaborate_comparison(op, lhs_c, rhs_c, span),
            BinaryOp::LogicalAnd | BinaryOp::LogicalOr => {
                let l = self.convert_to_bool(lhs_c, span);
                let r = self.convert_to_bool(rhs_c, span);
                let kind = if op == BinaryOp::LogicalAnd {
                    ConstructKind::LogicalAnd { lhs: l, rhs: r }
                } else {
                    ConstructKind::LogicalOr { lhs: l, rhs: r }
                };
                self.ctx.constructs.add_expr(
                    kind,
                    ExprInfo::prvalue(Type::bool_()),
                    span,
                    Some(self.source.source_ref(span)),
                )
            }
        }
    }

    fn elaborate_arithmetic(
        &mut self,
        op: BinaryOp,
        lhs: ConstructId,
        rhs: ConstructId,
        span: Span,
    ) -> ConstructId {
        let arith_op = match op {
            BinaryOp::Add => ArithOp::Add,
            BinaryOp::Sub => ArithOp::Sub,
            BinaryOp::Mul => ArithOp::Mul,
            BinaryOp::Div => ArithOp::Div,
            BinaryOp::Mod => ArithOp::Mod,
            BinaryOp::Shl => ArithOp::Shl,
            BinaryOp::Shr => ArithOp::Shr,
            _ => unreachable!("not an arithmetic operator"),
        };

        let lhs = self.to_prvalue(lhs, span);
        let rhs = self.to_prvalue(rhs, span);
        let lhs_ty = self.expr_info(lhs).map(|i| i.ty);
        let rhs_ty = self.expr_info(rhs).map(|i| i.ty);
        let (Some(lt), Some(rt)) = (lhs_ty, rhs_ty) else {
            return self.err_arith(arith_op, lhs, rhs, span);
        };

        // Pointer arithmetic: pointer +- integral, and pointer - pointer.
        if lt.is_pointer() && rt.is_integral() && matches!(arith_op, ArithOp::Add | ArithOp::Sub) {
            let rhs = self.convert_arith(rhs, &Type::int(), span);
            return self.ctx.constructs.add_expr(
                ConstructKind::Arithmetic {
                    op: arith_op,
                    lhs,
                    rhs,
                },
                ExprInfo::prvalue(lt),
                span,
                Some(self.source.source_ref(span)),
            );
        }
        // Addition commutes: integral + pointer becomes the pointer-on-left
        // form with the same scaled offset.
        if lt.is_integral() && rt.is_pointer() && arith_op == ArithOp::Add {
            let offset = self.convert_arith(lhs, &Type::int(), span);
            return self.ctx.constructs.add_expr(
                ConstructKind::Arithmetic {
                    op: arith_op,
                    lhs: rhs,
                    rhs: offset,
                },
                ExprInfo::prvalue(rt),
                span,
                Some(self.source.source_ref(span)),
            );
        }
        if lt.is_pointer() && rt.is_pointer() && arith_op == ArithOp::Sub {
            return self.ctx.constructs.add_expr(
                ConstructKind::Arithmetic {
                    op: arith_op,
                    lhs,
                    rhs,
                },
                ExprInfo::prvalue(Type::int()),
                span,
                Some(self.source.source_ref(span)),
            );
        }

        if !lt.is_arithmetic() || !rt.is_arithmetic() {
            return self.err_arith(arith_op, lhs, rhs, span);
        }

        // Integer-only operators.
        if matches!(arith_op, ArithOp::Mod | ArithOp::Shl | ArithOp::Shr)
            && (!lt.is_integral() || !rt.is_integral())
        {
            return self.err_arith(arith_op, lhs, rhs, span);
        }

        let common = if matches!(lt.kind, TypeKind::Double) || matches!(rt.kind, TypeKind::Double) {
            Type::double()
        } else {
            Type::int()
        };
        let lhs = self.convert_arith(lhs, &common, span);
        let rhs = self.convert_arith(rhs, &common, span);
        self.ctx.constructs.add_expr(
            ConstructKind::Arithmetic {
                op: arith_op,
                lhs,
                rhs,
            },
            ExprInfo::prvalue(common),
            span,
            Some(self.source.source_ref(span)),
        )
    }

    fn err_arith(
        &mut self,
        op: ArithOp,
        lhs: ConstructId,
        rhs: ConstructId,
        span: Span,
    ) -> ConstructId {
        let c = self.ctx.constructs.add(
            ConstructKind::Arithmetic { op, lhs, rhs },
            span,
            Some(self.source.source_ref(span)),
        );
        self.error_at(
            c,
            "expr.binary.operands",
            "invalid operand types for this operator",
            span,
        );
        c
    }

    fn elaborate_comparison(
        &mut self,
        op: BinaryOp,
        lhs: ConstructId,
        rhs: ConstructId,
        span: Span,
    ) -> ConstructId {
        let cmp = match op {
            BinaryOp::Less => CompareOp::Less,
            BinaryOp::Greater => CompareOp::Greater,
            BinaryOp::LessEq => CompareOp::LessEq,
            BinaryOp::GreaterEq => CompareOp::GreaterEq,
            BinaryOp::Equal => CompareOp::Equal,
            BinaryOp::NotEqual => CompareOp::NotEqual,
            _ => unreachable!("not a comparison operator"),
        };

        let lhs = self.to_prvalue(lhs, span);
        let rhs = self.to_prvalue(rhs, span);
        let lt = self.expr_info(lhs).map(|i| i.ty);
        let rt = self.expr_info(rhs).map(|i| i.ty);

        let (lhs, rhs, valid) = match (lt, rt) {
            (Some(lt), Some(rt)) if lt.is_arithmetic() && rt.is_arithmetic() => {
                let common = if matches!(lt.kind, TypeKind::Double)
                    || matches!(rt.kind, TypeKind::Double)
                {
                    Type::double()
                } else {
                    Type::int()
                };
                let l = self.convert_arith(lhs, &common, span);
                let r = self.convert_arith(rhs, &common, span);
                (l, r, true)
            }
            (Some(lt), Some(rt)) if lt.is_pointer() && rt.is_pointer() => (lhs, rhs, true),
            (Some(lt), Some(_)) if lt.is_pointer() => {
                let r = self.apply_conversion(rhs, &lt, span);
                (lhs, r, true)
            }
            (Some(_), Some(rt)) if rt.is_pointer() => {
                let l = self.apply_conversion(lhs, &rt, span);
                (l, rhs, true)
            }
            _ => (lhs, rhs, false),
        };

        let construct = self.ctx.constructs.add_expr(
            ConstructKind::Comparison { op: cmp, lhs, rhs },
            ExprInfo::prvalue(Type::bool_()),
            span,
            Some(self.source.source_ref(span)),
        );
        if !valid {
            self.error_at(
                construct,
                "expr.binary.operands",
                "invalid operand types for comparison",
                span,
            );
        }
        construct
    }

    /// `a op b` where `a` has class type: resolve `a.operatorOP(b)`
    fn elaborate_operator_overload(
        &mut self,
        op: BinaryOp,
        lhs: ConstructId,
        rhs: &Expression,
        scope: ScopeId,
        span: Span,
    ) -> ConstructId {
        let op_name = format!("operator{}", op.symbol());
        let rhs_c = self.elaborate_expression(rhs, scope);
        let class_name = self
            .expr_info(lhs)
            .and_then(|i| i.ty.class_name().map(str::to_string))
            .unwrap_or_default();

        let candidates = self.member_function_group(&class_name, &op_name);
        if candidates.is_empty() {
            return self.error_expression(
                "iden.no_match",
                format!("'{class_name}' has no '{op_name}'"),
                span,
            );
        }

        match self.resolve_overload(&candidates, &[rhs_c], span) {
            Ok((function, converted)) => {
                let info = self.call_result_info(function);
                let is_virtual = self
                    .ctx
                    .entities
                    .function(function)
                    .is_some_and(|f| f.is_virtual);
                self.ctx.constructs.add_expr(
                    ConstructKind::FunctionCall {
                        function,
                        args: converted,
                        receiver: Some(lhs),
                        is_virtual,
                    },
                    info,
                    span,
                    Some(self.source.source_ref(span)),
                )
            }
            Err(failure) => {
                let c = self.ctx.constructs.add(
                    ConstructKind::ErrorExpression,
                    span,
                    Some(self.source.source_ref(span)),
                );
                self.report_overload_failure(c, &op_name, failure, span);
                c
            }
        }
    }

    /// All member functions named `name` on `class_name` or its bases
    fn member_function_group(&self, class_name: &str, name: &str) -> Vec<EntityId> {
        let mut out = Vec::new();
        let mut current = Some(class_name.to_string());
        while let Some(cname) = current {
            let Some((_, class)) = self.ctx.entities.class_by_name(&cname) else {
                break;
            };
            for &fid in &class.member_functions {
                if let Some(f) = self.ctx.entities.function(fid) {
                    if f.name == name {
                        out.push(fid);
                    }
                }
            }
            // A derived declaration hides base declarations of the name.
            if !out.is_empty() {
                break;
            }
            current = class.base.clone();
        }
        out
    }

    fn call_result_info(&self, function: EntityId) -> ExprInfo {
        let Some(func) = self.ctx.entities.function(function) else {
            return ExprInfo::prvalue(Type::int());
        };
        match &func.ty.return_type.kind {
            TypeKind::Reference(inner) => ExprInfo::lvalue(inner.as_ref().clone()),
            _ => ExprInfo::prvalue(func.ty.return_type.clone()),
        }
    }

    fn elaborate_unary(
        &mut self,
        op: UnaryOp,
        operand: &Expression,
        scope: ScopeId,
        span: Span,
    ) -> ConstructId {
        let operand_c = self.elaborate_expression(operand, scope);
        match op {
            UnaryOp::Not => {
                let b = self.convert_to_bool(operand_c, span);
                self.ctx.constructs.add_expr(
                    ConstructKind::LogicalNot { operand: b },
                    ExprInfo::prvalue(Type::bool_()),
                    span,
                    Some(self.source.source_ref(span)),
                )
            }
            UnaryOp::Neg | UnaryOp::Plus => {
                let v = self.to_prvalue(operand_c, span);
                let ty = self.expr_info(v).map(|i| i.ty);
                let result = match ty {
                    Some(t) if t.is_arithmetic() => {
                        if matches!(t.kind, TypeKind::Double) {
                            Type::double()
                        } else {
                            Type::int()
                        }
                    }
                    _ => {
                        return self.error_expression(
                            "expr.unary.operand",
                            "operand of unary '-'/'+' must be arithmetic",
                            span,
                        );
                    }
                };
                let v = self.convert_arith(v, &result, span);
                let kind = if op == UnaryOp::Neg {
                    ConstructKind::Negate { operand: v }
                } else {
                    ConstructKind::UnaryPlus { operand: v }
                };
                self.ctx.constructs.add_expr(
                    kind,
                    ExprInfo::prvalue(result),
                    span,
                    Some(self.source.source_ref(span)),
                )
            }
        }
    }

    fn elaborate_assignment(
        &mut self,
        lhs: &Expression,
        rhs: &Expression,
        scope: ScopeId,
        span: Span,
    ) -> ConstructId {
        let lhs_c = self.elaborate_expression(lhs, scope);
        let lhs_info = self.expr_info(lhs_c);

        // Class assignment routes through operator= when one is declared;
        // without one it is a memberwise copy.
        if let Some(info) = &lhs_info {
            if let Some(class_name) = info.ty.class_name().map(str::to_string) {
                let candidates = self.member_function_group(&class_name, "operator=");
                if !candidates.is_empty() {
                    let rhs_c = self.elaborate_expression(rhs, scope);
                    return match self.resolve_overload(&candidates, &[rhs_c], span) {
                        Ok((function, converted)) => {
                            let result = self.call_result_info(function);
                            self.ctx.constructs.add_expr(
                                ConstructKind::FunctionCall {
                                    function,
                                    args: converted,
                                    receiver: Some(lhs_c),
                                    is_virtual: false,
                                },
                                result,
                                span,
                                Some(self.source.source_ref(span)),
                            )
                        }
                        Err(failure) => {
                            let c = self.ctx.constructs.add(
                                ConstructKind::ErrorExpression,
                                span,
                                Some(self.source.source_ref(span)),
                            );
                            self.report_overload_failure(c, "operator=", failure, span);
                            c
                        }
                    };
                }
            }
        }

        let rhs_c = self.elaborate_expression(rhs, scope);
        let (valid, target_ty) = match &lhs_info {
            Some(info) if info.category == ValueCategory::Lvalue => (true, info.ty.clone()),
            Some(_) => (false, Type::int()),
            None => (true, Type::int()),
        };

        let rhs_converted = if valid && lhs_info.is_some() {
            self.apply_conversion_checked(rhs_c, &target_ty, span)
        } else {
            rhs_c
        };

        let construct = self.ctx.constructs.add_expr(
            ConstructKind::Assignment {
                lhs: lhs_c,
                rhs: rhs_converted,
            },
            ExprInfo::lvalue(target_ty.clone()),
            span,
            Some(self.source.source_ref(span)),
        );

        match &lhs_info {
            Some(info) if info.category != ValueCategory::Lvalue => {
                self.error_at(
                    construct,
                    "expr.assignment.lvalue",
                    "the left side of an assignment must be an object",
                    span,
                );
            }
            Some(info) if info.ty.is_const => {
                self.error_at(
                    construct,
                    "expr.assignment.const",
                    "cannot assign to a const object",
                    span,
                );
            }
            Some(info) if info.ty.is_array() => {
                self.error_at(
                    construct,
                    "expr.assignment.array",
                    "arrays cannot be assigned as a whole",
                    span,
                );
            }
            _ => {}
        }
        construct
    }

    fn apply_conversion_checked(
        &mut self,
        from: ConstructId,
        target: &Type,
        span: Span,
    ) -> ConstructId {
        if self.conversion_rank(from, target).is_none() {
            let from_ty = self
                .expr_info(from)
                .map(|i| i.ty.to_string())
                .unwrap_or_else(|| "<error>".to_string());
            let c = self.to_prvalue(from, span);
            self.error_at(
                c,
                "expr.conversion.invalid",
                format!("cannot convert '{from_ty}' to '{target}'"),
                span,
            );
            return c;
        }
        self.apply_conversion(from, target, span)
    }

    fn elaborate_incdec(
        &mut self,
        increment: bool,
        postfix: bool,
        operand: &Expression,
        scope: ScopeId,
        span: Span,
    ) -> ConstructId {
        let operand_c = self.elaborate_expression(operand, scope);
        let info = self.expr_info(operand_c);
        let result = match &info {
            Some(i) if i.ty.is_arithmetic() || i.ty.is_pointer() => {
                if postfix {
                    ExprInfo::prvalue(i.ty.clone().without_const())
                } else {
                    ExprInfo::lvalue(i.ty.clone())
                }
            }
            _ => ExprInfo::prvalue(Type::int()),
        };
        let construct = self.ctx.constructs.add_expr(
            ConstructKind::IncDec {
                increment,
                postfix,
                operand: operand_c,
            },
            result,
            span,
            Some(self.source.source_ref(span)),
        );
        match &info {
            Some(i) if i.category != ValueCategory::Lvalue => {
                self.error_at(
                    construct,
                    "expr.assignment.lvalue",
                    "operand of '++'/'--' must be an object",
                    span,
                );
            }
            Some(i) if i.ty.is_const => {
                self.error_at(
                    construct,
                    "expr.assignment.const",
                    "cannot modify a const object",
                    span,
                );
            }
            Some(i) if !i.ty.is_arithmetic() && !i.ty.is_pointer() => {
                self.error_at(
                    construct,
                    "expr.unary.operand",
                    "operand of '++'/'--' must be arithmetic or a pointer",
                    span,
                );
            }
            _ => {}
        }
        construct
    }

    // ==================== calls ====================

    fn elaborate_call(
        &mut self,
        callee: &Expression,
        args: &[Expression],
        scope: ScopeId,
        span: Span,
    ) -> ConstructId {
        let arg_constructs: Vec<ConstructId> = args
            .iter()
            .map(|a| self.elaborate_expression(a, scope))
            .collect();

        match &callee.kind {
            ExprKind::Identifier(name) => {
                match self.ctx.scopes.lookup(scope, name) {
                    Some(LookupOutcome::Functions(group)) => {
                        self.build_call(name, &group, arg_constructs, None, span)
                    }
                    Some(LookupOutcome::Variable(_)) => self.error_expression(
                        "expr.call.not_function",
                        format!("'{name}' is not a function"),
                        span,
                    ),
                    Some(LookupOutcome::Class(_)) => self.error_expression(
                        "expr.call.not_function",
                        format!("'{name}' names a class; constructing temporaries this way is not supported"),
                        span,
                    ),
                    None => self.error_expression(
                        "iden.no_match",
                        format!("'{name}' was not declared in this scope"),
                        span,
                    ),
                }
            }
            ExprKind::Member {
                object,
                member,
                through_pointer,
            } => {
                let receiver = self.member_call_receiver(object, *through_pointer, scope, span);
                let class_name = self
                    .expr_info(receiver)
                    .and_then(|i| i.ty.class_name().map(str::to_string))
                    .unwrap_or_default();
                let group = self.member_function_group(&class_name, member);
                if group.is_empty() {
                    return self.error_expression(
                        "iden.no_match",
                        format!("'{class_name}' has no member function named '{member}'"),
                        span,
                    );
                }
                self.build_call(member, &group, arg_constructs, Some(receiver), span)
            }
            _ => self.error_expression(
                "expr.call.not_function",
                "this expression cannot be called",
                span,
            ),
        }
    }

    fn member_call_receiver(
        &mut self,
        object: &Expression,
        through_pointer: bool,
        scope: ScopeId,
        span: Span,
    ) -> ConstructId {
        let object_c = self.elaborate_expression(object, scope);
        if !through_pointer {
            return object_c;
        }
        let ptr = self.to_prvalue(object_c, span);
        let pointee = self
            .expr_info(ptr)
            .and_then(|i| i.ty.element_type().cloned());
        match pointee {
            Some(p) if p.is_class() => self.ctx.constructs.add_expr(
                ConstructKind::Dereference { operand: ptr },
                ExprInfo::lvalue(p),
                span,
                Some(self.source.source_ref(span)),
            ),
            _ => self.error_expression(
                "expr.member.object",
                "'->' requires a pointer to a class object",
                span,
            ),
        }
    }

    fn build_call(
        &mut self,
        name: &str,
        candidates: &[EntityId],
        args: Vec<ConstructId>,
        receiver: Option<ConstructId>,
        span: Span,
    ) -> ConstructId {
        match self.resolve_overload(candidates, &args, span) {
            Ok((function, converted)) => {
                let info = self.call_result_info(function);
                let func = self.ctx.entities.function(function);
                let is_virtual = func.is_some_and(|f| f.is_virtual);
                let is_member = func.is_some_and(|f| f.member_of.is_some());

                // A member function called bare inside another member
                // function receives the enclosing receiver implicitly.
                let receiver = match (receiver, is_member) {
                    (Some(r), _) => Some(r),
                    (None, true) => {
                        let this = self.elaborate_this(span);
                        let class = self.current_class.clone().unwrap_or_default();
                        Some(self.ctx.constructs.add_expr(
                            ConstructKind::Dereference { operand: this },
                            ExprInfo::lvalue(Type::class(class)),
                            span,
                            None,
                        ))
                    }
                    (None, false) => None,
                };

                self.ctx.constructs.add_expr(
                    ConstructKind::FunctionCall {
                        function,
                        args: converted,
                        receiver,
                        is_virtual,
                    },
                    info,
                    span,
                    Some(self.source.source_ref(span)),
                )
            }
            Err(failure) => {
                let c = self.ctx.constructs.add(
                    ConstructKind::ErrorExpression,
                    span,
                    Some(self.source.source_ref(span)),
                );
                self.report_overload_failure(c, name, failure, span);
                c
            }
        }
    }

    // ==================== memory expressions ====================

    fn elaborate_subscript(
        &mut self,
        base: &Expression,
        index: &Expression,
        scope: ScopeId,
        span: Span,
    ) -> ConstructId {
        let base_c = self.elaborate_expression(base, scope);
        let index_c = self.elaborate_expression(index, scope);
        let base_ptr = self.to_prvalue(base_c, span);
        let element = self
            .expr_info(base_ptr)
            .filter(|i| i.ty.is_pointer())
            .and_then(|i| i.ty.element_type().cloned());
        let Some(element) = element else {
            return self.error_expression(
                "expr.subscript.operand",
                "subscript requires an array or pointer",
                span,
            );
        };
        let index_ok = self
            .expr_info(index_c)
            .is_none_or(|i| i.ty.strip_reference().is_integral());
        let index_c = self.convert_arith(index_c, &Type::int(), span);
        let construct = self.ctx.constructs.add_expr(
            ConstructKind::Subscript {
                base: base_ptr,
                index: index_c,
            },
            ExprInfo::lvalue(element),
            span,
            Some(self.source.source_ref(span)),
        );
        if !index_ok {
            self.error_at(
                construct,
                "expr.subscript.index",
                "array index must be an integer",
                span,
            );
        }
        construct
    }

    fn elaborate_member(
        &mut self,
        object: &Expression,
        member: &str,
        through_pointer: bool,
        scope: ScopeId,
        span: Span,
    ) -> ConstructId {
        let object_c = self.member_call_receiver(object, through_pointer, scope, span);
        self.field_access(object_c, member, span)
    }

    fn elaborate_deref(
        &mut self,
        operand: &Expression,
        scope: ScopeId,
        span: Span,
    ) -> ConstructId {
        let operand_c = self.elaborate_expression(operand, scope);
        let ptr = self.to_prvalue(operand_c, span);
        let pointee = self
            .expr_info(ptr)
            .filter(|i| i.ty.is_pointer())
            .and_then(|i| i.ty.element_type().cloned());
        match pointee {
            Some(p) => self.ctx.constructs.add_expr(
                ConstructKind::Dereference { operand: ptr },
                ExprInfo::lvalue(p),
                span,
                Some(self.source.source_ref(span)),
            ),
            None => self.error_expression(
                "expr.deref.pointer",
                "'*' requires a pointer operand",
                span,
            ),
        }
    }

    fn elaborate_addressof(
        &mut self,
        operand: &Expression,
        scope: ScopeId,
        span: Span,
    ) -> ConstructId {
        let operand_c = self.elaborate_expression(operand, scope);
        let info = self.expr_info(operand_c);
        match info {
            Some(i) if i.category == ValueCategory::Lvalue => self.ctx.constructs.add_expr(
                ConstructKind::AddressOf { operand: operand_c },
                ExprInfo::prvalue(i.ty.pointer_to()),
                span,
                Some(self.source.source_ref(span)),
            ),
            _ => self.error_expression(
                "expr.addressof.lvalue",
                "'&' requires an object, not a temporary value",
                span,
            ),
        }
    }

    fn elaborate_new(
        &mut self,
        spec: &crate::frontend::ast::TypeSpecifier,
        args: &[Expression],
        args_span: Option<Span>,
        scope: ScopeId,
        span: Span,
    ) -> ConstructId {
        let empty = crate::frontend::ast::Declarator {
            pointers: Vec::new(),
            is_reference: false,
            name: None,
            suffix: None,
            span,
        };
        let (ty, notes) = self.declarator_type(spec, &empty, scope);

        let init = if args.is_empty() {
            None
        } else {
            let elaborated: Vec<_> = args
                .iter()
                .map(|a| self.elaborate_expression(a, scope))
                .collect();
            Some(self.value_initializer(&ty, elaborated, false, args_span.unwrap_or(span)))
        };
        let init = match init {
            Some(i) => Some(i),
            None => Some(self.default_initializer(&ty, span)),
        };

        let construct = self.ctx.constructs.add_expr(
            ConstructKind::New {
                ty: ty.clone(),
                init,
            },
            ExprInfo::prvalue(ty.clone().pointer_to()),
            span,
            Some(self.source.source_ref(span)),
        );
        self.attach_notes(construct, notes);
        if !ty.is_complete(&self.ctx.entities) {
            self.error_at(
                construct,
                "expr.new.incomplete",
                format!("cannot allocate an object of incomplete type '{ty}'"),
                span,
            );
        }
        construct
    }

    fn elaborate_new_array(
        &mut self,
        spec: &crate::frontend::ast::TypeSpecifier,
        length: &Expression,
        scope: ScopeId,
        span: Span,
    ) -> ConstructId {
        let empty = crate::frontend::ast::Declarator {
            pointers: Vec::new(),
            is_reference: false,
            name: None,
            suffix: None,
            span,
        };
        let (element, notes) = self.declarator_type(spec, &empty, scope);
        let length_c = self.elaborate_expression(length, scope);
        let length_c = self.convert_arith(length_c, &Type::int(), span);

        let construct = self.ctx.constructs.add_expr(
            ConstructKind::NewArray {
                element: element.clone(),
                length: length_c,
            },
            ExprInfo::prvalue(element.clone().pointer_to()),
            span,
            Some(self.source.source_ref(span)),
        );
        self.attach_notes(construct, notes);
        if !element.is_complete(&self.ctx.entities) {
            self.error_at(
                construct,
                "expr.new.incomplete",
                format!("cannot allocate an array of incomplete type '{element}'"),
                span,
            );
        }
        construct
    }

    fn elaborate_delete(
        &mut self,
        operand: &Expression,
        array_form: bool,
        scope: ScopeId,
        span: Span,
    ) -> ConstructId {
        let operand_c = self.elaborate_expression(operand, scope);
        let ptr = self.to_prvalue(operand_c, span);
        let construct = self.ctx.constructs.add_expr(
            ConstructKind::Delete {
                operand: ptr,
                array_form,
            },
            ExprInfo::prvalue(Type::void()),
            span,
            Some(self.source.source_ref(span)),
        );
        let is_pointer = self.expr_info(ptr).is_none_or(|i| i.ty.is_pointer());
        if !is_pointer {
            self.error_at(
                construct,
                "expr.delete.pointer",
                "'delete' requires a pointer operand",
                span,
            );
        }
        construct
    }
}
