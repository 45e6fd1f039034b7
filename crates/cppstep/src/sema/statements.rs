//! Statement elaboration

use crate::common::Span;
use crate::frontend::ast::{BlockAst, Statement, StmtKind};
use crate::sema::compiler::UnitCompiler;
use crate::sema::construct::{ConstructId, ConstructKind};
use crate::sema::scope::{ScopeId, ScopeKind};
use crate::types::Type;

impl UnitCompiler<'_> {
    pub(crate) fn elaborate_block(&mut self, block: &BlockAst, parent: ScopeId) -> ConstructId {
        let scope = self.ctx.scopes.new_scope(ScopeKind::Block, Some(parent));
        let mut statements = Vec::new();
        for stmt in &block.statements {
            statements.push(self.elaborate_statement(stmt, scope));
        }
        self.ctx.constructs.add(
            ConstructKind::Block { statements },
            block.span,
            Some(self.source.source_ref(block.span)),
        )
    }

    pub(crate) fn elaborate_statement(&mut self, stmt: &Statement, scope: ScopeId) -> ConstructId {
        let span = stmt.span;
        match &stmt.kind {
            StmtKind::Block(block) => self.elaborate_block(block, scope),
            StmtKind::Null => self.ctx.constructs.add(
                ConstructKind::NullStatement,
                span,
                Some(self.source.source_ref(span)),
            ),
            StmtKind::Expression(expr) => {
                let e = self.elaborate_expression(expr, scope);
                self.ctx.constructs.add(
                    ConstructKind::ExpressionStatement { expr: e },
                    span,
                    Some(self.source.source_ref(span)),
                )
            }
            StmtKind::Declaration(simple) => {
                let declarations = self.elaborate_local_declaration(simple, scope);
                self.ctx.constructs.add(
                    ConstructKind::DeclarationStatement { declarations },
                    span,
                    Some(self.source.source_ref(span)),
                )
            }
            StmtKind::If {
                condition,
                then_branch,
                else_branch,
            } => {
                let cond = self.elaborate_condition(condition, scope);
                let then_c = self.elaborate_statement(then_branch, scope);
                let else_c = else_branch
                    .as_ref()
                    .map(|s| self.elaborate_statement(s, scope));
                self.ctx.constructs.add(
                    ConstructKind::If {
                        condition: cond,
                        then_branch: then_c,
                        else_branch: else_c,
                    },
                    span,
                    Some(self.source.source_ref(span)),
                )
            }
            StmtKind::While { condition, body } => {
                let cond = self.elaborate_condition(condition, scope);
                self.loop_depth += 1;
                let body_c = self.elaborate_statement(body, scope);
                self.loop_depth -= 1;
                self.ctx.constructs.add(
                    ConstructKind::While {
                        condition: cond,
                        body: body_c,
                    },
                    span,
                    Some(self.source.source_ref(span)),
                )
            }
            StmtKind::For {
                init,
                condition,
                post,
                body,
            } => {
                // The init declaration scopes over condition, post, and body.
                let for_scope = self.ctx.scopes.new_scope(ScopeKind::Block, Some(scope));
                let init_c = self.elaborate_statement(init, for_scope);
                let cond_c = condition
                    .as_ref()
                    .map(|c| self.elaborate_condition(c, for_scope));
                let post_c = post.as_ref().map(|p| {
                    let e = self.elaborate_expression(p, for_scope);
                    self.ctx.constructs.add(
                        ConstructKind::ExpressionStatement { expr: e },
                        p.span,
                        Some(self.source.source_ref(p.span)),
                    )
                });
                self.loop_depth += 1;
                let body_c = self.elaborate_statement(body, for_scope);
                self.loop_depth -= 1;
                self.ctx.constructs.add(
                    ConstructKind::For {
                        init: init_c,
                        condition: cond_c,
                        post: post_c,
                        body: body_c,
                    },
                    span,
                    Some(self.source.source_ref(span)),
                )
            }
            StmtKind::Return(value) => self.elaborate_return(value.as_ref(), scope, span),
            StmtKind::Break => {
                let c = self.ctx.constructs.add(
                    ConstructKind::Break,
                    span,
                    Some(self.source.source_ref(span)),
                );
                if self.loop_depth == 0 {
                    self.error_at(
                        c,
                        "stmt.break.outside_loop",
                        "'break' can only appear inside a loop",
                        span,
                    );
                }
                c
            }
            StmtKind::Continue => {
                let c = self.ctx.constructs.add(
                    ConstructKind::Continue,
                    span,
                    Some(self.source.source_ref(span)),
                );
                if self.loop_depth == 0 {
                    self.error_at(
                        c,
                        "stmt.continue.outside_loop",
                        "'continue' can only appear inside a loop",
                        span,
                    );
                }
                c
            }
        }
    }

    fn elaborate_condition(
        &mut self,
        condition: &crate::frontend::ast::Expression,
        scope: ScopeId,
    ) -> ConstructId {
        let e = self.elaborate_expression(condition, scope);
        self.convert_to_bool(e, condition.span)
    }

    fn elaborate_return(
        &mut self,
        value: Option<&crate::frontend::ast::Expression>,
        scope: ScopeId,
        span: Span,
    ) -> ConstructId {
        let return_type = self.current_return.clone().unwrap_or_else(Type::void);
        match value {
            None => {
                let c = self.ctx.constructs.add(
                    ConstructKind::Return { value: None },
                    span,
                    Some(self.source.source_ref(span)),
                );
                if !return_type.is_void() {
                    self.error_at(
                        c,
                        "stmt.return.value",
                        format!("this function must return a value of type '{return_type}'"),
                        span,
                    );
                }
                c
            }
            Some(expr) => {
                let e = self.elaborate_expression(expr, scope);
                let converted = if return_type.is_void() {
                    e
                } else if return_type.is_reference() {
                    self.apply_conversion(e, &return_type, span)
                } else {
                    self.convert_for_init(e, &return_type, span)
                };
                let c = self.ctx.constructs.add(
                    ConstructKind::Return {
                        value: Some(converted),
                    },
                    span,
                    Some(self.source.source_ref(span)),
                );
                if return_type.is_void() {
                    self.error_at(
                        c,
                        "stmt.return.void",
                        "a void function cannot return a value",
                        span,
                    );
                }
                c
            }
        }
    }
}
