//! Parser implementation
//!
//! The parser is deliberately strict: the first syntax error aborts the
//! translation unit with a [`SyntaxError`], which the unit records as a
//! single Syntax note. A unit that fails to parse contributes nothing to
//! linking, so there is no error recovery here; all tolerant, keep-going
//! behavior lives in semantic elaboration.
//!
//! Declarations are distinguished from expression statements by their first
//! token: a type keyword, `const`, `virtual`, or a class name seen earlier in
//! this unit (textual inclusion guarantees headers precede their uses).

use std::collections::HashSet;

use crate::common::Span;
use crate::frontend::ast::*;
use crate::frontend::lexer::{Lexer, Token, TokenKind};

/// A fatal parse failure for one translation unit
#[derive(Debug, Clone)]
pub struct SyntaxError {
    pub message: String,
    pub span: Span,
}

impl SyntaxError {
    fn new(message: impl Into<String>, span: Span) -> Self {
        Self {
            message: message.into(),
            span,
        }
    }
}

type ParseResult<T> = Result<T, SyntaxError>;

/// Parse one preprocessed translation unit.
pub fn parse_translation_unit(text: &str) -> Result<TranslationUnitAst, SyntaxError> {
    Parser::new(text)?.parse_unit()
}

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    /// Class names declared so far in this unit; used to recognize
    /// `Name x;` as a declaration and `new Name(...)`.
    class_names: HashSet<String>,
}

impl Parser {
    pub fn new(text: &str) -> ParseResult<Self> {
        let mut lexer = Lexer::new(text);
        let mut tokens = Vec::new();
        loop {
            let token = lexer
                .next_token()
                .map_err(|e| SyntaxError::new(e.message, e.span))?;
            let is_eof = matches!(token.kind, TokenKind::Eof);
            tokens.push(token);
            if is_eof {
                break;
            }
        }
        Ok(Self {
            tokens,
            pos: 0,
            class_names: HashSet::new(),
        })
    }

    // ==================== token helpers ====================

    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_kind(&self) -> &TokenKind {
        &self.peek().kind
    }

    fn peek_at(&self, offset: usize) -> &TokenKind {
        let idx = (self.pos + offset).min(self.tokens.len() - 1);
        &self.tokens[idx].kind
    }

    fn advance(&mut self) -> Token {
        let token = self.tokens[self.pos.min(self.tokens.len() - 1)].clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn check(&self, kind: &TokenKind) -> bool {
        std::mem::discriminant(self.peek_kind()) == std::mem::discriminant(kind)
    }

    fn match_token(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: &TokenKind, what: &str) -> ParseResult<Token> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            Err(SyntaxError::new(
                format!("expected {what}, found {}", self.peek_kind()),
                self.peek().span,
            ))
        }
    }

    fn expect_identifier(&mut self, what: &str) -> ParseResult<(String, Span)> {
        let token = self.advance();
        match token.kind {
            TokenKind::Identifier(name) => Ok((name, token.span)),
            other => Err(SyntaxError::new(
                format!("expected {what}, found {other}"),
                token.span,
            )),
        }
    }

    fn span_from(&self, start: Span) -> Span {
        let end = if self.pos > 0 {
            self.tokens[self.pos - 1].span.end
        } else {
            start.end
        };
        Span::new(start.start, end.max(start.start))
    }

    // ==================== translation unit ====================

    pub fn parse_unit(&mut self) -> ParseResult<TranslationUnitAst> {
        let mut declarations = Vec::new();
        while !self.check(&TokenKind::Eof) {
            declarations.push(self.parse_top_level_declaration()?);
        }
        Ok(TranslationUnitAst { declarations })
    }

    fn parse_top_level_declaration(&mut self) -> ParseResult<Declaration> {
        let start = self.peek().span;

        if self.check(&TokenKind::Class) {
            let class = self.parse_class_definition()?;
            return Ok(Declaration {
                span: class.span,
                kind: DeclKind::Class(class),
            });
        }

        let is_virtual = self.match_token(&TokenKind::Virtual);
        let spec = self.parse_type_specifier()?;
        let declarator = self.parse_declarator(true)?;

        // A function declarator followed by `{` is a definition.
        if matches!(declarator.suffix, Some(DeclaratorSuffix::Function(_)))
            && self.check(&TokenKind::LBrace)
        {
            let body = self.parse_function_body()?;
            let span = self.span_from(start);
            return Ok(Declaration {
                kind: DeclKind::Function(FunctionDefinitionAst {
                    spec,
                    declarator,
                    is_virtual,
                    body,
                    span,
                }),
                span,
            });
        }

        let simple = self.finish_simple_declaration(spec, declarator, start)?;
        let span = self.span_from(start);
        Ok(Declaration {
            kind: DeclKind::Simple(simple),
            span,
        })
    }

    /// Parse the remaining init-declarators of a simple declaration,
    /// including the one already parsed, through the terminating `;`.
    fn finish_simple_declaration(
        &mut self,
        spec: TypeSpecifier,
        first: Declarator,
        start: Span,
    ) -> ParseResult<SimpleDeclaration> {
        let mut declarators = Vec::new();
        let mut declarator = first;
        loop {
            let dstart = declarator.span;
            let init = self.parse_initializer_opt()?;
            declarators.push(InitDeclarator {
                declarator,
                init,
                span: self.span_from(dstart),
            });
            if !self.match_token(&TokenKind::Comma) {
                break;
            }
            declarator = self.parse_declarator(false)?;
        }
        self.expect(&TokenKind::Semicolon, "';' after declaration")?;
        let _ = start;
        Ok(SimpleDeclaration { spec, declarators })
    }

    fn parse_initializer_opt(&mut self) -> ParseResult<Option<InitializerAst>> {
        if self.match_token(&TokenKind::Eq) {
            let expr = self.parse_expression()?;
            return Ok(Some(InitializerAst::Copy(expr)));
        }
        if self.check(&TokenKind::LParen) {
            let start = self.peek().span;
            self.advance();
            let mut args = Vec::new();
            if !self.check(&TokenKind::RParen) {
                loop {
                    args.push(self.parse_expression()?);
                    if !self.match_token(&TokenKind::Comma) {
                        break;
                    }
                }
            }
            self.expect(&TokenKind::RParen, "')' after initializer arguments")?;
            return Ok(Some(InitializerAst::Direct(args, self.span_from(start))));
        }
        Ok(None)
    }

    // ==================== types & declarators ====================

    fn starts_type(&self, kind: &TokenKind) -> bool {
        match kind {
            TokenKind::Void
            | TokenKind::Bool
            | TokenKind::Char
            | TokenKind::Int
            | TokenKind::Double
            | TokenKind::Const => true,
            TokenKind::Identifier(name) => self.class_names.contains(name),
            _ => false,
        }
    }

    fn starts_declaration(&self) -> bool {
        matches!(self.peek_kind(), TokenKind::Virtual | TokenKind::Class)
            || self.starts_type(self.peek_kind())
    }

    fn parse_type_specifier(&mut self) -> ParseResult<TypeSpecifier> {
        let start = self.peek().span;
        let mut const_count = 0;
        while self.match_token(&TokenKind::Const) {
            const_count += 1;
        }

        let token = self.advance();
        let base = match token.kind {
            TokenKind::Void => BaseTypeAst::Void,
            TokenKind::Bool => BaseTypeAst::Bool,
            TokenKind::Char => BaseTypeAst::Char,
            TokenKind::Int => BaseTypeAst::Int,
            TokenKind::Double => BaseTypeAst::Double,
            TokenKind::Identifier(name) => BaseTypeAst::Named(name),
            other => {
                return Err(SyntaxError::new(
                    format!("expected a type, found {other}"),
                    token.span,
                ));
            }
        };

        while self.match_token(&TokenKind::Const) {
            const_count += 1;
        }

        Ok(TypeSpecifier {
            base,
            is_const: const_count > 0,
            duplicate_const: const_count > 1,
            span: self.span_from(start),
        })
    }

    /// Parse a declarator. When `allow_function` is set a trailing paren
    /// group that looks like a parameter list becomes a function suffix;
    /// otherwise (and for paren groups that look like expressions) the
    /// parens are left for the initializer.
    fn parse_declarator(&mut self, allow_function: bool) -> ParseResult<Declarator> {
        let start = self.peek().span;
        let mut pointers = Vec::new();
        while self.match_token(&TokenKind::Star) {
            pointers.push(self.match_token(&TokenKind::Const));
        }
        let is_reference = self.match_token(&TokenKind::Amp);

        let name = self.parse_declarator_name()?;

        let mut suffix = None;
        if self.check(&TokenKind::LBracket) {
            self.advance();
            let length = if self.match_token(&TokenKind::RBracket) {
                None
            } else {
                let token = self.advance();
                let length = match token.kind {
                    TokenKind::IntLiteral(n) if n >= 0 => {
                        ArrayLength::Literal(n as usize, token.span)
                    }
                    _ => {
                        // Skip to the closing bracket; elaboration reports
                        // the non-literal length.
                        let bad = token.span;
                        while !self.check(&TokenKind::RBracket) && !self.check(&TokenKind::Eof) {
                            self.advance();
                        }
                        ArrayLength::Other(bad)
                    }
                };
                self.expect(&TokenKind::RBracket, "']' after array length")?;
                Some(length)
            };
            suffix = Some(DeclaratorSuffix::Array(length));
        } else if self.check(&TokenKind::LParen) && self.paren_group_is_params() {
            if allow_function || name.is_some() {
                self.advance();
                let params = self.parse_parameter_list()?;
                suffix = Some(DeclaratorSuffix::Function(params));
            }
        }

        Ok(Declarator {
            pointers,
            is_reference,
            name,
            suffix,
            span: self.span_from(start),
        })
    }

    fn parse_declarator_name(&mut self) -> ParseResult<Option<String>> {
        match self.peek_kind().clone() {
            TokenKind::Identifier(name) => {
                self.advance();
                Ok(Some(name))
            }
            TokenKind::Operator => {
                self.advance();
                let symbol = self.parse_operator_symbol()?;
                Ok(Some(format!("operator{symbol}")))
            }
            _ => Ok(None),
        }
    }

    fn parse_operator_symbol(&mut self) -> ParseResult<&'static str> {
        let token = self.advance();
        let symbol = match token.kind {
            TokenKind::Shl => "<<",
            TokenKind::Shr => ">>",
            TokenKind::EqEq => "==",
            TokenKind::NotEq => "!=",
            TokenKind::Less => "<",
            TokenKind::Greater => ">",
            TokenKind::LessEq => "<=",
            TokenKind::GreaterEq => ">=",
            TokenKind::Plus => "+",
            TokenKind::Minus => "-",
            TokenKind::Star => "*",
            TokenKind::Slash => "/",
            TokenKind::Percent => "%",
            TokenKind::Eq => "=",
            TokenKind::Not => "!",
            TokenKind::LBracket => {
                self.expect(&TokenKind::RBracket, "']' in 'operator[]'")?;
                "[]"
            }
            other => {
                return Err(SyntaxError::new(
                    format!("'{other}' cannot be overloaded"),
                    token.span,
                ));
            }
        };
        Ok(symbol)
    }

    /// Lookahead: does the paren group at the current position read as a
    /// parameter list rather than initializer arguments? Parameter lists
    /// start with a type (or are empty); initializer arguments start with
    /// an expression.
    fn paren_group_is_params(&self) -> bool {
        debug_assert!(self.check(&TokenKind::LParen));
        let next = self.peek_at(1);
        matches!(next, TokenKind::RParen) || self.starts_type(next)
    }

    fn parse_parameter_list(&mut self) -> ParseResult<Vec<ParamAst>> {
        let mut params = Vec::new();
        if !self.check(&TokenKind::RParen) {
            loop {
                let start = self.peek().span;
                let spec = self.parse_type_specifier()?;
                let declarator = self.parse_declarator(false)?;
                params.push(ParamAst {
                    spec,
                    declarator,
                    span: self.span_from(start),
                });
                if !self.match_token(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(&TokenKind::RParen, "')' after parameters")?;
        Ok(params)
    }

    // ==================== classes ====================

    fn parse_class_definition(&mut self) -> ParseResult<ClassDefinitionAst> {
        let start = self.peek().span;
        self.expect(&TokenKind::Class, "'class'")?;
        let (name, _) = self.expect_identifier("class name")?;

        // Register the name before the body so members and later
        // declarations can use it.
        self.class_names.insert(name.clone());

        let base = if self.match_token(&TokenKind::Colon) {
            // Only public inheritance is in the subset; the keyword is
            // required so the restriction is visible in source.
            self.expect(&TokenKind::Public, "'public' before base class name")?;
            let (base_name, _) = self.expect_identifier("base class name")?;
            Some(base_name)
        } else {
            None
        };

        self.expect(&TokenKind::LBrace, "'{' to open class body")?;

        let mut members = Vec::new();
        let mut access = AccessSpecifier::Private;
        while !self.check(&TokenKind::RBrace) && !self.check(&TokenKind::Eof) {
            if self.check(&TokenKind::Public) {
                self.advance();
                self.expect(&TokenKind::Colon, "':' after 'public'")?;
                access = AccessSpecifier::Public;
                continue;
            }
            if self.check(&TokenKind::Private) {
                self.advance();
                self.expect(&TokenKind::Colon, "':' after 'private'")?;
                access = AccessSpecifier::Private;
                continue;
            }
            members.push(self.parse_member_declaration(&name, access)?);
        }

        self.expect(&TokenKind::RBrace, "'}' to close class body")?;
        self.expect(&TokenKind::Semicolon, "';' after class definition")?;

        Ok(ClassDefinitionAst {
            name,
            base,
            members,
            span: self.span_from(start),
        })
    }

    fn parse_member_declaration(
        &mut self,
        class_name: &str,
        access: AccessSpecifier,
    ) -> ParseResult<MemberDeclAst> {
        let start = self.peek().span;

        // Destructor: `[virtual] ~Name() body`
        let is_virtual = self.match_token(&TokenKind::Virtual);
        if self.check(&TokenKind::Tilde) {
            self.advance();
            let (name, span) = self.expect_identifier("class name after '~'")?;
            if name != class_name {
                return Err(SyntaxError::new(
                    format!("destructor name '~{name}' does not match class '{class_name}'"),
                    span,
                ));
            }
            self.expect(&TokenKind::LParen, "'(' after destructor name")?;
            self.expect(&TokenKind::RParen, "')' (destructors take no parameters)")?;
            let body = self.parse_function_body()?;
            let span = self.span_from(start);
            return Ok(MemberDeclAst {
                access,
                kind: MemberDeclKind::Destructor(DestructorAst {
                    name: format!("~{name}"),
                    is_virtual,
                    body,
                    span,
                }),
                span,
            });
        }

        // Constructor: `Name(params) [: inits] body`
        if let TokenKind::Identifier(id) = self.peek_kind() {
            if id == class_name && matches!(self.peek_at(1), TokenKind::LParen) {
                let (name, _) = self.expect_identifier("constructor name")?;
                self.expect(&TokenKind::LParen, "'(' after constructor name")?;
                let params = self.parse_parameter_list()?;
                let member_inits = if self.match_token(&TokenKind::Colon) {
                    self.parse_member_initializers()?
                } else {
                    Vec::new()
                };
                let body = self.parse_function_body()?;
                let span = self.span_from(start);
                return Ok(MemberDeclAst {
                    access,
                    kind: MemberDeclKind::Constructor(ConstructorAst {
                        name,
                        params,
                        member_inits,
                        body,
                        span,
                    }),
                    span,
                });
            }
        }

        // Field, member function, or prototype
        let spec = self.parse_type_specifier()?;
        let declarator = self.parse_declarator(true)?;

        if matches!(declarator.suffix, Some(DeclaratorSuffix::Function(_)))
            && self.check(&TokenKind::LBrace)
        {
            let body = self.parse_function_body()?;
            let span = self.span_from(start);
            return Ok(MemberDeclAst {
                access,
                kind: MemberDeclKind::Function(FunctionDefinitionAst {
                    spec,
                    declarator,
                    is_virtual,
                    body,
                    span,
                }),
                span,
            });
        }

        let is_function = matches!(declarator.suffix, Some(DeclaratorSuffix::Function(_)));
        let simple = self.finish_simple_declaration(spec, declarator, start)?;
        let span = self.span_from(start);
        let kind = if is_function {
            MemberDeclKind::Prototype(simple)
        } else {
            MemberDeclKind::Field(simple)
        };
        Ok(MemberDeclAst { access, kind, span })
    }

    fn parse_member_initializers(&mut self) -> ParseResult<Vec<MemberInitAst>> {
        let mut inits = Vec::new();
        loop {
            let (name, name_span) = self.expect_identifier("member name in initializer list")?;
            self.expect(&TokenKind::LParen, "'(' in member initializer")?;
            let mut args = Vec::new();
            if !self.check(&TokenKind::RParen) {
                loop {
                    args.push(self.parse_expression()?);
                    if !self.match_token(&TokenKind::Comma) {
                        break;
                    }
                }
            }
            self.expect(&TokenKind::RParen, "')' in member initializer")?;
            inits.push(MemberInitAst {
                name,
                args,
                span: self.span_from(name_span),
            });
            if !self.match_token(&TokenKind::Comma) {
                break;
            }
        }
        Ok(inits)
    }

    // ==================== function bodies & statements ====================

    fn parse_function_body(&mut self) -> ParseResult<FunctionBodyAst> {
        let start = self.peek().span;
        self.expect(&TokenKind::LBrace, "'{' to open function body")?;

        // Library bodies are a single opaque marker.
        if let TokenKind::OpaqueMarker(marker) = self.peek_kind().clone() {
            let marker_span = self.advance().span;
            self.match_token(&TokenKind::Semicolon);
            self.expect(&TokenKind::RBrace, "'}' after opaque body")?;
            return Ok(FunctionBodyAst::Opaque {
                marker,
                span: marker_span,
            });
        }

        let mut statements = Vec::new();
        while !self.check(&TokenKind::RBrace) && !self.check(&TokenKind::Eof) {
            statements.push(self.parse_statement()?);
        }
        self.expect(&TokenKind::RBrace, "'}' to close function body")?;
        Ok(FunctionBodyAst::Block(BlockAst {
            statements,
            span: self.span_from(start),
        }))
    }

    fn parse_block(&mut self) -> ParseResult<BlockAst> {
        let start = self.peek().span;
        self.expect(&TokenKind::LBrace, "'{'")?;
        let mut statements = Vec::new();
        while !self.check(&TokenKind::RBrace) && !self.check(&TokenKind::Eof) {
            statements.push(self.parse_statement()?);
        }
        self.expect(&TokenKind::RBrace, "'}'")?;
        Ok(BlockAst {
            statements,
            span: self.span_from(start),
        })
    }

    fn parse_statement(&mut self) -> ParseResult<Statement> {
        let start = self.peek().span;
        match self.peek_kind() {
            TokenKind::LBrace => {
                let block = self.parse_block()?;
                Ok(Statement {
                    span: block.span,
                    kind: StmtKind::Block(block),
                })
            }
            TokenKind::Semicolon => {
                self.advance();
                Ok(Statement {
                    kind: StmtKind::Null,
                    span: start,
                })
            }
            TokenKind::If => {
                self.advance();
                self.expect(&TokenKind::LParen, "'(' after 'if'")?;
                let condition = self.parse_expression()?;
                self.expect(&TokenKind::RParen, "')' after condition")?;
                let then_branch = Box::new(self.parse_statement()?);
                let else_branch = if self.match_token(&TokenKind::Else) {
                    Some(Box::new(self.parse_statement()?))
                } else {
                    None
                };
                Ok(Statement {
                    kind: StmtKind::If {
                        condition,
                        then_branch,
                        else_branch,
                    },
                    span: self.span_from(start),
                })
            }
            TokenKind::While => {
                self.advance();
                self.expect(&TokenKind::LParen, "'(' after 'while'")?;
                let condition = self.parse_expression()?;
                self.expect(&TokenKind::RParen, "')' after condition")?;
                let body = Box::new(self.parse_statement()?);
                Ok(Statement {
                    kind: StmtKind::While { condition, body },
                    span: self.span_from(start),
                })
            }
            TokenKind::For => {
                self.advance();
                self.expect(&TokenKind::LParen, "'(' after 'for'")?;
                let init = if self.check(&TokenKind::Semicolon) {
                    let span = self.advance().span;
                    Statement {
                        kind: StmtKind::Null,
                        span,
                    }
                } else if self.starts_declaration() {
                    let spec = self.parse_type_specifier()?;
                    let declarator = self.parse_declarator(false)?;
                    let dstart = self.peek().span;
                    let simple = self.finish_simple_declaration(spec, declarator, dstart)?;
                    Statement {
                        kind: StmtKind::Declaration(simple),
                        span: self.span_from(start),
                    }
                } else {
                    let expr = self.parse_expression()?;
                    let span = expr.span;
                    self.expect(&TokenKind::Semicolon, "';' after for-init")?;
                    Statement {
                        kind: StmtKind::Expression(expr),
                        span,
                    }
                };
                let condition = if self.check(&TokenKind::Semicolon) {
                    None
                } else {
                    Some(self.parse_expression()?)
                };
                self.expect(&TokenKind::Semicolon, "';' after for-condition")?;
                let post = if self.check(&TokenKind::RParen) {
                    None
                } else {
                    Some(self.parse_expression()?)
                };
                self.expect(&TokenKind::RParen, "')' after for-clauses")?;
                let body = Box::new(self.parse_statement()?);
                Ok(Statement {
                    kind: StmtKind::For {
                        init: Box::new(init),
                        condition,
                        post,
                        body,
                    },
                    span: self.span_from(start),
                })
            }
            TokenKind::Return => {
                self.advance();
                let expr = if self.check(&TokenKind::Semicolon) {
                    None
                } else {
                    Some(self.parse_expression()?)
                };
                self.expect(&TokenKind::Semicolon, "';' after return")?;
                Ok(Statement {
                    kind: StmtKind::Return(expr),
                    span: self.span_from(start),
                })
            }
            TokenKind::Break => {
                self.advance();
                self.expect(&TokenKind::Semicolon, "';' after 'break'")?;
                Ok(Statement {
                    kind: StmtKind::Break,
                    span: self.span_from(start),
                })
            }
            TokenKind::Continue => {
                self.advance();
                self.expect(&TokenKind::Semicolon, "';' after 'continue'")?;
                Ok(Statement {
                    kind: StmtKind::Continue,
                    span: self.span_from(start),
                })
            }
            _ if self.starts_declaration() => {
                let spec = self.parse_type_specifier()?;
                let declarator = self.parse_declarator(false)?;
                let simple = self.finish_simple_declaration(spec, declarator, start)?;
                Ok(Statement {
                    kind: StmtKind::Declaration(simple),
                    span: self.span_from(start),
                })
            }
            _ => {
                let expr = self.parse_expression()?;
                self.expect(&TokenKind::Semicolon, "';' after expression")?;
                Ok(Statement {
                    kind: StmtKind::Expression(expr),
                    span: self.span_from(start),
                })
            }
        }
    }

    // ==================== expressions ====================

    pub fn parse_expression(&mut self) -> ParseResult<Expression> {
        self.parse_assignment()
    }

    fn parse_assignment(&mut self) -> ParseResult<Expression> {
        let lhs = self.parse_logical_or()?;
        if self.match_token(&TokenKind::Eq) {
            let rhs = self.parse_assignment()?; // right associative
            let span = lhs.span.merge(rhs.span);
            return Ok(Expression {
                kind: ExprKind::Assign {
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                span,
            });
        }
        Ok(lhs)
    }

    fn parse_logical_or(&mut self) -> ParseResult<Expression> {
        let mut lhs = self.parse_logical_and()?;
        while self.match_token(&TokenKind::OrOr) {
            let rhs = self.parse_logical_and()?;
            lhs = binary(BinaryOp::LogicalOr, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_logical_and(&mut self) -> ParseResult<Expression> {
        let mut lhs = self.parse_equality()?;
        while self.match_token(&TokenKind::AndAnd) {
            let rhs = self.parse_equality()?;
            lhs = binary(BinaryOp::LogicalAnd, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_equality(&mut self) -> ParseResult<Expression> {
        let mut lhs = self.parse_relational()?;
        loop {
            let op = if self.match_token(&TokenKind::EqEq) {
                BinaryOp::Equal
            } else if self.match_token(&TokenKind::NotEq) {
                BinaryOp::NotEqual
            } else {
                break;
            };
            let rhs = self.parse_relational()?;
            lhs = binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_relational(&mut self) -> ParseResult<Expression> {
        let mut lhs = self.parse_shift()?;
        loop {
            let op = if self.match_token(&TokenKind::Less) {
                BinaryOp::Less
            } else if self.match_token(&TokenKind::Greater) {
                BinaryOp::Greater
            } else if self.match_token(&TokenKind::LessEq) {
                BinaryOp::LessEq
            } else if self.match_token(&TokenKind::GreaterEq) {
                BinaryOp::GreaterEq
            } else {
                break;
            };
            let rhs = self.parse_shift()?;
            lhs = binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_shift(&mut self) -> ParseResult<Expression> {
        let mut lhs = self.parse_additive()?;
        loop {
            let op = if self.match_token(&TokenKind::Shl) {
                BinaryOp::Shl
            } else if self.match_token(&TokenKind::Shr) {
                BinaryOp::Shr
            } else {
                break;
            };
            let rhs = self.parse_additive()?;
            lhs = binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_additive(&mut self) -> ParseResult<Expression> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = if self.match_token(&TokenKind::Plus) {
                BinaryOp::Add
            } else if self.match_token(&TokenKind::Minus) {
                BinaryOp::Sub
            } else {
                break;
            };
            let rhs = self.parse_multiplicative()?;
            lhs = binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_multiplicative(&mut self) -> ParseResult<Expression> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = if self.match_token(&TokenKind::Star) {
                BinaryOp::Mul
            } else if self.match_token(&TokenKind::Slash) {
                BinaryOp::Div
            } else if self.match_token(&TokenKind::Percent) {
                BinaryOp::Mod
            } else {
                break;
            };
            let rhs = self.parse_unary()?;
            lhs = binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> ParseResult<Expression> {
        let start = self.peek().span;
        let kind = match self.peek_kind() {
            TokenKind::Minus => {
                self.advance();
                let operand = Box::new(self.parse_unary()?);
                ExprKind::Unary {
                    op: UnaryOp::Neg,
                    operand,
                }
            }
            TokenKind::Plus => {
                self.advance();
                let operand = Box::new(self.parse_unary()?);
                ExprKind::Unary {
                    op: UnaryOp::Plus,
                    operand,
                }
            }
            TokenKind::Not => {
                self.advance();
                let operand = Box::new(self.parse_unary()?);
                ExprKind::Unary {
                    op: UnaryOp::Not,
                    operand,
                }
            }
            TokenKind::Star => {
                self.advance();
                let operand = Box::new(self.parse_unary()?);
                ExprKind::Deref(operand)
            }
            TokenKind::Amp => {
                self.advance();
                let operand = Box::new(self.parse_unary()?);
                ExprKind::AddressOf(operand)
            }
            TokenKind::PlusPlus | TokenKind::MinusMinus => {
                let increment = matches!(self.peek_kind(), TokenKind::PlusPlus);
                self.advance();
                let operand = Box::new(self.parse_unary()?);
                ExprKind::IncDec {
                    increment,
                    postfix: false,
                    operand,
                }
            }
            TokenKind::New => {
                self.advance();
                let spec = self.parse_type_specifier()?;
                if self.check(&TokenKind::LBracket) {
                    self.advance();
                    let length = self.parse_expression()?;
                    self.expect(&TokenKind::RBracket, "']' after array length")?;
                    return Ok(Expression {
                        kind: ExprKind::NewArray {
                            spec,
                            length: Box::new(length),
                        },
                        span: self.span_from(start),
                    });
                }
                let (args, args_span) = if self.check(&TokenKind::LParen) {
                    let aspan = self.peek().span;
                    self.advance();
                    let mut args = Vec::new();
                    if !self.check(&TokenKind::RParen) {
                        loop {
                            args.push(self.parse_expression()?);
                            if !self.match_token(&TokenKind::Comma) {
                                break;
                            }
                        }
                    }
                    self.expect(&TokenKind::RParen, "')' after new-initializer")?;
                    (args, Some(self.span_from(aspan)))
                } else {
                    (Vec::new(), None)
                };
                ExprKind::New {
                    spec,
                    args,
                    args_span,
                }
            }
            TokenKind::Delete => {
                self.advance();
                let array_form = if self.check(&TokenKind::LBracket) {
                    self.advance();
                    self.expect(&TokenKind::RBracket, "']' in 'delete[]'")?;
                    true
                } else {
                    false
                };
                let operand = Box::new(self.parse_unary()?);
                ExprKind::Delete {
                    operand,
                    array_form,
                }
            }
            _ => return self.parse_postfix(),
        };
        Ok(Expression {
            kind,
            span: self.span_from(start),
        })
    }

    fn parse_postfix(&mut self) -> ParseResult<Expression> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.peek_kind() {
                TokenKind::LParen => {
                    self.advance();
                    let mut args = Vec::new();
                    if !self.check(&TokenKind::RParen) {
                        loop {
                            args.push(self.parse_expression()?);
                            if !self.match_token(&TokenKind::Comma) {
                                break;
                            }
                        }
                    }
                    let end = self.expect(&TokenKind::RParen, "')' after arguments")?;
                    let span = expr.span.merge(end.span);
                    expr = Expression {
                        kind: ExprKind::Call {
                            callee: Box::new(expr),
                            args,
                        },
                        span,
                    };
                }
                TokenKind::LBracket => {
                    self.advance();
                    let index = self.parse_expression()?;
                    let end = self.expect(&TokenKind::RBracket, "']' after subscript")?;
                    let span = expr.span.merge(end.span);
                    expr = Expression {
                        kind: ExprKind::Subscript {
                            base: Box::new(expr),
                            index: Box::new(index),
                        },
                        span,
                    };
                }
                TokenKind::Dot | TokenKind::Arrow => {
                    let through_pointer = matches!(self.peek_kind(), TokenKind::Arrow);
                    self.advance();
                    let (member, mspan) = self.expect_identifier("member name")?;
                    let span = expr.span.merge(mspan);
                    expr = Expression {
                        kind: ExprKind::Member {
                            object: Box::new(expr),
                            member,
                            through_pointer,
                        },
                        span,
                    };
                }
                TokenKind::PlusPlus | TokenKind::MinusMinus => {
                    let increment = matches!(self.peek_kind(), TokenKind::PlusPlus);
                    let end = self.advance();
                    let span = expr.span.merge(end.span);
                    expr = Expression {
                        kind: ExprKind::IncDec {
                            increment,
                            postfix: true,
                            operand: Box::new(expr),
                        },
                        span,
                    };
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> ParseResult<Expression> {
        let token = self.advance();
        let kind = match token.kind {
            TokenKind::IntLiteral(v) => ExprKind::IntLiteral(v),
            TokenKind::DoubleLiteral(v) => ExprKind::DoubleLiteral(v),
            TokenKind::CharLiteral(c) => ExprKind::CharLiteral(c),
            TokenKind::True => ExprKind::BoolLiteral(true),
            TokenKind::False => ExprKind::BoolLiteral(false),
            TokenKind::StringLiteral(s) => ExprKind::StringLiteral(s),
            TokenKind::Identifier(name) => ExprKind::Identifier(name),
            TokenKind::This => ExprKind::This,
            TokenKind::LParen => {
                let inner = self.parse_expression()?;
                self.expect(&TokenKind::RParen, "')'")?;
                return Ok(inner);
            }
            other => {
                return Err(SyntaxError::new(
                    format!("expected an expression, found {other}"),
                    token.span,
                ));
            }
        };
        Ok(Expression {
            kind,
            span: token.span,
        })
    }
}

fn binary(op: BinaryOp, lhs: Expression, rhs: Expression) -> Expression {
    let span = lhs.span.merge(rhs.span);
    Expression {
        kind: ExprKind::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        },
        span,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> TranslationUnitAst {
        parse_translation_unit(text).expect("should parse")
    }

    #[test]
    fn test_simple_main() {
        let unit = parse("int main() { int x = 2; int y = 3; int z = 10*x+y; }");
        assert_eq!(unit.declarations.len(), 1);
        assert!(matches!(unit.declarations[0].kind, DeclKind::Function(_)));
    }

    #[test]
    fn test_void_variable_parses() {
        // `void v;` is a semantic error, not a syntax error.
        let unit = parse("int main() { void v; }");
        assert_eq!(unit.declarations.len(), 1);
    }

    #[test]
    fn test_syntax_error_reported() {
        let err = parse_translation_unit("int main() { int x = ; }").unwrap_err();
        assert!(err.message.contains("expected an expression"));
    }

    #[test]
    fn test_class_definition() {
        let unit = parse(
            "class Point {\n\
             public:\n\
               Point(int x, int y) : x_(x), y_(y) {}\n\
               ~Point() {}\n\
               int getX() { return x_; }\n\
             private:\n\
               int x_;\n\
               int y_;\n\
             };\n\
             int main() { Point p(1, 2); }",
        );
        assert_eq!(unit.declarations.len(), 2);
        let DeclKind::Class(class) = &unit.declarations[0].kind else {
            panic!("expected class");
        };
        assert_eq!(class.name, "Point");
        assert_eq!(class.members.len(), 5);
        assert_eq!(class.members[0].access, AccessSpecifier::Public);
        assert_eq!(class.members[4].access, AccessSpecifier::Private);
    }

    #[test]
    fn test_function_vs_direct_init() {
        // `int f(int);` is a prototype, `int x(5);` is direct init.
        let unit = parse("int f(int);\nint main() { int x(5); }");
        let DeclKind::Simple(proto) = &unit.declarations[0].kind else {
            panic!("expected prototype");
        };
        assert!(matches!(
            proto.declarators[0].declarator.suffix,
            Some(DeclaratorSuffix::Function(_))
        ));
    }

    #[test]
    fn test_operator_member() {
        let unit = parse(
            "class ostream {\n\
             public:\n\
               ostream& operator<<(int v) { @ostream_insert_int; }\n\
             };",
        );
        let DeclKind::Class(class) = &unit.declarations[0].kind else {
            panic!("expected class");
        };
        let MemberDeclKind::Function(func) = &class.members[0].kind else {
            panic!("expected member function");
        };
        assert_eq!(func.declarator.name.as_deref(), Some("operator<<"));
        assert!(matches!(func.body, FunctionBodyAst::Opaque { .. }));
    }

    #[test]
    fn test_stream_expression() {
        let unit = parse("int main() { cout << 1 << 2; }");
        let DeclKind::Function(func) = &unit.declarations[0].kind else {
            panic!("expected function");
        };
        let FunctionBodyAst::Block(block) = &func.body else {
            panic!("expected block");
        };
        // (cout << 1) << 2 — left associative
        let StmtKind::Expression(expr) = &block.statements[0].kind else {
            panic!("expected expression statement");
        };
        let ExprKind::Binary {
            op: BinaryOp::Shl,
            lhs,
            ..
        } = &expr.kind
        else {
            panic!("expected shl");
        };
        assert!(matches!(
            lhs.kind,
            ExprKind::Binary {
                op: BinaryOp::Shl,
                ..
            }
        ));
    }

    #[test]
    fn test_new_delete() {
        let unit = parse("int main() { int* p = new int(5); delete p; }");
        assert_eq!(unit.declarations.len(), 1);
        let unit = parse("int main() { int* a = new int[3]; delete[] a; }");
        assert_eq!(unit.declarations.len(), 1);
    }

    #[test]
    fn test_for_loop() {
        let unit = parse("int main() { for (int i = 0; i < 10; ++i) { } }");
        assert_eq!(unit.declarations.len(), 1);
    }
}
