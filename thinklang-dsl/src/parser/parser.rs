//! Recursive-descent parser for ThinkLang
//!
//! One-token lookahead is sufficient everywhere. The parser is eager: the
//! first malformed construct surfaces a `ParseError` with its location and
//! no partial AST is produced.

use super::ast::*;
use crate::lexer::{Lexer, Token, TokenKind};

/// Parse a source string into a [`Program`].
pub fn parse(source: &str) -> Result<Program, ParseError> {
    let tokens = Lexer::new(source).tokenize();
    Parser::new(tokens).parse()
}

/// Parser over a token stream.
pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0 }
    }

    pub fn parse(&mut self) -> Result<Program, ParseError> {
        let mut imports = Vec::new();
        let mut statements = Vec::new();

        while !self.is_at_end() {
            if self.check(&TokenKind::Import) {
                imports.push(self.parse_import()?);
            } else {
                statements.push(self.parse_statement()?);
            }
            self.skip_separators();
        }

        Ok(Program {
            imports,
            statements,
        })
    }

    // ========================================================================
    // IMPORTS
    // ========================================================================

    fn parse_import(&mut self) -> Result<Import, ParseError> {
        let span = self.current().span;
        self.expect(TokenKind::Import)?;
        self.expect(TokenKind::LBrace)?;

        let mut names = Vec::new();
        while !self.check(&TokenKind::RBrace) {
            names.push(self.expect_identifier()?);
            self.optional_comma();
        }
        self.expect(TokenKind::RBrace)?;
        self.expect(TokenKind::From)?;
        let path = self.expect_string()?;

        Ok(Import { names, path, span })
    }

    // ========================================================================
    // STATEMENTS
    // ========================================================================

    fn parse_statement(&mut self) -> Result<Stmt, ParseError> {
        match &self.current().kind {
            TokenKind::Type => self.parse_type_decl().map(Stmt::TypeDecl),
            TokenKind::Fn => self.parse_fn_decl().map(Stmt::FnDecl),
            TokenKind::Tool => self.parse_tool_decl().map(Stmt::ToolDecl),
            TokenKind::Let => self.parse_let().map(Stmt::Let),
            TokenKind::Print => self.parse_print().map(Stmt::Print),
            TokenKind::Try => self.parse_try().map(Stmt::Try),
            TokenKind::If => self.parse_if().map(Stmt::If),
            TokenKind::Test => self.parse_test_block().map(Stmt::Test),
            TokenKind::Assert => self.parse_assert(),
            _ => {
                let span = self.current().span;
                let expr = self.parse_expr()?;
                Ok(Stmt::Expr(ExprStmt { expr, span }))
            }
        }
    }

    fn parse_block(&mut self) -> Result<Vec<Stmt>, ParseError> {
        self.expect(TokenKind::LBrace)?;
        let mut statements = Vec::new();
        while !self.check(&TokenKind::RBrace) && !self.is_at_end() {
            statements.push(self.parse_statement()?);
            self.skip_separators();
        }
        self.expect(TokenKind::RBrace)?;
        Ok(statements)
    }

    fn parse_type_decl(&mut self) -> Result<TypeDecl, ParseError> {
        let span = self.current().span;
        self.expect(TokenKind::Type)?;
        let name = self.expect_identifier()?;
        self.expect(TokenKind::LBrace)?;

        let mut fields = Vec::new();
        while !self.check(&TokenKind::RBrace) && !self.is_at_end() {
            fields.push(self.parse_field_decl()?);
            self.optional_comma();
            self.skip_separators();
        }
        self.expect(TokenKind::RBrace)?;

        Ok(TypeDecl { name, fields, span })
    }

    fn parse_field_decl(&mut self) -> Result<FieldDecl, ParseError> {
        let span = self.current().span;
        let name = self.expect_field_name()?;

        let optional = if self.check(&TokenKind::Question) {
            self.advance();
            true
        } else {
            false
        };

        self.expect(TokenKind::Colon)?;
        let ty = self.parse_type_expr()?;
        let annotations = self.parse_annotations()?;

        Ok(FieldDecl {
            name,
            optional,
            ty,
            annotations,
            span,
        })
    }

    fn parse_annotations(&mut self) -> Result<FieldAnnotations, ParseError> {
        let mut annotations = FieldAnnotations::default();

        loop {
            let name = match &self.current().kind {
                TokenKind::Description => "description".to_string(),
                TokenKind::Identifier(s)
                    if matches!(
                        s.as_str(),
                        "range" | "minLength" | "maxLength" | "minItems" | "maxItems" | "pattern"
                    ) =>
                {
                    s.clone()
                }
                _ => break,
            };
            self.advance();
            self.expect(TokenKind::LParen)?;

            match name.as_str() {
                "description" => annotations.description = Some(self.expect_string()?),
                "pattern" => annotations.pattern = Some(self.expect_string()?),
                "range" => {
                    let lo = self.expect_number()?;
                    self.expect(TokenKind::DotDot)?;
                    let hi = self.expect_number()?;
                    annotations.range = Some((lo, hi));
                }
                "minLength" => annotations.min_length = Some(self.expect_number()? as u64),
                "maxLength" => annotations.max_length = Some(self.expect_number()? as u64),
                "minItems" => annotations.min_items = Some(self.expect_number()? as u64),
                "maxItems" => annotations.max_items = Some(self.expect_number()? as u64),
                _ => unreachable!(),
            }

            self.expect(TokenKind::RParen)?;
        }

        Ok(annotations)
    }

    fn parse_fn_decl(&mut self) -> Result<FnDecl, ParseError> {
        let span = self.current().span;
        self.expect(TokenKind::Fn)?;
        let name = self.expect_identifier()?;
        let params = self.parse_params()?;

        let return_type = if self.check(&TokenKind::Arrow) {
            self.advance();
            Some(self.parse_type_expr()?)
        } else {
            None
        };

        let body = self.parse_block()?;

        Ok(FnDecl {
            name,
            params,
            return_type,
            body,
            span,
        })
    }

    fn parse_tool_decl(&mut self) -> Result<ToolDecl, ParseError> {
        let span = self.current().span;
        self.expect(TokenKind::Tool)?;
        let name = self.expect_identifier()?;
        let params = self.parse_params()?;

        let return_type = if self.check(&TokenKind::Arrow) {
            self.advance();
            Some(self.parse_type_expr()?)
        } else {
            None
        };

        self.expect(TokenKind::LBrace)?;

        let description = if self.check(&TokenKind::Description) {
            self.advance();
            self.expect(TokenKind::Colon)?;
            let d = self.expect_string()?;
            self.skip_separators();
            Some(d)
        } else {
            None
        };

        let mut body = Vec::new();
        while !self.check(&TokenKind::RBrace) && !self.is_at_end() {
            body.push(self.parse_statement()?);
            self.skip_separators();
        }
        self.expect(TokenKind::RBrace)?;

        Ok(ToolDecl {
            name,
            params,
            return_type,
            description,
            body,
            span,
        })
    }

    fn parse_params(&mut self) -> Result<Vec<Param>, ParseError> {
        self.expect(TokenKind::LParen)?;
        let mut params = Vec::new();
        while !self.check(&TokenKind::RParen) {
            let span = self.current().span;
            let name = self.expect_identifier()?;
            self.expect(TokenKind::Colon)?;
            let ty = self.parse_type_expr()?;
            params.push(Param { name, ty, span });
            self.optional_comma();
        }
        self.expect(TokenKind::RParen)?;
        Ok(params)
    }

    fn parse_let(&mut self) -> Result<LetStmt, ParseError> {
        let span = self.current().span;
        self.expect(TokenKind::Let)?;

        let uncertain = if self.check(&TokenKind::Uncertain) {
            self.advance();
            true
        } else {
            false
        };

        let name = self.expect_identifier()?;

        let ty = if self.check(&TokenKind::Colon) {
            self.advance();
            Some(self.parse_type_expr()?)
        } else {
            None
        };

        self.expect(TokenKind::Assign)?;
        let value = self.parse_expr()?;

        Ok(LetStmt {
            name,
            uncertain,
            ty,
            value,
            span,
        })
    }

    fn parse_print(&mut self) -> Result<PrintStmt, ParseError> {
        let span = self.current().span;
        self.expect(TokenKind::Print)?;
        let value = self.parse_expr()?;
        Ok(PrintStmt { value, span })
    }

    fn parse_try(&mut self) -> Result<TryStmt, ParseError> {
        let span = self.current().span;
        self.expect(TokenKind::Try)?;
        let body = self.parse_block()?;

        let mut catches = Vec::new();
        while self.check(&TokenKind::Catch) {
            let catch_span = self.current().span;
            self.advance();
            let error_kind = self.expect_identifier()?;
            self.expect(TokenKind::LParen)?;
            let binding = self.expect_identifier()?;
            self.expect(TokenKind::RParen)?;
            let catch_body = self.parse_block()?;
            catches.push(CatchClause {
                error_kind,
                binding,
                body: catch_body,
                span: catch_span,
            });
        }

        if catches.is_empty() {
            return Err(self.error("try requires at least one catch clause"));
        }

        Ok(TryStmt {
            body,
            catches,
            span,
        })
    }

    fn parse_if(&mut self) -> Result<IfStmt, ParseError> {
        let span = self.current().span;
        self.expect(TokenKind::If)?;
        let condition = self.parse_expr()?;
        let then_body = self.parse_block()?;

        let else_body = if self.check(&TokenKind::Else) {
            self.advance();
            if self.check(&TokenKind::If) {
                Some(ElseBranch::ElseIf(Box::new(self.parse_if()?)))
            } else {
                Some(ElseBranch::Else(self.parse_block()?))
            }
        } else {
            None
        };

        Ok(IfStmt {
            condition,
            then_body,
            else_body,
            span,
        })
    }

    fn parse_test_block(&mut self) -> Result<TestBlock, ParseError> {
        let span = self.current().span;
        self.expect(TokenKind::Test)?;
        let name = self.expect_string()?;
        self.expect(TokenKind::LBrace)?;

        let mode = if self.check(&TokenKind::Mode) {
            self.advance();
            self.expect(TokenKind::Colon)?;
            let mode = match &self.current().kind {
                TokenKind::Replay => {
                    self.advance();
                    self.expect(TokenKind::LParen)?;
                    let path = self.expect_string()?;
                    self.expect(TokenKind::RParen)?;
                    TestMode::Replay(path)
                }
                TokenKind::Record => {
                    self.advance();
                    let path = if self.check(&TokenKind::LParen) {
                        self.advance();
                        let p = self.expect_string()?;
                        self.expect(TokenKind::RParen)?;
                        Some(p)
                    } else {
                        None
                    };
                    TestMode::Record(path)
                }
                _ => return Err(self.error("Expected test mode (replay or record)")),
            };
            self.skip_separators();
            Some(mode)
        } else {
            None
        };

        let mut body = Vec::new();
        while !self.check(&TokenKind::RBrace) && !self.is_at_end() {
            body.push(self.parse_statement()?);
            self.skip_separators();
        }
        self.expect(TokenKind::RBrace)?;

        Ok(TestBlock {
            name,
            mode,
            body,
            span,
        })
    }

    fn parse_assert(&mut self) -> Result<Stmt, ParseError> {
        let span = self.current().span;
        self.expect(TokenKind::Assert)?;

        if self.check(&TokenKind::Dot) {
            self.advance();
            let method = self.expect_identifier()?;
            if method != "semantic" {
                return Err(self.error(&format!("unknown assert method: {}", method)));
            }
            self.expect(TokenKind::LParen)?;
            let subject = self.parse_expr()?;
            self.expect(TokenKind::Comma)?;
            let criteria = self.parse_expr()?;
            self.expect(TokenKind::RParen)?;
            return Ok(Stmt::Assert(AssertStmt::Semantic {
                subject,
                criteria,
                span,
            }));
        }

        let expr = self.parse_expr()?;
        Ok(Stmt::Assert(AssertStmt::Expr { expr, span }))
    }

    // ========================================================================
    // TYPE EXPRESSIONS
    // ========================================================================

    pub fn parse_type_expr(&mut self) -> Result<TypeExpr, ParseError> {
        let first = self.parse_postfix_type()?;

        if !self.check(&TokenKind::Pipe) {
            return Ok(first);
        }

        let mut variants = vec![first];
        while self.check(&TokenKind::Pipe) {
            self.advance();
            variants.push(self.parse_postfix_type()?);
        }
        Ok(TypeExpr::Union(variants))
    }

    fn parse_postfix_type(&mut self) -> Result<TypeExpr, ParseError> {
        let mut ty = self.parse_base_type()?;

        loop {
            if self.check(&TokenKind::LBracket) {
                self.advance();
                self.expect(TokenKind::RBracket)?;
                ty = TypeExpr::Array(Box::new(ty));
            } else if self.check(&TokenKind::Question) {
                self.advance();
                ty = TypeExpr::Optional(Box::new(ty));
            } else {
                break;
            }
        }

        Ok(ty)
    }

    fn parse_base_type(&mut self) -> Result<TypeExpr, ParseError> {
        match &self.current().kind {
            TokenKind::StringTy => {
                self.advance();
                Ok(TypeExpr::String)
            }
            TokenKind::IntTy => {
                self.advance();
                Ok(TypeExpr::Int)
            }
            TokenKind::FloatTy => {
                self.advance();
                Ok(TypeExpr::Float)
            }
            TokenKind::BoolTy => {
                self.advance();
                Ok(TypeExpr::Bool)
            }
            TokenKind::Null => {
                self.advance();
                Ok(TypeExpr::Null)
            }
            TokenKind::Confident => {
                self.advance();
                self.expect(TokenKind::Lt)?;
                let inner = self.parse_type_expr()?;
                self.expect(TokenKind::Gt)?;
                Ok(TypeExpr::Confident(Box::new(inner)))
            }
            TokenKind::Identifier(name) => {
                let name = name.clone();
                self.advance();
                Ok(TypeExpr::Named(name))
            }
            TokenKind::LParen => {
                self.advance();
                let inner = self.parse_type_expr()?;
                self.expect(TokenKind::RParen)?;
                Ok(inner)
            }
            _ => Err(self.error("Expected type expression")),
        }
    }

    // ========================================================================
    // EXPRESSIONS
    // ========================================================================

    pub fn parse_expr(&mut self) -> Result<Expr, ParseError> {
        self.parse_pipeline()
    }

    fn parse_pipeline(&mut self) -> Result<Expr, ParseError> {
        let first = self.parse_range()?;

        if !self.check(&TokenKind::PipeForward) {
            return Ok(first);
        }

        let span = first.span();
        let mut stages = vec![first];
        while self.check(&TokenKind::PipeForward) {
            self.advance();
            stages.push(self.parse_range()?);
        }
        Ok(Expr::Pipeline { stages, span })
    }

    fn parse_range(&mut self) -> Result<Expr, ParseError> {
        let start = self.parse_or()?;

        if self.check(&TokenKind::DotDot) {
            self.advance();
            let span = start.span();
            let end = self.parse_or()?;
            return Ok(Expr::Range {
                start: Box::new(start),
                end: Box::new(end),
                span,
            });
        }

        Ok(start)
    }

    fn parse_or(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_and()?;
        while self.check(&TokenKind::OrOr) {
            self.advance();
            let right = self.parse_and()?;
            let span = left.span();
            left = Expr::Binary {
                op: BinaryOp::Or,
                left: Box::new(left),
                right: Box::new(right),
                span,
            };
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_equality()?;
        while self.check(&TokenKind::AndAnd) {
            self.advance();
            let right = self.parse_equality()?;
            let span = left.span();
            left = Expr::Binary {
                op: BinaryOp::And,
                left: Box::new(left),
                right: Box::new(right),
                span,
            };
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_comparison()?;
        loop {
            let op = match &self.current().kind {
                TokenKind::Eq => BinaryOp::Eq,
                TokenKind::Ne => BinaryOp::Ne,
                _ => break,
            };
            self.advance();
            let right = self.parse_comparison()?;
            let span = left.span();
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
                span,
            };
        }
        Ok(left)
    }

    fn parse_comparison(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_term()?;
        loop {
            let op = match &self.current().kind {
                TokenKind::Lt => BinaryOp::Lt,
                TokenKind::Le => BinaryOp::Le,
                TokenKind::Gt => BinaryOp::Gt,
                TokenKind::Ge => BinaryOp::Ge,
                _ => break,
            };
            self.advance();
            let right = self.parse_term()?;
            let span = left.span();
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
                span,
            };
        }
        Ok(left)
    }

    fn parse_term(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_factor()?;
        loop {
            let op = match &self.current().kind {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Sub,
                _ => break,
            };
            self.advance();
            let right = self.parse_factor()?;
            let span = left.span();
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
                span,
            };
        }
        Ok(left)
    }

    fn parse_factor(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match &self.current().kind {
                TokenKind::Star => BinaryOp::Mul,
                TokenKind::Slash => BinaryOp::Div,
                TokenKind::Percent => BinaryOp::Mod,
                _ => break,
            };
            self.advance();
            let right = self.parse_unary()?;
            let span = left.span();
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
                span,
            };
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        let span = self.current().span;
        match &self.current().kind {
            TokenKind::Not => {
                self.advance();
                let operand = self.parse_unary()?;
                Ok(Expr::Unary {
                    op: UnaryOp::Not,
                    operand: Box::new(operand),
                    span,
                })
            }
            TokenKind::Minus => {
                self.advance();
                let operand = self.parse_unary()?;
                Ok(Expr::Unary {
                    op: UnaryOp::Neg,
                    operand: Box::new(operand),
                    span,
                })
            }
            _ => self.parse_postfix(),
        }
    }

    fn parse_postfix(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_primary()?;

        loop {
            if self.check(&TokenKind::Dot) {
                self.advance();
                let span = expr.span();
                let property = self.expect_field_name()?;
                expr = Expr::Member {
                    object: Box::new(expr),
                    property,
                    span,
                };
            } else if self.check(&TokenKind::LParen) {
                self.advance();
                let span = expr.span();
                let mut args = Vec::new();
                while !self.check(&TokenKind::RParen) {
                    args.push(self.parse_expr()?);
                    self.optional_comma();
                }
                self.expect(TokenKind::RParen)?;
                expr = Expr::Call {
                    callee: Box::new(expr),
                    args,
                    span,
                };
            } else {
                break;
            }
        }

        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        let span = self.current().span;
        match &self.current().kind {
            TokenKind::String(s) => {
                let s = s.clone();
                self.advance();
                Ok(Expr::StringLit(s, span))
            }
            TokenKind::Number(n) => {
                let n = *n;
                self.advance();
                Ok(Expr::NumberLit(n, span))
            }
            TokenKind::True => {
                self.advance();
                Ok(Expr::BoolLit(true, span))
            }
            TokenKind::False => {
                self.advance();
                Ok(Expr::BoolLit(false, span))
            }
            TokenKind::Null => {
                self.advance();
                Ok(Expr::NullLit(span))
            }
            TokenKind::Identifier(name) => {
                let name = name.clone();
                self.advance();
                Ok(Expr::Ident(name, span))
            }
            TokenKind::LBracket => {
                self.advance();
                let mut items = Vec::new();
                while !self.check(&TokenKind::RBracket) {
                    items.push(self.parse_expr()?);
                    self.optional_comma();
                }
                self.expect(TokenKind::RBracket)?;
                Ok(Expr::ArrayLit(items, span))
            }
            TokenKind::LBrace => self.parse_object_literal(),
            TokenKind::LParen => {
                self.advance();
                let inner = self.parse_expr()?;
                self.expect(TokenKind::RParen)?;
                Ok(inner)
            }
            TokenKind::Match => self.parse_match().map(Expr::Match),
            TokenKind::Think => self.parse_ai_call(AiCallKind::Think),
            TokenKind::Infer => self.parse_ai_call(AiCallKind::Infer),
            TokenKind::Agent => self.parse_ai_call(AiCallKind::Agent),
            TokenKind::Reason => self.parse_reason(),
            _ => Err(self.error("Expected expression")),
        }
    }

    fn parse_object_literal(&mut self) -> Result<Expr, ParseError> {
        let span = self.current().span;
        self.expect(TokenKind::LBrace)?;

        let mut fields = Vec::new();
        while !self.check(&TokenKind::RBrace) {
            let key = match &self.current().kind {
                TokenKind::String(s) => {
                    let s = s.clone();
                    self.advance();
                    s
                }
                _ => self.expect_field_name()?,
            };
            self.expect(TokenKind::Colon)?;
            let value = self.parse_expr()?;
            fields.push((key, value));
            self.optional_comma();
        }
        self.expect(TokenKind::RBrace)?;

        Ok(Expr::ObjectLit(fields, span))
    }

    // ========================================================================
    // MATCH
    // ========================================================================

    fn parse_match(&mut self) -> Result<MatchExpr, ParseError> {
        let span = self.current().span;
        self.expect(TokenKind::Match)?;
        let subject = self.parse_expr()?;
        self.expect(TokenKind::LBrace)?;

        let mut arms = Vec::new();
        while !self.check(&TokenKind::RBrace) && !self.is_at_end() {
            let arm_span = self.current().span;
            let pattern = self.parse_pattern()?;
            self.expect(TokenKind::FatArrow)?;
            let body = self.parse_expr()?;
            arms.push(MatchArm {
                pattern,
                body,
                span: arm_span,
            });
            self.optional_comma();
        }
        self.expect(TokenKind::RBrace)?;

        Ok(MatchExpr {
            subject: Box::new(subject),
            arms,
            span,
        })
    }

    fn parse_pattern(&mut self) -> Result<Pattern, ParseError> {
        match &self.current().kind {
            TokenKind::Underscore => {
                self.advance();
                Ok(Pattern::Wildcard)
            }
            TokenKind::LBrace => {
                self.advance();
                let mut fields = Vec::new();
                while !self.check(&TokenKind::RBrace) {
                    fields.push(self.parse_field_pattern()?);
                    self.optional_comma();
                }
                self.expect(TokenKind::RBrace)?;
                Ok(Pattern::Object(fields))
            }
            _ => Ok(Pattern::Literal(self.parse_literal_pattern()?)),
        }
    }

    fn parse_field_pattern(&mut self) -> Result<FieldPattern, ParseError> {
        let field = self.expect_field_name()?;

        // Both `{ label == "pos" }` and `{ label: == "pos" }` are accepted;
        // a bare `{ label: "pos" }` compares for equality.
        if self.check(&TokenKind::Colon) {
            self.advance();
        }

        let op = match &self.current().kind {
            TokenKind::Eq => {
                self.advance();
                CompareOp::Eq
            }
            TokenKind::Ne => {
                self.advance();
                CompareOp::Ne
            }
            TokenKind::Ge => {
                self.advance();
                CompareOp::Ge
            }
            TokenKind::Le => {
                self.advance();
                CompareOp::Le
            }
            _ => CompareOp::Eq,
        };

        let value = self.parse_literal_pattern()?;

        Ok(FieldPattern { field, op, value })
    }

    fn parse_literal_pattern(&mut self) -> Result<LiteralPattern, ParseError> {
        let lit = match &self.current().kind {
            TokenKind::String(s) => LiteralPattern::String(s.clone()),
            TokenKind::Number(n) => LiteralPattern::Number(*n),
            TokenKind::True => LiteralPattern::Bool(true),
            TokenKind::False => LiteralPattern::Bool(false),
            TokenKind::Null => LiteralPattern::Null,
            TokenKind::Minus => {
                self.advance();
                match &self.current().kind {
                    TokenKind::Number(n) => {
                        let lit = LiteralPattern::Number(-n);
                        self.advance();
                        return Ok(lit);
                    }
                    _ => return Err(self.error("Expected number after '-' in pattern")),
                }
            }
            _ => return Err(self.error("Expected literal pattern")),
        };
        self.advance();
        Ok(lit)
    }

    // ========================================================================
    // AI CALLS
    // ========================================================================

    fn parse_ai_call(&mut self, kind: AiCallKind) -> Result<Expr, ParseError> {
        let span = self.current().span;
        self.advance(); // think / infer / agent

        self.expect(TokenKind::Lt)?;
        let type_arg = self.parse_type_expr()?;
        self.expect(TokenKind::Gt)?;

        let mut call = AiCallExpr::new(kind, type_arg, span);

        self.expect(TokenKind::LParen)?;
        call.prompt = Some(Box::new(self.parse_expr()?));

        while self.check(&TokenKind::Comma) {
            self.advance();
            if self.check(&TokenKind::RParen) {
                break;
            }
            let arg_name = self.expect_identifier()?;
            self.expect(TokenKind::Colon)?;
            match (kind, arg_name.as_str()) {
                (AiCallKind::Infer, "hint") => {
                    call.hint = Some(Box::new(self.parse_expr()?));
                }
                (AiCallKind::Agent, "tools") => {
                    self.expect(TokenKind::LBracket)?;
                    while !self.check(&TokenKind::RBracket) {
                        call.tools.push(self.expect_identifier()?);
                        self.optional_comma();
                    }
                    self.expect(TokenKind::RBracket)?;
                }
                (AiCallKind::Agent, "max_turns") => {
                    call.max_turns = Some(self.expect_number()? as u32);
                }
                (_, other) => {
                    return Err(self.error(&format!(
                        "unknown argument '{}' for {}",
                        other,
                        kind.as_str()
                    )))
                }
            }
        }
        self.expect(TokenKind::RParen)?;

        self.parse_call_clauses(&mut call)?;

        Ok(Expr::AiCall(call))
    }

    fn parse_reason(&mut self) -> Result<Expr, ParseError> {
        let span = self.current().span;
        self.expect(TokenKind::Reason)?;

        self.expect(TokenKind::Lt)?;
        let type_arg = self.parse_type_expr()?;
        self.expect(TokenKind::Gt)?;

        let mut call = AiCallExpr::new(AiCallKind::Reason, type_arg, span);

        self.expect(TokenKind::LBrace)?;
        self.expect(TokenKind::Goal)?;
        self.expect(TokenKind::Colon)?;
        call.goal = Some(self.expect_string()?);
        self.skip_separators();

        if self.check(&TokenKind::Steps) {
            self.advance();
            self.expect(TokenKind::Colon)?;
        }

        // Numbered steps: `1. "..."` in order.
        while matches!(self.current().kind, TokenKind::Number(_)) {
            self.advance();
            self.expect(TokenKind::Dot)?;
            call.steps.push(self.expect_string()?);
            self.skip_separators();
        }

        if self.check(&TokenKind::With) {
            self.parse_with_context(&mut call)?;
            self.skip_separators();
        }

        self.expect(TokenKind::RBrace)?;

        self.parse_call_clauses(&mut call)?;

        Ok(Expr::AiCall(call))
    }

    /// Trailing clauses shared by every AI-call form.
    fn parse_call_clauses(&mut self, call: &mut AiCallExpr) -> Result<(), ParseError> {
        loop {
            match &self.current().kind {
                TokenKind::With => self.parse_with_context(call)?,
                TokenKind::Without => {
                    self.advance();
                    self.expect(TokenKind::Context)?;
                    self.expect(TokenKind::Colon)?;
                    self.expect(TokenKind::LBracket)?;
                    while !self.check(&TokenKind::RBracket) {
                        call.without_context.push(self.expect_string()?);
                        self.optional_comma();
                    }
                    self.expect(TokenKind::RBracket)?;
                }
                TokenKind::Guard => {
                    self.advance();
                    self.expect(TokenKind::LBrace)?;
                    while !self.check(&TokenKind::RBrace) {
                        call.guards.push(self.parse_guard_rule()?);
                        self.optional_comma();
                    }
                    self.expect(TokenKind::RBrace)?;
                }
                TokenKind::OnFail => {
                    let clause_span = self.current().span;
                    self.advance();
                    self.expect(TokenKind::Colon)?;
                    self.expect(TokenKind::Retry)?;
                    self.expect(TokenKind::LParen)?;
                    let retry_count = self.expect_number()? as u32;
                    self.expect(TokenKind::RParen)?;

                    let fallback = if self.check(&TokenKind::Then) {
                        self.advance();
                        self.expect(TokenKind::Fallback)?;
                        self.expect(TokenKind::LParen)?;
                        let expr = self.parse_expr()?;
                        self.expect(TokenKind::RParen)?;
                        Some(Box::new(expr))
                    } else {
                        None
                    };

                    call.on_fail = Some(OnFailClause {
                        retry_count,
                        fallback,
                        span: clause_span,
                    });
                }
                _ => break,
            }
        }
        Ok(())
    }

    fn parse_with_context(&mut self, call: &mut AiCallExpr) -> Result<(), ParseError> {
        self.expect(TokenKind::With)?;
        self.expect(TokenKind::Context)?;
        self.expect(TokenKind::Colon)?;

        if self.check(&TokenKind::LBrace) {
            self.advance();
            while !self.check(&TokenKind::RBrace) {
                call.with_context.push(self.parse_context_entry()?);
                self.optional_comma();
            }
            self.expect(TokenKind::RBrace)?;
        } else {
            call.with_context.push(self.parse_context_entry()?);
        }

        Ok(())
    }

    fn parse_context_entry(&mut self) -> Result<ContextEntry, ParseError> {
        let mut path = vec![self.expect_identifier()?];
        while self.check(&TokenKind::Dot) {
            self.advance();
            path.push(self.expect_field_name()?);
        }
        Ok(ContextEntry { path })
    }

    fn parse_guard_rule(&mut self) -> Result<GuardClause, ParseError> {
        let span = self.current().span;
        let name = self.expect_identifier()?;
        self.expect(TokenKind::Colon)?;
        let constraint = self.parse_or()?;

        let range_end = if self.check(&TokenKind::DotDot) {
            self.advance();
            Some(self.parse_or()?)
        } else {
            None
        };

        Ok(GuardClause {
            name,
            constraint,
            range_end,
            span,
        })
    }

    // ========================================================================
    // HELPERS
    // ========================================================================

    fn current(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) {
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
    }

    fn check(&self, kind: &TokenKind) -> bool {
        &self.current().kind == kind
    }

    fn is_at_end(&self) -> bool {
        self.current().kind == TokenKind::Eof
    }

    fn expect(&mut self, kind: TokenKind) -> Result<(), ParseError> {
        if self.check(&kind) {
            self.advance();
            Ok(())
        } else {
            Err(self.error(&format!(
                "Expected {:?}, found {:?}",
                kind,
                self.current().kind
            )))
        }
    }

    fn expect_identifier(&mut self) -> Result<String, ParseError> {
        match &self.current().kind {
            TokenKind::Identifier(s) => {
                let s = s.clone();
                self.advance();
                Ok(s)
            }
            _ => Err(self.error("Expected identifier")),
        }
    }

    /// Field positions admit identifiers plus keywords that double as
    /// common field names (`description`, `context`, `mode`, ...).
    fn expect_field_name(&mut self) -> Result<String, ParseError> {
        let name = match &self.current().kind {
            TokenKind::Identifier(s) => s.clone(),
            TokenKind::Description => "description".to_string(),
            TokenKind::Context => "context".to_string(),
            TokenKind::Mode => "mode".to_string(),
            TokenKind::Goal => "goal".to_string(),
            TokenKind::Steps => "steps".to_string(),
            _ => return Err(self.error("Expected field name")),
        };
        self.advance();
        Ok(name)
    }

    fn expect_string(&mut self) -> Result<String, ParseError> {
        match &self.current().kind {
            TokenKind::String(s) => {
                let s = s.clone();
                self.advance();
                Ok(s)
            }
            _ => Err(self.error("Expected string literal")),
        }
    }

    fn expect_number(&mut self) -> Result<f64, ParseError> {
        match &self.current().kind {
            TokenKind::Number(n) => {
                let n = *n;
                self.advance();
                Ok(n)
            }
            _ => Err(self.error("Expected number literal")),
        }
    }

    fn optional_comma(&mut self) {
        if self.check(&TokenKind::Comma) {
            self.advance();
        }
    }

    fn skip_separators(&mut self) {
        while self.check(&TokenKind::Semicolon) {
            self.advance();
        }
    }

    fn error(&self, message: &str) -> ParseError {
        let span = self.current().span;
        ParseError {
            message: message.to_string(),
            line: span.line,
            column: span.column,
        }
    }
}
