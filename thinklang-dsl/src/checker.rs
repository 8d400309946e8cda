//! Type checker
//!
//! Walks each statement in a fresh scope derived from the enclosing scope
//! and accumulates diagnostics; nothing here throws. Obligations: uncertain
//! propagation, match exhaustiveness, catch-kind validation, AI-call
//! type-argument resolution, name resolution, and call signatures.

use crate::parser::ast::*;
use crate::schema_compiler::TypeTable;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thinklang_core::ThinkError;

/// Members available on an uncertain or `Confident` value. Anything else
/// is an uncertain-member-access error.
pub const UNCERTAIN_CAPABILITIES: &[&str] = &[
    "unwrap",
    "expect",
    "or",
    "map",
    "value",
    "confidence",
    "reasoning",
    "isConfident",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub message: String,
    pub span: Span,
}

/// Accumulated check output; errors never abort the walk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CheckResult {
    pub errors: Vec<Diagnostic>,
    pub warnings: Vec<Diagnostic>,
}

impl CheckResult {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// What a name is bound to.
#[derive(Debug, Clone, PartialEq)]
pub enum BindingKind {
    Variable,
    Function {
        params: Vec<TypeExpr>,
        ret: Option<TypeExpr>,
    },
    Tool {
        params: Vec<TypeExpr>,
        ret: Option<TypeExpr>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Binding {
    pub ty: Option<TypeExpr>,
    pub uncertain: bool,
    pub kind: BindingKind,
    pub span: Span,
}

/// Inference result for one expression.
#[derive(Debug, Clone, PartialEq, Default)]
struct Inferred {
    ty: Option<TypeExpr>,
    uncertain: bool,
}

impl Inferred {
    fn of(ty: TypeExpr) -> Self {
        Self {
            ty: Some(ty),
            uncertain: false,
        }
    }

    fn unknown() -> Self {
        Self::default()
    }
}

/// Check a program against its type table.
pub fn check(program: &Program, types: &TypeTable) -> CheckResult {
    check_with_imports(program, types, &[], &[])
}

/// Check a program with functions and tools merged in from resolved imports.
pub fn check_with_imports(
    program: &Program,
    types: &TypeTable,
    imported_functions: &[FnDecl],
    imported_tools: &[ToolDecl],
) -> CheckResult {
    let mut checker = Checker::new(types);

    for func in imported_functions {
        checker.bind_function(func);
    }
    for tool in imported_tools {
        checker.bind_tool(tool);
    }

    // Hoist top-level declarations so use-before-decl in the same file works.
    for stmt in &program.statements {
        match stmt {
            Stmt::FnDecl(f) => checker.bind_function(f),
            Stmt::ToolDecl(t) => checker.bind_tool(t),
            _ => {}
        }
    }

    for stmt in &program.statements {
        checker.check_stmt(stmt);
    }

    checker.result
}

struct Checker<'a> {
    types: &'a TypeTable,
    scopes: Vec<HashMap<String, Binding>>,
    result: CheckResult,
}

impl<'a> Checker<'a> {
    fn new(types: &'a TypeTable) -> Self {
        Self {
            types,
            scopes: vec![HashMap::new()],
            result: CheckResult::default(),
        }
    }

    // ========================================================================
    // SCOPES
    // ========================================================================

    fn push_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    fn bind(&mut self, name: &str, binding: Binding) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), binding);
        }
    }

    fn lookup(&self, name: &str) -> Option<&Binding> {
        self.scopes.iter().rev().find_map(|s| s.get(name))
    }

    fn bind_function(&mut self, func: &FnDecl) {
        self.bind(
            &func.name,
            Binding {
                ty: func.return_type.clone(),
                uncertain: false,
                kind: BindingKind::Function {
                    params: func.params.iter().map(|p| p.ty.clone()).collect(),
                    ret: func.return_type.clone(),
                },
                span: func.span,
            },
        );
    }

    fn bind_tool(&mut self, tool: &ToolDecl) {
        self.bind(
            &tool.name,
            Binding {
                ty: tool.return_type.clone(),
                uncertain: false,
                kind: BindingKind::Tool {
                    params: tool.params.iter().map(|p| p.ty.clone()).collect(),
                    ret: tool.return_type.clone(),
                },
                span: tool.span,
            },
        );
    }

    fn error(&mut self, message: impl Into<String>, span: Span) {
        self.result.errors.push(Diagnostic {
            message: message.into(),
            span,
        });
    }

    fn warn(&mut self, message: impl Into<String>, span: Span) {
        self.result.warnings.push(Diagnostic {
            message: message.into(),
            span,
        });
    }

    // ========================================================================
    // STATEMENTS
    // ========================================================================

    fn check_stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::TypeDecl(decl) => self.check_type_decl(decl),
            Stmt::FnDecl(decl) => {
                self.bind_function(decl);
                self.push_scope();
                for param in &decl.params {
                    self.check_type_resolves(&param.ty, param.span);
                    self.bind(
                        &param.name,
                        Binding {
                            ty: Some(param.ty.clone()),
                            uncertain: param.ty.is_confident(),
                            kind: BindingKind::Variable,
                            span: param.span,
                        },
                    );
                }
                for stmt in &decl.body {
                    self.check_stmt(stmt);
                }
                self.pop_scope();
            }
            Stmt::ToolDecl(decl) => {
                self.bind_tool(decl);
                self.push_scope();
                for param in &decl.params {
                    self.check_type_resolves(&param.ty, param.span);
                    self.bind(
                        &param.name,
                        Binding {
                            ty: Some(param.ty.clone()),
                            uncertain: false,
                            kind: BindingKind::Variable,
                            span: param.span,
                        },
                    );
                }
                for stmt in &decl.body {
                    self.check_stmt(stmt);
                }
                self.pop_scope();
            }
            Stmt::Let(decl) => self.check_let(decl),
            Stmt::Print(stmt) => {
                self.infer_expr(&stmt.value);
            }
            Stmt::Expr(stmt) => {
                self.infer_expr(&stmt.expr);
            }
            Stmt::Try(stmt) => self.check_try(stmt),
            Stmt::If(stmt) => self.check_if(stmt),
            Stmt::Test(block) => {
                self.push_scope();
                for stmt in &block.body {
                    self.check_stmt(stmt);
                }
                self.pop_scope();
            }
            Stmt::Assert(stmt) => match stmt {
                AssertStmt::Expr { expr, .. } => {
                    self.infer_expr(expr);
                }
                AssertStmt::Semantic {
                    subject, criteria, ..
                } => {
                    self.infer_expr(subject);
                    self.infer_expr(criteria);
                }
            },
        }
    }

    fn check_type_decl(&mut self, decl: &TypeDecl) {
        for field in &decl.fields {
            self.check_type_resolves(&field.ty, field.span);
        }
    }

    fn check_let(&mut self, decl: &LetStmt) {
        let inferred = self.infer_expr(&decl.value);

        if let Some(annotated) = &decl.ty {
            self.check_type_resolves(annotated, decl.span);
            if let Some(actual) = &inferred.ty {
                if !types_compatible(annotated, actual) {
                    self.error(
                        format!(
                            "type mismatch: '{}' is declared as {} but initialised with {}",
                            decl.name,
                            type_display(annotated),
                            type_display(actual)
                        ),
                        decl.span,
                    );
                }
            }
        }

        // An AI-call binding whose type is not already Confident is
        // uncertain whether or not the modifier is written.
        let ai_call = matches!(decl.value, Expr::AiCall(_));
        let effective_ty = decl.ty.clone().or(inferred.ty);
        let confident_ty = effective_ty
            .as_ref()
            .map(|t| t.is_confident())
            .unwrap_or(false);
        let uncertain =
            decl.uncertain || inferred.uncertain || (ai_call && !confident_ty);

        self.bind(
            &decl.name,
            Binding {
                ty: effective_ty,
                uncertain,
                kind: BindingKind::Variable,
                span: decl.span,
            },
        );
    }

    fn check_try(&mut self, stmt: &TryStmt) {
        self.push_scope();
        for inner in &stmt.body {
            self.check_stmt(inner);
        }
        self.pop_scope();

        for catch in &stmt.catches {
            let recognised = ThinkError::CATCHABLE_KINDS.contains(&catch.error_kind.as_str())
                || self.types.contains_key(&catch.error_kind);
            if !recognised {
                self.error(
                    format!(
                        "unknown error kind '{}' in catch clause",
                        catch.error_kind
                    ),
                    catch.span,
                );
            }

            self.push_scope();
            self.bind(
                &catch.binding,
                Binding {
                    ty: None,
                    uncertain: false,
                    kind: BindingKind::Variable,
                    span: catch.span,
                },
            );
            for inner in &catch.body {
                self.check_stmt(inner);
            }
            self.pop_scope();
        }
    }

    fn check_if(&mut self, stmt: &IfStmt) {
        self.infer_expr(&stmt.condition);

        self.push_scope();
        for inner in &stmt.then_body {
            self.check_stmt(inner);
        }
        self.pop_scope();

        match &stmt.else_body {
            Some(ElseBranch::Else(body)) => {
                self.push_scope();
                for inner in body {
                    self.check_stmt(inner);
                }
                self.pop_scope();
            }
            Some(ElseBranch::ElseIf(nested)) => self.check_if(nested),
            None => {}
        }
    }

    // ========================================================================
    // EXPRESSIONS
    // ========================================================================

    fn infer_expr(&mut self, expr: &Expr) -> Inferred {
        match expr {
            Expr::StringLit(..) => Inferred::of(TypeExpr::String),
            Expr::NumberLit(n, _) => {
                if n.fract() == 0.0 {
                    Inferred::of(TypeExpr::Int)
                } else {
                    Inferred::of(TypeExpr::Float)
                }
            }
            Expr::BoolLit(..) => Inferred::of(TypeExpr::Bool),
            Expr::NullLit(_) => Inferred::of(TypeExpr::Null),
            Expr::ArrayLit(items, _) => {
                // Every item is still inferred (for its own diagnostics);
                // the array type survives only when they agree.
                let mut item_ty: Option<TypeExpr> = None;
                let mut mixed = false;
                for item in items {
                    let inferred = self.infer_expr(item);
                    if let Some(t) = inferred.ty {
                        if item_ty.as_ref().map_or(false, |prev| *prev != t) {
                            mixed = true;
                        }
                        item_ty.get_or_insert(t);
                    }
                }
                match item_ty {
                    Some(t) if !mixed => Inferred::of(TypeExpr::Array(Box::new(t))),
                    _ => Inferred::unknown(),
                }
            }
            Expr::ObjectLit(fields, _) => {
                for (_, value) in fields {
                    self.infer_expr(value);
                }
                Inferred::unknown()
            }
            Expr::Ident(name, span) => match self.lookup(name) {
                Some(binding) => Inferred {
                    ty: binding.ty.clone(),
                    uncertain: binding.uncertain,
                },
                None => {
                    self.error(format!("undefined name '{}'", name), *span);
                    Inferred::unknown()
                }
            },
            Expr::Member {
                object,
                property,
                span,
            } => self.infer_member(object, property, *span),
            Expr::Call { callee, args, span } => self.infer_call(callee, args, *span),
            Expr::Pipeline { stages, .. } => {
                let mut last = Inferred::unknown();
                for stage in stages {
                    last = self.infer_expr(stage);
                }
                last
            }
            Expr::Binary {
                op, left, right, ..
            } => {
                let l = self.infer_expr(left);
                let r = self.infer_expr(right);
                match op {
                    BinaryOp::Eq
                    | BinaryOp::Ne
                    | BinaryOp::Lt
                    | BinaryOp::Le
                    | BinaryOp::Gt
                    | BinaryOp::Ge
                    | BinaryOp::And
                    | BinaryOp::Or => Inferred::of(TypeExpr::Bool),
                    BinaryOp::Add
                        if l.ty == Some(TypeExpr::String) || r.ty == Some(TypeExpr::String) =>
                    {
                        Inferred::of(TypeExpr::String)
                    }
                    _ => {
                        if l.ty == Some(TypeExpr::Float) || r.ty == Some(TypeExpr::Float) {
                            Inferred::of(TypeExpr::Float)
                        } else if l.ty == Some(TypeExpr::Int) && r.ty == Some(TypeExpr::Int) {
                            Inferred::of(TypeExpr::Int)
                        } else {
                            Inferred::unknown()
                        }
                    }
                }
            }
            Expr::Unary { op, operand, .. } => {
                let inner = self.infer_expr(operand);
                match op {
                    UnaryOp::Not => Inferred::of(TypeExpr::Bool),
                    UnaryOp::Neg => inner,
                }
            }
            Expr::Range { start, end, .. } => {
                self.infer_expr(start);
                self.infer_expr(end);
                Inferred::unknown()
            }
            Expr::Match(m) => self.infer_match(m),
            Expr::AiCall(call) => self.infer_ai_call(call),
        }
    }

    fn infer_member(&mut self, object: &Expr, property: &str, span: Span) -> Inferred {
        let obj = self.infer_expr(object);

        let confident_inner = match &obj.ty {
            Some(TypeExpr::Confident(inner)) => Some((**inner).clone()),
            _ => None,
        };

        if obj.uncertain || confident_inner.is_some() {
            if !UNCERTAIN_CAPABILITIES.contains(&property) {
                self.error(
                    format!(
                        "cannot access '{}' on an uncertain value; available members: {}",
                        property,
                        UNCERTAIN_CAPABILITIES.join(", ")
                    ),
                    span,
                );
                return Inferred::unknown();
            }

            let inner = confident_inner.or(obj.ty.and_then(|t| match t {
                TypeExpr::Confident(inner) => Some(*inner),
                other => Some(other),
            }));

            return match property {
                "unwrap" | "expect" | "or" | "map" | "value" => Inferred {
                    ty: inner,
                    uncertain: false,
                },
                "confidence" => Inferred::of(TypeExpr::Float),
                "reasoning" => Inferred::of(TypeExpr::String),
                "isConfident" => Inferred::of(TypeExpr::Bool),
                _ => Inferred::unknown(),
            };
        }

        // Field access on a known struct type.
        if let Some(TypeExpr::Named(name)) = &obj.ty {
            if let Some(decl) = self.types.get(name) {
                return match decl.fields.iter().find(|f| f.name == property) {
                    Some(field) => Inferred {
                        ty: Some(field.ty.clone()),
                        uncertain: false,
                    },
                    None => {
                        self.error(
                            format!("type '{}' has no field '{}'", name, property),
                            span,
                        );
                        Inferred::unknown()
                    }
                };
            }
        }

        Inferred::unknown()
    }

    fn infer_call(&mut self, callee: &Expr, args: &[Expr], span: Span) -> Inferred {
        // Direct function or tool calls check arity and argument types.
        if let Expr::Ident(name, _) = callee {
            if let Some(binding) = self.lookup(name).cloned() {
                if let BindingKind::Function { params, ret } | BindingKind::Tool { params, ret } =
                    binding.kind
                {
                    if args.len() != params.len() {
                        self.error(
                            format!(
                                "'{}' expects {} argument(s), got {}",
                                name,
                                params.len(),
                                args.len()
                            ),
                            span,
                        );
                    }
                    for (arg, expected) in args.iter().zip(params.iter()) {
                        let inferred = self.infer_expr(arg);
                        if let Some(actual) = &inferred.ty {
                            if !types_compatible(expected, actual) {
                                self.error(
                                    format!(
                                        "argument to '{}' has type {} but {} was expected",
                                        name,
                                        type_display(actual),
                                        type_display(expected)
                                    ),
                                    arg.span(),
                                );
                            }
                        }
                    }
                    return Inferred {
                        ty: ret,
                        uncertain: false,
                    };
                }
            }
        }

        // Method-style calls (`x.unwrap(0.9)`) type through the member.
        let callee_inferred = self.infer_expr(callee);
        for arg in args {
            self.infer_expr(arg);
        }
        callee_inferred
    }

    fn infer_match(&mut self, m: &MatchExpr) -> Inferred {
        let subject = self.infer_expr(&m.subject);

        let subject_decl = match &subject.ty {
            Some(TypeExpr::Named(name)) => self.types.get(name),
            _ => None,
        };

        let mut has_wildcard = false;
        let mut bool_literals = (false, false);

        for arm in &m.arms {
            match &arm.pattern {
                Pattern::Wildcard => has_wildcard = true,
                Pattern::Literal(LiteralPattern::Bool(b)) => {
                    if *b {
                        bool_literals.0 = true;
                    } else {
                        bool_literals.1 = true;
                    }
                }
                Pattern::Object(fields) => {
                    if let Some(decl) = subject_decl {
                        for fp in fields {
                            self.check_field_pattern(decl, fp, arm.span);
                        }
                    }
                }
                Pattern::Literal(_) => {}
            }
            self.infer_expr(&arm.body);
        }

        // A bool subject covered by literal true and false is the one
        // statically provable partition besides a wildcard.
        let proven_cover = subject.ty == Some(TypeExpr::Bool) && bool_literals.0 && bool_literals.1;

        if !has_wildcard && !proven_cover {
            self.warn(
                "non-exhaustive match: no wildcard arm and coverage cannot be proven",
                m.span,
            );
        }

        Inferred::unknown()
    }

    fn check_field_pattern(&mut self, decl: &TypeDecl, fp: &FieldPattern, span: Span) {
        let field = match decl.fields.iter().find(|f| f.name == fp.field) {
            Some(f) => f,
            None => {
                self.error(
                    format!("type '{}' has no field '{}'", decl.name, fp.field),
                    span,
                );
                return;
            }
        };

        let field_is_numeric = matches!(field.ty, TypeExpr::Int | TypeExpr::Float);
        let field_is_string = matches!(field.ty, TypeExpr::String);
        let field_is_bool = matches!(field.ty, TypeExpr::Bool);

        let agrees = match &fp.value {
            LiteralPattern::Number(_) => field_is_numeric,
            LiteralPattern::String(_) => field_is_string,
            LiteralPattern::Bool(_) => field_is_bool,
            LiteralPattern::Null => true,
        };

        if !agrees {
            self.error(
                format!(
                    "pattern constraint on '{}' does not agree with its declared type {}",
                    fp.field,
                    type_display(&field.ty)
                ),
                span,
            );
            return;
        }

        if matches!(fp.op, CompareOp::Ge | CompareOp::Le) && !field_is_numeric {
            self.error(
                format!(
                    "ordering constraint on non-numeric field '{}'",
                    fp.field
                ),
                span,
            );
        }
    }

    fn infer_ai_call(&mut self, call: &AiCallExpr) -> Inferred {
        self.check_type_resolves(&call.type_arg, call.span);

        if let Some(prompt) = &call.prompt {
            self.infer_expr(prompt);
        }
        if let Some(hint) = &call.hint {
            self.infer_expr(hint);
        }

        for entry in &call.with_context {
            if let Some(first) = entry.path.first() {
                if self.lookup(first).is_none() {
                    self.error(format!("undefined name '{}'", first), call.span);
                }
            }
        }

        for guard in &call.guards {
            self.infer_expr(&guard.constraint);
            if let Some(end) = &guard.range_end {
                self.infer_expr(end);
            }
            let known = matches!(guard.name.as_str(), "length" | "contains_none" | "passes");
            if !known && guard.range_end.is_none() {
                self.warn(
                    format!(
                        "guard '{}' has no range end and is not a built-in rule",
                        guard.name
                    ),
                    guard.span,
                );
            }
        }

        if let Some(on_fail) = &call.on_fail {
            if let Some(fallback) = &on_fail.fallback {
                self.infer_expr(fallback);
            }
        }

        for tool in &call.tools {
            let found = self
                .lookup(tool)
                .map(|binding| matches!(binding.kind, BindingKind::Tool { .. }));
            match found {
                Some(true) => {}
                Some(false) => {
                    self.error(format!("'{}' is not a tool", tool), call.span);
                }
                None => {
                    self.error(format!("undefined tool '{}'", tool), call.span);
                }
            }
        }

        Inferred {
            ty: Some(call.type_arg.clone()),
            uncertain: !call.type_arg.is_confident(),
        }
    }

    /// Every named type reachable from `ty` must resolve in the type table.
    fn check_type_resolves(&mut self, ty: &TypeExpr, span: Span) {
        match ty {
            TypeExpr::Named(name) => {
                if !self.types.contains_key(name) {
                    self.error(format!("unknown type '{}'", name), span);
                }
            }
            TypeExpr::Array(inner)
            | TypeExpr::Optional(inner)
            | TypeExpr::Confident(inner) => self.check_type_resolves(inner, span),
            TypeExpr::Union(variants) => {
                for variant in variants {
                    self.check_type_resolves(variant, span);
                }
            }
            _ => {}
        }
    }
}

/// Loose structural compatibility: unknowns and unions stay permissive.
fn types_compatible(expected: &TypeExpr, actual: &TypeExpr) -> bool {
    match (expected, actual) {
        (a, b) if a == b => true,
        (TypeExpr::Float, TypeExpr::Int) => true,
        (TypeExpr::Optional(inner), TypeExpr::Null) => {
            let _ = inner;
            true
        }
        (TypeExpr::Optional(inner), other) => types_compatible(inner, other),
        (TypeExpr::Union(variants), other) => {
            variants.iter().any(|v| types_compatible(v, other))
        }
        (TypeExpr::Array(a), TypeExpr::Array(b)) => types_compatible(a, b),
        (TypeExpr::Confident(a), TypeExpr::Confident(b)) => types_compatible(a, b),
        _ => false,
    }
}

/// Render a type expression for diagnostics.
pub fn type_display(ty: &TypeExpr) -> String {
    match ty {
        TypeExpr::String => "string".to_string(),
        TypeExpr::Int => "int".to_string(),
        TypeExpr::Float => "float".to_string(),
        TypeExpr::Bool => "bool".to_string(),
        TypeExpr::Null => "null".to_string(),
        TypeExpr::Named(name) => name.clone(),
        TypeExpr::Array(inner) => format!("{}[]", type_display(inner)),
        TypeExpr::Optional(inner) => format!("{}?", type_display(inner)),
        TypeExpr::Union(variants) => variants
            .iter()
            .map(type_display)
            .collect::<Vec<_>>()
            .join(" | "),
        TypeExpr::Confident(inner) => format!("Confident<{}>", type_display(inner)),
    }
}

/// Collect the program's type declarations into a type table.
pub fn collect_types(program: &Program) -> TypeTable {
    let mut table = TypeTable::new();
    for stmt in &program.statements {
        if let Stmt::TypeDecl(decl) = stmt {
            table.insert(decl.name.clone(), decl.clone());
        }
    }
    table
}
