//! Abstract Syntax Tree types

pub use crate::lexer::Span;
use serde::{Deserialize, Serialize};

/// The root AST node: an ordered sequence of imports and statements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub imports: Vec<Import>,
    pub statements: Vec<Stmt>,
}

/// `import { A, B } from "./path"`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Import {
    pub names: Vec<String>,
    pub path: String,
    pub span: Span,
}

/// A top-level or block statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Stmt {
    TypeDecl(TypeDecl),
    FnDecl(FnDecl),
    ToolDecl(ToolDecl),
    Let(LetStmt),
    Print(PrintStmt),
    Expr(ExprStmt),
    Try(TryStmt),
    If(IfStmt),
    Test(TestBlock),
    Assert(AssertStmt),
}

impl Stmt {
    pub fn span(&self) -> Span {
        match self {
            Self::TypeDecl(s) => s.span,
            Self::FnDecl(s) => s.span,
            Self::ToolDecl(s) => s.span,
            Self::Let(s) => s.span,
            Self::Print(s) => s.span,
            Self::Expr(s) => s.span,
            Self::Try(s) => s.span,
            Self::If(s) => s.span,
            Self::Test(s) => s.span,
            Self::Assert(s) => s.span(),
        }
    }
}

/// `type Name { field: type annotations... }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeDecl {
    pub name: String,
    pub fields: Vec<FieldDecl>,
    pub span: Span,
}

/// One field of a type declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDecl {
    pub name: String,
    pub optional: bool,
    pub ty: TypeExpr,
    pub annotations: FieldAnnotations,
    pub span: Span,
}

/// Field annotations that flow into emitted JSON Schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct FieldAnnotations {
    pub description: Option<String>,
    pub range: Option<(f64, f64)>,
    pub min_length: Option<u64>,
    pub max_length: Option<u64>,
    pub min_items: Option<u64>,
    pub max_items: Option<u64>,
    pub pattern: Option<String>,
}

impl FieldAnnotations {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// Language type expressions: a closed variant set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TypeExpr {
    String,
    Int,
    Float,
    Bool,
    Null,
    Named(String),
    Array(Box<TypeExpr>),
    Optional(Box<TypeExpr>),
    Union(Vec<TypeExpr>),
    Confident(Box<TypeExpr>),
}

impl TypeExpr {
    pub fn is_confident(&self) -> bool {
        matches!(self, Self::Confident(_))
    }
}

/// `fn name(params) -> T { ... }`. The function's value is the value of
/// the last expression statement in its body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FnDecl {
    pub name: String,
    pub params: Vec<Param>,
    pub return_type: Option<TypeExpr>,
    pub body: Vec<Stmt>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub ty: TypeExpr,
    pub span: Span,
}

/// `tool name(params) -> T { description: "..." ... }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDecl {
    pub name: String,
    pub params: Vec<Param>,
    pub return_type: Option<TypeExpr>,
    pub description: Option<String>,
    pub body: Vec<Stmt>,
    pub span: Span,
}

/// `let [uncertain] name [: T] = expr`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LetStmt {
    pub name: String,
    pub uncertain: bool,
    pub ty: Option<TypeExpr>,
    pub value: Expr,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrintStmt {
    pub value: Expr,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExprStmt {
    pub expr: Expr,
    pub span: Span,
}

/// `try { ... } catch Kind(binding) { ... } ...`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TryStmt {
    pub body: Vec<Stmt>,
    pub catches: Vec<CatchClause>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatchClause {
    pub error_kind: String,
    pub binding: String,
    pub body: Vec<Stmt>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IfStmt {
    pub condition: Expr,
    pub then_body: Vec<Stmt>,
    pub else_body: Option<ElseBranch>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ElseBranch {
    Else(Vec<Stmt>),
    ElseIf(Box<IfStmt>),
}

/// `test "name" { [mode: ...] ... }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestBlock {
    pub name: String,
    pub mode: Option<TestMode>,
    pub body: Vec<Stmt>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TestMode {
    Replay(String),
    Record(Option<String>),
}

/// `assert expr` or `assert.semantic(subject, criteria)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AssertStmt {
    Expr { expr: Expr, span: Span },
    Semantic { subject: Expr, criteria: Expr, span: Span },
}

impl AssertStmt {
    pub fn span(&self) -> Span {
        match self {
            Self::Expr { span, .. } => *span,
            Self::Semantic { span, .. } => *span,
        }
    }
}

/// Expressions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    StringLit(String, Span),
    NumberLit(f64, Span),
    BoolLit(bool, Span),
    NullLit(Span),
    ArrayLit(Vec<Expr>, Span),
    ObjectLit(Vec<(String, Expr)>, Span),
    Ident(String, Span),
    Member {
        object: Box<Expr>,
        property: String,
        span: Span,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
        span: Span,
    },
    Pipeline {
        stages: Vec<Expr>,
        span: Span,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
        span: Span,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
        span: Span,
    },
    Range {
        start: Box<Expr>,
        end: Box<Expr>,
        span: Span,
    },
    Match(MatchExpr),
    AiCall(AiCallExpr),
}

impl Expr {
    pub fn span(&self) -> Span {
        match self {
            Self::StringLit(_, span)
            | Self::NumberLit(_, span)
            | Self::BoolLit(_, span)
            | Self::NullLit(span)
            | Self::ArrayLit(_, span)
            | Self::ObjectLit(_, span)
            | Self::Ident(_, span) => *span,
            Self::Member { span, .. }
            | Self::Call { span, .. }
            | Self::Pipeline { span, .. }
            | Self::Binary { span, .. }
            | Self::Unary { span, .. }
            | Self::Range { span, .. } => *span,
            Self::Match(m) => m.span,
            Self::AiCall(c) => c.span,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Not,
    Neg,
}

/// `match subject { pattern => body, ... }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchExpr {
    pub subject: Box<Expr>,
    pub arms: Vec<MatchArm>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchArm {
    pub pattern: Pattern,
    pub body: Expr,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Pattern {
    Wildcard,
    Literal(LiteralPattern),
    Object(Vec<FieldPattern>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LiteralPattern {
    String(String),
    Number(f64),
    Bool(bool),
    Null,
}

/// A per-field constraint in an object pattern, e.g. `{ score: >= 1 }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldPattern {
    pub field: String,
    pub op: CompareOp,
    pub value: LiteralPattern,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareOp {
    Eq,
    Ne,
    Ge,
    Le,
}

/// Which AI-call form an expression is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AiCallKind {
    Think,
    Infer,
    Reason,
    Agent,
}

impl AiCallKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Think => "think",
            Self::Infer => "infer",
            Self::Reason => "reason",
            Self::Agent => "agent",
        }
    }
}

/// An AI-call expression with its trailing clauses.
///
/// `think`/`agent` carry `prompt`; `infer` carries `prompt` (the analyzed
/// value) and an optional `hint`; `reason` carries `goal` and `steps`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiCallExpr {
    pub kind: AiCallKind,
    pub type_arg: TypeExpr,
    pub prompt: Option<Box<Expr>>,
    pub hint: Option<Box<Expr>>,
    pub goal: Option<String>,
    pub steps: Vec<String>,
    pub with_context: Vec<ContextEntry>,
    pub without_context: Vec<String>,
    pub guards: Vec<GuardClause>,
    pub on_fail: Option<OnFailClause>,
    pub tools: Vec<String>,
    pub max_turns: Option<u32>,
    pub span: Span,
}

impl AiCallExpr {
    pub fn new(kind: AiCallKind, type_arg: TypeExpr, span: Span) -> Self {
        Self {
            kind,
            type_arg,
            prompt: None,
            hint: None,
            goal: None,
            steps: Vec::new(),
            with_context: Vec::new(),
            without_context: Vec::new(),
            guards: Vec::new(),
            on_fail: None,
            tools: Vec::new(),
            max_turns: None,
            span,
        }
    }
}

/// One `with context` entry: an identifier or member path.
/// `review.text` flattens to the context key `review_text`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextEntry {
    pub path: Vec<String>,
}

impl ContextEntry {
    /// The flattened key the runtime sees.
    pub fn key(&self) -> String {
        self.path.join("_")
    }
}

/// `guard { name: constraint[..rangeEnd] }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardClause {
    pub name: String,
    pub constraint: Expr,
    pub range_end: Option<Expr>,
    pub span: Span,
}

/// `on_fail: retry(N) [then fallback(expr)]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OnFailClause {
    pub retry_count: u32,
    pub fallback: Option<Box<Expr>>,
    pub span: Span,
}

/// Parse error with line/column information.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParseError {
    pub message: String,
    pub line: usize,
    pub column: usize,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Parse error at line {}, column {}: {}",
            self.line, self.column, self.message
        )
    }
}

impl std::error::Error for ParseError {}
