//! Code generator
//!
//! Lowers the AST to an executable host form: a serde-serializable IR whose
//! only runtime dependency is the runtime handle it is evaluated against.
//! Every AI-call becomes an options record carrying its materialised JSON
//! Schema; `with context` member paths flatten to `_`-joined keys; match
//! arms stay lazy; try/catch dispatches on error kind names.

use crate::parser::ast::*;
use crate::schema_compiler::{host_type_string, schema_of, TypeTable};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thinklang_core::JsonSchema;

/// `Repl` omits the implicit program wrapper so top-level bindings persist
/// in the session scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompileMode {
    Program,
    Repl,
}

/// The lowered program: the emitted host form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecProgram {
    pub repl_mode: bool,
    /// Declared type names, retained as metadata for the emitted source.
    pub type_names: Vec<String>,
    pub statements: Vec<ExecStmt>,
}

impl ExecProgram {
    /// Render the host form for `compile -o`.
    pub fn emit_source(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExecStmt {
    Let {
        name: String,
        uncertain: bool,
        value: ExecExpr,
    },
    Print(ExecExpr),
    Expr(ExecExpr),
    FnDecl {
        name: String,
        params: Vec<String>,
        /// Cosmetic host type of the return value.
        ret_type: Option<String>,
        body: Vec<ExecStmt>,
    },
    ToolDecl {
        name: String,
        description: String,
        input_schema: JsonSchema,
        params: Vec<String>,
        ret_type: Option<String>,
        body: Vec<ExecStmt>,
    },
    Try {
        body: Vec<ExecStmt>,
        catches: Vec<CatchIr>,
    },
    If {
        condition: ExecExpr,
        then_body: Vec<ExecStmt>,
        else_body: Option<Vec<ExecStmt>>,
    },
    Test {
        name: String,
        mode: Option<TestMode>,
        body: Vec<ExecStmt>,
    },
    Assert(ExecExpr),
    AssertSemantic {
        subject: ExecExpr,
        criteria: ExecExpr,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatchIr {
    pub kind: String,
    pub binding: String,
    pub body: Vec<ExecStmt>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExecExpr {
    Literal(Value),
    Array(Vec<ExecExpr>),
    Object(Vec<(String, ExecExpr)>),
    Ident(String),
    Member {
        object: Box<ExecExpr>,
        property: String,
    },
    Call {
        callee: Box<ExecExpr>,
        args: Vec<ExecExpr>,
    },
    Pipeline(Vec<ExecExpr>),
    Binary {
        op: BinaryOp,
        left: Box<ExecExpr>,
        right: Box<ExecExpr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<ExecExpr>,
    },
    Range {
        start: Box<ExecExpr>,
        end: Box<ExecExpr>,
    },
    Match {
        subject: Box<ExecExpr>,
        arms: Vec<MatchArmIr>,
    },
    AiCall(Box<AiCallIr>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchArmIr {
    pub pattern: Pattern,
    pub body: ExecExpr,
}

/// The options record an AI-call lowers to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiCallIr {
    pub kind: AiCallKind,
    pub json_schema: JsonSchema,
    pub schema_name: Option<String>,
    /// When set, the runtime wraps the schema in the Confident projection
    /// and the result in a `Confident` value.
    pub uncertain: bool,
    pub prompt: Option<ExecExpr>,
    pub hint: Option<ExecExpr>,
    pub goal: Option<String>,
    pub steps: Vec<String>,
    /// Flattened context entries: `review.text` arrives as `review_text`.
    pub context: Vec<(String, ExecExpr)>,
    pub without_keys: Vec<String>,
    pub guards: Vec<GuardIr>,
    pub retry_count: u32,
    pub fallback: Option<ExecExpr>,
    pub tools: Vec<String>,
    pub max_turns: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardIr {
    pub name: String,
    pub constraint: ExecExpr,
    pub range_end: Option<ExecExpr>,
}

/// Lower a program against its type table.
pub fn generate(program: &Program, types: &TypeTable, mode: CompileMode) -> ExecProgram {
    let gen = Generator { types };

    let mut type_names: Vec<String> = program
        .statements
        .iter()
        .filter_map(|s| match s {
            Stmt::TypeDecl(d) => Some(d.name.clone()),
            _ => None,
        })
        .collect();
    type_names.sort();

    ExecProgram {
        repl_mode: mode == CompileMode::Repl,
        type_names,
        statements: gen.lower_stmts(&program.statements),
    }
}

struct Generator<'a> {
    types: &'a TypeTable,
}

impl<'a> Generator<'a> {
    fn lower_stmts(&self, stmts: &[Stmt]) -> Vec<ExecStmt> {
        stmts.iter().filter_map(|s| self.lower_stmt(s)).collect()
    }

    fn lower_stmt(&self, stmt: &Stmt) -> Option<ExecStmt> {
        match stmt {
            // Type declarations are compile-time only; their schemas are
            // already materialised into each AI-call options record.
            Stmt::TypeDecl(_) => None,
            Stmt::FnDecl(decl) => Some(ExecStmt::FnDecl {
                name: decl.name.clone(),
                params: decl.params.iter().map(|p| p.name.clone()).collect(),
                ret_type: decl.return_type.as_ref().map(host_type_string),
                body: self.lower_stmts(&decl.body),
            }),
            Stmt::ToolDecl(decl) => Some(ExecStmt::ToolDecl {
                name: decl.name.clone(),
                description: decl.description.clone().unwrap_or_default(),
                input_schema: self.tool_input_schema(decl),
                params: decl.params.iter().map(|p| p.name.clone()).collect(),
                ret_type: decl.return_type.as_ref().map(host_type_string),
                body: self.lower_stmts(&decl.body),
            }),
            Stmt::Let(decl) => Some(ExecStmt::Let {
                name: decl.name.clone(),
                uncertain: decl.uncertain,
                value: self.lower_expr(&decl.value),
            }),
            Stmt::Print(stmt) => Some(ExecStmt::Print(self.lower_expr(&stmt.value))),
            Stmt::Expr(stmt) => Some(ExecStmt::Expr(self.lower_expr(&stmt.expr))),
            Stmt::Try(stmt) => Some(ExecStmt::Try {
                body: self.lower_stmts(&stmt.body),
                catches: stmt
                    .catches
                    .iter()
                    .map(|c| CatchIr {
                        kind: c.error_kind.clone(),
                        binding: c.binding.clone(),
                        body: self.lower_stmts(&c.body),
                    })
                    .collect(),
            }),
            Stmt::If(stmt) => Some(self.lower_if(stmt)),
            Stmt::Test(block) => Some(ExecStmt::Test {
                name: block.name.clone(),
                mode: block.mode.clone(),
                body: self.lower_stmts(&block.body),
            }),
            Stmt::Assert(stmt) => Some(match stmt {
                AssertStmt::Expr { expr, .. } => ExecStmt::Assert(self.lower_expr(expr)),
                AssertStmt::Semantic {
                    subject, criteria, ..
                } => ExecStmt::AssertSemantic {
                    subject: self.lower_expr(subject),
                    criteria: self.lower_expr(criteria),
                },
            }),
        }
    }

    fn lower_if(&self, stmt: &IfStmt) -> ExecStmt {
        let else_body = match &stmt.else_body {
            Some(ElseBranch::Else(body)) => Some(self.lower_stmts(body)),
            Some(ElseBranch::ElseIf(nested)) => Some(vec![self.lower_if(nested)]),
            None => None,
        };

        ExecStmt::If {
            condition: self.lower_expr(&stmt.condition),
            then_body: self.lower_stmts(&stmt.then_body),
            else_body,
        }
    }

    fn lower_expr(&self, expr: &Expr) -> ExecExpr {
        match expr {
            Expr::StringLit(s, _) => ExecExpr::Literal(Value::String(s.clone())),
            // Whole numbers stay integers through the JSON value model.
            Expr::NumberLit(n, _) if n.fract() == 0.0 && n.abs() < 9e15 => {
                ExecExpr::Literal(serde_json::json!(*n as i64))
            }
            Expr::NumberLit(n, _) => ExecExpr::Literal(serde_json::json!(*n)),
            Expr::BoolLit(b, _) => ExecExpr::Literal(Value::Bool(*b)),
            Expr::NullLit(_) => ExecExpr::Literal(Value::Null),
            Expr::ArrayLit(items, _) => {
                ExecExpr::Array(items.iter().map(|i| self.lower_expr(i)).collect())
            }
            Expr::ObjectLit(fields, _) => ExecExpr::Object(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), self.lower_expr(v)))
                    .collect(),
            ),
            Expr::Ident(name, _) => ExecExpr::Ident(name.clone()),
            Expr::Member {
                object, property, ..
            } => ExecExpr::Member {
                object: Box::new(self.lower_expr(object)),
                property: property.clone(),
            },
            Expr::Call { callee, args, .. } => ExecExpr::Call {
                callee: Box::new(self.lower_expr(callee)),
                args: args.iter().map(|a| self.lower_expr(a)).collect(),
            },
            Expr::Pipeline { stages, .. } => {
                ExecExpr::Pipeline(stages.iter().map(|s| self.lower_expr(s)).collect())
            }
            Expr::Binary {
                op, left, right, ..
            } => ExecExpr::Binary {
                op: *op,
                left: Box::new(self.lower_expr(left)),
                right: Box::new(self.lower_expr(right)),
            },
            Expr::Unary { op, operand, .. } => ExecExpr::Unary {
                op: *op,
                operand: Box::new(self.lower_expr(operand)),
            },
            Expr::Range { start, end, .. } => ExecExpr::Range {
                start: Box::new(self.lower_expr(start)),
                end: Box::new(self.lower_expr(end)),
            },
            Expr::Match(m) => ExecExpr::Match {
                subject: Box::new(self.lower_expr(&m.subject)),
                arms: m
                    .arms
                    .iter()
                    .map(|arm| MatchArmIr {
                        pattern: arm.pattern.clone(),
                        body: self.lower_expr(&arm.body),
                    })
                    .collect(),
            },
            Expr::AiCall(call) => ExecExpr::AiCall(Box::new(self.lower_ai_call(call))),
        }
    }

    fn lower_ai_call(&self, call: &AiCallExpr) -> AiCallIr {
        let schema_name = match &call.type_arg {
            TypeExpr::Named(name) => Some(name.clone()),
            TypeExpr::Confident(inner) => match inner.as_ref() {
                TypeExpr::Named(name) => Some(name.clone()),
                _ => None,
            },
            _ => None,
        };

        AiCallIr {
            kind: call.kind,
            json_schema: schema_of(&call.type_arg, self.types),
            schema_name,
            uncertain: !call.type_arg.is_confident(),
            prompt: call.prompt.as_ref().map(|p| self.lower_expr(p)),
            hint: call.hint.as_ref().map(|h| self.lower_expr(h)),
            goal: call.goal.clone(),
            steps: call.steps.clone(),
            context: call
                .with_context
                .iter()
                .map(|entry| (entry.key(), self.context_entry_expr(entry)))
                .collect(),
            without_keys: call.without_context.clone(),
            guards: call
                .guards
                .iter()
                .map(|g| GuardIr {
                    name: g.name.clone(),
                    constraint: self.lower_expr(&g.constraint),
                    range_end: g.range_end.as_ref().map(|e| self.lower_expr(e)),
                })
                .collect(),
            retry_count: call.on_fail.as_ref().map(|f| f.retry_count).unwrap_or(0),
            fallback: call
                .on_fail
                .as_ref()
                .and_then(|f| f.fallback.as_ref())
                .map(|e| self.lower_expr(e)),
            tools: call.tools.clone(),
            max_turns: call.max_turns,
        }
    }

    /// Rebuild `a.b.c` as a member chain for the context value expression.
    fn context_entry_expr(&self, entry: &ContextEntry) -> ExecExpr {
        let mut iter = entry.path.iter();
        let mut expr = ExecExpr::Ident(iter.next().cloned().unwrap_or_default());
        for segment in iter {
            expr = ExecExpr::Member {
                object: Box::new(expr),
                property: segment.clone(),
            };
        }
        expr
    }

    fn tool_input_schema(&self, decl: &ToolDecl) -> JsonSchema {
        let mut properties = Vec::new();
        let mut required = Vec::new();
        for param in &decl.params {
            properties.push((param.name.clone(), schema_of(&param.ty, self.types)));
            if !matches!(param.ty, TypeExpr::Optional(_)) {
                required.push(param.name.clone());
            }
        }
        JsonSchema::Object {
            properties,
            required,
            description: decl.description.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checker::collect_types;
    use crate::parser::parse;

    fn lower(source: &str) -> ExecProgram {
        let program = parse(source).unwrap();
        let types = collect_types(&program);
        generate(&program, &types, CompileMode::Program)
    }

    #[test]
    fn ai_call_lowers_to_options_record() {
        let program = lower(
            r#"
            type Sentiment { label: string, score: float }
            let review = "great product"
            let s = think<Sentiment>("classify the review")
                with context: review
                without context: ["internal_id"]
                guard { length: 1..500 }
                on_fail: retry(2) then fallback("neutral")
            "#,
        );

        let call = match &program.statements[1] {
            ExecStmt::Let { value: ExecExpr::AiCall(call), .. } => call,
            other => panic!("unexpected lowering: {other:?}"),
        };

        assert_eq!(call.kind, AiCallKind::Think);
        assert_eq!(call.schema_name.as_deref(), Some("Sentiment"));
        assert!(call.uncertain);
        assert_eq!(call.context.len(), 1);
        assert_eq!(call.context[0].0, "review");
        assert_eq!(call.without_keys, vec!["internal_id"]);
        assert_eq!(call.guards.len(), 1);
        assert_eq!(call.retry_count, 2);
        assert!(call.fallback.is_some());
    }

    #[test]
    fn member_context_entry_flattens_key() {
        let program = lower(
            r#"
            type Reply { text: string }
            let review = { text: "good", stars: 5 }
            let r = think<Reply>("answer") with context: { review.text }
            "#,
        );

        let call = match &program.statements[1] {
            ExecStmt::Let { value: ExecExpr::AiCall(call), .. } => call,
            other => panic!("unexpected lowering: {other:?}"),
        };

        assert_eq!(call.context[0].0, "review_text");
        assert_eq!(
            call.context[0].1,
            ExecExpr::Member {
                object: Box::new(ExecExpr::Ident("review".to_string())),
                property: "text".to_string(),
            }
        );
    }

    #[test]
    fn confident_type_arg_is_not_re_wrapped() {
        let program = lower(
            r#"
            type Reply { text: string }
            let r = think<Confident<Reply>>("answer")
            "#,
        );

        let call = match &program.statements[0] {
            ExecStmt::Let { value: ExecExpr::AiCall(call), .. } => call,
            other => panic!("unexpected lowering: {other:?}"),
        };

        assert!(!call.uncertain);
        assert!(call.json_schema.is_confident_shape());
        assert_eq!(call.schema_name.as_deref(), Some("Reply"));
    }

    #[test]
    fn reason_lowering_carries_goal_and_steps() {
        let program = lower(
            r#"
            type Plan { summary: string }
            let p = reason<Plan> {
                goal: "make a plan"
                steps:
                1. "gather facts"
                2. "draft"
            }
            "#,
        );

        let call = match &program.statements[0] {
            ExecStmt::Let { value: ExecExpr::AiCall(call), .. } => call,
            other => panic!("unexpected lowering: {other:?}"),
        };

        assert_eq!(call.kind, AiCallKind::Reason);
        assert_eq!(call.goal.as_deref(), Some("make a plan"));
        assert_eq!(call.steps, vec!["gather facts", "draft"]);
    }

    #[test]
    fn type_decls_do_not_survive_lowering() {
        let program = lower("type A { x: int }");
        assert!(program.statements.is_empty());
        assert_eq!(program.type_names, vec!["A"]);
    }

    #[test]
    fn tool_decl_builds_input_schema() {
        let program = lower(
            r#"
            tool search(query: string, limit: int?) -> string {
                description: "Search the index"
                query
            }
            "#,
        );

        let (schema, description) = match &program.statements[0] {
            ExecStmt::ToolDecl {
                input_schema,
                description,
                ..
            } => (input_schema, description),
            other => panic!("unexpected lowering: {other:?}"),
        };

        assert_eq!(description, "Search the index");
        let rendered = schema.to_value();
        assert_eq!(rendered["required"], serde_json::json!(["query"]));
        assert_eq!(
            rendered["properties"]["limit"]["anyOf"][1],
            serde_json::json!({"type": "null"})
        );
    }

    #[test]
    fn emitted_source_round_trips_through_serde() {
        let program = lower(
            r#"
            type A { x: int }
            let v = think<A>("go") on_fail: retry(1)
            print v.confidence
            "#,
        );
        let emitted = program.emit_source();
        let parsed: ExecProgram = serde_json::from_str(&emitted).unwrap();
        assert_eq!(parsed, program);
    }
}
