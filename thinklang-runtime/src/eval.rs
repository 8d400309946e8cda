//! Program evaluator
//!
//! Executes the lowered host form against a runtime handle. Scoped
//! environments, Confident capability dispatch, lazy match arms, error-kind
//! try/catch dispatch, pipelines, and the AI-call forms all live here.

use crate::pure::call_pure_predicate;
use crate::{
    agent, infer, reason, semantic_assert, think, AgentOptions, AiValue, CallOptions, FallbackFn,
    Runtime,
};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thinklang_core::{Confident, GuardConstraint, GuardRule, JsonSchema, ThinkError, ThinkResult, Tool};
use thinklang_dsl::codegen::{AiCallIr, ExecExpr, ExecProgram, ExecStmt, GuardIr};
use thinklang_dsl::parser::ast::{
    AiCallKind, BinaryOp, CompareOp, LiteralPattern, Pattern, UnaryOp,
};

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A user function captured from the lowered program.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDef {
    pub name: String,
    pub params: Vec<String>,
    pub body: Vec<ExecStmt>,
}

/// A user tool captured from the lowered program.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDef {
    pub name: String,
    pub description: String,
    pub input_schema: JsonSchema,
    pub params: Vec<String>,
    pub body: Vec<ExecStmt>,
}

/// Runtime values: JSON data, Confident wrappers, and callables.
#[derive(Debug, Clone)]
pub enum RtValue {
    Json(Value),
    Confident(Confident<Value>),
    Function(Arc<FunctionDef>),
    Tool(Arc<ToolDef>),
}

impl RtValue {
    /// Project to plain JSON. Confident values serialize structurally;
    /// callables cannot be used as data.
    pub fn as_json(&self) -> ThinkResult<Value> {
        match self {
            Self::Json(value) => Ok(value.clone()),
            Self::Confident(confident) => Ok(json!({
                "value": confident.value,
                "confidence": confident.confidence,
                "reasoning": confident.reasoning,
            })),
            Self::Function(def) => Err(ThinkError::Runtime {
                message: format!("function '{}' cannot be used as a value", def.name),
            }),
            Self::Tool(def) => Err(ThinkError::Runtime {
                message: format!("tool '{}' cannot be used as a value", def.name),
            }),
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Self::Json(value) => json_truthy(value),
            Self::Confident(_) | Self::Function(_) | Self::Tool(_) => true,
        }
    }

    /// Human-facing rendering for `print`.
    pub fn render(&self) -> String {
        match self {
            Self::Json(Value::String(s)) => s.clone(),
            Self::Json(value) => value.to_string(),
            Self::Confident(confident) => format!(
                "{} (confidence {})",
                match &confident.value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                },
                confident.confidence
            ),
            Self::Function(def) => format!("<fn {}>", def.name),
            Self::Tool(def) => format!("<tool {}>", def.name),
        }
    }
}

pub(crate) fn json_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(false, |f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Evaluates lowered programs. One evaluator is one session: in REPL mode
/// the scope stack survives across programs.
pub struct Evaluator {
    runtime: Arc<Runtime>,
    scopes: Vec<HashMap<String, RtValue>>,
    /// Captured `print` output, also echoed to stdout unless quiet.
    pub printed: Vec<String>,
    pub quiet: bool,
}

impl Evaluator {
    pub fn new(runtime: Arc<Runtime>) -> Self {
        Self {
            runtime,
            scopes: vec![HashMap::new()],
            printed: Vec::new(),
            quiet: false,
        }
    }

    /// Used by nested evaluations (tool bodies, fallbacks, predicates)
    /// that start from a captured environment.
    pub fn with_env(runtime: Arc<Runtime>, env: HashMap<String, RtValue>) -> Self {
        Self {
            runtime,
            scopes: vec![env],
            printed: Vec::new(),
            quiet: true,
        }
    }

    /// Execute a program. Test blocks are skipped here; the test framework
    /// drives them explicitly.
    pub async fn run(&mut self, program: &ExecProgram) -> ThinkResult<Option<RtValue>> {
        self.exec_stmts(&program.statements).await
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

    fn bind(&mut self, name: &str, value: RtValue) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), value);
        }
    }

    fn lookup(&self, name: &str) -> Option<RtValue> {
        self.scopes.iter().rev().find_map(|s| s.get(name)).cloned()
    }

    /// Flattened snapshot of every visible binding, for nested evaluators.
    fn snapshot_env(&self) -> HashMap<String, RtValue> {
        let mut env = HashMap::new();
        for scope in &self.scopes {
            for (name, value) in scope {
                env.insert(name.clone(), value.clone());
            }
        }
        env
    }

    // ========================================================================
    // STATEMENTS
    // ========================================================================

    pub fn exec_stmts<'a>(
        &'a mut self,
        stmts: &'a [ExecStmt],
    ) -> BoxFuture<'a, ThinkResult<Option<RtValue>>> {
        Box::pin(async move {
            let mut last = None;
            for stmt in stmts {
                if let Some(value) = self.exec_stmt(stmt).await? {
                    last = Some(value);
                }
            }
            Ok(last)
        })
    }

    fn exec_stmt<'a>(
        &'a mut self,
        stmt: &'a ExecStmt,
    ) -> BoxFuture<'a, ThinkResult<Option<RtValue>>> {
        Box::pin(async move {
            match stmt {
                ExecStmt::Let { name, value, .. } => {
                    let evaluated = self.eval_expr(value).await?;
                    self.bind(name, evaluated);
                    Ok(None)
                }
                ExecStmt::Print(expr) => {
                    let value = self.eval_expr(expr).await?;
                    let line = value.render();
                    if !self.quiet {
                        println!("{}", line);
                    }
                    self.printed.push(line);
                    Ok(None)
                }
                ExecStmt::Expr(expr) => {
                    let value = self.eval_expr(expr).await?;
                    Ok(Some(value))
                }
                ExecStmt::FnDecl {
                    name, params, body, ..
                } => {
                    self.bind(
                        name,
                        RtValue::Function(Arc::new(FunctionDef {
                            name: name.clone(),
                            params: params.clone(),
                            body: body.clone(),
                        })),
                    );
                    Ok(None)
                }
                ExecStmt::ToolDecl {
                    name,
                    description,
                    input_schema,
                    params,
                    body,
                    ..
                } => {
                    self.bind(
                        name,
                        RtValue::Tool(Arc::new(ToolDef {
                            name: name.clone(),
                            description: description.clone(),
                            input_schema: input_schema.clone(),
                            params: params.clone(),
                            body: body.clone(),
                        })),
                    );
                    Ok(None)
                }
                ExecStmt::Try { body, catches } => {
                    self.push_scope();
                    let outcome = self.exec_stmts(body).await;
                    self.pop_scope();

                    match outcome {
                        Ok(_) => Ok(None),
                        Err(error) => {
                            let kind = error.kind();
                            match catches.iter().find(|c| c.kind == kind) {
                                Some(clause) => {
                                    self.push_scope();
                                    self.bind(
                                        &clause.binding,
                                        RtValue::Json(json!({
                                            "kind": kind,
                                            "message": error.to_string(),
                                        })),
                                    );
                                    let handled = self.exec_stmts(&clause.body).await;
                                    self.pop_scope();
                                    handled?;
                                    Ok(None)
                                }
                                None => Err(error),
                            }
                        }
                    }
                }
                ExecStmt::If {
                    condition,
                    then_body,
                    else_body,
                } => {
                    let take_then = self.eval_expr(condition).await?.truthy();
                    self.push_scope();
                    let outcome = if take_then {
                        self.exec_stmts(then_body).await
                    } else if let Some(body) = else_body {
                        self.exec_stmts(body).await
                    } else {
                        Ok(None)
                    };
                    self.pop_scope();
                    outcome?;
                    Ok(None)
                }
                // Test blocks run only under the test framework.
                ExecStmt::Test { .. } => Ok(None),
                ExecStmt::Assert(expr) => {
                    let value = self.eval_expr(expr).await?;
                    if value.truthy() {
                        Ok(None)
                    } else {
                        Err(ThinkError::AssertionFailed {
                            message: "assertion failed".to_string(),
                        })
                    }
                }
                ExecStmt::AssertSemantic { subject, criteria } => {
                    let subject_value = self.eval_expr(subject).await?.as_json()?;
                    let criteria_value = self.eval_expr(criteria).await?.as_json()?;
                    let criteria_text = match criteria_value {
                        Value::String(s) => s,
                        other => other.to_string(),
                    };
                    let (passes, explanation) =
                        semantic_assert(&self.runtime, &subject_value, &criteria_text).await?;
                    if passes {
                        Ok(None)
                    } else {
                        Err(ThinkError::AssertionFailed {
                            message: format!("semantic assertion failed: {}", explanation),
                        })
                    }
                }
            }
        })
    }

    // ========================================================================
    // EXPRESSIONS
    // ========================================================================

    pub fn eval_expr<'a>(&'a mut self, expr: &'a ExecExpr) -> BoxFuture<'a, ThinkResult<RtValue>> {
        Box::pin(async move {
            match expr {
                ExecExpr::Literal(value) => Ok(RtValue::Json(value.clone())),
                ExecExpr::Array(items) => {
                    let mut out = Vec::with_capacity(items.len());
                    for item in items {
                        out.push(self.eval_expr(item).await?.as_json()?);
                    }
                    Ok(RtValue::Json(Value::Array(out)))
                }
                ExecExpr::Object(fields) => {
                    let mut out = Map::new();
                    for (key, value) in fields {
                        out.insert(key.clone(), self.eval_expr(value).await?.as_json()?);
                    }
                    Ok(RtValue::Json(Value::Object(out)))
                }
                ExecExpr::Ident(name) => self.lookup(name).ok_or_else(|| ThinkError::Runtime {
                    message: format!("undefined variable '{}'", name),
                }),
                ExecExpr::Member { object, property } => {
                    let value = self.eval_expr(object).await?;
                    self.member_access(value, property)
                }
                ExecExpr::Call { callee, args } => {
                    // Method-style calls on Confident values dispatch on
                    // the capability set.
                    if let ExecExpr::Member { object, property } = callee.as_ref() {
                        let target = self.eval_expr(object).await?;
                        return match target {
                            RtValue::Confident(confident) => {
                                self.confident_method(confident, property, args).await
                            }
                            other => {
                                // Non-Confident member calls resolve the
                                // member first.
                                let resolved = self.member_access(other, property)?;
                                let mut evaluated = Vec::with_capacity(args.len());
                                for arg in args {
                                    evaluated.push(self.eval_expr(arg).await?);
                                }
                                self.call_value(resolved, evaluated).await
                            }
                        };
                    }

                    let callee_value = self.eval_expr(callee).await?;
                    let mut evaluated = Vec::with_capacity(args.len());
                    for arg in args {
                        evaluated.push(self.eval_expr(arg).await?);
                    }
                    self.call_value(callee_value, evaluated).await
                }
                ExecExpr::Pipeline(stages) => {
                    let mut iter = stages.iter();
                    let first = iter.next().ok_or_else(|| ThinkError::Runtime {
                        message: "empty pipeline".to_string(),
                    })?;
                    let mut value = self.eval_expr(first).await?;
                    for stage in iter {
                        let callable = self.eval_expr(stage).await?;
                        value = self.call_value(callable, vec![value]).await?;
                    }
                    Ok(value)
                }
                ExecExpr::Binary { op, left, right } => {
                    // Logical operators short-circuit.
                    match op {
                        BinaryOp::And => {
                            let l = self.eval_expr(left).await?;
                            if !l.truthy() {
                                return Ok(RtValue::Json(Value::Bool(false)));
                            }
                            let r = self.eval_expr(right).await?;
                            return Ok(RtValue::Json(Value::Bool(r.truthy())));
                        }
                        BinaryOp::Or => {
                            let l = self.eval_expr(left).await?;
                            if l.truthy() {
                                return Ok(RtValue::Json(Value::Bool(true)));
                            }
                            let r = self.eval_expr(right).await?;
                            return Ok(RtValue::Json(Value::Bool(r.truthy())));
                        }
                        _ => {}
                    }
                    let l = self.eval_expr(left).await?.as_json()?;
                    let r = self.eval_expr(right).await?.as_json()?;
                    Ok(RtValue::Json(binary_json(*op, &l, &r)?))
                }
                ExecExpr::Unary { op, operand } => {
                    let value = self.eval_expr(operand).await?;
                    match op {
                        UnaryOp::Not => Ok(RtValue::Json(Value::Bool(!value.truthy()))),
                        UnaryOp::Neg => {
                            let n = value.as_json()?.as_f64().ok_or_else(|| {
                                ThinkError::Runtime {
                                    message: "cannot negate a non-number".to_string(),
                                }
                            })?;
                            Ok(RtValue::Json(json!(-n)))
                        }
                    }
                }
                ExecExpr::Range { start, end } => {
                    let s = self.eval_expr(start).await?.as_json()?;
                    let e = self.eval_expr(end).await?.as_json()?;
                    Ok(RtValue::Json(json!([s, e])))
                }
                ExecExpr::Match { subject, arms } => {
                    let value = self.eval_expr(subject).await?.as_json()?;
                    for arm in arms {
                        if pattern_matches(&arm.pattern, &value) {
                            // Arm bodies evaluate lazily: only the winner runs.
                            return self.eval_expr(&arm.body).await;
                        }
                    }
                    Err(ThinkError::Runtime {
                        message: "no match arm matched the subject".to_string(),
                    })
                }
                ExecExpr::AiCall(ir) => self.eval_ai_call(ir).await,
            }
        })
    }

    fn member_access(&self, value: RtValue, property: &str) -> ThinkResult<RtValue> {
        match value {
            RtValue::Confident(confident) => match property {
                "value" => Ok(RtValue::Json(confident.value)),
                "confidence" => Ok(RtValue::Json(json!(confident.confidence))),
                "reasoning" => Ok(RtValue::Json(Value::String(confident.reasoning))),
                "unwrap" | "expect" | "or" | "map" | "isConfident" => Err(ThinkError::Runtime {
                    message: format!("'{}' is a method and must be called", property),
                }),
                other => Err(ThinkError::Runtime {
                    message: format!("cannot access '{}' on an uncertain value", other),
                }),
            },
            RtValue::Json(Value::Object(map)) => Ok(RtValue::Json(
                map.get(property).cloned().unwrap_or(Value::Null),
            )),
            RtValue::Json(other) => Err(ThinkError::Runtime {
                message: format!(
                    "cannot access '{}' on {}",
                    property,
                    json_type_name(&other)
                ),
            }),
            RtValue::Function(def) => Err(ThinkError::Runtime {
                message: format!("function '{}' has no members", def.name),
            }),
            RtValue::Tool(def) => Err(ThinkError::Runtime {
                message: format!("tool '{}' has no members", def.name),
            }),
        }
    }

    async fn confident_method(
        &mut self,
        confident: Confident<Value>,
        method: &str,
        args: &[ExecExpr],
    ) -> ThinkResult<RtValue> {
        let mut evaluated = Vec::with_capacity(args.len());
        for arg in args {
            evaluated.push(self.eval_expr(arg).await?);
        }

        let number_arg = |index: usize| -> Option<f64> {
            evaluated
                .get(index)
                .and_then(|v| match v {
                    RtValue::Json(value) => value.as_f64(),
                    _ => None,
                })
        };

        match method {
            "unwrap" => {
                let threshold =
                    number_arg(0).unwrap_or(thinklang_core::DEFAULT_CONFIDENCE_THRESHOLD);
                Ok(RtValue::Json(confident.checked(threshold)?))
            }
            "expect" => {
                let threshold = number_arg(0).ok_or_else(|| ThinkError::Runtime {
                    message: "expect requires a confidence threshold".to_string(),
                })?;
                Ok(RtValue::Json(confident.checked(threshold)?))
            }
            "or" => {
                let fallback = evaluated
                    .first()
                    .ok_or_else(|| ThinkError::Runtime {
                        message: "or requires a fallback value".to_string(),
                    })?
                    .as_json()?;
                Ok(RtValue::Json(confident.or_fallback(fallback)))
            }
            "map" => {
                let f = evaluated.first().cloned().ok_or_else(|| ThinkError::Runtime {
                    message: "map requires a function".to_string(),
                })?;
                let mapped = self
                    .call_value(f, vec![RtValue::Json(confident.value.clone())])
                    .await?
                    .as_json()?;
                Ok(RtValue::Confident(Confident {
                    value: mapped,
                    confidence: confident.confidence,
                    reasoning: confident.reasoning,
                }))
            }
            "isConfident" => {
                let threshold = number_arg(0);
                Ok(RtValue::Json(Value::Bool(
                    confident.is_confident(threshold),
                )))
            }
            other => Err(ThinkError::Runtime {
                message: format!("cannot access '{}' on an uncertain value", other),
            }),
        }
    }

    fn call_value<'a>(
        &'a mut self,
        callee: RtValue,
        args: Vec<RtValue>,
    ) -> BoxFuture<'a, ThinkResult<RtValue>> {
        Box::pin(async move {
            match callee {
                RtValue::Function(def) => {
                    if args.len() != def.params.len() {
                        return Err(ThinkError::Runtime {
                            message: format!(
                                "'{}' expects {} argument(s), got {}",
                                def.name,
                                def.params.len(),
                                args.len()
                            ),
                        });
                    }
                    self.push_scope();
                    for (param, arg) in def.params.iter().zip(args) {
                        self.bind(param, arg);
                    }
                    let outcome = self.exec_stmts(&def.body).await;
                    self.pop_scope();
                    Ok(outcome?.unwrap_or(RtValue::Json(Value::Null)))
                }
                RtValue::Tool(def) => {
                    if args.len() != def.params.len() {
                        return Err(ThinkError::Runtime {
                            message: format!(
                                "'{}' expects {} argument(s), got {}",
                                def.name,
                                def.params.len(),
                                args.len()
                            ),
                        });
                    }
                    self.push_scope();
                    for (param, arg) in def.params.iter().zip(args) {
                        self.bind(param, arg);
                    }
                    let outcome = self.exec_stmts(&def.body).await;
                    self.pop_scope();
                    Ok(outcome?.unwrap_or(RtValue::Json(Value::Null)))
                }
                other => Err(ThinkError::Runtime {
                    message: format!("{} is not callable", other.render()),
                }),
            }
        })
    }

    // ========================================================================
    // AI CALLS
    // ========================================================================

    async fn eval_ai_call(&mut self, ir: &AiCallIr) -> ThinkResult<RtValue> {
        let mut context = Map::new();
        for (key, expr) in &ir.context {
            let value = self.eval_expr(expr).await?.as_json()?;
            context.insert(key.clone(), value);
        }

        let mut guards = Vec::with_capacity(ir.guards.len());
        for guard in &ir.guards {
            guards.push(self.build_guard(guard).await?);
        }

        let fallback = ir.fallback.as_ref().map(|expr| self.make_fallback(expr));

        let options = CallOptions {
            json_schema: Some(ir.json_schema.clone()),
            schema_name: ir.schema_name.clone(),
            uncertain: ir.uncertain,
            context,
            without_keys: ir.without_keys.clone(),
            guards,
            retry_count: ir.retry_count,
            fallback,
            model: None,
            max_tokens: None,
        };

        let result = match ir.kind {
            AiCallKind::Think => {
                let prompt = self.eval_prompt(ir).await?;
                think(&self.runtime, &prompt, options).await?
            }
            AiCallKind::Infer => {
                let value = match &ir.prompt {
                    Some(expr) => self.eval_expr(expr).await?.as_json()?,
                    None => Value::Null,
                };
                let hint = match &ir.hint {
                    Some(expr) => Some(match self.eval_expr(expr).await?.as_json()? {
                        Value::String(s) => s,
                        other => other.to_string(),
                    }),
                    None => None,
                };
                infer(&self.runtime, &value, hint.as_deref(), options).await?
            }
            AiCallKind::Reason => {
                let goal = ir.goal.clone().unwrap_or_default();
                reason(&self.runtime, &goal, &ir.steps, options).await?
            }
            AiCallKind::Agent => return self.eval_agent_call(ir, options).await,
        };

        Ok(match result {
            // An uncertain binding stays Confident even when the payload
            // came from a fallback expression.
            AiValue::Plain(value) if ir.uncertain => {
                RtValue::Confident(Confident::new(value, 1.0, "fallback value"))
            }
            AiValue::Plain(value) => RtValue::Json(value),
            AiValue::Confident(confident) => RtValue::Confident(confident),
        })
    }

    async fn eval_prompt(&mut self, ir: &AiCallIr) -> ThinkResult<String> {
        match &ir.prompt {
            Some(expr) => Ok(match self.eval_expr(expr).await?.as_json()? {
                Value::String(s) => s,
                other => other.to_string(),
            }),
            None => Ok(String::new()),
        }
    }

    async fn eval_agent_call(
        &mut self,
        ir: &AiCallIr,
        mut options: CallOptions,
    ) -> ThinkResult<RtValue> {
        // The last-chance schema carries the Confident projection when the
        // binding is uncertain, so the terminal answer can be wrapped.
        if ir.uncertain {
            if let Some(schema) = &options.json_schema {
                if !schema.is_confident_shape() {
                    options.json_schema = Some(JsonSchema::confident(schema.clone()));
                }
            }
        }

        let mut tools = Vec::with_capacity(ir.tools.len());
        for name in &ir.tools {
            match self.lookup(name) {
                Some(RtValue::Tool(def)) => tools.push(self.instantiate_tool(&def)),
                Some(_) => {
                    return Err(ThinkError::Runtime {
                        message: format!("'{}' is not a tool", name),
                    })
                }
                None => {
                    return Err(ThinkError::Runtime {
                        message: format!("undefined tool '{}'", name),
                    })
                }
            }
        }

        let prompt = self.eval_prompt(ir).await?;
        let uncertain = ir.uncertain;

        let result = agent(
            &self.runtime,
            &prompt,
            AgentOptions {
                call: options,
                tools,
                max_turns: ir.max_turns,
                ..Default::default()
            },
        )
        .await?;

        if uncertain {
            match Confident::from_payload(result.data.clone()) {
                Ok(confident) => Ok(RtValue::Confident(confident)),
                // The agent answered before the last-chance turn, with no
                // schema in play.
                Err(_) => Ok(RtValue::Confident(Confident::new(
                    result.data,
                    1.0,
                    "agent answered directly",
                ))),
            }
        } else {
            Ok(RtValue::Json(result.data))
        }
    }

    /// Turn a lowered tool declaration into an executable tool. The body
    /// runs in a fresh evaluator seeded with the captured environment.
    fn instantiate_tool(&self, def: &Arc<ToolDef>) -> Tool {
        let runtime = Arc::clone(&self.runtime);
        let env = self.snapshot_env();
        let def = Arc::clone(def);
        let input_schema = def.input_schema.clone();

        Tool::from_fn(
            def.name.clone(),
            def.description.clone(),
            input_schema,
            move |input: Value| {
                let runtime = Arc::clone(&runtime);
                let env = env.clone();
                let def = Arc::clone(&def);
                async move {
                    let mut evaluator = Evaluator::with_env(runtime, env);
                    evaluator.push_scope();
                    for param in &def.params {
                        let value = input.get(param).cloned().unwrap_or(Value::Null);
                        evaluator.bind(param, RtValue::Json(value));
                    }
                    let outcome = evaluator.exec_stmts(&def.body).await?;
                    outcome
                        .unwrap_or(RtValue::Json(Value::Null))
                        .as_json()
                }
            },
        )
    }

    async fn build_guard(&mut self, guard: &GuardIr) -> ThinkResult<GuardRule> {
        let constraint = self.eval_expr(&guard.constraint).await?;

        let range_end = match &guard.range_end {
            Some(expr) => self.eval_expr(expr).await?.as_json()?.as_f64(),
            None => None,
        };

        let constraint = match constraint {
            RtValue::Json(Value::Number(n)) => {
                GuardConstraint::Number(n.as_f64().unwrap_or_default())
            }
            RtValue::Json(Value::String(s)) => GuardConstraint::Str(s),
            RtValue::Json(Value::Array(items)) => GuardConstraint::StrList(
                items
                    .into_iter()
                    .map(|item| match item {
                        Value::String(s) => s,
                        other => other.to_string(),
                    })
                    .collect(),
            ),
            RtValue::Function(def) => {
                let env = self.snapshot_env();
                let def = Arc::clone(&def);
                GuardConstraint::Predicate(Arc::new(move |value: &Value| {
                    call_pure_predicate(&def, value, &env)
                }))
            }
            other => {
                return Err(ThinkError::Runtime {
                    message: format!(
                        "unsupported guard constraint for '{}': {}",
                        guard.name,
                        other.render()
                    ),
                })
            }
        };

        Ok(GuardRule {
            name: guard.name.clone(),
            constraint,
            range_end,
        })
    }

    fn make_fallback(&self, expr: &ExecExpr) -> FallbackFn {
        let runtime = Arc::clone(&self.runtime);
        let env = self.snapshot_env();
        let expr = expr.clone();

        Arc::new(move || {
            let runtime = Arc::clone(&runtime);
            let env = env.clone();
            let expr = expr.clone();
            Box::pin(async move {
                let mut evaluator = Evaluator::with_env(runtime, env);
                evaluator.eval_expr(&expr).await?.as_json()
            })
        })
    }
}

// ============================================================================
// SHARED SEMANTICS (also used by the pure predicate evaluator)
// ============================================================================

pub(crate) fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

pub(crate) fn binary_json(op: BinaryOp, left: &Value, right: &Value) -> ThinkResult<Value> {
    use BinaryOp::*;

    match op {
        Eq => return Ok(Value::Bool(left == right)),
        Ne => return Ok(Value::Bool(left != right)),
        _ => {}
    }

    // String concatenation with +.
    if op == Add {
        if let (Value::String(l), r) = (left, right) {
            let r = match r {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            return Ok(Value::String(format!("{}{}", l, r)));
        }
        if let (l, Value::String(r)) = (left, right) {
            let l = match l {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            return Ok(Value::String(format!("{}{}", l, r)));
        }
    }

    // Lexicographic string comparison.
    if let (Value::String(l), Value::String(r)) = (left, right) {
        let result = match op {
            Lt => l < r,
            Le => l <= r,
            Gt => l > r,
            Ge => l >= r,
            _ => {
                return Err(ThinkError::Runtime {
                    message: "unsupported operation on strings".to_string(),
                })
            }
        };
        return Ok(Value::Bool(result));
    }

    let l = left.as_f64().ok_or_else(|| ThinkError::Runtime {
        message: format!("expected a number, got {}", json_type_name(left)),
    })?;
    let r = right.as_f64().ok_or_else(|| ThinkError::Runtime {
        message: format!("expected a number, got {}", json_type_name(right)),
    })?;

    let both_ints = left.as_i64().is_some() && right.as_i64().is_some();

    Ok(match op {
        Add | Sub | Mul | Mod => {
            let value = match op {
                Add => l + r,
                Sub => l - r,
                Mul => l * r,
                _ => l % r,
            };
            if both_ints {
                json!(value as i64)
            } else {
                json!(value)
            }
        }
        Div => {
            if r == 0.0 {
                return Err(ThinkError::Runtime {
                    message: "division by zero".to_string(),
                });
            }
            json!(l / r)
        }
        Lt => Value::Bool(l < r),
        Le => Value::Bool(l <= r),
        Gt => Value::Bool(l > r),
        Ge => Value::Bool(l >= r),
        Eq | Ne | And | Or => unreachable!("handled above"),
    })
}

pub(crate) fn pattern_matches(pattern: &Pattern, value: &Value) -> bool {
    match pattern {
        Pattern::Wildcard => true,
        Pattern::Literal(literal) => literal_eq(literal, value),
        Pattern::Object(fields) => match value.as_object() {
            Some(object) => fields.iter().all(|fp| {
                object
                    .get(&fp.field)
                    .map_or(false, |field_value| field_constraint_holds(fp.op, &fp.value, field_value))
            }),
            None => false,
        },
    }
}

fn field_constraint_holds(op: CompareOp, literal: &LiteralPattern, value: &Value) -> bool {
    match op {
        CompareOp::Eq => literal_eq(literal, value),
        CompareOp::Ne => !literal_eq(literal, value),
        CompareOp::Ge | CompareOp::Le => {
            let expected = match literal {
                LiteralPattern::Number(n) => *n,
                _ => return false,
            };
            match value.as_f64() {
                Some(actual) if op == CompareOp::Ge => actual >= expected,
                Some(actual) => actual <= expected,
                None => false,
            }
        }
    }
}

fn literal_eq(literal: &LiteralPattern, value: &Value) -> bool {
    match (literal, value) {
        (LiteralPattern::String(s), Value::String(v)) => s == v,
        (LiteralPattern::Number(n), Value::Number(v)) => v.as_f64().map_or(false, |f| f == *n),
        (LiteralPattern::Bool(b), Value::Bool(v)) => b == v,
        (LiteralPattern::Null, Value::Null) => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use thinklang_core::RuntimeConfig;
    use thinklang_dsl::{checker::collect_types, codegen, parser};
    use thinklang_llm::ScriptedProvider;

    async fn run_source(source: &str, provider: Arc<ScriptedProvider>) -> Evaluator {
        let program = parser::parse(source).unwrap();
        let types = collect_types(&program);
        let exec = codegen::generate(&program, &types, codegen::CompileMode::Program);

        let runtime = Arc::new(Runtime::with_provider(provider, RuntimeConfig::default()));
        let mut evaluator = Evaluator::new(runtime);
        evaluator.quiet = true;
        evaluator.run(&exec).await.unwrap();
        evaluator
    }

    #[tokio::test]
    async fn arithmetic_and_print() {
        let provider = Arc::new(ScriptedProvider::new());
        let evaluator = run_source(
            r#"
            let a = 2 + 3 * 4
            print a
            print "v: " + a
            "#,
            provider,
        )
        .await;
        assert_eq!(evaluator.printed, vec!["14", "v: 14"]);
    }

    #[tokio::test]
    async fn functions_and_pipelines() {
        let provider = Arc::new(ScriptedProvider::new());
        let evaluator = run_source(
            r#"
            fn double(x: int) -> int { x * 2 }
            fn inc(x: int) -> int { x + 1 }
            print 5 |> double |> inc
            "#,
            provider,
        )
        .await;
        assert_eq!(evaluator.printed, vec!["11"]);
    }

    #[tokio::test]
    async fn match_evaluates_lazily() {
        let provider = Arc::new(ScriptedProvider::new());
        let evaluator = run_source(
            r#"
            let x = { value: 2, label: "two" }
            print match x { { value: >= 1 } => "high", _ => "low" }
            print match x { { label: "other" } => "no", _ => "yes" }
            "#,
            provider,
        )
        .await;
        assert_eq!(evaluator.printed, vec!["high", "yes"]);
    }

    #[tokio::test]
    async fn think_binding_is_confident_and_unwraps() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.push_value(json!({
            "value": {"label": "pos", "score": 0.8},
            "confidence": 0.92,
            "reasoning": "clear tone"
        }));

        let evaluator = run_source(
            r#"
            type Sentiment { label: string, score: float }
            let s = think<Sentiment>("classify")
            print s.confidence
            let v = s.unwrap(0.9)
            print v.label
            "#,
            provider,
        )
        .await;
        assert_eq!(evaluator.printed, vec!["0.92", "pos"]);
    }

    #[tokio::test]
    async fn confidence_too_low_is_catchable() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.push_value(json!({
            "value": "weak",
            "confidence": 0.2,
            "reasoning": "guessy"
        }));

        let evaluator = run_source(
            r#"
            type Out { text: string }
            try {
                let s = think<string>("go")
                print s.expect(0.9)
            } catch ConfidenceTooLow(e) {
                print "caught: " + e.kind
            }
            "#,
            provider,
        )
        .await;
        assert_eq!(evaluator.printed, vec!["caught: ConfidenceTooLow"]);
    }

    #[tokio::test]
    async fn fallback_expression_evaluates_in_scope() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.push_error(ThinkError::Timeout { duration_ms: 1 });

        let evaluator = run_source(
            r#"
            let default_label = "neutral"
            let s = think<string>("classify") on_fail: retry(1) then fallback(default_label)
            print s.value
            "#,
            provider,
        )
        .await;
        assert_eq!(evaluator.printed, vec!["neutral"]);
    }

    #[tokio::test]
    async fn guard_predicate_uses_pure_function() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.push_value(json!({
            "value": "no",
            "confidence": 0.9,
            "reasoning": "r"
        }));
        provider.push_value(json!({
            "value": "yes!",
            "confidence": 0.9,
            "reasoning": "r"
        }));

        let evaluator = run_source(
            r#"
            fn long_enough(s: string) -> bool { s != "no" }
            try {
                let a = think<string>("first") guard { passes: long_enough }
                print "unexpected"
            } catch GuardFailed(e) {
                print "guarded"
            }
            "#,
            provider,
        )
        .await;
        assert_eq!(evaluator.printed, vec!["guarded"]);
    }

    #[tokio::test]
    async fn agent_call_runs_dsl_tool() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.push_tool_use(vec![thinklang_core::ToolCall {
            id: "c1".to_string(),
            name: "shout".to_string(),
            input: json!({"text": "hi"}),
        }]);
        provider.push_value(json!({
            "value": {"answer": "HI!"},
            "confidence": 0.9,
            "reasoning": "done"
        }));

        let evaluator = run_source(
            r#"
            type Answer { answer: string }
            tool shout(text: string) -> string {
                description: "Uppercase the text"
                text + "!"
            }
            let a = agent<Answer>("make it loud", tools: [shout], max_turns: 2)
            print a.value
            "#,
            provider,
        )
        .await;
        assert_eq!(evaluator.printed, vec![r#"{"answer":"HI!"}"#]);
    }
}
