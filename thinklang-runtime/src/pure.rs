//! Pure predicate evaluation for `passes` guards
//!
//! Guard predicates run synchronously inside the call spine, so the
//! functions they name must be pure: no AI calls, no tools. Violations and
//! evaluation errors both count as a failed guard.

use crate::eval::{binary_json, pattern_matches, FunctionDef, RtValue};
use serde_json::{Map, Value};
use std::collections::HashMap;
use thinklang_core::{ThinkError, ThinkResult};
use thinklang_dsl::codegen::{ExecExpr, ExecStmt};
use thinklang_dsl::parser::ast::{BinaryOp, UnaryOp};

/// Invoke a user function as a guard predicate over the call result.
/// Any error (impurity included) reads as "predicate rejected".
pub(crate) fn call_pure_predicate(
    def: &FunctionDef,
    value: &Value,
    env: &HashMap<String, RtValue>,
) -> bool {
    let mut pure = PureEval {
        scopes: vec![env.clone()],
    };

    pure.scopes.push(HashMap::new());
    if let Some(param) = def.params.first() {
        pure.bind(param, RtValue::Json(value.clone()));
    }

    match pure.exec_stmts(&def.body) {
        Ok(result) => result.map(|v| v.truthy()).unwrap_or(false),
        Err(_) => false,
    }
}

struct PureEval {
    scopes: Vec<HashMap<String, RtValue>>,
}

impl PureEval {
    fn bind(&mut self, name: &str, value: RtValue) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), value);
        }
    }

    fn lookup(&self, name: &str) -> Option<RtValue> {
        self.scopes.iter().rev().find_map(|s| s.get(name)).cloned()
    }

    fn impure(&self, what: &str) -> ThinkError {
        ThinkError::Runtime {
            message: format!("guard predicates must be pure: {} is not allowed", what),
        }
    }

    fn exec_stmts(&mut self, stmts: &[ExecStmt]) -> ThinkResult<Option<RtValue>> {
        let mut last = None;
        for stmt in stmts {
            match stmt {
                ExecStmt::Let { name, value, .. } => {
                    let evaluated = self.eval(value)?;
                    self.bind(name, evaluated);
                }
                ExecStmt::Expr(expr) => last = Some(self.eval(expr)?),
                ExecStmt::If {
                    condition,
                    then_body,
                    else_body,
                } => {
                    let take_then = self.eval(condition)?.truthy();
                    self.scopes.push(HashMap::new());
                    let outcome = if take_then {
                        self.exec_stmts(then_body)
                    } else if let Some(body) = else_body {
                        self.exec_stmts(body)
                    } else {
                        Ok(None)
                    };
                    self.scopes.pop();
                    outcome?;
                }
                other => {
                    return Err(self.impure(match other {
                        ExecStmt::Print(_) => "print",
                        ExecStmt::Try { .. } => "try/catch",
                        ExecStmt::Test { .. } => "a test block",
                        ExecStmt::Assert(_) | ExecStmt::AssertSemantic { .. } => "assert",
                        ExecStmt::ToolDecl { .. } => "a tool declaration",
                        _ => "this statement",
                    }))
                }
            }
        }
        Ok(last)
    }

    fn eval(&mut self, expr: &ExecExpr) -> ThinkResult<RtValue> {
        match expr {
            ExecExpr::Literal(value) => Ok(RtValue::Json(value.clone())),
            ExecExpr::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(self.eval(item)?.as_json()?);
                }
                Ok(RtValue::Json(Value::Array(out)))
            }
            ExecExpr::Object(fields) => {
                let mut out = Map::new();
                for (key, value) in fields {
                    out.insert(key.clone(), self.eval(value)?.as_json()?);
                }
                Ok(RtValue::Json(Value::Object(out)))
            }
            ExecExpr::Ident(name) => self.lookup(name).ok_or_else(|| ThinkError::Runtime {
                message: format!("undefined variable '{}'", name),
            }),
            ExecExpr::Member { object, property } => {
                let value = self.eval(object)?.as_json()?;
                match value {
                    Value::Object(map) => Ok(RtValue::Json(
                        map.get(property).cloned().unwrap_or(Value::Null),
                    )),
                    other => Err(ThinkError::Runtime {
                        message: format!("cannot access '{}' on {}", property, other),
                    }),
                }
            }
            ExecExpr::Call { callee, args } => {
                let callee = self.eval(callee)?;
                let mut evaluated = Vec::with_capacity(args.len());
                for arg in args {
                    evaluated.push(self.eval(arg)?);
                }
                match callee {
                    RtValue::Function(def) => {
                        if evaluated.len() != def.params.len() {
                            return Err(ThinkError::Runtime {
                                message: format!(
                                    "'{}' expects {} argument(s), got {}",
                                    def.name,
                                    def.params.len(),
                                    evaluated.len()
                                ),
                            });
                        }
                        self.scopes.push(HashMap::new());
                        for (param, arg) in def.params.iter().zip(evaluated) {
                            self.bind(param, arg);
                        }
                        let outcome = self.exec_stmts(&def.body);
                        self.scopes.pop();
                        Ok(outcome?.unwrap_or(RtValue::Json(Value::Null)))
                    }
                    RtValue::Tool(_) => Err(self.impure("calling a tool")),
                    other => Err(ThinkError::Runtime {
                        message: format!("{} is not callable", other.render()),
                    }),
                }
            }
            ExecExpr::Pipeline(stages) => {
                let mut iter = stages.iter();
                let first = iter.next().ok_or_else(|| ThinkError::Runtime {
                    message: "empty pipeline".to_string(),
                })?;
                let mut value = self.eval(first)?;
                for stage in iter {
                    let callable = self.eval(stage)?;
                    value = match callable {
                        RtValue::Function(def) => {
                            self.scopes.push(HashMap::new());
                            if let Some(param) = def.params.first() {
                                self.bind(param, value);
                            }
                            let outcome = self.exec_stmts(&def.body);
                            self.scopes.pop();
                            outcome?.unwrap_or(RtValue::Json(Value::Null))
                        }
                        _ => return Err(self.impure("a non-function pipeline stage")),
                    };
                }
                Ok(value)
            }
            ExecExpr::Binary { op, left, right } => match op {
                BinaryOp::And => {
                    let l = self.eval(left)?;
                    if !l.truthy() {
                        return Ok(RtValue::Json(Value::Bool(false)));
                    }
                    let r = self.eval(right)?;
                    Ok(RtValue::Json(Value::Bool(r.truthy())))
                }
                BinaryOp::Or => {
                    let l = self.eval(left)?;
                    if l.truthy() {
                        return Ok(RtValue::Json(Value::Bool(true)));
                    }
                    let r = self.eval(right)?;
                    Ok(RtValue::Json(Value::Bool(r.truthy())))
                }
                _ => {
                    let l = self.eval(left)?.as_json()?;
                    let r = self.eval(right)?.as_json()?;
                    Ok(RtValue::Json(binary_json(*op, &l, &r)?))
                }
            },
            ExecExpr::Unary { op, operand } => {
                let value = self.eval(operand)?;
                match op {
                    UnaryOp::Not => Ok(RtValue::Json(Value::Bool(!value.truthy()))),
                    UnaryOp::Neg => {
                        let n = value.as_json()?.as_f64().ok_or_else(|| ThinkError::Runtime {
                            message: "cannot negate a non-number".to_string(),
                        })?;
                        Ok(RtValue::Json(serde_json::json!(-n)))
                    }
                }
            }
            ExecExpr::Range { start, end } => {
                let s = self.eval(start)?.as_json()?;
                let e = self.eval(end)?.as_json()?;
                Ok(RtValue::Json(serde_json::json!([s, e])))
            }
            ExecExpr::Match { subject, arms } => {
                let value = self.eval(subject)?.as_json()?;
                for arm in arms {
                    if pattern_matches(&arm.pattern, &value) {
                        return self.eval(&arm.body);
                    }
                }
                Err(ThinkError::Runtime {
                    message: "no match arm matched the subject".to_string(),
                })
            }
            ExecExpr::AiCall(_) => Err(self.impure("an AI call")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use thinklang_dsl::{checker::collect_types, codegen, parser};

    fn function_from(source: &str, name: &str) -> FunctionDef {
        let program = parser::parse(source).unwrap();
        let types = collect_types(&program);
        let exec = codegen::generate(&program, &types, codegen::CompileMode::Program);
        exec.statements
            .iter()
            .find_map(|s| match s {
                ExecStmt::FnDecl {
                    name: n,
                    params,
                    body,
                    ..
                } if n == name => Some(FunctionDef {
                    name: n.clone(),
                    params: params.clone(),
                    body: body.clone(),
                }),
                _ => None,
            })
            .expect("function not found")
    }

    #[test]
    fn predicate_evaluates_comparison() {
        let def = function_from("fn positive(n: int) -> bool { n > 0 }", "positive");
        let env = HashMap::new();
        assert!(call_pure_predicate(&def, &json!(3), &env));
        assert!(!call_pure_predicate(&def, &json!(-1), &env));
    }

    #[test]
    fn predicate_with_member_access() {
        let def = function_from(
            "fn scored(r: Review) -> bool { r.score >= 0.5 }",
            "scored",
        );
        let env = HashMap::new();
        assert!(call_pure_predicate(&def, &json!({"score": 0.9}), &env));
        assert!(!call_pure_predicate(&def, &json!({"score": 0.1}), &env));
    }

    #[test]
    fn impure_predicate_fails_closed() {
        let def = function_from(
            r#"
            type Out { text: string }
            fn bad(n: int) -> bool { think<Out>("no").value }
            "#,
            "bad",
        );
        let env = HashMap::new();
        assert!(!call_pure_predicate(&def, &json!(1), &env));
    }

    #[test]
    fn predicate_error_fails_closed() {
        let def = function_from("fn broken(n: int) -> bool { missing_var }", "broken");
        let env = HashMap::new();
        assert!(!call_pure_predicate(&def, &json!(1), &env));
    }
}
