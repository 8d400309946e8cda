//! Pretty-printer
//!
//! Renders an AST back to canonical source. Re-parsing the output yields a
//! structurally equal AST (up to spans and comments), which is what the
//! round-trip tests lean on.

use crate::parser::ast::*;

/// Render a whole program.
pub fn print_program(program: &Program) -> String {
    let mut out = String::new();
    for import in &program.imports {
        out.push_str(&format!(
            "import {{ {} }} from \"{}\"\n",
            import.names.join(", "),
            import.path
        ));
    }
    if !program.imports.is_empty() && !program.statements.is_empty() {
        out.push('\n');
    }
    for stmt in &program.statements {
        print_stmt(stmt, 0, &mut out);
    }
    out
}

fn indent(level: usize, out: &mut String) {
    for _ in 0..level {
        out.push_str("    ");
    }
}

fn print_stmt(stmt: &Stmt, level: usize, out: &mut String) {
    indent(level, out);
    match stmt {
        Stmt::TypeDecl(decl) => {
            out.push_str(&format!("type {} {{\n", decl.name));
            for field in &decl.fields {
                indent(level + 1, out);
                out.push_str(&field.name);
                if field.optional {
                    out.push('?');
                }
                out.push_str(": ");
                out.push_str(&print_type(&field.ty));
                print_annotations(&field.annotations, out);
                out.push('\n');
            }
            indent(level, out);
            out.push_str("}\n");
        }
        Stmt::FnDecl(decl) => {
            out.push_str(&format!("fn {}({})", decl.name, print_params(&decl.params)));
            if let Some(ret) = &decl.return_type {
                out.push_str(&format!(" -> {}", print_type(ret)));
            }
            print_body(&decl.body, level, out);
        }
        Stmt::ToolDecl(decl) => {
            out.push_str(&format!(
                "tool {}({})",
                decl.name,
                print_params(&decl.params)
            ));
            if let Some(ret) = &decl.return_type {
                out.push_str(&format!(" -> {}", print_type(ret)));
            }
            out.push_str(" {\n");
            if let Some(description) = &decl.description {
                indent(level + 1, out);
                out.push_str(&format!("description: {}\n", quote(description)));
            }
            for inner in &decl.body {
                print_stmt(inner, level + 1, out);
            }
            indent(level, out);
            out.push_str("}\n");
        }
        Stmt::Let(decl) => {
            out.push_str("let ");
            if decl.uncertain {
                out.push_str("uncertain ");
            }
            out.push_str(&decl.name);
            if let Some(ty) = &decl.ty {
                out.push_str(&format!(": {}", print_type(ty)));
            }
            out.push_str(" = ");
            out.push_str(&print_expr(&decl.value));
            out.push('\n');
        }
        Stmt::Print(stmt) => {
            out.push_str(&format!("print {}\n", print_expr(&stmt.value)));
        }
        Stmt::Expr(stmt) => {
            out.push_str(&print_expr(&stmt.expr));
            out.push('\n');
        }
        Stmt::Try(stmt) => {
            out.push_str("try");
            print_body(&stmt.body, level, out);
            // print_body terminated the line; catches continue on their own.
            for catch in &stmt.catches {
                indent(level, out);
                out.push_str(&format!("catch {}({})", catch.error_kind, catch.binding));
                print_body(&catch.body, level, out);
            }
        }
        Stmt::If(stmt) => print_if(stmt, level, out),
        Stmt::Test(block) => {
            out.push_str(&format!("test {} {{\n", quote(&block.name)));
            match &block.mode {
                Some(TestMode::Replay(path)) => {
                    indent(level + 1, out);
                    out.push_str(&format!("mode: replay({})\n", quote(path)));
                }
                Some(TestMode::Record(Some(path))) => {
                    indent(level + 1, out);
                    out.push_str(&format!("mode: record({})\n", quote(path)));
                }
                Some(TestMode::Record(None)) => {
                    indent(level + 1, out);
                    out.push_str("mode: record\n");
                }
                None => {}
            }
            for inner in &block.body {
                print_stmt(inner, level + 1, out);
            }
            indent(level, out);
            out.push_str("}\n");
        }
        Stmt::Assert(stmt) => match stmt {
            AssertStmt::Expr { expr, .. } => {
                out.push_str(&format!("assert {}\n", print_expr(expr)));
            }
            AssertStmt::Semantic {
                subject, criteria, ..
            } => {
                out.push_str(&format!(
                    "assert.semantic({}, {})\n",
                    print_expr(subject),
                    print_expr(criteria)
                ));
            }
        },
    }
}

fn print_if(stmt: &IfStmt, level: usize, out: &mut String) {
    out.push_str(&format!("if {}", print_expr(&stmt.condition)));
    print_body(&stmt.then_body, level, out);
    match &stmt.else_body {
        Some(ElseBranch::Else(body)) => {
            indent(level, out);
            out.push_str("else");
            print_body(body, level, out);
        }
        Some(ElseBranch::ElseIf(nested)) => {
            indent(level, out);
            out.push_str("else ");
            print_if(nested, level, out);
        }
        None => {}
    }
}

fn print_body(body: &[Stmt], level: usize, out: &mut String) {
    out.push_str(" {\n");
    for inner in body {
        print_stmt(inner, level + 1, out);
    }
    indent(level, out);
    out.push_str("}\n");
}

fn print_params(params: &[Param]) -> String {
    params
        .iter()
        .map(|p| format!("{}: {}", p.name, print_type(&p.ty)))
        .collect::<Vec<_>>()
        .join(", ")
}

fn print_annotations(annotations: &FieldAnnotations, out: &mut String) {
    if let Some(d) = &annotations.description {
        out.push_str(&format!(" description({})", quote(d)));
    }
    if let Some((lo, hi)) = annotations.range {
        out.push_str(&format!(" range({}..{})", number(lo), number(hi)));
    }
    if let Some(n) = annotations.min_length {
        out.push_str(&format!(" minLength({})", n));
    }
    if let Some(n) = annotations.max_length {
        out.push_str(&format!(" maxLength({})", n));
    }
    if let Some(n) = annotations.min_items {
        out.push_str(&format!(" minItems({})", n));
    }
    if let Some(n) = annotations.max_items {
        out.push_str(&format!(" maxItems({})", n));
    }
    if let Some(p) = &annotations.pattern {
        out.push_str(&format!(" pattern({})", quote(p)));
    }
}

/// Render a type expression in parseable form: unions nested under a
/// postfix operator get parentheses.
pub fn print_type(ty: &TypeExpr) -> String {
    fn postfix_operand(ty: &TypeExpr) -> String {
        match ty {
            TypeExpr::Union(_) => format!("({})", print_type(ty)),
            other => print_type(other),
        }
    }

    match ty {
        TypeExpr::String => "string".to_string(),
        TypeExpr::Int => "int".to_string(),
        TypeExpr::Float => "float".to_string(),
        TypeExpr::Bool => "bool".to_string(),
        TypeExpr::Null => "null".to_string(),
        TypeExpr::Named(name) => name.clone(),
        TypeExpr::Array(inner) => format!("{}[]", postfix_operand(inner)),
        TypeExpr::Optional(inner) => format!("{}?", postfix_operand(inner)),
        TypeExpr::Union(variants) => variants
            .iter()
            .map(|v| match v {
                // A union variant that is itself a union keeps its grouping.
                TypeExpr::Union(_) => format!("({})", print_type(v)),
                other => print_type(other),
            })
            .collect::<Vec<_>>()
            .join(" | "),
        TypeExpr::Confident(inner) => format!("Confident<{}>", print_type(inner)),
    }
}

/// Render an expression. Operands that are themselves compound get
/// parentheses, which keeps precedence explicit and the output parseable.
pub fn print_expr(expr: &Expr) -> String {
    match expr {
        Expr::StringLit(s, _) => quote(s),
        Expr::NumberLit(n, _) => number(*n),
        Expr::BoolLit(b, _) => b.to_string(),
        Expr::NullLit(_) => "null".to_string(),
        Expr::ArrayLit(items, _) => format!(
            "[{}]",
            items.iter().map(print_expr).collect::<Vec<_>>().join(", ")
        ),
        Expr::ObjectLit(fields, _) => format!(
            "{{ {} }}",
            fields
                .iter()
                .map(|(k, v)| format!("{}: {}", k, print_expr(v)))
                .collect::<Vec<_>>()
                .join(", ")
        ),
        Expr::Ident(name, _) => name.clone(),
        Expr::Member {
            object, property, ..
        } => format!("{}.{}", operand(object), property),
        Expr::Call { callee, args, .. } => format!(
            "{}({})",
            operand(callee),
            args.iter().map(print_expr).collect::<Vec<_>>().join(", ")
        ),
        Expr::Pipeline { stages, .. } => stages
            .iter()
            .map(|s| operand(s))
            .collect::<Vec<_>>()
            .join(" |> "),
        Expr::Binary {
            op, left, right, ..
        } => format!("{} {} {}", operand(left), binary_op(*op), operand(right)),
        Expr::Unary { op, operand: e, .. } => match op {
            UnaryOp::Not => format!("!{}", operand(e)),
            UnaryOp::Neg => format!("-{}", operand(e)),
        },
        Expr::Range { start, end, .. } => format!("{}..{}", operand(start), operand(end)),
        Expr::Match(m) => print_match(m),
        Expr::AiCall(call) => print_ai_call(call),
    }
}

/// Compound sub-expressions are parenthesized when used as operands.
fn operand(expr: &Expr) -> String {
    match expr {
        Expr::Binary { .. } | Expr::Range { .. } | Expr::Pipeline { .. } | Expr::Unary { .. } => {
            format!("({})", print_expr(expr))
        }
        _ => print_expr(expr),
    }
}

fn binary_op(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Add => "+",
        BinaryOp::Sub => "-",
        BinaryOp::Mul => "*",
        BinaryOp::Div => "/",
        BinaryOp::Mod => "%",
        BinaryOp::Eq => "==",
        BinaryOp::Ne => "!=",
        BinaryOp::Lt => "<",
        BinaryOp::Le => "<=",
        BinaryOp::Gt => ">",
        BinaryOp::Ge => ">=",
        BinaryOp::And => "&&",
        BinaryOp::Or => "||",
    }
}

fn print_match(m: &MatchExpr) -> String {
    let arms = m
        .arms
        .iter()
        .map(|arm| format!("{} => {}", print_pattern(&arm.pattern), print_expr(&arm.body)))
        .collect::<Vec<_>>()
        .join(", ");
    format!("match {} {{ {} }}", operand(&m.subject), arms)
}

fn print_pattern(pattern: &Pattern) -> String {
    match pattern {
        Pattern::Wildcard => "_".to_string(),
        Pattern::Literal(lit) => print_literal_pattern(lit),
        Pattern::Object(fields) => {
            let rendered = fields
                .iter()
                .map(|fp| {
                    let op = match fp.op {
                        CompareOp::Eq => "".to_string(),
                        CompareOp::Ne => "!= ".to_string(),
                        CompareOp::Ge => ">= ".to_string(),
                        CompareOp::Le => "<= ".to_string(),
                    };
                    format!("{}: {}{}", fp.field, op, print_literal_pattern(&fp.value))
                })
                .collect::<Vec<_>>()
                .join(", ");
            format!("{{ {} }}", rendered)
        }
    }
}

fn print_literal_pattern(lit: &LiteralPattern) -> String {
    match lit {
        LiteralPattern::String(s) => quote(s),
        LiteralPattern::Number(n) => number(*n),
        LiteralPattern::Bool(b) => b.to_string(),
        LiteralPattern::Null => "null".to_string(),
    }
}

fn print_ai_call(call: &AiCallExpr) -> String {
    let mut out = String::new();

    if call.kind == AiCallKind::Reason {
        out.push_str(&format!("reason<{}> {{ ", print_type(&call.type_arg)));
        out.push_str(&format!(
            "goal: {}",
            quote(call.goal.as_deref().unwrap_or_default())
        ));
        if !call.steps.is_empty() {
            out.push_str("; steps:");
            for (i, step) in call.steps.iter().enumerate() {
                out.push_str(&format!(" {}. {}", i + 1, quote(step)));
            }
        }
        if !call.with_context.is_empty() {
            out.push_str("; ");
            out.push_str(&print_context_clause(&call.with_context));
        }
        out.push_str(" }");
    } else {
        out.push_str(&format!(
            "{}<{}>(",
            call.kind.as_str(),
            print_type(&call.type_arg)
        ));
        if let Some(prompt) = &call.prompt {
            out.push_str(&print_expr(prompt));
        }
        if let Some(hint) = &call.hint {
            out.push_str(&format!(", hint: {}", print_expr(hint)));
        }
        if !call.tools.is_empty() {
            out.push_str(&format!(", tools: [{}]", call.tools.join(", ")));
        }
        if let Some(turns) = call.max_turns {
            out.push_str(&format!(", max_turns: {}", turns));
        }
        out.push(')');
        if !call.with_context.is_empty() {
            out.push(' ');
            out.push_str(&print_context_clause(&call.with_context));
        }
    }

    if !call.without_context.is_empty() {
        out.push_str(&format!(
            " without context: [{}]",
            call.without_context
                .iter()
                .map(|k| quote(k))
                .collect::<Vec<_>>()
                .join(", ")
        ));
    }

    if !call.guards.is_empty() {
        let rules = call
            .guards
            .iter()
            .map(|g| {
                let mut rule = format!("{}: {}", g.name, print_expr(&g.constraint));
                if let Some(end) = &g.range_end {
                    rule.push_str(&format!("..{}", print_expr(end)));
                }
                rule
            })
            .collect::<Vec<_>>()
            .join(", ");
        out.push_str(&format!(" guard {{ {} }}", rules));
    }

    if let Some(on_fail) = &call.on_fail {
        out.push_str(&format!(" on_fail: retry({})", on_fail.retry_count));
        if let Some(fallback) = &on_fail.fallback {
            out.push_str(&format!(" then fallback({})", print_expr(fallback)));
        }
    }

    out
}

fn print_context_clause(entries: &[ContextEntry]) -> String {
    if entries.len() == 1 {
        format!("with context: {}", entries[0].path.join("."))
    } else {
        format!(
            "with context: {{ {} }}",
            entries
                .iter()
                .map(|e| e.path.join("."))
                .collect::<Vec<_>>()
                .join(", ")
        )
    }
}

fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            other => out.push(other),
        }
    }
    out.push('"');
    out
}

fn number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    fn round_trip(source: &str) {
        let first = parse(source).unwrap();
        let printed = print_program(&first);
        let second = parse(&printed)
            .unwrap_or_else(|e| panic!("reparse failed: {}\n--- printed ---\n{}", e, printed));
        let reprinted = print_program(&second);
        assert_eq!(printed, reprinted, "print → parse → print must be stable");
    }

    #[test]
    fn round_trips_declarations() {
        round_trip(
            r#"
            import { Review } from "./lib"

            type Sentiment {
                label: string description("pos or neg")
                score: float range(0..1)
                tags?: string[] maxItems(5)
            }

            fn clamp(x: float) -> float { x }

            tool search(q: string) -> string {
                description: "Find things"
                q
            }
            "#,
        );
    }

    #[test]
    fn round_trips_ai_calls() {
        round_trip(
            r#"
            type A { x: int }
            let review = "ok"
            let a = think<A>("judge") with context: review guard { length: 1..10 } on_fail: retry(2) then fallback("n")
            let b = infer<A>(review, hint: "tone")
            let c = reason<A> { goal: "plan"; steps: 1. "read" 2. "write" }
            "#,
        );
    }

    #[test]
    fn round_trips_control_flow() {
        round_trip(
            r#"
            let x = { value: 2, label: "hi" }
            let y = match x { { value: >= 1 } => "h", _ => "l" }
            if y == "h" { print "high" } else { print "low" }
            try { print 1 } catch Timeout(e) { print e }
            test "sample" {
                mode: replay("snap.json")
                assert 1 == 1
            }
            "#,
        );
    }

    #[test]
    fn round_trips_expressions() {
        round_trip(
            r#"
            let a = 1 + 2 * 3
            let b = [1, 2, 3]
            let c = a |> step1 |> step2
            let d = !(a == 1) && (b != null)
            "#,
        );
    }
}
