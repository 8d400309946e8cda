//! Round-trip property tests
//!
//! Printing an AST and re-parsing the output must be stable: the second
//! print equals the first. Generators build ASTs directly so the property
//! covers shapes a hand-written corpus would miss.

use proptest::prelude::*;
use thinklang_dsl::lexer::Span;
use thinklang_dsl::parser::ast::*;
use thinklang_dsl::parser::parse;
use thinklang_dsl::pretty_printer::print_program;

fn ident() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_]{0,6}".prop_map(|s| format!("v_{}", s))
}

fn type_name() -> impl Strategy<Value = String> {
    "[A-Z][a-zA-Z0-9]{0,6}".prop_map(|s| format!("T{}", s))
}

fn safe_string() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9 .,!?]{0,20}".prop_map(|s| s.to_string())
}

fn type_expr() -> impl Strategy<Value = TypeExpr> {
    let leaf = prop_oneof![
        Just(TypeExpr::String),
        Just(TypeExpr::Int),
        Just(TypeExpr::Float),
        Just(TypeExpr::Bool),
        Just(TypeExpr::Null),
        type_name().prop_map(TypeExpr::Named),
    ];
    leaf.prop_recursive(3, 12, 3, |inner| {
        prop_oneof![
            inner.clone().prop_map(|t| TypeExpr::Array(Box::new(t))),
            inner.clone().prop_map(|t| TypeExpr::Optional(Box::new(t))),
            inner.clone().prop_map(|t| TypeExpr::Confident(Box::new(t))),
            proptest::collection::vec(inner, 2..4).prop_map(TypeExpr::Union),
        ]
    })
}

fn literal_expr() -> impl Strategy<Value = Expr> {
    prop_oneof![
        safe_string().prop_map(|s| Expr::StringLit(s, Span::default())),
        (0i32..10_000).prop_map(|n| Expr::NumberLit(n as f64, Span::default())),
        any::<bool>().prop_map(|b| Expr::BoolLit(b, Span::default())),
        Just(Expr::NullLit(Span::default())),
    ]
}

fn expr() -> impl Strategy<Value = Expr> {
    let leaf = prop_oneof![
        literal_expr(),
        ident().prop_map(|n| Expr::Ident(n, Span::default())),
    ];
    leaf.prop_recursive(3, 16, 4, |inner| {
        let binary_op = prop_oneof![
            Just(BinaryOp::Add),
            Just(BinaryOp::Sub),
            Just(BinaryOp::Mul),
            Just(BinaryOp::Eq),
            Just(BinaryOp::Lt),
            Just(BinaryOp::And),
        ];
        prop_oneof![
            proptest::collection::vec(inner.clone(), 0..4)
                .prop_map(|items| Expr::ArrayLit(items, Span::default())),
            (inner.clone(), binary_op, inner.clone()).prop_map(|(l, op, r)| Expr::Binary {
                op,
                left: Box::new(l),
                right: Box::new(r),
                span: Span::default(),
            }),
            (inner.clone(), ident()).prop_map(|(e, p)| Expr::Member {
                object: Box::new(e),
                property: p,
                span: Span::default(),
            }),
            (
                ident(),
                proptest::collection::vec(inner, 0..3)
            )
                .prop_map(|(name, args)| Expr::Call {
                    callee: Box::new(Expr::Ident(name, Span::default())),
                    args,
                    span: Span::default(),
                }),
        ]
    })
}

fn field_decl() -> impl Strategy<Value = FieldDecl> {
    (ident(), any::<bool>(), type_expr()).prop_map(|(name, optional, ty)| FieldDecl {
        name,
        optional,
        ty,
        annotations: FieldAnnotations::default(),
        span: Span::default(),
    })
}

fn statement() -> impl Strategy<Value = Stmt> {
    prop_oneof![
        (type_name(), proptest::collection::vec(field_decl(), 1..4)).prop_map(|(name, fields)| {
            Stmt::TypeDecl(TypeDecl {
                name,
                fields,
                span: Span::default(),
            })
        }),
        (ident(), any::<bool>(), expr()).prop_map(|(name, uncertain, value)| {
            Stmt::Let(LetStmt {
                name,
                uncertain,
                ty: None,
                value,
                span: Span::default(),
            })
        }),
        expr().prop_map(|value| Stmt::Print(PrintStmt {
            value,
            span: Span::default(),
        })),
        expr().prop_map(|expr| Stmt::Assert(AssertStmt::Expr {
            expr,
            span: Span::default(),
        })),
    ]
}

fn program() -> impl Strategy<Value = Program> {
    proptest::collection::vec(statement(), 1..6).prop_map(|statements| Program {
        imports: Vec::new(),
        statements,
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn print_parse_print_is_stable(program in program()) {
        let printed = print_program(&program);
        let reparsed = parse(&printed)
            .map_err(|e| TestCaseError::fail(format!("{e}\n--- printed ---\n{printed}")))?;
        let reprinted = print_program(&reparsed);
        prop_assert_eq!(printed, reprinted);
    }

    #[test]
    fn generated_type_expressions_reparse(ty in type_expr()) {
        let source = format!("let x: {} = null", thinklang_dsl::pretty_printer::print_type(&ty));
        let program = parse(&source)
            .map_err(|e| TestCaseError::fail(format!("{e}\n--- source ---\n{source}")))?;
        match &program.statements[0] {
            Stmt::Let(decl) => prop_assert_eq!(decl.ty.as_ref(), Some(&ty)),
            other => return Err(TestCaseError::fail(format!("unexpected statement {other:?}"))),
        }
    }
}
