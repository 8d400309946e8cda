//! ThinkLang DSL - Compiler Front End
//!
//! Lexer, parser, type checker, schema compiler, module resolver, code
//! generator, and pretty-printer for the ThinkLang language.
//!
//! Architecture:
//! ```text
//! Source (.tl file)
//!     ↓
//! Lexer (tokenize)
//!     ↓
//! Parser (build AST)  ←  Module Resolver (imports)
//!     ↓
//! Type Checker (diagnostics)  ←  Schema Compiler (type → JSON Schema)
//!     ↓
//! Code Generator (executable host form)
//! ```

pub mod checker;
pub mod codegen;
pub mod lexer;
pub mod parser;
pub mod pretty_printer;
pub mod resolver;
pub mod schema_compiler;
pub mod symbols;

pub use checker::{check, check_with_imports, collect_types, CheckResult, Diagnostic};
pub use codegen::{generate, CompileMode, ExecProgram};
pub use parser::{parse, ParseError, Program};
pub use resolver::{
    resolve_imports, FsModuleLoader, InMemoryLoader, ModuleLoader, ResolveError, ResolvedModules,
};
pub use schema_compiler::{host_type_string, schema_of, TypeTable};
pub use symbols::{build_symbol_index, SymbolIndex, SymbolInfo, SymbolKind};

use std::path::Path;

/// A fully front-ended program: AST, merged type table, diagnostics, and
/// the lowered executable form.
#[derive(Debug, Clone)]
pub struct Compiled {
    pub program: Program,
    pub types: TypeTable,
    pub check: CheckResult,
    pub exec: ExecProgram,
    pub imported: ResolvedModules,
}

/// Run the whole front end over one source file.
pub fn compile_source(
    source: &str,
    path: &Path,
    loader: &dyn ModuleLoader,
    mode: CompileMode,
) -> Result<Compiled, ResolveError> {
    let program = parse(source)?;
    let imported = resolve_imports(path, &program, loader)?;

    let mut types = collect_types(&program);
    for (name, decl) in &imported.types {
        types.entry(name.clone()).or_insert_with(|| decl.clone());
    }

    let check = check_with_imports(&program, &types, &imported.functions, &imported.tools);

    // Imported functions and tools are prepended so the emitted program is
    // self-contained.
    let mut merged = program.clone();
    let mut prelude: Vec<parser::Stmt> = imported
        .functions
        .iter()
        .cloned()
        .map(parser::Stmt::FnDecl)
        .chain(imported.tools.iter().cloned().map(parser::Stmt::ToolDecl))
        .collect();
    prelude.extend(merged.statements);
    merged.statements = prelude;

    let exec = generate(&merged, &types, mode);

    Ok(Compiled {
        program,
        types,
        check,
        exec,
        imported,
    })
}
