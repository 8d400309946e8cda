//! Flat symbol index over top-level declarations

use crate::parser::ast::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolKind {
    Type,
    Function,
    Variable,
    Tool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolInfo {
    pub kind: SymbolKind,
    pub span: Span,
}

/// Top-level name → kind, used by go-to-definition and document symbols.
pub type SymbolIndex = BTreeMap<String, SymbolInfo>;

/// Build the index from a program's top-level statements.
pub fn build_symbol_index(program: &Program) -> SymbolIndex {
    let mut index = SymbolIndex::new();
    for stmt in &program.statements {
        match stmt {
            Stmt::TypeDecl(decl) => {
                index.insert(
                    decl.name.clone(),
                    SymbolInfo {
                        kind: SymbolKind::Type,
                        span: decl.span,
                    },
                );
            }
            Stmt::FnDecl(decl) => {
                index.insert(
                    decl.name.clone(),
                    SymbolInfo {
                        kind: SymbolKind::Function,
                        span: decl.span,
                    },
                );
            }
            Stmt::ToolDecl(decl) => {
                index.insert(
                    decl.name.clone(),
                    SymbolInfo {
                        kind: SymbolKind::Tool,
                        span: decl.span,
                    },
                );
            }
            Stmt::Let(decl) => {
                index.insert(
                    decl.name.clone(),
                    SymbolInfo {
                        kind: SymbolKind::Variable,
                        span: decl.span,
                    },
                );
            }
            _ => {}
        }
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    #[test]
    fn indexes_top_level_names() {
        let program = parse(
            r#"
            type A { x: int }
            fn f(a: int) -> int { a }
            tool t(q: string) -> string { q }
            let v = 1
            "#,
        )
        .unwrap();
        let index = build_symbol_index(&program);

        assert_eq!(index["A"].kind, SymbolKind::Type);
        assert_eq!(index["f"].kind, SymbolKind::Function);
        assert_eq!(index["t"].kind, SymbolKind::Tool);
        assert_eq!(index["v"].kind, SymbolKind::Variable);
    }
}
