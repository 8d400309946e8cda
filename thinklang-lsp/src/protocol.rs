//! LSP payload types
//!
//! The serde shapes published to the wire transport. Only the subset the
//! adapter produces: diagnostics, hover, completion, definition, document
//! symbols, signature help. Positions are 0-based per LSP.

use serde::{Deserialize, Serialize};
use thinklang_dsl::lexer::Span;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    pub character: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LspRange {
    pub start: Position,
    pub end: Position,
}

impl LspRange {
    pub fn point(line: u32, character: u32) -> Self {
        let position = Position { line, character };
        Self {
            start: position,
            end: position,
        }
    }

    /// AST spans are 1-based; the wire is 0-based.
    pub fn from_span(span: Span) -> Self {
        let line = span.line.saturating_sub(1) as u32;
        let character = span.column.saturating_sub(1) as u32;
        Self {
            start: Position { line, character },
            end: Position {
                line,
                character: character + (span.end.saturating_sub(span.start)) as u32,
            },
        }
    }
}

/// LSP DiagnosticSeverity values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum DiagnosticSeverity {
    Error = 1,
    Warning = 2,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LspDiagnostic {
    pub range: LspRange,
    pub severity: DiagnosticSeverity,
    pub message: String,
    pub source: String,
}

impl LspDiagnostic {
    pub fn from_span(span: Span, severity: DiagnosticSeverity, message: String) -> Self {
        Self {
            range: LspRange::from_span(span),
            severity,
            message,
            source: "thinklang".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hover {
    pub contents: String,
    pub range: Option<LspRange>,
}

/// LSP CompletionItemKind values for the kinds the adapter emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum CompletionKind {
    Method = 2,
    Function = 3,
    Field = 5,
    Variable = 6,
    Keyword = 14,
    Struct = 22,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionItem {
    pub label: String,
    pub kind: CompletionKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub range: LspRange,
}

/// LSP SymbolKind values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum LspSymbolKind {
    Field = 8,
    Function = 12,
    Variable = 13,
    Struct = 23,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentSymbol {
    pub name: String,
    pub kind: LspSymbolKind,
    pub range: LspRange,
    #[serde(default)]
    pub children: Vec<DocumentSymbol>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignatureHelp {
    pub label: String,
    pub parameters: Vec<String>,
    pub active_parameter: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_conversion_is_zero_based() {
        let span = Span {
            start: 10,
            end: 15,
            line: 3,
            column: 7,
        };
        let range = LspRange::from_span(span);
        assert_eq!(range.start.line, 2);
        assert_eq!(range.start.character, 6);
        assert_eq!(range.end.character, 11);
    }
}
