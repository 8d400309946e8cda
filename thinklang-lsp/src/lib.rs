//! ThinkLang LSP adapter
//!
//! A pure consumer of the compiler front end: per-document state is
//! recomputed on open/change from the parser, checker, and symbol index,
//! and queried for hover, completion, definition, document symbols, and
//! signature help. The wire transport is an external thin caller; this
//! crate only produces the payloads. AST positions are 1-based and are
//! converted to 0-based LSP positions at this boundary.

mod protocol;

pub use protocol::*;

use std::collections::HashMap;
use thinklang_dsl::checker::{self, type_display, UNCERTAIN_CAPABILITIES};
use thinklang_dsl::parser::ast::*;
use thinklang_dsl::schema_compiler::TypeTable;
use thinklang_dsl::symbols::{build_symbol_index, SymbolIndex, SymbolKind};
use thinklang_dsl::{parse, Program};

const KEYWORDS: &[&str] = &[
    "type", "fn", "tool", "let", "uncertain", "import", "from", "test", "print", "try", "catch",
    "if", "else", "match", "assert", "think", "infer", "reason", "agent", "with", "without",
    "context", "guard", "on_fail", "retry", "then", "fallback", "goal", "steps", "mode", "replay",
    "record", "true", "false", "null",
];

const PRIMITIVES: &[&str] = &["string", "int", "float", "bool", "null", "Confident"];

/// What hover and completion know about a top-level binding.
#[derive(Debug, Clone)]
struct BindingSummary {
    ty: Option<TypeExpr>,
    uncertain: bool,
}

/// Analysis state for one open document.
#[derive(Debug)]
pub struct DocumentState {
    pub text: String,
    pub program: Option<Program>,
    pub types: TypeTable,
    pub diagnostics: Vec<LspDiagnostic>,
    pub symbols: SymbolIndex,
    bindings: HashMap<String, BindingSummary>,
}

impl DocumentState {
    /// Parse and check a document; called on open and on every change.
    pub fn analyze(text: &str) -> Self {
        match parse(text) {
            Ok(program) => {
                let types = checker::collect_types(&program);
                let check = checker::check(&program, &types);

                let mut diagnostics = Vec::new();
                for error in &check.errors {
                    diagnostics.push(LspDiagnostic::from_span(
                        error.span,
                        DiagnosticSeverity::Error,
                        error.message.clone(),
                    ));
                }
                for warning in &check.warnings {
                    diagnostics.push(LspDiagnostic::from_span(
                        warning.span,
                        DiagnosticSeverity::Warning,
                        warning.message.clone(),
                    ));
                }

                let symbols = build_symbol_index(&program);
                let bindings = summarize_bindings(&program);

                Self {
                    text: text.to_string(),
                    program: Some(program),
                    types,
                    diagnostics,
                    symbols,
                    bindings,
                }
            }
            Err(error) => Self {
                text: text.to_string(),
                program: None,
                types: TypeTable::new(),
                diagnostics: vec![LspDiagnostic {
                    range: LspRange::point(
                        error.line.saturating_sub(1) as u32,
                        error.column.saturating_sub(1) as u32,
                    ),
                    severity: DiagnosticSeverity::Error,
                    message: error.message,
                    source: "thinklang".to_string(),
                }],
                symbols: SymbolIndex::new(),
                bindings: HashMap::new(),
            },
        }
    }

    // ========================================================================
    // HOVER
    // ========================================================================

    pub fn hover(&self, position: Position) -> Option<Hover> {
        let (word, range) = self.word_at(position)?;

        if let Some(decl) = self.types.get(&word) {
            return Some(Hover {
                contents: render_type_decl(decl),
                range: Some(range),
            });
        }

        if let Some(summary) = self.bindings.get(&word) {
            let ty = summary
                .ty
                .as_ref()
                .map(type_display)
                .unwrap_or_else(|| "unknown".to_string());
            let marker = if summary.uncertain { " (uncertain)" } else { "" };
            return Some(Hover {
                contents: format!("let {}: {}{}", word, ty, marker),
                range: Some(range),
            });
        }

        if let Some(signature) = self.function_signature(&word) {
            return Some(Hover {
                contents: signature,
                range: Some(range),
            });
        }

        None
    }

    // ========================================================================
    // COMPLETION
    // ========================================================================

    pub fn completion(&self, position: Position, trigger: Option<char>) -> Vec<CompletionItem> {
        match trigger {
            Some('.') => self.member_completions(position),
            Some('<') => self.type_argument_completions(position),
            _ => self.general_completions(),
        }
    }

    fn member_completions(&self, position: Position) -> Vec<CompletionItem> {
        // The identifier immediately before the dot decides the member set.
        let receiver = match self.identifier_before_dot(position) {
            Some(receiver) => receiver,
            None => return Vec::new(),
        };

        let summary = match self.bindings.get(&receiver) {
            Some(summary) => summary,
            None => return Vec::new(),
        };

        let confident = matches!(summary.ty, Some(TypeExpr::Confident(_)));
        if summary.uncertain || confident {
            return UNCERTAIN_CAPABILITIES
                .iter()
                .map(|name| CompletionItem {
                    label: name.to_string(),
                    kind: CompletionKind::Method,
                    detail: Some("uncertain-value capability".to_string()),
                })
                .collect();
        }

        if let Some(TypeExpr::Named(type_name)) = &summary.ty {
            if let Some(decl) = self.types.get(type_name) {
                return decl
                    .fields
                    .iter()
                    .map(|field| CompletionItem {
                        label: field.name.clone(),
                        kind: CompletionKind::Field,
                        detail: Some(type_display(&field.ty)),
                    })
                    .collect();
            }
        }

        Vec::new()
    }

    fn type_argument_completions(&self, position: Position) -> Vec<CompletionItem> {
        // Only inside an AI-call head: `think<` / `infer<` etc.
        let line = self.line_text(position.line);
        let before: String = line.chars().take(position.character as usize).collect();
        let is_ai_head = ["think", "infer", "reason", "agent"]
            .iter()
            .any(|head| before.trim_end_matches('<').ends_with(head));
        if !is_ai_head {
            return Vec::new();
        }

        let mut items: Vec<CompletionItem> = self
            .types
            .keys()
            .map(|name| CompletionItem {
                label: name.clone(),
                kind: CompletionKind::Struct,
                detail: Some("type".to_string()),
            })
            .collect();
        items.extend(PRIMITIVES.iter().map(|name| CompletionItem {
            label: name.to_string(),
            kind: CompletionKind::Keyword,
            detail: Some("primitive".to_string()),
        }));
        items.sort_by(|a, b| a.label.cmp(&b.label));
        items
    }

    fn general_completions(&self) -> Vec<CompletionItem> {
        let mut items: Vec<CompletionItem> = KEYWORDS
            .iter()
            .map(|kw| CompletionItem {
                label: kw.to_string(),
                kind: CompletionKind::Keyword,
                detail: None,
            })
            .collect();

        for (name, info) in &self.symbols {
            items.push(CompletionItem {
                label: name.clone(),
                kind: match info.kind {
                    SymbolKind::Type => CompletionKind::Struct,
                    SymbolKind::Function | SymbolKind::Tool => CompletionKind::Function,
                    SymbolKind::Variable => CompletionKind::Variable,
                },
                detail: None,
            });
        }

        items
    }

    // ========================================================================
    // DEFINITION
    // ========================================================================

    pub fn definition(&self, position: Position) -> Option<Location> {
        let (word, _) = self.word_at(position)?;
        let info = self.symbols.get(&word)?;
        Some(Location {
            range: LspRange::from_span(info.span),
        })
    }

    // ========================================================================
    // DOCUMENT SYMBOLS
    // ========================================================================

    pub fn document_symbols(&self) -> Vec<DocumentSymbol> {
        let program = match &self.program {
            Some(program) => program,
            None => return Vec::new(),
        };

        let mut symbols = Vec::new();
        for stmt in &program.statements {
            match stmt {
                Stmt::TypeDecl(decl) => symbols.push(DocumentSymbol {
                    name: decl.name.clone(),
                    kind: LspSymbolKind::Struct,
                    range: LspRange::from_span(decl.span),
                    children: decl
                        .fields
                        .iter()
                        .map(|field| DocumentSymbol {
                            name: field.name.clone(),
                            kind: LspSymbolKind::Field,
                            range: LspRange::from_span(field.span),
                            children: Vec::new(),
                        })
                        .collect(),
                }),
                Stmt::FnDecl(decl) => symbols.push(DocumentSymbol {
                    name: decl.name.clone(),
                    kind: LspSymbolKind::Function,
                    range: LspRange::from_span(decl.span),
                    children: Vec::new(),
                }),
                Stmt::ToolDecl(decl) => symbols.push(DocumentSymbol {
                    name: decl.name.clone(),
                    kind: LspSymbolKind::Function,
                    range: LspRange::from_span(decl.span),
                    children: Vec::new(),
                }),
                Stmt::Let(decl) => symbols.push(DocumentSymbol {
                    name: decl.name.clone(),
                    kind: LspSymbolKind::Variable,
                    range: LspRange::from_span(decl.span),
                    children: Vec::new(),
                }),
                _ => {}
            }
        }
        symbols
    }

    // ========================================================================
    // SIGNATURE HELP
    // ========================================================================

    pub fn signature_help(&self, position: Position) -> Option<SignatureHelp> {
        let line = self.line_text(position.line);
        let before: String = line.chars().take(position.character as usize).collect();

        // Find the innermost unclosed call on this line.
        let mut depth = 0i32;
        let mut call_start = None;
        for (index, c) in before.char_indices().rev() {
            match c {
                ')' => depth += 1,
                '(' => {
                    if depth == 0 {
                        call_start = Some(index);
                        break;
                    }
                    depth -= 1;
                }
                _ => {}
            }
        }
        let call_start = call_start?;

        let head: String = before[..call_start]
            .chars()
            .rev()
            .take_while(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '>' || *c == '<')
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        let name: String = head
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
            .collect();

        let active_parameter = before[call_start..].matches(',').count() as u32;

        let (label, parameters) = match name.as_str() {
            "think" => (
                "think<T>(prompt) [with context | guard | on_fail]".to_string(),
                vec!["prompt: string".to_string()],
            ),
            "infer" => (
                "infer<T>(value, hint: string?)".to_string(),
                vec!["value".to_string(), "hint: string".to_string()],
            ),
            "agent" => (
                "agent<T>(prompt, tools: [...], max_turns: int)".to_string(),
                vec![
                    "prompt: string".to_string(),
                    "tools: [tool]".to_string(),
                    "max_turns: int".to_string(),
                ],
            ),
            _ => {
                let signature = self.function_signature(&name)?;
                let parameters = self.function_parameters(&name)?;
                (signature, parameters)
            }
        };

        Some(SignatureHelp {
            label,
            parameters,
            active_parameter,
        })
    }

    // ========================================================================
    // HELPERS
    // ========================================================================

    fn function_signature(&self, name: &str) -> Option<String> {
        let program = self.program.as_ref()?;
        for stmt in &program.statements {
            match stmt {
                Stmt::FnDecl(decl) if decl.name == name => {
                    return Some(render_fn_signature("fn", &decl.name, &decl.params, &decl.return_type))
                }
                Stmt::ToolDecl(decl) if decl.name == name => {
                    return Some(render_fn_signature("tool", &decl.name, &decl.params, &decl.return_type))
                }
                _ => {}
            }
        }
        None
    }

    fn function_parameters(&self, name: &str) -> Option<Vec<String>> {
        let program = self.program.as_ref()?;
        for stmt in &program.statements {
            let params = match stmt {
                Stmt::FnDecl(decl) if decl.name == name => &decl.params,
                Stmt::ToolDecl(decl) if decl.name == name => &decl.params,
                _ => continue,
            };
            return Some(
                params
                    .iter()
                    .map(|p| format!("{}: {}", p.name, type_display(&p.ty)))
                    .collect(),
            );
        }
        None
    }

    fn line_text(&self, line: u32) -> String {
        self.text
            .lines()
            .nth(line as usize)
            .unwrap_or_default()
            .to_string()
    }

    /// The identifier covering the position, with its 0-based range.
    fn word_at(&self, position: Position) -> Option<(String, LspRange)> {
        let line = self.line_text(position.line);
        let chars: Vec<char> = line.chars().collect();
        let cursor = (position.character as usize).min(chars.len());

        let is_word = |c: char| c.is_ascii_alphanumeric() || c == '_';

        let mut start = cursor;
        while start > 0 && is_word(chars[start - 1]) {
            start -= 1;
        }
        let mut end = cursor;
        while end < chars.len() && is_word(chars[end]) {
            end += 1;
        }
        if start == end {
            return None;
        }

        let word: String = chars[start..end].iter().collect();
        Some((
            word,
            LspRange {
                start: Position {
                    line: position.line,
                    character: start as u32,
                },
                end: Position {
                    line: position.line,
                    character: end as u32,
                },
            },
        ))
    }

    /// The receiver identifier of a `receiver.` member access.
    fn identifier_before_dot(&self, position: Position) -> Option<String> {
        let line = self.line_text(position.line);
        let chars: Vec<char> = line.chars().collect();
        let mut cursor = (position.character as usize).min(chars.len());

        // Walk back over a partial member name and the dot itself.
        while cursor > 0 && (chars[cursor - 1].is_ascii_alphanumeric() || chars[cursor - 1] == '_')
        {
            cursor -= 1;
        }
        if cursor == 0 || chars[cursor - 1] != '.' {
            return None;
        }
        cursor -= 1;

        let end = cursor;
        let mut start = cursor;
        while start > 0 && (chars[start - 1].is_ascii_alphanumeric() || chars[start - 1] == '_') {
            start -= 1;
        }
        if start == end {
            return None;
        }
        Some(chars[start..end].iter().collect())
    }
}

/// A shallow top-level binding pass: enough inference for hover and member
/// completion without rerunning the checker per keystroke.
fn summarize_bindings(program: &Program) -> HashMap<String, BindingSummary> {
    let mut bindings = HashMap::new();
    for stmt in &program.statements {
        if let Stmt::Let(decl) = stmt {
            let inferred = match (&decl.ty, &decl.value) {
                (Some(ty), _) => Some(ty.clone()),
                (None, Expr::AiCall(call)) => Some(call.type_arg.clone()),
                (None, Expr::StringLit(..)) => Some(TypeExpr::String),
                (None, Expr::NumberLit(n, _)) if n.fract() == 0.0 => Some(TypeExpr::Int),
                (None, Expr::NumberLit(..)) => Some(TypeExpr::Float),
                (None, Expr::BoolLit(..)) => Some(TypeExpr::Bool),
                _ => None,
            };
            let ai_call = matches!(decl.value, Expr::AiCall(_));
            let confident = inferred.as_ref().map(|t| t.is_confident()).unwrap_or(false);
            bindings.insert(
                decl.name.clone(),
                BindingSummary {
                    ty: inferred,
                    uncertain: decl.uncertain || (ai_call && !confident),
                },
            );
        }
    }
    bindings
}

fn render_type_decl(decl: &TypeDecl) -> String {
    let mut out = format!("type {} {{\n", decl.name);
    for field in &decl.fields {
        out.push_str(&format!(
            "    {}{}: {}\n",
            field.name,
            if field.optional { "?" } else { "" },
            type_display(&field.ty)
        ));
    }
    out.push('}');
    out
}

fn render_fn_signature(
    keyword: &str,
    name: &str,
    params: &[Param],
    return_type: &Option<TypeExpr>,
) -> String {
    let params = params
        .iter()
        .map(|p| format!("{}: {}", p.name, type_display(&p.ty)))
        .collect::<Vec<_>>()
        .join(", ");
    match return_type {
        Some(ret) => format!("{} {}({}) -> {}", keyword, name, params, type_display(ret)),
        None => format!("{} {}({})", keyword, name, params),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCE: &str = r#"type Sentiment {
    label: string
    score: float
}

let review = "nice product"
let s = think<Sentiment>("classify") with context: review
fn shout(text: string) -> string { text + "!" }
"#;

    fn state() -> DocumentState {
        DocumentState::analyze(SOURCE)
    }

    #[test]
    fn clean_document_has_no_diagnostics() {
        assert!(state().diagnostics.is_empty());
    }

    #[test]
    fn parse_error_becomes_diagnostic() {
        let state = DocumentState::analyze("type {");
        assert_eq!(state.diagnostics.len(), 1);
        assert_eq!(state.diagnostics[0].severity, DiagnosticSeverity::Error);
    }

    #[test]
    fn non_exhaustive_match_is_a_warning() {
        let state = DocumentState::analyze(
            r#"
let x = { value: 2 }
let y = match x { { value: >= 1 } => "h" }
"#,
        );
        assert_eq!(state.diagnostics.len(), 1);
        assert_eq!(state.diagnostics[0].severity, DiagnosticSeverity::Warning);
    }

    #[test]
    fn hover_on_uncertain_binding() {
        let state = state();
        // Line 6 (0-based): `let s = ...` — hover the `s`.
        let hover = state
            .hover(Position {
                line: 6,
                character: 4,
            })
            .unwrap();
        assert!(hover.contents.contains("Sentiment"));
        assert!(hover.contents.contains("uncertain"));
    }

    #[test]
    fn hover_on_type_renders_fields() {
        let state = state();
        let hover = state
            .hover(Position {
                line: 0,
                character: 6,
            })
            .unwrap();
        assert!(hover.contents.contains("label: string"));
        assert!(hover.contents.contains("score: float"));
    }

    #[test]
    fn dot_completion_on_uncertain_value_lists_capabilities() {
        // Cursor right after the dot in `s.confidence`.
        let text = format!("{}print s.confidence", SOURCE);
        let state = DocumentState::analyze(&text);

        let items = state.completion(
            Position {
                line: 8,
                character: 8,
            },
            Some('.'),
        );
        let labels: Vec<&str> = items.iter().map(|i| i.label.as_str()).collect();
        assert!(labels.contains(&"unwrap"));
        assert!(labels.contains(&"confidence"));
        assert!(labels.contains(&"isConfident"));
    }

    #[test]
    fn dot_completion_on_struct_binding_lists_fields() {
        let text = format!(
            "{}let plain: Sentiment = s.unwrap(0.5)\nprint plain.label",
            SOURCE
        );
        let state = DocumentState::analyze(&text);

        let items = state.completion(
            Position {
                line: 9,
                character: 12,
            },
            Some('.'),
        );
        let labels: Vec<&str> = items.iter().map(|i| i.label.as_str()).collect();
        assert!(labels.contains(&"label"));
        assert!(labels.contains(&"score"));
    }

    #[test]
    fn angle_completion_lists_types_in_ai_head() {
        let state = state();
        // Cursor right after `think<` on line 6.
        let items = state.completion(
            Position {
                line: 6,
                character: 14,
            },
            Some('<'),
        );
        let labels: Vec<&str> = items.iter().map(|i| i.label.as_str()).collect();
        assert!(labels.contains(&"Sentiment"));
        assert!(labels.contains(&"string"));
    }

    #[test]
    fn definition_resolves_through_symbol_index() {
        let state = state();
        // `Sentiment` inside the think<> head on line 6.
        let location = state
            .definition(Position {
                line: 6,
                character: 16,
            })
            .unwrap();
        assert_eq!(location.range.start.line, 0);
    }

    #[test]
    fn document_symbols_nest_fields() {
        let state = state();
        let symbols = state.document_symbols();
        let sentiment = symbols.iter().find(|s| s.name == "Sentiment").unwrap();
        assert_eq!(sentiment.kind, LspSymbolKind::Struct);
        assert_eq!(sentiment.children.len(), 2);
        assert!(symbols.iter().any(|s| s.name == "shout"));
    }

    #[test]
    fn signature_help_for_builtin_and_user_functions() {
        let text = format!("{}shout(review)", SOURCE);
        let state = DocumentState::analyze(&text);

        let help = state
            .signature_help(Position {
                line: 8,
                character: 6,
            })
            .unwrap();
        assert!(help.label.contains("fn shout"));
        assert_eq!(help.parameters, vec!["text: string"]);
        assert_eq!(help.active_parameter, 0);

        let think_line = format!("{}let q = think<Sentiment>(\"hi\")", SOURCE);
        let state = DocumentState::analyze(&think_line);
        let help = state
            .signature_help(Position {
                line: 8,
                character: 26,
            })
            .unwrap();
        assert!(help.label.starts_with("think<T>"));
    }
}
