//! Lexer implementation

use super::token::*;
use std::iter::Peekable;
use std::str::CharIndices;

/// Lexer for ThinkLang source text.
pub struct Lexer<'a> {
    source: &'a str,
    chars: Peekable<CharIndices<'a>>,
    line: usize,
    column: usize,
    pos: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            chars: source.char_indices().peekable(),
            line: 1,
            column: 1,
            pos: 0,
        }
    }

    /// Tokenize the entire source into a vector of tokens.
    pub fn tokenize(&mut self) -> Vec<Token> {
        let mut tokens = Vec::new();

        loop {
            let token = self.next_token();
            let is_eof = token.kind == TokenKind::Eof;
            tokens.push(token);
            if is_eof {
                break;
            }
        }

        tokens
    }

    fn next_token(&mut self) -> Token {
        self.skip_whitespace_and_comments();

        let start_pos = self.pos;
        let start_line = self.line;
        let start_col = self.column;

        let kind = match self.peek_char() {
            None => TokenKind::Eof,
            Some(c) => match c {
                '{' => {
                    self.advance();
                    TokenKind::LBrace
                }
                '}' => {
                    self.advance();
                    TokenKind::RBrace
                }
                '(' => {
                    self.advance();
                    TokenKind::LParen
                }
                ')' => {
                    self.advance();
                    TokenKind::RParen
                }
                '[' => {
                    self.advance();
                    TokenKind::LBracket
                }
                ']' => {
                    self.advance();
                    TokenKind::RBracket
                }
                ':' => {
                    self.advance();
                    TokenKind::Colon
                }
                ',' => {
                    self.advance();
                    TokenKind::Comma
                }
                ';' => {
                    self.advance();
                    TokenKind::Semicolon
                }
                '?' => {
                    self.advance();
                    TokenKind::Question
                }
                '+' => {
                    self.advance();
                    TokenKind::Plus
                }
                '*' => {
                    self.advance();
                    TokenKind::Star
                }
                '%' => {
                    self.advance();
                    TokenKind::Percent
                }
                '/' => {
                    self.advance();
                    TokenKind::Slash
                }

                '.' => {
                    self.advance();
                    if self.peek_char() == Some('.') {
                        self.advance();
                        TokenKind::DotDot
                    } else {
                        TokenKind::Dot
                    }
                }

                '=' => {
                    self.advance();
                    match self.peek_char() {
                        Some('=') => {
                            self.advance();
                            TokenKind::Eq
                        }
                        Some('>') => {
                            self.advance();
                            TokenKind::FatArrow
                        }
                        _ => TokenKind::Assign,
                    }
                }

                '!' => {
                    self.advance();
                    if self.peek_char() == Some('=') {
                        self.advance();
                        TokenKind::Ne
                    } else {
                        TokenKind::Not
                    }
                }

                '>' => {
                    self.advance();
                    if self.peek_char() == Some('=') {
                        self.advance();
                        TokenKind::Ge
                    } else {
                        TokenKind::Gt
                    }
                }

                '<' => {
                    self.advance();
                    if self.peek_char() == Some('=') {
                        self.advance();
                        TokenKind::Le
                    } else {
                        TokenKind::Lt
                    }
                }

                '&' => {
                    self.advance();
                    if self.peek_char() == Some('&') {
                        self.advance();
                        TokenKind::AndAnd
                    } else {
                        TokenKind::Error("Unexpected character: &".to_string())
                    }
                }

                '|' => {
                    self.advance();
                    match self.peek_char() {
                        Some('|') => {
                            self.advance();
                            TokenKind::OrOr
                        }
                        Some('>') => {
                            self.advance();
                            TokenKind::PipeForward
                        }
                        _ => TokenKind::Pipe,
                    }
                }

                '-' => {
                    self.advance();
                    if self.peek_char() == Some('>') {
                        self.advance();
                        TokenKind::Arrow
                    } else {
                        TokenKind::Minus
                    }
                }

                '"' | '\'' => self.scan_string(c),

                c if c.is_ascii_digit() => self.scan_number(),

                c if c.is_ascii_alphabetic() || c == '_' => self.scan_identifier(),

                c => {
                    self.advance();
                    TokenKind::Error(format!("Unexpected character: {}", c))
                }
            },
        };

        Token {
            kind,
            span: Span {
                start: start_pos,
                end: self.pos,
                line: start_line,
                column: start_col,
            },
        }
    }

    /// Scan an identifier or keyword. Keyword matching is case-sensitive.
    fn scan_identifier(&mut self) -> TokenKind {
        let start = self.pos;

        while let Some(c) = self.peek_char() {
            if c.is_ascii_alphanumeric() || c == '_' {
                self.advance();
            } else {
                break;
            }
        }

        let ident = &self.source[start..self.pos];

        match ident {
            "_" => TokenKind::Underscore,

            // Declarations
            "type" => TokenKind::Type,
            "fn" => TokenKind::Fn,
            "tool" => TokenKind::Tool,
            "let" => TokenKind::Let,
            "uncertain" => TokenKind::Uncertain,
            "import" => TokenKind::Import,
            "from" => TokenKind::From,
            "test" => TokenKind::Test,

            // Statements
            "print" => TokenKind::Print,
            "try" => TokenKind::Try,
            "catch" => TokenKind::Catch,
            "if" => TokenKind::If,
            "else" => TokenKind::Else,
            "match" => TokenKind::Match,
            "assert" => TokenKind::Assert,

            // AI calls
            "think" => TokenKind::Think,
            "infer" => TokenKind::Infer,
            "reason" => TokenKind::Reason,
            "agent" => TokenKind::Agent,

            // Clauses
            "with" => TokenKind::With,
            "without" => TokenKind::Without,
            "context" => TokenKind::Context,
            "guard" => TokenKind::Guard,
            "on_fail" => TokenKind::OnFail,
            "retry" => TokenKind::Retry,
            "then" => TokenKind::Then,
            "fallback" => TokenKind::Fallback,
            "goal" => TokenKind::Goal,
            "steps" => TokenKind::Steps,

            // Test modes
            "mode" => TokenKind::Mode,
            "replay" => TokenKind::Replay,
            "record" => TokenKind::Record,

            "description" => TokenKind::Description,

            // Primitive types
            "string" => TokenKind::StringTy,
            "int" => TokenKind::IntTy,
            "float" => TokenKind::FloatTy,
            "bool" => TokenKind::BoolTy,
            "Confident" => TokenKind::Confident,

            // Literals
            "true" => TokenKind::True,
            "false" => TokenKind::False,
            "null" => TokenKind::Null,

            _ => TokenKind::Identifier(ident.to_string()),
        }
    }

    /// Scan a string literal with escape sequences. Both quote styles are
    /// accepted; the literal ends at its opening quote character.
    fn scan_string(&mut self, quote: char) -> TokenKind {
        self.advance(); // consume opening quote
        let mut value = String::new();

        loop {
            match self.peek_char() {
                None => return TokenKind::Error("Unterminated string".to_string()),
                Some(c) if c == quote => {
                    self.advance();
                    break;
                }
                Some('\n') => {
                    self.advance();
                    self.line += 1;
                    self.column = 1;
                    value.push('\n');
                }
                Some('\\') => {
                    self.advance();
                    match self.peek_char() {
                        Some('n') => {
                            self.advance();
                            value.push('\n');
                        }
                        Some('t') => {
                            self.advance();
                            value.push('\t');
                        }
                        Some('r') => {
                            self.advance();
                            value.push('\r');
                        }
                        Some('\\') => {
                            self.advance();
                            value.push('\\');
                        }
                        Some(c) if c == quote => {
                            self.advance();
                            value.push(quote);
                        }
                        _ => value.push('\\'),
                    }
                }
                Some(c) => {
                    self.advance();
                    value.push(c);
                }
            }
        }

        TokenKind::String(value)
    }

    /// Scan a number literal. A `.` is consumed only when a digit follows,
    /// so `1..5` lexes as `1`, `..`, `5`.
    fn scan_number(&mut self) -> TokenKind {
        let start = self.pos;

        while let Some(c) = self.peek_char() {
            if c.is_ascii_digit() {
                self.advance();
            } else {
                break;
            }
        }

        if self.peek_char() == Some('.')
            && self
                .peek_next_char()
                .map(|c| c.is_ascii_digit())
                .unwrap_or(false)
        {
            self.advance(); // .
            while let Some(c) = self.peek_char() {
                if c.is_ascii_digit() {
                    self.advance();
                } else {
                    break;
                }
            }
        }

        let text = &self.source[start..self.pos];
        match text.parse::<f64>() {
            Ok(n) => TokenKind::Number(n),
            Err(_) => TokenKind::Error(format!("Invalid number: {}", text)),
        }
    }

    /// Skip whitespace and comments.
    fn skip_whitespace_and_comments(&mut self) {
        loop {
            match self.peek_char() {
                Some(' ') | Some('\t') | Some('\r') => {
                    self.advance();
                }
                Some('\n') => {
                    self.advance();
                    self.line += 1;
                    self.column = 1;
                }
                Some('/') => {
                    let next = self.peek_next_char();
                    if next == Some('/') {
                        // Line comment
                        while let Some(c) = self.peek_char() {
                            if c == '\n' {
                                break;
                            }
                            self.advance();
                        }
                    } else if next == Some('*') {
                        // Block comment
                        self.advance(); // /
                        self.advance(); // *
                        loop {
                            match self.peek_char() {
                                None => break,
                                Some('*') if self.peek_next_char() == Some('/') => {
                                    self.advance();
                                    self.advance();
                                    break;
                                }
                                Some('\n') => {
                                    self.advance();
                                    self.line += 1;
                                    self.column = 1;
                                }
                                _ => {
                                    self.advance();
                                }
                            }
                        }
                    } else {
                        break;
                    }
                }
                _ => break,
            }
        }
    }

    fn peek_char(&mut self) -> Option<char> {
        self.chars.peek().map(|(_, c)| *c)
    }

    fn peek_next_char(&self) -> Option<char> {
        let mut iter = self.source[self.pos..].char_indices();
        iter.next();
        iter.next().map(|(_, c)| c)
    }

    fn advance(&mut self) -> Option<char> {
        if let Some((i, c)) = self.chars.next() {
            self.pos = i + c.len_utf8();
            self.column += 1;
            Some(c)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        Lexer::new(source)
            .tokenize()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn scans_ai_call_head() {
        assert_eq!(
            kinds("think<Sentiment>"),
            vec![
                TokenKind::Think,
                TokenKind::Lt,
                TokenKind::Identifier("Sentiment".to_string()),
                TokenKind::Gt,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn range_does_not_eat_float_syntax() {
        assert_eq!(
            kinds("1..5"),
            vec![
                TokenKind::Number(1.0),
                TokenKind::DotDot,
                TokenKind::Number(5.0),
                TokenKind::Eof,
            ]
        );
        assert_eq!(kinds("1.5"), vec![TokenKind::Number(1.5), TokenKind::Eof]);
    }

    #[test]
    fn pipe_forward_and_union() {
        assert_eq!(
            kinds("a |> f | b || c"),
            vec![
                TokenKind::Identifier("a".to_string()),
                TokenKind::PipeForward,
                TokenKind::Identifier("f".to_string()),
                TokenKind::Pipe,
                TokenKind::Identifier("b".to_string()),
                TokenKind::OrOr,
                TokenKind::Identifier("c".to_string()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn both_quote_styles() {
        assert_eq!(
            kinds(r#""hi" 'there'"#),
            vec![
                TokenKind::String("hi".to_string()),
                TokenKind::String("there".to_string()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn comments_are_skipped() {
        let source = "let // trailing\n/* block\ncomment */ x";
        assert_eq!(
            kinds(source),
            vec![
                TokenKind::Let,
                TokenKind::Identifier("x".to_string()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn spans_track_lines() {
        let tokens = Lexer::new("let\nx").tokenize();
        assert_eq!(tokens[0].span.line, 1);
        assert_eq!(tokens[1].span.line, 2);
        assert_eq!(tokens[1].span.column, 1);
    }

    #[test]
    fn fat_arrow_and_arrow() {
        assert_eq!(
            kinds("=> -> = =="),
            vec![
                TokenKind::FatArrow,
                TokenKind::Arrow,
                TokenKind::Assign,
                TokenKind::Eq,
                TokenKind::Eof,
            ]
        );
    }
}
