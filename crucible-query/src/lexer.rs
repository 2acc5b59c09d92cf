//! Hand-rolled lexer for the query grammar (spec §4.4). A combinator
//! parser sits on top of this in `parser.rs`; the lexer's job is purely to
//! produce tokens with precise byte offsets for error reporting.

use std::iter::Peekable;
use std::str::CharIndices;

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    // Prefixes
    Hash,      // #
    HashBang,  // #!
    Tilde,     // ~
    TildeBang, // ~!
    Dot,
    LParen,
    RParen,
    Comma,

    // Keywords (case-insensitive)
    And,
    Or,
    Not,
    OrderBy,
    Limit,
    Asc,
    Desc,

    // Comparison operators
    Eq,          // =
    NotEq,       // !=
    ContainsAll, // *=*
    StartsWith,  // =*
    EndsWith,    // *=
    RegexOp,     // %=
    Gt,          // >
    Ge,          // >=
    Lt,          // <
    Le,          // <=

    // Literals
    Ident(String),
    Str(String),
    Number(f64),

    Eof,
    Error(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

pub struct Lexer<'a> {
    source: &'a str,
    chars: Peekable<CharIndices<'a>>,
    pos: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            chars: source.char_indices().peekable(),
            pos: 0,
        }
    }

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
        self.skip_whitespace();
        let start = self.pos;

        let kind = match self.peek_char() {
            None => TokenKind::Eof,
            Some(c) => match c {
                '(' => {
                    self.advance();
                    TokenKind::LParen
                }
                ')' => {
                    self.advance();
                    TokenKind::RParen
                }
                ',' => {
                    self.advance();
                    TokenKind::Comma
                }
                '.' => {
                    self.advance();
                    TokenKind::Dot
                }
                '#' => {
                    self.advance();
                    if self.peek_char() == Some('!') {
                        self.advance();
                        TokenKind::HashBang
                    } else {
                        TokenKind::Hash
                    }
                }
                '~' => {
                    self.advance();
                    if self.peek_char() == Some('!') {
                        self.advance();
                        TokenKind::TildeBang
                    } else {
                        TokenKind::Tilde
                    }
                }
                '=' => {
                    self.advance();
                    if self.peek_char() == Some('*') {
                        self.advance();
                        TokenKind::StartsWith
                    } else {
                        TokenKind::Eq
                    }
                }
                '!' => {
                    self.advance();
                    if self.peek_char() == Some('=') {
                        self.advance();
                        TokenKind::NotEq
                    } else {
                        TokenKind::Error("unexpected '!' (expected '!=')".to_string())
                    }
                }
                '*' => {
                    self.advance();
                    if self.peek_char() == Some('=') {
                        self.advance();
                        if self.peek_char() == Some('*') {
                            self.advance();
                            TokenKind::ContainsAll
                        } else {
                            TokenKind::EndsWith
                        }
                    } else {
                        TokenKind::Error("unexpected '*' (expected '*=' or '*=*')".to_string())
                    }
                }
                '%' => {
                    self.advance();
                    if self.peek_char() == Some('=') {
                        self.advance();
                        TokenKind::RegexOp
                    } else {
                        TokenKind::Error("unexpected '%' (expected '%=')".to_string())
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
                '"' | '\'' => self.scan_string(c),
                c if c.is_ascii_digit() => self.scan_number(),
                c if is_ident_start(c) => self.scan_ident_or_keyword(),
                c => {
                    self.advance();
                    TokenKind::Error(format!("unexpected character: {c}"))
                }
            },
        };

        Token {
            kind,
            span: Span {
                start,
                end: self.pos,
            },
        }
    }

    fn scan_ident_or_keyword(&mut self) -> TokenKind {
        let start = self.pos;
        while let Some(c) = self.peek_char() {
            if is_ident_continue(c) {
                self.advance();
            } else {
                break;
            }
        }
        let text = &self.source[start..self.pos];
        match text.to_lowercase().as_str() {
            "and" => TokenKind::And,
            "or" => TokenKind::Or,
            "not" => TokenKind::Not,
            "orderby" => TokenKind::OrderBy,
            "limit" => TokenKind::Limit,
            "asc" => TokenKind::Asc,
            "desc" => TokenKind::Desc,
            _ => TokenKind::Ident(text.to_string()),
        }
    }

    fn scan_string(&mut self, quote: char) -> TokenKind {
        self.advance(); // opening quote
        let mut value = String::new();
        loop {
            match self.peek_char() {
                None => return TokenKind::Error("unterminated string literal".to_string()),
                Some(c) if c == quote => {
                    self.advance();
                    break;
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
                        Some(c) if c == quote || c == '\\' => {
                            self.advance();
                            value.push(c);
                        }
                        Some(c) => {
                            self.advance();
                            value.push('\\');
                            value.push(c);
                        }
                        None => return TokenKind::Error("unterminated escape".to_string()),
                    }
                }
                Some(c) => {
                    self.advance();
                    value.push(c);
                }
            }
        }
        TokenKind::Str(value)
    }

    fn scan_number(&mut self) -> TokenKind {
        let start = self.pos;
        while let Some(c) = self.peek_char() {
            if c.is_ascii_digit() || c == '.' {
                self.advance();
            } else {
                break;
            }
        }
        let text = &self.source[start..self.pos];
        match text.parse::<f64>() {
            Ok(n) => TokenKind::Number(n),
            Err(_) => TokenKind::Error(format!("invalid number: {text}")),
        }
    }

    fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek_char() {
            if c.is_whitespace() {
                self.advance();
            } else {
                break;
            }
        }
    }

    fn peek_char(&mut self) -> Option<char> {
        self.chars.peek().map(|(_, c)| *c)
    }

    fn advance(&mut self) -> Option<char> {
        let next = self.chars.next();
        if let Some((i, c)) = next {
            self.pos = i + c.len_utf8();
            Some(c)
        } else {
            None
        }
    }
}

/// Property paths and attribute names allow the punctuation Trilium-style
/// note metadata actually uses (`dateCreated`, `my-label`).
fn is_ident_start(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn is_ident_continue(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '-'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        Lexer::new(src).tokenize().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn lexes_label_atom_with_value() {
        let k = kinds("#author = Tolkien");
        assert_eq!(
            k,
            vec![
                TokenKind::Hash,
                TokenKind::Ident("author".to_string()),
                TokenKind::Eq,
                TokenKind::Ident("Tolkien".to_string()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn lexes_negated_relation() {
        let k = kinds("~!author");
        assert_eq!(
            k,
            vec![TokenKind::TildeBang, TokenKind::Ident("author".to_string()), TokenKind::Eof]
        );
    }

    #[test]
    fn disambiguates_fulltext_operators() {
        assert_eq!(
            kinds("*=*"),
            vec![TokenKind::ContainsAll, TokenKind::Eof]
        );
        assert_eq!(kinds("=*"), vec![TokenKind::StartsWith, TokenKind::Eof]);
        assert_eq!(kinds("*="), vec![TokenKind::EndsWith, TokenKind::Eof]);
        assert_eq!(kinds("%="), vec![TokenKind::RegexOp, TokenKind::Eof]);
    }

    #[test]
    fn lexes_quoted_phrase_with_escape() {
        let k = kinds(r#""hello \"world\"""#);
        assert_eq!(
            k,
            vec![TokenKind::Str("hello \"world\"".to_string()), TokenKind::Eof]
        );
    }

    #[test]
    fn reports_offsets() {
        let tokens = Lexer::new("#author").tokenize();
        assert_eq!(tokens[0].span, Span { start: 0, end: 1 });
        assert_eq!(tokens[1].span, Span { start: 1, end: 7 });
    }

    #[test]
    fn keyword_matching_is_case_insensitive() {
        assert_eq!(kinds("AND"), vec![TokenKind::And, TokenKind::Eof]);
        assert_eq!(kinds("OrderBy"), vec![TokenKind::OrderBy, TokenKind::Eof]);
    }
}
