//! Hand-written character-at-a-time lexer for the script DSL.
//!
//! Mirrors the grammar in `mapscriptparser.py`: comments and whitespace are
//! skipped between lexemes, identifiers/keywords share one token kind (the
//! parser decides whether `null`/`color`/`script` are keywords from
//! context), and number literals are classified by the lexer into `Int`/
//! `Float` the way the four separate `parsy` number parsers
//! (`hexnumber|binnumber|floatnumber|decnumber`) do.

use crate::error::{CompileError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Pos {
    pub line: u32,
    pub col: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBrack,
    RBrack,
    Comma,
    Semicolon,
    Equals,
    Hash,
    HashBang,
    At,
    Ident(String),
    Int(i64),
    Float(f64),
    Str(String),
    Eof,
}

#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    pub pos: Pos,
}

pub struct Lexer<'a> {
    source: &'a str,
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
    line: u32,
    col: u32,
    source_label: String,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str, source_label: impl Into<String>) -> Self {
        Lexer {
            source,
            chars: source.char_indices().peekable(),
            line: 1,
            col: 1,
            source_label: source_label.into(),
        }
    }

    fn err(&self, pos: Pos, message: impl Into<String>) -> anyhow::Error {
        CompileError::Script {
            source_file: self.source_label.clone(),
            line: pos.line,
            col: pos.col,
            message: message.into(),
        }
        .into()
    }

    fn peek_char(&mut self) -> Option<char> {
        self.chars.peek().map(|&(_, c)| c)
    }

    fn peek2_char(&self) -> Option<char> {
        let mut it = self.chars.clone();
        it.next();
        it.next().map(|(_, c)| c)
    }

    fn bump(&mut self) -> Option<char> {
        let (_, c) = self.chars.next()?;
        if c == '\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(c)
    }

    fn pos(&self) -> Pos {
        Pos {
            line: self.line,
            col: self.col,
        }
    }

    fn skip_trivia(&mut self) -> Result<()> {
        loop {
            match self.peek_char() {
                Some(c) if c.is_whitespace() => {
                    self.bump();
                }
                Some('/') if self.peek2_char() == Some('/') => {
                    while let Some(c) = self.peek_char() {
                        if c == '\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                Some('/') if self.peek2_char() == Some('*') => {
                    let start = self.pos();
                    self.bump();
                    self.bump();
                    loop {
                        match self.bump() {
                            Some('*') if self.peek_char() == Some('/') => {
                                self.bump();
                                break;
                            }
                            Some(_) => continue,
                            None => return Err(self.err(start, "unterminated block comment")),
                        }
                    }
                }
                _ => break,
            }
        }
        Ok(())
    }

    fn lex_ident(&mut self) -> String {
        let mut s = String::new();
        while let Some(c) = self.peek_char() {
            if c.is_alphanumeric() || c == '_' {
                s.push(c);
                self.bump();
            } else {
                break;
            }
        }
        s
    }

    fn lex_number(&mut self, start: Pos) -> Result<TokenKind> {
        let mut s = String::new();
        if self.peek_char() == Some('-') {
            s.push('-');
            self.bump();
        }

        if self.peek_char() == Some('0')
            && matches!(self.peek2_char(), Some('x') | Some('X'))
        {
            self.bump();
            self.bump();
            let mut digits = String::new();
            while let Some(c) = self.peek_char() {
                if c.is_ascii_hexdigit() {
                    digits.push(c);
                    self.bump();
                } else {
                    break;
                }
            }
            let v = i64::from_str_radix(&digits, 16)
                .map_err(|e| self.err(start, format!("invalid hex literal: {e}")))?;
            let v = if s.starts_with('-') { -v } else { v };
            return Ok(TokenKind::Int(v));
        }

        if self.peek_char() == Some('0')
            && matches!(self.peek2_char(), Some('b') | Some('B'))
        {
            self.bump();
            self.bump();
            let mut digits = String::new();
            while let Some(c) = self.peek_char() {
                if c == '0' || c == '1' {
                    digits.push(c);
                    self.bump();
                } else {
                    break;
                }
            }
            let v = i64::from_str_radix(&digits, 2)
                .map_err(|e| self.err(start, format!("invalid binary literal: {e}")))?;
            let v = if s.starts_with('-') { -v } else { v };
            return Ok(TokenKind::Int(v));
        }

        let mut is_float = false;
        while let Some(c) = self.peek_char() {
            if c.is_ascii_digit() {
                s.push(c);
                self.bump();
            } else {
                break;
            }
        }
        if self.peek_char() == Some('.') {
            is_float = true;
            s.push('.');
            self.bump();
            while let Some(c) = self.peek_char() {
                if c.is_ascii_digit() {
                    s.push(c);
                    self.bump();
                } else {
                    break;
                }
            }
        }
        if matches!(self.peek_char(), Some('e') | Some('E')) {
            is_float = true;
            s.push('e');
            self.bump();
            if matches!(self.peek_char(), Some('+') | Some('-')) {
                s.push(self.bump().unwrap());
            }
            while let Some(c) = self.peek_char() {
                if c.is_ascii_digit() {
                    s.push(c);
                    self.bump();
                } else {
                    break;
                }
            }
        }

        if is_float {
            let v: f64 = s
                .parse()
                .map_err(|_| self.err(start, format!("invalid float literal `{s}`")))?;
            Ok(TokenKind::Float(v))
        } else {
            let v: i64 = s
                .parse()
                .map_err(|_| self.err(start, format!("invalid integer literal `{s}`")))?;
            Ok(TokenKind::Int(v))
        }
    }

    fn lex_string(&mut self, start: Pos) -> Result<TokenKind> {
        self.bump(); // opening quote
        let mut s = String::new();
        loop {
            match self.bump() {
                None => return Err(self.err(start, "unterminated string literal")),
                Some('"') => break,
                Some('\\') => match self.bump() {
                    Some('\\') => s.push('\\'),
                    Some('/') => s.push('/'),
                    Some('"') => s.push('"'),
                    Some('b') => s.push('\u{8}'),
                    Some('f') => s.push('\u{c}'),
                    Some('n') => s.push('\n'),
                    Some('r') => s.push('\r'),
                    Some('t') => s.push('\t'),
                    Some('u') => {
                        let mut hex = String::new();
                        for _ in 0..4 {
                            match self.bump() {
                                Some(c) if c.is_ascii_hexdigit() => hex.push(c),
                                _ => return Err(self.err(start, "invalid \\u escape")),
                            }
                        }
                        let code = u32::from_str_radix(&hex, 16)
                            .map_err(|e| self.err(start, format!("invalid \\u escape: {e}")))?;
                        let c = char::from_u32(code)
                            .ok_or_else(|| self.err(start, "invalid \\u escape codepoint"))?;
                        s.push(c);
                    }
                    _ => return Err(self.err(start, "invalid escape sequence")),
                },
                Some(c) => s.push(c),
            }
        }
        Ok(TokenKind::Str(s))
    }

    pub fn next_token(&mut self) -> Result<Token> {
        self.skip_trivia()?;
        let pos = self.pos();
        let kind = match self.peek_char() {
            None => TokenKind::Eof,
            Some('(') => {
                self.bump();
                TokenKind::LParen
            }
            Some(')') => {
                self.bump();
                TokenKind::RParen
            }
            Some('{') => {
                self.bump();
                TokenKind::LBrace
            }
            Some('}') => {
                self.bump();
                TokenKind::RBrace
            }
            Some('[') => {
                self.bump();
                TokenKind::LBrack
            }
            Some(']') => {
                self.bump();
                TokenKind::RBrack
            }
            Some(',') => {
                self.bump();
                TokenKind::Comma
            }
            Some(';') => {
                self.bump();
                TokenKind::Semicolon
            }
            Some('=') => {
                self.bump();
                TokenKind::Equals
            }
            Some('@') => {
                self.bump();
                TokenKind::At
            }
            Some('#') => {
                self.bump();
                if self.peek_char() == Some('!') {
                    self.bump();
                    TokenKind::HashBang
                } else {
                    TokenKind::Hash
                }
            }
            Some('"') => self.lex_string(pos)?,
            Some(c) if c.is_ascii_digit() || (c == '-' && self.peek2_char().map_or(false, |d| d.is_ascii_digit())) => {
                self.lex_number(pos)?
            }
            Some(c) if c.is_alphabetic() || c == '_' => TokenKind::Ident(self.lex_ident()),
            Some(c) => return Err(self.err(pos, format!("unexpected character `{c}`"))),
        };
        Ok(Token { kind, pos })
    }

    /// Lex the full source into a token vector terminated by `Eof`.
    pub fn tokenize(mut self) -> Result<Vec<Token>> {
        let mut tokens = Vec::new();
        loop {
            let tok = self.next_token()?;
            let is_eof = tok.kind == TokenKind::Eof;
            tokens.push(tok);
            if is_eof {
                break;
            }
        }
        Ok(tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        Lexer::new(src, "test")
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn skips_comments() {
        let k = kinds("// hi\nfoo /* block */ bar");
        assert_eq!(
            k,
            vec![
                TokenKind::Ident("foo".into()),
                TokenKind::Ident("bar".into()),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn lexes_number_forms() {
        assert_eq!(kinds("10"), vec![TokenKind::Int(10), TokenKind::Eof]);
        assert_eq!(kinds("0x1F"), vec![TokenKind::Int(31), TokenKind::Eof]);
        assert_eq!(kinds("0b101"), vec![TokenKind::Int(5), TokenKind::Eof]);
        assert_eq!(kinds("1.5"), vec![TokenKind::Float(1.5), TokenKind::Eof]);
        assert_eq!(kinds("-3"), vec![TokenKind::Int(-3), TokenKind::Eof]);
    }

    #[test]
    fn lexes_escaped_string() {
        let k = kinds(r#""a\nbA""#);
        assert_eq!(k, vec![TokenKind::Str("a\nbA".into()), TokenKind::Eof]);
    }
}
