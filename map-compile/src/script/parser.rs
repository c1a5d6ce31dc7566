//! Recursive-descent parser over the lexer's token stream.
//!
//! Grammar mirrors `mapscriptparser.py`'s `parsy` combinators one-to-one:
//! `script_file := script_fn*`, `script_fn := outer_attr* 'script' ident
//! '(' ')' '{' command* '}'`, and the separate `inline_block` entry point
//! used for a trigger's inline script body (`#!` attributes, no
//! surrounding `script name() { }`).

use super::lexer::{Lexer, Pos, Token, TokenKind};
use crate::error::{CompileError, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Int(i64),
    Float(f64),
    String(String),
    Ident(String),
    Special(String),
    Color(u32),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Ident(_) => "identifier",
            Value::Special(_) => "special",
            Value::Color(_) => "color",
        }
    }

    pub fn is_special(&self, name: &str) -> bool {
        matches!(self, Value::Special(s) if s == name)
    }
}

#[derive(Debug, Clone)]
pub struct Spanned<T> {
    pub pos: Pos,
    pub value: T,
}

#[derive(Debug, Clone)]
pub struct Command {
    pub pos: Pos,
    pub name: String,
    pub positional: Vec<Spanned<Value>>,
    pub keyword: Vec<(String, Spanned<Value>)>,
}

impl Command {
    pub fn synthetic_return(pos: Pos) -> Self {
        Command {
            pos,
            name: "return".to_string(),
            positional: Vec::new(),
            keyword: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScriptFunc {
    pub pos: Pos,
    pub attributes: Vec<String>,
    pub name: Option<String>,
    pub singleton: bool,
    pub commands: Vec<Command>,
    /// Rendered diagnostic label: `map` at top level, `trigger <id>` for
    /// an inline trigger script.
    pub source_label: String,
}

pub struct Parser {
    tokens: Vec<Token>,
    pos_idx: usize,
    source_label: String,
}

impl Parser {
    fn new(tokens: Vec<Token>, source_label: impl Into<String>) -> Self {
        Parser {
            tokens,
            pos_idx: 0,
            source_label: source_label.into(),
        }
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.pos_idx]
    }

    fn bump(&mut self) -> Token {
        let tok = self.tokens[self.pos_idx].clone();
        if self.pos_idx + 1 < self.tokens.len() {
            self.pos_idx += 1;
        }
        tok
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

    fn expect(&mut self, kind: &TokenKind) -> Result<Token> {
        if &self.peek().kind == kind {
            Ok(self.bump())
        } else {
            let pos = self.peek().pos;
            Err(self.err(pos, format!("expected {:?}, got {:?}", kind, self.peek().kind)))
        }
    }

    fn expect_ident(&mut self) -> Result<(String, Pos)> {
        let pos = self.peek().pos;
        match self.bump().kind {
            TokenKind::Ident(s) => Ok((s, pos)),
            other => Err(self.err(pos, format!("expected identifier, got {other:?}"))),
        }
    }

    fn parse_value(&mut self) -> Result<Spanned<Value>> {
        let pos = self.peek().pos;
        match self.peek().kind.clone() {
            TokenKind::Int(v) => {
                self.bump();
                Ok(Spanned { pos, value: Value::Int(v) })
            }
            TokenKind::Float(v) => {
                self.bump();
                Ok(Spanned { pos, value: Value::Float(v) })
            }
            TokenKind::Str(s) => {
                self.bump();
                Ok(Spanned { pos, value: Value::String(s) })
            }
            TokenKind::At => {
                self.bump();
                let (name, _) = self.expect_ident()?;
                Ok(Spanned { pos, value: Value::Special(name) })
            }
            TokenKind::Ident(name) if name == "null" => {
                self.bump();
                Ok(Spanned { pos, value: Value::Null })
            }
            TokenKind::Ident(name) if name == "color" && self.tokens.get(self.pos_idx + 1).map(|t| &t.kind) == Some(&TokenKind::LParen) => {
                self.bump();
                self.expect(&TokenKind::LParen)?;
                let r = self.parse_color_component()?;
                self.expect(&TokenKind::Comma)?;
                let g = self.parse_color_component()?;
                self.expect(&TokenKind::Comma)?;
                let b = self.parse_color_component()?;
                self.expect(&TokenKind::Comma)?;
                let a = self.parse_color_component()?;
                self.expect(&TokenKind::RParen)?;
                let packed = ((r as u32) << 24) | ((g as u32) << 16) | ((b as u32) << 8) | (a as u32);
                Ok(Spanned { pos, value: Value::Color(packed) })
            }
            TokenKind::Ident(name) => {
                self.bump();
                Ok(Spanned { pos, value: Value::Ident(name) })
            }
            other => Err(self.err(pos, format!("expected a value, got {other:?}"))),
        }
    }

    /// A `color(...)` component accepts a 0-255 int or a 0.0-1.0 float,
    /// rounded and clamped to a byte exactly as `ScriptColor.__init__` does.
    fn parse_color_component(&mut self) -> Result<u8> {
        let pos = self.peek().pos;
        match self.bump().kind {
            TokenKind::Int(v) => Ok(v.clamp(0, 255) as u8),
            TokenKind::Float(v) => Ok((v * 255.0).round().clamp(0.0, 255.0) as u8),
            other => Err(self.err(pos, format!("expected a number in color component, got {other:?}"))),
        }
    }

    fn parse_arg(&mut self) -> Result<(Option<String>, Spanned<Value>)> {
        if let TokenKind::Ident(name) = &self.peek().kind {
            if self.tokens.get(self.pos_idx + 1).map(|t| &t.kind) == Some(&TokenKind::Equals)
                && name != "null"
                && name != "color"
            {
                let name = name.clone();
                self.bump();
                self.bump(); // '='
                let value = self.parse_value()?;
                return Ok((Some(name), value));
            }
        }
        Ok((None, self.parse_value()?))
    }

    fn parse_command(&mut self) -> Result<Command> {
        let (name, pos) = self.expect_ident()?;
        let mut positional = Vec::new();
        let mut keyword = Vec::new();

        if self.peek().kind == TokenKind::LParen {
            self.bump();
            let mut seen_keyword = false;
            if self.peek().kind != TokenKind::RParen {
                loop {
                    let arg_pos = self.peek().pos;
                    let (kw, value) = self.parse_arg()?;
                    match kw {
                        Some(k) => {
                            seen_keyword = true;
                            keyword.push((k, value));
                        }
                        None => {
                            if seen_keyword {
                                return Err(self.err(
                                    arg_pos,
                                    "positional arguments must come before keyword arguments",
                                ));
                            }
                            positional.push(value);
                        }
                    }
                    if self.peek().kind == TokenKind::Comma {
                        self.bump();
                    } else {
                        break;
                    }
                }
            }
            self.expect(&TokenKind::RParen)?;
        }
        self.expect(&TokenKind::Semicolon)?;

        Ok(Command {
            pos,
            name,
            positional,
            keyword,
        })
    }

    fn parse_outer_attrs(&mut self) -> Result<Vec<String>> {
        let mut attrs = Vec::new();
        while self.peek().kind == TokenKind::Hash {
            self.bump();
            self.expect(&TokenKind::LBrack)?;
            let (name, _) = self.expect_ident()?;
            self.expect(&TokenKind::RBrack)?;
            attrs.push(name);
        }
        Ok(attrs)
    }

    fn parse_inner_attrs(&mut self) -> Result<Vec<String>> {
        let mut attrs = Vec::new();
        while self.peek().kind == TokenKind::HashBang {
            self.bump();
            self.expect(&TokenKind::LBrack)?;
            let (name, _) = self.expect_ident()?;
            self.expect(&TokenKind::RBrack)?;
            attrs.push(name);
        }
        Ok(attrs)
    }

    fn parse_func(&mut self) -> Result<ScriptFunc> {
        let attributes = self.parse_outer_attrs()?;
        let pos = self.peek().pos;
        let (kw, _) = self.expect_ident()?;
        if kw != "script" {
            return Err(self.err(pos, format!("expected `script`, got `{kw}`")));
        }
        let (name, _) = self.expect_ident()?;
        self.expect(&TokenKind::LParen)?;
        self.expect(&TokenKind::RParen)?;
        self.expect(&TokenKind::LBrace)?;
        let mut commands = Vec::new();
        while self.peek().kind != TokenKind::RBrace {
            commands.push(self.parse_command()?);
        }
        self.expect(&TokenKind::RBrace)?;

        let singleton = attributes.iter().any(|a| a == "singleton");

        Ok(ScriptFunc {
            pos,
            attributes,
            name: Some(name),
            singleton,
            commands,
            source_label: self.source_label.clone(),
        })
    }

    fn at_eof(&self) -> bool {
        self.peek().kind == TokenKind::Eof
    }
}

/// Parse a top-level `scripts` map property body into its script functions.
pub fn parse_script_file(source: &str) -> Result<Vec<ScriptFunc>> {
    let tokens = Lexer::new(source, "map").tokenize()?;
    let mut parser = Parser::new(tokens, "map");
    let mut funcs = Vec::new();
    while !parser.at_eof() {
        funcs.push(parser.parse_func()?);
    }
    Ok(funcs)
}

/// Parse an inline trigger script body: `#!` attributes followed by bare
/// commands, with no enclosing `script name() { }`.
pub fn parse_inline_block(source: &str, object_id: u32) -> Result<ScriptFunc> {
    let label = format!("trigger {object_id}");
    let tokens = Lexer::new(source, label.clone()).tokenize()?;
    let mut parser = Parser::new(tokens, label.clone());
    let attributes = parser.parse_inner_attrs()?;
    let pos = parser.peek().pos;
    let mut commands = Vec::new();
    while !parser.at_eof() {
        commands.push(parser.parse_command()?);
    }
    let singleton = attributes.iter().any(|a| a == "singleton");
    Ok(ScriptFunc {
        pos,
        attributes,
        name: None,
        singleton,
        commands,
        source_label: label,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_script() {
        let funcs = parse_script_file("script boot() { return; }").unwrap();
        assert_eq!(funcs.len(), 1);
        assert_eq!(funcs[0].name.as_deref(), Some("boot"));
        assert_eq!(funcs[0].commands.len(), 1);
        assert_eq!(funcs[0].commands[0].name, "return");
    }

    #[test]
    fn parses_startup_attribute_and_args() {
        let funcs = parse_script_file(
            "#[startup]\nscript boot() { wait(30); jump(target=boss); }",
        )
        .unwrap();
        assert!(funcs[0].attributes.iter().any(|a| a == "startup"));
        assert_eq!(funcs[0].commands[1].keyword[0].0, "target");
    }

    #[test]
    fn parses_color_literal() {
        let funcs = parse_script_file("script s() { set_color(color(1.0, 0.5, 0.0, 1.0)); }").unwrap();
        let arg = &funcs[0].commands[0].positional[0];
        assert_eq!(arg.value, Value::Color(0xFF7F00FF));
    }

    #[test]
    fn parses_inline_trigger_block() {
        let func = parse_inline_block("jump(boss);", 7).unwrap();
        assert_eq!(func.source_label, "trigger 7");
        assert_eq!(func.commands.len(), 1);
        assert_eq!(func.commands[0].name, "jump");
    }
}
