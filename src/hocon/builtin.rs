//! Native parser for the HOCON subset found in `clearml.conf`
//!
//! Supported: braceless root, nested objects, `:` / `=` separators (optional
//! before `{`), dotted keys, object merging on duplicate keys, quoted,
//! triple-quoted and unquoted strings, numbers, booleans, null, arrays,
//! `#` and `//` comments, comma or newline field separators.
//!
//! Values on one line concatenate (`a: "x" "y"` is `"x y"`), and an object
//! may open on the line after its key.
//!
//! Substitutions (`${...}`) are not evaluated; they are kept as literal text.
//! `include` directives are skipped. `+=` is rejected.

use std::path::Path;

use async_trait::async_trait;
use serde_json::{Map, Number, Value};
use thiserror::Error;
use tracing::debug;

use super::HoconParser;
use crate::error::{Result, SessionError};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("line {line}: {message}")]
pub struct HoconSyntaxError {
    pub line: usize,
    pub message: String,
}

pub struct BuiltinHoconParser;

#[async_trait]
impl HoconParser for BuiltinHoconParser {
    fn name(&self) -> &str {
        "builtin"
    }

    async fn parse_file(&self, path: &Path) -> Result<Value> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| SessionError::config_parse(path, e))?;
        parse_str(&content).map_err(|e| SessionError::config_parse(path, e))
    }
}

/// Parse a HOCON document
pub fn parse_str(input: &str) -> std::result::Result<Value, HoconSyntaxError> {
    let mut parser = Parser {
        chars: input.chars().collect(),
        pos: 0,
        line: 1,
    };
    parser.document()
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
    line: usize,
}

impl Parser {
    fn document(&mut self) -> std::result::Result<Value, HoconSyntaxError> {
        self.skip_blank();
        let root = if self.peek() == Some('{') {
            self.bump();
            self.fields(Some('}'))?
        } else {
            self.fields(None)?
        };
        self.skip_blank();
        if let Some(c) = self.peek() {
            return Err(self.error(format!("unexpected '{}' after document", c)));
        }
        Ok(Value::Object(root))
    }

    /// Fields until `close` (or end of input for the braceless root)
    fn fields(&mut self, close: Option<char>) -> std::result::Result<Map<String, Value>, HoconSyntaxError> {
        let mut map = Map::new();
        loop {
            self.skip_blank();
            match (self.peek(), close) {
                (None, None) => break,
                (None, Some(c)) => return Err(self.error(format!("missing closing '{}'", c))),
                (Some(c), Some(close)) if c == close => {
                    self.bump();
                    break;
                }
                _ => {}
            }

            if self.at_include() {
                debug!(line = self.line, "Skipping include directive");
                self.skip_line();
                continue;
            }

            let path = self.key_path()?;
            self.skip_inline();
            if matches!(self.peek(), Some('\n') | Some('\r')) {
                // `key` then `{` on a later line
                let mark = (self.pos, self.line);
                self.skip_blank_no_comma();
                if self.peek() != Some('{') {
                    (self.pos, self.line) = mark;
                }
            }
            match self.peek() {
                Some(':') | Some('=') => {
                    self.bump();
                    self.skip_blank_no_comma();
                }
                Some('{') => {}
                Some('+') => return Err(self.error("'+=' is not supported")),
                other => {
                    return Err(self.error(format!(
                        "expected ':' or '=' after key '{}', found {}",
                        path.join("."),
                        describe(other)
                    )))
                }
            }

            let value = self.value(close)?;
            insert_path(&mut map, &path, value);
        }
        Ok(map)
    }

    fn key_path(&mut self) -> std::result::Result<Vec<String>, HoconSyntaxError> {
        let mut path = Vec::new();
        loop {
            let segment = if self.peek() == Some('"') {
                self.quoted()?
            } else {
                let start = self.pos;
                while let Some(c) = self.peek() {
                    if c.is_whitespace() || ".:={}[],#\"".contains(c) || self.at_comment_slash() {
                        break;
                    }
                    self.bump();
                }
                if self.pos == start {
                    return Err(self.error(format!("expected key, found {}", describe(self.peek()))));
                }
                self.chars[start..self.pos].iter().collect()
            };
            path.push(segment);
            if self.peek() == Some('.') {
                self.bump();
            } else {
                return Ok(path);
            }
        }
    }

    fn value(&mut self, close: Option<char>) -> std::result::Result<Value, HoconSyntaxError> {
        match self.peek() {
            Some('{') => {
                self.bump();
                Ok(Value::Object(self.fields(Some('}'))?))
            }
            Some('[') => {
                self.bump();
                self.array()
            }
            _ => self.concatenation(close.map_or("", |_| "}")),
        }
    }

    fn array(&mut self) -> std::result::Result<Value, HoconSyntaxError> {
        let mut items = Vec::new();
        loop {
            self.skip_blank();
            match self.peek() {
                None => return Err(self.error("missing closing ']'")),
                Some(']') => {
                    self.bump();
                    return Ok(Value::Array(items));
                }
                _ => {}
            }
            let item = match self.peek() {
                Some('{') | Some('[') => self.value(Some(']'))?,
                _ => self.concatenation("]}")?,
            };
            items.push(item);
        }
    }

    /// Quoted and unquoted pieces up to end of line, `,`, a comment, or any of `stops`
    ///
    /// A lone unquoted piece becomes a typed scalar; anything else is a string
    /// with the whitespace between pieces kept.
    fn concatenation(&mut self, stops: &str) -> std::result::Result<Value, HoconSyntaxError> {
        let mut pieces: Vec<(String, bool)> = Vec::new();
        loop {
            match self.peek() {
                Some('"') => {
                    let text = if self.starts_with("\"\"\"") {
                        self.triple_quoted()?
                    } else {
                        self.quoted()?
                    };
                    pieces.push((text, true));
                }
                Some(c) if !self.at_value_end(c, stops) => {
                    let start = self.pos;
                    while let Some(c) = self.peek() {
                        if c == '"' || self.at_value_end(c, stops) {
                            break;
                        }
                        self.bump();
                    }
                    pieces.push((self.chars[start..self.pos].iter().collect(), false));
                }
                _ => break,
            }
        }

        if let Some((text, false)) = pieces.last_mut() {
            let trimmed = text.trim_end().len();
            text.truncate(trimmed);
            if text.is_empty() {
                pieces.pop();
            }
        }

        if pieces.len() > 1 {
            return Ok(Value::String(pieces.into_iter().map(|(text, _)| text).collect()));
        }
        match pieces.pop() {
            None => Err(self.error(format!("expected value, found {}", describe(self.peek())))),
            Some((text, true)) => Ok(Value::String(text)),
            Some((text, false)) => Ok(scalar(text.trim())),
        }
    }

    fn at_value_end(&self, c: char, stops: &str) -> bool {
        c == '\n' || c == ',' || c == '#' || stops.contains(c) || self.at_comment_slash()
    }

    /// `include "file"`, `include file(...)`, `include required(...)` and friends
    fn at_include(&self) -> bool {
        const KEYWORD: &str = "include";
        if !self.starts_with(KEYWORD) {
            return false;
        }
        let mut i = self.pos + KEYWORD.len();
        let mut spaced = false;
        while matches!(self.chars.get(i), Some(' ') | Some('\t')) {
            i += 1;
            spaced = true;
        }
        spaced
            && (self.chars.get(i) == Some(&'"')
                || ["file(", "url(", "classpath(", "required("]
                    .iter()
                    .any(|p| self.starts_with_at(i, p)))
    }

    fn quoted(&mut self) -> std::result::Result<String, HoconSyntaxError> {
        self.bump(); // opening quote
        let mut out = String::new();
        loop {
            match self.bump() {
                None | Some('\n') => return Err(self.error("unterminated string")),
                Some('"') => return Ok(out),
                Some('\\') => match self.bump() {
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some('r') => out.push('\r'),
                    Some('"') => out.push('"'),
                    Some('\\') => out.push('\\'),
                    Some('/') => out.push('/'),
                    Some(other) => {
                        out.push('\\');
                        out.push(other);
                    }
                    None => return Err(self.error("unterminated string")),
                },
                Some(c) => out.push(c),
            }
        }
    }

    fn triple_quoted(&mut self) -> std::result::Result<String, HoconSyntaxError> {
        self.pos += 3;
        let start = self.pos;
        // Quotes directly before the closing `"""` belong to the string
        while !self.starts_with("\"\"\"") || self.starts_with("\"\"\"\"") {
            if self.bump().is_none() {
                return Err(self.error("unterminated triple-quoted string"));
            }
        }
        let out = self.chars[start..self.pos].iter().collect();
        self.pos += 3;
        Ok(out)
    }

    /// Skip whitespace, newlines, commas and comments
    fn skip_blank(&mut self) {
        loop {
            match self.peek() {
                Some(c) if c.is_whitespace() || c == ',' => {
                    self.bump();
                }
                Some('#') => self.skip_line(),
                Some('/') if self.starts_with("//") => self.skip_line(),
                _ => return,
            }
        }
    }

    fn skip_blank_no_comma(&mut self) {
        loop {
            match self.peek() {
                Some(c) if c.is_whitespace() => {
                    self.bump();
                }
                Some('#') => self.skip_line(),
                Some('/') if self.starts_with("//") => self.skip_line(),
                _ => return,
            }
        }
    }

    fn skip_inline(&mut self) {
        while matches!(self.peek(), Some(' ') | Some('\t')) {
            self.bump();
        }
    }

    fn skip_line(&mut self) {
        while let Some(c) = self.peek() {
            if c == '\n' {
                return;
            }
            self.bump();
        }
    }

    /// `//` starts a comment only at the beginning of a token or after whitespace,
    /// so `http://host` stays a value.
    fn at_comment_slash(&self) -> bool {
        self.starts_with("//")
            && (self.pos == 0 || self.chars[self.pos - 1].is_whitespace())
    }

    fn starts_with(&self, s: &str) -> bool {
        self.starts_with_at(self.pos, s)
    }

    fn starts_with_at(&self, mut i: usize, s: &str) -> bool {
        for c in s.chars() {
            if self.chars.get(i) != Some(&c) {
                return false;
            }
            i += 1;
        }
        true
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
        }
        Some(c)
    }

    fn error(&self, message: impl Into<String>) -> HoconSyntaxError {
        HoconSyntaxError {
            line: self.line,
            message: message.into(),
        }
    }
}

fn describe(c: Option<char>) -> String {
    match c {
        None => "end of input".to_string(),
        Some('\n') => "end of line".to_string(),
        Some(c) => format!("'{}'", c),
    }
}

/// Typed scalar when the text round-trips exactly, string otherwise
fn scalar(text: &str) -> Value {
    match text {
        "true" | "yes" | "on" => return Value::Bool(true),
        "false" | "no" | "off" => return Value::Bool(false),
        "null" => return Value::Null,
        _ => {}
    }
    if let Ok(n) = text.parse::<i64>() {
        if n.to_string() == text {
            return Value::Number(n.into());
        }
    }
    if let Some(n) = text.parse::<f64>().ok().and_then(Number::from_f64) {
        if n.to_string() == text {
            return Value::Number(n);
        }
    }
    Value::String(text.to_string())
}

/// Insert at a dotted path, merging objects that already exist
fn insert_path(map: &mut Map<String, Value>, path: &[String], value: Value) {
    let (last, parents) = match path.split_last() {
        Some(split) => split,
        None => return,
    };
    let mut current = map;
    for key in parents {
        let entry = current
            .entry(key.clone())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        current = match entry {
            Value::Object(m) => m,
            _ => unreachable!("entry was just made an object"),
        };
    }
    match value {
        Value::Object(incoming) if matches!(current.get(last), Some(Value::Object(_))) => {
            if let Some(Value::Object(existing)) = current.get_mut(last) {
                for (k, v) in incoming {
                    insert_path(existing, &[k], v);
                }
            }
        }
        value => {
            current.insert(last.clone(), value);
        }
    }
}
