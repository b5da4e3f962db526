//! Deterministic, diffable text encoding for persisted records.
//!
//! Records are converted through `serde_json::Value` and written as
//! Python-literal-like data text:
//!
//! - map keys always sorted,
//! - collections with [`WRAP_THRESHOLD`] or more elements written one
//!   element per line, each line ending in `,`,
//! - strings single-quoted with backslash escapes,
//! - exact decimals carried as strings.
//!
//! Small edits to a record therefore touch as few lines as possible in
//! version control, and the decoder only ever reads data.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Number, Value};
use std::fmt;

/// Collections at or above this length are wrapped one element per line.
pub const WRAP_THRESHOLD: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReprError {
    pub line: usize,
    pub message: String,
}

impl fmt::Display for ReprError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

impl std::error::Error for ReprError {}

/// Serialize a record into its canonical text form (with trailing newline).
pub fn to_string<T: Serialize>(record: &T) -> Result<String, ReprError> {
    let value = serde_json::to_value(record).map_err(|e| ReprError {
        line: 0,
        message: e.to_string(),
    })?;
    let mut out = render(&value);
    out.push('\n');
    Ok(out)
}

/// Parse canonical text back into a record.
pub fn from_str<T: DeserializeOwned>(text: &str) -> Result<T, ReprError> {
    let value = parse(text)?;
    serde_json::from_value(value).map_err(|e| ReprError {
        line: 0,
        message: e.to_string(),
    })
}

pub fn render(value: &Value) -> String {
    let mut out = String::new();
    write_value(&mut out, value);
    out
}

fn write_value(out: &mut String, value: &Value) {
    match value {
        Value::Null => out.push_str("None"),
        Value::Bool(true) => out.push_str("True"),
        Value::Bool(false) => out.push_str("False"),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => write_str(out, s),
        Value::Array(items) => {
            let rendered: Vec<String> = items.iter().map(render).collect();
            write_collection(out, '[', ']', rendered);
        }
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let rendered: Vec<String> = entries
                .into_iter()
                .map(|(k, v)| {
                    let mut item = String::new();
                    write_str(&mut item, k);
                    item.push_str(": ");
                    write_value(&mut item, v);
                    item
                })
                .collect();
            write_collection(out, '{', '}', rendered);
        }
    }
}

fn write_collection(out: &mut String, open: char, close: char, items: Vec<String>) {
    out.push(open);
    if items.len() >= WRAP_THRESHOLD {
        out.push('\n');
        for item in items {
            out.push_str(&item);
            out.push_str(",\n");
        }
    } else {
        out.push_str(&items.join(", "));
    }
    out.push(close);
}

fn write_str(out: &mut String, s: &str) {
    out.push('\'');
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 || c as u32 == 0x7f => {
                out.push_str(&format!("\\x{:02x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push('\'');
}

/// Parse data text. Accepts the rendered grammar plus either quote style,
/// tuples (read as lists) and legacy `Decimal('..')` wrappers.
pub fn parse(text: &str) -> Result<Value, ReprError> {
    let mut parser = Parser {
        src: text,
        pos: 0,
        line: 1,
    };
    parser.skip_ws();
    let value = parser.value()?;
    parser.skip_ws();
    if parser.pos < parser.src.len() {
        return Err(parser.error("trailing characters after value"));
    }
    Ok(value)
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
    line: usize,
}

impl<'a> Parser<'a> {
    fn error(&self, message: impl Into<String>) -> ReprError {
        ReprError {
            line: self.line,
            message: message.into(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        if c == '\n' {
            self.line += 1;
        }
        Some(c)
    }

    fn skip_ws(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.bump();
            } else {
                break;
            }
        }
    }

    fn eat_keyword(&mut self, word: &str) -> bool {
        if self.src[self.pos..].starts_with(word) {
            self.pos += word.len();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, want: char) -> Result<(), ReprError> {
        self.skip_ws();
        match self.bump() {
            Some(c) if c == want => Ok(()),
            Some(c) => Err(self.error(format!("expected '{}', found '{}'", want, c))),
            None => Err(self.error(format!("expected '{}', found end of input", want))),
        }
    }

    fn value(&mut self) -> Result<Value, ReprError> {
        self.skip_ws();
        match self.peek() {
            None => Err(self.error("unexpected end of input")),
            Some('\'') | Some('"') => Ok(Value::String(self.string()?)),
            Some('[') => Ok(Value::Array(self.sequence('[', ']')?)),
            Some('(') => Ok(Value::Array(self.sequence('(', ')')?)),
            Some('{') => self.map(),
            Some(c) if c == '-' || c.is_ascii_digit() => self.number(),
            Some(_) => {
                if self.eat_keyword("None") {
                    Ok(Value::Null)
                } else if self.eat_keyword("True") {
                    Ok(Value::Bool(true))
                } else if self.eat_keyword("False") {
                    Ok(Value::Bool(false))
                } else if self.eat_keyword("Decimal(") {
                    self.skip_ws();
                    let digits = self.string()?;
                    self.expect(')')?;
                    Ok(Value::String(digits))
                } else {
                    Err(self.error("unrecognized token"))
                }
            }
        }
    }

    fn sequence(&mut self, open: char, close: char) -> Result<Vec<Value>, ReprError> {
        self.expect(open)?;
        let mut items = Vec::new();
        loop {
            self.skip_ws();
            if self.peek() == Some(close) {
                self.bump();
                return Ok(items);
            }
            items.push(self.value()?);
            self.skip_ws();
            match self.bump() {
                Some(',') => continue,
                Some(c) if c == close => return Ok(items),
                _ => return Err(self.error(format!("expected ',' or '{}'", close))),
            }
        }
    }

    fn map(&mut self) -> Result<Value, ReprError> {
        self.expect('{')?;
        let mut map = Map::new();
        loop {
            self.skip_ws();
            if self.peek() == Some('}') {
                self.bump();
                return Ok(Value::Object(map));
            }
            let key = match self.peek() {
                Some('\'') | Some('"') => self.string()?,
                _ => return Err(self.error("map keys must be strings")),
            };
            self.expect(':')?;
            let value = self.value()?;
            if map.insert(key.clone(), value).is_some() {
                return Err(self.error(format!("duplicate map key '{}'", key)));
            }
            self.skip_ws();
            match self.bump() {
                Some(',') => continue,
                Some('}') => return Ok(Value::Object(map)),
                _ => return Err(self.error("expected ',' or '}'")),
            }
        }
    }

    fn number(&mut self) -> Result<Value, ReprError> {
        let start = self.pos;
        if self.peek() == Some('-') {
            self.bump();
        }
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '+' | '-') {
                self.bump();
            } else {
                break;
            }
        }
        let literal = &self.src[start..self.pos];
        if let Ok(i) = literal.parse::<i64>() {
            return Ok(Value::Number(Number::from(i)));
        }
        if let Ok(u) = literal.parse::<u64>() {
            return Ok(Value::Number(Number::from(u)));
        }
        literal
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| self.error(format!("invalid number '{}'", literal)))
    }

    fn string(&mut self) -> Result<String, ReprError> {
        let quote = match self.bump() {
            Some(q @ ('\'' | '"')) => q,
            _ => return Err(self.error("expected string")),
        };
        let mut out = String::new();
        loop {
            match self.bump() {
                None => return Err(self.error("unterminated string")),
                Some('\n') => return Err(self.error("newline inside string")),
                Some(c) if c == quote => return Ok(out),
                Some('\\') => {
                    let escaped = self
                        .bump()
                        .ok_or_else(|| self.error("unterminated escape"))?;
                    match escaped {
                        '\\' => out.push('\\'),
                        '\'' => out.push('\''),
                        '"' => out.push('"'),
                        'n' => out.push('\n'),
                        'r' => out.push('\r'),
                        't' => out.push('\t'),
                        '0' => out.push('\0'),
                        'x' => out.push(self.hex_escape(2)?),
                        'u' => out.push(self.hex_escape(4)?),
                        other => return Err(self.error(format!("unknown escape '\\{}'", other))),
                    }
                }
                Some(c) => out.push(c),
            }
        }
    }

    fn hex_escape(&mut self, width: usize) -> Result<char, ReprError> {
        let end = self.pos + width;
        let digits = self
            .src
            .get(self.pos..end)
            .ok_or_else(|| self.error("truncated hex escape"))?;
        let code = u32::from_str_radix(digits, 16)
            .map_err(|_| self.error(format!("invalid hex escape '{}'", digits)))?;
        self.pos = end;
        char::from_u32(code).ok_or_else(|| self.error("hex escape is not a character"))
    }
}
