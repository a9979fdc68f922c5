//! Decoder for the Lua literal syntax that sidecar files are written in.
//!
//! Only literal data is accepted: table constructors, strings, numbers,
//! booleans and `nil`, optionally preceded by comments and a `return`.
//! Decoding is a pure function of the input text.

use crate::error::{DecodeError, DecodeErrorKind};
use crate::value::{Key, Value};

/// Tables nested deeper than this are rejected instead of recursing further.
pub const MAX_DEPTH: usize = 200;

/// Decode a sidecar file (or a bare literal) into a value tree.
pub fn decode(text: &str) -> Result<Value, DecodeError> {
    let mut parser = Parser::new(text);

    parser.skip_trivia()?;
    if parser.eat_keyword("return") {
        parser.skip_trivia()?;
    }
    let value = parser.parse_value(0)?;

    parser.skip_trivia()?;
    if parser.peek() == Some(b';') {
        parser.pos += 1;
        parser.skip_trivia()?;
    }
    if parser.pos < parser.bytes.len() {
        return Err(parser.error(DecodeErrorKind::TrailingInput));
    }

    Ok(value)
}

struct Parser<'a> {
    text: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_'
}

fn is_ident_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

impl<'a> Parser<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            text,
            bytes: text.as_bytes(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.bytes.get(self.pos + offset).copied()
    }

    fn error(&self, kind: DecodeErrorKind) -> DecodeError {
        self.error_at(self.pos, kind)
    }

    fn error_at(&self, pos: usize, kind: DecodeErrorKind) -> DecodeError {
        let consumed = &self.bytes[..pos.min(self.bytes.len())];
        let line = consumed.iter().filter(|&&b| b == b'\n').count() + 1;
        let line_start = consumed
            .iter()
            .rposition(|&b| b == b'\n')
            .map_or(0, |i| i + 1);
        let column = String::from_utf8_lossy(&consumed[line_start..]).chars().count() + 1;
        DecodeError { kind, line, column }
    }

    /// Error for whatever sits at the cursor: end of input or a stray char.
    fn unexpected(&self) -> DecodeError {
        match self.text.get(self.pos..).and_then(|rest| rest.chars().next()) {
            Some(c) => self.error(DecodeErrorKind::UnexpectedChar(c)),
            None => self.error(DecodeErrorKind::UnexpectedEnd),
        }
    }

    fn expect(&mut self, byte: u8) -> Result<(), DecodeError> {
        if self.peek() == Some(byte) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.unexpected())
        }
    }

    /// Skip whitespace and comments.
    fn skip_trivia(&mut self) -> Result<(), DecodeError> {
        loop {
            match self.peek() {
                Some(b) if b.is_ascii_whitespace() => self.pos += 1,
                Some(b'-') if self.peek_at(1) == Some(b'-') => {
                    self.pos += 2;
                    if let Some(level) = self.long_bracket_level() {
                        self.read_long_bracket(level)?;
                    } else {
                        while let Some(b) = self.peek() {
                            if b == b'\n' {
                                break;
                            }
                            self.pos += 1;
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn eat_keyword(&mut self, word: &str) -> bool {
        let end = self.pos + word.len();
        let matches = self.bytes.get(self.pos..end) == Some(word.as_bytes())
            && !self.bytes.get(end).copied().is_some_and(is_ident_char);
        if matches {
            self.pos = end;
        }
        matches
    }

    fn parse_value(&mut self, depth: usize) -> Result<Value, DecodeError> {
        match self.peek() {
            None => Err(self.error(DecodeErrorKind::UnexpectedEnd)),
            Some(b'{') => {
                if depth >= MAX_DEPTH {
                    return Err(self.error(DecodeErrorKind::TooDeep));
                }
                self.parse_table(depth + 1)
            }
            Some(quote @ (b'"' | b'\'')) => self.parse_quoted(quote).map(Value::Str),
            Some(b'[') => match self.long_bracket_level() {
                Some(level) => {
                    let bytes = self.read_long_bracket(level)?;
                    self.utf8(bytes, self.pos).map(Value::Str)
                }
                None => Err(self.unexpected()),
            },
            Some(b) if b == b'-' || b.is_ascii_digit() => self.parse_number(),
            Some(b'.') if self.peek_at(1).is_some_and(|b| b.is_ascii_digit()) => {
                self.parse_number()
            }
            Some(b) if is_ident_start(b) => {
                if self.eat_keyword("nil") {
                    Ok(Value::Nil)
                } else if self.eat_keyword("true") {
                    Ok(Value::Bool(true))
                } else if self.eat_keyword("false") {
                    Ok(Value::Bool(false))
                } else {
                    Err(self.unexpected())
                }
            }
            Some(_) => Err(self.unexpected()),
        }
    }

    fn parse_table(&mut self, depth: usize) -> Result<Value, DecodeError> {
        self.expect(b'{')?;
        let mut entries: Vec<(Key, Value)> = Vec::new();
        let mut next_index: i64 = 1;

        loop {
            self.skip_trivia()?;
            match self.peek() {
                None => return Err(self.error(DecodeErrorKind::UnexpectedEnd)),
                Some(b'}') => {
                    self.pos += 1;
                    break;
                }
                _ => {}
            }

            if self.peek() == Some(b'[') && self.long_bracket_level().is_none() {
                self.pos += 1;
                self.skip_trivia()?;
                let key_pos = self.pos;
                let key = self.parse_value(depth)?;
                let key = self.to_key(key, key_pos)?;
                self.skip_trivia()?;
                self.expect(b']')?;
                self.skip_trivia()?;
                self.expect(b'=')?;
                self.skip_trivia()?;
                let value = self.parse_value(depth)?;
                entries.push((key, value));
            } else if let Some((name, after)) = self.ident_assignment() {
                self.pos = after;
                self.skip_trivia()?;
                let value = self.parse_value(depth)?;
                entries.push((Key::Str(name), value));
            } else {
                let value = self.parse_value(depth)?;
                entries.push((Key::Int(next_index), value));
                next_index += 1;
            }

            self.skip_trivia()?;
            match self.peek() {
                Some(b',' | b';') => self.pos += 1,
                Some(b'}') => {}
                _ => return Err(self.unexpected()),
            }
        }

        Ok(Value::table(entries))
    }

    /// If the cursor sits on `name =` (and not `name ==`), return the name
    /// and the position just past the `=`.
    fn ident_assignment(&self) -> Option<(String, usize)> {
        if !self.peek().is_some_and(is_ident_start) {
            return None;
        }
        let start = self.pos;
        let mut end = start;
        while self.bytes.get(end).copied().is_some_and(is_ident_char) {
            end += 1;
        }
        let mut cursor = end;
        while self.bytes.get(cursor).is_some_and(|b| b.is_ascii_whitespace()) {
            cursor += 1;
        }
        let is_assignment = self.bytes.get(cursor) == Some(&b'=')
            && self.bytes.get(cursor + 1) != Some(&b'=');
        is_assignment.then(|| (self.text[start..end].to_string(), cursor + 1))
    }

    fn to_key(&self, key: Value, pos: usize) -> Result<Key, DecodeError> {
        match key {
            Value::Int(i) => Ok(Key::Int(i)),
            Value::Str(s) => Ok(Key::Str(s)),
            Value::Float(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
                Ok(Key::Int(f as i64))
            }
            Value::Float(f) => Err(self.error_at(pos, DecodeErrorKind::UnsupportedKey(f.to_string()))),
            other => Err(self.error_at(
                pos,
                DecodeErrorKind::UnsupportedKey(other.type_name().to_string()),
            )),
        }
    }

    fn parse_number(&mut self) -> Result<Value, DecodeError> {
        let text = self.text;
        let start = self.pos;
        let negative = self.peek() == Some(b'-');
        if negative {
            self.pos += 1;
            while self.peek().is_some_and(|b| b == b' ' || b == b'\t') {
                self.pos += 1;
            }
        }
        let digits_start = self.pos;

        if self.peek() == Some(b'0') && matches!(self.peek_at(1), Some(b'x' | b'X')) {
            self.pos += 2;
            let hex_start = self.pos;
            while self.peek().is_some_and(|b| b.is_ascii_hexdigit()) {
                self.pos += 1;
            }
            let hex = &text[hex_start..self.pos];
            let literal = &text[start..self.pos];
            let magnitude = i64::from_str_radix(hex, 16).map_err(|_| {
                self.error_at(start, DecodeErrorKind::InvalidNumber(literal.to_string()))
            })?;
            return Ok(Value::Int(if negative { -magnitude } else { magnitude }));
        }

        let mut is_float = false;
        while let Some(b) = self.peek() {
            match b {
                b'0'..=b'9' => self.pos += 1,
                b'.' => {
                    is_float = true;
                    self.pos += 1;
                }
                b'e' | b'E' => {
                    is_float = true;
                    self.pos += 1;
                    if matches!(self.peek(), Some(b'+' | b'-')) {
                        self.pos += 1;
                    }
                }
                _ => break,
            }
        }
        if self.peek().is_some_and(is_ident_char) {
            while self.peek().is_some_and(is_ident_char) {
                self.pos += 1;
            }
            return Err(self.error_at(
                start,
                DecodeErrorKind::InvalidNumber(text[start..self.pos].to_string()),
            ));
        }

        let digits = &text[digits_start..self.pos];
        let end = self.pos;
        let invalid =
            || self.error_at(start, DecodeErrorKind::InvalidNumber(text[start..end].to_string()));
        if digits.is_empty() {
            return Err(invalid());
        }

        let signed = if negative {
            format!("-{}", digits)
        } else {
            digits.to_string()
        };
        if !is_float {
            if let Ok(i) = signed.parse::<i64>() {
                return Ok(Value::Int(i));
            }
        }
        signed
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|_| invalid())
    }

    fn parse_quoted(&mut self, quote: u8) -> Result<String, DecodeError> {
        let start = self.pos;
        self.pos += 1;
        let mut buf = Vec::new();

        loop {
            match self.peek() {
                None => return Err(self.error(DecodeErrorKind::UnexpectedEnd)),
                Some(b) if b == quote => {
                    self.pos += 1;
                    break;
                }
                Some(b'\n') => return Err(self.unexpected()),
                Some(b'\\') => {
                    self.pos += 1;
                    self.parse_escape(&mut buf)?;
                }
                Some(b) => {
                    buf.push(b);
                    self.pos += 1;
                }
            }
        }

        self.utf8(buf, start)
    }

    fn parse_escape(&mut self, buf: &mut Vec<u8>) -> Result<(), DecodeError> {
        let text = self.text;
        let escape_pos = self.pos;
        let b = self
            .peek()
            .ok_or_else(|| self.error(DecodeErrorKind::UnexpectedEnd))?;
        self.pos += 1;

        let invalid = |parser: &Self, what: &str| {
            parser.error_at(escape_pos, DecodeErrorKind::InvalidEscape(what.to_string()))
        };

        match b {
            b'n' => buf.push(b'\n'),
            b't' => buf.push(b'\t'),
            b'r' => buf.push(b'\r'),
            b'a' => buf.push(0x07),
            b'b' => buf.push(0x08),
            b'f' => buf.push(0x0c),
            b'v' => buf.push(0x0b),
            b'\\' | b'"' | b'\'' => buf.push(b),
            b'\n' => {
                buf.push(b'\n');
                if self.peek() == Some(b'\r') {
                    self.pos += 1;
                }
            }
            b'\r' => {
                buf.push(b'\n');
                if self.peek() == Some(b'\n') {
                    self.pos += 1;
                }
            }
            b'z' => {
                while self.peek().is_some_and(|b| b.is_ascii_whitespace()) {
                    self.pos += 1;
                }
            }
            b'x' => {
                let hex = text
                    .get(self.pos..self.pos + 2)
                    .filter(|h| h.bytes().all(|b| b.is_ascii_hexdigit()))
                    .ok_or_else(|| invalid(self, "x"))?;
                let byte = u8::from_str_radix(hex, 16).map_err(|_| invalid(self, hex))?;
                buf.push(byte);
                self.pos += 2;
            }
            b'u' => {
                self.expect(b'{').map_err(|_| invalid(self, "u"))?;
                let hex_start = self.pos;
                while self.peek().is_some_and(|b| b.is_ascii_hexdigit()) {
                    self.pos += 1;
                }
                let hex = &text[hex_start..self.pos];
                self.expect(b'}').map_err(|_| invalid(self, "u"))?;
                let c = u32::from_str_radix(hex, 16)
                    .ok()
                    .and_then(char::from_u32)
                    .ok_or_else(|| invalid(self, &format!("u{{{}}}", hex)))?;
                let mut utf8 = [0u8; 4];
                buf.extend_from_slice(c.encode_utf8(&mut utf8).as_bytes());
            }
            b'0'..=b'9' => {
                let digits_start = self.pos - 1;
                while self.pos - digits_start < 3 && self.peek().is_some_and(|b| b.is_ascii_digit()) {
                    self.pos += 1;
                }
                let digits = &text[digits_start..self.pos];
                let byte = digits.parse::<u8>().map_err(|_| invalid(self, digits))?;
                buf.push(byte);
            }
            other => {
                let shown = text[escape_pos..]
                    .chars()
                    .next()
                    .map_or_else(|| (other as char).to_string(), |c| c.to_string());
                return Err(invalid(self, &shown));
            }
        }
        Ok(())
    }

    /// If the cursor sits on `[[` or `[==[`, return the number of `=` signs.
    fn long_bracket_level(&self) -> Option<usize> {
        if self.peek() != Some(b'[') {
            return None;
        }
        let mut level = 0;
        while self.peek_at(1 + level) == Some(b'=') {
            level += 1;
        }
        (self.peek_at(1 + level) == Some(b'[')).then_some(level)
    }

    fn read_long_bracket(&mut self, level: usize) -> Result<Vec<u8>, DecodeError> {
        self.pos += level + 2;
        // A newline right after the opening bracket is not part of the string.
        if self.peek() == Some(b'\r') {
            self.pos += 1;
        }
        if self.peek() == Some(b'\n') {
            self.pos += 1;
        }

        let mut close = Vec::with_capacity(level + 2);
        close.push(b']');
        close.extend(std::iter::repeat(b'=').take(level));
        close.push(b']');

        let rest = &self.bytes[self.pos..];
        match rest.windows(close.len()).position(|w| w == close.as_slice()) {
            Some(offset) => {
                let content = rest[..offset].to_vec();
                self.pos += offset + close.len();
                Ok(content)
            }
            None => {
                self.pos = self.bytes.len();
                Err(self.error(DecodeErrorKind::UnexpectedEnd))
            }
        }
    }

    fn utf8(&self, bytes: Vec<u8>, start: usize) -> Result<String, DecodeError> {
        String::from_utf8(bytes).map_err(|_| self.error_at(start, DecodeErrorKind::InvalidUtf8))
    }
}
