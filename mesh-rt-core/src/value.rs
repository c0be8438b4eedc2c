//! Tagged dynamic value model and the hand-rolled wire codec (§3.1, §4.A).
//!
//! `Cons` and `Map` are the only mutable, potentially-cyclic shapes in the
//! model; both are stored in an [`Arena`] and referenced by integer
//! [`Handle`], per the design note in SPEC_FULL.md §9 ("arena + integer
//! handle, not Rc<RefCell<>>").

use crate::error::CodecError;
use std::fmt;

/// Index into an [`Arena`]'s cons or map storage.
pub type Handle = u32;

/// A tagged dynamic value (§3.1).
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Int(i32),
    Float(f32),
    String(String),
    /// Immutable two-tuple; used for map bindings and property pairs.
    Pair(Box<Value>, Box<Value>),
    /// Mutable cons cell, stored in the arena.
    Cons(Handle),
    /// Insert-prepend association list, stored in the arena.
    Map(Handle),
}

impl Value {
    pub fn tag(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Pair(..) => "pair",
            Value::Cons(_) => "cons",
            Value::Map(_) => "map",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    fn is_primitive(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Float(_) | Value::String(_))
    }

    /// Structural equality, defined only for primitive values (§3.1,
    /// mirrors `mv_value_eq`'s `assert(_VALUE_IS_PRIM(...))`).
    pub fn eq_primitive(&self, other: &Value) -> Result<bool, CodecError> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Ok(a == b),
            (Value::Float(a), Value::Float(b)) => Ok(a == b),
            (Value::String(a), Value::String(b)) => Ok(a == b),
            (a, b) if !a.is_primitive() || !b.is_primitive() => {
                Err(CodecError::NonPrimitiveKey(a.tag()))
            }
            _ => Ok(false),
        }
    }
}

#[derive(Clone, Debug, Default)]
struct ConsCell {
    car: Value,
    cdr: Value,
}

#[derive(Clone, Debug, Default)]
struct MapCell {
    /// Head of the binding chain: `Null` or a `Cons` handle whose cars are
    /// `Pair(key, value)`.
    bindings: Value,
}

impl Default for Value {
    fn default() -> Self {
        Value::Null
    }
}

/// Backing storage for every `Cons` and `Map` handle produced by a
/// `Runtime`. One arena per device process (§9: "arena + integer handle").
#[derive(Debug, Default)]
pub struct Arena {
    cons: Vec<ConsCell>,
    maps: Vec<MapCell>,
}

impl Arena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cons_new(&mut self) -> Value {
        self.cons.push(ConsCell {
            car: Value::Null,
            cdr: Value::Null,
        });
        Value::Cons((self.cons.len() - 1) as Handle)
    }

    fn cons_cell(&self, v: &Value) -> &ConsCell {
        match v {
            Value::Cons(h) => &self.cons[*h as usize],
            _ => panic!("cons_cell called on non-Cons value"),
        }
    }

    fn cons_cell_mut(&mut self, v: &Value) -> &mut ConsCell {
        match v {
            Value::Cons(h) => &mut self.cons[*h as usize],
            _ => panic!("cons_cell_mut called on non-Cons value"),
        }
    }

    pub fn car(&self, v: &Value) -> Value {
        self.cons_cell(v).car.clone()
    }

    pub fn cdr(&self, v: &Value) -> Value {
        self.cons_cell(v).cdr.clone()
    }

    pub fn setcar(&mut self, cons: &Value, val: Value) {
        self.cons_cell_mut(cons).car = val;
    }

    pub fn setcdr(&mut self, cons: &Value, val: Value) {
        self.cons_cell_mut(cons).cdr = val;
    }

    pub fn map_new(&mut self) -> Value {
        self.maps.push(MapCell {
            bindings: Value::Null,
        });
        Value::Map((self.maps.len() - 1) as Handle)
    }

    fn map_cell(&self, v: &Value) -> &MapCell {
        match v {
            Value::Map(h) => &self.maps[*h as usize],
            _ => panic!("map_cell called on non-Map value"),
        }
    }

    /// Last-write-wins lookup: walk bindings head-to-tail, return first hit
    /// (bindings are prepended, so head is most recent).
    pub fn map_lookup(&self, map: &Value, key: &Value) -> Result<Value, CodecError> {
        let mut cur = self.map_cell(map).bindings.clone();
        while !cur.is_null() {
            let binding = self.car(&cur);
            if let Value::Pair(k, v) = &binding {
                if k.eq_primitive(key)? {
                    return Ok((**v).clone());
                }
            }
            cur = self.cdr(&cur);
        }
        Ok(Value::Null)
    }

    /// Prepend a new binding. Returns the (unchanged, by-handle) map value.
    pub fn map_add(&mut self, map: &Value, key: Value, val: Value) -> Result<Value, CodecError> {
        if !key.is_primitive() {
            return Err(CodecError::NonPrimitiveKey(key.tag()));
        }
        let prev = self.map_cell(map).bindings.clone();
        let binding = self.cons_new();
        self.setcar(&binding, Value::Pair(Box::new(key), Box::new(val)));
        self.setcdr(&binding, prev);
        match map {
            Value::Map(h) => {
                self.maps[*h as usize].bindings = binding;
            }
            _ => panic!("map_add called on non-Map value"),
        }
        Ok(map.clone())
    }

    /// Build a `Cons` spine from an iterator, in the exact reverse-source
    /// order the original array parser produces (§3.1, §9 open question 2):
    /// each element is prepended, so the final list's head is the last
    /// element seen.
    pub fn cons_list_from_iter(&mut self, items: impl IntoIterator<Item = Value>) -> Value {
        let mut list = Value::Null;
        for item in items {
            let cell = self.cons_new();
            self.setcar(&cell, item);
            self.setcdr(&cell, list);
            list = cell;
        }
        list
    }

    /// Collect a `Cons` spine into a `Vec`, head first.
    pub fn cons_list_to_vec(&self, mut list: Value) -> Vec<Value> {
        let mut out = Vec::new();
        while !list.is_null() {
            out.push(self.car(&list));
            list = self.cdr(&list);
        }
        out
    }

    /// Render a value to the wire/debug grammar (§3.1, grounded on
    /// `value.c`'s `_value_print`).
    pub fn to_str(&self, v: &Value) -> Result<String, CodecError> {
        let mut buf = String::with_capacity(1024);
        self.print_into(v, &mut buf)?;
        if buf.len() > 1 << 16 {
            return Err(CodecError::BufferTooLarge);
        }
        Ok(buf)
    }

    fn print_into(&self, v: &Value, buf: &mut String) -> Result<(), CodecError> {
        use std::fmt::Write;
        match v {
            Value::Null => buf.push_str("null"),
            Value::Int(i) => {
                write!(buf, "{i}").unwrap();
            }
            Value::Float(f) => {
                write!(buf, "{f:.2}").unwrap();
            }
            Value::String(s) => {
                if s.len() > 1023 {
                    return Err(CodecError::StringTooLong);
                }
                buf.push('"');
                buf.push_str(s);
                buf.push('"');
            }
            Value::Pair(a, b) => {
                self.print_into(a, buf)?;
                buf.push_str(": ");
                self.print_into(b, buf)?;
            }
            Value::Cons(_) => {
                buf.push_str("[ ");
                let mut cur = v.clone();
                while !cur.is_null() {
                    self.print_into(&self.car(&cur), buf)?;
                    cur = self.cdr(&cur);
                    buf.push(' ');
                }
                buf.push(']');
            }
            Value::Map(_) => {
                buf.push_str("{ ");
                let mut cur = self.map_cell(v).bindings.clone();
                let mut first = true;
                while !cur.is_null() {
                    if !first {
                        buf.push_str(", ");
                    }
                    first = false;
                    self.print_into(&self.car(&cur), buf)?;
                    cur = self.cdr(&cur);
                }
                buf.push_str(" }");
            }
        }
        Ok(())
    }

    /// Parse a value from the wire/debug grammar (§3.1, grounded on
    /// `value.c`'s tokenizer + recursive-descent parser, reimplemented over
    /// `&str` instead of jsmn token indices).
    pub fn from_str(&mut self, s: &str) -> Result<Value, CodecError> {
        let mut p = Parser {
            bytes: s.as_bytes(),
            pos: 0,
            tokens_consumed: 0,
        };
        p.skip_ws();
        let v = p.parse_value(self)?;
        Ok(v)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Debug rendering only; does not resolve Cons/Map handles (those
        // need an Arena). Matches `mv_value_print` for primitives.
        match self {
            Value::Null => write!(f, "null"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x:.2}"),
            Value::String(s) => write!(f, "{s:?}"),
            Value::Pair(a, b) => write!(f, "{a}: {b}"),
            Value::Cons(h) => write!(f, "<cons #{h}>"),
            Value::Map(h) => write!(f, "<map #{h}>"),
        }
    }
}

const MAX_TOKENS: usize = 1 << 16;

struct Parser<'a> {
    bytes: &'a [u8],
    pos: usize,
    tokens_consumed: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let b = self.peek();
        if b.is_some() {
            self.pos += 1;
        }
        b
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(b' ') | Some(b'\t') | Some(b'\n') | Some(b'\r')) {
            self.pos += 1;
        }
    }

    fn take_token(&mut self) -> Result<(), CodecError> {
        self.tokens_consumed += 1;
        if self.tokens_consumed > MAX_TOKENS {
            return Err(CodecError::TooManyTokens);
        }
        Ok(())
    }

    fn expect(&mut self, c: u8, expected: &'static str) -> Result<(), CodecError> {
        self.skip_ws();
        match self.bump() {
            Some(b) if b == c => Ok(()),
            Some(b) => Err(CodecError::UnexpectedChar {
                at: self.pos - 1,
                found: b as char,
                expected,
            }),
            None => Err(CodecError::UnexpectedEof(self.pos)),
        }
    }

    fn parse_value(&mut self, arena: &mut Arena) -> Result<Value, CodecError> {
        self.take_token()?;
        self.skip_ws();
        match self.peek() {
            Some(b'{') => self.parse_object(arena),
            Some(b'[') => self.parse_array(arena),
            Some(b'"') => self.parse_string().map(Value::String),
            Some(_) => self.parse_primitive(),
            None => Err(CodecError::UnexpectedEof(self.pos)),
        }
    }

    fn parse_string(&mut self) -> Result<String, CodecError> {
        self.expect(b'"', "string")?;
        let start = self.pos;
        while let Some(b) = self.peek() {
            if b == b'"' {
                break;
            }
            self.pos += 1;
        }
        if self.peek() != Some(b'"') {
            return Err(CodecError::UnexpectedEof(self.pos));
        }
        let raw = &self.bytes[start..self.pos];
        if raw.len() > 1023 {
            return Err(CodecError::StringTooLong);
        }
        self.pos += 1; // closing quote
        Ok(String::from_utf8_lossy(raw).into_owned())
    }

    /// Bare token: integral literal -> Int, decimal-point literal -> Float,
    /// otherwise a bare (unquoted) String. The original tokenizer only ever
    /// produced Int for bare tokens; we additionally recognize a decimal
    /// point so that float round-tripping is possible, resolving an
    /// otherwise-silent gap between the codec's documented Value model
    /// (which has a Float variant) and its parser (which the source only
    /// ever fed integers).
    fn parse_primitive(&mut self) -> Result<Value, CodecError> {
        let start = self.pos;
        while let Some(b) = self.peek() {
            if b.is_ascii_alphanumeric() || b == b'-' || b == b'+' || b == b'.' || b == b'_' {
                self.pos += 1;
            } else {
                break;
            }
        }
        if self.pos == start {
            return Err(CodecError::UnexpectedChar {
                at: self.pos,
                found: self.peek().map(|b| b as char).unwrap_or('\0'),
                expected: "value",
            });
        }
        let raw = &self.bytes[start..self.pos];
        if raw.len() > 1023 {
            return Err(CodecError::StringTooLong);
        }
        let tok = std::str::from_utf8(raw).unwrap_or("");
        if tok == "null" {
            return Ok(Value::Null);
        }
        if tok.contains('.') {
            if let Ok(f) = tok.parse::<f32>() {
                return Ok(Value::Float(f));
            }
        }
        if let Ok(i) = tok.parse::<i32>() {
            return Ok(Value::Int(i));
        }
        Ok(Value::String(tok.to_string()))
    }

    fn parse_object(&mut self, arena: &mut Arena) -> Result<Value, CodecError> {
        self.expect(b'{', "object")?;
        let map = arena.map_new();
        self.skip_ws();
        if self.peek() == Some(b'}') {
            self.pos += 1;
            return Ok(map);
        }
        loop {
            self.skip_ws();
            let key = if self.peek() == Some(b'"') {
                Value::String(self.parse_string()?)
            } else {
                self.parse_primitive()?
            };
            self.expect(b':', "colon")?;
            self.skip_ws();
            let value = self.parse_value(arena)?;
            arena.map_add(&map, key, value)?;
            self.skip_ws();
            match self.peek() {
                Some(b',') => {
                    self.pos += 1;
                    continue;
                }
                Some(b'}') => {
                    self.pos += 1;
                    break;
                }
                Some(b) => {
                    return Err(CodecError::UnexpectedChar {
                        at: self.pos,
                        found: b as char,
                        expected: "',' or '}'",
                    })
                }
                None => return Err(CodecError::UnexpectedEof(self.pos)),
            }
        }
        Ok(map)
    }

    /// Space-separated elements, e.g. `[ 1 2 3 ]`. Produces a `Cons` spine
    /// in reverse source order (§3.1, §9 open question 2) — documented,
    /// not a bug, preserved intentionally.
    fn parse_array(&mut self, arena: &mut Arena) -> Result<Value, CodecError> {
        self.expect(b'[', "array")?;
        let mut items = Vec::new();
        loop {
            self.skip_ws();
            match self.peek() {
                Some(b']') => {
                    self.pos += 1;
                    break;
                }
                Some(b',') => {
                    self.pos += 1;
                    continue;
                }
                None => return Err(CodecError::UnexpectedEof(self.pos)),
                _ => {
                    items.push(self.parse_value(arena)?);
                }
            }
        }
        Ok(arena.cons_list_from_iter(items))
    }
}
