//! Runtime value type: the [`Stream`].
//!
//! Exactly one of five payloads is present.  Casting only goes "up":
//! Num, Bool and Text all cast to Text, and Num/Bool cast to each other in
//! boolean or numeric contexts.  Nothing casts into Array or Map.

use std::cmp::Ordering;
use std::fmt;

use serde::{Serialize, Serializer};
use serde_json::Value as JsonValue;

use crate::error::RuntimeError;

type Result<T> = std::result::Result<T, RuntimeError>;

/// Which payload a [`Stream`] carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Text,
    Num,
    Bool,
    Array,
    Map,
}

impl StreamKind {
    pub fn name(self) -> &'static str {
        match self {
            StreamKind::Text => "text",
            StreamKind::Num => "number",
            StreamKind::Bool => "boolean",
            StreamKind::Array => "array",
            StreamKind::Map => "map",
        }
    }

    /// Cross-type precedence used by [`Stream::compare`]: Num > Text > Bool > other.
    fn rank(self) -> u8 {
        match self {
            StreamKind::Num => 3,
            StreamKind::Text => 2,
            StreamKind::Bool => 1,
            StreamKind::Array | StreamKind::Map => 0,
        }
    }
}

/// A value flowing through a script.
#[derive(Debug, Clone, PartialEq)]
pub enum Stream {
    Text(String),
    Num(f64),
    Bool(bool),
    Array(Vec<Stream>),
    Map(StreamMap),
}

impl Default for Stream {
    fn default() -> Self {
        Stream::Text(String::new())
    }
}

// ── StreamMap ─────────────────────────────────────────────────────────────────

/// Insertion-ordered association list keyed by Num, Text or Bool streams.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamMap {
    entries: Vec<(Stream, Stream)>,
}

impl StreamMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &Stream) -> Option<&Stream> {
        self.position(key).map(|i| &self.entries[i].1)
    }

    pub fn contains_key(&self, key: &Stream) -> bool {
        self.position(key).is_some()
    }

    /// Insert or replace; a new key goes to the end.
    pub fn insert(&mut self, key: Stream, value: Stream) -> Result<()> {
        key.ensure_key()?;
        match self.position(&key) {
            Some(i) => self.entries[i].1 = value,
            None => self.entries.push((key, value)),
        }
        Ok(())
    }

    /// Append `value` to the array stored under `key`, creating it on first use.
    pub fn push_grouped(&mut self, key: Stream, value: Stream) -> Result<()> {
        key.ensure_key()?;
        match self.position(&key) {
            Some(i) => match &mut self.entries[i].1 {
                Stream::Array(items) => items.push(value),
                other => *other = Stream::Array(vec![std::mem::take(other), value]),
            },
            None => self.entries.push((key, Stream::Array(vec![value]))),
        }
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Stream, &Stream)> {
        self.entries.iter().map(|(k, v)| (k, v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &Stream> {
        self.entries.iter().map(|(k, _)| k)
    }

    pub fn values(&self) -> impl Iterator<Item = &Stream> {
        self.entries.iter().map(|(_, v)| v)
    }

    fn position(&self, key: &Stream) -> Option<usize> {
        self.entries.iter().position(|(k, _)| k.same_key(key))
    }
}

impl IntoIterator for StreamMap {
    type Item = (Stream, Stream);
    type IntoIter = std::vec::IntoIter<(Stream, Stream)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

// ── Display / JSON ────────────────────────────────────────────────────────────

impl fmt::Display for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stream::Text(s) => f.write_str(s),
            Stream::Num(n) => write!(f, "{n}"),
            Stream::Bool(b) => write!(f, "{b}"),
            Stream::Array(_) | Stream::Map(_) => write!(f, "{}", self.to_json()),
        }
    }
}

impl Serialize for Stream {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl Stream {
    /// Convert to a JSON value.  Map keys are rendered as text.
    pub fn to_json(&self) -> JsonValue {
        match self {
            Stream::Text(s) => JsonValue::String(s.clone()),
            Stream::Num(n) => {
                if n.fract() == 0.0 && n.abs() < 9.007_199_254_740_992e15 {
                    JsonValue::from(*n as i64)
                } else {
                    serde_json::Number::from_f64(*n)
                        .map(JsonValue::Number)
                        .unwrap_or(JsonValue::Null)
                }
            }
            Stream::Bool(b) => JsonValue::Bool(*b),
            Stream::Array(items) => JsonValue::Array(items.iter().map(Stream::to_json).collect()),
            Stream::Map(map) => JsonValue::Object(
                map.iter()
                    .map(|(k, v)| (k.to_string(), v.to_json()))
                    .collect(),
            ),
        }
    }

    /// Convert from a JSON value; `null` becomes empty text.
    pub fn from_json(value: JsonValue) -> Stream {
        match value {
            JsonValue::Null => Stream::Text(String::new()),
            JsonValue::Bool(b) => Stream::Bool(b),
            JsonValue::Number(n) => Stream::Num(n.as_f64().unwrap_or(f64::NAN)),
            JsonValue::String(s) => Stream::Text(s),
            JsonValue::Array(items) => Stream::Array(items.into_iter().map(Stream::from_json).collect()),
            JsonValue::Object(obj) => Stream::Map(StreamMap {
                entries: obj
                    .into_iter()
                    .map(|(k, v)| (Stream::Text(k), Stream::from_json(v)))
                    .collect(),
            }),
        }
    }
}

// ── Accessors and casts ───────────────────────────────────────────────────────

impl Stream {
    pub fn kind(&self) -> StreamKind {
        match self {
            Stream::Text(_) => StreamKind::Text,
            Stream::Num(_) => StreamKind::Num,
            Stream::Bool(_) => StreamKind::Bool,
            Stream::Array(_) => StreamKind::Array,
            Stream::Map(_) => StreamKind::Map,
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.kind().name()
    }

    /// Borrow the backing element list.  This aliases the stream's own
    /// storage; it does not copy.
    pub fn as_array(&self) -> Option<&[Stream]> {
        match self {
            Stream::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Borrow the backing map.  Aliases, does not copy.
    pub fn as_map(&self) -> Option<&StreamMap> {
        match self {
            Stream::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn cast_text(&self) -> Result<String> {
        match self {
            Stream::Text(s) => Ok(s.clone()),
            Stream::Num(_) | Stream::Bool(_) => Ok(self.to_string()),
            other => Err(cast_error(other, StreamKind::Text)),
        }
    }

    pub fn cast_num(&self) -> Result<f64> {
        match self {
            Stream::Num(n) => Ok(*n),
            Stream::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
            other => Err(cast_error(other, StreamKind::Num)),
        }
    }

    pub fn cast_bool(&self) -> Result<bool> {
        match self {
            Stream::Bool(b) => Ok(*b),
            Stream::Num(n) => Ok(*n != 0.0),
            other => Err(cast_error(other, StreamKind::Bool)),
        }
    }

    /// Only Num, Text and Bool streams may key a map.
    pub fn can_be_key(&self) -> bool {
        matches!(self, Stream::Num(_) | Stream::Text(_) | Stream::Bool(_))
    }

    fn ensure_key(&self) -> Result<()> {
        if self.can_be_key() {
            Ok(())
        } else {
            Err(RuntimeError::InvalidKey(self.type_name()))
        }
    }

    /// Key identity: same kind and same value.
    fn same_key(&self, other: &Stream) -> bool {
        match (self, other) {
            (Stream::Num(a), Stream::Num(b)) => a == b,
            (Stream::Text(a), Stream::Text(b)) => a == b,
            (Stream::Bool(a), Stream::Bool(b)) => a == b,
            _ => false,
        }
    }
}

fn cast_error(from: &Stream, to: StreamKind) -> RuntimeError {
    RuntimeError::Cast {
        from: from.type_name(),
        to: to.name(),
    }
}

fn operator_error(op: &'static str, l: &Stream, r: &Stream) -> RuntimeError {
    RuntimeError::Operator {
        op,
        left: l.type_name(),
        right: r.type_name(),
    }
}

// ── Operators ─────────────────────────────────────────────────────────────────

impl Stream {
    /// `+`, dispatched on the left operand: numeric addition, text
    /// concatenation, or array concatenation.
    pub fn add(&self, rhs: &Stream) -> Result<Stream> {
        match (self, rhs) {
            (Stream::Num(a), Stream::Num(_) | Stream::Bool(_)) => Ok(Stream::Num(a + rhs.cast_num()?)),
            (Stream::Text(a), _) if rhs.kind() != StreamKind::Array && rhs.kind() != StreamKind::Map => {
                Ok(Stream::Text(format!("{a}{}", rhs.cast_text()?)))
            }
            (Stream::Array(a), Stream::Array(b)) => {
                Ok(Stream::Array(a.iter().chain(b.iter()).cloned().collect()))
            }
            _ => Err(operator_error("+", self, rhs)),
        }
    }

    /// `-`, `*` and `/` on numbers (IEEE semantics, no divide-by-zero check).
    pub fn arith(&self, op: &'static str, rhs: &Stream) -> Result<Stream> {
        let (Stream::Num(a), Stream::Num(b)) = (self, rhs) else {
            return Err(operator_error(op, self, rhs));
        };
        Ok(Stream::Num(match op {
            "-" => a - b,
            "*" => a * b,
            "/" => a / b,
            _ => return Err(operator_error(op, self, rhs)),
        }))
    }

    /// `<`, `>`, `<=`, `>=` on numbers.
    pub fn relate(&self, op: &'static str, rhs: &Stream) -> Result<bool> {
        let (Stream::Num(a), Stream::Num(b)) = (self, rhs) else {
            return Err(operator_error(op, self, rhs));
        };
        Ok(match op {
            "<" => a < b,
            ">" => a > b,
            "<=" => a <= b,
            ">=" => a >= b,
            _ => return Err(operator_error(op, self, rhs)),
        })
    }

    /// `=`: type-directed equality.  Array and Map operands are not
    /// comparable and raise an error.
    pub fn equals(&self, rhs: &Stream) -> Result<bool> {
        match (self, rhs) {
            (Stream::Array(_) | Stream::Map(_), _) | (_, Stream::Array(_) | Stream::Map(_)) => {
                Err(operator_error("=", self, rhs))
            }
            (Stream::Num(a), Stream::Num(b)) => Ok(a == b),
            (Stream::Bool(a), Stream::Bool(b)) => Ok(a == b),
            (Stream::Text(a), Stream::Text(b)) => Ok(a == b),
            (Stream::Text(_), _) | (_, Stream::Text(_)) => Ok(self.cast_text()? == rhs.cast_text()?),
            _ => Ok(self.cast_num()? == rhs.cast_num()?),
        }
    }

    /// Unary `-`.
    pub fn negate(&self) -> Result<Stream> {
        match self {
            Stream::Num(n) => Ok(Stream::Num(-n)),
            other => Err(RuntimeError::UnaryOperator {
                op: "-",
                operand: other.type_name(),
            }),
        }
    }

    /// Unary `!`.
    pub fn not(&self) -> Result<Stream> {
        self.cast_bool()
            .map(|b| Stream::Bool(!b))
            .map_err(|_| RuntimeError::UnaryOperator {
                op: "!",
                operand: self.type_name(),
            })
    }

    /// Total order used for sorting.
    ///
    /// Same-kind values compare naturally (text case-insensitively, then by
    /// code point; `true > false`; arrays position-wise, then by length).
    /// Differing kinds fall back to Num > Text > Bool > Array.  Maps are not
    /// ordered.
    pub fn compare(&self, rhs: &Stream) -> Result<Ordering> {
        match (self, rhs) {
            (Stream::Map(_), _) | (_, Stream::Map(_)) => Err(operator_error("compare", self, rhs)),
            (Stream::Num(a), Stream::Num(b)) => Ok(a.partial_cmp(b).unwrap_or(Ordering::Equal)),
            (Stream::Text(a), Stream::Text(b)) => Ok(collate(a, b)),
            (Stream::Bool(a), Stream::Bool(b)) => Ok(a.cmp(b)),
            (Stream::Array(a), Stream::Array(b)) => {
                for (x, y) in a.iter().zip(b) {
                    match x.compare(y)? {
                        Ordering::Equal => {}
                        other => return Ok(other),
                    }
                }
                Ok(a.len().cmp(&b.len()))
            }
            _ => Ok(self.kind().rank().cmp(&rhs.kind().rank())),
        }
    }
}

fn collate(a: &str, b: &str) -> Ordering {
    a.to_lowercase()
        .cmp(&b.to_lowercase())
        .then_with(|| a.cmp(b))
}

// ── Conversions ───────────────────────────────────────────────────────────────

impl From<f64> for Stream {
    fn from(n: f64) -> Self {
        Stream::Num(n)
    }
}

impl From<i64> for Stream {
    fn from(n: i64) -> Self {
        Stream::Num(n as f64)
    }
}

impl From<bool> for Stream {
    fn from(b: bool) -> Self {
        Stream::Bool(b)
    }
}

impl From<String> for Stream {
    fn from(s: String) -> Self {
        Stream::Text(s)
    }
}

impl From<&str> for Stream {
    fn from(s: &str) -> Self {
        Stream::Text(s.to_owned())
    }
}

impl<T: Into<Stream>> From<Vec<T>> for Stream {
    fn from(items: Vec<T>) -> Self {
        Stream::Array(items.into_iter().map(Into::into).collect())
    }
}

impl From<StreamMap> for Stream {
    fn from(map: StreamMap) -> Self {
        Stream::Map(map)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
