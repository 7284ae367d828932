//! JavaScript value representation
//!
//! A [`Value`] is a tagged union; the tag fully determines which payload is
//! meaningful. Heap-resident values (objects, arrays, functions, externals)
//! are referenced by [`ObjectId`] into the VM heap, so values are cheap to
//! clone and never own the object graph.
//!
//! Strings come in two representations:
//! - short strings (up to [`JsString::SHORT_MAX`] bytes) stored inline
//! - long strings sharing an immutable reference-counted buffer

use std::fmt;
use std::sync::Arc;

use crate::arena::ObjectId;
use crate::atom::Atom;

/// Value type tags
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tag {
    /// Uninitialised slot (never visible to scripts)
    Invalid = 0,
    Undefined = 1,
    Null = 2,
    Boolean = 3,
    Number = 4,
    /// String stored inline
    ShortString = 5,
    /// String sharing a heap buffer
    LongString = 6,
    Symbol = 7,
    Object = 8,
    Array = 9,
    Function = 10,
    External = 11,
}

/// A JavaScript value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Marks uninitialised let/const bindings, array holes and unset slots
    Invalid,
    Undefined,
    Null,
    Boolean(bool),
    Number(f64),
    String(JsString),
    Symbol(Atom),
    Object(ObjectId),
    Array(ObjectId),
    Function(ObjectId),
    External(ObjectId),
}

impl Default for Value {
    fn default() -> Self {
        Value::Undefined
    }
}

impl Value {
    /// Create a string value
    #[inline]
    pub fn string(s: &str) -> Value {
        Value::String(JsString::new(s))
    }

    #[inline]
    pub fn tag(&self) -> Tag {
        match self {
            Value::Invalid => Tag::Invalid,
            Value::Undefined => Tag::Undefined,
            Value::Null => Tag::Null,
            Value::Boolean(_) => Tag::Boolean,
            Value::Number(_) => Tag::Number,
            Value::String(s) if s.is_short() => Tag::ShortString,
            Value::String(_) => Tag::LongString,
            Value::Symbol(_) => Tag::Symbol,
            Value::Object(_) => Tag::Object,
            Value::Array(_) => Tag::Array,
            Value::Function(_) => Tag::Function,
            Value::External(_) => Tag::External,
        }
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        !matches!(self, Value::Invalid)
    }

    #[inline]
    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    #[inline]
    pub fn is_null_or_undefined(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }

    #[inline]
    pub fn is_string(&self) -> bool {
        matches!(self, Value::String(_))
    }

    #[inline]
    pub fn is_function(&self) -> bool {
        matches!(self, Value::Function(_))
    }

    /// Check if the value refers to a heap object of any kind
    #[inline]
    pub fn is_object(&self) -> bool {
        self.object_id().is_some()
    }

    #[inline]
    pub fn is_primitive(&self) -> bool {
        !self.is_object()
    }

    /// Heap id of object-like values
    #[inline]
    pub fn object_id(&self) -> Option<ObjectId> {
        match self {
            Value::Object(id) | Value::Array(id) | Value::Function(id) | Value::External(id) => {
                Some(*id)
            }
            _ => None,
        }
    }

    #[inline]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    #[inline]
    pub fn as_string(&self) -> Option<&JsString> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// The `typeof` operator
    pub fn type_of(&self) -> &'static str {
        match self {
            Value::Invalid | Value::Undefined => "undefined",
            Value::Null | Value::Object(_) | Value::Array(_) | Value::External(_) => "object",
            Value::Boolean(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Symbol(_) => "symbol",
            Value::Function(_) => "function",
        }
    }

    /// ToBoolean
    pub fn to_boolean(&self) -> bool {
        match self {
            Value::Invalid | Value::Undefined | Value::Null => false,
            Value::Boolean(b) => *b,
            Value::Number(n) => !(n.is_nan() || *n == 0.0),
            Value::String(s) => !s.is_empty(),
            _ => true,
        }
    }

    /// The `===` operator
    pub fn strict_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) => a == b,
            (a, b) => a == b,
        }
    }

    /// ToString for primitives; `None` for symbols and objects
    pub fn primitive_to_string(&self) -> Option<JsString> {
        let s = match self {
            Value::Invalid | Value::Undefined => "undefined",
            Value::Null => "null",
            Value::Boolean(true) => "true",
            Value::Boolean(false) => "false",
            Value::Number(n) => return Some(JsString::new(&number_to_string(*n))),
            Value::String(s) => return Some(s.clone()),
            _ => return None,
        };
        Some(JsString::new(s))
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(n as f64)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::string(s)
    }
}

impl From<JsString> for Value {
    fn from(s: JsString) -> Self {
        Value::String(s)
    }
}

/// Format a number the way `String(n)` does for the common cases
///
/// Integers print exactly, non-integers use the shortest round-trip
/// representation and large/small magnitudes switch to exponent form.
pub fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        return "NaN".into();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Infinity" } else { "-Infinity" }.into();
    }
    if n == 0.0 {
        return "0".into();
    }

    let abs = n.abs();
    if !(1e-6..1e21).contains(&abs) {
        let s = format!("{:e}", n);
        return match s.find('e') {
            Some(pos) if !s[pos + 1..].starts_with('-') => {
                format!("{}e+{}", &s[..pos], &s[pos + 1..])
            }
            _ => s,
        };
    }
    format!("{}", n)
}

/// Canonical array index of a key value
///
/// Numbers must be integral and in `0..2^32-1`; `-0` is index 0. Strings must
/// be the canonical decimal spelling (no sign, no leading zeros, no
/// exponent), so `"01"` and `"1.0"` are not indices.
pub fn array_index(key: &Value) -> Option<u32> {
    match key {
        Value::Number(n) => {
            let n = *n;
            if n.is_nan() || n < 0.0 || n >= u32::MAX as f64 || n.fract() != 0.0 {
                return None;
            }
            Some(n as u32)
        }
        Value::String(s) => parse_index(s.as_bytes()),
        _ => None,
    }
}

/// Parse a canonical decimal array index
pub fn parse_index(bytes: &[u8]) -> Option<u32> {
    match bytes {
        [] => None,
        [b'0'] => Some(0),
        [b'0', ..] => None,
        _ if bytes.len() > 10 => None,
        _ => {
            let mut n: u64 = 0;
            for &b in bytes {
                if !b.is_ascii_digit() {
                    return None;
                }
                n = n * 10 + (b - b'0') as u64;
            }
            (n < u32::MAX as u64).then_some(n as u32)
        }
    }
}

/// Backing buffer of long strings
#[derive(Debug, PartialEq, Eq)]
struct StringBuffer {
    bytes: Box<[u8]>,
    chars: u32,
}

#[derive(Clone, PartialEq, Eq)]
enum Repr {
    Short { len: u8, chars: u8, bytes: [u8; JsString::SHORT_MAX] },
    Long(Arc<StringBuffer>),
}

/// An immutable JavaScript string
///
/// Carries both its byte length and its character length. A character
/// length of 0 on a non-empty string marks a byte string (not valid UTF-8),
/// which is indexed bytewise.
#[derive(Clone, PartialEq, Eq)]
pub struct JsString(Repr);

impl JsString {
    /// Maximum byte length of the inline representation
    pub const SHORT_MAX: usize = 14;

    /// Create a string from UTF-8 text
    pub fn new(s: &str) -> Self {
        let chars = s.chars().count();
        Self::with_lengths(s.as_bytes(), chars)
    }

    /// Create a string from raw bytes; invalid UTF-8 yields a byte string
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let chars = match std::str::from_utf8(bytes) {
            Ok(s) => s.chars().count(),
            Err(_) => 0,
        };
        Self::with_lengths(bytes, chars)
    }

    fn with_lengths(bytes: &[u8], chars: usize) -> Self {
        if bytes.len() <= Self::SHORT_MAX {
            let mut buf = [0u8; Self::SHORT_MAX];
            buf[..bytes.len()].copy_from_slice(bytes);
            JsString(Repr::Short {
                len: bytes.len() as u8,
                chars: chars as u8,
                bytes: buf,
            })
        } else {
            JsString(Repr::Long(Arc::new(StringBuffer {
                bytes: bytes.into(),
                chars: chars as u32,
            })))
        }
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        match &self.0 {
            Repr::Short { len, bytes, .. } => &bytes[..*len as usize],
            Repr::Long(buf) => &buf.bytes,
        }
    }

    /// The text, unless this is a byte string
    pub fn as_str(&self) -> Option<&str> {
        if self.is_byte_string() {
            return None;
        }
        std::str::from_utf8(self.as_bytes()).ok()
    }

    /// Byte length
    #[inline]
    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn is_short(&self) -> bool {
        matches!(self.0, Repr::Short { .. })
    }

    #[inline]
    fn raw_chars(&self) -> usize {
        match &self.0 {
            Repr::Short { chars, .. } => *chars as usize,
            Repr::Long(buf) => buf.chars as usize,
        }
    }

    #[inline]
    pub fn is_byte_string(&self) -> bool {
        self.raw_chars() == 0 && !self.is_empty()
    }

    /// Character length; byte strings count bytes
    #[inline]
    pub fn char_len(&self) -> usize {
        if self.is_byte_string() {
            self.len()
        } else {
            self.raw_chars()
        }
    }

    /// The one-character string at `index`
    pub fn char_at(&self, index: usize) -> Option<JsString> {
        let bytes = self.as_bytes();
        if self.is_byte_string() {
            return bytes.get(index).map(|b| JsString::from_bytes(&[*b]));
        }
        if self.raw_chars() == bytes.len() {
            // ASCII: characters and bytes coincide
            return bytes.get(index).map(|b| JsString::from_bytes(&[*b]));
        }
        let s = self.as_str()?;
        let c = s.chars().nth(index)?;
        let mut buf = [0u8; 4];
        Some(JsString::new(c.encode_utf8(&mut buf)))
    }

    /// Concatenate two strings
    pub fn concat(&self, other: &JsString) -> JsString {
        let mut bytes = Vec::with_capacity(self.len() + other.len());
        bytes.extend_from_slice(self.as_bytes());
        bytes.extend_from_slice(other.as_bytes());
        if self.is_byte_string() || other.is_byte_string() {
            Self::with_lengths(&bytes, 0)
        } else {
            Self::with_lengths(&bytes, self.raw_chars() + other.raw_chars())
        }
    }
}

impl fmt::Display for JsString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(self.as_bytes()))
    }
}

impl fmt::Debug for JsString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", String::from_utf8_lossy(self.as_bytes()))
    }
}

impl From<&str> for JsString {
    fn from(s: &str) -> Self {
        JsString::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tags() {
        assert_eq!(Value::Undefined.tag(), Tag::Undefined);
        assert_eq!(Value::string("short").tag(), Tag::ShortString);
        assert_eq!(
            Value::string("a string longer than fourteen bytes").tag(),
            Tag::LongString
        );
        assert_eq!(Value::Number(1.5).tag(), Tag::Number);
    }

    #[test]
    fn test_short_string_boundary() {
        let s = JsString::new("abcdefghijklmn");
        assert_eq!(s.len(), 14);
        assert!(s.is_short());
        let s = JsString::new("abcdefghijklmno");
        assert!(!s.is_short());
        assert_eq!(s.as_str(), Some("abcdefghijklmno"));
    }

    #[test]
    fn test_string_lengths() {
        let s = JsString::new("héllo");
        assert_eq!(s.len(), 6);
        assert_eq!(s.char_len(), 5);
        assert!(!s.is_byte_string());

        let b = JsString::from_bytes(&[0xff, 0xfe, 0x41]);
        assert!(b.is_byte_string());
        assert_eq!(b.char_len(), 3);
        assert_eq!(b.as_str(), None);

        let empty = JsString::new("");
        assert!(empty.is_empty());
        assert!(!empty.is_byte_string());
    }

    #[test]
    fn test_char_at() {
        let s = JsString::new("héllo");
        assert_eq!(s.char_at(1), Some(JsString::new("é")));
        assert_eq!(s.char_at(4), Some(JsString::new("o")));
        assert_eq!(s.char_at(5), None);

        let ascii = JsString::new("abc");
        assert_eq!(ascii.char_at(2), Some(JsString::new("c")));
    }

    #[test]
    fn test_concat() {
        let a = JsString::new("hello, ");
        let b = JsString::new("wörld of strings");
        let c = a.concat(&b);
        assert_eq!(c.as_str(), Some("hello, wörld of strings"));
        assert_eq!(c.char_len(), 23);
    }

    #[test]
    fn test_type_of() {
        assert_eq!(Value::Undefined.type_of(), "undefined");
        assert_eq!(Value::Null.type_of(), "object");
        assert_eq!(Value::Boolean(true).type_of(), "boolean");
        assert_eq!(Value::Function(ObjectId::from_raw(0)).type_of(), "function");
        assert_eq!(Value::Array(ObjectId::from_raw(0)).type_of(), "object");
    }

    #[test]
    fn test_truthiness() {
        assert!(!Value::Number(0.0).to_boolean());
        assert!(!Value::Number(f64::NAN).to_boolean());
        assert!(!Value::string("").to_boolean());
        assert!(Value::string("0").to_boolean());
        assert!(Value::Object(ObjectId::from_raw(3)).to_boolean());
    }

    #[test]
    fn test_strict_equals() {
        assert!(Value::Number(0.0).strict_equals(&Value::Number(-0.0)));
        assert!(!Value::Number(f64::NAN).strict_equals(&Value::Number(f64::NAN)));
        assert!(Value::string("a").strict_equals(&Value::string("a")));
        assert!(!Value::Null.strict_equals(&Value::Undefined));
    }

    #[test]
    fn test_number_to_string() {
        assert_eq!(number_to_string(42.0), "42");
        assert_eq!(number_to_string(-0.0), "0");
        assert_eq!(number_to_string(1.5), "1.5");
        assert_eq!(number_to_string(f64::NAN), "NaN");
        assert_eq!(number_to_string(f64::NEG_INFINITY), "-Infinity");
        assert_eq!(number_to_string(1e21), "1e+21");
        assert_eq!(number_to_string(1.5e-7), "1.5e-7");
    }

    #[test]
    fn test_array_index() {
        assert_eq!(array_index(&Value::Number(5.0)), Some(5));
        assert_eq!(array_index(&Value::Number(-0.0)), Some(0));
        assert_eq!(array_index(&Value::Number(1.5)), None);
        assert_eq!(array_index(&Value::Number(f64::NAN)), None);
        assert_eq!(array_index(&Value::Number(-1.0)), None);
        assert_eq!(array_index(&Value::string("01")), None);
        assert_eq!(array_index(&Value::string("0")), Some(0));
        assert_eq!(array_index(&Value::string("4294967294")), Some(4294967294));
        assert_eq!(array_index(&Value::string("4294967295")), None);
        assert_eq!(array_index(&Value::string("1e3")), None);
        assert_eq!(array_index(&Value::Boolean(true)), None);
    }
}
