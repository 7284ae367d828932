//! Property key atoms
//!
//! Every property key is interned to a 32-bit [`Atom`]:
//! - bit 31 set: small integer key stored in place (`0..2^31`)
//! - bit 30 set: symbol, minted from its own counter
//! - otherwise: index into the interned string table
//!
//! Two atoms are equal iff their keys are the same, and symbols never collide
//! with string atoms even when their descriptions match.

use rustc_hash::FxHashMap;

use crate::value::{JsString, Value, number_to_string, parse_index};

/// Interned property key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Atom(u32);

impl Atom {
    const INDEX_BIT: u32 = 1 << 31;
    const SYMBOL_BIT: u32 = 1 << 30;

    /// Largest integer stored in place
    pub const MAX_INDEX: u32 = Self::INDEX_BIT - 1;

    pub const LENGTH: Atom = Atom(0);
    pub const PROTOTYPE: Atom = Atom(1);
    pub const CONSTRUCTOR: Atom = Atom(2);
    pub const NAME: Atom = Atom(3);
    pub const MESSAGE: Atom = Atom(4);
    pub const PROTO: Atom = Atom(5);
    pub const UNDEFINED: Atom = Atom(6);
    pub const ARGUMENTS: Atom = Atom(7);
    pub const THIS: Atom = Atom(8);
    pub const TO_STRING: Atom = Atom(9);
    pub const HAS_OWN_PROPERTY: Atom = Atom(10);
    pub const CALL: Atom = Atom(11);
    pub const BIND: Atom = Atom(12);
    pub const STACK: Atom = Atom(13);
    pub const EMPTY: Atom = Atom(14);

    /// Atom for an integer key, if it fits in place
    #[inline]
    pub const fn from_index(index: u32) -> Option<Atom> {
        if index <= Self::MAX_INDEX {
            Some(Atom(index | Self::INDEX_BIT))
        } else {
            None
        }
    }

    #[inline]
    pub const fn is_index(self) -> bool {
        self.0 & Self::INDEX_BIT != 0
    }

    #[inline]
    pub const fn as_index(self) -> Option<u32> {
        if self.is_index() {
            Some(self.0 & !Self::INDEX_BIT)
        } else {
            None
        }
    }

    #[inline]
    pub const fn is_symbol(self) -> bool {
        !self.is_index() && self.0 & Self::SYMBOL_BIT != 0
    }

    #[inline]
    pub const fn is_string(self) -> bool {
        self.0 & (Self::INDEX_BIT | Self::SYMBOL_BIT) == 0
    }

    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Key hash used by property tables
    ///
    /// The mixer is a bijection on `u32`, so distinct atoms always have
    /// distinct hashes and tables can treat the hash as the key.
    #[inline]
    pub const fn hash(self) -> u32 {
        let mut h = self.0;
        h ^= h >> 16;
        h = h.wrapping_mul(0x85eb_ca6b);
        h ^= h >> 13;
        h = h.wrapping_mul(0xc2b2_ae35);
        h ^= h >> 16;
        h
    }
}

const WELL_KNOWN: [&str; 15] = [
    "length",
    "prototype",
    "constructor",
    "name",
    "message",
    "__proto__",
    "undefined",
    "arguments",
    "this",
    "toString",
    "hasOwnProperty",
    "call",
    "bind",
    "stack",
    "",
];

/// Per-VM intern table
#[derive(Debug, Clone)]
pub struct AtomTable {
    map: FxHashMap<Box<[u8]>, Atom>,
    strings: Vec<JsString>,
    symbols: Vec<Option<JsString>>,
}

impl AtomTable {
    pub fn new() -> Self {
        let mut table = AtomTable {
            map: FxHashMap::default(),
            strings: Vec::with_capacity(64),
            symbols: Vec::new(),
        };
        for name in WELL_KNOWN {
            table.intern(name);
        }
        table
    }

    /// Number of interned strings
    #[inline]
    pub fn len(&self) -> usize {
        self.strings.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }

    /// Intern text; canonical small indices become integer atoms
    pub fn intern(&mut self, s: &str) -> Atom {
        self.intern_bytes(s.as_bytes())
    }

    pub fn intern_bytes(&mut self, bytes: &[u8]) -> Atom {
        if let Some(atom) = parse_index(bytes).and_then(Atom::from_index) {
            return atom;
        }
        if let Some(atom) = self.map.get(bytes) {
            return *atom;
        }
        let atom = Atom(self.strings.len() as u32);
        self.strings.push(JsString::from_bytes(bytes));
        self.map.insert(bytes.into(), atom);
        atom
    }

    pub fn intern_string(&mut self, s: &JsString) -> Atom {
        self.intern_bytes(s.as_bytes())
    }

    /// Look up text without interning it
    pub fn lookup(&self, s: &str) -> Option<Atom> {
        parse_index(s.as_bytes())
            .and_then(Atom::from_index)
            .or_else(|| self.map.get(s.as_bytes()).copied())
    }

    /// Mint a fresh symbol
    pub fn new_symbol(&mut self, description: Option<JsString>) -> Atom {
        let atom = Atom(self.symbols.len() as u32 | Atom::SYMBOL_BIT);
        self.symbols.push(description);
        atom
    }

    /// Atomize a primitive key; `None` for objects and `Invalid`
    pub fn atomize(&mut self, key: &Value) -> Option<Atom> {
        match key {
            Value::Symbol(atom) => Some(*atom),
            Value::String(s) => Some(self.intern_string(s)),
            Value::Number(n) => {
                let n = *n;
                if n >= 0.0 && n <= Atom::MAX_INDEX as f64 && n.fract() == 0.0 {
                    return Atom::from_index(n as u32);
                }
                Some(self.intern(&number_to_string(n)))
            }
            Value::Undefined => Some(Atom::UNDEFINED),
            Value::Null => Some(self.intern("null")),
            Value::Boolean(b) => Some(self.intern(if *b { "true" } else { "false" })),
            _ => None,
        }
    }

    /// Printable name of a key
    pub fn name(&self, atom: Atom) -> JsString {
        if let Some(index) = atom.as_index() {
            return JsString::new(&index.to_string());
        }
        if atom.is_symbol() {
            let desc = self
                .symbols
                .get((atom.0 & !Atom::SYMBOL_BIT) as usize)
                .and_then(|d| d.as_ref());
            return match desc {
                Some(d) => JsString::new(&format!("Symbol({d})")),
                None => JsString::new("Symbol()"),
            };
        }
        self.strings
            .get(atom.0 as usize)
            .cloned()
            .unwrap_or_else(|| JsString::new(""))
    }

    /// Key as a script value: symbols stay symbols, everything else is a string
    pub fn key_value(&self, atom: Atom) -> Value {
        if atom.is_symbol() {
            Value::Symbol(atom)
        } else {
            Value::String(self.name(atom))
        }
    }
}

impl Default for AtomTable {
    fn default() -> Self {
        Self::new()
    }
}
