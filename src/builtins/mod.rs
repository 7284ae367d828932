//! Built-in prototypes
//!
//! Each VM owns one prototype object per [`Prototype`]. Their methods live
//! in shared tables built once per process family and referenced through
//! `Arc`, so cloned VMs reuse them without copying.

pub mod error;
pub mod function;
pub mod object;

use std::sync::Arc;

use crate::atom::AtomTable;
use crate::error::ErrorKind;
use crate::runtime::flathsh::FlatHash;
use crate::runtime::object::SharedTable;
use crate::runtime::property::PropertySlot;

/// Built-in prototype objects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Prototype {
    Object,
    Function,
    Array,
    String,
    Number,
    Boolean,
    Symbol,
    TypedArray,
    Error(ErrorKind),
}

const PLAIN: [Prototype; 8] = [
    Prototype::Object,
    Prototype::Function,
    Prototype::Array,
    Prototype::String,
    Prototype::Number,
    Prototype::Boolean,
    Prototype::Symbol,
    Prototype::TypedArray,
];

impl Prototype {
    pub const COUNT: usize = PLAIN.len() + ErrorKind::COUNT;

    #[inline]
    pub const fn index(self) -> usize {
        match self {
            Prototype::Object => 0,
            Prototype::Function => 1,
            Prototype::Array => 2,
            Prototype::String => 3,
            Prototype::Number => 4,
            Prototype::Boolean => 5,
            Prototype::Symbol => 6,
            Prototype::TypedArray => 7,
            Prototype::Error(kind) => PLAIN.len() + kind.index(),
        }
    }

    /// Every prototype, parents before children
    pub fn all() -> impl Iterator<Item = Prototype> {
        PLAIN
            .into_iter()
            .chain(ErrorKind::ALL.into_iter().map(Prototype::Error))
    }

    /// Prototype of this prototype object
    pub const fn parent(self) -> Option<Prototype> {
        match self {
            Prototype::Object => None,
            Prototype::Error(ErrorKind::Error) => Some(Prototype::Object),
            Prototype::Error(_) => Some(Prototype::Error(ErrorKind::Error)),
            _ => Some(Prototype::Object),
        }
    }
}

fn table(slots: Vec<PropertySlot>) -> SharedTable {
    let mut hash = FlatHash::new();
    for slot in slots {
        hash.insert(slot.key.hash(), slot, true);
    }
    Arc::new(hash)
}

/// Shared tables of all prototypes, indexed by [`Prototype::index`]
pub fn shared_tables(atoms: &mut AtomTable) -> Vec<SharedTable> {
    Prototype::all()
        .map(|proto| match proto {
            Prototype::Object => table(object::prototype_slots(atoms)),
            Prototype::Function => table(function::prototype_slots(atoms)),
            Prototype::Error(kind) => table(error::prototype_slots(atoms, kind)),
            _ => table(Vec::new()),
        })
        .collect()
}
