//! JavaScript object representation
//!
//! An [`Object`] owns one property table and may reference a second,
//! immutable table shared across VM clones (prototype methods, host
//! prototypes). Lookups probe the own table first; a `Whiteout` there hides
//! the shared entry.

use std::sync::Arc;

use crate::arena::ObjectId;
use crate::atom::Atom;
use crate::error::ErrorKind;
use crate::runtime::external::ExternalSlots;
use crate::runtime::flathsh::{FlatHash, Insert};
use crate::runtime::function::FunctionData;
use crate::runtime::property::PropertySlot;
use crate::value::Value;

/// Table type shared between objects and VM clones
pub type SharedTable = Arc<FlatHash<PropertySlot>>;

/// Element type of typed arrays
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypedArrayKind {
    Int8 = 0,
    Uint8 = 1,
    Uint8Clamped = 2,
    Int16 = 3,
    Uint16 = 4,
    Int32 = 5,
    Uint32 = 6,
    Float32 = 7,
    Float64 = 8,
}

impl TypedArrayKind {
    /// Bytes per element
    pub const fn element_size(self) -> usize {
        match self {
            TypedArrayKind::Int8 | TypedArrayKind::Uint8 | TypedArrayKind::Uint8Clamped => 1,
            TypedArrayKind::Int16 | TypedArrayKind::Uint16 => 2,
            TypedArrayKind::Int32 | TypedArrayKind::Uint32 | TypedArrayKind::Float32 => 4,
            TypedArrayKind::Float64 => 8,
        }
    }
}

/// Fixed-length numeric storage
#[derive(Debug, Clone)]
pub struct TypedArray {
    pub kind: TypedArrayKind,
    bytes: Vec<u8>,
}

impl TypedArray {
    pub fn new(kind: TypedArrayKind, length: usize) -> Self {
        TypedArray {
            kind,
            bytes: vec![0; length * kind.element_size()],
        }
    }

    /// Length in elements
    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len() / self.kind.element_size()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<f64> {
        let size = self.kind.element_size();
        let b = self.bytes.get(index * size..(index + 1) * size)?;
        Some(match self.kind {
            TypedArrayKind::Int8 => b[0] as i8 as f64,
            TypedArrayKind::Uint8 | TypedArrayKind::Uint8Clamped => b[0] as f64,
            TypedArrayKind::Int16 => i16::from_le_bytes([b[0], b[1]]) as f64,
            TypedArrayKind::Uint16 => u16::from_le_bytes([b[0], b[1]]) as f64,
            TypedArrayKind::Int32 => i32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f64,
            TypedArrayKind::Uint32 => u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f64,
            TypedArrayKind::Float32 => f32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f64,
            TypedArrayKind::Float64 => {
                f64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])
            }
        })
    }

    /// Store `n` converted to the element type; out-of-range writes are ignored
    pub fn set(&mut self, index: usize, n: f64) -> bool {
        let size = self.kind.element_size();
        let Some(b) = self.bytes.get_mut(index * size..(index + 1) * size) else {
            return false;
        };
        let int = if n.is_finite() { n.trunc() as i64 } else { 0 };
        match self.kind {
            TypedArrayKind::Int8 | TypedArrayKind::Uint8 => b[0] = int as u8,
            TypedArrayKind::Uint8Clamped => {
                b[0] = if n.is_nan() { 0 } else { n.round().clamp(0.0, 255.0) as u8 }
            }
            TypedArrayKind::Int16 | TypedArrayKind::Uint16 => {
                b.copy_from_slice(&(int as u16).to_le_bytes())
            }
            TypedArrayKind::Int32 | TypedArrayKind::Uint32 => {
                b.copy_from_slice(&(int as u32).to_le_bytes())
            }
            TypedArrayKind::Float32 => b.copy_from_slice(&(n as f32).to_le_bytes()),
            TypedArrayKind::Float64 => b.copy_from_slice(&n.to_le_bytes()),
        }
        true
    }
}

/// Array storage: a dense prefix plus the logical length
///
/// Indices past the dense prefix but below `length` are kept in the own
/// property table when they are too far away to be stored densely.
#[derive(Debug, Clone, Default)]
pub struct ArrayElements {
    /// `Value::Invalid` marks holes
    pub dense: Vec<Value>,
    /// Always at least `dense.len()`
    pub length: u32,
}

impl ArrayElements {
    pub fn new(dense: Vec<Value>) -> Self {
        let length = dense.len() as u32;
        ArrayElements { dense, length }
    }

    /// Some indices live outside the dense prefix
    #[inline]
    pub fn is_sparse(&self) -> bool {
        self.length as usize > self.dense.len()
    }
}

/// Variant payload of an object
#[derive(Debug, Clone)]
pub enum ObjectKind {
    Plain,
    Array(ArrayElements),
    /// Array-like `arguments` object
    Arguments(Vec<Value>),
    TypedArray(TypedArray),
    /// Boxed primitive
    Value(Value),
    Function(FunctionData),
    Error(ErrorKind),
    External(ExternalSlots),
}

/// A heap object
#[derive(Debug, Clone)]
pub struct Object {
    /// Own properties
    pub hash: FlatHash<PropertySlot>,
    /// Read-only table referenced, not owned
    pub shared_hash: Option<SharedTable>,
    pub proto: Option<ObjectId>,
    pub extensible: bool,
    pub kind: ObjectKind,
}

impl Object {
    pub fn new(kind: ObjectKind, proto: Option<ObjectId>) -> Self {
        Object {
            hash: FlatHash::new(),
            shared_hash: None,
            proto,
            extensible: true,
            kind,
        }
    }

    pub fn with_shared(kind: ObjectKind, proto: Option<ObjectId>, shared: SharedTable) -> Self {
        Object {
            shared_hash: Some(shared),
            ..Object::new(kind, proto)
        }
    }

    /// Own-table slot for `key`, whiteouts included
    #[inline]
    pub fn own_slot(&self, key: Atom) -> Option<&PropertySlot> {
        self.hash.find(key.hash())
    }

    #[inline]
    pub fn own_slot_mut(&mut self, key: Atom) -> Option<&mut PropertySlot> {
        self.hash.find_mut(key.hash())
    }

    #[inline]
    pub fn shared_slot(&self, key: Atom) -> Option<&PropertySlot> {
        self.shared_hash.as_ref()?.find(key.hash())
    }

    /// Insert or overwrite an own slot
    pub fn put(&mut self, slot: PropertySlot) {
        let hash = slot.key.hash();
        self.hash.insert(hash, slot, true);
    }

    /// Insert an own slot unless the key exists; returns whether it was added
    pub fn add(&mut self, slot: PropertySlot) -> bool {
        let hash = slot.key.hash();
        matches!(self.hash.insert(hash, slot, false), Insert::Inserted)
    }

    pub fn remove(&mut self, key: Atom) -> Option<PropertySlot> {
        self.hash.delete(key.hash())
    }

    /// Dense element storage of arrays and `arguments`
    pub fn elements(&self) -> Option<&Vec<Value>> {
        match &self.kind {
            ObjectKind::Array(array) => Some(&array.dense),
            ObjectKind::Arguments(elts) => Some(elts),
            _ => None,
        }
    }

    pub fn elements_mut(&mut self) -> Option<&mut Vec<Value>> {
        match &mut self.kind {
            ObjectKind::Array(array) => Some(&mut array.dense),
            ObjectKind::Arguments(elts) => Some(elts),
            _ => None,
        }
    }

    /// `length` of arrays and `arguments`
    pub fn array_length(&self) -> Option<u32> {
        match &self.kind {
            ObjectKind::Array(array) => Some(array.length),
            ObjectKind::Arguments(elts) => Some(elts.len() as u32),
            _ => None,
        }
    }

    pub fn function(&self) -> Option<&FunctionData> {
        match &self.kind {
            ObjectKind::Function(f) => Some(f),
            _ => None,
        }
    }

    #[inline]
    pub fn is_callable(&self) -> bool {
        matches!(self.kind, ObjectKind::Function(_))
    }

    /// Tag reported by `Object.prototype.toString`
    pub fn class_name(&self) -> &'static str {
        match &self.kind {
            ObjectKind::Plain | ObjectKind::External(_) => "Object",
            ObjectKind::Array(_) => "Array",
            ObjectKind::Arguments(_) => "Arguments",
            ObjectKind::TypedArray(_) => "TypedArray",
            ObjectKind::Value(Value::Boolean(_)) => "Boolean",
            ObjectKind::Value(Value::Number(_)) => "Number",
            ObjectKind::Value(Value::String(_)) => "String",
            ObjectKind::Value(Value::Symbol(_)) => "Symbol",
            ObjectKind::Value(_) => "Object",
            ObjectKind::Function(_) => "Function",
            ObjectKind::Error(_) => "Error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::property::PropertyKind;

    #[test]
    fn test_typed_array_roundtrip() {
        let mut ta = TypedArray::new(TypedArrayKind::Int16, 4);
        assert_eq!(ta.len(), 4);
        assert!(ta.set(1, -3.7));
        assert_eq!(ta.get(1), Some(-3.0));
        assert!(!ta.set(4, 1.0));
        assert_eq!(ta.get(4), None);

        let mut clamped = TypedArray::new(TypedArrayKind::Uint8Clamped, 1);
        clamped.set(0, 300.0);
        assert_eq!(clamped.get(0), Some(255.0));

        let mut f = TypedArray::new(TypedArrayKind::Float64, 1);
        f.set(0, 0.5);
        assert_eq!(f.get(0), Some(0.5));
    }

    #[test]
    fn test_own_and_shared_slots() {
        let mut shared = FlatHash::new();
        shared.insert(
            Atom::NAME.hash(),
            PropertySlot::data(Atom::NAME, Value::string("shared")),
            false,
        );
        let mut obj = Object::with_shared(ObjectKind::Plain, None, Arc::new(shared));

        assert!(obj.own_slot(Atom::NAME).is_none());
        assert!(obj.shared_slot(Atom::NAME).is_some());

        assert!(obj.add(PropertySlot::data(Atom::NAME, Value::string("own"))));
        assert!(!obj.add(PropertySlot::data(Atom::NAME, Value::Null)));
        match &obj.own_slot(Atom::NAME).unwrap().kind {
            PropertyKind::Data(v) => assert_eq!(v, &Value::string("own")),
            other => panic!("unexpected {:?}", other),
        }

        obj.put(PropertySlot::whiteout(Atom::NAME));
        assert!(obj.own_slot(Atom::NAME).unwrap().is_whiteout());
        assert!(obj.remove(Atom::NAME).is_some());
        assert!(obj.own_slot(Atom::NAME).is_none());
    }

    #[test]
    fn test_elements_and_class() {
        let arr = Object::new(
            ObjectKind::Array(ArrayElements::new(vec![Value::Number(1.0), Value::Null])),
            None,
        );
        assert_eq!(arr.elements().unwrap().len(), 2);
        assert_eq!(arr.array_length(), Some(2));
        assert_eq!(arr.class_name(), "Array");

        let boxed = Object::new(ObjectKind::Value(Value::Boolean(true)), None);
        assert_eq!(boxed.class_name(), "Boolean");
        assert!(boxed.elements().is_none());
        assert!(!boxed.is_callable());
    }
}
