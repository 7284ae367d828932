//! Property slots and descriptors
//!
//! A [`PropertySlot`] is what a property table stores per key. Besides plain
//! data and accessor properties there are two engine-level kinds:
//! - native handlers, computed on every access (e.g. host object fields)
//! - native methods living in shared tables, materialised into a per-VM
//!   function object on first read
//!
//! A `Whiteout` in an own table hides a deleted property of the shared table.

use crate::atom::Atom;
use crate::context::Vm;
use crate::error::Exception;
use crate::runtime::function::NativeFunction;
use crate::value::Value;

/// Arguments passed to a [`PropertyHandler`]
#[derive(Debug)]
pub struct HandlerCall<'a> {
    /// The value the property was looked up on
    pub this: &'a Value,
    pub key: Atom,
    /// New value for assignments, `None` for reads
    pub setval: Option<&'a Value>,
    /// Handler-specific word supplied at definition time
    pub magic: u32,
}

/// Native property handler
pub type PropertyHandler = fn(vm: &mut Vm, call: &HandlerCall<'_>) -> Result<Value, Exception>;

/// Tri-state property attribute
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Attribute {
    False = 0,
    True = 1,
    #[default]
    Unset = 2,
}

impl Attribute {
    #[inline]
    pub const fn is_true(self) -> bool {
        matches!(self, Attribute::True)
    }

    #[inline]
    pub const fn is_set(self) -> bool {
        !matches!(self, Attribute::Unset)
    }

    /// Resolve an unset attribute to `default`
    #[inline]
    pub const fn or(self, default: Attribute) -> Attribute {
        match self {
            Attribute::Unset => default,
            set => set,
        }
    }
}

impl From<bool> for Attribute {
    fn from(b: bool) -> Self {
        if b { Attribute::True } else { Attribute::False }
    }
}

/// What a slot holds
#[derive(Debug, Clone)]
pub enum PropertyKind {
    Data(Value),
    /// `undefined` marks a missing getter or setter
    Accessor { getter: Value, setter: Value },
    Handler { handler: PropertyHandler, magic: u32 },
    Method { call: NativeFunction, nargs: u32, magic: u32 },
    Whiteout,
}

/// One property table entry
#[derive(Debug, Clone)]
pub struct PropertySlot {
    pub key: Atom,
    pub kind: PropertyKind,
    pub writable: Attribute,
    pub enumerable: Attribute,
    pub configurable: Attribute,
}

impl PropertySlot {
    /// Ordinary writable, enumerable, configurable data property
    pub fn data(key: Atom, value: Value) -> Self {
        Self::with_attributes(key, PropertyKind::Data(value), true, true, true)
    }

    /// Data property of a built-in (writable, non-enumerable, configurable)
    pub fn hidden(key: Atom, value: Value) -> Self {
        Self::with_attributes(key, PropertyKind::Data(value), true, false, true)
    }

    pub fn with_attributes(
        key: Atom,
        kind: PropertyKind,
        writable: bool,
        enumerable: bool,
        configurable: bool,
    ) -> Self {
        PropertySlot {
            key,
            kind,
            writable: writable.into(),
            enumerable: enumerable.into(),
            configurable: configurable.into(),
        }
    }

    pub fn accessor(key: Atom, getter: Value, setter: Value) -> Self {
        PropertySlot {
            key,
            kind: PropertyKind::Accessor { getter, setter },
            writable: Attribute::Unset,
            enumerable: Attribute::False,
            configurable: Attribute::True,
        }
    }

    pub fn handler(key: Atom, handler: PropertyHandler, magic: u32, writable: bool) -> Self {
        Self::with_attributes(
            key,
            PropertyKind::Handler { handler, magic },
            writable,
            true,
            false,
        )
    }

    pub fn method(key: Atom, call: NativeFunction, nargs: u32, magic: u32) -> Self {
        Self::with_attributes(
            key,
            PropertyKind::Method { call, nargs, magic },
            true,
            false,
            true,
        )
    }

    pub fn whiteout(key: Atom) -> Self {
        Self::with_attributes(key, PropertyKind::Whiteout, false, false, true)
    }

    #[inline]
    pub fn is_whiteout(&self) -> bool {
        matches!(self.kind, PropertyKind::Whiteout)
    }

    #[inline]
    pub fn is_accessor(&self) -> bool {
        matches!(self.kind, PropertyKind::Accessor { .. })
    }

    #[inline]
    pub fn is_writable(&self) -> bool {
        self.writable.is_true()
    }

    #[inline]
    pub fn is_enumerable(&self) -> bool {
        self.enumerable.is_true()
    }

    #[inline]
    pub fn is_configurable(&self) -> bool {
        self.configurable.is_true()
    }
}

/// Partial description used by `property_define`
#[derive(Debug, Clone, Default)]
pub struct PropertyDescriptor {
    pub value: Option<Value>,
    pub getter: Option<Value>,
    pub setter: Option<Value>,
    pub writable: Attribute,
    pub enumerable: Attribute,
    pub configurable: Attribute,
}

impl PropertyDescriptor {
    pub fn value(value: Value) -> Self {
        PropertyDescriptor {
            value: Some(value),
            ..Default::default()
        }
    }

    pub fn accessor(getter: Option<Value>, setter: Option<Value>) -> Self {
        PropertyDescriptor {
            getter,
            setter,
            ..Default::default()
        }
    }

    pub fn writable(mut self, writable: bool) -> Self {
        self.writable = writable.into();
        self
    }

    pub fn enumerable(mut self, enumerable: bool) -> Self {
        self.enumerable = enumerable.into();
        self
    }

    pub fn configurable(mut self, configurable: bool) -> Self {
        self.configurable = configurable.into();
        self
    }

    #[inline]
    pub fn is_accessor(&self) -> bool {
        self.getter.is_some() || self.setter.is_some()
    }

    #[inline]
    pub fn is_data(&self) -> bool {
        self.value.is_some() || self.writable.is_set()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attribute() {
        assert!(Attribute::True.is_true());
        assert!(!Attribute::Unset.is_true());
        assert!(!Attribute::Unset.is_set());
        assert_eq!(Attribute::Unset.or(Attribute::False), Attribute::False);
        assert_eq!(Attribute::True.or(Attribute::False), Attribute::True);
        assert_eq!(Attribute::from(false), Attribute::False);
    }

    #[test]
    fn test_slot_constructors() {
        let slot = PropertySlot::data(Atom::NAME, Value::string("x"));
        assert!(slot.is_writable() && slot.is_enumerable() && slot.is_configurable());

        let hidden = PropertySlot::hidden(Atom::MESSAGE, Value::string(""));
        assert!(hidden.is_writable());
        assert!(!hidden.is_enumerable());

        let w = PropertySlot::whiteout(Atom::LENGTH);
        assert!(w.is_whiteout());

        let acc = PropertySlot::accessor(Atom::NAME, Value::Undefined, Value::Undefined);
        assert!(acc.is_accessor());
        assert!(!acc.writable.is_set());
    }

    #[test]
    fn test_descriptor_builders() {
        let d = PropertyDescriptor::value(Value::Number(1.0))
            .writable(false)
            .configurable(true);
        assert!(d.is_data());
        assert!(!d.is_accessor());
        assert_eq!(d.writable, Attribute::False);
        assert_eq!(d.enumerable, Attribute::Unset);

        let a = PropertyDescriptor::accessor(Some(Value::Undefined), None);
        assert!(a.is_accessor());
        assert!(!a.is_data());
    }
}
