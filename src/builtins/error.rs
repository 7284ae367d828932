//! Error prototypes and error objects

use std::mem::size_of;

use crate::arena::MemoryTag;
use crate::atom::{Atom, AtomTable};
use crate::builtins::Prototype;
use crate::context::Vm;
use crate::error::{ErrorKind, Exception};
use crate::runtime::object::{Object, ObjectKind};
use crate::runtime::property::PropertySlot;
use crate::value::{JsString, Value};

pub(super) fn prototype_slots(_atoms: &mut AtomTable, kind: ErrorKind) -> Vec<PropertySlot> {
    let mut slots = vec![
        PropertySlot::hidden(Atom::NAME, Value::string(kind.name())),
        PropertySlot::hidden(Atom::MESSAGE, Value::String(JsString::new(""))),
    ];
    if kind == ErrorKind::Error {
        slots.push(PropertySlot::method(Atom::TO_STRING, to_string, 0, 0));
    }
    slots
}

fn field(vm: &mut Vm, this: &Value, key: Atom, default: &str) -> Result<String, Exception> {
    let value = vm.get_atom(this, key)?;
    if value.is_undefined() {
        return Ok(default.to_string());
    }
    vm.value_to_string(&value)
}

fn to_string(vm: &mut Vm, this: &Value, _args: &[Value]) -> Result<Value, Exception> {
    if !this.is_object() {
        return Err(vm.type_error("Error.prototype.toString called on non-object"));
    }
    let name = field(vm, this, Atom::NAME, "Error")?;
    let message = field(vm, this, Atom::MESSAGE, "")?;
    let text = match (name.is_empty(), message.is_empty()) {
        (_, true) => name,
        (true, false) => message,
        (false, false) => format!("{name}: {message}"),
    };
    Ok(Value::String(JsString::new(&text)))
}

impl Vm {
    /// Allocate an error object of `kind`
    pub fn error_new(&mut self, kind: ErrorKind, message: &str) -> Result<Value, Exception> {
        let proto = self.prototype(Prototype::Error(kind));
        let mut object = Object::new(ObjectKind::Error(kind), Some(proto));
        if !message.is_empty() {
            self.charge(MemoryTag::Object, size_of::<PropertySlot>())?;
            object.put(PropertySlot::hidden(Atom::MESSAGE, Value::string(message)));
        }
        let id = self.alloc(object)?;
        Ok(Value::Object(id))
    }

    /// Build and raise an error; allocation failure raises the memory error
    pub fn throw_error(&mut self, kind: ErrorKind, message: impl Into<String>) -> Exception {
        let message = message.into();
        match self.error_new(kind, &message) {
            Ok(error) => self.raise(error),
            Err(e) => e,
        }
    }

    pub fn type_error(&mut self, message: impl Into<String>) -> Exception {
        self.throw_error(ErrorKind::TypeError, message)
    }

    pub fn range_error(&mut self, message: impl Into<String>) -> Exception {
        self.throw_error(ErrorKind::RangeError, message)
    }

    pub fn reference_error(&mut self, message: impl Into<String>) -> Exception {
        self.throw_error(ErrorKind::ReferenceError, message)
    }

    pub fn syntax_error(&mut self, message: impl Into<String>) -> Exception {
        self.throw_error(ErrorKind::SyntaxError, message)
    }

    /// The preallocated memory error, thrown without allocating
    pub fn memory_exception(&mut self) -> Exception {
        let value = Value::Object(self.memory_error);
        self.raise(value)
    }

    /// Kind of an error object
    pub fn error_kind(&self, value: &Value) -> Option<ErrorKind> {
        match self.heap.object(value.object_id()?).kind {
            ObjectKind::Error(kind) => Some(kind),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Options;

    #[test]
    fn test_error_to_string() {
        let mut vm = Vm::create(Options::default()).unwrap();
        let e = vm.error_new(ErrorKind::RangeError, "bad length").unwrap();
        assert_eq!(vm.value_to_string(&e).unwrap(), "RangeError: bad length");
        let e = vm.error_new(ErrorKind::Error, "").unwrap();
        assert_eq!(vm.value_to_string(&e).unwrap(), "Error");
        assert_eq!(vm.error_kind(&e), Some(ErrorKind::Error));
    }

    #[test]
    fn test_error_prototype_chain() {
        let mut vm = Vm::create(Options::default()).unwrap();
        let e = vm.error_new(ErrorKind::TypeError, "x").unwrap();
        let type_proto = vm.prototype(Prototype::Error(ErrorKind::TypeError));
        let error_proto = vm.prototype(Prototype::Error(ErrorKind::Error));
        assert_eq!(vm.prototype_of(e.object_id().unwrap()), Some(type_proto));
        assert_eq!(vm.prototype_of(type_proto), Some(error_proto));
        assert_eq!(vm.get(&e, "name").unwrap(), Value::string("TypeError"));
        // message is not enumerable
        let keys = vm.own_keys(&e, false).unwrap();
        assert!(keys.is_empty());
    }

    #[test]
    fn test_memory_error_is_preallocated() {
        let mut vm = Vm::create(Options::default()).unwrap();
        let before = vm.memory_stats().used;
        let e = vm.memory_exception();
        assert_eq!(vm.memory_stats().used, before);
        let value = e.value().unwrap().clone();
        assert_eq!(vm.error_kind(&value), Some(ErrorKind::MemoryError));
        assert!(vm.set(&value, "x", Value::Null).is_err());
    }
}
