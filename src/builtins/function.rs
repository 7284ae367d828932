//! Function.prototype

use crate::atom::{Atom, AtomTable};
use crate::context::Vm;
use crate::error::Exception;
use crate::runtime::property::PropertySlot;
use crate::value::Value;

pub(super) fn prototype_slots(_atoms: &mut AtomTable) -> Vec<PropertySlot> {
    vec![
        PropertySlot::method(Atom::CALL, call, 1, 0),
        PropertySlot::method(Atom::BIND, bind, 1, 0),
    ]
}

fn split(args: &[Value]) -> (Value, &[Value]) {
    match args.split_first() {
        Some((this, rest)) => (this.clone(), rest),
        None => (Value::Undefined, &[]),
    }
}

fn call(vm: &mut Vm, this: &Value, args: &[Value]) -> Result<Value, Exception> {
    let (receiver, rest) = split(args);
    vm.call(this, &receiver, rest)
}

fn bind(vm: &mut Vm, this: &Value, args: &[Value]) -> Result<Value, Exception> {
    let (receiver, rest) = split(args);
    vm.bind_function(this, receiver, rest)
}
