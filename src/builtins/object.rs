//! Object.prototype

use crate::atom::{Atom, AtomTable};
use crate::context::Vm;
use crate::error::Exception;
use crate::runtime::property::{HandlerCall, PropertySlot};
use crate::runtime::query::QueryMode;
use crate::value::{JsString, Value};

pub(super) fn prototype_slots(_atoms: &mut AtomTable) -> Vec<PropertySlot> {
    let mut proto = PropertySlot::handler(Atom::PROTO, proto_handler, 0, true);
    proto.enumerable = false.into();
    proto.configurable = true.into();
    vec![
        PropertySlot::method(Atom::HAS_OWN_PROPERTY, has_own_property, 1, 0),
        PropertySlot::method(Atom::TO_STRING, to_string, 0, 0),
        proto,
    ]
}

fn has_own_property(vm: &mut Vm, this: &Value, args: &[Value]) -> Result<Value, Exception> {
    let key = args.first().cloned().unwrap_or(Value::Undefined);
    if this.is_null_or_undefined() {
        return Err(vm.type_error("cannot convert undefined or null to object"));
    }
    let query = vm.property_query(this, &key, QueryMode::Get, true)?;
    Ok(Value::Boolean(!query.is_declined()))
}

fn to_string(vm: &mut Vm, this: &Value, _args: &[Value]) -> Result<Value, Exception> {
    let class = match this {
        Value::Undefined | Value::Invalid => "Undefined",
        Value::Null => "Null",
        Value::Boolean(_) => "Boolean",
        Value::Number(_) => "Number",
        Value::String(_) => "String",
        Value::Symbol(_) => "Symbol",
        Value::Object(id) | Value::Array(id) | Value::Function(id) | Value::External(id) => {
            vm.heap.object(*id).class_name()
        }
    };
    Ok(Value::String(JsString::new(&format!("[object {class}]"))))
}

/// `__proto__` getter and setter
fn proto_handler(vm: &mut Vm, call: &HandlerCall<'_>) -> Result<Value, Exception> {
    let Some(id) = call.this.object_id() else {
        return Ok(Value::Undefined);
    };
    match call.setval {
        None => Ok(vm
            .prototype_of(id)
            .map_or(Value::Null, |proto| vm.value_of(proto))),
        Some(value) => {
            match value {
                Value::Null => vm.set_prototype_of(id, None)?,
                v => {
                    if let Some(proto) = v.object_id() {
                        vm.set_prototype_of(id, Some(proto))?;
                    }
                }
            }
            Ok(Value::Undefined)
        }
    }
}
