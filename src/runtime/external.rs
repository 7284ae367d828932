//! Host-defined objects
//!
//! A host registers a prototype once with [`Vm::external_prototype`]: its
//! properties are compiled into a single shared table that every instance
//! references. Instances carry an opaque host payload plus the prototype id;
//! keys missing from the table fall through to an optional
//! [`ExternalHandler`] before the ordinary prototype chain is consulted.
//!
//! [`Vm::external_prototype`]: crate::context::Vm::external_prototype

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::context::Vm;
use crate::error::Exception;
use crate::runtime::function::NativeFunction;
use crate::runtime::object::SharedTable;
use crate::runtime::property::PropertyHandler;
use crate::value::{JsString, Value};

/// Opaque host payload of an external object
pub type ExternalData = Arc<dyn Any + Send + Sync>;

/// Index of a registered host prototype
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExternalProtoId(pub(crate) u32);

/// One property of a host prototype
#[derive(Debug, Clone)]
pub enum ExternalProperty {
    /// Computed on access through a native handler
    Property {
        name: &'static str,
        handler: PropertyHandler,
        magic: u32,
        writable: bool,
    },
    /// Native method, materialised per VM on first read
    Method {
        name: &'static str,
        call: NativeFunction,
        nargs: u32,
        magic: u32,
    },
    /// Constant primitive value
    Value {
        name: &'static str,
        value: Value,
    },
}

/// Dynamic key resolution for host objects
pub trait ExternalHandler: Send + Sync {
    /// Value of `key`, or `None` when the host does not know it
    fn get(&self, vm: &mut Vm, this: &Value, key: &JsString) -> Result<Option<Value>, Exception>;

    /// Store `value`; `false` lets the VM fall back to an own property
    fn set(
        &self,
        _vm: &mut Vm,
        _this: &Value,
        _key: &JsString,
        _value: &Value,
    ) -> Result<bool, Exception> {
        Ok(false)
    }

    /// Delete `key`; `false` when the host does not own it
    fn delete(&self, _vm: &mut Vm, _this: &Value, _key: &JsString) -> Result<bool, Exception> {
        Ok(false)
    }

    /// Enumerable dynamic keys
    fn keys(&self, _vm: &mut Vm, _this: &Value) -> Result<Vec<JsString>, Exception> {
        Ok(Vec::new())
    }
}

/// A registered host prototype
#[derive(Clone)]
pub struct ExternalProto {
    pub table: SharedTable,
    pub handler: Option<Arc<dyn ExternalHandler>>,
}

impl fmt::Debug for ExternalProto {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExternalProto")
            .field("properties", &self.table.len())
            .field("handler", &self.handler.is_some())
            .finish()
    }
}

/// Payload of external objects
#[derive(Debug, Clone)]
pub struct ExternalSlots {
    pub proto: ExternalProtoId,
    pub data: ExternalData,
}

impl ExternalSlots {
    /// Host payload downcast to its concrete type
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.data.downcast_ref::<T>()
    }
}
