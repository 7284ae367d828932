//! Function call mechanics
//!
//! Every call from the host or from a native goes through [`Vm::call`]. It
//! dispatches on the function kind: natives run directly inside a native
//! frame, bound functions prepend their captured arguments, and script
//! functions get a frame that the configured executor drives.

use std::mem::size_of;

use crate::arena::{MemoryTag, ObjectId};
use crate::atom::Atom;
use crate::builtins::Prototype;
use crate::context::Vm;
use crate::error::{Exception, FatalError};
use crate::runtime::function::{FunctionData, FunctionKind, NativeFunction};
use crate::runtime::object::{Object, ObjectKind};
use crate::runtime::property::PropertySlot;
use crate::value::{JsString, Value};

/// Bound functions never nest deeper than this while resolving a target
const MAX_BOUND_DEPTH: usize = 64;

impl Vm {
    /// Call `function` with `this` and `args`
    pub fn call(&mut self, function: &Value, this: &Value, args: &[Value]) -> Result<Value, Exception> {
        self.invoke(function, this, args, false)
    }

    /// Call `function` as a constructor
    pub fn construct(&mut self, function: &Value, args: &[Value]) -> Result<Value, Exception> {
        let proto = self.get_atom(function, Atom::PROTOTYPE)?;
        let proto = match proto.object_id() {
            Some(id) => id,
            None => self.prototype(Prototype::Object),
        };
        let this = self.object_alloc(Some(proto))?;
        let result = self.invoke(function, &this, args, true)?;
        Ok(if result.is_object() { result } else { this })
    }

    fn invoke(
        &mut self,
        function: &Value,
        this: &Value,
        args: &[Value],
        ctor: bool,
    ) -> Result<Value, Exception> {
        if self.poisoned {
            return Err(FatalError::Poisoned.into());
        }

        let data = function
            .object_id()
            .and_then(|id| self.heap.object(id).function().map(|f| (id, f.clone())));
        let Some((id, data)) = data else {
            let name = self.display_name(function);
            return Err(self.type_error(format!("{name} is not a function")));
        };

        let result = match data.kind {
            FunctionKind::Native { call, .. } => {
                if ctor && !data.ctor {
                    let name = data.name.unwrap_or_else(|| JsString::new("native"));
                    return Err(self.type_error(format!("{name} is not a constructor")));
                }
                let frame = self.frame_native(id, data.name, this, args)?;
                let result = call(self, this, args);
                self.frame_free(frame)?;
                result
            }
            FunctionKind::Bound {
                target,
                this: bound_this,
                args: bound_args,
            } => {
                let mut all = bound_args;
                all.extend_from_slice(args);
                let this = if ctor { this.clone() } else { bound_this };
                let target = self.value_of(target);
                self.invoke(&target, &this, &all, ctor)
            }
            FunctionKind::Lambda { .. } => {
                let frame = self.frame_enter(function, this, args, ctor)?;
                match self.frame_call(frame) {
                    Ok(value) => self.frame_return(frame, value),
                    Err(e) => {
                        self.frame_free(frame)?;
                        Err(e)
                    }
                }
            }
        };

        if let Err(e) = &result {
            if e.is_fatal() && !self.poisoned {
                log::debug!("fatal error poisons the vm: {}", e);
                self.poisoned = true;
            }
        }
        result
    }

    fn display_name(&self, value: &Value) -> String {
        match value {
            Value::String(s) => format!("\"{s}\""),
            Value::Symbol(atom) => format!("Symbol({})", self.atoms.name(*atom)),
            Value::Object(_) | Value::Array(_) | Value::External(_) => "object".to_string(),
            other => other
                .primitive_to_string()
                .map_or_else(|| other.type_of().to_string(), |s| s.to_string()),
        }
    }

    /// Wrap a native `fn` as a function object
    pub fn native_function(
        &mut self,
        call: NativeFunction,
        nargs: u32,
        magic: u32,
        name: Option<JsString>,
    ) -> Result<Value, Exception> {
        let proto = self.prototype(Prototype::Function);
        let data = FunctionData::native(call, nargs, magic, name);
        let id = self.alloc(Object::new(ObjectKind::Function(data), Some(proto)))?;
        Ok(Value::Function(id))
    }

    /// Bind `this` and leading arguments to `target`
    ///
    /// Binding a bound function flattens into a single level.
    pub fn bind_function(
        &mut self,
        target: &Value,
        this: Value,
        args: &[Value],
    ) -> Result<Value, Exception> {
        let data = target
            .object_id()
            .and_then(|id| self.heap.object(id).function().map(|f| (id, f.clone())));
        let Some((mut id, mut data)) = data else {
            let name = self.display_name(target);
            return Err(self.type_error(format!("{name} is not a function")));
        };

        let name = JsString::new(&format!(
            "bound {}",
            data.name.as_ref().map_or_else(String::new, JsString::to_string)
        ));
        let nargs = data.nargs.saturating_sub(args.len() as u32);
        let ctor = data.ctor;

        let mut this = this;
        let mut bound = args.to_vec();
        for _ in 0..MAX_BOUND_DEPTH {
            let FunctionKind::Bound {
                target,
                this: inner_this,
                args: inner_args,
            } = data.kind
            else {
                break;
            };
            this = inner_this;
            bound.splice(0..0, inner_args);
            id = target;
            data = match self.heap.object(target).function() {
                Some(f) => f.clone(),
                None => return Err(Exception::internal("bound target is not a function")),
            };
        }

        self.charge(MemoryTag::Object, bound.len() * size_of::<Value>())?;
        let proto = self.prototype(Prototype::Function);
        let bound = FunctionData {
            kind: FunctionKind::Bound {
                target: id,
                this,
                args: bound,
            },
            ctor,
            nargs,
            name: Some(name),
        };
        let id = self.alloc(Object::new(ObjectKind::Function(bound), Some(proto)))?;
        Ok(Value::Function(id))
    }

    /// Function's `name`, as recorded at creation
    pub fn function_name(&self, function: &Value) -> Option<JsString> {
        let id = function.object_id()?;
        self.heap.object(id).function()?.name.clone()
    }

    /// Give a script function its `prototype` object, linked back via `constructor`
    pub fn function_prototype_create(&mut self, function: &Value) -> Result<Value, Exception> {
        let Some(id) = function.object_id() else {
            return Err(self.type_error("value is not a function"));
        };
        let proto = self.object_new()?;
        if let Some(pid) = proto.object_id() {
            self.charge(MemoryTag::Object, size_of::<PropertySlot>())?;
            self.heap
                .object_mut(pid)
                .put(PropertySlot::hidden(Atom::CONSTRUCTOR, function.clone()));
        }
        self.charge(MemoryTag::Object, size_of::<PropertySlot>())?;
        self.heap
            .object_mut(id)
            .put(PropertySlot::hidden(Atom::PROTOTYPE, proto.clone()));
        Ok(proto)
    }

    /// Value referring to object `id`, tagged by its kind
    pub fn value_of(&self, id: ObjectId) -> Value {
        match self.heap.object(id).kind {
            ObjectKind::Array(_) => Value::Array(id),
            ObjectKind::Function(_) => Value::Function(id),
            ObjectKind::External(_) => Value::External(id),
            _ => Value::Object(id),
        }
    }
}
