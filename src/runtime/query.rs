//! Property lookup and mutation
//!
//! [`Vm::property_query`] resolves a key against a base value. Primitive
//! bases start the walk at their boxed prototype; strings, dense elements
//! and typed arrays answer integer keys (and `length`) before any hash is
//! probed. Every object link probes its own table, then its shared table,
//! and a whiteout in the own table hides the shared entry. Host objects are
//! asked last, once the whole chain declined.

use std::mem::size_of;

use crate::arena::{MemoryTag, ObjectId};
use crate::atom::Atom;
use crate::builtins::Prototype;
use crate::context::Vm;
use crate::error::Exception;
use crate::runtime::function::NativeFunction;
use crate::runtime::object::{ArrayElements, Object, ObjectKind, TypedArray, TypedArrayKind};
use crate::runtime::property::{
    Attribute, HandlerCall, PropertyDescriptor, PropertyKind, PropertySlot,
};
use crate::value::{JsString, Value};

/// Largest distance past the dense length an index may be stored at
/// before it goes to the hash instead
pub const MAX_DENSE_GAP: u32 = 1 << 15;

/// What the caller intends to do with the result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryMode {
    Get,
    Set,
    Delete,
}

/// Where a found property lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Holder {
    /// Own table of the object
    Own(ObjectId),
    /// Shared table referenced by the object
    Shared(ObjectId),
    /// Dense element (arrays, `arguments`, typed arrays, boxed strings)
    Element(ObjectId, u32),
    /// Synthesised `length` of an exotic object
    Length(ObjectId),
    /// Character or `length` of a string primitive
    StringChar,
    /// Answered by a host handler
    External(ObjectId),
}

/// Result of [`Vm::property_query`]
#[derive(Debug, Clone)]
pub struct PropertyQuery {
    pub key: Atom,
    /// Copy of the resolved slot and where it lives; `None` when declined
    pub found: Option<(PropertySlot, Holder)>,
    /// First object of the walk, the receiver of set and delete
    pub target: Option<ObjectId>,
    /// The target's own table holds a whiteout for `key`
    pub own_whiteout: bool,
    /// Chain links visited
    pub depth: u32,
}

impl PropertyQuery {
    #[inline]
    pub fn is_declined(&self) -> bool {
        self.found.is_none()
    }

    pub fn slot(&self) -> Option<&PropertySlot> {
        self.found.as_ref().map(|(slot, _)| slot)
    }

    pub fn holder(&self) -> Option<Holder> {
        self.found.as_ref().map(|(_, holder)| *holder)
    }

    /// Value of a found data property
    pub fn value(&self) -> Option<&Value> {
        match &self.slot()?.kind {
            PropertyKind::Data(v) => Some(v),
            _ => None,
        }
    }
}

fn fixed(key: Atom, value: Value, writable: bool, enumerable: bool) -> PropertySlot {
    PropertySlot::with_attributes(key, PropertyKind::Data(value), writable, enumerable, false)
}

/// Properties answered by the object's payload rather than its tables
fn exotic(obj: &Object, id: ObjectId, key: Atom) -> Option<(PropertySlot, Holder)> {
    let index = key.as_index();
    match &obj.kind {
        ObjectKind::Array(_) | ObjectKind::Arguments(_) => {
            if let Some(i) = index {
                let v = obj.elements()?.get(i as usize).filter(|v| v.is_valid())?;
                return Some((PropertySlot::data(key, v.clone()), Holder::Element(id, i)));
            }
            if key == Atom::LENGTH {
                let len = Value::Number(obj.array_length().unwrap_or(0) as f64);
                let arguments = matches!(obj.kind, ObjectKind::Arguments(_));
                let slot = PropertySlot::with_attributes(
                    key,
                    PropertyKind::Data(len),
                    true,
                    false,
                    arguments,
                );
                return Some((slot, Holder::Length(id)));
            }
            None
        }
        ObjectKind::TypedArray(ta) => {
            if let Some(i) = index {
                let n = ta.get(i as usize)?;
                return Some((fixed(key, Value::Number(n), true, true), Holder::Element(id, i)));
            }
            if key == Atom::LENGTH {
                let len = Value::Number(ta.len() as f64);
                return Some((fixed(key, len, false, false), Holder::Length(id)));
            }
            None
        }
        ObjectKind::Value(Value::String(s)) => {
            if let Some(i) = index {
                let c = s.char_at(i as usize)?;
                return Some((fixed(key, Value::String(c), false, true), Holder::Element(id, i)));
            }
            if key == Atom::LENGTH {
                let len = Value::Number(s.char_len() as f64);
                return Some((fixed(key, len, false, false), Holder::Length(id)));
            }
            None
        }
        _ => None,
    }
}

impl Vm {
    /// Atomize a key value
    pub fn to_key(&mut self, key: &Value) -> Result<Atom, Exception> {
        match self.atoms.atomize(key) {
            Some(atom) => Ok(atom),
            None => Err(self.type_error("cannot convert object to property key")),
        }
    }

    fn key_name(&self, key: Atom) -> JsString {
        self.atoms.name(key)
    }

    fn base_error(&mut self, action: &str, key: Atom, base: &Value) -> Exception {
        let what = match base {
            Value::Null => "null",
            _ => "undefined",
        };
        let message = format!(
            "cannot {action} property \"{}\" of {what}",
            self.key_name(key)
        );
        self.type_error(message)
    }

    /// Resolve `key` against `base`
    ///
    /// With `own` set only the first object of the chain is searched.
    pub fn property_query(
        &mut self,
        base: &Value,
        key: &Value,
        mode: QueryMode,
        own: bool,
    ) -> Result<PropertyQuery, Exception> {
        let key = self.to_key(key)?;
        self.query_atom(base, key, mode, own)
    }

    pub fn query_atom(
        &mut self,
        base: &Value,
        key: Atom,
        mode: QueryMode,
        own: bool,
    ) -> Result<PropertyQuery, Exception> {
        let mut query = PropertyQuery {
            key,
            found: None,
            target: None,
            own_whiteout: false,
            depth: 0,
        };

        let root = match base {
            Value::String(s) => {
                if let Some(c) = key.as_index().and_then(|i| s.char_at(i as usize)) {
                    query.found = Some((fixed(key, Value::String(c), false, true), Holder::StringChar));
                    return Ok(query);
                }
                if key == Atom::LENGTH {
                    let len = Value::Number(s.char_len() as f64);
                    query.found = Some((fixed(key, len, false, false), Holder::StringChar));
                    return Ok(query);
                }
                self.prototype(Prototype::String)
            }
            Value::Number(_) => self.prototype(Prototype::Number),
            Value::Boolean(_) => self.prototype(Prototype::Boolean),
            Value::Symbol(_) => self.prototype(Prototype::Symbol),
            Value::Object(id) | Value::Array(id) | Value::Function(id) | Value::External(id) => {
                query.target = Some(*id);
                *id
            }
            Value::Undefined | Value::Null | Value::Invalid => {
                let action = match mode {
                    QueryMode::Get => "get",
                    QueryMode::Set => "set",
                    QueryMode::Delete => "delete",
                };
                return Err(self.base_error(action, key, base));
            }
        };

        let mut external = None;
        let mut current = Some(root);
        while let Some(id) = current {
            query.depth += 1;
            let obj = self.heap.object(id);

            if let Some(found) = exotic(obj, id, key) {
                query.found = Some(found);
                return Ok(query);
            }

            let mut hidden = false;
            if let Some(slot) = obj.own_slot(key) {
                if !slot.is_whiteout() {
                    query.found = Some((slot.clone(), Holder::Own(id)));
                    return Ok(query);
                }
                hidden = true;
                if query.target == Some(id) {
                    query.own_whiteout = true;
                }
            }

            if !hidden {
                if let Some(slot) = obj.shared_slot(key) {
                    query.found = Some((slot.clone(), Holder::Shared(id)));
                    return Ok(query);
                }
            }

            if external.is_none() && matches!(obj.kind, ObjectKind::External(_)) {
                external = Some(id);
            }

            if own {
                break;
            }
            current = obj.proto;
        }

        if mode == QueryMode::Get {
            if let Some(id) = external {
                if let Some(handler) = self.external_handler(id) {
                    let name = self.key_name(key);
                    if let Some(value) = handler.get(self, base, &name)? {
                        query.found = Some((PropertySlot::data(key, value), Holder::External(id)));
                    }
                }
            }
        }

        Ok(query)
    }

    /// `base[key]`
    pub fn property_get(&mut self, base: &Value, key: &Value) -> Result<Value, Exception> {
        let key = self.to_key(key)?;
        self.get_atom(base, key)
    }

    /// `base[name]` for a key given as text
    pub fn get(&mut self, base: &Value, name: &str) -> Result<Value, Exception> {
        let key = self.atoms.intern(name);
        self.get_atom(base, key)
    }

    pub fn get_atom(&mut self, base: &Value, key: Atom) -> Result<Value, Exception> {
        let query = self.query_atom(base, key, QueryMode::Get, false)?;
        let Some((slot, holder)) = query.found else {
            return Ok(Value::Undefined);
        };

        match slot.kind {
            PropertyKind::Data(value) => Ok(value),
            PropertyKind::Accessor { getter, .. } => {
                if getter.is_function() {
                    self.call(&getter, base, &[])
                } else {
                    Ok(Value::Undefined)
                }
            }
            PropertyKind::Handler { handler, magic } => {
                let call = HandlerCall {
                    this: base,
                    key,
                    setval: None,
                    magic,
                };
                handler(self, &call)
            }
            PropertyKind::Method { call, nargs, magic } => {
                let attributes = (slot.writable, slot.enumerable, slot.configurable);
                self.materialise(holder, key, call, nargs, magic, attributes)
            }
            PropertyKind::Whiteout => Ok(Value::Undefined),
        }
    }

    /// Create the per-VM function object of a shared method and store it
    /// in the holder's own table
    fn materialise(
        &mut self,
        holder: Holder,
        key: Atom,
        call: NativeFunction,
        nargs: u32,
        magic: u32,
        (writable, enumerable, configurable): (Attribute, Attribute, Attribute),
    ) -> Result<Value, Exception> {
        let name = self.key_name(key);
        let function = self.native_function(call, nargs, magic, Some(name))?;
        if let Holder::Shared(id) | Holder::Own(id) = holder {
            self.charge(MemoryTag::Object, size_of::<PropertySlot>())?;
            self.heap.object_mut(id).put(PropertySlot {
                key,
                kind: PropertyKind::Data(function.clone()),
                writable,
                enumerable,
                configurable,
            });
            log::trace!("materialised method {:?} on object {:?}", key, id);
        }
        Ok(function)
    }

    /// `base[key] = value`
    pub fn property_set(&mut self, base: &Value, key: &Value, value: Value) -> Result<(), Exception> {
        let key = self.to_key(key)?;
        self.set_atom(base, key, value)
    }

    /// `base[name] = value` for a key given as text
    pub fn set(&mut self, base: &Value, name: &str, value: Value) -> Result<(), Exception> {
        let key = self.atoms.intern(name);
        self.set_atom(base, key, value)
    }

    pub fn set_atom(&mut self, base: &Value, key: Atom, value: Value) -> Result<(), Exception> {
        let Some(id) = base.object_id() else {
            if !base.is_valid() || base.is_null_or_undefined() {
                return Err(self.base_error("set", key, base));
            }
            let message = format!(
                "cannot set property \"{}\" of primitive type",
                self.key_name(key)
            );
            return Err(self.type_error(message));
        };

        if self.set_exotic(id, key, &value)? {
            return Ok(());
        }

        let query = self.query_atom(base, key, QueryMode::Set, false)?;
        if let Some((slot, holder)) = query.found {
            match slot.kind {
                PropertyKind::Accessor { setter, .. } => {
                    if setter.is_function() {
                        self.call(&setter, base, &[value])?;
                        return Ok(());
                    }
                    let message = format!(
                        "Cannot set property \"{}\" of object which has only a getter",
                        self.key_name(key)
                    );
                    return Err(self.type_error(message));
                }
                PropertyKind::Handler { handler, magic } => {
                    if !slot.is_writable() {
                        return Err(self.read_only(key));
                    }
                    let call = HandlerCall {
                        this: base,
                        key,
                        setval: Some(&value),
                        magic,
                    };
                    handler(self, &call)?;
                    return Ok(());
                }
                _ if !slot.is_writable() => return Err(self.read_only(key)),
                _ if holder == Holder::Own(id) => {
                    if let Some(own) = self.heap.object_mut(id).own_slot_mut(key) {
                        own.kind = PropertyKind::Data(value);
                    }
                    return Ok(());
                }
                _ if holder == Holder::Shared(id) => {
                    self.charge(MemoryTag::Object, size_of::<PropertySlot>())?;
                    self.heap.object_mut(id).put(PropertySlot {
                        kind: PropertyKind::Data(value),
                        ..slot
                    });
                    return Ok(());
                }
                _ => {}
            }
        }

        if let Some(handler) = self.external_handler(id) {
            let name = self.key_name(key);
            if handler.set(self, base, &name, &value)? {
                return Ok(());
            }
        }

        self.add_own(id, key, PropertySlot::data(key, value), query.own_whiteout)
    }

    fn read_only(&mut self, key: Atom) -> Exception {
        let message = format!(
            "Cannot assign to read-only property \"{}\" of object",
            self.key_name(key)
        );
        self.type_error(message)
    }

    fn add_own(
        &mut self,
        id: ObjectId,
        key: Atom,
        slot: PropertySlot,
        whiteout: bool,
    ) -> Result<(), Exception> {
        if !self.heap.object(id).extensible {
            let message = format!(
                "Cannot add property \"{}\", object is not extensible",
                self.key_name(key)
            );
            return Err(self.type_error(message));
        }
        if whiteout {
            log::trace!("reusing whiteout slot for {:?}", key);
        } else {
            self.charge(MemoryTag::Object, size_of::<PropertySlot>())?;
        }
        self.heap.object_mut(id).put(slot);
        Ok(())
    }

    fn array_length(&mut self, value: &Value) -> Result<u32, Exception> {
        match value.as_number() {
            Some(n) if n >= 0.0 && n <= u32::MAX as f64 && n.fract() == 0.0 => Ok(n as u32),
            _ => Err(self.range_error("Invalid array length")),
        }
    }

    /// Grow dense elements to `len`, charging the arena first
    ///
    /// Plain data indices that were kept in the own table move into the
    /// grown prefix.
    fn grow_elements(&mut self, id: ObjectId, len: u32) -> Result<(), Exception> {
        let current = self.heap.object(id).elements().map_or(0, Vec::len);
        let extra = (len as usize).saturating_sub(current);
        if extra > 0 {
            self.charge(MemoryTag::Object, extra * size_of::<Value>())?;
        }

        let obj = self.heap.object_mut(id);
        let sparse = matches!(&obj.kind, ObjectKind::Array(array) if array.is_sparse());
        if let Some(elts) = obj.elements_mut() {
            elts.resize(len as usize, Value::Invalid);
        }
        if sparse {
            for i in current as u32..len {
                let Some(key) = Atom::from_index(i) else {
                    break;
                };
                let moved = match obj.own_slot(key) {
                    Some(slot)
                        if slot.is_writable() && slot.is_enumerable() && slot.is_configurable() =>
                    {
                        match &slot.kind {
                            PropertyKind::Data(value) => Some(value.clone()),
                            _ => None,
                        }
                    }
                    _ => None,
                };
                if let Some(value) = moved {
                    obj.remove(key);
                    if let Some(slot) = obj.elements_mut().and_then(|e| e.get_mut(i as usize)) {
                        *slot = value;
                    }
                }
            }
        }
        if let ObjectKind::Array(array) = &mut obj.kind {
            array.length = array.length.max(len);
        }
        Ok(())
    }

    /// Raise the `length` of an array to cover `index`
    fn extend_array_length(&mut self, id: ObjectId, index: u32) {
        if let ObjectKind::Array(array) = &mut self.heap.object_mut(id).kind {
            array.length = array.length.max(index.saturating_add(1));
        }
    }

    /// Set `length`; elements at or past it are dropped from both stores
    fn set_array_length(&mut self, id: ObjectId, length: u32) {
        let obj = self.heap.object_mut(id);
        let ObjectKind::Array(array) = &mut obj.kind else {
            return;
        };
        let sparse = array.is_sparse();
        array.dense.truncate(length as usize);
        array.length = length;
        if !sparse {
            return;
        }

        let doomed: Vec<Atom> = obj
            .hash
            .iter()
            .filter(|(_, slot)| slot.key.as_index().is_some_and(|i| i >= length))
            .map(|(_, slot)| slot.key)
            .collect();
        log::trace!("array truncated to {}, {} hashed elements dropped", length, doomed.len());
        for key in doomed {
            obj.remove(key);
        }
    }

    /// Stores answered by the object's payload; `false` falls back to tables
    fn set_exotic(&mut self, id: ObjectId, key: Atom, value: &Value) -> Result<bool, Exception> {
        let obj = self.heap.object(id);
        let index = key.as_index();

        match &obj.kind {
            ObjectKind::Array(array) => {
                let len = array.dense.len() as u32;
                if let Some(i) = index {
                    if i >= len {
                        if !obj.extensible {
                            return Ok(false);
                        }
                        if i - len > MAX_DENSE_GAP {
                            // too far for the dense prefix: an own table entry
                            let own = obj.own_slot(key);
                            if own.is_some_and(|slot| !slot.is_whiteout()) {
                                return Ok(false);
                            }
                            let whiteout = own.is_some();
                            self.add_own(id, key, PropertySlot::data(key, value.clone()), whiteout)?;
                            self.extend_array_length(id, i);
                            return Ok(true);
                        }
                        self.grow_elements(id, i + 1)?;
                    }
                    if let Some(slot) = self
                        .heap
                        .object_mut(id)
                        .elements_mut()
                        .and_then(|e| e.get_mut(i as usize))
                    {
                        *slot = value.clone();
                    }
                    return Ok(true);
                }
                if key == Atom::LENGTH {
                    let length = self.array_length(value)?;
                    self.set_array_length(id, length);
                    return Ok(true);
                }
                Ok(false)
            }
            ObjectKind::Arguments(elts) => {
                let Some(i) = index.filter(|i| (*i as usize) < elts.len()) else {
                    return Ok(false);
                };
                if let Some(slot) = self
                    .heap
                    .object_mut(id)
                    .elements_mut()
                    .and_then(|e| e.get_mut(i as usize))
                {
                    *slot = value.clone();
                }
                Ok(true)
            }
            ObjectKind::TypedArray(_) => {
                if let Some(i) = index {
                    let n = value.as_number().unwrap_or(f64::NAN);
                    if let ObjectKind::TypedArray(ta) = &mut self.heap.object_mut(id).kind {
                        ta.set(i as usize, n);
                    }
                    return Ok(true);
                }
                if key == Atom::LENGTH {
                    return Err(self.read_only(key));
                }
                Ok(false)
            }
            ObjectKind::Value(Value::String(s)) => {
                let is_char = index.is_some_and(|i| (i as usize) < s.char_len());
                if is_char || key == Atom::LENGTH {
                    return Err(self.read_only(key));
                }
                Ok(false)
            }
            _ => Ok(false),
        }
    }

    /// `delete base[key]`
    pub fn property_delete(&mut self, base: &Value, key: &Value) -> Result<bool, Exception> {
        let key = self.to_key(key)?;
        self.delete_atom(base, key)
    }

    pub fn delete_atom(&mut self, base: &Value, key: Atom) -> Result<bool, Exception> {
        let Some(id) = base.object_id() else {
            if !base.is_valid() || base.is_null_or_undefined() {
                return Err(self.base_error("delete", key, base));
            }
            if let Value::String(s) = base {
                let is_char = key.as_index().is_some_and(|i| (i as usize) < s.char_len());
                if is_char || key == Atom::LENGTH {
                    return Err(self.undeletable(key));
                }
            }
            return Ok(true);
        };

        let obj = self.heap.object(id);
        let index = key.as_index();
        match &obj.kind {
            ObjectKind::Array(_) | ObjectKind::Arguments(_) => {
                let dense = obj.elements().map_or(0, Vec::len);
                if let Some(i) = index.filter(|i| (*i as usize) < dense) {
                    if let Some(slot) = self
                        .heap
                        .object_mut(id)
                        .elements_mut()
                        .and_then(|e| e.get_mut(i as usize))
                    {
                        *slot = Value::Invalid;
                    }
                    return Ok(true);
                }
                if key == Atom::LENGTH && matches!(obj.kind, ObjectKind::Array(_)) {
                    return Err(self.undeletable(key));
                }
            }
            ObjectKind::TypedArray(ta) => {
                let in_range = index.is_some_and(|i| (i as usize) < ta.len());
                if in_range || key == Atom::LENGTH {
                    return Err(self.undeletable(key));
                }
            }
            ObjectKind::Value(Value::String(s)) => {
                let is_char = index.is_some_and(|i| (i as usize) < s.char_len());
                if is_char || key == Atom::LENGTH {
                    return Err(self.undeletable(key));
                }
            }
            _ => {}
        }

        let own = obj.own_slot(key);
        let whiteout = own.is_some_and(PropertySlot::is_whiteout);
        let own = own.filter(|s| !s.is_whiteout()).map(PropertySlot::is_configurable);
        let shared = obj.shared_slot(key).map(PropertySlot::is_configurable);
        let visible_shared = if whiteout { None } else { shared };

        match (own, visible_shared) {
            (Some(false), _) | (None, Some(false)) => Err(self.undeletable(key)),
            (Some(true), _) | (None, Some(true)) => {
                let obj = self.heap.object_mut(id);
                obj.remove(key);
                if shared.is_some() {
                    obj.put(PropertySlot::whiteout(key));
                }
                Ok(true)
            }
            (None, None) => {
                if let Some(handler) = self.external_handler(id) {
                    let name = self.key_name(key);
                    handler.delete(self, base, &name)?;
                }
                Ok(true)
            }
        }
    }

    fn undeletable(&mut self, key: Atom) -> Exception {
        let message = format!("Cannot delete property \"{}\" of object", self.key_name(key));
        self.type_error(message)
    }

    /// `Object.defineProperty(object, key, desc)`
    ///
    /// Unset attributes of a new property default to false. Integer keys of
    /// arrays are stored as dense elements, which are always writable,
    /// enumerable and configurable.
    pub fn property_define(
        &mut self,
        object: &Value,
        key: &Value,
        desc: PropertyDescriptor,
    ) -> Result<(), Exception> {
        let key = self.to_key(key)?;
        self.define_atom(object, key, desc)
    }

    pub fn define_atom(
        &mut self,
        object: &Value,
        key: Atom,
        desc: PropertyDescriptor,
    ) -> Result<(), Exception> {
        let Some(id) = object.object_id() else {
            return Err(self.type_error("Object.defineProperty called on non-object"));
        };

        let is_array = matches!(self.heap.object(id).kind, ObjectKind::Array(_));
        if is_array && !desc.is_accessor() && (key.as_index().is_some() || key == Atom::LENGTH) {
            let value = desc.value.clone().unwrap_or(Value::Undefined);
            if self.set_exotic(id, key, &value)? {
                return Ok(());
            }
        }

        self.define_slot(id, key, desc)?;
        if let Some(i) = key.as_index().filter(|_| is_array) {
            self.extend_array_length(id, i);
        }
        Ok(())
    }

    fn define_slot(
        &mut self,
        id: ObjectId,
        key: Atom,
        desc: PropertyDescriptor,
    ) -> Result<(), Exception> {
        let obj = self.heap.object(id);
        let own = obj.own_slot(key);
        let whiteout = own.is_some_and(PropertySlot::is_whiteout);
        let current = match own {
            Some(slot) if !slot.is_whiteout() => Some(slot.clone()),
            Some(_) => None,
            None => obj.shared_slot(key).cloned(),
        };

        let Some(current) = current else {
            let slot = if desc.is_accessor() {
                PropertySlot {
                    key,
                    kind: PropertyKind::Accessor {
                        getter: desc.getter.unwrap_or(Value::Undefined),
                        setter: desc.setter.unwrap_or(Value::Undefined),
                    },
                    writable: Attribute::Unset,
                    enumerable: desc.enumerable.or(Attribute::False),
                    configurable: desc.configurable.or(Attribute::False),
                }
            } else {
                PropertySlot {
                    key,
                    kind: PropertyKind::Data(desc.value.unwrap_or(Value::Undefined)),
                    writable: desc.writable.or(Attribute::False),
                    enumerable: desc.enumerable.or(Attribute::False),
                    configurable: desc.configurable.or(Attribute::False),
                }
            };
            return self.add_own(id, key, slot, whiteout);
        };

        if !current.is_configurable() && !Self::compatible(&current, &desc) {
            let message = format!("Cannot redefine property: \"{}\"", self.key_name(key));
            return Err(self.type_error(message));
        }

        let was_accessor = current.is_accessor();
        let to_accessor = desc.is_accessor();
        let to_data = desc.is_data();
        let kind = if to_accessor {
            let (getter, setter) = match current.kind {
                PropertyKind::Accessor { getter, setter } => (getter, setter),
                _ => (Value::Undefined, Value::Undefined),
            };
            PropertyKind::Accessor {
                getter: desc.getter.unwrap_or(getter),
                setter: desc.setter.unwrap_or(setter),
            }
        } else if let Some(value) = desc.value {
            PropertyKind::Data(value)
        } else if to_data && was_accessor {
            PropertyKind::Data(Value::Undefined)
        } else {
            current.kind
        };

        let writable = if matches!(kind, PropertyKind::Accessor { .. }) {
            Attribute::Unset
        } else if was_accessor {
            desc.writable.or(Attribute::False)
        } else {
            desc.writable.or(current.writable)
        };

        self.heap.object_mut(id).put(PropertySlot {
            key,
            kind,
            writable,
            enumerable: desc.enumerable.or(current.enumerable),
            configurable: desc.configurable.or(current.configurable),
        });
        Ok(())
    }

    /// Whether `desc` may be applied to a non-configurable `current`
    fn compatible(current: &PropertySlot, desc: &PropertyDescriptor) -> bool {
        if desc.configurable.is_true() {
            return false;
        }
        if desc.enumerable.is_set() && desc.enumerable != current.enumerable {
            return false;
        }
        match &current.kind {
            PropertyKind::Data(value) => {
                if desc.is_accessor() {
                    return false;
                }
                current.is_writable()
                    || (!desc.writable.is_true()
                        && desc.value.as_ref().is_none_or(|v| v.strict_equals(value)))
            }
            PropertyKind::Accessor { getter, setter } => {
                !desc.is_data()
                    && desc.getter.as_ref().is_none_or(|g| g.strict_equals(getter))
                    && desc.setter.as_ref().is_none_or(|s| s.strict_equals(setter))
            }
            _ => desc.value.is_none() && !desc.is_accessor() && !desc.writable.is_true(),
        }
    }

    /// Own property keys: integer indices ascending, then own-table keys in
    /// insertion order, then shared keys not shadowed by the own table
    ///
    /// Only enumerable string keys unless `all` is set.
    pub fn own_keys(&mut self, object: &Value, all: bool) -> Result<Vec<Value>, Exception> {
        let Some(id) = object.object_id() else {
            if let Value::String(s) = object {
                let mut keys: Vec<Value> = (0..s.char_len())
                    .map(|i| Value::String(JsString::new(&i.to_string())))
                    .collect();
                if all {
                    keys.push(self.atoms.key_value(Atom::LENGTH));
                }
                return Ok(keys);
            }
            return Ok(Vec::new());
        };

        let obj = self.heap.object(id);
        let mut indices: Vec<u32> = Vec::new();
        let mut names: Vec<Atom> = Vec::new();
        let mut length = false;

        match &obj.kind {
            ObjectKind::Array(ArrayElements { dense: elts, .. }) | ObjectKind::Arguments(elts) => {
                indices.extend(
                    elts.iter()
                        .enumerate()
                        .filter(|(_, v)| v.is_valid())
                        .map(|(i, _)| i as u32),
                );
                length = true;
            }
            ObjectKind::TypedArray(ta) => {
                indices.extend(0..ta.len() as u32);
                length = true;
            }
            ObjectKind::Value(Value::String(s)) => {
                indices.extend(0..s.char_len() as u32);
                length = true;
            }
            _ => {}
        }

        let visible = |slot: &PropertySlot| {
            !slot.is_whiteout() && (all || (slot.is_enumerable() && !slot.key.is_symbol()))
        };
        for (_, slot) in obj.hash.iter().filter(|(_, s)| visible(s)) {
            match slot.key.as_index() {
                Some(i) => indices.push(i),
                None => names.push(slot.key),
            }
        }
        if let Some(shared) = &obj.shared_hash {
            for (_, slot) in shared.iter().filter(|(_, s)| visible(s)) {
                if obj.own_slot(slot.key).is_some() {
                    continue;
                }
                match slot.key.as_index() {
                    Some(i) => indices.push(i),
                    None => names.push(slot.key),
                }
            }
        }

        indices.sort_unstable();
        indices.dedup();
        let mut keys: Vec<Value> = indices
            .into_iter()
            .map(|i| Value::String(JsString::new(&i.to_string())))
            .collect();
        if all && length {
            keys.push(self.atoms.key_value(Atom::LENGTH));
        }
        keys.extend(names.into_iter().map(|atom| self.atoms.key_value(atom)));

        if let Some(handler) = self.external_handler(id) {
            for name in handler.keys(self, object)? {
                let value = Value::String(name);
                if !keys.contains(&value) {
                    keys.push(value);
                }
            }
        }
        Ok(keys)
    }

    /// Replace the prototype of `object`, refusing cycles
    pub fn set_prototype_of(
        &mut self,
        object: ObjectId,
        proto: Option<ObjectId>,
    ) -> Result<(), Exception> {
        let mut link = proto;
        while let Some(id) = link {
            if id == object {
                return Err(self.type_error("Cyclic __proto__ value"));
            }
            link = self.heap.object(id).proto;
        }

        let obj = self.heap.object(object);
        if obj.proto == proto {
            return Ok(());
        }
        if !obj.extensible {
            return Err(self.type_error("object is not extensible"));
        }
        self.heap.object_mut(object).proto = proto;
        Ok(())
    }

    #[inline]
    pub fn prototype_of(&self, object: ObjectId) -> Option<ObjectId> {
        self.heap.object(object).proto
    }

    pub fn prevent_extensions(&mut self, object: ObjectId) {
        self.heap.object_mut(object).extensible = false;
    }

    /// Allocate an empty object
    pub fn object_alloc(&mut self, proto: Option<ObjectId>) -> Result<Value, Exception> {
        let id = self.alloc(Object::new(ObjectKind::Plain, proto))?;
        Ok(Value::Object(id))
    }

    /// Plain object inheriting from `Object.prototype`
    pub fn object_new(&mut self) -> Result<Value, Exception> {
        let proto = self.prototype(Prototype::Object);
        self.object_alloc(Some(proto))
    }

    pub fn array_new(&mut self, elements: Vec<Value>) -> Result<Value, Exception> {
        self.charge(MemoryTag::Object, elements.len() * size_of::<Value>())?;
        let proto = self.prototype(Prototype::Array);
        let id = self.alloc(Object::new(ObjectKind::Array(ArrayElements::new(elements)), Some(proto)))?;
        Ok(Value::Array(id))
    }

    pub fn typed_array_new(&mut self, kind: TypedArrayKind, length: usize) -> Result<Value, Exception> {
        self.charge(MemoryTag::Object, length * kind.element_size())?;
        let proto = self.prototype(Prototype::TypedArray);
        let ta = TypedArray::new(kind, length);
        let id = self.alloc(Object::new(ObjectKind::TypedArray(ta), Some(proto)))?;
        Ok(Value::Object(id))
    }

    /// Box a primitive
    pub fn object_value(&mut self, value: Value) -> Result<Value, Exception> {
        let proto = match &value {
            Value::String(_) => Prototype::String,
            Value::Number(_) => Prototype::Number,
            Value::Boolean(_) => Prototype::Boolean,
            Value::Symbol(_) => Prototype::Symbol,
            _ => return Err(self.type_error("cannot box a non-primitive value")),
        };
        let proto = self.prototype(proto);
        let id = self.alloc(Object::new(ObjectKind::Value(value), Some(proto)))?;
        Ok(Value::Object(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Options;

    fn vm() -> Vm {
        Vm::create(Options::default()).unwrap()
    }

    #[test]
    fn test_prototype_chain_lookup_and_delete() {
        let mut vm = vm();
        let parent = vm.object_new().unwrap();
        let child = vm.object_alloc(parent.object_id()).unwrap();
        let foo = Value::string("foo");

        vm.property_set(&parent, &foo, Value::Number(1.0)).unwrap();
        let q = vm.property_query(&child, &foo, QueryMode::Get, false).unwrap();
        assert_eq!(q.value(), Some(&Value::Number(1.0)));
        assert_eq!(q.holder(), Some(Holder::Own(parent.object_id().unwrap())));
        assert_eq!(q.depth, 2);

        let own = vm.property_query(&child, &foo, QueryMode::Get, true).unwrap();
        assert!(own.is_declined());

        assert!(vm.property_delete(&parent, &foo).unwrap());
        let q = vm.property_query(&child, &foo, QueryMode::Get, false).unwrap();
        assert!(q.is_declined());
        assert_eq!(vm.property_get(&child, &foo).unwrap(), Value::Undefined);
    }

    #[test]
    fn test_string_primitive_keys() {
        let mut vm = vm();
        let s = Value::string("héllo");
        assert_eq!(vm.get(&s, "length").unwrap(), Value::Number(5.0));
        assert_eq!(
            vm.property_get(&s, &Value::Number(1.0)).unwrap(),
            Value::string("é")
        );
        // "01" is not a canonical index
        assert_eq!(vm.get(&s, "01").unwrap(), Value::Undefined);
        assert!(vm.set(&s, "x", Value::Null).is_err());
        assert!(vm.property_delete(&s, &Value::Number(0.0)).is_err());
    }

    #[test]
    fn test_undefined_base_is_type_error() {
        let mut vm = vm();
        let err = vm.get(&Value::Undefined, "k").unwrap_err();
        assert_eq!(
            vm.value_to_string(err.value().unwrap()).unwrap(),
            "TypeError: cannot get property \"k\" of undefined"
        );
        assert!(vm.set(&Value::Null, "k", Value::Null).is_err());
    }

    #[test]
    fn test_array_elements_and_length() {
        let mut vm = vm();
        let arr = vm.array_new(vec![Value::Number(1.0)]).unwrap();
        vm.property_set(&arr, &Value::Number(3.0), Value::Number(4.0)).unwrap();
        assert_eq!(vm.get(&arr, "length").unwrap(), Value::Number(4.0));
        assert_eq!(vm.property_get(&arr, &Value::Number(1.0)).unwrap(), Value::Undefined);
        // -0 is index 0
        assert_eq!(vm.property_get(&arr, &Value::Number(-0.0)).unwrap(), Value::Number(1.0));

        vm.set(&arr, "length", Value::Number(1.0)).unwrap();
        assert_eq!(vm.property_get(&arr, &Value::Number(3.0)).unwrap(), Value::Undefined);
        assert!(vm.set(&arr, "length", Value::Number(-1.0)).is_err());

        vm.property_delete(&arr, &Value::Number(0.0)).unwrap();
        assert_eq!(vm.get(&arr, "length").unwrap(), Value::Number(1.0));
        assert!(vm.own_keys(&arr, false).unwrap().is_empty());
    }

    #[test]
    fn test_far_index_extends_length() {
        let mut vm = vm();
        let arr = vm.array_new(Vec::new()).unwrap();
        vm.property_set(&arr, &Value::Number(100_000.0), Value::Number(1.0)).unwrap();
        assert_eq!(vm.get(&arr, "length").unwrap(), Value::Number(100_001.0));
        assert_eq!(
            vm.property_get(&arr, &Value::Number(100_000.0)).unwrap(),
            Value::Number(1.0)
        );
        assert_eq!(vm.property_get(&arr, &Value::Number(5.0)).unwrap(), Value::Undefined);
        let id = arr.object_id().unwrap();
        assert!(vm.heap.object(id).elements().unwrap().is_empty());
        assert_eq!(
            vm.own_keys(&arr, false).unwrap(),
            vec![Value::String(JsString::new("100000"))]
        );
    }

    #[test]
    fn test_truncation_drops_hashed_indices() {
        let mut vm = vm();
        let arr = vm.array_new(vec![Value::Number(0.0)]).unwrap();
        vm.property_set(&arr, &Value::Number(70_000.0), Value::Number(7.0)).unwrap();
        vm.property_set(&arr, &Value::Number(90_000.0), Value::Number(9.0)).unwrap();
        assert_eq!(vm.get(&arr, "length").unwrap(), Value::Number(90_001.0));

        vm.set(&arr, "length", Value::Number(80_000.0)).unwrap();
        assert_eq!(vm.get(&arr, "length").unwrap(), Value::Number(80_000.0));
        assert_eq!(vm.property_get(&arr, &Value::Number(90_000.0)).unwrap(), Value::Undefined);
        assert_eq!(
            vm.property_get(&arr, &Value::Number(70_000.0)).unwrap(),
            Value::Number(7.0)
        );

        vm.set(&arr, "length", Value::Number(1.0)).unwrap();
        assert_eq!(vm.property_get(&arr, &Value::Number(70_000.0)).unwrap(), Value::Undefined);
        assert_eq!(
            vm.own_keys(&arr, false).unwrap(),
            vec![Value::String(JsString::new("0"))]
        );

        // growing length alone allocates no elements
        vm.set(&arr, "length", Value::Number(1_000_000.0)).unwrap();
        assert_eq!(vm.get(&arr, "length").unwrap(), Value::Number(1_000_000.0));
        let id = arr.object_id().unwrap();
        assert_eq!(vm.heap.object(id).elements().unwrap().len(), 1);
    }

    #[test]
    fn test_dense_growth_absorbs_hashed_index() {
        let mut vm = vm();
        let arr = vm.array_new(Vec::new()).unwrap();
        let far = Value::Number(40_000.0);
        vm.property_set(&arr, &far, Value::Number(4.0)).unwrap();
        // fill towards the hashed index until the dense prefix covers it
        vm.property_set(&arr, &Value::Number(30_000.0), Value::Number(3.0)).unwrap();
        vm.property_set(&arr, &Value::Number(40_001.0), Value::Number(5.0)).unwrap();
        let id = arr.object_id().unwrap();
        assert_eq!(vm.heap.object(id).elements().unwrap().len(), 40_002);
        assert_eq!(vm.property_get(&arr, &far).unwrap(), Value::Number(4.0));

        vm.property_delete(&arr, &far).unwrap();
        assert_eq!(vm.property_get(&arr, &far).unwrap(), Value::Undefined);
        assert_eq!(vm.get(&arr, "length").unwrap(), Value::Number(40_002.0));
    }

    #[test]
    fn test_whiteout_hides_shared_method() {
        let mut vm = vm();
        let object_proto = Value::Object(vm.prototype(Prototype::Object));
        let name = Value::string("hasOwnProperty");

        let q = vm.property_query(&object_proto, &name, QueryMode::Get, true).unwrap();
        assert!(matches!(q.holder(), Some(Holder::Shared(_))));
        assert!(vm.property_get(&object_proto, &name).unwrap().is_function());

        assert!(vm.property_delete(&object_proto, &name).unwrap());
        let q = vm.property_query(&object_proto, &name, QueryMode::Set, true).unwrap();
        assert!(q.is_declined());
        assert!(q.own_whiteout);

        vm.property_set(&object_proto, &name, Value::Number(7.0)).unwrap();
        assert_eq!(vm.property_get(&object_proto, &name).unwrap(), Value::Number(7.0));
    }

    #[test]
    fn test_define_non_configurable() {
        let mut vm = vm();
        let obj = vm.object_new().unwrap();
        let k = Value::string("k");
        vm.property_define(&obj, &k, PropertyDescriptor::value(Value::Number(1.0)))
            .unwrap();

        let q = vm.property_query(&obj, &k, QueryMode::Get, true).unwrap();
        let slot = q.slot().unwrap();
        assert!(!slot.is_writable() && !slot.is_enumerable() && !slot.is_configurable());

        assert!(vm.property_set(&obj, &k, Value::Number(2.0)).is_err());
        assert!(vm.property_delete(&obj, &k).is_err());
        // same value is accepted, a different one is not
        assert!(vm
            .property_define(&obj, &k, PropertyDescriptor::value(Value::Number(1.0)))
            .is_ok());
        assert!(vm
            .property_define(&obj, &k, PropertyDescriptor::value(Value::Number(2.0)))
            .is_err());
        assert!(vm.own_keys(&obj, false).unwrap().is_empty());
        assert_eq!(vm.own_keys(&obj, true).unwrap(), vec![k]);
    }

    #[test]
    fn test_writable_narrowing() {
        let mut vm = vm();
        let obj = vm.object_new().unwrap();
        let k = Value::string("w");
        let desc = PropertyDescriptor::value(Value::Number(1.0)).writable(true);
        vm.property_define(&obj, &k, desc).unwrap();
        vm.property_define(&obj, &k, PropertyDescriptor::default().writable(false))
            .unwrap();
        assert!(vm.property_set(&obj, &k, Value::Number(3.0)).is_err());
        assert!(vm
            .property_define(&obj, &k, PropertyDescriptor::default().writable(true))
            .is_err());
    }

    #[test]
    fn test_non_extensible() {
        let mut vm = vm();
        let obj = vm.object_new().unwrap();
        vm.set(&obj, "a", Value::Number(1.0)).unwrap();
        vm.prevent_extensions(obj.object_id().unwrap());
        vm.set(&obj, "a", Value::Number(2.0)).unwrap();
        assert!(vm.set(&obj, "b", Value::Number(2.0)).is_err());
    }

    #[test]
    fn test_own_keys_order() {
        let mut vm = vm();
        let obj = vm.object_new().unwrap();
        vm.set(&obj, "b", Value::Null).unwrap();
        vm.set(&obj, "2", Value::Null).unwrap();
        vm.set(&obj, "a", Value::Null).unwrap();
        vm.set(&obj, "0", Value::Null).unwrap();
        let keys = vm.own_keys(&obj, false).unwrap();
        let expected: Vec<Value> = ["0", "2", "b", "a"].iter().map(|s| Value::string(s)).collect();
        assert_eq!(keys, expected);
    }

    #[test]
    fn test_cyclic_prototype_rejected() {
        let mut vm = vm();
        let a = vm.object_new().unwrap().object_id().unwrap();
        let b = vm.object_alloc(Some(a)).unwrap().object_id().unwrap();
        assert!(vm.set_prototype_of(a, Some(b)).is_err());
        vm.set_prototype_of(b, None).unwrap();
        assert_eq!(vm.prototype_of(b), None);
    }

    #[test]
    fn test_accessor_property() {
        fn getter(_vm: &mut Vm, _this: &Value, _args: &[Value]) -> Result<Value, Exception> {
            Ok(Value::Number(42.0))
        }
        let mut vm = vm();
        let obj = vm.object_new().unwrap();
        let g = vm.native_function(getter, 0, 0, None).unwrap();
        let k = Value::string("g");
        vm.property_define(&obj, &k, PropertyDescriptor::accessor(Some(g), None))
            .unwrap();
        assert_eq!(vm.property_get(&obj, &k).unwrap(), Value::Number(42.0));
        assert!(vm.property_set(&obj, &k, Value::Null).is_err());
    }

    #[test]
    fn test_typed_array() {
        let mut vm = vm();
        let ta = vm.typed_array_new(TypedArrayKind::Uint8, 2).unwrap();
        vm.property_set(&ta, &Value::Number(0.0), Value::Number(258.0)).unwrap();
        assert_eq!(vm.property_get(&ta, &Value::Number(0.0)).unwrap(), Value::Number(2.0));
        assert_eq!(vm.get(&ta, "length").unwrap(), Value::Number(2.0));
        assert!(vm.set(&ta, "length", Value::Number(5.0)).is_err());
    }

    #[test]
    fn test_boxed_primitives_use_prototypes() {
        let mut vm = vm();
        let to_string = vm.get(&Value::Number(1.0), "toString").unwrap();
        assert!(to_string.is_function());
        let boxed = vm.object_value(Value::string("ab")).unwrap();
        assert_eq!(vm.get(&boxed, "length").unwrap(), Value::Number(2.0));
        assert_eq!(vm.property_get(&boxed, &Value::Number(1.0)).unwrap(), Value::string("b"));
    }
}
