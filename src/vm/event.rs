//! Host events
//!
//! An event couples a script function with an optional host destructor.
//! Hosts post events with arguments; [`Vm::run`] drains the posted queue in
//! FIFO order between synchronous runs, never in the middle of one.

use std::collections::VecDeque;
use std::fmt;
use std::mem::size_of;

use crate::arena::MemoryTag;
use crate::context::Vm;
use crate::error::{Exception, FatalError, VmError};
use crate::runtime::flathsh::FlatHash;
use crate::value::Value;

/// Identifier handed to the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventId(u32);

impl EventId {
    #[inline]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

/// Releases host resources tied to an event
pub type EventDestructor = Box<dyn FnOnce() + Send>;

/// Outcome of [`Vm::run`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// Nothing is waiting
    Ok,
    /// Events are still registered
    Again,
}

struct Event {
    function: Value,
    args: Vec<Value>,
    once: bool,
    posted: bool,
    destructor: Option<EventDestructor>,
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("function", &self.function)
            .field("args", &self.args.len())
            .field("once", &self.once)
            .field("posted", &self.posted)
            .finish()
    }
}

impl Event {
    fn release(&mut self) {
        if let Some(destructor) = self.destructor.take() {
            destructor();
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct EventQueue {
    events: FlatHash<Event>,
    posted: VecDeque<EventId>,
    next: u32,
}

impl EventQueue {
    fn remove(&mut self, id: EventId) -> bool {
        match self.events.delete(id.0) {
            Some(mut event) => {
                event.release();
                self.posted.retain(|p| *p != id);
                true
            }
            None => false,
        }
    }
}

impl Drop for EventQueue {
    fn drop(&mut self) {
        let ids: Vec<u32> = self.events.iter().map(|(key, _)| key).collect();
        for id in ids {
            if let Some(mut event) = self.events.delete(id) {
                event.release();
            }
        }
    }
}

impl Vm {
    /// Register `function` to be called when the host posts the event
    pub fn add_event(
        &mut self,
        function: Value,
        once: bool,
        destructor: Option<EventDestructor>,
    ) -> Result<EventId, Exception> {
        let callable = function
            .object_id()
            .is_some_and(|id| self.heap.object(id).is_callable());
        if !callable {
            return Err(self.type_error("event handler is not a function"));
        }
        self.charge(MemoryTag::Event, size_of::<Event>())?;

        self.events.next = self.events.next.wrapping_add(1);
        let id = EventId(self.events.next);
        self.events.events.insert(
            id.0,
            Event {
                function,
                args: Vec::new(),
                once,
                posted: false,
                destructor,
            },
            true,
        );
        log::debug!("event {} added (once: {})", id.0, once);
        Ok(id)
    }

    /// Queue a registered event with `args`; `false` if it is unknown
    pub fn post_event(&mut self, id: EventId, args: Vec<Value>) -> bool {
        let Some(event) = self.events.events.find_mut(id.0) else {
            return false;
        };
        event.args = args;
        if !event.posted {
            event.posted = true;
            self.events.posted.push_back(id);
        }
        log::debug!("event {} posted", id.0);
        true
    }

    /// Withdraw an event, running its destructor
    pub fn del_event(&mut self, id: EventId) -> bool {
        let removed = self.events.remove(id);
        if removed {
            self.heap.arena_mut().release(MemoryTag::Event, size_of::<Event>());
            log::debug!("event {} deleted", id.0);
        }
        removed
    }

    /// Any events registered
    pub fn waiting(&self) -> bool {
        !self.events.events.is_empty()
    }

    /// Any events posted but not yet dispatched
    pub fn posted(&self) -> bool {
        !self.events.posted.is_empty()
    }

    /// Dispatch every posted event
    pub fn run(&mut self) -> Result<RunStatus, VmError> {
        if self.poisoned {
            return Err(VmError::Exception(FatalError::Poisoned.into()));
        }
        while let Some(id) = self.events.posted.pop_front() {
            let Some(event) = self.events.events.find_mut(id.0) else {
                continue;
            };
            event.posted = false;
            let function = event.function.clone();
            let args = std::mem::take(&mut event.args);
            if event.once {
                self.del_event(id);
            }

            log::debug!("dispatching event {}", id.0);
            let result = self.call(&function, &Value::Undefined, &args);
            self.finish(result)?;
        }
        Ok(if self.waiting() {
            RunStatus::Again
        } else {
            RunStatus::Ok
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Options;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn record(vm: &mut Vm, _this: &Value, args: &[Value]) -> Result<Value, Exception> {
        let log = vm.global_value("log")?;
        let len = vm.get(&log, "length")?;
        let index = len.as_number().unwrap_or(0.0);
        let value = args.first().cloned().unwrap_or(Value::Undefined);
        vm.property_set(&log, &Value::Number(index), value)?;
        Ok(Value::Undefined)
    }

    fn setup() -> (Vm, Value) {
        let mut vm = Vm::create(Options::default()).unwrap();
        let log = vm.array_new(Vec::new()).unwrap();
        vm.bind("log", log).unwrap();
        let f = vm.native_function(record, 1, 0, None).unwrap();
        (vm, f)
    }

    #[test]
    fn test_fifo_dispatch() {
        let (mut vm, f) = setup();
        let a = vm.add_event(f.clone(), false, None).unwrap();
        let b = vm.add_event(f, false, None).unwrap();
        assert!(vm.post_event(b, vec![Value::Number(2.0)]));
        assert!(vm.post_event(a, vec![Value::Number(1.0)]));
        assert!(vm.posted());

        assert_eq!(vm.run().unwrap(), RunStatus::Again);
        let log = vm.global_value("log").unwrap();
        assert_eq!(vm.get(&log, "0").unwrap(), Value::Number(2.0));
        assert_eq!(vm.get(&log, "1").unwrap(), Value::Number(1.0));
        assert!(!vm.posted());
    }

    #[test]
    fn test_once_event_is_removed() {
        let (mut vm, f) = setup();
        let id = vm.add_event(f, true, None).unwrap();
        vm.post_event(id, Vec::new());
        assert_eq!(vm.run().unwrap(), RunStatus::Ok);
        assert!(!vm.waiting());
        assert!(!vm.post_event(id, Vec::new()));
    }

    #[test]
    fn test_deleted_event_never_fires() {
        let (mut vm, f) = setup();
        let id = vm.add_event(f, false, None).unwrap();
        vm.post_event(id, vec![Value::Null]);
        assert!(vm.del_event(id));
        assert!(!vm.del_event(id));
        assert_eq!(vm.run().unwrap(), RunStatus::Ok);
        let log = vm.global_value("log").unwrap();
        assert_eq!(vm.get(&log, "length").unwrap(), Value::Number(0.0));
    }

    #[test]
    fn test_destructors_run() {
        let released = Arc::new(AtomicUsize::new(0));
        let (mut vm, f) = setup();
        let counter = released.clone();
        let id = vm
            .add_event(
                f.clone(),
                false,
                Some(Box::new(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                })),
            )
            .unwrap();
        vm.del_event(id);
        assert_eq!(released.load(Ordering::SeqCst), 1);

        let counter = released.clone();
        vm.add_event(
            f,
            false,
            Some(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })),
        )
        .unwrap();
        drop(vm);
        assert_eq!(released.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_non_callable_rejected() {
        let (mut vm, _) = setup();
        assert!(vm.add_event(Value::Number(1.0), false, None).is_err());
    }
}
