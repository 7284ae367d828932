//! Execution support
//!
//! The bytecode engine itself is pluggable: an [`Executor`] is handed a
//! live script frame and drives it through the frame, variable and
//! try-block API implemented here. Everything it needs to run code
//! (slot storage, closures, unwinding, events) lives in this module.

pub mod event;
pub mod exception;
pub mod frame;
pub mod stack;

pub use event::{EventDestructor, EventId, RunStatus};
pub use exception::{BacktraceEntry, Exit, FinallyAction, HandlerKind, Unwind, format_backtrace};
pub use frame::{Frame, FrameId, FrameKind};
pub use stack::{Slot, Stack, StackError};

use crate::context::Vm;
use crate::error::Exception;
use crate::value::Value;

/// Runs the code of script frames
pub trait Executor: Send + Sync {
    /// Execute `frame` until it returns or throws out of it
    ///
    /// The frame is already populated; the caller frees it afterwards.
    fn execute(&self, vm: &mut Vm, frame: FrameId) -> Result<Value, Exception>;
}
