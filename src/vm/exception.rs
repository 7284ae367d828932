//! Try blocks, unwinding and backtraces
//!
//! Every frame keeps a chain of active try blocks. `finally` is modelled as
//! a trampoline: entering a finally handler records the completion that was
//! interrupted (fall-through, break, continue, return or throw) and
//! [`Vm::finally_complete`] resumes it. A finally body that itself returns
//! or throws replaces the pending completion.

use std::fmt::{self, Write as _};

use crate::context::Vm;
use crate::error::Exception;
use crate::value::{JsString, Value};
use crate::vm::frame::{FrameId, FrameKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    Catch,
    Finally,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TryBlock {
    handler: u32,
    kind: HandlerKind,
}

/// Non-exceptional way out of a try region
#[derive(Debug, Clone, PartialEq)]
pub enum Exit {
    Break { target: u32 },
    Continue { target: u32 },
    Return(Value),
}

#[derive(Debug)]
enum Completion {
    Exit(Exit),
    Throw(Exception),
}

#[derive(Debug)]
struct PendingFinally {
    /// Try blocks still active below the running finally
    depth: usize,
    completion: Option<Completion>,
}

#[derive(Debug, Default)]
pub(crate) struct TryChain {
    blocks: Vec<TryBlock>,
    pending: Vec<PendingFinally>,
}

impl TryChain {
    pub(crate) fn depth(&self) -> usize {
        self.blocks.len()
    }
}

/// What the executor does after a finally body ends
#[derive(Debug, Clone, PartialEq)]
pub enum FinallyAction {
    FallThrough,
    Break(u32),
    Continue(u32),
    Return(Value),
}

/// Result of throwing inside a frame
#[derive(Debug)]
pub enum Unwind {
    Catch { pc: u32, value: Value },
    Finally { pc: u32 },
    /// No handler in this frame
    Propagate(Exception),
}

/// One line of a backtrace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BacktraceEntry {
    pub name: String,
    pub file: Option<String>,
    pub line: Option<u32>,
    pub native: bool,
}

impl fmt::Display for BacktraceEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.native {
            return write!(f, "    at {} (native)", self.name);
        }
        write!(f, "    at {} (", self.name)?;
        match (&self.file, self.line) {
            (Some(file), Some(line)) => write!(f, "{file}:{line}")?,
            (Some(file), None) => write!(f, "{file}")?,
            (None, Some(line)) => write!(f, ":{line}")?,
            (None, None) => write!(f, "unknown")?,
        }
        write!(f, ")")
    }
}

/// Render entries one per line, folding consecutive duplicates
pub fn format_backtrace(entries: &[BacktraceEntry]) -> String {
    let mut out = String::new();
    let mut i = 0;
    while i < entries.len() {
        let mut run = 1;
        while i + run < entries.len() && entries[i + run] == entries[i] {
            run += 1;
        }
        let _ = writeln!(out, "{}", entries[i]);
        if run > 1 {
            let _ = writeln!(out, "      repeats {} times", run - 1);
        }
        i += run;
    }
    out
}

impl Vm {
    /// Enter a try region whose handler starts at `handler`
    pub fn try_start(&mut self, frame: FrameId, handler: u32, kind: HandlerKind) {
        self.frame_mut(frame).tries.blocks.push(TryBlock { handler, kind });
    }

    /// Leave the innermost try region normally
    ///
    /// Returns the finally handler to run, if the region has one.
    pub fn try_end(&mut self, frame: FrameId) -> Option<u32> {
        let tries = &mut self.frame_mut(frame).tries;
        let block = tries.blocks.pop()?;
        match block.kind {
            HandlerKind::Catch => None,
            HandlerKind::Finally => {
                tries.pending.push(PendingFinally {
                    depth: tries.blocks.len(),
                    completion: None,
                });
                Some(block.handler)
            }
        }
    }

    /// Leave `levels` try regions through break, continue or return
    ///
    /// Catch regions are simply dropped. If a finally region is crossed its
    /// handler pc is returned and the exit becomes its pending completion;
    /// otherwise the executor performs the exit itself.
    pub fn try_exit(&mut self, frame: FrameId, exit: Exit, levels: usize) -> Option<u32> {
        let f = self.frame_mut(frame);
        if let Exit::Return(value) = &exit {
            f.retval = value.clone();
        }
        let tries = &mut f.tries;
        for _ in 0..levels {
            let block = tries.blocks.pop()?;
            if block.kind == HandlerKind::Finally {
                tries.pending.push(PendingFinally {
                    depth: tries.blocks.len(),
                    completion: Some(Completion::Exit(exit)),
                });
                return Some(block.handler);
            }
        }
        None
    }

    /// Resume the completion interrupted by the innermost finally
    pub fn finally_complete(&mut self, frame: FrameId) -> Result<FinallyAction, Exception> {
        let pending = self.frame_mut(frame).tries.pending.pop();
        match pending.and_then(|p| p.completion) {
            None => Ok(FinallyAction::FallThrough),
            Some(Completion::Exit(Exit::Break { target })) => Ok(FinallyAction::Break(target)),
            Some(Completion::Exit(Exit::Continue { target })) => {
                Ok(FinallyAction::Continue(target))
            }
            Some(Completion::Exit(Exit::Return(value))) => Ok(FinallyAction::Return(value)),
            Some(Completion::Throw(exception)) => Err(exception),
        }
    }

    /// Route `exception` to the innermost handler of `frame`
    pub fn frame_throw(&mut self, frame: FrameId, exception: Exception) -> Unwind {
        if exception.is_fatal() {
            return Unwind::Propagate(exception);
        }
        let tries = &mut self.frame_mut(frame).tries;
        let Some(block) = tries.blocks.pop() else {
            tries.pending.clear();
            return Unwind::Propagate(exception);
        };

        // a finally whose body is still running keeps its completion
        let remaining = tries.blocks.len();
        tries.pending.retain(|p| p.depth <= remaining);

        match block.kind {
            HandlerKind::Catch => {
                let value = match exception {
                    Exception::Thrown(value) => value,
                    Exception::Fatal(_) => Value::Undefined,
                };
                Unwind::Catch {
                    pc: block.handler,
                    value,
                }
            }
            HandlerKind::Finally => {
                tries.pending.push(PendingFinally {
                    depth: remaining,
                    completion: Some(Completion::Throw(exception)),
                });
                Unwind::Finally { pc: block.handler }
            }
        }
    }

    /// Turn a value into a thrown exception, capturing a backtrace if enabled
    pub fn raise(&mut self, value: Value) -> Exception {
        if self.options.backtrace {
            self.backtrace = self.capture_backtrace();
        }
        Exception::Thrown(value)
    }

    /// Walk the frame chain from the innermost frame to the root
    pub fn capture_backtrace(&self) -> Vec<BacktraceEntry> {
        let mut entries = Vec::new();
        let mut current = self.current_frame();
        while let Some(id) = current {
            let frame = self.frame(id);
            let entry = match &frame.kind {
                FrameKind::Native { name } => BacktraceEntry {
                    name: name
                        .as_ref()
                        .map_or_else(|| "native".to_string(), JsString::to_string),
                    file: None,
                    line: None,
                    native: true,
                },
                FrameKind::Script { lambda, .. } => {
                    let name = if frame.function.is_none() && lambda.start == 0 {
                        "main".to_string()
                    } else {
                        lambda
                            .name
                            .as_ref()
                            .map_or_else(|| "anonymous".to_string(), JsString::to_string)
                    };
                    BacktraceEntry {
                        name,
                        file: lambda.source_file.clone(),
                        line: lambda.get_line_number(frame.pc),
                        native: false,
                    }
                }
            };
            entries.push(entry);
            current = frame.previous;
        }
        entries
    }

    /// Backtrace recorded by the last throw
    pub fn backtrace(&self) -> &[BacktraceEntry] {
        &self.backtrace
    }
}
