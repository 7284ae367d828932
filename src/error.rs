//! Error taxonomy
//!
//! Three layers of failure are distinguished:
//! - [`CompileError`]: raised while resolving a program, before any frame exists
//! - [`Exception`]: a runtime throw. Ordinary script-visible errors are
//!   thrown values that unwind through frames; fatal errors poison the VM
//! - [`VmError`]: failures of the embedding surface itself

use thiserror::Error;

use crate::arena::MemoryError;
use crate::value::Value;

/// Kinds of script-visible error objects
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Error = 0,
    SyntaxError = 1,
    ReferenceError = 2,
    TypeError = 3,
    RangeError = 4,
    /// Raised from a preallocated object, never allocates
    MemoryError = 5,
    /// Engine invariant violation
    InternalError = 6,
}

impl ErrorKind {
    pub const COUNT: usize = 7;

    pub const ALL: [ErrorKind; Self::COUNT] = [
        ErrorKind::Error,
        ErrorKind::SyntaxError,
        ErrorKind::ReferenceError,
        ErrorKind::TypeError,
        ErrorKind::RangeError,
        ErrorKind::MemoryError,
        ErrorKind::InternalError,
    ];

    /// Constructor name, also used as the `name` of the prototype
    pub const fn name(self) -> &'static str {
        match self {
            ErrorKind::Error => "Error",
            ErrorKind::SyntaxError => "SyntaxError",
            ErrorKind::ReferenceError => "ReferenceError",
            ErrorKind::TypeError => "TypeError",
            ErrorKind::RangeError => "RangeError",
            ErrorKind::MemoryError => "MemoryError",
            ErrorKind::InternalError => "InternalError",
        }
    }

    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Errors produced while resolving a program
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error("SyntaxError: {message} in line {line}")]
    Syntax { message: String, line: u32 },

    #[error("SyntaxError: \"{name}\" has already been declared in line {line}")]
    DuplicateDeclaration { name: String, line: u32 },

    #[error("SyntaxError: Undefined label \"{label}\" in line {line}")]
    UndefinedLabel { label: String, line: u32 },

    #[error("SyntaxError: The maximum depth of nested functions is reached in line {line}")]
    NestingTooDeep { line: u32 },

    #[error("RangeError: Maximum nesting depth exceeded in line {line}")]
    RecursionLimit { line: u32 },

    #[error("InternalError: the program was already compiled")]
    Reentrant,

    #[error("InternalError: no frontend configured")]
    NoFrontend,

    #[error("MemoryError")]
    Memory(#[from] MemoryError),
}

impl CompileError {
    /// Script-visible kind of this failure
    pub fn kind(&self) -> ErrorKind {
        match self {
            CompileError::Syntax { .. }
            | CompileError::DuplicateDeclaration { .. }
            | CompileError::UndefinedLabel { .. }
            | CompileError::NestingTooDeep { .. } => ErrorKind::SyntaxError,
            CompileError::RecursionLimit { .. } => ErrorKind::RangeError,
            CompileError::Reentrant | CompileError::NoFrontend => ErrorKind::InternalError,
            CompileError::Memory(_) => ErrorKind::MemoryError,
        }
    }
}

/// Unrecoverable runtime failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FatalError {
    #[error("MemoryError: allocation failed while unwinding")]
    Memory,

    #[error("InternalError: {0}")]
    Internal(String),

    #[error("InternalError: vm instance is unusable after a fatal error")]
    Poisoned,
}

/// A runtime throw
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Exception {
    /// Ordinary thrown value, catchable by script code
    #[error("uncaught exception")]
    Thrown(Value),

    #[error(transparent)]
    Fatal(#[from] FatalError),
}

impl Exception {
    /// Internal error helper
    pub fn internal(message: impl Into<String>) -> Self {
        Exception::Fatal(FatalError::Internal(message.into()))
    }

    #[inline]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Exception::Fatal(_))
    }

    /// The thrown value, if the exception is catchable
    pub fn value(&self) -> Option<&Value> {
        match self {
            Exception::Thrown(value) => Some(value),
            Exception::Fatal(_) => None,
        }
    }
}

/// Failures of the embedding surface
#[derive(Debug, Error)]
pub enum VmError {
    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Exception(#[from] Exception),

    #[error(transparent)]
    Memory(#[from] MemoryError),

    #[error("vm cloning is not supported in accumulative mode")]
    CloneUnsupported,

    #[error("no program has been compiled")]
    NotCompiled,
}
