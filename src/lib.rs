//! njs - runtime core of an embeddable ECMAScript engine
//!
//! The crate provides everything an engine needs around its bytecode
//! interpreter: tagged values and atoms, flat property hashes with shared
//! prototype tables, the scope resolver that turns a syntax tree into
//! storage indices, and the frame machinery (closures, try/finally,
//! unwinding, backtraces) an interpreter drives.
//!
//! Parsing and bytecode execution plug in through the
//! [`Frontend`](parser::Frontend) and [`Executor`](vm::Executor) traits.
//!
//! # Features
//! - Per-VM arena budget with a preallocated memory error
//! - Prototype method tables shared across cloned VMs
//! - Host events dispatched FIFO between runs
//! - Host objects with native property handlers
//!
//! # Example
//! ```
//! use njs::{Options, Value, Vm};
//!
//! let mut vm = Vm::create(Options::default()).unwrap();
//! let object = vm.object_new().unwrap();
//! vm.set(&object, "answer", Value::Number(42.0)).unwrap();
//! assert_eq!(vm.get(&object, "answer").unwrap(), Value::Number(42.0));
//! ```

// Values and keys
pub mod atom;
pub mod value;

// Memory
pub mod arena;

pub mod error;

// Object model
pub mod builtins;
pub mod runtime;

// Resolver
pub mod parser;

// Frames and embedding
pub mod context;
pub mod vm;

pub use atom::{Atom, AtomTable};
pub use context::{Options, Vm};
pub use error::{CompileError, ErrorKind, Exception, FatalError, VmError};
pub use parser::{Binding, CompiledProgram, Frontend, UnresolvedBinding};
pub use runtime::external::{ExternalHandler, ExternalProperty, ExternalProtoId};
pub use value::{JsString, Value};
pub use vm::{EventId, Executor, FrameId, RunStatus};
