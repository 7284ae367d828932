//! Front half of compilation
//!
//! Source text is turned into an [`ast::Program`] by a pluggable
//! [`Frontend`]; the [`Compiler`] then resolves every identifier against the
//! scope tree and emits the lambdas the executor runs.

pub mod ast;
pub mod compiler;
pub mod scope;
pub mod variable;

pub use compiler::{
    Binding, CompiledProgram, Compiler, CompilerOptions, GlobalVariable, Resolution,
    UnresolvedBinding,
};
pub use scope::{ScopeId, ScopeKind, ScopeTree};
pub use variable::{Level, StorageIndex, VariableKind};

use crate::error::CompileError;

/// Turns source text into a syntax tree
pub trait Frontend: Send + Sync {
    fn parse(&self, source: &str, file: Option<&str>) -> Result<ast::Program, CompileError>;
}
