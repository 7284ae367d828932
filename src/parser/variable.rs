//! Variables and storage indices

use crate::atom::Atom;
use crate::parser::scope::ScopeId;

/// Binding kinds
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableKind {
    Const = 0,
    Let = 1,
    /// Parameter of a `catch` clause
    Catch = 2,
    Var = 3,
    Function = 4,
}

impl VariableKind {
    /// Lexically scoped (block-level, no redeclaration)
    #[inline]
    pub fn is_lexical(self) -> bool {
        matches!(
            self,
            VariableKind::Const | VariableKind::Let | VariableKind::Catch
        )
    }
}

/// Storage area a resolved index points into
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Level {
    /// Slot of the current frame
    Local = 0,
    /// Captured cell of the current function
    Closure = 1,
    /// Slot of the VM-lifetime global storage
    Global = 2,
}

/// Resolved location of a variable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StorageIndex {
    pub level: Level,
    pub index: u32,
}

impl StorageIndex {
    #[inline]
    pub const fn local(index: u32) -> Self {
        StorageIndex {
            level: Level::Local,
            index,
        }
    }

    #[inline]
    pub const fn closure(index: u32) -> Self {
        StorageIndex {
            level: Level::Closure,
            index,
        }
    }

    #[inline]
    pub const fn global(index: u32) -> Self {
        StorageIndex {
            level: Level::Global,
            index,
        }
    }
}

/// Handle of a variable in a [`ScopeTree`](crate::parser::scope::ScopeTree)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarId(pub(crate) u32);

/// A declared binding
#[derive(Debug, Clone)]
pub struct Variable {
    pub name: Atom,
    pub kind: VariableKind,
    /// Scope the declaration belongs to (function scope for hoisted vars)
    pub scope: ScopeId,
    /// Slot in the owning function's storage, assigned on first resolution
    pub index: Option<u32>,
    /// Parameter position
    pub argument: Option<u32>,
    /// References reaching this variable from nested functions
    pub closure_refs: u32,
    /// Bound to the enclosing function itself (named function expression)
    pub self_ref: bool,
    pub line: u32,
}

impl Variable {
    pub fn new(name: Atom, kind: VariableKind, scope: ScopeId, line: u32) -> Self {
        Variable {
            name,
            kind,
            scope,
            index: None,
            argument: None,
            closure_refs: 0,
            self_ref: false,
            line,
        }
    }

    /// Captured by at least one nested function
    #[inline]
    pub fn is_captured(&self) -> bool {
        self.closure_refs > 0
    }

    /// Initial slot value: lexical bindings start uninitialised
    pub fn initial_value(&self) -> crate::value::Value {
        if self.kind.is_lexical() || self.self_ref {
            crate::value::Value::Invalid
        } else {
            crate::value::Value::Undefined
        }
    }
}
