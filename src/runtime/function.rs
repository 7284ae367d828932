//! JavaScript function types
//!
//! This module implements the different function types:
//! - script functions: a compiled [`Lambda`] plus the closure cells captured
//!   when the function object was created
//! - native functions (plain Rust `fn` pointers)
//! - bound functions, flattened at bind time

use std::sync::Arc;

use crate::arena::{CellId, ObjectId};
use crate::context::Vm;
use crate::error::Exception;
use crate::parser::variable::StorageIndex;
use crate::value::{JsString, Value};

/// Native function signature
///
/// Native functions take the VM, the `this` value and the arguments.
pub type NativeFunction = fn(vm: &mut Vm, this: &Value, args: &[Value]) -> Result<Value, Exception>;

/// Hoisted function declaration instantiated on frame entry
#[derive(Debug, Clone)]
pub struct Declaration {
    /// Binding receiving the function object
    pub index: StorageIndex,
    pub lambda: Arc<Lambda>,
}

/// Compiled function template
///
/// Immutable once compiled and shared between VM clones.
#[derive(Debug, Clone, Default)]
pub struct Lambda {
    /// Function name (for backtraces)
    pub name: Option<JsString>,
    /// Number of declared parameters
    pub nargs: u32,
    /// Number of local slots, parameters included
    pub nlocal: u32,
    /// Initial value of every local slot
    pub local_defaults: Vec<Value>,
    /// Where each captured cell comes from in the creating frame
    pub closures: Vec<StorageIndex>,
    /// Hoisted function declarations
    pub declarations: Vec<Declaration>,
    /// Local slot bound to the function itself (named function expressions)
    pub self_index: Option<u32>,
    /// The last parameter collects the remaining arguments
    pub rest_parameters: bool,
    /// Callable with `new`
    pub ctor: bool,
    /// Arrow functions take `this` from the creating frame
    pub arrow: bool,
    /// Opaque code offset interpreted by the executor
    pub start: u32,
    /// Debug info: source filename
    pub source_file: Option<String>,
    /// Debug info: line number table (pc -> line)
    pub line_numbers: Vec<(u32, u32)>,
}

impl Lambda {
    pub fn new(nargs: u32, nlocal: u32) -> Self {
        Lambda {
            nargs,
            nlocal,
            local_defaults: vec![Value::Undefined; nlocal as usize],
            ctor: true,
            ..Default::default()
        }
    }

    /// Set the function name
    pub fn set_name(&mut self, name: &str) {
        self.name = Some(JsString::new(name));
    }

    /// Add a line number entry
    pub fn add_line_number(&mut self, pc: u32, line: u32) {
        self.line_numbers.push((pc, line));
    }

    /// Get line number for a PC value
    pub fn get_line_number(&self, pc: u32) -> Option<u32> {
        // Binary search for the entry with pc <= target
        let idx = self
            .line_numbers
            .partition_point(|&(p, _)| p <= pc)
            .saturating_sub(1);

        self.line_numbers.get(idx).map(|&(_, line)| line)
    }
}

/// How a function object is invoked
#[derive(Debug, Clone)]
pub enum FunctionKind {
    Lambda {
        lambda: Arc<Lambda>,
        /// Captured cells, parallel to `lambda.closures`
        closures: Vec<CellId>,
        /// `this` captured by arrow functions
        this: Option<Value>,
    },
    Native {
        call: NativeFunction,
        magic: u32,
    },
    Bound {
        target: ObjectId,
        this: Value,
        args: Vec<Value>,
    },
}

/// Payload of function objects
#[derive(Debug, Clone)]
pub struct FunctionData {
    pub kind: FunctionKind,
    pub ctor: bool,
    /// Declared argument count (`length`)
    pub nargs: u32,
    pub name: Option<JsString>,
}

impl FunctionData {
    pub fn native(call: NativeFunction, nargs: u32, magic: u32, name: Option<JsString>) -> Self {
        FunctionData {
            kind: FunctionKind::Native { call, magic },
            ctor: false,
            nargs,
            name,
        }
    }

    pub fn lambda(lambda: Arc<Lambda>, closures: Vec<CellId>, this: Option<Value>) -> Self {
        FunctionData {
            ctor: lambda.ctor && !lambda.arrow,
            nargs: lambda.nargs,
            name: lambda.name.clone(),
            kind: FunctionKind::Lambda {
                lambda,
                closures,
                this,
            },
        }
    }

    #[inline]
    pub fn is_native(&self) -> bool {
        matches!(self.kind, FunctionKind::Native { .. })
    }

    pub fn lambda_ref(&self) -> Option<&Arc<Lambda>> {
        match &self.kind {
            FunctionKind::Lambda { lambda, .. } => Some(lambda),
            _ => None,
        }
    }

    /// Magic word of native functions
    pub fn magic(&self) -> u32 {
        match self.kind {
            FunctionKind::Native { magic, .. } => magic,
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_vm: &mut Vm, _this: &Value, _args: &[Value]) -> Result<Value, Exception> {
        Ok(Value::Undefined)
    }

    #[test]
    fn test_line_numbers() {
        let mut lambda = Lambda::new(0, 0);

        lambda.add_line_number(0, 1);
        lambda.add_line_number(10, 5);
        lambda.add_line_number(20, 10);

        assert_eq!(lambda.get_line_number(0), Some(1));
        assert_eq!(lambda.get_line_number(5), Some(1));
        assert_eq!(lambda.get_line_number(10), Some(5));
        assert_eq!(lambda.get_line_number(15), Some(5));
        assert_eq!(lambda.get_line_number(25), Some(10));
        assert_eq!(Lambda::new(0, 0).get_line_number(3), None);
    }

    #[test]
    fn test_lambda_defaults() {
        let mut lambda = Lambda::new(2, 3);
        lambda.set_name("add");
        assert_eq!(lambda.local_defaults.len(), 3);
        assert!(lambda.local_defaults.iter().all(Value::is_undefined));
        assert_eq!(lambda.name, Some(JsString::new("add")));
        assert!(lambda.ctor);
    }

    #[test]
    fn test_function_data() {
        let native = FunctionData::native(noop, 1, 7, None);
        assert!(native.is_native());
        assert!(!native.ctor);
        assert_eq!(native.magic(), 7);
        assert!(native.lambda_ref().is_none());

        let mut arrow = Lambda::new(0, 0);
        arrow.arrow = true;
        let data = FunctionData::lambda(Arc::new(arrow), Vec::new(), Some(Value::Null));
        assert!(!data.ctor);
        assert!(data.lambda_ref().is_some());
    }
}
