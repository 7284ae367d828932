//! Call frames and variable storage
//!
//! A frame is the activation record of one call. Script frames own a
//! region of the slot [`Stack`](crate::vm::stack::Stack) holding their
//! parameters and locals; native frames only exist so that backtraces and
//! the stack budget see them. Frames are strictly LIFO: `previous` always
//! names the frame below.

use std::mem::size_of;
use std::sync::Arc;

use crate::arena::{CellId, ObjectId};
use crate::atom::Atom;
use crate::builtins::Prototype;
use crate::context::Vm;
use crate::error::Exception;
use crate::parser::variable::{Level, StorageIndex};
use crate::runtime::function::{FunctionData, FunctionKind, Lambda};
use crate::runtime::object::{Object, ObjectKind};
use crate::value::{JsString, Value};
use crate::vm::exception::TryChain;
use crate::vm::stack::{Region, Slot, StackError};

/// Slots charged to native frames
pub const NATIVE_FRAME_SLOTS: usize = 4;

/// Handle of a live frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameId(pub(crate) u32);

impl FrameId {
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug)]
pub enum FrameKind {
    Native {
        name: Option<JsString>,
    },
    Script {
        lambda: Arc<Lambda>,
        /// Captured cells of the running function
        closures: Vec<CellId>,
    },
}

/// Activation record
#[derive(Debug)]
pub struct Frame {
    pub kind: FrameKind,
    /// Function object being run; `None` for the main program
    pub function: Option<ObjectId>,
    pub this: Value,
    /// Arguments exactly as passed
    pub arguments: Vec<Value>,
    /// Called through `new`
    pub ctor: bool,
    /// Current code offset, maintained by the executor
    pub pc: u32,
    pub previous: Option<FrameId>,
    pub(crate) region: Region,
    pub(crate) tries: TryChain,
    pub(crate) retval: Value,
}

impl Frame {
    pub fn lambda(&self) -> Option<&Arc<Lambda>> {
        match &self.kind {
            FrameKind::Script { lambda, .. } => Some(lambda),
            FrameKind::Native { .. } => None,
        }
    }

    #[inline]
    pub fn is_native(&self) -> bool {
        matches!(self.kind, FrameKind::Native { .. })
    }

    /// Value recorded by the last `frame_return`
    #[inline]
    pub fn retval(&self) -> &Value {
        &self.retval
    }

    fn closure(&self, index: u32) -> Option<CellId> {
        match &self.kind {
            FrameKind::Script { closures, .. } => closures.get(index as usize).copied(),
            FrameKind::Native { .. } => None,
        }
    }
}

impl Vm {
    /// Innermost live frame
    #[inline]
    pub fn current_frame(&self) -> Option<FrameId> {
        self.frames.len().checked_sub(1).map(|i| FrameId(i as u32))
    }

    #[inline]
    pub fn frame(&self, id: FrameId) -> &Frame {
        &self.frames[id.index()]
    }

    #[inline]
    pub fn frame_mut(&mut self, id: FrameId) -> &mut Frame {
        &mut self.frames[id.index()]
    }

    /// Number of live frames
    #[inline]
    pub fn frame_depth(&self) -> usize {
        self.frames.len()
    }

    fn stack_push(&mut self, len: usize) -> Result<Region, Exception> {
        match self.stack.push(self.heap.arena_mut(), len) {
            Ok(region) => Ok(region),
            Err(StackError::Overflow) => Err(self.range_error("Maximum call stack size exceeded")),
            Err(StackError::Memory(_)) => Err(self.memory_exception()),
        }
    }

    fn push_frame(&mut self, frame: Frame) -> FrameId {
        let id = FrameId(self.frames.len() as u32);
        self.frames.push(frame);
        id
    }

    /// Frame for a native call
    pub(crate) fn frame_native(
        &mut self,
        function: ObjectId,
        name: Option<JsString>,
        this: &Value,
        args: &[Value],
    ) -> Result<FrameId, Exception> {
        let region = self.stack_push(NATIVE_FRAME_SLOTS)?;
        let previous = self.current_frame();
        Ok(self.push_frame(Frame {
            kind: FrameKind::Native { name },
            function: Some(function),
            this: this.clone(),
            arguments: args.to_vec(),
            ctor: false,
            pc: 0,
            previous,
            region,
            tries: TryChain::default(),
            retval: Value::Undefined,
        }))
    }

    /// Create the frame of a script function call
    ///
    /// Positional arguments are copied in, missing parameters become
    /// `undefined`, the remaining locals take the lambda's defaults, and
    /// hoisted function declarations are instantiated.
    pub fn frame_enter(
        &mut self,
        function: &Value,
        this: &Value,
        args: &[Value],
        ctor: bool,
    ) -> Result<FrameId, Exception> {
        let id = function
            .object_id()
            .filter(|id| self.heap.object(*id).is_callable());
        let Some(id) = id else {
            return Err(self.type_error("value is not a function"));
        };
        let Some(FunctionData {
            kind:
                FunctionKind::Lambda {
                    lambda,
                    closures,
                    this: captured,
                },
            ctor: constructible,
            ..
        }) = self.heap.object(id).function().cloned()
        else {
            return Err(Exception::internal("frame_enter on a non-script function"));
        };

        if ctor && !constructible {
            let name = lambda.name.clone().unwrap_or_else(|| JsString::new("anonymous"));
            return Err(self.type_error(format!("{name} is not a constructor")));
        }

        let this = captured.unwrap_or_else(|| this.clone());
        let frame = self.frame_script(lambda, closures, Some(id), this, args, ctor)?;

        let lambda = self.script_lambda(frame)?;
        if let Some(index) = lambda.self_index {
            self.variable_init(frame, StorageIndex::local(index), function.clone())?;
        }
        self.instantiate(frame, &lambda)?;
        log::trace!(
            "frame {} entered: {} args, {} locals",
            frame.0,
            args.len(),
            lambda.nlocal
        );
        Ok(frame)
    }

    /// Create the root frame running a program's main lambda
    pub fn frame_main(&mut self, main: &Arc<Lambda>) -> Result<FrameId, Exception> {
        let this = Value::Object(self.global);
        let frame = self.frame_script(main.clone(), Vec::new(), None, this, &[], false)?;
        self.instantiate(frame, main)?;
        Ok(frame)
    }

    fn frame_script(
        &mut self,
        lambda: Arc<Lambda>,
        closures: Vec<CellId>,
        function: Option<ObjectId>,
        this: Value,
        args: &[Value],
        ctor: bool,
    ) -> Result<FrameId, Exception> {
        let nlocal = lambda.nlocal as usize;
        let region = self.stack_push(nlocal)?;

        let positional = if lambda.rest_parameters {
            lambda.nargs.saturating_sub(1) as usize
        } else {
            lambda.nargs as usize
        };
        let rest = if lambda.rest_parameters && positional < nlocal {
            let extra = args.get(positional..).unwrap_or_default().to_vec();
            Some(self.array_new(extra))
        } else {
            None
        };
        let rest = match rest {
            Some(Ok(array)) => Some(array),
            Some(Err(e)) => {
                self.stack.pop(self.heap.arena_mut(), region);
                return Err(e);
            }
            None => None,
        };

        let slots = self.stack.slots_mut(region);
        for (i, slot) in slots.iter_mut().enumerate() {
            let value = if i < positional {
                args.get(i).cloned().unwrap_or(Value::Undefined)
            } else {
                lambda.local_defaults.get(i).cloned().unwrap_or(Value::Undefined)
            };
            *slot = Slot::Value(value);
        }
        if let Some(array) = rest {
            if let Some(slot) = slots.get_mut(positional) {
                *slot = Slot::Value(array);
            }
        }

        let previous = self.current_frame();
        Ok(self.push_frame(Frame {
            kind: FrameKind::Script { lambda, closures },
            function,
            this,
            arguments: args.to_vec(),
            ctor,
            pc: 0,
            previous,
            region,
            tries: TryChain::default(),
            retval: Value::Undefined,
        }))
    }

    fn script_lambda(&self, frame: FrameId) -> Result<Arc<Lambda>, Exception> {
        self.frame(frame)
            .lambda()
            .cloned()
            .ok_or_else(|| Exception::internal("native frame has no lambda"))
    }

    /// Bind hoisted function declarations of `lambda` in `frame`
    fn instantiate(&mut self, frame: FrameId, lambda: &Lambda) -> Result<(), Exception> {
        for decl in &lambda.declarations {
            let function = self.function_create_in(frame, &decl.lambda)?;
            self.variable_init(frame, decl.index, function)?;
        }
        Ok(())
    }

    /// Run a script frame through the executor
    pub fn frame_call(&mut self, frame: FrameId) -> Result<Value, Exception> {
        let Some(executor) = self.options.executor.clone() else {
            return Err(Exception::internal("no executor configured"));
        };
        let value = executor.execute(self, frame)?;
        self.frame_mut(frame).retval = value.clone();
        Ok(value)
    }

    /// Record the frame's return value and pop it
    pub fn frame_return(&mut self, frame: FrameId, value: Value) -> Result<Value, Exception> {
        self.frame_mut(frame).retval = value.clone();
        self.frame_free(frame)?;
        Ok(value)
    }

    /// Pop `frame`, which must be the innermost one
    pub fn frame_free(&mut self, frame: FrameId) -> Result<(), Exception> {
        if self.current_frame() != Some(frame) {
            return Err(Exception::internal("frame relink failure"));
        }
        if let Some(popped) = self.frames.pop() {
            self.stack.pop(self.heap.arena_mut(), popped.region);
        }
        Ok(())
    }

    fn slot(&self, frame: FrameId, index: StorageIndex) -> Result<Slot, Exception> {
        let slot = match index.level {
            Level::Local => self
                .stack
                .slots(self.frame(frame).region)
                .get(index.index as usize)
                .cloned(),
            Level::Global => self.globals.get(index.index as usize).cloned(),
            Level::Closure => self.frame(frame).closure(index.index).map(Slot::Cell),
        };
        slot.ok_or_else(|| Exception::internal(format!("invalid storage index {index:?}")))
    }

    fn slot_mut(&mut self, frame: FrameId, index: StorageIndex) -> Result<&mut Slot, Exception> {
        let slot = match index.level {
            Level::Local => {
                let region = self.frame(frame).region;
                self.stack.slots_mut(region).get_mut(index.index as usize)
            }
            Level::Global => self.globals.get_mut(index.index as usize),
            Level::Closure => None,
        };
        slot.ok_or_else(|| Exception::internal(format!("invalid storage index {index:?}")))
    }

    /// Raw slot value, `Invalid` included
    pub fn variable_get(&self, frame: FrameId, index: StorageIndex) -> Result<Value, Exception> {
        Ok(match self.slot(frame, index)? {
            Slot::Value(value) => value,
            Slot::Cell(cell) => self.heap.cell(cell).clone(),
        })
    }

    /// Read a binding; uninitialised lexical bindings throw
    pub fn variable_load(
        &mut self,
        frame: FrameId,
        index: StorageIndex,
        name: Atom,
    ) -> Result<Value, Exception> {
        let value = self.variable_get(frame, index)?;
        if !value.is_valid() {
            let message = format!(
                "cannot access variable \"{}\" before initialization",
                self.atoms.name(name)
            );
            return Err(self.reference_error(message));
        }
        Ok(value)
    }

    /// Assign to an initialised binding
    pub fn variable_store(
        &mut self,
        frame: FrameId,
        index: StorageIndex,
        name: Atom,
        value: Value,
    ) -> Result<(), Exception> {
        self.variable_load(frame, index, name)?;
        self.variable_init(frame, index, value)
    }

    /// Write a binding unconditionally (declarations)
    pub fn variable_init(
        &mut self,
        frame: FrameId,
        index: StorageIndex,
        value: Value,
    ) -> Result<(), Exception> {
        if index.level == Level::Closure {
            let cell = self
                .frame(frame)
                .closure(index.index)
                .ok_or_else(|| Exception::internal("invalid closure index"))?;
            *self.heap.cell_mut(cell) = value;
            return Ok(());
        }
        match self.slot_mut(frame, index)? {
            Slot::Cell(cell) => {
                let cell = *cell;
                *self.heap.cell_mut(cell) = value;
            }
            slot => *slot = Slot::Value(value),
        }
        Ok(())
    }

    /// Move a local or global slot into a heap cell shared by every closure
    fn promote(&mut self, frame: FrameId, index: StorageIndex) -> Result<CellId, Exception> {
        if index.level == Level::Closure {
            return self
                .frame(frame)
                .closure(index.index)
                .ok_or_else(|| Exception::internal("invalid closure index"));
        }
        let value = match self.slot(frame, index)? {
            Slot::Cell(cell) => return Ok(cell),
            Slot::Value(value) => value,
        };
        let cell = match self.heap.alloc_cell(value) {
            Ok(cell) => cell,
            Err(_) => return Err(self.memory_exception()),
        };
        *self.slot_mut(frame, index)? = Slot::Cell(cell);
        log::trace!("slot {:?} promoted to cell {:?}", index, cell);
        Ok(cell)
    }

    /// Create a function object for `lambda` in the current frame
    pub fn function_create(&mut self, lambda: &Arc<Lambda>) -> Result<Value, Exception> {
        let Some(frame) = self.current_frame() else {
            return Err(Exception::internal("function_create without an active frame"));
        };
        self.function_create_in(frame, lambda)
    }

    fn function_create_in(
        &mut self,
        frame: FrameId,
        lambda: &Arc<Lambda>,
    ) -> Result<Value, Exception> {
        let mut closures = Vec::with_capacity(lambda.closures.len());
        for source in &lambda.closures {
            closures.push(self.promote(frame, *source)?);
        }
        let this = lambda.arrow.then(|| self.frame(frame).this.clone());

        let data = FunctionData::lambda(lambda.clone(), closures, this);
        let proto = self.prototype(Prototype::Function);
        let id = self.alloc(Object::new(ObjectKind::Function(data), Some(proto)))?;
        Ok(Value::Function(id))
    }

    /// The `arguments` object of `frame`
    pub fn arguments_object(&mut self, frame: FrameId) -> Result<Value, Exception> {
        let args = self.frame(frame).arguments.clone();
        self.charge(crate::arena::MemoryTag::Object, args.len() * size_of::<Value>())?;
        let proto = self.prototype(Prototype::Object);
        let id = self.alloc(Object::new(ObjectKind::Arguments(args), Some(proto)))?;
        Ok(Value::Object(id))
    }

    /// Arguments past the declared parameters, as an array
    pub fn rest_arguments(&mut self, frame: FrameId) -> Result<Value, Exception> {
        let f = self.frame(frame);
        let skip = f
            .lambda()
            .map_or(0, |l| l.nargs.saturating_sub(1) as usize);
        let rest = f.arguments.get(skip..).unwrap_or_default().to_vec();
        self.array_new(rest)
    }
}
