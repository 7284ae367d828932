//! The virtual machine instance
//!
//! A [`Vm`] owns everything a running program touches: the heap, atoms,
//! global storage, the frame stack and the event queue. Prototype method
//! tables are the exception; they live behind `Arc` and are shared by every
//! VM cloned from the same parent.
//!
//! # Example
//! ```ignore
//! use njs::{Options, Vm};
//!
//! let mut vm = Vm::create(Options::default().with_frontend(frontend).with_executor(engine))?;
//! vm.compile("var x = 1")?;
//! let value = vm.start()?;
//! ```

use std::fmt;
use std::mem::size_of;
use std::sync::Arc;

use crate::arena::{Arena, Heap, MemoryStats, MemoryTag, ObjectId};
use crate::atom::{Atom, AtomTable};
use crate::builtins::{self, Prototype};
use crate::error::{CompileError, ErrorKind, Exception, FatalError, VmError};
use crate::parser::ast::Program;
use crate::parser::{
    CompiledProgram, Compiler, CompilerOptions, Frontend, GlobalVariable, UnresolvedBinding,
};
use crate::runtime::external::{
    ExternalData, ExternalHandler, ExternalProperty, ExternalProto, ExternalProtoId,
    ExternalSlots,
};
use crate::runtime::flathsh::FlatHash;
use crate::runtime::function::Lambda;
use crate::runtime::object::{Object, ObjectKind, SharedTable};
use crate::runtime::property::{PropertyKind, PropertySlot};
use crate::value::{JsString, Value};
use crate::vm::Executor;
use crate::vm::event::EventQueue;
use crate::vm::exception::{BacktraceEntry, format_backtrace};
use crate::vm::frame::Frame;
use crate::vm::stack::{DEFAULT_MAX_STACK_SIZE, Slot, Stack};

/// Default arena budget
pub const DEFAULT_MEMORY_LIMIT: usize = Arena::DEFAULT_LIMIT;

/// VM configuration
#[derive(Clone)]
pub struct Options {
    /// Source name reported in backtraces
    pub file: Option<String>,
    /// Keep global bindings across compilations (REPL)
    pub accumulative: bool,
    /// Record a backtrace on every throw
    pub backtrace: bool,
    pub module: bool,
    pub unresolved: UnresolvedBinding,
    pub memory_limit: usize,
    pub max_stack_size: usize,
    pub max_ast_depth: u32,
    pub frontend: Option<Arc<dyn Frontend>>,
    pub executor: Option<Arc<dyn Executor>>,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            file: None,
            accumulative: false,
            backtrace: false,
            module: false,
            unresolved: UnresolvedBinding::default(),
            memory_limit: DEFAULT_MEMORY_LIMIT,
            max_stack_size: DEFAULT_MAX_STACK_SIZE,
            max_ast_depth: CompilerOptions::DEFAULT_MAX_DEPTH,
            frontend: None,
            executor: None,
        }
    }
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("file", &self.file)
            .field("accumulative", &self.accumulative)
            .field("backtrace", &self.backtrace)
            .field("module", &self.module)
            .field("unresolved", &self.unresolved)
            .field("memory_limit", &self.memory_limit)
            .field("max_stack_size", &self.max_stack_size)
            .field("max_ast_depth", &self.max_ast_depth)
            .field("frontend", &self.frontend.is_some())
            .field("executor", &self.executor.is_some())
            .finish()
    }
}

impl Options {
    pub fn with_file(mut self, file: impl Into<String>) -> Self {
        self.file = Some(file.into());
        self
    }

    pub fn with_accumulative(mut self, accumulative: bool) -> Self {
        self.accumulative = accumulative;
        self
    }

    pub fn with_backtrace(mut self, backtrace: bool) -> Self {
        self.backtrace = backtrace;
        self
    }

    pub fn with_module(mut self, module: bool) -> Self {
        self.module = module;
        self
    }

    pub fn with_unresolved(mut self, unresolved: UnresolvedBinding) -> Self {
        self.unresolved = unresolved;
        self
    }

    pub fn with_memory_limit(mut self, limit: usize) -> Self {
        self.memory_limit = limit;
        self
    }

    pub fn with_max_stack_size(mut self, size: usize) -> Self {
        self.max_stack_size = size;
        self
    }

    pub fn with_max_ast_depth(mut self, depth: u32) -> Self {
        self.max_ast_depth = depth;
        self
    }

    pub fn with_frontend(mut self, frontend: Arc<dyn Frontend>) -> Self {
        self.frontend = Some(frontend);
        self
    }

    pub fn with_executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = Some(executor);
        self
    }

    fn compiler_options(&self) -> CompilerOptions {
        CompilerOptions {
            module: self.module,
            unresolved: self.unresolved,
            max_depth: self.max_ast_depth,
            file: self.file.clone(),
        }
    }
}

/// An engine instance
pub struct Vm {
    pub(crate) heap: Heap,
    pub(crate) atoms: AtomTable,
    /// Method tables of the built-in prototypes
    shared: Arc<Vec<SharedTable>>,
    prototypes: Vec<ObjectId>,
    pub(crate) global: ObjectId,
    /// Storage of top-level variables
    pub(crate) globals: Vec<Slot>,
    /// Global bindings carried into the next compilation
    persisted: Vec<GlobalVariable>,
    program: Option<Arc<CompiledProgram>>,
    pub(crate) stack: Stack,
    pub(crate) frames: Vec<Frame>,
    pub(crate) events: EventQueue,
    externals: Vec<ExternalProto>,
    pub(crate) options: Options,
    retval: Value,
    pub(crate) backtrace: Vec<BacktraceEntry>,
    pub(crate) memory_error: ObjectId,
    pub(crate) poisoned: bool,
    external: Option<ExternalData>,
}

impl fmt::Debug for Vm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Vm")
            .field("objects", &self.heap.object_count())
            .field("globals", &self.globals.len())
            .field("frames", &self.frames.len())
            .field("poisoned", &self.poisoned)
            .finish()
    }
}

impl Vm {
    /// Create a VM with fresh built-ins
    pub fn create(options: Options) -> Result<Vm, VmError> {
        let mut atoms = AtomTable::new();
        let shared = Arc::new(builtins::shared_tables(&mut atoms));
        let mut heap = Heap::new(options.memory_limit);

        let mut prototypes = Vec::with_capacity(Prototype::COUNT);
        for proto in Prototype::all() {
            let parent = proto.parent().map(|p| prototypes[p.index()]);
            let table = shared[proto.index()].clone();
            let id = heap.alloc_object(Object::with_shared(ObjectKind::Plain, parent, table))?;
            prototypes.push(id);
        }
        let global = heap.alloc_object(Object::new(
            ObjectKind::Plain,
            Some(prototypes[Prototype::Object.index()]),
        ))?;

        let stack = Stack::new(options.max_stack_size);
        let mut vm = Vm {
            heap,
            atoms,
            shared,
            prototypes,
            global,
            globals: Vec::new(),
            persisted: Vec::new(),
            program: None,
            stack,
            frames: Vec::new(),
            events: EventQueue::default(),
            externals: Vec::new(),
            options,
            retval: Value::Undefined,
            backtrace: Vec::new(),
            memory_error: global,
            poisoned: false,
            external: None,
        };

        let error = vm.error_new(ErrorKind::MemoryError, "memory error")?;
        if let Some(id) = error.object_id() {
            vm.prevent_extensions(id);
            vm.memory_error = id;
        }

        let constants = [
            (Atom::UNDEFINED, Value::Undefined),
            (vm.atoms.intern("NaN"), Value::Number(f64::NAN)),
            (vm.atoms.intern("Infinity"), Value::Number(f64::INFINITY)),
        ];
        for (key, value) in constants {
            let slot = PropertySlot::with_attributes(key, PropertyKind::Data(value), false, false, false);
            vm.define_global(slot)?;
        }

        log::debug!(
            "vm created: {} prototypes, memory limit {}",
            Prototype::COUNT,
            vm.options.memory_limit
        );
        Ok(vm)
    }

    /// Independent copy sharing the prototype tables
    ///
    /// Heap objects and global storage are copied; events are not. Cloning
    /// is refused in accumulative mode, on a poisoned VM and while code runs.
    pub fn clone(&self, external: Option<ExternalData>) -> Result<Vm, VmError> {
        if self.options.accumulative || self.poisoned || !self.frames.is_empty() {
            return Err(VmError::CloneUnsupported);
        }

        let mut heap = self.heap.clone();
        let events = heap.stats().by_tag[MemoryTag::Event as usize].bytes;
        heap.arena_mut().release(MemoryTag::Event, events);

        log::debug!("vm cloned: {} objects", heap.object_count());
        Ok(Vm {
            heap,
            atoms: self.atoms.clone(),
            shared: self.shared.clone(),
            prototypes: self.prototypes.clone(),
            global: self.global,
            globals: self.globals.clone(),
            persisted: Vec::new(),
            program: self.program.clone(),
            stack: Stack::new(self.options.max_stack_size),
            frames: Vec::new(),
            events: EventQueue::default(),
            externals: self.externals.clone(),
            options: self.options.clone(),
            retval: Value::Undefined,
            backtrace: Vec::new(),
            memory_error: self.memory_error,
            poisoned: false,
            external,
        })
    }

    /// Parse `source` with the configured frontend and compile it
    pub fn compile(&mut self, source: &str) -> Result<Arc<CompiledProgram>, CompileError> {
        let Some(frontend) = self.options.frontend.clone() else {
            return Err(CompileError::NoFrontend);
        };
        let program = frontend.parse(source, self.options.file.as_deref())?;
        self.compile_program(&program)
    }

    /// Resolve a parsed program and make it the one `start` runs
    pub fn compile_program(&mut self, program: &Program) -> Result<Arc<CompiledProgram>, CompileError> {
        if self.program.is_some() && !self.options.accumulative {
            return Err(CompileError::Reentrant);
        }

        let mut compiler = Compiler::new(&mut self.atoms, self.options.compiler_options());
        if self.options.accumulative {
            compiler = compiler.with_globals(&self.persisted);
        }
        let compiled = compiler.compile(program)?;

        self.heap
            .arena_mut()
            .charge(MemoryTag::Lambda, compiled.lambdas.len() * size_of::<Lambda>())?;

        let start = self.globals.len();
        if compiled.global_count() > start {
            self.globals.extend(
                compiled.global_defaults[start..]
                    .iter()
                    .cloned()
                    .map(Slot::Value),
            );
        }
        if self.options.accumulative {
            self.persisted = compiled.globals.clone();
        }

        log::debug!(
            "compiled {} lambdas, {} globals",
            compiled.lambdas.len(),
            compiled.global_count()
        );
        let compiled = Arc::new(compiled);
        self.program = Some(compiled.clone());
        Ok(compiled)
    }

    /// The last compiled program
    pub fn program(&self) -> Option<&Arc<CompiledProgram>> {
        self.program.as_ref()
    }

    /// Run the main code of the compiled program
    pub fn start(&mut self) -> Result<Value, VmError> {
        if self.poisoned {
            return Err(VmError::Exception(FatalError::Poisoned.into()));
        }
        let Some(main) = self.program.as_ref().map(|p| p.main.clone()) else {
            return Err(VmError::NotCompiled);
        };

        log::debug!("starting main");
        let result = match self.frame_main(&main) {
            Ok(frame) => {
                let result = self.frame_call(frame);
                let freed = self.frame_free(frame);
                result.and_then(|value| freed.map(|()| value))
            }
            Err(e) => Err(e),
        };
        self.finish(result)
    }

    /// Record the outcome of a top-level run
    pub(crate) fn finish(&mut self, result: Result<Value, Exception>) -> Result<Value, VmError> {
        match result {
            Ok(value) => {
                self.retval = value.clone();
                Ok(value)
            }
            Err(Exception::Thrown(value)) => {
                log::debug!("uncaught exception reached the root frame");
                self.retval = value.clone();
                Err(VmError::Exception(Exception::Thrown(value)))
            }
            Err(e) => {
                log::debug!("fatal error, vm poisoned: {}", e);
                self.poisoned = true;
                Err(VmError::Exception(e))
            }
        }
    }

    /// Value of the last run, or the uncaught exception
    pub fn retval(&self) -> &Value {
        &self.retval
    }

    /// Uncaught exception text, followed by the backtrace if one was captured
    pub fn exception_string(&mut self) -> Result<String, Exception> {
        let retval = self.retval.clone();
        let mut text = self.value_to_string(&retval)?;
        if !self.backtrace.is_empty() {
            text.push('\n');
            text.push_str(&format_backtrace(&self.backtrace));
        }
        Ok(text)
    }

    /// Whether a fatal error made this VM unusable
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// String conversion as scripts see it
    pub fn value_to_string(&mut self, value: &Value) -> Result<String, Exception> {
        if let Some(s) = value.primitive_to_string() {
            return Ok(s.to_string());
        }
        match value {
            Value::Symbol(atom) => {
                return Ok(format!("Symbol({})", self.atoms.name(*atom)));
            }
            _ => {}
        }

        let method = self.get_atom(value, Atom::TO_STRING)?;
        if method.is_function() {
            let result = self.call(&method, value, &[])?;
            if let Some(s) = result.primitive_to_string() {
                return Ok(s.to_string());
            }
        }
        Err(self.type_error("Cannot convert object to primitive value"))
    }

    /// Number conversion of primitives
    pub fn value_to_number(&self, value: &Value) -> f64 {
        match value {
            Value::Number(n) => *n,
            Value::Boolean(b) => f64::from(u8::from(*b)),
            Value::Null => 0.0,
            Value::String(s) => {
                let text = s.to_string();
                let trimmed = text.trim();
                if trimmed.is_empty() {
                    0.0
                } else {
                    trimmed.parse().unwrap_or(f64::NAN)
                }
            }
            _ => f64::NAN,
        }
    }

    #[inline]
    pub fn prototype(&self, proto: Prototype) -> ObjectId {
        self.prototypes[proto.index()]
    }

    #[inline]
    pub fn global_object(&self) -> Value {
        Value::Object(self.global)
    }

    fn define_global(&mut self, slot: PropertySlot) -> Result<(), Exception> {
        self.charge(MemoryTag::Object, size_of::<PropertySlot>())?;
        self.heap.object_mut(self.global).put(slot);
        Ok(())
    }

    /// Define a global-object property visible to unresolved references
    pub fn bind(&mut self, name: &str, value: Value) -> Result<(), Exception> {
        let key = self.atoms.intern(name);
        self.define_global(PropertySlot::data(key, value))
    }

    /// Global-object property by name
    pub fn global_value(&mut self, name: &str) -> Result<Value, Exception> {
        let global = self.global_object();
        self.get(&global, name)
    }

    /// Read a `Binding::Global` reference; missing names yield `undefined`
    pub fn global_get(&mut self, name: Atom) -> Result<Value, Exception> {
        let global = self.global_object();
        self.get_atom(&global, name)
    }

    pub fn global_set(&mut self, name: Atom, value: Value) -> Result<(), Exception> {
        let global = self.global_object();
        self.set_atom(&global, name, value)
    }

    /// Read a `Binding::Unresolvable` reference
    pub fn unresolved_get(&mut self, name: Atom) -> Result<Value, Exception> {
        let global = self.global_object();
        let query = self.query_atom(&global, name, crate::runtime::query::QueryMode::Get, false)?;
        if query.is_declined() {
            let message = format!("\"{}\" is not defined", self.atoms.name(name));
            return Err(self.reference_error(message));
        }
        self.get_atom(&global, name)
    }

    /// Value of a top-level variable slot
    pub fn global_variable(&self, index: u32) -> Option<Value> {
        Some(match self.globals.get(index as usize)? {
            Slot::Value(value) => value.clone(),
            Slot::Cell(cell) => self.heap.cell(*cell).clone(),
        })
    }

    /// Allocate an object, raising the memory error when the budget is spent
    pub fn alloc(&mut self, object: Object) -> Result<ObjectId, Exception> {
        match self.heap.alloc_object(object) {
            Ok(id) => Ok(id),
            Err(_) => Err(self.memory_exception()),
        }
    }

    /// Charge auxiliary storage to the budget
    pub fn charge(&mut self, tag: MemoryTag, bytes: usize) -> Result<(), Exception> {
        match self.heap.arena_mut().charge(tag, bytes) {
            Ok(()) => Ok(()),
            Err(_) => Err(self.memory_exception()),
        }
    }

    pub fn memory_stats(&self) -> MemoryStats {
        self.heap.stats()
    }

    #[inline]
    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    #[inline]
    pub fn atoms(&self) -> &AtomTable {
        &self.atoms
    }

    #[inline]
    pub fn atoms_mut(&mut self) -> &mut AtomTable {
        &mut self.atoms
    }

    #[inline]
    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Register a host prototype
    pub fn external_prototype(
        &mut self,
        properties: &[ExternalProperty],
        handler: Option<Arc<dyn ExternalHandler>>,
    ) -> Result<ExternalProtoId, Exception> {
        let mut table = FlatHash::new();
        for property in properties {
            let slot = match property {
                ExternalProperty::Property {
                    name,
                    handler,
                    magic,
                    writable,
                } => PropertySlot::handler(self.atoms.intern(name), *handler, *magic, *writable),
                ExternalProperty::Method {
                    name,
                    call,
                    nargs,
                    magic,
                } => PropertySlot::method(self.atoms.intern(name), *call, *nargs, *magic),
                ExternalProperty::Value { name, value } => PropertySlot::with_attributes(
                    self.atoms.intern(name),
                    PropertyKind::Data(value.clone()),
                    false,
                    true,
                    false,
                ),
            };
            self.charge(MemoryTag::Object, size_of::<PropertySlot>())?;
            table.insert(slot.key.hash(), slot, true);
        }

        let id = ExternalProtoId(self.externals.len() as u32);
        self.externals.push(ExternalProto {
            table: Arc::new(table),
            handler,
        });
        log::debug!("external prototype {} registered", id.0);
        Ok(id)
    }

    /// Create a host object of prototype `proto` carrying `data`
    pub fn external_create(
        &mut self,
        proto: ExternalProtoId,
        data: ExternalData,
    ) -> Result<Value, Exception> {
        let Some(table) = self.externals.get(proto.0 as usize).map(|p| p.table.clone()) else {
            return Err(self.type_error("unknown external prototype"));
        };
        let parent = self.prototype(Prototype::Object);
        let object = Object::with_shared(
            ObjectKind::External(ExternalSlots { proto, data }),
            Some(parent),
            table,
        );
        let id = self.alloc(object)?;
        Ok(Value::External(id))
    }

    /// Host payload of an external value
    pub fn external_data(&self, value: &Value) -> Option<ExternalData> {
        match &self.heap.object(value.object_id()?).kind {
            ObjectKind::External(slots) => Some(slots.data.clone()),
            _ => None,
        }
    }

    pub(crate) fn external_handler(&self, id: ObjectId) -> Option<Arc<dyn ExternalHandler>> {
        match &self.heap.object(id).kind {
            ObjectKind::External(slots) => self.externals.get(slots.proto.0 as usize)?.handler.clone(),
            _ => None,
        }
    }

    /// Payload given to this VM by the host at clone time
    pub fn external(&self) -> Option<&ExternalData> {
        self.external.as_ref()
    }

    /// String form of an atom
    pub fn atom_name(&self, atom: Atom) -> JsString {
        self.atoms.name(atom)
    }
}

impl Drop for Vm {
    fn drop(&mut self) {
        log::debug!("vm destroyed: {} bytes in use", self.heap.stats().used);
    }
}
