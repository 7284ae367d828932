//! Resolver pass over a parsed program
//!
//! Walks the syntax tree once to build the scope tree (declarations,
//! references, labels), resolves every reference, and emits one [`Lambda`]
//! per function together with the binding of every identifier node.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::atom::{Atom, AtomTable};
use crate::error::CompileError;
use crate::parser::ast::{
    CatchClause, DeclKind, Expr, Function, Ident, NodeId, Program, Stmt, UnaryOp,
};
use crate::parser::scope::{Redeclared, RefId, ReferenceKind, ScopeId, ScopeKind, ScopeTree};
use crate::parser::variable::{StorageIndex, VarId, VariableKind};
use crate::runtime::function::{Declaration, Lambda};
use crate::value::Value;

/// Maximum depth of nested functions
pub const MAX_FUNCTION_NESTING: u32 = 32;

/// What an unresolvable identifier compiles to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnresolvedBinding {
    /// Look the name up on the global object at run time
    #[default]
    GlobalProperty,
    /// Raise `ReferenceError` at run time
    ReferenceError,
}

/// Compiler settings
#[derive(Debug, Clone)]
pub struct CompilerOptions {
    pub module: bool,
    pub unresolved: UnresolvedBinding,
    /// Maximum statement/expression nesting
    pub max_depth: u32,
    /// Source name used when the program does not carry one
    pub file: Option<String>,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        CompilerOptions {
            module: false,
            unresolved: UnresolvedBinding::default(),
            max_depth: Self::DEFAULT_MAX_DEPTH,
            file: None,
        }
    }
}

impl CompilerOptions {
    pub const DEFAULT_MAX_DEPTH: u32 = 1024;
}

/// Where an identifier node reads and writes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binding {
    Storage(StorageIndex),
    /// Global object property
    Global(Atom),
    /// Runtime `ReferenceError`
    Unresolvable(Atom),
}

/// Identifier bindings and function lambdas of a compiled program
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    bindings: FxHashMap<NodeId, Binding>,
    functions: FxHashMap<NodeId, u32>,
}

impl Resolution {
    pub fn binding(&self, node: NodeId) -> Option<Binding> {
        self.bindings.get(&node).copied()
    }

    /// Lambda index of a function node
    pub fn function(&self, node: NodeId) -> Option<u32> {
        self.functions.get(&node).copied()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

/// A global binding after compilation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlobalVariable {
    pub name: Atom,
    pub kind: VariableKind,
    pub index: u32,
}

/// Output of [`Compiler::compile`]
#[derive(Debug, Clone)]
pub struct CompiledProgram {
    /// Top-level code; its variables live in global storage
    pub main: Arc<Lambda>,
    /// Every lambda, indexed by `Lambda::start`
    pub lambdas: Vec<Arc<Lambda>>,
    pub resolution: Resolution,
    /// Global bindings that own a slot
    pub globals: Vec<GlobalVariable>,
    /// Initial global storage
    pub global_defaults: Vec<Value>,
}

impl CompiledProgram {
    #[inline]
    pub fn global_count(&self) -> usize {
        self.global_defaults.len()
    }

    pub fn lambda(&self, start: u32) -> Option<&Arc<Lambda>> {
        self.lambdas.get(start as usize)
    }
}

struct FunctionRecord {
    scope: ScopeId,
    name: Option<String>,
    nargs: u32,
    rest: bool,
    arrow: bool,
    self_var: Option<VarId>,
    declarations: Vec<(RefId, usize)>,
    lines: Vec<(u32, u32)>,
}

/// Single-use resolver over one program
pub struct Compiler<'a> {
    atoms: &'a mut AtomTable,
    options: CompilerOptions,
    tree: ScopeTree,
    records: Vec<FunctionRecord>,
    functions: FxHashMap<NodeId, u32>,
    depth: u32,
    nesting: u32,
}

impl<'a> Compiler<'a> {
    pub fn new(atoms: &'a mut AtomTable, options: CompilerOptions) -> Self {
        let tree = ScopeTree::new(options.module);
        Compiler {
            atoms,
            options,
            tree,
            records: Vec::new(),
            functions: FxHashMap::default(),
            depth: 0,
            nesting: 0,
        }
    }

    /// Make bindings of earlier compilations visible (accumulative mode)
    pub fn with_globals(mut self, globals: &[GlobalVariable]) -> Self {
        for g in globals {
            self.tree.add_persistent(g.name, g.kind, g.index);
        }
        self
    }

    /// The scope tree built so far
    pub fn tree(&self) -> &ScopeTree {
        &self.tree
    }

    pub fn compile(mut self, program: &Program) -> Result<CompiledProgram, CompileError> {
        self.records.push(FunctionRecord {
            scope: ScopeTree::ROOT,
            name: Some("main".into()),
            nargs: 0,
            rest: false,
            arrow: false,
            self_var: None,
            declarations: Vec::new(),
            lines: Vec::new(),
        });

        self.body(&program.body, ScopeTree::ROOT, 0)?;
        self.tree.resolve_all();

        let file = program.file.as_deref().or(self.options.file.as_deref());
        let compiled = self.emit(file)?;

        #[cfg(feature = "dump")]
        for (_, r) in self.tree.references() {
            log::trace!(
                "{:?} {:?} line {} -> {:?}",
                r.kind,
                self.atoms.name(r.name),
                r.line,
                r.index
            );
        }

        Ok(compiled)
    }

    fn duplicate(&self, err: Redeclared) -> CompileError {
        CompileError::DuplicateDeclaration {
            name: self.atoms.name(err.name).to_string(),
            line: err.line,
        }
    }

    fn enter(&mut self, line: u32) -> Result<(), CompileError> {
        self.depth += 1;
        if self.depth > self.options.max_depth {
            return Err(CompileError::RecursionLimit { line });
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    fn body(&mut self, stmts: &[Stmt], scope: ScopeId, rec: usize) -> Result<(), CompileError> {
        for stmt in stmts {
            if scope == self.records[rec].scope {
                let pc = self.records[rec].lines.len() as u32;
                self.records[rec].lines.push((pc, stmt.line()));
            }
            self.stmt(stmt, scope, rec)?;
        }
        Ok(())
    }

    fn declare(
        &mut self,
        scope: ScopeId,
        ident: &Ident,
        kind: VariableKind,
    ) -> Result<Atom, CompileError> {
        let name = self.atoms.intern(&ident.name);
        self.tree
            .add_variable(scope, name, kind, ident.line)
            .map_err(|e| self.duplicate(e))?;
        Ok(name)
    }

    fn stmt(&mut self, stmt: &Stmt, scope: ScopeId, rec: usize) -> Result<(), CompileError> {
        self.enter(stmt.line())?;
        let result = self.stmt_inner(stmt, scope, rec);
        self.leave();
        result
    }

    fn stmt_inner(&mut self, stmt: &Stmt, scope: ScopeId, rec: usize) -> Result<(), CompileError> {
        match stmt {
            Stmt::Declaration {
                kind, declarators, ..
            } => {
                let kind = match kind {
                    DeclKind::Var => VariableKind::Var,
                    DeclKind::Let => VariableKind::Let,
                    DeclKind::Const => VariableKind::Const,
                };
                for d in declarators {
                    let name = self.declare(scope, &d.name, kind)?;
                    if let Some(init) = &d.init {
                        self.expr(init, scope, rec)?;
                    } else if kind == VariableKind::Const {
                        return Err(CompileError::Syntax {
                            message: "missing initializer in const declaration".into(),
                            line: d.name.line,
                        });
                    }
                    if d.init.is_some() || kind != VariableKind::Var {
                        self.tree.add_reference(
                            scope,
                            name,
                            ReferenceKind::Declaration,
                            d.name.node,
                            d.name.line,
                        );
                    }
                }
            }

            Stmt::Function(f) => {
                let Some(ident) = &f.name else {
                    return Err(CompileError::Syntax {
                        message: "function statement requires a name".into(),
                        line: f.line,
                    });
                };
                let name = self.declare(scope, ident, VariableKind::Function)?;
                let r = self.tree.add_reference(
                    scope,
                    name,
                    ReferenceKind::Declaration,
                    ident.node,
                    ident.line,
                );
                let child = self.function(f, scope, false)?;
                self.records[rec].declarations.push((r, child));
            }

            Stmt::Expr(e, _) | Stmt::Throw(e, _) => self.expr(e, scope, rec)?,

            Stmt::Block(stmts, line) => {
                let block = self.tree.scope_enter(scope, ScopeKind::Block, *line);
                self.body(stmts, block, rec)?;
            }

            Stmt::If {
                test,
                then,
                otherwise,
                ..
            } => {
                self.expr(test, scope, rec)?;
                self.stmt(then, scope, rec)?;
                if let Some(otherwise) = otherwise {
                    self.stmt(otherwise, scope, rec)?;
                }
            }

            Stmt::While { test, body, .. } => {
                self.expr(test, scope, rec)?;
                self.stmt(body, scope, rec)?;
            }

            Stmt::For {
                init,
                test,
                update,
                body,
                line,
            } => {
                let block = self.tree.scope_enter(scope, ScopeKind::Block, *line);
                if let Some(init) = init {
                    self.stmt(init, block, rec)?;
                }
                if let Some(test) = test {
                    self.expr(test, block, rec)?;
                }
                if let Some(update) = update {
                    self.expr(update, block, rec)?;
                }
                self.stmt(body, block, rec)?;
            }

            Stmt::Return(value, line) => {
                if rec == 0 {
                    return Err(CompileError::Syntax {
                        message: "Illegal return statement".into(),
                        line: *line,
                    });
                }
                if let Some(value) = value {
                    self.expr(value, scope, rec)?;
                }
            }

            Stmt::Try {
                block,
                catch,
                finally,
                line,
            } => {
                let try_scope = self.tree.scope_enter(scope, ScopeKind::Block, *line);
                self.body(block, try_scope, rec)?;
                if let Some(clause) = catch {
                    self.catch(clause, scope, rec)?;
                }
                if let Some(finally) = finally {
                    let fin = self.tree.scope_enter(scope, ScopeKind::Block, *line);
                    self.body(finally, fin, rec)?;
                }
            }

            Stmt::Labeled { label, body, line } => {
                let atom = self.atoms.intern(label);
                if !self.tree.label_add(scope, atom) {
                    return Err(CompileError::Syntax {
                        message: format!("Label \"{label}\" has already been declared"),
                        line: *line,
                    });
                }
                self.stmt(body, scope, rec)?;
                self.tree.label_remove(scope, atom);
            }

            Stmt::Break(label, line) | Stmt::Continue(label, line) => {
                if let Some(label) = label {
                    let known = self
                        .atoms
                        .lookup(label)
                        .is_some_and(|atom| self.tree.label_find(scope, atom));
                    if !known {
                        return Err(CompileError::UndefinedLabel {
                            label: label.clone(),
                            line: *line,
                        });
                    }
                }
            }

            Stmt::Empty => {}
        }
        Ok(())
    }

    fn catch(&mut self, clause: &CatchClause, scope: ScopeId, rec: usize) -> Result<(), CompileError> {
        let catch_scope = self.tree.scope_enter(scope, ScopeKind::Block, clause.line);
        if let Some(param) = &clause.param {
            let name = self.declare(catch_scope, param, VariableKind::Catch)?;
            self.tree.add_reference(
                catch_scope,
                name,
                ReferenceKind::Declaration,
                param.node,
                param.line,
            );
        }
        self.body(&clause.body, catch_scope, rec)
    }

    fn function(&mut self, f: &Function, parent: ScopeId, expression: bool) -> Result<usize, CompileError> {
        self.nesting += 1;
        if self.nesting > MAX_FUNCTION_NESTING {
            return Err(CompileError::NestingTooDeep { line: f.line });
        }

        let scope = self.tree.scope_enter(parent, ScopeKind::Function, f.line);
        let rec = self.records.len();
        self.functions.insert(f.node, rec as u32);
        self.records.push(FunctionRecord {
            scope,
            name: f.name.as_ref().map(|n| n.name.clone()),
            nargs: 0,
            rest: false,
            arrow: f.arrow,
            self_var: None,
            declarations: Vec::new(),
            lines: Vec::new(),
        });

        let mut position = 0;
        for param in f.params.iter().chain(f.rest.iter()) {
            let name = self.atoms.intern(&param.name);
            self.tree
                .add_argument(scope, name, position, param.line)
                .map_err(|e| self.duplicate(e))?;
            position += 1;
        }
        self.records[rec].nargs = position;
        self.records[rec].rest = f.rest.is_some();

        if expression && !f.arrow {
            if let Some(ident) = &f.name {
                let name = self.atoms.intern(&ident.name);
                self.records[rec].self_var = self.tree.add_self(scope, name, ident.line);
            }
        }

        self.body(&f.body, scope, rec)?;
        self.nesting -= 1;
        Ok(rec)
    }

    fn expr(&mut self, expr: &Expr, scope: ScopeId, rec: usize) -> Result<(), CompileError> {
        self.enter(0)?;
        let result = self.expr_inner(expr, scope, rec);
        self.leave();
        result
    }

    fn reference(&mut self, ident: &Ident, scope: ScopeId, kind: ReferenceKind) {
        let name = self.atoms.intern(&ident.name);
        self.tree.add_reference(scope, name, kind, ident.node, ident.line);
    }

    fn expr_inner(&mut self, expr: &Expr, scope: ScopeId, rec: usize) -> Result<(), CompileError> {
        match expr {
            Expr::Ident(ident) => self.reference(ident, scope, ReferenceKind::Reference),
            Expr::Number(_)
            | Expr::String(_)
            | Expr::Bool(_)
            | Expr::Null
            | Expr::This => {}
            Expr::Array(items) => {
                for item in items {
                    self.expr(item, scope, rec)?;
                }
            }
            Expr::Object(props) => {
                for (_, value) in props {
                    self.expr(value, scope, rec)?;
                }
            }
            Expr::Function(f) => {
                self.function(f, scope, true)?;
            }
            Expr::Unary {
                op: UnaryOp::Typeof,
                arg,
            } => match arg.as_ref() {
                Expr::Ident(ident) => self.reference(ident, scope, ReferenceKind::Typeof),
                other => self.expr(other, scope, rec)?,
            },
            Expr::Unary { arg, .. } => self.expr(arg, scope, rec)?,
            Expr::Binary { left, right, .. } => {
                self.expr(left, scope, rec)?;
                self.expr(right, scope, rec)?;
            }
            Expr::Assign { target, value } => {
                self.expr(target, scope, rec)?;
                self.expr(value, scope, rec)?;
            }
            Expr::Member { object, .. } => self.expr(object, scope, rec)?,
            Expr::Index { object, index } => {
                self.expr(object, scope, rec)?;
                self.expr(index, scope, rec)?;
            }
            Expr::Call { callee, args } | Expr::New { callee, args } => {
                self.expr(callee, scope, rec)?;
                for arg in args {
                    self.expr(arg, scope, rec)?;
                }
            }
        }
        Ok(())
    }

    fn local_defaults(&self, scope: ScopeId, size: u32) -> Vec<Value> {
        let mut defaults = vec![Value::Undefined; size as usize];
        for (_, var) in self.tree.variables() {
            if var.argument.is_some() || self.tree.function_scope(var.scope) != scope {
                continue;
            }
            if let Some(slot) = var.index.and_then(|i| defaults.get_mut(i as usize)) {
                *slot = var.initial_value();
            }
        }
        defaults
    }

    fn emit(&self, file: Option<&str>) -> Result<CompiledProgram, CompileError> {
        let mut built: Vec<Option<Arc<Lambda>>> = vec![None; self.records.len()];

        for (i, rec) in self.records.iter().enumerate().rev() {
            let scope = self.tree.scope(rec.scope);
            let nlocal = if i == 0 { 0 } else { scope.items };

            let mut declarations = Vec::with_capacity(rec.declarations.len());
            for &(r, child) in &rec.declarations {
                let index = self.tree.variable_index(r).map_err(|_| CompileError::Syntax {
                    message: "unresolved function declaration".into(),
                    line: self.tree.reference(r).line,
                })?;
                let lambda = built[child].clone().ok_or(CompileError::Reentrant)?;
                declarations.push(Declaration { index, lambda });
            }

            let lambda = Lambda {
                name: rec.name.as_deref().map(crate::value::JsString::new),
                nargs: rec.nargs,
                nlocal,
                local_defaults: self.local_defaults(rec.scope, nlocal),
                closures: scope.closures.clone(),
                declarations,
                self_index: rec.self_var.and_then(|v| self.tree.variable(v).index),
                rest_parameters: rec.rest,
                ctor: !rec.arrow && i != 0,
                arrow: rec.arrow,
                start: i as u32,
                source_file: file.map(str::to_owned),
                line_numbers: rec.lines.clone(),
            };
            built[i] = Some(Arc::new(lambda));
        }

        let lambdas: Vec<Arc<Lambda>> = built.into_iter().flatten().collect();
        let main = lambdas.first().cloned().ok_or(CompileError::Reentrant)?;

        let mut resolution = Resolution {
            bindings: FxHashMap::default(),
            functions: self.functions.clone(),
        };
        for (_, r) in self.tree.references() {
            let binding = match r.index {
                Some(index) => Binding::Storage(index),
                None if r.kind == ReferenceKind::Typeof => Binding::Global(r.name),
                None => match self.options.unresolved {
                    UnresolvedBinding::GlobalProperty => Binding::Global(r.name),
                    UnresolvedBinding::ReferenceError => Binding::Unresolvable(r.name),
                },
            };
            resolution.bindings.insert(r.node, binding);
        }

        let root = self.tree.scope(ScopeTree::ROOT);
        let global_defaults = self.local_defaults(ScopeTree::ROOT, root.items);
        let globals = self
            .tree
            .variables()
            .filter(|(_, v)| self.tree.function_scope(v.scope) == ScopeTree::ROOT)
            .filter_map(|(_, v)| {
                v.index.map(|index| GlobalVariable {
                    name: v.name,
                    kind: v.kind,
                    index,
                })
            })
            .collect();

        Ok(CompiledProgram {
            main,
            lambdas,
            resolution,
            globals,
            global_defaults,
        })
    }
}
