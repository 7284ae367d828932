//! Scope tree and variable resolution
//!
//! The tree is built while walking a program: every function body, block
//! and catch clause opens a scope, declarations register variables, and every
//! identifier use records a pending [`Reference`]. [`ScopeTree::resolve_all`]
//! then assigns storage:
//! - pass 1 resolves only references that cross a function boundary,
//!   giving the variable a slot in its owner and a closure slot in every
//!   function between the owner and the use
//! - pass 2 resolves the remaining same-function references
//!
//! Slots are handed out in first-resolved order, so declared but unused
//! variables never take storage.

use rustc_hash::FxHashMap;

use crate::atom::Atom;
use crate::parser::ast::NodeId;
use crate::parser::variable::{Level, StorageIndex, VarId, Variable, VariableKind};

/// Handle of a scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId(pub(crate) u32);

impl ScopeId {
    #[inline]
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// Handle of a reference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RefId(pub(crate) u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    Global,
    Function,
    Block,
}

/// How an identifier is used
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceKind {
    /// Initialising store emitted for a declaration
    Declaration,
    /// Ordinary read or write
    Reference,
    /// Operand of `typeof`, legal even when unresolvable
    Typeof,
}

/// Outcome of classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Same function as the declaration
    Local,
    /// Crosses at least one function boundary
    Closure,
}

/// The reference has no binding in any enclosing scope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Declined;

/// Declaration conflicts with an existing binding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Redeclared {
    pub name: Atom,
    pub line: u32,
}

#[derive(Debug, Clone)]
pub struct Scope {
    pub kind: ScopeKind,
    pub parent: Option<ScopeId>,
    pub children: Vec<ScopeId>,
    pub variables: FxHashMap<Atom, VarId>,
    /// References made directly in this scope
    pub references: Vec<RefId>,
    pub labels: Vec<Atom>,
    /// Next free local slot (function and global scopes)
    pub items: u32,
    /// Source of every closure slot, in the parent function's terms
    pub closures: Vec<StorageIndex>,
    closure_slots: FxHashMap<VarId, u32>,
    pub line: u32,
}

impl Scope {
    fn new(kind: ScopeKind, parent: Option<ScopeId>, line: u32) -> Self {
        Scope {
            kind,
            parent,
            children: Vec::new(),
            variables: FxHashMap::default(),
            references: Vec::new(),
            labels: Vec::new(),
            items: 0,
            closures: Vec::new(),
            closure_slots: FxHashMap::default(),
            line,
        }
    }

    /// Owns frame storage
    #[inline]
    pub fn is_function(&self) -> bool {
        !matches!(self.kind, ScopeKind::Block)
    }
}

/// A pending or resolved identifier use
#[derive(Debug, Clone)]
pub struct Reference {
    pub name: Atom,
    pub scope: ScopeId,
    pub kind: ReferenceKind,
    pub node: NodeId,
    pub line: u32,
    pub variable: Option<VarId>,
    pub class: Option<Classification>,
    pub index: Option<StorageIndex>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pass {
    Closure,
    Local,
}

/// Arena of scopes, variables and references of one compilation
#[derive(Debug, Clone)]
pub struct ScopeTree {
    scopes: Vec<Scope>,
    variables: Vec<Variable>,
    references: Vec<Reference>,
    /// Top-level function redeclarations are rejected in module code
    module: bool,
}

impl ScopeTree {
    pub const ROOT: ScopeId = ScopeId(0);

    pub fn new(module: bool) -> Self {
        ScopeTree {
            scopes: vec![Scope::new(ScopeKind::Global, None, 1)],
            variables: Vec::new(),
            references: Vec::new(),
            module,
        }
    }

    #[inline]
    pub fn scope(&self, id: ScopeId) -> &Scope {
        &self.scopes[id.index()]
    }

    #[inline]
    pub fn variable(&self, id: VarId) -> &Variable {
        &self.variables[id.0 as usize]
    }

    #[inline]
    pub fn reference(&self, id: RefId) -> &Reference {
        &self.references[id.0 as usize]
    }

    pub fn variables(&self) -> impl Iterator<Item = (VarId, &Variable)> {
        self.variables
            .iter()
            .enumerate()
            .map(|(i, v)| (VarId(i as u32), v))
    }

    pub fn references(&self) -> impl Iterator<Item = (RefId, &Reference)> {
        self.references
            .iter()
            .enumerate()
            .map(|(i, r)| (RefId(i as u32), r))
    }

    /// Open a child scope
    pub fn scope_enter(&mut self, parent: ScopeId, kind: ScopeKind, line: u32) -> ScopeId {
        let id = ScopeId(self.scopes.len() as u32);
        self.scopes.push(Scope::new(kind, Some(parent), line));
        self.scopes[parent.index()].children.push(id);
        id
    }

    /// Nearest scope owning frame storage
    pub fn function_scope(&self, mut id: ScopeId) -> ScopeId {
        loop {
            let scope = self.scope(id);
            match scope.parent {
                Some(parent) if !scope.is_function() => id = parent,
                _ => return id,
            }
        }
    }

    /// Visible binding of `name` from `scope`
    pub fn lookup(&self, mut scope: ScopeId, name: Atom) -> Option<VarId> {
        loop {
            let s = self.scope(scope);
            if let Some(var) = s.variables.get(&name) {
                return Some(*var);
            }
            scope = s.parent?;
        }
    }

    fn push_variable(&mut self, variable: Variable) -> VarId {
        let id = VarId(self.variables.len() as u32);
        self.variables.push(variable);
        id
    }

    /// Declare `name` in `scope`
    ///
    /// `var` declarations are hoisted: the binding is created in the nearest
    /// function scope and registered in every block scope crossed on the way.
    pub fn add_variable(
        &mut self,
        scope: ScopeId,
        name: Atom,
        kind: VariableKind,
        line: u32,
    ) -> Result<VarId, Redeclared> {
        if kind == VariableKind::Var {
            return self.add_var(scope, name, line);
        }

        let scope_kind = self.scope(scope).kind;
        let redeclared = Redeclared { name, line };

        if kind.is_lexical() && name == Atom::UNDEFINED && scope_kind == ScopeKind::Global {
            return Err(redeclared);
        }

        if let Some(&existing) = self.scope(scope).variables.get(&name) {
            let prev = &self.variables[existing.0 as usize];
            // a var hoisted through this block
            let hoisted = prev.kind == VariableKind::Var && prev.scope != scope;
            let prev = prev.kind;
            let clash = kind.is_lexical()
                || prev.is_lexical()
                || (scope_kind == ScopeKind::Block && hoisted)
                || (prev == VariableKind::Function
                    && (scope_kind == ScopeKind::Block
                        || (self.module && scope_kind == ScopeKind::Global)));
            if clash {
                return Err(redeclared);
            }
            let var = &mut self.variables[existing.0 as usize];
            var.kind = VariableKind::Function;
            var.line = line;
            return Ok(existing);
        }

        let id = self.push_variable(Variable::new(name, kind, scope, line));
        self.scopes[scope.index()].variables.insert(name, id);
        Ok(id)
    }

    fn add_var(&mut self, scope: ScopeId, name: Atom, line: u32) -> Result<VarId, Redeclared> {
        let target = self.function_scope(scope);
        let mut existing = None;
        let mut levels = Vec::new();
        let mut cur = scope;

        loop {
            let s = self.scope(cur);
            match s.variables.get(&name) {
                Some(&id) => match self.variables[id.0 as usize].kind {
                    VariableKind::Const | VariableKind::Let => {
                        return Err(Redeclared { name, line });
                    }
                    VariableKind::Function if s.kind == ScopeKind::Block => {
                        return Err(Redeclared { name, line });
                    }
                    VariableKind::Catch => {}
                    VariableKind::Function | VariableKind::Var => {
                        if cur == target {
                            existing = Some(id);
                        }
                    }
                },
                None => levels.push(cur),
            }
            if cur == target {
                break;
            }
            match s.parent {
                Some(parent) => cur = parent,
                None => break,
            }
        }

        let id = match existing {
            Some(id) => id,
            None => self.push_variable(Variable::new(name, VariableKind::Var, target, line)),
        };
        for level in levels {
            self.scopes[level.index()].variables.insert(name, id);
        }
        Ok(id)
    }

    /// Declare parameter `position` of the function owning `scope`
    pub fn add_argument(
        &mut self,
        scope: ScopeId,
        name: Atom,
        position: u32,
        line: u32,
    ) -> Result<VarId, Redeclared> {
        if self.scope(scope).variables.contains_key(&name) {
            return Err(Redeclared { name, line });
        }
        let mut var = Variable::new(name, VariableKind::Var, scope, line);
        var.argument = Some(position);
        var.index = Some(position);
        let id = self.push_variable(var);
        let s = &mut self.scopes[scope.index()];
        s.variables.insert(name, id);
        s.items = s.items.max(position + 1);
        Ok(id)
    }

    /// Bind a function expression's own name inside its body
    pub fn add_self(&mut self, scope: ScopeId, name: Atom, line: u32) -> Option<VarId> {
        if self.scope(scope).variables.contains_key(&name) {
            return None;
        }
        let mut var = Variable::new(name, VariableKind::Function, scope, line);
        var.self_ref = true;
        let id = self.push_variable(var);
        self.scopes[scope.index()].variables.insert(name, id);
        Some(id)
    }

    /// Re-create a global binding persisted from an earlier compilation
    pub fn add_persistent(&mut self, name: Atom, kind: VariableKind, index: u32) -> VarId {
        let mut var = Variable::new(name, kind, Self::ROOT, 0);
        var.index = Some(index);
        let id = self.push_variable(var);
        let root = &mut self.scopes[Self::ROOT.index()];
        root.variables.insert(name, id);
        root.items = root.items.max(index + 1);
        id
    }

    /// Record a use of `name` in `scope`
    pub fn add_reference(
        &mut self,
        scope: ScopeId,
        name: Atom,
        kind: ReferenceKind,
        node: NodeId,
        line: u32,
    ) -> RefId {
        let id = RefId(self.references.len() as u32);
        self.references.push(Reference {
            name,
            scope,
            kind,
            node,
            line,
            variable: None,
            class: None,
            index: None,
        });
        self.scopes[scope.index()].references.push(id);
        id
    }

    /// Scopes, children before parents
    fn post_order(&self) -> Vec<ScopeId> {
        let mut order = Vec::with_capacity(self.scopes.len());
        let mut stack = vec![(Self::ROOT, false)];
        while let Some((id, expanded)) = stack.pop() {
            if expanded {
                order.push(id);
                continue;
            }
            stack.push((id, true));
            for child in self.scope(id).children.iter().rev() {
                stack.push((*child, false));
            }
        }
        order
    }

    /// Resolve every pending reference
    pub fn resolve_all(&mut self) {
        let order = self.post_order();
        for pass in [Pass::Closure, Pass::Local] {
            for &scope in &order {
                let refs = self.scope(scope).references.clone();
                for r in refs {
                    self.resolve_reference(r, pass);
                }
            }
        }
    }

    fn ensure_index(&mut self, var: VarId) -> u32 {
        if let Some(index) = self.variables[var.0 as usize].index {
            return index;
        }
        let owner = self.function_scope(self.variables[var.0 as usize].scope);
        let s = &mut self.scopes[owner.index()];
        let index = s.items;
        s.items += 1;
        self.variables[var.0 as usize].index = Some(index);
        index
    }

    fn closure_slot(&mut self, function: ScopeId, var: VarId, source: StorageIndex) -> u32 {
        let s = &mut self.scopes[function.index()];
        if let Some(&slot) = s.closure_slots.get(&var) {
            return slot;
        }
        let slot = s.closures.len() as u32;
        s.closures.push(source);
        s.closure_slots.insert(var, slot);
        slot
    }

    fn storage_level(&self, owner: ScopeId) -> Level {
        if self.scope(owner).kind == ScopeKind::Global {
            Level::Global
        } else {
            Level::Local
        }
    }

    fn resolve_reference(&mut self, r: RefId, pass: Pass) {
        let (name, scope) = {
            let reference = self.reference(r);
            if reference.index.is_some() {
                return;
            }
            (reference.name, reference.scope)
        };

        let Some(var) = self.lookup(scope, name) else {
            return;
        };

        let owner = self.function_scope(self.variable(var).scope);
        let user = self.function_scope(scope);

        let (class, index) = if owner == user {
            if pass == Pass::Closure {
                return;
            }
            let slot = self.ensure_index(var);
            let level = self.storage_level(owner);
            (Classification::Local, StorageIndex { level, index: slot })
        } else {
            if pass == Pass::Local {
                return;
            }
            let slot = self.ensure_index(var);
            self.variables[var.0 as usize].closure_refs += 1;

            let mut chain = Vec::new();
            let mut f = user;
            while f != owner {
                chain.push(f);
                match self.scope(f).parent {
                    Some(parent) => f = self.function_scope(parent),
                    None => break,
                }
            }

            let mut source = StorageIndex {
                level: self.storage_level(owner),
                index: slot,
            };
            for function in chain.into_iter().rev() {
                source = StorageIndex::closure(self.closure_slot(function, var, source));
            }
            log::trace!(
                "variable {:?} captured across functions as closure slot {}",
                name,
                source.index
            );
            (Classification::Closure, source)
        };

        let reference = &mut self.references[r.0 as usize];
        reference.variable = Some(var);
        reference.class = Some(class);
        reference.index = Some(index);
    }

    /// Storage of a resolved reference
    pub fn variable_index(&self, r: RefId) -> Result<StorageIndex, Declined> {
        self.reference(r).index.ok_or(Declined)
    }

    /// Register a statement label; `false` if it is already visible
    pub fn label_add(&mut self, scope: ScopeId, label: Atom) -> bool {
        if self.label_find(scope, label) {
            return false;
        }
        self.scopes[scope.index()].labels.push(label);
        true
    }

    /// Check if `label` is visible from `scope` without leaving the function
    pub fn label_find(&self, mut scope: ScopeId, label: Atom) -> bool {
        loop {
            let s = self.scope(scope);
            if s.labels.contains(&label) {
                return true;
            }
            match s.parent {
                Some(parent) if !s.is_function() => scope = parent,
                _ => return false,
            }
        }
    }

    pub fn label_remove(&mut self, scope: ScopeId, label: Atom) {
        let labels = &mut self.scopes[scope.index()].labels;
        if let Some(pos) = labels.iter().rposition(|l| *l == label) {
            labels.remove(pos);
        }
    }
}
