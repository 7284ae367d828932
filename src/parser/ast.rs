//! Syntax tree consumed by the resolver
//!
//! Produced by a [`Frontend`](crate::parser::Frontend). Only the shapes that
//! matter for scoping are modelled in detail; every identifier carries a
//! [`NodeId`] so resolved bindings can be looked up by the executor.

/// Stable identity of an identifier node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

#[derive(Debug, Clone, PartialEq)]
pub struct Ident {
    pub name: String,
    pub node: NodeId,
    pub line: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclKind {
    Var,
    Let,
    Const,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Declarator {
    pub name: Ident,
    pub init: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    /// Identity used to find the compiled lambda
    pub node: NodeId,
    pub name: Option<Ident>,
    pub params: Vec<Ident>,
    /// `...rest` parameter
    pub rest: Option<Ident>,
    pub body: Vec<Stmt>,
    pub arrow: bool,
    pub line: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CatchClause {
    pub param: Option<Ident>,
    pub body: Vec<Stmt>,
    pub line: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Declaration {
        kind: DeclKind,
        declarators: Vec<Declarator>,
        line: u32,
    },
    Function(Box<Function>),
    Expr(Expr, u32),
    Block(Vec<Stmt>, u32),
    If {
        test: Expr,
        then: Box<Stmt>,
        otherwise: Option<Box<Stmt>>,
        line: u32,
    },
    While {
        test: Expr,
        body: Box<Stmt>,
        line: u32,
    },
    For {
        init: Option<Box<Stmt>>,
        test: Option<Expr>,
        update: Option<Expr>,
        body: Box<Stmt>,
        line: u32,
    },
    Return(Option<Expr>, u32),
    Throw(Expr, u32),
    Try {
        block: Vec<Stmt>,
        catch: Option<CatchClause>,
        finally: Option<Vec<Stmt>>,
        line: u32,
    },
    Labeled {
        label: String,
        body: Box<Stmt>,
        line: u32,
    },
    Break(Option<String>, u32),
    Continue(Option<String>, u32),
    Empty,
}

impl Stmt {
    pub fn line(&self) -> u32 {
        match self {
            Stmt::Declaration { line, .. }
            | Stmt::Expr(_, line)
            | Stmt::Block(_, line)
            | Stmt::If { line, .. }
            | Stmt::While { line, .. }
            | Stmt::For { line, .. }
            | Stmt::Return(_, line)
            | Stmt::Throw(_, line)
            | Stmt::Try { line, .. }
            | Stmt::Labeled { line, .. }
            | Stmt::Break(_, line)
            | Stmt::Continue(_, line) => *line,
            Stmt::Function(f) => f.line,
            Stmt::Empty => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Lt,
    Gt,
    Eq,
    StrictEq,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
    Typeof,
    Delete,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Ident(Ident),
    Number(f64),
    String(String),
    Bool(bool),
    Null,
    This,
    Array(Vec<Expr>),
    Object(Vec<(String, Expr)>),
    Function(Box<Function>),
    Unary {
        op: UnaryOp,
        arg: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Assign {
        target: Box<Expr>,
        value: Box<Expr>,
    },
    Member {
        object: Box<Expr>,
        property: String,
    },
    Index {
        object: Box<Expr>,
        index: Box<Expr>,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    New {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
}

/// A parsed script
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Program {
    pub body: Vec<Stmt>,
    pub file: Option<String>,
}

/// Allocates node ids while building trees by hand
#[derive(Debug, Default)]
pub struct NodeIds {
    next: u32,
}

impl NodeIds {
    pub fn new() -> Self {
        NodeIds::default()
    }

    pub fn next_id(&mut self) -> NodeId {
        let node = NodeId(self.next);
        self.next += 1;
        node
    }

    pub fn ident(&mut self, name: &str, line: u32) -> Ident {
        let node = self.next_id();
        Ident {
            name: name.to_owned(),
            node,
            line,
        }
    }

    /// Identifier expression
    pub fn var(&mut self, name: &str, line: u32) -> Expr {
        Expr::Ident(self.ident(name, line))
    }
}
