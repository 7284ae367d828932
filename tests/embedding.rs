//! End-to-end embedding flows
//!
//! Programs are built as syntax trees and run by a small scripted executor
//! whose per-function steps drive the frame API directly.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use njs::parser::ast::{DeclKind, Declarator, Expr, Function, Ident, NodeId, NodeIds, Program, Stmt};
use njs::parser::variable::Level;
use njs::parser::{Compiler, CompilerOptions};
use njs::runtime::property::HandlerCall;
use njs::runtime::{FlatHash, QueryMode};
use njs::vm::{HandlerKind, Unwind};
use njs::{
    AtomTable, Binding, Exception, ExternalHandler, ExternalProperty, Executor, FatalError,
    FrameId, JsString, Options, RunStatus, UnresolvedBinding, Value, Vm, VmError,
};

type Step = Box<dyn Fn(&mut Vm, FrameId) -> Result<Value, Exception> + Send + Sync>;

/// Executor dispatching on the running function's name
#[derive(Default)]
struct Script {
    steps: HashMap<String, Step>,
}

impl Script {
    fn on(
        mut self,
        name: &str,
        step: impl Fn(&mut Vm, FrameId) -> Result<Value, Exception> + Send + Sync + 'static,
    ) -> Self {
        self.steps.insert(name.to_string(), Box::new(step));
        self
    }
}

impl Executor for Script {
    fn execute(&self, vm: &mut Vm, frame: FrameId) -> Result<Value, Exception> {
        let name = vm
            .frame(frame)
            .lambda()
            .and_then(|l| l.name.as_ref().map(JsString::to_string))
            .unwrap_or_default();
        match self.steps.get(&name) {
            Some(step) => step(vm, frame),
            None => Ok(Value::Undefined),
        }
    }
}

fn binding(vm: &Vm, node: NodeId) -> Binding {
    vm.program().unwrap().resolution.binding(node).unwrap()
}

fn load(vm: &mut Vm, frame: FrameId, ident: &Ident) -> Result<Value, Exception> {
    match binding(vm, ident.node) {
        Binding::Storage(index) => {
            let name = vm.atoms_mut().intern(&ident.name);
            vm.variable_load(frame, index, name)
        }
        Binding::Global(name) => vm.global_get(name),
        Binding::Unresolvable(name) => vm.unresolved_get(name),
    }
}

fn init(vm: &mut Vm, frame: FrameId, ident: &Ident, value: Value) -> Result<(), Exception> {
    match binding(vm, ident.node) {
        Binding::Storage(index) => vm.variable_init(frame, index, value),
        Binding::Global(name) | Binding::Unresolvable(name) => vm.global_set(name, value),
    }
}

fn var(kind: DeclKind, name: &Ident, init: Option<Expr>) -> Stmt {
    Stmt::Declaration {
        kind,
        declarators: vec![Declarator {
            name: name.clone(),
            init,
        }],
        line: name.line,
    }
}

fn function(ids: &mut NodeIds, name: &str, params: &[&str], body: Vec<Stmt>, line: u32) -> Function {
    Function {
        node: ids.next_id(),
        name: Some(ids.ident(name, line)),
        params: params.iter().map(|p| ids.ident(p, line)).collect(),
        rest: None,
        body,
        arrow: false,
        line,
    }
}

fn vm_with(script: Script, options: Options) -> Vm {
    Vm::create(options.with_executor(Arc::new(script))).unwrap()
}

#[test]
fn test_iife_reads_global_through_closure() {
    // var a = 3; (function () { return a; })()
    let mut ids = NodeIds::new();
    let a_decl = ids.ident("a", 1);
    let a_use = ids.ident("a", 2);
    let inner = Function {
        node: ids.next_id(),
        name: None,
        params: Vec::new(),
        rest: None,
        body: vec![Stmt::Return(Some(Expr::Ident(a_use.clone())), 2)],
        arrow: false,
        line: 2,
    };
    let program = Program {
        body: vec![
            var(DeclKind::Var, &a_decl, Some(Expr::Number(3.0))),
            Stmt::Expr(
                Expr::Call {
                    callee: Box::new(Expr::Function(Box::new(inner))),
                    args: Vec::new(),
                },
                2,
            ),
        ],
        file: None,
    };

    let mut atoms = AtomTable::new();
    let compiled = Compiler::new(&mut atoms, CompilerOptions::default())
        .compile(&program)
        .unwrap();
    match compiled.resolution.binding(a_use.node) {
        Some(Binding::Storage(index)) => assert_eq!(index.level, Level::Closure),
        other => panic!("unexpected binding {other:?}"),
    }
    match compiled.resolution.binding(a_decl.node) {
        Some(Binding::Storage(index)) => assert_eq!(index.level, Level::Global),
        other => panic!("unexpected binding {other:?}"),
    }
}

#[test]
fn test_hash_delete_then_insert() {
    let mut atoms = AtomTable::new();
    let x = atoms.intern("x");
    let y = atoms.intern("y");
    let z = atoms.intern("z");

    let mut hash = FlatHash::new();
    hash.insert(x.hash(), 1, false);
    hash.insert(y.hash(), 2, false);
    assert_eq!(hash.delete(x.hash()), Some(1));
    hash.insert(z.hash(), 3, false);

    assert_eq!(hash.find(x.hash()), None);
    assert_eq!(hash.find(y.hash()), Some(&2));
    assert_eq!(hash.find(z.hash()), Some(&3));

    let mut live: Vec<u32> = hash.iter().map(|(key, _)| key).collect();
    live.sort_unstable();
    let mut expected = vec![y.hash(), z.hash()];
    expected.sort_unstable();
    assert_eq!(live, expected);
}

#[test]
fn test_inherited_property_then_deleted() {
    let mut vm = Vm::create(Options::default()).unwrap();
    let parent = vm.object_new().unwrap();
    let child = vm.object_new().unwrap();
    vm.set(&child, "__proto__", parent.clone()).unwrap();
    vm.set(&parent, "foo", Value::Number(1.0)).unwrap();

    let foo = Value::string("foo");
    let query = vm.property_query(&child, &foo, QueryMode::Get, false).unwrap();
    assert_eq!(query.value(), Some(&Value::Number(1.0)));

    assert!(vm.property_delete(&parent, &foo).unwrap());
    let query = vm.property_query(&child, &foo, QueryMode::Get, false).unwrap();
    assert!(query.is_declined());
}

#[test]
fn test_missing_parameters_are_undefined() {
    // function f(p, q) { return [p, q]; } f()
    let mut ids = NodeIds::new();
    let p_use = ids.ident("p", 2);
    let q_use = ids.ident("q", 2);
    let body = vec![Stmt::Return(
        Some(Expr::Array(vec![
            Expr::Ident(p_use.clone()),
            Expr::Ident(q_use.clone()),
        ])),
        2,
    )];
    let f = function(&mut ids, "f", &["p", "q"], body, 1);
    let f_name = f.name.clone().unwrap();
    let f_call = ids.ident("f", 3);
    let program = Program {
        body: vec![
            Stmt::Function(Box::new(f)),
            Stmt::Expr(
                Expr::Call {
                    callee: Box::new(Expr::Ident(f_call.clone())),
                    args: Vec::new(),
                },
                3,
            ),
        ],
        file: None,
    };

    let script = Script::default()
        .on("main", move |vm, frame| {
            let f = load(vm, frame, &f_call)?;
            vm.call(&f, &Value::Undefined, &[])
        })
        .on("f", move |vm, frame| {
            let p = load(vm, frame, &p_use)?;
            let q = load(vm, frame, &q_use)?;
            vm.array_new(vec![p, q])
        });
    let mut vm = vm_with(script, Options::default());
    let compiled = vm.compile_program(&program).unwrap();
    assert!(matches!(
        compiled.resolution.binding(f_name.node),
        Some(Binding::Storage(_))
    ));

    let result = vm.start().unwrap();
    assert_eq!(vm.get(&result, "0").unwrap(), Value::Undefined);
    assert_eq!(vm.get(&result, "1").unwrap(), Value::Undefined);
    assert_eq!(vm.get(&result, "length").unwrap(), Value::Number(2.0));
}

/// `var a = 3; function f() { return a; } f()`
fn closure_program(ids: &mut NodeIds) -> (Program, Ident, Ident, Ident) {
    let a_decl = ids.ident("a", 1);
    let a_use = ids.ident("a", 2);
    let f = function(ids, "f", &[], vec![Stmt::Return(Some(Expr::Ident(a_use.clone())), 2)], 2);
    let f_call = ids.ident("f", 3);
    let program = Program {
        body: vec![
            var(DeclKind::Var, &a_decl, Some(Expr::Number(3.0))),
            Stmt::Function(Box::new(f)),
            Stmt::Expr(
                Expr::Call {
                    callee: Box::new(Expr::Ident(f_call.clone())),
                    args: Vec::new(),
                },
                3,
            ),
        ],
        file: Some("closure.js".into()),
    };
    (program, a_decl, a_use, f_call)
}

fn closure_script(a_decl: Ident, a_use: Ident, f_call: Ident) -> Script {
    Script::default()
        .on("main", move |vm, frame| {
            init(vm, frame, &a_decl, Value::Number(3.0))?;
            let f = load(vm, frame, &f_call)?;
            vm.call(&f, &Value::Undefined, &[])
        })
        .on("f", move |vm, frame| load(vm, frame, &a_use))
}

#[test]
fn test_closure_reads_hoisted_global() {
    let mut ids = NodeIds::new();
    let (program, a_decl, a_use, f_call) = closure_program(&mut ids);
    let mut vm = vm_with(closure_script(a_decl, a_use, f_call), Options::default());
    vm.compile_program(&program).unwrap();
    assert_eq!(vm.start().unwrap(), Value::Number(3.0));
    assert_eq!(vm.retval(), &Value::Number(3.0));
    assert_eq!(vm.frame_depth(), 0);
}

#[test]
fn test_clone_runs_independently() {
    let mut ids = NodeIds::new();
    let (program, a_decl, a_use, f_call) = closure_program(&mut ids);
    let mut vm = vm_with(closure_script(a_decl, a_use, f_call), Options::default());
    vm.compile_program(&program).unwrap();
    vm.start().unwrap();

    let mut copy = vm.clone(Some(Arc::new("request-1".to_string()))).unwrap();
    assert_eq!(
        copy.external().and_then(|e| e.downcast_ref::<String>()).map(String::as_str),
        Some("request-1")
    );
    assert_eq!(copy.start().unwrap(), Value::Number(3.0));

    copy.bind("only_in_copy", Value::Boolean(true)).unwrap();
    assert_eq!(vm.global_value("only_in_copy").unwrap(), Value::Undefined);
    assert!(vm.external().is_none());
}

#[test]
fn test_uncaught_error_with_backtrace() {
    let mut ids = NodeIds::new();
    let f = function(&mut ids, "f", &[], vec![Stmt::Throw(Expr::Null, 2)], 2);
    let f_call = ids.ident("f", 4);
    let program = Program {
        body: vec![
            Stmt::Function(Box::new(f)),
            Stmt::Expr(
                Expr::Call {
                    callee: Box::new(Expr::Ident(f_call.clone())),
                    args: Vec::new(),
                },
                4,
            ),
        ],
        file: None,
    };
    let script = Script::default()
        .on("main", move |vm, frame| {
            let f = load(vm, frame, &f_call)?;
            vm.call(&f, &Value::Undefined, &[])
        })
        .on("f", |vm, _| Err(vm.type_error("boom")));

    let options = Options::default().with_backtrace(true).with_file("bt.js");
    let mut vm = vm_with(script, options);
    vm.compile_program(&program).unwrap();

    let err = vm.start().unwrap_err();
    assert!(matches!(err, VmError::Exception(Exception::Thrown(_))));
    let text = vm.exception_string().unwrap();
    assert!(text.starts_with("TypeError: boom\n"), "{text}");
    assert!(text.contains("    at f (bt.js"), "{text}");
    assert!(text.contains("    at main (bt.js"), "{text}");
    assert_eq!(vm.frame_depth(), 0);
}

#[test]
fn test_finally_return_overrides_throw() {
    // function f() { try { throw x; } finally { return 7; } }
    let mut ids = NodeIds::new();
    let f = function(&mut ids, "f", &[], Vec::new(), 1);
    let f_call = ids.ident("f", 2);
    let program = Program {
        body: vec![
            Stmt::Function(Box::new(f)),
            Stmt::Expr(
                Expr::Call {
                    callee: Box::new(Expr::Ident(f_call.clone())),
                    args: Vec::new(),
                },
                2,
            ),
        ],
        file: None,
    };
    let script = Script::default()
        .on("main", move |vm, frame| {
            let f = load(vm, frame, &f_call)?;
            vm.call(&f, &Value::Undefined, &[])
        })
        .on("f", |vm, frame| {
            vm.try_start(frame, 100, HandlerKind::Finally);
            let thrown = vm.range_error("lost");
            match vm.frame_throw(frame, thrown) {
                Unwind::Finally { pc } => {
                    vm.frame_mut(frame).pc = pc;
                    Ok(Value::Number(7.0))
                }
                other => panic!("unexpected {other:?}"),
            }
        });
    let mut vm = vm_with(script, Options::default());
    vm.compile_program(&program).unwrap();
    assert_eq!(vm.start().unwrap(), Value::Number(7.0));
}

#[test]
fn test_unresolved_reference_policy() {
    let mut ids = NodeIds::new();
    let missing = ids.ident("missing", 1);
    let program = Program {
        body: vec![Stmt::Expr(Expr::Ident(missing.clone()), 1)],
        file: None,
    };
    let script = Script::default().on("main", move |vm, frame| load(vm, frame, &missing));

    let options = Options::default().with_unresolved(UnresolvedBinding::ReferenceError);
    let mut vm = vm_with(script, options);
    vm.compile_program(&program).unwrap();
    assert!(vm.start().is_err());
    assert_eq!(
        vm.exception_string().unwrap(),
        "ReferenceError: \"missing\" is not defined"
    );
}

#[test]
fn test_fatal_error_poisons_vm() {
    let program = Program::default();
    let script = Script::default().on("main", |_, _| Err(Exception::internal("frame relink failure")));
    let mut vm = vm_with(script, Options::default());
    vm.compile_program(&program).unwrap();

    assert!(matches!(
        vm.start(),
        Err(VmError::Exception(Exception::Fatal(FatalError::Internal(_))))
    ));
    assert!(vm.is_poisoned());
    assert!(matches!(
        vm.start(),
        Err(VmError::Exception(Exception::Fatal(FatalError::Poisoned)))
    ));
    assert!(vm.run().is_err());
    assert!(matches!(vm.clone(None), Err(VmError::CloneUnsupported)));
}

#[test]
fn test_events_call_script_functions() {
    // function handler(n) { hits = hits + n; }
    let mut ids = NodeIds::new();
    let handler = function(&mut ids, "handler", &["n"], Vec::new(), 1);
    let h_ref = ids.ident("handler", 2);
    let program = Program {
        body: vec![
            Stmt::Function(Box::new(handler)),
            Stmt::Expr(Expr::Ident(h_ref.clone()), 2),
        ],
        file: None,
    };
    let script = Script::default()
        .on("main", move |vm, frame| load(vm, frame, &h_ref))
        .on("handler", |vm, frame| {
            let n = vm.frame(frame).arguments.first().and_then(Value::as_number).unwrap_or(0.0);
            let hits = vm.global_value("hits")?.as_number().unwrap_or(0.0);
            vm.bind("hits", Value::Number(hits + n))?;
            Ok(Value::Undefined)
        });
    let mut vm = vm_with(script, Options::default());
    vm.compile_program(&program).unwrap();
    vm.bind("hits", Value::Number(0.0)).unwrap();
    let handler = vm.start().unwrap();

    let released = Arc::new(AtomicUsize::new(0));
    let counter = released.clone();
    let id = vm
        .add_event(
            handler,
            false,
            Some(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })),
        )
        .unwrap();

    vm.post_event(id, vec![Value::Number(2.0)]);
    assert_eq!(vm.run().unwrap(), RunStatus::Again);
    vm.post_event(id, vec![Value::Number(5.0)]);
    assert_eq!(vm.run().unwrap(), RunStatus::Again);
    assert_eq!(vm.global_value("hits").unwrap(), Value::Number(7.0));

    assert!(vm.del_event(id));
    assert_eq!(vm.run().unwrap(), RunStatus::Ok);
    assert_eq!(released.load(Ordering::SeqCst), 1);
}

struct Request {
    headers: Vec<(&'static str, &'static str)>,
}

fn header_count(vm: &mut Vm, call: &HandlerCall<'_>) -> Result<Value, Exception> {
    let data = vm.external_data(call.this);
    let count = data
        .as_ref()
        .and_then(|d| d.downcast_ref::<Request>())
        .map_or(0, |r| r.headers.len());
    Ok(Value::Number(count as f64 + f64::from(call.magic)))
}

fn shout(vm: &mut Vm, _this: &Value, args: &[Value]) -> Result<Value, Exception> {
    let text = match args.first() {
        Some(v) => vm.value_to_string(v)?,
        None => String::new(),
    };
    Ok(Value::String(JsString::new(&text.to_uppercase())))
}

struct Headers;

impl ExternalHandler for Headers {
    fn get(&self, vm: &mut Vm, this: &Value, key: &JsString) -> Result<Option<Value>, Exception> {
        let data = vm.external_data(this);
        let request = data.as_ref().and_then(|d| d.downcast_ref::<Request>());
        let name = key.to_string();
        Ok(request
            .and_then(|r| r.headers.iter().find(|(k, _)| *k == name))
            .map(|(_, v)| Value::string(v)))
    }

    fn keys(&self, vm: &mut Vm, this: &Value) -> Result<Vec<JsString>, Exception> {
        let data = vm.external_data(this);
        let request = data.as_ref().and_then(|d| d.downcast_ref::<Request>());
        Ok(request
            .map(|r| r.headers.iter().map(|(k, _)| JsString::new(k)).collect())
            .unwrap_or_default())
    }
}

#[test]
fn test_external_objects() {
    let mut vm = Vm::create(Options::default()).unwrap();
    let proto = vm
        .external_prototype(
            &[
                ExternalProperty::Property {
                    name: "count",
                    handler: header_count,
                    magic: 0,
                    writable: false,
                },
                ExternalProperty::Method {
                    name: "shout",
                    call: shout,
                    nargs: 1,
                    magic: 0,
                },
                ExternalProperty::Value {
                    name: "kind",
                    value: Value::string("request"),
                },
            ],
            Some(Arc::new(Headers)),
        )
        .unwrap();
    let request = Request {
        headers: vec![("host", "example.org"), ("accept", "*/*")],
    };
    let r = vm.external_create(proto, Arc::new(request)).unwrap();

    assert_eq!(vm.get(&r, "count").unwrap(), Value::Number(2.0));
    assert_eq!(vm.get(&r, "kind").unwrap(), Value::string("request"));
    assert_eq!(vm.get(&r, "host").unwrap(), Value::string("example.org"));
    assert_eq!(vm.get(&r, "missing").unwrap(), Value::Undefined);

    let shout = vm.get(&r, "shout").unwrap();
    let loud = vm.call(&shout, &r, &[Value::string("hi")]).unwrap();
    assert_eq!(loud, Value::string("HI"));

    assert!(vm.set(&r, "count", Value::Number(9.0)).is_err());
    // inherited from Object.prototype once the host declines
    assert!(vm.get(&r, "hasOwnProperty").unwrap().is_function());

    let keys = vm.own_keys(&r, false).unwrap();
    assert!(keys.contains(&Value::string("host")));
    assert!(keys.contains(&Value::string("accept")));
}
