use criterion::{black_box, criterion_group, criterion_main, Criterion};
use njs::parser::ast::{DeclKind, Declarator, Expr, Function, NodeIds, Program, Stmt};
use njs::parser::{Compiler, CompilerOptions};
use njs::runtime::FlatHash;
use njs::{AtomTable, Options, Value, Vm};

fn bench_flat_hash(c: &mut Criterion) {
    c.bench_function("flathsh insert/find/delete 1k", |b| {
        b.iter(|| {
            let mut hash = FlatHash::new();
            for key in 0..1000u32 {
                hash.insert(key.wrapping_mul(0x9e37_79b9), key, false);
            }
            let mut found = 0;
            for key in 0..1000u32 {
                if hash.find(key.wrapping_mul(0x9e37_79b9)).is_some() {
                    found += 1;
                }
            }
            for key in 0..1000u32 {
                hash.delete(key.wrapping_mul(0x9e37_79b9));
            }
            black_box(found)
        })
    });
}

fn bench_prototype_chain(c: &mut Criterion) {
    let mut vm = Vm::create(Options::default()).unwrap();
    let root = vm.object_new().unwrap();
    vm.set(&root, "deep", Value::Number(1.0)).unwrap();
    let mut leaf = root;
    for _ in 0..32 {
        leaf = vm.object_alloc(leaf.object_id()).unwrap();
    }
    let key = vm.atoms_mut().intern("deep");

    c.bench_function("property get through 32 prototypes", |b| {
        b.iter(|| black_box(vm.get_atom(&leaf, key).unwrap()))
    });
}

fn program(n: usize) -> Program {
    let mut ids = NodeIds::new();
    let mut body = Vec::new();
    for i in 0..n {
        let name = ids.ident(&format!("v{i}"), 1);
        body.push(Stmt::Declaration {
            kind: DeclKind::Let,
            declarators: vec![Declarator {
                name,
                init: Some(Expr::Number(i as f64)),
            }],
            line: 1,
        });
    }
    let mut inner = Vec::new();
    for i in 0..n {
        inner.push(Stmt::Expr(ids.var(&format!("v{i}"), 2), 2));
    }
    body.push(Stmt::Function(Box::new(Function {
        node: ids.next_id(),
        name: Some(ids.ident("f", 2)),
        params: Vec::new(),
        rest: None,
        body: inner,
        arrow: false,
        line: 2,
    })));
    Program { body, file: None }
}

fn bench_scope_resolution(c: &mut Criterion) {
    let program = program(200);
    c.bench_function("resolve 200 globals from a closure", |b| {
        b.iter(|| {
            let mut atoms = AtomTable::new();
            let compiled = Compiler::new(&mut atoms, CompilerOptions::default())
                .compile(&program)
                .unwrap();
            black_box(compiled.resolution.len())
        })
    });
}

criterion_group!(
    benches,
    bench_flat_hash,
    bench_prototype_chain,
    bench_scope_resolution
);
criterion_main!(benches);
