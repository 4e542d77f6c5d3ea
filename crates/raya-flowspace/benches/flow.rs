use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use raya_flowspace::bytecode::{CodeBuilder, CompareKind, Opcode};
use raya_flowspace::{check_graph, FlowSpace, Globals, HostFunction};

/// `n` independent `if` statements, each adding to an accumulator
fn branches(n: usize) -> HostFunction {
    let mut b = CodeBuilder::new(&["x"]);
    b.load_int(0).store_fast("acc");
    for i in 0..n {
        let skip = b.new_label();
        b.load_fast("x").load_int(i as i64).compare(CompareKind::Gt);
        b.jump(Opcode::PopJumpIfFalse, skip);
        b.load_fast("acc").load_int(1).emit(Opcode::BinaryAdd).store_fast("acc");
        b.bind(skip);
    }
    b.load_fast("acc").emit(Opcode::ReturnValue);
    HostFunction::new("branches", b.finish(), Globals::new())
}

/// `depth` nested counting loops
fn loops(depth: usize) -> HostFunction {
    let mut b = CodeBuilder::new(&["n"]);
    let mut exits = Vec::new();
    for level in 0..depth {
        let var = format!("i{}", level);
        let head = b.new_label();
        let exit = b.new_label();
        let end = b.new_label();
        b.load_int(0).store_fast(&var);
        b.jump(Opcode::SetupLoop, end);
        b.bind(head);
        b.load_fast(&var).load_fast("n").compare(CompareKind::Lt);
        b.jump(Opcode::PopJumpIfFalse, exit);
        b.load_fast(&var).load_int(1).emit(Opcode::BinaryAdd).store_fast(&var);
        exits.push((head, exit, end));
    }
    for (head, exit, end) in exits.into_iter().rev() {
        b.jump(Opcode::JumpAbsolute, head);
        b.bind(exit);
        b.emit(Opcode::PopBlock);
        b.bind(end);
    }
    b.load_fast("n").emit(Opcode::ReturnValue);
    HostFunction::new("loops", b.finish(), Globals::new())
}

fn bench_branches(c: &mut Criterion) {
    let space = FlowSpace::default();
    let mut group = c.benchmark_group("branches");
    for n in [4, 16, 64] {
        let f = branches(n);
        group.bench_with_input(BenchmarkId::new("build", n), &f, |b, f| {
            b.iter(|| space.build_flow(black_box(f)).unwrap());
        });
    }
    group.finish();
}

fn bench_loops(c: &mut Criterion) {
    let space = FlowSpace::default();
    let mut group = c.benchmark_group("loops");
    for depth in [1, 3, 6] {
        let f = loops(depth);
        group.bench_with_input(BenchmarkId::new("build", depth), &f, |b, f| {
            b.iter(|| space.build_flow(black_box(f)).unwrap());
        });
    }
    group.finish();
}

fn bench_check(c: &mut Criterion) {
    let graph = FlowSpace::default().build_flow(&branches(64)).unwrap();
    c.bench_function("check_graph", |b| {
        b.iter(|| check_graph(black_box(&graph)).unwrap());
    });
}

criterion_group!(benches, bench_branches, bench_loops, bench_check);
criterion_main!(benches);
