//! VM benchmarks: compile and execute representative programs.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rill::vm::Vm;

const FIB_RECURSIVE: &str = "
    sub fib(n) { if (n < 2) { return n; } return fib(n - 1) + fib(n - 2); }
    fib(18);
";

const LOOP_SUM: &str = "
    var sum = 0;
    var i = 0;
    while (i < 10000) { sum += i; i++; }
    sum;
";

const CONTAINERS: &str = "
    var h = {};
    var i = 0;
    while (i < 500) {
        var row = [1, 2, 3];
        row.push(i);
        h[i] = row;
        i++;
    }
    len(h);
";

fn run(source: &str) {
    let exec = rill::compile_str(source).expect("compile error");
    let mut vm = Vm::new();
    vm.execute(&exec, &[], None);
}

fn compile_only(c: &mut Criterion) {
    c.bench_function("compile_fib", |b| {
        b.iter(|| rill::compile_str(black_box(FIB_RECURSIVE)).expect("compile error"))
    });
}

fn execute(c: &mut Criterion) {
    let mut group = c.benchmark_group("execute");
    group.bench_function("fib_recursive", |b| b.iter(|| run(black_box(FIB_RECURSIVE))));
    group.bench_function("loop_sum", |b| b.iter(|| run(black_box(LOOP_SUM))));
    group.bench_function("containers", |b| b.iter(|| run(black_box(CONTAINERS))));
    group.finish();
}

criterion_group!(benches, compile_only, execute);
criterion_main!(benches);
