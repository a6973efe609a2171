//! Benchmarks for the dependence analysis and synchronization passes.
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use parloop::analysis::{Dependence, DependenceGraph, Hazard, SccDag};
use parloop::ir::{abi, ComparePred, FunctionBuilder, InstId, Task, Value};
use parloop::runtime::{run_parallel, SyncRing};
use parloop::transform::{insert_synchronization, SequentialSegment};
use std::collections::BTreeSet;

/// `n` nodes in a chain where every fourth node closes a carried cycle
/// back to the previous checkpoint.
fn chain_graph(n: u32) -> DependenceGraph {
    let mut g = DependenceGraph::new();
    let nodes: Vec<_> = (0..n).map(|i| g.add_node(InstId(i))).collect();
    for w in nodes.windows(2) {
        g.add_edge(Dependence::data(w[0], w[1])).unwrap();
    }
    for i in (4..n as usize).step_by(4) {
        g.add_edge(Dependence::memory(nodes[i], nodes[i - 3], Hazard::Anti).loop_carried()).unwrap();
    }
    g
}

/// Counted loop with `k` external calls in its body.
fn work_loop(k: usize) -> (Task, Vec<InstId>, parloop::ir::BlockId) {
    let mut b = FunctionBuilder::new("bench", abi::FIRST_USER_ARG + 1);
    let entry = b.entry();
    let header = b.block("header");
    let body = b.block("body");
    let exit = b.block("exit");
    b.br(header);

    b.position_at(header);
    let i = b.phi(vec![(entry, Value::Arg(abi::THREAD_ID))]);
    let cmp = b.compare(ComparePred::Lt, i.into(), Value::Arg(abi::FIRST_USER_ARG));
    b.cond_br(cmp.into(), body, exit);

    b.position_at(body);
    let calls: Vec<InstId> = (0..k).map(|_| b.call("work", vec![i.into()])).collect();
    let next = b.add(i.into(), Value::Arg(abi::NUM_THREADS));
    b.br(header);
    b.add_incoming(i, body, next.into());

    b.position_at(exit);
    b.ret(None);
    (Task::new(b.finish().unwrap(), header), calls, exit)
}

fn bench_sccdag(c: &mut Criterion) {
    let mut group = c.benchmark_group("sccdag_build");
    for n in [64u32, 512, 4096] {
        let g = chain_graph(n);
        group.bench_with_input(BenchmarkId::from_parameter(n), &g, |b, g| {
            b.iter(|| SccDag::build(black_box(g)).unwrap())
        });
    }
    group.finish();
}

fn bench_ordering_queries(c: &mut Criterion) {
    let g = chain_graph(1024);
    let dag = SccDag::build(&g).unwrap();
    let ids = dag.topological_order();
    let tail: BTreeSet<_> = ids[ids.len() / 2..].iter().copied().collect();
    // Warm the reachability matrix outside the measured loop.
    dag.ordered_before(ids[0], ids[1]).unwrap();

    c.bench_function("ordered_before_any_1024", |b| {
        b.iter(|| {
            ids.iter()
                .filter(|&&a| dag.ordered_before_any(black_box(a), &tail).unwrap())
                .count()
        })
    });
}

fn bench_synchronization(c: &mut Criterion) {
    let (task, calls, exit) = work_loop(16);
    let segments: Vec<SequentialSegment> = calls
        .iter()
        .enumerate()
        .map(|(id, &call)| SequentialSegment::new(id as u32, [call], [call]))
        .collect();

    c.bench_function("insert_synchronization_16_segments", |b| {
        b.iter(|| {
            let mut tasks = vec![task.clone()];
            insert_synchronization(&mut tasks, black_box(&segments), &[exit]).unwrap()
        })
    });
}

fn bench_ring(c: &mut Criterion) {
    let (mut task, calls, exit) = work_loop(1);
    let segments = vec![SequentialSegment::new(0, [calls[0]], [calls[0]])];
    let mut tasks = vec![task.clone()];
    insert_synchronization(&mut tasks, &segments, &[exit]).unwrap();
    task = tasks.remove(0);

    let mut group = c.benchmark_group("ring_run");
    for threads in [1usize, 2, 4] {
        group.bench_with_input(BenchmarkId::from_parameter(threads), &threads, |b, &threads| {
            b.iter(|| {
                let ring = SyncRing::new(threads, 1).unwrap();
                run_parallel(&task, &ring, &[1024], None, u64::MAX).unwrap()
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_sccdag, bench_ordering_queries, bench_synchronization, bench_ring);
criterion_main!(benches);
