//! Benchmarks for graph building.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use procflow::pipeline::GraphBuilder;
use procflow::proc::ProcDefinition;
use std::sync::Arc;

fn chain(len: usize) -> Vec<Arc<ProcDefinition>> {
    let mut procs: Vec<Arc<ProcDefinition>> = Vec::with_capacity(len);
    for i in 0..len {
        let mut builder = ProcDefinition::builder(format!("P{i}")).input("a");
        if let Some(prev) = procs.last() {
            builder = builder.requires(prev);
        }
        procs.push(builder.build().unwrap());
    }
    procs
}

fn fan_out(width: usize) -> (Arc<ProcDefinition>, Vec<Arc<ProcDefinition>>) {
    let root = ProcDefinition::builder("root").input("a").build().unwrap();
    let leaves = (0..width)
        .map(|i| {
            ProcDefinition::builder(format!("leaf{i}"))
                .input("a")
                .order(i32::try_from(i % 7).unwrap())
                .requires(&root)
                .build()
                .unwrap()
        })
        .collect();
    (root, leaves)
}

fn graph_benchmark(c: &mut Criterion) {
    let procs = chain(100);
    let start = Arc::clone(&procs[0]);
    let last = Arc::clone(&procs[99]);
    c.bench_function("chain_100", |b| {
        b.iter(|| {
            let graph = GraphBuilder::new([&last]).unwrap().build(&[Arc::clone(&start)]).unwrap();
            black_box(graph.len())
        })
    });

    let (root, leaves) = fan_out(200);
    c.bench_function("fan_out_200", |b| {
        b.iter(|| {
            let graph = GraphBuilder::new(&leaves).unwrap().build(&[Arc::clone(&root)]).unwrap();
            black_box(graph.len())
        })
    });
}

criterion_group!(benches, graph_benchmark);
criterion_main!(benches);
