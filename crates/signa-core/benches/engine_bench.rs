//! Criterion benchmarks for the render scheduler.
//!
//! Measures graph overhead independently of DSP cost using trivial constant
//! sources and gain stages. Two axes:
//!
//! - **Chain** — descent depth (linear chains of gain nodes)
//! - **Fan** — cache-point traffic (one source shared by N consumers)
//!
//! Run with: `cargo bench -p signa-core`
#![allow(missing_docs)]

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use signa_core::nodes::{Gain, Mixer};
use signa_core::{Engine, Node, NodeId, RenderContext, pcm};

const DT: f32 = 0.005;

struct Dc(f32);

impl Node for Dc {
    fn render(&mut self, ctx: &RenderContext<'_>) -> bool {
        pcm::fill(ctx.output(), self.0);
        true
    }
}

fn chain(depth: usize) -> (Engine, NodeId) {
    let mut engine = Engine::new();
    let mut prev = engine.add_node(Dc(1.0));
    for _ in 0..depth {
        let stage = engine.add_node(Gain::new(0.999));
        engine.connect(stage, 0, prev).unwrap();
        prev = stage;
    }
    engine.attach(prev).unwrap();
    (engine, prev)
}

fn fan(width: usize) -> (Engine, NodeId) {
    let mut engine = Engine::new();
    let shared = engine.add_node(Dc(1.0));
    let mix = engine.add_node(Mixer::new(width));
    for i in 0..width {
        let stage = engine.add_node(Gain::new(1.0));
        engine.connect(stage, 0, shared).unwrap();
        engine.connect(mix, i, stage).unwrap();
    }
    engine.attach(mix).unwrap();
    (engine, mix)
}

fn bench_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("engine/chain");
    for depth in [1usize, 4, 16, 64] {
        group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |b, &depth| {
            let (mut engine, _root) = chain(depth);
            b.iter(|| black_box(engine.render(DT)));
        });
    }
    group.finish();
}

fn bench_fan(c: &mut Criterion) {
    let mut group = c.benchmark_group("engine/fan");
    for width in [2usize, 4, 8] {
        group.bench_with_input(BenchmarkId::from_parameter(width), &width, |b, &width| {
            let (mut engine, _root) = fan(width);
            b.iter(|| black_box(engine.render(DT)));
        });
    }
    group.finish();
}

fn bench_attach(c: &mut Criterion) {
    c.bench_function("engine/attach_detach_16", |b| {
        let (mut engine, root) = chain(16);
        engine.detach(root).unwrap();
        b.iter(|| {
            engine.attach(root).unwrap();
            engine.detach(root).unwrap();
        });
    });
}

criterion_group!(benches, bench_chain, bench_fan, bench_attach);
criterion_main!(benches);
