//! Compiles a uniform-driven expression, mounts it in an engine, and
//! retunes it live across a few ticks.
//!
//! Run with: `cargo run -p signa-expr --example expression_demo`

use signa_core::nodes::Tap;
use signa_core::Engine;
use signa_expr::{Expr, Expression, Uniform};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let level = Uniform::new(0.1);
    let bias = Uniform::new(0.0);

    // out = level * 2 + bias
    let node = Expression::new(Expr::var(&level) * 2.0 + Expr::var(&bias))
        .expect("expression compiles");
    println!(
        "compiled: {} instructions, {} data slots, {} registers",
        node.microcode().program(0).len(),
        node.microcode().data().len(),
        node.microcode().register_count(),
    );

    let mut engine = Engine::new();
    let leaf = engine.add_node(node);
    let tap = Tap::new();
    let sink = tap.sink();
    let root = engine.add_node(tap);
    engine.connect(root, 0, leaf).unwrap();
    engine.attach(root).unwrap();

    for tick in 0..5 {
        level.set(0.1 * (tick + 1) as f32);
        bias.set(tick as f32);
        let ok = engine.render(0.01);
        let captured = sink.lock().unwrap();
        println!(
            "tick {tick}: ok={ok} samples={} value={:.2}",
            captured.len(),
            captured.first().copied().unwrap_or(0.0),
        );
    }
}
