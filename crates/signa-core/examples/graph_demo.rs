//! Renders a small shared-subgraph signal graph and prints what each tick
//! produced.
//!
//! Run with: `cargo run -p signa-core --example graph_demo`

use signa_core::nodes::{Gain, Mixer, Tap};
use signa_core::{Engine, Node, RenderContext, pcm};

/// Ramp source: fills each tick with values advancing at the control rate.
struct Ramp {
    level: f32,
}

impl Node for Ramp {
    fn render(&mut self, ctx: &RenderContext<'_>) -> bool {
        if ctx.additive() {
            pcm::accumulate(ctx.output(), self.level);
        } else {
            pcm::fill(ctx.output(), self.level);
        }
        true
    }

    fn sync(&mut self, dt: f32) {
        self.level = (self.level + dt) % 1.0;
    }
}

fn main() {
    let mut engine = Engine::new();

    // ramp feeds two gain stages; it converges on both, so the scheduler
    // caches its output once per tick
    let ramp = engine.add_node(Ramp { level: 0.0 });
    let dry = engine.add_node(Gain::new(1.0));
    let wet = engine.add_node(Gain::new(0.25));
    let mix = engine.add_node(Mixer::new(2));
    let tap = Tap::new();
    let sink = tap.sink();
    let root = engine.add_node(tap);

    engine.connect(dry, 0, ramp).unwrap();
    engine.connect(wet, 0, ramp).unwrap();
    engine.connect(mix, 0, dry).unwrap();
    engine.connect(mix, 1, wet).unwrap();
    engine.connect(root, 0, mix).unwrap();
    engine.attach(root).unwrap();

    println!(
        "ramp convergence count: {}",
        engine.convergence_count(ramp).unwrap()
    );

    for tick in 0..5 {
        let ok = engine.render(0.01);
        let captured = sink.lock().unwrap();
        println!(
            "tick {tick}: ok={ok} samples={} first={:.4} time={:.3}",
            captured.len(),
            captured.first().copied().unwrap_or(0.0),
            engine.process_time(root).unwrap(),
        );
    }
}
