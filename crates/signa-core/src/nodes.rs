//! Built-in nodes.
//!
//! Small combinators that cover the common graph plumbing: summing fan-in,
//! scalar gain, and (with `std`) a host tap that copies its input out of the
//! engine each tick. Anything more elaborate is expected to come from the
//! host through the [`Node`] trait.

use crate::context::RenderContext;
use crate::node::Node;
use crate::pcm;

#[cfg(feature = "std")]
use std::sync::{Arc, Mutex};

/// Fan-in: sums all bound, enabled inputs into the output.
///
/// The mixer is [`accumulating`](Node::accumulating): the scheduler renders
/// its first input into the branch return vector and mixes every further
/// input onto it, so by the time `render` runs the sum is already in
/// place. Only a mixer with nothing bound still owes silence.
pub struct Mixer {
    inputs: usize,
}

impl Mixer {
    /// Creates a mixer with `inputs` gates.
    pub fn new(inputs: usize) -> Self {
        Self { inputs }
    }
}

impl Node for Mixer {
    fn gate_count(&self) -> usize {
        self.inputs
    }

    fn accumulating(&self) -> bool {
        true
    }

    fn render(&mut self, ctx: &RenderContext<'_>) -> bool {
        let connected = (0..self.inputs).any(|g| ctx.input(g).is_some());
        if !connected {
            pcm::clear(ctx.output());
        }
        true
    }
}

/// Scales its single input by a constant factor.
pub struct Gain {
    gain: f32,
}

impl Gain {
    /// Creates a gain stage with the given factor.
    pub fn new(gain: f32) -> Self {
        Self { gain }
    }

    /// Replaces the gain factor; takes effect on the next tick.
    pub fn set_gain(&mut self, gain: f32) {
        self.gain = gain;
    }
}

impl Node for Gain {
    fn gate_count(&self) -> usize {
        1
    }

    fn render(&mut self, ctx: &RenderContext<'_>) -> bool {
        let out = ctx.output();
        match ctx.input(0) {
            Some(input) => {
                for j in 0..out.len() {
                    let v = input.get(j).map_or(0.0, |c| c.get()) * self.gain;
                    out[j].set(v);
                }
            }
            None => pcm::clear(out),
        }
        true
    }
}

/// Copies its input into a shared sink each tick.
///
/// Branch vectors are recycled when the tick ends, so this is how a host
/// observes rendered samples: attach a `Tap` as (or near) the root and read
/// [`Tap::sink`] after `render` returns.
#[cfg(feature = "std")]
pub struct Tap {
    sink: Arc<Mutex<Vec<f32>>>,
}

#[cfg(feature = "std")]
impl Tap {
    /// Creates a tap with an empty sink.
    pub fn new() -> Self {
        Self {
            sink: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Shared handle to the sink; the tick's samples replace its contents
    /// on every render.
    pub fn sink(&self) -> Arc<Mutex<Vec<f32>>> {
        self.sink.clone()
    }
}

#[cfg(feature = "std")]
impl Default for Tap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "std")]
impl Node for Tap {
    fn gate_count(&self) -> usize {
        1
    }

    fn render(&mut self, ctx: &RenderContext<'_>) -> bool {
        let Ok(mut sink) = self.sink.lock() else {
            return false;
        };
        sink.clear();
        if let Some(input) = ctx.input(0) {
            sink.extend(input.iter().map(|c| c.get()));
        }
        true
    }
}
