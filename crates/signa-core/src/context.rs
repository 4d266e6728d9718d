//! Render context passed to node callbacks.
//!
//! Nodes do not hold engine references; everything a `render` implementation
//! may observe (sample geometry, process clock, bound input spans, the
//! output span) is borrowed into a [`RenderContext`] for the duration of
//! the call.

use core::cell::Cell;

use crate::engine::Engine;
use crate::format::SampleFormat;
use crate::node::NodeId;
use crate::process::Process;

/// Borrowed view of the engine handed to [`Node::render`](crate::Node::render).
pub struct RenderContext<'a> {
    engine: &'a Engine,
    process: &'a Process,
    node: NodeId,
    additive: bool,
}

impl<'a> RenderContext<'a> {
    pub(crate) fn new(
        engine: &'a Engine,
        process: &'a Process,
        node: NodeId,
        additive: bool,
    ) -> Self {
        Self {
            engine,
            process,
            node,
            additive,
        }
    }

    /// Number of frames in this tick: `round(sample_rate × dt)`.
    pub fn sample_count(&self) -> usize {
        let n = libm::roundf(self.sample_rate() as f32 * self.dt());
        if n > 0.0 { n as usize } else { 0 }
    }

    /// Samples per frame for the current format.
    #[inline]
    pub fn sample_size(&self) -> usize {
        self.sample_format().sample_size()
    }

    /// Sample rate of the current branch.
    #[inline]
    pub fn sample_rate(&self) -> u32 {
        self.process.tail().sample_rate
    }

    /// Sample format of the current branch.
    #[inline]
    pub fn sample_format(&self) -> SampleFormat {
        self.process.tail().sample_format
    }

    /// Seconds covered by this tick.
    #[inline]
    pub fn dt(&self) -> f32 {
        self.process.dt
    }

    /// Normalized process time in `[0, 1)`.
    #[inline]
    pub fn time(&self) -> f32 {
        self.process.time
    }

    /// Process phase in `[0, 2π)`.
    #[inline]
    pub fn omega(&self) -> f32 {
        self.process.omega
    }

    /// Duration of one frame in seconds.
    pub fn sample_time(&self) -> f32 {
        1.0 / self.sample_rate() as f32
    }

    /// Phase increment of one frame at unit frequency.
    pub fn sample_omega(&self) -> f32 {
        core::f32::consts::TAU / self.sample_rate() as f32
    }

    /// Whether the node must mix into the output instead of replacing it.
    #[inline]
    pub fn additive(&self) -> bool {
        self.additive
    }

    /// Gain accumulated over the converged branches.
    #[inline]
    pub fn gain(&self) -> f32 {
        self.process.tail().gain
    }

    /// Bias accumulated over the converged branches.
    #[inline]
    pub fn bias(&self) -> f32 {
        self.process.tail().bias
    }

    /// Number of input gates on the node being rendered.
    pub fn input_count(&self) -> usize {
        self.engine.slot(self.node).gates.len()
    }

    /// The node's output span for this tick, sized to
    /// `sample_count × sample_size`.
    ///
    /// The first input gate is typically bound to this very span (the branch
    /// return vector doubles as the accumulator), which is why spans are
    /// `Cell` slices.
    pub fn output(&self) -> &'a [Cell<f32>] {
        let Some(vector) = self.process.tail().return_vector else {
            return &[];
        };
        let Some(span) = self.engine.vector_span(vector) else {
            return &[];
        };
        let wanted = self.sample_count() * self.sample_size();
        &span[..wanted.min(span.len())]
    }

    /// The span bound to input gate `gate`, or `None` when the gate is
    /// unconnected, disabled, or its source has not produced output.
    pub fn input(&self, gate: usize) -> Option<&'a [Cell<f32>]> {
        let g = self.engine.slot(self.node).gates.get(gate)?;
        if !g.enabled {
            return None;
        }
        let span = self.engine.vector_span(g.bound?)?;
        let wanted = self.sample_count() * self.sample_size();
        Some(&span[..wanted.min(span.len())])
    }
}
