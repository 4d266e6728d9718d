//! Node and gate model.
//!
//! A node is a unit of signal computation identified by a [`NodeId`] arena
//! handle. Its behavior lives in a boxed [`Node`] implementation; the engine
//! keeps the scheduling bookkeeping (gates, convergence count, pass counter,
//! recorded output vector, iteration stamp) alongside it in a `NodeSlot`.
//!
//! Node ids are assigned sequentially and never reused within an engine
//! instance; they stay stable across graph mutations.

#[cfg(not(feature = "std"))]
use alloc::{boxed::Box, vec::Vec};

use crate::context::RenderContext;
use crate::vector::VectorId;

/// Unique identifier for a node in the engine's arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    /// Returns the raw numeric identifier.
    #[inline]
    pub fn index(self) -> u32 {
        self.0
    }

    /// Placeholder id that never refers to a live node.
    pub(crate) fn sentinel() -> Self {
        NodeId(u32::MAX)
    }
}

/// Behavior of a node in the signal graph.
///
/// A node advertises how many input gates it has, renders one tick's worth
/// of samples into the output span of its [`RenderContext`], and may advance
/// internal state machines at the control rate through [`sync`](Node::sync).
///
/// `render` returns `false` to signal a render fault; the owning branch is
/// flagged and the ancestor descent returns invalid. Both callbacks run
/// synchronously on the engine's thread.
pub trait Node: Send {
    /// Number of input gates this node exposes.
    fn gate_count(&self) -> usize {
        0
    }

    /// True when the scheduler should mix this node's inputs for it:
    /// children after the first are forked with the additive op and summed
    /// onto the first child's output, so every gate ends up bound to the
    /// accumulated branch return vector.
    fn accumulating(&self) -> bool {
        false
    }

    /// Produces this node's output for the current tick.
    ///
    /// Inputs bound during descent are available through
    /// [`RenderContext::input`]; the destination is
    /// [`RenderContext::output`]. When [`RenderContext::additive`] is set
    /// (the scheduler requests this only of gate-less nodes forked onto an
    /// accumulating consumer) the node must mix into the output instead of
    /// replacing it.
    fn render(&mut self, ctx: &RenderContext<'_>) -> bool {
        let _ = ctx;
        true
    }

    /// Advances internal state by `dt` seconds at the control rate.
    fn sync(&mut self, dt: f32) {
        let _ = dt;
    }
}

/// A unidirectional input edge on a node.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct Gate {
    /// Upstream node, if connected.
    pub(crate) source: Option<NodeId>,
    /// Upstream output vector, resolved just-in-time during descent; valid
    /// for the duration of a single render tick.
    pub(crate) bound: Option<VectorId>,
    /// Disabled gates are skipped by the descent.
    pub(crate) enabled: bool,
}

impl Gate {
    pub(crate) fn new() -> Self {
        Self {
            source: None,
            bound: None,
            enabled: true,
        }
    }
}

/// Engine-side bookkeeping for one arena node.
pub(crate) struct NodeSlot {
    /// The node's behavior; taken out while its own callbacks run.
    pub(crate) behavior: Option<Box<dyn Node + Send>>,
    pub(crate) gates: Vec<Gate>,
    /// Number of live paths converging on this node across all attached
    /// graphs; temporarily negated while the node's cache fork is visiting
    /// it.
    pub(crate) convergence: i32,
    /// Render pass counter, initialized from `|convergence|` at descent
    /// start and decremented per consumed read.
    pub(crate) pass: i32,
    /// Output vector recorded during the current tick.
    pub(crate) output: Option<VectorId>,
    /// Iteration fingerprint of the last completed render.
    pub(crate) stamp: u64,
    /// Whether the node is owned by an attached graph.
    pub(crate) mounted: bool,
}

impl NodeSlot {
    pub(crate) fn new(behavior: Box<dyn Node + Send>) -> Self {
        let gates = (0..behavior.gate_count()).map(|_| Gate::new()).collect();
        Self {
            behavior: Some(behavior),
            gates,
            convergence: 0,
            pass: 0,
            output: None,
            stamp: 0,
            mounted: false,
        }
    }
}
