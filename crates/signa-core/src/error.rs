//! Error type for engine operations.

use crate::node::NodeId;

/// Errors that can occur during engine operations.
///
/// Render-time faults (a node's `render` returning `false`, a branch whose
/// return vector never materialized) are not errors; they are reported as
/// [`ReturnFlags`](crate::ReturnFlags) on the owning process so a failing
/// branch cannot abort the remaining processes of a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineError {
    /// The node id does not refer to a live node in this engine.
    NodeNotFound(NodeId),
    /// The gate index is out of range for the node.
    GateOutOfRange {
        /// Node whose gate list was indexed.
        node: NodeId,
        /// Offending gate index.
        gate: usize,
    },
    /// Connecting a node directly to itself is rejected.
    SelfLoop(NodeId),
    /// Convergence analysis could not complete (a cycle is reachable from
    /// the root). The graph is left unchanged.
    ConvergeFailed(NodeId),
    /// The node is already mounted in an attached graph.
    AlreadyAttached(NodeId),
    /// The node is not an attached root.
    NotAttached(NodeId),
    /// The node is mounted or referenced by another node's gate and cannot
    /// be removed.
    NodeInUse(NodeId),
    /// A pool or vector file allocation failed.
    AllocationFailed,
    /// A single allocation request exceeds one page's effective capacity.
    OversizedAllocation(usize),
    /// The vector file cannot grow any further.
    OutOfVectors,
    /// The sample rate is outside the accepted range.
    InvalidRate(u32),
}

impl core::fmt::Display for EngineError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NodeNotFound(id) => write!(f, "node {id:?} not found"),
            Self::GateOutOfRange { node, gate } => {
                write!(f, "gate {gate} out of range on node {node:?}")
            }
            Self::SelfLoop(id) => write!(f, "node {id:?} cannot feed its own gate"),
            Self::ConvergeFailed(id) => {
                write!(f, "convergence analysis failed for root {id:?} (cycle reachable)")
            }
            Self::AlreadyAttached(id) => write!(f, "node {id:?} is already attached"),
            Self::NotAttached(id) => write!(f, "node {id:?} is not an attached root"),
            Self::NodeInUse(id) => write!(f, "node {id:?} is still mounted or referenced"),
            Self::AllocationFailed => write!(f, "sample allocation failed"),
            Self::OversizedAllocation(n) => {
                write!(f, "refusing to supply {n} samples for a single vector allocation")
            }
            Self::OutOfVectors => write!(f, "vector file cannot grow further"),
            Self::InvalidRate(r) => write!(f, "sample rate {r} out of range"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for EngineError {}
