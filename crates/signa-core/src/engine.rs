//! The engine: node arena, graph manager, and public surface.
//!
//! The engine owns everything: the node arena, the attached-root list, the
//! per-root processes, both sample pools, and the vector file. Nodes are
//! inserted into the arena first, wired together through their gates, and a
//! chosen root is then [`attach`](Engine::attach)ed, which runs convergence
//! analysis and creates the root's render process.
//!
//! # Convergence
//!
//! At attach time every node reachable from the new root is assigned a
//! *convergence count*: the number of distinct paths that terminate at it,
//! counted across the new tree and every already-attached root. A node
//! reached by two or more paths becomes a **cache point**: the scheduler
//! materializes its output once per tick and copies it to each consumer.
//! The analysis is quadratic in graph size by design: graphs are small and
//! the counts are recomputed only at attach/detach, leaving the per-tick
//! scheduler with a plain integer test.
//!
//! Borrowed sample spans never outlive a tick: whatever a node writes is
//! consumed downstream within the same descent, and hosts observe output
//! through a sink node (see [`nodes::Tap`](crate::nodes)).

#[cfg(not(feature = "std"))]
use alloc::{boxed::Box, vec::Vec};

use crate::error::EngineError;
use crate::format::SampleFormat;
use crate::node::{Node, NodeId, NodeSlot};
use crate::pool::{PersistentPool, TransientPool};
use crate::process::{Process, ProcessState, ReturnFlags};
use crate::vector::{SizeRequest, VectorFile, VectorFlags, VectorId};

/// Default sample rate new engines start with.
pub const DEFAULT_SAMPLE_RATE: u32 = 48_000;

/// Lowest accepted sample rate.
pub const MIN_SAMPLE_RATE: u32 = 256;

/// Default control rate new engines start with.
pub const DEFAULT_CONTROL_RATE: u32 = 100;

/// Signal-graph rendering engine.
///
/// Single-threaded and cooperative: `render`, `sync`, `attach`, and
/// `detach` all run on the caller's thread. Exclusive access is enforced by
/// the `&mut self` receivers, so reentrant entry is unrepresentable.
pub struct Engine {
    pub(crate) nodes: Vec<Option<NodeSlot>>,
    pub(crate) roots: Vec<NodeId>,
    pub(crate) processes: Vec<Process>,
    pub(crate) transient: TransientPool,
    pub(crate) persistent: PersistentPool,
    pub(crate) vectors: VectorFile,
    pub(crate) sample_format: SampleFormat,
    pub(crate) sample_rate: u32,
    pub(crate) control_rate: u32,
    /// Per-tick iteration fingerprint; advances once per `render`/`sync`.
    pub(crate) fingerprint: u64,
}

impl Engine {
    /// Creates an engine with default format (PCM-1), sample rate (48 kHz),
    /// and control rate (100 Hz).
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            roots: Vec::new(),
            processes: Vec::new(),
            transient: TransientPool::new(),
            persistent: PersistentPool::new(),
            vectors: VectorFile::new(),
            sample_format: SampleFormat::Pcm1,
            sample_rate: DEFAULT_SAMPLE_RATE,
            control_rate: DEFAULT_CONTROL_RATE,
            fingerprint: 0,
        }
    }

    // --- Arena management ---

    /// Inserts a node into the arena and returns its handle.
    ///
    /// Ids are assigned sequentially and never reused.
    pub fn add_node(&mut self, node: impl Node + Send + 'static) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Some(NodeSlot::new(Box::new(node))));
        id
    }

    /// Removes a node from the arena, returning its behavior.
    ///
    /// Fails with [`EngineError::NodeInUse`] while the node is mounted in an
    /// attached graph or referenced by any gate.
    pub fn remove_node(&mut self, id: NodeId) -> Result<Box<dyn Node + Send>, EngineError> {
        let slot = self.try_slot(id)?;
        if slot.mounted || self.roots.contains(&id) {
            return Err(EngineError::NodeInUse(id));
        }
        let referenced = self.nodes.iter().flatten().any(|s| {
            s.gates.iter().any(|g| g.source == Some(id))
        });
        if referenced {
            return Err(EngineError::NodeInUse(id));
        }
        let slot = self.nodes[id.0 as usize].take();
        slot.and_then(|s| s.behavior).ok_or(EngineError::NodeNotFound(id))
    }

    /// Number of live nodes in the arena.
    pub fn node_count(&self) -> usize {
        self.nodes.iter().flatten().count()
    }

    // --- Gate wiring ---

    /// Connects `source`'s output to gate `gate` of `node`.
    ///
    /// An immediate self-edge is rejected; deeper cycles are caught at
    /// attach time.
    pub fn connect(
        &mut self,
        node: NodeId,
        gate: usize,
        source: NodeId,
    ) -> Result<(), EngineError> {
        if node == source {
            return Err(EngineError::SelfLoop(node));
        }
        self.try_slot(source)?;
        let slot = self.try_slot_mut(node)?;
        let g = slot
            .gates
            .get_mut(gate)
            .ok_or(EngineError::GateOutOfRange { node, gate })?;
        g.source = Some(source);
        g.bound = None;
        Ok(())
    }

    /// Connects `source` to the first unconnected gate of `node`,
    /// returning the gate index used. Fails with
    /// [`EngineError::GateOutOfRange`] when every gate is taken.
    pub fn connect_next(&mut self, node: NodeId, source: NodeId) -> Result<usize, EngineError> {
        if node == source {
            return Err(EngineError::SelfLoop(node));
        }
        self.try_slot(source)?;
        let slot = self.try_slot_mut(node)?;
        let taken = slot.gates.len();
        let Some(gate) = slot.gates.iter().position(|g| g.source.is_none()) else {
            return Err(EngineError::GateOutOfRange { node, gate: taken });
        };
        slot.gates[gate].source = Some(source);
        slot.gates[gate].bound = None;
        Ok(gate)
    }

    /// Disconnects gate `gate` of `node`. Disconnecting an empty gate is a
    /// no-op.
    pub fn disconnect(&mut self, node: NodeId, gate: usize) -> Result<(), EngineError> {
        let slot = self.try_slot_mut(node)?;
        let g = slot
            .gates
            .get_mut(gate)
            .ok_or(EngineError::GateOutOfRange { node, gate })?;
        g.source = None;
        g.bound = None;
        Ok(())
    }

    /// Enables or disables a gate; disabled gates are skipped by descent.
    pub fn set_gate_enabled(
        &mut self,
        node: NodeId,
        gate: usize,
        enabled: bool,
    ) -> Result<(), EngineError> {
        let slot = self.try_slot_mut(node)?;
        let g = slot
            .gates
            .get_mut(gate)
            .ok_or(EngineError::GateOutOfRange { node, gate })?;
        g.enabled = enabled;
        Ok(())
    }

    /// Returns the node feeding gate `gate` of `node`, if any.
    pub fn gate_source(&self, node: NodeId, gate: usize) -> Option<NodeId> {
        self.try_slot(node).ok()?.gates.get(gate)?.source
    }

    // --- Attach / detach ---

    /// Converges and mounts a graph rooted at `root`, creating its process.
    ///
    /// Fails with [`EngineError::AlreadyAttached`] when the root is already
    /// mounted and [`EngineError::ConvergeFailed`] when a cycle is reachable
    /// from it; in both cases the graph is left unchanged.
    pub fn attach(&mut self, root: NodeId) -> Result<(), EngineError> {
        let slot = self.try_slot(root)?;
        if slot.mounted || self.roots.contains(&root) {
            return Err(EngineError::AlreadyAttached(root));
        }
        self.validate_acyclic(root)?;
        self.converge(root);
        self.roots.push(root);
        self.processes.push(Process::new(
            root,
            self.sample_format,
            self.sample_rate,
            self.control_rate,
        ));
        #[cfg(feature = "tracing")]
        tracing::debug!(root = root.index(), roots = self.roots.len(), "graph attached");
        Ok(())
    }

    /// Diverges and unmounts the graph rooted at `root`, freeing its
    /// process.
    pub fn detach(&mut self, root: NodeId) -> Result<(), EngineError> {
        self.try_slot(root)?;
        if !self.roots.contains(&root) {
            return Err(EngineError::NotAttached(root));
        }
        self.diverge_tree(root);
        self.roots.retain(|r| *r != root);
        self.processes.retain(|p| p.owner != root);
        #[cfg(feature = "tracing")]
        tracing::debug!(root = root.index(), roots = self.roots.len(), "graph detached");
        Ok(())
    }

    /// Membership query with the expected-value comparison of the original
    /// surface: returns `true` iff "`node` is an attached root" equals
    /// `expected`.
    pub fn is_attached(&self, node: NodeId, expected: bool) -> bool {
        self.roots.contains(&node) == expected
    }

    /// Attached roots in attach order.
    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    /// The convergence count of a node (paths terminating at it across all
    /// attached graphs), or `None` for an unknown node.
    pub fn convergence_count(&self, node: NodeId) -> Option<i32> {
        Some(self.try_slot(node).ok()?.convergence)
    }

    // --- Process control ---

    /// Marks the process owned by `root` suspended; `render` and `sync`
    /// skip it until [`resume`](Engine::resume).
    pub fn suspend(&mut self, root: NodeId) -> Result<(), EngineError> {
        self.process_mut(root)
            .map(|p| p.state = ProcessState::Suspend)
            .ok_or(EngineError::NotAttached(root))
    }

    /// Returns a suspended process to the ready state.
    pub fn resume(&mut self, root: NodeId) -> Result<(), EngineError> {
        self.process_mut(root)
            .map(|p| p.state = ProcessState::Ready)
            .ok_or(EngineError::NotAttached(root))
    }

    /// Fault flags left on the process after its most recent tick.
    pub fn process_flags(&self, root: NodeId) -> Option<ReturnFlags> {
        self.process(root).map(|p| p.frame.return_flags)
    }

    /// Normalized process time in `[0, 1)`.
    pub fn process_time(&self, root: NodeId) -> Option<f32> {
        self.process(root).map(|p| p.time)
    }

    /// Process phase in `[0, 2π)`.
    pub fn process_omega(&self, root: NodeId) -> Option<f32> {
        self.process(root).map(|p| p.omega)
    }

    // --- Format and rates ---

    /// Current sample format.
    pub fn sample_format(&self) -> SampleFormat {
        self.sample_format
    }

    /// Sets the sample format. Only the enumerated formats exist, so the
    /// setter is infallible; raw format words go through
    /// [`SampleFormat::from_bits`] first.
    pub fn set_sample_format(&mut self, format: SampleFormat) {
        self.sample_format = format;
    }

    /// Current sample rate.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Sets the sample rate; values below [`MIN_SAMPLE_RATE`] are rejected
    /// and leave the state unchanged.
    pub fn set_sample_rate(&mut self, rate: u32) -> Result<(), EngineError> {
        if rate < MIN_SAMPLE_RATE {
            return Err(EngineError::InvalidRate(rate));
        }
        self.sample_rate = rate;
        Ok(())
    }

    /// Current control rate.
    pub fn control_rate(&self) -> u32 {
        self.control_rate
    }

    /// Sets the control rate; zero is rejected.
    pub fn set_control_rate(&mut self, rate: u32) -> Result<(), EngineError> {
        if rate == 0 {
            return Err(EngineError::InvalidRate(rate));
        }
        self.control_rate = rate;
        Ok(())
    }

    // --- Internal: slot access ---

    pub(crate) fn try_slot(&self, id: NodeId) -> Result<&NodeSlot, EngineError> {
        self.nodes
            .get(id.0 as usize)
            .and_then(Option::as_ref)
            .ok_or(EngineError::NodeNotFound(id))
    }

    pub(crate) fn try_slot_mut(&mut self, id: NodeId) -> Result<&mut NodeSlot, EngineError> {
        self.nodes
            .get_mut(id.0 as usize)
            .and_then(Option::as_mut)
            .ok_or(EngineError::NodeNotFound(id))
    }

    /// Infallible slot access for validated ids on the render path.
    pub(crate) fn slot(&self, id: NodeId) -> &NodeSlot {
        self.nodes[id.0 as usize]
            .as_ref()
            .expect("stale node id on render path")
    }

    pub(crate) fn slot_mut(&mut self, id: NodeId) -> &mut NodeSlot {
        self.nodes[id.0 as usize]
            .as_mut()
            .expect("stale node id on render path")
    }

    pub(crate) fn process(&self, root: NodeId) -> Option<&Process> {
        self.processes.iter().find(|p| p.owner == root)
    }

    pub(crate) fn process_mut(&mut self, root: NodeId) -> Option<&mut Process> {
        self.processes.iter_mut().find(|p| p.owner == root)
    }

    /// Resolves a vector to its current backing span.
    pub(crate) fn vector_span(&self, vector: VectorId) -> Option<&[core::cell::Cell<f32>]> {
        self.vectors.span(vector, &self.transient, &self.persistent)
    }

    /// Acquires a vector in the current branch of `process`; failures are
    /// reported through branch flags by the caller, so this returns an
    /// `Option` like the descent itself.
    pub(crate) fn acquire_vector(
        &mut self,
        process: &mut Process,
        size: SizeRequest,
        flags: VectorFlags,
    ) -> Option<VectorId> {
        match self.vectors.acquire(process.tail_mut(), size, flags) {
            Ok(v) => Some(v),
            Err(_e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(error = %_e, "vector acquisition failed");
                None
            }
        }
    }

    // --- Internal: convergence analysis ---

    /// Counts occurrences of `needle` in the tree rooted at `tree`, one
    /// per distinct path.
    fn occurrences_in(&self, tree: NodeId, needle: NodeId) -> usize {
        if tree == needle {
            return 1;
        }
        let slot = self.slot(tree);
        let mut count = 0;
        for gate in &slot.gates {
            if let Some(child) = gate.source {
                count += self.occurrences_in(child, needle);
            }
        }
        count
    }

    /// Counts occurrences of `needle` across every attached root.
    fn occurrences_global(&self, needle: NodeId) -> usize {
        self.roots
            .iter()
            .map(|&root| self.occurrences_in(root, needle))
            .sum()
    }

    /// Rejects attachment when any cycle is reachable from `root`, before
    /// any convergence count is touched.
    fn validate_acyclic(&self, root: NodeId) -> Result<(), EngineError> {
        const ON_PATH: u8 = 1;
        const DONE: u8 = 2;

        fn visit(engine: &Engine, id: NodeId, colors: &mut [u8]) -> bool {
            match colors[id.0 as usize] {
                ON_PATH => return false,
                DONE => return true,
                _ => {}
            }
            colors[id.0 as usize] = ON_PATH;
            for gate in &engine.slot(id).gates {
                if let Some(child) = gate.source {
                    if !visit(engine, child, colors) {
                        return false;
                    }
                }
            }
            colors[id.0 as usize] = DONE;
            true
        }

        let mut colors: Vec<u8> = (0..self.nodes.len()).map(|_| 0).collect();
        if visit(self, root, &mut colors) {
            Ok(())
        } else {
            Err(EngineError::ConvergeFailed(root))
        }
    }

    /// Converges a root tree: assigns convergence counts to every reachable
    /// node and adds the engine's own reference on the root.
    fn converge(&mut self, tree: NodeId) {
        if self.roots.contains(&tree) {
            return;
        }
        self.converge_tree(tree, tree);
        self.slot_mut(tree).convergence += 1;
    }

    /// Recursive descent of `converge`: each child's reference count is the
    /// sum of its occurrences within the new tree and across the attached
    /// roots. Singly-referenced children are traversed inline; multiply
    /// referenced children become cache points, converged as their own
    /// subtrees.
    fn converge_tree(&mut self, root: NodeId, tree: NodeId) {
        let gate_count = self.slot(tree).gates.len();
        for g in 0..gate_count {
            let Some(child) = self.slot(tree).gates[g].source else {
                continue;
            };
            let references =
                self.occurrences_in(root, child) + self.occurrences_global(child);
            if references <= 1 {
                self.converge_tree(root, child);
            } else if !self.roots.contains(&child) {
                self.converge_tree(child, child);
            }
            self.slot_mut(child).convergence = references as i32;
        }
        self.acquire_node(tree);
    }

    /// Diverges a tree: decrements every reachable node's convergence count
    /// once per path; a node reaching zero is released from engine
    /// ownership.
    fn diverge_tree(&mut self, tree: NodeId) {
        let gate_count = self.slot(tree).gates.len();
        for g in 0..gate_count {
            if let Some(child) = self.slot(tree).gates[g].source {
                self.diverge_tree(child);
            }
        }
        {
            let slot = self.slot_mut(tree);
            if slot.convergence > 0 {
                slot.convergence -= 1;
            }
        }
        if self.slot(tree).convergence == 0 {
            self.release_node(tree);
        }
    }

    fn acquire_node(&mut self, id: NodeId) {
        let slot = self.slot_mut(id);
        slot.mounted = true;
        slot.output = None;
        slot.pass = 0;
    }

    fn release_node(&mut self, id: NodeId) {
        let slot = self.slot_mut(id);
        slot.convergence = 0;
        slot.pass = 0;
        slot.output = None;
        slot.mounted = false;
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}
