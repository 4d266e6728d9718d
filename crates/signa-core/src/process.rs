//! Per-process render state: branch frames and the branch stack.
//!
//! Every attached root owns a [`Process`]. The process itself is the bottom
//! frame of its branch stack; [`fork`](crate::Engine) pushes a nested
//! [`BranchFrame`] for every subordinate descent and pops it when the branch
//! folds, OR-ing the child's return flags into its parent.

#[cfg(not(feature = "std"))]
use alloc::vec::Vec;

use crate::format::SampleFormat;
use crate::node::NodeId;
use crate::vector::VectorId;

bitflags::bitflags! {
    /// Fault bits accumulated on a branch during descent.
    ///
    /// An empty set means the branch completed cleanly. Flags propagate
    /// upward when a branch is popped and are readable on the process after
    /// the tick via [`Engine::process_flags`](crate::Engine::process_flags).
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
    pub struct ReturnFlags: u8 {
        /// A branch's return vector was never materialized.
        const RETURN_FAULT = 0x01;
        /// A node's `render` callback reported failure.
        const RENDER_FAULT = 0x02;
        /// A pool or vector file allocation failed during the descent.
        const ALLOC_FAULT = 0x04;
    }
}

bitflags::bitflags! {
    /// Operation bits dispatched through a descent.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub(crate) struct RenderOp: u8 {
        const RENDER = 0x01;
        const COPY = 0x02;
        const MIX = 0x04;
        const SYNC = 0x10;
    }
}

/// Lifecycle state of a process.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ProcessState {
    /// Eligible for rendering.
    #[default]
    Ready,
    /// Currently inside a descent.
    Busy,
    /// One or more source nodes failed to return last tick.
    Wait,
    /// Skipped by `render` and `sync` until resumed.
    Suspend,
}

/// One level of a process's render stack.
///
/// A frame owns the contiguous vector-file range `[assign_lb, assign_ub)`;
/// nested frames start where their parent's range ends, and only the top
/// frame's range may grow.
#[derive(Clone, Copy, Debug)]
pub(crate) struct BranchFrame {
    pub(crate) sample_format: SampleFormat,
    pub(crate) sample_rate: u32,
    pub(crate) return_flags: ReturnFlags,
    pub(crate) return_vector: Option<VectorId>,
    pub(crate) assign_lb: u16,
    pub(crate) assign_ub: u16,
    /// Accumulated gain over the converged branches.
    pub(crate) gain: f32,
    /// Accumulated bias over the converged branches.
    pub(crate) bias: f32,
}

impl BranchFrame {
    /// Bottom frame of a process: the assignment range starts at slot 0.
    pub(crate) fn root(sample_format: SampleFormat, sample_rate: u32) -> Self {
        Self {
            sample_format,
            sample_rate,
            return_flags: ReturnFlags::empty(),
            return_vector: None,
            assign_lb: 0,
            assign_ub: 0,
            gain: 1.0,
            bias: 0.0,
        }
    }

    /// Nested frame starting where the parent's range ends.
    pub(crate) fn nested(
        sample_format: SampleFormat,
        sample_rate: u32,
        return_vector: Option<VectorId>,
        lb: u16,
    ) -> Self {
        Self {
            sample_format,
            sample_rate,
            return_flags: ReturnFlags::empty(),
            return_vector,
            assign_lb: lb,
            assign_ub: lb,
            gain: 1.0,
            bias: 0.0,
        }
    }
}

/// Per-attached-root render state.
pub(crate) struct Process {
    pub(crate) owner: NodeId,
    pub(crate) state: ProcessState,
    /// Bottom branch frame (the process is its own branch head).
    pub(crate) frame: BranchFrame,
    /// Nested branches; the tail is the last entry, or `frame` when empty.
    pub(crate) stack: Vec<BranchFrame>,
    /// Control-rate step interval in seconds; reserved for control-step
    /// scheduling.
    #[allow(dead_code)]
    pub(crate) step_latency: f32,
    /// Accumulator toward the next control step; reserved alongside
    /// `step_latency`.
    #[allow(dead_code)]
    pub(crate) step_time: f32,
    /// Time accumulated since the last completed tick.
    pub(crate) dt: f32,
    /// Normalized process time, wrapped into `[0, 1)`.
    pub(crate) time: f32,
    /// Process phase, wrapped into `[0, 2π)`.
    pub(crate) omega: f32,
}

impl Process {
    pub(crate) fn new(
        owner: NodeId,
        sample_format: SampleFormat,
        sample_rate: u32,
        control_rate: u32,
    ) -> Self {
        Self {
            owner,
            state: ProcessState::Ready,
            frame: BranchFrame::root(sample_format, sample_rate),
            stack: Vec::new(),
            step_latency: 1.0 / control_rate as f32,
            step_time: 0.0,
            dt: 0.0,
            time: 0.0,
            omega: 0.0,
        }
    }

    /// Inert stand-in used while a process is temporarily moved out of the
    /// engine's process list.
    pub(crate) fn placeholder() -> Self {
        let mut process = Self::new(NodeId::sentinel(), SampleFormat::Pcm1, 1, 1);
        process.state = ProcessState::Suspend;
        process
    }

    /// Current branch frame.
    #[inline]
    pub(crate) fn tail(&self) -> &BranchFrame {
        self.stack.last().unwrap_or(&self.frame)
    }

    /// Current branch frame, mutably.
    #[inline]
    pub(crate) fn tail_mut(&mut self) -> &mut BranchFrame {
        self.stack.last_mut().unwrap_or(&mut self.frame)
    }

    /// Pushes a nested branch whose assignment range starts at the current
    /// tail's upper bound.
    pub(crate) fn push_branch(&mut self, return_vector: Option<VectorId>) {
        let frame = BranchFrame::nested(
            self.tail().sample_format,
            self.tail().sample_rate,
            return_vector,
            self.tail().assign_ub,
        );
        self.stack.push(frame);
    }

    /// Pops the top nested branch, OR-ing its return flags into the new
    /// tail. Returns `false` when only the bottom frame remains.
    pub(crate) fn pop_branch(&mut self) -> bool {
        match self.stack.pop() {
            Some(frame) => {
                self.tail_mut().return_flags |= frame.return_flags;
                true
            }
            None => false,
        }
    }
}
