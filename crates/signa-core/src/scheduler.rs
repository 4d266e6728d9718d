//! Render scheduler: per-tick descent, forking, and the sync pass.
//!
//! `render(dt)` advances the engine's iteration fingerprint and walks the
//! processes in attach order. Each eligible process gets one depth-first
//! descent from its root:
//!
//! - the **first** enabled child of a node is visited inline, rendering
//!   straight into the current branch's return vector (which doubles as the
//!   node's accumulator);
//! - every **subsequent** enabled child is forked into a fresh branch with
//!   its own return vector, bound into the consumer's gate afterwards;
//! - a node whose convergence count exceeds one is a **cache point**: its
//!   first consumer forks a persistent-backed branch that materializes the
//!   output once, and every consumer (the first included) copies from the
//!   cached vector, decrementing the pass counter until the cache is
//!   released;
//! - an [`accumulating`](crate::Node::accumulating) consumer has its later
//!   children forked with the additive op: gate-less children render onto
//!   the accumulator in place, children with subtrees render into scratch
//!   and are summed by the fork, and cached children are summed from their
//!   cache.
//!
//! Between processes the transient pool is rewound and the root branch
//! reset; after all processes the persistent pool's scan tail returns to
//! its head page. Borrowed spans therefore never survive the tick.

use core::mem;

use crate::context::RenderContext;
use crate::engine::Engine;
use crate::node::NodeId;
use crate::pcm;
use crate::process::{Process, ProcessState, RenderOp, ReturnFlags};
use crate::vector::{SizeRequest, VectorFlags, VectorId};

impl Engine {
    /// Runs one render tick.
    ///
    /// `dt` is added to every ready process's accumulator; processes whose
    /// accumulated `dt` is non-negative descend once and then advance their
    /// `time` and `omega` clocks (wrapping into `[0, 1)` and `[0, 2π)`).
    /// With `dt > 0` the descent also dispatches `sync` to every node it
    /// reaches.
    ///
    /// Returns `true` iff every process that ticked completed its descent
    /// without faults. A failing process keeps its accumulated `dt` and
    /// retries on the next call; its fault bits stay readable through
    /// [`Engine::process_flags`] until then.
    pub fn render(&mut self, dt: f32) -> bool {
        if self.processes.is_empty() {
            return false;
        }
        let mut op = RenderOp::RENDER;
        if dt > 0.0 {
            op |= RenderOp::SYNC;
        }
        self.fingerprint = self.fingerprint.wrapping_add(1);

        let mut ticked = 0;
        let mut succeeded = 0;
        for i in 0..self.processes.len() {
            let mut process = mem::replace(&mut self.processes[i], Process::placeholder());
            if process.state != ProcessState::Suspend {
                process.dt += dt;
                if process.dt >= 0.0 {
                    process.frame.return_flags = ReturnFlags::empty();
                    let owner = process.owner;
                    let rv =
                        self.acquire_vector(&mut process, SizeRequest::Auto, VectorFlags::empty());
                    process.frame.return_vector = rv;

                    let ok = self.descend(&mut process, owner, op).is_some();
                    if ok {
                        process.time += process.dt;
                        if process.time >= 1.0 {
                            process.time -= 1.0;
                        }
                        process.omega += process.dt * core::f32::consts::TAU;
                        if process.omega >= core::f32::consts::TAU {
                            process.omega -= core::f32::consts::TAU;
                        }
                        process.dt = 0.0;
                        succeeded += 1;
                    }

                    // fold the root branch and rewind the scratch pool for
                    // the next process
                    self.vectors
                        .clear(&mut process.frame, true, &mut self.persistent);
                    self.transient.clear();
                    ticked += 1;
                }
            }
            self.processes[i] = process;
        }
        self.persistent.rewind();
        succeeded == ticked
    }

    /// Runs the sync pass without rendering: every node reachable from a
    /// non-suspended process root receives `sync(dt)` exactly once, children
    /// before parents, in gate order. No vectors are allocated. Does
    /// nothing when `dt <= 0`.
    pub fn sync(&mut self, dt: f32) -> bool {
        if dt <= 0.0 {
            return true;
        }
        self.fingerprint = self.fingerprint.wrapping_add(1);
        for i in 0..self.processes.len() {
            let mut process = mem::replace(&mut self.processes[i], Process::placeholder());
            if process.state != ProcessState::Suspend {
                self.sync_walk(process.owner, dt);
                process.dt += dt;
            }
            self.processes[i] = process;
        }
        true
    }

    /// Depth-first descent over `target`, returning the vector holding its
    /// output, or `None` on any fault.
    pub(crate) fn descend(
        &mut self,
        process: &mut Process,
        target: NodeId,
        op: RenderOp,
    ) -> Option<VectorId> {
        let convergence = self.slot(target).convergence;
        if convergence > 1 {
            // multiply referenced: fork a caching branch. The count is
            // negated while the fork descends back into this node so the
            // self-visit takes the ordinary path below.
            self.slot_mut(target).convergence = -convergence;
            let result = self.fork(process, target, op | RenderOp::COPY, true);
            self.slot_mut(target).convergence = convergence;
            return result;
        }
        if self.slot(target).stamp == self.fingerprint {
            // already computed this tick
            return self.slot(target).output;
        }

        let return_vector = process.tail().return_vector;
        {
            let slot = self.slot_mut(target);
            slot.output = return_vector;
            slot.pass = convergence.abs();
        }

        // visit children in gate order: first inline, the rest forked. An
        // accumulating consumer has its later children mixed onto the first
        // one's output instead of bound to vectors of their own.
        let accumulating = self
            .slot(target)
            .behavior
            .as_ref()
            .is_some_and(|b| b.accumulating());
        let gate_count = self.slot(target).gates.len();
        let mut visited = 0;
        let mut succeeded = 0;
        for g in 0..gate_count {
            let (enabled, source) = {
                let gate = &self.slot(target).gates[g];
                (gate.enabled, gate.source)
            };
            if !enabled {
                continue;
            }
            let Some(source) = source else {
                continue;
            };
            let source_vector = if visited == 0 {
                self.descend(process, source, op)
            } else if accumulating {
                self.fork(process, source, op | RenderOp::MIX, false)
            } else {
                self.fork(process, source, op, false)
            };
            if let Some(v) = source_vector {
                self.slot_mut(target).gates[g].bound = Some(v);
                succeeded += 1;
            }
            visited += 1;
        }
        if succeeded != visited {
            return None;
        }

        if op.contains(RenderOp::SYNC) {
            let dt = process.dt;
            self.invoke_sync(target, dt);
        }

        let mut render_ok = true;
        if op.contains(RenderOp::RENDER) {
            if let Some(rv) = process.tail().return_vector {
                if self.realize_vector(process, rv).is_err() {
                    process.tail_mut().return_flags |= ReturnFlags::ALLOC_FAULT;
                }
            }
            if process.tail().return_flags.is_empty() {
                render_ok = self.invoke_render(process, target, op.contains(RenderOp::MIX));
                if !render_ok {
                    process.tail_mut().return_flags |= ReturnFlags::RENDER_FAULT;
                }
            }
            if process.tail().return_vector.is_none() {
                process.tail_mut().return_flags |= ReturnFlags::RETURN_FAULT;
            }
        }

        if render_ok && process.tail().return_flags.is_empty() {
            self.slot_mut(target).stamp = self.fingerprint;
            process.tail().return_vector
        } else {
            None
        }
    }

    /// Forks a subordinate branch that renders `target` and folds the
    /// result back into the calling branch.
    ///
    /// With `cache_point` set, the branch's return vector is the node's
    /// cached output when it is current, or a freshly acquired
    /// persistent-backed vector otherwise; a successful fork then consumes
    /// one render pass, releasing the cache once every consumer has read
    /// it.
    ///
    /// An additive fork (`MIX` without `COPY`) of a gate-less target skips
    /// the scratch vector entirely: the branch keeps the calling branch's
    /// return vector and the leaf renders onto it in place. Targets with
    /// gates render into their own vector, which the fork then sums onto
    /// the caller's; when both `MIX` and `COPY` are set (a cache read under
    /// an accumulating consumer) the mix wins.
    pub(crate) fn fork(
        &mut self,
        process: &mut Process,
        target: NodeId,
        op: RenderOp,
        cache_point: bool,
    ) -> Option<VectorId> {
        let return_vector = process.tail().return_vector;

        let in_place = op.contains(RenderOp::MIX)
            && !op.contains(RenderOp::COPY)
            && self.slot(target).gates.is_empty();

        let forward = if !op.contains(RenderOp::RENDER) || in_place {
            return_vector
        } else {
            let cached = if cache_point {
                let slot = self.slot(target);
                if slot.stamp == self.fingerprint {
                    slot.output
                } else {
                    None
                }
            } else {
                None
            };
            match cached {
                Some(v) => Some(v),
                None => {
                    let flags = if cache_point {
                        VectorFlags::PERSIST
                    } else {
                        VectorFlags::empty()
                    };
                    self.acquire_vector(process, SizeRequest::Auto, flags)
                }
            }
        };

        process.push_branch(forward);
        let nested = if in_place {
            op & (RenderOp::RENDER | RenderOp::SYNC | RenderOp::MIX)
        } else {
            op & (RenderOp::RENDER | RenderOp::SYNC)
        };
        let source = self.descend(process, target, nested);
        self.pop_branch(process);

        let source = source?;
        if !op.contains(RenderOp::RENDER) {
            return return_vector;
        }

        let result = if return_vector == Some(source) {
            source
        } else if op.intersects(RenderOp::COPY | RenderOp::MIX) {
            // transfer the subordinate result onto this branch's vector
            let rv = return_vector?;
            if self.realize_vector(process, rv).is_err() {
                process.tail_mut().return_flags |= ReturnFlags::ALLOC_FAULT;
                return None;
            }
            let count = self.tick_samples(process);
            let (Some(dst), Some(src)) = (self.vector_span(rv), self.vector_span(source))
            else {
                return None;
            };
            let n = count.min(dst.len()).min(src.len());
            if op.contains(RenderOp::MIX) {
                pcm::add(&dst[..n], &src[..n]);
            } else {
                pcm::copy(&dst[..n], &src[..n]);
            }
            rv
        } else {
            // rebind: the subordinate vector becomes this branch's result
            source
        };

        if cache_point {
            let release = {
                let slot = self.slot_mut(target);
                if slot.output.is_some() && slot.pass > 0 {
                    slot.pass -= 1;
                    if slot.pass == 0 { slot.output.take() } else { None }
                } else {
                    None
                }
            };
            if let Some(cached) = release {
                self.release_vector(process, cached, true);
            }
        }

        Some(result)
    }

    /// Recursive half of the sync pass; the fingerprint stamp keeps shared
    /// subtrees from being synced once per path.
    fn sync_walk(&mut self, node: NodeId, dt: f32) {
        if self.slot(node).stamp == self.fingerprint {
            return;
        }
        self.slot_mut(node).stamp = self.fingerprint;
        let gate_count = self.slot(node).gates.len();
        for g in 0..gate_count {
            if let Some(source) = self.slot(node).gates[g].source {
                self.sync_walk(source, dt);
            }
        }
        self.invoke_sync(node, dt);
    }

    // --- Internal helpers ---

    /// Samples needed by one tick of `process`: `round(rate × dt) × size`.
    pub(crate) fn tick_samples(&self, process: &Process) -> usize {
        let frames = libm::roundf(process.tail().sample_rate as f32 * process.dt);
        let frames = if frames > 0.0 { frames as usize } else { 0 };
        frames * process.tail().sample_format.sample_size()
    }

    fn realize_vector(
        &mut self,
        process: &Process,
        vector: VectorId,
    ) -> Result<(), crate::EngineError> {
        let auto = self.tick_samples(process);
        let result = self.vectors.data_immediate(
            vector,
            auto,
            &mut self.transient,
            &mut self.persistent,
        );
        #[cfg(feature = "tracing")]
        if let Err(error) = &result {
            tracing::warn!(vector = vector.index(), %error, "vector realization failed");
        }
        result
    }

    fn invoke_render(&mut self, process: &Process, target: NodeId, additive: bool) -> bool {
        let Some(mut behavior) = self.slot_mut(target).behavior.take() else {
            return false;
        };
        let ok = {
            let ctx = RenderContext::new(self, process, target, additive);
            behavior.render(&ctx)
        };
        self.slot_mut(target).behavior = Some(behavior);
        ok
    }

    fn invoke_sync(&mut self, target: NodeId, dt: f32) {
        if let Some(mut behavior) = self.slot_mut(target).behavior.take() {
            behavior.sync(dt);
            self.slot_mut(target).behavior = Some(behavior);
        }
    }

    fn pop_branch(&mut self, process: &mut Process) {
        // release the branch's scratch vectors before folding the frame
        self.vectors
            .clear(process.tail_mut(), true, &mut self.persistent);
        process.pop_branch();
    }

    fn release_vector(&mut self, process: &mut Process, vector: VectorId, force: bool) {
        self.vectors
            .release(process.tail_mut(), vector, force, &mut self.persistent);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Engine;
    use crate::nodes::{Gain, Mixer, Tap};
    use crate::pcm;
    use crate::Node;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Leaf that fills its output with a constant and counts render calls.
    struct Source {
        value: f32,
        renders: Arc<AtomicUsize>,
        syncs: Arc<AtomicUsize>,
    }

    impl Source {
        fn new(value: f32) -> Self {
            Self {
                value,
                renders: Arc::new(AtomicUsize::new(0)),
                syncs: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    impl Node for Source {
        fn render(&mut self, ctx: &crate::RenderContext<'_>) -> bool {
            self.renders.fetch_add(1, Ordering::Relaxed);
            if ctx.additive() {
                pcm::accumulate(ctx.output(), self.value);
            } else {
                pcm::fill(ctx.output(), self.value);
            }
            true
        }

        fn sync(&mut self, _dt: f32) {
            self.syncs.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Node whose render always fails.
    struct Broken;

    impl Node for Broken {
        fn render(&mut self, _ctx: &crate::RenderContext<'_>) -> bool {
            false
        }
    }

    const DT: f32 = 0.01; // 480 frames at 48 kHz

    #[test]
    fn test_single_source_renders_constant() {
        let mut engine = Engine::new();
        let src = engine.add_node(Source::new(1.5));
        let tap = Tap::new();
        let sink = tap.sink();
        let root = engine.add_node(tap);
        engine.connect(root, 0, src).unwrap();
        engine.attach(root).unwrap();

        assert!(engine.render(DT));
        let captured = sink.lock().unwrap();
        assert_eq!(captured.len(), 480);
        assert!(captured.iter().all(|&s| s == 1.5));
    }

    #[test]
    fn test_render_with_no_processes_is_false() {
        let mut engine = Engine::new();
        assert!(!engine.render(DT));
    }

    #[test]
    fn test_fingerprint_marks_rendered_nodes() {
        let mut engine = Engine::new();
        let src = engine.add_node(Source::new(1.0));
        let root = engine.add_node(Gain::new(1.0));
        engine.connect(root, 0, src).unwrap();
        engine.attach(root).unwrap();

        assert!(engine.render(DT));
        assert_eq!(engine.slot(src).stamp, engine.fingerprint);
        assert_eq!(engine.slot(root).stamp, engine.fingerprint);
    }

    #[test]
    fn test_two_identical_ticks_are_bitwise_equal() {
        let mut engine = Engine::new();
        let src = engine.add_node(Source::new(0.25));
        let gain = engine.add_node(Gain::new(3.0));
        let tap = Tap::new();
        let sink = tap.sink();
        let root = engine.add_node(tap);
        engine.connect(gain, 0, src).unwrap();
        engine.connect(root, 0, gain).unwrap();
        engine.attach(root).unwrap();

        assert!(engine.render(DT));
        let first = sink.lock().unwrap().clone();
        assert!(engine.render(DT));
        let second = sink.lock().unwrap().clone();
        assert_eq!(first.len(), 480);
        assert_eq!(first, second);
    }

    #[test]
    fn test_shared_node_renders_once_and_feeds_both_consumers() {
        // root <- {a, b} <- x ; x is a cache point with count 2
        let mut engine = Engine::new();
        let source = Source::new(7.0);
        let renders = source.renders.clone();
        let x = engine.add_node(source);
        let a = engine.add_node(Gain::new(1.0));
        let b = engine.add_node(Gain::new(1.0));
        let tap = Tap::new();
        let sink = tap.sink();
        let mix = engine.add_node(Mixer::new(2));
        let root = engine.add_node(tap);
        engine.connect(a, 0, x).unwrap();
        engine.connect(b, 0, x).unwrap();
        engine.connect(mix, 0, a).unwrap();
        engine.connect(mix, 1, b).unwrap();
        engine.connect(root, 0, mix).unwrap();
        engine.attach(root).unwrap();
        assert_eq!(engine.convergence_count(x), Some(2));

        assert!(engine.render(DT));
        // the cache point's render ran exactly once for two consumers
        assert_eq!(renders.load(Ordering::Relaxed), 1);
        let captured = sink.lock().unwrap();
        assert!(captured.iter().all(|&s| s == 14.0));

        // the cached vector was drained and released
        assert_eq!(engine.slot(x).pass, 0);
        assert!(engine.slot(x).output.is_none());
    }

    #[test]
    fn test_cache_released_after_tick_leaves_persistent_pool_empty() {
        let mut engine = Engine::new();
        let x = engine.add_node(Source::new(1.0));
        let a = engine.add_node(Gain::new(1.0));
        let b = engine.add_node(Gain::new(1.0));
        let mix = engine.add_node(Mixer::new(2));
        engine.connect(a, 0, x).unwrap();
        engine.connect(b, 0, x).unwrap();
        engine.connect(mix, 0, a).unwrap();
        engine.connect(mix, 1, b).unwrap();
        engine.attach(mix).unwrap();

        assert!(engine.render(DT));
        assert_eq!(engine.persistent.occupied_blocks(), 0);
        assert_eq!(engine.transient.occupied(), 0);
    }

    #[test]
    fn test_render_fault_flags_process_and_retries() {
        let mut engine = Engine::new();
        let bad = engine.add_node(Broken);
        let root = engine.add_node(Gain::new(1.0));
        engine.connect(root, 0, bad).unwrap();
        engine.attach(root).unwrap();

        assert!(!engine.render(DT));
        let flags = engine.process_flags(root).unwrap();
        assert!(flags.contains(ReturnFlags::RENDER_FAULT));
        // dt is retained for the retry
        assert!(engine.process(root).unwrap().dt > 0.0);
    }

    #[test]
    fn test_failing_process_does_not_break_others() {
        let mut engine = Engine::new();
        let bad = engine.add_node(Broken);
        let bad_root = engine.add_node(Gain::new(1.0));
        engine.connect(bad_root, 0, bad).unwrap();

        let src = engine.add_node(Source::new(2.0));
        let tap = Tap::new();
        let sink = tap.sink();
        let good_root = engine.add_node(tap);
        engine.connect(good_root, 0, src).unwrap();

        engine.attach(bad_root).unwrap();
        engine.attach(good_root).unwrap();

        assert!(!engine.render(DT));
        assert!(engine
            .process_flags(bad_root)
            .unwrap()
            .contains(ReturnFlags::RENDER_FAULT));
        assert!(engine.process_flags(good_root).unwrap().is_empty());
        assert!(sink.lock().unwrap().iter().all(|&s| s == 2.0));
    }

    #[test]
    fn test_oversized_tick_sets_alloc_fault() {
        // dt = 1.0 at 48 kHz wants 48_000 samples > one page
        let mut engine = Engine::new();
        let src = engine.add_node(Source::new(1.0));
        let root = engine.add_node(Gain::new(1.0));
        engine.connect(root, 0, src).unwrap();
        engine.attach(root).unwrap();

        assert!(!engine.render(1.0));
        assert!(engine
            .process_flags(root)
            .unwrap()
            .contains(ReturnFlags::ALLOC_FAULT));

        // other processes keep working on subsequent ticks
        let src2 = engine.add_node(Source::new(1.0));
        let root2 = engine.add_node(Gain::new(1.0));
        engine.connect(root2, 0, src2).unwrap();
        engine.attach(root2).unwrap();
        engine.render(DT);
        assert!(engine.process_flags(root2).unwrap().is_empty());
    }

    #[test]
    fn test_suspended_process_is_skipped() {
        let mut engine = Engine::new();
        let source = Source::new(1.0);
        let renders = source.renders.clone();
        let src = engine.add_node(source);
        let root = engine.add_node(Gain::new(1.0));
        engine.connect(root, 0, src).unwrap();
        engine.attach(root).unwrap();
        engine.suspend(root).unwrap();

        // no eligible process ticked: vacuously successful
        assert!(engine.render(DT));
        assert_eq!(renders.load(Ordering::Relaxed), 0);

        engine.resume(root).unwrap();
        assert!(engine.render(DT));
        assert_eq!(renders.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_time_and_omega_wrap() {
        let mut engine = Engine::new();
        let src = engine.add_node(Source::new(1.0));
        let root = engine.add_node(Gain::new(1.0));
        engine.connect(root, 0, src).unwrap();
        engine.attach(root).unwrap();

        for _ in 0..150 {
            assert!(engine.render(DT));
        }
        let time = engine.process_time(root).unwrap();
        let omega = engine.process_omega(root).unwrap();
        assert!((0.0..1.0).contains(&time));
        assert!((0.0..core::f32::consts::TAU).contains(&omega));
        // 150 ticks of 0.01 → 1.5 seconds, wrapped once
        assert!((time - 0.5).abs() < 1e-3);
    }

    #[test]
    fn test_sync_pass_runs_once_per_node() {
        let mut engine = Engine::new();
        let source = Source::new(1.0);
        let syncs = source.syncs.clone();
        let x = engine.add_node(source);
        let a = engine.add_node(Gain::new(1.0));
        let b = engine.add_node(Gain::new(1.0));
        let mix = engine.add_node(Mixer::new(2));
        engine.connect(a, 0, x).unwrap();
        engine.connect(b, 0, x).unwrap();
        engine.connect(mix, 0, a).unwrap();
        engine.connect(mix, 1, b).unwrap();
        engine.attach(mix).unwrap();

        assert!(engine.sync(DT));
        assert_eq!(syncs.load(Ordering::Relaxed), 1);
        assert!(engine.sync(0.0)); // no-op
        assert_eq!(syncs.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_render_with_positive_dt_also_syncs() {
        let mut engine = Engine::new();
        let source = Source::new(1.0);
        let syncs = source.syncs.clone();
        let src = engine.add_node(source);
        let root = engine.add_node(Gain::new(1.0));
        engine.connect(root, 0, src).unwrap();
        engine.attach(root).unwrap();

        assert!(engine.render(DT));
        assert_eq!(syncs.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_disabled_gate_is_skipped() {
        let mut engine = Engine::new();
        let loud = engine.add_node(Source::new(5.0));
        let quiet = engine.add_node(Source::new(0.5));
        let tap = Tap::new();
        let sink = tap.sink();
        let mix = engine.add_node(Mixer::new(2));
        let root = engine.add_node(tap);
        engine.connect(mix, 0, loud).unwrap();
        engine.connect(mix, 1, quiet).unwrap();
        engine.connect(root, 0, mix).unwrap();
        engine.set_gate_enabled(mix, 0, false).unwrap();
        engine.attach(root).unwrap();

        assert!(engine.render(DT));
        assert!(sink.lock().unwrap().iter().all(|&s| s == 0.5));
    }

    #[test]
    fn test_zero_dt_tick_is_empty_but_clean() {
        let mut engine = Engine::new();
        let src = engine.add_node(Source::new(1.0));
        let tap = Tap::new();
        let sink = tap.sink();
        let root = engine.add_node(tap);
        engine.connect(root, 0, src).unwrap();
        engine.attach(root).unwrap();

        assert!(engine.render(0.0));
        assert!(sink.lock().unwrap().is_empty());
        assert!(engine.process_flags(root).unwrap().is_empty());
    }

    #[test]
    fn test_processes_do_not_alias_rewound_scratch() {
        // process 1 leaves a released slot behind; process 2 re-acquires
        // that slot after the pool rewind and must get fresh memory, not
        // the recycled span, or its scratch fork would clobber it
        let mut engine = Engine::new();
        let src_a = engine.add_node(Source::new(1.0));
        let r1 = engine.add_node(Gain::new(1.0));
        engine.connect(r1, 0, src_a).unwrap();

        let src_b = engine.add_node(Source::new(2.0));
        let src_c = engine.add_node(Source::new(4.0));
        let gain_c = engine.add_node(Gain::new(1.0));
        let mix = engine.add_node(Mixer::new(2));
        let tap = Tap::new();
        let sink = tap.sink();
        let r2 = engine.add_node(tap);
        engine.connect(mix, 0, src_b).unwrap();
        engine.connect(gain_c, 0, src_c).unwrap();
        engine.connect(mix, 1, gain_c).unwrap();
        engine.connect(r2, 0, mix).unwrap();

        engine.attach(r1).unwrap();
        engine.attach(r2).unwrap();

        assert!(engine.render(DT));
        // 2 + 4, not the doubled 8 an aliased accumulator would produce
        assert!(sink.lock().unwrap().iter().all(|&s| s == 6.0));
    }

    #[test]
    fn test_additive_fork_renders_leaves_in_place() {
        /// Leaf that records how many of its renders were additive.
        struct Probe {
            value: f32,
            additive: Arc<AtomicUsize>,
        }

        impl Node for Probe {
            fn render(&mut self, ctx: &crate::RenderContext<'_>) -> bool {
                if ctx.additive() {
                    self.additive.fetch_add(1, Ordering::Relaxed);
                    pcm::accumulate(ctx.output(), self.value);
                } else {
                    pcm::fill(ctx.output(), self.value);
                }
                true
            }
        }

        let mut engine = Engine::new();
        let additive = Arc::new(AtomicUsize::new(0));
        let probe = |value| Probe {
            value,
            additive: additive.clone(),
        };
        let first = engine.add_node(probe(1.0));
        let second = engine.add_node(probe(2.0));
        let third = engine.add_node(probe(4.0));
        let mix = engine.add_node(Mixer::new(3));
        let tap = Tap::new();
        let sink = tap.sink();
        let root = engine.add_node(tap);
        engine.connect(mix, 0, first).unwrap();
        engine.connect(mix, 1, second).unwrap();
        engine.connect(mix, 2, third).unwrap();
        engine.connect(root, 0, mix).unwrap();
        engine.attach(root).unwrap();

        assert!(engine.render(DT));
        assert!(sink.lock().unwrap().iter().all(|&s| s == 7.0));
        // the first input initializes the accumulator; the other two
        // render additively onto it in place
        assert_eq!(additive.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_transient_occupancy_restored_after_tick() {
        let mut engine = Engine::new();
        let src = engine.add_node(Source::new(1.0));
        let root = engine.add_node(Gain::new(1.0));
        engine.connect(root, 0, src).unwrap();
        engine.attach(root).unwrap();

        let before = engine.transient.occupied();
        assert!(engine.render(DT));
        assert_eq!(engine.transient.occupied(), before);
    }
}
