//! Vector file: the indexed table of logical sample buffers.
//!
//! A *vector* is a handle to a sample buffer whose backing memory is
//! realized lazily: acquisition inside a branch only reserves the slot and
//! records the requested size; memory is taken from a pool the first time
//! the vector's data is needed ([`VectorFile::data_immediate`]). The size
//! cannot be speculated at acquisition time because the tick's sample count
//! is only known once the owning process's `dt` has settled.
//!
//! Slots are owned by branch frames: each frame may allocate within its
//! `[lb, ub)` range and only the top frame's range grows. Popping a branch
//! releases every non-persistent slot in its range; persistent-backed slots
//! keep their blocks until force-released.

#[cfg(not(feature = "std"))]
use alloc::{boxed::Box, vec::Vec};

use core::cell::Cell;
use core::mem;

use crate::error::EngineError;
use crate::pool::{BLOCK_SAMPLES, PersistentPool, Span, TransientPool, round_up};
use crate::process::BranchFrame;

/// Index of a vector in the vector file.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct VectorId(pub(crate) u16);

impl VectorId {
    /// Returns the raw slot index.
    #[inline]
    pub fn index(self) -> u16 {
        self.0
    }
}

/// Hard ceiling on vector file size.
pub(crate) const MAX_VECTORS: usize = 32_767;

/// Slot-table growth quantum.
pub(crate) const FILE_CHUNK: usize = 16;

bitflags::bitflags! {
    /// Acquisition flags for [`VectorFile::acquire`].
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub(crate) struct VectorFlags: u8 {
        /// Request persistent backing: the buffer survives pool rewinds
        /// until the slot is force-released.
        const PERSIST = 0x01;
    }
}

/// Requested size of a vector, settled at realization time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub(crate) enum SizeRequest {
    /// `sample_count × sample_size` of the owning tick.
    #[default]
    Auto,
    /// Explicit sample count.
    Exact(usize),
    /// Backing memory has been realized; no request pending.
    Realized,
}

/// Backing memory of a vector slot.
#[derive(Debug, Default)]
pub(crate) enum Backing {
    /// No memory attached.
    #[default]
    None,
    /// Span inside the transient pool.
    Transient(Span),
    /// Span inside the persistent pool.
    Persistent(Span),
    /// Memory owned by neither pool; forgotten on release.
    Far(Box<[Cell<f32>]>),
}

/// One entry of the vector file.
#[derive(Debug, Default)]
pub(crate) struct VectorSlot {
    pub(crate) backing: Backing,
    /// Capacity of the backing memory in samples.
    pub(crate) capacity: usize,
    pub(crate) requested: SizeRequest,
    pub(crate) requested_persist: bool,
    pub(crate) used: bool,
    /// Set while the backing comes from the persistent pool.
    pub(crate) keep: bool,
}

/// Growable table of vector slots.
pub struct VectorFile {
    slots: Vec<VectorSlot>,
}

impl VectorFile {
    pub(crate) fn new() -> Self {
        Self { slots: Vec::new() }
    }

    /// Number of slots currently in the file.
    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    /// Grows the slot table to hold at least `count` slots, rounded up to
    /// the chunk quantum. Returns `false` once the file hits its ceiling.
    pub(crate) fn reserve(&mut self, count: usize) -> bool {
        if count <= self.slots.len() {
            return true;
        }
        if count > MAX_VECTORS {
            return false;
        }
        let target = round_up(count, FILE_CHUNK).min(MAX_VECTORS);
        self.slots.resize_with(target, VectorSlot::default);
        true
    }

    /// Acquires an unused slot inside the frame's assignment range.
    ///
    /// Reuses the first free slot in `[lb, ub)`; otherwise takes the slot at
    /// `ub` (growing the file as needed) and advances `ub`.
    pub(crate) fn acquire(
        &mut self,
        frame: &mut BranchFrame,
        size: SizeRequest,
        flags: VectorFlags,
    ) -> Result<VectorId, EngineError> {
        let lb = frame.assign_lb as usize;
        let ub = frame.assign_ub as usize;
        let mut index = lb;
        while index < ub {
            if !self.slots[index].used {
                break;
            }
            index += 1;
        }
        if index >= self.slots.len() && !self.reserve(index + 1) {
            return Err(EngineError::OutOfVectors);
        }
        let slot = &mut self.slots[index];
        slot.requested = size;
        slot.requested_persist = flags.contains(VectorFlags::PERSIST);
        slot.used = true;
        if index == ub {
            frame.assign_ub = (index + 1) as u16;
        }
        Ok(VectorId(index as u16))
    }

    /// Releases a slot.
    ///
    /// Far memory is forgotten outright, and so is transient backing: the
    /// pool rewind recycles transient memory wholesale, so a span retained
    /// past its release would alias the next epoch's allocations.
    /// Persistent backing is returned to its pool only when
    /// `force_persist` is set. Releasing a free slot is a no-op.
    pub(crate) fn release(
        &mut self,
        frame: &mut BranchFrame,
        index: VectorId,
        force_persist: bool,
        persistent: &mut PersistentPool,
    ) {
        let i = index.0 as usize;
        let Some(slot) = self.slots.get_mut(i) else {
            return;
        };
        let mut forget = false;
        let mut persist_release = None;
        match &slot.backing {
            Backing::Far(_) | Backing::Transient(_) => forget = true,
            Backing::Persistent(span) if slot.keep && force_persist => {
                persist_release = Some(*span);
            }
            _ => {}
        }
        if forget {
            slot.backing = Backing::None;
            slot.capacity = 0;
        }
        if let Some(span) = persist_release {
            persistent.release(span);
            slot.backing = Backing::None;
            slot.capacity = 0;
            slot.keep = false;
        }
        slot.used = false;
        if frame.assign_ub as usize == i + 1 {
            frame.assign_ub = i as u16;
        }
    }

    /// Walks the frame's assignment range top-down, releasing every
    /// non-persistent in-use slot. With `reset`, the frame's `ub` collapses
    /// back to `lb`.
    pub(crate) fn clear(
        &mut self,
        frame: &mut BranchFrame,
        reset: bool,
        persistent: &mut PersistentPool,
    ) {
        let lb = frame.assign_lb as usize;
        let mut i = frame.assign_ub as usize;
        while i > lb {
            i -= 1;
            if self.slots[i].used && !self.slots[i].keep {
                self.release(frame, VectorId(i as u16), true, persistent);
            }
        }
        if reset {
            frame.assign_ub = frame.assign_lb;
        }
    }

    /// Realizes backing memory for a slot.
    ///
    /// `auto_samples` is the size an auto-sized vector resolves to
    /// (`sample_count × sample_size` of the current tick), rounded up to the
    /// block quantum. A persistence request reuses existing persistent
    /// backing when it is large enough; every other request re-acquires
    /// from its pool. Transient spans are never carried across a release:
    /// the rewound pool would hand the same memory out again.
    pub(crate) fn data_immediate(
        &mut self,
        index: VectorId,
        auto_samples: usize,
        transient: &mut TransientPool,
        persistent: &mut PersistentPool,
    ) -> Result<(), EngineError> {
        let i = index.0 as usize;
        let slot = &mut self.slots[i];
        let required = match slot.requested {
            SizeRequest::Realized => return Ok(()),
            SizeRequest::Auto => round_up(auto_samples, BLOCK_SAMPLES),
            SizeRequest::Exact(n) => n,
        };

        let persist = slot.requested_persist;
        let reusable = persist
            && slot.keep
            && slot.capacity >= required
            && matches!(slot.backing, Backing::Persistent(_));
        if reusable {
            slot.requested = SizeRequest::Realized;
            slot.requested_persist = false;
            return Ok(());
        }

        // drop whatever backing cannot serve the request
        match mem::take(&mut slot.backing) {
            Backing::Persistent(span) if slot.keep => persistent.release(span),
            Backing::Transient(span) => transient.release(span),
            _ => {}
        }
        slot.capacity = 0;
        slot.keep = false;

        let span = if persist {
            persistent.acquire(required)?
        } else {
            transient.acquire(required)?
        };
        slot.capacity = span.len;
        slot.keep = persist;
        slot.backing = if persist {
            Backing::Persistent(span)
        } else {
            Backing::Transient(span)
        };
        slot.requested = SizeRequest::Realized;
        slot.requested_persist = false;
        Ok(())
    }

    /// Attaches memory owned outside both pools to a slot. Far memory is
    /// forgotten, not returned to a pool, when the slot is released.
    pub fn bind_far(&mut self, index: VectorId, buffer: Box<[Cell<f32>]>) {
        let slot = &mut self.slots[index.0 as usize];
        slot.capacity = buffer.len();
        slot.backing = Backing::Far(buffer);
        slot.keep = false;
        slot.requested = SizeRequest::Realized;
        slot.requested_persist = false;
    }

    /// Resolves a slot's backing memory to a sample span.
    pub(crate) fn span<'a>(
        &'a self,
        index: VectorId,
        transient: &'a TransientPool,
        persistent: &'a PersistentPool,
    ) -> Option<&'a [Cell<f32>]> {
        match &self.slots.get(index.0 as usize)?.backing {
            Backing::None => None,
            Backing::Transient(span) => Some(transient.span(*span)),
            Backing::Persistent(span) => Some(persistent.span(*span)),
            Backing::Far(buffer) => Some(&buffer[..]),
        }
    }

    #[cfg(test)]
    pub(crate) fn slot(&self, index: VectorId) -> &VectorSlot {
        &self.slots[index.0 as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::SampleFormat;
    use crate::pool::PAGE_SAMPLES;

    fn frame() -> BranchFrame {
        BranchFrame::root(SampleFormat::Pcm1, 48_000)
    }

    fn pools() -> (TransientPool, PersistentPool) {
        (TransientPool::new(), PersistentPool::new())
    }

    #[test]
    fn test_acquire_advances_ub() {
        let mut vf = VectorFile::new();
        let mut fr = frame();
        let a = vf.acquire(&mut fr, SizeRequest::Auto, VectorFlags::empty()).unwrap();
        let b = vf.acquire(&mut fr, SizeRequest::Auto, VectorFlags::empty()).unwrap();
        assert_eq!(a.index(), 0);
        assert_eq!(b.index(), 1);
        assert_eq!(fr.assign_ub, 2);
    }

    #[test]
    fn test_release_top_lowers_ub_and_reuses() {
        let mut vf = VectorFile::new();
        let (_t, mut p) = pools();
        let mut fr = frame();
        let _a = vf.acquire(&mut fr, SizeRequest::Auto, VectorFlags::empty()).unwrap();
        let b = vf.acquire(&mut fr, SizeRequest::Auto, VectorFlags::empty()).unwrap();
        vf.release(&mut fr, b, false, &mut p);
        assert_eq!(fr.assign_ub, 1);
        let c = vf.acquire(&mut fr, SizeRequest::Auto, VectorFlags::empty()).unwrap();
        assert_eq!(c, b);
    }

    #[test]
    fn test_release_in_range_hole_is_reused_first() {
        let mut vf = VectorFile::new();
        let (_t, mut p) = pools();
        let mut fr = frame();
        let a = vf.acquire(&mut fr, SizeRequest::Auto, VectorFlags::empty()).unwrap();
        let _b = vf.acquire(&mut fr, SizeRequest::Auto, VectorFlags::empty()).unwrap();
        vf.release(&mut fr, a, false, &mut p);
        assert_eq!(fr.assign_ub, 2); // hole, not the top
        let c = vf.acquire(&mut fr, SizeRequest::Auto, VectorFlags::empty()).unwrap();
        assert_eq!(c, a);
        assert_eq!(fr.assign_ub, 2);
    }

    #[test]
    fn test_double_release_is_noop() {
        let mut vf = VectorFile::new();
        let (mut t, mut p) = pools();
        let mut fr = frame();
        let a = vf.acquire(&mut fr, SizeRequest::Auto, VectorFlags::PERSIST).unwrap();
        vf.data_immediate(a, 64, &mut t, &mut p).unwrap();
        assert_eq!(p.occupied_blocks(), 1);
        vf.release(&mut fr, a, true, &mut p);
        assert_eq!(p.occupied_blocks(), 0);
        vf.release(&mut fr, a, true, &mut p);
        assert_eq!(p.occupied_blocks(), 0);
    }

    #[test]
    fn test_data_immediate_auto_rounds_to_block() {
        let mut vf = VectorFile::new();
        let (mut t, mut p) = pools();
        let mut fr = frame();
        let a = vf.acquire(&mut fr, SizeRequest::Auto, VectorFlags::empty()).unwrap();
        vf.data_immediate(a, 100, &mut t, &mut p).unwrap();
        assert_eq!(vf.slot(a).capacity, 128);
        assert!(matches!(vf.slot(a).backing, Backing::Transient(_)));
    }

    #[test]
    fn test_data_immediate_is_idempotent() {
        let mut vf = VectorFile::new();
        let (mut t, mut p) = pools();
        let mut fr = frame();
        let a = vf.acquire(&mut fr, SizeRequest::Auto, VectorFlags::empty()).unwrap();
        vf.data_immediate(a, 64, &mut t, &mut p).unwrap();
        let before = t.occupied();
        vf.data_immediate(a, 64, &mut t, &mut p).unwrap();
        assert_eq!(t.occupied(), before);
    }

    #[test]
    fn test_release_drops_transient_backing() {
        let mut vf = VectorFile::new();
        let (mut t, mut p) = pools();
        let mut fr = frame();
        let a = vf.acquire(&mut fr, SizeRequest::Auto, VectorFlags::empty()).unwrap();
        vf.data_immediate(a, 64, &mut t, &mut p).unwrap();
        assert!(matches!(vf.slot(a).backing, Backing::Transient(_)));
        vf.release(&mut fr, a, false, &mut p);
        assert!(matches!(vf.slot(a).backing, Backing::None));
        assert_eq!(vf.slot(a).capacity, 0);

        // after the pool rewinds, re-acquiring the slot realizes a fresh
        // span instead of resurrecting the recycled one
        t.clear();
        let b = vf.acquire(&mut fr, SizeRequest::Auto, VectorFlags::empty()).unwrap();
        assert_eq!(b, a);
        vf.data_immediate(b, 64, &mut t, &mut p).unwrap();
        assert_eq!(t.occupied(), 64);
        assert!(matches!(vf.slot(b).backing, Backing::Transient(_)));
    }

    #[test]
    fn test_persistence_request_takes_persistent_pool() {
        let mut vf = VectorFile::new();
        let (mut t, mut p) = pools();
        let mut fr = frame();
        let a = vf.acquire(&mut fr, SizeRequest::Exact(64), VectorFlags::PERSIST).unwrap();
        vf.data_immediate(a, 0, &mut t, &mut p).unwrap();
        assert!(matches!(vf.slot(a).backing, Backing::Persistent(_)));
        assert!(vf.slot(a).keep);
        assert_eq!(t.occupied(), 0);
    }

    #[test]
    fn test_persistent_backing_reused_across_reacquire() {
        let mut vf = VectorFile::new();
        let (mut t, mut p) = pools();
        let mut fr = frame();
        let a = vf.acquire(&mut fr, SizeRequest::Auto, VectorFlags::PERSIST).unwrap();
        vf.data_immediate(a, 64, &mut t, &mut p).unwrap();
        // non-forced release keeps the blocks; reacquire with the same
        // persistence request reuses them
        vf.release(&mut fr, a, false, &mut p);
        let b = vf.acquire(&mut fr, SizeRequest::Auto, VectorFlags::PERSIST).unwrap();
        assert_eq!(b, a);
        vf.data_immediate(b, 64, &mut t, &mut p).unwrap();
        assert_eq!(p.occupied_blocks(), 1);
    }

    #[test]
    fn test_persistence_downgrade_releases_blocks() {
        let mut vf = VectorFile::new();
        let (mut t, mut p) = pools();
        let mut fr = frame();
        let a = vf.acquire(&mut fr, SizeRequest::Auto, VectorFlags::PERSIST).unwrap();
        vf.data_immediate(a, 64, &mut t, &mut p).unwrap();
        vf.release(&mut fr, a, false, &mut p);
        let b = vf.acquire(&mut fr, SizeRequest::Auto, VectorFlags::empty()).unwrap();
        assert_eq!(b, a);
        vf.data_immediate(b, 64, &mut t, &mut p).unwrap();
        assert_eq!(p.occupied_blocks(), 0);
        assert!(matches!(vf.slot(b).backing, Backing::Transient(_)));
    }

    #[test]
    fn test_oversize_exact_fails() {
        let mut vf = VectorFile::new();
        let (mut t, mut p) = pools();
        let mut fr = frame();
        let a = vf
            .acquire(&mut fr, SizeRequest::Exact(PAGE_SAMPLES + 1), VectorFlags::empty())
            .unwrap();
        assert!(matches!(
            vf.data_immediate(a, 0, &mut t, &mut p),
            Err(EngineError::OversizedAllocation(_))
        ));
    }

    #[test]
    fn test_far_backing_is_forgotten_on_release() {
        let mut vf = VectorFile::new();
        let (_t, mut p) = pools();
        let mut fr = frame();
        let a = vf.acquire(&mut fr, SizeRequest::Auto, VectorFlags::empty()).unwrap();
        let buffer: Box<[Cell<f32>]> = (0..64).map(|_| Cell::new(1.0)).collect();
        vf.bind_far(a, buffer);
        assert_eq!(vf.slot(a).capacity, 64);
        vf.release(&mut fr, a, false, &mut p);
        assert!(matches!(vf.slot(a).backing, Backing::None));
        assert_eq!(vf.slot(a).capacity, 0);
    }

    #[test]
    fn test_clear_retains_persistent_slots() {
        let mut vf = VectorFile::new();
        let (mut t, mut p) = pools();
        let mut fr = frame();
        let keep = vf.acquire(&mut fr, SizeRequest::Auto, VectorFlags::PERSIST).unwrap();
        let scratch = vf.acquire(&mut fr, SizeRequest::Auto, VectorFlags::empty()).unwrap();
        vf.data_immediate(keep, 64, &mut t, &mut p).unwrap();
        vf.data_immediate(scratch, 64, &mut t, &mut p).unwrap();
        vf.clear(&mut fr, true, &mut p);
        assert_eq!(fr.assign_ub, fr.assign_lb);
        assert!(vf.slot(keep).used); // persistent slot survives the branch
        assert!(!vf.slot(scratch).used);
        assert_eq!(p.occupied_blocks(), 1);
    }

    #[test]
    fn test_reserve_caps_at_max() {
        let mut vf = VectorFile::new();
        assert!(vf.reserve(FILE_CHUNK));
        assert_eq!(vf.len(), FILE_CHUNK);
        assert!(!vf.reserve(MAX_VECTORS + 1));
    }
}
