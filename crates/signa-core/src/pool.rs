//! Sample storage pools.
//!
//! Two page-based stores back the vector file:
//!
//! - [`TransientPool`]: bump-allocated scratch storage. Allocation advances
//!   a cursor on the tail page; nothing is freed individually. [`clear`]
//!   (TransientPool::clear) rewinds the whole pool between processes, so a
//!   transient span is valid for at most one descent.
//! - [`PersistentPool`]: bitmap-managed storage whose blocks survive until
//!   they are explicitly released. Each page carries a bitmap with one bit
//!   per 64-sample block; acquisition scans for the first free run.
//!
//! Pages are fixed at 128 KiB of `f32` samples. A single request larger than
//! one page is refused with [`EngineError::OversizedAllocation`]; the pools
//! serve per-tick vectors, not bulk storage.

#[cfg(not(feature = "std"))]
use alloc::{boxed::Box, vec, vec::Vec};

use core::cell::Cell;

use crate::error::EngineError;

/// Page size in bytes used by both pools.
pub const VECTOR_PAGE_BYTES: usize = 131_072;

/// Samples per page.
pub const PAGE_SAMPLES: usize = VECTOR_PAGE_BYTES / core::mem::size_of::<f32>();

/// Allocation granule in samples; every acquisition is rounded up to this.
pub const BLOCK_SAMPLES: usize = 64;

/// Bits in a persistent page's block map (one bit per block).
pub(crate) const MAP_BITS: usize = PAGE_SAMPLES / BLOCK_SAMPLES;

/// Bytes in a persistent page's block map.
pub(crate) const MAP_BYTES: usize = MAP_BITS / 8;

const _: () = assert!(PAGE_SAMPLES % BLOCK_SAMPLES == 0);
const _: () = assert!(PAGE_SAMPLES > BLOCK_SAMPLES * 2);
const _: () = assert!(MAP_BITS % 8 == 0);

/// Rounds `value` up to a multiple of `quantum`.
#[inline]
pub(crate) fn round_up(value: usize, quantum: usize) -> usize {
    value.div_ceil(quantum) * quantum
}

/// A region of samples inside one pool page.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Span {
    pub(crate) page: usize,
    pub(crate) offset: usize,
    pub(crate) len: usize,
}

fn zeroed_page() -> Box<[Cell<f32>]> {
    vec![Cell::new(0.0f32); PAGE_SAMPLES].into_boxed_slice()
}

// ---------------------------------------------------------------------------
// Transient pool
// ---------------------------------------------------------------------------

struct TransientPage {
    data: Box<[Cell<f32>]>,
    used: usize,
}

/// Bump-allocated sample store, rewound between processes.
pub struct TransientPool {
    pages: Vec<TransientPage>,
    tail: usize,
}

impl TransientPool {
    /// Creates an empty pool; the first page is allocated on demand.
    pub(crate) fn new() -> Self {
        Self {
            pages: Vec::new(),
            tail: 0,
        }
    }

    /// Acquires `samples` rounded up to the block size.
    ///
    /// Serves from the tail page, advances to the next retained page when the
    /// tail is exhausted, and appends a fresh page when none remains.
    pub(crate) fn acquire(&mut self, samples: usize) -> Result<Span, EngineError> {
        let size = round_up(samples, BLOCK_SAMPLES);
        if size > PAGE_SAMPLES {
            #[cfg(feature = "tracing")]
            tracing::warn!(
                samples,
                page_samples = PAGE_SAMPLES,
                "refusing oversized transient allocation"
            );
            return Err(EngineError::OversizedAllocation(samples));
        }
        loop {
            if let Some(page) = self.pages.get_mut(self.tail) {
                if size <= PAGE_SAMPLES - page.used {
                    let span = Span {
                        page: self.tail,
                        offset: page.used,
                        len: size,
                    };
                    page.used += size;
                    return Ok(span);
                }
                if self.tail + 1 < self.pages.len() {
                    self.tail += 1;
                    self.pages[self.tail].used = 0;
                    continue;
                }
            }
            self.push_page();
        }
    }

    /// Advisory release; the pool reclaims everything on [`clear`](Self::clear).
    pub(crate) fn release(&mut self, _span: Span) {}

    /// Rewinds the pool: the head page becomes the tail with its cursor reset.
    ///
    /// Retained pages past the head are reset lazily when the cursor reaches
    /// them again.
    pub(crate) fn clear(&mut self) {
        self.tail = 0;
        if let Some(page) = self.pages.first_mut() {
            page.used = 0;
        }
    }

    /// Resolves a span to its samples.
    pub(crate) fn span(&self, span: Span) -> &[Cell<f32>] {
        &self.pages[span.page].data[span.offset..span.offset + span.len]
    }

    /// Samples currently handed out. Diagnostic: a clean engine reads zero
    /// here between ticks.
    pub fn occupied(&self) -> usize {
        self.pages
            .iter()
            .take(self.tail + 1)
            .map(|p| p.used)
            .sum()
    }

    /// Number of pages allocated so far. Pages are retained across rewinds.
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    fn push_page(&mut self) {
        self.pages.push(TransientPage {
            data: zeroed_page(),
            used: 0,
        });
        self.tail = self.pages.len() - 1;
        #[cfg(feature = "tracing")]
        tracing::debug!(pages = self.pages.len(), "transient pool grew");
    }
}

// ---------------------------------------------------------------------------
// Persistent pool
// ---------------------------------------------------------------------------

struct PersistentPage {
    data: Box<[Cell<f32>]>,
    map: [u8; MAP_BYTES],
}

impl PersistentPage {
    fn new() -> Self {
        Self {
            data: zeroed_page(),
            map: [0u8; MAP_BYTES],
        }
    }

    #[inline]
    fn get_bit(&self, bit: usize) -> bool {
        self.map[bit >> 3] & (1 << (bit & 7)) != 0
    }

    fn set_bit(&mut self, bit: usize, value: bool) {
        let mask = 1 << (bit & 7);
        if value {
            self.map[bit >> 3] |= mask;
        } else {
            self.map[bit >> 3] &= !mask;
        }
    }

    fn mark(&mut self, bit: usize, count: usize, value: bool) {
        for b in bit..bit + count {
            self.set_bit(b, value);
        }
    }

    /// First free run of `bits` zero bits, left to right.
    ///
    /// Linear scan; whole bytes equal to 0xFF are skipped in one step. Pages
    /// are small (64 map bytes) so nothing smarter is warranted.
    fn find_free(&self, bits: usize) -> Option<usize> {
        let mut run = 0;
        let mut start = 0;
        let mut bit = 0;
        while bit < MAP_BITS {
            if bit & 7 == 0 && self.map[bit >> 3] == 0xFF {
                run = 0;
                bit += 8;
                continue;
            }
            if self.get_bit(bit) {
                run = 0;
            } else {
                if run == 0 {
                    start = bit;
                }
                run += 1;
                if run == bits {
                    return Some(start);
                }
            }
            bit += 1;
        }
        None
    }

    fn occupied_bits(&self) -> usize {
        self.map.iter().map(|b| b.count_ones() as usize).sum()
    }
}

/// Bitmap-managed sample store whose blocks survive across ticks.
pub struct PersistentPool {
    pages: Vec<PersistentPage>,
    tail: usize,
}

impl PersistentPool {
    /// Creates an empty pool; pages are allocated on demand.
    pub(crate) fn new() -> Self {
        Self {
            pages: Vec::new(),
            tail: 0,
        }
    }

    /// Acquires `samples`, marking `ceil(samples / 64)` map bits used.
    pub(crate) fn acquire(&mut self, samples: usize) -> Result<Span, EngineError> {
        let bits = samples.div_ceil(BLOCK_SAMPLES).max(1);
        if bits > MAP_BITS {
            #[cfg(feature = "tracing")]
            tracing::warn!(
                samples,
                page_samples = PAGE_SAMPLES,
                "refusing oversized persistent allocation"
            );
            return Err(EngineError::OversizedAllocation(samples));
        }
        loop {
            if let Some(page) = self.pages.get_mut(self.tail) {
                if let Some(bit) = page.find_free(bits) {
                    page.mark(bit, bits, true);
                    return Ok(Span {
                        page: self.tail,
                        offset: bit * BLOCK_SAMPLES,
                        len: bits * BLOCK_SAMPLES,
                    });
                }
                if self.tail + 1 < self.pages.len() {
                    self.tail += 1;
                    continue;
                }
            }
            self.pages.push(PersistentPage::new());
            self.tail = self.pages.len() - 1;
            #[cfg(feature = "tracing")]
            tracing::debug!(pages = self.pages.len(), "persistent pool grew");
        }
    }

    /// Clears the bit run backing `span`.
    pub(crate) fn release(&mut self, span: Span) {
        if let Some(page) = self.pages.get_mut(span.page) {
            page.mark(span.offset / BLOCK_SAMPLES, span.len / BLOCK_SAMPLES, false);
        }
    }

    /// Resets the scan tail to the head page.
    ///
    /// Block maps are left intact: blocks held by live persistent vectors
    /// stay marked until they are released, which is what lets those vectors
    /// survive tick boundaries.
    pub(crate) fn rewind(&mut self) {
        self.tail = 0;
    }

    /// Resolves a span to its samples.
    pub(crate) fn span(&self, span: Span) -> &[Cell<f32>] {
        &self.pages[span.page].data[span.offset..span.offset + span.len]
    }

    /// Total map bits currently marked used. Diagnostic: blocks still held
    /// by live persistent vectors.
    pub fn occupied_blocks(&self) -> usize {
        self.pages.iter().map(PersistentPage::occupied_bits).sum()
    }

    /// Number of pages allocated so far. Pages are retained across rewinds.
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }
}
