//! Per-worker barcode arena.
//!
//! One worker owns one `BarcodeArena`: the pair-aligner slots for a whole
//! barcode plus the shared candidate pool, reserved once at worker start and
//! never grown. Candidates are bump-allocated out of the pool; a barcode ends
//! with a canary check and an in-place reset. The arena is deliberately not
//! thread-safe.
//!
//! The only heap traffic outside the arena on the hot path is the per-pair
//! secondary-result buffers, which the driver regrows by doubling on
//! overflow.

use std::fmt;
use std::mem::size_of;

use crate::aligner::pair::{Candidate, PairAligner};
use crate::options::AlignerOptions;

/// Guard word placed at both ends of every arena-backed region.
pub const ARENA_CANARY: u64 = 0xCAFE_BEAD_FEED_5EED;

/// The shared candidate pool is full; the requesting pair cannot be seeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolOverflow;

impl fmt::Display for PoolOverflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "candidate pool exhausted")
    }
}

impl std::error::Error for PoolOverflow {}

/// Fixed-capacity bump pool with canary words on both sides. `try_push`
/// refuses to grow past the reserved capacity; `truncate` rolls the bump
/// pointer back so a failed builder can return its partial allocation.
pub struct FixedPool<T> {
    head_canary: u64,
    slots: Vec<T>,
    capacity: usize,
    tail_canary: u64,
}

impl<T> FixedPool<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        FixedPool {
            head_canary: ARENA_CANARY,
            slots: Vec::with_capacity(capacity),
            capacity,
            tail_canary: ARENA_CANARY,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn try_push(&mut self, value: T) -> Result<(), PoolOverflow> {
        if self.slots.len() >= self.capacity {
            return Err(PoolOverflow);
        }
        self.slots.push(value);
        Ok(())
    }

    /// Roll the bump pointer back to `len` entries.
    pub fn truncate(&mut self, len: usize) {
        self.slots.truncate(len);
    }

    pub fn clear(&mut self) {
        self.slots.clear();
    }

    #[inline]
    pub fn slice(&self, start: usize, len: usize) -> &[T] {
        &self.slots[start..start + len]
    }

    #[inline]
    pub fn slice_from_mut(&mut self, start: usize) -> &mut [T] {
        &mut self.slots[start..]
    }

    /// Verify the guard words. A mismatch means something scribbled over the
    /// pool's bounds; that is unrecoverable corruption, so die loudly.
    pub fn check_canaries(&self) {
        if self.head_canary != ARENA_CANARY || self.tail_canary != ARENA_CANARY {
            panic!(
                "candidate pool canary mismatch (head {:#x}, tail {:#x})",
                self.head_canary, self.tail_canary
            );
        }
    }
}

/// The arena backing one barcode's worth of pair aligners.
pub struct BarcodeArena {
    head_canary: u64,
    aligners: Vec<PairAligner>,
    pool: FixedPool<Candidate>,
    tail_canary: u64,
}

impl BarcodeArena {
    /// Bytes the arena will hold live for the given configuration, including
    /// the oriented-sequence scratch sized for the longest supported read.
    /// The driver logs this so operators can account for per-worker memory.
    pub fn reserve(options: &AlignerOptions) -> usize {
        options.max_barcode_size * size_of::<PairAligner>()
            + options.max_candidate_pool_size * size_of::<Candidate>()
            + crate::defaults::MAX_READ_LENGTH * crate::defaults::NUM_READS_PER_PAIR
            + 4 * size_of::<u64>()
    }

    /// Allocate the arena in full. No allocation happens after this call
    /// until the arena is dropped.
    pub fn new(options: &AlignerOptions) -> Self {
        let mut aligners = Vec::with_capacity(options.max_barcode_size);
        aligners.resize_with(options.max_barcode_size, PairAligner::new);
        BarcodeArena {
            head_canary: ARENA_CANARY,
            aligners,
            pool: FixedPool::with_capacity(options.max_candidate_pool_size),
            tail_canary: ARENA_CANARY,
        }
    }

    #[inline]
    pub fn slot_count(&self) -> usize {
        self.aligners.len()
    }

    /// Split borrow: one aligner slot plus the shared pool. The aligner
    /// never stores references into the pool, only index ranges, so nothing
    /// escapes the arena.
    #[inline]
    pub fn pair_parts(&mut self, slot: usize) -> (&mut PairAligner, &mut FixedPool<Candidate>) {
        (&mut self.aligners[slot], &mut self.pool)
    }

    #[inline]
    pub fn aligner(&self, slot: usize) -> &PairAligner {
        &self.aligners[slot]
    }

    #[inline]
    pub fn pool(&self) -> &FixedPool<Candidate> {
        &self.pool
    }

    /// Reset every slot in place for the next barcode. Capacities are kept;
    /// nothing is freed.
    pub fn reset(&mut self) {
        for aligner in &mut self.aligners {
            aligner.reset();
        }
        self.pool.clear();
    }

    /// Verify all guard words; called before teardown and between barcodes.
    pub fn check_canaries(&self) {
        if self.head_canary != ARENA_CANARY || self.tail_canary != ARENA_CANARY {
            panic!(
                "barcode arena canary mismatch (head {:#x}, tail {:#x})",
                self.head_canary, self.tail_canary
            );
        }
        self.pool.check_canaries();
    }
}
