//! Barcode-cluster orchestrator.
//!
//! A `ClusterAligner` drives every pair sharing one molecular barcode through
//! the three alignment stages in lockstep:
//!
//! ```text
//! ingest → seed (stage 1) → paired scoring (stage 2, regrow on overflow)
//!        → cluster inference → single scoring (stage 3, regrow on overflow)
//!        → emit
//! ```
//!
//! Linked reads sharing a barcode come from a handful of long source
//! molecules, so the surviving primaries concentrate in a few reference
//! windows. Cluster inference counts primaries per `max_cluster_span` bucket;
//! buckets reaching `min_pairs_per_cluster` become clusters, confirming their
//! members as pairs and letting weakly-paired reads promote in-cluster
//! single-end placements over stronger placements elsewhere.
//!
//! Per-pair progress lives in one `PairState` record per pair; the stages
//! iterate over records, never over parallel arrays.

use rustc_hash::FxHashMap;

use crate::aligner::pair::{PairScratch, ScoreOutcome};
use crate::arena::BarcodeArena;
use crate::distance::EditDistanceKernel;
use crate::genome::{is_valid_location, GenomeLocation};
use crate::index::ReferenceIndex;
use crate::options::AlignerOptions;
use crate::read::ReadPair;
use crate::results::{PairedAlignmentResult, SingleAlignmentResult};

/// Primary-candidate counts per reference bucket.
#[derive(Debug, Clone)]
pub struct ClusterMap {
    span: u64,
    min_pairs: usize,
    counts: FxHashMap<u64, u32>,
}

impl ClusterMap {
    pub fn new(span: u64, min_pairs: usize) -> Self {
        ClusterMap {
            span,
            min_pairs,
            counts: FxHashMap::default(),
        }
    }

    #[inline]
    fn bucket(&self, location: GenomeLocation) -> u64 {
        location / self.span
    }

    pub fn clear(&mut self) {
        self.counts.clear();
    }

    pub fn record(&mut self, location: GenomeLocation) {
        *self.counts.entry(self.bucket(location)).or_insert(0) += 1;
    }

    pub fn remove(&mut self, location: GenomeLocation) {
        let bucket = self.bucket(location);
        if let Some(count) = self.counts.get_mut(&bucket) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.counts.remove(&bucket);
            }
        }
    }

    /// Raw member count of the bucket containing `location`.
    pub fn count(&self, location: GenomeLocation) -> u32 {
        self.counts.get(&self.bucket(location)).copied().unwrap_or(0)
    }

    /// True once the bucket has reached the cluster threshold.
    pub fn is_cluster(&self, location: GenomeLocation) -> bool {
        self.count(location) as usize >= self.min_pairs
    }

    /// Member count if the bucket is a cluster, 0 otherwise. Candidate
    /// ordering keys use this directly.
    pub fn cluster_size(&self, location: GenomeLocation) -> u32 {
        let count = self.count(location);
        if count as usize >= self.min_pairs {
            count
        } else {
            0
        }
    }

    pub fn n_clusters(&self) -> usize {
        self.counts
            .values()
            .filter(|&&c| c as usize >= self.min_pairs)
            .count()
    }
}

/// Where a pair is in the three-stage pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairPhase {
    /// Ingested, not yet seeded.
    Fresh,
    /// Stage 1 produced a candidate set.
    Seeded,
    /// Stage 2 needs a larger paired-secondary buffer.
    PairedOverflow,
    /// Stage 2 accepted a result set.
    PairedDone,
    /// Stage 3 needs a larger single-secondary buffer.
    SingleOverflow,
    /// Stage 3 accepted; ready to emit.
    SingleDone,
    /// Terminal before the pipeline completed (candidate pool exhausted).
    ShortCircuited,
}

/// All mutable per-pair bookkeeping for one batch slot.
#[derive(Debug)]
pub struct PairState {
    pub phase: PairPhase,
    pub useful: [bool; 2],
    /// Logical capacity of the paired-secondary buffer; doubles on overflow
    /// and never shrinks.
    pub max_paired_secondary: usize,
    /// Same, for single-end secondaries (per read).
    pub max_single_secondary: usize,
    /// Paired secondaries written by stage 2, or the count it asked for when
    /// it overflowed.
    pub n_secondary: usize,
    /// Single secondaries written per read by stage 3.
    pub n_single_secondary: [usize; 2],
    /// Count stage 3 asked for when it overflowed.
    pub n_single_needed: usize,
    pub popular_seeds_skipped: [u32; 2],
    /// Primary at index 0, then secondaries.
    pub paired_results: Vec<PairedAlignmentResult>,
    /// Read 0's secondaries, then read 1's.
    pub single_results: Vec<SingleAlignmentResult>,
}

impl PairState {
    fn new(initial_secondary: usize) -> Self {
        PairState {
            phase: PairPhase::Fresh,
            useful: [false; 2],
            max_paired_secondary: initial_secondary,
            max_single_secondary: initial_secondary,
            n_secondary: 0,
            n_single_secondary: [0; 2],
            n_single_needed: 0,
            popular_seeds_skipped: [0; 2],
            paired_results: Vec::new(),
            single_results: Vec::new(),
        }
    }

    /// Re-arm the slot for a new pair. Buffer capacities are sticky across
    /// barcodes; a slot that grew once stays grown.
    fn reset_for_pair(&mut self, useful: [bool; 2]) {
        self.phase = PairPhase::Fresh;
        self.useful = useful;
        self.n_secondary = 0;
        self.n_single_secondary = [0; 2];
        self.n_single_needed = 0;
        self.popular_seeds_skipped = [0; 2];
        self.paired_results.clear();
        self.paired_results.push(PairedAlignmentResult::not_found());
        self.single_results.clear();
        self.reserve_buffers();
    }

    /// Make the physical buffers match their logical capacities.
    pub fn reserve_buffers(&mut self) {
        let paired_target = 1 + self.max_paired_secondary;
        if self.paired_results.capacity() < paired_target {
            let additional = paired_target - self.paired_results.len();
            self.paired_results.reserve_exact(additional);
        }
        let single_target = 2 * self.max_single_secondary;
        if self.single_results.capacity() < single_target {
            let additional = single_target - self.single_results.len();
            self.single_results.reserve_exact(additional);
        }
    }
}

/// One barcode's worth of pairs, structure-of-arrays style: the read pairs
/// and their states live in parallel, preallocated to the batch cap.
pub struct BarcodeBatch {
    pairs: Vec<ReadPair>,
    states: Vec<PairState>,
}

impl BarcodeBatch {
    pub fn new(options: &AlignerOptions) -> Self {
        let initial = options.initial_secondary_buffer_size();
        let mut states = Vec::with_capacity(options.max_barcode_size);
        states.resize_with(options.max_barcode_size, || PairState::new(initial));
        BarcodeBatch {
            pairs: Vec::with_capacity(options.max_barcode_size),
            states,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.states.len()
    }

    /// Ingest one pair into the next slot. Panics if the batch cap is
    /// exceeded; the driver checks the cap before calling.
    pub fn push(&mut self, pair: ReadPair, useful: [bool; 2]) {
        let slot = self.pairs.len();
        self.states[slot].reset_for_pair(useful);
        self.pairs.push(pair);
    }

    /// Drop the pairs; slot states (and their grown buffers) are reused.
    pub fn clear(&mut self) {
        self.pairs.clear();
    }

    #[inline]
    pub fn pair(&self, slot: usize) -> &ReadPair {
        &self.pairs[slot]
    }

    #[inline]
    pub fn state(&self, slot: usize) -> &PairState {
        &self.states[slot]
    }

    #[inline]
    pub fn state_mut(&mut self, slot: usize) -> &mut PairState {
        &mut self.states[slot]
    }

    /// The active slice of the batch, split for simultaneous iteration.
    pub fn parts_mut(&mut self) -> (&[ReadPair], &mut [PairState]) {
        let n = self.pairs.len();
        (&self.pairs, &mut self.states[..n])
    }
}

/// Orchestrator for all pairs sharing one barcode.
pub struct ClusterAligner<'a> {
    index: &'a dyn ReferenceIndex,
    kernel: &'a dyn EditDistanceKernel,
    options: &'a AlignerOptions,
    arena: BarcodeArena,
    clusters: ClusterMap,
    scratch: PairScratch,
    locations_scored: i64,
    stage3_started: bool,
}

impl<'a> ClusterAligner<'a> {
    pub fn new(
        index: &'a dyn ReferenceIndex,
        kernel: &'a dyn EditDistanceKernel,
        options: &'a AlignerOptions,
    ) -> Self {
        let reserved = BarcodeArena::reserve(options);
        log::info!(
            "reserving {} MB arena for {} pair aligners",
            reserved >> 20,
            options.max_barcode_size
        );
        ClusterAligner {
            index,
            kernel,
            options,
            arena: BarcodeArena::new(options),
            clusters: ClusterMap::new(options.max_cluster_span, options.min_pairs_per_cluster),
            scratch: PairScratch::new(),
            locations_scored: 0,
            stage3_started: false,
        }
    }

    /// Edit-distance kernel invocations so far, for the stats reduction.
    pub fn locations_scored(&self) -> i64 {
        self.locations_scored
    }

    pub fn clusters(&self) -> &ClusterMap {
        &self.clusters
    }

    /// Stage 1: seed every fresh pair. Returns true when no pair in the
    /// batch produced a single candidate, letting the caller short-circuit
    /// straight to emission (every primary already reads NotFound).
    pub fn align_first_stage(&mut self, batch: &mut BarcodeBatch) -> bool {
        let (pairs, states) = batch.parts_mut();
        let mut any_candidates = false;
        for (slot, state) in states.iter_mut().enumerate() {
            if state.phase != PairPhase::Fresh {
                continue;
            }
            let (aligner, pool) = self.arena.pair_parts(slot);
            let mark = pool.len();
            match aligner.prepare(
                &pairs[slot],
                state.useful,
                self.index,
                self.options,
                pool,
                &mut self.scratch,
            ) {
                Ok(summary) => {
                    state.popular_seeds_skipped = aligner.popular_seeds_skipped();
                    if summary.n_candidates > 0 {
                        any_candidates = true;
                    }
                    state.phase = PairPhase::Seeded;
                }
                Err(overflow) => {
                    pool.truncate(mark);
                    aligner.reset();
                    log::warn!(
                        "{} for pair '{}'; reporting it unaligned",
                        overflow,
                        pairs[slot].read(0).id()
                    );
                    state.phase = PairPhase::ShortCircuited;
                }
            }
        }
        !any_candidates
    }

    /// Stage 2: paired scoring for every pair still in flight. Returns true
    /// once every pair has completed; false means at least one pair overflowed
    /// its secondary buffer and the caller must regrow and call again.
    pub fn align_second_stage(&mut self, batch: &mut BarcodeBatch) -> bool {
        let (pairs, states) = batch.parts_mut();
        let mut all_done = true;
        for (slot, state) in states.iter_mut().enumerate() {
            match state.phase {
                PairPhase::Seeded | PairPhase::PairedOverflow => {}
                _ => continue,
            }
            let (aligner, pool) = self.arena.pair_parts(slot);
            let outcome = aligner.score_paired(
                &pairs[slot],
                self.index,
                self.kernel,
                self.options,
                pool,
                &mut self.scratch,
                state.max_paired_secondary,
                &mut state.paired_results,
            );
            match outcome {
                ScoreOutcome::Done {
                    n_secondary,
                    lv_calls,
                } => {
                    self.locations_scored += lv_calls as i64;
                    state.n_secondary = n_secondary;
                    state.phase = PairPhase::PairedDone;
                }
                ScoreOutcome::Overflow { needed, lv_calls } => {
                    self.locations_scored += lv_calls as i64;
                    state.n_secondary = needed;
                    state.phase = PairPhase::PairedOverflow;
                    all_done = false;
                }
            }
        }
        if all_done {
            self.infer_clusters(batch);
        }
        all_done
    }

    /// Stage 3: single-end scoring for pairs that did not establish
    /// concordance, with cluster-guided candidate preference. Same regrow
    /// protocol as stage 2.
    pub fn align_third_stage(&mut self, batch: &mut BarcodeBatch) -> bool {
        if !self.stage3_started {
            self.stage3_started = true;
            let (_, states) = batch.parts_mut();
            for state in states.iter_mut() {
                if state.phase == PairPhase::PairedDone
                    && state.paired_results[0].from_align_together
                {
                    // Concordant pairs keep their joint result as-is.
                    state.phase = PairPhase::SingleDone;
                }
            }
        }

        let (pairs, states) = batch.parts_mut();
        let mut all_done = true;
        for (slot, state) in states.iter_mut().enumerate() {
            match state.phase {
                PairPhase::PairedDone | PairPhase::SingleOverflow => {}
                _ => continue,
            }
            let useful = state.useful;
            let max_single = state.max_single_secondary;
            let (aligner, pool) = self.arena.pair_parts(slot);
            let outcome = aligner.score_single(
                &pairs[slot],
                useful,
                self.index,
                self.kernel,
                self.options,
                pool,
                &mut self.scratch,
                &self.clusters,
                max_single,
                &mut state.paired_results[0],
                &mut state.single_results,
                &mut state.n_single_secondary,
            );
            match outcome {
                ScoreOutcome::Done { lv_calls, .. } => {
                    self.locations_scored += lv_calls as i64;
                    state.phase = PairPhase::SingleDone;
                }
                ScoreOutcome::Overflow { needed, lv_calls } => {
                    self.locations_scored += lv_calls as i64;
                    state.n_single_needed = needed;
                    state.phase = PairPhase::SingleOverflow;
                    all_done = false;
                }
            }
        }
        all_done
    }

    /// Count surviving primaries per bucket and confirm in-cluster members.
    fn infer_clusters(&mut self, batch: &mut BarcodeBatch) {
        self.clusters.clear();
        let (_, states) = batch.parts_mut();
        for state in states.iter() {
            let primary = &state.paired_results[0];
            if is_valid_location(primary.location[0]) {
                self.clusters.record(primary.location[0]);
            }
        }
        for state in states.iter_mut() {
            let primary = &mut state.paired_results[0];
            if is_valid_location(primary.location[0]) && self.clusters.is_cluster(primary.location[0])
            {
                primary.aligned_as_pair = true;
            }
        }
        log::debug!(
            "{} clusters over {} pairs",
            self.clusters.n_clusters(),
            states.len()
        );
    }

    /// End-of-barcode teardown: verify the canaries, then reset every arena
    /// slot in place for the next barcode.
    pub fn finish_barcode(&mut self) {
        self.arena.check_canaries();
        self.arena.reset();
        self.clusters.clear();
        self.stage3_started = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cluster_threshold() {
        let mut clusters = ClusterMap::new(1000, 3);
        clusters.record(100);
        clusters.record(200);
        assert!(!clusters.is_cluster(150));
        clusters.record(900);
        assert!(clusters.is_cluster(150));
        assert_eq!(clusters.cluster_size(999), 3);
        // Next bucket is independent.
        assert!(!clusters.is_cluster(1001));
        assert_eq!(clusters.cluster_size(1500), 0);
    }

    #[test]
    fn test_cluster_removal_decrements() {
        let mut clusters = ClusterMap::new(1000, 3);
        for loc in [10, 20, 30] {
            clusters.record(loc);
        }
        assert_eq!(clusters.count(10), 3);
        clusters.remove(20);
        assert_eq!(clusters.count(10), 2);
        assert!(!clusters.is_cluster(10));
        clusters.remove(10);
        clusters.remove(30);
        assert_eq!(clusters.count(10), 0);
    }

    #[test]
    fn test_cluster_build_is_idempotent() {
        let locations = [5u64, 15, 950, 2500, 2600, 2700];
        let build = || {
            let mut clusters = ClusterMap::new(1000, 3);
            for &loc in &locations {
                clusters.record(loc);
            }
            (clusters.n_clusters(), clusters.count(0), clusters.count(2500))
        };
        assert_eq!(build(), build());
        let (n, bucket0, bucket2) = build();
        assert_eq!(n, 2);
        assert_eq!(bucket0, 3);
        assert_eq!(bucket2, 3);
    }

    #[test]
    fn test_batch_slots_are_sticky() {
        let mut options = AlignerOptions::default();
        options.max_barcode_size = 4;
        options.max_secondary_additional_edit_distance = 3;
        let mut batch = BarcodeBatch::new(&options);
        assert_eq!(batch.capacity(), 4);

        let pair = crate::read::ReadPair::new(
            crate::read::Read::without_qualities("a/1", b"ACGT".repeat(20)),
            crate::read::Read::without_qualities("a/2", b"ACGT".repeat(20)),
            b"BX".to_vec(),
        );
        batch.push(pair.clone(), [true, true]);
        batch.state_mut(0).max_paired_secondary *= 2;
        batch.clear();
        assert!(batch.is_empty());

        // The grown capacity survives the next barcode.
        batch.push(pair, [true, true]);
        assert_eq!(batch.state(0).max_paired_secondary, 64);
        assert_eq!(batch.state(0).paired_results.len(), 1);
        assert_eq!(
            batch.state(0).paired_results[0].status,
            [crate::results::AlignmentStatus::NotFound; 2]
        );
    }
}
