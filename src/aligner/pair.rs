//! Single-pair aligner.
//!
//! One `PairAligner` aligns one read pair by seed-and-extend intersection:
//!
//! 1. `prepare` samples non-overlapping seeds from both reads in both
//!    orientations, looks them up in the index, and bump-allocates the merged
//!    candidate locations out of the arena's shared pool.
//! 2. `score_paired` scans opposite-orientation candidate lists for
//!    combinations inside the concordant spacing window, scores them with the
//!    edit-distance kernel, and emits a primary plus bounded secondaries.
//! 3. `score_single` scores each read's candidates independently when joint
//!    scoring failed, with barcode-cluster membership taking precedence over
//!    raw score.
//!
//! The aligner itself holds only index ranges into the pool, so tens of
//! thousands of instances sit in the arena with no per-instance heap. Progress
//! between the phases is tracked by the orchestrator, which re-invokes a phase
//! with a larger result buffer after an overflow.

use std::time::Instant;

use rustc_hash::FxHashMap;

use crate::aligner::cluster::ClusterMap;
use crate::arena::{FixedPool, PoolOverflow};
use crate::defaults::NUM_READS_PER_PAIR;
use crate::distance::EditDistanceKernel;
use crate::genome::{genome_distance, Direction, GenomeLocation, DIRECTIONS};
use crate::index::ReferenceIndex;
use crate::options::AlignerOptions;
use crate::read::{reverse_complement_into, ReadPair};
use crate::results::{
    mapq_from_score_gap, AlignmentStatus, PairedAlignmentResult, SingleAlignmentResult,
};

/// One possible placement of one read, derived from a seed hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    pub location: GenomeLocation,
    /// How many seeds voted for this location.
    pub seed_hits: u32,
}

/// Half-open range of pool slots holding one (read, direction) class.
#[derive(Debug, Clone, Copy, Default)]
struct CandRange {
    start: u32,
    len: u32,
}

/// What `prepare` found.
#[derive(Debug, Clone, Copy)]
pub struct SeedSummary {
    pub n_candidates: u32,
}

/// Result of a scoring phase. `Overflow` means the caller's secondary buffer
/// is too small; `needed` is the count that would have been written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreOutcome {
    Done { n_secondary: usize, lv_calls: u32 },
    Overflow { needed: usize, lv_calls: u32 },
}

/// A scored concordant combination of one candidate per read.
#[derive(Debug, Clone, Copy)]
struct ScoredPair {
    location: [GenomeLocation; 2],
    direction: [Direction; 2],
    dist: [u32; 2],
}

impl ScoredPair {
    #[inline]
    fn score(&self) -> u32 {
        self.dist[0] + self.dist[1]
    }
}

/// A scored single-end candidate, annotated with cluster membership.
#[derive(Debug, Clone, Copy)]
struct ScoredSingle {
    location: GenomeLocation,
    direction: Direction,
    dist: u32,
    cluster_size: u32,
}

/// Reusable buffers shared by all pairs of a batch; owned by the
/// orchestrator, cleared per pair. Keeps the scoring loops allocation-free
/// once warm.
#[derive(Default)]
pub struct PairScratch {
    rc: [Vec<u8>; 2],
    dist_cache: [Vec<Option<Option<u32>>>; 4],
    scored: Vec<ScoredPair>,
    scored_single: Vec<ScoredSingle>,
    selected: Vec<u32>,
    contig_counts: FxHashMap<usize, u32>,
}

impl PairScratch {
    pub fn new() -> Self {
        Self::default()
    }
}

#[inline]
fn class_index(which_read: usize, direction: Direction) -> usize {
    which_read * 2 + direction.index()
}

/// Sort order puts in-cluster candidates first, larger clusters before
/// smaller, then lower edit distance, then lower coordinate.
#[inline]
fn single_preference(s: &ScoredSingle) -> (bool, u32, u32, GenomeLocation) {
    (s.cluster_size == 0, u32::MAX - s.cluster_size, s.dist, s.location)
}

pub struct PairAligner {
    ranges: [[CandRange; 2]; 2],
    popular_seeds_skipped: [u32; 2],
    n_candidates: u32,
}

impl PairAligner {
    pub fn new() -> Self {
        PairAligner {
            ranges: [[CandRange::default(); 2]; 2],
            popular_seeds_skipped: [0; 2],
            n_candidates: 0,
        }
    }

    /// Drop all candidate state; pool ranges become dangling and must not be
    /// read until the next `prepare`.
    pub fn reset(&mut self) {
        self.ranges = [[CandRange::default(); 2]; 2];
        self.popular_seeds_skipped = [0; 2];
        self.n_candidates = 0;
    }

    #[inline]
    pub fn n_candidates(&self) -> u32 {
        self.n_candidates
    }

    #[inline]
    pub fn popular_seeds_skipped(&self) -> [u32; 2] {
        self.popular_seeds_skipped
    }

    /// Seed both reads and collect candidate locations into `pool`.
    ///
    /// On `PoolOverflow` the caller must roll the pool back to its length
    /// before the call; the aligner's own state is safe to `reset`.
    pub fn prepare(
        &mut self,
        pair: &ReadPair,
        useful: [bool; 2],
        index: &dyn ReferenceIndex,
        options: &AlignerOptions,
        pool: &mut FixedPool<Candidate>,
        scratch: &mut PairScratch,
    ) -> Result<SeedSummary, PoolOverflow> {
        self.reset();
        let seed_length = index.seed_length();
        let mut total = 0u32;

        for which in 0..NUM_READS_PER_PAIR {
            if !useful[which] {
                continue;
            }
            let read = pair.read(which);
            if read.len() < seed_length {
                continue;
            }
            reverse_complement_into(read.sequence(), &mut scratch.rc[which]);

            for direction in DIRECTIONS {
                let sequence: &[u8] = match direction {
                    Direction::Forward => read.sequence(),
                    Direction::ReverseComplement => &scratch.rc[which],
                };
                let start = pool.len();
                let mut offset = 0;
                while offset + seed_length <= sequence.len() {
                    let hits = index.lookup(&sequence[offset..offset + seed_length]);
                    if hits.len() > options.intersecting_aligner_max_hits {
                        self.popular_seeds_skipped[which] += 1;
                    } else {
                        for &hit in hits {
                            // A hit closer to the reference start than the
                            // seed offset cannot anchor the whole read.
                            if hit < offset as u64 {
                                continue;
                            }
                            pool.try_push(Candidate {
                                location: hit - offset as u64,
                                seed_hits: 1,
                            })?;
                        }
                    }
                    offset += seed_length;
                }

                let slice = pool.slice_from_mut(start);
                slice.sort_unstable_by_key(|c| c.location);
                let merged = merge_adjacent(slice);
                pool.truncate(start + merged);
                self.ranges[which][direction.index()] = CandRange {
                    start: start as u32,
                    len: merged as u32,
                };
                total += merged as u32;
            }
        }

        self.n_candidates = total;
        Ok(SeedSummary { n_candidates: total })
    }

    /// Score concordant candidate combinations and write the primary plus up
    /// to `max_secondary_in` secondaries into `results`.
    #[allow(clippy::too_many_arguments)]
    pub fn score_paired(
        &self,
        pair: &ReadPair,
        index: &dyn ReferenceIndex,
        kernel: &dyn EditDistanceKernel,
        options: &AlignerOptions,
        pool: &FixedPool<Candidate>,
        scratch: &mut PairScratch,
        max_secondary_in: usize,
        results: &mut Vec<PairedAlignmentResult>,
    ) -> ScoreOutcome {
        let started = Instant::now();
        let mut lv_calls = 0u32;
        let limit = options.max_edit_distance + options.extra_search_depth;

        let PairScratch {
            rc,
            dist_cache,
            scored,
            selected,
            contig_counts,
            ..
        } = scratch;

        reverse_complement_into(pair.read(0).sequence(), &mut rc[0]);
        reverse_complement_into(pair.read(1).sequence(), &mut rc[1]);
        for which in 0..NUM_READS_PER_PAIR {
            for direction in DIRECTIONS {
                let cache = &mut dist_cache[class_index(which, direction)];
                cache.clear();
                cache.resize(self.ranges[which][direction.index()].len as usize, None);
            }
        }

        scored.clear();
        let (caches0, caches1) = dist_cache.split_at_mut(2);
        for dir0 in DIRECTIONS {
            let dir1 = dir0.opposite();
            let range0 = self.ranges[0][dir0.index()];
            let range1 = self.ranges[1][dir1.index()];
            if range0.len == 0 || range1.len == 0 {
                continue;
            }
            let c0s = pool.slice(range0.start as usize, range0.len as usize);
            let c1s = pool.slice(range1.start as usize, range1.len as usize);
            let pattern0: &[u8] = match dir0 {
                Direction::Forward => pair.read(0).sequence(),
                Direction::ReverseComplement => &rc[0],
            };
            let pattern1: &[u8] = match dir1 {
                Direction::Forward => pair.read(1).sequence(),
                Direction::ReverseComplement => &rc[1],
            };
            let cache0 = &mut caches0[dir0.index()];
            let cache1 = &mut caches1[dir1.index()];

            for (i0, c0) in c0s.iter().enumerate() {
                let window_low = c0.location.saturating_sub(options.max_spacing as u64);
                let window_high = c0.location + options.max_spacing as u64;
                let first = c1s.partition_point(|c| c.location < window_low);
                for (skip, c1) in c1s[first..].iter().enumerate() {
                    if c1.location > window_high {
                        break;
                    }
                    let spacing = genome_distance(c1.location, c0.location).unsigned_abs();
                    if spacing < options.min_spacing as u64 {
                        continue;
                    }
                    let d0 = match cached_distance(
                        cache0, i0, pattern0, c0.location, index, kernel, limit, &mut lv_calls,
                    ) {
                        Some(d) => d,
                        None => continue,
                    };
                    let d1 = match cached_distance(
                        cache1,
                        first + skip,
                        pattern1,
                        c1.location,
                        index,
                        kernel,
                        limit,
                        &mut lv_calls,
                    ) {
                        Some(d) => d,
                        None => continue,
                    };
                    scored.push(ScoredPair {
                        location: [c0.location, c1.location],
                        direction: [dir0, dir1],
                        dist: [d0, d1],
                    });
                }
            }
        }

        if scored.is_empty() {
            results.clear();
            results.push(PairedAlignmentResult::not_found());
            return ScoreOutcome::Done {
                n_secondary: 0,
                lv_calls,
            };
        }

        scored.sort_unstable_by_key(|s| (s.score(), s.location[0], s.location[1]));
        let best_score = scored[0].score();
        let n_ties = scored.iter().take_while(|s| s.score() == best_score).count();
        let winner_idx = if n_ties > 1 {
            // Refine equal-score leaders by reference ambiguity, then
            // coordinate.
            let mut best_i = 0;
            let mut best_key = (u32::MAX, u64::MAX, u64::MAX);
            for (i, s) in scored.iter().enumerate().take(n_ties) {
                let ambiguity = reference_n_count(index, s.location[0], pair.read(0).len())
                    + reference_n_count(index, s.location[1], pair.read(1).len());
                let key = (ambiguity, s.location[0], s.location[1]);
                if key < best_key {
                    best_key = key;
                    best_i = i;
                }
            }
            best_i
        } else {
            0
        };
        let winner = scored[winner_idx];
        let second_best = if scored.len() > 1 {
            Some(if n_ties > 1 { best_score } else { scored[1].score() })
        } else {
            None
        };
        let status = if n_ties > 1 {
            AlignmentStatus::MultipleHits
        } else {
            AlignmentStatus::SingleHit
        };
        let mapq = mapq_from_score_gap(best_score, second_best);

        // Secondary selection happens before anything is written so an
        // overflow leaves the caller's buffer untouched.
        selected.clear();
        if options.secondaries_enabled() {
            let window = options.max_secondary_additional_edit_distance as u32;
            let per_contig = options.max_secondary_alignments_per_contig;
            contig_counts.clear();
            if per_contig >= 0 {
                contig_counts.insert(index.contig_of(winner.location[0]), 1);
            }
            for (i, s) in scored.iter().enumerate() {
                if i == winner_idx {
                    continue;
                }
                if s.score() > best_score + window {
                    break;
                }
                if selected.len() >= options.max_secondary_alignments {
                    break;
                }
                if per_contig >= 0 {
                    let count = contig_counts.entry(index.contig_of(s.location[0])).or_insert(0);
                    if *count >= per_contig as u32 {
                        continue;
                    }
                    *count += 1;
                }
                selected.push(i as u32);
            }
            if selected.len() > max_secondary_in {
                return ScoreOutcome::Overflow {
                    needed: selected.len(),
                    lv_calls,
                };
            }
        }

        results.clear();
        results.push(PairedAlignmentResult {
            status: [status; 2],
            location: winner.location,
            direction: winner.direction,
            score: winner.dist,
            mapq: [mapq; 2],
            from_align_together: true,
            aligned_as_pair: true,
            nanos_in_align_together: started.elapsed().as_nanos() as u64,
            n_small_hits: self.n_candidates,
            n_lv_calls: lv_calls,
        });
        for &i in selected.iter() {
            let s = &scored[i as usize];
            results.push(PairedAlignmentResult {
                status: [AlignmentStatus::MultipleHits; 2],
                location: s.location,
                direction: s.direction,
                score: s.dist,
                mapq: [0; 2],
                from_align_together: true,
                aligned_as_pair: false,
                nanos_in_align_together: 0,
                n_small_hits: self.n_candidates,
                n_lv_calls: 0,
            });
        }
        ScoreOutcome::Done {
            n_secondary: selected.len(),
            lv_calls,
        }
    }

    /// Score each read's candidates independently, preferring candidates
    /// inside barcode clusters, and update the pair's primary record in
    /// place. Secondaries land in `singles` as two runs (read 0 then read 1)
    /// with per-read counts in `n_single`.
    #[allow(clippy::too_many_arguments)]
    pub fn score_single(
        &self,
        pair: &ReadPair,
        useful: [bool; 2],
        index: &dyn ReferenceIndex,
        kernel: &dyn EditDistanceKernel,
        options: &AlignerOptions,
        pool: &FixedPool<Candidate>,
        scratch: &mut PairScratch,
        clusters: &ClusterMap,
        max_secondary_in: usize,
        primary: &mut PairedAlignmentResult,
        singles: &mut Vec<SingleAlignmentResult>,
        n_single: &mut [usize; 2],
    ) -> ScoreOutcome {
        let mut lv_calls = 0u32;
        let limit = options.max_edit_distance + options.extra_search_depth;
        let PairScratch {
            rc, scored_single, ..
        } = scratch;

        singles.clear();
        *n_single = [0; 2];
        let mut in_cluster = [false; 2];
        let mut total_secondary = 0usize;

        for which in 0..NUM_READS_PER_PAIR {
            if !useful[which] {
                continue;
            }
            let read = pair.read(which);
            reverse_complement_into(read.sequence(), &mut rc[which]);

            scored_single.clear();
            for direction in DIRECTIONS {
                let range = self.ranges[which][direction.index()];
                if range.len == 0 {
                    continue;
                }
                let pattern: &[u8] = match direction {
                    Direction::Forward => read.sequence(),
                    Direction::ReverseComplement => &rc[which],
                };
                for c in pool.slice(range.start as usize, range.len as usize) {
                    let dist = index
                        .reference_slice(c.location, pattern.len() + limit as usize)
                        .and_then(|text| {
                            lv_calls += 1;
                            kernel.bounded_distance(text, pattern, limit)
                        });
                    if let Some(d) = dist {
                        scored_single.push(ScoredSingle {
                            location: c.location,
                            direction,
                            dist: d,
                            cluster_size: clusters.cluster_size(c.location),
                        });
                    }
                }
            }
            if scored_single.is_empty() {
                continue;
            }

            scored_single.sort_unstable_by_key(single_preference);
            let best = scored_single[0];
            let n_ties = scored_single
                .iter()
                .take_while(|s| s.cluster_size == best.cluster_size && s.dist == best.dist)
                .count();
            let mapq = if n_ties > 1 {
                1
            } else {
                mapq_from_score_gap(best.dist, scored_single.get(1).map(|s| s.dist))
            };
            primary.status[which] = if n_ties > 1 {
                AlignmentStatus::MultipleHits
            } else {
                AlignmentStatus::SingleHit
            };
            primary.location[which] = best.location;
            primary.direction[which] = best.direction;
            primary.score[which] = best.dist;
            primary.mapq[which] = mapq;
            in_cluster[which] = best.cluster_size > 0;

            if options.secondaries_enabled() {
                let window = options.max_secondary_additional_edit_distance as u32;
                // Select before writing so an overflow leaves the caller's
                // buffer untouched. The global cap truncates rather than
                // overflowing; only an undersized buffer asks for a regrow.
                let mut eligible = 0usize;
                for s in scored_single.iter() {
                    if s.location == best.location && s.direction == best.direction {
                        continue;
                    }
                    if s.dist > best.dist + window {
                        continue;
                    }
                    if total_secondary + eligible >= options.max_secondary_alignments {
                        break;
                    }
                    eligible += 1;
                }
                if eligible > max_secondary_in {
                    return ScoreOutcome::Overflow {
                        needed: eligible,
                        lv_calls,
                    };
                }
                let mut written = 0usize;
                for s in scored_single.iter() {
                    if written == eligible {
                        break;
                    }
                    if s.location == best.location && s.direction == best.direction {
                        continue;
                    }
                    if s.dist > best.dist + window {
                        continue;
                    }
                    singles.push(SingleAlignmentResult {
                        status: AlignmentStatus::MultipleHits,
                        location: s.location,
                        direction: s.direction,
                        score: s.dist,
                        mapq: 0,
                    });
                    written += 1;
                }
                n_single[which] = written;
                total_secondary += written;
            }
        }

        if in_cluster[0] && in_cluster[1] {
            primary.aligned_as_pair = true;
        }
        primary.n_lv_calls += lv_calls;

        ScoreOutcome::Done {
            n_secondary: total_secondary,
            lv_calls,
        }
    }
}

impl Default for PairAligner {
    fn default() -> Self {
        Self::new()
    }
}

/// Memoized per-candidate edit distance; each candidate is scored at most
/// once per phase call.
#[allow(clippy::too_many_arguments)]
#[inline]
fn cached_distance(
    cache: &mut [Option<Option<u32>>],
    idx: usize,
    pattern: &[u8],
    location: GenomeLocation,
    index: &dyn ReferenceIndex,
    kernel: &dyn EditDistanceKernel,
    limit: u32,
    lv_calls: &mut u32,
) -> Option<u32> {
    if let Some(known) = cache[idx] {
        return known;
    }
    let computed = index
        .reference_slice(location, pattern.len() + limit as usize)
        .and_then(|text| {
            *lv_calls += 1;
            kernel.bounded_distance(text, pattern, limit)
        });
    cache[idx] = Some(computed);
    computed
}

fn reference_n_count(index: &dyn ReferenceIndex, location: GenomeLocation, length: usize) -> u32 {
    match index.reference_slice(location, length) {
        Some(slice) => slice
            .iter()
            .filter(|&&b| !matches!(b, b'A' | b'C' | b'G' | b'T' | b'a' | b'c' | b'g' | b't'))
            .count() as u32,
        None => u32::MAX,
    }
}

/// Collapse equal locations, summing their seed votes. Returns the merged
/// length; the tail past it is garbage.
fn merge_adjacent(candidates: &mut [Candidate]) -> usize {
    if candidates.is_empty() {
        return 0;
    }
    let mut out = 0;
    for i in 1..candidates.len() {
        if candidates[i].location == candidates[out].location {
            candidates[out].seed_hits += candidates[i].seed_hits;
        } else {
            out += 1;
            candidates[out] = candidates[i];
        }
    }
    out + 1
}
