//! Per-worker alignment statistics.
//!
//! Each worker owns one `AlignerStats` and mutates it without synchronization;
//! the driver reduces them additively at teardown. The 2-D histograms are flat
//! row-major arrays behind typed increment helpers, with log2 bucketing for
//! time, hit-count, and kernel-call axes.

use crate::results::MAX_MAPQ;

/// Distances are histogrammed up to this value and saturated beyond it.
pub const MAX_DISTANCE: usize = 1000;
/// Edit-distance scores saturate here in the pairwise score histogram.
pub const MAX_SCORE: usize = 15;

pub const N_TIME_BUCKETS: usize = 32;
pub const N_HITS_BUCKETS: usize = 32;
pub const N_LV_CALLS_BUCKETS: usize = 32;

const N_MAPQ_BINS: usize = MAX_MAPQ as usize + 1;
const N_SCORE_BINS: usize = MAX_SCORE + 1;

/// Log2 bucket of a counter value: 0 for 0, otherwise the bit length of the
/// value, capped at `n_buckets - 1`. Pure so the stage code can precompute
/// buckets without touching the stats object.
#[inline]
pub fn log2_bucket(value: u64, n_buckets: usize) -> usize {
    let bits = (64 - value.leading_zeros()) as usize;
    bits.min(n_buckets - 1)
}

#[derive(Debug, Clone)]
pub struct AlignerStats {
    // Scalar counters
    pub total_reads: u64,
    pub useless_reads: u64,
    pub single_hits: u64,
    pub multi_hits: u64,
    pub not_found: u64,
    pub filtered: u64,
    pub extra_alignments: u64,
    pub aligned_as_pairs: u64,
    pub same_complement: u64,
    pub lv_calls: u64,

    // 1-D histograms
    mapq_histogram: Vec<u64>,    // N_MAPQ_BINS
    distance_counts: Vec<u64>,   // MAX_DISTANCE + 1

    // 2-D histograms, flat row-major
    score_counts: Vec<u64>,           // N_SCORE_BINS x N_SCORE_BINS, upper triangular
    align_together_by_mapq: Vec<u64>, // N_MAPQ_BINS x N_TIME_BUCKETS
    total_time_by_mapq: Vec<u64>,     // N_MAPQ_BINS x N_TIME_BUCKETS (nanos summed)
    small_hits_by_time: Vec<u64>,     // N_HITS_BUCKETS x N_TIME_BUCKETS
    lv_calls_by_time: Vec<u64>,       // N_LV_CALLS_BUCKETS x N_TIME_BUCKETS
    mapq_by_lv_calls: Vec<u64>,       // N_MAPQ_BINS x N_LV_CALLS_BUCKETS
    mapq_by_small_hits: Vec<u64>,     // N_MAPQ_BINS x N_HITS_BUCKETS
}

impl Default for AlignerStats {
    fn default() -> Self {
        Self::new()
    }
}

impl AlignerStats {
    pub fn new() -> Self {
        AlignerStats {
            total_reads: 0,
            useless_reads: 0,
            single_hits: 0,
            multi_hits: 0,
            not_found: 0,
            filtered: 0,
            extra_alignments: 0,
            aligned_as_pairs: 0,
            same_complement: 0,
            lv_calls: 0,
            mapq_histogram: vec![0; N_MAPQ_BINS],
            distance_counts: vec![0; MAX_DISTANCE + 1],
            score_counts: vec![0; N_SCORE_BINS * N_SCORE_BINS],
            align_together_by_mapq: vec![0; N_MAPQ_BINS * N_TIME_BUCKETS],
            total_time_by_mapq: vec![0; N_MAPQ_BINS * N_TIME_BUCKETS],
            small_hits_by_time: vec![0; N_HITS_BUCKETS * N_TIME_BUCKETS],
            lv_calls_by_time: vec![0; N_LV_CALLS_BUCKETS * N_TIME_BUCKETS],
            mapq_by_lv_calls: vec![0; N_MAPQ_BINS * N_LV_CALLS_BUCKETS],
            mapq_by_small_hits: vec![0; N_MAPQ_BINS * N_HITS_BUCKETS],
        }
    }

    /// Record the distance between the two ends of a concordant pair,
    /// saturating at `MAX_DISTANCE`.
    pub fn increment_distance(&mut self, distance: u64) {
        let bin = (distance as usize).min(MAX_DISTANCE);
        self.distance_counts[bin] += 1;
    }

    pub fn distance_count(&self, distance: usize) -> u64 {
        self.distance_counts[distance.min(MAX_DISTANCE)]
    }

    /// Record a pair of edit-distance scores. The pair is normalized so only
    /// the `s0 <= s1` half of the matrix is ever populated.
    pub fn increment_score(&mut self, score0: u32, score1: u32) {
        let mut s0 = (score0 as usize).min(MAX_SCORE);
        let mut s1 = (score1 as usize).min(MAX_SCORE);
        if s0 > s1 {
            std::mem::swap(&mut s0, &mut s1);
        }
        self.score_counts[s0 * N_SCORE_BINS + s1] += 1;
    }

    pub fn score_count(&self, score0: usize, score1: usize) -> u64 {
        self.score_counts[score0.min(MAX_SCORE) * N_SCORE_BINS + score1.min(MAX_SCORE)]
    }

    pub fn increment_mapq(&mut self, mapq: u8) {
        self.mapq_histogram[(mapq as usize).min(N_MAPQ_BINS - 1)] += 1;
    }

    pub fn mapq_count(&self, mapq: u8) -> u64 {
        self.mapq_histogram[(mapq as usize).min(N_MAPQ_BINS - 1)]
    }

    /// Record a jointly-scored pair: its MAPQ, the time it took, and how much
    /// work (candidate hits, edit-distance kernel calls) it burned.
    pub fn record_align_together(&mut self, mapq: u8, nanos: u64, n_small_hits: u32, n_lv_calls: u32) {
        let mapq_bin = (mapq as usize).min(N_MAPQ_BINS - 1);
        let time_bucket = log2_bucket(nanos, N_TIME_BUCKETS);
        let hits_bucket = log2_bucket(n_small_hits as u64, N_HITS_BUCKETS);
        let lv_bucket = log2_bucket(n_lv_calls as u64, N_LV_CALLS_BUCKETS);

        self.align_together_by_mapq[mapq_bin * N_TIME_BUCKETS + time_bucket] += 1;
        self.total_time_by_mapq[mapq_bin * N_TIME_BUCKETS + time_bucket] += nanos;
        self.small_hits_by_time[hits_bucket * N_TIME_BUCKETS + time_bucket] += 1;
        self.lv_calls_by_time[lv_bucket * N_TIME_BUCKETS + time_bucket] += 1;
        self.mapq_by_lv_calls[mapq_bin * N_LV_CALLS_BUCKETS + lv_bucket] += 1;
        self.mapq_by_small_hits[mapq_bin * N_HITS_BUCKETS + hits_bucket] += 1;
    }

    /// Additive reduction; workers are merged into one stats object at
    /// teardown.
    pub fn add(&mut self, other: &AlignerStats) {
        self.total_reads += other.total_reads;
        self.useless_reads += other.useless_reads;
        self.single_hits += other.single_hits;
        self.multi_hits += other.multi_hits;
        self.not_found += other.not_found;
        self.filtered += other.filtered;
        self.extra_alignments += other.extra_alignments;
        self.aligned_as_pairs += other.aligned_as_pairs;
        self.same_complement += other.same_complement;
        self.lv_calls += other.lv_calls;

        fn add_into(dst: &mut [u64], src: &[u64]) {
            for (d, s) in dst.iter_mut().zip(src) {
                *d += s;
            }
        }
        add_into(&mut self.mapq_histogram, &other.mapq_histogram);
        add_into(&mut self.distance_counts, &other.distance_counts);
        add_into(&mut self.score_counts, &other.score_counts);
        add_into(&mut self.align_together_by_mapq, &other.align_together_by_mapq);
        add_into(&mut self.total_time_by_mapq, &other.total_time_by_mapq);
        add_into(&mut self.small_hits_by_time, &other.small_hits_by_time);
        add_into(&mut self.lv_calls_by_time, &other.lv_calls_by_time);
        add_into(&mut self.mapq_by_lv_calls, &other.mapq_by_lv_calls);
        add_into(&mut self.mapq_by_small_hits, &other.mapq_by_small_hits);
    }

    /// Dump a human-oriented summary through the logging facade.
    pub fn log_summary(&self) {
        log::info!(
            "aligned {} reads: {} single-hit, {} multi-hit, {} not found, {} useless, {} filtered",
            self.total_reads,
            self.single_hits,
            self.multi_hits,
            self.not_found,
            self.useless_reads,
            self.filtered
        );
        log::info!(
            "{} reads aligned as pairs, {} same-complement pairs, {} extra alignments, {} LV calls",
            self.aligned_as_pairs,
            self.same_complement,
            self.extra_alignments,
            self.lv_calls
        );
        let aligned_mass: u64 = self.mapq_histogram.iter().sum();
        if aligned_mass > 0 {
            let ge30: u64 = self.mapq_histogram[30..].iter().sum();
            log::info!(
                "MAPQ >= 30 for {:.1}% of aligned reads",
                100.0 * ge30 as f64 / aligned_mass as f64
            );
        }
    }
}
