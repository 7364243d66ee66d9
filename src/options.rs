// src/options.rs
//
// Aligner configuration. One plain struct with documented fields and a
// Default impl carrying every published default; compound string values get
// parse_* helpers so front-ends stay thin.

use crate::defaults::*;
use crate::results::AlignmentStatus;

// Output filter categories. A zero category mask passes everything; a
// non-zero mask passes only the named categories.
pub const FILTER_UNALIGNED: u32 = 0x1;
pub const FILTER_SINGLE_HIT: u32 = 0x2;
pub const FILTER_MULTIPLE_HITS: u32 = 0x4;
pub const FILTER_TOO_SHORT: u32 = 0x8;
/// Require both mates to pass the category filter, not just one.
pub const FILTER_BOTH_MATES_MATCH: u32 = 0x10;

const FILTER_CATEGORY_MASK: u32 = FILTER_UNALIGNED | FILTER_SINGLE_HIT | FILTER_MULTIPLE_HITS | FILTER_TOO_SHORT;

/// Aligner options.
#[derive(Debug, Clone)]
pub struct AlignerOptions {
    // Paired-end spacing
    pub min_spacing: u32, // Lower bound of a concordant insert
    pub max_spacing: u32, // Upper bound of a concordant insert
    pub force_spacing: bool, // Reject one-sided pairs

    // Barcode batching and cluster inference
    pub max_barcode_size: usize,       // Pairs per batch cap
    pub min_pairs_per_cluster: usize,  // Bucket count needed to form a cluster
    pub max_cluster_span: u64,         // Cluster bucket width in bases

    // Seeding and candidate management
    pub intersecting_aligner_max_hits: usize, // Skip seeds more popular than this
    pub max_candidate_pool_size: usize,       // Shared candidate pool capacity

    // Scoring
    pub max_edit_distance: u32,   // Per-read edit allowance; also the N-count cap
    pub extra_search_depth: u32,  // Additional edit slack when scoring candidates

    // Secondary alignments
    pub max_secondary_additional_edit_distance: i32, // Negative disables secondaries
    pub max_secondary_alignments: usize,             // Global cap on emitted secondaries
    pub max_secondary_alignments_per_contig: i32,    // Negative disables the per-contig cap

    // Output filtering
    pub filter_flags: u32,

    // Input handling
    pub quickly_drop_unpaired_reads: bool, // Supplier-side: discard mate-less records
    pub ignore_mismatched_ids: bool,       // Tolerate mate-id mismatches
    pub min_read_length: usize,            // Usefulness threshold

    // Worker control
    pub num_workers: usize,
    pub use_timing_barrier: bool, // Sync workers after their initial allocation
}

impl Default for AlignerOptions {
    fn default() -> Self {
        AlignerOptions {
            min_spacing: DEFAULT_MIN_SPACING,
            max_spacing: DEFAULT_MAX_SPACING,
            force_spacing: false,
            max_barcode_size: DEFAULT_MAX_BARCODE_SIZE,
            min_pairs_per_cluster: DEFAULT_MIN_PAIRS_PER_CLUSTER,
            max_cluster_span: DEFAULT_MAX_CLUSTER_SPAN,
            intersecting_aligner_max_hits: DEFAULT_INTERSECTING_ALIGNER_MAX_HITS,
            max_candidate_pool_size: DEFAULT_MAX_CANDIDATE_POOL_SIZE,
            max_edit_distance: DEFAULT_MAX_EDIT_DISTANCE,
            extra_search_depth: DEFAULT_EXTRA_SEARCH_DEPTH,
            max_secondary_additional_edit_distance: -1,
            max_secondary_alignments: i32::MAX as usize,
            max_secondary_alignments_per_contig: -1,
            filter_flags: 0,
            quickly_drop_unpaired_reads: true,
            ignore_mismatched_ids: false,
            min_read_length: DEFAULT_MIN_READ_LENGTH,
            num_workers: 1,
            use_timing_barrier: false,
        }
    }
}

impl AlignerOptions {
    /// Check the cross-field constraints that a front-end cannot express.
    pub fn validate(&self) -> Result<(), String> {
        if self.min_spacing > self.max_spacing {
            return Err(format!(
                "min spacing {} exceeds max spacing {}",
                self.min_spacing, self.max_spacing
            ));
        }
        if self.max_barcode_size == 0 {
            return Err("max barcode size must be at least 1".to_string());
        }
        if self.max_cluster_span == 0 {
            return Err("cluster span must be at least 1 base".to_string());
        }
        if self.max_candidate_pool_size == 0 {
            return Err("candidate pool must hold at least 1 entry".to_string());
        }
        Ok(())
    }

    /// Parse a spacing pair from a comma-separated string (e.g. "50,1000").
    pub fn parse_spacing(s: &str) -> Result<(u32, u32), String> {
        let parts: Vec<&str> = s.split(',').collect();
        if parts.len() != 2 {
            return Err(format!("Spacing must be INT,INT: {}", s));
        }
        let min = parts[0]
            .trim()
            .parse::<u32>()
            .map_err(|_| format!("Invalid min spacing: {}", parts[0]))?;
        let max = parts[1]
            .trim()
            .parse::<u32>()
            .map_err(|_| format!("Invalid max spacing: {}", parts[1]))?;
        if min > max {
            return Err(format!("Min spacing {} exceeds max spacing {}", min, max));
        }
        Ok((min, max))
    }

    /// Whether secondary alignments are requested at all.
    #[inline]
    pub fn secondaries_enabled(&self) -> bool {
        self.max_secondary_additional_edit_distance >= 0
    }

    /// Initial logical capacity of a secondary-result buffer; grows by
    /// doubling when a pair overflows it.
    #[inline]
    pub fn initial_secondary_buffer_size(&self) -> usize {
        if self.secondaries_enabled() {
            INITIAL_SECONDARY_BUFFER_SIZE
        } else {
            0
        }
    }

    /// Output filter for one result of one read.
    ///
    /// `is_useless` marks reads that never entered alignment (too short or
    /// too many Ns); a secondary result implies the read aligned, so the
    /// too-short category never applies to one.
    pub fn pass_filter(&self, status: AlignmentStatus, is_useless: bool, is_secondary: bool) -> bool {
        let mask = self.filter_flags & FILTER_CATEGORY_MASK;
        if mask == 0 {
            return true;
        }
        let category = if is_useless && !is_secondary {
            FILTER_TOO_SHORT
        } else {
            match status {
                AlignmentStatus::SingleHit => FILTER_SINGLE_HIT,
                AlignmentStatus::MultipleHits => FILTER_MULTIPLE_HITS,
                AlignmentStatus::NotFound | AlignmentStatus::UnknownAlignment => FILTER_UNALIGNED,
            }
        };
        mask & category != 0
    }

    /// Combine the two per-mate filter verdicts.
    #[inline]
    pub fn combine_filter(&self, pass0: bool, pass1: bool) -> bool {
        if self.filter_flags & FILTER_BOTH_MATES_MATCH != 0 {
            pass0 && pass1
        } else {
            pass0 || pass1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_published_defaults() {
        let options = AlignerOptions::default();
        assert_eq!(options.min_spacing, 50);
        assert_eq!(options.max_spacing, 1000);
        assert!(!options.force_spacing);
        assert_eq!(options.max_barcode_size, 60_000);
        assert_eq!(options.min_pairs_per_cluster, 10);
        assert_eq!(options.max_cluster_span, 100_000);
        assert_eq!(options.intersecting_aligner_max_hits, 2_000);
        assert_eq!(options.max_secondary_additional_edit_distance, -1);
        assert_eq!(options.filter_flags, 0);
        assert!(options.quickly_drop_unpaired_reads);
        assert!(!options.ignore_mismatched_ids);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_parse_spacing() {
        assert_eq!(AlignerOptions::parse_spacing("50,1000").unwrap(), (50, 1000));
        assert_eq!(AlignerOptions::parse_spacing("1, 2").unwrap(), (1, 2));
        assert!(AlignerOptions::parse_spacing("50").is_err());
        assert!(AlignerOptions::parse_spacing("x,y").is_err());
        assert!(AlignerOptions::parse_spacing("1000,50").is_err());
    }

    #[test]
    fn test_secondary_buffer_sizing() {
        let mut options = AlignerOptions::default();
        assert!(!options.secondaries_enabled());
        assert_eq!(options.initial_secondary_buffer_size(), 0);
        options.max_secondary_additional_edit_distance = 3;
        assert!(options.secondaries_enabled());
        assert_eq!(options.initial_secondary_buffer_size(), 32);
    }

    #[test]
    fn test_filter_defaults_pass_everything() {
        let options = AlignerOptions::default();
        for status in [
            AlignmentStatus::SingleHit,
            AlignmentStatus::MultipleHits,
            AlignmentStatus::NotFound,
        ] {
            assert!(options.pass_filter(status, false, false));
            assert!(options.pass_filter(status, true, false));
        }
    }

    #[test]
    fn test_filter_categories() {
        let mut options = AlignerOptions::default();
        options.filter_flags = FILTER_SINGLE_HIT;
        assert!(options.pass_filter(AlignmentStatus::SingleHit, false, false));
        assert!(!options.pass_filter(AlignmentStatus::NotFound, false, false));
        assert!(!options.pass_filter(AlignmentStatus::SingleHit, true, false));
        // A secondary from a too-short-flagged read is judged by status.
        assert!(options.pass_filter(AlignmentStatus::SingleHit, true, true));
    }

    #[test]
    fn test_both_mates_combining() {
        let mut options = AlignerOptions::default();
        assert!(options.combine_filter(true, false));
        options.filter_flags |= FILTER_BOTH_MATES_MATCH;
        assert!(!options.combine_filter(true, false));
        assert!(options.combine_filter(true, true));
    }

    #[test]
    fn test_validation_rejects_inverted_spacing() {
        let mut options = AlignerOptions::default();
        options.min_spacing = 2000;
        assert!(options.validate().is_err());
    }
}
