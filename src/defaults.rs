// src/defaults.rs

// Pairing Constants
pub const DEFAULT_MIN_SPACING: u32 = 50;
pub const DEFAULT_MAX_SPACING: u32 = 1000;

// Barcode / Cluster Constants
pub const DEFAULT_MAX_BARCODE_SIZE: usize = 60_000;
pub const DEFAULT_MIN_PAIRS_PER_CLUSTER: usize = 10;
pub const DEFAULT_MAX_CLUSTER_SPAN: u64 = 100_000;

// Seeding Constants
pub const DEFAULT_INTERSECTING_ALIGNER_MAX_HITS: usize = 2_000;
pub const DEFAULT_MAX_CANDIDATE_POOL_SIZE: usize = 1_048_576;

// Scoring Constants
pub const DEFAULT_MAX_EDIT_DISTANCE: u32 = 14;
pub const DEFAULT_EXTRA_SEARCH_DEPTH: u32 = 2;

// Input Constants
pub const DEFAULT_MIN_READ_LENGTH: usize = 50;
pub const MAX_READ_LENGTH: usize = 400;
pub const NUM_READS_PER_PAIR: usize = 2;

// Secondary-result buffers start at this capacity and double on overflow
pub const INITIAL_SECONDARY_BUFFER_SIZE: usize = 32;
