//! Per-barcode cluster alignment core for 10x linked-read paired-end data.
//!
//! Reads carrying the same molecular barcode originate from a small number of
//! long source molecules. This crate batches all pairs sharing a barcode into
//! one cooperative work unit, aligns them with a three-stage seed / pair-score
//! / single-score pipeline over an arena of per-pair aligners, and uses the
//! resulting location clusters as a prior to confirm and rescue placements.
//!
//! Sequence decoding, index construction, the edit-distance kernel, and
//! output serialization are consumed through the traits in [`index`],
//! [`distance`], and [`driver::supply`]; small in-memory implementations of
//! each are included so the pipeline runs end-to-end out of the box.

pub mod aligner;
pub mod arena;
pub mod defaults;
pub mod distance;
pub mod driver;
pub mod genome;
pub mod index;
pub mod options;
pub mod read;
pub mod results;
pub mod stats;

pub use aligner::{BarcodeBatch, ClusterAligner, ClusterMap, PairPhase, PairState};
pub use driver::supply::{
    ChannelPairSupplier, ChannelPairWriter, CollectingPairWriter, EmittedPair, PairSupplier,
    PairWriter, VecPairSupplier,
};
pub use driver::{run_workers, BatchDriver, DriverError, DriverExtension};
pub use genome::{GenomeLocation, INVALID_GENOME_LOCATION};
pub use options::AlignerOptions;
pub use read::{Read, ReadPair};
pub use results::{AlignmentStatus, PairedAlignmentResult, SingleAlignmentResult};
pub use stats::AlignerStats;
