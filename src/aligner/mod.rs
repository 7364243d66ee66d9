//! The alignment core: single-pair aligners and the per-barcode orchestrator
//! that drives them in lockstep.

pub mod cluster;
pub mod pair;

pub use cluster::{BarcodeBatch, ClusterAligner, ClusterMap, PairPhase, PairState};
pub use pair::{Candidate, PairAligner, PairScratch, ScoreOutcome, SeedSummary};
