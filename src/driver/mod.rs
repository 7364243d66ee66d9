//! Per-worker batch loop.
//!
//! Each worker thread owns one `BatchDriver`: it pulls pairs from its
//! supplier until the barcode changes (or the batch cap is hit), drives the
//! cluster aligner's three stages over the batch — doubling any overflowed
//! secondary buffer between retries — then emits results in ingestion order
//! and resets the arena for the next barcode.
//!
//! Workers share nothing mutable: the index and options are read-only, stats
//! are per-worker and reduced additively when `run_workers` joins the
//! threads.

pub mod supply;

use std::fmt;
use std::sync::Barrier;
use std::thread;

use crate::aligner::cluster::{BarcodeBatch, ClusterAligner, PairPhase};
use crate::arena::BarcodeArena;
use crate::distance::EditDistanceKernel;
use crate::genome::genome_distance;
use crate::index::ReferenceIndex;
use crate::options::AlignerOptions;
use crate::read::ReadPair;
use crate::results::{AlignmentStatus, PairedAlignmentResult, SingleAlignmentResult};
use crate::stats::AlignerStats;
use self::supply::{PairSupplier, PairWriter};

/// Fatal input-structure problems; everything recoverable is handled inside
/// the stages.
#[derive(Debug)]
pub enum DriverError {
    /// The two reads of a pair do not name the same template.
    MismatchedReadIds { id0: String, id1: String },
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriverError::MismatchedReadIds { id0, id1 } => write!(
                f,
                "unmatched read ids '{}' and '{}'; enable ignore_mismatched_ids to proceed",
                id0, id1
            ),
        }
    }
}

impl std::error::Error for DriverError {}

/// Hook that can take over a worker's whole iteration (replay, sampling,
/// diagnostics). Returning true means the extension consumed the stream.
pub trait DriverExtension: Sync {
    fn run_iteration(&self, supplier: &mut dyn PairSupplier, writer: &mut dyn PairWriter) -> bool;
}

pub struct BatchDriver<'a> {
    options: &'a AlignerOptions,
    aligner: ClusterAligner<'a>,
    batch: BarcodeBatch,
    stats: AlignerStats,
    pending: Option<ReadPair>,
    current_barcode: Vec<u8>,
    barcode_active: bool,
    extension: Option<&'a dyn DriverExtension>,
}

impl<'a> BatchDriver<'a> {
    pub fn new(
        index: &'a dyn ReferenceIndex,
        kernel: &'a dyn EditDistanceKernel,
        options: &'a AlignerOptions,
    ) -> Self {
        BatchDriver {
            options,
            aligner: ClusterAligner::new(index, kernel, options),
            batch: BarcodeBatch::new(options),
            stats: AlignerStats::new(),
            pending: None,
            current_barcode: Vec::new(),
            barcode_active: false,
            extension: None,
        }
    }

    pub fn with_extension(
        index: &'a dyn ReferenceIndex,
        kernel: &'a dyn EditDistanceKernel,
        options: &'a AlignerOptions,
        extension: &'a dyn DriverExtension,
    ) -> Self {
        let mut driver = BatchDriver::new(index, kernel, options);
        driver.extension = Some(extension);
        driver
    }

    pub fn stats(&self) -> &AlignerStats {
        &self.stats
    }

    pub fn into_stats(self) -> AlignerStats {
        self.stats
    }

    /// The driver's batch, for inspection after a run.
    pub fn batch(&self) -> &BarcodeBatch {
        &self.batch
    }

    /// Consume the supplier to end-of-stream, one barcode batch at a time.
    pub fn run(
        &mut self,
        supplier: &mut dyn PairSupplier,
        writer: &mut dyn PairWriter,
    ) -> Result<(), DriverError> {
        if let Some(extension) = self.extension {
            if extension.run_iteration(supplier, writer) {
                return Ok(());
            }
        }

        loop {
            let more = self.ingest_barcode(supplier, writer)?;
            if !self.batch.is_empty() {
                log::debug!(
                    "aligning barcode {:?}: {} pairs",
                    String::from_utf8_lossy(&self.current_barcode),
                    self.batch.len()
                );
                self.align_barcode();
                self.emit_results(writer);
                self.aligner.finish_barcode();
                self.batch.clear();
            }
            self.barcode_active = false;
            if !more && self.pending.is_none() {
                break;
            }
        }

        self.stats.lv_calls = self.aligner.locations_scored() as u64;
        self.stats.log_summary();
        Ok(())
    }

    /// Fill the batch with pairs sharing one barcode. Returns false only at
    /// end-of-stream.
    fn ingest_barcode(
        &mut self,
        supplier: &mut dyn PairSupplier,
        writer: &mut dyn PairWriter,
    ) -> Result<bool, DriverError> {
        if let Some(pair) = self.pending.take() {
            self.accept_pair(pair, writer)?;
        }
        loop {
            if self.batch.len() >= self.options.max_barcode_size {
                return Ok(true);
            }
            let pair = match supplier.next_pair() {
                Some(pair) => pair,
                None => return Ok(false),
            };
            if self.barcode_active && pair.barcode != self.current_barcode {
                self.pending = Some(pair);
                return Ok(true);
            }
            self.accept_pair(pair, writer)?;
        }
    }

    /// Validate one pair and either queue it or resolve it immediately.
    fn accept_pair(
        &mut self,
        pair: ReadPair,
        writer: &mut dyn PairWriter,
    ) -> Result<(), DriverError> {
        if !self.options.ignore_mismatched_ids && !pair.ids_match() {
            return Err(DriverError::MismatchedReadIds {
                id0: pair.read(0).id().to_string(),
                id1: pair.read(1).id().to_string(),
            });
        }
        self.stats.total_reads += 2;
        if !self.barcode_active {
            self.barcode_active = true;
            self.current_barcode.clear();
            self.current_barcode.extend_from_slice(&pair.barcode);
        }

        let useful = [
            pair.read(0)
                .is_useful(self.options.min_read_length, self.options.max_edit_distance),
            pair.read(1)
                .is_useful(self.options.min_read_length, self.options.max_edit_distance),
        ];
        if !useful[0] && !useful[1] {
            // Nothing to align; resolve without entering the pipeline.
            let result = PairedAlignmentResult::not_found();
            let pass0 = self.options.pass_filter(result.status[0], true, false);
            let pass1 = self.options.pass_filter(result.status[1], true, false);
            if self.options.combine_filter(pass0, pass1) {
                let no_singles: [&[SingleAlignmentResult]; 2] = [&[], &[]];
                writer.write_pairs(&pair, std::slice::from_ref(&result), no_singles, true);
                self.stats.useless_reads += 2;
            } else {
                self.stats.filtered += 2;
            }
            return Ok(());
        }

        self.batch.push(pair, useful);
        Ok(())
    }

    /// Run the three stages, regrowing overflowed buffers between retries.
    fn align_barcode(&mut self) {
        if self.aligner.align_first_stage(&mut self.batch) {
            log::debug!("batch produced no candidates; emitting unaligned records");
            return;
        }
        loop {
            if self.aligner.align_second_stage(&mut self.batch) {
                break;
            }
            self.grow_paired_buffers();
        }
        loop {
            if self.aligner.align_third_stage(&mut self.batch) {
                break;
            }
            self.grow_single_buffers();
        }
    }

    fn grow_paired_buffers(&mut self) {
        for slot in 0..self.batch.len() {
            let state = self.batch.state_mut(slot);
            if state.phase == PairPhase::PairedOverflow {
                debug_assert!(state.n_secondary > state.max_paired_secondary);
                state.max_paired_secondary *= 2;
                state.reserve_buffers();
                log::debug!(
                    "slot {}: paired-secondary buffer grown to {}",
                    slot,
                    state.max_paired_secondary
                );
            }
        }
    }

    fn grow_single_buffers(&mut self) {
        for slot in 0..self.batch.len() {
            let state = self.batch.state_mut(slot);
            if state.phase == PairPhase::SingleOverflow {
                debug_assert!(state.n_single_needed > state.max_single_secondary);
                state.max_single_secondary *= 2;
                state.reserve_buffers();
                log::debug!(
                    "slot {}: single-secondary buffer grown to {}",
                    slot,
                    state.max_single_secondary
                );
            }
        }
    }

    /// Write out every pair of the batch in ingestion order and fold its
    /// outcome into the stats.
    fn emit_results(&mut self, writer: &mut dyn PairWriter) {
        let options = self.options;
        let stats = &mut self.stats;
        let (pairs, states) = self.batch.parts_mut();

        for (slot, state) in states.iter_mut().enumerate() {
            let pair = &pairs[slot];
            let useful = state.useful;

            {
                let primary = &mut state.paired_results[0];
                if options.force_spacing
                    && primary.status[0].is_one_location() != primary.status[1].is_one_location()
                {
                    // Either both ends place or neither does.
                    primary.clear_placement();
                }
            }

            let mut first_is_primary = true;
            {
                let mut idx = 0;
                state.paired_results.retain(|result| {
                    let is_secondary = idx != 0;
                    let pass0 = options.pass_filter(result.status[0], !useful[0], is_secondary);
                    let pass1 = options.pass_filter(result.status[1], !useful[1], is_secondary);
                    let keep = options.combine_filter(pass0, pass1);
                    if !keep && idx == 0 {
                        first_is_primary = false;
                    }
                    idx += 1;
                    keep
                });
            }

            let n0 = state.n_single_secondary[0];
            let mut kept = [0usize; 2];
            {
                let mut pos = 0;
                state.single_results.retain(|single| {
                    let which = usize::from(pos >= n0);
                    pos += 1;
                    let keep = options.pass_filter(single.status, false, true);
                    if keep {
                        kept[which] += 1;
                    }
                    keep
                });
            }
            state.n_single_secondary = kept;

            let results = &state.paired_results;
            let singles = &state.single_results;
            let single_slices: [&[SingleAlignmentResult]; 2] =
                [&singles[..kept[0]], &singles[kept[0]..]];
            writer.write_pairs(pair, results, single_slices, first_is_primary);

            let n_secondary_out = if first_is_primary {
                results.len().saturating_sub(1)
            } else {
                results.len()
            };
            stats.extra_alignments += n_secondary_out as u64;

            if first_is_primary {
                update_pair_stats(stats, &results[0], useful);
            } else {
                stats.filtered += 2;
            }
        }
    }
}

/// Fold one emitted primary into the per-worker stats.
fn update_pair_stats(stats: &mut AlignerStats, primary: &PairedAlignmentResult, useful: [bool; 2]) {
    for which in 0..2 {
        if useful[which] {
            match primary.status[which] {
                AlignmentStatus::SingleHit => stats.single_hits += 1,
                AlignmentStatus::MultipleHits => stats.multi_hits += 1,
                _ => stats.not_found += 1,
            }
            if primary.status[which] != AlignmentStatus::NotFound {
                stats.increment_mapq(primary.mapq[which]);
            }
        } else {
            stats.useless_reads += 1;
        }
    }

    if primary.direction[0] == primary.direction[1] {
        stats.same_complement += 1;
    }
    if primary.status[0].is_one_location() && primary.status[1].is_one_location() {
        stats.increment_distance(
            genome_distance(primary.location[0], primary.location[1]).unsigned_abs(),
        );
        stats.increment_score(primary.score[0], primary.score[1]);
    }
    if primary.from_align_together {
        stats.record_align_together(
            primary.mapq[0].max(primary.mapq[1]),
            primary.nanos_in_align_together,
            primary.n_small_hits,
            primary.n_lv_calls,
        );
    }
    if primary.aligned_as_pair {
        stats.aligned_as_pairs += 2;
    }
}

/// Spawn one worker per lane, run them to end-of-stream, and reduce their
/// stats. With `use_timing_barrier` set, workers rendezvous after their
/// arena allocation so startup page faults don't skew timing runs.
pub fn run_workers<S, W>(
    index: &(dyn ReferenceIndex + Sync),
    kernel: &(dyn EditDistanceKernel + Sync),
    options: &AlignerOptions,
    lanes: Vec<(S, W)>,
) -> Result<AlignerStats, DriverError>
where
    S: PairSupplier + Send,
    W: PairWriter + Send,
{
    log::info!(
        "starting {} workers ({} MB arena each)",
        lanes.len(),
        BarcodeArena::reserve(options) >> 20
    );
    let barrier = Barrier::new(lanes.len());

    let results: Vec<Result<AlignerStats, DriverError>> = thread::scope(|scope| {
        let handles: Vec<_> = lanes
            .into_iter()
            .map(|(mut supplier, mut writer)| {
                let barrier = &barrier;
                scope.spawn(move || -> Result<AlignerStats, DriverError> {
                    let index: &dyn ReferenceIndex = index;
                    let kernel: &dyn EditDistanceKernel = kernel;
                    let mut driver = BatchDriver::new(index, kernel, options);
                    if options.use_timing_barrier {
                        barrier.wait();
                    }
                    driver.run(&mut supplier, &mut writer)?;
                    Ok(driver.into_stats())
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| match handle.join() {
                Ok(result) => result,
                Err(panic) => std::panic::resume_unwind(panic),
            })
            .collect()
    });

    let mut total = AlignerStats::new();
    for result in results {
        total.add(&result?);
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_driver_error_names_both_ids() {
        let err = DriverError::MismatchedReadIds {
            id0: "alpha/1".to_string(),
            id1: "beta/2".to_string(),
        };
        let message = format!("{}", err);
        assert!(message.contains("alpha/1"));
        assert!(message.contains("beta/2"));
    }
}
