//! Input and output interfaces for the worker loop.
//!
//! Suppliers hand the driver complete read pairs, grouped by barcode when the
//! upstream format carries one; writers take finished result sets. Both are
//! consumed through traits so the core stays independent of file formats.
//! `ChannelPairSupplier`/`ChannelPairWriter` bridge to a feeder or drainer
//! thread over bounded channels; the Vec-backed pair are for tests and small
//! batch jobs.

use crossbeam_channel::{bounded, Receiver, Sender};

use crate::read::ReadPair;
use crate::results::{PairedAlignmentResult, SingleAlignmentResult};

/// Source of read pairs; `None` signals end-of-stream. Blocking is allowed.
pub trait PairSupplier {
    fn next_pair(&mut self) -> Option<ReadPair>;
}

/// Sink for one pair's results: the paired records (primary first when
/// `first_is_primary`), plus each read's single-end secondaries.
pub trait PairWriter {
    fn write_pairs(
        &mut self,
        pair: &ReadPair,
        paired_results: &[PairedAlignmentResult],
        single_results: [&[SingleAlignmentResult]; 2],
        first_is_primary: bool,
    );
}

/// In-memory supplier over a pre-built list of pairs.
pub struct VecPairSupplier {
    pairs: std::vec::IntoIter<ReadPair>,
}

impl VecPairSupplier {
    pub fn new(pairs: Vec<ReadPair>) -> Self {
        VecPairSupplier {
            pairs: pairs.into_iter(),
        }
    }
}

impl PairSupplier for VecPairSupplier {
    fn next_pair(&mut self) -> Option<ReadPair> {
        self.pairs.next()
    }
}

/// Supplier fed by another thread over a bounded channel. The worker blocks
/// when the feeder falls behind; the stream ends when the sender is dropped.
pub struct ChannelPairSupplier {
    receiver: Receiver<ReadPair>,
}

impl ChannelPairSupplier {
    /// Create a channel-backed supplier with the given buffer depth.
    pub fn with_capacity(capacity: usize) -> (Sender<ReadPair>, ChannelPairSupplier) {
        let (sender, receiver) = bounded(capacity);
        (sender, ChannelPairSupplier { receiver })
    }
}

impl PairSupplier for ChannelPairSupplier {
    fn next_pair(&mut self) -> Option<ReadPair> {
        self.receiver.recv().ok()
    }
}

/// Everything a writer was handed for one pair, captured by value.
#[derive(Debug, Clone, PartialEq)]
pub struct EmittedPair {
    pub template: String,
    pub barcode: Vec<u8>,
    pub paired_results: Vec<PairedAlignmentResult>,
    pub single_results: [Vec<SingleAlignmentResult>; 2],
    pub first_is_primary: bool,
}

fn capture(
    pair: &ReadPair,
    paired_results: &[PairedAlignmentResult],
    single_results: [&[SingleAlignmentResult]; 2],
    first_is_primary: bool,
) -> EmittedPair {
    EmittedPair {
        template: pair.read(0).id().to_string(),
        barcode: pair.barcode.clone(),
        paired_results: paired_results.to_vec(),
        single_results: [single_results[0].to_vec(), single_results[1].to_vec()],
        first_is_primary,
    }
}

/// Writer that keeps every emission in memory, in arrival order.
#[derive(Default)]
pub struct CollectingPairWriter {
    pub emitted: Vec<EmittedPair>,
}

impl CollectingPairWriter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PairWriter for CollectingPairWriter {
    fn write_pairs(
        &mut self,
        pair: &ReadPair,
        paired_results: &[PairedAlignmentResult],
        single_results: [&[SingleAlignmentResult]; 2],
        first_is_primary: bool,
    ) {
        self.emitted
            .push(capture(pair, paired_results, single_results, first_is_primary));
    }
}

/// Writer that forwards emissions to a drainer thread over a bounded
/// channel, applying back-pressure to the worker when the drainer lags.
pub struct ChannelPairWriter {
    sender: Sender<EmittedPair>,
}

impl ChannelPairWriter {
    pub fn with_capacity(capacity: usize) -> (ChannelPairWriter, Receiver<EmittedPair>) {
        let (sender, receiver) = bounded(capacity);
        (ChannelPairWriter { sender }, receiver)
    }
}

impl PairWriter for ChannelPairWriter {
    fn write_pairs(
        &mut self,
        pair: &ReadPair,
        paired_results: &[PairedAlignmentResult],
        single_results: [&[SingleAlignmentResult]; 2],
        first_is_primary: bool,
    ) {
        // A closed receiver means the drainer is gone; results are dropped,
        // matching a writer that failed mid-stream.
        let _ = self
            .sender
            .send(capture(pair, paired_results, single_results, first_is_primary));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::read::Read;

    fn sample_pair(id: usize) -> ReadPair {
        ReadPair::new(
            Read::without_qualities(format!("frag{}/1", id), b"ACGT".repeat(16)),
            Read::without_qualities(format!("frag{}/2", id), b"ACGT".repeat(16)),
            b"BX01".to_vec(),
        )
    }

    #[test]
    fn test_vec_supplier_drains_in_order() {
        let mut supplier = VecPairSupplier::new(vec![sample_pair(0), sample_pair(1)]);
        assert_eq!(supplier.next_pair().unwrap().read(0).id(), "frag0/1");
        assert_eq!(supplier.next_pair().unwrap().read(0).id(), "frag1/1");
        assert!(supplier.next_pair().is_none());
    }

    #[test]
    fn test_channel_supplier_ends_when_sender_drops() {
        let (sender, mut supplier) = ChannelPairSupplier::with_capacity(4);
        sender.send(sample_pair(7)).unwrap();
        drop(sender);
        assert!(supplier.next_pair().is_some());
        assert!(supplier.next_pair().is_none());
    }

    #[test]
    fn test_collecting_writer_captures_everything() {
        let mut writer = CollectingPairWriter::new();
        let pair = sample_pair(3);
        let results = vec![PairedAlignmentResult::not_found()];
        writer.write_pairs(&pair, &results, [&[], &[]], true);
        assert_eq!(writer.emitted.len(), 1);
        assert_eq!(writer.emitted[0].template, "frag3/1");
        assert_eq!(writer.emitted[0].paired_results, results);
        assert!(writer.emitted[0].first_is_primary);
    }
}
