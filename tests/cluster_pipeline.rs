//! End-to-end tests for the barcode batch pipeline: one driver, an in-memory
//! index, and synthetic linked reads.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use linked_align::aligner::PairPhase;
use linked_align::distance::LandauVishkin;
use linked_align::index::HashSeedIndex;
use linked_align::options::FILTER_SINGLE_HIT;
use linked_align::read::reverse_complement;
use linked_align::{
    AlignerOptions, AlignmentStatus, BatchDriver, ChannelPairWriter, CollectingPairWriter,
    DriverError, EmittedPair, Read, ReadPair, VecPairSupplier, INVALID_GENOME_LOCATION,
};

const SEED_LENGTH: usize = 16;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn synthetic_reference(length: usize, seed: u64) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(seed);
    let bases = b"ACGT";
    (0..length).map(|_| bases[rng.gen_range(0..4)]).collect()
}

fn test_options() -> AlignerOptions {
    let mut options = AlignerOptions::default();
    options.max_barcode_size = 64;
    options.max_candidate_pool_size = 1 << 16;
    options
}

/// A pair sourced from the reference: read 0 forward at `at0`, read 1
/// reverse-complemented from `at1`.
fn pair_at(reference: &[u8], id: usize, barcode: &[u8], at0: usize, at1: usize) -> ReadPair {
    let read0 = Read::without_qualities(
        format!("frag{}/1", id),
        reference[at0..at0 + 100].to_vec(),
    );
    let read1 = Read::without_qualities(
        format!("frag{}/2", id),
        reverse_complement(&reference[at1..at1 + 100]),
    );
    ReadPair::new(read0, read1, barcode.to_vec())
}

/// The deterministic projection of an emission (instrumentation timings
/// excluded).
#[allow(clippy::type_complexity)]
fn projection(
    emitted: &[EmittedPair],
) -> Vec<(String, Vec<([AlignmentStatus; 2], [u64; 2], [u32; 2], [u8; 2], bool)>, bool)> {
    emitted
        .iter()
        .map(|e| {
            (
                e.template.clone(),
                e.paired_results
                    .iter()
                    .map(|r| (r.status, r.location, r.score, r.mapq, r.aligned_as_pair))
                    .collect(),
                e.first_is_primary,
            )
        })
        .collect()
}

#[test]
fn test_empty_stream_touches_nothing() {
    init_logging();
    let index = HashSeedIndex::new(synthetic_reference(2000, 1), SEED_LENGTH).unwrap();
    let kernel = LandauVishkin;
    let options = test_options();
    let mut driver = BatchDriver::new(&index, &kernel, &options);
    let mut supplier = VecPairSupplier::new(Vec::new());
    let mut writer = CollectingPairWriter::new();

    driver.run(&mut supplier, &mut writer).unwrap();

    assert!(writer.emitted.is_empty());
    let stats = driver.stats();
    assert_eq!(stats.total_reads, 0);
    assert_eq!(stats.useless_reads, 0);
    assert_eq!(stats.lv_calls, 0);
}

#[test]
fn test_useless_pair_bypasses_alignment() {
    init_logging();
    let index = HashSeedIndex::new(synthetic_reference(2000, 2), SEED_LENGTH).unwrap();
    let kernel = LandauVishkin;
    let options = test_options();
    let mut driver = BatchDriver::new(&index, &kernel, &options);

    // Read 0 far below the length floor, read 1 nothing but Ns.
    let pair = ReadPair::new(
        Read::without_qualities("stub/1", b"ACGTACGTACGTACGTACGT".to_vec()),
        Read::without_qualities("stub/2", vec![b'N'; 100]),
        b"BX7".to_vec(),
    );
    let mut supplier = VecPairSupplier::new(vec![pair]);
    let mut writer = CollectingPairWriter::new();
    driver.run(&mut supplier, &mut writer).unwrap();

    let stats = driver.stats();
    assert_eq!(stats.total_reads, 2);
    assert_eq!(stats.useless_reads, 2);
    // The pair never reached the scoring stages.
    assert_eq!(stats.lv_calls, 0);

    assert_eq!(writer.emitted.len(), 1);
    let emission = &writer.emitted[0];
    assert_eq!(emission.paired_results.len(), 1);
    let result = &emission.paired_results[0];
    assert_eq!(result.status, [AlignmentStatus::NotFound; 2]);
    assert_eq!(result.location, [INVALID_GENOME_LOCATION; 2]);
}

#[test]
fn test_useless_pair_can_be_filtered_instead() {
    init_logging();
    let index = HashSeedIndex::new(synthetic_reference(2000, 2), SEED_LENGTH).unwrap();
    let kernel = LandauVishkin;
    let mut options = test_options();
    options.filter_flags = FILTER_SINGLE_HIT;
    let mut driver = BatchDriver::new(&index, &kernel, &options);

    let pair = ReadPair::new(
        Read::without_qualities("stub/1", b"ACGT".to_vec()),
        Read::without_qualities("stub/2", vec![b'N'; 100]),
        b"BX7".to_vec(),
    );
    let mut supplier = VecPairSupplier::new(vec![pair]);
    let mut writer = CollectingPairWriter::new();
    driver.run(&mut supplier, &mut writer).unwrap();

    assert!(writer.emitted.is_empty());
    assert_eq!(driver.stats().filtered, 2);
    assert_eq!(driver.stats().useless_reads, 0);
}

#[test]
fn test_mismatched_ids_are_fatal() {
    init_logging();
    let index = HashSeedIndex::new(synthetic_reference(2000, 3), SEED_LENGTH).unwrap();
    let kernel = LandauVishkin;
    let options = test_options();
    let mut driver = BatchDriver::new(&index, &kernel, &options);

    let pair = ReadPair::new(
        Read::without_qualities("read/1", b"ACGT".repeat(25)),
        Read::without_qualities("other/2", b"ACGT".repeat(25)),
        b"BX1".to_vec(),
    );
    let mut supplier = VecPairSupplier::new(vec![pair.clone()]);
    let mut writer = CollectingPairWriter::new();
    let err = driver.run(&mut supplier, &mut writer).unwrap_err();
    let message = format!("{}", err);
    assert!(message.contains("read/1"));
    assert!(message.contains("other/2"));
    assert!(matches!(err, DriverError::MismatchedReadIds { .. }));

    // The same input is accepted when mismatches are ignored.
    let mut options = test_options();
    options.ignore_mismatched_ids = true;
    let mut driver = BatchDriver::new(&index, &kernel, &options);
    let mut supplier = VecPairSupplier::new(vec![pair]);
    driver.run(&mut supplier, &mut writer).unwrap();
}

#[test]
fn test_single_concordant_pair() {
    init_logging();
    let reference = synthetic_reference(10_000, 4);
    let index = HashSeedIndex::new(reference.clone(), SEED_LENGTH).unwrap();
    let kernel = LandauVishkin;
    let options = test_options();
    let mut driver = BatchDriver::new(&index, &kernel, &options);

    let mut supplier = VecPairSupplier::new(vec![pair_at(&reference, 0, b"BX1", 2000, 2300)]);
    let mut writer = CollectingPairWriter::new();
    driver.run(&mut supplier, &mut writer).unwrap();

    assert_eq!(writer.emitted.len(), 1);
    let emission = &writer.emitted[0];
    assert!(emission.first_is_primary);
    assert_eq!(emission.paired_results.len(), 1);
    let primary = &emission.paired_results[0];
    assert_eq!(primary.status, [AlignmentStatus::SingleHit; 2]);
    assert_eq!(primary.location, [2000, 2300]);
    assert_eq!(primary.score, [0, 0]);
    assert!(primary.from_align_together);
    assert!(primary.aligned_as_pair);

    let stats = driver.stats();
    assert_eq!(stats.total_reads, 2);
    assert_eq!(stats.single_hits, 2);
    assert_eq!(stats.aligned_as_pairs, 2);
    assert_eq!(stats.distance_count(300), 1);
    assert_eq!(stats.score_count(0, 0), 1);
    assert_eq!(stats.extra_alignments, 0);
    assert_eq!(stats.filtered, 0);
    assert!(stats.lv_calls >= 2);
}

#[test]
fn test_secondary_buffer_overflow_doubles_once() {
    init_logging();
    // 51 copies of a 300-base unit; the pair matches every copy, so with a
    // tight spacing window there are exactly 51 equal-scoring placements.
    let unit = synthetic_reference(300, 5);
    let mut reference = Vec::with_capacity(300 * 51);
    for _ in 0..51 {
        reference.extend_from_slice(&unit);
    }
    let index = HashSeedIndex::new(reference.clone(), SEED_LENGTH).unwrap();
    let kernel = LandauVishkin;
    let mut options = test_options();
    options.max_barcode_size = 8;
    options.max_secondary_additional_edit_distance = 3;
    options.min_spacing = 150;
    options.max_spacing = 250;
    let mut driver = BatchDriver::new(&index, &kernel, &options);

    let mut supplier = VecPairSupplier::new(vec![pair_at(&reference, 0, b"BX1", 0, 200)]);
    let mut writer = CollectingPairWriter::new();
    driver.run(&mut supplier, &mut writer).unwrap();

    // 50 secondaries overflow the initial capacity of 32, forcing exactly one
    // doubling.
    let state = driver.batch().state(0);
    assert_eq!(state.max_paired_secondary, 64);
    assert_eq!(state.phase, PairPhase::SingleDone);

    assert_eq!(writer.emitted.len(), 1);
    let emission = &writer.emitted[0];
    assert!(emission.first_is_primary);
    assert_eq!(emission.paired_results.len(), 51);
    let primary = &emission.paired_results[0];
    assert_eq!(primary.status, [AlignmentStatus::MultipleHits; 2]);
    assert_eq!(primary.location, [0, 200]);
    assert_eq!(primary.mapq, [1, 1]);
    for secondary in &emission.paired_results[1..] {
        assert_eq!(secondary.score, [0, 0]);
        assert_eq!(secondary.status, [AlignmentStatus::MultipleHits; 2]);
    }
    assert_eq!(driver.stats().extra_alignments, 50);
}

/// Scenario: one bucket-sized region of the reference holds 20 concordant
/// pairs (forming a cluster) plus 20 pairs whose mates are too far apart to
/// pair, but whose single-end placements fall inside the cluster.
fn cluster_promotion_fixture() -> (Vec<u8>, Vec<ReadPair>) {
    let mut reference = synthetic_reference(40_000, 6);
    // Plant a near-copy of a far-away region inside the cluster bucket: the
    // copy at 100 differs from the original at 25000 by one base.
    let distant: Vec<u8> = reference[25_000..25_100].to_vec();
    reference[100..200].copy_from_slice(&distant);
    reference[150] = if reference[150] == b'A' { b'C' } else { b'A' };

    let mut pairs = Vec::new();
    // 20 concordant pairs inside bucket 0 (span 10_000).
    for k in 0..20 {
        let at0 = 500 + 400 * k;
        pairs.push(pair_at(&reference, k, b"BXC", at0, at0 + 300));
    }
    // 19 pairs whose ends both land in bucket 0 but 4 kb apart.
    for k in 1..20 {
        pairs.push(pair_at(&reference, 100 + k, b"BXC", 2000 + 40 * k, 6000 + 40 * k));
    }
    // One pair whose read 0 matches exactly at 25_000 (outside the bucket)
    // and with one mismatch at 100 (inside it).
    pairs.push(pair_at(&reference, 199, b"BXC", 25_000, 6900));
    (reference, pairs)
}

#[test]
fn test_cluster_confirms_and_promotes() {
    init_logging();
    let (reference, pairs) = cluster_promotion_fixture();
    let index = HashSeedIndex::new(reference, SEED_LENGTH).unwrap();
    let kernel = LandauVishkin;
    let mut options = test_options();
    options.max_cluster_span = 10_000;
    let mut driver = BatchDriver::new(&index, &kernel, &options);

    let mut supplier = VecPairSupplier::new(pairs);
    let mut writer = CollectingPairWriter::new();
    driver.run(&mut supplier, &mut writer).unwrap();

    assert_eq!(writer.emitted.len(), 40);
    for emission in &writer.emitted {
        let primary = &emission.paired_results[0];
        assert!(
            primary.aligned_as_pair,
            "pair {} not confirmed",
            emission.template
        );
        assert_eq!(primary.status, [AlignmentStatus::SingleHit; 2]);
    }
    // Discordant pairs kept their in-bucket single-end placements.
    for emission in &writer.emitted[20..39] {
        let primary = &emission.paired_results[0];
        assert!(primary.location[0] < 10_000);
        assert!(primary.location[1] < 10_000);
        assert!(!primary.from_align_together);
    }
    // The in-cluster near-copy outranks the exact match outside the cluster.
    let promoted = &writer.emitted[39].paired_results[0];
    assert_eq!(promoted.location[0], 100);
    assert_eq!(promoted.score[0], 1);
    assert_eq!(promoted.location[1], 6900);

    assert_eq!(driver.stats().aligned_as_pairs, 80);
}

#[test]
fn test_identical_runs_are_identical() {
    init_logging();
    let (reference, pairs) = cluster_promotion_fixture();
    let index = HashSeedIndex::new(reference, SEED_LENGTH).unwrap();
    let kernel = LandauVishkin;
    let mut options = test_options();
    options.max_cluster_span = 10_000;
    options.max_secondary_additional_edit_distance = 2;

    let run = || {
        let mut driver = BatchDriver::new(&index, &kernel, &options);
        let mut supplier = VecPairSupplier::new(pairs.clone());
        let mut writer = CollectingPairWriter::new();
        driver.run(&mut supplier, &mut writer).unwrap();
        projection(&writer.emitted)
    };
    assert_eq!(run(), run());
}

#[test]
fn test_force_spacing_rejects_one_sided_pairs() {
    init_logging();
    let reference = synthetic_reference(10_000, 8);
    let index = HashSeedIndex::new(reference.clone(), SEED_LENGTH).unwrap();
    let kernel = LandauVishkin;

    // Read 1 comes from nowhere in the reference.
    let stray = synthetic_reference(200, 999);
    let one_sided = ReadPair::new(
        Read::without_qualities("lone/1", reference[3000..3100].to_vec()),
        Read::without_qualities("lone/2", stray[..100].to_vec()),
        b"BX2".to_vec(),
    );

    let mut options = test_options();
    options.force_spacing = true;
    let mut driver = BatchDriver::new(&index, &kernel, &options);
    let mut supplier = VecPairSupplier::new(vec![one_sided.clone()]);
    let mut writer = CollectingPairWriter::new();
    driver.run(&mut supplier, &mut writer).unwrap();
    let primary = &writer.emitted[0].paired_results[0];
    assert_eq!(primary.status, [AlignmentStatus::NotFound; 2]);
    assert_eq!(primary.location, [INVALID_GENOME_LOCATION; 2]);

    // Without force_spacing the useful end is reported on its own.
    let mut options = test_options();
    options.force_spacing = false;
    let mut driver = BatchDriver::new(&index, &kernel, &options);
    let mut supplier = VecPairSupplier::new(vec![one_sided]);
    let mut writer = CollectingPairWriter::new();
    driver.run(&mut supplier, &mut writer).unwrap();
    let primary = &writer.emitted[0].paired_results[0];
    assert_eq!(primary.status[0], AlignmentStatus::SingleHit);
    assert_eq!(primary.location[0], 3000);
    assert_eq!(primary.status[1], AlignmentStatus::NotFound);
}

#[test]
fn test_barcode_boundary_starts_new_batch() {
    init_logging();
    let reference = synthetic_reference(10_000, 9);
    let index = HashSeedIndex::new(reference.clone(), SEED_LENGTH).unwrap();
    let kernel = LandauVishkin;
    let options = test_options();
    let mut driver = BatchDriver::new(&index, &kernel, &options);

    let pairs = vec![
        pair_at(&reference, 0, b"BXA", 1000, 1300),
        pair_at(&reference, 1, b"BXA", 2000, 2300),
        pair_at(&reference, 2, b"BXB", 3000, 3300),
    ];
    let mut supplier = VecPairSupplier::new(pairs);
    let mut writer = CollectingPairWriter::new();
    driver.run(&mut supplier, &mut writer).unwrap();

    // Output preserves ingestion order across the barcode boundary.
    assert_eq!(writer.emitted.len(), 3);
    assert_eq!(writer.emitted[0].barcode, b"BXA".to_vec());
    assert_eq!(writer.emitted[2].barcode, b"BXB".to_vec());
    assert_eq!(writer.emitted[2].paired_results[0].location, [3000, 3300]);
    assert_eq!(driver.stats().single_hits, 6);
}

#[test]
fn test_batch_cap_splits_a_barcode() {
    init_logging();
    let reference = synthetic_reference(10_000, 10);
    let index = HashSeedIndex::new(reference.clone(), SEED_LENGTH).unwrap();
    let kernel = LandauVishkin;
    let mut options = test_options();
    options.max_barcode_size = 2;
    let mut driver = BatchDriver::new(&index, &kernel, &options);

    let pairs: Vec<ReadPair> = (0..5)
        .map(|k| pair_at(&reference, k, b"BXQ", 1000 + 500 * k, 1300 + 500 * k))
        .collect();
    let mut supplier = VecPairSupplier::new(pairs);
    let mut writer = CollectingPairWriter::new();
    driver.run(&mut supplier, &mut writer).unwrap();

    assert_eq!(writer.emitted.len(), 5);
    for (k, emission) in writer.emitted.iter().enumerate() {
        assert_eq!(
            emission.paired_results[0].location,
            [1000 + 500 * k as u64, 1300 + 500 * k as u64]
        );
    }
}

#[test]
fn test_two_workers_reduce_stats() {
    init_logging();
    let reference = synthetic_reference(10_000, 11);
    let index = HashSeedIndex::new(reference.clone(), SEED_LENGTH).unwrap();
    let kernel = LandauVishkin;
    let mut options = test_options();
    options.num_workers = 2;
    options.use_timing_barrier = true;

    let (writer0, rx0) = ChannelPairWriter::with_capacity(64);
    let (writer1, rx1) = ChannelPairWriter::with_capacity(64);
    let lanes = vec![
        (
            VecPairSupplier::new(vec![
                pair_at(&reference, 0, b"BXA", 1000, 1300),
                pair_at(&reference, 1, b"BXA", 2000, 2300),
            ]),
            writer0,
        ),
        (
            VecPairSupplier::new(vec![pair_at(&reference, 2, b"BXB", 4000, 4300)]),
            writer1,
        ),
    ];

    let stats = linked_align::run_workers(&index, &kernel, &options, lanes).unwrap();
    assert_eq!(stats.total_reads, 6);
    assert_eq!(stats.single_hits, 6);
    assert_eq!(stats.aligned_as_pairs, 6);

    assert_eq!(rx0.try_iter().count(), 2);
    assert_eq!(rx1.try_iter().count(), 1);
}
