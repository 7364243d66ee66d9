//! Reference index interface.
//!
//! Index construction and on-disk formats live outside this crate; the
//! aligner consumes a `ReferenceIndex` and nothing more. `HashSeedIndex` is a
//! small in-memory implementation (packed 2-bit seed keys over a hash table)
//! that makes the pipeline runnable end-to-end in tests and benches.

use rustc_hash::FxHashMap;

use crate::genome::GenomeLocation;

/// Read-only view of an indexed reference, shared by all workers.
pub trait ReferenceIndex {
    /// Length of the seeds this index was built for.
    fn seed_length(&self) -> usize;

    /// Total length of the concatenated reference.
    fn genome_length(&self) -> u64;

    /// All locations where `seed` occurs, ascending. Seeds containing
    /// ambiguous bases have no occurrences.
    fn lookup(&self, seed: &[u8]) -> &[GenomeLocation];

    /// Reference bases starting at `location`, clipped at the genome end.
    /// `None` when the location itself is out of range.
    fn reference_slice(&self, location: GenomeLocation, length: usize) -> Option<&[u8]>;

    /// Which contig a location falls in; single-contig references answer 0.
    fn contig_of(&self, location: GenomeLocation) -> usize {
        let _ = location;
        0
    }
}

/// Pack an ACGT seed into a 2-bit-per-base key. `None` if the seed contains
/// an ambiguous base or is longer than 32 bases.
pub fn pack_seed(seed: &[u8]) -> Option<u64> {
    if seed.len() > 32 {
        return None;
    }
    let mut key = 0u64;
    for &base in seed {
        let code = match base {
            b'A' | b'a' => 0,
            b'C' | b'c' => 1,
            b'G' | b'g' => 2,
            b'T' | b't' => 3,
            _ => return None,
        };
        key = (key << 2) | code;
    }
    Some(key)
}

/// Hash-table seed index over an in-memory reference.
pub struct HashSeedIndex {
    reference: Vec<u8>,
    seed_length: usize,
    table: FxHashMap<u64, Vec<GenomeLocation>>,
    contig_starts: Vec<u64>,
}

impl HashSeedIndex {
    /// Build an index over a single-contig reference.
    pub fn new(reference: Vec<u8>, seed_length: usize) -> Result<Self, String> {
        Self::with_contigs(reference, seed_length, vec![0])
    }

    /// Build an index with explicit contig start offsets (ascending, starting
    /// at 0).
    pub fn with_contigs(
        reference: Vec<u8>,
        seed_length: usize,
        contig_starts: Vec<u64>,
    ) -> Result<Self, String> {
        if seed_length < 8 || seed_length > 32 {
            return Err(format!(
                "seed length {} outside supported range 8..=32",
                seed_length
            ));
        }
        if contig_starts.first() != Some(&0) {
            return Err("contig starts must begin at 0".to_string());
        }

        let mut table: FxHashMap<u64, Vec<GenomeLocation>> = FxHashMap::default();
        if reference.len() >= seed_length {
            for pos in 0..=reference.len() - seed_length {
                if let Some(key) = pack_seed(&reference[pos..pos + seed_length]) {
                    table.entry(key).or_default().push(pos as GenomeLocation);
                }
            }
        }
        log::debug!(
            "indexed {} bases into {} distinct {}-mers",
            reference.len(),
            table.len(),
            seed_length
        );

        Ok(HashSeedIndex {
            reference,
            seed_length,
            table,
            contig_starts,
        })
    }
}

impl ReferenceIndex for HashSeedIndex {
    fn seed_length(&self) -> usize {
        self.seed_length
    }

    fn genome_length(&self) -> u64 {
        self.reference.len() as u64
    }

    fn lookup(&self, seed: &[u8]) -> &[GenomeLocation] {
        if seed.len() != self.seed_length {
            return &[];
        }
        match pack_seed(seed) {
            Some(key) => self.table.get(&key).map(Vec::as_slice).unwrap_or(&[]),
            None => &[],
        }
    }

    fn reference_slice(&self, location: GenomeLocation, length: usize) -> Option<&[u8]> {
        let start = location as usize;
        if location == crate::genome::INVALID_GENOME_LOCATION || start >= self.reference.len() {
            return None;
        }
        let end = (start + length).min(self.reference.len());
        Some(&self.reference[start..end])
    }

    fn contig_of(&self, location: GenomeLocation) -> usize {
        match self.contig_starts.binary_search(&location) {
            Ok(i) => i,
            Err(i) => i - 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_seed() {
        assert_eq!(pack_seed(b"AAAA"), Some(0));
        assert_eq!(pack_seed(b"ACGT"), Some(0b00_01_10_11));
        assert_eq!(pack_seed(b"ACGN"), None);
        assert_ne!(pack_seed(b"AACG"), pack_seed(b"ACGA"));
    }

    #[test]
    fn test_lookup_finds_all_occurrences() {
        let mut reference = b"ACGTACGTCC".repeat(3);
        reference.extend_from_slice(b"TTTTTTTTTT");
        let index = HashSeedIndex::new(reference, 10).unwrap();
        let hits = index.lookup(b"ACGTACGTCC");
        assert_eq!(hits, &[0, 10, 20]);
        assert!(index.lookup(b"GGGGGGGGGG").is_empty());
        // Wrong-length probes never match.
        assert!(index.lookup(b"ACGT").is_empty());
    }

    #[test]
    fn test_ambiguous_seeds_are_not_indexed() {
        let index = HashSeedIndex::new(b"ACGTNACGTACGTACG".to_vec(), 8).unwrap();
        assert!(index.lookup(b"ACGTNACG").is_empty());
    }

    #[test]
    fn test_reference_slice_clips() {
        let index = HashSeedIndex::new(b"ACGTACGTACGT".to_vec(), 8).unwrap();
        assert_eq!(index.reference_slice(4, 4).unwrap(), b"ACGT");
        assert_eq!(index.reference_slice(10, 100).unwrap(), b"GT");
        assert!(index.reference_slice(12, 1).is_none());
        assert!(index
            .reference_slice(crate::genome::INVALID_GENOME_LOCATION, 1)
            .is_none());
    }

    #[test]
    fn test_contig_mapping() {
        let index =
            HashSeedIndex::with_contigs(b"ACGTACGTACGTACGT".to_vec(), 8, vec![0, 6, 12]).unwrap();
        assert_eq!(index.contig_of(0), 0);
        assert_eq!(index.contig_of(5), 0);
        assert_eq!(index.contig_of(6), 1);
        assert_eq!(index.contig_of(13), 2);
    }

    #[test]
    fn test_rejects_bad_seed_length() {
        assert!(HashSeedIndex::new(b"ACGTACGT".to_vec(), 4).is_err());
        assert!(HashSeedIndex::new(b"ACGTACGT".to_vec(), 40).is_err());
    }
}
