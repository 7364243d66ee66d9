//! Bounded edit-distance kernel.
//!
//! The aligner only ever asks one question: how many edits does it take to
//! lay `pattern` down at the start of `text`, and is that within `limit`?
//! The trait keeps the kernel swappable; `LandauVishkin` is the stock
//! implementation, an O(k·n) furthest-reaching-diagonal scan.

/// Bounded edit distance between a pattern and a prefix of `text`.
pub trait EditDistanceKernel {
    /// Distance if it is `<= limit`, else `None`. Trailing text beyond the
    /// pattern's footprint is ignored.
    fn bounded_distance(&self, text: &[u8], pattern: &[u8], limit: u32) -> Option<u32>;
}

/// Landau–Vishkin diagonal scan.
#[derive(Debug, Default, Clone, Copy)]
pub struct LandauVishkin;

const NEG: i32 = i32::MIN / 2;

impl EditDistanceKernel for LandauVishkin {
    fn bounded_distance(&self, text: &[u8], pattern: &[u8], limit: u32) -> Option<u32> {
        let plen = pattern.len();
        let tlen = text.len();
        if plen == 0 {
            return Some(0);
        }
        let k = limit as i32;

        // Diagonal d maps to slot d + k + 1; slots outside the wavefront stay NEG.
        let width = (2 * k + 3) as usize;
        let mut prev = vec![NEG; width];
        let mut cur = vec![NEG; width];
        let slot = |d: i32| (d + k + 1) as usize;

        for e in 0..=k {
            for d in -e..=e {
                let mut row = if e == 0 {
                    0
                } else {
                    let sub = prev[slot(d)].saturating_add(1);
                    let text_gap = prev[slot(d - 1)];
                    let pattern_gap = prev[slot(d + 1)].saturating_add(1);
                    sub.max(text_gap).max(pattern_gap)
                };
                if row < 0 {
                    cur[slot(d)] = NEG;
                    continue;
                }
                row = row.min(plen as i32).min(tlen as i32 - d);
                if row < 0 || row + d < 0 {
                    cur[slot(d)] = NEG;
                    continue;
                }
                while (row as usize) < plen
                    && ((row + d) as usize) < tlen
                    && pattern[row as usize] == text[(row + d) as usize]
                {
                    row += 1;
                }
                cur[slot(d)] = row;
                if row as usize >= plen {
                    return Some(e as u32);
                }
            }
            std::mem::swap(&mut prev, &mut cur);
        }
        None
    }
}
