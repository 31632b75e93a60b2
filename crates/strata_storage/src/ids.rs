//! Compressed arrays of page-local value ids.
//!
//! Two lightweight encodings, chosen per array:
//! - run-length, when the average run is longer than 4 rows;
//! - frame-of-reference bit packing otherwise (`bits` per value above `min`).

/// An immutable compressed id array.
#[derive(Debug, Clone, PartialEq)]
pub enum CompressedIds {
    /// `(value, exclusive end position)` per run; ends are ascending.
    Rle { runs: Vec<(i64, u32)> },
    /// Values stored as `value - min` in `bits` bits each.
    BitPacked {
        min: i64,
        bits: u8,
        len: u32,
        words: Vec<u64>,
    },
}

impl CompressedIds {
    /// Choose the best encoding for `ids`.
    pub fn encode(ids: &[i64]) -> Self {
        let runs = compute_runs(ids);
        if ids.len() > 4 && runs.len() * 4 < ids.len() {
            return CompressedIds::Rle { runs };
        }
        bit_pack(ids)
    }

    pub fn len(&self) -> usize {
        match self {
            CompressedIds::Rle { runs } => runs.last().map_or(0, |(_, end)| *end as usize),
            CompressedIds::BitPacked { len, .. } => *len as usize,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, idx: usize) -> Option<i64> {
        if idx >= self.len() {
            return None;
        }
        match self {
            CompressedIds::Rle { runs } => {
                let run = runs.partition_point(|(_, end)| (*end as usize) <= idx);
                runs.get(run).map(|(v, _)| *v)
            }
            CompressedIds::BitPacked {
                min, bits, words, ..
            } => Some(unpack(*min, *bits, words, idx)),
        }
    }

    /// Materialise all ids.
    pub fn to_vec(&self) -> Vec<i64> {
        match self {
            CompressedIds::Rle { runs } => {
                let mut out = Vec::with_capacity(self.len());
                let mut start = 0u32;
                for (v, end) in runs {
                    out.extend(std::iter::repeat(*v).take((end - start) as usize));
                    start = *end;
                }
                out
            }
            CompressedIds::BitPacked {
                min,
                bits,
                len,
                words,
            } => (0..*len as usize)
                .map(|i| unpack(*min, *bits, words, i))
                .collect(),
        }
    }

    /// Approximate heap footprint in bytes.
    pub fn size_bytes(&self) -> usize {
        match self {
            CompressedIds::Rle { runs } => runs.len() * std::mem::size_of::<(i64, u32)>(),
            CompressedIds::BitPacked { words, .. } => words.len() * 8,
        }
    }
}

fn compute_runs(ids: &[i64]) -> Vec<(i64, u32)> {
    let mut runs: Vec<(i64, u32)> = Vec::new();
    for (i, &v) in ids.iter().enumerate() {
        match runs.last_mut() {
            Some((last, end)) if *last == v => *end = i as u32 + 1,
            _ => runs.push((v, i as u32 + 1)),
        }
    }
    runs
}

fn bit_pack(ids: &[i64]) -> CompressedIds {
    let min = ids.iter().copied().min().unwrap_or(0);
    let max = ids.iter().copied().max().unwrap_or(0);
    let range = max.wrapping_sub(min) as u64;
    let bits = (64 - range.leading_zeros()) as u8;

    let total_bits = ids.len() * bits as usize;
    let mut words = vec![0u64; total_bits.div_ceil(64)];
    if bits > 0 {
        for (i, &v) in ids.iter().enumerate() {
            let delta = v.wrapping_sub(min) as u64;
            let bit = i * bits as usize;
            let (w, off) = (bit / 64, bit % 64);
            words[w] |= delta << off;
            if off + bits as usize > 64 {
                words[w + 1] |= delta >> (64 - off);
            }
        }
    }
    CompressedIds::BitPacked {
        min,
        bits,
        len: ids.len() as u32,
        words,
    }
}

fn unpack(min: i64, bits: u8, words: &[u64], idx: usize) -> i64 {
    if bits == 0 {
        return min;
    }
    let bit = idx * bits as usize;
    let (w, off) = (bit / 64, bit % 64);
    let mut delta = words[w] >> off;
    if off + bits as usize > 64 {
        delta |= words[w + 1] << (64 - off);
    }
    let mask = if bits == 64 { u64::MAX } else { (1u64 << bits) - 1 };
    min.wrapping_add((delta & mask) as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rle_chosen_for_long_runs() {
        let ids: Vec<i64> = (0..100).map(|i| i / 50).collect();
        let enc = CompressedIds::encode(&ids);
        assert!(matches!(enc, CompressedIds::Rle { .. }));
        assert_eq!(enc.len(), 100);
        assert_eq!(enc.get(49), Some(0));
        assert_eq!(enc.get(50), Some(1));
        assert_eq!(enc.get(100), None);
        assert_eq!(enc.to_vec(), ids);
    }

    #[test]
    fn test_bitpacked_spanning_words() {
        // 7-bit values cross u64 word boundaries.
        let ids: Vec<i64> = (0..40).map(|i| (i * 37) % 100).collect();
        let enc = CompressedIds::encode(&ids);
        assert!(matches!(enc, CompressedIds::BitPacked { bits: 7, .. }));
        for (i, v) in ids.iter().enumerate() {
            assert_eq!(enc.get(i), Some(*v));
        }
    }

    #[test]
    fn test_constant_short_array_uses_zero_bits() {
        let enc = CompressedIds::encode(&[3, 3, 3]);
        assert!(matches!(enc, CompressedIds::BitPacked { bits: 0, .. }));
        assert_eq!(enc.to_vec(), vec![3, 3, 3]);
        assert_eq!(enc.size_bytes(), 0);
    }

    #[test]
    fn test_empty() {
        let enc = CompressedIds::encode(&[]);
        assert!(enc.is_empty());
        assert_eq!(enc.get(0), None);
        assert!(enc.to_vec().is_empty());
    }
}
