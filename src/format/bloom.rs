//! Bloom filter with key-split enhanced double-hashing.
//!
//! Column values are hashed with BLAKE3 into a u128 key; the key is split
//! into two 64-bit halves (h1, h2) and enhanced double-hashing derives the
//! probe positions. One filter is built per row block, all of them sized
//! from the same `(rows_per_block, fpp)` pair, so every filter of a segment
//! shares one `(num_bits, num_hashes)` parameter set.
//!
//! Binary format (one per block, concatenated in the BLOOM_FILTER stream):
//! ```text
//! [num_bits: u64 LE]           // 8 bytes
//! [num_hashes: u32 LE]         // 4 bytes
//! [padding: u32 LE = 0]        // 4 bytes
//! [bits: u64 LE x word_count]  // word_count = ceil(num_bits / 64)
//! ```

use std::io::Write;

use crate::error::{Result, SegmentError};

/// Header size: num_bits(8) + num_hashes(4) + padding(4) = 16 bytes.
const BLOOM_HEADER_SIZE: usize = 16;

/// Upper bound on probes per key.
const MAX_HASH_FUNCTIONS: usize = 30;

/// Bloom filter backed by a bit vector with key-split double-hashing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BloomFilter {
    bits: Vec<u64>,
    num_bits: usize,
    num_hashes: usize,
}

/// Hash arbitrary value bytes into a filter key.
pub fn hash_key(bytes: &[u8]) -> u128 {
    let hash = blake3::hash(bytes);
    let mut key = [0u8; 16];
    key.copy_from_slice(&hash.as_bytes()[0..16]);
    u128::from_le_bytes(key)
}

/// Compute probe positions using key-split enhanced double-hashing.
///
/// h2 is forced odd so it is coprime with any power-of-two modulus.
fn probe_positions(key: u128, num_hashes: usize, num_bits: usize) -> impl Iterator<Item = usize> {
    let h1 = key as u64;
    let h2 = ((key >> 64) as u64) | 1;
    (0..num_hashes as u64)
        .map(move |i| (h1.wrapping_add(i.wrapping_mul(h2)) % (num_bits as u64)) as usize)
}

/// Optimal `(num_bits, num_hashes)` for `expected_items` at `fpp`.
///
/// Bits are rounded up to a multiple of 64 with a floor of 64.
pub fn optimal_parameters(expected_items: usize, fpp: f64) -> (usize, usize) {
    let n = expected_items.max(1) as f64;
    let p = fpp.clamp(1e-9, 0.5);
    let ln2 = std::f64::consts::LN_2;
    let raw_bits = (-n * p.ln() / (ln2 * ln2)).ceil() as usize;
    let num_bits = (raw_bits.max(64) + 63) & !63;
    let num_hashes = ((num_bits as f64 / n) * ln2).round() as usize;
    (num_bits, num_hashes.clamp(1, MAX_HASH_FUNCTIONS))
}

impl BloomFilter {
    /// Filter sized for `expected_items` insertions at false-positive rate `fpp`.
    pub fn new(expected_items: usize, fpp: f64) -> Self {
        let (num_bits, num_hashes) = optimal_parameters(expected_items, fpp);
        Self::with_parameters(num_bits, num_hashes)
    }

    pub fn with_parameters(num_bits: usize, num_hashes: usize) -> Self {
        let num_bits = (num_bits.max(64) + 63) & !63;
        Self {
            bits: vec![0u64; num_bits / 64],
            num_bits,
            num_hashes: num_hashes.max(1),
        }
    }

    pub fn insert(&mut self, key: u128) {
        for pos in probe_positions(key, self.num_hashes, self.num_bits) {
            self.bits[pos / 64] |= 1u64 << (pos % 64);
        }
    }

    pub fn insert_bytes(&mut self, bytes: &[u8]) {
        self.insert(hash_key(bytes));
    }

    /// Returns `false` → definitely not present.
    /// Returns `true`  → probably present (subject to FPR).
    pub fn maybe_contains(&self, key: u128) -> bool {
        probe_positions(key, self.num_hashes, self.num_bits)
            .all(|pos| self.bits[pos / 64] & (1u64 << (pos % 64)) != 0)
    }

    pub fn maybe_contains_bytes(&self, bytes: &[u8]) -> bool {
        self.maybe_contains(hash_key(bytes))
    }

    pub fn num_bits(&self) -> usize {
        self.num_bits
    }

    pub fn num_hashes(&self) -> usize {
        self.num_hashes
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&(self.num_bits as u64).to_le_bytes())?;
        writer.write_all(&(self.num_hashes as u32).to_le_bytes())?;
        writer.write_all(&0u32.to_le_bytes())?; // padding
        for &word in &self.bits {
            writer.write_all(&word.to_le_bytes())?;
        }
        Ok(())
    }

    /// Parse one filter from the front of `bytes`. Trailing bytes (the next
    /// block's filter) are ignored; use [`serialized_size`](Self::serialized_size)
    /// to step over this one.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < BLOOM_HEADER_SIZE {
            return Err(SegmentError::InvalidFormat("Bloom filter too small".into()));
        }

        let num_bits = u64::from_le_bytes(bytes[0..8].try_into().unwrap()) as usize;
        let num_hashes = u32::from_le_bytes(bytes[8..12].try_into().unwrap()) as usize;

        if num_bits == 0 {
            return Err(SegmentError::InvalidFormat("Bloom filter has zero bits".into()));
        }
        if num_hashes == 0 || num_hashes > MAX_HASH_FUNCTIONS {
            return Err(SegmentError::InvalidFormat(format!(
                "Bloom filter hash count out of range: {}",
                num_hashes
            )));
        }

        let expected_size = num_bits
            .checked_add(63)
            .map(|n| n / 64)
            .and_then(|words| words.checked_mul(8))
            .and_then(|n| n.checked_add(BLOOM_HEADER_SIZE))
            .ok_or_else(|| {
                SegmentError::InvalidFormat(format!("Bloom filter bit count {} too large", num_bits))
            })?;
        if bytes.len() < expected_size {
            return Err(SegmentError::InvalidFormat("Bloom filter data truncated".into()));
        }

        let bits = bytes[BLOOM_HEADER_SIZE..expected_size]
            .chunks_exact(8)
            .map(|w| u64::from_le_bytes(w.try_into().unwrap()))
            .collect();

        Ok(Self {
            bits,
            num_bits,
            num_hashes,
        })
    }

    /// Total serialized size in bytes.
    pub fn serialized_size(&self) -> usize {
        BLOOM_HEADER_SIZE + self.bits.len() * 8
    }
}
