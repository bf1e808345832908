//! Fletcher-32 checksum over segment payload bytes.
//!
//! Data is consumed as little-endian 16-bit words; a trailing odd byte is
//! zero-extended. The running value packs `sum2 << 16 | sum1`, so a caller
//! can fold several buffers one after another by passing the previous
//! result back in as the seed.

/// Initial running value.
pub const FLETCHER32_INIT: u32 = 0xFFFF_FFFF;

/// Words summed before reducing. Keeps `sum2` far inside u64 range.
const WORDS_PER_BLOCK: usize = 4096;

const MODULUS: u64 = 65_535;

/// Fold `data` into a running checksum.
pub fn fletcher32_update(seed: u32, data: &[u8]) -> u32 {
    let mut sum1 = u64::from(seed & 0xFFFF) % MODULUS;
    let mut sum2 = u64::from(seed >> 16) % MODULUS;

    for block in data.chunks(WORDS_PER_BLOCK * 2) {
        for pair in block.chunks(2) {
            let word = match *pair {
                [lo, hi] => u16::from_le_bytes([lo, hi]),
                [lo] => u16::from(lo),
                _ => unreachable!("chunks(2) yields one or two bytes"),
            };
            sum1 += u64::from(word);
            sum2 += sum1;
        }
        sum1 %= MODULUS;
        sum2 %= MODULUS;
    }

    ((sum2 as u32) << 16) | sum1 as u32
}

/// One-shot Fletcher-32 from the initial value.
pub fn fletcher32(data: &[u8]) -> u32 {
    fletcher32_update(FLETCHER32_INIT, data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_vectors() {
        assert_eq!(fletcher32(b"abcde"), 0xF04F_C729);
        assert_eq!(fletcher32(b"abcdef"), 0x5650_2D2A);
        assert_eq!(fletcher32(b"abcdefgh"), 0xEBE1_9591);
    }

    #[test]
    fn test_empty_is_reduced_seed() {
        assert_eq!(fletcher32(&[]), 0);
        assert_eq!(fletcher32_update(0x0001_0002, &[]), 0x0001_0002);
    }

    #[test]
    fn test_running_fold_matches_one_shot_on_even_boundaries() {
        let data: Vec<u8> = (0..20_000u32).map(|i| (i * 31 % 251) as u8).collect();
        let (a, b) = data.split_at(8_192);
        let folded = fletcher32_update(fletcher32(a), b);
        assert_eq!(folded, fletcher32(&data));
    }

    #[test]
    fn test_detects_single_byte_change() {
        let mut data = vec![7u8; 1000];
        let before = fletcher32(&data);
        data[500] = 8;
        assert_ne!(before, fletcher32(&data));
    }

    #[test]
    fn test_large_input_does_not_overflow() {
        let data = vec![0xFFu8; 1 << 20];
        let value = fletcher32(&data);
        assert!(value & 0xFFFF < 65_535);
        assert!(value >> 16 < 65_535);
    }
}
