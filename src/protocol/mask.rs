//! Payload masking (RFC 6455 section 5.3).

use crate::error::{Error, Result};

/// XOR `data` in place with the repeating 4-byte `mask`.
///
/// Masking is an involution: applying the same key twice restores the input.
#[inline]
pub fn apply_mask(data: &mut [u8], mask: [u8; 4]) {
    let word = u32::from_ne_bytes(mask);
    let mut chunks = data.chunks_exact_mut(4);
    for chunk in &mut chunks {
        let value = u32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]) ^ word;
        chunk.copy_from_slice(&value.to_ne_bytes());
    }
    for (byte, key) in chunks.into_remainder().iter_mut().zip(mask) {
        *byte ^= key;
    }
}

/// Draw a fresh masking key from the operating system's CSPRNG.
///
/// # Errors
///
/// Returns [`Error::Io`] if no randomness is available.
pub fn random_mask() -> Result<[u8; 4]> {
    let mut key = [0u8; 4];
    getrandom::getrandom(&mut key).map_err(|e| Error::Io(format!("mask generation: {e}")))?;
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn naive(data: &mut [u8], mask: [u8; 4]) {
        for (i, byte) in data.iter_mut().enumerate() {
            *byte ^= mask[i % 4];
        }
    }

    #[test]
    fn test_rfc_example() {
        // "Hello" masked with 37 fa 21 3d (RFC 6455 section 5.7)
        let mut data = *b"Hello";
        apply_mask(&mut data, [0x37, 0xfa, 0x21, 0x3d]);
        assert_eq!(data, [0x7f, 0x9f, 0x4d, 0x51, 0x58]);
    }

    #[test]
    fn test_matches_bytewise_for_all_tail_lengths() {
        let mask = [0xde, 0xad, 0xbe, 0xef];
        for len in 0..=17 {
            let original: Vec<u8> = (0..len as u8).collect();
            let mut fast = original.clone();
            let mut slow = original.clone();
            apply_mask(&mut fast, mask);
            naive(&mut slow, mask);
            assert_eq!(fast, slow, "len {len}");
        }
    }

    #[test]
    fn test_involution() {
        let mask = [1, 2, 3, 4];
        let original = b"the quick brown fox".to_vec();
        let mut data = original.clone();
        apply_mask(&mut data, mask);
        assert_ne!(data, original);
        apply_mask(&mut data, mask);
        assert_eq!(data, original);
    }

    #[test]
    fn test_random_masks_differ() {
        let keys: Vec<[u8; 4]> = (0..8).map(|_| random_mask().unwrap()).collect();
        // 8 draws of 32 bits colliding all at once would mean a broken RNG
        assert!(keys.windows(2).any(|w| w[0] != w[1]));
    }
}
