//! # Sketch Hashing
//!
//! All probabilistic structures hash through here. The hasher is `ahash`
//! with compile-time-fixed seeds, so bucket placement is stable across
//! processes and restarts (dumps taken on one node load on another).

use std::hash::{BuildHasher, Hasher};

use ahash::RandomState;

const SEED_A: u64 = 0x9e37_79b9_7f4a_7c15;
const SEED_B: u64 = 0xf39c_c060_5ced_c834;
const SEED_C: u64 = 0x1082_276b_f3a2_7251;
const SEED_D: u64 = 0x7109_87c8_825e_2323;

/// 64-bit stable hash of `data`, domain-separated by `seed`.
pub fn hash64(data: &[u8], seed: u64) -> u64 {
    let state = RandomState::with_seeds(
        SEED_A ^ seed,
        SEED_B.wrapping_add(seed.rotate_left(17)),
        SEED_C,
        SEED_D,
    );
    let mut hasher = state.build_hasher();
    hasher.write(data);
    hasher.finish()
}

/// Pair of independent hashes for double-hashing schemes: the i-th hash is
/// `h1 + i * h2`.
pub fn hash_pair(data: &[u8]) -> (u64, u64) {
    (hash64(data, 0x5bd1), hash64(data, 0xe995) | 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stable_across_calls() {
        assert_eq!(hash64(b"item", 1), hash64(b"item", 1));
        assert_ne!(hash64(b"item", 1), hash64(b"item", 2));
        assert_ne!(hash64(b"item", 1), hash64(b"other", 1));
    }

    #[test]
    fn pair_second_hash_is_odd() {
        let (_, h2) = hash_pair(b"item");
        assert_eq!(h2 % 2, 1);
    }
}
