//! Hash functions shared by the identity types.
//!
//! Two distinct functions with distinct jobs: a fast Knuth-style
//! multiplicative hash for in-process map buckets, and a Jenkins
//! one-at-a-time hash whose avalanche behavior spreads values evenly across a
//! consistent-hash ring. Both are deterministic across platforms.

/// Knuth MMIX linear congruential multiplier
const KNUTH_A: u64 = 6364136223846793005;
/// Knuth MMIX linear congruential increment
const KNUTH_C: u64 = 1442695040888963407;

/// Fast multiplicative hash over the three packed key words.
///
/// Runs a data-dependent number of LCG rounds (2..=8) over both halves of the
/// 128-bit payload, then folds in the type-code word. Good bucket spread for
/// map lookups; not suitable for ring placement.
pub fn knuth_hash(n0: u64, n1: u64, type_code_data: u64) -> u32 {
    let rounds = 2 + ((n1 ^ n0) % 7);
    let mut r0 = n0;
    let mut r1 = n1;
    for _ in 0..rounds {
        r0 = KNUTH_A.wrapping_mul(r0).wrapping_add(KNUTH_C);
        r1 = KNUTH_A.wrapping_mul(r1).wrapping_add(KNUTH_C);
    }
    let folded = r0 ^ r1 ^ type_code_data;
    (folded as u32) ^ ((folded >> 32) as u32)
}

/// Jenkins one-at-a-time hash over an arbitrary byte slice.
pub fn jenkins_hash(data: &[u8]) -> u32 {
    let mut hash: u32 = 0;
    for &byte in data {
        hash = hash.wrapping_add(byte as u32);
        hash = hash.wrapping_add(hash << 10);
        hash ^= hash >> 6;
    }
    hash = hash.wrapping_add(hash << 3);
    hash ^= hash >> 11;
    hash.wrapping_add(hash << 15)
}

/// Jenkins hash over three little-endian u64 words.
pub fn jenkins_hash_words(u: u64, v: u64, w: u64) -> u32 {
    let mut bytes = [0u8; 24];
    bytes[0..8].copy_from_slice(&u.to_le_bytes());
    bytes[8..16].copy_from_slice(&v.to_le_bytes());
    bytes[16..24].copy_from_slice(&w.to_le_bytes());
    jenkins_hash(&bytes)
}
