//! Proof-of-work hashing
//!
//! Alephium hashes a candidate header twice with BLAKE3. A hash is a valid
//! solution when it satisfies the target and routes to the template's chain.

use crate::types::{ChainIndex, Target, CHAIN_NUMS, GROUP_NUMS};

/// Size of a hash in bytes
pub const HASH_SIZE: usize = 32;

/// `blake3(blake3(input))`
pub fn double_blake3(input: &[u8]) -> [u8; HASH_SIZE] {
    let inner = blake3::hash(input);
    *blake3::hash(inner.as_bytes()).as_bytes()
}

/// Reusable double-BLAKE3 hasher that keeps its internal state between calls
#[derive(Clone, Default)]
pub struct DoubleBlake3 {
    hasher: blake3::Hasher,
}

impl DoubleBlake3 {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hash `input` twice, resetting the inner hasher afterwards
    pub fn hash(&mut self, input: &[u8]) -> [u8; HASH_SIZE] {
        self.hasher.update(input);
        let inner = self.hasher.finalize();
        self.hasher.reset();
        self.hasher.update(inner.as_bytes());
        let outer = self.hasher.finalize();
        self.hasher.reset();
        *outer.as_bytes()
    }
}

/// Chain a hash routes to, derived from its last byte
pub fn chain_index_of(hash: &[u8; HASH_SIZE]) -> ChainIndex {
    let big_index = hash[HASH_SIZE - 1] as usize % CHAIN_NUMS;
    let groups = GROUP_NUMS as usize;
    ChainIndex {
        from_group: (big_index / groups) as u8,
        to_group: (big_index % groups) as u8,
    }
}

/// Whether `hash` is a valid solution for `chain` under `target`
pub fn is_solution(hash: &[u8; HASH_SIZE], target: &Target, chain: ChainIndex) -> bool {
    chain_index_of(hash) == chain && target.is_met_by(hash)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_double_blake3_matches_reusable_hasher() {
        let mut hasher = DoubleBlake3::new();
        for input in [&b""[..], b"alephium", &[7u8; 326][..]] {
            assert_eq!(hasher.hash(input), double_blake3(input));
        }
    }

    #[test]
    fn test_double_blake3_differs_from_single() {
        let input = b"header";
        assert_ne!(double_blake3(input), *blake3::hash(input).as_bytes());
    }

    #[test]
    fn test_chain_index_of() {
        let mut hash = [0u8; 32];
        hash[31] = 0x1b; // 27 % 16 = 11 -> 2->3
        assert_eq!(chain_index_of(&hash), ChainIndex::new(2, 3).unwrap());
        hash[31] = 0x00;
        assert_eq!(chain_index_of(&hash), ChainIndex::new(0, 0).unwrap());
    }

    #[test]
    fn test_is_solution_requires_both_checks() {
        let mut hash = [0u8; 32];
        hash[31] = 0x05; // chain 1->1
        let chain = ChainIndex::new(1, 1).unwrap();
        assert!(is_solution(&hash, &Target::max(), chain));
        assert!(!is_solution(&hash, &Target::max(), ChainIndex::new(0, 1).unwrap()));
        assert!(!is_solution(&hash, &Target::from_be_slice(&[0x04]).unwrap(), chain));
    }
}
