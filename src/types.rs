//! Core types for Alephium mining
//!
//! Fundamental types shared by templates, hashers and the wire codec, with
//! validation and hex-based serde encoding.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Number of address groups on the network
pub const GROUP_NUMS: u8 = 4;

/// Number of chains, one per (from, to) group pair
pub const CHAIN_NUMS: usize = (GROUP_NUMS as usize) * (GROUP_NUMS as usize);

/// Size of a target in bytes
pub const TARGET_SIZE: usize = 32;

/// Mining target representing the difficulty threshold
///
/// Stored big-endian: a hash satisfies the target when, read as a 256-bit
/// big-endian integer, it is less than or equal to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Target([u8; TARGET_SIZE]);

impl Target {
    /// Create a target from exactly 32 big-endian bytes
    pub const fn new(bytes: [u8; TARGET_SIZE]) -> Self {
        Self(bytes)
    }

    /// Create a target from at most 32 big-endian bytes, left-padding with zeros
    pub fn from_be_slice(bytes: &[u8]) -> Result<Self> {
        if bytes.len() > TARGET_SIZE {
            return Err(Error::target(format!(
                "Invalid target length: expected at most {} bytes, got {}",
                TARGET_SIZE,
                bytes.len()
            )));
        }
        Ok(Self(pad_target(bytes)))
    }

    /// Target bytes, big-endian
    pub fn as_bytes(&self) -> &[u8; TARGET_SIZE] {
        &self.0
    }

    /// Maximum possible target (easiest difficulty)
    pub const fn max() -> Self {
        Self([0xff; TARGET_SIZE])
    }

    /// Check whether a hash meets this target
    pub fn is_met_by(&self, hash: &[u8; 32]) -> bool {
        hash <= &self.0
    }

    /// Convert to hexadecimal string (big-endian)
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

/// Left-zero-pad a big-endian target of at most 32 bytes.
///
/// Panics if `bytes` is longer than 32; callers validate first.
pub(crate) fn pad_target(bytes: &[u8]) -> [u8; TARGET_SIZE] {
    let mut padded = [0u8; TARGET_SIZE];
    let zero_len = TARGET_SIZE - bytes.len();
    padded[zero_len..].copy_from_slice(bytes);
    padded
}

impl FromStr for Target {
    type Err = Error;

    /// Parse a big-endian hex string of up to 64 characters
    fn from_str(s: &str) -> Result<Self> {
        let bytes =
            hex::decode(s).map_err(|e| Error::target(format!("Invalid hex in target: {}", e)))?;
        Self::from_be_slice(&bytes)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Serialize for Target {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Target {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Target::from_str(&s).map_err(serde::de::Error::custom)
    }
}

/// Shard routing of a block: the chain from one group to another
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChainIndex {
    pub from_group: u8,
    pub to_group: u8,
}

impl ChainIndex {
    /// Create a new chain index, validating both groups
    pub fn new(from_group: u8, to_group: u8) -> Result<Self> {
        if from_group >= GROUP_NUMS || to_group >= GROUP_NUMS {
            return Err(Error::template(format!(
                "Invalid chain index {}->{}: groups must be below {}",
                from_group, to_group, GROUP_NUMS
            )));
        }
        Ok(Self {
            from_group,
            to_group,
        })
    }

    /// Chain index from its flat position in `0..CHAIN_NUMS`
    pub fn from_flat(index: usize) -> Result<Self> {
        if index >= CHAIN_NUMS {
            return Err(Error::template(format!(
                "Invalid flat chain index {}: must be below {}",
                index, CHAIN_NUMS
            )));
        }
        let groups = GROUP_NUMS as usize;
        Self::new((index / groups) as u8, (index % groups) as u8)
    }

    /// Flat position in `0..CHAIN_NUMS`
    pub fn flat(&self) -> usize {
        self.from_group as usize * GROUP_NUMS as usize + self.to_group as usize
    }

    /// All chains in flat order
    pub fn all() -> impl Iterator<Item = ChainIndex> {
        (0..GROUP_NUMS).flat_map(|from_group| {
            (0..GROUP_NUMS).map(move |to_group| ChainIndex {
                from_group,
                to_group,
            })
        })
    }
}

impl fmt::Display for ChainIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}", self.from_group, self.to_group)
    }
}

/// Hash rate in hashes per second
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct HashRate(pub f64);

impl HashRate {
    /// Create new hash rate
    pub fn new(rate: f64) -> Self {
        Self(rate)
    }

    /// Hash rate over a number of hashes and an elapsed time
    pub fn from_hashes(hashes: u64, elapsed_secs: f64) -> Self {
        if elapsed_secs > 0.0 {
            Self(hashes as f64 / elapsed_secs)
        } else {
            Self(0.0)
        }
    }

    /// Get the rate value
    pub fn value(&self) -> f64 {
        self.0
    }
}

impl fmt::Display for HashRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", crate::utils::format_hash_rate(self.0))
    }
}
