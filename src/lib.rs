//! Alephium GPU Miner
//!
//! Worker lifecycle and job-template handoff core of a BLAKE3 mining client:
//! - A fixed pool of workers, each bound to a device with its own stream
//! - Reference-counted templates swapped into workers without locks
//! - Inline and reference search kernels behind one hasher capability
//! - Length-prefixed new-block serialization for found solutions

pub mod codec;
pub mod config;
pub mod crypto;
pub mod device;
pub mod error;
pub mod hasher;
pub mod job;
pub mod job_feed;
pub mod miner;
pub mod sink;
pub mod types;
pub mod utils;
pub mod worker;

pub use config::Config;
pub use error::{Error, Result};
pub use types::*;

/// Application information
pub const APP_NAME: &str = "alephium-gpu-miner";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const APP_DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");
