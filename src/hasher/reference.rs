//! Reference search kernel
//!
//! Each kernel thread copies the input and walks its own slice of the nonce
//! range. Slower than the inline kernel, but runs on every device.

use super::{read_state, Hasher, HasherState, LaunchConfig, SearchResult, NONCE_SIZE};
use crate::crypto::{double_blake3, is_solution};
use crate::job::Job;
use crate::types::Target;
use byteorder::{ByteOrder, LittleEndian};

#[derive(Clone)]
pub struct ReferenceHasher {
    state: HasherState,
}

impl ReferenceHasher {
    pub fn new(state: HasherState) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &HasherState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut HasherState {
        &mut self.state
    }
}

impl Hasher for ReferenceHasher {
    fn reset(&mut self, job: &Job, nonce_prefix: &[u8; NONCE_SIZE]) {
        self.state.load(job, nonce_prefix);
    }

    fn search(&mut self, launch: &LaunchConfig) -> bool {
        if self.state.found_good_hash {
            return true;
        }

        let target = Target::new(self.state.target);
        let chain = self.state.chain_index();
        let base = self.state.nonce_counter();
        let threads = launch.threads();
        let per_thread = launch.nonces_per_thread as u64;

        for thread in 0..threads {
            let mut input = self.state.input().to_vec();
            for step in 0..per_thread {
                let counter = base.wrapping_add(thread.wrapping_mul(per_thread).wrapping_add(step));
                LittleEndian::write_u64(&mut input[..8], counter);
                let hash = double_blake3(&input);
                self.state.hash_count += 1;

                if is_solution(&hash, &target, chain) {
                    self.state.record_solution(counter, hash);
                    return true;
                }
            }
        }

        false
    }

    fn read_result(&self) -> SearchResult {
        read_state(&self.state)
    }
}
