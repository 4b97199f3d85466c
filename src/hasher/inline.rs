//! Inline search kernel
//!
//! Keeps a single working buffer and rewrites the nonce counter in place
//! between attempts, reusing one BLAKE3 hasher for the whole launch.

use super::{read_state, Hasher, HasherState, LaunchConfig, SearchResult, NONCE_SIZE};
use crate::crypto::{is_solution, DoubleBlake3};
use crate::job::Job;
use crate::types::Target;

#[derive(Clone)]
pub struct InlineHasher {
    state: HasherState,
    kernel: DoubleBlake3,
}

impl InlineHasher {
    pub fn new(state: HasherState) -> Self {
        Self {
            state,
            kernel: DoubleBlake3::new(),
        }
    }

    pub fn state(&self) -> &HasherState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut HasherState {
        &mut self.state
    }
}

impl Hasher for InlineHasher {
    fn reset(&mut self, job: &Job, nonce_prefix: &[u8; NONCE_SIZE]) {
        self.state.load(job, nonce_prefix);
    }

    fn search(&mut self, launch: &LaunchConfig) -> bool {
        if self.state.found_good_hash {
            return true;
        }

        let target = Target::new(self.state.target);
        let chain = self.state.chain_index();
        let input_len = self.state.layout.input_len();
        let base = self.state.nonce_counter();

        for offset in 0..launch.nonces_per_launch() {
            let counter = base.wrapping_add(offset);
            self.state.set_nonce_counter(counter);
            let hash = self.kernel.hash(&self.state.buf[..input_len]);
            self.state.hash_count += 1;

            if is_solution(&hash, &target, chain) {
                self.state.record_solution(counter, hash);
                return true;
            }
        }

        self.state.set_nonce_counter(base);
        false
    }

    fn read_result(&self) -> SearchResult {
        read_state(&self.state)
    }
}
