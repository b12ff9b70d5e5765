//! Counter-based random numbers.
//!
//! A generator is derived from the simulation seed and the position of the
//! draw (step, rule unit, membrane), so a run is reproducible from its seed no
//! matter how the worker threads interleave.

use crate::error::{Error, Result};

const SEED_SALT: u64 = 0x5851_f42d_4c95_7f2d;
const GOLDEN_GAMMA: u64 = 0x9e37_79b9_7f4a_7c15;

/// Draws made while initialising use this step number.
pub const INIT_STEP: u64 = u64::MAX;
/// Member key of draws outside a region iteration.
pub const NO_MEMBER: usize = usize::MAX;

#[derive(Clone, Debug)]
pub struct Rng {
    state: u64,
}

impl Rng {
    pub fn new(seed: u64, step: u64, unit: u64, member: u64) -> Rng {
        let mut state = mix(seed ^ SEED_SALT);
        state = mix(state ^ step);
        state = mix(state ^ unit.rotate_left(21));
        state = mix(state ^ member.rotate_left(42));
        Rng { state }
    }

    pub fn next_u64(&mut self) -> u64 {
        self.state = self.state.wrapping_add(GOLDEN_GAMMA);
        mix(self.state)
    }

    /// An independent generator for a nested draw site, such as one member
    /// of a reduction.
    pub fn fork(&self, key: u64) -> Rng {
        Rng {
            state: mix(self.state ^ mix(key.wrapping_add(GOLDEN_GAMMA))),
        }
    }

    /// A uniformly distributed integer in `low..=high`.
    pub fn range_inclusive(&mut self, low: i64, high: i64) -> i64 {
        debug_assert!(low <= high);
        let span = (i128::from(high) - i128::from(low) + 1) as u128;
        let offset = u128::from(self.next_u64()) % span;
        (i128::from(low) + offset as i128) as i64
    }
}

/// A seed drawn from operating system entropy.
pub fn entropy_seed() -> Result<u64> {
    let mut bytes = [0; 8];
    getrandom::getrandom(&mut bytes).map_err(|error| Error::Entropy(error.to_string()))?;
    Ok(u64::from_le_bytes(bytes))
}

// splitmix64 finalizer
fn mix(mut z: u64) -> u64 {
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}
