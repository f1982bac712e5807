use std::sync::atomic::{AtomicU64, Ordering};

use rand::Rng;
use textgen_common::state::RANDOM_SEED;
use textgen_common::{GenError, Result};

/// Upper bound (inclusive) of a freshly drawn seed.
pub const MAX_RANDOM_SEED: u64 = 1 << 31;

/// Seed shared by every generation run through one session manager.
#[derive(Debug, Default)]
pub struct SeedState {
    current: AtomicU64,
}

impl SeedState {
    /// Applies `seed`, drawing one from `[1, 2^31]` for [`RANDOM_SEED`].
    /// Returns the seed actually in effect.
    pub fn set_manual_seed(&self, seed: i64) -> Result<u64> {
        let seed = match seed {
            RANDOM_SEED => rand::thread_rng().gen_range(1..=MAX_RANDOM_SEED),
            s if s < 0 => return Err(GenError::InvalidSeed(s.to_string())),
            s => s as u64,
        };
        self.current.store(seed, Ordering::SeqCst);
        Ok(seed)
    }

    pub fn current(&self) -> u64 { self.current.load(Ordering::SeqCst) }
}
