//! Scripted randomness

use anytrust_core::effects::RandomEffects;
use async_trait::async_trait;
use parking_lot::Mutex;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use std::collections::VecDeque;

/// Returns scripted values first, then a seeded ChaCha stream
pub struct ScriptedRandom {
    script: Mutex<VecDeque<u64>>,
    rng: Mutex<ChaCha20Rng>,
}

impl ScriptedRandom {
    /// ChaCha stream from `seed`
    pub fn seeded(seed: u64) -> Self {
        Self::with_script(seed, std::iter::empty())
    }

    /// Returns `script` first, then the seeded stream
    pub fn with_script(seed: u64, script: impl IntoIterator<Item = u64>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            rng: Mutex::new(ChaCha20Rng::seed_from_u64(seed)),
        }
    }

    /// Queue more scripted values
    pub fn push(&self, values: impl IntoIterator<Item = u64>) {
        self.script.lock().extend(values);
    }
}

#[async_trait]
impl RandomEffects for ScriptedRandom {
    async fn random_u64(&self) -> u64 {
        if let Some(v) = self.script.lock().pop_front() {
            return v;
        }
        self.rng.lock().next_u64()
    }
}
