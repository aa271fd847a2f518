//! Randomness effects

use async_trait::async_trait;
use rand::RngCore;
use std::sync::Arc;

/// Source of randomness
#[async_trait]
pub trait RandomEffects: Send + Sync {
    /// Uniform 64-bit draw
    async fn random_u64(&self) -> u64;

    /// Uniform draw in `0..bound`; `bound` must be non-zero
    async fn random_below(&self, bound: u64) -> u64 {
        // Rejection sampling to keep the draw unbiased
        let zone = u64::MAX - (u64::MAX % bound);
        loop {
            let v = self.random_u64().await;
            if v < zone {
                return v % bound;
            }
        }
    }
}

#[async_trait]
impl<T: RandomEffects + ?Sized> RandomEffects for Arc<T> {
    async fn random_u64(&self) -> u64 {
        (**self).random_u64().await
    }
}

/// Production randomness from the OS
#[derive(Clone, Copy, Debug, Default)]
pub struct OsRandom;

#[async_trait]
impl RandomEffects for OsRandom {
    async fn random_u64(&self) -> u64 {
        rand::rngs::OsRng.next_u64()
    }
}

/// Fisher-Yates shuffle driven by a [`RandomEffects`] handler
pub async fn shuffle<T, R>(random: &R, items: &mut [T])
where
    T: Send,
    R: RandomEffects + ?Sized,
{
    for i in (1..items.len()).rev() {
        let j = random.random_below(i as u64 + 1).await as usize;
        items.swap(i, j);
    }
}
