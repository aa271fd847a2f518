//! Controllable clock

use anytrust_core::effects::{PhysicalTime, PhysicalTimeEffects};
use anytrust_core::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};

/// Clock that only moves when advanced
///
/// `sleep_ms` advances the clock by the requested amount and yields, so code
/// that sleeps through this effect never blocks a test.
#[derive(Debug, Default)]
pub struct ControllableTime {
    now_ms: AtomicU64,
}

impl ControllableTime {
    /// Clock starting at `start_ms`
    pub fn new(start_ms: u64) -> Self {
        Self {
            now_ms: AtomicU64::new(start_ms),
        }
    }

    /// Start at a fixed, realistic date (2023-11-14)
    pub fn at_realistic_epoch() -> Self {
        Self::new(1_700_000_000_000)
    }

    /// Current reading in milliseconds
    pub fn now_ms(&self) -> u64 {
        self.now_ms.load(Ordering::SeqCst)
    }

    /// Current reading in seconds
    pub fn now_secs(&self) -> u64 {
        self.now_ms() / 1000
    }

    /// Move forward by `ms`
    pub fn advance_ms(&self, ms: u64) {
        self.now_ms.fetch_add(ms, Ordering::SeqCst);
    }

    /// Jump to `ms`
    pub fn set_ms(&self, ms: u64) {
        self.now_ms.store(ms, Ordering::SeqCst);
    }
}

#[async_trait]
impl PhysicalTimeEffects for ControllableTime {
    async fn physical_time(&self) -> Result<PhysicalTime> {
        Ok(PhysicalTime {
            ts_ms: self.now_ms(),
        })
    }

    async fn sleep_ms(&self, ms: u64) -> Result<()> {
        self.advance_ms(ms);
        tokio::task::yield_now().await;
        Ok(())
    }
}
