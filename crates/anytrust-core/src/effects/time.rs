//! Physical time effects
//!
//! # Effect Classification
//!
//! - **Category**: Infrastructure Effect
//! - **Implementation**: [`SystemClock`] here, `ControllableTime` in the testkit
//! - **Usage**: receiver clock window, reaper expiry, aggregator latency stats

use crate::{AnytrustError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Wall-clock reading in milliseconds since the unix epoch
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PhysicalTime {
    /// Milliseconds since the unix epoch
    pub ts_ms: u64,
}

impl PhysicalTime {
    /// Seconds since the unix epoch
    pub fn ts_secs(&self) -> u64 {
        self.ts_ms / 1000
    }

    /// Milliseconds elapsed since `earlier`, saturating at zero
    pub fn elapsed_since(&self, earlier: PhysicalTime) -> u64 {
        self.ts_ms.saturating_sub(earlier.ts_ms)
    }
}

/// Wall clock access
#[async_trait]
pub trait PhysicalTimeEffects: Send + Sync {
    /// Current time
    async fn physical_time(&self) -> Result<PhysicalTime>;
    /// Suspend for `ms` milliseconds
    async fn sleep_ms(&self, ms: u64) -> Result<()>;
}

#[async_trait]
impl<T: PhysicalTimeEffects + ?Sized> PhysicalTimeEffects for Arc<T> {
    async fn physical_time(&self) -> Result<PhysicalTime> {
        (**self).physical_time().await
    }

    async fn sleep_ms(&self, ms: u64) -> Result<()> {
        (**self).sleep_ms(ms).await
    }
}

/// Production clock backed by the OS
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

#[async_trait]
impl PhysicalTimeEffects for SystemClock {
    async fn physical_time(&self) -> Result<PhysicalTime> {
        let since_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| AnytrustError::internal(format!("system clock before epoch: {e}")))?;
        Ok(PhysicalTime {
            ts_ms: since_epoch.as_millis() as u64,
        })
    }

    async fn sleep_ms(&self, ms: u64) -> Result<()> {
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_system_clock_is_after_2020() {
        let now = SystemClock.physical_time().await.unwrap();
        assert!(now.ts_secs() > 1_577_836_800);
    }

    #[test]
    fn test_elapsed_saturates() {
        let a = PhysicalTime { ts_ms: 10 };
        let b = PhysicalTime { ts_ms: 25 };
        assert_eq!(b.elapsed_since(a), 15);
        assert_eq!(a.elapsed_since(b), 0);
    }
}
