//! Effect traits
//!
//! Components never read the wall clock, draw randomness, or touch a metrics
//! registry directly. They receive these capabilities as injected handlers so
//! that tests can drive time forward, script random draws and inspect counters.
//!
//! - `PhysicalTimeEffects`: wall-clock timestamps and sleeping
//! - `RandomEffects`: 64-bit random draws (message ids, explore shuffles)
//! - `MetricsEffects`: counters, gauges and histograms

pub mod metrics;
pub mod random;
pub mod time;

pub use metrics::{InMemoryMetrics, MetricsEffects, MetricsSnapshot, NoopMetrics, TracingMetrics};
pub use random::{OsRandom, RandomEffects};
pub use time::{PhysicalTime, PhysicalTimeEffects, SystemClock};
