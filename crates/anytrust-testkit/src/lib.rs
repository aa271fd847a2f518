//! # AnyTrust Testkit
//!
//! Fixtures shared by the integration tests of the AnyTrust crates:
//!
//! - [`keys`]: deterministic signing keys
//! - [`time`]: a clock that only moves when told to
//! - [`random`]: scripted random draws backed by a seeded stream
//! - [`failures`]: backends that fail in controlled ways
//! - [`committee`]: in-memory committees with their storages
//! - [`rpc`]: transport wrappers that fail on purpose
//!
//! This crate is a dev-dependency only.

#![forbid(unsafe_code)]

pub mod committee;
pub mod failures;
pub mod keys;
pub mod random;
pub mod rpc;
pub mod time;

pub use committee::{TestCommittee, TestEffects};
pub use failures::{failure_bag, FailureInjectingBackend, FailureType};
pub use keys::{committee_keys, signing_key};
pub use random::ScriptedRandom;
pub use rpc::FlakyClient;
pub use time::ControllableTime;

use std::sync::Once;

static TRACING: Once = Once::new();

/// Install a `fmt` subscriber filtered by `RUST_LOG`; safe to call repeatedly
pub fn init_test_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}
