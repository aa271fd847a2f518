//! # AnyTrust Core - Foundation Types
//!
//! Shared vocabulary for the AnyTrust data-availability workspace: the unified
//! error type, content hashing, committee keys and signatures, the certificate
//! and keyset wire formats, and the effect traits every other crate is
//! parameterized over.
//!
//! ## Layering
//!
//! - `anytrust-core` (this crate): types and traits, no orchestration
//! - `anytrust-streaming`: chunked streaming protocol over an RPC seam
//! - `anytrust-committee`: backend registry, strategies and the aggregator
//! - `anytrust-testkit`: deterministic fixtures for the crates above

#![forbid(unsafe_code)]

pub mod certificate;
pub mod config;
pub mod crypto;
pub mod effects;
pub mod errors;
pub mod hash;

pub use certificate::{
    signable_fields, DataAvailabilityCertificate, ExpirationPolicy, Keyset,
    CURRENT_CERTIFICATE_VERSION, MAX_COMMITTEE_SIZE,
};
pub use config::ConfigValidation;
pub use crypto::{AggregateSignature, PublicKey, Signature, SigningKey};
pub use effects::{
    InMemoryMetrics, MetricsEffects, NoopMetrics, OsRandom, PhysicalTime, PhysicalTimeEffects,
    RandomEffects, SystemClock, TracingMetrics,
};
pub use errors::{AnytrustError, Result};
pub use hash::{hash, Hash32};
