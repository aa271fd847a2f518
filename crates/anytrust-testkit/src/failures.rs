//! Failure injection for committee members

use anytrust_committee::{DasReader, DasService, DasWriter, HealthCheck};
use anytrust_core::{AnytrustError, DataAvailabilityCertificate, ExpirationPolicy, Hash32, Result};
use async_trait::async_trait;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use std::sync::Arc;

/// How an injected backend answers `store`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureType {
    /// Behaves normally
    Success,
    /// Fails right away
    ImmediateError,
    /// Never answers; only a caller-side deadline ends the call
    TooSlow,
    /// Stores, then returns a certificate for the wrong hash
    DataCorruption,
}

impl FailureType {
    /// Every failing behaviour
    pub const FAILURES: [FailureType; 3] = [
        FailureType::ImmediateError,
        FailureType::TooSlow,
        FailureType::DataCorruption,
    ];
}

/// `n_success` successes and `n_failures` random failures, shuffled
pub fn failure_bag(n_success: usize, n_failures: usize, seed: u64) -> Vec<FailureType> {
    let mut rng = ChaCha20Rng::seed_from_u64(seed);
    let mut bag = vec![FailureType::Success; n_success];
    bag.extend((0..n_failures).map(|_| {
        FailureType::FAILURES[rng.gen_range(0..FailureType::FAILURES.len())]
    }));
    bag.shuffle(&mut rng);
    bag
}

/// Wraps a backend and misbehaves on `store` according to a [`FailureType`]
pub struct FailureInjectingBackend {
    inner: Arc<dyn DasService>,
    failure: FailureType,
}

impl FailureInjectingBackend {
    /// Wrap `inner` with `failure` behaviour
    pub fn new(inner: Arc<dyn DasService>, failure: FailureType) -> Self {
        Self { inner, failure }
    }

    /// Behaviour being injected
    pub fn failure(&self) -> FailureType {
        self.failure
    }
}

#[async_trait]
impl DasWriter for FailureInjectingBackend {
    async fn store(&self, message: &[u8], timeout: u64) -> Result<DataAvailabilityCertificate> {
        match self.failure {
            FailureType::Success => self.inner.store(message, timeout).await,
            FailureType::ImmediateError => Err(AnytrustError::transport("expected store failure")),
            FailureType::TooSlow => std::future::pending().await,
            FailureType::DataCorruption => {
                let mut cert = self.inner.store(message, timeout).await?;
                let mut corrupted = *cert.data_hash.as_bytes();
                corrupted[0] ^= 0xff;
                cert.data_hash = Hash32::from(corrupted);
                Ok(cert)
            }
        }
    }
}

#[async_trait]
impl DasReader for FailureInjectingBackend {
    async fn get_by_hash(&self, hash: Hash32) -> Result<Vec<u8>> {
        self.inner.get_by_hash(hash).await
    }

    async fn expiration_policy(&self) -> Result<ExpirationPolicy> {
        self.inner.expiration_policy().await
    }
}

#[async_trait]
impl HealthCheck for FailureInjectingBackend {
    async fn health_check(&self) -> Result<()> {
        match self.failure {
            FailureType::Success => self.inner.health_check().await,
            _ => Err(AnytrustError::transport("injected unhealthy backend")),
        }
    }
}
