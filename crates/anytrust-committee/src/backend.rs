//! Capabilities of a committee backend

use anytrust_core::{DataAvailabilityCertificate, ExpirationPolicy, Hash32, Result};
use async_trait::async_trait;
use std::sync::Arc;

/// Stores a payload and returns a signed certificate for it
#[async_trait]
pub trait DasWriter: Send + Sync {
    /// `timeout` is the requested expiry in unix seconds
    async fn store(&self, message: &[u8], timeout: u64) -> Result<DataAvailabilityCertificate>;
}

/// Serves payloads by content hash
#[async_trait]
pub trait DasReader: Send + Sync {
    /// Payload whose content hash is `hash`
    async fn get_by_hash(&self, hash: Hash32) -> Result<Vec<u8>>;

    /// How long stored data is kept
    async fn expiration_policy(&self) -> Result<ExpirationPolicy>;
}

/// Liveness check
#[async_trait]
pub trait HealthCheck: Send + Sync {
    /// `Ok` when the backend can serve requests
    async fn health_check(&self) -> Result<()>;
}

/// Full backend capability set
pub trait DasService: DasWriter + DasReader + HealthCheck {}

impl<T: DasWriter + DasReader + HealthCheck + ?Sized> DasService for T {}

#[async_trait]
impl<T: DasWriter + ?Sized> DasWriter for Arc<T> {
    async fn store(&self, message: &[u8], timeout: u64) -> Result<DataAvailabilityCertificate> {
        (**self).store(message, timeout).await
    }
}

#[async_trait]
impl<T: DasReader + ?Sized> DasReader for Arc<T> {
    async fn get_by_hash(&self, hash: Hash32) -> Result<Vec<u8>> {
        (**self).get_by_hash(hash).await
    }

    async fn expiration_policy(&self) -> Result<ExpirationPolicy> {
        (**self).expiration_policy().await
    }
}

#[async_trait]
impl<T: HealthCheck + ?Sized> HealthCheck for Arc<T> {
    async fn health_check(&self) -> Result<()> {
        (**self).health_check().await
    }
}
