//! In-process committee members
//!
//! [`SignAfterStoreWriter`] is what a single committee member runs: persist
//! the payload, then sign a one-member certificate for it.

use crate::backend::{DasReader, DasWriter, HealthCheck};
use anytrust_core::{
    hash, AggregateSignature, AnytrustError, DataAvailabilityCertificate, ExpirationPolicy, Hash32,
    Keyset, PublicKey, Result, SigningKey, CURRENT_CERTIFICATE_VERSION,
};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::trace;

/// Content-addressed storage
#[async_trait]
pub trait StorageService: Send + Sync {
    /// Keep `data` at least until `timeout`
    async fn put(&self, data: &[u8], timeout: u64) -> Result<()>;

    /// Stored payload for `hash`
    async fn get_by_hash(&self, hash: Hash32) -> Result<Vec<u8>>;

    /// Retention applied by `put`
    fn expiration_policy(&self) -> ExpirationPolicy;
}

/// Map-backed storage that keeps everything
#[derive(Debug, Default)]
pub struct MemoryStorageService {
    entries: RwLock<HashMap<Hash32, Vec<u8>>>,
}

impl MemoryStorageService {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a payload with `hash` is stored
    pub fn contains(&self, hash: &Hash32) -> bool {
        self.entries.read().contains_key(hash)
    }

    /// Stored payloads
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// True when nothing is stored
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[async_trait]
impl StorageService for MemoryStorageService {
    async fn put(&self, data: &[u8], _timeout: u64) -> Result<()> {
        self.entries.write().insert(hash(data), data.to_vec());
        Ok(())
    }

    async fn get_by_hash(&self, hash: Hash32) -> Result<Vec<u8>> {
        self.entries
            .read()
            .get(&hash)
            .cloned()
            .ok_or_else(|| AnytrustError::not_found(format!("no data for {hash}")))
    }

    fn expiration_policy(&self) -> ExpirationPolicy {
        ExpirationPolicy::KeepForever
    }
}

/// Stores a payload and signs a single-member certificate for it
pub struct SignAfterStoreWriter {
    storage: Arc<dyn StorageService>,
    key: SigningKey,
    keyset_hash: Hash32,
}

impl SignAfterStoreWriter {
    /// Writer over `storage` signing with `key`
    pub fn new(storage: Arc<dyn StorageService>, key: SigningKey) -> Self {
        let keyset = Keyset {
            assumed_honest: 1,
            pub_keys: vec![key.public_key()],
        };
        Self {
            storage,
            key,
            keyset_hash: keyset.hash(),
        }
    }

    /// Key that verifies this writer's certificates
    pub fn public_key(&self) -> PublicKey {
        self.key.public_key()
    }
}

#[async_trait]
impl DasWriter for SignAfterStoreWriter {
    async fn store(&self, message: &[u8], timeout: u64) -> Result<DataAvailabilityCertificate> {
        trace!(size = message.len(), timeout, "sign-after-store");
        self.storage.put(message, timeout).await?;

        let mut cert = DataAvailabilityCertificate {
            keyset_hash: self.keyset_hash,
            data_hash: hash(message),
            timeout,
            signers_mask: 1,
            signature: AggregateSignature::default(),
            version: CURRENT_CERTIFICATE_VERSION,
        };
        cert.signature = AggregateSignature::single(self.key.sign(&cert.signable_fields()));
        Ok(cert)
    }
}

#[async_trait]
impl DasReader for SignAfterStoreWriter {
    async fn get_by_hash(&self, hash: Hash32) -> Result<Vec<u8>> {
        self.storage.get_by_hash(hash).await
    }

    async fn expiration_policy(&self) -> Result<ExpirationPolicy> {
        Ok(self.storage.expiration_policy())
    }
}

#[async_trait]
impl HealthCheck for SignAfterStoreWriter {
    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}
