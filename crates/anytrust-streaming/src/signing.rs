//! Payload signing for protocol messages
//!
//! Every protocol message is authenticated as `sign(H(bytes ‖ extra₀_BE ‖ …))`
//! where `H` is the workspace hash and each extra field is a big-endian `u64`.
//! Sender and receiver must list the extras in the same order for a phase:
//!
//! | phase    | bytes  | extras                                                   |
//! |----------|--------|----------------------------------------------------------|
//! | start    | empty  | timestamp, n_chunks, chunk_size, total_size, timeout     |
//! | chunk    | chunk  | message_id, chunk_id                                     |
//! | finalize | empty  | message_id                                               |
//! | store    | data   | timeout                                                  |
//!
//! Ed25519 signatures cannot recover the signer, so a signature on the wire is
//! `public_key (32) ‖ signature (64)`. The verifier checks the signature and
//! then asks a [`SignerOracle`] whether that key may sign.

use anytrust_core::crypto::{PUBLIC_KEY_LEN, SIGNATURE_LEN};
use anytrust_core::hash::{hasher, Hash32};
use anytrust_core::{AnytrustError, PublicKey, Result, Signature, SigningKey};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;

/// Length of a wire signature: signer key followed by the signature
pub const WIRE_SIGNATURE_LEN: usize = PUBLIC_KEY_LEN + SIGNATURE_LEN;

/// Digest covered by a payload signature
pub fn payload_digest(data: &[u8], extras: &[u64]) -> Hash32 {
    let mut h = hasher();
    h.update(data);
    for extra in extras {
        h.update(&extra.to_be_bytes());
    }
    h.finalize()
}

/// Signs payload digests
#[async_trait]
pub trait DataSigner: Send + Sync {
    /// Wire signature over `digest`
    async fn sign_digest(&self, digest: &Hash32) -> Result<Vec<u8>>;
}

/// Verifies payload digests
#[async_trait]
pub trait SignatureVerifier: Send + Sync {
    /// Check a wire signature over `digest`
    async fn verify_digest(&self, signature: &[u8], digest: &Hash32) -> Result<()>;
}

/// Answers whether a key belongs to an authorized signer
///
/// In production this is backed by the sequencer-inbox contract; tests and
/// local setups use [`StaticSignerSet`].
#[async_trait]
pub trait SignerOracle: Send + Sync {
    /// Whether `key` may sign
    async fn is_valid_signer(&self, key: &PublicKey) -> Result<bool>;
}

/// Fixed set of authorized signer keys
#[derive(Clone, Debug, Default)]
pub struct StaticSignerSet {
    keys: HashSet<PublicKey>,
}

impl StaticSignerSet {
    /// Set of the given keys
    pub fn new(keys: impl IntoIterator<Item = PublicKey>) -> Self {
        Self {
            keys: keys.into_iter().collect(),
        }
    }
}

#[async_trait]
impl SignerOracle for StaticSignerSet {
    async fn is_valid_signer(&self, key: &PublicKey) -> Result<bool> {
        Ok(self.keys.contains(key))
    }
}

/// Ed25519 signer producing `key ‖ signature`
#[derive(Clone, Debug)]
pub struct Ed25519DataSigner {
    key: SigningKey,
}

impl Ed25519DataSigner {
    /// Signer for `key`
    pub fn new(key: SigningKey) -> Self {
        Self { key }
    }
}

#[async_trait]
impl DataSigner for Ed25519DataSigner {
    async fn sign_digest(&self, digest: &Hash32) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(WIRE_SIGNATURE_LEN);
        out.extend_from_slice(&self.key.public_key().to_bytes());
        out.extend_from_slice(&self.key.sign(digest.as_bytes()).to_bytes());
        Ok(out)
    }
}

/// Verifies `key ‖ signature` and checks the key against an oracle
pub struct OracleVerifier<O> {
    oracle: O,
}

impl<O: SignerOracle> OracleVerifier<O> {
    /// Verifier consulting `oracle`
    pub fn new(oracle: O) -> Self {
        Self { oracle }
    }
}

#[async_trait]
impl<O: SignerOracle> SignatureVerifier for OracleVerifier<O> {
    async fn verify_digest(&self, signature: &[u8], digest: &Hash32) -> Result<()> {
        if signature.len() != WIRE_SIGNATURE_LEN {
            return Err(AnytrustError::verification(format!(
                "signature must be {WIRE_SIGNATURE_LEN} bytes, got {}",
                signature.len()
            )));
        }
        let (key_bytes, sig_bytes) = signature.split_at(PUBLIC_KEY_LEN);
        let key = PublicKey::from_bytes(key_bytes)?;
        key.verify(digest.as_bytes(), &Signature::from_slice(sig_bytes)?)?;
        if !self.oracle.is_valid_signer(&key).await? {
            return Err(AnytrustError::verification(format!(
                "{key:?} is not an authorized signer"
            )));
        }
        Ok(())
    }
}

/// Accepts everything; for transports that already authenticate the peer
#[derive(Clone, Copy, Debug, Default)]
pub struct TrustingVerifier;

#[async_trait]
impl SignatureVerifier for TrustingVerifier {
    async fn verify_digest(&self, _signature: &[u8], _digest: &Hash32) -> Result<()> {
        Ok(())
    }
}

/// Hash-then-sign over a payload and its ordered extra fields
#[derive(Clone)]
pub struct PayloadSigner {
    signer: Arc<dyn DataSigner>,
}

impl PayloadSigner {
    /// Wrap an arbitrary digest signer
    pub fn new(signer: Arc<dyn DataSigner>) -> Self {
        Self { signer }
    }

    /// Signer backed by a local Ed25519 key
    pub fn ed25519(key: SigningKey) -> Self {
        Self::new(Arc::new(Ed25519DataSigner::new(key)))
    }

    /// Sign `data` together with `extras`
    pub async fn sign(&self, data: &[u8], extras: &[u64]) -> Result<Vec<u8>> {
        self.signer.sign_digest(&payload_digest(data, extras)).await
    }
}

/// Hash-then-verify counterpart of [`PayloadSigner`]
#[derive(Clone)]
pub struct PayloadVerifier {
    verifier: Arc<dyn SignatureVerifier>,
}

impl PayloadVerifier {
    /// Wrap an arbitrary digest verifier
    pub fn new(verifier: Arc<dyn SignatureVerifier>) -> Self {
        Self { verifier }
    }

    /// Verifier that accepts keys from a fixed set
    pub fn for_signers(keys: impl IntoIterator<Item = PublicKey>) -> Self {
        Self::new(Arc::new(OracleVerifier::new(StaticSignerSet::new(keys))))
    }

    /// Verifier that accepts every signature
    pub fn trusting() -> Self {
        Self::new(Arc::new(TrustingVerifier))
    }

    /// Check `signature` over `data` and `extras`
    pub async fn verify(&self, signature: &[u8], data: &[u8], extras: &[u64]) -> Result<()> {
        self.verifier
            .verify_digest(signature, &payload_digest(data, extras))
            .await
    }
}
