//! RPC client for a remote committee member
//!
//! Stores go through the chunked streaming protocol when it is enabled. A
//! member that does not expose the streaming methods answers with "method not
//! found"; the client then switches to the legacy single-shot store for that
//! call and every later one.

use crate::backend::{DasReader, DasWriter, HealthCheck};
use crate::config::RpcClientConfig;
use anytrust_core::effects::{MetricsEffects, NoopMetrics, PhysicalTimeEffects};
use anytrust_core::{
    AggregateSignature, AnytrustError, ConfigValidation, DataAvailabilityCertificate,
    ExpirationPolicy, Hash32, Result,
};
use anytrust_streaming::rpc::{call_typed, to_param};
use anytrust_streaming::{DataStreamer, HexBytes, HexU64, PayloadSigner, RpcClient};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, trace};

/// Single-request store
pub const LEGACY_STORE_METHOD: &str = "das_store";
/// Liveness check
pub const HEALTH_CHECK_METHOD: &str = "das_healthCheck";
/// Retention policy query
pub const EXPIRATION_POLICY_METHOD: &str = "das_expirationPolicy";
/// Payload lookup by hash
pub const GET_BY_HASH_METHOD: &str = "das_getByHash";

const STORE_SUCCESS_METRIC: &str = "anytrust/rpc/store/success/total";
const STORE_FAILURE_METRIC: &str = "anytrust/rpc/store/failure/total";

/// JSON form of a certificate returned by store and finalize
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreResult {
    /// SHA-256 of the payload
    pub data_hash: HexBytes,
    /// Expiry in unix seconds
    pub timeout: HexU64,
    /// Members that signed
    pub signers_mask: HexU64,
    /// Keyset the signature verifies against
    pub keyset_hash: HexBytes,
    /// Encoded aggregate signature
    pub sig: HexBytes,
    /// Certificate version
    pub version: HexU64,
}

impl StoreResult {
    /// Wire form of `cert`
    pub fn from_certificate(cert: &DataAvailabilityCertificate) -> Self {
        Self {
            data_hash: HexBytes(cert.data_hash.as_bytes().to_vec()),
            timeout: HexU64(cert.timeout),
            signers_mask: HexU64(cert.signers_mask),
            keyset_hash: HexBytes(cert.keyset_hash.as_bytes().to_vec()),
            sig: HexBytes(cert.signature.to_bytes()),
            version: HexU64(u64::from(cert.version)),
        }
    }

    /// Decode back into a certificate
    pub fn into_certificate(self) -> Result<DataAvailabilityCertificate> {
        let (signature, consumed) = AggregateSignature::decode_prefix(&self.sig.0)?;
        if consumed != self.sig.0.len() {
            return Err(AnytrustError::serialization(format!(
                "trailing bytes after signature: {} of {}",
                consumed,
                self.sig.0.len()
            )));
        }
        let version = u8::try_from(self.version.0).map_err(|_| {
            AnytrustError::serialization(format!("invalid certificate version {}", self.version.0))
        })?;
        Ok(DataAvailabilityCertificate {
            keyset_hash: Hash32::from_slice(&self.keyset_hash.0)?,
            data_hash: Hash32::from_slice(&self.data_hash.0)?,
            timeout: self.timeout.0,
            signers_mask: self.signers_mask.0,
            signature,
            version,
        })
    }
}

/// Client side of one committee member
pub struct DasRpcClient {
    label: String,
    client: Arc<dyn RpcClient>,
    signer: PayloadSigner,
    streamer: Option<DataStreamer<StoreResult>>,
    legacy_only: AtomicBool,
    metrics: Arc<dyn MetricsEffects>,
}

impl DasRpcClient {
    /// Client for the member behind `client`; `signer` authenticates store requests
    pub fn new(
        label: impl Into<String>,
        client: Arc<dyn RpcClient>,
        signer: PayloadSigner,
        config: &RpcClientConfig,
        time: Arc<dyn PhysicalTimeEffects>,
    ) -> Result<Self> {
        config.validate()?;
        let streamer = if config.enable_chunked_store {
            Some(DataStreamer::new(
                config.data_stream.clone(),
                signer.clone(),
                client.clone(),
                time,
            )?)
        } else {
            None
        };
        Ok(Self {
            label: label.into(),
            client,
            signer,
            streamer,
            legacy_only: AtomicBool::new(false),
            metrics: Arc::new(NoopMetrics),
        })
    }

    /// Report store outcomes to `metrics`
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsEffects>) -> Self {
        self.streamer = self.streamer.map(|s| s.with_metrics(metrics.clone()));
        self.metrics = metrics;
        self
    }

    /// Whether the member was found not to support chunked store
    pub fn is_legacy_only(&self) -> bool {
        self.legacy_only.load(Ordering::Relaxed)
    }

    async fn store_result(&self, message: &[u8], timeout: u64) -> Result<StoreResult> {
        if let Some(streamer) = &self.streamer {
            if !self.is_legacy_only() {
                match streamer.stream_data(message, timeout).await {
                    Err(err) if err.is_method_not_found() => {
                        info!(
                            backend = %self.label,
                            "chunked store not supported, falling back to legacy store"
                        );
                        self.legacy_only.store(true, Ordering::Relaxed);
                    }
                    other => return other,
                }
            }
        }
        self.legacy_store(message, timeout).await
    }

    async fn legacy_store(&self, message: &[u8], timeout: u64) -> Result<StoreResult> {
        let signature = self.signer.sign(message, &[timeout]).await?;
        call_typed(
            self.client.as_ref(),
            LEGACY_STORE_METHOD,
            vec![
                to_param(HexBytes(message.to_vec())),
                to_param(HexU64(timeout)),
                to_param(HexBytes(signature)),
            ],
        )
        .await
    }
}

impl fmt::Display for DasRpcClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DasRpcClient{{{}}}", self.label)
    }
}

#[async_trait]
impl DasWriter for DasRpcClient {
    async fn store(&self, message: &[u8], timeout: u64) -> Result<DataAvailabilityCertificate> {
        trace!(backend = %self.label, size = message.len(), timeout, "rpc store");
        let result = self
            .store_result(message, timeout)
            .await
            .and_then(StoreResult::into_certificate);
        let metric = if result.is_ok() {
            STORE_SUCCESS_METRIC
        } else {
            STORE_FAILURE_METRIC
        };
        self.metrics.increment_counter(metric, 1);
        result
    }
}

#[async_trait]
impl DasReader for DasRpcClient {
    async fn get_by_hash(&self, hash: Hash32) -> Result<Vec<u8>> {
        let data: HexBytes = call_typed(
            self.client.as_ref(),
            GET_BY_HASH_METHOD,
            vec![to_param(HexBytes(hash.as_bytes().to_vec()))],
        )
        .await?;
        Ok(data.0)
    }

    async fn expiration_policy(&self) -> Result<ExpirationPolicy> {
        let policy: String =
            call_typed(self.client.as_ref(), EXPIRATION_POLICY_METHOD, vec![]).await?;
        policy.parse()
    }
}

#[async_trait]
impl HealthCheck for DasRpcClient {
    async fn health_check(&self) -> Result<()> {
        self.client
            .call(HEALTH_CHECK_METHOD, vec![])
            .await
            .map(|_| ())
            .map_err(AnytrustError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anytrust_core::{hash, SigningKey};

    #[test]
    fn test_store_result_carries_certificate() {
        let key = SigningKey::from_bytes(&[4; 32]);
        let mut cert = DataAvailabilityCertificate {
            keyset_hash: hash(b"keyset"),
            data_hash: hash(b"data"),
            timeout: 1_700_000_000,
            signers_mask: 0b100,
            signature: AggregateSignature::default(),
            version: 1,
        };
        cert.signature = AggregateSignature::single(key.sign(&cert.signable_fields()));

        let json = serde_json::to_value(StoreResult::from_certificate(&cert)).unwrap();
        assert_eq!(json["signersMask"], "0x4");
        assert_eq!(json["version"], "0x1");

        let decoded: StoreResult = serde_json::from_value(json).unwrap();
        assert_eq!(decoded.into_certificate().unwrap(), cert);
    }

    #[test]
    fn test_store_result_rejects_bad_hash() {
        let result = StoreResult {
            data_hash: HexBytes(vec![1, 2, 3]),
            timeout: HexU64(0),
            signers_mask: HexU64(1),
            keyset_hash: HexBytes(vec![0; 32]),
            sig: HexBytes(AggregateSignature::default().to_bytes()),
            version: HexU64(1),
        };
        assert!(result.into_certificate().is_err());
    }
}
