//! Aggregator configuration

use crate::strategy::StrategyConfig;
use anytrust_core::{
    AnytrustError, ConfigValidation, PublicKey, Result, MAX_COMMITTEE_SIZE,
};
use anytrust_streaming::{DataStreamerConfig, DataStreamingRpcMethods};
use serde::{Deserialize, Serialize};

/// One committee member endpoint
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendConfig {
    /// RPC endpoint
    pub url: String,
    /// Base64 Ed25519 public key
    pub pubkey: String,
}

impl BackendConfig {
    /// Decoded member key
    pub fn public_key(&self) -> Result<PublicKey> {
        PublicKey::from_base64(&self.pubkey).map_err(|e| {
            AnytrustError::configuration(format!("invalid pubkey for backend {}: {e}", self.url))
        })
    }
}

/// Ordered member list; position `i` gets signer mask `1 << i`
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BackendConfigList(pub Vec<BackendConfig>);

impl BackendConfigList {
    /// Parse the JSON array form, e.g. `[{"url": "...", "pubkey": "..."}]`
    pub fn parse_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| AnytrustError::configuration(format!("invalid backends list: {e}")))
    }

    /// Number of members
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when no members are listed
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Members in mask order
    pub fn iter(&self) -> impl Iterator<Item = &BackendConfig> {
        self.0.iter()
    }
}

/// Per-backend RPC client settings
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct RpcClientConfig {
    /// Use the chunked streaming protocol, falling back to legacy store
    pub enable_chunked_store: bool,
    /// Chunked store settings
    pub data_stream: DataStreamerConfig,
    /// Extra attempts for retryable transport errors
    pub retries: u32,
    /// Pause between retries
    pub retry_delay_ms: u64,
}

impl Default for RpcClientConfig {
    fn default() -> Self {
        Self {
            enable_chunked_store: true,
            data_stream: DataStreamerConfig::with_methods(DataStreamingRpcMethods::das()),
            retries: 3,
            retry_delay_ms: 0,
        }
    }
}

impl ConfigValidation for RpcClientConfig {
    fn validate(&self) -> Result<()> {
        if self.enable_chunked_store {
            self.data_stream.validate()?;
        }
        Ok(())
    }
}

/// Committee aggregator settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct AggregatorConfig {
    /// Build an aggregator at all
    pub enable: bool,
    /// H; the aggregator needs `N + 1 - H` signatures
    pub assumed_honest: usize,
    /// Deadline for a single backend call
    pub request_timeout_ms: u64,
    /// Committee members
    pub backends: BackendConfigList,
    /// Client settings shared by every member
    pub rpc_client: RpcClientConfig,
    /// Backend ordering
    pub strategy: StrategyConfig,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            enable: false,
            assumed_honest: 0,
            request_timeout_ms: 5_000,
            backends: BackendConfigList::default(),
            rpc_client: RpcClientConfig::default(),
            strategy: StrategyConfig::default(),
        }
    }
}

impl ConfigValidation for AggregatorConfig {
    fn validate(&self) -> Result<()> {
        if !self.enable {
            return Ok(());
        }
        if self.backends.is_empty() {
            return Err(AnytrustError::configuration("no backends configured"));
        }
        if self.backends.len() > MAX_COMMITTEE_SIZE {
            return Err(AnytrustError::configuration(format!(
                "{} backends configured, at most {MAX_COMMITTEE_SIZE} are supported",
                self.backends.len()
            )));
        }
        if self.assumed_honest == 0 {
            return Err(AnytrustError::configuration(
                "assumed-honest must be at least 1",
            ));
        }
        if self.assumed_honest > self.backends.len() {
            return Err(AnytrustError::configuration(format!(
                "assumed-honest {} exceeds the {} configured backends",
                self.assumed_honest,
                self.backends.len()
            )));
        }
        if self.request_timeout_ms == 0 {
            return Err(AnytrustError::configuration(
                "request-timeout-ms must be positive",
            ));
        }
        for backend in self.backends.iter() {
            backend.public_key()?;
        }
        self.rpc_client.validate()
    }
}
