//! RPC endpoint of a committee member
//!
//! [`DasRpcServer::register`] fills an [`RpcRouter`] with the legacy store,
//! the three streaming methods, and the read-side methods. An HTTP layer
//! would sit in front of the router; the router itself is transport-free.

use crate::backend::{DasReader, DasService, DasWriter, HealthCheck};
use crate::rpc_client::{
    StoreResult, EXPIRATION_POLICY_METHOD, GET_BY_HASH_METHOD, HEALTH_CHECK_METHOD,
    LEGACY_STORE_METHOD,
};
use anytrust_core::effects::{MetricsEffects, NoopMetrics};
use anytrust_core::{Hash32, Result};
use anytrust_streaming::rpc::{param, to_param};
use anytrust_streaming::{
    register_stream_handlers, CompletedMessage, DataStreamReceiver, DataStreamingRpcMethods,
    HexBytes, HexU64, PayloadVerifier, RpcError, RpcParams, RpcRouter, StreamCompletion,
};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, trace};

const STORE_SUCCESS_METRIC: &str = "anytrust/rpc/server/store/success/total";
const STORE_FAILURE_METRIC: &str = "anytrust/rpc/server/store/failure/total";
const STORED_BYTES_METRIC: &str = "anytrust/rpc/server/store/bytes";

/// Serves a local backend over RPC
pub struct DasRpcServer {
    service: Arc<dyn DasService>,
    verifier: PayloadVerifier,
    metrics: Arc<dyn MetricsEffects>,
}

impl DasRpcServer {
    /// Server for `service`; store requests must pass `verifier`
    pub fn new(service: Arc<dyn DasService>, verifier: PayloadVerifier) -> Self {
        Self {
            service,
            verifier,
            metrics: Arc::new(NoopMetrics),
        }
    }

    /// Report store outcomes to `metrics`
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsEffects>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Register all methods on `router`
    ///
    /// Without a `receiver` only the legacy store is offered, so senders
    /// have to fall back to it.
    pub fn register(
        self: &Arc<Self>,
        router: &mut RpcRouter,
        receiver: Option<(Arc<DataStreamReceiver>, &DataStreamingRpcMethods)>,
    ) {
        let server = self.clone();
        router.register(LEGACY_STORE_METHOD, move |params: RpcParams| {
            let server = server.clone();
            async move {
                let message: HexBytes = param(&params, 0)?;
                let timeout: HexU64 = param(&params, 1)?;
                let signature: HexBytes = param(&params, 2)?;
                let result = server.store(message.0, timeout.0, &signature.0).await?;
                Ok::<_, RpcError>(to_param(result))
            }
        });

        let server = self.clone();
        router.register(HEALTH_CHECK_METHOD, move |_params: RpcParams| {
            let server = server.clone();
            async move {
                server.service.health_check().await?;
                Ok::<_, RpcError>(Value::Null)
            }
        });

        let server = self.clone();
        router.register(EXPIRATION_POLICY_METHOD, move |_params: RpcParams| {
            let server = server.clone();
            async move {
                let policy = server.service.expiration_policy().await?;
                Ok::<_, RpcError>(to_param(policy.to_string()))
            }
        });

        let server = self.clone();
        router.register(GET_BY_HASH_METHOD, move |params: RpcParams| {
            let server = server.clone();
            async move {
                let requested: HexBytes = param(&params, 0)?;
                let hash = Hash32::from_slice(&requested.0)?;
                let data = server.service.get_by_hash(hash).await?;
                Ok::<_, RpcError>(to_param(HexBytes(data)))
            }
        });

        if let Some((receiver, methods)) = receiver {
            register_stream_handlers(router, methods, receiver, self.clone());
        }
    }

    /// Legacy single-shot store; the request signature covers `(message, timeout)`
    pub async fn store(&self, message: Vec<u8>, timeout: u64, signature: &[u8]) -> Result<StoreResult> {
        trace!(size = message.len(), timeout, "rpc server store");
        let result = async {
            self.verifier.verify(signature, &message, &[timeout]).await?;
            self.store_verified(&message, timeout).await
        }
        .await;
        if result.is_err() {
            self.metrics.increment_counter(STORE_FAILURE_METRIC, 1);
        }
        result
    }

    async fn store_verified(&self, message: &[u8], timeout: u64) -> Result<StoreResult> {
        let cert = self.service.store(message, timeout).await?;
        self.metrics.increment_counter(STORE_SUCCESS_METRIC, 1);
        self.metrics
            .increment_counter(STORED_BYTES_METRIC, message.len() as u64);
        Ok(StoreResult::from_certificate(&cert))
    }
}

#[async_trait]
impl StreamCompletion for DasRpcServer {
    type Output = StoreResult;

    async fn complete(&self, message: CompletedMessage) -> Result<StoreResult> {
        debug!(size = message.data.len(), timeout = message.timeout, "storing streamed message");
        let result = self.store_verified(&message.data, message.timeout).await;
        if result.is_err() {
            self.metrics.increment_counter(STORE_FAILURE_METRIC, 1);
        }
        result
    }
}
