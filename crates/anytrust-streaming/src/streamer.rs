//! Sender side of the streaming protocol
//!
//! [`DataStreamer::stream_data`] runs start, parallel chunk sends and
//! finalize against one endpoint. The phases are also exposed one by one so
//! that callers can resend chunks or drive the protocol by hand.

use crate::config::{DataStreamerConfig, DataStreamingRpcMethods};
use crate::message_store::MessageId;
use crate::receiver::StartStreamingResult;
use crate::rpc::{call_typed, to_param, HexBytes, HexU64, RpcClient};
use crate::signing::PayloadSigner;
use anytrust_core::effects::{MetricsEffects, NoopMetrics, PhysicalTimeEffects};
use anytrust_core::{AnytrustError, ConfigValidation, Result};
use futures::stream::{self, StreamExt, TryStreamExt};
use serde::de::DeserializeOwned;
use std::marker::PhantomData;
use std::ops::Range;
use std::sync::Arc;
use tracing::{debug, warn};

const CHUNK_SUCCESS_METRIC: &str = "anytrust/rpc/sendchunk/success/total";
const CHUNK_FAILURE_METRIC: &str = "anytrust/rpc/sendchunk/failure/total";

/// Shape of one protocol instance, as signed in the start message
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamParams {
    /// Unix seconds at signing
    pub timestamp: u64,
    /// Number of chunks, `ceil(total_size / chunk_size)`
    pub n_chunks: u64,
    /// Payload bytes in every chunk but the last
    pub chunk_size: u64,
    /// Payload length in bytes
    pub total_size: u64,
    /// Expiry passed through to the store
    pub timeout: u64,
}

impl StreamParams {
    /// Parameters for a `total_size` byte payload cut into `chunk_size` pieces
    pub fn new(total_size: u64, chunk_size: u64, timeout: u64, timestamp: u64) -> Self {
        Self {
            timestamp,
            n_chunks: total_size.div_ceil(chunk_size.max(1)),
            chunk_size,
            total_size,
            timeout,
        }
    }

    /// Length of the final chunk
    pub fn last_chunk_len(&self) -> u64 {
        (self.total_size - 1) % self.chunk_size + 1
    }

    fn extras(&self) -> [u64; 5] {
        [
            self.timestamp,
            self.n_chunks,
            self.chunk_size,
            self.total_size,
            self.timeout,
        ]
    }
}

/// Streams payloads to one receiving endpoint
///
/// `T` is the result type returned by the endpoint's finalize method.
pub struct DataStreamer<T> {
    chunk_size: usize,
    max_parallel_chunks: usize,
    methods: DataStreamingRpcMethods,
    signer: PayloadSigner,
    client: Arc<dyn RpcClient>,
    time: Arc<dyn PhysicalTimeEffects>,
    metrics: Arc<dyn MetricsEffects>,
    _result: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> DataStreamer<T> {
    /// Streamer for the endpoint behind `client`
    pub fn new(
        config: DataStreamerConfig,
        signer: PayloadSigner,
        client: Arc<dyn RpcClient>,
        time: Arc<dyn PhysicalTimeEffects>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            chunk_size: config.chunk_size()?,
            max_parallel_chunks: config.max_parallel_chunks,
            methods: config.rpc_methods,
            signer,
            client,
            time,
            metrics: Arc::new(NoopMetrics),
            _result: PhantomData,
        })
    }

    /// Report chunk outcomes to `metrics`
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsEffects>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Payload bytes per chunk
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Run the whole protocol for `payload`
    pub async fn stream_data(&self, payload: &[u8], timeout: u64) -> Result<T> {
        if payload.is_empty() {
            return Err(AnytrustError::protocol_violation(
                "can't stream an empty payload",
            ));
        }
        let timestamp = self.time.physical_time().await?.ts_secs();
        let params = StreamParams::new(
            payload.len() as u64,
            self.chunk_size as u64,
            timeout,
            timestamp,
        );
        let message_id = self.start_stream(params).await?;

        // Items must be owned for this future to stay Send
        let ranges: Vec<(u64, Range<usize>)> = (0..payload.len())
            .step_by(self.chunk_size)
            .enumerate()
            .map(|(chunk_id, start)| {
                let end = (start + self.chunk_size).min(payload.len());
                (chunk_id as u64, start..end)
            })
            .collect();
        stream::iter(ranges)
            .map(move |(chunk_id, range)| async move {
                self.send_chunk(message_id, chunk_id, &payload[range]).await
            })
            .buffer_unordered(self.max_parallel_chunks)
            .try_collect::<Vec<()>>()
            .await?;

        self.finalize_stream(message_id).await
    }

    /// Open a protocol instance on the receiver
    pub async fn start_stream(&self, params: StreamParams) -> Result<MessageId> {
        let signature = self.signer.sign(&[], &params.extras()).await?;
        let result: StartStreamingResult = call_typed(
            self.client.as_ref(),
            &self.methods.start_stream,
            vec![
                to_param(HexU64(params.timestamp)),
                to_param(HexU64(params.n_chunks)),
                to_param(HexU64(params.chunk_size)),
                to_param(HexU64(params.total_size)),
                to_param(HexU64(params.timeout)),
                to_param(HexBytes(signature)),
            ],
        )
        .await?;
        let message_id = MessageId(result.message_id.0);
        debug!(message_id = %message_id, n_chunks = params.n_chunks, "stream started");
        Ok(message_id)
    }

    /// Send one chunk; resending identical bytes is harmless
    pub async fn send_chunk(&self, message_id: MessageId, chunk_id: u64, chunk: &[u8]) -> Result<()> {
        let signature = self.signer.sign(chunk, &[message_id.0, chunk_id]).await?;
        let outcome = self
            .client
            .call(
                &self.methods.stream_chunk,
                vec![
                    to_param(HexU64(message_id.0)),
                    to_param(HexU64(chunk_id)),
                    to_param(HexBytes(chunk.to_vec())),
                    to_param(HexBytes(signature)),
                ],
            )
            .await;
        match outcome {
            Ok(_) => {
                self.metrics.increment_counter(CHUNK_SUCCESS_METRIC, 1);
                Ok(())
            }
            Err(err) => {
                self.metrics.increment_counter(CHUNK_FAILURE_METRIC, 1);
                warn!(message_id = %message_id, chunk_id, error = %err, "chunk send failed");
                Err(err.into())
            }
        }
    }

    /// Close the protocol instance and decode the receiver's result
    pub async fn finalize_stream(&self, message_id: MessageId) -> Result<T> {
        let signature = self.signer.sign(&[], &[message_id.0]).await?;
        call_typed(
            self.client.as_ref(),
            &self.methods.finalize_stream,
            vec![
                to_param(HexU64(message_id.0)),
                to_param(HexBytes(signature)),
            ],
        )
        .await
    }
}
