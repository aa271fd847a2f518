//! Streamer and receiver configuration

use crate::message_store::DEFAULT_MAX_MESSAGE_SIZE;
use crate::rpc::request_body_len;
use anytrust_core::{AnytrustError, ConfigValidation, Result};
use serde::{Deserialize, Serialize};

/// Allowance for message id, chunk id, signature and their JSON encoding
pub const CHUNK_PARAMS_ALLOWANCE: usize = 512;

/// Names of the three protocol methods on the receiving endpoint
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DataStreamingRpcMethods {
    /// Opens a protocol instance
    pub start_stream: String,
    /// Carries one chunk
    pub stream_chunk: String,
    /// Closes the instance and returns the result
    pub finalize_stream: String,
}

impl DataStreamingRpcMethods {
    /// Methods served by a DA provider for chunked stores
    pub fn daprovider() -> Self {
        Self {
            start_stream: "daprovider_startChunkedStore".into(),
            stream_chunk: "daprovider_sendChunk".into(),
            finalize_stream: "daprovider_commitChunkedStore".into(),
        }
    }

    /// Methods served by a committee member for chunked stores
    pub fn das() -> Self {
        Self {
            start_stream: "das_startChunkedStore".into(),
            stream_chunk: "das_sendChunk".into(),
            finalize_stream: "das_commitChunkedStore".into(),
        }
    }

    fn longest(&self) -> &str {
        [&self.start_stream, &self.stream_chunk, &self.finalize_stream]
            .into_iter()
            .max_by_key(|name| name.len())
            .map(String::as_str)
            .unwrap_or_default()
    }
}

impl Default for DataStreamingRpcMethods {
    fn default() -> Self {
        Self::daprovider()
    }
}

impl ConfigValidation for DataStreamingRpcMethods {
    fn validate(&self) -> Result<()> {
        for (field, name) in [
            ("start-stream", &self.start_stream),
            ("stream-chunk", &self.stream_chunk),
            ("finalize-stream", &self.finalize_stream),
        ] {
            if name.trim().is_empty() {
                return Err(AnytrustError::configuration(format!(
                    "rpc-methods.{field} must not be empty"
                )));
            }
        }
        Ok(())
    }
}

/// Bytes of a chunk request that are not chunk payload
pub fn chunk_framing_overhead(methods: &DataStreamingRpcMethods) -> usize {
    CHUNK_PARAMS_ALLOWANCE + request_body_len(methods.longest(), &[])
}

/// Sender configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct DataStreamerConfig {
    /// Upper bound on one request body, in bytes
    pub max_store_chunk_body_size: usize,
    /// Method names on the receiving endpoint
    pub rpc_methods: DataStreamingRpcMethods,
    /// Chunks in flight at once
    pub max_parallel_chunks: usize,
}

impl DataStreamerConfig {
    /// Defaults with custom method names
    pub fn with_methods(rpc_methods: DataStreamingRpcMethods) -> Self {
        Self {
            rpc_methods,
            ..Self::default()
        }
    }

    /// Payload bytes per chunk
    ///
    /// Chunks are hex encoded on the wire, so each payload byte costs two
    /// bytes of request body.
    pub fn chunk_size(&self) -> Result<usize> {
        let overhead = chunk_framing_overhead(&self.rpc_methods);
        let room = self
            .max_store_chunk_body_size
            .checked_sub(overhead)
            .filter(|room| *room >= 2)
            .ok_or_else(|| {
                AnytrustError::configuration(format!(
                    "max-store-chunk-body-size {} leaves no room for chunk data after {overhead} bytes of framing",
                    self.max_store_chunk_body_size
                ))
            })?;
        Ok(room / 2)
    }
}

impl Default for DataStreamerConfig {
    fn default() -> Self {
        Self {
            max_store_chunk_body_size: 5 * 1024 * 1024,
            rpc_methods: DataStreamingRpcMethods::default(),
            max_parallel_chunks: 16,
        }
    }
}

impl ConfigValidation for DataStreamerConfig {
    fn validate(&self) -> Result<()> {
        self.rpc_methods.validate()?;
        if self.max_parallel_chunks == 0 {
            return Err(AnytrustError::configuration(
                "max-parallel-chunks must be at least 1",
            ));
        }
        self.chunk_size().map(|_| ())
    }
}

/// Receiver configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct DataStreamReceiverConfig {
    /// Concurrent protocol instances accepted
    pub max_pending_messages: usize,
    /// Idle time after which an unfinished message is dropped
    pub message_collection_expiry_ms: u64,
    /// Accepted clock skew for start requests, both directions
    pub request_validity_ms: u64,
    /// Period of the background reaper
    pub reap_interval_ms: u64,
    /// Largest message a sender may announce, in bytes
    pub max_message_size: u64,
}

impl Default for DataStreamReceiverConfig {
    fn default() -> Self {
        Self {
            max_pending_messages: 10,
            message_collection_expiry_ms: 60_000,
            request_validity_ms: 300_000,
            reap_interval_ms: 1_000,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

impl ConfigValidation for DataStreamReceiverConfig {
    fn validate(&self) -> Result<()> {
        if self.max_pending_messages == 0 {
            return Err(AnytrustError::configuration(
                "max-pending-messages must be at least 1",
            ));
        }
        if self.message_collection_expiry_ms == 0 || self.request_validity_ms == 0 {
            return Err(AnytrustError::configuration(
                "message-collection-expiry-ms and request-validity-ms must be positive",
            ));
        }
        if self.reap_interval_ms == 0 {
            return Err(AnytrustError::configuration(
                "reap-interval-ms must be positive",
            ));
        }
        if self.max_message_size == 0 {
            return Err(AnytrustError::configuration(
                "max-message-size must be positive",
            ));
        }
        Ok(())
    }
}
