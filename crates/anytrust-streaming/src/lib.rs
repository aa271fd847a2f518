//! # AnyTrust Streaming
//!
//! Chunked, signed transfer of large payloads over an RPC channel whose
//! request bodies are size limited.
//!
//! ```text
//! DataStreamer                         DataStreamReceiver
//!   start(ts, n, size, total, timeout) ──▶ verify, window, replay, allocate id
//!   chunk(id, i, bytes)   × n (parallel)──▶ verify, length check, store slot
//!   finalize(id)                       ──▶ verify, reassemble, remove
//! ```
//!
//! Each message is authenticated with a [`PayloadSigner`] and checked by a
//! matching [`PayloadVerifier`]. The receiver keeps partial messages in a
//! [`MessageStore`] and drops stalled ones from a periodic reaper.

#![forbid(unsafe_code)]

pub mod config;
pub mod message_store;
pub mod receiver;
pub mod rpc;
pub mod server;
pub mod signing;
pub mod streamer;

pub use config::{
    chunk_framing_overhead, DataStreamReceiverConfig, DataStreamerConfig, DataStreamingRpcMethods,
};
pub use message_store::{
    CompletedMessage, ExpirationCallback, MessageId, MessageStore, ReapReport,
    DEFAULT_MAX_MESSAGE_SIZE,
};
pub use receiver::{DataStreamReceiver, StartStreamingResult};
pub use rpc::{
    HexBytes, HexU64, LoopbackClient, RetryingClient, RpcClient, RpcError, RpcParams, RpcRouter,
};
pub use server::{register_stream_handlers, EchoCompletion, ProtocolResult, StreamCompletion};
pub use signing::{
    payload_digest, DataSigner, Ed25519DataSigner, OracleVerifier, PayloadSigner, PayloadVerifier,
    SignatureVerifier, SignerOracle, StaticSignerSet, TrustingVerifier,
};
pub use streamer::{DataStreamer, StreamParams};
