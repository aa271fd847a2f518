//! Routing protocol methods onto a receiver

use crate::config::DataStreamingRpcMethods;
use crate::message_store::{CompletedMessage, MessageId};
use crate::receiver::DataStreamReceiver;
use crate::rpc::{param, to_param, HexBytes, HexU64, RpcError, RpcParams, RpcRouter};
use anytrust_core::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Turns a reassembled message into the finalize result
#[async_trait]
pub trait StreamCompletion: Send + Sync + 'static {
    /// Value returned to the sender on finalize
    type Output: Serialize + Send;

    /// Consume a finished message
    async fn complete(&self, message: CompletedMessage) -> Result<Self::Output>;
}

/// Finalize result that hands the payload back
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolResult {
    /// Reassembled payload
    pub message: HexBytes,
}

/// Completion returning [`ProtocolResult`]
#[derive(Clone, Copy, Debug, Default)]
pub struct EchoCompletion;

#[async_trait]
impl StreamCompletion for EchoCompletion {
    type Output = ProtocolResult;

    async fn complete(&self, message: CompletedMessage) -> Result<ProtocolResult> {
        Ok(ProtocolResult {
            message: HexBytes(message.data),
        })
    }
}

/// Register start, chunk and finalize handlers under `methods`
pub fn register_stream_handlers<C: StreamCompletion>(
    router: &mut RpcRouter,
    methods: &DataStreamingRpcMethods,
    receiver: Arc<DataStreamReceiver>,
    completion: Arc<C>,
) {
    let start_receiver = receiver.clone();
    router.register(methods.start_stream.clone(), move |params: RpcParams| {
        let receiver = start_receiver.clone();
        async move {
            let timestamp: HexU64 = param(&params, 0)?;
            let n_chunks: HexU64 = param(&params, 1)?;
            let chunk_size: HexU64 = param(&params, 2)?;
            let total_size: HexU64 = param(&params, 3)?;
            let timeout: HexU64 = param(&params, 4)?;
            let signature: HexBytes = param(&params, 5)?;
            let result = receiver
                .start_receiving(
                    timestamp.0,
                    n_chunks.0,
                    chunk_size.0,
                    total_size.0,
                    timeout.0,
                    &signature.0,
                )
                .await?;
            Ok::<_, RpcError>(to_param(result))
        }
    });

    let chunk_receiver = receiver.clone();
    router.register(methods.stream_chunk.clone(), move |params: RpcParams| {
        let receiver = chunk_receiver.clone();
        async move {
            let message_id: HexU64 = param(&params, 0)?;
            let chunk_id: HexU64 = param(&params, 1)?;
            let chunk: HexBytes = param(&params, 2)?;
            let signature: HexBytes = param(&params, 3)?;
            receiver
                .receive_chunk(MessageId(message_id.0), chunk_id.0, chunk.0, &signature.0)
                .await?;
            Ok::<_, RpcError>(serde_json::Value::Null)
        }
    });

    router.register(methods.finalize_stream.clone(), move |params: RpcParams| {
        let receiver = receiver.clone();
        let completion = completion.clone();
        async move {
            let message_id: HexU64 = param(&params, 0)?;
            let signature: HexBytes = param(&params, 1)?;
            let message = receiver
                .finalize_receiving(MessageId(message_id.0), &signature.0)
                .await?;
            let output = completion.complete(message).await?;
            Ok::<_, RpcError>(to_param(output))
        }
    });
}
