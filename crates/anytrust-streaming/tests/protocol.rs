//! End-to-end tests of the streaming protocol over an in-process router

use anytrust_core::effects::PhysicalTimeEffects;
use anytrust_core::{AnytrustError, SigningKey};
use anytrust_streaming::{
    chunk_framing_overhead, register_stream_handlers, DataStreamReceiver, DataStreamReceiverConfig,
    DataStreamer, DataStreamerConfig, DataStreamingRpcMethods, EchoCompletion, LoopbackClient,
    MessageId, PayloadSigner, PayloadVerifier, ProtocolResult, RetryingClient, RpcClient, RpcRouter,
    StreamParams,
};
use anytrust_testkit::{init_test_tracing, signing_key, ControllableTime, FlakyClient, ScriptedRandom};
use assert_matches::assert_matches;
use proptest::prelude::*;
use std::sync::Arc;

const TIMEOUT: u64 = 1_800_000_000;

struct Harness {
    streamer: DataStreamer<ProtocolResult>,
    receiver: Arc<DataStreamReceiver>,
    client: Arc<LoopbackClient>,
    time: Arc<ControllableTime>,
    signer: PayloadSigner,
    methods: DataStreamingRpcMethods,
}

fn streamer_config(methods: &DataStreamingRpcMethods, chunk_payload: usize) -> DataStreamerConfig {
    DataStreamerConfig {
        max_store_chunk_body_size: chunk_framing_overhead(methods) + 2 * chunk_payload,
        rpc_methods: methods.clone(),
        max_parallel_chunks: 4,
    }
}

fn harness_with(chunk_payload: usize, random: ScriptedRandom, config: DataStreamReceiverConfig) -> Harness {
    init_test_tracing();
    let key: SigningKey = signing_key(42);
    let signer = PayloadSigner::ed25519(key.clone());
    let methods = DataStreamingRpcMethods::default();
    let time = Arc::new(ControllableTime::at_realistic_epoch());

    let receiver = Arc::new(
        DataStreamReceiver::new(
            PayloadVerifier::for_signers([key.public_key()]),
            config,
            time.clone(),
            Arc::new(random),
        )
        .unwrap(),
    );
    let mut router = RpcRouter::new();
    register_stream_handlers(&mut router, &methods, receiver.clone(), Arc::new(EchoCompletion));

    let stream_config = streamer_config(&methods, chunk_payload);
    let client = Arc::new(
        LoopbackClient::new(Arc::new(router))
            .with_max_body_size(stream_config.max_store_chunk_body_size),
    );
    let streamer = DataStreamer::new(stream_config, signer.clone(), client.clone(), time.clone()).unwrap();
    Harness {
        streamer,
        receiver,
        client,
        time,
        signer,
        methods,
    }
}

fn harness(chunk_payload: usize) -> Harness {
    harness_with(chunk_payload, ScriptedRandom::seeded(1), DataStreamReceiverConfig::default())
}

fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

impl Harness {
    async fn params(&self, total: u64) -> StreamParams {
        let now = self.time.physical_time().await.unwrap();
        StreamParams::new(total, self.streamer.chunk_size() as u64, TIMEOUT, now.ts_secs())
    }
}

#[tokio::test]
async fn test_ten_kilobytes_in_one_kilobyte_chunks() {
    let h = harness(1024);
    assert_eq!(h.streamer.chunk_size(), 1024);

    let data = payload(10 * 1024);
    let result = h.streamer.stream_data(&data, TIMEOUT).await.unwrap();
    assert_eq!(result.message.0, data);

    assert_eq!(h.client.call_count(&h.methods.start_stream), 1);
    assert_eq!(h.client.call_count(&h.methods.stream_chunk), 10);
    assert_eq!(h.client.call_count(&h.methods.finalize_stream), 1);
    assert_eq!(h.receiver.pending_messages(), 0);
}

#[tokio::test]
async fn test_odd_sizes_round_trip() {
    let h = harness(100);
    for len in [1usize, 99, 100, 101, 250, 1000] {
        let data = payload(len);
        let result = h.streamer.stream_data(&data, TIMEOUT).await.unwrap();
        assert_eq!(result.message.0, data, "payload of {len} bytes");
    }
}

#[tokio::test]
async fn test_empty_payload_rejected_before_any_call() {
    let h = harness(100);
    let err = h.streamer.stream_data(&[], TIMEOUT).await.unwrap_err();
    assert_matches!(err, AnytrustError::ProtocolViolation { .. });
    assert!(h.client.call_counts().is_empty());
}

#[tokio::test]
async fn test_resent_chunk_is_idempotent() {
    let h = harness(4);
    let data = payload(10);
    let id = h.streamer.start_stream(h.params(10).await).await.unwrap();

    for _ in 0..3 {
        h.streamer.send_chunk(id, 0, &data[0..4]).await.unwrap();
    }
    h.streamer.send_chunk(id, 1, &data[4..8]).await.unwrap();
    h.streamer.send_chunk(id, 2, &data[8..10]).await.unwrap();

    let result = h.streamer.finalize_stream(id).await.unwrap();
    assert_eq!(result.message.0, data);
}

#[tokio::test]
async fn test_inconsistent_resend_aborts_protocol() {
    let h = harness(4);
    let id = h.streamer.start_stream(h.params(8).await).await.unwrap();
    h.streamer.send_chunk(id, 0, b"abcd").await.unwrap();

    let err = h.streamer.send_chunk(id, 0, b"abce").await.unwrap_err();
    assert_matches!(err, AnytrustError::ProtocolViolation { .. });
    assert_eq!(h.receiver.pending_messages(), 0);

    // The session is gone for every later call
    assert!(h.streamer.send_chunk(id, 1, b"efgh").await.is_err());
    assert!(h.streamer.finalize_stream(id).await.is_err());
}

#[tokio::test]
async fn test_wrong_chunk_length_rejected() {
    let h = harness(4);
    let id = h.streamer.start_stream(h.params(10).await).await.unwrap();
    // Last chunk must be 2 bytes
    assert!(h.streamer.send_chunk(id, 2, b"xyz").await.is_err());
    assert!(h.streamer.send_chunk(id, 0, b"abc").await.is_err());
    assert!(h.streamer.send_chunk(id, 3, b"ab").await.is_err());
    h.streamer.send_chunk(id, 2, b"xy").await.unwrap();
}

#[tokio::test]
async fn test_replayed_start_rejected() {
    let h = harness(4);
    let params = h.params(8).await;
    let extras = [params.timestamp, params.n_chunks, params.chunk_size, params.total_size, params.timeout];
    let sig = h.signer.sign(&[], &extras).await.unwrap();

    h.receiver
        .start_receiving(params.timestamp, 2, 4, 8, TIMEOUT, &sig)
        .await
        .unwrap();
    let err = h
        .receiver
        .start_receiving(params.timestamp, 2, 4, 8, TIMEOUT, &sig)
        .await
        .unwrap_err();
    assert_matches!(err, AnytrustError::ProtocolViolation { .. });
    assert_eq!(h.receiver.pending_messages(), 1);
}

#[tokio::test]
async fn test_double_finalize_rejected() {
    let h = harness(4);
    let id = h.streamer.start_stream(h.params(4).await).await.unwrap();
    h.streamer.send_chunk(id, 0, b"abcd").await.unwrap();
    h.streamer.finalize_stream(id).await.unwrap();
    assert!(h.streamer.finalize_stream(id).await.is_err());
}

#[tokio::test]
async fn test_unknown_message_rejected() {
    let h = harness(4);
    assert!(h.streamer.send_chunk(MessageId(7), 0, b"abcd").await.is_err());
    assert!(h.streamer.finalize_stream(MessageId(7)).await.is_err());
}

#[tokio::test]
async fn test_stale_start_rejected() {
    let h = harness(4);
    let params = h.params(4).await;
    let validity = h.receiver.config().request_validity_ms;
    h.time.advance_ms(validity + 1_000);
    let err = h.streamer.start_stream(params).await.unwrap_err();
    assert_matches!(err, AnytrustError::ProtocolViolation { .. });
}

#[tokio::test]
async fn test_idle_message_expires() {
    let h = harness(4);
    let expiry = h.receiver.config().message_collection_expiry_ms;
    let id = h.streamer.start_stream(h.params(8).await).await.unwrap();
    h.streamer.send_chunk(id, 0, b"abcd").await.unwrap();

    h.time.advance_ms(expiry / 2);
    assert!(h.receiver.reap_once().await.unwrap().expired.is_empty());

    // Activity pushes expiry out
    h.streamer.send_chunk(id, 1, b"efgh").await.unwrap();
    h.time.advance_ms(expiry / 2 + 1);
    assert!(h.receiver.reap_once().await.unwrap().expired.is_empty());

    h.time.advance_ms(expiry);
    let report = h.receiver.reap_once().await.unwrap();
    assert_eq!(report.expired, vec![id]);
    assert!(h.streamer.finalize_stream(id).await.is_err());
}

#[tokio::test(start_paused = true)]
async fn test_background_reaper_expires_idle_message() {
    let h = harness(4);
    let config = h.receiver.config().clone();
    let id = h.streamer.start_stream(h.params(8).await).await.unwrap();
    h.streamer.send_chunk(id, 0, b"abcd").await.unwrap();

    h.receiver.start();
    h.time.advance_ms(config.message_collection_expiry_ms + 1);
    tokio::time::sleep(std::time::Duration::from_millis(3 * config.reap_interval_ms)).await;
    assert_eq!(h.receiver.pending_messages(), 0);

    let err = h.streamer.finalize_stream(id).await.unwrap_err();
    assert!(err.to_string().contains("unknown message"), "{err}");
    h.receiver.stop().await;
    assert!(!h.receiver.is_reaping());
}

#[tokio::test]
async fn test_message_id_collision_draws_again() {
    let h = harness_with(
        4,
        ScriptedRandom::with_script(3, [11, 11, 12]),
        DataStreamReceiverConfig::default(),
    );
    let first = h.streamer.start_stream(h.params(4).await).await.unwrap();
    h.time.advance_ms(1_000);
    let second = h.streamer.start_stream(h.params(4).await).await.unwrap();
    assert_eq!(first, MessageId(11));
    assert_eq!(second, MessageId(12));
}

#[tokio::test]
async fn test_pending_limit_enforced() {
    let config = DataStreamReceiverConfig {
        max_pending_messages: 2,
        ..Default::default()
    };
    let h = harness_with(4, ScriptedRandom::seeded(5), config);
    for _ in 0..2 {
        h.streamer.start_stream(h.params(4).await).await.unwrap();
        h.time.advance_ms(1_000);
    }
    let err = h.streamer.start_stream(h.params(4).await).await.unwrap_err();
    assert_matches!(err, AnytrustError::ProtocolViolation { .. });
    assert_eq!(h.receiver.pending_messages(), 2);
}

#[tokio::test]
async fn test_unavailable_chunk_calls_are_retried() {
    let h = harness(4);
    let flaky: Arc<dyn RpcClient> = Arc::new(RetryingClient::new(
        FlakyClient::new(h.client.clone(), h.methods.stream_chunk.clone(), 2),
        3,
        10,
        h.time.clone(),
    ));
    let streamer: DataStreamer<ProtocolResult> = DataStreamer::new(
        streamer_config(&h.methods, 4),
        h.signer.clone(),
        flaky,
        h.time.clone(),
    )
    .unwrap();

    let data = payload(8);
    let result = streamer.stream_data(&data, TIMEOUT).await.unwrap();
    assert_eq!(result.message.0, data);
    assert_eq!(h.client.call_count(&h.methods.stream_chunk), 2);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_any_payload_survives_streaming(
        data in proptest::collection::vec(any::<u8>(), 1..600),
        chunk in 1usize..128,
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let received = runtime.block_on(async {
            let h = harness(chunk);
            h.streamer.stream_data(&data, TIMEOUT).await.unwrap().message.0
        });
        prop_assert_eq!(received, data);
    }
}
