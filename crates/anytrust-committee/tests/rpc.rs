//! Committee members reached over the in-process RPC router

use anytrust_committee::rpc_client::LEGACY_STORE_METHOD;
use anytrust_committee::{
    Aggregator, AggregatorConfig, BackendConfig, BackendConfigList, DasReader, DasRpcClient,
    DasRpcServer, DasWriter, HealthCheck, MemoryStorageService, RpcClientConfig, RpcConnector,
    SignAfterStoreWriter,
};
use anytrust_core::{hash, AnytrustError, ExpirationPolicy, Hash32, Result, SigningKey};
use anytrust_streaming::{
    chunk_framing_overhead, DataStreamReceiver, DataStreamReceiverConfig, DataStreamerConfig,
    DataStreamingRpcMethods, LoopbackClient, PayloadSigner, PayloadVerifier, RpcClient, RpcRouter,
};
use anytrust_testkit::{init_test_tracing, signing_key, TestEffects};
use assert_matches::assert_matches;
use std::collections::HashMap;
use std::sync::Arc;

const TIMEOUT: u64 = 1_800_000_000;
const CHUNK: usize = 512;

struct Member {
    key: SigningKey,
    storage: Arc<MemoryStorageService>,
    client: Arc<LoopbackClient>,
}

fn methods() -> DataStreamingRpcMethods {
    DataStreamingRpcMethods::das()
}

fn client_config(enable_chunked_store: bool) -> RpcClientConfig {
    RpcClientConfig {
        enable_chunked_store,
        data_stream: DataStreamerConfig {
            max_store_chunk_body_size: chunk_framing_overhead(&methods()) + 2 * CHUNK,
            rpc_methods: methods(),
            max_parallel_chunks: 4,
        },
        retries: 0,
        retry_delay_ms: 0,
    }
}

/// A committee member behind a router; without streaming it only speaks legacy store
fn member(seed: u64, poster: &SigningKey, effects: &TestEffects, streaming: bool) -> Member {
    init_test_tracing();
    let key = signing_key(seed);
    let storage = Arc::new(MemoryStorageService::new());
    let writer = Arc::new(SignAfterStoreWriter::new(storage.clone(), key.clone()));
    let verifier = PayloadVerifier::for_signers([poster.public_key()]);
    let server = Arc::new(DasRpcServer::new(writer, verifier.clone()));

    let mut router = RpcRouter::new();
    let methods = methods();
    let receiver = streaming.then(|| {
        Arc::new(
            DataStreamReceiver::new(
                verifier,
                DataStreamReceiverConfig::default(),
                effects.time.clone(),
                effects.random.clone(),
            )
            .unwrap(),
        )
    });
    server.register(&mut router, receiver.map(|r| (r, &methods)));

    Member {
        key,
        storage,
        client: Arc::new(LoopbackClient::new(Arc::new(router))),
    }
}

fn rpc_client(member: &Member, poster: &SigningKey, effects: &TestEffects, chunked: bool) -> DasRpcClient {
    DasRpcClient::new(
        "member",
        member.client.clone(),
        PayloadSigner::ed25519(poster.clone()),
        &client_config(chunked),
        effects.time.clone(),
    )
    .unwrap()
}

fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 253) as u8).collect()
}

#[tokio::test]
async fn test_chunked_store_over_rpc() {
    let poster = signing_key(100);
    let effects = TestEffects::default();
    let m = member(1, &poster, &effects, true);
    let client = rpc_client(&m, &poster, &effects, true);

    let data = payload(3 * CHUNK + 1);
    let cert = client.store(&data, TIMEOUT).await.unwrap();

    assert_eq!(cert.data_hash, hash(&data));
    assert_eq!(cert.timeout, TIMEOUT);
    m.key
        .public_key()
        .verify(&cert.signable_fields(), cert.signature.as_single().unwrap())
        .unwrap();
    assert!(m.storage.contains(&cert.data_hash));
    assert_eq!(m.client.call_count(&methods().stream_chunk), 4);
    assert_eq!(m.client.call_count(LEGACY_STORE_METHOD), 0);
    assert!(!client.is_legacy_only());
}

#[tokio::test]
async fn test_falls_back_to_legacy_store_and_remembers() {
    let poster = signing_key(100);
    let effects = TestEffects::default();
    let m = member(2, &poster, &effects, false);
    let client = rpc_client(&m, &poster, &effects, true);

    let first = client.store(b"first", TIMEOUT).await.unwrap();
    assert_eq!(first.data_hash, hash(b"first"));
    assert!(client.is_legacy_only());

    client.store(b"second", TIMEOUT).await.unwrap();
    assert_eq!(m.client.call_count(&methods().start_stream), 1);
    assert_eq!(m.client.call_count(LEGACY_STORE_METHOD), 2);
    assert!(m.storage.contains(&hash(b"second")));
}

#[tokio::test]
async fn test_chunking_disabled_uses_legacy_store() {
    let poster = signing_key(100);
    let effects = TestEffects::default();
    let m = member(3, &poster, &effects, true);
    let client = rpc_client(&m, &poster, &effects, false);

    client.store(b"legacy", TIMEOUT).await.unwrap();
    assert_eq!(m.client.call_count(&methods().start_stream), 0);
    assert_eq!(m.client.call_count(LEGACY_STORE_METHOD), 1);
}

#[tokio::test]
async fn test_unauthorized_poster_rejected() {
    let poster = signing_key(100);
    let intruder = signing_key(666);
    let effects = TestEffects::default();
    let m = member(4, &poster, &effects, true);

    for chunked in [true, false] {
        let client = rpc_client(&m, &intruder, &effects, chunked);
        assert!(client.store(b"sneaky", TIMEOUT).await.is_err());
    }
    assert!(m.storage.is_empty());
}

#[tokio::test]
async fn test_read_side_methods() {
    let poster = signing_key(100);
    let effects = TestEffects::default();
    let m = member(5, &poster, &effects, true);
    let client = rpc_client(&m, &poster, &effects, true);

    client.health_check().await.unwrap();
    assert_eq!(
        client.expiration_policy().await.unwrap(),
        ExpirationPolicy::KeepForever
    );

    let cert = client.store(b"fetch me", TIMEOUT).await.unwrap();
    assert_eq!(client.get_by_hash(cert.data_hash).await.unwrap(), b"fetch me");
    assert_matches!(
        client.get_by_hash(Hash32::default()).await,
        Err(AnytrustError::NotFound { .. })
    );
}

struct Directory(HashMap<String, Arc<dyn RpcClient>>);

impl RpcConnector for Directory {
    fn connect(&self, url: &str) -> Result<Arc<dyn RpcClient>> {
        self.0
            .get(url)
            .cloned()
            .ok_or_else(|| AnytrustError::transport(format!("no route to {url}")))
    }
}

#[tokio::test]
async fn test_aggregator_from_config_over_rpc() {
    let poster = signing_key(100);
    let effects = TestEffects::default();
    // Mixed fleet: one member predates chunked store
    let members: Vec<Member> = (0..3)
        .map(|i| member(10 + i, &poster, &effects, i != 1))
        .collect();

    let mut directory = HashMap::new();
    let mut backends = Vec::new();
    for (i, m) in members.iter().enumerate() {
        let url = format!("http://das-{i}:9876");
        directory.insert(url.clone(), m.client.clone() as Arc<dyn RpcClient>);
        backends.push(BackendConfig {
            url,
            pubkey: m.key.public_key().to_base64(),
        });
    }
    let config = AggregatorConfig {
        enable: true,
        assumed_honest: 1,
        backends: BackendConfigList(backends),
        rpc_client: client_config(true),
        ..Default::default()
    };

    let aggregator = Aggregator::from_config(
        &config,
        &Directory(directory),
        PayloadSigner::ed25519(poster),
        effects.aggregator_effects(),
    )
    .unwrap();
    assert!(format!("{aggregator:?}").starts_with("Aggregator {"));

    let data = payload(2 * CHUNK);
    let cert = aggregator.store(&data, TIMEOUT).await.unwrap();
    assert_eq!(cert.signers_mask, 0b111);
    aggregator
        .registry()
        .keyset()
        .verify_signature(cert.signers_mask, &cert.signable_fields(), &cert.signature)
        .unwrap();
    for m in &members {
        assert!(m.storage.contains(&cert.data_hash));
    }
    assert_eq!(members[1].client.call_count(LEGACY_STORE_METHOD), 1);
    assert_eq!(aggregator.get_by_hash(cert.data_hash).await.unwrap(), data);
    aggregator.health_check().await.unwrap();

    let metrics = effects.metrics.snapshot();
    assert_eq!(metrics.counter("anytrust/rpc/store/success/total"), 3);
    assert_eq!(
        metrics.counter("anytrust/aggregator/store/das_1_9876/success/total"),
        1
    );
}

#[tokio::test]
async fn test_from_config_rejects_bad_input() {
    let effects = TestEffects::default();
    let directory = Directory(HashMap::new());
    let signer = PayloadSigner::ed25519(signing_key(1));

    let disabled = AggregatorConfig::default();
    assert!(Aggregator::from_config(&disabled, &directory, signer.clone(), effects.aggregator_effects()).is_err());

    let unreachable = AggregatorConfig {
        enable: true,
        assumed_honest: 1,
        backends: BackendConfigList(vec![BackendConfig {
            url: "http://nowhere".into(),
            pubkey: signing_key(2).public_key().to_base64(),
        }]),
        ..Default::default()
    };
    assert_matches!(
        Aggregator::from_config(&unreachable, &directory, signer, effects.aggregator_effects()),
        Err(AnytrustError::Transport { .. })
    );
}
