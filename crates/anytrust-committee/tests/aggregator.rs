//! Quorum behaviour of the aggregator against in-memory committees

use anytrust_committee::{
    Aggregator, AggregatorEffects, AggregatorStrategy, DasReader, DasService, DasWriter, ExploreExploitStrategy,
    HealthCheck, SequentialStrategy, StrategyConfig,
};
use anytrust_core::effects::{PhysicalTime, PhysicalTimeEffects};
use anytrust_core::{hash, AnytrustError, DataAvailabilityCertificate, ExpirationPolicy, Hash32, Result};
use anytrust_testkit::{failure_bag, init_test_tracing, FailureType, TestCommittee, TestEffects};
use assert_matches::assert_matches;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

const TIMEOUT: u64 = 1_800_000_000;

fn explore_exploit(n: usize, effects: &TestEffects) -> Arc<dyn AggregatorStrategy> {
    Arc::new(ExploreExploitStrategy::new(
        n,
        &StrategyConfig::default(),
        effects.random.clone(),
    ))
}

fn assert_certifies(aggregator: &Aggregator, cert: &DataAvailabilityCertificate, message: &[u8]) {
    let registry = aggregator.registry();
    assert_eq!(cert.data_hash, hash(message));
    assert_eq!(cert.keyset_hash, registry.keyset_hash());
    assert_eq!(cert.timeout, TIMEOUT);
    assert!(cert.signer_count() as usize >= registry.required_signers());
    registry
        .keyset()
        .verify_signature(cert.signers_mask, &cert.signable_fields(), &cert.signature)
        .unwrap();
    let decoded = DataAvailabilityCertificate::deserialize(&cert.serialize()).unwrap();
    assert_eq!(&decoded, cert);
}

#[tokio::test]
async fn test_basic_aggregation() {
    init_test_tracing();
    let committee = TestCommittee::new(10);
    let effects = TestEffects::new(1);
    let registry = committee.registry(1).unwrap();
    let aggregator = TestCommittee::aggregator(registry, explore_exploit(10, &effects), &effects);

    let message = b"Test message to be stored by the aggregator";
    let cert = aggregator.store(message, TIMEOUT).await.unwrap();

    assert_certifies(&aggregator, &cert, message);
    assert_eq!(cert.signers_mask, (1 << 10) - 1);
    for storage in &committee.storages {
        assert!(storage.contains(&hash(message)));
    }

    let metrics = effects.metrics.snapshot();
    assert_eq!(metrics.counter("anytrust/aggregator/store/success/all/total"), 10);
    assert_eq!(metrics.counter("anytrust/aggregator/store/backend3/success/total"), 1);
    assert_eq!(metrics.gauge("anytrust/aggregator/store/error/gauge"), Some(0.0));
}

struct StoppedClock;

#[async_trait]
impl PhysicalTimeEffects for StoppedClock {
    async fn physical_time(&self) -> Result<PhysicalTime> {
        Err(AnytrustError::internal("clock unavailable"))
    }

    async fn sleep_ms(&self, _ms: u64) -> Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn test_unreadable_clock_leaves_stats_untouched() {
    let committee = TestCommittee::new(3);
    let effects = TestEffects::new(4);
    let aggregator = Aggregator::new(
        committee.registry(1).unwrap(),
        explore_exploit(3, &effects),
        Duration::from_millis(500),
        20,
        AggregatorEffects {
            time: Arc::new(StoppedClock),
            ..effects.aggregator_effects()
        },
    );

    let cert = aggregator.store(b"no clock", TIMEOUT).await.unwrap();
    assert_certifies(&aggregator, &cert, b"no clock");
    assert_eq!(aggregator.get_by_hash(cert.data_hash).await.unwrap(), b"no clock");
    for summary in aggregator.stats_snapshot() {
        assert_eq!(summary.samples, 0);
    }
}

#[tokio::test]
async fn test_single_failure_breaks_strict_quorum() {
    let committee = TestCommittee::new(10);
    let effects = TestEffects::new(2);
    let mut failures = vec![FailureType::Success; 10];
    failures[7] = FailureType::ImmediateError;
    let registry = committee.registry_with_failures(1, &failures).unwrap();
    let aggregator = TestCommittee::aggregator(registry, explore_exploit(10, &effects), &effects);

    let err = aggregator.store(b"strict", TIMEOUT).await.unwrap_err();
    assert_matches!(err, AnytrustError::QuorumFailure { .. });
    assert!(err
        .to_string()
        .contains("failed to store message to at least 10 out of 10 backends (assuming 1 are honest)"));
    assert_eq!(
        effects.metrics.snapshot().gauge("anytrust/aggregator/store/error/gauge"),
        Some(1.0)
    );
}

#[tokio::test(start_paused = true)]
async fn test_tolerates_up_to_h_minus_one_failures() {
    init_test_tracing();
    for seed in 0..8 {
        let committee = TestCommittee::new(10);
        let effects = TestEffects::new(seed);
        let failures = failure_bag(6, 4, seed);
        let registry = committee.registry_with_failures(5, &failures).unwrap();
        let aggregator =
            TestCommittee::aggregator(registry, explore_exploit(10, &effects), &effects);

        let message = format!("message {seed}");
        let cert = aggregator
            .store(message.as_bytes(), TIMEOUT)
            .await
            .unwrap_or_else(|e| panic!("seed {seed} with {failures:?}: {e}"));
        assert_certifies(&aggregator, &cert, message.as_bytes());

        let failed_mask = failures
            .iter()
            .enumerate()
            .filter(|(_, f)| **f != FailureType::Success)
            .fold(0u64, |mask, (i, _)| mask | (1 << i));
        assert_eq!(cert.signers_mask & failed_mask, 0, "seed {seed}");
    }
}

#[tokio::test(start_paused = true)]
async fn test_h_failures_fail_the_store() {
    for seed in 0..4 {
        let committee = TestCommittee::new(10);
        let effects = TestEffects::new(seed);
        let failures = failure_bag(5, 5, seed);
        let registry = committee.registry_with_failures(5, &failures).unwrap();
        let aggregator =
            TestCommittee::aggregator(registry, explore_exploit(10, &effects), &effects);

        let err = aggregator.store(b"not enough", TIMEOUT).await.unwrap_err();
        assert_matches!(err, AnytrustError::QuorumFailure { .. });
    }
}

#[tokio::test]
async fn test_corrupted_certificates_are_discarded() {
    let committee = TestCommittee::new(4);
    let effects = TestEffects::new(3);
    let failures = [
        FailureType::DataCorruption,
        FailureType::Success,
        FailureType::Success,
        FailureType::Success,
    ];
    let registry = committee.registry_with_failures(2, &failures).unwrap();
    let aggregator = TestCommittee::aggregator(registry, explore_exploit(4, &effects), &effects);

    let cert = aggregator.store(b"corrupt one", TIMEOUT).await.unwrap();
    assert_certifies(&aggregator, &cert, b"corrupt one");
    assert_eq!(cert.signers_mask & 1, 0);
    assert_eq!(
        effects
            .metrics
            .snapshot()
            .counter("anytrust/aggregator/store/backend0/error/total"),
        1
    );
}

#[tokio::test]
async fn test_quorum_impossible_stops_early() {
    let committee = TestCommittee::new(6);
    let effects = TestEffects::new(4);
    let mut failures = vec![FailureType::Success; 6];
    failures[0] = FailureType::ImmediateError;
    failures[1] = FailureType::ImmediateError;
    // H = 2 allows one failure
    let registry = committee.registry_with_failures(2, &failures).unwrap();
    let aggregator =
        TestCommittee::aggregator(registry, Arc::new(SequentialStrategy::new(6)), &effects);

    assert!(aggregator.store(b"early exit", TIMEOUT).await.is_err());
    for storage in &committee.storages[2..] {
        assert!(storage.is_empty());
    }
}

#[tokio::test]
async fn test_returns_once_quorum_reached() {
    let committee = TestCommittee::new(5);
    let effects = TestEffects::new(5);
    // K = 3
    let registry = committee.registry(3).unwrap();
    let aggregator =
        TestCommittee::aggregator(registry, Arc::new(SequentialStrategy::new(5)), &effects);

    let cert = aggregator.store(b"first three", TIMEOUT).await.unwrap();
    assert_eq!(cert.signers_mask, 0b111);
    assert!(committee.storages[3].is_empty());
    assert!(committee.storages[4].is_empty());

    let stats = aggregator.stats_snapshot();
    assert_eq!(stats[0].samples, 1);
    assert_eq!(stats[4].samples, 0);
}

#[tokio::test]
async fn test_get_by_hash() {
    let committee = TestCommittee::new(3);
    let effects = TestEffects::new(6);
    let registry = committee.registry(3).unwrap();
    let aggregator = TestCommittee::aggregator(registry, explore_exploit(3, &effects), &effects);

    let cert = aggregator.store(b"readable", TIMEOUT).await.unwrap();
    assert_eq!(aggregator.get_by_hash(cert.data_hash).await.unwrap(), b"readable");

    let err = aggregator.get_by_hash(Hash32::default()).await.unwrap_err();
    assert_matches!(err, AnytrustError::NotFound { .. });
}

/// Serves a fixed payload for every hash
struct Liar {
    inner: Arc<dyn DasService>,
    policy: ExpirationPolicy,
}

#[async_trait]
impl DasWriter for Liar {
    async fn store(&self, message: &[u8], timeout: u64) -> Result<DataAvailabilityCertificate> {
        self.inner.store(message, timeout).await
    }
}

#[async_trait]
impl DasReader for Liar {
    async fn get_by_hash(&self, _hash: Hash32) -> Result<Vec<u8>> {
        Ok(b"forged".to_vec())
    }

    async fn expiration_policy(&self) -> Result<ExpirationPolicy> {
        Ok(self.policy)
    }
}

#[async_trait]
impl HealthCheck for Liar {
    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn test_get_by_hash_skips_mismatched_content() {
    let committee = TestCommittee::new(2);
    let effects = TestEffects::new(7);
    let liar: Arc<dyn DasService> = Arc::new(Liar {
        inner: committee.writers[0].clone(),
        policy: ExpirationPolicy::KeepForever,
    });
    let honest: Arc<dyn DasService> = committee.writers[1].clone();
    let registry = committee.registry_over(vec![liar, honest], 1).unwrap();
    let aggregator =
        TestCommittee::aggregator(registry, Arc::new(SequentialStrategy::new(2)), &effects);

    let cert = aggregator.store(b"genuine", TIMEOUT).await.unwrap();
    assert_eq!(aggregator.get_by_hash(cert.data_hash).await.unwrap(), b"genuine");
}

#[tokio::test]
async fn test_expiration_policy_agreement() {
    let committee = TestCommittee::new(3);
    let effects = TestEffects::new(8);

    let agreeing = TestCommittee::aggregator(
        committee.registry(1).unwrap(),
        Arc::new(SequentialStrategy::new(3)),
        &effects,
    );
    assert_eq!(
        agreeing.expiration_policy().await.unwrap(),
        ExpirationPolicy::KeepForever
    );

    let mut services: Vec<Arc<dyn DasService>> = committee
        .writers
        .iter()
        .map(|w| w.clone() as Arc<dyn DasService>)
        .collect();
    services[2] = Arc::new(Liar {
        inner: committee.writers[2].clone(),
        policy: ExpirationPolicy::DiscardAfterDataTimeout,
    });
    let mixed = TestCommittee::aggregator(
        committee.registry_over(services, 1).unwrap(),
        Arc::new(SequentialStrategy::new(3)),
        &effects,
    );
    assert_eq!(
        mixed.expiration_policy().await.unwrap(),
        ExpirationPolicy::MixedTimeout
    );
}

#[tokio::test]
async fn test_health_needs_k_healthy_members() {
    let committee = TestCommittee::new(10);
    let effects = TestEffects::new(9);
    let mut failures = vec![FailureType::Success; 10];
    for f in failures.iter_mut().take(3) {
        *f = FailureType::ImmediateError;
    }

    // K = 8, only 7 healthy
    let strict = TestCommittee::aggregator(
        committee.registry_with_failures(3, &failures).unwrap(),
        Arc::new(SequentialStrategy::new(10)),
        &effects,
    );
    assert_matches!(
        strict.health_check().await,
        Err(AnytrustError::QuorumFailure { .. })
    );

    // K = 7
    let lenient = TestCommittee::aggregator(
        committee.registry_with_failures(4, &failures).unwrap(),
        Arc::new(SequentialStrategy::new(10)),
        &effects,
    );
    assert!(lenient.health_check().await.is_ok());
}

#[tokio::test]
async fn test_display_lists_members() {
    let committee = TestCommittee::new(2);
    let effects = TestEffects::new(10);
    let aggregator = TestCommittee::aggregator(
        committee.registry(1).unwrap(),
        Arc::new(SequentialStrategy::new(2)),
        &effects,
    );
    assert_eq!(
        aggregator.to_string(),
        "anytrust.Aggregator{signersMask(aggregator):1,backend0,signersMask(aggregator):2,backend1}"
    );
}

#[tokio::test]
async fn test_aggregator_nests_as_a_member() {
    let inner = TestCommittee::new(3);
    let effects = TestEffects::new(11);
    let nested: Arc<dyn DasService> = Arc::new(TestCommittee::aggregator(
        inner.registry(1).unwrap(),
        Arc::new(SequentialStrategy::new(3)),
        &effects,
    ));
    let cert = nested.store(b"nested", TIMEOUT).await.unwrap();
    assert_eq!(cert.signer_count(), 3);
    assert_eq!(nested.get_by_hash(cert.data_hash).await.unwrap(), b"nested");
}
