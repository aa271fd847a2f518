//! Quorum aggregation across the committee
//!
//! [`Aggregator::store`] asks the strategy for an ordering of backend subsets
//! and stores to each subset concurrently. Responses are checked against the
//! payload hash, the requested timeout and the backend's own key; valid ones
//! are folded into a [`CertificateAccumulator`] until `K` members have
//! signed. Backends still running at that point are abandoned. Once more
//! than `N - K` have failed, quorum is impossible and the call fails early.

use crate::backend::{DasReader, DasWriter, HealthCheck};
use crate::registry::{BackendRegistry, ServiceDetails};
use crate::stats::{ReaderStats, StatsSnapshot};
use crate::strategy::AggregatorStrategy;
use anytrust_core::effects::{
    MetricsEffects, OsRandom, PhysicalTimeEffects, RandomEffects, SystemClock, TracingMetrics,
};
use anytrust_core::{
    hash, AggregateSignature, AnytrustError, DataAvailabilityCertificate, ExpirationPolicy, Hash32,
    PublicKey, Result, Signature, CURRENT_CERTIFICATE_VERSION,
};
use async_trait::async_trait;
use futures::future::join_all;
use futures::stream::{FuturesUnordered, StreamExt};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

const METRIC_BASE: &str = "anytrust/aggregator/store";

/// Effect handlers used by the aggregator
#[derive(Clone)]
pub struct AggregatorEffects {
    /// Clock for latency measurement
    pub time: Arc<dyn PhysicalTimeEffects>,
    /// Randomness for strategy shuffles
    pub random: Arc<dyn RandomEffects>,
    /// Sink for store counters and gauges
    pub metrics: Arc<dyn MetricsEffects>,
}

impl AggregatorEffects {
    /// OS clock, OS randomness, tracing-backed metrics
    pub fn production() -> Self {
        Self {
            time: Arc::new(SystemClock),
            random: Arc::new(OsRandom),
            metrics: Arc::new(TracingMetrics),
        }
    }
}

/// Signatures collected once quorum is reached
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QuorumSignatures {
    /// OR of the signers' masks
    pub signers_mask: u64,
    /// Signer keys in ascending mask order
    pub pub_keys: Vec<PublicKey>,
    /// Signatures in the same order
    pub signature: AggregateSignature,
}

/// Accumulates member signatures until `required` distinct members signed
pub struct CertificateAccumulator {
    required: usize,
    entries: Vec<(u64, PublicKey, Signature)>,
    used: HashSet<u64>,
    signers_mask: u64,
}

impl CertificateAccumulator {
    /// Empty accumulator that completes at `required` signers
    pub fn new(required: usize) -> Self {
        Self {
            required,
            entries: Vec::new(),
            used: HashSet::new(),
            signers_mask: 0,
        }
    }

    /// Members folded in so far
    pub fn count(&self) -> usize {
        self.entries.len()
    }

    /// Fold in one member's signature; returns the set when quorum is reached
    pub fn append(
        &mut self,
        signers_mask: u64,
        pub_key: PublicKey,
        signature: Signature,
    ) -> Result<Option<QuorumSignatures>> {
        // Each member counts once
        if !self.used.insert(signers_mask) {
            return Ok(None);
        }
        self.entries.push((signers_mask, pub_key, signature));
        self.signers_mask |= signers_mask;
        if self.entries.len() < self.required {
            return Ok(None);
        }

        let mut ordered = self.entries.clone();
        ordered.sort_by_key(|(mask, _, _)| *mask);
        let signature =
            AggregateSignature::from_ordered(ordered.iter().map(|(_, _, sig)| *sig).collect())?;
        Ok(Some(QuorumSignatures {
            signers_mask: self.signers_mask,
            pub_keys: ordered.iter().map(|(_, key, _)| *key).collect(),
            signature,
        }))
    }
}

struct Attempt<T> {
    index: usize,
    result: Result<T>,
    // None when the clock could not be read
    latency_ms: Option<u64>,
}

/// Stores to and reads from a committee with quorum semantics
pub struct Aggregator {
    registry: BackendRegistry,
    strategy: Arc<dyn AggregatorStrategy>,
    stats: Mutex<Vec<ReaderStats>>,
    request_timeout: Duration,
    effects: AggregatorEffects,
}

impl Aggregator {
    /// Aggregator over `registry`; each backend call is bounded by `request_timeout`
    pub fn new(
        registry: BackendRegistry,
        strategy: Arc<dyn AggregatorStrategy>,
        request_timeout: Duration,
        stats_window: usize,
        effects: AggregatorEffects,
    ) -> Self {
        let stats = (0..registry.len())
            .map(|_| ReaderStats::new(stats_window))
            .collect();
        Self {
            registry,
            strategy,
            stats: Mutex::new(stats),
            request_timeout,
            effects,
        }
    }

    /// Committee this aggregator fans out to
    pub fn registry(&self) -> &BackendRegistry {
        &self.registry
    }

    /// Copy of the current per-backend statistics
    pub fn stats_snapshot(&self) -> StatsSnapshot {
        self.stats.lock().iter().map(ReaderStats::summary).collect()
    }

    /// Store `message` on at least `K` backends and return the aggregate certificate
    pub async fn store(&self, message: &[u8], timeout: u64) -> Result<DataAvailabilityCertificate> {
        trace!(size = message.len(), timeout, "aggregator store");
        let expected_hash = hash(message);
        let required = self.registry.required_signers();
        let max_failures = self.registry.max_allowed_failures();

        let mut accumulator = CertificateAccumulator::new(required);
        let mut failures = 0usize;
        let mut quorum = None;

        'batches: for batch in self.strategy.new_instance().await {
            let mut pending: FuturesUnordered<_> = batch
                .into_iter()
                .map(|index| self.store_one(index, message, timeout, expected_hash))
                .collect();

            while let Some(attempt) = pending.next().await {
                let Some(details) = self.registry.get(attempt.index) else {
                    continue;
                };
                self.record(attempt.index, attempt.result.is_ok(), attempt.latency_ms);
                match attempt.result {
                    Ok(signature) => {
                        self.count_store(&details.label, true);
                        if let Some(done) =
                            accumulator.append(details.signers_mask, details.pub_key, signature)?
                        {
                            quorum = Some(done);
                            break 'batches;
                        }
                    }
                    Err(err) => {
                        self.count_store(&details.label, false);
                        failures += 1;
                        warn!(
                            backend = %details.label,
                            signers_mask = details.signers_mask,
                            error = %err,
                            "error from backend"
                        );
                        if failures > max_failures {
                            break 'batches;
                        }
                    }
                }
            }
        }

        self.strategy.update(self.stats_snapshot());
        let succeeded_everywhere = failures == 0 && quorum.is_some();
        self.effects.metrics.set_gauge(
            &format!("{METRIC_BASE}/error/gauge"),
            if succeeded_everywhere { 0.0 } else { 1.0 },
        );

        let Some(quorum) = quorum else {
            return Err(AnytrustError::quorum_failure(format!(
                "aggregator failed to store message to at least {required} out of {} backends (assuming {} are honest)",
                self.registry.len(),
                self.registry.assumed_honest()
            )));
        };
        if max_failures > 0 && failures + 1 > max_failures {
            error!(
                failures,
                "storing the batch succeeded on enough committee members to generate the certificate, but one more failure would have prevented it"
            );
        }

        let cert = DataAvailabilityCertificate {
            keyset_hash: self.registry.keyset_hash(),
            data_hash: expected_hash,
            timeout,
            signers_mask: quorum.signers_mask,
            signature: quorum.signature,
            version: CURRENT_CERTIFICATE_VERSION,
        };
        cert.signature
            .verify(&cert.signable_fields(), &quorum.pub_keys)
            .map_err(|e| {
                AnytrustError::quorum_failure(format!("failed aggregate signature check: {e}"))
            })?;

        info!(
            data_hash = %cert.data_hash,
            signers = cert.signer_count(),
            failures,
            "aggregated data availability certificate"
        );
        Ok(cert)
    }

    /// Fetch a payload from the first backend that returns matching content
    pub async fn get_by_hash(&self, data_hash: Hash32) -> Result<Vec<u8>> {
        for batch in self.strategy.new_instance().await {
            let mut pending: FuturesUnordered<_> = batch
                .into_iter()
                .map(|index| self.read_one(index, data_hash))
                .collect();

            while let Some(attempt) = pending.next().await {
                self.record(attempt.index, attempt.result.is_ok(), attempt.latency_ms);
                match attempt.result {
                    Ok(data) => {
                        self.strategy.update(self.stats_snapshot());
                        return Ok(data);
                    }
                    Err(err) => {
                        debug!(backend = attempt.index, error = %err, "backend could not serve hash");
                    }
                }
            }
        }
        self.strategy.update(self.stats_snapshot());
        Err(AnytrustError::not_found(format!(
            "no backend returned data for {data_hash}"
        )))
    }

    /// Succeeds when at least `K` backends are healthy
    pub async fn health_check(&self) -> Result<()> {
        let checks = self.registry.services().iter().map(|details| async move {
            match tokio::time::timeout(self.request_timeout, details.service.health_check()).await {
                Ok(result) => result,
                Err(_) => Err(AnytrustError::transport(format!(
                    "health check of {} timed out",
                    details.label
                ))),
            }
        });
        let healthy = join_all(checks)
            .await
            .into_iter()
            .filter(Result::is_ok)
            .count();
        let required = self.registry.required_signers();
        if healthy < required {
            return Err(AnytrustError::quorum_failure(format!(
                "only {healthy} of {} backends are healthy, {required} required",
                self.registry.len()
            )));
        }
        Ok(())
    }

    /// The shared policy, or `MixedTimeout` when backends disagree
    pub async fn expiration_policy(&self) -> Result<ExpirationPolicy> {
        let policies = join_all(
            self.registry
                .services()
                .iter()
                .map(|details| details.service.expiration_policy()),
        )
        .await
        .into_iter()
        .collect::<Result<Vec<_>>>()?;
        let first = policies
            .first()
            .copied()
            .ok_or_else(|| AnytrustError::configuration("no backends configured"))?;
        if policies.iter().all(|p| *p == first) {
            Ok(first)
        } else {
            Ok(ExpirationPolicy::MixedTimeout)
        }
    }

    async fn store_one(
        &self,
        index: usize,
        message: &[u8],
        timeout: u64,
        expected_hash: Hash32,
    ) -> Attempt<Signature> {
        let started = self.now_ms().await;
        let result = match self.registry.get(index) {
            Some(details) => {
                match tokio::time::timeout(self.request_timeout, details.service.store(message, timeout))
                    .await
                {
                    Ok(Ok(cert)) => validate_store_response(details, &cert, expected_hash, timeout),
                    Ok(Err(err)) => Err(err),
                    Err(_) => Err(AnytrustError::transport(format!(
                        "store to {} timed out after {:?}",
                        details.label, self.request_timeout
                    ))),
                }
            }
            None => Err(AnytrustError::internal(format!("no backend at index {index}"))),
        };
        let latency_ms = self.elapsed_since(started).await;
        Attempt {
            index,
            result,
            latency_ms,
        }
    }

    async fn read_one(&self, index: usize, data_hash: Hash32) -> Attempt<Vec<u8>> {
        let started = self.now_ms().await;
        let result = match self.registry.get(index) {
            Some(details) => {
                match tokio::time::timeout(self.request_timeout, details.service.get_by_hash(data_hash))
                    .await
                {
                    Ok(Ok(data)) if hash(&data) == data_hash => Ok(data),
                    Ok(Ok(_)) => Err(AnytrustError::verification(format!(
                        "{} returned data not matching {data_hash}",
                        details.label
                    ))),
                    Ok(Err(err)) => Err(err),
                    Err(_) => Err(AnytrustError::transport(format!(
                        "read from {} timed out",
                        details.label
                    ))),
                }
            }
            None => Err(AnytrustError::internal(format!("no backend at index {index}"))),
        };
        let latency_ms = self.elapsed_since(started).await;
        Attempt {
            index,
            result,
            latency_ms,
        }
    }

    async fn now_ms(&self) -> Option<u64> {
        match self.effects.time.physical_time().await {
            Ok(now) => Some(now.ts_ms),
            Err(err) => {
                warn!(error = %err, "clock unavailable, backend latency not recorded");
                None
            }
        }
    }

    async fn elapsed_since(&self, started: Option<u64>) -> Option<u64> {
        let started = started?;
        self.now_ms()
            .await
            .map(|now| now.saturating_sub(started))
    }

    /// Stats are left untouched when no latency was measured
    fn record(&self, index: usize, success: bool, latency_ms: Option<u64>) {
        let Some(latency_ms) = latency_ms else { return };
        if let Some(stats) = self.stats.lock().get_mut(index) {
            stats.record(success, latency_ms);
        }
    }

    fn count_store(&self, label: &str, success: bool) {
        let outcome = if success { "success" } else { "error" };
        let metrics = &self.effects.metrics;
        metrics.increment_counter(&format!("{METRIC_BASE}/{label}/{outcome}/total"), 1);
        metrics.increment_counter(&format!("{METRIC_BASE}/{outcome}/all/total"), 1);
    }
}

/// Check one backend's certificate before it counts toward quorum
fn validate_store_response(
    details: &ServiceDetails,
    cert: &DataAvailabilityCertificate,
    expected_hash: Hash32,
    timeout: u64,
) -> Result<Signature> {
    // The backend's own signers mask is ignored; ours is authoritative
    let signature = *cert.signature.as_single()?;
    details
        .pub_key
        .verify(&cert.signable_fields(), &signature)
        .map_err(|_| AnytrustError::verification("signature verification failed"))?;
    if cert.data_hash != expected_hash {
        return Err(AnytrustError::verification(format!(
            "hash verification failed: got {}, expected {expected_hash}",
            cert.data_hash
        )));
    }
    if cert.timeout != timeout {
        return Err(AnytrustError::verification(format!(
            "timeout was {}, expected {timeout}",
            cert.timeout
        )));
    }
    if cert.version != CURRENT_CERTIFICATE_VERSION {
        return Err(AnytrustError::verification(format!(
            "certificate version {} is not {CURRENT_CERTIFICATE_VERSION}",
            cert.version
        )));
    }
    Ok(signature)
}

impl fmt::Debug for Aggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Aggregator")
            .field("registry", &self.registry)
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Aggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("anytrust.Aggregator{")?;
        for (i, details) in self.registry.services().iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "signersMask(aggregator):{},{}", details.signers_mask, details.label)?;
        }
        f.write_str("}")
    }
}

#[async_trait]
impl DasWriter for Aggregator {
    async fn store(&self, message: &[u8], timeout: u64) -> Result<DataAvailabilityCertificate> {
        Aggregator::store(self, message, timeout).await
    }
}

#[async_trait]
impl DasReader for Aggregator {
    async fn get_by_hash(&self, hash: Hash32) -> Result<Vec<u8>> {
        Aggregator::get_by_hash(self, hash).await
    }

    async fn expiration_policy(&self) -> Result<ExpirationPolicy> {
        Aggregator::expiration_policy(self).await
    }
}

#[async_trait]
impl HealthCheck for Aggregator {
    async fn health_check(&self) -> Result<()> {
        Aggregator::health_check(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anytrust_core::SigningKey;

    fn member(seed: u8) -> (u64, SigningKey) {
        (1u64 << seed, SigningKey::from_bytes(&[seed + 1; 32]))
    }

    #[test]
    fn test_accumulator_reaches_quorum_in_mask_order() {
        let mut acc = CertificateAccumulator::new(2);
        let (mask_b, key_b) = member(3);
        let (mask_a, key_a) = member(1);
        let sig_b = key_b.sign(b"m");
        let sig_a = key_a.sign(b"m");

        assert!(acc.append(mask_b, key_b.public_key(), sig_b).unwrap().is_none());
        // Duplicate member does not count
        assert!(acc.append(mask_b, key_b.public_key(), sig_b).unwrap().is_none());
        assert_eq!(acc.count(), 1);

        let done = acc.append(mask_a, key_a.public_key(), sig_a).unwrap().unwrap();
        assert_eq!(done.signers_mask, mask_a | mask_b);
        assert_eq!(done.pub_keys, vec![key_a.public_key(), key_b.public_key()]);
        assert_eq!(done.signature.signatures(), &[sig_a, sig_b]);
        assert!(done.signature.verify(b"m", &done.pub_keys).is_ok());
    }
}
