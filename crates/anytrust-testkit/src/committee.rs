//! In-memory committees

use crate::failures::{FailureInjectingBackend, FailureType};
use crate::keys::committee_keys;
use crate::random::ScriptedRandom;
use crate::time::ControllableTime;
use anytrust_committee::{
    Aggregator, AggregatorEffects, AggregatorStrategy, BackendRegistry, DasService,
    MemoryStorageService, ServiceDetails, SignAfterStoreWriter,
};
use anytrust_core::{InMemoryMetrics, Result, SigningKey};
use std::sync::Arc;
use std::time::Duration;

/// Deterministic effect handlers, kept concrete so tests can drive them
#[derive(Clone)]
pub struct TestEffects {
    /// Manually advanced clock
    pub time: Arc<ControllableTime>,
    /// Seeded randomness
    pub random: Arc<ScriptedRandom>,
    /// Recorded metrics
    pub metrics: Arc<InMemoryMetrics>,
}

impl TestEffects {
    /// Handlers seeded with `seed`
    pub fn new(seed: u64) -> Self {
        Self {
            time: Arc::new(ControllableTime::at_realistic_epoch()),
            random: Arc::new(ScriptedRandom::seeded(seed)),
            metrics: Arc::new(InMemoryMetrics::new()),
        }
    }

    /// The same handlers as trait objects
    pub fn aggregator_effects(&self) -> AggregatorEffects {
        AggregatorEffects {
            time: self.time.clone(),
            random: self.random.clone(),
            metrics: self.metrics.clone(),
        }
    }
}

impl Default for TestEffects {
    fn default() -> Self {
        Self::new(0)
    }
}

/// `n` sign-after-store members over memory storage; member `i` has mask `1 << i`
pub struct TestCommittee {
    /// Member keys by index
    pub keys: Vec<SigningKey>,
    /// Member storage by index
    pub storages: Vec<Arc<MemoryStorageService>>,
    /// Member writers by index
    pub writers: Vec<Arc<SignAfterStoreWriter>>,
}

impl TestCommittee {
    /// Committee of `n` members
    pub fn new(n: usize) -> Self {
        let keys = committee_keys(n);
        let storages: Vec<_> = (0..n).map(|_| Arc::new(MemoryStorageService::new())).collect();
        let writers = keys
            .iter()
            .zip(&storages)
            .map(|(key, storage)| Arc::new(SignAfterStoreWriter::new(storage.clone(), key.clone())))
            .collect();
        Self {
            keys,
            storages,
            writers,
        }
    }

    /// Number of members
    pub fn len(&self) -> usize {
        self.writers.len()
    }

    /// True for an empty committee
    pub fn is_empty(&self) -> bool {
        self.writers.is_empty()
    }

    /// Registry over the healthy members
    pub fn registry(&self, assumed_honest: usize) -> Result<BackendRegistry> {
        let services = self
            .writers
            .iter()
            .map(|w| w.clone() as Arc<dyn DasService>)
            .collect();
        self.registry_over(services, assumed_honest)
    }

    /// Registry where member `i` behaves as `failures[i]`
    pub fn registry_with_failures(
        &self,
        assumed_honest: usize,
        failures: &[FailureType],
    ) -> Result<BackendRegistry> {
        let services = self
            .writers
            .iter()
            .zip(failures)
            .map(|(writer, failure)| {
                Arc::new(FailureInjectingBackend::new(writer.clone(), *failure))
                    as Arc<dyn DasService>
            })
            .collect();
        self.registry_over(services, assumed_honest)
    }

    /// Registry over arbitrary services using this committee's keys
    pub fn registry_over(
        &self,
        services: Vec<Arc<dyn DasService>>,
        assumed_honest: usize,
    ) -> Result<BackendRegistry> {
        let details = services
            .into_iter()
            .zip(&self.keys)
            .enumerate()
            .map(|(i, (service, key))| {
                ServiceDetails::new(service, key.public_key(), 1u64 << i, format!("backend{i}"))
            })
            .collect::<Result<Vec<_>>>()?;
        BackendRegistry::new(details, assumed_honest)
    }

    /// Aggregator with a short per-request deadline
    pub fn aggregator(
        registry: BackendRegistry,
        strategy: Arc<dyn AggregatorStrategy>,
        effects: &TestEffects,
    ) -> Aggregator {
        Aggregator::new(
            registry,
            strategy,
            Duration::from_millis(500),
            20,
            effects.aggregator_effects(),
        )
    }
}
