//! Backend ordering strategies
//!
//! A strategy turns the committee into an ordered sequence of backend
//! subsets. The aggregator walks the subsets in order and only moves on when
//! the previous ones did not reach quorum.

use crate::stats::StatsSnapshot;
use anytrust_core::effects::random::shuffle;
use anytrust_core::effects::RandomEffects;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Subsets of backend indices, tried in order
pub type BackendBatches = Vec<Vec<usize>>;

/// Chooses which backends to try, and in what groups
#[async_trait]
pub trait AggregatorStrategy: Send + Sync {
    /// Ordering for one request
    async fn new_instance(&self) -> BackendBatches;

    /// Replace the statistics used for ranking
    fn update(&self, stats: StatsSnapshot);
}

/// Explore/exploit tuning
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct StrategyConfig {
    /// Requests using a random ordering per cycle
    pub explore_iterations: u32,
    /// Requests using the ranked ordering per cycle
    pub exploit_iterations: u32,
    /// Samples kept per backend
    pub stats_window: usize,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            explore_iterations: 20,
            exploit_iterations: 1000,
            stats_window: 20,
        }
    }
}

/// Split an ordering into batches of 1, 2, 4, ...
pub fn exponential_batches(order: Vec<usize>) -> BackendBatches {
    let mut batches = Vec::new();
    let mut rest = order.into_iter();
    let mut size = 1;
    loop {
        let batch: Vec<usize> = rest.by_ref().take(size).collect();
        if batch.is_empty() {
            return batches;
        }
        batches.push(batch);
        size *= 2;
    }
}

/// Alternates random exploration with latency-ranked exploitation
pub struct ExploreExploitStrategy {
    n_backends: usize,
    explore_iterations: u64,
    exploit_iterations: u64,
    iteration: AtomicU64,
    stats: Mutex<StatsSnapshot>,
    random: Arc<dyn RandomEffects>,
}

impl ExploreExploitStrategy {
    /// Strategy over `n_backends` with no statistics yet
    pub fn new(n_backends: usize, config: &StrategyConfig, random: Arc<dyn RandomEffects>) -> Self {
        Self {
            n_backends,
            explore_iterations: u64::from(config.explore_iterations),
            exploit_iterations: u64::from(config.exploit_iterations),
            iteration: AtomicU64::new(0),
            stats: Mutex::new(Vec::new()),
            random,
        }
    }

    fn is_explore(&self, iteration: u64) -> bool {
        let cycle = self.explore_iterations + self.exploit_iterations;
        cycle == 0 || iteration % cycle < self.explore_iterations
    }

    fn ranked(&self) -> Vec<usize> {
        let stats = self.stats.lock().clone();
        let score = |i: usize| stats.get(i).map(|s| s.score()).unwrap_or(0.0);
        let mut order: Vec<usize> = (0..self.n_backends).collect();
        // Stable: ties keep registry order
        order.sort_by(|a, b| score(*a).total_cmp(&score(*b)));
        order
    }
}

#[async_trait]
impl AggregatorStrategy for ExploreExploitStrategy {
    async fn new_instance(&self) -> BackendBatches {
        let iteration = self.iteration.fetch_add(1, Ordering::Relaxed);
        let order = if self.is_explore(iteration) {
            let mut order: Vec<usize> = (0..self.n_backends).collect();
            shuffle(self.random.as_ref(), &mut order).await;
            order
        } else {
            self.ranked()
        };
        exponential_batches(order)
    }

    fn update(&self, stats: StatsSnapshot) {
        *self.stats.lock() = stats;
    }
}

/// Every backend on its own, in registry order
#[derive(Clone, Copy, Debug)]
pub struct SequentialStrategy {
    n_backends: usize,
}

impl SequentialStrategy {
    /// Strategy over `n_backends`
    pub fn new(n_backends: usize) -> Self {
        Self { n_backends }
    }
}

#[async_trait]
impl AggregatorStrategy for SequentialStrategy {
    async fn new_instance(&self) -> BackendBatches {
        (0..self.n_backends).map(|i| vec![i]).collect()
    }

    fn update(&self, _stats: StatsSnapshot) {}
}
