//! Rolling per-backend performance statistics

use std::collections::VecDeque;

#[derive(Clone, Copy, Debug, PartialEq)]
struct Sample {
    success: bool,
    latency_ms: u64,
}

/// Last `window` outcomes of one backend
#[derive(Clone, Debug)]
pub struct ReaderStats {
    samples: VecDeque<Sample>,
    window: usize,
}

impl ReaderStats {
    /// Empty history keeping `window` samples
    pub fn new(window: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(window),
            window: window.max(1),
        }
    }

    /// Push one outcome, evicting the oldest when full
    pub fn record(&mut self, success: bool, latency_ms: u64) {
        if self.samples.len() == self.window {
            self.samples.pop_front();
        }
        self.samples.push_back(Sample {
            success,
            latency_ms,
        });
    }

    /// Aggregate view of the window
    pub fn summary(&self) -> StatsSummary {
        let total = self.samples.len();
        let successes: Vec<u64> = self
            .samples
            .iter()
            .filter(|s| s.success)
            .map(|s| s.latency_ms)
            .collect();
        StatsSummary {
            samples: total,
            success_ratio: if total == 0 {
                0.0
            } else {
                successes.len() as f64 / total as f64
            },
            mean_latency_ms: if successes.is_empty() {
                0.0
            } else {
                successes.iter().sum::<u64>() as f64 / successes.len() as f64
            },
        }
    }
}

/// Copied view of one backend's statistics
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct StatsSummary {
    /// Outcomes in the window
    pub samples: usize,
    /// Fraction of successful outcomes
    pub success_ratio: f64,
    /// Mean latency of successful calls
    pub mean_latency_ms: f64,
}

impl StatsSummary {
    /// Ranking score, lower is better
    ///
    /// Untried backends score 0 so they get sampled early; backends that
    /// never succeed in the window rank last.
    pub fn score(&self) -> f64 {
        if self.samples == 0 {
            0.0
        } else if self.success_ratio == 0.0 {
            f64::INFINITY
        } else {
            self.mean_latency_ms / self.success_ratio
        }
    }
}

/// Summaries indexed by backend position in the registry
pub type StatsSnapshot = Vec<StatsSummary>;
