//! Parallel strategies: provisional results for trials still in flight.
//!
//! While some trials are being evaluated, the producer asks a
//! [`ParallelStrategy`] to *lie* about their outcome so the naive algorithm
//! can account for them without waiting. Lies never reach storage and never
//! touch the real algorithm.
//!
//! The set of strategies is closed. [`Strategy`] dispatches to one of them
//! and is selected from configuration by its `of_type` tag:
//!
//! ```
//! use trial_worker::strategy::Strategy;
//!
//! let strategy: Strategy = serde_json::from_str(r#"{"of_type": "MeanParallelStrategy"}"#).unwrap();
//! assert!(matches!(strategy, Strategy::Mean(_)));
//! ```

mod max;
mod mean;
mod no;

pub use max::MaxParallelStrategy;
pub use mean::MeanParallelStrategy;
pub use no::NoParallelStrategy;
use serde::{Deserialize, Serialize};

use crate::space::Point;
use crate::trial::{ResultType, Trial, TrialResult};

/// Trait for strategies producing lying results.
pub trait ParallelStrategy {
    /// Replaces the strategy's statistics with those of a batch of
    /// completed trials. Only objective results are considered.
    ///
    /// Callers pass the full set of completed trials every time, so
    /// repeated calls with overlapping batches are harmless.
    fn observe(&mut self, points: &[Point], results: &[Vec<TrialResult>]);

    /// Returns a provisional result for `trial`, or `None` if the trial
    /// must not be shown to the algorithm yet. `trial` is never modified.
    fn lie(&self, trial: &Trial) -> Option<TrialResult>;
}

/// Configuration tag selecting a strategy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "of_type")]
pub enum StrategyConfig {
    /// See [`NoParallelStrategy`].
    #[serde(alias = "no")]
    NoParallelStrategy,
    /// See [`MaxParallelStrategy`].
    #[default]
    #[serde(alias = "max")]
    MaxParallelStrategy,
    /// See [`MeanParallelStrategy`].
    #[serde(alias = "mean")]
    MeanParallelStrategy,
}

/// One of the known parallel strategies.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(from = "StrategyConfig", into = "StrategyConfig")]
pub enum Strategy {
    /// Never lie.
    No(NoParallelStrategy),
    /// Lie with the largest observed objective.
    Max(MaxParallelStrategy),
    /// Lie with the mean observed objective.
    Mean(MeanParallelStrategy),
}

impl Default for Strategy {
    fn default() -> Self {
        StrategyConfig::default().into()
    }
}

impl From<StrategyConfig> for Strategy {
    fn from(config: StrategyConfig) -> Self {
        match config {
            StrategyConfig::NoParallelStrategy => Self::No(NoParallelStrategy),
            StrategyConfig::MaxParallelStrategy => Self::Max(MaxParallelStrategy::new()),
            StrategyConfig::MeanParallelStrategy => Self::Mean(MeanParallelStrategy::new()),
        }
    }
}

impl From<NoParallelStrategy> for Strategy {
    fn from(strategy: NoParallelStrategy) -> Self {
        Self::No(strategy)
    }
}

impl From<MaxParallelStrategy> for Strategy {
    fn from(strategy: MaxParallelStrategy) -> Self {
        Self::Max(strategy)
    }
}

impl From<MeanParallelStrategy> for Strategy {
    fn from(strategy: MeanParallelStrategy) -> Self {
        Self::Mean(strategy)
    }
}

impl From<Strategy> for StrategyConfig {
    fn from(strategy: Strategy) -> Self {
        match strategy {
            Strategy::No(_) => Self::NoParallelStrategy,
            Strategy::Max(_) => Self::MaxParallelStrategy,
            Strategy::Mean(_) => Self::MeanParallelStrategy,
        }
    }
}

impl ParallelStrategy for Strategy {
    fn observe(&mut self, points: &[Point], results: &[Vec<TrialResult>]) {
        match self {
            Self::No(s) => s.observe(points, results),
            Self::Max(s) => s.observe(points, results),
            Self::Mean(s) => s.observe(points, results),
        }
    }

    fn lie(&self, trial: &Trial) -> Option<TrialResult> {
        match self {
            Self::No(s) => s.lie(trial),
            Self::Max(s) => s.lie(trial),
            Self::Mean(s) => s.lie(trial),
        }
    }
}

/// Objective values of a batch, ignoring every other result type.
fn objective_values(results: &[Vec<TrialResult>]) -> impl Iterator<Item = f64> + '_ {
    results
        .iter()
        .flatten()
        .filter(|r| r.kind == ResultType::Objective)
        .map(|r| r.value)
}

fn lying_result(value: f64) -> TrialResult {
    TrialResult::new("lie", ResultType::Lie, value)
}
