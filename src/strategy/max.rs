use super::{ParallelStrategy, lying_result, objective_values};
use crate::space::Point;
use crate::trial::{Trial, TrialResult};

/// Lies with the worst (largest) objective observed so far.
///
/// Pessimistic: a region with pending trials looks unattractive until its
/// real outcome is known.
#[derive(Clone, Copy, Debug, Default)]
pub struct MaxParallelStrategy {
    max: Option<f64>,
}

impl MaxParallelStrategy {
    /// Creates a strategy that has observed nothing.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ParallelStrategy for MaxParallelStrategy {
    fn observe(&mut self, _points: &[Point], results: &[Vec<TrialResult>]) {
        self.max = objective_values(results).reduce(f64::max);
    }

    fn lie(&self, _trial: &Trial) -> Option<TrialResult> {
        self.max.map(lying_result)
    }
}
