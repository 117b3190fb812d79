use super::{ParallelStrategy, lying_result, objective_values};
use crate::space::Point;
use crate::trial::{Trial, TrialResult};

/// Lies with the arithmetic mean of the observed objectives.
#[derive(Clone, Copy, Debug, Default)]
pub struct MeanParallelStrategy {
    mean: Option<f64>,
}

impl MeanParallelStrategy {
    /// Creates a strategy that has observed nothing.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ParallelStrategy for MeanParallelStrategy {
    #[allow(clippy::cast_precision_loss)]
    fn observe(&mut self, _points: &[Point], results: &[Vec<TrialResult>]) {
        let (sum, count) =
            objective_values(results).fold((0.0, 0_usize), |(sum, n), v| (sum + v, n + 1));
        self.mean = (count > 0).then(|| sum / count as f64);
    }

    fn lie(&self, _trial: &Trial) -> Option<TrialResult> {
        self.mean.map(lying_result)
    }
}
