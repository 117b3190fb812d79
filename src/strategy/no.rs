use super::ParallelStrategy;
use crate::space::Point;
use crate::trial::{Trial, TrialResult};

/// A strategy that never lies.
///
/// In-flight trials are invisible to the naive algorithm until their real
/// result arrives.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoParallelStrategy;

impl ParallelStrategy for NoParallelStrategy {
    fn observe(&mut self, _points: &[Point], _results: &[Vec<TrialResult>]) {}

    fn lie(&self, _trial: &Trial) -> Option<TrialResult> {
        None
    }
}
