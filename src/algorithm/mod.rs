//! The optimization algorithm seam.
//!
//! The producer treats algorithms as black boxes exposing `suggest` and
//! `observe`. The trait also requires an explicit [`clone_box`]
//! (Algorithm::clone_box) so the producer can take a disposable snapshot of
//! the real algorithm for every update cycle.
//!
//! Two simple implementations ship with the crate: [`RandomSearch`] and
//! [`GridSearch`].

mod grid;
mod random;

pub use grid::GridSearch;
pub use random::RandomSearch;

use crate::space::Point;
use crate::trial::TrialResult;

/// Trait for optimization algorithms driven by the producer.
///
/// # Implementing a custom algorithm
///
/// ```
/// use trial_worker::algorithm::Algorithm;
/// use trial_worker::space::{ParamValue, Point};
/// use trial_worker::trial::TrialResult;
///
/// #[derive(Clone, Default)]
/// struct Counter {
///     next: i64,
/// }
///
/// impl Algorithm for Counter {
///     fn suggest(&mut self, num: usize) -> Vec<Point> {
///         (0..num)
///             .map(|_| {
///                 self.next += 1;
///                 vec![ParamValue::Int(self.next)]
///             })
///             .collect()
///     }
///
///     fn observe(&mut self, _points: &[Point], _results: &[Vec<TrialResult>]) {}
///
///     fn clone_box(&self) -> Box<dyn Algorithm> {
///         Box::new(self.clone())
///     }
/// }
/// ```
pub trait Algorithm: Send {
    /// Suggests up to `num` new points. May return fewer, including none.
    fn suggest(&mut self, num: usize) -> Vec<Point>;

    /// Records evaluated points with their results. `points` and `results`
    /// have the same length.
    fn observe(&mut self, points: &[Point], results: &[Vec<TrialResult>]);

    /// Returns an independent deep copy of the algorithm state.
    fn clone_box(&self) -> Box<dyn Algorithm>;

    /// Returns `true` once the algorithm has nothing left to suggest.
    fn is_done(&self) -> bool {
        false
    }
}

impl Clone for Box<dyn Algorithm> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}
