//! Random search.

use core::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use super::Algorithm;
use crate::space::{Point, Space};
use crate::trial::TrialResult;

/// Samples points uniformly from the space, ignoring results.
///
/// Every snapshot taken with [`clone_box`](Algorithm::clone_box) is seeded
/// from a copy of the parent's generator mixed with a snapshot counter:
/// consecutive snapshots explore different points, the parent's own
/// sequence is left untouched, and the whole run stays reproducible for a
/// fixed seed.
///
/// A space that fails [`Space::validate`] yields no points.
///
/// # Examples
///
/// ```
/// use trial_worker::algorithm::{Algorithm, RandomSearch};
/// use trial_worker::space::Space;
///
/// let space = Space::new().real("x", -1.0, 1.0);
/// let mut algo = RandomSearch::with_seed(space.clone(), 42);
/// let points = algo.suggest(3);
/// assert_eq!(points.len(), 3);
/// assert!(points.iter().all(|p| space.contains(p)));
/// ```
pub struct RandomSearch {
    space: Space,
    rng: Mutex<fastrand::Rng>,
    snapshots: AtomicU64,
    n_observed: usize,
}

impl RandomSearch {
    /// Creates a random search with a random seed.
    #[must_use]
    pub fn new(space: Space) -> Self {
        Self::from_rng(space, fastrand::Rng::new())
    }

    /// Creates a random search with a fixed seed for reproducibility.
    #[must_use]
    pub fn with_seed(space: Space, seed: u64) -> Self {
        Self::from_rng(space, fastrand::Rng::with_seed(seed))
    }

    fn from_rng(space: Space, rng: fastrand::Rng) -> Self {
        Self {
            space,
            rng: Mutex::new(rng),
            snapshots: AtomicU64::new(0),
            n_observed: 0,
        }
    }

    /// Number of points observed so far.
    #[must_use]
    pub fn n_observed(&self) -> usize {
        self.n_observed
    }
}

impl Algorithm for RandomSearch {
    fn suggest(&mut self, num: usize) -> Vec<Point> {
        let rng = self.rng.get_mut();
        (0..num)
            .map_while(|_| self.space.sample(rng).ok())
            .collect()
    }

    fn observe(&mut self, points: &[Point], _results: &[Vec<TrialResult>]) {
        self.n_observed += points.len();
    }

    fn clone_box(&self) -> Box<dyn Algorithm> {
        let mut rng = self.rng.lock().clone();
        let n = self.snapshots.fetch_add(1, Ordering::Relaxed);
        let seed = rng.u64(..) ^ n.wrapping_add(1).wrapping_mul(0x9E37_79B9_7F4A_7C15);
        Box::new(Self {
            space: self.space.clone(),
            rng: Mutex::new(fastrand::Rng::with_seed(seed)),
            snapshots: AtomicU64::new(0),
            n_observed: self.n_observed,
        })
    }
}
