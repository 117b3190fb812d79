//! Grid search.
//!
//! `GridSearch` walks the cartesian product of per-dimension grids in a
//! fixed order, skipping points it has already observed.

use std::collections::HashSet;

use super::Algorithm;
use crate::space::{FloatPrior, IntPrior, ParamValue, Point, Prior, Space};
use crate::trial::TrialResult;

/// Exhaustive search over a discretized space.
///
/// Real dimensions are discretized into `n_values` points (log-spaced for
/// log priors); integer dimensions use every value when the range is small
/// enough and `n_values` evenly spaced values otherwise; categorical
/// dimensions use every choice.
///
/// # Examples
///
/// ```
/// use trial_worker::algorithm::{Algorithm, GridSearch};
/// use trial_worker::space::Space;
///
/// let space = Space::new().integer("a", 0, 1).categorical("b", ["x", "y"]);
/// let mut grid = GridSearch::new(&space, 10);
/// assert_eq!(grid.n_points(), 4);
/// assert_eq!(grid.suggest(10).len(), 4);
/// ```
#[derive(Clone, Debug)]
pub struct GridSearch {
    grids: Vec<Vec<ParamValue>>,
    cursor: usize,
    observed: HashSet<String>,
}

impl GridSearch {
    /// Builds the grid for `space` with `n_values` points per continuous dimension.
    #[must_use]
    pub fn new(space: &Space, n_values: usize) -> Self {
        let grids = space
            .dimensions()
            .iter()
            .map(|dim| match &dim.prior {
                Prior::Real(p) => real_grid(p, n_values)
                    .into_iter()
                    .map(ParamValue::Float)
                    .collect(),
                Prior::Integer(p) => int_grid(p, n_values)
                    .into_iter()
                    .map(ParamValue::Int)
                    .collect(),
                Prior::Categorical(p) => p
                    .choices
                    .iter()
                    .cloned()
                    .map(ParamValue::Categorical)
                    .collect(),
            })
            .collect();
        Self {
            grids,
            cursor: 0,
            observed: HashSet::new(),
        }
    }

    /// Total number of points in the grid.
    #[must_use]
    pub fn n_points(&self) -> usize {
        if self.grids.is_empty() {
            return 0;
        }
        self.grids.iter().map(Vec::len).product()
    }

    /// Decodes the `index`-th point of the cartesian product.
    fn point_at(&self, mut index: usize) -> Point {
        let mut point = Vec::with_capacity(self.grids.len());
        for grid in self.grids.iter().rev() {
            point.push(grid[index % grid.len()].clone());
            index /= grid.len();
        }
        point.reverse();
        point
    }
}

impl Algorithm for GridSearch {
    fn suggest(&mut self, num: usize) -> Vec<Point> {
        let total = self.n_points();
        let mut points = Vec::with_capacity(num.min(total));
        while points.len() < num && self.cursor < total {
            let point = self.point_at(self.cursor);
            self.cursor += 1;
            if !self.observed.contains(&point_key(&point)) {
                points.push(point);
            }
        }
        points
    }

    fn observe(&mut self, points: &[Point], _results: &[Vec<TrialResult>]) {
        self.observed.extend(points.iter().map(|p| point_key(p)));
    }

    fn clone_box(&self) -> Box<dyn Algorithm> {
        Box::new(self.clone())
    }

    fn is_done(&self) -> bool {
        self.observed.len() >= self.n_points()
    }
}

fn point_key(point: &[ParamValue]) -> String {
    format!("{point:?}")
}

/// Evenly spaced grid for a real prior, in log space when requested.
#[allow(clippy::cast_precision_loss)]
fn real_grid(prior: &FloatPrior, n_values: usize) -> Vec<f64> {
    let (low, high) = (prior.low, prior.high);
    if n_values == 0 || low > high {
        return Vec::new();
    }
    if n_values == 1 || (high - low).abs() < f64::EPSILON {
        return vec![low];
    }
    let log = prior.log_scale && low > 0.0;
    let (start, end) = if log { (low.ln(), high.ln()) } else { (low, high) };
    (0..n_values)
        .map(|i| {
            let fraction = i as f64 / (n_values - 1) as f64;
            let value = start + fraction * (end - start);
            let value = if log { value.exp() } else { value };
            value.clamp(low, high)
        })
        .collect()
}

/// Every integer in range, or `n_values` evenly spaced and deduplicated.
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn int_grid(prior: &IntPrior, n_values: usize) -> Vec<i64> {
    let (low, high) = (prior.low, prior.high);
    if low > high || n_values == 0 {
        return Vec::new();
    }
    let span = high.abs_diff(low);
    if span < n_values as u64 {
        return (low..=high).collect();
    }
    if n_values == 1 {
        return vec![low];
    }
    let mut points: Vec<i64> = (0..n_values)
        .map(|i| {
            let fraction = i as f64 / (n_values - 1) as f64;
            (low as f64 + fraction * span as f64).round() as i64
        })
        .map(|p| p.clamp(low, high))
        .collect();
    points.dedup();
    points
}
