use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use trial_worker::Experiment;
use trial_worker::algorithm::Algorithm;
use trial_worker::space::{ParamValue, Point, Space};
use trial_worker::storage::{MemoryStorage, Storage};
use trial_worker::trial::{ResultType, Trial, TrialResult, TrialStatus};

pub(crate) fn space() -> Space {
    Space::new().integer("x", 0, 100)
}

pub(crate) fn experiment() -> Arc<Experiment> {
    Arc::new(Experiment::new("exp", space(), "train.sh"))
}

pub(crate) fn point(x: i64) -> Point {
    vec![ParamValue::Int(x)]
}

/// Registers a trial for `x` and returns it.
pub(crate) fn register(storage: &MemoryStorage, x: i64) -> Trial {
    let trial = Trial::from_point("exp", &space(), &point(x)).unwrap();
    storage.register_trial(&trial).unwrap();
    trial
}

/// Registers a trial for `x` and completes it with `objective`.
pub(crate) fn complete(storage: &MemoryStorage, x: i64, objective: f64) -> Trial {
    let trial = register(storage, x);
    storage
        .push_results(&trial.id, &[TrialResult::objective("loss", objective)])
        .unwrap();
    storage
        .set_trial_status(&trial.id, TrialStatus::Completed, None)
        .unwrap()
}

/// Algorithm replaying a shared queue of suggestions and counting how many
/// snapshots were taken from it.
#[derive(Clone)]
pub(crate) struct Scripted {
    pub(crate) queue: Arc<Mutex<VecDeque<Point>>>,
    pub(crate) clones: Arc<AtomicUsize>,
}

impl Scripted {
    pub(crate) fn new(points: impl IntoIterator<Item = Point>) -> Self {
        Self {
            queue: Arc::new(Mutex::new(points.into_iter().collect())),
            clones: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub(crate) fn n_clones(&self) -> usize {
        self.clones.load(Ordering::SeqCst)
    }
}

impl Algorithm for Scripted {
    fn suggest(&mut self, num: usize) -> Vec<Point> {
        let mut queue = self.queue.lock();
        (0..num).map_while(|_| queue.pop_front()).collect()
    }

    fn observe(&mut self, _points: &[Point], _results: &[Vec<TrialResult>]) {}

    fn clone_box(&self) -> Box<dyn Algorithm> {
        self.clones.fetch_add(1, Ordering::SeqCst);
        Box::new(self.clone())
    }
}

/// Always suggests the same point, however many are requested.
#[derive(Clone)]
pub(crate) struct Stuck(pub(crate) Point);

impl Algorithm for Stuck {
    fn suggest(&mut self, num: usize) -> Vec<Point> {
        vec![self.0.clone(); num.min(1)]
    }

    fn observe(&mut self, _points: &[Point], _results: &[Vec<TrialResult>]) {}

    fn clone_box(&self) -> Box<dyn Algorithm> {
        Box::new(self.clone())
    }
}

/// One `observe` call as seen by [`Recorder`].
#[derive(Clone, Debug)]
pub(crate) struct Observation {
    pub(crate) snapshot: bool,
    pub(crate) point: Point,
    pub(crate) results: Vec<TrialResult>,
}

impl Observation {
    pub(crate) fn lie(&self) -> Option<f64> {
        self.results
            .iter()
            .find(|r| r.kind == ResultType::Lie)
            .map(|r| r.value)
    }
}

/// Logs every observation, tagging those made on snapshots.
#[derive(Clone, Default)]
pub(crate) struct Recorder {
    snapshot: bool,
    pub(crate) log: Arc<Mutex<Vec<Observation>>>,
}

impl Recorder {
    pub(crate) fn observations(&self) -> Vec<Observation> {
        self.log.lock().clone()
    }
}

impl Algorithm for Recorder {
    fn suggest(&mut self, _num: usize) -> Vec<Point> {
        Vec::new()
    }

    fn observe(&mut self, points: &[Point], results: &[Vec<TrialResult>]) {
        let mut log = self.log.lock();
        for (point, results) in points.iter().zip(results) {
            log.push(Observation {
                snapshot: self.snapshot,
                point: point.clone(),
                results: results.clone(),
            });
        }
    }

    fn clone_box(&self) -> Box<dyn Algorithm> {
        Box::new(Self {
            snapshot: true,
            log: Arc::clone(&self.log),
        })
    }
}

/// Hands the producer an algorithm while the test keeps a handle on it.
/// Snapshots deep-copy the inner algorithm and share nothing with it.
pub(crate) struct Shared(pub(crate) Arc<Mutex<Box<dyn Algorithm>>>);

impl Shared {
    pub(crate) fn new(inner: impl Algorithm + 'static) -> Self {
        Self(Arc::new(Mutex::new(Box::new(inner))))
    }
}

impl Algorithm for Shared {
    fn suggest(&mut self, num: usize) -> Vec<Point> {
        self.0.lock().suggest(num)
    }

    fn observe(&mut self, points: &[Point], results: &[Vec<TrialResult>]) {
        self.0.lock().observe(points, results);
    }

    fn clone_box(&self) -> Box<dyn Algorithm> {
        let copy = self.0.lock().clone_box();
        Box::new(Self(Arc::new(Mutex::new(copy))))
    }

    fn is_done(&self) -> bool {
        self.0.lock().is_done()
    }
}
