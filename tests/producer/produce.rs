use std::sync::Arc;

use trial_worker::algorithm::{Algorithm, GridSearch, RandomSearch};
use trial_worker::space::{ParamValue, Point, Space};
use trial_worker::storage::{MemoryStorage, Storage};
use trial_worker::strategy::{MaxParallelStrategy, NoParallelStrategy};
use trial_worker::trial::{TrialResult, TrialStatus};
use trial_worker::{Error, Experiment, Producer};

use crate::common::{Scripted, Stuck, complete, experiment, point, register};

#[test]
fn registers_exactly_pool_size_trials() {
    let storage = Arc::new(MemoryStorage::new());
    let space = Space::new().real("x", -5.0, 5.0).integer("y", 0, 1000);
    let experiment = Arc::new(Experiment::new("exp", space.clone(), "train.sh"));
    let mut producer = Producer::builder(experiment, storage.clone(), RandomSearch::with_seed(space, 7))
        .pool_size(5)
        .build()
        .unwrap();

    producer.update().unwrap();
    assert_eq!(producer.produce().unwrap(), 5);

    let trials = storage.fetch_trials("exp");
    assert_eq!(trials.len(), 5);
    assert!(trials.iter().all(|t| t.status == TrialStatus::New));
}

#[test]
fn produce_without_update_builds_naive_view() {
    let storage = Arc::new(MemoryStorage::new());
    let mut producer = Producer::builder(experiment(), storage.clone(), Scripted::new([point(1)]))
        .build()
        .unwrap();

    assert!(producer.naive_trials_history().is_none());
    assert_eq!(producer.produce().unwrap(), 1);
    assert!(producer.naive_trials_history().is_some());
}

#[test]
fn duplicate_triggers_exactly_one_update() {
    let storage = Arc::new(MemoryStorage::new());
    register(&storage, 1);
    let algorithm = Scripted::new([point(1), point(2)]);
    let mut producer = Producer::builder(experiment(), storage.clone(), algorithm.clone())
        .build()
        .unwrap();

    producer.update().unwrap();
    assert_eq!(algorithm.n_clones(), 1);

    assert_eq!(producer.produce().unwrap(), 1);
    assert_eq!(algorithm.n_clones(), 2, "one extra snapshot for the duplicate");
    assert_eq!(storage.fetch_trials("exp").len(), 2);
}

#[test]
fn duplicate_does_not_overwrite_stored_trial() {
    let storage = Arc::new(MemoryStorage::new());
    let done = complete(&storage, 1, 3.0);
    let mut producer = Producer::builder(experiment(), storage.clone(), Scripted::new([point(1), point(2)]))
        .build()
        .unwrap();

    producer.produce().unwrap();

    let stored = storage.get_trial(&done.id).unwrap();
    assert_eq!(stored.status, TrialStatus::Completed);
    assert_eq!(stored.objective().unwrap().value, 3.0);
}

#[test]
fn exhausts_after_max_attempts() {
    let storage = Arc::new(MemoryStorage::new());
    register(&storage, 4);
    let mut producer = Producer::builder(experiment(), storage.clone(), Stuck(point(4)))
        .max_attempts(3)
        .build()
        .unwrap();

    let err = producer.produce().unwrap_err();
    match err {
        Error::ExhaustedAttempts {
            attempts,
            registered,
            pool_size,
            ..
        } => {
            assert_eq!(attempts, 3);
            assert_eq!(registered, 0);
            assert_eq!(pool_size, 1);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.to_string().contains("max_attempts"));
    assert_eq!(storage.fetch_trials("exp").len(), 1);
}

#[test]
fn partial_pool_is_reported_on_exhaustion() {
    let storage = Arc::new(MemoryStorage::new());
    let mut producer = Producer::builder(experiment(), storage.clone(), Scripted::new([point(1)]))
        .pool_size(3)
        .max_attempts(2)
        .build()
        .unwrap();

    assert!(matches!(
        producer.produce(),
        Err(Error::ExhaustedAttempts { registered: 1, pool_size: 3, .. })
    ));
}

#[test]
fn too_many_suggestions_violate_contract() {
    #[derive(Clone)]
    struct Greedy;

    impl Algorithm for Greedy {
        fn suggest(&mut self, num: usize) -> Vec<Point> {
            (0..=num).map(|i| point(i64::try_from(i).unwrap())).collect()
        }

        fn observe(&mut self, _points: &[Point], _results: &[Vec<TrialResult>]) {}

        fn clone_box(&self) -> Box<dyn Algorithm> {
            Box::new(self.clone())
        }
    }

    let storage = Arc::new(MemoryStorage::new());
    let mut producer = Producer::builder(experiment(), storage.clone(), Greedy)
        .pool_size(2)
        .build()
        .unwrap();

    assert!(matches!(producer.produce(), Err(Error::AlgorithmInvariant(_))));
    assert!(storage.is_empty());
}

#[test]
fn out_of_space_suggestion_is_rejected() {
    let storage = Arc::new(MemoryStorage::new());
    let mut producer = Producer::builder(experiment(), storage.clone(), Stuck(point(1000)))
        .build()
        .unwrap();

    assert!(matches!(producer.produce(), Err(Error::AlgorithmInvariant(_))));
}

#[test]
fn zero_pool_size_is_rejected() {
    let storage = Arc::new(MemoryStorage::new());
    let result = Producer::builder(experiment(), storage, Stuck(point(1)))
        .pool_size(0)
        .build();
    assert!(matches!(result, Err(Error::InvalidConfig(_))));
}

#[test]
fn unusable_space_is_rejected_before_sampling() {
    let cases = [
        (Space::new().categorical("c", Vec::<String>::new()), "empty choices"),
        (Space::new().real("x", 5.0, 1.0), "inverted real bounds"),
        (Space::new().integer("n", 9, 2), "inverted integer bounds"),
        (Space::new().log_real("lr", -1.0, 1.0), "non-positive log bound"),
    ];
    for (space, case) in cases {
        let experiment = Arc::new(Experiment::new("bad", space.clone(), "train.sh"));
        let storage = Arc::new(MemoryStorage::new());
        let result = Producer::builder(experiment, storage, RandomSearch::with_seed(space, 0)).build();
        assert!(
            matches!(
                result,
                Err(Error::InvalidBounds { .. } | Error::InvalidLogBounds | Error::EmptyChoices)
            ),
            "{case} was accepted"
        );
    }
}

#[test]
fn lies_steer_grid_away_from_pending_points() {
    let storage = Arc::new(MemoryStorage::new());
    let space = Space::new().integer("x", 0, 3);
    let experiment = Arc::new(Experiment::new("exp", space.clone(), "train.sh"));

    complete(&storage, 0, 1.0);
    register(&storage, 1);

    let mut producer = Producer::builder(experiment, storage.clone(), GridSearch::new(&space, 4))
        .strategy(MaxParallelStrategy::new())
        .max_attempts(1)
        .build()
        .unwrap();

    producer.update().unwrap();
    assert_eq!(producer.produce().unwrap(), 1);

    let xs: Vec<_> = storage
        .fetch_trials("exp")
        .iter()
        .filter_map(|t| t.param("x").cloned())
        .collect();
    assert_eq!(
        xs,
        vec![ParamValue::Int(0), ParamValue::Int(1), ParamValue::Int(2)]
    );
}

#[test]
fn without_lies_pending_points_collide() {
    let storage = Arc::new(MemoryStorage::new());
    let space = Space::new().integer("x", 0, 3);
    let experiment = Arc::new(Experiment::new("exp", space.clone(), "train.sh"));

    complete(&storage, 0, 1.0);
    register(&storage, 1);

    let mut producer = Producer::builder(experiment, storage.clone(), GridSearch::new(&space, 4))
        .strategy(NoParallelStrategy)
        .max_attempts(1)
        .build()
        .unwrap();

    producer.update().unwrap();
    assert!(matches!(
        producer.produce(),
        Err(Error::ExhaustedAttempts { .. })
    ));
}

#[test]
fn finished_grid_registers_nothing() {
    let storage = Arc::new(MemoryStorage::new());
    let space = Space::new().integer("x", 0, 1);
    let experiment = Arc::new(Experiment::new("exp", space.clone(), "train.sh"));
    complete(&storage, 0, 1.0);
    complete(&storage, 1, 2.0);

    let mut producer = Producer::builder(experiment, storage.clone(), GridSearch::new(&space, 2))
        .build()
        .unwrap();

    producer.update().unwrap();
    assert!(producer.is_done());
    assert_eq!(producer.produce().unwrap(), 0);
    assert_eq!(storage.fetch_trials("exp").len(), 2);
}
