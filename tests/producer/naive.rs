use std::sync::Arc;

use trial_worker::Producer;
use trial_worker::algorithm::{Algorithm, GridSearch, RandomSearch};
use trial_worker::storage::{MemoryStorage, Storage};
use trial_worker::strategy::{MaxParallelStrategy, MeanParallelStrategy, NoParallelStrategy, Strategy};
use trial_worker::trial::{ResultType, Trial, TrialStatus};

use crate::common::{Recorder, Shared, complete, experiment, point, register, space};

/// Ten completed trials with objectives 0..9 and one pending trial.
fn populated() -> (Arc<MemoryStorage>, Trial) {
    let storage = Arc::new(MemoryStorage::new());
    for i in 0..10 {
        complete(&storage, i, f64::from(i32::try_from(i).unwrap()));
    }
    let pending = register(&storage, 50);
    (storage, pending)
}

fn updated(storage: &Arc<MemoryStorage>, strategy: impl Into<Strategy>) -> (Producer, Recorder) {
    let recorder = Recorder::default();
    let mut producer = Producer::builder(experiment(), storage.clone(), recorder.clone())
        .strategy(strategy)
        .build()
        .unwrap();
    producer.update().unwrap();
    (producer, recorder)
}

#[test]
fn max_strategy_lies_with_largest_objective() {
    let (storage, _) = populated();
    let (_, recorder) = updated(&storage, MaxParallelStrategy::new());

    let lies: Vec<_> = recorder
        .observations()
        .into_iter()
        .filter(|o| o.snapshot)
        .collect();
    assert_eq!(lies.len(), 1);
    assert_eq!(lies[0].point, point(50));
    assert_eq!(lies[0].lie(), Some(9.0));
}

#[test]
fn mean_strategy_lies_with_average_objective() {
    let (storage, _) = populated();
    let (_, recorder) = updated(&storage, MeanParallelStrategy::new());

    let lie = recorder
        .observations()
        .into_iter()
        .find(|o| o.snapshot)
        .and_then(|o| o.lie());
    assert_eq!(lie, Some(4.5));
}

#[test]
fn no_strategy_shows_nothing_pending() {
    let (storage, _) = populated();
    let (producer, recorder) = updated(&storage, NoParallelStrategy);

    assert!(recorder.observations().iter().all(|o| !o.snapshot));
    assert_eq!(
        producer.naive_trials_history().unwrap().children(),
        producer.trials_history().children()
    );
}

#[test]
fn real_algorithm_never_sees_lies() {
    let (storage, _) = populated();
    let (_, recorder) = updated(&storage, MaxParallelStrategy::new());

    let real: Vec<_> = recorder
        .observations()
        .into_iter()
        .filter(|o| !o.snapshot)
        .collect();
    assert_eq!(real.len(), 10);
    assert!(real.iter().all(|o| o.lie().is_none()));
    assert!(
        real.iter()
            .all(|o| o.results.iter().any(|r| r.kind == ResultType::Objective))
    );
}

#[test]
fn lying_trials_are_not_persisted() {
    let (storage, pending) = populated();
    let _ = updated(&storage, MaxParallelStrategy::new());

    let stored = storage.get_trial(&pending.id).unwrap();
    assert_eq!(stored.status, TrialStatus::New);
    assert!(stored.results.is_empty());
    assert!(stored.parents.is_empty());
}

#[test]
fn naive_history_advances_past_pending_trials() {
    let (storage, pending) = populated();
    let (producer, _) = updated(&storage, MaxParallelStrategy::new());

    let real = producer.trials_history();
    assert_eq!(real.len(), 10);
    assert!(!real.contains(&pending.id));

    let naive = producer.naive_trials_history().unwrap();
    assert!(naive.contains(&pending.id));
    assert_eq!(naive.children(), [pending.id.clone()]);
}

#[test]
fn completed_trials_are_observed_once() {
    let (storage, _) = populated();
    let (mut producer, recorder) = updated(&storage, MaxParallelStrategy::new());
    let real_count = |r: &Recorder| r.observations().iter().filter(|o| !o.snapshot).count();

    producer.update().unwrap();
    assert_eq!(real_count(&recorder), 10);

    complete(&storage, 60, 0.5);
    producer.update().unwrap();
    assert_eq!(real_count(&recorder), 11);
}

#[test]
fn produced_trials_carry_naive_frontier() {
    let (storage, pending) = populated();
    let mut producer = Producer::builder(
        experiment(),
        storage.clone(),
        crate::common::Scripted::new([point(70)]),
    )
    .build()
    .unwrap();

    producer.update().unwrap();
    assert_eq!(producer.produce().unwrap(), 1);

    let produced = storage
        .fetch_trials("exp")
        .into_iter()
        .find(|t| t.param("x") == point(70).first())
        .unwrap();
    assert_eq!(produced.parents, [pending.id]);
}

#[test]
fn random_search_sequence_survives_update_and_produce() {
    let storage = Arc::new(MemoryStorage::new());
    complete(&storage, 1, 0.5);
    register(&storage, 2);
    let shared = Shared::new(RandomSearch::with_seed(space(), 1));
    let real = Arc::clone(&shared.0);
    let mut producer = Producer::builder(experiment(), storage.clone(), shared)
        .strategy(MaxParallelStrategy::new())
        .pool_size(2)
        .build()
        .unwrap();

    producer.update().unwrap();
    assert_eq!(producer.produce().unwrap(), 2);
    producer.update().unwrap();

    let mut twin = RandomSearch::with_seed(space(), 1);
    assert_eq!(real.lock().suggest(4), twin.suggest(4));
}

#[test]
fn grid_cursor_survives_update_and_produce() {
    let storage = Arc::new(MemoryStorage::new());
    complete(&storage, 1, 0.5);
    let shared = Shared::new(GridSearch::new(&space(), 5));
    let real = Arc::clone(&shared.0);
    let mut producer = Producer::builder(experiment(), storage.clone(), shared)
        .pool_size(2)
        .build()
        .unwrap();

    producer.update().unwrap();
    assert_eq!(producer.produce().unwrap(), 2);
    assert_eq!(storage.fetch_trials("exp").len(), 3);

    assert_eq!(real.lock().suggest(2), vec![point(0), point(25)]);
}
