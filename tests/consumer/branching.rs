use tokio_util::sync::CancellationToken;
use trial_worker::Error;
use trial_worker::storage::Storage;
use trial_worker::trial::TrialStatus;
use trial_worker::vcs::VcsMetadata;

use crate::common::{FakeVcs, Fixture, WRITE_RESULTS, metadata};

fn drifted() -> VcsMetadata {
    VcsMetadata {
        is_dirty: true,
        head_sha: "9d47b1e".into(),
        ..metadata()
    }
}

#[tokio::test]
async fn code_change_aborts_before_execution() {
    let fixture = Fixture::with_experiment("touch ran", |e| e.vcs(metadata()));
    let mut consumer = fixture
        .consumer()
        .version_control(FakeVcs::new(Some(drifted())))
        .build();
    let mut trial = fixture.trial();

    let err = consumer
        .consume(&mut trial, &CancellationToken::new())
        .await
        .unwrap_err();

    let message = err.to_string();
    assert!(matches!(err, Error::BranchingEvent { ref changes } if changes.len() == 2));
    assert!(message.contains("code changed between execution of 2 trials"));
    assert!(message.contains("head_sha: '2f1c6a0' -> '9d47b1e'"));

    assert_eq!(trial.status, TrialStatus::New);
    assert_eq!(fixture.stored(&trial).status, TrialStatus::New);
    let dir = fixture.root().join(format!("exp_{}", trial.id));
    assert!(!dir.join("ran").exists());
}

#[tokio::test]
async fn code_change_keeps_callers_reservation() {
    let fixture = Fixture::with_experiment("touch ran", |e| e.vcs(metadata()));
    let mut consumer = fixture
        .consumer()
        .version_control(FakeVcs::new(Some(drifted())))
        .build();
    let trial = fixture.trial();
    let mut trial = fixture.storage.reserve(&trial.id, consumer.owner()).unwrap();

    let result = consumer.consume(&mut trial, &CancellationToken::new()).await;

    assert!(matches!(result, Err(Error::BranchingEvent { .. })));
    assert_eq!(fixture.stored(&trial).status, TrialStatus::Reserved);
}

#[tokio::test]
async fn leaving_version_control_is_a_change() {
    let fixture = Fixture::with_experiment("touch ran", |e| e.vcs(metadata()));
    let mut consumer = fixture.consumer().version_control(FakeVcs::new(None)).build();
    let mut trial = fixture.trial();

    let result = consumer.consume(&mut trial, &CancellationToken::new()).await;

    assert!(matches!(result, Err(Error::BranchingEvent { .. })));
}

#[tokio::test]
async fn unchanged_code_runs() {
    let fixture = Fixture::with_experiment(WRITE_RESULTS, |e| e.vcs(metadata()));
    let vcs = FakeVcs::new(Some(metadata()));
    let mut consumer = fixture.consumer().version_control(vcs.clone()).build();
    let mut trial = fixture.trial();

    consumer
        .consume(&mut trial, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(trial.status, TrialStatus::Completed);
    assert_eq!(vcs.n_calls(), 1);
}

#[tokio::test]
async fn ignored_code_changes_run() {
    let fixture = Fixture::with_experiment(WRITE_RESULTS, |e| e.vcs(metadata()));
    let vcs = FakeVcs::new(Some(drifted()));
    let mut consumer = fixture
        .consumer()
        .version_control(vcs.clone())
        .ignore_code_changes(true)
        .build();
    let mut trial = fixture.trial();

    consumer
        .consume(&mut trial, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(trial.status, TrialStatus::Completed);
    assert_eq!(vcs.n_calls(), 0);
}

#[tokio::test]
async fn unversioned_experiment_skips_check() {
    let fixture = Fixture::new(WRITE_RESULTS);
    let vcs = FakeVcs::new(Some(drifted()));
    let mut consumer = fixture.consumer().version_control(vcs.clone()).build();
    let mut trial = fixture.trial();

    consumer
        .consume(&mut trial, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(vcs.n_calls(), 0);
}
