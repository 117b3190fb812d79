use core::time::Duration;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use trial_worker::Error;
use trial_worker::storage::Storage;
use trial_worker::trial::TrialStatus;

use crate::common::{Fixture, WRITE_RESULTS};

#[tokio::test]
async fn cancelled_before_launch() {
    let fixture = Fixture::new("touch ran");
    let mut consumer = fixture.consumer().build();
    let mut trial = fixture.trial();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = consumer.consume(&mut trial, &cancel).await.unwrap_err();

    assert!(matches!(err, Error::Interrupted { .. }));
    assert_eq!(trial.status, TrialStatus::Interrupted);
    assert_eq!(fixture.stored(&trial).status, TrialStatus::Interrupted);
    assert!(trial.working_dir.is_none());
}

#[tokio::test]
async fn cancelled_while_running() {
    let fixture = Fixture::new("sleep 30");
    let mut consumer = fixture.consumer().build();
    let mut trial = fixture.trial();
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        trigger.cancel();
    });

    let start = Instant::now();
    let err = consumer.consume(&mut trial, &cancel).await.unwrap_err();

    assert!(matches!(err, Error::Interrupted { .. }));
    assert!(start.elapsed() < Duration::from_secs(10));
    assert_eq!(fixture.stored(&trial).status, TrialStatus::Interrupted);
}

#[tokio::test]
async fn interrupt_exit_code_interrupts_trial() {
    let fixture = Fixture::new("exit 130");
    let mut consumer = fixture.consumer().build();
    let mut trial = fixture.trial();

    let err = consumer
        .consume(&mut trial, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Interrupted { .. }));
    assert_eq!(fixture.stored(&trial).status, TrialStatus::Interrupted);
}

#[tokio::test]
async fn killed_by_signal_breaks_trial() {
    let fixture = Fixture::new("kill -SEGV $$");
    let mut consumer = fixture.consumer().build();
    let mut trial = fixture.trial();

    consumer
        .consume(&mut trial, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(trial.status, TrialStatus::Broken);
    assert_eq!(fixture.stored(&trial).status, TrialStatus::Broken);
}

#[tokio::test]
async fn interrupted_trial_resumes_in_same_directory() {
    let body = format!(
        "if [ -f seen ]; then\n  {WRITE_RESULTS}\nelse\n  touch seen\n  exit 130\nfi"
    );
    let fixture = Fixture::new(&body);
    let mut consumer = fixture.consumer().build();
    let mut trial = fixture.trial();
    let cancel = CancellationToken::new();

    assert!(matches!(
        consumer.consume(&mut trial, &cancel).await,
        Err(Error::Interrupted { .. })
    ));
    let first_dir = trial.working_dir.clone();

    consumer.consume(&mut trial, &cancel).await.unwrap();
    assert_eq!(trial.status, TrialStatus::Completed);
    assert_eq!(trial.working_dir, first_dir);
}

#[tokio::test]
async fn external_completion_aborts_execution() {
    let fixture = Fixture::new("sleep 30");
    let mut consumer = fixture.consumer().build();
    let mut trial = fixture.trial();

    let storage = fixture.storage.clone();
    let id = trial.id.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        storage
            .set_trial_status(&id, TrialStatus::Completed, Some(TrialStatus::Reserved))
            .unwrap();
    });

    let start = Instant::now();
    let err = consumer
        .consume(&mut trial, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::ReservationLost { .. }));
    assert!(start.elapsed() < Duration::from_secs(10));
    assert_eq!(fixture.stored(&trial).status, TrialStatus::Completed);
}
