//! Trial storage backends.
//!
//! Storage is the only resource shared between producers and consumers.
//! It is the sole arbiter of trial uniqueness (atomic insert that fails on
//! an existing id) and of single ownership (conditional status
//! transitions).
//!
//! # Available backends
//!
//! | Backend | Description | Feature flag |
//! |---------|-------------|-------------|
//! | [`MemoryStorage`] | Trials behind a read-write lock (the default) | none |
//! | `JournalStorage` | JSONL journal with `fs2` file locking for multi-process sharing | `journal` |
//!
//! # Implementing a custom backend
//!
//! Implement [`Storage`] on top of a database that offers an atomic
//! insert-if-absent and a compare-and-set on the status field. The
//! `fetch_completed_trials` and `fetch_active_trials` queries have default
//! implementations in terms of [`fetch_trials_by_status`](Storage::fetch_trials_by_status).

#[cfg(feature = "journal")]
mod journal;
mod memory;

use std::path::Path;

use chrono::{DateTime, Utc};
#[cfg(feature = "journal")]
pub use journal::JournalStorage;
pub use memory::MemoryStorage;

use crate::error::{Error, Result};
use crate::trial::{Trial, TrialResult, TrialStatus};

/// Trait for storing trials and arbitrating concurrent access to them.
///
/// Implementations must be `Send + Sync`: a producer and the consumer's
/// pacemaker may hit the same storage from different threads.
pub trait Storage: Send + Sync {
    /// Inserts a new trial.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateTrial`] if a trial with the same id exists.
    /// The stored trial is never overwritten.
    fn register_trial(&self, trial: &Trial) -> Result<()>;

    /// Returns the trial with the given id.
    fn get_trial(&self, id: &str) -> Option<Trial>;

    /// Returns every trial of an experiment, in registration order.
    fn fetch_trials(&self, experiment: &str) -> Vec<Trial>;

    /// Returns the trials of an experiment whose status is one of `statuses`.
    fn fetch_trials_by_status(&self, experiment: &str, statuses: &[TrialStatus]) -> Vec<Trial> {
        self.fetch_trials(experiment)
            .into_iter()
            .filter(|t| statuses.contains(&t.status))
            .collect()
    }

    /// Returns the completed trials of an experiment.
    fn fetch_completed_trials(&self, experiment: &str) -> Vec<Trial> {
        self.fetch_trials_by_status(experiment, &[TrialStatus::Completed])
    }

    /// Returns the trials of an experiment that are not in a terminal status.
    fn fetch_active_trials(&self, experiment: &str) -> Vec<Trial> {
        let active: Vec<TrialStatus> = TrialStatus::ALL
            .into_iter()
            .filter(|s| !s.is_terminal())
            .collect();
        self.fetch_trials_by_status(experiment, &active)
    }

    /// Sets the status of a trial, optionally only if it currently is `was`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TrialNotFound`] for an unknown id and
    /// [`Error::StatusConflict`] if the current status differs from `was`.
    fn set_trial_status(
        &self,
        id: &str,
        status: TrialStatus,
        was: Option<TrialStatus>,
    ) -> Result<Trial>;

    /// Atomically moves a trial from `new` or `interrupted` to `reserved`
    /// and stamps it with the `owner` token.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ReservationConflict`] if the trial is in any other
    /// status, typically because another consumer reserved it first.
    fn reserve(&self, id: &str, owner: &str) -> Result<Trial>;

    /// Reserves the oldest reservable trial of an experiment for `owner`,
    /// if any.
    ///
    /// # Errors
    ///
    /// Propagates backend failures.
    fn reserve_trial(&self, experiment: &str, owner: &str) -> Result<Option<Trial>>;

    /// Records a heartbeat for a trial reserved by `owner`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ReservationLost`] unless the trial is still
    /// `reserved` by `owner`, and [`Error::TrialNotFound`] for an unknown id.
    fn update_heartbeat(&self, id: &str, owner: &str) -> Result<()>;

    /// Records the working directory assigned to a trial.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TrialNotFound`] for an unknown id.
    fn set_working_dir(&self, id: &str, dir: &Path) -> Result<()>;

    /// Appends results to a trial.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TrialNotFound`] for an unknown id.
    fn push_results(&self, id: &str, results: &[TrialResult]) -> Result<()>;

    /// Reload from an external source (e.g. a file written by another
    /// process). Return `true` if the in-memory state was updated.
    fn refresh(&self) -> bool {
        false
    }
}

/// Applies a status change and its timestamps to a trial. Leaving
/// `reserved` releases the owner.
pub(crate) fn transition(trial: &mut Trial, status: TrialStatus, now: DateTime<Utc>) {
    trial.status = status;
    if status != TrialStatus::Reserved {
        trial.owner = None;
    }
    match status {
        TrialStatus::Reserved => {
            trial.start_time = Some(now);
            trial.heartbeat = Some(now);
        }
        TrialStatus::Completed | TrialStatus::Broken => trial.end_time = Some(now),
        TrialStatus::New | TrialStatus::Suspended | TrialStatus::Interrupted => {}
    }
}

/// Checks a conditional update against the status found in storage.
pub(crate) fn check_was(trial: &Trial, was: Option<TrialStatus>) -> Result<()> {
    match was {
        Some(expected) if expected != trial.status => Err(Error::StatusConflict {
            id: trial.id.clone(),
            expected,
            actual: trial.status,
        }),
        _ => Ok(()),
    }
}
