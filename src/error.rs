use core::time::Duration;
use std::path::PathBuf;

use crate::trial::TrialStatus;
use crate::vcs::VcsChange;

/// Errors raised while producing or consuming trials.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Returned when a dimension's lower bound exceeds its upper bound.
    #[error("invalid bounds: low ({low}) must be less than or equal to high ({high})")]
    InvalidBounds {
        /// The lower bound.
        low: f64,
        /// The upper bound.
        high: f64,
    },

    /// Returned when a log-scaled dimension has a non-positive lower bound.
    #[error("invalid log bounds: low must be positive for log scale")]
    InvalidLogBounds,

    /// Returned when a categorical dimension has no choices.
    #[error("categorical choices cannot be empty")]
    EmptyChoices,

    /// Returned by a storage backend when a trial with the same id already exists.
    #[error("trial {id} is already registered")]
    DuplicateTrial {
        /// The id that collided.
        id: String,
    },

    /// Returned when the producer cannot register `pool_size` new trials
    /// within its attempt budget.
    #[error(
        "algorithm keeps suggesting configurations that already exist: registered \
         {registered}/{pool_size} trials after {attempts} attempts in {elapsed:?}; the \
         search may have converged, otherwise consider raising `max_attempts`"
    )]
    ExhaustedAttempts {
        /// Number of suggestion rounds that were run.
        attempts: usize,
        /// Number of trials that were registered before giving up.
        registered: usize,
        /// The number of trials the producer was asked for.
        pool_size: usize,
        /// Wall-clock time spent in `produce`.
        elapsed: Duration,
    },

    /// Returned when the evaluated program's code no longer matches the
    /// metadata recorded when the experiment was created.
    #[error("code changed between execution of 2 trials: {}", format_changes(.changes))]
    BranchingEvent {
        /// Every differing versioning field.
        changes: Vec<VcsChange>,
    },

    /// Returned when execution was cancelled from outside.
    #[error("trial {trial_id} was interrupted")]
    Interrupted {
        /// The interrupted trial.
        trial_id: String,
    },

    /// Returned when an algorithm breaks the producer's contract.
    #[error("algorithm invariant violated: {0}")]
    AlgorithmInvariant(String),

    /// Returned when a trial cannot be reserved because it is not in a
    /// reservable status.
    #[error("trial {id} cannot be reserved from status {status}")]
    ReservationConflict {
        /// The trial id.
        id: String,
        /// The status found in storage.
        status: TrialStatus,
    },

    /// Returned when a running trial stopped being reserved under our feet.
    #[error("trial {id} is no longer reserved by this worker")]
    ReservationLost {
        /// The trial id.
        id: String,
    },

    /// Returned when a trial id is unknown to storage.
    #[error("trial {0} not found")]
    TrialNotFound(String),

    /// Returned when a conditional status update finds an unexpected status.
    #[error("trial {id} has status {actual}, expected {expected}")]
    StatusConflict {
        /// The trial id.
        id: String,
        /// The status the caller expected.
        expected: TrialStatus,
        /// The status found in storage.
        actual: TrialStatus,
    },

    /// Returned when the evaluation subprocess could not be started.
    #[error("failed to launch {program}: {source}")]
    Launch {
        /// The program that was executed.
        program: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Returned when versioning metadata cannot be inferred.
    #[error("version control error: {0}")]
    Vcs(String),

    /// Returned when a program exits successfully without usable results.
    #[error("invalid results: {0}")]
    InvalidResults(String),

    /// Returned by the worker loop once too many trials broke.
    #[error("{broken} trials are broken, the experiment is likely misconfigured")]
    BrokenExperiment {
        /// Number of broken trials counted by the worker.
        broken: usize,
    },

    /// Returned when a blocking task panicked or was cancelled.
    #[error("async task error: {0}")]
    TaskError(String),

    /// Returned when a configuration value is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// I/O failure while preparing or reading a trial's files.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding failure.
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// Returned when a storage operation fails.
    #[cfg(feature = "journal")]
    #[error("storage error: {0}")]
    Storage(String),
}

pub type Result<T> = core::result::Result<T, Error>;

fn format_changes(changes: &[VcsChange]) -> String {
    changes
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
