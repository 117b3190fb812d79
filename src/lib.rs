#![forbid(unsafe_code)]
#![deny(clippy::all)]
#![deny(unreachable_pub)]
#![deny(clippy::correctness)]
#![deny(clippy::suspicious)]
#![deny(clippy::style)]
#![deny(clippy::complexity)]
#![deny(clippy::perf)]
#![deny(clippy::pedantic)]
#![deny(clippy::std_instead_of_core)]

//! Asynchronous trial production and execution for distributed black-box
//! optimization.
//!
//! Many workers, possibly on different machines, cooperate on one
//! experiment through a shared [`Storage`](storage::Storage). Each worker
//! alternates two roles:
//!
//! - the [`Producer`] asks an [`Algorithm`](algorithm::Algorithm) for new
//!   configurations and registers them as trials. Trials still being
//!   evaluated elsewhere are shown to a disposable copy of the algorithm
//!   with a *lying* result from a [`ParallelStrategy`](strategy::ParallelStrategy),
//!   so suggestions account for pending work;
//! - the [`Consumer`] reserves one trial, runs the experiment's program on
//!   it in a dedicated working directory, keeps the reservation alive with a
//!   [`Pacemaker`], and records the outcome.
//!
//! Storage arbitrates everything shared: trial ids are derived from the
//! experiment and parameters, so a duplicate suggestion fails to register,
//! and status changes are conditional, so a trial runs at most once at a
//! time.
//!
//! # Getting Started
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use tokio_util::sync::CancellationToken;
//! use trial_worker::algorithm::RandomSearch;
//! use trial_worker::space::Space;
//! use trial_worker::storage::MemoryStorage;
//! use trial_worker::{Experiment, Worker, WorkerConfig};
//!
//! # async fn run() -> trial_worker::Result<()> {
//! let space = Space::new().real("lr", 1e-4, 1e-1).integer("layers", 1, 8);
//! let experiment = Arc::new(Experiment::new("mnist", space.clone(), "./train.sh"));
//! let storage = Arc::new(MemoryStorage::new());
//! let config = WorkerConfig {
//!     pool_size: 2,
//!     ..WorkerConfig::default()
//! };
//!
//! let mut worker = Worker::from_config(
//!     experiment,
//!     storage,
//!     Box::new(RandomSearch::new(space)),
//!     &config,
//! )?;
//! let summary = worker.workon(&CancellationToken::new(), Some(20)).await?;
//! println!("completed {} trials", summary.completed);
//! # Ok(())
//! # }
//! ```
//!
//! # Core Concepts
//!
//! | Type | Role |
//! |------|------|
//! | [`Trial`](trial::Trial) | One configuration, its status and its results. |
//! | [`Producer`] | Turns algorithm suggestions into registered trials. |
//! | [`Consumer`] | Executes one trial as a subprocess. |
//! | [`Pacemaker`] | Heartbeat keeping a running trial's reservation alive. |
//! | [`TrialsHistory`] | Frontier of trials an algorithm has observed. |
//! | [`Worker`] | Loop alternating production and consumption. |
//!
//! # Feature Flags
//!
//! | Flag | What it enables | Default |
//! |------|----------------|---------|
//! | `journal` | [`JournalStorage`](storage::JournalStorage): JSONL persistence shared between processes through file locking | off |

pub mod algorithm;
mod config;
mod consumer;
mod error;
mod experiment;
mod history;
mod pacemaker;
mod producer;
pub mod space;
pub mod storage;
pub mod strategy;
pub mod trial;
pub mod vcs;
mod worker;

pub use config::WorkerConfig;
pub use consumer::{Consumer, ConsumerBuilder, RESULTS_FILE};
pub use error::{Error, Result};
pub use experiment::{Experiment, ExperimentMetadata};
pub use history::TrialsHistory;
pub use pacemaker::Pacemaker;
pub use producer::{Producer, ProducerBuilder};
pub use worker::{Worker, WorkerSummary};

/// Convenient wildcard import for the most common types.
///
/// ```
/// use trial_worker::prelude::*;
/// ```
pub mod prelude {
    pub use crate::algorithm::{Algorithm, GridSearch, RandomSearch};
    pub use crate::config::WorkerConfig;
    pub use crate::consumer::Consumer;
    pub use crate::error::{Error, Result};
    pub use crate::experiment::Experiment;
    pub use crate::producer::Producer;
    pub use crate::space::{ParamValue, Point, Space};
    #[cfg(feature = "journal")]
    pub use crate::storage::JournalStorage;
    pub use crate::storage::{MemoryStorage, Storage};
    pub use crate::strategy::{
        MaxParallelStrategy, MeanParallelStrategy, NoParallelStrategy, ParallelStrategy, Strategy,
    };
    pub use crate::trial::{ResultType, Trial, TrialResult, TrialStatus};
    pub use crate::worker::Worker;
}
