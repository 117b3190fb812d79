//! The outer loop alternating production and consumption.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, info, warn};

use crate::algorithm::Algorithm;
use crate::config::WorkerConfig;
use crate::consumer::Consumer;
use crate::error::{Error, Result};
use crate::experiment::Experiment;
use crate::producer::Producer;
use crate::storage::Storage;
use crate::trial::TrialStatus;

/// Counts of what one [`Worker::workon`] call did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WorkerSummary {
    /// Trials this worker executed, whatever their outcome.
    pub consumed: usize,
    /// Trials that ended `completed`.
    pub completed: usize,
    /// Trials that ended `broken`.
    pub broken: usize,
}

/// Pairs a [`Producer`] with a [`Consumer`] on one experiment.
///
/// Several workers, in one process or many, may share the same storage:
/// reservation guarantees each trial runs once.
pub struct Worker {
    experiment: Arc<Experiment>,
    storage: Arc<dyn Storage>,
    producer: Producer,
    consumer: Consumer,
    max_broken: usize,
    span: Span,
}

impl Worker {
    /// Assembles a worker from its parts.
    pub fn new(
        experiment: Arc<Experiment>,
        storage: Arc<dyn Storage>,
        producer: Producer,
        consumer: Consumer,
    ) -> Self {
        let span = tracing::info_span!("worker", experiment = %experiment.name);
        Self {
            experiment,
            storage,
            producer,
            consumer,
            max_broken: WorkerConfig::default().max_broken,
            span,
        }
    }

    /// Builds the producer and the consumer from one configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the configuration is invalid.
    pub fn from_config(
        experiment: Arc<Experiment>,
        storage: Arc<dyn Storage>,
        algorithm: Box<dyn Algorithm>,
        config: &WorkerConfig,
    ) -> Result<Self> {
        let producer = Producer::from_config(
            Arc::clone(&experiment),
            Arc::clone(&storage),
            algorithm,
            config,
        )?;
        let consumer = Consumer::from_config(Arc::clone(&experiment), Arc::clone(&storage), config)?;
        Ok(Self::new(experiment, storage, producer, consumer).max_broken(config.max_broken))
    }

    /// Sets how many broken trials end the loop.
    #[must_use]
    pub fn max_broken(mut self, max_broken: usize) -> Self {
        self.max_broken = max_broken.max(1);
        self
    }

    /// The producer.
    #[must_use]
    pub fn producer(&self) -> &Producer {
        &self.producer
    }

    /// The consumer.
    #[must_use]
    pub fn consumer(&self) -> &Consumer {
        &self.consumer
    }

    /// Produces and consumes trials until `max_trials` trials of the
    /// experiment are completed, the algorithm is done, or `cancel` fires.
    ///
    /// Trials are reserved oldest first, so work registered by other
    /// workers is picked up before new suggestions are made.
    ///
    /// # Errors
    ///
    /// [`Error::Interrupted`] and [`Error::BranchingEvent`] from the
    /// consumer end the loop. Other per-trial failures are logged; once
    /// `max_broken` trials broke, [`Error::BrokenExperiment`] is returned.
    /// Producer and storage errors propagate.
    pub async fn workon(
        &mut self,
        cancel: &CancellationToken,
        max_trials: Option<usize>,
    ) -> Result<WorkerSummary> {
        let span = self.span.clone();
        self.run(cancel, max_trials).instrument(span).await
    }

    async fn run(
        &mut self,
        cancel: &CancellationToken,
        max_trials: Option<usize>,
    ) -> Result<WorkerSummary> {
        let name = self.experiment.name.clone();
        let mut summary = WorkerSummary::default();

        loop {
            if cancel.is_cancelled() {
                info!("worker cancelled");
                break;
            }
            self.storage.refresh();
            let n_completed = self.storage.fetch_completed_trials(&name).len();
            if max_trials.is_some_and(|max| n_completed >= max) {
                info!(n_completed, "reached max trials");
                break;
            }

            let Some(mut trial) = self.storage.reserve_trial(&name, self.consumer.owner())? else {
                if self.producer.is_done() {
                    info!("algorithm is done");
                    break;
                }
                self.producer.update()?;
                if self.producer.produce()? == 0 {
                    info!("algorithm has nothing left to suggest");
                    break;
                }
                continue;
            };
            debug!(trial_id = %trial.id, "reserved trial");

            let outcome = self.consumer.consume(&mut trial, cancel).await;
            summary.consumed += 1;
            match trial.status {
                TrialStatus::Completed => summary.completed += 1,
                TrialStatus::Broken => summary.broken += 1,
                _ => {}
            }
            match outcome {
                Ok(()) => {}
                Err(e @ (Error::Interrupted { .. } | Error::BranchingEvent { .. })) => return Err(e),
                Err(e) => warn!(trial_id = %trial.id, error = %e, "trial failed"),
            }
            if summary.broken >= self.max_broken {
                warn!(broken = summary.broken, "too many broken trials");
                return Err(Error::BrokenExperiment {
                    broken: summary.broken,
                });
            }
        }

        info!(
            consumed = summary.consumed,
            completed = summary.completed,
            broken = summary.broken,
            "worker finished"
        );
        Ok(summary)
    }
}
