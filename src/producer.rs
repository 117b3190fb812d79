//! Produce and register new trials to evaluate.
//!
//! The producer keeps two views of the optimizer:
//!
//! - the **real** algorithm, fed only with completed trials;
//! - a **naive** snapshot, rebuilt from the real one at every
//!   [`update`](Producer::update) and additionally fed with lying results
//!   for trials still in flight.
//!
//! Suggestions always come from the naive view, so pending work is
//! accounted for, while speculative results never leak into the real
//! model. Duplicate suggestions are detected by storage and answered with
//! another update cycle.

use std::sync::Arc;
use std::time::Instant;

use tracing::{Span, debug, info, warn};

use crate::algorithm::Algorithm;
use crate::config::WorkerConfig;
use crate::error::{Error, Result};
use crate::experiment::Experiment;
use crate::history::TrialsHistory;
use crate::space::{Point, Space};
use crate::storage::Storage;
use crate::strategy::{ParallelStrategy, Strategy};
use crate::trial::{Trial, TrialResult};

/// Disposable algorithm snapshot with the history it was built from.
struct NaiveView {
    algorithm: Box<dyn Algorithm>,
    history: TrialsHistory,
}

/// Turns algorithm suggestions into registered trials.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
///
/// use trial_worker::algorithm::RandomSearch;
/// use trial_worker::space::Space;
/// use trial_worker::storage::{MemoryStorage, Storage};
/// use trial_worker::{Experiment, Producer};
///
/// let space = Space::new().real("x", -5.0, 5.0);
/// let experiment = Arc::new(Experiment::new("demo", space.clone(), "train.py"));
/// let storage = Arc::new(MemoryStorage::new());
///
/// let mut producer = Producer::builder(
///     Arc::clone(&experiment),
///     storage.clone(),
///     RandomSearch::with_seed(space, 1),
/// )
/// .pool_size(3)
/// .build()
/// .unwrap();
///
/// producer.update().unwrap();
/// assert_eq!(producer.produce().unwrap(), 3);
/// assert_eq!(storage.fetch_trials("demo").len(), 3);
/// ```
pub struct Producer {
    experiment: Arc<Experiment>,
    storage: Arc<dyn Storage>,
    algorithm: Box<dyn Algorithm>,
    trials_history: TrialsHistory,
    naive: Option<NaiveView>,
    strategy: Strategy,
    pool_size: usize,
    max_attempts: usize,
    span: Span,
}

impl Producer {
    /// Starts building a producer for `experiment`.
    pub fn builder(
        experiment: Arc<Experiment>,
        storage: Arc<dyn Storage>,
        algorithm: impl Algorithm + 'static,
    ) -> ProducerBuilder {
        ProducerBuilder {
            experiment,
            storage,
            algorithm: Box::new(algorithm),
            strategy: Strategy::default(),
            pool_size: 1,
            max_attempts: 100,
            span: None,
        }
    }

    /// Builds a producer from a [`WorkerConfig`].
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
        config.validate()?;
        ProducerBuilder {
            experiment,
            storage,
            algorithm,
            strategy: config.strategy.into(),
            pool_size: config.pool_size,
            max_attempts: config.max_attempts,
            span: None,
        }
        .build()
    }

    /// Target number of trials registered per [`produce`](Self::produce) call.
    #[must_use]
    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Bound on suggestion rounds per [`produce`](Self::produce) call.
    #[must_use]
    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    /// The real algorithm, fed only with completed trials.
    #[must_use]
    pub fn algorithm(&self) -> &dyn Algorithm {
        self.algorithm.as_ref()
    }

    /// History of the trials folded into the real algorithm.
    #[must_use]
    pub fn trials_history(&self) -> &TrialsHistory {
        &self.trials_history
    }

    /// History of the current naive view, if one was built.
    #[must_use]
    pub fn naive_trials_history(&self) -> Option<&TrialsHistory> {
        self.naive.as_ref().map(|n| &n.history)
    }

    /// Returns `true` once the real algorithm has nothing left to suggest.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.algorithm.is_done()
    }

    /// Refreshes the real algorithm from completed trials, then rebuilds the
    /// naive view from it with lies for the trials still in flight.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlgorithmInvariant`] if a stored trial does not fit
    /// the experiment's space.
    pub fn update(&mut self) -> Result<()> {
        let span = self.span.clone();
        let _enter = span.enter();
        self.update_algorithm()?;
        self.update_naive_algorithm()
    }

    /// Registers up to `pool_size` new trials and returns how many were
    /// registered.
    ///
    /// Fewer than `pool_size` trials are registered only if the algorithm
    /// reports it is done.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ExhaustedAttempts`] when `max_attempts` suggestion
    /// rounds did not yield `pool_size` new trials, and
    /// [`Error::AlgorithmInvariant`] when the algorithm suggests more points
    /// than requested or points outside the space.
    pub fn produce(&mut self) -> Result<usize> {
        let span = self.span.clone();
        let _enter = span.enter();

        if self.naive.is_none() {
            self.update()?;
        }

        let start = Instant::now();
        let mut sampled = 0;
        let mut attempts = 0;

        'rounds: while sampled < self.pool_size && attempts < self.max_attempts {
            let Some(naive) = self.naive.as_mut() else {
                return Err(Error::AlgorithmInvariant(
                    "producer has no naive algorithm after update".into(),
                ));
            };
            if naive.algorithm.is_done() {
                debug!(sampled, "algorithm is done");
                break;
            }

            attempts += 1;
            let wanted = self.pool_size - sampled;
            let points = naive.algorithm.suggest(wanted);
            debug!(
                attempt = attempts,
                requested = wanted,
                suggested = points.len(),
                "algorithm suggested points"
            );
            if points.len() > wanted {
                return Err(Error::AlgorithmInvariant(format!(
                    "asked for {wanted} points, got {}",
                    points.len()
                )));
            }
            let parents = naive.history.children().to_vec();

            for point in points {
                let mut trial =
                    Trial::from_point(&self.experiment.name, &self.experiment.space, &point)?;
                trial.parents.clone_from(&parents);
                match self.storage.register_trial(&trial) {
                    Ok(()) => {
                        info!(trial_id = %trial.id, "registered new trial");
                        sampled += 1;
                    }
                    Err(Error::DuplicateTrial { id }) => {
                        debug!(trial_id = %id, "duplicate sample, updating algorithm");
                        self.update()?;
                        continue 'rounds;
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        if sampled < self.pool_size && attempts >= self.max_attempts {
            warn!(attempts, sampled, pool_size = self.pool_size, "exhausted suggestion attempts");
            return Err(Error::ExhaustedAttempts {
                attempts,
                registered: sampled,
                pool_size: self.pool_size,
                elapsed: start.elapsed(),
            });
        }
        Ok(sampled)
    }

    fn update_algorithm(&mut self) -> Result<()> {
        let completed = self.storage.fetch_completed_trials(&self.experiment.name);
        debug!(n = completed.len(), "fetched completed trials");
        if completed.is_empty() {
            return Ok(());
        }

        let (points, results) = observations(&self.experiment.space, &completed)?;
        self.strategy.observe(&points, &results);

        let new: Vec<Trial> = completed
            .into_iter()
            .filter(|t| !self.trials_history.contains(&t.id))
            .collect();
        if !new.is_empty() {
            let (points, results) = observations(&self.experiment.space, &new)?;
            debug!(n = new.len(), "observing newly completed trials");
            self.trials_history.update(&new);
            self.algorithm.observe(&points, &results);
        }
        Ok(())
    }

    fn update_naive_algorithm(&mut self) -> Result<()> {
        let mut algorithm = self.algorithm.clone_box();
        let mut history = self.trials_history.snapshot();

        let lying_trials = self.produce_lies(&history);
        if !lying_trials.is_empty() {
            let (points, results) = observations(&self.experiment.space, &lying_trials)?;
            debug!(n = lying_trials.len(), "observing lying trials");
            history.update(&lying_trials);
            algorithm.observe(&points, &results);
        }

        self.naive = Some(NaiveView { algorithm, history });
        Ok(())
    }

    /// Copies of the in-flight trials carrying a lying result. Nothing is
    /// written to storage.
    fn produce_lies(&self, history: &TrialsHistory) -> Vec<Trial> {
        let active = self.storage.fetch_active_trials(&self.experiment.name);
        debug!(n = active.len(), "fetched active trials");
        active
            .iter()
            .filter_map(|trial| {
                let lie = self.strategy.lie(trial)?;
                let mut lying = trial.clone();
                lying.results.push(lie);
                lying.parents = history.children().to_vec();
                Some(lying)
            })
            .collect()
    }
}

fn observations(space: &Space, trials: &[Trial]) -> Result<(Vec<Point>, Vec<Vec<TrialResult>>)> {
    trials
        .iter()
        .map(|t| Ok((t.to_point(space)?, t.results.clone())))
        .collect::<Result<Vec<_>>>()
        .map(|pairs| pairs.into_iter().unzip())
}

/// Builder for [`Producer`].
///
/// # Defaults
///
/// - `pool_size`: 1
/// - `max_attempts`: 100
/// - strategy: [`MaxParallelStrategy`](crate::strategy::MaxParallelStrategy)
/// - span: `producer` span carrying the experiment name
pub struct ProducerBuilder {
    experiment: Arc<Experiment>,
    storage: Arc<dyn Storage>,
    algorithm: Box<dyn Algorithm>,
    strategy: Strategy,
    pool_size: usize,
    max_attempts: usize,
    span: Option<Span>,
}

impl ProducerBuilder {
    /// Sets the number of trials registered per `produce` call.
    #[must_use]
    pub fn pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    /// Sets the bound on suggestion rounds per `produce` call.
    #[must_use]
    pub fn max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Sets the parallel strategy.
    #[must_use]
    pub fn strategy(mut self, strategy: impl Into<Strategy>) -> Self {
        self.strategy = strategy.into();
        self
    }

    /// Sets the span every event of the producer is recorded in.
    #[must_use]
    pub fn span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    /// Builds the producer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if `pool_size` or `max_attempts` is
    /// zero, and the space's validation error if a dimension cannot be
    /// sampled (see [`Space::validate`](crate::space::Space::validate)).
    pub fn build(self) -> Result<Producer> {
        if self.pool_size == 0 {
            return Err(Error::InvalidConfig("pool_size must be at least 1".into()));
        }
        if self.max_attempts == 0 {
            return Err(Error::InvalidConfig(
                "max_attempts must be at least 1".into(),
            ));
        }
        self.experiment.space.validate()?;
        let span = self.span.unwrap_or_else(
            || tracing::info_span!("producer", experiment = %self.experiment.name),
        );
        Ok(Producer {
            experiment: self.experiment,
            storage: self.storage,
            algorithm: self.algorithm,
            trials_history: TrialsHistory::new(),
            naive: None,
            strategy: self.strategy,
            pool_size: self.pool_size,
            max_attempts: self.max_attempts,
            span,
        })
    }
}
