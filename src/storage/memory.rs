use std::collections::HashMap;
use std::path::Path;

use chrono::Utc;
use parking_lot::RwLock;

use super::{Storage, check_was, transition};
use crate::error::{Error, Result};
use crate::trial::{Trial, TrialResult, TrialStatus};

#[derive(Default)]
struct Inner {
    trials: Vec<Trial>,
    index: HashMap<String, usize>,
}

impl Inner {
    fn get_mut(&mut self, id: &str) -> Result<&mut Trial> {
        let idx = *self
            .index
            .get(id)
            .ok_or_else(|| Error::TrialNotFound(id.to_owned()))?;
        Ok(&mut self.trials[idx])
    }

    fn upsert(&mut self, trial: Trial) {
        if let Some(&idx) = self.index.get(&trial.id) {
            self.trials[idx] = trial;
        } else {
            self.index.insert(trial.id.clone(), self.trials.len());
            self.trials.push(trial);
        }
    }
}

/// In-memory trial storage (the default).
///
/// Every operation runs under a single `parking_lot::RwLock`, which makes
/// the duplicate check of [`register_trial`](Storage::register_trial) and
/// the compare-and-set of [`reserve`](Storage::reserve) atomic for all
/// threads sharing the store.
#[derive(Default)]
pub struct MemoryStorage {
    inner: RwLock<Inner>,
}

impl MemoryStorage {
    /// Creates a new, empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an in-memory store pre-populated with `trials`. Later
    /// entries with the same id replace earlier ones.
    #[must_use]
    pub fn with_trials(trials: impl IntoIterator<Item = Trial>) -> Self {
        let storage = Self::new();
        storage.load(trials);
        storage
    }

    /// Replaces the whole content of the store.
    pub(crate) fn load(&self, trials: impl IntoIterator<Item = Trial>) {
        let mut inner = Inner::default();
        for trial in trials {
            inner.upsert(trial);
        }
        *self.inner.write() = inner;
    }

    /// Total number of trials across experiments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().trials.len()
    }

    /// Returns `true` if no trial is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every stored trial, in registration order.
    #[cfg(feature = "journal")]
    pub(crate) fn snapshot(&self) -> Vec<Trial> {
        self.inner.read().trials.clone()
    }

    pub(crate) fn insert(&self, trial: &Trial) -> Result<Trial> {
        let mut inner = self.inner.write();
        if inner.index.contains_key(&trial.id) {
            return Err(Error::DuplicateTrial {
                id: trial.id.clone(),
            });
        }
        let mut trial = trial.clone();
        trial.submit_time.get_or_insert_with(Utc::now);
        inner.upsert(trial.clone());
        Ok(trial)
    }

    pub(crate) fn modify(
        &self,
        id: &str,
        f: impl FnOnce(&mut Trial) -> Result<()>,
    ) -> Result<Trial> {
        let mut inner = self.inner.write();
        let trial = inner.get_mut(id)?;
        f(trial)?;
        Ok(trial.clone())
    }

    pub(crate) fn next_reservable(&self, experiment: &str) -> Option<String> {
        self.inner
            .read()
            .trials
            .iter()
            .filter(|t| t.experiment == experiment && t.status.is_reservable())
            .min_by_key(|t| t.submit_time)
            .map(|t| t.id.clone())
    }
}

pub(crate) fn reserve_in_place(trial: &mut Trial, owner: &str) -> Result<()> {
    if !trial.status.is_reservable() {
        return Err(Error::ReservationConflict {
            id: trial.id.clone(),
            status: trial.status,
        });
    }
    transition(trial, TrialStatus::Reserved, Utc::now());
    trial.owner = Some(owner.to_owned());
    Ok(())
}

pub(crate) fn heartbeat_in_place(trial: &mut Trial, owner: &str) -> Result<()> {
    if trial.status != TrialStatus::Reserved || trial.owner.as_deref() != Some(owner) {
        return Err(Error::ReservationLost {
            id: trial.id.clone(),
        });
    }
    trial.heartbeat = Some(Utc::now());
    Ok(())
}

impl Storage for MemoryStorage {
    fn register_trial(&self, trial: &Trial) -> Result<()> {
        self.insert(trial).map(drop)
    }

    fn get_trial(&self, id: &str) -> Option<Trial> {
        let inner = self.inner.read();
        inner.index.get(id).map(|&idx| inner.trials[idx].clone())
    }

    fn fetch_trials(&self, experiment: &str) -> Vec<Trial> {
        self.inner
            .read()
            .trials
            .iter()
            .filter(|t| t.experiment == experiment)
            .cloned()
            .collect()
    }

    fn fetch_trials_by_status(&self, experiment: &str, statuses: &[TrialStatus]) -> Vec<Trial> {
        self.inner
            .read()
            .trials
            .iter()
            .filter(|t| t.experiment == experiment && statuses.contains(&t.status))
            .cloned()
            .collect()
    }

    fn set_trial_status(
        &self,
        id: &str,
        status: TrialStatus,
        was: Option<TrialStatus>,
    ) -> Result<Trial> {
        self.modify(id, |trial| {
            check_was(trial, was)?;
            transition(trial, status, Utc::now());
            Ok(())
        })
    }

    fn reserve(&self, id: &str, owner: &str) -> Result<Trial> {
        self.modify(id, |trial| reserve_in_place(trial, owner))
    }

    fn reserve_trial(&self, experiment: &str, owner: &str) -> Result<Option<Trial>> {
        // Another thread may win the race between lookup and reservation.
        while let Some(id) = self.next_reservable(experiment) {
            match self.reserve(&id, owner) {
                Ok(trial) => return Ok(Some(trial)),
                Err(Error::ReservationConflict { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(None)
    }

    fn update_heartbeat(&self, id: &str, owner: &str) -> Result<()> {
        self.modify(id, |trial| heartbeat_in_place(trial, owner)).map(drop)
    }

    fn set_working_dir(&self, id: &str, dir: &Path) -> Result<()> {
        self.modify(id, |trial| {
            trial.working_dir = Some(dir.to_path_buf());
            Ok(())
        })
        .map(drop)
    }

    fn push_results(&self, id: &str, results: &[TrialResult]) -> Result<()> {
        self.modify(id, |trial| {
            trial.results.extend_from_slice(results);
            Ok(())
        })
        .map(drop)
    }
}
