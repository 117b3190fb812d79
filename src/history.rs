//! Lineage frontier of the trials an algorithm view has observed.

use std::collections::HashSet;

use crate::trial::Trial;

/// Tracks which trials were folded into an algorithm's state.
///
/// `children` is the frontier: the most recent trials that no later
/// observed trial lists as a parent. New trials are stamped with the
/// frontier as their `parents`, so a later view can tell which history a
/// suggestion was made from.
#[derive(Debug, Default)]
pub struct TrialsHistory {
    children: Vec<String>,
    ids: HashSet<String>,
}

impl TrialsHistory {
    /// Creates an empty history.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// An independent copy for a disposable algorithm view. Updating the
    /// copy never affects `self`.
    #[must_use]
    pub fn snapshot(&self) -> Self {
        Self {
            children: self.children.clone(),
            ids: self.ids.clone(),
        }
    }

    /// The current frontier.
    #[must_use]
    pub fn children(&self) -> &[String] {
        &self.children
    }

    /// Returns `true` if the trial with `id` was already observed.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    /// Number of trials observed so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Returns `true` if nothing was observed yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Folds a batch of trials into the history and advances the frontier.
    pub fn update(&mut self, trials: &[Trial]) {
        let descendents: HashSet<&str> = trials
            .iter()
            .flat_map(|t| t.parents.iter().map(String::as_str))
            .collect();

        let mut children: Vec<String> = self
            .children
            .iter()
            .filter(|id| !descendents.contains(id.as_str()))
            .cloned()
            .collect();
        for trial in trials {
            if !children.contains(&trial.id) {
                children.push(trial.id.clone());
            }
            self.ids.insert(trial.id.clone());
        }
        self.children = children;
    }
}
