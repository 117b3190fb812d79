//! The experiment a producer and consumer work on.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::space::Space;
use crate::vcs::VcsMetadata;

/// Metadata recorded when the experiment was created.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ExperimentMetadata {
    /// Program evaluating a trial.
    pub user_script: PathBuf,
    /// Fixed arguments passed before the trial's parameters.
    #[serde(default)]
    pub user_args: Vec<String>,
    /// Versioning metadata of `user_script` at creation time.
    #[serde(default, rename = "VCS")]
    pub vcs: Option<VcsMetadata>,
}

/// Name, search space and provenance of an experiment.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Experiment {
    /// Unique experiment name; part of every trial id.
    pub name: String,
    /// The search space trials are drawn from.
    pub space: Space,
    /// Creation-time metadata.
    #[serde(default)]
    pub metadata: ExperimentMetadata,
}

impl Experiment {
    /// Creates an experiment evaluated by `user_script`.
    pub fn new(name: impl Into<String>, space: Space, user_script: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            space,
            metadata: ExperimentMetadata {
                user_script: user_script.into(),
                ..ExperimentMetadata::default()
            },
        }
    }

    /// Sets the fixed arguments of the evaluated program.
    #[must_use]
    pub fn user_args<S: Into<String>>(mut self, args: impl IntoIterator<Item = S>) -> Self {
        self.metadata.user_args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Records the versioning metadata of the evaluated program.
    #[must_use]
    pub fn vcs(mut self, vcs: VcsMetadata) -> Self {
        self.metadata.vcs = Some(vcs);
        self
    }
}
